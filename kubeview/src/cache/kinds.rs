//! The set of kinds watched by every cluster cache

use super::Cached;
use k8s_openapi::api::{
    apps::v1 as apps, autoscaling::v2 as autoscaling, batch::v1 as batch, core::v1 as core,
    networking::v1 as networking, rbac::v1 as rbac, storage::v1 as storage,
};
use kube_runtime::reflector::{store::Writer, Store};

/// Receives the writer for each watched kind
pub trait WatchKind {
    fn watch<K: Cached>(&mut self, writer: Writer<K>);
}

macro_rules! kinds {
    ($($field:ident: $ty:ty => $namespaced:literal),+ $(,)?) => {
        /// Read handles for every watched kind
        #[derive(Clone)]
        pub struct Stores {
            $($field: Store<$ty>,)+
        }

        /// Write handles for every watched kind
        ///
        /// Writers are driven by watches at runtime. Tests feed them watcher events directly.
        pub struct Writers {
            $($field: Writer<$ty>,)+
        }

        impl Default for Writers {
            fn default() -> Self {
                Self {
                    $($field: Writer::default(),)+
                }
            }
        }

        impl Writers {
            /// Returns read handles backed by these writers
            pub fn stores(&self) -> Stores {
                Stores {
                    $($field: self.$field.as_reader(),)+
                }
            }

            /// Hands every writer to `watch`
            pub fn watch_all(self, watch: &mut impl WatchKind) {
                $(watch.watch(self.$field);)+
            }
        }

        $(
            impl Cached for $ty {
                const PLURAL: &'static str = stringify!($field);
                const NAMESPACED: bool = $namespaced;

                fn store(stores: &Stores) -> &Store<Self> {
                    &stores.$field
                }

                fn writer(writers: &mut Writers) -> &mut Writer<Self> {
                    &mut writers.$field
                }
            }
        )+
    };
}

kinds! {
    pods: core::Pod => true,
    services: core::Service => true,
    endpoints: core::Endpoints => true,
    configmaps: core::ConfigMap => true,
    secrets: core::Secret => true,
    persistentvolumeclaims: core::PersistentVolumeClaim => true,
    persistentvolumes: core::PersistentVolume => false,
    nodes: core::Node => false,
    namespaces: core::Namespace => false,
    events: core::Event => true,
    limitranges: core::LimitRange => true,
    resourcequotas: core::ResourceQuota => true,
    deployments: apps::Deployment => true,
    replicasets: apps::ReplicaSet => true,
    daemonsets: apps::DaemonSet => true,
    statefulsets: apps::StatefulSet => true,
    jobs: batch::Job => true,
    cronjobs: batch::CronJob => true,
    ingresses: networking::Ingress => true,
    storageclasses: storage::StorageClass => false,
    horizontalpodautoscalers: autoscaling::HorizontalPodAutoscaler => true,
    roles: rbac::Role => true,
    rolebindings: rbac::RoleBinding => true,
    clusterroles: rbac::ClusterRole => false,
    clusterrolebindings: rbac::ClusterRoleBinding => false,
}
