//! Roles, role bindings, and their cluster-scoped counterparts

use super::ListRequest;
use crate::{
    cache::Cached,
    cluster::ClusterMeta,
    context::RequestContext,
    dataselect::{Describe, Properties, Property},
    meta::{ListResponse, ObjectMeta, TypeMeta},
    Error,
};
use k8s_openapi::{
    api::rbac::v1::{
        ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
    },
    apimachinery::pkg::apis::meta::v1 as metav1,
};
use serde::Serialize;

/// A role or cluster role
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleView {
    pub object_meta: ObjectMeta,
    pub type_meta: TypeMeta,
    pub rules: Vec<PolicyRule>,
}

/// A role binding or cluster role binding
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingView {
    pub object_meta: ObjectMeta,
    pub type_meta: TypeMeta,
    pub role_ref: RoleRef,
    pub subjects: Vec<Subject>,
}

/// Projects a cached RBAC object into its view
trait Project<K> {
    fn project(obj: &K, cluster: &ClusterMeta) -> Self;
}

impl RoleView {
    fn new<K: Cached>(
        meta: &metav1::ObjectMeta,
        rules: Option<&Vec<PolicyRule>>,
        cluster: &ClusterMeta,
    ) -> Self {
        Self {
            object_meta: ObjectMeta::new(meta, cluster),
            type_meta: TypeMeta::of::<K>(),
            rules: rules.cloned().unwrap_or_default(),
        }
    }
}

impl Describe for RoleView {
    fn describe(&self) -> Properties {
        Properties::of_meta(&self.object_meta)
    }
}

impl Project<Role> for RoleView {
    fn project(role: &Role, cluster: &ClusterMeta) -> Self {
        Self::new::<Role>(&role.metadata, role.rules.as_ref(), cluster)
    }
}

impl Project<ClusterRole> for RoleView {
    fn project(role: &ClusterRole, cluster: &ClusterMeta) -> Self {
        Self::new::<ClusterRole>(&role.metadata, role.rules.as_ref(), cluster)
    }
}

impl BindingView {
    fn new<K: Cached>(
        meta: &metav1::ObjectMeta,
        role_ref: &RoleRef,
        subjects: Option<&Vec<Subject>>,
        cluster: &ClusterMeta,
    ) -> Self {
        Self {
            object_meta: ObjectMeta::new(meta, cluster),
            type_meta: TypeMeta::of::<K>(),
            role_ref: role_ref.clone(),
            subjects: subjects.cloned().unwrap_or_default(),
        }
    }
}

impl Describe for BindingView {
    fn describe(&self) -> Properties {
        Properties::of_meta(&self.object_meta).with(Property::Type, self.role_ref.kind.as_str())
    }
}

impl Project<RoleBinding> for BindingView {
    fn project(rb: &RoleBinding, cluster: &ClusterMeta) -> Self {
        Self::new::<RoleBinding>(&rb.metadata, &rb.role_ref, rb.subjects.as_ref(), cluster)
    }
}

impl Project<ClusterRoleBinding> for BindingView {
    fn project(rb: &ClusterRoleBinding, cluster: &ClusterMeta) -> Self {
        Self::new::<ClusterRoleBinding>(&rb.metadata, &rb.role_ref, rb.subjects.as_ref(), cluster)
    }
}

async fn list_as<K, V>(ctx: &RequestContext, req: &ListRequest) -> Result<ListResponse<V>, Error>
where
    K: Cached,
    V: Describe + Project<K>,
{
    let channels = ctx.channels(req.namespaces.clone());
    let items = channels.open::<K>();
    let items = items.recv().await?;
    channels.close().await;

    let cluster = ctx.cluster_meta();
    let rows = items.iter().map(|k| V::project(k, cluster));
    Ok(ListResponse::new(req.query.select(rows)))
}

fn get_as<K, V>(ctx: &RequestContext, namespace: Option<&str>, name: &str) -> Result<V, Error>
where
    K: Cached,
    V: Project<K>,
{
    if let Some(ns) = namespace.filter(|_| K::NAMESPACED) {
        ctx.authorize_namespace(ns)?;
    }
    let item = ctx.cache().get::<K>(namespace, name)?;
    Ok(V::project(&item, ctx.cluster_meta()))
}

pub async fn list_roles(
    ctx: &RequestContext,
    req: &ListRequest,
) -> Result<ListResponse<RoleView>, Error> {
    list_as::<Role, _>(ctx, req).await
}

pub fn get_role(ctx: &RequestContext, namespace: &str, name: &str) -> Result<RoleView, Error> {
    get_as::<Role, _>(ctx, Some(namespace), name)
}

pub async fn list_role_bindings(
    ctx: &RequestContext,
    req: &ListRequest,
) -> Result<ListResponse<BindingView>, Error> {
    list_as::<RoleBinding, _>(ctx, req).await
}

pub fn get_role_binding(
    ctx: &RequestContext,
    namespace: &str,
    name: &str,
) -> Result<BindingView, Error> {
    get_as::<RoleBinding, _>(ctx, Some(namespace), name)
}

pub async fn list_cluster_roles(
    ctx: &RequestContext,
    req: &ListRequest,
) -> Result<ListResponse<RoleView>, Error> {
    list_as::<ClusterRole, _>(ctx, req).await
}

pub fn get_cluster_role(ctx: &RequestContext, name: &str) -> Result<RoleView, Error> {
    get_as::<ClusterRole, _>(ctx, None, name)
}

pub async fn list_cluster_role_bindings(
    ctx: &RequestContext,
    req: &ListRequest,
) -> Result<ListResponse<BindingView>, Error> {
    list_as::<ClusterRoleBinding, _>(ctx, req).await
}

pub fn get_cluster_role_binding(ctx: &RequestContext, name: &str) -> Result<BindingView, Error> {
    get_as::<ClusterRoleBinding, _>(ctx, None, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::Writers, context::Identity, dataselect::DataSelectQuery,
        namespace::NamespaceQuery, resource::fixtures::*,
    };

    #[tokio::test]
    async fn lists_namespaced_and_cluster_roles() {
        let mut writers = Writers::default();
        writers.apply(Role {
            metadata: meta("alice", "reader"),
            rules: Some(vec![PolicyRule {
                verbs: vec!["get".to_string(), "list".to_string()],
                resources: Some(vec!["pods".to_string()]),
                ..Default::default()
            }]),
        });
        writers.apply(Role {
            metadata: meta("bob", "reader"),
            ..Default::default()
        });
        writers.apply(ClusterRole {
            metadata: metav1::ObjectMeta {
                name: Some("view".to_string()),
                ..Default::default()
            },
            ..Default::default()
        });
        let ctx = context(&writers, Identity::tenant("alice", "alice"));

        let req = ListRequest::new(NamespaceQuery::one("alice"), DataSelectQuery::default());
        let roles = list_roles(&ctx, &req).await.unwrap();
        assert_eq!(roles.total, 1);
        assert_eq!(roles.items[0].rules[0].verbs, ["get", "list"]);

        let cluster_roles = list_cluster_roles(&ctx, &req).await.unwrap();
        assert_eq!(cluster_roles.total, 1);

        let err = get_role(&ctx, "bob", "reader").unwrap_err();
        assert_eq!(err.kind(), "forbidden");
    }
}
