//! A multi-tenant Kubernetes resource aggregation service built on [`kube`]
//!
//! `kubeview` keeps an informer-backed [`IndexerCache`] per cluster and answers
//! list and detail requests by fanning out over several cached kinds at once,
//! joining them (pods to their controllers, events to the objects they
//! describe, claims to the pods that mount them, ...) and passing the result
//! through a uniform [`dataselect`] pipeline of filter, sort and pagination.
//!
//! # Modules
//!
//! - [`runtime`]: process scaffolding (logging, Kubernetes clients, signal
//!   handling, admin server, informer caches).
//! - [`cache`] and [`channels`]: informer snapshots and the per-request
//!   producer bundle used to read them concurrently.
//! - [`namespace`], [`dataselect`], [`podinfo`] and [`event`]: the shared
//!   pieces of the aggregation pipeline.
//! - [`resource`]: per-kind list and detail assemblers.
//! - [`release`]: the Helm release facade and release object graph.
//! - [`verber`], [`resource_map`] and [`setup`]: kind-agnostic mutations.
//! - [`registry`] and [`api`]: the adapter registry and the HTTP surface that
//!   dispatches through it.
//!
//! # TLS Features
//!
//! - **rustls-tls**: Enables TLS for the API server and the Kubernetes client
//!   using [`rustls`]. One of **rustls-tls-aws-lc-rs** or **rustls-tls-ring**
//!   selects the crypto provider.
//!
//! [`kube`]: https://github.com/kube-rs/kube-rs
//! [`rustls`]: https://crates.io/crates/rustls

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod admin;
pub mod api;
pub mod cache;
pub mod channels;
pub mod client;
pub mod cluster;
pub mod context;
pub mod dataselect;
pub mod error;
pub mod event;
pub mod initialized;
pub mod log;
pub mod meta;
pub mod namespace;
pub mod podinfo;
pub mod registry;
pub mod release;
pub mod resource;
pub mod resource_map;
pub mod runtime;
pub mod server;
pub mod setup;
pub mod shutdown;
pub mod verber;

pub use self::admin::AdminArgs;
pub use self::api::{Api, ApiMetrics, ApiSettings};
pub use self::cache::IndexerCache;
pub use self::client::ClientArgs;
pub use self::cluster::{Cluster, ClusterMeta, Clusters};
pub use self::context::{Identity, RequestContext};
pub use self::error::Error;
pub use self::log::{LogFilter, LogFormat, LogInitError};
pub use self::namespace::NamespaceQuery;
pub use self::registry::Registry;
pub use self::runtime::Runtime;
pub use self::server::ServerArgs;
