//! Tenant-scoped namespace visibility

use crate::{context::Identity, Error};
use ahash::AHashSet;

/// A predicate over resource namespaces
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum NamespaceQuery {
    /// Matches every namespace
    #[default]
    All,

    /// Matches only the given namespaces
    Only(AHashSet<String>),
}

/// The namespace parameters of a list request
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NamespaceParams {
    pub namespace: Option<String>,
    pub all_namespaces: bool,
}

// === impl NamespaceQuery ===

impl NamespaceQuery {
    /// Builds a query matching a single namespace
    pub fn one(ns: impl Into<String>) -> Self {
        Self::Only(std::iter::once(ns.into()).collect())
    }

    /// Resolves the namespaces a caller may list
    ///
    /// A non-admin caller asking for all namespaces is rejected before anything is read.
    pub fn from_request(params: &NamespaceParams, identity: &Identity) -> Result<Self, Error> {
        if params.all_namespaces {
            if identity.admin {
                return Ok(Self::All);
            }
            return Err(Error::Forbidden(format!(
                "user {} may not list all namespaces",
                identity.user
            )));
        }

        let ns = match params.namespace.as_deref().filter(|ns| !ns.is_empty()) {
            Some(ns) => ns,
            None => identity.default_namespace.as_str(),
        };
        identity.authorize_namespace(ns)?;
        Ok(Self::one(ns))
    }

    /// Returns true if the namespace is visible
    ///
    /// Cluster-scoped entities (with no namespace) are always visible.
    pub fn matches(&self, ns: Option<&str>) -> bool {
        match (self, ns) {
            (Self::All, _) | (_, None) => true,
            (Self::Only(set), Some(ns)) => set.contains(ns),
        }
    }

    /// Returns the namespace to pass to upstream APIs: empty for all, or the single namespace
    pub fn to_request_param(&self) -> &str {
        match self {
            Self::Only(set) if set.len() == 1 => {
                set.iter().next().map(String::as_str).unwrap_or("")
            }
            _ => "",
        }
    }

    /// Returns true if the query matches every namespace
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }
}
