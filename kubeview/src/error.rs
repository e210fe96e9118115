//! Request-facing errors
//!
//! Every failure that reaches a caller is classified into one of a small set
//! of stable kinds. The kind determines the HTTP status and the `kind` token
//! in the JSON error body.

use hyper::StatusCode;

/// Describes why a request could not be answered
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The entity is missing from the cache or the upstream API
    #[error("{0} not found")]
    NotFound(String),

    /// Visibility or authorization rules deny the request
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The request is malformed or violates an admission rule
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The target already exists
    #[error("conflict: {0}")]
    Conflict(String),

    /// The target exists but is not in a usable state yet
    #[error("resource not ready: {0}")]
    ResourceNotReady(String),

    /// The cluster's informer caches have not completed their initial sync
    #[error("caches for cluster {0} are not synced")]
    ServiceUnavailable(String),

    /// A transient upstream failure or an expired request deadline
    #[error("upstream timeout: {0}")]
    UpstreamTimeout(String),

    /// The request was cancelled before it completed
    #[error("request cancelled")]
    Cancelled,

    /// Anything else
    #[error("internal error: {0}")]
    Internal(String),
}

/// The message etcd returns when a write could not be committed in time
pub(crate) const ETCD_TIMEOUT: &str = "etcdserver: request timed out";

// === impl Error ===

impl Error {
    /// Builds a [`Error::NotFound`] for a namespaced or cluster-scoped entity
    pub fn not_found(kind: &str, namespace: Option<&str>, name: &str) -> Self {
        match namespace {
            Some(ns) => Self::NotFound(format!("{kind} {ns}/{name}")),
            None => Self::NotFound(format!("{kind} {name}")),
        }
    }

    /// Returns the stable token naming this error's kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not-found",
            Self::Forbidden(_) => "forbidden",
            Self::BadRequest(_) => "bad-request",
            Self::Conflict(_) => "conflict",
            Self::ResourceNotReady(_) => "resource-not-ready",
            Self::ServiceUnavailable(_) => "service-unavailable",
            Self::UpstreamTimeout(_) => "upstream-timeout",
            Self::Cancelled => "request-cancelled",
            Self::Internal(_) => "internal",
        }
    }

    /// Returns the HTTP status used when this error is returned to a caller
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::ResourceNotReady(_) | Self::ServiceUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            // Client closed request.
            Self::Cancelled => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::REQUEST_TIMEOUT)
            }
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns true if the error is a transient etcd commit timeout
    pub fn is_etcd_timeout(&self) -> bool {
        matches!(self, Self::UpstreamTimeout(msg) if msg.contains(ETCD_TIMEOUT))
    }

    /// Renders the JSON body returned to callers
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "kind": self.kind(),
            "message": self.to_string(),
        })
    }
}

impl From<kube_client::Error> for Error {
    fn from(error: kube_client::Error) -> Self {
        match error {
            kube_client::Error::Api(rsp) => {
                if rsp.message.contains(ETCD_TIMEOUT) {
                    return Self::UpstreamTimeout(rsp.message);
                }
                match StatusCode::from_u16(rsp.code).ok() {
                    Some(StatusCode::NOT_FOUND) => Self::NotFound(rsp.message),
                    Some(StatusCode::FORBIDDEN) | Some(StatusCode::UNAUTHORIZED) => {
                        Self::Forbidden(rsp.message)
                    }
                    Some(StatusCode::CONFLICT) => Self::Conflict(rsp.message),
                    Some(StatusCode::BAD_REQUEST) | Some(StatusCode::UNPROCESSABLE_ENTITY) => {
                        Self::BadRequest(rsp.message)
                    }
                    Some(StatusCode::GATEWAY_TIMEOUT) | Some(StatusCode::REQUEST_TIMEOUT) => {
                        Self::UpstreamTimeout(rsp.message)
                    }
                    Some(StatusCode::SERVICE_UNAVAILABLE) => Self::ResourceNotReady(rsp.message),
                    _ => Self::Internal(rsp.message),
                }
            }
            error => {
                let message = error.to_string();
                if message.contains(ETCD_TIMEOUT) {
                    Self::UpstreamTimeout(message)
                } else {
                    Self::Internal(message)
                }
            }
        }
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::UpstreamTimeout("request deadline exceeded".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube_core::ErrorResponse;

    fn api_error(code: u16, message: &str) -> kube_client::Error {
        kube_client::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: message.to_string(),
            reason: String::new(),
            code,
        })
    }

    #[test]
    fn classifies_api_errors() {
        assert_eq!(
            Error::from(api_error(404, "pods \"x\" not found")).kind(),
            "not-found"
        );
        assert_eq!(Error::from(api_error(403, "denied")).kind(), "forbidden");
        assert_eq!(
            Error::from(api_error(409, "already exists")).kind(),
            "conflict"
        );
        assert_eq!(Error::from(api_error(422, "invalid")).kind(), "bad-request");
        assert_eq!(Error::from(api_error(500, "boom")).kind(), "internal");
    }

    #[test]
    fn etcd_timeouts_are_upstream_timeouts() {
        let err = Error::from(api_error(500, "etcdserver: request timed out"));
        assert!(err.is_etcd_timeout());
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn cancelled_uses_client_closed_status() {
        assert_eq!(Error::Cancelled.status().as_u16(), 499);
        assert_eq!(Error::Cancelled.kind(), "request-cancelled");
    }
}
