//! Kind-agnostic mutations
//!
//! The [`Verber`] routes create, update and delete requests to the upstream API by resource
//! plural, using a dynamic client so that one code path serves every kind in the
//! [`resource_map`](crate::resource_map). Namespaced writes require the caller to own the
//! namespace; cluster-scoped writes require an administrator.

use crate::{
    context::{Identity, RequestContext},
    resource_map::{self, ResourceInfo},
    Error,
};
use kube_client::{
    api::{DeleteParams, PostParams},
    Api, Client,
};
use kube_core::DynamicObject;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// A request-scoped dynamic client
#[derive(Clone)]
pub struct Verber {
    client: Client,
    identity: Identity,
}

/// The outcome of applying one manifest
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Applied {
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
    pub action: ApplyAction,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyAction {
    Created,
    Updated,
}

/// Namespace token that would address every namespace; rejected in manifests
const ALL_NAMESPACES: &str = "_all";

// === impl Verber ===

impl Verber {
    pub fn new(client: Client, identity: Identity) -> Self {
        Self { client, identity }
    }

    pub fn for_request(ctx: &RequestContext) -> Self {
        Self::new(ctx.cluster().client(), ctx.identity().clone())
    }

    /// Builds a dynamic API handle after checking that the caller may write there
    fn api(
        &self,
        info: &ResourceInfo,
        namespace: Option<&str>,
    ) -> Result<Api<DynamicObject>, Error> {
        let ar = info.api_resource();
        if !info.namespaced {
            self.identity.require_admin()?;
            return Ok(Api::all_with(self.client.clone(), &ar));
        }
        let ns = namespace
            .filter(|ns| !ns.is_empty())
            .ok_or_else(|| Error::BadRequest(format!("{} are namespaced", info.plural)))?;
        if ns == ALL_NAMESPACES {
            return Err(Error::BadRequest(format!(
                "namespace {ALL_NAMESPACES} is not a valid target"
            )));
        }
        self.identity.authorize_namespace(ns)?;
        Ok(Api::namespaced_with(self.client.clone(), ns, &ar))
    }

    pub async fn get(
        &self,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<DynamicObject, Error> {
        let info = resource_map::lookup(kind)?;
        let api = self.api(info, namespace)?;
        Ok(api.get(name).await?)
    }

    pub async fn create(
        &self,
        kind: &str,
        namespace: Option<&str>,
        body: serde_json::Value,
    ) -> Result<DynamicObject, Error> {
        let info = resource_map::lookup(kind)?;
        let api = self.api(info, namespace)?;
        let obj = into_object(info, body)?;
        let created = api.create(&PostParams::default(), &obj).await?;
        info!(kind = info.plural, name = ?created.metadata.name, "created");
        Ok(created)
    }

    /// Replaces an object, carrying over the live resource version when the body has none
    pub async fn update(
        &self,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
        body: serde_json::Value,
    ) -> Result<DynamicObject, Error> {
        let info = resource_map::lookup(kind)?;
        let api = self.api(info, namespace)?;
        let mut obj = into_object(info, body)?;
        match obj.metadata.name.as_deref() {
            Some(n) if n != name => {
                return Err(Error::BadRequest(format!(
                    "body names {n:?} but the request names {name:?}"
                )));
            }
            Some(_) => {}
            None => obj.metadata.name = Some(name.to_string()),
        }
        if obj.metadata.resource_version.is_none() {
            let live = api.get(name).await?;
            obj.metadata.resource_version = live.metadata.resource_version;
        }
        let updated = api.replace(name, &PostParams::default(), &obj).await?;
        info!(kind = info.plural, name, "updated");
        Ok(updated)
    }

    /// Deletes an object, letting the garbage collector remove its dependents in the background
    pub async fn delete(
        &self,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), Error> {
        let info = resource_map::lookup(kind)?;
        let api = self.api(info, namespace)?;
        api.delete(name, &DeleteParams::background()).await?;
        info!(kind = info.plural, name, "deleted");
        Ok(())
    }

    /// Creates or updates every manifest in a multi-document YAML stream
    ///
    /// Each manifest targets its own namespace or, when it has none, `default_namespace`. An
    /// existing object is replaced when `upgrade` is set and is a conflict otherwise. Manifests are
    /// applied in order and the first failure stops the stream.
    pub async fn apply(
        &self,
        yaml: &str,
        default_namespace: &str,
        upgrade: bool,
    ) -> Result<Vec<Applied>, Error> {
        let mut applied = Vec::new();
        for doc in serde_yaml::Deserializer::from_str(yaml) {
            let value = serde_json::Value::deserialize(doc)
                .map_err(|e| Error::BadRequest(format!("invalid manifest: {e}")))?;
            if value.is_null() {
                continue;
            }
            applied.push(self.apply_one(value, default_namespace, upgrade).await?);
        }
        Ok(applied)
    }

    async fn apply_one(
        &self,
        value: serde_json::Value,
        default_namespace: &str,
        upgrade: bool,
    ) -> Result<Applied, Error> {
        let field = |name: &str| {
            value
                .get(name)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| Error::BadRequest(format!("manifest is missing {name}")))
        };
        let info = resource_map::lookup_kind(&field("apiVersion")?, &field("kind")?)?;
        let mut obj = into_object(info, value)?;
        let name = obj
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::BadRequest("manifest is missing metadata.name".to_string()))?;

        let namespace = if info.namespaced {
            let ns = obj
                .metadata
                .namespace
                .clone()
                .unwrap_or_else(|| default_namespace.to_string());
            obj.metadata.namespace = Some(ns.clone());
            Some(ns)
        } else {
            None
        };
        let api = self.api(info, namespace.as_deref())?;

        let action = match api.get_opt(&name).await? {
            Some(live) if upgrade => {
                obj.metadata.resource_version = live.metadata.resource_version;
                api.replace(&name, &PostParams::default(), &obj).await?;
                ApplyAction::Updated
            }
            Some(_) => {
                return Err(Error::Conflict(format!(
                    "{} {} already exists",
                    info.kind, name
                )));
            }
            None => {
                api.create(&PostParams::default(), &obj).await?;
                ApplyAction::Created
            }
        };
        debug!(kind = info.plural, ?namespace, %name, ?action, "applied");
        Ok(Applied {
            kind: info.kind.to_string(),
            namespace,
            name,
            action,
        })
    }
}

impl std::fmt::Debug for Verber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verber")
            .field("user", &self.identity.user)
            .finish()
    }
}

/// Parses a request body as an object of the given kind, filling in its type metadata
fn into_object(info: &ResourceInfo, mut body: serde_json::Value) -> Result<DynamicObject, Error> {
    let map = body
        .as_object_mut()
        .ok_or_else(|| Error::BadRequest("body must be an object".to_string()))?;
    map.entry("apiVersion")
        .or_insert_with(|| info.api_version().into());
    map.entry("kind").or_insert_with(|| info.kind.into());
    serde_json::from_value(body)
        .map_err(|e| Error::BadRequest(format!("invalid {}: {e}", info.kind)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::{Method, Request, Response, StatusCode};
    use kube_client::client::Body;
    use tower_test::mock::{self, Handle};

    type MockHandle = Handle<Request<Body>, Response<Body>>;

    fn verber(identity: Identity) -> (Verber, MockHandle) {
        let (svc, handle) = mock::pair::<Request<Body>, Response<Body>>();
        let client = Client::new(svc, "default");
        (Verber::new(client, identity), handle)
    }

    fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Body> {
        Response::builder()
            .status(status)
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }

    fn not_found() -> Response<Body> {
        json_response(
            StatusCode::NOT_FOUND,
            serde_json::json!({
                "kind": "Status",
                "apiVersion": "v1",
                "status": "Failure",
                "message": "not found",
                "reason": "NotFound",
                "code": 404,
            }),
        )
    }

    fn configmap(name: &str, rv: &str) -> serde_json::Value {
        serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": name, "namespace": "alice", "resourceVersion": rv },
        })
    }

    /// Answers the next request, asserting its method and path
    async fn expect(handle: &mut MockHandle, method: Method, path: &str, rsp: Response<Body>) {
        let (req, send) = handle.next_request().await.expect("service not called");
        assert_eq!(req.method(), method);
        assert_eq!(req.uri().path(), path);
        send.send_response(rsp);
    }

    #[tokio::test]
    async fn applies_documents_in_order() {
        let (verber, mut handle) = verber(Identity::tenant("alice", "alice"));
        let server = tokio::spawn(async move {
            let path = "/api/v1/namespaces/alice/configmaps";
            let one = format!("{path}/one");
            let two = format!("{path}/two");
            let ok = |name: &str, rv: &str| json_response(StatusCode::OK, configmap(name, rv));
            let created = json_response(StatusCode::CREATED, configmap("one", "1"));
            expect(&mut handle, Method::GET, &one, not_found()).await;
            expect(&mut handle, Method::POST, path, created).await;
            expect(&mut handle, Method::GET, &two, ok("two", "4")).await;
            expect(&mut handle, Method::PUT, &two, ok("two", "5")).await;
        });

        let yaml = "\
apiVersion: v1
kind: ConfigMap
metadata:
  name: one
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: two
  namespace: alice
";
        let applied = verber.apply(yaml, "alice", true).await.unwrap();
        server.await.unwrap();
        assert_eq!(
            applied.iter().map(|a| a.action).collect::<Vec<_>>(),
            [ApplyAction::Created, ApplyAction::Updated]
        );
    }

    #[tokio::test]
    async fn existing_objects_conflict_without_upgrade() {
        let (verber, mut handle) = verber(Identity::tenant("alice", "alice"));
        let server = tokio::spawn(async move {
            expect(
                &mut handle,
                Method::GET,
                "/api/v1/namespaces/alice/configmaps/one",
                json_response(StatusCode::OK, configmap("one", "1")),
            )
            .await;
        });
        let yaml = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: one\n";
        let err = verber.apply(yaml, "alice", false).await.unwrap_err();
        server.await.unwrap();
        assert_eq!(err.kind(), "conflict");
    }

    #[tokio::test]
    async fn rejects_writes_outside_owned_namespaces() {
        let (verber, _handle) = verber(Identity::tenant("alice", "alice"));
        let yaml = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: one\n  namespace: _all\n";
        assert_eq!(verber.apply(yaml, "alice", true).await.unwrap_err().kind(), "bad-request");

        let err = verber.delete("k8s_configmaps", Some("bob"), "one").await.unwrap_err();
        assert_eq!(err.kind(), "forbidden");

        let err = verber.delete("namespaces", None, "alice").await.unwrap_err();
        assert_eq!(err.kind(), "forbidden");
    }

    #[tokio::test]
    async fn deletes_in_the_background() {
        let (verber, mut handle) = verber(Identity::admin("root"));
        let server = tokio::spawn(async move {
            let (req, send) = handle.next_request().await.expect("service not called");
            assert_eq!(req.method(), Method::DELETE);
            assert_eq!(req.uri().path(), "/apis/apps/v1/namespaces/bob/deployments/web");
            send.send_response(json_response(
                StatusCode::OK,
                serde_json::json!({
                    "kind": "Status",
                    "apiVersion": "v1",
                    "status": "Success",
                    "code": 200,
                }),
            ));
        });
        verber.delete("deploy", Some("bob"), "web").await.unwrap();
        server.await.unwrap();
    }
}
