//! Secrets
//!
//! Secret values never leave the service; detail views carry only the keys.

use super::ListRequest;
use crate::{
    cluster::ClusterMeta,
    context::RequestContext,
    dataselect::{Describe, Properties, Property},
    meta::{ListResponse, ObjectMeta, TypeMeta},
    Error,
};
use k8s_openapi::api::core::v1::Secret;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretView {
    pub object_meta: ObjectMeta,
    pub type_meta: TypeMeta,
    #[serde(rename = "type")]
    pub type_: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretDetail {
    #[serde(flatten)]
    pub secret: SecretView,
    pub keys: Vec<String>,
}

impl SecretView {
    pub fn new(secret: &Secret, cluster: &ClusterMeta) -> Self {
        Self {
            object_meta: ObjectMeta::new(&secret.metadata, cluster),
            type_meta: TypeMeta::of::<Secret>(),
            type_: secret
                .type_
                .clone()
                .unwrap_or_else(|| "Opaque".to_string()),
        }
    }
}

impl Describe for SecretView {
    fn describe(&self) -> Properties {
        Properties::of_meta(&self.object_meta).with(Property::Type, self.type_.as_str())
    }
}

pub async fn list(
    ctx: &RequestContext,
    req: &ListRequest,
) -> Result<ListResponse<SecretView>, Error> {
    let channels = ctx.channels(req.namespaces.clone());
    let secrets = channels.open::<Secret>();
    let secrets = secrets.recv().await?;
    channels.close().await;

    let cluster = ctx.cluster_meta();
    let rows = secrets.iter().map(|s| SecretView::new(s, cluster));
    Ok(ListResponse::new(req.query.select(rows)))
}

pub fn get(ctx: &RequestContext, namespace: &str, name: &str) -> Result<SecretDetail, Error> {
    ctx.authorize_namespace(namespace)?;
    let secret = ctx.cache().get::<Secret>(Some(namespace), name)?;
    let mut keys = secret
        .data
        .iter()
        .flatten()
        .map(|(k, _)| k.clone())
        .chain(secret.string_data.iter().flatten().map(|(k, _)| k.clone()))
        .collect::<Vec<_>>();
    keys.sort();
    keys.dedup();
    Ok(SecretDetail {
        secret: SecretView::new(&secret, ctx.cluster_meta()),
        keys,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cache::Writers, resource::fixtures::*};
    use k8s_openapi::ByteString;
    use maplit::btreemap;

    #[tokio::test]
    async fn detail_withholds_values() {
        let mut writers = Writers::default();
        writers.apply(Secret {
            metadata: meta("ns", "creds"),
            data: Some(btreemap! {
                "password".to_string() => ByteString(b"hunter2".to_vec()),
                "user".to_string() => ByteString(b"admin".to_vec()),
            }),
            ..Default::default()
        });
        let ctx = admin_context(&writers);

        let detail = get(&ctx, "ns", "creds").unwrap();
        assert_eq!(detail.keys, ["password", "user"]);
        let json = serde_json::to_string(&detail).unwrap();
        assert!(!json.contains("hunter2"));
        assert_eq!(detail.secret.type_, "Opaque");
    }
}
