//! kview kubehub: the Kubernetes-backed [`ResourceBackend`].
//!
//! Known kinds map to fixed API resources. CRD-backed kinds resolve through their definition's
//! preferred version. Apply uses server-side apply with field manager `kview`.

#![forbid(unsafe_code)]

use std::time::Instant;

use anyhow::Result;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams},
    core::{ApiResource, DynamicObject, GroupVersionKind, TypeMeta},
    discovery::{Discovery, Scope},
    Client,
};
use kview_core::backend::parse_manifest;
use kview_core::{
    api_version_of, kind_of, name_of, namespace_of, split_api_version, AppliedRef, ApplyOutcome, KviewError,
    KviewResult, OperationType, ResourceBackend, ResourceKind,
};
use metrics::histogram;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info};

pub const FIELD_MANAGER: &str = "kview";

/// Name of the current kubeconfig context, used as the default cluster id.
pub fn current_context() -> Option<String> {
    kube::config::Kubeconfig::read().ok().and_then(|k| k.current_context)
}

pub struct KubeBackend {
    client: Client,
    discovery: OnceCell<Discovery>,
}

impl KubeBackend {
    pub fn new(client: Client) -> Self {
        Self { client, discovery: OnceCell::new() }
    }

    /// Connect with the ambient kubeconfig or in-cluster config.
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await?;
        info!("kube client ready");
        Ok(Self::new(client))
    }

    async fn discovery(&self) -> kube::Result<&Discovery> {
        let started = Instant::now();
        let d = self
            .discovery
            .get_or_try_init(|| async { Discovery::new(self.client.clone()).run().await })
            .await?;
        histogram!("discovery_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(d)
    }

    /// Look a GVK up in discovery. A miss in the cached view triggers one fresh run, for kinds
    /// registered after the cache was filled. A kind the server does not serve is a rejection.
    async fn find_api_resource(&self, gvk: &GroupVersionKind) -> KviewResult<(ApiResource, bool)> {
        if let Some(hit) = lookup(self.discovery().await.map_err(discovery_error)?, gvk) {
            return Ok(hit);
        }
        let fresh = Discovery::new(self.client.clone()).run().await.map_err(discovery_error)?;
        lookup(&fresh, gvk).ok_or_else(|| {
            KviewError::apply(format!("GVK not found: {}/{}/{}", gvk.group, gvk.version, gvk.kind))
        })
    }

    /// API resource and scope for a kind.
    async fn resolve(&self, kind: &ResourceKind) -> KviewResult<(ApiResource, bool)> {
        match kind {
            ResourceKind::Known(k) => {
                let gvk = GroupVersionKind::gvk(k.group(), k.version(), k.kind_name());
                Ok((ApiResource::from_gvk_with_plural(&gvk, k.resource()), k.namespaced()))
            }
            ResourceKind::Custom { crd_name } => {
                let doc = self.fetch_crd(crd_name).await?;
                let crd = kview_schema::CrdSchema::from_document(&doc).map_err(KviewError::internal)?;
                let version = crd
                    .preferred_version()
                    .ok_or_else(|| KviewError::Internal(format!("crd {} declares no versions", crd_name)))?;
                let gvk = GroupVersionKind::gvk(&crd.group, &version.name, &crd.kind);
                Ok((ApiResource::from_gvk_with_plural(&gvk, &crd.plural), crd.namespaced()))
            }
        }
    }

    fn api(&self, ar: &ApiResource, namespaced: bool, namespace: Option<&str>, listing: bool) -> Api<DynamicObject> {
        match (namespaced, namespace) {
            (true, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, ar),
            (true, None) if !listing => Api::default_namespaced_with(self.client.clone(), ar),
            _ => Api::all_with(self.client.clone(), ar),
        }
    }
}

fn lookup(discovery: &Discovery, gvk: &GroupVersionKind) -> Option<(ApiResource, bool)> {
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            if ar.group == gvk.group && ar.version == gvk.version && ar.kind == gvk.kind {
                return Some((ar, matches!(caps.scope, Scope::Namespaced)));
            }
        }
    }
    None
}

/// Serialize an object for callers, filling type info list responses omit.
fn to_document(mut obj: DynamicObject, ar: &ApiResource) -> KviewResult<Value> {
    if obj.types.is_none() {
        obj.types = Some(TypeMeta { api_version: ar.api_version.clone(), kind: ar.kind.clone() });
    }
    let mut v = serde_json::to_value(&obj).map_err(|e| KviewError::Internal(e.to_string()))?;
    strip_managed_fields(&mut v);
    Ok(v)
}

fn strip_managed_fields(v: &mut Value) {
    if let Some(meta) = v.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        meta.remove("managedFields");
    }
}

/// Reads: 404 is `NotFound`, everything else means the cluster could not answer.
fn read_error(e: kube::Error, what: &str) -> KviewError {
    match e {
        kube::Error::Api(ae) if ae.code == 404 => KviewError::NotFound(what.to_string()),
        kube::Error::Api(ae) => KviewError::Unavailable(ae.message),
        other => KviewError::Unavailable(other.to_string()),
    }
}

/// Writes: the API server's message is the rejection reason, verbatim.
fn write_error(e: kube::Error, what: &str) -> KviewError {
    match e {
        kube::Error::Api(ae) if ae.code == 404 => KviewError::NotFound(what.to_string()),
        kube::Error::Api(ae) => KviewError::apply(ae.message),
        other => KviewError::Unavailable(other.to_string()),
    }
}

/// Discovery: the server's own answer rejects the manifest; failing to reach it does not.
fn discovery_error(e: kube::Error) -> KviewError {
    match e {
        kube::Error::Api(ae) => KviewError::apply(ae.message),
        other => KviewError::Unavailable(other.to_string()),
    }
}

#[async_trait::async_trait]
impl ResourceBackend for KubeBackend {
    async fn fetch_resource(&self, kind: &ResourceKind, name: &str, namespace: Option<&str>) -> KviewResult<Value> {
        let (ar, namespaced) = self.resolve(kind).await?;
        let what = format!("{} {}", kind, name);
        let obj = self
            .api(&ar, namespaced, namespace, false)
            .get_opt(name)
            .await
            .map_err(|e| read_error(e, &what))?
            .ok_or(KviewError::NotFound(what))?;
        to_document(obj, &ar)
    }

    async fn fetch_list(&self, kind: &ResourceKind, namespace: Option<&str>) -> KviewResult<Vec<Value>> {
        let started = Instant::now();
        let (ar, namespaced) = self.resolve(kind).await?;
        let list = self
            .api(&ar, namespaced, namespace, true)
            .list(&ListParams::default())
            .await
            .map_err(|e| read_error(e, &kind.to_string()))?;
        let docs = list.items.into_iter().map(|o| to_document(o, &ar)).collect::<KviewResult<Vec<_>>>()?;
        histogram!("list_ms", started.elapsed().as_secs_f64() * 1000.0);
        debug!(kind = %kind, ns = ?namespace, count = docs.len(), "listed");
        Ok(docs)
    }

    async fn fetch_crd(&self, crd_name: &str) -> KviewResult<Value> {
        let api: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        let what = format!("crd {}", crd_name);
        let crd = api.get_opt(crd_name).await.map_err(|e| read_error(e, &what))?.ok_or(KviewError::NotFound(what))?;
        serde_json::to_value(&crd).map_err(|e| KviewError::Internal(e.to_string()))
    }

    async fn apply_manifest(&self, cluster_id: &str, yaml: &str) -> KviewResult<ApplyOutcome> {
        let json = parse_manifest(yaml).map_err(|e| KviewError::apply(format!("parsing YAML: {}", e)))?;
        let (group, version) = split_api_version(api_version_of(&json));
        let gvk = GroupVersionKind::gvk(group, version, kind_of(&json));
        let name = name_of(&json).to_string();
        let namespace = namespace_of(&json).map(str::to_string);
        if name.is_empty() {
            return Err(KviewError::apply("YAML missing metadata.name"));
        }

        let (ar, namespaced) = self.find_api_resource(&gvk).await?;
        let api = self.api(&ar, namespaced, namespace.as_deref(), false);
        let what = format!("{} {}", gvk.kind, name);

        let live = api.get_opt(&name).await.map_err(|e| write_error(e, &what))?;
        let previous_yaml = match live {
            Some(obj) => {
                let doc = to_document(obj, &ar)?;
                Some(serde_yaml::to_string(&doc).map_err(|e| KviewError::Internal(e.to_string()))?)
            }
            None => None,
        };

        let pp = PatchParams::apply(FIELD_MANAGER);
        let applied = api.patch(&name, &pp, &Patch::Apply(&json)).await.map_err(|e| write_error(e, &what))?;
        let operation = if previous_yaml.is_some() { OperationType::Update } else { OperationType::Create };
        info!(
            cluster = %cluster_id,
            kind = %gvk.kind,
            name = %name,
            ns = ?namespace,
            op = operation.as_str(),
            rv = ?applied.metadata.resource_version,
            "server-side apply"
        );
        Ok(ApplyOutcome {
            target: AppliedRef {
                kind: gvk.kind.clone(),
                name,
                namespace: applied.metadata.namespace.clone().or(namespace),
            },
            api_group: (!gvk.group.is_empty()).then(|| gvk.group.clone()),
            api_version: Some(gvk.version.clone()),
            operation,
            previous_yaml,
        })
    }

    async fn delete_resource(
        &self,
        cluster_id: &str,
        kind: &ResourceKind,
        name: &str,
        namespace: Option<&str>,
    ) -> KviewResult<Value> {
        let (ar, namespaced) = self.resolve(kind).await?;
        let api = self.api(&ar, namespaced, namespace, false);
        let what = format!("{} {}", kind, name);
        let last = api.get_opt(name).await.map_err(|e| write_error(e, &what))?.ok_or_else(|| KviewError::NotFound(what.clone()))?;
        api.delete(name, &DeleteParams::default()).await.map_err(|e| write_error(e, &what))?;
        info!(cluster = %cluster_id, kind = %kind, name, ns = ?namespace, "deleted");
        to_document(last, &ar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_err(code: u16, message: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: message.into(),
            reason: "Invalid".into(),
            code,
        })
    }

    #[test]
    fn read_errors_distinguish_missing_from_unreachable() {
        assert_eq!(read_error(api_err(404, "nope"), "pods web"), KviewError::NotFound("pods web".into()));
        assert_eq!(read_error(api_err(403, "forbidden"), "pods web"), KviewError::Unavailable("forbidden".into()));
    }

    #[test]
    fn write_errors_carry_the_server_message() {
        let msg = "admission webhook \"validate.kyverno.svc\" denied the request";
        assert_eq!(write_error(api_err(400, msg), "x"), KviewError::apply(msg));
        assert!(matches!(write_error(api_err(404, "gone"), "x"), KviewError::NotFound(_)));
    }

    #[test]
    fn unreachable_discovery_is_not_a_rejection() {
        let transport = kube::Error::Service("tcp connect error: connection refused".into());
        assert!(matches!(discovery_error(transport), KviewError::Unavailable(m) if m.contains("connection refused")));
        assert_eq!(discovery_error(api_err(403, "forbidden")), KviewError::apply("forbidden"));
    }

    #[test]
    fn list_items_get_type_info() {
        let gvk = GroupVersionKind::gvk("apps", "v1", "Deployment");
        let ar = ApiResource::from_gvk_with_plural(&gvk, "deployments");
        let mut obj = DynamicObject::new("web", &ar).within("prod");
        obj.types = None;
        obj.metadata.managed_fields = Some(vec![Default::default()]);
        let doc = to_document(obj, &ar).unwrap();
        assert_eq!(doc["apiVersion"], "apps/v1");
        assert_eq!(doc["kind"], "Deployment");
        assert_eq!(doc["metadata"]["namespace"], "prod");
        assert!(doc["metadata"].get("managedFields").is_none());
    }
}
