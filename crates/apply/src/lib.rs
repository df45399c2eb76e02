//! kview apply: create-or-update and delete with an audit record for every attempt.
//!
//! The remote call and the history write form one unit. Once a non-empty manifest reaches the engine
//! exactly one [`HistoryEntry`] is written, whether the backend accepted it, rejected it, or the
//! manifest never left the process.

#![forbid(unsafe_code)]

pub mod diff;
pub mod manifest;

use std::sync::Arc;

use kview_core::{
    extract, AppliedRef, ApplyOutcome, KviewError, KviewResult, OperationType, ResourceBackend,
    ResourceKind,
};
use kview_persist::{now_ms, HistoryEntry, HistoryStore, ObjectKey};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub use diff::{diff_entry, diff_summary, strip_noisy, DiffSummary};
pub use manifest::{inspect, ManifestTarget, UNKNOWN_KIND};

/// Who performed a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    pub id: String,
    pub name: String,
}

impl Operator {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into() }
    }

    /// `KVIEW_OPERATOR_ID` / `KVIEW_OPERATOR_NAME`, falling back to the login user.
    pub fn from_env() -> Self {
        let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
        Self {
            id: std::env::var("KVIEW_OPERATOR_ID").unwrap_or_else(|_| user.clone()),
            name: std::env::var("KVIEW_OPERATOR_NAME").unwrap_or(user),
        }
    }
}

pub struct ApplyEngine {
    backend: Arc<dyn ResourceBackend>,
    history: Arc<dyn HistoryStore>,
    operator: Operator,
}

/// Everything the finalizer needs to write one entry.
struct Attempt<'a> {
    cluster_id: &'a str,
    target: ManifestTarget,
    operation: OperationType,
    resource_yaml: String,
    previous_yaml: Option<String>,
}

impl ApplyEngine {
    pub fn new(backend: Arc<dyn ResourceBackend>, history: Arc<dyn HistoryStore>, operator: Operator) -> Self {
        Self { backend, history, operator }
    }

    pub fn operator(&self) -> &Operator {
        &self.operator
    }

    /// Create or update the object described by `manifest`.
    pub async fn apply(&self, cluster_id: &str, manifest: &str) -> KviewResult<AppliedRef> {
        if manifest.trim().is_empty() {
            return Err(KviewError::EmptyInput);
        }
        let t0 = std::time::Instant::now();
        counter!("apply_attempts", 1u64);

        let (target, verdict) = manifest::inspect(manifest);
        let result = match verdict {
            Ok(_) => self.backend.apply_manifest(cluster_id, manifest).await,
            Err(e) => Err(KviewError::apply(format!("{:#}", e))),
        };

        let attempt = match &result {
            Ok(outcome) => Attempt {
                cluster_id,
                target: target_of_outcome(outcome),
                operation: outcome.operation,
                resource_yaml: manifest.to_string(),
                previous_yaml: self.previous_yaml(cluster_id, outcome),
            },
            Err(_) => Attempt {
                cluster_id,
                target,
                operation: OperationType::Apply,
                resource_yaml: manifest.to_string(),
                previous_yaml: None,
            },
        };
        let result = result.map(|o| o.target);
        let out = self.finalize(attempt, result);
        histogram!("apply_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        out
    }

    /// Delete one object. Recorded with `operation_type = delete` and the removed state as
    /// `previous_yaml`.
    pub async fn delete(
        &self,
        cluster_id: &str,
        kind: &ResourceKind,
        name: &str,
        namespace: Option<&str>,
    ) -> KviewResult<AppliedRef> {
        if name.trim().is_empty() {
            return Err(KviewError::EmptyInput);
        }
        let t0 = std::time::Instant::now();
        counter!("apply_attempts", 1u64);

        let mut target = self.delete_target(kind, name, namespace).await;
        let result = self.backend.delete_resource(cluster_id, kind, name, namespace).await;
        let previous_yaml = match &result {
            Ok(last) => {
                refine_from_document(&mut target, last);
                serde_yaml::to_string(&strip_noisy(last.clone())).ok()
            }
            Err(_) => None,
        };
        let attempt = Attempt {
            cluster_id,
            resource_yaml: reference_yaml(&target),
            target,
            operation: OperationType::Delete,
            previous_yaml,
        };
        let result = result.map(|_| AppliedRef {
            kind: attempt.target.kind.clone(),
            name: name.to_string(),
            namespace: namespace.map(str::to_string),
        });
        let out = self.finalize(attempt, result);
        histogram!("apply_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        out
    }

    /// Prior state for an update: the last successful revision we recorded, else what the backend saw.
    /// A recorded delete ends the chain; the object may have been recreated elsewhere since.
    fn previous_yaml(&self, cluster_id: &str, outcome: &ApplyOutcome) -> Option<String> {
        if outcome.operation != OperationType::Update {
            return None;
        }
        let key = ObjectKey {
            cluster_id,
            api_group: outcome.api_group.as_deref(),
            resource_type: &outcome.target.kind,
            namespace: outcome.target.namespace.as_deref(),
            name: &outcome.target.name,
        };
        match self.history.latest_success(key) {
            Ok(Some(prev)) => Some(prev.resource_yaml),
            Ok(None) => outcome.previous_yaml.clone(),
            Err(e) => {
                warn!(error = %e, name = %outcome.target.name, "history lookup failed; using backend prior state");
                outcome.previous_yaml.clone()
            }
        }
    }

    async fn delete_target(&self, kind: &ResourceKind, name: &str, namespace: Option<&str>) -> ManifestTarget {
        let mut t = ManifestTarget {
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: namespace.map(str::to_string),
            api_group: None,
            api_version: None,
        };
        match kind {
            ResourceKind::Known(k) => {
                t.kind = k.kind_name().to_string();
                t.api_group = (!k.group().is_empty()).then(|| k.group().to_string());
                t.api_version = Some(k.version().to_string());
            }
            ResourceKind::Custom { crd_name } => match self.backend.fetch_crd(crd_name).await {
                Ok(crd) => {
                    let text = |p: &str| extract(&crd, p).and_then(|v| v.as_str()).map(str::to_string);
                    if let Some(k) = text("spec.names.kind") {
                        t.kind = k;
                    }
                    t.api_group = text("spec.group");
                    t.api_version = text("spec.versions.0.name");
                }
                Err(e) => debug!(crd = %crd_name, error = %e, "crd lookup for delete target failed"),
            },
        }
        t
    }

    /// Write the history entry for an attempt and settle the caller-visible result.
    fn finalize(&self, attempt: Attempt<'_>, result: KviewResult<AppliedRef>) -> KviewResult<AppliedRef> {
        let (success, error_message) = match &result {
            Ok(_) => (true, None),
            Err(KviewError::Apply { reason }) => (false, Some(reason.clone())),
            Err(e) => (false, Some(e.to_string())),
        };
        let entry = HistoryEntry {
            id: Uuid::new_v4().to_string(),
            cluster_id: attempt.cluster_id.to_string(),
            resource_type: attempt.target.kind,
            resource_name: attempt.target.name,
            namespace: attempt.target.namespace,
            api_group: attempt.target.api_group,
            api_version: attempt.target.api_version,
            operation_type: attempt.operation,
            success,
            error_message,
            operator_id: self.operator.id.clone(),
            operator_name: self.operator.name.clone(),
            created_at: now_ms(),
            resource_yaml: attempt.resource_yaml,
            previous_yaml: attempt.previous_yaml,
        };
        let recorded = self.history.record(&entry);

        match (result, recorded) {
            (Ok(applied), Ok(())) => {
                counter!("apply_ok", 1u64);
                info!(
                    cluster = %entry.cluster_id,
                    kind = %entry.resource_type,
                    name = %entry.resource_name,
                    op = entry.operation_type.as_str(),
                    id = %entry.id,
                    "mutation applied"
                );
                Ok(applied)
            }
            (Ok(_), Err(e)) => {
                counter!("apply_err", 1u64);
                error!(error = %e, kind = %entry.resource_type, name = %entry.resource_name, "mutation applied but history write failed");
                Err(KviewError::internal(e.context("recording history")))
            }
            (Err(err), recorded) => {
                counter!("apply_err", 1u64);
                if let Err(e) = recorded {
                    error!(error = %e, "history write failed for rejected mutation");
                }
                warn!(
                    kind = %entry.resource_type,
                    name = %entry.resource_name,
                    op = entry.operation_type.as_str(),
                    error = %err,
                    "mutation failed"
                );
                Err(err)
            }
        }
    }
}

fn target_of_outcome(o: &ApplyOutcome) -> ManifestTarget {
    ManifestTarget {
        kind: o.target.kind.clone(),
        name: o.target.name.clone(),
        namespace: o.target.namespace.clone(),
        api_group: o.api_group.clone(),
        api_version: o.api_version.clone(),
    }
}

fn refine_from_document(t: &mut ManifestTarget, doc: &Json) {
    if let Some(k) = doc.get("kind").and_then(|v| v.as_str()) {
        t.kind = k.to_string();
    }
    if let Some(av) = doc.get("apiVersion").and_then(|v| v.as_str()) {
        let (g, v) = kview_core::split_api_version(av);
        t.api_group = (!g.is_empty()).then(|| g.to_string());
        t.api_version = Some(v.to_string());
    }
}

/// Minimal manifest naming the object a delete targeted.
fn reference_yaml(t: &ManifestTarget) -> String {
    let api_version = match (&t.api_group, &t.api_version) {
        (Some(g), Some(v)) => format!("{}/{}", g, v),
        (None, Some(v)) => v.clone(),
        (Some(g), None) => g.clone(),
        (None, None) => String::new(),
    };
    let mut meta = serde_json::Map::new();
    meta.insert("name".into(), Json::String(t.name.clone()));
    if let Some(ns) = &t.namespace {
        meta.insert("namespace".into(), Json::String(ns.clone()));
    }
    let doc = serde_json::json!({ "apiVersion": api_version, "kind": t.kind, "metadata": meta });
    serde_yaml::to_string(&doc).unwrap_or_default()
}
