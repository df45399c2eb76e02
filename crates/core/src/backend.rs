//! Resource Backend contract and an in-memory implementation.
//!
//! The backend owns transport and atomicity: `apply_manifest` is one create-or-update call and the
//! caller never performs a separate existence check.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{KviewError, KviewResult};
use crate::kind::{KnownKind, ResourceKind};
use crate::{api_version_of, kind_of, name_of, namespace_of, split_api_version};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Create,
    Update,
    Delete,
    Apply,
}

impl OperationType {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationType::Create => "create",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
            OperationType::Apply => "apply",
        }
    }
}

impl FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "create" => Ok(OperationType::Create),
            "update" => Ok(OperationType::Update),
            "delete" => Ok(OperationType::Delete),
            "apply" => Ok(OperationType::Apply),
            other => Err(format!("unknown operation type: {}", other)),
        }
    }
}

/// Identity of an applied object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedRef {
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub target: AppliedRef,
    pub api_group: Option<String>,
    pub api_version: Option<String>,
    /// `Create` when the object did not exist before the call.
    pub operation: OperationType,
    /// Serialized state before the call, for updates.
    pub previous_yaml: Option<String>,
}

#[async_trait::async_trait]
pub trait ResourceBackend: Send + Sync {
    async fn fetch_resource(&self, kind: &ResourceKind, name: &str, namespace: Option<&str>) -> KviewResult<Value>;

    async fn fetch_list(&self, kind: &ResourceKind, namespace: Option<&str>) -> KviewResult<Vec<Value>>;

    /// Fetch a CustomResourceDefinition by name (`widgets.example.com`).
    async fn fetch_crd(&self, crd_name: &str) -> KviewResult<Value>;

    /// Atomic create-or-update with declarative merge semantics.
    async fn apply_manifest(&self, cluster_id: &str, yaml: &str) -> KviewResult<ApplyOutcome>;

    /// Delete one object; returns its last state.
    async fn delete_resource(
        &self,
        cluster_id: &str,
        kind: &ResourceKind,
        name: &str,
        namespace: Option<&str>,
    ) -> KviewResult<Value>;
}

/// Parse manifest text into a document.
pub fn parse_manifest(yaml: &str) -> anyhow::Result<Value> {
    let val: serde_yaml::Value = serde_yaml::from_str(yaml)?;
    Ok(serde_json::to_value(val)?)
}

/// Declarative merge: mappings merge recursively, `null` removes a key, everything else replaces.
pub fn merge_documents(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(b), Value::Object(p)) => {
            for (k, pv) in p {
                if pv.is_null() {
                    b.remove(k);
                    continue;
                }
                match b.get_mut(k) {
                    Some(bv) => merge_documents(bv, pv),
                    None => {
                        b.insert(k.clone(), pv.clone());
                    }
                }
            }
        }
        (b, p) => *b = p.clone(),
    }
}

/// In-memory backend. Objects live in insertion order; CRD-backed kinds resolve through stored
/// CustomResourceDefinition objects.
#[derive(Default)]
pub struct MemoryBackend {
    objects: Mutex<Vec<Value>>,
    apply_failure: Mutex<Option<String>>,
    unavailable: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self { Self::default() }

    pub fn with_objects(objects: impl IntoIterator<Item = Value>) -> Self {
        let me = Self::default();
        me.objects.lock().unwrap_or_else(|e| e.into_inner()).extend(objects);
        me
    }

    pub fn insert(&self, obj: Value) {
        self.objects.lock().unwrap_or_else(|e| e.into_inner()).push(obj);
    }

    /// Make every following apply fail with `reason` (`None` clears).
    pub fn set_apply_failure(&self, reason: Option<&str>) {
        *self.apply_failure.lock().unwrap_or_else(|e| e.into_inner()) = reason.map(str::to_string);
    }

    /// Simulate an unreachable cluster for reads.
    pub fn set_unavailable(&self, v: bool) {
        self.unavailable.store(v, Ordering::SeqCst);
    }

    fn check_available(&self) -> KviewResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(KviewError::Unavailable("backend unreachable".into()));
        }
        Ok(())
    }

    /// `(group, kind)` of documents belonging to `kind`.
    fn target_of(objects: &[Value], kind: &ResourceKind) -> KviewResult<(String, String)> {
        match kind {
            ResourceKind::Known(k) => Ok((k.group().to_string(), k.kind_name().to_string())),
            ResourceKind::Custom { crd_name } => {
                let crd = find_crd(objects, crd_name).ok_or_else(|| KviewError::NotFound(format!("crd {}", crd_name)))?;
                let group = crd.pointer("/spec/group").and_then(|v| v.as_str()).unwrap_or("").to_string();
                let kind = crd.pointer("/spec/names/kind").and_then(|v| v.as_str()).unwrap_or("").to_string();
                Ok((group, kind))
            }
        }
    }
}

fn find_crd<'a>(objects: &'a [Value], crd_name: &str) -> Option<&'a Value> {
    let crd_kind = KnownKind::CustomResourceDefinitions.kind_name();
    objects.iter().find(|o| kind_of(o) == crd_kind && name_of(o) == crd_name)
}

fn matches_target(obj: &Value, group: &str, kind: &str) -> bool {
    kind_of(obj) == kind && split_api_version(api_version_of(obj)).0 == group
}

fn same_object(a: &Value, b: &Value) -> bool {
    kind_of(a) == kind_of(b)
        && split_api_version(api_version_of(a)).0 == split_api_version(api_version_of(b)).0
        && name_of(a) == name_of(b)
        && namespace_of(a) == namespace_of(b)
}

#[async_trait::async_trait]
impl ResourceBackend for MemoryBackend {
    async fn fetch_resource(&self, kind: &ResourceKind, name: &str, namespace: Option<&str>) -> KviewResult<Value> {
        self.check_available()?;
        let objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        let (group, k) = Self::target_of(&objects, kind)?;
        objects
            .iter()
            .find(|o| matches_target(o, &group, &k) && name_of(o) == name && namespace_of(o) == namespace)
            .cloned()
            .ok_or_else(|| KviewError::NotFound(format!("{} {}", kind, name)))
    }

    async fn fetch_list(&self, kind: &ResourceKind, namespace: Option<&str>) -> KviewResult<Vec<Value>> {
        self.check_available()?;
        let objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        let (group, k) = Self::target_of(&objects, kind)?;
        Ok(objects
            .iter()
            .filter(|o| matches_target(o, &group, &k))
            .filter(|o| namespace.map(|ns| namespace_of(o) == Some(ns)).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn fetch_crd(&self, crd_name: &str) -> KviewResult<Value> {
        self.check_available()?;
        let objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        find_crd(&objects, crd_name).cloned().ok_or_else(|| KviewError::NotFound(format!("crd {}", crd_name)))
    }

    async fn apply_manifest(&self, cluster_id: &str, yaml: &str) -> KviewResult<ApplyOutcome> {
        if let Some(reason) = self.apply_failure.lock().unwrap_or_else(|e| e.into_inner()).clone() {
            return Err(KviewError::apply(reason));
        }
        let manifest = parse_manifest(yaml).map_err(|e| KviewError::apply(format!("parsing YAML: {}", e)))?;
        if !manifest.is_object() {
            return Err(KviewError::apply("manifest is not a mapping"));
        }
        if api_version_of(&manifest).is_empty() || kind_of(&manifest).is_empty() || name_of(&manifest).is_empty() {
            return Err(KviewError::apply("manifest requires apiVersion, kind and metadata.name"));
        }
        let (group, version) = split_api_version(api_version_of(&manifest));
        let target = AppliedRef {
            kind: kind_of(&manifest).to_string(),
            name: name_of(&manifest).to_string(),
            namespace: namespace_of(&manifest).map(str::to_string),
        };
        let (api_group, api_version) = ((!group.is_empty()).then(|| group.to_string()), Some(version.to_string()));

        let mut objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        match objects.iter_mut().find(|o| same_object(o, &manifest)) {
            Some(existing) => {
                let previous_yaml = serde_yaml::to_string(&*existing).map_err(|e| KviewError::Internal(e.to_string()))?;
                merge_documents(existing, &manifest);
                debug!(cluster = %cluster_id, kind = %target.kind, name = %target.name, "memory backend: updated");
                Ok(ApplyOutcome { target, api_group, api_version, operation: OperationType::Update, previous_yaml: Some(previous_yaml) })
            }
            None => {
                let mut obj = manifest;
                if let Some(meta) = obj.get_mut("metadata").and_then(|m| m.as_object_mut()) {
                    meta.entry("creationTimestamp")
                        .or_insert_with(|| Value::String(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)));
                }
                objects.push(obj);
                debug!(cluster = %cluster_id, kind = %target.kind, name = %target.name, "memory backend: created");
                Ok(ApplyOutcome { target, api_group, api_version, operation: OperationType::Create, previous_yaml: None })
            }
        }
    }

    async fn delete_resource(
        &self,
        cluster_id: &str,
        kind: &ResourceKind,
        name: &str,
        namespace: Option<&str>,
    ) -> KviewResult<Value> {
        if let Some(reason) = self.apply_failure.lock().unwrap_or_else(|e| e.into_inner()).clone() {
            return Err(KviewError::apply(reason));
        }
        let mut objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        let (group, k) = Self::target_of(&objects, kind)?;
        let pos = objects
            .iter()
            .position(|o| matches_target(o, &group, &k) && name_of(o) == name && namespace_of(o) == namespace)
            .ok_or_else(|| KviewError::NotFound(format!("{} {}", kind, name)))?;
        debug!(cluster = %cluster_id, kind = %kind, name, "memory backend: deleted");
        Ok(objects.remove(pos))
    }
}
