//! Column model and built-in column sets for known kinds.
//!
//! This module provides:
//! - A runtime column description (`ColumnSpec`) shared by known and CRD-backed kinds
//! - Declarative column sets for known kinds
//! - Derived cell values for columns that are not a single field path (ready ratios, ports, ...)

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::kind::{KnownKind, ResourceKind};
use crate::path::{extract, extract_count};
use crate::status::{conditions_of, readiness, readiness_rule, replica_counts, ReadinessRule};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Date,
    Boolean,
    Other,
}

impl ValueType {
    /// Map a printer column `type`. Unrecognized types render as plain text.
    pub fn from_printer_type(t: &str) -> Self {
        match t.trim().to_ascii_lowercase().as_str() {
            "string" => ValueType::String,
            "date" => ValueType::Date,
            "boolean" => ValueType::Boolean,
            _ => ValueType::Other,
        }
    }
}

/// Values of known-kind columns that need more than one field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Derived {
    /// `ready/total` containers.
    PodReady,
    /// Pod reason, else phase.
    PodStatus,
    PodRestarts,
    /// `ready/desired` using the kind's replica fields.
    ReplicaRatio,
    /// Output of the status classifier.
    Readiness,
    /// `succeeded/completions`.
    JobCompletions,
    /// Complete / Failed / Active (n).
    JobStatus,
    ServicePorts,
    ExternalIps,
    IngressHosts,
    /// Number of keys under `data` (plus `binaryData` for config maps).
    DataCount,
    NodeRoles,
    /// `spec.group/versions[0].name`.
    CrdVersion,
}

/// Where a cell gets its value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellSource {
    /// Object name, linked to its detail route.
    NameLink,
    /// Value at `field_path`.
    Field,
    Derived(Derived),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Unique within one table.
    pub id: String,
    pub header: String,
    /// Dotted path, no leading `.`; empty for derived columns.
    pub field_path: String,
    pub value_type: ValueType,
    pub source: CellSource,
}

impl ColumnSpec {
    pub fn field(id: &str, header: &str, field_path: &str, value_type: ValueType) -> Self {
        Self {
            id: id.to_string(),
            header: header.to_string(),
            field_path: field_path.to_string(),
            value_type,
            source: CellSource::Field,
        }
    }

    pub fn derived(id: &str, header: &str, d: Derived) -> Self {
        Self {
            id: id.to_string(),
            header: header.to_string(),
            field_path: String::new(),
            value_type: ValueType::String,
            source: CellSource::Derived(d),
        }
    }
}

/// The mandatory first column of every table.
pub fn name_column() -> ColumnSpec {
    ColumnSpec {
        id: "name".to_string(),
        header: "Name".to_string(),
        field_path: "metadata.name".to_string(),
        value_type: ValueType::String,
        source: CellSource::NameLink,
    }
}

pub fn namespace_column() -> ColumnSpec {
    ColumnSpec::field("namespace", "Namespace", "metadata.namespace", ValueType::String)
}

pub fn age_column() -> ColumnSpec {
    ColumnSpec::field("age", "Age", "metadata.creationTimestamp", ValueType::Date)
}

/// Full column set for a known kind: Name, Namespace (namespaced kinds), kind columns, Age.
pub fn known_columns(kind: KnownKind) -> Vec<ColumnSpec> {
    use ColumnSpec as C;
    use ValueType::*;

    let mut cols = vec![name_column()];
    if kind.namespaced() {
        cols.push(namespace_column());
    }
    match kind {
        KnownKind::Pods => {
            cols.push(C::derived("ready", "Ready", Derived::PodReady));
            cols.push(C::derived("status", "Status", Derived::PodStatus));
            cols.push(C::derived("restarts", "Restarts", Derived::PodRestarts));
            cols.push(C::field("spec.nodeName", "Node", "spec.nodeName", String));
            cols.push(C::field("status.podIP", "IP", "status.podIP", String));
        }
        KnownKind::Deployments | KnownKind::StatefulSets | KnownKind::ReplicaSets => {
            cols.push(C::derived("ready", "Ready", Derived::ReplicaRatio));
            cols.push(C::derived("state", "State", Derived::Readiness));
            if kind == KnownKind::Deployments {
                cols.push(C::field("status.updatedReplicas", "Up-to-date", "status.updatedReplicas", Other));
                cols.push(C::field("status.availableReplicas", "Available", "status.availableReplicas", Other));
            }
        }
        KnownKind::DaemonSets => {
            cols.push(C::field("status.desiredNumberScheduled", "Desired", "status.desiredNumberScheduled", Other));
            cols.push(C::field("status.currentNumberScheduled", "Current", "status.currentNumberScheduled", Other));
            cols.push(C::field("status.numberReady", "Ready", "status.numberReady", Other));
            cols.push(C::field("status.numberAvailable", "Available", "status.numberAvailable", Other));
            cols.push(C::derived("state", "State", Derived::Readiness));
        }
        KnownKind::Jobs => {
            cols.push(C::derived("completions", "Completions", Derived::JobCompletions));
            cols.push(C::derived("status", "Status", Derived::JobStatus));
        }
        KnownKind::CronJobs => {
            cols.push(C::field("spec.schedule", "Schedule", "spec.schedule", String));
            cols.push(C::field("spec.suspend", "Suspend", "spec.suspend", Boolean));
            cols.push(C::field("status.lastScheduleTime", "Last Schedule", "status.lastScheduleTime", Date));
        }
        KnownKind::Services => {
            cols.push(C::field("spec.type", "Type", "spec.type", String));
            cols.push(C::field("spec.clusterIP", "Cluster IP", "spec.clusterIP", String));
            cols.push(C::derived("external_ip", "External IP", Derived::ExternalIps));
            cols.push(C::derived("ports", "Ports", Derived::ServicePorts));
        }
        KnownKind::Ingresses => {
            cols.push(C::field("spec.ingressClassName", "Class", "spec.ingressClassName", String));
            cols.push(C::derived("hosts", "Hosts", Derived::IngressHosts));
            cols.push(C::derived("address", "Address", Derived::ExternalIps));
        }
        KnownKind::ConfigMaps => {
            cols.push(C::derived("data", "Data", Derived::DataCount));
        }
        KnownKind::Secrets => {
            cols.push(C::field("type", "Type", "type", String));
            cols.push(C::derived("data", "Data", Derived::DataCount));
        }
        KnownKind::PersistentVolumeClaims => {
            cols.push(C::field("status.phase", "Status", "status.phase", String));
            cols.push(C::field("spec.volumeName", "Volume", "spec.volumeName", String));
            cols.push(C::field("status.capacity.storage", "Capacity", "status.capacity.storage", String));
            cols.push(C::field("spec.accessModes", "Access Modes", "spec.accessModes", Other));
            cols.push(C::field("spec.storageClassName", "StorageClass", "spec.storageClassName", String));
        }
        KnownKind::Namespaces => {
            cols.push(C::field("status.phase", "Status", "status.phase", String));
        }
        KnownKind::Nodes => {
            cols.push(C::derived("state", "Status", Derived::Readiness));
            cols.push(C::derived("roles", "Roles", Derived::NodeRoles));
            cols.push(C::field("status.nodeInfo.kubeletVersion", "Version", "status.nodeInfo.kubeletVersion", String));
        }
        KnownKind::CustomResourceDefinitions => {
            cols.push(C::field("spec.names.kind", "Kind", "spec.names.kind", String));
            cols.push(C::derived("version", "Version", Derived::CrdVersion));
            cols.push(C::field("spec.scope", "Scope", "spec.scope", String));
            cols.push(C::derived("state", "Established", Derived::Readiness));
        }
    }
    cols.push(age_column());
    cols
}

fn str_at<'a>(raw: &'a Value, path: &str) -> Option<&'a str> {
    extract(raw, path).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}

/// Compute a derived cell. `None` renders as the placeholder.
pub fn derive(d: Derived, kind: &ResourceKind, raw: &Value) -> Option<String> {
    match d {
        Derived::PodReady => {
            let cs = extract(raw, "status.containerStatuses").and_then(|v| v.as_array());
            let total = cs.map(|c| c.len()).unwrap_or(0);
            let ready = cs
                .map(|c| c.iter().filter(|s| s.get("ready").and_then(|v| v.as_bool()).unwrap_or(false)).count())
                .unwrap_or(0);
            Some(format!("{}/{}", ready, total))
        }
        Derived::PodStatus => str_at(raw, "status.reason").or_else(|| str_at(raw, "status.phase")).map(str::to_string),
        Derived::PodRestarts => {
            let restarts: u64 = extract(raw, "status.containerStatuses")
                .and_then(|v| v.as_array())
                .map(|cs| cs.iter().map(|c| c.get("restartCount").and_then(|v| v.as_u64()).unwrap_or(0)).sum())
                .unwrap_or(0);
            Some(restarts.to_string())
        }
        Derived::ReplicaRatio => match kind.known().and_then(readiness_rule) {
            Some(ReadinessRule::Replicas(fields)) => {
                let (desired, ready) = replica_counts(raw, &fields);
                Some(format!("{}/{}", ready, desired))
            }
            _ => None,
        },
        Derived::Readiness => Some(readiness(kind, raw).to_string()),
        Derived::JobCompletions => {
            let desired = match extract(raw, "spec.completions") {
                Some(_) => extract_count(raw, "spec.completions"),
                None => 1,
            };
            Some(format!("{}/{}", extract_count(raw, "status.succeeded"), desired))
        }
        Derived::JobStatus => {
            let mut status: Option<String> = None;
            for c in conditions_of(raw) {
                if c.type_ == "Complete" && c.status == "True" {
                    status = Some("Complete".into());
                    break;
                }
                if c.type_ == "Failed" && c.status == "True" {
                    status = Some("Failed".into());
                }
            }
            status.or_else(|| {
                let active = extract_count(raw, "status.active");
                (active > 0).then(|| format!("Active ({})", active))
            })
        }
        Derived::ServicePorts => {
            let ports = extract(raw, "spec.ports").and_then(|v| v.as_array())?;
            let v: Vec<String> = ports
                .iter()
                .map(|p| {
                    let port = p.get("port").and_then(|v| v.as_u64()).unwrap_or(0);
                    let proto = p.get("protocol").and_then(|v| v.as_str()).unwrap_or("TCP");
                    match p.get("nodePort").and_then(|v| v.as_u64()) {
                        Some(node) => format!("{}:{}/{}", port, node, proto),
                        None => format!("{}/{}", port, proto),
                    }
                })
                .collect();
            (!v.is_empty()).then(|| v.join(","))
        }
        Derived::ExternalIps => {
            // spec.externalIPs first, else load balancer ingress
            let mut eps: Vec<String> = extract(raw, "spec.externalIPs")
                .and_then(|v| v.as_array())
                .map(|a| a.iter().filter_map(|s| s.as_str().map(str::to_string)).collect())
                .unwrap_or_default();
            if eps.is_empty() {
                if let Some(arr) = extract(raw, "status.loadBalancer.ingress").and_then(|v| v.as_array()) {
                    for it in arr {
                        if let Some(ip) = it.get("ip").and_then(|v| v.as_str()) {
                            eps.push(ip.to_string());
                        } else if let Some(h) = it.get("hostname").and_then(|v| v.as_str()) {
                            eps.push(h.to_string());
                        }
                    }
                }
            }
            (!eps.is_empty()).then(|| eps.join(","))
        }
        Derived::IngressHosts => {
            let rules = extract(raw, "spec.rules").and_then(|v| v.as_array())?;
            let hosts: Vec<&str> = rules.iter().filter_map(|r| r.get("host").and_then(|v| v.as_str())).collect();
            (!hosts.is_empty()).then(|| hosts.join(","))
        }
        Derived::DataCount => {
            let count = |p: &str| extract(raw, p).and_then(|v| v.as_object()).map(|m| m.len()).unwrap_or(0);
            Some((count("data") + count("binaryData")).to_string())
        }
        Derived::NodeRoles => {
            let mut roles: Vec<String> = Vec::new();
            if let Some(lbls) = extract(raw, "metadata.labels").and_then(|v| v.as_object()) {
                for k in lbls.keys() {
                    if let Some(role) = k.strip_prefix("node-role.kubernetes.io/") {
                        roles.push(if role.is_empty() { "node".into() } else { role.to_string() });
                    }
                }
                if roles.is_empty() {
                    if let Some(r) = lbls.get("kubernetes.io/role").and_then(|v| v.as_str()) {
                        roles.push(r.to_string());
                    }
                }
            }
            if roles.is_empty() {
                roles.push("none".into());
            }
            Some(roles.join(","))
        }
        Derived::CrdVersion => {
            let version = str_at(raw, "spec.versions.0.name")?;
            match str_at(raw, "spec.group") {
                Some(g) => Some(format!("{}/{}", g, version)),
                None => Some(version.to_string()),
            }
        }
    }
}
