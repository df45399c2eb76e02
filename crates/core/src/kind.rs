//! Resource kinds: a fixed set of known kinds, plus kinds backed by a CustomResourceDefinition.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KnownKind {
    Pods,
    Deployments,
    StatefulSets,
    DaemonSets,
    ReplicaSets,
    Jobs,
    CronJobs,
    Services,
    Ingresses,
    ConfigMaps,
    Secrets,
    PersistentVolumeClaims,
    Namespaces,
    Nodes,
    CustomResourceDefinitions,
}

struct KindInfo {
    plural: &'static str,
    kind: &'static str,
    group: &'static str,
    version: &'static str,
    namespaced: bool,
}

const fn info(plural: &'static str, kind: &'static str, group: &'static str, version: &'static str, namespaced: bool) -> KindInfo {
    KindInfo { plural, kind, group, version, namespaced }
}

impl KnownKind {
    pub const ALL: [KnownKind; 15] = [
        KnownKind::Pods,
        KnownKind::Deployments,
        KnownKind::StatefulSets,
        KnownKind::DaemonSets,
        KnownKind::ReplicaSets,
        KnownKind::Jobs,
        KnownKind::CronJobs,
        KnownKind::Services,
        KnownKind::Ingresses,
        KnownKind::ConfigMaps,
        KnownKind::Secrets,
        KnownKind::PersistentVolumeClaims,
        KnownKind::Namespaces,
        KnownKind::Nodes,
        KnownKind::CustomResourceDefinitions,
    ];

    fn info(self) -> KindInfo {
        match self {
            KnownKind::Pods => info("pods", "Pod", "", "v1", true),
            KnownKind::Deployments => info("deployments", "Deployment", "apps", "v1", true),
            KnownKind::StatefulSets => info("statefulsets", "StatefulSet", "apps", "v1", true),
            KnownKind::DaemonSets => info("daemonsets", "DaemonSet", "apps", "v1", true),
            KnownKind::ReplicaSets => info("replicasets", "ReplicaSet", "apps", "v1", true),
            KnownKind::Jobs => info("jobs", "Job", "batch", "v1", true),
            KnownKind::CronJobs => info("cronjobs", "CronJob", "batch", "v1", true),
            KnownKind::Services => info("services", "Service", "", "v1", true),
            KnownKind::Ingresses => info("ingresses", "Ingress", "networking.k8s.io", "v1", true),
            KnownKind::ConfigMaps => info("configmaps", "ConfigMap", "", "v1", true),
            KnownKind::Secrets => info("secrets", "Secret", "", "v1", true),
            KnownKind::PersistentVolumeClaims => info("persistentvolumeclaims", "PersistentVolumeClaim", "", "v1", true),
            KnownKind::Namespaces => info("namespaces", "Namespace", "", "v1", false),
            KnownKind::Nodes => info("nodes", "Node", "", "v1", false),
            KnownKind::CustomResourceDefinitions => {
                info("crds", "CustomResourceDefinition", "apiextensions.k8s.io", "v1", false)
            }
        }
    }

    /// Route segment, e.g. `deployments`. CRDs route under `crds`.
    pub fn plural(self) -> &'static str { self.info().plural }
    /// Resource name on the API server; equals [`plural`](Self::plural) except for CRDs.
    pub fn resource(self) -> &'static str {
        match self {
            KnownKind::CustomResourceDefinitions => "customresourcedefinitions",
            other => other.plural(),
        }
    }
    /// Object `kind` as it appears in manifests.
    pub fn kind_name(self) -> &'static str { self.info().kind }
    pub fn group(self) -> &'static str { self.info().group }
    pub fn version(self) -> &'static str { self.info().version }
    pub fn namespaced(self) -> bool { self.info().namespaced }

    pub fn api_version(self) -> String {
        let i = self.info();
        if i.group.is_empty() { i.version.to_string() } else { format!("{}/{}", i.group, i.version) }
    }

    /// Lookup by route plural or manifest kind, case-insensitive.
    pub fn lookup(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower == "customresourcedefinitions" {
            return Some(KnownKind::CustomResourceDefinitions);
        }
        Self::ALL.into_iter().find(|k| {
            let i = k.info();
            i.plural == lower || i.kind.eq_ignore_ascii_case(&lower)
        })
    }

    /// Lookup by manifest `apiVersion` + `kind`.
    pub fn from_manifest(api_version: &str, kind: &str) -> Option<Self> {
        let (group, _) = crate::split_api_version(api_version);
        Self::ALL.into_iter().find(|k| k.kind_name() == kind && k.group() == group)
    }
}

/// The kind a table or lookup is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Known(KnownKind),
    /// Instances of a CRD, addressed by the CRD name (`widgets.example.com`).
    Custom { crd_name: String },
}

impl ResourceKind {
    /// Known plural or kind name first; anything else is taken as a CRD name.
    pub fn parse(s: &str) -> Self {
        match KnownKind::lookup(s.trim()) {
            Some(k) => ResourceKind::Known(k),
            None => ResourceKind::Custom { crd_name: s.trim().to_string() },
        }
    }

    pub fn known(&self) -> Option<KnownKind> {
        match self {
            ResourceKind::Known(k) => Some(*k),
            ResourceKind::Custom { .. } => None,
        }
    }

    pub fn crd_name(&self) -> Option<&str> {
        match self {
            ResourceKind::Known(_) => None,
            ResourceKind::Custom { crd_name } => Some(crd_name),
        }
    }

    /// Detail route for one object of this kind.
    pub fn detail_path(&self, namespace: Option<&str>, name: &str) -> String {
        let ns = namespace.filter(|n| !n.is_empty());
        match (self, ns) {
            (ResourceKind::Known(k), Some(ns)) if k.namespaced() => format!("/{}/{}/{}", k.plural(), ns, name),
            (ResourceKind::Known(k), _) => format!("/{}/{}", k.plural(), name),
            (ResourceKind::Custom { crd_name }, Some(ns)) => format!("/crds/{}/{}/{}", crd_name, ns, name),
            (ResourceKind::Custom { crd_name }, None) => format!("/crds/{}/{}", crd_name, name),
        }
    }
}

impl From<KnownKind> for ResourceKind {
    fn from(k: KnownKind) -> Self { ResourceKind::Known(k) }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Known(k) => f.write_str(k.plural()),
            ResourceKind::Custom { crd_name } => f.write_str(crd_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_prefers_known_kinds() {
        assert_eq!(ResourceKind::parse("deployments"), ResourceKind::Known(KnownKind::Deployments));
        assert_eq!(ResourceKind::parse("Deployment"), ResourceKind::Known(KnownKind::Deployments));
        assert_eq!(ResourceKind::parse("customresourcedefinitions"), ResourceKind::Known(KnownKind::CustomResourceDefinitions));
        assert_eq!(
            ResourceKind::parse("widgets.example.com"),
            ResourceKind::Custom { crd_name: "widgets.example.com".into() }
        );
    }

    #[test]
    fn detail_paths_follow_scope() {
        let deps = ResourceKind::Known(KnownKind::Deployments);
        assert_eq!(deps.detail_path(Some("prod"), "web"), "/deployments/prod/web");
        let nodes = ResourceKind::Known(KnownKind::Nodes);
        assert_eq!(nodes.detail_path(None, "node-1"), "/nodes/node-1");
        // a stray namespace on a cluster-scoped kind is ignored
        assert_eq!(nodes.detail_path(Some("x"), "node-1"), "/nodes/node-1");
        let widgets = ResourceKind::parse("widgets.example.com");
        assert_eq!(widgets.detail_path(Some("default"), "w1"), "/crds/widgets.example.com/default/w1");
        assert_eq!(widgets.detail_path(None, "w1"), "/crds/widgets.example.com/w1");
    }

    #[test]
    fn manifest_lookup_matches_group() {
        assert_eq!(KnownKind::from_manifest("apps/v1", "Deployment"), Some(KnownKind::Deployments));
        assert_eq!(KnownKind::from_manifest("v1", "Deployment"), None);
        assert_eq!(KnownKind::from_manifest("v1", "ConfigMap"), Some(KnownKind::ConfigMaps));
        assert_eq!(KnownKind::Ingresses.api_version(), "networking.k8s.io/v1");
        assert_eq!(KnownKind::CustomResourceDefinitions.resource(), "customresourcedefinitions");
        assert_eq!(KnownKind::Pods.resource(), "pods");
    }
}
