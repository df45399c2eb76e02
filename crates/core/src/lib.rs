//! kview core types: resource documents, kinds, columns, readiness and the backend contract.

#![forbid(unsafe_code)]

pub mod backend;
pub mod cells;
pub mod columns;
pub mod error;
pub mod kind;
pub mod path;
pub mod status;

use chrono::{DateTime, Utc};

pub use backend::{AppliedRef, ApplyOutcome, MemoryBackend, OperationType, ResourceBackend};
pub use cells::{render_cell, render_row, Cell, DateStyle, RenderCtx, PLACEHOLDER};
pub use columns::{known_columns, name_column, CellSource, ColumnSpec, Derived, ValueType};
pub use error::{KviewError, KviewResult};
pub use kind::{KnownKind, ResourceKind};
pub use path::{extract, normalize_path, scalar_text};
pub use status::{classify, classify_condition, readiness, ConditionState, Readiness, ReadinessState};

/// One Kubernetes-style object. Key order follows the source manifest.
pub type ResourceDocument = serde_json::Value;

pub mod prelude {
    pub use super::{
        extract, known_columns, readiness, render_cell, Cell, ColumnSpec, KnownKind, KviewError, KviewResult,
        Readiness, ResourceBackend, ResourceDocument, ResourceKind, ValueType,
    };
}

/// `metadata.name`, or "" when missing.
pub fn name_of(doc: &ResourceDocument) -> &str {
    doc.pointer("/metadata/name").and_then(|v| v.as_str()).unwrap_or("")
}

/// `metadata.namespace`; `None` for cluster-scoped objects.
pub fn namespace_of(doc: &ResourceDocument) -> Option<&str> {
    doc.pointer("/metadata/namespace").and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}

pub fn kind_of(doc: &ResourceDocument) -> &str {
    doc.get("kind").and_then(|v| v.as_str()).unwrap_or("")
}

pub fn api_version_of(doc: &ResourceDocument) -> &str {
    doc.get("apiVersion").and_then(|v| v.as_str()).unwrap_or("")
}

/// Split `apiVersion` into `(group, version)`; the core group is "".
pub fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((g, v)) => (g, v),
        None => ("", api_version),
    }
}

/// Label pairs in document order. Non-string values are skipped.
pub fn labels_of(doc: &ResourceDocument) -> impl Iterator<Item = (&str, &str)> {
    doc.pointer("/metadata/labels")
        .and_then(|v| v.as_object())
        .into_iter()
        .flat_map(|m| m.iter())
        .filter_map(|(k, v)| v.as_str().map(|s| (k.as_str(), s)))
}

pub fn creation_time(doc: &ResourceDocument) -> Option<DateTime<Utc>> {
    doc.pointer("/metadata/creationTimestamp")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_helpers_tolerate_missing_fields() {
        let doc = serde_json::json!({ "kind": "ConfigMap" });
        assert_eq!(name_of(&doc), "");
        assert_eq!(namespace_of(&doc), None);
        assert_eq!(labels_of(&doc).count(), 0);
        assert!(creation_time(&doc).is_none());
    }

    #[test]
    fn labels_keep_document_order() {
        let doc = serde_json::json!({
            "metadata": { "name": "x", "labels": { "zeta": "1", "alpha": "2", "n": 3 } }
        });
        let pairs: Vec<_> = labels_of(&doc).collect();
        assert_eq!(pairs, vec![("zeta", "1"), ("alpha", "2")]);
    }

    #[test]
    fn split_api_version_handles_core_group() {
        assert_eq!(split_api_version("v1"), ("", "v1"));
        assert_eq!(split_api_version("apps/v1"), ("apps", "v1"));
    }
}
