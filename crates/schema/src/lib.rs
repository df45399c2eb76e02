//! kview schema: read CRD documents, extract printer columns and resolve table columns.
//!
//! Known kinds get their declarative column set from `kview_core::columns`. CRD-backed kinds get a
//! name column followed by the CRD's printer columns, taken from the first declared version only.

#![forbid(unsafe_code)]

use std::collections::HashSet;

use anyhow::{anyhow, Context, Result};
use kview_core::columns::{known_columns, name_column};
use kview_core::status::{classify_condition, conditions_of};
use kview_core::{CellSource, ColumnSpec, ConditionState, KviewError, KviewResult, ResourceBackend, ResourceKind, ValueType};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One entry of `additionalPrinterColumns`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterColumnDecl {
    pub name: String,
    #[serde(default)]
    pub json_path: String,
    #[serde(rename = "type", default)]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrdScope {
    Namespaced,
    Cluster,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrdVersion {
    pub name: String,
    #[serde(default)]
    pub served: bool,
    #[serde(default)]
    pub storage: bool,
    #[serde(default, rename = "additionalPrinterColumns")]
    pub printer_columns: Vec<PrinterColumnDecl>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct CrdNames {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    plural: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CrdSpec {
    #[serde(default)]
    group: String,
    #[serde(default)]
    names: CrdNames,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    versions: Vec<CrdVersion>,
}

#[derive(Debug, Clone, Deserialize)]
struct CrdDoc {
    spec: CrdSpec,
}

/// The parts of a CRD the presentation engine needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrdSchema {
    pub name: String,
    pub group: String,
    pub kind: String,
    pub plural: String,
    pub scope: CrdScope,
    pub versions: Vec<CrdVersion>,
    /// `Established` condition.
    pub established: ConditionState,
}

impl CrdSchema {
    pub fn from_document(doc: &serde_json::Value) -> Result<Self> {
        let name = kview_core::name_of(doc);
        if name.is_empty() {
            return Err(anyhow!("CRD document missing metadata.name"));
        }
        let parsed: CrdDoc = serde_json::from_value(doc.clone()).with_context(|| format!("parsing CRD {}", name))?;
        let scope = match parsed.spec.scope.as_deref() {
            Some("Cluster") => CrdScope::Cluster,
            _ => CrdScope::Namespaced,
        };
        Ok(Self {
            name: name.to_string(),
            group: parsed.spec.group,
            kind: parsed.spec.names.kind,
            plural: parsed.spec.names.plural,
            scope,
            versions: parsed.spec.versions,
            established: classify_condition(conditions_of(doc), "Established"),
        })
    }

    /// CRDs may declare several versions; the first declared one drives the table.
    pub fn first_version(&self) -> Option<&CrdVersion> {
        self.versions.first()
    }

    /// Version used when talking to the API server: storage, else first served, else first.
    pub fn preferred_version(&self) -> Option<&CrdVersion> {
        self.versions
            .iter()
            .find(|v| v.storage)
            .or_else(|| self.versions.iter().find(|v| v.served))
            .or_else(|| self.versions.first())
    }

    pub fn printer_columns(&self) -> &[PrinterColumnDecl] {
        self.first_version().map(|v| v.printer_columns.as_slice()).unwrap_or(&[])
    }

    pub fn namespaced(&self) -> bool {
        self.scope == CrdScope::Namespaced
    }
}

/// Columns for instances of `schema`: the name column, then one column per printer column in
/// declared order.
pub fn crd_columns(schema: &CrdSchema) -> Vec<ColumnSpec> {
    let decls = schema.printer_columns();
    let mut cols = Vec::with_capacity(decls.len() + 1);
    let name = name_column();
    let mut seen: HashSet<String> = HashSet::new();
    seen.insert(name.id.clone());
    cols.push(name);
    for decl in decls {
        let field_path = kview_core::normalize_path(&decl.json_path);
        let base = if field_path.is_empty() { decl.name.clone() } else { field_path.clone() };
        let mut id = base.clone();
        let mut n = 2;
        while !seen.insert(id.clone()) {
            id = format!("{}#{}", base, n);
            n += 1;
        }
        cols.push(ColumnSpec {
            id,
            header: decl.name.clone(),
            field_path,
            value_type: ValueType::from_printer_type(&decl.type_),
            source: CellSource::Field,
        });
    }
    cols
}

/// Resolve the table columns for `kind`. CRD fetch failures propagate; no columns are invented.
pub async fn resolve_columns(backend: &dyn ResourceBackend, kind: &ResourceKind) -> KviewResult<Vec<ColumnSpec>> {
    match kind {
        ResourceKind::Known(k) => Ok(known_columns(*k)),
        ResourceKind::Custom { crd_name } => {
            let schema = fetch_crd_schema(backend, crd_name).await?;
            let cols = crd_columns(&schema);
            debug!(crd = %crd_name, columns = cols.len(), "resolved CRD columns");
            Ok(cols)
        }
    }
}

pub async fn fetch_crd_schema(backend: &dyn ResourceBackend, crd_name: &str) -> KviewResult<CrdSchema> {
    let doc = backend.fetch_crd(crd_name).await?;
    CrdSchema::from_document(&doc).map_err(KviewError::internal)
}

// Feature-gated JSON Schema validation of manifests against a CRD's openAPIV3Schema.
#[cfg(feature = "jsonschema-validate")]
pub mod validate {
    use anyhow::{Context, Result};
    use jsonschema::{Draft, JSONSchema};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ValidationIssue {
        pub path: String,
        pub error: String,
        pub hint: Option<String>,
    }

    /// `openAPIV3Schema` of the version named `version`, else of the first declared version.
    pub fn openapi_schema<'a>(crd: &'a serde_json::Value, version: Option<&str>) -> Option<&'a serde_json::Value> {
        let versions = crd.pointer("/spec/versions").and_then(|v| v.as_array())?;
        let ver = version
            .and_then(|want| versions.iter().find(|v| v.get("name").and_then(|n| n.as_str()) == Some(want)))
            .or_else(|| versions.first())?;
        ver.pointer("/schema/openAPIV3Schema")
    }

    /// Validate manifest text against the CRD. Returns human-friendly issues; empty on success.
    pub fn validate_yaml(crd: &serde_json::Value, yaml: &str) -> Result<Vec<ValidationIssue>> {
        let json: serde_json::Value = match serde_yaml::from_str::<serde_yaml::Value>(yaml) {
            Ok(v) => serde_json::to_value(v).context("converting YAML to JSON")?,
            Err(e) => {
                return Ok(vec![ValidationIssue {
                    path: "".into(),
                    error: format!("YAML parse error: {}", e),
                    hint: Some("check indentation and syntax".into()),
                }])
            }
        };
        let version = json
            .get("apiVersion")
            .and_then(|v| v.as_str())
            .map(|av| kview_core::split_api_version(av).1);
        let Some(schema) = openapi_schema(crd, version).cloned() else {
            return Ok(vec![ValidationIssue { path: "".into(), error: "CRD declares no openAPIV3Schema".into(), hint: None }]);
        };
        // JSONSchema 0.17 wants a 'static schema; leaking is acceptable for CLI usage.
        let schema_static: &'static serde_json::Value = Box::leak(Box::new(schema));
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(schema_static)
            .map_err(|e| anyhow::anyhow!("compiling CRD JSON Schema: {}", e))?;
        let mut issues: Vec<ValidationIssue> = Vec::new();
        if let Err(errors) = compiled.validate(&json) {
            for err in errors {
                let path = err.instance_path.to_string();
                let error = err.to_string();
                let hint = if error.contains("required property") {
                    Some("missing required field".into())
                } else if error.contains("type:") || error.contains("expected type") {
                    Some("mismatched type".into())
                } else if error.contains("enum") {
                    Some("value not in allowed set".into())
                } else {
                    None
                };
                issues.push(ValidationIssue { path, error, hint });
            }
        }
        Ok(issues)
    }
}
