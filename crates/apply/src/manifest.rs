//! Local manifest inspection: size and complexity guards plus target identification.

use anyhow::{anyhow, Context, Result};
use kview_core::{api_version_of, kind_of, name_of, namespace_of, split_api_version};
use serde_json::Value as Json;

/// Recorded as `resource_type` when a manifest names no kind.
pub const UNKNOWN_KIND: &str = "Unknown";

pub fn max_yaml_bytes() -> usize {
    std::env::var("KVIEW_MAX_YAML_BYTES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1_048_576)
}

pub fn max_yaml_nodes() -> usize {
    std::env::var("KVIEW_MAX_YAML_NODES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(100_000)
}

/// Counts nodes up to `max` and stops early.
pub fn node_budget_exceeded(v: &Json, max: usize) -> bool {
    fn walk(v: &Json, cur: &mut usize, max: usize) {
        if *cur >= max {
            return;
        }
        *cur += 1;
        match v {
            Json::Object(map) => {
                for vv in map.values() {
                    if *cur >= max {
                        break;
                    }
                    walk(vv, cur, max);
                }
            }
            Json::Array(arr) => {
                for vv in arr {
                    if *cur >= max {
                        break;
                    }
                    walk(vv, cur, max);
                }
            }
            _ => {}
        }
    }
    let mut count = 0usize;
    walk(v, &mut count, max);
    count >= max
}

/// What a manifest claims to be. Fields are best-effort so rejected manifests can still be recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestTarget {
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
    pub api_group: Option<String>,
    pub api_version: Option<String>,
}

impl ManifestTarget {
    pub fn unknown() -> Self {
        Self { kind: UNKNOWN_KIND.to_string(), name: String::new(), namespace: None, api_group: None, api_version: None }
    }

    fn from_document(doc: &Json) -> Self {
        let kind = match kind_of(doc) {
            "" => UNKNOWN_KIND.to_string(),
            k => k.to_string(),
        };
        let (api_group, api_version) = match api_version_of(doc) {
            "" => (None, None),
            av => {
                let (g, v) = split_api_version(av);
                ((!g.is_empty()).then(|| g.to_string()), Some(v.to_string()))
            }
        };
        Self {
            kind,
            name: name_of(doc).to_string(),
            namespace: namespace_of(doc).map(str::to_string),
            api_group,
            api_version,
        }
    }
}

/// Parse and check a manifest. Always yields a target; the error, if any, is the rejection reason.
pub fn inspect(yaml: &str) -> (ManifestTarget, Result<Json>) {
    if yaml.len() > max_yaml_bytes() {
        return (ManifestTarget::unknown(), Err(anyhow!("YAML payload too large (>{} bytes)", max_yaml_bytes())));
    }
    let json = match parse(yaml) {
        Ok(j) => j,
        Err(e) => return (ManifestTarget::unknown(), Err(e)),
    };
    let target = ManifestTarget::from_document(&json);
    let verdict = check(&json).map(|_| json);
    (target, verdict)
}

fn parse(yaml: &str) -> Result<Json> {
    let val: serde_yaml::Value = serde_yaml::from_str(yaml).context("parsing YAML")?;
    serde_json::to_value(val).context("converting YAML to JSON")
}

fn check(json: &Json) -> Result<()> {
    if !json.is_object() {
        return Err(anyhow!("YAML document is not a mapping"));
    }
    if node_budget_exceeded(json, max_yaml_nodes()) {
        return Err(anyhow!("YAML document too complex (>{} nodes)", max_yaml_nodes()));
    }
    if api_version_of(json).is_empty() {
        return Err(anyhow!("YAML missing apiVersion"));
    }
    if kind_of(json).is_empty() {
        return Err(anyhow!("YAML missing kind"));
    }
    if name_of(json).is_empty() {
        return Err(anyhow!("YAML missing metadata.name"));
    }
    Ok(())
}
