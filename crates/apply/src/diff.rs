//! Structural change counts between two revisions of a manifest.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use kview_persist::HistoryEntry;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub adds: usize,
    pub updates: usize,
    pub removes: usize,
}

impl DiffSummary {
    pub fn is_empty(&self) -> bool {
        self.adds == 0 && self.updates == 0 && self.removes == 0
    }
}

/// Drop server-populated fields that would otherwise show up as changes.
pub fn strip_noisy(mut v: Json) -> Json {
    if let Some(meta) = v.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        for k in ["managedFields", "resourceVersion", "generation", "creationTimestamp", "uid"] {
            meta.remove(k);
        }
    }
    if let Some(obj) = v.as_object_mut() {
        obj.remove("status");
    }
    v
}

/// Count leaf-level changes going from `base` to `target`.
pub fn diff_summary(target: &Json, base: &Json) -> DiffSummary {
    fn walk(a: &Json, b: &Json, s: &mut DiffSummary) {
        match (a, b) {
            (Json::Object(ao), Json::Object(bo)) => {
                for (k, av) in ao {
                    match bo.get(k) {
                        Some(bv) if av == bv => {}
                        Some(bv) => walk(av, bv, s),
                        None => s.adds += 1,
                    }
                }
                s.removes += bo.keys().filter(|k| !ao.contains_key(*k)).count();
            }
            (Json::Array(aa), Json::Array(bb)) => {
                s.updates += aa.iter().zip(bb).filter(|(x, y)| x != y).count();
                s.adds += aa.len().saturating_sub(bb.len());
                s.removes += bb.len().saturating_sub(aa.len());
            }
            (av, bv) => {
                if av != bv {
                    s.updates += 1;
                }
            }
        }
    }
    let mut s = DiffSummary::default();
    walk(target, base, &mut s);
    s
}

fn parse(yaml: &str) -> Option<Json> {
    let v: serde_yaml::Value = serde_yaml::from_str(yaml).ok()?;
    serde_json::to_value(v).ok().map(strip_noisy)
}

/// Changes recorded by one history entry. `None` when there is no prior revision or either side
/// does not parse.
pub fn diff_entry(entry: &HistoryEntry) -> Option<DiffSummary> {
    let previous = parse(entry.previous_yaml.as_deref()?)?;
    let current = parse(&entry.resource_yaml)?;
    Some(diff_summary(&current, &previous))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strip_noisy_prunes_server_fields() {
        let v = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": "x",
                "namespace": "ns",
                "managedFields": [ { "manager": "kubectl" } ],
                "resourceVersion": "123",
                "generation": 5,
                "creationTimestamp": "2020-01-01T00:00:00Z"
            },
            "status": { "observed": true },
            "data": { "k": "v" }
        });
        let pruned = strip_noisy(v);
        assert_eq!(
            pruned,
            json!({ "apiVersion": "v1", "kind": "ConfigMap", "metadata": { "name": "x", "namespace": "ns" }, "data": { "k": "v" } })
        );
    }

    #[test]
    fn counts_adds_updates_removes() {
        let base = json!({ "a": 1, "b": { "x": 1 }, "c": [1, 2, 3], "gone": "x" });
        let target = json!({ "a": 2, "b": { "x": 1, "y": 2 }, "c": [1, 9], "d": true });
        let s = diff_summary(&target, &base);
        // a and c[1] change; b.y and d appear; c shrinks by one and `gone` disappears
        assert_eq!(s, DiffSummary { adds: 2, updates: 2, removes: 2 });
        assert!(diff_summary(&base, &base).is_empty());
    }

    #[test]
    fn entry_diff_needs_a_previous_revision() {
        let mut e = HistoryEntry {
            id: "1".into(),
            cluster_id: "c".into(),
            resource_type: "ConfigMap".into(),
            resource_name: "app".into(),
            namespace: Some("default".into()),
            api_group: None,
            api_version: Some("v1".into()),
            operation_type: kview_core::OperationType::Create,
            success: true,
            error_message: None,
            operator_id: "u".into(),
            operator_name: "ops".into(),
            created_at: 0,
            resource_yaml: "kind: ConfigMap\ndata:\n  a: \"2\"\n  b: \"1\"\n".into(),
            previous_yaml: None,
        };
        assert_eq!(diff_entry(&e), None);
        e.previous_yaml = Some("kind: ConfigMap\nmetadata:\n  resourceVersion: \"9\"\ndata:\n  a: \"1\"\n".into());
        // metadata only exists on the stripped side as an empty mapping
        assert_eq!(diff_entry(&e), Some(DiffSummary { adds: 1, updates: 1, removes: 1 }));
    }
}
