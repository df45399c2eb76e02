//! Field extraction over resource documents.
//!
//! Paths are dot-separated. A segment indexes a mapping by key, or a sequence by position when the
//! segment is numeric. Anything that does not resolve yields `None`; extraction never fails.

use serde_json::Value;

/// Resolve `path` against `doc`. A leading `.` is ignored and the empty path is the document itself.
pub fn extract<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.strip_prefix('.').unwrap_or(path);
    if path.is_empty() {
        return Some(doc);
    }
    let mut cur = doc;
    for seg in path.split('.') {
        cur = match cur {
            Value::Object(map) => map.get(seg)?,
            Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(cur)
}

/// Render a scalar as text. Null, sequences and mappings are not scalars.
pub fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Read a non-negative count; absent or non-numeric values count as zero.
pub fn extract_count(doc: &Value, path: &str) -> u64 {
    match extract(doc, path) {
        Some(Value::Number(n)) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)).unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Convert a printer-column JSONPath (`.spec.dnsNames[0]`) into dotted form (`spec.dnsNames.0`).
///
/// Only plain numeric indexes are rewritten. Filter and wildcard expressions are kept verbatim, which
/// makes them resolve to absent.
pub fn normalize_path(json_path: &str) -> String {
    let trimmed = json_path.trim();
    let s = trimmed.strip_prefix('.').unwrap_or(trimmed);
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(open) = rest.find('[') {
        let Some(close) = rest[open..].find(']').map(|c| open + c) else { break };
        let inner = &rest[open + 1..close];
        if !inner.is_empty() && inner.bytes().all(|b| b.is_ascii_digit()) {
            out.push_str(&rest[..open]);
            out.push('.');
            out.push_str(inner);
        } else {
            out.push_str(&rest[..=close]);
        }
        rest = &rest[close + 1..];
    }
    out.push_str(rest);
    match out.strip_prefix('.') {
        Some(stripped) => stripped.to_string(),
        None => out,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "metadata": { "name": "w", "labels": { "app": "web" } },
            "spec": { "dnsNames": ["a.example.com", "b.example.com"], "replicas": 3 },
            "status": { "conditions": [ { "type": "Ready", "status": "True" } ] }
        })
    }

    #[test]
    fn resolves_keys_and_indexes() {
        let d = doc();
        assert_eq!(extract(&d, "metadata.name"), Some(&json!("w")));
        assert_eq!(extract(&d, ".spec.replicas"), Some(&json!(3)));
        assert_eq!(extract(&d, "spec.dnsNames.1"), Some(&json!("b.example.com")));
        assert_eq!(extract(&d, "status.conditions.0.type"), Some(&json!("Ready")));
        assert_eq!(extract(&d, ""), Some(&d));
    }

    #[test]
    fn missing_segments_are_absent() {
        let d = doc();
        assert_eq!(extract(&d, "status.phase"), None);
        assert_eq!(extract(&d, "nothing.at.all"), None);
        assert_eq!(extract(&d, "spec.dnsNames.7"), None);
        // scalar in the middle of the path
        assert_eq!(extract(&d, "spec.replicas.value"), None);
    }

    #[test]
    fn sequence_without_numeric_segment_is_absent() {
        let d = doc();
        assert_eq!(extract(&d, "spec.dnsNames.first"), None);
        assert_eq!(extract(&d, "status.conditions.type"), None);
    }

    #[test]
    fn counts_default_to_zero() {
        let d = doc();
        assert_eq!(extract_count(&d, "spec.replicas"), 3);
        assert_eq!(extract_count(&d, "status.readyReplicas"), 0);
        assert_eq!(extract_count(&d, "metadata.name"), 0);
    }

    #[test]
    fn normalize_rewrites_plain_indexes_only() {
        assert_eq!(normalize_path(".status.phase"), "status.phase");
        assert_eq!(normalize_path("spec.dnsNames[0]"), "spec.dnsNames.0");
        assert_eq!(normalize_path(".spec.rules[1].host"), "spec.rules.1.host");
        assert_eq!(normalize_path(".status.conditions[?(@.type==\"Ready\")].status"), "status.conditions[?(@.type==\"Ready\")].status");
        assert_eq!(normalize_path("."), "");
        assert_eq!(normalize_path(""), "");
    }

    #[test]
    fn scalar_text_skips_containers() {
        assert_eq!(scalar_text(&json!("x")), Some("x".to_string()));
        assert_eq!(scalar_text(&json!(1.5)), Some("1.5".to_string()));
        assert_eq!(scalar_text(&json!(false)), Some("false".to_string()));
        assert_eq!(scalar_text(&json!(null)), None);
        assert_eq!(scalar_text(&json!([1])), None);
    }
}
