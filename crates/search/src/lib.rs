//! kview search: per-kind free-text predicates over already-fetched resources.
//!
//! A query is lowercased once and matched by substring against a fixed field set per kind. Name and
//! namespace are always searched. Multi-valued fields match when any element matches. Predicates are
//! pure and never fail: absent fields count as empty strings.

#![forbid(unsafe_code)]

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use kview_core::{extract, scalar_text, KnownKind, ResourceKind};
use serde_json::Value;
use smallvec::SmallVec;
use tracing::trace;

/// A searchable field. Paths use the field extractor's dotted form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchField {
    /// Scalar at a path.
    Path(&'static str),
    /// Keys of the mapping at a path.
    Keys(&'static str),
    /// Keys and values of the mapping at a path.
    KeysAndValues(&'static str),
    /// Every scalar leaf of each element of the sequence at a path.
    Elements(&'static str),
    /// One member of each element of the sequence at a path.
    ElementField(&'static str, &'static str),
}

const BASE_FIELDS: &[SearchField] = &[SearchField::Path("metadata.name"), SearchField::Path("metadata.namespace")];

const LABELS: SearchField = SearchField::KeysAndValues("metadata.labels");

fn kind_fields(kind: &ResourceKind) -> &'static [SearchField] {
    use SearchField::*;
    match kind {
        ResourceKind::Known(k) => match k {
            KnownKind::Pods => &[Path("status.phase"), Path("spec.nodeName"), Path("status.podIP")],
            KnownKind::Services => &[Path("spec.type"), Path("spec.clusterIP")],
            KnownKind::Secrets => &[Path("type"), Keys("data")],
            KnownKind::ConfigMaps => &[Keys("data")],
            KnownKind::Ingresses => &[ElementField("spec.rules", "host")],
            KnownKind::Nodes => &[LABELS],
            KnownKind::CustomResourceDefinitions => &[Path("spec.group"), Path("spec.names.kind"), LABELS],
            _ => &[],
        },
        ResourceKind::Custom { .. } => &[LABELS, Elements("spec.hostnames"), Elements("spec.routes"), Elements("spec.tags")],
    }
}

/// Normalized query text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    lowered: String,
}

impl Query {
    /// Surrounding whitespace is ignored.
    pub fn new(raw: &str) -> Self {
        Self { lowered: raw.trim().to_lowercase() }
    }

    pub fn as_str(&self) -> &str {
        &self.lowered
    }

    pub fn is_empty(&self) -> bool {
        self.lowered.is_empty()
    }

    fn hit(&self, candidate: &str) -> bool {
        candidate.to_lowercase().contains(&self.lowered)
    }
}

/// The predicate for one kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchFilter {
    fields: SmallVec<[SearchField; 8]>,
}

impl SearchFilter {
    pub fn for_kind(kind: &ResourceKind) -> Self {
        let mut fields: SmallVec<[SearchField; 8]> = SmallVec::new();
        fields.extend_from_slice(BASE_FIELDS);
        fields.extend_from_slice(kind_fields(kind));
        Self { fields }
    }

    pub fn fields(&self) -> &[SearchField] {
        &self.fields
    }

    /// OR across fields, OR across elements of multi-valued fields. An empty query matches.
    pub fn matches(&self, doc: &Value, query: &Query) -> bool {
        if query.is_empty() {
            return true;
        }
        self.fields.iter().any(|f| field_matches(doc, *f, query))
    }
}

fn field_matches(doc: &Value, field: SearchField, query: &Query) -> bool {
    match field {
        SearchField::Path(p) => {
            let text = extract(doc, p).and_then(scalar_text).unwrap_or_default();
            query.hit(&text)
        }
        SearchField::Keys(p) => extract(doc, p)
            .and_then(|v| v.as_object())
            .map(|m| m.keys().any(|k| query.hit(k)))
            .unwrap_or(false),
        SearchField::KeysAndValues(p) => extract(doc, p)
            .and_then(|v| v.as_object())
            .map(|m| m.iter().any(|(k, v)| query.hit(k) || scalar_text(v).map(|s| query.hit(&s)).unwrap_or(false)))
            .unwrap_or(false),
        SearchField::Elements(p) => extract(doc, p)
            .and_then(|v| v.as_array())
            .map(|items| items.iter().any(|it| leaf_matches(it, query, 0)))
            .unwrap_or(false),
        SearchField::ElementField(p, member) => extract(doc, p)
            .and_then(|v| v.as_array())
            .map(|items| {
                items.iter().any(|it| it.get(member).and_then(scalar_text).map(|s| query.hit(&s)).unwrap_or(false))
            })
            .unwrap_or(false),
    }
}

const MAX_LEAF_DEPTH: usize = 4;

fn leaf_matches(v: &Value, query: &Query, depth: usize) -> bool {
    if depth > MAX_LEAF_DEPTH {
        return false;
    }
    match v {
        Value::Object(m) => m.values().any(|x| leaf_matches(x, query, depth + 1)),
        Value::Array(a) => a.iter().any(|x| leaf_matches(x, query, depth + 1)),
        other => scalar_text(other).map(|s| query.hit(&s)).unwrap_or(false),
    }
}

/// Filter a fetched snapshot, keeping input order.
pub fn search<'a>(docs: &'a [Value], kind: &ResourceKind, raw_query: &str) -> Vec<&'a Value> {
    let filter = SearchFilter::for_kind(kind);
    let query = Query::new(raw_query);
    let out: Vec<&Value> = docs.iter().filter(|d| filter.matches(d, &query)).collect();
    metrics::counter!("search_docs_scanned", docs.len() as u64);
    trace!(kind = %kind, scanned = docs.len(), matched = out.len(), "search");
    out
}

/// Like [`search`], ordered by fuzzy name score (best first), then shorter name, then name.
pub fn rank<'a>(docs: &'a [Value], kind: &ResourceKind, raw_query: &str) -> Vec<&'a Value> {
    let mut hits = search(docs, kind, raw_query);
    let query = Query::new(raw_query);
    if query.is_empty() {
        return hits;
    }
    let matcher = SkimMatcherV2::default();
    let score = |d: &Value| matcher.fuzzy_match(&kview_core::name_of(d).to_lowercase(), query.as_str()).unwrap_or(0);
    hits.sort_by(|a, b| {
        let (na, nb) = (kview_core::name_of(a), kview_core::name_of(b));
        score(*b)
            .cmp(&score(*a))
            .then_with(|| na.len().cmp(&nb.len()))
            .then_with(|| na.cmp(nb))
    });
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn q(s: &str) -> Query {
        Query::new(s)
    }

    #[test]
    fn always_searches_name_and_namespace() {
        let f = SearchFilter::for_kind(&ResourceKind::Known(KnownKind::Deployments));
        let d = json!({ "metadata": { "name": "checkout-api", "namespace": "Payments" } });
        assert!(f.matches(&d, &q("checkout")));
        assert!(f.matches(&d, &q("payments")));
        assert!(!f.matches(&d, &q("billing")));
    }

    #[test]
    fn case_insensitive() {
        let f = SearchFilter::for_kind(&ResourceKind::Known(KnownKind::ConfigMaps));
        let d = json!({ "metadata": { "name": "FooBar" } });
        assert_eq!(f.matches(&d, &q("Foo")), f.matches(&d, &q("foo")));
        assert!(f.matches(&d, &q("FOOBAR")));
    }

    #[test]
    fn secrets_search_type_and_data_keys() {
        let f = SearchFilter::for_kind(&ResourceKind::Known(KnownKind::Secrets));
        let d = json!({
            "metadata": { "name": "creds" },
            "type": "kubernetes.io/tls",
            "data": { "tls.crt": "AAA=", "tls.key": "BBB=" }
        });
        assert!(f.matches(&d, &q("kubernetes.io/tls")));
        assert!(f.matches(&d, &q("tls.key")));
        // data values are not searched
        assert!(!f.matches(&d, &q("bbb=")));
    }

    #[test]
    fn crds_search_labels() {
        let f = SearchFilter::for_kind(&ResourceKind::Known(KnownKind::CustomResourceDefinitions));
        let d = json!({
            "metadata": { "name": "widgets.example.com", "labels": { "team": "platform" } },
            "spec": { "group": "example.com", "names": { "kind": "Widget" } }
        });
        assert!(f.matches(&d, &q("team")));
        assert!(f.matches(&d, &q("platform")));
        assert!(f.matches(&d, &q("widget")));
    }

    #[test]
    fn custom_kinds_search_any_list_element() {
        let f = SearchFilter::for_kind(&ResourceKind::parse("httproutes.gateway.networking.k8s.io"));
        let d = json!({
            "metadata": { "name": "r1" },
            "spec": {
                "hostnames": ["shop.example.com", "api.example.com"],
                "routes": [ { "match": { "path": "/checkout" } }, "/static" ],
                "tags": ["edge", "beta"]
            }
        });
        assert!(f.matches(&d, &q("api.example")));
        assert!(f.matches(&d, &q("/checkout")));
        assert!(f.matches(&d, &q("/static")));
        assert!(f.matches(&d, &q("BETA")));
        assert!(!f.matches(&d, &q("internal")));
    }

    #[test]
    fn ingress_hosts() {
        let f = SearchFilter::for_kind(&ResourceKind::Known(KnownKind::Ingresses));
        let d = json!({ "metadata": { "name": "ing" }, "spec": { "rules": [ { "host": "a.example.com" }, {} ] } });
        assert!(f.matches(&d, &q("a.example")));
    }

    #[test]
    fn total_over_partial_documents() {
        let f = SearchFilter::for_kind(&ResourceKind::parse("widgets.example.com"));
        for d in [json!({}), json!(null), json!({ "metadata": 5 }), json!({ "spec": { "tags": "not-a-list" } })] {
            assert!(!f.matches(&d, &q("x")));
            assert!(f.matches(&d, &q("")));
        }
    }

    #[test]
    fn search_keeps_order_and_rank_sorts_by_score() {
        let kind = ResourceKind::Known(KnownKind::ConfigMaps);
        let docs = vec![
            json!({ "metadata": { "name": "my-web-config" } }),
            json!({ "metadata": { "name": "db" } }),
            json!({ "metadata": { "name": "web" } }),
        ];
        let hits = search(&docs, &kind, "web");
        let names: Vec<_> = hits.iter().map(|d| kview_core::name_of(d)).collect();
        assert_eq!(names, vec!["my-web-config", "web"]);

        let ranked = rank(&docs, &kind, "web");
        assert_eq!(kview_core::name_of(ranked[0]), "web");
        assert_eq!(search(&docs, &kind, "  ").len(), 3);
    }
}
