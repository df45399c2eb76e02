//! kview persistence: the append-only history of mutation attempts.
//!
//! Every apply or delete attempt, successful or not, becomes exactly one [`HistoryEntry`]. Entries are
//! never updated. Reads are scoped to one cluster and paged newest first.

#![forbid(unsafe_code)]

mod memory;
mod sqlite;

use anyhow::Result;
use kview_core::OperationType;
use serde::{Deserialize, Serialize};

pub use memory::MemoryHistoryStore;
pub use sqlite::SqliteHistoryStore;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub cluster_id: String,
    pub resource_type: String,
    pub resource_name: String,
    pub namespace: Option<String>,
    pub api_group: Option<String>,
    pub api_version: Option<String>,
    pub operation_type: OperationType,
    pub success: bool,
    pub error_message: Option<String>,
    pub operator_id: String,
    pub operator_name: String,
    /// Unix milliseconds.
    pub created_at: i64,
    pub resource_yaml: String,
    pub previous_yaml: Option<String>,
}

/// Conjunctive filter; `None` fields do not constrain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryFilter {
    pub resource_type: Option<String>,
    pub resource_name: Option<String>,
    pub namespace: Option<String>,
    pub operation_type: Option<OperationType>,
    pub success: Option<bool>,
}

impl HistoryFilter {
    pub fn matches(&self, e: &HistoryEntry) -> bool {
        self.resource_type.as_deref().map_or(true, |t| t == e.resource_type)
            && self.resource_name.as_deref().map_or(true, |n| n == e.resource_name)
            && self.namespace.as_deref().map_or(true, |ns| e.namespace.as_deref() == Some(ns))
            && self.operation_type.map_or(true, |op| op == e.operation_type)
            && self.success.map_or(true, |s| s == e.success)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPage {
    pub data: Vec<HistoryEntry>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

/// Identity of one object within a cluster, for looking up its last known good state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectKey<'a> {
    pub cluster_id: &'a str,
    /// `None` for the core group.
    pub api_group: Option<&'a str>,
    pub resource_type: &'a str,
    pub namespace: Option<&'a str>,
    pub name: &'a str,
}

impl ObjectKey<'_> {
    fn matches(&self, e: &HistoryEntry) -> bool {
        e.cluster_id == self.cluster_id
            && e.api_group.as_deref() == self.api_group
            && e.resource_type == self.resource_type
            && e.resource_name == self.name
            && e.namespace.as_deref() == self.namespace
    }
}

pub trait HistoryStore: Send + Sync {
    /// Append one entry. Ids are unique; re-recording an id is an error.
    fn record(&self, entry: &HistoryEntry) -> Result<()>;

    fn query(&self, cluster_id: &str, filter: &HistoryFilter, page: u32, page_size: u32) -> Result<HistoryPage>;

    fn get(&self, cluster_id: &str, id: &str) -> Result<Option<HistoryEntry>>;

    /// Last known good revision of one object: the newest successful entry, unless that entry is a
    /// delete, in which case the object has no recorded revision.
    fn latest_success(&self, key: ObjectKey<'_>) -> Result<Option<HistoryEntry>>;
}

/// Normalize paging input: pages are 1-based (0 reads as 1), sizes clamp to `1..=MAX_PAGE_SIZE`.
/// Returns `(page, page_size, offset)`.
pub fn normalize_page(page: u32, page_size: u32) -> (u32, u32, u64) {
    let page = page.max(1);
    let size = page_size.clamp(1, MAX_PAGE_SIZE);
    (page, size, (page as u64 - 1) * size as u64)
}

pub fn now_ms() -> i64 {
    let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default();
    now.as_millis() as i64
}

pub fn maybe_compress(yaml: &str) -> Vec<u8> {
    #[cfg(feature = "zstd")]
    {
        let lvl: i32 = std::env::var("KVIEW_ZSTD_LEVEL").ok().and_then(|s| s.parse().ok()).unwrap_or(3);
        return zstd::encode_all(yaml.as_bytes(), lvl).unwrap_or_else(|_| yaml.as_bytes().to_vec());
    }
    #[cfg(not(feature = "zstd"))]
    yaml.as_bytes().to_vec()
}

/// Blobs written without compression are returned as-is.
pub fn maybe_decompress(blob: &[u8]) -> String {
    #[cfg(feature = "zstd")]
    {
        if let Ok(de) = zstd::decode_all(std::io::Cursor::new(blob)) {
            return String::from_utf8_lossy(&de).to_string();
        }
    }
    String::from_utf8_lossy(blob).to_string()
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    pub fn entry(cluster: &str, name: &str, created_at: i64, success: bool) -> HistoryEntry {
        HistoryEntry {
            id: format!("{}-{}-{}", cluster, name, created_at),
            cluster_id: cluster.to_string(),
            resource_type: "ConfigMap".to_string(),
            resource_name: name.to_string(),
            namespace: Some("default".to_string()),
            api_group: None,
            api_version: Some("v1".to_string()),
            operation_type: OperationType::Apply,
            success,
            error_message: if success { None } else { Some("admission webhook denied".to_string()) },
            operator_id: "u-1".to_string(),
            operator_name: "ops".to_string(),
            created_at,
            resource_yaml: format!("kind: ConfigMap\nmetadata:\n  name: {}\n", name),
            previous_yaml: None,
        }
    }

    /// Shared behavior checks, run against every store implementation.
    pub fn exercise(store: &dyn HistoryStore) {
        for i in 1..=45 {
            store.record(&entry("c1", &format!("cm-{:02}", i), 1_000 + i, i % 9 != 0)).unwrap();
        }
        store.record(&entry("c2", "other", 5_000, true)).unwrap();

        let page = store.query("c1", &HistoryFilter::default(), 2, 20).unwrap();
        assert_eq!(page.total, 45);
        assert_eq!((page.page, page.page_size), (2, 20));
        let names: Vec<_> = page.data.iter().map(|e| e.resource_name.as_str()).collect();
        // newest first: page 2 covers positions 21..=40, i.e. cm-25 down to cm-06
        assert_eq!(names.first().copied(), Some("cm-25"));
        assert_eq!(names.last().copied(), Some("cm-06"));
        assert_eq!(names.len(), 20);

        let failed = store.query("c1", &HistoryFilter { success: Some(false), ..Default::default() }, 1, 50).unwrap();
        assert_eq!(failed.total, 5);
        assert!(failed.data.iter().all(|e| !e.success && e.error_message.is_some()));

        let last = store.query("c1", &HistoryFilter::default(), 3, 20).unwrap();
        assert_eq!(last.data.len(), 5);
        let beyond = store.query("c1", &HistoryFilter::default(), 9, 20).unwrap();
        assert!(beyond.data.is_empty());
        assert_eq!(beyond.total, 45);

        let zero = store.query("c1", &HistoryFilter::default(), 0, 0).unwrap();
        assert_eq!((zero.page, zero.page_size, zero.data.len()), (1, 1, 1));

        let id = "c1-cm-03-1003";
        assert_eq!(store.get("c1", id).unwrap().map(|e| e.resource_name), Some("cm-03".to_string()));
        assert!(store.get("c2", id).unwrap().is_none());

        let key = ObjectKey {
            cluster_id: "c1",
            api_group: None,
            resource_type: "ConfigMap",
            namespace: Some("default"),
            name: "cm-09",
        };
        // cm-09 only ever failed
        assert!(store.latest_success(key).unwrap().is_none());
        let key = ObjectKey { name: "cm-10", ..key };
        assert_eq!(store.latest_success(key).unwrap().map(|e| e.created_at), Some(1_010));

        exercise_groups(store);
        exercise_tombstones(store);
    }

    fn certificate(id: &str, group: &str, created_at: i64) -> HistoryEntry {
        let mut e = entry("c3", "web", created_at, true);
        e.id = id.to_string();
        e.resource_type = "Certificate".to_string();
        e.api_group = Some(group.to_string());
        e.resource_yaml = format!("apiVersion: {}/v1\nkind: Certificate\n", group);
        e
    }

    /// Same kind, name and namespace in two API groups are two objects.
    fn exercise_groups(store: &dyn HistoryStore) {
        store.record(&certificate("cert-b", "b.io", 10)).unwrap();
        store.record(&certificate("cert-a", "a.io", 20)).unwrap();
        let key = ObjectKey {
            cluster_id: "c3",
            api_group: Some("b.io"),
            resource_type: "Certificate",
            namespace: Some("default"),
            name: "web",
        };
        assert_eq!(store.latest_success(key).unwrap().map(|e| e.id), Some("cert-b".to_string()));
        let key = ObjectKey { api_group: Some("a.io"), ..key };
        assert_eq!(store.latest_success(key).unwrap().map(|e| e.id), Some("cert-a".to_string()));
        let key = ObjectKey { api_group: Some("c.io"), ..key };
        assert!(store.latest_success(key).unwrap().is_none());
    }

    /// A successful delete hides every earlier revision; a later create starts a new chain.
    fn exercise_tombstones(store: &dyn HistoryStore) {
        let mut v1 = entry("c4", "app", 10, true);
        v1.id = "app-v1".into();
        let mut gone = entry("c4", "app", 20, true);
        gone.id = "app-del".into();
        gone.operation_type = OperationType::Delete;
        store.record(&v1).unwrap();
        store.record(&gone).unwrap();
        let key = ObjectKey {
            cluster_id: "c4",
            api_group: None,
            resource_type: "ConfigMap",
            namespace: Some("default"),
            name: "app",
        };
        assert!(store.latest_success(key).unwrap().is_none());

        // a failed delete leaves the last revision in place
        let mut failed = entry("c4", "app", 30, false);
        failed.id = "app-del-failed".into();
        failed.operation_type = OperationType::Delete;
        let mut v2 = entry("c4", "app", 25, true);
        v2.id = "app-v2".into();
        store.record(&v2).unwrap();
        store.record(&failed).unwrap();
        assert_eq!(store.latest_success(key).unwrap().map(|e| e.id), Some("app-v2".to_string()));
    }

    pub fn exercise_ties(store: &dyn HistoryStore) {
        // same timestamp: later insertion sorts first
        store.record(&entry("c1", "a", 7, true)).unwrap();
        let mut b = entry("c1", "b", 7, true);
        b.id = "second".into();
        store.record(&b).unwrap();
        let page = store.query("c1", &HistoryFilter::default(), 1, 10).unwrap();
        let names: Vec<_> = page.data.iter().map(|e| e.resource_name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paging_normalization() {
        assert_eq!(normalize_page(0, 20), (1, 20, 0));
        assert_eq!(normalize_page(3, 10), (3, 10, 20));
        assert_eq!(normalize_page(1, 0), (1, 1, 0));
        assert_eq!(normalize_page(2, 10_000), (2, MAX_PAGE_SIZE, MAX_PAGE_SIZE as u64));
    }

    #[test]
    fn filter_is_conjunctive() {
        let e = testutil::entry("c1", "web", 1, false);
        assert!(HistoryFilter::default().matches(&e));
        let f = HistoryFilter { resource_name: Some("web".into()), success: Some(false), ..Default::default() };
        assert!(f.matches(&e));
        let f = HistoryFilter { resource_name: Some("web".into()), success: Some(true), ..Default::default() };
        assert!(!f.matches(&e));
        let f = HistoryFilter { namespace: Some("kube-system".into()), ..Default::default() };
        assert!(!f.matches(&e));
        let f = HistoryFilter { operation_type: Some(OperationType::Apply), ..Default::default() };
        assert!(f.matches(&e));
    }

    #[test]
    fn compression_roundtrip_is_transparent() {
        let yaml = "apiVersion: v1\nkind: ConfigMap\n";
        assert_eq!(maybe_decompress(&maybe_compress(yaml)), yaml);
    }
}
