use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use kview_core::OperationType;
use metrics::counter;

use crate::{normalize_page, HistoryEntry, HistoryFilter, HistoryPage, HistoryStore, ObjectKey};

/// Process-local history, for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    entries: Mutex<Vec<HistoryEntry>>,
    /// When set, `record` fails with this message.
    fail_writes: Mutex<Option<String>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_write_failure(&self, reason: Option<&str>) {
        if let Ok(mut f) = self.fail_writes.lock() {
            *f = reason.map(str::to_string);
        }
    }

    /// All entries, newest first.
    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        let mut out = self.entries.lock().map(|e| e.clone()).unwrap_or_default();
        newest_first(&mut out);
        out
    }
}

/// Stable sort by timestamp after reversing insertion order, so ties keep newest insertion first.
fn newest_first(v: &mut [HistoryEntry]) {
    v.reverse();
    v.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

impl HistoryStore for MemoryHistoryStore {
    fn record(&self, entry: &HistoryEntry) -> Result<()> {
        if let Some(reason) = self.fail_writes.lock().map_err(|_| anyhow!("history lock poisoned"))?.clone() {
            bail!(reason);
        }
        let mut entries = self.entries.lock().map_err(|_| anyhow!("history lock poisoned"))?;
        if entries.iter().any(|e| e.id == entry.id) {
            bail!("duplicate history id {}", entry.id);
        }
        entries.push(entry.clone());
        counter!("history_record_total", 1u64);
        Ok(())
    }

    fn query(&self, cluster_id: &str, filter: &HistoryFilter, page: u32, page_size: u32) -> Result<HistoryPage> {
        let (page, page_size, offset) = normalize_page(page, page_size);
        let mut hits: Vec<HistoryEntry> = {
            let entries = self.entries.lock().map_err(|_| anyhow!("history lock poisoned"))?;
            entries.iter().filter(|e| e.cluster_id == cluster_id && filter.matches(e)).cloned().collect()
        };
        newest_first(&mut hits);
        let total = hits.len() as u64;
        let data = hits.into_iter().skip(offset as usize).take(page_size as usize).collect();
        Ok(HistoryPage { data, total, page, page_size })
    }

    fn get(&self, cluster_id: &str, id: &str) -> Result<Option<HistoryEntry>> {
        let entries = self.entries.lock().map_err(|_| anyhow!("history lock poisoned"))?;
        Ok(entries.iter().find(|e| e.cluster_id == cluster_id && e.id == id).cloned())
    }

    fn latest_success(&self, key: ObjectKey<'_>) -> Result<Option<HistoryEntry>> {
        let entries = self.entries.lock().map_err(|_| anyhow!("history lock poisoned"))?;
        let mut hits: Vec<HistoryEntry> = entries.iter().filter(|e| key.matches(e) && e.success).cloned().collect();
        newest_first(&mut hits);
        Ok(hits.into_iter().next().filter(|e| e.operation_type != OperationType::Delete))
    }
}
