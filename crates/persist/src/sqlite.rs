use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use metrics::{counter, histogram};
use rusqlite::types::{Type, Value as SqlValue};
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use kview_core::OperationType;
use tracing::{debug, info};

use crate::{
    maybe_compress, maybe_decompress, normalize_page, HistoryEntry, HistoryFilter, HistoryPage, HistoryStore,
    ObjectKey,
};

const COLUMNS: &str = "id, cluster_id, resource_type, resource_name, namespace, api_group, api_version, \
                       operation_type, success, error_message, operator_id, operator_name, created_at, \
                       resource_yaml, previous_yaml";

/// SQLite-backed history. Synchronous; one connection behind a mutex.
pub struct SqliteHistoryStore {
    db: Mutex<Connection>,
}

impl SqliteHistoryStore {
    /// Open the database at `KVIEW_DB_PATH`, or `~/.kview/kview.db`.
    pub fn open_default() -> Result<Self> {
        let path = std::env::var("KVIEW_DB_PATH").unwrap_or_else(|_| default_db_path());
        Self::open(&path)
    }

    pub fn open(path: &str) -> Result<Self> {
        let started = std::time::Instant::now();
        let db = Connection::open(path).with_context(|| format!("opening sqlite db at {}", path))?;
        db.pragma_update(None, "journal_mode", "WAL").ok();
        db.pragma_update(None, "synchronous", "NORMAL").ok();
        Self::init(db, started).map(|s| {
            info!(path, "history store opened");
            s
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory().context("opening in-memory sqlite db")?;
        Self::init(db, std::time::Instant::now())
    }

    fn init(db: Connection, started: std::time::Instant) -> Result<Self> {
        db.execute(
            "CREATE TABLE IF NOT EXISTS history (
                seq            INTEGER PRIMARY KEY AUTOINCREMENT,
                id             TEXT NOT NULL UNIQUE,
                cluster_id     TEXT NOT NULL,
                resource_type  TEXT NOT NULL,
                resource_name  TEXT NOT NULL,
                namespace      TEXT,
                api_group      TEXT,
                api_version    TEXT,
                operation_type TEXT NOT NULL,
                success        INTEGER NOT NULL,
                error_message  TEXT,
                operator_id    TEXT NOT NULL,
                operator_name  TEXT NOT NULL,
                created_at     INTEGER NOT NULL,
                resource_yaml  BLOB NOT NULL,
                previous_yaml  BLOB
            )",
            [],
        )
        .context("creating history table")?;
        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_history_cluster_ts ON history(cluster_id, created_at DESC, seq DESC)",
            [],
        )
        .ok();
        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_history_object ON history(cluster_id, resource_type, resource_name)",
            [],
        )
        .ok();
        histogram!("persist_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(Self { db: Mutex::new(db) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| anyhow!("history db lock poisoned"))
    }
}

impl HistoryStore for SqliteHistoryStore {
    fn record(&self, e: &HistoryEntry) -> Result<()> {
        let started = std::time::Instant::now();
        let db = self.conn()?;
        db.execute(
            &format!(
                "INSERT INTO history({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                COLUMNS
            ),
            rusqlite::params![
                e.id,
                e.cluster_id,
                e.resource_type,
                e.resource_name,
                e.namespace,
                e.api_group,
                e.api_version,
                e.operation_type.as_str(),
                e.success,
                e.error_message,
                e.operator_id,
                e.operator_name,
                e.created_at,
                maybe_compress(&e.resource_yaml),
                e.previous_yaml.as_deref().map(maybe_compress),
            ],
        )
        .with_context(|| format!("inserting history entry {}", e.id))?;
        histogram!("persist_put_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("history_record_total", 1u64);
        debug!(id = %e.id, op = e.operation_type.as_str(), success = e.success, "history recorded");
        Ok(())
    }

    fn query(&self, cluster_id: &str, filter: &HistoryFilter, page: u32, page_size: u32) -> Result<HistoryPage> {
        let started = std::time::Instant::now();
        let (page, page_size, offset) = normalize_page(page, page_size);
        let (clause, mut params) = where_clause(cluster_id, filter);
        let db = self.conn()?;

        let total: i64 = db
            .query_row(&format!("SELECT COUNT(*) FROM history WHERE {}", clause), params_from_iter(params.iter()), |r| {
                r.get(0)
            })
            .context("counting history")?;

        params.push(SqlValue::Integer(page_size as i64));
        params.push(SqlValue::Integer(offset as i64));
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM history WHERE {} ORDER BY created_at DESC, seq DESC LIMIT ? OFFSET ?",
            COLUMNS, clause
        ))?;
        let data = stmt
            .query_map(params_from_iter(params.iter()), from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("reading history page")?;
        histogram!("history_query_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(HistoryPage { data, total: total.max(0) as u64, page, page_size })
    }

    fn get(&self, cluster_id: &str, id: &str) -> Result<Option<HistoryEntry>> {
        let db = self.conn()?;
        let row = db
            .query_row(
                &format!("SELECT {} FROM history WHERE cluster_id = ?1 AND id = ?2", COLUMNS),
                [cluster_id, id],
                from_row,
            )
            .optional()
            .with_context(|| format!("reading history entry {}", id))?;
        Ok(row)
    }

    fn latest_success(&self, key: ObjectKey<'_>) -> Result<Option<HistoryEntry>> {
        let db = self.conn()?;
        let row = db
            .query_row(
                &format!(
                    "SELECT {} FROM history
                     WHERE cluster_id = ?1 AND resource_type = ?2 AND resource_name = ?3
                       AND namespace IS ?4 AND api_group IS ?5 AND success = 1
                     ORDER BY created_at DESC, seq DESC LIMIT 1",
                    COLUMNS
                ),
                rusqlite::params![key.cluster_id, key.resource_type, key.name, key.namespace, key.api_group],
                from_row,
            )
            .optional()
            .context("reading latest successful entry")?;
        Ok(row.filter(|e| e.operation_type != OperationType::Delete))
    }
}

fn where_clause(cluster_id: &str, f: &HistoryFilter) -> (String, Vec<SqlValue>) {
    let mut clause = String::from("cluster_id = ?");
    let mut params = vec![SqlValue::Text(cluster_id.to_string())];
    let mut eq = |col: &str, v: SqlValue| {
        clause.push_str(" AND ");
        clause.push_str(col);
        clause.push_str(" = ?");
        params.push(v);
    };
    if let Some(t) = &f.resource_type {
        eq("resource_type", SqlValue::Text(t.clone()));
    }
    if let Some(n) = &f.resource_name {
        eq("resource_name", SqlValue::Text(n.clone()));
    }
    if let Some(ns) = &f.namespace {
        eq("namespace", SqlValue::Text(ns.clone()));
    }
    if let Some(op) = f.operation_type {
        eq("operation_type", SqlValue::Text(op.as_str().to_string()));
    }
    if let Some(s) = f.success {
        eq("success", SqlValue::Integer(s as i64));
    }
    (clause, params)
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<HistoryEntry> {
    let op: String = row.get(7)?;
    let operation_type = op
        .parse::<OperationType>()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, e.into()))?;
    let resource_yaml: Vec<u8> = row.get(13)?;
    let previous_yaml: Option<Vec<u8>> = row.get(14)?;
    Ok(HistoryEntry {
        id: row.get(0)?,
        cluster_id: row.get(1)?,
        resource_type: row.get(2)?,
        resource_name: row.get(3)?,
        namespace: row.get(4)?,
        api_group: row.get(5)?,
        api_version: row.get(6)?,
        operation_type,
        success: row.get(8)?,
        error_message: row.get(9)?,
        operator_id: row.get(10)?,
        operator_name: row.get(11)?,
        created_at: row.get(12)?,
        resource_yaml: maybe_decompress(&resource_yaml),
        previous_yaml: previous_yaml.as_deref().map(maybe_decompress),
    })
}

fn default_db_path() -> String {
    if let Some(home) = std::env::var_os("HOME") {
        let mut p = std::path::PathBuf::from(home);
        p.push(".kview");
        let _ = std::fs::create_dir_all(&p);
        p.push("kview.db");
        return p.to_string_lossy().to_string();
    }
    "kview.db".to_string()
}
