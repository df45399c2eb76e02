//! kview public API façade (in-process).
//!
//! Frontends (the CLI today) depend on [`KviewApi`] only. [`Console`] implements it over a
//! [`ResourceBackend`] and a [`HistoryStore`], bound to one cluster id.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use kview_apply::{diff_entry, ApplyEngine, DiffSummary, Operator};
use kview_core::{
    readiness, render_row, AppliedRef, Cell, ColumnSpec, DateStyle, KviewError, KviewResult, Readiness, RenderCtx,
    ResourceBackend, ResourceKind,
};
use kview_persist::{HistoryEntry, HistoryFilter, HistoryPage, HistoryStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

pub use kview_schema::CrdSchema;

/// Scope of a list view: one kind, optionally one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    pub kind: ResourceKind,
    pub namespace: Option<String>,
}

impl Selector {
    pub fn new(kind: ResourceKind, namespace: Option<String>) -> Self {
        Self { kind, namespace }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRow {
    pub cells: Vec<Cell>,
    pub readiness: Readiness,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableView {
    pub columns: Vec<ColumnSpec>,
    pub rows: Vec<TableRow>,
    /// Objects fetched before the query was applied.
    pub scanned: usize,
}

/// One history entry plus the change it recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryDetail {
    pub entry: HistoryEntry,
    pub diff: Option<DiffSummary>,
}

/// Declarative kview API surface.
#[async_trait::async_trait]
pub trait KviewApi: Send + Sync {
    fn cluster_id(&self) -> &str;

    /// Column set for a kind.
    async fn columns(&self, kind: &ResourceKind) -> KviewResult<Vec<ColumnSpec>>;

    /// Rendered list view, filtered by a free-text query (empty matches everything).
    async fn table(&self, selector: &Selector, query: &str, dates: DateStyle) -> KviewResult<TableView>;

    /// One object as a document.
    async fn get(&self, kind: &ResourceKind, name: &str, namespace: Option<&str>) -> KviewResult<Value>;

    async fn apply(&self, manifest: &str) -> KviewResult<AppliedRef>;

    async fn delete(&self, kind: &ResourceKind, name: &str, namespace: Option<&str>) -> KviewResult<AppliedRef>;

    async fn history(&self, filter: &HistoryFilter, page: u32, page_size: u32) -> KviewResult<HistoryPage>;

    async fn history_detail(&self, id: &str) -> KviewResult<HistoryDetail>;
}

/// Paged history for one cluster.
pub fn list_history(
    store: &dyn HistoryStore,
    cluster_id: &str,
    filter: &HistoryFilter,
    page: u32,
    page_size: u32,
) -> KviewResult<HistoryPage> {
    store.query(cluster_id, filter, page, page_size).map_err(KviewError::internal)
}

/// One entry; ids from other clusters are not visible.
pub fn history_entry(store: &dyn HistoryStore, cluster_id: &str, id: &str) -> KviewResult<HistoryEntry> {
    store
        .get(cluster_id, id)
        .map_err(KviewError::internal)?
        .ok_or_else(|| KviewError::NotFound(format!("history entry {}", id)))
}

/// Render fetched documents as a table. Rows keep input order.
pub fn build_table(kind: &ResourceKind, columns: Vec<ColumnSpec>, docs: &[Value], query: &str, now: DateTime<Utc>, dates: DateStyle) -> TableView {
    let ctx = RenderCtx { kind, now, dates };
    let rows = kview_search::search(docs, kind, query)
        .into_iter()
        .map(|doc| TableRow { cells: render_row(&columns, doc, &ctx), readiness: readiness(kind, doc) })
        .collect();
    TableView { columns, rows, scanned: docs.len() }
}

/// In-process implementation that calls internal crates directly.
pub struct Console {
    cluster_id: String,
    backend: Arc<dyn ResourceBackend>,
    history: Arc<dyn HistoryStore>,
    engine: ApplyEngine,
}

impl Console {
    pub fn new(
        cluster_id: impl Into<String>,
        backend: Arc<dyn ResourceBackend>,
        history: Arc<dyn HistoryStore>,
        operator: Operator,
    ) -> Self {
        let engine = ApplyEngine::new(backend.clone(), history.clone(), operator);
        Self { cluster_id: cluster_id.into(), backend, history, engine }
    }

    /// Kubernetes backend from the ambient kubeconfig and the SQLite history at its default path.
    pub async fn connect(cluster_id: Option<String>, operator: Operator) -> KviewResult<Self> {
        let backend = kview_kubehub::KubeBackend::try_default()
            .await
            .map_err(|e| KviewError::Unavailable(format!("{:#}", e)))?;
        let history = kview_persist::SqliteHistoryStore::open_default().map_err(KviewError::internal)?;
        let cluster_id = cluster_id.or_else(kview_kubehub::current_context).unwrap_or_else(|| "default".to_string());
        info!(cluster = %cluster_id, operator = %operator.id, "api: console connected");
        Ok(Self::new(cluster_id, Arc::new(backend), Arc::new(history), operator))
    }

    pub fn operator(&self) -> &Operator {
        self.engine.operator()
    }
}

#[async_trait::async_trait]
impl KviewApi for Console {
    fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    async fn columns(&self, kind: &ResourceKind) -> KviewResult<Vec<ColumnSpec>> {
        kview_schema::resolve_columns(self.backend.as_ref(), kind).await
    }

    async fn table(&self, selector: &Selector, query: &str, dates: DateStyle) -> KviewResult<TableView> {
        let t0 = Instant::now();
        info!(kind = %selector.kind, ns = %selector.namespace.as_deref().unwrap_or("(all)"), query = %query, "api: table start");
        let columns = self.columns(&selector.kind).await?;
        let docs = self.backend.fetch_list(&selector.kind, selector.namespace.as_deref()).await?;
        let view = build_table(&selector.kind, columns, &docs, query, Utc::now(), dates);
        metrics::histogram!("table_ms", t0.elapsed().as_secs_f64() * 1000.0);
        info!(rows = view.rows.len(), scanned = view.scanned, took_ms = %t0.elapsed().as_millis(), "api: table ok");
        Ok(view)
    }

    async fn get(&self, kind: &ResourceKind, name: &str, namespace: Option<&str>) -> KviewResult<Value> {
        let t0 = Instant::now();
        let doc = self.backend.fetch_resource(kind, name, namespace).await?;
        info!(kind = %kind, name, took_ms = %t0.elapsed().as_millis(), "api: get ok");
        Ok(doc)
    }

    async fn apply(&self, manifest: &str) -> KviewResult<AppliedRef> {
        let t0 = Instant::now();
        info!(bytes = manifest.len(), "api: apply start");
        let res = self.engine.apply(&self.cluster_id, manifest).await;
        info!(took_ms = %t0.elapsed().as_millis(), ok = res.is_ok(), "api: apply done");
        res
    }

    async fn delete(&self, kind: &ResourceKind, name: &str, namespace: Option<&str>) -> KviewResult<AppliedRef> {
        let t0 = Instant::now();
        let res = self.engine.delete(&self.cluster_id, kind, name, namespace).await;
        info!(kind = %kind, name, took_ms = %t0.elapsed().as_millis(), ok = res.is_ok(), "api: delete done");
        res
    }

    async fn history(&self, filter: &HistoryFilter, page: u32, page_size: u32) -> KviewResult<HistoryPage> {
        list_history(self.history.as_ref(), &self.cluster_id, filter, page, page_size)
    }

    async fn history_detail(&self, id: &str) -> KviewResult<HistoryDetail> {
        let entry = history_entry(self.history.as_ref(), &self.cluster_id, id)?;
        let diff = diff_entry(&entry);
        Ok(HistoryDetail { entry, diff })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kview_core::{KnownKind, MemoryBackend, OperationType, ReadinessState};
    use kview_persist::MemoryHistoryStore;
    use serde_json::json;

    fn console(objects: Vec<Value>) -> (Console, Arc<MemoryHistoryStore>) {
        let backend = Arc::new(MemoryBackend::with_objects(objects));
        let history = Arc::new(MemoryHistoryStore::new());
        (Console::new("c1", backend, history.clone(), Operator::new("u-1", "ops")), history)
    }

    fn widget_crd() -> Value {
        json!({
            "apiVersion": "apiextensions.k8s.io/v1",
            "kind": "CustomResourceDefinition",
            "metadata": { "name": "widgets.example.com" },
            "spec": {
                "group": "example.com",
                "names": { "kind": "Widget", "plural": "widgets" },
                "scope": "Namespaced",
                "versions": [{
                    "name": "v1", "served": true, "storage": true,
                    "additionalPrinterColumns": [ { "name": "Phase", "type": "string", "jsonPath": ".status.phase" } ]
                }]
            }
        })
    }

    fn widget(name: &str, phase: Option<&str>) -> Value {
        let mut w = json!({ "apiVersion": "example.com/v1", "kind": "Widget", "metadata": { "name": name, "namespace": "default" } });
        if let Some(p) = phase {
            w["status"] = json!({ "phase": p });
        }
        w
    }

    #[tokio::test]
    async fn crd_table_renders_printer_columns() {
        let (c, _) = console(vec![widget_crd(), widget("a", Some("Ready")), widget("b", None)]);
        let sel = Selector::new(ResourceKind::parse("widgets.example.com"), None);
        let view = c.table(&sel, "", DateStyle::Relative).await.unwrap();
        let headers: Vec<_> = view.columns.iter().map(|c| c.header.as_str()).collect();
        assert_eq!(headers, vec!["Name", "Phase"]);
        let phases: Vec<_> = view.rows.iter().map(|r| r.cells[1].text.as_str()).collect();
        assert_eq!(phases, vec!["Ready", "-"]);
        assert_eq!(view.rows[0].cells[0].link.as_deref(), Some("/crds/widgets.example.com/default/a"));
    }

    #[tokio::test]
    async fn table_filters_and_classifies() {
        let dep = |name: &str, desired: u64, ready: u64| {
            json!({
                "apiVersion": "apps/v1", "kind": "Deployment",
                "metadata": { "name": name, "namespace": "prod" },
                "spec": { "replicas": desired },
                "status": { "readyReplicas": ready }
            })
        };
        let (c, _) = console(vec![dep("web", 3, 3), dep("worker", 3, 1), dep("idle", 0, 0)]);
        let sel = Selector::new(ResourceKind::Known(KnownKind::Deployments), Some("prod".into()));
        let all = c.table(&sel, "", DateStyle::Relative).await.unwrap();
        let states: Vec<_> = all.rows.iter().map(|r| r.readiness).collect();
        assert_eq!(
            states,
            vec![
                Readiness::Replicas(ReadinessState::Available),
                Readiness::Replicas(ReadinessState::InProgress),
                Readiness::Replicas(ReadinessState::Pending),
            ]
        );
        let hits = c.table(&sel, "WORK", DateStyle::Relative).await.unwrap();
        assert_eq!(hits.rows.len(), 1);
        assert_eq!(hits.scanned, 3);
    }

    #[tokio::test]
    async fn missing_crd_is_not_found() {
        let (c, _) = console(vec![]);
        let sel = Selector::new(ResourceKind::parse("gadgets.example.com"), None);
        assert!(matches!(c.table(&sel, "", DateStyle::Relative).await, Err(KviewError::NotFound(_))));
    }

    #[tokio::test]
    async fn apply_then_browse_history() {
        let (c, _) = console(vec![]);
        let v1 = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: app\n  namespace: default\ndata:\n  a: \"1\"\n";
        let v2 = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: app\n  namespace: default\ndata:\n  a: \"2\"\n  b: \"3\"\n";
        c.apply(v1).await.unwrap();
        c.apply(v2).await.unwrap();
        assert_eq!(c.apply("   ").await, Err(KviewError::EmptyInput));

        let page = c.history(&HistoryFilter::default(), 1, 20).await.unwrap();
        assert_eq!(page.total, 2);
        let newest = &page.data[0];
        assert_eq!(newest.operation_type, OperationType::Update);

        let detail = c.history_detail(&newest.id).await.unwrap();
        assert_eq!(detail.entry.previous_yaml.as_deref(), Some(v1));
        assert_eq!(detail.diff, Some(DiffSummary { adds: 1, updates: 1, removes: 0 }));

        let doc = c.get(&ResourceKind::Known(KnownKind::ConfigMaps), "app", Some("default")).await.unwrap();
        assert_eq!(doc["data"]["b"], "3");
    }

    #[tokio::test]
    async fn history_detail_is_scoped_to_the_cluster() {
        let (c, history) = console(vec![]);
        c.apply("apiVersion: v1\nkind: Namespace\nmetadata:\n  name: team-a\n").await.unwrap();
        let id = history.snapshot()[0].id.clone();
        assert!(c.history_detail(&id).await.is_ok());
        assert!(matches!(history_entry(&*history, "other", &id), Err(KviewError::NotFound(_))));
        assert!(matches!(c.history_detail("nope").await, Err(KviewError::NotFound(_))));
    }
}
