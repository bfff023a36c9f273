//! End-to-end workflows.
//!
//! - [`QueryPipeline`]: question → triage → plan → retrieval → rendered context
//! - [`run_scan`]: portal scan → classification → catalog recording

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use taxdesk_crawler::{PortalWatcher, ScanReport};
use taxdesk_shared::{
    CatalogStore, ClassificationResult, DiscoveredDocument, QuestionIntent, Result,
    RetrievalOptions, SearchBackend,
};
use taxdesk_storage::Storage;

use crate::classifier::DocumentClassifier;
use crate::planner::plan_partitions;
use crate::retrieval::{RetrievalOutcome, Retriever};
use crate::triage::classify_question;

// ---------------------------------------------------------------------------
// Query pipeline
// ---------------------------------------------------------------------------

/// Everything the routing pipeline learned about a question.
#[derive(Debug, Clone, Serialize)]
pub struct QueryContext {
    pub question: String,
    pub intent: QuestionIntent,
    pub plan: Vec<String>,
    pub outcome: RetrievalOutcome,
    /// Pre-retrieved context handed to the answering agent.
    pub context: String,
}

/// Triage, plan and retrieve for one question.
pub struct QueryPipeline {
    catalog: Arc<CatalogStore>,
    retriever: Retriever,
    options: RetrievalOptions,
}

impl QueryPipeline {
    pub fn new(
        catalog: Arc<CatalogStore>,
        search: Arc<dyn SearchBackend>,
        options: RetrievalOptions,
    ) -> Self {
        Self {
            retriever: Retriever::new(Arc::clone(&catalog), search),
            catalog,
            options,
        }
    }

    /// Run the pipeline. A question always yields a context, possibly empty.
    #[instrument(skip_all, fields(question_len = question.len()))]
    pub async fn run(&self, question: &str) -> QueryContext {
        let start = Instant::now();

        let intent = classify_question(question);
        let plan = plan_partitions(&intent, &self.catalog);
        let outcome = self.retriever.retrieve(question, &plan, &self.options).await;
        let context = render_context(&outcome);

        info!(
            trail = %intent.trail,
            partitions_queried = ?outcome.partitions_queried,
            hits = ?outcome.hits(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "query pipeline completed"
        );

        QueryContext {
            question: question.to_string(),
            intent,
            plan,
            outcome,
            context,
        }
    }
}

/// `## <partition>` blocks in query order, separated by `---` rules.
/// Partitions without snippets are left out.
pub fn render_context(outcome: &RetrievalOutcome) -> String {
    outcome
        .partitions_queried
        .iter()
        .filter_map(|id| {
            let snippets = outcome.by_partition.get(id)?;
            (!snippets.is_empty()).then(|| format!("## {id}\n{}", snippets.join("\n\n")))
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

// ---------------------------------------------------------------------------
// Scan pipeline
// ---------------------------------------------------------------------------

/// A fresh document with its partition assignment.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifiedDocument {
    pub document: DiscoveredDocument,
    pub classification: ClassificationResult,
}

/// Result of [`run_scan`].
#[derive(Debug, Clone, Serialize)]
pub struct ScanOutcome {
    pub report: ScanReport,
    pub classified: Vec<ClassifiedDocument>,
    /// Documents whose fingerprint was new to the catalog.
    pub recorded_new: usize,
    /// Documents the catalog refused; they stay in `classified`.
    pub record_failed: usize,
}

/// Where [`run_scan`] books runs and classified documents.
#[async_trait]
pub trait ScanRecorder: Send + Sync {
    async fn insert_scan_run(&self, run_id: &str, started_at: DateTime<Utc>) -> Result<()>;
    /// `true` when the document was new.
    async fn record_document(
        &self,
        document: &DiscoveredDocument,
        classification: &ClassificationResult,
    ) -> Result<bool>;
    async fn finish_scan_run(&self, run_id: &str, stats_json: &str) -> Result<()>;
}

#[async_trait]
impl ScanRecorder for Storage {
    async fn insert_scan_run(&self, run_id: &str, started_at: DateTime<Utc>) -> Result<()> {
        Storage::insert_scan_run(self, run_id, started_at).await
    }

    async fn record_document(
        &self,
        document: &DiscoveredDocument,
        classification: &ClassificationResult,
    ) -> Result<bool> {
        Storage::record_document(self, document, classification).await
    }

    async fn finish_scan_run(&self, run_id: &str, stats_json: &str) -> Result<()> {
        Storage::finish_scan_run(self, run_id, stats_json).await
    }
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after each fresh document is classified.
    fn document_classified(&self, title: &str, partition_id: &str, current: usize, total: usize);
    /// Called when the pipeline completes.
    fn done(&self, outcome: &ScanOutcome);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn document_classified(&self, _title: &str, _partition_id: &str, _current: usize, _total: usize) {}
    fn done(&self, _outcome: &ScanOutcome) {}
}

/// Scan every portal, classify the fresh documents and record them.
///
/// 1. Change detection (state saved by the watcher)
/// 2. Scan-run bookkeeping
/// 3. Classification of each fresh document
/// 4. Catalog upsert
///
/// Only a failed scan is an error. Bookkeeping and per-document storage
/// failures are logged and counted in `record_failed`, and the run is
/// always finished.
#[instrument(skip_all)]
pub async fn run_scan(
    watcher: &PortalWatcher,
    classifier: &DocumentClassifier,
    recorder: &dyn ScanRecorder,
    progress: &dyn ProgressReporter,
) -> Result<ScanOutcome> {
    progress.phase("Scanning portals");
    let report = watcher.scan().await?;
    if let Err(error) = recorder
        .insert_scan_run(&report.run_id, report.started_at)
        .await
    {
        warn!(run_id = %report.run_id, %error, "failed to open scan run record");
    }

    for (portal_id, error) in &report.portals_failed {
        warn!(%portal_id, %error, "portal skipped in this run");
    }

    progress.phase("Classifying documents");
    let total = report.documents.len();
    let mut classified = Vec::with_capacity(total);
    let mut recorded_new = 0;
    let mut record_failed = 0;

    for (i, document) in report.documents.iter().enumerate() {
        let classification = classifier.classify(document).await;
        match recorder.record_document(document, &classification).await {
            Ok(true) => recorded_new += 1,
            Ok(false) => {}
            Err(error) => {
                record_failed += 1;
                warn!(title = %document.title, url = %document.url, %error, "failed to record document");
            }
        }
        progress.document_classified(&document.title, &classification.partition_id, i + 1, total);
        classified.push(ClassifiedDocument {
            document: document.clone(),
            classification,
        });
    }

    let mut stats = report.stats_json();
    stats["recorded_new"] = recorded_new.into();
    stats["record_failed"] = record_failed.into();
    if let Err(error) = recorder
        .finish_scan_run(&report.run_id, &stats.to_string())
        .await
    {
        warn!(run_id = %report.run_id, %error, "failed to close scan run record");
    }

    let outcome = ScanOutcome {
        report,
        classified,
        recorded_new,
        record_failed,
    };
    progress.done(&outcome);

    info!(
        run_id = %outcome.report.run_id,
        fresh = outcome.classified.len(),
        recorded_new = outcome.recorded_new,
        record_failed = outcome.record_failed,
        "scan pipeline complete"
    );

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use url::Url;
    use uuid::Uuid;

    use taxdesk_shared::{
        ClassificationStrategy, PageFetcher, PartitionDescriptor, PortalDefinition, PortalType,
        TaxDeskError,
    };

    use crate::retrieval::tests::FakeSearch;

    #[test]
    fn render_skips_empty_and_keeps_query_order() {
        let mut outcome = RetrievalOutcome {
            partitions_queried: vec!["vs_b".into(), "vs_a".into(), "vs_c".into()],
            ..Default::default()
        };
        outcome
            .by_partition
            .insert("vs_a".into(), vec!["a1".into(), "a2".into()]);
        outcome.by_partition.insert("vs_b".into(), vec!["b1".into()]);
        outcome.by_partition.insert("vs_c".into(), vec![]);

        assert_eq!(
            render_context(&outcome),
            "## vs_b\nb1\n\n---\n\n## vs_a\na1\n\na2"
        );
        assert_eq!(render_context(&RetrievalOutcome::default()), "");
    }

    #[tokio::test]
    async fn query_pipeline_routes_and_renders() {
        let catalog = Arc::new(CatalogStore::builtin().unwrap());
        let search = Arc::new(FakeSearch {
            failing: vec!["vs_legal_federal".into()],
            ..Default::default()
        });
        let pipeline = QueryPipeline::new(catalog, search, RetrievalOptions::default());

        let ctx = pipeline.run("Qual a alíquota de ICMS para SP?").await;
        assert_eq!(ctx.intent.uf.as_deref(), Some("SP"));
        assert_eq!(ctx.plan[0], "vs_tabelas_fiscais");
        assert!(ctx.outcome.errors.contains_key("vs_legal_federal"));
        assert!(ctx.context.starts_with("## vs_tabelas_fiscais\n"));
        assert!(ctx.context.contains("## vs_legal_estados\n"));
        assert!(!ctx.context.contains("vs_legal_federal"));
    }

    #[tokio::test]
    async fn query_pipeline_honours_timeout() {
        let catalog = Arc::new(CatalogStore::builtin().unwrap());
        let search = Arc::new(FakeSearch {
            delay: Duration::from_millis(40),
            ..Default::default()
        });
        let options = RetrievalOptions {
            timeout: Duration::from_millis(5),
            max_partitions: 3,
        };
        let ctx = QueryPipeline::new(catalog, search, options)
            .run("Quais as regras de transição a partir de 2026?")
            .await;
        assert!(ctx.outcome.timed_out);
        assert_eq!(ctx.outcome.by_partition.len(), 1);
    }

    struct StaticFetcher(HashMap<String, String>);

    #[async_trait]
    impl PageFetcher for StaticFetcher {
        async fn fetch(&self, url: &Url) -> Result<String> {
            self.0
                .get(url.as_str())
                .cloned()
                .ok_or_else(|| TaxDeskError::Network(format!("{url}: not found")))
        }
    }

    #[tokio::test]
    async fn scan_pipeline_classifies_and_records_once() {
        let db = std::env::temp_dir().join(format!("taxdesk_test_{}.db", Uuid::now_v7()));
        let storage = Arc::new(Storage::open(&db).await.unwrap());

        let portal = PortalDefinition {
            id: "nfe-svrs".into(),
            name: "SVRS NF-e".into(),
            base_url: "https://dfe-portal.svrs.rs.gov.br".into(),
            listing_path: "/Documentos".into(),
            portal_type: PortalType::National,
        };
        let partitions = CatalogStore::builtin().unwrap().list_partitions();
        let catalog = Arc::new(CatalogStore::from_parts(vec![portal], partitions).unwrap());

        let fetcher = StaticFetcher(HashMap::from([(
            "https://dfe-portal.svrs.rs.gov.br/Documentos".to_string(),
            r#"<a href="/Documentos/NT2025.001.pdf">Nota Técnica 2025.001</a>
               <a href="/Documentos/tabela_cfop.csv">Tabela CFOP</a>"#
                .to_string(),
        )]));

        let watcher = PortalWatcher::new(Arc::clone(&catalog), Arc::new(fetcher), storage.clone());
        let classifier = DocumentClassifier::heuristic_only(Arc::clone(&catalog));

        let first = run_scan(&watcher, &classifier, storage.as_ref(), &SilentProgress)
            .await
            .unwrap();
        assert_eq!(first.classified.len(), 2);
        assert_eq!(first.recorded_new, 2);
        assert_eq!(
            first.classified[0].classification.partition_id,
            "vs_specs_mercadorias"
        );
        assert_eq!(
            first.classified[1].classification.partition_id,
            "vs_tabelas_fiscais"
        );
        assert!(first
            .classified
            .iter()
            .all(|c| c.classification.strategy == ClassificationStrategy::Heuristic));

        let second = run_scan(&watcher, &classifier, storage.as_ref(), &SilentProgress)
            .await
            .unwrap();
        assert!(second.classified.is_empty());

        let runs = storage.list_scan_runs(10).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|r| r.finished_at.is_some()));

        let hits = storage
            .search_partition("vs_tabelas_fiscais", "CFOP", 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Tabela CFOP");
    }

    /// Delegates to [`Storage`] but refuses the `fail_on`-th document.
    struct FlakyRecorder {
        inner: Arc<Storage>,
        fail_on: usize,
        calls: AtomicUsize,
        finished_stats: Mutex<Option<String>>,
    }

    #[async_trait]
    impl ScanRecorder for FlakyRecorder {
        async fn insert_scan_run(&self, run_id: &str, started_at: DateTime<Utc>) -> Result<()> {
            self.inner.insert_scan_run(run_id, started_at).await
        }

        async fn record_document(
            &self,
            document: &DiscoveredDocument,
            classification: &ClassificationResult,
        ) -> Result<bool> {
            if self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
                return Err(TaxDeskError::Storage("database is locked".into()));
            }
            self.inner.record_document(document, classification).await
        }

        async fn finish_scan_run(&self, run_id: &str, stats_json: &str) -> Result<()> {
            *self.finished_stats.lock().unwrap() = Some(stats_json.to_string());
            self.inner.finish_scan_run(run_id, stats_json).await
        }
    }

    #[tokio::test]
    async fn scan_pipeline_survives_a_failed_record() {
        let db = std::env::temp_dir().join(format!("taxdesk_test_{}.db", Uuid::now_v7()));
        let storage = Arc::new(Storage::open(&db).await.unwrap());

        let portal = PortalDefinition {
            id: "nfe-svrs".into(),
            name: "SVRS NF-e".into(),
            base_url: "https://dfe-portal.svrs.rs.gov.br".into(),
            listing_path: "/Documentos".into(),
            portal_type: PortalType::National,
        };
        let partitions = CatalogStore::builtin().unwrap().list_partitions();
        let catalog = Arc::new(CatalogStore::from_parts(vec![portal], partitions).unwrap());

        let fetcher = StaticFetcher(HashMap::from([(
            "https://dfe-portal.svrs.rs.gov.br/Documentos".to_string(),
            r#"<a href="/Documentos/NT2025.001.pdf">Nota Técnica 2025.001</a>
               <a href="/Documentos/tabela_cfop.csv">Tabela CFOP</a>
               <a href="/Documentos/NT2025.002.pdf">Nota Técnica 2025.002</a>"#
                .to_string(),
        )]));

        let watcher = PortalWatcher::new(Arc::clone(&catalog), Arc::new(fetcher), storage.clone());
        let classifier = DocumentClassifier::heuristic_only(Arc::clone(&catalog));
        let recorder = FlakyRecorder {
            inner: storage.clone(),
            fail_on: 2,
            calls: AtomicUsize::new(0),
            finished_stats: Mutex::new(None),
        };

        let outcome = run_scan(&watcher, &classifier, &recorder, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(outcome.classified.len(), 3);
        assert_eq!(outcome.recorded_new, 2);
        assert_eq!(outcome.record_failed, 1);
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 3);

        let stats: serde_json::Value =
            serde_json::from_str(recorder.finished_stats.lock().unwrap().as_deref().unwrap())
                .unwrap();
        assert_eq!(stats["record_failed"], 1);
        assert_eq!(stats["recorded_new"], 2);

        let runs = storage.list_scan_runs(10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert!(runs[0].finished_at.is_some());

        let recorded = storage
            .search_partition("vs_specs_mercadorias", "002", 5)
            .await
            .unwrap();
        assert_eq!(recorded.len(), 1);
        assert!(storage
            .search_partition("vs_tabelas_fiscais", "CFOP", 5)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn empty_portal_list_scans_nothing() {
        let db = std::env::temp_dir().join(format!("taxdesk_test_{}.db", Uuid::now_v7()));
        let storage = Arc::new(Storage::open(&db).await.unwrap());
        let catalog = Arc::new(
            CatalogStore::from_parts(
                vec![],
                vec![PartitionDescriptor {
                    id: "vs_only".into(),
                    description: "única partição".into(),
                }],
            )
            .unwrap(),
        );
        let watcher = PortalWatcher::new(
            Arc::clone(&catalog),
            Arc::new(StaticFetcher(HashMap::new())),
            storage.clone(),
        );
        let outcome = run_scan(
            &watcher,
            &DocumentClassifier::heuristic_only(catalog),
            storage.as_ref(),
            &SilentProgress,
        )
        .await
        .unwrap();
        assert_eq!(outcome.report.portals_scanned, 0);
        assert!(outcome.classified.is_empty());
    }
}
