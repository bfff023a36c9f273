//! Turso Embedded / libSQL storage layer (offline mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding the portal
//! change-detection state, the scan history and the catalog of classified
//! documents with full-text search.
//!
//! [`Storage`] implements both [`PortalStateStore`] (for the portal watcher)
//! and [`SearchBackend`] (for the retrieval orchestrator).
//!
//! **Access rules:**
//! - `taxdesk scan`: read-write (sole writer) via [`Storage::open`]
//! - `taxdesk ask`: read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use serde::Serialize;
use taxdesk_shared::{
    ClassificationResult, ClassificationStrategy, DiscoveredDocument, PortalState,
    PortalStateStore, Result, SearchBackend, TaxDeskError,
};
use uuid::Uuid;

/// Key of the singleton portal state row.
pub const GLOBAL_STATE_KEY: &str = "global";

/// Snippets returned per partition by [`SearchBackend::search`].
pub const DEFAULT_SEARCH_LIMIT: u32 = 5;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TaxDeskError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| TaxDeskError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| TaxDeskError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| TaxDeskError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| TaxDeskError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    TaxDeskError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0,
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(TaxDeskError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Portal state
    // -----------------------------------------------------------------------

    /// Load the portal state stored under `key`.
    pub async fn load_portal_state(&self, key: &str) -> Result<Option<PortalState>> {
        let mut rows = self
            .conn
            .query(
                "SELECT last_run, seen_json FROM portal_state WHERE key = ?1",
                params![key],
            )
            .await
            .map_err(|e| TaxDeskError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let last_run = match row.get::<String>(0).ok() {
                    Some(s) => Some(parse_timestamp(&s)?),
                    None => None,
                };
                let seen_json: String = row
                    .get(1)
                    .map_err(|e| TaxDeskError::Storage(e.to_string()))?;
                let seen = serde_json::from_str(&seen_json)
                    .map_err(|e| TaxDeskError::Storage(format!("corrupt portal state: {e}")))?;
                Ok(Some(PortalState { last_run, seen }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(TaxDeskError::Storage(e.to_string())),
        }
    }

    /// Upsert the portal state under `key`. A missing `last_run` is stored as now.
    pub async fn save_portal_state(&self, key: &str, state: &PortalState) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now();
        let last_run = state.last_run.unwrap_or(now).to_rfc3339();
        let seen_json = serde_json::to_string(&state.seen)
            .map_err(|e| TaxDeskError::Storage(e.to_string()))?;
        self.conn
            .execute(
                "INSERT INTO portal_state (key, last_run, seen_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key) DO UPDATE SET
                   last_run = excluded.last_run,
                   seen_json = excluded.seen_json,
                   updated_at = excluded.updated_at",
                params![key, last_run.as_str(), seen_json.as_str(), now.to_rfc3339()],
            )
            .await
            .map_err(|e| TaxDeskError::Storage(e.to_string()))?;
        tracing::debug!(
            key,
            fingerprints = state.fingerprint_count(),
            "saved portal state"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Scan runs
    // -----------------------------------------------------------------------

    /// Insert a new scan run under the watcher-assigned `run_id`.
    pub async fn insert_scan_run(&self, run_id: &str, started_at: DateTime<Utc>) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO scan_runs (id, started_at) VALUES (?1, ?2)",
                params![run_id, started_at.to_rfc3339()],
            )
            .await
            .map_err(|e| TaxDeskError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Mark a scan run finished with its statistics.
    pub async fn finish_scan_run(&self, run_id: &str, stats_json: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE scan_runs SET finished_at = ?1, stats_json = ?2 WHERE id = ?3",
                params![now.as_str(), stats_json, run_id],
            )
            .await
            .map_err(|e| TaxDeskError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Most recent scan runs first.
    pub async fn list_scan_runs(&self, limit: u32) -> Result<Vec<ScanRunRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, started_at, finished_at, stats_json
                 FROM scan_runs ORDER BY started_at DESC, id DESC LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(|e| TaxDeskError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let started_at: String = row
                .get(1)
                .map_err(|e| TaxDeskError::Storage(e.to_string()))?;
            let finished_at = match row.get::<String>(2).ok() {
                Some(s) => Some(parse_timestamp(&s)?),
                None => None,
            };
            results.push(ScanRunRecord {
                id: row
                    .get(0)
                    .map_err(|e| TaxDeskError::Storage(e.to_string()))?,
                started_at: parse_timestamp(&started_at)?,
                finished_at,
                stats_json: row.get::<String>(3).ok(),
            });
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Document catalog
    // -----------------------------------------------------------------------

    /// Record a classified document, keyed by fingerprint.
    ///
    /// Returns `true` when the document was new. A known fingerprint has its
    /// classification replaced.
    pub async fn record_document(
        &self,
        doc: &DiscoveredDocument,
        classification: &ClassificationResult,
    ) -> Result<bool> {
        self.check_writable()?;
        let fingerprint = doc.dedup_key();
        let existed = self.get_document(fingerprint).await?.is_some();

        let tags = serde_json::to_string(&classification.tags)
            .map_err(|e| TaxDeskError::Storage(e.to_string()))?;
        let metadata =
            serde_json::to_string(doc).map_err(|e| TaxDeskError::Storage(e.to_string()))?;
        let id = Uuid::now_v7().to_string();

        self.conn
            .execute(
                "INSERT INTO documents (id, fingerprint, portal_id, portal_type, title, url,
                   published_at, detected_at, partition_id, strategy, confidence, tags,
                   rationale, metadata_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT(fingerprint) DO UPDATE SET
                   title = excluded.title,
                   partition_id = excluded.partition_id,
                   strategy = excluded.strategy,
                   confidence = excluded.confidence,
                   tags = excluded.tags,
                   rationale = excluded.rationale,
                   metadata_json = excluded.metadata_json",
                params![
                    id.as_str(),
                    fingerprint,
                    doc.portal_id.as_str(),
                    doc.portal_type.as_str(),
                    doc.title.as_str(),
                    doc.url.as_str(),
                    doc.published_at.to_rfc3339(),
                    doc.detected_at.to_rfc3339(),
                    classification.partition_id.as_str(),
                    classification.strategy.as_str(),
                    classification.confidence_score,
                    tags.as_str(),
                    classification.rationale.as_str(),
                    metadata.as_str(),
                ],
            )
            .await
            .map_err(|e| TaxDeskError::Storage(e.to_string()))?;
        Ok(!existed)
    }

    /// Get a catalog document by fingerprint.
    pub async fn get_document(&self, fingerprint: &str) -> Result<Option<CatalogDocument>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE fingerprint = ?1"),
                params![fingerprint],
            )
            .await
            .map_err(|e| TaxDeskError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_document(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(TaxDeskError::Storage(e.to_string())),
        }
    }

    /// List catalog documents, newest first, optionally for one partition.
    pub async fn list_documents(
        &self,
        partition_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<CatalogDocument>> {
        let mut rows = match partition_id {
            Some(partition) => {
                self.conn
                    .query(
                        &format!(
                            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE partition_id = ?1
                             ORDER BY detected_at DESC, id DESC LIMIT ?2"
                        ),
                        params![partition, limit],
                    )
                    .await
            }
            None => {
                self.conn
                    .query(
                        &format!(
                            "SELECT {DOCUMENT_COLUMNS} FROM documents
                             ORDER BY detected_at DESC, id DESC LIMIT ?1"
                        ),
                        params![limit],
                    )
                    .await
            }
        }
        .map_err(|e| TaxDeskError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_document(&row)?);
        }
        Ok(results)
    }

    /// Number of catalog documents per partition.
    pub async fn count_documents_by_partition(&self) -> Result<Vec<(String, u64)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT partition_id, COUNT(*) FROM documents GROUP BY partition_id ORDER BY partition_id",
                params![],
            )
            .await
            .map_err(|e| TaxDeskError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let partition: String = row
                .get(0)
                .map_err(|e| TaxDeskError::Storage(e.to_string()))?;
            let count: i64 = row.get(1).unwrap_or(0);
            results.push((partition, count.max(0) as u64));
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // FTS search
    // -----------------------------------------------------------------------

    /// Full-text search over the documents of a single partition.
    pub async fn search_partition(
        &self,
        partition_id: &str,
        query: &str,
        limit: u32,
    ) -> Result<Vec<SearchResult>> {
        let Some(match_expr) = fts_query(query) else {
            return Ok(Vec::new());
        };

        let mut rows = self
            .conn
            .query(
                "SELECT d.title, d.url, d.rationale, rank
                 FROM documents_fts fts
                 JOIN documents d ON d.rowid = fts.rowid
                 WHERE documents_fts MATCH ?1 AND d.partition_id = ?2
                 ORDER BY rank
                 LIMIT ?3",
                params![match_expr.as_str(), partition_id, limit],
            )
            .await
            .map_err(|e| TaxDeskError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(SearchResult {
                title: row
                    .get(0)
                    .map_err(|e| TaxDeskError::Storage(e.to_string()))?,
                url: row
                    .get(1)
                    .map_err(|e| TaxDeskError::Storage(e.to_string()))?,
                rationale: row.get::<String>(2).unwrap_or_default(),
                score: row.get(3).unwrap_or(0.0),
            });
        }
        Ok(results)
    }
}

#[async_trait]
impl PortalStateStore for Storage {
    async fn load_state(&self) -> Result<Option<PortalState>> {
        self.load_portal_state(GLOBAL_STATE_KEY).await
    }

    async fn save_state(&self, state: &PortalState) -> Result<()> {
        self.save_portal_state(GLOBAL_STATE_KEY, state).await
    }
}

#[async_trait]
impl SearchBackend for Storage {
    async fn search(&self, partition_id: &str, query: &str) -> Result<Vec<String>> {
        let hits = self
            .search_partition(partition_id, query, DEFAULT_SEARCH_LIMIT)
            .await
            .map_err(|e| TaxDeskError::Search(format!("{partition_id}: {e}")))?;
        Ok(hits.iter().map(SearchResult::to_snippet).collect())
    }
}

/// A search result from FTS5.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    /// Why the document was routed to its partition.
    pub rationale: String,
    /// FTS5 rank score (lower is better).
    pub score: f64,
}

impl SearchResult {
    /// Render as a context snippet.
    pub fn to_snippet(&self) -> String {
        format!("{}\n{}", self.title, self.url)
    }
}

/// A classified document as stored in the catalog.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogDocument {
    pub id: String,
    pub fingerprint: String,
    pub portal_id: String,
    pub portal_type: String,
    pub title: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub detected_at: DateTime<Utc>,
    pub partition_id: String,
    pub strategy: ClassificationStrategy,
    pub confidence: Option<f64>,
    pub tags: Vec<String>,
    pub rationale: String,
}

/// A row of the scan history.
#[derive(Debug, Clone, Serialize)]
pub struct ScanRunRecord {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stats_json: Option<String>,
}

const DOCUMENT_COLUMNS: &str = "id, fingerprint, portal_id, portal_type, title, url, \
     published_at, detected_at, partition_id, strategy, confidence, tags, rationale";

/// Convert a database row to a [`CatalogDocument`].
fn row_to_document(row: &libsql::Row) -> Result<CatalogDocument> {
    let text = |idx: i32| -> Result<String> {
        row.get::<String>(idx)
            .map_err(|e| TaxDeskError::Storage(e.to_string()))
    };

    let strategy = text(9)?
        .parse::<ClassificationStrategy>()
        .map_err(TaxDeskError::Storage)?;
    let tags = serde_json::from_str(&text(11)?)
        .map_err(|e| TaxDeskError::Storage(format!("corrupt tags: {e}")))?;

    Ok(CatalogDocument {
        id: text(0)?,
        fingerprint: text(1)?,
        portal_id: text(2)?,
        portal_type: text(3)?,
        title: text(4)?,
        url: text(5)?,
        published_at: parse_timestamp(&text(6)?)?,
        detected_at: parse_timestamp(&text(7)?)?,
        partition_id: text(8)?,
        strategy,
        confidence: row.get::<f64>(10).ok(),
        tags,
        rationale: text(12)?,
    })
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TaxDeskError::Storage(format!("invalid date: {e}")))
}

/// Turn free text into an FTS5 `MATCH` expression: every word of two or more
/// characters, quoted, OR-ed together. `None` when no word survives.
fn fts_query(text: &str) -> Option<String> {
    let mut terms: Vec<String> = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        if word.chars().count() < 2 {
            continue;
        }
        let term = format!("\"{}\"", word.to_lowercase());
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}
