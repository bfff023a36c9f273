//! Retrieval orchestrator: sequential, failure-isolated search fan-out with a
//! cooperative deadline.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use taxdesk_shared::{CatalogStore, RetrievalOptions, SearchBackend};

/// What a retrieval produced, partition by partition.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrievalOutcome {
    /// Partition id to the snippets its search returned.
    pub by_partition: BTreeMap<String, Vec<String>>,
    /// Partition id to the error message of its failed search.
    pub errors: BTreeMap<String, String>,
    /// Registered ids that survived the cap, in request order.
    pub partitions_queried: Vec<String>,
    /// The deadline passed before every partition was searched.
    pub timed_out: bool,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl RetrievalOutcome {
    /// Snippet count per searched partition.
    pub fn hits(&self) -> BTreeMap<&str, usize> {
        self.by_partition
            .iter()
            .map(|(id, snippets)| (id.as_str(), snippets.len()))
            .collect()
    }
}

/// Runs planned searches against a [`SearchBackend`].
pub struct Retriever {
    catalog: Arc<CatalogStore>,
    backend: Arc<dyn SearchBackend>,
}

impl Retriever {
    pub fn new(catalog: Arc<CatalogStore>, backend: Arc<dyn SearchBackend>) -> Self {
        Self { catalog, backend }
    }

    /// Search `query` in each requested partition.
    ///
    /// The request is truncated to `options.max_partitions`, unregistered ids
    /// are dropped with a warning, and partitions are searched one at a time.
    /// The deadline is checked before each call; a failing search is recorded
    /// and does not stop the others. Never returns an error.
    pub async fn retrieve(
        &self,
        query: &str,
        partition_ids: &[String],
        options: &RetrievalOptions,
    ) -> RetrievalOutcome {
        let requested = &partition_ids[..partition_ids.len().min(options.max_partitions)];
        let (valid, invalid): (Vec<String>, Vec<String>) = requested
            .iter()
            .cloned()
            .partition(|id| self.catalog.is_valid_partition_id(id));

        if !invalid.is_empty() {
            warn!(invalid = ?invalid, "ignoring unknown partition ids");
        }

        let mut outcome = RetrievalOutcome {
            partitions_queried: valid,
            ..Default::default()
        };

        let start = Instant::now();
        for partition_id in &outcome.partitions_queried {
            if start.elapsed() > options.timeout {
                warn!(
                    timeout_ms = options.timeout.as_millis() as u64,
                    "retrieval deadline reached, skipping remaining partitions"
                );
                outcome.timed_out = true;
                break;
            }

            match self.backend.search(partition_id, query).await {
                Ok(snippets) => {
                    debug!(%partition_id, results = snippets.len(), "search completed");
                    outcome.by_partition.insert(partition_id.clone(), snippets);
                }
                Err(e) => {
                    warn!(%partition_id, error = %e, "search failed");
                    outcome.errors.insert(partition_id.clone(), e.to_string());
                }
            }
        }
        outcome.elapsed = start.elapsed();

        info!(
            queried = outcome.partitions_queried.len(),
            searched = outcome.by_partition.len(),
            failed = outcome.errors.len(),
            timed_out = outcome.timed_out,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "retrieval completed"
        );

        outcome
    }
}
