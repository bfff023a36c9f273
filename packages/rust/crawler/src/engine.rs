//! Portal change-detection engine.
//!
//! The watcher walks every configured portal in order, parses its listing
//! page, enriches the documents and keeps only the ones whose fingerprint was
//! never emitted before for that portal. The seen-set is persisted once at the
//! end of the scan through a [`PortalStateStore`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};
use url::Url;
use uuid::Uuid;

use taxdesk_shared::{
    CatalogStore, DiscoveredDocument, PageFetcher, PortalDefinition, PortalState,
    PortalStateStore, Result, TaxDeskError,
};

use crate::listing::parse_listing;
use crate::metadata::enrich;

// ---------------------------------------------------------------------------
// ScanReport
// ---------------------------------------------------------------------------

/// Summary of a completed scan.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    /// Identifier of this scan run (UUID v7).
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    /// Fresh documents, in portal order then listing order.
    pub documents: Vec<DiscoveredDocument>,
    /// Portals whose listing was fetched and parsed.
    pub portals_scanned: usize,
    /// Portals that failed (portal ID, error message).
    pub portals_failed: Vec<(String, String)>,
    /// Documents parsed across all portals, fresh or not.
    pub parsed_total: usize,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

impl ScanReport {
    /// Statistics as a JSON object (documents omitted).
    pub fn stats_json(&self) -> serde_json::Value {
        serde_json::json!({
            "status": if self.portals_failed.is_empty() { "completed" } else { "completed_with_errors" },
            "portals_scanned": self.portals_scanned,
            "portals_failed": self.portals_failed.len(),
            "parsed": self.parsed_total,
            "fresh": self.documents.len(),
            "elapsed_ms": self.elapsed.as_millis() as u64,
        })
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

// ---------------------------------------------------------------------------
// PortalWatcher
// ---------------------------------------------------------------------------

/// Sequential change detector over the portal catalog.
pub struct PortalWatcher {
    catalog: Arc<CatalogStore>,
    fetcher: Arc<dyn PageFetcher>,
    state_store: Arc<dyn PortalStateStore>,
}

impl PortalWatcher {
    pub fn new(
        catalog: Arc<CatalogStore>,
        fetcher: Arc<dyn PageFetcher>,
        state_store: Arc<dyn PortalStateStore>,
    ) -> Self {
        Self {
            catalog,
            fetcher,
            state_store,
        }
    }

    /// Scan every portal and return the fresh documents.
    ///
    /// A failing portal is recorded and skipped. The state is saved even when
    /// every portal failed; storage errors abort the scan.
    #[instrument(skip_all)]
    pub async fn scan(&self) -> Result<ScanReport> {
        let start = Instant::now();
        let started_at = Utc::now();
        let run_id = Uuid::now_v7().to_string();

        let mut state = self.state_store.load_state().await?.unwrap_or_default();
        let portals = self.catalog.list_portals();

        info!(%run_id, portals = portals.len(), "starting portal scan");

        let mut documents = Vec::new();
        let mut portals_failed = Vec::new();
        let mut portals_scanned = 0;
        let mut parsed_total = 0;

        for portal in &portals {
            match self.scan_portal(portal, &mut state).await {
                Ok((parsed, fresh)) => {
                    info!(
                        portal_id = %portal.id,
                        parsed,
                        fresh = fresh.len(),
                        "portal scanned"
                    );
                    portals_scanned += 1;
                    parsed_total += parsed;
                    documents.extend(fresh);
                }
                Err(e) => {
                    warn!(portal_id = %portal.id, error = %e, "portal scan failed");
                    portals_failed.push((portal.id.clone(), e.to_string()));
                }
            }
        }

        state.last_run = Some(Utc::now());
        self.state_store.save_state(&state).await?;

        let report = ScanReport {
            run_id,
            started_at,
            documents,
            portals_scanned,
            portals_failed,
            parsed_total,
            elapsed: start.elapsed(),
        };

        info!(
            run_id = %report.run_id,
            portals_scanned = report.portals_scanned,
            portals_failed = report.portals_failed.len(),
            parsed = report.parsed_total,
            fresh = report.documents.len(),
            duration_ms = report.elapsed.as_millis() as u64,
            "portal scan completed"
        );

        Ok(report)
    }

    /// Fetch, parse, enrich and dedup one portal. Returns the parsed count and
    /// the fresh documents.
    async fn scan_portal(
        &self,
        portal: &PortalDefinition,
        state: &mut PortalState,
    ) -> Result<(usize, Vec<DiscoveredDocument>)> {
        let base_url = Url::parse(&portal.base_url).map_err(|e| {
            TaxDeskError::validation(format!("invalid base_url '{}': {e}", portal.base_url))
        })?;
        let listing_url = base_url.join(&portal.listing_path).map_err(|e| {
            TaxDeskError::validation(format!(
                "invalid listing_path '{}': {e}",
                portal.listing_path
            ))
        })?;

        let html = self.fetcher.fetch(&listing_url).await?;
        let parsed = parse_listing(portal, &base_url, &listing_url, &html);
        let parsed_count = parsed.len();

        let mut fresh = Vec::new();
        for mut doc in parsed {
            let key = doc.dedup_key().to_string();
            if !state.remember(&portal.id, &key) {
                continue;
            }
            enrich(&mut doc);
            fresh.push(doc);
        }

        Ok((parsed_count, fresh))
    }
}
