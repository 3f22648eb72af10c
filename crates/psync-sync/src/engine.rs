use std::{collections::HashSet, time::Duration};

use psync_adapters::{AdapterError, SiteExtractor};
use psync_core::{DiagnosticKind, Diagnostics, ExistingKeySet, SyncBatch};
use psync_storage::DocumentFetcher;
use tracing::{debug, info, warn};

/// Result of one listing pass: the new records plus what was skipped and why.
#[derive(Debug, Default)]
pub struct SyncOutcome {
    pub batch: SyncBatch,
    pub diagnostics: Diagnostics,
    pub cards_seen: usize,
    pub candidates: usize,
    pub skipped_existing: usize,
    pub duplicates: usize,
}

/// Filters listing candidates against the snapshot, then enriches the
/// survivors from their detail pages, one at a time and in listing order.
#[derive(Debug, Clone)]
pub struct SyncEngine {
    extractor: SiteExtractor,
    detail_delay: Duration,
}

impl SyncEngine {
    pub fn new(extractor: SiteExtractor, detail_delay: Duration) -> Self {
        Self {
            extractor,
            detail_delay,
        }
    }

    pub fn extractor(&self) -> &SiteExtractor {
        &self.extractor
    }

    pub async fn sync(
        &self,
        listing_document: &str,
        base_url: &str,
        existing: Option<&ExistingKeySet>,
        fetcher: &dyn DocumentFetcher,
    ) -> Result<SyncOutcome, AdapterError> {
        let listing = self.extractor.extract_listing(listing_document, base_url)?;
        let mut outcome = SyncOutcome {
            cards_seen: listing.cards_seen,
            candidates: listing.candidates.len(),
            diagnostics: listing.diagnostics,
            ..Default::default()
        };

        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        for candidate in listing.candidates {
            if existing.is_some_and(|keys| keys.contains(candidate.identifier())) {
                outcome.skipped_existing += 1;
                continue;
            }
            if !seen.insert(candidate.identifier().to_string()) {
                outcome.duplicates += 1;
                debug!(identifier = candidate.identifier(), "repeated listing entry dropped");
                continue;
            }
            pending.push(candidate);
        }
        info!(
            candidates = outcome.candidates,
            skipped_existing = outcome.skipped_existing,
            duplicates = outcome.duplicates,
            pending = pending.len(),
            "listing filtered against existing keys"
        );

        if !self.extractor.has_detail() {
            for candidate in pending {
                outcome.batch.push(self.extractor.finalize(candidate));
            }
            return Ok(outcome);
        }

        for (index, candidate) in pending.into_iter().enumerate() {
            if index > 0 && !self.detail_delay.is_zero() {
                tokio::time::sleep(self.detail_delay).await;
            }
            let identifier = candidate.identifier().to_string();
            let detail_url = self.extractor.detail_url(&candidate).to_string();

            let document = match fetcher.fetch(&detail_url).await {
                Ok(document) => document,
                Err(err) => {
                    warn!(%identifier, error = %err, "detail fetch failed; candidate skipped");
                    outcome
                        .diagnostics
                        .push(DiagnosticKind::DetailFetchFailed, identifier, err.to_string());
                    continue;
                }
            };

            let detail = self.extractor.extract_detail(&document.body, candidate)?;
            if detail.matched == 0 {
                warn!(%identifier, "no detail field matched");
                outcome.diagnostics.push(
                    DiagnosticKind::PartialExtraction,
                    identifier.clone(),
                    format!("no detail field matched ({} expected)", detail.missing.len()),
                );
            } else if !detail.missing.is_empty() {
                debug!(%identifier, missing = ?detail.missing, "detail fields missing");
            }
            outcome.batch.push(detail.record);
        }

        Ok(outcome)
    }
}
