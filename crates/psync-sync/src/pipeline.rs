use chrono::{DateTime, Utc};
use psync_adapters::SiteExtractor;
use psync_core::{Diagnostics, ExistingKeySet, RecordSchema, SyncError};
use psync_sinks::{ApiSink, MysqlMirror, SheetsSink, Sink};
use psync_storage::{build_fetcher, DocumentFetcher, HttpClientConfig, RenderConfig};
use serde::Serialize;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{SyncConfig, SyncEngine};

#[derive(Debug, Clone, Serialize)]
pub struct SinkWriteSummary {
    pub sink: String,
    pub attempted: usize,
    pub written: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub site: String,
    pub listing_url: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cards_seen: usize,
    pub candidates: usize,
    pub skipped_existing: usize,
    pub duplicates: usize,
    pub new_records: usize,
    pub sinks: Vec<SinkWriteSummary>,
    pub diagnostics: Diagnostics,
}

impl SyncRunSummary {
    /// One-line form printed by the binaries.
    pub fn summary_line(&self) -> String {
        let written = self
            .sinks
            .iter()
            .map(|s| format!("{}={}/{}", s.sink, s.written, s.attempted))
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "site={} run_id={} candidates={} skipped_existing={} duplicates={} new={} \
             written=[{}] diagnostics={}",
            self.site,
            self.run_id,
            self.candidates,
            self.skipped_existing,
            self.duplicates,
            self.new_records,
            written,
            self.diagnostics.len()
        )
    }
}

/// Sinks for `config`, in write order: sheet, mirror, API.
pub fn build_sinks(
    config: &SyncConfig,
    schema: &RecordSchema,
) -> Result<Vec<Box<dyn Sink>>, SyncError> {
    let mut sinks: Vec<Box<dyn Sink>> = Vec::new();
    if let Some(sheet) = &config.sheet {
        let sink = SheetsSink::new(sheet.clone(), schema)
            .map_err(|e| SyncError::Config(format!("{e:#}")))?;
        sinks.push(Box::new(sink));
    }
    if let Some(mirror) = &config.mirror {
        sinks.push(Box::new(MysqlMirror::new(mirror.clone(), schema.clone())));
    }
    if let Some(api) = &config.api {
        let sink = ApiSink::new(api.clone()).map_err(|e| SyncError::Config(format!("{e:#}")))?;
        sinks.push(Box::new(sink));
    }
    Ok(sinks)
}

pub struct SyncPipeline {
    config: SyncConfig,
    engine: SyncEngine,
    fetcher: Option<Box<dyn DocumentFetcher>>,
    sinks: Vec<Box<dyn Sink>>,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig) -> Result<Self, SyncError> {
        let extractor = SiteExtractor::new(config.site);
        let sinks = build_sinks(&config, extractor.schema())?;
        Ok(Self {
            engine: SyncEngine::new(extractor, config.detail_delay),
            config,
            fetcher: None,
            sinks,
        })
    }

    /// Pipeline over caller-supplied parts; the fetcher is not rebuilt from config.
    pub fn with_parts(
        config: SyncConfig,
        fetcher: Box<dyn DocumentFetcher>,
        sinks: Vec<Box<dyn Sink>>,
    ) -> Self {
        Self {
            engine: SyncEngine::new(SiteExtractor::new(config.site), config.detail_delay),
            config,
            fetcher: Some(fetcher),
            sinks,
        }
    }

    /// One full run. Sinks are always closed, whatever the outcome.
    pub async fn run_once(&mut self) -> Result<SyncRunSummary, SyncError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_run", %run_id, site = self.config.site.site_id);
        async {
            let result = self.run_inner(run_id).await;
            for sink in &mut self.sinks {
                if let Err(err) = sink.close().await {
                    warn!(sink = sink.name(), error = %format!("{err:#}"), "sink close failed");
                }
            }
            match &result {
                Ok(summary) => info!(
                    new = summary.new_records,
                    diagnostics = summary.diagnostics.len(),
                    "sync run finished"
                ),
                Err(err) => error!(error = %err, exit_code = err.exit_code(), "sync run failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn build_fetcher(&self) -> Result<Box<dyn DocumentFetcher>, SyncError> {
        let site = self.config.site;
        let http = HttpClientConfig {
            timeout: self.config.http_timeout,
            user_agent: self.config.user_agent.clone(),
            extra_headers: site
                .extra_headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            trust_env_proxies: self.config.trust_env_proxies,
            ..Default::default()
        };
        let render = RenderConfig {
            page_timeout: self.config.http_timeout,
            user_agent: self.config.user_agent.clone(),
            wait_selector: site.render_wait_selector.map(str::to_string),
            ..Default::default()
        };
        build_fetcher(self.config.render_mode, http, render)
            .await
            .map_err(|source| SyncError::ListingFetchFailed {
                url: self.config.listing_url.clone(),
                source: source.context(format!("starting {} fetcher", self.config.render_mode)),
            })
    }

    async fn run_inner(&mut self, run_id: Uuid) -> Result<SyncRunSummary, SyncError> {
        let started_at = Utc::now();

        let mut sink_keys: Vec<Option<ExistingKeySet>> = Vec::with_capacity(self.sinks.len());
        for sink in &mut self.sinks {
            let keys = sink
                .load_keys()
                .await
                .map_err(|source| SyncError::SinkUnavailable {
                    sink: sink.name().to_string(),
                    source,
                })?;
            sink_keys.push(keys);
        }
        let snapshot = ExistingKeySet::intersection(sink_keys.iter().flatten().cloned());
        info!(
            sinks = self.sinks.len(),
            snapshot = snapshot.as_ref().map_or(0, ExistingKeySet::len),
            "existing keys loaded"
        );

        if self.fetcher.is_none() {
            self.fetcher = Some(self.build_fetcher().await?);
        }
        let fetcher = self
            .fetcher
            .as_deref()
            .ok_or_else(|| SyncError::Config("document fetcher unavailable".into()))?;

        if let Some(warm_up_url) = self.config.site.warm_up_url {
            fetcher.warm_up(warm_up_url).await;
        }

        let listing_url = self.config.listing_url.clone();
        let listing = fetcher
            .fetch(&listing_url)
            .await
            .map_err(|e| SyncError::ListingFetchFailed {
                url: listing_url.clone(),
                source: e.into(),
            })?;

        let outcome = self
            .engine
            .sync(&listing.body, &listing.final_url, snapshot.as_ref(), fetcher)
            .await
            .map_err(|e| SyncError::ListingFetchFailed {
                url: listing_url.clone(),
                source: e.into(),
            })?;

        let schema = self.engine.extractor().schema().clone();
        let mut first_failure = None;
        let mut sinks_summary = Vec::with_capacity(self.sinks.len());
        for (sink, keys) in self.sinks.iter_mut().zip(&sink_keys) {
            let rows = outcome.batch.missing_from(keys.as_ref());
            let attempted = rows.len();
            let written = if rows.is_empty() {
                0
            } else {
                match sink.write(&schema, &rows).await {
                    Ok(written) => written,
                    Err(partial) => {
                        error!(
                            sink = sink.name(),
                            written = partial.written,
                            total = attempted,
                            error = %format!("{:#}", partial.source),
                            "sink write failed"
                        );
                        let written = partial.written;
                        if first_failure.is_none() {
                            first_failure = Some(SyncError::SinkWriteFailed {
                                sink: sink.name().to_string(),
                                written,
                                total: attempted,
                                source: partial.source,
                            });
                        }
                        written
                    }
                }
            };
            info!(sink = sink.name(), attempted, written, "sink write done");
            sinks_summary.push(SinkWriteSummary {
                sink: sink.name().to_string(),
                attempted,
                written,
            });
        }

        for diagnostic in outcome.diagnostics.iter() {
            warn!(kind = ?diagnostic.kind, subject = %diagnostic.subject, "{}", diagnostic.message);
        }

        if let Some(failure) = first_failure {
            return Err(failure);
        }

        Ok(SyncRunSummary {
            run_id,
            site: self.config.site.site_id.to_string(),
            listing_url,
            started_at,
            finished_at: Utc::now(),
            cards_seen: outcome.cards_seen,
            candidates: outcome.candidates,
            skipped_existing: outcome.skipped_existing,
            duplicates: outcome.duplicates,
            new_records: outcome.batch.len(),
            sinks: sinks_summary,
            diagnostics: outcome.diagnostics,
        })
    }
}
