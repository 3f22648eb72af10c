use std::{fmt, time::Duration};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use psync_core::{ExistingKeySet, ProfileRecord, RecordSchema};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::{PartialWrite, Sink};

const API_KEY_HEADER: &str = "X-API-KEY";

#[derive(Clone)]
pub struct ApiSinkConfig {
    pub url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub trust_env_proxies: bool,
}

impl fmt::Debug for ApiSinkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiSinkConfig")
            .field("url", &self.url)
            .field("timeout", &self.timeout)
            .field("trust_env_proxies", &self.trust_env_proxies)
            .finish_non_exhaustive()
    }
}

/// JSON object keyed by column, values in schema order.
pub fn payload(schema: &RecordSchema, record: &ProfileRecord) -> Value {
    let map = schema
        .columns()
        .iter()
        .cloned()
        .zip(record.to_row(schema).into_iter().map(Value::String))
        .collect::<Map<String, Value>>();
    Value::Object(map)
}

/// Posts one JSON object per record to an ingestion endpoint.
pub struct ApiSink {
    config: ApiSinkConfig,
    client: reqwest::Client,
}

impl ApiSink {
    pub fn new(config: ApiSinkConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(config.timeout);
        if !config.trust_env_proxies {
            builder = builder.no_proxy();
        }
        let client = builder.build().context("building api http client")?;
        Ok(Self { config, client })
    }

    async fn post(&self, body: &Value) -> anyhow::Result<()> {
        let resp = self
            .client
            .post(&self.config.url)
            .header(API_KEY_HEADER, &self.config.api_key)
            .json(body)
            .send()
            .await
            .context("sending record")?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("ingestion api returned {status}: {}", text.trim()));
        }
        Ok(())
    }
}

#[async_trait]
impl Sink for ApiSink {
    fn name(&self) -> &str {
        "api"
    }

    async fn load_keys(&mut self) -> anyhow::Result<Option<ExistingKeySet>> {
        Ok(None)
    }

    /// Every record is attempted; failures are counted and reported together.
    async fn write(
        &mut self,
        schema: &RecordSchema,
        records: &[&ProfileRecord],
    ) -> Result<usize, PartialWrite> {
        let mut written = 0usize;
        let mut first_error: Option<anyhow::Error> = None;
        let mut failed = 0usize;

        for record in records {
            match self.post(&payload(schema, record)).await {
                Ok(()) => {
                    written += 1;
                    debug!(identifier = record.identifier(), "posted record");
                }
                Err(err) => {
                    failed += 1;
                    warn!(
                        identifier = record.identifier(),
                        error = %format!("{err:#}"),
                        "post failed"
                    );
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            None => Ok(written),
            Some(err) => Err(PartialWrite::new(
                written,
                err.context(format!("{failed} of {} post(s) failed", records.len())),
            )),
        }
    }
}
