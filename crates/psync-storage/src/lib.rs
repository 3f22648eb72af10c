//! Document fetching for profile-sync: plain HTTP with retry/backoff, or a
//! headless browser for pages that only render their listing via script.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info_span, warn, Instrument};

pub const CRATE_NAME: &str = "psync-storage";

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// How listing and detail pages are retrieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    #[default]
    Static,
    Browser,
}

impl FromStr for RenderMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "static" | "http" | "0" | "false" => Ok(RenderMode::Static),
            "browser" | "render" | "js" | "1" | "true" => Ok(RenderMode::Browser),
            other => Err(format!("unknown render mode {other:?} (expected static|browser)")),
        }
    }
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderMode::Static => f.write_str("static"),
            RenderMode::Browser => f.write_str("browser"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub requested_url: String,
    pub final_url: String,
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("browser render failed for {url}: {message}")]
    Render { url: String, message: String },
}

/// Retrieves one page as raw markup.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    fn mode(&self) -> RenderMode;

    async fn fetch(&self, url: &str) -> Result<FetchedDocument, FetchError>;

    /// Best-effort request made before the listing fetch so the session picks
    /// up cookies. Failures are ignored.
    async fn warm_up(&self, _url: &str) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: String,
    pub extra_headers: Vec<(String, String)>,
    /// Honour HTTP(S)_PROXY from the environment. Off unless opted in.
    pub trust_env_proxies: bool,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            extra_headers: Vec::new(),
            trust_env_proxies: false,
            backoff: BackoffPolicy::default(),
        }
    }
}

pub fn header_map(headers: &[(String, String)]) -> anyhow::Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("invalid header name {name:?}"))?;
        let value = HeaderValue::from_str(value)
            .with_context(|| format!("invalid value for header {name}"))?;
        map.insert(name, value);
    }
    Ok(map)
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .cookie_store(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .default_headers(header_map(&config.extra_headers)?);

        if !config.trust_env_proxies {
            builder = builder.no_proxy();
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            backoff: config.backoff,
        })
    }

    async fn fetch_with_retries(&self, url: &str) -> Result<FetchedDocument, FetchError> {
        let mut last_request_error: Option<reqwest::Error> = None;

        for attempt in 0..=self.backoff.max_retries {
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        let body = resp.text().await?;
                        debug!(bytes = body.len(), %final_url, "fetched document");
                        return Ok(FetchedDocument {
                            requested_url: url.to_string(),
                            final_url,
                            status: status.as_u16(),
                            body,
                        });
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        warn!(status = status.as_u16(), attempt, "retryable http status");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        warn!(error = %err, attempt, "retryable request error");
                        last_request_error = Some(err);
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }

        match last_request_error {
            Some(err) => Err(FetchError::Request(err)),
            None => Err(FetchError::HttpStatus {
                status: 0,
                url: url.to_string(),
            }),
        }
    }
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
    fn mode(&self) -> RenderMode {
        RenderMode::Static
    }

    async fn fetch(&self, url: &str) -> Result<FetchedDocument, FetchError> {
        self.fetch_with_retries(url)
            .instrument(info_span!("http_fetch", url))
            .await
    }

    async fn warm_up(&self, url: &str) {
        if let Err(err) = self.client.get(url).send().await {
            debug!(url, error = %err, "warm-up request failed; continuing");
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub page_timeout: Duration,
    pub user_agent: String,
    /// CSS selector awaited after navigation, when the site fills its list late.
    pub wait_selector: Option<String>,
    pub sandbox: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            page_timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            wait_selector: None,
            sandbox: false,
        }
    }
}

/// Headless Chrome fetcher. One browser and one tab per run; both are
/// released when the renderer is dropped.
pub struct BrowserRenderer {
    _browser: Browser,
    tab: Arc<Tab>,
    wait_selector: Option<String>,
}

impl BrowserRenderer {
    pub async fn launch(config: RenderConfig) -> anyhow::Result<Self> {
        let wait_selector = config.wait_selector.clone();
        let (browser, tab) = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
            let options = LaunchOptions::default_builder()
                .headless(true)
                .sandbox(config.sandbox)
                .idle_browser_timeout(config.page_timeout * 4)
                .build()
                .map_err(|e| anyhow!("invalid browser launch options: {e}"))?;
            let browser = Browser::new(options).context("launching headless chrome")?;
            let tab = browser.new_tab().context("opening browser tab")?;
            tab.set_default_timeout(config.page_timeout);
            tab.set_user_agent(&config.user_agent, None, None)
                .context("setting browser user agent")?;
            Ok((browser, tab))
        })
        .await
        .context("browser launch task panicked")??;

        Ok(Self {
            _browser: browser,
            tab,
            wait_selector,
        })
    }
}

#[async_trait]
impl DocumentFetcher for BrowserRenderer {
    fn mode(&self) -> RenderMode {
        RenderMode::Browser
    }

    async fn fetch(&self, url: &str) -> Result<FetchedDocument, FetchError> {
        let tab = Arc::clone(&self.tab);
        let wait_selector = self.wait_selector.clone();
        let target = url.to_string();

        let rendered = tokio::task::spawn_blocking(move || -> anyhow::Result<(String, String)> {
            tab.navigate_to(&target)?.wait_until_navigated()?;
            if let Some(selector) = wait_selector.as_deref() {
                if let Err(err) = tab.wait_for_element(selector) {
                    warn!(
                        selector,
                        error = %err,
                        "wait selector never appeared; using current DOM"
                    );
                }
            }
            let content = tab.get_content()?;
            Ok((tab.get_url(), content))
        })
        .instrument(info_span!("browser_render", url))
        .await;

        match rendered {
            Ok(Ok((final_url, body))) => Ok(FetchedDocument {
                requested_url: url.to_string(),
                final_url,
                status: 200,
                body,
            }),
            Ok(Err(err)) => Err(FetchError::Render {
                url: url.to_string(),
                message: format!("{err:#}"),
            }),
            Err(join_err) => Err(FetchError::Render {
                url: url.to_string(),
                message: join_err.to_string(),
            }),
        }
    }
}

/// Builds the fetcher selected by `mode`.
pub async fn build_fetcher(
    mode: RenderMode,
    http: HttpClientConfig,
    render: RenderConfig,
) -> anyhow::Result<Box<dyn DocumentFetcher>> {
    match mode {
        RenderMode::Static => Ok(Box::new(HttpFetcher::new(http)?)),
        RenderMode::Browser => Ok(Box::new(BrowserRenderer::launch(render).await?)),
    }
}
