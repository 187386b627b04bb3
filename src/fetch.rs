//! Retrying HTTP client shared by adapters and the processor.
//!
//! One `reqwest::Client` with the pipeline User-Agent; per-call timeout
//! classes (vendor listings are fast, packet downloads are not); transient
//! failures retried with exponential backoff. Vendor spacing is NOT handled
//! here; callers go through the `RateLimiter` first.

use std::time::Duration;

use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// User-Agent sent on every outbound request.
const USER_AGENT: &str = concat!("gavel/", env!("CARGO_PKG_VERSION"), " (civic agenda indexer)");

/// Streaming download accumulator granularity.
const DOWNLOAD_BUFFER_BYTES: usize = 8192;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("download exceeds limit of {limit} bytes")]
    TooLarge { limit: usize },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    /// Timeouts, connection failures, 5xx, and 429 are worth retrying;
    /// other 4xx are not.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            FetchError::Status { status, .. } => *status >= 500 || *status == 429,
            FetchError::TooLarge { .. } | FetchError::InvalidUrl(_) => false,
        }
    }
}

/// Per-call timeout class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutClass {
    /// Vendor listing/API calls: 10s.
    Listing,
    /// Packet and attachment downloads: 60s.
    Download,
    /// Fallback extractor calls: 30s.
    Fallback,
}

impl TimeoutClass {
    pub fn duration(&self) -> Duration {
        match self {
            TimeoutClass::Listing => Duration::from_secs(10),
            TimeoutClass::Download => Duration::from_secs(60),
            TimeoutClass::Fallback => Duration::from_secs(30),
        }
    }
}

/// Retry schedule for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Exponential: base, base*2, base*4, …
    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

pub struct HttpFetcher {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            client,
            retry: RetryPolicy::default(),
        })
    }

    /// GET returning the response body as text.
    pub async fn get_text(&self, url: &str, class: TimeoutClass) -> Result<String, FetchError> {
        let resp = self.send(url, &[], class).await?;
        Ok(resp.text().await?)
    }

    /// GET with query parameters, deserializing a JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        class: TimeoutClass,
    ) -> Result<T, FetchError> {
        let resp = self.send(url, query, class).await?;
        Ok(resp.json().await?)
    }

    /// Streaming GET of a binary body, aborting mid-stream when `max_size`
    /// is exceeded.
    pub async fn download(
        &self,
        url: &str,
        max_size: Option<usize>,
    ) -> Result<Vec<u8>, FetchError> {
        let resp = self.send(url, &[], TimeoutClass::Download).await?;
        let mut body = Vec::with_capacity(DOWNLOAD_BUFFER_BYTES);
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if let Some(limit) = max_size {
                if body.len() + chunk.len() > limit {
                    return Err(FetchError::TooLarge { limit });
                }
            }
            body.extend_from_slice(&chunk);
        }
        log::info!("Downloaded {} bytes from {url}", body.len());
        Ok(body)
    }

    async fn send(
        &self,
        url: &str,
        query: &[(&str, String)],
        class: TimeoutClass,
    ) -> Result<reqwest::Response, FetchError> {
        let mut last_err: Option<FetchError> = None;

        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                let delay = self.retry.delay_for(attempt - 1);
                log::warn!(
                    "Retrying {url} (attempt {}/{}) after {delay:?}",
                    attempt + 1,
                    self.retry.max_attempts
                );
                tokio::time::sleep(delay).await;
            }

            let mut req = self.client.get(url).timeout(class.duration());
            if !query.is_empty() {
                req = req.query(query);
            }

            match req.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp);
                    }
                    let err = FetchError::Status {
                        status: status.as_u16(),
                        url: url.to_string(),
                    };
                    if !err.is_transient() {
                        return Err(err);
                    }
                    last_err = Some(err);
                }
                Err(e) => {
                    let err = FetchError::Http(e);
                    if !err.is_transient() {
                        return Err(err);
                    }
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or(FetchError::InvalidUrl(url.to_string())))
    }
}
