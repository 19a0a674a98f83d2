//! HTTP fetch utilities and dataset sinks for the Job'Arts pipeline.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{info_span, warn, Instrument};

mod sink;

pub use sink::{
    listings_record_batch, manifest_entry, read_parquet, write_csv, write_manifest, write_parquet,
    ManifestFile, SqlSink,
};

pub const CRATE_NAME: &str = "jobart-storage";

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

/// Transport failures are retried like rate limiting; only errors that a
/// retry cannot fix are final.
pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_builder() || err.is_redirect() || err.is_decode() {
        RetryDisposition::NonRetryable
    } else {
        RetryDisposition::Retryable
    }
}

/// Fixed-interval retry. `max_attempts: None` retries until the request
/// succeeds or fails with a non-retryable error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: Option<usize>,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn forever(backoff: Duration) -> Self {
        Self {
            max_attempts: None,
            backoff,
        }
    }

    pub fn bounded(max_attempts: usize, backoff: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts.max(1)),
            backoff,
        }
    }

    /// Whether another attempt may follow `attempts_made` failed ones.
    pub fn allows_retry_after(&self, attempts_made: usize) -> bool {
        self.max_attempts.map_or(true, |max| attempts_made < max)
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("rate limited by {url}")]
    RateLimited { url: String },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("invalid JSON body from {url}: {message}")]
    Decode { url: String, message: String },
    #[error("gave up on {url} after {attempts} attempts: {last}")]
    Exhausted {
        url: String,
        attempts: usize,
        last: Box<FetchError>,
    },
}

impl FetchError {
    pub fn disposition(&self) -> RetryDisposition {
        match self {
            Self::RateLimited { .. } => RetryDisposition::Retryable,
            Self::HttpStatus { status, .. } => StatusCode::from_u16(*status)
                .map(classify_status)
                .unwrap_or(RetryDisposition::NonRetryable),
            Self::Request { source, .. } => classify_reqwest_error(source),
            Self::Decode { .. } | Self::Exhausted { .. } => RetryDisposition::NonRetryable,
        }
    }
}

/// Anything that answers a GET with a JSON document.
#[async_trait]
pub trait JsonSource: Send + Sync {
    async fn get_json(&self, url: &str) -> Result<JsonValue, FetchError>;
}

/// Request `url` until it resolves, sleeping `policy.backoff` between
/// retryable failures.
pub async fn fetch_json_with_retry<S>(
    source: &S,
    url: &str,
    policy: &RetryPolicy,
) -> Result<JsonValue, FetchError>
where
    S: JsonSource + ?Sized,
{
    let mut attempts = 0usize;
    loop {
        attempts += 1;
        let err = match source.get_json(url).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if err.disposition() == RetryDisposition::NonRetryable {
            return Err(err);
        }
        if !policy.allows_retry_after(attempts) {
            return Err(FetchError::Exhausted {
                url: url.to_string(),
                attempts,
                last: Box::new(err),
            });
        }

        match &err {
            FetchError::RateLimited { .. } => {
                warn!(url, attempts, backoff_secs = policy.backoff.as_secs(), "API limit reached; backing off");
            }
            other => {
                warn!(url, attempts, error = %other, "transient fetch failure; backing off");
            }
        }
        tokio::time::sleep(policy.backoff).await;
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
        }
    }
}

/// One pooled client, shared read-only by every request of an adapter run.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl JsonSource for HttpFetcher {
    async fn get_json(&self, url: &str) -> Result<JsonValue, FetchError> {
        let span = info_span!("http_fetch", url);
        async move {
            let resp = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|source| FetchError::Request {
                    url: url.to_string(),
                    source,
                })?;

            let status = resp.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(FetchError::RateLimited {
                    url: url.to_string(),
                });
            }
            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }

            let body = resp.bytes().await.map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;
            serde_json::from_slice(&body).map_err(|e| FetchError::Decode {
                url: url.to_string(),
                message: e.to_string(),
            })
        }
        .instrument(span)
        .await
    }
}
