//! Fetch layer.
//!
//! Retrieves the raw document for a (source kind, language) pair. Transient
//! failures are retried with doubling backoff; 4xx answers and empty bodies
//! are returned straight away. Nothing here touches the cache.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::{FetchError, Result};
use crate::models::{Config, Language, SourceConfig, SourceKind};
use crate::utils::http;

/// A fetched upstream document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    pub url: String,
    pub body: String,
}

/// Retrieval of upstream documents.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        kind: SourceKind,
        language: &Language,
    ) -> std::result::Result<RawDocument, FetchError>;
}

/// Fetcher backed by `reqwest`.
pub struct HttpFetcher {
    client: Client,
    sources: Vec<SourceConfig>,
    max_retries: u32,
    backoff: Duration,
}

impl HttpFetcher {
    /// Create a fetcher for the sources and HTTP settings in `config`.
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: http::create_client(&config.fetch)?,
            sources: config.sources.clone(),
            max_retries: config.fetch.max_retries,
            backoff: Duration::from_millis(config.fetch.retry_backoff_ms),
        })
    }

    async fn fetch_once(&self, url: &str) -> std::result::Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| classify(url, e))?;
        if body.trim().is_empty() {
            return Err(FetchError::EmptyBody {
                url: url.to_string(),
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        kind: SourceKind,
        language: &Language,
    ) -> std::result::Result<RawDocument, FetchError> {
        let source = self
            .sources
            .iter()
            .find(|s| &s.language == language && s.kind == kind)
            .ok_or_else(|| FetchError::NotConfigured {
                kind: kind.to_string(),
                language: language.to_string(),
            })?;

        let mut attempt = 0;
        loop {
            log::debug!("Fetching {} ({} {})", source.url, language, kind);
            match self.fetch_once(&source.url).await {
                Ok(body) => {
                    log::info!("Fetched {} bytes from {}", body.len(), source.url);
                    return Ok(RawDocument {
                        url: source.url.clone(),
                        body,
                    });
                }
                Err(error) if error.is_transient() && attempt < self.max_retries => {
                    let delay = self.backoff * 2u32.saturating_pow(attempt);
                    attempt += 1;
                    log::warn!(
                        "Fetch of {} failed ({}); retry {}/{} in {:?}",
                        source.url,
                        error,
                        attempt,
                        self.max_retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

fn classify(url: &str, error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Unreachable {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}
