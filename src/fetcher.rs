//! Content fetching with a deadline and a truncation policy
//!
//! [`ContentFetcher`] wraps [`fetch_with_retry`] so that the whole fetch, retries
//! and body read included, is bounded by one deadline and can be abandoned on
//! shutdown. Text longer than the caller's limit is cut on a character boundary.

use crate::config::FetchConfig;
use crate::error::{Error, FetchError, Result};
use crate::retry::fetch_with_retry;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Text ready to be placed in a prompt
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchedContent {
    /// The (possibly truncated) text
    pub text: String,
    /// Whether the source text was longer than the limit
    pub truncated: bool,
}

/// Fetches record content for analysis
#[derive(Clone)]
pub struct ContentFetcher {
    client: reqwest::Client,
    config: FetchConfig,
    cancel: CancellationToken,
}

impl ContentFetcher {
    /// Create a fetcher from config
    ///
    /// `cancel` aborts any in-flight fetch when triggered.
    pub fn new(config: FetchConfig, cancel: CancellationToken) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(Error::Network)?;

        Ok(Self {
            client,
            config,
            cancel,
        })
    }

    /// Fetch `url` and prepare its text, keeping at most `max_len` characters
    ///
    /// Fails with [`FetchError::EmptyContent`] when the text is blank even though
    /// the HTTP exchange succeeded.
    pub async fn fetch_and_prepare(
        &self,
        url: &str,
        max_len: usize,
        tag: &str,
    ) -> std::result::Result<FetchedContent, FetchError> {
        let timeout = self.config.timeout;

        let fetch = async {
            let response = fetch_with_retry(&self.client, url, &self.config.retry, tag).await?;
            response.text().await.map_err(|e| FetchError::Network {
                url: url.to_string(),
                message: format!("failed to read body: {}", e),
            })
        };

        let body = tokio::select! {
            _ = self.cancel.cancelled() => {
                return Err(FetchError::Cancelled { url: url.to_string() });
            }
            result = tokio::time::timeout(timeout, fetch) => match result {
                Ok(body) => body?,
                Err(_) => {
                    tracing::warn!(tag, url, timeout_ms = timeout.as_millis() as u64, "Content fetch timed out");
                    return Err(FetchError::Timeout {
                        url: url.to_string(),
                        timeout_ms: duration_ms(timeout),
                    });
                }
            },
        };

        let prepared = prepare_text(body, max_len);
        if prepared.text.trim().is_empty() {
            tracing::warn!(tag, url, "Content source returned empty text");
            return Err(FetchError::EmptyContent {
                url: url.to_string(),
            });
        }

        if prepared.truncated {
            tracing::info!(tag, url, max_len, "Content truncated");
        }
        Ok(prepared)
    }

    /// Token that aborts in-flight fetches on shutdown
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The configured limit for a regular attempt
    pub fn max_content_length(&self) -> usize {
        self.config.max_content_length
    }

    /// The configured limit for a shortened attempt
    pub fn shortened_max_content_length(&self) -> usize {
        self.config.shortened_max_content_length
    }
}

/// Cut `body` to at most `max_len` characters
pub fn prepare_text(body: String, max_len: usize) -> FetchedContent {
    match body.char_indices().nth(max_len) {
        Some((byte_index, _)) => {
            let mut text = body;
            text.truncate(byte_index);
            FetchedContent {
                text,
                truncated: true,
            }
        }
        None => FetchedContent {
            text: body,
            truncated: false,
        },
    }
}

fn duration_ms(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}
