//! Retry logic with exponential backoff
//!
//! [`with_retry`] drives any fallible async operation under a [`RetryConfig`];
//! [`fetch_with_retry`] applies it to an HTTP GET with the content-source status
//! policy: a 4xx other than 429 fails at once, 5xx / 429 / transport failures back
//! off and retry, and running out of attempts surfaces the last failure.
//!
//! # Example
//!
//! ```no_run
//! use gazette_analysis::retry::{IsRetryable, with_retry};
//! use gazette_analysis::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! with_retry(&config, "example", || async { Ok::<_, MyError>(()) }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::FetchError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, server busy, connection reset) return `true`.
/// Permanent failures (bad request, auth, not found) return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Network { .. } => true,
            FetchError::InvalidUrl { .. }
            | FetchError::Timeout { .. }
            | FetchError::Cancelled { .. }
            | FetchError::EmptyContent { .. } => false,
        }
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// Runs `operation` at most `config.max_attempts` times in total. Each attempt
/// is logged with its 1-based index and `tag`. Non-retryable errors return
/// immediately; the last error is returned once attempts run out.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, tag: &str, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;
        tracing::debug!(tag, attempt, max_attempts, "Starting attempt");

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(tag, attempts = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                tracing::warn!(
                    tag,
                    error = %e,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis(),
                    "Attempt failed, retrying"
                );

                let jittered_delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };

                tokio::time::sleep(jittered_delay).await;

                let next_delay =
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next_delay.min(config.max_delay);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        tag,
                        error = %e,
                        attempts = attempt,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(tag, error = %e, attempt, "Operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// GET `url` under the retry policy
///
/// Returns the first successful response. The response body is not read.
pub async fn fetch_with_retry(
    client: &reqwest::Client,
    url: &str,
    config: &RetryConfig,
    tag: &str,
) -> Result<reqwest::Response, FetchError> {
    let parsed = url::Url::parse(url).map_err(|e| FetchError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    with_retry(config, tag, || {
        let request = client.get(parsed.clone());
        async move {
            let response = request.send().await.map_err(|e| FetchError::Network {
                url: url.to_string(),
                message: e.to_string(),
            })?;

            let status = response.status();
            if status.is_success() {
                Ok(response)
            } else {
                Err(FetchError::Status {
                    status: status.as_u16(),
                    url: url.to_string(),
                })
            }
        }
    })
    .await
}

/// Add random jitter to a delay to prevent thundering herd
///
/// The actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug)]
    enum TestError {
        Transient,
        Permanent,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Transient => write!(f, "transient error"),
                TestError::Permanent => write!(f, "permanent error"),
            }
        }
    }

    impl IsRetryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Transient)
        }
    }

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_success_no_retry() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&fast_config(3), "test", || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TestError>(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1, "should only call once");
    }

    #[tokio::test]
    async fn test_retry_transient_then_succeed() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&fast_config(3), "test", || {
            let counter = counter_clone.clone();
            async move {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    Err(TestError::Transient)
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_max_attempts_counts_the_first_try() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&fast_config(2), "test", || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError::Transient)
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 2, "two attempts in total");
    }

    #[tokio::test]
    async fn test_permanent_error_no_retry() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&fast_config(5), "test", || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError::Permanent)
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exponential_backoff() {
        let start = std::time::Instant::now();

        let _ = with_retry(&fast_config(4), "test", || async {
            Err::<i32, _>(TestError::Transient)
        })
        .await;

        // 10ms + 20ms + 40ms between four attempts
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_millis(70),
            "should wait at least 70ms, waited {:?}",
            elapsed
        );
        assert!(elapsed < Duration::from_secs(2), "waited {:?}", elapsed);
    }

    #[test]
    fn test_jitter_stays_within_double() {
        let delay = Duration::from_millis(100);
        for _ in 0..50 {
            let jittered = add_jitter(delay);
            assert!(jittered >= delay && jittered <= delay * 2);
        }
    }

    #[test]
    fn test_fetch_error_classification() {
        let url = "http://x".to_string();
        let status = |status| FetchError::Status {
            status,
            url: url.clone(),
        };
        assert!(status(500).is_retryable());
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(!status(401).is_retryable());
        assert!(!status(400).is_retryable());
        assert!(
            FetchError::Network {
                url: url.clone(),
                message: "reset".into()
            }
            .is_retryable()
        );
        assert!(!FetchError::EmptyContent { url }.is_retryable());
    }

    #[tokio::test]
    async fn test_fetch_404_fails_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gazette/1"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/gazette/1", server.uri());
        let result = fetch_with_retry(&client, &url, &fast_config(3), "test").await;

        assert_eq!(result.unwrap_err(), FetchError::Status { status: 404, url });
    }

    #[tokio::test]
    async fn test_fetch_retries_503_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gazette/2"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gazette/2"))
            .respond_with(ResponseTemplate::new(200).set_body_string("body"))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/gazette/2", server.uri());
        let response = fetch_with_retry(&client, &url, &fast_config(3), "test")
            .await
            .unwrap();

        assert_eq!(response.text().await.unwrap(), "body");
    }

    #[tokio::test]
    async fn test_fetch_exhausts_on_429_with_last_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gazette/3"))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/gazette/3", server.uri());
        let result = fetch_with_retry(&client, &url, &fast_config(3), "test").await;

        assert_eq!(result.unwrap_err(), FetchError::Status { status: 429, url });
    }

    #[tokio::test]
    async fn test_fetch_invalid_url() {
        let client = reqwest::Client::new();
        let result = fetch_with_retry(&client, "not a url", &fast_config(3), "test").await;
        assert!(matches!(result, Err(FetchError::InvalidUrl { .. })));
    }
}
