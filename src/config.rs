//! Configuration types for gazette-analysis

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::Path, path::PathBuf, time::Duration};
use utoipa::ToSchema;

/// Top-level configuration
///
/// Every field has a default, so an empty JSON object is a valid config file.
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct Config {
    /// Content fetching (retry policy, deadline, truncation)
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Analysis run behavior (thresholds, batch size, skip rules)
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Stuck-lease recovery
    #[serde(default)]
    pub rescue: RescueConfig,

    /// Analysis service connection
    #[serde(default)]
    pub invoker: InvokerConfig,

    /// Data storage
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Trigger API
    #[serde(default)]
    pub api: ApiConfig,
}

impl Config {
    /// Load a config from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read {}: {}", path.display(), e),
            key: None,
        })?;
        let config: Config = serde_json::from_str(&raw).map_err(|e| Error::Config {
            message: format!("failed to parse {}: {}", path.display(), e),
            key: None,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the lifecycle cannot run with
    pub fn validate(&self) -> Result<()> {
        fn positive(value: u64, key: &str) -> Result<()> {
            if value == 0 {
                return Err(Error::Config {
                    message: format!("{} must be greater than zero", key),
                    key: Some(key.to_string()),
                });
            }
            Ok(())
        }

        positive(
            u64::from(self.analysis.max_regular_attempts),
            "analysis.max_regular_attempts",
        )?;
        positive(
            u64::from(self.analysis.max_shortened_attempts),
            "analysis.max_shortened_attempts",
        )?;
        positive(self.analysis.batch_size as u64, "analysis.batch_size")?;
        positive(self.rescue.batch_size as u64, "rescue.batch_size")?;
        positive(self.rescue.stuck_threshold.as_secs(), "rescue.stuck_threshold")?;
        positive(u64::from(self.fetch.retry.max_attempts), "fetch.retry.max_attempts")?;
        positive(self.fetch.max_content_length as u64, "fetch.max_content_length")?;
        positive(
            self.fetch.shortened_max_content_length as u64,
            "fetch.shortened_max_content_length",
        )?;
        Ok(())
    }
}

/// Retry configuration for transient HTTP failures
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct RetryConfig {
    /// Total number of attempts, including the first (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (default: 1000 ms)
    #[serde(default = "default_initial_delay", with = "duration_millis_serde")]
    #[schema(value_type = u64)]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_millis_serde")]
    #[schema(value_type = u64)]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

/// Content fetching configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct FetchConfig {
    /// Retry policy for the content GET
    #[serde(default)]
    pub retry: RetryConfig,

    /// Deadline for the whole fetch including retries (default: 60 seconds)
    #[serde(default = "default_fetch_timeout", with = "duration_millis_serde")]
    #[schema(value_type = u64)]
    pub timeout: Duration,

    /// Characters of content kept for a regular attempt (default: 100_000)
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,

    /// Characters of content kept for a shortened attempt (default: 30_000)
    #[serde(default = "default_shortened_max_content_length")]
    pub shortened_max_content_length: usize,

    /// User-Agent header sent to the content source
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            timeout: default_fetch_timeout(),
            max_content_length: default_max_content_length(),
            shortened_max_content_length: default_shortened_max_content_length(),
            user_agent: default_user_agent(),
        }
    }
}

/// Analysis run configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct AnalysisConfig {
    /// Regular (full prompt) attempts before degrading (default: 3)
    #[serde(default = "default_max_regular_attempts")]
    pub max_regular_attempts: u32,

    /// Shortened prompt attempts before giving up (default: 3)
    #[serde(default = "default_max_shortened_attempts")]
    pub max_shortened_attempts: u32,

    /// Records picked up per run (default: 5)
    #[serde(default = "default_analysis_batch_size")]
    pub batch_size: usize,

    /// Pause between records to respect upstream rate limits (default: 2000 ms)
    #[serde(default = "default_inter_record_delay", with = "duration_millis_serde")]
    #[schema(value_type = u64)]
    pub inter_record_delay: Duration,

    /// Category codes that are never analyzed (default: [99])
    #[serde(default = "default_excluded_categories")]
    pub excluded_categories: Vec<i64>,

    /// Interval between scheduled runs (default: 300 seconds)
    #[serde(default = "default_analysis_interval", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub run_interval: Duration,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_regular_attempts: default_max_regular_attempts(),
            max_shortened_attempts: default_max_shortened_attempts(),
            batch_size: default_analysis_batch_size(),
            inter_record_delay: default_inter_record_delay(),
            excluded_categories: default_excluded_categories(),
            run_interval: default_analysis_interval(),
        }
    }
}

/// Stuck-lease recovery configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct RescueConfig {
    /// Lease age after which a record is considered abandoned (default: 900 seconds)
    #[serde(default = "default_stuck_threshold", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub stuck_threshold: Duration,

    /// Records reset per scan (default: 20)
    #[serde(default = "default_rescue_batch_size")]
    pub batch_size: usize,

    /// Interval between scheduled scans (default: 300 seconds)
    #[serde(default = "default_rescue_interval", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub scan_interval: Duration,
}

impl Default for RescueConfig {
    fn default() -> Self {
        Self {
            stuck_threshold: default_stuck_threshold(),
            batch_size: default_rescue_batch_size(),
            scan_interval: default_rescue_interval(),
        }
    }
}

/// Safety filter threshold applied to one harm category
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SafetySetting {
    /// Harm category identifier (e.g., "HARM_CATEGORY_HARASSMENT")
    pub category: String,
    /// Blocking threshold (e.g., "BLOCK_NONE")
    pub threshold: String,
}

/// Analysis service configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct InvokerConfig {
    /// Base URL of the generateContent API
    #[serde(default = "default_invoker_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_model")]
    pub model: String,

    /// API key (None = read from GEMINI_API_KEY at startup)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Client timeout for one analysis call (default: 120 seconds)
    #[serde(default = "default_invoker_timeout", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub timeout: Duration,

    /// Sampling temperature (default: 0.2)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Output token ceiling (default: 8192)
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Safety thresholds sent with every request
    #[serde(default = "default_safety_settings")]
    pub safety_settings: Vec<SafetySetting>,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            base_url: default_invoker_base_url(),
            model: default_model(),
            api_key: None,
            timeout: default_invoker_timeout(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            safety_settings: default_safety_settings(),
        }
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PersistenceConfig {
    /// Database path (default: "./gazette-analysis.db")
    #[serde(default = "default_database_path")]
    #[schema(value_type = String)]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Trigger API configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiConfig {
    /// Address to bind (default: 127.0.0.1:6790)
    #[serde(default = "default_bind_address")]
    #[schema(value_type = String)]
    pub bind_address: SocketAddr,

    /// Shared secret required in X-Api-Key (None = open)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Run the analysis and rescue loops in-process (default: true)
    ///
    /// Disable when an external scheduler drives the trigger endpoints.
    #[serde(default = "default_true")]
    pub run_scheduled_tasks: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            api_key: None,
            run_scheduled_tasks: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(1000)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_max_content_length() -> usize {
    100_000
}

fn default_shortened_max_content_length() -> usize {
    30_000
}

fn default_user_agent() -> String {
    concat!("gazette-analysis/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_max_regular_attempts() -> u32 {
    3
}

fn default_max_shortened_attempts() -> u32 {
    3
}

fn default_analysis_batch_size() -> usize {
    5
}

fn default_inter_record_delay() -> Duration {
    Duration::from_millis(2000)
}

fn default_excluded_categories() -> Vec<i64> {
    vec![99]
}

fn default_analysis_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_stuck_threshold() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_rescue_batch_size() -> usize {
    20
}

fn default_rescue_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_invoker_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_invoker_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_output_tokens() -> u32 {
    8192
}

fn default_safety_settings() -> Vec<SafetySetting> {
    [
        "HARM_CATEGORY_HARASSMENT",
        "HARM_CATEGORY_HATE_SPEECH",
        "HARM_CATEGORY_SEXUALLY_EXPLICIT",
        "HARM_CATEGORY_DANGEROUS_CONTENT",
    ]
    .into_iter()
    .map(|category| SafetySetting {
        category: category.to_string(),
        threshold: "BLOCK_NONE".to_string(),
    })
    .collect()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./gazette-analysis.db")
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 6790))
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_json_yields_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.analysis.max_regular_attempts, 3);
        assert_eq!(config.analysis.max_shortened_attempts, 3);
        assert_eq!(config.analysis.excluded_categories, vec![99]);
        assert_eq!(config.rescue.stuck_threshold, Duration::from_secs(900));
        assert_eq!(config.rescue.batch_size, 20);
        assert_eq!(config.fetch.retry.max_attempts, 3);
        assert!(!config.fetch.retry.jitter);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_durations_use_their_units() {
        let config: Config = serde_json::from_str(
            r#"{
                "fetch": { "timeout": 1500, "retry": { "initial_delay": 250 } },
                "rescue": { "stuck_threshold": 600 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.fetch.timeout, Duration::from_millis(1500));
        assert_eq!(config.fetch.retry.initial_delay, Duration::from_millis(250));
        assert_eq!(config.rescue.stuck_threshold, Duration::from_secs(600));

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["fetch"]["timeout"], 1500);
        assert_eq!(json["rescue"]["stuck_threshold"], 600);
    }

    #[test]
    fn test_validate_rejects_zero_thresholds() {
        let mut config = Config::default();
        config.analysis.max_shortened_attempts = 0;

        match config.validate() {
            Err(Error::Config { key, .. }) => {
                assert_eq!(key.as_deref(), Some("analysis.max_shortened_attempts"));
            }
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "analysis": {{ "batch_size": 10, "excluded_categories": [98, 99] }} }}"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.analysis.batch_size, 10);
        assert_eq!(config.analysis.excluded_categories, vec![98, 99]);
    }

    #[test]
    fn test_from_file_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        assert!(matches!(
            Config::from_file(file.path()),
            Err(Error::Config { .. })
        ));
    }
}
