//! Configuration module for feedvault.

use serde::Deserialize;
use std::path::Path;

use crate::{Result, VaultError};

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/feedvault.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/feedvault.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Feed retrieval configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Read timeout in seconds.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    /// Total request timeout in seconds.
    #[serde(default = "default_total_timeout")]
    pub total_timeout_secs: u64,
    /// Maximum number of redirects.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    /// Maximum feed size in bytes.
    #[serde(default = "default_max_feed_size")]
    pub max_feed_size_bytes: u64,
    /// Maximum description length in characters.
    #[serde(default = "default_max_description_length")]
    pub max_description_length: usize,
    /// User agent sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Allow loopback, private and reserved hosts.
    #[serde(default)]
    pub allow_private_hosts: bool,
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_read_timeout() -> u64 {
    20
}

fn default_total_timeout() -> u64 {
    30
}

fn default_max_redirects() -> usize {
    5
}

fn default_max_feed_size() -> u64 {
    5 * 1024 * 1024 // 5MB
}

fn default_max_description_length() -> usize {
    10000
}

fn default_user_agent() -> String {
    format!("feedvault/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            total_timeout_secs: default_total_timeout(),
            max_redirects: default_max_redirects(),
            max_feed_size_bytes: default_max_feed_size(),
            max_description_length: default_max_description_length(),
            user_agent: default_user_agent(),
            allow_private_hosts: false,
        }
    }
}

/// Ingestion configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Maximum number of sources fetched at the same time.
    #[serde(default = "default_ingest_concurrency")]
    pub concurrency: usize,
    /// Refresh interval in seconds for the background refresh loop.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    /// Deadline for a whole ingestion call in seconds (0 = none).
    #[serde(default)]
    pub deadline_secs: u64,
}

fn default_ingest_concurrency() -> usize {
    16
}

fn default_refresh_interval() -> u64 {
    300 // 5 minutes
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrency: default_ingest_concurrency(),
            refresh_interval_secs: default_refresh_interval(),
            deadline_secs: 0,
        }
    }
}

/// How a keyword filter reports a title that matches several keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeywordPolicy {
    /// Emit the item once for every matching keyword.
    #[default]
    PerKeyword,
    /// Emit the item once if any keyword matches.
    AnyKeyword,
}

/// Query configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    /// Timezone used to format story times and read window bounds.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// chrono format string for story times and window bounds.
    #[serde(default = "default_time_format")]
    pub time_format: String,
    /// Keyword match policy.
    #[serde(default)]
    pub keyword_policy: KeywordPolicy,
    /// Deadline for multi-source queries in seconds (0 = none).
    #[serde(default)]
    pub deadline_secs: u64,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_time_format() -> String {
    "%Y-%m-%d %H:%M:%S".to_string()
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            time_format: default_time_format(),
            keyword_policy: KeywordPolicy::default(),
            deadline_secs: 0,
        }
    }
}

/// What a subscribe exchange does when refreshing a new source fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorPolicy {
    /// Log the failure and keep serving the other identifiers.
    #[default]
    Skip,
    /// Terminate the whole exchange with the error.
    Abort,
}

/// Subscribe-and-refresh configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscribeConfig {
    /// Failure policy for the refresh of a newly registered source.
    #[serde(default)]
    pub on_fetch_error: FetchErrorPolicy,
}

/// Storage retry configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Maximum retries for a transient storage error.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Initial backoff in milliseconds, doubled after each attempt.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff() -> u64 {
    50
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff(),
        }
    }
}

/// Sources registered when the binary starts.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedConfig {
    /// Feed URLs.
    #[serde(default)]
    pub sources: Vec<String>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Feed retrieval configuration.
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Ingestion configuration.
    #[serde(default)]
    pub ingest: IngestConfig,
    /// Query configuration.
    #[serde(default)]
    pub query: QueryConfig,
    /// Subscribe-and-refresh configuration.
    #[serde(default)]
    pub subscribe: SubscribeConfig,
    /// Storage retry configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Startup sources.
    #[serde(default)]
    pub seed: SeedConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(VaultError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| VaultError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `FEEDVAULT_DATABASE_PATH`: Override the database file path
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("FEEDVAULT_DATABASE_PATH") {
            if !path.is_empty() {
                self.database.path = path;
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.ingest.concurrency == 0 {
            return Err(VaultError::Config(
                "ingest.concurrency must be at least 1".to_string(),
            ));
        }
        if self.ingest.refresh_interval_secs == 0 {
            return Err(VaultError::Config(
                "ingest.refresh_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.query.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(VaultError::Config(format!(
                "unknown timezone: {}",
                self.query.timezone
            )));
        }
        Ok(())
    }
}
