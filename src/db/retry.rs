//! Bounded retry with exponential backoff for storage calls.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::StorageConfig;
use crate::{Result, VaultError};

/// Retry budget for transient storage errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each following one.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::ZERO,
        }
    }

    /// Build a policy from the storage configuration.
    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&StorageConfig::default())
    }
}

/// Whether a storage error is worth retrying.
///
/// Lock contention, pool exhaustion and I/O failures are; constraint
/// violations and malformed queries are not.
pub fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        sqlx::Error::Database(db_err) => {
            let message = db_err.message().to_lowercase();
            message.contains("database is locked") || message.contains("busy")
        }
        _ => false,
    }
}

/// Run a storage operation, retrying transient failures.
///
/// `op` is called again for each attempt, so it must rebuild its query.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut attempt = 0;
    let mut delay = policy.backoff;

    loop {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(operation = what, attempt, "storage call succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if attempt < policy.max_retries && is_transient(&e) => {
                attempt += 1;
                warn!(
                    operation = what,
                    attempt,
                    error = %e,
                    "transient storage error, retrying in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
            Err(e) => return Err(VaultError::Database(format!("{what}: {e}"))),
        }
    }
}
