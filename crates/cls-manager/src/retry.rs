//! Re-read-and-retry on version conflicts with exponential backoff.
//!
//! Registry mutations are compare-and-swap on the record version. A caller
//! that loses the race re-reads the record and tries again; after a bounded
//! number of attempts the conflict is surfaced as a transient error so the
//! enclosing workflow step can come back later.

use crate::error::ClsError;
use backon::{ExponentialBuilder, Retryable};
use cls_common::defaults::{
    default_conflict_max_attempts, default_conflict_max_delay_ms, default_conflict_min_delay_ms,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Backoff policy for version conflict retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, garde::Validate)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Delay before the first retry
    #[serde(default = "default_conflict_min_delay_ms")]
    #[garde(range(min = 1))]
    pub min_delay_ms: u64,

    /// Cap for exponential growth of the delay
    #[serde(default = "default_conflict_max_delay_ms")]
    #[garde(range(min = 1))]
    pub max_delay_ms: u64,

    /// Retries after the first attempt
    #[serde(default = "default_conflict_max_attempts")]
    #[garde(range(min = 1, max = 100))]
    pub max_attempts: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_conflict_min_delay_ms(),
            max_delay_ms: default_conflict_max_delay_ms(),
            max_attempts: default_conflict_max_attempts(),
        }
    }
}

impl RetryConfig {
    /// Policy that retries immediately, for tests
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            min_delay_ms: 1,
            max_delay_ms: 1,
            max_attempts,
        }
    }

    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.min_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_max_times(self.max_attempts)
            .with_jitter()
    }

    /// Total number of tries, including the first one
    pub fn total_attempts(&self) -> usize {
        self.max_attempts + 1
    }
}

/// Run `attempt` until it succeeds, fails with anything but a version
/// conflict, or the retry budget is spent.
///
/// Each attempt must re-read the record it mutates. A conflict that
/// survives every retry becomes [`ClsError::ConflictRetriesExhausted`].
pub async fn retry_on_conflict<T, F, Fut>(
    config: &RetryConfig,
    operation: &'static str,
    attempt: F,
) -> Result<T, ClsError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClsError>>,
{
    let result = attempt
        .retry(config.backoff())
        .when(ClsError::is_version_conflict)
        .notify(|e, dur| {
            warn!(
                operation,
                delay = ?dur,
                error = %e,
                "Version conflict, re-reading and retrying"
            );
        })
        .await;

    match result {
        Err(e) if e.is_version_conflict() => Err(ClsError::ConflictRetriesExhausted {
            key: e.conflict_key().unwrap_or(operation).to_string(),
            attempts: config.total_attempts(),
        }),
        other => other,
    }
}
