//! Default configuration values shared by the manager and its tests

/// Initial delay before re-reading a record after a version conflict (ms)
pub const DEFAULT_CONFLICT_MIN_DELAY_MS: u64 = 10;

/// Upper bound on the delay between conflict retries (ms)
pub const DEFAULT_CONFLICT_MAX_DELAY_MS: u64 = 500;

/// Number of re-read-and-retry attempts after a version conflict
pub const DEFAULT_CONFLICT_MAX_ATTEMPTS: usize = 5;

/// Delay a workflow step asks for after a transient failure (seconds)
pub const DEFAULT_STEP_RETRY_INTERVAL_SECS: u64 = 10;

/// Upper bound on a single provision/deprovision call made by a step (seconds)
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 120;

// Serde default functions for struct field defaults

/// Returns the default minimum conflict retry delay
pub fn default_conflict_min_delay_ms() -> u64 {
    DEFAULT_CONFLICT_MIN_DELAY_MS
}

/// Returns the default maximum conflict retry delay
pub fn default_conflict_max_delay_ms() -> u64 {
    DEFAULT_CONFLICT_MAX_DELAY_MS
}

/// Returns the default number of conflict retries
pub fn default_conflict_max_attempts() -> usize {
    DEFAULT_CONFLICT_MAX_ATTEMPTS
}

/// Returns the default step retry interval
pub fn default_step_retry_interval_secs() -> u64 {
    DEFAULT_STEP_RETRY_INTERVAL_SECS
}

/// Returns the default step timeout
pub fn default_step_timeout_secs() -> u64 {
    DEFAULT_STEP_TIMEOUT_SECS
}
