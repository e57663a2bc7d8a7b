//! Registry store error taxonomy
//!
//! Every store operation fails with one of these variants so callers can
//! decide between re-reading, retrying later and giving up without
//! inspecting driver messages.

use thiserror::Error;

/// Errors returned by a [`RegistryStore`](super::RegistryStore)
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Connection or transport failure (safe to retry the whole operation)
    #[error("storage unavailable during {op}: {source}")]
    StorageUnavailable {
        op: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// Another writer changed the record since it was read
    #[error("version conflict on shared instance {instance_id}: expected version {expected}, found {}", display_version(*actual))]
    VersionConflict {
        instance_id: String,
        expected: i64,
        actual: Option<i64>,
    },

    /// Caller broke a registry invariant (not retryable)
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The runtime instance already references this shared instance
    #[error("runtime instance {runtime_instance_id} already references shared instance {instance_id}")]
    DuplicateReference {
        instance_id: String,
        runtime_instance_id: String,
    },

    /// No live record with this id
    #[error("shared instance {instance_id} not found")]
    NotFound { instance_id: String },
}

fn display_version(actual: Option<i64>) -> String {
    match actual {
        Some(v) => v.to_string(),
        None => "another live instance".to_string(),
    }
}

impl RegistryError {
    /// Wrap a driver error with the operation that hit it
    pub fn unavailable(op: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| RegistryError::StorageUnavailable { op, source }
    }

    /// Check if this is an optimistic concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, RegistryError::VersionConflict { .. })
    }

    /// Check if retrying the calling operation later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RegistryError::StorageUnavailable { .. } | RegistryError::VersionConflict { .. }
        )
    }

    pub fn is_duplicate_reference(&self) -> bool {
        matches!(self, RegistryError::DuplicateReference { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound { .. })
    }
}

/// Check whether a driver error is a UNIQUE constraint violation
pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}
