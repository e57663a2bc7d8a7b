//! Error classification for shared instance orchestration
//!
//! Step adapters only need to know whether to come back later, give up, or
//! page an operator. The classifiers below answer that without matching on
//! every variant at each call site.

use crate::config::ConfigError;
use crate::state::RegistryError;
use thiserror::Error;

/// Errors returned by the provisioner and deprovisioner
#[derive(Debug, Error)]
pub enum ClsError {
    /// A registry operation failed
    #[error("registry {op} failed for {key}")]
    Storage {
        op: &'static str,
        /// Shared instance id or account the operation targeted
        key: String,
        #[source]
        source: RegistryError,
    },

    /// The remote create or destroy call failed
    #[error("gateway {op} failed for shared instance {instance_id}")]
    Gateway {
        op: &'static str,
        instance_id: String,
        #[source]
        source: anyhow::Error,
    },

    /// Concurrent writers kept winning the version race
    #[error("gave up on {key} after {attempts} conflicting attempts")]
    ConflictRetriesExhausted { key: String, attempts: usize },

    /// Another runtime is still creating the account's shared instance
    #[error("shared instance {instance_id} for account {account_id} is still being created")]
    ProvisioningInProgress {
        instance_id: String,
        account_id: String,
    },

    /// The remote side effect happened but the registry does not reflect it
    #[error(
        "shared instance {resource_id} (account {account_id}, region {region}) needs manual reconciliation"
    )]
    PartialFailure {
        resource_id: String,
        account_id: String,
        region: String,
        #[source]
        source: RegistryError,
    },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ClsError {
    /// Wrap a registry error with the operation and key that hit it
    pub fn storage(op: &'static str, key: impl Into<String>) -> impl FnOnce(RegistryError) -> Self {
        let key = key.into();
        move |source| match source {
            RegistryError::InvariantViolation(msg) => {
                ClsError::InvariantViolation(format!("{op} on {key}: {msg}"))
            }
            source => ClsError::Storage { op, key, source },
        }
    }

    /// Wrap a gateway error
    pub fn gateway(op: &'static str, instance_id: impl Into<String>) -> impl FnOnce(anyhow::Error) -> Self {
        let instance_id = instance_id.into();
        move |source| ClsError::Gateway {
            op,
            instance_id,
            source,
        }
    }

    /// A single version conflict from the registry, worth an immediate re-read
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, ClsError::Storage { source, .. } if source.is_conflict())
    }

    /// Any form of lost version race, including exhausted retries
    pub fn is_conflict(&self) -> bool {
        self.is_version_conflict() || matches!(self, ClsError::ConflictRetriesExhausted { .. })
    }

    /// Check if re-running the whole operation later may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ClsError::Storage { source, .. } => source.is_transient(),
            ClsError::Gateway { .. }
            | ClsError::ConflictRetriesExhausted { .. }
            | ClsError::ProvisioningInProgress { .. } => true,
            ClsError::PartialFailure { .. }
            | ClsError::InvariantViolation(_)
            | ClsError::Config(_) => false,
        }
    }

    pub fn is_partial_failure(&self) -> bool {
        matches!(self, ClsError::PartialFailure { .. })
    }

    /// Record id carried by a version conflict
    pub fn conflict_key(&self) -> Option<&str> {
        match self {
            ClsError::Storage {
                source: RegistryError::VersionConflict { instance_id, .. },
                ..
            } => Some(instance_id.as_str()),
            _ => None,
        }
    }
}
