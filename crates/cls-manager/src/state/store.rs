//! Registry store contract
//!
//! The store is the only place shared instance records are mutated. All
//! reference mutations are compare-and-swap on the record version, so
//! concurrent provisioners for one account serialize on the record without
//! holding locks across the remote create/destroy calls.

use super::error::RegistryError;
use super::types::ReferenceUpdate;
use cls_common::SharedInstance;
use std::future::Future;

/// Persistent, optimistically versioned storage of shared instances.
///
/// Every method is atomic with respect to concurrent callers.
pub trait RegistryStore: Send + Sync {
    /// Find the active instance with at least one reference for an account.
    ///
    /// Provisioning reads through [`find_live_by_account`](Self::find_live_by_account)
    /// instead, since it also has to see `creating` records.
    fn find_by_account(
        &self,
        account_id: &str,
    ) -> impl Future<Output = Result<Option<SharedInstance>, RegistryError>> + Send;

    /// Find the account's record holding references, whatever its status.
    ///
    /// At most one such record exists per account.
    fn find_live_by_account(
        &self,
        account_id: &str,
    ) -> impl Future<Output = Result<Option<SharedInstance>, RegistryError>> + Send;

    /// Find a record by id regardless of its reference count.
    fn find_by_id(
        &self,
        instance_id: &str,
    ) -> impl Future<Output = Result<Option<SharedInstance>, RegistryError>> + Send;

    /// Insert a new record.
    ///
    /// Fails with `InvariantViolation` unless the record carries exactly one
    /// reference, and with `VersionConflict` if the account already has a
    /// live record.
    fn insert(
        &self,
        instance: &SharedInstance,
    ) -> impl Future<Output = Result<(), RegistryError>> + Send;

    /// Mark a `creating` record as `active`, bumping its version.
    fn activate(
        &self,
        expected_version: i64,
        instance_id: &str,
    ) -> impl Future<Output = Result<i64, RegistryError>> + Send;

    /// Add a reference and bump the version if it still equals `expected_version`.
    fn add_reference(
        &self,
        expected_version: i64,
        instance_id: &str,
        runtime_instance_id: &str,
    ) -> impl Future<Output = Result<ReferenceUpdate, RegistryError>> + Send;

    /// Remove a reference and bump the version if it still equals `expected_version`.
    ///
    /// Removing a reference that is not held is a successful no-op.
    fn remove_reference(
        &self,
        expected_version: i64,
        instance_id: &str,
        runtime_instance_id: &str,
    ) -> impl Future<Output = Result<ReferenceUpdate, RegistryError>> + Send;

    /// Delete a record whose reference set is empty. Missing records are a no-op.
    fn delete(&self, instance_id: &str) -> impl Future<Output = Result<(), RegistryError>> + Send;

    /// All records, oldest first.
    fn list(&self) -> impl Future<Output = Result<Vec<SharedInstance>, RegistryError>> + Send;
}

/// Reject records that do not start with exactly one reference
pub(crate) fn check_initial_references(instance: &SharedInstance) -> Result<(), RegistryError> {
    if instance.reference_count() != 1 {
        return Err(RegistryError::InvariantViolation(format!(
            "shared instance {} must be inserted with exactly one reference, got {}",
            instance.id,
            instance.reference_count()
        )));
    }
    Ok(())
}
