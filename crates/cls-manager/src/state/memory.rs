//! In-process registry store
//!
//! Same contract as the SQLite store, for embedding and tests. Each method
//! holds the lock for its whole read-check-write, which makes it atomic.

use super::error::RegistryError;
use super::store::{RegistryStore, check_initial_references};
use super::types::ReferenceUpdate;
use cls_common::{InstanceStatus, SharedInstance};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Thread-safe in-memory registry of shared instances
#[derive(Clone, Default)]
pub struct MemoryRegistry {
    inner: Arc<Mutex<HashMap<String, SharedInstance>>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, SharedInstance>> {
        // Every mutation completes before it can panic, so the map stays consistent
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn find_live<'a>(
    records: &'a HashMap<String, SharedInstance>,
    account_id: &str,
) -> Option<&'a SharedInstance> {
    records
        .values()
        .find(|r| r.owner_account_id == account_id && r.is_live())
}

fn expect_version(instance: &SharedInstance, expected_version: i64) -> Result<(), RegistryError> {
    if instance.version != expected_version {
        return Err(RegistryError::VersionConflict {
            instance_id: instance.id.clone(),
            expected: expected_version,
            actual: Some(instance.version),
        });
    }
    Ok(())
}

fn not_found(instance_id: &str) -> RegistryError {
    RegistryError::NotFound {
        instance_id: instance_id.to_string(),
    }
}

impl RegistryStore for MemoryRegistry {
    async fn find_by_account(&self, account_id: &str) -> Result<Option<SharedInstance>, RegistryError> {
        Ok(find_live(&self.records(), account_id)
            .filter(|r| r.is_active())
            .cloned())
    }

    async fn find_live_by_account(
        &self,
        account_id: &str,
    ) -> Result<Option<SharedInstance>, RegistryError> {
        Ok(find_live(&self.records(), account_id).cloned())
    }

    async fn find_by_id(&self, instance_id: &str) -> Result<Option<SharedInstance>, RegistryError> {
        Ok(self.records().get(instance_id).cloned())
    }

    async fn insert(&self, instance: &SharedInstance) -> Result<(), RegistryError> {
        check_initial_references(instance)?;
        let mut records = self.records();

        if records.contains_key(&instance.id)
            || find_live(&records, &instance.owner_account_id).is_some()
        {
            return Err(RegistryError::VersionConflict {
                instance_id: instance.id.clone(),
                expected: instance.version,
                actual: None,
            });
        }

        for runtime_instance_id in &instance.references {
            if let Some(holder) = records.values().find(|r| r.is_referenced_by(runtime_instance_id)) {
                return Err(RegistryError::InvariantViolation(format!(
                    "runtime instance {runtime_instance_id} already references shared instance {}",
                    holder.id
                )));
            }
        }

        records.insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    async fn activate(&self, expected_version: i64, instance_id: &str) -> Result<i64, RegistryError> {
        let mut records = self.records();
        let instance = records
            .get_mut(instance_id)
            .ok_or_else(|| not_found(instance_id))?;
        expect_version(instance, expected_version)?;

        if instance.status != InstanceStatus::Creating {
            return Err(RegistryError::InvariantViolation(format!(
                "activate rejected for shared instance {instance_id} in status {}",
                instance.status
            )));
        }

        instance.status = InstanceStatus::Active;
        instance.version += 1;
        Ok(instance.version)
    }

    async fn add_reference(
        &self,
        expected_version: i64,
        instance_id: &str,
        runtime_instance_id: &str,
    ) -> Result<ReferenceUpdate, RegistryError> {
        let mut records = self.records();

        let other_holder = records
            .values()
            .find(|r| r.id != instance_id && r.is_referenced_by(runtime_instance_id))
            .map(|r| r.id.clone());

        let instance = records
            .get_mut(instance_id)
            .filter(|r| r.is_live())
            .ok_or_else(|| not_found(instance_id))?;
        expect_version(instance, expected_version)?;

        if instance.is_referenced_by(runtime_instance_id) {
            return Err(RegistryError::DuplicateReference {
                instance_id: instance_id.to_string(),
                runtime_instance_id: runtime_instance_id.to_string(),
            });
        }
        if let Some(holder) = other_holder {
            return Err(RegistryError::InvariantViolation(format!(
                "runtime instance {runtime_instance_id} already references shared instance {holder}"
            )));
        }

        instance.references.insert(runtime_instance_id.to_string());
        instance.version += 1;
        Ok(ReferenceUpdate {
            version: instance.version,
            reference_count: instance.reference_count(),
        })
    }

    async fn remove_reference(
        &self,
        expected_version: i64,
        instance_id: &str,
        runtime_instance_id: &str,
    ) -> Result<ReferenceUpdate, RegistryError> {
        let mut records = self.records();
        let instance = records
            .get_mut(instance_id)
            .ok_or_else(|| not_found(instance_id))?;

        if instance.is_referenced_by(runtime_instance_id) {
            expect_version(instance, expected_version)?;
            instance.references.remove(runtime_instance_id);
            instance.version += 1;
        }

        Ok(ReferenceUpdate {
            version: instance.version,
            reference_count: instance.reference_count(),
        })
    }

    async fn delete(&self, instance_id: &str) -> Result<(), RegistryError> {
        let mut records = self.records();
        match records.get(instance_id) {
            Some(instance) if instance.is_live() => Err(RegistryError::InvariantViolation(format!(
                "shared instance {instance_id} still has {} reference(s)",
                instance.reference_count()
            ))),
            Some(_) => {
                records.remove(instance_id);
                Ok(())
            }
            None => Ok(()),
        }
    }

    async fn list(&self) -> Result<Vec<SharedInstance>, RegistryError> {
        let mut all: Vec<_> = self.records().values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(all)
    }
}
