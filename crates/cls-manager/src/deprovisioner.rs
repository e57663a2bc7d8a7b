//! Release-or-destroy deprovisioning of shared CLS instances
//!
//! Two independently retryable phases: drop the runtime's reference, then,
//! once no references remain, destroy the physical instance and delete the
//! record. Whatever phase a previous run reached is visible in the record,
//! so a re-run always resumes at the right place.

use crate::error::ClsError;
use crate::gateway::InstanceGateway;
use crate::retry::{RetryConfig, retry_on_conflict};
use crate::state::RegistryStore;
use cls_common::SharedInstance;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A runtime instance letting go of a shared instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeprovisionRequest {
    pub instance_id: String,
    pub runtime_instance_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeprovisionOutcome {
    /// The record was already gone
    pub already_removed: bool,
    /// The runtime held no reference when the call started
    pub already_unreferenced: bool,
    /// The physical instance was destroyed and the record deleted
    pub is_last_reference: bool,
}

/// Result of the unreference phase
enum Release {
    Removed,
    /// Other runtimes still hold references
    Shared { already_unreferenced: bool },
    /// No references left; destroy is due
    Unreferenced {
        instance: SharedInstance,
        already_unreferenced: bool,
    },
}

pub struct Deprovisioner<S> {
    store: Arc<S>,
    retry: RetryConfig,
}

impl<S: RegistryStore> Deprovisioner<S> {
    pub fn new(store: Arc<S>, retry: RetryConfig) -> Self {
        Self { store, retry }
    }

    /// Remove the runtime's reference and destroy the shared instance if it
    /// was the last one.
    pub async fn deprovision<G: InstanceGateway>(
        &self,
        gateway: &G,
        request: &DeprovisionRequest,
    ) -> Result<DeprovisionOutcome, ClsError> {
        let release =
            retry_on_conflict(&self.retry, "deprovision", || self.unreference(request)).await?;

        match release {
            Release::Removed => Ok(DeprovisionOutcome {
                already_removed: true,
                ..Default::default()
            }),
            Release::Shared {
                already_unreferenced,
            } => Ok(DeprovisionOutcome {
                already_unreferenced,
                ..Default::default()
            }),
            Release::Unreferenced {
                instance,
                already_unreferenced,
            } => {
                self.destroy(gateway, &instance).await?;
                Ok(DeprovisionOutcome {
                    already_unreferenced,
                    is_last_reference: true,
                    ..Default::default()
                })
            }
        }
    }

    /// The account's live record if this runtime still references it.
    ///
    /// Finds a reference taken by a provision that failed before the caller
    /// learned the instance id, typically a `creating` record whose remote
    /// create never succeeded.
    pub async fn held_instance(
        &self,
        account_id: &str,
        runtime_instance_id: &str,
    ) -> Result<Option<SharedInstance>, ClsError> {
        let live = self
            .store
            .find_live_by_account(account_id)
            .await
            .map_err(ClsError::storage("find_live_by_account", account_id))?;

        Ok(live.filter(|instance| instance.is_referenced_by(runtime_instance_id)))
    }

    async fn unreference(&self, request: &DeprovisionRequest) -> Result<Release, ClsError> {
        let instance_id = &request.instance_id;
        let runtime_instance_id = &request.runtime_instance_id;

        let Some(instance) = self
            .store
            .find_by_id(instance_id)
            .await
            .map_err(ClsError::storage("find_by_id", instance_id))?
        else {
            debug!(instance_id = %instance_id, "Shared instance already removed");
            return Ok(Release::Removed);
        };

        if !instance.is_referenced_by(runtime_instance_id) {
            debug!(
                instance_id = %instance_id,
                runtime_instance_id = %runtime_instance_id,
                references = instance.reference_count(),
                "Runtime no longer references shared instance"
            );
            return Ok(if instance.is_live() {
                Release::Shared {
                    already_unreferenced: true,
                }
            } else {
                Release::Unreferenced {
                    instance,
                    already_unreferenced: true,
                }
            });
        }

        let update = match self
            .store
            .remove_reference(instance.version, instance_id, runtime_instance_id)
            .await
        {
            Ok(update) => update,
            Err(e) if e.is_not_found() => return Ok(Release::Removed),
            Err(e) => return Err(ClsError::storage("remove_reference", instance_id)(e)),
        };

        info!(
            instance_id = %instance_id,
            account_id = %instance.owner_account_id,
            runtime_instance_id = %runtime_instance_id,
            version = update.version,
            references = update.reference_count,
            "Removed shared instance reference"
        );

        if update.reference_count > 0 {
            return Ok(Release::Shared {
                already_unreferenced: false,
            });
        }

        Ok(Release::Unreferenced {
            instance,
            already_unreferenced: false,
        })
    }

    /// Destroy the physical instance, then forget the record
    async fn destroy<G: InstanceGateway>(
        &self,
        gateway: &G,
        instance: &SharedInstance,
    ) -> Result<(), ClsError> {
        gateway
            .destroy(&instance.id)
            .await
            .map_err(ClsError::gateway("destroy", &instance.id))?;

        if let Err(source) = self.store.delete(&instance.id).await {
            warn!(
                instance_id = %instance.id,
                account_id = %instance.owner_account_id,
                error = %source,
                "Physical instance destroyed but registry record not deleted"
            );
            return Err(ClsError::PartialFailure {
                resource_id: instance.id.clone(),
                account_id: instance.owner_account_id.clone(),
                region: instance.region.clone(),
                source,
            });
        }

        info!(
            instance_id = %instance.id,
            account_id = %instance.owner_account_id,
            "Destroyed shared instance"
        );
        Ok(())
    }
}
