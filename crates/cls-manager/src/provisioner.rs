//! Acquire-or-share provisioning of an account's shared CLS instance
//!
//! The first runtime of an account writes a `creating` record holding its
//! reference, creates the physical instance, then activates the record.
//! Later runtimes only add a reference to the active record.

use crate::config::PolicyParameters;
use crate::error::ClsError;
use crate::gateway::{CreateInstanceRequest, InstanceGateway};
use crate::retry::{RetryConfig, retry_on_conflict};
use crate::state::{RegistryError, RegistryStore};
use cls_common::{BackendRegion, SharedInstance};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A runtime instance asking for its account's shared instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionRequest {
    pub account_id: String,
    pub runtime_instance_id: String,
    pub region: BackendRegion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionOutcome {
    /// Physical resource id, equal to the shared instance id
    pub resource_id: String,
    /// Whether this call created the physical resource
    pub created: bool,
    /// References held once the call returned
    pub reference_count: usize,
}

/// Result of the registry half of provisioning
enum Claim {
    /// Reference recorded on an active instance
    Shared(ProvisionOutcome),
    /// `creating` record owned by this runtime, physical create still due
    Pending(SharedInstance),
}

pub struct Provisioner<S> {
    store: Arc<S>,
    retry: RetryConfig,
    policy: PolicyParameters,
}

impl<S: RegistryStore> Provisioner<S> {
    pub fn new(store: Arc<S>, retry: RetryConfig, policy: PolicyParameters) -> Self {
        Self {
            store,
            retry,
            policy,
        }
    }

    /// Attach the runtime instance to its account's shared instance,
    /// creating the instance if the account has none.
    ///
    /// Safe to re-run after any failure: a runtime that already holds a
    /// reference gets the existing instance back, and an interrupted create
    /// is resumed under the same instance id.
    pub async fn provision_if_none_exists<G: InstanceGateway>(
        &self,
        gateway: &G,
        request: &ProvisionRequest,
    ) -> Result<ProvisionOutcome, ClsError> {
        let claim = retry_on_conflict(&self.retry, "provision", || self.claim(request)).await?;

        match claim {
            Claim::Shared(outcome) => Ok(outcome),
            Claim::Pending(instance) => self.create(gateway, request, instance).await,
        }
    }

    async fn claim(&self, request: &ProvisionRequest) -> Result<Claim, ClsError> {
        let account_id = &request.account_id;
        let runtime_instance_id = &request.runtime_instance_id;

        let live = self
            .store
            .find_live_by_account(account_id)
            .await
            .map_err(ClsError::storage("find_live_by_account", account_id))?;

        match live {
            Some(instance) if instance.is_active() => {
                self.share(instance, runtime_instance_id).await.map(Claim::Shared)
            }
            Some(instance) if instance.sole_reference() == Some(runtime_instance_id.as_str()) => {
                info!(
                    instance_id = %instance.id,
                    account_id = %account_id,
                    "Resuming interrupted shared instance creation"
                );
                Ok(Claim::Pending(instance))
            }
            Some(instance) => Err(ClsError::ProvisioningInProgress {
                instance_id: instance.id,
                account_id: account_id.clone(),
            }),
            None => {
                let instance = SharedInstance::creating(
                    Uuid::now_v7().to_string(),
                    account_id,
                    request.region.as_str(),
                    runtime_instance_id,
                );
                self.store
                    .insert(&instance)
                    .await
                    .map_err(ClsError::storage("insert", &instance.id))?;

                debug!(
                    instance_id = %instance.id,
                    account_id = %account_id,
                    "Recorded pending shared instance"
                );
                Ok(Claim::Pending(instance))
            }
        }
    }

    /// Add a reference to an active instance
    async fn share(
        &self,
        instance: SharedInstance,
        runtime_instance_id: &str,
    ) -> Result<ProvisionOutcome, ClsError> {
        if instance.is_referenced_by(runtime_instance_id) {
            debug!(
                instance_id = %instance.id,
                runtime_instance_id = %runtime_instance_id,
                "Runtime already references shared instance"
            );
            return Ok(reused(&instance.id, instance.reference_count()));
        }

        let added = self
            .store
            .add_reference(instance.version, &instance.id, runtime_instance_id)
            .await;

        match added {
            Ok(update) => {
                info!(
                    instance_id = %instance.id,
                    account_id = %instance.owner_account_id,
                    runtime_instance_id = %runtime_instance_id,
                    version = update.version,
                    references = update.reference_count,
                    "Reusing shared instance"
                );
                Ok(reused(&instance.id, update.reference_count))
            }
            Err(e) if e.is_duplicate_reference() => {
                let current = self
                    .store
                    .find_by_id(&instance.id)
                    .await
                    .map_err(ClsError::storage("find_by_id", &instance.id))?;
                let count = current.map_or(instance.reference_count(), |c| c.reference_count());
                Ok(reused(&instance.id, count))
            }
            // Released between our read and write; re-read and start over
            Err(e) if e.is_not_found() => Err(ClsError::storage("add_reference", &instance.id)(
                RegistryError::VersionConflict {
                    instance_id: instance.id.clone(),
                    expected: instance.version,
                    actual: None,
                },
            )),
            Err(e) => Err(ClsError::storage("add_reference", &instance.id)(e)),
        }
    }

    /// Create the physical instance for a pending record and activate it
    async fn create<G: InstanceGateway>(
        &self,
        gateway: &G,
        request: &ProvisionRequest,
        instance: SharedInstance,
    ) -> Result<ProvisionOutcome, ClsError> {
        let create = CreateInstanceRequest {
            instance_id: instance.id.clone(),
            account_id: request.account_id.clone(),
            region: request.region,
            parameters: self.policy.clone(),
        };

        let resource_id = gateway
            .create(&create)
            .await
            .map_err(ClsError::gateway("create", &instance.id))?;

        if resource_id != instance.id {
            return Err(ClsError::InvariantViolation(format!(
                "gateway created {resource_id} instead of shared instance {}",
                instance.id
            )));
        }

        let version = match self.store.activate(instance.version, &instance.id).await {
            Ok(version) => version,
            Err(source) => {
                warn!(
                    instance_id = %instance.id,
                    account_id = %request.account_id,
                    error = %source,
                    "Physical instance created but registry record not activated"
                );
                return Err(ClsError::PartialFailure {
                    resource_id,
                    account_id: request.account_id.clone(),
                    region: instance.region,
                    source,
                });
            }
        };

        info!(
            instance_id = %instance.id,
            account_id = %request.account_id,
            region = %request.region,
            version,
            "Created shared instance"
        );

        Ok(ProvisionOutcome {
            resource_id,
            created: true,
            reference_count: instance.reference_count(),
        })
    }
}

fn reused(resource_id: &str, reference_count: usize) -> ProvisionOutcome {
    ProvisionOutcome {
        resource_id: resource_id.to_string(),
        created: false,
        reference_count,
    }
}
