//! Service manager transport contract and wire types

use crate::config::{Credentials, PolicyParameters};
use serde::Serialize;
use serde_json::{Map, Value};
use std::future::Future;
use thiserror::Error;

/// Service manager call failures
#[derive(Debug, Error)]
pub enum ServiceManagerError {
    /// Instance unknown to the broker (safe to skip in deprovision)
    #[error("instance not found: {instance_id}")]
    NotFound { instance_id: String },

    /// Instance id already provisioned (safe to ignore in provision)
    #[error("instance already exists: {instance_id}")]
    AlreadyExists { instance_id: String },

    #[error("service manager request failed: {message}")]
    Request {
        status: Option<u16>,
        message: String,
    },
}

impl ServiceManagerError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ServiceManagerError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ServiceManagerError::AlreadyExists { .. })
    }
}

/// Identifies one provisioned service instance at a broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceKey {
    pub broker_id: String,
    pub service_id: String,
    pub plan_id: String,
    pub instance_id: String,
}

/// Body of a provision call
#[derive(Debug, Clone, Serialize)]
pub struct ProvisioningInput {
    pub id: String,
    pub service_id: String,
    pub plan_id: String,
    pub space_guid: String,
    pub organization_guid: String,
    pub context: Map<String, Value>,
    pub parameters: ClsParameters,
}

/// CLS-specific provisioning parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClsParameters {
    pub retention_period: u32,
    pub max_data_instances: u32,
    pub max_ingest_instances: u32,
    pub es_api_enabled: bool,
    pub saml: SamlParameters,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SamlParameters {
    pub enabled: bool,
    pub admin_group: String,
    pub initiated: bool,
    pub exchange_key: String,
    pub roles_key: String,
    pub idp: IdpParameters,
    pub sp: SpParameters,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdpParameters {
    pub metadata_url: String,
    pub entity_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpParameters {
    pub entity_id: String,
    pub signature_private_key: String,
}

impl From<&PolicyParameters> for ClsParameters {
    fn from(policy: &PolicyParameters) -> Self {
        let saml = &policy.saml;
        Self {
            retention_period: policy.retention_period,
            max_data_instances: policy.max_data_instances,
            max_ingest_instances: policy.max_ingest_instances,
            es_api_enabled: false,
            saml: SamlParameters {
                enabled: true,
                admin_group: saml.admin_group.clone(),
                initiated: true,
                exchange_key: saml.exchange_key.clone(),
                roles_key: saml.roles_key.clone(),
                idp: IdpParameters {
                    metadata_url: saml.idp.metadata_url.clone(),
                    entity_id: saml.idp.entity_id.clone(),
                },
                sp: SpParameters {
                    entity_id: saml.sp.entity_id.clone(),
                    signature_private_key: saml.sp.signature_private_key.clone(),
                },
            },
        }
    }
}

/// Open Service Broker calls through the service manager.
///
/// The transport is supplied by the embedding application.
pub trait ServiceManagerClient: Send + Sync {
    fn provision(
        &self,
        broker_id: &str,
        input: &ProvisioningInput,
        accepts_incomplete: bool,
    ) -> impl Future<Output = Result<(), ServiceManagerError>> + Send;

    fn deprovision(
        &self,
        key: &InstanceKey,
        accepts_incomplete: bool,
    ) -> impl Future<Output = Result<(), ServiceManagerError>> + Send;
}

/// Builds service manager clients for a set of credentials
pub trait ServiceManagerClientFactory: Send + Sync {
    type Client: ServiceManagerClient;

    fn for_credentials(&self, credentials: &Credentials) -> Self::Client;
}
