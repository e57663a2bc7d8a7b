//! Remote Instance Gateway
//!
//! The gateway performs the physical create and destroy of a shared CLS
//! instance. The provisioner and deprovisioner only see [`InstanceGateway`];
//! the service-manager backed [`ClsClient`] is the production implementation.

mod client;
mod service_manager;

pub use client::{ClsClient, ClsClientFactory, ServiceOffering};
pub use service_manager::{
    ClsParameters, InstanceKey, ProvisioningInput, ServiceManagerClient,
    ServiceManagerClientFactory, ServiceManagerError,
};

use crate::config::PolicyParameters;
use crate::error::ClsError;
use anyhow::Result;
use cls_common::BackendRegion;
use std::future::Future;

/// What the gateway needs to create one physical instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateInstanceRequest {
    /// Pre-generated shared instance id, reused on a resumed create
    pub instance_id: String,
    pub account_id: String,
    pub region: BackendRegion,
    pub parameters: PolicyParameters,
}

/// Physical create/destroy of shared instances.
///
/// Implementations should make `create` with an already used id and
/// `destroy` of a missing instance succeed.
pub trait InstanceGateway: Send + Sync {
    /// Create the physical instance and return its resource id
    fn create(&self, request: &CreateInstanceRequest) -> impl Future<Output = Result<String>> + Send;

    /// Destroy the physical instance
    fn destroy(&self, resource_id: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Hands out a gateway bound to one backend region's credentials
pub trait GatewayProvider: Send + Sync {
    type Gateway: InstanceGateway;

    fn gateway_for(&self, region: BackendRegion) -> Result<Self::Gateway, ClsError>;
}
