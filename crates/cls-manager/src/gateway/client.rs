//! Service-manager backed gateway

use super::service_manager::{
    ClsParameters, InstanceKey, ProvisioningInput, ServiceManagerClient,
    ServiceManagerClientFactory,
};
use super::{CreateInstanceRequest, GatewayProvider, InstanceGateway};
use crate::config::ClsConfig;
use crate::error::ClsError;
use anyhow::{Context, Result};
use cls_common::BackendRegion;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Broker coordinates of the CLS service offering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceOffering {
    pub broker_id: String,
    pub service_id: String,
    pub plan_id: String,
}

impl ServiceOffering {
    pub fn from_config(config: &ClsConfig) -> Self {
        Self {
            broker_id: config.broker_id.clone(),
            service_id: config.service_id.clone(),
            plan_id: config.plan_id.clone(),
        }
    }

    fn instance_key(&self, instance_id: &str) -> InstanceKey {
        InstanceKey {
            broker_id: self.broker_id.clone(),
            service_id: self.service_id.clone(),
            plan_id: self.plan_id.clone(),
            instance_id: instance_id.to_string(),
        }
    }
}

/// Creates and destroys CLS instances through one service manager
#[derive(Debug, Clone)]
pub struct ClsClient<C> {
    client: C,
    offering: ServiceOffering,
}

impl<C: ServiceManagerClient> ClsClient<C> {
    pub fn new(client: C, offering: ServiceOffering) -> Self {
        Self { client, offering }
    }

    fn provisioning_input(&self, request: &CreateInstanceRequest) -> ProvisioningInput {
        let mut context = Map::new();
        context.insert("platform".to_string(), Value::from("kubernetes"));

        ProvisioningInput {
            id: request.instance_id.clone(),
            service_id: self.offering.service_id.clone(),
            plan_id: self.offering.plan_id.clone(),
            space_guid: Uuid::new_v4().to_string(),
            organization_guid: Uuid::new_v4().to_string(),
            context,
            parameters: ClsParameters::from(&request.parameters),
        }
    }

    /// Provision a CLS instance under the request's pre-generated id
    pub async fn create_instance(&self, request: &CreateInstanceRequest) -> Result<String> {
        let input = self.provisioning_input(request);

        match self
            .client
            .provision(&self.offering.broker_id, &input, true)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_already_exists() => {
                debug!(instance_id = %input.id, "CLS instance already provisioned");
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!(
                        "provision call failed for broker {} (instance {}, account {})",
                        self.offering.broker_id, input.id, request.account_id
                    )
                });
            }
        }

        info!(
            instance_id = %input.id,
            account_id = %request.account_id,
            region = %request.region,
            "Provisioned CLS instance"
        );
        Ok(input.id)
    }

    /// Deprovision a CLS instance; an unknown instance counts as deprovisioned
    pub async fn destroy_instance(&self, instance_id: &str) -> Result<()> {
        let key = self.offering.instance_key(instance_id);

        match self.client.deprovision(&key, true).await {
            Ok(()) => {
                info!(instance_id = %instance_id, "Deprovisioned CLS instance");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(instance_id = %instance_id, "CLS instance already gone");
                Ok(())
            }
            Err(e) => Err(e).with_context(|| {
                format!(
                    "deprovision call failed for broker {} (instance {instance_id})",
                    self.offering.broker_id
                )
            }),
        }
    }
}

impl<C: ServiceManagerClient> InstanceGateway for ClsClient<C> {
    async fn create(&self, request: &CreateInstanceRequest) -> Result<String> {
        ClsClient::create_instance(self, request).await
    }

    async fn destroy(&self, resource_id: &str) -> Result<()> {
        ClsClient::destroy_instance(self, resource_id).await
    }
}

/// Builds a [`ClsClient`] with the credentials of a backend region
pub struct ClsClientFactory<F> {
    factory: F,
    config: Arc<ClsConfig>,
}

impl<F: ServiceManagerClientFactory> ClsClientFactory<F> {
    pub fn new(factory: F, config: Arc<ClsConfig>) -> Self {
        Self { factory, config }
    }
}

impl<F: ServiceManagerClientFactory> GatewayProvider for ClsClientFactory<F> {
    type Gateway = ClsClient<F::Client>;

    fn gateway_for(&self, region: BackendRegion) -> Result<Self::Gateway, ClsError> {
        let credentials = self.config.credentials_for(region)?;
        debug!(region = %region, url = %credentials.url, "Using service manager credentials");

        Ok(ClsClient::new(
            self.factory.for_credentials(credentials),
            ServiceOffering::from_config(&self.config),
        ))
    }
}
