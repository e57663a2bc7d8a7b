use super::{ClsOperation, StepResult, classify};
use crate::config::StepConfig;
use crate::error::ClsError;
use crate::gateway::GatewayProvider;
use crate::provisioner::{ProvisionRequest, Provisioner};
use crate::state::RegistryStore;
use cls_common::backend_region_for;
use std::sync::Arc;
use tracing::{debug, info};

const STEP: &str = "provision_cls";

/// Attaches the operation's runtime to its account's shared instance
pub struct ProvisionStep<S, P> {
    provisioner: Provisioner<S>,
    gateways: Arc<P>,
    config: StepConfig,
}

impl<S: RegistryStore, P: GatewayProvider> ProvisionStep<S, P> {
    pub fn new(provisioner: Provisioner<S>, gateways: Arc<P>, config: StepConfig) -> Self {
        Self {
            provisioner,
            gateways,
            config,
        }
    }

    pub fn name(&self) -> &'static str {
        STEP
    }

    pub async fn run(&self, mut op: ClsOperation) -> StepResult {
        if op.cls.provisioned {
            debug!(runtime_instance_id = %op.runtime_instance_id, "Shared instance already provisioned");
            return StepResult::Completed(op);
        }

        let region = match backend_region_for(op.runtime_region.as_deref()) {
            Ok(region) => region,
            Err(e) => {
                let e = ClsError::Config(e.into());
                return classify(STEP, op, &e, self.config.retry_interval());
            }
        };

        let gateway = match self.gateways.gateway_for(region) {
            Ok(gateway) => gateway,
            Err(e) => return classify(STEP, op, &e, self.config.retry_interval()),
        };

        let request = ProvisionRequest {
            account_id: op.global_account_id.to_string(),
            runtime_instance_id: op.runtime_instance_id.to_string(),
            region,
        };

        let provisioned = tokio::time::timeout(
            self.config.timeout(),
            self.provisioner.provision_if_none_exists(&gateway, &request),
        )
        .await;

        match provisioned {
            Ok(Ok(outcome)) => {
                info!(
                    runtime_instance_id = %op.runtime_instance_id,
                    instance_id = %outcome.resource_id,
                    created = outcome.created,
                    references = outcome.reference_count,
                    "Shared instance provisioned"
                );
                op.cls.region = Some(region);
                op.cls.instance_id = Some(outcome.resource_id);
                op.cls.provisioned = true;
                StepResult::Completed(op)
            }
            Ok(Err(e)) => classify(STEP, op, &e, self.config.retry_interval()),
            Err(_) => StepResult::Retry {
                reason: format!(
                    "provisioning did not finish within {:?}",
                    self.config.timeout()
                ),
                op,
                after: self.config.retry_interval(),
            },
        }
    }
}
