use super::{ClsOperation, StepResult, classify};
use crate::config::StepConfig;
use crate::deprovisioner::{DeprovisionRequest, Deprovisioner};
use crate::error::ClsError;
use crate::gateway::GatewayProvider;
use crate::state::RegistryStore;
use cls_common::{BackendRegion, backend_region_for};
use std::sync::Arc;
use tracing::{debug, info};

const STEP: &str = "deprovision_cls";

/// Releases the operation's runtime from its shared instance
pub struct DeprovisionStep<S, P> {
    deprovisioner: Deprovisioner<S>,
    gateways: Arc<P>,
    config: StepConfig,
}

impl<S: RegistryStore, P: GatewayProvider> DeprovisionStep<S, P> {
    pub fn new(deprovisioner: Deprovisioner<S>, gateways: Arc<P>, config: StepConfig) -> Self {
        Self {
            deprovisioner,
            gateways,
            config,
        }
    }

    pub fn name(&self) -> &'static str {
        STEP
    }

    pub async fn run(&self, mut op: ClsOperation) -> StepResult {
        // A failed provision can hold a reference the operation never learned about
        if op.cls.instance_id.is_none() {
            let held = self
                .deprovisioner
                .held_instance(&op.global_account_id, &op.runtime_instance_id)
                .await;
            match held {
                Ok(Some(instance)) => {
                    info!(
                        runtime_instance_id = %op.runtime_instance_id,
                        instance_id = %instance.id,
                        status = %instance.status,
                        "Releasing reference left by an unfinished provision"
                    );
                    op.cls.region = op.cls.region.or(BackendRegion::parse(&instance.region));
                    op.cls.instance_id = Some(instance.id);
                }
                Ok(None) => {
                    debug!(runtime_instance_id = %op.runtime_instance_id, "No shared instance recorded");
                    return StepResult::Completed(op);
                }
                Err(e) => return classify(STEP, op, &e, self.config.retry_interval()),
            }
        }
        let Some(instance_id) = op.cls.instance_id.clone() else {
            return StepResult::Completed(op);
        };

        // Operations recorded before the region was stored fall back to the runtime region
        let region = match op.cls.region {
            Some(region) => region,
            None => match backend_region_for(op.runtime_region.as_deref()) {
                Ok(region) => region,
                Err(e) => {
                    let e = ClsError::Config(e.into());
                    return classify(STEP, op, &e, self.config.retry_interval());
                }
            },
        };

        let gateway = match self.gateways.gateway_for(region) {
            Ok(gateway) => gateway,
            Err(e) => return classify(STEP, op, &e, self.config.retry_interval()),
        };

        let request = DeprovisionRequest {
            instance_id,
            runtime_instance_id: op.runtime_instance_id.to_string(),
        };

        let deprovisioned = tokio::time::timeout(
            self.config.timeout(),
            self.deprovisioner.deprovision(&gateway, &request),
        )
        .await;

        match deprovisioned {
            Ok(Ok(outcome)) => {
                info!(
                    runtime_instance_id = %op.runtime_instance_id,
                    instance_id = %request.instance_id,
                    already_removed = outcome.already_removed,
                    already_unreferenced = outcome.already_unreferenced,
                    last_reference = outcome.is_last_reference,
                    "Shared instance released"
                );
                op.cls.provisioned = false;
                StepResult::Completed(op)
            }
            Ok(Err(e)) => classify(STEP, op, &e, self.config.retry_interval()),
            Err(_) => StepResult::Retry {
                reason: format!(
                    "deprovisioning did not finish within {:?}",
                    self.config.timeout()
                ),
                op,
                after: self.config.retry_interval(),
            },
        }
    }
}
