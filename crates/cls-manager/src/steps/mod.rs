//! Workflow step adapters
//!
//! A workflow engine runs provisioning and deprovisioning as retryable steps
//! over a persisted operation. The adapters here call the provisioner and
//! deprovisioner, record what they learned on the operation, and tell the
//! engine whether to move on, come back later, or fail the operation.

mod deprovision;
mod provision;

pub use deprovision::DeprovisionStep;
pub use provision::ProvisionStep;

use crate::error::ClsError;
use cls_common::BackendRegion;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Global account owning a runtime
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display, derive_more::Deref,
)]
pub struct GlobalAccountId(String);

impl GlobalAccountId {
    pub fn new(id: impl Into<String>) -> Self {
        GlobalAccountId(id.into())
    }
}

/// Runtime instance taking part in an operation
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display, derive_more::Deref,
)]
pub struct RuntimeInstanceId(String);

impl RuntimeInstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        RuntimeInstanceId(id.into())
    }
}

/// Shared instance bookkeeping carried on the operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClsData {
    /// Backend region the instance was provisioned in
    pub region: Option<BackendRegion>,
    pub instance_id: Option<String>,
    pub provisioned: bool,
}

/// The slice of a runtime operation these steps read and write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClsOperation {
    pub runtime_instance_id: RuntimeInstanceId,
    pub global_account_id: GlobalAccountId,
    /// Runtime region requested at provisioning, if any
    pub runtime_region: Option<String>,
    #[serde(default)]
    pub cls: ClsData,
}

impl ClsOperation {
    pub fn new(runtime_instance_id: RuntimeInstanceId, global_account_id: GlobalAccountId) -> Self {
        Self {
            runtime_instance_id,
            global_account_id,
            runtime_region: None,
            cls: ClsData::default(),
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.runtime_region = Some(region.into());
        self
    }
}

/// What the workflow engine should do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    Completed(ClsOperation),
    Retry {
        op: ClsOperation,
        after: Duration,
        reason: String,
    },
    Failed {
        op: ClsOperation,
        reason: String,
    },
}

impl StepResult {
    pub fn operation(&self) -> &ClsOperation {
        match self {
            StepResult::Completed(op)
            | StepResult::Retry { op, .. }
            | StepResult::Failed { op, .. } => op,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, StepResult::Completed(_))
    }
}

/// Error message with its cause chain
fn describe(e: &ClsError) -> String {
    let mut message = e.to_string();
    let mut source = std::error::Error::source(e);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Map an orchestration error to retry or failure
fn classify(step: &'static str, op: ClsOperation, e: &ClsError, retry_after: Duration) -> StepResult {
    let reason = describe(e);

    if e.is_transient() {
        warn!(
            step,
            runtime_instance_id = %op.runtime_instance_id,
            retry_after = ?retry_after,
            error = %reason,
            "Step failed, will retry"
        );
        return StepResult::Retry {
            op,
            after: retry_after,
            reason,
        };
    }

    warn!(
        step,
        runtime_instance_id = %op.runtime_instance_id,
        partial_failure = e.is_partial_failure(),
        error = %reason,
        "Step failed permanently"
    );
    StepResult::Failed { op, reason }
}
