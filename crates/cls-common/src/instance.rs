//! The reference-counted shared instance record

use crate::status::InstanceStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A shared CLS instance and the runtime instances holding a lease on it.
///
/// One live record exists per owner account. `version` is bumped by every
/// reference mutation and by activation; plain reads never change it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedInstance {
    /// Identifier of the shared resource, also used as its physical id
    pub id: String,
    /// Tenant account owning the instance
    pub owner_account_id: String,
    /// Backend region tag
    pub region: String,
    /// Optimistic concurrency version
    pub version: i64,
    pub status: InstanceStatus,
    pub created_at: DateTime<Utc>,
    /// Runtime instances referencing this shared instance
    pub references: BTreeSet<String>,
}

impl SharedInstance {
    /// A freshly created record: `creating`, version 0, one reference.
    pub fn creating(
        id: impl Into<String>,
        owner_account_id: impl Into<String>,
        region: impl Into<String>,
        runtime_instance_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            owner_account_id: owner_account_id.into(),
            region: region.into(),
            version: 0,
            status: InstanceStatus::Creating,
            created_at: Utc::now(),
            references: BTreeSet::from([runtime_instance_id.into()]),
        }
    }

    pub fn reference_count(&self) -> usize {
        self.references.len()
    }

    pub fn is_referenced_by(&self, runtime_instance_id: &str) -> bool {
        self.references.contains(runtime_instance_id)
    }

    /// Whether any runtime still needs the physical resource
    pub fn is_live(&self) -> bool {
        !self.references.is_empty()
    }

    pub fn is_active(&self) -> bool {
        self.status == InstanceStatus::Active
    }

    /// The only reference, if there is exactly one
    pub fn sole_reference(&self) -> Option<&str> {
        match self.references.len() {
            1 => self.references.iter().next().map(String::as_str),
            _ => None,
        }
    }
}
