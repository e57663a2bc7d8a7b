//! Lifecycle status of a shared instance record
//!
//! A record is written as `creating` before the remote create call and
//! flipped to `active` once the physical resource exists. Only `active`
//! records are handed out for reuse.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a shared instance record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    /// Record written, remote create not yet confirmed
    Creating,
    /// Physical resource exists and may be shared
    Active,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Creating => "creating",
            InstanceStatus::Active => "active",
        }
    }

    /// Parse a stored status value
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "creating" => Some(InstanceStatus::Creating),
            "active" => Some(InstanceStatus::Active),
            _ => None,
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
