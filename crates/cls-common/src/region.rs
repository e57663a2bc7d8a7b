//! Runtime region to backend region routing
//!
//! Shared instances are hosted by one of a small set of backend regions.
//! Every runtime region the broker supports maps onto exactly one of them,
//! and a runtime without an explicit region lands in the default one.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Backend region hosting shared instances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendRegion {
    Eu,
    Us,
}

impl BackendRegion {
    /// Region used when the runtime does not specify one
    pub const DEFAULT: BackendRegion = BackendRegion::Eu;

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendRegion::Eu => "eu",
            BackendRegion::Us => "us",
        }
    }

    /// Parse a backend region tag
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "eu" => Some(BackendRegion::Eu),
            "us" => Some(BackendRegion::Us),
            _ => None,
        }
    }
}

impl std::fmt::Display for BackendRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The runtime region has no backend region assigned
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported runtime region: {0}")]
pub struct UnsupportedRegion(pub String);

/// Runtime regions and the backend region serving them
const REGION_MAP: &[(&str, BackendRegion)] = &[
    ("westeurope", BackendRegion::Eu),
    ("northeurope", BackendRegion::Eu),
    ("westus2", BackendRegion::Eu),
    ("uksouth", BackendRegion::Eu),
    ("francecentral", BackendRegion::Eu),
    ("uaenorth", BackendRegion::Eu),
    ("eastus", BackendRegion::Us),
    ("eastus2", BackendRegion::Us),
    ("centralus", BackendRegion::Us),
    ("eastus2euap", BackendRegion::Us),
];

/// Resolve the backend region for a runtime region.
///
/// `None` resolves to [`BackendRegion::DEFAULT`].
pub fn backend_region_for(runtime_region: Option<&str>) -> Result<BackendRegion, UnsupportedRegion> {
    let Some(region) = runtime_region else {
        return Ok(BackendRegion::DEFAULT);
    };

    REGION_MAP
        .iter()
        .find(|(r, _)| *r == region)
        .map(|(_, backend)| *backend)
        .ok_or_else(|| UnsupportedRegion(region.to_string()))
}
