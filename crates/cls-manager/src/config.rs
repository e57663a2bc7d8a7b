//! Configuration for shared CLS instance management
//!
//! Loaded once at startup from a JSON file. Holds the policy parameters sent
//! on every create, the service offering coordinates, one set of
//! service-manager credentials per backend region, and retry tuning.

use crate::retry::RetryConfig;
use cls_common::defaults::{default_step_retry_interval_secs, default_step_timeout_secs};
use cls_common::{BackendRegion, UnsupportedRegion, backend_region_for};
use garde::Validate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const REDACTED: &str = "<redacted>";

/// Configuration errors. None of these go away by retrying.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error(transparent)]
    UnsupportedRegion(#[from] UnsupportedRegion),

    #[error("no service manager credentials configured for backend region {region}")]
    MissingCredentials { region: BackendRegion },
}

/// Identity provider side of the SAML setup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct IdpConfig {
    #[garde(url)]
    pub metadata_url: String,
    #[garde(length(min = 1))]
    pub entity_id: String,
}

/// Service provider side of the SAML setup
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct SpConfig {
    #[garde(length(min = 1))]
    pub entity_id: String,
    #[garde(length(min = 1))]
    pub signature_private_key: String,
}

impl fmt::Debug for SpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpConfig")
            .field("entity_id", &self.entity_id)
            .field("signature_private_key", &REDACTED)
            .finish()
    }
}

/// SAML login for the dashboards of every shared instance
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct SamlConfig {
    #[garde(length(min = 1))]
    pub admin_group: String,
    #[garde(length(min = 1))]
    pub exchange_key: String,
    #[garde(length(min = 1))]
    pub roles_key: String,
    #[garde(dive)]
    pub idp: IdpConfig,
    #[garde(dive)]
    pub sp: SpConfig,
}

impl fmt::Debug for SamlConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SamlConfig")
            .field("admin_group", &self.admin_group)
            .field("exchange_key", &REDACTED)
            .field("roles_key", &self.roles_key)
            .field("idp", &self.idp)
            .field("sp", &self.sp)
            .finish()
    }
}

/// Service-manager credentials for one backend region
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct Credentials {
    #[garde(skip)]
    pub region: BackendRegion,
    #[garde(url)]
    pub url: String,
    #[garde(length(min = 1))]
    pub username: String,
    #[garde(length(min = 1))]
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("region", &self.region)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &REDACTED)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ServiceManagerConfig {
    #[garde(length(min = 1), dive)]
    pub credentials: Vec<Credentials>,
}

/// Timing of the workflow step adapters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct StepConfig {
    /// Delay requested after a transient failure
    #[serde(default = "default_step_retry_interval_secs")]
    #[garde(range(min = 1))]
    pub retry_interval_secs: u64,

    /// Bound on one provision or deprovision call
    #[serde(default = "default_step_timeout_secs")]
    #[garde(range(min = 1))]
    pub timeout_secs: u64,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            retry_interval_secs: default_step_retry_interval_secs(),
            timeout_secs: default_step_timeout_secs(),
        }
    }
}

impl StepConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Policy parameters sent with every create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyParameters {
    pub retention_period: u32,
    pub max_data_instances: u32,
    pub max_ingest_instances: u32,
    pub saml: SamlConfig,
}

/// Shared CLS instance configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ClsConfig {
    /// Log retention in days
    #[garde(range(min = 1))]
    pub retention_period: u32,

    #[garde(range(min = 1))]
    pub max_data_instances: u32,

    #[garde(range(min = 1))]
    pub max_ingest_instances: u32,

    #[garde(dive)]
    pub saml: SamlConfig,

    /// Service offering every shared instance is provisioned from
    #[garde(length(min = 1))]
    pub broker_id: String,
    #[garde(length(min = 1))]
    pub service_id: String,
    #[garde(length(min = 1))]
    pub plan_id: String,

    #[garde(dive)]
    pub service_manager: ServiceManagerConfig,

    #[serde(default)]
    #[garde(dive)]
    pub retry: RetryConfig,

    #[serde(default)]
    #[garde(dive)]
    pub steps: StepConfig,
}

impl ClsConfig {
    /// Read, parse and validate a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ClsConfig = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.check()?;
        Ok(config)
    }

    /// Field validation plus the cross-field rules garde cannot express
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()
            .map_err(|report| ConfigError::Invalid(report.to_string()))?;

        if self.retry.min_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "retry.min_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.min_delay_ms, self.retry.max_delay_ms
            )));
        }

        let mut seen = Vec::new();
        for credentials in &self.service_manager.credentials {
            if seen.contains(&credentials.region) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate service manager credentials for region {}",
                    credentials.region
                )));
            }
            seen.push(credentials.region);
        }

        Ok(())
    }

    pub fn policy(&self) -> PolicyParameters {
        PolicyParameters {
            retention_period: self.retention_period,
            max_data_instances: self.max_data_instances,
            max_ingest_instances: self.max_ingest_instances,
            saml: self.saml.clone(),
        }
    }

    /// Credentials for a backend region
    pub fn credentials_for(&self, region: BackendRegion) -> Result<&Credentials, ConfigError> {
        self.service_manager
            .credentials
            .iter()
            .find(|c| c.region == region)
            .ok_or(ConfigError::MissingCredentials { region })
    }

    /// Backend region and credentials serving a runtime region
    pub fn resolve(&self, runtime_region: Option<&str>) -> Result<(BackendRegion, &Credentials), ConfigError> {
        let region = backend_region_for(runtime_region)?;
        let credentials = self.credentials_for(region)?;
        Ok((region, credentials))
    }
}
