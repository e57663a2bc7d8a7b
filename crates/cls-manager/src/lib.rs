//! cls-manager - reference-counted shared CLS instances
//!
//! Every tenant account gets at most one shared CLS instance. Runtime
//! instances of the account hold references on it; the physical instance is
//! created for the first reference and destroyed after the last one is
//! released.

pub mod config;
pub mod deprovisioner;
pub mod error;
pub mod gateway;
pub mod provisioner;
pub mod retry;
pub mod state;
pub mod steps;

pub use config::{ClsConfig, ConfigError};
pub use deprovisioner::{DeprovisionOutcome, DeprovisionRequest, Deprovisioner};
pub use error::ClsError;
pub use provisioner::{ProvisionOutcome, ProvisionRequest, Provisioner};
