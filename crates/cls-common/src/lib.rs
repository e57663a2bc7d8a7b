//! cls-common - Shared types for shared CLS instance management
//!
//! This crate holds the data model and region routing used by the manager
//! and its tests, without any storage or transport dependencies.
//!
//! ## Modules
//!
//! - [`defaults`]: Default retry and step timing values
//! - [`instance`]: The reference-counted `SharedInstance` record
//! - [`region`]: Runtime region to backend region routing
//! - [`status`]: Lifecycle status of a shared instance record

pub mod defaults;
pub mod instance;
pub mod region;
pub mod status;

// Re-export commonly used types
pub use instance::SharedInstance;
pub use region::{BackendRegion, UnsupportedRegion, backend_region_for};
pub use status::InstanceStatus;
