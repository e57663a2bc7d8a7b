//! Test helpers shared by the cls-manager unit and integration tests
//!
//! - [`db`]: private in-memory SQLite pools
//! - [`ids`]: unique account and runtime instance identifiers

pub mod db;
pub mod ids;

pub use db::open_test_db;
pub use ids::{test_account_id, test_runtime_id};
