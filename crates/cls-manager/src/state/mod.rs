//! Shared instance registry
//!
//! Records live in SQLite via sqlx; an in-memory store with the same
//! contract is available for embedding and tests.

mod cli;
mod crud;
mod db;
mod error;
mod memory;
mod queries;
mod sqlite;
mod store;
mod types;

pub use db::{DbPool, default_db_path, open_db, setup_schema};
pub use error::RegistryError;
pub use memory::MemoryRegistry;
pub use sqlite::SqliteRegistry;
pub use store::RegistryStore;
pub use types::ReferenceUpdate;

// Re-export CLI operations
pub use cli::{forget_instance, list_instances, list_stale, release_reference, show_instance};
