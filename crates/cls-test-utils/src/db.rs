//! Throwaway SQLite pools for registry tests
//!
//! The registry schema belongs to cls-manager; callers run its
//! `setup_schema` on the returned pool.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

/// Open a private in-memory database.
///
/// An in-memory database lives as long as its connection, so the pool is
/// capped at one connection that is never recycled. Callers contend for it,
/// which serializes transactions but still interleaves whole operations.
///
/// Code that holds a transaction must not go back to the pool before
/// committing, or it waits on itself.
pub async fn open_test_db() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .in_memory(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    Ok(pool)
}
