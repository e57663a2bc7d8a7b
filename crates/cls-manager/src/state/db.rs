//! Registry database: opening the pool and creating the schema

use anyhow::{Context, Result};
use directories::ProjectDirs;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Pool shared by every registry operation
pub type DbPool = SqlitePool;

/// Get the default state database path
pub fn default_db_path() -> Result<PathBuf> {
    let proj_dirs =
        ProjectDirs::from("", "", "cls-manager").context("Failed to get project directories")?;

    let state_dir = proj_dirs.data_local_dir();
    fs::create_dir_all(state_dir).context("Failed to create state directory")?;

    Ok(state_dir.join("state.db"))
}

/// Open the state database at `path`, creating it if needed
pub async fn open_db(path: &Path) -> Result<DbPool> {
    let db_url = format!("sqlite://{}?mode=rwc", path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open state database at {}", path.display()))?;

    setup_schema(&pool).await?;

    Ok(pool)
}

/// Setup database schema
pub async fn setup_schema(pool: &DbPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS shared_instances (
            id TEXT PRIMARY KEY,
            owner_account_id TEXT NOT NULL,
            region TEXT NOT NULL,
            version INTEGER NOT NULL,
            status TEXT NOT NULL,
            reference_count INTEGER NOT NULL CHECK (reference_count >= 0),
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One live instance per account; records being destroyed drop out
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_shared_instances_live_account
         ON shared_instances(owner_account_id) WHERE reference_count > 0",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS instance_references (
            shared_instance_id TEXT NOT NULL REFERENCES shared_instances(id) ON DELETE CASCADE,
            runtime_instance_id TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL,
            PRIMARY KEY (shared_instance_id, runtime_instance_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Open an in-memory database with the registry schema
#[cfg(test)]
pub async fn open_test_db() -> Result<DbPool> {
    let pool = cls_test_utils::open_test_db().await?;
    setup_schema(&pool).await?;
    Ok(pool)
}
