//! Query operations for the registry database

use super::db::DbPool;
use super::error::RegistryError;
use super::types::fold_instance_rows;
use cls_common::SharedInstance;

/// Instance columns joined with their references, one row per reference
fn select_instances(filter: &str) -> String {
    format!(
        "SELECT i.id, i.owner_account_id, i.region, i.version, i.status, i.created_at,
                r.runtime_instance_id
         FROM shared_instances i
         LEFT JOIN instance_references r ON r.shared_instance_id = i.id
         {filter}
         ORDER BY i.created_at, i.id, r.runtime_instance_id"
    )
}

/// Get the active, referenced instance for an account
pub async fn get_active_by_account(
    pool: &DbPool,
    account_id: &str,
) -> Result<Option<SharedInstance>, RegistryError> {
    let sql = select_instances(
        "WHERE i.owner_account_id = ? AND i.reference_count > 0 AND i.status = 'active'",
    );
    let rows = sqlx::query(&sql)
        .bind(account_id)
        .fetch_all(pool)
        .await
        .map_err(RegistryError::unavailable("find_by_account"))?;

    Ok(fold_instance_rows(&rows)?.into_iter().next())
}

/// Get the referenced instance for an account in any status
pub async fn get_live_by_account(
    pool: &DbPool,
    account_id: &str,
) -> Result<Option<SharedInstance>, RegistryError> {
    let sql = select_instances("WHERE i.owner_account_id = ? AND i.reference_count > 0");
    let rows = sqlx::query(&sql)
        .bind(account_id)
        .fetch_all(pool)
        .await
        .map_err(RegistryError::unavailable("find_live_by_account"))?;

    Ok(fold_instance_rows(&rows)?.into_iter().next())
}

/// Get an instance by id, including records without references
pub async fn get_by_id(
    pool: &DbPool,
    instance_id: &str,
) -> Result<Option<SharedInstance>, RegistryError> {
    let sql = select_instances("WHERE i.id = ?");
    let rows = sqlx::query(&sql)
        .bind(instance_id)
        .fetch_all(pool)
        .await
        .map_err(RegistryError::unavailable("find_by_id"))?;

    Ok(fold_instance_rows(&rows)?.into_iter().next())
}

/// Get all instances
pub async fn get_all(pool: &DbPool) -> Result<Vec<SharedInstance>, RegistryError> {
    let sql = select_instances("");
    let rows = sqlx::query(&sql)
        .fetch_all(pool)
        .await
        .map_err(RegistryError::unavailable("list"))?;

    fold_instance_rows(&rows)
}
