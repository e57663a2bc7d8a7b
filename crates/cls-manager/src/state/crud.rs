//! Mutating operations for the registry database
//!
//! Reference mutations start with a write so the transaction takes the
//! write lock before reading anything, then touch the reference rows and
//! the version. Zero affected rows means the caller's view is stale.

use super::db::DbPool;
use super::error::{RegistryError, is_unique_violation};
use super::store::check_initial_references;
use super::types::ReferenceUpdate;
use chrono::Utc;
use cls_common::{InstanceStatus, SharedInstance};
use sqlx::SqliteConnection;
use tracing::debug;

/// Insert a new instance together with its single initial reference
pub async fn insert_instance(pool: &DbPool, instance: &SharedInstance) -> Result<(), RegistryError> {
    check_initial_references(instance)?;
    let Some(runtime_instance_id) = instance.references.iter().next() else {
        return Err(RegistryError::InvariantViolation(
            "initial reference missing".to_string(),
        ));
    };

    let mut tx = pool
        .begin()
        .await
        .map_err(RegistryError::unavailable("insert"))?;

    let inserted = sqlx::query(
        "INSERT INTO shared_instances
            (id, owner_account_id, region, version, status, reference_count, created_at)
         VALUES (?, ?, ?, ?, ?, 1, ?)",
    )
    .bind(&instance.id)
    .bind(&instance.owner_account_id)
    .bind(&instance.region)
    .bind(instance.version)
    .bind(instance.status.as_str())
    .bind(instance.created_at.to_rfc3339())
    .execute(&mut *tx)
    .await;

    match inserted {
        Ok(_) => {}
        // The account already has a live record: the caller lost a race
        Err(e) if is_unique_violation(&e) => {
            return Err(RegistryError::VersionConflict {
                instance_id: instance.id.clone(),
                expected: instance.version,
                actual: None,
            });
        }
        Err(e) => return Err(RegistryError::unavailable("insert")(e)),
    }

    insert_reference_row(&mut tx, &instance.id, runtime_instance_id, "insert").await?;

    tx.commit()
        .await
        .map_err(RegistryError::unavailable("insert"))?;

    debug!(
        instance_id = %instance.id,
        account_id = %instance.owner_account_id,
        "Inserted shared instance"
    );
    Ok(())
}

/// Flip a `creating` instance to `active`
pub async fn activate_instance(
    pool: &DbPool,
    expected_version: i64,
    instance_id: &str,
) -> Result<i64, RegistryError> {
    let updated: Option<i64> = sqlx::query_scalar(
        "UPDATE shared_instances SET status = ?, version = version + 1
         WHERE id = ? AND version = ? AND status = ?
         RETURNING version",
    )
    .bind(InstanceStatus::Active.as_str())
    .bind(instance_id)
    .bind(expected_version)
    .bind(InstanceStatus::Creating.as_str())
    .fetch_optional(pool)
    .await
    .map_err(RegistryError::unavailable("activate"))?;

    match updated {
        Some(version) => Ok(version),
        None => {
            let mut conn = pool
                .acquire()
                .await
                .map_err(RegistryError::unavailable("activate"))?;
            Err(stale_write(&mut conn, instance_id, expected_version, "activate").await)
        }
    }
}

/// Add a reference, conditioned on the stored version
pub async fn add_reference(
    pool: &DbPool,
    expected_version: i64,
    instance_id: &str,
    runtime_instance_id: &str,
) -> Result<ReferenceUpdate, RegistryError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(RegistryError::unavailable("add_reference"))?;

    let updated: Option<(i64, i64)> = sqlx::query_as(
        "UPDATE shared_instances
         SET version = version + 1, reference_count = reference_count + 1
         WHERE id = ? AND version = ? AND reference_count > 0
         RETURNING version, reference_count",
    )
    .bind(instance_id)
    .bind(expected_version)
    .fetch_optional(&mut *tx)
    .await
    .map_err(RegistryError::unavailable("add_reference"))?;

    let Some((version, reference_count)) = updated else {
        return Err(stale_write(&mut tx, instance_id, expected_version, "add_reference").await);
    };

    insert_reference_row(&mut tx, instance_id, runtime_instance_id, "add_reference").await?;

    tx.commit()
        .await
        .map_err(RegistryError::unavailable("add_reference"))?;

    Ok(ReferenceUpdate {
        version,
        reference_count: count(reference_count),
    })
}

/// Remove a reference, conditioned on the stored version.
///
/// A reference that is not held leaves the record untouched.
pub async fn remove_reference(
    pool: &DbPool,
    expected_version: i64,
    instance_id: &str,
    runtime_instance_id: &str,
) -> Result<ReferenceUpdate, RegistryError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(RegistryError::unavailable("remove_reference"))?;

    let deleted = sqlx::query(
        "DELETE FROM instance_references
         WHERE shared_instance_id = ? AND runtime_instance_id = ?",
    )
    .bind(instance_id)
    .bind(runtime_instance_id)
    .execute(&mut *tx)
    .await
    .map_err(RegistryError::unavailable("remove_reference"))?
    .rows_affected();

    if deleted == 0 {
        let current: Option<(i64, i64)> =
            sqlx::query_as("SELECT version, reference_count FROM shared_instances WHERE id = ?")
                .bind(instance_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(RegistryError::unavailable("remove_reference"))?;

        debug!(
            instance_id = %instance_id,
            runtime_instance_id = %runtime_instance_id,
            "Reference already removed"
        );
        return match current {
            Some((version, reference_count)) => Ok(ReferenceUpdate {
                version,
                reference_count: count(reference_count),
            }),
            None => Err(RegistryError::NotFound {
                instance_id: instance_id.to_string(),
            }),
        };
    }

    let updated: Option<(i64, i64)> = sqlx::query_as(
        "UPDATE shared_instances
         SET version = version + 1, reference_count = reference_count - 1
         WHERE id = ? AND version = ?
         RETURNING version, reference_count",
    )
    .bind(instance_id)
    .bind(expected_version)
    .fetch_optional(&mut *tx)
    .await
    .map_err(RegistryError::unavailable("remove_reference"))?;

    let Some((version, reference_count)) = updated else {
        return Err(stale_write(&mut tx, instance_id, expected_version, "remove_reference").await);
    };

    tx.commit()
        .await
        .map_err(RegistryError::unavailable("remove_reference"))?;

    Ok(ReferenceUpdate {
        version,
        reference_count: count(reference_count),
    })
}

/// Delete an instance with no references left
pub async fn delete_instance(pool: &DbPool, instance_id: &str) -> Result<(), RegistryError> {
    let deleted = sqlx::query("DELETE FROM shared_instances WHERE id = ? AND reference_count = 0")
        .bind(instance_id)
        .execute(pool)
        .await
        .map_err(RegistryError::unavailable("delete"))?
        .rows_affected();

    if deleted > 0 {
        debug!(instance_id = %instance_id, "Deleted shared instance");
        return Ok(());
    }

    let remaining: Option<i64> =
        sqlx::query_scalar("SELECT reference_count FROM shared_instances WHERE id = ?")
            .bind(instance_id)
            .fetch_optional(pool)
            .await
            .map_err(RegistryError::unavailable("delete"))?;

    match remaining {
        Some(n) => Err(RegistryError::InvariantViolation(format!(
            "shared instance {instance_id} still has {n} reference(s)"
        ))),
        None => Ok(()),
    }
}

/// Insert a reference row after checking who already holds the runtime instance
async fn insert_reference_row(
    conn: &mut SqliteConnection,
    instance_id: &str,
    runtime_instance_id: &str,
    op: &'static str,
) -> Result<(), RegistryError> {
    let holder: Option<String> = sqlx::query_scalar(
        "SELECT shared_instance_id FROM instance_references WHERE runtime_instance_id = ?",
    )
    .bind(runtime_instance_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(RegistryError::unavailable(op))?;

    match holder {
        Some(holder) if holder == instance_id => {
            return Err(RegistryError::DuplicateReference {
                instance_id: instance_id.to_string(),
                runtime_instance_id: runtime_instance_id.to_string(),
            });
        }
        Some(holder) => {
            return Err(RegistryError::InvariantViolation(format!(
                "runtime instance {runtime_instance_id} already references shared instance {holder}"
            )));
        }
        None => {}
    }

    sqlx::query(
        "INSERT INTO instance_references (shared_instance_id, runtime_instance_id, created_at)
         VALUES (?, ?, ?)",
    )
    .bind(instance_id)
    .bind(runtime_instance_id)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *conn)
    .await
    .map_err(RegistryError::unavailable(op))?;

    Ok(())
}

/// Explain why a version-conditional write matched no row
async fn stale_write(
    conn: &mut SqliteConnection,
    instance_id: &str,
    expected_version: i64,
    op: &'static str,
) -> RegistryError {
    let current: Result<Option<(i64, i64, String)>, _> = sqlx::query_as(
        "SELECT version, reference_count, status FROM shared_instances WHERE id = ?",
    )
    .bind(instance_id)
    .fetch_optional(&mut *conn)
    .await;

    match current {
        Err(e) => RegistryError::unavailable(op)(e),
        Ok(None) => RegistryError::NotFound {
            instance_id: instance_id.to_string(),
        },
        // Records on their way out are never handed new references
        Ok(Some((_, 0, _))) if op == "add_reference" => RegistryError::NotFound {
            instance_id: instance_id.to_string(),
        },
        Ok(Some((version, _, _))) if version != expected_version => {
            RegistryError::VersionConflict {
                instance_id: instance_id.to_string(),
                expected: expected_version,
                actual: Some(version),
            }
        }
        Ok(Some((_, _, status))) => RegistryError::InvariantViolation(format!(
            "{op} rejected for shared instance {instance_id} in status {status}"
        )),
    }
}

fn count(reference_count: i64) -> usize {
    usize::try_from(reference_count).unwrap_or(0)
}
