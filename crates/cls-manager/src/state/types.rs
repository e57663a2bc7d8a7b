//! State types and row mapping

use super::error::RegistryError;
use chrono::{DateTime, Utc};
use cls_common::{InstanceStatus, SharedInstance};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use std::collections::BTreeSet;

/// Result of a successful reference mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceUpdate {
    /// Version stored after the mutation
    pub version: i64,
    /// Number of references held after the mutation
    pub reference_count: usize,
}

/// Parse the stored status column
pub(crate) fn parse_status(s: &str) -> Result<InstanceStatus, RegistryError> {
    InstanceStatus::parse(s)
        .ok_or_else(|| RegistryError::InvariantViolation(format!("unknown instance status '{s}'")))
}

/// Parse an RFC 3339 timestamp column
pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, RegistryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| RegistryError::InvariantViolation(format!("invalid created_at '{s}': {e}")))
}

/// Fold joined instance/reference rows into records, keeping row order.
///
/// Rows must be grouped by instance id. A NULL `runtime_instance_id` marks
/// an instance without references.
pub(crate) fn fold_instance_rows(rows: &[SqliteRow]) -> Result<Vec<SharedInstance>, RegistryError> {
    let mut instances: Vec<SharedInstance> = Vec::new();

    for row in rows {
        let id: String = row.get("id");
        let reference: Option<String> = row.get("runtime_instance_id");

        if instances.last().is_none_or(|last| last.id != id) {
            let status: String = row.get("status");
            let created_at: String = row.get("created_at");
            instances.push(SharedInstance {
                id,
                owner_account_id: row.get("owner_account_id"),
                region: row.get("region"),
                version: row.get("version"),
                status: parse_status(&status)?,
                created_at: parse_timestamp(&created_at)?,
                references: BTreeSet::new(),
            });
        }

        if let (Some(current), Some(reference)) = (instances.last_mut(), reference) {
            current.references.insert(reference);
        }
    }

    Ok(instances)
}
