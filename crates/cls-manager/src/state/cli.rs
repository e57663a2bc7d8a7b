//! CLI operations for registry inspection and repair

use super::crud::{delete_instance, remove_reference};
use super::db::DbPool;
use super::queries::{get_all, get_by_id};
use anyhow::{Result, bail};
use cls_common::{InstanceStatus, SharedInstance};
use comfy_table::{Cell, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};

fn instances_table(instances: &[SharedInstance]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID"),
            Cell::new("Account"),
            Cell::new("Region"),
            Cell::new("Status"),
            Cell::new("Refs"),
            Cell::new("Version"),
            Cell::new("Created"),
        ]);

    for instance in instances {
        table.add_row(vec![
            Cell::new(&instance.id),
            Cell::new(&instance.owner_account_id),
            Cell::new(&instance.region),
            Cell::new(instance.status.as_str()),
            Cell::new(instance.reference_count()),
            Cell::new(instance.version),
            Cell::new(instance.created_at.format("%Y-%m-%d %H:%M:%S").to_string()),
        ]);
    }

    table
}

/// Records that a provision or deprovision left half-way
fn needs_attention(instance: &SharedInstance) -> bool {
    instance.status == InstanceStatus::Creating || !instance.is_live()
}

/// List all shared instances
pub async fn list_instances(pool: &DbPool) -> Result<()> {
    let instances = get_all(pool).await?;

    if instances.is_empty() {
        println!("No shared instances");
        return Ok(());
    }

    println!("{}", instances_table(&instances));
    Ok(())
}

/// Show one shared instance with its references
pub async fn show_instance(pool: &DbPool, instance_id: &str) -> Result<()> {
    let Some(instance) = get_by_id(pool, instance_id).await? else {
        bail!("Shared instance {instance_id} not found");
    };

    println!("{}", instances_table(std::slice::from_ref(&instance)));

    if instance.references.is_empty() {
        println!("No references (awaiting destroy)");
    } else {
        println!("References:");
        for runtime_instance_id in &instance.references {
            println!("  {runtime_instance_id}");
        }
    }

    Ok(())
}

/// List records stuck in `creating` or without references
pub async fn list_stale(pool: &DbPool) -> Result<()> {
    let stale: Vec<_> = get_all(pool)
        .await?
        .into_iter()
        .filter(needs_attention)
        .collect();

    if stale.is_empty() {
        println!("No stale shared instances");
        return Ok(());
    }

    println!("{}", instances_table(&stale));
    println!(
        "Release references of runtimes that no longer exist with `release <id> <runtime> --execute`"
    );
    println!(
        "Once a record has no references and its physical resource is gone, `forget <id> --execute` deletes it"
    );
    Ok(())
}

/// Drop a reference held by a runtime instance that no longer exists
pub async fn release_reference(
    pool: &DbPool,
    instance_id: &str,
    runtime_instance_id: &str,
    execute: bool,
) -> Result<bool> {
    let Some(instance) = get_by_id(pool, instance_id).await? else {
        bail!("Shared instance {instance_id} not found");
    };

    if !instance.is_referenced_by(runtime_instance_id) {
        println!("Runtime {runtime_instance_id} holds no reference on shared instance {instance_id}");
        return Ok(false);
    }

    if !execute {
        println!(
            "Would release runtime {runtime_instance_id} from shared instance {instance_id} ({} reference(s) held); pass --execute to release",
            instance.reference_count()
        );
        return Ok(false);
    }

    let update = remove_reference(pool, instance.version, instance_id, runtime_instance_id).await?;
    println!(
        "Released runtime {runtime_instance_id} from shared instance {instance_id}, {} reference(s) left",
        update.reference_count
    );
    if update.reference_count == 0 {
        println!(
            "Remove the physical resource {instance_id} if it exists, then run `forget {instance_id} --execute`"
        );
    }
    Ok(true)
}

/// Drop a zero-reference record once its physical resource is gone
pub async fn forget_instance(pool: &DbPool, instance_id: &str, execute: bool) -> Result<bool> {
    let Some(instance) = get_by_id(pool, instance_id).await? else {
        println!("Shared instance {instance_id} not found");
        return Ok(false);
    };

    if instance.is_live() {
        bail!(
            "Shared instance {instance_id} still has {} reference(s); deprovision or release them first",
            instance.reference_count()
        );
    }

    if !execute {
        println!(
            "Would forget shared instance {instance_id} (account {}); pass --execute to delete",
            instance.owner_account_id
        );
        return Ok(false);
    }

    delete_instance(pool, instance_id).await?;
    println!("Forgot shared instance {instance_id}");
    Ok(true)
}
