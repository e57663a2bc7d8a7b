//! cls-manager: operator tool for the shared CLS instance registry
//!
//! Inspects the registry database, lists records left behind by interrupted
//! provisioning or deprovisioning, and shows how runtime regions route to
//! service manager credentials.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cls_manager::ClsConfig;
use cls_manager::state::{self, DbPool};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "cls-manager")]
#[command(about = "Shared CLS instance registry management")]
#[command(version)]
struct Args {
    /// Registry database path (default: platform data directory)
    #[arg(long, global = true, env = "CLS_MANAGER_DB")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List all shared instances
    List,

    /// Show one shared instance and its references
    Show {
        /// Shared instance ID
        id: String,
    },

    /// List instances stuck in creation or waiting for destroy
    Stale,

    /// Show the backend region and credentials a runtime region resolves to
    ResolveRegion {
        /// Runtime region (default backend region if omitted)
        #[arg(long)]
        region: Option<String>,

        /// Path to the JSON configuration file
        #[arg(long, env = "CLS_MANAGER_CONFIG")]
        config: PathBuf,
    },

    /// Release the reference of a runtime instance that no longer exists
    Release {
        /// Shared instance ID
        id: String,

        /// Runtime instance holding the reference
        runtime: String,

        /// Actually release the reference (default is dry-run)
        #[arg(long)]
        execute: bool,
    },

    /// Delete an unreferenced record after its physical instance was removed
    Forget {
        /// Shared instance ID
        id: String,

        /// Actually delete the record (default is dry-run)
        #[arg(long)]
        execute: bool,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&e);
        std::process::exit(1);
    }
}

/// Print the error and its causes, one per line
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut out = std::io::stderr().lock();
    let _ = writeln!(out, "\x1b[1;31merror:\x1b[0m {e}");
    for cause in e.chain().skip(1) {
        let _ = writeln!(out, "  \x1b[33mcaused by:\x1b[0m {cause}");
    }

    let backtrace = e.backtrace();
    if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
        let _ = writeln!(out, "\n{backtrace}");
    }
}

async fn open_registry(path: Option<&Path>) -> Result<DbPool> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => state::default_db_path()?,
    };
    debug!(path = %path.display(), "Opening registry database");
    state::open_db(&path).await
}

fn resolve_region(region: Option<&str>, config_path: &Path) -> Result<()> {
    let config = ClsConfig::load(config_path)?;
    let (backend, credentials) = config
        .resolve(region)
        .with_context(|| format!("Cannot serve runtime region {}", region.unwrap_or("<default>")))?;

    info!(backend_region = %backend, "Resolved backend region");
    println!("Runtime region:  {}", region.unwrap_or("<default>"));
    println!("Backend region:  {backend}");
    println!("Service manager: {}", credentials.url);
    println!("Username:        {}", credentials.username);
    Ok(())
}

async fn run() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Command::List => {
            let pool = open_registry(args.db.as_deref()).await?;
            state::list_instances(&pool).await?;
        }
        Command::Show { id } => {
            let pool = open_registry(args.db.as_deref()).await?;
            state::show_instance(&pool, &id).await?;
        }
        Command::Stale => {
            let pool = open_registry(args.db.as_deref()).await?;
            state::list_stale(&pool).await?;
        }
        Command::ResolveRegion { region, config } => {
            resolve_region(region.as_deref(), &config)?;
        }
        Command::Release {
            id,
            runtime,
            execute,
        } => {
            let pool = open_registry(args.db.as_deref()).await?;
            state::release_reference(&pool, &id, &runtime, execute).await?;
        }
        Command::Forget { id, execute } => {
            let pool = open_registry(args.db.as_deref()).await?;
            state::forget_instance(&pool, &id, execute).await?;
        }
    }

    Ok(())
}
