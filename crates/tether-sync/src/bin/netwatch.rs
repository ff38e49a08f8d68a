//! netwatch: watch connectivity verdicts and drain a demo write queue.
//!
//! Runs the full connectivity stack with real HTTP probes, logs every state
//! change, and replays queued writes by logging them. Stops on Ctrl-C.
//!
//! ## Usage
//! ```text
//! netwatch                            # default config, database in data dir
//! netwatch --in-memory -e note -e chat
//! RUST_LOG=tether=trace netwatch --db /tmp/tether.db
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use tether_core::OperationType;
use tether_db::{Database, DbConfig};
use tether_sync::{executor_fn, ConnectivityBuilder, ConnectivityConfig, ManualLinkMonitor};

/// netwatch: connectivity diagnostics
#[derive(Parser, Debug)]
#[command(name = "netwatch")]
#[command(about = "Watch connectivity verdicts and drain a demo write queue")]
struct Args {
    /// Config file (defaults to the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database file (overrides config and TETHER_DB_PATH)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Keep everything in memory
    #[arg(long, conflicts_with = "db")]
    in_memory: bool,

    /// Enqueue a demo write for ENTITY at startup (repeatable)
    #[arg(short, long = "enqueue", value_name = "ENTITY")]
    enqueue: Vec<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Initializes the tracing subscriber.
///
/// `RUST_LOG` wins over `--verbose`.
fn init_tracing(verbose: bool) {
    let default = if verbose {
        "debug,sqlx=warn,reqwest=info"
    } else {
        "info,tether=debug,sqlx=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::TRACE)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = ConnectivityConfig::load_or_default(args.config.clone());

    let db_config = if args.in_memory {
        DbConfig::in_memory()
    } else {
        let path = args
            .db
            .clone()
            .or_else(|| config.storage.resolved_database_path())
            .ok_or("Could not determine database path")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        DbConfig::new(path)
    };

    info!("Starting netwatch");
    info!("  Database: {}", db_config.location);
    info!("  Primary probe: {}", config.probe.primary_url);

    let db = Database::new(db_config).await?;

    let connectivity = ConnectivityBuilder::new(config)
        .with_database(db.clone())
        .with_link_monitor(Arc::new(ManualLinkMonitor::default()))
        .with_executor(executor_fn(|op| async move {
            info!(
                id = %op.id,
                op_type = %op.op_type,
                entity = %op.entity,
                retry_count = op.retry_count,
                "Replaying operation"
            );
            Ok(())
        }))
        .build()
        .map_err(|e| {
            if e.is_config_error() {
                error!(
                    error = %e,
                    "Invalid configuration, check the config file and TETHER_* variables"
                );
            }
            e
        })?;

    let _changes = connectivity.subscribe(|state| {
        info!(
            online = state.effectively_connected,
            link = state.is_connected,
            connection = %state.connection_type,
            reachability = %state.is_internet_reachable,
            "State"
        );
    });

    connectivity.initialize().await;

    for entity in &args.enqueue {
        match connectivity
            .enqueue(
                OperationType::Create,
                entity,
                serde_json::json!({ "source": "netwatch" }),
            )
            .await
        {
            Ok(id) => info!(id = %id, entity = %entity, "Enqueued demo write"),
            Err(e) => warn!(error = %e, entity = %entity, "Rejected demo write"),
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received, shutting down");

    connectivity.teardown().await;

    let status = connectivity.status().await;
    info!(
        pending = status.pending_count,
        last_sync_at = ?status.last_sync_at,
        "Final sync status"
    );

    db.close().await;
    Ok(())
}
