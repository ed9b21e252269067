use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::sync::watch;

use pos_sync::checkpoint::MySqlCheckpointStore;
use pos_sync::config::SyncTuning;
use pos_sync::load::MongoSink;
use pos_sync::mysql::new_mysql_pool;
use pos_sync::status::EndpointStatus;
use pos_sync::{SourceOpts, SyncService, TargetOpts};

#[derive(Parser)]
#[command(name = "pos-sync")]
#[command(about = "Replicates point-of-sale data from MySQL into MongoDB for read-only consumers")]
#[command(long_about = None)]
struct Cli {
    #[command(flatten)]
    source: SourceOpts,

    #[command(flatten)]
    target: TargetOpts,

    /// Device identifier recorded in checkpoints and sync logs
    #[arg(long, env = "DEVICE_ID", default_value = "pos-server")]
    device_id: String,

    /// Optional YAML tuning file (cadence, windows, batch sizes)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler daemon until interrupted
    Run {
        /// Start with automatic sync disabled; toggle later via the UI
        #[arg(long)]
        start_disabled: bool,
    },
    /// Run one incremental pass and exit
    Sync {
        /// Sync a single entity (categories, products, customers,
        /// business_settings, employees, expenses, transactions)
        #[arg(long)]
        entity: Option<String>,
    },
    /// Walk the full transaction history into the target
    Backfill,
    /// Check source and target connectivity, then exit
    Probe,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let tuning = SyncTuning::load(cli.config.as_deref())?;

    let pool = new_mysql_pool(&cli.source.source_uri)?;
    let sink = MongoSink::connect(&cli.target).await?;
    let checkpoints = MySqlCheckpointStore::new(pool.clone());
    checkpoints.ensure_schema().await?;

    if cli.target.dry_run {
        tracing::info!("Running in dry-run mode - no data will be written");
    }

    let service = SyncService::new(cli.device_id, pool, sink, checkpoints, tuning);

    match cli.command {
        Commands::Run { start_disabled } => {
            service.set_auto_sync(!start_disabled);

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("Shutdown requested; finishing the current pass");
                let _ = shutdown_tx.send(true);
            });

            service.run_scheduler(shutdown_rx).await;
        }
        Commands::Sync { entity } => {
            let results = match entity {
                Some(key) => vec![service.run_entity_once(&key).await?],
                None => service.run_all_once().await,
            };
            let failures: Vec<_> = results.iter().filter(|r| !r.success).collect();
            if !failures.is_empty() {
                anyhow::bail!(
                    "{} of {} entity passes failed",
                    failures.len(),
                    results.len()
                );
            }
        }
        Commands::Backfill => {
            let summary = service.run_backfill().await?;
            tracing::info!(
                "Backfill finished: {} rows written, {} skipped, {} windows",
                summary.written,
                summary.skipped,
                summary.windows
            );
        }
        Commands::Probe => {
            service.startup_probe().await;
            let snapshot = service.status().borrow().clone();
            tracing::info!(
                "Source: {:?}, target: {:?}",
                snapshot.source_status,
                snapshot.target_status
            );
            if snapshot.source_status != EndpointStatus::Connected
                || snapshot.target_status != EndpointStatus::Connected
            {
                anyhow::bail!("Connectivity probe failed");
            }
        }
    }

    Ok(())
}
