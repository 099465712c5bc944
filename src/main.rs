//! Elohim Migrate
//!
//! Moves every CID referenced by the catalog into a storage order on the
//! ledger, checkpointing each confirmed order so reruns pick up where the
//! last one stopped.
//!
//! ## Usage
//!
//! ```bash
//! # Migrate everything not yet checkpointed
//! elohim-migrate --config /etc/elohim-migrate/config.toml
//!
//! # Same, configured from the environment, at most 100 files this run
//! LEDGER_ENDPOINT=ws://localhost:9944 SIGNING_SEED=0x... \
//! CONTENT_GATEWAY_URL=http://localhost:5001 \
//! CHECKPOINT_PATH=./migrated.json CATALOG_PATH=./catalog.db \
//!   elohim-migrate run --limit 100
//!
//! # Show what would be migrated, without touching IPFS or the ledger
//! elohim-migrate plan
//!
//! # Show checkpoint progress
//! elohim-migrate status
//! ```
//!
//! ## Exit codes
//!
//! - `0` run completed (per-item failures are in the summary)
//! - `1` fatal startup error (catalog, checkpoint store, ledger unreachable)
//! - `2` configuration error
//! - `130` interrupted

use anyhow::Context;
use clap::{Parser, Subcommand};
use elohim_migrate::{
    Catalog, CheckpointStore, Config, IpfsGateway, Ledger, MigrateError, OrderSigner, Orchestrator,
    RpcLedger, RunSummary, SqliteCatalog, WorkList, WorkListBuilder,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "elohim-migrate")]
#[command(about = "Migrate catalogued IPFS files into on-chain storage orders")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Ledger node WebSocket endpoint
    #[arg(long, env = "LEDGER_ENDPOINT", global = true)]
    ledger_endpoint: Option<String>,

    /// Hex ed25519 seed of the signing identity
    #[arg(long, env = "SIGNING_SEED", hide_env_values = true, global = true)]
    signing_seed: Option<String>,

    /// IPFS (Kubo RPC) base URL
    #[arg(long, env = "CONTENT_GATEWAY_URL", global = true)]
    gateway_url: Option<String>,

    /// Checkpoint store file
    #[arg(long, env = "CHECKPOINT_PATH", global = true)]
    checkpoint_path: Option<PathBuf>,

    /// Catalog SQLite database
    #[arg(long, env = "CATALOG_PATH", global = true)]
    catalog_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Migrate everything not yet checkpointed (default)
    Run {
        /// Process at most this many files this run
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print the work list without contacting IPFS or the ledger
    Plan,
    /// Print checkpoint progress
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("elohim_migrate=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Fatal error");
            match e.downcast_ref::<MigrateError>() {
                Some(MigrateError::Config(_)) => ExitCode::from(2),
                _ => ExitCode::from(1),
            }
        }
    }
}

async fn execute(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = load_config(&cli)?;

    match cli.command.unwrap_or(Command::Run { limit: None }) {
        Command::Run { limit } => run(config, limit).await,
        Command::Plan => plan(config).await.map(|_| ExitCode::SUCCESS),
        Command::Status => status(config).await.map(|_| ExitCode::SUCCESS),
    }
}

/// File first, then flags and environment on top.
fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    if let Some(endpoint) = &cli.ledger_endpoint {
        config.ledger.endpoint = Some(endpoint.clone());
    }
    if let Some(seed) = &cli.signing_seed {
        config.ledger.signing_seed = Some(seed.clone());
    }
    if let Some(url) = &cli.gateway_url {
        config.gateway.url = Some(url.clone());
    }
    if let Some(path) = &cli.checkpoint_path {
        config.checkpoint_path = Some(path.clone());
    }
    if let Some(path) = &cli.catalog_path {
        config.catalog.path = Some(path.clone());
    }

    Ok(config)
}

/// Load the checkpoint store and the catalog, and derive the work list.
async fn prepare(config: &Config) -> anyhow::Result<(CheckpointStore, WorkList)> {
    let checkpoint = CheckpointStore::load(config.checkpoint_path()?).await?;

    let catalog = SqliteCatalog::open(config.catalog_path()?, config.catalog.sources.clone())
        .context("opening catalog")?;
    let items = catalog.fetch_items().context("reading catalog")?;

    let work_list = WorkListBuilder::build(&items, &checkpoint);
    Ok((checkpoint, work_list))
}

async fn run(config: Config, limit: Option<usize>) -> anyhow::Result<ExitCode> {
    config.validate()?;
    info!(config = ?config, "Starting elohim-migrate");

    let (checkpoint, mut work_list) = prepare(&config).await?;
    if let Some(limit) = limit {
        let deferred = work_list.truncate(limit);
        if deferred > 0 {
            info!(limit = limit, deferred = deferred, "Deferring items to a later run");
        }
    }

    if work_list.is_empty() {
        info!("Nothing to migrate");
        print!("{}", RunSummary::for_work_list(&work_list));
        return Ok(ExitCode::SUCCESS);
    }

    let gateway = Arc::new(IpfsGateway::new(config.gateway_url()?, &config.gateway)?);
    let signer = OrderSigner::from_seed(&config.signing_seed()?);
    let ledger: Arc<dyn Ledger> =
        Arc::new(RpcLedger::connect(config.ledger_endpoint()?, signer, &config.ledger).await?);

    let mut orchestrator = Orchestrator::new(
        gateway,
        Arc::clone(&ledger),
        checkpoint,
        config.ledger.confirmation_timeout(),
    );

    let summary = tokio::select! {
        summary = orchestrator.run(work_list) => Some(summary),
        _ = tokio::signal::ctrl_c() => None,
    };

    ledger.disconnect().await;

    match summary {
        Some(summary) => {
            print!("{}", summary);
            if summary.checkpoint_failures > 0 {
                error!(
                    count = summary.checkpoint_failures,
                    path = %orchestrator.checkpoint().path().display(),
                    "Some confirmed orders were not checkpointed"
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        None => {
            warn!("Interrupted; the in-flight file will be retried next run if it was not confirmed");
            Ok(ExitCode::from(130))
        }
    }
}

async fn plan(config: Config) -> anyhow::Result<()> {
    config.validate_local()?;
    let (_, work_list) = prepare(&config).await?;

    println!("Plan");
    println!("  to migrate:         {}", work_list.len());
    println!("  already migrated:   {}", work_list.already_migrated.len());
    println!("  skipped (invalid):  {}", work_list.invalid.len());
    println!("  duplicate rows:     {}", work_list.duplicate_rows);
    for cid in work_list.addresses() {
        println!("  + {}", cid);
    }
    for raw in &work_list.invalid {
        println!("  ! {:?}", raw);
    }
    Ok(())
}

async fn status(config: Config) -> anyhow::Result<()> {
    let checkpoint = CheckpointStore::load(config.checkpoint_path()?).await?;

    println!("Checkpoint {}", checkpoint.path().display());
    println!("  completed:          {}", checkpoint.len());
    if let Some(last) = checkpoint.last_completed() {
        println!("  last completed:     {} at {}", last.cid, last.completed_at.to_rfc3339());
    }
    Ok(())
}
