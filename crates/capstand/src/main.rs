//! capstand: the Capstan daemon.
//!
//! Single binary that assembles the rollout controller:
//! - State store (redb)
//! - Local instance scheduler
//! - Rollout updater
//! - Periodic tick driver
//!
//! # Usage
//!
//! ```text
//! capstand --config /etc/capstan/capstan.toml run
//! capstand create --id dep-1 --app web --version v2 --previous-version v1 \
//!     --original-instances 3 --desired-instances 5 --canary-instances 1
//! capstand tick dep-1 canary
//! ```

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use capstan_core::CapstanConfig;
use capstan_rollout::{Command as TickCommand, Updater};
use capstan_scheduler::{InstanceScheduler, LocalScheduler};
use capstan_state::{Deployment, NewDeployment, StateStore};
use capstand::{StoreAccess, TickDriver, local_updater, open_when_free, ops};

const DEFAULT_LOG_FILTER: &str = "info,capstand=debug,capstan=debug";

/// How long operator commands wait for a tick pass to release the store.
const STORE_WAIT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "capstand", about = "Capstan deployment rollout daemon")]
struct Cli {
    /// Path to capstan.toml. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the data directory from the config file.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the periodic tick loop until Ctrl-C.
    Run,

    /// Create a deployment record for a new rollout.
    Create {
        #[arg(long)]
        id: String,
        #[arg(long)]
        app: String,
        #[arg(long)]
        version: String,
        #[arg(long)]
        previous_version: String,
        /// Stable instances currently running.
        #[arg(long)]
        original_instances: u32,
        /// Instances of the new version once rolled out.
        #[arg(long)]
        desired_instances: u32,
        /// Run a canary of this many instances before pausing.
        #[arg(long)]
        canary_instances: Option<u32>,
    },

    /// Run a single tick for one deployment.
    Tick {
        id: String,
        /// scale, canary or cancel.
        command: TickCommand,
    },

    /// Request cancellation; the next cancel tick reverts the rollout.
    Cancel { id: String },

    /// Release a paused canary into the full rollout.
    Promote { id: String },

    /// Print all deployments as JSON.
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = match &cli.config {
        Some(path) => CapstanConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => CapstanConfig::default(),
    };
    if let Some(data_dir) = cli.data_dir {
        config.store.data_dir = data_dir;
    }

    std::fs::create_dir_all(&config.store.data_dir)?;
    let db_path = config.database_path();

    match cli.command {
        Command::Run => run(config, db_path).await,
        Command::Create {
            id,
            app,
            version,
            previous_version,
            original_instances,
            desired_instances,
            canary_instances,
        } => {
            let deployment = Deployment::new(
                NewDeployment {
                    id,
                    app_id: app,
                    version,
                    previous_version,
                    original_instances,
                    desired_web_instances: desired_instances,
                    canary_total_instances: canary_instances,
                },
                epoch_secs(),
            )?;
            let store = open_store(&db_path).await?;
            let scheduler = LocalScheduler::new(store.clone(), config.scheduler.auto_ready);
            store.create_deployment(&deployment)?;
            // Stand in for the stable instances the real scheduler would already run.
            scheduler
                .set_instance_count(
                    &deployment.app_id,
                    &deployment.previous_version,
                    deployment.original_instances,
                )
                .await?;
            print_json(&deployment)
        }
        Command::Tick { id, command } => {
            let store = open_store(&db_path).await?;
            let scheduler = LocalScheduler::new(store.clone(), config.scheduler.auto_ready);
            let updater = Updater::new(store.clone(), scheduler, config.controller.step_policy);
            updater.tick(&id, command).await;
            let deployment = store
                .get_deployment(&id)?
                .with_context(|| format!("deployment {id} not found"))?;
            print_json(&deployment)
        }
        Command::Cancel { id } => {
            let store = open_store(&db_path).await?;
            print_json(&ops::request_cancel(&store, &id)?)
        }
        Command::Promote { id } => {
            let store = open_store(&db_path).await?;
            print_json(&ops::promote(&store, &id)?)
        }
        Command::List => print_json(&open_store(&db_path).await?.list_deployments()?),
    }
}

async fn run(config: CapstanConfig, db_path: PathBuf) -> anyhow::Result<()> {
    info!(path = ?db_path, "Capstan daemon starting");

    // Create the file and tables up front so a bad path fails fast.
    drop(open_store(&db_path).await?);

    let policy = config.controller.step_policy;
    let driver = TickDriver::new(
        StoreAccess::PerPass(db_path),
        local_updater(policy, config.scheduler.auto_ready),
        config.tick_interval(),
    );
    info!(?policy, "rollout updater initialized");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let driver_handle = tokio::spawn(async move {
        driver.run(shutdown_rx).await;
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    let _ = driver_handle.await;

    info!("Capstan daemon stopped");
    Ok(())
}

/// Open the store for an operator command. A running daemon only holds it
/// during a tick pass, so this waits for the pass to finish.
async fn open_store(db_path: &Path) -> anyhow::Result<StateStore> {
    open_when_free(db_path, STORE_WAIT)
        .await
        .with_context(|| format!("opening state store at {}", db_path.display()))
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
