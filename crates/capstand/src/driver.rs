//! Tick driver: periodic invocation of the rollout updater.
//!
//! Each pass lists every deployment, maps its phase to a command and
//! ticks all of them concurrently. Ticks for one deployment never overlap
//! because the updater serializes them per id.
//!
//! With [`StoreAccess::PerPass`] the redb file is opened at the start of a
//! pass and closed at its end. Between passes operator commands (`cancel`,
//! `promote`) can open it themselves.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use capstan_rollout::{Command, StepPolicy, Updater};
use capstan_scheduler::{InstanceScheduler, LocalScheduler};
use capstan_state::{Deployment, DeploymentPhase, StateError, StateResult, StateStore};

const OPEN_RETRY_DELAY: Duration = Duration::from_millis(50);

/// The command a deployment's phase calls for, if it should be ticked at all.
pub fn command_for(deployment: &Deployment) -> Option<Command> {
    match deployment.phase {
        DeploymentPhase::Canceling => Some(Command::Cancel),
        DeploymentPhase::Deploying | DeploymentPhase::Failed => {
            if deployment.canary.is_some() {
                Some(Command::Canary)
            } else {
                Some(Command::Scale)
            }
        }
        DeploymentPhase::Paused | DeploymentPhase::Deployed | DeploymentPhase::Canceled => None,
    }
}

/// How the driver reaches the state store.
#[derive(Clone)]
pub enum StoreAccess {
    /// A store kept open for the driver's whole lifetime.
    Shared(StateStore),
    /// A database file opened for each pass and released afterwards.
    PerPass(PathBuf),
}

impl StoreAccess {
    pub fn open(&self) -> StateResult<StateStore> {
        match self {
            StoreAccess::Shared(store) => Ok(store.clone()),
            StoreAccess::PerPass(path) => StateStore::open(path),
        }
    }
}

/// Open the database at `path`, waiting up to `wait` while another process
/// (the daemon mid-pass, or another operator command) holds it.
pub async fn open_when_free(path: &Path, wait: Duration) -> StateResult<StateStore> {
    let deadline = Instant::now() + wait;
    loop {
        match StateStore::open(path) {
            Err(StateError::Busy(_)) if Instant::now() < deadline => {
                debug!(?path, "state store busy, retrying");
                tokio::time::sleep(OPEN_RETRY_DELAY).await;
            }
            result => return result,
        }
    }
}

/// Builds the updater for one pass from the pass's store handle.
pub type UpdaterFactory<S> = Box<dyn Fn(StateStore) -> Updater<S> + Send + Sync>;

/// Factory for updaters backed by the store's own [`LocalScheduler`].
pub fn local_updater(
    policy: StepPolicy,
    auto_ready: bool,
) -> impl Fn(StateStore) -> Updater<LocalScheduler> + Send + Sync + 'static {
    move |store| {
        let scheduler = LocalScheduler::new(store.clone(), auto_ready);
        Updater::new(store, scheduler, policy)
    }
}

/// Runs one tick per active deployment every `interval`.
pub struct TickDriver<S> {
    store: StoreAccess,
    updater: UpdaterFactory<S>,
    interval: Duration,
}

impl<S: InstanceScheduler + 'static> TickDriver<S> {
    pub fn new<F>(store: StoreAccess, updater: F, interval: Duration) -> Self
    where
        F: Fn(StateStore) -> Updater<S> + Send + Sync + 'static,
    {
        Self {
            store,
            updater: Box::new(updater),
            interval,
        }
    }

    /// Tick every active deployment once. Returns how many were ticked.
    ///
    /// Every store handle taken for the pass is dropped before this returns.
    pub async fn tick_all(&self) -> usize {
        let store = match self.store.open() {
            Ok(store) => store,
            Err(StateError::Busy(path)) => {
                debug!(%path, "state store in use, skipping pass");
                return 0;
            }
            Err(e) => {
                warn!(error = %e, "failed to open state store");
                return 0;
            }
        };
        let deployments = match store.list_deployments() {
            Ok(deployments) => deployments,
            Err(e) => {
                error!(error = %e, "failed to list deployments");
                return 0;
            }
        };

        let updater = Arc::new((self.updater)(store));
        let mut tasks = JoinSet::new();
        for deployment in deployments {
            let Some(command) = command_for(&deployment) else {
                continue;
            };
            let updater = updater.clone();
            tasks.spawn(async move {
                updater.tick(&deployment.id, command).await;
            });
        }

        let ticked = tasks.len();
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "deployment tick task panicked");
            }
        }
        debug!(ticked, "tick pass complete");
        ticked
    }

    /// Run the tick loop until `shutdown` fires.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "tick driver started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    self.tick_all().await;
                }
                _ = shutdown.changed() => {
                    info!("tick driver shutting down");
                    break;
                }
            }
        }
    }
}
