//! Updater: the per-tick entry point of the rollout controller.
//!
//! A tick loads the deployment record, runs the command's action sequence
//! against a working copy, and commits the copy back in one
//! compare-and-swap write. Failures never escape [`Updater::tick`]: they are
//! classified, stored on the record's `error` field and logged.

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, error, info};

use capstan_core::StepPolicy;
use capstan_scheduler::InstanceScheduler;
use capstan_state::{Deployment, DeploymentPhase, StateStore};

use crate::actions::{Action, Cancel, Finalize, Scale};
use crate::command::Command;
use crate::error::{DomainError, RolloutError, RolloutResult};
use crate::locks::TickLocks;

/// Source of "now" in unix seconds.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Drives deployments through scale, canary and cancel ticks.
pub struct Updater<S> {
    store: StateStore,
    scheduler: S,
    policy: StepPolicy,
    locks: TickLocks,
    clock: Clock,
}

impl<S: InstanceScheduler> Updater<S> {
    /// Create a new updater using the system clock.
    pub fn new(store: StateStore, scheduler: S, policy: StepPolicy) -> Self {
        Self {
            store,
            scheduler,
            policy,
            locks: TickLocks::new(),
            clock: Arc::new(epoch_secs),
        }
    }

    /// Replace the clock (for deterministic timestamps).
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// Run one tick of `command` for `deployment_id`.
    ///
    /// Never fails: outcomes are visible only on the stored record and in logs.
    pub async fn tick(&self, deployment_id: &str, command: Command) {
        let _guard = self.locks.acquire(deployment_id).await;
        let started = Instant::now();

        match self.run(deployment_id, command).await {
            Ok(deployment) => {
                info!(
                    %deployment_id,
                    %command,
                    phase = %deployment.phase,
                    deploying = deployment.deploying_instances,
                    stable = deployment.stable_instances,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "ran deployment tick"
                );
            }
            Err(err) => self.record_failure(deployment_id, command, &err),
        }
    }

    async fn run(&self, deployment_id: &str, command: Command) -> RolloutResult<Deployment> {
        let original = self
            .store
            .get_deployment(deployment_id)?
            .ok_or_else(|| RolloutError::NotFound(deployment_id.to_string()))?;

        let mut deployment = original.clone();
        match command {
            Command::Scale => self.scale(&mut deployment).await?,
            Command::Canary => self.canary(&mut deployment).await?,
            Command::Cancel => self.cancel(&mut deployment).await?,
        }

        if deployment != original {
            deployment.updated_at = (self.clock)();
            self.store
                .commit_deployment(&mut deployment, original.revision)?;
        } else {
            debug!(%deployment_id, %command, "tick made no changes");
        }
        Ok(deployment)
    }

    async fn scale(&self, deployment: &mut Deployment) -> RolloutResult<()> {
        ensure_in_progress(deployment, "scale")?;
        deployment.set_phase(DeploymentPhase::Deploying);

        let finished = Scale::new(&self.scheduler, self.policy, deployment.desired_web_instances)
            .execute(deployment)
            .await?;
        if finished {
            Finalize::new(&self.scheduler).execute(deployment).await?;
        }
        Ok(())
    }

    async fn canary(&self, deployment: &mut Deployment) -> RolloutResult<()> {
        if deployment.phase == DeploymentPhase::Paused {
            debug!(deployment_id = %deployment.id, "canary already paused, awaiting promotion");
            return Ok(());
        }
        ensure_in_progress(deployment, "canary")?;
        let canary = deployment
            .canary
            .clone()
            .ok_or(DomainError::CanaryNotConfigured)?;
        deployment.set_phase(DeploymentPhase::Deploying);

        let step = Scale::new(&self.scheduler, self.policy, canary.total_instances)
            .with_cap(canary.current_instance_target)
            .step(deployment)
            .await?;

        if step.finished {
            deployment.last_healthy_at = Some((self.clock)());
            deployment.set_phase(DeploymentPhase::Paused);
            info!(
                deployment_id = %deployment.id,
                canary_instances = canary.total_instances,
                "paused canary deployment"
            );
        } else if step.at_cap {
            let remaining = canary.total_instances - canary.current_instance_target;
            let next = (canary.current_instance_target + self.policy.step(remaining))
                .min(canary.total_instances);
            if let Some(settings) = deployment.canary.as_mut() {
                settings.current_instance_target = next;
            }
            debug!(
                deployment_id = %deployment.id,
                from = canary.current_instance_target,
                to = next,
                "advanced canary instance target"
            );
        }
        Ok(())
    }

    async fn cancel(&self, deployment: &mut Deployment) -> RolloutResult<()> {
        Cancel::new(&self.scheduler).execute(deployment).await?;
        Ok(())
    }

    /// Persist a classified failure and log it. Nothing here can fail the tick.
    fn record_failure(&self, deployment_id: &str, command: Command, err: &RolloutError) {
        let class = err.classify();

        if !matches!(err, RolloutError::NotFound(_)) {
            let message = err.persisted_message();
            let now = (self.clock)();
            let refusal = err.is_refusal();
            let saved = self.store.update_deployment(deployment_id, |deployment| {
                deployment.error = Some(message);
                if !refusal && deployment.phase.is_in_progress() {
                    // A failed cancel stays a cancel so the next pass retries it.
                    deployment.set_phase(match command {
                        Command::Cancel => DeploymentPhase::Canceling,
                        Command::Scale | Command::Canary => DeploymentPhase::Failed,
                    });
                }
                deployment.updated_at = now;
            });
            if let Err(save_err) = saved {
                error!(
                    %deployment_id,
                    error = %save_err,
                    "error saving deployment error"
                );
            }
        }

        error!(
            %deployment_id,
            %command,
            error_kind = err.kind(),
            error_class = ?class,
            error = %err,
            "{}",
            command.failure_message()
        );
    }
}

fn ensure_in_progress(deployment: &Deployment, action: &'static str) -> RolloutResult<()> {
    if deployment.phase.is_in_progress() {
        Ok(())
    } else {
        Err(DomainError::InvalidPhase {
            action,
            phase: deployment.phase,
        }
        .into())
    }
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
