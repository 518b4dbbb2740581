//! Scale: one bounded step toward a target instance count.
//!
//! Each call:
//! 1. Asks the scheduler whether every requested new-version instance is
//!    running and healthy. If not, nothing changes this tick.
//! 2. Retires stable instances that healthy new ones now replace, keeping
//!    `stable + healthy_new` at the desired web instance count.
//! 3. Moves the new version one policy step toward `min(target, cap)`.
//!
//! The step is finished once the new version sits at the target with
//! every instance healthy (and, outside canary mode, no stable instances
//! left).

use tracing::{debug, info};

use capstan_core::StepPolicy;
use capstan_scheduler::InstanceScheduler;
use capstan_state::Deployment;

use crate::actions::Action;
use crate::error::{DomainError, RolloutResult};

/// Outcome of a single scale step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScaleStep {
    /// The target is reached and healthy.
    pub finished: bool,
    /// Healthy and sitting exactly at the canary cap, below the target.
    pub at_cap: bool,
    /// Instance counts were submitted to the scheduler this tick.
    pub changed: bool,
}

/// Incremental scaler for the new version of a deployment.
pub struct Scale<'a, S> {
    scheduler: &'a S,
    policy: StepPolicy,
    target: u32,
    cap: Option<u32>,
}

impl<'a, S: InstanceScheduler> Scale<'a, S> {
    pub fn new(scheduler: &'a S, policy: StepPolicy, target: u32) -> Self {
        Self {
            scheduler,
            policy,
            target,
            cap: None,
        }
    }

    /// Bound the new version to `cap` instances (canary mode).
    pub fn with_cap(mut self, cap: u32) -> Self {
        self.cap = Some(cap);
        self
    }

    /// Run one step and report finished/at-cap for the caller.
    pub async fn step(&self, deployment: &mut Deployment) -> RolloutResult<ScaleStep> {
        let limit = match self.cap {
            Some(cap) if cap > self.target => {
                return Err(DomainError::CapExceedsTarget {
                    cap,
                    target: self.target,
                }
                .into());
            }
            Some(cap) => cap,
            None => self.target,
        };

        let health = self
            .scheduler
            .query_instance_health(&deployment.app_id, &deployment.version)
            .await?;
        if !health.covers(deployment.deploying_instances) {
            debug!(
                deployment_id = %deployment.id,
                expected = deployment.deploying_instances,
                running = health.running,
                healthy = health.healthy,
                "waiting for new instances to become healthy"
            );
            return Ok(ScaleStep::default());
        }

        let mut step = ScaleStep::default();

        let replaced = health.healthy.min(deployment.deploying_instances);
        let stable_goal = deployment
            .desired_web_instances
            .saturating_sub(replaced)
            .min(deployment.stable_instances);
        if stable_goal < deployment.stable_instances {
            self.scheduler
                .set_instance_count(
                    &deployment.app_id,
                    &deployment.previous_version,
                    stable_goal,
                )
                .await?;
            debug!(
                deployment_id = %deployment.id,
                from = deployment.stable_instances,
                to = stable_goal,
                "retired stable instances"
            );
            deployment.stable_instances = stable_goal;
            step.changed = true;
        }

        let current = deployment.deploying_instances;
        if current == self.target {
            step.finished = self.cap.is_some() || deployment.stable_instances == 0;
            return Ok(step);
        }
        if current == limit {
            step.at_cap = true;
            return Ok(step);
        }

        let next = if current < limit {
            current + self.policy.step(limit - current)
        } else {
            current - self.policy.step(current - limit)
        };
        self.scheduler
            .set_instance_count(&deployment.app_id, &deployment.version, next)
            .await?;
        info!(
            deployment_id = %deployment.id,
            version = %deployment.version,
            from = current,
            to = next,
            target = self.target,
            cap = ?self.cap,
            "scaled deploying instances"
        );
        deployment.deploying_instances = next;
        step.changed = true;
        Ok(step)
    }
}

impl<S: InstanceScheduler> Action for Scale<'_, S> {
    async fn execute(&self, deployment: &mut Deployment) -> RolloutResult<bool> {
        Ok(self.step(deployment).await?.finished)
    }
}
