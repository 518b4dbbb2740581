//! Finalize: drop the superseded version once scaling has converged.

use tracing::info;

use capstan_scheduler::InstanceScheduler;
use capstan_state::{Deployment, DeploymentPhase};

use crate::actions::Action;
use crate::error::{DomainError, RolloutResult};

/// Terminal cleanup for a fully scaled, non-canary rollout.
pub struct Finalize<'a, S> {
    scheduler: &'a S,
}

impl<'a, S: InstanceScheduler> Finalize<'a, S> {
    pub fn new(scheduler: &'a S) -> Self {
        Self { scheduler }
    }
}

impl<S: InstanceScheduler> Action for Finalize<'_, S> {
    async fn execute(&self, deployment: &mut Deployment) -> RolloutResult<bool> {
        if !deployment.phase.is_in_progress() {
            return Err(DomainError::InvalidPhase {
                action: "finalize",
                phase: deployment.phase,
            }
            .into());
        }
        if deployment.deploying_instances != deployment.desired_web_instances {
            return Err(DomainError::NotConverged {
                live: deployment.deploying_instances,
                target: deployment.desired_web_instances,
            }
            .into());
        }

        let removed = self
            .scheduler
            .remove_instances(&deployment.app_id, &deployment.previous_version)
            .await?;
        deployment.stable_instances = 0;
        deployment.set_phase(DeploymentPhase::Deployed);

        info!(
            deployment_id = %deployment.id,
            version = %deployment.version,
            superseded = %deployment.previous_version,
            removed,
            "finalized deployment"
        );
        Ok(true)
    }
}
