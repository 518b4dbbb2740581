//! Cancel: revert a rollout to the previous version.

use tracing::{debug, info};

use capstan_scheduler::InstanceScheduler;
use capstan_state::{Deployment, DeploymentPhase};

use crate::actions::Action;
use crate::error::{DomainError, RolloutResult};

/// Restores the stable instance set and removes the new version's instances.
///
/// Safe from any non-terminal phase. A second cancel is a no-op that
/// touches neither the scheduler nor the record.
pub struct Cancel<'a, S> {
    scheduler: &'a S,
}

impl<'a, S: InstanceScheduler> Cancel<'a, S> {
    pub fn new(scheduler: &'a S) -> Self {
        Self { scheduler }
    }
}

impl<S: InstanceScheduler> Action for Cancel<'_, S> {
    async fn execute(&self, deployment: &mut Deployment) -> RolloutResult<bool> {
        match deployment.phase {
            DeploymentPhase::Canceled => {
                debug!(deployment_id = %deployment.id, "deployment already canceled");
                return Ok(true);
            }
            DeploymentPhase::Deployed => {
                return Err(DomainError::InvalidPhase {
                    action: "cancel",
                    phase: deployment.phase,
                }
                .into());
            }
            _ => {}
        }

        // Restore the stable set before removing new instances.
        self.scheduler
            .set_instance_count(
                &deployment.app_id,
                &deployment.previous_version,
                deployment.original_instances,
            )
            .await?;
        let removed = self
            .scheduler
            .remove_instances(&deployment.app_id, &deployment.version)
            .await?;

        deployment.deploying_instances = 0;
        deployment.stable_instances = deployment.original_instances;
        deployment.set_phase(DeploymentPhase::Canceled);

        info!(
            deployment_id = %deployment.id,
            restored = deployment.original_instances,
            removed,
            "canceled deployment"
        );
        Ok(true)
    }
}
