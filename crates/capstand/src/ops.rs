//! Operator requests against stored deployments.

use anyhow::bail;

use capstan_state::{Deployment, StateStore};

/// Ask for a deployment to be canceled. The next pass runs the cancel tick.
pub fn request_cancel(store: &StateStore, id: &str) -> anyhow::Result<Deployment> {
    let mut requested = false;
    let deployment = store.update_deployment(id, |d| requested = d.request_cancel())?;
    if !requested {
        bail!("deployment {id} is {}, cannot cancel", deployment.phase);
    }
    Ok(deployment)
}

/// Release a paused canary into the full rollout.
pub fn promote(store: &StateStore, id: &str) -> anyhow::Result<Deployment> {
    let mut promoted = false;
    let deployment = store.update_deployment(id, |d| promoted = d.promote())?;
    if !promoted {
        bail!(
            "deployment {id} is {}, only PAUSED deployments can be promoted",
            deployment.phase
        );
    }
    Ok(deployment)
}
