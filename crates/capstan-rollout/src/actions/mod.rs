//! Rollout actions.
//!
//! Each action takes the deployment record by `&mut`, talks to the
//! instance scheduler, and reports whether its phase goal has been reached
//! as of this tick. `false` is not a failure: the updater simply calls
//! again on the next tick.

use std::future::Future;

use capstan_state::Deployment;

use crate::error::RolloutResult;

mod cancel;
mod finalize;
mod scale;

pub use cancel::Cancel;
pub use finalize::Finalize;
pub use scale::{Scale, ScaleStep};

/// A single step of the rollout state machine.
pub trait Action {
    /// Run the action against `deployment`, mutating it in place.
    ///
    /// Returns `true` once the action's convergence goal is reached.
    fn execute(
        &self,
        deployment: &mut Deployment,
    ) -> impl Future<Output = RolloutResult<bool>> + Send;
}
