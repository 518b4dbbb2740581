//! Capstan rollout controller: incremental scaling, canary gate, cancel.
//!
//! This crate drives a deployment from its previous version to a new one,
//! one bounded step per tick. An external periodic scheduler calls
//! [`Updater::tick`] once per deployment per tick with a [`Command`]; the
//! updater runs the matching action against an
//! [`InstanceScheduler`](capstan_scheduler::InstanceScheduler) and writes the
//! record back in one atomic commit.
//!
//! # Components
//!
//! - **`actions`**: `Scale`, `Cancel` and `Finalize`, each an [`Action`]
//! - **`updater`**: per-tick orchestration and error isolation
//! - **`locks`**: per-deployment tick serialization
//! - **`error`**: domain vs. internal failure classification
//!
//! # Tick flow
//!
//! ```text
//! tick(id, command)
//!   ├── TickLocks::acquire(id)
//!   ├── load Deployment (revision r)
//!   ├── scale  → Scale → Finalize when finished
//!   │   canary → Scale(total, cap) → advance cap / pause
//!   │   cancel → Cancel
//!   ├── commit Deployment if revision is still r
//!   └── on failure: persist classified message, log, never propagate
//! ```

pub mod actions;
pub mod command;
pub mod error;
pub mod locks;
pub mod updater;

pub use actions::{Action, Cancel, Finalize, Scale, ScaleStep};
pub use capstan_core::StepPolicy;
pub use command::Command;
pub use error::{DomainError, ErrorClass, RolloutError, RolloutResult, UNEXPECTED_ERROR_MESSAGE};
pub use locks::TickLocks;
pub use updater::{Clock, Updater};
