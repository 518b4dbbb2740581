//! capstand: the Capstan daemon.
//!
//! Plays the role of the external periodic scheduler for the rollout
//! controller: every tick it lists deployments, picks the command each
//! one's phase calls for, and runs [`Updater::tick`](capstan_rollout::Updater::tick)
//! for all of them concurrently.

pub mod driver;
pub mod ops;

pub use driver::{
    StoreAccess, TickDriver, UpdaterFactory, command_for, local_updater, open_when_free,
};
