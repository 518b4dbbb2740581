//! capstan-scheduler: the instance scheduler seam of the rollout controller.
//!
//! The rollout controller never starts or stops processes itself. It asks
//! an [`InstanceScheduler`] to converge an app version to an instance
//! count, to report how many of those instances are running and healthy,
//! and to drop a version entirely.
//!
//! # Architecture
//!
//! ```text
//! InstanceScheduler (trait)
//!   ├── set_instance_count(app, version, count)
//!   ├── query_instance_health(app, version) → InstanceHealth
//!   └── remove_instances(app, version)
//!
//! LocalScheduler
//!   └── StateStore (INSTANCES table, one record per instance)
//! ```
//!
//! `LocalScheduler` keeps instance records in the state store so the
//! daemon can run without a real container scheduler behind it.

use std::future::Future;
use std::sync::Arc;

pub mod error;
pub mod local;

pub use error::{SchedulerError, SchedulerResult};
pub use local::LocalScheduler;

/// Instance counts reported for one app version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstanceHealth {
    /// Instances that have started and are running.
    pub running: u32,
    /// Running instances that pass their health check.
    pub healthy: u32,
}

impl InstanceHealth {
    /// True when at least `expected` instances are running and healthy.
    pub fn covers(&self, expected: u32) -> bool {
        self.running >= expected && self.healthy >= expected
    }
}

/// The external scheduler that actually places and runs instances.
///
/// Implementations are expected to apply their own timeout and retry
/// discipline; the controller calls each method at most once per tick.
pub trait InstanceScheduler: Send + Sync {
    /// Converge `version` of `app_id` to exactly `count` instances.
    fn set_instance_count(
        &self,
        app_id: &str,
        version: &str,
        count: u32,
    ) -> impl Future<Output = SchedulerResult<()>> + Send;

    /// Report running/healthy counts for `version` of `app_id`.
    fn query_instance_health(
        &self,
        app_id: &str,
        version: &str,
    ) -> impl Future<Output = SchedulerResult<InstanceHealth>> + Send;

    /// Stop and forget every instance of `version`. Returns how many were removed.
    fn remove_instances(
        &self,
        app_id: &str,
        version: &str,
    ) -> impl Future<Output = SchedulerResult<u32>> + Send;
}

impl<S: InstanceScheduler> InstanceScheduler for Arc<S> {
    fn set_instance_count(
        &self,
        app_id: &str,
        version: &str,
        count: u32,
    ) -> impl Future<Output = SchedulerResult<()>> + Send {
        (**self).set_instance_count(app_id, version, count)
    }

    fn query_instance_health(
        &self,
        app_id: &str,
        version: &str,
    ) -> impl Future<Output = SchedulerResult<InstanceHealth>> + Send {
        (**self).query_instance_health(app_id, version)
    }

    fn remove_instances(
        &self,
        app_id: &str,
        version: &str,
    ) -> impl Future<Output = SchedulerResult<u32>> + Send {
        (**self).remove_instances(app_id, version)
    }
}
