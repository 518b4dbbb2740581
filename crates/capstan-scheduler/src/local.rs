//! LocalScheduler: instance bookkeeping in the state store.
//!
//! Each instance is an `InstanceRecord` keyed by app, version and index.
//! Scaling up appends records at the next indexes; scaling down drops the
//! highest indexes first. Without `auto_ready`, new instances stay
//! `Starting` until something (a health source, a test) calls
//! [`LocalScheduler::mark_ready`].

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use capstan_state::*;

use crate::error::SchedulerResult;
use crate::{InstanceHealth, InstanceScheduler};

/// Store-backed scheduler for standalone runs and tests.
#[derive(Clone)]
pub struct LocalScheduler {
    state: StateStore,
    /// Record new instances as running and healthy immediately.
    auto_ready: bool,
}

impl LocalScheduler {
    /// Create a new local scheduler.
    pub fn new(state: StateStore, auto_ready: bool) -> Self {
        Self { state, auto_ready }
    }

    /// Current number of instances recorded for a version.
    pub fn instance_count(&self, app_id: &str, version: &str) -> SchedulerResult<u32> {
        Ok(self.state.list_instances(app_id, version)?.len() as u32)
    }

    /// Flip every `Starting` instance of a version to running and healthy.
    ///
    /// Returns how many instances changed.
    pub fn mark_ready(&self, app_id: &str, version: &str) -> SchedulerResult<u32> {
        let now = epoch_secs();
        let mut changed = 0;
        for mut record in self.state.list_instances(app_id, version)? {
            if record.status == InstanceStatus::Running && record.health == HealthStatus::Healthy {
                continue;
            }
            record.status = InstanceStatus::Running;
            record.health = HealthStatus::Healthy;
            record.updated_at = now;
            self.state.put_instance(&record)?;
            changed += 1;
        }
        debug!(%app_id, %version, changed, "instances marked ready");
        Ok(changed)
    }

    /// Mark one instance as failing its health check.
    ///
    /// Returns false if no such instance exists.
    pub fn mark_unhealthy(&self, app_id: &str, version: &str, index: u32) -> SchedulerResult<bool> {
        let records = self.state.list_instances(app_id, version)?;
        let Some(mut record) = records.into_iter().find(|r| r.index == index) else {
            return Ok(false);
        };
        record.health = HealthStatus::Unhealthy;
        record.updated_at = epoch_secs();
        self.state.put_instance(&record)?;
        debug!(%app_id, %version, index, "instance marked unhealthy");
        Ok(true)
    }

    /// Mark one instance as crashed. Crashed instances count as neither
    /// running nor healthy until [`LocalScheduler::mark_ready`] restarts them.
    ///
    /// Returns false if no such instance exists.
    pub fn mark_crashed(&self, app_id: &str, version: &str, index: u32) -> SchedulerResult<bool> {
        let records = self.state.list_instances(app_id, version)?;
        let Some(mut record) = records.into_iter().find(|r| r.index == index) else {
            return Ok(false);
        };
        record.status = InstanceStatus::Crashed;
        record.health = HealthStatus::Unknown;
        record.updated_at = epoch_secs();
        self.state.put_instance(&record)?;
        debug!(%app_id, %version, index, "instance marked crashed");
        Ok(true)
    }

    fn new_record(&self, app_id: &str, version: &str, index: u32, now: u64) -> InstanceRecord {
        let (status, health) = if self.auto_ready {
            (InstanceStatus::Running, HealthStatus::Healthy)
        } else {
            (InstanceStatus::Starting, HealthStatus::Unknown)
        };
        InstanceRecord {
            app_id: app_id.to_string(),
            version: version.to_string(),
            index,
            status,
            health,
            started_at: now,
            updated_at: now,
        }
    }
}

impl InstanceScheduler for LocalScheduler {
    async fn set_instance_count(&self, app_id: &str, version: &str, count: u32) -> SchedulerResult<()> {
        let existing = self.state.list_instances(app_id, version)?;
        let current = existing.len() as u32;
        let now = epoch_secs();

        if count > current {
            let next_index = existing.last().map_or(0, |r| r.index + 1);
            for index in next_index..next_index + (count - current) {
                self.state
                    .put_instance(&self.new_record(app_id, version, index, now))?;
            }
            info!(%app_id, %version, from = current, to = count, "scaled up");
        } else if count < current {
            // Highest indexes go first.
            for record in existing.iter().rev().take((current - count) as usize) {
                self.state.delete_instance(app_id, version, record.index)?;
            }
            info!(%app_id, %version, from = current, to = count, "scaled down");
        } else {
            debug!(%app_id, %version, count, "already at target, no scaling needed");
        }
        Ok(())
    }

    async fn query_instance_health(&self, app_id: &str, version: &str) -> SchedulerResult<InstanceHealth> {
        let records = self.state.list_instances(app_id, version)?;
        let running = records
            .iter()
            .filter(|r| r.status == InstanceStatus::Running)
            .count() as u32;
        let healthy = records
            .iter()
            .filter(|r| r.status == InstanceStatus::Running && r.health == HealthStatus::Healthy)
            .count() as u32;
        Ok(InstanceHealth { running, healthy })
    }

    async fn remove_instances(&self, app_id: &str, version: &str) -> SchedulerResult<u32> {
        let removed = self.state.delete_instances(app_id, version)?;
        info!(%app_id, %version, removed, "instances removed");
        Ok(removed)
    }
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
