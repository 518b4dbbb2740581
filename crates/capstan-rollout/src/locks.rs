//! Per-deployment tick serialization.
//!
//! Two ticks for the same deployment must never overlap: a scale racing a
//! cancel could double-finalize or resurrect a canceled rollout. Ticks for
//! different deployments run freely in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of one async mutex per deployment id.
#[derive(Clone, Default)]
pub struct TickLocks {
    slots: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl TickLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `deployment_id`. The lock is held until
    /// the returned guard is dropped.
    pub async fn acquire(&self, deployment_id: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().await;
            slots
                .entry(deployment_id.to_string())
                .or_default()
                .clone()
        };
        slot.lock_owned().await
    }

    /// Number of deployments with a lock slot.
    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
