//! Domain types for the Capstan state store.
//!
//! A [`Deployment`] tracks one rollout of a new application version over
//! the instances of the previous (stable) version. [`InstanceRecord`]s are
//! only written by the local scheduler.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{StateError, StateResult};

/// Unique identifier for a deployment.
pub type DeploymentId = String;

/// Identifier of the application that owns a deployment.
pub type AppId = String;

/// Identifier of an application version (droplet, image digest, ...).
pub type VersionId = String;

// ── Deployment ─────────────────────────────────────────────────────

/// Rollout phase. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentPhase {
    /// Replacing instances (or growing the canary).
    Deploying,
    /// Canary converged; waiting for promotion.
    Paused,
    /// Cancellation requested; the next cancel tick reverts the rollout.
    Canceling,
    /// Rollout finished and superseded instances removed.
    Deployed,
    /// Rollout reverted to the previous version.
    Canceled,
    /// Last tick failed; retried on the next tick.
    Failed,
}

impl DeploymentPhase {
    /// Terminal phases are never ticked forward again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Deployed | Self::Canceled)
    }

    /// Phases in which scale and canary ticks may make progress.
    pub fn is_in_progress(self) -> bool {
        matches!(self, Self::Deploying | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deploying => "DEPLOYING",
            Self::Paused => "PAUSED",
            Self::Canceling => "CANCELING",
            Self::Deployed => "DEPLOYED",
            Self::Canceled => "CANCELED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for DeploymentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse status shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusValue {
    Active,
    Finalized,
}

/// Why a deployment has its current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusReason {
    Deploying,
    Paused,
    Canceling,
    Deployed,
    Canceled,
}

/// Canary gate settings for a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanarySettings {
    /// Number of new-version instances the canary phase runs up to.
    pub total_instances: u32,
    /// How many canary instances are currently permitted. Never exceeds
    /// `total_instances`.
    pub current_instance_target: u32,
}

/// A tracked rollout of a new application version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,
    pub app_id: AppId,
    /// Version being rolled out.
    pub version: VersionId,
    /// Stable version being replaced.
    pub previous_version: VersionId,
    /// Stable instance count when the rollout began.
    pub original_instances: u32,
    /// Desired total web instance count once the rollout completes.
    pub desired_web_instances: u32,
    /// Canary gate, cleared on promotion.
    pub canary: Option<CanarySettings>,
    /// Instance count currently requested for `version`.
    pub deploying_instances: u32,
    /// Instance count currently requested for `previous_version`.
    pub stable_instances: u32,
    pub phase: DeploymentPhase,
    pub status_value: StatusValue,
    pub status_reason: StatusReason,
    /// Unix timestamp of the last successful canary completion.
    pub last_healthy_at: Option<u64>,
    /// Latest tick failure, overwritten by the next one.
    pub error: Option<String>,
    /// Bumped on every committed write.
    pub revision: u64,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Request to start a new rollout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDeployment {
    pub id: DeploymentId,
    pub app_id: AppId,
    pub version: VersionId,
    pub previous_version: VersionId,
    pub original_instances: u32,
    pub desired_web_instances: u32,
    pub canary_total_instances: Option<u32>,
}

impl NewDeployment {
    fn validate(&self) -> StateResult<()> {
        let invalid = |msg: String| Err(StateError::InvalidDeployment(msg));
        if self.id.trim().is_empty() {
            return invalid("id must not be empty".to_string());
        }
        if self.app_id.trim().is_empty() {
            return invalid("app_id must not be empty".to_string());
        }
        if self.version == self.previous_version {
            return invalid(format!(
                "version {} is already the stable version",
                self.version
            ));
        }
        if let Some(total) = self.canary_total_instances {
            if total == 0 {
                return invalid("canary must run at least one instance".to_string());
            }
            if total > self.desired_web_instances {
                return invalid(format!(
                    "canary instances ({total}) exceed desired web instances ({})",
                    self.desired_web_instances
                ));
            }
        }
        Ok(())
    }
}

impl Deployment {
    /// Build a fresh `DEPLOYING` record from a rollout request.
    pub fn new(request: NewDeployment, now: u64) -> StateResult<Self> {
        request.validate()?;
        Ok(Self {
            id: request.id,
            app_id: request.app_id,
            version: request.version,
            previous_version: request.previous_version,
            original_instances: request.original_instances,
            desired_web_instances: request.desired_web_instances,
            canary: request.canary_total_instances.map(|total| CanarySettings {
                total_instances: total,
                current_instance_target: 0,
            }),
            deploying_instances: 0,
            stable_instances: request.original_instances,
            phase: DeploymentPhase::Deploying,
            status_value: StatusValue::Active,
            status_reason: StatusReason::Deploying,
            last_healthy_at: None,
            error: None,
            revision: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Build the key for the deployments table.
    pub fn table_key(&self) -> &str {
        &self.id
    }

    /// Move to `phase`, keeping the status pair consistent with it.
    pub fn set_phase(&mut self, phase: DeploymentPhase) {
        let (value, reason) = match phase {
            DeploymentPhase::Deploying | DeploymentPhase::Failed => {
                (StatusValue::Active, StatusReason::Deploying)
            }
            DeploymentPhase::Paused => (StatusValue::Active, StatusReason::Paused),
            DeploymentPhase::Canceling => (StatusValue::Active, StatusReason::Canceling),
            DeploymentPhase::Deployed => (StatusValue::Finalized, StatusReason::Deployed),
            DeploymentPhase::Canceled => (StatusValue::Finalized, StatusReason::Canceled),
        };
        self.phase = phase;
        self.status_value = value;
        self.status_reason = reason;
    }

    /// Ask for the rollout to be reverted. Returns false for terminal
    /// deployments, which are left untouched.
    pub fn request_cancel(&mut self) -> bool {
        if self.phase.is_terminal() {
            return false;
        }
        self.set_phase(DeploymentPhase::Canceling);
        true
    }

    /// Release a paused canary into the full rollout. Returns false unless
    /// the deployment is paused.
    pub fn promote(&mut self) -> bool {
        if self.phase != DeploymentPhase::Paused {
            return false;
        }
        self.canary = None;
        self.set_phase(DeploymentPhase::Deploying);
        true
    }
}

// ── Instance ──────────────────────────────────────────────────────

/// Lifecycle status of a locally scheduled instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Starting,
    Running,
    Crashed,
}

/// Health status as reported for an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

/// One instance of an application version, as tracked by the local scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub app_id: AppId,
    pub version: VersionId,
    pub index: u32,
    pub status: InstanceStatus,
    pub health: HealthStatus,
    pub started_at: u64,
    pub updated_at: u64,
}

impl InstanceRecord {
    /// Build the composite key for the instances table.
    pub fn table_key(&self) -> String {
        instance_key(&self.app_id, &self.version, self.index)
    }
}

/// Key prefix shared by every instance of one app version.
pub fn instance_prefix(app_id: &str, version: &str) -> String {
    format!("{app_id}:{version}:")
}

/// Indexes are zero-padded so key order matches index order.
pub fn instance_key(app_id: &str, version: &str, index: u32) -> String {
    format!("{}{index:06}", instance_prefix(app_id, version))
}
