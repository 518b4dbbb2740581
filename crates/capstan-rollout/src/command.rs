//! Tick commands issued by the external scheduler.

use std::fmt;
use std::str::FromStr;

/// What a single tick should do for a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    /// Step toward the desired instance count; finalize once converged.
    Scale,
    /// Step toward the canary total, bounded by the canary instance target.
    Canary,
    /// Revert the rollout to the previous version.
    Cancel,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Scale => "scale",
            Command::Canary => "canary",
            Command::Cancel => "cancel",
        }
    }

    /// Log message emitted when a tick for this command fails.
    pub fn failure_message(self) -> &'static str {
        match self {
            Command::Scale => "error scaling deployment",
            Command::Canary => "error canarying deployment",
            Command::Cancel => "error canceling deployment",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scale" => Ok(Command::Scale),
            "canary" => Ok(Command::Canary),
            "cancel" => Ok(Command::Cancel),
            other => Err(format!(
                "unknown command '{other}', expected scale, canary or cancel"
            )),
        }
    }
}
