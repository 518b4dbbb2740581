//! Step-size policy for incremental scaling.
//!
//! Each rollout tick moves the new version's instance count one bounded
//! step toward its target. The policy decides how large that step is.

use serde::{Deserialize, Serialize};

/// How many instances a single rollout tick may add or remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepPolicy {
    /// Move a fixed number of instances per tick.
    Fixed { instances: u32 },
    /// Move a percentage of the remaining distance per tick, rounded down.
    Fraction { percent: u32 },
}

impl Default for StepPolicy {
    fn default() -> Self {
        Self::Fixed { instances: 1 }
    }
}

impl StepPolicy {
    /// Size of the next step given the remaining distance to the target.
    ///
    /// Never zero while `remaining > 0` and never larger than `remaining`.
    pub fn step(&self, remaining: u32) -> u32 {
        if remaining == 0 {
            return 0;
        }
        let raw = match *self {
            StepPolicy::Fixed { instances } => instances,
            StepPolicy::Fraction { percent } => {
                (u64::from(remaining) * u64::from(percent) / 100) as u32
            }
        };
        raw.clamp(1, remaining)
    }

    pub fn validate(&self) -> Result<(), String> {
        match *self {
            StepPolicy::Fixed { instances: 0 } => {
                Err("fixed step policy needs at least one instance per step".to_string())
            }
            StepPolicy::Fraction { percent } if percent == 0 || percent > 100 => Err(format!(
                "fraction step policy percent must be within 1..=100, got {percent}"
            )),
            _ => Ok(()),
        }
    }
}
