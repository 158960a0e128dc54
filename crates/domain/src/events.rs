//! 领域事件

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::DeploymentMode;

/// Published after the active mode changes, either by a switch or by the
/// initial background convergence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeChangedEvent {
    pub previous: DeploymentMode,
    pub current: DeploymentMode,
    pub reason: String,
    pub changed_at: DateTime<Utc>,
}

impl ModeChangedEvent {
    pub fn new(previous: DeploymentMode, current: DeploymentMode, reason: impl Into<String>) -> Self {
        Self {
            previous,
            current,
            reason: reason.into(),
            changed_at: Utc::now(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        "deployment_mode.changed"
    }
}
