//! Mode switch bookkeeping: the in-flight context, its outcome and the
//! history record kept afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use tiering_core::{TieringError, TieringResult};

use crate::value_objects::{DeploymentMode, TransitionKey, TransitionKind};

/// Checks run before anything is committed; the first failure aborts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreSwitchCheck {
    ExternalStoreConfigured,
    ExternalStoreReachable,
    ObjectStoreCredentialsPresent,
    ObjectStoreReachable,
    LocalStoreHealthy,
}

impl PreSwitchCheck {
    pub fn name(&self) -> &'static str {
        match self {
            PreSwitchCheck::ExternalStoreConfigured => "external_store_configured",
            PreSwitchCheck::ExternalStoreReachable => "external_store_reachable",
            PreSwitchCheck::ObjectStoreCredentialsPresent => "object_store_credentials_present",
            PreSwitchCheck::ObjectStoreReachable => "object_store_reachable",
            PreSwitchCheck::LocalStoreHealthy => "local_store_healthy",
        }
    }
}

/// Best-effort follow-ups after the new mode is committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostSwitchAction {
    ClearAvailabilityCache,
    RefreshSyncPolicy,
    RunStartupSync,
    FlushOutbox,
    ReleaseObjectStore,
}

impl PostSwitchAction {
    pub fn name(&self) -> &'static str {
        match self {
            PostSwitchAction::ClearAvailabilityCache => "clear_availability_cache",
            PostSwitchAction::RefreshSyncPolicy => "refresh_sync_policy",
            PostSwitchAction::RunStartupSync => "run_startup_sync",
            PostSwitchAction::FlushOutbox => "flush_outbox",
            PostSwitchAction::ReleaseObjectStore => "release_object_store",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackPlan {
    pub supported: bool,
    /// Mode that stays active if the switch is abandoned.
    pub restore_mode: DeploymentMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeSwitchContext {
    pub from: DeploymentMode,
    pub to: DeploymentMode,
    pub kind: TransitionKind,
    pub reason: String,
    pub started_at: DateTime<Utc>,
    pub estimated_duration: Duration,
    pub migration_required: bool,
    /// False when migration was required but no routine was registered.
    pub data_migrated: bool,
    pub rollback_plan: RollbackPlan,
}

impl ModeSwitchContext {
    pub fn key(&self) -> TransitionKey {
        TransitionKey::new(self.from, self.to)
    }

    pub fn elapsed(&self) -> Duration {
        (Utc::now() - self.started_at).to_std().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectionReason {
    /// Another switch holds the single-flight slot.
    Busy,
    Unreachable {
        from: DeploymentMode,
        to: DeploymentMode,
    },
    Malformed {
        input: String,
    },
    PreCheckFailed {
        check: String,
        message: String,
    },
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::Busy => write!(f, "a mode switch is already in progress"),
            RejectionReason::Unreachable { from, to } => {
                write!(f, "{to} is not reachable from {from}")
            }
            RejectionReason::Malformed { input } => {
                write!(f, "malformed target mode: {input:?}")
            }
            RejectionReason::PreCheckFailed { check, message } => {
                write!(f, "pre-switch check {check} failed: {message}")
            }
        }
    }
}

/// Summary of a finished switch, kept in the bounded history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchRecord {
    pub from: DeploymentMode,
    pub to: DeploymentMode,
    pub kind: TransitionKind,
    pub reason: String,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub success: bool,
    pub error: Option<String>,
    pub data_migrated: bool,
    pub post_action_failures: Vec<String>,
    pub rolled_back: bool,
}

impl SwitchRecord {
    pub fn from_context(ctx: &ModeSwitchContext) -> Self {
        Self {
            from: ctx.from,
            to: ctx.to,
            kind: ctx.kind,
            reason: ctx.reason.clone(),
            started_at: ctx.started_at,
            duration: ctx.elapsed(),
            success: false,
            error: None,
            data_migrated: ctx.data_migrated,
            post_action_failures: Vec::new(),
            rolled_back: false,
        }
    }
}

/// Structured result of `switch_mode`; never an opaque error.
#[derive(Debug, Clone, PartialEq)]
pub enum SwitchOutcome {
    Switched(SwitchRecord),
    NoOp(DeploymentMode),
    Rejected(RejectionReason),
    Failed(SwitchRecord),
}

impl SwitchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SwitchOutcome::Switched(_) | SwitchOutcome::NoOp(_))
    }

    pub fn rejection(&self) -> Option<&RejectionReason> {
        match self {
            SwitchOutcome::Rejected(reason) => Some(reason),
            _ => None,
        }
    }

    /// Maps to the error taxonomy for callers that prefer `?`.
    pub fn into_result(self) -> TieringResult<DeploymentMode> {
        match self {
            SwitchOutcome::Switched(record) => Ok(record.to),
            SwitchOutcome::NoOp(mode) => Ok(mode),
            SwitchOutcome::Rejected(reason) => Err(TieringError::rejected(reason.to_string())),
            SwitchOutcome::Failed(record) => Err(TieringError::MigrationFailed {
                from: record.from.to_string(),
                to: record.to.to_string(),
                message: record.error.unwrap_or_else(|| "unknown failure".to_string()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_maps_to_transition_rejected() {
        let outcome = SwitchOutcome::Rejected(RejectionReason::Busy);
        match outcome.into_result() {
            Err(TieringError::TransitionRejected { reason }) => {
                assert!(reason.contains("already in progress"))
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn noop_is_success() {
        let outcome = SwitchOutcome::NoOp(DeploymentMode::LocalOnly);
        assert!(outcome.is_success());
        assert_eq!(outcome.into_result().unwrap(), DeploymentMode::LocalOnly);
    }
}
