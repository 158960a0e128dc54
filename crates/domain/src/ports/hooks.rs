use async_trait::async_trait;

use tiering_core::TieringResult;

use crate::entities::{GenerationTask, OutboxEntry};
use crate::events::ModeChangedEvent;
use crate::switching::{ModeSwitchContext, PostSwitchAction};
use crate::value_objects::DeploymentMode;

/// Moves data between stores for one `(from, to)` pair.
#[async_trait]
pub trait MigrationRoutine: Send + Sync {
    async fn migrate(&self, ctx: &ModeSwitchContext) -> TieringResult<()>;

    async fn rollback(&self, _ctx: &ModeSwitchContext) -> TieringResult<()> {
        Ok(())
    }
}

#[async_trait]
pub trait IdentityBootstrap: Send + Sync {
    /// Idempotent; returns true when an identity had to be created.
    async fn ensure_default_admin(&self, mode: DeploymentMode) -> TieringResult<bool>;
}

/// Runs post-switch actions the mode manager cannot perform on its own.
#[async_trait]
pub trait PostSwitchHook: Send + Sync {
    fn handles(&self, action: PostSwitchAction) -> bool;

    async fn run(&self, action: PostSwitchAction, ctx: &ModeSwitchContext) -> TieringResult<()>;
}

/// Applies one outbox entry to the external store. Must upsert by stable id.
#[async_trait]
pub trait ReplicationSink: Send + Sync {
    async fn apply(&self, entry: &OutboxEntry) -> TieringResult<()>;
}

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    fn task_type(&self) -> &str;

    async fn execute(&self, task: &GenerationTask) -> Result<Option<serde_json::Value>, String>;
}

pub trait ModeChangeListener: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn on_mode_changed(&self, event: &ModeChangedEvent) -> TieringResult<()>;
}
