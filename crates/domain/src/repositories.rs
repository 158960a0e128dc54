//! 领域仓储抽象
//!
//! Persistence seams implemented by the SQLite store and by the in-memory
//! doubles used in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use tiering_core::TieringResult;

use crate::entities::{
    FailureTransition, GenerationTask, GenerationTaskStatus, NewGenerationTask, NewOutboxEntry,
    OutboxEntry, OutboxStatus,
};

/// Durable key/value settings that survive restarts.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> TieringResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> TieringResult<()>;
    async fn health_check(&self) -> TieringResult<bool>;
}

#[async_trait]
pub trait OutboxRepository: Send + Sync {
    async fn insert(&self, entry: &NewOutboxEntry) -> TieringResult<i64>;
    /// Pending rows in enqueue order.
    async fn fetch_pending(&self, limit: u32) -> TieringResult<Vec<OutboxEntry>> {
        self.fetch_pending_after(0, limit).await
    }
    /// Pending rows with an id greater than `after_id`, in enqueue order.
    async fn fetch_pending_after(&self, after_id: i64, limit: u32)
        -> TieringResult<Vec<OutboxEntry>>;
    async fn mark_sent(&self, id: i64) -> TieringResult<()>;
    /// Counts an attempt; the row becomes `failed` once `max_attempts` is hit.
    async fn mark_failed(&self, id: i64, error: &str, max_attempts: i32)
        -> TieringResult<OutboxStatus>;
    async fn purge_sent(&self, before: DateTime<Utc>) -> TieringResult<u64>;
    async fn count_by_status(&self) -> TieringResult<HashMap<OutboxStatus, i64>>;
}

/// A write transaction that business code and the outbox share.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn stage_outbox(&mut self, entry: &NewOutboxEntry) -> TieringResult<i64>;
    async fn commit(self: Box<Self>) -> TieringResult<()>;
    async fn rollback(self: Box<Self>) -> TieringResult<()>;
}

#[async_trait]
pub trait GenerationTaskRepository: Send + Sync {
    async fn insert(&self, task: &NewGenerationTask, now: DateTime<Utc>) -> TieringResult<i64>;
    async fn get(&self, id: i64) -> TieringResult<Option<GenerationTask>>;
    /// Conditional `queued|failed -> claimed`; true only for the winner.
    async fn claim(&self, id: i64, now: DateTime<Utc>) -> TieringResult<bool>;
    /// Conditional `claimed -> running`.
    async fn mark_running(&self, id: i64) -> TieringResult<bool>;
    async fn mark_succeeded(&self, id: i64, result: Option<&serde_json::Value>)
        -> TieringResult<bool>;
    async fn record_failure(
        &self,
        id: i64,
        error: &str,
        transition: FailureTransition,
    ) -> TieringResult<bool>;
    async fn fetch_eligible(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> TieringResult<Vec<GenerationTask>>;
    async fn count_by_status(&self) -> TieringResult<HashMap<GenerationTaskStatus, i64>>;
}
