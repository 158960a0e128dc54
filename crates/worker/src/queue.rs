//! 生成任务队列
//!
//! Thin state-machine layer over [`GenerationTaskRepository`]. Every
//! transition is a conditional update in the repository, so the queue itself
//! holds no locks.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use tiering_core::config::TaskQueueConfig;
use tiering_core::{TieringError, TieringResult};
use tiering_domain::entities::{
    FailureTransition, GenerationTask, GenerationTaskStatus, NewGenerationTask,
};
use tiering_domain::repositories::GenerationTaskRepository;

use crate::backoff::BackoffPolicy;

/// What happened to a task after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    Rescheduled {
        attempts: i32,
        next_eligible_at: DateTime<Utc>,
    },
    DeadLettered {
        attempts: i32,
    },
}

impl FailureDisposition {
    pub fn attempts(&self) -> i32 {
        match self {
            FailureDisposition::Rescheduled { attempts, .. }
            | FailureDisposition::DeadLettered { attempts } => *attempts,
        }
    }

    pub fn is_dead_lettered(&self) -> bool {
        matches!(self, FailureDisposition::DeadLettered { .. })
    }
}

pub struct GenerationTaskQueue {
    repository: Arc<dyn GenerationTaskRepository>,
    backoff: BackoffPolicy,
    max_attempts: i32,
}

impl GenerationTaskQueue {
    pub fn new(
        repository: Arc<dyn GenerationTaskRepository>,
        backoff: BackoffPolicy,
        max_attempts: i32,
    ) -> Self {
        Self {
            repository,
            backoff,
            max_attempts: max_attempts.max(0),
        }
    }

    pub fn from_config(
        repository: Arc<dyn GenerationTaskRepository>,
        config: &TaskQueueConfig,
    ) -> Self {
        Self::new(
            repository,
            BackoffPolicy::from_config(config),
            config.max_attempts,
        )
    }

    pub fn max_attempts(&self) -> i32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    // ---- 入队与查询 ----

    /// Inserts a `queued` row and returns its id without waiting for
    /// execution.
    #[instrument(skip(self, payload))]
    pub async fn enqueue(
        &self,
        owner_id: Option<&str>,
        task_type: &str,
        payload: Value,
    ) -> TieringResult<i64> {
        let task_type = task_type.trim();
        if task_type.is_empty() {
            return Err(TieringError::InvalidPayload(
                "task type must not be empty".to_string(),
            ));
        }
        let mut task = NewGenerationTask::new(task_type, payload);
        if let Some(owner) = owner_id {
            task = task.owned_by(owner);
        }
        let id = self.repository.insert(&task, Utc::now()).await?;
        metrics::counter!("tiering_generation_tasks_total", "outcome" => "enqueued").increment(1);
        debug!("Enqueued generation task {} ({})", id, task_type);
        Ok(id)
    }

    pub async fn get(&self, id: i64) -> TieringResult<Option<GenerationTask>> {
        self.repository.get(id).await
    }

    pub async fn get_status(&self, id: i64) -> TieringResult<Option<GenerationTaskStatus>> {
        Ok(self.repository.get(id).await?.map(|task| task.status))
    }

    /// Claimable tasks whose retry time has passed, oldest first.
    pub async fn fetch_eligible(&self, limit: u32) -> TieringResult<Vec<GenerationTask>> {
        self.repository.fetch_eligible(Utc::now(), limit).await
    }

    pub async fn counts(&self) -> TieringResult<HashMap<GenerationTaskStatus, i64>> {
        self.repository.count_by_status().await
    }

    // ---- 状态迁移 ----

    /// True only for the single caller that wins the task. Losing a race is a
    /// normal outcome, not an error.
    pub async fn claim(&self, id: i64) -> TieringResult<bool> {
        let claimed = self.repository.claim(id, Utc::now()).await?;
        if !claimed {
            metrics::counter!("tiering_generation_tasks_total", "outcome" => "claim_conflict")
                .increment(1);
        }
        Ok(claimed)
    }

    pub async fn mark_running(&self, id: i64) -> TieringResult<bool> {
        self.repository.mark_running(id).await
    }

    pub async fn mark_success(&self, id: i64, result: Option<&Value>) -> TieringResult<bool> {
        let updated = self.repository.mark_succeeded(id, result).await?;
        if updated {
            metrics::counter!("tiering_generation_tasks_total", "outcome" => "succeeded")
                .increment(1);
        } else {
            warn!("Task {} was not held when it completed", id);
        }
        Ok(updated)
    }

    /// Counts the failed attempt and either schedules the next one or moves
    /// the task to the dead-letter state once the count exceeds
    /// `max_attempts`.
    #[instrument(skip(self, error))]
    pub async fn mark_failed_with_backoff(
        &self,
        id: i64,
        error: &str,
    ) -> TieringResult<FailureDisposition> {
        let task = self
            .repository
            .get(id)
            .await?
            .ok_or(TieringError::TaskNotFound { id })?;
        let disposition = self.disposition_for(task.attempts + 1, Utc::now());

        let transition = match disposition {
            FailureDisposition::Rescheduled {
                attempts,
                next_eligible_at,
            } => FailureTransition::Retry {
                attempts,
                next_eligible_at,
            },
            FailureDisposition::DeadLettered { attempts } => {
                FailureTransition::DeadLetter { attempts }
            }
        };

        if !self.repository.record_failure(id, error, transition).await? {
            return Err(TieringError::Internal(format!(
                "任务 {id} 当前状态 {} 不允许记录失败",
                task.status
            )));
        }

        let outcome = if disposition.is_dead_lettered() {
            warn!(
                "{}",
                TieringError::MaxAttemptsExceeded {
                    task_id: id,
                    attempts: disposition.attempts()
                }
            );
            "dead_lettered"
        } else {
            "rescheduled"
        };
        metrics::counter!("tiering_generation_tasks_total", "outcome" => outcome).increment(1);
        Ok(disposition)
    }

    /// Pure part of the failure path.
    pub fn disposition_for(&self, attempts: i32, now: DateTime<Utc>) -> FailureDisposition {
        if attempts > self.max_attempts {
            return FailureDisposition::DeadLettered { attempts };
        }
        let delay = self.backoff.jittered(self.backoff.next_delay(attempts));
        let delay = ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::zero());
        FailureDisposition::Rescheduled {
            attempts,
            next_eligible_at: now + delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tiering_testing_utils::InMemoryGenerationTaskRepository;

    fn queue(max_attempts: i32) -> GenerationTaskQueue {
        GenerationTaskQueue::new(
            Arc::new(InMemoryGenerationTaskRepository::new()),
            BackoffPolicy::new(Duration::from_secs(5), Duration::from_secs(60), 0.0),
            max_attempts,
        )
    }

    #[test]
    fn reschedules_until_budget_is_exceeded() {
        let queue = queue(3);
        let now = Utc::now();
        for attempts in 1..=3 {
            match queue.disposition_for(attempts, now) {
                FailureDisposition::Rescheduled {
                    next_eligible_at, ..
                } => {
                    let expected = queue.backoff().next_delay(attempts);
                    assert_eq!(
                        next_eligible_at - now,
                        ChronoDuration::from_std(expected).unwrap()
                    );
                }
                other => panic!("attempt {attempts} should retry, got {other:?}"),
            }
        }
        assert_eq!(
            queue.disposition_for(4, now),
            FailureDisposition::DeadLettered { attempts: 4 }
        );
    }

    #[test]
    fn zero_budget_dead_letters_first_failure() {
        assert!(queue(0).disposition_for(1, Utc::now()).is_dead_lettered());
    }

    #[tokio::test]
    async fn rejects_blank_task_type() {
        let err = queue(3).enqueue(None, "  ", Value::Null).await.unwrap_err();
        assert!(matches!(err, TieringError::InvalidPayload(_)));
    }
}
