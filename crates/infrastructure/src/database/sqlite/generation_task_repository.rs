use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use tracing::{debug, instrument};

use tiering_core::TieringResult;
use tiering_domain::entities::{
    FailureTransition, GenerationTask, GenerationTaskStatus, NewGenerationTask,
};
use tiering_domain::repositories::GenerationTaskRepository;

use crate::database::mapping::MappingHelpers;

const SELECT_COLUMNS: &str = "id, owner_id, task_type, payload, status, attempts, last_error, \
     result, next_eligible_at_ms, created_at_ms, updated_at_ms";

fn row_to_task(row: &SqliteRow) -> TieringResult<GenerationTask> {
    Ok(GenerationTask {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        task_type: row.try_get("task_type")?,
        payload: MappingHelpers::json(row, "payload")?,
        status: row.try_get("status")?,
        attempts: row.try_get("attempts")?,
        last_error: row.try_get("last_error")?,
        result: MappingHelpers::optional_json(row, "result")?,
        next_eligible_at: MappingHelpers::timestamp(row, "next_eligible_at_ms")?,
        created_at: MappingHelpers::timestamp(row, "created_at_ms")?,
        updated_at: MappingHelpers::timestamp(row, "updated_at_ms")?,
    })
}

/// Claim is a conditional UPDATE; the row count tells the caller whether it
/// won. No other locking is involved.
pub struct SqliteGenerationTaskRepository {
    pool: SqlitePool,
}

impl SqliteGenerationTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GenerationTaskRepository for SqliteGenerationTaskRepository {
    #[instrument(skip(self, task), fields(task_type = %task.task_type))]
    async fn insert(&self, task: &NewGenerationTask, now: DateTime<Utc>) -> TieringResult<i64> {
        let now_ms = MappingHelpers::to_millis(now);
        let result = sqlx::query(
            r#"
            INSERT INTO generation_tasks
                (owner_id, task_type, payload, status, attempts, next_eligible_at_ms, created_at_ms, updated_at_ms)
            VALUES (?, ?, ?, ?, 0, ?, ?, ?)
            "#,
        )
        .bind(&task.owner_id)
        .bind(&task.task_type)
        .bind(serde_json::to_string(&task.payload)?)
        .bind(GenerationTaskStatus::Queued)
        .bind(now_ms)
        .bind(now_ms)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    #[instrument(skip(self))]
    async fn get(&self, id: i64) -> TieringResult<Option<GenerationTask>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM generation_tasks WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_task).transpose()
    }

    #[instrument(skip(self))]
    async fn claim(&self, id: i64, now: DateTime<Utc>) -> TieringResult<bool> {
        let now_ms = MappingHelpers::to_millis(now);
        let result = sqlx::query(
            r#"
            UPDATE generation_tasks
            SET status = ?, updated_at_ms = ?
            WHERE id = ? AND status IN (?, ?) AND next_eligible_at_ms <= ?
            "#,
        )
        .bind(GenerationTaskStatus::Claimed)
        .bind(now_ms)
        .bind(id)
        .bind(GenerationTaskStatus::Queued)
        .bind(GenerationTaskStatus::Failed)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;

        let claimed = result.rows_affected() == 1;
        debug!("Claim of task {} -> {}", id, claimed);
        Ok(claimed)
    }

    #[instrument(skip(self))]
    async fn mark_running(&self, id: i64) -> TieringResult<bool> {
        let result = sqlx::query(
            "UPDATE generation_tasks SET status = ?, updated_at_ms = ? WHERE id = ? AND status = ?",
        )
        .bind(GenerationTaskStatus::Running)
        .bind(MappingHelpers::to_millis(Utc::now()))
        .bind(id)
        .bind(GenerationTaskStatus::Claimed)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, result))]
    async fn mark_succeeded(
        &self,
        id: i64,
        result: Option<&serde_json::Value>,
    ) -> TieringResult<bool> {
        let result_text = result.map(serde_json::to_string).transpose()?;
        let outcome = sqlx::query(
            r#"
            UPDATE generation_tasks
            SET status = ?, result = ?, last_error = NULL, updated_at_ms = ?
            WHERE id = ? AND status IN (?, ?)
            "#,
        )
        .bind(GenerationTaskStatus::Succeeded)
        .bind(result_text)
        .bind(MappingHelpers::to_millis(Utc::now()))
        .bind(id)
        .bind(GenerationTaskStatus::Claimed)
        .bind(GenerationTaskStatus::Running)
        .execute(&self.pool)
        .await?;
        Ok(outcome.rows_affected() == 1)
    }

    #[instrument(skip(self, error))]
    async fn record_failure(
        &self,
        id: i64,
        error: &str,
        transition: FailureTransition,
    ) -> TieringResult<bool> {
        let now_ms = MappingHelpers::to_millis(Utc::now());
        let (status, next_eligible_ms) = match transition {
            FailureTransition::Retry {
                next_eligible_at, ..
            } => (
                GenerationTaskStatus::Failed,
                Some(MappingHelpers::to_millis(next_eligible_at)),
            ),
            FailureTransition::DeadLetter { .. } => (GenerationTaskStatus::DeadLetter, None),
        };

        // 死信任务保留原有的 next_eligible_at_ms，之后不再参考
        let result = sqlx::query(
            r#"
            UPDATE generation_tasks
            SET status = ?,
                attempts = ?,
                last_error = ?,
                next_eligible_at_ms = COALESCE(?, next_eligible_at_ms),
                updated_at_ms = ?
            WHERE id = ? AND status IN (?, ?, ?)
            "#,
        )
        .bind(status)
        .bind(transition.attempts())
        .bind(error)
        .bind(next_eligible_ms)
        .bind(now_ms)
        .bind(id)
        .bind(GenerationTaskStatus::Queued)
        .bind(GenerationTaskStatus::Claimed)
        .bind(GenerationTaskStatus::Running)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn fetch_eligible(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> TieringResult<Vec<GenerationTask>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM generation_tasks \
             WHERE status IN (?, ?) AND next_eligible_at_ms <= ? \
             ORDER BY next_eligible_at_ms ASC, id ASC LIMIT ?"
        );
        let rows = sqlx::query(&sql)
            .bind(GenerationTaskStatus::Queued)
            .bind(GenerationTaskStatus::Failed)
            .bind(MappingHelpers::to_millis(now))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_task).collect()
    }

    async fn count_by_status(&self) -> TieringResult<HashMap<GenerationTaskStatus, i64>> {
        let rows =
            sqlx::query("SELECT status, COUNT(*) AS total FROM generation_tasks GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        let mut counts = HashMap::new();
        for row in rows {
            counts.insert(row.try_get("status")?, row.try_get("total")?);
        }
        Ok(counts)
    }
}
