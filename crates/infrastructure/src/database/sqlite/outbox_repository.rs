use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteExecutor, SqlitePool};
use std::collections::HashMap;
use tracing::{debug, instrument};

use tiering_core::{TieringError, TieringResult};
use tiering_domain::entities::{NewOutboxEntry, OutboxEntry, OutboxStatus};
use tiering_domain::repositories::OutboxRepository;

use crate::database::mapping::MappingHelpers;

const SELECT_COLUMNS: &str = "id, event_type, entity_type, entity_id, payload, status, attempts, \
     last_error, enqueued_at_ms, updated_at_ms, sent_at_ms";

/// Inserts a pending row through any executor: the pool for out-of-band
/// writes, or an open transaction.
pub(crate) async fn insert_outbox<'e, E>(executor: E, entry: &NewOutboxEntry) -> TieringResult<i64>
where
    E: SqliteExecutor<'e>,
{
    let now = MappingHelpers::to_millis(Utc::now());
    let payload = serde_json::to_string(&entry.payload)?;
    let result = sqlx::query(
        r#"
        INSERT INTO outbox_events
            (event_type, entity_type, entity_id, payload, status, attempts, enqueued_at_ms, updated_at_ms)
        VALUES (?, ?, ?, ?, ?, 0, ?, ?)
        "#,
    )
    .bind(&entry.event_type)
    .bind(&entry.entity_type)
    .bind(&entry.entity_id)
    .bind(payload)
    .bind(OutboxStatus::Pending)
    .bind(now)
    .bind(now)
    .execute(executor)
    .await?;
    Ok(result.last_insert_rowid())
}

fn row_to_entry(row: &SqliteRow) -> TieringResult<OutboxEntry> {
    Ok(OutboxEntry {
        id: row.try_get("id")?,
        event_type: row.try_get("event_type")?,
        entity_type: row.try_get("entity_type")?,
        entity_id: row.try_get("entity_id")?,
        payload: MappingHelpers::json(row, "payload")?,
        status: row.try_get("status")?,
        attempts: row.try_get("attempts")?,
        last_error: row.try_get("last_error")?,
        enqueued_at: MappingHelpers::timestamp(row, "enqueued_at_ms")?,
        updated_at: MappingHelpers::timestamp(row, "updated_at_ms")?,
        sent_at: MappingHelpers::optional_timestamp(row, "sent_at_ms")?,
    })
}

pub struct SqliteOutboxRepository {
    pool: SqlitePool,
}

impl SqliteOutboxRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: i64) -> TieringResult<Option<OutboxEntry>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM outbox_events WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_entry).transpose()
    }
}

#[async_trait]
impl OutboxRepository for SqliteOutboxRepository {
    #[instrument(skip(self, entry), fields(event_type = %entry.event_type))]
    async fn insert(&self, entry: &NewOutboxEntry) -> TieringResult<i64> {
        let id = insert_outbox(&self.pool, entry).await?;
        debug!("Outbox entry {} inserted out of band", id);
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn fetch_pending_after(
        &self,
        after_id: i64,
        limit: u32,
    ) -> TieringResult<Vec<OutboxEntry>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM outbox_events \
             WHERE status = ? AND id > ? ORDER BY id ASC LIMIT ?"
        );
        let rows = sqlx::query(&sql)
            .bind(OutboxStatus::Pending)
            .bind(after_id)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_entry).collect()
    }

    #[instrument(skip(self))]
    async fn mark_sent(&self, id: i64) -> TieringResult<()> {
        let now = MappingHelpers::to_millis(Utc::now());
        sqlx::query(
            "UPDATE outbox_events SET status = ?, sent_at_ms = ?, updated_at_ms = ?, last_error = NULL WHERE id = ?",
        )
        .bind(OutboxStatus::Sent)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self, error))]
    async fn mark_failed(
        &self,
        id: i64,
        error: &str,
        max_attempts: i32,
    ) -> TieringResult<OutboxStatus> {
        let status = sqlx::query_scalar::<_, OutboxStatus>(
            r#"
            UPDATE outbox_events
            SET attempts = attempts + 1,
                last_error = ?,
                updated_at_ms = ?,
                status = CASE WHEN attempts + 1 >= ? THEN 'failed' ELSE 'pending' END
            WHERE id = ?
            RETURNING status
            "#,
        )
        .bind(error)
        .bind(MappingHelpers::to_millis(Utc::now()))
        .bind(max_attempts)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        status.ok_or_else(|| TieringError::Internal(format!("outbox entry {id} not found")))
    }

    #[instrument(skip(self))]
    async fn purge_sent(&self, before: DateTime<Utc>) -> TieringResult<u64> {
        let result = sqlx::query("DELETE FROM outbox_events WHERE status = ? AND sent_at_ms < ?")
            .bind(OutboxStatus::Sent)
            .bind(MappingHelpers::to_millis(before))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count_by_status(&self) -> TieringResult<HashMap<OutboxStatus, i64>> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS total FROM outbox_events GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        let mut counts = HashMap::new();
        for row in rows {
            counts.insert(row.try_get("status")?, row.try_get("total")?);
        }
        Ok(counts)
    }
}
