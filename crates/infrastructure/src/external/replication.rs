use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

use tiering_core::{TieringError, TieringResult};
use tiering_domain::entities::OutboxEntry;
use tiering_domain::ports::ReplicationSink;

use crate::timeout_handler::TimeoutHandler;

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS replicated_entities (
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    payload JSONB NOT NULL,
    last_event_type TEXT NOT NULL,
    source_outbox_id BIGINT NOT NULL,
    deleted BOOLEAN NOT NULL DEFAULT FALSE,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (entity_type, entity_id)
)
"#;

/// Stable row key for an entry; entries without a payload id fall back to
/// their outbox id so redelivery still hits the same row.
pub fn replication_key(entry: &OutboxEntry) -> String {
    entry
        .entity_id
        .clone()
        .unwrap_or_else(|| format!("outbox-{}", entry.id))
}

pub fn is_delete_event(event_type: &str) -> bool {
    event_type
        .rsplit('.')
        .next()
        .is_some_and(|action| matches!(action, "deleted" | "delete" | "removed"))
}

/// Upserts outbox entries into the external Postgres store. Redelivery of the
/// same entry, or of an older one, leaves the row unchanged.
pub struct PgReplicationSink {
    url: String,
    max_connections: u32,
    pool: OnceCell<PgPool>,
    timeouts: TimeoutHandler,
}

impl PgReplicationSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 2,
            pool: OnceCell::new(),
            timeouts: TimeoutHandler::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutHandler) -> Self {
        self.timeouts = timeouts;
        self
    }

    async fn pool(&self) -> TieringResult<&PgPool> {
        self.pool
            .get_or_try_init(|| async {
                let pool = PgPoolOptions::new()
                    .max_connections(self.max_connections)
                    .acquire_timeout(Duration::from_secs(10))
                    .connect(&self.url)
                    .await
                    .map_err(|e| TieringError::ConnectionFailed(e.to_string()))?;
                sqlx::query(CREATE_TABLE).execute(&pool).await?;
                info!("Replication sink connected to external store");
                Ok::<PgPool, TieringError>(pool)
            })
            .await
    }
}

#[async_trait]
impl ReplicationSink for PgReplicationSink {
    #[instrument(skip(self, entry), fields(outbox_id = entry.id, entity_type = %entry.entity_type))]
    async fn apply(&self, entry: &OutboxEntry) -> TieringResult<()> {
        let pool = self.pool().await?;
        let entity_id = replication_key(entry);
        let deleted = is_delete_event(&entry.event_type);

        let upsert = async {
            sqlx::query(
                r#"
                INSERT INTO replicated_entities
                    (entity_type, entity_id, payload, last_event_type, source_outbox_id, deleted, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, now())
                ON CONFLICT (entity_type, entity_id) DO UPDATE SET
                    payload = EXCLUDED.payload,
                    last_event_type = EXCLUDED.last_event_type,
                    source_outbox_id = EXCLUDED.source_outbox_id,
                    deleted = EXCLUDED.deleted,
                    updated_at = now()
                WHERE replicated_entities.source_outbox_id <= EXCLUDED.source_outbox_id
                "#,
            )
            .bind(&entry.entity_type)
            .bind(&entity_id)
            .bind(&entry.payload)
            .bind(&entry.event_type)
            .bind(entry.id)
            .bind(deleted)
            .execute(pool)
            .await?;
            Ok::<(), TieringError>(())
        };

        self.timeouts
            .external_store_operation(upsert, "replicate_outbox_entry")
            .await?;
        debug!("Replicated {}:{}", entry.entity_type, entity_id);
        Ok(())
    }
}
