use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use tiering_core::{TieringError, TieringResult};
use tiering_domain::entities::NewOutboxEntry;
use tiering_domain::repositories::{OutboxRepository, UnitOfWork};

use crate::normalize::normalize_payload;

/// Entry point for business write paths that need replication.
pub struct OutboxReplicator {
    repository: Arc<dyn OutboxRepository>,
}

impl OutboxReplicator {
    pub fn new(repository: Arc<dyn OutboxRepository>) -> Self {
        Self { repository }
    }

    /// Builds the row: entity type from the `<entity>.<action>` event name,
    /// entity id from the payload's `id`, references normalised.
    pub fn prepare(event_type: &str, payload: Value) -> TieringResult<NewOutboxEntry> {
        let event_type = event_type.trim();
        if event_type.is_empty() {
            return Err(TieringError::InvalidPayload(
                "outbox event type must not be empty".to_string(),
            ));
        }

        let entity_type = event_type
            .split_once('.')
            .map(|(entity, _)| entity)
            .unwrap_or(event_type)
            .to_string();
        let entity_id = match payload.get("id") {
            Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
            Some(Value::Number(id)) => Some(id.to_string()),
            _ => None,
        };

        Ok(NewOutboxEntry {
            event_type: event_type.to_string(),
            entity_type,
            entity_id,
            payload: normalize_payload(payload),
        })
    }

    /// Inserts inside the caller's transaction; the row exists only if the
    /// caller commits.
    #[instrument(skip(self, uow, payload))]
    pub async fn enqueue_in(
        &self,
        uow: &mut dyn UnitOfWork,
        event_type: &str,
        payload: Value,
    ) -> TieringResult<i64> {
        let entry = Self::prepare(event_type, payload)?;
        let id = uow.stage_outbox(&entry).await?;
        metrics::counter!("tiering_outbox_entries_total", "stage" => "staged").increment(1);
        debug!("Staged outbox entry {} for {}", id, entry.entity_type);
        Ok(id)
    }

    /// Out-of-band insert for callers without an open transaction. The
    /// business write may already be durable when this fails.
    #[instrument(skip(self, payload))]
    pub async fn enqueue(&self, event_type: &str, payload: Value) -> TieringResult<i64> {
        let entry = Self::prepare(event_type, payload)?;
        match self.repository.insert(&entry).await {
            Ok(id) => {
                metrics::counter!("tiering_outbox_entries_total", "stage" => "enqueued")
                    .increment(1);
                debug!("Enqueued outbox entry {} for {}", id, entry.entity_type);
                Ok(id)
            }
            Err(e) => {
                warn!(
                    "Out-of-band outbox insert for {} failed, change will not replicate: {}",
                    entry.event_type, e
                );
                Err(e)
            }
        }
    }
}
