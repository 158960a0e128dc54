//! 发件箱排空
//!
//! Delivers pending outbox rows to the external store according to the
//! active sync policy.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use tiering_core::config::OutboxConfig;
use tiering_core::TieringResult;
use tiering_domain::entities::{OutboxEntry, OutboxStatus};
use tiering_domain::ports::{PostSwitchHook, ReplicationSink};
use tiering_domain::repositories::OutboxRepository;
use tiering_domain::switching::{ModeSwitchContext, PostSwitchAction};
use tiering_modes::PolicyTable;

#[derive(Debug, Clone)]
pub struct DrainerSettings {
    pub batch_size: u32,
    pub max_attempts: i32,
    pub tick: Duration,
    pub retention: Duration,
}

impl DrainerSettings {
    pub fn from_config(config: &OutboxConfig) -> Self {
        Self {
            batch_size: config.drain_batch_size,
            max_attempts: config.max_attempts,
            tick: Duration::from_secs(config.default_drain_interval_seconds),
            retention: Duration::from_secs(config.retention_hours * 3600),
        }
    }
}

impl Default for DrainerSettings {
    fn default() -> Self {
        Self::from_config(&OutboxConfig::default())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub sent: usize,
    pub failed: usize,
    /// Held back because an earlier entry of the same entity failed.
    pub deferred: usize,
    /// Entity type does not replicate to the external store in this mode.
    pub skipped: usize,
    /// Entity type's sync interval has not elapsed yet.
    pub not_due: usize,
    pub dead: usize,
    pub purged: u64,
}

pub struct OutboxDrainer {
    repository: Arc<dyn OutboxRepository>,
    sink: Arc<dyn ReplicationSink>,
    policy: Arc<PolicyTable>,
    settings: DrainerSettings,
    last_drained: Mutex<HashMap<String, Instant>>,
}

impl OutboxDrainer {
    pub fn new(
        repository: Arc<dyn OutboxRepository>,
        sink: Arc<dyn ReplicationSink>,
        policy: Arc<PolicyTable>,
        settings: DrainerSettings,
    ) -> Self {
        Self {
            repository,
            sink,
            policy,
            settings,
            last_drained: Mutex::new(HashMap::new()),
        }
    }

    /// One pass honouring each entity type's sync interval.
    pub async fn drain_once(&self) -> TieringResult<DrainReport> {
        self.drain(true).await
    }

    /// One pass ignoring sync intervals; still skips entity types the policy
    /// does not replicate.
    pub async fn flush(&self) -> TieringResult<DrainReport> {
        self.drain(false).await
    }

    fn is_due(&self, entity_type: &str, interval: Duration, now: Instant) -> bool {
        self.last_drained
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(entity_type)
            .map_or(true, |last| now.duration_since(*last) >= interval)
    }

    /// Whether rows of `entity_type` may be delivered in this pass; `None`
    /// when the type does not replicate to the external store at all.
    fn delivery_decision(
        &self,
        entity_type: &str,
        respect_intervals: bool,
        now: Instant,
    ) -> Option<bool> {
        match self.policy.strategy_for(entity_type).external_store_interval() {
            None => None,
            Some(_) if !respect_intervals => Some(true),
            Some(interval) => Some(self.is_due(entity_type, interval, now)),
        }
    }

    /// Pages through pending rows until `batch_size` deliverable rows were
    /// handled or nothing is left, so rows that are skipped or not due never
    /// hide later rows of other entity types.
    #[instrument(skip(self))]
    async fn drain(&self, respect_intervals: bool) -> TieringResult<DrainReport> {
        let batch_size = self.settings.batch_size.max(1);
        let mut report = DrainReport::default();
        let now = Instant::now();

        // Decided once per entity type so a pass never splits a type.
        let mut due: HashMap<String, bool> = HashMap::new();
        let mut blocked: HashSet<String> = HashSet::new();
        let mut handled: u32 = 0;
        let mut cursor: i64 = 0;

        'pages: loop {
            let entries = self
                .repository
                .fetch_pending_after(cursor, batch_size)
                .await?;
            let page_len = entries.len();

            for entry in entries {
                cursor = entry.id;

                let is_due = match due.get(&entry.entity_type) {
                    Some(decision) => *decision,
                    None => {
                        match self.delivery_decision(&entry.entity_type, respect_intervals, now) {
                            Some(decision) => {
                                due.insert(entry.entity_type.clone(), decision);
                                decision
                            }
                            None => {
                                report.skipped += 1;
                                continue;
                            }
                        }
                    }
                };
                if !is_due {
                    report.not_due += 1;
                    continue;
                }

                handled += 1;
                let key = entry.ordering_key();
                if blocked.contains(&key) {
                    report.deferred += 1;
                } else if !self.deliver(&entry, &mut report).await? {
                    blocked.insert(key);
                }

                if handled >= batch_size {
                    break 'pages;
                }
            }

            if page_len < batch_size as usize {
                break;
            }
        }

        {
            let mut last = self
                .last_drained
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            for (entity_type, was_due) in due {
                if was_due {
                    last.insert(entity_type, now);
                }
            }
        }

        report.purged = self.purge().await?;
        if report.sent + report.failed > 0 {
            info!(
                "Outbox drain: {} sent, {} failed, {} deferred",
                report.sent, report.failed, report.deferred
            );
        } else {
            debug!("Outbox drain found nothing to deliver: {:?}", report);
        }
        Ok(report)
    }

    /// Returns false when the entry failed and its entity must wait.
    async fn deliver(&self, entry: &OutboxEntry, report: &mut DrainReport) -> TieringResult<bool> {
        match self.sink.apply(entry).await {
            Ok(()) => {
                self.repository.mark_sent(entry.id).await?;
                metrics::counter!("tiering_outbox_entries_total", "stage" => "sent").increment(1);
                report.sent += 1;
                Ok(true)
            }
            Err(e) => {
                let status = self
                    .repository
                    .mark_failed(entry.id, &e.to_string(), self.settings.max_attempts)
                    .await?;
                metrics::counter!("tiering_outbox_entries_total", "stage" => "failed")
                    .increment(1);
                report.failed += 1;
                if status == OutboxStatus::Failed {
                    report.dead += 1;
                    error!(
                        "Outbox entry {} ({}) gave up after {} attempts: {}",
                        entry.id,
                        entry.ordering_key(),
                        self.settings.max_attempts,
                        e
                    );
                } else {
                    warn!("Outbox entry {} delivery failed: {}", entry.id, e);
                }
                Ok(false)
            }
        }
    }

    async fn purge(&self) -> TieringResult<u64> {
        let retention = chrono::Duration::from_std(self.settings.retention)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        let purged = self.repository.purge_sent(Utc::now() - retention).await?;
        if purged > 0 {
            debug!("Purged {} delivered outbox entries", purged);
        }
        Ok(purged)
    }

    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Outbox drainer started, tick {:?}", self.settings.tick);
        let mut ticker = interval(self.settings.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.drain_once().await {
                        error!("Outbox drain failed: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Outbox drainer received shutdown signal");
                    break;
                }
            }
        }
    }
}

/// Runs an ungated drain when a switch brings the external store online.
pub struct OutboxFlushHook {
    drainer: Arc<OutboxDrainer>,
}

impl OutboxFlushHook {
    pub fn new(drainer: Arc<OutboxDrainer>) -> Self {
        Self { drainer }
    }
}

#[async_trait]
impl PostSwitchHook for OutboxFlushHook {
    fn handles(&self, action: PostSwitchAction) -> bool {
        action == PostSwitchAction::FlushOutbox
    }

    async fn run(&self, _action: PostSwitchAction, ctx: &ModeSwitchContext) -> TieringResult<()> {
        let report = self.drainer.flush().await?;
        info!(
            "Flushed outbox after switch to {}: {} sent, {} failed",
            ctx.to, report.sent, report.failed
        );
        Ok(())
    }
}
