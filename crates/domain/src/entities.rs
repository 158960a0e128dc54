use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::value_objects::{Backend, SyncDirection, SyncStrategyKind, SyncTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AvailabilityStatus {
    Available,
    /// Confirmed absent or explicitly disabled.
    Unavailable,
    ConfigMissing,
    /// Probe attempted and failed, including timeouts.
    ConnectionFailed,
}

/// Why a probe ended in `ConnectionFailed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClassification {
    Timeout,
    PoolerIncompatible,
    Authentication,
    Connection,
    InvalidCredentials,
    BucketNotFound,
    AccessDenied,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityResult {
    pub backend: Backend,
    pub status: AvailabilityStatus,
    pub message: String,
    pub latency: Option<Duration>,
    pub error: Option<String>,
    pub classification: Option<FailureClassification>,
    pub observed_at: DateTime<Utc>,
}

impl AvailabilityResult {
    fn new(backend: Backend, status: AvailabilityStatus, message: impl Into<String>) -> Self {
        Self {
            backend,
            status,
            message: message.into(),
            latency: None,
            error: None,
            classification: None,
            observed_at: Utc::now(),
        }
    }

    pub fn available(backend: Backend, latency: Duration) -> Self {
        let mut result = Self::new(
            backend,
            AvailabilityStatus::Available,
            format!("{backend} reachable"),
        );
        result.latency = Some(latency);
        result
    }

    pub fn unavailable(backend: Backend, message: impl Into<String>) -> Self {
        Self::new(backend, AvailabilityStatus::Unavailable, message)
    }

    pub fn config_missing(backend: Backend, message: impl Into<String>) -> Self {
        Self::new(backend, AvailabilityStatus::ConfigMissing, message)
    }

    pub fn connection_failed(
        backend: Backend,
        classification: FailureClassification,
        error: impl Into<String>,
        latency: Duration,
    ) -> Self {
        let error = error.into();
        let mut result = Self::new(
            backend,
            AvailabilityStatus::ConnectionFailed,
            format!("{backend} probe failed ({classification:?}): {error}"),
        );
        result.latency = Some(latency);
        result.error = Some(error);
        result.classification = Some(classification);
        result
    }

    pub fn is_available(&self) -> bool {
        self.status == AvailabilityStatus::Available
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.observed_at).to_std().unwrap_or_default()
    }
}

/// Per entity-type synchronisation rule derived from the active mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncDirective {
    pub entity_type: String,
    pub enabled: bool,
    pub directions: Vec<SyncDirection>,
    pub interval: Duration,
    pub batch_size: u32,
    pub strategy: SyncStrategyKind,
    pub startup_sync: bool,
    pub cost_optimized: bool,
    pub sync_on_change: bool,
    pub target: SyncTarget,
    /// Periodic copy to the store that is not `target`.
    pub backup_interval: Option<Duration>,
}

impl SyncDirective {
    pub fn disabled(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            enabled: false,
            directions: Vec::new(),
            interval: Duration::ZERO,
            batch_size: 0,
            strategy: SyncStrategyKind::Disabled,
            startup_sync: false,
            cost_optimized: false,
            sync_on_change: false,
            target: SyncTarget::ExternalStore,
            backup_interval: None,
        }
    }

    pub fn is_bidirectional(&self) -> bool {
        self.directions.contains(&SyncDirection::ToExternal)
            && self.directions.contains(&SyncDirection::FromExternal)
    }

    /// Interval at which local changes reach the relational store, if they do.
    pub fn external_store_interval(&self) -> Option<Duration> {
        if !self.enabled || !self.directions.contains(&SyncDirection::ToExternal) {
            return None;
        }
        match self.target {
            SyncTarget::ExternalStore => Some(self.interval),
            SyncTarget::ObjectStore => self.backup_interval,
        }
    }

    pub fn replicates_to_external_store(&self) -> bool {
        self.external_store_interval().is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Sent,
    /// Retry budget exhausted.
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Sent => "sent",
            OutboxStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OutboxStatus::Pending),
            "sent" => Some(OutboxStatus::Sent),
            "failed" => Some(OutboxStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Replication intent recorded next to a business write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: i64,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl OutboxEntry {
    /// Key used to keep per-entity ordering during a drain.
    pub fn ordering_key(&self) -> String {
        match &self.entity_id {
            Some(id) => format!("{}:{}", self.entity_type, id),
            None => format!("{}:#{}", self.entity_type, self.id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOutboxEntry {
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationTaskStatus {
    Queued,
    Claimed,
    Running,
    Succeeded,
    /// Failed attempt waiting for `next_eligible_at`.
    Failed,
    DeadLetter,
}

impl GenerationTaskStatus {
    pub const ALL: [GenerationTaskStatus; 6] = [
        GenerationTaskStatus::Queued,
        GenerationTaskStatus::Claimed,
        GenerationTaskStatus::Running,
        GenerationTaskStatus::Succeeded,
        GenerationTaskStatus::Failed,
        GenerationTaskStatus::DeadLetter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationTaskStatus::Queued => "queued",
            GenerationTaskStatus::Claimed => "claimed",
            GenerationTaskStatus::Running => "running",
            GenerationTaskStatus::Succeeded => "succeeded",
            GenerationTaskStatus::Failed => "failed",
            GenerationTaskStatus::DeadLetter => "dead_letter",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GenerationTaskStatus::Succeeded | GenerationTaskStatus::DeadLetter
        )
    }

    /// States a worker may claim from.
    pub fn is_claimable(&self) -> bool {
        matches!(
            self,
            GenerationTaskStatus::Queued | GenerationTaskStatus::Failed
        )
    }

    /// States in which a worker holds the task.
    pub fn is_held(&self) -> bool {
        matches!(
            self,
            GenerationTaskStatus::Claimed | GenerationTaskStatus::Running
        )
    }
}

impl fmt::Display for GenerationTaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationTask {
    pub id: i64,
    pub owner_id: Option<String>,
    pub task_type: String,
    pub payload: serde_json::Value,
    pub status: GenerationTaskStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub result: Option<serde_json::Value>,
    pub next_eligible_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GenerationTask {
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable() && self.next_eligible_at <= now
    }

    pub fn entity_description(&self) -> String {
        format!(
            "生成任务 (ID: {}, 类型: {}, 状态: {})",
            self.id, self.task_type, self.status
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewGenerationTask {
    pub owner_id: Option<String>,
    pub task_type: String,
    pub payload: serde_json::Value,
}

impl NewGenerationTask {
    pub fn new(task_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            owner_id: None,
            task_type: task_type.into(),
            payload,
        }
    }

    pub fn owned_by(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }
}

/// How a failed attempt is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureTransition {
    Retry {
        attempts: i32,
        next_eligible_at: DateTime<Utc>,
    },
    DeadLetter {
        attempts: i32,
    },
}

impl FailureTransition {
    pub fn attempts(&self) -> i32 {
        match self {
            FailureTransition::Retry { attempts, .. } | FailureTransition::DeadLetter { attempts } => {
                *attempts
            }
        }
    }
}

/// The four values needed to talk to an S3-compatible bucket.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStoreCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint: String,
    pub bucket: String,
    pub region: String,
}

impl ObjectStoreCredentials {
    /// `None` unless every credential is present and non-blank.
    pub fn from_config(config: &tiering_core::config::ObjectStoreConfig) -> Option<Self> {
        if !config.has_all_credentials() {
            return None;
        }
        Some(Self {
            access_key_id: config.access_key_id.clone()?.trim().to_string(),
            secret_access_key: config.secret_access_key.clone()?.trim().to_string(),
            endpoint: config.endpoint.clone()?.trim().trim_end_matches('/').to_string(),
            bucket: config.bucket.clone()?.trim().to_string(),
            region: config.region.clone(),
        })
    }
}

impl fmt::Debug for ObjectStoreCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .finish()
    }
}
