//! In-memory doubles for the repository and collaborator traits.
//!
//! Each double records what it was asked to do so tests can assert on the
//! interaction, and most can be scripted to fail.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use tiering_core::{TieringError, TieringResult};
use tiering_domain::entities::{
    FailureTransition, GenerationTask, GenerationTaskStatus, NewGenerationTask, NewOutboxEntry,
    ObjectStoreCredentials, OutboxEntry, OutboxStatus,
};
use tiering_domain::events::ModeChangedEvent;
use tiering_domain::ports::{
    ConnectMode, ExternalStoreConnector, IdentityBootstrap, MigrationRoutine, ModeChangeListener,
    ObjectStoreClient, ObjectStoreClientFactory, ObjectStoreError, PostSwitchHook, ProbeError,
    ReplicationSink, TaskExecutor,
};
use tiering_domain::repositories::{GenerationTaskRepository, OutboxRepository, SettingsStore};
use tiering_domain::switching::{ModeSwitchContext, PostSwitchAction};
use tiering_domain::value_objects::{DeploymentMode, TransitionKey};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct InMemorySettingsStore {
    values: Mutex<HashMap<String, String>>,
    healthy: AtomicBool,
    fail_writes: AtomicBool,
}

impl InMemorySettingsStore {
    pub fn new() -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
            healthy: AtomicBool::new(true),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn with_value(self, key: &str, value: &str) -> Self {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.values.lock().unwrap().get(key).cloned()
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl Default for InMemorySettingsStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    async fn get(&self, key: &str) -> TieringResult<Option<String>> {
        Ok(self.value(key))
    }

    async fn set(&self, key: &str, value: &str) -> TieringResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TieringError::Internal("settings store is read-only".into()));
        }
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn health_check(&self) -> TieringResult<bool> {
        Ok(self.healthy.load(Ordering::SeqCst))
    }
}

// ---------------------------------------------------------------------------
// Outbox
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryOutboxRepository {
    entries: Mutex<BTreeMap<i64, OutboxEntry>>,
}

impl InMemoryOutboxRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// All rows in id order.
    pub fn entries(&self) -> Vec<OutboxEntry> {
        self.entries.lock().unwrap().values().cloned().collect()
    }

    pub fn entry(&self, id: i64) -> Option<OutboxEntry> {
        self.entries.lock().unwrap().get(&id).cloned()
    }

    /// Rewrites a row's timestamps, for retention tests.
    pub fn backdate(&self, id: i64, at: DateTime<Utc>) {
        if let Some(entry) = self.entries.lock().unwrap().get_mut(&id) {
            entry.enqueued_at = at;
            entry.updated_at = at;
            if entry.sent_at.is_some() {
                entry.sent_at = Some(at);
            }
        }
    }
}

#[async_trait]
impl OutboxRepository for InMemoryOutboxRepository {
    async fn insert(&self, entry: &NewOutboxEntry) -> TieringResult<i64> {
        let mut entries = self.entries.lock().unwrap();
        let id = entries.keys().next_back().copied().unwrap_or(0) + 1;
        let now = Utc::now();
        entries.insert(
            id,
            OutboxEntry {
                id,
                event_type: entry.event_type.clone(),
                entity_type: entry.entity_type.clone(),
                entity_id: entry.entity_id.clone(),
                payload: entry.payload.clone(),
                status: OutboxStatus::Pending,
                attempts: 0,
                last_error: None,
                enqueued_at: now,
                updated_at: now,
                sent_at: None,
            },
        );
        Ok(id)
    }

    async fn fetch_pending_after(
        &self,
        after_id: i64,
        limit: u32,
    ) -> TieringResult<Vec<OutboxEntry>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .range(after_id + 1..)
            .map(|(_, entry)| entry)
            .filter(|e| e.status == OutboxStatus::Pending)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn mark_sent(&self, id: i64) -> TieringResult<()> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .get_mut(&id)
            .ok_or_else(|| TieringError::Internal(format!("outbox entry {id} not found")))?;
        let now = Utc::now();
        entry.status = OutboxStatus::Sent;
        entry.sent_at = Some(now);
        entry.updated_at = now;
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: i64,
        error: &str,
        max_attempts: i32,
    ) -> TieringResult<OutboxStatus> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .get_mut(&id)
            .ok_or_else(|| TieringError::Internal(format!("outbox entry {id} not found")))?;
        entry.attempts += 1;
        entry.last_error = Some(error.to_string());
        entry.updated_at = Utc::now();
        if entry.attempts >= max_attempts {
            entry.status = OutboxStatus::Failed;
        }
        Ok(entry.status)
    }

    async fn purge_sent(&self, before: DateTime<Utc>) -> TieringResult<u64> {
        let mut entries = self.entries.lock().unwrap();
        let doomed: Vec<i64> = entries
            .values()
            .filter(|e| e.status == OutboxStatus::Sent && e.sent_at.is_some_and(|at| at < before))
            .map(|e| e.id)
            .collect();
        for id in &doomed {
            entries.remove(id);
        }
        Ok(doomed.len() as u64)
    }

    async fn count_by_status(&self) -> TieringResult<HashMap<OutboxStatus, i64>> {
        let mut counts = HashMap::new();
        for entry in self.entries.lock().unwrap().values() {
            *counts.entry(entry.status).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

// ---------------------------------------------------------------------------
// Generation tasks
// ---------------------------------------------------------------------------

/// Same conditional-update semantics as the SQLite repository, with the
/// mutex standing in for row-level atomicity.
#[derive(Debug, Default)]
pub struct InMemoryGenerationTaskRepository {
    tasks: Mutex<BTreeMap<i64, GenerationTask>>,
    claim_attempts: AtomicUsize,
    fail_claims: AtomicBool,
}

impl InMemoryGenerationTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task(&self, id: i64) -> Option<GenerationTask> {
        self.tasks.lock().unwrap().get(&id).cloned()
    }

    pub fn tasks(&self) -> Vec<GenerationTask> {
        self.tasks.lock().unwrap().values().cloned().collect()
    }

    pub fn claim_attempts(&self) -> usize {
        self.claim_attempts.load(Ordering::SeqCst)
    }

    /// Makes every following `claim` return a storage error.
    pub fn fail_claims(&self, fail: bool) {
        self.fail_claims.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl GenerationTaskRepository for InMemoryGenerationTaskRepository {
    async fn insert(&self, task: &NewGenerationTask, now: DateTime<Utc>) -> TieringResult<i64> {
        let mut tasks = self.tasks.lock().unwrap();
        let id = tasks.keys().next_back().copied().unwrap_or(0) + 1;
        tasks.insert(
            id,
            GenerationTask {
                id,
                owner_id: task.owner_id.clone(),
                task_type: task.task_type.clone(),
                payload: task.payload.clone(),
                status: GenerationTaskStatus::Queued,
                attempts: 0,
                last_error: None,
                result: None,
                next_eligible_at: now,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn get(&self, id: i64) -> TieringResult<Option<GenerationTask>> {
        Ok(self.task(id))
    }

    async fn claim(&self, id: i64, now: DateTime<Utc>) -> TieringResult<bool> {
        self.claim_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_claims.load(Ordering::SeqCst) {
            return Err(TieringError::Internal("database is locked".to_string()));
        }
        let mut tasks = self.tasks.lock().unwrap();
        match tasks.get_mut(&id) {
            Some(task) if task.status.is_claimable() && task.next_eligible_at <= now => {
                task.status = GenerationTaskStatus::Claimed;
                task.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_running(&self, id: i64) -> TieringResult<bool> {
        let mut tasks = self.tasks.lock().unwrap();
        match tasks.get_mut(&id) {
            Some(task) if task.status == GenerationTaskStatus::Claimed => {
                task.status = GenerationTaskStatus::Running;
                task.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_succeeded(&self, id: i64, result: Option<&Value>) -> TieringResult<bool> {
        let mut tasks = self.tasks.lock().unwrap();
        match tasks.get_mut(&id) {
            Some(task)
                if matches!(
                    task.status,
                    GenerationTaskStatus::Claimed | GenerationTaskStatus::Running
                ) =>
            {
                task.status = GenerationTaskStatus::Succeeded;
                task.result = result.cloned();
                task.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_failure(
        &self,
        id: i64,
        error: &str,
        transition: FailureTransition,
    ) -> TieringResult<bool> {
        let mut tasks = self.tasks.lock().unwrap();
        let Some(task) = tasks.get_mut(&id) else {
            return Ok(false);
        };
        if task.status.is_terminal() || task.status == GenerationTaskStatus::Failed {
            return Ok(false);
        }
        task.attempts = transition.attempts();
        task.last_error = Some(error.to_string());
        task.updated_at = Utc::now();
        match transition {
            FailureTransition::Retry {
                next_eligible_at, ..
            } => {
                task.status = GenerationTaskStatus::Failed;
                task.next_eligible_at = next_eligible_at;
            }
            FailureTransition::DeadLetter { .. } => {
                task.status = GenerationTaskStatus::DeadLetter;
            }
        }
        Ok(true)
    }

    async fn fetch_eligible(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> TieringResult<Vec<GenerationTask>> {
        let mut eligible: Vec<GenerationTask> = self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.is_eligible(now))
            .cloned()
            .collect();
        eligible.sort_by_key(|t| (t.next_eligible_at, t.id));
        eligible.truncate(limit as usize);
        Ok(eligible)
    }

    async fn count_by_status(&self) -> TieringResult<HashMap<GenerationTaskStatus, i64>> {
        let mut counts = HashMap::new();
        for task in self.tasks.lock().unwrap().values() {
            *counts.entry(task.status).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

// ---------------------------------------------------------------------------
// Probe doubles
// ---------------------------------------------------------------------------

/// External-store connector with a fixed answer per connect mode.
#[derive(Debug)]
pub struct ScriptedConnector {
    pooled: Mutex<Result<(), ProbeError>>,
    plain: Mutex<Result<(), ProbeError>>,
    delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<(String, ConnectMode)>>,
}

impl ScriptedConnector {
    pub fn new(pooled: Result<(), ProbeError>, plain: Result<(), ProbeError>) -> Self {
        Self {
            pooled: Mutex::new(pooled),
            plain: Mutex::new(plain),
            delay: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn reachable() -> Self {
        Self::new(Ok(()), Ok(()))
    }

    pub fn unreachable() -> Self {
        let refused = ProbeError::Connection("connection refused".into());
        Self::new(Err(refused.clone()), Err(refused))
    }

    /// Pooled attempts hit a pooler that rejects prepared statements.
    pub fn behind_pooler(plain: Result<(), ProbeError>) -> Self {
        Self::new(
            Err(ProbeError::PoolerIncompatible(
                "prepared statement \"sqlx_s_1\" already exists".into(),
            )),
            plain,
        )
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn set_results(&self, pooled: Result<(), ProbeError>, plain: Result<(), ProbeError>) {
        *self.pooled.lock().unwrap() = pooled;
        *self.plain.lock().unwrap() = plain;
    }

    pub fn calls(&self) -> Vec<(String, ConnectMode)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn modes(&self) -> Vec<ConnectMode> {
        self.calls().into_iter().map(|(_, mode)| mode).collect()
    }
}

#[async_trait]
impl ExternalStoreConnector for ScriptedConnector {
    async fn ping(&self, url: &str, mode: ConnectMode) -> Result<(), ProbeError> {
        self.calls.lock().unwrap().push((url.to_string(), mode));
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match mode {
            ConnectMode::Pooled => self.pooled.lock().unwrap().clone(),
            ConnectMode::Plain => self.plain.lock().unwrap().clone(),
        }
    }
}

struct MockObjectStoreClient {
    result: Result<Vec<String>, ObjectStoreError>,
    delay: Option<Duration>,
    listed: Arc<Mutex<Vec<(String, u32)>>>,
}

#[async_trait]
impl ObjectStoreClient for MockObjectStoreClient {
    async fn list_objects(
        &self,
        bucket: &str,
        max_keys: u32,
    ) -> Result<Vec<String>, ObjectStoreError> {
        self.listed
            .lock()
            .unwrap()
            .push((bucket.to_string(), max_keys));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.result.clone()
    }
}

/// Hands out clients that answer every list with the scripted result.
pub struct MockObjectStoreFactory {
    result: Mutex<Result<Vec<String>, ObjectStoreError>>,
    delay: Mutex<Option<Duration>>,
    created: AtomicUsize,
    listed: Arc<Mutex<Vec<(String, u32)>>>,
}

impl MockObjectStoreFactory {
    pub fn new(result: Result<Vec<String>, ObjectStoreError>) -> Self {
        Self {
            result: Mutex::new(result),
            delay: Mutex::new(None),
            created: AtomicUsize::new(0),
            listed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn healthy() -> Self {
        Self::new(Ok(vec!["probe.txt".to_string()]))
    }

    pub fn failing(error: ObjectStoreError) -> Self {
        Self::new(Err(error))
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn set_result(&self, result: Result<Vec<String>, ObjectStoreError>) {
        *self.result.lock().unwrap() = result;
    }

    pub fn clients_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// `(bucket, max_keys)` for every list call.
    pub fn list_calls(&self) -> Vec<(String, u32)> {
        self.listed.lock().unwrap().clone()
    }
}

impl ObjectStoreClientFactory for MockObjectStoreFactory {
    fn create(
        &self,
        _credentials: &ObjectStoreCredentials,
    ) -> Result<Arc<dyn ObjectStoreClient>, ObjectStoreError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockObjectStoreClient {
            result: self.result.lock().unwrap().clone(),
            delay: *self.delay.lock().unwrap(),
            listed: Arc::clone(&self.listed),
        }))
    }
}

// ---------------------------------------------------------------------------
// Replication
// ---------------------------------------------------------------------------

/// Upserts entries by replication key, like the real sink, and keeps a log
/// of every delivery.
#[derive(Debug, Default)]
pub struct RecordingSink {
    state: Mutex<HashMap<String, Value>>,
    deliveries: Mutex<Vec<i64>>,
    failing_entities: Mutex<HashSet<String>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, entity_id: &str) {
        self.failing_entities
            .lock()
            .unwrap()
            .insert(entity_id.to_string());
    }

    pub fn recover(&self, entity_id: &str) {
        self.failing_entities.lock().unwrap().remove(entity_id);
    }

    pub fn state(&self) -> HashMap<String, Value> {
        self.state.lock().unwrap().clone()
    }

    /// Outbox ids in delivery order, including failed attempts.
    pub fn deliveries(&self) -> Vec<i64> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReplicationSink for RecordingSink {
    async fn apply(&self, entry: &OutboxEntry) -> TieringResult<()> {
        self.deliveries.lock().unwrap().push(entry.id);
        let key = entry
            .entity_id
            .clone()
            .unwrap_or_else(|| format!("outbox-{}", entry.id));
        if self.failing_entities.lock().unwrap().contains(&key) {
            return Err(TieringError::ConnectionFailed(format!(
                "external store rejected {key}"
            )));
        }
        self.state
            .lock()
            .unwrap()
            .insert(format!("{}:{}", entry.entity_type, key), entry.payload.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Mode switch collaborators
// ---------------------------------------------------------------------------

/// Migration routine that can fail on demand or park until released.
#[derive(Default)]
pub struct MockMigration {
    fail: AtomicBool,
    fail_rollback: AtomicBool,
    gated: AtomicBool,
    entered: Notify,
    release: Notify,
    migrations: Mutex<Vec<TransitionKey>>,
    rollbacks: Mutex<Vec<TransitionKey>>,
}

impl MockMigration {
    pub fn succeeding() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let migration = Self::default();
        migration.fail.store(true, Ordering::SeqCst);
        migration
    }

    /// `migrate` signals `entered` and then waits for `release`.
    pub fn gated() -> Self {
        let migration = Self::default();
        migration.gated.store(true, Ordering::SeqCst);
        migration
    }

    pub fn with_failing_rollback(self) -> Self {
        self.fail_rollback.store(true, Ordering::SeqCst);
        self
    }

    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }

    pub fn migrations(&self) -> Vec<TransitionKey> {
        self.migrations.lock().unwrap().clone()
    }

    pub fn rollbacks(&self) -> Vec<TransitionKey> {
        self.rollbacks.lock().unwrap().clone()
    }
}

#[async_trait]
impl MigrationRoutine for MockMigration {
    async fn migrate(&self, ctx: &ModeSwitchContext) -> TieringResult<()> {
        self.migrations.lock().unwrap().push(ctx.key());
        if self.gated.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(TieringError::Internal("copy step failed".into()));
        }
        Ok(())
    }

    async fn rollback(&self, ctx: &ModeSwitchContext) -> TieringResult<()> {
        self.rollbacks.lock().unwrap().push(ctx.key());
        if self.fail_rollback.load(Ordering::SeqCst) {
            return Err(TieringError::Internal("rollback failed".into()));
        }
        Ok(())
    }
}

/// Creates the admin once per mode, like the real check-then-create.
#[derive(Debug, Default)]
pub struct CountingIdentityBootstrap {
    calls: Mutex<Vec<DeploymentMode>>,
    provisioned: Mutex<HashSet<DeploymentMode>>,
    fail: AtomicBool,
}

impl CountingIdentityBootstrap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let bootstrap = Self::default();
        bootstrap.fail.store(true, Ordering::SeqCst);
        bootstrap
    }

    pub fn calls(&self) -> Vec<DeploymentMode> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl IdentityBootstrap for CountingIdentityBootstrap {
    async fn ensure_default_admin(&self, mode: DeploymentMode) -> TieringResult<bool> {
        self.calls.lock().unwrap().push(mode);
        if self.fail.load(Ordering::SeqCst) {
            return Err(TieringError::ConnectionFailed("identity store offline".into()));
        }
        Ok(self.provisioned.lock().unwrap().insert(mode))
    }
}

/// Records events; optionally returns an error or panics on every call.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ModeChangedEvent>>,
    fail: bool,
    panic: bool,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn panicking() -> Self {
        Self {
            panic: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<ModeChangedEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ModeChangeListener for RecordingListener {
    fn name(&self) -> &str {
        "recording_listener"
    }

    fn on_mode_changed(&self, event: &ModeChangedEvent) -> TieringResult<()> {
        self.events.lock().unwrap().push(event.clone());
        if self.panic {
            panic!("listener blew up");
        }
        if self.fail {
            return Err(TieringError::Internal("listener rejected event".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingHook {
    actions: Mutex<Vec<PostSwitchAction>>,
    fail: bool,
}

impl RecordingHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn actions(&self) -> Vec<PostSwitchAction> {
        self.actions.lock().unwrap().clone()
    }
}

#[async_trait]
impl PostSwitchHook for RecordingHook {
    fn handles(&self, action: PostSwitchAction) -> bool {
        matches!(
            action,
            PostSwitchAction::RunStartupSync
                | PostSwitchAction::FlushOutbox
                | PostSwitchAction::ReleaseObjectStore
        )
    }

    async fn run(&self, action: PostSwitchAction, _ctx: &ModeSwitchContext) -> TieringResult<()> {
        self.actions.lock().unwrap().push(action);
        if self.fail {
            return Err(TieringError::PostActionFailed {
                action: action.name().to_string(),
                message: "hook failed".into(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Task execution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorBehavior {
    Succeed,
    Fail,
    Panic,
}

/// Executor that behaves the same way for every task and counts runs per
/// task id.
#[derive(Debug)]
pub struct ScriptedExecutor {
    task_type: String,
    behavior: Mutex<ExecutorBehavior>,
    delay: Option<Duration>,
    runs: Mutex<HashMap<i64, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new(task_type: &str, behavior: ExecutorBehavior) -> Self {
        Self {
            task_type: task_type.to_string(),
            behavior: Mutex::new(behavior),
            delay: None,
            runs: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_behavior(&self, behavior: ExecutorBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn runs_for(&self, task_id: i64) -> usize {
        self.runs.lock().unwrap().get(&task_id).copied().unwrap_or(0)
    }

    pub fn total_runs(&self) -> usize {
        self.runs.lock().unwrap().values().sum()
    }

    /// Highest number of concurrent executions observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskExecutor for ScriptedExecutor {
    fn task_type(&self) -> &str {
        &self.task_type
    }

    async fn execute(&self, task: &GenerationTask) -> Result<Option<Value>, String> {
        *self.runs.lock().unwrap().entry(task.id).or_insert(0) += 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let behavior = *self.behavior.lock().unwrap();
        match behavior {
            ExecutorBehavior::Succeed => Ok(Some(serde_json::json!({ "task_id": task.id }))),
            ExecutorBehavior::Fail => Err(format!("{} failed", task.entity_description())),
            ExecutorBehavior::Panic => panic!("executor panicked on task {}", task.id),
        }
    }
}
