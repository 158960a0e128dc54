//! 部署模式管理器
//!
//! Owns the active [`DeploymentMode`]. Reads are lock-free snapshots; every
//! write goes through the single-flight switch slot.

use chrono::Utc;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use tiering_core::config::ModesConfig;
use tiering_domain::events::ModeChangedEvent;
use tiering_domain::ports::{IdentityBootstrap, MigrationRoutine, ModeChangeListener, PostSwitchHook};
use tiering_domain::repositories::SettingsStore;
use tiering_domain::switching::{
    ModeSwitchContext, PostSwitchAction, PreSwitchCheck, RejectionReason, RollbackPlan,
    SwitchOutcome, SwitchRecord,
};
use tiering_domain::value_objects::{DeploymentMode, TransitionKey};

use crate::availability::AvailabilityDetector;
use crate::graph::CompatibilityGraph;
use crate::history::SwitchHistory;
use crate::policy::PolicyTable;
use crate::strategy::{strategy_for, TransitionStrategy};

/// Settings key holding the durable pinned mode.
pub const PINNED_MODE_KEY: &str = "deployment_mode";
pub const AUTO_DETECTED_REASON: &str = "auto-detected change";
pub const OBJECT_STORE_LOST_REASON: &str = "object store unavailable";
const INITIAL_DETECTION_REASON: &str = "initial detection";

#[derive(Debug, Clone)]
pub struct ModeManagerSettings {
    pub pinned_mode: Option<DeploymentMode>,
    pub reconcile_interval: Duration,
    pub history_capacity: usize,
    /// Best-effort mirror of the active mode for child processes. In-process
    /// readers use [`ModeManager::subscribe`] or [`ModeManager::current_mode`].
    pub export_env_var: Option<String>,
}

impl ModeManagerSettings {
    pub fn from_config(config: &ModesConfig) -> Self {
        Self {
            pinned_mode: config
                .pinned_mode
                .as_deref()
                .and_then(|name| name.parse().ok()),
            reconcile_interval: Duration::from_secs(config.reconcile_interval_seconds),
            history_capacity: config.history_capacity,
            export_env_var: config.export_env_var.clone(),
        }
    }
}

impl Default for ModeManagerSettings {
    fn default() -> Self {
        Self::from_config(&ModesConfig::default())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds the single-flight slot; dropping it clears the context on every
/// exit path, panics included.
struct SwitchSlot<'a> {
    manager: &'a ModeManager,
}

impl SwitchSlot<'_> {
    fn update(&self, f: impl FnOnce(&mut ModeSwitchContext)) {
        if let Some(ctx) = lock(&self.manager.active).as_mut() {
            f(ctx);
        }
    }
}

impl Drop for SwitchSlot<'_> {
    fn drop(&mut self) {
        let mut active = lock(&self.manager.active);
        *active = None;
        self.manager.in_progress.store(false, Ordering::Release);
    }
}

pub struct ModeManager {
    settings: ModeManagerSettings,
    detector: Arc<AvailabilityDetector>,
    policy: Arc<PolicyTable>,
    settings_store: Arc<dyn SettingsStore>,
    graph: CompatibilityGraph,
    identity: Option<Arc<dyn IdentityBootstrap>>,

    current: AtomicU8,
    in_progress: AtomicBool,
    active: Mutex<Option<ModeSwitchContext>>,
    history: Mutex<SwitchHistory>,
    last_reconcile: Mutex<Option<Instant>>,
    convergence: Mutex<Option<JoinHandle<()>>>,

    migrations: RwLock<HashMap<TransitionKey, Arc<dyn MigrationRoutine>>>,
    hooks: RwLock<Vec<Arc<dyn PostSwitchHook>>>,
    listeners: RwLock<Vec<Arc<dyn ModeChangeListener>>>,
    mode_tx: watch::Sender<DeploymentMode>,
}

impl ModeManager {
    pub fn new(
        settings: ModeManagerSettings,
        detector: Arc<AvailabilityDetector>,
        policy: Arc<PolicyTable>,
        settings_store: Arc<dyn SettingsStore>,
    ) -> Self {
        let initial = DeploymentMode::LocalOnly;
        let (mode_tx, _) = watch::channel(initial);
        let history = SwitchHistory::new(settings.history_capacity);
        Self {
            settings,
            detector,
            policy,
            settings_store,
            graph: CompatibilityGraph::default(),
            identity: None,
            current: AtomicU8::new(initial.to_u8()),
            in_progress: AtomicBool::new(false),
            active: Mutex::new(None),
            history: Mutex::new(history),
            last_reconcile: Mutex::new(None),
            convergence: Mutex::new(None),
            migrations: RwLock::new(HashMap::new()),
            hooks: RwLock::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
            mode_tx,
        }
    }

    pub fn with_graph(mut self, graph: CompatibilityGraph) -> Self {
        self.graph = graph;
        self
    }

    pub fn with_identity_bootstrap(mut self, identity: Arc<dyn IdentityBootstrap>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn register_migration(
        &self,
        from: DeploymentMode,
        to: DeploymentMode,
        routine: Arc<dyn MigrationRoutine>,
    ) {
        self.migrations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(TransitionKey::new(from, to), routine);
    }

    pub fn add_post_switch_hook(&self, hook: Arc<dyn PostSwitchHook>) {
        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hook);
    }

    pub fn add_listener(&self, listener: Arc<dyn ModeChangeListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    // ---- 查询接口 ----

    pub fn current_mode(&self) -> DeploymentMode {
        DeploymentMode::from_u8(self.current.load(Ordering::Acquire)).unwrap_or_default()
    }

    pub fn is_switch_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    pub fn current_context(&self) -> Option<ModeSwitchContext> {
        lock(&self.active).clone()
    }

    /// Oldest first.
    pub fn history(&self) -> Vec<SwitchRecord> {
        lock(&self.history).snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<DeploymentMode> {
        self.mode_tx.subscribe()
    }

    pub fn graph(&self) -> &CompatibilityGraph {
        &self.graph
    }

    pub fn detector(&self) -> &Arc<AvailabilityDetector> {
        &self.detector
    }

    pub fn policy(&self) -> &Arc<PolicyTable> {
        &self.policy
    }

    // ---- 初始化 ----

    /// Picks the starting mode without waiting on any probe. A valid pinned
    /// mode is used as-is; otherwise the manager starts in `LocalOnly` and a
    /// background detection converges it.
    pub async fn initialize(self: &Arc<Self>) -> DeploymentMode {
        if let Some(pinned) = self.resolve_pinned().await {
            match self.prerequisites_met(pinned) {
                Ok(()) => {
                    info!("Using pinned deployment mode {}", pinned);
                    self.commit_mode(pinned);
                    self.policy.adjust_for_mode(pinned);
                    return pinned;
                }
                Err(reason) => {
                    warn!(
                        "Pinned deployment mode {} ignored: {}",
                        pinned, reason
                    );
                }
            }
        }

        self.commit_mode(DeploymentMode::LocalOnly);
        self.policy.adjust_for_mode(DeploymentMode::LocalOnly);

        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            manager.converge().await;
        });
        *lock(&self.convergence) = Some(handle);

        info!("Mode manager started in local_only, detection running in background");
        DeploymentMode::LocalOnly
    }

    /// Waits for the background convergence started by `initialize`, if any.
    pub async fn wait_for_convergence(&self) {
        let handle = lock(&self.convergence).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Mode convergence task failed: {}", e);
            }
        }
    }

    async fn resolve_pinned(&self) -> Option<DeploymentMode> {
        match self.settings_store.get(PINNED_MODE_KEY).await {
            Ok(Some(value)) => match value.parse::<DeploymentMode>() {
                Ok(mode) => return Some(mode),
                Err(e) => warn!("Ignoring persisted deployment mode: {}", e),
            },
            Ok(None) => {}
            Err(e) => warn!("Failed to read persisted deployment mode: {}", e),
        }
        self.settings.pinned_mode
    }

    /// Configuration-only prerequisites; no probing.
    pub fn prerequisites_met(&self, mode: DeploymentMode) -> Result<(), String> {
        if mode.has_external() {
            self.detector
                .external_target()
                .map_err(|reason| reason.to_string())?;
        }
        if mode.has_object() && !self.detector.object_credentials_present() {
            let missing = self
                .detector
                .settings()
                .object_store
                .missing_credentials()
                .join(", ");
            return Err(format!("object store credentials missing: {missing}"));
        }
        Ok(())
    }

    async fn converge(&self) {
        let detected = self.detector.detect_mode().await;
        let slot = match self.try_begin(detected, INITIAL_DETECTION_REASON) {
            Ok((slot, _, _)) => slot,
            Err(SwitchOutcome::NoOp(mode)) => {
                debug!("Detected mode {} matches the starting mode", mode);
                return;
            }
            Err(outcome) => {
                info!("Skipping initial convergence: {:?}", outcome);
                return;
            }
        };

        let previous = self.current_mode();
        self.commit_mode(detected);
        self.policy.adjust_for_mode(detected);
        drop(slot);

        info!("Converged deployment mode {} -> {}", previous, detected);
        self.notify_listeners(&ModeChangedEvent::new(
            previous,
            detected,
            INITIAL_DETECTION_REASON,
        ));
    }

    // ---- 模式切换 ----

    fn build_context(
        from: DeploymentMode,
        to: DeploymentMode,
        reason: &str,
        strategy: &TransitionStrategy,
    ) -> ModeSwitchContext {
        ModeSwitchContext {
            from,
            to,
            kind: strategy.kind,
            reason: reason.to_string(),
            started_at: Utc::now(),
            estimated_duration: strategy.estimated_duration,
            migration_required: strategy.migration_required,
            data_migrated: false,
            rollback_plan: RollbackPlan {
                supported: strategy.rollback_supported,
                restore_mode: from,
            },
        }
    }

    /// Busy, no-op and reachability checks plus slot reservation, all under
    /// the slot lock so nothing can interleave.
    fn try_begin(
        &self,
        target: DeploymentMode,
        reason: &str,
    ) -> Result<(SwitchSlot<'_>, TransitionStrategy, ModeSwitchContext), SwitchOutcome> {
        let mut active = lock(&self.active);
        if active.is_some() {
            return Err(SwitchOutcome::Rejected(RejectionReason::Busy));
        }

        let current = self.current_mode();
        if target == current {
            return Err(SwitchOutcome::NoOp(current));
        }
        if !self.graph.is_reachable(current, target) {
            return Err(SwitchOutcome::Rejected(RejectionReason::Unreachable {
                from: current,
                to: target,
            }));
        }

        let strategy = strategy_for(current, target);
        let ctx = Self::build_context(current, target, reason, &strategy);
        *active = Some(ctx.clone());
        self.in_progress.store(true, Ordering::Release);
        Ok((SwitchSlot { manager: self }, strategy, ctx))
    }

    pub async fn switch_mode_str(&self, target: &str, reason: &str) -> SwitchOutcome {
        match target.parse::<DeploymentMode>() {
            Ok(mode) => self.switch_mode(mode, reason).await,
            Err(_) => {
                let outcome = SwitchOutcome::Rejected(RejectionReason::Malformed {
                    input: target.to_string(),
                });
                Self::count_outcome(&outcome);
                outcome
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn switch_mode(&self, target: DeploymentMode, reason: &str) -> SwitchOutcome {
        let (slot, strategy, mut ctx) = match self.try_begin(target, reason) {
            Ok(reserved) => reserved,
            Err(outcome) => {
                match &outcome {
                    SwitchOutcome::NoOp(mode) => debug!("Already in mode {}", mode),
                    other => warn!("Mode switch to {} not started: {:?}", target, other),
                }
                Self::count_outcome(&outcome);
                return outcome;
            }
        };

        info!(
            "Switching deployment mode {} -> {} ({}, reason: {})",
            ctx.from, ctx.to, ctx.kind, reason
        );

        for check in &strategy.pre_checks {
            if let Err(message) = self.run_pre_check(*check).await {
                warn!("Pre-switch check {} failed: {}", check.name(), message);
                let rejection = RejectionReason::PreCheckFailed {
                    check: check.name().to_string(),
                    message,
                };
                let mut record = SwitchRecord::from_context(&ctx);
                record.error = Some(rejection.to_string());
                self.finish(slot, record);
                let outcome = SwitchOutcome::Rejected(rejection);
                Self::count_outcome(&outcome);
                return outcome;
            }
        }

        if ctx.migration_required {
            if let Err(message) = self.migrate(&mut ctx).await {
                let record = self.abort(slot, &ctx, message).await;
                let outcome = SwitchOutcome::Failed(record);
                Self::count_outcome(&outcome);
                return outcome;
            }
            slot.update(|active| active.data_migrated = ctx.data_migrated);
        }

        if let Err(e) = self
            .settings_store
            .set(PINNED_MODE_KEY, ctx.to.as_str())
            .await
        {
            let record = self
                .abort(slot, &ctx, format!("failed to persist mode: {e}"))
                .await;
            let outcome = SwitchOutcome::Failed(record);
            Self::count_outcome(&outcome);
            return outcome;
        }
        self.commit_mode(ctx.to);
        self.export_mode(ctx.to);

        let mut failures = self.run_post_actions(&strategy.post_actions, &ctx).await;

        if let Some(identity) = &self.identity {
            match identity.ensure_default_admin(ctx.to).await {
                Ok(true) => info!("Default admin identity created for {}", ctx.to),
                Ok(false) => debug!("Default admin identity already present"),
                Err(e) => {
                    warn!("Default admin bootstrap failed: {}", e);
                    failures.push(format!("ensure_default_admin: {e}"));
                }
            }
        }

        let mut record = SwitchRecord::from_context(&ctx);
        record.success = true;
        record.post_action_failures = failures;
        self.finish(slot, record.clone());

        info!(
            "Deployment mode switched {} -> {} in {:?}",
            record.from, record.to, record.duration
        );
        self.notify_listeners(&ModeChangedEvent::new(ctx.from, ctx.to, reason));

        let outcome = SwitchOutcome::Switched(record);
        Self::count_outcome(&outcome);
        outcome
    }

    async fn run_pre_check(&self, check: PreSwitchCheck) -> Result<(), String> {
        match check {
            PreSwitchCheck::ExternalStoreConfigured => self
                .detector
                .external_target()
                .map(|_| ())
                .map_err(|reason| reason.to_string()),
            PreSwitchCheck::ExternalStoreReachable => {
                let result = self.detector.check_external_store().await;
                if result.is_available() {
                    Ok(())
                } else {
                    Err(result.error.unwrap_or(result.message))
                }
            }
            PreSwitchCheck::ObjectStoreCredentialsPresent => {
                if self.detector.object_credentials_present() {
                    Ok(())
                } else {
                    Err("object store credentials incomplete".to_string())
                }
            }
            PreSwitchCheck::ObjectStoreReachable => {
                let result = self.detector.check_object_store().await;
                if result.is_available() {
                    Ok(())
                } else {
                    Err(result.error.unwrap_or(result.message))
                }
            }
            PreSwitchCheck::LocalStoreHealthy => match self.settings_store.health_check().await {
                Ok(true) => Ok(()),
                Ok(false) => Err("local store health check failed".to_string()),
                Err(e) => Err(e.to_string()),
            },
        }
    }

    async fn migrate(&self, ctx: &mut ModeSwitchContext) -> Result<(), String> {
        let routine = self
            .migrations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&ctx.key())
            .cloned();

        let Some(routine) = routine else {
            warn!(
                "No migration routine registered for {}, continuing without moving data",
                ctx.key()
            );
            return Ok(());
        };

        routine.migrate(ctx).await.map_err(|e| e.to_string())?;
        ctx.data_migrated = true;
        Ok(())
    }

    /// Failure before commit: roll back if supported and record the outcome.
    /// The active mode is left untouched.
    async fn abort(
        &self,
        slot: SwitchSlot<'_>,
        ctx: &ModeSwitchContext,
        message: String,
    ) -> SwitchRecord {
        error!("Mode switch {} failed: {}", ctx.key(), message);
        let mut record = SwitchRecord::from_context(ctx);
        record.error = Some(message);

        if ctx.rollback_plan.supported {
            let routine = self
                .migrations
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&ctx.key())
                .cloned();
            if let Some(routine) = routine {
                match routine.rollback(ctx).await {
                    Ok(()) => {
                        info!("Rolled back {}", ctx.key());
                        record.rolled_back = true;
                    }
                    Err(e) => error!("Rollback of {} failed: {}", ctx.key(), e),
                }
            }
        }

        self.finish(slot, record.clone());
        record
    }

    async fn run_post_actions(
        &self,
        actions: &[PostSwitchAction],
        ctx: &ModeSwitchContext,
    ) -> Vec<String> {
        let mut failures = Vec::new();
        for action in actions {
            match action {
                PostSwitchAction::ClearAvailabilityCache => self.detector.clear_cache(),
                PostSwitchAction::RefreshSyncPolicy => self.policy.adjust_for_mode(ctx.to),
                other => {
                    let hook = self
                        .hooks
                        .read()
                        .unwrap_or_else(PoisonError::into_inner)
                        .iter()
                        .find(|hook| hook.handles(*other))
                        .cloned();
                    let Some(hook) = hook else {
                        debug!("No handler for post-switch action {}", other.name());
                        continue;
                    };
                    if let Err(e) = hook.run(*other, ctx).await {
                        warn!("Post-switch action {} failed: {}", other.name(), e);
                        failures.push(format!("{}: {}", other.name(), e));
                    }
                }
            }
        }
        failures
    }

    fn finish(&self, slot: SwitchSlot<'_>, record: SwitchRecord) {
        lock(&self.history).push(record);
        drop(slot);
    }

    fn commit_mode(&self, mode: DeploymentMode) {
        self.current.store(mode.to_u8(), Ordering::Release);
        self.mode_tx.send_replace(mode);
    }

    /// Mutating the environment races with any thread reading it, so the
    /// process must not call `getenv` (directly or through C libraries)
    /// concurrently when this is enabled. Set `export_env_var` to `None` to
    /// publish only through the watch channel.
    fn export_mode(&self, mode: DeploymentMode) {
        if let Some(var) = &self.settings.export_env_var {
            std::env::set_var(var, mode.as_str());
        }
    }

    fn notify_listeners(&self, event: &ModeChangedEvent) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener.on_mode_changed(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Mode listener {} failed: {}", listener.name(), e),
                Err(_) => error!("Mode listener {} panicked", listener.name()),
            }
        }
    }

    fn count_outcome(outcome: &SwitchOutcome) {
        let label = match outcome {
            SwitchOutcome::Switched(_) => "switched",
            SwitchOutcome::NoOp(_) => "noop",
            SwitchOutcome::Rejected(_) => "rejected",
            SwitchOutcome::Failed(_) => "failed",
        };
        metrics::counter!("tiering_mode_switches_total", "outcome" => label).increment(1);
    }

    // ---- 自动调和 ----

    /// Gated by the reconcile interval; returns `None` when nothing ran.
    pub async fn check_and_switch(&self) -> Option<SwitchOutcome> {
        if self.is_switch_in_progress() {
            return None;
        }
        {
            let mut last = lock(&self.last_reconcile);
            if let Some(at) = *last {
                if at.elapsed() < self.settings.reconcile_interval {
                    return None;
                }
            }
            *last = Some(Instant::now());
        }
        self.reconcile().await
    }

    /// Re-detects and switches if the observed mode differs. Leaving an
    /// object-backed mode whose object store went away takes priority.
    pub async fn reconcile(&self) -> Option<SwitchOutcome> {
        let current = self.current_mode();
        let report = self.detector.detect().await;

        if current.has_object() && !report.object.is_available() {
            let fallback = DeploymentMode::from_capabilities(report.external.is_available(), false);
            warn!(
                "Object store unavailable while in {}, downgrading to {}",
                current, fallback
            );
            return Some(self.switch_mode(fallback, OBJECT_STORE_LOST_REASON).await);
        }

        if report.mode != current {
            info!("Detected deployment mode {} differs from {}", report.mode, current);
            return Some(self.switch_mode(report.mode, AUTO_DETECTED_REASON).await);
        }

        debug!("Deployment mode {} confirmed", current);
        None
    }
}
