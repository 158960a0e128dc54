use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use tiering_core::AppConfig;
use tiering_core::TieringResult;
use tiering_domain::events::ModeChangedEvent;
use tiering_domain::ports::ModeChangeListener;
use tiering_domain::value_objects::DeploymentMode;
use tiering_infrastructure::{
    LocalDatabase, PgExternalStoreConnector, PgReplicationSink, S3ClientFactory,
};
use tiering_modes::{
    AvailabilityDetector, DetectorSettings, ModeManager, ModeManagerSettings, PolicyTable,
    Reconciler,
};
use tiering_sync::{DrainerSettings, OutboxDrainer, OutboxFlushHook, OutboxReplicator};
use tiering_worker::{ExecutorRegistry, GenerationTaskQueue, GenerationWorker, WorkerSettings};

use crate::shutdown::join_with_timeout;

/// Upper bound on how long each background loop may take to stop.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Logs every committed mode change.
struct ModeChangeLogger;

impl ModeChangeListener for ModeChangeLogger {
    fn name(&self) -> &str {
        "mode_change_logger"
    }

    fn on_mode_changed(&self, event: &ModeChangedEvent) -> TieringResult<()> {
        info!(
            "部署模式已切换: {} -> {} ({})",
            event.previous, event.current, event.reason
        );
        Ok(())
    }
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    database: LocalDatabase,
    policy: Arc<PolicyTable>,
    manager: Arc<ModeManager>,
    replicator: Arc<OutboxReplicator>,
    drainer: Option<Arc<OutboxDrainer>>,
    queue: Arc<GenerationTaskQueue>,
    registry: Arc<ExecutorRegistry>,
    worker: Arc<GenerationWorker>,
}

impl Application {
    /// Opens the local store named in the configuration and wires every
    /// component. Nothing is probed or started yet.
    pub async fn new(config: AppConfig) -> Result<Self> {
        let database = LocalDatabase::connect(&config.local_store)
            .await
            .with_context(|| format!("打开本地存储失败: {}", config.local_store.url))?;
        Ok(Self::with_database(config, database))
    }

    pub fn with_database(config: AppConfig, database: LocalDatabase) -> Self {
        info!("初始化应用程序");

        let detector = Arc::new(AvailabilityDetector::new(
            DetectorSettings::from_config(&config),
            Arc::new(PgExternalStoreConnector::new(Duration::from_secs(
                config.external_store.probe_timeout_seconds,
            ))),
            Arc::new(S3ClientFactory::new(Duration::from_secs(
                config.object_store.probe_timeout_seconds,
            ))),
        ));
        let policy = Arc::new(PolicyTable::new(DeploymentMode::LocalOnly));

        let manager = Arc::new(ModeManager::new(
            ModeManagerSettings::from_config(&config.modes),
            detector,
            policy.clone(),
            Arc::new(database.settings_store()),
        ));
        manager.add_listener(Arc::new(ModeChangeLogger));

        let outbox = Arc::new(database.outbox_repository());
        let replicator = Arc::new(OutboxReplicator::new(outbox.clone()));

        let drainer = match config.external_store.configured_url() {
            Some(url) if config.external_store.is_usable() => {
                let drainer = Arc::new(OutboxDrainer::new(
                    outbox,
                    Arc::new(PgReplicationSink::new(url)),
                    policy.clone(),
                    DrainerSettings::from_config(&config.outbox),
                ));
                manager.add_post_switch_hook(Arc::new(OutboxFlushHook::new(drainer.clone())));
                Some(drainer)
            }
            _ => {
                info!("未配置外部存储，发件箱只在本地累积");
                None
            }
        };

        let queue = Arc::new(GenerationTaskQueue::from_config(
            Arc::new(database.generation_task_repository()),
            &config.task_queue,
        ));
        let registry = Arc::new(ExecutorRegistry::new());
        let worker = Arc::new(GenerationWorker::new(
            WorkerSettings::from_config(&config.task_queue),
            queue.clone(),
            registry.clone(),
        ));

        Self {
            config,
            database,
            policy,
            manager,
            replicator,
            drainer,
            queue,
            registry,
            worker,
        }
    }

    pub fn mode_manager(&self) -> &Arc<ModeManager> {
        &self.manager
    }

    pub fn policy(&self) -> &Arc<PolicyTable> {
        &self.policy
    }

    pub fn replicator(&self) -> &Arc<OutboxReplicator> {
        &self.replicator
    }

    pub fn task_queue(&self) -> &Arc<GenerationTaskQueue> {
        &self.queue
    }

    /// Executors must be registered before `run` for the worker to start.
    pub fn executor_registry(&self) -> &Arc<ExecutorRegistry> {
        &self.registry
    }

    pub fn database(&self) -> &LocalDatabase {
        &self.database
    }

    /// Starts every background loop and returns once `shutdown_rx` fires and
    /// the loops have stopped.
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let mode = self.manager.initialize().await;
        info!("应用启动，初始部署模式: {}", mode);

        let mut loops: Vec<(&'static str, JoinHandle<()>)> = Vec::new();

        if self.config.modes.auto_reconcile {
            let reconciler = Reconciler::new(
                self.manager.clone(),
                Duration::from_secs(self.config.modes.reconcile_interval_seconds),
            );
            loops.push((
                "reconciler",
                tokio::spawn(reconciler.run(shutdown_rx.resubscribe())),
            ));
        }

        if let Some(drainer) = &self.drainer {
            loops.push((
                "outbox_drainer",
                tokio::spawn(drainer.clone().run(shutdown_rx.resubscribe())),
            ));
        }

        if self.registry.is_empty().await {
            info!("没有注册任务执行器，生成任务工作器不启动");
        } else {
            loops.push((
                "generation_worker",
                tokio::spawn(self.worker.clone().run(shutdown_rx.resubscribe())),
            ));
        }

        let _ = shutdown_rx.recv().await;
        info!("开始停止后台任务");

        let mut clean = true;
        for (name, handle) in loops {
            clean &= join_with_timeout(name, handle, SHUTDOWN_GRACE).await;
        }
        self.manager.wait_for_convergence().await;
        self.database.close().await;

        if !clean {
            warn!("部分后台任务未在限定时间内停止");
        }
        info!("应用已停止");
        Ok(())
    }
}
