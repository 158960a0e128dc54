//! 任务工作器
//!
//! Polls the queue, claims eligible tasks and runs them on a bounded pool.
//! One task's failure or panic never stops the loop.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use tiering_core::config::TaskQueueConfig;
use tiering_core::TieringResult;
use tiering_domain::entities::GenerationTask;
use tiering_domain::ports::TaskExecutor;

use crate::queue::{FailureDisposition, GenerationTaskQueue};
use crate::registry::ExecutorRegistry;

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub worker_id: String,
    pub poll_interval: Duration,
    pub batch_size: u32,
    pub max_concurrency: usize,
}

impl WorkerSettings {
    pub fn from_config(config: &TaskQueueConfig) -> Self {
        Self {
            worker_id: default_worker_id(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            batch_size: config.batch_size,
            max_concurrency: config.max_concurrency.max(1),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from_config(&TaskQueueConfig::default())
    }
}

fn default_worker_id() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    format!("{}-{}", host, std::process::id())
}

/// Counters for one poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub fetched: usize,
    pub dispatched: usize,
    /// Another worker won the claim.
    pub conflicts: usize,
    /// Claimed but no executor is registered for the type.
    pub unsupported: usize,
    /// The claim itself errored; counted as a failed attempt.
    pub claim_errors: usize,
}

pub struct GenerationWorker {
    settings: WorkerSettings,
    queue: Arc<GenerationTaskQueue>,
    registry: Arc<ExecutorRegistry>,
    permits: Arc<Semaphore>,
    in_flight: Mutex<JoinSet<()>>,
}

impl GenerationWorker {
    pub fn new(
        settings: WorkerSettings,
        queue: Arc<GenerationTaskQueue>,
        registry: Arc<ExecutorRegistry>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrency.max(1)));
        Self {
            settings,
            queue,
            registry,
            permits,
            in_flight: Mutex::new(JoinSet::new()),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.settings.worker_id
    }

    /// Number of executions currently holding a pool slot.
    pub fn active(&self) -> usize {
        self.settings.max_concurrency.max(1) - self.permits.available_permits()
    }

    /// Fetches up to the free pool capacity, claims and dispatches. Returns
    /// once everything is dispatched; executions continue in the background.
    #[instrument(skip(self), fields(worker_id = %self.settings.worker_id))]
    pub async fn poll_once(&self) -> TieringResult<PollReport> {
        let mut report = PollReport::default();
        self.reap_finished().await;

        let free = self.permits.available_permits();
        if free == 0 {
            debug!("Worker pool is full, skipping poll");
            return Ok(report);
        }
        let limit = self.settings.batch_size.min(free as u32);
        let tasks = self.queue.fetch_eligible(limit).await?;
        report.fetched = tasks.len();

        for task in tasks {
            let Ok(permit) = self.permits.clone().try_acquire_owned() else {
                break;
            };

            match self.queue.claim(task.id).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Task {} claimed elsewhere", task.id);
                    report.conflicts += 1;
                    continue;
                }
                Err(e) => {
                    warn!("Claim of task {} failed: {}", task.id, e);
                    report.claim_errors += 1;
                    record_failure(&self.queue, task.id, &format!("claim failed: {e}")).await;
                    continue;
                }
            }

            let Some(executor) = self.registry.get(&task.task_type).await else {
                report.unsupported += 1;
                let message = format!("没有找到任务类型 {} 的执行器", task.task_type);
                error!("{}", message);
                record_failure(&self.queue, task.id, &message).await;
                continue;
            };

            let queue = self.queue.clone();
            self.in_flight.lock().await.spawn(async move {
                let _permit = permit;
                execute(queue, executor, task).await;
            });
            report.dispatched += 1;
        }

        Ok(report)
    }

    /// Waits for every dispatched execution to finish.
    pub async fn wait_idle(&self) {
        let mut in_flight = self.in_flight.lock().await;
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!("Task execution aborted: {}", e);
            }
        }
    }

    async fn reap_finished(&self) {
        let mut in_flight = self.in_flight.lock().await;
        while let Some(joined) = in_flight.try_join_next() {
            if let Err(e) = joined {
                error!("Task execution aborted: {}", e);
            }
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "Generation worker {} started: poll {:?}, concurrency {}",
            self.settings.worker_id, self.settings.poll_interval, self.settings.max_concurrency
        );
        let mut ticker = interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        error!("Task poll failed: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Generation worker received shutdown signal");
                    break;
                }
            }
        }

        let active = self.active();
        if active > 0 {
            info!("Waiting for {} in-flight tasks", active);
        }
        self.wait_idle().await;
        info!("Generation worker {} stopped", self.settings.worker_id);
    }
}

async fn execute(
    queue: Arc<GenerationTaskQueue>,
    executor: Arc<dyn TaskExecutor>,
    task: GenerationTask,
) {
    match queue.mark_running(task.id).await {
        Ok(true) => {}
        Ok(false) => {
            warn!("Task {} left the claimed state before it started", task.id);
            return;
        }
        Err(e) => {
            record_failure(&queue, task.id, &e.to_string()).await;
            return;
        }
    }

    let started = std::time::Instant::now();
    let outcome = match AssertUnwindSafe(executor.execute(&task)).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => Err(format!("executor panicked: {}", panic_message(panic.as_ref()))),
    };

    match outcome {
        Ok(result) => {
            info!("Task {} succeeded in {:?}", task.id, started.elapsed());
            if let Err(e) = queue.mark_success(task.id, result.as_ref()).await {
                error!("Failed to record success of task {}: {}", task.id, e);
            }
        }
        Err(message) => {
            warn!("Task {} failed: {}", task.id, message);
            record_failure(&queue, task.id, &message).await;
        }
    }
}

async fn record_failure(queue: &GenerationTaskQueue, id: i64, message: &str) {
    match queue.mark_failed_with_backoff(id, message).await {
        Ok(FailureDisposition::Rescheduled {
            attempts,
            next_eligible_at,
        }) => {
            debug!(
                "Task {} rescheduled after attempt {} for {}",
                id, attempts, next_eligible_at
            );
        }
        Ok(FailureDisposition::DeadLettered { attempts }) => {
            error!("Task {} dead-lettered after {} attempts", id, attempts);
        }
        Err(e) => error!("Failed to record failure of task {}: {}", id, e),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
