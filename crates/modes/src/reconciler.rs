use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use tiering_domain::switching::SwitchOutcome;

use crate::manager::ModeManager;

/// Periodic driver for [`ModeManager::check_and_switch`].
pub struct Reconciler {
    manager: Arc<ModeManager>,
    tick: Duration,
}

impl Reconciler {
    /// Ticks at half the reconcile interval so the manager's own interval
    /// gate, not timer drift, decides when a cycle runs.
    pub fn new(manager: Arc<ModeManager>, reconcile_interval: Duration) -> Self {
        let tick = (reconcile_interval / 2).max(Duration::from_secs(1));
        Self { manager, tick }
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Mode reconciler started, tick {:?}", self.tick);
        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.manager.check_and_switch().await {
                        Some(SwitchOutcome::Switched(record)) => {
                            info!("Reconciler switched {} -> {}", record.from, record.to);
                        }
                        Some(SwitchOutcome::NoOp(_)) | None => {
                            debug!("Reconcile cycle finished without a switch");
                        }
                        Some(other) => {
                            warn!("Reconciler switch did not complete: {:?}", other);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Mode reconciler received shutdown signal");
                    break;
                }
            }
        }
    }
}
