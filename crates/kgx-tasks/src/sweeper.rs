//! Background removal of expired tasks

use crate::error::TaskError;
use crate::registry::TaskRegistry;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Periodically removes terminal tasks older than the retention window
pub struct RetentionSweeper {
    registry: Arc<TaskRegistry>,
    retention: Duration,
    interval: Duration,
}

impl RetentionSweeper {
    /// Create a sweeper
    pub fn new(registry: Arc<TaskRegistry>, retention: Duration, interval: Duration) -> Self {
        Self {
            registry,
            retention,
            interval,
        }
    }

    /// Run one sweep
    pub async fn sweep_once(&self) -> Result<usize, TaskError> {
        self.registry.cleanup(self.retention).await
    }

    /// Sweep at the configured interval until `shutdown` fires
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            "Retention sweeper started (interval: {:?}, retention: {:?})",
            self.interval,
            self.retention
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep_once().await {
                        Ok(0) => tracing::debug!("Sweep found nothing to remove"),
                        Ok(removed) => tracing::info!("Sweep removed {} tasks", removed),
                        Err(e) => tracing::error!("Sweep failed: {}", e),
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("Shutdown signal received, stopping retention sweeper");
                    break;
                }
            }
        }
    }

    /// Run a fixed number of sweeps, returning the total removed
    pub async fn run_cycles(&self, cycles: usize) -> Result<usize, TaskError> {
        let mut ticker = interval(self.interval);
        let mut removed = 0;

        for cycle in 0..cycles {
            ticker.tick().await;
            let swept = self.sweep_once().await?;
            tracing::debug!("Sweep {}/{} removed {} tasks", cycle + 1, cycles, swept);
            removed += swept;
        }

        Ok(removed)
    }
}
