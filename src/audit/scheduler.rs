//! Daily integrity checkpoint job.
//!
//! # Responsibilities
//! - Wake up periodically
//! - Checkpoint every completed UTC day not anchored yet, oldest first
//! - Stop on shutdown

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

use crate::audit::trail::AuditTrail;
use crate::clock::Clock;

pub struct CheckpointScheduler {
    trail: Arc<AuditTrail>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl CheckpointScheduler {
    pub fn new(trail: Arc<AuditTrail>, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            trail,
            clock,
            interval,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Checkpoint scheduler starting");

        let mut ticker = time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Checkpoint scheduler received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Checkpoint each completed day since the newest checkpoint.
    ///
    /// Days missed while the process was down are backfilled. A failed day
    /// stops the pass; the next tick retries from it.
    pub async fn tick(&self) {
        let Some(yesterday) = self.clock.now().date_naive().pred_opt() else {
            return;
        };

        let mut day = match self.trail.first_unanchored_day().await {
            Ok(Some(day)) => day,
            Ok(None) => yesterday,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read checkpoint index");
                return;
            }
        };

        while day <= yesterday {
            if let Err(e) = self.trail.update_integrity_checkpoint(day).await {
                tracing::error!(date = %day, error = %e, "Scheduled checkpoint failed");
                return;
            }
            let Some(next) = day.succ_opt() else {
                return;
            };
            day = next;
        }
    }
}
