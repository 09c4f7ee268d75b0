//! Background task that releases expired holds.
//!
//! Only the externally-fed policy needs this: its ledger cannot expire a
//! hold it does not fully own, so a sweep over the lease index stands in
//! for native expiry. Release-on-absent is a no-op, which makes concurrent
//! reapers across processes safe without coordination.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::engine::ReservationEngine;

/// Reaper loop tuning knobs.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// Wait between sweeps.
    pub interval: Duration,
    /// Maximum holds released per sweep; back-pressure against a large
    /// backlog of abandoned carts.
    pub batch_limit: usize,
    /// How long shutdown waits for an in-flight sweep.
    pub shutdown_grace: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            batch_limit: 200,
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

/// Handle to a running reaper task.
pub struct ReaperHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
    grace: Duration,
}

impl ReaperHandle {
    /// Signals the loop to stop and waits, bounded by the configured grace
    /// period, for the in-flight sweep to finish.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if tokio::time::timeout(self.grace, self.task).await.is_err() {
            tracing::warn!("reaper did not stop within the grace period");
        }
    }
}

/// Spawns the reaper loop. Exactly one per process is expected.
pub fn spawn_reaper(engine: Arc<ReservationEngine>, config: ReaperConfig) -> ReaperHandle {
    let (stop, mut stopped) = watch::channel(false);
    let grace = config.shutdown_grace;

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::debug!(interval = ?config.interval, batch_limit = config.batch_limit, "reaper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // One bad sweep must not stop future sweeps; the next
                    // interval retries the same work idempotently.
                    if let Err(e) = engine.sweep_expired(Utc::now(), config.batch_limit).await {
                        tracing::warn!(error = %e, "reaper sweep failed");
                    }
                }
                _ = stopped.changed() => {
                    if *stopped.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("reaper stopped");
    });

    ReaperHandle { stop, task, grace }
}
