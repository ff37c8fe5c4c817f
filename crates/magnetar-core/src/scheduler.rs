//! Periodic eviction of idle sessions.
//!
//! # Design
//! - A session is stale once its last activity is strictly older than `now - threshold`.
//! - Each candidate is re-checked under the registry lock before removal, so a session
//!   touched mid-sweep survives.
//! - Release failures are logged; the sweep always continues with the next session.

use std::sync::Arc;
use std::time::Duration;

use magnetar_telemetry::Metrics;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::ReleaseOptions;
use crate::manager::release_logged;
use crate::registry::SessionRegistry;

/// Evicts sessions that have been idle longer than a threshold.
#[derive(Debug)]
pub struct CleanupScheduler {
    registry: Arc<SessionRegistry>,
    threshold: Duration,
    interval: Duration,
    release: ReleaseOptions,
    metrics: Metrics,
}

impl CleanupScheduler {
    /// Configure a scheduler. Eviction never deletes data unless `release` says so.
    #[must_use]
    pub const fn new(
        registry: Arc<SessionRegistry>,
        threshold: Duration,
        interval: Duration,
        release: ReleaseOptions,
        metrics: Metrics,
    ) -> Self {
        Self {
            registry,
            threshold,
            interval,
            release,
            metrics,
        }
    }

    /// Idle time after which a session is evicted.
    #[must_use]
    pub const fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Run one sweep now and return the ids that were evicted.
    pub async fn sweep(&self) -> Vec<String> {
        let now = self.registry.now();
        let Some(cutoff) = chrono::Duration::from_std(self.threshold)
            .ok()
            .and_then(|threshold| now.checked_sub_signed(threshold))
        else {
            debug!("eviction threshold reaches before the epoch; nothing is stale");
            return Vec::new();
        };

        let mut evicted = Vec::new();
        for id in self.registry.stale_ids(cutoff) {
            let Some(detached) = self.registry.remove_if_stale(&id, cutoff) else {
                continue;
            };
            info!(
                session_id = %id,
                last_accessed_at = ?detached.snapshot.last_accessed_at,
                "evicting idle session"
            );
            self.metrics.inc_session_evicted();
            release_logged(detached, self.release).await;
            evicted.push(id);
        }
        if !evicted.is_empty() {
            self.metrics.set_active_sessions(self.registry.len());
        }
        evicted
    }

    /// Start sweeping every interval on a background task.
    #[must_use]
    pub fn start(self: Arc<Self>) -> SchedulerHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let period = self.interval.max(Duration::from_millis(1));
        let task = tokio::spawn(async move {
            info!(
                interval_secs = period.as_secs(),
                threshold_secs = self.threshold.as_secs(),
                "cleanup scheduler started"
            );
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        let evicted = self.sweep().await;
                        debug!(evicted = evicted.len(), "cleanup sweep finished");
                    }
                }
            }
            info!("cleanup scheduler stopped");
        });
        SchedulerHandle {
            stop: Some(stop_tx),
            task: Some(task),
        }
    }
}

/// Handle to a running scheduler.
#[derive(Debug)]
pub struct SchedulerHandle {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stop the timer and wait for an in-flight sweep to finish.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take()
            && let Err(err) = task.await
        {
            warn!(error = %err, "cleanup scheduler task ended abnormally");
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
