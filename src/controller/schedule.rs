//! Schedule Driver: periodic reset requests on a fixed grid
//!
//! Ticks land at `start + k * interval` no matter how long each reset takes.
//! Ticks that come due while a reset is still being served collapse into one
//! and never queue up behind it.

use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::ResetHandle;
use crate::types::ResetOrigin;

pub struct ScheduleDriver {
    handle: ResetHandle,
    interval: Duration,
    /// Upper bound on waiting for one scheduled outcome
    outcome_wait: Duration,
}

impl ScheduleDriver {
    pub fn new(handle: ResetHandle, interval: Duration, outcome_wait: Duration) -> Self {
        Self {
            handle,
            interval,
            outcome_wait,
        }
    }

    /// Run until `cancel` fires. The first tick is one full interval after
    /// the call, so a startup reset is not immediately repeated.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(interval_secs = self.interval.as_secs(), "Reset scheduler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.fire() => {}
                    }
                }
            }
        }

        info!("Reset scheduler stopped");
    }

    async fn fire(&self) {
        info!("Scheduled reset triggered");
        match self
            .handle
            .request_reset_within(ResetOrigin::Scheduled, self.outcome_wait)
            .await
        {
            Ok(outcome) if outcome.success => {
                info!(reset_count = outcome.reset_count, "Scheduled reset completed");
            }
            Ok(outcome) => {
                let code = outcome.error.as_ref().map(|e| e.code()).unwrap_or("UNKNOWN");
                error!(code, message = %outcome.message(), "Scheduled reset failed, retrying next interval");
            }
            Err(e) => {
                warn!(code = e.code(), error = %e, "Scheduled reset not completed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConcurrencyPolicy;
    use crate::controller::{tracker, ControllerSettings, ResetController, ResetEngine};
    use crate::seed::catalog::{CtfUniversityCatalog, PlayerAccount};
    use crate::store::{Faults, MemoryStore};
    use std::sync::Arc;

    fn start(store: &MemoryStore, interval: Duration) -> (ResetHandle, CancellationToken) {
        let (writer, health) = tracker(interval.as_secs());
        let engine = ResetEngine::new(
            Arc::new(store.clone()),
            Arc::new(CtfUniversityCatalog::new("ctf_db", PlayerAccount::default())),
            writer,
            Duration::from_secs(120),
        );
        let (controller, handle) = ResetController::new(
            engine,
            health,
            ControllerSettings {
                policy: ConcurrencyPolicy::Coalesce,
                queue_capacity: 8,
                manual_wait: Duration::from_secs(45),
            },
        );
        tokio::spawn(controller.run());

        let cancel = CancellationToken::new();
        let driver = ScheduleDriver::new(handle.clone(), interval, Duration::from_secs(125));
        tokio::spawn(driver.run(cancel.clone()));
        (handle, cancel)
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_reset_before_first_interval() {
        let store = MemoryStore::new();
        let (handle, cancel) = start(&store, Duration::from_secs(900));

        tokio::time::sleep(Duration::from_secs(899)).await;
        assert_eq!(handle.health().reset_count, 0);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_reset_per_interval() {
        let store = MemoryStore::new();
        let (handle, cancel) = start(&store, Duration::from_secs(900));

        tokio::time::sleep(Duration::from_secs(901)).await;
        assert_eq!(handle.health().reset_count, 1);

        tokio::time::sleep(Duration::from_secs(900)).await;
        assert_eq!(handle.health().reset_count, 2);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_tick_does_not_stop_schedule() {
        let store = MemoryStore::new();
        store.set_faults(Faults {
            offline: true,
            ..Faults::default()
        });
        let (handle, cancel) = start(&store, Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(61)).await;
        let health = handle.health();
        assert_eq!(health.reset_count, 0);
        assert_eq!(health.failed_attempts, 1);

        store.clear_faults();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(handle.health().reset_count, 1);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_resets_skip_missed_ticks() {
        let store = MemoryStore::new();
        store.set_faults(Faults {
            commit_latency: Duration::from_secs(25),
            ..Faults::default()
        });
        let (handle, cancel) = start(&store, Duration::from_secs(10));

        // resets run 10-35s, 35-60s, 60-85s; overdue ticks collapse into one
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(handle.health().reset_count, 3);
        assert_eq!(store.max_concurrent_sessions(), 1);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_ticks() {
        let store = MemoryStore::new();
        let (handle, cancel) = start(&store, Duration::from_secs(30));

        cancel.cancel();
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(handle.health().reset_count, 0);
    }
}
