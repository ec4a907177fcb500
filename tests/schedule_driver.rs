//! Schedule Driver Tests
//!
//! Run on tokio's paused clock, so a 15-minute interval costs nothing.

use ctf_watchdog::config::{ConcurrencyPolicy, WatchdogConfig};
use ctf_watchdog::controller::{
    tracker, ControllerSettings, ResetController, ResetEngine, ResetHandle, ScheduleDriver,
};
use ctf_watchdog::seed::catalog::{CtfUniversityCatalog, PlayerAccount};
use ctf_watchdog::store::{Faults, MemoryStore};
use ctf_watchdog::{ControllerStatus, ResetOrigin};

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct Harness {
    handle: ResetHandle,
    store: MemoryStore,
    cancel: CancellationToken,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn start(config: &WatchdogConfig) -> Harness {
    let store = MemoryStore::new();
    let (writer, health) = tracker(config.reset.interval_secs);
    let engine = ResetEngine::new(
        Arc::new(store.clone()),
        Arc::new(CtfUniversityCatalog::new(
            config.database.name.clone(),
            PlayerAccount::default(),
        )),
        writer,
        config.reset.timeout(),
    );
    let (controller, handle) =
        ResetController::new(engine, health, ControllerSettings::from_config(config));
    tokio::spawn(controller.run());

    let cancel = CancellationToken::new();
    let driver = ScheduleDriver::new(
        handle.clone(),
        config.reset.interval(),
        config.reset.outcome_wait(),
    );
    tokio::spawn(driver.run(cancel.clone()));

    Harness {
        handle,
        store,
        cancel,
    }
}

#[tokio::test(start_paused = true)]
async fn default_interval_fires_exactly_once_in_900s() {
    let config = WatchdogConfig::default();
    assert_eq!(config.reset.interval_secs, 900);
    let h = start(&config);

    tokio::time::sleep(Duration::from_secs(900) + Duration::from_millis(1)).await;

    let health = h.handle.health();
    assert_eq!(health.reset_count, 1);
    assert_eq!(h.store.sessions_opened(), 1);
    assert_eq!(health.controller_status, ControllerStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn rejected_connection_degrades_and_next_tick_still_fires() {
    let mut config = WatchdogConfig::default();
    config.reset.interval_secs = 120;
    let h = start(&config);
    h.store.set_faults(Faults {
        offline: true,
        ..Faults::default()
    });

    tokio::time::sleep(Duration::from_secs(121)).await;
    let health = h.handle.health();
    assert_eq!(health.controller_status, ControllerStatus::Degraded);
    assert_eq!(health.reset_count, 0);
    assert!(health.last_reset_at.is_none());

    h.store.clear_faults();
    tokio::time::sleep(Duration::from_secs(120)).await;
    let health = h.handle.health();
    assert_eq!(health.controller_status, ControllerStatus::Idle);
    assert_eq!(health.reset_count, 1);
}

#[tokio::test(start_paused = true)]
async fn manual_reset_does_not_shift_the_grid() {
    let mut config = WatchdogConfig::default();
    config.reset.interval_secs = 100;
    config.controller.policy = ConcurrencyPolicy::Coalesce;
    let h = start(&config);

    tokio::time::sleep(Duration::from_secs(60)).await;
    h.handle.request_reset(ResetOrigin::Manual).await.unwrap();
    assert_eq!(h.handle.health().reset_count, 1);

    // Scheduled tick still lands at t=100, not t=160
    tokio::time::sleep(Duration::from_secs(41)).await;
    assert_eq!(h.handle.health().reset_count, 2);
}

#[tokio::test(start_paused = true)]
async fn counts_stay_consistent_over_many_intervals() {
    let mut config = WatchdogConfig::default();
    config.reset.interval_secs = 10;
    let h = start(&config);

    tokio::time::sleep(Duration::from_secs(105)).await;
    assert_eq!(h.handle.health().reset_count, 10);
    assert_eq!(h.store.max_concurrent_sessions(), 1);
}
