//! Health Tracker
//!
//! The controller record lives in an `ArcSwap`, so readers load a complete
//! snapshot without locking and never wait on a running reset. Only the
//! [`HealthWriter`] can replace it. The reset engine owns the only writer,
//! which is not `Clone`.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::types::{ControllerStatus, HealthSnapshot, HealthState};

/// Create the writer/reader pair for a fresh process
pub fn tracker(interval_seconds: u64) -> (HealthWriter, HealthHandle) {
    let cell = Arc::new(ArcSwap::from_pointee(HealthState::new(interval_seconds)));
    (
        HealthWriter { cell: cell.clone() },
        HealthHandle { cell },
    )
}

/// Read-only access for the control surface and anyone else
#[derive(Clone)]
pub struct HealthHandle {
    cell: Arc<ArcSwap<HealthState>>,
}

impl HealthHandle {
    /// The current record as stored
    pub fn state(&self) -> HealthState {
        self.cell.load().as_ref().clone()
    }

    /// Snapshot with `seconds_since_last_reset` computed now
    pub fn snapshot(&self) -> HealthSnapshot {
        self.snapshot_at(Utc::now())
    }

    pub fn snapshot_at(&self, now: DateTime<Utc>) -> HealthSnapshot {
        self.cell.load().snapshot_at(now)
    }
}

/// Sole mutator of the health record
pub struct HealthWriter {
    cell: Arc<ArcSwap<HealthState>>,
}

impl HealthWriter {
    pub fn current(&self) -> HealthState {
        self.cell.load().as_ref().clone()
    }

    /// `Idle | Degraded -> Resetting`
    pub fn begin_reset(&self) {
        let mut next = self.current();
        next.controller_status = ControllerStatus::Resetting;
        self.cell.store(Arc::new(next));
    }

    /// Fold a finished attempt into the record and return the new count.
    ///
    /// Success: count + 1, `last_reset_at = finished_at`, `Idle`.
    /// Failure: count unchanged, `Degraded`.
    pub fn finish_reset(&self, success: bool, finished_at: DateTime<Utc>, error: Option<String>) -> u64 {
        let mut next = self.current();
        if success {
            next.reset_count += 1;
            next.last_reset_at = Some(finished_at);
            next.controller_status = ControllerStatus::Idle;
            next.last_error = None;
        } else {
            next.failed_attempts += 1;
            next.controller_status = ControllerStatus::Degraded;
            next.last_error = error;
        }
        let count = next.reset_count;
        self.cell.store(Arc::new(next));
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_increments_and_returns_to_idle() {
        let (writer, handle) = tracker(900);
        writer.begin_reset();
        assert_eq!(handle.state().controller_status, ControllerStatus::Resetting);

        let now = Utc::now();
        assert_eq!(writer.finish_reset(true, now, None), 1);
        let state = handle.state();
        assert_eq!(state.controller_status, ControllerStatus::Idle);
        assert_eq!(state.reset_count, 1);
        assert_eq!(state.last_reset_at, Some(now));
    }

    #[test]
    fn test_failure_degrades_without_counting() {
        let (writer, handle) = tracker(900);
        writer.begin_reset();
        assert_eq!(writer.finish_reset(false, Utc::now(), Some("refused".into())), 0);

        let state = handle.state();
        assert_eq!(state.controller_status, ControllerStatus::Degraded);
        assert_eq!(state.reset_count, 0);
        assert_eq!(state.failed_attempts, 1);
        assert_eq!(state.last_error.as_deref(), Some("refused"));
        assert!(state.last_reset_at.is_none());
    }

    #[test]
    fn test_degraded_recovers_on_next_success() {
        let (writer, handle) = tracker(900);
        writer.begin_reset();
        writer.finish_reset(false, Utc::now(), Some("refused".into()));
        writer.begin_reset();
        writer.finish_reset(true, Utc::now(), None);

        let state = handle.state();
        assert_eq!(state.controller_status, ControllerStatus::Idle);
        assert_eq!(state.reset_count, 1);
        assert!(state.last_error.is_none());
    }

    #[test]
    fn test_failure_keeps_previous_last_reset() {
        let (writer, handle) = tracker(900);
        let first = Utc::now();
        writer.finish_reset(true, first, None);
        writer.finish_reset(false, Utc::now(), Some("boom".into()));
        assert_eq!(handle.state().last_reset_at, Some(first));
    }
}
