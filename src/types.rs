//! Shared data structures for the reset watchdog
//!
//! - `ResetRequest`: a trigger from the scheduler, an operator, or startup
//! - `ResetOutcome`: the immutable result of one reset attempt
//! - `HealthState`: the process-wide controller record (single writer)
//! - `HealthSnapshot`: a read-time view of `HealthState` with derived fields

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ResetError;

// ============================================================================
// Requests
// ============================================================================

/// Where a reset request came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResetOrigin {
    /// Fired by the schedule driver
    Scheduled,
    /// Operator call through the control surface
    Manual,
    /// Initial reset performed once the store is reachable
    Startup,
}

impl std::fmt::Display for ResetOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResetOrigin::Scheduled => write!(f, "scheduled"),
            ResetOrigin::Manual => write!(f, "manual"),
            ResetOrigin::Startup => write!(f, "startup"),
        }
    }
}

/// Ephemeral reset trigger, consumed by the reset engine and never persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetRequest {
    pub origin: ResetOrigin,
    pub requested_at: DateTime<Utc>,
}

impl ResetRequest {
    pub fn new(origin: ResetOrigin) -> Self {
        Self {
            origin,
            requested_at: Utc::now(),
        }
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Result of a single reset attempt.
///
/// Shared by every caller whose request was coalesced into the attempt, so
/// it is cheap to clone and never mutated after the engine returns it.
#[derive(Debug, Clone)]
pub struct ResetOutcome {
    /// Correlates log lines and responses for one physical reset
    pub attempt_id: String,
    pub origin: ResetOrigin,
    pub success: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub error: Option<ResetError>,
    /// `reset_count` after this attempt was folded into the health record
    pub reset_count: u64,
}

impl ResetOutcome {
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    /// Operator-facing summary line
    pub fn message(&self) -> String {
        match &self.error {
            None => format!(
                "Database reset completed successfully (Reset #{})",
                self.reset_count
            ),
            Some(e) => format!("Database reset failed: {}", e),
        }
    }

    /// Convert into a `Result`, keeping the outcome on success
    pub fn into_result(self) -> Result<ResetOutcome, ResetError> {
        match self.error.clone() {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }
}

// ============================================================================
// Health
// ============================================================================

/// Controller lifecycle status
///
/// `Idle -> Resetting -> Idle | Degraded`, `Degraded -> Resetting`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ControllerStatus {
    #[default]
    Idle,
    Resetting,
    Degraded,
}

impl ControllerStatus {
    /// Value reported in the `status` field of `GET /health`
    pub fn as_health_label(&self) -> &'static str {
        match self {
            ControllerStatus::Idle => "healthy",
            ControllerStatus::Resetting => "resetting",
            ControllerStatus::Degraded => "degraded",
        }
    }
}

impl std::fmt::Display for ControllerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerStatus::Idle => write!(f, "IDLE"),
            ControllerStatus::Resetting => write!(f, "RESETTING"),
            ControllerStatus::Degraded => write!(f, "DEGRADED"),
        }
    }
}

/// Process-wide controller record.
///
/// Replaced as a whole on every transition; readers never observe a
/// half-applied update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthState {
    pub last_reset_at: Option<DateTime<Utc>>,
    pub reset_count: u64,
    pub interval_seconds: u64,
    pub controller_status: ControllerStatus,
    /// Attempts that ended in failure since process start
    pub failed_attempts: u64,
    /// Cause of the most recent failed attempt, cleared on success
    pub last_error: Option<String>,
}

impl HealthState {
    pub fn new(interval_seconds: u64) -> Self {
        Self {
            last_reset_at: None,
            reset_count: 0,
            interval_seconds,
            controller_status: ControllerStatus::Idle,
            failed_attempts: 0,
            last_error: None,
        }
    }

    /// Derive the read-time snapshot, computing elapsed time against `now`
    pub fn snapshot_at(&self, now: DateTime<Utc>) -> HealthSnapshot {
        let seconds_since_last_reset = self
            .last_reset_at
            .map(|t| ((now - t).num_milliseconds().max(0) as f64) / 1000.0);

        HealthSnapshot {
            controller_status: self.controller_status,
            last_reset_at: self.last_reset_at,
            reset_count: self.reset_count,
            interval_seconds: self.interval_seconds,
            seconds_since_last_reset,
            failed_attempts: self.failed_attempts,
            last_error: self.last_error.clone(),
        }
    }
}

/// Read-only view returned by health queries
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub controller_status: ControllerStatus,
    pub last_reset_at: Option<DateTime<Utc>>,
    pub reset_count: u64,
    pub interval_seconds: u64,
    /// `None` until the first successful reset
    pub seconds_since_last_reset: Option<f64>,
    pub failed_attempts: u64,
    pub last_error: Option<String>,
}
