//! Control surface handlers

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use super::error::ApiError;
use super::{AppState, ServiceInfo, HEALTH_SERVICE_NAME};
use crate::types::{ControllerStatus, ResetOrigin};

// ============================================================================
// GET /health
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `healthy`, `resetting` or `degraded`
    pub status: &'static str,
    pub service: &'static str,
    pub controller_status: ControllerStatus,
    /// RFC 3339, or `"Never"` before the first successful reset
    pub last_reset: String,
    pub reset_count: u64,
    pub seconds_since_last_reset: Option<f64>,
    pub reset_interval_seconds: u64,
    pub failed_attempts: u64,
    pub last_error: Option<String>,
}

/// Always 200 while the process is up; degradation shows in the body.
pub async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let snapshot = state.controller.health();

    Json(HealthResponse {
        status: snapshot.controller_status.as_health_label(),
        service: HEALTH_SERVICE_NAME,
        controller_status: snapshot.controller_status,
        last_reset: snapshot
            .last_reset_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "Never".to_string()),
        reset_count: snapshot.reset_count,
        seconds_since_last_reset: snapshot.seconds_since_last_reset,
        reset_interval_seconds: snapshot.interval_seconds,
        failed_attempts: snapshot.failed_attempts,
        last_error: snapshot.last_error,
    })
}

// ============================================================================
// POST /reset
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub status: &'static str,
    pub message: String,
    pub reset_count: u64,
    pub timestamp: String,
    pub attempt_id: String,
}

/// Request a reset and wait for its outcome.
///
/// Authentication is left to the network boundary in front of this service.
pub async fn post_reset(State(state): State<AppState>) -> Result<Json<ResetResponse>, ApiError> {
    let outcome = state
        .controller
        .request_reset(ResetOrigin::Manual)
        .await?
        .into_result()?;

    Ok(Json(ResetResponse {
        status: "success",
        message: outcome.message(),
        reset_count: outcome.reset_count,
        timestamp: outcome.finished_at.to_rfc3339(),
        attempt_id: outcome.attempt_id,
    }))
}

// ============================================================================
// GET /
// ============================================================================

pub async fn get_info(State(state): State<AppState>) -> Json<ServiceInfo> {
    Json(state.info.as_ref().clone())
}
