//! Error responses for the control surface.
//!
//! Every failure renders as `{ "status": "error", "code": "...", "message": "..." }`
//! with a status code that separates "try again later" (503, 504) from
//! "the reset itself broke" (500).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::ResetError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub status: &'static str,
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl From<ResetError> for ApiError {
    fn from(err: ResetError) -> Self {
        let status = match &err {
            ResetError::ConcurrencyRejected | ResetError::ControllerUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ResetError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ResetError::Connectivity(_)
            | ResetError::SchemaApply { .. }
            | ResetError::SeedApply { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = match &err {
            ResetError::Timeout(_) => {
                format!("{err}; the reset continues in the background, check /health")
            }
            _ => format!("Database reset failed: {err}"),
        };
        Self {
            status,
            code: err.code(),
            message,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            status: "error",
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ResetError::ConcurrencyRejected, StatusCode::SERVICE_UNAVAILABLE, "BUSY"),
            (ResetError::ControllerUnavailable, StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE"),
            (ResetError::Timeout(Duration::from_secs(45)), StatusCode::GATEWAY_TIMEOUT, "TIMEOUT"),
            (ResetError::Connectivity("refused".into()), StatusCode::INTERNAL_SERVER_ERROR, "CONNECTIVITY"),
        ];
        for (err, status, code) in cases {
            let api: ApiError = err.into();
            assert_eq!(api.status(), status);
            assert_eq!(api.code(), code);
        }
    }
}
