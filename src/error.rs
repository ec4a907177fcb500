//! Reset error taxonomy
//!
//! Store and seed failures, and an attempt that overruns the engine's own
//! bound, are folded into a failed `ResetOutcome` and the controller goes
//! `Degraded`. `ConcurrencyRejected`, a caller-side `Timeout` and
//! `ControllerUnavailable` are returned to the caller only and never change
//! controller state.

use std::time::Duration;
use thiserror::Error;

/// Why a reset attempt (or a caller's wait for one) did not succeed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResetError {
    #[error("data store unreachable: {0}")]
    Connectivity(String),

    #[error("schema apply failed at statement {statement}: {message}")]
    SchemaApply { statement: usize, message: String },

    #[error("seed apply failed for table {table}: {message}")]
    SeedApply { table: String, message: String },

    #[error("another reset is in progress")]
    ConcurrencyRejected,

    #[error("reset did not complete within {0:?}")]
    Timeout(Duration),

    #[error("reset controller is not running")]
    ControllerUnavailable,
}

impl ResetError {
    /// Stable machine-readable code used in HTTP error bodies
    pub fn code(&self) -> &'static str {
        match self {
            ResetError::Connectivity(_) => "CONNECTIVITY",
            ResetError::SchemaApply { .. } => "SCHEMA_APPLY",
            ResetError::SeedApply { .. } => "SEED_APPLY",
            ResetError::ConcurrencyRejected => "BUSY",
            ResetError::Timeout(_) => "TIMEOUT",
            ResetError::ControllerUnavailable => "UNAVAILABLE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct_for_caller_facing_errors() {
        assert_ne!(
            ResetError::ConcurrencyRejected.code(),
            ResetError::Timeout(Duration::from_secs(1)).code()
        );
    }

    #[test]
    fn test_display_includes_cause() {
        let e = ResetError::SeedApply {
            table: "users".into(),
            message: "duplicate key".into(),
        };
        assert_eq!(e.to_string(), "seed apply failed for table users: duplicate key");
    }
}
