//! Reset Engine: one atomic "tear down and reseed" against the data store
//!
//! Callers never run this directly: the controller actor owns the only
//! engine, which is what makes resets mutually exclusive.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::health::HealthWriter;
use crate::error::ResetError;
use crate::seed::{SeedPlan, SeedProvider, Statement};
use crate::store::{DataStore, StoreError, StoreSession};
use crate::types::{ResetOutcome, ResetRequest};

/// Counters from one successful apply, for logging
#[derive(Debug, Clone, Copy, Default)]
struct ApplyStats {
    statements: usize,
    skipped: usize,
    tables_verified: usize,
}

pub struct ResetEngine {
    store: Arc<dyn DataStore>,
    seed: Arc<dyn SeedProvider>,
    health: HealthWriter,
    reset_timeout: Duration,
}

impl ResetEngine {
    pub fn new(
        store: Arc<dyn DataStore>,
        seed: Arc<dyn SeedProvider>,
        health: HealthWriter,
        reset_timeout: Duration,
    ) -> Self {
        Self {
            store,
            seed,
            health,
            reset_timeout,
        }
    }

    /// Probe the store until it answers, `max_retries` times at most.
    pub async fn wait_until_ready(&self, max_retries: u32, delay: Duration) -> Result<(), ResetError> {
        let target = self.store.describe();
        info!(target_addr = %target, "Waiting for data store to be ready...");

        for attempt in 1..=max_retries {
            match self.store.ping().await {
                Ok(()) => {
                    info!(target_addr = %target, attempt, "Data store is ready");
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, max_retries, error = %e, "Data store not ready yet");
                    if attempt < max_retries {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        error!(target_addr = %target, max_retries, "Data store unreachable after maximum retries");
        Err(ResetError::Connectivity(format!(
            "{target} not reachable after {max_retries} attempts"
        )))
    }

    /// Run one reset attempt and fold its result into the health record.
    ///
    /// Never panics and never returns early: every attempt produces an
    /// outcome, and the controller leaves `Resetting` on every path.
    pub async fn perform_reset(&self, request: &ResetRequest) -> ResetOutcome {
        let attempt_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        self.health.begin_reset();

        info!(
            attempt_id = %attempt_id,
            origin = %request.origin,
            queued_ms = (started_at - request.requested_at).num_milliseconds(),
            seed = self.seed.name(),
            "Starting database reset"
        );

        let result = match tokio::time::timeout(self.reset_timeout, self.apply()).await {
            Ok(result) => result,
            Err(_) => Err(ResetError::Timeout(self.reset_timeout)),
        };

        let finished_at = Utc::now();
        let (success, error, stats) = match result {
            Ok(stats) => (true, None, stats),
            Err(e) => (false, Some(e), ApplyStats::default()),
        };
        let reset_count =
            self.health
                .finish_reset(success, finished_at, error.as_ref().map(ToString::to_string));

        let outcome = ResetOutcome {
            attempt_id,
            origin: request.origin,
            success,
            started_at,
            finished_at,
            error,
            reset_count,
        };

        match &outcome.error {
            None => info!(
                attempt_id = %outcome.attempt_id,
                reset_count,
                statements = stats.statements,
                skipped = stats.skipped,
                tables_verified = stats.tables_verified,
                duration_ms = outcome.duration_ms(),
                "Database reset completed"
            ),
            Some(e) => error!(
                attempt_id = %outcome.attempt_id,
                reset_count,
                code = e.code(),
                error = %e,
                duration_ms = outcome.duration_ms(),
                "Database reset failed, controller degraded"
            ),
        }

        outcome
    }

    async fn apply(&self) -> Result<ApplyStats, ResetError> {
        let plan = self.seed.plan().await.map_err(|e| ResetError::SchemaApply {
            statement: 0,
            message: e.to_string(),
        })?;
        let statements = plan.render().map_err(|e| ResetError::SchemaApply {
            statement: 0,
            message: e.to_string(),
        })?;

        let mut session = self
            .store
            .open_session()
            .await
            .map_err(|e| ResetError::Connectivity(e.to_string()))?;

        debug!(statements = statements.len(), "Executing reset statements");

        let mut skipped = 0;
        for (idx, statement) in statements.iter().enumerate() {
            let position = idx + 1;
            if let Err(e) = session.execute(statement).await {
                if statement.may_fail() && !matches!(e, StoreError::Connect(_)) {
                    warn!(statement = position, error = %e, "Script statement failed, continuing");
                    skipped += 1;
                    continue;
                }
                return Err(attribute_failure(position, statement, e));
            }
        }

        session.commit().await.map_err(|e| match e {
            StoreError::Connect(msg) => ResetError::Connectivity(msg),
            StoreError::Statement(msg) => ResetError::SchemaApply {
                statement: statements.len(),
                message: format!("commit failed: {msg}"),
            },
        })?;

        let tables_verified = verify_seed(session.as_mut(), &plan).await?;

        Ok(ApplyStats {
            statements: statements.len(),
            skipped,
            tables_verified,
        })
    }
}

/// Map a statement failure onto the error taxonomy
fn attribute_failure(position: usize, statement: &Statement, e: StoreError) -> ResetError {
    match e {
        StoreError::Connect(msg) => ResetError::Connectivity(msg),
        StoreError::Statement(message) if statement.phase().is_seed() => ResetError::SeedApply {
            table: statement.table().unwrap_or("<script>").to_string(),
            message,
        },
        StoreError::Statement(message) => ResetError::SchemaApply {
            statement: position,
            message,
        },
    }
}

/// Check every table the plan builds once the reset has committed
async fn verify_seed(session: &mut dyn StoreSession, plan: &SeedPlan) -> Result<usize, ResetError> {
    let expected = plan.expectations();
    for (table, want) in &expected {
        let got = session.count_rows(table).await.map_err(|e| match e {
            StoreError::Connect(msg) => ResetError::Connectivity(msg),
            StoreError::Statement(message) => ResetError::SeedApply {
                table: table.clone(),
                message,
            },
        })?;
        if !want.is_met(got) {
            return Err(ResetError::SeedApply {
                table: table.clone(),
                message: format!("expected {want} after reset, found {got} rows"),
            });
        }
    }
    Ok(expected.len())
}
