//! Reset Controller - the single executor behind every reset trigger
//!
//! All triggers (schedule, `POST /reset`, startup) submit a [`ResetRequest`]
//! through a cloneable [`ResetHandle`]. One [`ResetController`] task owns the
//! [`ResetEngine`] and consumes the queue, so at most one reset touches the
//! store at any time.
//!
//! Requests already queued when the controller picks up work share that
//! execution. Requests that arrive while a reset is running are handled per
//! [`ConcurrencyPolicy`]: `coalesce` attaches them to the running attempt,
//! `reject` answers them with [`ResetError::ConcurrencyRejected`].

pub mod engine;
pub mod health;
pub mod schedule;

use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::{ConcurrencyPolicy, WatchdogConfig};
use crate::error::ResetError;
use crate::types::{HealthSnapshot, ResetOrigin, ResetOutcome, ResetRequest};

pub use engine::ResetEngine;
pub use health::{tracker, HealthHandle, HealthWriter};
pub use schedule::ScheduleDriver;

/// Reply channel for one submitted request
pub type Responder = oneshot::Sender<Result<ResetOutcome, ResetError>>;

// ============================================================================
// Commands
// ============================================================================

/// A queued reset request plus the channel its outcome goes back on
#[derive(Debug)]
pub struct PendingReset {
    pub request: ResetRequest,
    pub respond_to: Responder,
}

impl PendingReset {
    fn reject(self) {
        debug!(origin = %self.request.origin, "Rejecting reset request, another reset is in progress");
        let _ = self.respond_to.send(Err(ResetError::ConcurrencyRejected));
    }
}

/// Controller tuning taken from the `[controller]` and `[reset]` sections
#[derive(Debug, Clone, Copy)]
pub struct ControllerSettings {
    pub policy: ConcurrencyPolicy,
    pub queue_capacity: usize,
    pub manual_wait: Duration,
}

impl ControllerSettings {
    pub fn from_config(config: &WatchdogConfig) -> Self {
        Self {
            policy: config.controller.policy,
            queue_capacity: config.controller.queue_capacity,
            manual_wait: config.reset.manual_wait(),
        }
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Cloneable front door to the controller
#[derive(Clone)]
pub struct ResetHandle {
    tx: mpsc::Sender<PendingReset>,
    health: HealthHandle,
    manual_wait: Duration,
}

impl ResetHandle {
    /// Current health snapshot; never waits on a running reset.
    pub fn health(&self) -> HealthSnapshot {
        self.health.snapshot()
    }

    pub fn health_handle(&self) -> &HealthHandle {
        &self.health
    }

    /// Enqueue a request without waiting for the outcome.
    ///
    /// Fails fast when the queue is full or the controller has stopped.
    pub fn submit(&self, origin: ResetOrigin) -> Result<oneshot::Receiver<Result<ResetOutcome, ResetError>>, ResetError> {
        let (respond_to, response_rx) = oneshot::channel();
        let pending = PendingReset {
            request: ResetRequest::new(origin),
            respond_to,
        };
        self.tx.try_send(pending).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                warn!(%origin, "Reset queue full, refusing request");
                ResetError::ConcurrencyRejected
            }
            mpsc::error::TrySendError::Closed(_) => ResetError::ControllerUnavailable,
        })?;
        Ok(response_rx)
    }

    /// Submit and wait up to the configured manual wait.
    pub async fn request_reset(&self, origin: ResetOrigin) -> Result<ResetOutcome, ResetError> {
        self.request_reset_within(origin, self.manual_wait).await
    }

    /// Submit and wait up to `wait`. A timed-out caller does not cancel the
    /// reset; it keeps running and still updates the health record.
    pub async fn request_reset_within(
        &self,
        origin: ResetOrigin,
        wait: Duration,
    ) -> Result<ResetOutcome, ResetError> {
        let response_rx = self.submit(origin)?;
        match tokio::time::timeout(wait, response_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ResetError::ControllerUnavailable),
            Err(_) => {
                warn!(%origin, wait_secs = wait.as_secs(), "Gave up waiting for reset outcome");
                Err(ResetError::Timeout(wait))
            }
        }
    }
}

// ============================================================================
// Controller
// ============================================================================

pub struct ResetController {
    engine: ResetEngine,
    rx: mpsc::Receiver<PendingReset>,
    policy: ConcurrencyPolicy,
}

impl ResetController {
    /// Create the controller and its handle. `health` must be the reader half
    /// of the tracker whose writer went into `engine`.
    pub fn new(engine: ResetEngine, health: HealthHandle, settings: ControllerSettings) -> (Self, ResetHandle) {
        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));

        let controller = Self {
            engine,
            rx,
            policy: settings.policy,
        };
        let handle = ResetHandle {
            tx,
            health,
            manual_wait: settings.manual_wait,
        };

        (controller, handle)
    }

    /// Run until every handle is dropped.
    pub async fn run(self) {
        let Self {
            engine,
            mut rx,
            policy,
        } = self;
        info!(%policy, "Reset controller started");

        while let Some(first) = rx.recv().await {
            let request = first.request;
            let mut waiters = vec![first];
            while let Ok(queued) = rx.try_recv() {
                waiters.push(queued);
            }

            let outcome = {
                let reset = engine.perform_reset(&request);
                tokio::pin!(reset);
                loop {
                    tokio::select! {
                        outcome = &mut reset => break outcome,
                        Some(incoming) = rx.recv() => match policy {
                            ConcurrencyPolicy::Coalesce => {
                                debug!(origin = %incoming.request.origin, "Coalescing into running reset");
                                waiters.push(incoming);
                            }
                            ConcurrencyPolicy::Reject => incoming.reject(),
                        },
                    }
                }
            };

            if waiters.len() > 1 {
                let origins: Vec<String> = waiters.iter().map(|w| w.request.origin.to_string()).collect();
                info!(
                    attempt_id = %outcome.attempt_id,
                    requests = waiters.len(),
                    origins = %origins.join(","),
                    "Reset served multiple requests"
                );
            }

            for waiter in waiters {
                let _ = waiter.respond_to.send(Ok(outcome.clone()));
            }
        }

        info!("Reset controller stopped");
    }
}
