//! ctf-watchdog: reset controller for an intentionally vulnerable CTF database
//!
//! Players mutate the challenge database; this service puts it back.
//!
//! ## Architecture
//!
//! - **Reset Engine**: drops, recreates and reseeds every table in one attempt
//! - **Schedule Driver**: fires a reset request every `reset.interval_secs`
//! - **Control Surface**: `GET /health`, `POST /reset`, `GET /`
//! - **Health Tracker**: single-writer record of reset count and status
//!
//! Every trigger goes through one controller actor, so resets never overlap.

pub mod api;
pub mod config;
pub mod controller;
pub mod error;
pub mod seed;
pub mod store;
pub mod types;

pub use config::WatchdogConfig;
pub use controller::{ResetController, ResetEngine, ResetHandle, ScheduleDriver};
pub use error::ResetError;
pub use types::{ControllerStatus, HealthSnapshot, ResetOrigin, ResetOutcome, ResetRequest};
