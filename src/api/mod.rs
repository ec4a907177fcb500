//! HTTP control surface using Axum
//!
//! - `GET /health` - controller health snapshot
//! - `POST /reset` - manual reset, waits for the outcome
//! - `GET /` - static service description

pub mod error;
pub mod handlers;
mod routes;

pub use error::ApiError;
pub use routes::control_routes;

use axum::http::{header, Method};
use axum::Router;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::{ConcurrencyPolicy, WatchdogConfig};
use crate::controller::ResetHandle;

/// Service name reported by `/health`
pub const HEALTH_SERVICE_NAME: &str = "CTF Database Reset Service";

/// Service name reported by `/`
pub const SERVICE_NAME: &str = "CTF Database Reset & Watchdog Service";

/// Shared state for every handler
#[derive(Clone)]
pub struct AppState {
    pub controller: ResetHandle,
    pub info: Arc<ServiceInfo>,
}

impl AppState {
    pub fn new(controller: ResetHandle, info: ServiceInfo) -> Self {
        Self {
            controller,
            info: Arc::new(info),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Endpoints {
    pub health_check: &'static str,
    pub manual_reset: &'static str,
    pub info: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceConfiguration {
    pub mysql_host: String,
    pub database: String,
    pub reset_interval_minutes: f64,
    pub automatic_reset: bool,
    pub concurrency_policy: ConcurrencyPolicy,
    pub seed_source: String,
}

/// Body of `GET /`; fixed for the lifetime of the process.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub service: &'static str,
    pub version: &'static str,
    pub endpoints: Endpoints,
    pub configuration: ServiceConfiguration,
}

impl ServiceInfo {
    pub fn new(config: &WatchdogConfig, seed_source: &str) -> Self {
        Self {
            service: SERVICE_NAME,
            version: env!("CARGO_PKG_VERSION"),
            endpoints: Endpoints {
                health_check: "GET /health",
                manual_reset: "POST /reset",
                info: "GET /",
            },
            configuration: ServiceConfiguration {
                mysql_host: config.database.host.clone(),
                database: config.database.name.clone(),
                reset_interval_minutes: config.reset.interval_secs as f64 / 60.0,
                automatic_reset: true,
                concurrency_policy: config.controller.policy,
                seed_source: seed_source.to_string(),
            },
        }
    }
}

/// Same-origin only unless `WATCHDOG_CORS_ORIGINS` lists allowed origins
/// (comma-separated), e.g. for a CTF scoreboard on another host.
fn build_cors_layer() -> CorsLayer {
    match std::env::var("WATCHDOG_CORS_ORIGINS") {
        Ok(origins) => {
            let allowed: Vec<_> = origins
                .split(',')
                .filter_map(|o| o.trim().parse().ok())
                .collect();
            tracing::info!(origins = %origins, "CORS: allowing configured origins");
            CorsLayer::new()
                .allow_origin(allowed)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE])
        }
        Err(_) => CorsLayer::new()
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE]),
    }
}

/// Create the complete application router.
pub fn create_app(state: AppState) -> Router {
    control_routes(state)
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer())
}
