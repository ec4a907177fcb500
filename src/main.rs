//! ctf-watchdog - CTF database reset & watchdog service
//!
//! ## Usage
//!
//! ```bash
//! # Serve: scheduler + HTTP control surface (default)
//! ctf-watchdog
//!
//! # One reset against a database on this machine, then exit 0/1
//! ctf-watchdog --local reset-once
//!
//! # Show the resolved configuration (secrets masked)
//! ctf-watchdog --config watchdog.toml check-config
//! ```
//!
//! ## Environment variables
//!
//! | Variable                 | Description                                  |
//! |--------------------------|----------------------------------------------|
//! | `RESET_INTERVAL`         | Seconds between scheduled resets (900)       |
//! | `MYSQL_HOST`             | Database host (`db`)                         |
//! | `MYSQL_PORT`             | Database port (3306)                         |
//! | `MYSQL_USER`             | Admin user (`root`)                          |
//! | `MYSQL_ROOT_PASSWORD`    | Admin password                               |
//! | `MYSQL_DATABASE`         | Challenge database (`ctf_db`)                |
//! | `INIT_SQL_PATH`          | Seed from this SQL script instead of catalog |
//! | `WATCHDOG_PORT`          | HTTP port (5001)                             |
//! | `CTF_WATCHDOG_CONFIG`    | Path to a `watchdog.toml`                    |
//! | `RUST_LOG`               | Log filter (`info`)                          |

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ctf_watchdog::api::{create_app, AppState, ServiceInfo};
use ctf_watchdog::config::{defaults, WatchdogConfig};
use ctf_watchdog::controller::{
    tracker, ControllerSettings, ResetController, ResetEngine, ScheduleDriver,
};
use ctf_watchdog::seed::catalog::{CtfUniversityCatalog, PlayerAccount};
use ctf_watchdog::seed::{SeedProvider, SqlScriptProvider};
use ctf_watchdog::store::{DataStore, MemoryStore, MySqlStore};
use ctf_watchdog::types::{ResetOrigin, ResetRequest};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "ctf-watchdog")]
#[command(about = "CTF database reset & watchdog service")]
#[command(version)]
struct CliArgs {
    /// Path to a watchdog.toml (default: ./watchdog.toml if present)
    #[arg(long, global = true, env = "CTF_WATCHDOG_CONFIG")]
    config: Option<PathBuf>,

    /// Target a database on this machine (127.0.0.1) and seed from ./init.sql
    /// when it exists
    #[arg(long, global = true)]
    local: bool,

    /// Dry run against an in-process store; no database is touched
    #[arg(long, global = true)]
    memory_store: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Override the HTTP listen address (e.g. 0.0.0.0:5001)
    #[arg(short, long, global = true)]
    addr: Option<String>,

    #[command(subcommand)]
    command: Option<SubCommand>,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Run the scheduler and the HTTP control surface (default)
    Serve,
    /// Perform exactly one reset and exit with its status
    ResetOnce,
    /// Load and validate the configuration, then print it
    CheckConfig,
}

// ============================================================================
// Task bookkeeping
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    Controller,
    Scheduler,
    HttpServer,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::Controller => write!(f, "Controller"),
            TaskName::Scheduler => write!(f, "Scheduler"),
            TaskName::HttpServer => write!(f, "HttpServer"),
        }
    }
}

// ============================================================================
// Setup
// ============================================================================

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn build_config(args: &CliArgs) -> Result<WatchdogConfig> {
    let mut config = WatchdogConfig::resolve(args.config.as_deref())
        .context("Failed to load watchdog configuration")?;

    if args.local {
        config.database.host = "127.0.0.1".to_string();
        let script = Path::new(defaults::LOCAL_INIT_SQL);
        if config.seed.init_sql_path.is_none() && script.exists() {
            config.seed.init_sql_path = Some(script.to_path_buf());
        }
        info!(host = %config.database.host, "Local mode");
    }
    if let Some(addr) = &args.addr {
        config.server.addr = addr.clone();
    }

    config.validate().context("Invalid watchdog configuration")?;
    Ok(config)
}

fn build_store(config: &WatchdogConfig, memory: bool) -> Arc<dyn DataStore> {
    if memory {
        warn!("Using the in-memory store; no database will be touched");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(MySqlStore::new(&config.database))
    }
}

fn build_seed(config: &WatchdogConfig) -> Arc<dyn SeedProvider> {
    match &config.seed.init_sql_path {
        Some(path) => {
            info!(path = %path.display(), "Seeding from SQL script");
            Arc::new(SqlScriptProvider::new(
                path.clone(),
                config.database.name.clone(),
                config.seed.tolerate_script_errors,
            ))
        }
        None => Arc::new(CtfUniversityCatalog::new(
            config.database.name.clone(),
            PlayerAccount {
                username: config.seed.player_user.clone(),
                password: config.seed.player_password.clone(),
                host: config.seed.player_host.clone(),
            },
        )),
    }
}

// ============================================================================
// Commands
// ============================================================================

async fn run_reset_once(config: &WatchdogConfig, store: Arc<dyn DataStore>, seed: Arc<dyn SeedProvider>) -> Result<()> {
    let (writer, _health) = tracker(config.reset.interval_secs);
    let engine = ResetEngine::new(store, seed, writer, config.reset.timeout());

    engine
        .wait_until_ready(
            config.startup.max_retries,
            Duration::from_secs(config.startup.retry_delay_secs),
        )
        .await
        .context("Database never became reachable")?;

    let outcome = engine.perform_reset(&ResetRequest::new(ResetOrigin::Manual)).await;
    if !outcome.success {
        anyhow::bail!(outcome.message());
    }
    info!(duration_ms = outcome.duration_ms(), "{}", outcome.message());
    Ok(())
}

async fn run_serve(
    config: WatchdogConfig,
    store: Arc<dyn DataStore>,
    seed: Arc<dyn SeedProvider>,
    cancel_token: CancellationToken,
) -> Result<()> {
    let seed_source = seed.name().to_string();
    let (writer, health) = tracker(config.reset.interval_secs);
    let engine = ResetEngine::new(store, seed, writer, config.reset.timeout());

    engine
        .wait_until_ready(
            config.startup.max_retries,
            Duration::from_secs(config.startup.retry_delay_secs),
        )
        .await
        .context("Cannot start service without database connection")?;

    let (controller, handle) =
        ResetController::new(engine, health, ControllerSettings::from_config(&config));

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();

    // Task 1: Controller (sole executor of resets)
    task_set.spawn(async move {
        controller.run().await;
        Ok(TaskName::Controller)
    });

    if config.startup.initial_reset {
        info!("Performing initial database reset...");
        match handle
            .request_reset_within(ResetOrigin::Startup, config.reset.outcome_wait())
            .await
        {
            Ok(outcome) if outcome.success => info!("{}", outcome.message()),
            Ok(outcome) => warn!(message = %outcome.message(), "Initial reset failed, the scheduler will retry"),
            Err(e) => warn!(error = %e, "Initial reset did not complete"),
        }
    }

    // Task 2: Schedule Driver
    let driver = ScheduleDriver::new(handle.clone(), config.reset.interval(), config.reset.outcome_wait());
    let scheduler_cancel = cancel_token.clone();
    task_set.spawn(async move {
        driver.run(scheduler_cancel).await;
        Ok(TaskName::Scheduler)
    });

    // Task 3: HTTP Server
    let app = create_app(AppState::new(handle, ServiceInfo::new(&config, &seed_source)));
    let listener = tokio::net::TcpListener::bind(&config.server.addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.addr))?;
    info!(
        address = %config.server.addr,
        interval_secs = config.reset.interval_secs,
        policy = %config.controller.policy,
        seed = %seed_source,
        "CTF watchdog listening"
    );

    let server_cancel = cancel_token.clone();
    task_set.spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                server_cancel.cancelled().await;
                info!("[HttpServer] Received shutdown signal");
            })
            .await
            .context("HTTP server error")?;
        Ok(TaskName::HttpServer)
    });

    run_supervisor(&mut task_set, cancel_token).await
}

/// Watch the tasks until shutdown or a task failure, then drain.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    let mut failure = None;

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("Supervisor: shutdown signal received");
                break;
            }
            result = task_set.join_next() => match result {
                Some(Ok(Ok(task))) => info!(%task, "Supervisor: task completed"),
                Some(Ok(Err(e))) => {
                    error!(error = %e, "Supervisor: task failed");
                    failure = Some(e);
                    cancel_token.cancel();
                    break;
                }
                Some(Err(e)) => {
                    error!(error = %e, "Supervisor: task panicked");
                    failure = Some(anyhow::anyhow!("Task panicked: {e}"));
                    cancel_token.cancel();
                    break;
                }
                None => break,
            },
        }
    }

    // The controller exits once the server and scheduler drop their handles,
    // after finishing any reset already in flight.
    let grace = Duration::from_secs(defaults::SHUTDOWN_GRACE_SECS);
    let drain = async {
        while let Some(result) = task_set.join_next().await {
            if let Ok(Ok(task)) = result {
                info!(%task, "Supervisor: task stopped");
            }
        }
    };
    if tokio::time::timeout(grace, drain).await.is_err() {
        warn!(grace_secs = grace.as_secs(), "Tasks still running after grace period, aborting");
        task_set.abort_all();
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let args = CliArgs::parse();
    init_tracing(args.log_json);

    let config = build_config(&args)?;

    match args.command.unwrap_or(SubCommand::Serve) {
        SubCommand::CheckConfig => {
            println!("{}", config.to_redacted_toml()?);
            Ok(())
        }
        SubCommand::ResetOnce => {
            let store = build_store(&config, args.memory_store);
            let seed = build_seed(&config);
            run_reset_once(&config, store, seed).await
        }
        SubCommand::Serve => {
            info!("CTF Database Reset & Watchdog Service starting");
            let store = build_store(&config, args.memory_store);
            let seed = build_seed(&config);

            let cancel_token = CancellationToken::new();
            let shutdown_token = cancel_token.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                info!("Received shutdown signal, stopping...");
                shutdown_token.cancel();
            });

            run_serve(config, store, seed, cancel_token).await?;
            info!("CTF watchdog shut down gracefully");
            Ok(())
        }
    }
}
