//! System-wide default constants.
//!
//! Grouped by subsystem. Values match the container deployment's
//! environment defaults.

// ============================================================================
// Reset schedule
// ============================================================================

/// Seconds between scheduled resets (15 minutes).
pub const RESET_INTERVAL_SECS: u64 = 900;

/// Upper bound on a single reset attempt before it is declared failed.
pub const RESET_TIMEOUT_SECS: u64 = 120;

/// How long a manual `POST /reset` caller waits for the outcome.
///
/// The reset keeps running after the caller gives up.
pub const MANUAL_WAIT_SECS: u64 = 45;

/// Added to the reset timeout when the scheduler or startup waits on an
/// outcome, so the engine's own bound always fires first.
pub const OUTCOME_WAIT_SLACK_SECS: u64 = 5;

/// How long shutdown waits for in-flight work before aborting tasks.
pub const SHUTDOWN_GRACE_SECS: u64 = 10;

// ============================================================================
// Controller
// ============================================================================

/// Pending reset requests the controller queue accepts before refusing.
pub const REQUEST_QUEUE_CAPACITY: usize = 64;

// ============================================================================
// Data store
// ============================================================================

pub const DATABASE_HOST: &str = "db";
pub const DATABASE_PORT: u16 = 3306;
pub const DATABASE_USER: &str = "root";
pub const DATABASE_NAME: &str = "ctf_db";
pub const DATABASE_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Development-only root password; production deployments set
/// `MYSQL_ROOT_PASSWORD`.
pub const DEV_ROOT_PASSWORD: &str = "super_secure_root_password_123";

// ============================================================================
// Startup
// ============================================================================

/// Store readiness probes before giving up at startup.
pub const STARTUP_MAX_RETRIES: u32 = 30;

/// Delay between readiness probes (seconds).
pub const STARTUP_RETRY_DELAY_SECS: u64 = 2;

// ============================================================================
// Control surface
// ============================================================================

/// HTTP listen port.
pub const SERVER_PORT: u16 = 5001;

/// Config file looked up in the working directory when no path is given.
pub const LOCAL_CONFIG_FILE: &str = "watchdog.toml";

/// Seed script used by `--local` when present in the working directory.
pub const LOCAL_INIT_SQL: &str = "init.sql";
