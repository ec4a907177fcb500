//! Watchdog Configuration - schedule, store, seed and control-surface settings
//!
//! Every section implements `Default`, so a missing file or a partial file
//! yields the same behaviour as the stock container deployment.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use super::defaults;
use crate::seed::validate_identifier;

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one watchdog deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Reset schedule and bounds
    #[serde(default)]
    pub reset: ResetConfig,

    /// Challenge data store connection
    #[serde(default)]
    pub database: DatabaseConfig,

    /// HTTP control surface
    #[serde(default)]
    pub server: ServerConfig,

    /// Seed source and player account
    #[serde(default)]
    pub seed: SeedConfig,

    /// Request serialization
    #[serde(default)]
    pub controller: ControllerConfig,

    /// Store readiness wait and initial reset
    #[serde(default)]
    pub startup: StartupConfig,
}

impl WatchdogConfig {
    /// Load using the standard search order, without environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            let config = Self::load_from_file(path)?;
            info!(path = %path.display(), "Loaded watchdog config");
            return Ok(config);
        }

        let local = PathBuf::from(defaults::LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(path = %local.display(), "Loaded watchdog config from working directory");
                    return Ok(config);
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./watchdog.toml, using defaults");
                }
            }
        }

        info!("No watchdog.toml found, using built-in defaults");
        Ok(Self::default())
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
    }

    /// File plus process environment. Callers apply their own CLI overrides
    /// afterwards and then call [`WatchdogConfig::validate`].
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::load(explicit)?;
        for w in config.apply_overrides(|key| std::env::var(key).ok()) {
            warn!("{}", w);
        }
        Ok(config)
    }

    /// Apply environment-style overrides through `lookup`.
    ///
    /// Returns a warning for every variable that was set but could not be
    /// parsed; those keep their previous value.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut warnings = Vec::new();

        fn parse_into<T: std::str::FromStr>(
            key: &str,
            raw: Option<String>,
            target: &mut T,
            warnings: &mut Vec<String>,
        ) {
            if let Some(raw) = raw {
                match raw.trim().parse() {
                    Ok(v) => *target = v,
                    Err(_) => warnings.push(format!("Ignoring {key}={raw:?}: not a valid value")),
                }
            }
        }

        parse_into("RESET_INTERVAL", lookup("RESET_INTERVAL"), &mut self.reset.interval_secs, &mut warnings);
        parse_into("MYSQL_PORT", lookup("MYSQL_PORT"), &mut self.database.port, &mut warnings);

        if let Some(host) = lookup("MYSQL_HOST") {
            self.database.host = host;
        }
        if let Some(user) = lookup("MYSQL_USER") {
            self.database.user = user;
        }
        if let Some(password) = lookup("MYSQL_ROOT_PASSWORD") {
            self.database.password = password;
        }
        if let Some(name) = lookup("MYSQL_DATABASE") {
            self.database.name = name;
        }
        if let Some(path) = lookup("INIT_SQL_PATH") {
            self.seed.init_sql_path = Some(PathBuf::from(path));
        }

        if let Some(raw) = lookup("WATCHDOG_PORT") {
            match raw.trim().parse::<u16>() {
                Ok(port) => self.server.addr = format!("0.0.0.0:{port}"),
                Err(_) => warnings.push(format!("Ignoring WATCHDOG_PORT={raw:?}: not a valid value")),
            }
        }

        warnings
    }

    /// Validate all values for internal consistency, collecting every problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        if self.reset.interval_secs == 0 {
            errors.push("reset.interval_secs must be > 0".to_string());
        }
        if self.reset.timeout_secs == 0 {
            errors.push("reset.timeout_secs must be > 0".to_string());
        }
        if self.reset.manual_wait_secs == 0 {
            errors.push("reset.manual_wait_secs must be > 0".to_string());
        }
        if self.controller.queue_capacity == 0 {
            errors.push("controller.queue_capacity must be > 0".to_string());
        }
        if self.startup.max_retries == 0 {
            errors.push("startup.max_retries must be > 0".to_string());
        }
        if self.database.host.trim().is_empty() {
            errors.push("database.host must not be empty".to_string());
        }
        if self.database.port == 0 {
            errors.push("database.port must be > 0".to_string());
        }
        if self.database.connect_timeout_secs == 0 {
            errors.push("database.connect_timeout_secs must be > 0".to_string());
        }
        if validate_identifier(&self.database.name).is_err() {
            errors.push(format!(
                "database.name {:?} must be a plain identifier ([A-Za-z_][A-Za-z0-9_]*)",
                self.database.name
            ));
        }
        if self.seed.player_user.trim().is_empty() {
            errors.push("seed.player_user must not be empty".to_string());
        }
        if self.server.addr.parse::<SocketAddr>().is_err() {
            errors.push(format!(
                "server.addr {:?} is not a valid socket address",
                self.server.addr
            ));
        }

        if self.database.password == defaults::DEV_ROOT_PASSWORD {
            warn!("MYSQL_ROOT_PASSWORD not set, using the development default. Do NOT expose this deployment");
        }
        if let Some(path) = &self.seed.init_sql_path {
            if !path.exists() {
                warn!(path = %path.display(), "Seed script does not exist yet; resets will fail until it does");
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Serialize to TOML with secrets masked (for `check-config` output).
    pub fn to_redacted_toml(&self) -> Result<String, ConfigError> {
        let mut copy = self.clone();
        copy.database.password = "********".to_string();
        copy.seed.player_password = "********".to_string();
        toml::to_string_pretty(&copy).map_err(ConfigError::Serialize)
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {1}", .0.display())]
    Io(PathBuf, std::io::Error),

    #[error("Config parse error ({}): {1}", .0.display())]
    Parse(PathBuf, toml::de::Error),

    #[error("Config serialization error: {0}")]
    Serialize(toml::ser::Error),

    #[error("Config validation failed:\n  - {}", .0.join("\n  - "))]
    Validation(Vec<String>),
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetConfig {
    /// Seconds between scheduled resets
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Upper bound on one reset attempt
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// How long a manual caller waits for the outcome
    #[serde(default = "default_manual_wait_secs")]
    pub manual_wait_secs: u64,
}

fn default_interval_secs() -> u64 {
    defaults::RESET_INTERVAL_SECS
}
fn default_timeout_secs() -> u64 {
    defaults::RESET_TIMEOUT_SECS
}
fn default_manual_wait_secs() -> u64 {
    defaults::MANUAL_WAIT_SECS
}

impl Default for ResetConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            timeout_secs: default_timeout_secs(),
            manual_wait_secs: default_manual_wait_secs(),
        }
    }
}

impl ResetConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn manual_wait(&self) -> Duration {
        Duration::from_secs(self.manual_wait_secs)
    }

    /// Bound for callers that must see the engine's verdict, timeout included
    pub fn outcome_wait(&self) -> Duration {
        self.timeout() + Duration::from_secs(defaults::OUTCOME_WAIT_SLACK_SECS)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_host")]
    pub host: String,

    #[serde(default = "default_db_port")]
    pub port: u16,

    /// Administrative account used to drop and recreate the schema
    #[serde(default = "default_db_user")]
    pub user: String,

    #[serde(default = "default_db_password")]
    pub password: String,

    /// Challenge database players connect to
    #[serde(default = "default_db_name")]
    pub name: String,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_db_host() -> String {
    defaults::DATABASE_HOST.to_string()
}
fn default_db_port() -> u16 {
    defaults::DATABASE_PORT
}
fn default_db_user() -> String {
    defaults::DATABASE_USER.to_string()
}
fn default_db_password() -> String {
    defaults::DEV_ROOT_PASSWORD.to_string()
}
fn default_db_name() -> String {
    defaults::DATABASE_NAME.to_string()
}
fn default_connect_timeout_secs() -> u64 {
    defaults::DATABASE_CONNECT_TIMEOUT_SECS
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_db_host(),
            port: default_db_port(),
            user: default_db_user(),
            password: default_db_password(),
            name: default_db_name(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP bind address.
    ///
    /// Overridden by `WATCHDOG_PORT` (binds `0.0.0.0:<port>`) or `--addr`.
    #[serde(default = "default_server_addr")]
    pub addr: String,
}

fn default_server_addr() -> String {
    format!("0.0.0.0:{}", defaults::SERVER_PORT)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_server_addr(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedConfig {
    /// `init.sql` to replay on every reset; the built-in catalog when unset
    #[serde(default)]
    pub init_sql_path: Option<PathBuf>,

    /// Log and skip failing script statements instead of failing the reset.
    /// On by default: fresh-server scripts carry statements (plain
    /// `CREATE USER`) that fail on every replay after the first.
    #[serde(default = "default_tolerate_script_errors")]
    pub tolerate_script_errors: bool,

    #[serde(default = "default_player_user")]
    pub player_user: String,

    #[serde(default = "default_player_password")]
    pub player_password: String,

    /// MySQL host pattern the player account may connect from
    #[serde(default = "default_player_host")]
    pub player_host: String,
}

fn default_tolerate_script_errors() -> bool {
    true
}
fn default_player_user() -> String {
    "ctf_player".to_string()
}
fn default_player_password() -> String {
    "player_password_456".to_string()
}
fn default_player_host() -> String {
    "%".to_string()
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            init_sql_path: None,
            tolerate_script_errors: default_tolerate_script_errors(),
            player_user: default_player_user(),
            player_password: default_player_password(),
            player_host: default_player_host(),
        }
    }
}

/// What happens to a reset request that arrives while one is running
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConcurrencyPolicy {
    /// Wait for the in-flight reset and share its outcome
    #[default]
    Coalesce,
    /// Answer immediately with a busy error
    Reject,
}

impl std::fmt::Display for ConcurrencyPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConcurrencyPolicy::Coalesce => write!(f, "coalesce"),
            ConcurrencyPolicy::Reject => write!(f, "reject"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default)]
    pub policy: ConcurrencyPolicy,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    defaults::REQUEST_QUEUE_CAPACITY
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            policy: ConcurrencyPolicy::default(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Reset once as soon as the store is reachable
    #[serde(default = "default_initial_reset")]
    pub initial_reset: bool,
}

fn default_max_retries() -> u32 {
    defaults::STARTUP_MAX_RETRIES
}
fn default_retry_delay_secs() -> u64 {
    defaults::STARTUP_RETRY_DELAY_SECS
}
fn default_initial_reset() -> bool {
    true
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            initial_reset: default_initial_reset(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
