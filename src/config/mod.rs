//! Watchdog Configuration Module
//!
//! Loaded from TOML, then overridden from the environment variables the
//! container deployment already sets.
//!
//! ## Loading Order
//!
//! 1. `--config <path>` / `CTF_WATCHDOG_CONFIG` (must exist and parse)
//! 2. `watchdog.toml` in the current working directory
//! 3. Built-in defaults
//!
//! Environment overrides (`RESET_INTERVAL`, `MYSQL_HOST`, `MYSQL_PORT`,
//! `MYSQL_USER`, `MYSQL_ROOT_PASSWORD`, `MYSQL_DATABASE`, `INIT_SQL_PATH`,
//! `WATCHDOG_PORT`) are applied on top, then the result is validated.
//!
//! The config is passed by value to the components that need it; there is
//! no global instance.

mod watchdog_config;
pub mod defaults;

pub use watchdog_config::*;
