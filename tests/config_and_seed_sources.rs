//! Config Loading and Seed Source Tests
//!
//! File-backed configuration and SQL-script seeding, using temp files.

use ctf_watchdog::config::{ConcurrencyPolicy, ConfigError, WatchdogConfig};
use ctf_watchdog::controller::{tracker, HealthHandle, ResetEngine};
use ctf_watchdog::seed::{SeedProvider, SeedValue, SqlScriptProvider};
use ctf_watchdog::store::{Faults, MemoryStore};
use ctf_watchdog::{ControllerStatus, ResetError, ResetOrigin, ResetOutcome, ResetRequest};

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn write_temp(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

// ============================================================================
// Configuration files
// ============================================================================

#[test]
fn explicit_config_file_is_loaded() {
    let file = write_temp(
        r#"
[reset]
interval_secs = 600
manual_wait_secs = 30

[database]
host = "mysql.internal"
name = "ctf_university"

[controller]
policy = "reject"
queue_capacity = 8
"#,
    );

    let config = WatchdogConfig::load(Some(file.path())).unwrap();
    assert_eq!(config.reset.interval_secs, 600);
    assert_eq!(config.reset.manual_wait(), Duration::from_secs(30));
    assert_eq!(config.database.host, "mysql.internal");
    assert_eq!(config.database.name, "ctf_university");
    assert_eq!(config.database.port, 3306);
    assert_eq!(config.controller.policy, ConcurrencyPolicy::Reject);
    assert!(config.validate().is_ok());
}

#[test]
fn missing_explicit_config_is_an_error() {
    let result = WatchdogConfig::load(Some(Path::new("/nonexistent/watchdog.toml")));
    assert!(matches!(result, Err(ConfigError::Io(..))));
}

#[test]
fn malformed_config_reports_parse_error() {
    let file = write_temp("[reset\ninterval_secs = 600\n");
    let result = WatchdogConfig::load(Some(file.path()));
    assert!(matches!(result, Err(ConfigError::Parse(..))));
}

#[test]
fn wrong_type_is_a_parse_error() {
    let file = write_temp("[reset]\ninterval_secs = \"fifteen minutes\"\n");
    assert!(matches!(
        WatchdogConfig::load_from_file(file.path()),
        Err(ConfigError::Parse(..))
    ));
}

#[test]
fn redacted_toml_round_trips_through_loader() {
    let mut config = WatchdogConfig::default();
    config.reset.interval_secs = 1200;
    let file = write_temp(&config.to_redacted_toml().unwrap());

    let reloaded = WatchdogConfig::load_from_file(file.path()).unwrap();
    assert_eq!(reloaded.reset.interval_secs, 1200);
    assert_eq!(reloaded.database.password, "********");
}

// ============================================================================
// SQL script seeding
// ============================================================================

const INIT_SQL: &str = r#"
-- CTF database bootstrap
CREATE DATABASE IF NOT EXISTS ctf_db;
USE ctf_db;
DROP TABLE IF EXISTS users;
CREATE TABLE users (id INT PRIMARY KEY, username VARCHAR(50), note TEXT);
INSERT INTO users VALUES (1, 'admin', 'semi;colon'), (2, 'alice', 'it''s fine');
GRANT SELECT ON ctf_db.* TO 'ctf_player'@'%';
"#;

fn script_engine_with(store: &MemoryStore, path: &Path, tolerate: bool) -> (ResetEngine, HealthHandle) {
    let (writer, health) = tracker(900);
    let engine = ResetEngine::new(
        Arc::new(store.clone()),
        Arc::new(SqlScriptProvider::new(path, "ctf_db", tolerate)),
        writer,
        Duration::from_secs(120),
    );
    (engine, health)
}

fn script_engine(store: &MemoryStore, path: &Path) -> ResetEngine {
    script_engine_with(store, path, false).0
}

async fn manual_reset(engine: &ResetEngine) -> ResetOutcome {
    engine
        .perform_reset(&ResetRequest::new(ResetOrigin::Manual))
        .await
}

/// Written for a fresh server: nothing is dropped, the account is created
/// unconditionally
const FRESH_SERVER_SQL: &str = r#"
CREATE DATABASE IF NOT EXISTS ctf_db;
USE ctf_db;
CREATE TABLE IF NOT EXISTS users (id INT PRIMARY KEY, username VARCHAR(50));
CREATE TABLE IF NOT EXISTS grades (id INT PRIMARY KEY, user_id INT, grade CHAR(2));
INSERT INTO users VALUES (1, 'admin'), (2, 'alice');
INSERT INTO grades VALUES (1, 2, 'B+');
CREATE USER 'ctf_player'@'%' IDENTIFIED BY 'player_password_456';
GRANT SELECT, INSERT, UPDATE, DELETE ON ctf_db.* TO 'ctf_player'@'%';
"#;

#[tokio::test]
async fn script_statements_run_in_file_order() {
    let file = write_temp(INIT_SQL);
    let store = MemoryStore::new();
    let engine = script_engine(&store, file.path());

    let outcome = engine
        .perform_reset(&ResetRequest::new(ResetOrigin::Manual))
        .await;
    assert!(outcome.success, "{:?}", outcome.error);

    let executed = store.executed_sql();
    let position = |needle: &str| {
        executed
            .iter()
            .position(|s| s.contains(needle))
            .unwrap_or_else(|| panic!("{needle} not executed: {executed:?}"))
    };
    assert!(position("DROP TABLE IF EXISTS users") < position("CREATE TABLE users"));
    assert!(position("CREATE TABLE users") < position("INSERT INTO users"));
    assert!(position("INSERT INTO users") < position("GRANT SELECT"));
    assert!(executed.iter().all(|s| !s.contains("-- CTF")));
}

#[tokio::test]
async fn missing_script_fails_the_attempt() {
    let store = MemoryStore::new();
    let engine = script_engine(&store, Path::new("/nonexistent/init.sql"));

    let outcome = engine
        .perform_reset(&ResetRequest::new(ResetOrigin::Manual))
        .await;
    assert!(!outcome.success);
    assert!(matches!(outcome.error, Some(ResetError::SchemaApply { .. })));
    assert_eq!(store.sessions_opened(), 0);
}

#[tokio::test]
async fn script_provider_reports_its_source() {
    let file = write_temp(INIT_SQL);
    let provider = SqlScriptProvider::new(file.path(), "ctf_db", false);
    assert_eq!(provider.name(), "script");

    let plan = provider.plan().await.unwrap();
    assert_eq!(plan.database, "ctf_db");
    assert!(!plan.script.is_empty());
}

#[tokio::test]
async fn fresh_server_script_discards_player_rows() {
    let file = write_temp(FRESH_SERVER_SQL);
    let store = MemoryStore::new();
    let (engine, _health) = script_engine_with(&store, file.path(), true);

    let first = manual_reset(&engine).await;
    assert!(first.success, "{:?}", first.error);
    store
        .insert_player_row("users", vec![SeedValue::Text("99, 'pwned'".into())])
        .unwrap();
    assert_eq!(store.table("users").unwrap().rows.len(), 3);

    let second = manual_reset(&engine).await;
    assert!(second.success, "{:?}", second.error);
    assert_eq!(second.reset_count, 2);
    let users = store.table("users").unwrap();
    assert_eq!(users.rows.len(), 2);
    assert!(users
        .rows
        .iter()
        .all(|row| row != &vec![SeedValue::Text("99, 'pwned'".into())]));
    assert!(store
        .executed_sql()
        .contains(&"DROP DATABASE IF EXISTS `ctf_db`".to_string()));
}

#[tokio::test]
async fn default_config_survives_repeated_create_user() {
    let file = write_temp(FRESH_SERVER_SQL);
    let tolerate = WatchdogConfig::default().seed.tolerate_script_errors;
    let store = MemoryStore::new();
    let (engine, health) = script_engine_with(&store, file.path(), tolerate);

    for expected_count in 1..=3 {
        let outcome = manual_reset(&engine).await;
        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(outcome.reset_count, expected_count);
    }
    assert_eq!(health.state().controller_status, ControllerStatus::Idle);
    assert_eq!(store.accounts(), vec!["'ctf_player'@'%'".to_string()]);
}

#[tokio::test]
async fn strict_script_fails_once_the_account_exists() {
    let file = write_temp(FRESH_SERVER_SQL);
    let store = MemoryStore::new();
    let (engine, health) = script_engine_with(&store, file.path(), false);

    assert!(manual_reset(&engine).await.success);
    let second = manual_reset(&engine).await;
    assert!(matches!(second.error, Some(ResetError::SchemaApply { .. })));
    assert_eq!(health.state().controller_status, ControllerStatus::Degraded);
}

#[tokio::test]
async fn skipped_create_table_fails_verification() {
    let file = write_temp(FRESH_SERVER_SQL);
    let store = MemoryStore::new();
    store.set_faults(Faults {
        fail_sql_containing: Some("CREATE TABLE IF NOT EXISTS grades".into()),
        ..Faults::default()
    });
    let (engine, health) = script_engine_with(&store, file.path(), true);

    let outcome = manual_reset(&engine).await;
    assert!(!outcome.success);
    match outcome.error {
        Some(ResetError::SeedApply { table, .. }) => assert_eq!(table, "grades"),
        other => panic!("expected seed error for grades, got {other:?}"),
    }
    assert_eq!(outcome.reset_count, 0);
    assert_eq!(health.state().controller_status, ControllerStatus::Degraded);
}
