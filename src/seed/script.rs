//! `init.sql` script source
//!
//! Reads the script on every reset so edits take effect at the next cycle.
//! Comment-only lines are dropped, the remainder is split on `;` outside of
//! quoted text, and each statement is classified by its leading keywords so
//! a failure can be attributed to schema or seed.
//!
//! The configured database, and any database the script creates, is dropped
//! before the script runs: scripts are written for a fresh server
//! (`CREATE TABLE IF NOT EXISTS`, plain `INSERT`) and replaying one over a
//! played-in database would keep every player row.

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

use super::{validate_identifier, Phase, SeedError, SeedPlan, SeedProvider, Statement};

/// Seed provider backed by an SQL script on disk
#[derive(Debug, Clone)]
pub struct SqlScriptProvider {
    path: PathBuf,
    database: String,
    tolerate_errors: bool,
}

impl SqlScriptProvider {
    /// `tolerate_errors`: log and skip failing script statements instead of
    /// failing the reset
    pub fn new(path: impl Into<PathBuf>, database: impl Into<String>, tolerate_errors: bool) -> Self {
        Self {
            path: path.into(),
            database: database.into(),
            tolerate_errors,
        }
    }

    /// Turn script text into a plan without touching the filesystem
    pub fn plan_from_str(&self, script: &str) -> SeedPlan {
        let mut plan = SeedPlan::new(&self.database);
        plan.script = split_statements(script)
            .into_iter()
            .map(|sql| {
                let (phase, table) = classify(&sql);
                Statement::Sql {
                    phase,
                    sql,
                    table,
                    may_fail: self.tolerate_errors,
                }
            })
            .collect();

        plan.drop_databases.push(self.database.clone());
        for name in plan.script.iter().filter_map(|stmt| match stmt {
            Statement::Sql { sql, .. } => created_database(sql),
            _ => None,
        }) {
            if validate_identifier(&name).is_ok() && !plan.drop_databases.contains(&name) {
                plan.drop_databases.push(name);
            }
        }
        plan
    }
}

#[async_trait]
impl SeedProvider for SqlScriptProvider {
    fn name(&self) -> &str {
        "script"
    }

    async fn plan(&self) -> Result<SeedPlan, SeedError> {
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| SeedError::Io(self.path.clone(), e))?;
        let plan = self.plan_from_str(&contents);
        debug!(
            path = %self.path.display(),
            statements = plan.script.len(),
            "Loaded seed script"
        );
        Ok(plan)
    }
}

/// Split a script into trimmed, non-empty statements.
///
/// Lines whose first non-blank characters are `--` are removed before
/// splitting. Semicolons inside `'...'`, `"..."` or `` `...` `` do not end a
/// statement; backslash escapes are honoured inside string literals.
pub fn split_statements(script: &str) -> Vec<String> {
    let cleaned: String = script
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n");

    let mut statements = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in cleaned.chars() {
        match quote {
            Some(q) => {
                current.push(c);
                if escaped {
                    escaped = false;
                } else if c == '\\' && q != '`' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' | '`' => {
                    quote = Some(c);
                    current.push(c);
                }
                ';' => {
                    push_statement(&mut statements, &current);
                    current.clear();
                }
                _ => current.push(c),
            },
        }
    }
    push_statement(&mut statements, &current);

    statements
}

fn push_statement(out: &mut Vec<String>, raw: &str) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

/// Phase and target table of a script statement, from its leading keywords
pub fn classify(sql: &str) -> (Phase, Option<String>) {
    let words: Vec<String> = sql
        .split_whitespace()
        .take(8)
        .map(|w| w.to_ascii_uppercase())
        .collect();
    let raw: Vec<&str> = sql.split_whitespace().take(8).collect();
    let w = |i: usize| words.get(i).map(String::as_str).unwrap_or("");

    let table_after = |keyword: &str| -> Option<String> {
        let mut idx = words.iter().position(|x| x == keyword)? + 1;
        while matches!(w(idx), "IF" | "NOT" | "EXISTS" | "IGNORE") {
            idx += 1;
        }
        raw.get(idx).map(|name| table_name(name))
    };

    match (w(0), w(1)) {
        ("USE", _) | ("SET", _) => (Phase::Prepare, None),
        ("CREATE", "DATABASE" | "SCHEMA") => (Phase::Prepare, None),
        ("DROP", "DATABASE" | "SCHEMA") => (Phase::Drop, None),
        ("CREATE" | "DROP" | "ALTER", "USER") => (Phase::Grant, None),
        ("GRANT" | "REVOKE" | "FLUSH", _) => (Phase::Grant, None),
        ("DROP", _) => (Phase::Drop, table_after("TABLE")),
        ("CREATE" | "ALTER" | "RENAME", _) => (Phase::Create, table_after("TABLE")),
        ("TRUNCATE", "TABLE") => (Phase::Drop, table_after("TABLE")),
        ("TRUNCATE", _) => (Phase::Drop, table_after("TRUNCATE")),
        ("INSERT" | "REPLACE", _) => (Phase::Seed, table_after("INTO")),
        ("UPDATE", _) => (Phase::Seed, raw.get(1).map(|n| table_name(n))),
        ("DELETE", _) => (Phase::Seed, table_after("FROM")),
        _ => (Phase::Create, None),
    }
}

/// Name of the database a `CREATE DATABASE`/`CREATE SCHEMA` statement creates
fn created_database(sql: &str) -> Option<String> {
    let words: Vec<&str> = sql.split_whitespace().take(6).collect();
    let keyword = |i: usize| words.get(i).map(|w| w.to_ascii_uppercase());
    if keyword(0).as_deref() != Some("CREATE")
        || !matches!(keyword(1).as_deref(), Some("DATABASE" | "SCHEMA"))
    {
        return None;
    }
    let idx = if keyword(2).as_deref() == Some("IF") { 5 } else { 2 };
    words.get(idx).map(|name| table_name(name))
}

/// Strip quoting, schema prefix and any trailing column list from a name
fn table_name(token: &str) -> String {
    let base = token.split('(').next().unwrap_or(token);
    let last = base.rsplit('.').next().unwrap_or(base);
    last.trim_matches(|c| c == '`' || c == '"').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SCRIPT: &str = r#"
-- Challenge database
CREATE DATABASE IF NOT EXISTS ctf_db;
USE ctf_db;

DROP TABLE IF EXISTS `users`;
CREATE TABLE `users` (
    id INT PRIMARY KEY,
    note VARCHAR(50)
);
  -- indented comment
INSERT INTO users (id, note) VALUES (1, 'semi;colon'), (2, 'it\'s; fine');
INSERT INTO ctf_db.users(id, note) VALUES (3, "dq;");
GRANT SELECT ON ctf_db.* TO 'ctf_player'@'%'
"#;

    #[test]
    fn test_split_ignores_comments_and_quoted_semicolons() {
        let stmts = split_statements(SCRIPT);
        assert_eq!(stmts.len(), 7, "{stmts:#?}");
        assert!(stmts[4].ends_with("(2, 'it\\'s; fine')"));
        assert!(stmts.iter().all(|s| !s.starts_with("--")));
    }

    #[test]
    fn test_trailing_statement_without_semicolon_is_kept() {
        let stmts = split_statements("SELECT 1; SELECT 2");
        assert_eq!(stmts, vec!["SELECT 1", "SELECT 2"]);
    }

    #[test]
    fn test_classify_phases_and_tables() {
        assert_eq!(classify("USE ctf_db"), (Phase::Prepare, None));
        assert_eq!(classify("create database x"), (Phase::Prepare, None));
        assert_eq!(
            classify("DROP TABLE IF EXISTS `users`"),
            (Phase::Drop, Some("users".into()))
        );
        assert_eq!(
            classify("CREATE TABLE IF NOT EXISTS grades (id INT)"),
            (Phase::Create, Some("grades".into()))
        );
        assert_eq!(
            classify("INSERT INTO ctf_db.users(id) VALUES (1)"),
            (Phase::Seed, Some("users".into()))
        );
        assert_eq!(
            classify("INSERT IGNORE INTO fees VALUES (1)"),
            (Phase::Seed, Some("fees".into()))
        );
        assert_eq!(classify("CREATE USER 'p'@'%'"), (Phase::Grant, None));
        assert_eq!(classify("FLUSH PRIVILEGES"), (Phase::Grant, None));
    }

    #[test]
    fn test_plan_drops_configured_and_created_databases() {
        let provider = SqlScriptProvider::new("init.sql", "ctf_university", false);
        let plan = provider.plan_from_str(
            "CREATE DATABASE IF NOT EXISTS `ctf_db`;\nCREATE SCHEMA ctf_university;\nCREATE DATABASE `ctf-db`;",
        );
        assert_eq!(plan.drop_databases, vec!["ctf_university", "ctf_db"]);

        let first = &plan.render().unwrap()[0];
        assert_eq!(
            first,
            &Statement::sql(Phase::Drop, "DROP DATABASE IF EXISTS `ctf_university`")
        );
    }

    #[test]
    fn test_created_database_name() {
        assert_eq!(created_database("CREATE DATABASE ctf_db"), Some("ctf_db".into()));
        assert_eq!(
            created_database("create schema if not exists `ctf_db` CHARACTER SET utf8mb4"),
            Some("ctf_db".into())
        );
        assert_eq!(created_database("CREATE TABLE users (id INT)"), None);
    }

    #[test]
    fn test_plan_marks_statements_tolerant_when_configured() {
        let provider = SqlScriptProvider::new("init.sql", "ctf_db", true);
        let plan = provider.plan_from_str(SCRIPT);
        assert!(plan.tables.is_empty());
        assert!(plan.script.iter().all(Statement::may_fail));
    }

    #[tokio::test]
    async fn test_plan_reads_script_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SCRIPT.as_bytes()).unwrap();

        let provider = SqlScriptProvider::new(file.path(), "ctf_db", false);
        let plan = provider.plan().await.unwrap();
        assert_eq!(plan.script.len(), 7);
        assert!(!plan.script.iter().any(Statement::may_fail));
    }

    #[tokio::test]
    async fn test_missing_script_is_an_io_error() {
        let provider = SqlScriptProvider::new("/nonexistent/init.sql", "ctf_db", false);
        assert!(matches!(provider.plan().await, Err(SeedError::Io(..))));
    }
}
