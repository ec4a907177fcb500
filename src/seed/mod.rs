//! Schema/Seed Provider
//!
//! A seed plan is the declarative definition of the challenge database: an
//! ordered list of tables (definition + seed rows), optional raw script
//! statements, and the account grants players connect with. The reset
//! engine renders a plan into an ordered [`Statement`] list:
//!
//! 1. Prepare: drop whole databases when the plan asks for it, then
//!    create/select the database and disable foreign-key checks
//! 2. Drop: every declared table, children before parents
//! 3. Create: every declared table, parents before children
//! 4. Seed: every declared row, in table order
//! 5. Script: raw statements from an `init.sql` source, in file order
//! 6. Finalize: re-enable foreign-key checks
//! 7. Grant: player account and privileges
//!
//! Providers own no behaviour beyond producing the plan.

pub mod catalog;
pub mod script;

pub use catalog::CtfUniversityCatalog;
pub use script::SqlScriptProvider;

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("failed to read seed script {0}: {1}")]
    Io(PathBuf, std::io::Error),

    #[error("invalid SQL identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("table {table} depends on undeclared table {dependency}")]
    UnknownDependency { table: String, dependency: String },

    #[error("foreign-key dependency cycle involving: {0}")]
    DependencyCycle(String),

    #[error("table {table} row {row} has {got} values, expected {expected}")]
    RowWidth {
        table: String,
        row: usize,
        expected: usize,
        got: usize,
    },

    #[error("table {0} declared more than once")]
    DuplicateTable(String),
}

// ============================================================================
// Values and tables
// ============================================================================

/// A single seed cell, bound as a query parameter by SQL stores
#[derive(Debug, Clone, PartialEq)]
pub enum SeedValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for SeedValue {
    fn from(s: &str) -> Self {
        SeedValue::Text(s.to_string())
    }
}

impl From<i64> for SeedValue {
    fn from(n: i64) -> Self {
        SeedValue::Int(n)
    }
}

impl From<f64> for SeedValue {
    fn from(n: f64) -> Self {
        SeedValue::Float(n)
    }
}

impl From<bool> for SeedValue {
    fn from(b: bool) -> Self {
        SeedValue::Bool(b)
    }
}

impl<T: Into<SeedValue>> From<Option<T>> for SeedValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(SeedValue::Null, Into::into)
    }
}

/// One challenge table: its definition and the rows it is reset to
#[derive(Debug, Clone, PartialEq)]
pub struct TableSeed {
    pub name: String,
    /// Full `CREATE TABLE` statement
    pub ddl: String,
    /// Tables this one references through foreign keys
    pub depends_on: Vec<String>,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SeedValue>>,
}

impl TableSeed {
    pub fn new(name: &str, ddl: &str) -> Self {
        Self {
            name: name.to_string(),
            ddl: ddl.trim().to_string(),
            depends_on: Vec::new(),
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn depends_on(mut self, tables: &[&str]) -> Self {
        self.depends_on = tables.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn row(mut self, values: Vec<SeedValue>) -> Self {
        self.rows.push(values);
        self
    }
}

// ============================================================================
// Statements
// ============================================================================

/// Step of a reset a statement belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Prepare,
    Drop,
    Create,
    Seed,
    Finalize,
    Grant,
}

impl Phase {
    /// Whether a failure in this phase is a seed (row) failure rather than
    /// a schema failure
    pub fn is_seed(&self) -> bool {
        matches!(self, Phase::Seed)
    }
}

/// One unit of work handed to a store session
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Arbitrary SQL executed verbatim
    Sql {
        phase: Phase,
        sql: String,
        /// Target table, when known (used for error attribution)
        table: Option<String>,
        /// Failure is logged and skipped instead of aborting the reset
        may_fail: bool,
    },
    DropTable {
        table: String,
    },
    CreateTable {
        table: String,
        ddl: String,
    },
    InsertRow {
        table: String,
        columns: Vec<String>,
        values: Vec<SeedValue>,
    },
}

impl Statement {
    pub fn sql(phase: Phase, sql: impl Into<String>) -> Self {
        Statement::Sql {
            phase,
            sql: sql.into(),
            table: None,
            may_fail: false,
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            Statement::Sql { phase, .. } => *phase,
            Statement::DropTable { .. } => Phase::Drop,
            Statement::CreateTable { .. } => Phase::Create,
            Statement::InsertRow { .. } => Phase::Seed,
        }
    }

    pub fn table(&self) -> Option<&str> {
        match self {
            Statement::Sql { table, .. } => table.as_deref(),
            Statement::DropTable { table }
            | Statement::CreateTable { table, .. }
            | Statement::InsertRow { table, .. } => Some(table),
        }
    }

    pub fn may_fail(&self) -> bool {
        matches!(self, Statement::Sql { may_fail: true, .. })
    }
}

// ============================================================================
// Plan
// ============================================================================

/// Everything a reset applies, in declaration order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeedPlan {
    pub database: String,
    pub tables: Vec<TableSeed>,
    /// Raw statements from a script source
    pub script: Vec<Statement>,
    pub grants: Vec<String>,
    /// Databases dropped outright before anything is rebuilt; set by script
    /// sources, whose statements assume a fresh server
    pub drop_databases: Vec<String>,
}

/// Post-commit check for one table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowExpectation {
    /// Declared seed: exactly this many rows
    Exactly(u64),
    /// Created by a script with no rows of its own
    Exists,
    /// Created and populated by a script
    NonEmpty,
}

impl RowExpectation {
    pub fn is_met(&self, rows: u64) -> bool {
        match self {
            RowExpectation::Exactly(n) => rows == *n,
            RowExpectation::Exists => true,
            RowExpectation::NonEmpty => rows > 0,
        }
    }
}

impl std::fmt::Display for RowExpectation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RowExpectation::Exactly(n) => write!(f, "{n} rows"),
            RowExpectation::Exists => write!(f, "the table"),
            RowExpectation::NonEmpty => write!(f, "at least one row"),
        }
    }
}

impl SeedPlan {
    pub fn new(database: &str) -> Self {
        Self {
            database: database.to_string(),
            ..Default::default()
        }
    }

    /// What every table must look like once a reset has committed.
    ///
    /// Declared tables must hold exactly their seed rows. Tables a script
    /// creates must exist, and must have rows if the script inserts into them.
    pub fn expectations(&self) -> Vec<(String, RowExpectation)> {
        let mut out: Vec<(String, RowExpectation)> = self
            .tables
            .iter()
            .map(|t| (t.name.clone(), RowExpectation::Exactly(t.rows.len() as u64)))
            .collect();

        for stmt in &self.script {
            let Statement::Sql {
                sql,
                table: Some(table),
                ..
            } = stmt
            else {
                continue;
            };
            match leading_keywords(sql).as_slice() {
                [first, second, ..] if first == "CREATE" && second == "TABLE" => {
                    if !out.iter().any(|(name, _)| name == table) {
                        out.push((table.clone(), RowExpectation::Exists));
                    }
                }
                [first, ..] if first == "INSERT" || first == "REPLACE" => {
                    if let Some(entry) = out
                        .iter_mut()
                        .find(|(name, e)| name == table && *e == RowExpectation::Exists)
                    {
                        entry.1 = RowExpectation::NonEmpty;
                    }
                }
                _ => {}
            }
        }
        out
    }

    /// Tables in foreign-key dependency order (parents first).
    ///
    /// Stable: tables without a constraint between them keep their
    /// declaration order.
    pub fn dependency_order(&self) -> Result<Vec<&TableSeed>, SeedError> {
        let by_name: HashMap<&str, &TableSeed> =
            self.tables.iter().map(|t| (t.name.as_str(), t)).collect();

        if by_name.len() != self.tables.len() {
            let mut seen = HashSet::new();
            for t in &self.tables {
                if !seen.insert(t.name.as_str()) {
                    return Err(SeedError::DuplicateTable(t.name.clone()));
                }
            }
        }

        for t in &self.tables {
            for dep in &t.depends_on {
                if dep != &t.name && !by_name.contains_key(dep.as_str()) {
                    return Err(SeedError::UnknownDependency {
                        table: t.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let mut ordered: Vec<&TableSeed> = Vec::with_capacity(self.tables.len());
        let mut placed: HashSet<&str> = HashSet::new();

        while ordered.len() < self.tables.len() {
            // Self references are satisfied by the table itself.
            let next = self.tables.iter().find(|t| {
                !placed.contains(t.name.as_str())
                    && t.depends_on
                        .iter()
                        .all(|d| d == &t.name || placed.contains(d.as_str()))
            });

            match next {
                Some(t) => {
                    placed.insert(t.name.as_str());
                    ordered.push(t);
                }
                None => {
                    let stuck: Vec<&str> = self
                        .tables
                        .iter()
                        .map(|t| t.name.as_str())
                        .filter(|n| !placed.contains(n))
                        .collect();
                    return Err(SeedError::DependencyCycle(stuck.join(", ")));
                }
            }
        }

        Ok(ordered)
    }

    /// Check identifiers and row widths without rendering
    pub fn validate(&self) -> Result<(), SeedError> {
        validate_identifier(&self.database)?;
        for db in &self.drop_databases {
            validate_identifier(db)?;
        }
        for t in &self.tables {
            validate_identifier(&t.name)?;
            for c in &t.columns {
                validate_identifier(c)?;
            }
            for (i, row) in t.rows.iter().enumerate() {
                if row.len() != t.columns.len() {
                    return Err(SeedError::RowWidth {
                        table: t.name.clone(),
                        row: i,
                        expected: t.columns.len(),
                        got: row.len(),
                    });
                }
            }
        }
        self.dependency_order().map(|_| ())
    }

    /// Render the ordered statement list applied by one reset
    pub fn render(&self) -> Result<Vec<Statement>, SeedError> {
        self.validate()?;
        let ordered = self.dependency_order()?;
        let db = quote_ident(&self.database);

        let mut out: Vec<Statement> = self
            .drop_databases
            .iter()
            .map(|name| {
                Statement::sql(
                    Phase::Drop,
                    format!("DROP DATABASE IF EXISTS {}", quote_ident(name)),
                )
            })
            .collect();
        out.extend([
            Statement::sql(Phase::Prepare, format!("CREATE DATABASE IF NOT EXISTS {db}")),
            Statement::sql(Phase::Prepare, format!("USE {db}")),
            Statement::sql(Phase::Prepare, "SET FOREIGN_KEY_CHECKS = 0"),
        ]);

        for t in ordered.iter().rev() {
            out.push(Statement::DropTable {
                table: t.name.clone(),
            });
        }
        for t in &ordered {
            out.push(Statement::CreateTable {
                table: t.name.clone(),
                ddl: t.ddl.clone(),
            });
        }
        for t in &ordered {
            for row in &t.rows {
                out.push(Statement::InsertRow {
                    table: t.name.clone(),
                    columns: t.columns.clone(),
                    values: row.clone(),
                });
            }
        }

        out.extend(self.script.iter().cloned());
        out.push(Statement::sql(Phase::Finalize, "SET FOREIGN_KEY_CHECKS = 1"));
        out.extend(
            self.grants
                .iter()
                .map(|g| Statement::sql(Phase::Grant, g.clone())),
        );

        Ok(out)
    }
}

// ============================================================================
// Provider trait
// ============================================================================

/// Source of the seed plan consulted at the start of every reset
#[async_trait]
pub trait SeedProvider: Send + Sync {
    /// Short name for logs and the service description
    fn name(&self) -> &str;

    /// Produce the plan for the next reset
    async fn plan(&self) -> Result<SeedPlan, SeedError>;
}

// ============================================================================
// SQL helpers
// ============================================================================

/// Reject anything that is not a plain `[A-Za-z_][A-Za-z0-9_]*` identifier
pub fn validate_identifier(name: &str) -> Result<(), SeedError> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.len() <= 64;
    if valid {
        Ok(())
    } else {
        Err(SeedError::InvalidIdentifier(name.to_string()))
    }
}

/// First two keywords of a statement, upper-cased
pub fn leading_keywords(sql: &str) -> Vec<String> {
    sql.split_whitespace()
        .take(2)
        .map(|w| w.to_ascii_uppercase())
        .collect()
}

/// Backtick-quote a validated identifier
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Single-quote a string literal for statements that cannot take bound
/// parameters (account management)
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str, deps: &[&str]) -> TableSeed {
        TableSeed::new(name, &format!("CREATE TABLE {name} (id INT)"))
            .depends_on(deps)
            .columns(&["id"])
            .row(vec![SeedValue::Int(1)])
    }

    fn plan(tables: Vec<TableSeed>) -> SeedPlan {
        let mut p = SeedPlan::new("ctf_db");
        p.tables = tables;
        p
    }

    #[test]
    fn test_dependency_order_puts_parents_first() {
        let p = plan(vec![
            table("secrets", &["users"]),
            table("messages", &["users"]),
            table("users", &[]),
        ]);
        let names: Vec<_> = p
            .dependency_order()
            .unwrap()
            .iter()
            .map(|t| t.name.clone())
            .collect();
        assert_eq!(names, vec!["users", "secrets", "messages"]);
    }

    #[test]
    fn test_self_reference_is_not_a_cycle() {
        let p = plan(vec![table("users", &["users"])]);
        assert_eq!(p.dependency_order().unwrap().len(), 1);
    }

    #[test]
    fn test_cycle_is_reported() {
        let p = plan(vec![table("a", &["b"]), table("b", &["a"])]);
        assert!(matches!(
            p.dependency_order(),
            Err(SeedError::DependencyCycle(_))
        ));
    }

    #[test]
    fn test_unknown_dependency_is_reported() {
        let p = plan(vec![table("grades", &["courses"])]);
        assert!(matches!(
            p.dependency_order(),
            Err(SeedError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn test_duplicate_table_is_reported() {
        let p = plan(vec![table("users", &[]), table("users", &[])]);
        assert!(matches!(p.validate(), Err(SeedError::DuplicateTable(_))));
    }

    #[test]
    fn test_row_width_mismatch_is_reported() {
        let t = TableSeed::new("users", "CREATE TABLE users (id INT, name TEXT)")
            .columns(&["id", "name"])
            .row(vec![SeedValue::Int(1)]);
        assert!(matches!(
            plan(vec![t]).validate(),
            Err(SeedError::RowWidth { expected: 2, got: 1, .. })
        ));
    }

    #[test]
    fn test_render_drops_children_before_parents_and_creates_parents_first() {
        let p = plan(vec![table("users", &[]), table("secrets", &["users"])]);
        let stmts = p.render().unwrap();

        let drops: Vec<_> = stmts
            .iter()
            .filter(|s| s.phase() == Phase::Drop)
            .filter_map(|s| s.table())
            .collect();
        let creates: Vec<_> = stmts
            .iter()
            .filter(|s| s.phase() == Phase::Create)
            .filter_map(|s| s.table())
            .collect();

        assert_eq!(drops, vec!["secrets", "users"]);
        assert_eq!(creates, vec!["users", "secrets"]);
    }

    #[test]
    fn test_render_phase_order() {
        let mut p = plan(vec![table("users", &[])]);
        p.grants.push("FLUSH PRIVILEGES".into());
        let phases: Vec<_> = p.render().unwrap().iter().map(|s| s.phase()).collect();

        let first = |ph: Phase| phases.iter().position(|p| *p == ph).unwrap();
        assert!(first(Phase::Prepare) < first(Phase::Drop));
        assert!(first(Phase::Drop) < first(Phase::Create));
        assert!(first(Phase::Create) < first(Phase::Seed));
        assert!(first(Phase::Seed) < first(Phase::Finalize));
        assert!(first(Phase::Finalize) < first(Phase::Grant));
    }

    #[test]
    fn test_invalid_identifiers_rejected() {
        assert!(validate_identifier("users").is_ok());
        assert!(validate_identifier("_tmp1").is_ok());
        assert!(validate_identifier("1users").is_err());
        assert!(validate_identifier("users; DROP").is_err());
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn test_quote_literal_escapes() {
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(quote_literal("a\\b"), "'a\\\\b'");
    }

    #[test]
    fn test_declared_tables_expect_exact_counts() {
        let p = plan(vec![table("users", &[]), table("secrets", &["users"])]);
        assert_eq!(
            p.expectations(),
            vec![
                ("users".to_string(), RowExpectation::Exactly(1)),
                ("secrets".to_string(), RowExpectation::Exactly(1)),
            ]
        );
    }

    #[test]
    fn test_script_tables_expect_existence_and_rows_when_inserted() {
        let mut p = SeedPlan::new("ctf_db");
        p.script = vec![
            Statement::Sql {
                phase: Phase::Create,
                sql: "CREATE TABLE IF NOT EXISTS users (id INT)".into(),
                table: Some("users".into()),
                may_fail: false,
            },
            Statement::Sql {
                phase: Phase::Create,
                sql: "create table audit_log (id INT)".into(),
                table: Some("audit_log".into()),
                may_fail: false,
            },
            Statement::Sql {
                phase: Phase::Create,
                sql: "ALTER TABLE users ADD note TEXT".into(),
                table: Some("users".into()),
                may_fail: false,
            },
            Statement::Sql {
                phase: Phase::Seed,
                sql: "INSERT INTO users VALUES (1, 'x')".into(),
                table: Some("users".into()),
                may_fail: false,
            },
        ];
        assert_eq!(
            p.expectations(),
            vec![
                ("users".to_string(), RowExpectation::NonEmpty),
                ("audit_log".to_string(), RowExpectation::Exists),
            ]
        );
        assert!(!RowExpectation::NonEmpty.is_met(0));
        assert!(RowExpectation::Exists.is_met(0));
    }

    #[test]
    fn test_render_drops_whole_databases_first() {
        let mut p = plan(vec![table("users", &[])]);
        p.drop_databases = vec!["ctf_db".into(), "legacy".into()];
        let stmts = p.render().unwrap();
        assert_eq!(
            stmts[0],
            Statement::sql(Phase::Drop, "DROP DATABASE IF EXISTS `ctf_db`")
        );
        assert_eq!(
            stmts[1],
            Statement::sql(Phase::Drop, "DROP DATABASE IF EXISTS `legacy`")
        );
        assert_eq!(
            stmts[2],
            Statement::sql(Phase::Prepare, "CREATE DATABASE IF NOT EXISTS `ctf_db`")
        );
    }

    #[test]
    fn test_render_keeps_database_without_drop_list() {
        let stmts = plan(vec![table("users", &[])]).render().unwrap();
        assert!(stmts.iter().all(|s| !matches!(
            s,
            Statement::Sql { sql, .. } if sql.starts_with("DROP DATABASE")
        )));
    }
}
