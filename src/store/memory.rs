//! In-process data store
//!
//! Interprets the structured statements of a seed plan against a table map,
//! so the whole controller can run without a MySQL server. Raw SQL is
//! understood as far as scripts need it: database and table drops, table
//! creation, row inserts (one row per `VALUES` tuple) and account creation. Faults (offline
//! store, failing table, slow commit) can be injected at runtime, and
//! session overlap is tracked so callers can assert that resets never ran
//! concurrently.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{DataStore, StoreError, StoreSession};
use crate::seed::script::classify;
use crate::seed::{SeedValue, Statement};

/// Injected failure modes
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// Refuse every connection
    pub offline: bool,
    /// Reject inserts into this table
    pub fail_table: Option<String>,
    /// Reject raw SQL containing this text
    pub fail_sql_containing: Option<String>,
    /// Delay applied at commit, keeping the session open
    pub commit_latency: Duration,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SeedValue>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<String, MemoryTable>,
    /// Accounts created through `CREATE USER`, as written (`'name'@'host'`)
    accounts: BTreeSet<String>,
    executed_sql: Vec<String>,
    faults: Faults,
}

#[derive(Debug, Default)]
struct Counters {
    sessions_opened: AtomicU64,
    commits: AtomicU64,
    active_sessions: AtomicUsize,
    max_active_sessions: AtomicUsize,
}

/// Cloning shares the underlying tables and counters
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    counters: Arc<Counters>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_faults(&self, faults: Faults) {
        self.lock().faults = faults;
    }

    pub fn clear_faults(&self) {
        self.lock().faults = Faults::default();
    }

    /// Insert a row the way a player connected to the database would
    pub fn insert_player_row(&self, table: &str, values: Vec<SeedValue>) -> Result<(), StoreError> {
        let mut state = self.lock();
        let t = state
            .tables
            .get_mut(table)
            .ok_or_else(|| StoreError::Statement(format!("Table '{table}' doesn't exist")))?;
        t.rows.push(values);
        Ok(())
    }

    pub fn table(&self, name: &str) -> Option<MemoryTable> {
        self.lock().tables.get(name).cloned()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.lock().tables.keys().cloned().collect()
    }

    pub fn accounts(&self) -> Vec<String> {
        self.lock().accounts.iter().cloned().collect()
    }

    /// Raw SQL statements executed so far, in order
    pub fn executed_sql(&self) -> Vec<String> {
        self.lock().executed_sql.clone()
    }

    pub fn sessions_opened(&self) -> u64 {
        self.counters.sessions_opened.load(Ordering::SeqCst)
    }

    /// Committed sessions, i.e. resets that reached the end of their plan
    pub fn commits(&self) -> u64 {
        self.counters.commits.load(Ordering::SeqCst)
    }

    /// Highest number of sessions that were ever open at the same time
    pub fn max_concurrent_sessions(&self) -> usize {
        self.counters.max_active_sessions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        if self.lock().faults.offline {
            return Err(StoreError::Connect("Connection refused".to_string()));
        }
        Ok(())
    }

    async fn open_session(&self) -> Result<Box<dyn StoreSession>, StoreError> {
        self.ping().await?;

        self.counters.sessions_opened.fetch_add(1, Ordering::SeqCst);
        let active = self.counters.active_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters
            .max_active_sessions
            .fetch_max(active, Ordering::SeqCst);

        Ok(Box::new(MemorySession {
            store: self.clone(),
        }))
    }
}

struct MemorySession {
    store: MemoryStore,
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.store
            .counters
            .active_sessions
            .fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl StoreSession for MemorySession {
    async fn execute(&mut self, statement: &Statement) -> Result<(), StoreError> {
        let mut state = self.store.lock();
        if state.faults.offline {
            return Err(StoreError::Connect("Lost connection to server during query".into()));
        }

        match statement {
            Statement::Sql { sql, .. } => {
                if let Some(pattern) = &state.faults.fail_sql_containing {
                    if sql.contains(pattern.as_str()) {
                        return Err(StoreError::Statement(format!("rejected: {sql}")));
                    }
                }
                interpret_sql(&mut state, sql)?;
                state.executed_sql.push(sql.clone());
            }
            Statement::DropTable { table } => {
                state.tables.remove(table);
            }
            Statement::CreateTable { table, .. } => {
                if state.tables.contains_key(table) {
                    return Err(StoreError::Statement(format!("Table '{table}' already exists")));
                }
                state.tables.insert(table.clone(), MemoryTable::default());
            }
            Statement::InsertRow {
                table,
                columns,
                values,
            } => {
                if state.faults.fail_table.as_deref() == Some(table.as_str()) {
                    return Err(StoreError::Statement(format!(
                        "Duplicate entry for key 'PRIMARY' in '{table}'"
                    )));
                }
                let t = state
                    .tables
                    .get_mut(table)
                    .ok_or_else(|| StoreError::Statement(format!("Table '{table}' doesn't exist")))?;
                if t.columns.is_empty() {
                    t.columns = columns.clone();
                }
                t.rows.push(values.clone());
            }
        }
        Ok(())
    }

    async fn count_rows(&mut self, table: &str) -> Result<u64, StoreError> {
        self.store
            .lock()
            .tables
            .get(table)
            .map(|t| t.rows.len() as u64)
            .ok_or_else(|| StoreError::Statement(format!("Table '{table}' doesn't exist")))
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let latency = self.store.lock().faults.commit_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.store.counters.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn missing_table(table: &str) -> StoreError {
    StoreError::Statement(format!("Table '{table}' doesn't exist"))
}

/// Apply the effect of a raw statement; anything unrecognised is a no-op
fn interpret_sql(state: &mut MemoryState, sql: &str) -> Result<(), StoreError> {
    let words: Vec<String> = sql
        .split_whitespace()
        .take(3)
        .map(|w| w.to_ascii_uppercase())
        .collect();
    let raw: Vec<&str> = sql.split_whitespace().take(6).collect();
    let keyword = |i: usize| words.get(i).map(String::as_str).unwrap_or("");
    let if_clause = keyword(2) == "IF";
    let (_, table) = classify(sql);

    match (keyword(0), keyword(1), table) {
        ("DROP", "DATABASE" | "SCHEMA", _) => state.tables.clear(),
        ("DROP", "TABLE", Some(t)) => {
            if state.tables.remove(&t).is_none() && !if_clause {
                return Err(StoreError::Statement(format!("Unknown table '{t}'")));
            }
        }
        ("TRUNCATE", _, Some(t)) => {
            state.tables.get_mut(&t).ok_or_else(|| missing_table(&t))?.rows.clear();
        }
        ("CREATE", "TABLE", Some(t)) => {
            if state.tables.contains_key(&t) {
                if !if_clause {
                    return Err(StoreError::Statement(format!("Table '{t}' already exists")));
                }
            } else {
                state.tables.insert(t, MemoryTable::default());
            }
        }
        ("INSERT" | "REPLACE", _, Some(t)) => {
            let rows = value_tuples(sql);
            let target = state.tables.get_mut(&t).ok_or_else(|| missing_table(&t))?;
            target
                .rows
                .extend(rows.into_iter().map(|tuple| vec![SeedValue::Text(tuple)]));
        }
        ("CREATE", "USER", _) => {
            let account = raw.get(if if_clause { 5 } else { 2 }).copied().unwrap_or("");
            if !state.accounts.insert(account.to_string()) && !if_clause {
                return Err(StoreError::Statement(format!(
                    "Operation CREATE USER failed for {account}"
                )));
            }
        }
        ("DROP", "USER", _) => {
            let account = raw.get(if if_clause { 4 } else { 2 }).copied().unwrap_or("");
            if !state.accounts.remove(account) && !if_clause {
                return Err(StoreError::Statement(format!(
                    "Operation DROP USER failed for {account}"
                )));
            }
        }
        _ => {}
    }
    Ok(())
}

/// Top-level parenthesised groups after `VALUES`, quotes respected
fn value_tuples(sql: &str) -> Vec<String> {
    let upper = sql.to_ascii_uppercase();
    let bytes = upper.as_bytes();
    let standalone = |at: usize, len: usize| {
        let before = at.checked_sub(1).map(|i| bytes[i]);
        let after = bytes.get(at + len).copied();
        matches!(before, Some(b' ' | b'\n' | b'\t' | b')'))
            && matches!(after, None | Some(b' ' | b'\n' | b'\t' | b'('))
    };
    let Some(start) = ["VALUES", "VALUE"].iter().find_map(|kw| {
        upper
            .match_indices(kw)
            .map(|(at, _)| at)
            .find(|&at| standalone(at, kw.len()))
    }) else {
        return Vec::new();
    };

    let mut tuples = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in sql[start..].chars() {
        if let Some(q) = quote {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' if depth > 0 => {
                quote = Some(c);
                current.push(c);
            }
            '(' => {
                if depth > 0 {
                    current.push(c);
                }
                depth += 1;
            }
            ')' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    tuples.push(std::mem::take(&mut current));
                } else {
                    current.push(c);
                }
            }
            _ if depth > 0 => current.push(c),
            _ => {}
        }
    }
    tuples
}
