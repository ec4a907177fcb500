//! Data Store Handle
//!
//! The reset engine treats the relational engine as an opaque executor:
//! open a session, run statements in order, count rows, commit. Two
//! implementations:
//!
//! - `mysql`: the challenge MySQL server, one fresh connection per reset
//! - `memory`: an in-process table map for tests and `--memory-store` dry runs

pub mod memory;
pub mod mysql;

pub use memory::{Faults, MemoryStore};
pub use mysql::MySqlStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::seed::Statement;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or the connection dropped mid-session
    #[error("connection failed: {0}")]
    Connect(String),

    /// The store rejected a statement
    #[error("statement failed: {0}")]
    Statement(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Connect(e.to_string()),
            other => StoreError::Statement(other.to_string()),
        }
    }
}

/// Factory for reset sessions
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Human-readable target (`host:port` or `memory`) for logs
    fn describe(&self) -> String;

    /// Cheap reachability probe used while waiting for the store at startup
    async fn ping(&self) -> Result<(), StoreError>;

    /// Open a session that lives for exactly one reset attempt
    async fn open_session(&self) -> Result<Box<dyn StoreSession>, StoreError>;
}

/// One connection's worth of work
#[async_trait]
pub trait StoreSession: Send {
    async fn execute(&mut self, statement: &Statement) -> Result<(), StoreError>;

    async fn count_rows(&mut self, table: &str) -> Result<u64, StoreError>;

    async fn commit(&mut self) -> Result<(), StoreError>;
}
