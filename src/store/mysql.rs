//! MySQL-backed data store

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::Connection;
use std::time::Duration;
use tracing::{debug, info};

use super::{DataStore, StoreError, StoreSession};
use crate::config::DatabaseConfig;
use crate::seed::{quote_ident, SeedValue, Statement};

/// Connects as an administrative user without a default database, so the
/// challenge database can be created on the first reset.
#[derive(Debug, Clone)]
pub struct MySqlStore {
    options: MySqlConnectOptions,
    connect_timeout: Duration,
    target: String,
}

impl MySqlStore {
    pub fn new(config: &DatabaseConfig) -> Self {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .charset("utf8mb4");

        Self {
            options,
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            target: format!("{}:{}", config.host, config.port),
        }
    }

    async fn connect(&self) -> Result<MySqlConnection, StoreError> {
        let conn = tokio::time::timeout(
            self.connect_timeout,
            MySqlConnection::connect_with(&self.options),
        )
        .await
        .map_err(|_| {
            StoreError::Connect(format!(
                "no response from {} within {:?}",
                self.target, self.connect_timeout
            ))
        })?
        .map_err(|e| StoreError::Connect(e.to_string()))?;

        debug!(target_addr = %self.target, "Opened MySQL connection");
        Ok(conn)
    }
}

#[async_trait]
impl DataStore for MySqlStore {
    fn describe(&self) -> String {
        self.target.clone()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connect().await?;
        conn.ping().await?;
        conn.close().await?;
        Ok(())
    }

    async fn open_session(&self) -> Result<Box<dyn StoreSession>, StoreError> {
        let conn = self.connect().await?;
        info!(target_addr = %self.target, "Connected to MySQL for reset");
        Ok(Box::new(MySqlSession { conn }))
    }
}

struct MySqlSession {
    conn: MySqlConnection,
}

#[async_trait]
impl StoreSession for MySqlSession {
    async fn execute(&mut self, statement: &Statement) -> Result<(), StoreError> {
        match statement {
            // Text protocol: USE, GRANT and DDL are not all preparable.
            Statement::Sql { sql, .. } => {
                sqlx::Executor::execute(&mut self.conn, sqlx::raw_sql(sql)).await?;
            }
            Statement::DropTable { table } => {
                let sql = format!("DROP TABLE IF EXISTS {}", quote_ident(table));
                sqlx::Executor::execute(&mut self.conn, sqlx::raw_sql(&sql)).await?;
            }
            Statement::CreateTable { ddl, .. } => {
                sqlx::Executor::execute(&mut self.conn, sqlx::raw_sql(ddl)).await?;
            }
            Statement::InsertRow {
                table,
                columns,
                values,
            } => {
                let sql = insert_sql(table, columns);
                let mut query = sqlx::query(&sql);
                for value in values {
                    query = match value {
                        SeedValue::Null => query.bind(None::<String>),
                        SeedValue::Bool(b) => query.bind(*b),
                        SeedValue::Int(n) => query.bind(*n),
                        SeedValue::Float(f) => query.bind(*f),
                        SeedValue::Text(s) => query.bind(s.as_str()),
                    };
                }
                query.execute(&mut self.conn).await?;
            }
        }
        Ok(())
    }

    async fn count_rows(&mut self, table: &str) -> Result<u64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&mut self.conn).await?;
        Ok(count.max(0) as u64)
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        sqlx::Executor::execute(&mut self.conn, sqlx::raw_sql("COMMIT")).await?;
        Ok(())
    }
}

fn insert_sql(table: &str, columns: &[String]) -> String {
    let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        cols.join(", "),
        placeholders
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_sql_uses_placeholders() {
        let sql = insert_sql("users", &["id".into(), "username".into()]);
        assert_eq!(sql, "INSERT INTO `users` (`id`, `username`) VALUES (?, ?)");
    }

    #[test]
    fn test_describe_is_host_and_port() {
        let config = DatabaseConfig {
            host: "db".into(),
            port: 3307,
            ..DatabaseConfig::default()
        };
        assert_eq!(MySqlStore::new(&config).describe(), "db:3307");
    }

    #[test]
    fn test_io_errors_classify_as_connectivity() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(
            StoreError::from(sqlx::Error::Io(io)),
            StoreError::Connect(_)
        ));
        assert!(matches!(
            StoreError::from(sqlx::Error::RowNotFound),
            StoreError::Statement(_)
        ));
    }
}
