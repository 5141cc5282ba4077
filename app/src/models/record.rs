use super::quote_ident;
use super::schema::ActiveTableSet;
use crate::config::StorageSettings;
use crate::error::DBError;
use sensorlog_core::{Record, StoredValue, TableSpec};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

struct InsertStatement {
    sql: String,
    fields: Vec<String>,
}

impl InsertStatement {
    fn new(table: &TableSpec) -> Self {
        let columns = table.columns();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let quoted: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        InsertStatement {
            sql: format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_ident(&table.storage_name),
                quoted.join(", "),
                placeholders
            ),
            fields: table.fields.iter().map(|f| f.key.clone()).collect(),
        }
    }
}

/// Writes sanitized records into their tables
pub struct PersistenceGateway {
    pool: SqlitePool,
    statements: HashMap<String, InsertStatement>,
    lock_retries: u32,
    lock_backoff: Duration,
}

impl PersistenceGateway {
    pub fn new(pool: SqlitePool, tables: &ActiveTableSet, storage: &StorageSettings) -> Self {
        let statements = tables
            .active()
            .iter()
            .map(|t| (t.key.clone(), InsertStatement::new(t)))
            .collect();
        PersistenceGateway {
            pool,
            statements,
            lock_retries: storage.lock_retries,
            lock_backoff: Duration::from_millis(storage.lock_backoff_ms),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    #[cfg(test)]
    pub fn statement(&self, table_key: &str) -> Option<&str> {
        self.statements.get(table_key).map(|s| s.sql.as_str())
    }

    pub async fn insert(&self, table_key: &str, record: &Record) -> Result<(), DBError> {
        let stmt = self
            .statements
            .get(table_key)
            .ok_or_else(|| DBError::InactiveTable(table_key.to_owned()))?;

        let mut attempt: u32 = 0;
        loop {
            let mut query = bind_value(sqlx::query(&stmt.sql), &record.timestamp);
            for field in stmt.fields.iter() {
                query = bind_value(query, record.get(field).unwrap_or(&StoredValue::Null));
            }

            match query.execute(&self.pool).await {
                Ok(_) => return Ok(()),
                Err(e) if DBError::is_locked(&e) => {
                    attempt += 1;
                    if attempt > self.lock_retries {
                        return Err(DBError::Locked(attempt));
                    }
                    warn!(
                        table = table_key,
                        "[{}/{}] Database locked, retrying", attempt, self.lock_retries
                    );
                    tokio::time::sleep(self.lock_backoff * attempt).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &StoredValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        StoredValue::Null => query.bind(None::<String>),
        StoredValue::Integer(i) => query.bind(*i),
        StoredValue::Real(f) => query.bind(*f),
        StoredValue::Text(s) => query.bind(s.clone()),
    }
}
