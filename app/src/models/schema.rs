use super::quote_ident;
use sensorlog_core::TableSpec;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct InactiveTable {
    pub key: String,
    pub reason: String,
}

/// Tables split by whether the store can take their records
#[derive(Debug, Clone, Default)]
pub struct ActiveTableSet {
    active: Vec<TableSpec>,
    inactive: Vec<InactiveTable>,
}

impl ActiveTableSet {
    pub fn new(active: Vec<TableSpec>, inactive: Vec<InactiveTable>) -> Self {
        ActiveTableSet { active, inactive }
    }

    pub fn active(&self) -> &[TableSpec] {
        &self.active
    }

    pub fn inactive(&self) -> &[InactiveTable] {
        &self.inactive
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    #[cfg(test)]
    pub fn by_key(&self, key: &str) -> Option<&TableSpec> {
        self.active.iter().find(|t| t.key == key)
    }

    pub fn by_routing_key(&self, routing_key: &str) -> Option<&TableSpec> {
        self.active.iter().find(|t| t.routing_key == routing_key)
    }
}

/// Checks every configured table against the live schema.
///
/// A table missing its relation or any column becomes inactive, the
/// error is only returned if the store can't be introspected at all.
pub async fn validate(pool: &SqlitePool, tables: &[TableSpec]) -> Result<ActiveTableSet, sqlx::Error> {
    let mut active = Vec::new();
    let mut inactive = Vec::new();
    for table in tables {
        let present = table_columns(pool, &table.storage_name).await?;
        match missing_reason(table, &present) {
            None => {
                debug!(table = %table.key, "Table schema ok");
                active.push(table.clone());
            }
            Some(reason) => {
                warn!(table = %table.key, "Deactivated table: {}", reason);
                inactive.push(InactiveTable {
                    key: table.key.clone(),
                    reason,
                });
            }
        }
    }
    Ok(ActiveTableSet::new(active, inactive))
}

async fn table_columns(pool: &SqlitePool, storage_name: &str) -> Result<HashSet<String>, sqlx::Error> {
    let stmt = format!("PRAGMA table_info({})", quote_ident(storage_name));
    sqlx::query(&stmt)
        .fetch_all(pool)
        .await?
        .iter()
        .map(|row| row.try_get::<String, _>("name"))
        .collect()
}

fn missing_reason(table: &TableSpec, present: &HashSet<String>) -> Option<String> {
    if present.is_empty() {
        return Some(format!("relation {} does not exist", table.storage_name));
    }
    let missing: Vec<&str> = table
        .columns()
        .into_iter()
        .filter(|c| !present.contains(*c))
        .collect();
    if missing.is_empty() {
        None
    } else {
        Some(format!(
            "relation {} lacks columns: {}",
            table.storage_name,
            missing.join(", ")
        ))
    }
}
