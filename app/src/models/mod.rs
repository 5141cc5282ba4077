use crate::config::SystemConfig;
use crate::error::DBError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

pub async fn establish_db_connection(config: &SystemConfig) -> Result<SqlitePool, DBError> {
    // never create the file, the tables are owned by someone else
    let options = SqliteConnectOptions::new()
        .filename(&config.db_file)
        .create_if_missing(false);

    Ok(SqlitePoolOptions::new()
        .max_connections(config.storage.max_connections.max(1))
        .connect_with(options)
        .await?)
}

/// Double quotes an identifier for use in a statement
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub mod record;
pub mod schema;
