use sensorlog_core::SpecError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read {0}: {1}")]
    Read(std::string::String, #[source] std::io::Error),
    #[error("Invalid JSON: {0}")]
    Parse(#[from] serde_json::error::Error),
    #[error(transparent)]
    Spec(#[from] SpecError),
    #[error("Invalid configuration: {0}")]
    Invalid(std::string::String),
}

#[derive(Debug, Error)]
pub enum DBError {
    #[error(transparent)]
    SQLError(#[from] sqlx::Error),
    #[error("Database still locked after {0} attempts")]
    Locked(u32),
    #[error("Table {0} is not active")]
    InactiveTable(std::string::String),
}

impl DBError {
    /// SQLITE_BUSY and SQLITE_LOCKED are worth another attempt
    pub fn is_locked(err: &sqlx::Error) -> bool {
        match err {
            sqlx::Error::Database(db_err) => {
                let code_locked = db_err
                    .code()
                    .map_or(false, |code| matches!(&*code, "5" | "6" | "517" | "262"));
                code_locked || db_err.message().contains("locked")
            }
            _ => false,
        }
    }
}

/// Faults a single inbound message can run into
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Couldn't decode payload: {0}")]
    Decode(std::string::String),
    #[error("Payload is not a JSON object but {0}")]
    Shape(&'static str),
    #[error("Missing or empty timestamp field {0}")]
    MissingTimestamp(std::string::String),
    #[error("No active table for topic {0}")]
    UnknownRoute(std::string::String),
    #[error(transparent)]
    Storage(#[from] DBError),
    #[error("Internal fault: {0}")]
    Internal(std::string::String),
}

impl IngestError {
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Decode(_) => "DecodeFault",
            IngestError::Shape(_) => "ShapeFault",
            IngestError::MissingTimestamp(_) => "MissingRequiredFieldFault",
            IngestError::UnknownRoute(_) => "UnknownRouteFault",
            IngestError::Storage(DBError::Locked(_)) => "StorageFault.Locked",
            IngestError::Storage(DBError::InactiveTable(_)) => "StorageFault.InactiveTable",
            IngestError::Storage(DBError::SQLError(_)) => "StorageFault.SQL",
            IngestError::Internal(_) => "InternalFault",
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Failed writing: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("mail command failed: {0}")]
    Mail(std::string::String),
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    DB(#[from] DBError),
    #[error("Couldn't read database schema: {0}")]
    Schema(#[source] sqlx::Error),
    #[error("No table passed schema validation")]
    NoActiveTable,
}

impl From<sqlx::Error> for StartupError {
    fn from(err: sqlx::Error) -> Self {
        StartupError::DB(DBError::SQLError(err))
    }
}
