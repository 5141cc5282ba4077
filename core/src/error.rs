use std::error;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum SpecError {
    InvalidBand(std::string::String),
    MissingRoutingKey(std::string::String),
    DuplicateColumn(std::string::String, std::string::String),
}

impl fmt::Display for SpecError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SpecError::InvalidBand(msg) => write!(f, "invalid band: {}", msg),
            SpecError::MissingRoutingKey(table) => {
                write!(f, "table {} has no sensor_id to route by", table)
            }
            SpecError::DuplicateColumn(table, column) => {
                write!(f, "table {} declares column {} twice", table, column)
            }
        }
    }
}

impl error::Error for SpecError {}
