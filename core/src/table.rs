use crate::error::SpecError;
use crate::field::SensorFieldSpec;
use crate::keyed::{deserialize_keyed, Keyed};
use crate::sanitize::StoredValue;
use serde::Deserialize;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TimestampSpec {
    #[serde(default = "TimestampSpec::default_name")]
    pub name: String,
    #[serde(rename = "type", default = "TimestampSpec::default_kind")]
    pub kind: String,
}

impl TimestampSpec {
    fn default_name() -> String {
        "utms".to_owned()
    }

    fn default_kind() -> String {
        "iso8601".to_owned()
    }
}

impl Default for TimestampSpec {
    fn default() -> Self {
        TimestampSpec {
            name: TimestampSpec::default_name(),
            kind: TimestampSpec::default_kind(),
        }
    }
}

/// A destination relation and the sensor feeding it
#[derive(Debug, Clone, Deserialize)]
pub struct TableSpec {
    #[serde(skip)]
    pub key: String,
    #[serde(rename = "name", default)]
    pub storage_name: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub info: Option<String>,
    #[serde(rename = "sensor_id", default)]
    pub routing_key: String,
    #[serde(rename = "TIMESTAMP", default)]
    pub timestamp: TimestampSpec,
    #[serde(rename = "SENSORS", default, deserialize_with = "deserialize_keyed")]
    pub fields: Vec<SensorFieldSpec>,
}

impl Keyed for TableSpec {
    fn set_key(&mut self, key: String) {
        if self.storage_name.is_empty() {
            self.storage_name = key.clone();
        }
        if self.alias.is_empty() {
            self.alias = key.clone();
        }
        self.key = key;
    }
}

impl TableSpec {
    pub fn new(key: &str, routing_key: &str, fields: Vec<SensorFieldSpec>) -> Self {
        TableSpec {
            key: key.to_owned(),
            storage_name: key.to_owned(),
            alias: key.to_owned(),
            info: None,
            routing_key: routing_key.to_owned(),
            timestamp: TimestampSpec::default(),
            fields,
        }
    }

    pub fn field(&self, key: &str) -> Option<&SensorFieldSpec> {
        self.fields.iter().find(|f| f.key == key)
    }

    pub fn field_by_alias(&self, alias: &str) -> Option<&SensorFieldSpec> {
        self.fields.iter().find(|f| f.alias == alias)
    }

    /// Column names in insert order, timestamp first
    pub fn columns(&self) -> Vec<&str> {
        std::iter::once(self.timestamp.name.as_str())
            .chain(self.fields.iter().map(|f| f.key.as_str()))
            .collect()
    }

    pub fn validate(&self) -> Result<(), SpecError> {
        if self.routing_key.trim().is_empty() {
            return Err(SpecError::MissingRoutingKey(self.key.clone()));
        }
        let mut seen = HashSet::new();
        for column in self.columns() {
            if !seen.insert(column) {
                return Err(SpecError::DuplicateColumn(
                    self.key.clone(),
                    column.to_owned(),
                ));
            }
        }
        Ok(())
    }
}

/// One sanitized row, values in field declaration order
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub timestamp: StoredValue,
    pub values: Vec<(String, StoredValue)>,
}

impl Record {
    pub fn new(timestamp: StoredValue) -> Self {
        Record {
            timestamp,
            values: Vec::new(),
        }
    }

    pub fn push(&mut self, key: &str, value: StoredValue) {
        self.values.push((key.to_owned(), value));
    }

    pub fn get(&self, key: &str) -> Option<&StoredValue> {
        self.values.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}
