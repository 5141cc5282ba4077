use crate::error::SpecError;
use crate::keyed::Keyed;
use crate::sanitize::StoredValue;
use serde::{de, Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "String")]
pub enum FieldType {
    Float,
    Int,
    Bool,
    #[default]
    String,
}

impl From<String> for FieldType {
    fn from(name: String) -> Self {
        match name.trim().to_lowercase().as_str() {
            "float" | "number" | "tuple_float" | "tuple_number" => FieldType::Float,
            "int" | "integer" => FieldType::Int,
            "bool" | "boolean" => FieldType::Bool,
            _ => FieldType::String,
        }
    }
}

/// Closed interval `[lo, hi]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    lo: f64,
    hi: f64,
}

impl Band {
    pub fn new(lo: f64, hi: f64) -> Result<Self, SpecError> {
        if lo.is_nan() || hi.is_nan() {
            return Err(SpecError::InvalidBand("bounds must be numbers".to_owned()));
        }
        if lo > hi {
            return Err(SpecError::InvalidBand(format!("{} > {}", lo, hi)));
        }
        Ok(Band { lo, hi })
    }

    pub fn lo(&self) -> f64 {
        self.lo
    }

    pub fn hi(&self) -> f64 {
        self.hi
    }

    pub fn is_outside(&self, value: f64) -> bool {
        value < self.lo || value > self.hi
    }
}

/// Which bands a value falls outside of
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LevelFlags {
    pub limits: bool,
    pub warn: bool,
    pub alarm: bool,
}

impl LevelFlags {
    pub fn any(&self) -> bool {
        self.limits || self.warn || self.alarm
    }
}

/// One measured field of a sensor table
#[derive(Debug, Clone, Deserialize)]
pub struct SensorFieldSpec {
    #[serde(skip)]
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub field_type: FieldType,
    #[serde(default)]
    pub unit: String,
    #[serde(rename = "round", default)]
    pub round_digits: Option<i32>,
    #[serde(default, deserialize_with = "deserialize_band")]
    pub limits: Option<Band>,
    #[serde(default, deserialize_with = "deserialize_band")]
    pub warn: Option<Band>,
    #[serde(default, deserialize_with = "deserialize_band")]
    pub alarm: Option<Band>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default, deserialize_with = "deserialize_invalid_map")]
    pub invalid_map: HashMap<String, Value>,
}

impl Keyed for SensorFieldSpec {
    fn set_key(&mut self, key: String) {
        if self.name.is_empty() {
            self.name = key.clone();
        }
        if self.alias.is_empty() {
            self.alias = key.clone();
        }
        self.key = key;
    }
}

impl SensorFieldSpec {
    pub fn new(key: &str, field_type: FieldType) -> Self {
        SensorFieldSpec {
            key: key.to_owned(),
            name: key.to_owned(),
            alias: key.to_owned(),
            field_type,
            unit: String::new(),
            round_digits: None,
            limits: None,
            warn: None,
            alarm: None,
            color: None,
            invalid_map: HashMap::new(),
        }
    }

    pub fn with_round(mut self, digits: i32) -> Self {
        self.round_digits = Some(digits);
        self
    }

    pub fn with_limits(mut self, limits: Band) -> Self {
        self.limits = Some(limits);
        self
    }

    pub fn with_warn(mut self, warn: Band) -> Self {
        self.warn = Some(warn);
        self
    }

    pub fn with_alarm(mut self, alarm: Band) -> Self {
        self.alarm = Some(alarm);
        self
    }

    pub fn with_invalid(mut self, raw: &str, replacement: Value) -> Self {
        self.invalid_map.insert(raw.trim().to_owned(), replacement);
        self
    }

    pub fn check_levels(&self, value: &StoredValue) -> LevelFlags {
        let numeric = match value.as_f64() {
            Some(v) => v,
            None => return LevelFlags::default(),
        };
        let outside = |band: &Option<Band>| band.map_or(false, |b| b.is_outside(numeric));
        LevelFlags {
            limits: outside(&self.limits),
            warn: outside(&self.warn),
            alarm: outside(&self.alarm),
        }
    }
}

fn deserialize_band<'de, D>(deserializer: D) -> Result<Option<Band>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<(Option<f64>, Option<f64>)> = Option::deserialize(deserializer)?;
    match raw {
        None | Some((None, None)) => Ok(None),
        Some((Some(lo), Some(hi))) => Band::new(lo, hi).map(Some).map_err(de::Error::custom),
        Some((lo, hi)) => Err(de::Error::custom(format!(
            "band needs both bounds or none, got [{:?}, {:?}]",
            lo, hi
        ))),
    }
}

fn deserialize_invalid_map<'de, D>(deserializer: D) -> Result<HashMap<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<HashMap<String, Value>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k.trim().to_owned(), v))
        .collect())
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_type_names() {
        assert_eq!(FieldType::Float, FieldType::from("Number".to_owned()));
        assert_eq!(FieldType::Float, FieldType::from("tuple_float".to_owned()));
        assert_eq!(FieldType::Int, FieldType::from("integer".to_owned()));
        assert_eq!(FieldType::Bool, FieldType::from(" BOOLEAN ".to_owned()));
        assert_eq!(FieldType::String, FieldType::from("whatever".to_owned()));
    }

    #[test]
    fn test_deserialize_field() {
        // prepare
        let doc = json!({
            "name": "Temperatur 1",
            "field_type": "float",
            "unit": "°C",
            "round": 1,
            "limits": [-40, 60],
            "warn": null,
            "alarm": [null, null],
            "invalid_map": {" -9999 ": null, "-9999.0": null}
        });

        // execute
        let mut field: SensorFieldSpec = serde_json::from_value(doc).unwrap();
        field.set_key("temperature1".to_owned());

        // validate
        assert_eq!("temperature1", field.key);
        assert_eq!("Temperatur 1", field.name);
        assert_eq!("temperature1", field.alias);
        assert_eq!(FieldType::Float, field.field_type);
        assert_eq!(Some(1), field.round_digits);
        assert_eq!(Some(Band::new(-40.0, 60.0).unwrap()), field.limits);
        assert!(field.warn.is_none());
        assert!(field.alarm.is_none());
        assert!(field.invalid_map.contains_key("-9999"));
    }

    #[test]
    fn test_half_defined_band_rejected() {
        let doc = json!({"field_type": "float", "warn": [1.0, null]});
        let result = serde_json::from_value::<SensorFieldSpec>(doc);
        assert!(result.is_err());
    }

    #[test]
    fn test_inverted_band_rejected() {
        let doc = json!({"field_type": "float", "alarm": [10, 5]});
        let result = serde_json::from_value::<SensorFieldSpec>(doc);
        assert!(result.is_err());
    }

    #[test]
    fn test_check_levels() {
        // prepare
        let field = SensorFieldSpec::new("humidity1", FieldType::Float)
            .with_limits(Band::new(0.0, 100.0).unwrap())
            .with_warn(Band::new(30.0, 70.0).unwrap())
            .with_alarm(Band::new(20.0, 80.0).unwrap());

        // execute
        let fine = field.check_levels(&StoredValue::Real(50.0));
        let warned = field.check_levels(&StoredValue::Real(75.0));
        let implausible = field.check_levels(&StoredValue::Integer(120));
        let missing = field.check_levels(&StoredValue::Null);

        // validate
        assert!(!fine.any());
        assert_eq!(
            LevelFlags {
                limits: false,
                warn: true,
                alarm: false
            },
            warned
        );
        assert!(implausible.limits && implausible.warn && implausible.alarm);
        assert!(!missing.any());
    }
}
