use crate::field::{FieldType, SensorFieldSpec};
use serde_json::Value;
use std::fmt;
use tracing::trace;

/// A storage-ready scalar
#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl StoredValue {
    pub fn is_null(&self) -> bool {
        matches!(self, StoredValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StoredValue::Integer(i) => Some(*i as f64),
            StoredValue::Real(f) => Some(*f),
            StoredValue::Text(s) => s.trim().parse().ok(),
            StoredValue::Null => None,
        }
    }

    /// Converts an arbitrary JSON scalar without any coercion rules,
    /// used for the timestamp column which is stored as delivered
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => StoredValue::Null,
            Value::Bool(b) => StoredValue::Integer(*b as i64),
            Value::Number(n) => match n.as_i64() {
                Some(i) => StoredValue::Integer(i),
                None => n.as_f64().map_or(StoredValue::Null, StoredValue::Real),
            },
            Value::String(s) => StoredValue::Text(s.clone()),
            other => StoredValue::Text(other.to_string()),
        }
    }
}

impl From<&StoredValue> for Value {
    fn from(value: &StoredValue) -> Self {
        match value {
            StoredValue::Null => Value::Null,
            StoredValue::Integer(i) => Value::from(*i),
            StoredValue::Real(f) => Value::from(*f),
            StoredValue::Text(s) => Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for StoredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoredValue::Null => f.write_str("null"),
            StoredValue::Integer(i) => write!(f, "{}", i),
            StoredValue::Real(r) => write!(f, "{}", r),
            StoredValue::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Good,
    /// A known sentinel was mapped through the invalid map
    Replaced,
    /// The value could not be coerced into the declared type
    Unparseable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sanitized {
    pub value: StoredValue,
    pub verdict: Verdict,
}

impl Sanitized {
    fn new(value: StoredValue, verdict: Verdict) -> Self {
        Sanitized { value, verdict }
    }

    pub fn is_good(&self) -> bool {
        self.verdict == Verdict::Good
    }
}

/// The string form a raw value is looked up with in the invalid map
pub fn value_key(raw: Option<&Value>) -> String {
    match raw {
        None | Some(Value::Null) => "null".to_owned(),
        Some(Value::String(s)) => s.trim().to_owned(),
        Some(other) => other.to_string(),
    }
}

impl SensorFieldSpec {
    /// Converts a raw payload value into its storage form.
    ///
    /// `raw` is `None` when the payload does not carry the field at all,
    /// which is treated like an explicit JSON `null`.
    pub fn sanitize(&self, raw: Option<&Value>) -> Sanitized {
        let mut verdict = Verdict::Good;
        let mut current = raw.cloned().unwrap_or(Value::Null);

        if let Some(replacement) = self.lookup_invalid(raw) {
            trace!(field = %self.key, raw = %value_key(raw), "invalid sentinel");
            verdict = Verdict::Replaced;
            current = replacement.clone();
        }

        let scalar = match current {
            Value::Null => return Sanitized::new(StoredValue::Null, verdict),
            // firmware reports [current, previous] for some readings
            Value::Array(items) => match items.into_iter().next() {
                Some(Value::Null) => return Sanitized::new(StoredValue::Null, verdict),
                Some(first) => first,
                None => return Sanitized::new(StoredValue::Null, Verdict::Unparseable),
            },
            other => other,
        };

        match self.coerce(&scalar) {
            Some(value) => Sanitized::new(value, verdict),
            None => {
                trace!(field = %self.key, raw = %scalar, "unparseable value");
                Sanitized::new(StoredValue::Null, Verdict::Unparseable)
            }
        }
    }

    fn lookup_invalid(&self, raw: Option<&Value>) -> Option<&Value> {
        if self.invalid_map.is_empty() {
            return None;
        }
        self.invalid_map.get(&value_key(raw)).or_else(|| match raw {
            Some(Value::Array(items)) => items
                .first()
                .and_then(|first| self.invalid_map.get(&value_key(Some(first)))),
            _ => None,
        })
    }

    fn coerce(&self, value: &Value) -> Option<StoredValue> {
        match self.field_type {
            FieldType::Float => {
                let parsed = parse_f64(value)?;
                let rounded = match self.round_digits {
                    Some(digits) => round_half_even(parsed, digits),
                    None => parsed,
                };
                Some(StoredValue::Real(rounded))
            }
            FieldType::Int => {
                let truncated = parse_f64(value)?.trunc();
                if truncated < i64::MIN as f64 || truncated > i64::MAX as f64 {
                    return None;
                }
                Some(StoredValue::Integer(truncated as i64))
            }
            FieldType::Bool => parse_bool(value).map(|b| StoredValue::Integer(b as i64)),
            FieldType::String => {
                let text = match value {
                    Value::String(s) => s.trim().to_owned(),
                    other => other.to_string(),
                };
                if text.is_empty() {
                    Some(StoredValue::Null)
                } else {
                    Some(StoredValue::Text(text))
                }
            }
        }
    }
}

fn parse_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        _ => return None,
    };
    parsed.is_finite().then_some(parsed)
}

fn parse_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f == 0.0 => Some(false),
            Some(f) if f == 1.0 => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "on" | "ok" => Some(true),
            "false" | "0" | "no" | "n" | "off" | "low" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn round_half_even(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    let rounded = (value * factor).round_ties_even() / factor;
    if rounded.is_finite() {
        rounded
    } else {
        value
    }
}
