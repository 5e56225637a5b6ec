use chrono::{NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::ir::FormulaType;
use crate::value::{DValue, ErrorKind, ErrorValue, TableValue, Value};

/// Backing store for a [`RecordValue`].
///
/// This is the single extension point for record-like data: plain field maps, host objects, rows
/// coming back from a connector. Callers only ever see [`RecordValue::try_get_field`].
pub trait RecordSource: fmt::Debug + Send + Sync {
    fn field_names(&self) -> Vec<String>;

    /// `None` when the record has no field called `name`.
    ///
    /// A field that exists but cannot be converted to `ty` yields `Some(Value::Error(..))`.
    fn try_get_field(&self, ty: FormulaType, name: &str) -> Option<Value>;
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct InMemoryRecord {
    fields: BTreeMap<String, Value>,
}

impl InMemoryRecord {
    pub fn new(fields: BTreeMap<String, Value>) -> Self {
        Self { fields }
    }
}

impl RecordSource for InMemoryRecord {
    fn field_names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    fn try_get_field(&self, _ty: FormulaType, name: &str) -> Option<Value> {
        self.fields.get(name).cloned()
    }
}

/// Host-object marshaller over a JSON object.
///
/// Values are converted on access according to the requested type, so a string holding a number
/// can be read as a number, and a malformed date surfaces as an error value for that field only.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JsonRecord {
    object: serde_json::Map<String, serde_json::Value>,
}

impl JsonRecord {
    pub fn new(object: serde_json::Map<String, serde_json::Value>) -> Self {
        Self { object }
    }
}

impl RecordSource for JsonRecord {
    fn field_names(&self) -> Vec<String> {
        self.object.keys().cloned().collect()
    }

    fn try_get_field(&self, ty: FormulaType, name: &str) -> Option<Value> {
        let raw = self.object.get(name)?;
        Some(json_to_value(raw, ty).unwrap_or_else(|e| {
            Value::Error(ErrorValue::new(
                ErrorKind::InvalidArgument,
                format!("field {name}: {e}"),
            ))
        }))
    }
}

/// Convert a JSON value to a formula value of type `ty`.
///
/// [`FormulaType::Unknown`] picks the natural mapping for the JSON type.
pub fn json_to_value(raw: &serde_json::Value, ty: FormulaType) -> Result<Value, String> {
    use serde_json::Value as Json;

    if raw.is_null() {
        return Ok(Value::Blank(ty));
    }

    match ty {
        FormulaType::Number => match raw {
            Json::Number(n) => n
                .as_f64()
                .map(Value::Number)
                .ok_or_else(|| format!("{n} is not representable as a number")),
            Json::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Number)
                .map_err(|_| format!("cannot convert {s:?} to a number")),
            Json::Bool(b) => Ok(Value::Number(if *b { 1.0 } else { 0.0 })),
            other => Err(format!("cannot convert {other} to a number")),
        },
        FormulaType::Decimal => {
            let text = match raw {
                Json::Number(n) => n.to_string(),
                Json::String(s) => s.trim().to_string(),
                other => return Err(format!("cannot convert {other} to a decimal")),
            };
            text.parse::<bigdecimal::BigDecimal>()
                .map(Value::Decimal)
                .map_err(|_| format!("cannot convert {text:?} to a decimal"))
        }
        FormulaType::String => match raw {
            Json::String(s) => Ok(Value::String(s.clone())),
            Json::Number(n) => Ok(Value::String(n.to_string())),
            Json::Bool(b) => Ok(Value::String(b.to_string())),
            other => Err(format!("cannot convert {other} to text")),
        },
        FormulaType::Boolean => match raw {
            Json::Bool(b) => Ok(Value::Boolean(*b)),
            Json::String(s) if s.eq_ignore_ascii_case("true") => Ok(Value::Boolean(true)),
            Json::String(s) if s.eq_ignore_ascii_case("false") => Ok(Value::Boolean(false)),
            other => Err(format!("cannot convert {other} to a boolean")),
        },
        FormulaType::Date => match raw {
            Json::String(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|_| format!("invalid date {s:?}")),
            other => Err(format!("cannot convert {other} to a date")),
        },
        FormulaType::DateTime => match raw {
            Json::String(s) => parse_datetime(s)
                .map(Value::DateTime)
                .ok_or_else(|| format!("invalid date/time {s:?}")),
            other => Err(format!("cannot convert {other} to a date/time")),
        },
        FormulaType::Record => match raw {
            Json::Object(map) => Ok(Value::Record(RecordValue::from_json(map.clone()))),
            other => Err(format!("cannot convert {other} to a record")),
        },
        FormulaType::Table => match raw {
            Json::Array(items) => Ok(Value::Table(json_array_to_table(items))),
            other => Err(format!("cannot convert {other} to a table")),
        },
        _ => Ok(match raw {
            Json::Bool(b) => Value::Boolean(*b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Value::String(s.clone()),
            Json::Array(items) => Value::Table(json_array_to_table(items)),
            Json::Object(map) => Value::Record(RecordValue::from_json(map.clone())),
            Json::Null => Value::Blank(ty),
        }),
    }
}

fn json_array_to_table(items: &[serde_json::Value]) -> TableValue {
    let rows = items
        .iter()
        .map(|item| match item {
            serde_json::Value::Object(map) => DValue::Value(RecordValue::from_json(map.clone())),
            serde_json::Value::Null => DValue::Blank,
            other => DValue::Value(RecordValue::new([(
                "Value",
                json_to_value(other, FormulaType::Unknown).unwrap_or_else(|e| {
                    Value::Error(ErrorValue::new(ErrorKind::InvalidArgument, e))
                }),
            )])),
        })
        .collect();
    TableValue::from_rows(rows)
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .ok()
}

/// Record value with by-name field lookup.
#[derive(Clone)]
pub struct RecordValue {
    source: Arc<dyn RecordSource>,
}

impl fmt::Debug for RecordValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.source.fmt(f)
    }
}

impl PartialEq for RecordValue {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.source, &other.source) {
            return true;
        }
        self.fields() == other.fields()
    }
}

impl RecordValue {
    pub fn new<K: Into<String>>(fields: impl IntoIterator<Item = (K, Value)>) -> Self {
        let fields = fields.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self::from_source(Arc::new(InMemoryRecord::new(fields)))
    }

    pub fn empty() -> Self {
        Self::from_source(Arc::new(InMemoryRecord::default()))
    }

    pub fn from_source(source: Arc<dyn RecordSource>) -> Self {
        Self { source }
    }

    pub fn from_json(object: serde_json::Map<String, serde_json::Value>) -> Self {
        Self::from_source(Arc::new(JsonRecord::new(object)))
    }

    /// Look up `name`, converting to `ty`.
    ///
    /// Returns `(false, Blank(ty))` when the field does not exist.
    pub fn try_get_field(&self, ty: FormulaType, name: &str) -> (bool, Value) {
        match self.source.try_get_field(ty, name) {
            Some(value) => (true, value),
            None => (false, Value::Blank(ty)),
        }
    }

    /// Field value with its natural type, or blank when absent.
    pub fn get_field(&self, name: &str) -> Value {
        self.try_get_field(FormulaType::Unknown, name).1
    }

    pub fn field_names(&self) -> Vec<String> {
        self.source.field_names()
    }

    pub fn fields(&self) -> Vec<(String, Value)> {
        self.field_names()
            .into_iter()
            .map(|name| {
                let value = self.get_field(&name);
                (name, value)
            })
            .collect()
    }

    /// Copy of this record with `updates` applied (added or replaced).
    pub fn with_fields(&self, updates: impl IntoIterator<Item = (String, Value)>) -> Self {
        let mut fields: BTreeMap<String, Value> = self.fields().into_iter().collect();
        fields.extend(updates);
        Self::from_source(Arc::new(InMemoryRecord::new(fields)))
    }
}
