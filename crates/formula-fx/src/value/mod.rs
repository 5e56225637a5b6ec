use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::eval::EvalContext;
use crate::ir::{FormulaType, IrNode};
use crate::scope::ScopeId;

mod error;
mod record;
mod table;
mod visitor;

pub use error::{ErrorKind, ErrorValue, ExpressionError};
pub use record::{json_to_value, InMemoryRecord, JsonRecord, RecordSource, RecordValue};
pub use table::TableValue;
pub use visitor::{ExpressionFormatter, ValueVisitor};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// `#rrggbbaa` hex form.
    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
    }
}

/// Result of producing a `T` that may instead be blank or an error.
///
/// Table rows use this so one bad row does not poison the whole table.
#[derive(Clone, Debug, PartialEq)]
pub enum DValue<T> {
    Value(T),
    Blank,
    Error(ErrorValue),
}

impl<T> DValue<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            DValue::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_value(&self) -> bool {
        matches!(self, DValue::Value(_))
    }
}

impl DValue<RecordValue> {
    /// The row as an ordinary value.
    pub fn to_value(&self) -> Value {
        match self {
            DValue::Value(record) => Value::Record(record.clone()),
            DValue::Blank => Value::Blank(FormulaType::Record),
            DValue::Error(err) => Value::Error(err.clone()),
        }
    }
}

/// Unevaluated IR subtree closed over the context it was created in.
///
/// Invoked through [`crate::eval::EvalVisitor::invoke_lambda`], once per row for row-scoped
/// lambdas.
#[derive(Clone)]
pub struct LambdaValue {
    pub(crate) body: Arc<IrNode>,
    pub(crate) scope: Option<ScopeId>,
    pub(crate) context: EvalContext,
}

impl LambdaValue {
    pub fn new(body: Arc<IrNode>, scope: Option<ScopeId>, context: EvalContext) -> Self {
        Self {
            body,
            scope,
            context,
        }
    }

    pub fn body(&self) -> &IrNode {
        &self.body
    }

    pub fn scope(&self) -> Option<ScopeId> {
        self.scope
    }
}

impl fmt::Debug for LambdaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LambdaValue")
            .field("scope", &self.scope)
            .field("ty", &self.body.ty)
            .finish_non_exhaustive()
    }
}

impl PartialEq for LambdaValue {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.body, &other.body) && self.scope == other.scope
    }
}

#[derive(Clone, Debug)]
pub enum Value {
    Number(f64),
    Decimal(BigDecimal),
    Boolean(bool),
    String(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Time(chrono::Duration),
    Color(Color),
    Record(RecordValue),
    Table(TableValue),
    Blank(FormulaType),
    Error(ErrorValue),
    Lambda(LambdaValue),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Decimal(a), Value::Decimal(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Time(a), Value::Time(b)) => a == b,
            (Value::Color(a), Value::Color(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => a == b,
            // Blanks compare equal regardless of the type they stand in for.
            (Value::Blank(_), Value::Blank(_)) => true,
            (Value::Error(a), Value::Error(b)) => a == b,
            (Value::Lambda(a), Value::Lambda(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    pub fn blank() -> Self {
        Value::Blank(FormulaType::Unknown)
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Value::Error(ErrorValue::new(kind, message))
    }

    pub fn ty(&self) -> FormulaType {
        match self {
            Value::Number(_) => FormulaType::Number,
            Value::Decimal(_) => FormulaType::Decimal,
            Value::Boolean(_) => FormulaType::Boolean,
            Value::String(_) => FormulaType::String,
            Value::Date(_) => FormulaType::Date,
            Value::DateTime(_) => FormulaType::DateTime,
            Value::Time(_) => FormulaType::Time,
            Value::Color(_) => FormulaType::Color,
            Value::Record(_) => FormulaType::Record,
            Value::Table(_) => FormulaType::Table,
            Value::Blank(ty) => *ty,
            Value::Error(_) => FormulaType::Error,
            Value::Lambda(_) => FormulaType::Lambda,
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, Value::Blank(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    pub fn as_error(&self) -> Option<&ErrorValue> {
        match self {
            Value::Error(err) => Some(err),
            _ => None,
        }
    }

    /// Host representation of this value.
    ///
    /// Never fails: blanks and lambdas become `null`, errors become
    /// `{"error": [{"kind": .., "message": ..}]}`, and tables only include rows that are already
    /// materialized (an unfetched remote table is `null`).
    pub fn to_object(&self) -> serde_json::Value {
        use serde_json::{json, Value as Json};

        match self {
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::Decimal(d) => d
                .to_f64()
                .and_then(serde_json::Number::from_f64)
                .map(Json::Number)
                .unwrap_or_else(|| Json::String(d.to_string())),
            Value::Boolean(b) => Json::Bool(*b),
            Value::String(s) => Json::String(s.clone()),
            Value::Date(d) => Json::String(d.format("%Y-%m-%d").to_string()),
            Value::DateTime(dt) => Json::String(dt.format("%Y-%m-%dT%H:%M:%S").to_string()),
            Value::Time(t) => Json::String(format_time(*t)),
            Value::Color(c) => Json::String(c.to_hex()),
            Value::Record(record) => Json::Object(
                record
                    .fields()
                    .into_iter()
                    .map(|(name, value)| (name, value.to_object()))
                    .collect(),
            ),
            Value::Table(table) => match table.cached_rows() {
                Some(rows) => Json::Array(rows.iter().map(|row| row.to_value().to_object()).collect()),
                None => Json::Null,
            },
            Value::Blank(_) | Value::Lambda(_) => Json::Null,
            Value::Error(err) => json!({
                "error": err
                    .errors()
                    .iter()
                    .map(|e| json!({ "kind": e.kind.as_code(), "message": e.message }))
                    .collect::<Vec<_>>()
            }),
        }
    }

    pub fn visit(&self, visitor: &mut dyn ValueVisitor) {
        match self {
            Value::Number(n) => visitor.visit_number(*n),
            Value::Decimal(d) => visitor.visit_decimal(d),
            Value::Boolean(b) => visitor.visit_boolean(*b),
            Value::String(s) => visitor.visit_string(s),
            Value::Date(d) => visitor.visit_date(*d),
            Value::DateTime(dt) => visitor.visit_date_time(*dt),
            Value::Time(t) => visitor.visit_time(*t),
            Value::Color(c) => visitor.visit_color(*c),
            Value::Record(r) => visitor.visit_record(r),
            Value::Table(t) => visitor.visit_table(t),
            Value::Blank(ty) => visitor.visit_blank(*ty),
            Value::Error(e) => visitor.visit_error(e),
            Value::Lambda(l) => visitor.visit_lambda(l),
        }
    }
}

pub(crate) fn format_time(t: chrono::Duration) -> String {
    let secs = t.num_seconds();
    let (sign, secs) = if secs < 0 { ("-", -secs) } else { ("", secs) };
    format!(
        "{sign}{:02}:{:02}:{:02}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60
    )
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut formatter = ExpressionFormatter::new();
        self.visit(&mut formatter);
        f.write_str(&formatter.finish())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<BigDecimal> for Value {
    fn from(value: BigDecimal) -> Self {
        Value::Decimal(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

impl From<RecordValue> for Value {
    fn from(value: RecordValue) -> Self {
        Value::Record(value)
    }
}

impl From<TableValue> for Value {
    fn from(value: TableValue) -> Self {
        Value::Table(value)
    }
}

impl From<ErrorValue> for Value {
    fn from(value: ErrorValue) -> Self {
        Value::Error(value)
    }
}
