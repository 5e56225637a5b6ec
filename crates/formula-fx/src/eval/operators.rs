//! Operator semantics and value coercions.
//!
//! These helpers are shared by the IR visitor, the function library, local table operations and
//! [`crate::delegation::InMemoryTableProvider`], so that a comparison or sort means exactly the
//! same thing whether it runs locally or is pushed to a data source.
use bigdecimal::{BigDecimal, ToPrimitive, Zero};
use ordered_float::OrderedFloat;
use std::cmp::Ordering;

use crate::config::CultureConfig;
use crate::functions::date_time::{add_days, date_from_serial, date_to_serial, parse_date};
use crate::ir::{BinaryOpKind, FormulaType, UnaryOpKind};
use crate::value::{DValue, ErrorValue, RecordValue, Value};

/// `Numeric` error for non-finite results.
pub(crate) fn finite(n: f64) -> Value {
    if n.is_finite() {
        Value::Number(n)
    } else {
        Value::Error(ErrorValue::numeric())
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Number(_) => "Number",
        Value::Decimal(_) => "Decimal",
        Value::Boolean(_) => "Boolean",
        Value::String(_) => "Text",
        Value::Date(_) => "Date",
        Value::DateTime(_) => "DateTime",
        Value::Time(_) => "Time",
        Value::Color(_) => "Color",
        Value::Record(_) => "Record",
        Value::Table(_) => "Table",
        Value::Blank(_) => "Blank",
        Value::Error(_) => "Error",
        Value::Lambda(_) => "Lambda",
    }
}

pub(crate) fn to_number(value: &Value, culture: &CultureConfig) -> Result<f64, ErrorValue> {
    match value {
        Value::Number(n) => Ok(*n),
        Value::Decimal(d) => d.to_f64().ok_or_else(ErrorValue::numeric),
        Value::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Blank(_) => Ok(0.0),
        Value::String(s) => culture
            .parse_number(s)
            .ok_or_else(|| ErrorValue::invalid_argument(format!("cannot convert {s:?} to a number"))),
        Value::Date(d) => Ok(date_to_serial(*d)),
        Value::Error(err) => Err(err.clone()),
        other => Err(ErrorValue::invalid_argument(format!(
            "expected a number, got {}",
            type_name(other)
        ))),
    }
}

pub(crate) fn to_text(value: &Value, culture: &CultureConfig) -> Result<String, ErrorValue> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(culture.format_number(*n)),
        Value::Decimal(d) => Ok(d
            .normalized()
            .to_string()
            .replace('.', &culture.decimal_separator.to_string())),
        Value::Boolean(b) => Ok(b.to_string()),
        Value::Blank(_) => Ok(String::new()),
        Value::Date(d) => Ok(d.format("%Y-%m-%d").to_string()),
        Value::DateTime(dt) => Ok(dt.format("%Y-%m-%d %H:%M:%S").to_string()),
        Value::Time(t) => Ok(crate::value::format_time(*t)),
        Value::Error(err) => Err(err.clone()),
        other => Err(ErrorValue::invalid_argument(format!(
            "expected text, got {}",
            type_name(other)
        ))),
    }
}

pub(crate) fn to_boolean(value: &Value) -> Result<bool, ErrorValue> {
    match value {
        Value::Boolean(b) => Ok(*b),
        Value::Number(n) => Ok(*n != 0.0),
        Value::Decimal(d) => Ok(!d.is_zero()),
        Value::Blank(_) => Ok(false),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") || s.is_empty() => Ok(false),
        Value::Error(err) => Err(err.clone()),
        other => Err(ErrorValue::invalid_argument(format!(
            "expected a boolean, got {}",
            type_name(other)
        ))),
    }
}

fn both_errors(left: &Value, right: &Value) -> Option<Value> {
    match (left, right) {
        (Value::Error(a), Value::Error(b)) => {
            ErrorValue::combine([a.clone(), b.clone()]).map(Value::Error)
        }
        (Value::Error(a), _) | (_, Value::Error(a)) => Some(Value::Error(a.clone())),
        _ => None,
    }
}

fn decimal_pair(left: &Value, right: &Value) -> Option<(BigDecimal, BigDecimal)> {
    let as_decimal = |v: &Value| match v {
        Value::Decimal(d) => Some(d.clone()),
        Value::Blank(_) => Some(BigDecimal::zero()),
        _ => None,
    };
    match (left, right) {
        (Value::Blank(_), Value::Blank(_)) => None,
        _ => Some((as_decimal(left)?, as_decimal(right)?)),
    }
}

/// Evaluate a binary operator over two already-evaluated operands.
///
/// Membership tests against a table need the table's rows; use [`in_rows`] for those.
pub fn binary(op: BinaryOpKind, left: &Value, right: &Value, culture: &CultureConfig) -> Value {
    if let Some(err) = both_errors(left, right) {
        return err;
    }

    match op {
        BinaryOpKind::Eq
        | BinaryOpKind::NotEq
        | BinaryOpKind::Lt
        | BinaryOpKind::LtEq
        | BinaryOpKind::Gt
        | BinaryOpKind::GtEq => compare(op, left, right),
        BinaryOpKind::Concat => match (to_text(left, culture), to_text(right, culture)) {
            (Ok(a), Ok(b)) => Value::String(a + &b),
            (Err(e), _) | (_, Err(e)) => Value::Error(e),
        },
        BinaryOpKind::In | BinaryOpKind::ExactIn => {
            let (Ok(needle), Ok(haystack)) = (to_text(left, culture), to_text(right, culture))
            else {
                return Value::Error(ErrorValue::invalid_argument(
                    "membership test needs text or a table",
                ));
            };
            if op == BinaryOpKind::In {
                Value::Boolean(haystack.to_lowercase().contains(&needle.to_lowercase()))
            } else {
                Value::Boolean(haystack.contains(&needle))
            }
        }
        BinaryOpKind::Add | BinaryOpKind::Sub => add_or_sub(op, left, right, culture),
        BinaryOpKind::Mul | BinaryOpKind::Div | BinaryOpKind::Pow => {
            if let Some((a, b)) = decimal_pair(left, right) {
                return match op {
                    BinaryOpKind::Mul => Value::Decimal(a * b),
                    BinaryOpKind::Div if b.is_zero() => Value::Error(ErrorValue::div0()),
                    BinaryOpKind::Div => Value::Decimal(a / b),
                    _ => match (a.to_f64(), b.to_f64()) {
                        (Some(a), Some(b)) => finite(a.powf(b)),
                        _ => Value::Error(ErrorValue::numeric()),
                    },
                };
            }
            let (a, b) = match (to_number(left, culture), to_number(right, culture)) {
                (Ok(a), Ok(b)) => (a, b),
                (Err(e), _) | (_, Err(e)) => return Value::Error(e),
            };
            match op {
                BinaryOpKind::Mul => finite(a * b),
                BinaryOpKind::Div if b == 0.0 => Value::Error(ErrorValue::div0()),
                BinaryOpKind::Div => finite(a / b),
                _ => finite(a.powf(b)),
            }
        }
    }
}

fn add_or_sub(op: BinaryOpKind, left: &Value, right: &Value, culture: &CultureConfig) -> Value {
    let sub = op == BinaryOpKind::Sub;
    match (left, right) {
        (Value::Date(a), Value::Date(b)) if sub => {
            return Value::Number((*a - *b).num_days() as f64);
        }
        (Value::Date(d), other) => {
            return match to_number(other, culture) {
                Ok(days) => shift_date(*d, if sub { -days } else { days }),
                Err(e) => Value::Error(e),
            };
        }
        (other, Value::Date(d)) if !sub => {
            return match to_number(other, culture) {
                Ok(days) => shift_date(*d, days),
                Err(e) => Value::Error(e),
            };
        }
        _ => {}
    }

    if let Some((a, b)) = decimal_pair(left, right) {
        return Value::Decimal(if sub { a - b } else { a + b });
    }
    match (to_number(left, culture), to_number(right, culture)) {
        (Ok(a), Ok(b)) => finite(if sub { a - b } else { a + b }),
        (Err(e), _) | (_, Err(e)) => Value::Error(e),
    }
}

fn shift_date(date: chrono::NaiveDate, days: f64) -> Value {
    if !days.is_finite() {
        return Value::Error(ErrorValue::numeric());
    }
    add_days(date, days.trunc() as i64)
        .map(Value::Date)
        .unwrap_or_else(|| Value::Error(ErrorValue::numeric()))
}

/// Membership of `left` in the first column of `rows`.
pub(crate) fn in_rows(op: BinaryOpKind, left: &Value, rows: &[DValue<RecordValue>]) -> Value {
    if let Value::Error(err) = left {
        return Value::Error(err.clone());
    }
    let found = rows.iter().any(|row| {
        let DValue::Value(record) = row else {
            return false;
        };
        let Some((_, candidate)) = record.fields().into_iter().next() else {
            return false;
        };
        match (op, left, &candidate) {
            (BinaryOpKind::In, Value::String(a), Value::String(b)) => a.eq_ignore_ascii_case(b),
            _ => values_equal(left, &candidate),
        }
    });
    Value::Boolean(found)
}

/// Evaluate a comparison operator.
///
/// `=`/`<>` are defined for every pair of values. Ordering comparisons between incomparable
/// kinds yield an `InvalidArgument` error value.
pub fn compare(op: BinaryOpKind, left: &Value, right: &Value) -> Value {
    if let Some(err) = both_errors(left, right) {
        return err;
    }
    match op {
        BinaryOpKind::Eq => Value::Boolean(values_equal(left, right)),
        BinaryOpKind::NotEq => Value::Boolean(!values_equal(left, right)),
        _ => match compare_values(left, right) {
            Some(ord) => Value::Boolean(match op {
                BinaryOpKind::Lt => ord == Ordering::Less,
                BinaryOpKind::LtEq => ord != Ordering::Greater,
                BinaryOpKind::Gt => ord == Ordering::Greater,
                BinaryOpKind::GtEq => ord != Ordering::Less,
                _ => false,
            }),
            None => {
                // Operand order is not preserved when a source evaluates the comparison.
                let (a, b) = (type_name(left), type_name(right));
                let (a, b) = if a <= b { (a, b) } else { (b, a) };
                Value::Error(ErrorValue::invalid_argument(format!(
                    "{a} and {b} values cannot be ordered"
                )))
            }
        },
    }
}

pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Blank(_), Value::Blank(_)) => true,
        (Value::Blank(_), _) | (_, Value::Blank(_)) => false,
        (Value::Record(a), Value::Record(b)) => a == b,
        (Value::Table(a), Value::Table(b)) => a == b,
        (Value::Color(a), Value::Color(b)) => a == b,
        _ => compare_values(left, right) == Some(Ordering::Equal),
    }
}

/// Order two scalar values of compatible kinds. `None` when the kinds cannot be ordered.
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    use chrono::NaiveTime;

    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
        (Value::Decimal(a), Value::Decimal(b)) => Some(a.cmp(b)),
        (Value::Number(a), Value::Decimal(b)) => a.partial_cmp(&b.to_f64()?),
        (Value::Decimal(a), Value::Number(b)) => a.to_f64()?.partial_cmp(b),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
        (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
        (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
        (Value::Date(a), Value::DateTime(b)) => Some(a.and_time(NaiveTime::MIN).cmp(b)),
        (Value::DateTime(a), Value::Date(b)) => Some(a.cmp(&b.and_time(NaiveTime::MIN))),
        (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
        (Value::Blank(_), Value::Blank(_)) => Some(Ordering::Equal),
        (Value::Blank(_), other) => blank_cmp(other),
        (other, Value::Blank(_)) => blank_cmp(other).map(Ordering::reverse),
        _ => None,
    }
}

/// Blank compared against a value, ordered as the kind's zero value.
fn blank_cmp(other: &Value) -> Option<Ordering> {
    match other {
        Value::Number(n) => 0f64.partial_cmp(n),
        Value::Decimal(d) => Some(BigDecimal::zero().cmp(d)),
        Value::String(s) => Some("".cmp(s.as_str())),
        Value::Boolean(b) => Some(false.cmp(b)),
        Value::Date(_) | Value::DateTime(_) | Value::Time(_) => Some(Ordering::Less),
        _ => None,
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Boolean(_) => 0,
        Value::Number(_) | Value::Decimal(_) => 1,
        Value::Date(_) | Value::DateTime(_) => 2,
        Value::Time(_) => 3,
        Value::String(_) => 4,
        Value::Color(_) => 5,
        Value::Record(_) => 6,
        Value::Table(_) => 7,
        Value::Lambda(_) => 8,
        Value::Blank(_) => 9,
        Value::Error(_) => 10,
    }
}

/// Total order used for sorting: values ascending, then blanks, then errors.
///
/// NaN sorts after every other number. Incomparable kinds fall back to a fixed kind order, so
/// sorting never fails.
pub fn sort_cmp(left: &Value, right: &Value) -> Ordering {
    let numeric = |v: &Value| match v {
        Value::Number(n) => Some(OrderedFloat(*n)),
        Value::Decimal(d) => d.to_f64().map(OrderedFloat),
        _ => None,
    };
    match (left, right) {
        (Value::Blank(_), Value::Blank(_)) | (Value::Error(_), Value::Error(_)) => {
            return Ordering::Equal
        }
        (Value::Blank(_), _) | (Value::Error(_), _) | (_, Value::Blank(_)) | (_, Value::Error(_)) => {
            return type_rank(left).cmp(&type_rank(right));
        }
        _ => {}
    }
    if let (Some(a), Some(b)) = (numeric(left), numeric(right)) {
        return a.cmp(&b);
    }
    compare_values(left, right).unwrap_or_else(|| type_rank(left).cmp(&type_rank(right)))
}

pub fn unary(op: UnaryOpKind, value: &Value, culture: &CultureConfig) -> Value {
    if let Value::Error(err) = value {
        return Value::Error(err.clone());
    }

    let result = match op {
        UnaryOpKind::Negate => match value {
            Value::Decimal(d) => Ok(Value::Decimal(-d.clone())),
            other => to_number(other, culture).map(|n| Value::Number(-n)),
        },
        UnaryOpKind::Not => to_boolean(value).map(|b| Value::Boolean(!b)),
        UnaryOpKind::Percent => match value {
            Value::Decimal(d) => Ok(Value::Decimal(d.clone() / BigDecimal::from(100u32))),
            other => to_number(other, culture).map(|n| finite(n / 100.0)),
        },
        UnaryOpKind::BlankToEmptyString => match value {
            Value::Blank(_) => Ok(Value::String(String::new())),
            other => Ok(other.clone()),
        },
        _ if value.is_blank() => Ok(Value::Blank(coercion_target(op))),
        UnaryOpKind::NumberToText | UnaryOpKind::BooleanToText => {
            to_text(value, culture).map(Value::String)
        }
        UnaryOpKind::TextToNumber | UnaryOpKind::BooleanToNumber | UnaryOpKind::DateToNumber => {
            to_number(value, culture).map(finite)
        }
        UnaryOpKind::NumberToBoolean | UnaryOpKind::TextToBoolean => match value {
            Value::String(s)
                if !s.eq_ignore_ascii_case("true") && !s.eq_ignore_ascii_case("false") =>
            {
                Err(ErrorValue::invalid_argument(format!(
                    "cannot convert {s:?} to a boolean"
                )))
            }
            other => to_boolean(other).map(Value::Boolean),
        },
        UnaryOpKind::NumberToDecimal => to_number(value, culture).and_then(|n| {
            if !n.is_finite() {
                return Err(ErrorValue::numeric());
            }
            n.to_string()
                .parse::<BigDecimal>()
                .map(Value::Decimal)
                .map_err(|_| ErrorValue::numeric())
        }),
        UnaryOpKind::DecimalToNumber => to_number(value, culture).map(finite),
        UnaryOpKind::NumberToDate => to_number(value, culture).and_then(|n| {
            date_from_serial(n).map(Value::Date).ok_or_else(|| {
                ErrorValue::invalid_argument(format!("{n} is outside the supported date range"))
            })
        }),
        UnaryOpKind::TextToDate => to_text(value, culture).and_then(|s| {
            parse_date(&s, culture)
                .map(Value::Date)
                .ok_or_else(|| ErrorValue::invalid_argument(format!("invalid date {s:?}")))
        }),
    };
    result.unwrap_or_else(Value::Error)
}

fn coercion_target(op: UnaryOpKind) -> FormulaType {
    match op {
        UnaryOpKind::NumberToText | UnaryOpKind::BooleanToText => FormulaType::String,
        UnaryOpKind::NumberToBoolean | UnaryOpKind::TextToBoolean | UnaryOpKind::Not => {
            FormulaType::Boolean
        }
        UnaryOpKind::NumberToDecimal => FormulaType::Decimal,
        UnaryOpKind::NumberToDate | UnaryOpKind::TextToDate => FormulaType::Date,
        _ => FormulaType::Number,
    }
}
