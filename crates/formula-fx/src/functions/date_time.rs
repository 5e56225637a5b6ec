use chrono::{Datelike, Months, NaiveDate, NaiveDateTime, TimeDelta};

use crate::config::CultureConfig;
use crate::eval::operators::{to_number, to_text};
use crate::eval::EvalVisitor;
use crate::functions::{first_error, invalid_argument, FunctionImpl, FunctionSpec};
use crate::ir::FormulaType;
use crate::value::Value;

fn serial_base() -> NaiveDate {
    NaiveDate::from_ymd_opt(1899, 12, 30).unwrap_or(NaiveDate::MIN)
}

/// Days since 1899-12-30, the serial date convention shared with spreadsheets.
pub(crate) fn date_to_serial(date: NaiveDate) -> f64 {
    (date - serial_base()).num_days() as f64
}

pub(crate) fn date_from_serial(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial.abs() > 3_000_000.0 {
        return None;
    }
    add_days(serial_base(), serial.floor() as i64)
}

/// `date` shifted by `days`, or `None` when the result is not a representable date.
pub(crate) fn add_days(date: NaiveDate, days: i64) -> Option<NaiveDate> {
    date.checked_add_signed(TimeDelta::try_days(days)?)
}

/// Parse a date in ISO form or in the culture's short date form.
pub(crate) fn parse_date(text: &str, culture: &CultureConfig) -> Option<NaiveDate> {
    let text = text.trim();
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.date());
    }
    let short = if culture.decimal_separator == ',' {
        "%d.%m.%Y"
    } else {
        "%m/%d/%Y"
    };
    NaiveDate::parse_from_str(text, short).ok()
}

inventory::submit! {
    FunctionSpec {
        name: "Date",
        min_args: 3,
        max_args: 3,
        return_type: FormulaType::Date,
        implementation: FunctionImpl::Sync(date_fn),
    }
}

/// `Date(year, month, day)`. Months and days outside their range roll over, so
/// `Date(2024, 13, 1)` is 2025-01-01 and `Date(2024, 3, 0)` is 2024-02-29.
fn date_fn(v: &EvalVisitor<'_>, args: Vec<Value>) -> Value {
    if let Some(err) = first_error(&args) {
        return err;
    }
    let culture = &v.config().culture;
    let parts: Result<Vec<i64>, _> = args
        .iter()
        .map(|arg| to_number(arg, culture).map(|n| n.trunc() as i64))
        .collect();
    let [year, month, day] = match parts {
        Ok(parts) => match <[i64; 3]>::try_from(parts) {
            Ok(parts) => parts,
            Err(_) => return invalid_argument("Date expects year, month and day"),
        },
        Err(err) => return Value::Error(err),
    };

    let first = year
        .checked_mul(12)
        .and_then(|months| months.checked_add(month.checked_sub(1)?))
        .and_then(|months| {
            let y = i32::try_from(months.div_euclid(12)).ok()?;
            NaiveDate::from_ymd_opt(y, months.rem_euclid(12) as u32 + 1, 1)
        });
    first
        .and_then(|first| add_days(first, day.checked_sub(1)?))
        .map(Value::Date)
        .unwrap_or_else(|| invalid_argument(format!("Date({year}, {month}, {day}) is out of range")))
}

inventory::submit! {
    FunctionSpec {
        name: "DateValue",
        min_args: 1,
        max_args: 1,
        return_type: FormulaType::Date,
        implementation: FunctionImpl::Sync(date_value_fn),
    }
}

fn date_value_fn(v: &EvalVisitor<'_>, args: Vec<Value>) -> Value {
    let culture = &v.config().culture;
    match args.as_slice() {
        [Value::Blank(_)] => Value::Blank(FormulaType::Date),
        [value] => match to_text(value, culture) {
            Ok(text) => parse_date(&text, culture)
                .map(Value::Date)
                .unwrap_or_else(|| invalid_argument(format!("invalid date {text:?}"))),
            Err(err) => Value::Error(err),
        },
        _ => invalid_argument("DateValue expects one argument"),
    }
}

fn date_part(args: &[Value], name: &str, part: fn(NaiveDate) -> u32) -> Value {
    match args {
        [Value::Date(d)] => Value::Number(part(*d) as f64),
        [Value::DateTime(dt)] => Value::Number(part(dt.date()) as f64),
        [Value::Blank(_)] => Value::Blank(FormulaType::Number),
        [err @ Value::Error(_)] => err.clone(),
        [other] => invalid_argument(format!("{name} expects a date, got {:?}", other.ty())),
        _ => invalid_argument(format!("{name} expects one argument")),
    }
}

inventory::submit! {
    FunctionSpec {
        name: "Year",
        min_args: 1,
        max_args: 1,
        return_type: FormulaType::Number,
        implementation: FunctionImpl::Sync(year_fn),
    }
}

fn year_fn(_v: &EvalVisitor<'_>, args: Vec<Value>) -> Value {
    date_part(&args, "Year", |d| d.year().max(0) as u32)
}

inventory::submit! {
    FunctionSpec {
        name: "Month",
        min_args: 1,
        max_args: 1,
        return_type: FormulaType::Number,
        implementation: FunctionImpl::Sync(month_fn),
    }
}

fn month_fn(_v: &EvalVisitor<'_>, args: Vec<Value>) -> Value {
    date_part(&args, "Month", |d| d.month())
}

inventory::submit! {
    FunctionSpec {
        name: "Day",
        min_args: 1,
        max_args: 1,
        return_type: FormulaType::Number,
        implementation: FunctionImpl::Sync(day_fn),
    }
}

fn day_fn(_v: &EvalVisitor<'_>, args: Vec<Value>) -> Value {
    date_part(&args, "Day", |d| d.day())
}

inventory::submit! {
    FunctionSpec {
        name: "DateAdd",
        min_args: 2,
        max_args: 3,
        return_type: FormulaType::Date,
        implementation: FunctionImpl::Sync(date_add_fn),
    }
}

/// `DateAdd(date, amount, [unit])` with unit `Days` (default), `Months`, `Quarters` or `Years`.
fn date_add_fn(v: &EvalVisitor<'_>, args: Vec<Value>) -> Value {
    if let Some(err) = first_error(&args) {
        return err;
    }
    let culture = &v.config().culture;
    let (date, amount, unit) = match args.as_slice() {
        [date, amount] => (date, amount, "days".to_string()),
        [date, amount, unit] => match to_text(unit, culture) {
            Ok(unit) => (date, amount, unit.to_ascii_lowercase()),
            Err(err) => return Value::Error(err),
        },
        _ => return invalid_argument("DateAdd expects a date and an amount"),
    };
    let date = match date {
        Value::Date(d) => *d,
        Value::DateTime(dt) => dt.date(),
        Value::Blank(_) => return Value::Blank(FormulaType::Date),
        other => return invalid_argument(format!("DateAdd expects a date, got {:?}", other.ty())),
    };
    let amount = match to_number(amount, culture) {
        Ok(n) => n.trunc() as i64,
        Err(err) => return Value::Error(err),
    };

    let add_months = |months: i64| {
        let magnitude = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
        if months >= 0 {
            date.checked_add_months(magnitude)
        } else {
            date.checked_sub_months(magnitude)
        }
    };
    let shifted = match unit.as_str() {
        "days" => add_days(date, amount),
        "months" => add_months(amount),
        "quarters" => add_months(amount.saturating_mul(3)),
        "years" => add_months(amount.saturating_mul(12)),
        other => return invalid_argument(format!("unknown DateAdd unit {other:?}")),
    };
    shifted
        .map(Value::Date)
        .unwrap_or_else(|| invalid_argument("DateAdd result is out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_dates_round_trip_through_the_spreadsheet_epoch() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert_eq!(date_to_serial(date), 45306.0);
        assert_eq!(date_from_serial(45306.75), Some(date));
        assert_eq!(date_from_serial(f64::NAN), None);
    }

    #[test]
    fn parses_culture_short_dates() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 1);
        assert_eq!(parse_date("03/01/2024", &CultureConfig::en_us()), expected);
        assert_eq!(parse_date("01.03.2024", &CultureConfig::de_de()), expected);
        assert_eq!(parse_date("2024-03-01", &CultureConfig::de_de()), expected);
        assert_eq!(parse_date("2024-02-30", &CultureConfig::en_us()), None);
    }

    #[test]
    fn huge_day_counts_are_out_of_range_not_a_panic() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(add_days(start, 1e17 as i64), None);
        assert_eq!(add_days(start, i64::MIN), None);
        assert_eq!(
            add_days(start, 31),
            NaiveDate::from_ymd_opt(2024, 2, 1)
        );
        assert_eq!(date_from_serial(1e17), None);
    }
}
