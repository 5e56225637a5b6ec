use bigdecimal::BigDecimal;
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

use crate::ir::FormulaType;
use crate::value::{format_time, Color, ErrorValue, LambdaValue, RecordValue, TableValue};

/// Double-dispatch over [`crate::value::Value`] variants.
pub trait ValueVisitor {
    fn visit_number(&mut self, n: f64);
    fn visit_decimal(&mut self, d: &BigDecimal);
    fn visit_boolean(&mut self, b: bool);
    fn visit_string(&mut self, s: &str);
    fn visit_date(&mut self, d: NaiveDate);
    fn visit_date_time(&mut self, dt: NaiveDateTime);
    fn visit_time(&mut self, t: chrono::Duration);
    fn visit_color(&mut self, c: Color);
    fn visit_record(&mut self, record: &RecordValue);
    fn visit_table(&mut self, table: &TableValue);
    fn visit_blank(&mut self, ty: FormulaType);
    fn visit_error(&mut self, err: &ErrorValue);
    fn visit_lambda(&mut self, lambda: &LambdaValue);
}

/// Renders a value as expression text that evaluates back to the same value.
///
/// Remote tables that have not been fetched render as an empty `Table()`.
#[derive(Debug, Default)]
pub struct ExpressionFormatter {
    out: String,
}

impl ExpressionFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> String {
        self.out
    }

    fn write_record_body(&mut self, record: &RecordValue) {
        self.out.push('{');
        for (idx, (name, value)) in record.fields().into_iter().enumerate() {
            if idx > 0 {
                self.out.push_str(", ");
            }
            if name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                self.out.push_str(&name);
            } else {
                self.out.push('\'');
                self.out.push_str(&name.replace('\'', "''"));
                self.out.push('\'');
            }
            self.out.push_str(": ");
            value.visit(self);
        }
        self.out.push('}');
    }
}

impl ValueVisitor for ExpressionFormatter {
    fn visit_number(&mut self, n: f64) {
        if n.fract() == 0.0 && n.abs() < 1e15 {
            self.out.push_str(&(n as i64).to_string());
        } else {
            self.out.push_str(&n.to_string());
        }
    }

    fn visit_decimal(&mut self, d: &BigDecimal) {
        self.out.push_str(&d.normalized().to_string());
    }

    fn visit_boolean(&mut self, b: bool) {
        self.out.push_str(if b { "true" } else { "false" });
    }

    fn visit_string(&mut self, s: &str) {
        self.out.push('"');
        self.out.push_str(&s.replace('"', "\"\""));
        self.out.push('"');
    }

    fn visit_date(&mut self, d: NaiveDate) {
        self.out
            .push_str(&format!("Date({},{},{})", d.year(), d.month(), d.day()));
    }

    fn visit_date_time(&mut self, dt: NaiveDateTime) {
        self.out.push_str(&format!(
            "DateTime({},{},{},{},{},{})",
            dt.year(),
            dt.month(),
            dt.day(),
            dt.hour(),
            dt.minute(),
            dt.second()
        ));
    }

    fn visit_time(&mut self, t: chrono::Duration) {
        self.out.push_str(&format!("TimeValue(\"{}\")", format_time(t)));
    }

    fn visit_color(&mut self, c: Color) {
        self.out
            .push_str(&format!("RGBA({},{},{},{})", c.r, c.g, c.b, c.a as f64 / 255.0));
    }

    fn visit_record(&mut self, record: &RecordValue) {
        self.write_record_body(record);
    }

    fn visit_table(&mut self, table: &TableValue) {
        self.out.push_str("Table(");
        if let Some(rows) = table.cached_rows() {
            for (idx, row) in rows.iter().enumerate() {
                if idx > 0 {
                    self.out.push_str(", ");
                }
                row.to_value().visit(self);
            }
        }
        self.out.push(')');
    }

    fn visit_blank(&mut self, _ty: FormulaType) {
        self.out.push_str("Blank()");
    }

    fn visit_error(&mut self, err: &ErrorValue) {
        self.out.push_str(&format!(
            "Error({{Kind: ErrorKind.{}}})",
            err.kind().as_code()
        ));
    }

    fn visit_lambda(&mut self, _lambda: &LambdaValue) {
        self.out.push_str("<lambda>");
    }
}
