use chrono::{Datelike, Timelike};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::eval::operators::{compare, sort_cmp, to_boolean};
use crate::ir::BinaryOpKind;
use crate::value::{DValue, ErrorValue, RecordValue, Value};

/// Operators a data source may declare support for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FilterOperator {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Not,
}

impl FilterOperator {
    pub fn from_binary(op: BinaryOpKind) -> Option<Self> {
        Some(match op {
            BinaryOpKind::Eq => FilterOperator::Eq,
            BinaryOpKind::NotEq => FilterOperator::NotEq,
            BinaryOpKind::Lt => FilterOperator::Lt,
            BinaryOpKind::LtEq => FilterOperator::LtEq,
            BinaryOpKind::Gt => FilterOperator::Gt,
            BinaryOpKind::GtEq => FilterOperator::GtEq,
            _ => return None,
        })
    }

    fn to_binary(self) -> Option<BinaryOpKind> {
        Some(match self {
            FilterOperator::Eq => BinaryOpKind::Eq,
            FilterOperator::NotEq => BinaryOpKind::NotEq,
            FilterOperator::Lt => BinaryOpKind::Lt,
            FilterOperator::LtEq => BinaryOpKind::LtEq,
            FilterOperator::Gt => BinaryOpKind::Gt,
            FilterOperator::GtEq => BinaryOpKind::GtEq,
            _ => return None,
        })
    }

    pub fn as_odata(self) -> &'static str {
        match self {
            FilterOperator::Eq => "eq",
            FilterOperator::NotEq => "ne",
            FilterOperator::Lt => "lt",
            FilterOperator::LtEq => "le",
            FilterOperator::Gt => "gt",
            FilterOperator::GtEq => "ge",
            FilterOperator::And => "and",
            FilterOperator::Or => "or",
            FilterOperator::Not => "not",
        }
    }
}

/// Row predicate a data source can evaluate.
#[derive(Clone, Debug, PartialEq)]
pub enum FilterExpr {
    /// `column op value`; the column is always on the left.
    Compare {
        column: String,
        op: FilterOperator,
        value: Value,
    },
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
    Not(Box<FilterExpr>),
}

impl FilterExpr {
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            FilterExpr::Compare { column, .. } => {
                if !out.contains(&column.as_str()) {
                    out.push(column);
                }
            }
            FilterExpr::And(items) | FilterExpr::Or(items) => {
                items.iter().for_each(|item| item.collect_columns(out))
            }
            FilterExpr::Not(inner) => inner.collect_columns(out),
        }
    }

    /// Every operator used, including the logical connectives.
    pub fn operators(&self) -> Vec<FilterOperator> {
        let mut out = Vec::new();
        self.collect_operators(&mut out);
        out
    }

    fn collect_operators(&self, out: &mut Vec<FilterOperator>) {
        let mut push = |op| {
            if !out.contains(&op) {
                out.push(op);
            }
        };
        match self {
            FilterExpr::Compare { op, .. } => push(*op),
            FilterExpr::And(items) | FilterExpr::Or(items) => {
                push(if matches!(self, FilterExpr::And(_)) {
                    FilterOperator::And
                } else {
                    FilterOperator::Or
                });
                items.iter().for_each(|item| item.collect_operators(out));
            }
            FilterExpr::Not(inner) => {
                push(FilterOperator::Not);
                inner.collect_operators(out);
            }
        }
    }

    /// Evaluate against one record with the same operator semantics local evaluation uses.
    pub fn evaluate(&self, record: &RecordValue) -> Result<bool, ErrorValue> {
        match self {
            FilterExpr::Compare { column, op, value } => {
                let field = record.try_get_field(value.ty(), column).1;
                let Some(op) = op.to_binary() else {
                    return Err(ErrorValue::invalid_argument(format!(
                        "{} is not a comparison",
                        op.as_odata()
                    )));
                };
                to_boolean(&compare(op, &field, value))
            }
            FilterExpr::And(items) => {
                for item in items {
                    if !item.evaluate(record)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            FilterExpr::Or(items) => {
                for item in items {
                    if item.evaluate(record)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            FilterExpr::Not(inner) => inner.evaluate(record).map(|b| !b),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl SortOrder {
    /// Parse `Ascending`/`Descending` (any case); also accepts the enum's `SortOrder.` prefix.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let text = text.strip_prefix("SortOrder.").unwrap_or(text);
        if text.eq_ignore_ascii_case("ascending") {
            Some(SortOrder::Ascending)
        } else if text.eq_ignore_ascii_case("descending") {
            Some(SortOrder::Descending)
        } else {
            None
        }
    }

    pub(crate) fn apply(self, ord: Ordering) -> Ordering {
        match self {
            SortOrder::Ascending => ord,
            SortOrder::Descending => ord.reverse(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SortKey {
    pub column: String,
    pub order: SortOrder,
}

impl SortKey {
    pub fn new(column: impl Into<String>, order: SortOrder) -> Self {
        Self {
            column: column.into(),
            order,
        }
    }
}

/// Operation pushed to a data source.
#[derive(Clone, Debug, PartialEq)]
pub enum DelegationCommand {
    Filter(FilterExpr),
    OrderBy(Vec<SortKey>),
    Top(usize),
}

/// Keep rows matching `filter`. Rows whose predicate fails become error rows.
pub fn filter_rows(rows: &[DValue<RecordValue>], filter: &FilterExpr) -> Vec<DValue<RecordValue>> {
    let empty = RecordValue::empty();
    rows.iter()
        .filter_map(|row| {
            let record = match row {
                DValue::Value(record) => record,
                DValue::Blank => &empty,
                DValue::Error(_) => return Some(row.clone()),
            };
            match filter.evaluate(record) {
                Ok(true) => Some(row.clone()),
                Ok(false) => None,
                Err(err) => Some(DValue::Error(err)),
            }
        })
        .collect()
}

/// Compare two key tuples under per-key sort orders.
pub(crate) fn compare_keys(a: &[Value], b: &[Value], orders: &[SortOrder]) -> Ordering {
    a.iter()
        .zip(b)
        .zip(orders)
        .map(|((a, b), order)| order.apply(sort_cmp(a, b)))
        .find(|ord| *ord != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

fn row_field(row: &DValue<RecordValue>, column: &str) -> Value {
    match row {
        DValue::Value(record) => record.get_field(column),
        DValue::Blank => Value::blank(),
        DValue::Error(err) => Value::Error(err.clone()),
    }
}

/// Stable multi-column sort.
pub fn sort_rows(rows: &[DValue<RecordValue>], keys: &[SortKey]) -> Vec<DValue<RecordValue>> {
    let orders: Vec<SortOrder> = keys.iter().map(|k| k.order).collect();
    let mut keyed: Vec<(Vec<Value>, DValue<RecordValue>)> = rows
        .iter()
        .map(|row| {
            let key = keys.iter().map(|k| row_field(row, &k.column)).collect();
            (key, row.clone())
        })
        .collect();
    keyed.sort_by(|(a, _), (b, _)| compare_keys(a, b, &orders));
    keyed.into_iter().map(|(_, row)| row).collect()
}

/// Apply `commands` in order, the way a source honoring them would.
pub fn apply_commands(
    rows: &[DValue<RecordValue>],
    commands: &[DelegationCommand],
) -> Vec<DValue<RecordValue>> {
    let mut out = rows.to_vec();
    for command in commands {
        out = match command {
            DelegationCommand::Filter(filter) => filter_rows(&out, filter),
            DelegationCommand::OrderBy(keys) => sort_rows(&out, keys),
            DelegationCommand::Top(n) => {
                out.truncate(*n);
                out
            }
        };
    }
    out
}

/// OData system query options equivalent to a command list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ODataQuery {
    pub filter: Option<String>,
    pub order_by: Option<String>,
    pub top: Option<usize>,
}

impl ODataQuery {
    pub fn from_commands(commands: &[DelegationCommand]) -> Self {
        let mut filters = Vec::new();
        let mut query = ODataQuery::default();
        for command in commands {
            match command {
                DelegationCommand::Filter(filter) => filters.push(render_filter(filter)),
                DelegationCommand::OrderBy(keys) => {
                    query.order_by = Some(
                        keys.iter()
                            .map(|k| match k.order {
                                SortOrder::Ascending => k.column.clone(),
                                SortOrder::Descending => format!("{} desc", k.column),
                            })
                            .collect::<Vec<_>>()
                            .join(","),
                    );
                }
                DelegationCommand::Top(n) => query.top = Some(*n),
            }
        }
        query.filter = match filters.len() {
            0 => None,
            1 => filters.pop(),
            _ => Some(
                filters
                    .iter()
                    .map(|f| format!("({f})"))
                    .collect::<Vec<_>>()
                    .join(" and "),
            ),
        };
        query
    }

    /// `$filter=..&$orderby=..&$top=..`, unencoded.
    pub fn to_query_string(&self) -> String {
        let mut parts = Vec::new();
        if let Some(filter) = &self.filter {
            parts.push(format!("$filter={filter}"));
        }
        if let Some(order_by) = &self.order_by {
            parts.push(format!("$orderby={order_by}"));
        }
        if let Some(top) = self.top {
            parts.push(format!("$top={top}"));
        }
        parts.join("&")
    }
}

fn render_filter(filter: &FilterExpr) -> String {
    match filter {
        FilterExpr::Compare { column, op, value } => {
            format!("{column} {} {}", op.as_odata(), render_literal(value))
        }
        FilterExpr::And(items) | FilterExpr::Or(items) => {
            let joiner = if matches!(filter, FilterExpr::And(_)) {
                " and "
            } else {
                " or "
            };
            let rendered: Vec<String> = items.iter().map(render_filter).collect();
            format!("({})", rendered.join(joiner))
        }
        FilterExpr::Not(inner) => format!("not ({})", render_filter(inner)),
    }
}

fn render_literal(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
        Value::Number(n) => n.to_string(),
        Value::Decimal(d) => d.normalized().to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Date(d) => format!("{:04}-{:02}-{:02}", d.year(), d.month(), d.day()),
        Value::DateTime(dt) => format!(
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
            dt.year(),
            dt.month(),
            dt.day(),
            dt.hour(),
            dt.minute(),
            dt.second()
        ),
        Value::Time(t) => format!("duration'PT{}S'", t.num_seconds()),
        _ => "null".to_string(),
    }
}
