//! Table-shaping functions.
//!
//! `Filter`, `Sort`, `SortByColumns`, `FirstN`, `First` and `LookUp` try to push their work to a
//! remote source first (see [`crate::delegation`]) and otherwise run over the fetched rows.
use futures_util::future::BoxFuture;

use crate::delegation::{
    compare_keys, delegate_filter, delegate_sort, delegate_sort_by_columns, delegate_top,
    sort_rows, SortKey, SortOrder,
};
use crate::config::CultureConfig;
use crate::error::FxResult;
use crate::eval::operators::{to_boolean, to_number, to_text};
use crate::eval::{EvalContext, EvalVisitor};
use crate::functions::{
    expect_lambda, expect_table, invalid_argument, FunctionImpl, FunctionSpec, VAR_ARGS,
};
use crate::ir::FormulaType;
use crate::value::{DValue, LambdaValue, RecordValue, TableValue, Value};

inventory::submit! {
    FunctionSpec {
        name: "Table",
        min_args: 0,
        max_args: VAR_ARGS,
        return_type: FormulaType::Table,
        implementation: FunctionImpl::Async(table_fn),
    }
}

/// `Table(record1, record2, ...)`. Tables among the arguments contribute all their rows; remote
/// ones are fetched.
fn table_fn<'b>(
    _v: &'b EvalVisitor<'_>,
    _ctx: &'b EvalContext,
    args: Vec<Value>,
) -> BoxFuture<'b, FxResult<Value>> {
    Box::pin(async move {
        let mut rows = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                Value::Record(record) => rows.push(DValue::Value(record)),
                Value::Blank(_) => rows.push(DValue::Blank),
                Value::Error(err) => rows.push(DValue::Error(err)),
                Value::Table(table) => rows.extend(table.rows().await?.iter().cloned()),
                other => {
                    return Ok(invalid_argument(format!(
                        "Table expects records, got {:?}",
                        other.ty()
                    )))
                }
            }
        }
        Ok(Value::Table(TableValue::from_rows(rows)))
    })
}

/// Split `(table, lambdas...)` arguments.
fn table_and_lambdas(
    name: &str,
    args: Vec<Value>,
) -> Result<(TableValue, Vec<LambdaValue>), Value> {
    let mut args = args.into_iter();
    let table = match args.next() {
        Some(table) => expect_table(name, table)?,
        None => return Err(invalid_argument(format!("{name} expects a table"))),
    };
    let lambdas = args
        .map(|arg| expect_lambda(name, arg))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((table, lambdas))
}

/// Whether `row` satisfies every predicate. `Err` carries the row to emit in its place.
///
/// Error rows carry no source location, matching the rows a source filters itself.
async fn matches_all(
    v: &EvalVisitor<'_>,
    predicates: &[LambdaValue],
    row: &DValue<RecordValue>,
) -> FxResult<Result<bool, DValue<RecordValue>>> {
    if let DValue::Error(_) = row {
        return Ok(Err(row.clone()));
    }
    for predicate in predicates {
        match to_boolean(&v.invoke_lambda_on_row(predicate, row).await?) {
            Ok(true) => {}
            Ok(false) => return Ok(Ok(false)),
            Err(err) => return Ok(Err(DValue::Error(err.without_spans()))),
        }
    }
    Ok(Ok(true))
}

async fn filter_locally(
    v: &EvalVisitor<'_>,
    table: &TableValue,
    predicates: &[LambdaValue],
) -> FxResult<Vec<DValue<RecordValue>>> {
    let rows = table.rows().await?;
    let mut out = Vec::new();
    for row in rows.iter() {
        match matches_all(v, predicates, row).await? {
            Ok(true) => out.push(row.clone()),
            Ok(false) => {}
            Err(replacement) => out.push(replacement),
        }
    }
    Ok(out)
}

inventory::submit! {
    FunctionSpec {
        name: "Filter",
        min_args: 2,
        max_args: VAR_ARGS,
        return_type: FormulaType::Table,
        implementation: FunctionImpl::Async(filter_fn),
    }
}

/// `Filter(table, cond1, [cond2, ...])`: rows for which every condition holds. A condition that
/// evaluates to an error turns its row into that error.
fn filter_fn<'b>(
    v: &'b EvalVisitor<'_>,
    _ctx: &'b EvalContext,
    args: Vec<Value>,
) -> BoxFuture<'b, FxResult<Value>> {
    Box::pin(async move {
        let (table, predicates) = match table_and_lambdas("Filter", args) {
            Ok(parts) => parts,
            Err(err) => return Ok(err),
        };
        if let Some(delegated) = delegate_filter(v, &table, &predicates).await? {
            return Ok(Value::Table(delegated));
        }
        Ok(Value::Table(TableValue::from_rows(
            filter_locally(v, &table, &predicates).await?,
        )))
    })
}

inventory::submit! {
    FunctionSpec {
        name: "LookUp",
        min_args: 2,
        max_args: 3,
        return_type: FormulaType::Unknown,
        implementation: FunctionImpl::Async(lookup_fn),
    }
}

/// `LookUp(table, condition, [reduction])`: the first matching row, or `reduction` evaluated
/// against it. Blank when nothing matches.
fn lookup_fn<'b>(
    v: &'b EvalVisitor<'_>,
    _ctx: &'b EvalContext,
    args: Vec<Value>,
) -> BoxFuture<'b, FxResult<Value>> {
    Box::pin(async move {
        let (table, mut lambdas) = match table_and_lambdas("LookUp", args) {
            Ok(parts) => parts,
            Err(err) => return Ok(err),
        };
        let reduction = if lambdas.len() == 2 { lambdas.pop() } else { None };

        let found = match delegate_filter(v, &table, &lambdas).await? {
            Some(filtered) => {
                let limited = delegate_top(v, &filtered, 1).unwrap_or(filtered);
                let rows = limited.rows().await?;
                rows.first().cloned()
            }
            None => {
                let rows = table.rows().await?;
                let mut found = None;
                for row in rows.iter() {
                    match matches_all(v, &lambdas, row).await? {
                        Ok(true) => found = Some(row.clone()),
                        Ok(false) => continue,
                        Err(replacement) => found = Some(replacement),
                    }
                    break;
                }
                found
            }
        };

        match (found, reduction) {
            (None, _) => Ok(Value::blank()),
            (Some(row), None) => Ok(row.to_value()),
            (Some(row), Some(reduction)) => v.invoke_lambda_on_row(&reduction, &row).await,
        }
    })
}

fn parse_order(value: &Value, culture: &CultureConfig) -> Result<SortOrder, Value> {
    match value {
        Value::Blank(_) => Ok(SortOrder::Ascending),
        err @ Value::Error(_) => Err(err.clone()),
        other => {
            let text = to_text(other, culture).map_err(Value::Error)?;
            SortOrder::parse(&text)
                .ok_or_else(|| invalid_argument(format!("{text:?} is not a sort order")))
        }
    }
}

inventory::submit! {
    FunctionSpec {
        name: "Sort",
        min_args: 2,
        max_args: 3,
        return_type: FormulaType::Table,
        implementation: FunctionImpl::Async(sort_fn),
    }
}

/// `Sort(table, expr, [order])`. Stable.
fn sort_fn<'b>(
    v: &'b EvalVisitor<'_>,
    _ctx: &'b EvalContext,
    args: Vec<Value>,
) -> BoxFuture<'b, FxResult<Value>> {
    Box::pin(async move {
        let mut args = args.into_iter();
        let (Some(table), Some(expr)) = (args.next(), args.next()) else {
            return Ok(invalid_argument("Sort expects a table and an expression"));
        };
        let table = match expect_table("Sort", table) {
            Ok(table) => table,
            Err(err) => return Ok(err),
        };
        let expr = match expect_lambda("Sort", expr) {
            Ok(expr) => expr,
            Err(err) => return Ok(err),
        };
        let order = match args.next() {
            Some(order) => match parse_order(&v.force(order).await?, &v.config().culture) {
                Ok(order) => order,
                Err(err) => return Ok(err),
            },
            None => SortOrder::Ascending,
        };

        if let Some(delegated) = delegate_sort(v, &table, &expr, order) {
            return Ok(Value::Table(delegated));
        }

        let rows = table.rows().await?;
        let mut keyed = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            let key = v.invoke_lambda_on_row(&expr, row).await?;
            keyed.push((vec![key], row.clone()));
        }
        keyed.sort_by(|(a, _), (b, _)| compare_keys(a, b, &[order]));
        Ok(Value::Table(TableValue::from_rows(
            keyed.into_iter().map(|(_, row)| row).collect(),
        )))
    })
}

inventory::submit! {
    FunctionSpec {
        name: "SortByColumns",
        min_args: 2,
        max_args: VAR_ARGS,
        return_type: FormulaType::Table,
        implementation: FunctionImpl::Async(sort_by_columns_fn),
    }
}

/// `SortByColumns(table, column1, [order1], column2, [order2], ...)`.
///
/// Columns are names, not expressions. An argument following a column that reads as a sort order
/// is taken as that column's order.
fn sort_by_columns_fn<'b>(
    v: &'b EvalVisitor<'_>,
    _ctx: &'b EvalContext,
    args: Vec<Value>,
) -> BoxFuture<'b, FxResult<Value>> {
    Box::pin(async move {
        let mut args = args.into_iter().peekable();
        let table = match args.next().map(|t| expect_table("SortByColumns", t)) {
            Some(Ok(table)) => table,
            Some(Err(err)) => return Ok(err),
            None => return Ok(invalid_argument("SortByColumns expects a table")),
        };

        let mut keys = Vec::new();
        while let Some(column) = args.next() {
            let column = match column {
                Value::String(column) => column,
                err @ Value::Error(_) => return Ok(err),
                other => {
                    return Ok(invalid_argument(format!(
                        "SortByColumns expects column names, got {:?}",
                        other.ty()
                    )))
                }
            };
            let order = match args.peek() {
                Some(Value::String(text)) if SortOrder::parse(text).is_some() => {
                    SortOrder::parse(text)
                }
                Some(Value::Blank(_)) => Some(SortOrder::Ascending),
                Some(next @ Value::Error(_)) => return Ok(next.clone()),
                _ => None,
            };
            if order.is_some() {
                args.next();
            }
            keys.push(SortKey::new(column, order.unwrap_or_default()));
        }

        if let Some(delegated) = delegate_sort_by_columns(v, &table, keys.clone()) {
            return Ok(Value::Table(delegated));
        }

        let rows = table.rows().await?;
        Ok(Value::Table(TableValue::from_rows(sort_rows(&rows, &keys))))
    })
}

/// Row count argument of `FirstN`. Fractions truncate; negatives mean zero.
fn row_count(v: &EvalVisitor<'_>, value: Option<&Value>) -> Result<usize, Value> {
    match value {
        None | Some(Value::Blank(_)) => Ok(1),
        Some(value) => {
            let n = to_number(value, &v.config().culture).map_err(Value::Error)?;
            Ok(if n.is_finite() && n > 0.0 {
                n.trunc() as usize
            } else {
                0
            })
        }
    }
}

async fn first_n(v: &EvalVisitor<'_>, table: &TableValue, n: usize) -> FxResult<TableValue> {
    if let Some(delegated) = delegate_top(v, table, n) {
        return Ok(delegated);
    }
    let rows = table.rows().await?;
    Ok(TableValue::from_rows(rows.iter().take(n).cloned().collect()))
}

inventory::submit! {
    FunctionSpec {
        name: "FirstN",
        min_args: 1,
        max_args: 2,
        return_type: FormulaType::Table,
        implementation: FunctionImpl::Async(first_n_fn),
    }
}

fn first_n_fn<'b>(
    v: &'b EvalVisitor<'_>,
    _ctx: &'b EvalContext,
    args: Vec<Value>,
) -> BoxFuture<'b, FxResult<Value>> {
    Box::pin(async move {
        let mut args = args.into_iter();
        let table = match args.next().map(|t| expect_table("FirstN", t)) {
            Some(Ok(table)) => table,
            Some(Err(err)) => return Ok(err),
            None => return Ok(invalid_argument("FirstN expects a table")),
        };
        let n = match row_count(v, args.next().as_ref()) {
            Ok(n) => n,
            Err(err) => return Ok(err),
        };
        Ok(Value::Table(first_n(v, &table, n).await?))
    })
}

inventory::submit! {
    FunctionSpec {
        name: "First",
        min_args: 1,
        max_args: 1,
        return_type: FormulaType::Record,
        implementation: FunctionImpl::Async(first_fn),
    }
}

/// `First(table)`: the first row, blank for an empty table.
fn first_fn<'b>(
    v: &'b EvalVisitor<'_>,
    _ctx: &'b EvalContext,
    args: Vec<Value>,
) -> BoxFuture<'b, FxResult<Value>> {
    Box::pin(async move {
        let table = match args.into_iter().next().map(|t| expect_table("First", t)) {
            Some(Ok(table)) => table,
            Some(Err(err)) => return Ok(err),
            None => return Ok(invalid_argument("First expects a table")),
        };
        let rows = first_n(v, &table, 1).await?.rows().await?;
        Ok(rows
            .first()
            .map(DValue::to_value)
            .unwrap_or_else(|| Value::Blank(FormulaType::Record)))
    })
}

inventory::submit! {
    FunctionSpec {
        name: "ForAll",
        min_args: 2,
        max_args: 2,
        return_type: FormulaType::Table,
        implementation: FunctionImpl::Async(for_all_fn),
    }
}

/// `ForAll(table, expr)`: one result row per input row. Records become rows as they are; other
/// results are wrapped in a single `Value` column.
fn for_all_fn<'b>(
    v: &'b EvalVisitor<'_>,
    _ctx: &'b EvalContext,
    args: Vec<Value>,
) -> BoxFuture<'b, FxResult<Value>> {
    Box::pin(async move {
        let (table, lambdas) = match table_and_lambdas("ForAll", args) {
            Ok(parts) => parts,
            Err(err) => return Ok(err),
        };
        let [expr] = lambdas.as_slice() else {
            return Ok(invalid_argument("ForAll expects a table and an expression"));
        };
        let rows = table.rows().await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            out.push(match v.invoke_lambda_on_row(expr, row).await? {
                Value::Record(record) => DValue::Value(record),
                Value::Blank(_) => DValue::Blank,
                Value::Error(err) => DValue::Error(err),
                other => DValue::Value(RecordValue::new([("Value", other)])),
            });
        }
        Ok(Value::Table(TableValue::from_rows(out)))
    })
}
