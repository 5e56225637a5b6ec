//! Table delegation.
//!
//! A remote table is a [`QueryableTableValue`]: a provider plus the commands pushed to it so far.
//! Table functions first try to append their operation as a [`DelegationCommand`]; when the
//! source cannot take it (capabilities, command order, a predicate that does not translate, or
//! delegation switched off) they fall back to fetching the rows once and applying the operation
//! in memory. Both paths use the comparison and ordering helpers in [`command`], so the result
//! does not depend on which one ran.
mod capabilities;
mod checker;
mod command;
mod queryable;
mod translate;

pub use capabilities::DelegationCapabilities;
pub use checker::{DelegationCheck, DelegationChecker, DelegationStatus};
pub use command::{
    apply_commands, filter_rows, sort_rows, DelegationCommand, FilterExpr, FilterOperator,
    ODataQuery, SortKey, SortOrder,
};
pub(crate) use command::compare_keys;
pub use queryable::{
    InMemoryTableProvider, QueryableTableValue, SupportsDelegationCommands, TableProvider,
};

use crate::error::FxResult;
use crate::eval::EvalVisitor;
use crate::value::{LambdaValue, TableValue};
use translate::{column_of, PredicatePlan};

/// The remote table an operation on `table` could be pushed to.
fn target<'t>(v: &EvalVisitor<'_>, table: &'t TableValue) -> Option<&'t QueryableTableValue> {
    if !v.config().enable_delegation {
        return None;
    }
    table.as_queryable()
}

fn fallback(function: &str, table: &QueryableTableValue, why: &str) -> Option<TableValue> {
    log::debug!(
        "{function} on {} runs locally: {why}",
        table.source_name()
    );
    None
}

/// Push `Filter(table, predicates...)` to the source. One filter command per predicate.
pub(crate) async fn delegate_filter(
    v: &EvalVisitor<'_>,
    table: &TableValue,
    predicates: &[LambdaValue],
) -> FxResult<Option<TableValue>> {
    let Some(queryable) = target(v, table) else {
        return Ok(None);
    };
    if queryable.has_row_limit() {
        return Ok(fallback("Filter", queryable, "a row limit is already attached"));
    }
    let caps = queryable.capabilities();

    let mut filters = Vec::with_capacity(predicates.len());
    for lambda in predicates {
        let Some(scope) = lambda.scope else {
            return Ok(fallback("Filter", queryable, "predicate has no row scope"));
        };
        let ctx = &lambda.context;
        let plan = match PredicatePlan::plan(&lambda.body, scope, ctx.scopes(), caps) {
            Some(plan) if plan.fits(caps) => plan,
            Some(_) => {
                return Ok(fallback(
                    "Filter",
                    queryable,
                    "column or operator not supported by the source",
                ))
            }
            None => return Ok(fallback("Filter", queryable, "predicate does not translate")),
        };
        match plan.materialize(v, ctx).await? {
            Some(filter) => filters.push(filter),
            None => {
                return Ok(fallback(
                    "Filter",
                    queryable,
                    "predicate compares against a non-scalar value",
                ))
            }
        }
    }

    let mut current = table.clone();
    for filter in filters {
        match current.try_add_command(DelegationCommand::Filter(filter)) {
            Some(next) => current = next,
            None => return Ok(fallback("Filter", queryable, "source rejected the filter")),
        }
    }
    Ok(Some(current))
}

/// Push `Sort(table, column, order)` when the sort expression is a plain column of the row.
pub(crate) fn delegate_sort(
    v: &EvalVisitor<'_>,
    table: &TableValue,
    expr: &LambdaValue,
    order: SortOrder,
) -> Option<TableValue> {
    let queryable = target(v, table)?;
    let Some(column) = expr
        .scope
        .and_then(|scope| column_of(&expr.body, scope, expr.context.scopes()))
    else {
        return fallback("Sort", queryable, "sort expression is not a column");
    };
    delegate_sort_by_columns(v, table, vec![SortKey::new(column, order)])
}

/// Push an ordering. Column names may be logical or display names.
pub(crate) fn delegate_sort_by_columns(
    v: &EvalVisitor<'_>,
    table: &TableValue,
    keys: Vec<SortKey>,
) -> Option<TableValue> {
    let queryable = target(v, table)?;
    let caps = queryable.capabilities();
    let mut resolved = Vec::with_capacity(keys.len());
    for key in keys {
        match caps.resolve_column(&key.column) {
            Some(column) => resolved.push(SortKey::new(column, key.order)),
            None => {
                return fallback(
                    "SortByColumns",
                    queryable,
                    &format!("unknown column {:?}", key.column),
                )
            }
        }
    }
    table
        .try_add_command(DelegationCommand::OrderBy(resolved))
        .or_else(|| fallback("SortByColumns", queryable, "source rejected the ordering"))
}

/// Push a row limit.
pub(crate) fn delegate_top(v: &EvalVisitor<'_>, table: &TableValue, n: usize) -> Option<TableValue> {
    let queryable = target(v, table)?;
    table
        .try_add_command(DelegationCommand::Top(n))
        .or_else(|| fallback("FirstN", queryable, "source rejected the row limit"))
}
