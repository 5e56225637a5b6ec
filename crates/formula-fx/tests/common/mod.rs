#![allow(dead_code)]

use formula_fx::delegation::{DelegationCapabilities, InMemoryTableProvider, QueryableTableValue};
use formula_fx::{BoundFormula, CancellationToken, Engine, RecordValue, TableValue, Value};
use std::sync::Arc;

pub fn record(fields: &[(&str, Value)]) -> RecordValue {
    RecordValue::new(fields.iter().map(|(name, value)| (*name, value.clone())))
}

pub fn accounts() -> Vec<RecordValue> {
    [
        ("Contoso", "Seattle", 700.0),
        ("Adventure Works", "Berlin", 150.0),
        ("Fabrikam", "Seattle", 320.0),
        ("Northwind", "Lisbon", 90.0),
        ("Blue Yonder", "Berlin", 540.0),
    ]
    .into_iter()
    .map(|(name, city, revenue)| {
        record(&[
            ("name", Value::from(name)),
            ("city", Value::from(city)),
            ("revenue", Value::from(revenue)),
        ])
    })
    .collect()
}

/// `name` and `revenue` are sortable and filterable, `city` is neither. `Account Name` is the
/// display name of `name`, `Non-sortable string column` the display name of `city`.
pub fn account_capabilities() -> DelegationCapabilities {
    DelegationCapabilities::new()
        .with_sortable(["name", "revenue"])
        .with_filterable(["name", "revenue"])
        .with_columns(["city"])
        .with_all_filter_operators()
        .with_display_name("Account Name", "name")
        .with_display_name("Non-sortable string column", "city")
        .with_top(true)
}

pub fn accounts_provider() -> Arc<InMemoryTableProvider> {
    Arc::new(InMemoryTableProvider::from_records(
        "Accounts",
        account_capabilities(),
        accounts(),
    ))
}

pub fn remote_table(provider: &Arc<InMemoryTableProvider>) -> Value {
    Value::Table(TableValue::queryable(QueryableTableValue::new(
        provider.clone(),
    )))
}

pub async fn eval(engine: &Engine, formula: &BoundFormula) -> Value {
    engine
        .eval(formula, &CancellationToken::new())
        .await
        .expect("evaluation failed")
}

/// Rows of a table value, fetching if needed.
pub async fn rows_of(value: &Value) -> Vec<Value> {
    match value {
        Value::Table(table) => table
            .rows()
            .await
            .expect("fetch failed")
            .iter()
            .map(|row| row.to_value())
            .collect(),
        other => panic!("expected a table, got {other:?}"),
    }
}

pub async fn column_of(value: &Value, column: &str) -> Vec<Value> {
    rows_of(value)
        .await
        .into_iter()
        .map(|row| match row {
            Value::Record(record) => record.get_field(column),
            other => other,
        })
        .collect()
}
