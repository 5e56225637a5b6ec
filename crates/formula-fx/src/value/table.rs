use std::sync::Arc;

use crate::delegation::QueryableTableValue;
use crate::error::FxResult;
use crate::value::{DValue, RecordValue};

pub type Rows = Arc<Vec<DValue<RecordValue>>>;

/// Sequence of rows, either held in memory or backed by a remote source.
#[derive(Clone, Debug)]
pub enum TableValue {
    InMemory(Rows),
    Queryable(Arc<QueryableTableValue>),
}

impl TableValue {
    pub fn from_rows(rows: Vec<DValue<RecordValue>>) -> Self {
        TableValue::InMemory(Arc::new(rows))
    }

    pub fn from_records(records: impl IntoIterator<Item = RecordValue>) -> Self {
        Self::from_rows(records.into_iter().map(DValue::Value).collect())
    }

    pub fn empty() -> Self {
        Self::from_rows(Vec::new())
    }

    pub fn queryable(table: QueryableTableValue) -> Self {
        TableValue::Queryable(Arc::new(table))
    }

    /// All rows, materializing a remote table on first access.
    pub async fn rows(&self) -> FxResult<Rows> {
        match self {
            TableValue::InMemory(rows) => Ok(Arc::clone(rows)),
            TableValue::Queryable(table) => table.rows().await,
        }
    }

    /// Rows that are available without a fetch.
    pub fn cached_rows(&self) -> Option<Rows> {
        match self {
            TableValue::InMemory(rows) => Some(Arc::clone(rows)),
            TableValue::Queryable(table) => table.cached_rows(),
        }
    }

    pub fn has_cached_rows(&self) -> bool {
        match self {
            TableValue::InMemory(_) => true,
            TableValue::Queryable(table) => table.has_cached_rows(),
        }
    }

    pub fn as_queryable(&self) -> Option<&QueryableTableValue> {
        match self {
            TableValue::Queryable(table) => Some(table),
            TableValue::InMemory(_) => None,
        }
    }
}

impl PartialEq for TableValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TableValue::Queryable(a), TableValue::Queryable(b)) if Arc::ptr_eq(a, b) => true,
            _ => match (self.cached_rows(), other.cached_rows()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}
