use futures_util::future::BoxFuture;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

use crate::delegation::{apply_commands, DelegationCapabilities, DelegationCommand, ODataQuery};
use crate::error::{FxError, FxResult};
use crate::ir::FormulaType;
use crate::value::{DValue, RecordSource, RecordValue, TableValue, Value};

type Rows = Arc<Vec<DValue<RecordValue>>>;

/// Connector for a remote tabular source.
///
/// `fetch` receives the commands accumulated on a [`QueryableTableValue`] and must return the
/// rows a full local evaluation of those commands would produce.
pub trait TableProvider: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> &DelegationCapabilities;

    fn fetch<'a>(
        &'a self,
        commands: &'a [DelegationCommand],
    ) -> BoxFuture<'a, FxResult<Vec<DValue<RecordValue>>>>;
}

/// Table values that can take push-down commands.
pub trait SupportsDelegationCommands {
    /// A new table with `command` appended, or `None` if the source cannot honor it after the
    /// commands already attached. `None` means: evaluate this operation locally.
    fn try_add_command(&self, command: DelegationCommand) -> Option<TableValue>;
}

/// Remote table plus the commands pushed to it so far.
///
/// Rows are fetched on first access and cached for the lifetime of the value; later accesses,
/// including concurrent ones, reuse the same fetch.
pub struct QueryableTableValue {
    provider: Arc<dyn TableProvider>,
    commands: Vec<DelegationCommand>,
    rows: OnceCell<Rows>,
}

impl fmt::Debug for QueryableTableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryableTableValue")
            .field("source", &self.provider.name())
            .field("commands", &self.commands)
            .field("cached", &self.rows.initialized())
            .finish()
    }
}

impl QueryableTableValue {
    pub fn new(provider: Arc<dyn TableProvider>) -> Self {
        Self {
            provider,
            commands: Vec::new(),
            rows: OnceCell::new(),
        }
    }

    pub fn source_name(&self) -> &str {
        self.provider.name()
    }

    pub fn capabilities(&self) -> &DelegationCapabilities {
        self.provider.capabilities()
    }

    pub fn commands(&self) -> &[DelegationCommand] {
        &self.commands
    }

    pub fn query(&self) -> ODataQuery {
        ODataQuery::from_commands(&self.commands)
    }

    pub async fn rows(&self) -> FxResult<Rows> {
        let rows = self
            .rows
            .get_or_try_init(|| async {
                log::debug!(
                    "fetching rows from {} ({} commands)",
                    self.provider.name(),
                    self.commands.len()
                );
                let caps = Arc::new(self.capabilities().clone());
                let rows = self.provider.fetch(&self.commands).await?;
                Ok::<_, FxError>(Arc::new(
                    rows.into_iter()
                        .map(|row| SourceRow::wrap(row, &caps))
                        .collect(),
                ))
            })
            .await?;
        Ok(Arc::clone(rows))
    }

    pub fn cached_rows(&self) -> Option<Rows> {
        self.rows.get().cloned()
    }

    pub fn has_cached_rows(&self) -> bool {
        self.rows.initialized()
    }

    /// Whether a `Top` is attached. Nothing can follow it.
    pub fn has_row_limit(&self) -> bool {
        self.commands
            .iter()
            .any(|c| matches!(c, DelegationCommand::Top(_)))
    }

    /// Whether `command` can follow the commands already attached.
    ///
    /// Filters combine with each other and with one ordering; one `Top` closes the query.
    pub fn accepts(&self, command: &DelegationCommand) -> bool {
        let caps = self.capabilities();
        if self.has_row_limit() {
            return false;
        }
        match command {
            DelegationCommand::Top(_) => caps.supports_top,
            DelegationCommand::OrderBy(keys) => {
                !keys.is_empty()
                    && !self
                        .commands
                        .iter()
                        .any(|c| matches!(c, DelegationCommand::OrderBy(_)))
                    && keys.iter().all(|k| caps.can_sort(&k.column))
            }
            DelegationCommand::Filter(filter) => {
                filter.columns().into_iter().all(|c| caps.can_filter(c))
                    && filter
                        .operators()
                        .into_iter()
                        .all(|op| caps.supports_operator(op))
            }
        }
    }
}

/// Fetched row that also answers to the display names of its source's columns.
#[derive(Debug)]
struct SourceRow {
    record: RecordValue,
    caps: Arc<DelegationCapabilities>,
}

impl SourceRow {
    fn wrap(row: DValue<RecordValue>, caps: &Arc<DelegationCapabilities>) -> DValue<RecordValue> {
        match row {
            DValue::Value(record) => DValue::Value(RecordValue::from_source(Arc::new(SourceRow {
                record,
                caps: Arc::clone(caps),
            }))),
            other => other,
        }
    }
}

impl RecordSource for SourceRow {
    fn field_names(&self) -> Vec<String> {
        self.record.field_names()
    }

    fn try_get_field(&self, ty: FormulaType, name: &str) -> Option<Value> {
        let column = self.caps.resolve_column(name).unwrap_or(name);
        match self.record.try_get_field(ty, column) {
            (true, value) => Some(value),
            (false, _) => None,
        }
    }
}

impl SupportsDelegationCommands for QueryableTableValue {
    fn try_add_command(&self, command: DelegationCommand) -> Option<TableValue> {
        if !self.accepts(&command) {
            return None;
        }
        let mut commands = self.commands.clone();
        commands.push(command);
        Some(TableValue::queryable(QueryableTableValue {
            provider: Arc::clone(&self.provider),
            commands,
            rows: OnceCell::new(),
        }))
    }
}

impl SupportsDelegationCommands for TableValue {
    fn try_add_command(&self, command: DelegationCommand) -> Option<TableValue> {
        self.as_queryable()?.try_add_command(command)
    }
}

/// Provider over rows held in memory.
///
/// Commands are applied with the same comparison and ordering rules local evaluation uses. Every
/// fetch is counted and its command list recorded, which makes it convenient for tests.
pub struct InMemoryTableProvider {
    name: String,
    capabilities: DelegationCapabilities,
    rows: Vec<DValue<RecordValue>>,
    fetches: AtomicUsize,
    received: Mutex<Vec<Vec<DelegationCommand>>>,
}

impl InMemoryTableProvider {
    pub fn new(
        name: impl Into<String>,
        capabilities: DelegationCapabilities,
        rows: Vec<DValue<RecordValue>>,
    ) -> Self {
        Self {
            name: name.into(),
            capabilities,
            rows,
            fetches: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn from_records(
        name: impl Into<String>,
        capabilities: DelegationCapabilities,
        records: impl IntoIterator<Item = RecordValue>,
    ) -> Self {
        Self::new(
            name,
            capabilities,
            records.into_iter().map(DValue::Value).collect(),
        )
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Command lists of every fetch so far, oldest first.
    pub fn received_commands(&self) -> Vec<Vec<DelegationCommand>> {
        match self.received.lock() {
            Ok(received) => received.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl TableProvider for InMemoryTableProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &DelegationCapabilities {
        &self.capabilities
    }

    fn fetch<'a>(
        &'a self,
        commands: &'a [DelegationCommand],
    ) -> BoxFuture<'a, FxResult<Vec<DValue<RecordValue>>>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        match self.received.lock() {
            Ok(mut received) => received.push(commands.to_vec()),
            Err(poisoned) => poisoned.into_inner().push(commands.to_vec()),
        }
        let rows = apply_commands(&self.rows, commands);
        Box::pin(async move { Ok(rows) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegation::{FilterExpr, FilterOperator, SortKey, SortOrder};
    use crate::value::Value;

    fn provider() -> Arc<InMemoryTableProvider> {
        Arc::new(InMemoryTableProvider::from_records(
            "Items",
            DelegationCapabilities::new()
                .with_sortable(["Qty"])
                .with_filterable(["Qty"])
                .with_filter_operators([FilterOperator::Gt])
                .with_top(true),
            (1..=5).map(|i| RecordValue::new([("Qty", Value::from(i as f64))])),
        ))
    }

    #[test]
    fn top_closes_the_command_list() {
        let table = QueryableTableValue::new(provider());
        let top = table.try_add_command(DelegationCommand::Top(2)).unwrap();
        assert!(!table.has_row_limit());
        assert!(top.as_queryable().unwrap().has_row_limit());

        assert!(top
            .try_add_command(DelegationCommand::OrderBy(vec![SortKey::new(
                "Qty",
                SortOrder::Ascending
            )]))
            .is_none());
        assert!(top.try_add_command(DelegationCommand::Top(1)).is_none());
    }

    #[test]
    fn unsupported_operator_or_second_ordering_is_rejected() {
        let table = QueryableTableValue::new(provider());
        let lt = DelegationCommand::Filter(FilterExpr::Compare {
            column: "Qty".into(),
            op: FilterOperator::Lt,
            value: Value::from(3.0),
        });
        assert!(table.try_add_command(lt).is_none());

        let ordered = table
            .try_add_command(DelegationCommand::OrderBy(vec![SortKey::new(
                "Qty",
                SortOrder::Descending,
            )]))
            .unwrap();
        assert!(ordered
            .try_add_command(DelegationCommand::OrderBy(vec![SortKey::new(
                "Qty",
                SortOrder::Ascending,
            )]))
            .is_none());
    }
}
