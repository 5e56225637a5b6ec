//! Bind-time delegation check.
//!
//! The binder hands each table-shaped call to [`DelegationChecker`] together with the capability
//! sets of the remote sources it knows about. The checker walks the call's table argument down to
//! its source, replays the command chain the evaluator would build and reports, per call, whether
//! it can be pushed to the source. It never evaluates anything: filter constants are only
//! checked for shape here and evaluated at run time.
use serde::Serialize;
use std::collections::HashMap;

use crate::delegation::translate::{column_of, PredicatePlan};
use crate::delegation::{DelegationCapabilities, SortOrder};
use crate::ir::{IrNode, NodeKind, Span};
use crate::scope::{ScopeId, ScopeSymbolTable};

/// Table functions the checker knows how to reason about.
const CHECKED_FUNCTIONS: &[&str] = &[
    "FILTER",
    "LOOKUP",
    "SORT",
    "SORTBYCOLUMNS",
    "FIRSTN",
    "FIRST",
    "COUNTROWS",
];

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum DelegationStatus {
    Delegable,
    NotDelegable { reason: String },
    /// The call does not read from a remote source; there is nothing to delegate.
    NotApplicable,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DelegationCheck {
    pub function: String,
    pub span: Span,
    pub status: DelegationStatus,
    pub warnings: Vec<String>,
}

impl DelegationCheck {
    pub fn is_delegable(&self) -> bool {
        self.status == DelegationStatus::Delegable
    }
}

/// Command chain replayed against one source.
#[derive(Clone, Copy)]
struct Chain<'c> {
    source: &'c str,
    caps: &'c DelegationCapabilities,
    ordered: bool,
    topped: bool,
}

enum Simulated<'c> {
    Local,
    Remote(Chain<'c>),
    Broken { source: &'c str, reason: String },
}

#[derive(Clone, Debug)]
pub struct DelegationChecker {
    sources: HashMap<String, DelegationCapabilities>,
    count_rows_warning: bool,
}

impl Default for DelegationChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl DelegationChecker {
    pub fn new() -> Self {
        Self {
            sources: HashMap::new(),
            count_rows_warning: true,
        }
    }

    /// Register a remote source under the name the IR refers to it by.
    pub fn with_source(mut self, name: impl Into<String>, caps: DelegationCapabilities) -> Self {
        self.sources.insert(name.into(), caps);
        self
    }

    pub fn with_count_rows_warning(mut self, enabled: bool) -> Self {
        self.count_rows_warning = enabled;
        self
    }

    /// Check every table call in `root`, outermost first.
    pub fn check_formula(&self, root: &IrNode, scopes: &ScopeSymbolTable) -> Vec<DelegationCheck> {
        let mut checks = Vec::new();
        root.any(&mut |node| {
            if let NodeKind::Call { function, .. } = &node.kind {
                if is_checked(function) {
                    checks.push(self.check_call(node, scopes));
                }
            }
            false
        });
        checks
    }

    /// Check a single call node. Calls the checker does not know are `NotApplicable`.
    pub fn check_call(&self, node: &IrNode, scopes: &ScopeSymbolTable) -> DelegationCheck {
        let NodeKind::Call { function, args, .. } = &node.kind else {
            return DelegationCheck {
                function: String::new(),
                span: node.span,
                status: DelegationStatus::NotApplicable,
                warnings: Vec::new(),
            };
        };

        let mut warnings = Vec::new();
        let status = if function.eq_ignore_ascii_case("CountRows") {
            self.check_count_rows(args, scopes, &mut warnings)
        } else {
            match self.simulate(node, scopes) {
                Simulated::Local => DelegationStatus::NotApplicable,
                Simulated::Remote(_) => DelegationStatus::Delegable,
                Simulated::Broken { source, reason } => {
                    warnings.push(format!(
                        "{function} cannot be delegated to {source}: {reason}; rows will be fetched and processed locally"
                    ));
                    DelegationStatus::NotDelegable { reason }
                }
            }
        };

        if let DelegationStatus::NotDelegable { reason } = &status {
            log::debug!("{function} is not delegable: {reason}");
        }
        DelegationCheck {
            function: function.clone(),
            span: node.span,
            status,
            warnings,
        }
    }

    fn check_count_rows(
        &self,
        args: &[IrNode],
        scopes: &ScopeSymbolTable,
        warnings: &mut Vec<String>,
    ) -> DelegationStatus {
        let Some(table) = args.first() else {
            return DelegationStatus::NotApplicable;
        };
        match self.table_chain(table, scopes) {
            Simulated::Local => DelegationStatus::NotApplicable,
            Simulated::Broken { reason, .. } => DelegationStatus::NotDelegable { reason },
            Simulated::Remote(chain) => {
                let narrowed = chain.ordered || chain.topped || !is_source(table);
                if self.count_rows_warning && !narrowed {
                    warnings.push(format!(
                        "CountRows on {} counts every row of the source; narrow it with Filter or FirstN first",
                        chain.source
                    ));
                }
                DelegationStatus::NotDelegable {
                    reason: "CountRows is evaluated over fetched rows".to_string(),
                }
            }
        }
    }

    /// Follow a table-valued argument to its source.
    fn table_chain<'c>(&'c self, node: &'c IrNode, scopes: &'c ScopeSymbolTable) -> Simulated<'c> {
        match &node.kind {
            NodeKind::LazyEval(inner) => self.table_chain(inner, scopes),
            NodeKind::ResolvedObject(name) => match self.sources.get_key_value(name) {
                Some((source, caps)) => Simulated::Remote(Chain {
                    source: source.as_str(),
                    caps,
                    ordered: false,
                    topped: false,
                }),
                None => Simulated::Local,
            },
            NodeKind::Call { function, .. }
                if ["FILTER", "SORT", "SORTBYCOLUMNS", "FIRSTN"]
                    .contains(&function.to_ascii_uppercase().as_str()) =>
            {
                self.simulate(node, scopes)
            }
            _ => Simulated::Local,
        }
    }

    fn simulate<'c>(&'c self, node: &'c IrNode, scopes: &'c ScopeSymbolTable) -> Simulated<'c> {
        let NodeKind::Call {
            function,
            args,
            scope,
        } = &node.kind
        else {
            return Simulated::Local;
        };
        let Some((table, rest)) = args.split_first() else {
            return Simulated::Local;
        };
        let chain = match self.table_chain(table, scopes) {
            Simulated::Remote(chain) => chain,
            Simulated::Local => return Simulated::Local,
            Simulated::Broken { source, .. } => {
                return Simulated::Broken {
                    source,
                    reason: "its table argument is evaluated locally".to_string(),
                }
            }
        };

        let outcome = match function.to_ascii_uppercase().as_str() {
            "FILTER" => filter_step(chain, rest, *scope, scopes),
            "LOOKUP" => filter_step(chain, rest.get(..1).unwrap_or_default(), *scope, scopes),
            "SORT" => sort_step(chain, rest, *scope, scopes),
            "SORTBYCOLUMNS" => sort_by_columns_step(chain, rest),
            "FIRSTN" | "FIRST" => top_step(chain),
            _ => Ok(chain),
        };
        match outcome {
            Ok(chain) => Simulated::Remote(chain),
            Err(reason) => Simulated::Broken {
                source: chain.source,
                reason,
            },
        }
    }
}

fn is_checked(function: &str) -> bool {
    CHECKED_FUNCTIONS.contains(&function.to_ascii_uppercase().as_str())
}

fn is_source(node: &IrNode) -> bool {
    match &node.kind {
        NodeKind::LazyEval(inner) => is_source(inner),
        NodeKind::ResolvedObject(_) => true,
        _ => false,
    }
}

fn filter_step<'c>(
    chain: Chain<'c>,
    predicates: &[IrNode],
    scope: Option<ScopeId>,
    scopes: &ScopeSymbolTable,
) -> Result<Chain<'c>, String> {
    if chain.topped {
        return Err("a filter cannot follow FirstN".to_string());
    }
    let Some(scope) = scope else {
        return Err("the predicate has no row scope".to_string());
    };
    for predicate in predicates {
        let plan = PredicatePlan::plan(predicate, scope, scopes, chain.caps).ok_or_else(|| {
            "the predicate must compare a column with a value that does not depend on the row"
                .to_string()
        })?;
        if !plan.fits(chain.caps) {
            return Err(
                "the predicate uses a column or operator the source cannot filter on".to_string(),
            );
        }
    }
    Ok(chain)
}

fn sort_step<'c>(
    chain: Chain<'c>,
    args: &[IrNode],
    scope: Option<ScopeId>,
    scopes: &ScopeSymbolTable,
) -> Result<Chain<'c>, String> {
    let (Some(expr), Some(scope)) = (args.first(), scope) else {
        return Err("the sort expression has no row scope".to_string());
    };
    let column = column_of(expr, scope, scopes)
        .ok_or_else(|| "the sort expression is not a column".to_string())?;
    if let Some(order) = args.get(1) {
        literal_order(order)?;
    }
    order_step(chain, &[column])
}

fn sort_by_columns_step<'c>(chain: Chain<'c>, args: &[IrNode]) -> Result<Chain<'c>, String> {
    let mut columns = Vec::new();
    let mut args = args.iter().peekable();
    while let Some(arg) = args.next() {
        let NodeKind::Text(column) = &arg.kind else {
            return Err("sort columns must be literal column names".to_string());
        };
        columns.push(column.as_str());
        if let Some(&next) = args.peek() {
            if let NodeKind::Text(text) = &next.kind {
                if SortOrder::parse(text).is_some() {
                    args.next();
                }
            } else {
                literal_order(next)?;
                args.next();
            }
        }
    }
    order_step(chain, &columns)
}

fn literal_order(node: &IrNode) -> Result<SortOrder, String> {
    match &node.kind {
        NodeKind::Text(text) => SortOrder::parse(text),
        _ => None,
    }
    .ok_or_else(|| "the sort order must be Ascending or Descending".to_string())
}

fn order_step<'c>(mut chain: Chain<'c>, columns: &[&str]) -> Result<Chain<'c>, String> {
    if columns.is_empty() {
        return Err("no sort column was given".to_string());
    }
    if chain.topped || chain.ordered {
        return Err("the source already has an ordering or a row limit".to_string());
    }
    if let Some(column) = columns.iter().find(|c| !chain.caps.can_sort(c)) {
        return Err(format!("column {column:?} is not sortable"));
    }
    chain.ordered = true;
    Ok(chain)
}

fn top_step(mut chain: Chain<'_>) -> Result<Chain<'_>, String> {
    if !chain.caps.supports_top {
        return Err("the source does not support a row limit".to_string());
    }
    if chain.topped {
        return Err("the source already has a row limit".to_string());
    }
    chain.topped = true;
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegation::FilterOperator;
    use crate::ir::{BinaryOpKind, FormulaType};
    use pretty_assertions::assert_eq;

    fn checker() -> DelegationChecker {
        DelegationChecker::new().with_source(
            "Accounts",
            DelegationCapabilities::new()
                .with_sortable(["name"])
                .with_filterable(["name", "revenue"])
                .with_filter_operators([FilterOperator::Eq, FilterOperator::Gt])
                .with_display_name("Account Name", "name")
                .with_top(true),
        )
    }

    fn accounts() -> IrNode {
        IrNode::resolved("Accounts", FormulaType::Table)
    }

    #[test]
    fn filter_then_first_n_delegates_but_sort_after_top_does_not() {
        let mut scopes = ScopeSymbolTable::new();
        let row = scopes.new_scope();
        let revenue = scopes.access(row, "revenue").unwrap();
        let filter = IrNode::scoped_call(
            "Filter",
            row,
            vec![
                accounts(),
                IrNode::lazy(IrNode::binary(
                    BinaryOpKind::Gt,
                    IrNode::scope_access(revenue, FormulaType::Number),
                    IrNode::number(1000.0),
                )),
            ],
            FormulaType::Table,
        );
        let first_n = IrNode::call(
            "FirstN",
            vec![filter, IrNode::number(5.0)],
            FormulaType::Table,
        );
        let sorted = IrNode::call(
            "SortByColumns",
            vec![first_n.clone(), IrNode::text("name")],
            FormulaType::Table,
        );

        let checker = checker();
        assert!(checker.check_call(&first_n, &scopes).is_delegable());
        let check = checker.check_call(&sorted, &scopes);
        assert_eq!(
            check.status,
            DelegationStatus::NotDelegable {
                reason: "the source already has an ordering or a row limit".to_string()
            }
        );
        assert_eq!(check.warnings.len(), 1);
    }

    #[test]
    fn unsupported_operator_blocks_filter() {
        let mut scopes = ScopeSymbolTable::new();
        let row = scopes.new_scope();
        let revenue = scopes.access(row, "revenue").unwrap();
        let filter = IrNode::scoped_call(
            "Filter",
            row,
            vec![
                accounts(),
                IrNode::lazy(IrNode::binary(
                    BinaryOpKind::Lt,
                    IrNode::scope_access(revenue, FormulaType::Number),
                    IrNode::number(1000.0),
                )),
            ],
            FormulaType::Table,
        );
        assert!(!checker().check_call(&filter, &scopes).is_delegable());
    }

    #[test]
    fn count_rows_on_the_source_warns() {
        let scopes = ScopeSymbolTable::new();
        let count = IrNode::call("CountRows", vec![accounts()], FormulaType::Number);

        let checks = checker().check_formula(&count, &scopes);
        assert_eq!(checks.len(), 1);
        assert!(!checks[0].is_delegable());
        assert_eq!(checks[0].warnings.len(), 1);

        let quiet = checker().with_count_rows_warning(false);
        assert!(quiet.check_call(&count, &scopes).warnings.is_empty());
    }

    #[test]
    fn local_tables_are_not_applicable() {
        let scopes = ScopeSymbolTable::new();
        let sorted = IrNode::call(
            "SortByColumns",
            vec![
                IrNode::resolved("LocalTable", FormulaType::Table),
                IrNode::text("x"),
            ],
            FormulaType::Table,
        );
        assert_eq!(
            checker().check_call(&sorted, &scopes).status,
            DelegationStatus::NotApplicable
        );
    }
}
