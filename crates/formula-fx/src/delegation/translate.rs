//! IR → delegation command translation.
//!
//! Planning is structural and never evaluates anything, so the bind-time checker can share it.
//! Only once a plan is known to fit the source are its constant operands evaluated, each exactly
//! once, in the lambda's outer context.
use futures_util::future::BoxFuture;

use crate::delegation::{DelegationCapabilities, FilterExpr, FilterOperator};
use crate::error::FxResult;
use crate::eval::{EvalContext, EvalVisitor};
use crate::ir::{IrNode, NodeKind, UnaryOpKind};
use crate::scope::{ScopeId, ScopeSymbolTable};
use crate::value::Value;

/// Column read directly from the current row of `scope`, if `node` is exactly that.
///
/// Only plain field references count. Computed expressions, even constant-foldable ones, are
/// not columns.
pub(crate) fn column_of<'n>(
    node: &'n IrNode,
    scope: ScopeId,
    scopes: &'n ScopeSymbolTable,
) -> Option<&'n str> {
    match &node.kind {
        NodeKind::ScopeAccess(symbol) if symbol.parent == scope => symbol.name(scopes),
        NodeKind::RecordFieldAccess { from, field } => match &from.kind {
            NodeKind::ScopeRecord(id) if *id == scope => Some(field.as_str()),
            _ => None,
        },
        NodeKind::LazyEval(inner) => column_of(inner, scope, scopes),
        _ => None,
    }
}

#[derive(Debug)]
pub(crate) enum PredicatePlan<'n> {
    Compare {
        column: String,
        op: FilterOperator,
        constant: &'n IrNode,
    },
    And(Vec<PredicatePlan<'n>>),
    Or(Vec<PredicatePlan<'n>>),
    Not(Box<PredicatePlan<'n>>),
}

impl<'n> PredicatePlan<'n> {
    /// Plan `node` as a row predicate over `scope`, resolving columns through `caps`.
    pub(crate) fn plan(
        node: &'n IrNode,
        scope: ScopeId,
        scopes: &'n ScopeSymbolTable,
        caps: &DelegationCapabilities,
    ) -> Option<Self> {
        match &node.kind {
            NodeKind::LazyEval(inner) => Self::plan(inner, scope, scopes, caps),
            NodeKind::BinaryOp { op, left, right } => {
                let (column, constant, op) = match (
                    column_of(left, scope, scopes),
                    column_of(right, scope, scopes),
                ) {
                    (Some(column), None) => (column, right.as_ref(), *op),
                    (None, Some(column)) => (column, left.as_ref(), op.flipped()),
                    _ => return None,
                };
                let op = FilterOperator::from_binary(op)?;
                if constant.reads_scope(scope) {
                    return None;
                }
                Some(PredicatePlan::Compare {
                    column: caps.resolve_column(column)?.to_string(),
                    op,
                    constant,
                })
            }
            NodeKind::UnaryOp {
                op: UnaryOpKind::Not,
                child,
            } => Some(PredicatePlan::Not(Box::new(Self::plan(
                child, scope, scopes, caps,
            )?))),
            NodeKind::Call { function, args, .. } => {
                let plans = || {
                    args.iter()
                        .map(|arg| Self::plan(arg, scope, scopes, caps))
                        .collect::<Option<Vec<_>>>()
                };
                match function.to_ascii_uppercase().as_str() {
                    "AND" => Some(PredicatePlan::And(plans()?)),
                    "OR" => Some(PredicatePlan::Or(plans()?)),
                    "NOT" => {
                        let [arg] = args.as_slice() else {
                            return None;
                        };
                        Some(PredicatePlan::Not(Box::new(Self::plan(
                            arg, scope, scopes, caps,
                        )?)))
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn visit(&self, f: &mut dyn FnMut(&PredicatePlan<'n>)) {
        f(self);
        match self {
            PredicatePlan::Compare { .. } => {}
            PredicatePlan::And(items) | PredicatePlan::Or(items) => {
                items.iter().for_each(|item| item.visit(f))
            }
            PredicatePlan::Not(inner) => inner.visit(f),
        }
    }

    /// Whether the source can evaluate this predicate.
    pub(crate) fn fits(&self, caps: &DelegationCapabilities) -> bool {
        let mut fits = true;
        self.visit(&mut |plan| {
            fits &= match plan {
                PredicatePlan::Compare { column, op, .. } => {
                    caps.can_filter(column) && caps.supports_operator(*op)
                }
                PredicatePlan::And(_) => caps.supports_operator(FilterOperator::And),
                PredicatePlan::Or(_) => caps.supports_operator(FilterOperator::Or),
                PredicatePlan::Not(_) => caps.supports_operator(FilterOperator::Not),
            };
        });
        fits
    }

    /// Evaluate the constant operands and build the filter.
    ///
    /// `None` when a constant is not a scalar a source can compare against (an error, a record, a
    /// table, a lambda, a color).
    pub(crate) fn materialize<'b>(
        &'b self,
        v: &'b EvalVisitor<'_>,
        ctx: &'b EvalContext,
    ) -> BoxFuture<'b, FxResult<Option<FilterExpr>>> {
        Box::pin(async move {
            Ok(match self {
                PredicatePlan::Compare {
                    column,
                    op,
                    constant,
                } => match v.eval(constant, ctx).await? {
                    Value::Error(_)
                    | Value::Record(_)
                    | Value::Table(_)
                    | Value::Lambda(_)
                    | Value::Color(_) => None,
                    value => Some(FilterExpr::Compare {
                        column: column.clone(),
                        op: *op,
                        value,
                    }),
                },
                PredicatePlan::And(items) | PredicatePlan::Or(items) => {
                    let mut exprs = Vec::with_capacity(items.len());
                    for item in items {
                        match item.materialize(v, ctx).await? {
                            Some(expr) => exprs.push(expr),
                            None => return Ok(None),
                        }
                    }
                    Some(if matches!(self, PredicatePlan::And(_)) {
                        FilterExpr::And(exprs)
                    } else {
                        FilterExpr::Or(exprs)
                    })
                }
                PredicatePlan::Not(inner) => inner
                    .materialize(v, ctx)
                    .await?
                    .map(|expr| FilterExpr::Not(Box::new(expr))),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOpKind, FormulaType};

    #[test]
    fn column_on_the_right_flips_the_operator() {
        let mut scopes = ScopeSymbolTable::new();
        let row = scopes.new_scope();
        let qty = scopes.access(row, "Qty").unwrap();
        let caps = DelegationCapabilities::new().with_filterable(["Qty"]);

        let node = IrNode::binary(
            BinaryOpKind::Lt,
            IrNode::number(5.0),
            IrNode::scope_access(qty, FormulaType::Number),
        );
        let plan = PredicatePlan::plan(&node, row, &scopes, &caps).unwrap();
        assert!(matches!(
            plan,
            PredicatePlan::Compare { ref column, op: FilterOperator::Gt, .. } if column == "Qty"
        ));
    }

    #[test]
    fn computed_columns_and_row_dependent_constants_do_not_plan() {
        let mut scopes = ScopeSymbolTable::new();
        let row = scopes.new_scope();
        let qty = scopes.access(row, "Qty").unwrap();
        let price = scopes.access(row, "Price").unwrap();
        let caps = DelegationCapabilities::new().with_filterable(["Qty", "Price"]);

        let computed = IrNode::binary(
            BinaryOpKind::Gt,
            IrNode::binary(
                BinaryOpKind::Add,
                IrNode::scope_access(qty, FormulaType::Number),
                IrNode::number(0.0),
            ),
            IrNode::number(1.0),
        );
        assert!(PredicatePlan::plan(&computed, row, &scopes, &caps).is_none());

        let two_columns = IrNode::binary(
            BinaryOpKind::Gt,
            IrNode::scope_access(qty, FormulaType::Number),
            IrNode::scope_access(price, FormulaType::Number),
        );
        assert!(PredicatePlan::plan(&two_columns, row, &scopes, &caps).is_none());
    }
}
