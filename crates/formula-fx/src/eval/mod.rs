//! Tree-walking evaluator over the bound IR.
//!
//! [`EvalVisitor::eval`] is a recursive descent that returns boxed futures, so evaluation can
//! suspend wherever a row fetch or an async host function is awaited. The cancellation token in
//! [`EvalContext`] is checked before every node, which is the only way an evaluation aborts;
//! everything else that can go wrong at run time comes back as [`Value::Error`].
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::FxResult;
use crate::functions::{self, FunctionImpl, HostFunction};
use crate::ir::{AggregateCoercionKind, BinaryOpKind, IrNode, NodeKind, Span};
use crate::scope::{ScopeAccessSymbol, ScopeId};
use crate::udf::{UdfRegistry, UserDefinedFunction};
use crate::value::{DValue, ErrorKind, ErrorValue, LambdaValue, RecordValue, TableValue, Value};

mod context;
mod guard;
pub mod operators;

pub use context::EvalContext;
pub use guard::{RegionGuard, SingleThreadedGuard};

/// Everything a running evaluation can see besides its row context.
pub struct EvalVisitor<'a> {
    config: &'a EngineConfig,
    symbols: &'a HashMap<String, Value>,
    udfs: &'a UdfRegistry,
    host_functions: &'a HashMap<String, Arc<dyn HostFunction>>,
}

impl<'a> EvalVisitor<'a> {
    pub fn new(
        config: &'a EngineConfig,
        symbols: &'a HashMap<String, Value>,
        udfs: &'a UdfRegistry,
        host_functions: &'a HashMap<String, Arc<dyn HostFunction>>,
    ) -> Self {
        Self {
            config,
            symbols,
            udfs,
            host_functions,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        self.config
    }

    pub fn eval<'b>(&'b self, node: &'b IrNode, ctx: &'b EvalContext) -> BoxFuture<'b, FxResult<Value>> {
        Box::pin(async move {
            ctx.check_cancelled()?;

            let value = match &node.kind {
                NodeKind::Text(s) => Value::String(s.clone()),
                NodeKind::Number(n) => operators::finite(*n),
                NodeKind::Decimal(d) => Value::Decimal(d.clone()),
                NodeKind::Boolean(b) => Value::Boolean(*b),
                NodeKind::Color(c) => Value::Color(*c),
                NodeKind::Date(d) => Value::Date(*d),
                NodeKind::DateTime(dt) => Value::DateTime(*dt),
                NodeKind::Blank => Value::Blank(node.ty),
                NodeKind::Record { fields } => {
                    let mut values = Vec::with_capacity(fields.len());
                    for (name, field) in fields {
                        values.push((name.clone(), self.eval(field, ctx).await?));
                    }
                    Value::Record(RecordValue::new(values))
                }
                NodeKind::Table { rows } => {
                    let mut out = Vec::with_capacity(rows.len());
                    for row in rows {
                        out.push(match self.eval(row, ctx).await? {
                            Value::Record(record) => DValue::Value(record),
                            Value::Blank(_) => DValue::Blank,
                            Value::Error(err) => DValue::Error(err),
                            other => DValue::Value(RecordValue::new([("Value", other)])),
                        });
                    }
                    Value::Table(TableValue::from_rows(out))
                }
                NodeKind::Call {
                    function,
                    args,
                    scope,
                } => self.eval_call(function, args, *scope, ctx).await?,
                // Outside a call's argument list a lazy node is simply evaluated once control
                // reaches it.
                NodeKind::LazyEval(inner) => self.eval(inner, ctx).await?,
                NodeKind::ScopeAccess(symbol) => self.eval_scope_access(symbol, node, ctx),
                NodeKind::ScopeRecord(scope) => match ctx.row(*scope) {
                    Some(record) => Value::Record(record.clone()),
                    None => Value::error(ErrorKind::Internal, "no row is bound for ThisRecord"),
                },
                NodeKind::ResolvedObject(name) => match self.symbols.get(name) {
                    Some(value) => value.clone(),
                    None => Value::error(ErrorKind::NotFound, format!("{name} has no value")),
                },
                NodeKind::RecordFieldAccess { from, field } => {
                    match self.eval(from, ctx).await? {
                        Value::Record(record) => record.try_get_field(node.ty, field).1,
                        Value::Blank(_) => Value::Blank(node.ty),
                        Value::Error(err) => Value::Error(err),
                        other => Value::error(
                            ErrorKind::InvalidArgument,
                            format!("cannot read field {field} of a {:?} value", other.ty()),
                        ),
                    }
                }
                NodeKind::BinaryOp { op, left, right } => {
                    let left = self.eval(left, ctx).await?;
                    let right = self.eval(right, ctx).await?;
                    match (op, &right) {
                        (BinaryOpKind::In | BinaryOpKind::ExactIn, Value::Table(table)) => {
                            let rows = table.rows().await?;
                            ctx.check_cancelled()?;
                            operators::in_rows(*op, &left, &rows)
                        }
                        _ => operators::binary(*op, &left, &right, &self.config.culture),
                    }
                }
                NodeKind::UnaryOp { op, child } => {
                    let child = self.eval(child, ctx).await?;
                    operators::unary(*op, &child, &self.config.culture)
                }
                NodeKind::Chaining(statements) => {
                    let mut last = Value::Blank(node.ty);
                    for statement in statements {
                        last = self.eval(statement, ctx).await?;
                    }
                    last
                }
                NodeKind::AggregateCoercion {
                    op,
                    scope,
                    field_coercions,
                    child,
                } => {
                    let child = self.eval(child, ctx).await?;
                    self.coerce_aggregate(*op, *scope, field_coercions, child, ctx)
                        .await?
                }
                NodeKind::Error { kind, message } => Value::error(*kind, message.clone()),
            };

            Ok(attach_span(value, node.span))
        })
    }

    fn eval_scope_access(
        &self,
        symbol: &ScopeAccessSymbol,
        node: &IrNode,
        ctx: &EvalContext,
    ) -> Value {
        let Some(name) = symbol.name(ctx.scopes()) else {
            return Value::error(ErrorKind::Internal, "scope access outside its symbol table");
        };
        match ctx.row(symbol.parent) {
            Some(record) => record.try_get_field(node.ty, name).1,
            None => Value::error(
                ErrorKind::Internal,
                format!("no row is bound for field {name}"),
            ),
        }
    }

    async fn eval_call(
        &self,
        name: &str,
        args: &[IrNode],
        scope: Option<ScopeId>,
        ctx: &EvalContext,
    ) -> FxResult<Value> {
        // Arguments are evaluated left to right; lazy ones become lambdas the function may or
        // may not invoke.
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            match &arg.kind {
                NodeKind::LazyEval(body) => values.push(Value::Lambda(LambdaValue::new(
                    Arc::clone(body),
                    scope,
                    ctx.clone(),
                ))),
                _ => values.push(self.eval(arg, ctx).await?),
            }
        }

        if let Some(spec) = functions::lookup_function(name) {
            if values.len() < spec.min_args || values.len() > spec.max_args {
                return Ok(Value::error(
                    ErrorKind::InvalidArgument,
                    format!("{} got {} arguments", spec.name, values.len()),
                ));
            }
            log::trace!("calling built-in {}", spec.name);
            return match spec.implementation {
                FunctionImpl::Sync(f) => Ok(f(self, values)),
                FunctionImpl::Async(f) => f(self, ctx, values).await,
            };
        }

        if let Some(udf) = self.udfs.get(name) {
            return self.invoke_user_function(udf, values, ctx).await;
        }

        if let Some(host) = self.host_functions.get(name) {
            let errors: Vec<ErrorValue> = values.iter().filter_map(Value::as_error).cloned().collect();
            if let Some(err) = ErrorValue::combine(errors) {
                return Ok(Value::Error(err));
            }
            let result = host.invoke(values, ctx.cancellation()).await?;
            ctx.check_cancelled()?;
            return Ok(result);
        }

        Ok(Value::error(
            ErrorKind::InvalidFunctionUsage,
            format!("unknown function {name}"),
        ))
    }

    /// Run a user-defined function body with `args` as its parameter record.
    ///
    /// Fails with [`crate::FxError::UdfNotBound`] if the function has not been bound yet.
    pub async fn invoke_user_function(
        &self,
        udf: &UserDefinedFunction,
        args: Vec<Value>,
        ctx: &EvalContext,
    ) -> FxResult<Value> {
        let bound = udf.bound()?;
        let definition = udf.definition();

        if args.len() != definition.parameters.len() {
            return Ok(Value::error(
                ErrorKind::InvalidArgument,
                format!(
                    "{} expects {} arguments, got {}",
                    definition.name,
                    definition.parameters.len(),
                    args.len()
                ),
            ));
        }
        if ctx.call_depth() >= self.config.max_call_depth {
            return Ok(Value::error(
                ErrorKind::InvalidFunctionUsage,
                format!("maximum call depth exceeded in {}", definition.name),
            ));
        }

        let arguments = RecordValue::new(
            definition
                .parameters
                .iter()
                .map(|p| p.name.clone())
                .zip(args),
        );
        let body_ctx =
            ctx.for_function_body(Arc::clone(&bound.scopes), bound.parameter_scope, arguments);
        match self.eval(&bound.body, &body_ctx).await? {
            Value::Blank(_) => Ok(Value::Blank(definition.return_type)),
            value => Ok(value),
        }
    }

    /// Evaluate a lambda, optionally with `row` as the current row of the lambda's scope.
    pub async fn invoke_lambda(
        &self,
        lambda: &LambdaValue,
        row: Option<&RecordValue>,
    ) -> FxResult<Value> {
        match (lambda.scope, row) {
            (Some(scope), Some(record)) => {
                let ctx = lambda.context.with_row(scope, record.clone());
                self.eval(&lambda.body, &ctx).await
            }
            _ => self.eval(&lambda.body, &lambda.context).await,
        }
    }

    /// Evaluate a lambda against one table row. Error rows yield their error, blank rows are
    /// presented as an empty record.
    pub async fn invoke_lambda_on_row(
        &self,
        lambda: &LambdaValue,
        row: &DValue<RecordValue>,
    ) -> FxResult<Value> {
        match row {
            DValue::Value(record) => self.invoke_lambda(lambda, Some(record)).await,
            DValue::Blank => self.invoke_lambda(lambda, Some(&RecordValue::empty())).await,
            DValue::Error(err) => Ok(Value::Error(err.clone())),
        }
    }

    /// Force a possibly-deferred argument.
    pub async fn force(&self, value: Value) -> FxResult<Value> {
        match value {
            Value::Lambda(lambda) => self.invoke_lambda(&lambda, None).await,
            other => Ok(other),
        }
    }

    async fn coerce_aggregate(
        &self,
        op: AggregateCoercionKind,
        scope: ScopeId,
        field_coercions: &[(String, IrNode)],
        value: Value,
        ctx: &EvalContext,
    ) -> FxResult<Value> {
        match (op, value) {
            (AggregateCoercionKind::RecordToRecord, Value::Record(record)) => Ok(Value::Record(
                self.coerce_record(scope, field_coercions, &record, ctx).await?,
            )),
            (AggregateCoercionKind::TableToTable, Value::Table(table)) => {
                let rows = table.rows().await?;
                let mut out = Vec::with_capacity(rows.len());
                for row in rows.iter() {
                    out.push(match row {
                        DValue::Value(record) => DValue::Value(
                            self.coerce_record(scope, field_coercions, record, ctx).await?,
                        ),
                        other => other.clone(),
                    });
                }
                Ok(Value::Table(TableValue::from_rows(out)))
            }
            (_, other @ (Value::Blank(_) | Value::Error(_))) => Ok(other),
            (op, other) => Ok(Value::error(
                ErrorKind::InvalidArgument,
                format!("{op:?} coercion applied to a {:?} value", other.ty()),
            )),
        }
    }

    async fn coerce_record(
        &self,
        scope: ScopeId,
        field_coercions: &[(String, IrNode)],
        record: &RecordValue,
        ctx: &EvalContext,
    ) -> FxResult<RecordValue> {
        let row_ctx = ctx.with_row(scope, record.clone());
        let mut updates = Vec::with_capacity(field_coercions.len());
        for (name, coercion) in field_coercions {
            updates.push((name.clone(), self.eval(coercion, &row_ctx).await?));
        }
        Ok(record.with_fields(updates))
    }
}

fn attach_span(value: Value, span: Span) -> Value {
    match value {
        Value::Error(err) if span != Span::default() => Value::Error(err.with_span(span)),
        other => other,
    }
}
