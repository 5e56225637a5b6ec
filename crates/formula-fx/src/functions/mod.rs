use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::OnceLock;
use tokio_util::sync::CancellationToken;

use crate::error::FxResult;
use crate::eval::{EvalContext, EvalVisitor};
use crate::ir::FormulaType;
use crate::value::{ErrorKind, ErrorValue, LambdaValue, TableValue, Value};

pub(crate) mod date_time;
mod logical;
mod math;
mod table;
mod text;

pub const VAR_ARGS: usize = usize::MAX;

/// Implementation of a built-in.
///
/// Functions that only look at eagerly evaluated arguments are `Sync`. Anything that invokes a
/// lambda, forces a deferred argument or reads table rows is `Async`.
#[derive(Clone, Copy)]
pub enum FunctionImpl {
    Sync(fn(&EvalVisitor<'_>, Vec<Value>) -> Value),
    Async(
        for<'b> fn(&'b EvalVisitor<'_>, &'b EvalContext, Vec<Value>) -> BoxFuture<'b, FxResult<Value>>,
    ),
}

#[derive(Clone, Copy)]
pub struct FunctionSpec {
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: usize,
    pub return_type: FormulaType,
    pub implementation: FunctionImpl,
}

inventory::collect!(FunctionSpec);

/// Iterate all [`FunctionSpec`] registrations collected via [`inventory`].
pub fn iter_function_specs() -> impl Iterator<Item = &'static FunctionSpec> {
    inventory::iter::<FunctionSpec>.into_iter()
}

fn registry() -> &'static HashMap<String, &'static FunctionSpec> {
    static REGISTRY: OnceLock<HashMap<String, &'static FunctionSpec>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map = HashMap::new();
        for spec in inventory::iter::<FunctionSpec> {
            map.insert(spec.name.to_ascii_uppercase(), spec);
        }
        map
    })
}

/// Case-insensitive lookup of a built-in function.
pub fn lookup_function(name: &str) -> Option<&'static FunctionSpec> {
    registry().get(&name.to_ascii_uppercase()).copied()
}

/// Function supplied by the host at run time.
///
/// Invocation is a suspension point: an implementation may await I/O before producing its
/// value. Arguments arrive fully evaluated; a call with an error argument never reaches the
/// host.
pub trait HostFunction: Send + Sync {
    fn invoke<'a>(
        &'a self,
        args: Vec<Value>,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, FxResult<Value>>;
}

/// Adapts a plain closure into a synchronous [`HostFunction`].
pub struct FnHostFunction<F>(pub F);

impl<F> HostFunction for FnHostFunction<F>
where
    F: Fn(Vec<Value>) -> Value + Send + Sync,
{
    fn invoke<'a>(
        &'a self,
        args: Vec<Value>,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, FxResult<Value>> {
        let value = (self.0)(args);
        Box::pin(async move { Ok(value) })
    }
}

pub(crate) fn first_error(args: &[Value]) -> Option<Value> {
    args.iter()
        .find(|v| v.is_error())
        .cloned()
}

pub(crate) fn invalid_argument(message: impl Into<String>) -> Value {
    Value::Error(ErrorValue::invalid_argument(message))
}

/// Table argument, or the value to return instead (error passthrough or `InvalidArgument`).
pub(crate) fn expect_table(function: &str, value: Value) -> Result<TableValue, Value> {
    match value {
        Value::Table(table) => Ok(table),
        Value::Blank(_) => Ok(TableValue::empty()),
        err @ Value::Error(_) => Err(err),
        other => Err(Value::error(
            ErrorKind::InvalidArgument,
            format!("{function} expects a table, got {:?}", other.ty()),
        )),
    }
}

pub(crate) fn expect_lambda(function: &str, value: Value) -> Result<LambdaValue, Value> {
    match value {
        Value::Lambda(lambda) => Ok(lambda),
        other => Err(Value::error(
            ErrorKind::InvalidArgument,
            format!(
                "{function} expects a row expression, got {:?}",
                other.ty()
            ),
        )),
    }
}
