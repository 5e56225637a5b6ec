use futures_util::future::BoxFuture;

use crate::error::FxResult;
use crate::eval::operators::{to_boolean, values_equal};
use crate::eval::{EvalContext, EvalVisitor};
use crate::functions::{expect_lambda, invalid_argument, FunctionImpl, FunctionSpec, VAR_ARGS};
use crate::ir::FormulaType;
use crate::value::Value;

inventory::submit! {
    FunctionSpec {
        name: "If",
        min_args: 2,
        max_args: VAR_ARGS,
        return_type: FormulaType::Unknown,
        implementation: FunctionImpl::Async(if_fn),
    }
}

/// `If(cond1, then1, [cond2, then2, ...], [else])`. Only the branch taken is forced.
fn if_fn<'b>(
    v: &'b EvalVisitor<'_>,
    _ctx: &'b EvalContext,
    args: Vec<Value>,
) -> BoxFuture<'b, FxResult<Value>> {
    Box::pin(async move {
        let mut args = args.into_iter();
        while let Some(condition) = args.next() {
            let Some(then) = args.next() else {
                return v.force(condition).await;
            };
            match to_boolean(&v.force(condition).await?) {
                Ok(true) => return v.force(then).await,
                Ok(false) => {}
                Err(err) => return Ok(Value::Error(err)),
            }
        }
        Ok(Value::blank())
    })
}

inventory::submit! {
    FunctionSpec {
        name: "Switch",
        min_args: 3,
        max_args: VAR_ARGS,
        return_type: FormulaType::Unknown,
        implementation: FunctionImpl::Async(switch_fn),
    }
}

fn switch_fn<'b>(
    v: &'b EvalVisitor<'_>,
    _ctx: &'b EvalContext,
    args: Vec<Value>,
) -> BoxFuture<'b, FxResult<Value>> {
    Box::pin(async move {
        let mut args = args.into_iter();
        let Some(subject) = args.next() else {
            return Ok(Value::blank());
        };
        let subject = v.force(subject).await?;
        if subject.is_error() {
            return Ok(subject);
        }
        while let Some(candidate) = args.next() {
            let Some(result) = args.next() else {
                return v.force(candidate).await;
            };
            let candidate = v.force(candidate).await?;
            if candidate.is_error() {
                return Ok(candidate);
            }
            if values_equal(&subject, &candidate) {
                return v.force(result).await;
            }
        }
        Ok(Value::blank())
    })
}

inventory::submit! {
    FunctionSpec {
        name: "And",
        min_args: 1,
        max_args: VAR_ARGS,
        return_type: FormulaType::Boolean,
        implementation: FunctionImpl::Async(and_fn),
    }
}

fn and_fn<'b>(
    v: &'b EvalVisitor<'_>,
    _ctx: &'b EvalContext,
    args: Vec<Value>,
) -> BoxFuture<'b, FxResult<Value>> {
    Box::pin(short_circuit(v, args, false))
}

inventory::submit! {
    FunctionSpec {
        name: "Or",
        min_args: 1,
        max_args: VAR_ARGS,
        return_type: FormulaType::Boolean,
        implementation: FunctionImpl::Async(or_fn),
    }
}

fn or_fn<'b>(
    v: &'b EvalVisitor<'_>,
    _ctx: &'b EvalContext,
    args: Vec<Value>,
) -> BoxFuture<'b, FxResult<Value>> {
    Box::pin(short_circuit(v, args, true))
}

/// Force operands in order and stop at the first one equal to `stop_on`.
async fn short_circuit(v: &EvalVisitor<'_>, args: Vec<Value>, stop_on: bool) -> FxResult<Value> {
    for arg in args {
        match to_boolean(&v.force(arg).await?) {
            Ok(b) if b == stop_on => return Ok(Value::Boolean(stop_on)),
            Ok(_) => {}
            Err(err) => return Ok(Value::Error(err)),
        }
    }
    Ok(Value::Boolean(!stop_on))
}

inventory::submit! {
    FunctionSpec {
        name: "Not",
        min_args: 1,
        max_args: 1,
        return_type: FormulaType::Boolean,
        implementation: FunctionImpl::Sync(not_fn),
    }
}

fn not_fn(_v: &EvalVisitor<'_>, args: Vec<Value>) -> Value {
    let [value] = args.as_slice() else {
        return invalid_argument("Not expects one argument");
    };
    match to_boolean(value) {
        Ok(b) => Value::Boolean(!b),
        Err(err) => Value::Error(err),
    }
}

inventory::submit! {
    FunctionSpec {
        name: "IsBlank",
        min_args: 1,
        max_args: 1,
        return_type: FormulaType::Boolean,
        implementation: FunctionImpl::Sync(is_blank_fn),
    }
}

fn is_blank_fn(_v: &EvalVisitor<'_>, args: Vec<Value>) -> Value {
    match args.as_slice() {
        [err @ Value::Error(_)] => err.clone(),
        [Value::Blank(_)] => Value::Boolean(true),
        [Value::String(s)] => Value::Boolean(s.is_empty()),
        [_] => Value::Boolean(false),
        _ => invalid_argument("IsBlank expects one argument"),
    }
}

inventory::submit! {
    FunctionSpec {
        name: "IsError",
        min_args: 1,
        max_args: 1,
        return_type: FormulaType::Boolean,
        implementation: FunctionImpl::Async(is_error_fn),
    }
}

fn is_error_fn<'b>(
    v: &'b EvalVisitor<'_>,
    _ctx: &'b EvalContext,
    args: Vec<Value>,
) -> BoxFuture<'b, FxResult<Value>> {
    Box::pin(async move {
        let mut is_error = false;
        for arg in args {
            is_error |= v.force(arg).await?.is_error();
        }
        Ok(Value::Boolean(is_error))
    })
}

inventory::submit! {
    FunctionSpec {
        name: "IfError",
        min_args: 2,
        max_args: VAR_ARGS,
        return_type: FormulaType::Unknown,
        implementation: FunctionImpl::Async(if_error_fn),
    }
}

/// `IfError(value1, fallback1, [value2, fallback2, ...], [default])`.
///
/// Each value is forced in turn; the first error selects its fallback. Without errors the result
/// is `default` when given, else the last value.
fn if_error_fn<'b>(
    v: &'b EvalVisitor<'_>,
    _ctx: &'b EvalContext,
    args: Vec<Value>,
) -> BoxFuture<'b, FxResult<Value>> {
    Box::pin(async move {
        let mut args = args.into_iter();
        let mut last = Value::blank();
        while let Some(value) = args.next() {
            let Some(fallback) = args.next() else {
                return v.force(value).await;
            };
            last = v.force(value).await?;
            if last.is_error() {
                return v.force(fallback).await;
            }
        }
        Ok(last)
    })
}

inventory::submit! {
    FunctionSpec {
        name: "Coalesce",
        min_args: 1,
        max_args: VAR_ARGS,
        return_type: FormulaType::Unknown,
        implementation: FunctionImpl::Async(coalesce_fn),
    }
}

fn coalesce_fn<'b>(
    v: &'b EvalVisitor<'_>,
    _ctx: &'b EvalContext,
    args: Vec<Value>,
) -> BoxFuture<'b, FxResult<Value>> {
    Box::pin(async move {
        for arg in args {
            match v.force(arg).await? {
                Value::Blank(_) => {}
                Value::String(s) if s.is_empty() => {}
                other => return Ok(other),
            }
        }
        Ok(Value::blank())
    })
}

inventory::submit! {
    FunctionSpec {
        name: "Blank",
        min_args: 0,
        max_args: 0,
        return_type: FormulaType::Blank,
        implementation: FunctionImpl::Sync(blank_fn),
    }
}

fn blank_fn(_v: &EvalVisitor<'_>, _args: Vec<Value>) -> Value {
    Value::blank()
}

inventory::submit! {
    FunctionSpec {
        name: "With",
        min_args: 2,
        max_args: 2,
        return_type: FormulaType::Unknown,
        implementation: FunctionImpl::Async(with_fn),
    }
}

/// `With(record, body)`: evaluate `body` with `record` as its row.
fn with_fn<'b>(
    v: &'b EvalVisitor<'_>,
    _ctx: &'b EvalContext,
    args: Vec<Value>,
) -> BoxFuture<'b, FxResult<Value>> {
    Box::pin(async move {
        let Ok([record, body]) = <[Value; 2]>::try_from(args) else {
            return Ok(invalid_argument("With expects two arguments"));
        };
        let record = match v.force(record).await? {
            Value::Record(record) => record,
            err @ Value::Error(_) => return Ok(err),
            other => {
                return Ok(invalid_argument(format!(
                    "With expects a record, got {:?}",
                    other.ty()
                )))
            }
        };
        let body = match expect_lambda("With", body) {
            Ok(body) => body,
            Err(err) => return Ok(err),
        };
        v.invoke_lambda(&body, Some(&record)).await
    })
}
