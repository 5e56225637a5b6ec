use futures_util::future::BoxFuture;

use crate::error::FxResult;
use crate::eval::operators::to_text;
use crate::eval::{EvalContext, EvalVisitor};
use crate::functions::{
    expect_lambda, expect_table, invalid_argument, FunctionImpl, FunctionSpec, VAR_ARGS,
};
use crate::ir::FormulaType;
use crate::value::Value;

inventory::submit! {
    FunctionSpec {
        name: "Concatenate",
        min_args: 1,
        max_args: VAR_ARGS,
        return_type: FormulaType::String,
        implementation: FunctionImpl::Sync(concatenate_fn),
    }
}

fn concatenate_fn(v: &EvalVisitor<'_>, args: Vec<Value>) -> Value {
    let mut out = String::new();
    for arg in &args {
        match to_text(arg, &v.config().culture) {
            Ok(s) => out.push_str(&s),
            Err(err) => return Value::Error(err),
        }
    }
    Value::String(out)
}

inventory::submit! {
    FunctionSpec {
        name: "Concat",
        min_args: 2,
        max_args: 3,
        return_type: FormulaType::String,
        implementation: FunctionImpl::Async(concat_fn),
    }
}

/// `Concat(table, expr, [separator])`.
fn concat_fn<'b>(
    v: &'b EvalVisitor<'_>,
    _ctx: &'b EvalContext,
    args: Vec<Value>,
) -> BoxFuture<'b, FxResult<Value>> {
    Box::pin(async move {
        let culture = &v.config().culture;
        let mut args = args.into_iter();
        let (Some(table), Some(expr)) = (args.next(), args.next()) else {
            return Ok(invalid_argument("Concat expects a table and an expression"));
        };
        let separator = match args.next() {
            Some(sep) => match to_text(&sep, culture) {
                Ok(sep) => sep,
                Err(err) => return Ok(Value::Error(err)),
            },
            None => String::new(),
        };
        let table = match expect_table("Concat", table) {
            Ok(table) => table,
            Err(err) => return Ok(err),
        };
        let expr = match expect_lambda("Concat", expr) {
            Ok(expr) => expr,
            Err(err) => return Ok(err),
        };

        let rows = table.rows().await?;
        let mut parts = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            match to_text(&v.invoke_lambda_on_row(&expr, row).await?, culture) {
                Ok(part) => parts.push(part),
                Err(err) => return Ok(Value::Error(err)),
            }
        }
        Ok(Value::String(parts.join(&separator)))
    })
}

inventory::submit! {
    FunctionSpec {
        name: "Len",
        min_args: 1,
        max_args: 1,
        return_type: FormulaType::Number,
        implementation: FunctionImpl::Sync(len_fn),
    }
}

fn len_fn(v: &EvalVisitor<'_>, args: Vec<Value>) -> Value {
    map_text(v, &args, "Len", |s| Value::Number(s.chars().count() as f64))
}

inventory::submit! {
    FunctionSpec {
        name: "Upper",
        min_args: 1,
        max_args: 1,
        return_type: FormulaType::String,
        implementation: FunctionImpl::Sync(upper_fn),
    }
}

fn upper_fn(v: &EvalVisitor<'_>, args: Vec<Value>) -> Value {
    map_text(v, &args, "Upper", |s| Value::String(s.to_uppercase()))
}

inventory::submit! {
    FunctionSpec {
        name: "Lower",
        min_args: 1,
        max_args: 1,
        return_type: FormulaType::String,
        implementation: FunctionImpl::Sync(lower_fn),
    }
}

fn lower_fn(v: &EvalVisitor<'_>, args: Vec<Value>) -> Value {
    map_text(v, &args, "Lower", |s| Value::String(s.to_lowercase()))
}

fn map_text(v: &EvalVisitor<'_>, args: &[Value], name: &str, f: impl Fn(&str) -> Value) -> Value {
    let [value] = args else {
        return invalid_argument(format!("{name} expects one argument"));
    };
    match to_text(value, &v.config().culture) {
        Ok(s) => f(&s),
        Err(err) => Value::Error(err),
    }
}
