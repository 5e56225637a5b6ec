use bigdecimal::BigDecimal;
use futures_util::future::BoxFuture;

use crate::error::FxResult;
use crate::eval::operators::{finite, to_boolean, to_number};
use crate::eval::{EvalContext, EvalVisitor};
use crate::functions::{
    expect_lambda, expect_table, first_error, invalid_argument, FunctionImpl, FunctionSpec, VAR_ARGS,
};
use crate::ir::FormulaType;
use crate::value::{ErrorValue, Value};

/// Operands of an aggregate: either `(table, expr)` evaluated per row, or a scalar list.
///
/// Returns `Err(value)` when the aggregate must short-circuit with that value.
async fn aggregate_operands(
    v: &EvalVisitor<'_>,
    name: &str,
    args: Vec<Value>,
) -> FxResult<Result<Vec<Value>, Value>> {
    if let [Value::Table(_) | Value::Blank(_), Value::Lambda(_)] = args.as_slice() {
        let mut args = args.into_iter();
        let (Some(table), Some(expr)) = (args.next(), args.next()) else {
            return Ok(Err(invalid_argument(format!("{name} expects a table and an expression"))));
        };
        let table = match expect_table(name, table) {
            Ok(table) => table,
            Err(err) => return Ok(Err(err)),
        };
        let expr = match expect_lambda(name, expr) {
            Ok(expr) => expr,
            Err(err) => return Ok(Err(err)),
        };
        let rows = table.rows().await?;
        let mut values = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            values.push(v.invoke_lambda_on_row(&expr, row).await?);
        }
        return Ok(Ok(values));
    }

    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        values.push(v.force(arg).await?);
    }
    Ok(Ok(values))
}

enum Numbers {
    Float(Vec<f64>),
    Decimal(Vec<BigDecimal>),
}

/// Non-blank operands as numbers. Decimal arithmetic is kept only when every operand is decimal.
fn numbers(v: &EvalVisitor<'_>, values: Vec<Value>) -> Result<Numbers, Value> {
    if let Some(err) = first_error(&values) {
        return Err(err);
    }
    let values: Vec<Value> = values.into_iter().filter(|v| !v.is_blank()).collect();
    if !values.is_empty() && values.iter().all(|v| matches!(v, Value::Decimal(_))) {
        return Ok(Numbers::Decimal(
            values
                .into_iter()
                .filter_map(|v| match v {
                    Value::Decimal(d) => Some(d),
                    _ => None,
                })
                .collect(),
        ));
    }
    values
        .iter()
        .map(|value| to_number(value, &v.config().culture))
        .collect::<Result<Vec<_>, ErrorValue>>()
        .map(Numbers::Float)
        .map_err(Value::Error)
}

macro_rules! aggregate_function {
    ($spec_name:literal, $fn_name:ident, $reduce:ident) => {
        inventory::submit! {
            FunctionSpec {
                name: $spec_name,
                min_args: 1,
                max_args: VAR_ARGS,
                return_type: FormulaType::Number,
                implementation: FunctionImpl::Async($fn_name),
            }
        }

        fn $fn_name<'b>(
            v: &'b EvalVisitor<'_>,
            _ctx: &'b EvalContext,
            args: Vec<Value>,
        ) -> BoxFuture<'b, FxResult<Value>> {
            Box::pin(async move {
                let values = match aggregate_operands(v, $spec_name, args).await? {
                    Ok(values) => values,
                    Err(value) => return Ok(value),
                };
                Ok(match numbers(v, values) {
                    Ok(numbers) => $reduce(numbers),
                    Err(value) => value,
                })
            })
        }
    };
}

aggregate_function!("Sum", sum_fn, sum);
aggregate_function!("Average", average_fn, average);
aggregate_function!("Min", min_fn, min);
aggregate_function!("Max", max_fn, max);

fn sum(numbers: Numbers) -> Value {
    match numbers {
        Numbers::Float(ns) => finite(ns.iter().sum()),
        Numbers::Decimal(ds) => Value::Decimal(ds.into_iter().sum()),
    }
}

fn average(numbers: Numbers) -> Value {
    match numbers {
        Numbers::Float(ns) if ns.is_empty() => Value::Error(ErrorValue::div0()),
        Numbers::Float(ns) => finite(ns.iter().sum::<f64>() / ns.len() as f64),
        Numbers::Decimal(ds) => {
            let count = BigDecimal::from(ds.len() as u64);
            Value::Decimal(ds.into_iter().sum::<BigDecimal>() / count)
        }
    }
}

fn min(numbers: Numbers) -> Value {
    match numbers {
        Numbers::Float(ns) => ns
            .into_iter()
            .reduce(f64::min)
            .map_or(Value::Blank(FormulaType::Number), finite),
        Numbers::Decimal(ds) => ds
            .into_iter()
            .min()
            .map_or(Value::Blank(FormulaType::Decimal), Value::Decimal),
    }
}

fn max(numbers: Numbers) -> Value {
    match numbers {
        Numbers::Float(ns) => ns
            .into_iter()
            .reduce(f64::max)
            .map_or(Value::Blank(FormulaType::Number), finite),
        Numbers::Decimal(ds) => ds
            .into_iter()
            .max()
            .map_or(Value::Blank(FormulaType::Decimal), Value::Decimal),
    }
}

inventory::submit! {
    FunctionSpec {
        name: "Abs",
        min_args: 1,
        max_args: 1,
        return_type: FormulaType::Number,
        implementation: FunctionImpl::Sync(abs_fn),
    }
}

fn abs_fn(v: &EvalVisitor<'_>, args: Vec<Value>) -> Value {
    match args.as_slice() {
        [Value::Decimal(d)] => Value::Decimal(d.abs()),
        [value] => match to_number(value, &v.config().culture) {
            Ok(n) => Value::Number(n.abs()),
            Err(err) => Value::Error(err),
        },
        _ => invalid_argument("Abs expects one argument"),
    }
}

inventory::submit! {
    FunctionSpec {
        name: "Round",
        min_args: 2,
        max_args: 2,
        return_type: FormulaType::Number,
        implementation: FunctionImpl::Sync(round_fn),
    }
}

/// Round half away from zero to `digits` places; negative `digits` round to tens, hundreds, ...
fn round_fn(v: &EvalVisitor<'_>, args: Vec<Value>) -> Value {
    let [number, digits] = args.as_slice() else {
        return invalid_argument("Round expects two arguments");
    };
    let culture = &v.config().culture;
    let (n, digits) = match (to_number(number, culture), to_number(digits, culture)) {
        (Ok(n), Ok(d)) => (n, d.trunc() as i32),
        (Err(err), _) | (_, Err(err)) => return Value::Error(err),
    };
    let factor = 10f64.powi(digits);
    finite((n * factor).round() / factor)
}

inventory::submit! {
    FunctionSpec {
        name: "Sqrt",
        min_args: 1,
        max_args: 1,
        return_type: FormulaType::Number,
        implementation: FunctionImpl::Sync(sqrt_fn),
    }
}

fn sqrt_fn(v: &EvalVisitor<'_>, args: Vec<Value>) -> Value {
    let [value] = args.as_slice() else {
        return invalid_argument("Sqrt expects one argument");
    };
    match to_number(value, &v.config().culture) {
        Ok(n) if n < 0.0 => Value::Error(ErrorValue::numeric()),
        Ok(n) => Value::Number(n.sqrt()),
        Err(err) => Value::Error(err),
    }
}

inventory::submit! {
    FunctionSpec {
        name: "CountRows",
        min_args: 1,
        max_args: 1,
        return_type: FormulaType::Number,
        implementation: FunctionImpl::Async(count_rows_fn),
    }
}

fn count_rows_fn<'b>(
    v: &'b EvalVisitor<'_>,
    _ctx: &'b EvalContext,
    args: Vec<Value>,
) -> BoxFuture<'b, FxResult<Value>> {
    Box::pin(async move {
        let Some(table) = args.into_iter().next() else {
            return Ok(invalid_argument("CountRows expects a table"));
        };
        let table = match expect_table("CountRows", table) {
            Ok(table) => table,
            Err(err) => return Ok(err),
        };
        if let Some(queryable) = table.as_queryable() {
            if v.config().count_rows_warning
                && queryable.commands().is_empty()
                && !queryable.has_cached_rows()
            {
                log::warn!(
                    "CountRows on {} fetches every row of the source",
                    queryable.source_name()
                );
            }
        }
        Ok(Value::Number(table.rows().await?.len() as f64))
    })
}

inventory::submit! {
    FunctionSpec {
        name: "CountIf",
        min_args: 2,
        max_args: VAR_ARGS,
        return_type: FormulaType::Number,
        implementation: FunctionImpl::Async(count_if_fn),
    }
}

/// `CountIf(table, cond1, [cond2, ...])`: rows for which every condition holds.
fn count_if_fn<'b>(
    v: &'b EvalVisitor<'_>,
    _ctx: &'b EvalContext,
    args: Vec<Value>,
) -> BoxFuture<'b, FxResult<Value>> {
    Box::pin(async move {
        let mut args = args.into_iter();
        let table = match args.next().map(|t| expect_table("CountIf", t)) {
            Some(Ok(table)) => table,
            Some(Err(err)) => return Ok(err),
            None => return Ok(invalid_argument("CountIf expects a table")),
        };
        let mut conditions = Vec::new();
        for arg in args {
            match expect_lambda("CountIf", arg) {
                Ok(lambda) => conditions.push(lambda),
                Err(err) => return Ok(err),
            }
        }

        let rows = table.rows().await?;
        let mut count = 0usize;
        'rows: for row in rows.iter() {
            for condition in &conditions {
                match to_boolean(&v.invoke_lambda_on_row(condition, row).await?) {
                    Ok(true) => {}
                    Ok(false) => continue 'rows,
                    Err(err) => return Ok(Value::Error(err)),
                }
            }
            count += 1;
        }
        Ok(Value::Number(count as f64))
    })
}
