mod common;

use formula_fx::ir::{BinaryOpKind, FormulaType, IrNode, UnaryOpKind};
use formula_fx::scope::ScopeSymbolTable;
use formula_fx::{
    BoundFormula, CancellationToken, Engine, EngineConfig, ErrorKind, FnHostFunction, FxError,
    TableValue, Value,
};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{eval, record, rows_of};

fn counter(engine: &mut Engine, name: &str) -> Arc<AtomicUsize> {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    engine.add_host_function(
        name,
        Arc::new(FnHostFunction(move |_args: Vec<Value>| {
            seen.fetch_add(1, Ordering::SeqCst);
            Value::from(99.0)
        })),
    );
    calls
}

#[tokio::test]
async fn sum_over_process_event_durations() {
    let mut engine = Engine::default();
    let durations = [10.0, 20.0, 60.0, 40.0, 20.0, 60.0, 60.0, 10.0, 20.0, 180.0];
    engine.add_symbol(
        "ProcessEvents",
        TableValue::from_records(
            durations
                .iter()
                .map(|d| record(&[("Duration", Value::from(*d))])),
        ),
    );

    let mut scopes = ScopeSymbolTable::new();
    let row = scopes.new_scope();
    let duration = scopes.access(row, "Duration").unwrap();
    let formula = BoundFormula::new(
        IrNode::scoped_call(
            "Sum",
            row,
            vec![
                IrNode::resolved("ProcessEvents", FormulaType::Table),
                IrNode::lazy(IrNode::scope_access(duration, FormulaType::Number)),
            ],
            FormulaType::Number,
        ),
        scopes,
    );

    assert_eq!(eval(&engine, &formula).await, Value::Number(480.0));
}

#[tokio::test]
async fn if_never_evaluates_the_branch_not_taken() {
    let mut engine = Engine::default();
    let calls = counter(&mut engine, "SideEffect");

    let branch = |cond: bool| {
        BoundFormula::without_scopes(IrNode::call(
            "If",
            vec![
                IrNode::boolean(cond),
                IrNode::lazy(IrNode::number(1.0)),
                IrNode::lazy(IrNode::call("SideEffect", vec![], FormulaType::Number)),
            ],
            FormulaType::Number,
        ))
    };

    assert_eq!(eval(&engine, &branch(true)).await, Value::Number(1.0));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    assert_eq!(eval(&engine, &branch(false)).await, Value::Number(99.0));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn and_stops_at_the_first_false() {
    let mut engine = Engine::default();
    let calls = counter(&mut engine, "SideEffect");
    let formula = BoundFormula::without_scopes(IrNode::call(
        "And",
        vec![
            IrNode::lazy(IrNode::boolean(false)),
            IrNode::lazy(IrNode::call("SideEffect", vec![], FormulaType::Number)),
        ],
        FormulaType::Boolean,
    ));

    assert_eq!(eval(&engine, &formula).await, Value::Boolean(false));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancelled_token_aborts_before_any_value() {
    let engine = Engine::default();
    let formula = BoundFormula::without_scopes(IrNode::binary(
        BinaryOpKind::Add,
        IrNode::number(1.0),
        IrNode::number(2.0),
    ));
    let cancel = CancellationToken::new();
    cancel.cancel();

    assert_eq!(engine.eval(&formula, &cancel).await, Err(FxError::Cancelled));
}

#[tokio::test]
async fn cancellation_during_evaluation_stops_at_the_next_node() {
    let mut engine = Engine::default();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let later = Arc::new(AtomicUsize::new(0));
    let seen = later.clone();
    engine.add_host_function(
        "CancelNow",
        Arc::new(FnHostFunction(move |_args: Vec<Value>| {
            trigger.cancel();
            Value::blank()
        })),
    );
    engine.add_host_function(
        "After",
        Arc::new(FnHostFunction(move |_args: Vec<Value>| {
            seen.fetch_add(1, Ordering::SeqCst);
            Value::blank()
        })),
    );

    let formula = BoundFormula::without_scopes(IrNode::chain(vec![
        IrNode::call("CancelNow", vec![], FormulaType::Void),
        IrNode::call("After", vec![], FormulaType::Void),
        IrNode::number(1.0),
    ]));

    let result = engine.eval(&formula, &cancel).await;
    assert!(matches!(result, Err(ref err) if err.is_cancelled()));
    assert_eq!(later.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn value_errors_are_returned_not_raised() {
    let engine = Engine::default();
    let formula = BoundFormula::without_scopes(IrNode::binary(
        BinaryOpKind::Div,
        IrNode::number(1.0),
        IrNode::number(0.0),
    ));

    match eval(&engine, &formula).await {
        Value::Error(err) => assert_eq!(err.kind(), ErrorKind::Div0),
        other => panic!("expected an error value, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_function_is_an_invalid_function_usage_value() {
    let engine = Engine::default();
    let formula = BoundFormula::without_scopes(IrNode::call(
        "NoSuchThing",
        vec![IrNode::number(1.0)],
        FormulaType::Unknown,
    ));

    match eval(&engine, &formula).await {
        Value::Error(err) => assert_eq!(err.kind(), ErrorKind::InvalidFunctionUsage),
        other => panic!("expected an error value, got {other:?}"),
    }
}

#[tokio::test]
async fn record_fields_and_chaining() {
    let engine = Engine::default();
    let formula = BoundFormula::without_scopes(IrNode::chain(vec![
        IrNode::number(1.0),
        IrNode::field(
            IrNode::record(vec![
                ("b", IrNode::text("second")),
                ("a", IrNode::text("first")),
            ]),
            "a",
            FormulaType::String,
        ),
    ]));

    assert_eq!(eval(&engine, &formula).await, Value::from("first"));
}

#[tokio::test]
async fn with_binds_a_record_as_the_row() {
    let engine = Engine::default();
    let mut scopes = ScopeSymbolTable::new();
    let with_scope = scopes.new_scope();
    let x = scopes.access(with_scope, "x").unwrap();
    let formula = BoundFormula::new(
        IrNode::scoped_call(
            "With",
            with_scope,
            vec![
                IrNode::record(vec![("x", IrNode::number(20.0))]),
                IrNode::lazy(IrNode::binary(
                    BinaryOpKind::Mul,
                    IrNode::scope_access(x, FormulaType::Number),
                    IrNode::number(2.0),
                )),
            ],
            FormulaType::Number,
        ),
        scopes,
    );

    assert_eq!(eval(&engine, &formula).await, Value::Number(40.0));
}

#[tokio::test]
async fn aggregate_coercion_rewrites_only_listed_fields() {
    let engine = Engine::default();
    let mut scopes = ScopeSymbolTable::new();
    let row = scopes.new_scope();
    let qty = scopes.access(row, "Qty").unwrap();
    let formula = BoundFormula::new(
        IrNode::new(
            formula_fx::ir::NodeKind::AggregateCoercion {
                op: formula_fx::ir::AggregateCoercionKind::TableToTable,
                scope: row,
                field_coercions: vec![(
                    "Qty".to_string(),
                    IrNode::unary(
                        UnaryOpKind::NumberToText,
                        IrNode::scope_access(qty, FormulaType::Number),
                        FormulaType::String,
                    ),
                )],
                child: Box::new(IrNode::table(vec![
                    IrNode::record(vec![
                        ("Name", IrNode::text("a")),
                        ("Qty", IrNode::number(2.0)),
                    ]),
                    IrNode::record(vec![
                        ("Name", IrNode::text("b")),
                        ("Qty", IrNode::number(3.0)),
                    ]),
                ])),
            },
            FormulaType::Table,
        ),
        scopes,
    );

    let rows = rows_of(&eval(&engine, &formula).await).await;
    assert_eq!(
        rows,
        vec![
            Value::Record(record(&[("Name", Value::from("a")), ("Qty", Value::from("2"))])),
            Value::Record(record(&[("Name", Value::from("b")), ("Qty", Value::from("3"))])),
        ]
    );
}

#[tokio::test]
async fn culture_controls_text_to_number() {
    let config = EngineConfig::from_json(r#"{"culture": {"name": "de-DE", "decimalSeparator": ","}}"#)
        .unwrap();
    let engine = Engine::new(config);
    let formula = BoundFormula::without_scopes(IrNode::unary(
        UnaryOpKind::TextToNumber,
        IrNode::text("1,5"),
        FormulaType::Number,
    ));

    assert_eq!(eval(&engine, &formula).await, Value::Number(1.5));
}

#[tokio::test]
async fn out_of_range_dates_are_error_values() {
    let engine = Engine::default();
    let date = |y: f64, m: f64, d: f64| {
        IrNode::call(
            "Date",
            vec![IrNode::number(y), IrNode::number(m), IrNode::number(d)],
            FormulaType::Date,
        )
    };
    let formulas = [
        date(2024.0, 1.0, 1e17),
        date(1e18, 1.0, 1.0),
        date(2024.0, -1e19, 1.0),
        IrNode::binary(BinaryOpKind::Add, date(2024.0, 1.0, 1.0), IrNode::number(1e17)),
        IrNode::call(
            "DateAdd",
            vec![date(2024.0, 1.0, 1.0), IrNode::number(1e17)],
            FormulaType::Date,
        ),
    ];

    for root in formulas {
        let value = eval(&engine, &BoundFormula::without_scopes(root)).await;
        assert!(value.is_error(), "expected an error value, got {value:?}");
    }

    let in_range = BoundFormula::without_scopes(date(2024.0, 14.0, 0.0));
    assert_eq!(
        eval(&engine, &in_range).await,
        Value::Date(chrono::NaiveDate::from_ymd_opt(2025, 1, 31).unwrap())
    );
}
