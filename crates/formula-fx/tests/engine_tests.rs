mod common;

use formula_fx::ir::{BinaryOpKind, FormulaType, IrNode};
use formula_fx::{
    BoundFormula, CancellationToken, Engine, ErrorKind, FxError, FxResult, HostFunction,
    RecordValue, TableValue, Value,
};
use futures_util::future::BoxFuture;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

use common::{eval, record};

fn times_two(name: &str) -> BoundFormula {
    BoundFormula::without_scopes(IrNode::binary(
        BinaryOpKind::Mul,
        IrNode::resolved(name, FormulaType::Number),
        IrNode::number(2.0),
    ))
}

/// Suspends once before answering, so a second evaluation can be started meanwhile.
struct Slow;

impl HostFunction for Slow {
    fn invoke<'a>(
        &'a self,
        _args: Vec<Value>,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, FxResult<Value>> {
        Box::pin(async {
            tokio::task::yield_now().await;
            Ok(Value::from(1.0))
        })
    }
}

#[tokio::test]
async fn recalc_evaluates_dependencies_first_and_publishes_results() {
    let mut engine = Engine::default();
    engine.set_formula("Quadruple", times_two("Double"));
    engine.set_formula("Double", times_two("Base"));
    engine.set_formula(
        "Base",
        BoundFormula::without_scopes(IrNode::number(5.0)),
    );

    assert_eq!(engine.calc_order().unwrap(), ["Base", "Double", "Quadruple"]);

    let results = engine.recalc(&CancellationToken::new()).await.unwrap();
    assert_eq!(
        results,
        vec![
            ("Base".to_string(), Value::Number(5.0)),
            ("Double".to_string(), Value::Number(10.0)),
            ("Quadruple".to_string(), Value::Number(20.0)),
        ]
    );
    assert_eq!(engine.symbol("Quadruple"), Some(&Value::Number(20.0)));

    // Replacing a formula keeps its place and reorders only through dependencies.
    engine.set_formula(
        "Base",
        BoundFormula::without_scopes(IrNode::number(1.0)),
    );
    assert_eq!(engine.formula_names().count(), 3);
    let results = engine.recalc(&CancellationToken::new()).await.unwrap();
    assert_eq!(results[2], ("Quadruple".to_string(), Value::Number(4.0)));
}

#[tokio::test]
async fn circular_formulas_fail_before_evaluation() {
    let mut engine = Engine::default();
    engine.set_formula("A", times_two("B"));
    engine.set_formula("B", times_two("A"));
    engine.set_formula("C", BoundFormula::without_scopes(IrNode::number(1.0)));

    let err = engine.recalc(&CancellationToken::new()).await.unwrap_err();
    assert_eq!(
        err,
        FxError::CircularReference {
            names: vec!["A".to_string(), "B".to_string()]
        }
    );
    assert_eq!(engine.symbol("C"), None);
}

#[tokio::test]
async fn overlapping_evaluations_are_rejected_not_queued() {
    let mut engine = Engine::default();
    engine.add_host_function("Slow", Arc::new(Slow));
    let formula = BoundFormula::without_scopes(IrNode::call("Slow", vec![], FormulaType::Number));
    let cancel = CancellationToken::new();

    let (first, second) = tokio::join!(
        engine.eval(&formula, &cancel),
        engine.eval(&formula, &cancel)
    );
    assert_eq!(first, Ok(Value::Number(1.0)));
    assert!(matches!(second, Err(FxError::ConcurrentEvaluation { .. })));

    // The region is free again once the first evaluation finished.
    assert_eq!(eval(&engine, &formula).await, Value::Number(1.0));
}

#[tokio::test]
async fn json_records_convert_fields_on_access() {
    let mut engine = Engine::default();
    let order = json!({ "qty": "3", "shipped": "not-a-date", "note": null });
    let serde_json::Value::Object(order) = order else {
        unreachable!()
    };
    engine.add_symbol("Order", RecordValue::from_json(order));
    let field = |name: &str, ty: FormulaType| {
        IrNode::field(IrNode::resolved("Order", FormulaType::Record), name, ty)
    };

    let doubled = BoundFormula::without_scopes(IrNode::binary(
        BinaryOpKind::Mul,
        field("qty", FormulaType::Number),
        IrNode::number(2.0),
    ));
    assert_eq!(eval(&engine, &doubled).await, Value::Number(6.0));

    let shipped = BoundFormula::without_scopes(field("shipped", FormulaType::Date));
    match eval(&engine, &shipped).await {
        Value::Error(err) => assert_eq!(err.kind(), ErrorKind::InvalidArgument),
        other => panic!("expected an error value, got {other:?}"),
    }

    let note = BoundFormula::without_scopes(field("note", FormulaType::String));
    assert_eq!(eval(&engine, &note).await, Value::Blank(FormulaType::String));
}

#[test]
fn host_objects_mirror_values() {
    let table = Value::Table(TableValue::from_records([
        record(&[("name", Value::from("a")), ("qty", Value::from(2.0))]),
        record(&[("name", Value::from("b")), ("qty", Value::blank())]),
    ]));
    assert_eq!(
        table.to_object(),
        json!([{ "name": "a", "qty": 2.0 }, { "name": "b", "qty": null }])
    );

    let error = Value::error(ErrorKind::Div0, "division by zero");
    assert_eq!(
        error.to_object(),
        json!({ "error": [{ "kind": "Div0", "message": "division by zero" }] })
    );
}
