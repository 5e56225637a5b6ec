mod common;

use formula_fx::delegation::{
    DelegationCommand, DelegationStatus, FilterExpr, FilterOperator, InMemoryTableProvider,
    QueryableTableValue, SortKey, SortOrder,
};
use formula_fx::ir::{BinaryOpKind, FormulaType, IrNode, Span};
use formula_fx::scope::{ScopeId, ScopeSymbolTable};
use formula_fx::{BoundFormula, Engine, EngineConfig, FnHostFunction, TableValue, Value};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{accounts_provider, column_of, eval, remote_table, rows_of};

fn engine_with(provider: &Arc<InMemoryTableProvider>, config: EngineConfig) -> Engine {
    let mut engine = Engine::new(config);
    engine.add_symbol("Accounts", remote_table(provider));
    engine.add_symbol("Threshold", Value::from(200.0));
    engine
}

fn without_delegation() -> EngineConfig {
    EngineConfig {
        enable_delegation: false,
        ..EngineConfig::default()
    }
}

/// Evaluate `formula` against a fresh Accounts source.
async fn eval_fresh(config: EngineConfig, formula: &BoundFormula) -> Value {
    eval(&engine_with(&accounts_provider(), config), formula).await
}

fn commands_of(value: &Value) -> Vec<DelegationCommand> {
    match value {
        Value::Table(TableValue::Queryable(table)) => table.commands().to_vec(),
        _ => Vec::new(),
    }
}

fn accounts() -> IrNode {
    IrNode::resolved("Accounts", FormulaType::Table)
}

fn sort_by_columns(column: &str) -> BoundFormula {
    BoundFormula::without_scopes(IrNode::call(
        "SortByColumns",
        vec![accounts(), IrNode::text(column), IrNode::text("Ascending")],
        FormulaType::Table,
    ))
}

/// `Filter(Accounts, <predicate over the row>)`.
fn filter(
    scopes: &mut ScopeSymbolTable,
    predicate: impl FnOnce(&mut ScopeSymbolTable, ScopeId) -> IrNode,
) -> IrNode {
    let row = scopes.new_scope();
    let predicate = predicate(scopes, row);
    IrNode::scoped_call(
        "Filter",
        row,
        vec![accounts(), IrNode::lazy(predicate)],
        FormulaType::Table,
    )
}

fn column(scopes: &mut ScopeSymbolTable, row: ScopeId, name: &str, ty: FormulaType) -> IrNode {
    let symbol = scopes.access(row, name).expect("scope belongs to this table");
    IrNode::scope_access(symbol, ty)
}

fn revenue_above(value: IrNode) -> impl FnOnce(&mut ScopeSymbolTable, ScopeId) -> IrNode {
    move |scopes, row| {
        IrNode::binary(
            BinaryOpKind::Gt,
            column(scopes, row, "revenue", FormulaType::Number),
            value,
        )
    }
}

#[tokio::test]
async fn sort_by_sortable_display_name_is_pushed_down() {
    let provider = accounts_provider();
    let engine = engine_with(&provider, EngineConfig::default());
    let formula = sort_by_columns("Account Name");

    let checks = engine.check_delegation(&formula);
    assert_eq!(checks.len(), 1);
    assert!(checks[0].is_delegable());

    let value = eval(&engine, &formula).await;
    assert_eq!(
        commands_of(&value),
        vec![DelegationCommand::OrderBy(vec![SortKey::new(
            "name",
            SortOrder::Ascending
        )])]
    );
    assert_eq!(
        column_of(&value, "name").await,
        ["Adventure Works", "Blue Yonder", "Contoso", "Fabrikam", "Northwind"]
            .map(Value::from)
            .to_vec()
    );
    assert_eq!(provider.received_commands(), vec![commands_of(&value)]);
}

#[tokio::test]
async fn sort_by_non_sortable_column_is_rejected_and_runs_locally() {
    let provider = accounts_provider();
    let engine = engine_with(&provider, EngineConfig::default());
    let formula = sort_by_columns("Non-sortable string column");

    let checks = engine.check_delegation(&formula);
    assert_eq!(
        checks[0].status,
        DelegationStatus::NotDelegable {
            reason: "column \"Non-sortable string column\" is not sortable".to_string()
        }
    );
    assert_eq!(checks[0].warnings.len(), 1);
    assert_eq!(provider.fetch_count(), 0);

    let value = eval(&engine, &formula).await;
    assert!(commands_of(&value).is_empty());
    assert_eq!(
        column_of(&value, "name").await,
        ["Adventure Works", "Blue Yonder", "Northwind", "Contoso", "Fabrikam"]
            .map(Value::from)
            .to_vec()
    );
    // One plain fetch of the whole source.
    assert_eq!(provider.received_commands(), vec![Vec::new()]);
}

#[tokio::test]
async fn filter_then_first_n_accumulates_commands() {
    let provider = accounts_provider();
    let engine = engine_with(&provider, EngineConfig::default());
    let mut scopes = ScopeSymbolTable::new();
    let filtered = filter(
        &mut scopes,
        revenue_above(IrNode::resolved("Threshold", FormulaType::Number)),
    );
    let formula = BoundFormula::new(
        IrNode::call(
            "FirstN",
            vec![filtered, IrNode::number(2.0)],
            FormulaType::Table,
        ),
        scopes,
    );

    let value = eval(&engine, &formula).await;
    assert_eq!(
        commands_of(&value),
        vec![
            DelegationCommand::Filter(FilterExpr::Compare {
                column: "revenue".to_string(),
                op: FilterOperator::Gt,
                value: Value::from(200.0),
            }),
            DelegationCommand::Top(2),
        ]
    );
    let Value::Table(TableValue::Queryable(table)) = &value else {
        panic!("expected a remote table");
    };
    assert_eq!(
        table.query().to_query_string(),
        "$filter=revenue gt 200&$top=2"
    );
    assert_eq!(
        column_of(&value, "name").await,
        vec![Value::from("Contoso"), Value::from("Fabrikam")]
    );
    assert_eq!(provider.fetch_count(), 1);
}

#[tokio::test]
async fn delegated_and_local_results_agree() {
    let build = |predicate_on_computed: bool| {
        let mut scopes = ScopeSymbolTable::new();
        let row = scopes.new_scope();
        let revenue = column(&mut scopes, row, "revenue", FormulaType::Number);
        let left = if predicate_on_computed {
            IrNode::binary(BinaryOpKind::Add, revenue, IrNode::number(0.0))
        } else {
            revenue
        };
        let predicate = IrNode::binary(BinaryOpKind::GtEq, left, IrNode::number(150.0));
        let filtered = IrNode::scoped_call(
            "Filter",
            row,
            vec![accounts(), IrNode::lazy(predicate)],
            FormulaType::Table,
        );
        let sorted = IrNode::call(
            "SortByColumns",
            vec![filtered, IrNode::text("revenue"), IrNode::text("Descending")],
            FormulaType::Table,
        );
        BoundFormula::new(
            IrNode::call("FirstN", vec![sorted, IrNode::number(3.0)], FormulaType::Table),
            scopes,
        )
    };

    let mut results = Vec::new();
    for (computed, delegation) in [(false, true), (true, true), (false, false)] {
        let provider = accounts_provider();
        let engine = engine_with(
            &provider,
            EngineConfig {
                enable_delegation: delegation,
                ..EngineConfig::default()
            },
        );
        let value = eval(&engine, &build(computed)).await;
        results.push((commands_of(&value).len(), column_of(&value, "name").await));
    }

    let expected = ["Contoso", "Blue Yonder", "Fabrikam"].map(Value::from).to_vec();
    // Fully delegated: filter, ordering and limit all reach the source.
    assert_eq!(results[0], (3, expected.clone()));
    // The computed predicate stays local, and so does everything built on its result.
    assert_eq!(results[1], (0, expected.clone()));
    assert_eq!(results[2], (0, expected));
}

#[tokio::test]
async fn filter_on_a_non_filterable_column_falls_back() {
    let provider = accounts_provider();
    let engine = engine_with(&provider, EngineConfig::default());
    let mut scopes = ScopeSymbolTable::new();
    let filtered = filter(&mut scopes, |scopes, row| {
        IrNode::binary(
            BinaryOpKind::Eq,
            column(scopes, row, "city", FormulaType::String),
            IrNode::text("Berlin"),
        )
    });
    let formula = BoundFormula::new(filtered, scopes);

    let checks = engine.check_delegation(&formula);
    assert!(!checks[0].is_delegable());

    let value = eval(&engine, &formula).await;
    assert!(commands_of(&value).is_empty());
    assert_eq!(
        column_of(&value, "name").await,
        vec![Value::from("Adventure Works"), Value::from("Blue Yonder")]
    );
}

#[tokio::test]
async fn lookup_pushes_filter_and_top_one() {
    let provider = accounts_provider();
    let engine = engine_with(&provider, EngineConfig::default());
    let mut scopes = ScopeSymbolTable::new();
    let row = scopes.new_scope();
    let name = column(&mut scopes, row, "name", FormulaType::String);
    let revenue = column(&mut scopes, row, "revenue", FormulaType::Number);
    let formula = BoundFormula::new(
        IrNode::scoped_call(
            "LookUp",
            row,
            vec![
                accounts(),
                IrNode::lazy(IrNode::binary(
                    BinaryOpKind::Eq,
                    IrNode::text("Fabrikam"),
                    name,
                )),
                IrNode::lazy(revenue),
            ],
            FormulaType::Number,
        ),
        scopes,
    );

    assert_eq!(eval(&engine, &formula).await, Value::Number(320.0));
    assert_eq!(
        provider.received_commands(),
        vec![vec![
            DelegationCommand::Filter(FilterExpr::Compare {
                column: "name".to_string(),
                op: FilterOperator::Eq,
                value: Value::from("Fabrikam"),
            }),
            DelegationCommand::Top(1),
        ]]
    );
}

#[tokio::test]
async fn remote_rows_are_fetched_once() {
    let provider = accounts_provider();
    let table = QueryableTableValue::new(provider.clone());
    assert!(!table.has_cached_rows());

    let (a, b) = tokio::join!(table.rows(), table.rows());
    assert_eq!(a.unwrap().len(), 5);
    assert_eq!(b.unwrap().len(), 5);
    let again = table.rows().await.unwrap();

    assert!(table.has_cached_rows());
    assert_eq!(again.len(), 5);
    assert_eq!(provider.fetch_count(), 1);
}

#[tokio::test]
async fn count_rows_warns_only_on_the_bare_source() {
    let provider = accounts_provider();
    let engine = engine_with(&provider, EngineConfig::default());
    let bare = BoundFormula::without_scopes(IrNode::call(
        "CountRows",
        vec![accounts()],
        FormulaType::Number,
    ));

    let checks = engine.check_delegation(&bare);
    assert_eq!(checks.len(), 1);
    assert_eq!(checks[0].warnings.len(), 1);
    assert_eq!(eval(&engine, &bare).await, Value::Number(5.0));

    let mut scopes = ScopeSymbolTable::new();
    let filtered = filter(&mut scopes, revenue_above(IrNode::number(500.0)));
    let narrowed = BoundFormula::new(
        IrNode::call("CountRows", vec![filtered], FormulaType::Number),
        scopes,
    );
    let checks = engine.check_delegation(&narrowed);
    // CountRows itself, then the Filter it counts.
    assert_eq!(checks.len(), 2);
    assert!(checks[0].warnings.is_empty());
    assert!(checks[1].is_delegable());
    assert_eq!(eval(&engine, &narrowed).await, Value::Number(2.0));
}

#[tokio::test]
async fn display_names_read_the_same_column_with_and_without_delegation() {
    let by_display_name = |scopes: &mut ScopeSymbolTable, row: ScopeId| {
        column(scopes, row, "Account Name", FormulaType::String)
    };
    let formulas: Vec<BoundFormula> = vec![
        {
            let mut scopes = ScopeSymbolTable::new();
            let filtered = filter(&mut scopes, |scopes, row| {
                IrNode::binary(
                    BinaryOpKind::Eq,
                    by_display_name(scopes, row),
                    IrNode::text("Contoso"),
                )
            });
            BoundFormula::new(filtered, scopes)
        },
        {
            let mut scopes = ScopeSymbolTable::new();
            let row = scopes.new_scope();
            let key = by_display_name(&mut scopes, row);
            BoundFormula::new(
                IrNode::scoped_call(
                    "Sort",
                    row,
                    vec![accounts(), IrNode::lazy(key), IrNode::text("Descending")],
                    FormulaType::Table,
                ),
                scopes,
            )
        },
        {
            // The filter on `city` stays local, so the ordering runs over fetched rows.
            let mut scopes = ScopeSymbolTable::new();
            let in_berlin = filter(&mut scopes, |scopes, row| {
                IrNode::binary(
                    BinaryOpKind::Eq,
                    column(scopes, row, "city", FormulaType::String),
                    IrNode::text("Berlin"),
                )
            });
            BoundFormula::new(
                IrNode::call(
                    "SortByColumns",
                    vec![
                        in_berlin,
                        IrNode::text("Account Name"),
                        IrNode::text("Descending"),
                    ],
                    FormulaType::Table,
                ),
                scopes,
            )
        },
    ];
    let expected = [
        vec!["Contoso"],
        vec!["Northwind", "Fabrikam", "Contoso", "Blue Yonder", "Adventure Works"],
        vec!["Blue Yonder", "Adventure Works"],
    ];

    for (formula, expected) in formulas.iter().zip(expected) {
        let expected: Vec<Value> = expected.into_iter().map(Value::from).collect();
        let delegated = eval_fresh(EngineConfig::default(), formula).await;
        let local = eval_fresh(without_delegation(), formula).await;
        assert!(commands_of(&local).is_empty());
        assert_eq!(column_of(&delegated, "name").await, expected);
        assert_eq!(column_of(&local, "name").await, expected);
    }

    let first = eval_fresh(EngineConfig::default(), &formulas[0]).await;
    assert_eq!(commands_of(&first).len(), 1);
}

#[tokio::test]
async fn filter_after_a_row_limit_evaluates_constants_once_per_row() {
    let mut calls = Vec::new();
    for config in [EngineConfig::default(), without_delegation()] {
        let ticks = Arc::new(AtomicUsize::new(0));
        let mut engine = engine_with(&accounts_provider(), config);
        let counter = Arc::clone(&ticks);
        engine.add_host_function(
            "Tick",
            Arc::new(FnHostFunction(move |_args: Vec<Value>| {
                counter.fetch_add(1, Ordering::SeqCst);
                Value::from(200.0)
            })),
        );

        let mut scopes = ScopeSymbolTable::new();
        let row = scopes.new_scope();
        let predicate = IrNode::binary(
            BinaryOpKind::Gt,
            column(&mut scopes, row, "revenue", FormulaType::Number),
            IrNode::call("Tick", vec![], FormulaType::Number),
        );
        let first_two = IrNode::call(
            "FirstN",
            vec![accounts(), IrNode::number(2.0)],
            FormulaType::Table,
        );
        let formula = BoundFormula::new(
            IrNode::scoped_call(
                "Filter",
                row,
                vec![first_two, IrNode::lazy(predicate)],
                FormulaType::Table,
            ),
            scopes,
        );

        let value = eval(&engine, &formula).await;
        assert_eq!(column_of(&value, "name").await, vec![Value::from("Contoso")]);
        calls.push(ticks.load(Ordering::SeqCst));
    }
    assert_eq!(calls, [2, 2]);
}

#[tokio::test]
async fn table_inlines_an_unfetched_remote_table() {
    let provider = accounts_provider();
    let engine = engine_with(&provider, EngineConfig::default());
    let formula = BoundFormula::without_scopes(IrNode::call(
        "Table",
        vec![accounts()],
        FormulaType::Table,
    ));

    let value = eval(&engine, &formula).await;
    assert!(matches!(value, Value::Table(TableValue::InMemory(_))));
    assert_eq!(rows_of(&value).await.len(), 5);
    assert_eq!(provider.fetch_count(), 1);
}

#[tokio::test]
async fn predicate_error_rows_are_identical_with_and_without_delegation() {
    for column_first in [true, false] {
        let build = || {
            let mut scopes = ScopeSymbolTable::new();
            let filtered = filter(&mut scopes, |scopes, row| {
                let revenue = column(scopes, row, "revenue", FormulaType::Number);
                let mut predicate = if column_first {
                    IrNode::binary(BinaryOpKind::Gt, revenue, IrNode::text("abc"))
                } else {
                    IrNode::binary(BinaryOpKind::Lt, IrNode::text("abc"), revenue)
                };
                predicate.span = Span::new(10, 25);
                predicate
            });
            BoundFormula::new(filtered, scopes)
        };

        let delegated = eval_fresh(EngineConfig::default(), &build()).await;
        let local = eval_fresh(without_delegation(), &build()).await;
        assert_eq!(commands_of(&delegated).len(), 1);

        let delegated = rows_of(&delegated).await;
        assert_eq!(delegated.len(), 5);
        assert!(delegated.iter().all(Value::is_error));
        assert_eq!(delegated, rows_of(&local).await);
    }
}
