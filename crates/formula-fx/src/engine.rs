use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::delegation::{DelegationCheck, DelegationChecker};
use crate::error::{FxError, FxResult};
use crate::eval::{EvalContext, EvalVisitor, SingleThreadedGuard};
use crate::functions::HostFunction;
use crate::ir::IrNode;
use crate::scope::ScopeSymbolTable;
use crate::topo::{TopoSortError, TopologicalSort};
use crate::udf::{UdfBinder, UdfDefinition, UdfRegistry};
use crate::value::{TableValue, Value};

/// Binder output: an IR tree and the scope table its symbols index into.
#[derive(Clone, Debug)]
pub struct BoundFormula {
    pub root: IrNode,
    pub scopes: Arc<ScopeSymbolTable>,
}

impl BoundFormula {
    pub fn new(root: IrNode, scopes: ScopeSymbolTable) -> Self {
        Self {
            root,
            scopes: Arc::new(scopes),
        }
    }

    /// A formula that reads no row scopes.
    pub fn without_scopes(root: IrNode) -> Self {
        Self::new(root, ScopeSymbolTable::new())
    }
}

/// Host-facing entry point: global symbols, functions and named formulas, plus the region guard
/// every evaluation enters.
pub struct Engine {
    config: EngineConfig,
    symbols: HashMap<String, Value>,
    udfs: UdfRegistry,
    host_functions: HashMap<String, Arc<dyn HostFunction>>,
    formulas: Vec<(String, BoundFormula)>,
    guard: SingleThreadedGuard,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            symbols: HashMap::new(),
            udfs: UdfRegistry::new(),
            host_functions: HashMap::new(),
            formulas: Vec::new(),
            guard: SingleThreadedGuard::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Publish a global value under `name` (a table, a constant, ...).
    pub fn add_symbol(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.symbols.insert(name.into(), value.into());
    }

    pub fn symbol(&self, name: &str) -> Option<&Value> {
        self.symbols.get(name)
    }

    pub fn add_host_function(&mut self, name: impl Into<String>, function: Arc<dyn HostFunction>) {
        self.host_functions.insert(name.into(), function);
    }

    pub fn add_user_function(&mut self, definition: UdfDefinition) -> FxResult<()> {
        self.udfs.insert(definition).map(|_| ())
    }

    pub fn user_functions(&self) -> &UdfRegistry {
        &self.udfs
    }

    /// Bind every user function that is not bound yet.
    pub fn bind_user_functions(&self, binder: &dyn UdfBinder) -> FxResult<()> {
        self.udfs.bind_all(binder)
    }

    fn visitor(&self) -> EvalVisitor<'_> {
        EvalVisitor::new(&self.config, &self.symbols, &self.udfs, &self.host_functions)
    }

    /// Evaluate a bound formula.
    ///
    /// Value-level problems come back inside the returned value. `Err` means the evaluation was
    /// cancelled, another evaluation holds the engine, or the host skipped a bind.
    pub async fn eval(&self, formula: &BoundFormula, cancel: &CancellationToken) -> FxResult<Value> {
        let region = self.guard.enter()?;
        log::trace!("evaluation {} entered", region.owner_id());
        let ctx = EvalContext::new(Arc::clone(&formula.scopes), cancel.clone());
        self.visitor().eval(&formula.root, &ctx).await
    }

    /// Call a user function by name with already evaluated arguments.
    pub async fn invoke_user_function(
        &self,
        name: &str,
        args: Vec<Value>,
        cancel: &CancellationToken,
    ) -> FxResult<Value> {
        let _region = self.guard.enter()?;
        let udf = self
            .udfs
            .get(name)
            .ok_or_else(|| FxError::UnknownSymbol(name.to_string()))?;
        let ctx = EvalContext::new(Arc::new(ScopeSymbolTable::new()), cancel.clone());
        self.visitor().invoke_user_function(udf, args, &ctx).await
    }

    /// Delegation report for `formula` against the remote tables currently published as symbols.
    pub fn check_delegation(&self, formula: &BoundFormula) -> Vec<DelegationCheck> {
        let mut checker =
            DelegationChecker::new().with_count_rows_warning(self.config.count_rows_warning);
        for (name, value) in &self.symbols {
            if let Value::Table(TableValue::Queryable(table)) = value {
                checker = checker.with_source(name.clone(), table.capabilities().clone());
            }
        }
        checker.check_formula(&formula.root, &formula.scopes)
    }

    /// Define or replace a named formula. Its value is published as a symbol by [`Self::recalc`].
    pub fn set_formula(&mut self, name: impl Into<String>, formula: BoundFormula) {
        let name = name.into();
        match self.formulas.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = formula,
            None => self.formulas.push((name, formula)),
        }
    }

    pub fn formula_names(&self) -> impl Iterator<Item = &str> {
        self.formulas.iter().map(|(name, _)| name.as_str())
    }

    /// Dependency order of the named formulas.
    pub fn calc_order(&self) -> FxResult<Vec<String>> {
        let mut sort = TopologicalSort::new();
        for (name, _) in &self.formulas {
            sort.add_node(name.clone());
        }
        for (name, formula) in &self.formulas {
            for dependency in formula.root.resolved_objects() {
                if self.formulas.iter().any(|(other, _)| *other == dependency) {
                    sort.add_edge(dependency, name.clone());
                }
            }
        }
        sort.try_sort().map_err(|err| match err {
            TopoSortError::Cycle(names) => FxError::CircularReference { names },
            other => FxError::TopologicalSort(other.to_string()),
        })
    }

    /// Evaluate every named formula after the formulas it reads and publish each result.
    ///
    /// Returns the values in evaluation order. A cycle fails before anything is evaluated.
    pub async fn recalc(&mut self, cancel: &CancellationToken) -> FxResult<Vec<(String, Value)>> {
        let _region = self.guard.enter()?;
        let order = self.calc_order()?;
        log::debug!("recalculating {} formulas", order.len());

        let mut results = Vec::with_capacity(order.len());
        for name in order {
            let value = {
                let Some((_, formula)) = self.formulas.iter().find(|(n, _)| *n == name) else {
                    continue;
                };
                let ctx = EvalContext::new(Arc::clone(&formula.scopes), cancel.clone());
                self.visitor().eval(&formula.root, &ctx).await?
            };
            self.symbols.insert(name.clone(), value.clone());
            results.push((name, value));
        }
        Ok(results)
    }
}
