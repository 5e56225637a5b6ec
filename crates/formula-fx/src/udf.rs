//! User-defined functions.
//!
//! A definition arrives with its body as unparsed text. Binding it to IR is the binder's job
//! ([`UdfBinder`]) and happens on demand, so functions may refer to functions defined after them.
//! The first successful bind is cached for the lifetime of the [`UserDefinedFunction`].
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crate::error::{FxError, FxResult};
use crate::ir::{FormulaType, IrNode};
use crate::scope::{ScopeId, ScopeSymbolTable};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdfParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: FormulaType,
}

impl UdfParameter {
    pub fn new(name: impl Into<String>, ty: FormulaType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// `Name(param: Type, ...): ReturnType = body`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UdfDefinition {
    pub name: String,
    pub parameters: Vec<UdfParameter>,
    pub return_type: FormulaType,
    pub body: String,
}

impl UdfDefinition {
    pub fn new(
        name: impl Into<String>,
        parameters: Vec<UdfParameter>,
        return_type: FormulaType,
        body: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            parameters,
            return_type,
            body: body.into(),
        }
    }
}

/// Bound body of a user function.
///
/// Parameters are read as fields of `parameter_scope`: the evaluator binds the argument record
/// there before evaluating `body`.
#[derive(Clone, Debug)]
pub struct BoundUdf {
    pub body: IrNode,
    pub scopes: Arc<ScopeSymbolTable>,
    pub parameter_scope: ScopeId,
}

/// Turns a definition's body text into IR. Implemented by the binder.
pub trait UdfBinder {
    fn bind(&self, definition: &UdfDefinition) -> Result<BoundUdf, String>;
}

impl<F> UdfBinder for F
where
    F: Fn(&UdfDefinition) -> Result<BoundUdf, String>,
{
    fn bind(&self, definition: &UdfDefinition) -> Result<BoundUdf, String> {
        self(definition)
    }
}

#[derive(Debug)]
pub struct UserDefinedFunction {
    definition: UdfDefinition,
    bound: OnceLock<BoundUdf>,
}

impl UserDefinedFunction {
    pub fn new(definition: UdfDefinition) -> Self {
        Self {
            definition,
            bound: OnceLock::new(),
        }
    }

    pub fn definition(&self) -> &UdfDefinition {
        &self.definition
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn is_bound(&self) -> bool {
        self.bound.get().is_some()
    }

    /// Bind the body unless an earlier bind already succeeded. A failed bind leaves the function
    /// unbound, so it can be retried.
    pub fn bind(&self, binder: &dyn UdfBinder) -> FxResult<&BoundUdf> {
        if let Some(bound) = self.bound.get() {
            return Ok(bound);
        }
        let bound = binder.bind(&self.definition).map_err(|message| FxError::Bind {
            name: self.definition.name.clone(),
            message,
        })?;
        log::debug!("bound user function {}", self.definition.name);
        Ok(self.bound.get_or_init(|| bound))
    }

    /// The cached bind. Invoking a function the host never bound is a sequencing bug.
    pub fn bound(&self) -> FxResult<&BoundUdf> {
        self.bound.get().ok_or_else(|| FxError::UdfNotBound {
            name: self.definition.name.clone(),
        })
    }
}

/// User functions by case-insensitive name.
#[derive(Debug, Default)]
pub struct UdfRegistry {
    functions: HashMap<String, Arc<UserDefinedFunction>>,
}

impl UdfRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, definition: UdfDefinition) -> FxResult<Arc<UserDefinedFunction>> {
        let key = definition.name.to_ascii_uppercase();
        if self.functions.contains_key(&key) {
            return Err(FxError::DuplicateDefinition {
                name: definition.name,
            });
        }
        let udf = Arc::new(UserDefinedFunction::new(definition));
        self.functions.insert(key, Arc::clone(&udf));
        Ok(udf)
    }

    pub fn get(&self, name: &str) -> Option<&UserDefinedFunction> {
        self.functions
            .get(&name.to_ascii_uppercase())
            .map(Arc::as_ref)
    }

    pub fn iter(&self) -> impl Iterator<Item = &UserDefinedFunction> {
        self.functions.values().map(Arc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Bind every function, in name order. Stops at the first failure.
    pub fn bind_all(&self, binder: &dyn UdfBinder) -> FxResult<()> {
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort();
        for name in names {
            if let Some(udf) = self.functions.get(name) {
                udf.bind(binder)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn definition() -> UdfDefinition {
        UdfDefinition::new(
            "Twice",
            vec![UdfParameter::new("x", FormulaType::Number)],
            FormulaType::Number,
            "x * 2",
        )
    }

    fn bound_body() -> BoundUdf {
        let mut scopes = ScopeSymbolTable::new();
        let parameter_scope = scopes.new_scope();
        BoundUdf {
            body: IrNode::number(0.0),
            scopes: Arc::new(scopes),
            parameter_scope,
        }
    }

    #[test]
    fn failed_bind_can_be_retried_and_success_is_cached() {
        let udf = UserDefinedFunction::new(definition());
        let calls = Cell::new(0);

        let failing = |_: &UdfDefinition| -> Result<BoundUdf, String> {
            calls.set(calls.get() + 1);
            Err("unknown name y".to_string())
        };
        assert_eq!(
            udf.bind(&failing).unwrap_err(),
            FxError::Bind {
                name: "Twice".into(),
                message: "unknown name y".into()
            }
        );
        assert!(!udf.is_bound());

        let working = |_: &UdfDefinition| -> Result<BoundUdf, String> {
            calls.set(calls.get() + 1);
            Ok(bound_body())
        };
        udf.bind(&working).unwrap();
        udf.bind(&working).unwrap();
        assert!(udf.is_bound());
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn registry_rejects_duplicates_regardless_of_case() {
        let mut registry = UdfRegistry::new();
        registry.insert(definition()).unwrap();
        let mut again = definition();
        again.name = "TWICE".into();
        assert!(matches!(
            registry.insert(again),
            Err(FxError::DuplicateDefinition { .. })
        ));
        assert!(registry.get("twice").is_some());
        assert!(matches!(
            registry.get("Twice").unwrap().bound(),
            Err(FxError::UdfNotBound { .. })
        ));
    }
}
