use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{FxError, FxResult};
use crate::scope::{ScopeId, ScopeSymbolTable};
use crate::value::RecordValue;

/// One frame of row context: the record currently bound to `scope`.
#[derive(Debug)]
struct RowScope {
    scope: ScopeId,
    record: RecordValue,
    parent: Option<Arc<RowScope>>,
}

/// State threaded through every evaluation step.
///
/// Cloning is cheap (reference counts only), which is what lets a [`crate::value::LambdaValue`]
/// capture the context it was created in.
#[derive(Clone, Debug)]
pub struct EvalContext {
    scopes: Arc<ScopeSymbolTable>,
    rows: Option<Arc<RowScope>>,
    cancel: CancellationToken,
    call_depth: u32,
}

impl EvalContext {
    pub fn new(scopes: Arc<ScopeSymbolTable>, cancel: CancellationToken) -> Self {
        Self {
            scopes,
            rows: None,
            cancel,
            call_depth: 0,
        }
    }

    pub fn scopes(&self) -> &ScopeSymbolTable {
        &self.scopes
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn call_depth(&self) -> u32 {
        self.call_depth
    }

    pub fn check_cancelled(&self) -> FxResult<()> {
        if self.cancel.is_cancelled() {
            return Err(FxError::Cancelled);
        }
        Ok(())
    }

    /// Context with `record` as the current row of `scope`. Outer rows stay visible.
    pub fn with_row(&self, scope: ScopeId, record: RecordValue) -> Self {
        Self {
            scopes: Arc::clone(&self.scopes),
            rows: Some(Arc::new(RowScope {
                scope,
                record,
                parent: self.rows.clone(),
            })),
            cancel: self.cancel.clone(),
            call_depth: self.call_depth,
        }
    }

    /// Fresh context for a user function body: its own scope table, only the parameter record as
    /// row context, one level deeper.
    pub(crate) fn for_function_body(
        &self,
        scopes: Arc<ScopeSymbolTable>,
        parameter_scope: ScopeId,
        arguments: RecordValue,
    ) -> Self {
        Self {
            scopes,
            rows: Some(Arc::new(RowScope {
                scope: parameter_scope,
                record: arguments,
                parent: None,
            })),
            cancel: self.cancel.clone(),
            call_depth: self.call_depth + 1,
        }
    }

    /// Innermost row bound to `scope`.
    pub fn row(&self, scope: ScopeId) -> Option<&RecordValue> {
        let mut frame = self.rows.as_deref();
        while let Some(current) = frame {
            if current.scope == scope {
                return Some(&current.record);
            }
            frame = current.parent.as_deref();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn inner_rows_shadow_outer_rows_of_the_same_scope() {
        let mut table = ScopeSymbolTable::new();
        let a = table.new_scope();
        let b = table.new_scope();
        let ctx = EvalContext::new(Arc::new(table), CancellationToken::new());

        let outer = ctx.with_row(a, RecordValue::new([("x", Value::from(1.0))]));
        let inner = outer
            .with_row(b, RecordValue::new([("y", Value::from(2.0))]))
            .with_row(a, RecordValue::new([("x", Value::from(3.0))]));

        assert_eq!(inner.row(a).unwrap().get_field("x"), Value::from(3.0));
        assert_eq!(inner.row(b).unwrap().get_field("y"), Value::from(2.0));
        assert_eq!(outer.row(a).unwrap().get_field("x"), Value::from(1.0));
        assert!(ctx.row(a).is_none());
    }
}
