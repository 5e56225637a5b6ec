//! Engine-level failures.
//!
//! Data problems (division by zero, bad dates, out-of-range arguments) are *values* and travel as
//! [`crate::Value::Error`]. [`FxError`] is reserved for conditions that abort an evaluation or
//! signal a host bug: cancellation, calling an unbound user function, entering the evaluation
//! region concurrently, or configuration/binding failures.

pub type FxResult<T> = Result<T, FxError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FxError {
    #[error("evaluation was cancelled")]
    Cancelled,

    #[error("user-defined function {name} was invoked before it was bound")]
    UdfNotBound { name: String },

    #[error("evaluation region is already owned by evaluation {owner}")]
    ConcurrentEvaluation { owner: u64 },

    #[error("failed to bind {name}: {message}")]
    Bind { name: String, message: String },

    #[error("duplicate definition: {name}")]
    DuplicateDefinition { name: String },

    #[error("circular reference between formulas: {}", names.join(", "))]
    CircularReference { names: Vec<String> },

    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("data source error: {0}")]
    Provider(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("topological sort error: {0}")]
    TopologicalSort(String),
}

impl FxError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FxError::Cancelled)
    }
}
