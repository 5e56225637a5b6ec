use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ir::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Div0,
    Numeric,
    InvalidArgument,
    InvalidFunctionUsage,
    NotFound,
    NotApplicable,
    Validation,
    NotSupported,
    Internal,
    Custom,
}

impl ErrorKind {
    pub fn as_code(self) -> &'static str {
        match self {
            ErrorKind::Div0 => "Div0",
            ErrorKind::Numeric => "Numeric",
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::InvalidFunctionUsage => "InvalidFunctionUsage",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::NotApplicable => "NotApplicable",
            ErrorKind::Validation => "Validation",
            ErrorKind::NotSupported => "NotSupported",
            ErrorKind::Internal => "Internal",
            ErrorKind::Custom => "Custom",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

/// One typed runtime error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpressionError {
    pub kind: ErrorKind,
    pub message: String,
    pub span: Option<Span>,
}

impl fmt::Display for ExpressionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(span) = self.span {
            write!(f, " at {}..{}", span.start, span.end)?;
        }
        Ok(())
    }
}

/// Error carried as a value. Always holds at least one [`ExpressionError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorValue {
    errors: Vec<ExpressionError>,
}

impl ErrorValue {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            errors: vec![ExpressionError {
                kind,
                message: message.into(),
                span: None,
            }],
        }
    }

    pub fn div0() -> Self {
        Self::new(ErrorKind::Div0, "division by zero")
    }

    pub fn numeric() -> Self {
        Self::new(ErrorKind::Numeric, "result is not a finite number")
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    /// Attach `span` to errors that do not have a location yet.
    pub fn with_span(mut self, span: Span) -> Self {
        for err in &mut self.errors {
            err.span.get_or_insert(span);
        }
        self
    }

    /// Copy of this error with every location removed.
    pub fn without_spans(mut self) -> Self {
        for err in &mut self.errors {
            err.span = None;
        }
        self
    }

    /// Merge the errors of several values, keeping their order.
    pub fn combine(values: impl IntoIterator<Item = ErrorValue>) -> Option<Self> {
        let errors: Vec<ExpressionError> = values.into_iter().flat_map(|e| e.errors).collect();
        (!errors.is_empty()).then_some(Self { errors })
    }

    pub fn kind(&self) -> ErrorKind {
        self.errors[0].kind
    }

    pub fn errors(&self) -> &[ExpressionError] {
        &self.errors
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, err) in self.errors.iter().enumerate() {
            if idx > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}
