//! Bound intermediate representation.
//!
//! The IR is produced by the binder (outside this crate) and consumed read-only by
//! [`crate::eval::EvalVisitor`]. Names are already resolved: row fields are
//! [`ScopeAccessSymbol`]s, globals are [`NodeKind::ResolvedObject`]s and calls name the function they
//! dispatch to. The constructors below exist for binders and tests; they do not type-check.
use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::scope::{ScopeAccessSymbol, ScopeId};
use crate::value::{Color, ErrorKind};

/// Byte range of the source text a node was bound from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// Static result type attached to every node.
///
/// Only the tag matters at run time (blank values remember the type they stand in for); the
/// structural record/table schema stays with the binder.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormulaType {
    Blank,
    Boolean,
    Number,
    Decimal,
    String,
    Date,
    DateTime,
    Time,
    Color,
    Record,
    Table,
    Lambda,
    Void,
    #[default]
    Unknown,
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOpKind {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Concat,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    /// Case-insensitive substring / table membership.
    In,
    /// Case-sensitive substring / table membership.
    ExactIn,
}

impl BinaryOpKind {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOpKind::Eq
                | BinaryOpKind::NotEq
                | BinaryOpKind::Lt
                | BinaryOpKind::LtEq
                | BinaryOpKind::Gt
                | BinaryOpKind::GtEq
        )
    }

    /// The operator with its operands swapped (`a < b` == `b > a`).
    pub fn flipped(self) -> Self {
        match self {
            BinaryOpKind::Lt => BinaryOpKind::Gt,
            BinaryOpKind::LtEq => BinaryOpKind::GtEq,
            BinaryOpKind::Gt => BinaryOpKind::Lt,
            BinaryOpKind::GtEq => BinaryOpKind::LtEq,
            other => other,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOpKind {
    Negate,
    Not,
    Percent,
    NumberToText,
    TextToNumber,
    BooleanToNumber,
    NumberToBoolean,
    BooleanToText,
    TextToBoolean,
    NumberToDecimal,
    DecimalToNumber,
    BlankToEmptyString,
    DateToNumber,
    NumberToDate,
    TextToDate,
}

/// Shape of an [`NodeKind::AggregateCoercion`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateCoercionKind {
    RecordToRecord,
    TableToTable,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IrNode {
    pub kind: NodeKind,
    pub ty: FormulaType,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    Text(String),
    Number(f64),
    Decimal(BigDecimal),
    Boolean(bool),
    Color(Color),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Blank,
    /// Record constructor. Fields are kept in definition order.
    Record {
        fields: Vec<(String, IrNode)>,
    },
    /// Table constructor; every row is a record-typed node.
    Table {
        rows: Vec<IrNode>,
    },
    Call {
        function: String,
        args: Vec<IrNode>,
        /// Row scope the call's lambda arguments read from, if it has any.
        scope: Option<ScopeId>,
    },
    /// Deferred subtree. As a call argument it is handed to the function as a lambda.
    LazyEval(Arc<IrNode>),
    ScopeAccess(ScopeAccessSymbol),
    /// The whole current row of a scope (`ThisRecord`).
    ScopeRecord(ScopeId),
    ResolvedObject(String),
    RecordFieldAccess {
        from: Box<IrNode>,
        field: String,
    },
    BinaryOp {
        op: BinaryOpKind,
        left: Box<IrNode>,
        right: Box<IrNode>,
    },
    UnaryOp {
        op: UnaryOpKind,
        child: Box<IrNode>,
    },
    Chaining(Vec<IrNode>),
    AggregateCoercion {
        op: AggregateCoercionKind,
        scope: ScopeId,
        field_coercions: Vec<(String, IrNode)>,
        child: Box<IrNode>,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl IrNode {
    pub fn new(kind: NodeKind, ty: FormulaType) -> Self {
        Self {
            kind,
            ty,
            span: Span::default(),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn with_type(mut self, ty: FormulaType) -> Self {
        self.ty = ty;
        self
    }

    pub fn number(n: f64) -> Self {
        Self::new(NodeKind::Number(n), FormulaType::Number)
    }

    pub fn decimal(d: BigDecimal) -> Self {
        Self::new(NodeKind::Decimal(d), FormulaType::Decimal)
    }

    pub fn text(s: impl Into<String>) -> Self {
        Self::new(NodeKind::Text(s.into()), FormulaType::String)
    }

    pub fn boolean(b: bool) -> Self {
        Self::new(NodeKind::Boolean(b), FormulaType::Boolean)
    }

    pub fn color(c: Color) -> Self {
        Self::new(NodeKind::Color(c), FormulaType::Color)
    }

    pub fn date(d: NaiveDate) -> Self {
        Self::new(NodeKind::Date(d), FormulaType::Date)
    }

    pub fn blank(ty: FormulaType) -> Self {
        Self::new(NodeKind::Blank, ty)
    }

    pub fn record(fields: Vec<(&str, IrNode)>) -> Self {
        let fields = fields
            .into_iter()
            .map(|(name, node)| (name.to_string(), node))
            .collect();
        Self::new(NodeKind::Record { fields }, FormulaType::Record)
    }

    pub fn table(rows: Vec<IrNode>) -> Self {
        Self::new(NodeKind::Table { rows }, FormulaType::Table)
    }

    pub fn call(function: &str, args: Vec<IrNode>, ty: FormulaType) -> Self {
        Self::new(
            NodeKind::Call {
                function: function.to_string(),
                args,
                scope: None,
            },
            ty,
        )
    }

    /// Call whose lambda arguments read rows from `scope`.
    pub fn scoped_call(function: &str, scope: ScopeId, args: Vec<IrNode>, ty: FormulaType) -> Self {
        Self::new(
            NodeKind::Call {
                function: function.to_string(),
                args,
                scope: Some(scope),
            },
            ty,
        )
    }

    pub fn lazy(node: IrNode) -> Self {
        let ty = node.ty;
        Self::new(NodeKind::LazyEval(Arc::new(node)), ty)
    }

    pub fn scope_access(symbol: ScopeAccessSymbol, ty: FormulaType) -> Self {
        Self::new(NodeKind::ScopeAccess(symbol), ty)
    }

    pub fn this_record(scope: ScopeId) -> Self {
        Self::new(NodeKind::ScopeRecord(scope), FormulaType::Record)
    }

    pub fn resolved(name: &str, ty: FormulaType) -> Self {
        Self::new(NodeKind::ResolvedObject(name.to_string()), ty)
    }

    pub fn field(from: IrNode, field: &str, ty: FormulaType) -> Self {
        Self::new(
            NodeKind::RecordFieldAccess {
                from: Box::new(from),
                field: field.to_string(),
            },
            ty,
        )
    }

    pub fn binary(op: BinaryOpKind, left: IrNode, right: IrNode) -> Self {
        let ty = match op {
            BinaryOpKind::Concat => FormulaType::String,
            op if op.is_comparison() => FormulaType::Boolean,
            BinaryOpKind::In | BinaryOpKind::ExactIn => FormulaType::Boolean,
            _ if left.ty == FormulaType::Decimal && right.ty == FormulaType::Decimal => {
                FormulaType::Decimal
            }
            _ => FormulaType::Number,
        };
        Self::new(
            NodeKind::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            ty,
        )
    }

    pub fn unary(op: UnaryOpKind, child: IrNode, ty: FormulaType) -> Self {
        Self::new(
            NodeKind::UnaryOp {
                op,
                child: Box::new(child),
            },
            ty,
        )
    }

    pub fn chain(statements: Vec<IrNode>) -> Self {
        let ty = statements.last().map(|n| n.ty).unwrap_or(FormulaType::Void);
        Self::new(NodeKind::Chaining(statements), ty)
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(
            NodeKind::Error {
                kind,
                message: message.into(),
            },
            FormulaType::Error,
        )
    }

    /// Visit direct children in evaluation order.
    pub fn for_each_child<'a>(&'a self, f: &mut dyn FnMut(&'a IrNode)) {
        match &self.kind {
            NodeKind::Text(_)
            | NodeKind::Number(_)
            | NodeKind::Decimal(_)
            | NodeKind::Boolean(_)
            | NodeKind::Color(_)
            | NodeKind::Date(_)
            | NodeKind::DateTime(_)
            | NodeKind::Blank
            | NodeKind::ScopeAccess(_)
            | NodeKind::ScopeRecord(_)
            | NodeKind::ResolvedObject(_)
            | NodeKind::Error { .. } => {}
            NodeKind::Record { fields } => fields.iter().for_each(|(_, node)| f(node)),
            NodeKind::Table { rows } => rows.iter().for_each(|node| f(node)),
            NodeKind::Call { args, .. } => args.iter().for_each(|node| f(node)),
            NodeKind::LazyEval(inner) => f(inner.as_ref()),
            NodeKind::RecordFieldAccess { from, .. } => f(from.as_ref()),
            NodeKind::BinaryOp { left, right, .. } => {
                f(left.as_ref());
                f(right.as_ref());
            }
            NodeKind::UnaryOp { child, .. } => f(child.as_ref()),
            NodeKind::Chaining(statements) => statements.iter().for_each(|node| f(node)),
            NodeKind::AggregateCoercion {
                field_coercions,
                child,
                ..
            } => {
                f(child.as_ref());
                field_coercions.iter().for_each(|(_, node)| f(node));
            }
        }
    }

    /// `true` if `pred` holds for this node or any descendant.
    pub fn any(&self, pred: &mut dyn FnMut(&IrNode) -> bool) -> bool {
        if pred(self) {
            return true;
        }
        let mut found = false;
        self.for_each_child(&mut |child| {
            if !found && child.any(pred) {
                found = true;
            }
        });
        found
    }

    /// `true` if evaluating this subtree can read the current row of `scope`.
    pub fn reads_scope(&self, scope: ScopeId) -> bool {
        self.any(&mut |node| match &node.kind {
            NodeKind::ScopeAccess(symbol) => symbol.parent == scope,
            NodeKind::ScopeRecord(id) => *id == scope,
            _ => false,
        })
    }

    /// Names of all global objects referenced anywhere in this subtree, in first-seen order.
    pub fn resolved_objects(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        self.any(&mut |node| {
            if let NodeKind::ResolvedObject(name) = &node.kind {
                if !names.iter().any(|n| n == name) {
                    names.push(name.clone());
                }
            }
            false
        });
        names
    }
}
