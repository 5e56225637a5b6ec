//! Runtime core for bound formula expressions.
//!
//! The crate evaluates an already bound IR ([`ir::IrNode`] plus the [`scope::ScopeSymbolTable`] its
//! row symbols index into) to a [`Value`]. Evaluation is asynchronous and cooperatively
//! cancellable; table operations on remote sources are pushed down to the source when it can run
//! them ([`delegation`]) and run locally otherwise, with identical results.
//!
//! ```ignore
//! let engine = Engine::new(EngineConfig::default());
//! let value = engine.eval(&formula, &CancellationToken::new()).await?;
//! ```
mod config;
pub mod delegation;
mod engine;
mod error;
pub mod eval;
pub mod functions;
pub mod ir;
pub mod scope;
pub mod topo;
pub mod udf;
pub mod value;

pub use crate::config::{CultureConfig, EngineConfig};
pub use crate::engine::{BoundFormula, Engine};
pub use crate::error::{FxError, FxResult};
pub use crate::eval::{EvalContext, EvalVisitor, RegionGuard, SingleThreadedGuard};
pub use crate::functions::{FnHostFunction, HostFunction};
pub use crate::udf::{BoundUdf, UdfBinder, UdfDefinition, UdfParameter, UserDefinedFunction};
pub use crate::value::{DValue, ErrorKind, ErrorValue, RecordValue, TableValue, Value};

pub use tokio_util::sync::CancellationToken;
