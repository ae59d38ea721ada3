// Hookscript Library
// A small Python-compatible scripting language embedded by the provider host

pub mod analysis;
pub mod ast;
pub mod parser;
pub mod runtime;

pub use analysis::{top_level_bindings, walk_expr, walk_stmt, Visitor};
pub use ast::{Expr, ExprKind, Program, Span, Stmt, StmtKind};
pub use parser::{parse, parse_expression, ParseError};
pub use runtime::modules::{json_to_value, value_to_json};
pub use runtime::{
    Arity, CallArgs, Class, Environment, Evaluator, Instance, Module, ModuleRegistry, Runtime,
    RuntimeError, RuntimeResult, Value,
};

/// Failure of [`Runtime::run`]: the source did not parse, or raised.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("syntax error: {0}")]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

pub type Result<T> = std::result::Result<T, Error>;
