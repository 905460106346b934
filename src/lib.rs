pub mod align;
pub mod compile;
pub mod error;
pub mod expr;
pub mod lexer;
mod library;
pub mod parser;
pub mod registry;
pub mod types;

pub use align::{align, AnnouncementContext, AnnouncementPanel, EvalContext};
pub use compile::{CompileManifest, FactorSet};
pub use error::{CompileError, EvalError, FactorError, RegisterError, ShapeError};
pub use expr::{Expression, Literal, Token};
pub use parser::Parser;
pub use registry::{Arity, BinaryFn, FunctionFn, OperatorTables, UnaryFn};
pub use types::{Bindings, CaseStyle, CompileOptions, FactorRequest, Panel, Value};

#[cfg(test)]
mod tests;
