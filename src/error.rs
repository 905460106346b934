use crate::registry::Arity;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("lex error [column {column}]: {reason}")]
    Lex { column: usize, reason: String },
    #[error("parse error [column {column}]: {reason}")]
    Syntax { column: usize, reason: String },
}

impl CompileError {
    /// Character offset into the formula where scanning or parsing stopped.
    pub fn column(&self) -> usize {
        match self {
            Self::Lex { column, .. } | Self::Syntax { column, .. } => *column,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Lex { reason, .. } | Self::Syntax { reason, .. } => reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("panel cell count mismatch: expected {expected}, got {actual}")]
    CellCount { expected: usize, actual: usize },
    #[error("dates must be strictly increasing (row {row})")]
    UnsortedDates { row: usize },
    #[error("duplicate security `{symbol}`")]
    DuplicateSecurity { symbol: String },
    #[error("row count mismatch: {lhs} vs {rhs}")]
    RowMismatch { lhs: usize, rhs: usize },
    #[error("date index mismatch at row {row}")]
    DateMismatch { row: usize },
    #[error("security sets differ: `{symbol}` is missing from one operand")]
    SecurityMismatch { symbol: String },
    #[error("panels with {lhs} and {rhs} rows need an announcement context to align")]
    MissingAlignment { lhs: usize, rhs: usize },
    #[error("security `{symbol}` has no announcement dates")]
    MissingAnnouncements { symbol: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("undefined variable: {name}")]
    UndefinedVariable { name: String },
    #[error("{what} is not a function")]
    NotCallable { what: String },
    #[error("unknown operator `{symbol}`")]
    UnknownOperator { symbol: String },
    #[error("invalid expression (parity): {remaining} values left on the stack")]
    Parity { remaining: usize },
    #[error("invalid expression: value stack underflow at `{token}`")]
    StackUnderflow { token: String },
    #[error("function `{name}` requires {expected} args, got {actual}")]
    InvalidArity {
        name: String,
        expected: Arity,
        actual: usize,
    },
    #[error("invalid argument for `{func}`: {reason}")]
    InvalidArgument { func: String, reason: String },
    #[error("`{func}` expects {expected}, got {actual}")]
    TypeMismatch {
        func: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error(transparent)]
    Shape(#[from] ShapeError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("register failed: name `{name}` already exists in the {table} table")]
    Duplicate { name: String, table: &'static str },
    #[error("operator symbol `{symbol}` cannot be produced by the lexer")]
    UnlexableSymbol { symbol: String },
    #[error("unary `{symbol}` is always read as a sign and never reaches the table")]
    SignOperator { symbol: String },
    #[error("priority {priority} for `{symbol}` is outside 0..={max}")]
    InvalidPriority {
        symbol: String,
        priority: i32,
        max: i32,
    },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FactorError {
    #[error("empty factor request")]
    EmptyRequest,
    #[error("request has {exprs} expressions but {outputs} output names")]
    OutputCount { exprs: usize, outputs: usize },
    #[error("duplicate output name `{name}`")]
    DuplicateOutput { name: String },
    #[error("failed to compile `{output}`: {source}")]
    Compile {
        output: String,
        #[source]
        source: CompileError,
    },
    #[error("failed to evaluate `{output}`: {source}")]
    Eval {
        output: String,
        #[source]
        source: EvalError,
    },
}
