//! Operator and function tables.
//!
//! Extension path:
//! 1) implement the callable in `library/elem.rs`, `library/ts.rs` or `library/cs.rs`,
//! 2) register it from `library::register_builtins` (or at runtime through
//!    [`OperatorTables::register_function`]),
//! 3) add parse/evaluate tests.

use crate::align::EvalContext;
use crate::error::{EvalError, RegisterError};
use crate::lexer::SYMBOL_OPERATORS;
use crate::parser::MAX_OPERATOR_PRIORITY;
use crate::types::{CaseStyle, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

pub type UnaryFn = Arc<dyn Fn(&EvalContext<'_>, Value) -> Result<Value, EvalError> + Send + Sync>;
pub type BinaryFn =
    Arc<dyn Fn(&EvalContext<'_>, Value, Value) -> Result<Value, EvalError> + Send + Sync>;
pub type FunctionFn =
    Arc<dyn Fn(&EvalContext<'_>, Vec<Value>) -> Result<Value, EvalError> + Send + Sync>;
pub type FunctionRef = Arc<FunctionEntry>;

pub const NAMED_UNARY_PRIORITY: i32 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl Arity {
    #[inline]
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Self::Exact(n) => count == n,
            Self::AtLeast(n) => count >= n,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(n) => write!(f, "{n}"),
            Self::AtLeast(n) => write!(f, "at least {n}"),
        }
    }
}

#[derive(Clone)]
pub struct UnaryOpEntry {
    pub symbol: String,
    pub priority: i32,
    pub apply: UnaryFn,
}

#[derive(Clone)]
pub struct BinaryOpEntry {
    pub symbol: String,
    pub priority: i32,
    pub apply: BinaryFn,
}

pub struct FunctionEntry {
    name: String,
    arity: Arity,
    call: FunctionFn,
}

impl FunctionEntry {
    pub fn new(name: impl Into<String>, arity: Arity, call: FunctionFn) -> Self {
        Self {
            name: name.into(),
            arity,
            call,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn arity(&self) -> Arity {
        self.arity
    }

    pub fn invoke(&self, ctx: &EvalContext<'_>, args: Vec<Value>) -> Result<Value, EvalError> {
        if !self.arity.accepts(args.len()) {
            return Err(EvalError::InvalidArity {
                name: self.name.clone(),
                expected: self.arity,
                actual: args.len(),
            });
        }
        (self.call)(ctx, args)
    }
}

impl fmt::Debug for FunctionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionEntry")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

/// Unary, binary and function tables consulted by the lexer, parser and evaluator.
///
/// Names are stored with the table's [`CaseStyle`] already applied to
/// alphabetic entries, so lookups are exact.
#[derive(Clone)]
pub struct OperatorTables {
    unary: BTreeMap<String, UnaryOpEntry>,
    binary: BTreeMap<String, BinaryOpEntry>,
    functions: BTreeMap<String, FunctionRef>,
    case_style: CaseStyle,
}

impl OperatorTables {
    /// Tables with no entries at all.
    pub fn empty(case_style: CaseStyle) -> Self {
        Self {
            unary: BTreeMap::new(),
            binary: BTreeMap::new(),
            functions: BTreeMap::new(),
            case_style,
        }
    }

    /// Tables preloaded with the built-in vocabulary.
    pub fn builtin() -> Self {
        Self::with_case_style(CaseStyle::default())
    }

    pub fn with_case_style(case_style: CaseStyle) -> Self {
        let mut tables = Self::empty(case_style);
        crate::library::register_builtins(&mut tables);
        tables
    }

    #[inline]
    pub fn case_style(&self) -> CaseStyle {
        self.case_style
    }

    fn normalize(&self, name: &str) -> String {
        if name.chars().all(|c| !c.is_alphabetic()) {
            return name.to_string();
        }
        self.case_style.apply(name)
    }

    pub fn register_unary(
        &mut self,
        name: &str,
        priority: i32,
        apply: UnaryFn,
    ) -> Result<(), RegisterError> {
        let key = self.normalize(name);
        if self.unary.contains_key(&key) {
            warn!(name = %key, table = "unary", "rejected duplicate registration");
            return Err(RegisterError::Duplicate {
                name: key,
                table: "unary",
            });
        }
        if !is_lexable(&key) {
            warn!(symbol = %key, "rejected unlexable operator symbol");
            return Err(RegisterError::UnlexableSymbol { symbol: key });
        }
        if key == "+" {
            warn!(symbol = %key, "rejected unary sign operator");
            return Err(RegisterError::SignOperator { symbol: key });
        }
        check_priority(&key, priority)?;
        self.insert_unary(&key, priority, apply);
        Ok(())
    }

    pub fn register_binary(
        &mut self,
        symbol: &str,
        priority: i32,
        apply: BinaryFn,
    ) -> Result<(), RegisterError> {
        let key = self.normalize(symbol);
        if self.binary.contains_key(&key) {
            warn!(name = %key, table = "binary", "rejected duplicate registration");
            return Err(RegisterError::Duplicate {
                name: key,
                table: "binary",
            });
        }
        if !is_lexable(&key) {
            warn!(symbol = %key, "rejected unlexable operator symbol");
            return Err(RegisterError::UnlexableSymbol { symbol: key });
        }
        check_priority(&key, priority)?;
        self.insert_binary(&key, priority, apply);
        Ok(())
    }

    pub fn register_function(
        &mut self,
        name: &str,
        arity: Arity,
        call: FunctionFn,
    ) -> Result<(), RegisterError> {
        let key = self.normalize(name);
        if self.functions.contains_key(&key) {
            warn!(name = %key, table = "functions", "rejected duplicate registration");
            return Err(RegisterError::Duplicate {
                name: key,
                table: "functions",
            });
        }
        if !is_identifier(&key) {
            warn!(symbol = %key, "rejected function name that is not an identifier");
            return Err(RegisterError::UnlexableSymbol { symbol: key });
        }
        self.insert_function(&key, arity, call);
        Ok(())
    }

    pub(crate) fn insert_unary(&mut self, name: &str, priority: i32, apply: UnaryFn) {
        let symbol = self.normalize(name);
        self.unary.insert(
            symbol.clone(),
            UnaryOpEntry {
                symbol,
                priority,
                apply,
            },
        );
    }

    pub(crate) fn insert_binary(&mut self, name: &str, priority: i32, apply: BinaryFn) {
        let symbol = self.normalize(name);
        self.binary.insert(
            symbol.clone(),
            BinaryOpEntry {
                symbol,
                priority,
                apply,
            },
        );
    }

    pub(crate) fn insert_function(&mut self, name: &str, arity: Arity, call: FunctionFn) {
        let key = self.normalize(name);
        let entry = FunctionEntry::new(key.clone(), arity, call);
        self.functions.insert(key, Arc::new(entry));
    }

    #[inline]
    pub fn unary(&self, symbol: &str) -> Option<&UnaryOpEntry> {
        self.unary.get(symbol)
    }

    #[inline]
    pub fn binary(&self, symbol: &str) -> Option<&BinaryOpEntry> {
        self.binary.get(symbol)
    }

    #[inline]
    pub fn function(&self, name: &str) -> Option<&FunctionRef> {
        self.functions.get(name)
    }

    #[inline]
    pub fn is_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Alphabetic binary operator keyword such as `and`.
    pub fn is_binary_keyword(&self, word: &str) -> bool {
        is_identifier(word) && self.binary.contains_key(word)
    }

    /// Alphabetic unary operator name such as `Sqrt`.
    pub fn is_named_unary(&self, word: &str) -> bool {
        is_identifier(word) && self.unary.contains_key(word)
    }

    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }
}

impl Default for OperatorTables {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for OperatorTables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorTables")
            .field("unary", &self.unary.keys().collect::<Vec<_>>())
            .field("binary", &self.binary.keys().collect::<Vec<_>>())
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .field("case_style", &self.case_style)
            .finish()
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// A symbol the lexer can hand to the parser as a single operator token.
/// Aliases such as `∙` are normalized away before lookup, so they never match.
fn is_lexable(symbol: &str) -> bool {
    is_identifier(symbol)
        || SYMBOL_OPERATORS
            .iter()
            .any(|(text, resolved)| *text == symbol && *resolved == symbol)
}

fn check_priority(symbol: &str, priority: i32) -> Result<(), RegisterError> {
    if (0..=MAX_OPERATOR_PRIORITY).contains(&priority) {
        return Ok(());
    }
    warn!(symbol, priority, "rejected operator priority");
    Err(RegisterError::InvalidPriority {
        symbol: symbol.to_string(),
        priority,
        max: MAX_OPERATOR_PRIORITY,
    })
}
