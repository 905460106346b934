use crate::align::{AnnouncementContext, EvalContext};
use crate::error::{CompileError, EvalError};
use crate::parser::Parser;
use crate::registry::OperatorTables;
use crate::types::{Bindings, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    Text(String),
    /// Argument list of a nullary call such as `f()`.
    EmptyArgs,
}

/// One step of a postfix program.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(Literal),
    UnaryOp(String),
    BinaryOp(String),
    Variable(String),
    /// Pops the argument value, then the callee, and invokes it.
    Call,
}

impl Token {
    fn label(&self) -> &str {
        match self {
            Self::Number(_) => "literal",
            Self::UnaryOp(s) | Self::BinaryOp(s) | Self::Variable(s) => s,
            Self::Call => "call",
        }
    }
}

/// Compiled formula: a postfix program plus the table snapshot it was built with.
#[derive(Clone)]
pub struct Expression {
    tokens: Vec<Token>,
    tables: Arc<OperatorTables>,
}

impl Expression {
    pub(crate) fn new(tokens: Vec<Token>, tables: Arc<OperatorTables>) -> Self {
        Self { tokens, tables }
    }

    #[inline]
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    #[inline]
    pub fn tables(&self) -> &Arc<OperatorTables> {
        &self.tables
    }

    pub fn evaluate(&self, bindings: &Bindings) -> Result<Value, EvalError> {
        self.evaluate_with(bindings, EvalContext::default())
    }

    /// Evaluates with an announcement context so operands sampled at a
    /// different frequency can be aligned onto a common date index.
    pub fn evaluate_aligned(
        &self,
        bindings: &Bindings,
        announcements: &AnnouncementContext,
    ) -> Result<Value, EvalError> {
        self.evaluate_with(bindings, EvalContext::new(Some(announcements)))
    }

    pub fn evaluate_with(
        &self,
        bindings: &Bindings,
        ctx: EvalContext<'_>,
    ) -> Result<Value, EvalError> {
        trace!(
            tokens = self.tokens.len(),
            aligned = ctx.announcements().is_some(),
            "evaluating expression"
        );
        let mut stack: Vec<Value> = Vec::with_capacity(self.tokens.len());
        for token in &self.tokens {
            let value = match token {
                Token::Number(literal) => match literal {
                    Literal::Number(v) => Value::Scalar(*v),
                    Literal::Text(s) => Value::Text(s.clone()),
                    Literal::EmptyArgs => Value::List(Vec::new()),
                },
                Token::Variable(name) => self.resolve(bindings, name)?,
                Token::UnaryOp(symbol) => {
                    let operand = pop(&mut stack, token)?;
                    let entry = self
                        .tables
                        .unary(symbol)
                        .ok_or_else(|| EvalError::UnknownOperator {
                            symbol: symbol.clone(),
                        })?;
                    (entry.apply)(&ctx, operand)?
                }
                Token::BinaryOp(symbol) => {
                    let rhs = pop(&mut stack, token)?;
                    let lhs = pop(&mut stack, token)?;
                    let entry = self
                        .tables
                        .binary(symbol)
                        .ok_or_else(|| EvalError::UnknownOperator {
                            symbol: symbol.clone(),
                        })?;
                    (entry.apply)(&ctx, lhs, rhs)?
                }
                Token::Call => {
                    let args = pop(&mut stack, token)?;
                    let callee = pop(&mut stack, token)?;
                    let func = match callee {
                        Value::Function(func) => func,
                        other => {
                            return Err(EvalError::NotCallable {
                                what: other.kind().to_string(),
                            })
                        }
                    };
                    let args = match args {
                        Value::List(items) => items,
                        single => vec![single],
                    };
                    func.invoke(&ctx, args)?
                }
            };
            stack.push(value);
        }
        match (stack.pop(), stack.is_empty()) {
            (Some(value), true) => Ok(value),
            (popped, _) => Err(EvalError::Parity {
                remaining: stack.len() + usize::from(popped.is_some()),
            }),
        }
    }

    fn resolve(&self, bindings: &Bindings, name: &str) -> Result<Value, EvalError> {
        if let Some(value) = bindings.get(name) {
            return Ok(value.clone());
        }
        if let Some(func) = self.tables.function(name) {
            return Ok(Value::Function(func.clone()));
        }
        Err(EvalError::UndefinedVariable {
            name: name.to_string(),
        })
    }

    /// Folds every operator whose operands are all numeric literals or names
    /// bound in `values`. Argument lists and calls are left in place.
    pub fn simplify(&self, values: &HashMap<String, f64>) -> Result<Expression, EvalError> {
        let ctx = EvalContext::default();
        let mut pending: Vec<Token> = Vec::new();
        let mut out: Vec<Token> = Vec::with_capacity(self.tokens.len());

        for token in &self.tokens {
            match token {
                Token::Number(_) => pending.push(token.clone()),
                Token::Variable(name) if values.contains_key(name) => {
                    pending.push(Token::Number(Literal::Number(values[name])));
                }
                Token::BinaryOp(symbol) if symbol != "," && top_numbers(&pending, 2) => {
                    let rhs = pop_number(&mut pending);
                    let lhs = pop_number(&mut pending);
                    let entry = self
                        .tables
                        .binary(symbol)
                        .ok_or_else(|| EvalError::UnknownOperator {
                            symbol: symbol.clone(),
                        })?;
                    let folded = (entry.apply)(&ctx, Value::Scalar(lhs), Value::Scalar(rhs))?;
                    pending.push(folded_literal(symbol, folded)?);
                }
                Token::UnaryOp(symbol) if top_numbers(&pending, 1) => {
                    let operand = pop_number(&mut pending);
                    let entry = self
                        .tables
                        .unary(symbol)
                        .ok_or_else(|| EvalError::UnknownOperator {
                            symbol: symbol.clone(),
                        })?;
                    let folded = (entry.apply)(&ctx, Value::Scalar(operand))?;
                    pending.push(folded_literal(symbol, folded)?);
                }
                _ => {
                    out.append(&mut pending);
                    out.push(token.clone());
                }
            }
        }
        out.append(&mut pending);
        Ok(Expression::new(out, self.tables.clone()))
    }

    /// Replaces every occurrence of variable `name` with `replacement`'s program.
    pub fn substitute(&self, name: &str, replacement: &Expression) -> Expression {
        let mut tokens = Vec::with_capacity(self.tokens.len() + replacement.tokens.len());
        for token in &self.tokens {
            match token {
                Token::Variable(var) if var == name => {
                    tokens.extend(replacement.tokens.iter().cloned())
                }
                other => tokens.push(other.clone()),
            }
        }
        Expression::new(tokens, self.tables.clone())
    }

    /// Like [`Expression::substitute`], parsing `formula` with this expression's tables.
    pub fn substitute_formula(&self, name: &str, formula: &str) -> Result<Expression, CompileError> {
        let replacement = Parser::with_tables(self.tables.clone()).parse(formula)?;
        Ok(self.substitute(name, &replacement))
    }

    /// Distinct free identifiers in order of first occurrence.
    pub fn variables(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.tokens
            .iter()
            .filter_map(|token| match token {
                Token::Variable(name) if !self.tables.is_function(name) => Some(name),
                _ => None,
            })
            .filter(|name| seen.insert(name.as_str()))
            .cloned()
            .collect()
    }

    /// Canonical infix text; re-parsing it yields an equivalent program.
    pub fn to_infix(&self) -> Result<String, EvalError> {
        let mut stack: Vec<String> = Vec::with_capacity(self.tokens.len());
        for token in &self.tokens {
            let text = match token {
                Token::Number(Literal::Number(v)) => format_number(*v),
                Token::Number(Literal::Text(s)) => quote(s),
                Token::Number(Literal::EmptyArgs) => String::new(),
                Token::Variable(name) => name.clone(),
                Token::UnaryOp(symbol) => {
                    let operand = pop(&mut stack, token)?;
                    if symbol.chars().any(char::is_alphabetic) {
                        format!("{symbol}({operand})")
                    } else {
                        format!("({symbol}{operand})")
                    }
                }
                Token::BinaryOp(symbol) => {
                    let rhs = pop(&mut stack, token)?;
                    let lhs = pop(&mut stack, token)?;
                    if symbol == "," {
                        format!("{lhs},{rhs}")
                    } else if symbol.chars().any(char::is_alphabetic) {
                        format!("({lhs} {symbol} {rhs})")
                    } else {
                        format!("({lhs}{symbol}{rhs})")
                    }
                }
                Token::Call => {
                    let args = pop(&mut stack, token)?;
                    let callee = pop(&mut stack, token)?;
                    format!("{callee}({args})")
                }
            };
            stack.push(text);
        }
        match (stack.pop(), stack.is_empty()) {
            (Some(text), true) => Ok(text),
            (popped, _) => Err(EvalError::Parity {
                remaining: stack.len() + usize::from(popped.is_some()),
            }),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_infix() {
            Ok(text) => f.write_str(&text),
            Err(_) => f.write_str("<invalid expression>"),
        }
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expression")
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}

fn pop<T>(stack: &mut Vec<T>, token: &Token) -> Result<T, EvalError> {
    stack.pop().ok_or_else(|| EvalError::StackUnderflow {
        token: token.label().to_string(),
    })
}

fn top_numbers(pending: &[Token], n: usize) -> bool {
    pending.len() >= n
        && pending[pending.len() - n..]
            .iter()
            .all(|t| matches!(t, Token::Number(Literal::Number(_))))
}

fn pop_number(pending: &mut Vec<Token>) -> f64 {
    match pending.pop() {
        Some(Token::Number(Literal::Number(v))) => v,
        _ => f64::NAN,
    }
}

fn folded_literal(symbol: &str, value: Value) -> Result<Token, EvalError> {
    match value {
        Value::Scalar(v) => Ok(Token::Number(Literal::Number(v))),
        other => Err(EvalError::TypeMismatch {
            func: symbol.to_string(),
            expected: "scalar",
            actual: other.kind(),
        }),
    }
}

/// Plain decimal text. Negative values are parenthesized so they keep
/// binding tighter than `^`; non-finite values become an equivalent quotient.
fn format_number(v: f64) -> String {
    if v.is_nan() {
        "(0/0)".to_string()
    } else if v.is_infinite() {
        if v > 0.0 {
            "(1/0)".to_string()
        } else {
            "((-1)/0)".to_string()
        }
    } else if v.is_sign_negative() {
        format!("(-{})", -v)
    } else {
        format!("{v}")
    }
}

fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for c in text.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}
