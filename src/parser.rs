use crate::error::{CompileError, RegisterError};
use crate::expr::{Expression, Literal, Token};
use crate::lexer::{Lexeme, Lexer};
use crate::registry::{Arity, BinaryFn, FunctionFn, OperatorTables, UnaryFn};
use crate::types::CompileOptions;
use std::ops::BitOr;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Priority added per level of parenthesis nesting.
const DEPTH_STEP: i32 = 10;
const CALL_PRIORITY: i32 = -2;
const COMMA_PRIORITY: i32 = -1;
const COMMA: &str = ",";

/// Highest base priority a registered operator may use. Anything above would
/// outrank a call opened at the same depth and split it from its arguments.
pub(crate) const MAX_OPERATOR_PRIORITY: i32 = DEPTH_STEP + CALL_PRIORITY - 1;

/// Set of token classes the parser accepts next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Expect(u16);

impl Expect {
    const PRIMARY: Self = Self(1);
    const OPERATOR: Self = Self(1 << 1);
    const FUNCTION: Self = Self(1 << 2);
    const LPAREN: Self = Self(1 << 3);
    const RPAREN: Self = Self(1 << 4);
    const COMMA: Self = Self(1 << 5);
    const SIGN: Self = Self(1 << 6);
    const CALL: Self = Self(1 << 7);
    const NULLARY_CALL: Self = Self(1 << 8);

    /// Anything that can start an operand.
    const OPERAND: Self = Self(Self::PRIMARY.0 | Self::LPAREN.0 | Self::FUNCTION.0 | Self::SIGN.0);
    /// After a literal.
    const AFTER_LITERAL: Self = Self(Self::OPERATOR.0 | Self::RPAREN.0 | Self::COMMA.0);
    /// After a variable or a closing paren, which may be called.
    const AFTER_CALLABLE: Self = Self(Self::AFTER_LITERAL.0 | Self::LPAREN.0 | Self::CALL.0);

    #[inline]
    const fn has(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for Expect {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Compiles formula text into [`Expression`]s against a table snapshot.
///
/// Registration is copy-on-write: expressions compiled earlier keep the
/// tables they were built with.
#[derive(Debug, Clone)]
pub struct Parser {
    tables: Arc<OperatorTables>,
}

impl Parser {
    pub fn new() -> Self {
        Self::with_options(&CompileOptions::default())
    }

    pub fn with_options(opts: &CompileOptions) -> Self {
        Self {
            tables: Arc::new(OperatorTables::with_case_style(opts.case_style)),
        }
    }

    pub fn with_tables(tables: Arc<OperatorTables>) -> Self {
        Self { tables }
    }

    #[inline]
    pub fn tables(&self) -> &Arc<OperatorTables> {
        &self.tables
    }

    pub fn options(&self) -> CompileOptions {
        CompileOptions {
            case_style: self.tables.case_style(),
        }
    }

    pub fn register_unary(
        &mut self,
        name: &str,
        priority: i32,
        apply: UnaryFn,
    ) -> Result<(), RegisterError> {
        Arc::make_mut(&mut self.tables).register_unary(name, priority, apply)
    }

    pub fn register_binary(
        &mut self,
        symbol: &str,
        priority: i32,
        apply: BinaryFn,
    ) -> Result<(), RegisterError> {
        Arc::make_mut(&mut self.tables).register_binary(symbol, priority, apply)
    }

    pub fn register_function(
        &mut self,
        name: &str,
        arity: Arity,
        call: FunctionFn,
    ) -> Result<(), RegisterError> {
        Arc::make_mut(&mut self.tables).register_function(name, arity, call)
    }

    pub fn parse(&self, formula: &str) -> Result<Expression, CompileError> {
        let started_at = Instant::now();
        let lexer = Lexer::new(formula, &self.tables);
        let mut state = ParseState::new(&self.tables);
        let mut cursor = crate::lexer::Cursor::start();
        while let Some((token, next)) = lexer.scan(cursor)? {
            state.accept(token.lexeme, token.column)?;
            cursor = next;
        }
        let tokens = state.finish(lexer.end_column())?;
        debug!(
            formula,
            tokens = tokens.len(),
            elapsed_us = started_at.elapsed().as_micros() as u64,
            "compiled formula"
        );
        Ok(Expression::new(tokens, self.tables.clone()))
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

struct ParseState<'a> {
    tables: &'a OperatorTables,
    output: Vec<Token>,
    operators: Vec<(Token, i32)>,
    expected: Expect,
    depth: i32,
    operands: usize,
    binaries: usize,
    seen_any: bool,
}

impl<'a> ParseState<'a> {
    fn new(tables: &'a OperatorTables) -> Self {
        Self {
            tables,
            output: Vec::new(),
            operators: Vec::new(),
            expected: Expect::OPERAND,
            depth: 0,
            operands: 0,
            binaries: 0,
            seen_any: false,
        }
    }

    fn accept(&mut self, lexeme: Lexeme, column: usize) -> Result<(), CompileError> {
        self.seen_any = true;
        match lexeme {
            Lexeme::Operator(symbol) if self.expected.has(Expect::SIGN) && is_sign(&symbol) => {
                if symbol == "-" {
                    let entry = self
                        .tables
                        .unary(&symbol)
                        .ok_or_else(|| syntax(column, format!("unknown operator `{symbol}`")))?;
                    let priority = entry.priority + self.depth * DEPTH_STEP;
                    self.operators.push((Token::UnaryOp(symbol), priority));
                }
                self.expected = Expect::OPERAND;
            }
            Lexeme::Operator(symbol) => {
                if !self.expected.has(Expect::OPERATOR) {
                    return Err(unexpected(column, &Lexeme::Operator(symbol)));
                }
                let entry = self
                    .tables
                    .binary(&symbol)
                    .ok_or_else(|| syntax(column, format!("unknown operator `{symbol}`")))?;
                let priority = entry.priority + self.depth * DEPTH_STEP;
                self.add_operator(Token::BinaryOp(symbol), priority);
                self.binaries += 1;
                self.expected = Expect::OPERAND;
            }
            Lexeme::Number(value) | Lexeme::Constant(value) => {
                if !self.expected.has(Expect::PRIMARY) {
                    return Err(unexpected(column, &lexeme));
                }
                self.push_operand(Token::Number(Literal::Number(value)));
                self.expected = Expect::AFTER_LITERAL;
            }
            Lexeme::Text(ref text) => {
                if !self.expected.has(Expect::PRIMARY) {
                    return Err(unexpected(column, &lexeme));
                }
                self.push_operand(Token::Number(Literal::Text(text.clone())));
                self.expected = Expect::AFTER_LITERAL;
            }
            Lexeme::NamedUnary(name) => {
                if !self.expected.has(Expect::FUNCTION) {
                    return Err(unexpected(column, &Lexeme::NamedUnary(name)));
                }
                let entry = self
                    .tables
                    .unary(&name)
                    .ok_or_else(|| syntax(column, format!("unknown operator `{name}`")))?;
                let priority = entry.priority + self.depth * DEPTH_STEP;
                self.operators.push((Token::UnaryOp(name), priority));
                self.expected = Expect::LPAREN;
            }
            Lexeme::Identifier(name) => {
                if !self.expected.has(Expect::PRIMARY) {
                    return Err(unexpected(column, &Lexeme::Identifier(name)));
                }
                self.push_operand(Token::Variable(name));
                self.expected = Expect::AFTER_CALLABLE;
            }
            Lexeme::LParen => {
                if self.expected.has(Expect::CALL) {
                    self.depth += 1;
                    self.add_operator(Token::Call, CALL_PRIORITY + self.depth * DEPTH_STEP);
                    self.binaries += 1;
                    self.expected = Expect::OPERAND | Expect::NULLARY_CALL;
                } else if self.expected.has(Expect::LPAREN) {
                    self.depth += 1;
                    self.expected = Expect::OPERAND;
                } else {
                    return Err(unexpected(column, &lexeme));
                }
            }
            Lexeme::RParen => {
                if self.expected.has(Expect::NULLARY_CALL) {
                    self.push_operand(Token::Number(Literal::EmptyArgs));
                    self.depth -= 1;
                } else if self.expected.has(Expect::RPAREN) {
                    if self.depth == 0 {
                        return Err(syntax(column, "unmatched \"()\"".to_string()));
                    }
                    self.depth -= 1;
                } else {
                    return Err(unexpected(column, &lexeme));
                }
                self.expected = Expect::AFTER_CALLABLE;
            }
            Lexeme::Comma => {
                if !self.expected.has(Expect::COMMA) || self.depth == 0 {
                    return Err(unexpected(column, &lexeme));
                }
                let base = self
                    .tables
                    .binary(COMMA)
                    .map_or(COMMA_PRIORITY, |entry| entry.priority);
                self.add_operator(
                    Token::BinaryOp(COMMA.to_string()),
                    base + self.depth * DEPTH_STEP,
                );
                self.binaries += 1;
                self.expected = Expect::OPERAND;
            }
        }
        Ok(())
    }

    fn push_operand(&mut self, token: Token) {
        self.output.push(token);
        self.operands += 1;
    }

    /// Pops every pending operator binding at least as tightly, then pushes.
    fn add_operator(&mut self, token: Token, priority: i32) {
        while let Some((_, top)) = self.operators.last() {
            if priority > *top {
                break;
            }
            if let Some((popped, _)) = self.operators.pop() {
                self.output.push(popped);
            }
        }
        self.operators.push((token, priority));
    }

    fn finish(mut self, end_column: usize) -> Result<Vec<Token>, CompileError> {
        if !self.seen_any {
            return Err(syntax(end_column, "empty expression".to_string()));
        }
        if self.depth > 0 {
            return Err(syntax(end_column, "unmatched \"()\"".to_string()));
        }
        if !self.expected.has(Expect::OPERATOR) {
            return Err(syntax(end_column, "missing operand".to_string()));
        }
        while let Some((token, _)) = self.operators.pop() {
            self.output.push(token);
        }
        if self.operands != self.binaries + 1 {
            return Err(syntax(
                end_column,
                format!(
                    "parity: {} operands for {} binary operators",
                    self.operands, self.binaries
                ),
            ));
        }
        Ok(self.output)
    }
}

#[inline]
fn is_sign(symbol: &str) -> bool {
    symbol == "-" || symbol == "+"
}

fn syntax(column: usize, reason: String) -> CompileError {
    CompileError::Syntax { column, reason }
}

fn unexpected(column: usize, lexeme: &Lexeme) -> CompileError {
    syntax(column, format!("unexpected {}", lexeme.describe()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::EvalContext;
    use crate::types::Value;

    fn postfix(formula: &str) -> Vec<Token> {
        Parser::new()
            .parse(formula)
            .expect("formula should parse")
            .tokens()
            .to_vec()
    }

    fn num(v: f64) -> Token {
        Token::Number(Literal::Number(v))
    }

    fn bin(s: &str) -> Token {
        Token::BinaryOp(s.to_string())
    }

    #[test]
    fn precedence_orders_postfix() {
        assert_eq!(
            postfix("1 + 2 * 3"),
            vec![num(1.0), num(2.0), num(3.0), bin("*"), bin("+")]
        );
        assert_eq!(
            postfix("(1 + 2) * 3"),
            vec![num(1.0), num(2.0), bin("+"), num(3.0), bin("*")]
        );
    }

    #[test]
    fn sign_after_power_binds_to_exponent() {
        assert_eq!(
            postfix("2 ^ -1"),
            vec![num(2.0), num(1.0), Token::UnaryOp("-".into()), bin("^")]
        );
    }

    #[test]
    fn unary_plus_is_dropped() {
        assert_eq!(postfix("+3"), vec![num(3.0)]);
    }

    #[test]
    fn call_binds_around_argument_list() {
        assert_eq!(
            postfix("Delta(vwap, 7) * 2"),
            vec![
                Token::Variable("Delta".into()),
                Token::Variable("vwap".into()),
                num(7.0),
                bin(","),
                Token::Call,
                num(2.0),
                bin("*"),
            ]
        );
    }

    #[test]
    fn nullary_call_gets_empty_arguments() {
        assert_eq!(
            postfix("f()"),
            vec![
                Token::Variable("f".into()),
                Token::Number(Literal::EmptyArgs),
                Token::Call
            ]
        );
    }

    #[test]
    fn chained_calls_apply_left_to_right() {
        assert_eq!(
            postfix("f(x)(y)"),
            vec![
                Token::Variable("f".into()),
                Token::Variable("x".into()),
                Token::Call,
                Token::Variable("y".into()),
                Token::Call,
            ]
        );
    }

    #[test]
    fn named_unary_requires_paren() {
        let err = Parser::new().parse("Sqrt 4").expect_err("missing paren");
        assert_eq!(err.column(), 5);
        assert_eq!(err.reason(), "unexpected number");
    }

    #[test]
    fn syntax_errors_carry_columns() {
        let parser = Parser::new();
        let cases: &[(&str, usize, &str)] = &[
            ("(1 + 2", 6, "unmatched \"()\""),
            ("1 +", 3, "missing operand"),
            ("", 0, "empty expression"),
            ("   ", 3, "empty expression"),
            ("1 2", 2, "unexpected number"),
            ("1 * * 2", 4, "unexpected operator"),
            ("a b", 2, "unexpected variable"),
            ("1 'x'", 2, "unexpected string"),
            ("1 PI", 2, "unexpected constant"),
            ("1 Sqrt(2)", 2, "unexpected function"),
            ("1)", 1, "unmatched \"()\""),
            ("()", 1, "unexpected \")\""),
            ("1 (2)", 2, "unexpected \"(\""),
            ("1, 2", 1, "unexpected \",\""),
            ("f(1,)", 4, "unexpected \")\""),
        ];
        for (formula, column, reason) in cases {
            let err = parser.parse(formula).expect_err(formula);
            assert!(
                matches!(err, CompileError::Syntax { .. }),
                "{formula}: {err}"
            );
            assert_eq!(err.column(), *column, "{formula}: {err}");
            assert_eq!(err.reason(), *reason, "{formula}: {err}");
        }
    }

    #[test]
    fn unknown_keyword_operator_is_variable() {
        let err = Parser::new().parse("a xor b").expect_err("xor not registered");
        assert_eq!(err.reason(), "unexpected variable");
    }

    #[test]
    fn registration_is_copy_on_write() {
        let mut parser = Parser::new();
        let before = parser.parse("1 + 1").expect("parse");
        parser
            .register_binary(
                "xor",
                0,
                Arc::new(|_ctx: &EvalContext<'_>, lhs: Value, _rhs: Value| Ok(lhs)),
            )
            .expect("xor is new");
        assert!(!before.tables().is_binary_keyword("xor"));
        assert!(parser.tables().is_binary_keyword("xor"));
        parser.parse("a xor b").expect("xor parses after registration");
    }
}
