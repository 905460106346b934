use crate::error::CompileError;
use crate::registry::OperatorTables;

/// Fixed operator symbols, longest first so `<=` wins over `<`.
/// The second element is the table symbol the lexeme resolves to.
pub(crate) const SYMBOL_OPERATORS: &[(&str, &str)] = &[
    ("==", "=="),
    ("!=", "!="),
    ("<=", "<="),
    (">=", ">="),
    ("&&", "&&"),
    ("||", "||"),
    ("+", "+"),
    ("-", "-"),
    ("*", "*"),
    ("\u{2219}", "*"),
    ("\u{2022}", "*"),
    ("/", "/"),
    ("%", "%"),
    ("^", "^"),
    ("<", "<"),
    (">", ">"),
];

const CONSTANTS: &[(&str, f64)] = &[("E", std::f64::consts::E), ("PI", std::f64::consts::PI)];

/// Position in the formula, counted in characters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cursor {
    pos: usize,
}

impl Cursor {
    pub const fn start() -> Self {
        Self { pos: 0 }
    }

    #[inline]
    pub const fn column(self) -> usize {
        self.pos
    }

    #[inline]
    const fn advance(self, n: usize) -> Self {
        Self { pos: self.pos + n }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Lexeme {
    /// Symbolic or keyword operator, already normalized (`∙` becomes `*`).
    Operator(String),
    Number(f64),
    Text(String),
    Constant(f64),
    /// Entry of the unary table used as a prefix operator, e.g. `Sqrt`.
    NamedUnary(String),
    Identifier(String),
    LParen,
    RParen,
    Comma,
}

impl Lexeme {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Operator(_) => "operator",
            Self::Number(_) => "number",
            Self::Text(_) => "string",
            Self::Constant(_) => "constant",
            Self::NamedUnary(_) => "function",
            Self::Identifier(_) => "variable",
            Self::LParen => "\"(\"",
            Self::RParen => "\")\"",
            Self::Comma => "\",\"",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub lexeme: Lexeme,
    pub column: usize,
}

pub struct Lexer<'a> {
    chars: Vec<char>,
    tables: &'a OperatorTables,
}

impl<'a> Lexer<'a> {
    pub fn new(formula: &str, tables: &'a OperatorTables) -> Self {
        Self {
            chars: formula.chars().collect(),
            tables,
        }
    }

    /// Column reported for errors detected at end of input.
    #[inline]
    pub fn end_column(&self) -> usize {
        self.chars.len()
    }

    pub fn tokenize(&self) -> Result<Vec<Spanned>, CompileError> {
        let mut out = Vec::new();
        let mut cursor = Cursor::start();
        while let Some((token, next)) = self.scan(cursor)? {
            out.push(token);
            cursor = next;
        }
        Ok(out)
    }

    /// Classifies the token starting at `cursor`. `Ok(None)` means end of input.
    pub fn scan(&self, cursor: Cursor) -> Result<Option<(Spanned, Cursor)>, CompileError> {
        let cursor = self.skip_trivia(cursor)?;
        let Some(&c) = self.chars.get(cursor.pos) else {
            return Ok(None);
        };
        let spanned = |lexeme, len: usize| {
            Some((
                Spanned {
                    lexeme,
                    column: cursor.pos,
                },
                cursor.advance(len),
            ))
        };

        match c {
            '(' => return Ok(spanned(Lexeme::LParen, 1)),
            ')' => return Ok(spanned(Lexeme::RParen, 1)),
            ',' => return Ok(spanned(Lexeme::Comma, 1)),
            _ => {}
        }
        if let Some((len, symbol)) = self.match_symbol(cursor) {
            return Ok(spanned(Lexeme::Operator(symbol.to_string()), len));
        }
        if c.is_ascii_digit() || c == '.' {
            let (value, len) = self.scan_number(cursor)?;
            return Ok(spanned(Lexeme::Number(value), len));
        }
        if c == '\'' {
            let (text, len) = self.scan_string(cursor)?;
            return Ok(spanned(Lexeme::Text(text), len));
        }
        if c.is_alphabetic() || c == '_' || c == '"' {
            let (word, len) = self.scan_identifier(cursor)?;
            let lexeme = if let Some((_, value)) = CONSTANTS.iter().find(|(name, _)| *name == word)
            {
                Lexeme::Constant(*value)
            } else if self.tables.is_binary_keyword(&word) {
                Lexeme::Operator(word)
            } else if self.tables.is_named_unary(&word) {
                Lexeme::NamedUnary(word)
            } else {
                Lexeme::Identifier(word)
            };
            return Ok(spanned(lexeme, len));
        }
        Err(CompileError::Lex {
            column: cursor.pos,
            reason: format!("unknown character `{c}`"),
        })
    }

    fn skip_trivia(&self, mut cursor: Cursor) -> Result<Cursor, CompileError> {
        loop {
            match self.chars.get(cursor.pos) {
                Some(c) if c.is_whitespace() => cursor = cursor.advance(1),
                Some('/') if self.chars.get(cursor.pos + 1) == Some(&'*') => {
                    let body = cursor.pos + 2;
                    let close = (body..self.chars.len().saturating_sub(1))
                        .find(|&i| self.chars[i] == '*' && self.chars[i + 1] == '/');
                    match close {
                        Some(i) => cursor = Cursor { pos: i + 2 },
                        None => {
                            return Err(CompileError::Lex {
                                column: cursor.pos,
                                reason: "unterminated comment".to_string(),
                            })
                        }
                    }
                }
                _ => return Ok(cursor),
            }
        }
    }

    fn match_symbol(&self, cursor: Cursor) -> Option<(usize, &'static str)> {
        let rest = &self.chars[cursor.pos..];
        SYMBOL_OPERATORS.iter().find_map(|(text, symbol)| {
            let len = text.chars().count();
            let matches = rest.len() >= len && text.chars().zip(rest).all(|(a, b)| a == *b);
            matches.then_some((len, *symbol))
        })
    }

    fn scan_number(&self, cursor: Cursor) -> Result<(f64, usize), CompileError> {
        let mut seen_dot = false;
        let mut seen_digit = false;
        let mut end = cursor.pos;
        while let Some(&c) = self.chars.get(end) {
            if c.is_ascii_digit() {
                seen_digit = true;
            } else if c == '.' && !seen_dot {
                seen_dot = true;
            } else {
                break;
            }
            end += 1;
        }
        let text: String = self.chars[cursor.pos..end].iter().collect();
        if !seen_digit {
            return Err(CompileError::Lex {
                column: cursor.pos,
                reason: "malformed number".to_string(),
            });
        }
        let value = text.parse::<f64>().map_err(|_| CompileError::Lex {
            column: cursor.pos,
            reason: format!("malformed number `{text}`"),
        })?;
        Ok((value, end - cursor.pos))
    }

    fn scan_string(&self, cursor: Cursor) -> Result<(String, usize), CompileError> {
        let mut out = String::new();
        let mut i = cursor.pos + 1;
        loop {
            let Some(&c) = self.chars.get(i) else {
                return Err(CompileError::Lex {
                    column: cursor.pos,
                    reason: "unterminated string".to_string(),
                });
            };
            match c {
                '\'' => return Ok((out, i + 1 - cursor.pos)),
                '\\' => {
                    let escape_col = i;
                    let esc = self.chars.get(i + 1).copied();
                    let resolved = match esc {
                        Some('\'') => '\'',
                        Some('\\') => '\\',
                        Some('/') => '/',
                        Some('b') => '\u{8}',
                        Some('f') => '\u{c}',
                        Some('n') => '\n',
                        Some('r') => '\r',
                        Some('t') => '\t',
                        Some('u') => {
                            let hex: String = self.chars.iter().skip(i + 2).take(4).collect();
                            let well_formed = hex.chars().count() == 4
                                && hex.chars().all(|c| c.is_ascii_hexdigit());
                            let code = well_formed
                                .then(|| u32::from_str_radix(&hex, 16).ok())
                                .flatten()
                                .and_then(char::from_u32)
                                .ok_or_else(|| CompileError::Lex {
                                    column: escape_col,
                                    reason: format!("illegal escape sequence: \\u{hex}"),
                                })?;
                            out.push(code);
                            i += 6;
                            continue;
                        }
                        Some(other) => {
                            return Err(CompileError::Lex {
                                column: escape_col,
                                reason: format!("illegal escape sequence: \\{other}"),
                            })
                        }
                        None => {
                            return Err(CompileError::Lex {
                                column: cursor.pos,
                                reason: "unterminated string".to_string(),
                            })
                        }
                    };
                    out.push(resolved);
                    i += 2;
                }
                other => {
                    out.push(other);
                    i += 1;
                }
            }
        }
    }

    /// Identifier extent: letters, digits, `_`, `.` and `"quoted"` segments.
    fn scan_identifier(&self, cursor: Cursor) -> Result<(String, usize), CompileError> {
        let mut out = String::new();
        let mut in_quotes = false;
        let mut i = cursor.pos;
        while let Some(&c) = self.chars.get(i) {
            let plain = c.is_alphanumeric() || c == '_' || c == '.';
            if !in_quotes && c != '"' && !plain {
                break;
            }
            if c == '"' {
                in_quotes = !in_quotes;
            }
            out.push(c);
            i += 1;
        }
        if in_quotes {
            return Err(CompileError::Lex {
                column: cursor.pos,
                reason: "unterminated quoted identifier".to_string(),
            });
        }
        Ok((out, i - cursor.pos))
    }
}
