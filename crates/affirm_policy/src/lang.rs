//! Policy predicate language.
//!
//! A small closed expression grammar in the style of the Python predicates
//! operators already write: boolean connectives, comparisons, membership,
//! arithmetic, literals, lists, and dotted or bracketed paths into the
//! evaluation context. There is no function call syntax.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Deepest accepted expression tree
pub const MAX_DEPTH: usize = 64;

/// Predicate parse error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("parse error at {position}: {message}")]
pub struct ParseError {
    /// Byte offset into the source
    pub position: usize,
    /// What went wrong
    pub message: String,
}

impl ParseError {
    fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

/// Binary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    /// `or`
    Or,
    /// `and`
    And,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `is`
    Is,
    /// `is not`
    IsNot,
    /// `in`
    In,
    /// `not in`
    NotIn,
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
}

impl BinOp {
    /// Source spelling
    #[must_use]
    pub const fn symbol(&self) -> &'static str {
        match self {
            Self::Or => "or",
            Self::And => "and",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Is => "is",
            Self::IsNot => "is not",
            Self::In => "in",
            Self::NotIn => "not in",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
        }
    }
}

/// One step of a path after its root name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathSegment {
    /// `.name`
    Field(String),
    /// `["key"]`
    Key(String),
}

/// Predicate AST
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// `null` / `None`
    Null,
    /// `true` / `false`
    Bool(bool),
    /// Numeric literal
    Number(f64),
    /// String literal
    Str(String),
    /// `[a, b, ...]`
    List(Vec<Expr>),
    /// Context lookup
    Path {
        /// Top-level context name
        root: String,
        /// Member accesses
        segments: Vec<PathSegment>,
    },
    /// `not e`
    Not(Box<Expr>),
    /// `-e`
    Neg(Box<Expr>),
    /// `l op r`
    Binary {
        /// Operator
        op: BinOp,
        /// Left operand
        left: Box<Expr>,
        /// Right operand
        right: Box<Expr>,
    },
}

impl Expr {
    /// Parse a predicate
    ///
    /// # Errors
    ///
    /// Returns error on a lexical or syntax error, trailing input, or an
    /// expression nested deeper than [`MAX_DEPTH`]
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let expr = parser.or()?;
        match parser.peek() {
            Tok::End => Ok(expr),
            other => Err(ParseError::new(parser.offset(), format!("unexpected {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Number(f64),
    Str(String),
    Ident(String),
    And,
    Or,
    Not,
    In,
    Is,
    True,
    False,
    Null,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    End,
}

impl fmt::Display for Tok {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "number {}", n),
            Self::Str(s) => write!(f, "string {:?}", s),
            Self::Ident(s) => write!(f, "name '{}'", s),
            Self::End => f.write_str("end of input"),
            other => write!(f, "'{}'", token_text(other)),
        }
    }
}

fn token_text(tok: &Tok) -> &'static str {
    match tok {
        Tok::And => "and",
        Tok::Or => "or",
        Tok::Not => "not",
        Tok::In => "in",
        Tok::Is => "is",
        Tok::True => "true",
        Tok::False => "false",
        Tok::Null => "null",
        Tok::EqEq => "==",
        Tok::NotEq => "!=",
        Tok::Lt => "<",
        Tok::Le => "<=",
        Tok::Gt => ">",
        Tok::Ge => ">=",
        Tok::Plus => "+",
        Tok::Minus => "-",
        Tok::Star => "*",
        Tok::Slash => "/",
        Tok::LParen => "(",
        Tok::RParen => ")",
        Tok::LBracket => "[",
        Tok::RBracket => "]",
        Tok::Comma => ",",
        Tok::Dot => ".",
        Tok::Number(_) | Tok::Str(_) | Tok::Ident(_) | Tok::End => "",
    }
}

fn tokenize(source: &str) -> Result<Vec<(usize, Tok)>, ParseError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let two = chars.get(i + 1).map(|&(_, n)| n);
        let (tok, width) = match (c, two) {
            ('=', Some('=')) => (Tok::EqEq, 2),
            ('!', Some('=')) => (Tok::NotEq, 2),
            ('<', Some('=')) => (Tok::Le, 2),
            ('>', Some('=')) => (Tok::Ge, 2),
            ('<', _) => (Tok::Lt, 1),
            ('>', _) => (Tok::Gt, 1),
            ('+', _) => (Tok::Plus, 1),
            ('-', _) => (Tok::Minus, 1),
            ('*', _) => (Tok::Star, 1),
            ('/', _) => (Tok::Slash, 1),
            ('(', _) => (Tok::LParen, 1),
            (')', _) => (Tok::RParen, 1),
            ('[', _) => (Tok::LBracket, 1),
            (']', _) => (Tok::RBracket, 1),
            (',', _) => (Tok::Comma, 1),
            ('.', Some(d)) if !d.is_ascii_digit() => (Tok::Dot, 1),
            ('\'' | '"', _) => {
                let (s, end) = lex_string(&chars, i)?;
                tokens.push((offset, Tok::Str(s)));
                i = end;
                continue;
            }
            (c, _) if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].1.is_ascii_digit() || chars[i].1 == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().map(|&(_, c)| c).collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| ParseError::new(offset, format!("bad number '{}'", text)))?;
                tokens.push((offset, Tok::Number(n)));
                continue;
            }
            (c, _) if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].1.is_alphanumeric() || chars[i].1 == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().map(|&(_, c)| c).collect();
                tokens.push((offset, keyword(word)));
                continue;
            }
            (other, _) => {
                return Err(ParseError::new(offset, format!("unexpected character '{}'", other)));
            }
        };
        tokens.push((offset, tok));
        i += width;
    }

    tokens.push((source.len(), Tok::End));
    Ok(tokens)
}

fn keyword(word: String) -> Tok {
    match word.as_str() {
        "and" => Tok::And,
        "or" => Tok::Or,
        "not" => Tok::Not,
        "in" => Tok::In,
        "is" => Tok::Is,
        "true" | "True" => Tok::True,
        "false" | "False" => Tok::False,
        "null" | "None" => Tok::Null,
        _ => Tok::Ident(word),
    }
}

fn lex_string(chars: &[(usize, char)], start: usize) -> Result<(String, usize), ParseError> {
    let (offset, quote) = chars[start];
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i].1 {
            c if c == quote => return Ok((out, i + 1)),
            '\\' => {
                let escaped = chars
                    .get(i + 1)
                    .map(|&(_, c)| c)
                    .ok_or_else(|| ParseError::new(offset, "unterminated string"))?;
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
                i += 2;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Err(ParseError::new(offset, "unterminated string"))
}

struct Parser {
    tokens: Vec<(usize, Tok)>,
    pos: usize,
    /// Nesting of the node being parsed; chained operators count as levels
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].1
    }

    fn peek_second(&self) -> &Tok {
        &self.tokens[(self.pos + 1).min(self.tokens.len() - 1)].1
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].0
    }

    fn bump(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, want: &Tok) -> Result<(), ParseError> {
        if self.peek() == want {
            self.bump();
            Ok(())
        } else {
            Err(ParseError::new(
                self.offset(),
                format!("expected '{}', found {}", token_text(want), self.peek()),
            ))
        }
    }

    fn descend(&mut self) -> Result<(), ParseError> {
        if self.depth >= MAX_DEPTH {
            return Err(ParseError::new(
                self.offset(),
                format!("expression nested deeper than {} levels", MAX_DEPTH),
            ));
        }
        self.depth += 1;
        Ok(())
    }

    fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn or(&mut self) -> Result<Expr, ParseError> {
        let start = self.depth;
        let mut left = self.and()?;
        while self.peek() == &Tok::Or {
            self.bump();
            self.descend()?;
            left = Self::binary(BinOp::Or, left, self.and()?);
        }
        self.depth = start;
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, ParseError> {
        let start = self.depth;
        let mut left = self.not()?;
        while self.peek() == &Tok::And {
            self.bump();
            self.descend()?;
            left = Self::binary(BinOp::And, left, self.not()?);
        }
        self.depth = start;
        Ok(left)
    }

    fn not(&mut self) -> Result<Expr, ParseError> {
        if self.peek() == &Tok::Not {
            self.bump();
            self.descend()?;
            let inner = self.not()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let left = self.sum()?;
        let op = match (self.peek(), self.peek_second()) {
            (Tok::EqEq, _) => BinOp::Eq,
            (Tok::NotEq, _) => BinOp::Ne,
            (Tok::Lt, _) => BinOp::Lt,
            (Tok::Le, _) => BinOp::Le,
            (Tok::Gt, _) => BinOp::Gt,
            (Tok::Ge, _) => BinOp::Ge,
            (Tok::In, _) => BinOp::In,
            (Tok::Is, Tok::Not) => BinOp::IsNot,
            (Tok::Is, _) => BinOp::Is,
            (Tok::Not, Tok::In) => BinOp::NotIn,
            _ => return Ok(left),
        };
        self.bump();
        if matches!(op, BinOp::IsNot | BinOp::NotIn) {
            self.bump();
        }
        let right = self.sum()?;
        Ok(Self::binary(op, left, right))
    }

    fn sum(&mut self) -> Result<Expr, ParseError> {
        let start = self.depth;
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinOp::Add,
                Tok::Minus => BinOp::Sub,
                _ => break,
            };
            self.bump();
            self.descend()?;
            left = Self::binary(op, left, self.term()?);
        }
        self.depth = start;
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let start = self.depth;
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Tok::Star => BinOp::Mul,
                Tok::Slash => BinOp::Div,
                _ => break,
            };
            self.bump();
            self.descend()?;
            left = Self::binary(op, left, self.unary()?);
        }
        self.depth = start;
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        if self.peek() == &Tok::Minus {
            self.bump();
            self.descend()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let offset = self.offset();
        match self.bump() {
            Tok::Number(n) => Ok(Expr::Number(n)),
            Tok::Str(s) => Ok(Expr::Str(s)),
            Tok::True => Ok(Expr::Bool(true)),
            Tok::False => Ok(Expr::Bool(false)),
            Tok::Null => Ok(Expr::Null),
            Tok::LParen => {
                self.descend()?;
                let inner = self.or()?;
                self.expect(&Tok::RParen)?;
                self.depth -= 1;
                Ok(inner)
            }
            Tok::LBracket => {
                self.descend()?;
                let mut items = Vec::new();
                if self.peek() != &Tok::RBracket {
                    items.push(self.or()?);
                    while self.peek() == &Tok::Comma {
                        self.bump();
                        if self.peek() == &Tok::RBracket {
                            break;
                        }
                        items.push(self.or()?);
                    }
                }
                self.expect(&Tok::RBracket)?;
                self.depth -= 1;
                Ok(Expr::List(items))
            }
            Tok::Ident(root) => self.path(root),
            other => Err(ParseError::new(offset, format!("unexpected {}", other))),
        }
    }

    fn path(&mut self, root: String) -> Result<Expr, ParseError> {
        let mut segments = Vec::new();
        loop {
            match self.peek() {
                Tok::Dot => {
                    self.bump();
                    let offset = self.offset();
                    match self.bump() {
                        Tok::Ident(name) => segments.push(PathSegment::Field(name)),
                        other => {
                            return Err(ParseError::new(offset, format!("expected a name after '.', found {}", other)));
                        }
                    }
                }
                Tok::LBracket => {
                    self.bump();
                    let offset = self.offset();
                    match self.bump() {
                        Tok::Str(key) => segments.push(PathSegment::Key(key)),
                        other => {
                            return Err(ParseError::new(offset, format!("expected a string key, found {}", other)));
                        }
                    }
                    self.expect(&Tok::RBracket)?;
                }
                _ => return Ok(Expr::Path { root, segments }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(root: &str, fields: &[&str]) -> Expr {
        Expr::Path {
            root: root.to_string(),
            segments: fields.iter().map(|f| PathSegment::Field((*f).to_string())).collect(),
        }
    }

    #[test]
    fn test_parse_precedence() {
        let expr = Expr::parse("a or b and not c").unwrap();
        let expected = Expr::Binary {
            op: BinOp::Or,
            left: Box::new(path("a", &[])),
            right: Box::new(Expr::Binary {
                op: BinOp::And,
                left: Box::new(path("b", &[])),
                right: Box::new(Expr::Not(Box::new(path("c", &[])))),
            }),
        };
        assert_eq!(expr, expected);
    }

    #[test]
    fn test_parse_arithmetic_binds_tighter_than_comparison() {
        let expr = Expr::parse("1 + 2 * 3 >= -x").unwrap();
        let Expr::Binary { op: BinOp::Ge, left, right } = expr else {
            panic!("expected >=");
        };
        assert!(matches!(*left, Expr::Binary { op: BinOp::Add, .. }));
        assert_eq!(*right, Expr::Neg(Box::new(path("x", &[]))));
    }

    #[test]
    fn test_parse_membership_and_identity() {
        assert!(matches!(
            Expr::parse("'pii_leak' not in tags").unwrap(),
            Expr::Binary { op: BinOp::NotIn, .. }
        ));
        assert!(matches!(
            Expr::parse("last_update_days is not None").unwrap(),
            Expr::Binary { op: BinOp::IsNot, .. }
        ));
        assert!(matches!(
            Expr::parse("x is null").unwrap(),
            Expr::Binary { op: BinOp::Is, .. }
        ));
    }

    #[test]
    fn test_parse_paths() {
        assert_eq!(Expr::parse("scores.safety").unwrap(), path("scores", &["safety"]));
        assert_eq!(
            Expr::parse("meta['rate_limit']").unwrap(),
            Expr::Path {
                root: "meta".to_string(),
                segments: vec![PathSegment::Key("rate_limit".to_string())],
            }
        );
    }

    #[test]
    fn test_parse_literals() {
        assert_eq!(
            Expr::parse("[\"MIT\", 'APACHE-2.0', 0.5, True, None,]").unwrap(),
            Expr::List(vec![
                Expr::Str("MIT".to_string()),
                Expr::Str("APACHE-2.0".to_string()),
                Expr::Number(0.5),
                Expr::Bool(true),
                Expr::Null,
            ])
        );
        assert_eq!(Expr::parse(".25").unwrap(), Expr::Number(0.25));
        assert_eq!(Expr::parse("'it\\'s'").unwrap(), Expr::Str("it's".to_string()));
    }

    #[test]
    fn test_parse_errors() {
        for bad in [
            "",
            "a ==",
            "(a",
            "a b",
            "len(tags) > 0",
            "'open",
            "a $ b",
            "1.2.3",
            "meta[1]",
            "scores.",
        ] {
            assert!(Expr::parse(bad).is_err(), "{:?} should not parse", bad);
        }
    }

    #[test]
    fn test_parse_nesting_limit() {
        let shallow = format!("{}1{}", "(".repeat(30), ")".repeat(30));
        assert_eq!(Expr::parse(&shallow).unwrap(), Expr::Number(1.0));

        for deep in [
            format!("{}1{}", "(".repeat(10_000), ")".repeat(10_000)),
            format!("{}true", "not ".repeat(10_000)),
            format!("{}1", "-".repeat(10_000)),
            format!("{}1{}", "[".repeat(10_000), "]".repeat(10_000)),
            format!("1{}", " + 1".repeat(10_000)),
            format!("a{}", " or a".repeat(10_000)),
        ] {
            let err = Expr::parse(&deep).unwrap_err();
            assert!(err.message.contains("nested deeper"), "{}", err);
        }
    }

    #[test]
    fn test_parse_error_position() {
        let err = Expr::parse("composite >= 0.8 and and").unwrap_err();
        assert_eq!(err.position, 21);
    }
}
