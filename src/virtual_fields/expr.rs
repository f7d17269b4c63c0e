//! Virtual-field expression language
//!
//! A small, side-effect-free language over a document's field values.
//!
//! ```text
//! amount + amount * tax_rate / 100
//! if(status == "Paid", 0, round(amount - paid, 2))
//! concat(upper(first_name), " ", last_name)
//! ```
//!
//! Precedence, lowest to highest:
//!
//! ```text
//! or
//! and
//! not (prefix)
//! == = != <>
//! < <= > >=
//! + -
//! * / %
//! - + (unary prefix)
//! ```
//!
//! Numbers are arbitrary-precision decimals. A missing field or `null`
//! counts as 0 in arithmetic, as "" in `concat`, and as false in a
//! condition. `doc.amount` and `amount` name the same field.

use std::cmp::Ordering;
use std::fmt;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::Value;
use thiserror::Error;

use crate::value::{decimal_to_value, parse_decimal};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    #[error("parse error at {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("{function}() takes {expected} argument(s), got {got}")]
    Arity {
        function: String,
        expected: &'static str,
        got: usize,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("type error: {0}")]
    Type(String),
}

impl ExprError {
    fn parse(position: usize, message: impl Into<String>) -> Self {
        ExprError::Parse {
            position,
            message: message.into(),
        }
    }
}

pub type ExprResult<T> = Result<T, ExprError>;

// ── Tokens ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Number(Decimal),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    And,
    Or,
    Not,
    LeftParen,
    RightParen,
    Comma,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Eof,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    position: usize,
}

fn tokenize(source: &str) -> ExprResult<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let following = chars.get(i + 1).copied();
        let two = |next: char| following == Some(next);
        let (kind, width) = match c {
            '(' => (TokenKind::LeftParen, 1),
            ')' => (TokenKind::RightParen, 1),
            ',' => (TokenKind::Comma, 1),
            '+' => (TokenKind::Plus, 1),
            '-' => (TokenKind::Minus, 1),
            '*' => (TokenKind::Star, 1),
            '/' => (TokenKind::Slash, 1),
            '%' => (TokenKind::Percent, 1),
            '=' if two('=') => (TokenKind::Eq, 2),
            '=' => (TokenKind::Eq, 1),
            '!' if two('=') => (TokenKind::Ne, 2),
            '<' if two('=') => (TokenKind::Le, 2),
            '<' if two('>') => (TokenKind::Ne, 2),
            '<' => (TokenKind::Lt, 1),
            '>' if two('=') => (TokenKind::Ge, 2),
            '>' => (TokenKind::Gt, 1),
            '"' | '\'' => {
                let (text, end) = lex_string(&chars, i)?;
                tokens.push(Token {
                    kind: TokenKind::Str(text),
                    position: start,
                });
                i = end;
                continue;
            }
            c if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) => {
                let mut end = i;
                while end < chars.len() && (chars[end].is_ascii_digit() || chars[end] == '.') {
                    end += 1;
                }
                let text: String = chars[i..end].iter().collect();
                let number = parse_decimal(&text)
                    .ok_or_else(|| ExprError::parse(start, format!("invalid number '{}'", text)))?;
                tokens.push(Token {
                    kind: TokenKind::Number(number),
                    position: start,
                });
                i = end;
                continue;
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut end = i;
                while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_' || chars[end] == '.') {
                    end += 1;
                }
                let word: String = chars[i..end].iter().collect();
                let kind = match word.to_ascii_lowercase().as_str() {
                    "true" => TokenKind::True,
                    "false" => TokenKind::False,
                    "null" | "none" => TokenKind::Null,
                    "and" => TokenKind::And,
                    "or" => TokenKind::Or,
                    "not" => TokenKind::Not,
                    _ => TokenKind::Ident(word.strip_prefix("doc.").unwrap_or(&word).to_string()),
                };
                tokens.push(Token { kind, position: start });
                i = end;
                continue;
            }
            other => {
                return Err(ExprError::parse(start, format!("unexpected character '{}'", other)));
            }
        };

        tokens.push(Token { kind, position: start });
        i += width;
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        position: chars.len(),
    });
    Ok(tokens)
}

fn lex_string(chars: &[char], open: usize) -> ExprResult<(String, usize)> {
    let quote = chars[open];
    let mut out = String::new();
    let mut i = open + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() => {
                out.push(match chars[i + 1] {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
                i += 2;
            }
            c if c == quote => return Ok((out, i + 1)),
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Err(ExprError::parse(open, "unterminated string"))
}

// ── AST ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Plus,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Scalar),
    Field(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

// Binding powers: higher binds tighter.
mod bp {
    pub const OR: (u8, u8) = (1, 2);
    pub const AND: (u8, u8) = (3, 4);
    pub const NOT_PREFIX: u8 = 5;
    pub const EQUALITY: (u8, u8) = (7, 8);
    pub const COMPARISON: (u8, u8) = (9, 10);
    pub const ADD: (u8, u8) = (11, 12);
    pub const MUL: (u8, u8) = (13, 14);
    pub const UNARY: u8 = 15;
}

/// Deepest nesting of parentheses, calls and prefix operators accepted.
pub const MAX_DEPTH: usize = 64;

/// Longest token stream accepted; bounds left-leaning operator chains.
pub const MAX_TOKENS: usize = 4096;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if tok.kind != TokenKind::Eof {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> ExprResult<()> {
        let tok = self.advance();
        if tok.kind == kind {
            Ok(())
        } else {
            Err(ExprError::parse(tok.position, format!("expected {}, got {:?}", what, tok.kind)))
        }
    }

    fn parse_expr_bp(&mut self, min_bp: u8) -> ExprResult<Expr> {
        if self.depth >= MAX_DEPTH {
            let position = self.peek().position;
            return Err(ExprError::parse(
                position,
                format!("expression nests deeper than {}", MAX_DEPTH),
            ));
        }
        self.depth += 1;
        let parsed = self.parse_infix(min_bp);
        self.depth -= 1;
        parsed
    }

    fn parse_infix(&mut self, min_bp: u8) -> ExprResult<Expr> {
        let mut lhs = self.parse_prefix()?;

        loop {
            let Some((op, (l_bp, r_bp))) = infix_bp(&self.peek().kind) else {
                break;
            };
            if l_bp < min_bp {
                break;
            }
            self.advance();
            let rhs = self.parse_expr_bp(r_bp)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }

        Ok(lhs)
    }

    fn parse_prefix(&mut self) -> ExprResult<Expr> {
        let tok = self.advance();
        match tok.kind {
            TokenKind::Number(n) => Ok(Expr::Literal(Scalar::Number(n))),
            TokenKind::Str(s) => Ok(Expr::Literal(Scalar::Text(s))),
            TokenKind::True => Ok(Expr::Literal(Scalar::Bool(true))),
            TokenKind::False => Ok(Expr::Literal(Scalar::Bool(false))),
            TokenKind::Null => Ok(Expr::Literal(Scalar::Null)),
            TokenKind::Minus => Ok(Expr::Unary(UnaryOp::Negate, Box::new(self.parse_expr_bp(bp::UNARY)?))),
            TokenKind::Plus => Ok(Expr::Unary(UnaryOp::Plus, Box::new(self.parse_expr_bp(bp::UNARY)?))),
            TokenKind::Not => Ok(Expr::Unary(UnaryOp::Not, Box::new(self.parse_expr_bp(bp::NOT_PREFIX)?))),
            TokenKind::LeftParen => {
                let inner = self.parse_expr_bp(0)?;
                self.expect(TokenKind::RightParen, "')'")?;
                Ok(inner)
            }
            TokenKind::Ident(name) => {
                if self.peek().kind != TokenKind::LeftParen {
                    return Ok(Expr::Field(name));
                }
                self.advance();
                let mut args = Vec::new();
                if self.peek().kind != TokenKind::RightParen {
                    loop {
                        args.push(self.parse_expr_bp(0)?);
                        if self.peek().kind == TokenKind::Comma {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::RightParen, "')'")?;
                let name = name.to_ascii_lowercase();
                check_arity(&name, args.len())?;
                Ok(Expr::Call(name, args))
            }
            other => Err(ExprError::parse(tok.position, format!("unexpected token {:?}", other))),
        }
    }
}

fn infix_bp(kind: &TokenKind) -> Option<(BinaryOp, (u8, u8))> {
    let entry = match kind {
        TokenKind::Or => (BinaryOp::Or, bp::OR),
        TokenKind::And => (BinaryOp::And, bp::AND),
        TokenKind::Eq => (BinaryOp::Eq, bp::EQUALITY),
        TokenKind::Ne => (BinaryOp::Ne, bp::EQUALITY),
        TokenKind::Lt => (BinaryOp::Lt, bp::COMPARISON),
        TokenKind::Le => (BinaryOp::Le, bp::COMPARISON),
        TokenKind::Gt => (BinaryOp::Gt, bp::COMPARISON),
        TokenKind::Ge => (BinaryOp::Ge, bp::COMPARISON),
        TokenKind::Plus => (BinaryOp::Add, bp::ADD),
        TokenKind::Minus => (BinaryOp::Sub, bp::ADD),
        TokenKind::Star => (BinaryOp::Mul, bp::MUL),
        TokenKind::Slash => (BinaryOp::Div, bp::MUL),
        TokenKind::Percent => (BinaryOp::Rem, bp::MUL),
        _ => return None,
    };
    Some(entry)
}

fn check_arity(function: &str, got: usize) -> ExprResult<()> {
    let (ok, expected) = match function {
        "if" => (got == 3, "3"),
        "round" => ((1..=2).contains(&got), "1 or 2"),
        "abs" | "len" | "upper" | "lower" => (got == 1, "1"),
        "min" | "max" | "coalesce" | "concat" => (got >= 1, "at least 1"),
        _ => return Err(ExprError::UnknownFunction(function.to_string())),
    };
    if ok {
        Ok(())
    } else {
        Err(ExprError::Arity {
            function: function.to_string(),
            expected,
            got,
        })
    }
}

/// Parses an expression.
pub fn parse(source: &str) -> ExprResult<Expr> {
    let tokens = tokenize(source)?;
    if tokens.len() > MAX_TOKENS {
        return Err(ExprError::parse(
            0,
            format!("expression has more than {} tokens", MAX_TOKENS),
        ));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_expr_bp(0)?;
    let tail = parser.peek();
    if tail.kind != TokenKind::Eof {
        return Err(ExprError::parse(tail.position, format!("unexpected {:?}", tail.kind)));
    }
    Ok(expr)
}

// ── Evaluation ──────────────────────────────────────────────────────────

/// Runtime value of an expression
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(Decimal),
    Text(String),
}

impl Scalar {
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Scalar::Null,
            Value::Bool(b) => Scalar::Bool(*b),
            Value::Number(_) => crate::value::decimal_from_value(value)
                .map(Scalar::Number)
                .unwrap_or(Scalar::Null),
            Value::String(s) => Scalar::Text(s.clone()),
            other => Scalar::Text(other.to_string()),
        }
    }

    pub fn into_json(self) -> Value {
        match self {
            Scalar::Null => Value::Null,
            Scalar::Bool(b) => Value::Bool(b),
            Scalar::Number(n) => decimal_to_value(n),
            Scalar::Text(s) => Value::String(s),
        }
    }

    fn truthy(&self) -> bool {
        match self {
            Scalar::Null => false,
            Scalar::Bool(b) => *b,
            Scalar::Number(n) => !n.is_zero(),
            Scalar::Text(s) => !s.is_empty(),
        }
    }

    // Null reads as 0; numeric text is accepted
    fn number(&self) -> Option<Decimal> {
        match self {
            Scalar::Null => Some(Decimal::ZERO),
            Scalar::Bool(b) => Some(if *b { Decimal::ONE } else { Decimal::ZERO }),
            Scalar::Number(n) => Some(*n),
            Scalar::Text(s) => parse_decimal(s.trim()),
        }
    }

    fn expect_number(&self, context: &str) -> ExprResult<Decimal> {
        self.number()
            .ok_or_else(|| ExprError::Type(format!("{} expects a number, got {}", context, self)))
    }

    fn text(&self) -> String {
        match self {
            Scalar::Null => String::new(),
            Scalar::Text(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "null"),
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Number(n) => write!(f, "{}", n.normalize()),
            Scalar::Text(s) => write!(f, "\"{}\"", s),
        }
    }
}

impl Expr {
    /// Field names the expression reads
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Field(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Expr::Unary(_, inner) => inner.collect_fields(out),
            Expr::Binary(_, l, r) => {
                l.collect_fields(out);
                r.collect_fields(out);
            }
            Expr::Call(_, args) => args.iter().for_each(|a| a.collect_fields(out)),
            Expr::Literal(_) => {}
        }
    }

    /// Evaluates against `lookup`, which returns a field's current value.
    pub fn eval(&self, lookup: &dyn Fn(&str) -> Option<Value>) -> ExprResult<Scalar> {
        match self {
            Expr::Literal(s) => Ok(s.clone()),
            Expr::Field(name) => Ok(lookup(name).map(|v| Scalar::from_json(&v)).unwrap_or(Scalar::Null)),
            Expr::Unary(op, inner) => {
                let v = inner.eval(lookup)?;
                match op {
                    UnaryOp::Not => Ok(Scalar::Bool(!v.truthy())),
                    UnaryOp::Plus => Ok(Scalar::Number(v.expect_number("unary +")?)),
                    UnaryOp::Negate => Ok(Scalar::Number(-v.expect_number("unary -")?)),
                }
            }
            Expr::Binary(BinaryOp::And, l, r) => {
                Ok(Scalar::Bool(l.eval(lookup)?.truthy() && r.eval(lookup)?.truthy()))
            }
            Expr::Binary(BinaryOp::Or, l, r) => {
                Ok(Scalar::Bool(l.eval(lookup)?.truthy() || r.eval(lookup)?.truthy()))
            }
            Expr::Binary(op, l, r) => binary(*op, l.eval(lookup)?, r.eval(lookup)?),
            Expr::Call(name, args) => call(name, args, lookup),
        }
    }
}

fn binary(op: BinaryOp, l: Scalar, r: Scalar) -> ExprResult<Scalar> {
    match op {
        BinaryOp::Add => {
            // Text that is not a number concatenates
            if let (Some(a), Some(b)) = (l.number(), r.number()) {
                return add(a, b);
            }
            Ok(Scalar::Text(l.text() + &r.text()))
        }
        BinaryOp::Sub => {
            let (a, b) = (l.expect_number("-")?, r.expect_number("-")?);
            a.checked_sub(b)
                .map(Scalar::Number)
                .ok_or_else(|| ExprError::Type("numeric overflow".into()))
        }
        BinaryOp::Mul => {
            let (a, b) = (l.expect_number("*")?, r.expect_number("*")?);
            a.checked_mul(b)
                .map(Scalar::Number)
                .ok_or_else(|| ExprError::Type("numeric overflow".into()))
        }
        BinaryOp::Div | BinaryOp::Rem => {
            let (a, b) = (l.expect_number("/")?, r.expect_number("/")?);
            if b.is_zero() {
                return Err(ExprError::DivisionByZero);
            }
            let result = if op == BinaryOp::Div {
                a.checked_div(b)
            } else {
                a.checked_rem(b)
            };
            result
                .map(Scalar::Number)
                .ok_or_else(|| ExprError::Type("numeric overflow".into()))
        }
        BinaryOp::Eq => Ok(Scalar::Bool(compare(&l, &r) == Ordering::Equal)),
        BinaryOp::Ne => Ok(Scalar::Bool(compare(&l, &r) != Ordering::Equal)),
        BinaryOp::Lt => Ok(Scalar::Bool(compare(&l, &r) == Ordering::Less)),
        BinaryOp::Le => Ok(Scalar::Bool(compare(&l, &r) != Ordering::Greater)),
        BinaryOp::Gt => Ok(Scalar::Bool(compare(&l, &r) == Ordering::Greater)),
        BinaryOp::Ge => Ok(Scalar::Bool(compare(&l, &r) != Ordering::Less)),
        BinaryOp::And => Ok(Scalar::Bool(l.truthy() && r.truthy())),
        BinaryOp::Or => Ok(Scalar::Bool(l.truthy() || r.truthy())),
    }
}

fn add(a: Decimal, b: Decimal) -> ExprResult<Scalar> {
    a.checked_add(b)
        .map(Scalar::Number)
        .ok_or_else(|| ExprError::Type("numeric overflow".into()))
}

// Numbers compare numerically, null equals only null and empty text
fn compare(l: &Scalar, r: &Scalar) -> Ordering {
    match (l, r) {
        (Scalar::Null, Scalar::Null) => Ordering::Equal,
        (Scalar::Null, Scalar::Text(s)) | (Scalar::Text(s), Scalar::Null) if s.is_empty() => Ordering::Equal,
        (Scalar::Null, _) => Ordering::Less,
        (_, Scalar::Null) => Ordering::Greater,
        (Scalar::Text(a), Scalar::Text(b)) => a.cmp(b),
        _ => match (l.number(), r.number()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => l.text().cmp(&r.text()),
        },
    }
}

fn call(name: &str, args: &[Expr], lookup: &dyn Fn(&str) -> Option<Value>) -> ExprResult<Scalar> {
    if name == "if" {
        return if args[0].eval(lookup)?.truthy() {
            args[1].eval(lookup)
        } else {
            args[2].eval(lookup)
        };
    }

    let values = args
        .iter()
        .map(|a| a.eval(lookup))
        .collect::<ExprResult<Vec<_>>>()?;

    match name {
        "round" => {
            let n = values[0].expect_number("round()")?;
            let places = match values.get(1) {
                Some(p) => {
                    let p = p.expect_number("round()")?;
                    p.trunc()
                        .to_u32()
                        .ok_or_else(|| ExprError::Type(format!("round() places must be 0 or more, got {}", p)))?
                }
                None => 0,
            };
            Ok(Scalar::Number(
                n.round_dp_with_strategy(places, RoundingStrategy::MidpointAwayFromZero),
            ))
        }
        "abs" => Ok(Scalar::Number(values[0].expect_number("abs()")?.abs())),
        "min" | "max" => {
            let mut best = values[0].expect_number(name)?;
            for v in &values[1..] {
                let n = v.expect_number(name)?;
                best = if name == "min" { best.min(n) } else { best.max(n) };
            }
            Ok(Scalar::Number(best))
        }
        "coalesce" => Ok(values
            .into_iter()
            .find(|v| !matches!(v, Scalar::Null) && *v != Scalar::Text(String::new()))
            .unwrap_or(Scalar::Null)),
        "concat" => Ok(Scalar::Text(values.iter().map(Scalar::text).collect())),
        "len" => Ok(Scalar::Number(Decimal::from(values[0].text().chars().count() as u64))),
        "upper" => Ok(Scalar::Text(values[0].text().to_uppercase())),
        "lower" => Ok(Scalar::Text(values[0].text().to_lowercase())),
        other => Err(ExprError::UnknownFunction(other.to_string())),
    }
}
