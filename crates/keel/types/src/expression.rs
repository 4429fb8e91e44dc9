//! Boolean expressions over labels
//!
//! Expressions are used by criteria clauses. Supported syntax:
//!
//! - string literals in single or double quotes, numbers, `true` and `false`
//! - identifiers, resolved against the current label set
//! - comparisons `==`, `!=`, `<`, `<=`, `>`, `>=`
//! - logical `&&`, `||`, `!` and parentheses
//! - `in(value, candidate, ...)`
//!
//! Referring to a label that is not set makes the whole expression evaluate to
//! `false` rather than fail.

use crate::error::{PolicyError, Result};
use dashmap::DashMap;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Parameters an expression is evaluated against
#[derive(Debug, Clone, Default)]
pub struct ExpressionParams {
    pub labels: BTreeMap<String, String>,
}

impl ExpressionParams {
    pub fn new(labels: BTreeMap<String, String>) -> Self {
        Self { labels }
    }
}

/// A compiled expression
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    root: Node,
}

impl Expression {
    /// Compiles an expression string
    pub fn compile(source: &str) -> Result<Self> {
        let tokens = tokenize(source).map_err(|reason| PolicyError::ExpressionCompile {
            expression: source.to_string(),
            reason,
        })?;
        let mut parser = Parser { tokens, pos: 0 };
        let root = parser
            .parse_or()
            .and_then(|node| match parser.peek() {
                None => Ok(node),
                Some(tok) => Err(format!("unexpected token {:?}", tok)),
            })
            .map_err(|reason| PolicyError::ExpressionCompile {
                expression: source.to_string(),
                reason,
            })?;

        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates the expression as a boolean
    pub fn evaluate_bool(&self, params: &ExpressionParams) -> Result<bool> {
        match eval(&self.root, params) {
            Ok(value) => value.as_bool().ok_or_else(|| PolicyError::ExpressionEvaluation {
                expression: self.source.clone(),
                reason: "expression didn't evaluate to boolean".into(),
            }),
            Err(EvalError::Missing(_)) => Ok(false),
            Err(EvalError::Invalid(reason)) => Err(PolicyError::ExpressionEvaluation {
                expression: self.source.clone(),
                reason,
            }),
        }
    }
}

/// Thread-safe cache of compiled expressions
#[derive(Debug, Default)]
pub struct ExpressionCache {
    compiled: DashMap<String, Arc<Expression>>,
}

impl ExpressionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the compiled expression, compiling and caching it on first use
    pub fn get(&self, source: &str) -> Result<Arc<Expression>> {
        if let Some(expr) = self.compiled.get(source) {
            return Ok(expr.clone());
        }
        let expr = Arc::new(Expression::compile(source)?);
        self.compiled.insert(source.to_string(), expr.clone());
        Ok(expr)
    }

    pub fn evaluate_bool(&self, source: &str, params: &ExpressionParams) -> Result<bool> {
        self.get(source)?.evaluate_bool(params)
    }

    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Str(String),
    Num(f64),
    Ident(String),
    LParen,
    RParen,
    Comma,
    Not,
    And,
    Or,
    Cmp(CmpOp),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone)]
enum Node {
    Literal(Value),
    Var(String),
    Not(Box<Node>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Compare(CmpOp, Box<Node>, Box<Node>),
    Call(String, Vec<Node>),
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Str(String),
    Num(f64),
    Bool(bool),
}

impl Value {
    fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Str(s) if s == "true" => Some(true),
            Value::Str(s) if s == "false" => Some(false),
            _ => None,
        }
    }

    fn as_num(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            Value::Str(s) => s.trim().parse().ok(),
            Value::Bool(_) => None,
        }
    }

    fn as_text(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Num(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
        }
    }
}

enum EvalError {
    Missing(String),
    Invalid(String),
}

fn tokenize(input: &str) -> std::result::Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end] != quote {
                    end += 1;
                }
                if end >= chars.len() {
                    return Err("unterminated string literal".into());
                }
                tokens.push(Token::Str(chars[start..end].iter().collect()));
                i = end + 1;
            }
            '&' | '|' => {
                if chars.get(i + 1) != Some(&c) {
                    return Err(format!("unexpected character '{}' at {}", c, i));
                }
                tokens.push(if c == '&' { Token::And } else { Token::Or });
                i += 2;
            }
            '=' => {
                if chars.get(i + 1) != Some(&'=') {
                    return Err(format!("unexpected character '=' at {}", i));
                }
                tokens.push(Token::Cmp(CmpOp::Eq));
                i += 2;
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Cmp(CmpOp::Ne));
                    i += 2;
                } else {
                    tokens.push(Token::Not);
                    i += 1;
                }
            }
            '<' | '>' => {
                let with_eq = chars.get(i + 1) == Some(&'=');
                let op = match (c, with_eq) {
                    ('<', false) => CmpOp::Lt,
                    ('<', true) => CmpOp::Le,
                    ('>', false) => CmpOp::Gt,
                    _ => CmpOp::Ge,
                };
                tokens.push(Token::Cmp(op));
                i += if with_eq { 2 } else { 1 };
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let num = text
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number '{}'", text))?;
                tokens.push(Token::Num(num));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected character '{}' at {}", other, i)),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

type ParseResult = std::result::Result<Node, String>;

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn parse_or(&mut self) -> ParseResult {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Node::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> ParseResult {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Node::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> ParseResult {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Node::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> ParseResult {
        let left = self.parse_primary()?;
        if let Some(Token::Cmp(op)) = self.peek().cloned() {
            self.pos += 1;
            let right = self.parse_primary()?;
            return Ok(Node::Compare(op, Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> ParseResult {
        match self.next() {
            Some(Token::Str(s)) => Ok(Node::Literal(Value::Str(s))),
            Some(Token::Num(n)) => Ok(Node::Literal(Value::Num(n))),
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::RParen) {
                        loop {
                            args.push(self.parse_or()?);
                            match self.next() {
                                Some(Token::Comma) => continue,
                                Some(Token::RParen) => break,
                                other => return Err(format!("expected ',' or ')', got {:?}", other)),
                            }
                        }
                    } else {
                        self.pos += 1;
                    }
                    if name != "in" {
                        return Err(format!("unknown function '{}'", name));
                    }
                    return Ok(Node::Call(name, args));
                }
                match name.as_str() {
                    "true" => Ok(Node::Literal(Value::Bool(true))),
                    "false" => Ok(Node::Literal(Value::Bool(false))),
                    _ => Ok(Node::Var(name)),
                }
            }
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    other => Err(format!("expected ')', got {:?}", other)),
                }
            }
            Some(other) => Err(format!("unexpected token {:?}", other)),
            None => Err("unexpected end of expression".into()),
        }
    }
}

fn eval(node: &Node, params: &ExpressionParams) -> std::result::Result<Value, EvalError> {
    match node {
        Node::Literal(v) => Ok(v.clone()),
        Node::Var(name) => params
            .labels
            .get(name)
            .map(|v| Value::Str(v.clone()))
            .ok_or_else(|| EvalError::Missing(name.clone())),
        Node::Not(inner) => {
            let v = eval_bool(inner, params)?;
            Ok(Value::Bool(!v))
        }
        Node::And(l, r) => {
            if !eval_bool(l, params)? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(eval_bool(r, params)?))
        }
        Node::Or(l, r) => {
            if eval_bool(l, params)? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(eval_bool(r, params)?))
        }
        Node::Compare(op, l, r) => {
            let left = eval(l, params)?;
            let right = eval(r, params)?;
            Ok(Value::Bool(compare(*op, &left, &right)?))
        }
        Node::Call(_, args) => {
            let mut values = args.iter().map(|a| eval(a, params));
            let needle = match values.next() {
                Some(v) => v?,
                None => {
                    return Err(EvalError::Invalid(
                        "can't evaluate in() function when zero arguments supplied".into(),
                    ))
                }
            };
            for candidate in values {
                if compare(CmpOp::Eq, &needle, &candidate?)? {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
    }
}

fn eval_bool(node: &Node, params: &ExpressionParams) -> std::result::Result<bool, EvalError> {
    let value = eval(node, params)?;
    value
        .as_bool()
        .ok_or_else(|| EvalError::Invalid(format!("value {:?} is not a boolean", value)))
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> std::result::Result<bool, EvalError> {
    let ordering = match (left, right) {
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Num(_), _) | (_, Value::Num(_)) => match (left.as_num(), right.as_num()) {
            (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            _ => left.as_text().cmp(&right.as_text()),
        },
        _ => left.as_text().cmp(&right.as_text()),
    };

    Ok(match op {
        CmpOp::Eq => ordering == Ordering::Equal,
        CmpOp::Ne => ordering != Ordering::Equal,
        CmpOp::Lt => ordering == Ordering::Less,
        CmpOp::Le => ordering != Ordering::Greater,
        CmpOp::Gt => ordering == Ordering::Greater,
        CmpOp::Ge => ordering != Ordering::Less,
    })
}
