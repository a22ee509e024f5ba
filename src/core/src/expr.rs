// Copyright 2024 ProtoSim Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A restricted arithmetic expression language for bridge transform formulas
//! (§4.3, §9). The source system evaluates formulas with a generic runtime
//! interpreter; that is a security hazard, so this is a hand-written
//! lexer/parser/AST-walking evaluator supporting only: numeric and string
//! literals, arithmetic (`+ - * / %`), comparisons, boolean operators
//! (`&& || !`), and `data['field']` / `data.field` reads. There is no
//! function call syntax, no assignment, and no loop construct -- the
//! grammar cannot express anything beyond a single value computation.

use crate::value::Value;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ExprError {
    #[error("unexpected character '{0}' at position {1}")]
    UnexpectedChar(char, usize),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("unexpected end of expression")]
    UnexpectedEof,
    #[error("unexpected token: {0}")]
    UnexpectedToken(String),
    #[error("trailing input after expression: {0}")]
    TrailingInput(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Dot,
    LBracket,
    RBracket,
    LParen,
    RParen,
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
    And,
    Or,
    Not,
    True,
    False,
    Null,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    input: &'a str,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Lexer {
            chars: input.char_indices().peekable(),
            input,
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, ExprError> {
        let mut tokens = Vec::new();
        while let Some(&(pos, ch)) = self.chars.peek() {
            if ch.is_whitespace() {
                self.chars.next();
                continue;
            }
            match ch {
                '(' => {
                    self.chars.next();
                    tokens.push(Token::LParen);
                }
                ')' => {
                    self.chars.next();
                    tokens.push(Token::RParen);
                }
                '[' => {
                    self.chars.next();
                    tokens.push(Token::LBracket);
                }
                ']' => {
                    self.chars.next();
                    tokens.push(Token::RBracket);
                }
                '.' => {
                    self.chars.next();
                    tokens.push(Token::Dot);
                }
                '+' => {
                    self.chars.next();
                    tokens.push(Token::Plus);
                }
                '-' => {
                    self.chars.next();
                    tokens.push(Token::Minus);
                }
                '*' => {
                    self.chars.next();
                    tokens.push(Token::Star);
                }
                '/' => {
                    self.chars.next();
                    tokens.push(Token::Slash);
                }
                '%' => {
                    self.chars.next();
                    tokens.push(Token::Percent);
                }
                '!' => {
                    self.chars.next();
                    if self.chars.peek().map(|&(_, c)| c) == Some('=') {
                        self.chars.next();
                        tokens.push(Token::Ne);
                    } else {
                        tokens.push(Token::Not);
                    }
                }
                '=' => {
                    self.chars.next();
                    if self.chars.peek().map(|&(_, c)| c) == Some('=') {
                        self.chars.next();
                        tokens.push(Token::Eq);
                    } else {
                        return Err(ExprError::UnexpectedChar('=', pos));
                    }
                }
                '<' => {
                    self.chars.next();
                    if self.chars.peek().map(|&(_, c)| c) == Some('=') {
                        self.chars.next();
                        tokens.push(Token::Le);
                    } else {
                        tokens.push(Token::Lt);
                    }
                }
                '>' => {
                    self.chars.next();
                    if self.chars.peek().map(|&(_, c)| c) == Some('=') {
                        self.chars.next();
                        tokens.push(Token::Ge);
                    } else {
                        tokens.push(Token::Gt);
                    }
                }
                '&' => {
                    self.chars.next();
                    if self.chars.peek().map(|&(_, c)| c) == Some('&') {
                        self.chars.next();
                        tokens.push(Token::And);
                    } else {
                        return Err(ExprError::UnexpectedChar('&', pos));
                    }
                }
                '|' => {
                    self.chars.next();
                    if self.chars.peek().map(|&(_, c)| c) == Some('|') {
                        self.chars.next();
                        tokens.push(Token::Or);
                    } else {
                        return Err(ExprError::UnexpectedChar('|', pos));
                    }
                }
                '\'' | '"' => {
                    tokens.push(self.read_string(ch)?);
                }
                c if c.is_ascii_digit() => {
                    tokens.push(self.read_number());
                }
                c if c.is_alphabetic() || c == '_' => {
                    tokens.push(self.read_ident());
                }
                c => return Err(ExprError::UnexpectedChar(c, pos)),
            }
        }
        Ok(tokens)
    }

    fn read_string(&mut self, quote: char) -> Result<Token, ExprError> {
        self.chars.next();
        let start = self.chars.peek().map(|&(p, _)| p).unwrap_or(self.input.len());
        let mut end = start;
        loop {
            match self.chars.next() {
                Some((p, c)) if c == quote => {
                    end = p;
                    break;
                }
                Some((p, _)) => end = p + 1,
                None => return Err(ExprError::UnterminatedString),
            }
        }
        Ok(Token::Str(self.input[start..end].to_string()))
    }

    fn read_number(&mut self) -> Token {
        let start = self.chars.peek().map(|&(p, _)| p).unwrap();
        let mut end = start;
        while let Some(&(p, c)) = self.chars.peek() {
            if c.is_ascii_digit() || c == '.' {
                end = p + c.len_utf8();
                self.chars.next();
            } else {
                break;
            }
        }
        Token::Number(self.input[start..end].parse().unwrap_or(0.0))
    }

    fn read_ident(&mut self) -> Token {
        let start = self.chars.peek().map(|&(p, _)| p).unwrap();
        let mut end = start;
        while let Some(&(p, c)) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                end = p + c.len_utf8();
                self.chars.next();
            } else {
                break;
            }
        }
        match &self.input[start..end] {
            "true" => Token::True,
            "false" => Token::False,
            "null" => Token::Null,
            ident => Token::Ident(ident.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
enum Ast {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    Field(Vec<FieldAccess>),
    UnaryNot(Box<Ast>),
    UnaryNeg(Box<Ast>),
    Binary(Box<Ast>, BinOp, Box<Ast>),
}

#[derive(Debug, Clone)]
enum FieldAccess {
    Root(String),
    Dot(String),
    Index(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn parse_expr(&mut self) -> Result<Ast, ExprError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Ast, ExprError> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Ast::Binary(Box::new(lhs), BinOp::Or, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Ast, ExprError> {
        let mut lhs = self.parse_comparison()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.advance();
            let rhs = self.parse_comparison()?;
            lhs = Ast::Binary(Box::new(lhs), BinOp::And, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Ast, ExprError> {
        let lhs = self.parse_additive()?;
        let op = match self.peek() {
            Some(Token::Eq) => Some(BinOp::Eq),
            Some(Token::Ne) => Some(BinOp::Ne),
            Some(Token::Lt) => Some(BinOp::Lt),
            Some(Token::Le) => Some(BinOp::Le),
            Some(Token::Gt) => Some(BinOp::Gt),
            Some(Token::Ge) => Some(BinOp::Ge),
            _ => None,
        };
        match op {
            Some(op) => {
                self.advance();
                let rhs = self.parse_additive()?;
                Ok(Ast::Binary(Box::new(lhs), op, Box::new(rhs)))
            }
            None => Ok(lhs),
        }
    }

    fn parse_additive(&mut self) -> Result<Ast, ExprError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Ast::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Ast, ExprError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Ast::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Ast, ExprError> {
        match self.peek() {
            Some(Token::Not) => {
                self.advance();
                Ok(Ast::UnaryNot(Box::new(self.parse_unary()?)))
            }
            Some(Token::Minus) => {
                self.advance();
                Ok(Ast::UnaryNeg(Box::new(self.parse_unary()?)))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Ast, ExprError> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Ast::Number(n)),
            Some(Token::Str(s)) => Ok(Ast::Str(s)),
            Some(Token::True) => Ok(Ast::Bool(true)),
            Some(Token::False) => Ok(Ast::Bool(false)),
            Some(Token::Null) => Ok(Ast::Null),
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    other => Err(ExprError::UnexpectedToken(format!("{other:?}"))),
                }
            }
            Some(Token::Ident(name)) => self.parse_field_tail(name),
            other => Err(ExprError::UnexpectedToken(format!("{other:?}"))),
        }
    }

    fn parse_field_tail(&mut self, root: String) -> Result<Ast, ExprError> {
        let mut accesses = vec![FieldAccess::Root(root)];
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.advance();
                    match self.advance() {
                        Some(Token::Ident(field)) => accesses.push(FieldAccess::Dot(field)),
                        other => return Err(ExprError::UnexpectedToken(format!("{other:?}"))),
                    }
                }
                Some(Token::LBracket) => {
                    self.advance();
                    let field = match self.advance() {
                        Some(Token::Str(s)) => s,
                        other => return Err(ExprError::UnexpectedToken(format!("{other:?}"))),
                    };
                    match self.advance() {
                        Some(Token::RBracket) => accesses.push(FieldAccess::Index(field)),
                        other => return Err(ExprError::UnexpectedToken(format!("{other:?}"))),
                    }
                }
                _ => break,
            }
        }
        Ok(Ast::Field(accesses))
    }
}

fn parse(input: &str) -> Result<Ast, ExprError> {
    let tokens = Lexer::new(input).tokenize()?;
    let mut parser = Parser::new(tokens);
    let ast = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        let remaining: Vec<String> = parser.tokens[parser.pos..]
            .iter()
            .map(|t| format!("{t:?}"))
            .collect();
        return Err(ExprError::TrailingInput(remaining.join(" ")));
    }
    Ok(ast)
}

/// Evaluate `expr` with `data` bound as the root identifier. Field accesses
/// on identifiers other than `data` resolve against `root` too (so `value`
/// and `data.value` both read from `root` when `root` is itself the payload
/// map) -- this matches the common usage in the seed scenario where
/// `expression: "data['value'] * 0.001"` addresses the payload by name.
pub fn evaluate(expr: &str, root: &Value) -> Result<Value, ExprError> {
    let ast = parse(expr)?;
    eval_ast(&ast, root)
}

fn eval_ast(ast: &Ast, root: &Value) -> Result<Value, ExprError> {
    match ast {
        Ast::Number(n) => {
            if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
                Ok(Value::Int(*n as i64))
            } else {
                Ok(Value::Float(*n))
            }
        }
        Ast::Str(s) => Ok(Value::String(s.clone())),
        Ast::Bool(b) => Ok(Value::Bool(*b)),
        Ast::Null => Ok(Value::Null),
        Ast::Field(accesses) => Ok(resolve_field(accesses, root)),
        Ast::UnaryNot(inner) => {
            let v = eval_ast(inner, root)?;
            Ok(Value::Bool(!v.as_bool().unwrap_or(false)))
        }
        Ast::UnaryNeg(inner) => {
            let v = eval_ast(inner, root)?;
            match v {
                Value::Int(i) => Ok(Value::Int(-i)),
                other => Ok(Value::Float(-other.as_f64().unwrap_or(0.0))),
            }
        }
        Ast::Binary(lhs, op, rhs) => {
            let l = eval_ast(lhs, root)?;
            let r = eval_ast(rhs, root)?;
            Ok(eval_binop(*op, &l, &r))
        }
    }
}

fn resolve_field(accesses: &[FieldAccess], root: &Value) -> Value {
    let mut current: Option<&Value> = Some(root);
    for (i, access) in accesses.iter().enumerate() {
        match access {
            FieldAccess::Root(name) => {
                if i == 0 {
                    // `data` (or any other root identifier) binds the whole
                    // payload; subsequent accesses index into it.
                    let _ = name;
                    current = Some(root);
                }
            }
            FieldAccess::Dot(field) | FieldAccess::Index(field) => {
                current = current.and_then(|v| v.get_path(field));
            }
        }
    }
    current.cloned().unwrap_or(Value::Null)
}

fn eval_binop(op: BinOp, l: &Value, r: &Value) -> Value {
    use BinOp::*;
    match op {
        Add => match (l, r) {
            (Value::String(a), _) => Value::String(format!("{a}{}", r.to_display_string())),
            (Value::Int(a), Value::Int(b)) => Value::Int(a + b),
            _ => Value::Float(l.as_f64().unwrap_or(0.0) + r.as_f64().unwrap_or(0.0)),
        },
        Sub => numeric_binop(l, r, |a, b| a - b, |a, b| a - b),
        Mul => numeric_binop(l, r, |a, b| a * b, |a, b| a * b),
        Div => Value::Float(l.as_f64().unwrap_or(0.0) / r.as_f64().unwrap_or(1.0)),
        Mod => match (l.as_i64(), r.as_i64()) {
            (Some(a), Some(b)) if b != 0 => Value::Int(a % b),
            _ => Value::Null,
        },
        Eq => Value::Bool(values_equal(l, r)),
        Ne => Value::Bool(!values_equal(l, r)),
        Lt => Value::Bool(l.as_f64().unwrap_or(f64::NAN) < r.as_f64().unwrap_or(f64::NAN)),
        Le => Value::Bool(l.as_f64().unwrap_or(f64::NAN) <= r.as_f64().unwrap_or(f64::NAN)),
        Gt => Value::Bool(l.as_f64().unwrap_or(f64::NAN) > r.as_f64().unwrap_or(f64::NAN)),
        Ge => Value::Bool(l.as_f64().unwrap_or(f64::NAN) >= r.as_f64().unwrap_or(f64::NAN)),
        And => Value::Bool(l.as_bool().unwrap_or(false) && r.as_bool().unwrap_or(false)),
        Or => Value::Bool(l.as_bool().unwrap_or(false) || r.as_bool().unwrap_or(false)),
    }
}

fn numeric_binop(l: &Value, r: &Value, int_op: fn(i64, i64) -> i64, float_op: fn(f64, f64) -> f64) -> Value {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => Value::Int(int_op(*a, *b)),
        _ => Value::Float(float_op(l.as_f64().unwrap_or(0.0), r.as_f64().unwrap_or(0.0))),
    }
}

fn values_equal(l: &Value, r: &Value) -> bool {
    if let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) {
        if !matches!(l, Value::String(_)) && !matches!(r, Value::String(_)) {
            return a == b;
        }
    }
    l.to_display_string() == r.to_display_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sample_root() -> Value {
        let mut data = BTreeMap::new();
        data.insert("value".to_string(), Value::Int(1000));
        data.insert("address".to_string(), Value::Int(4));
        Value::Map(data)
    }

    #[test]
    fn evaluates_index_access_and_multiplication() {
        let root = sample_root();
        let result = evaluate("data['value'] * 0.001", &root).unwrap();
        assert_eq!(result, Value::Float(1.0));
    }

    #[test]
    fn evaluates_dot_access() {
        let root = sample_root();
        let result = evaluate("data.value", &root).unwrap();
        assert_eq!(result, Value::Int(1000));
    }

    #[test]
    fn evaluates_comparisons_and_booleans() {
        let root = sample_root();
        let result = evaluate("data.value > 500 && data.address < 10", &root).unwrap();
        assert_eq!(result, Value::Bool(true));
    }

    #[test]
    fn rejects_function_call_syntax() {
        let root = sample_root();
        let err = evaluate("eval(data.value)", &root);
        assert!(err.is_err());
    }

    #[test]
    fn is_deterministic_for_identical_input() {
        let root = sample_root();
        let a = evaluate("data.value * 0.001 + 1", &root).unwrap();
        let b = evaluate("data.value * 0.001 + 1", &root).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_trailing_garbage() {
        let root = sample_root();
        assert!(evaluate("1 + 1 2", &root).is_err());
    }
}
