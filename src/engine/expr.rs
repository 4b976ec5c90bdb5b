//! Restricted expression interpreter for `custom` conditions.
//!
//! Rule authors are untrusted, so their expressions run against an
//! enumerable capability surface: four named bindings (`event`, `data`,
//! `projectScope`, `timestamp`), three helpers (`includes`, `matches`,
//! `length`), boolean/comparison operators, and literals. Nothing else
//! resolves. There is no ambient state, no filesystem, no host callouts.
//!
//! Grammar (recursive descent, no precedence surprises):
//!
//! ```text
//! expr    := or
//! or      := and ("||" and)*
//! and     := unary ("&&" unary)*
//! unary   := "!" unary | cmp
//! cmp     := primary (("==" | "!=" | "<" | "<=" | ">" | ">=") primary)?
//! primary := string | number | "true" | "false" | "null"
//!          | helper "(" expr ("," expr)* ")"
//!          | ident ("." ident)*
//!          | "(" expr ")"
//! ```

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExprError {
    #[error("lex error: {0}")]
    Lex(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("eval error: {0}")]
    Eval(String),
}

/// The fixed variable set an expression may read.
#[derive(Debug, Clone)]
pub struct Bindings {
    pub event: String,
    pub data: Value,
    pub project_scope: String,
    pub timestamp: String,
}

/// Evaluate an expression to a boolean. Any failure is an `Err`; the
/// condition layer maps errors to `false` so broken expressions fail closed.
pub fn eval_bool(code: &str, bindings: &Bindings) -> Result<bool, ExprError> {
    let tokens = lex(code)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr()?;
    parser.expect_end()?;
    Ok(truthy(&eval(&expr, bindings)?))
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    True,
    False,
    Null,
    AndAnd,
    OrOr,
    Not,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    LParen,
    RParen,
    Comma,
    Dot,
}

fn lex(input: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\r' | '\n' => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            '&' => {
                chars.next();
                if chars.next_if_eq(&'&').is_some() {
                    tokens.push(Token::AndAnd);
                } else {
                    return Err(ExprError::Lex("single '&' is not an operator".into()));
                }
            }
            '|' => {
                chars.next();
                if chars.next_if_eq(&'|').is_some() {
                    tokens.push(Token::OrOr);
                } else {
                    return Err(ExprError::Lex("single '|' is not an operator".into()));
                }
            }
            '!' => {
                chars.next();
                if chars.next_if_eq(&'=').is_some() {
                    tokens.push(Token::NotEq);
                } else {
                    tokens.push(Token::Not);
                }
            }
            '=' => {
                chars.next();
                if chars.next_if_eq(&'=').is_some() {
                    tokens.push(Token::EqEq);
                } else {
                    return Err(ExprError::Lex("assignment is not supported".into()));
                }
            }
            '<' => {
                chars.next();
                if chars.next_if_eq(&'=').is_some() {
                    tokens.push(Token::Le);
                } else {
                    tokens.push(Token::Lt);
                }
            }
            '>' => {
                chars.next();
                if chars.next_if_eq(&'=').is_some() {
                    tokens.push(Token::Ge);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if ch == quote => break,
                        Some('\\') => match chars.next() {
                            Some('n') => s.push('\n'),
                            Some('t') => s.push('\t'),
                            Some(other) => s.push(other),
                            None => {
                                return Err(ExprError::Lex("unterminated escape".into()))
                            }
                        },
                        Some(ch) => s.push(ch),
                        None => return Err(ExprError::Lex("unterminated string".into())),
                    }
                }
                tokens.push(Token::Str(s));
            }
            '0'..='9' => {
                let mut s = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        s.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n: f64 = s
                    .parse()
                    .map_err(|_| ExprError::Lex(format!("bad number: {s}")))?;
                tokens.push(Token::Num(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut s = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' {
                        s.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(match s.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(s),
                });
            }
            other => return Err(ExprError::Lex(format!("unexpected character '{other}'"))),
        }
    }

    Ok(tokens)
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

#[derive(Debug, Clone, Copy, PartialEq)]
enum Helper {
    Includes,
    Matches,
    Length,
}

#[derive(Debug, Clone)]
enum Expr {
    Str(String),
    Num(f64),
    Bool(bool),
    Null,
    Var(Vec<String>),
    Call(Helper, Vec<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, tok: &Token) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Token) -> Result<(), ExprError> {
        if self.eat(&tok) {
            Ok(())
        } else {
            Err(ExprError::Parse(format!(
                "expected {tok:?}, found {:?}",
                self.peek()
            )))
        }
    }

    fn expect_end(&self) -> Result<(), ExprError> {
        match self.peek() {
            None => Ok(()),
            Some(t) => Err(ExprError::Parse(format!("trailing token {t:?}"))),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, ExprError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::OrOr) {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_unary()?;
        while self.eat(&Token::AndAnd) {
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        if self.eat(&Token::Not) {
            Ok(Expr::Not(Box::new(self.parse_unary()?)))
        } else {
            self.parse_cmp()
        }
    }

    fn parse_cmp(&mut self) -> Result<Expr, ExprError> {
        let left = self.parse_primary()?;
        let op = match self.peek() {
            Some(Token::EqEq) => CmpOp::Eq,
            Some(Token::NotEq) => CmpOp::Ne,
            Some(Token::Lt) => CmpOp::Lt,
            Some(Token::Le) => CmpOp::Le,
            Some(Token::Gt) => CmpOp::Gt,
            Some(Token::Ge) => CmpOp::Ge,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.parse_primary()?;
        Ok(Expr::Cmp(op, Box::new(left), Box::new(right)))
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::Num(n)) => Ok(Expr::Num(n)),
            Some(Token::True) => Ok(Expr::Bool(true)),
            Some(Token::False) => Ok(Expr::Bool(false)),
            Some(Token::Null) => Ok(Expr::Null),
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    let helper = match name.as_str() {
                        "includes" => Helper::Includes,
                        "matches" => Helper::Matches,
                        "length" => Helper::Length,
                        other => {
                            return Err(ExprError::Parse(format!(
                                "unknown function '{other}'"
                            )))
                        }
                    };
                    self.pos += 1; // consume '('
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if !self.eat(&Token::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(Token::RParen)?;
                    Ok(Expr::Call(helper, args))
                } else {
                    let mut path = vec![name];
                    while self.eat(&Token::Dot) {
                        match self.next() {
                            Some(Token::Ident(part)) => path.push(part),
                            other => {
                                return Err(ExprError::Parse(format!(
                                    "expected field name after '.', found {other:?}"
                                )))
                            }
                        }
                    }
                    Ok(Expr::Var(path))
                }
            }
            other => Err(ExprError::Parse(format!("unexpected token {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ExprValue {
    Str(String),
    Num(f64),
    Bool(bool),
    Json(Value),
    Null,
}

fn truthy(v: &ExprValue) -> bool {
    match v {
        ExprValue::Bool(b) => *b,
        ExprValue::Num(n) => *n != 0.0,
        ExprValue::Str(s) => !s.is_empty(),
        ExprValue::Null => false,
        ExprValue::Json(j) => !j.is_null(),
    }
}

fn from_json(v: &Value) -> ExprValue {
    match v {
        Value::Null => ExprValue::Null,
        Value::Bool(b) => ExprValue::Bool(*b),
        Value::Number(n) => ExprValue::Num(n.as_f64().unwrap_or(0.0)),
        Value::String(s) => ExprValue::Str(s.clone()),
        other => ExprValue::Json(other.clone()),
    }
}

fn eval(expr: &Expr, bindings: &Bindings) -> Result<ExprValue, ExprError> {
    match expr {
        Expr::Str(s) => Ok(ExprValue::Str(s.clone())),
        Expr::Num(n) => Ok(ExprValue::Num(*n)),
        Expr::Bool(b) => Ok(ExprValue::Bool(*b)),
        Expr::Null => Ok(ExprValue::Null),
        Expr::Not(inner) => Ok(ExprValue::Bool(!truthy(&eval(inner, bindings)?))),
        Expr::And(l, r) => {
            if !truthy(&eval(l, bindings)?) {
                return Ok(ExprValue::Bool(false));
            }
            Ok(ExprValue::Bool(truthy(&eval(r, bindings)?)))
        }
        Expr::Or(l, r) => {
            if truthy(&eval(l, bindings)?) {
                return Ok(ExprValue::Bool(true));
            }
            Ok(ExprValue::Bool(truthy(&eval(r, bindings)?)))
        }
        Expr::Cmp(op, l, r) => {
            let lv = eval(l, bindings)?;
            let rv = eval(r, bindings)?;
            eval_cmp(*op, &lv, &rv)
        }
        Expr::Var(path) => eval_var(path, bindings),
        Expr::Call(helper, args) => eval_call(*helper, args, bindings),
    }
}

fn eval_var(path: &[String], bindings: &Bindings) -> Result<ExprValue, ExprError> {
    match path[0].as_str() {
        "event" if path.len() == 1 => Ok(ExprValue::Str(bindings.event.clone())),
        "projectScope" if path.len() == 1 => {
            Ok(ExprValue::Str(bindings.project_scope.clone()))
        }
        "timestamp" if path.len() == 1 => Ok(ExprValue::Str(bindings.timestamp.clone())),
        "data" => {
            let mut current = &bindings.data;
            for part in &path[1..] {
                match current.get(part) {
                    Some(next) => current = next,
                    None => return Ok(ExprValue::Null),
                }
            }
            Ok(from_json(current))
        }
        other => Err(ExprError::Eval(format!("unknown identifier '{other}'"))),
    }
}

fn eval_cmp(op: CmpOp, l: &ExprValue, r: &ExprValue) -> Result<ExprValue, ExprError> {
    use ExprValue::*;

    let result = match op {
        CmpOp::Eq => values_equal(l, r),
        CmpOp::Ne => !values_equal(l, r),
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
            let ordering = match (l, r) {
                (Num(a), Num(b)) => a.partial_cmp(b),
                (Str(a), Str(b)) => Some(a.cmp(b)),
                _ => None,
            };
            let Some(ordering) = ordering else {
                return Err(ExprError::Eval(
                    "ordering comparison requires two numbers or two strings".into(),
                ));
            };
            match op {
                CmpOp::Lt => ordering == std::cmp::Ordering::Less,
                CmpOp::Le => ordering != std::cmp::Ordering::Greater,
                CmpOp::Gt => ordering == std::cmp::Ordering::Greater,
                CmpOp::Ge => ordering != std::cmp::Ordering::Less,
                _ => unreachable!(),
            }
        }
    };
    Ok(ExprValue::Bool(result))
}

fn values_equal(l: &ExprValue, r: &ExprValue) -> bool {
    use ExprValue::*;
    match (l, r) {
        (Str(a), Str(b)) => a == b,
        (Num(a), Num(b)) => a == b,
        (Bool(a), Bool(b)) => a == b,
        (Null, Null) => true,
        (Json(a), Json(b)) => a == b,
        _ => false,
    }
}

fn eval_call(
    helper: Helper,
    args: &[Expr],
    bindings: &Bindings,
) -> Result<ExprValue, ExprError> {
    let values: Vec<ExprValue> = args
        .iter()
        .map(|a| eval(a, bindings))
        .collect::<Result<_, _>>()?;

    match helper {
        Helper::Includes => {
            let [haystack, needle] = two_args("includes", &values)?;
            let (ExprValue::Str(h), ExprValue::Str(n)) = (haystack, needle) else {
                return Err(ExprError::Eval("includes() expects two strings".into()));
            };
            Ok(ExprValue::Bool(h.contains(n.as_str())))
        }
        Helper::Matches => {
            let [subject, pattern] = two_args("matches", &values)?;
            let (ExprValue::Str(s), ExprValue::Str(p)) = (subject, pattern) else {
                return Err(ExprError::Eval("matches() expects two strings".into()));
            };
            let regex = Regex::new(p)
                .map_err(|e| ExprError::Eval(format!("matches() bad pattern: {e}")))?;
            Ok(ExprValue::Bool(regex.is_match(s)))
        }
        Helper::Length => {
            if values.len() != 1 {
                return Err(ExprError::Eval("length() expects one argument".into()));
            }
            let len = match &values[0] {
                ExprValue::Str(s) => s.chars().count(),
                ExprValue::Json(Value::Array(a)) => a.len(),
                ExprValue::Json(Value::Object(o)) => o.len(),
                ExprValue::Null => 0,
                _ => {
                    return Err(ExprError::Eval(
                        "length() expects a string or collection".into(),
                    ))
                }
            };
            Ok(ExprValue::Num(len as f64))
        }
    }
}

fn two_args<'a>(
    name: &str,
    values: &'a [ExprValue],
) -> Result<[&'a ExprValue; 2], ExprError> {
    if values.len() != 2 {
        return Err(ExprError::Eval(format!("{name}() expects two arguments")));
    }
    Ok([&values[0], &values[1]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bindings() -> Bindings {
        Bindings {
            event: "FileChange".into(),
            data: json!({
                "filePath": "src/main.rs",
                "changeType": "modified",
                "files": ["a.rs", "b.rs"],
                "count": 3
            }),
            project_scope: "/home/dev/project".into(),
            timestamp: "2025-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn literal_booleans() {
        assert!(eval_bool("true", &bindings()).unwrap());
        assert!(!eval_bool("false", &bindings()).unwrap());
    }

    #[test]
    fn event_binding_comparison() {
        assert!(eval_bool("event == 'FileChange'", &bindings()).unwrap());
        assert!(!eval_bool("event == 'GitCommit'", &bindings()).unwrap());
    }

    #[test]
    fn data_member_access() {
        assert!(eval_bool("data.changeType == 'modified'", &bindings()).unwrap());
        // Missing member resolves to null, which is falsy.
        assert!(!eval_bool("data.missing", &bindings()).unwrap());
        assert!(eval_bool("data.missing == null", &bindings()).unwrap());
    }

    #[test]
    fn includes_helper() {
        assert!(eval_bool("includes(data.filePath, 'main')", &bindings()).unwrap());
        assert!(!eval_bool("includes(data.filePath, 'zzz')", &bindings()).unwrap());
    }

    #[test]
    fn matches_helper() {
        assert!(eval_bool("matches(data.filePath, '\\.rs$')", &bindings()).unwrap());
        assert!(!eval_bool("matches(data.filePath, '\\.js$')", &bindings()).unwrap());
    }

    #[test]
    fn matches_bad_pattern_is_an_error() {
        assert!(eval_bool("matches(data.filePath, '[unclosed')", &bindings()).is_err());
    }

    #[test]
    fn length_helper() {
        assert!(eval_bool("length(data.files) == 2", &bindings()).unwrap());
        assert!(eval_bool("length(data.filePath) > 5", &bindings()).unwrap());
        assert!(eval_bool("length(data.missing) == 0", &bindings()).unwrap());
    }

    #[test]
    fn boolean_operators_short_circuit() {
        // The right side would error, but the left side decides first.
        assert!(!eval_bool("false && unknown_var", &bindings()).unwrap());
        assert!(eval_bool("true || unknown_var", &bindings()).unwrap());
    }

    #[test]
    fn numeric_comparison() {
        assert!(eval_bool("data.count >= 3", &bindings()).unwrap());
        assert!(!eval_bool("data.count < 3", &bindings()).unwrap());
    }

    #[test]
    fn unknown_identifier_is_an_error() {
        assert!(eval_bool("process == 'x'", &bindings()).is_err());
        assert!(eval_bool("require('fs')", &bindings()).is_err());
    }

    #[test]
    fn grouping_and_negation() {
        let b = bindings();
        assert!(eval_bool("!(event == 'GitCommit') && includes(projectScope, 'dev')", &b).unwrap());
    }

    #[test]
    fn trailing_tokens_are_rejected() {
        assert!(eval_bool("true true", &bindings()).is_err());
    }
}
