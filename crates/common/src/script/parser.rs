//! Script parser
//!
//! Pratt parser over the token stream. Grammar:
//!
//! ```text
//! script    := (statement? SEP)*
//! statement := "fn" IDENT "(" params? ")" "=>" expr
//!            | path "=" expr
//!            | expr
//! expr      := unary (binop unary)*          precedence climbing
//! unary     := ("!" | "-") unary | postfix
//! postfix   := primary ("." IDENT ("(" args? ")")? | "[" expr "]")*
//! primary   := literal | IDENT ("(" args? ")")? | "(" expr ")"
//! ```

use super::lexer::{Lexer, Token, TokenKind};
use crate::{Error, Result};
use serde_json::Value;

/// Deepest nesting of unary operators, parentheses, calls and indexes
const MAX_NESTING_DEPTH: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    fn from_token(kind: &TokenKind) -> Option<Self> {
        Some(match kind {
            TokenKind::Or => BinaryOp::Or,
            TokenKind::And => BinaryOp::And,
            TokenKind::Eq => BinaryOp::Eq,
            TokenKind::Ne => BinaryOp::Ne,
            TokenKind::Lt => BinaryOp::Lt,
            TokenKind::Le => BinaryOp::Le,
            TokenKind::Gt => BinaryOp::Gt,
            TokenKind::Ge => BinaryOp::Ge,
            TokenKind::Plus => BinaryOp::Add,
            TokenKind::Minus => BinaryOp::Sub,
            TokenKind::Star => BinaryOp::Mul,
            TokenKind::Slash => BinaryOp::Div,
            TokenKind::Percent => BinaryOp::Rem,
            _ => return None,
        })
    }

    fn precedence(&self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq | BinaryOp::Ne => 3,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => 4,
            BinaryOp::Add | BinaryOp::Sub => 5,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 6,
        }
    }
}

/// Expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ident(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call { name: String, args: Vec<Expr> },
    MethodCall {
        target: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    /// `a.b.c` as `["a", "b", "c"]`, if this expression is a plain path
    pub fn as_path(&self) -> Option<Vec<String>> {
        match self {
            Expr::Ident(name) => Some(vec![name.clone()]),
            Expr::Member(target, field) => {
                let mut path = target.as_path()?;
                path.push(field.clone());
                Some(path)
            }
            _ => None,
        }
    }
}

/// A named function with positional parameters and an expression body
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Function(FunctionDef),
    Assign { target: Vec<String>, value: Expr },
    Expr(Expr),
}

/// Parse a single expression; trailing tokens are an error
pub fn parse_expression(source: &str) -> Result<Expr> {
    let mut parser = Parser::new(source)?;
    parser.skip_separators();
    let expr = parser.expr(0)?;
    parser.skip_separators();
    parser.expect_eof()?;
    Ok(expr)
}

/// Parse a single statement
pub fn parse_statement(source: &str) -> Result<Statement> {
    let mut statements = parse_script(source)?;
    match statements.len() {
        1 => Ok(statements.remove(0)),
        n => Err(Error::Script(format!("expected one statement, found {}", n))),
    }
}

/// Parse a whole script file
pub fn parse_script(source: &str) -> Result<Vec<Statement>> {
    let mut parser = Parser::new(source)?;
    let mut statements = Vec::new();
    loop {
        parser.skip_separators();
        if parser.at(&TokenKind::Eof) {
            break;
        }
        statements.push(parser.statement()?);
        if !parser.at(&TokenKind::Eof) {
            parser.expect(&TokenKind::Separator)?;
        }
    }
    Ok(statements)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(source: &str) -> Result<Self> {
        Ok(Self {
            tokens: Lexer::tokenize(source)?,
            pos: 0,
            depth: 0,
        })
    }

    fn peek(&self) -> &Token {
        // tokenize always ends with Eof
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn at(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn bump(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn error(&self, message: impl std::fmt::Display) -> Error {
        let tok = self.peek();
        Error::Script(format!("{}:{}: {}", tok.line, tok.col, message))
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<Token> {
        if self.at(kind) {
            Ok(self.bump())
        } else {
            Err(self.error(format!("expected {:?}, found {:?}", kind, self.peek().kind)))
        }
    }

    fn expect_eof(&self) -> Result<()> {
        if self.at(&TokenKind::Eof) {
            Ok(())
        } else {
            Err(self.error(format!("unexpected {:?}", self.peek().kind)))
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.bump().kind {
            TokenKind::Ident(name) => Ok(name),
            other => Err(self.error(format!("expected identifier, found {:?}", other))),
        }
    }

    fn skip_separators(&mut self) {
        while self.at(&TokenKind::Separator) {
            self.bump();
        }
    }

    fn statement(&mut self) -> Result<Statement> {
        if self.at(&TokenKind::Fn) {
            return self.function().map(Statement::Function);
        }

        let expr = self.expr(0)?;
        if self.at(&TokenKind::Assign) {
            let Some(target) = expr.as_path() else {
                return Err(self.error("left side of assignment must be a name or member path"));
            };
            self.bump();
            let value = self.expr(0)?;
            return Ok(Statement::Assign { target, value });
        }
        Ok(Statement::Expr(expr))
    }

    fn function(&mut self) -> Result<FunctionDef> {
        self.expect(&TokenKind::Fn)?;
        let name = self.expect_ident()?;
        self.expect(&TokenKind::LParen)?;
        let mut params = Vec::new();
        if !self.at(&TokenKind::RParen) {
            loop {
                params.push(self.expect_ident()?);
                if self.at(&TokenKind::Comma) {
                    self.bump();
                } else {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen)?;
        self.expect(&TokenKind::Arrow)?;
        let body = self.expr(0)?;
        Ok(FunctionDef { name, params, body })
    }

    fn expr(&mut self, min_prec: u8) -> Result<Expr> {
        let mut lhs = self.unary()?;
        while let Some(op) = BinaryOp::from_token(&self.peek().kind) {
            let prec = op.precedence();
            if prec <= min_prec {
                break;
            }
            self.bump();
            let rhs = self.expr(prec)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(self.error("expression is nested too deeply"));
        }
        self.depth += 1;
        let expr = self.prefix();
        self.depth -= 1;
        expr
    }

    fn prefix(&mut self) -> Result<Expr> {
        let kind = self.peek().kind.clone();
        match kind {
            TokenKind::Not => {
                self.bump();
                Ok(Expr::Unary(UnaryOp::Not, Box::new(self.unary()?)))
            }
            TokenKind::Minus => {
                self.bump();
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.unary()?)))
            }
            _ => self.postfix(),
        }
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        loop {
            let kind = self.peek().kind.clone();
            match kind {
                TokenKind::Dot => {
                    self.bump();
                    let name = self.expect_ident()?;
                    if self.at(&TokenKind::LParen) {
                        let args = self.args()?;
                        expr = Expr::MethodCall {
                            target: Box::new(expr),
                            method: name,
                            args,
                        };
                    } else {
                        expr = Expr::Member(Box::new(expr), name);
                    }
                }
                TokenKind::LBracket => {
                    self.bump();
                    let index = self.expr(0)?;
                    self.expect(&TokenKind::RBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                _ => return Ok(expr),
            }
        }
    }

    fn args(&mut self) -> Result<Vec<Expr>> {
        self.expect(&TokenKind::LParen)?;
        let mut args = Vec::new();
        if !self.at(&TokenKind::RParen) {
            loop {
                args.push(self.expr(0)?);
                if self.at(&TokenKind::Comma) {
                    self.bump();
                } else {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen)?;
        Ok(args)
    }

    fn primary(&mut self) -> Result<Expr> {
        let tok = self.bump();
        match tok.kind {
            TokenKind::Number(n) => Ok(Expr::Literal(number(n))),
            TokenKind::Str(s) => Ok(Expr::Literal(Value::String(s))),
            TokenKind::True => Ok(Expr::Literal(Value::Bool(true))),
            TokenKind::False => Ok(Expr::Literal(Value::Bool(false))),
            TokenKind::Null => Ok(Expr::Literal(Value::Null)),
            TokenKind::Ident(name) => {
                if self.at(&TokenKind::LParen) {
                    let args = self.args()?;
                    Ok(Expr::Call { name, args })
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            TokenKind::LParen => {
                let inner = self.expr(0)?;
                self.expect(&TokenKind::RParen)?;
                Ok(inner)
            }
            other => Err(Error::Script(format!(
                "{}:{}: unexpected {:?}",
                tok.line, tok.col, other
            ))),
        }
    }
}

/// Integral numbers stay integers so they compare equal to JSON integers
pub(crate) fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence() {
        let expr = parse_expression("a || b && c == 1 + 2 * 3").unwrap();
        let Expr::Binary(BinaryOp::Or, _, rhs) = expr else {
            panic!("expected || at the top");
        };
        let Expr::Binary(BinaryOp::And, _, rhs) = *rhs else {
            panic!("expected && below ||");
        };
        assert!(matches!(*rhs, Expr::Binary(BinaryOp::Eq, _, _)));
    }

    #[test]
    fn test_selector_expression() {
        let expr =
            parse_expression(r#"fixture.DisplayName.Equals("F1") && test.Priority == Priority.High"#)
                .unwrap();
        let Expr::Binary(BinaryOp::And, lhs, rhs) = expr else {
            panic!("expected &&");
        };
        assert!(matches!(*lhs, Expr::MethodCall { ref method, .. } if method == "Equals"));
        assert!(matches!(*rhs, Expr::Binary(BinaryOp::Eq, _, _)));
    }

    #[test]
    fn test_statements() {
        let statements = parse_script(
            "# setup\nmodel.Url = \"x\"\nfn greet(name) => \"hi \" + name\n\ncount = count + 1; greet(\"a\")",
        )
        .unwrap();
        assert_eq!(statements.len(), 4);
        assert!(matches!(
            &statements[0],
            Statement::Assign { target, .. } if target == &vec!["model".to_string(), "Url".to_string()]
        ));
        assert!(matches!(&statements[1], Statement::Function(f) if f.params == vec!["name".to_string()]));
        assert!(matches!(&statements[3], Statement::Expr(Expr::Call { .. })));
    }

    #[test]
    fn test_invalid_assignment_target() {
        assert!(parse_statement("f() = 1").is_err());
        assert!(parse_expression("a b").is_err());
        assert!(parse_statement("a = 1; b = 2").is_err());
    }

    #[test]
    fn test_integral_numbers() {
        assert_eq!(parse_expression("3").unwrap(), Expr::Literal(Value::from(3)));
        assert_eq!(parse_expression("0.5").unwrap(), Expr::Literal(Value::from(0.5)));
    }

    #[test]
    fn test_nesting_is_bounded() {
        let shallow = format!("{}1{}", "(".repeat(50), ")".repeat(50));
        assert_eq!(parse_expression(&shallow).unwrap(), Expr::Literal(Value::from(1)));

        let deep = format!("{}1{}", "(".repeat(10_000), ")".repeat(10_000));
        let err = parse_expression(&deep).unwrap_err();
        assert!(matches!(err, Error::Script(ref m) if m.contains("nested too deeply")));
        assert!(parse_expression(&"!".repeat(10_000)).is_err());
        assert!(parse_statement(&format!("fn f() => {}true", "-".repeat(10_000))).is_err());
    }
}
