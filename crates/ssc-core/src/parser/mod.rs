//! Contract parser — tokenizer, AST types, and recursive descent parser
//!
//! Grammar (informal):
//!
//! ```text
//! contract  := item*
//! item      := "action" IDENT params block | "fn" IDENT params block | "const" IDENT "=" expr ";"
//! stmt      := "let" IDENT "=" expr ";" | target ("=" | "+=" | "-=") expr ";"
//!            | "if" "(" expr ")" block ("else" (if | block))?
//!            | "while" "(" expr ")" block | "for" "(" "let"? IDENT "in" expr ")" block
//!            | "return" expr? ";" | "break" ";" | "continue" ";" | "throw" expr ";" | expr ";"
//! expr      := or ; precedence climbs || && (== !=) (< <= > >=) (+ -) (* / %) unary postfix
//! ```

pub mod ast;
pub mod tokenizer;

use crate::error::{Error, Result};
use ast::*;
use tokenizer::{Span, SpannedToken, Token, Tokenizer};

/// Bound on block and expression nesting; keeps every AST walk shallow
pub const MAX_NESTING_DEPTH: usize = 64;

/// Parse contract source into its AST
///
/// # Errors
/// Returns `Error::Parse` with line:column for the first syntax violation.
///
/// # Example
/// ```
/// let contract = ssc_core::parser::parse_contract("action createSSC(payload) { }").unwrap();
/// assert_eq!(contract.items.len(), 1);
/// ```
pub fn parse_contract(input: &str) -> Result<ContractNode> {
    let tokens = Tokenizer::new(input).tokenize()?;
    Parser::new(tokens).parse_contract()
}

struct Parser {
    tokens: Vec<SpannedToken>,
    position: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<SpannedToken>) -> Self {
        Parser {
            tokens,
            position: 0,
            depth: 0,
        }
    }

    // ── Token helpers ──────────────────────────────────────

    fn peek(&self) -> &Token {
        self.tokens
            .get(self.position)
            .map(|t| &t.token)
            .unwrap_or(&Token::Eof)
    }

    fn span(&self) -> Span {
        self.tokens
            .get(self.position)
            .or_else(|| self.tokens.last())
            .map(|t| t.span)
            .unwrap_or_default()
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.position < self.tokens.len() {
            self.position += 1;
        }
        token
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> Error {
        let span = self.span();
        Error::Parse {
            line: span.line,
            column: span.column,
            message: message.into(),
        }
    }

    fn expect(&mut self, token: &Token) -> Result<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}', found '{}'", token, self.peek())))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String> {
        match self.peek().clone() {
            Token::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(self.error(format!("expected {}, found '{}'", what, other))),
        }
    }

    fn too_deep(&self) -> Error {
        self.error(format!("nesting deeper than {} levels", MAX_NESTING_DEPTH))
    }

    /// Run `parse` one nesting level down
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(self.too_deep());
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    /// Build an expression node, rejecting trees nested too deeply
    fn node(&self, kind: ExprKind, span: Span) -> Result<Expr> {
        let expr = Expr::new(kind, span);
        if expr.depth > MAX_NESTING_DEPTH {
            return Err(self.too_deep());
        }
        Ok(expr)
    }

    /// Property names after `.` may be reserved words (`info.action`)
    fn expect_property(&mut self) -> Result<String> {
        if let Some(word) = self.peek().keyword() {
            self.advance();
            return Ok(word.to_string());
        }
        self.expect_ident("property name")
    }

    // ── Items ──────────────────────────────────────────────

    fn parse_contract(&mut self) -> Result<ContractNode> {
        let mut items = Vec::new();
        while !self.check(&Token::Eof) {
            items.push(self.parse_item()?);
        }
        Ok(ContractNode { items })
    }

    fn parse_item(&mut self) -> Result<Item> {
        let span = self.span();
        match self.peek() {
            Token::Action => {
                self.advance();
                Ok(Item::Action(self.parse_function(span)?))
            }
            Token::Fn => {
                self.advance();
                Ok(Item::Function(self.parse_function(span)?))
            }
            Token::Const => {
                self.advance();
                let name = self.expect_ident("constant name")?;
                self.expect(&Token::Assign)?;
                let value = self.parse_expr()?;
                self.expect(&Token::Semicolon)?;
                Ok(Item::Const(ConstDef { name, value, span }))
            }
            other => Err(self.error(format!(
                "expected 'action', 'fn' or 'const', found '{}'",
                other
            ))),
        }
    }

    fn parse_function(&mut self, span: Span) -> Result<FunctionDef> {
        let name = self.expect_ident("name")?;
        self.expect(&Token::LParen)?;
        let mut params = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                params.push(self.expect_ident("parameter name")?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(&Token::RParen)?;
        let body = self.parse_block()?;
        Ok(FunctionDef {
            name,
            params,
            body,
            span,
        })
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>> {
        self.expect(&Token::LBrace)?;
        let stmts = self.nested(|p| {
            let mut stmts = Vec::new();
            while !p.check(&Token::RBrace) {
                if p.check(&Token::Eof) {
                    return Err(p.error("unterminated block, expected '}'"));
                }
                stmts.push(p.parse_stmt()?);
            }
            Ok(stmts)
        })?;
        self.expect(&Token::RBrace)?;
        Ok(stmts)
    }

    // ── Statements ─────────────────────────────────────────

    fn parse_stmt(&mut self) -> Result<Stmt> {
        let span = self.span();
        match self.peek() {
            Token::Let => {
                self.advance();
                let name = self.expect_ident("variable name")?;
                self.expect(&Token::Assign)?;
                let value = self.parse_expr()?;
                self.expect(&Token::Semicolon)?;
                Ok(Stmt::Let { name, value, span })
            }
            Token::If => self.parse_if(),
            Token::While => {
                self.advance();
                self.expect(&Token::LParen)?;
                let condition = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                let body = self.parse_block()?;
                Ok(Stmt::While {
                    condition,
                    body,
                    span,
                })
            }
            Token::For => {
                self.advance();
                self.expect(&Token::LParen)?;
                self.eat(&Token::Let);
                let var = self.expect_ident("loop variable")?;
                self.expect(&Token::In)?;
                let iterable = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                let body = self.parse_block()?;
                Ok(Stmt::For {
                    var,
                    iterable,
                    body,
                    span,
                })
            }
            Token::Return => {
                self.advance();
                let value = if self.check(&Token::Semicolon) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect(&Token::Semicolon)?;
                Ok(Stmt::Return { value, span })
            }
            Token::Break => {
                self.advance();
                self.expect(&Token::Semicolon)?;
                Ok(Stmt::Break { span })
            }
            Token::Continue => {
                self.advance();
                self.expect(&Token::Semicolon)?;
                Ok(Stmt::Continue { span })
            }
            Token::Throw => {
                self.advance();
                let value = self.parse_expr()?;
                self.expect(&Token::Semicolon)?;
                Ok(Stmt::Throw { value, span })
            }
            _ => {
                let expr = self.parse_expr()?;
                let op = match self.peek() {
                    Token::Assign => Some(AssignOp::Set),
                    Token::PlusAssign => Some(AssignOp::Add),
                    Token::MinusAssign => Some(AssignOp::Sub),
                    _ => None,
                };
                let stmt = match op {
                    Some(op) => {
                        if !expr.is_assignable() {
                            return Err(self.error("invalid assignment target"));
                        }
                        self.advance();
                        let value = self.parse_expr()?;
                        Stmt::Assign {
                            target: expr,
                            op,
                            value,
                            span,
                        }
                    }
                    None => Stmt::Expr { expr, span },
                };
                self.expect(&Token::Semicolon)?;
                Ok(stmt)
            }
        }
    }

    fn parse_if(&mut self) -> Result<Stmt> {
        let span = self.span();
        self.expect(&Token::If)?;
        self.expect(&Token::LParen)?;
        let condition = self.parse_expr()?;
        self.expect(&Token::RParen)?;
        let then_branch = self.parse_block()?;
        let else_branch = if self.eat(&Token::Else) {
            if self.check(&Token::If) {
                Some(vec![self.nested(Self::parse_if)?])
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(Stmt::If {
            condition,
            then_branch,
            else_branch,
            span,
        })
    }

    // ── Expressions ────────────────────────────────────────

    fn parse_expr(&mut self) -> Result<Expr> {
        self.nested(|p| p.parse_binary(1))
    }

    fn binary_op(&self) -> Option<BinaryOp> {
        let op = match self.peek() {
            Token::OrOr => BinaryOp::Or,
            Token::AndAnd => BinaryOp::And,
            Token::Eq => BinaryOp::Eq,
            Token::NotEq => BinaryOp::NotEq,
            Token::Lt => BinaryOp::Lt,
            Token::LtEq => BinaryOp::LtEq,
            Token::Gt => BinaryOp::Gt,
            Token::GtEq => BinaryOp::GtEq,
            Token::Plus => BinaryOp::Add,
            Token::Minus => BinaryOp::Sub,
            Token::Star => BinaryOp::Mul,
            Token::Slash => BinaryOp::Div,
            Token::Percent => BinaryOp::Rem,
            _ => return None,
        };
        Some(op)
    }

    /// Precedence climbing; every binary operator is left-associative
    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        while let Some(op) = self.binary_op() {
            if op.precedence() < min_precedence {
                break;
            }
            let span = self.span();
            self.advance();
            let right = self.parse_binary(op.precedence() + 1)?;
            left = self.node(
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            )?;
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let span = self.span();
        let op = match self.peek() {
            Token::Bang => UnaryOp::Not,
            Token::Minus => UnaryOp::Neg,
            _ => return self.parse_postfix(),
        };
        self.advance();
        let operand = self.nested(Self::parse_unary)?;
        self.node(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            span,
        )
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            let span = self.span();
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    let property = self.expect_property()?;
                    expr = self.node(
                        ExprKind::Member {
                            object: Box::new(expr),
                            property,
                        },
                        span,
                    )?;
                }
                Token::LBracket => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(&Token::RBracket)?;
                    expr = self.node(
                        ExprKind::Index {
                            object: Box::new(expr),
                            index: Box::new(index),
                        },
                        span,
                    )?;
                }
                Token::LParen => {
                    self.advance();
                    let args = self.parse_list(&Token::RParen)?;
                    expr = self.node(
                        ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        span,
                    )?;
                }
                _ => return Ok(expr),
            }
        }
    }

    /// Comma-separated expressions up to `close`; a trailing comma is allowed
    fn parse_list(&mut self, close: &Token) -> Result<Vec<Expr>> {
        let mut items = Vec::new();
        while !self.check(close) {
            items.push(self.parse_expr()?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(close)?;
        Ok(items)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let span = self.span();
        let kind = match self.advance() {
            Token::Null => ExprKind::Literal(Literal::Null),
            Token::BooleanLiteral(b) => ExprKind::Literal(Literal::Boolean(b)),
            Token::IntegerLiteral(i) => ExprKind::Literal(Literal::Integer(i)),
            Token::FloatLiteral(f) => ExprKind::Literal(Literal::Float(f)),
            Token::StringLiteral(s) => ExprKind::Literal(Literal::String(s)),
            Token::Identifier(name) => ExprKind::Ident(name),
            Token::LParen => {
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                return Ok(inner);
            }
            Token::LBracket => ExprKind::Array(self.parse_list(&Token::RBracket)?),
            Token::LBrace => ExprKind::Object(self.parse_object_fields()?),
            other => {
                self.position = self.position.saturating_sub(1);
                return Err(self.error(format!("unexpected '{}' in expression", other)));
            }
        };
        self.node(kind, span)
    }

    fn parse_object_fields(&mut self) -> Result<Vec<(String, Expr)>> {
        let mut fields: Vec<(String, Expr)> = Vec::new();
        while !self.check(&Token::RBrace) {
            let key_span = self.span();
            let reserved = self.peek().keyword();
            let key = match self.advance() {
                Token::Identifier(name) => name,
                Token::StringLiteral(s) => s,
                other => match reserved {
                    Some(word) => word.to_string(),
                    None => {
                        self.position = self.position.saturating_sub(1);
                        return Err(self.error(format!("expected object key, found '{}'", other)));
                    }
                },
            };
            if fields.iter().any(|(k, _)| *k == key) {
                return Err(Error::Parse {
                    line: key_span.line,
                    column: key_span.column,
                    message: format!("duplicate object key '{}'", key),
                });
            }
            let value = if self.eat(&Token::Colon) {
                self.parse_expr()?
            } else if reserved.is_some() {
                return Err(self.error(format!("expected ':' after reserved key '{}'", key)));
            } else {
                // shorthand `{ name }`
                Expr::new(ExprKind::Ident(key.clone()), key_span)
            };
            fields.push((key, value));
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RBrace)?;
        Ok(fields)
    }
}

/// An `else` branch that is exactly one nested `if` prints as `else if`
pub(crate) fn is_else_if(branch: &[Stmt]) -> bool {
    matches!(branch, [Stmt::If { .. }])
}
