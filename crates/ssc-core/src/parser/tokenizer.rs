//! Contract tokenizer — converts contract source into a token stream
//!
//! Handles: keywords, identifiers, string literals (single or double quoted),
//! integer/float literals, operators and punctuation.
//! Comments (`//` and `/* */`) are discarded.
//!
//! Guarantees:
//! - Deterministic: same input always produces same token stream
//! - Every error carries line:column

use crate::error::{Error, Result};

/// Token types for contract syntax
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Keywords
    Action,
    Fn,
    Const,
    Let,
    If,
    Else,
    While,
    For,
    In,
    Return,
    Break,
    Continue,
    Throw,
    Null,

    // Literals
    StringLiteral(String),
    IntegerLiteral(i64),
    FloatLiteral(f64),
    BooleanLiteral(bool),

    // Punctuation
    LBrace,    // {
    RBrace,    // }
    LBracket,  // [
    RBracket,  // ]
    LParen,    // (
    RParen,    // )
    Colon,     // :
    Semicolon, // ;
    Comma,     // ,
    Dot,       // .

    // Operators
    Assign,      // =
    PlusAssign,  // +=
    MinusAssign, // -=
    Eq,          // ==
    NotEq,       // !=
    Lt,          // <
    LtEq,        // <=
    Gt,          // >
    GtEq,        // >=
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    AndAnd,
    OrOr,

    // Other
    Identifier(String),
    Eof,
}

impl Token {
    /// Reserved word spelled by this token, if it is one
    pub fn keyword(&self) -> Option<&'static str> {
        let word = match self {
            Token::Action => "action",
            Token::Fn => "fn",
            Token::Const => "const",
            Token::Let => "let",
            Token::If => "if",
            Token::Else => "else",
            Token::While => "while",
            Token::For => "for",
            Token::In => "in",
            Token::Return => "return",
            Token::Break => "break",
            Token::Continue => "continue",
            Token::Throw => "throw",
            Token::Null => "null",
            Token::BooleanLiteral(true) => "true",
            Token::BooleanLiteral(false) => "false",
            _ => return None,
        };
        Some(word)
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let text = match self {
            Token::Action => "action",
            Token::Fn => "fn",
            Token::Const => "const",
            Token::Let => "let",
            Token::If => "if",
            Token::Else => "else",
            Token::While => "while",
            Token::For => "for",
            Token::In => "in",
            Token::Return => "return",
            Token::Break => "break",
            Token::Continue => "continue",
            Token::Throw => "throw",
            Token::Null => "null",
            Token::StringLiteral(s) => return write!(f, "\"{}\"", s),
            Token::IntegerLiteral(i) => return write!(f, "{}", i),
            Token::FloatLiteral(v) => return write!(f, "{}", v),
            Token::BooleanLiteral(b) => return write!(f, "{}", b),
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::Colon => ":",
            Token::Semicolon => ";",
            Token::Comma => ",",
            Token::Dot => ".",
            Token::Assign => "=",
            Token::PlusAssign => "+=",
            Token::MinusAssign => "-=",
            Token::Eq => "==",
            Token::NotEq => "!=",
            Token::Lt => "<",
            Token::LtEq => "<=",
            Token::Gt => ">",
            Token::GtEq => ">=",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Bang => "!",
            Token::AndAnd => "&&",
            Token::OrOr => "||",
            Token::Identifier(name) => return write!(f, "{}", name),
            Token::Eof => "end of input",
        };
        write!(f, "{}", text)
    }
}

/// Position in source text for error reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Span {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Token with source position
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

/// Tokenizer for contract source text
pub struct Tokenizer {
    input: Vec<char>,
    position: usize,
    line: usize,
    column: usize,
}

fn error_at(span: Span, message: impl Into<String>) -> Error {
    Error::Parse {
        line: span.line,
        column: span.column,
        message: message.into(),
    }
}

impl Tokenizer {
    pub fn new(text: &str) -> Self {
        Tokenizer {
            input: text.chars().collect(),
            position: 0,
            line: 1,
            column: 1,
        }
    }

    /// Tokenize the entire input into a stream of spanned tokens
    pub fn tokenize(&mut self) -> Result<Vec<SpannedToken>> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace_and_comments()?;

            if self.is_at_end() {
                tokens.push(SpannedToken {
                    token: Token::Eof,
                    span: self.current_span(),
                });
                break;
            }

            let token = self.next_token()?;
            tokens.push(token);
        }

        Ok(tokens)
    }

    // ── Character helpers ──────────────────────────────────

    fn is_at_end(&self) -> bool {
        self.position >= self.input.len()
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek_ahead(&self, offset: usize) -> Option<char> {
        self.input.get(self.position + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.input.get(self.position).copied();
        if let Some(c) = ch {
            self.position += 1;
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        ch
    }

    fn current_span(&self) -> Span {
        Span {
            line: self.line,
            column: self.column,
            offset: self.position,
        }
    }

    // ── Whitespace & Comments ──────────────────────────────

    fn skip_whitespace_and_comments(&mut self) -> Result<()> {
        loop {
            while let Some(ch) = self.peek() {
                if ch.is_whitespace() {
                    self.advance();
                } else {
                    break;
                }
            }

            if self.peek() == Some('/') && self.peek_ahead(1) == Some('/') {
                while let Some(ch) = self.peek() {
                    if ch == '\n' {
                        break;
                    }
                    self.advance();
                }
                continue;
            }

            if self.peek() == Some('/') && self.peek_ahead(1) == Some('*') {
                let span = self.current_span();
                self.advance();
                self.advance();
                loop {
                    match self.advance() {
                        None => return Err(error_at(span, "Unterminated block comment")),
                        Some('*') if self.peek() == Some('/') => {
                            self.advance();
                            break;
                        }
                        Some(_) => {}
                    }
                }
                continue;
            }

            return Ok(());
        }
    }

    // ── Main dispatch ──────────────────────────────────────

    fn next_token(&mut self) -> Result<SpannedToken> {
        let span = self.current_span();
        let Some(ch) = self.peek() else {
            return Ok(SpannedToken { token: Token::Eof, span });
        };

        let simple = match ch {
            '{' => Some(Token::LBrace),
            '}' => Some(Token::RBrace),
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            ':' => Some(Token::Colon),
            ';' => Some(Token::Semicolon),
            ',' => Some(Token::Comma),
            '.' => Some(Token::Dot),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '%' => Some(Token::Percent),
            _ => None,
        };
        if let Some(token) = simple {
            self.advance();
            return Ok(SpannedToken { token, span });
        }

        match ch {
            '=' => Ok(self.one_or_two('=', Token::Assign, Token::Eq, span)),
            '!' => Ok(self.one_or_two('=', Token::Bang, Token::NotEq, span)),
            '<' => Ok(self.one_or_two('=', Token::Lt, Token::LtEq, span)),
            '>' => Ok(self.one_or_two('=', Token::Gt, Token::GtEq, span)),
            '+' => Ok(self.one_or_two('=', Token::Plus, Token::PlusAssign, span)),
            '-' => Ok(self.one_or_two('=', Token::Minus, Token::MinusAssign, span)),
            '&' | '|' => {
                self.advance();
                if self.peek() != Some(ch) {
                    return Err(error_at(span, format!("Unexpected character '{}'", ch)));
                }
                self.advance();
                let token = if ch == '&' { Token::AndAnd } else { Token::OrOr };
                Ok(SpannedToken { token, span })
            }
            '"' | '\'' => self.read_string(ch, span),
            c if c.is_ascii_digit() => self.read_number(span),
            c if c.is_ascii_alphabetic() || c == '_' || c == '$' => Ok(self.read_identifier_or_keyword(span)),
            _ => Err(error_at(span, format!("Unexpected character '{}'", ch))),
        }
    }

    fn one_or_two(&mut self, second: char, one: Token, two: Token, span: Span) -> SpannedToken {
        self.advance();
        if self.peek() == Some(second) {
            self.advance();
            SpannedToken { token: two, span }
        } else {
            SpannedToken { token: one, span }
        }
    }

    // ── String literals ────────────────────────────────────

    fn read_string(&mut self, quote: char, span: Span) -> Result<SpannedToken> {
        self.advance();
        let mut value = String::new();

        loop {
            match self.advance() {
                None | Some('\n') => return Err(error_at(span, "Unterminated string")),
                Some(c) if c == quote => break,
                Some('\\') => match self.advance() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('r') => value.push('\r'),
                    Some('0') => value.push('\0'),
                    Some('\\') => value.push('\\'),
                    Some('"') => value.push('"'),
                    Some('\'') => value.push('\''),
                    Some(c) => {
                        return Err(error_at(
                            self.current_span(),
                            format!("Invalid escape sequence '\\{}'", c),
                        ));
                    }
                    None => return Err(error_at(self.current_span(), "Unterminated escape sequence")),
                },
                Some(c) => value.push(c),
            }
        }

        Ok(SpannedToken {
            token: Token::StringLiteral(value),
            span,
        })
    }

    // ── Numbers ────────────────────────────────────────────

    fn read_number(&mut self, span: Span) -> Result<SpannedToken> {
        let start = self.position;
        let mut has_dot = false;

        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                self.advance();
            } else if ch == '.' && !has_dot && self.peek_ahead(1).is_some_and(|c| c.is_ascii_digit()) {
                has_dot = true;
                self.advance();
            } else {
                break;
            }
        }

        if self.peek().is_some_and(|c| c.is_ascii_alphabetic() || c == '_') {
            return Err(error_at(span, "Invalid number literal"));
        }

        let text: String = self.input[start..self.position].iter().collect();

        if has_dot {
            let val: f64 = text
                .parse()
                .map_err(|_| error_at(span, format!("Invalid float '{}'", text)))?;
            Ok(SpannedToken {
                token: Token::FloatLiteral(val),
                span,
            })
        } else {
            let val: i64 = text
                .parse()
                .map_err(|_| error_at(span, format!("Integer literal '{}' out of range", text)))?;
            Ok(SpannedToken {
                token: Token::IntegerLiteral(val),
                span,
            })
        }
    }

    // ── Identifiers & Keywords ─────────────────────────────

    fn read_identifier_or_keyword(&mut self, span: Span) -> SpannedToken {
        let start = self.position;

        while let Some(ch) = self.peek() {
            if ch.is_ascii_alphanumeric() || ch == '_' || ch == '$' {
                self.advance();
            } else {
                break;
            }
        }

        let text: String = self.input[start..self.position].iter().collect();

        let token = match text.as_str() {
            "action" => Token::Action,
            "fn" => Token::Fn,
            "const" => Token::Const,
            "let" => Token::Let,
            "if" => Token::If,
            "else" => Token::Else,
            "while" => Token::While,
            "for" => Token::For,
            "in" => Token::In,
            "return" => Token::Return,
            "break" => Token::Break,
            "continue" => Token::Continue,
            "throw" => Token::Throw,
            "null" => Token::Null,
            "true" => Token::BooleanLiteral(true),
            "false" => Token::BooleanLiteral(false),
            _ => Token::Identifier(text),
        };

        SpannedToken { token, span }
    }
}
