//! Script lexer
//!
//! Converts script text into tokens. Newlines and `;` both end a statement;
//! `#` and `//` start a comment running to the end of the line.

use crate::{Error, Result};

/// Token discriminant
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Str(String),
    Number(f64),

    // Keywords
    Fn,
    True,
    False,
    Null,

    // Operators
    Assign,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Arrow,

    // Punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,

    /// End of statement (`;` or newline)
    Separator,
    Eof,
}

/// A token with its position (1-based line and column)
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
    pub col: u32,
}

pub struct Lexer<'a> {
    src: &'a [u8],
    text: &'a str,
    pos: usize,
    line: u32,
    col: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            src: source.as_bytes(),
            text: source,
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    /// Tokenize the entire input; the last token is always `Eof`
    pub fn tokenize(source: &str) -> Result<Vec<Token>> {
        let mut lexer = Lexer::new(source);
        let mut tokens = Vec::new();
        loop {
            let tok = lexer.next_token()?;
            let is_eof = tok.kind == TokenKind::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let ch = self.peek()?;
        self.pos += 1;
        if ch == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    fn error(&self, message: impl std::fmt::Display) -> Error {
        Error::Script(format!("{}:{}: {}", self.line, self.col, message))
    }

    fn skip_blanks_and_comments(&mut self) {
        while let Some(ch) = self.peek() {
            match ch {
                b' ' | b'\t' | b'\r' => {
                    self.advance();
                }
                b'#' => self.skip_line(),
                b'/' if self.peek_at(1) == Some(b'/') => self.skip_line(),
                _ => break,
            }
        }
    }

    fn skip_line(&mut self) {
        while let Some(ch) = self.peek() {
            if ch == b'\n' {
                break;
            }
            self.advance();
        }
    }

    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_blanks_and_comments();

        let line = self.line;
        let col = self.col;
        let make = |kind| Token { kind, line, col };

        let Some(ch) = self.peek() else {
            return Ok(make(TokenKind::Eof));
        };

        let two = |lexer: &mut Self, kind| {
            lexer.advance();
            lexer.advance();
            kind
        };
        let one = |lexer: &mut Self, kind| {
            lexer.advance();
            kind
        };

        let kind = match ch {
            b'\n' | b';' => one(self, TokenKind::Separator),
            b'"' | b'\'' => self.lex_string(ch)?,
            b'0'..=b'9' => self.lex_number()?,
            b'=' if self.peek_at(1) == Some(b'=') => two(self, TokenKind::Eq),
            b'=' if self.peek_at(1) == Some(b'>') => two(self, TokenKind::Arrow),
            b'=' => one(self, TokenKind::Assign),
            b'!' if self.peek_at(1) == Some(b'=') => two(self, TokenKind::Ne),
            b'!' => one(self, TokenKind::Not),
            b'<' if self.peek_at(1) == Some(b'=') => two(self, TokenKind::Le),
            b'<' => one(self, TokenKind::Lt),
            b'>' if self.peek_at(1) == Some(b'=') => two(self, TokenKind::Ge),
            b'>' => one(self, TokenKind::Gt),
            b'&' if self.peek_at(1) == Some(b'&') => two(self, TokenKind::And),
            b'|' if self.peek_at(1) == Some(b'|') => two(self, TokenKind::Or),
            b'+' => one(self, TokenKind::Plus),
            b'-' => one(self, TokenKind::Minus),
            b'*' => one(self, TokenKind::Star),
            b'/' => one(self, TokenKind::Slash),
            b'%' => one(self, TokenKind::Percent),
            b'(' => one(self, TokenKind::LParen),
            b')' => one(self, TokenKind::RParen),
            b'[' => one(self, TokenKind::LBracket),
            b']' => one(self, TokenKind::RBracket),
            b',' => one(self, TokenKind::Comma),
            b'.' => one(self, TokenKind::Dot),
            c if c == b'_' || c.is_ascii_alphabetic() => self.lex_word(),
            other => return Err(self.error(format!("unexpected character '{}'", other as char))),
        };

        Ok(make(kind))
    }

    fn lex_word(&mut self) -> TokenKind {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if ch == b'_' || ch.is_ascii_alphanumeric() {
                self.advance();
            } else {
                break;
            }
        }
        match &self.text[start..self.pos] {
            "fn" => TokenKind::Fn,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            word => TokenKind::Ident(word.to_string()),
        }
    }

    fn lex_number(&mut self) -> Result<TokenKind> {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            let fraction = ch == b'.' && self.peek_at(1).is_some_and(|c| c.is_ascii_digit());
            if ch.is_ascii_digit() || fraction {
                self.advance();
            } else {
                break;
            }
        }
        let text = &self.text[start..self.pos];
        text.parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| self.error(format!("invalid number '{}'", text)))
    }

    fn lex_string(&mut self, quote: u8) -> Result<TokenKind> {
        self.advance();
        let mut bytes = Vec::new();
        loop {
            match self.advance() {
                None | Some(b'\n') => return Err(self.error("unterminated string")),
                Some(c) if c == quote => break,
                Some(b'\\') => {
                    let escaped = match self.advance() {
                        Some(b'n') => b'\n',
                        Some(b't') => b'\t',
                        Some(c @ (b'\\' | b'"' | b'\'')) => c,
                        _ => return Err(self.error("invalid escape sequence")),
                    };
                    bytes.push(escaped);
                }
                Some(c) => bytes.push(c),
            }
        }
        String::from_utf8(bytes)
            .map(TokenKind::Str)
            .map_err(|_| self.error("string is not valid UTF-8"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_operators_and_literals() {
        assert_eq!(
            kinds(r#"a.B == "x" && n >= 2.5"#),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Dot,
                TokenKind::Ident("B".into()),
                TokenKind::Eq,
                TokenKind::Str("x".into()),
                TokenKind::And,
                TokenKind::Ident("n".into()),
                TokenKind::Ge,
                TokenKind::Number(2.5),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_comments_and_separators() {
        assert_eq!(
            kinds("x = 1 # note\n// whole line\nfn f() => true;"),
            vec![
                TokenKind::Ident("x".into()),
                TokenKind::Assign,
                TokenKind::Number(1.0),
                TokenKind::Separator,
                TokenKind::Separator,
                TokenKind::Fn,
                TokenKind::Ident("f".into()),
                TokenKind::LParen,
                TokenKind::RParen,
                TokenKind::Arrow,
                TokenKind::True,
                TokenKind::Separator,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#"'it\'s' "a\"b""#),
            vec![
                TokenKind::Str("it's".into()),
                TokenKind::Str("a\"b".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_errors_carry_position() {
        let err = Lexer::tokenize("x = \n @").unwrap_err();
        assert!(err.to_string().contains("2:2"));
        assert!(Lexer::tokenize("\"open").is_err());
    }
}
