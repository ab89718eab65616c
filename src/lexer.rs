// File: src/lexer.rs
//
// Hand-written tokenizer for Lumen source text, feeding the parser which
// produces an abstract syntax tree. Kept deliberately small since the core
// this crate implements is the compiler and VM, not language surface.

use crate::errors::{Diagnostic, SourceLocation};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Identifier(String),
    Number(f64),
    String(String),
    Keyword(&'static str),

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    Eq,
    EqEq,
    BangEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AndAnd,
    OrOr,
    Question,
    Colon,
    ColonColon,

    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Ellipsis,
    Semicolon,

    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

const KEYWORDS: &[&str] = &[
    "var", "fun", "class", "extends", "if", "elif", "else", "while", "for", "in", "return",
    "break", "continue", "try", "except", "ensure", "raise", "import", "as", "null", "true",
    "false", "and", "or", "not", "this", "super",
];

pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self { chars: source.chars().peekable(), line: 1, column: 1 }
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next();
        match c {
            Some('\n') => {
                self.line += 1;
                self.column = 1;
            }
            Some(_) => self.column += 1,
            None => {}
        }
        c
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn matches(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(' ') | Some('\t') | Some('\r') | Some('\n') => {
                    self.advance();
                }
                Some('#') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some('/') => {
                    let mut it = self.chars.clone();
                    it.next();
                    if it.next() == Some('/') {
                        while let Some(c) = self.peek() {
                            if c == '\n' {
                                break;
                            }
                            self.advance();
                        }
                    } else {
                        break;
                    }
                }
                _ => break,
            }
        }
    }

    fn read_string(&mut self, line: usize, column: usize) -> Result<Token, Diagnostic> {
        let mut s = String::new();
        loop {
            match self.advance() {
                None => {
                    return Err(Diagnostic::syntax(
                        "unterminated string literal",
                        SourceLocation::new(line, column),
                    ))
                }
                Some('"') => break,
                Some('\\') => match self.advance() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some('r') => s.push('\r'),
                    Some('0') => s.push('\0'),
                    Some('\\') => s.push('\\'),
                    Some('"') => s.push('"'),
                    Some(other) => s.push(other),
                    None => {
                        return Err(Diagnostic::syntax(
                            "unterminated escape in string literal",
                            SourceLocation::new(line, column),
                        ))
                    }
                },
                Some(c) => s.push(c),
            }
        }
        Ok(Token { kind: TokenKind::String(s), line, column })
    }

    fn read_number(&mut self, first: char, line: usize, column: usize) -> Token {
        let mut num = String::new();
        num.push(first);
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                num.push(c);
                self.advance();
            } else {
                break;
            }
        }
        if self.peek() == Some('.') {
            let mut lookahead = self.chars.clone();
            lookahead.next();
            if lookahead.next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
                num.push('.');
                self.advance();
                while let Some(c) = self.peek() {
                    if c.is_ascii_digit() {
                        num.push(c);
                        self.advance();
                    } else {
                        break;
                    }
                }
            }
        }
        let value = num.parse().unwrap_or(0.0);
        Token { kind: TokenKind::Number(value), line, column }
    }

    fn read_identifier(&mut self, first: char, line: usize, column: usize) -> Token {
        let mut ident = String::new();
        ident.push(first);
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                ident.push(c);
                self.advance();
            } else {
                break;
            }
        }
        if let Some(kw) = KEYWORDS.iter().find(|k| **k == ident) {
            Token { kind: TokenKind::Keyword(kw), line, column }
        } else {
            Token { kind: TokenKind::Identifier(ident), line, column }
        }
    }

    pub fn next_token(&mut self) -> Result<Token, Diagnostic> {
        self.skip_trivia();
        let line = self.line;
        let column = self.column;

        let Some(c) = self.advance() else {
            return Ok(Token { kind: TokenKind::Eof, line, column });
        };

        let kind = match c {
            '"' => return self.read_string(line, column).map(|t| t),
            '0'..='9' => return Ok(self.read_number(c, line, column)),
            c if c.is_alphabetic() || c == '_' => return Ok(self.read_identifier(c, line, column)),
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '!' => {
                if self.matches('=') {
                    TokenKind::BangEq
                } else {
                    TokenKind::Bang
                }
            }
            '=' => {
                if self.matches('=') {
                    TokenKind::EqEq
                } else {
                    TokenKind::Eq
                }
            }
            '<' => {
                if self.matches('=') {
                    TokenKind::LtEq
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.matches('=') {
                    TokenKind::GtEq
                } else {
                    TokenKind::Gt
                }
            }
            '&' if self.matches('&') => TokenKind::AndAnd,
            '|' if self.matches('|') => TokenKind::OrOr,
            '?' => TokenKind::Question,
            ':' => {
                if self.matches(':') {
                    TokenKind::ColonColon
                } else {
                    TokenKind::Colon
                }
            }
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            '.' => {
                if self.peek() == Some('.') {
                    let mut it = self.chars.clone();
                    it.next();
                    if it.next() == Some('.') {
                        self.advance();
                        self.advance();
                        TokenKind::Ellipsis
                    } else {
                        TokenKind::Dot
                    }
                } else {
                    TokenKind::Dot
                }
            }
            ';' => TokenKind::Semicolon,
            other => {
                return Err(Diagnostic::syntax(
                    format!("unexpected character '{}'", other),
                    SourceLocation::new(line, column),
                ))
            }
        };

        Ok(Token { kind, line, column })
    }
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, Diagnostic> {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_arithmetic() {
        let tokens = tokenize("1 + 2 * 3").unwrap();
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Number(1.0),
                TokenKind::Plus,
                TokenKind::Number(2.0),
                TokenKind::Star,
                TokenKind::Number(3.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn tokenizes_keywords_and_identifiers() {
        let tokens = tokenize("fun foo").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Keyword("fun"));
        assert_eq!(tokens[1].kind, TokenKind::Identifier("foo".to_string()));
    }

    #[test]
    fn rejects_unterminated_string() {
        assert!(tokenize("\"abc").is_err());
    }
}
