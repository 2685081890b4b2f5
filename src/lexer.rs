use logos::Logos;
use std::fmt;

use crate::Span;

#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[logos(skip r"[ \t\n\r]+")] // Skip whitespace
pub enum TokenKind {
    // Produced by `Lexer::next_token`, never by logos itself
    Illegal,
    Eof,

    #[regex("[a-zA-Z_]+")]
    Ident,
    #[regex("[0-9]+")]
    Int,
    // No escapes; an unterminated string runs to the end of the input
    #[regex(r#""[^"]*"?"#)]
    String,

    #[token("=")]
    Assign,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("!")]
    Bang,
    #[token("*")]
    Asterisk,
    #[token("/")]
    Slash,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("==")]
    Eq,
    #[token("!=")]
    NotEq,

    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,

    #[token("fn")]
    #[token("func")]
    Function,
    #[token("let")]
    Let,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("return")]
    Return,
    #[token("true")]
    True,
    #[token("false")]
    False,
}

impl TokenKind {
    pub const KEYWORDS: [&'static str; 9] = [
        "fn", "func", "let", "if", "else", "while", "return", "true", "false",
    ];
}

// These names show up verbatim in parse error messages
impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenKind::Illegal => "ILLEGAL",
            TokenKind::Eof => "EOF",
            TokenKind::Ident => "IDENT",
            TokenKind::Int => "INT",
            TokenKind::String => "STRING",
            TokenKind::Assign => "=",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Bang => "!",
            TokenKind::Asterisk => "*",
            TokenKind::Slash => "/",
            TokenKind::Lt => "<",
            TokenKind::Gt => ">",
            TokenKind::Eq => "==",
            TokenKind::NotEq => "!=",
            TokenKind::Comma => ",",
            TokenKind::Semicolon => ";",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::Function => "FUNCTION",
            TokenKind::Let => "LET",
            TokenKind::If => "IF",
            TokenKind::Else => "ELSE",
            TokenKind::While => "WHILE",
            TokenKind::Return => "RETURN",
            TokenKind::True => "TRUE",
            TokenKind::False => "FALSE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub literal: String,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, literal: impl Into<String>, span: Span) -> Self {
        Token {
            kind,
            literal: literal.into(),
            span,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?} @ {}", self.kind, self.literal, self.span)
    }
}

/// Pull-based lexer over a source string.
///
/// The lexer never fails: characters that start no token come back as
/// [`TokenKind::Illegal`], and once the input is exhausted every further call
/// to [`Lexer::next_token`] yields an [`TokenKind::Eof`] token.
pub struct Lexer<'src> {
    inner: logos::Lexer<'src, TokenKind>,
    len: usize,
    exhausted: bool,
}

impl<'src> Lexer<'src> {
    pub fn new(input: &'src str) -> Self {
        Lexer {
            inner: TokenKind::lexer(input),
            len: input.len(),
            exhausted: false,
        }
    }

    pub fn next_token(&mut self) -> Token {
        if self.exhausted {
            return self.eof();
        }
        match self.inner.next() {
            Some(Ok(kind)) => {
                let slice = self.inner.slice();
                let literal = match kind {
                    TokenKind::String => string_contents(slice),
                    _ => slice,
                };
                Token::new(kind, literal, self.inner.span().into())
            }
            Some(Err(())) => Token::new(
                TokenKind::Illegal,
                self.inner.slice(),
                self.inner.span().into(),
            ),
            None => {
                self.exhausted = true;
                self.eof()
            }
        }
    }

    fn eof(&self) -> Token {
        Token::new(TokenKind::Eof, "", Span::new(self.len, self.len))
    }
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    // Unlike `next_token`, iteration stops at the end of input.
    fn next(&mut self) -> Option<Token> {
        let token = self.next_token();
        (token.kind != TokenKind::Eof).then_some(token)
    }
}

// Strips the opening quote and, when present, the closing one.
fn string_contents(slice: &str) -> &str {
    let body = &slice[1..];
    body.strip_suffix('"').unwrap_or(body)
}

// Helper function to tokenize a string directly (useful for tests and tooling)
pub fn tokenize(input: &str) -> Vec<Token> {
    Lexer::new(input).collect()
}
