//! Tokens and source locations

use std::fmt;

/// A token of the reference and staged dialects
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Keywords
    Def,
    Cdef,
    Cpdef,
    If,
    Elif,
    Else,
    Return,
    For,
    In,

    // Literals and names
    Number(f64),
    Name(String),

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    LessEqual,
    Less,
    GreaterEqual,
    Greater,
    EqualEqual,
    NotEqual,

    // Punctuation
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    Comma,
    Colon,
    Dot,

    // Layout
    Newline,
    Indent,
    Dedent,
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Def => write!(f, "def"),
            Token::Cdef => write!(f, "cdef"),
            Token::Cpdef => write!(f, "cpdef"),
            Token::If => write!(f, "if"),
            Token::Elif => write!(f, "elif"),
            Token::Else => write!(f, "else"),
            Token::Return => write!(f, "return"),
            Token::For => write!(f, "for"),
            Token::In => write!(f, "in"),
            Token::Number(n) => write!(f, "{}", n),
            Token::Name(name) => write!(f, "{}", name),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Assign => write!(f, "="),
            Token::PlusAssign => write!(f, "+="),
            Token::MinusAssign => write!(f, "-="),
            Token::StarAssign => write!(f, "*="),
            Token::SlashAssign => write!(f, "/="),
            Token::LessEqual => write!(f, "<="),
            Token::Less => write!(f, "<"),
            Token::GreaterEqual => write!(f, ">="),
            Token::Greater => write!(f, ">"),
            Token::EqualEqual => write!(f, "=="),
            Token::NotEqual => write!(f, "!="),
            Token::LeftParen => write!(f, "("),
            Token::RightParen => write!(f, ")"),
            Token::LeftBracket => write!(f, "["),
            Token::RightBracket => write!(f, "]"),
            Token::Comma => write!(f, ","),
            Token::Colon => write!(f, ":"),
            Token::Dot => write!(f, "."),
            Token::Newline => write!(f, "newline"),
            Token::Indent => write!(f, "indent"),
            Token::Dedent => write!(f, "dedent"),
            Token::Eof => write!(f, "end of file"),
        }
    }
}

/// Source location of a token or syntax node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub fn new(start: usize, end: usize, line: u32, column: u32) -> Self {
        Self {
            start,
            end,
            line,
            column,
        }
    }

    /// Span covering `self` through `other`
    pub fn merge(&self, other: &Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            line: self.line,
            column: self.column,
        }
    }

    pub fn slice<'a>(&self, source: &'a str) -> &'a str {
        source.get(self.start..self.end).unwrap_or("")
    }
}

/// Render `message` at `span` with the offending source line and a caret
pub fn format_excerpt(source: &str, span: Span, message: &str) -> String {
    let mut result = format!("Error at {}:{}: {}\n", span.line, span.column, message);

    if let Some(error_line) = source.lines().nth(span.line.saturating_sub(1) as usize) {
        result.push_str("  |\n");
        result.push_str(&format!("{:3} | {}\n", span.line, error_line));
        result.push_str(&format!(
            "  | {}^\n",
            " ".repeat(span.column.saturating_sub(1) as usize)
        ));
    }

    result
}
