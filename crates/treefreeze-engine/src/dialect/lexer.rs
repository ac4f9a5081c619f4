//! Indentation-aware lexer built on logos.
//!
//! Logos splits each line into tokens; the wrapper tracks line starts and
//! turns leading whitespace into `Indent`/`Dedent` tokens the way the host
//! language does. Newlines inside brackets do not end a logical line.

use super::token::{Span, Token};
use super::SyntaxError;
use logos::Logos;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\f]+")]
enum LogosToken {
    #[regex(r"#[^\n]*", logos::skip)]
    Comment,

    #[token("\n")]
    Newline,

    #[token("def")]
    Def,

    #[token("cdef")]
    Cdef,

    #[token("cpdef")]
    Cpdef,

    #[token("if")]
    If,

    #[token("elif")]
    Elif,

    #[token("else")]
    Else,

    #[token("return")]
    Return,

    #[token("for")]
    For,

    #[token("in")]
    In,

    #[regex(r"[0-9]+(\.[0-9]*)?([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Number(f64),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Name(String),

    #[token("+=")]
    PlusAssign,

    #[token("-=")]
    MinusAssign,

    #[token("*=")]
    StarAssign,

    #[token("/=")]
    SlashAssign,

    #[token("<=")]
    LessEqual,

    #[token(">=")]
    GreaterEqual,

    #[token("==")]
    EqualEqual,

    #[token("!=")]
    NotEqual,

    #[token("+")]
    Plus,

    #[token("-")]
    Minus,

    #[token("*")]
    Star,

    #[token("/")]
    Slash,

    #[token("=")]
    Assign,

    #[token("<")]
    Less,

    #[token(">")]
    Greater,

    #[token("(")]
    LeftParen,

    #[token(")")]
    RightParen,

    #[token("[")]
    LeftBracket,

    #[token("]")]
    RightBracket,

    #[token(",")]
    Comma,

    #[token(":")]
    Colon,

    #[token(".")]
    Dot,
}

impl LogosToken {
    fn into_token(self) -> Token {
        match self {
            LogosToken::Comment | LogosToken::Newline => Token::Newline,
            LogosToken::Def => Token::Def,
            LogosToken::Cdef => Token::Cdef,
            LogosToken::Cpdef => Token::Cpdef,
            LogosToken::If => Token::If,
            LogosToken::Elif => Token::Elif,
            LogosToken::Else => Token::Else,
            LogosToken::Return => Token::Return,
            LogosToken::For => Token::For,
            LogosToken::In => Token::In,
            LogosToken::Number(n) => Token::Number(n),
            LogosToken::Name(name) => Token::Name(name),
            LogosToken::PlusAssign => Token::PlusAssign,
            LogosToken::MinusAssign => Token::MinusAssign,
            LogosToken::StarAssign => Token::StarAssign,
            LogosToken::SlashAssign => Token::SlashAssign,
            LogosToken::LessEqual => Token::LessEqual,
            LogosToken::GreaterEqual => Token::GreaterEqual,
            LogosToken::EqualEqual => Token::EqualEqual,
            LogosToken::NotEqual => Token::NotEqual,
            LogosToken::Plus => Token::Plus,
            LogosToken::Minus => Token::Minus,
            LogosToken::Star => Token::Star,
            LogosToken::Slash => Token::Slash,
            LogosToken::Assign => Token::Assign,
            LogosToken::Less => Token::Less,
            LogosToken::Greater => Token::Greater,
            LogosToken::LeftParen => Token::LeftParen,
            LogosToken::RightParen => Token::RightParen,
            LogosToken::LeftBracket => Token::LeftBracket,
            LogosToken::RightBracket => Token::RightBracket,
            LogosToken::Comma => Token::Comma,
            LogosToken::Colon => Token::Colon,
            LogosToken::Dot => Token::Dot,
        }
    }
}

/// Tokenizer for one source text
pub struct Lexer<'a> {
    source: &'a str,
    tokens: Vec<(Token, Span)>,
    indents: Vec<usize>,
    line: u32,
    line_start: usize,
    /// Nesting depth of `(` and `[`
    depth: usize,
    /// No token has been emitted on the current logical line yet
    at_line_start: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            tokens: Vec::new(),
            indents: vec![0],
            line: 1,
            line_start: 0,
            depth: 0,
            at_line_start: true,
        }
    }

    /// Tokenize the whole source, ending with `Newline`, pending `Dedent`s and `Eof`
    pub fn tokenize(mut self) -> Result<Vec<(Token, Span)>, SyntaxError> {
        let mut lex = LogosToken::lexer(self.source);

        while let Some(result) = lex.next() {
            let range = lex.span();
            let span = self.span_at(range.start, range.end);

            let token = match result {
                Ok(token) => token,
                Err(()) => {
                    let text = &self.source[range.clone()];
                    let message = match text.chars().next() {
                        Some(c) if c.is_ascii_digit() || c == '.' => {
                            format!("invalid number '{}'", text)
                        }
                        Some(c) => format!("unexpected character '{}'", c),
                        None => "unexpected input".to_string(),
                    };
                    return Err(SyntaxError::new(message, span));
                }
            };

            if token == LogosToken::Newline {
                if self.depth == 0 && !self.at_line_start {
                    self.tokens.push((Token::Newline, span));
                    self.at_line_start = true;
                }
                self.line += 1;
                self.line_start = range.end;
                continue;
            }

            if self.at_line_start && self.depth == 0 {
                self.layout(range.start - self.line_start, span)?;
                self.at_line_start = false;
            }

            match token {
                LogosToken::LeftParen | LogosToken::LeftBracket => self.depth += 1,
                LogosToken::RightParen | LogosToken::RightBracket => {
                    self.depth = self.depth.saturating_sub(1)
                }
                _ => {}
            }
            self.tokens.push((token.into_token(), span));
        }

        let end = self.span_at(self.source.len(), self.source.len());
        if !self.at_line_start {
            self.tokens.push((Token::Newline, end));
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.tokens.push((Token::Dedent, end));
        }
        self.tokens.push((Token::Eof, end));

        Ok(self.tokens)
    }

    /// Emit `Indent`/`Dedent` for a logical line starting at column `width`
    fn layout(&mut self, width: usize, span: Span) -> Result<(), SyntaxError> {
        let current = self.indents.last().copied().unwrap_or(0);
        if width > current {
            self.indents.push(width);
            self.tokens.push((Token::Indent, span));
        } else if width < current {
            while self.indents.last().is_some_and(|&level| level > width) {
                self.indents.pop();
                self.tokens.push((Token::Dedent, span));
            }
            if self.indents.last().copied() != Some(width) {
                return Err(SyntaxError::new(
                    "unindent does not match any outer indentation level",
                    span,
                ));
            }
        }
        Ok(())
    }

    fn span_at(&self, start: usize, end: usize) -> Span {
        let column = (start.saturating_sub(self.line_start) + 1) as u32;
        Span::new(start, end, self.line, column)
    }
}
