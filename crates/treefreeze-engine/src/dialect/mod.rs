//! Front end of the reference and staged dialects
//!
//! Both dialects share one indentation-based grammar: the reference dialect
//! uses `def` functions and is run by [`Interpreter`], the staged dialect
//! adds `cdef`/`cpdef` declarations and typed parameters and is translated
//! to tree bytecode by [`crate::staged`].

pub mod ast;
mod eval;
mod lexer;
mod parser;
mod token;

pub use eval::{EvalError, Interpreter, MAX_CALL_DEPTH};
pub use lexer::Lexer;
pub use parser::{Parser, MAX_NESTING};
pub use token::{format_excerpt, Span, Token};

use thiserror::Error;

/// Lexical or grammatical error anchored in the source
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Syntax error at {}:{}: {}", .span.line, .span.column, .message)]
pub struct SyntaxError {
    pub message: String,
    pub span: Span,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }

    /// The error with the offending line and a caret under its column
    pub fn format_with_source(&self, source: &str) -> String {
        format_excerpt(source, self.span, &self.message)
    }
}

/// Parse a whole source file
pub fn parse_module(source: &str) -> Result<ast::Module, SyntaxError> {
    Parser::new(source)?.parse()
}
