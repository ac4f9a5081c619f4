//! Recursive descent parser
//!
//! Types are kept as opaque token text: the parser only needs to find the
//! name a declaration introduces (its last identifier) and leaves the
//! meaning of `double`, `const double[:, ::1]` and friends to consumers.

use super::ast::*;
use super::lexer::Lexer;
use super::token::{Span, Token};
use super::SyntaxError;

/// Maximum nesting of blocks and expressions
pub const MAX_NESTING: usize = 400;

pub struct Parser {
    tokens: Vec<(Token, Span)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    /// Tokenize `source` and prepare to parse it
    pub fn new(source: &str) -> Result<Self, SyntaxError> {
        let tokens = Lexer::new(source).tokenize()?;
        Ok(Self {
            tokens,
            pos: 0,
            depth: 0,
        })
    }

    /// Parse the whole file
    pub fn parse(mut self) -> Result<Module, SyntaxError> {
        let mut functions = Vec::new();
        loop {
            match self.current() {
                Token::Eof => break,
                Token::Newline => {
                    self.advance();
                }
                Token::Def | Token::Cdef | Token::Cpdef => functions.push(self.parse_function()?),
                _ => return Err(self.unexpected("a function definition")),
            }
        }
        Ok(Module { functions })
    }

    // Token management

    fn current(&self) -> &Token {
        &self.tokens[self.pos].0
    }

    fn current_span(&self) -> Span {
        self.tokens[self.pos].1
    }

    fn advance(&mut self) -> (Token, Span) {
        let entry = self.tokens[self.pos].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        entry
    }

    fn check(&self, expected: &Token) -> bool {
        std::mem::discriminant(self.current()) == std::mem::discriminant(expected)
    }

    fn expect(&mut self, expected: Token) -> Result<Span, SyntaxError> {
        if self.check(&expected) {
            Ok(self.advance().1)
        } else {
            Err(self.unexpected(&format!("'{}'", expected)))
        }
    }

    fn expect_name(&mut self) -> Result<(String, Span), SyntaxError> {
        if !self.check(&Token::Name(String::new())) {
            return Err(self.unexpected("a name"));
        }
        match self.advance() {
            (Token::Name(name), span) => Ok((name, span)),
            _ => Err(self.unexpected("a name")),
        }
    }

    fn unexpected(&self, expected: &str) -> SyntaxError {
        SyntaxError::new(
            format!("expected {}, found {}", expected, self.current()),
            self.current_span(),
        )
    }

    fn enter(&mut self) -> Result<(), SyntaxError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(SyntaxError::new(
                format!("nesting deeper than {} levels", MAX_NESTING),
                self.current_span(),
            ));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    // Declarations

    fn parse_function(&mut self) -> Result<FunctionDef, SyntaxError> {
        let (keyword, start) = self.advance();
        let kind = match keyword {
            Token::Def => FunctionKind::Def,
            Token::Cdef => FunctionKind::Cdef,
            _ => FunctionKind::Cpdef,
        };

        let (return_type, name) = match kind {
            FunctionKind::Def => (None, self.expect_name()?.0),
            _ => {
                let header = self.collect_until(|t| matches!(t, Token::LeftParen))?;
                let (ty, name) = split_declaration(&header, start)?;
                (ty, name)
            }
        };

        self.expect(Token::LeftParen)?;
        let params = self.parse_params()?;
        self.expect(Token::RightParen)?;

        let mut qualifiers = Vec::new();
        while let Token::Name(q) = self.current() {
            qualifiers.push(q.clone());
            self.advance();
        }

        let body = self.parse_block()?;
        let span = body.last().map_or(start, |s| start.merge(&s.span()));
        Ok(FunctionDef {
            kind,
            name,
            return_type,
            params,
            qualifiers,
            body,
            span,
        })
    }

    fn parse_params(&mut self) -> Result<Vec<Param>, SyntaxError> {
        let mut params = Vec::new();
        if self.check(&Token::RightParen) {
            return Ok(params);
        }
        loop {
            let tokens = self.collect_until(|t| matches!(t, Token::Comma | Token::RightParen))?;
            let span = tokens.first().map_or(self.current_span(), |(_, s)| *s);
            let (ty, name) = split_declaration(&tokens, span)?;
            params.push(Param { name, ty, span });
            if self.check(&Token::Comma) {
                self.advance();
            } else {
                return Ok(params);
            }
        }
    }

    /// Tokens up to (not including) the first depth-0 token matching `stop`
    fn collect_until(
        &mut self,
        stop: impl Fn(&Token) -> bool,
    ) -> Result<Vec<(Token, Span)>, SyntaxError> {
        let mut tokens = Vec::new();
        let mut depth = 0usize;
        loop {
            let token = self.current();
            if depth == 0 && stop(token) {
                return Ok(tokens);
            }
            match token {
                Token::Newline | Token::Eof | Token::Indent | Token::Dedent => {
                    return Err(self.unexpected("a declaration"));
                }
                Token::LeftBracket | Token::LeftParen => depth += 1,
                Token::RightBracket | Token::RightParen => {
                    if depth == 0 {
                        return Err(self.unexpected("a declaration"));
                    }
                    depth -= 1;
                }
                _ => {}
            }
            tokens.push(self.advance());
        }
    }

    // Statements

    /// `: NEWLINE INDENT stmt+ DEDENT`
    fn parse_block(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        self.expect(Token::Colon)?;
        self.expect(Token::Newline)?;
        self.expect(Token::Indent)?;
        self.enter()?;

        let mut body = Vec::new();
        while !self.check(&Token::Dedent) && !self.check(&Token::Eof) {
            body.push(self.parse_statement()?);
        }
        self.expect(Token::Dedent)?;

        self.leave();
        Ok(body)
    }

    fn parse_statement(&mut self) -> Result<Stmt, SyntaxError> {
        match self.current() {
            Token::If => {
                let start = self.advance().1;
                self.parse_if_rest(start)
            }
            Token::Return => {
                let span = self.advance().1;
                let value = if self.check(&Token::Newline) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.expect(Token::Newline)?;
                Ok(Stmt::Return { value, span })
            }
            Token::Cdef => {
                let start = self.advance().1;
                let decl = self.collect_until(|t| matches!(t, Token::Assign | Token::Newline))?;
                let (ty, name) = split_declaration(&decl, start)?;
                let init = if self.check(&Token::Assign) {
                    self.advance();
                    Some(self.parse_expression()?)
                } else {
                    None
                };
                self.expect(Token::Newline)?;
                Ok(Stmt::Declare {
                    ty: ty.unwrap_or_default(),
                    name,
                    init,
                    span: start,
                })
            }
            Token::For => {
                let span = self.advance().1;
                let (var, _) = self.expect_name()?;
                self.expect(Token::In)?;
                let iter = self.parse_expression()?;
                let body = self.parse_block()?;
                Ok(Stmt::For {
                    var,
                    iter,
                    body,
                    span,
                })
            }
            _ => self.parse_assignment(),
        }
    }

    /// Condition and branches after `if` or `elif`
    fn parse_if_rest(&mut self, span: Span) -> Result<Stmt, SyntaxError> {
        let cond = self.parse_expression()?;
        let then = self.parse_block()?;
        let otherwise = match self.current() {
            Token::Elif => {
                let elif = self.advance().1;
                self.enter()?;
                let nested = self.parse_if_rest(elif)?;
                self.leave();
                vec![nested]
            }
            Token::Else => {
                self.advance();
                self.parse_block()?
            }
            _ => Vec::new(),
        };
        Ok(Stmt::If {
            cond,
            then,
            otherwise,
            span,
        })
    }

    fn parse_assignment(&mut self) -> Result<Stmt, SyntaxError> {
        let target = self.parse_expression()?;
        let span = target.span();
        let op = match self.current() {
            Token::Assign => None,
            Token::PlusAssign => Some(BinOp::Add),
            Token::MinusAssign => Some(BinOp::Sub),
            Token::StarAssign => Some(BinOp::Mul),
            Token::SlashAssign => Some(BinOp::Div),
            _ => return Err(self.unexpected("an assignment")),
        };
        self.advance();
        let value = self.parse_expression()?;
        self.expect(Token::Newline)?;

        match op {
            None => Ok(Stmt::Assign {
                target,
                value,
                span,
            }),
            Some(op) => match target {
                Expr::Name(target, span) => Ok(Stmt::AugAssign {
                    target,
                    op,
                    value,
                    span,
                }),
                other => Err(SyntaxError::new(
                    "augmented assignment needs a plain name",
                    other.span(),
                )),
            },
        }
    }

    // Expressions

    pub(super) fn parse_expression(&mut self) -> Result<Expr, SyntaxError> {
        self.enter()?;
        let expr = self.parse_comparison();
        self.leave();
        expr
    }

    fn parse_comparison(&mut self) -> Result<Expr, SyntaxError> {
        let lhs = self.parse_additive()?;
        let op = match self.current() {
            Token::LessEqual => CmpOp::Le,
            Token::Less => CmpOp::Lt,
            Token::GreaterEqual => CmpOp::Ge,
            Token::Greater => CmpOp::Gt,
            Token::EqualEqual => CmpOp::Eq,
            Token::NotEqual => CmpOp::Ne,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_additive()?;
        let span = lhs.span().merge(&rhs.span());
        Ok(Expr::Compare {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            span,
        })
    }

    fn parse_additive(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.current() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.current() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, SyntaxError> {
        match self.current() {
            Token::Minus => {
                let span = self.advance().1;
                self.enter()?;
                let operand = self.parse_unary()?;
                self.leave();
                let span = span.merge(&operand.span());
                Ok(Expr::Neg(Box::new(operand), span))
            }
            Token::Plus => {
                self.advance();
                self.parse_unary()
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.current() {
                Token::LeftParen => {
                    let func = match expr {
                        Expr::Name(name, _) => name,
                        other => {
                            return Err(SyntaxError::new(
                                "only named functions can be called",
                                other.span(),
                            ))
                        }
                    };
                    let start = self.advance().1;
                    let args = self.parse_list(Token::RightParen)?;
                    let end = self.expect(Token::RightParen)?;
                    expr = Expr::Call {
                        func,
                        args,
                        span: start.merge(&end),
                    };
                }
                Token::LeftBracket => {
                    self.advance();
                    let indices = self.parse_list(Token::RightBracket)?;
                    let end = self.expect(Token::RightBracket)?;
                    let span = expr.span().merge(&end);
                    expr = Expr::Index {
                        base: Box::new(expr),
                        indices,
                        span,
                    };
                }
                Token::Dot => {
                    self.advance();
                    let (attr, end) = self.expect_name()?;
                    let span = expr.span().merge(&end);
                    expr = Expr::Attribute {
                        base: Box::new(expr),
                        attr,
                        span,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    /// Comma-separated expressions up to `close` (not consumed)
    fn parse_list(&mut self, close: Token) -> Result<Vec<Expr>, SyntaxError> {
        let mut items = Vec::new();
        while !self.check(&close) {
            items.push(self.parse_expression()?);
            if self.check(&Token::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        Ok(items)
    }

    fn parse_primary(&mut self) -> Result<Expr, SyntaxError> {
        match self.current().clone() {
            Token::Number(n) => Ok(Expr::Number(n, self.advance().1)),
            Token::Name(name) => Ok(Expr::Name(name, self.advance().1)),
            Token::LeftParen => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(Token::RightParen)?;
                Ok(inner)
            }
            _ => Err(self.unexpected("an expression")),
        }
    }
}

fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    let span = lhs.span().merge(&rhs.span());
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
        span,
    }
}

/// Split `<type tokens> <name>` into the type text and the name
fn split_declaration(
    tokens: &[(Token, Span)],
    fallback: Span,
) -> Result<(Option<String>, String), SyntaxError> {
    match tokens.split_last() {
        Some(((Token::Name(name), _), ty)) => {
            let ty = if ty.is_empty() {
                None
            } else {
                Some(
                    ty.iter()
                        .map(|(t, _)| t.to_string())
                        .collect::<Vec<_>>()
                        .join(" "),
                )
            };
            Ok((ty, name.clone()))
        }
        Some((_, _)) | None => {
            let span = tokens.last().map_or(fallback, |(_, s)| *s);
            Err(SyntaxError::new("expected a declared name", span))
        }
    }
}
