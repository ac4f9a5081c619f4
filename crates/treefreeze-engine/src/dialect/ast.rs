//! Syntax tree of the reference and staged dialects

use super::token::Span;

/// A parsed source file: a sequence of function definitions
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub functions: Vec<FunctionDef>,
}

impl Module {
    pub fn function(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// How a function was introduced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// `def`
    Def,
    /// `cdef`, callable from compiled code only
    Cdef,
    /// `cpdef`, callable from both sides
    Cpdef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub kind: FunctionKind,
    pub name: String,
    /// Declared return type (`double`, `void`), absent for `def`
    pub return_type: Option<String>,
    pub params: Vec<Param>,
    /// Trailing qualifiers such as `noexcept nogil`
    pub qualifiers: Vec<String>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    /// Declared type, tokens joined by spaces (`double`, `const double [ : , : : 1 ]`)
    pub ty: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `if cond: ... else: ...`; `elif` chains nest in `otherwise`
    If {
        cond: Expr,
        then: Vec<Stmt>,
        otherwise: Vec<Stmt>,
        span: Span,
    },
    Return {
        value: Option<Expr>,
        span: Span,
    },
    /// `target = value`
    Assign {
        target: Expr,
        value: Expr,
        span: Span,
    },
    /// `name += value` and friends
    AugAssign {
        target: String,
        op: BinOp,
        value: Expr,
        span: Span,
    },
    /// `cdef <type> name [= init]`
    Declare {
        ty: String,
        name: String,
        init: Option<Expr>,
        span: Span,
    },
    /// `for var in iter: ...`
    For {
        var: String,
        iter: Expr,
        body: Vec<Stmt>,
        span: Span,
    },
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::If { span, .. }
            | Stmt::Return { span, .. }
            | Stmt::Assign { span, .. }
            | Stmt::AugAssign { span, .. }
            | Stmt::Declare { span, .. }
            | Stmt::For { span, .. } => *span,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Le,
    Lt,
    Ge,
    Gt,
    Eq,
    Ne,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64, Span),
    Name(String, Span),
    Call {
        func: String,
        args: Vec<Expr>,
        span: Span,
    },
    /// `base[i, j]`
    Index {
        base: Box<Expr>,
        indices: Vec<Expr>,
        span: Span,
    },
    /// `base.attr`
    Attribute {
        base: Box<Expr>,
        attr: String,
        span: Span,
    },
    Neg(Box<Expr>, Span),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        span: Span,
    },
    Compare {
        op: CmpOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Number(_, span) | Expr::Name(_, span) | Expr::Neg(_, span) => *span,
            Expr::Call { span, .. }
            | Expr::Index { span, .. }
            | Expr::Attribute { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Compare { span, .. } => *span,
        }
    }

    /// Value of a numeric literal, possibly negated
    pub fn as_constant(&self) -> Option<f64> {
        match self {
            Expr::Number(n, _) => Some(*n),
            Expr::Neg(inner, _) => inner.as_constant().map(|n| -n),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Expr::Name(name, _) => Some(name),
            _ => None,
        }
    }
}
