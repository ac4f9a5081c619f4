//! Tree-walking interpreter for the reference dialect

use super::ast::*;
use super::token::{format_excerpt, Span};
use rustc_hash::FxHashMap;
use thiserror::Error;

/// Maximum depth of nested function calls
pub const MAX_CALL_DEPTH: usize = 64;

/// Load-time or run-time failure of interpreted code
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Evaluation error at {}:{}: {}", .span.line, .span.column, .message)]
pub struct EvalError {
    pub message: String,
    pub span: Span,
}

impl EvalError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }

    pub fn format_with_source(&self, source: &str) -> String {
        format_excerpt(source, self.span, &self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Value {
    Float(f64),
    Bool(bool),
}

impl Value {
    fn as_float(self) -> f64 {
        match self {
            Value::Float(f) => f,
            Value::Bool(b) => f64::from(u8::from(b)),
        }
    }

    fn truthy(self) -> bool {
        match self {
            Value::Float(f) => f != 0.0,
            Value::Bool(b) => b,
        }
    }
}

/// A checked module ready to be called
#[derive(Debug)]
pub struct Interpreter {
    module: Module,
    index: FxHashMap<String, usize>,
}

impl Interpreter {
    /// Check `module` and prepare it for calls.
    ///
    /// Everything the interpreter cannot run is rejected here, so a loaded
    /// module only fails at call time on genuine run-time conditions.
    pub fn new(module: Module) -> Result<Self, EvalError> {
        let mut index = FxHashMap::default();
        for (i, function) in module.functions.iter().enumerate() {
            if index.insert(function.name.clone(), i).is_some() {
                return Err(EvalError::new(
                    format!("function '{}' is defined twice", function.name),
                    function.span,
                ));
            }
        }

        let interpreter = Self { module, index };
        for function in &interpreter.module.functions {
            interpreter.check_block(&function.body)?;
        }
        Ok(interpreter)
    }

    /// Number of parameters of `name`
    pub fn arity(&self, name: &str) -> Option<usize> {
        self.function(name).map(|f| f.params.len())
    }

    fn function(&self, name: &str) -> Option<&FunctionDef> {
        self.index.get(name).map(|&i| &self.module.functions[i])
    }

    /// Call `name` with float arguments and return its float result
    pub fn call(&self, name: &str, args: &[f64]) -> Result<f64, EvalError> {
        let function = self.function(name).ok_or_else(|| {
            EvalError::new(format!("no function named '{}'", name), Span::default())
        })?;
        if function.params.len() != args.len() {
            return Err(EvalError::new(
                format!(
                    "'{}' takes {} arguments, got {}",
                    name,
                    function.params.len(),
                    args.len()
                ),
                function.span,
            ));
        }
        let args: Vec<Value> = args.iter().map(|&a| Value::Float(a)).collect();
        Ok(self.invoke(function, args, 0)?.as_float())
    }

    // Load-time checks

    fn check_block(&self, body: &[Stmt]) -> Result<(), EvalError> {
        for stmt in body {
            match stmt {
                Stmt::If {
                    cond,
                    then,
                    otherwise,
                    ..
                } => {
                    self.check_expr(cond)?;
                    self.check_block(then)?;
                    self.check_block(otherwise)?;
                }
                Stmt::Return { value, .. } => {
                    if let Some(value) = value {
                        self.check_expr(value)?;
                    }
                }
                Stmt::Assign { target, value, .. } => {
                    if target.as_name().is_none() {
                        return Err(EvalError::new(
                            "only plain names can be assigned",
                            target.span(),
                        ));
                    }
                    self.check_expr(value)?;
                }
                Stmt::AugAssign { value, .. } => self.check_expr(value)?,
                Stmt::Declare { span, .. } | Stmt::For { span, .. } => {
                    return Err(EvalError::new(
                        "statement is not supported by the reference interpreter",
                        *span,
                    ));
                }
            }
        }
        Ok(())
    }

    fn check_expr(&self, expr: &Expr) -> Result<(), EvalError> {
        match expr {
            Expr::Number(..) | Expr::Name(..) => Ok(()),
            Expr::Call { func, args, span } => {
                let arity = self
                    .arity(func)
                    .ok_or_else(|| EvalError::new(format!("unknown function '{}'", func), *span))?;
                if arity != args.len() {
                    return Err(EvalError::new(
                        format!("'{}' takes {} arguments, got {}", func, arity, args.len()),
                        *span,
                    ));
                }
                args.iter().try_for_each(|a| self.check_expr(a))
            }
            Expr::Neg(inner, _) => self.check_expr(inner),
            Expr::Binary { lhs, rhs, .. } | Expr::Compare { lhs, rhs, .. } => {
                self.check_expr(lhs)?;
                self.check_expr(rhs)
            }
            Expr::Index { span, .. } | Expr::Attribute { span, .. } => Err(EvalError::new(
                "expression is not supported by the reference interpreter",
                *span,
            )),
        }
    }

    // Execution

    fn invoke(
        &self,
        function: &FunctionDef,
        args: Vec<Value>,
        depth: usize,
    ) -> Result<Value, EvalError> {
        if depth >= MAX_CALL_DEPTH {
            return Err(EvalError::new(
                format!("call depth exceeds {}", MAX_CALL_DEPTH),
                function.span,
            ));
        }

        let mut env: FxHashMap<&str, Value> = function
            .params
            .iter()
            .map(|p| p.name.as_str())
            .zip(args)
            .collect();

        match self.exec_block(&function.body, &mut env, depth)? {
            Some(value) => Ok(value),
            None => Err(EvalError::new(
                format!("'{}' finished without returning a value", function.name),
                function.span,
            )),
        }
    }

    fn exec_block<'m>(
        &'m self,
        body: &'m [Stmt],
        env: &mut FxHashMap<&'m str, Value>,
        depth: usize,
    ) -> Result<Option<Value>, EvalError> {
        for stmt in body {
            match stmt {
                Stmt::If {
                    cond,
                    then,
                    otherwise,
                    ..
                } => {
                    let branch = if self.eval(cond, env, depth)?.truthy() {
                        then
                    } else {
                        otherwise
                    };
                    if let Some(value) = self.exec_block(branch, env, depth)? {
                        return Ok(Some(value));
                    }
                }
                Stmt::Return { value, span } => {
                    let value = value
                        .as_ref()
                        .ok_or_else(|| EvalError::new("bare return has no value", *span))?;
                    return Ok(Some(self.eval(value, env, depth)?));
                }
                Stmt::Assign { target, value, .. } => {
                    let value = self.eval(value, env, depth)?;
                    if let Some(name) = target.as_name() {
                        env.insert(name, value);
                    }
                }
                Stmt::AugAssign {
                    target,
                    op,
                    value,
                    span,
                } => {
                    let current = *env.get(target.as_str()).ok_or_else(|| {
                        EvalError::new(format!("name '{}' is not defined", target), *span)
                    })?;
                    let rhs = self.eval(value, env, depth)?;
                    env.insert(target, Value::Float(arith(*op, current, rhs, *span)?));
                }
                Stmt::Declare { span, .. } | Stmt::For { span, .. } => {
                    return Err(EvalError::new("statement is not supported", *span));
                }
            }
        }
        Ok(None)
    }

    fn eval(
        &self,
        expr: &Expr,
        env: &FxHashMap<&str, Value>,
        depth: usize,
    ) -> Result<Value, EvalError> {
        match expr {
            Expr::Number(n, _) => Ok(Value::Float(*n)),
            Expr::Name(name, span) => env
                .get(name.as_str())
                .copied()
                .ok_or_else(|| EvalError::new(format!("name '{}' is not defined", name), *span)),
            Expr::Call { func, args, span } => {
                let function = self
                    .function(func)
                    .ok_or_else(|| EvalError::new(format!("unknown function '{}'", func), *span))?;
                let args = args
                    .iter()
                    .map(|a| self.eval(a, env, depth))
                    .collect::<Result<Vec<_>, _>>()?;
                self.invoke(function, args, depth + 1)
            }
            Expr::Neg(inner, _) => Ok(Value::Float(-self.eval(inner, env, depth)?.as_float())),
            Expr::Binary { op, lhs, rhs, span } => {
                let lhs = self.eval(lhs, env, depth)?;
                let rhs = self.eval(rhs, env, depth)?;
                Ok(Value::Float(arith(*op, lhs, rhs, *span)?))
            }
            Expr::Compare { op, lhs, rhs, .. } => {
                let lhs = self.eval(lhs, env, depth)?.as_float();
                let rhs = self.eval(rhs, env, depth)?.as_float();
                Ok(Value::Bool(match op {
                    CmpOp::Le => lhs <= rhs,
                    CmpOp::Lt => lhs < rhs,
                    CmpOp::Ge => lhs >= rhs,
                    CmpOp::Gt => lhs > rhs,
                    CmpOp::Eq => lhs == rhs,
                    CmpOp::Ne => lhs != rhs,
                }))
            }
            Expr::Index { span, .. } | Expr::Attribute { span, .. } => {
                Err(EvalError::new("expression is not supported", *span))
            }
        }
    }
}

fn arith(op: BinOp, lhs: Value, rhs: Value, span: Span) -> Result<f64, EvalError> {
    let (lhs, rhs) = (lhs.as_float(), rhs.as_float());
    match op {
        BinOp::Add => Ok(lhs + rhs),
        BinOp::Sub => Ok(lhs - rhs),
        BinOp::Mul => Ok(lhs * rhs),
        BinOp::Div if rhs == 0.0 => Err(EvalError::new("float division by zero", span)),
        BinOp::Div => Ok(lhs / rhs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::parse_module;

    fn load(source: &str) -> Interpreter {
        Interpreter::new(parse_module(source).unwrap()).unwrap()
    }

    #[test]
    fn test_stump() {
        let interp = load("def f(x0):\n    if x0 <= 2.5:\n        return 0.1\n    else:\n        return 0.9\n");
        assert_eq!(interp.call("f", &[1.0]).unwrap(), 0.1);
        assert_eq!(interp.call("f", &[2.5]).unwrap(), 0.1);
        assert_eq!(interp.call("f", &[3.0]).unwrap(), 0.9);
        assert_eq!(interp.call("f", &[f64::NAN]).unwrap(), 0.9);
    }

    #[test]
    fn test_calls_and_mean() {
        let interp = load(
            "def a(x):\n    return 0.25\n\ndef b(x):\n    return 0.5\n\ndef m(x):\n    return (a(x) + b(x)) / 2\n",
        );
        assert_eq!(interp.call("m", &[0.0]).unwrap(), 0.375);
        assert_eq!(interp.arity("m"), Some(1));
    }

    #[test]
    fn test_locals_and_aug_assign() {
        let interp = load("def f(x):\n    r = 0\n    r += x\n    r *= 3\n    return r\n");
        assert_eq!(interp.call("f", &[2.0]).unwrap(), 6.0);
    }

    #[test]
    fn test_unknown_function_rejected_at_load() {
        let module = parse_module("def f(x):\n    return g(x)\n").unwrap();
        let err = Interpreter::new(module).unwrap_err();
        assert!(err.message.contains("unknown function 'g'"));
        assert_eq!(err.span.line, 2);
    }

    #[test]
    fn test_arity_mismatch_rejected_at_load() {
        let module = parse_module("def g(a, b):\n    return a\n\ndef f(x):\n    return g(x)\n").unwrap();
        assert!(Interpreter::new(module).is_err());
    }

    #[test]
    fn test_duplicate_function() {
        let module = parse_module("def f(x):\n    return x\n\ndef f(x):\n    return x\n").unwrap();
        assert!(Interpreter::new(module).unwrap_err().message.contains("twice"));
    }

    #[test]
    fn test_cython_statements_rejected() {
        let module = parse_module("def f(x):\n    cdef double r = 0\n    return r\n").unwrap();
        assert!(Interpreter::new(module).is_err());
    }

    #[test]
    fn test_undefined_name_at_call() {
        let interp = load("def f(x):\n    return y\n");
        let err = interp.call("f", &[1.0]).unwrap_err();
        assert_eq!(err.message, "name 'y' is not defined");
    }

    #[test]
    fn test_missing_return() {
        let interp = load("def f(x):\n    if x <= 0:\n        return 1\n");
        assert_eq!(interp.call("f", &[-1.0]).unwrap(), 1.0);
        assert!(interp.call("f", &[1.0]).is_err());
    }

    #[test]
    fn test_recursion_limit() {
        let interp = load("def f(x):\n    return f(x)\n");
        let err = interp.call("f", &[1.0]).unwrap_err();
        assert!(err.message.contains("call depth"));
    }

    #[test]
    fn test_division_by_zero() {
        let interp = load("def f(x):\n    return 1 / x\n");
        assert!(interp.call("f", &[0.0]).is_err());
        assert_eq!(interp.call("f", &[4.0]).unwrap(), 0.25);
    }

    #[test]
    fn test_wrong_argument_count() {
        let interp = load("def f(x):\n    return x\n");
        assert!(interp.call("f", &[1.0, 2.0]).is_err());
        assert!(interp.call("missing", &[1.0]).is_err());
    }
}
