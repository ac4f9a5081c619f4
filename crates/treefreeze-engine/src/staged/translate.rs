//! Staged dialect to tree bytecode
//!
//! The translator accepts the shapes the code generator emits and nothing
//! more general: `<=` cascades over typed `double` parameters, an
//! accumulate-then-divide entry point, and an optional row-loop wrapper.
//! Anything else is reported with the offending source excerpt.

use super::program::{Instr, Program};
use crate::codegen::{BATCH_SYMBOL, ENTRY_SYMBOL};
use crate::dialect::ast::*;
use crate::dialect::{format_excerpt, Span};
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::debug;

/// Source construct the translator cannot lower
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Translation error at {}:{}: {}", .span.line, .span.column, .message)]
pub struct TranslateError {
    pub message: String,
    pub span: Span,
}

impl TranslateError {
    fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }

    pub fn format_with_source(&self, source: &str) -> String {
        format_excerpt(source, self.span, &self.message)
    }
}

/// Translate a parsed staged module into a verified program
pub fn translate(module: &Module) -> Result<Program, TranslateError> {
    let entry = module.function(ENTRY_SYMBOL).ok_or_else(|| {
        TranslateError::new(
            format!("no `{}` entry point", ENTRY_SYMBOL),
            Span::new(0, 0, 1, 1),
        )
    })?;
    expect_double_function(entry)?;
    let features = feature_map(entry)?;
    let n_features = entry.params.len() as u32;

    let (trees, divisor) = match entry.body.as_slice() {
        [single @ (Stmt::If { .. } | Stmt::Return { .. })] => {
            let mut code = Vec::new();
            lower_cascade(std::slice::from_ref(single), &features, &mut code, entry.span)?;
            (vec![code], 1)
        }
        body => lower_accumulation(module, entry, body)?,
    };

    let batch = match module.function(BATCH_SYMBOL) {
        Some(wrapper) => {
            check_batch_wrapper(wrapper, entry.params.len())?;
            true
        }
        None => false,
    };

    let program = Program {
        n_features,
        divisor,
        batch,
        trees,
    };
    program
        .verify()
        .map_err(|e| TranslateError::new(e.to_string(), entry.span))?;

    debug!(
        trees = program.trees.len(),
        instructions = program.trees.iter().map(Vec::len).sum::<usize>(),
        batch,
        "translated staged module"
    );
    Ok(program)
}

fn expect_double_function(function: &FunctionDef) -> Result<(), TranslateError> {
    if function.return_type.as_deref() != Some("double") {
        return Err(TranslateError::new(
            format!("`{}` must be declared to return double", function.name),
            function.span,
        ));
    }
    for param in &function.params {
        if param.ty.as_deref() != Some("double") {
            return Err(TranslateError::new(
                format!("parameter `{}` must be typed double", param.name),
                param.span,
            ));
        }
    }
    Ok(())
}

/// Parameter name to feature index
fn feature_map(function: &FunctionDef) -> Result<FxHashMap<&str, u32>, TranslateError> {
    let mut map = FxHashMap::default();
    for (i, param) in function.params.iter().enumerate() {
        if map.insert(param.name.as_str(), i as u32).is_some() {
            return Err(TranslateError::new(
                format!("duplicate parameter `{}`", param.name),
                param.span,
            ));
        }
    }
    Ok(map)
}

/// `cdef double acc = 0`, `acc += tree(x...)` per tree, `return acc / n`
fn lower_accumulation(
    module: &Module,
    entry: &FunctionDef,
    body: &[Stmt],
) -> Result<(Vec<Vec<Instr>>, u32), TranslateError> {
    let (first, rest) = body
        .split_first()
        .ok_or_else(|| TranslateError::new("entry point has an empty body", entry.span))?;
    let acc = match first {
        Stmt::Declare {
            ty,
            name,
            init: Some(init),
            ..
        } if ty == "double" && init.as_constant() == Some(0.0) => name.as_str(),
        other => {
            return Err(TranslateError::new(
                "expected `cdef double <accumulator> = 0` or a single decision cascade",
                other.span(),
            ))
        }
    };

    let (last, calls) = rest
        .split_last()
        .ok_or_else(|| TranslateError::new("accumulator is never returned", first.span()))?;

    let mut trees = Vec::with_capacity(calls.len());
    for stmt in calls {
        let (callee, args, span) = match stmt {
            Stmt::AugAssign {
                target,
                op: BinOp::Add,
                value: Expr::Call { func, args, span },
                ..
            } if target == acc => (func, args, *span),
            other => {
                return Err(TranslateError::new(
                    format!("expected `{} += <tree>(...)`", acc),
                    other.span(),
                ))
            }
        };

        let forwarded = args.len() == entry.params.len()
            && args
                .iter()
                .zip(&entry.params)
                .all(|(arg, param)| arg.as_name() == Some(param.name.as_str()));
        if !forwarded {
            return Err(TranslateError::new(
                "tree functions must receive the entry parameters in order",
                span,
            ));
        }

        let tree = module
            .function(callee)
            .ok_or_else(|| TranslateError::new(format!("unknown function `{}`", callee), span))?;
        trees.push(lower_tree_function(tree, entry.params.len())?);
    }

    let divisor = match last {
        Stmt::Return {
            value:
                Some(Expr::Binary {
                    op: BinOp::Div,
                    lhs,
                    rhs,
                    ..
                }),
            ..
        } if lhs.as_name() == Some(acc) => rhs.as_constant(),
        _ => None,
    };
    let n_trees = trees.len() as u32;
    match divisor {
        Some(d) if d == f64::from(n_trees) && n_trees > 0 => Ok((trees, n_trees)),
        _ => Err(TranslateError::new(
            format!("expected `return {} / {}`", acc, trees.len()),
            last.span(),
        )),
    }
}

fn lower_tree_function(function: &FunctionDef, arity: usize) -> Result<Vec<Instr>, TranslateError> {
    expect_double_function(function)?;
    if function.params.len() != arity {
        return Err(TranslateError::new(
            format!(
                "`{}` takes {} parameters, the entry point {}",
                function.name,
                function.params.len(),
                arity
            ),
            function.span,
        ));
    }
    let features = feature_map(function)?;
    let mut code = Vec::new();
    lower_cascade(&function.body, &features, &mut code, function.span)?;
    Ok(code)
}

/// Lower one `if x <= t: ... else: ...` / `return p` cascade in pre-order
fn lower_cascade(
    body: &[Stmt],
    features: &FxHashMap<&str, u32>,
    code: &mut Vec<Instr>,
    context: Span,
) -> Result<(), TranslateError> {
    let stmt = match body {
        [stmt] => stmt,
        [] => return Err(TranslateError::new("empty branch", context)),
        [_, extra, ..] => {
            return Err(TranslateError::new(
                "a branch must hold a single `if` or `return`",
                extra.span(),
            ))
        }
    };

    match stmt {
        Stmt::Return {
            value: Some(value), ..
        } => {
            let p = value.as_constant().ok_or_else(|| {
                TranslateError::new("leaf must return a numeric constant", value.span())
            })?;
            code.push(Instr::Return(p));
            Ok(())
        }
        Stmt::If {
            cond,
            then,
            otherwise,
            span,
        } => {
            let (feature, threshold) = match cond {
                Expr::Compare {
                    op: CmpOp::Le,
                    lhs,
                    rhs,
                    ..
                } => {
                    let name = lhs.as_name().ok_or_else(|| {
                        TranslateError::new("split must compare a parameter", lhs.span())
                    })?;
                    let feature = *features.get(name).ok_or_else(|| {
                        TranslateError::new(format!("unknown parameter `{}`", name), lhs.span())
                    })?;
                    let threshold = rhs.as_constant().ok_or_else(|| {
                        TranslateError::new("threshold must be a numeric constant", rhs.span())
                    })?;
                    (feature, threshold)
                }
                other => {
                    return Err(TranslateError::new(
                        "split condition must be `<parameter> <= <constant>`",
                        other.span(),
                    ))
                }
            };
            if otherwise.is_empty() {
                return Err(TranslateError::new("split needs an else branch", *span));
            }

            let at = code.len();
            code.push(Instr::Return(0.0));
            let left = code.len() as u32;
            lower_cascade(then, features, code, *span)?;
            let right = code.len() as u32;
            lower_cascade(otherwise, features, code, *span)?;
            code[at] = Instr::Branch {
                feature,
                threshold,
                left,
                right,
            };
            Ok(())
        }
        other => Err(TranslateError::new(
            "expected `if` or `return` in a decision cascade",
            other.span(),
        )),
    }
}

/// `for i in range(X.shape[0]): out[i] = predict_proba(X[i, 0], ...)`
fn check_batch_wrapper(wrapper: &FunctionDef, n_features: usize) -> Result<(), TranslateError> {
    let shape_error = |span: Span| {
        TranslateError::new(
            format!(
                "`{}` must loop over rows calling `{}` on every column",
                BATCH_SYMBOL, ENTRY_SYMBOL
            ),
            span,
        )
    };

    let (input, output) = match wrapper.params.as_slice() {
        [input, output] => (input.name.as_str(), output.name.as_str()),
        _ => {
            return Err(TranslateError::new(
                format!("`{}` takes an input matrix and an output vector", BATCH_SYMBOL),
                wrapper.span,
            ))
        }
    };

    let (var, body) = wrapper
        .body
        .iter()
        .find_map(|stmt| match stmt {
            Stmt::For { var, body, .. } => Some((var.as_str(), body)),
            _ => None,
        })
        .ok_or_else(|| shape_error(wrapper.span))?;

    let (target, value, span) = match body.as_slice() {
        [Stmt::Assign {
            target,
            value,
            span,
        }] => (target, value, *span),
        _ => return Err(shape_error(wrapper.span)),
    };

    let target_ok = matches!(
        target,
        Expr::Index { base, indices, .. }
            if base.as_name() == Some(output)
                && matches!(indices.as_slice(), [i] if i.as_name() == Some(var))
    );

    let call_ok = match value {
        Expr::Call { func, args, .. } if func == ENTRY_SYMBOL && args.len() == n_features => {
            args.iter().enumerate().all(|(col, arg)| {
                matches!(
                    arg,
                    Expr::Index { base, indices, .. }
                        if base.as_name() == Some(input)
                            && matches!(
                                indices.as_slice(),
                                [row, c] if row.as_name() == Some(var)
                                    && c.as_constant() == Some(col as f64)
                            )
                )
            })
        }
        _ => false,
    };

    if target_ok && call_ok {
        Ok(())
    } else {
        Err(shape_error(span))
    }
}
