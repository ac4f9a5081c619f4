//! Reference dialect

use super::emit::{arg_names, emit_cascade, CascadeSyntax, SourceWriter};
use super::{tree_symbol, ENTRY_SYMBOL};
use crate::ir::{Aggregation, Forest};

pub(super) struct PythonSyntax;

impl CascadeSyntax for PythonSyntax {
    fn if_open(&self, name: &str, threshold: &str) -> String {
        format!("if {} <= {}:", name, threshold)
    }

    fn else_open(&self) -> &'static str {
        "else:"
    }

    fn close(&self) -> Option<&'static str> {
        None
    }

    fn ret(&self, value: &str) -> String {
        format!("return {}", value)
    }
}

pub(super) fn render(forest: &Forest) -> String {
    let names = arg_names(forest.n_features());
    let params = names.join(", ");
    let mut w = SourceWriter::new();
    w.line("# Generated by treefreeze. Do not edit.");
    w.blank();

    match forest.aggregation() {
        Aggregation::Identity => {
            w.line(&format!("def {}({}):", ENTRY_SYMBOL, params));
            w.indent();
            emit_cascade(&mut w, &PythonSyntax, &forest.trees()[0], &names);
            w.dedent();
        }
        Aggregation::Mean => {
            for (k, tree) in forest.trees().iter().enumerate() {
                w.line(&format!("def {}({}):", tree_symbol(k), params));
                w.indent();
                emit_cascade(&mut w, &PythonSyntax, tree, &names);
                w.dedent();
                w.blank();
            }

            let sum = (0..forest.trees().len())
                .map(|k| format!("{}({})", tree_symbol(k), params))
                .collect::<Vec<_>>()
                .join(" + ");
            w.line(&format!("def {}({}):", ENTRY_SYMBOL, params));
            w.indent();
            w.line(&format!("return ({}) / {}", sum, forest.trees().len()));
            w.dedent();
        }
    }

    w.finish()
}
