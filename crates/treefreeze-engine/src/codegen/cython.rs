//! Staged dialect

use super::emit::{arg_names, emit_cascade, SourceWriter};
use super::python::PythonSyntax;
use super::{tree_symbol, CallingMode, BATCH_SYMBOL, ENTRY_SYMBOL};
use crate::ir::{Aggregation, Forest};

const DIRECTIVES: &str = "# cython: boundscheck=False, wraparound=False, cdivision=True";

pub(super) fn render(forest: &Forest, mode: CallingMode) -> String {
    let names = arg_names(forest.n_features());
    let typed = names
        .iter()
        .map(|n| format!("double {}", n))
        .collect::<Vec<_>>()
        .join(", ");
    let args = names.join(", ");

    let mut w = SourceWriter::new();
    w.line(DIRECTIVES);
    w.line("# Generated by treefreeze. Do not edit.");
    w.blank();

    let entry = format!("cpdef double {}({}) noexcept nogil:", ENTRY_SYMBOL, typed);
    match forest.aggregation() {
        Aggregation::Identity => {
            w.line(&entry);
            w.indent();
            emit_cascade(&mut w, &PythonSyntax, &forest.trees()[0], &names);
            w.dedent();
        }
        Aggregation::Mean => {
            for (k, tree) in forest.trees().iter().enumerate() {
                w.line(&format!("cdef double {}({}) noexcept nogil:", tree_symbol(k), typed));
                w.indent();
                emit_cascade(&mut w, &PythonSyntax, tree, &names);
                w.dedent();
                w.blank();
            }

            w.line(&entry);
            w.indent();
            w.line("cdef double result = 0");
            for k in 0..forest.trees().len() {
                w.line(&format!("result += {}({})", tree_symbol(k), args));
            }
            w.line(&format!("return result / {}", forest.trees().len()));
            w.dedent();
        }
    }

    if mode == CallingMode::Batch {
        let row = (0..forest.n_features())
            .map(|i| format!("X[i, {}]", i))
            .collect::<Vec<_>>()
            .join(", ");
        w.blank();
        w.line(&format!(
            "cpdef void {}(const double[:, ::1] X, double[::1] out) noexcept nogil:",
            BATCH_SYMBOL
        ));
        w.indent();
        w.line("cdef Py_ssize_t i");
        w.line("for i in range(X.shape[0]):");
        w.indent();
        w.line(&format!("out[i] = {}({})", ENTRY_SYMBOL, row));
        w.dedent();
        w.dedent();
    }

    w.finish()
}
