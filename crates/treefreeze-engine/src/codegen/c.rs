//! Native dialect

use super::emit::{arg_names, emit_cascade, CascadeSyntax, SourceWriter};
use super::{
    tree_symbol, CallingMode, BATCH_SYMBOL, ENTRY_SYMBOL, NATIVE_N_FEATURES_SYMBOL,
    NATIVE_PREDICT_BATCH_SYMBOL, NATIVE_PREDICT_SYMBOL,
};
use crate::ir::{Aggregation, Forest};

const PREAMBLE: &str = "\
/* Generated by treefreeze. Do not edit. */
#include <stddef.h>

#if defined(_WIN32)
#define TREEFREEZE_EXPORT __declspec(dllexport)
#else
#define TREEFREEZE_EXPORT __attribute__((visibility(\"default\")))
#endif
";

struct CSyntax;

impl CascadeSyntax for CSyntax {
    fn if_open(&self, name: &str, threshold: &str) -> String {
        format!("if ({} <= {}) {{", name, threshold)
    }

    fn else_open(&self) -> &'static str {
        "} else {"
    }

    fn close(&self) -> Option<&'static str> {
        Some("}")
    }

    fn ret(&self, value: &str) -> String {
        format!("return {};", value)
    }
}

pub(super) fn render(forest: &Forest, mode: CallingMode) -> String {
    let n_features = forest.n_features();
    let names = arg_names(n_features);
    let typed = if names.is_empty() {
        "void".to_string()
    } else {
        names
            .iter()
            .map(|n| format!("double {}", n))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let args = names.join(", ");
    let row_args = (0..n_features)
        .map(|i| format!("x[{}]", i))
        .collect::<Vec<_>>()
        .join(", ");

    let mut w = SourceWriter::new();
    for line in PREAMBLE.lines() {
        w.line(line);
    }
    w.blank();

    let entry = format!("static double {}({}) {{", ENTRY_SYMBOL, typed);
    match forest.aggregation() {
        Aggregation::Identity => {
            w.line(&entry);
            w.indent();
            emit_cascade(&mut w, &CSyntax, &forest.trees()[0], &names);
            w.dedent();
            w.line("}");
        }
        Aggregation::Mean => {
            for (k, tree) in forest.trees().iter().enumerate() {
                w.line(&format!("static double {}({}) {{", tree_symbol(k), typed));
                w.indent();
                emit_cascade(&mut w, &CSyntax, tree, &names);
                w.dedent();
                w.line("}");
                w.blank();
            }

            w.line(&entry);
            w.indent();
            w.line("double result = 0;");
            for k in 0..forest.trees().len() {
                w.line(&format!("result += {}({});", tree_symbol(k), args));
            }
            w.line(&format!("return result / {};", forest.trees().len()));
            w.dedent();
            w.line("}");
        }
    }
    w.blank();

    w.line(&format!(
        "TREEFREEZE_EXPORT size_t {}(void) {{ return {}; }}",
        NATIVE_N_FEATURES_SYMBOL, n_features
    ));
    w.blank();

    match mode {
        CallingMode::Single => {
            w.line(&format!(
                "TREEFREEZE_EXPORT double {}(const double *x) {{",
                NATIVE_PREDICT_SYMBOL
            ));
            w.indent();
            if n_features == 0 {
                w.line("(void)x;");
            }
            w.line(&format!("return {}({});", ENTRY_SYMBOL, row_args));
            w.dedent();
            w.line("}");
        }
        CallingMode::Batch => {
            w.line(&format!(
                "static void {}(const double *data, size_t rows, double *out) {{",
                BATCH_SYMBOL
            ));
            w.indent();
            w.line("for (size_t i = 0; i < rows; i++) {");
            w.indent();
            w.line(&format!("const double *x = data + i * {};", n_features));
            if n_features == 0 {
                w.line("(void)x;");
            }
            w.line(&format!("out[i] = {}({});", ENTRY_SYMBOL, row_args));
            w.dedent();
            w.line("}");
            w.dedent();
            w.line("}");
            w.blank();
            w.line(&format!(
                "TREEFREEZE_EXPORT void {}(const double *data, size_t rows, double *out) {{",
                NATIVE_PREDICT_BATCH_SYMBOL
            ));
            w.indent();
            w.line(&format!("{}(data, rows, out);", BATCH_SYMBOL));
            w.dedent();
            w.line("}");
        }
    }

    w.finish()
}
