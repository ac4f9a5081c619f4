//! Emission helpers shared by the dialects

use crate::ir::{Node, NodeId, Tree};

/// Indentation unit of every dialect
pub(super) const INDENT: &str = "    ";

/// Argument names `x0..x{n-1}`, zero-padded to a common width.
///
/// With 12 features the names are `x00..x11`, so they sort and align.
pub fn arg_names(n_features: usize) -> Vec<String> {
    let width = n_features.saturating_sub(1).to_string().len();
    (0..n_features)
        .map(|i| format!("x{:0width$}", i, width = width))
        .collect()
}

/// Shortest literal that parses back to exactly `value`
pub fn float_literal(value: f64) -> String {
    format!("{:?}", value)
}

/// Line-oriented text buffer with an indentation level
#[derive(Debug, Default)]
pub(super) struct SourceWriter {
    out: String,
    level: usize,
}

impl SourceWriter {
    pub(super) fn new() -> Self {
        Self::default()
    }

    /// Append one line at the current indentation
    pub(super) fn line(&mut self, text: &str) {
        for _ in 0..self.level {
            self.out.push_str(INDENT);
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    pub(super) fn blank(&mut self) {
        self.out.push('\n');
    }

    pub(super) fn indent(&mut self) {
        self.level += 1;
    }

    pub(super) fn dedent(&mut self) {
        self.level = self.level.saturating_sub(1);
    }

    pub(super) fn finish(self) -> String {
        self.out
    }
}

/// How a dialect spells the pieces of a cascade
pub(super) trait CascadeSyntax {
    /// Opening line of the `x <= threshold` branch
    fn if_open(&self, name: &str, threshold: &str) -> String;
    /// Line(s) between the left and right branch
    fn else_open(&self) -> &'static str;
    /// Closing line after the right branch, if the dialect has one
    fn close(&self) -> Option<&'static str>;
    /// Leaf statement
    fn ret(&self, value: &str) -> String;
}

/// Emit the nested conditional cascade of `tree` at the writer's current level
pub(super) fn emit_cascade<S: CascadeSyntax>(
    w: &mut SourceWriter,
    syntax: &S,
    tree: &Tree,
    names: &[String],
) {
    emit_node(w, syntax, tree, tree.root(), names);
}

fn emit_node<S: CascadeSyntax>(
    w: &mut SourceWriter,
    syntax: &S,
    tree: &Tree,
    id: NodeId,
    names: &[String],
) {
    match *tree.node(id) {
        Node::Leaf { probability } => w.line(&syntax.ret(&float_literal(probability))),
        Node::Split {
            feature,
            threshold,
            left,
            right,
        } => {
            w.line(&syntax.if_open(&names[feature as usize], &float_literal(threshold)));
            w.indent();
            emit_node(w, syntax, tree, left, names);
            w.dedent();
            w.line(syntax.else_open());
            w.indent();
            emit_node(w, syntax, tree, right, names);
            w.dedent();
            if let Some(close) = syntax.close() {
                w.line(close);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arg_names_padding() {
        assert_eq!(arg_names(1), vec!["x0"]);
        assert_eq!(arg_names(3), vec!["x0", "x1", "x2"]);
        let names = arg_names(12);
        assert_eq!(names[0], "x00");
        assert_eq!(names[11], "x11");
        assert_eq!(arg_names(101)[7], "x007");
        assert!(arg_names(0).is_empty());
    }

    #[test]
    fn test_float_literal_round_trips() {
        assert_eq!(float_literal(2.5), "2.5");
        assert_eq!(float_literal(1.0), "1.0");
        assert_eq!(float_literal(-1.25), "-1.25");
        for v in [0.1, 1.0 / 3.0, 1e-7, 6.02e23, -0.000123456789, 0.5000000000000001] {
            assert_eq!(float_literal(v).parse::<f64>().unwrap(), v);
        }
    }

    #[test]
    fn test_writer_indentation() {
        let mut w = SourceWriter::new();
        w.line("a");
        w.indent();
        w.line("b");
        w.dedent();
        w.dedent();
        w.line("c");
        assert_eq!(w.finish(), "a\n    b\nc\n");
    }
}
