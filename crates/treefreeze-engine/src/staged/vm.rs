//! Bytecode interpreter

use super::program::{Instr, Program, ProgramError};

/// Evaluates a verified [`Program`] by stepping through its instructions
#[derive(Debug, Clone)]
pub struct Vm {
    program: Program,
}

impl Vm {
    /// Verifies `program` before accepting it
    pub fn new(program: Program) -> Result<Self, ProgramError> {
        program.verify()?;
        Ok(Self { program })
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Aggregated result for one row of `n_features` values
    ///
    /// # Panics
    ///
    /// Panics if `row` holds fewer values than a split reads.
    pub fn eval_row(&self, row: &[f64]) -> f64 {
        let sum = self
            .program
            .trees
            .iter()
            .fold(0.0, |acc, code| acc + eval_tree(code, row));
        sum / f64::from(self.program.divisor)
    }
}

/// Walk one tree; verification guarantees forward branches in range
fn eval_tree(code: &[Instr], row: &[f64]) -> f64 {
    let mut pc = 0usize;
    loop {
        match code[pc] {
            Instr::Branch {
                feature,
                threshold,
                left,
                right,
            } => {
                pc = if row[feature as usize] <= threshold {
                    left as usize
                } else {
                    right as usize
                };
            }
            Instr::Return(value) => return value,
        }
    }
}
