//! Tree bytecode format
//!
//! A [`Program`] is the staged backend's build output: one instruction
//! sequence per tree plus the aggregation divisor. Branch targets always
//! point forward, so a verified program terminates on every input.
//!
//! Binary layout (`.tcb`):
//! - Header: magic (4 bytes) + version (u32) + flags (u32) + checksum (32 bytes SHA-256)
//! - Payload: n_features (u32) + divisor (u32) + tree count (u32), then per
//!   tree an instruction count (u32) and its instructions

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Magic number of tree bytecode files: "TFBC"
pub const MAGIC: [u8; 4] = *b"TFBC";

/// Current bytecode version
pub const VERSION: u32 = 1;

/// Header flag: the program carries the batch entry point
pub const FLAG_BATCH: u32 = 1;

const HEADER_LEN: usize = 4 + 4 + 4 + 32;

const TAG_BRANCH: u8 = 0;
const TAG_RETURN: u8 = 1;

/// Program encoding/decoding errors
#[derive(Debug, Error, PartialEq)]
pub enum ProgramError {
    /// Unexpected end of data
    #[error("Unexpected end of bytecode at offset {0}")]
    UnexpectedEnd(usize),

    /// Invalid magic number
    #[error("Invalid magic number: expected TFBC, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported version
    #[error("Unsupported version: {0} (current: {current})", current = VERSION)]
    UnsupportedVersion(u32),

    /// Payload does not match the stored checksum
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Unknown instruction tag
    #[error("Invalid instruction tag {0} at offset {1}")]
    InvalidTag(u8, usize),

    /// Bytes left after the last tree
    #[error("Trailing data at offset {0}")]
    TrailingData(usize),

    /// Structurally invalid program
    #[error("Invalid program: {0}")]
    Invalid(String),
}

/// One tree instruction
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Instr {
    /// Continue at `left` when `x[feature] <= threshold`, else at `right`
    Branch {
        feature: u32,
        threshold: f64,
        left: u32,
        right: u32,
    },
    /// Tree result
    Return(f64),
}

/// Verified tree bytecode
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub n_features: u32,
    /// Sum of tree results is divided by this
    pub divisor: u32,
    /// Whether the source defined the batch entry point
    pub batch: bool,
    pub trees: Vec<Vec<Instr>>,
}

impl Program {
    /// Check that every branch stays in range and points forward
    pub fn verify(&self) -> Result<(), ProgramError> {
        let invalid = |msg: String| Err(ProgramError::Invalid(msg));
        if self.trees.is_empty() {
            return invalid("program has no trees".to_string());
        }
        if self.divisor == 0 {
            return invalid("divisor is zero".to_string());
        }

        for (t, code) in self.trees.iter().enumerate() {
            if code.is_empty() {
                return invalid(format!("tree {} is empty", t));
            }
            for (pc, instr) in code.iter().enumerate() {
                match *instr {
                    Instr::Branch {
                        feature,
                        threshold,
                        left,
                        right,
                    } => {
                        if feature >= self.n_features {
                            return invalid(format!(
                                "tree {} instruction {} reads feature {} of {}",
                                t, pc, feature, self.n_features
                            ));
                        }
                        if !threshold.is_finite() {
                            return invalid(format!(
                                "tree {} instruction {} has a non-finite threshold",
                                t, pc
                            ));
                        }
                        for target in [left, right] {
                            let target = target as usize;
                            if target <= pc || target >= code.len() {
                                return invalid(format!(
                                    "tree {} instruction {} branches to {}",
                                    t, pc, target
                                ));
                            }
                        }
                    }
                    Instr::Return(value) => {
                        if !value.is_finite() {
                            return invalid(format!(
                                "tree {} instruction {} returns a non-finite value",
                                t, pc
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Encode to the `.tcb` binary format
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = ByteWriter::default();
        writer.bytes(&MAGIC);
        writer.u32(VERSION);
        writer.u32(if self.batch { FLAG_BATCH } else { 0 });
        writer.bytes(&[0u8; 32]); // checksum, patched below

        writer.u32(self.n_features);
        writer.u32(self.divisor);
        writer.u32(self.trees.len() as u32);
        for code in &self.trees {
            writer.u32(code.len() as u32);
            for instr in code {
                match *instr {
                    Instr::Branch {
                        feature,
                        threshold,
                        left,
                        right,
                    } => {
                        writer.u8(TAG_BRANCH);
                        writer.u32(feature);
                        writer.f64(threshold);
                        writer.u32(left);
                        writer.u32(right);
                    }
                    Instr::Return(value) => {
                        writer.u8(TAG_RETURN);
                        writer.f64(value);
                    }
                }
            }
        }

        let checksum: [u8; 32] = Sha256::digest(&writer.buffer[HEADER_LEN..]).into();
        writer.buffer[HEADER_LEN - 32..HEADER_LEN].copy_from_slice(&checksum);
        writer.buffer
    }

    /// Decode and verify a `.tcb` file
    pub fn decode(data: &[u8]) -> Result<Self, ProgramError> {
        let mut reader = ByteReader::new(data);

        let magic = reader.array::<4>()?;
        if magic != MAGIC {
            return Err(ProgramError::InvalidMagic(magic));
        }
        let version = reader.u32()?;
        if version != VERSION {
            return Err(ProgramError::UnsupportedVersion(version));
        }
        let flags = reader.u32()?;
        let stored = reader.array::<32>()?;

        let actual: [u8; 32] = Sha256::digest(&data[HEADER_LEN..]).into();
        if stored != actual {
            return Err(ProgramError::ChecksumMismatch {
                expected: hex::encode(stored),
                actual: hex::encode(actual),
            });
        }

        let n_features = reader.u32()?;
        let divisor = reader.u32()?;
        let n_trees = reader.u32()? as usize;
        let mut trees = Vec::with_capacity(n_trees.min(reader.remaining()));
        for _ in 0..n_trees {
            let len = reader.u32()? as usize;
            let mut code = Vec::with_capacity(len.min(reader.remaining()));
            for _ in 0..len {
                let offset = reader.offset();
                let instr = match reader.u8()? {
                    TAG_BRANCH => Instr::Branch {
                        feature: reader.u32()?,
                        threshold: reader.f64()?,
                        left: reader.u32()?,
                        right: reader.u32()?,
                    },
                    TAG_RETURN => Instr::Return(reader.f64()?),
                    tag => return Err(ProgramError::InvalidTag(tag, offset)),
                };
                code.push(instr);
            }
            trees.push(code);
        }
        if reader.remaining() != 0 {
            return Err(ProgramError::TrailingData(reader.offset()));
        }

        let program = Program {
            n_features,
            divisor,
            batch: flags & FLAG_BATCH != 0,
            trees,
        };
        program.verify()?;
        Ok(program)
    }
}

#[derive(Default)]
struct ByteWriter {
    buffer: Vec<u8>,
}

impl ByteWriter {
    fn bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    fn u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    fn u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    fn f64(&mut self, value: f64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }
}

struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn offset(&self) -> usize {
        self.pos
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ProgramError> {
        let end = self.pos + N;
        let slice = self
            .data
            .get(self.pos..end)
            .ok_or(ProgramError::UnexpectedEnd(self.pos))?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, ProgramError> {
        Ok(self.array::<1>()?[0])
    }

    fn u32(&mut self) -> Result<u32, ProgramError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn f64(&mut self) -> Result<f64, ProgramError> {
        Ok(f64::from_le_bytes(self.array()?))
    }
}
