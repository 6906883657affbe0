//! M68k CPU - floating point unit
//!
//! 68881/68882 co-processors and the on-chip 68040/68060 FPUs. Values are
//! held in extended precision; single and double precision rounding is
//! applied per FPCR.

pub mod alu;
pub mod math;
pub mod ops;
pub mod regs;
pub mod storage;
pub mod trig;

use arpfloat::{RoundingMode, Semantics};
use serde::{Deserialize, Serialize};

use crate::bus::Address;
use crate::types::{Long, Word};

/// 6888x/68040 single precision float semantics
pub const SEMANTICS_SINGLE: Semantics = Semantics::new(8, 24, RoundingMode::NearestTiesToEven);

/// 6888x/68040 double precision float semantics
pub const SEMANTICS_DOUBLE: Semantics = Semantics::new(11, 53, RoundingMode::NearestTiesToEven);

/// 6888x/68040 extended precision float semantics
pub const SEMANTICS_EXTENDED: Semantics = Semantics::new(15, 64, RoundingMode::NearestTiesToEven);

/// Intermediate results, rounded to the FPCR precision afterwards
pub const SEMANTICS_WIDE: Semantics = Semantics::new(20, 128, RoundingMode::NearestTiesToEven);

/// Why an operation was deferred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum FpuExceptionClass {
    /// Enabled arithmetic exception (vectors 48-54)
    Arithmetic,
    /// Instruction without 68040/68060 hardware support (line F)
    UnimplementedInstruction,
    /// Data type without 68040/68060 hardware support (vector 55)
    UnimplementedDataType,
}

impl FpuExceptionClass {
    const fn code(self) -> u8 {
        match self {
            Self::Arithmetic => 0,
            Self::UnimplementedInstruction => 1,
            Self::UnimplementedDataType => 2,
        }
    }

    const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Arithmetic),
            1 => Some(Self::UnimplementedInstruction),
            2 => Some(Self::UnimplementedDataType),
            _ => None,
        }
    }
}

/// Operation held back by an FPU exception until the handler completes it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FpuPendingOp {
    pub opcode: Word,
    pub ext: Word,
    /// Source operand: extended precision bits, or the raw operand for
    /// an unimplemented data type
    pub source: [Long; 3],
    /// Effective address of a memory operand
    pub ea: Address,
    pub class: FpuExceptionClass,
    pub vector: u8,
}

impl FpuPendingOp {
    /// Body of the state frame: opcode/ext, source, class/vector, EA
    pub fn to_longs(&self) -> [Long; 6] {
        [
            (Long::from(self.opcode) << 16) | Long::from(self.ext),
            self.source[0],
            self.source[1],
            self.source[2],
            0x8000_0000 | (Long::from(self.class.code()) << 8) | Long::from(self.vector),
            self.ea,
        ]
    }

    pub fn from_longs(l: &[Long]) -> Option<Self> {
        if l.len() < 6 || l[4] & 0x8000_0000 == 0 {
            return None;
        }
        Some(Self {
            opcode: (l[0] >> 16) as Word,
            ext: l[0] as Word,
            source: [l[1], l[2], l[3]],
            class: FpuExceptionClass::from_code((l[4] >> 8) as u8)?,
            vector: l[4] as u8,
            ea: l[5],
        })
    }
}

/// Internal FPU state, visible through FSAVE/FRESTORE
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FpuState {
    /// The FPU executed an instruction since reset or a null FRESTORE.
    /// FSAVE writes a null frame until then.
    pub initialized: bool,

    pub pending: Option<FpuPendingOp>,

    pub operations: u64,
    pub exceptions: u64,
}
