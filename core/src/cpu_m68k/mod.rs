pub mod access;
pub mod alu;
pub mod bus;
pub mod cache;
pub mod config;
pub mod cpu;
pub mod debug;
pub mod dispatch;
pub mod ea;
pub mod exception;
pub mod fpu;
pub mod jit;
pub mod mmu;
pub mod ops;
pub mod regs;
pub mod snapshot;
pub mod spcflags;

#[cfg(test)]
mod tests;

use num_traits::{FromBytes, PrimInt, ToBytes, WrappingAdd, WrappingShl, WrappingShr};

use crate::bus::Address;
use crate::types::Long;
use crate::util::lossyinto::LossyInto;

pub use config::{ConfigError, CpuConfig, CpuModel, FidelityMode, FpuModel};
pub use cpu::{CpuError, CpuM68k, ExecutionState, InterruptEvent, InterruptSender, PcMode};

/// Address mask of the 24-bit address bus (68000/68010/EC020)
pub const ADDRESS_MASK_24: Address = 0x00FFFFFF;
/// Address mask of the full 32-bit address bus
pub const ADDRESS_MASK_32: Address = 0xFFFFFFFF;

/// SR mask of 68000/68010 (T1, S, IPL, CCR)
pub const M68000_SR_MASK: u16 = 0b1010011100011111;
/// SR mask of 68020/68030 (T1, T0, S, M, IPL, CCR)
pub const M68020_SR_MASK: u16 = 0b1111011100011111;
/// SR mask of 68040 (no T0)
pub const M68040_SR_MASK: u16 = 0b1011011100011111;
/// SR mask of 68060 (no T0, no M)
pub const M68060_SR_MASK: u16 = 0b1010011100011111;

pub const M68020_CACR_MASK: u32 = 0b1111;
pub const M68030_CACR_MASK: u32 = 0b11111100011111;
pub const M68040_CACR_MASK: u32 = 0x80008000;
pub const M68060_CACR_MASK: u32 = 0xF8E0E000;

/// Operand of a byte, word or long sized instruction. Handlers are
/// generic over this so one body serves all three sizes.
pub trait CpuSized:
    PrimInt
    + FromBytes
    + ToBytes
    + WrappingAdd
    + std::convert::Into<Long>
    + std::convert::From<u8>
    + WrappingShl
    + WrappingShr
    + std::fmt::Display
    + std::fmt::UpperHex
    + std::ops::BitOrAssign
    + std::ops::ShlAssign
    + std::ops::ShrAssign
{
    /// Width in bits
    const BITS: u32;

    /// Register bits covered by this size
    fn width_mask() -> Long {
        Long::MAX >> (32 - Self::BITS)
    }

    /// Zero-extends to a full register
    fn expand(self) -> Long;

    /// Sign-extends to a full register
    fn expand_sign_extend(self) -> Long;

    /// Merges into `value`, leaving the register bits above this size intact
    fn replace_in(self, value: Long) -> Long;

    /// Truncates a register to this size
    fn chop(value: Long) -> Self;

    fn msb() -> Self;

    /// Operand size as seen on the bus
    fn size() -> access::AccessSize {
        match Self::BITS {
            8 => access::AccessSize::Byte,
            16 => access::AccessSize::Word,
            _ => access::AccessSize::Long,
        }
    }
}

impl<T> CpuSized for T
where
    T: PrimInt
        + FromBytes
        + ToBytes
        + WrappingAdd
        + std::convert::Into<Long>
        + std::convert::From<u8>
        + WrappingShl
        + WrappingShr
        + std::fmt::Display
        + std::fmt::UpperHex
        + std::ops::BitOrAssign
        + std::ops::ShlAssign
        + std::ops::ShrAssign,
    Long: LossyInto<T>,
    <T as ToBytes>::Bytes: AsMut<[u8]>,
    T: FromBytes<Bytes = <T as ToBytes>::Bytes>,
{
    const BITS: u32 = (std::mem::size_of::<T>() * 8) as u32;

    #[inline(always)]
    fn replace_in(self, value: Long) -> Long {
        (value & !Self::width_mask()) | self.expand()
    }

    #[inline(always)]
    fn expand(self) -> Long {
        self.into()
    }

    #[inline(always)]
    fn expand_sign_extend(self) -> Long {
        let l = self.expand();
        if self & Self::msb() != T::zero() {
            l | !Self::width_mask()
        } else {
            l
        }
    }

    #[inline(always)]
    fn chop(value: Long) -> T {
        value.lossy_into()
    }

    #[inline(always)]
    fn msb() -> Self {
        T::one() << (Self::BITS as usize - 1)
    }
}
