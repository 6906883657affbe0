pub mod ram;
pub mod testbus;

use crate::tickable::Tickable;

use anyhow::Result;
use num_traits::{PrimInt, WrappingAdd};

/// Main CPU address data type
pub type Address = u32;

/// Offset into host memory backing a directly mapped address range
pub type RealAddress = usize;

/// Result of a bus read/write
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub enum BusResult<TD: PrimInt> {
    /// Bus access executed ok, result value encapsulated
    /// (ignore for writes)
    Ok(TD),

    /// DTACK not asserted, CPU needs to insert wait states and retry
    WaitState,

    /// BERR asserted, the access did not complete
    BusError,
}

pub trait Bus<TA: PrimInt + WrappingAdd, TD: PrimInt>: Tickable {
    fn read(&mut self, addr: TA) -> BusResult<TD>;
    fn write(&mut self, addr: TA, val: TD) -> BusResult<TD>;
    fn get_mask(&self) -> TA;

    /// RESET line triggered by 68k RESET instruction (soft) or
    /// reset caused by CPU external reset (hard)
    fn reset(&mut self, hard: bool) -> Result<()>;

    /// Resolves an address to a location in host memory, if the address
    /// is backed by plain memory without side effects. Used by the
    /// direct program counter representation.
    fn real_address(&self, _addr: TA) -> Option<RealAddress> {
        None
    }

    /// Reads through a mapping previously obtained from `real_address`.
    fn read_real(&self, _real: RealAddress) -> Option<TD> {
        None
    }
}

impl<TA, TD> core::fmt::Debug for dyn Bus<TA, TD> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Bus")
    }
}

pub trait IrqSource {
    fn get_irq(&mut self) -> Option<u8>;
}
