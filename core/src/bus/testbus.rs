use anyhow::Result;
use num_traits::{NumCast, PrimInt, WrappingAdd};

use super::{Bus, IrqSource, RealAddress};
use crate::bus::BusResult;
use crate::tickable::{Tickable, Ticks};

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::fmt::Debug;
use std::hash::Hash;
use std::ops::Range;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Access {
    Read,
    Write,
}

#[derive(Copy, Clone, Debug)]
pub struct TraceEntry<TA: PrimInt + WrappingAdd, TD: PrimInt> {
    pub addr: TA,
    pub access: Access,
    pub val: TD,
    pub cycle: Ticks,
}

/// Sparse memory bus for unit tests, with optional interrupt level,
/// bus error ranges and wait states.
pub struct Testbus<TA: PrimInt + WrappingAdd + Hash + Debug, TD: PrimInt> {
    pub mem: HashMap<TA, TD>,
    trace: RefCell<Vec<TraceEntry<TA, TD>>>,
    cycles: Ticks,
    trace_enabled: bool,
    mask: TA,

    /// Interrupt level presented to the CPU
    pub irq_level: Option<u8>,

    /// Address ranges that assert BERR on access
    pub bus_errors: Vec<Range<TA>>,

    /// Amount of wait states inserted before each access completes
    pub wait_states: usize,
    wait_counter: usize,

    /// Amount of RESET instructions seen
    pub resets: usize,

    /// Whether to expose memory through `real_address`
    pub direct_mapping: bool,
}

impl<TA, TD> Testbus<TA, TD>
where
    TA: PrimInt + WrappingAdd + Hash + Debug,
    TD: PrimInt,
{
    pub fn new(mask: TA) -> Self {
        Self {
            mem: HashMap::new(),
            trace: RefCell::new(vec![]),
            cycles: 0,
            trace_enabled: false,
            mask,
            irq_level: None,
            bus_errors: vec![],
            wait_states: 0,
            wait_counter: 0,
            resets: 0,
            direct_mapping: true,
        }
    }

    pub fn get_seen_addresses(&self) -> impl Iterator<Item = TA> + '_ {
        self.mem.keys().copied()
    }

    pub fn reset_trace(&mut self) {
        self.trace.borrow_mut().clear();
        self.trace_enabled = true;
    }

    pub fn get_trace(&self) -> Vec<TraceEntry<TA, TD>> {
        self.trace.borrow().clone()
    }

    pub fn get_cycles(&self) -> Ticks {
        self.cycles
    }

    fn faults(&self, addr: TA) -> bool {
        self.bus_errors.iter().any(|r| r.contains(&addr))
    }

    fn wait(&mut self) -> bool {
        if self.wait_counter < self.wait_states {
            self.wait_counter += 1;
            return true;
        }
        self.wait_counter = 0;
        false
    }
}

impl<TA, TD> Bus<TA, TD> for Testbus<TA, TD>
where
    TA: PrimInt + WrappingAdd + Hash + Debug,
    TD: PrimInt,
{
    fn get_mask(&self) -> TA {
        self.mask
    }

    fn read(&mut self, addr: TA) -> BusResult<TD> {
        assert_eq!(addr & self.mask, addr);

        if self.wait() {
            return BusResult::WaitState;
        }
        if self.faults(addr) {
            return BusResult::BusError;
        }

        #[allow(clippy::or_fun_call)]
        let val = *self.mem.get(&addr).unwrap_or(&TD::zero());

        if self.trace_enabled {
            self.trace.borrow_mut().push(TraceEntry {
                addr,
                access: Access::Read,
                val,
                cycle: self.cycles,
            });
        }
        BusResult::Ok(val)
    }

    fn write(&mut self, addr: TA, val: TD) -> BusResult<TD> {
        assert_eq!(addr & self.mask, addr);

        if self.wait() {
            return BusResult::WaitState;
        }
        if self.faults(addr) {
            return BusResult::BusError;
        }

        if self.trace_enabled {
            self.trace.borrow_mut().push(TraceEntry {
                addr,
                access: Access::Write,
                val,
                cycle: self.cycles,
            });
        }
        self.mem.insert(addr, val);
        BusResult::Ok(val)
    }

    fn reset(&mut self, _hard: bool) -> Result<()> {
        self.resets += 1;
        Ok(())
    }

    fn real_address(&self, addr: TA) -> Option<RealAddress> {
        if !self.direct_mapping || addr & self.mask != addr || self.faults(addr) {
            return None;
        }
        addr.to_usize()
    }

    fn read_real(&self, real: RealAddress) -> Option<TD> {
        let addr = <TA as NumCast>::from(real)?;
        #[allow(clippy::or_fun_call)]
        Some(*self.mem.get(&addr).unwrap_or(&TD::zero()))
    }
}

impl<TA, TD> Tickable for Testbus<TA, TD>
where
    TA: PrimInt + WrappingAdd + Hash + Debug,
    TD: PrimInt,
{
    fn tick(&mut self, ticks: Ticks) -> Result<Ticks> {
        self.cycles += ticks;
        Ok(ticks)
    }
}

impl<TA, TD> IrqSource for Testbus<TA, TD>
where
    TA: PrimInt + WrappingAdd + Hash + Debug,
    TD: PrimInt,
{
    fn get_irq(&mut self) -> Option<u8> {
        self.irq_level
    }
}

impl<TA, TD> fmt::Display for Testbus<TA, TD>
where
    TA: PrimInt + WrappingAdd + Hash + Debug,
    TD: PrimInt,
{
    fn fmt(&self, _f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Result::Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn testbus() {
        let mut b = Testbus::<u16, u8>::new(u16::MAX);

        for a in 0..=u16::MAX {
            assert_eq!(b.read(a), BusResult::Ok(0));
        }
        for a in 0..=u16::MAX {
            assert_eq!(b.write(a, a as u8), BusResult::Ok(a as u8));
        }
        for a in 0..=u16::MAX {
            assert_eq!(b.read(a), BusResult::Ok(a as u8));
        }
    }

    #[test]
    fn in_mask() {
        let mut b = Testbus::<u16, u8>::new(u8::MAX.into());

        assert_eq!(b.write(0x10, 1), BusResult::Ok(1));
    }

    #[test]
    #[should_panic]
    fn out_mask() {
        let mut b = Testbus::<u16, u8>::new(u8::MAX.into());

        let _ = b.write(0x100, 1);
    }

    #[test]
    fn bus_error_range() {
        let mut b = Testbus::<u16, u8>::new(u16::MAX);
        b.bus_errors.push(0x100..0x200);

        assert_eq!(b.read(0xFF), BusResult::Ok(0));
        assert_eq!(b.read(0x100), BusResult::BusError);
        assert_eq!(b.write(0x1FF, 1), BusResult::BusError);
        assert_eq!(b.real_address(0x180), None);
    }

    #[test]
    fn wait_states() {
        let mut b = Testbus::<u16, u8>::new(u16::MAX);
        b.wait_states = 2;

        assert_eq!(b.write(0x10, 5), BusResult::WaitState);
        assert_eq!(b.write(0x10, 5), BusResult::WaitState);
        assert_eq!(b.write(0x10, 5), BusResult::Ok(5));
        assert_eq!(b.read(0x10), BusResult::WaitState);
        assert_eq!(b.read(0x10), BusResult::WaitState);
        assert_eq!(b.read(0x10), BusResult::Ok(5));
    }

    #[test]
    fn direct_mapping() {
        let mut b = Testbus::<u16, u8>::new(u16::MAX);
        let _ = b.write(0x1234, 0xAB);

        let real = b.real_address(0x1234).unwrap();
        assert_eq!(b.read_real(real), Some(0xAB));

        b.direct_mapping = false;
        assert_eq!(b.real_address(0x1234), None);
    }
}
