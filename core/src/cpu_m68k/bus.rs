//! M68k CPU - Bus access functionality

use std::sync::Arc;

use anyhow::{Result, bail};

use crate::bus::{Address, Bus, BusResult, IrqSource};
use crate::cpu_m68k::access::{AccessKind, AccessPort, AccessSize, BusCycle};
use crate::cpu_m68k::cache::{InstructionCache, PrefetchPipeline};
use crate::cpu_m68k::config::CpuModel;
use crate::cpu_m68k::cpu::{Breakpoint, BusBreakpoint, CpuError, CpuM68k, MAX_WAIT_STATES};
use crate::cpu_m68k::exception::AccessFault;
use crate::cpu_m68k::snapshot::TraceAccess;
use crate::cpu_m68k::CpuSized;
use crate::tickable::Ticks;
use crate::types::{Long, Word};

impl<TBus> CpuM68k<TBus>
where
    TBus: Bus<Address, u8> + IrqSource,
{
    fn bus_breakpoint(&mut self, addr: Address, write: bool, value: Long) {
        let hit = self.breakpoints.iter().any(|bp| match bp {
            Breakpoint::Bus(BusBreakpoint::ReadWrite, a) => *a == addr,
            Breakpoint::Bus(BusBreakpoint::Read, a) => !write && *a == addr,
            Breakpoint::Bus(BusBreakpoint::Write, a) => write && *a == addr,
            _ => false,
        });
        if hit {
            log::info!(
                "Breakpoint hit (bus {}): ${:08X}, value: ${:08X}, PC: ${:08X}",
                if write { "write" } else { "read" },
                addr,
                value,
                self.regs.instruction_pc
            );
            self.breakpoint_hit.set();
        }
    }

    fn record_access(&mut self, addr: Address, size: AccessSize, value: Long, write: bool) {
        if let Some(rec) = self.trace_current.as_mut() {
            let _ = rec.accesses.try_push(TraceAccess {
                address: addr,
                value,
                size,
                write,
            });
        }
    }

    /// Drops prefetched instruction words, cache lines and translated
    /// blocks a store of `len` bytes overlaps.
    fn store_hooks(&mut self, addr: Address, len: usize) {
        self.prefetch.invalidate(addr, len);
        self.icache.invalidate(addr, len);
        self.jit.invalidate(addr, len);
    }

    fn fault(&self, addr: Address, size: AccessSize, kind: AccessKind, write: Option<Long>) -> AccessFault {
        let mut f = AccessFault::new(addr, size, kind, write, self.regs.sr.supervisor());
        f.rmw = self.rmw;
        f
    }

    /// Raw bus cycle, byte by byte, big endian
    fn raw_read(&mut self, addr: Address, size: AccessSize, kind: AccessKind) -> Result<BusCycle> {
        let mask = self.bus_mask();
        let mut value: Long = 0;
        let mut wait_states: Ticks = 0;

        for i in 0..size.bytes() as Address {
            let byte_addr = addr.wrapping_add(i) & mask;
            let b = loop {
                match self.bus.read(byte_addr) {
                    BusResult::Ok(b) => break b,
                    BusResult::WaitState => {
                        wait_states += 1;
                        if wait_states > MAX_WAIT_STATES {
                            bail!("Bus hung reading {:08X}", byte_addr);
                        }
                    }
                    BusResult::BusError => {
                        bail!(CpuError::BusError(self.fault(addr, size, kind, None)));
                    }
                }
            };
            value = (value << 8) | Long::from(b);
        }

        if !self.breakpoints.is_empty() {
            self.bus_breakpoint(addr & mask, false, value);
        }
        self.record_access(addr & mask, size, value, false);
        Ok(BusCycle { value, wait_states })
    }

    fn raw_write(
        &mut self,
        addr: Address,
        size: AccessSize,
        value: Long,
        kind: AccessKind,
    ) -> Result<BusCycle> {
        let mask = self.bus_mask();
        let n = size.bytes() as Address;
        let mut wait_states: Ticks = 0;

        for i in 0..n {
            let byte_addr = addr.wrapping_add(i) & mask;
            let b = (value >> (8 * (n - 1 - i))) as u8;
            loop {
                match self.bus.write(byte_addr, b) {
                    BusResult::Ok(_) => break,
                    BusResult::WaitState => {
                        wait_states += 1;
                        if wait_states > MAX_WAIT_STATES {
                            bail!("Bus hung writing {:08X}", byte_addr);
                        }
                    }
                    BusResult::BusError => {
                        // Bytes before the faulting one did reach memory
                        if i > 0 {
                            self.store_hooks(addr & mask, i as usize);
                        }
                        bail!(CpuError::BusError(self.fault(addr, size, kind, Some(value))));
                    }
                }
            }
        }

        self.store_hooks(addr & mask, size.bytes());
        if !self.breakpoints.is_empty() {
            self.bus_breakpoint(addr & mask, true, value);
        }
        self.record_access(addr & mask, size, value, true);
        Ok(BusCycle { value, wait_states })
    }

    /// Reads a value through the active access strategy
    pub(in crate::cpu_m68k) fn read_kind<T: CpuSized>(
        &mut self,
        addr: Address,
        kind: AccessKind,
    ) -> Result<T> {
        let access = Arc::clone(&self.access);
        Ok(T::chop(access.read(self, addr, T::size(), kind)?))
    }

    pub(in crate::cpu_m68k) fn write_kind<T: CpuSized>(
        &mut self,
        addr: Address,
        value: T,
        kind: AccessKind,
    ) -> Result<()> {
        let access = Arc::clone(&self.access);
        access.write(self, addr, T::size(), value.expand(), kind)
    }

    /// Reads a value from the bus and spends ticks.
    pub(in crate::cpu_m68k) fn read_ticks<T: CpuSized>(&mut self, addr: Address) -> Result<T> {
        self.read_kind(addr, AccessKind::Data)
    }

    /// Writes a value to the bus (big endian) and spends ticks.
    pub(in crate::cpu_m68k) fn write_ticks<T: CpuSized>(
        &mut self,
        addr: Address,
        value: T,
    ) -> Result<()> {
        self.write_kind(addr, value, AccessKind::Data)
    }

    /// Co-processor (FPU/MMU) operand read
    pub(in crate::cpu_m68k) fn cp_read<T: CpuSized>(&mut self, addr: Address) -> Result<T> {
        self.read_kind(addr, AccessKind::Coprocessor)
    }

    /// Co-processor (FPU/MMU) operand write
    pub(in crate::cpu_m68k) fn cp_write<T: CpuSized>(
        &mut self,
        addr: Address,
        value: T,
    ) -> Result<()> {
        self.write_kind(addr, value, AccessKind::Coprocessor)
    }

    /// Physical read bypassing translation, for MMU table walks
    pub(in crate::cpu_m68k) fn read_physical(&mut self, addr: Address) -> Result<Long> {
        let c = self.raw_read(addr, AccessSize::Long, AccessKind::Coprocessor)?;
        self.coprocessor_cycles += crate::cpu_m68k::cache::CPU020_MEM_CYCLE;
        self.defer_cycles(crate::cpu_m68k::cache::CPU020_MEM_CYCLE);
        Ok(c.value)
    }

    /// Physical write bypassing translation, for descriptor updates
    pub(in crate::cpu_m68k) fn write_physical(&mut self, addr: Address, value: Long) -> Result<()> {
        self.raw_write(addr, AccessSize::Long, value, AccessKind::Coprocessor)?;
        self.coprocessor_cycles += crate::cpu_m68k::cache::CPU020_MEM_CYCLE;
        self.defer_cycles(crate::cpu_m68k::cache::CPU020_MEM_CYCLE);
        Ok(())
    }

    /// Reads the next instruction word and advances the PC
    pub(in crate::cpu_m68k) fn next_iword(&mut self) -> Result<Word> {
        let access = Arc::clone(&self.access);
        access.next_iword(self)
    }

    /// Reads the next instruction long and advances the PC
    pub(in crate::cpu_m68k) fn next_ilong(&mut self) -> Result<Long> {
        let access = Arc::clone(&self.access);
        access.next_ilong(self)
    }

    /// Extension word fetched on behalf of the FPU/MMU
    pub(in crate::cpu_m68k) fn cp_next_iword(&mut self) -> Result<Word> {
        let before = self.cycles + self.deferred_cycles;
        let w = self.next_iword()?;
        self.coprocessor_cycles += (self.cycles + self.deferred_cycles).saturating_sub(before);
        Ok(w)
    }

    /// Immediate operand of the given size from the instruction stream.
    /// Byte immediates occupy the low half of a word.
    pub(in crate::cpu_m68k) fn fetch_immediate<T: CpuSized>(&mut self) -> Result<T> {
        Ok(match std::mem::size_of::<T>() {
            1 | 2 => T::chop(self.next_iword()?.into()),
            4 => T::chop(self.next_ilong()?),
            _ => unreachable!(),
        })
    }
}

impl<TBus> AccessPort for CpuM68k<TBus>
where
    TBus: Bus<Address, u8> + IrqSource,
{
    fn model(&self) -> CpuModel {
        self.config.model
    }

    fn supervisor(&self) -> bool {
        self.regs.sr.supervisor()
    }

    fn cacr(&self) -> Long {
        self.regs.cacr
    }

    fn logical_pc(&self) -> Address {
        self.regs.get_pc()
    }

    fn advance_pc(&mut self, bytes: Address) {
        self.inc_pc_normal(bytes);
        self.fetch_end = self.regs.get_pc();
    }

    fn read_direct(&mut self) -> Result<Word> {
        if self.pc_mapped {
            let real = self.regs.pc_p;
            if let (Some(hi), Some(lo)) = (self.bus.read_real(real), self.bus.read_real(real + 1)) {
                return Ok(Word::from_be_bytes([hi, lo]));
            }
        }
        let addr = self.regs.get_pc();
        Ok(self.raw_read(addr, AccessSize::Word, AccessKind::Program)?.value as Word)
    }

    fn bus_read(&mut self, addr: Address, size: AccessSize, kind: AccessKind) -> Result<BusCycle> {
        self.raw_read(addr, size, kind)
    }

    fn bus_write(
        &mut self,
        addr: Address,
        size: AccessSize,
        value: Long,
        kind: AccessKind,
    ) -> Result<BusCycle> {
        self.raw_write(addr, size, value, kind)
    }

    fn translate(
        &mut self,
        addr: Address,
        size: AccessSize,
        kind: AccessKind,
        write: Option<Long>,
    ) -> Result<Address> {
        // 24-bit configurations never see the upper byte
        let addr = addr & self.address_mask;
        self.mmu_translate(addr, size, kind, write)
    }

    fn consume_cycles(&mut self, ticks: Ticks) -> Result<()> {
        self.advance_cycles(ticks)
    }

    fn defer_cycles(&mut self, ticks: Ticks) {
        self.deferred_cycles += ticks;
    }

    fn account_coprocessor(&mut self, ticks: Ticks) {
        self.coprocessor_cycles += ticks;
    }

    fn prefetch(&mut self) -> &mut PrefetchPipeline {
        &mut self.prefetch
    }

    fn icache(&mut self) -> &mut InstructionCache {
        &mut self.icache
    }
}
