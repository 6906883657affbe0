//! Memory access strategies.
//!
//! Every memory access of an instruction goes through the strategy
//! selected for the current (model, mode, MMU) combination. Strategies
//! only see the CPU through [`AccessPort`], which exposes the raw bus,
//! cycle accounting and the prefetch/cache state.

use std::sync::Arc;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::bus::Address;
use crate::cpu_m68k::cache::{
    CACHE_HIT_CYCLES, CACHE_MISS_CYCLES, CACR_040_IE, CACR_ENABLE, CACR_FREEZE, CPU000_MEM_CYCLE,
    CPU020_MEM_CYCLE, CPU040_MEM_CYCLE, InstructionCache, PrefetchPipeline, WAIT_STATE_CYCLES,
};
use crate::cpu_m68k::config::{CpuConfig, CpuModel, FidelityMode};
use crate::cpu_m68k::cpu::{CpuError, PcMode};
use crate::cpu_m68k::exception::AccessFault;
use crate::tickable::Ticks;
use crate::types::{Long, Word};

/// Width of a single access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessSize {
    Byte,
    Word,
    Long,
}

impl AccessSize {
    pub const fn bytes(self) -> usize {
        match self {
            Self::Byte => 1,
            Self::Word => 2,
            Self::Long => 4,
        }
    }

    pub const fn mask(self) -> Long {
        match self {
            Self::Byte => 0xFF,
            Self::Word => 0xFFFF,
            Self::Long => 0xFFFFFFFF,
        }
    }
}

/// Address space and originator of an access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessKind {
    /// Operand access by the integer unit
    Data,
    /// Instruction stream or PC-relative operand
    Program,
    /// Operand access on behalf of the FPU or MMU
    Coprocessor,
}

impl AccessKind {
    pub const fn is_program(self) -> bool {
        matches!(self, Self::Program)
    }
}

/// Outcome of a raw bus cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusCycle {
    pub value: Long,
    /// Wait states inserted before the cycle completed
    pub wait_states: Ticks,
}

/// CPU-side services available to access strategies
pub trait AccessPort {
    fn model(&self) -> CpuModel;
    fn supervisor(&self) -> bool;
    fn cacr(&self) -> Long;

    /// Logical address of the next instruction word
    fn logical_pc(&self) -> Address;
    /// Advances the program counter in its current representation
    fn advance_pc(&mut self, bytes: Address);
    /// Reads the instruction word at PC through the direct
    /// representation, falling back to the bus for unmapped ranges.
    fn read_direct(&mut self) -> Result<Word>;

    /// Physical bus read, masked to the address space
    fn bus_read(&mut self, addr: Address, size: AccessSize, kind: AccessKind) -> Result<BusCycle>;
    /// Physical bus write, masked to the address space
    fn bus_write(
        &mut self,
        addr: Address,
        size: AccessSize,
        value: Long,
        kind: AccessKind,
    ) -> Result<BusCycle>;
    /// Logical to physical translation. `write` carries the data of a
    /// write access so it can be recorded on a fault.
    fn translate(
        &mut self,
        addr: Address,
        size: AccessSize,
        kind: AccessKind,
        write: Option<Long>,
    ) -> Result<Address>;

    /// Advances the system clock now
    fn consume_cycles(&mut self, ticks: Ticks) -> Result<()>;
    /// Accumulates cycles to be flushed at the end of the instruction
    fn defer_cycles(&mut self, ticks: Ticks);
    /// Tallies cycles spent on co-processor traffic
    fn account_coprocessor(&mut self, ticks: Ticks);

    fn prefetch(&mut self) -> &mut PrefetchPipeline;
    fn icache(&mut self) -> &mut InstructionCache;
}

/// Raises an address error for misaligned word/long accesses on models
/// that do not support them.
pub fn check_alignment(
    port: &dyn AccessPort,
    addr: Address,
    size: AccessSize,
    kind: AccessKind,
    write: Option<Long>,
) -> Result<()> {
    if (size != AccessSize::Byte || kind.is_program())
        && addr & 1 != 0
        && (port.model().checks_alignment() || kind.is_program())
    {
        bail!(CpuError::AddressError(AccessFault::new(
            addr,
            size,
            kind,
            write,
            port.supervisor()
        )));
    }
    Ok(())
}

fn is_fault(e: &anyhow::Error) -> bool {
    e.downcast_ref::<CpuError>().is_some()
}

/// Charges bus cycles, immediately (cycle-exact) or deferred.
fn spend(
    port: &mut dyn AccessPort,
    immediate: bool,
    kind: AccessKind,
    cycles: Ticks,
    wait_states: Ticks,
) -> Result<()> {
    if kind == AccessKind::Coprocessor {
        port.account_coprocessor(cycles);
    }
    if immediate {
        port.consume_cycles(cycles + wait_states * WAIT_STATE_CYCLES)
    } else {
        port.defer_cycles(cycles);
        Ok(())
    }
}

/// Interchangeable memory access implementation
pub trait AccessStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Program counter representation this strategy works with
    fn pc_mode(&self) -> PcMode {
        PcMode::Indirect
    }

    fn read(
        &self,
        port: &mut dyn AccessPort,
        addr: Address,
        size: AccessSize,
        kind: AccessKind,
    ) -> Result<Long>;

    fn write(
        &self,
        port: &mut dyn AccessPort,
        addr: Address,
        size: AccessSize,
        value: Long,
        kind: AccessKind,
    ) -> Result<()>;

    /// Reads the instruction word at PC and advances the PC
    fn next_iword(&self, port: &mut dyn AccessPort) -> Result<Word>;

    /// Reads an instruction long at PC and advances the PC
    fn next_ilong(&self, port: &mut dyn AccessPort) -> Result<Long> {
        let hi = Long::from(self.next_iword(port)?);
        let lo = Long::from(self.next_iword(port)?);
        Ok((hi << 16) | lo)
    }

    /// Charges cycles spent inside the CPU
    fn internal(&self, port: &mut dyn AccessPort, ticks: Ticks) -> Result<()> {
        port.defer_cycles(ticks);
        Ok(())
    }

    /// Fills the instruction pipeline from the current PC
    fn refill(&self, _port: &mut dyn AccessPort) -> Result<()> {
        Ok(())
    }
}

/// 68000/68010: two-word prefetch queue, 4-cycle bus cycles,
/// address errors on misaligned word/long accesses.
pub struct PrefetchAccess<const CE: bool>;

impl<const CE: bool> PrefetchAccess<CE> {
    fn fetch(&self, port: &mut dyn AccessPort, addr: Address) -> Result<Word> {
        let c = port.bus_read(addr, AccessSize::Word, AccessKind::Program)?;
        spend(port, CE, AccessKind::Program, CPU000_MEM_CYCLE, c.wait_states)?;
        Ok(c.value as Word)
    }

    /// Tops up the queue. Faults are not reported until the word is used.
    fn pump(&self, port: &mut dyn AccessPort) -> Result<()> {
        while !port.prefetch().is_full() {
            let addr = port.prefetch().next_fetch_addr();
            match self.fetch(port, addr) {
                Ok(w) => port.prefetch().push(w),
                Err(e) if is_fault(&e) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl<const CE: bool> AccessStrategy for PrefetchAccess<CE> {
    fn name(&self) -> &'static str {
        if CE { "prefetch (cycle-exact)" } else { "prefetch" }
    }

    fn read(
        &self,
        port: &mut dyn AccessPort,
        addr: Address,
        size: AccessSize,
        kind: AccessKind,
    ) -> Result<Long> {
        check_alignment(port, addr, size, AccessKind::Data, None)?;
        let c = port.bus_read(addr, size, kind)?;
        let cycles = CPU000_MEM_CYCLE * if size == AccessSize::Long { 2 } else { 1 };
        spend(port, CE, kind, cycles, c.wait_states)?;
        Ok(c.value)
    }

    fn write(
        &self,
        port: &mut dyn AccessPort,
        addr: Address,
        size: AccessSize,
        value: Long,
        kind: AccessKind,
    ) -> Result<()> {
        check_alignment(port, addr, size, AccessKind::Data, Some(value))?;
        let c = port.bus_write(addr, size, value, kind)?;
        let cycles = CPU000_MEM_CYCLE * if size == AccessSize::Long { 2 } else { 1 };
        spend(port, CE, kind, cycles, c.wait_states)
    }

    fn next_iword(&self, port: &mut dyn AccessPort) -> Result<Word> {
        let pc = port.logical_pc();
        check_alignment(port, pc, AccessSize::Word, AccessKind::Program, None)?;

        let queued = if port.prefetch().front_addr() == Some(pc) {
            port.prefetch().pop()
        } else {
            None
        };
        let word = match queued {
            Some(w) => w,
            None => {
                let w = self.fetch(port, pc)?;
                port.prefetch().restart(pc.wrapping_add(2));
                w
            }
        };
        port.advance_pc(2);
        self.pump(port)?;
        Ok(word)
    }

    fn internal(&self, port: &mut dyn AccessPort, ticks: Ticks) -> Result<()> {
        spend(port, CE, AccessKind::Data, ticks, 0)
    }

    fn refill(&self, port: &mut dyn AccessPort) -> Result<()> {
        let pc = port.logical_pc();
        if port.prefetch().front_addr() != Some(pc) {
            port.prefetch().restart(pc);
        }
        self.pump(port)
    }
}

/// 68020/68030: instruction cache in front of the instruction stream and
/// a four-word prefetch pipeline, 3-cycle bus cycles. With `MMU` set
/// (68030 PMMU) operands and cache misses are translated first; the
/// cache itself holds logical addresses.
pub struct CachedAccess<const CE: bool, const MMU: bool>;

impl<const CE: bool, const MMU: bool> CachedAccess<CE, MMU> {
    /// Fetches an aligned instruction longword through the cache
    fn ifetch_long(&self, port: &mut dyn AccessPort, addr: Address) -> Result<Long> {
        let cacr = port.cacr();
        let supervisor = port.supervisor();
        let enabled = cacr & CACR_ENABLE != 0;

        if enabled {
            if let Some(v) = port.icache().lookup(addr, supervisor) {
                spend(port, CE, AccessKind::Program, CACHE_HIT_CYCLES, 0)?;
                return Ok(v);
            }
        }

        let phys = if MMU {
            port.translate(addr, AccessSize::Long, AccessKind::Program, None)?
        } else {
            addr
        };
        let c = port.bus_read(phys, AccessSize::Long, AccessKind::Program)?;
        let cycles = CPU020_MEM_CYCLE + if enabled { CACHE_MISS_CYCLES } else { 0 };
        spend(port, CE, AccessKind::Program, cycles, c.wait_states)?;
        if enabled && cacr & CACR_FREEZE == 0 {
            port.icache().fill(addr, supervisor, c.value);
        }
        Ok(c.value)
    }

    fn fill(&self, port: &mut dyn AccessPort) -> Result<()> {
        while !port.prefetch().is_full() {
            let addr = port.prefetch().next_fetch_addr();
            let l = match self.ifetch_long(port, addr & !3) {
                Ok(l) => l,
                // Only the word being fetched may fault, not the read-ahead
                Err(e) if is_fault(&e) && !port.prefetch().is_empty() => break,
                Err(e) => return Err(e),
            };
            if addr & 2 == 0 {
                port.prefetch().push((l >> 16) as Word);
                if !port.prefetch().is_full() {
                    port.prefetch().push(l as Word);
                }
            } else {
                port.prefetch().push(l as Word);
            }
        }
        Ok(())
    }

    const fn data_cycles(addr: Address, size: AccessSize) -> Ticks {
        if (addr as usize & 3) + size.bytes() > 4 {
            2 * CPU020_MEM_CYCLE
        } else {
            CPU020_MEM_CYCLE
        }
    }
}

impl<const CE: bool, const MMU: bool> AccessStrategy for CachedAccess<CE, MMU> {
    fn name(&self) -> &'static str {
        match (MMU, CE) {
            (true, _) => "mmu",
            (false, true) => "cached (cycle-exact)",
            (false, false) => "cached",
        }
    }

    fn read(
        &self,
        port: &mut dyn AccessPort,
        addr: Address,
        size: AccessSize,
        kind: AccessKind,
    ) -> Result<Long> {
        if MMU {
            return translated_read(port, addr, size, kind, CE, CPU020_MEM_CYCLE);
        }
        let c = port.bus_read(addr, size, kind)?;
        spend(port, CE, kind, Self::data_cycles(addr, size), c.wait_states)?;
        Ok(c.value)
    }

    fn write(
        &self,
        port: &mut dyn AccessPort,
        addr: Address,
        size: AccessSize,
        value: Long,
        kind: AccessKind,
    ) -> Result<()> {
        if MMU {
            return translated_write(port, addr, size, value, kind, CE, CPU020_MEM_CYCLE);
        }
        let c = port.bus_write(addr, size, value, kind)?;
        spend(port, CE, kind, Self::data_cycles(addr, size), c.wait_states)
    }

    fn next_iword(&self, port: &mut dyn AccessPort) -> Result<Word> {
        let pc = port.logical_pc();
        check_alignment(port, pc, AccessSize::Word, AccessKind::Program, None)?;

        if port.prefetch().front_addr() != Some(pc) {
            port.prefetch().restart(pc);
        }
        if port.prefetch().is_empty() {
            self.fill(port)?;
        }
        let Some(word) = port.prefetch().pop() else {
            bail!("Prefetch pipeline empty after refill at {:08X}", pc);
        };
        port.advance_pc(2);
        Ok(word)
    }

    fn internal(&self, port: &mut dyn AccessPort, ticks: Ticks) -> Result<()> {
        spend(port, CE, AccessKind::Data, ticks, 0)
    }

    fn refill(&self, port: &mut dyn AccessPort) -> Result<()> {
        let pc = port.logical_pc();
        if port.prefetch().front_addr() != Some(pc) {
            port.prefetch().restart(pc);
        }
        self.fill(port)
    }
}

/// 68040/68060 instruction fetch of the word at a physical address.
/// With CACR.IE set the fetch goes through the on-chip cache, where a
/// miss loads the whole 16-byte line.
fn ifetch_040(port: &mut dyn AccessPort, phys: Address) -> Result<Word> {
    if port.cacr() & CACR_040_IE == 0 {
        let c = port.bus_read(phys, AccessSize::Word, AccessKind::Program)?;
        spend(port, false, AccessKind::Program, CPU040_MEM_CYCLE, c.wait_states)?;
        return Ok(c.value as Word);
    }

    let aligned = phys & !3;
    let l = match port.icache().lookup(aligned, false) {
        Some(l) => {
            spend(port, false, AccessKind::Program, CACHE_HIT_CYCLES, 0)?;
            l
        }
        None => {
            let c = port.bus_read(aligned, AccessSize::Long, AccessKind::Program)?;
            port.icache().fill(aligned, false, c.value);
            let mut wait_states = c.wait_states;
            // Rest of the line in burst order, wrapping around
            for i in 1..4 {
                let a = (aligned & !0xF) | (aligned.wrapping_add(4 * i) & 0xF);
                match port.bus_read(a, AccessSize::Long, AccessKind::Program) {
                    Ok(r) => {
                        wait_states += r.wait_states;
                        port.icache().fill(a, false, r.value);
                    }
                    Err(e) if is_fault(&e) => break,
                    Err(e) => return Err(e),
                }
            }
            let cycles = CPU040_MEM_CYCLE + CACHE_MISS_CYCLES + 3 * CACHE_HIT_CYCLES;
            spend(port, false, AccessKind::Program, cycles, wait_states)?;
            c.value
        }
    };
    Ok(if phys & 2 == 0 { (l >> 16) as Word } else { l as Word })
}

/// 68040/68060 without MMU: instruction cache, no pipeline emulation
pub struct PlainAccess;

impl AccessStrategy for PlainAccess {
    fn name(&self) -> &'static str {
        "plain"
    }

    fn read(
        &self,
        port: &mut dyn AccessPort,
        addr: Address,
        size: AccessSize,
        kind: AccessKind,
    ) -> Result<Long> {
        let c = port.bus_read(addr, size, kind)?;
        spend(port, false, kind, CPU040_MEM_CYCLE, c.wait_states)?;
        Ok(c.value)
    }

    fn write(
        &self,
        port: &mut dyn AccessPort,
        addr: Address,
        size: AccessSize,
        value: Long,
        kind: AccessKind,
    ) -> Result<()> {
        let c = port.bus_write(addr, size, value, kind)?;
        spend(port, false, kind, CPU040_MEM_CYCLE, c.wait_states)
    }

    fn next_iword(&self, port: &mut dyn AccessPort) -> Result<Word> {
        let addr = port.logical_pc();
        check_alignment(port, addr, AccessSize::Word, AccessKind::Program, None)?;
        let w = ifetch_040(port, addr)?;
        port.advance_pc(2);
        Ok(w)
    }
}

/// Translated operand read. Accesses that may cross a page boundary are
/// split into bytes.
fn translated_read(
    port: &mut dyn AccessPort,
    addr: Address,
    size: AccessSize,
    kind: AccessKind,
    immediate: bool,
    mem_cycle: Ticks,
) -> Result<Long> {
    if MmuAccess::crosses_page(addr, size) {
        let mut result = 0;
        for i in 0..size.bytes() as Address {
            let b = translated_read(port, addr.wrapping_add(i), AccessSize::Byte, kind, immediate, mem_cycle)?;
            result = (result << 8) | b;
        }
        return Ok(result);
    }
    let phys = port.translate(addr, size, kind, None)?;
    let c = port.bus_read(phys, size, kind)?;
    spend(port, immediate, kind, mem_cycle, c.wait_states)?;
    Ok(c.value)
}

fn translated_write(
    port: &mut dyn AccessPort,
    addr: Address,
    size: AccessSize,
    value: Long,
    kind: AccessKind,
    immediate: bool,
    mem_cycle: Ticks,
) -> Result<()> {
    if MmuAccess::crosses_page(addr, size) {
        // Translate all bytes first so a fault leaves memory untouched
        let n = size.bytes() as Address;
        for i in 0..n {
            port.translate(addr.wrapping_add(i), AccessSize::Byte, kind, Some(value))?;
        }
        for i in 0..n {
            let b = (value >> (8 * (n - 1 - i))) & 0xFF;
            translated_write(port, addr.wrapping_add(i), AccessSize::Byte, b, kind, immediate, mem_cycle)?;
        }
        return Ok(());
    }
    let phys = port.translate(addr, size, kind, Some(value))?;
    let c = port.bus_write(phys, size, value, kind)?;
    spend(port, immediate, kind, mem_cycle, c.wait_states)
}

/// 68040/68060 with MMU: every access is translated first, instruction
/// fetches then go through the physically tagged cache.
pub struct MmuAccess;

impl MmuAccess {
    /// Smallest page size of any supported MMU
    const MIN_PAGE_MASK: Address = 0xFF;

    fn crosses_page(addr: Address, size: AccessSize) -> bool {
        let last = addr.wrapping_add(size.bytes() as Address - 1);
        (addr ^ last) & !Self::MIN_PAGE_MASK != 0
    }
}

impl AccessStrategy for MmuAccess {
    fn name(&self) -> &'static str {
        "mmu"
    }

    fn read(
        &self,
        port: &mut dyn AccessPort,
        addr: Address,
        size: AccessSize,
        kind: AccessKind,
    ) -> Result<Long> {
        translated_read(port, addr, size, kind, false, CPU040_MEM_CYCLE)
    }

    fn write(
        &self,
        port: &mut dyn AccessPort,
        addr: Address,
        size: AccessSize,
        value: Long,
        kind: AccessKind,
    ) -> Result<()> {
        translated_write(port, addr, size, value, kind, false, CPU040_MEM_CYCLE)
    }

    fn next_iword(&self, port: &mut dyn AccessPort) -> Result<Word> {
        let addr = port.logical_pc();
        check_alignment(port, addr, AccessSize::Word, AccessKind::Program, None)?;
        let phys = port.translate(addr, AccessSize::Word, AccessKind::Program, None)?;
        let w = ifetch_040(port, phys)?;
        port.advance_pc(2);
        Ok(w)
    }
}

/// JIT mode: the instruction stream is read through the direct program
/// counter representation.
pub struct DirectAccess;

impl AccessStrategy for DirectAccess {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn pc_mode(&self) -> PcMode {
        PcMode::Direct
    }

    fn read(
        &self,
        port: &mut dyn AccessPort,
        addr: Address,
        size: AccessSize,
        kind: AccessKind,
    ) -> Result<Long> {
        let c = port.bus_read(addr, size, kind)?;
        spend(port, false, kind, CPU020_MEM_CYCLE, 0)?;
        Ok(c.value)
    }

    fn write(
        &self,
        port: &mut dyn AccessPort,
        addr: Address,
        size: AccessSize,
        value: Long,
        kind: AccessKind,
    ) -> Result<()> {
        port.bus_write(addr, size, value, kind)?;
        spend(port, false, kind, CPU020_MEM_CYCLE, 0)
    }

    fn next_iword(&self, port: &mut dyn AccessPort) -> Result<Word> {
        let addr = port.logical_pc();
        check_alignment(port, addr, AccessSize::Word, AccessKind::Program, None)?;
        let w = port.read_direct()?;
        spend(port, false, AccessKind::Program, CPU020_MEM_CYCLE, 0)?;
        port.advance_pc(2);
        Ok(w)
    }
}

/// Picks the access strategy for a (validated) configuration
pub fn select_strategy(config: &CpuConfig) -> Arc<dyn AccessStrategy> {
    use CpuModel::*;
    use FidelityMode::*;

    match (config.mode, config.mmu, config.model) {
        // Translation is only available in the fast mode
        (_, true, M68030) => Arc::new(CachedAccess::<false, true>),
        (_, true, _) => Arc::new(MmuAccess),
        (Jit, _, _) => Arc::new(DirectAccess),
        (CycleExact, _, M68000 | M68010) => Arc::new(PrefetchAccess::<true>),
        (_, _, M68000 | M68010) => Arc::new(PrefetchAccess::<false>),
        (CycleExact, _, M68020 | M68030) => Arc::new(CachedAccess::<true, false>),
        (_, _, M68020 | M68030) => Arc::new(CachedAccess::<false, false>),
        _ => Arc::new(PlainAccess),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_selection() {
        let c = CpuConfig::default();
        assert_eq!(select_strategy(&c).name(), "prefetch");
        let c = CpuConfig::default().with_mode(FidelityMode::CycleExact);
        assert_eq!(select_strategy(&c).name(), "prefetch (cycle-exact)");
        let c = CpuConfig::for_model(CpuModel::M68030);
        assert_eq!(select_strategy(&c).name(), "cached");
        let c = CpuConfig::for_model(CpuModel::M68030).with_mmu(true);
        assert_eq!(select_strategy(&c).name(), "mmu");
        let c = CpuConfig::for_model(CpuModel::M68040).with_mmu(true);
        assert_eq!(select_strategy(&c).name(), "mmu");
        let c = CpuConfig::for_model(CpuModel::M68060);
        assert_eq!(select_strategy(&c).name(), "plain");
        let c = CpuConfig::for_model(CpuModel::M68020).with_mode(FidelityMode::Jit);
        let s = select_strategy(&c);
        assert_eq!(s.name(), "direct");
        assert_eq!(s.pc_mode(), PcMode::Direct);
    }

    #[test]
    fn page_crossing() {
        assert!(!MmuAccess::crosses_page(0x10FC, AccessSize::Long));
        assert!(MmuAccess::crosses_page(0x10FE, AccessSize::Long));
        assert!(!MmuAccess::crosses_page(0x10FF, AccessSize::Byte));
    }
}
