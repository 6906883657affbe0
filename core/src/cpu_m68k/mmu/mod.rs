//! M68k CPU - paged memory management unit
//!
//! 68030 PMMU (TC/CRP/SRP/TT0/TT1) and the 68040/68060 MMU
//! (TCR/URP/SRP/ITTx/DTTx). Successful translations are kept in an
//! address translation cache (ATC) which is flushed by PFLUSH, writes to
//! the translation control and root pointer registers, and reset.

pub mod ops;
pub mod regs;
pub mod translate;

use anyhow::Result;
use arrayvec::ArrayVec;
use log::*;
use serde::{Deserialize, Serialize};

use crate::bus::{Address, Bus, IrqSource};
use crate::cpu_m68k::access::{AccessKind, AccessSize};
use crate::cpu_m68k::config::CpuModel;
use crate::cpu_m68k::cpu::{CpuError, CpuM68k};
use crate::cpu_m68k::exception::{AccessFault, MmuFaultCause, function_code};
use crate::types::Long;

/// Entries of the largest ATC (68040/68060)
pub const ATC_MAX_ENTRIES: usize = 64;
/// Entries of the 68030 ATC
pub const ATC_ENTRIES_030: usize = 22;

/// Cached translation of one logical page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtcEntry {
    /// Function code the translation was made for
    pub fc: u8,
    pub logical: Address,
    pub physical: Address,
    /// Offset bits within the page (or early termination block)
    pub page_mask: Address,
    pub write_protected: bool,
    pub supervisor_only: bool,
    pub modified: bool,
    /// 68040/68060 global page, survives PFLUSHN/PFLUSHAN
    pub global: bool,
}

impl AtcEntry {
    pub fn matches(&self, fc: u8, addr: Address) -> bool {
        self.fc == fc && self.logical == addr & !self.page_mask
    }

    pub fn translate(&self, addr: Address) -> Address {
        self.physical | (addr & self.page_mask)
    }

    /// Access rights violated by an access through this entry
    pub fn check(&self, supervisor: bool, write: bool) -> Option<MmuFaultCause> {
        if self.supervisor_only && !supervisor {
            Some(MmuFaultCause::SupervisorOnly)
        } else if write && self.write_protected {
            Some(MmuFaultCause::WriteProtected)
        } else {
            None
        }
    }
}

/// Translation state that is not architecturally visible
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mmu {
    atc: ArrayVec<AtcEntry, ATC_MAX_ENTRIES>,
    /// Next entry to replace once the ATC is full
    victim: usize,

    pub hits: u64,
    pub misses: u64,
    pub faults: u64,
}

impl Mmu {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn entries(&self) -> &[AtcEntry] {
        &self.atc
    }

    pub fn lookup(&self, fc: u8, addr: Address) -> Option<&AtcEntry> {
        self.atc.iter().find(|e| e.matches(fc, addr))
    }

    pub fn insert(&mut self, entry: AtcEntry, capacity: usize) {
        let capacity = capacity.min(ATC_MAX_ENTRIES);
        if let Some(e) = self.atc.iter_mut().find(|e| e.fc == entry.fc && e.logical == entry.logical) {
            *e = entry;
            return;
        }
        if self.atc.len() < capacity {
            self.atc.push(entry);
            return;
        }
        self.victim %= capacity;
        self.atc[self.victim] = entry;
        self.victim += 1;
    }

    /// PFLUSHA
    pub fn flush(&mut self) {
        self.atc.clear();
        self.victim = 0;
    }

    /// Drops entries selected by `f`
    pub fn flush_matching(&mut self, f: impl Fn(&AtcEntry) -> bool) {
        self.atc.retain(|e| !f(e));
        self.victim = 0;
    }
}

/// Outcome of a table search
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Walk {
    /// Physical page (or block) base
    pub physical: Address,
    pub page_mask: Address,
    pub write_protected: bool,
    pub supervisor_only: bool,
    pub modified: bool,
    pub global: bool,
    /// Table levels accessed
    pub levels: u8,
    /// Address of the last descriptor fetched
    pub descriptor: Address,
    pub limit_violation: bool,
    pub fault: Option<MmuFaultCause>,
}

impl Walk {
    pub fn entry(&self, fc: u8, addr: Address) -> AtcEntry {
        AtcEntry {
            fc,
            logical: addr & !self.page_mask,
            physical: self.physical & !self.page_mask,
            page_mask: self.page_mask,
            write_protected: self.write_protected,
            supervisor_only: self.supervisor_only,
            modified: self.modified,
            global: self.global,
        }
    }

    fn fail(mut self, cause: MmuFaultCause) -> Self {
        self.fault = Some(cause);
        self
    }
}

impl<TBus> CpuM68k<TBus>
where
    TBus: Bus<Address, u8> + IrqSource,
{
    pub(in crate::cpu_m68k) fn atc_capacity(&self) -> usize {
        if self.config.model == CpuModel::M68030 {
            ATC_ENTRIES_030
        } else {
            ATC_MAX_ENTRIES
        }
    }

    /// Translation is configured and switched on
    pub(in crate::cpu_m68k) fn mmu_enabled(&self) -> bool {
        self.config.mmu
            && match self.config.model {
                CpuModel::M68030 => self.regs.mmu.tc.enable(),
                CpuModel::M68040 | CpuModel::M68060 => self.regs.mmu.tcr.enable(),
                _ => false,
            }
    }

    fn mmu_fault(
        &mut self,
        addr: Address,
        size: AccessSize,
        kind: AccessKind,
        write: Option<Long>,
        cause: MmuFaultCause,
    ) -> anyhow::Error {
        let mut f = AccessFault::new(addr, size, kind, write, self.regs.sr.supervisor());
        f.rmw = self.rmw;
        f.mmu = Some(cause);
        self.mmu.faults += 1;
        debug!(
            "MMU fault {:?} at {:08X} ({:?}{}), PC: {:08X}",
            cause,
            addr,
            kind,
            if write.is_some() { ", write" } else { "" },
            self.regs.instruction_pc
        );
        CpuError::MmuFault(f).into()
    }

    /// Transparent translation match. Returns the access rights
    /// violation on a write protected 68040/68060 window.
    fn transparent(&self, addr: Address, fc: u8, kind: AccessKind, write: bool) -> Option<Option<MmuFaultCause>> {
        let m = &self.regs.mmu;
        let supervisor = fc & 4 != 0;
        match self.config.model {
            CpuModel::M68030 => (m.tt0.matches(addr, fc, write) || m.tt1.matches(addr, fc, write))
                .then_some(None),
            CpuModel::M68040 | CpuModel::M68060 => {
                let ttrs = if kind.is_program() {
                    [m.itt0, m.itt1]
                } else {
                    [m.dtt0, m.dtt1]
                };
                ttrs.into_iter()
                    .find(|t| t.matches(addr, supervisor))
                    .map(|t| (write && t.write_protect()).then_some(MmuFaultCause::WriteProtected))
            }
            _ => None,
        }
    }

    /// Table search for the active MMU
    pub(in crate::cpu_m68k) fn mmu_walk(&mut self, addr: Address, fc: u8, write: bool, update: bool) -> Result<Walk> {
        match self.config.model {
            CpuModel::M68030 => self.walk_030(addr, fc, write, update),
            _ => self.walk_040(addr, fc & 4 != 0, write, update),
        }
    }

    /// Logical to physical translation of a single access. Without an
    /// enabled MMU the address passes through unchanged.
    pub(in crate::cpu_m68k) fn mmu_translate(
        &mut self,
        addr: Address,
        size: AccessSize,
        kind: AccessKind,
        write: Option<Long>,
    ) -> Result<Address> {
        if !self.config.mmu || !self.config.model.has_mmu() {
            return Ok(addr);
        }
        let supervisor = self.regs.sr.supervisor();
        let fc = function_code(supervisor, kind.is_program());
        let is_write = write.is_some();

        if let Some(violation) = self.transparent(addr, fc, kind, is_write) {
            return match violation {
                Some(cause) => Err(self.mmu_fault(addr, size, kind, write, cause)),
                None => Ok(addr),
            };
        }
        if !self.mmu_enabled() {
            return Ok(addr);
        }

        if let Some(e) = self.mmu.lookup(fc, addr).copied() {
            // A first write through a clean page goes to the tables to set M
            if !is_write || e.modified || e.write_protected {
                self.mmu.hits += 1;
                return match e.check(supervisor, is_write) {
                    Some(cause) => Err(self.mmu_fault(addr, size, kind, write, cause)),
                    None => Ok(e.translate(addr)),
                };
            }
        }

        self.mmu.misses += 1;
        let walk = self.mmu_walk(addr, fc, is_write, true)?;
        if let Some(cause) = walk.fault {
            return Err(self.mmu_fault(addr, size, kind, write, cause));
        }
        let entry = walk.entry(fc, addr);
        let capacity = self.atc_capacity();
        self.mmu.insert(entry, capacity);
        match entry.check(supervisor, is_write) {
            Some(cause) => Err(self.mmu_fault(addr, size, kind, write, cause)),
            None => Ok(entry.translate(addr)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(fc: u8, logical: Address) -> AtcEntry {
        AtcEntry {
            fc,
            logical,
            physical: 0x0010_0000,
            page_mask: 0xFFF,
            write_protected: false,
            supervisor_only: false,
            modified: false,
            global: false,
        }
    }

    #[test]
    fn atc_lookup() {
        let mut mmu = Mmu::default();
        mmu.insert(entry(5, 0x2000), ATC_MAX_ENTRIES);
        let e = mmu.lookup(5, 0x2ABC).unwrap();
        assert_eq!(e.translate(0x2ABC), 0x0010_0ABC);
        assert!(mmu.lookup(1, 0x2ABC).is_none(), "other function code");
        assert!(mmu.lookup(5, 0x3000).is_none());
    }

    #[test]
    fn atc_replacement() {
        let mut mmu = Mmu::default();
        for i in 0..(ATC_ENTRIES_030 as Address + 1) {
            mmu.insert(entry(5, i << 12), ATC_ENTRIES_030);
        }
        assert_eq!(mmu.entries().len(), ATC_ENTRIES_030);
        assert!(mmu.lookup(5, 0).is_none(), "oldest entry replaced");
        assert!(mmu.lookup(5, (ATC_ENTRIES_030 as Address) << 12).is_some());
    }

    #[test]
    fn atc_flush() {
        let mut mmu = Mmu::default();
        mmu.insert(entry(5, 0x1000), ATC_MAX_ENTRIES);
        let mut g = entry(5, 0x2000);
        g.global = true;
        mmu.insert(g, ATC_MAX_ENTRIES);
        mmu.flush_matching(|e| !e.global);
        assert_eq!(mmu.entries().len(), 1);
        mmu.flush();
        assert!(mmu.entries().is_empty());
    }

    #[test]
    fn rights() {
        let mut e = entry(1, 0);
        e.write_protected = true;
        assert_eq!(e.check(false, false), None);
        assert_eq!(e.check(false, true), Some(MmuFaultCause::WriteProtected));
        e.supervisor_only = true;
        assert_eq!(e.check(false, false), Some(MmuFaultCause::SupervisorOnly));
        assert_eq!(e.check(true, false), None);
    }
}
