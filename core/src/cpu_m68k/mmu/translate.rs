//! Translation table searches

use anyhow::Result;
use proc_bitfield::bitfield;

use crate::bus::{Address, Bus, IrqSource};
use crate::cpu_m68k::cpu::{CpuError, CpuM68k};
use crate::cpu_m68k::exception::MmuFaultCause;
use crate::types::Long;

use super::Walk;
use super::regs::limit_violation;

/// 68030 descriptor types
pub const DT_INVALID: u8 = 0;
pub const DT_PAGE: u8 = 1;
pub const DT_SHORT: u8 = 2;
pub const DT_LONG: u8 = 3;

bitfield! {
    /// 68030 short format descriptor, and the first long word of a long
    /// format descriptor
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    pub struct Descriptor030(pub u32): Debug, FromStorage, IntoStorage, DerefStorage {
        /// Page address (physical), short page descriptors
        pub page_addr: u32 @ 8..=31,
        /// Long format: limit is a lower limit
        pub lu: bool @ 31,
        /// Long format: table index limit
        pub limit: u16 @ 16..=30,
        /// Long format: supervisor only
        pub s: bool @ 8,
        pub ci: bool @ 6,
        pub m: bool @ 4,
        pub u: bool @ 3,
        pub wp: bool @ 2,
        pub dt: u8 @ 0..=1,
    }
}

bitfield! {
    /// 68040/68060 page descriptor
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    pub struct PageDescriptor040(pub u32): Debug, FromStorage, IntoStorage, DerefStorage {
        pub global: bool @ 10,
        pub s: bool @ 7,
        pub cm: u8 @ 5..=6,
        pub m: bool @ 4,
        pub u: bool @ 3,
        pub w: bool @ 2,
        pub pdt: u8 @ 0..=1,
    }
}

/// Used bit of 68040 table descriptors
const UDT_USED: Long = 1 << 3;
/// Write protect bit of 68040 table descriptors
const UDT_WP: Long = 1 << 2;

impl<TBus> CpuM68k<TBus>
where
    TBus: Bus<Address, u8> + IrqSource,
{
    /// Descriptor fetch. A bus error ends the search instead of
    /// faulting the table access itself.
    fn table_read(&mut self, addr: Address) -> Result<Option<Long>> {
        match self.read_physical(addr) {
            Ok(v) => Ok(Some(v)),
            Err(e) if matches!(e.downcast_ref::<CpuError>(), Some(CpuError::BusError(_))) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Descriptor history bit update
    fn table_write(&mut self, addr: Address, value: Long) -> Result<bool> {
        match self.write_physical(addr, value) {
            Ok(()) => Ok(true),
            Err(e) if matches!(e.downcast_ref::<CpuError>(), Some(CpuError::BusError(_))) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// 68030 search with short and long format descriptors, early
    /// termination and indirect page descriptors.
    pub(in crate::cpu_m68k) fn walk_030(
        &mut self,
        addr: Address,
        fc: u8,
        write: bool,
        update: bool,
    ) -> Result<Walk> {
        let tc = self.regs.mmu.tc;
        let supervisor = fc & 4 != 0;
        let root = if tc.sre() && supervisor {
            self.regs.mmu.srp
        } else {
            self.regs.mmu.crp
        };
        let mut walk = Walk::default();
        let mut used = u32::from(tc.is());

        let mut dt = root.dt();
        let mut table = root.table_base();
        let mut limit = Some((root.lu(), root.limit()));

        if dt == DT_PAGE {
            // No tables at all, the root pointer maps everything
            walk.page_mask = u32::MAX.checked_shr(used).unwrap_or(0);
            walk.physical = table & !walk.page_mask;
            return Ok(walk);
        }

        for ti in tc.levels() {
            let ti = u32::from(ti);
            if dt == DT_INVALID {
                return Ok(walk.fail(MmuFaultCause::Invalid));
            }

            let idx = addr.checked_shl(used).unwrap_or(0) >> (32 - ti);
            if let Some((lower, lim)) = limit {
                if limit_violation(lower, lim, idx) {
                    walk.limit_violation = true;
                    return Ok(walk.fail(MmuFaultCause::Invalid));
                }
            }

            let long = dt == DT_LONG;
            let desc_addr = table.wrapping_add(idx * if long { 8 } else { 4 });
            let Some(raw) = self.table_read(desc_addr)? else {
                return Ok(walk.fail(MmuFaultCause::TableBusError));
            };
            let second = if long {
                match self.table_read(desc_addr.wrapping_add(4))? {
                    Some(v) => v,
                    None => return Ok(walk.fail(MmuFaultCause::TableBusError)),
                }
            } else {
                0
            };
            let d = Descriptor030(raw);
            walk.levels += 1;
            walk.descriptor = desc_addr;
            used += ti;
            walk.write_protected |= d.wp();
            if long {
                walk.supervisor_only |= d.s();
            }

            match d.dt() {
                DT_INVALID => return Ok(walk.fail(MmuFaultCause::Invalid)),
                DT_PAGE => {
                    let base = if long { second } else { raw };
                    return self.page_030(walk, desc_addr, d, base, used, supervisor, write, update);
                }
                next => {
                    if update && !d.u() {
                        self.table_write(desc_addr, raw | UDT_USED)?;
                    }
                    table = if long { second } else { raw } & !0xF;
                    limit = long.then(|| (d.lu(), d.limit()));
                    dt = next;
                }
            }
        }

        // Out of index fields on a table descriptor: indirect page descriptor
        let long = dt == DT_LONG;
        let Some(raw) = self.table_read(table)? else {
            return Ok(walk.fail(MmuFaultCause::TableBusError));
        };
        let second = if long {
            match self.table_read(table.wrapping_add(4))? {
                Some(v) => v,
                None => return Ok(walk.fail(MmuFaultCause::TableBusError)),
            }
        } else {
            0
        };
        let d = Descriptor030(raw);
        walk.descriptor = table;
        walk.write_protected |= d.wp();
        if long {
            walk.supervisor_only |= d.s();
        }
        if d.dt() != DT_PAGE {
            return Ok(walk.fail(MmuFaultCause::Invalid));
        }
        let base = if long { second } else { raw };
        self.page_030(walk, table, d, base, used, supervisor, write, update)
    }

    #[allow(clippy::too_many_arguments)]
    fn page_030(
        &mut self,
        mut walk: Walk,
        desc_addr: Address,
        d: Descriptor030,
        base: Long,
        used: u32,
        supervisor: bool,
        write: bool,
        update: bool,
    ) -> Result<Walk> {
        walk.page_mask = u32::MAX.checked_shr(used).unwrap_or(0);
        walk.physical = base & !0xFF & !walk.page_mask;
        walk.modified = d.m();

        let mut nd = d;
        nd.set_u(true);
        if write && !walk.write_protected && (supervisor || !walk.supervisor_only) {
            nd.set_m(true);
            walk.modified = true;
        }
        if update && nd != d {
            self.table_write(desc_addr, nd.0)?;
        }
        Ok(walk)
    }

    /// 68040/68060 three level search: root (7 bits), pointer (7 bits)
    /// and page index (6 bits for 4K, 5 bits for 8K pages).
    pub(in crate::cpu_m68k) fn walk_040(
        &mut self,
        addr: Address,
        supervisor: bool,
        write: bool,
        update: bool,
    ) -> Result<Walk> {
        let m = &self.regs.mmu;
        let page_8k = m.tcr.page_8k();
        let root = if supervisor { m.srp_040 } else { m.urp } & !0x1FF;
        let mut walk = Walk {
            page_mask: m.tcr.page_mask(),
            ..Default::default()
        };

        let ri = addr >> 25;
        let pi = (addr >> 18) & 0x7F;
        let (pgi, table_mask) = if page_8k {
            ((addr >> 13) & 0x1F, !0x7F)
        } else {
            ((addr >> 12) & 0x3F, !0xFF)
        };

        // Root and pointer levels
        let mut table = root;
        for (idx, next_mask) in [(ri, !0x1FF), (pi, table_mask)] {
            let desc_addr = table.wrapping_add(idx * 4);
            let Some(d) = self.table_read(desc_addr)? else {
                return Ok(walk.fail(MmuFaultCause::TableBusError));
            };
            walk.levels += 1;
            walk.descriptor = desc_addr;
            // UDT 0 and 1 are invalid
            if d & 2 == 0 {
                return Ok(walk.fail(MmuFaultCause::Invalid));
            }
            walk.write_protected |= d & UDT_WP != 0;
            if update && d & UDT_USED == 0 {
                self.table_write(desc_addr, d | UDT_USED)?;
            }
            table = d & next_mask;
        }

        let mut desc_addr = table.wrapping_add(pgi * 4);
        let Some(mut raw) = self.table_read(desc_addr)? else {
            return Ok(walk.fail(MmuFaultCause::TableBusError));
        };
        walk.levels += 1;
        if raw & 3 == 2 {
            // Indirect
            desc_addr = raw & !3;
            raw = match self.table_read(desc_addr)? {
                Some(v) => v,
                None => return Ok(walk.fail(MmuFaultCause::TableBusError)),
            };
            walk.levels += 1;
            if raw & 3 == 2 {
                return Ok(walk.fail(MmuFaultCause::Invalid));
            }
        }
        walk.descriptor = desc_addr;
        let d = PageDescriptor040(raw);
        if d.pdt() == 0 {
            return Ok(walk.fail(MmuFaultCause::Invalid));
        }

        walk.write_protected |= d.w();
        walk.supervisor_only = d.s();
        walk.global = d.global();
        walk.modified = d.m();
        walk.physical = raw & !walk.page_mask;

        let mut nd = d;
        nd.set_u(true);
        if write && !walk.write_protected && (supervisor || !walk.supervisor_only) {
            nd.set_m(true);
            walk.modified = true;
        }
        if update && nd != d {
            self.table_write(desc_addr, nd.0)?;
        }
        Ok(walk)
    }
}
