//! MMU and cache maintenance instructions

use anyhow::Result;
use log::*;

use crate::bus::{Address, Bus, IrqSource};
use crate::cpu_m68k::config::CpuModel;
use crate::cpu_m68k::cpu::CpuM68k;
use crate::cpu_m68k::ea::AddressingMode;
use crate::cpu_m68k::exception::{MmuFaultCause, VECTOR_LINEF, VECTOR_MMU_CONFIG};
use crate::tickable::Ticks;
use crate::types::{Long, Word};

use super::regs::{Mmusr030, Mmusr040, RootPointerReg, Tcr040, TcReg, Ttr040, TtReg};
use super::translate::DT_INVALID;

const PMOVE_CYCLES: Ticks = 8;
const PFLUSH_CYCLES: Ticks = 8;
const PTEST_CYCLES: Ticks = 22;
const CINV_CYCLES: Ticks = 4;

/// Writable bits of the 68040/68060 transparent translation registers
const TTR040_MASK: Long = 0xFFFF_E364;

/// 68030 PMMU register selected by a PMOVE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PmmuReg {
    Tc,
    Srp,
    Crp,
    Tt0,
    Tt1,
    Mmusr,
}

impl PmmuReg {
    fn decode(ext: Word) -> Option<Self> {
        Some(match (ext >> 13, (ext >> 10) & 7) {
            (0b010, 0b000) => Self::Tc,
            (0b010, 0b010) => Self::Srp,
            (0b010, 0b011) => Self::Crp,
            (0b000, 0b010) => Self::Tt0,
            (0b000, 0b011) => Self::Tt1,
            (0b011, 0b000) => Self::Mmusr,
            _ => return None,
        })
    }

    const fn bytes(self) -> Address {
        match self {
            Self::Srp | Self::Crp => 8,
            Self::Mmusr => 2,
            _ => 4,
        }
    }
}

impl<TBus> CpuM68k<TBus>
where
    TBus: Bus<Address, u8> + IrqSource,
{
    /// Function code field of PFLUSH/PLOAD/PTEST
    fn pmmu_fc(&self, field: Word) -> Option<u8> {
        match field & 0x1F {
            0b00000 => Some(self.regs.sfc),
            0b00001 => Some(self.regs.dfc),
            f if f & 0x18 == 0x08 => Some(self.regs.read_d::<Long>(usize::from(f & 7)) as u8 & 7),
            f if f & 0x10 != 0 => Some((f & 7) as u8),
            _ => None,
        }
    }

    /// 68030 PMMU instructions (co-processor id 0)
    pub(in crate::cpu_m68k) fn op_pmmu_030(&mut self, opcode: Word) -> Result<Ticks> {
        if !self.regs.sr.supervisor() {
            return self.privilege_violation();
        }
        let ext = self.cp_next_iword()?;

        match ext >> 13 {
            0b000 | 0b010 | 0b011 => self.pmove_030(opcode, ext),
            0b001 if ext & 0xFDE0 == 0x2000 => self.pload_030(opcode, ext),
            0b001 => self.pflush_030(opcode, ext),
            0b100 => self.ptest_030(opcode, ext),
            _ => self.exception_at_instruction(VECTOR_LINEF),
        }
    }

    fn pmove_030(&mut self, opcode: Word, ext: Word) -> Result<Ticks> {
        let Some(reg) = PmmuReg::decode(ext) else {
            debug!("Unknown PMOVE ext word {:04X}", ext);
            return self.exception_at_instruction(VECTOR_LINEF);
        };
        let Some(mode) = AddressingMode::from_ea(opcode) else {
            return self.exception_at_instruction(VECTOR_LINEF);
        };
        let to_memory = ext & 0x200 != 0;
        let flush = ext & 0x100 == 0;

        if reg.bytes() == 8 {
            let op = self.resolve_ea_len(mode, 8)?;
            let Some(addr) = op.address() else {
                return self.exception_at_instruction(VECTOR_LINEF);
            };
            if to_memory {
                let v = match reg {
                    PmmuReg::Srp => self.regs.mmu.srp.0,
                    _ => self.regs.mmu.crp.0,
                };
                self.cp_write(addr, (v >> 32) as Long)?;
                self.cp_write(addr.wrapping_add(4), v as Long)?;
                return Ok(PMOVE_CYCLES);
            }

            let hi = u64::from(self.cp_read::<Long>(addr)?);
            let lo = u64::from(self.cp_read::<Long>(addr.wrapping_add(4))?);
            let rp = RootPointerReg((hi << 32) | lo);
            if rp.dt() == DT_INVALID {
                warn!("Root pointer load with invalid descriptor type: {:016X}", rp.0);
                return self.exception_at_instruction(VECTOR_MMU_CONFIG);
            }
            match reg {
                PmmuReg::Srp => self.regs.mmu.srp = rp,
                _ => self.regs.mmu.crp = rp,
            }
            debug!("PMOVE {:?} = {:016X}", reg, rp.0);
            if flush {
                self.mmu.flush();
            }
            return Ok(PMOVE_CYCLES);
        }

        if reg == PmmuReg::Mmusr {
            let op = self.resolve_ea::<Word>(mode)?;
            if to_memory {
                let v = self.regs.mmu.mmusr.0;
                self.cp_write_operand(op, v)?;
            } else {
                self.regs.mmu.mmusr = Mmusr030(self.cp_read_operand(op)?);
            }
            return Ok(PMOVE_CYCLES);
        }

        let op = self.resolve_ea::<Long>(mode)?;
        if to_memory {
            let v = match reg {
                PmmuReg::Tc => self.regs.mmu.tc.0,
                PmmuReg::Tt0 => self.regs.mmu.tt0.0,
                _ => self.regs.mmu.tt1.0,
            };
            self.cp_write_operand(op, v)?;
            return Ok(PMOVE_CYCLES);
        }

        let v: Long = self.cp_read_operand(op)?;
        match reg {
            PmmuReg::Tc => {
                let tc = TcReg(v & 0x83FF_FFFF);
                if tc.enable() && !tc.is_valid() {
                    warn!("Invalid translation control {:08X}", v);
                    return self.exception_at_instruction(VECTOR_MMU_CONFIG);
                }
                debug!("PMOVE TC = {:08X}", tc.0);
                self.regs.mmu.tc = tc;
                if flush {
                    self.mmu.flush();
                }
            }
            PmmuReg::Tt0 => self.regs.mmu.tt0 = TtReg(v & 0xFFFF_8777),
            _ => self.regs.mmu.tt1 = TtReg(v & 0xFFFF_8777),
        }
        Ok(PMOVE_CYCLES)
    }

    fn pflush_030(&mut self, opcode: Word, ext: Word) -> Result<Ticks> {
        let mode = (ext >> 10) & 7;
        if mode == 0b001 {
            trace!("PFLUSHA");
            self.mmu.flush();
            return Ok(PFLUSH_CYCLES);
        }

        let Some(fc) = self.pmmu_fc(ext) else {
            return self.exception_at_instruction(VECTOR_LINEF);
        };
        let mask = ((ext >> 5) & 7) as u8;
        let matches_fc = move |efc: u8| (efc ^ fc) & mask == 0;
        match mode {
            0b100 => self.mmu.flush_matching(|e| matches_fc(e.fc)),
            0b110 => {
                let addr = self.ea_control_address(opcode)?;
                self.mmu
                    .flush_matching(|e| matches_fc(e.fc) && e.logical == addr & !e.page_mask);
            }
            _ => return self.exception_at_instruction(VECTOR_LINEF),
        }
        Ok(PFLUSH_CYCLES)
    }

    fn pload_030(&mut self, opcode: Word, ext: Word) -> Result<Ticks> {
        let Some(fc) = self.pmmu_fc(ext) else {
            return self.exception_at_instruction(VECTOR_LINEF);
        };
        let write = ext & 0x200 == 0;
        let addr = self.ea_control_address(opcode)? & self.address_mask;

        let walk = self.mmu_walk(addr, fc, write, true)?;
        if walk.fault.is_none() {
            let capacity = self.atc_capacity();
            self.mmu.insert(walk.entry(fc, addr), capacity);
        }
        Ok(PTEST_CYCLES)
    }

    fn ptest_030(&mut self, opcode: Word, ext: Word) -> Result<Ticks> {
        let Some(fc) = self.pmmu_fc(ext) else {
            return self.exception_at_instruction(VECTOR_LINEF);
        };
        let level = ((ext >> 10) & 7) as u8;
        let addr = self.ea_control_address(opcode)? & self.address_mask;
        let write = ext & 0x200 == 0;
        let mut sr = Mmusr030::default();

        let m = &self.regs.mmu;
        if m.tt0.matches(addr, fc, write) || m.tt1.matches(addr, fc, write) {
            sr.set_transparent(true);
        }

        if level == 0 {
            match self.mmu.lookup(fc, addr) {
                Some(e) => {
                    sr.set_write_protected(e.write_protected);
                    sr.set_modified(e.modified);
                    sr.set_supervisor_violation(e.supervisor_only && fc & 4 == 0);
                }
                None => sr.set_invalid(true),
            }
        } else {
            let walk = self.mmu_walk(addr, fc, write, false)?;
            sr.set_level(walk.levels.min(level));
            sr.set_write_protected(walk.write_protected);
            sr.set_modified(walk.modified);
            sr.set_limit_violation(walk.limit_violation);
            sr.set_supervisor_violation(walk.supervisor_only && fc & 4 == 0);
            sr.set_bus_error(walk.fault == Some(MmuFaultCause::TableBusError));
            sr.set_invalid(walk.fault.is_some());

            if ext & 0x100 != 0 {
                // Address of the last descriptor into An
                let an = usize::from((ext >> 5) & 7);
                self.regs.write_a(an, walk.descriptor);
            }
        }

        trace!("PTEST {:08X} fc {} -> MMUSR {:04X}", addr, fc, sr.0);
        self.regs.mmu.mmusr = sr;
        Ok(PTEST_CYCLES)
    }

    /// 68040/68060 PFLUSH, PFLUSHN, PFLUSHA and PFLUSHAN
    pub(in crate::cpu_m68k) fn op_pflush_040(&mut self, opcode: Word) -> Result<Ticks> {
        if !self.regs.sr.supervisor() {
            return self.privilege_violation();
        }
        let keep_global = opcode & 0x08 == 0;
        let all = opcode & 0x10 != 0;
        let addr: Address = self.regs.read_a(usize::from(opcode & 7));
        let supervisor = self.regs.dfc & 4 != 0;

        self.mmu.flush_matching(|e| {
            (all || (e.logical == addr & !e.page_mask && (e.fc & 4 != 0) == supervisor))
                && !(keep_global && e.global)
        });
        trace!(
            "PFLUSH{}{} {:08X}",
            if all { "A" } else { "" },
            if keep_global { "N" } else { "" },
            addr
        );
        Ok(PFLUSH_CYCLES)
    }

    /// 68040 PTESTR/PTESTW (An)
    pub(in crate::cpu_m68k) fn op_ptest_040(&mut self, opcode: Word) -> Result<Ticks> {
        if !self.regs.sr.supervisor() {
            return self.privilege_violation();
        }
        let write = opcode & 0x20 == 0;
        let addr: Address = self.regs.read_a(usize::from(opcode & 7));
        let fc = self.regs.dfc;
        let supervisor = fc & 4 != 0;
        let m = &self.regs.mmu;
        let ttrs = if fc & 3 == 2 {
            [m.itt0, m.itt1]
        } else {
            [m.dtt0, m.dtt1]
        };
        let mut sr = Mmusr040::default();

        if let Some(tt) = ttrs.into_iter().find(|t| t.matches(addr, supervisor)) {
            sr.set_phys(addr >> 12);
            sr.set_transparent(true);
            sr.set_resident(true);
            sr.set_write_protected(tt.write_protect());
        } else {
            let walk = self.walk_040(addr, supervisor, write, true)?;
            match walk.fault {
                None => {
                    sr.set_phys(walk.physical >> 12);
                    sr.set_resident(true);
                    sr.set_write_protected(walk.write_protected);
                    sr.set_modified(walk.modified);
                    sr.set_supervisor(walk.supervisor_only);
                    sr.set_global(walk.global);
                    let capacity = self.atc_capacity();
                    self.mmu.insert(walk.entry(fc, addr), capacity);
                }
                Some(cause) => {
                    sr.set_bus_error(cause == MmuFaultCause::TableBusError);
                }
            }
        }

        trace!("PTEST {:08X} -> MMUSR {:08X}", addr, sr.0);
        self.regs.mmu.mmusr_040 = sr;
        Ok(PTEST_CYCLES)
    }

    /// CINV/CPUSH. Only the instruction side is emulated: cached lines,
    /// prefetched words and translated blocks in the scope are dropped.
    pub(in crate::cpu_m68k) fn op_cinv_cpush(&mut self, opcode: Word) -> Result<Ticks> {
        if !self.regs.sr.supervisor() {
            return self.privilege_violation();
        }
        let caches = (opcode >> 6) & 3;
        let scope = (opcode >> 3) & 3;
        if caches & 0b10 == 0 {
            // Data cache only
            return Ok(CINV_CYCLES);
        }

        let addr: Address = self.regs.read_a(usize::from(opcode & 7));
        match scope {
            0b11 => {
                self.icache.clear();
                self.jit.clear();
                let pc = self.get_pc();
                self.prefetch.restart(pc);
            }
            s => {
                let (base, len) = if s == 0b01 {
                    (addr & !0xF, 16)
                } else {
                    (addr & !0xFFF, 4096)
                };
                self.icache.invalidate(base, len);
                self.jit.invalidate(base, len);
                self.prefetch.invalidate(base, len);
            }
        }
        Ok(CINV_CYCLES)
    }

    /// MOVEC access to the 68040/68060 MMU registers
    pub(in crate::cpu_m68k) fn mmu_movec_read(&mut self, ctrl: Word) -> Option<Long> {
        let model = self.config.model;
        if !matches!(model, CpuModel::M68040 | CpuModel::M68060) {
            return None;
        }
        let m = &self.regs.mmu;
        Some(match ctrl {
            0x003 => Long::from(m.tcr.0),
            0x004 => m.itt0.0,
            0x005 => m.itt1.0,
            0x006 => m.dtt0.0,
            0x007 => m.dtt1.0,
            0x805 if model == CpuModel::M68040 => m.mmusr_040.0,
            0x806 => m.urp,
            0x807 => m.srp_040,
            _ => return None,
        })
    }

    pub(in crate::cpu_m68k) fn mmu_movec_write(&mut self, ctrl: Word, v: Long) -> bool {
        let model = self.config.model;
        if !matches!(model, CpuModel::M68040 | CpuModel::M68060) {
            return false;
        }
        let m = &mut self.regs.mmu;
        let flush = match ctrl {
            0x003 => {
                m.tcr = Tcr040((v & 0xC000) as Word);
                debug!("TCR = {:04X}", m.tcr.0);
                true
            }
            0x004 => {
                m.itt0 = Ttr040(v & TTR040_MASK);
                false
            }
            0x005 => {
                m.itt1 = Ttr040(v & TTR040_MASK);
                false
            }
            0x006 => {
                m.dtt0 = Ttr040(v & TTR040_MASK);
                false
            }
            0x007 => {
                m.dtt1 = Ttr040(v & TTR040_MASK);
                false
            }
            0x805 if model == CpuModel::M68040 => {
                m.mmusr_040 = Mmusr040(v);
                false
            }
            0x806 => {
                m.urp = v & !0x1FF;
                true
            }
            0x807 => {
                m.srp_040 = v & !0x1FF;
                true
            }
            _ => return false,
        };
        if flush {
            self.mmu.flush();
        }
        true
    }
}
