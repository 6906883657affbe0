//! M68k CPU - integer instruction handlers
//!
//! Every handler receives the opcode word and returns the amount of
//! internal (non-bus) cycles the instruction spends. Bus cycles are
//! charged by the access strategy as the instruction fetches and
//! accesses memory.

use anyhow::Result;
use log::*;

use crate::bus::{Address, Bus, IrqSource};
use crate::cpu_m68k::alu::{self, Division, ShiftOp};
use crate::cpu_m68k::cache::{CACR_CLEAR, CACR_CLEAR_ENTRY};
use crate::cpu_m68k::config::CpuModel;
use crate::cpu_m68k::cpu::{CpuM68k, ExecutionState};
use crate::cpu_m68k::ea::{AddressingMode, Operand};
use crate::cpu_m68k::exception::{
    ExceptionFrame, VECTOR_CHK, VECTOR_DIV_ZERO, VECTOR_ILLEGAL, VECTOR_LINEA, VECTOR_LINEF,
    VECTOR_TRAP_BASE, VECTOR_TRAPV,
};
use crate::cpu_m68k::CpuSized;
use crate::tickable::Ticks;
use crate::types::{Byte, Long, Word};

/// Logic operation selectors for the const-generic handlers
pub const LOGIC_OR: u8 = 0;
pub const LOGIC_AND: u8 = 1;
pub const LOGIC_EOR: u8 = 2;

/// Bit operation selectors (bits 7-6 of the opcode)
pub const BIT_TST: u8 = 0;
pub const BIT_CHG: u8 = 1;
pub const BIT_CLR: u8 = 2;
pub const BIT_SET: u8 = 3;

const MULU_CYCLES: Ticks = 34;
const MULS_CYCLES: Ticks = 34;
const DIVU_CYCLES: Ticks = 130;
const DIVS_CYCLES: Ticks = 150;
const MUL_L_CYCLES: Ticks = 40;
const DIV_L_CYCLES: Ticks = 76;
const RESET_CYCLES: Ticks = 124;

/// Register in bits 11-9
const fn reg_hi(opcode: Word) -> usize {
    ((opcode >> 9) & 7) as usize
}

/// Register in bits 2-0
const fn reg_lo(opcode: Word) -> usize {
    (opcode & 7) as usize
}

fn apply_logic<T: CpuSized>(op: u8, a: T, b: T) -> T {
    match op {
        LOGIC_OR => a | b,
        LOGIC_AND => a & b,
        _ => a ^ b,
    }
}

impl<TBus> CpuM68k<TBus>
where
    TBus: Bus<Address, u8> + IrqSource,
{
    fn push_long(&mut self, value: Long) -> Result<()> {
        let sp = self.regs.read_a::<Address>(7).wrapping_sub(4);
        self.write_ticks(sp, value)?;
        self.regs.write_a(7, sp);
        Ok(())
    }

    fn pop_long(&mut self) -> Result<Long> {
        let sp = self.regs.read_a::<Address>(7);
        let value = self.read_ticks(sp)?;
        self.regs.write_a(7, sp.wrapping_add(4));
        Ok(value)
    }

    fn set_ccr(&mut self, ccr: u8) {
        self.regs.sr.set_ccr(ccr & 0x1F);
    }

    fn dest_operand<T: CpuSized>(&mut self, mode: Option<AddressingMode>) -> Result<Operand> {
        match mode {
            Some(m) => self.resolve_ea::<T>(m),
            None => anyhow::bail!("Invalid destination in opcode {:04X}", self.regs.ir),
        }
    }

    /// Internal cycles of ALU operations with a data register destination
    fn alu_dn_cycles<T: CpuSized>(&self, opcode: Word) -> Ticks {
        if std::mem::size_of::<T>() != 4 {
            return 0;
        }
        match AddressingMode::from_ea(opcode) {
            Some(m) if m.is_register() || m == AddressingMode::Immediate => 4,
            _ => 2,
        }
    }

    pub(in crate::cpu_m68k) fn op_nop(&mut self, _opcode: Word) -> Result<Ticks> {
        Ok(0)
    }

    pub(in crate::cpu_m68k) fn op_illegal(&mut self, _opcode: Word) -> Result<Ticks> {
        self.exception_at_instruction(VECTOR_ILLEGAL)
    }

    pub(in crate::cpu_m68k) fn op_linea(&mut self, _opcode: Word) -> Result<Ticks> {
        self.exception_at_instruction(VECTOR_LINEA)
    }

    pub(in crate::cpu_m68k) fn op_linef(&mut self, _opcode: Word) -> Result<Ticks> {
        self.exception_at_instruction(VECTOR_LINEF)
    }

    pub(in crate::cpu_m68k) fn op_trap(&mut self, opcode: Word) -> Result<Ticks> {
        let vector = VECTOR_TRAP_BASE + (opcode & 0x0F) as u8;
        let pc = self.get_pc();
        self.raise_exception(vector, pc, ExceptionFrame::Normal)?;
        Ok(0)
    }

    pub(in crate::cpu_m68k) fn op_trapv(&mut self, _opcode: Word) -> Result<Ticks> {
        if self.regs.sr.v() {
            return self.exception_after_instruction(VECTOR_TRAPV);
        }
        Ok(0)
    }

    /// CHK.W <ea>,Dn
    pub(in crate::cpu_m68k) fn op_chk(&mut self, opcode: Word) -> Result<Ticks> {
        let bound = self.read_ea::<Word>(opcode)? as i16;
        let value = self.regs.read_d::<Word>(reg_hi(opcode)) as i16;

        if value < 0 || value > bound {
            self.regs.sr.set_n(value < 0);
            return self.exception_after_instruction(VECTOR_CHK);
        }
        Ok(6)
    }

    pub(in crate::cpu_m68k) fn op_stop(&mut self, _opcode: Word) -> Result<Ticks> {
        if !self.regs.sr.supervisor() {
            return self.privilege_violation();
        }
        let sr = self.next_iword()?;
        self.set_sr(sr);
        self.state = ExecutionState::Stopped;
        Ok(0)
    }

    pub(in crate::cpu_m68k) fn op_reset(&mut self, _opcode: Word) -> Result<Ticks> {
        if !self.regs.sr.supervisor() {
            return self.privilege_violation();
        }
        debug!("RESET instruction at {:08X}", self.regs.instruction_pc);
        self.bus.reset(false)?;
        Ok(RESET_CYCLES)
    }

    pub(in crate::cpu_m68k) fn op_rts(&mut self, _opcode: Word) -> Result<Ticks> {
        let pc = self.pop_long()?;
        self.set_pc(pc)?;
        Ok(0)
    }

    pub(in crate::cpu_m68k) fn op_rtr(&mut self, _opcode: Word) -> Result<Ticks> {
        let sp = self.regs.read_a::<Address>(7);
        let ccr = self.read_ticks::<Word>(sp)?;
        let pc = self.read_ticks::<Long>(sp.wrapping_add(2))?;
        self.regs.write_a(7, sp.wrapping_add(6));
        self.set_ccr(ccr as u8);
        self.set_pc(pc)?;
        Ok(0)
    }

    /// RTD #d16 (68010+)
    pub(in crate::cpu_m68k) fn op_rtd(&mut self, _opcode: Word) -> Result<Ticks> {
        let disp = self.next_iword()? as i16 as i32;
        let pc = self.pop_long()?;
        let sp = self.regs.read_a::<Address>(7);
        self.regs.write_a(7, sp.wrapping_add_signed(disp));
        self.set_pc(pc)?;
        Ok(0)
    }

    /// Bcc/BRA/BSR
    pub(in crate::cpu_m68k) fn op_bcc(&mut self, opcode: Word) -> Result<Ticks> {
        let cond = (opcode >> 8) & 0x0F;
        let base = self.get_pc();
        let disp8 = opcode as u8;
        let disp: Address = match disp8 {
            0x00 => self.next_iword()? as i16 as i32 as Address,
            0xFF if self.config.model.is_020_or_later() => self.next_ilong()?,
            d => d as i8 as i32 as Address,
        };
        let target = base.wrapping_add(disp);

        match cond {
            // BSR
            0b0001 => {
                let ret = self.get_pc();
                self.push_long(ret)?;
                self.set_pc(target)?;
                Ok(0)
            }
            c if alu::test_cc(c, self.regs.sr) => {
                self.set_pc(target)?;
                Ok(2)
            }
            _ => Ok(4),
        }
    }

    pub(in crate::cpu_m68k) fn op_dbcc(&mut self, opcode: Word) -> Result<Ticks> {
        let cond = (opcode >> 8) & 0x0F;
        let reg = reg_lo(opcode);
        let base = self.get_pc();
        let disp = self.next_iword()? as i16 as i32;

        if alu::test_cc(cond, self.regs.sr) {
            return Ok(4);
        }
        let counter = self.regs.read_d::<Word>(reg).wrapping_sub(1);
        self.regs.write_d(reg, counter);
        if counter == 0xFFFF {
            return Ok(6);
        }
        self.set_pc(base.wrapping_add_signed(disp))?;
        Ok(2)
    }

    pub(in crate::cpu_m68k) fn op_scc(&mut self, opcode: Word) -> Result<Ticks> {
        let cond = (opcode >> 8) & 0x0F;
        let set = alu::test_cc(cond, self.regs.sr);
        self.write_ea::<Byte>(opcode, if set { 0xFF } else { 0 })?;
        Ok(if set && opcode & 0x38 == 0 { 2 } else { 0 })
    }

    pub(in crate::cpu_m68k) fn op_jmp(&mut self, opcode: Word) -> Result<Ticks> {
        let target = self.ea_control_address(opcode)?;
        self.set_pc(target)?;
        Ok(0)
    }

    pub(in crate::cpu_m68k) fn op_jsr(&mut self, opcode: Word) -> Result<Ticks> {
        let target = self.ea_control_address(opcode)?;
        let ret = self.get_pc();
        self.push_long(ret)?;
        self.set_pc(target)?;
        Ok(0)
    }

    pub(in crate::cpu_m68k) fn op_lea(&mut self, opcode: Word) -> Result<Ticks> {
        let addr = self.ea_control_address(opcode)?;
        self.regs.write_a(reg_hi(opcode), addr);
        Ok(0)
    }

    pub(in crate::cpu_m68k) fn op_pea(&mut self, opcode: Word) -> Result<Ticks> {
        let addr = self.ea_control_address(opcode)?;
        self.push_long(addr)?;
        Ok(0)
    }

    fn link(&mut self, reg: usize, disp: Address) -> Result<()> {
        let an = self.regs.read_a::<Address>(reg);
        let sp = self.regs.read_a::<Address>(7).wrapping_sub(4);
        self.write_ticks(sp, an)?;
        self.regs.write_a(reg, sp);
        self.regs.write_a(7, sp.wrapping_add(disp));
        Ok(())
    }

    /// LINK.W An,#d16
    pub(in crate::cpu_m68k) fn op_link(&mut self, opcode: Word) -> Result<Ticks> {
        let disp = self.next_iword()? as i16 as i32 as Address;
        self.link(reg_lo(opcode), disp)?;
        Ok(0)
    }

    /// LINK.L An,#d32 (68020+)
    pub(in crate::cpu_m68k) fn op_link_l(&mut self, opcode: Word) -> Result<Ticks> {
        let disp = self.next_ilong()?;
        self.link(reg_lo(opcode), disp)?;
        Ok(0)
    }

    pub(in crate::cpu_m68k) fn op_unlk(&mut self, opcode: Word) -> Result<Ticks> {
        let reg = reg_lo(opcode);
        let an = self.regs.read_a::<Address>(reg);
        let value = self.read_ticks::<Long>(an)?;
        self.regs.write_a(7, an.wrapping_add(4));
        self.regs.write_a(reg, value);
        Ok(0)
    }

    pub(in crate::cpu_m68k) fn op_move_usp(&mut self, opcode: Word) -> Result<Ticks> {
        if !self.regs.sr.supervisor() {
            return self.privilege_violation();
        }
        let reg = reg_lo(opcode);
        if opcode & 0x08 != 0 {
            let usp = self.regs.usp;
            self.regs.write_a(reg, usp);
        } else {
            self.regs.usp = self.regs.read_a(reg);
        }
        Ok(0)
    }

    pub(in crate::cpu_m68k) fn op_move_from_sr(&mut self, opcode: Word) -> Result<Ticks> {
        if self.config.model.is_010_or_later() && !self.regs.sr.supervisor() {
            return self.privilege_violation();
        }
        let sr = self.make_sr();
        self.write_ea(opcode, sr)?;
        Ok(2)
    }

    /// MOVE CCR,<ea> (68010+)
    pub(in crate::cpu_m68k) fn op_move_from_ccr(&mut self, opcode: Word) -> Result<Ticks> {
        let ccr = Word::from(self.regs.sr.ccr());
        self.write_ea(opcode, ccr)?;
        Ok(0)
    }

    pub(in crate::cpu_m68k) fn op_move_to_ccr(&mut self, opcode: Word) -> Result<Ticks> {
        let v = self.read_ea::<Word>(opcode)?;
        self.set_ccr(v as u8);
        Ok(4)
    }

    pub(in crate::cpu_m68k) fn op_move_to_sr(&mut self, opcode: Word) -> Result<Ticks> {
        if !self.regs.sr.supervisor() {
            return self.privilege_violation();
        }
        let v = self.read_ea::<Word>(opcode)?;
        self.set_sr(v);
        Ok(4)
    }

    /// ORI/ANDI/EORI #imm,CCR
    pub(in crate::cpu_m68k) fn op_logic_ccr<const OP: u8>(&mut self, _opcode: Word) -> Result<Ticks> {
        let imm = self.next_iword()? as u8;
        let ccr = apply_logic(OP, self.regs.sr.ccr(), imm);
        self.set_ccr(ccr);
        Ok(8)
    }

    /// ORI/ANDI/EORI #imm,SR
    pub(in crate::cpu_m68k) fn op_logic_sr<const OP: u8>(&mut self, _opcode: Word) -> Result<Ticks> {
        if !self.regs.sr.supervisor() {
            return self.privilege_violation();
        }
        let imm = self.next_iword()?;
        let sr = apply_logic(OP, self.make_sr(), imm);
        self.set_sr(sr);
        Ok(8)
    }

    /// MOVEC (68010+)
    pub(in crate::cpu_m68k) fn op_movec(&mut self, opcode: Word) -> Result<Ticks> {
        if !self.regs.sr.supervisor() {
            return self.privilege_violation();
        }
        let ext = self.next_iword()?;
        let reg = usize::from(ext >> 12) & 7;
        let is_a = ext & 0x8000 != 0;
        let ctrl = ext & 0x0FFF;

        if opcode & 1 == 0 {
            // Control register to general register
            let Some(v) = self.movec_read(ctrl) else {
                return self.exception_at_instruction(VECTOR_ILLEGAL);
            };
            if is_a {
                self.regs.write_a(reg, v);
            } else {
                self.regs.write_d(reg, v);
            }
        } else {
            let v: Long = if is_a {
                self.regs.read_a(reg)
            } else {
                self.regs.read_d(reg)
            };
            if !self.movec_write(ctrl, v) {
                return self.exception_at_instruction(VECTOR_ILLEGAL);
            }
        }
        Ok(6)
    }

    fn movec_read(&mut self, ctrl: Word) -> Option<Long> {
        let model = self.config.model;
        Some(match ctrl {
            0x000 => Long::from(self.regs.sfc),
            0x001 => Long::from(self.regs.dfc),
            0x800 => self.regs.usp,
            0x801 => self.regs.vbr,
            0x002 if model.is_020_or_later() => self.regs.cacr,
            0x802 if matches!(model, CpuModel::M68020 | CpuModel::M68030) => self.regs.caar,
            0x803 if model.has_msp() => self.regs.msp,
            0x804 if model.has_msp() => self.regs.isp,
            0x808 if model == CpuModel::M68060 => self.regs.pcr,
            // Bus control register, no external bus controller emulated
            0x008 if model == CpuModel::M68060 => 0,
            _ => return self.mmu_movec_read(ctrl),
        })
    }

    fn movec_write(&mut self, ctrl: Word, v: Long) -> bool {
        let model = self.config.model;
        match ctrl {
            0x000 => self.regs.sfc = (v & 7) as u8,
            0x001 => self.regs.dfc = (v & 7) as u8,
            0x800 => self.regs.usp = v,
            0x801 => self.regs.vbr = v,
            0x002 if model.is_020_or_later() => self.write_cacr(v),
            0x802 if matches!(model, CpuModel::M68020 | CpuModel::M68030) => self.regs.caar = v,
            0x803 if model.has_msp() => self.regs.msp = v,
            0x804 if model.has_msp() => self.regs.isp = v,
            // Only the low byte is writable, ID and revision are fixed
            0x808 if model == CpuModel::M68060 => {
                self.regs.pcr = (self.regs.pcr & 0xFFFFFF00) | (v & 0xFF)
            }
            0x008 if model == CpuModel::M68060 => (),
            _ => return self.mmu_movec_write(ctrl, v),
        }
        true
    }

    /// CACR write with the 68020/68030 cache maintenance bits
    pub(in crate::cpu_m68k) fn write_cacr(&mut self, v: Long) {
        let model = self.config.model;
        if matches!(model, CpuModel::M68020 | CpuModel::M68030) {
            if v & CACR_CLEAR != 0 {
                self.icache.clear();
                self.jit.clear();
            }
            if v & CACR_CLEAR_ENTRY != 0 {
                let caar = self.regs.caar;
                self.icache.invalidate(caar & !3, 4);
            }
            // Clear bits always read as zero (instruction and data cache)
            self.regs.cacr = v & model.cacr_mask() & !0x0C0C;
        } else {
            self.regs.cacr = v & model.cacr_mask();
        }
        trace!("CACR = {:08X}", self.regs.cacr);
    }

    pub(in crate::cpu_m68k) fn op_moveq(&mut self, opcode: Word) -> Result<Ticks> {
        let value = opcode as u8 as i8 as i32 as Long;
        self.regs.write_d(reg_hi(opcode), value);
        self.set_ccr(alu::logic(value, self.regs.sr));
        Ok(0)
    }

    pub(in crate::cpu_m68k) fn op_move<T: CpuSized>(&mut self, opcode: Word) -> Result<Ticks> {
        let value = self.read_ea::<T>(opcode)?;
        let dest = self.dest_operand::<T>(AddressingMode::from_move_dest(opcode))?;
        self.write_operand(dest, value)?;
        self.set_ccr(alu::logic(value, self.regs.sr));
        Ok(0)
    }

    pub(in crate::cpu_m68k) fn op_movea<T: CpuSized>(&mut self, opcode: Word) -> Result<Ticks> {
        let value = self.read_ea::<T>(opcode)?;
        self.regs.write_a(reg_hi(opcode), value);
        Ok(0)
    }

    pub(in crate::cpu_m68k) fn op_clr<T: CpuSized>(&mut self, opcode: Word) -> Result<Ticks> {
        self.write_ea(opcode, T::zero())?;
        self.set_ccr(alu::logic(T::zero(), self.regs.sr));
        Ok(if std::mem::size_of::<T>() == 4 && opcode & 0x38 == 0 { 2 } else { 0 })
    }

    pub(in crate::cpu_m68k) fn op_tst<T: CpuSized>(&mut self, opcode: Word) -> Result<Ticks> {
        let value = self.read_ea::<T>(opcode)?;
        self.set_ccr(alu::logic(value, self.regs.sr));
        Ok(0)
    }

    pub(in crate::cpu_m68k) fn op_not<T: CpuSized>(&mut self, opcode: Word) -> Result<Ticks> {
        let op = self.resolve_opcode_ea::<T>(opcode)?;
        let result = !self.read_operand::<T>(op)?;
        self.write_operand(op, result)?;
        self.set_ccr(alu::logic(result, self.regs.sr));
        Ok(0)
    }

    /// NEG/NEGX
    pub(in crate::cpu_m68k) fn op_neg<T: CpuSized, const EXTEND: bool>(
        &mut self,
        opcode: Word,
    ) -> Result<Ticks> {
        let op = self.resolve_opcode_ea::<T>(opcode)?;
        let value = self.read_operand::<T>(op)?;
        let (result, ccr) = alu::sub(T::zero(), value, EXTEND, self.regs.sr);
        self.write_operand(op, result)?;
        self.set_ccr(ccr);
        Ok(0)
    }

    pub(in crate::cpu_m68k) fn op_swap(&mut self, opcode: Word) -> Result<Ticks> {
        let reg = reg_lo(opcode);
        let result = self.regs.read_d::<Long>(reg).rotate_left(16);
        self.regs.write_d(reg, result);
        self.set_ccr(alu::logic(result, self.regs.sr));
        Ok(0)
    }

    /// EXT.W, EXT.L, EXTB.L
    pub(in crate::cpu_m68k) fn op_ext(&mut self, opcode: Word) -> Result<Ticks> {
        let reg = reg_lo(opcode);
        let d = self.regs.read_d::<Long>(reg);
        match (opcode >> 6) & 7 {
            0b010 => {
                let r = d as Byte as i8 as i16 as Word;
                self.regs.write_d(reg, r);
                self.set_ccr(alu::logic(r, self.regs.sr));
            }
            0b011 => {
                let r = d as Word as i16 as i32 as Long;
                self.regs.write_d(reg, r);
                self.set_ccr(alu::logic(r, self.regs.sr));
            }
            _ => {
                let r = d as Byte as i8 as i32 as Long;
                self.regs.write_d(reg, r);
                self.set_ccr(alu::logic(r, self.regs.sr));
            }
        }
        Ok(0)
    }

    /// EXG Dx,Dy / Ax,Ay / Dx,Ay
    pub(in crate::cpu_m68k) fn op_exg(&mut self, opcode: Word) -> Result<Ticks> {
        let (x, y) = (reg_hi(opcode), reg_lo(opcode));
        match (opcode >> 3) & 0x1F {
            0b01000 => self.regs.d.swap(x, y),
            0b01001 => {
                let ax = self.regs.read_a::<Long>(x);
                let ay = self.regs.read_a::<Long>(y);
                self.regs.write_a(x, ay);
                self.regs.write_a(y, ax);
            }
            _ => {
                let dx = self.regs.read_d::<Long>(x);
                let ay = self.regs.read_a::<Long>(y);
                self.regs.write_d(x, ay);
                self.regs.write_a(y, dx);
            }
        }
        Ok(2)
    }

    /// TAS, an indivisible read-modify-write cycle
    pub(in crate::cpu_m68k) fn op_tas(&mut self, opcode: Word) -> Result<Ticks> {
        let op = self.resolve_opcode_ea::<Byte>(opcode)?;
        self.rmw = true;
        let value = self.read_operand::<Byte>(op)?;
        self.set_ccr(alu::logic(value, self.regs.sr));
        self.write_operand(op, value | 0x80)?;
        self.rmw = false;
        Ok(2)
    }

    /// ORI/ANDI/EORI #imm,<ea>
    pub(in crate::cpu_m68k) fn op_logic_imm<T: CpuSized, const OP: u8>(
        &mut self,
        opcode: Word,
    ) -> Result<Ticks> {
        let imm = self.fetch_immediate::<T>()?;
        let op = self.resolve_opcode_ea::<T>(opcode)?;
        let result = apply_logic(OP, self.read_operand::<T>(op)?, imm);
        self.write_operand(op, result)?;
        self.set_ccr(alu::logic(result, self.regs.sr));
        Ok(if opcode & 0x38 == 0 && std::mem::size_of::<T>() == 4 { 4 } else { 0 })
    }

    /// ADDI/SUBI #imm,<ea>
    pub(in crate::cpu_m68k) fn op_arith_imm<T: CpuSized, const SUB: bool>(
        &mut self,
        opcode: Word,
    ) -> Result<Ticks> {
        let imm = self.fetch_immediate::<T>()?;
        let op = self.resolve_opcode_ea::<T>(opcode)?;
        let value = self.read_operand::<T>(op)?;
        let (result, ccr) = if SUB {
            alu::sub(value, imm, false, self.regs.sr)
        } else {
            alu::add(value, imm, false, self.regs.sr)
        };
        self.write_operand(op, result)?;
        self.set_ccr(ccr);
        Ok(if opcode & 0x38 == 0 && std::mem::size_of::<T>() == 4 { 4 } else { 0 })
    }

    pub(in crate::cpu_m68k) fn op_cmpi<T: CpuSized>(&mut self, opcode: Word) -> Result<Ticks> {
        let imm = self.fetch_immediate::<T>()?;
        let value = self.read_ea::<T>(opcode)?;
        self.set_ccr(alu::cmp(value, imm, self.regs.sr));
        Ok(if opcode & 0x38 == 0 && std::mem::size_of::<T>() == 4 { 2 } else { 0 })
    }

    /// ADDQ/SUBQ #q,<ea> (data destination)
    pub(in crate::cpu_m68k) fn op_arith_quick<T: CpuSized, const SUB: bool>(
        &mut self,
        opcode: Word,
    ) -> Result<Ticks> {
        let q = match reg_hi(opcode) {
            0 => 8,
            n => n as Long,
        };
        let op = self.resolve_opcode_ea::<T>(opcode)?;
        let value = self.read_operand::<T>(op)?;
        let (result, ccr) = if SUB {
            alu::sub(value, T::chop(q), false, self.regs.sr)
        } else {
            alu::add(value, T::chop(q), false, self.regs.sr)
        };
        self.write_operand(op, result)?;
        self.set_ccr(ccr);
        Ok(if opcode & 0x38 == 0 && std::mem::size_of::<T>() == 4 { 4 } else { 0 })
    }

    /// ADDQ/SUBQ #q,An, always on the full register without flags
    pub(in crate::cpu_m68k) fn op_arith_quick_an<const SUB: bool>(&mut self, opcode: Word) -> Result<Ticks> {
        let q = match reg_hi(opcode) {
            0 => 8,
            n => n as Long,
        };
        let reg = reg_lo(opcode);
        let an = self.regs.read_a::<Long>(reg);
        let result = if SUB { an.wrapping_sub(q) } else { an.wrapping_add(q) };
        self.regs.write_a(reg, result);
        Ok(4)
    }

    /// ADD/SUB <ea>,Dn
    pub(in crate::cpu_m68k) fn op_arith_dn<T: CpuSized, const SUB: bool>(
        &mut self,
        opcode: Word,
    ) -> Result<Ticks> {
        let reg = reg_hi(opcode);
        let src = self.read_ea::<T>(opcode)?;
        let dn = self.regs.read_d::<T>(reg);
        let (result, ccr) = if SUB {
            alu::sub(dn, src, false, self.regs.sr)
        } else {
            alu::add(dn, src, false, self.regs.sr)
        };
        self.regs.write_d(reg, result);
        self.set_ccr(ccr);
        Ok(self.alu_dn_cycles::<T>(opcode))
    }

    /// ADD/SUB Dn,<ea>
    pub(in crate::cpu_m68k) fn op_arith_ea<T: CpuSized, const SUB: bool>(
        &mut self,
        opcode: Word,
    ) -> Result<Ticks> {
        let dn = self.regs.read_d::<T>(reg_hi(opcode));
        let op = self.resolve_opcode_ea::<T>(opcode)?;
        let value = self.read_operand::<T>(op)?;
        let (result, ccr) = if SUB {
            alu::sub(value, dn, false, self.regs.sr)
        } else {
            alu::add(value, dn, false, self.regs.sr)
        };
        self.write_operand(op, result)?;
        self.set_ccr(ccr);
        Ok(0)
    }

    /// ADDX/SUBX, Dy,Dx or -(Ay),-(Ax)
    pub(in crate::cpu_m68k) fn op_arith_x<T: CpuSized, const SUB: bool>(
        &mut self,
        opcode: Word,
    ) -> Result<Ticks> {
        let (rx, ry) = (reg_hi(opcode), reg_lo(opcode));
        let (src, dst) = if opcode & 0x08 != 0 {
            let src = self.resolve_ea::<T>(AddressingMode::IndirectPreDec(ry))?;
            let dst = self.resolve_ea::<T>(AddressingMode::IndirectPreDec(rx))?;
            (src, dst)
        } else {
            (Operand::DataRegister(ry), Operand::DataRegister(rx))
        };
        let s = self.read_operand::<T>(src)?;
        let d = self.read_operand::<T>(dst)?;
        let (result, ccr) = if SUB {
            alu::sub(d, s, true, self.regs.sr)
        } else {
            alu::add(d, s, true, self.regs.sr)
        };
        self.write_operand(dst, result)?;
        self.set_ccr(ccr);
        Ok(if std::mem::size_of::<T>() == 4 && opcode & 0x08 == 0 { 4 } else { 0 })
    }

    /// ADDA/SUBA <ea>,An
    pub(in crate::cpu_m68k) fn op_arith_an<T: CpuSized, const SUB: bool>(
        &mut self,
        opcode: Word,
    ) -> Result<Ticks> {
        let reg = reg_hi(opcode);
        let src = self.read_ea::<T>(opcode)?.expand_sign_extend();
        let an = self.regs.read_a::<Long>(reg);
        let result = if SUB {
            an.wrapping_sub(src)
        } else {
            an.wrapping_add(src)
        };
        self.regs.write_a(reg, result);
        Ok(match AddressingMode::from_ea(opcode) {
            Some(m) if m.is_register() || m == AddressingMode::Immediate => 4,
            _ => 2,
        })
    }

    pub(in crate::cpu_m68k) fn op_cmp<T: CpuSized>(&mut self, opcode: Word) -> Result<Ticks> {
        let src = self.read_ea::<T>(opcode)?;
        let dn = self.regs.read_d::<T>(reg_hi(opcode));
        self.set_ccr(alu::cmp(dn, src, self.regs.sr));
        Ok(if std::mem::size_of::<T>() == 4 { 2 } else { 0 })
    }

    pub(in crate::cpu_m68k) fn op_cmpa<T: CpuSized>(&mut self, opcode: Word) -> Result<Ticks> {
        let src = self.read_ea::<T>(opcode)?.expand_sign_extend();
        let an = self.regs.read_a::<Long>(reg_hi(opcode));
        self.set_ccr(alu::cmp(an, src, self.regs.sr));
        Ok(2)
    }

    /// AND/OR <ea>,Dn
    pub(in crate::cpu_m68k) fn op_logic_dn<T: CpuSized, const OP: u8>(
        &mut self,
        opcode: Word,
    ) -> Result<Ticks> {
        let reg = reg_hi(opcode);
        let src = self.read_ea::<T>(opcode)?;
        let result = apply_logic(OP, self.regs.read_d::<T>(reg), src);
        self.regs.write_d(reg, result);
        self.set_ccr(alu::logic(result, self.regs.sr));
        Ok(self.alu_dn_cycles::<T>(opcode))
    }

    /// AND/OR/EOR Dn,<ea>
    pub(in crate::cpu_m68k) fn op_logic_ea<T: CpuSized, const OP: u8>(
        &mut self,
        opcode: Word,
    ) -> Result<Ticks> {
        let dn = self.regs.read_d::<T>(reg_hi(opcode));
        let op = self.resolve_opcode_ea::<T>(opcode)?;
        let result = apply_logic(OP, self.read_operand::<T>(op)?, dn);
        self.write_operand(op, result)?;
        self.set_ccr(alu::logic(result, self.regs.sr));
        Ok(if opcode & 0x38 == 0 && std::mem::size_of::<T>() == 4 { 4 } else { 0 })
    }

    /// MULU.W/MULS.W <ea>,Dn
    pub(in crate::cpu_m68k) fn op_mul_w<const SIGNED: bool>(&mut self, opcode: Word) -> Result<Ticks> {
        let reg = reg_hi(opcode);
        let src = self.read_ea::<Word>(opcode)?;
        let dn = self.regs.read_d::<Word>(reg);
        let result = if SIGNED {
            (src as i16 as i32).wrapping_mul(dn as i16 as i32) as Long
        } else {
            Long::from(src) * Long::from(dn)
        };
        self.regs.write_d(reg, result);
        self.set_ccr(alu::logic(result, self.regs.sr));
        Ok(if SIGNED { MULS_CYCLES } else { MULU_CYCLES })
    }

    /// DIVU.W/DIVS.W <ea>,Dn
    pub(in crate::cpu_m68k) fn op_div_w<const SIGNED: bool>(&mut self, opcode: Word) -> Result<Ticks> {
        let reg = reg_hi(opcode);
        let divisor = self.read_ea::<Word>(opcode)?;
        if divisor == 0 {
            self.regs.sr.set_c(false);
            return self.exception_after_instruction(VECTOR_DIV_ZERO);
        }

        let dividend = self.regs.read_d::<Long>(reg);
        let div = if SIGNED {
            alu::divs_w(dividend, divisor)
        } else {
            alu::divu_w(dividend, divisor)
        };
        if let Division::Ok {
            quotient,
            remainder,
        } = div
        {
            self.regs.write_d(reg, (remainder << 16) | (quotient & 0xFFFF));
        }
        self.set_ccr(alu::div_flags(div, 0x8000, self.regs.sr));
        Ok(if SIGNED { DIVS_CYCLES } else { DIVU_CYCLES })
    }

    /// MULU.L/MULS.L <ea>,Dl or Dh:Dl (68020+)
    pub(in crate::cpu_m68k) fn op_mul_l(&mut self, opcode: Word) -> Result<Ticks> {
        let ext = self.next_iword()?;
        let src = self.read_ea::<Long>(opcode)?;
        let dl = usize::from((ext >> 12) & 7);
        let dh = usize::from(ext & 7);
        let signed = ext & 0x0800 != 0;
        let quad = ext & 0x0400 != 0;
        let a = self.regs.read_d::<Long>(dl);

        let wide: u64 = if signed {
            (i64::from(a as i32) * i64::from(src as i32)) as u64
        } else {
            u64::from(a) * u64::from(src)
        };
        let lo = wide as Long;
        let hi = (wide >> 32) as Long;

        let mut f = self.regs.sr;
        f.set_c(false);
        if quad {
            self.regs.write_d(dh, hi);
            self.regs.write_d(dl, lo);
            f.set_v(false);
            f.set_z(wide == 0);
            f.set_n(hi & 0x80000000 != 0);
        } else {
            self.regs.write_d(dl, lo);
            let overflow = if signed {
                i64::from(lo as i32) != wide as i64
            } else {
                hi != 0
            };
            f.set_v(overflow);
            f.set_z(lo == 0);
            f.set_n(lo & 0x80000000 != 0);
        }
        self.set_ccr(f.ccr());
        Ok(MUL_L_CYCLES)
    }

    /// DIVU.L/DIVS.L <ea>,Dr:Dq (68020+)
    pub(in crate::cpu_m68k) fn op_div_l(&mut self, opcode: Word) -> Result<Ticks> {
        let ext = self.next_iword()?;
        let divisor = self.read_ea::<Long>(opcode)?;
        let dq = usize::from((ext >> 12) & 7);
        let dr = usize::from(ext & 7);
        let signed = ext & 0x0800 != 0;
        let quad = ext & 0x0400 != 0;

        if divisor == 0 {
            self.regs.sr.set_c(false);
            return self.exception_after_instruction(VECTOR_DIV_ZERO);
        }

        let lo = self.regs.read_d::<Long>(dq);
        let dividend: u64 = if quad {
            (u64::from(self.regs.read_d::<Long>(dr)) << 32) | u64::from(lo)
        } else if signed {
            i64::from(lo as i32) as u64
        } else {
            u64::from(lo)
        };

        let result = if signed {
            let (n, d) = (dividend as i64, i64::from(divisor as i32));
            match n.checked_div(d) {
                Some(q) if q >= i64::from(i32::MIN) && q <= i64::from(i32::MAX) => {
                    Some((q as Long, (n % d) as Long))
                }
                _ => None,
            }
        } else {
            let q = dividend / u64::from(divisor);
            (q <= u64::from(Long::MAX)).then(|| (q as Long, (dividend % u64::from(divisor)) as Long))
        };

        let mut f = self.regs.sr;
        f.set_c(false);
        match result {
            None => f.set_v(true),
            Some((q, r)) => {
                if dr != dq {
                    self.regs.write_d(dr, r);
                }
                self.regs.write_d(dq, q);
                f.set_v(false);
                f.set_z(q == 0);
                f.set_n(q & 0x80000000 != 0);
            }
        }
        self.set_ccr(f.ccr());
        Ok(DIV_L_CYCLES)
    }

    /// ASd/LSd/ROXd/ROd on a data register
    pub(in crate::cpu_m68k) fn op_shift_reg<T: CpuSized>(&mut self, opcode: Word) -> Result<Ticks> {
        let left = opcode & 0x0100 != 0;
        let op = ShiftOp::from_bits(opcode >> 3);
        let count = if opcode & 0x20 != 0 {
            (self.regs.read_d::<Long>(reg_hi(opcode)) % 64) as usize
        } else {
            match reg_hi(opcode) {
                0 => 8,
                n => n,
            }
        };
        let reg = reg_lo(opcode);
        let (result, ccr) = alu::shift(op, left, self.regs.read_d::<T>(reg), count, self.regs.sr);
        self.regs.write_d(reg, result);
        self.set_ccr(ccr);

        let base = if std::mem::size_of::<T>() == 4 { 4 } else { 2 };
        Ok(base + 2 * count as Ticks)
    }

    /// ASd/LSd/ROXd/ROd <ea>, word by one bit
    pub(in crate::cpu_m68k) fn op_shift_mem(&mut self, opcode: Word) -> Result<Ticks> {
        let left = opcode & 0x0100 != 0;
        let op = ShiftOp::from_bits(opcode >> 9);
        let dest = self.resolve_opcode_ea::<Word>(opcode)?;
        let value = self.read_operand::<Word>(dest)?;
        let (result, ccr) = alu::shift(op, left, value, 1, self.regs.sr);
        self.write_operand(dest, result)?;
        self.set_ccr(ccr);
        Ok(0)
    }

    /// BTST/BCHG/BCLR/BSET, bit number from Dn or an immediate word.
    /// Registers operate on 32 bits, memory on bytes.
    pub(in crate::cpu_m68k) fn op_bit<const OP: u8, const DYNAMIC: bool>(
        &mut self,
        opcode: Word,
    ) -> Result<Ticks> {
        let bit = if DYNAMIC {
            self.regs.read_d::<Long>(reg_hi(opcode))
        } else {
            Long::from(self.next_iword()? & 0xFF)
        };

        if opcode & 0x38 == 0 {
            let reg = reg_lo(opcode);
            let mask = 1 << (bit % 32);
            let value = self.regs.read_d::<Long>(reg);
            self.regs.sr.set_z(value & mask == 0);
            let result = match OP {
                BIT_CHG => value ^ mask,
                BIT_CLR => value & !mask,
                BIT_SET => value | mask,
                _ => return Ok(2),
            };
            self.regs.write_d(reg, result);
            return Ok(if OP == BIT_CLR { 6 } else { 4 });
        }

        let mask: Byte = 1 << (bit % 8);
        let dest = self.resolve_opcode_ea::<Byte>(opcode)?;
        let value = self.read_operand::<Byte>(dest)?;
        self.regs.sr.set_z(value & mask == 0);
        let result = match OP {
            BIT_CHG => value ^ mask,
            BIT_CLR => value & !mask,
            BIT_SET => value | mask,
            _ => return Ok(0),
        };
        self.write_operand(dest, result)?;
        Ok(0)
    }

    /// MOVEM registers to memory
    pub(in crate::cpu_m68k) fn op_movem_to_mem<T: CpuSized>(&mut self, opcode: Word) -> Result<Ticks> {
        let mask = self.next_iword()?;
        let sz = std::mem::size_of::<T>() as Address;
        let reg_value = |cpu: &Self, i: usize| -> T {
            if i < 8 {
                cpu.regs.read_d(i)
            } else {
                cpu.regs.read_a(i - 8)
            }
        };

        if (opcode >> 3) & 7 == 0b100 {
            // -(An): mask is reversed, A7 first, stored downwards
            let an = reg_lo(opcode);
            let mut addr = self.regs.read_a::<Address>(an);
            for i in 0..16 {
                if mask & (1 << i) == 0 {
                    continue;
                }
                addr = addr.wrapping_sub(sz);
                let v = reg_value(self, 15 - i);
                self.write_ticks(addr, v)?;
            }
            self.regs.write_a(an, addr);
            return Ok(0);
        }

        let mut addr = self.ea_control_address(opcode)?;
        for i in 0..16 {
            if mask & (1 << i) == 0 {
                continue;
            }
            let v = reg_value(self, i);
            self.write_ticks(addr, v)?;
            addr = addr.wrapping_add(sz);
        }
        Ok(0)
    }

    /// MOVEM memory to registers, words are sign extended
    pub(in crate::cpu_m68k) fn op_movem_to_reg<T: CpuSized>(&mut self, opcode: Word) -> Result<Ticks> {
        let mask = self.next_iword()?;
        let sz = std::mem::size_of::<T>() as Address;
        let postinc = (opcode >> 3) & 7 == 0b011;

        let mut addr = if postinc {
            self.regs.read_a::<Address>(reg_lo(opcode))
        } else {
            self.ea_control_address(opcode)?
        };
        for i in 0..16 {
            if mask & (1 << i) == 0 {
                continue;
            }
            let v = self.read_ticks::<T>(addr)?.expand_sign_extend();
            if i < 8 {
                self.regs.write_d(i, v);
            } else {
                self.regs.write_a(i - 8, v);
            }
            addr = addr.wrapping_add(sz);
        }
        if postinc {
            self.regs.write_a(reg_lo(opcode), addr);
        }
        Ok(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logic_selectors() {
        assert_eq!(apply_logic::<Byte>(LOGIC_OR, 0xF0, 0x0F), 0xFF);
        assert_eq!(apply_logic::<Byte>(LOGIC_AND, 0xF0, 0x3C), 0x30);
        assert_eq!(apply_logic::<Byte>(LOGIC_EOR, 0xFF, 0x0F), 0xF0);
    }

    #[test]
    fn register_fields() {
        // ADD.L D3,D5
        assert_eq!(reg_hi(0xDA83), 5);
        assert_eq!(reg_lo(0xDA83), 3);
    }
}
