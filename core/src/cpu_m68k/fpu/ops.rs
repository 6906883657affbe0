//! FPU instructions

use anyhow::Result;
use arpfloat::Float;
use log::*;

use crate::bus::{Address, Bus, IrqSource};
use crate::cpu_m68k::config::FpuModel;
use crate::cpu_m68k::cpu::CpuM68k;
use crate::cpu_m68k::ea::{AddressingMode, EaClass, Operand};
use crate::cpu_m68k::exception::{
    ExceptionFrame, VECTOR_FORMAT_ERROR, VECTOR_FP_BSUN, VECTOR_FP_UNIMPL_DATA, VECTOR_LINEF,
    VECTOR_TRAPV,
};
use crate::tickable::Ticks;
use crate::types::{Byte, Long, Word};

use super::alu::{
    ext_bits, fpu_arith, implemented_onchip, op_cycles, round_result, valid_opmode,
    valid_opmode_onchip,
};
use super::regs::{FpuExceptions, FpuRegisterFile, FPCR_MASK, FPSR_MASK};
use super::storage::{float_to_format, format_to_float, pow10, BitsExtReal, FpFormat};
use super::{FpuExceptionClass, FpuPendingOp, SEMANTICS_WIDE};

const FMOVE_CTRL_CYCLES: Ticks = 21;
const FMOVEM_CYCLES: Ticks = 25;
const FMOVEM_REG_CYCLES: Ticks = 12;
const FMOVECR_CYCLES: Ticks = 29;
const FBCC_CYCLES: Ticks = 4;
const FSAVE_CYCLES: Ticks = 16;
const FRESTORE_CYCLES: Ticks = 24;

/// Constant ROM entries held as extended precision bit patterns
const ROM_CONSTANTS: [(u8, [Long; 3]); 7] = [
    // pi
    (0x00, [0x4000_0000, 0xC90F_DAA2, 0x2168_C235]),
    // log10(2)
    (0x0B, [0x3FFD_0000, 0x9A20_9A84, 0xFBCF_F798]),
    // e
    (0x0C, [0x4000_0000, 0xADF8_5458, 0xA2BB_4A9A]),
    // log2(e)
    (0x0D, [0x3FFF_0000, 0xB8AA_3B29, 0x5C17_F0BC]),
    // log10(e)
    (0x0E, [0x3FFD_0000, 0xDE5B_D8A9, 0x3728_7195]),
    // ln(2)
    (0x30, [0x3FFE_0000, 0xB172_17F7, 0xD1CF_79AC]),
    // ln(10)
    (0x31, [0x4000_0000, 0x935D_8DDD, 0xAAA8_AC17]),
];

/// FPU state frame, as written by FSAVE
#[derive(Debug, Clone, PartialEq, Eq)]
enum StateFrame {
    Null,
    Idle,
    Exception(FpuPendingOp),
}

/// Sign extends the 7-bit k-factor
const fn k_factor(v: Word) -> i8 {
    ((v as u8) << 1) as i8 >> 1
}

impl<TBus> CpuM68k<TBus>
where
    TBus: Bus<Address, u8> + IrqSource,
{
    fn fpu_model(&self) -> FpuModel {
        self.config.fpu.unwrap_or(FpuModel::M68882)
    }

    /// Charges the execution time of the co-processor
    fn fpu_cycles(&mut self, ticks: Ticks) -> Ticks {
        if !self.fpu_model().is_onchip() {
            self.coprocessor_cycles += ticks;
        }
        ticks
    }

    /// Condition test for FBcc/FDBcc/FScc/FTRAPcc.
    /// Returns the result and whether BSUN is signaled.
    fn fcc(&self, cc: Word) -> Option<(bool, bool)> {
        let nan = self.regs.fpu.fpsr.fpcc_nan();
        let zero = self.regs.fpu.fpsr.fpcc_z();
        let neg = self.regs.fpu.fpsr.fpcc_n();

        Some(match cc & 0b111111 {
            // IEEE aware tests
            0b000001 => (zero, false),                   // EQ
            0b001110 => (!zero, false),                  // NE
            0b000010 => (!nan && !zero && !neg, false),  // OGT
            0b001101 => (nan || zero || neg, false),     // ULE
            0b000011 => (zero || (!nan && !neg), false), // OGE
            0b001100 => (nan || (neg && !zero), false),  // ULT
            0b000100 => (neg && !nan && !zero, false),   // OLT
            0b001011 => (nan || zero || !neg, false),    // UGE
            0b000101 => (zero || (neg && !nan), false),  // OLE
            0b001010 => (nan || (!neg && !zero), false), // UGT
            0b000110 => (!nan && !zero, false),          // OGL
            0b001001 => (nan || zero, false),            // UEQ
            0b000111 => (!nan, false),                   // OR
            0b001000 => (nan, false),                    // UN

            // IEEE nonaware tests, signal BSUN on unordered
            0b010010 => (!nan && !zero && !neg, nan),  // GT
            0b011101 => (nan || zero || neg, nan),     // NGT
            0b010011 => (zero || (!nan && !neg), nan), // GE
            0b011100 => (nan || (neg && !zero), nan),  // NGE
            0b010100 => (neg && !nan && !zero, nan),   // LT
            0b011011 => (nan || zero || !neg, nan),    // NLT
            0b010101 => (zero || (neg && !nan), nan),  // LE
            0b011010 => (nan || (!neg && !zero), nan), // NLE
            0b010110 => (!nan && !zero, nan),          // GL
            0b011001 => (nan || zero, nan),            // NGL
            0b010111 => (!nan, nan),                   // GLE
            0b011000 => (nan, nan),                    // NGLE

            // Miscellaneous
            0b000000 => (false, false), // F
            0b001111 => (true, false),  // T
            0b010000 => (false, nan),   // SF
            0b011111 => (true, nan),    // ST
            0b010001 => (zero, nan),    // SEQ
            0b011110 => (!zero, nan),   // SNE

            _ => return None,
        })
    }

    /// Evaluates a predicate, signaling BSUN. Returns None if the
    /// instruction was aborted by an exception.
    fn fpu_test(&mut self, cc: Word) -> Result<Option<bool>> {
        self.fpu.initialized = true;
        let Some((test, bsun)) = self.fcc(cc) else {
            self.exception_at_instruction(VECTOR_LINEF)?;
            return Ok(None);
        };
        self.regs.fpu.fpsr.exs_mut().set_bsun(bsun);
        if bsun {
            self.regs.fpu.fpsr.aexc_mut().set_iop(true);
            if self.regs.fpu.fpcr.exc().bsun() {
                self.fpu.exceptions += 1;
                self.exception_at_instruction(VECTOR_FP_BSUN)?;
                return Ok(None);
            }
        }
        Ok(Some(test))
    }

    /// Holds back an operation and raises its exception
    fn fpu_defer(&mut self, op: FpuPendingOp) -> Result<Ticks> {
        debug!(
            "FPU exception {} ({}) at {:08X}, opcode {:04X} {:04X}",
            op.vector, op.class, self.regs.instruction_pc, op.opcode, op.ext
        );
        let frame = match op.class {
            FpuExceptionClass::Arithmetic if self.fpu_model().is_onchip() => ExceptionFrame::FpuPost(op.ea),
            FpuExceptionClass::Arithmetic => ExceptionFrame::Normal,
            _ => ExceptionFrame::InstructionAddress(op.ea),
        };
        self.fpu.pending = Some(op);
        self.fpu.exceptions += 1;
        let pc = self.get_pc();
        self.raise_exception(op.vector, pc, frame)?;
        Ok(0)
    }

    /// General FPU instructions (F-line, co-processor 1, type 000)
    pub(in crate::cpu_m68k) fn op_fpu_general(&mut self, opcode: Word) -> Result<Ticks> {
        let ext = self.next_iword()?;
        self.fpu.initialized = true;
        self.fpu.operations += 1;

        match ext >> 13 {
            0b000 | 0b010 => self.fpu_op_arith(opcode, ext),
            0b011 => self.fpu_op_store(opcode, ext),
            0b100 | 0b101 => self.fpu_op_fmove_control(opcode, ext),
            0b110 | 0b111 => self.fpu_op_fmovem(opcode, ext),
            _ => self.exception_at_instruction(VECTOR_LINEF),
        }
    }

    /// Source operand of an arithmetic operation from an effective address
    fn fpu_source_operand(&mut self, opcode: Word, format: FpFormat) -> Result<Option<(Operand, [Long; 3])>> {
        let mode = match AddressingMode::from_ea(opcode) {
            Some(AddressingMode::AddressRegister(_)) | None => return Ok(None),
            Some(AddressingMode::DataRegister(_)) if !format.is_register_sized() => return Ok(None),
            Some(m) => m,
        };
        let op = self.resolve_ea_len(mode, format.bytes())?;
        let raw = self.fpu_read_raw(op, format)?;
        Ok(Some((op, raw)))
    }

    /// Opclass 000/010: FPm,FPn and <ea>,FPn
    fn fpu_op_arith(&mut self, opcode: Word, ext: Word) -> Result<Ticks> {
        let model = self.fpu_model();
        let onchip = model.is_onchip();
        let from_ea = ext & (1 << 14) != 0;
        let src_spec = (ext >> 10) & 7;
        let dst = usize::from((ext >> 7) & 7);
        let opmode = (ext & 0x7F) as u8;

        if from_ea && src_spec == 0b111 {
            return self.fpu_op_fmovecr(dst, opmode);
        }
        let valid = if onchip { valid_opmode_onchip(opmode) } else { valid_opmode(opmode) };
        if !valid {
            return self.exception_at_instruction(VECTOR_LINEF);
        }

        let rm = self.fpu_rounding_mode();
        self.regs.fpu.fpiar = self.regs.instruction_pc;

        let (src, src_exs, ea) = if from_ea {
            let format = FpFormat::decode(src_spec);
            let Some((op, raw)) = self.fpu_source_operand(opcode, format)? else {
                return self.exception_at_instruction(VECTOR_LINEF);
            };
            let ea = op.address().unwrap_or(0);
            if onchip && format.is_packed() {
                return self.fpu_defer(FpuPendingOp {
                    opcode,
                    ext,
                    source: raw,
                    ea,
                    class: FpuExceptionClass::UnimplementedDataType,
                    vector: VECTOR_FP_UNIMPL_DATA,
                });
            }
            let (v, exs) = format_to_float(raw, format, rm);
            (v, exs, ea)
        } else {
            let v = self.regs.fpu.fp[usize::from(src_spec)].clone();
            let exs = FpuExceptions(0).with_snan(BitsExtReal::from(&v).is_snan());
            (v, exs, 0)
        };

        if onchip && !implemented_onchip(opmode, model) {
            return self.fpu_defer(FpuPendingOp {
                opcode,
                ext,
                source: ext_bits(&src),
                ea,
                class: FpuExceptionClass::UnimplementedInstruction,
                vector: VECTOR_LINEF,
            });
        }

        let bits = self.fpu_precision_bits();
        let Some(mut outcome) = fpu_arith(opmode, &src, &self.regs.fpu.fp[dst], bits, rm) else {
            return self.exception_at_instruction(VECTOR_LINEF);
        };
        outcome.exs.0 |= src_exs.0;

        if let Some(vector) = self.fpu_status(outcome.exs) {
            self.fpu_condition_codes(&outcome.cc);
            return self.fpu_defer(FpuPendingOp {
                opcode,
                ext,
                source: ext_bits(&src),
                ea,
                class: FpuExceptionClass::Arithmetic,
                vector,
            });
        }
        self.fpu_commit(&outcome, dst, usize::from(ext & 7));
        Ok(self.fpu_cycles(op_cycles(opmode, onchip)))
    }

    /// FMOVECR #ccc,FPn
    fn fpu_op_fmovecr(&mut self, dst: usize, offset: u8) -> Result<Ticks> {
        if self.fpu_model().is_onchip() {
            return self.exception_at_instruction(VECTOR_LINEF);
        }
        let rm = self.fpu_rounding_mode();
        let bits = self.fpu_precision_bits();

        let (value, irrational) = match offset {
            0x0F => (Float::zero(SEMANTICS_WIDE, false), false),
            0x32..=0x3F => (pow10(if offset == 0x32 { 0 } else { 1 << (offset - 0x33) }), false),
            o => match ROM_CONSTANTS.iter().find(|(i, _)| *i == o) {
                Some((_, l)) => (Float::from(BitsExtReal::from_longs(*l)).cast(SEMANTICS_WIDE), true),
                // Unassigned entries read as zero
                None => (Float::zero(SEMANTICS_WIDE, false), false),
            },
        };
        let (result, mut exs) = round_result(&value, bits, rm);
        if irrational {
            exs.set_inex2(true);
        }
        self.fpu_condition_codes(&result);
        self.regs.fpu.fp[dst] = result;
        // Inexact constants are never trapped
        self.fpu_status(exs);
        Ok(self.fpu_cycles(FMOVECR_CYCLES))
    }

    /// k-factor of a packed decimal store
    fn fpu_k_factor(&self, ext: Word, format: FpFormat) -> i8 {
        match format {
            FpFormat::Packed => k_factor(ext),
            FpFormat::PackedDynamic => k_factor(self.regs.read_d::<Word>(usize::from((ext >> 4) & 7))),
            _ => 0,
        }
    }

    /// Opclass 011: FMOVE FPm,<ea>
    fn fpu_op_store(&mut self, opcode: Word, ext: Word) -> Result<Ticks> {
        let onchip = self.fpu_model().is_onchip();
        let format = FpFormat::decode(ext >> 10);
        let src = usize::from((ext >> 7) & 7);
        let mode = match AddressingMode::from_ea_class(opcode, EaClass::DataAlterable) {
            Some(AddressingMode::DataRegister(_)) if !format.is_register_sized() => None,
            m => m,
        };
        let Some(mode) = mode else {
            return self.exception_at_instruction(VECTOR_LINEF);
        };
        let k = self.fpu_k_factor(ext, format);
        let op = self.resolve_ea_len(mode, format.bytes())?;
        self.regs.fpu.fpiar = self.regs.instruction_pc;

        let ea = op.address().unwrap_or(0);
        if onchip && format.is_packed() {
            let source = ext_bits(&self.regs.fpu.fp[src]);
            return self.fpu_defer(FpuPendingOp {
                opcode,
                ext,
                source,
                ea,
                class: FpuExceptionClass::UnimplementedDataType,
                vector: VECTOR_FP_UNIMPL_DATA,
            });
        }

        let rm = self.fpu_rounding_mode();
        let (l, exs) = float_to_format(&self.regs.fpu.fp[src], format, k, rm);
        self.fpu_write_raw(op, format, l)?;
        if let Some(vector) = self.fpu_status(exs) {
            let source = ext_bits(&self.regs.fpu.fp[src]);
            return self.fpu_defer(FpuPendingOp {
                opcode,
                ext,
                source,
                ea,
                class: FpuExceptionClass::Arithmetic,
                vector,
            });
        }
        Ok(self.fpu_cycles(op_cycles(0, onchip)))
    }

    /// Opclass 100/101: FMOVE(M) <ea>,FPcr and FPcr,<ea>
    fn fpu_op_fmove_control(&mut self, opcode: Word, ext: Word) -> Result<Ticks> {
        let to_ea = ext & (1 << 13) != 0;
        let list = (ext >> 10) & 7;
        let count = list.count_ones();
        let mode = AddressingMode::from_ea(opcode);
        let valid = match mode {
            None => false,
            _ if list == 0 => false,
            Some(AddressingMode::DataRegister(_)) => count == 1,
            // FPIAR only
            Some(AddressingMode::AddressRegister(_)) => list == 0b001,
            Some(AddressingMode::Immediate) => !to_ea,
            Some(m) if to_ea => m.is_class(EaClass::Alterable),
            Some(_) => true,
        };
        let Some(mode) = mode.filter(|_| valid) else {
            return self.exception_at_instruction(VECTOR_LINEF);
        };

        let op = self.resolve_ea_len(mode, 4 * count)?;
        let selected = [(0b100, 0), (0b010, 1), (0b001, 2)]
            .into_iter()
            .filter(|(bit, _)| list & bit != 0)
            .map(|(_, reg)| reg);
        for (i, reg) in selected.enumerate() {
            let op = match op {
                Operand::Memory(a) => Operand::Memory(a.wrapping_add(4 * i as Address)),
                Operand::Program(a) => Operand::Program(a.wrapping_add(4 * i as Address)),
                op => op,
            };
            if to_ea {
                let value = match reg {
                    0 => self.regs.fpu.fpcr.0,
                    1 => self.regs.fpu.fpsr.0,
                    _ => self.regs.fpu.fpiar,
                };
                self.cp_write_operand::<Long>(op, value)?;
            } else {
                let value = self.cp_read_operand::<Long>(op)?;
                match reg {
                    0 => self.regs.fpu.fpcr.0 = value & FPCR_MASK,
                    1 => self.regs.fpu.fpsr.0 = value & FPSR_MASK,
                    _ => self.regs.fpu.fpiar = value,
                }
            }
        }
        Ok(self.fpu_cycles(FMOVE_CTRL_CYCLES * Ticks::from(count)))
    }

    /// Opclass 110/111: FMOVEM <ea>,<list> and <list>,<ea>
    fn fpu_op_fmovem(&mut self, opcode: Word, ext: Word) -> Result<Ticks> {
        let to_ea = ext & (1 << 13) != 0;
        let dynamic = ext & (1 << 11) != 0;
        let postinc_order = ext & (1 << 12) != 0;
        let mask = if dynamic {
            self.regs.read_d::<Byte>(usize::from((ext >> 4) & 7))
        } else {
            ext as Byte
        };

        let mode = AddressingMode::from_ea(opcode);
        let valid = match mode {
            Some(AddressingMode::IndirectPreDec(_)) => to_ea && !postinc_order,
            Some(AddressingMode::IndirectPostInc(_)) => !to_ea && postinc_order,
            Some(m) if to_ea => m.is_class(EaClass::ControlAlterable) && postinc_order,
            Some(m) => m.is_class(EaClass::Control) && postinc_order,
            None => false,
        };
        let Some(mode) = mode.filter(|_| valid) else {
            return self.exception_at_instruction(VECTOR_LINEF);
        };

        // FP0 is the most significant bit, except in predecrement order
        let regs: Vec<usize> = (0..8)
            .filter(|&r| {
                let bit = if postinc_order { 7 - r } else { r };
                mask & (1 << bit) != 0
            })
            .collect();
        let op = self.resolve_ea_len(mode, 12 * regs.len() as Address)?;
        let Some(base) = op.address() else {
            return self.exception_at_instruction(VECTOR_LINEF);
        };
        let program = matches!(op, Operand::Program(_));

        for (i, &r) in regs.iter().enumerate() {
            let addr = base.wrapping_add(12 * i as Address);
            if to_ea {
                let l = BitsExtReal::from(&self.regs.fpu.fp[r]).to_longs();
                self.fpu_write_raw(Operand::Memory(addr), FpFormat::Extended, l)?;
            } else {
                let op = if program { Operand::Program(addr) } else { Operand::Memory(addr) };
                let l = self.fpu_read_raw(op, FpFormat::Extended)?;
                self.regs.fpu.fp[r] = BitsExtReal::from_longs(l).into();
            }
        }
        Ok(self.fpu_cycles(FMOVEM_CYCLES + FMOVEM_REG_CYCLES * regs.len() as Ticks))
    }

    /// FBcc.W/FBcc.L, also FNOP (FBF.W *+2)
    pub(in crate::cpu_m68k) fn op_fbcc<const LONG: bool>(&mut self, opcode: Word) -> Result<Ticks> {
        let base = self.get_pc();
        let disp = if LONG {
            self.next_ilong()?
        } else {
            self.next_iword()? as i16 as i32 as Address
        };

        let Some(test) = self.fpu_test(opcode)? else {
            return Ok(0);
        };
        if test {
            self.set_pc(base.wrapping_add(disp))?;
            Ok(self.fpu_cycles(FBCC_CYCLES - 2))
        } else {
            Ok(self.fpu_cycles(FBCC_CYCLES))
        }
    }

    /// FScc.B <ea>
    pub(in crate::cpu_m68k) fn op_fscc(&mut self, opcode: Word) -> Result<Ticks> {
        let cc = self.next_iword()?;
        let Some(test) = self.fpu_test(cc)? else {
            return Ok(0);
        };
        self.write_ea::<Byte>(opcode, if test { 0xFF } else { 0 })?;
        Ok(self.fpu_cycles(FBCC_CYCLES))
    }

    /// FDBcc Dn,<label>
    pub(in crate::cpu_m68k) fn op_fdbcc(&mut self, opcode: Word) -> Result<Ticks> {
        let cc = self.next_iword()?;
        let reg = usize::from(opcode & 7);
        let base = self.get_pc();
        let disp = self.next_iword()? as i16 as i32;

        let Some(test) = self.fpu_test(cc)? else {
            return Ok(0);
        };
        if test {
            return Ok(self.fpu_cycles(FBCC_CYCLES));
        }
        let counter = self.regs.read_d::<Word>(reg).wrapping_sub(1);
        self.regs.write_d(reg, counter);
        if counter == 0xFFFF {
            return Ok(self.fpu_cycles(FBCC_CYCLES + 2));
        }
        self.set_pc(base.wrapping_add_signed(disp))?;
        Ok(self.fpu_cycles(FBCC_CYCLES - 2))
    }

    /// FTRAPcc, FTRAPcc.W #imm, FTRAPcc.L #imm
    pub(in crate::cpu_m68k) fn op_ftrapcc(&mut self, opcode: Word) -> Result<Ticks> {
        let cc = self.next_iword()?;
        match opcode & 7 {
            0b010 => {
                self.next_iword()?;
            }
            0b011 => {
                self.next_ilong()?;
            }
            _ => (),
        }
        let Some(test) = self.fpu_test(cc)? else {
            return Ok(0);
        };
        if test {
            return self.exception_after_instruction(VECTOR_TRAPV);
        }
        Ok(self.fpu_cycles(FBCC_CYCLES))
    }

    /// State frame describing the current FPU state
    fn fpu_state_frame(&self) -> StateFrame {
        match (self.fpu.initialized, self.fpu.pending) {
            (false, _) => StateFrame::Null,
            (true, None) => StateFrame::Idle,
            (true, Some(op)) => StateFrame::Exception(op),
        }
    }

    /// Encodes a state frame for this FPU model, lowest address first
    fn fpu_encode_frame(&self, frame: &StateFrame) -> Vec<Long> {
        let model = self.fpu_model();
        if model == FpuModel::M68060 {
            return match frame {
                StateFrame::Null => vec![0, 0, 0],
                StateFrame::Idle => vec![0x6000, 0, 0],
                StateFrame::Exception(op) => vec![
                    (op.source[0] & 0xFFFF_0000) | 0xE000 | Long::from(op.vector),
                    op.source[1],
                    op.source[2],
                ],
            };
        }
        let (header, body_len) = match (model, frame) {
            (_, StateFrame::Null) => return vec![0],
            (FpuModel::M68040, StateFrame::Idle) => return vec![0x4100_0000],
            (FpuModel::M68040, StateFrame::Exception(_)) => (0x4130_0000, 12),
            (FpuModel::M68881, _) => (0x1F18_0000, 6),
            _ => (0x1F38_0000, 14),
        };
        let mut l = vec![0; body_len + 1];
        l[0] = header;
        if let StateFrame::Exception(op) = frame {
            l[1..7].copy_from_slice(&op.to_longs());
        }
        l
    }

    /// FSAVE <ea>
    pub(in crate::cpu_m68k) fn op_fsave(&mut self, opcode: Word) -> Result<Ticks> {
        if !self.regs.sr.supervisor() {
            return self.privilege_violation();
        }
        let Some(mode) = AddressingMode::from_ea(opcode) else {
            return self.exception_at_instruction(VECTOR_LINEF);
        };
        let frame = self.fpu_state_frame();
        let longs = self.fpu_encode_frame(&frame);
        let op = self.resolve_ea_len(mode, 4 * longs.len() as Address)?;
        let Some(addr) = op.address() else {
            return self.exception_at_instruction(VECTOR_LINEF);
        };
        for (i, &l) in longs.iter().enumerate() {
            self.cp_write(addr.wrapping_add(4 * i as Address), l)?;
        }
        // The exception state moves into the frame
        self.fpu.pending = None;
        Ok(self.fpu_cycles(FSAVE_CYCLES))
    }

    /// Reads and decodes a state frame. Returns None for an invalid
    /// format, otherwise the frame and its size in bytes.
    fn fpu_read_frame(&mut self, addr: Address) -> Result<Option<(StateFrame, Address)>> {
        let model = self.fpu_model();
        let header = self.cp_read::<Long>(addr)?;
        let body = |cpu: &mut Self, n: usize| -> Result<Vec<Long>> {
            (0..n)
                .map(|i| cpu.cp_read::<Long>(addr.wrapping_add(4 + 4 * i as Address)))
                .collect()
        };

        if model == FpuModel::M68060 {
            let rest = body(self, 2)?;
            let frame = match (header >> 8) & 0xFF {
                0x00 => StateFrame::Null,
                0x60 => StateFrame::Idle,
                0xE0 => {
                    // The instruction is recovered from FPIAR
                    let fpiar = self.regs.fpu.fpiar;
                    let opcode = self.read_ticks::<Word>(fpiar)?;
                    let ext = self.read_ticks::<Word>(fpiar.wrapping_add(2))?;
                    let vector = header as u8;
                    let class = match vector {
                        VECTOR_LINEF => FpuExceptionClass::UnimplementedInstruction,
                        VECTOR_FP_UNIMPL_DATA => FpuExceptionClass::UnimplementedDataType,
                        _ => FpuExceptionClass::Arithmetic,
                    };
                    StateFrame::Exception(FpuPendingOp {
                        opcode,
                        ext,
                        source: [header & 0xFFFF_0000, rest[0], rest[1]],
                        ea: 0,
                        class,
                        vector,
                    })
                }
                _ => return Ok(None),
            };
            return Ok(Some((frame, 12)));
        }

        if header == 0 {
            return Ok(Some((StateFrame::Null, 4)));
        }
        let version = header >> 24;
        let size = (header >> 16) & 0xFF;
        let expected_version = if model == FpuModel::M68040 { 0x41 } else { 0x1F };
        if version != expected_version {
            return Ok(None);
        }
        let valid_size = match model {
            FpuModel::M68040 => matches!(size, 0x00 | 0x30),
            _ => matches!(size, 0x18 | 0x38),
        };
        if !valid_size {
            return Ok(None);
        }
        let longs = body(self, size as usize / 4)?;
        let frame = match FpuPendingOp::from_longs(&longs) {
            Some(op) => StateFrame::Exception(op),
            None => StateFrame::Idle,
        };
        Ok(Some((frame, 4 + size)))
    }

    /// FRESTORE <ea>
    pub(in crate::cpu_m68k) fn op_frestore(&mut self, opcode: Word) -> Result<Ticks> {
        if !self.regs.sr.supervisor() {
            return self.privilege_violation();
        }
        let Some(mode) = AddressingMode::from_ea(opcode) else {
            return self.exception_at_instruction(VECTOR_LINEF);
        };
        // The frame size is only known after reading the header
        let (addr, postinc) = match mode {
            AddressingMode::IndirectPostInc(r) => (self.regs.read_a::<Address>(r), Some(r)),
            m => {
                let op = self.resolve_ea_len(m, 4)?;
                let Some(addr) = op.address() else {
                    return self.exception_at_instruction(VECTOR_LINEF);
                };
                (addr, None)
            }
        };

        let Some((frame, size)) = self.fpu_read_frame(addr)? else {
            return self.exception_at_instruction(VECTOR_FORMAT_ERROR);
        };
        if let Some(r) = postinc {
            self.regs.write_a(r, addr.wrapping_add(size));
        }

        match frame {
            StateFrame::Null => {
                self.regs.fpu = FpuRegisterFile::default();
                self.fpu.initialized = false;
                self.fpu.pending = None;
            }
            StateFrame::Idle => {
                self.fpu.initialized = true;
                self.fpu.pending = None;
            }
            StateFrame::Exception(op) => {
                self.fpu.initialized = true;
                self.fpu.pending = Some(op);
            }
        }
        Ok(self.fpu_cycles(FRESTORE_CYCLES))
    }

    /// Completes the operation held back by an FPU exception, with all
    /// exceptions disabled. Returns false if no operation is pending.
    pub fn fpu_complete_exception(&mut self) -> Result<bool> {
        let Some(op) = self.fpu.pending.take() else {
            return Ok(false);
        };
        let rm = self.fpu_rounding_mode();
        let ext = op.ext;

        if ext >> 13 == 0b011 {
            // Store to memory
            let format = FpFormat::decode(ext >> 10);
            let k = self.fpu_k_factor(ext, format);
            let value: Float = BitsExtReal::from_longs(op.source).into();
            let (l, exs) = float_to_format(&value, format, k, rm);
            if op.ea != 0 {
                self.fpu_write_raw(Operand::Memory(op.ea), format, l)?;
            }
            self.fpu_status(exs);
            return Ok(true);
        }

        let source: Float = match op.class {
            FpuExceptionClass::UnimplementedDataType => {
                format_to_float(op.source, FpFormat::decode(ext >> 10), rm).0
            }
            _ => BitsExtReal::from_longs(op.source).into(),
        };
        let dst = usize::from((ext >> 7) & 7);
        let opmode = (ext & 0x7F) as u8;
        let bits = self.fpu_precision_bits();
        let Some(outcome) = fpu_arith(opmode, &source, &self.regs.fpu.fp[dst], bits, rm) else {
            warn!("Cannot complete FPU operation {:04X} {:04X}", op.opcode, ext);
            return Ok(false);
        };
        self.fpu_status(outcome.exs);
        self.fpu_commit(&outcome, dst, usize::from(ext & 7));
        Ok(true)
    }

    /// Direct access to the deferred operation, for debuggers
    pub fn fpu_pending(&self) -> Option<&FpuPendingOp> {
        self.fpu.pending.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn k_factor_sign() {
        assert_eq!(k_factor(0x11), 17);
        assert_eq!(k_factor(0x7F), -1);
        assert_eq!(k_factor(0x40), -64);
        assert_eq!(k_factor(0xFF80 | 0x02), 2);
    }
}
