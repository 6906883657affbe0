//! Exception and interrupt delivery, stack frame construction and RTE.

use anyhow::Result;
use log::*;
use serde::{Deserialize, Serialize};

use crate::bus::{Address, Bus, IrqSource};
use crate::cpu_m68k::access::{AccessKind, AccessSize};
use crate::cpu_m68k::config::CpuModel;
use crate::cpu_m68k::cpu::{CpuError, CpuM68k, ExecutionState};
use crate::tickable::Ticks;
use crate::types::{Long, Word};

// Exception vector numbers
pub const VECTOR_RESET_SP: u8 = 0;
pub const VECTOR_RESET_PC: u8 = 1;
pub const VECTOR_BUS_ERROR: u8 = 2;
pub const VECTOR_ADDRESS_ERROR: u8 = 3;
pub const VECTOR_ILLEGAL: u8 = 4;
pub const VECTOR_DIV_ZERO: u8 = 5;
pub const VECTOR_CHK: u8 = 6;
/// TRAPV, TRAPcc, FTRAPcc
pub const VECTOR_TRAPV: u8 = 7;
pub const VECTOR_PRIVILEGE: u8 = 8;
pub const VECTOR_TRACE: u8 = 9;
pub const VECTOR_LINEA: u8 = 10;
/// Line 1111, also unimplemented FP instructions on the 68040/68060
pub const VECTOR_LINEF: u8 = 11;
pub const VECTOR_FORMAT_ERROR: u8 = 14;
pub const VECTOR_UNINITIALIZED: u8 = 15;
pub const VECTOR_SPURIOUS: u8 = 24;
/// Level n autovector is this + n
pub const VECTOR_AUTOVECTOR_BASE: u8 = 24;
/// TRAP #n is this + n
pub const VECTOR_TRAP_BASE: u8 = 32;
pub const VECTOR_FP_BSUN: u8 = 48;
pub const VECTOR_FP_INEXACT: u8 = 49;
pub const VECTOR_FP_DIVZERO: u8 = 50;
pub const VECTOR_FP_UNDERFLOW: u8 = 51;
pub const VECTOR_FP_OPERR: u8 = 52;
pub const VECTOR_FP_OVERFLOW: u8 = 53;
pub const VECTOR_FP_SNAN: u8 = 54;
pub const VECTOR_FP_UNIMPL_DATA: u8 = 55;
pub const VECTOR_MMU_CONFIG: u8 = 56;

/// Internal cycles of exception processing, excluding bus cycles
const EXCEPTION_CYCLES: Ticks = 4;
/// Internal cycles of an interrupt acknowledge cycle
const INTERRUPT_ACK_CYCLES: Ticks = 14;

/// Cause of an MMU translation fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MmuFaultCause {
    /// Invalid descriptor or no translation
    Invalid,
    WriteProtected,
    SupervisorOnly,
    /// Bus error while walking the translation tables
    TableBusError,
    /// Descriptor type this MMU does not handle
    Unsupported,
}

/// Details of a bus error, address error or MMU fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessFault {
    pub address: Address,
    pub size: AccessSize,
    pub kind: AccessKind,
    /// Data of a faulted write
    pub write: Option<Long>,
    pub function_code: u8,
    /// Fault occured in a read-modify-write cycle
    pub rmw: bool,
    pub mmu: Option<MmuFaultCause>,
}

impl AccessFault {
    pub fn new(
        address: Address,
        size: AccessSize,
        kind: AccessKind,
        write: Option<Long>,
        supervisor: bool,
    ) -> Self {
        Self {
            address,
            size,
            kind,
            write,
            function_code: function_code(supervisor, kind.is_program()),
            rmw: false,
            mmu: None,
        }
    }

    pub fn is_write(&self) -> bool {
        self.write.is_some()
    }

    /// SIZE field as used in 68030/68040 status words and write-back status
    fn size_field(&self) -> Word {
        match self.size {
            AccessSize::Long => 0b00,
            AccessSize::Byte => 0b01,
            AccessSize::Word => 0b10,
        }
    }

    /// 68000 special status word
    fn status_word_68000(&self, ir: Word) -> Word {
        (ir & 0xFFE0)
            | (Word::from(!self.is_write()) << 4)
            | (Word::from(!self.kind.is_program()) << 3)
            | Word::from(self.function_code)
    }

    /// 68010 special status word
    fn ssw_68010(&self) -> Word {
        (Word::from(self.kind.is_program()) << 13)
            | (Word::from(!self.kind.is_program()) << 12)
            | (Word::from(self.rmw) << 11)
            | (Word::from(self.size == AccessSize::Byte) << 9)
            | (Word::from(!self.is_write()) << 8)
            | Word::from(self.function_code)
    }

    /// 68020/68030 special status word
    fn ssw_68030(&self) -> Word {
        if self.kind.is_program() {
            // Fault on stage B, rerun on return
            (1 << 14) | (1 << 12) | Word::from(self.function_code)
        } else {
            (1 << 8)
                | (Word::from(self.rmw) << 7)
                | (Word::from(!self.is_write()) << 6)
                | (self.size_field() << 4)
                | Word::from(self.function_code)
        }
    }

    /// 68040 special status word
    fn ssw_68040(&self) -> Word {
        (Word::from(self.mmu.is_some()) << 10)
            | (Word::from(self.rmw) << 9)
            | (Word::from(!self.is_write()) << 8)
            | (self.size_field() << 5)
            | Word::from(self.function_code)
    }

    /// 68040 write-back status of the faulted write
    pub fn writeback_status(&self) -> Word {
        if self.is_write() {
            0x80 | (self.size_field() << 5) | Word::from(self.function_code)
        } else {
            0
        }
    }

    /// 68060 fault status long word
    fn fslw_68060(&self) -> Long {
        let rw = if self.is_write() { 0b01 } else { 0b10 };
        let cause = match self.mmu {
            None => 1 << 2,
            Some(MmuFaultCause::Invalid) => 1 << 10,
            Some(MmuFaultCause::WriteProtected) => 1 << 8,
            Some(MmuFaultCause::SupervisorOnly) => 1 << 7,
            Some(MmuFaultCause::TableBusError) => 1 << 13,
            Some(MmuFaultCause::Unsupported) => 1 << 11,
        };
        (Long::from(self.kind.is_program()) << 27)
            | (rw << 23)
            | (Long::from(self.size_field()) << 21)
            | (Long::from(self.function_code) << 16)
            | cause
    }
}

/// Function code for an access
pub const fn function_code(supervisor: bool, program: bool) -> u8 {
    (if supervisor { 4 } else { 0 }) | (if program { 2 } else { 1 })
}

/// Stack frame to build for an exception, beyond the basic SR/PC pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExceptionFrame {
    /// Format 0 (SR, PC on the 68000)
    Normal,
    /// Format 2: address of the instruction that caused the exception
    InstructionAddress(Address),
    /// Format 3: effective address of a floating point operand
    FpuPost(Address),
    /// Group 0: bus error, address error or MMU fault
    Fault(Box<AccessFault>),
}

/// Access fault waiting to be delivered at the next checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingFault {
    pub vector: u8,
    pub fault: AccessFault,
}

fn push_long(words: &mut Vec<Word>, v: Long) {
    words.push((v >> 16) as Word);
    words.push(v as Word);
}

/// Builds the words of a stack frame, lowest address first
pub fn frame_words(
    model: CpuModel,
    vector: u8,
    pc: Address,
    sr: Word,
    ir: Word,
    frame: &ExceptionFrame,
) -> Vec<Word> {
    let mut w = Vec::with_capacity(46);
    let fv = |format: Word| (format << 12) | (Word::from(vector) * 4);

    if model == CpuModel::M68000 {
        if let ExceptionFrame::Fault(f) = frame {
            w.push(f.status_word_68000(ir));
            push_long(&mut w, f.address);
            w.push(ir);
        }
        w.push(sr);
        push_long(&mut w, pc);
        return w;
    }

    w.push(sr);
    push_long(&mut w, pc);
    match frame {
        ExceptionFrame::Normal => w.push(fv(0)),
        ExceptionFrame::InstructionAddress(addr) => {
            w.push(fv(2));
            push_long(&mut w, *addr);
        }
        ExceptionFrame::FpuPost(ea) => {
            w.push(fv(3));
            push_long(&mut w, *ea);
        }
        ExceptionFrame::Fault(f) => match model {
            CpuModel::M68000 => unreachable!(),
            CpuModel::M68010 => {
                // Format 8
                w.push(fv(8));
                w.push(f.ssw_68010());
                push_long(&mut w, f.address);
                w.push(0);
                w.push(f.write.unwrap_or(0) as Word);
                w.push(0);
                w.push(0);
                w.push(0);
                w.push(ir);
                w.resize(29, 0);
            }
            CpuModel::M68020 | CpuModel::M68030 => {
                // Format A for data faults, B for instruction stream faults
                let long = f.kind.is_program();
                w.push(fv(if long { 0xB } else { 0xA }));
                w.push(0);
                w.push(f.ssw_68030());
                w.push(ir);
                w.push(ir);
                push_long(&mut w, f.address);
                w.push(0);
                w.push(0);
                push_long(&mut w, f.write.unwrap_or(0));
                w.push(0);
                w.push(0);
                if long {
                    w.push(0);
                    w.push(0);
                    // Stage B address
                    push_long(&mut w, f.address);
                    w.push(0);
                    w.push(0);
                    // Data input buffer
                    push_long(&mut w, 0);
                    w.resize(46, 0);
                }
            }
            CpuModel::M68040 if f.mmu.is_none() && !f.is_write() && f.address & 1 != 0 => {
                // Address error
                w.push(fv(2));
                push_long(&mut w, f.address & !1);
            }
            CpuModel::M68040 => {
                // Format 7 access error
                w.push(fv(7));
                push_long(&mut w, f.address);
                w.push(f.ssw_68040());
                // WB3S, WB2S, WB1S
                w.push(f.writeback_status());
                w.push(0);
                w.push(0);
                push_long(&mut w, f.address);
                // WB3A, WB3D
                push_long(&mut w, if f.is_write() { f.address } else { 0 });
                push_long(&mut w, f.write.unwrap_or(0));
                w.resize(30, 0);
            }
            CpuModel::M68060 if f.mmu.is_none() && f.address & 1 != 0 => {
                w.push(fv(2));
                push_long(&mut w, f.address & !1);
            }
            CpuModel::M68060 => {
                // Format 4 access error
                w.push(fv(4));
                push_long(&mut w, f.address);
                push_long(&mut w, f.fslw_68060());
            }
        },
    }
    w
}

/// Additional words of a frame after SR, PC and format/vector word, by
/// format code. None for formats the model does not know.
pub fn frame_extra_words(model: CpuModel, format: Word) -> Option<u32> {
    use CpuModel::*;

    match (format, model) {
        (0, _) => Some(0),
        (1, M68020 | M68030 | M68040) => Some(0),
        (2, M68020 | M68030 | M68040 | M68060) => Some(2),
        (3, M68040 | M68060) => Some(2),
        (4, M68060) => Some(4),
        (7, M68040) => Some(26),
        (8, M68010) => Some(25),
        (0xA, M68020 | M68030) => Some(12),
        (0xB, M68020 | M68030) => Some(42),
        _ => None,
    }
}

impl<TBus> CpuM68k<TBus>
where
    TBus: Bus<Address, u8> + IrqSource,
{
    /// Writes a complete frame below the active stack pointer
    fn push_frame(&mut self, words: &[Word]) -> Result<()> {
        let sp = self
            .regs
            .read_a::<Address>(7)
            .wrapping_sub(2 * words.len() as Address);
        self.regs.write_a(7, sp);
        for (i, &w) in words.iter().enumerate() {
            self.write_ticks::<Word>(sp.wrapping_add(2 * i as Address), w)?;
        }
        Ok(())
    }

    /// Switches to supervisor state for exception processing
    fn enter_supervisor(&mut self) {
        self.regs.sr.set_supervisor(true);
        self.regs.sr.set_trace(false);
        self.regs.sr.set_t0(false);
    }

    /// Loads the PC from a vector
    fn jump_vector(&mut self, vector: u8) -> Result<()> {
        let vaddr = self.regs.vbr.wrapping_add(Address::from(vector) * 4);
        let pc = self.read_ticks::<Long>(vaddr)?;
        self.set_pc(pc)?;
        self.refill_pipeline()
    }

    /// Processes an exception: builds the frame on the supervisor stack and
    /// continues at the handler. `pc` is the return address in the frame.
    pub(in crate::cpu_m68k) fn raise_exception(
        &mut self,
        vector: u8,
        pc: Address,
        frame: ExceptionFrame,
    ) -> Result<()> {
        let saved_sr = self.regs.sr.sr();
        trace!(
            "Exception vector {} at {:08X}, return to {:08X}",
            vector, self.regs.instruction_pc, pc
        );

        self.enter_supervisor();
        self.internal_cycles(EXCEPTION_CYCLES)?;
        let words = frame_words(
            self.config.model,
            vector,
            pc,
            saved_sr,
            self.regs.ir,
            &frame,
        );
        self.push_frame(&words)?;
        self.jump_vector(vector)?;
        self.last_exception = Some(vector);
        Ok(())
    }

    /// Exception referring to the faulting instruction itself
    /// (illegal, line A/F, privilege violation, format error).
    /// Returns the internal cycles for the handler.
    pub(in crate::cpu_m68k) fn exception_at_instruction(&mut self, vector: u8) -> Result<Ticks> {
        let pc = self.regs.instruction_pc;
        self.rejected = true;
        self.raise_exception(vector, pc, ExceptionFrame::Normal)?;
        Ok(0)
    }

    /// Trap taken after the instruction completed (TRAPV, CHK, divide by
    /// zero, TRAPcc). 68020 and up record the instruction address.
    pub(in crate::cpu_m68k) fn exception_after_instruction(&mut self, vector: u8) -> Result<Ticks> {
        let pc = self.get_pc();
        let frame = if self.config.model.is_020_or_later() {
            ExceptionFrame::InstructionAddress(self.regs.instruction_pc)
        } else {
            ExceptionFrame::Normal
        };
        self.raise_exception(vector, pc, frame)?;
        Ok(0)
    }

    pub(in crate::cpu_m68k) fn privilege_violation(&mut self) -> Result<Ticks> {
        self.exception_at_instruction(VECTOR_PRIVILEGE)
    }

    /// Trace exception after the instruction at `instruction_pc`
    pub(in crate::cpu_m68k) fn deliver_trace(&mut self) -> Result<()> {
        let pc = self.get_pc();
        let frame = if self.config.model.is_020_or_later() {
            ExceptionFrame::InstructionAddress(self.regs.instruction_pc)
        } else {
            ExceptionFrame::Normal
        };
        self.raise_exception(VECTOR_TRACE, pc, frame)
    }

    /// Delivers a bus/address error or MMU fault. A fault while building
    /// the frame of another fault halts the processor.
    pub(in crate::cpu_m68k) fn deliver_fault(&mut self, pending: PendingFault) -> Result<()> {
        if self.config.model != CpuModel::M68000 {
            self.undo_ea_fixups();
        }

        // Instructions are restarted on return, except on the 68000
        // which cannot continue a faulted instruction.
        let pc = if self.config.model == CpuModel::M68000 {
            self.get_pc()
        } else {
            self.regs.instruction_pc
        };

        debug!(
            "Access fault (vector {}) at {:08X}: {:?}",
            pending.vector, self.regs.instruction_pc, pending.fault
        );

        self.processing_fault = true;
        let result = self.raise_exception(
            pending.vector,
            pc,
            ExceptionFrame::Fault(Box::new(pending.fault)),
        );
        self.processing_fault = false;

        match result {
            Err(e) if e.downcast_ref::<CpuError>().is_some() => {
                error!(
                    "Double fault at {:08X}, processor halted: {}",
                    self.regs.instruction_pc, e
                );
                self.state = ExecutionState::Halted;
                Ok(())
            }
            r => r,
        }
    }

    /// Delivers an autovectored interrupt at the given level
    pub(in crate::cpu_m68k) fn deliver_interrupt(&mut self, level: u8) -> Result<()> {
        let saved_sr = self.regs.sr.sr();
        let pc = self.get_pc();
        let vector = VECTOR_AUTOVECTOR_BASE + level;
        debug!("Interrupt level {} at {:08X}", level, pc);

        self.internal_cycles(INTERRUPT_ACK_CYCLES)?;
        self.enter_supervisor();
        self.regs.sr.set_int_prio_mask(level);
        self.state = ExecutionState::Running;

        let model = self.config.model;
        let frame = frame_words(model, vector, pc, saved_sr, self.regs.ir, &ExceptionFrame::Normal);
        self.push_frame(&frame)?;

        if model.has_msp() && self.regs.sr.m() {
            // Frame went to the master stack, leave a throwaway frame on
            // the interrupt stack that returns to it.
            let throwaway_sr = self.regs.sr.sr();
            self.regs.sr.set_m(false);
            let throwaway = [
                throwaway_sr,
                (pc >> 16) as Word,
                pc as Word,
                (1 << 12) | (Word::from(vector) * 4),
            ];
            self.push_frame(&throwaway)?;
        }

        self.jump_vector(vector)?;
        self.last_exception = Some(vector);
        Ok(())
    }

    /// RTE
    pub(in crate::cpu_m68k) fn op_rte(&mut self, _opcode: Word) -> Result<Ticks> {
        if !self.regs.sr.supervisor() {
            return self.privilege_violation();
        }

        let model = self.config.model;
        loop {
            let sp = self.regs.read_a::<Address>(7);
            let sr = self.read_ticks::<Word>(sp)?;
            let pc = self.read_ticks::<Long>(sp.wrapping_add(2))?;

            if model == CpuModel::M68000 {
                self.regs.write_a(7, sp.wrapping_add(6));
                self.set_sr(sr);
                self.set_pc(pc)?;
                return Ok(4);
            }

            let fv = self.read_ticks::<Word>(sp.wrapping_add(6))?;
            let format = fv >> 12;
            let Some(extra) = frame_extra_words(model, format) else {
                debug!("RTE with invalid frame format {:X} at {:08X}", format, sp);
                return self.exception_at_instruction(VECTOR_FORMAT_ERROR);
            };

            self.regs.write_a(7, sp.wrapping_add(8 + 2 * extra));
            self.set_sr(sr);
            if format == 1 {
                // Throwaway frame, the real one is on the newly selected stack
                continue;
            }
            self.set_pc(pc)?;
            return Ok(4);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fault() -> AccessFault {
        AccessFault::new(
            0x1235,
            AccessSize::Word,
            AccessKind::Data,
            Some(0xAAAA),
            true,
        )
    }

    #[test]
    fn frame_sizes() {
        use CpuModel::*;

        let cases = [
            (M68000, ExceptionFrame::Normal, 3),
            (M68010, ExceptionFrame::Normal, 4),
            (M68020, ExceptionFrame::Normal, 4),
            (M68060, ExceptionFrame::Normal, 4),
            (M68020, ExceptionFrame::InstructionAddress(0), 6),
            (M68040, ExceptionFrame::FpuPost(0), 6),
            (M68000, ExceptionFrame::Fault(Box::new(fault())), 7),
            (M68010, ExceptionFrame::Fault(Box::new(fault())), 29),
            (M68030, ExceptionFrame::Fault(Box::new(fault())), 16),
            (M68060, ExceptionFrame::Fault(Box::new(fault())), 6),
        ];
        for (model, frame, words) in cases {
            assert_eq!(
                frame_words(model, 2, 0x1000, 0x2700, 0x4E71, &frame).len(),
                words,
                "{} {:?}",
                model,
                frame
            );
        }
    }

    #[test]
    fn frame_sizes_instruction_fault() {
        let mut f = fault();
        f.kind = AccessKind::Program;
        f.write = None;
        assert_eq!(
            frame_words(
                CpuModel::M68030,
                2,
                0,
                0,
                0,
                &ExceptionFrame::Fault(Box::new(f))
            )
            .len(),
            46
        );
    }

    #[test]
    fn frame_sizes_mmu_fault() {
        let mut f = fault();
        f.address = 0x2000;
        f.mmu = Some(MmuFaultCause::Invalid);
        let frame = ExceptionFrame::Fault(Box::new(f));
        assert_eq!(frame_words(CpuModel::M68040, 2, 0, 0, 0, &frame).len(), 30);
        assert_eq!(frame_words(CpuModel::M68060, 2, 0, 0, 0, &frame).len(), 8);
    }

    #[test]
    fn frame_68000_group0_layout() {
        let mut f = fault();
        f.write = None;
        let w = frame_words(
            CpuModel::M68000,
            3,
            0x00123456,
            0x2700,
            0x3010,
            &ExceptionFrame::Fault(Box::new(f)),
        );
        // R/W set (read), I/N set (not instruction), FC = 5
        assert_eq!(w[0] & 0x1F, 0b11101);
        assert_eq!(w[1], 0x0000);
        assert_eq!(w[2], 0x1235);
        assert_eq!(w[3], 0x3010);
        assert_eq!(w[4], 0x2700);
        assert_eq!(w[5], 0x0012);
        assert_eq!(w[6], 0x3456);
    }

    #[test]
    fn format_vector_word() {
        let w = frame_words(
            CpuModel::M68020,
            VECTOR_CHK,
            0x1000,
            0x2000,
            0,
            &ExceptionFrame::InstructionAddress(0xFFC),
        );
        assert_eq!(w[3], 0x2018);
        assert_eq!(w[4], 0x0000);
        assert_eq!(w[5], 0x0FFC);
    }

    #[test]
    fn rte_formats() {
        assert_eq!(frame_extra_words(CpuModel::M68010, 8), Some(25));
        assert_eq!(frame_extra_words(CpuModel::M68010, 0xA), None);
        assert_eq!(frame_extra_words(CpuModel::M68030, 0xB), Some(42));
        assert_eq!(frame_extra_words(CpuModel::M68060, 1), None);
        assert_eq!(frame_extra_words(CpuModel::M68040, 7), Some(26));
    }
}
