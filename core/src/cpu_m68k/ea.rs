//! M68k CPU - Effective Address / Addressing modes handling

use anyhow::{Result, bail};

use crate::bus::{Address, Bus, IrqSource};
use crate::cpu_m68k::access::AccessKind;
use crate::cpu_m68k::cpu::CpuM68k;
use crate::cpu_m68k::CpuSized;
use crate::types::{Long, Word};

/// Addressing mode with its register number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingMode {
    /// Dn
    DataRegister(usize),
    /// An
    AddressRegister(usize),
    /// (An)
    Indirect(usize),
    /// (An)+
    IndirectPostInc(usize),
    /// -(An)
    IndirectPreDec(usize),
    /// d16(An)
    IndirectDisplacement(usize),
    /// d8(An,Xn), and the full extension word forms on 68020+
    IndirectIndex(usize),
    /// (xxx).W
    AbsoluteShort,
    /// (xxx).L
    AbsoluteLong,
    /// d16(PC)
    PCDisplacement,
    /// d8(PC,Xn)
    PCIndex,
    /// #imm
    Immediate,
}

/// Effective address categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EaClass {
    All,
    Data,
    Memory,
    Control,
    Alterable,
    DataAlterable,
    MemoryAlterable,
    ControlAlterable,
}

impl AddressingMode {
    pub const fn decode(mode: usize, reg: usize) -> Option<Self> {
        Some(match (mode, reg) {
            (0b000, r) => Self::DataRegister(r),
            (0b001, r) => Self::AddressRegister(r),
            (0b010, r) => Self::Indirect(r),
            (0b011, r) => Self::IndirectPostInc(r),
            (0b100, r) => Self::IndirectPreDec(r),
            (0b101, r) => Self::IndirectDisplacement(r),
            (0b110, r) => Self::IndirectIndex(r),
            (0b111, 0b000) => Self::AbsoluteShort,
            (0b111, 0b001) => Self::AbsoluteLong,
            (0b111, 0b010) => Self::PCDisplacement,
            (0b111, 0b011) => Self::PCIndex,
            (0b111, 0b100) => Self::Immediate,
            _ => return None,
        })
    }

    /// Mode in the lower 6 bits of an opcode
    pub const fn from_ea(opcode: Word) -> Option<Self> {
        Self::decode(((opcode >> 3) & 7) as usize, (opcode & 7) as usize)
    }

    /// Destination of MOVE, register and mode swapped in bits 11-6
    pub const fn from_move_dest(opcode: Word) -> Option<Self> {
        Self::decode(((opcode >> 6) & 7) as usize, ((opcode >> 9) & 7) as usize)
    }

    pub const fn is_register(self) -> bool {
        matches!(self, Self::DataRegister(_) | Self::AddressRegister(_))
    }

    pub const fn is_class(self, class: EaClass) -> bool {
        use AddressingMode::*;

        let data = !matches!(self, AddressRegister(_));
        let memory = !self.is_register();
        let control = matches!(
            self,
            Indirect(_)
                | IndirectDisplacement(_)
                | IndirectIndex(_)
                | AbsoluteShort
                | AbsoluteLong
                | PCDisplacement
                | PCIndex
        );
        let alterable = !matches!(self, PCDisplacement | PCIndex | Immediate);

        match class {
            EaClass::All => true,
            EaClass::Data => data,
            EaClass::Memory => memory,
            EaClass::Control => control,
            EaClass::Alterable => alterable,
            EaClass::DataAlterable => data && alterable,
            EaClass::MemoryAlterable => memory && alterable,
            EaClass::ControlAlterable => control && alterable,
        }
    }

    /// Decodes the lower 6 bits and checks the category in one go
    pub const fn from_ea_class(opcode: Word, class: EaClass) -> Option<Self> {
        match Self::from_ea(opcode) {
            Some(m) if m.is_class(class) => Some(m),
            _ => None,
        }
    }
}

/// Resolved operand location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(in crate::cpu_m68k) enum Operand {
    DataRegister(usize),
    AddressRegister(usize),
    /// Data space
    Memory(Address),
    /// Program space (PC relative)
    Program(Address),
    Immediate(Long),
}

impl Operand {
    pub(in crate::cpu_m68k) fn address(self) -> Option<Address> {
        match self {
            Self::Memory(a) | Self::Program(a) => Some(a),
            _ => None,
        }
    }
}

impl<TBus> CpuM68k<TBus>
where
    TBus: Bus<Address, u8> + IrqSource,
{
    /// Applies an (An)+/-(An) update and remembers the old value for
    /// instruction restart.
    fn ea_update_an(&mut self, reg: usize, old: Address, new: Address) {
        if !self.ea_fixups.iter().any(|(r, _)| *r == reg) {
            let _ = self.ea_fixups.try_push((reg, old));
        }
        self.regs.write_a(reg, new);
    }

    /// Restores address registers modified by the faulted instruction
    pub(in crate::cpu_m68k) fn undo_ea_fixups(&mut self) {
        while let Some((reg, value)) = self.ea_fixups.pop() {
            self.regs.write_a(reg, value);
        }
    }

    /// Index register value of an extension word, sized and scaled
    fn ea_index_value(&self, ext: Word) -> Address {
        let reg = usize::from((ext >> 12) & 7);
        let v: Long = if ext & 0x8000 != 0 {
            self.regs.read_a(reg)
        } else {
            self.regs.read_d(reg)
        };
        let v = if ext & 0x0800 != 0 {
            v
        } else {
            v as Word as i16 as i32 as Long
        };
        if self.config.model.is_020_or_later() {
            v.wrapping_shl(u32::from((ext >> 9) & 3))
        } else {
            v
        }
    }

    /// Indexed modes: brief extension word, or on 68020+ the full format
    /// with base/outer displacements and memory indirection.
    fn ea_index(&mut self, base: Address) -> Result<Address> {
        let ext = self.next_iword()?;
        self.internal_cycles(2)?;

        if ext & 0x0100 == 0 || !self.config.model.is_020_or_later() {
            let disp = ext as u8 as i8 as i32;
            return Ok(base
                .wrapping_add_signed(disp)
                .wrapping_add(self.ea_index_value(ext)));
        }

        let base = if ext & 0x0080 != 0 { 0 } else { base };
        let index = if ext & 0x0040 != 0 {
            0
        } else {
            self.ea_index_value(ext)
        };
        let bd = match (ext >> 4) & 3 {
            0b10 => self.next_iword()? as i16 as i32 as Long,
            0b11 => self.next_ilong()?,
            _ => 0,
        };
        let iis = ext & 7;
        let od = |cpu: &mut Self| -> Result<Long> {
            Ok(match iis & 3 {
                0b10 => cpu.next_iword()? as i16 as i32 as Long,
                0b11 => cpu.next_ilong()?,
                _ => 0,
            })
        };

        Ok(match (ext & 0x0040 != 0, iis) {
            (_, 0) => base.wrapping_add(bd).wrapping_add(index),
            // Pre-indexed memory indirect
            (false, 1..=3) => {
                let outer = od(self)?;
                let ptr = base.wrapping_add(bd).wrapping_add(index);
                self.read_ticks::<Long>(ptr)?.wrapping_add(outer)
            }
            // Post-indexed memory indirect
            (false, 5..=7) => {
                let outer = od(self)?;
                let ptr = base.wrapping_add(bd);
                self.read_ticks::<Long>(ptr)?
                    .wrapping_add(index)
                    .wrapping_add(outer)
            }
            // Memory indirect, index suppressed
            (true, 1..=3) => {
                let outer = od(self)?;
                let ptr = base.wrapping_add(bd);
                self.read_ticks::<Long>(ptr)?.wrapping_add(outer)
            }
            _ => {
                log::warn!(
                    "Reserved full extension word {:04X} at {:08X}",
                    ext,
                    self.regs.instruction_pc
                );
                base.wrapping_add(bd).wrapping_add(index)
            }
        })
    }

    /// Calculates the operand location of an addressing mode. Fetches
    /// extension words and applies post-increment/pre-decrement, so this
    /// happens exactly once per operand.
    pub(in crate::cpu_m68k) fn resolve_ea<T: CpuSized>(
        &mut self,
        mode: AddressingMode,
    ) -> Result<Operand> {
        if mode == AddressingMode::Immediate {
            return Ok(Operand::Immediate(self.fetch_immediate::<T>()?.expand()));
        }
        self.resolve_ea_len(mode, std::mem::size_of::<T>() as Address)
    }

    /// Operand location for an operand of `len` bytes, including the
    /// 8 and 12 byte co-processor formats. Immediates are left in the
    /// instruction stream and returned as a program space location.
    pub(in crate::cpu_m68k) fn resolve_ea_len(
        &mut self,
        mode: AddressingMode,
        len: Address,
    ) -> Result<Operand> {
        Ok(match mode {
            AddressingMode::DataRegister(r) => Operand::DataRegister(r),
            AddressingMode::AddressRegister(r) => Operand::AddressRegister(r),
            AddressingMode::Indirect(r) => Operand::Memory(self.regs.read_a(r)),
            AddressingMode::IndirectPostInc(r) => {
                let addr: Address = self.regs.read_a(r);
                // A7 stays word aligned
                let inc = if r == 7 { len.max(2) } else { len };
                self.ea_update_an(r, addr, addr.wrapping_add(inc));
                Operand::Memory(addr)
            }
            AddressingMode::IndirectPreDec(r) => {
                self.internal_cycles(2)?;
                let old: Address = self.regs.read_a(r);
                let dec = if r == 7 { len.max(2) } else { len };
                let addr = old.wrapping_sub(dec);
                self.ea_update_an(r, old, addr);
                Operand::Memory(addr)
            }
            AddressingMode::IndirectDisplacement(r) => {
                let disp = self.next_iword()? as i16 as i32;
                Operand::Memory(self.regs.read_a::<Address>(r).wrapping_add_signed(disp))
            }
            AddressingMode::IndirectIndex(r) => {
                let base = self.regs.read_a(r);
                Operand::Memory(self.ea_index(base)?)
            }
            AddressingMode::AbsoluteShort => {
                Operand::Memory(self.next_iword()? as i16 as i32 as Address)
            }
            AddressingMode::AbsoluteLong => Operand::Memory(self.next_ilong()?),
            AddressingMode::PCDisplacement => {
                let base = self.get_pc();
                let disp = self.next_iword()? as i16 as i32;
                Operand::Program(base.wrapping_add_signed(disp))
            }
            AddressingMode::PCIndex => {
                let base = self.get_pc();
                Operand::Program(self.ea_index(base)?)
            }
            AddressingMode::Immediate => {
                let pc = self.get_pc();
                // Byte immediates sit in the low half of a word
                let (addr, skip) = if len == 1 { (pc.wrapping_add(1), 2) } else { (pc, len) };
                for _ in 0..skip / 2 {
                    self.next_iword()?;
                }
                Operand::Program(addr)
            }
        })
    }

    pub(in crate::cpu_m68k) fn read_operand<T: CpuSized>(&mut self, op: Operand) -> Result<T> {
        match op {
            Operand::DataRegister(r) => Ok(self.regs.read_d(r)),
            Operand::AddressRegister(r) => Ok(self.regs.read_a(r)),
            Operand::Memory(a) => self.read_ticks(a),
            Operand::Program(a) => self.read_kind(a, AccessKind::Program),
            Operand::Immediate(v) => Ok(T::chop(v)),
        }
    }

    pub(in crate::cpu_m68k) fn write_operand<T: CpuSized>(
        &mut self,
        op: Operand,
        value: T,
    ) -> Result<()> {
        match op {
            Operand::DataRegister(r) => {
                self.regs.write_d(r, value);
                Ok(())
            }
            Operand::AddressRegister(r) => {
                self.regs.write_a(r, value);
                Ok(())
            }
            Operand::Memory(a) => self.write_ticks(a, value),
            Operand::Program(_) | Operand::Immediate(_) => {
                bail!("Write to non-alterable operand {:?}", op)
            }
        }
    }

    /// Operand read by the FPU/MMU, memory goes through the co-processor path
    pub(in crate::cpu_m68k) fn cp_read_operand<T: CpuSized>(&mut self, op: Operand) -> Result<T> {
        match op {
            Operand::Memory(a) => self.cp_read(a),
            op => self.read_operand(op),
        }
    }

    pub(in crate::cpu_m68k) fn cp_write_operand<T: CpuSized>(
        &mut self,
        op: Operand,
        value: T,
    ) -> Result<()> {
        match op {
            Operand::Memory(a) => self.cp_write(a, value),
            op => self.write_operand(op, value),
        }
    }

    /// Reads a value from the operand in the lower 6 bits of the opcode
    pub(in crate::cpu_m68k) fn read_ea<T: CpuSized>(&mut self, opcode: Word) -> Result<T> {
        let op = self.resolve_opcode_ea::<T>(opcode)?;
        self.read_operand(op)
    }

    /// Writes a value to the operand in the lower 6 bits of the opcode
    pub(in crate::cpu_m68k) fn write_ea<T: CpuSized>(&mut self, opcode: Word, value: T) -> Result<()> {
        let op = self.resolve_opcode_ea::<T>(opcode)?;
        self.write_operand(op, value)
    }

    pub(in crate::cpu_m68k) fn resolve_opcode_ea<T: CpuSized>(&mut self, opcode: Word) -> Result<Operand> {
        let Some(mode) = AddressingMode::from_ea(opcode) else {
            bail!("Invalid addressing mode in opcode {:04X}", opcode);
        };
        self.resolve_ea::<T>(mode)
    }

    /// Address of a control addressing mode (LEA, PEA, JMP, JSR)
    pub(in crate::cpu_m68k) fn ea_control_address(&mut self, opcode: Word) -> Result<Address> {
        let op = self.resolve_opcode_ea::<Long>(opcode)?;
        match op.address() {
            Some(a) => Ok(a),
            None => bail!("Not a control addressing mode: {:04X}", opcode),
        }
    }
}
