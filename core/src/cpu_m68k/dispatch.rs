//! M68k CPU - opcode dispatch tables
//!
//! One immutable table of 65536 entries per (model, mode, FPU, MMU)
//! combination. Tables are built once per configuration and shared.

use anyhow::Result;

use crate::bus::{Address, Bus, IrqSource};
use crate::cpu_m68k::config::{CpuConfig, CpuModel, FidelityMode, FpuModel};
use crate::cpu_m68k::cpu::CpuM68k;
use crate::cpu_m68k::ea::{AddressingMode, EaClass};
use crate::cpu_m68k::ops::{BIT_CHG, BIT_CLR, BIT_SET, BIT_TST, LOGIC_AND, LOGIC_EOR, LOGIC_OR};
use crate::tickable::Ticks;
use crate::types::{Byte, Long, Word};

/// Instruction handler. Returns the internal (non-bus) cycles spent.
pub type Handler<TBus> = fn(&mut CpuM68k<TBus>, Word) -> Result<Ticks>;

/// Mnemonic of unrecognised encodings
pub const MNEMONIC_UNKNOWN: &str = "DC.W";

/// Identifies a dispatch table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableKey {
    pub model: CpuModel,
    pub mode: FidelityMode,
    pub fpu: Option<FpuModel>,
    pub mmu: bool,
}

impl From<&CpuConfig> for TableKey {
    fn from(c: &CpuConfig) -> Self {
        Self {
            model: c.model,
            mode: c.mode,
            fpu: c.fpu,
            mmu: c.mmu,
        }
    }
}

pub struct OpcodeEntry<TBus: Bus<Address, u8> + IrqSource> {
    pub handler: Handler<TBus>,
    pub opcode: Word,
    pub mnemonic: &'static str,
    /// Instruction may change flow or processor state; ends a JIT block
    pub ends_block: bool,
}

// Derives would require TBus: Clone
impl<TBus: Bus<Address, u8> + IrqSource> Clone for OpcodeEntry<TBus> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<TBus: Bus<Address, u8> + IrqSource> Copy for OpcodeEntry<TBus> {}

pub struct OpcodeTable<TBus: Bus<Address, u8> + IrqSource> {
    key: TableKey,
    entries: Vec<OpcodeEntry<TBus>>,
}

/// Mnemonics that end a straight-line block
const BLOCK_ENDERS: &[&str] = &[
    "Bcc", "BRA", "BSR", "DBcc", "JMP", "JSR", "RTS", "RTR", "RTE", "RTD", "TRAP", "TRAPV",
    "ILLEGAL", "STOP", "RESET", "MOVE to SR", "ORI to SR", "ANDI to SR", "EORI to SR", "MOVEC",
    "LINEA", "LINEF", MNEMONIC_UNKNOWN, "FBcc", "FDBcc", "FTRAPcc", "FRESTORE", "PMMU",
    "PFLUSH", "PTEST", "CINV/CPUSH",
];

impl<TBus> OpcodeTable<TBus>
where
    TBus: Bus<Address, u8> + IrqSource,
{
    pub fn build(key: TableKey) -> Self {
        let entries = (0..=Word::MAX)
            .map(|opcode| {
                let (handler, mnemonic) = decode::<TBus>(&key, opcode);
                OpcodeEntry {
                    handler,
                    opcode,
                    mnemonic,
                    ends_block: BLOCK_ENDERS.contains(&mnemonic),
                }
            })
            .collect::<Vec<_>>();
        log::debug!(
            "Built opcode table for {} {} (FPU: {:?}, MMU: {})",
            key.model,
            key.mode,
            key.fpu,
            key.mmu
        );
        Self { key, entries }
    }

    #[inline(always)]
    pub fn entry(&self, opcode: Word) -> OpcodeEntry<TBus> {
        self.entries[usize::from(opcode)]
    }

    pub fn key(&self) -> TableKey {
        self.key
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Amount of encodings resolving to the given mnemonic
    pub fn count(&self, mnemonic: &str) -> usize {
        self.entries.iter().filter(|e| e.mnemonic == mnemonic).count()
    }
}

type Decoded<TBus> = (Handler<TBus>, &'static str);

/// Picks the Byte/Word/Long instantiation of a sized handler
macro_rules! sized {
    ($ss:expr, $f:ident $(, $c:tt)*) => {
        match $ss {
            0 => CpuM68k::<TBus>::$f::<Byte $(, $c)*> as Handler<TBus>,
            1 => CpuM68k::<TBus>::$f::<Word $(, $c)*>,
            _ => CpuM68k::<TBus>::$f::<Long $(, $c)*>,
        }
    };
}

macro_rules! bitop {
    ($op:expr, $dynamic:tt) => {
        match $op {
            0 => CpuM68k::<TBus>::op_bit::<{ BIT_TST }, $dynamic> as Handler<TBus>,
            1 => CpuM68k::<TBus>::op_bit::<{ BIT_CHG }, $dynamic>,
            2 => CpuM68k::<TBus>::op_bit::<{ BIT_CLR }, $dynamic>,
            _ => CpuM68k::<TBus>::op_bit::<{ BIT_SET }, $dynamic>,
        }
    };
}

fn ea_is(opcode: Word, class: EaClass) -> bool {
    AddressingMode::from_ea_class(opcode, class).is_some()
}

/// Source operand of a sized instruction: everything, but no byte access
/// to address registers.
fn ea_source(opcode: Word, ss: Word) -> bool {
    match AddressingMode::from_ea(opcode) {
        Some(AddressingMode::AddressRegister(_)) => ss != 0,
        Some(_) => true,
        None => false,
    }
}

fn ea_mode(opcode: Word) -> Word {
    (opcode >> 3) & 7
}

fn decode<TBus>(key: &TableKey, opcode: Word) -> Decoded<TBus>
where
    TBus: Bus<Address, u8> + IrqSource,
{
    let decoded = match opcode >> 12 {
        0x0 => decode_line0::<TBus>(key, opcode),
        0x1..=0x3 => decode_move::<TBus>(opcode),
        0x4 => decode_line4::<TBus>(key, opcode),
        0x5 => decode_line5::<TBus>(opcode),
        0x6 => Some((CpuM68k::<TBus>::op_bcc as Handler<TBus>, match (opcode >> 8) & 0xF {
            0 => "BRA",
            1 => "BSR",
            _ => "Bcc",
        })),
        0x7 if opcode & 0x0100 == 0 => Some((CpuM68k::<TBus>::op_moveq as Handler<TBus>, "MOVEQ")),
        0x8 | 0xC => decode_logic::<TBus>(opcode),
        0x9 | 0xD => decode_arith::<TBus>(opcode),
        0xA => Some((CpuM68k::<TBus>::op_linea as Handler<TBus>, "LINEA")),
        0xB => decode_cmp_eor::<TBus>(opcode),
        0xE => decode_shift::<TBus>(opcode),
        0xF => Some(
            decode_linef::<TBus>(key, opcode)
                .unwrap_or((CpuM68k::<TBus>::op_linef as Handler<TBus>, "LINEF")),
        ),
        _ => None,
    };
    decoded.unwrap_or((CpuM68k::<TBus>::op_illegal as Handler<TBus>, MNEMONIC_UNKNOWN))
}

fn decode_line0<TBus>(key: &TableKey, opcode: Word) -> Option<Decoded<TBus>>
where
    TBus: Bus<Address, u8> + IrqSource,
{
    let h: Decoded<TBus> = match opcode {
        0x003C => (CpuM68k::<TBus>::op_logic_ccr::<{ LOGIC_OR }>, "ORI to CCR"),
        0x007C => (CpuM68k::<TBus>::op_logic_sr::<{ LOGIC_OR }>, "ORI to SR"),
        0x023C => (CpuM68k::<TBus>::op_logic_ccr::<{ LOGIC_AND }>, "ANDI to CCR"),
        0x027C => (CpuM68k::<TBus>::op_logic_sr::<{ LOGIC_AND }>, "ANDI to SR"),
        0x0A3C => (CpuM68k::<TBus>::op_logic_ccr::<{ LOGIC_EOR }>, "EORI to CCR"),
        0x0A7C => (CpuM68k::<TBus>::op_logic_sr::<{ LOGIC_EOR }>, "EORI to SR"),
        _ => return decode_line0_ea::<TBus>(key, opcode),
    };
    Some(h)
}

fn decode_line0_ea<TBus>(key: &TableKey, opcode: Word) -> Option<Decoded<TBus>>
where
    TBus: Bus<Address, u8> + IrqSource,
{
    let ss = (opcode >> 6) & 3;
    let bop = ss as u8;

    if opcode & 0x0100 != 0 {
        // Mode 001 is MOVEP
        if ea_mode(opcode) == 0b001 {
            return None;
        }
        let class = if bop == BIT_TST {
            EaClass::Data
        } else {
            EaClass::DataAlterable
        };
        return ea_is(opcode, class).then(|| (bitop!(bop, true), "BTST/BCHG/BCLR/BSET"));
    }

    if opcode & 0x0F00 == 0x0800 {
        let ok = if bop == BIT_TST {
            ea_is(opcode, EaClass::Data)
                && AddressingMode::from_ea(opcode) != Some(AddressingMode::Immediate)
        } else {
            ea_is(opcode, EaClass::DataAlterable)
        };
        return ok.then(|| (bitop!(bop, false), "BTST/BCHG/BCLR/BSET"));
    }

    if ss == 3 {
        return None;
    }

    let op = (opcode >> 9) & 7;
    if op == 0b110 {
        // CMPI, PC relative on 68020+
        let ok = if key.model.is_020_or_later() {
            ea_is(opcode, EaClass::Data)
                && AddressingMode::from_ea(opcode) != Some(AddressingMode::Immediate)
        } else {
            ea_is(opcode, EaClass::DataAlterable)
        };
        return ok.then(|| (sized!(ss, op_cmpi), "CMPI"));
    }

    if !ea_is(opcode, EaClass::DataAlterable) {
        return None;
    }
    Some(match op {
        0b000 => (sized!(ss, op_logic_imm, { LOGIC_OR }), "ORI"),
        0b001 => (sized!(ss, op_logic_imm, { LOGIC_AND }), "ANDI"),
        0b010 => (sized!(ss, op_arith_imm, true), "SUBI"),
        0b011 => (sized!(ss, op_arith_imm, false), "ADDI"),
        0b101 => (sized!(ss, op_logic_imm, { LOGIC_EOR }), "EORI"),
        _ => return None,
    })
}

fn decode_move<TBus>(opcode: Word) -> Option<Decoded<TBus>>
where
    TBus: Bus<Address, u8> + IrqSource,
{
    let ss = match opcode >> 12 {
        1 => 0,
        3 => 1,
        _ => 2,
    };
    if !ea_source(opcode, ss) {
        return None;
    }
    match AddressingMode::from_move_dest(opcode)? {
        AddressingMode::AddressRegister(_) => match ss {
            0 => None,
            1 => Some((CpuM68k::<TBus>::op_movea::<Word> as Handler<TBus>, "MOVEA")),
            _ => Some((CpuM68k::<TBus>::op_movea::<Long> as Handler<TBus>, "MOVEA")),
        },
        dest if dest.is_class(EaClass::DataAlterable) => Some((sized!(ss, op_move), "MOVE")),
        _ => None,
    }
}

fn decode_line4<TBus>(key: &TableKey, opcode: Word) -> Option<Decoded<TBus>>
where
    TBus: Bus<Address, u8> + IrqSource,
{
    let model = key.model;
    type Cpu<TBus> = CpuM68k<TBus>;

    let fixed: Option<Decoded<TBus>> = match opcode {
        0x4AFC => Some((Cpu::<TBus>::op_illegal, "ILLEGAL")),
        0x4E70 => Some((Cpu::<TBus>::op_reset, "RESET")),
        0x4E71 => Some((Cpu::<TBus>::op_nop, "NOP")),
        0x4E72 => Some((Cpu::<TBus>::op_stop, "STOP")),
        0x4E73 => Some((Cpu::<TBus>::op_rte, "RTE")),
        0x4E74 if model.is_010_or_later() => Some((Cpu::<TBus>::op_rtd, "RTD")),
        0x4E75 => Some((Cpu::<TBus>::op_rts, "RTS")),
        0x4E76 => Some((Cpu::<TBus>::op_trapv, "TRAPV")),
        0x4E77 => Some((Cpu::<TBus>::op_rtr, "RTR")),
        0x4E7A | 0x4E7B if model.is_010_or_later() => Some((Cpu::<TBus>::op_movec, "MOVEC")),
        _ => None,
    };
    if fixed.is_some() {
        return fixed;
    }

    if opcode & 0xFFF0 == 0x4E40 {
        return Some((Cpu::<TBus>::op_trap, "TRAP"));
    }

    match opcode & 0xFFF8 {
        0x4E50 => return Some((Cpu::<TBus>::op_link, "LINK")),
        0x4E58 => return Some((Cpu::<TBus>::op_unlk, "UNLK")),
        0x4E60 | 0x4E68 => return Some((Cpu::<TBus>::op_move_usp, "MOVE USP")),
        0x4840 => return Some((Cpu::<TBus>::op_swap, "SWAP")),
        0x4808 if model.is_020_or_later() => return Some((Cpu::<TBus>::op_link_l, "LINK")),
        0x4880 | 0x48C0 => return Some((Cpu::<TBus>::op_ext, "EXT")),
        0x49C0 if model.is_020_or_later() => return Some((Cpu::<TBus>::op_ext, "EXTB")),
        _ => (),
    }

    let control = ea_is(opcode, EaClass::Control);
    let data = ea_is(opcode, EaClass::Data);
    let data_alterable = ea_is(opcode, EaClass::DataAlterable);
    let mode = ea_mode(opcode);

    let h: Decoded<TBus> = match opcode & 0xFFC0 {
        0x4E80 if control => (Cpu::<TBus>::op_jsr, "JSR"),
        0x4EC0 if control => (Cpu::<TBus>::op_jmp, "JMP"),
        0x4840 if control => (Cpu::<TBus>::op_pea, "PEA"),
        0x40C0 if data_alterable => (Cpu::<TBus>::op_move_from_sr, "MOVE from SR"),
        0x42C0 if data_alterable && model.is_010_or_later() => {
            (Cpu::<TBus>::op_move_from_ccr, "MOVE from CCR")
        }
        0x44C0 if data => (Cpu::<TBus>::op_move_to_ccr, "MOVE to CCR"),
        0x46C0 if data => (Cpu::<TBus>::op_move_to_sr, "MOVE to SR"),
        0x4AC0 if data_alterable => (Cpu::<TBus>::op_tas, "TAS"),
        0x4C00 if data && model.is_020_or_later() => (Cpu::<TBus>::op_mul_l, "MULL"),
        0x4C40 if data && model.is_020_or_later() => (Cpu::<TBus>::op_div_l, "DIVL"),
        0x4880 if ea_is(opcode, EaClass::ControlAlterable) || mode == 0b100 => {
            (Cpu::<TBus>::op_movem_to_mem::<Word>, "MOVEM")
        }
        0x48C0 if ea_is(opcode, EaClass::ControlAlterable) || mode == 0b100 => {
            (Cpu::<TBus>::op_movem_to_mem::<Long>, "MOVEM")
        }
        0x4C80 if control || mode == 0b011 => (Cpu::<TBus>::op_movem_to_reg::<Word>, "MOVEM"),
        0x4CC0 if control || mode == 0b011 => (Cpu::<TBus>::op_movem_to_reg::<Long>, "MOVEM"),
        _ => return decode_line4_sized::<TBus>(key, opcode),
    };
    Some(h)
}

fn decode_line4_sized<TBus>(key: &TableKey, opcode: Word) -> Option<Decoded<TBus>>
where
    TBus: Bus<Address, u8> + IrqSource,
{
    if opcode & 0xF1C0 == 0x41C0 {
        return ea_is(opcode, EaClass::Control)
            .then(|| (CpuM68k::<TBus>::op_lea as Handler<TBus>, "LEA"));
    }
    if opcode & 0xF1C0 == 0x4180 {
        return ea_is(opcode, EaClass::Data)
            .then(|| (CpuM68k::<TBus>::op_chk as Handler<TBus>, "CHK"));
    }

    let ss = (opcode >> 6) & 3;
    if ss == 3 {
        return None;
    }
    if opcode & 0xFF00 == 0x4A00 {
        let ok = if key.model.is_020_or_later() {
            ea_source(opcode, ss)
        } else {
            ea_is(opcode, EaClass::DataAlterable)
        };
        return ok.then(|| (sized!(ss, op_tst), "TST"));
    }

    if !ea_is(opcode, EaClass::DataAlterable) {
        return None;
    }
    Some(match opcode & 0xFF00 {
        0x4000 => (sized!(ss, op_neg, true), "NEGX"),
        0x4200 => (sized!(ss, op_clr), "CLR"),
        0x4400 => (sized!(ss, op_neg, false), "NEG"),
        0x4600 => (sized!(ss, op_not), "NOT"),
        _ => return None,
    })
}

fn decode_line5<TBus>(opcode: Word) -> Option<Decoded<TBus>>
where
    TBus: Bus<Address, u8> + IrqSource,
{
    let ss = (opcode >> 6) & 3;
    if ss == 3 {
        if ea_mode(opcode) == 0b001 {
            return Some((CpuM68k::<TBus>::op_dbcc as Handler<TBus>, "DBcc"));
        }
        return ea_is(opcode, EaClass::DataAlterable)
            .then(|| (CpuM68k::<TBus>::op_scc as Handler<TBus>, "Scc"));
    }

    let sub = opcode & 0x0100 != 0;
    let name = if sub { "SUBQ" } else { "ADDQ" };
    match AddressingMode::from_ea(opcode)? {
        AddressingMode::AddressRegister(_) if ss == 0 => None,
        AddressingMode::AddressRegister(_) => Some(if sub {
            (CpuM68k::<TBus>::op_arith_quick_an::<true> as Handler<TBus>, name)
        } else {
            (CpuM68k::<TBus>::op_arith_quick_an::<false> as Handler<TBus>, name)
        }),
        m if m.is_class(EaClass::DataAlterable) => Some(if sub {
            (sized!(ss, op_arith_quick, true), name)
        } else {
            (sized!(ss, op_arith_quick, false), name)
        }),
        _ => None,
    }
}

/// OR/AND, DIVU/DIVS/MULU/MULS and EXG
fn decode_logic<TBus>(opcode: Word) -> Option<Decoded<TBus>>
where
    TBus: Bus<Address, u8> + IrqSource,
{
    let and = opcode >> 12 == 0xC;
    let opmode = (opcode >> 6) & 7;
    let ss = opmode & 3;

    match opmode {
        0..=2 if ea_is(opcode, EaClass::Data) => Some(if and {
            (sized!(ss, op_logic_dn, { LOGIC_AND }), "AND")
        } else {
            (sized!(ss, op_logic_dn, { LOGIC_OR }), "OR")
        }),
        3 if ea_is(opcode, EaClass::Data) => Some(if and {
            (CpuM68k::<TBus>::op_mul_w::<false> as Handler<TBus>, "MULU")
        } else {
            (CpuM68k::<TBus>::op_div_w::<false> as Handler<TBus>, "DIVU")
        }),
        7 if ea_is(opcode, EaClass::Data) => Some(if and {
            (CpuM68k::<TBus>::op_mul_w::<true> as Handler<TBus>, "MULS")
        } else {
            (CpuM68k::<TBus>::op_div_w::<true> as Handler<TBus>, "DIVS")
        }),
        4..=6 if ea_mode(opcode) <= 1 => {
            // ABCD/SBCD/PACK/UNPK are not implemented
            let exg = (opcode >> 3) & 0x3F;
            (and && matches!(exg, 0b101000 | 0b101001 | 0b110001))
                .then(|| (CpuM68k::<TBus>::op_exg as Handler<TBus>, "EXG"))
        }
        4..=6 if ea_is(opcode, EaClass::MemoryAlterable) => Some(if and {
            (sized!(ss, op_logic_ea, { LOGIC_AND }), "AND")
        } else {
            (sized!(ss, op_logic_ea, { LOGIC_OR }), "OR")
        }),
        _ => None,
    }
}

/// ADD/SUB, ADDA/SUBA, ADDX/SUBX
fn decode_arith<TBus>(opcode: Word) -> Option<Decoded<TBus>>
where
    TBus: Bus<Address, u8> + IrqSource,
{
    let sub = opcode >> 12 == 0x9;
    let opmode = (opcode >> 6) & 7;
    let ss = opmode & 3;

    macro_rules! pick {
        ($f:ident, $add:expr, $sub:expr) => {
            if sub {
                (sized!(ss, $f, true), $sub)
            } else {
                (sized!(ss, $f, false), $add)
            }
        };
    }

    match opmode {
        0..=2 if ea_source(opcode, ss) => Some(pick!(op_arith_dn, "ADD", "SUB")),
        3 | 7 if ea_source(opcode, 1) => {
            let h = match (opmode, sub) {
                (3, false) => CpuM68k::<TBus>::op_arith_an::<Word, false> as Handler<TBus>,
                (3, true) => CpuM68k::<TBus>::op_arith_an::<Word, true>,
                (_, false) => CpuM68k::<TBus>::op_arith_an::<Long, false>,
                (_, true) => CpuM68k::<TBus>::op_arith_an::<Long, true>,
            };
            Some((h, if sub { "SUBA" } else { "ADDA" }))
        }
        4..=6 if ea_mode(opcode) <= 1 => Some(pick!(op_arith_x, "ADDX", "SUBX")),
        4..=6 if ea_is(opcode, EaClass::MemoryAlterable) => Some(pick!(op_arith_ea, "ADD", "SUB")),
        _ => None,
    }
}

/// CMP/CMPA/EOR
fn decode_cmp_eor<TBus>(opcode: Word) -> Option<Decoded<TBus>>
where
    TBus: Bus<Address, u8> + IrqSource,
{
    let opmode = (opcode >> 6) & 7;
    let ss = opmode & 3;
    match opmode {
        0..=2 if ea_source(opcode, ss) => Some((sized!(ss, op_cmp), "CMP")),
        3 if ea_source(opcode, 1) => {
            Some((CpuM68k::<TBus>::op_cmpa::<Word> as Handler<TBus>, "CMPA"))
        }
        7 if ea_source(opcode, 2) => {
            Some((CpuM68k::<TBus>::op_cmpa::<Long> as Handler<TBus>, "CMPA"))
        }
        // Mode 001 is CMPM
        4..=6 if ea_is(opcode, EaClass::DataAlterable) => {
            Some((sized!(ss, op_logic_ea, { LOGIC_EOR }), "EOR"))
        }
        _ => None,
    }
}

fn decode_shift<TBus>(opcode: Word) -> Option<Decoded<TBus>>
where
    TBus: Bus<Address, u8> + IrqSource,
{
    let ss = (opcode >> 6) & 3;
    if ss == 3 {
        // Bit 11 set is the 68020 bit field group
        return (opcode & 0x0800 == 0 && ea_is(opcode, EaClass::MemoryAlterable))
            .then(|| (CpuM68k::<TBus>::op_shift_mem as Handler<TBus>, "SHIFT"));
    }
    Some((sized!(ss, op_shift_reg), "SHIFT"))
}

/// Co-processor space: FPU (id 1), 68030 PMMU (id 0) and the
/// 68040/68060 cache and ATC maintenance instructions.
fn decode_linef<TBus>(key: &TableKey, opcode: Word) -> Option<Decoded<TBus>>
where
    TBus: Bus<Address, u8> + IrqSource,
{
    type Cpu<TBus> = CpuM68k<TBus>;
    let model = key.model;
    let mode = ea_mode(opcode);
    let reg = opcode & 7;

    match (opcode >> 9) & 7 {
        0 if model == CpuModel::M68030 && key.mmu && opcode & 0xFFC0 == 0xF000 => {
            Some((Cpu::<TBus>::op_pmmu_030 as Handler<TBus>, "PMMU"))
        }
        1 if key.fpu.is_some() => match opcode & 0xFFC0 {
            0xF200 => Some((Cpu::<TBus>::op_fpu_general as Handler<TBus>, "FPU")),
            0xF240 if mode == 0b001 => Some((Cpu::<TBus>::op_fdbcc as Handler<TBus>, "FDBcc")),
            0xF240 if mode == 0b111 && (2..=4).contains(&reg) => {
                Some((Cpu::<TBus>::op_ftrapcc as Handler<TBus>, "FTRAPcc"))
            }
            0xF240 if ea_is(opcode, EaClass::DataAlterable) => {
                Some((Cpu::<TBus>::op_fscc as Handler<TBus>, "FScc"))
            }
            0xF280 => Some((Cpu::<TBus>::op_fbcc::<false> as Handler<TBus>, "FBcc")),
            0xF2C0 => Some((Cpu::<TBus>::op_fbcc::<true> as Handler<TBus>, "FBcc")),
            0xF300 if ea_is(opcode, EaClass::ControlAlterable) || mode == 0b100 => {
                Some((Cpu::<TBus>::op_fsave as Handler<TBus>, "FSAVE"))
            }
            0xF340 if ea_is(opcode, EaClass::Control) || mode == 0b011 => {
                Some((Cpu::<TBus>::op_frestore as Handler<TBus>, "FRESTORE"))
            }
            _ => None,
        },
        2 if matches!(model, CpuModel::M68040 | CpuModel::M68060) => {
            if opcode & 0xFF00 == 0xF400 && opcode & 0x18 != 0 {
                Some((Cpu::<TBus>::op_cinv_cpush as Handler<TBus>, "CINV/CPUSH"))
            } else if opcode & 0xFFE0 == 0xF500 {
                Some((Cpu::<TBus>::op_pflush_040 as Handler<TBus>, "PFLUSH"))
            } else if model == CpuModel::M68040 && matches!(opcode & 0xFFF8, 0xF548 | 0xF568) {
                Some((Cpu::<TBus>::op_ptest_040 as Handler<TBus>, "PTEST"))
            } else {
                None
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::testbus::Testbus;
    use strum::IntoEnumIterator;

    type Table = OpcodeTable<Testbus<Address, u8>>;

    fn key(model: CpuModel) -> TableKey {
        TableKey::from(&CpuConfig::for_model(model))
    }

    #[test]
    fn all_models_complete() {
        for model in CpuModel::iter() {
            let t = Table::build(key(model));
            assert_eq!(t.len(), 0x10000, "{}", model);
            for op in [0x0000_u16, 0x4E71, 0xA123, 0xF000, 0xFFFF] {
                assert_eq!(t.entry(op).opcode, op, "{} {:04X}", model, op);
            }
        }
    }

    #[test]
    fn line_a_and_f() {
        let t = Table::build(key(CpuModel::M68000));
        assert_eq!(t.count("LINEA"), 0x1000);
        assert_eq!(t.count("LINEF"), 0x1000, "no FPU: all of line F traps");
        assert_eq!(t.entry(0xA000).mnemonic, "LINEA");
        assert_eq!(t.entry(0xF200).mnemonic, "LINEF");
    }

    #[test]
    fn fpu_claims_line_f() {
        let k = TableKey::from(
            &CpuConfig::for_model(CpuModel::M68030).with_fpu(Some(FpuModel::M68882)),
        );
        let t = Table::build(k);
        assert_eq!(t.entry(0xF200).mnemonic, "FPU");
        assert_eq!(t.entry(0xF280).mnemonic, "FBcc");
        assert_eq!(t.entry(0xF310).mnemonic, "FSAVE");
        assert_eq!(t.entry(0xF000).mnemonic, "LINEF", "MMU disabled");
    }

    #[test]
    fn reserved_is_illegal() {
        let t = Table::build(key(CpuModel::M68000));
        // MOVEP, CMPM, MOVE.B An,Dn, LEA Dn
        for op in [0x0108_u16, 0xB308, 0x1008, 0x41C0, 0x4AFB] {
            assert_eq!(t.entry(op).mnemonic, MNEMONIC_UNKNOWN, "{:04X}", op);
        }
        assert_eq!(t.entry(0x4AFC).mnemonic, "ILLEGAL");
    }

    #[test]
    fn model_gating() {
        let t000 = Table::build(key(CpuModel::M68000));
        let t020 = Table::build(key(CpuModel::M68020));
        // MOVEC, EXTB.L, RTD
        assert_eq!(t000.entry(0x4E7A).mnemonic, MNEMONIC_UNKNOWN);
        assert_eq!(t020.entry(0x4E7A).mnemonic, "MOVEC");
        assert_eq!(t000.entry(0x49C0).mnemonic, MNEMONIC_UNKNOWN);
        assert_eq!(t020.entry(0x49C0).mnemonic, "EXTB");
        assert_eq!(t000.entry(0x4E74).mnemonic, MNEMONIC_UNKNOWN);
    }

    #[test]
    fn decode_common() {
        let t = Table::build(key(CpuModel::M68000));
        let cases = [
            (0x4E71_u16, "NOP"),
            (0x7001, "MOVEQ"),
            (0xD081, "ADD"),
            (0x2040, "MOVEA"),
            (0x3200, "MOVE"),
            (0x6000, "BRA"),
            (0x6100, "BSR"),
            (0x6600, "Bcc"),
            (0x51C8, "DBcc"),
            (0x4EB9, "JSR"),
            (0x4E75, "RTS"),
            (0x48E7, "MOVEM"),
            (0xC141, "EXG"),
            (0xE348, "SHIFT"),
            (0x0801, "BTST/BCHG/BCLR/BSET"),
            (0x4E40, "TRAP"),
            (0x46FC, "MOVE to SR"),
        ];
        for (op, name) in cases {
            assert_eq!(t.entry(op).mnemonic, name, "{:04X}", op);
        }
    }

    #[test]
    fn block_enders() {
        let t = Table::build(key(CpuModel::M68020));
        assert!(t.entry(0x6000).ends_block);
        assert!(t.entry(0x4E75).ends_block);
        assert!(!t.entry(0x4E71).ends_block);
        assert!(!t.entry(0xD081).ends_block);
    }
}
