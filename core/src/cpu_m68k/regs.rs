use proc_bitfield::bitfield;
use serde::{Deserialize, Serialize};

use super::CpuSized;
use super::fpu::regs::FpuRegisterFile;
use super::mmu::regs::MmuRegisterFile;
use crate::bus::{Address, RealAddress};
use crate::types::{Long, Word};

use std::fmt;

/// Generalization of an address/data/control register
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Register {
    Dn(usize),
    An(usize),
    USP,
    ISP,
    MSP,
    PC,
    SR,
    VBR,
    SFC,
    DFC,
    CACR,
    CAAR,
    PCR,
}

impl std::fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dn(n) => write!(f, "D{}", n),
            Self::An(n) => write!(f, "A{}", n),
            Self::USP => write!(f, "USP"),
            Self::ISP => write!(f, "ISP"),
            Self::MSP => write!(f, "MSP"),
            Self::PC => write!(f, "PC"),
            Self::SR => write!(f, "SR"),
            Self::VBR => write!(f, "VBR"),
            Self::SFC => write!(f, "SFC"),
            Self::DFC => write!(f, "DFC"),
            Self::CACR => write!(f, "CACR"),
            Self::CAAR => write!(f, "CAAR"),
            Self::PCR => write!(f, "PCR"),
        }
    }
}

bitfield! {
    /// SR register bitfield. Bits that do not exist on the configured
    /// model are masked off by `CpuM68k::set_sr`.
    #[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct RegisterSR(pub u16): Debug, FromStorage, IntoStorage, DerefStorage {
        /// Full SR
        pub sr: u16 @ ..,
        /// Condition Code Register
        pub ccr: u8 @ 0..=4,
        /// Carry
        pub c: bool @ 0, // 1
        /// Overflow
        pub v: bool @ 1, // 2
        /// Zero
        pub z: bool @ 2, // 4
        /// Negative
        pub n: bool @ 3, // 8
        /// Extend
        pub x: bool @ 4, // 10

        /// Interrupt priority mask
        pub int_prio_mask: u8 @ 8..=10,

        /// Master/interrupt stack select (68020-68040)
        pub m: bool @ 12,

        /// Supervisor mode
        pub supervisor: bool @ 13,

        /// Trace on change of flow (68020/68030)
        pub t0: bool @ 14,

        /// Trace mode (T1)
        pub trace: bool @ 15,
    }
}

/// Full Motorola 680x0 register file
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RegisterFile {
    /// Dx
    pub d: [Long; 8],

    /// Ax
    pub a: [Long; 7],

    /// User Stack Pointer
    pub usp: Address,

    /// Interrupt Stack Pointer (the supervisor stack pointer on models
    /// without a master stack)
    pub isp: Address,

    /// Master Stack Pointer
    pub msp: Address,

    /// Status Register
    pub sr: RegisterSR,

    /// Program counter, or the logical address `pc_p` refers to when the
    /// direct representation is active.
    pub pc: Address,

    /// Direct representation: host location of the current instruction stream
    pub pc_p: RealAddress,

    /// Direct representation: host location corresponding to `pc`
    pub pc_oldp: RealAddress,

    /// Start address of the instruction being executed
    pub instruction_pc: Address,

    /// Instruction register: opcode of the instruction being executed
    pub ir: Word,

    /// Vector Base Register
    pub vbr: Address,

    /// Source/destination function code
    pub sfc: u8,
    pub dfc: u8,

    /// Cache control and cache address register
    pub cacr: Long,
    pub caar: Long,

    /// 68060 processor configuration register
    pub pcr: Long,

    pub fpu: FpuRegisterFile,
    pub mmu: MmuRegisterFile,
}

impl RegisterFile {
    pub fn new() -> Self {
        Self {
            a: [0; 7],
            d: [0; 8],
            usp: 0,
            isp: 0,
            msp: 0,
            sr: RegisterSR(0),
            pc: 0,
            pc_p: 0,
            pc_oldp: 0,
            instruction_pc: 0,
            ir: 0,
            vbr: 0,
            sfc: 0,
            dfc: 0,
            cacr: 0,
            caar: 0,
            pcr: 0,
            fpu: FpuRegisterFile::default(),
            mmu: MmuRegisterFile::default(),
        }
    }

    /// Logical program counter, valid in both representations.
    /// In the indirect representation both host pointers are zero.
    pub fn get_pc(&self) -> Address {
        self.pc
            .wrapping_add(self.pc_p.wrapping_sub(self.pc_oldp) as Address)
    }

    /// Direct representation: sets the logical PC and its host location
    pub fn set_pc_direct(&mut self, pc: Address, real: RealAddress) {
        self.pc = pc;
        self.pc_p = real;
        self.pc_oldp = real;
    }

    /// Direct representation: advances the host pointer only
    pub fn inc_pc_direct(&mut self, offset: Address) {
        self.pc_p = self.pc_p.wrapping_add(offset as RealAddress);
    }

    /// Indirect representation: sets the logical PC, dropping any host pointer
    pub fn set_pc_indirect(&mut self, pc: Address) {
        self.pc = pc;
        self.pc_p = 0;
        self.pc_oldp = 0;
    }

    /// Indirect representation: advances the logical PC
    pub fn inc_pc_indirect(&mut self, offset: Address) {
        self.pc = self.pc.wrapping_add(offset);
    }

    /// Folds the host pointer delta back into `pc`.
    pub fn sync_pc(&mut self) {
        self.pc = self.get_pc();
        self.pc_oldp = self.pc_p;
    }

    /// Active stack pointer for the current privilege level
    fn sp(&self) -> Address {
        if !self.sr.supervisor() {
            self.usp
        } else if self.sr.m() {
            self.msp
        } else {
            self.isp
        }
    }

    fn sp_mut(&mut self) -> &mut Address {
        if !self.sr.supervisor() {
            &mut self.usp
        } else if self.sr.m() {
            &mut self.msp
        } else {
            &mut self.isp
        }
    }

    /// Creates a string with differences between this RegisterFile and another
    pub fn diff_str(&self, other: &Self) -> String {
        let diff = |name, s, o| {
            if s != o {
                format!("{}: {:08X} -> {:08X} ", name, s, o)
            } else {
                String::new()
            }
        };
        let diff_flag = |name, s, o| {
            if s != o {
                format!(
                    "SR.{}: {} -> {} ",
                    name,
                    if s { "1" } else { "0" },
                    if o { "1" } else { "0" }
                )
            } else {
                String::new()
            }
        };
        let mut out = String::new();
        for i in 0..8 {
            out.push_str(diff(format!("D{}", i), self.d[i], other.d[i]).as_str());
        }
        for i in 0..7 {
            out.push_str(diff(format!("A{}", i), self.a[i], other.a[i]).as_str());
        }
        out.push_str(diff("USP".to_string(), self.usp, other.usp).as_str());
        out.push_str(diff("ISP".to_string(), self.isp, other.isp).as_str());
        out.push_str(diff("MSP".to_string(), self.msp, other.msp).as_str());
        out.push_str(diff("VBR".to_string(), self.vbr, other.vbr).as_str());

        out.push_str(&diff_flag("C", self.sr.c(), other.sr.c()));
        out.push_str(&diff_flag("N", self.sr.n(), other.sr.n()));
        out.push_str(&diff_flag("V", self.sr.v(), other.sr.v()));
        out.push_str(&diff_flag("Z", self.sr.z(), other.sr.z()));
        out.push_str(&diff_flag("X", self.sr.x(), other.sr.x()));
        out.push_str(&diff_flag("S", self.sr.supervisor(), other.sr.supervisor()));
        out.push_str(&diff_flag("M", self.sr.m(), other.sr.m()));
        out.push_str(&diff_flag("T1", self.sr.trace(), other.sr.trace()));
        out.push_str(&diff_flag("T0", self.sr.t0(), other.sr.t0()));
        out.push_str(
            diff(
                "SR.INTPRI".to_string(),
                self.sr.int_prio_mask().into(),
                other.sr.int_prio_mask().into(),
            )
            .as_str(),
        );
        out
    }

    /// Read an An register
    pub fn read_a<T: CpuSized>(&self, a: usize) -> T {
        T::chop(if a == 7 { self.sp() } else { self.a[a] })
    }

    /// Read an An register and post-increment
    pub fn read_a_postinc<T: CpuSized>(&mut self, a: usize, adjust: usize) -> T {
        let adjust = adjust as Long;

        T::chop(if a == 7 {
            // Byte also adjusts by 2 to keep the stack aligned
            let adjust = std::cmp::max(2, adjust);
            let sp = self.sp_mut();
            let result = *sp;
            *sp = sp.wrapping_add(adjust);
            result
        } else {
            let result = self.a[a];
            self.a[a] = self.a[a].wrapping_add(adjust);
            result
        })
    }

    /// Read an An register and pre-decrement
    pub fn read_a_predec<T: CpuSized>(&mut self, a: usize, adjust: usize) -> T {
        let adjust = adjust as Long;

        T::chop(if a == 7 {
            // Byte also adjusts by 2 to keep the stack aligned
            let adjust = std::cmp::max(2, adjust);
            let sp = self.sp_mut();
            *sp = sp.wrapping_sub(adjust);
            *sp
        } else {
            self.a[a] = self.a[a].wrapping_sub(adjust);
            self.a[a]
        })
    }

    /// Write an An register
    pub fn write_a<T: CpuSized>(&mut self, a: usize, val: T) {
        // Writes to A as Byte or Word are sign extended
        let adj_val = val.expand_sign_extend();

        if a == 7 {
            *self.sp_mut() = adj_val;
        } else {
            self.a[a] = adj_val;
        }
    }

    /// Read a Dn register
    pub fn read_d<T: CpuSized>(&self, d: usize) -> T {
        T::chop(self.d[d])
    }

    /// Write a Dn register
    pub fn write_d<T: CpuSized>(&mut self, d: usize, val: T) {
        self.d[d] = val.replace_in(self.d[d]);
    }

    /// Write a register, specifying a Register type.
    /// SR and PC must be written through the CPU.
    pub fn write<T: CpuSized>(&mut self, reg: Register, value: T) {
        let v = value.expand();
        match reg {
            Register::An(r) => self.write_a(r, value),
            Register::Dn(r) => self.write_d(r, value),
            Register::USP => self.usp = v,
            Register::ISP => self.isp = v,
            Register::MSP => self.msp = v,
            Register::VBR => self.vbr = v,
            Register::SFC => self.sfc = (v & 7) as u8,
            Register::DFC => self.dfc = (v & 7) as u8,
            Register::CACR => self.cacr = v,
            Register::CAAR => self.caar = v,
            Register::PCR => self.pcr = v,
            Register::PC | Register::SR => {
                log::error!("Register {} written through register file", reg);
            }
        }
    }

    /// Read a register, specifying a Register type
    pub fn read<T: CpuSized>(&self, reg: Register) -> T {
        match reg {
            Register::An(r) => self.read_a(r),
            Register::Dn(r) => self.read_d(r),
            Register::USP => T::chop(self.usp),
            Register::ISP => T::chop(self.isp),
            Register::MSP => T::chop(self.msp),
            Register::PC => T::chop(self.get_pc()),
            Register::SR => T::chop(self.sr.sr().into()),
            Register::VBR => T::chop(self.vbr),
            Register::SFC => T::chop(self.sfc.into()),
            Register::DFC => T::chop(self.dfc.into()),
            Register::CACR => T::chop(self.cacr),
            Register::CAAR => T::chop(self.caar),
            Register::PCR => T::chop(self.pcr),
        }
    }
}

impl fmt::Display for RegisterFile {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "A: {:X?} D: {:X?} USP: {:08X} ISP: {:08X} MSP: {:08X} PC: {:08X} SR: {:04X}",
            self.a,
            self.d,
            self.usp,
            self.isp,
            self.msp,
            self.get_pc(),
            self.sr.sr()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Byte, Long, Word};

    #[test]
    fn read_d() {
        let mut r = RegisterFile::new();
        r.d[0] = 0x11223344;

        assert_eq!(r.read_d::<Byte>(0), 0x44);
        assert_eq!(r.read_d::<Word>(0), 0x3344);
        assert_eq!(r.read_d::<Long>(0), 0x11223344);
    }

    #[test]
    fn write_a() {
        let mut r = RegisterFile::new();
        r.write_a(0, 0x11223344_u32);
        assert_eq!(r.a[0], 0x11223344);
        r.write_a(0, 0x3344_u16);
        assert_eq!(r.a[0], 0x00003344);
        r.write_a(0, 0xB344_u16);
        assert_eq!(r.a[0], 0xFFFFB344);
        r.write_a(0, 0xB4_u8);
        assert_eq!(r.a[0], 0xFFFFFFB4);
    }

    #[test]
    fn a7_selection() {
        let mut r = RegisterFile::new();
        r.usp = 0x100;
        r.isp = 0x200;
        r.msp = 0x300;

        r.sr.set_supervisor(false);
        assert_eq!(r.read_a::<Long>(7), 0x100);
        r.sr.set_supervisor(true);
        assert_eq!(r.read_a::<Long>(7), 0x200);
        r.sr.set_m(true);
        assert_eq!(r.read_a::<Long>(7), 0x300);

        r.write_a(7, 0x400_u32);
        assert_eq!(r.msp, 0x400);
        assert_eq!(r.isp, 0x200);
        assert_eq!(r.usp, 0x100);
    }

    #[test]
    fn a7_byte_postinc() {
        let mut r = RegisterFile::new();
        r.sr.set_supervisor(true);
        r.isp = 0x1000;
        let _: Byte = r.read_a_postinc(7, 1);
        assert_eq!(r.isp, 0x1002);
        let _: Byte = r.read_a_predec(7, 1);
        assert_eq!(r.isp, 0x1000);
    }

    #[test]
    fn pc_indirect() {
        let mut r = RegisterFile::new();
        r.set_pc_indirect(0x1000);
        assert_eq!(r.get_pc(), 0x1000);
        r.inc_pc_indirect(4);
        assert_eq!(r.get_pc(), 0x1004);
        assert_eq!(r.pc, 0x1004);
    }

    #[test]
    fn pc_direct() {
        let mut r = RegisterFile::new();
        r.set_pc_direct(0x1000, 0x5000);
        assert_eq!(r.get_pc(), 0x1000);
        r.inc_pc_direct(6);
        assert_eq!(r.get_pc(), 0x1006);
        // Logical base is untouched until synced
        assert_eq!(r.pc, 0x1000);
        r.sync_pc();
        assert_eq!(r.pc, 0x1006);
        assert_eq!(r.get_pc(), 0x1006);

        // Switching back drops the host pointer
        r.set_pc_indirect(0x2000);
        assert_eq!(r.get_pc(), 0x2000);
    }
}
