use crate::bus::Address;
use crate::cpu_m68k::fpu::SEMANTICS_EXTENDED;
use crate::cpu_m68k::fpu::storage::{BitsExtReal, ext_real_array};
use crate::types::{Byte, Long};
use arpfloat::Float;
use proc_bitfield::bitfield;
use serde::{Deserialize, Serialize};

bitfield! {
    /// Exception bits, as used in the FPCR enable byte and the FPSR
    /// exception status byte
    #[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
    pub struct FpuExceptions(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        /// Inexact decimal input
        pub inex1: bool @ 0,

        /// Inexact operation
        pub inex2: bool @ 1,

        /// Divide by zero
        pub dz: bool @ 2,

        pub unfl: bool @ 3,
        pub ovfl: bool @ 4,

        /// Operand error
        pub operr: bool @ 5,

        /// Signaling not-a-number
        pub snan: bool @ 6,

        /// Branch/set on unordered
        pub bsun: bool @ 7,
    }
}

bitfield! {
    /// Accrued exception byte
    #[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
    pub struct FpuAccruedExceptions(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        pub inex: bool @ 3,
        pub dz: bool @ 4,
        pub unfl: bool @ 5,
        pub ovfl: bool @ 6,

        /// Invalid operation
        pub iop: bool @ 7,
    }
}

impl FpuAccruedExceptions {
    /// Folds the status of the last operation into the accrued byte
    pub fn accrue(&mut self, exs: FpuExceptions) {
        if exs.bsun() || exs.snan() || exs.operr() {
            self.set_iop(true);
        }
        if exs.ovfl() {
            self.set_ovfl(true);
        }
        if exs.unfl() && exs.inex2() {
            self.set_unfl(true);
        }
        if exs.dz() {
            self.set_dz(true);
        }
        if exs.inex1() || exs.inex2() || exs.ovfl() {
            self.set_inex(true);
        }
    }
}

bitfield! {
    /// Floating Point Control Register
    #[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
    pub struct RegisterFPCR(pub Long): Debug, FromStorage, IntoStorage, DerefStorage {
        /// Full mode control byte
        pub mode: Byte @ 0..=7,

        /// Rounding mode
        pub rnd: u8 @ 4..=5,

        /// Rounding precision
        pub prec: u8 @ 6..=7,

        /// Exception enables
        pub exc: nested FpuExceptions @ 8..=15,
    }
}

bitfield! {
    /// Floating Point Status Register
    #[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
    pub struct RegisterFPSR(pub Long): Debug, FromStorage, IntoStorage, DerefStorage {
        /// Condition code byte
        pub fpcc: u8 @ 24..=31,

        /// Not-a-number or unordered
        pub fpcc_nan: bool @ 24,

        /// Infinity
        pub fpcc_i: bool @ 25,

        pub fpcc_z: bool @ 26,
        pub fpcc_n: bool @ 27,

        /// 7 least significant bits of the FMOD/FREM quotient
        pub quotient: u8 @ 16..=22,

        /// Sign of quotient
        pub quotient_s: bool @ 23,

        /// Exception status of the last operation
        pub exs: nested FpuExceptions @ 8..=15,

        pub aexc: nested FpuAccruedExceptions @ 0..=7,
    }
}

/// Writable bits of FPCR
pub const FPCR_MASK: Long = 0x0000_FFF0;
/// Writable bits of FPSR
pub const FPSR_MASK: Long = 0x0FFF_FFF8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FpuRegisterFile {
    #[serde(with = "ext_real_array")]
    pub fp: [Float; 8],
    pub fpcr: RegisterFPCR,
    pub fpsr: RegisterFPSR,

    /// Address of the last FPU instruction that could raise an exception
    pub fpiar: Address,
}

impl FpuRegisterFile {
    /// Creates a string with differences between this FpuRegisterFile and another
    pub fn diff_str(&self, other: &Self) -> String {
        let diff = |name, s, o| {
            if s != o {
                format!("{}: {:08X} -> {:08X} ", name, s, o)
            } else {
                String::new()
            }
        };
        let mut out = String::new();
        for i in 0..8 {
            let (s, o) = (BitsExtReal::from(&self.fp[i]), BitsExtReal::from(&other.fp[i]));
            if s != o {
                out.push_str(&format!("FP{}: {:0.6} -> {:0.6} ", i, self.fp[i].as_f64(), other.fp[i].as_f64()));
            }
        }
        out.push_str(&diff("FPCR", self.fpcr.0, other.fpcr.0));
        out.push_str(&diff("FPSR", self.fpsr.0, other.fpsr.0));
        out.push_str(&diff("FPIAR", self.fpiar, other.fpiar));
        out
    }
}

impl Default for FpuRegisterFile {
    fn default() -> Self {
        // Reset loads non-signaling NaNs
        Self {
            fp: core::array::from_fn(|_| Float::nan(SEMANTICS_EXTENDED, false)),
            fpcr: RegisterFPCR(0),
            fpsr: RegisterFPSR(0),
            fpiar: 0,
        }
    }
}

impl Eq for FpuRegisterFile {}
impl PartialEq for FpuRegisterFile {
    /// Registers compare by their stored bit pattern, so NaNs are equal
    /// to themselves.
    fn eq(&self, other: &Self) -> bool {
        self.fp
            .iter()
            .zip(other.fp.iter())
            .all(|(a, b)| BitsExtReal::from(a) == BitsExtReal::from(b))
            && self.fpcr == other.fpcr
            && self.fpsr == other.fpsr
            && self.fpiar == other.fpiar
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accrued_layout() {
        let mut fpsr = RegisterFPSR(0);
        let mut exs = FpuExceptions(0);
        exs.set_dz(true);
        fpsr.set_exs(exs);
        fpsr.aexc_mut().accrue(exs);
        assert_eq!(fpsr.0, 0x0000_0410);

        let mut exs = FpuExceptions(0);
        exs.set_snan(true);
        fpsr.aexc_mut().accrue(exs);
        assert!(fpsr.aexc().iop());
        assert_eq!(fpsr.0 & 0xFF, 0x90);
    }

    #[test]
    fn underflow_accrues_when_inexact() {
        let mut aexc = FpuAccruedExceptions(0);
        let mut exs = FpuExceptions(0);
        exs.set_unfl(true);
        aexc.accrue(exs);
        assert!(!aexc.unfl());
        exs.set_inex2(true);
        aexc.accrue(exs);
        assert!(aexc.unfl());
        assert!(aexc.inex());
    }

    #[test]
    fn equality_by_bits() {
        let a = FpuRegisterFile::default();
        let mut b = FpuRegisterFile::default();
        assert_eq!(a, b);
        b.fp[3] = Float::from_u64(SEMANTICS_EXTENDED, 3);
        assert_ne!(a, b);
        assert!(a.diff_str(&b).starts_with("FP3"));
    }
}
