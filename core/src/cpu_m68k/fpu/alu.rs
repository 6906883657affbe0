use arpfloat::{BigInt, Float, RoundingMode, Semantics};

use crate::bus::{Address, Bus, IrqSource};
use crate::cpu_m68k::config::FpuModel;
use crate::cpu_m68k::cpu::CpuM68k;
use crate::cpu_m68k::exception::{
    VECTOR_FP_BSUN, VECTOR_FP_DIVZERO, VECTOR_FP_INEXACT, VECTOR_FP_OPERR, VECTOR_FP_OVERFLOW,
    VECTOR_FP_SNAN, VECTOR_FP_UNDERFLOW,
};
use crate::tickable::Ticks;

use super::math::FloatMath;
use super::regs::FpuExceptions;
use super::storage::BitsExtReal;
use super::trig::FloatTrig;
use super::{SEMANTICS_EXTENDED, SEMANTICS_WIDE};

/// Largest and smallest normalized exponents of the extended format
const EXP_MAX: i64 = 16383;
const EXP_MIN: i64 = -16382;

/// Result of an arithmetic operation, not yet committed to the registers
#[derive(Debug, Clone)]
pub struct AluOutcome {
    /// Destination value, none for FCMP/FTST
    pub result: Option<Float>,
    /// FSINCOS cosine
    pub cosine: Option<Float>,
    /// Value the condition codes are derived from
    pub cc: Float,
    pub exs: FpuExceptions,
    /// FMOD/FREM quotient sign and low 7 bits
    pub quotient: Option<(bool, u8)>,
}

/// Rounding precision in mantissa bits
pub const fn precision_bits(prec: u8) -> usize {
    match prec {
        0b01 => 24,
        0b10 => 53,
        _ => 64,
    }
}

/// Arithmetic operation of the general opclass, with the precision
/// forced by the 68040 single/double rounding variants
pub const fn forced_precision(opmode: u8) -> Option<usize> {
    match opmode & 0x7F {
        0x40..=0x7F => Some(if opmode & 0x04 != 0 { 53 } else { 24 }),
        0x24 | 0x27 => Some(24),
        _ => None,
    }
}

/// Base operation of a 68040 single/double rounding variant
pub const fn base_opmode(opmode: u8) -> u8 {
    match opmode & 0x7F {
        0x40 | 0x44 => 0x00,
        0x41 | 0x45 => 0x04,
        m @ 0x40..=0x7F => m & !0x44,
        0x30..=0x37 => 0x30,
        m => m,
    }
}

/// Opmode handled by the on-chip FPU hardware. The others trap to the
/// line F handler for software emulation.
pub const fn implemented_onchip(opmode: u8, model: FpuModel) -> bool {
    let base = base_opmode(opmode);
    match base {
        0x00 | 0x04 | 0x18 | 0x1A | 0x20 | 0x22 | 0x23 | 0x24 | 0x27 | 0x28 | 0x38 | 0x3A => true,
        // FINT/FINTRZ
        0x01 | 0x03 => matches!(model, FpuModel::M68060),
        _ => false,
    }
}

/// Opmode exists on the 6888x
pub const fn valid_opmode(opmode: u8) -> bool {
    matches!(
        opmode,
        0x00..=0x04 | 0x06 | 0x08..=0x0A | 0x0C..=0x12 | 0x14..=0x16 | 0x18..=0x1A | 0x1C..=0x28 | 0x30..=0x38 | 0x3A
    )
}

/// Variants with forced rounding precision exist on the 68040/68060 only
pub const fn valid_opmode_onchip(opmode: u8) -> bool {
    valid_opmode(opmode)
        || matches!(opmode, 0x40 | 0x41 | 0x44 | 0x45 | 0x58 | 0x5A | 0x5C | 0x5E | 0x60 | 0x62..=0x64 | 0x66..=0x68 | 0x6C)
}

/// Internal cycles of an operation
pub fn op_cycles(opmode: u8, onchip: bool) -> Ticks {
    let base = base_opmode(opmode);
    if onchip {
        return match base {
            0x20 | 0x24 => 38,
            0x04 => 103,
            0x23 | 0x27 => 5,
            0x00 | 0x18 | 0x1A => 2,
            _ => 3,
        };
    }
    match base {
        0x00 => 33,
        0x18 | 0x1A => 35,
        0x38 | 0x3A => 33,
        0x22 | 0x28 => 51,
        0x23 | 0x27 => 71,
        0x20 | 0x24 => 103,
        0x04 => 107,
        0x01 | 0x03 => 55,
        0x1E => 45,
        0x1F => 31,
        0x26 => 41,
        0x21 | 0x25 => 100,
        0x0E | 0x1D => 391,
        0x0F => 473,
        0x0A => 403,
        0x30 => 451,
        0x10 | 0x08 => 497,
        0x11 | 0x12 => 567,
        0x14 | 0x06 => 525,
        0x15 | 0x16 => 581,
        _ => 600,
    }
}

/// Vector of the highest priority exception in `enabled`
pub fn exception_vector(enabled: FpuExceptions) -> Option<u8> {
    if enabled.bsun() {
        Some(VECTOR_FP_BSUN)
    } else if enabled.snan() {
        Some(VECTOR_FP_SNAN)
    } else if enabled.operr() {
        Some(VECTOR_FP_OPERR)
    } else if enabled.ovfl() {
        Some(VECTOR_FP_OVERFLOW)
    } else if enabled.unfl() {
        Some(VECTOR_FP_UNDERFLOW)
    } else if enabled.dz() {
        Some(VECTOR_FP_DIVZERO)
    } else if enabled.inex1() || enabled.inex2() {
        Some(VECTOR_FP_INEXACT)
    } else {
        None
    }
}

/// Largest finite extended value with `bits` of mantissa
fn max_finite(negative: bool, bits: usize) -> Float {
    let mantissa = u64::MAX << (64 - bits);
    Float::from_parts(SEMANTICS_EXTENDED, negative, EXP_MAX, BigInt::from_u64(mantissa))
}

/// Rounds an intermediate result to the destination precision with
/// the extended exponent range
pub fn round_result(value: &Float, bits: usize, rm: RoundingMode) -> (Float, FpuExceptions) {
    let mut exs = FpuExceptions::default();
    if value.is_nan() || value.is_inf() || value.is_zero() {
        return (value.cast(SEMANTICS_EXTENDED), exs);
    }

    let exp = value.get_exp();
    if exp > EXP_MAX {
        exs.set_ovfl(true);
        exs.set_inex2(true);
        let negative = value.is_negative();
        let toward_zero = match rm {
            RoundingMode::Zero => true,
            RoundingMode::Negative => !negative,
            RoundingMode::Positive => negative,
            _ => false,
        };
        let r = if toward_zero {
            max_finite(negative, bits)
        } else {
            Float::inf(SEMANTICS_EXTENDED, negative)
        };
        return (r, exs);
    }

    let sem = Semantics::new(15, bits, rm);
    let r = value.cast_with_rm(sem, rm).cast(SEMANTICS_EXTENDED);
    let inexact = &r.cast(SEMANTICS_WIDE) != value;
    exs.set_inex2(inexact);
    if exp < EXP_MIN {
        exs.set_unfl(true);
    }
    if r.is_inf() {
        exs.set_ovfl(true);
    }
    (r, exs)
}

/// Low 7 bits of an integral quotient
fn quotient_bits(q: &Float) -> u8 {
    let modulus = Float::from_u64(q.get_semantics(), 128);
    let high = (q.abs() / modulus.clone()).trunc();
    let low = &q.abs() - &(&high * &modulus);
    low.to_i64() as u8
}

/// Runs an arithmetic operation. `src` and `dst` are extended precision.
/// Returns None for an opmode that does not exist.
pub fn fpu_arith(opmode: u8, src: &Float, dst: &Float, bits: usize, rm: RoundingMode) -> Option<AluOutcome> {
    let mut exs = FpuExceptions::default();
    let sem = SEMANTICS_EXTENDED;
    let s = src.cast(SEMANTICS_WIDE);
    let d = dst.cast(SEMANTICS_WIDE);
    let base = base_opmode(opmode);
    let bits = forced_precision(opmode).unwrap_or(bits);
    let mut quotient = None;
    let mut cosine = None;
    // Transcendental results are never exact, except the trivial cases
    let mut approximate = false;

    let value: Float = match base {
        // FMOVE
        0x00 => s.clone(),
        // FINT
        0x01 => s.round_int(rm),
        // FINTRZ
        0x03 => s.trunc(),
        // FSQRT
        0x04 => {
            if s.is_negative() && !s.is_zero() {
                Float::nan(SEMANTICS_WIDE, false)
            } else {
                s.sqrt()
            }
        }
        // FABS
        0x18 => s.abs(),
        // FNEG
        0x1A => s.neg(),
        // FADD
        0x22 => &d + &s,
        // FSUB
        0x28 => &d - &s,
        // FMUL, FSGLMUL
        0x23 | 0x27 => &d * &s,
        // FDIV, FSGLDIV
        0x20 | 0x24 => {
            if s.is_zero() && !d.is_zero() && !d.is_nan() && !d.is_inf() {
                exs.set_dz(true);
                Float::inf(SEMANTICS_WIDE, d.is_negative() != s.is_negative())
            } else {
                &d / &s
            }
        }
        // FMOD, FREM
        0x21 | 0x25 => {
            if s.is_zero() || d.is_inf() || s.is_nan() || d.is_nan() {
                Float::nan(SEMANTICS_WIDE, false)
            } else if s.is_inf() {
                quotient = Some((d.is_negative() != s.is_negative(), 0));
                d.clone()
            } else {
                let q = (&d / &s).round_int(if base == 0x21 {
                    RoundingMode::Zero
                } else {
                    RoundingMode::NearestTiesToEven
                });
                quotient = Some((q.is_negative(), quotient_bits(&q)));
                let r = &d - &(&q * &s);
                if r.is_zero() {
                    Float::zero(SEMANTICS_WIDE, d.is_negative())
                } else {
                    r
                }
            }
        }
        // FGETEXP
        0x1E => {
            if s.is_inf() {
                Float::nan(SEMANTICS_WIDE, false)
            } else if s.is_zero() || s.is_nan() {
                s.clone()
            } else {
                Float::from_i64(SEMANTICS_WIDE, s.get_exp())
            }
        }
        // FGETMAN
        0x1F => {
            if s.is_inf() {
                Float::nan(SEMANTICS_WIDE, false)
            } else if s.is_zero() || s.is_nan() {
                s.clone()
            } else {
                s.scale2(-s.get_exp())
            }
        }
        // FSCALE
        0x26 => {
            if s.is_inf() {
                Float::nan(SEMANTICS_WIDE, false)
            } else if s.is_nan() || d.is_nan() {
                Float::nan(SEMANTICS_WIDE, false)
            } else {
                let n = s.trunc();
                let limit = Float::from_i64(SEMANTICS_WIDE, 1 << 17);
                let n = if n.abs() > limit {
                    if n.is_negative() { -(1 << 17) } else { 1 << 17 }
                } else {
                    n.to_i64()
                };
                d.scale2(n)
            }
        }
        // FCMP
        0x38 => {
            if d.is_inf() && s.is_inf() && d.is_negative() == s.is_negative() {
                Float::zero(SEMANTICS_WIDE, d.is_negative())
            } else {
                &d - &s
            }
        }
        // FTST
        0x3A => s.clone(),
        _ => {
            approximate = true;
            let x = src.clone();
            let r = match base {
                // FSINH
                0x02 => x.sinh(),
                // FLOGNP1
                0x06 => {
                    let one = Float::one(sem, false);
                    let y = &x + &one;
                    if y.is_zero() {
                        exs.set_dz(true);
                        Float::inf(sem, true)
                    } else if y.is_negative() {
                        Float::nan(sem, false)
                    } else {
                        y.log()
                    }
                }
                // FETOXM1
                0x08 => &x.etox() - &Float::one(sem, false),
                // FTANH
                0x09 => x.tanh(),
                // FATAN
                0x0A => x.atan(),
                // FASIN
                0x0C => x.asin(),
                // FATANH
                0x0D => {
                    let r = x.atanh();
                    if r.is_inf() {
                        exs.set_dz(true);
                    }
                    r
                }
                // FSIN
                0x0E => trig_or_nan(&x, |v| v.sin()),
                // FTAN
                0x0F => trig_or_nan(&x, |v| v.tan()),
                // FETOX
                0x10 => x.etox(),
                // FTWOTOX
                0x11 => (&x * &Float::from_u64(sem, 2).log()).etox(),
                // FTENTOX
                0x12 => (&x * &Float::from_u64(sem, 10).log()).etox(),
                // FLOGN, FLOG10, FLOG2
                0x14 | 0x15 | 0x16 => {
                    if x.is_zero() {
                        exs.set_dz(true);
                        Float::inf(sem, true)
                    } else if x.is_negative() {
                        Float::nan(sem, false)
                    } else {
                        match base {
                            0x14 => x.log(),
                            0x15 => x.log10(),
                            _ => x.log2(),
                        }
                    }
                }
                // FCOSH
                0x19 => x.cosh(),
                // FACOS
                0x1C => x.acos(),
                // FCOS
                0x1D => trig_or_nan(&x, |v| v.cos()),
                // FSINCOS
                0x30 => {
                    cosine = Some(trig_or_nan(&x, |v| v.cos()));
                    trig_or_nan(&x, |v| v.sin())
                }
                _ => return None,
            };
            r.cast(SEMANTICS_WIDE)
        }
    };

    let nan_input = s.is_nan() || (d.is_nan() && matches!(base, 0x20..=0x28 | 0x38));
    if value.is_nan() && !nan_input {
        exs.set_operr(true);
    }

    let (rounded, round_exs) = round_result(&value, bits, rm);
    exs.0 |= round_exs.0;
    if approximate && !(rounded.is_zero() || rounded.is_inf() || rounded.is_nan()) && !exact_transcendental(base, &s) {
        exs.set_inex2(true);
    }
    let cosine = cosine.map(|c| round_result(&c.cast(SEMANTICS_WIDE), bits, rm).0);

    let (result, cc) = match base {
        0x38 | 0x3A => (None, rounded),
        _ => (Some(rounded.clone()), rounded),
    };
    Some(AluOutcome {
        result,
        cosine,
        cc,
        exs,
        quotient,
    })
}

/// Trigonometric function, NaN for infinite arguments
fn trig_or_nan(x: &Float, f: impl Fn(&Float) -> Float) -> Float {
    if x.is_inf() {
        Float::nan(x.get_semantics(), false)
    } else if x.is_zero() {
        x.clone()
    } else {
        f(x)
    }
}

/// Exact special values of the transcendental functions
fn exact_transcendental(base: u8, s: &Float) -> bool {
    // e^0, 2^0, 10^0, cosh(0)
    s.is_zero() && matches!(base, 0x10 | 0x11 | 0x12 | 0x19 | 0x1D | 0x30)
}

impl<TBus> CpuM68k<TBus>
where
    TBus: Bus<Address, u8> + IrqSource,
{
    pub(in crate::cpu_m68k) fn fpu_rounding_mode(&self) -> RoundingMode {
        match self.regs.fpu.fpcr.rnd() {
            0b00 => RoundingMode::NearestTiesToEven,
            0b01 => RoundingMode::Zero,
            0b10 => RoundingMode::Negative,
            _ => RoundingMode::Positive,
        }
    }

    pub(in crate::cpu_m68k) fn fpu_precision_bits(&self) -> usize {
        precision_bits(self.regs.fpu.fpcr.prec())
    }

    /// Condition codes of a result
    pub(in crate::cpu_m68k) fn fpu_condition_codes(&mut self, result: &Float) {
        let fpsr = &mut self.regs.fpu.fpsr;
        fpsr.set_fpcc(0);
        fpsr.set_fpcc_nan(result.is_nan());
        fpsr.set_fpcc_i(result.is_inf());
        fpsr.set_fpcc_z(result.is_zero());
        fpsr.set_fpcc_n(result.is_negative());
    }

    /// Stores the exception status of an operation and accrues it.
    /// Returns the vector of an enabled exception.
    pub(in crate::cpu_m68k) fn fpu_status(&mut self, exs: FpuExceptions) -> Option<u8> {
        let fpsr = &mut self.regs.fpu.fpsr;
        fpsr.set_exs(exs);
        fpsr.aexc_mut().accrue(exs);
        let enabled = FpuExceptions(exs.0 & self.regs.fpu.fpcr.exc().0);
        exception_vector(enabled)
    }

    /// Applies an arithmetic outcome to FPn (and FPc for FSINCOS)
    pub(in crate::cpu_m68k) fn fpu_commit(&mut self, outcome: &AluOutcome, dst: usize, cos_dst: usize) {
        if let Some((sign, bits)) = outcome.quotient {
            self.regs.fpu.fpsr.set_quotient_s(sign);
            self.regs.fpu.fpsr.set_quotient(bits & 0x7F);
        }
        if let Some(r) = &outcome.result {
            self.regs.fpu.fp[dst] = r.clone();
        }
        if let Some(c) = &outcome.cosine {
            self.regs.fpu.fp[cos_dst] = c.clone();
        }
        self.fpu_condition_codes(&outcome.cc);
    }
}

/// Extended precision bits of a register value, for the exception state
pub fn ext_bits(value: &Float) -> [u32; 3] {
    BitsExtReal::from(value).to_longs()
}
