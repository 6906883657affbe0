//! M68k integer ALU: flag computation for arithmetic, logic, shifts,
//! multiply/divide and condition code evaluation.

use super::CpuSized;
use super::regs::RegisterSR;
use crate::types::{Long, Word};

/// Shift/rotate operation selector, as encoded in bits 4-3 (register
/// form) or 10-9 (memory form) of the opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftOp {
    Arithmetic,
    Logical,
    RotateExtend,
    Rotate,
}

impl ShiftOp {
    pub const fn from_bits(bits: Word) -> Self {
        match bits & 3 {
            0 => Self::Arithmetic,
            1 => Self::Logical,
            2 => Self::RotateExtend,
            _ => Self::Rotate,
        }
    }
}

/// Flags of an addition/subtraction. `sub` selects the overflow rule.
fn arith_flags<T: CpuSized>(a: Long, b: Long, result: Long, sub: bool, mut f: RegisterSR) -> RegisterSR {
    let msb: Long = T::msb().into();
    let carry: Long = a ^ b ^ result;
    let overflow: Long = if sub {
        (a ^ result) & (b ^ a)
    } else {
        (a ^ result) & (b ^ result)
    };

    f.set_c((carry ^ overflow) & msb != 0);
    f.set_x(f.c());
    f.set_v(overflow & msb != 0);
    f.set_n(result & msb != 0);
    f
}

/// a + b (+ X when `extend`). Extended forms only ever clear Z.
pub fn add<T: CpuSized>(a: T, b: T, extend: bool, f: RegisterSR) -> (T, u8) {
    let (a, b) = (a.expand(), b.expand());
    let x = Long::from(extend && f.x());
    let result = a.wrapping_add(b).wrapping_add(x);

    let mut nf = arith_flags::<T>(a, b, result, false, f);
    let zero = T::chop(result) == T::zero();
    if extend {
        if !zero {
            nf.set_z(false);
        }
    } else {
        nf.set_z(zero);
    }
    (T::chop(result), nf.ccr())
}

/// a - b (- X when `extend`)
pub fn sub<T: CpuSized>(a: T, b: T, extend: bool, f: RegisterSR) -> (T, u8) {
    let (a, b) = (a.expand(), b.expand());
    let x = Long::from(extend && f.x());
    let result = a.wrapping_sub(b).wrapping_sub(x);

    let mut nf = arith_flags::<T>(a, b, result, true, f);
    let zero = T::chop(result) == T::zero();
    if extend {
        if !zero {
            nf.set_z(false);
        }
    } else {
        nf.set_z(zero);
    }
    (T::chop(result), nf.ccr())
}

/// a - b for CMP/CMPA/CMPI, X untouched
pub fn cmp<T: CpuSized>(a: T, b: T, f: RegisterSR) -> u8 {
    let (_, ccr) = sub(a, b, false, f);
    let mut nf = RegisterSR(Word::from(ccr));
    nf.set_x(f.x());
    nf.ccr()
}

/// N/Z from the result, V and C cleared, X untouched
pub fn logic<T: CpuSized>(result: T, mut f: RegisterSR) -> u8 {
    f.set_n(result & T::msb() != T::zero());
    f.set_z(result == T::zero());
    f.set_v(false);
    f.set_c(false);
    f.ccr()
}

/// Shifts and rotates, `count` modulo 64 as the hardware does for
/// register counts.
pub fn shift<T: CpuSized>(op: ShiftOp, left: bool, mut value: T, count: usize, mut f: RegisterSR) -> (T, u8) {
    let msb_set = |v: T| v & T::msb() != T::zero();
    let lsb_set = |v: T| v & T::one() != T::zero();
    let mut overflow = false;

    // Count of 0 clears C, except for ROXL/ROXR where C = X
    f.set_c(op == ShiftOp::RotateExtend && f.x());

    for _ in 0..count {
        let out = if left { msb_set(value) } else { lsb_set(value) };
        let old_msb = msb_set(value);
        let carry_in = match op {
            ShiftOp::Arithmetic if !left => old_msb,
            ShiftOp::Arithmetic | ShiftOp::Logical => false,
            ShiftOp::Rotate => out,
            ShiftOp::RotateExtend => f.x(),
        };

        if left {
            value <<= T::one();
            if carry_in {
                value |= T::one();
            }
        } else {
            value >>= T::one();
            if carry_in {
                value |= T::msb();
            }
        }

        if op == ShiftOp::Arithmetic && left && old_msb != msb_set(value) {
            overflow = true;
        }
        f.set_c(out);
        if op != ShiftOp::Rotate {
            f.set_x(out);
        }
    }

    f.set_v(overflow);
    f.set_z(value == T::zero());
    f.set_n(msb_set(value));
    (value, f.ccr())
}

/// Result of a 32/16 or 64/32 division
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Division {
    Ok { quotient: Long, remainder: Long },
    Overflow,
}

/// DIVU.W: 32 / 16 -> 16r:16q
pub fn divu_w(dividend: Long, divisor: Word) -> Division {
    let divisor = Long::from(divisor);
    let quotient = dividend / divisor;
    if quotient > 0xFFFF {
        return Division::Overflow;
    }
    Division::Ok {
        quotient,
        remainder: dividend % divisor,
    }
}

/// DIVS.W: 32 / 16 signed, remainder takes the sign of the dividend
pub fn divs_w(dividend: Long, divisor: Word) -> Division {
    let dividend = dividend as i32 as i64;
    let divisor = divisor as i16 as i64;
    let quotient = dividend / divisor;
    if quotient < i64::from(i16::MIN) || quotient > i64::from(i16::MAX) {
        return Division::Overflow;
    }
    Division::Ok {
        quotient: quotient as i16 as Word as Long,
        remainder: (dividend % divisor) as i16 as Word as Long,
    }
}

/// Flags after a division. Overflow sets V and leaves N/Z undefined,
/// which is modelled as unchanged.
pub fn div_flags(div: Division, quotient_msb: Long, mut f: RegisterSR) -> u8 {
    f.set_c(false);
    match div {
        Division::Overflow => {
            f.set_v(true);
        }
        Division::Ok { quotient, .. } => {
            f.set_v(false);
            f.set_z(quotient == 0);
            f.set_n(quotient & quotient_msb != 0);
        }
    }
    f.ccr()
}

/// Evaluates a 4-bit condition against the CCR
pub fn test_cc(cond: Word, f: RegisterSR) -> bool {
    let (c, v, z, n) = (f.c(), f.v(), f.z(), f.n());
    match cond & 0xF {
        0x0 => true,
        0x1 => false,
        0x2 => !c && !z,
        0x3 => c || z,
        0x4 => !c,
        0x5 => c,
        0x6 => !z,
        0x7 => z,
        0x8 => !v,
        0x9 => v,
        0xA => !n,
        0xB => n,
        0xC => n == v,
        0xD => n != v,
        0xE => !z && (n == v),
        _ => z || (n != v),
    }
}
