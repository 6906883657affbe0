//! Memory formats of floating point operands

use anyhow::{Result, bail};
use arpfloat::{BigInt, Float, RoundingMode, Semantics};
use num_derive::FromPrimitive;
use proc_bitfield::bitfield;

use crate::bus::{Address, Bus, IrqSource};
use crate::cpu_m68k::access::AccessKind;
use crate::cpu_m68k::cpu::CpuM68k;
use crate::cpu_m68k::ea::Operand;
use crate::types::{Byte, Long, Word};

use super::math::FloatMath;
use super::regs::FpuExceptions;
use super::{SEMANTICS_EXTENDED, SEMANTICS_WIDE};

const EXPONENT_BIAS: i64 = 16383;
const EXPONENT_MAX: u64 = 0x7FFF;

/// Largest exponent field of a packed decimal that fits three digits
const PACKED_EXP_DIGITS3: i64 = 999;

bitfield! {
    /// Raw (storage) bit representation of the extended-precision real format
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    pub struct BitsExtReal(pub u128): Debug, FromStorage, IntoStorage, DerefStorage {
        /// Fraction
        pub f: u64 @ 0..=62,

        /// Explicit integer bit
        pub i: bool @ 63,

        /// Fraction plus integer bit
        pub raw_mantissa: u64 @ 0..=63,

        /// Biased exponent
        pub e: u64 @ 80..=94,

        pub s: bool @ 95,

        pub low: u32 @ 0..=31,
        pub mid: u32 @ 32..=63,
        pub high: u32 @ 64..=95,
    }
}

impl BitsExtReal {
    pub fn nan(s: bool) -> Self {
        Self::default()
            .with_e(EXPONENT_MAX)
            .with_raw_mantissa(u64::MAX)
            .with_s(s)
    }

    pub fn is_nan(&self) -> bool {
        self.e() == EXPONENT_MAX && self.f() != 0
    }

    /// NaN with the quiet bit (most significant fraction bit) clear
    pub fn is_snan(&self) -> bool {
        self.is_nan() && self.f() & (1 << 62) == 0
    }

    pub fn inf(s: bool) -> Self {
        Self::default().with_e(EXPONENT_MAX).with_s(s)
    }

    pub fn is_inf(&self) -> bool {
        self.e() == EXPONENT_MAX && self.f() == 0
    }

    pub fn zero(s: bool) -> Self {
        Self::default().with_s(s)
    }

    pub fn is_zero(&self) -> bool {
        self.e() == 0 && self.raw_mantissa() == 0
    }

    /// Memory order: sign/exponent, mantissa high, mantissa low
    pub fn to_longs(self) -> [Long; 3] {
        [self.high(), self.mid(), self.low()]
    }

    pub fn from_longs(l: [Long; 3]) -> Self {
        Self::default()
            .with_high(l[0] & 0xFFFF_0000)
            .with_mid(l[1])
            .with_low(l[2])
    }
}

impl From<&Float> for BitsExtReal {
    fn from(value: &Float) -> Self {
        if value.is_nan() {
            return Self::nan(value.is_negative());
        } else if value.is_inf() {
            return Self::inf(value.is_negative());
        } else if value.is_zero() {
            return Self::zero(value.is_negative());
        }

        let value = if value.get_semantics() == SEMANTICS_EXTENDED {
            value.clone()
        } else {
            value.cast(SEMANTICS_EXTENDED)
        };
        let mut mantissa = value.get_mantissa().as_u64();
        let mut biased = value.get_exp() + EXPONENT_BIAS;

        if biased >= EXPONENT_MAX as i64 {
            return Self::inf(value.is_negative());
        }
        if biased <= 0 || mantissa & (1 << 63) == 0 {
            // Denormal: the exponent field is 0 but scales like 1
            let shift = (1 - biased).max(0) as u32;
            mantissa = mantissa.checked_shr(shift).unwrap_or(0);
            biased = 0;
        }

        Self::default()
            .with_s(value.is_negative())
            .with_raw_mantissa(mantissa)
            .with_e(biased as u64)
    }
}

impl From<BitsExtReal> for Float {
    fn from(value: BitsExtReal) -> Self {
        if value.is_nan() {
            Self::nan(SEMANTICS_EXTENDED, value.s())
        } else if value.is_inf() {
            Self::inf(SEMANTICS_EXTENDED, value.s())
        } else if value.is_zero() {
            Self::zero(SEMANTICS_EXTENDED, value.s())
        } else {
            let unbiased = if value.e() == 0 {
                1 - EXPONENT_BIAS
            } else {
                value.e() as i64 - EXPONENT_BIAS
            };
            Self::from_parts(
                SEMANTICS_EXTENDED,
                value.s(),
                unbiased,
                BigInt::from_u64(value.raw_mantissa()),
            )
        }
    }
}

/// Register file serialization as raw extended-precision bits
pub mod ext_real_array {
    use super::BitsExtReal;
    use arpfloat::Float;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(v: &[Float; 8], s: S) -> Result<S::Ok, S::Error> {
        let raw: [[u32; 3]; 8] = core::array::from_fn(|i| BitsExtReal::from(&v[i]).to_longs());
        raw.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[Float; 8], D::Error> {
        let raw = <[[u32; 3]; 8]>::deserialize(d)?;
        Ok(raw.map(|l| BitsExtReal::from_longs(l).into()))
    }
}

/// Source/destination format field of an FPU instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, strum::Display)]
pub enum FpFormat {
    Long = 0,
    Single = 1,
    Extended = 2,
    /// Packed decimal, static k-factor
    Packed = 3,
    Word = 4,
    Double = 5,
    Byte = 6,
    /// Packed decimal, k-factor in a data register (stores only)
    PackedDynamic = 7,
}

impl FpFormat {
    pub fn decode(field: Word) -> Self {
        <Self as num_traits::FromPrimitive>::from_u16(field & 7).unwrap_or(Self::Extended)
    }

    pub const fn bytes(self) -> Address {
        match self {
            Self::Byte => 1,
            Self::Word => 2,
            Self::Long | Self::Single => 4,
            Self::Double => 8,
            Self::Extended | Self::Packed | Self::PackedDynamic => 12,
        }
    }

    /// Fits a data register
    pub const fn is_register_sized(self) -> bool {
        self.bytes() <= 4
    }

    pub const fn is_packed(self) -> bool {
        matches!(self, Self::Packed | Self::PackedDynamic)
    }
}

/// 10^n in wide precision
pub fn pow10(n: u32) -> Float {
    let mut result = Float::one(SEMANTICS_WIDE, false);
    let mut base = Float::from_u64(SEMANTICS_WIDE, 10);
    let mut n = n;
    while n != 0 {
        if n & 1 != 0 {
            result = &result * &base;
        }
        base = &base * &base;
        n >>= 1;
    }
    result
}

/// Rounding mode applied to a magnitude when the sign is handled apart
fn magnitude_rm(rm: RoundingMode, negative: bool) -> RoundingMode {
    match (rm, negative) {
        (RoundingMode::Negative, true) => RoundingMode::Positive,
        (RoundingMode::Positive, true) => RoundingMode::Negative,
        (m, _) => m,
    }
}

/// Packed decimal to extended precision. Returns true if the conversion
/// was inexact (INEX1).
pub fn packed_to_float(l: [Long; 3], rm: RoundingMode) -> (Float, bool) {
    let sign = l[0] & 0x8000_0000 != 0;
    if (l[0] >> 16) & 0x7FFF == 0x7FFF {
        let payload = (u64::from(l[1]) << 32) | u64::from(l[2]);
        return if payload == 0 {
            (Float::inf(SEMANTICS_EXTENDED, sign), false)
        } else {
            (Float::nan(SEMANTICS_EXTENDED, sign), false)
        };
    }

    let mut digits = u64::from(l[0] & 0xF);
    for long in [l[1], l[2]] {
        for i in (0..8).rev() {
            digits = digits * 10 + u64::from((long >> (i * 4)) & 0xF);
        }
    }
    if digits == 0 {
        return (Float::zero(SEMANTICS_EXTENDED, sign), false);
    }

    let mut exp = i64::from((l[0] >> 24) & 0xF) * 100
        + i64::from((l[0] >> 20) & 0xF) * 10
        + i64::from((l[0] >> 16) & 0xF);
    if l[0] & 0x4000_0000 != 0 {
        exp = -exp;
    }

    // 17 digit mantissa with the decimal point after the first digit
    let scale = exp - 16;
    let m = Float::from_u64(SEMANTICS_WIDE, digits);
    let p = pow10(scale.unsigned_abs() as u32);
    let mut wide = if scale >= 0 { &m * &p } else { &m / &p };
    if sign {
        wide = wide.neg();
    }
    let result = wide.cast_with_rm(SEMANTICS_EXTENDED, rm);
    let inexact = result.cast(SEMANTICS_WIDE) != wide;
    (result, inexact)
}

/// Extended precision to packed decimal with k-factor `k`: k > 0 is the
/// number of significant digits, k <= 0 the number of digits right of
/// the decimal point.
pub fn float_to_packed(value: &Float, k: i8, rm: RoundingMode) -> ([Long; 3], FpuExceptions) {
    let mut exs = FpuExceptions::default();
    let sign = value.is_negative();
    let sm = if sign { 0x8000_0000 } else { 0 };

    if value.is_nan() || value.is_inf() {
        let bits = BitsExtReal::from(value);
        let payload = if value.is_nan() { bits.raw_mantissa() } else { 0 };
        return (
            [sm | 0x7FFF_0000, (payload >> 32) as Long, payload as Long],
            exs,
        );
    }
    if value.is_zero() {
        return ([sm, 0, 0], exs);
    }

    let mut k = i64::from(k);
    if k > 17 {
        exs.set_operr(true);
        k = 17;
    }

    let ax = value.abs().cast(SEMANTICS_WIDE);
    let rm = magnitude_rm(rm, sign);
    // Estimate from the binary exponent, corrected below
    let mut e10 = (ax.get_exp() as f64 * std::f64::consts::LOG10_2).floor() as i64;
    let mut mantissa = 0u64;
    let mut inexact = false;

    for _ in 0..4 {
        let ndigits = if k > 0 { k } else { (e10 + 1 - k).clamp(1, 17) };
        let s = e10 - (ndigits - 1);
        let p = pow10(s.unsigned_abs() as u32);
        let scaled = if s >= 0 { &ax / &p } else { &ax * &p };
        let m = scaled.round_int(rm);

        if m >= pow10(ndigits as u32) {
            e10 += 1;
            continue;
        }
        if m < pow10(ndigits as u32 - 1) {
            e10 -= 1;
            continue;
        }
        inexact = m != scaled;
        mantissa = (m.to_i64() as u64) * 10u64.pow((17 - ndigits) as u32);
        break;
    }
    exs.set_inex2(inexact);

    let se = if e10 < 0 { 0x4000_0000 } else { 0 };
    let ae = e10.unsigned_abs();
    if ae > PACKED_EXP_DIGITS3 as u64 {
        exs.set_operr(true);
    }
    let exp_field = (((ae / 100) % 10) << 24) | (((ae / 10) % 10) << 20) | ((ae % 10) << 16) | (((ae / 1000) % 10) << 12);

    let mut bcd = [0 as Long; 2];
    let mut rest = mantissa % 10u64.pow(16);
    for i in (0..2).rev() {
        for d in 0..8 {
            bcd[i] |= ((rest % 10) as Long) << (d * 4);
            rest /= 10;
        }
    }
    let d16 = (mantissa / 10u64.pow(16)) as Long;

    ([sm | se | exp_field as Long | d16, bcd[0], bcd[1]], exs)
}

/// Integer conversion with operand error on overflow
fn float_to_int(value: &Float, rm: RoundingMode, min: i64, max: i64) -> (i64, FpuExceptions) {
    let mut exs = FpuExceptions::default();
    if value.is_nan() {
        exs.set_operr(true);
        return (if value.is_negative() { min } else { max }, exs);
    }
    let r = value.round_int(rm);
    if r.is_inf() || r > Float::from_i64(SEMANTICS_EXTENDED, max) || r < Float::from_i64(SEMANTICS_EXTENDED, min) {
        exs.set_operr(true);
        return (if value.is_negative() { min } else { max }, exs);
    }
    exs.set_inex2(&r != value);
    (r.to_i64(), exs)
}

/// Conversion to an IEEE interchange format
fn float_to_ieee(value: &Float, sem: Semantics, min_normal: f64, rm: RoundingMode) -> (Float, FpuExceptions) {
    let mut exs = FpuExceptions::default();
    if value.is_nan() || value.is_inf() || value.is_zero() {
        return (value.cast(sem), exs);
    }
    let r = value.cast_with_rm(sem, rm);
    let back = r.cast(SEMANTICS_EXTENDED);
    let inexact = &back != value;
    exs.set_inex2(inexact);
    if r.is_inf() {
        exs.set_ovfl(true);
        exs.set_inex2(true);
    } else if inexact && value.abs() < Float::from_f64(min_normal).cast(SEMANTICS_EXTENDED) {
        // Tiny and inexact
        exs.set_unfl(true);
    }
    (r, exs)
}

/// Converts an extended value to `format`, as stored in memory
pub fn float_to_format(value: &Float, format: FpFormat, k: i8, rm: RoundingMode) -> ([Long; 3], FpuExceptions) {
    match format {
        FpFormat::Byte => {
            let (v, exs) = float_to_int(value, rm, i8::MIN.into(), i8::MAX.into());
            ([v as u8 as Long, 0, 0], exs)
        }
        FpFormat::Word => {
            let (v, exs) = float_to_int(value, rm, i16::MIN.into(), i16::MAX.into());
            ([v as u16 as Long, 0, 0], exs)
        }
        FpFormat::Long => {
            let (v, exs) = float_to_int(value, rm, i32::MIN.into(), i32::MAX.into());
            ([v as u32, 0, 0], exs)
        }
        FpFormat::Single => {
            let (r, exs) = float_to_ieee(value, super::SEMANTICS_SINGLE, f32::MIN_POSITIVE.into(), rm);
            ([r.as_f32().to_bits(), 0, 0], exs)
        }
        FpFormat::Double => {
            let (r, exs) = float_to_ieee(value, super::SEMANTICS_DOUBLE, f64::MIN_POSITIVE, rm);
            let bits = r.as_f64().to_bits();
            ([(bits >> 32) as Long, bits as Long, 0], exs)
        }
        FpFormat::Extended => (BitsExtReal::from(value).to_longs(), FpuExceptions::default()),
        FpFormat::Packed | FpFormat::PackedDynamic => float_to_packed(value, k, rm),
    }
}

/// Converts a stored operand to extended precision, with SNAN and INEX1
/// status
pub fn format_to_float(l: [Long; 3], format: FpFormat, rm: RoundingMode) -> (Float, FpuExceptions) {
    let mut exs = FpuExceptions::default();
    let value = match format {
        FpFormat::Byte => Float::from_i64(SEMANTICS_EXTENDED, (l[0] as u8 as i8).into()),
        FpFormat::Word => Float::from_i64(SEMANTICS_EXTENDED, (l[0] as u16 as i16).into()),
        FpFormat::Long => Float::from_i64(SEMANTICS_EXTENDED, (l[0] as i32).into()),
        FpFormat::Single => {
            let bits = l[0];
            exs.set_snan(bits & 0x7F80_0000 == 0x7F80_0000 && bits & 0x007F_FFFF != 0 && bits & 0x0040_0000 == 0);
            Float::from_f32(f32::from_bits(bits)).cast(SEMANTICS_EXTENDED)
        }
        FpFormat::Double => {
            let bits = (u64::from(l[0]) << 32) | u64::from(l[1]);
            exs.set_snan(
                bits & 0x7FF0_0000_0000_0000 == 0x7FF0_0000_0000_0000
                    && bits & 0x000F_FFFF_FFFF_FFFF != 0
                    && bits & 0x0008_0000_0000_0000 == 0,
            );
            Float::from_f64(f64::from_bits(bits)).cast(SEMANTICS_EXTENDED)
        }
        FpFormat::Extended => {
            let bits = BitsExtReal::from_longs(l);
            exs.set_snan(bits.is_snan());
            bits.into()
        }
        FpFormat::Packed | FpFormat::PackedDynamic => {
            let (v, inexact) = packed_to_float(l, rm);
            exs.set_inex1(inexact);
            v
        }
    };
    (value, exs)
}

impl<TBus> CpuM68k<TBus>
where
    TBus: Bus<Address, u8> + IrqSource,
{
    /// Reads the raw longs of an operand. Register operands only hold
    /// the formats of up to 4 bytes.
    pub(in crate::cpu_m68k) fn fpu_read_raw(&mut self, op: Operand, format: FpFormat) -> Result<[Long; 3]> {
        let mut l = [0; 3];
        let (addr, kind) = match op {
            Operand::Memory(a) => (a, AccessKind::Coprocessor),
            Operand::Program(a) => (a, AccessKind::Program),
            op if format.is_register_sized() => {
                l[0] = match format {
                    FpFormat::Byte => self.read_operand::<Byte>(op)?.into(),
                    FpFormat::Word => self.read_operand::<Word>(op)?.into(),
                    _ => self.read_operand::<Long>(op)?,
                };
                return Ok(l);
            }
            op => bail!("{} operand in {:?}", format, op),
        };
        match format {
            FpFormat::Byte => l[0] = self.read_kind::<Byte>(addr, kind)?.into(),
            FpFormat::Word => l[0] = self.read_kind::<Word>(addr, kind)?.into(),
            _ => {
                for (i, v) in l.iter_mut().take(format.bytes() as usize / 4).enumerate() {
                    *v = self.read_kind::<Long>(addr.wrapping_add(4 * i as Address), kind)?;
                }
            }
        }
        Ok(l)
    }

    /// Writes the raw longs of a converted operand
    pub(in crate::cpu_m68k) fn fpu_write_raw(&mut self, op: Operand, format: FpFormat, l: [Long; 3]) -> Result<()> {
        match op {
            Operand::Memory(addr) => match format {
                FpFormat::Byte => self.cp_write(addr, l[0] as Byte),
                FpFormat::Word => self.cp_write(addr, l[0] as Word),
                _ => {
                    for (i, &v) in l.iter().take(format.bytes() as usize / 4).enumerate() {
                        self.cp_write(addr.wrapping_add(4 * i as Address), v)?;
                    }
                    Ok(())
                }
            },
            Operand::DataRegister(_) if format.is_register_sized() => match format {
                FpFormat::Byte => self.write_operand(op, l[0] as Byte),
                FpFormat::Word => self.write_operand(op, l[0] as Word),
                _ => self.write_operand(op, l[0]),
            },
            op => bail!("{} store to {:?}", format, op),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ext(v: f64) -> Float {
        Float::from_f64(v).cast(SEMANTICS_EXTENDED)
    }

    #[test]
    fn ext_real_bits() {
        let bits = BitsExtReal::from(&ext(1.0));
        assert_eq!(bits.to_longs(), [0x3FFF_0000, 0x8000_0000, 0]);

        let bits = BitsExtReal::from(&ext(-3.0));
        assert_eq!(bits.to_longs(), [0xC000_0000, 0xC000_0000, 0]);

        let back: Float = BitsExtReal::from_longs([0x4000_0000, 0xC90F_DAA2, 0x2168_C235]).into();
        assert!((back.as_f64() - std::f64::consts::PI).abs() < 1e-15);
    }

    #[test]
    fn ext_real_specials() {
        assert!(BitsExtReal::from(&Float::nan(SEMANTICS_EXTENDED, false)).is_nan());
        assert!(BitsExtReal::from(&Float::inf(SEMANTICS_EXTENDED, true)).is_inf());
        assert!(BitsExtReal::from(&Float::inf(SEMANTICS_EXTENDED, true)).s());
        let z = BitsExtReal::from(&Float::zero(SEMANTICS_EXTENDED, true));
        assert!(z.is_zero() && z.s());

        let snan = BitsExtReal::from_longs([0x7FFF_0000, 0x2000_0000, 0]);
        assert!(snan.is_snan());
        assert!(!BitsExtReal::nan(false).is_snan());
    }

    #[test]
    fn ext_real_exponent_range() {
        for exp in [-1000i64, -1, 0, 1, 1000] {
            let f = Float::from_parts(SEMANTICS_EXTENDED, false, exp, BigInt::from_u64(0xC000_0000_0000_0000));
            let bits = BitsExtReal::from(&f);
            assert_eq!(bits.e() as i64, exp + EXPONENT_BIAS);
            assert!(bits.i());
            let back: Float = bits.into();
            assert_eq!(back.get_exp(), exp);
        }
    }

    #[test]
    fn ieee_formats() {
        let rm = RoundingMode::NearestTiesToEven;
        let (l, exs) = float_to_format(&ext(1.5), FpFormat::Single, 0, rm);
        assert_eq!(l[0], 0x3FC0_0000);
        assert!(!exs.inex2());

        let (l, _) = float_to_format(&ext(-2.0), FpFormat::Double, 0, rm);
        assert_eq!(l[0], 0xC000_0000);
        assert_eq!(l[1], 0);

        // 0.1 is not exact in single precision
        let (_, exs) = float_to_format(&ext(0.1), FpFormat::Single, 0, rm);
        assert!(exs.inex2());

        let (v, exs) = format_to_float([0x7F80_0001, 0, 0], FpFormat::Single, rm);
        assert!(v.is_nan());
        assert!(exs.snan());
    }

    #[test]
    fn integer_formats() {
        let rm = RoundingMode::NearestTiesToEven;
        let (l, exs) = float_to_format(&ext(2.5), FpFormat::Long, 0, rm);
        assert_eq!(l[0], 2, "ties to even");
        assert!(exs.inex2());

        let (l, _) = float_to_format(&ext(-2.5), FpFormat::Word, 0, RoundingMode::Negative);
        assert_eq!(l[0], 0xFFFD);

        let (l, exs) = float_to_format(&ext(300.0), FpFormat::Byte, 0, rm);
        assert_eq!(l[0], 0x7F);
        assert!(exs.operr());

        let (v, _) = format_to_float([0xFF, 0, 0], FpFormat::Byte, rm);
        assert_eq!(v.as_f64(), -1.0);
    }

    #[test]
    fn packed_decode() {
        let rm = RoundingMode::NearestTiesToEven;
        // +1.2345E+2
        let (v, inex) = packed_to_float([0x0002_0001, 0x2345_0000, 0], rm);
        assert!((v.as_f64() - 123.45).abs() < 1e-12);
        assert!(inex);

        let (v, inex) = packed_to_float([0x0001_0004, 0x2000_0000, 0], rm);
        assert_eq!(v.as_f64(), 42.0);
        assert!(!inex);

        // -5.0E-1
        let (v, _) = packed_to_float([0xC001_0005, 0, 0], rm);
        assert_eq!(v.as_f64(), -0.5);

        let (v, _) = packed_to_float([0x7FFF_0000, 0, 0], rm);
        assert!(v.is_inf());
        let (v, _) = packed_to_float([0x8000_0000, 0, 0], rm);
        assert!(v.is_zero() && v.is_negative());
    }

    #[test]
    fn packed_encode() {
        let rm = RoundingMode::NearestTiesToEven;
        // 17 significant digits
        let (l, exs) = float_to_packed(&ext(123.0), 17, rm);
        assert_eq!(l, [0x0002_0001, 0x2300_0000, 0]);
        assert!(!exs.inex2());

        // 3 significant digits
        let (l, exs) = float_to_packed(&ext(-0.015625), 3, rm);
        assert_eq!(l, [0xC002_0001, 0x5600_0000, 0]);
        assert!(exs.inex2());

        // Two digits right of the decimal point: 1.234E1
        let (l, _) = float_to_packed(&ext(12.345), -2, rm);
        assert_eq!(l[0], 0x0001_0001);
        assert_eq!(l[1] >> 16, 0x2340);

        // k-factor out of range
        let (_, exs) = float_to_packed(&ext(1.0), 18, rm);
        assert!(exs.operr());
    }

    #[test]
    fn pow10_exact() {
        assert_eq!(pow10(0).as_f64(), 1.0);
        assert_eq!(pow10(5).as_f64(), 100000.0);
        assert_eq!(pow10(22).as_f64(), 1e22);
    }
}
