use arpfloat::{Float, RoundingMode};

pub trait FloatMath {
    fn logbase(&self, base: u64) -> Self;
    fn log2(&self) -> Self;
    fn log10(&self) -> Self;
    fn floor(&self) -> Self;
    fn ceil(&self) -> Self;
    /// Round to an integral value in the given mode
    fn round_int(&self, rm: RoundingMode) -> Self;
    /// Multiplies by 2^n
    fn scale2(&self, n: i64) -> Self;
    /// e^x
    fn etox(&self) -> Self;
    fn sinh(&self) -> Self;
    fn cosh(&self) -> Self;
    fn tanh(&self) -> Self;
}

/// Largest binary exponent before 2^n overflows any supported format
const SCALE_LIMIT: i64 = 1 << 17;

impl FloatMath for Float {
    fn logbase(&self, base: u64) -> Self {
        self.log() / Self::from_u64(self.get_semantics(), base).log()
    }

    fn log2(&self) -> Self {
        self.logbase(2)
    }

    fn log10(&self) -> Self {
        self.logbase(10)
    }

    /// Round toward negative infinity (floor)
    fn floor(&self) -> Self {
        let truncated = self.trunc();
        if self.is_negative() && *self != truncated {
            truncated - Self::one(self.get_semantics(), false)
        } else {
            truncated
        }
    }

    /// Round toward positive infinity (ceil)
    fn ceil(&self) -> Self {
        let truncated = self.trunc();
        if !self.is_negative() && *self != truncated {
            truncated + Self::one(self.get_semantics(), false)
        } else {
            truncated
        }
    }

    fn round_int(&self, rm: RoundingMode) -> Self {
        if self.is_nan() || self.is_inf() || self.is_zero() {
            return self.clone();
        }
        let sem = self.get_semantics();
        let result = match rm {
            RoundingMode::Zero => self.trunc(),
            RoundingMode::Negative => self.floor(),
            RoundingMode::Positive => self.ceil(),
            _ => {
                let truncated = self.trunc();
                let frac = (self - &truncated).abs();
                let half = Self::from_u64(sem, 1) / Self::from_u64(sem, 2);
                let away = || {
                    let one = Self::one(sem, self.is_negative());
                    &truncated + &one
                };
                if frac > half {
                    away()
                } else if frac < half {
                    truncated.clone()
                } else {
                    // Tie: pick the even neighbour
                    let two = Self::from_u64(sem, 2);
                    let halved = &truncated / &two;
                    if halved.trunc() == halved { truncated.clone() } else { away() }
                }
            }
        };
        // Keep the sign of zero results
        if result.is_zero() {
            Self::zero(sem, self.is_negative())
        } else {
            result
        }
    }

    fn scale2(&self, n: i64) -> Self {
        if self.is_nan() || self.is_inf() || self.is_zero() {
            return self.clone();
        }
        let sem = self.get_semantics();
        let one = Self::one(sem, false).get_mantissa();
        let mut result = self.clone();
        let mut n = n.clamp(-SCALE_LIMIT, SCALE_LIMIT);
        // Exact power of two steps, rounding only on overflow or underflow
        while n != 0 && !result.is_zero() && !result.is_inf() {
            let step = n.clamp(-1000, 1000);
            result = &result * &Self::from_parts(sem, false, step, one.clone());
            n -= step;
        }
        result
    }

    fn etox(&self) -> Self {
        let sem = self.get_semantics();
        if self.is_nan() {
            return self.clone();
        }
        if self.is_inf() {
            return if self.is_negative() {
                Self::zero(sem, false)
            } else {
                self.clone()
            };
        }
        if self.is_zero() {
            return Self::one(sem, false);
        }

        // x = n * ln2 + r, |r| <= ln2 / 2
        let ln2 = Self::from_u64(sem, 2).log();
        let n = (self / &ln2).round_int(RoundingMode::NearestTiesToEven);
        if n > Self::from_i64(sem, SCALE_LIMIT) {
            return Self::inf(sem, false);
        }
        if n < Self::from_i64(sem, -SCALE_LIMIT) {
            return Self::zero(sem, false);
        }
        let r = self - &(&n * &ln2);

        // Taylor series of e^r
        let mut sum = Self::one(sem, false);
        let mut term = Self::one(sem, false);
        let epsilon = Self::from_f64(1e-40).cast(sem);
        for i in 1..60u64 {
            term = &(&term * &r) / &Self::from_u64(sem, i);
            sum += &term;
            if term.abs() < epsilon {
                break;
            }
        }
        sum.scale2(n.to_i64())
    }

    fn sinh(&self) -> Self {
        if self.is_zero() || self.is_nan() || self.is_inf() {
            return self.clone();
        }
        let sem = self.get_semantics();
        let e = self.etox();
        let two = Self::from_u64(sem, 2);
        (&e - &(&Self::one(sem, false) / &e)) / two
    }

    fn cosh(&self) -> Self {
        let sem = self.get_semantics();
        if self.is_nan() {
            return self.clone();
        }
        if self.is_inf() {
            return Self::inf(sem, false);
        }
        let e = self.etox();
        let two = Self::from_u64(sem, 2);
        (&e + &(&Self::one(sem, false) / &e)) / two
    }

    fn tanh(&self) -> Self {
        let sem = self.get_semantics();
        if self.is_zero() || self.is_nan() {
            return self.clone();
        }
        // Saturated beyond the precision of the format
        if self.abs() > Self::from_u64(sem, 64) {
            return Self::one(sem, self.is_negative());
        }
        // (e^2x - 1) / (e^2x + 1)
        let e2 = (self + self).etox();
        let one = Self::one(sem, false);
        (&e2 - &one) / (&e2 + &one)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arpfloat::Float;

    #[test]
    fn test_log2() {
        let tolerance = 1e-10;
        for i in 1..2000 {
            let f = f64::from(i) / 10.0;
            let error = (Float::from_f64(f).log2().as_f64() - f.log2()).abs();
            assert!(error < tolerance);
        }
    }

    #[test]
    fn test_log10() {
        let tolerance = 1e-15;
        for i in 1..2000 {
            let f = f64::from(i) / 10.0;
            let error = (Float::from_f64(f).log10().as_f64() - f.log10()).abs();
            assert!(error < tolerance);
        }
    }

    #[test]
    fn test_floor() {
        assert_eq!(Float::from_f64(10000.5).floor().as_f64(), 10000.0);
        assert_eq!(Float::from_f64(10000.0).floor().as_f64(), 10000.0);
        assert_eq!(Float::from_f64(0.5).floor().as_f64(), 0.0);
        assert_eq!(Float::from_f64(-10000.1).floor().as_f64(), -10001.0);
        assert_eq!(Float::from_f64(-0.5).floor().as_f64(), -1.0);
    }

    #[test]
    fn test_ceil() {
        assert_eq!(Float::from_f64(10000.1).ceil().as_f64(), 10001.0);
        assert_eq!(Float::from_f64(10000.0).ceil().as_f64(), 10000.0);
        assert_eq!(Float::from_f64(-10000.9).ceil().as_f64(), -10000.0);
        assert_eq!(Float::from_f64(-0.5).ceil().as_f64(), 0.0);
    }

    #[test]
    fn test_round_int() {
        let r = |v: f64, rm| Float::from_f64(v).round_int(rm).as_f64();
        assert_eq!(r(2.5, RoundingMode::NearestTiesToEven), 2.0);
        assert_eq!(r(3.5, RoundingMode::NearestTiesToEven), 4.0);
        assert_eq!(r(-2.5, RoundingMode::NearestTiesToEven), -2.0);
        assert_eq!(r(-2.6, RoundingMode::NearestTiesToEven), -3.0);
        assert_eq!(r(2.7, RoundingMode::Zero), 2.0);
        assert_eq!(r(-2.2, RoundingMode::Negative), -3.0);
        assert_eq!(r(2.2, RoundingMode::Positive), 3.0);
        assert!(Float::from_f64(-0.2).round_int(RoundingMode::Zero).is_negative());
    }

    #[test]
    fn test_scale2() {
        assert_eq!(Float::from_f64(3.0).scale2(4).as_f64(), 48.0);
        assert_eq!(Float::from_f64(3.0).scale2(-1).as_f64(), 1.5);
        assert!(Float::from_f64(3.0).scale2(5000).is_inf());
        assert!(Float::from_f64(3.0).scale2(-5000).is_zero());
    }

    #[test]
    fn test_etox() {
        for i in -200..200 {
            let f = f64::from(i) / 10.0;
            let got = Float::from_f64(f).etox().as_f64();
            assert!((got - f.exp()).abs() <= f.exp() * 1e-13, "e^{} = {}", f, got);
        }
    }

    #[test]
    fn test_hyperbolic() {
        for i in -30..30 {
            let f = f64::from(i) / 10.0;
            assert!((Float::from_f64(f).sinh().as_f64() - f.sinh()).abs() < 1e-13);
            assert!((Float::from_f64(f).cosh().as_f64() - f.cosh()).abs() < 1e-13);
            assert!((Float::from_f64(f).tanh().as_f64() - f.tanh()).abs() < 1e-14);
        }
    }
}
