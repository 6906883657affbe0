use arpfloat::{Float, Semantics};

use super::storage::BitsExtReal;

pub trait FloatTrig {
    fn atan(&self) -> Self;
    fn asin(&self) -> Self;
    fn acos(&self) -> Self;
    fn atanh(&self) -> Self;
    fn relative_epsilon(&self, scale: f64) -> Float;
}

/// pi in extended precision, as held in the constant ROM
pub const PI_EXT: [u32; 3] = [0x4000_0000, 0xC90F_DAA2, 0x2168_C235];

/// pi / 2 in the semantics `sem`
pub fn frac_pi_2(sem: Semantics) -> Float {
    let pi: Float = BitsExtReal::from_longs(PI_EXT).into();
    let two = Float::from_u64(pi.get_semantics(), 2);
    (pi / two).cast(sem)
}

impl FloatTrig for Float {
    fn atan(&self) -> Self {
        let sem = self.get_semantics();
        if self.is_nan() || self.is_zero() {
            return self.clone();
        }
        if self.is_inf() {
            let pi_2 = frac_pi_2(sem);
            return if self.is_negative() { pi_2.neg() } else { pi_2 };
        }

        let one = Self::one(sem, false);
        // atan(x) = pi/2 - atan(1/x) for |x| > 1
        if self.abs() > one {
            let result = (&one / self).atan();
            let pi_2 = frac_pi_2(sem);
            return if self.is_negative() {
                pi_2.neg() - result
            } else {
                pi_2 - result
            };
        }

        // atan(x) = 2 * atan(x / (1 + sqrt(1 + x^2))), twice, for |x| <= tan(pi/16)
        let mut x = self.clone();
        let mut doublings = 0;
        while x.abs() > Self::from_f64(0.2).cast(sem) && doublings < 4 {
            let root = (&one + &(&x * &x)).sqrt();
            x = &x / &(&one + &root);
            doublings += 1;
        }
        let mut result = atan_taylor_series(&x);
        for _ in 0..doublings {
            result = &result + &result;
        }
        result
    }

    fn asin(&self) -> Self {
        let sem = self.get_semantics();
        let one = Self::one(sem, false);
        if self.is_nan() || self.is_zero() {
            return self.clone();
        }
        if self.abs() > one {
            return Self::nan(sem, false);
        }
        if self.abs() == one {
            let pi_2 = frac_pi_2(sem);
            return if self.is_negative() { pi_2.neg() } else { pi_2 };
        }
        // asin(x) = atan(x / sqrt(1 - x^2))
        let root = (&one - &(self * self)).sqrt();
        (self / &root).atan()
    }

    fn acos(&self) -> Self {
        let sem = self.get_semantics();
        if self.is_nan() {
            return self.clone();
        }
        if self.abs() > Self::one(sem, false) {
            return Self::nan(sem, false);
        }
        frac_pi_2(sem) - self.asin()
    }

    fn atanh(&self) -> Self {
        let sem = self.get_semantics();
        let one = Self::one(sem, false);
        if self.is_nan() || self.is_zero() {
            return self.clone();
        }
        if self.abs() > one {
            return Self::nan(sem, false);
        }
        if self.abs() == one {
            return Self::inf(sem, self.is_negative());
        }
        // 0.5 * ln((1 + x) / (1 - x))
        let q = &(&one + self) / &(&one - self);
        q.log() / Self::from_u64(sem, 2)
    }

    fn relative_epsilon(&self, scale: f64) -> Float {
        self.abs() * Self::from_f64(scale).cast(self.get_semantics())
    }
}

fn atan_taylor_series(x: &Float) -> Float {
    // atan(x) = x - x³/3 + x⁵/5 - x⁷/7 + ...
    let mut result = x.clone();
    let mut term = x.clone();
    let x_squared = x * x;

    for i in 1..60 {
        term *= &x_squared;
        let denominator = Float::from_u64(x.get_semantics(), 2 * i + 1);
        let current_term = &term / denominator;

        if i % 2 == 0 {
            result += &current_term;
        } else {
            result -= &current_term;
        }

        if current_term.abs() < x.relative_epsilon(1e-25) {
            break;
        }
    }

    result
}
