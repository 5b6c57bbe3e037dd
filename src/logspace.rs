//! Arithmetic on base-2 log probabilities.
//!
//! Every probability in this crate is stored as log2(p). Zero probability is
//! the sentinel `LOGZERO`, compared by exact equality. The only summation
//! primitive is [`log_add`], which evaluates log2(1 + 2^d) by cubic Hermite
//! interpolation over a table built once per process.
use std::sync::OnceLock;

/// log2(0). Identity element of [`log_add`].
pub const LOGZERO: f64 = f64::NEG_INFINITY;

/// Below this difference of exponents the smaller operand is dropped.
pub const UNDERFLOW_CUTOFF: f64 = -61.0;

// Knots per unit of exponent difference.
const KNOTS_PER_UNIT: usize = 32;
const STEP: f64 = 1f64 / KNOTS_PER_UNIT as f64;

#[derive(Debug, Clone)]
struct HermiteTable {
    // g(x) = log2(1 + 2^-x) and its derivative at x = i * STEP.
    values: Vec<f64>,
    slopes: Vec<f64>,
}

impl HermiteTable {
    fn new() -> Self {
        let len = (-UNDERFLOW_CUTOFF) as usize * KNOTS_PER_UNIT + 2;
        let (values, slopes) = (0..len)
            .map(|i| {
                let x = i as f64 * STEP;
                let value = (-x).exp2().ln_1p() / std::f64::consts::LN_2;
                let slope = -1f64 / (1f64 + x.exp2());
                (value, slope)
            })
            .unzip();
        Self { values, slopes }
    }
    // x should be in [0, 61).
    fn eval(&self, x: f64) -> f64 {
        let pos = x * KNOTS_PER_UNIT as f64;
        let i = pos.floor() as usize;
        let t = pos - i as f64;
        let (t2, t3) = (t * t, t * t * t);
        let h00 = 2f64 * t3 - 3f64 * t2 + 1f64;
        let h10 = t3 - 2f64 * t2 + t;
        let h01 = -2f64 * t3 + 3f64 * t2;
        let h11 = t3 - t2;
        h00 * self.values[i]
            + h10 * STEP * self.slopes[i]
            + h01 * self.values[i + 1]
            + h11 * STEP * self.slopes[i + 1]
    }
}

static TABLE: OnceLock<HermiteTable> = OnceLock::new();

/// log2(1 + 2^d) for d in (UNDERFLOW_CUTOFF, 0].
#[inline]
fn log1p_exp2(d: f64) -> f64 {
    TABLE.get_or_init(HermiteTable::new).eval(-d)
}

/// log2(2^x + 2^y).
#[inline]
pub fn log_add(x: f64, y: f64) -> f64 {
    if x == LOGZERO {
        return y;
    } else if y == LOGZERO {
        return x;
    }
    let (x, y) = if x < y { (y, x) } else { (x, y) };
    let d = y - x;
    if d <= UNDERFLOW_CUTOFF {
        x
    } else {
        x + log1p_exp2(d)
    }
}

pub fn log_sum(xs: &[f64]) -> f64 {
    xs.iter().fold(LOGZERO, |acc, &x| log_add(acc, x))
}

#[inline]
pub fn is_zero(x: f64) -> bool {
    x == LOGZERO
}

/// Back to the real domain. `LOGZERO` maps to exactly 0.
#[inline]
pub fn to_real(x: f64) -> f64 {
    if x == LOGZERO {
        0f64
    } else {
        x.exp2()
    }
}

/// Into the log domain. Non-positive input maps to `LOGZERO`.
#[inline]
pub fn from_real(p: f64) -> f64 {
    if p <= 0f64 {
        LOGZERO
    } else {
        p.log2()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use rand::SeedableRng;
    use rand_xoshiro::Xoroshiro128PlusPlus;
    fn exact(x: f64, y: f64) -> f64 {
        let max = x.max(y);
        max + ((x - max).exp2() + (y - max).exp2()).log2()
    }
    #[test]
    fn approximation_is_tight() {
        let mut d = 0f64;
        while d > UNDERFLOW_CUTOFF {
            let approx = log_add(0f64, d);
            let answer = exact(0f64, d);
            assert!((approx - answer).abs() < 1e-9, "{},{},{}", d, approx, answer);
            d -= 0.001;
        }
    }
    #[test]
    fn log_add_random() {
        let mut rng: Xoroshiro128PlusPlus = SeedableRng::seed_from_u64(4234);
        for _ in 0..10_000 {
            let x = rng.gen_range(-200f64..0f64);
            let y = rng.gen_range(-200f64..0f64);
            let answer = exact(x, y);
            assert!((log_add(x, y) - answer).abs() < 1e-9, "{},{}", x, y);
        }
    }
    #[test]
    fn commutative() {
        let mut rng: Xoroshiro128PlusPlus = SeedableRng::seed_from_u64(11);
        for _ in 0..1000 {
            let x = rng.gen_range(-100f64..10f64);
            let y = rng.gen_range(-100f64..10f64);
            assert_eq!(log_add(x, y), log_add(y, x));
        }
    }
    #[test]
    fn identity() {
        for &x in &[0f64, -1.5, -60.0, -1e5, 3.25] {
            assert_eq!(log_add(x, LOGZERO), x);
            assert_eq!(log_add(LOGZERO, x), x);
        }
        assert!(is_zero(log_add(LOGZERO, LOGZERO)));
    }
    #[test]
    fn cutoff() {
        assert_eq!(log_add(0f64, -61f64), 0f64);
        assert_eq!(log_add(-3f64, -100f64), -3f64);
        assert!(log_add(0f64, -60f64) > 0f64);
    }
    #[test]
    fn equal_operands() {
        assert!((log_add(-2f64, -2f64) + 1f64).abs() < 1e-12);
        assert!((log_sum(&[-2f64; 4])).abs() < 1e-12);
    }
    #[test]
    fn real_roundtrip() {
        assert!(is_zero(from_real(0f64)));
        assert_eq!(to_real(LOGZERO), 0f64);
        assert!((to_real(from_real(0.375)) - 0.375).abs() < 1e-15);
    }
}
