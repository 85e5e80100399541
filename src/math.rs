// Copyright (c) 2022-2024, Richard Lincoln. All rights reserved.

use num_complex::Complex64;
use std::f64::consts::PI;

pub const J: Complex64 = Complex64 { re: 0.0, im: 1.0 };

pub const SQRT_3: f64 = 1.732_050_807_568_877_2;

/// Smallest voltage magnitude (V) used when dividing power by voltage.
pub const V_FLOOR: f64 = 1.0;

#[macro_export]
macro_rules! cmplx {
    () => {
        num_complex::Complex64::new(0.0, 0.0)
    };
    ($arg1:expr) => {
        num_complex::Complex64::new($arg1, 0.0)
    };
    ($arg1:expr, $arg2:expr) => {
        num_complex::Complex64::new($arg1, $arg2)
    };
}

/// Current drawn by a constant power injection: `conj(S / V)`.
///
/// Voltages below [`V_FLOOR`] are lifted to the floor (keeping their angle)
/// so that a collapsed iterate cannot produce an infinite current.
pub fn injection_current(s: Complex64, v: Complex64) -> Complex64 {
    let v = if v.norm() < V_FLOOR {
        let arg = if v.norm() > 0.0 { v.arg() } else { 0.0 };
        Complex64::from_polar(V_FLOOR, arg)
    } else {
        v
    };
    (s / v).conj()
}

/// Returns a phasor of magnitude `mag` sharing the angle of `reference`.
pub fn with_magnitude(mag: f64, reference: Complex64) -> Complex64 {
    Complex64::from_polar(mag, reference.arg())
}

/// Rotation applied to phase `p` (0, 1, 2) of a positive sequence set:
/// 0°, -120°, +120°.
pub fn phase_rotation(p: usize) -> Complex64 {
    Complex64::from_polar(1.0, -2.0 * PI / 3.0 * p as f64)
}

/// Sum of three phase currents solved on a common reference angle, placed
/// on their real displacement first.
pub fn neutral_sum(phases: &[Complex64; 3]) -> Complex64 {
    phases
        .iter()
        .enumerate()
        .map(|(p, i)| i * phase_rotation(p))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_cmplx_macro() {
        assert_eq!(cmplx!(), Complex64::new(0.0, 0.0));
        assert_eq!(cmplx!(2.0), Complex64::new(2.0, 0.0));
        assert_eq!(cmplx!(1.0, -3.0), Complex64::new(1.0, -3.0));
        assert_eq!(J * J, cmplx!(-1.0));
    }

    #[test]
    fn test_injection_current() {
        let i = injection_current(cmplx!(2300.0, 0.0), cmplx!(230.0));
        assert_abs_diff_eq!(i.re, 10.0, epsilon = 1e-12);
        assert_abs_diff_eq!(i.im, 0.0, epsilon = 1e-12);

        // inductive load lags the voltage
        let i = injection_current(cmplx!(0.0, 2300.0), cmplx!(230.0));
        assert_abs_diff_eq!(i.im, -10.0, epsilon = 1e-12);
    }

    #[test]
    fn test_injection_current_floor() {
        let i = injection_current(cmplx!(100.0), cmplx!());
        assert!(i.norm().is_finite());
        assert_abs_diff_eq!(i.norm(), 100.0 / V_FLOOR, epsilon = 1e-12);
    }

    #[test]
    fn test_neutral_sum_balanced() {
        let i = [cmplx!(10.0), cmplx!(10.0), cmplx!(10.0)];
        assert_abs_diff_eq!(neutral_sum(&i).norm(), 0.0, epsilon = 1e-9);

        let i = [cmplx!(10.0), cmplx!(), cmplx!()];
        assert_abs_diff_eq!(neutral_sum(&i).norm(), 10.0, epsilon = 1e-12);
    }

    #[test]
    fn test_with_magnitude() {
        let v = with_magnitude(5.0, cmplx!(3.0, 4.0));
        assert_abs_diff_eq!(v.re, 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(v.im, 4.0, epsilon = 1e-12);
    }
}
