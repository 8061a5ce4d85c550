use statrs::function::gamma;

use ndarray::{Array1, ArrayView1};
use std::f64::consts::PI;

pub fn mean_abs_change(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum::<f64>() / a.len() as f64
}

/// Stable log(sum(exp(x))) over a row of log-weights.
pub fn log_sum_exp(xs: ArrayView1<f64>) -> f64 {
    let xmax = xs.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    xs.iter().map(|x| (x - xmax).exp()).sum::<f64>().ln() + xmax
}

pub fn psi(x: f64) -> f64 {
    gamma::digamma(x)
}

pub fn psi_1d(vector: &Array1<f64>) -> Array1<f64> {
    vector.mapv(gamma::digamma)
}

pub fn gammaln(x: f64) -> f64 {
    gamma::ln_gamma(x)
}

pub fn gammaln_1d(vector: &Array1<f64>) -> Array1<f64> {
    vector.mapv(gamma::ln_gamma)
}

// The implementation is based on "[Algorithm AS 121] Trigamma Function",
// B.E. Schneider, Applied Statistics, Volume 27, pp. 97--99, 1978:
// shift into the asymptotic region with psi'(x) = psi'(x + 1) + 1/x^2,
// then evaluate the Bernoulli-number tail.
pub fn trigamma(x: f64) -> f64 {
    const S: f64 = 1e-4;
    const C: f64 = 12.0;
    const TRIGAMMA1: f64 = PI * PI / 6.0;
    const B2: f64 = 1.0 / 6.0;
    const B4: f64 = -1.0 / 30.0;
    const B6: f64 = 1.0 / 42.0;
    const B8: f64 = -1.0 / 30.0;

    if f64::is_nan(x) {
        f64::NAN
    } else if x <= 0.0 && x.floor() == x {
        // poles at zero and the negative integers
        f64::NAN
    } else if x < 0.0 {
        // Use a reflection formula: psi'(x) + psi'(1 - x) = pi^2 / sin^2(pi * x)
        let s = (PI * x).sin();
        PI * PI / (s * s) - trigamma(1.0 - x)
    } else if x <= S {
        1.0 / (x * x) + TRIGAMMA1
    } else {
        // Reduce to trigamma(x + n), where y = x + n >= C
        let mut result = 0.0;
        let mut y = x;
        while y < C {
            result += 1.0 / (y * y);
            y += 1.0;
        }
        // Compute trigamma(y)
        let r = 1.0 / (y * y);
        result + 0.5 * r + (1.0 + r * (B2 + r * (B4 + r * (B6 + r * B8)))) / y
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::arr1;

    const EULER: f64 = 0.5772156649015329;

    #[test]
    fn psi_matches_known_values() {
        assert_abs_diff_eq!(psi(1.0), -EULER, epsilon = 1e-12);
        assert_abs_diff_eq!(psi(0.5), -EULER - 2.0 * 2.0_f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn gammaln_matches_known_values() {
        assert_abs_diff_eq!(gammaln(5.0), 24.0_f64.ln(), epsilon = 1e-12);
        assert_abs_diff_eq!(gammaln(1.0), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn trigamma_matches_known_values() {
        assert_abs_diff_eq!(trigamma(1.0), PI * PI / 6.0, epsilon = 1e-10);
        assert_abs_diff_eq!(trigamma(0.5), PI * PI / 2.0, epsilon = 1e-10);
        assert_abs_diff_eq!(trigamma(2.0), PI * PI / 6.0 - 1.0, epsilon = 1e-10);
    }

    #[test]
    fn trigamma_satisfies_recurrence() {
        for &x in &[0.13, 0.7, 1.9, 3.7, 25.0] {
            assert_abs_diff_eq!(
                trigamma(x),
                trigamma(x + 1.0) + 1.0 / (x * x),
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn trigamma_rejects_poles() {
        assert!(trigamma(0.0).is_nan());
        assert!(trigamma(-3.0).is_nan());
        assert!(trigamma(f64::NAN).is_nan());
    }

    #[test]
    fn log_sum_exp_is_shift_stable() {
        let row = arr1(&[1000.0, 1000.0]);
        assert_abs_diff_eq!(log_sum_exp(row.view()), 1000.0 + 2.0_f64.ln(), epsilon = 1e-12);

        let row = arr1(&[-1000.0, -1001.0]);
        assert_abs_diff_eq!(
            log_sum_exp(row.view()),
            -1000.0 + (-1.0_f64).exp().ln_1p(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn mean_abs_change_averages_over_entries() {
        let a = arr1(&[1.0, 2.0, 3.0]);
        let b = arr1(&[2.0, 2.0, 0.0]);
        assert_abs_diff_eq!(mean_abs_change(&a, &b), 4.0 / 3.0, epsilon = 1e-12);
    }
}
