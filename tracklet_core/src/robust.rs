//! Robust location/scale estimation.
//!
//! Truncated mean as a least-trimmed window: sort the sample, slide a
//! window covering the kept fraction, and report the window of minimum
//! variance. Outliers fall outside that window no matter how far they are.

use std::f64::consts::{FRAC_1_SQRT_2, PI};

/// Location and scale of the dense core of a sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RobustEstimate {
    /// Mean of the kept window
    pub mean: f64,
    /// Gaussian-consistent spread of the kept window
    pub sigma: f64,
    /// Number of values in the kept window
    pub kept: usize,
}

/// Truncated mean keeping `keep` (0, 1] of `values`.
///
/// Returns `None` for an empty sample. Non-finite values are ignored.
pub fn truncated_mean(values: &[f64], keep: f64) -> Option<RobustEstimate> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let n = sorted.len();
    let keep = keep.clamp(f64::EPSILON, 1.0);
    let h = ((keep * n as f64).ceil() as usize).clamp(1, n);

    // Prefix sums so each window costs O(1)
    let mut s1 = vec![0.0; n + 1];
    let mut s2 = vec![0.0; n + 1];
    for (i, v) in sorted.iter().enumerate() {
        s1[i + 1] = s1[i] + v;
        s2[i + 1] = s2[i] + v * v;
    }

    let hf = h as f64;
    let mut best = (f64::INFINITY, 0.0);
    for start in 0..=(n - h) {
        let sum = s1[start + h] - s1[start];
        let sum2 = s2[start + h] - s2[start];
        let mean = sum / hf;
        let var = (sum2 / hf - mean * mean).max(0.0);
        if var < best.0 {
            best = (var, mean);
        }
    }

    let (var, mean) = best;
    Some(RobustEstimate {
        mean,
        sigma: var.sqrt() / trimmed_normal_scale(h as f64 / n as f64),
        kept: h,
    })
}

/// Ratio of the standard deviation of a unit normal truncated to its
/// central `keep` fraction to that of the full distribution.
pub fn trimmed_normal_scale(keep: f64) -> f64 {
    if keep >= 1.0 {
        return 1.0;
    }
    // Half-width c of the central interval: erf(c / sqrt 2) = keep
    let (mut lo, mut hi) = (0.0_f64, 8.0_f64);
    for _ in 0..64 {
        let mid = 0.5 * (lo + hi);
        if erf(mid * FRAC_1_SQRT_2) < keep {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    let c = 0.5 * (lo + hi);
    let pdf = (-0.5 * c * c).exp() / (2.0 * PI).sqrt();
    let ratio = 1.0 - 2.0 * c * pdf / keep;
    if ratio > 0.0 {
        ratio.sqrt()
    } else {
        // keep -> 0: the window collapses, no meaningful rescale
        1.0
    }
}

/// Error function (Abramowitz & Stegun 7.1.26, |error| < 1.5e-7).
fn erf(x: f64) -> f64 {
    let sign = x.signum();
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    sign * (1.0 - poly * (-x * x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use rand_distr::{Distribution, Normal};

    #[test]
    fn test_empty_sample() {
        assert!(truncated_mean(&[], 0.8).is_none());
        assert!(truncated_mean(&[f64::NAN], 0.8).is_none());
    }

    #[test]
    fn test_constant_sample() {
        let est = truncated_mean(&[2.0; 10], 0.8).unwrap();
        assert_abs_diff_eq!(est.mean, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(est.sigma, 0.0, epsilon = 1e-12);
        assert_eq!(est.kept, 8);
    }

    #[test]
    fn test_single_far_outlier_is_ignored() {
        let values = [0.0, 0.1, -0.1, 0.05, -0.05, 100.0];
        let est = truncated_mean(&values, 0.8).unwrap();
        assert_abs_diff_eq!(est.mean, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_scale_factor_for_default_keep() {
        // Truncated normal at +-1.2816 sigma keeps 80%
        assert_abs_diff_eq!(trimmed_normal_scale(0.8), 0.6616, epsilon = 2e-3);
        assert_eq!(trimmed_normal_scale(1.0), 1.0);
    }

    #[test]
    fn test_erf_reference_values() {
        assert_abs_diff_eq!(erf(0.0), 0.0, epsilon = 1e-7);
        assert_abs_diff_eq!(erf(1.0), 0.842_700_79, epsilon = 2e-7);
        assert_abs_diff_eq!(erf(-1.0), -0.842_700_79, epsilon = 2e-7);
    }

    #[test]
    fn test_robust_against_uniform_contamination() {
        // 80 points from N(0, sigma) plus 20 from U(-10 sigma, 10 sigma)
        for seed in 0..20u64 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let sigma = 0.01 + rng.gen::<f64>() * 5.0;
            let normal = Normal::new(0.0, sigma).unwrap();

            let mut values: Vec<f64> = (0..80).map(|_| normal.sample(&mut rng)).collect();
            values.extend((0..20).map(|_| rng.gen_range(-10.0 * sigma..10.0 * sigma)));

            let est = truncated_mean(&values, 0.8).unwrap();
            assert!(
                est.mean.abs() < 0.5 * sigma,
                "seed {}: mean {} not within 0.5 sigma ({})",
                seed,
                est.mean,
                sigma
            );
        }
    }
}
