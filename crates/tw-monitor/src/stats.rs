//! Two-sample drift statistics.
//!
//! Inputs are the non-missing values of one column in the reference and the
//! current dataset. Categorical values are compared by exact equality.

use statrs::distribution::{ChiSquared, ContinuousCDF};
use statrs::statistics::Statistics;
use std::collections::{BTreeMap, BTreeSet};

/// Numeric values above this many reference rows switch from p-value tests
/// to distance scores.
pub const LARGE_SAMPLE: usize = 1000;

/// Kolmogorov–Smirnov statistic and asymptotic p-value.
pub fn ks_2samp(reference: &[f64], current: &[f64]) -> (f64, f64) {
    if reference.is_empty() || current.is_empty() {
        return (0.0, 1.0);
    }
    let mut a = reference.to_vec();
    let mut b = current.to_vec();
    a.sort_by(f64::total_cmp);
    b.sort_by(f64::total_cmp);

    let (n, m) = (a.len(), b.len());
    let (mut i, mut j) = (0usize, 0usize);
    let mut d: f64 = 0.0;
    while i < n && j < m {
        let x = a[i].min(b[j]);
        while i < n && a[i] <= x {
            i += 1;
        }
        while j < m && b[j] <= x {
            j += 1;
        }
        let gap = (i as f64 / n as f64 - j as f64 / m as f64).abs();
        d = d.max(gap);
    }

    let en = ((n * m) as f64 / (n + m) as f64).sqrt();
    let p = kolmogorov_q((en + 0.12 + 0.11 / en) * d);
    (d, p)
}

/// Survival function of the Kolmogorov distribution.
fn kolmogorov_q(lambda: f64) -> f64 {
    if lambda < 1e-3 {
        return 1.0;
    }
    let mut sum = 0.0;
    let mut sign = 1.0;
    let mut previous_term = 0.0;
    for k in 1..=100 {
        let kf = k as f64;
        let term = sign * 2.0 * (-2.0 * kf * kf * lambda * lambda).exp();
        sum += term;
        if term.abs() <= 1e-10 * previous_term || term.abs() <= 1e-16 * sum.abs() {
            return sum.clamp(0.0, 1.0);
        }
        sign = -sign;
        previous_term = term.abs();
    }
    1.0
}

/// First Wasserstein distance between two empirical distributions.
pub fn wasserstein_distance(reference: &[f64], current: &[f64]) -> f64 {
    if reference.is_empty() || current.is_empty() {
        return 0.0;
    }
    let mut a = reference.to_vec();
    let mut b = current.to_vec();
    a.sort_by(f64::total_cmp);
    b.sort_by(f64::total_cmp);

    let mut all: Vec<f64> = a.iter().chain(b.iter()).copied().collect();
    all.sort_by(f64::total_cmp);

    let (n, m) = (a.len() as f64, b.len() as f64);
    let (mut i, mut j) = (0usize, 0usize);
    let mut distance = 0.0;
    for w in all.windows(2) {
        while i < a.len() && a[i] <= w[0] {
            i += 1;
        }
        while j < b.len() && b[j] <= w[0] {
            j += 1;
        }
        distance += (i as f64 / n - j as f64 / m).abs() * (w[1] - w[0]);
    }
    distance
}

/// Wasserstein distance scaled by the reference standard deviation.
pub fn normed_wasserstein(reference: &[f64], current: &[f64]) -> f64 {
    // Population deviation; NaN for an empty reference falls back to the floor.
    let norm = reference.iter().population_std_dev().max(0.001);
    wasserstein_distance(reference, current) / norm
}

fn category_counts(values: &[f64]) -> BTreeMap<u64, f64> {
    let mut counts = BTreeMap::new();
    for v in values {
        // Fold -0.0 into 0.0 so both count as one category.
        let key = if *v == 0.0 { 0.0f64.to_bits() } else { v.to_bits() };
        *counts.entry(key).or_insert(0.0) += 1.0;
    }
    counts
}

/// Pearson chi-square p-value of current category counts against reference
/// frequencies rescaled to the current sample size.
pub fn chi_square_p_value(reference: &[f64], current: &[f64]) -> f64 {
    if reference.is_empty() || current.is_empty() {
        return 1.0;
    }
    let ref_counts = category_counts(reference);
    let cur_counts = category_counts(current);
    let keys: BTreeSet<u64> = ref_counts.keys().chain(cur_counts.keys()).copied().collect();
    if keys.len() < 2 {
        return 1.0;
    }

    let scale = current.len() as f64 / reference.len() as f64;
    let mut statistic = 0.0;
    for key in &keys {
        let observed = cur_counts.get(key).copied().unwrap_or(0.0);
        let expected = ref_counts.get(key).copied().unwrap_or(0.0) * scale;
        if expected == 0.0 {
            if observed > 0.0 {
                return 0.0;
            }
            continue;
        }
        statistic += (observed - expected).powi(2) / expected;
    }
    chi_square_sf(statistic, (keys.len() - 1) as f64)
}

/// Jensen–Shannon distance (natural log) between category frequencies.
pub fn jensen_shannon_distance(reference: &[f64], current: &[f64]) -> f64 {
    if reference.is_empty() || current.is_empty() {
        return 0.0;
    }
    let ref_counts = category_counts(reference);
    let cur_counts = category_counts(current);
    let (n, m) = (reference.len() as f64, current.len() as f64);

    let keys: BTreeSet<u64> = ref_counts.keys().chain(cur_counts.keys()).copied().collect();
    let mut divergence = 0.0;
    for key in keys {
        let p = ref_counts.get(&key).copied().unwrap_or(0.0) / n;
        let q = cur_counts.get(&key).copied().unwrap_or(0.0) / m;
        let mid = 0.5 * (p + q);
        if p > 0.0 {
            divergence += 0.5 * p * (p / mid).ln();
        }
        if q > 0.0 {
            divergence += 0.5 * q * (q / mid).ln();
        }
    }
    divergence.max(0.0).sqrt()
}

/// Number of distinct values.
pub fn n_unique(values: &[f64]) -> usize {
    category_counts(values).len()
}

/// Quantile with linear interpolation between closest ranks.
pub fn quantile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

/// Chi-square survival function with `dof` degrees of freedom.
pub fn chi_square_sf(x: f64, dof: f64) -> f64 {
    if x <= 0.0 {
        return 1.0;
    }
    ChiSquared::new(dof).map(|dist| dist.sf(x)).unwrap_or(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn ks_identical_samples_do_not_drift() {
        let a: Vec<f64> = (0..200).map(|i| i as f64).collect();
        let (d, p) = ks_2samp(&a, &a);
        assert_eq!(d, 0.0);
        assert!(close(p, 1.0, 1e-9));
    }

    #[test]
    fn ks_shifted_samples_drift() {
        let a: Vec<f64> = (0..200).map(|i| i as f64).collect();
        let b: Vec<f64> = (0..200).map(|i| i as f64 + 150.0).collect();
        let (d, p) = ks_2samp(&a, &b);
        assert!(close(d, 0.75, 1e-12));
        assert!(p < 1e-10);
    }

    #[test]
    fn wasserstein_matches_shift() {
        let a = [0.0, 1.0, 3.0];
        let b = [5.0, 6.0, 8.0];
        assert!(close(wasserstein_distance(&a, &b), 5.0, 1e-12));
        assert!(close(wasserstein_distance(&a, &a), 0.0, 1e-12));
        // Unequal sizes: {0, 1} vs {0} has distance 0.5.
        assert!(close(wasserstein_distance(&[0.0, 1.0], &[0.0]), 0.5, 1e-12));
    }

    #[test]
    fn chi_square_survival_reference_values() {
        // chi2.sf(3.841458820694124, 1) = 0.05
        assert!(close(chi_square_sf(3.841_458_820_694_124, 1.0), 0.05, 1e-6));
        // chi2.sf(10.0, 4) = 0.040427681994512805
        assert!(close(chi_square_sf(10.0, 4.0), 0.040_427_681_994_512_8, 1e-6));
        assert!(close(chi_square_sf(0.0, 3.0), 1.0, 1e-12));
    }

    #[test]
    fn normed_wasserstein_scales_by_reference_spread() {
        // Reference {0, 2} has population deviation 1.
        assert!(close(normed_wasserstein(&[0.0, 2.0], &[3.0, 5.0]), 3.0, 1e-12));
        // Constant reference uses the 0.001 floor.
        assert!(close(normed_wasserstein(&[1.0, 1.0], &[1.5, 1.5]), 500.0, 1e-9));
    }

    #[test]
    fn chi_square_detects_new_categories() {
        let reference = [1.0, 1.0, 2.0, 2.0];
        assert!(close(chi_square_p_value(&reference, &[1.0, 2.0]), 1.0, 1e-9));
        assert_eq!(chi_square_p_value(&reference, &[3.0, 3.0]), 0.0);
    }

    #[test]
    fn jensen_shannon_bounds() {
        let a = [1.0, 2.0, 3.0];
        assert!(close(jensen_shannon_distance(&a, &a), 0.0, 1e-12));
        let disjoint = jensen_shannon_distance(&[1.0, 1.0], &[2.0, 2.0]);
        assert!(close(disjoint, std::f64::consts::LN_2.sqrt(), 1e-12));
    }

    #[test]
    fn quantiles_interpolate() {
        assert_eq!(quantile(&[4.0, 1.0, 3.0, 2.0], 0.5), 2.5);
        assert_eq!(quantile(&[1.0, 2.0, 3.0], 0.5), 2.0);
        assert_eq!(quantile(&[7.0], 0.9), 7.0);
        assert!(quantile(&[], 0.5).is_nan());
        assert_eq!(n_unique(&[0.0, -0.0, 1.0]), 2);
    }
}
