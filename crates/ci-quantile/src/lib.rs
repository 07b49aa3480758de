#![forbid(unsafe_code)]

//! Order-statistic helpers shared by the distribution summaries and the KPIs.
//!
//! Quantiles use the R-7 definition: for `n` ascending values and
//! `p` in `[0, 1]`, `h = p * (n - 1)` and the result interpolates linearly
//! between `v[floor(h)]` and `v[ceil(h)]`.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FiveNumber {
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
}

/// R-7 quantile over an ascending slice.
///
/// Returns `None` for an empty slice or a `p` outside `[0, 1]`. The caller
/// guarantees ordering; [`sorted_finite`] produces a valid input.
#[must_use]
pub fn quantile_sorted(sorted: &[f64], p: f64) -> Option<f64> {
    let n = sorted.len();
    if n == 0 || !(0.0..=1.0).contains(&p) {
        return None;
    }
    if n == 1 {
        return Some(sorted[0]);
    }

    let h = p * (n - 1) as f64;
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    let frac = h - h.floor();

    if hi >= n {
        return Some(sorted[n - 1]);
    }
    // Rounding in the subtraction can overshoot the upper neighbour by an ulp.
    Some((sorted[lo] + frac * (sorted[hi] - sorted[lo])).min(sorted[hi]))
}

/// Drops non-finite values and sorts the rest ascending.
#[must_use]
pub fn sorted_finite(values: impl IntoIterator<Item = f64>) -> Vec<f64> {
    let mut out: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
    out.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    out
}

#[must_use]
pub fn quantile(values: impl IntoIterator<Item = f64>, p: f64) -> Option<f64> {
    quantile_sorted(&sorted_finite(values), p)
}

#[must_use]
pub fn median(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    quantile(values, 0.5)
}

/// Five-number summary of an ascending, finite sample.
#[must_use]
pub fn five_number_sorted(sorted: &[f64]) -> Option<FiveNumber> {
    let (&min, &max) = (sorted.first()?, sorted.last()?);
    Some(FiveNumber {
        min,
        q1: quantile_sorted(sorted, 0.25)?,
        median: quantile_sorted(sorted, 0.5)?,
        q3: quantile_sorted(sorted, 0.75)?,
        max,
    })
}

/// Sorts `values` (ignoring NaN and infinities) and summarizes them.
/// `None` when no finite value remains.
#[must_use]
pub fn five_number_summary(values: impl IntoIterator<Item = f64>) -> Option<FiveNumber> {
    five_number_sorted(&sorted_finite(values))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{five_number_summary, median, quantile, quantile_sorted};

    #[test]
    fn quartiles_of_four_values_interpolate() {
        let summary = five_number_summary([40.0, 10.0, 30.0, 20.0]).expect("non-empty");
        assert_eq!(summary.min, 10.0);
        assert_eq!(summary.q1, 17.5);
        assert_eq!(summary.median, 25.0);
        assert_eq!(summary.q3, 32.5);
        assert_eq!(summary.max, 40.0);
    }

    #[test]
    fn single_value_is_every_quantile() {
        for p in [0.0, 0.1, 0.5, 0.99, 1.0] {
            assert_eq!(quantile_sorted(&[7.0], p), Some(7.0));
        }
    }

    #[test]
    fn empty_and_out_of_range_yield_none() {
        assert_eq!(quantile_sorted(&[], 0.5), None);
        assert_eq!(quantile_sorted(&[1.0, 2.0], 1.5), None);
        assert_eq!(quantile_sorted(&[1.0, 2.0], -0.1), None);
        assert!(five_number_summary([]).is_none());
    }

    #[test]
    fn nan_values_are_excluded_not_zeroed() {
        assert_eq!(median([f64::NAN, 30.0, 50.0]), Some(40.0));
        assert!(five_number_summary([f64::NAN, f64::NAN]).is_none());
    }

    #[test]
    fn odd_length_median_is_middle_value() {
        assert_eq!(median([3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(quantile([1.0, 2.0, 3.0, 4.0, 5.0], 0.25), Some(2.0));
    }

    proptest! {
        #[test]
        fn summary_is_ordered(values in proptest::collection::vec(-1e6_f64..1e6_f64, 1..64)) {
            let s = five_number_summary(values).expect("non-empty");
            prop_assert!(s.min <= s.q1);
            prop_assert!(s.q1 <= s.median);
            prop_assert!(s.median <= s.q3);
            prop_assert!(s.q3 <= s.max);
        }

        #[test]
        fn quantiles_are_monotonic(
            values in proptest::collection::vec(-1e3_f64..1e3_f64, 2..32),
            a in 0.0_f64..=1.0,
            b in 0.0_f64..=1.0,
        ) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let q_lo = quantile(values.clone(), lo).expect("non-empty");
            let q_hi = quantile(values, hi).expect("non-empty");
            prop_assert!(q_lo <= q_hi + 1e-9);
        }
    }
}
