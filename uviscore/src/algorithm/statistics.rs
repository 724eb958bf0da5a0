use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Scale factor that makes the MAD consistent with the standard deviation of a normal distribution
pub const MAD_TO_SIGMA: f64 = 1.4826;

/// Median of a slice, averaging the two middle values for even lengths.
///
/// Returns NaN for an empty slice.
pub fn median(values: &[f64]) -> f64 {
    let mut buffer = values.to_vec();
    median_in_place(&mut buffer)
}

/// Median that reorders the given buffer instead of copying it.
pub fn median_in_place(buffer: &mut [f64]) -> f64 {
    let n = buffer.len();
    if n == 0 {
        return f64::NAN;
    }

    let mid = n / 2;
    let (lower, upper, _) = buffer.select_nth_unstable_by(mid, f64::total_cmp);
    let upper = *upper;

    if n % 2 == 1 {
        upper
    } else {
        // everything left of `mid` is <= upper, the lower middle is its maximum
        let lower_middle = lower.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        0.5 * (lower_middle + upper)
    }
}

/// Population standard deviation (divides by n), NaN for an empty slice.
pub fn population_std(values: &[f64]) -> f64 {
    values.iter().population_std_dev()
}

/// Median absolute deviation around `center`.
pub fn median_absolute_deviation(values: &[f64], center: f64) -> f64 {
    let mut deviations: Vec<f64> = values.iter().map(|&v| (v - center).abs()).collect();
    median_in_place(&mut deviations)
}

/// Estimator used for the width of the retained distribution while clipping
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Spread {
    /// population standard deviation of the retained values
    #[default]
    StdDev,
    /// 1.4826 x median absolute deviation around the median
    Mad,
}

impl Spread {
    /// Estimate the spread of `values`; `center` is the median of the same values.
    pub fn estimate(&self, values: &[f64], center: f64) -> f64 {
        match self {
            Spread::StdDev => population_std(values),
            Spread::Mad => MAD_TO_SIGMA * median_absolute_deviation(values, center),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_eq!(median(&[9.0, 9.0, 10.0, 10.0, 10.0, 11.0]), 10.0);
        assert_eq!(median(&[7.0]), 7.0);
    }

    #[test]
    fn test_median_empty_is_nan() {
        assert!(median(&[]).is_nan());
    }

    #[test]
    fn test_median_in_place_does_not_need_sorted_input() {
        let mut values = vec![1000.0, 10.0, 12.0];
        assert_eq!(median_in_place(&mut values), 12.0);
    }

    #[test]
    fn test_population_std() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((population_std(&values) - 2.0).abs() < 1e-12);
        assert_eq!(population_std(&[5.0, 5.0, 5.0]), 0.0);
    }

    #[test]
    fn test_mad_spread_ignores_single_outlier() {
        let values = [10.0, 11.0, 9.0, 10.0, 1000.0, 10.0, 9.0];
        let center = median(&values);
        assert_eq!(center, 10.0);
        assert_eq!(median_absolute_deviation(&values, center), 1.0);

        let robust = Spread::Mad.estimate(&values, center);
        let classic = Spread::StdDev.estimate(&values, center);
        assert!((robust - MAD_TO_SIGMA).abs() < 1e-12);
        assert!(classic > 300.0);
    }
}
