//! Small descriptive statistics and fit metrics.
//!
//! All functions ignore nothing: callers filter non-finite values first. Empty
//! inputs return `NaN` rather than panicking.

/// Arithmetic mean.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance (ddof = 0).
pub fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64
}

/// Population standard deviation (ddof = 0).
pub fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

/// Percentile with linear interpolation between closest ranks.
///
/// `q` is in `[0, 100]`. Matches the common "linear" definition:
/// rank = q/100 × (n − 1).
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let rank = (q.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Z-scores with population standard deviation.
///
/// A constant series has no outliers: every score is 0.
pub fn z_scores(values: &[f64]) -> Vec<f64> {
    let m = mean(values);
    let s = std_dev(values);
    if !(s.is_finite() && s > 0.0) {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - m) / s).collect()
}

/// Coefficient of determination. `NaN` when the target is constant.
pub fn r2_score(y: &[f64], y_hat: &[f64]) -> f64 {
    let m = mean(y);
    let ss_tot: f64 = y.iter().map(|v| (v - m) * (v - m)).sum();
    let ss_res: f64 = y.iter().zip(y_hat).map(|(a, b)| (a - b) * (a - b)).sum();
    if ss_tot <= 0.0 {
        return f64::NAN;
    }
    1.0 - ss_res / ss_tot
}

/// Mean absolute percentage error as a fraction (0.1 = 10%).
///
/// Zero targets are guarded with machine epsilon in the denominator.
pub fn mape(y: &[f64], y_hat: &[f64]) -> f64 {
    if y.is_empty() {
        return f64::NAN;
    }
    let total: f64 = y
        .iter()
        .zip(y_hat)
        .map(|(a, b)| (a - b).abs() / a.abs().max(f64::EPSILON))
        .sum();
    total / y.len() as f64
}

/// Mean squared error.
pub fn mse(y: &[f64], y_hat: &[f64]) -> f64 {
    if y.is_empty() {
        return f64::NAN;
    }
    y.iter().zip(y_hat).map(|(a, b)| (a - b) * (a - b)).sum::<f64>() / y.len() as f64
}

/// Safe division: `0` when the denominator is zero or either side is non-finite.
pub fn ratio_or_zero(num: f64, den: f64) -> f64 {
    if num.is_finite() && den.is_finite() && den != 0.0 {
        num / den
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_interpolates_linearly() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert!((percentile(&v, 75.0) - 3.25).abs() < 1e-12);
        assert!((percentile(&v, 0.0) - 1.0).abs() < 1e-12);
        assert!((percentile(&v, 100.0) - 4.0).abs() < 1e-12);
        assert!((percentile(&[7.0], 75.0) - 7.0).abs() < 1e-12);
    }

    #[test]
    fn z_scores_of_constant_series_are_zero() {
        assert_eq!(z_scores(&[3.0, 3.0, 3.0]), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn metrics_on_perfect_fit() {
        let y = [1.0, 2.0, 3.0];
        assert!((r2_score(&y, &y) - 1.0).abs() < 1e-12);
        assert_eq!(mape(&y, &y), 0.0);
        assert_eq!(mse(&y, &y), 0.0);
    }

    #[test]
    fn mape_is_a_fraction() {
        let y = [100.0, 200.0];
        let y_hat = [110.0, 180.0];
        assert!((mape(&y, &y_hat) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn ratio_or_zero_guards() {
        assert_eq!(ratio_or_zero(1.0, 0.0), 0.0);
        assert_eq!(ratio_or_zero(f64::NAN, 2.0), 0.0);
        assert_eq!(ratio_or_zero(3.0, 2.0), 1.5);
    }
}
