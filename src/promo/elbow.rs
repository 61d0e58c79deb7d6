//! Elbow heuristic for choosing the number of promo bins.

use crate::promo::kmeans::{ClusterError, KMeansOptions, Scaler1d, fit_kmeans};

/// Inertia curve and the recommended `k`.
#[derive(Debug, Clone, PartialEq)]
pub struct ElbowCurve {
    pub ks: Vec<usize>,
    pub inertias: Vec<f64>,
    pub recommended: usize,
}

/// Pick the candidate whose `(k, inertia)` point lies farthest from the straight
/// line joining the first and last candidates.
///
/// A single candidate (or a zero-length line) returns the first `k`.
pub fn find_elbow_k(ks: &[usize], inertias: &[f64]) -> usize {
    let Some(&k_min) = ks.first() else {
        return 1;
    };
    let n = ks.len().min(inertias.len());
    if n < 2 {
        return k_min;
    }

    let (x1, y1) = (ks[0] as f64, inertias[0]);
    let (x2, y2) = (ks[n - 1] as f64, inertias[n - 1]);
    let (dx, dy) = (x2 - x1, y2 - y1);
    let length = (dx * dx + dy * dy).sqrt();
    if !(length.is_finite() && length > 0.0) {
        return k_min;
    }

    let mut best = (k_min, f64::NEG_INFINITY);
    for i in 0..n {
        let (x0, y0) = (ks[i] as f64, inertias[i]);
        let distance = (dy * x0 - dx * y0 + x2 * y1 - y2 * x1).abs() / length;
        if distance > best.1 {
            best = (ks[i], distance);
        }
    }
    best.0
}

/// Run K-means for `k = 1..=min(max_k, n)` on standardized discounts and
/// recommend a `k` with [`find_elbow_k`].
pub fn elbow_curve(discounts: &[f64], max_k: usize, opts: &KMeansOptions) -> Result<ElbowCurve, ClusterError> {
    if discounts.is_empty() {
        return Err(ClusterError::Empty);
    }
    let scaled = Scaler1d::fit(discounts).transform(discounts);
    let k_max = max_k.max(1).min(scaled.len());

    let mut ks = Vec::with_capacity(k_max);
    let mut inertias = Vec::with_capacity(k_max);
    for k in 1..=k_max {
        let fit = fit_kmeans(&scaled, k, opts)?;
        ks.push(k);
        inertias.push(fit.inertia);
    }
    let recommended = find_elbow_k(&ks, &inertias);
    Ok(ElbowCurve {
        ks,
        inertias,
        recommended,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_candidate_returns_it() {
        assert_eq!(find_elbow_k(&[1], &[12.5]), 1);
    }

    #[test]
    fn flat_line_returns_k_min() {
        assert_eq!(find_elbow_k(&[2, 3], &[0.0, 0.0]), 2);
    }

    #[test]
    fn picks_the_knee() {
        let ks = [1, 2, 3, 4, 5, 6, 7];
        let inertias = [100.0, 30.0, 10.0, 8.0, 6.0, 5.0, 4.0];
        assert_eq!(find_elbow_k(&ks, &inertias), 3);
    }

    #[test]
    fn elbow_on_three_depth_levels() {
        let mut d = Vec::new();
        for level in [0.10, 0.30, 0.50] {
            for j in 0..10 {
                d.push(level + 0.002 * j as f64);
            }
        }
        let curve = elbow_curve(&d, 7, &KMeansOptions::default()).unwrap();
        assert_eq!(curve.ks, vec![1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(curve.recommended, 3);
    }

    #[test]
    fn candidate_range_is_capped_by_sample_size() {
        let curve = elbow_curve(&[0.1, 0.3], 7, &KMeansOptions::default()).unwrap();
        assert_eq!(curve.ks, vec![1, 2]);
        assert_eq!(curve.recommended, 1);
    }
}
