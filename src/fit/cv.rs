//! K-fold splits and fold-local standardization.

use nalgebra::{DMatrix, DVector};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::fit::regressors::FitError;

/// One train/test split; `fold` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldSplit {
    pub fold: usize,
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Shuffled k-fold split of `0..n`.
///
/// The first `n % k` folds get one extra test row. The same `(n, k, seed)`
/// always produces the same folds.
pub fn kfold_splits(n: usize, k: usize, seed: u64) -> Result<Vec<FoldSplit>, FitError> {
    if k < 2 {
        return Err(FitError::TooFewFolds(k));
    }
    if k > n {
        return Err(FitError::FoldsExceedRows { folds: k, rows: n });
    }

    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let base = n / k;
    let extra = n % k;
    let mut splits = Vec::with_capacity(k);
    let mut start = 0;
    for fold in 0..k {
        let size = base + usize::from(fold < extra);
        let end = start + size;
        let test = indices[start..end].to_vec();
        let train = indices[..start].iter().chain(&indices[end..]).copied().collect();
        splits.push(FoldSplit {
            fold: fold + 1,
            train,
            test,
        });
        start = end;
    }
    Ok(splits)
}

/// Column scaler fit on a training fold. Columns not selected for
/// standardization keep mean 0 / scale 1.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
}

impl StandardScaler {
    pub fn identity(p: usize) -> Self {
        Self {
            means: vec![0.0; p],
            scales: vec![1.0; p],
        }
    }

    /// Fit on `x` for the columns flagged in `selected`.
    pub fn fit(x: &DMatrix<f64>, selected: &[bool]) -> Self {
        let n = x.nrows().max(1) as f64;
        let mut scaler = Self::identity(x.ncols());
        for (j, col) in x.column_iter().enumerate() {
            if !selected.get(j).copied().unwrap_or(false) {
                continue;
            }
            let mean = col.sum() / n;
            let std = (col.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n).sqrt();
            scaler.means[j] = mean;
            scaler.scales[j] = if std.is_finite() && std > 0.0 { std } else { 1.0 };
        }
        scaler
    }

    pub fn transform(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        let mut out = x.clone();
        for (j, mut col) in out.column_iter_mut().enumerate() {
            col.add_scalar_mut(-self.means[j]);
            col /= self.scales[j];
        }
        out
    }
}

/// Map coefficients fit on standardized columns back to original units:
/// `raw = std_coef / scale`, `intercept -= raw * mean`.
pub fn back_transform(intercept: f64, coef: &DVector<f64>, scaler: &StandardScaler) -> (f64, DVector<f64>) {
    let mut raw_intercept = intercept;
    let raw = DVector::from_iterator(
        coef.len(),
        coef.iter().enumerate().map(|(j, c)| {
            let r = c / scaler.scales[j];
            raw_intercept -= r * scaler.means[j];
            r
        }),
    );
    (raw_intercept, raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_partition_the_rows() {
        let splits = kfold_splits(11, 3, 42).unwrap();
        assert_eq!(splits.len(), 3);
        assert_eq!(splits.iter().map(|s| s.fold).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(splits.iter().map(|s| s.test.len()).collect::<Vec<_>>(), vec![4, 4, 3]);

        let mut all: Vec<usize> = splits.iter().flat_map(|s| s.test.clone()).collect();
        all.sort_unstable();
        assert_eq!(all, (0..11).collect::<Vec<_>>());
        for s in &splits {
            assert_eq!(s.train.len() + s.test.len(), 11);
            assert!(s.test.iter().all(|i| !s.train.contains(i)));
        }
    }

    #[test]
    fn splits_are_deterministic() {
        assert_eq!(kfold_splits(20, 5, 7).unwrap(), kfold_splits(20, 5, 7).unwrap());
    }

    #[test]
    fn too_many_folds_is_an_error() {
        assert_eq!(kfold_splits(3, 5, 0), Err(FitError::FoldsExceedRows { folds: 5, rows: 3 }));
        assert_eq!(kfold_splits(3, 1, 0), Err(FitError::TooFewFolds(1)));
    }

    #[test]
    fn back_transform_undoes_standardization() {
        // y = 3 + 2 x, x has mean 5 and std 2 on this sample.
        let x = DMatrix::from_column_slice(4, 1, &[3.0, 3.0, 7.0, 7.0]);
        let scaler = StandardScaler::fit(&x, &[true]);
        assert_eq!(scaler.means, vec![5.0]);
        assert_eq!(scaler.scales, vec![2.0]);

        // On the standardized scale: y = 13 + 4 z.
        let (b0, b) = back_transform(13.0, &DVector::from_row_slice(&[4.0]), &scaler);
        assert!((b0 - 3.0).abs() < 1e-12);
        assert!((b[0] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn unselected_columns_pass_through() {
        let x = DMatrix::from_row_slice(2, 2, &[1.0, 10.0, 3.0, 20.0]);
        let scaler = StandardScaler::fit(&x, &[false, true]);
        let t = scaler.transform(&x);
        assert_eq!(t[(0, 0)], 1.0);
        assert_eq!(t[(1, 0)], 3.0);
        assert!((t[(0, 1)] + 1.0).abs() < 1e-12);
    }
}
