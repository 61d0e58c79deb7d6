//! Dense least-squares solvers.
//!
//! The fitter solves many small regression problems (one per group × model ×
//! fold), each with a handful of predictor columns:
//!
//! ```text
//! minimize ||y - X β||² (+ α ||β||²)
//! ```
//!
//! Implementation choices:
//! - Plain least squares goes through SVD so tall, rank-deficient designs
//!   (e.g. two competitor columns that move together) still produce the
//!   minimum-norm solution instead of failing.
//! - Ridge is solved in closed form on centered data; the intercept is never
//!   penalized.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Prepend a column of ones to `x`.
pub fn with_intercept(x: &DMatrix<f64>) -> DMatrix<f64> {
    let n = x.nrows();
    let mut out = DMatrix::<f64>::from_element(n, x.ncols() + 1, 1.0);
    out.view_mut((0, 1), (n, x.ncols())).copy_from(x);
    out
}

/// Column means of `x`.
pub fn column_means(x: &DMatrix<f64>) -> DVector<f64> {
    let n = x.nrows().max(1) as f64;
    DVector::from_iterator(x.ncols(), x.column_iter().map(|c| c.sum() / n))
}

/// Subtract `means` from every row of `x`.
pub fn center_columns(x: &DMatrix<f64>, means: &DVector<f64>) -> DMatrix<f64> {
    let mut out = x.clone();
    for (j, mut col) in out.column_iter_mut().enumerate() {
        col.add_scalar_mut(-means[j]);
    }
    out
}

/// Ordinary least squares with an intercept. Returns `(intercept, coefficients)`.
pub fn ols_with_intercept(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<(f64, DVector<f64>)> {
    let beta = solve_least_squares(&with_intercept(x), y)?;
    let coefs = beta.rows(1, x.ncols()).into_owned();
    Some((beta[0], coefs))
}

/// Ridge regression with an unpenalized intercept. Returns `(intercept, coefficients)`.
pub fn ridge_with_intercept(x: &DMatrix<f64>, y: &DVector<f64>, alpha: f64) -> Option<(f64, DVector<f64>)> {
    let x_mean = column_means(x);
    let y_mean = y.mean();
    let xc = center_columns(x, &x_mean);
    let yc = y.add_scalar(-y_mean);

    let p = x.ncols();
    let gram = xc.transpose() * &xc + DMatrix::<f64>::identity(p, p) * alpha.max(0.0);
    let rhs = xc.transpose() * yc;

    let coefs = match gram.clone().cholesky() {
        Some(chol) => chol.solve(&rhs),
        None => solve_least_squares(&gram, &rhs)?,
    };
    if !coefs.iter().all(|v| v.is_finite()) {
        return None;
    }
    let intercept = y_mean - x_mean.dot(&coefs);
    Some((intercept, coefs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0]);

        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[0] - 2.0).abs() < 1e-10);
        assert!((beta[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn ols_with_intercept_recovers_plane() {
        // y = 5 - 2 a + 0.5 b
        let rows = [(1.0, 3.0), (2.0, 1.0), (3.0, 4.0), (4.0, 1.0), (5.0, 9.0)];
        let x = DMatrix::from_row_iterator(5, 2, rows.iter().flat_map(|&(a, b)| [a, b]));
        let y = DVector::from_iterator(5, rows.iter().map(|&(a, b)| 5.0 - 2.0 * a + 0.5 * b));
        let (b0, coefs) = ols_with_intercept(&x, &y).unwrap();
        assert!((b0 - 5.0).abs() < 1e-9);
        assert!((coefs[0] + 2.0).abs() < 1e-9);
        assert!((coefs[1] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn ridge_shrinks_towards_zero() {
        let x = DMatrix::from_column_slice(4, 1, &[1.0, 2.0, 3.0, 4.0]);
        let y = DVector::from_row_slice(&[2.0, 4.0, 6.0, 8.0]);
        let (_, free) = ridge_with_intercept(&x, &y, 0.0).unwrap();
        let (_, shrunk) = ridge_with_intercept(&x, &y, 10.0).unwrap();
        assert!((free[0] - 2.0).abs() < 1e-9);
        assert!(shrunk[0] < free[0] && shrunk[0] > 0.0);
    }
}
