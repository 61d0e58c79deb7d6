//! Linear regressors with an intercept.
//!
//! Every variant returns coefficients in the units of the design matrix it was
//! given. The constrained variants work on an internally centred and scaled
//! copy of the data (positive scales, so signs survive) and map back before
//! returning.
//!
//! Penalised objectives follow the usual conventions:
//!
//! ```text
//! ridge:        ||y - Xb||² + α ||b||²
//! elastic net:  1/(2n) ||y - Xb||² + α ρ ||b||₁ + α (1 - ρ)/2 ||b||²     (lasso: ρ = 1)
//! constrained:  1/(2n) (||y - Xb||² + α ||b||²)  s.t. sign rules below
//! ```

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

use crate::domain::{COL_D1, COL_PPU, FitParams, GradientParams, ModelKind, is_rpi_column};
use crate::math::{center_columns, column_means, ols_with_intercept, ridge_with_intercept};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    #[error("{model}: least-squares system could not be solved")]
    Singular { model: &'static str },
    #[error("{model}: produced non-finite coefficients")]
    NonFinite { model: &'static str },
    #[error("need at least 2 folds, got {0}")]
    TooFewFolds(usize),
    #[error("{folds} folds requested but only {rows} rows available")]
    FoldsExceedRows { folds: usize, rows: usize },
    #[error("only {found} usable predictors, need at least {required}")]
    TooFewPredictors { found: usize, required: usize },
}

/// Sign rule attached to a predictor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    Free,
    /// Own price and competitor RPI: volume cannot rise with price.
    NonPositive,
    /// Distribution: volume cannot fall with reach.
    NonNegative,
}

impl Constraint {
    pub fn for_predictor(name: &str) -> Self {
        if name == COL_PPU || is_rpi_column(name) {
            Constraint::NonPositive
        } else if name == COL_D1 {
            Constraint::NonNegative
        } else {
            Constraint::Free
        }
    }

    pub fn project(self, w: f64) -> f64 {
        match self {
            Constraint::Free => w,
            Constraint::NonPositive => w.min(0.0),
            Constraint::NonNegative => w.max(0.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinearFit {
    pub intercept: f64,
    pub coef: DVector<f64>,
}

impl LinearFit {
    pub fn predict(&self, x: &DMatrix<f64>) -> DVector<f64> {
        (x * &self.coef).add_scalar(self.intercept)
    }
}

/// Fit one model variant. `names` labels the columns of `x` (used by the sign
/// rules of the constrained variants).
pub fn fit_regressor(kind: ModelKind, x: &DMatrix<f64>, y: &DVector<f64>, names: &[String], params: &FitParams) -> Result<LinearFit, FitError> {
    let model = kind.display_name();
    let fit = match kind {
        ModelKind::Ols => {
            let (intercept, coef) = ols_with_intercept(x, y).ok_or(FitError::Singular { model })?;
            LinearFit { intercept, coef }
        }
        ModelKind::Ridge => {
            let (intercept, coef) = ridge_with_intercept(x, y, params.ridge_alpha).ok_or(FitError::Singular { model })?;
            LinearFit { intercept, coef }
        }
        ModelKind::Lasso => elastic_net(x, y, params.lasso_alpha, 1.0),
        ModelKind::ElasticNet => elastic_net(x, y, params.elastic_net_alpha, params.l1_ratio),
        ModelKind::BayesianRidge => bayesian_ridge(x, y),
        ModelKind::ConstrainedLinear => {
            let constraints: Vec<Constraint> = names.iter().map(|n| Constraint::for_predictor(n)).collect();
            constrained_gd(x, y, &constraints, 0.0, &params.gradient)
        }
        ModelKind::ConstrainedRidge => {
            let constraints: Vec<Constraint> = names.iter().map(|n| Constraint::for_predictor(n)).collect();
            constrained_gd(x, y, &constraints, params.constrained_ridge_alpha, &params.gradient)
        }
    };

    if !fit.intercept.is_finite() || fit.coef.iter().any(|v| !v.is_finite()) {
        return Err(FitError::NonFinite { model });
    }
    Ok(fit)
}

fn soft_threshold(z: f64, gamma: f64) -> f64 {
    if z > gamma {
        z - gamma
    } else if z < -gamma {
        z + gamma
    } else {
        0.0
    }
}

/// Coordinate descent for the elastic-net objective on centred data.
fn elastic_net(x: &DMatrix<f64>, y: &DVector<f64>, alpha: f64, l1_ratio: f64) -> LinearFit {
    const MAX_ITER: usize = 10_000;
    const TOL: f64 = 1e-8;

    let n = x.nrows() as f64;
    let x_mean = column_means(x);
    let y_mean = y.mean();
    let xc = center_columns(x, &x_mean);
    let yc = y.add_scalar(-y_mean);

    let p = x.ncols();
    let l1 = alpha.max(0.0) * l1_ratio.clamp(0.0, 1.0) * n;
    let l2 = alpha.max(0.0) * (1.0 - l1_ratio.clamp(0.0, 1.0)) * n;
    let col_sq: Vec<f64> = xc.column_iter().map(|c| c.norm_squared()).collect();

    let mut coef = DVector::<f64>::zeros(p);
    let mut resid = yc.clone();
    for _ in 0..MAX_ITER {
        let mut max_change = 0.0f64;
        let mut max_coef = 0.0f64;
        for j in 0..p {
            if col_sq[j] <= 0.0 {
                continue;
            }
            let col = xc.column(j);
            let old = coef[j];
            let rho = col.dot(&resid) + col_sq[j] * old;
            let new = soft_threshold(rho, l1) / (col_sq[j] + l2);
            if new != old {
                resid.axpy(old - new, &col, 1.0);
                coef[j] = new;
            }
            max_change = max_change.max((new - old).abs());
            max_coef = max_coef.max(new.abs());
        }
        if max_change <= TOL * max_coef.max(1.0) {
            break;
        }
    }

    LinearFit {
        intercept: y_mean - x_mean.dot(&coef),
        coef,
    }
}

/// Bayesian ridge regression with Gamma hyper-priors on the noise and weight
/// precisions, updated by evidence maximisation.
fn bayesian_ridge(x: &DMatrix<f64>, y: &DVector<f64>) -> LinearFit {
    const MAX_ITER: usize = 300;
    const TOL: f64 = 1e-3;
    const ALPHA_1: f64 = 1e-6;
    const ALPHA_2: f64 = 1e-6;
    const LAMBDA_1: f64 = 1e-6;
    const LAMBDA_2: f64 = 1e-6;

    let n = x.nrows() as f64;
    let x_mean = column_means(x);
    let y_mean = y.mean();
    let xc = center_columns(x, &x_mean);
    let yc = y.add_scalar(-y_mean);

    let svd = xc.clone().svd(false, true);
    let Some(v_t) = svd.v_t else {
        return LinearFit {
            intercept: y_mean,
            coef: DVector::zeros(x.ncols()),
        };
    };
    let eigen: Vec<f64> = svd.singular_values.iter().map(|s| s * s).collect();
    let projected = &v_t * (xc.transpose() * &yc);

    let var_y = yc.norm_squared() / n;
    let mut alpha = 1.0 / (var_y + f64::EPSILON);
    let mut lambda = 1.0;
    let mut coef = DVector::<f64>::zeros(x.ncols());

    for _ in 0..MAX_ITER {
        let scaled = DVector::from_iterator(
            eigen.len(),
            eigen.iter().zip(projected.iter()).map(|(e, p)| p / (e + lambda / alpha)),
        );
        let next = v_t.transpose() * scaled;

        let sse = (&yc - &xc * &next).norm_squared();
        let gamma: f64 = eigen.iter().map(|e| alpha * e / (lambda + alpha * e)).sum();
        lambda = (gamma + 2.0 * LAMBDA_1) / (next.norm_squared() + 2.0 * LAMBDA_2);
        alpha = (n - gamma + 2.0 * ALPHA_1) / (sse + 2.0 * ALPHA_2);

        let change: f64 = (&next - &coef).abs().sum();
        coef = next;
        if change < TOL {
            break;
        }
    }

    LinearFit {
        intercept: y_mean - x_mean.dot(&coef),
        coef,
    }
}

/// Projected gradient descent under per-coefficient sign rules.
///
/// Steps are `1/L` (L = Lipschitz constant of the gradient) unless a learning
/// rate is configured; Adam moments are optional. Violating weights are
/// clipped to 0 after every step.
fn constrained_gd(x: &DMatrix<f64>, y: &DVector<f64>, constraints: &[Constraint], alpha: f64, opts: &GradientParams) -> LinearFit {
    let n = x.nrows().max(1) as f64;
    let p = x.ncols();

    let x_mean = column_means(x);
    let x_scale: Vec<f64> = x
        .column_iter()
        .zip(x_mean.iter())
        .map(|(c, m)| {
            let s = (c.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / n).sqrt();
            if s.is_finite() && s > 0.0 { s } else { 1.0 }
        })
        .collect();
    let y_mean = y.mean();
    let y_scale = {
        let s = (y.iter().map(|v| (v - y_mean) * (v - y_mean)).sum::<f64>() / n).sqrt();
        if s.is_finite() && s > 0.0 { s } else { 1.0 }
    };

    let mut xs = center_columns(x, &x_mean);
    for (j, mut col) in xs.column_iter_mut().enumerate() {
        col /= x_scale[j];
    }
    let ys = y.add_scalar(-y_mean) / y_scale;

    let alpha = alpha.max(0.0);
    let sigma_max = xs.clone().svd(false, false).singular_values.max();
    let lipschitz = (sigma_max * sigma_max + alpha) / n;

    let adam = opts.adam;
    let step = opts
        .learning_rate
        .unwrap_or(if adam { 0.01 } else if lipschitz > 0.0 { 1.0 / lipschitz } else { 1.0 });
    let (beta1, beta2, eps) = (0.9, 0.999, 1e-8);

    let mut w = DVector::<f64>::zeros(p);
    let mut m = DVector::<f64>::zeros(p);
    let mut v = DVector::<f64>::zeros(p);
    let xt = xs.transpose();

    for iter in 1..=opts.max_iter.max(1) {
        let grad = (&xt * (&xs * &w - &ys) + &w * alpha) / n;
        let update = if adam {
            m = &m * beta1 + &grad * (1.0 - beta1);
            v = &v * beta2 + grad.component_mul(&grad) * (1.0 - beta2);
            let m_hat = &m / (1.0 - beta1.powi(iter as i32));
            let v_hat = &v / (1.0 - beta2.powi(iter as i32));
            m_hat.zip_map(&v_hat, |a, b| step * a / (b.sqrt() + eps))
        } else {
            grad * step
        };

        let mut max_change = 0.0f64;
        for j in 0..p {
            let next = constraints.get(j).copied().unwrap_or(Constraint::Free).project(w[j] - update[j]);
            max_change = max_change.max((next - w[j]).abs());
            w[j] = next;
        }
        if max_change < opts.tol {
            break;
        }
    }

    let coef = DVector::from_iterator(p, (0..p).map(|j| w[j] * y_scale / x_scale[j]));
    LinearFit {
        intercept: y_mean - x_mean.dot(&coef),
        coef,
    }
}
