//! Elasticity model fitting.
//!
//! Responsibilities:
//!
//! - fit the regressor family per group (`regressors`)
//! - shuffled k-fold splits and fold-local standardization (`cv`)
//! - elasticity metrics at the group means (`elasticity`)
//! - run everything over a modeling table in parallel (`fitter`)
//! - keep saved rows and pick the best model per group (`store`)

pub mod cv;
pub mod elasticity;
pub mod fitter;
pub mod regressors;
pub mod store;

pub use cv::{FoldSplit, StandardScaler, back_transform, kfold_splits};
pub use elasticity::{ElasticityAtMeans, csf, elasticity_at_means, implied_competitor_price, own_price_derivative, point_elasticity};
pub use fitter::{FitRun, fit_table, resolve_predictors};
pub use regressors::{Constraint, FitError, LinearFit, fit_regressor};
pub use store::{BestModel, SavedModelStore, best_by_group};
