//! Stage parameters.
//!
//! Every struct deserializes with `#[serde(default)]` so a config file only has
//! to name the knobs it changes. Defaults are the workbench's standard settings.

use serde::{Deserialize, Serialize};

use crate::domain::types::{Dimension, Granularity, ModelKind, VolumeColumn};

/// Base-price state machine tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BasePriceParams {
    /// Rolling window `W`: initial percentile window and minimum gap between transitions.
    pub window: usize,
    pub up_threshold_pct: f64,
    pub down_threshold_pct: f64,
    /// Forward-looking validation window `V`.
    pub validation_window: usize,
    pub percentile: f64,
    /// Look-ahead used by the downward (price cut) check.
    pub promo_window: usize,
    /// How many look-ahead prices must be stable for a downward transition.
    pub required_stable: usize,
    /// Stability band (percent) for the downward check.
    pub tolerance_pct: f64,
    /// Stability band (percent) for the upward check.
    pub up_band_pct: f64,
}

impl Default for BasePriceParams {
    fn default() -> Self {
        Self {
            window: 12,
            up_threshold_pct: 5.0,
            down_threshold_pct: 5.0,
            validation_window: 12,
            percentile: 75.0,
            promo_window: 12,
            required_stable: 9,
            tolerance_pct: 2.0,
            up_band_pct: 3.0,
        }
    }
}

/// Promo depth clustering settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromoParams {
    /// Dimension whose value completes the combo key.
    pub aggregator: Dimension,
    /// Upper bound of the elbow search.
    pub max_k: usize,
    /// Fixed cluster count; `None` uses the elbow recommendation.
    pub k: Option<usize>,
    pub seed: u64,
    /// K-means restarts (best inertia wins).
    pub n_init: usize,
    pub max_iter: usize,
}

impl Default for PromoParams {
    fn default() -> Self {
        Self {
            aggregator: Dimension::PackType,
            max_k: 7,
            k: None,
            seed: 42,
            n_init: 10,
            max_iter: 300,
        }
    }
}

/// Aggregation pipeline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationParams {
    /// Entity dimensions (at most three) besides channel.
    pub group_dims: Vec<Dimension>,
    /// Competitor pivot dimensions (one or two, subset of `group_dims`).
    pub pivot_dims: Vec<Dimension>,
    pub granularity: Granularity,
    pub volume_column: VolumeColumn,
    /// Kalman-smooth the volume target.
    pub smoothing: bool,
    /// Divide `FilteredVolume` by `CatVol` (share-of-category target).
    pub ratio_mode: bool,
    pub seasonal_period: usize,
    pub outlier_z: f64,
    /// Process noise as a fraction of the series variance.
    pub process_noise_ratio: f64,
    /// Run once per single group dimension instead of on the combined grouping.
    pub per_dimension: bool,
}

impl Default for AggregationParams {
    fn default() -> Self {
        Self {
            group_dims: vec![Dimension::Brand],
            pivot_dims: vec![Dimension::Brand],
            granularity: Granularity::Weekly,
            volume_column: VolumeColumn::Auto,
            smoothing: true,
            ratio_mode: false,
            seasonal_period: 13,
            outlier_z: 3.0,
            process_noise_ratio: 0.1,
            per_dimension: false,
        }
    }
}

/// Gradient-descent settings for the constrained regressors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradientParams {
    /// Step size; `None` uses `1 / L` (Lipschitz bound of the gradient).
    pub learning_rate: Option<f64>,
    pub max_iter: usize,
    pub tol: f64,
    /// Use Adam moment estimates instead of plain steps.
    pub adam: bool,
}

impl Default for GradientParams {
    fn default() -> Self {
        Self {
            learning_rate: None,
            max_iter: 20_000,
            tol: 1e-10,
            adam: false,
        }
    }
}

/// Elasticity model fitting settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitParams {
    pub models: Vec<ModelKind>,
    pub target: String,
    /// Desired predictors; `*_RPI` expands to every competitor column.
    pub predictors: Vec<String>,
    pub min_predictors: usize,
    pub folds: usize,
    pub seed: u64,
    /// Predictors standardized inside each training fold.
    pub standardize: Vec<String>,
    pub exclude_outliers: bool,
    pub ridge_alpha: f64,
    pub lasso_alpha: f64,
    pub elastic_net_alpha: f64,
    pub l1_ratio: f64,
    /// L2 penalty of the constrained ridge variant.
    pub constrained_ridge_alpha: f64,
    pub gradient: GradientParams,
    /// `|SelfElasticity|` above this is flagged.
    pub elasticity_flag_threshold: f64,
}

/// Wildcard that expands to every `_RPI` column of the modeling table.
pub const RPI_WILDCARD: &str = "*_RPI";

impl Default for FitParams {
    fn default() -> Self {
        Self {
            models: ModelKind::ALL.to_vec(),
            target: crate::domain::types::COL_FILTERED_VOLUME.to_string(),
            predictors: vec![
                crate::domain::types::COL_PPU.to_string(),
                RPI_WILDCARD.to_string(),
                crate::domain::types::COL_D1.to_string(),
            ],
            min_predictors: 1,
            folds: 5,
            seed: 42,
            standardize: Vec::new(),
            exclude_outliers: false,
            ridge_alpha: 1.0,
            lasso_alpha: 1.0,
            elastic_net_alpha: 1.0,
            l1_ratio: 0.5,
            constrained_ridge_alpha: 1.0,
            gradient: GradientParams::default(),
            elasticity_flag_threshold: 100.0,
        }
    }
}

/// How competitor prices behave while own price moves along a curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CompetitorPolicyKind {
    /// RPI ratios stay at their stored means.
    Original,
    /// Competitor absolute prices stay fixed; ratios move with own price.
    Competitor,
}

/// Scenario simulation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationParams {
    /// Number of volume samples along a demand curve.
    pub samples: usize,
    pub policy: CompetitorPolicyKind,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            samples: 200,
            policy: CompetitorPolicyKind::Original,
        }
    }
}
