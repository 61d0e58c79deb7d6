//! Layered workbench configuration.
//!
//! Sources, lowest precedence first:
//!
//! 1. built-in defaults (every section is `#[serde(default)]`)
//! 2. `rgm.toml` in the working directory, or the file given with `--config`
//! 3. `RGM__<SECTION>__<KEY>` environment variables (`.env` is loaded first)
//!
//! CLI flags are applied on top by `app`.

use std::collections::HashMap;
use std::path::Path;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::domain::{AggregationParams, BasePriceParams, FitParams, PromoParams, SimulationParams};
use crate::error::AppError;

pub const DEFAULT_CONFIG_FILE: &str = "rgm.toml";
pub const ENV_PREFIX: &str = "RGM";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,rgm_workbench=info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkbenchConfig {
    pub base_price: BasePriceParams,
    pub promo: PromoParams,
    pub aggregation: AggregationParams,
    pub fitting: FitParams,
    pub simulation: SimulationParams,
    pub logging: LoggingConfig,
}

impl WorkbenchConfig {
    /// Load defaults → config file → process environment.
    ///
    /// An explicit `path` must exist; the default `rgm.toml` is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        // A missing .env is the common case.
        let _ = dotenvy::dotenv();
        Self::load_with_env(path, None)
    }

    /// Like [`WorkbenchConfig::load`], reading variables from `env` instead of
    /// the process environment when given.
    pub fn load_with_env(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self, AppError> {
        let file = match path {
            Some(p) => File::from(p.to_path_buf()).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let config = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?;
        let loaded: WorkbenchConfig = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject values no stage can work with.
    pub fn validate(&self) -> Result<(), AppError> {
        let bp = &self.base_price;
        if bp.window == 0 || bp.validation_window == 0 {
            return Err(AppError::usage("base_price.window and base_price.validation_window must be positive."));
        }
        if !(0.0..=100.0).contains(&bp.percentile) {
            return Err(AppError::usage(format!("base_price.percentile must be in [0, 100] (got {}).", bp.percentile)));
        }
        if self.promo.max_k == 0 || self.promo.k == Some(0) {
            return Err(AppError::usage("promo.max_k and promo.k must be at least 1."));
        }
        if self.aggregation.seasonal_period < 2 {
            return Err(AppError::usage("aggregation.seasonal_period must be at least 2."));
        }
        if self.fitting.folds < 2 {
            return Err(AppError::usage(format!("fitting.folds must be at least 2 (got {}).", self.fitting.folds)));
        }
        if !(0.0..=1.0).contains(&self.fitting.l1_ratio) {
            return Err(AppError::usage("fitting.l1_ratio must be in [0, 1]."));
        }
        if self.simulation.samples < 2 {
            return Err(AppError::usage("simulation.samples must be at least 2."));
        }
        Ok(())
    }
}
