//! Modeling-table construction.
//!
//! - `pipeline`: the end-to-end aggregation run
//! - `rpi`: competitor relative price indices
//! - `category`: category totals, price trend, seasonality, contribution
//! - `decompose`: STL decomposition used for outlier flags
//! - `kalman`: local-level smoother for `FilteredVolume`

pub mod category;
pub mod decompose;
pub mod kalman;
pub mod pipeline;
pub mod rpi;

pub use decompose::{Decomposition, DecompositionError, stl};
pub use kalman::smooth_local_level;
pub use pipeline::{AggregationRun, run_aggregation, run_per_dimension, validate_dimensions};

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::BTreeMap;

    use chrono::NaiveDate;

    use crate::domain::{GroupKey, ModelingRow};

    /// A Grocery row for brand `brand` in week `week` of 2024.
    pub fn row(brand: &str, week: usize, ppu: f64, volume: f64) -> ModelingRow {
        ModelingRow {
            group: GroupKey {
                channel: "Grocery".into(),
                values: vec![brand.into()],
            },
            period: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::weeks(week as i64),
            sales_value: ppu * volume,
            volume,
            ppu,
            base_price: None,
            d1: None,
            filtered_volume: volume,
            cat_vol: 0.0,
            net_cat_vol: 0.0,
            cat_weighted_price: 0.0,
            cat_down_up: 0.0,
            cat_price_trend: 0.0,
            cat_seasonality: 0.0,
            is_outlier: false,
            contribution: 0.0,
            rpi: BTreeMap::new(),
            extras: BTreeMap::new(),
        }
    }
}
