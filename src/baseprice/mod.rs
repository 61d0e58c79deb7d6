//! Base-price estimation.
//!
//! - `estimator`: the per-entity step-change state machine
//! - `weekly`: transactions → weekly aggregates, and table-wide fills

pub mod estimator;
pub mod weekly;

pub use estimator::{BasePriceError, BasePriceSeries, BasePriceState, estimate_base_price};
pub use weekly::{BasePriceRun, aggregate_weekly, apply_base_prices, fill_missing_base_prices};
