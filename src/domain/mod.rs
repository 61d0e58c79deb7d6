//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - input rows and weekly aggregates (`TransactionRecord`, `WeeklyAggregate`)
//! - grouping keys (`EntityKey`, `GroupKey`, `ComboKey`)
//! - stage outputs (`PromoBin`, `ModelingTable`, `FittedModelRow`, `CurvePoint`)
//! - stage parameters (`params`)

pub mod params;
pub mod types;

pub use params::*;
pub use types::*;
