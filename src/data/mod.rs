//! Data sources other than user CSVs.

pub mod sample;

pub use sample::{SampleSpec, generate_transactions};
