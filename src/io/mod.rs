//! Input/output helpers.
//!
//! - CSV ingest + validation (`ingest`)
//! - artifact exports and fitted-model/bin JSON (`export`)

pub mod export;
pub mod ingest;

pub use export::*;
pub use ingest::*;
