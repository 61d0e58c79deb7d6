//! `rgm-workbench` library crate.
//!
//! The binary (`rgm`) is a thin wrapper around this library so that:
//!
//! - every stage is testable without spawning processes
//! - stages can be driven directly from other Rust code
//! - code stays easy to navigate as the project grows
//!
//! Stage order: transactions -> base price -> promo bins -> modeling table ->
//! elasticity fits -> scenario simulation.

pub mod aggregate;
pub mod app;
pub mod baseprice;
pub mod cli;
pub mod config;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod promo;
pub mod report;
pub mod simulate;
