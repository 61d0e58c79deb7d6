//! Command-line parsing for the `rgm` revenue-growth-management workbench.
//!
//! The goal of this module is to keep **argument parsing** separate from the
//! analytics code. Every flag here is an *override*: when it is absent the
//! value comes from the layered configuration (`rgm.toml`, `RGM__*` env vars).

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use crate::domain::{CompetitorPolicyKind, Dimension, ModelKind, VolumeColumn};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "rgm", version, about = "Revenue Growth Management analytics workbench")]
pub struct Cli {
    /// Configuration file (defaults to `rgm.toml` in the working directory, if present).
    #[arg(long, global = true, env = "RGM_CONFIG", value_name = "TOML")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Write a synthetic transaction CSV (useful for trying the other commands).
    Sample(SampleArgs),
    /// Estimate base prices and transitions per entity.
    BasePrice(BasePriceArgs),
    /// Cluster promotional discount depths into named bins.
    PromoBins(PromoBinsArgs),
    /// Build the modeling table (category metrics, RPI, outliers, smoothing).
    Aggregate(AggregateArgs),
    /// Fit elasticity models with k-fold cross-validation.
    Fit(FitArgs),
    /// Simulate demand and revenue curves from saved fits.
    Simulate(SimulateArgs),
    /// Run every stage and write every artifact into a directory.
    Run(RunArgs),
}

/// Input file and the filters applied before any stage runs.
#[derive(Debug, Args, Clone)]
pub struct InputArgs {
    /// Transaction CSV.
    #[arg(short = 'f', long, value_name = "CSV")]
    pub file: PathBuf,

    /// Keep only transactions on or after this date (YYYY-MM-DD).
    #[arg(long)]
    pub start: Option<NaiveDate>,

    /// Keep only transactions on or before this date (YYYY-MM-DD).
    #[arg(long)]
    pub end: Option<NaiveDate>,

    /// Which column supplies volume when both `Volume` and `VolumeUnits` exist.
    #[arg(long, value_enum)]
    pub volume_column: Option<VolumeColumn>,
}

#[derive(Debug, Args, Clone)]
pub struct SampleArgs {
    /// Output CSV.
    #[arg(short = 'o', long, default_value = "sample_transactions.csv")]
    pub out: PathBuf,

    /// Number of weeks to generate.
    #[arg(long, default_value_t = 104)]
    pub weeks: usize,

    /// Random seed.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Probability that a week is on promotion.
    #[arg(long, default_value_t = 0.15)]
    pub promo_probability: f64,
}

#[derive(Debug, Args, Clone)]
pub struct BasePriceArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Recompute and overwrite any supplied `BasePrice` values.
    #[arg(long)]
    pub force: bool,

    /// Only estimate entities that have weeks without a `BasePrice`.
    #[arg(long, conflicts_with = "force")]
    pub fill_missing: bool,

    /// Rolling window `W` (weeks).
    #[arg(long)]
    pub window: Option<usize>,

    /// Forward validation window `V` (weeks).
    #[arg(long)]
    pub validation_window: Option<usize>,

    /// Export the base-price table to CSV.
    #[arg(long)]
    pub export: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct PromoBinsArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Dimension that completes the combo key.
    #[arg(long, value_enum)]
    pub aggregator: Option<Dimension>,

    /// Fixed number of clusters (otherwise the elbow recommendation).
    #[arg(long)]
    pub k: Option<usize>,

    /// Export bins (`.json` writes JSON, anything else CSV).
    #[arg(long)]
    pub export: Option<PathBuf>,
}

/// Aggregation overrides shared by `aggregate` and `fit`.
#[derive(Debug, Args, Clone, Default)]
pub struct AggregationArgs {
    /// Group dimensions (comma-separated, at most three).
    #[arg(long, value_enum, value_delimiter = ',')]
    pub group: Vec<Dimension>,

    /// Competitor pivot dimensions (one or two, subset of --group).
    #[arg(long, value_enum, value_delimiter = ',')]
    pub pivot: Vec<Dimension>,

    /// Disable Kalman smoothing of the volume target.
    #[arg(long)]
    pub no_smoothing: bool,

    /// Model the share of category volume instead of raw volume.
    #[arg(long)]
    pub ratio: bool,

    /// Run once per group dimension instead of on the combined grouping.
    #[arg(long)]
    pub per_dimension: bool,
}

#[derive(Debug, Args, Clone)]
pub struct AggregateArgs {
    #[command(flatten)]
    pub input: InputArgs,

    #[command(flatten)]
    pub aggregation: AggregationArgs,

    /// Export the modeling table to CSV (per-dimension runs add a suffix).
    #[arg(long)]
    pub export: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct FitArgs {
    #[command(flatten)]
    pub input: InputArgs,

    #[command(flatten)]
    pub aggregation: AggregationArgs,

    /// Models to fit (comma-separated; default: all).
    #[arg(long, value_enum, value_delimiter = ',')]
    pub models: Vec<ModelKind>,

    /// Predictors (`*_RPI` expands to every competitor column).
    #[arg(long, value_delimiter = ',')]
    pub predictors: Vec<String>,

    /// Number of cross-validation folds.
    #[arg(long)]
    pub folds: Option<usize>,

    /// Predictors to standardize inside each training fold.
    #[arg(long, value_delimiter = ',')]
    pub standardize: Vec<String>,

    /// Drop rows flagged as outliers before fitting.
    #[arg(long)]
    pub exclude_outliers: bool,

    /// Export fitted rows to CSV.
    #[arg(long)]
    pub export: Option<PathBuf>,

    /// Export fitted rows to JSON (input of `rgm simulate`).
    #[arg(long = "export-json")]
    pub export_json: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct SimulateArgs {
    /// Fits JSON produced by `rgm fit --export-json`.
    #[arg(long, value_name = "JSON")]
    pub fits: PathBuf,

    /// Row index in the fits file (default: best model of the first group).
    #[arg(long)]
    pub row: Option<usize>,

    /// How competitor prices behave while own price moves.
    #[arg(long, value_enum)]
    pub policy: Option<CompetitorPolicyKind>,

    /// Number of curve samples.
    #[arg(long)]
    pub samples: Option<usize>,

    /// Own price for scenarios (default: the fitted mean PPU).
    #[arg(long)]
    pub price: Option<f64>,

    /// Promo bins (CSV or JSON) to evaluate as discount scenarios.
    #[arg(long)]
    pub bins: Option<PathBuf>,

    /// Competitor price override, e.g. `B_RPI=7.5` (repeatable).
    #[arg(long = "competitor", value_parser = parse_override)]
    pub competitors: Vec<(String, f64)>,

    /// Sample a cross-price curve for this RPI column (±50% around its implied price).
    #[arg(long)]
    pub cross: Option<String>,

    /// Export the demand curve to CSV.
    #[arg(long)]
    pub export: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Directory that receives every artifact.
    #[arg(long, default_value = "rgm-out")]
    pub out_dir: PathBuf,

    /// Recompute base prices even where they were supplied.
    #[arg(long)]
    pub force: bool,
}

/// Parse `NAME=PRICE`.
fn parse_override(s: &str) -> Result<(String, f64), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=PRICE, got `{s}`"))?;
    let price: f64 = value
        .trim()
        .parse()
        .map_err(|e| format!("invalid price `{value}`: {e}"))?;
    Ok((name.trim().to_string(), price))
}
