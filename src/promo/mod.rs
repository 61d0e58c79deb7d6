//! Promotional depth clustering.
//!
//! Discounts below base price are clustered per combo (channel, brand,
//! aggregator value, PPG) into a handful of named bins:
//!
//! - `kmeans`: seeded 1-D K-means
//! - `elbow`: inertia curve + knee detection for the default `k`
//! - `bins`: center → bin-range construction, assignment and summaries
//! - `store`: per-combo bin store with manual edits and bulk final save

pub mod bins;
pub mod elbow;
pub mod kmeans;
pub mod store;

pub use bins::{BinSummary, assign_bin, bin_name, build_bins, discounts_by_combo, summarize_by_bin};
pub use elbow::{ElbowCurve, elbow_curve, find_elbow_k};
pub use kmeans::{ClusterError, KMeans1d, KMeansOptions, Scaler1d, fit_kmeans};
pub use store::{FinalSaveReport, PromoBinStore, auto_bins};
