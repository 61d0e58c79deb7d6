//! Error types shared across the workbench.
//!
//! `AppError` covers everything that stops a batch (bad schema, empty input,
//! unusable configuration, IO). Every variant maps to a process exit code so
//! the `rgm` binary can report failures to scripts:
//!
//! - `2`: usage / schema / IO problems
//! - `3`: not enough data to do anything useful
//! - `4`: numeric or model failure
//!
//! Per-group problems are *not* errors at this level; they are recorded as
//! [`GroupWarning`]s and the batch continues.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Usage(String),

    #[error("Missing required column: `{0}`")]
    MissingColumn(String),

    #[error("{0}")]
    InsufficientData(String),

    #[error("{0}")]
    Numeric(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    pub fn insufficient(message: impl Into<String>) -> Self {
        Self::InsufficientData(message.into())
    }

    pub fn numeric(message: impl Into<String>) -> Self {
        Self::Numeric(message.into())
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Usage(_)
            | AppError::MissingColumn(_)
            | AppError::Config(_)
            | AppError::Io(_)
            | AppError::Csv(_)
            | AppError::Json(_) => 2,
            AppError::InsufficientData(_) => 3,
            AppError::Numeric(_) => 4,
        }
    }
}

impl From<crate::baseprice::BasePriceError> for AppError {
    fn from(err: crate::baseprice::BasePriceError) -> Self {
        use crate::baseprice::BasePriceError;
        match err {
            BasePriceError::InvalidWindow { .. } => AppError::Usage(err.to_string()),
            BasePriceError::TooShort { .. } => AppError::InsufficientData(err.to_string()),
        }
    }
}

/// Pipeline stage that produced a per-group warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    BasePrice,
    PromoBins,
    Outliers,
    Smoothing,
    Fitting,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::BasePrice => "base-price",
            Stage::PromoBins => "promo-bins",
            Stage::Outliers => "outliers",
            Stage::Smoothing => "smoothing",
            Stage::Fitting => "fitting",
        };
        f.write_str(name)
    }
}

/// A recoverable, per-group problem: the group is skipped (or lacks one derived
/// feature) and the rest of the batch proceeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupWarning {
    pub stage: Stage,
    pub group: String,
    pub message: String,
}

impl GroupWarning {
    pub fn new(stage: Stage, group: impl Into<String>, message: impl Into<String>) -> Self {
        let warning = Self {
            stage,
            group: group.into(),
            message: message.into(),
        };
        tracing::warn!(stage = %warning.stage, group = %warning.group, "{}", warning.message);
        warning
    }
}

impl fmt::Display for GroupWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.stage, self.group, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_categories() {
        assert_eq!(AppError::MissingColumn("Brand".into()).exit_code(), 2);
        assert_eq!(AppError::insufficient("empty").exit_code(), 3);
        assert_eq!(AppError::numeric("nan").exit_code(), 4);
    }

    #[test]
    fn zero_base_price_window_is_a_usage_error() {
        let params = crate::domain::BasePriceParams {
            window: 0,
            ..Default::default()
        };
        let err: AppError = crate::baseprice::estimate_base_price(&[10.0; 30], &params).unwrap_err().into();
        assert!(matches!(err, AppError::Usage(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn missing_column_message_names_column() {
        let err = AppError::MissingColumn("SalesValue".to_string());
        assert_eq!(err.to_string(), "Missing required column: `SalesValue`");
    }

    #[test]
    fn group_warning_display() {
        let w = GroupWarning::new(Stage::Outliers, "Grocery | A", "series too short");
        assert_eq!(w.to_string(), "[outliers] Grocery | A: series too short");
    }
}
