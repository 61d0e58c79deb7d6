//! Demand curve reconstruction from one fitted model row.
//!
//! With every non-price predictor at its group mean, predicted volume is
//! affine in own price:
//!
//! ```text
//! original policy:    Q(P) = [B0 + Σ β·mean (incl. RPI)]        + β_PPU · P
//! competitor policy:  Q(P) = [B0 + Σ β·mean (excl. RPI)]        + (β_PPU + Σ β_RPI / P_comp) · P
//! ```
//!
//! where `P_comp = mean(PPU) / mean(RPI)` is held fixed under the competitor
//! policy. Both lines pass through the fitted `Q̂` at the mean price.

use serde::Serialize;
use thiserror::Error;

use crate::domain::{COL_PPU, CompetitorPolicyKind, CurvePoint, FittedModelRow, is_rpi_column};
use crate::fit::elasticity::{implied_competitor_price, own_price_derivative, point_elasticity};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScenarioError {
    #[error("model has no PPU coefficient")]
    MissingPrice,
    #[error("mean price is not usable ({0})")]
    InvalidMeanPrice(f64),
    #[error("demand does not fall with price (slope {0})")]
    NonNegativeSlope(f64),
    #[error("volume at zero price is not positive ({0})")]
    NonPositiveIntercept(f64),
    #[error("unknown competitor column `{0}`")]
    UnknownCompetitor(String),
    #[error("competitor price must be positive (got {0})")]
    InvalidCompetitorPrice(f64),
    #[error("need at least 2 curve samples (got {0})")]
    TooFewSamples(usize),
}

/// One competitor RPI term of the fitted model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompetitorTerm {
    pub column: String,
    pub beta: f64,
    pub mean_rpi: f64,
    /// Implied absolute competitor price; `None` when the competitor is absent.
    pub price: Option<f64>,
}

impl CompetitorTerm {
    /// Name without the `_RPI` suffix.
    pub fn competitor(&self) -> &str {
        self.column.strip_suffix(crate::domain::RPI_SUFFIX).unwrap_or(&self.column)
    }
}

/// Affine demand line `Q(P) = intercept + slope · P` under a competitor policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DemandModel {
    pub policy: CompetitorPolicyKind,
    pub intercept: f64,
    pub slope: f64,
    pub beta_ppu: f64,
    pub mean_ppu: f64,
    /// `B0 + Σ β·mean` over every predictor that is neither PPU nor RPI.
    pub base_volume: f64,
    pub competitors: Vec<CompetitorTerm>,
    /// `dQ/dP` with competitor prices fixed; drives every elasticity.
    pub dq_dp: f64,
}

impl DemandModel {
    pub fn from_row(row: &FittedModelRow, policy: CompetitorPolicyKind) -> Result<Self, ScenarioError> {
        let beta_ppu = row.beta(COL_PPU).ok_or(ScenarioError::MissingPrice)?;
        let mean_ppu = crate::fit::fitter::row_mean_ppu(row);
        if !(mean_ppu.is_finite() && mean_ppu > 0.0) {
            return Err(ScenarioError::InvalidMeanPrice(mean_ppu));
        }

        let base_volume = row.intercept
            + row
                .coefficients
                .iter()
                .filter(|c| c.predictor != COL_PPU && !is_rpi_column(&c.predictor))
                .map(|c| c.beta * c.mean)
                .sum::<f64>();
        let competitors: Vec<CompetitorTerm> = row
            .coefficients
            .iter()
            .filter(|c| is_rpi_column(&c.predictor))
            .map(|c| CompetitorTerm {
                column: c.predictor.clone(),
                beta: c.beta,
                mean_rpi: c.mean,
                price: implied_competitor_price(mean_ppu, c.mean),
            })
            .collect();

        let rpi_terms: Vec<(f64, f64)> = competitors.iter().filter_map(|c| c.price.map(|p| (c.beta, p))).collect();
        let dq_dp = own_price_derivative(beta_ppu, &rpi_terms);
        let rpi_at_means: f64 = competitors.iter().map(|c| c.beta * c.mean_rpi).sum();

        let (intercept, slope) = match policy {
            CompetitorPolicyKind::Original => (base_volume + rpi_at_means, beta_ppu),
            CompetitorPolicyKind::Competitor => {
                // Absent competitors keep their (zero) ratio as a constant.
                let fixed: f64 = competitors.iter().filter(|c| c.price.is_none()).map(|c| c.beta * c.mean_rpi).sum();
                (base_volume + fixed, dq_dp)
            }
        };

        if !(slope.is_finite() && slope < 0.0) {
            return Err(ScenarioError::NonNegativeSlope(slope));
        }
        if !(intercept.is_finite() && intercept > 0.0) {
            return Err(ScenarioError::NonPositiveIntercept(intercept));
        }

        Ok(Self {
            policy,
            intercept,
            slope,
            beta_ppu,
            mean_ppu,
            base_volume,
            competitors,
            dq_dp,
        })
    }

    /// Price at which predicted volume reaches zero.
    pub fn zero_volume_price(&self) -> f64 {
        -self.intercept / self.slope
    }

    /// Predicted volume at own price `price`, floored at zero.
    pub fn volume_at(&self, price: f64) -> f64 {
        (self.intercept + self.slope * price).max(0.0)
    }

    pub fn price_at(&self, volume: f64) -> f64 {
        (volume - self.intercept) / self.slope
    }

    pub fn elasticity_at(&self, price: f64) -> f64 {
        point_elasticity(self.dq_dp, price, self.volume_at(price))
    }

    pub fn point(&self, price: f64) -> CurvePoint {
        let volume = self.volume_at(price);
        CurvePoint {
            price,
            volume,
            revenue: price * volume,
            elasticity: self.elasticity_at(price),
        }
    }

    /// Sample `samples` volumes evenly over `[0, Q(0)]` and invert to price.
    ///
    /// Points are returned in ascending price order.
    pub fn curve(&self, samples: usize) -> Result<Vec<CurvePoint>, ScenarioError> {
        if samples < 2 {
            return Err(ScenarioError::TooFewSamples(samples));
        }
        let step = self.intercept / (samples - 1) as f64;
        let mut points: Vec<CurvePoint> = (0..samples)
            .map(|i| {
                let volume = step * i as f64;
                let price = self.price_at(volume).max(0.0);
                CurvePoint {
                    price,
                    volume,
                    revenue: price * volume,
                    elasticity: point_elasticity(self.dq_dp, price, volume),
                }
            })
            .collect();
        points.reverse();
        Ok(points)
    }
}

/// Sampled revenue maximum; its accuracy depends on the sample density.
pub fn revenue_max(curve: &[CurvePoint]) -> Option<CurvePoint> {
    curve
        .iter()
        .copied()
        .filter(|p| p.revenue.is_finite())
        .max_by(|a, b| a.revenue.total_cmp(&b.revenue))
}
