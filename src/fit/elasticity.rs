//! Elasticity metrics evaluated at the group means.
//!
//! With competitor prices held fixed, each RPI term contributes
//! `β_RPI · ∂(P/P_comp)/∂P = β_RPI / P_comp` to the own-price derivative, where
//! `P_comp = mean(PPU) / mean(RPI)`.

use crate::domain::{COL_PPU, Coefficient, is_rpi_column};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElasticityAtMeans {
    /// `Q̂` at the group means.
    pub predicted_volume: f64,
    pub dq_dp: f64,
    pub self_elasticity: f64,
    pub ppu: f64,
    pub csf: f64,
    pub mcv: f64,
    pub flagged: bool,
}

/// Competitor absolute price implied by mean own price and mean RPI.
///
/// `None` when the competitor is absent (RPI 0) or the inputs are unusable.
pub fn implied_competitor_price(mean_ppu: f64, mean_rpi: f64) -> Option<f64> {
    if mean_ppu.is_finite() && mean_rpi.is_finite() && mean_ppu > 0.0 && mean_rpi > 0.0 {
        Some(mean_ppu / mean_rpi)
    } else {
        None
    }
}

/// `dQ/dP` for own price `ppu` with competitor prices fixed.
///
/// `rpi_terms` are `(β_RPI, P_comp)` pairs.
pub fn own_price_derivative(beta_ppu: f64, rpi_terms: &[(f64, f64)]) -> f64 {
    beta_ppu
        + rpi_terms
            .iter()
            .filter(|(_, p)| p.is_finite() && *p > 0.0)
            .map(|(b, p)| b / p)
            .sum::<f64>()
}

/// Point elasticity `dQ/dP · P / Q`; NaN when `Q ≤ 0` or `P ≤ 0`.
pub fn point_elasticity(dq_dp: f64, price: f64, volume: f64) -> f64 {
    if !(volume.is_finite() && price.is_finite()) || volume <= 0.0 || price <= 0.0 {
        return f64::NAN;
    }
    dq_dp * price / volume
}

/// `CSF = 1 − 1/SE`, NaN when `SE` is zero or not finite.
pub fn csf(self_elasticity: f64) -> f64 {
    if self_elasticity.is_finite() && self_elasticity != 0.0 {
        1.0 - 1.0 / self_elasticity
    } else {
        f64::NAN
    }
}

/// Evaluate `Q̂`, self-elasticity, CSF and MCV at the group means.
pub fn elasticity_at_means(intercept: f64, coefficients: &[Coefficient], mean_ppu: f64, flag_threshold: f64) -> ElasticityAtMeans {
    let predicted_volume = intercept + coefficients.iter().map(|c| c.beta * c.mean).sum::<f64>();

    let beta_ppu = coefficients
        .iter()
        .find(|c| c.predictor == COL_PPU)
        .map(|c| c.beta)
        .unwrap_or(0.0);
    let rpi_terms: Vec<(f64, f64)> = coefficients
        .iter()
        .filter(|c| is_rpi_column(&c.predictor))
        .filter_map(|c| implied_competitor_price(mean_ppu, c.mean).map(|p| (c.beta, p)))
        .collect();

    let dq_dp = own_price_derivative(beta_ppu, &rpi_terms);
    let self_elasticity = point_elasticity(dq_dp, mean_ppu, predicted_volume);
    let share_factor = csf(self_elasticity);
    ElasticityAtMeans {
        predicted_volume,
        dq_dp,
        self_elasticity,
        ppu: mean_ppu,
        csf: share_factor,
        mcv: share_factor * mean_ppu,
        flagged: self_elasticity.is_finite() && self_elasticity.abs() > flag_threshold,
    }
}
