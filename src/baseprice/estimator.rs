//! Base-price state machine for a single entity.
//!
//! The estimator walks an ordered price series and keeps a piecewise-constant
//! "shelf price". The baseline only moves at *validated* transitions:
//!
//! - **up**: the price clears the up-threshold, at least `W` weeks have passed
//!   since the last transition, and the next `V` prices confirm the new level
//!   (half of them above the threshold and half within ±3% of the trigger price)
//! - **down**: the price falls below the down-threshold, the same spacing rule
//!   holds, and at least `required_stable` of the next `promo_window` prices stay
//!   within ±`tolerance_pct` of the trigger price (a promo dip does not)
//!
//! A transition takes effect at the triggering observation.

use thiserror::Error;

use crate::domain::BasePriceParams;
use crate::math::percentile;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BasePriceError {
    #[error("{observed} price observations, need at least {window}")]
    TooShort { observed: usize, window: usize },
    #[error("window and validation window must be at least 1 (got W={window}, V={validation_window})")]
    InvalidWindow { window: usize, validation_window: usize },
}

/// Per-week output of the estimator.
#[derive(Debug, Clone, PartialEq)]
pub struct BasePriceSeries {
    pub base: Vec<f64>,
    pub is_transition: Vec<bool>,
}

impl BasePriceSeries {
    pub fn transitions(&self) -> usize {
        self.is_transition.iter().filter(|&&t| t).count()
    }
}

/// Running state: the current baseline and where it last moved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BasePriceState {
    pub current: f64,
    pub last_transition: isize,
}

impl BasePriceState {
    /// Seed from the `percentile`-th percentile of the first `window` prices.
    pub fn initial(prices: &[f64], params: &BasePriceParams) -> Self {
        let window = params.window.min(prices.len());
        Self {
            current: percentile(&prices[..window], params.percentile),
            last_transition: -(params.window as isize),
        }
    }

    /// Advance to index `i`. Returns `true` when a transition fires there.
    pub fn step(&mut self, prices: &[f64], i: usize, params: &BasePriceParams) -> bool {
        let n = prices.len();
        let v = params.validation_window;
        if v == 0 || i + v >= n {
            return false;
        }

        let price = prices[i];
        let spaced = (i as isize - self.last_transition) >= params.window as isize;
        if !spaced {
            return false;
        }
        let future = &prices[i + 1..=i + v];
        let half = v as f64 / 2.0;

        let up_level = self.current * (1.0 + params.up_threshold_pct / 100.0);
        if price >= up_level {
            let above = future.iter().filter(|&&p| p >= up_level).count();
            let band = params.up_band_pct / 100.0 * price;
            let stable = future.iter().filter(|&&p| (p - price).abs() <= band).count();
            if above as f64 >= half && stable as f64 >= half {
                self.current = percentile(future, params.percentile).max(price);
                self.last_transition = i as isize;
                return true;
            }
        }

        let down_level = self.current * (1.0 - params.down_threshold_pct / 100.0);
        if price <= down_level {
            let end = (i + 1 + params.promo_window).min(n);
            let band = params.tolerance_pct / 100.0 * price;
            let stable = prices[i + 1..end]
                .iter()
                .filter(|&&p| (p - price).abs() <= band)
                .count();
            if stable >= params.required_stable {
                self.current = percentile(future, params.percentile).min(price);
                self.last_transition = i as isize;
                return true;
            }
        }

        false
    }
}

/// Estimate the base price for an ordered price series.
pub fn estimate_base_price(prices: &[f64], params: &BasePriceParams) -> Result<BasePriceSeries, BasePriceError> {
    if params.window == 0 || params.validation_window == 0 {
        return Err(BasePriceError::InvalidWindow {
            window: params.window,
            validation_window: params.validation_window,
        });
    }
    if prices.is_empty() || prices.len() < params.window {
        return Err(BasePriceError::TooShort {
            observed: prices.len(),
            window: params.window,
        });
    }

    let mut state = BasePriceState::initial(prices, params);
    let mut base = Vec::with_capacity(prices.len());
    let mut is_transition = Vec::with_capacity(prices.len());
    for i in 0..prices.len() {
        is_transition.push(state.step(prices, i, params));
        base.push(state.current);
    }

    Ok(BasePriceSeries { base, is_transition })
}
