//! Scenario simulation from fitted model rows.
//!
//! - `demand`: affine demand line per competitor policy, curves, revenue max
//! - `scenarios`: promo-bin, competitor what-if and cross-price scenarios

pub mod demand;
pub mod scenarios;

pub use demand::{CompetitorTerm, DemandModel, ScenarioError, revenue_max};
pub use scenarios::{CompetitorWhatIf, CrossPricePoint, PromoScenario, bins_for_group, competitor_what_if, cross_elasticity, cross_price_curve, promo_bin_scenarios};
