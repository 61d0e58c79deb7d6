//! What-if scenarios on top of a [`DemandModel`].

use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::{CurvePoint, GroupKey, PromoBin};
use crate::simulate::demand::{DemandModel, ScenarioError};

/// Outcome of applying one promo bin's centroid discount.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromoScenario {
    #[serde(rename = "ClusterID")]
    pub cluster_id: usize,
    #[serde(rename = "ClusterName")]
    pub name: String,
    #[serde(rename = "Centroid")]
    pub discount_pct: f64,
    #[serde(flatten)]
    pub point: CurvePoint,
}

/// Evaluate every bin at `price × (1 − centroid/100)`.
pub fn promo_bin_scenarios(model: &DemandModel, price: f64, bins: &[PromoBin]) -> Vec<PromoScenario> {
    bins.iter()
        .map(|bin| PromoScenario {
            cluster_id: bin.cluster_id,
            name: bin.name.clone(),
            discount_pct: bin.centroid_pct,
            point: model.point(price * (1.0 - bin.centroid_pct / 100.0)),
        })
        .collect()
}

/// Bins of the first combo (in key order) that belongs to `group`: same
/// channel, and the combo's brand or PPG is one of the group's values.
pub fn bins_for_group(bins: &[PromoBin], group: &GroupKey) -> Vec<PromoBin> {
    let matches = |b: &PromoBin| b.channel == group.channel && group.values.iter().any(|v| *v == b.brand || *v == b.ppg);
    let Some(combo) = bins.iter().filter(|b| matches(b)).map(PromoBin::combo).min() else {
        return Vec::new();
    };
    let mut out: Vec<PromoBin> = bins.iter().filter(|b| b.combo() == combo).cloned().collect();
    out.sort_by_key(|b| b.cluster_id);
    out
}

/// Volume at own price `own_price` with some competitor prices overridden.
///
/// Competitors without an override keep their mean RPI.
fn volume_with_competitors(model: &DemandModel, own_price: f64, overrides: &BTreeMap<String, f64>) -> f64 {
    let rpi: f64 = model
        .competitors
        .iter()
        .map(|c| {
            let ratio = match overrides.get(&c.column) {
                Some(&p) => own_price / p,
                None => c.mean_rpi,
            };
            c.beta * ratio
        })
        .sum();
    (model.base_volume + model.beta_ppu * own_price + rpi).max(0.0)
}

fn check_overrides(model: &DemandModel, overrides: &BTreeMap<String, f64>) -> Result<(), ScenarioError> {
    for (column, &price) in overrides {
        if !model.competitors.iter().any(|c| &c.column == column) {
            return Err(ScenarioError::UnknownCompetitor(column.clone()));
        }
        if !(price.is_finite() && price > 0.0) {
            return Err(ScenarioError::InvalidCompetitorPrice(price));
        }
    }
    Ok(())
}

/// Cross-elasticity `−β_RPI × (P_own/P_comp) / Q`.
///
/// Positive means the competitor is a substitute.
pub fn cross_elasticity(beta_rpi: f64, own_price: f64, competitor_price: f64, volume: f64) -> f64 {
    if !(volume.is_finite() && volume > 0.0) || !(competitor_price.is_finite() && competitor_price > 0.0) {
        return f64::NAN;
    }
    -beta_rpi * (own_price / competitor_price) / volume
}

/// Baseline vs. new competitor prices at a fixed own price.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompetitorWhatIf {
    pub own_price: f64,
    pub baseline_volume: f64,
    pub scenario_volume: f64,
    pub volume_delta: f64,
    pub baseline_revenue: f64,
    pub scenario_revenue: f64,
    pub revenue_delta: f64,
    /// Cross-elasticity per overridden competitor, evaluated at the new price.
    pub cross_elasticities: BTreeMap<String, f64>,
}

pub fn competitor_what_if(model: &DemandModel, own_price: f64, overrides: &BTreeMap<String, f64>) -> Result<CompetitorWhatIf, ScenarioError> {
    check_overrides(model, overrides)?;

    let baseline_volume = volume_with_competitors(model, own_price, &BTreeMap::new());
    let scenario_volume = volume_with_competitors(model, own_price, overrides);
    let cross_elasticities = model
        .competitors
        .iter()
        .filter_map(|c| {
            overrides
                .get(&c.column)
                .map(|&p| (c.column.clone(), cross_elasticity(c.beta, own_price, p, scenario_volume)))
        })
        .collect();

    Ok(CompetitorWhatIf {
        own_price,
        baseline_volume,
        scenario_volume,
        volume_delta: scenario_volume - baseline_volume,
        baseline_revenue: own_price * baseline_volume,
        scenario_revenue: own_price * scenario_volume,
        revenue_delta: own_price * (scenario_volume - baseline_volume),
        cross_elasticities,
    })
}

/// One sample of a cross-price curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CrossPricePoint {
    #[serde(rename = "CompetitorPrice")]
    pub competitor_price: f64,
    #[serde(rename = "Volume")]
    pub volume: f64,
    #[serde(rename = "Revenue")]
    pub revenue: f64,
    #[serde(rename = "CrossElasticity", with = "crate::domain::types::nan_as_null")]
    pub cross_elasticity: f64,
}

/// Vary one competitor's price over `[low, high]` with own price fixed.
pub fn cross_price_curve(model: &DemandModel, column: &str, own_price: f64, low: f64, high: f64, samples: usize) -> Result<Vec<CrossPricePoint>, ScenarioError> {
    if samples < 2 {
        return Err(ScenarioError::TooFewSamples(samples));
    }
    let term = model
        .competitors
        .iter()
        .find(|c| c.column == column)
        .ok_or_else(|| ScenarioError::UnknownCompetitor(column.to_string()))?;
    for bound in [low, high] {
        if !(bound.is_finite() && bound > 0.0) {
            return Err(ScenarioError::InvalidCompetitorPrice(bound));
        }
    }

    let step = (high - low) / (samples - 1) as f64;
    Ok((0..samples)
        .map(|i| {
            let competitor_price = low + step * i as f64;
            let overrides = BTreeMap::from([(column.to_string(), competitor_price)]);
            let volume = volume_with_competitors(model, own_price, &overrides);
            CrossPricePoint {
                competitor_price,
                volume,
                revenue: own_price * volume,
                cross_elasticity: cross_elasticity(term.beta, own_price, competitor_price, volume),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CompetitorPolicyKind;
    use crate::simulate::test_support::fitted_row;

    fn model() -> DemandModel {
        DemandModel::from_row(&fitted_row(), CompetitorPolicyKind::Original).unwrap()
    }

    fn bin(id: usize, centroid: f64) -> PromoBin {
        PromoBin {
            cluster_id: id,
            channel: "Grocery".into(),
            brand: "A".into(),
            aggregator: "Bottle".into(),
            ppg: "A-1".into(),
            min_pct: centroid - 5.0,
            max_pct: centroid + 5.0,
            centroid_pct: centroid,
            name: format!("Bin{id}"),
        }
    }

    #[test]
    fn promo_bins_discount_the_current_price() {
        // Q = 340 - 20 P; 10% off 10 → P = 9, Q = 160.
        let out = promo_bin_scenarios(&model(), 10.0, &[bin(1, 10.0), bin(2, 30.0)]);
        assert_eq!(out.len(), 2);
        assert!((out[0].point.price - 9.0).abs() < 1e-12);
        assert!((out[0].point.volume - 160.0).abs() < 1e-9);
        assert!((out[0].point.revenue - 1440.0).abs() < 1e-9);
        assert!(out[1].point.volume > out[0].point.volume);
    }

    #[test]
    fn competitor_price_rise_lifts_volume() {
        // Baseline P_comp = 8. Raising it to 10 moves the ratio 1.25 → 1.0:
        // ΔQ = -80 × (1.0 - 1.25) = +20.
        let m = model();
        let overrides = BTreeMap::from([("B_RPI".to_string(), 10.0)]);
        let out = competitor_what_if(&m, 10.0, &overrides).unwrap();
        assert!((out.baseline_volume - 140.0).abs() < 1e-9);
        assert!((out.volume_delta - 20.0).abs() < 1e-9);
        assert!((out.revenue_delta - 200.0).abs() < 1e-9);
        // −(−80) × 1.0 / 160 = 0.5: a substitute.
        assert!((out.cross_elasticities["B_RPI"] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn unknown_or_invalid_competitor_is_rejected() {
        let m = model();
        let unknown = BTreeMap::from([("Z_RPI".to_string(), 10.0)]);
        assert_eq!(competitor_what_if(&m, 10.0, &unknown), Err(ScenarioError::UnknownCompetitor("Z_RPI".into())));
        let zero = BTreeMap::from([("B_RPI".to_string(), 0.0)]);
        assert_eq!(competitor_what_if(&m, 10.0, &zero), Err(ScenarioError::InvalidCompetitorPrice(0.0)));
    }

    #[test]
    fn cross_price_curve_is_monotone_for_substitutes() {
        let curve = cross_price_curve(&model(), "B_RPI", 10.0, 6.0, 12.0, 7).unwrap();
        assert_eq!(curve.len(), 7);
        assert!((curve[2].competitor_price - 8.0).abs() < 1e-12);
        assert!((curve[2].volume - 140.0).abs() < 1e-9);
        assert!(curve.windows(2).all(|w| w[1].volume > w[0].volume));
        assert!(curve.iter().all(|p| p.cross_elasticity > 0.0));
    }

    #[test]
    fn bins_follow_the_group_channel_and_brand() {
        let mut other = bin(1, 15.0);
        other.channel = "Convenience".into();
        let bins = vec![bin(2, 30.0), other, bin(1, 10.0)];
        let group = GroupKey {
            channel: "Grocery".into(),
            values: vec!["A".into()],
        };
        let picked = bins_for_group(&bins, &group);
        assert_eq!(picked.iter().map(|b| b.cluster_id).collect::<Vec<_>>(), vec![1, 2]);
        assert!(picked.iter().all(|b| b.channel == "Grocery"));

        let unknown = GroupKey {
            channel: "Grocery".into(),
            values: vec!["Z".into()],
        };
        assert!(bins_for_group(&bins, &unknown).is_empty());
    }
}
