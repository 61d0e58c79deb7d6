//! Synthetic retail transaction generation.
//!
//! Produces a weekly panel with the features the workbench is meant to find:
//!
//! - shelf prices that step up once or twice over the horizon
//! - short promotional dips at a handful of discrete depths
//! - elastic own-price demand with a competitor (cross-price) effect
//! - yearly seasonality, a slow distribution (D1) build and log-normal noise

use chrono::{Duration, NaiveDate};
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};

use crate::domain::{EntityKey, TransactionRecord};
use crate::error::AppError;

/// Promo depths (fraction off shelf price) the generator draws from.
const PROMO_DEPTHS: [f64; 3] = [0.10, 0.20, 0.30];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleSpec {
    pub weeks: usize,
    pub seed: u64,
    /// Monday of the first week.
    pub start: NaiveDate,
    /// Probability that a given week is on promotion.
    pub promo_probability: f64,
    /// Log-normal volume noise.
    pub noise_sigma: f64,
}

impl Default for SampleSpec {
    fn default() -> Self {
        Self {
            weeks: 104,
            seed: 42,
            start: NaiveDate::from_ymd_opt(2023, 1, 2).unwrap_or_default(),
            promo_probability: 0.15,
            noise_sigma: 0.05,
        }
    }
}

/// Catalog entry: one product and its demand parameters.
struct Product {
    brand: &'static str,
    variant: &'static str,
    pack_type: &'static str,
    pack_size: &'static str,
    ppg: &'static str,
    shelf_price: f64,
    /// (week, multiplier) shelf-price steps.
    steps: &'static [(usize, f64)],
    base_volume: f64,
    own_elasticity: f64,
    cross_elasticity: f64,
}

const CATALOG: [Product; 4] = [
    Product {
        brand: "Alpha",
        variant: "Original",
        pack_type: "Bottle",
        pack_size: "500ml",
        ppg: "Alpha-500ml",
        shelf_price: 10.0,
        steps: &[(40, 1.10)],
        base_volume: 1200.0,
        own_elasticity: -2.0,
        cross_elasticity: 0.6,
    },
    Product {
        brand: "Alpha",
        variant: "Original",
        pack_type: "Bottle",
        pack_size: "1L",
        ppg: "Alpha-1L",
        shelf_price: 18.0,
        steps: &[(60, 1.08)],
        base_volume: 700.0,
        own_elasticity: -1.6,
        cross_elasticity: 0.4,
    },
    Product {
        brand: "Beta",
        variant: "Zero",
        pack_type: "Can",
        pack_size: "330ml",
        ppg: "Beta-330ml",
        shelf_price: 9.0,
        steps: &[(30, 1.07), (80, 1.06)],
        base_volume: 1500.0,
        own_elasticity: -2.4,
        cross_elasticity: 0.8,
    },
    Product {
        brand: "Gamma",
        variant: "Classic",
        pack_type: "Multipack",
        pack_size: "6x330ml",
        ppg: "Gamma-6pk",
        shelf_price: 24.0,
        steps: &[],
        base_volume: 400.0,
        own_elasticity: -1.3,
        cross_elasticity: 0.3,
    },
];

const CHANNELS: [(&str, f64, f64); 2] = [("Grocery", 1.0, 1.0), ("Convenience", 1.12, 0.35)];

fn shelf_price(product: &Product, week: usize) -> f64 {
    product
        .steps
        .iter()
        .filter(|(at, _)| week >= *at)
        .fold(product.shelf_price, |p, (_, m)| p * m)
}

/// Generate a transaction table (one row per channel × product × week).
pub fn generate_transactions(spec: &SampleSpec) -> Result<Vec<TransactionRecord>, AppError> {
    if spec.weeks == 0 {
        return Err(AppError::usage("Sample weeks must be > 0."));
    }
    if !(0.0..1.0).contains(&spec.promo_probability) {
        return Err(AppError::usage("Promo probability must be in [0, 1)."));
    }
    let mut rng = StdRng::seed_from_u64(spec.seed);
    let noise = Normal::new(0.0, spec.noise_sigma.max(0.0)).map_err(|e| AppError::numeric(format!("Noise distribution error: {e}")))?;

    let mut records = Vec::with_capacity(spec.weeks * CATALOG.len() * CHANNELS.len());
    for (channel, price_mult, volume_mult) in CHANNELS {
        // Prices first: demand depends on the competitor average.
        let prices: Vec<Vec<f64>> = CATALOG
            .iter()
            .map(|product| {
                (0..spec.weeks)
                    .map(|week| {
                        let shelf = shelf_price(product, week) * price_mult;
                        let jitter = 1.0 + rng.gen_range(-0.002..=0.002);
                        if rng.r#gen::<f64>() < spec.promo_probability {
                            let depth = PROMO_DEPTHS[rng.gen_range(0..PROMO_DEPTHS.len())];
                            shelf * (1.0 - depth)
                        } else {
                            shelf * jitter
                        }
                    })
                    .collect()
            })
            .collect();

        for (p, product) in CATALOG.iter().enumerate() {
            let key = EntityKey {
                channel: channel.to_string(),
                brand: product.brand.to_string(),
                variant: product.variant.to_string(),
                pack_type: product.pack_type.to_string(),
                pack_size: product.pack_size.to_string(),
                ppg: product.ppg.to_string(),
            };
            let reference = product.shelf_price * price_mult;

            for week in 0..spec.weeks {
                let price = prices[p][week];
                let competitor_index = CATALOG
                    .iter()
                    .enumerate()
                    .filter(|(q, other)| *q != p && other.brand != product.brand)
                    .map(|(q, other)| prices[q][week] / (other.shelf_price * price_mult))
                    .sum::<f64>()
                    / CATALOG.iter().filter(|other| other.brand != product.brand).count().max(1) as f64;
                let season = 1.0 + 0.15 * (2.0 * std::f64::consts::PI * week as f64 / 52.0).sin();
                let d1 = (0.6 + 0.3 * week as f64 / spec.weeks as f64).min(0.95);

                let volume = product.base_volume
                    * volume_mult
                    * (price / reference).powf(product.own_elasticity)
                    * competitor_index.powf(product.cross_elasticity)
                    * season
                    * (d1 / 0.75)
                    * noise.sample(&mut rng).exp();
                let volume = volume.round().max(0.0);

                records.push(TransactionRecord {
                    key: key.clone(),
                    date: spec.start + Duration::weeks(week as i64),
                    sales_value: (price * volume * 100.0).round() / 100.0,
                    volume,
                    price: None,
                    base_price: None,
                    d1: Some((d1 * 1000.0).round() / 1000.0),
                    extras: Default::default(),
                });
            }
        }
    }

    tracing::info!(rows = records.len(), weeks = spec.weeks, seed = spec.seed, "generated synthetic transactions");
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_sample() {
        let spec = SampleSpec {
            weeks: 20,
            ..SampleSpec::default()
        };
        let a = generate_transactions(&spec).unwrap();
        let b = generate_transactions(&spec).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 20 * CATALOG.len() * CHANNELS.len());
    }

    #[test]
    fn shelf_steps_compound() {
        let beta = &CATALOG[2];
        assert_eq!(shelf_price(beta, 0), 9.0);
        assert!((shelf_price(beta, 30) - 9.0 * 1.07).abs() < 1e-12);
        assert!((shelf_price(beta, 90) - 9.0 * 1.07 * 1.06).abs() < 1e-12);
    }

    #[test]
    fn promo_weeks_sit_below_shelf_price() {
        let spec = SampleSpec {
            weeks: 52,
            noise_sigma: 0.0,
            ..SampleSpec::default()
        };
        let records = generate_transactions(&spec).unwrap();
        let discounted = records
            .iter()
            .filter(|r| r.key.ppg == "Gamma-6pk" && r.key.channel == "Grocery" && r.volume > 0.0)
            .filter(|r| r.sales_value / r.volume < 24.0 * 0.95)
            .count();
        assert!(discounted > 0);
    }

    #[test]
    fn zero_weeks_is_rejected() {
        let spec = SampleSpec {
            weeks: 0,
            ..SampleSpec::default()
        };
        assert!(generate_transactions(&spec).is_err());
    }
}
