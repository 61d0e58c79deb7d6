//! Promo depth bins: construction from cluster centers and row assignment.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::{ComboKey, Dimension, PromoBin, WeeklyAggregate};
use crate::promo::kmeans::{ClusterError, KMeansOptions, Scaler1d, fit_kmeans};

/// Positive discount fractions per combo, in period order.
pub fn discounts_by_combo(rows: &[WeeklyAggregate], aggregator: Dimension) -> BTreeMap<ComboKey, Vec<f64>> {
    let mut out: BTreeMap<ComboKey, Vec<f64>> = BTreeMap::new();
    for row in rows {
        let combo = ComboKey::from_entity(&row.key, aggregator);
        let entry = out.entry(combo).or_default();
        if let Some(d) = row.discount().filter(|d| *d > 0.0) {
            entry.push(d);
        }
    }
    out
}

pub fn bin_name(cluster_id: usize, min_pct: f64, max_pct: f64) -> String {
    format!("Bin{cluster_id}: {min_pct:.0}-{max_pct:.0}%")
}

/// Cluster the positive discounts of one combo into `k` bins.
///
/// Centers are mapped back to the discount scale, clipped to `[0, 1]` and
/// sorted; adjacent bins meet at the midpoint of their centers, the first bin
/// starts at 0% and the last ends at 100%.
pub fn build_bins(combo: &ComboKey, discounts: &[f64], k: usize, opts: &KMeansOptions) -> Result<Vec<PromoBin>, ClusterError> {
    let positive: Vec<f64> = discounts.iter().copied().filter(|d| d.is_finite() && *d > 0.0).collect();
    if positive.is_empty() {
        return Err(ClusterError::Empty);
    }

    let scaler = Scaler1d::fit(&positive);
    let fit = fit_kmeans(&scaler.transform(&positive), k, opts)?;
    let mut centers: Vec<f64> = fit
        .centroids
        .iter()
        .map(|&z| scaler.inverse(z).clamp(0.0, 1.0))
        .collect();
    centers.sort_by(|a, b| a.total_cmp(b));

    let last = centers.len() - 1;
    let bins = centers
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            let min_pct = if i == 0 { 0.0 } else { (centers[i - 1] + c) / 2.0 * 100.0 };
            let max_pct = if i == last { 100.0 } else { (c + centers[i + 1]) / 2.0 * 100.0 };
            let cluster_id = i + 1;
            PromoBin {
                cluster_id,
                channel: combo.channel.clone(),
                brand: combo.brand.clone(),
                aggregator: combo.aggregator.clone(),
                ppg: combo.ppg.clone(),
                min_pct,
                max_pct,
                centroid_pct: c * 100.0,
                name: bin_name(cluster_id, min_pct, max_pct),
            }
        })
        .collect();
    Ok(bins)
}

/// First bin, in ascending centroid order, whose inclusive range holds `pct`.
///
/// Manually edited bins may overlap; the lower-centroid bin wins.
pub fn assign_bin(bins: &[PromoBin], pct: f64) -> Option<&PromoBin> {
    if !pct.is_finite() {
        return None;
    }
    let mut ordered: Vec<&PromoBin> = bins.iter().collect();
    ordered.sort_by(|a, b| {
        a.centroid_pct
            .total_cmp(&b.centroid_pct)
            .then(a.cluster_id.cmp(&b.cluster_id))
    });
    ordered.into_iter().find(|b| b.contains(pct))
}

/// Per-bin totals for one combo.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BinSummary {
    pub cluster_id: usize,
    pub name: String,
    pub centroid_pct: f64,
    pub periods: usize,
    pub mean_discount_pct: f64,
    pub volume: f64,
    pub sales_value: f64,
}

/// Aggregate rows of one combo by assigned bin. Full-price rows and rows
/// outside every bin are left out.
pub fn summarize_by_bin(rows: &[WeeklyAggregate], bins: &[PromoBin]) -> Vec<BinSummary> {
    let mut acc: BTreeMap<usize, (usize, f64, f64, f64)> = BTreeMap::new();
    for row in rows {
        let Some(d) = row.discount().filter(|d| *d > 0.0) else { continue };
        let Some(bin) = assign_bin(bins, d * 100.0) else { continue };
        let slot = acc.entry(bin.cluster_id).or_insert((0, 0.0, 0.0, 0.0));
        slot.0 += 1;
        slot.1 += d * 100.0;
        slot.2 += row.volume;
        slot.3 += row.sales_value;
    }

    bins.iter()
        .filter_map(|bin| {
            let &(periods, pct_sum, volume, sales_value) = acc.get(&bin.cluster_id)?;
            Some(BinSummary {
                cluster_id: bin.cluster_id,
                name: bin.name.clone(),
                centroid_pct: bin.centroid_pct,
                periods,
                mean_discount_pct: pct_sum / periods as f64,
                volume,
                sales_value,
            })
        })
        .collect()
}
