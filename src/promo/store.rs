//! Keyed store of promo bins with manual-edit tracking.
//!
//! Bins are generated per combo on first selection and then stay put: a later
//! selection with the same `k` returns the stored (possibly hand-edited) bins,
//! and only a different `k` regenerates them. Each combo keeps its own `k`
//! memo and edit flag.

use std::collections::{BTreeMap, BTreeSet};

use crate::domain::{ComboKey, PromoBin, PromoParams, SaveOutcome};
use crate::error::{GroupWarning, Stage};
use crate::promo::bins::build_bins;
use crate::promo::elbow::elbow_curve;
use crate::promo::kmeans::{ClusterError, KMeansOptions};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromoBinStore {
    bins: BTreeMap<ComboKey, Vec<PromoBin>>,
    last_k: BTreeMap<ComboKey, usize>,
    edited: BTreeSet<ComboKey>,
}

/// Outcome of the bulk "final save".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FinalSaveReport {
    pub generated: Vec<ComboKey>,
    pub kept: usize,
    pub warnings: Vec<GroupWarning>,
}

fn kmeans_options(params: &PromoParams) -> KMeansOptions {
    KMeansOptions {
        seed: params.seed,
        n_init: params.n_init,
        max_iter: params.max_iter,
        ..KMeansOptions::default()
    }
}

/// Resolve `k` (explicit or elbow) and build bins for one combo.
pub fn auto_bins(combo: &ComboKey, discounts: &[f64], k: Option<usize>, params: &PromoParams) -> Result<(usize, Vec<PromoBin>), ClusterError> {
    let positive: Vec<f64> = discounts.iter().copied().filter(|d| d.is_finite() && *d > 0.0).collect();
    let opts = kmeans_options(params);
    let k = match k {
        Some(k) => k,
        None => elbow_curve(&positive, params.max_k, &opts)?.recommended,
    };
    let bins = build_bins(combo, &positive, k, &opts)?;
    Ok((k, bins))
}

impl PromoBinStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from a flat bin table (e.g. a saved JSON/CSV export).
    ///
    /// Loaded combos count as curated: they are kept by `final_save` and are
    /// only regenerated when a different `k` is requested.
    pub fn from_bins(bins: Vec<PromoBin>) -> Self {
        let mut store = Self::default();
        for bin in bins {
            store.bins.entry(bin.combo()).or_insert_with(Vec::new).push(bin);
        }
        for (combo, bins) in store.bins.iter_mut() {
            bins.sort_by(|a, b| a.centroid_pct.total_cmp(&b.centroid_pct));
            store.last_k.insert(combo.clone(), bins.len());
        }
        store
    }

    pub fn get(&self, combo: &ComboKey) -> Option<&[PromoBin]> {
        self.bins.get(combo).map(Vec::as_slice)
    }

    pub fn contains(&self, combo: &ComboKey) -> bool {
        self.bins.contains_key(combo)
    }

    pub fn last_k(&self, combo: &ComboKey) -> Option<usize> {
        self.last_k.get(combo).copied()
    }

    pub fn is_edited(&self, combo: &ComboKey) -> bool {
        self.edited.contains(combo)
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Bins for an interactive selection of `combo`.
    ///
    /// Stored bins are returned as-is when the resolved `k` matches the memo;
    /// otherwise bins are regenerated and any manual edits for the combo are
    /// discarded.
    pub fn select(&mut self, combo: &ComboKey, discounts: &[f64], k: Option<usize>, params: &PromoParams) -> Result<&[PromoBin], ClusterError> {
        let requested = k.or(params.k);
        let reuse = match (requested, self.last_k.get(combo)) {
            (Some(k), Some(&memo)) => k == memo && self.bins.contains_key(combo),
            (None, Some(_)) => self.bins.contains_key(combo),
            _ => false,
        };

        if !reuse {
            let (k, bins) = auto_bins(combo, discounts, requested, params)?;
            tracing::debug!(combo = %combo, k, "generated promo bins");
            self.bins.insert(combo.clone(), bins);
            self.last_k.insert(combo.clone(), k);
            self.edited.remove(combo);
        }
        Ok(self.get(combo).unwrap_or(&[]))
    }

    /// Store bins for `combo`. Existing bins are only replaced with `force`.
    pub fn insert(&mut self, combo: ComboKey, bins: Vec<PromoBin>, force: bool) -> SaveOutcome {
        let existed = self.bins.contains_key(&combo);
        if existed && !force {
            return SaveOutcome::Kept;
        }
        self.last_k.insert(combo.clone(), bins.len());
        self.edited.remove(&combo);
        self.bins.insert(combo, bins);
        if existed { SaveOutcome::Replaced } else { SaveOutcome::Inserted }
    }

    pub fn rename(&mut self, combo: &ComboKey, cluster_id: usize, name: impl Into<String>) -> bool {
        let Some(bin) = self.bin_mut(combo, cluster_id) else {
            return false;
        };
        bin.name = name.into();
        self.edited.insert(combo.clone());
        true
    }

    /// Overwrite a bin's range. Overlap with neighbours is not re-validated.
    pub fn edit_bounds(&mut self, combo: &ComboKey, cluster_id: usize, min_pct: f64, max_pct: f64) -> bool {
        if !(min_pct.is_finite() && max_pct.is_finite()) || min_pct > max_pct {
            return false;
        }
        let Some(bin) = self.bin_mut(combo, cluster_id) else {
            return false;
        };
        bin.min_pct = min_pct;
        bin.max_pct = max_pct;
        self.edited.insert(combo.clone());
        true
    }

    fn bin_mut(&mut self, combo: &ComboKey, cluster_id: usize) -> Option<&mut PromoBin> {
        self.bins
            .get_mut(combo)?
            .iter_mut()
            .find(|b| b.cluster_id == cluster_id)
    }

    /// Generate bins with standard defaults for every combo not yet stored.
    pub fn final_save(&mut self, discounts: &BTreeMap<ComboKey, Vec<f64>>) -> FinalSaveReport {
        let defaults = PromoParams::default();
        let mut report = FinalSaveReport::default();
        for (combo, values) in discounts {
            if self.contains(combo) {
                report.kept += 1;
                continue;
            }
            match auto_bins(combo, values, None, &defaults) {
                Ok((k, bins)) => {
                    self.bins.insert(combo.clone(), bins);
                    self.last_k.insert(combo.clone(), k);
                    report.generated.push(combo.clone());
                }
                Err(e) => report
                    .warnings
                    .push(GroupWarning::new(Stage::PromoBins, combo.to_string(), e.to_string())),
            }
        }
        tracing::info!(
            generated = report.generated.len(),
            kept = report.kept,
            skipped = report.warnings.len(),
            "promo bins final save"
        );
        report
    }

    /// Flat bin table ordered by combo, then centroid.
    pub fn all_bins(&self) -> Vec<PromoBin> {
        self.bins.values().flat_map(|b| b.iter().cloned()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn combo(brand: &str) -> ComboKey {
        ComboKey {
            channel: "Grocery".into(),
            brand: brand.into(),
            aggregator: "Bottle".into(),
            ppg: "P1".into(),
        }
    }

    fn discounts() -> Vec<f64> {
        let mut d = Vec::new();
        for level in [0.10, 0.30, 0.50] {
            for j in 0..6 {
                d.push(level + 0.002 * j as f64);
            }
        }
        d
    }

    #[test]
    fn edits_survive_reselection_with_same_k() {
        let mut store = PromoBinStore::new();
        let params = PromoParams::default();
        let a = combo("A");
        store.select(&a, &discounts(), Some(3), &params).unwrap();
        assert!(store.rename(&a, 1, "Shallow"));
        assert!(store.edit_bounds(&a, 2, 15.0, 45.0));

        let bins = store.select(&a, &discounts(), Some(3), &params).unwrap();
        assert_eq!(bins[0].name, "Shallow");
        assert_eq!(bins[1].min_pct, 15.0);
        assert!(store.is_edited(&a));
    }

    #[test]
    fn changing_k_regenerates_and_clears_edits() {
        let mut store = PromoBinStore::new();
        let params = PromoParams::default();
        let a = combo("A");
        store.select(&a, &discounts(), Some(3), &params).unwrap();
        store.rename(&a, 1, "Shallow");

        let bins = store.select(&a, &discounts(), Some(2), &params).unwrap();
        assert_eq!(bins.len(), 2);
        assert!(bins[0].name.starts_with("Bin1"));
        assert!(!store.is_edited(&a));
        assert_eq!(store.last_k(&a), Some(2));
    }

    #[test]
    fn combos_do_not_share_edit_state() {
        let mut store = PromoBinStore::new();
        let params = PromoParams::default();
        store.select(&combo("A"), &discounts(), Some(3), &params).unwrap();
        store.select(&combo("B"), &discounts(), Some(3), &params).unwrap();
        store.rename(&combo("A"), 1, "Shallow");

        assert!(store.is_edited(&combo("A")));
        assert!(!store.is_edited(&combo("B")));
        assert!(store.get(&combo("B")).unwrap()[0].name.starts_with("Bin1"));
    }

    #[test]
    fn final_save_leaves_curated_combos_alone() {
        let mut store = PromoBinStore::new();
        let params = PromoParams::default();
        store.select(&combo("A"), &discounts(), Some(2), &params).unwrap();
        store.rename(&combo("A"), 1, "Curated");

        let mut all = BTreeMap::new();
        all.insert(combo("A"), discounts());
        all.insert(combo("B"), discounts());
        all.insert(combo("C"), vec![0.0, 0.0]);
        let report = store.final_save(&all);

        assert_eq!(report.generated, vec![combo("B")]);
        assert_eq!(report.kept, 1);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(store.get(&combo("A")).unwrap()[0].name, "Curated");
        assert_eq!(store.get(&combo("B")).unwrap().len(), 3);
    }

    #[test]
    fn insert_requires_force_to_overwrite() {
        let mut store = PromoBinStore::new();
        let (_, bins) = auto_bins(&combo("A"), &discounts(), Some(3), &PromoParams::default()).unwrap();
        assert_eq!(store.insert(combo("A"), bins.clone(), false), SaveOutcome::Inserted);
        assert_eq!(store.insert(combo("A"), bins.clone(), false), SaveOutcome::Kept);
        assert_eq!(store.insert(combo("A"), bins, true), SaveOutcome::Replaced);
    }

    #[test]
    fn flat_table_round_trips_through_from_bins() {
        let mut store = PromoBinStore::new();
        store.select(&combo("A"), &discounts(), Some(3), &PromoParams::default()).unwrap();
        let rebuilt = PromoBinStore::from_bins(store.all_bins());
        assert_eq!(rebuilt.get(&combo("A")), store.get(&combo("A")));
        assert_eq!(rebuilt.last_k(&combo("A")), Some(3));
    }
}
