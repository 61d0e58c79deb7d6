//! Shared workbench session used by every `rgm` subcommand.
//!
//! Keeping this in one place avoids duplicating the stage order:
//! transactions -> weekly aggregates -> base price -> promo bins -> modeling table -> fits
//!
//! Each stage's artifact is cached together with the parameters that produced
//! it. A stage is recomputed when it is missing, when its parameters changed or
//! when `force` is passed; changing the date range drops every cached artifact.
//! The promo-bin and saved-model stores are curated state and survive both.

use std::collections::BTreeMap;

use crate::aggregate::{AggregationRun, run_aggregation, run_per_dimension};
use crate::baseprice::{BasePriceRun, aggregate_weekly, apply_base_prices, fill_missing_base_prices};
use crate::config::WorkbenchConfig;
use crate::domain::{
    AggregationParams, BasePriceParams, ComboKey, DateRange, Dimension, FitParams, GroupKey, Granularity, SaveOutcome, TransactionRecord, WeeklyAggregate,
};
use crate::error::{AppError, GroupWarning};
use crate::fit::{BestModel, FitRun, SavedModelStore, best_by_group, fit_table};
use crate::io::ingest::IngestedData;
use crate::promo::{BinSummary, FinalSaveReport, PromoBinStore, discounts_by_combo, summarize_by_bin};

#[derive(Debug, Clone)]
pub struct Workbench {
    pub config: WorkbenchConfig,
    transactions: Vec<TransactionRecord>,
    price_supplied: bool,
    date_range: DateRange,
    weekly: Option<(Granularity, Vec<WeeklyAggregate>)>,
    base_price: Option<(BasePriceParams, BasePriceRun)>,
    modeling: Option<(AggregationParams, AggregationRun)>,
    fits: Option<(FitParams, FitRun)>,
    pub promo_bins: PromoBinStore,
    pub saved_models: SavedModelStore,
}

impl Workbench {
    pub fn new(data: IngestedData, config: WorkbenchConfig) -> Self {
        Self::from_records(data.records, data.price_supplied, config)
    }

    pub fn from_records(transactions: Vec<TransactionRecord>, price_supplied: bool, config: WorkbenchConfig) -> Self {
        Self {
            config,
            transactions,
            price_supplied,
            date_range: DateRange::ALL,
            weekly: None,
            base_price: None,
            modeling: None,
            fits: None,
            promo_bins: PromoBinStore::new(),
            saved_models: SavedModelStore::new(),
        }
    }

    pub fn date_range(&self) -> DateRange {
        self.date_range
    }

    /// Restrict every stage to `range`. A different range drops all cached
    /// artifacts.
    pub fn set_date_range(&mut self, range: DateRange) {
        if range != self.date_range {
            tracing::info!(start = ?range.start, end = ?range.end, "date range changed; cached stages invalidated");
            self.date_range = range;
            self.invalidate();
        }
    }

    pub fn invalidate(&mut self) {
        self.weekly = None;
        self.base_price = None;
        self.modeling = None;
        self.fits = None;
    }

    fn ensure_weekly(&mut self) -> Result<(), AppError> {
        let granularity = self.config.aggregation.granularity;
        if matches!(&self.weekly, Some((g, _)) if *g == granularity) {
            return Ok(());
        }
        let range = self.date_range;
        let filtered: Vec<TransactionRecord> = self.transactions.iter().filter(|r| range.contains(r.date)).cloned().collect();
        if filtered.is_empty() {
            return Err(AppError::insufficient("No transactions fall inside the selected date range."));
        }
        let rows = aggregate_weekly(&filtered, granularity);
        tracing::debug!(rows = rows.len(), "weekly aggregates built");
        self.weekly = Some((granularity, rows));
        self.base_price = None;
        self.modeling = None;
        self.fits = None;
        Ok(())
    }

    /// Weekly aggregates, with base prices once [`Workbench::base_prices`] ran.
    pub fn weekly(&mut self) -> Result<&[WeeklyAggregate], AppError> {
        self.ensure_weekly()?;
        Ok(self.weekly.as_ref().map(|(_, rows)| rows.as_slice()).unwrap_or(&[]))
    }

    /// Run (or reuse) the base-price stage.
    ///
    /// `force` recomputes the stage and overwrites supplied `BasePrice` values.
    pub fn base_prices(&mut self, force: bool) -> Result<&BasePriceRun, AppError> {
        let params = self.config.base_price.clone();
        let fresh = matches!(&self.base_price, Some((p, _)) if *p == params);
        if force || !fresh {
            if force || self.base_price.is_some() {
                // Rebuild from transactions so a previous pass's fills do not
                // look like supplied values.
                self.weekly = None;
            }
            self.ensure_weekly()?;
            let Some((_, rows)) = self.weekly.as_mut() else {
                return Err(AppError::insufficient("No weekly aggregates to estimate base prices on."));
            };
            let run = apply_base_prices(rows, &params, force);
            self.base_price = Some((params, run));
            self.modeling = None;
            self.fits = None;
        }
        self.base_price
            .as_ref()
            .map(|(_, run)| run)
            .ok_or_else(|| AppError::insufficient("Base-price stage produced no output."))
    }

    /// Bulk fill: estimate base prices only for entities that still have weeks
    /// without one. Supplied values and earlier fills are kept as they are.
    pub fn fill_missing_base_prices(&mut self) -> Result<&BasePriceRun, AppError> {
        let params = self.config.base_price.clone();
        self.ensure_weekly()?;
        let Some((_, rows)) = self.weekly.as_mut() else {
            return Err(AppError::insufficient("No weekly aggregates to estimate base prices on."));
        };
        let run = fill_missing_base_prices(rows, &params);
        self.base_price = Some((params, run));
        self.modeling = None;
        self.fits = None;
        self.base_price
            .as_ref()
            .map(|(_, run)| run)
            .ok_or_else(|| AppError::insufficient("Base-price stage produced no output."))
    }

    /// Discount fractions per combo for the configured aggregator.
    pub fn promo_discounts(&mut self) -> Result<BTreeMap<ComboKey, Vec<f64>>, AppError> {
        self.base_prices(false)?;
        let aggregator = self.config.promo.aggregator;
        Ok(discounts_by_combo(self.weekly()?, aggregator))
    }

    /// Interactive-style selection of one combo (reuses stored bins for the same k).
    pub fn select_promo_combo(&mut self, combo: &ComboKey, k: Option<usize>) -> Result<Vec<crate::domain::PromoBin>, AppError> {
        let discounts = self.promo_discounts()?;
        let values = discounts.get(combo).map(Vec::as_slice).unwrap_or(&[]);
        let params = self.config.promo.clone();
        self.promo_bins
            .select(combo, values, k, &params)
            .map(<[_]>::to_vec)
            .map_err(|e| AppError::insufficient(format!("{combo}: {e}")))
    }

    /// Bins for every combo: configured `k` (or elbow) for combos without
    /// stored bins, then the bulk final save for anything left.
    pub fn promo_bins(&mut self) -> Result<FinalSaveReport, AppError> {
        let discounts = self.promo_discounts()?;
        let params = self.config.promo.clone();
        let mut warnings = Vec::new();
        if params.k.is_some() {
            for (combo, values) in &discounts {
                if !self.promo_bins.contains(combo) {
                    if let Err(e) = self.promo_bins.select(combo, values, params.k, &params) {
                        warnings.push(GroupWarning::new(crate::error::Stage::PromoBins, combo.to_string(), e.to_string()));
                    }
                }
            }
        }
        let mut report = self.promo_bins.final_save(&discounts);
        report.warnings.extend(warnings);
        Ok(report)
    }

    /// Per-bin period counts, mean depth and totals for every combo with stored bins.
    pub fn promo_bin_summaries(&mut self) -> Result<Vec<(ComboKey, Vec<BinSummary>)>, AppError> {
        self.base_prices(false)?;
        let aggregator = self.config.promo.aggregator;
        let mut by_combo: BTreeMap<ComboKey, Vec<WeeklyAggregate>> = BTreeMap::new();
        for row in self.weekly()? {
            by_combo
                .entry(ComboKey::from_entity(&row.key, aggregator))
                .or_default()
                .push(row.clone());
        }
        Ok(by_combo
            .into_iter()
            .filter_map(|(combo, rows)| {
                let summary = summarize_by_bin(&rows, self.promo_bins.get(&combo)?);
                Some((combo, summary))
            })
            .collect())
    }

    /// Run (or reuse) the aggregation stage on base-price-augmented rows.
    pub fn modeling_table(&mut self, force: bool) -> Result<&AggregationRun, AppError> {
        let params = self.config.aggregation.clone();
        let fresh = matches!(&self.modeling, Some((p, _)) if *p == params);
        if force || !fresh {
            self.base_prices(false)?;
            let price_supplied = self.price_supplied;
            let run = run_aggregation(self.weekly()?, &params, price_supplied)?;
            self.modeling = Some((params, run));
            self.fits = None;
        }
        self.modeling
            .as_ref()
            .map(|(_, run)| run)
            .ok_or_else(|| AppError::insufficient("Aggregation produced no output."))
    }

    /// One modeling table per single group dimension.
    pub fn modeling_tables_per_dimension(&mut self) -> Result<Vec<(Dimension, AggregationRun)>, AppError> {
        self.base_prices(false)?;
        let params = self.config.aggregation.clone();
        let price_supplied = self.price_supplied;
        run_per_dimension(self.weekly()?, &params, price_supplied)
    }

    /// Run (or reuse) model fitting on the current modeling table.
    pub fn fit(&mut self, force: bool) -> Result<&FitRun, AppError> {
        let params = self.config.fitting.clone();
        let fresh = matches!(&self.fits, Some((p, _)) if *p == params);
        if force || !fresh {
            let table = &self.modeling_table(false)?.table;
            let run = fit_table(table, &params)?;
            self.fits = Some((params, run));
        }
        self.fits
            .as_ref()
            .map(|(_, run)| run)
            .ok_or_else(|| AppError::insufficient("Fitting produced no output."))
    }

    /// Copy the current fit rows into the saved-model store.
    pub fn save_fits(&mut self, force: bool) -> Result<usize, AppError> {
        let rows = self.fit(false)?.rows.clone();
        let mut saved = 0;
        for row in rows {
            if self.saved_models.insert(row, force) != SaveOutcome::Kept {
                saved += 1;
            }
        }
        tracing::info!(saved, total = self.saved_models.len(), "fitted models saved");
        Ok(saved)
    }

    /// Best model per group among the current fits.
    pub fn best_models(&mut self) -> Result<BTreeMap<GroupKey, BestModel>, AppError> {
        Ok(best_by_group(&self.fit(false)?.rows))
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::domain::{CompetitorPolicyKind, EntityKey, ModelKind};
    use crate::simulate::DemandModel;

    fn key(brand: &str) -> EntityKey {
        EntityKey {
            channel: "Grocery".into(),
            brand: brand.into(),
            variant: String::new(),
            pack_type: "Bottle".into(),
            pack_size: "500ml".into(),
            ppg: format!("{brand}-500ml"),
        }
    }

    fn monday(week: usize) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::weeks(week as i64)
    }

    /// Brand A steps 10 → 12 at week 10 (index 9); brand B sits at 8.
    fn step_transactions() -> Vec<TransactionRecord> {
        let mut out = Vec::new();
        for week in 0..20 {
            let price_a = if week < 9 { 10.0 } else { 12.0 };
            let d1 = 0.7 + 0.01 * (week % 4) as f64;
            let volume_a = 100.0 + 5.0 * (week % 3) as f64;
            out.push(TransactionRecord {
                key: key("A"),
                date: monday(week),
                sales_value: price_a * volume_a,
                volume: volume_a,
                price: None,
                base_price: None,
                d1: Some(d1),
                extras: Default::default(),
            });
            let volume_b = 200.0 + 3.0 * (week % 5) as f64;
            out.push(TransactionRecord {
                key: key("B"),
                date: monday(week),
                sales_value: 8.0 * volume_b,
                volume: volume_b,
                price: None,
                base_price: None,
                d1: Some(0.9),
                extras: Default::default(),
            });
        }
        out
    }

    fn short_window_config() -> WorkbenchConfig {
        let mut config = WorkbenchConfig::default();
        config.base_price.window = 8;
        config.base_price.validation_window = 8;
        config
    }

    #[test]
    fn step_change_yields_one_transition_at_week_ten() {
        let mut wb = Workbench::from_records(step_transactions(), false, short_window_config());
        let run = wb.base_prices(false).unwrap().clone();
        assert_eq!(run.entities, 2);
        assert_eq!(run.transitions, 1);

        let rows = wb.weekly().unwrap();
        let a: Vec<&WeeklyAggregate> = rows.iter().filter(|r| r.key.brand == "A").collect();
        assert_eq!(a.len(), 20);
        for (i, r) in a.iter().enumerate() {
            let expected = if i < 9 { 10.0 } else { 12.0 };
            assert!((r.base_price.unwrap() - expected).abs() < 1e-9, "week {}", i + 1);
            assert_eq!(r.is_transition, i == 9);
        }
    }

    #[test]
    fn stages_are_cached_until_forced_or_range_changes() {
        let mut wb = Workbench::from_records(step_transactions(), false, short_window_config());
        let first = wb.modeling_table(false).unwrap().table.rows.len();
        assert_eq!(first, 40);

        // Same parameters: the cached table is returned.
        let again = wb.modeling_table(false).unwrap().table.rows.len();
        assert_eq!(again, first);

        wb.set_date_range(DateRange {
            start: Some(monday(10)),
            end: None,
        });
        assert!(wb.modeling.is_none());
        assert_eq!(wb.weekly().unwrap().len(), 20);

        wb.set_date_range(DateRange {
            start: Some(monday(30)),
            end: None,
        });
        assert_eq!(wb.weekly().unwrap_err().exit_code(), 3);
    }

    #[test]
    fn supplied_base_price_is_kept_unless_forced() {
        let mut tx = step_transactions();
        for r in tx.iter_mut().filter(|r| r.key.brand == "B") {
            r.base_price = Some(8.5);
        }
        let mut wb = Workbench::from_records(tx, false, short_window_config());
        wb.base_prices(false).unwrap();
        assert!(wb.weekly().unwrap().iter().filter(|r| r.key.brand == "B").all(|r| r.base_price == Some(8.5)));

        wb.base_prices(true).unwrap();
        assert!(
            wb.weekly()
                .unwrap()
                .iter()
                .filter(|r| r.key.brand == "B")
                .all(|r| (r.base_price.unwrap() - 8.0).abs() < 1e-9)
        );
    }

    #[test]
    fn fill_missing_only_touches_entities_without_base_price() {
        let mut tx = step_transactions();
        for r in tx.iter_mut().filter(|r| r.key.brand == "B") {
            r.base_price = Some(8.5);
        }
        let mut wb = Workbench::from_records(tx, false, short_window_config());

        let run = wb.fill_missing_base_prices().unwrap().clone();
        assert_eq!(run.entities, 2);
        assert_eq!(run.estimated, 1);
        assert_eq!(run.rows_written, 20);

        let rows = wb.weekly().unwrap();
        assert!(rows.iter().filter(|r| r.key.brand == "B").all(|r| r.base_price == Some(8.5)));
        for (i, r) in rows.iter().filter(|r| r.key.brand == "A").enumerate() {
            let expected = if i < 9 { 10.0 } else { 12.0 };
            assert!((r.base_price.unwrap() - expected).abs() < 1e-9, "week {}", i + 1);
        }

        // Everything is populated now: a second pass estimates nothing.
        assert_eq!(wb.fill_missing_base_prices().unwrap().estimated, 0);
    }

    #[test]
    fn modeling_table_carries_competitor_rpi() {
        let mut wb = Workbench::from_records(step_transactions(), false, short_window_config());
        let run = wb.modeling_table(false).unwrap();
        assert_eq!(run.table.rpi_columns, vec!["A_RPI", "B_RPI"]);
        for row in &run.table.rows {
            let own = format!("{}_RPI", row.group.values[0]);
            assert_eq!(row.rpi[&own], 0.0);
        }
        let a = run
            .table
            .rows
            .iter()
            .find(|r| r.group.values == ["A"] && r.period == monday(0))
            .unwrap();
        assert!((a.rpi["B_RPI"] - 10.0 / 8.0).abs() < 1e-9);
    }

    #[test]
    fn saved_models_respect_force() {
        let spec = crate::data::SampleSpec {
            weeks: 52,
            ..crate::data::SampleSpec::default()
        };
        let mut config = WorkbenchConfig::default();
        config.fitting.models = vec![ModelKind::Ols];
        config.fitting.folds = 3;
        let mut wb = Workbench::from_records(crate::data::generate_transactions(&spec).unwrap(), false, config);

        let first = wb.save_fits(false).unwrap();
        assert!(first > 0);
        assert_eq!(wb.save_fits(false).unwrap(), 0);
        assert_eq!(wb.save_fits(true).unwrap(), first);
    }

    #[test]
    fn sample_data_runs_end_to_end_and_simulator_matches_fitter() {
        let spec = crate::data::SampleSpec {
            weeks: 78,
            ..crate::data::SampleSpec::default()
        };
        let records = crate::data::generate_transactions(&spec).unwrap();
        let mut config = WorkbenchConfig::default();
        config.fitting.models = vec![ModelKind::ConstrainedLinear, ModelKind::Ridge];
        let mut wb = Workbench::from_records(records, false, config);

        let report = wb.promo_bins().unwrap();
        assert!(!report.generated.is_empty());
        assert!(wb.promo_bins.all_bins().iter().all(|b| b.min_pct <= b.max_pct));

        let summaries = wb.promo_bin_summaries().unwrap();
        assert_eq!(summaries.len(), wb.promo_bins.len());
        for (combo, bins) in &summaries {
            let stored = wb.promo_bins.get(combo).unwrap();
            for s in bins {
                let bin = stored.iter().find(|b| b.cluster_id == s.cluster_id).unwrap();
                assert!(s.periods > 0);
                assert!(bin.contains(s.mean_discount_pct));
            }
        }

        let fits = wb.fit(false).unwrap().clone();
        assert!(!fits.rows.is_empty());
        for row in fits.rows.iter().filter(|r| r.model == ModelKind::ConstrainedLinear) {
            assert!(row.beta("PPU").unwrap() <= 0.0);
        }

        let mut checked = 0;
        for row in &fits.rows {
            for policy in [CompetitorPolicyKind::Original, CompetitorPolicyKind::Competitor] {
                if row.predicted_volume <= 0.0 {
                    continue;
                }
                if let Ok(model) = DemandModel::from_row(row, policy) {
                    let q = model.volume_at(row.ppu_at_elasticity);
                    assert!((q - row.predicted_volume).abs() < 1e-6 * row.predicted_volume.abs().max(1.0));
                    checked += 1;
                }
            }
        }
        assert!(checked > 0);
    }

    #[test]
    fn combo_selection_keeps_manual_edits_for_the_same_k() {
        let spec = crate::data::SampleSpec {
            weeks: 52,
            ..crate::data::SampleSpec::default()
        };
        let mut wb = Workbench::from_records(crate::data::generate_transactions(&spec).unwrap(), false, WorkbenchConfig::default());
        let combo = wb.promo_discounts().unwrap().into_keys().next().unwrap();

        let bins = wb.select_promo_combo(&combo, Some(2)).unwrap();
        assert_eq!(bins.len(), 2);
        assert!(wb.promo_bins.rename(&combo, bins[0].cluster_id, "Shallow"));

        let again = wb.select_promo_combo(&combo, Some(2)).unwrap();
        assert_eq!(again[0].name, "Shallow");
    }
}
