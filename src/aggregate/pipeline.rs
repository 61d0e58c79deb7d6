//! Weekly aggregates → modeling table.
//!
//! Step order:
//!
//! 1. roll entity rows up to the analysis grouping (channel + group dims)
//! 2. competitor RPI columns
//! 3. category metrics, seasonality, contribution
//! 4. per-group outlier flags (STL residual z-score) and volume smoothing
//! 5. optional share-of-category target, extras fill
//!
//! Per-group failures become [`GroupWarning`]s; only structural problems
//! (bad dimension choice, no rows) stop the run.

use std::collections::{BTreeMap, BTreeSet};

use rayon::prelude::*;

use crate::aggregate::category::{fill_category_metrics, fill_contribution, fill_seasonality};
use crate::aggregate::decompose::stl;
use crate::aggregate::kalman::smooth_local_level;
use crate::aggregate::rpi::fill_rpi;
use crate::domain::{AggregationParams, Dimension, GroupKey, ModelingRow, ModelingTable, WeeklyAggregate};
use crate::error::{AppError, GroupWarning, Stage};
use crate::math::{ratio_or_zero, z_scores};

/// Modeling table plus the per-group problems met while building it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationRun {
    pub table: ModelingTable,
    pub warnings: Vec<GroupWarning>,
}

pub const MAX_GROUP_DIMS: usize = 3;
pub const MAX_PIVOT_DIMS: usize = 2;

/// Check the grouping/pivot choice before touching any data.
pub fn validate_dimensions(group_dims: &[Dimension], pivot_dims: &[Dimension]) -> Result<(), AppError> {
    if group_dims.is_empty() || group_dims.len() > MAX_GROUP_DIMS {
        return Err(AppError::usage(format!(
            "Choose between 1 and {MAX_GROUP_DIMS} group dimensions (got {}).",
            group_dims.len()
        )));
    }
    if pivot_dims.is_empty() || pivot_dims.len() > MAX_PIVOT_DIMS {
        return Err(AppError::usage(format!(
            "Choose 1 or {MAX_PIVOT_DIMS} pivot dimensions (got {}).",
            pivot_dims.len()
        )));
    }
    let unique: BTreeSet<_> = group_dims.iter().collect();
    if unique.len() != group_dims.len() {
        return Err(AppError::usage("Group dimensions must be distinct."));
    }
    if let Some(d) = pivot_dims.iter().find(|d| !group_dims.contains(d)) {
        return Err(AppError::usage(format!(
            "Pivot dimension `{}` is not one of the group dimensions.",
            d.column_name()
        )));
    }
    Ok(())
}

#[derive(Default)]
struct GroupAccumulator {
    sales_value: f64,
    volume: f64,
    price_sum: f64,
    price_n: usize,
    base_sum: f64,
    base_n: usize,
    d1_sum: f64,
    d1_n: usize,
    extras: BTreeMap<String, (f64, usize)>,
}

/// Build the modeling table for `params.group_dims` / `params.pivot_dims`.
///
/// `price_supplied` selects PPU: the mean of supplied prices when the input had
/// a `Price` column, otherwise `SalesValue / Volume` of the group.
pub fn run_aggregation(rows: &[WeeklyAggregate], params: &AggregationParams, price_supplied: bool) -> Result<AggregationRun, AppError> {
    validate_dimensions(&params.group_dims, &params.pivot_dims)?;
    if rows.is_empty() {
        return Err(AppError::insufficient("No rows to aggregate."));
    }

    let mut table_rows = roll_up(rows, params, price_supplied);
    let rpi_columns = fill_rpi(&mut table_rows, &params.group_dims, &params.pivot_dims);
    fill_category_metrics(&mut table_rows);
    fill_seasonality(&mut table_rows);
    fill_contribution(&mut table_rows);

    let warnings = flag_and_smooth(&mut table_rows, params);

    if params.ratio_mode {
        for row in table_rows.iter_mut() {
            row.filtered_volume = ratio_or_zero(row.filtered_volume, row.cat_vol);
        }
    }

    let extra_columns: Vec<String> = table_rows
        .iter()
        .flat_map(|r| r.extras.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    for row in table_rows.iter_mut() {
        for column in &extra_columns {
            row.extras.entry(column.clone()).or_insert(0.0);
        }
    }

    let table = ModelingTable {
        group_dims: params.group_dims.clone(),
        pivot_dims: params.pivot_dims.clone(),
        rpi_columns,
        extra_columns,
        rows: table_rows,
    };
    tracing::info!(
        rows = table.rows.len(),
        groups = table.groups().len(),
        rpi_columns = table.rpi_columns.len(),
        warnings = warnings.len(),
        "aggregation complete"
    );
    Ok(AggregationRun { table, warnings })
}

/// Repeat the aggregation once per single group dimension (each pivoting on
/// itself).
pub fn run_per_dimension(rows: &[WeeklyAggregate], params: &AggregationParams, price_supplied: bool) -> Result<Vec<(Dimension, AggregationRun)>, AppError> {
    params
        .group_dims
        .iter()
        .map(|&dim| {
            let single = AggregationParams {
                group_dims: vec![dim],
                pivot_dims: vec![dim],
                per_dimension: false,
                ..params.clone()
            };
            run_aggregation(rows, &single, price_supplied).map(|run| (dim, run))
        })
        .collect()
}

fn roll_up(rows: &[WeeklyAggregate], params: &AggregationParams, price_supplied: bool) -> Vec<ModelingRow> {
    let mut groups: BTreeMap<(GroupKey, chrono::NaiveDate), GroupAccumulator> = BTreeMap::new();
    for row in rows {
        let period = params.granularity.period_of(row.period);
        let acc = groups
            .entry((row.key.group_key(&params.group_dims), period))
            .or_default();
        acc.sales_value += row.sales_value;
        acc.volume += row.volume;
        if let Some(p) = row.price.filter(|p| p.is_finite()) {
            acc.price_sum += p;
            acc.price_n += 1;
        }
        if let Some(b) = row.base_price.filter(|b| b.is_finite()) {
            acc.base_sum += b;
            acc.base_n += 1;
        }
        if let Some(d) = row.d1.filter(|d| d.is_finite()) {
            acc.d1_sum += d;
            acc.d1_n += 1;
        }
        for (name, value) in &row.extras {
            let slot = acc.extras.entry(name.clone()).or_insert((0.0, 0));
            slot.0 += value;
            slot.1 += 1;
        }
    }

    groups
        .into_iter()
        .map(|((group, period), acc)| {
            let ppu = if price_supplied && acc.price_n > 0 {
                acc.price_sum / acc.price_n as f64
            } else if acc.volume > 0.0 {
                acc.sales_value / acc.volume
            } else {
                f64::NAN
            };
            ModelingRow {
                group,
                period,
                sales_value: acc.sales_value,
                volume: acc.volume,
                ppu,
                base_price: (acc.base_n > 0).then(|| acc.base_sum / acc.base_n as f64),
                d1: (acc.d1_n > 0).then(|| acc.d1_sum / acc.d1_n as f64),
                filtered_volume: acc.volume,
                cat_vol: 0.0,
                net_cat_vol: 0.0,
                cat_weighted_price: 0.0,
                cat_down_up: 0.0,
                cat_price_trend: 0.0,
                cat_seasonality: 0.0,
                is_outlier: false,
                contribution: 0.0,
                rpi: BTreeMap::new(),
                extras: acc
                    .extras
                    .into_iter()
                    .map(|(k, (s, n))| (k, s / n as f64))
                    .collect(),
            }
        })
        .collect()
}

struct GroupResult {
    start: usize,
    outliers: Option<Vec<bool>>,
    filtered: Vec<f64>,
    warnings: Vec<GroupWarning>,
}

/// Outlier flags and `FilteredVolume`, independently per group.
fn flag_and_smooth(rows: &mut [ModelingRow], params: &AggregationParams) -> Vec<GroupWarning> {
    let mut spans = Vec::new();
    let mut start = 0;
    for i in 1..=rows.len() {
        if i == rows.len() || rows[i].group != rows[start].group {
            spans.push((start, i));
            start = i;
        }
    }

    let view: &[ModelingRow] = rows;
    let results: Vec<GroupResult> = spans
        .par_iter()
        .map(|&(start, end)| process_group(&view[start..end], start, params))
        .collect();

    let mut warnings = Vec::new();
    for result in results {
        let len = result.filtered.len();
        let slice = &mut rows[result.start..result.start + len];
        for (row, value) in slice.iter_mut().zip(&result.filtered) {
            row.filtered_volume = *value;
        }
        if let Some(flags) = result.outliers {
            for (row, flag) in slice.iter_mut().zip(flags) {
                row.is_outlier = flag;
            }
        }
        warnings.extend(result.warnings);
    }
    warnings
}

fn process_group(rows: &[ModelingRow], start: usize, params: &AggregationParams) -> GroupResult {
    let group = rows[0].group.to_string();
    let volume: Vec<f64> = rows.iter().map(|r| r.volume).collect();
    let mut warnings = Vec::new();

    let outliers = if rows.len() < 2 {
        tracing::debug!(group = %group, "single observation, outlier detection skipped");
        None
    } else {
        match stl(&volume, params.seasonal_period) {
            Ok(d) => Some(z_scores(&d.resid).into_iter().map(|z| z.abs() > params.outlier_z).collect()),
            Err(e) => {
                warnings.push(GroupWarning::new(Stage::Outliers, group.clone(), e.to_string()));
                None
            }
        }
    };

    let filtered = if params.smoothing {
        let smoothed = smooth_local_level(&volume, params.process_noise_ratio);
        if smoothed.iter().any(|v| !v.is_finite()) {
            warnings.push(GroupWarning::new(
                Stage::Smoothing,
                group,
                "smoother produced non-finite values, using raw volume",
            ));
            volume
        } else {
            smoothed
        }
    } else {
        volume
    };

    GroupResult {
        start,
        outliers,
        filtered,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EntityKey;
    use chrono::NaiveDate;

    fn weekly(brand: &str, pack: &str, week: usize, price: f64, volume: f64) -> WeeklyAggregate {
        WeeklyAggregate {
            key: EntityKey {
                channel: "Grocery".into(),
                brand: brand.into(),
                pack_type: pack.into(),
                ppg: format!("{brand}-{pack}"),
                ..Default::default()
            },
            period: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::weeks(week as i64),
            sales_value: price * volume,
            volume,
            price: Some(price),
            base_price: Some(price),
            is_transition: false,
            d1: Some(0.9),
            extras: BTreeMap::new(),
        }
    }

    fn two_brand_table(weeks: usize) -> Vec<WeeklyAggregate> {
        let mut rows = Vec::new();
        for w in 0..weeks {
            let season = 10.0 * ((w % 13) as f64 / 13.0 * std::f64::consts::TAU).sin();
            rows.push(weekly("A", "Bottle", w, 10.0, 200.0 + season));
            rows.push(weekly("B", "Bottle", w, 8.0, 100.0 + season));
        }
        rows
    }

    #[test]
    fn pivot_must_be_subset_of_group() {
        let err = validate_dimensions(&[Dimension::Brand], &[Dimension::PackType]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(validate_dimensions(&[Dimension::Brand, Dimension::PackType], &[Dimension::PackType]).is_ok());
        assert!(validate_dimensions(&[], &[Dimension::Brand]).is_err());
    }

    #[test]
    fn empty_input_is_fatal() {
        let err = run_aggregation(&[], &AggregationParams::default(), false).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn modeling_table_has_contract_columns() {
        let run = run_aggregation(&two_brand_table(30), &AggregationParams::default(), false).unwrap();
        let table = &run.table;

        assert_eq!(table.rows.len(), 60);
        assert_eq!(table.rpi_columns, vec!["A_RPI".to_string(), "B_RPI".to_string()]);
        let a = table.rows.iter().find(|r| r.group.values == ["A"]).unwrap();
        assert_eq!(a.rpi["A_RPI"], 0.0);
        assert!((a.rpi["B_RPI"] - 1.25).abs() < 1e-12);
        assert!((a.ppu - 10.0).abs() < 1e-12);
        assert!(a.cat_vol > a.volume);
        assert!((a.net_cat_vol - (a.cat_vol - a.volume)).abs() < 1e-9);
        assert!(run.warnings.is_empty());
        assert!(table.rows.iter().all(|r| r.filtered_volume.is_finite()));
    }

    #[test]
    fn short_groups_warn_but_do_not_fail() {
        let run = run_aggregation(&two_brand_table(10), &AggregationParams::default(), false).unwrap();
        assert_eq!(run.warnings.len(), 2);
        assert!(run.warnings.iter().all(|w| w.stage == Stage::Outliers));
        assert!(run.table.rows.iter().all(|r| !r.is_outlier));
    }

    #[test]
    fn volume_spike_is_flagged() {
        let mut rows = two_brand_table(52);
        let spike = rows
            .iter_mut()
            .find(|r| r.key.brand == "A" && r.period == NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::weeks(30))
            .unwrap();
        spike.volume *= 4.0;
        spike.sales_value *= 4.0;

        let run = run_aggregation(&rows, &AggregationParams::default(), false).unwrap();
        let flagged: Vec<&ModelingRow> = run.table.rows.iter().filter(|r| r.is_outlier).collect();
        assert!(flagged.iter().any(|r| r.group.values == ["A"] && r.volume > 700.0));
    }

    #[test]
    fn disabling_smoothing_copies_volume_and_ratio_mode_divides() {
        let params = AggregationParams {
            smoothing: false,
            ..AggregationParams::default()
        };
        let run = run_aggregation(&two_brand_table(30), &params, false).unwrap();
        assert!(run.table.rows.iter().all(|r| r.filtered_volume == r.volume));

        let ratio = AggregationParams {
            smoothing: false,
            ratio_mode: true,
            ..AggregationParams::default()
        };
        let run = run_aggregation(&two_brand_table(30), &ratio, false).unwrap();
        for r in &run.table.rows {
            assert!((r.filtered_volume - r.volume / r.cat_vol).abs() < 1e-12);
        }
    }

    #[test]
    fn per_dimension_runs_once_per_dimension() {
        let params = AggregationParams {
            group_dims: vec![Dimension::Brand, Dimension::PackType],
            pivot_dims: vec![Dimension::Brand],
            ..AggregationParams::default()
        };
        let runs = run_per_dimension(&two_brand_table(30), &params, false).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].0, Dimension::Brand);
        assert_eq!(runs[1].1.table.rpi_columns, vec!["Bottle_RPI".to_string()]);
        assert!(runs[1].1.table.rows.iter().all(|r| r.rpi["Bottle_RPI"] == 0.0));
    }

    #[test]
    fn extras_are_filled_with_zero() {
        let mut rows = two_brand_table(30);
        rows[0].extras.insert("Feature".into(), 1.0);
        let run = run_aggregation(&rows, &AggregationParams::default(), false).unwrap();
        assert_eq!(run.table.extra_columns, vec!["Feature".to_string()]);
        assert!(run.table.rows.iter().all(|r| r.extras.contains_key("Feature")));
    }
}
