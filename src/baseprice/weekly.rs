//! Entity × period aggregation and bulk base-price fills.

use std::collections::BTreeMap;

use rayon::prelude::*;

use crate::baseprice::estimator::{BasePriceSeries, estimate_base_price};
use crate::domain::{BasePriceParams, EntityKey, Granularity, TransactionRecord, WeeklyAggregate};
use crate::error::{GroupWarning, Stage};

#[derive(Default)]
struct Accumulator {
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

/// Group transactions by entity × period.
///
/// `Price` is the mean of supplied transaction prices, else `SalesValue/Volume`
/// (unset when the period has no volume). A supplied `BasePrice` is carried as
/// the period mean. Output is sorted by entity, then period.
pub fn aggregate_weekly(records: &[TransactionRecord], granularity: Granularity) -> Vec<WeeklyAggregate> {
    let mut groups: BTreeMap<(EntityKey, chrono::NaiveDate), Accumulator> = BTreeMap::new();

    for rec in records {
        let period = granularity.period_of(rec.date);
        let acc = groups.entry((rec.key.clone(), period)).or_default();
        acc.sales_value += rec.sales_value;
        acc.volume += rec.volume;
        if let Some(p) = rec.price.filter(|p| p.is_finite()) {
            acc.price_sum += p;
            acc.price_n += 1;
        }
        if let Some(b) = rec.base_price.filter(|b| b.is_finite()) {
            acc.base_sum += b;
            acc.base_n += 1;
        }
        if let Some(d) = rec.d1.filter(|d| d.is_finite()) {
            acc.d1_sum += d;
            acc.d1_n += 1;
        }
        for (name, value) in &rec.extras {
            let slot = acc.extras.entry(name.clone()).or_insert((0.0, 0));
            slot.0 += value;
            slot.1 += 1;
        }
    }

    groups
        .into_iter()
        .map(|((key, period), acc)| {
            let price = if acc.price_n > 0 {
                Some(acc.price_sum / acc.price_n as f64)
            } else if acc.volume > 0.0 {
                Some(acc.sales_value / acc.volume)
            } else {
                None
            };
            WeeklyAggregate {
                key,
                period,
                sales_value: acc.sales_value,
                volume: acc.volume,
                price,
                base_price: (acc.base_n > 0).then(|| acc.base_sum / acc.base_n as f64),
                is_transition: false,
                d1: (acc.d1_n > 0).then(|| acc.d1_sum / acc.d1_n as f64),
                extras: acc
                    .extras
                    .into_iter()
                    .map(|(k, (sum, n))| (k, sum / n as f64))
                    .collect(),
            }
        })
        .collect()
}

/// Summary of one base-price pass over a table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BasePriceRun {
    pub entities: usize,
    pub estimated: usize,
    pub rows_written: usize,
    pub transitions: usize,
    pub warnings: Vec<GroupWarning>,
}

/// Estimate base prices for every entity in `rows` (sorted by entity, period).
///
/// Without `force`, existing `BasePrice` values are kept and entities whose
/// rows are all populated are not recomputed; with `force` every row is
/// overwritten. Entities with fewer than `window` priced weeks are skipped
/// with a warning and keep whatever they had.
pub fn apply_base_prices(rows: &mut [WeeklyAggregate], params: &BasePriceParams, force: bool) -> BasePriceRun {
    let spans = entity_spans(rows);
    let mut run = BasePriceRun {
        entities: spans.len(),
        ..Default::default()
    };

    let view: &[WeeklyAggregate] = rows;
    let results: Vec<(usize, usize, Result<Vec<Option<(f64, bool)>>, GroupWarning>)> = spans
        .par_iter()
        .filter(|&&(start, end)| force || view[start..end].iter().any(|r| r.base_price.is_none()))
        .map(|&(start, end)| (start, end, estimate_entity(&view[start..end], params)))
        .collect();

    for (start, end, result) in results {
        match result {
            Ok(values) => {
                run.estimated += 1;
                for (row, value) in rows[start..end].iter_mut().zip(values) {
                    let Some((base, transition)) = value else { continue };
                    if force || row.base_price.is_none() {
                        row.base_price = Some(base);
                        row.is_transition = transition;
                        run.rows_written += 1;
                        run.transitions += usize::from(transition);
                    }
                }
            }
            Err(warning) => run.warnings.push(warning),
        }
    }

    tracing::info!(
        entities = run.entities,
        estimated = run.estimated,
        rows = run.rows_written,
        transitions = run.transitions,
        skipped = run.warnings.len(),
        "base price pass complete"
    );
    run
}

/// Bulk "save all": estimate only the entities that have a missing `BasePrice`
/// and leave every supplied value untouched.
pub fn fill_missing_base_prices(rows: &mut [WeeklyAggregate], params: &BasePriceParams) -> BasePriceRun {
    apply_base_prices(rows, params, false)
}

/// Contiguous `[start, end)` ranges sharing one entity key.
fn entity_spans(rows: &[WeeklyAggregate]) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;
    for i in 1..=rows.len() {
        if i == rows.len() || rows[i].key != rows[start].key {
            if i > start {
                spans.push((start, i));
            }
            start = i;
        }
    }
    spans
}

/// Per-row `(base, is_transition)`; `None` for rows before any priced week.
///
/// Weeks without a price carry the most recent base forward.
fn estimate_entity(rows: &[WeeklyAggregate], params: &BasePriceParams) -> Result<Vec<Option<(f64, bool)>>, GroupWarning> {
    let priced: Vec<(usize, f64)> = rows
        .iter()
        .enumerate()
        .filter_map(|(i, r)| r.price.filter(|p| p.is_finite() && *p > 0.0).map(|p| (i, p)))
        .collect();
    let prices: Vec<f64> = priced.iter().map(|&(_, p)| p).collect();

    let series: BasePriceSeries = estimate_base_price(&prices, params)
        .map_err(|e| GroupWarning::new(Stage::BasePrice, rows[0].key.to_string(), e.to_string()))?;

    let mut out = vec![None; rows.len()];
    let mut next = priced.iter().zip(series.base.iter().zip(&series.is_transition)).peekable();
    let mut carried: Option<f64> = None;
    for (i, slot) in out.iter_mut().enumerate() {
        if let Some(&(&(row_idx, _), (&base, &transition))) = next.peek() {
            if row_idx == i {
                carried = Some(base);
                *slot = Some((base, transition));
                next.next();
                continue;
            }
        }
        *slot = carried.map(|b| (b, false));
    }
    Ok(out)
}
