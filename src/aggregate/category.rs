//! Category-level covariates: volume totals, price trend, seasonality and
//! market share.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};

use crate::domain::{GroupKey, ModelingRow};
use crate::math::ratio_or_zero;

#[derive(Default)]
struct PeriodTotals {
    volume: f64,
    price_volume: f64,
    priced_volume: f64,
    down_up_volume: f64,
}

/// `CatVol`, `NetCatVol`, `Cat_Weighted_Price`, `Cat_Down_Up` and
/// `Cat_Price_trend_over_time`.
///
/// `Cat_Down_Up` weights each group's *time-averaged* PPU by its current
/// volume, so it only moves when the category mix moves. The trend column
/// rescales the weighted price by `mean(Cat_Down_Up) / Cat_Down_Up` over the
/// channel's periods.
pub fn fill_category_metrics(rows: &mut [ModelingRow]) {
    let mut avg_ppu: BTreeMap<GroupKey, (f64, usize)> = BTreeMap::new();
    for row in rows.iter().filter(|r| r.ppu.is_finite()) {
        let slot = avg_ppu.entry(row.group.clone()).or_insert((0.0, 0));
        slot.0 += row.ppu;
        slot.1 += 1;
    }
    let avg_ppu: BTreeMap<GroupKey, f64> = avg_ppu.into_iter().map(|(g, (s, n))| (g, s / n as f64)).collect();

    let mut totals: BTreeMap<(String, NaiveDate), PeriodTotals> = BTreeMap::new();
    for row in rows.iter() {
        let t = totals.entry((row.group.channel.clone(), row.period)).or_default();
        if row.volume.is_finite() {
            t.volume += row.volume;
        }
        if row.ppu.is_finite() && row.volume.is_finite() && row.volume > 0.0 {
            t.price_volume += row.ppu * row.volume;
            t.priced_volume += row.volume;
            if let Some(avg) = avg_ppu.get(&row.group) {
                t.down_up_volume += avg * row.volume;
            }
        }
    }

    let mut channel_down_up: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for ((channel, _), t) in &totals {
        let slot = channel_down_up.entry(channel.clone()).or_insert((0.0, 0));
        slot.0 += ratio_or_zero(t.down_up_volume, t.priced_volume);
        slot.1 += 1;
    }

    for row in rows.iter_mut() {
        let Some(t) = totals.get(&(row.group.channel.clone(), row.period)) else {
            continue;
        };
        let down_up = ratio_or_zero(t.down_up_volume, t.priced_volume);
        let mean_down_up = channel_down_up
            .get(&row.group.channel)
            .map(|&(s, n)| s / n as f64)
            .unwrap_or(0.0);

        row.cat_vol = t.volume;
        row.net_cat_vol = t.volume - if row.volume.is_finite() { row.volume } else { 0.0 };
        row.cat_weighted_price = ratio_or_zero(t.price_volume, t.priced_volume);
        row.cat_down_up = down_up;
        row.cat_price_trend = row.cat_weighted_price * ratio_or_zero(mean_down_up, down_up);
    }
}

/// `CatSeasonality`: mean row volume per (channel, calendar month).
pub fn fill_seasonality(rows: &mut [ModelingRow]) {
    let mut by_month: BTreeMap<(String, u32), (f64, usize)> = BTreeMap::new();
    for row in rows.iter().filter(|r| r.volume.is_finite()) {
        let slot = by_month
            .entry((row.group.channel.clone(), row.period.month()))
            .or_insert((0.0, 0));
        slot.0 += row.volume;
        slot.1 += 1;
    }
    for row in rows.iter_mut() {
        row.cat_seasonality = by_month
            .get(&(row.group.channel.clone(), row.period.month()))
            .map(|&(s, n)| s / n as f64)
            .unwrap_or(0.0);
    }
}

/// `Contribution`: the group's share of its channel's total sales value over
/// the whole history. One scalar per group, repeated on every row.
pub fn fill_contribution(rows: &mut [ModelingRow]) {
    let mut group_sales: BTreeMap<GroupKey, f64> = BTreeMap::new();
    let mut channel_sales: BTreeMap<String, f64> = BTreeMap::new();
    for row in rows.iter().filter(|r| r.sales_value.is_finite()) {
        *group_sales.entry(row.group.clone()).or_default() += row.sales_value;
        *channel_sales.entry(row.group.channel.clone()).or_default() += row.sales_value;
    }
    for row in rows.iter_mut() {
        let own = group_sales.get(&row.group).copied().unwrap_or(0.0);
        let total = channel_sales.get(&row.group.channel).copied().unwrap_or(0.0);
        row.contribution = ratio_or_zero(own, total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::test_support::row;

    #[test]
    fn category_totals_per_channel_period() {
        let mut rows = vec![row("A", 0, 10.0, 100.0), row("B", 0, 8.0, 300.0)];
        fill_category_metrics(&mut rows);

        assert_eq!(rows[0].cat_vol, 400.0);
        assert_eq!(rows[0].net_cat_vol, 300.0);
        assert_eq!(rows[1].net_cat_vol, 100.0);
        assert!((rows[0].cat_weighted_price - 8.5).abs() < 1e-12);
        // Single period: the trend ratio is 1.
        assert!((rows[0].cat_price_trend - rows[0].cat_weighted_price).abs() < 1e-12);
    }

    #[test]
    fn down_up_tracks_mix_not_price() {
        // Both brands change price in week 1 but the mix stays the same.
        let mut rows = vec![
            row("A", 0, 10.0, 100.0),
            row("B", 0, 8.0, 100.0),
            row("A", 1, 12.0, 100.0),
            row("B", 1, 6.0, 100.0),
        ];
        fill_category_metrics(&mut rows);
        assert!((rows[0].cat_down_up - rows[2].cat_down_up).abs() < 1e-12);
        assert!((rows[0].cat_down_up - 9.0).abs() < 1e-12);
    }

    #[test]
    fn contribution_is_static_share() {
        let mut rows = vec![row("A", 0, 10.0, 10.0), row("A", 1, 10.0, 30.0), row("B", 0, 10.0, 60.0)];
        fill_contribution(&mut rows);
        assert!((rows[0].contribution - 0.4).abs() < 1e-12);
        assert_eq!(rows[0].contribution, rows[1].contribution);
        assert!((rows[2].contribution - 0.6).abs() < 1e-12);
    }

    #[test]
    fn seasonality_is_monthly_mean_volume() {
        let mut rows = vec![row("A", 0, 10.0, 10.0), row("B", 0, 10.0, 30.0)];
        fill_seasonality(&mut rows);
        assert_eq!(rows[0].cat_seasonality, 20.0);
    }
}
