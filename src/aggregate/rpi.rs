//! Competitor relative price indices.
//!
//! Competitor PPU is pivoted by the pivot dimensions per (channel, period) and
//! every row gets one `<competitor>_RPI = own PPU / competitor PPU` column per
//! competitor value. The row's own pivot value and missing/zero competitor
//! prices produce 0.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;

use crate::domain::{Dimension, GroupKey, ModelingRow, RPI_SUFFIX};
use crate::math::ratio_or_zero;

/// Pivot value of a group, e.g. `A` or `A_Bottle` for two pivot dimensions.
///
/// Pivot dimensions must be a subset of the group dimensions.
pub fn pivot_label(group: &GroupKey, group_dims: &[Dimension], pivot_dims: &[Dimension]) -> String {
    pivot_dims
        .iter()
        .filter_map(|d| group_dims.iter().position(|g| g == d))
        .filter_map(|i| group.values.get(i).map(String::as_str))
        .collect::<Vec<_>>()
        .join("_")
}

pub fn rpi_column(label: &str) -> String {
    format!("{label}{RPI_SUFFIX}")
}

/// Fill `row.rpi` for every row and return the RPI column names (sorted).
pub fn fill_rpi(rows: &mut [ModelingRow], group_dims: &[Dimension], pivot_dims: &[Dimension]) -> Vec<String> {
    let labels: Vec<String> = rows
        .iter()
        .map(|r| pivot_label(&r.group, group_dims, pivot_dims))
        .collect();

    let mut competitor: BTreeMap<(String, NaiveDate, String), (f64, usize)> = BTreeMap::new();
    for (row, label) in rows.iter().zip(&labels) {
        if row.ppu.is_finite() && row.ppu > 0.0 {
            let slot = competitor
                .entry((row.group.channel.clone(), row.period, label.clone()))
                .or_insert((0.0, 0));
            slot.0 += row.ppu;
            slot.1 += 1;
        }
    }

    let values: BTreeSet<&String> = labels.iter().collect();
    let columns: Vec<(String, String)> = values.iter().map(|v| ((*v).clone(), rpi_column(v))).collect();

    for (row, own) in rows.iter_mut().zip(&labels) {
        row.rpi.clear();
        for (value, column) in &columns {
            let rpi = if value == own {
                0.0
            } else {
                let key = (row.group.channel.clone(), row.period, value.clone());
                let comp = competitor.get(&key).map(|&(s, n)| s / n as f64).unwrap_or(0.0);
                ratio_or_zero(row.ppu, comp)
            };
            row.rpi.insert(column.clone(), rpi);
        }
    }

    columns.into_iter().map(|(_, c)| c).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::test_support::row;

    #[test]
    fn self_comparison_is_zero_and_competitors_are_ratios() {
        let mut rows = vec![row("A", 0, 10.0, 100.0), row("B", 0, 8.0, 50.0)];
        let cols = fill_rpi(&mut rows, &[Dimension::Brand], &[Dimension::Brand]);

        assert_eq!(cols, vec!["A_RPI".to_string(), "B_RPI".to_string()]);
        assert_eq!(rows[0].rpi["A_RPI"], 0.0);
        assert!((rows[0].rpi["B_RPI"] - 1.25).abs() < 1e-12);
        assert!((rows[1].rpi["A_RPI"] - 0.8).abs() < 1e-12);
        assert_eq!(rows[1].rpi["B_RPI"], 0.0);
    }

    #[test]
    fn missing_competitor_period_gives_zero() {
        let mut rows = vec![row("A", 0, 10.0, 100.0), row("A", 1, 10.0, 100.0), row("B", 0, 8.0, 50.0)];
        fill_rpi(&mut rows, &[Dimension::Brand], &[Dimension::Brand]);
        assert_eq!(rows[1].rpi["B_RPI"], 0.0);
    }

    #[test]
    fn pivot_label_joins_selected_dimensions() {
        let g = GroupKey {
            channel: "Grocery".into(),
            values: vec!["A".into(), "Bottle".into()],
        };
        let dims = [Dimension::Brand, Dimension::PackType];
        assert_eq!(pivot_label(&g, &dims, &[Dimension::Brand]), "A");
        assert_eq!(pivot_label(&g, &dims, &dims), "A_Bottle");
    }
}
