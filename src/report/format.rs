//! Plain-text tables for the terminal.

use std::collections::BTreeMap;

use crate::aggregate::AggregationRun;
use crate::baseprice::BasePriceRun;
use crate::domain::{ComboKey, CurvePoint, EntityKey, GroupKey, PromoBin, WeeklyAggregate};
use crate::error::GroupWarning;
use crate::fit::{BestModel, FitRun};
use crate::io::ingest::IngestedData;
use crate::promo::{BinSummary, FinalSaveReport};
use crate::report::ElasticityRankings;
use crate::simulate::{CompetitorWhatIf, CrossPricePoint, DemandModel, PromoScenario};

/// Dataset stats after ingest.
pub fn format_ingest_summary(data: &IngestedData) -> String {
    let mut out = String::new();
    out.push_str("=== rgm - RGM analytics workbench ===\n");
    out.push_str(&format!(
        "Rows: read={} used={} rejected={}\n",
        data.rows_read,
        data.rows_used(),
        data.row_errors.len()
    ));
    out.push_str(&format!(
        "Volume column: {} | Price supplied: {} | BasePrice supplied: {}\n",
        data.volume_source,
        yes_no(data.price_supplied),
        yes_no(data.base_price_supplied)
    ));
    if let (Some(first), Some(last)) = (data.records.iter().map(|r| r.date).min(), data.records.iter().map(|r| r.date).max()) {
        out.push_str(&format!("Dates: {first} .. {last}\n"));
    }
    if !data.extra_columns.is_empty() {
        out.push_str(&format!("Extra columns: {}\n", data.extra_columns.join(", ")));
    }
    for e in data.row_errors.iter().take(5) {
        out.push_str(&format!("  line {}: {}\n", e.line, e.message));
    }
    if data.row_errors.len() > 5 {
        out.push_str(&format!("  ... {} more\n", data.row_errors.len() - 5));
    }
    out
}

/// Per-entity base-price overview (latest base, transition count).
pub fn format_base_price_summary(run: &BasePriceRun, rows: &[WeeklyAggregate]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "\nBase price: entities={} estimated={} rows_written={} transitions={}\n",
        run.entities, run.estimated, run.rows_written, run.transitions
    ));

    let mut per_entity: BTreeMap<&EntityKey, (usize, usize, Option<f64>)> = BTreeMap::new();
    for r in rows {
        let slot = per_entity.entry(&r.key).or_insert((0, 0, None));
        slot.0 += 1;
        slot.1 += usize::from(r.is_transition);
        if r.base_price.is_some() {
            slot.2 = r.base_price;
        }
    }

    push_row(&mut out, &format!("{:<44} {:>8} {:>12} {:>12}", "entity", "periods", "transitions", "last_base"));
    push_row(&mut out, &format!("{:-<44} {:-<8} {:-<12} {:-<12}", "", "", "", ""));
    for (key, (periods, transitions, last)) in per_entity {
        push_row(
            &mut out,
            &format!("{:<44} {:>8} {:>12} {:>12}", truncate(&key.to_string(), 44), periods, transitions, fmt_opt(last, 2)),
        );
    }
    out
}

/// Bins grouped by combo.
pub fn format_bins(bins: &[PromoBin], report: Option<&FinalSaveReport>) -> String {
    let mut out = String::new();
    if let Some(r) = report {
        out.push_str(&format!(
            "\nPromo bins: generated={} kept={} skipped={}\n",
            r.generated.len(),
            r.kept,
            r.warnings.len()
        ));
    }
    push_row(
        &mut out,
        &format!("{:<44} {:>3} {:>8} {:>8} {:>9}  {}", "combo", "id", "min%", "max%", "centroid", "name"),
    );
    push_row(&mut out, &format!("{:-<44} {:-<3} {:-<8} {:-<8} {:-<9}  {:-<20}", "", "", "", "", "", ""));
    for b in bins {
        push_row(
            &mut out,
            &format!(
                "{:<44} {:>3} {:>8.2} {:>8.2} {:>9.2}  {}",
                truncate(&b.combo().to_string(), 44),
                b.cluster_id,
                b.min_pct,
                b.max_pct,
                b.centroid_pct,
                b.name
            ),
        );
    }
    out
}

/// Periods, mean depth and totals per bin.
pub fn format_bin_summary(summaries: &[(ComboKey, Vec<BinSummary>)]) -> String {
    let mut out = String::from("\nBin summary:\n");
    push_row(
        &mut out,
        &format!(
            "{:<44} {:<20} {:>7} {:>9} {:>12} {:>12}",
            "combo", "bin", "periods", "mean%", "volume", "sales"
        ),
    );
    for (combo, bins) in summaries {
        for b in bins {
            push_row(
                &mut out,
                &format!(
                    "{:<44} {:<20} {:>7} {:>9.2} {:>12.1} {:>12.1}",
                    truncate(&combo.to_string(), 44),
                    truncate(&b.name, 20),
                    b.periods,
                    b.mean_discount_pct,
                    b.volume,
                    b.sales_value
                ),
            );
        }
    }
    out
}

/// Shape of the modeling table.
pub fn format_aggregation_summary(run: &AggregationRun) -> String {
    let t = &run.table;
    let mut out = String::new();
    let dims = |d: &[crate::domain::Dimension]| d.iter().map(|d| d.column_name()).collect::<Vec<_>>().join("+");
    out.push_str(&format!(
        "\nModeling table: rows={} groups={} group=[{}] pivot=[{}]\n",
        t.rows.len(),
        t.groups().len(),
        dims(&t.group_dims),
        dims(&t.pivot_dims)
    ));
    out.push_str(&format!("RPI columns: {}\n", t.rpi_columns.join(", ")));
    let outliers = t.rows.iter().filter(|r| r.is_outlier).count();
    out.push_str(&format!("Outliers flagged: {outliers}\n"));
    out
}

/// Fold-averaged metrics per group × model; `*` marks the best model.
pub fn format_fit_summary(run: &FitRun, best: &BTreeMap<GroupKey, BestModel>) -> String {
    let mut out = String::new();
    out.push_str(&format!("\nFits: rows={} skipped={}\n", run.rows.len(), run.warnings.len()));
    push_row(
        &mut out,
        &format!(
            "  {:<28} {:<36} {:>5} {:>9} {:>9} {:>10} {:>10}",
            "group", "model", "folds", "r2_test", "mape_test", "elasticity", "csf"
        ),
    );
    push_row(
        &mut out,
        &format!("  {:-<28} {:-<36} {:-<5} {:-<9} {:-<9} {:-<10} {:-<10}", "", "", "", "", "", "", ""),
    );

    let mut cells: BTreeMap<(&GroupKey, &str), Vec<&crate::domain::FittedModelRow>> = BTreeMap::new();
    for row in &run.rows {
        cells.entry((&row.group, row.model.display_name())).or_default().push(row);
    }
    for ((group, model), rows) in cells {
        let chosen = best.get(group).is_some_and(|b| b.model.display_name() == model);
        let avg = |f: fn(&crate::domain::FittedModelRow) -> f64| crate::math::mean(&rows.iter().map(|r| f(r)).collect::<Vec<_>>());
        push_row(
            &mut out,
            &format!(
                "{} {:<28} {:<36} {:>5} {:>9.3} {:>9.3} {:>10.3} {:>10.3}",
                if chosen { "*" } else { " " },
                truncate(&group.to_string(), 28),
                truncate(model, 36),
                rows.len(),
                avg(|r| r.r2_test),
                avg(|r| r.mape_test),
                avg(|r| r.self_elasticity),
                avg(|r| r.csf),
            ),
        );
    }
    out
}

pub fn format_rankings(rankings: &ElasticityRankings) -> String {
    let mut out = String::new();
    out.push_str("\nMost elastic:\n");
    out.push_str(&format_best_table(&rankings.most_elastic));
    out.push_str("\nLeast elastic:\n");
    out.push_str(&format_best_table(&rankings.least_elastic));
    out
}

fn format_best_table(rows: &[BestModel]) -> String {
    let mut out = String::new();
    push_row(&mut out, &format!("{:<28} {:<36} {:>10} {:>9}", "group", "model", "elasticity", "mape"));
    push_row(&mut out, &format!("{:-<28} {:-<36} {:-<10} {:-<9}", "", "", "", ""));
    for b in rows {
        push_row(
            &mut out,
            &format!(
                "{:<28} {:<36} {:>10.3} {:>9.3}",
                truncate(&b.row.group.to_string(), 28),
                truncate(b.model.display_name(), 36),
                b.mean_elasticity,
                b.mean_test_mape
            ),
        );
    }
    out
}

/// Demand line, a few curve samples and the revenue maximum.
pub fn format_curve_summary(model: &DemandModel, curve: &[CurvePoint], best: Option<&CurvePoint>) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "\nDemand ({:?} policy): Q = {:.3} {:+.3} x P | mean PPU={:.3} | zero-volume price={:.3}\n",
        model.policy,
        model.intercept,
        model.slope,
        model.mean_ppu,
        model.zero_volume_price()
    ));
    push_row(&mut out, &format!("{:>10} {:>12} {:>14} {:>10}", "price", "volume", "revenue", "elasticity"));
    let step = (curve.len() / 10).max(1);
    for p in curve.iter().step_by(step) {
        push_row(&mut out, &fmt_point(p));
    }
    if let Some(p) = best {
        out.push_str("Revenue max:\n");
        push_row(&mut out, &fmt_point(p));
    }
    out
}

pub fn format_promo_scenarios(scenarios: &[PromoScenario]) -> String {
    let mut out = String::new();
    out.push_str("\nPromo scenarios:\n");
    push_row(&mut out, &format!("{:<24} {:>8} {:>10} {:>12} {:>14} {:>10}", "bin", "depth%", "price", "volume", "revenue", "elasticity"));
    for s in scenarios {
        push_row(
            &mut out,
            &format!(
                "{:<24} {:>8.2} {:>10.3} {:>12.2} {:>14.2} {:>10}",
                truncate(&s.name, 24),
                s.discount_pct,
                s.point.price,
                s.point.volume,
                s.point.revenue,
                fmt_f(s.point.elasticity, 3)
            ),
        );
    }
    out
}

pub fn format_what_if(w: &CompetitorWhatIf) -> String {
    let mut out = String::new();
    out.push_str(&format!("\nCompetitor what-if at own price {:.3}:\n", w.own_price));
    out.push_str(&format!(
        "  volume  {:.2} -> {:.2} ({:+.2})\n  revenue {:.2} -> {:.2} ({:+.2})\n",
        w.baseline_volume, w.scenario_volume, w.volume_delta, w.baseline_revenue, w.scenario_revenue, w.revenue_delta
    ));
    for (column, e) in &w.cross_elasticities {
        out.push_str(&format!("  cross-elasticity {column}: {}\n", fmt_f(*e, 4)));
    }
    out
}

pub fn format_cross_curve(column: &str, points: &[CrossPricePoint]) -> String {
    let mut out = String::new();
    out.push_str(&format!("\nCross-price curve ({column}):\n"));
    push_row(&mut out, &format!("{:>12} {:>12} {:>14} {:>10}", "comp_price", "volume", "revenue", "cross_e"));
    for p in points {
        push_row(
            &mut out,
            &format!("{:>12.3} {:>12.2} {:>14.2} {:>10}", p.competitor_price, p.volume, p.revenue, fmt_f(p.cross_elasticity, 4)),
        );
    }
    out
}

/// Per-group warnings, one per line.
pub fn format_warnings(warnings: &[GroupWarning]) -> String {
    if warnings.is_empty() {
        return String::new();
    }
    let mut out = format!("\nWarnings ({}):\n", warnings.len());
    for w in warnings {
        out.push_str(&format!("  {w}\n"));
    }
    out
}

fn fmt_point(p: &CurvePoint) -> String {
    format!("{:>10.3} {:>12.2} {:>14.2} {:>10}", p.price, p.volume, p.revenue, fmt_f(p.elasticity, 3))
}

fn fmt_f(v: f64, decimals: usize) -> String {
    if v.is_finite() { format!("{v:.decimals$}") } else { "-".to_string() }
}

fn fmt_opt(v: Option<f64>, decimals: usize) -> String {
    v.map(|v| fmt_f(v, decimals)).unwrap_or_else(|| "-".to_string())
}

fn yes_no(b: bool) -> &'static str {
    if b { "yes" } else { "no" }
}

fn push_row(out: &mut String, row: &str) {
    out.push_str(row.trim_end());
    out.push('\n');
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CompetitorPolicyKind;
    use crate::error::Stage;
    use crate::simulate::test_support::fitted_row;

    #[test]
    fn truncate_marks_cut_text() {
        assert_eq!(truncate("Grocery | Alpha", 40), "Grocery | Alpha");
        assert_eq!(truncate("abcdefgh", 5), "abcd.");
    }

    #[test]
    fn non_finite_values_print_as_dash() {
        assert_eq!(fmt_f(f64::NAN, 2), "-");
        assert_eq!(fmt_f(1.2345, 2), "1.23");
        assert_eq!(fmt_opt(None, 2), "-");
    }

    #[test]
    fn curve_summary_lists_revenue_max() {
        let model = DemandModel::from_row(&fitted_row(), CompetitorPolicyKind::Original).unwrap();
        let curve = model.curve(21).unwrap();
        let best = crate::simulate::revenue_max(&curve);
        let text = format_curve_summary(&model, &curve, best.as_ref());
        assert!(text.contains("Revenue max:"));
        assert!(text.lines().all(|l| l == l.trim_end()));
    }

    #[test]
    fn bin_summary_has_one_line_per_bin() {
        let combo = ComboKey {
            channel: "Grocery".into(),
            brand: "A".into(),
            aggregator: "Bottle".into(),
            ppg: "P1".into(),
        };
        let summary = BinSummary {
            cluster_id: 1,
            name: "Bin1: 0-15%".into(),
            centroid_pct: 10.0,
            periods: 4,
            mean_discount_pct: 9.5,
            volume: 400.0,
            sales_value: 3600.0,
        };
        let text = format_bin_summary(&[(combo, vec![summary.clone(), BinSummary { cluster_id: 2, ..summary }])]);
        assert_eq!(text.lines().filter(|l| l.contains("Bin1: 0-15%")).count(), 2);
        assert!(text.contains("9.50"));
    }

    #[test]
    fn warnings_block_is_empty_without_warnings() {
        assert!(format_warnings(&[]).is_empty());
        let text = format_warnings(&[GroupWarning {
            stage: Stage::Fitting,
            group: "Grocery | A".into(),
            message: "too few rows".into(),
        }]);
        assert!(text.contains("Grocery | A"));
    }
}
