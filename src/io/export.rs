//! Export artifacts to CSV/JSON.
//!
//! Column names are part of the output contract; downstream spreadsheets key
//! on them. Non-finite numbers are written as empty CSV cells (`null` in JSON).

use std::collections::BTreeSet;
use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{
    COL_BASE_PRICE, COL_CAT_DOWN_UP, COL_CAT_PRICE_TREND, COL_CAT_SEASONALITY, COL_CAT_VOL, COL_CAT_WEIGHTED_PRICE, COL_CONTRIBUTION, COL_D1,
    COL_FILTERED_VOLUME, COL_IS_OUTLIER, COL_NET_CAT_VOL, COL_PPU, COL_SALES_VALUE, COL_VOLUME, CurvePoint, Dimension, FittedModelRow, ModelingTable,
    PromoBin, TransactionRecord, WeeklyAggregate,
};
use crate::error::AppError;
use crate::simulate::PromoScenario;

fn num(v: f64) -> String {
    if v.is_finite() { format!("{v}") } else { String::new() }
}

fn opt(v: Option<f64>) -> String {
    v.map(num).unwrap_or_default()
}

/// Transaction table in the ingest schema (used for generated samples).
pub fn write_transactions_csv(path: &Path, records: &[TransactionRecord]) -> Result<(), AppError> {
    let extras: BTreeSet<&String> = records.iter().flat_map(|r| r.extras.keys()).collect();
    let mut w = csv::Writer::from_path(path)?;

    let mut header: Vec<String> = [
        "Channel", "Brand", "Variant", "PackType", "PackSize", "PPG", "Date", COL_SALES_VALUE, COL_VOLUME, "Price", COL_BASE_PRICE, COL_D1,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    header.extend(extras.iter().map(|s| s.to_string()));
    w.write_record(&header)?;

    for r in records {
        let mut record = vec![
            r.key.channel.clone(),
            r.key.brand.clone(),
            r.key.variant.clone(),
            r.key.pack_type.clone(),
            r.key.pack_size.clone(),
            r.key.ppg.clone(),
            r.date.to_string(),
            num(r.sales_value),
            num(r.volume),
            opt(r.price),
            opt(r.base_price),
            opt(r.d1),
        ];
        record.extend(extras.iter().map(|k| opt(r.extras.get(*k).copied())));
        w.write_record(&record)?;
    }
    w.flush()?;
    Ok(())
}

/// Base-price table: one row per entity × period.
pub fn write_base_price_csv(path: &Path, rows: &[WeeklyAggregate]) -> Result<(), AppError> {
    let extras: BTreeSet<&String> = rows.iter().flat_map(|r| r.extras.keys()).collect();
    let mut w = csv::Writer::from_path(path)?;

    let mut header: Vec<String> = [
        "Channel", "Brand", "Variant", "PackType", "PackSize", "PPG", "Date", "Year", "Month", "Week", COL_SALES_VALUE, COL_VOLUME, "Price",
        COL_BASE_PRICE, "IsTransition", COL_D1,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    header.extend(extras.iter().map(|s| s.to_string()));
    w.write_record(&header)?;

    for r in rows {
        let mut record = vec![
            r.key.channel.clone(),
            r.key.brand.clone(),
            r.key.variant.clone(),
            r.key.pack_type.clone(),
            r.key.pack_size.clone(),
            r.key.ppg.clone(),
            r.period.to_string(),
            r.year().to_string(),
            r.month().to_string(),
            r.week().to_string(),
            num(r.sales_value),
            num(r.volume),
            opt(r.price),
            opt(r.base_price),
            r.is_transition.to_string(),
            opt(r.d1),
        ];
        record.extend(extras.iter().map(|k| opt(r.extras.get(*k).copied())));
        w.write_record(&record)?;
    }
    w.flush()?;
    Ok(())
}

const BIN_HEADER: [&str; 9] = ["Channel", "Brand", "Aggregator", "PPG", "ClusterID", "Min", "Max", "Centroid", "ClusterName"];

/// Promo cluster table.
pub fn write_bins_csv(path: &Path, bins: &[PromoBin]) -> Result<(), AppError> {
    let mut w = csv::Writer::from_path(path)?;
    w.write_record(BIN_HEADER)?;
    for b in bins {
        w.write_record([
            b.channel.clone(),
            b.brand.clone(),
            b.aggregator.clone(),
            b.ppg.clone(),
            b.cluster_id.to_string(),
            num(b.min_pct),
            num(b.max_pct),
            num(b.centroid_pct),
            b.name.clone(),
        ])?;
    }
    w.flush()?;
    Ok(())
}

pub fn read_bins_csv(path: &Path) -> Result<Vec<PromoBin>, AppError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut bins = Vec::new();
    for bin in reader.deserialize() {
        bins.push(bin?);
    }
    Ok(bins)
}

pub fn write_bins_json(path: &Path, bins: &[PromoBin]) -> Result<(), AppError> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, bins)?;
    Ok(())
}

pub fn read_bins_json(path: &Path) -> Result<Vec<PromoBin>, AppError> {
    let file = File::open(path).map_err(|e| AppError::usage(format!("Failed to open bins JSON '{}': {e}", path.display())))?;
    Ok(serde_json::from_reader(file)?)
}

/// Modeling table with contract column names.
pub fn write_modeling_table_csv(path: &Path, table: &ModelingTable) -> Result<(), AppError> {
    let mut w = csv::Writer::from_path(path)?;

    let mut header: Vec<String> = vec!["Channel".to_string()];
    header.extend(table.group_dims.iter().map(|d| d.column_name().to_string()));
    header.push("Date".to_string());
    header.extend(
        [COL_VOLUME, COL_SALES_VALUE, COL_PPU, COL_BASE_PRICE, COL_D1]
            .iter()
            .map(|s| s.to_string()),
    );
    header.extend(table.rpi_columns.iter().cloned());
    header.extend(
        [
            COL_FILTERED_VOLUME,
            COL_CAT_VOL,
            COL_NET_CAT_VOL,
            COL_CAT_WEIGHTED_PRICE,
            COL_CAT_DOWN_UP,
            COL_CAT_PRICE_TREND,
            COL_CAT_SEASONALITY,
            COL_IS_OUTLIER,
            COL_CONTRIBUTION,
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    header.extend(table.extra_columns.iter().cloned());
    w.write_record(&header)?;

    for r in &table.rows {
        let mut record = vec![r.group.channel.clone()];
        record.extend(r.group.values.iter().cloned());
        record.push(r.period.to_string());
        record.extend([num(r.volume), num(r.sales_value), num(r.ppu), opt(r.base_price), opt(r.d1)]);
        record.extend(table.rpi_columns.iter().map(|c| opt(r.rpi.get(c).copied())));
        record.extend([
            num(r.filtered_volume),
            num(r.cat_vol),
            num(r.net_cat_vol),
            num(r.cat_weighted_price),
            num(r.cat_down_up),
            num(r.cat_price_trend),
            num(r.cat_seasonality),
            if r.is_outlier { "1" } else { "0" }.to_string(),
            num(r.contribution),
        ]);
        record.extend(table.extra_columns.iter().map(|c| opt(r.extras.get(c).copied())));
        w.write_record(&record)?;
    }
    w.flush()?;
    Ok(())
}

/// Predictor names across `rows`, in first-seen order.
fn predictor_columns(rows: &[FittedModelRow]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for c in rows.iter().flat_map(|r| &r.coefficients) {
        if seen.insert(c.predictor.as_str()) {
            out.push(c.predictor.clone());
        }
    }
    out
}

/// Fitted model table: `B0 (Original)`, `Beta_<predictor>`, metrics.
///
/// Predictors a group did not use are left empty.
pub fn write_fits_csv(path: &Path, group_dims: &[Dimension], rows: &[FittedModelRow]) -> Result<(), AppError> {
    let predictors = predictor_columns(rows);
    let mut w = csv::Writer::from_path(path)?;

    let mut header: Vec<String> = vec!["Channel".to_string()];
    header.extend(group_dims.iter().map(|d| d.column_name().to_string()));
    header.extend(["Model", "Fold", "B0 (Original)"].iter().map(|s| s.to_string()));
    header.extend(predictors.iter().map(|p| format!("Beta_{p}")));
    header.extend(
        [
            "R2_Train",
            "R2_Test",
            "MAPE_Train",
            "MAPE_Test",
            "MSE_Train",
            "MSE_Test",
            "SelfElasticity",
            "PPU_at_Elasticity",
            "CSF",
            "MCV",
            "ElasticityFlag",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    w.write_record(&header)?;

    for r in rows {
        let mut record = vec![r.group.channel.clone()];
        record.extend(r.group.values.iter().cloned());
        record.extend([r.model.display_name().to_string(), r.fold.to_string(), num(r.intercept)]);
        record.extend(predictors.iter().map(|p| opt(r.beta(p))));
        record.extend([
            num(r.r2_train),
            num(r.r2_test),
            num(r.mape_train),
            num(r.mape_test),
            num(r.mse_train),
            num(r.mse_test),
            num(r.self_elasticity),
            num(r.ppu_at_elasticity),
            num(r.csf),
            num(r.mcv),
            r.elasticity_flag.to_string(),
        ]);
        w.write_record(&record)?;
    }
    w.flush()?;
    Ok(())
}

/// Portable fitted-model file: everything the simulator needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitsFile {
    pub tool: String,
    pub group_dims: Vec<Dimension>,
    pub rows: Vec<FittedModelRow>,
}

pub fn write_fits_json(path: &Path, group_dims: &[Dimension], rows: &[FittedModelRow]) -> Result<(), AppError> {
    let file = File::create(path)?;
    let doc = FitsFile {
        tool: "rgm".to_string(),
        group_dims: group_dims.to_vec(),
        rows: rows.to_vec(),
    };
    serde_json::to_writer_pretty(file, &doc)?;
    Ok(())
}

pub fn read_fits_json(path: &Path) -> Result<FitsFile, AppError> {
    let file = File::open(path).map_err(|e| AppError::usage(format!("Failed to open fits JSON '{}': {e}", path.display())))?;
    let doc: FitsFile = serde_json::from_reader(file)?;
    if doc.rows.is_empty() {
        return Err(AppError::insufficient(format!("'{}' contains no fitted models.", path.display())));
    }
    Ok(doc)
}

/// Scenario curve table (`Price, Volume, Revenue, Elasticity`).
pub fn write_curve_csv(path: &Path, points: &[CurvePoint]) -> Result<(), AppError> {
    let mut w = csv::Writer::from_path(path)?;
    for p in points {
        w.serialize(p)?;
    }
    w.flush()?;
    Ok(())
}

pub fn write_promo_scenarios_csv(path: &Path, scenarios: &[PromoScenario]) -> Result<(), AppError> {
    let mut w = csv::Writer::from_path(path)?;
    w.write_record(["ClusterID", "ClusterName", "Centroid", "Price", "Volume", "Revenue", "Elasticity"])?;
    for s in scenarios {
        w.write_record([
            s.cluster_id.to_string(),
            s.name.clone(),
            num(s.discount_pct),
            num(s.point.price),
            num(s.point.volume),
            num(s.point.revenue),
            num(s.point.elasticity),
        ])?;
    }
    w.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Coefficient, GroupKey, ModelKind};

    fn fitted(brand: &str, predictors: &[(&str, f64)]) -> FittedModelRow {
        FittedModelRow {
            group: GroupKey {
                channel: "Grocery".into(),
                values: vec![brand.into()],
            },
            model: ModelKind::Ridge,
            fold: 1,
            intercept: 100.0,
            coefficients: predictors
                .iter()
                .map(|(p, b)| Coefficient {
                    predictor: p.to_string(),
                    beta: *b,
                    mean: 1.0,
                })
                .collect(),
            n_train: 8,
            n_test: 2,
            r2_train: 0.9,
            r2_test: f64::NAN,
            mape_train: 0.1,
            mape_test: 0.2,
            mse_train: 1.0,
            mse_test: 2.0,
            predicted_volume: 50.0,
            self_elasticity: -2.0,
            ppu_at_elasticity: 10.0,
            csf: 1.5,
            mcv: 15.0,
            elasticity_flag: false,
        }
    }

    #[test]
    fn fits_csv_uses_contract_headers_and_blank_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fits.csv");
        let rows = vec![fitted("A", &[("PPU", -5.0), ("B_RPI", -2.0)]), fitted("B", &[("PPU", -3.0), ("D1", 4.0)])];
        write_fits_csv(&path, &[Dimension::Brand], &rows).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Channel,Brand,Model,Fold,B0 (Original),Beta_PPU,Beta_B_RPI,Beta_D1,R2_Train,R2_Test,MAPE_Train,MAPE_Test,MSE_Train,MSE_Test,SelfElasticity,PPU_at_Elasticity,CSF,MCV,ElasticityFlag"
        );
        assert_eq!(lines.next().unwrap(), "Grocery,A,Ridge,1,100,-5,-2,,0.9,,0.1,0.2,1,2,-2,10,1.5,15,false");
    }

    fn modeling_row(brand: &str, week: i64, is_outlier: bool) -> crate::domain::ModelingRow {
        crate::domain::ModelingRow {
            group: GroupKey {
                channel: "Grocery".into(),
                values: vec![brand.into()],
            },
            period: chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::weeks(week),
            sales_value: 1000.0,
            volume: 100.0,
            ppu: 10.0,
            base_price: Some(10.0),
            d1: None,
            filtered_volume: 100.0,
            cat_vol: 300.0,
            net_cat_vol: 200.0,
            cat_weighted_price: 9.0,
            cat_down_up: 0.0,
            cat_price_trend: 0.0,
            cat_seasonality: 0.0,
            is_outlier,
            contribution: 0.5,
            rpi: [("B_RPI".to_string(), 1.25)].into_iter().collect(),
            extras: Default::default(),
        }
    }

    #[test]
    fn modeling_table_writes_outlier_flag_as_digit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.csv");
        let table = ModelingTable {
            group_dims: vec![Dimension::Brand],
            pivot_dims: vec![Dimension::Brand],
            rpi_columns: vec!["B_RPI".into()],
            extra_columns: Vec::new(),
            rows: vec![modeling_row("A", 0, false), modeling_row("A", 1, true)],
        };
        write_modeling_table_csv(&path, &table).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        let col = headers.iter().position(|h| h == COL_IS_OUTLIER).unwrap();
        let flags: Vec<String> = reader.records().map(|r| r.unwrap()[col].to_string()).collect();
        assert_eq!(flags, vec!["0", "1"]);
        assert_eq!(headers.iter().position(|h| h == "D1").map(|i| i + 1), headers.iter().position(|h| h == "B_RPI"));
    }

    #[test]
    fn fits_json_round_trips_nan_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fits.json");
        write_fits_json(&path, &[Dimension::Brand], &[fitted("A", &[("PPU", -5.0)])]).unwrap();
        let doc = read_fits_json(&path).unwrap();
        assert_eq!(doc.group_dims, vec![Dimension::Brand]);
        assert!(doc.rows[0].r2_test.is_nan());
        assert_eq!(doc.rows[0].beta("PPU"), Some(-5.0));
    }

    #[test]
    fn bins_csv_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bins.csv");
        let bins = vec![PromoBin {
            cluster_id: 1,
            channel: "Grocery".into(),
            brand: "A".into(),
            aggregator: "Bottle".into(),
            ppg: "A-1".into(),
            min_pct: 5.0,
            max_pct: 15.0,
            centroid_pct: 10.0,
            name: "Bin1: 5-15%".into(),
        }];
        write_bins_csv(&path, &bins).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Channel,Brand,Aggregator,PPG,ClusterID,Min,Max,Centroid,ClusterName\n"));
        assert_eq!(read_bins_csv(&path).unwrap(), bins);
    }

    #[test]
    fn generated_sample_reads_back_through_ingest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.csv");
        let spec = crate::data::SampleSpec {
            weeks: 10,
            ..crate::data::SampleSpec::default()
        };
        let records = crate::data::generate_transactions(&spec).unwrap();
        write_transactions_csv(&path, &records).unwrap();

        let data = crate::io::load_transactions(&path, crate::domain::VolumeColumn::Auto).unwrap();
        assert!(data.row_errors.is_empty());
        assert_eq!(data.records.len(), records.len());
        assert_eq!(data.records[0].key, records[0].key);
        assert_eq!(data.records[0].date, records[0].date);
        assert!(!data.price_supplied);
    }

    #[test]
    fn curve_csv_leaves_undefined_elasticity_blank() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("curve.csv");
        let points = [
            CurvePoint {
                price: 5.0,
                volume: 10.0,
                revenue: 50.0,
                elasticity: -0.5,
            },
            CurvePoint {
                price: 10.0,
                volume: 0.0,
                revenue: 0.0,
                elasticity: f64::NAN,
            },
        ];
        write_curve_csv(&path, &points).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "Price,Volume,Revenue,Elasticity");
        assert!(lines[1].ends_with(",-0.5"));
        assert!(lines[2].ends_with(','));
    }
}
