//! CSV ingest and normalization.
//!
//! This module turns a retail transaction export into clean
//! [`TransactionRecord`]s.
//!
//! Design goals:
//! - **Strict schema** for required fields (clear errors + exit code 2)
//! - **Forgiving headers**: `Sales Value`, `sales_value` and `SalesValue` are the same column
//! - **Row-level validation** (skip bad rows, but report what happened)
//! - **Separation of concerns**: no aggregation logic here

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{NaiveDate, Weekday};
use csv::StringRecord;

use crate::domain::{EntityKey, TransactionRecord, VolumeColumn};
use crate::error::AppError;

/// A row-level error encountered during ingest.
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

/// How the period of each row is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeColumns {
    Date(usize),
    /// ISO year + ISO week; the period is that week's Monday.
    YearWeek { year: usize, week: usize },
}

/// Ingest output: normalized records + what the input carried + row errors.
#[derive(Debug, Clone)]
pub struct IngestedData {
    pub records: Vec<TransactionRecord>,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
    /// Some row carried a `Price` (weekly price is then the mean of row prices).
    pub price_supplied: bool,
    pub base_price_supplied: bool,
    /// Header the volume was read from.
    pub volume_source: String,
    /// Extra numeric columns, in input order.
    pub extra_columns: Vec<String>,
}

impl IngestedData {
    pub fn rows_used(&self) -> usize {
        self.records.len()
    }
}

const KNOWN: [&str; 16] = [
    "channel",
    "brand",
    "variant",
    "packtype",
    "packsize",
    "ppg",
    "date",
    "year",
    "month",
    "week",
    "salesvalue",
    "volume",
    "volumeunits",
    "price",
    "baseprice",
    "d1",
];

/// Load and normalize a transaction CSV from disk.
pub fn load_transactions(path: &Path, volume_column: VolumeColumn) -> Result<IngestedData, AppError> {
    let file = File::open(path).map_err(|e| AppError::usage(format!("Failed to open CSV '{}': {e}", path.display())))?;
    let data = read_transactions(file, volume_column)?;
    tracing::info!(
        path = %path.display(),
        rows_read = data.rows_read,
        rows_used = data.rows_used(),
        row_errors = data.row_errors.len(),
        "loaded transactions"
    );
    Ok(data)
}

/// Normalize transactions from any CSV reader.
pub fn read_transactions<R: Read>(reader: R, volume_column: VolumeColumn) -> Result<IngestedData, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    let header_map = build_header_map(&headers);

    for required in ["channel", "brand", "ppg", "salesvalue"] {
        if !header_map.contains_key(required) {
            return Err(AppError::MissingColumn(display_name(required).to_string()));
        }
    }
    let (volume_idx, volume_source) = resolve_volume_column(volume_column, &header_map)?;
    let time = resolve_time_columns(&header_map)?;

    let extra_idx: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(_, name)| !KNOWN.contains(&normalize_header_name(name).as_str()))
        .map(|(idx, name)| (idx, clean_header(name).to_string()))
        .filter(|(_, name)| !name.is_empty())
        .collect();

    let mut records = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        // records() starts after the header line; CSV lines are 1-based.
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        match parse_row(&record, &header_map, volume_idx, time, &extra_idx) {
            Ok(row) => records.push(row),
            Err(message) => row_errors.push(RowError { line, message }),
        }
    }

    if records.is_empty() {
        return Err(AppError::insufficient("No valid rows remain after normalization."));
    }

    let extra_columns = extra_idx
        .into_iter()
        .map(|(_, name)| name)
        .filter(|name| records.iter().any(|r| r.extras.contains_key(name)))
        .collect();

    let price_supplied = records.iter().any(|r| r.price.is_some());
    let base_price_supplied = records.iter().any(|r| r.base_price.is_some());
    Ok(IngestedData {
        records,
        row_errors,
        rows_read,
        price_supplied,
        base_price_supplied,
        volume_source: volume_source.to_string(),
        extra_columns,
    })
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    let mut map = HashMap::new();
    for (idx, name) in headers.iter().enumerate() {
        map.entry(normalize_header_name(name)).or_insert(idx);
    }
    map
}

fn clean_header(name: &str) -> &str {
    // Spreadsheet exports often prefix the first header with a UTF-8 BOM.
    name.trim().trim_start_matches('\u{feff}')
}

/// Case-, space- and underscore-insensitive header key.
fn normalize_header_name(name: &str) -> String {
    clean_header(name)
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

fn display_name(key: &str) -> &'static str {
    match key {
        "channel" => "Channel",
        "brand" => "Brand",
        "ppg" => "PPG",
        "salesvalue" => "SalesValue",
        "volume" => "Volume",
        "volumeunits" => "VolumeUnits",
        _ => "Date",
    }
}

fn resolve_volume_column(choice: VolumeColumn, header_map: &HashMap<String, usize>) -> Result<(usize, &'static str), AppError> {
    let pick = |key: &str| header_map.get(key).map(|&idx| (idx, display_name(key)));
    let resolved = match choice {
        VolumeColumn::Volume => pick("volume"),
        VolumeColumn::VolumeUnits => pick("volumeunits"),
        VolumeColumn::Auto => pick("volume").or_else(|| pick("volumeunits")),
    };
    resolved.ok_or_else(|| {
        AppError::MissingColumn(match choice {
            VolumeColumn::VolumeUnits => "VolumeUnits".to_string(),
            VolumeColumn::Volume => "Volume".to_string(),
            VolumeColumn::Auto => "Volume` or `VolumeUnits".to_string(),
        })
    })
}

fn resolve_time_columns(header_map: &HashMap<String, usize>) -> Result<TimeColumns, AppError> {
    if let Some(&idx) = header_map.get("date") {
        return Ok(TimeColumns::Date(idx));
    }
    match (header_map.get("year"), header_map.get("week"), header_map.get("month")) {
        (Some(&year), Some(&week), _) => Ok(TimeColumns::YearWeek { year, week }),
        (Some(_), None, Some(_)) => Err(AppError::usage(
            "Year+Month without Week cannot resolve a weekly period; add a `Week` or `Date` column.",
        )),
        _ => Err(AppError::usage("Missing time columns: need `Date`, or `Year` + `Week`.")),
    }
}

fn parse_row(
    record: &StringRecord,
    header_map: &HashMap<String, usize>,
    volume_idx: usize,
    time: TimeColumns,
    extras: &[(usize, String)],
) -> Result<TransactionRecord, String> {
    let key = EntityKey {
        channel: get_required(record, header_map, "channel")?.to_string(),
        brand: get_required(record, header_map, "brand")?.to_string(),
        variant: get_optional(record, header_map, "variant").unwrap_or_default().to_string(),
        pack_type: get_optional(record, header_map, "packtype").unwrap_or_default().to_string(),
        pack_size: get_optional(record, header_map, "packsize").unwrap_or_default().to_string(),
        ppg: get_required(record, header_map, "ppg")?.to_string(),
    };

    let date = match time {
        TimeColumns::Date(idx) => parse_date(field(record, idx).ok_or("Missing required value: `Date`")?)?,
        TimeColumns::YearWeek { year, week } => {
            let year = parse_int(field(record, year), "Year")?;
            let week = parse_int(field(record, week), "Week")?;
            u32::try_from(week)
                .ok()
                .and_then(|w| NaiveDate::from_isoywd_opt(year, w, Weekday::Mon))
                .ok_or_else(|| format!("Invalid ISO week {year}-W{week}."))?
        }
    };

    let sales_value = parse_opt_f64(get_optional(record, header_map, "salesvalue")).ok_or("Missing/invalid `SalesValue` value.")?;
    let volume = parse_opt_f64(field(record, volume_idx)).ok_or("Missing/invalid volume value.")?;

    let extras: BTreeMap<String, f64> = extras
        .iter()
        .filter_map(|(idx, name)| parse_opt_f64(field(record, *idx)).map(|v| (name.clone(), v)))
        .collect();

    Ok(TransactionRecord {
        key,
        date,
        sales_value,
        volume,
        price: parse_opt_f64(get_optional(record, header_map, "price")),
        base_price: parse_opt_f64(get_optional(record, header_map, "baseprice")),
        d1: parse_opt_f64(get_optional(record, header_map, "d1")),
        extras,
    })
}

fn field(record: &StringRecord, idx: usize) -> Option<&str> {
    record.get(idx).map(str::trim).filter(|s| !s.is_empty())
}

fn get_required<'a>(record: &'a StringRecord, header_map: &HashMap<String, usize>, name: &str) -> Result<&'a str, String> {
    let idx = header_map
        .get(name)
        .ok_or_else(|| format!("Missing required column: `{}`", display_name(name)))?;
    field(record, *idx).ok_or_else(|| format!("Missing required value: `{}`", display_name(name)))
}

fn get_optional<'a>(record: &'a StringRecord, header_map: &HashMap<String, usize>, name: &str) -> Option<&'a str> {
    let idx = header_map.get(name)?;
    field(record, *idx)
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    const FMTS: [&str; 4] = ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%Y/%m/%d"];
    for fmt in FMTS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
    }
    Err(format!(
        "Invalid date '{s}'. Expected one of: YYYY-MM-DD, DD/MM/YYYY, DD-MM-YYYY, YYYY/MM/DD."
    ))
}

fn parse_int(s: Option<&str>, name: &str) -> Result<i32, String> {
    let s = s.ok_or_else(|| format!("Missing required value: `{name}`"))?;
    // Spreadsheet exports write whole numbers as `2024.0`.
    let v: f64 = s.parse().map_err(|_| format!("Invalid `{name}` value '{s}'."))?;
    if v.fract() != 0.0 || !v.is_finite() {
        return Err(format!("Invalid `{name}` value '{s}'."));
    }
    Ok(v as i32)
}

fn parse_opt_f64(s: Option<&str>) -> Option<f64> {
    let s = s?;
    let v = s.replace(',', "").parse::<f64>().ok()?;
    if v.is_finite() { Some(v) } else { None }
}
