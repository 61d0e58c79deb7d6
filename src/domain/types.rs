//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory while each stage runs
//! - exported to CSV/JSON
//! - reloaded later (fitted models feed the simulator)

use std::collections::BTreeMap;
use std::fmt;

use chrono::{Datelike, NaiveDate};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Own unit price column.
pub const COL_PPU: &str = "PPU";
/// Distribution metric, constrained to a non-negative coefficient.
pub const COL_D1: &str = "D1";
/// Suffix of every competitor relative-price-index column.
pub const RPI_SUFFIX: &str = "_RPI";
pub const COL_VOLUME: &str = "Volume";
pub const COL_SALES_VALUE: &str = "SalesValue";
pub const COL_BASE_PRICE: &str = "BasePrice";
pub const COL_FILTERED_VOLUME: &str = "FilteredVolume";
pub const COL_CAT_VOL: &str = "CatVol";
pub const COL_NET_CAT_VOL: &str = "NetCatVol";
pub const COL_CAT_WEIGHTED_PRICE: &str = "Cat_Weighted_Price";
pub const COL_CAT_DOWN_UP: &str = "Cat_Down_Up";
pub const COL_CAT_PRICE_TREND: &str = "Cat_Price_trend_over_time";
pub const COL_CAT_SEASONALITY: &str = "CatSeasonality";
pub const COL_IS_OUTLIER: &str = "is_outlier";
pub const COL_CONTRIBUTION: &str = "Contribution";

/// True when `name` is a competitor RPI column.
pub fn is_rpi_column(name: &str) -> bool {
    name.ends_with(RPI_SUFFIX)
}

/// Product hierarchy dimensions an analysis can group or pivot on.
///
/// `Channel` is not listed: every grouping is implicitly per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Brand,
    Variant,
    PackType,
    PackSize,
    Ppg,
}

impl Dimension {
    /// Column name in input/output tables.
    pub fn column_name(self) -> &'static str {
        match self {
            Dimension::Brand => "Brand",
            Dimension::Variant => "Variant",
            Dimension::PackType => "PackType",
            Dimension::PackSize => "PackSize",
            Dimension::Ppg => "PPG",
        }
    }
}

/// Full product/channel identity of a transaction.
///
/// Optional hierarchy levels missing from the input are stored as empty strings
/// so every record answers every [`Dimension`].
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub channel: String,
    pub brand: String,
    pub variant: String,
    pub pack_type: String,
    pub pack_size: String,
    pub ppg: String,
}

impl EntityKey {
    pub fn get(&self, dim: Dimension) -> &str {
        match dim {
            Dimension::Brand => &self.brand,
            Dimension::Variant => &self.variant,
            Dimension::PackType => &self.pack_type,
            Dimension::PackSize => &self.pack_size,
            Dimension::Ppg => &self.ppg,
        }
    }

    /// Project onto a grouping: channel plus the requested dimension values.
    pub fn group_key(&self, dims: &[Dimension]) -> GroupKey {
        GroupKey {
            channel: self.channel.clone(),
            values: dims.iter().map(|&d| self.get(d).to_string()).collect(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {} | {}", self.channel, self.brand, self.ppg)?;
        for part in [&self.variant, &self.pack_type, &self.pack_size] {
            if !part.is_empty() {
                write!(f, " | {part}")?;
            }
        }
        Ok(())
    }
}

/// Channel plus the values of the analysis grouping dimensions.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub channel: String,
    pub values: Vec<String>,
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.channel)?;
        for v in &self.values {
            write!(f, " | {v}")?;
        }
        Ok(())
    }
}

/// Promo-bin configuration scope: (Channel, Brand, Aggregator value, PPG).
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ComboKey {
    pub channel: String,
    pub brand: String,
    pub aggregator: String,
    pub ppg: String,
}

impl ComboKey {
    pub fn from_entity(key: &EntityKey, aggregator: Dimension) -> Self {
        Self {
            channel: key.channel.clone(),
            brand: key.brand.clone(),
            aggregator: key.get(aggregator).to_string(),
            ppg: key.ppg.clone(),
        }
    }
}

impl fmt::Display for ComboKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {} | {} | {}", self.channel, self.brand, self.aggregator, self.ppg)
    }
}

/// Time granularity of the aggregated series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// Dates are floored to the Monday of their ISO week.
    Weekly,
    /// Dates are kept as-is.
    Daily,
}

impl Granularity {
    pub fn period_of(self, date: NaiveDate) -> NaiveDate {
        match self {
            Granularity::Daily => date,
            Granularity::Weekly => {
                let offset = date.weekday().num_days_from_monday() as i64;
                date - chrono::Duration::days(offset)
            }
        }
    }
}

/// Which column supplies volume when the input carries both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum VolumeColumn {
    /// Prefer `Volume`, fall back to `VolumeUnits`.
    Auto,
    Volume,
    VolumeUnits,
}

/// Inclusive date filter applied before any stage runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub const ALL: DateRange = DateRange { start: None, end: None };

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.is_none_or(|s| date >= s) && self.end.is_none_or(|e| date <= e)
    }
}

/// A single normalized input row.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    pub key: EntityKey,
    pub date: NaiveDate,
    pub sales_value: f64,
    pub volume: f64,
    pub price: Option<f64>,
    pub base_price: Option<f64>,
    pub d1: Option<f64>,
    /// Any other numeric input columns, merged back onto the modeling table.
    pub extras: BTreeMap<String, f64>,
}

/// Entity × period aggregate. `BasePrice`/`IsTransition` are filled by the
/// base-price estimator.
#[derive(Debug, Clone, PartialEq)]
pub struct WeeklyAggregate {
    pub key: EntityKey,
    pub period: NaiveDate,
    pub sales_value: f64,
    pub volume: f64,
    pub price: Option<f64>,
    pub base_price: Option<f64>,
    pub is_transition: bool,
    pub d1: Option<f64>,
    pub extras: BTreeMap<String, f64>,
}

impl WeeklyAggregate {
    pub fn year(&self) -> i32 {
        self.period.iso_week().year()
    }

    pub fn month(&self) -> u32 {
        self.period.month()
    }

    pub fn week(&self) -> u32 {
        self.period.iso_week().week()
    }

    /// Fractional discount below base price, clipped to `[0, 1]`.
    ///
    /// `None` when either price is missing or the base price is not positive.
    pub fn discount(&self) -> Option<f64> {
        let base = self.base_price?;
        let price = self.price?;
        if !(base.is_finite() && price.is_finite()) || base <= 0.0 {
            return None;
        }
        Some(((base - price) / base).clamp(0.0, 1.0))
    }
}

/// A named promotional depth bin for one combo. Percentages are in `[0, 100]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromoBin {
    #[serde(rename = "ClusterID")]
    pub cluster_id: usize,
    #[serde(rename = "Channel")]
    pub channel: String,
    #[serde(rename = "Brand")]
    pub brand: String,
    #[serde(rename = "Aggregator")]
    pub aggregator: String,
    #[serde(rename = "PPG")]
    pub ppg: String,
    #[serde(rename = "Min")]
    pub min_pct: f64,
    #[serde(rename = "Max")]
    pub max_pct: f64,
    #[serde(rename = "Centroid")]
    pub centroid_pct: f64,
    #[serde(rename = "ClusterName")]
    pub name: String,
}

impl PromoBin {
    pub fn combo(&self) -> ComboKey {
        ComboKey {
            channel: self.channel.clone(),
            brand: self.brand.clone(),
            aggregator: self.aggregator.clone(),
            ppg: self.ppg.clone(),
        }
    }

    pub fn contains(&self, pct: f64) -> bool {
        pct >= self.min_pct && pct <= self.max_pct
    }
}

/// One entity-group × period row of the modeling table.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelingRow {
    pub group: GroupKey,
    pub period: NaiveDate,
    pub sales_value: f64,
    pub volume: f64,
    pub ppu: f64,
    pub base_price: Option<f64>,
    pub d1: Option<f64>,
    pub filtered_volume: f64,
    pub cat_vol: f64,
    pub net_cat_vol: f64,
    pub cat_weighted_price: f64,
    pub cat_down_up: f64,
    pub cat_price_trend: f64,
    pub cat_seasonality: f64,
    pub is_outlier: bool,
    pub contribution: f64,
    /// `<competitor>_RPI` columns.
    pub rpi: BTreeMap<String, f64>,
    pub extras: BTreeMap<String, f64>,
}

impl ModelingRow {
    /// Look a column up by its exact contract name.
    pub fn value(&self, column: &str) -> Option<f64> {
        match column {
            COL_PPU => Some(self.ppu),
            COL_VOLUME => Some(self.volume),
            COL_SALES_VALUE => Some(self.sales_value),
            COL_BASE_PRICE => self.base_price,
            COL_D1 => self.d1,
            COL_FILTERED_VOLUME => Some(self.filtered_volume),
            COL_CAT_VOL => Some(self.cat_vol),
            COL_NET_CAT_VOL => Some(self.net_cat_vol),
            COL_CAT_WEIGHTED_PRICE => Some(self.cat_weighted_price),
            COL_CAT_DOWN_UP => Some(self.cat_down_up),
            COL_CAT_PRICE_TREND => Some(self.cat_price_trend),
            COL_CAT_SEASONALITY => Some(self.cat_seasonality),
            COL_IS_OUTLIER => Some(if self.is_outlier { 1.0 } else { 0.0 }),
            COL_CONTRIBUTION => Some(self.contribution),
            other if is_rpi_column(other) => self.rpi.get(other).copied(),
            other => self.extras.get(other).copied(),
        }
    }
}

/// Output of the aggregation pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelingTable {
    pub group_dims: Vec<Dimension>,
    pub pivot_dims: Vec<Dimension>,
    pub rpi_columns: Vec<String>,
    pub extra_columns: Vec<String>,
    pub rows: Vec<ModelingRow>,
}

impl ModelingTable {
    /// Every column name a predictor may refer to.
    pub fn columns(&self) -> Vec<String> {
        let mut out: Vec<String> = [
            COL_PPU,
            COL_VOLUME,
            COL_SALES_VALUE,
            COL_BASE_PRICE,
            COL_D1,
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
        .map(|s| s.to_string())
        .collect();
        out.extend(self.rpi_columns.iter().cloned());
        out.extend(self.extra_columns.iter().cloned());
        out
    }

    /// Distinct groups in sorted order.
    pub fn groups(&self) -> Vec<GroupKey> {
        let mut groups: Vec<GroupKey> = self.rows.iter().map(|r| r.group.clone()).collect();
        groups.sort();
        groups.dedup();
        groups
    }
}

/// Regression model variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Ols,
    Ridge,
    Lasso,
    ElasticNet,
    BayesianRidge,
    /// Gradient descent with sign constraints (projection after each step).
    ConstrainedLinear,
    /// Constrained gradient descent with an L2 penalty.
    ConstrainedRidge,
}

impl ModelKind {
    pub const ALL: [ModelKind; 7] = [
        ModelKind::Ols,
        ModelKind::Ridge,
        ModelKind::Lasso,
        ModelKind::ElasticNet,
        ModelKind::BayesianRidge,
        ModelKind::ConstrainedLinear,
        ModelKind::ConstrainedRidge,
    ];

    /// Human-readable label (also the `Model` column in exports).
    pub fn display_name(self) -> &'static str {
        match self {
            ModelKind::Ols => "Linear Regression",
            ModelKind::Ridge => "Ridge",
            ModelKind::Lasso => "Lasso",
            ModelKind::ElasticNet => "ElasticNet",
            ModelKind::BayesianRidge => "Bayesian Ridge",
            ModelKind::ConstrainedLinear => "Custom Constrained Linear Regression",
            ModelKind::ConstrainedRidge => "Constrained Ridge",
        }
    }

    pub fn is_constrained(self) -> bool {
        matches!(self, ModelKind::ConstrainedLinear | ModelKind::ConstrainedRidge)
    }
}

/// One fitted coefficient, reported in original (unstandardized) units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coefficient {
    pub predictor: String,
    pub beta: f64,
    /// Group mean of the predictor (elasticity evaluation point).
    pub mean: f64,
}

/// One row per group × model × fold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedModelRow {
    pub group: GroupKey,
    pub model: ModelKind,
    pub fold: usize,
    pub intercept: f64,
    pub coefficients: Vec<Coefficient>,
    pub n_train: usize,
    pub n_test: usize,
    #[serde(with = "nan_as_null")]
    pub r2_train: f64,
    #[serde(with = "nan_as_null")]
    pub r2_test: f64,
    #[serde(with = "nan_as_null")]
    pub mape_train: f64,
    #[serde(with = "nan_as_null")]
    pub mape_test: f64,
    #[serde(with = "nan_as_null")]
    pub mse_train: f64,
    #[serde(with = "nan_as_null")]
    pub mse_test: f64,
    /// Predicted volume at the group means.
    #[serde(with = "nan_as_null")]
    pub predicted_volume: f64,
    #[serde(with = "nan_as_null")]
    pub self_elasticity: f64,
    #[serde(with = "nan_as_null")]
    pub ppu_at_elasticity: f64,
    #[serde(with = "nan_as_null")]
    pub csf: f64,
    #[serde(with = "nan_as_null")]
    pub mcv: f64,
    pub elasticity_flag: bool,
}

impl FittedModelRow {
    pub fn beta(&self, predictor: &str) -> Option<f64> {
        self.coefficients
            .iter()
            .find(|c| c.predictor == predictor)
            .map(|c| c.beta)
    }
}

/// One sample of a simulated demand/revenue curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    #[serde(rename = "Price")]
    pub price: f64,
    #[serde(rename = "Volume")]
    pub volume: f64,
    #[serde(rename = "Revenue")]
    pub revenue: f64,
    #[serde(rename = "Elasticity", with = "nan_as_null")]
    pub elasticity: f64,
}

/// Result of writing into a keyed store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Inserted,
    /// An existing entry was overwritten (`force` was set).
    Replaced,
    /// An entry already existed and `force` was not set.
    Kept,
}

/// JSON has no NaN: write non-finite floats as `null` and read `null` back as NaN.
pub(crate) mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &f64, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if value.is_finite() {
            s.serialize_f64(*value)
        } else {
            s.serialize_none()
        }
    }

    pub fn deserialize<'de, D>(d: D) -> Result<f64, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<f64>::deserialize(d)?.unwrap_or(f64::NAN))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weekly_granularity_floors_to_monday() {
        let thu = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        let mon = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        assert_eq!(Granularity::Weekly.period_of(thu), mon);
        assert_eq!(Granularity::Daily.period_of(thu), thu);
    }

    #[test]
    fn discount_is_clipped_and_guarded() {
        let mut row = WeeklyAggregate {
            key: EntityKey::default(),
            period: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            sales_value: 0.0,
            volume: 0.0,
            price: Some(8.0),
            base_price: Some(10.0),
            is_transition: false,
            d1: None,
            extras: BTreeMap::new(),
        };
        assert!((row.discount().unwrap() - 0.2).abs() < 1e-12);

        row.price = Some(12.0);
        assert_eq!(row.discount(), Some(0.0));

        row.base_price = Some(0.0);
        assert_eq!(row.discount(), None);
    }

    #[test]
    fn modeling_row_lookup_by_contract_name() {
        let mut rpi = BTreeMap::new();
        rpi.insert("B_RPI".to_string(), 0.9);
        let row = ModelingRow {
            group: GroupKey::default(),
            period: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            sales_value: 100.0,
            volume: 10.0,
            ppu: 10.0,
            base_price: None,
            d1: Some(0.8),
            filtered_volume: 9.5,
            cat_vol: 50.0,
            net_cat_vol: 40.0,
            cat_weighted_price: 9.0,
            cat_down_up: 9.0,
            cat_price_trend: 9.0,
            cat_seasonality: 12.0,
            is_outlier: true,
            contribution: 0.2,
            rpi,
            extras: BTreeMap::new(),
        };
        assert_eq!(row.value("PPU"), Some(10.0));
        assert_eq!(row.value("B_RPI"), Some(0.9));
        assert_eq!(row.value("C_RPI"), None);
        assert_eq!(row.value("is_outlier"), Some(1.0));
        assert_eq!(row.value("D1"), Some(0.8));
    }

    #[test]
    fn nan_metrics_survive_json() {
        let p = CurvePoint { price: 1.0, volume: 2.0, revenue: 2.0, elasticity: f64::NAN };
        let json = serde_json::to_string(&p).unwrap();
        assert!(json.contains("\"Elasticity\":null"));
        let back: CurvePoint = serde_json::from_str(&json).unwrap();
        assert!(back.elasticity.is_nan());
    }
}
