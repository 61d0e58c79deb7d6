//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments and loads the layered configuration
//! - initializes logging
//! - runs the requested workbench stages
//! - prints reports
//! - writes optional exports

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{AggregateArgs, AggregationArgs, BasePriceArgs, Cli, Command, FitArgs, InputArgs, PromoBinsArgs, RunArgs, SampleArgs, SimulateArgs};
use crate::config::{LoggingConfig, WorkbenchConfig};
use crate::domain::{DateRange, FittedModelRow, GroupKey, PromoBin};
use crate::error::{AppError, GroupWarning};
use crate::fit::{best_by_group, fit_table};
use crate::io::{export, ingest};
use crate::simulate::{DemandModel, bins_for_group, competitor_what_if, cross_price_curve, promo_bin_scenarios, revenue_max};

pub mod pipeline;

use pipeline::Workbench;

/// How many groups each side of the elasticity ranking shows.
const TOP_N: usize = 5;

/// Entry point for the `rgm` binary.
pub fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let config = WorkbenchConfig::load(cli.config.as_deref())?;
    init_logging(&config.logging);

    match cli.command {
        Command::Sample(args) => handle_sample(args),
        Command::BasePrice(args) => handle_base_price(args, config),
        Command::PromoBins(args) => handle_promo_bins(args, config),
        Command::Aggregate(args) => handle_aggregate(args, config),
        Command::Fit(args) => handle_fit(args, config),
        Command::Simulate(args) => handle_simulate(args, config),
        Command::Run(args) => handle_run(args, config),
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
///
/// Logs go to stderr so reports on stdout stay pipeable.
pub fn init_logging(cfg: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.level));

    let (plain, json) = if cfg.json {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true);
        (None, Some(layer))
    } else {
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_file(false)
            .with_line_number(false);
        (Some(layer), None)
    };

    // Tests and embedding callers may already have installed one.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json)
        .try_init();
}

fn handle_sample(args: SampleArgs) -> Result<(), AppError> {
    let spec = crate::data::SampleSpec {
        weeks: args.weeks,
        seed: args.seed,
        promo_probability: args.promo_probability,
        ..crate::data::SampleSpec::default()
    };
    let records = crate::data::generate_transactions(&spec)?;
    export::write_transactions_csv(&args.out, &records)?;
    println!("Wrote {} transactions to {}", records.len(), args.out.display());
    Ok(())
}

fn handle_base_price(args: BasePriceArgs, mut config: WorkbenchConfig) -> Result<(), AppError> {
    if let Some(w) = args.window {
        config.base_price.window = w;
    }
    if let Some(v) = args.validation_window {
        config.base_price.validation_window = v;
    }
    let mut wb = open_workbench(&args.input, config)?;

    let run = if args.fill_missing {
        wb.fill_missing_base_prices()?.clone()
    } else {
        wb.base_prices(args.force)?.clone()
    };
    let rows = wb.weekly()?;
    println!("{}", crate::report::format_base_price_summary(&run, rows));
    print!("{}", crate::report::format_warnings(&run.warnings));

    if let Some(path) = &args.export {
        export::write_base_price_csv(path, rows)?;
        tracing::info!(path = %path.display(), rows = rows.len(), "base-price table exported");
    }
    Ok(())
}

fn handle_promo_bins(args: PromoBinsArgs, mut config: WorkbenchConfig) -> Result<(), AppError> {
    if let Some(a) = args.aggregator {
        config.promo.aggregator = a;
    }
    if args.k.is_some() {
        config.promo.k = args.k;
    }
    let mut wb = open_workbench(&args.input, config)?;

    let report = wb.promo_bins()?;
    let bins = wb.promo_bins.all_bins();
    println!("{}", crate::report::format_bins(&bins, Some(&report)));
    println!("{}", crate::report::format_bin_summary(&wb.promo_bin_summaries()?));
    print!("{}", crate::report::format_warnings(&report.warnings));

    if let Some(path) = &args.export {
        write_bins(path, &bins)?;
    }
    Ok(())
}

fn handle_aggregate(args: AggregateArgs, mut config: WorkbenchConfig) -> Result<(), AppError> {
    apply_aggregation_args(&mut config, &args.aggregation)?;
    let per_dimension = config.aggregation.per_dimension;
    let mut wb = open_workbench(&args.input, config)?;

    if per_dimension {
        for (dim, run) in wb.modeling_tables_per_dimension()? {
            println!("{}", crate::report::format_aggregation_summary(&run));
            print!("{}", crate::report::format_warnings(&run.warnings));
            if let Some(path) = &args.export {
                export::write_modeling_table_csv(&suffixed(path, dim.column_name()), &run.table)?;
            }
        }
        return Ok(());
    }

    let run = wb.modeling_table(false)?;
    println!("{}", crate::report::format_aggregation_summary(run));
    print!("{}", crate::report::format_warnings(&run.warnings));
    if let Some(path) = &args.export {
        export::write_modeling_table_csv(path, &run.table)?;
    }
    Ok(())
}

fn handle_fit(args: FitArgs, mut config: WorkbenchConfig) -> Result<(), AppError> {
    apply_aggregation_args(&mut config, &args.aggregation)?;
    if !args.models.is_empty() {
        config.fitting.models = args.models.clone();
    }
    if !args.predictors.is_empty() {
        config.fitting.predictors = args.predictors.clone();
    }
    if let Some(k) = args.folds {
        config.fitting.folds = k;
    }
    if !args.standardize.is_empty() {
        config.fitting.standardize = args.standardize.clone();
    }
    config.fitting.exclude_outliers |= args.exclude_outliers;
    config.validate()?;

    let fit_params = config.fitting.clone();
    let per_dimension = config.aggregation.per_dimension;
    let mut wb = open_workbench(&args.input, config)?;

    // (suffix, group dims, modeling warnings, fit run)
    let mut outputs = Vec::new();
    if per_dimension {
        for (dim, run) in wb.modeling_tables_per_dimension()? {
            let fits = fit_table(&run.table, &fit_params)?;
            outputs.push((Some(dim.column_name()), run.table.group_dims.clone(), run.warnings, fits));
        }
    } else {
        let modeling = wb.modeling_table(false)?.clone();
        let fits = wb.fit(false)?.clone();
        outputs.push((None, modeling.table.group_dims, modeling.warnings, fits));
    }

    for (suffix, group_dims, modeling_warnings, fits) in outputs {
        let best = best_by_group(&fits.rows);
        println!("{}", crate::report::format_fit_summary(&fits, &best));
        println!("{}", crate::report::format_rankings(&crate::report::rank_by_elasticity(&best, TOP_N)));
        print!("{}", crate::report::format_warnings(&modeling_warnings));
        print!("{}", crate::report::format_warnings(&fits.warnings));

        if let Some(path) = &args.export {
            let path = suffix.map_or_else(|| path.clone(), |s| suffixed(path, s));
            export::write_fits_csv(&path, &group_dims, &fits.rows)?;
        }
        if let Some(path) = &args.export_json {
            let path = suffix.map_or_else(|| path.clone(), |s| suffixed(path, s));
            export::write_fits_json(&path, &group_dims, &fits.rows)?;
        }
    }
    Ok(())
}

fn handle_simulate(args: SimulateArgs, config: WorkbenchConfig) -> Result<(), AppError> {
    let file = export::read_fits_json(&args.fits)?;
    let row = pick_row(&file.rows, args.row)?;
    let policy = args.policy.unwrap_or(config.simulation.policy);
    let samples = args.samples.unwrap_or(config.simulation.samples);

    let model = DemandModel::from_row(&row, policy).map_err(|e| AppError::numeric(format!("{} / {}: {e}", row.group, row.model.display_name())))?;
    let curve = model.curve(samples).map_err(|e| AppError::usage(e.to_string()))?;
    let best = revenue_max(&curve);
    println!("Group: {} | Model: {} | Fold: {}", row.group, row.model.display_name(), row.fold);
    println!("{}", crate::report::format_curve_summary(&model, &curve, best.as_ref()));

    let price = args.price.unwrap_or(model.mean_ppu);
    if let Some(path) = &args.bins {
        let bins = bins_for_group(&read_bins(path)?, &row.group);
        if bins.is_empty() {
            tracing::warn!(group = %row.group, "no promo bins match this group");
        } else {
            println!("{}", crate::report::format_promo_scenarios(&promo_bin_scenarios(&model, price, &bins)));
        }
    }

    if !args.competitors.is_empty() {
        let overrides: BTreeMap<String, f64> = args.competitors.iter().cloned().collect();
        let what_if = competitor_what_if(&model, price, &overrides).map_err(|e| AppError::usage(e.to_string()))?;
        println!("{}", crate::report::format_what_if(&what_if));
    }

    if let Some(column) = &args.cross {
        let implied = model
            .competitors
            .iter()
            .find(|c| &c.column == column)
            .and_then(|c| c.price)
            .ok_or_else(|| AppError::usage(format!("`{column}` has no implied competitor price in this model.")))?;
        let points = cross_price_curve(&model, column, price, implied * 0.5, implied * 1.5, 21).map_err(|e| AppError::usage(e.to_string()))?;
        println!("{}", crate::report::format_cross_curve(column, &points));
    }

    if let Some(path) = &args.export {
        export::write_curve_csv(path, &curve)?;
    }
    Ok(())
}

fn handle_run(args: RunArgs, config: WorkbenchConfig) -> Result<(), AppError> {
    std::fs::create_dir_all(&args.out_dir)?;
    let out = |name: &str| args.out_dir.join(name);
    let policy = config.simulation.policy;
    let samples = config.simulation.samples;
    let mut wb = open_workbench(&args.input, config)?;
    let mut warnings: Vec<GroupWarning> = Vec::new();

    let base = wb.base_prices(args.force)?.clone();
    warnings.extend(base.warnings.iter().cloned());
    export::write_base_price_csv(&out("base_price.csv"), wb.weekly()?)?;

    let report = wb.promo_bins()?;
    warnings.extend(report.warnings);
    let bins = wb.promo_bins.all_bins();
    export::write_bins_csv(&out("promo_bins.csv"), &bins)?;
    export::write_bins_json(&out("promo_bins.json"), &bins)?;

    let modeling = wb.modeling_table(false)?.clone();
    warnings.extend(modeling.warnings.iter().cloned());
    export::write_modeling_table_csv(&out("modeling_table.csv"), &modeling.table)?;

    let fits = wb.fit(false)?.clone();
    warnings.extend(fits.warnings.iter().cloned());
    export::write_fits_csv(&out("fits.csv"), &modeling.table.group_dims, &fits.rows)?;
    export::write_fits_json(&out("fits.json"), &modeling.table.group_dims, &fits.rows)?;
    wb.save_fits(false)?;

    let best = wb.best_models()?;
    println!("{}", crate::report::format_fit_summary(&fits, &best));
    println!("{}", crate::report::format_rankings(&crate::report::rank_by_elasticity(&best, TOP_N)));

    let mut curves = 0;
    for (group, choice) in &best {
        let model = match DemandModel::from_row(&choice.row, policy) {
            Ok(m) => m,
            Err(e) => {
                warnings.push(GroupWarning::new(crate::error::Stage::Fitting, group.to_string(), format!("no scenario curve: {e}")));
                continue;
            }
        };
        let curve = model.curve(samples).map_err(|e| AppError::usage(e.to_string()))?;
        export::write_curve_csv(&out(&format!("curve_{}.csv", slug(group))), &curve)?;
        let group_bins = bins_for_group(&bins, group);
        if !group_bins.is_empty() {
            let scenarios = promo_bin_scenarios(&model, model.mean_ppu, &group_bins);
            export::write_promo_scenarios_csv(&out(&format!("promo_scenarios_{}.csv", slug(group))), &scenarios)?;
        }
        curves += 1;
    }

    print!("{}", crate::report::format_warnings(&warnings));
    println!("Wrote artifacts to {} ({curves} scenario curves)", args.out_dir.display());
    Ok(())
}

/// Ingest, print the ingest summary and apply the date filter.
fn open_workbench(input: &InputArgs, mut config: WorkbenchConfig) -> Result<Workbench, AppError> {
    if let Some(v) = input.volume_column {
        config.aggregation.volume_column = v;
    }
    config.validate()?;
    if let (Some(s), Some(e)) = (input.start, input.end) {
        if s > e {
            return Err(AppError::usage(format!("--start {s} is after --end {e}.")));
        }
    }

    let data = ingest::load_transactions(&input.file, config.aggregation.volume_column)?;
    println!("{}", crate::report::format_ingest_summary(&data));

    let mut wb = Workbench::new(data, config);
    wb.set_date_range(DateRange {
        start: input.start,
        end: input.end,
    });
    Ok(wb)
}

/// CLI grouping flags over the configured grouping. When only `--group` is
/// given, the pivot falls back to its first dimension.
fn apply_aggregation_args(config: &mut WorkbenchConfig, args: &AggregationArgs) -> Result<(), AppError> {
    let agg = &mut config.aggregation;
    if !args.group.is_empty() {
        agg.group_dims = args.group.clone();
    }
    if !args.pivot.is_empty() {
        agg.pivot_dims = args.pivot.clone();
    } else if !args.group.is_empty() && !agg.pivot_dims.iter().all(|d| agg.group_dims.contains(d)) {
        agg.pivot_dims = agg.group_dims.iter().take(1).copied().collect();
    }
    agg.smoothing &= !args.no_smoothing;
    agg.ratio_mode |= args.ratio;
    agg.per_dimension |= args.per_dimension;
    crate::aggregate::validate_dimensions(&agg.group_dims, &agg.pivot_dims)
}

/// Explicit row index, else the best model of the first group, else row 0.
fn pick_row(rows: &[FittedModelRow], index: Option<usize>) -> Result<FittedModelRow, AppError> {
    if let Some(i) = index {
        return rows
            .get(i)
            .cloned()
            .ok_or_else(|| AppError::usage(format!("--row {i} is out of range (file has {} rows).", rows.len())));
    }
    best_by_group(rows)
        .into_values()
        .next()
        .map(|b| b.row)
        .or_else(|| rows.first().cloned())
        .ok_or_else(|| AppError::insufficient("Fits file has no rows."))
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

fn write_bins(path: &Path, bins: &[PromoBin]) -> Result<(), AppError> {
    if is_json(path) { export::write_bins_json(path, bins) } else { export::write_bins_csv(path, bins) }
}

fn read_bins(path: &Path) -> Result<Vec<PromoBin>, AppError> {
    if is_json(path) { export::read_bins_json(path) } else { export::read_bins_csv(path) }
}

/// `fits.csv` + `Brand` -> `fits_Brand.csv`.
fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}_{suffix}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{suffix}"),
    };
    path.with_file_name(name)
}

/// File-name-safe group label.
fn slug(group: &GroupKey) -> String {
    let raw = std::iter::once(group.channel.as_str())
        .chain(group.values.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join("_");
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Dimension;

    #[test]
    fn suffix_goes_before_extension() {
        assert_eq!(suffixed(Path::new("out/fits.csv"), "Brand"), PathBuf::from("out/fits_Brand.csv"));
        assert_eq!(suffixed(Path::new("table"), "PPG"), PathBuf::from("table_PPG"));
    }

    #[test]
    fn slug_is_file_safe() {
        let g = GroupKey {
            channel: "Grocery".into(),
            values: vec!["Alpha".into(), "6x330ml Pack".into()],
        };
        assert_eq!(slug(&g), "Grocery_Alpha_6x330ml_Pack");
    }

    #[test]
    fn group_flag_alone_pivots_on_its_first_dimension() {
        let mut config = WorkbenchConfig::default();
        let args = AggregationArgs {
            group: vec![Dimension::PackType, Dimension::PackSize],
            no_smoothing: true,
            ..AggregationArgs::default()
        };
        apply_aggregation_args(&mut config, &args).unwrap();
        assert_eq!(config.aggregation.pivot_dims, vec![Dimension::PackType]);
        assert!(!config.aggregation.smoothing);

        let bad = AggregationArgs {
            group: vec![Dimension::Brand],
            pivot: vec![Dimension::Ppg],
            ..AggregationArgs::default()
        };
        assert_eq!(apply_aggregation_args(&mut WorkbenchConfig::default(), &bad).unwrap_err().exit_code(), 2);
    }

    #[test]
    fn explicit_row_index_is_bounds_checked() {
        let rows = vec![crate::simulate::test_support::fitted_row()];
        assert!(pick_row(&rows, Some(0)).is_ok());
        assert_eq!(pick_row(&rows, Some(3)).unwrap_err().exit_code(), 2);
        assert_eq!(pick_row(&rows, None).unwrap().group.values, vec!["A".to_string()]);
    }

    #[test]
    fn sample_and_run_write_every_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("tx.csv");
        handle_sample(SampleArgs {
            out: csv.clone(),
            weeks: 60,
            seed: 7,
            promo_probability: 0.15,
        })
        .unwrap();

        let mut config = WorkbenchConfig::default();
        config.fitting.models = vec![crate::domain::ModelKind::ConstrainedLinear];
        config.fitting.folds = 3;
        let out_dir = dir.path().join("out");
        handle_run(
            RunArgs {
                input: InputArgs {
                    file: csv,
                    start: None,
                    end: None,
                    volume_column: None,
                },
                out_dir: out_dir.clone(),
                force: false,
            },
            config,
        )
        .unwrap();

        for name in ["base_price.csv", "promo_bins.csv", "promo_bins.json", "modeling_table.csv", "fits.csv", "fits.json"] {
            assert!(out_dir.join(name).exists(), "{name}");
        }
        let fits = export::read_fits_json(&out_dir.join("fits.json")).unwrap();
        assert_eq!(fits.group_dims, vec![Dimension::Brand]);
    }
}
