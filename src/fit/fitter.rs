//! Per-group model fitting with k-fold cross-validation.
//!
//! For every group of the modeling table:
//!
//! 1. resolve the desired predictors against what the group actually has
//!    (present, finite, non-constant)
//! 2. split rows into shuffled folds (same split for every model)
//! 3. for each model × fold: optional fold-local standardization, fit, map
//!    coefficients back to original units, score train/test
//! 4. evaluate elasticity metrics at the group means
//!
//! Groups are processed in parallel; the output is sorted by group, model
//! name and fold so it does not depend on scheduling.

use std::collections::BTreeSet;

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use crate::domain::{COL_PPU, Coefficient, FitParams, FittedModelRow, GroupKey, ModelKind, ModelingRow, ModelingTable, RPI_WILDCARD};
use crate::error::{AppError, GroupWarning, Stage};
use crate::fit::cv::{FoldSplit, StandardScaler, back_transform, kfold_splits};
use crate::fit::elasticity::elasticity_at_means;
use crate::fit::regressors::{FitError, LinearFit, fit_regressor};
use crate::math::{mape, mean, mse, r2_score, std_dev};

/// All fitted rows plus the groups/models that were skipped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitRun {
    pub rows: Vec<FittedModelRow>,
    pub warnings: Vec<GroupWarning>,
}

/// Expand `*_RPI` and de-duplicate, keeping the requested order.
pub fn resolve_predictors(desired: &[String], table: &ModelingTable) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for name in desired {
        let expanded: Vec<String> = if name == RPI_WILDCARD {
            table.rpi_columns.clone()
        } else {
            vec![name.clone()]
        };
        for column in expanded {
            if seen.insert(column.clone()) {
                out.push(column);
            }
        }
    }
    out
}

/// Group design after capability checks.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupDesign {
    pub predictors: Vec<String>,
    pub x: DMatrix<f64>,
    pub y: DVector<f64>,
    pub means: Vec<f64>,
    pub mean_ppu: f64,
}

/// Build the design for one group.
///
/// A candidate predictor must be defined on every row of the group; rows with
/// a non-finite target or predictor value are dropped, then constant
/// predictors are removed.
pub fn group_design(rows: &[&ModelingRow], candidates: &[String], params: &FitParams) -> Result<GroupDesign, FitError> {
    let rows: Vec<&ModelingRow> = rows
        .iter()
        .copied()
        .filter(|r| !(params.exclude_outliers && r.is_outlier))
        .collect();

    let present: Vec<&String> = candidates
        .iter()
        .filter(|c| rows.iter().all(|r| r.value(c).is_some()))
        .collect();

    let usable_rows: Vec<&ModelingRow> = rows
        .into_iter()
        .filter(|r| {
            r.value(&params.target).is_some_and(f64::is_finite)
                && r.ppu.is_finite()
                && present.iter().all(|c| r.value(c).is_some_and(f64::is_finite))
        })
        .collect();

    let predictors: Vec<String> = present
        .into_iter()
        .filter(|c| {
            let values: Vec<f64> = usable_rows.iter().filter_map(|r| r.value(c)).collect();
            let s = std_dev(&values);
            s.is_finite() && s > 0.0
        })
        .cloned()
        .collect();

    if predictors.len() < params.min_predictors.max(1) {
        return Err(FitError::TooFewPredictors {
            found: predictors.len(),
            required: params.min_predictors.max(1),
        });
    }

    let n = usable_rows.len();
    let p = predictors.len();
    let x = DMatrix::from_fn(n, p, |i, j| usable_rows[i].value(&predictors[j]).unwrap_or(0.0));
    let y = DVector::from_iterator(n, usable_rows.iter().map(|r| r.value(&params.target).unwrap_or(0.0)));
    let means = (0..p).map(|j| mean(x.column(j).as_slice())).collect();
    let ppu: Vec<f64> = usable_rows.iter().map(|r| r.ppu).collect();

    Ok(GroupDesign {
        predictors,
        x,
        y,
        means,
        mean_ppu: mean(&ppu),
    })
}

/// Fit every requested model for every group of `table`.
pub fn fit_table(table: &ModelingTable, params: &FitParams) -> Result<FitRun, AppError> {
    if params.models.is_empty() {
        return Err(AppError::usage("No models selected."));
    }
    if params.folds < 2 {
        return Err(AppError::usage(format!("Cross-validation needs at least 2 folds (got {}).", params.folds)));
    }
    if table.rows.is_empty() {
        return Err(AppError::insufficient("Modeling table is empty."));
    }

    let candidates = resolve_predictors(&params.predictors, table);
    let groups = table.groups();

    let results: Vec<(Vec<FittedModelRow>, Vec<GroupWarning>)> = groups
        .par_iter()
        .map(|group| {
            let rows: Vec<&ModelingRow> = table.rows.iter().filter(|r| &r.group == group).collect();
            fit_group(group, &rows, &candidates, params)
        })
        .collect();

    let mut run = FitRun::default();
    for (rows, warnings) in results {
        run.rows.extend(rows);
        run.warnings.extend(warnings);
    }
    run.rows.sort_by(|a, b| {
        a.group
            .cmp(&b.group)
            .then_with(|| a.model.display_name().cmp(b.model.display_name()))
            .then(a.fold.cmp(&b.fold))
    });

    tracing::info!(
        groups = groups.len(),
        rows = run.rows.len(),
        skipped = run.warnings.len(),
        "model fitting complete"
    );
    Ok(run)
}

/// Fit all models for one group. Problems become warnings, never errors.
pub fn fit_group(group: &GroupKey, rows: &[&ModelingRow], candidates: &[String], params: &FitParams) -> (Vec<FittedModelRow>, Vec<GroupWarning>) {
    let label = group.to_string();
    let warn = |message: String| GroupWarning::new(Stage::Fitting, label.clone(), message);

    let design = match group_design(rows, candidates, params) {
        Ok(d) => d,
        Err(e) => return (Vec::new(), vec![warn(e.to_string())]),
    };
    let splits = match kfold_splits(design.y.len(), params.folds, params.seed) {
        Ok(s) => s,
        Err(e) => return (Vec::new(), vec![warn(e.to_string())]),
    };
    tracing::debug!(group = %label, predictors = ?design.predictors, n = design.y.len(), "fitting group");

    let standardize: Vec<bool> = design
        .predictors
        .iter()
        .map(|p| params.standardize.iter().any(|s| s == p))
        .collect();

    let mut out = Vec::new();
    let mut warnings = Vec::new();
    for &model in &params.models {
        for split in &splits {
            match fit_fold(group, model, split, &design, &standardize, params) {
                Ok(row) => out.push(row),
                Err(e) => warnings.push(warn(format!("fold {}: {e}", split.fold))),
            }
        }
    }
    (out, warnings)
}

fn select_rows(x: &DMatrix<f64>, y: &DVector<f64>, idx: &[usize]) -> (DMatrix<f64>, DVector<f64>) {
    (x.select_rows(idx), y.select_rows(idx))
}

fn fit_fold(group: &GroupKey, model: ModelKind, split: &FoldSplit, design: &GroupDesign, standardize: &[bool], params: &FitParams) -> Result<FittedModelRow, FitError> {
    let (x_train, y_train) = select_rows(&design.x, &design.y, &split.train);
    let (x_test, y_test) = select_rows(&design.x, &design.y, &split.test);

    let scaler = if standardize.iter().any(|&s| s) {
        StandardScaler::fit(&x_train, standardize)
    } else {
        StandardScaler::identity(design.predictors.len())
    };
    let fit = fit_regressor(model, &scaler.transform(&x_train), &y_train, &design.predictors, params)?;
    let (intercept, coef) = back_transform(fit.intercept, &fit.coef, &scaler);
    let original = LinearFit { intercept, coef };

    let predict = |x: &DMatrix<f64>| -> Vec<f64> { original.predict(x).iter().copied().collect() };
    let train_hat = predict(&x_train);
    let test_hat = predict(&x_test);
    let y_train: Vec<f64> = y_train.iter().copied().collect();
    let y_test: Vec<f64> = y_test.iter().copied().collect();

    let coefficients: Vec<Coefficient> = design
        .predictors
        .iter()
        .zip(original.coef.iter())
        .zip(&design.means)
        .map(|((name, &beta), &mean)| Coefficient {
            predictor: name.clone(),
            beta,
            mean,
        })
        .collect();
    let e = elasticity_at_means(intercept, &coefficients, design.mean_ppu, params.elasticity_flag_threshold);

    Ok(FittedModelRow {
        group: group.clone(),
        model,
        fold: split.fold,
        intercept,
        coefficients,
        n_train: y_train.len(),
        n_test: y_test.len(),
        r2_train: r2_score(&y_train, &train_hat),
        r2_test: r2_score(&y_test, &test_hat),
        mape_train: mape(&y_train, &train_hat),
        mape_test: mape(&y_test, &test_hat),
        mse_train: mse(&y_train, &train_hat),
        mse_test: mse(&y_test, &test_hat),
        predicted_volume: e.predicted_volume,
        self_elasticity: e.self_elasticity,
        ppu_at_elasticity: e.ppu,
        csf: e.csf,
        mcv: e.mcv,
        elasticity_flag: e.flagged,
    })
}

/// Mean own price of a fitted row's group, falling back to the `PPU`
/// coefficient mean when the row carries it.
pub fn row_mean_ppu(row: &FittedModelRow) -> f64 {
    if row.ppu_at_elasticity.is_finite() {
        return row.ppu_at_elasticity;
    }
    row.coefficients
        .iter()
        .find(|c| c.predictor == COL_PPU)
        .map(|c| c.mean)
        .unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::test_support::row;
    use crate::domain::{COL_D1, Dimension};

    /// Brand A: volume = 1000 - 60 PPU - 200 B_RPI + 100 D1 (+ small wiggle).
    fn demand_table() -> ModelingTable {
        let mut rows = Vec::new();
        for w in 0..40 {
            let ppu_a = 9.0 + (w % 5) as f64 * 0.5;
            let ppu_b = 8.0 + ((w * 3) % 4) as f64 * 0.4;
            let d1 = 0.7 + ((w * 7) % 3) as f64 * 0.1;
            let rpi = ppu_a / ppu_b;
            let wiggle = if w % 2 == 0 { 1.0 } else { -1.0 };
            let vol_a = 1000.0 - 60.0 * ppu_a - 200.0 * rpi + 100.0 * d1 + wiggle;

            let mut a = row("A", w, ppu_a, vol_a);
            a.d1 = Some(d1);
            a.filtered_volume = vol_a;
            a.rpi.insert("A_RPI".into(), 0.0);
            a.rpi.insert("B_RPI".into(), rpi);

            let mut b = row("B", w, ppu_b, 300.0 - 10.0 * ppu_b + wiggle);
            b.d1 = None;
            b.filtered_volume = b.volume;
            b.rpi.insert("A_RPI".into(), ppu_b / ppu_a);
            b.rpi.insert("B_RPI".into(), 0.0);

            rows.push(a);
            rows.push(b);
        }
        ModelingTable {
            group_dims: vec![Dimension::Brand],
            pivot_dims: vec![Dimension::Brand],
            rpi_columns: vec!["A_RPI".into(), "B_RPI".into()],
            extra_columns: Vec::new(),
            rows,
        }
    }

    #[test]
    fn wildcard_expands_to_rpi_columns() {
        let table = demand_table();
        let p = resolve_predictors(&["PPU".into(), "*_RPI".into(), "D1".into(), "PPU".into()], &table);
        assert_eq!(p, vec!["PPU", "A_RPI", "B_RPI", "D1"]);
    }

    #[test]
    fn design_drops_self_rpi_and_missing_columns() {
        let table = demand_table();
        let candidates = resolve_predictors(&FitParams::default().predictors, &table);
        let a: Vec<&ModelingRow> = table.rows.iter().filter(|r| r.group.values == ["A"]).collect();
        let b: Vec<&ModelingRow> = table.rows.iter().filter(|r| r.group.values == ["B"]).collect();

        let da = group_design(&a, &candidates, &FitParams::default()).unwrap();
        assert_eq!(da.predictors, vec!["PPU", "B_RPI", "D1"]);
        let db = group_design(&b, &candidates, &FitParams::default()).unwrap();
        assert_eq!(db.predictors, vec!["PPU", "A_RPI"]);
    }

    #[test]
    fn too_few_predictors_skips_the_group() {
        let table = demand_table();
        let params = FitParams {
            predictors: vec![COL_D1.into()],
            ..FitParams::default()
        };
        let run = fit_table(&table, &params).unwrap();
        assert!(run.rows.iter().all(|r| r.group.values == ["A"]));
        assert_eq!(run.warnings.len(), 1);
        assert_eq!(run.warnings[0].group, "Grocery | B");
    }

    #[test]
    fn folds_restart_per_model_and_output_is_sorted() {
        let table = demand_table();
        let params = FitParams {
            models: vec![ModelKind::Ridge, ModelKind::Ols],
            folds: 4,
            ..FitParams::default()
        };
        let run = fit_table(&table, &params).unwrap();
        assert_eq!(run.rows.len(), 2 * 2 * 4);

        let first: Vec<(&str, usize)> = run.rows[..8].iter().map(|r| (r.model.display_name(), r.fold)).collect();
        assert_eq!(
            first,
            vec![
                ("Linear Regression", 1),
                ("Linear Regression", 2),
                ("Linear Regression", 3),
                ("Linear Regression", 4),
                ("Ridge", 1),
                ("Ridge", 2),
                ("Ridge", 3),
                ("Ridge", 4),
            ]
        );
        assert!(run.rows[..8].iter().all(|r| r.group.values == ["A"]));
        assert!(run.rows.iter().all(|r| r.n_train + r.n_test == 40));
    }

    #[test]
    fn constrained_models_give_negative_elasticity() {
        let table = demand_table();
        let params = FitParams {
            models: vec![ModelKind::ConstrainedLinear, ModelKind::ConstrainedRidge],
            ..FitParams::default()
        };
        let run = fit_table(&table, &params).unwrap();
        for r in run.rows.iter().filter(|r| r.group.values == ["A"]) {
            assert!(r.beta("PPU").unwrap() < 0.0);
            assert!(r.beta("B_RPI").unwrap() <= 0.0);
            assert!(r.beta("D1").unwrap() >= 0.0);
            assert!(r.self_elasticity < 0.0);
            assert!(!r.elasticity_flag);
            assert!(r.r2_test > 0.9);
        }
    }

    #[test]
    fn standardization_round_trips_predicted_volume() {
        let table = demand_table();
        let plain = FitParams {
            models: vec![ModelKind::Ols],
            ..FitParams::default()
        };
        let standardized = FitParams {
            standardize: vec!["PPU".into(), "D1".into()],
            ..plain.clone()
        };
        let a = fit_table(&table, &plain).unwrap();
        let b = fit_table(&table, &standardized).unwrap();
        assert_eq!(a.rows.len(), b.rows.len());
        for (x, y) in a.rows.iter().zip(&b.rows) {
            assert!((x.predicted_volume - y.predicted_volume).abs() < 1e-6);
            assert!((x.beta("PPU").unwrap() - y.beta("PPU").unwrap()).abs() < 1e-6);
        }
    }

    #[test]
    fn more_folds_than_rows_warns() {
        let mut table = demand_table();
        table.rows.truncate(6);
        let run = fit_table(&table, &FitParams::default()).unwrap();
        assert!(run.rows.is_empty());
        assert_eq!(run.warnings.len(), 2);
    }
}
