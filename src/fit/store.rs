//! Saved fitted models and best-model selection.
//!
//! A saved row is keyed by (group, model, fold). Re-saving an existing key is a
//! no-op unless `force` is set, so curated selections survive a re-run.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::{FittedModelRow, GroupKey, ModelKind, SaveOutcome};

type ModelKey = (GroupKey, ModelKind, usize);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SavedModelStore {
    rows: BTreeMap<ModelKey, FittedModelRow>,
}

impl SavedModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: impl IntoIterator<Item = FittedModelRow>) -> Self {
        let mut store = Self::default();
        for row in rows {
            store.insert(row, true);
        }
        store
    }

    pub fn insert(&mut self, row: FittedModelRow, force: bool) -> SaveOutcome {
        let key = (row.group.clone(), row.model, row.fold);
        match self.rows.get_mut(&key) {
            Some(existing) if force => {
                *existing = row;
                SaveOutcome::Replaced
            }
            Some(_) => SaveOutcome::Kept,
            None => {
                self.rows.insert(key, row);
                SaveOutcome::Inserted
            }
        }
    }

    pub fn get(&self, group: &GroupKey, model: ModelKind, fold: usize) -> Option<&FittedModelRow> {
        self.rows.get(&(group.clone(), model, fold))
    }

    pub fn rows(&self) -> impl Iterator<Item = &FittedModelRow> {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Best model of one group, judged over its folds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BestModel {
    pub model: ModelKind,
    pub mean_test_mape: f64,
    pub mean_elasticity: f64,
    /// Fold row closest to the mean elasticity; used to drive simulations.
    pub row: FittedModelRow,
}

/// Pick the model with the lowest mean test MAPE per group.
///
/// Only models whose every fold gives a finite, negative, unflagged
/// elasticity are eligible; groups with no eligible model are absent.
pub fn best_by_group<'a>(rows: impl IntoIterator<Item = &'a FittedModelRow>) -> BTreeMap<GroupKey, BestModel> {
    let mut by_model: BTreeMap<(GroupKey, ModelKind), Vec<&FittedModelRow>> = BTreeMap::new();
    for row in rows {
        by_model.entry((row.group.clone(), row.model)).or_default().push(row);
    }

    let mut best: BTreeMap<GroupKey, BestModel> = BTreeMap::new();
    for ((group, model), folds) in by_model {
        let eligible = folds
            .iter()
            .all(|r| r.self_elasticity.is_finite() && r.self_elasticity < 0.0 && !r.elasticity_flag);
        if !eligible {
            continue;
        }
        let n = folds.len() as f64;
        let mean_test_mape = folds.iter().map(|r| r.mape_test).sum::<f64>() / n;
        if !mean_test_mape.is_finite() {
            continue;
        }
        let mean_elasticity = folds.iter().map(|r| r.self_elasticity).sum::<f64>() / n;
        let Some(representative) = folds
            .iter()
            .min_by(|a, b| {
                (a.self_elasticity - mean_elasticity)
                    .abs()
                    .total_cmp(&(b.self_elasticity - mean_elasticity).abs())
            })
            .map(|r| (*r).clone())
        else {
            continue;
        };

        let candidate = BestModel {
            model,
            mean_test_mape,
            mean_elasticity,
            row: representative,
        };
        match best.get(&group) {
            Some(current) if current.mean_test_mape <= candidate.mean_test_mape => {}
            _ => {
                best.insert(group, candidate);
            }
        }
    }
    best
}
