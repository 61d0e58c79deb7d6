//! Reporting utilities: elasticity rankings and formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the analytics code stays clean and testable
//! - output changes are localized

use std::collections::BTreeMap;

use crate::domain::GroupKey;
use crate::fit::BestModel;

pub mod format;

pub use format::*;

/// Most and least price-sensitive groups (top-N each side).
#[derive(Debug, Clone)]
pub struct ElasticityRankings {
    pub most_elastic: Vec<BestModel>,
    pub least_elastic: Vec<BestModel>,
}

/// Rank groups by the mean self-elasticity of their best model.
///
/// "Most elastic" is the most negative elasticity.
pub fn rank_by_elasticity(best: &BTreeMap<GroupKey, BestModel>, top_n: usize) -> ElasticityRankings {
    let mut sorted: Vec<BestModel> = best
        .values()
        .filter(|b| b.mean_elasticity.is_finite())
        .cloned()
        .collect();
    sorted.sort_by(|a, b| a.mean_elasticity.total_cmp(&b.mean_elasticity));

    let most_elastic = sorted.iter().take(top_n).cloned().collect();
    let least_elastic = sorted.iter().rev().take(top_n).cloned().collect();

    ElasticityRankings {
        most_elastic,
        least_elastic,
    }
}
