//! Reciprocal rank fusion score assignment, shared by C3's RRF variant.
//!
//! RRF bypasses `NormalizationTechnique` entirely: instead of rescaling raw
//! scores, the workflow replaces each sub-query's per-doc score with its
//! rank-based contribution `1 / (rank_constant + rank)`, then `combine`
//! sums the (optionally weighted) contributions across matched sub-queries.

use std::env;

use crate::compound_top_docs::{CompoundTopDocs, num_sub_queries};

/// Default RRF rank constant, matching the source engine's default.
pub const DEFAULT_RANK_CONSTANT: u32 = 60;

/// Environment variable that overrides `DEFAULT_RANK_CONSTANT` when no
/// explicit `rank_constant` is configured on the pipeline.
pub const RANK_CONSTANT_ENV_VAR: &str = "AM_FUSION_RANK_CONSTANT";

/// Reads `RANK_CONSTANT_ENV_VAR`, falling back to `DEFAULT_RANK_CONSTANT`
/// on a missing or unparsable value.
#[must_use]
pub fn rank_constant_from_env() -> u32 {
    env::var(RANK_CONSTANT_ENV_VAR)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|v| *v >= 1)
        .unwrap_or(DEFAULT_RANK_CONSTANT)
}

/// `1 / (rank_constant + rank)`; `rank` is 1-based.
#[must_use]
pub fn rrf_contribution(rank_constant: u32, rank: usize) -> f32 {
    1.0 / (rank_constant as f32 + rank as f32)
}

/// Replaces every sub-query's raw scores across `compounds` with its
/// rank-based RRF contribution, rank assigned by position within the
/// sub-query's already-sorted hit list (1-based).
pub fn assign_rrf_contributions(compounds: &mut [CompoundTopDocs], rank_constant: u32) {
    let num_sq = num_sub_queries(compounds);
    for i in 0..num_sq {
        for compound in compounds.iter_mut() {
            if let Some(td) = compound.top_docs_per_sub_query.get_mut(i) {
                for (rank, score) in td.scores_mut().enumerate() {
                    *score = rrf_contribution(rank_constant, rank + 1);
                }
            }
        }
    }
}
