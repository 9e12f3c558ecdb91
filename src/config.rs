//! `FusionPipelineConfig`: the ambient configuration layer around the
//! normalization/combination technique choice, validated once at pipeline
//! construction the way the query-time technique arity is validated once
//! at execute.

use serde::{Deserialize, Serialize};

use crate::combination::CombinationTechnique;
use crate::error::{FusionError, FusionResult};
use crate::normalization::NormalizationTechnique;

/// Configuration for one installed normalization-processor pipeline.
/// Constructed once per pipeline install, not per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionPipelineConfig {
    pub normalization: NormalizationTechnique,
    pub combination: CombinationTechnique,
    /// When set, C4 also records per-sub-query normalized scores into the
    /// `SubQueryScoreRegistry` for later attachment to fetch hits.
    pub sub_query_scores: bool,
}

impl FusionPipelineConfig {
    /// # Errors
    /// Rejects a `rank_constant < 1`, or negative weights configured for
    /// geometric/harmonic mean (both would make `combine` silently
    /// misbehave rather than fail loudly at query time).
    pub fn new(
        normalization: NormalizationTechnique,
        combination: CombinationTechnique,
        sub_query_scores: bool,
    ) -> FusionResult<Self> {
        validate_combination(&combination)?;
        Ok(Self {
            normalization,
            combination,
            sub_query_scores,
        })
    }

    /// Builds from the raw config shape in spec.md §6: technique names,
    /// optional weights, and an optional rank constant (RRF only).
    ///
    /// # Errors
    /// See [`Self::new`] and [`CombinationTechnique::from_config`] /
    /// [`NormalizationTechnique::from_config`].
    pub fn from_raw(
        normalization_name: &str,
        combination_name: &str,
        weights: Option<Vec<f32>>,
        rank_constant: Option<u32>,
        sub_query_scores: bool,
    ) -> FusionResult<Self> {
        let normalization = NormalizationTechnique::from_config(normalization_name)?;
        let combination =
            CombinationTechnique::from_config(combination_name, weights, rank_constant)?;
        Self::new(normalization, combination, sub_query_scores)
    }
}

fn validate_combination(combination: &CombinationTechnique) -> FusionResult<()> {
    if let Some(rank_constant) = combination.rank_constant() {
        if rank_constant < 1 {
            return Err(FusionError::Internal(
                "rank_constant must be >= 1".to_string(),
            ));
        }
    }
    let rejects_negative_weights = matches!(
        combination,
        CombinationTechnique::GeometricMean { .. } | CombinationTechnique::HarmonicMean { .. }
    );
    if rejects_negative_weights {
        if let Some(weights) = combination.configured_weights() {
            if weights.iter().any(|w| *w < 0.0) {
                return Err(FusionError::Internal(format!(
                    "negative weights are invalid for {}",
                    combination.technique_name()
                )));
            }
        }
    }
    Ok(())
}
