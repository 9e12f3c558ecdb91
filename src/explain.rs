//! Explanation data model (C1 §3) and `ExplanationAggregator` (C7): merges
//! normalization/combination detail into the query-level, per-hit
//! explanation tree.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::compound_top_docs::CompoundTopDocs;
use crate::error::{FusionError, FusionResult};
use crate::score_doc::SearchShard;

/// Global identity used as a map key when aggregating explanations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocIdAtSearchShard {
    pub doc_id: i32,
    pub search_shard: SearchShard,
}

/// One doc's ordered `(score, description)` pairs for a single stage
/// (normalization or combination).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExplanationDetails {
    pub doc_id: i32,
    pub score_details: Vec<(f32, String)>,
}

/// A single doc's normalization and combination explanation, paired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedExplanationDetails {
    pub normalization: ExplanationDetails,
    pub combination: ExplanationDetails,
}

/// Carries intermediate normalization/combination detail from the
/// workflow through to the response-phase explanation aggregator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExplanationPayload {
    pub data: HashMap<SearchShard, Vec<CombinedExplanationDetails>>,
}

/// A minimal Lucene-style explanation tree: one value, one description,
/// and a list of contributing sub-explanations.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Explanation {
    pub value: f32,
    pub description: String,
    pub details: Vec<Explanation>,
}

impl Explanation {
    #[must_use]
    pub fn leaf(value: f32, description: impl Into<String>) -> Self {
        Self {
            value,
            description: description.into(),
            details: Vec::new(),
        }
    }

    #[must_use]
    pub fn matched(value: f32, description: impl Into<String>, details: Vec<Self>) -> Self {
        Self {
            value,
            description: description.into(),
            details,
        }
    }
}

/// Merges `compounds` (post-decode, pre-normalization) with the
/// per-doc normalization and combination explanation maps into the
/// shard-ordered `ExplanationPayload` the workflow attaches to the
/// pipeline context.
#[must_use]
pub fn build_explanation_payload(
    compounds: &[CompoundTopDocs],
    normalization: &HashMap<DocIdAtSearchShard, ExplanationDetails>,
    combination: &[(DocIdAtSearchShard, ExplanationDetails)],
) -> ExplanationPayload {
    let mut data: HashMap<SearchShard, Vec<CombinedExplanationDetails>> = HashMap::new();
    for (key, combination_details) in combination {
        let normalization_details = normalization.get(key).cloned().unwrap_or_default();
        data.entry(key.search_shard.clone())
            .or_default()
            .push(CombinedExplanationDetails {
                normalization: normalization_details,
                combination: combination_details.clone(),
            });
    }
    // Guarantee every decoded shard has an entry, even if it retained no
    // docs, so C7's per-shard lookup never hits a missing key.
    for compound in compounds {
        data.entry(compound.search_shard.clone()).or_default();
    }
    ExplanationPayload { data }
}

/// Input to C7 for one final-response hit: its shard identity, the
/// (possibly NaN) composite score installed by C5, and the query-level
/// explanation already attached by the engine (one child per sub-query).
#[derive(Debug, Clone)]
pub struct HitExplainInput {
    pub doc_id: i32,
    pub search_shard: SearchShard,
    pub score: f32,
    pub query_level_children: Vec<Explanation>,
}

/// C7: reads the `ExplanationPayload` and, for each hit in final response
/// order, produces the merged explanation tree.
pub struct ExplanationAggregator;

impl ExplanationAggregator {
    /// Builds one merged `Explanation` per hit, in the order given.
    ///
    /// # Errors
    /// Returns `FusionError::ExplanationLengthMismatch` when a hit's
    /// matched-child count disagrees with its normalization detail count,
    /// and `FusionError::Internal` when the payload has no entry for a
    /// hit's shard or the per-shard cursor runs past the stored list
    /// (both indicate the caller passed hits the workflow never saw).
    pub fn aggregate(
        payload: &ExplanationPayload,
        hits: &[HitExplainInput],
    ) -> FusionResult<Vec<Explanation>> {
        let mut shard_cursors: HashMap<SearchShard, usize> = HashMap::new();
        let mut out = Vec::with_capacity(hits.len());

        for hit in hits {
            let per_shard = payload.data.get(&hit.search_shard).ok_or_else(|| {
                FusionError::Internal(format!(
                    "no explanation details recorded for shard {:?}",
                    hit.search_shard
                ))
            })?;
            let cursor = shard_cursors.entry(hit.search_shard.clone()).or_insert(0);
            let details = per_shard.get(*cursor).ok_or_else(|| {
                FusionError::Internal(format!(
                    "explanation cursor {cursor} out of range for shard {:?} (len {})",
                    hit.search_shard,
                    per_shard.len()
                ))
            })?;
            *cursor += 1;

            let matched_count = hit
                .query_level_children
                .iter()
                .filter(|c| c.value > 0.0)
                .count();
            if details.normalization.score_details.len() != matched_count {
                return Err(FusionError::ExplanationLengthMismatch {
                    normalization_children: details.normalization.score_details.len(),
                    query_children: matched_count,
                });
            }

            let mut normalized_children = Vec::with_capacity(matched_count);
            let mut next_normalized = 0usize;
            for child in &hit.query_level_children {
                if child.value > 0.0 {
                    let (norm_score, norm_desc) =
                        &details.normalization.score_details[next_normalized];
                    normalized_children.push(Explanation::matched(
                        *norm_score,
                        norm_desc.clone(),
                        vec![child.clone()],
                    ));
                    next_normalized += 1;
                }
            }

            let combination_description = details
                .combination
                .score_details
                .first()
                .map(|(_, desc)| desc.clone())
                .unwrap_or_default();
            let score = if hit.score.is_nan() { 0.0 } else { hit.score };
            out.push(Explanation::matched(
                score,
                combination_description,
                normalized_children,
            ));
        }

        Ok(out)
    }
}
