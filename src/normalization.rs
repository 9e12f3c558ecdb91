//! `NormalizationTechnique` (C2): rescales raw sub-query scores to a
//! comparable range across shards.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::compound_top_docs::{CompoundTopDocs, num_sub_queries};
use crate::error::{FusionError, FusionResult};
use crate::explain::{DocIdAtSearchShard, ExplanationDetails};

/// Min-max, L2, and z-score are the closed set of normalization
/// techniques; a tagged enum with inherent methods captures that without
/// a trait-object hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormalizationTechnique {
    MinMax,
    L2,
    ZScore,
}

impl NormalizationTechnique {
    pub const VALID_NAMES: &'static [&'static str] = &["min_max", "l2", "z_score"];

    /// # Errors
    /// Returns `FusionError::UnknownTechnique` when `name` is not one of
    /// `VALID_NAMES`.
    pub fn from_config(name: &str) -> FusionResult<Self> {
        match name {
            "min_max" => Ok(Self::MinMax),
            "l2" => Ok(Self::L2),
            "z_score" => Ok(Self::ZScore),
            other => Err(FusionError::UnknownTechnique {
                given: other.to_string(),
                valid: Self::VALID_NAMES,
            }),
        }
    }

    #[must_use]
    pub const fn technique_name(&self) -> &'static str {
        match self {
            Self::MinMax => "min_max",
            Self::L2 => "l2",
            Self::ZScore => "z_score",
        }
    }

    /// Mutates every sub-query's scores across `compounds` in place.
    pub fn normalize(&self, compounds: &mut [CompoundTopDocs]) {
        let num_sq = num_sub_queries(compounds);
        for i in 0..num_sq {
            match self {
                Self::MinMax => {
                    let (min_i, max_i) = reduce_min_max(compounds, i);
                    apply(compounds, i, |raw| min_max_value(raw, min_i, max_i));
                }
                Self::L2 => {
                    let norm_i = reduce_l2_norm(compounds, i);
                    apply(compounds, i, |raw| l2_value(raw, norm_i));
                }
                Self::ZScore => {
                    let (mean_i, stddev_i) = reduce_mean_stddev(compounds, i);
                    apply(compounds, i, |raw| z_score_value(raw, mean_i, stddev_i));
                }
            }
        }
    }

    /// Computes the same per-technique rescaling as `normalize`, without
    /// mutating, and returns one `(score, description)` pair per matched
    /// hit keyed by global doc identity.
    #[must_use]
    pub fn explain(
        &self,
        compounds: &[CompoundTopDocs],
    ) -> HashMap<DocIdAtSearchShard, ExplanationDetails> {
        let mut out: HashMap<DocIdAtSearchShard, ExplanationDetails> = HashMap::new();
        let num_sq = num_sub_queries(compounds);
        for i in 0..num_sq {
            let value_for = |raw: f32| -> f32 {
                match self {
                    Self::MinMax => {
                        let (min_i, max_i) = reduce_min_max(compounds, i);
                        min_max_value(raw, min_i, max_i)
                    }
                    Self::L2 => l2_value(raw, reduce_l2_norm(compounds, i)),
                    Self::ZScore => {
                        let (mean_i, stddev_i) = reduce_mean_stddev(compounds, i);
                        z_score_value(raw, mean_i, stddev_i)
                    }
                }
            };
            for compound in compounds {
                let Some(td) = compound.top_docs_per_sub_query.get(i) else {
                    continue;
                };
                for fd in td.field_docs() {
                    let raw = fd.score_doc.score;
                    let normalized = value_for(raw);
                    let key = DocIdAtSearchShard {
                        doc_id: fd.score_doc.doc_id,
                        search_shard: compound.search_shard.clone(),
                    };
                    let entry = out.entry(key).or_insert_with(|| ExplanationDetails {
                        doc_id: fd.score_doc.doc_id,
                        score_details: Vec::new(),
                    });
                    entry.score_details.push((
                        normalized,
                        format!("{} normalization of [{raw}]", self.technique_name()),
                    ));
                }
            }
        }
        out
    }
}

fn apply(compounds: &mut [CompoundTopDocs], sub_query: usize, f: impl Fn(f32) -> f32) {
    for compound in compounds.iter_mut() {
        if let Some(td) = compound.top_docs_per_sub_query.get_mut(sub_query) {
            for score in td.scores_mut() {
                *score = f(*score);
            }
        }
    }
}

fn min_max_value(raw: f32, min_i: f32, max_i: f32) -> f32 {
    if raw.is_nan() {
        return 0.0;
    }
    if max_i == min_i { 1.0 } else { (raw - min_i) / (max_i - min_i) }
}

fn l2_value(raw: f32, norm_i: f32) -> f32 {
    if raw.is_nan() {
        return 0.0;
    }
    if norm_i == 0.0 { 0.0 } else { raw / norm_i }
}

fn z_score_value(raw: f32, mean_i: f32, stddev_i: f32) -> f32 {
    if raw.is_nan() {
        return 0.0;
    }
    if stddev_i == 0.0 { 0.0 } else { (raw - mean_i) / stddev_i }
}

fn sub_query_scores(compounds: &[CompoundTopDocs], i: usize) -> impl Iterator<Item = f32> + '_ {
    compounds
        .iter()
        .filter_map(move |c| c.top_docs_per_sub_query.get(i))
        .flat_map(|td| td.scores())
        .filter(|s| !s.is_nan())
}

fn reduce_min_max(compounds: &[CompoundTopDocs], i: usize) -> (f32, f32) {
    let mut min_i = f32::INFINITY;
    let mut max_i = f32::NEG_INFINITY;
    for s in sub_query_scores(compounds, i) {
        min_i = min_i.min(s);
        max_i = max_i.max(s);
    }
    if !min_i.is_finite() {
        min_i = 0.0;
    }
    if !max_i.is_finite() {
        max_i = 0.0;
    }
    (min_i, max_i)
}

fn reduce_l2_norm(compounds: &[CompoundTopDocs], i: usize) -> f32 {
    let sum_sq: f32 = sub_query_scores(compounds, i).map(|s| s * s).sum();
    sum_sq.sqrt()
}

fn reduce_mean_stddev(compounds: &[CompoundTopDocs], i: usize) -> (f32, f32) {
    let values: Vec<f32> = sub_query_scores(compounds, i).collect();
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mean = values.iter().sum::<f32>() / values.len() as f32;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / values.len() as f32;
    (mean, variance.sqrt())
}
