//! `CombinationTechnique` (C3): reduces a doc's per-sub-query scores into
//! one composite score.

use serde::{Deserialize, Serialize};

use crate::error::{FusionError, FusionResult};

/// Sentinel value in `per_sub_query_scores` meaning "not matched by this
/// sub-query"; treated as absent by every combine formula.
pub const UNMATCHED_SENTINEL: f32 = -1.0;

#[must_use]
fn is_unmatched(score: f32) -> bool {
    score.is_nan() || score == UNMATCHED_SENTINEL
}

/// Arithmetic/geometric/harmonic mean and RRF are the closed set of
/// combination techniques. Weights default to all-`1.0` when not
/// configured; RRF additionally carries its rank constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CombinationTechnique {
    ArithmeticMean { weights: Option<Vec<f32>> },
    GeometricMean { weights: Option<Vec<f32>> },
    HarmonicMean { weights: Option<Vec<f32>> },
    Rrf { weights: Option<Vec<f32>>, rank_constant: u32 },
}

impl CombinationTechnique {
    pub const VALID_NAMES: &'static [&'static str] =
        &["arithmetic_mean", "geometric_mean", "harmonic_mean", "rrf"];

    /// # Errors
    /// Returns `FusionError::UnknownTechnique` when `name` is not one of
    /// `VALID_NAMES`.
    pub fn from_config(
        name: &str,
        weights: Option<Vec<f32>>,
        rank_constant: Option<u32>,
    ) -> FusionResult<Self> {
        match name {
            "arithmetic_mean" => Ok(Self::ArithmeticMean { weights }),
            "geometric_mean" => Ok(Self::GeometricMean { weights }),
            "harmonic_mean" => Ok(Self::HarmonicMean { weights }),
            "rrf" => Ok(Self::Rrf {
                weights,
                rank_constant: rank_constant.unwrap_or(crate::fusion::DEFAULT_RANK_CONSTANT),
            }),
            other => Err(FusionError::UnknownTechnique {
                given: other.to_string(),
                valid: Self::VALID_NAMES,
            }),
        }
    }

    #[must_use]
    pub const fn technique_name(&self) -> &'static str {
        match self {
            Self::ArithmeticMean { .. } => "arithmetic_mean",
            Self::GeometricMean { .. } => "geometric_mean",
            Self::HarmonicMean { .. } => "harmonic_mean",
            Self::Rrf { .. } => "rrf",
        }
    }

    #[must_use]
    pub fn configured_weights(&self) -> Option<&[f32]> {
        match self {
            Self::ArithmeticMean { weights }
            | Self::GeometricMean { weights }
            | Self::HarmonicMean { weights }
            | Self::Rrf { weights, .. } => weights.as_deref(),
        }
    }

    #[must_use]
    pub const fn rank_constant(&self) -> Option<u32> {
        match self {
            Self::Rrf { rank_constant, .. } => Some(*rank_constant),
            _ => None,
        }
    }

    /// Weights for `num_sub_queries` sub-queries: the configured vector
    /// when present, else all `1.0`.
    #[must_use]
    pub fn weights(&self, num_sub_queries: usize) -> Vec<f32> {
        match self.configured_weights() {
            Some(w) => w.to_vec(),
            None => vec![1.0; num_sub_queries],
        }
    }

    /// Reduces `per_sub_query_scores` (one entry per sub-query, with
    /// `UNMATCHED_SENTINEL` for a sub-query that did not match this doc)
    /// into a single composite score.
    #[must_use]
    pub fn combine(&self, per_sub_query_scores: &[f32]) -> f32 {
        let weights = self.weights(per_sub_query_scores.len());
        match self {
            Self::ArithmeticMean { .. } => arithmetic_mean(per_sub_query_scores, &weights),
            Self::GeometricMean { .. } => geometric_mean(per_sub_query_scores, &weights),
            Self::HarmonicMean { .. } => harmonic_mean(per_sub_query_scores, &weights),
            Self::Rrf { .. } => rrf_combine(per_sub_query_scores, &weights),
        }
    }

    /// Single combination detail: `(composite_score, "<technique_name>
    /// combination of [<per_sub_query_scores>]")`.
    #[must_use]
    pub fn explain(&self, per_sub_query_scores: &[f32]) -> (f32, String) {
        let composite = self.combine(per_sub_query_scores);
        let description = format!(
            "{} combination of {:?}",
            self.technique_name(),
            per_sub_query_scores
        );
        (composite, description)
    }
}

fn matched_pairs(scores: &[f32], weights: &[f32]) -> Vec<(f32, f32)> {
    scores
        .iter()
        .zip(weights.iter())
        .filter(|(s, _)| !is_unmatched(**s))
        .map(|(s, w)| (*s, *w))
        .collect()
}

fn arithmetic_mean(scores: &[f32], weights: &[f32]) -> f32 {
    let matched = matched_pairs(scores, weights);
    if matched.is_empty() {
        return 0.0;
    }
    let (num, den) = matched.iter().fold((0.0, 0.0), |(n, d), (s, w)| (n + w * s, d + w));
    if den == 0.0 { 0.0 } else { num / den }
}

fn geometric_mean(scores: &[f32], weights: &[f32]) -> f32 {
    let matched = matched_pairs(scores, weights);
    if matched.is_empty() || matched.iter().any(|(s, _)| *s <= 0.0) {
        return 0.0;
    }
    let (num, den) = matched
        .iter()
        .fold((0.0, 0.0), |(n, d), (s, w)| (n + w * s.ln(), d + w));
    if den == 0.0 { 0.0 } else { (num / den).exp() }
}

fn harmonic_mean(scores: &[f32], weights: &[f32]) -> f32 {
    let matched = matched_pairs(scores, weights);
    if matched.is_empty() || matched.iter().any(|(s, _)| *s <= 0.0) {
        return 0.0;
    }
    let w_sum: f32 = matched.iter().map(|(_, w)| w).sum();
    let denom: f32 = matched.iter().map(|(s, w)| w / s).sum();
    if denom == 0.0 { 0.0 } else { w_sum / denom }
}

/// Sums the already-rank-weighted RRF contributions (assigned by
/// `crate::fusion::assign_rrf_contributions`) across matched sub-queries.
fn rrf_combine(contributions: &[f32], weights: &[f32]) -> f32 {
    contributions
        .iter()
        .zip(weights.iter())
        .filter(|(s, _)| !is_unmatched(**s))
        .map(|(s, w)| s * w)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_mean_s1_doc_a1() {
        let technique = CombinationTechnique::ArithmeticMean { weights: None };
        // docA1: sub-query-1 = 1.0, sub-query-2 = 0.33̄
        let composite = technique.combine(&[1.0, 0.333_333_3]);
        assert!((composite - 0.666_666_6).abs() < 1e-5);
    }

    #[test]
    fn arithmetic_mean_unmatched_is_absent() {
        let technique = CombinationTechnique::ArithmeticMean { weights: None };
        let composite = technique.combine(&[UNMATCHED_SENTINEL, 1.0]);
        assert_eq!(composite, 1.0);
    }

    #[test]
    fn arithmetic_mean_no_match_is_zero() {
        let technique = CombinationTechnique::ArithmeticMean { weights: None };
        assert_eq!(technique.combine(&[UNMATCHED_SENTINEL, UNMATCHED_SENTINEL]), 0.0);
    }

    #[test]
    fn geometric_mean_non_positive_matched_is_zero() {
        let technique = CombinationTechnique::GeometricMean { weights: None };
        assert_eq!(technique.combine(&[0.0, 0.5]), 0.0);
    }

    #[test]
    fn geometric_mean_basic() {
        let technique = CombinationTechnique::GeometricMean { weights: None };
        let composite = technique.combine(&[4.0, 9.0]);
        assert!((composite - 6.0).abs() < 1e-4);
    }

    #[test]
    fn harmonic_mean_basic() {
        let technique = CombinationTechnique::HarmonicMean { weights: None };
        let composite = technique.combine(&[1.0, 4.0]);
        assert!((composite - 1.6).abs() < 1e-4);
    }

    #[test]
    fn rrf_s2_doc_d2_sums_both_matches() {
        let technique = CombinationTechnique::Rrf {
            weights: None,
            rank_constant: 60,
        };
        let d2 = technique.combine(&[1.0 / 62.0, 1.0 / 62.0]);
        assert!((d2 - (2.0 / 62.0)).abs() < 1e-9);
    }

    #[test]
    fn weighted_arithmetic_mean() {
        let technique = CombinationTechnique::ArithmeticMean {
            weights: Some(vec![2.0, 1.0]),
        };
        let composite = technique.combine(&[1.0, 0.0]);
        assert!((composite - (2.0 / 3.0)).abs() < 1e-6);
    }

    #[test]
    fn nan_treated_as_unmatched() {
        let technique = CombinationTechnique::ArithmeticMean { weights: None };
        assert_eq!(technique.combine(&[f32::NAN, 2.0]), 2.0);
    }

    #[test]
    fn from_config_rejects_unknown_name() {
        let err = CombinationTechnique::from_config("bogus", None, None).unwrap_err();
        assert!(matches!(err, FusionError::UnknownTechnique { .. }));
    }

    #[test]
    fn monotonicity_increasing_matched_score_never_decreases_composite() {
        for technique in [
            CombinationTechnique::ArithmeticMean { weights: None },
            CombinationTechnique::GeometricMean { weights: None },
            CombinationTechnique::HarmonicMean { weights: None },
        ] {
            let low = technique.combine(&[0.3, 0.5]);
            let high = technique.combine(&[0.6, 0.5]);
            assert!(high >= low, "{technique:?}: {high} should be >= {low}");
        }
    }
}
