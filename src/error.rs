//! Error types for the hybrid-query score fusion pipeline.

use thiserror::Error;

/// Result type alias for fusion pipeline operations.
pub type FusionResult<T> = std::result::Result<T, FusionError>;

/// Errors that can occur while normalizing, combining, or explaining
/// hybrid-query scores.
#[derive(Debug, Error)]
pub enum FusionError {
    /// The first shard's top-docs lacks the hybrid delimiter sentinel; the
    /// workflow should pass results through unchanged rather than fail.
    #[error("not a hybrid query result: {0}")]
    NotHybridQuery(String),

    /// `len(query_search_results) != len(decoded compound top docs)`.
    #[error("shard count mismatch: {query_search_results} search results vs {decoded} decoded")]
    ShardCountMismatch {
        query_search_results: usize,
        decoded: usize,
    },

    /// Normalization details count did not equal the query-level child count.
    #[error(
        "explanation length mismatch: {normalization_children} normalization details vs {query_children} query-level children"
    )]
    ExplanationLengthMismatch {
        normalization_children: usize,
        query_children: usize,
    },

    /// `from > total_combined_hits`; user-visible, recoverable by
    /// requesting a shallower page.
    #[error(
        "pagination depth {from} exceeds total combined hits {total_combined_hits}; increase pagination depth or reduce `from`"
    )]
    PaginationDepthExceeded {
        from: usize,
        total_combined_hits: usize,
    },

    /// Fetch hit count inconsistent with query doc-id count, and the
    /// request was not detected as request-cached.
    #[error(
        "fetch/query mismatch: {fetch_hits} fetch hits vs {query_doc_ids} query doc ids (request_cached={request_cached})"
    )]
    FetchQueryMismatch {
        fetch_hits: usize,
        query_doc_ids: usize,
        request_cached: bool,
    },

    /// Technique name supplied at pipeline-construction time is not in the
    /// closed set of valid names.
    #[error("unknown technique {given:?}; valid techniques are {valid:?}")]
    UnknownTechnique {
        given: String,
        valid: &'static [&'static str],
    },

    /// `weights.len() != num_sub_queries` at execute time.
    #[error("weight arity mismatch: {weights} weights vs {sub_queries} sub-queries")]
    WeightArityMismatch { weights: usize, sub_queries: usize },

    /// Serialization error surfaced from `serde_json`.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal/unexpected error (invariant violation not covered above).
    #[error("internal fusion pipeline error: {0}")]
    Internal(String),
}

impl FusionError {
    /// Stable, machine-readable error kind (for host-side branching without
    /// matching on `Display` text).
    #[must_use]
    pub const fn error_kind(&self) -> &'static str {
        match self {
            Self::NotHybridQuery(_) => "NOT_HYBRID_QUERY",
            Self::ShardCountMismatch { .. } => "SHARD_COUNT_MISMATCH",
            Self::ExplanationLengthMismatch { .. } => "EXPLANATION_LENGTH_MISMATCH",
            Self::PaginationDepthExceeded { .. } => "PAGINATION_DEPTH_EXCEEDED",
            Self::FetchQueryMismatch { .. } => "FETCH_QUERY_MISMATCH",
            Self::UnknownTechnique { .. } => "UNKNOWN_TECHNIQUE",
            Self::WeightArityMismatch { .. } => "WEIGHT_ARITY_MISMATCH",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the error is a user-facing, recoverable condition (the
    /// caller can retry with different parameters) rather than a fatal
    /// internal-state violation.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::PaginationDepthExceeded { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_mapping() {
        let cases: Vec<(FusionError, &str)> = vec![
            (
                FusionError::NotHybridQuery("no delimiter".into()),
                "NOT_HYBRID_QUERY",
            ),
            (
                FusionError::ShardCountMismatch {
                    query_search_results: 2,
                    decoded: 1,
                },
                "SHARD_COUNT_MISMATCH",
            ),
            (
                FusionError::ExplanationLengthMismatch {
                    normalization_children: 1,
                    query_children: 2,
                },
                "EXPLANATION_LENGTH_MISMATCH",
            ),
            (
                FusionError::PaginationDepthExceeded {
                    from: 100,
                    total_combined_hits: 10,
                },
                "PAGINATION_DEPTH_EXCEEDED",
            ),
            (
                FusionError::FetchQueryMismatch {
                    fetch_hits: 1,
                    query_doc_ids: 2,
                    request_cached: false,
                },
                "FETCH_QUERY_MISMATCH",
            ),
            (
                FusionError::UnknownTechnique {
                    given: "bogus".into(),
                    valid: &["min_max", "l2", "z_score"],
                },
                "UNKNOWN_TECHNIQUE",
            ),
            (
                FusionError::WeightArityMismatch {
                    weights: 1,
                    sub_queries: 2,
                },
                "WEIGHT_ARITY_MISMATCH",
            ),
            (FusionError::Internal("oops".into()), "INTERNAL_ERROR"),
        ];
        for (err, expected) in &cases {
            assert_eq!(err.error_kind(), *expected, "error {err:?}");
        }
    }

    #[test]
    fn only_pagination_depth_is_recoverable() {
        assert!(
            FusionError::PaginationDepthExceeded {
                from: 5,
                total_combined_hits: 1
            }
            .is_recoverable()
        );
        assert!(!FusionError::NotHybridQuery(String::new()).is_recoverable());
        assert!(
            !FusionError::ShardCountMismatch {
                query_search_results: 1,
                decoded: 2
            }
            .is_recoverable()
        );
        assert!(!FusionError::Internal(String::new()).is_recoverable());
    }

    #[test]
    fn display_all_non_empty() {
        let errs: Vec<FusionError> = vec![
            FusionError::NotHybridQuery(String::new()),
            FusionError::ShardCountMismatch {
                query_search_results: 0,
                decoded: 0,
            },
            FusionError::ExplanationLengthMismatch {
                normalization_children: 0,
                query_children: 0,
            },
            FusionError::PaginationDepthExceeded {
                from: 0,
                total_combined_hits: 0,
            },
            FusionError::FetchQueryMismatch {
                fetch_hits: 0,
                query_doc_ids: 0,
                request_cached: false,
            },
            FusionError::UnknownTechnique {
                given: String::new(),
                valid: &[],
            },
            FusionError::WeightArityMismatch {
                weights: 0,
                sub_queries: 0,
            },
            FusionError::Internal(String::new()),
        ];
        for err in &errs {
            assert!(!err.to_string().is_empty());
        }
    }

    #[test]
    fn serde_error_from_conversion() {
        let json_err = serde_json::from_str::<i32>("nope").unwrap_err();
        let fusion_err: FusionError = json_err.into();
        assert!(matches!(fusion_err, FusionError::Serialization(_)));
        assert_eq!(fusion_err.error_kind(), "SERIALIZATION_ERROR");
    }
}
