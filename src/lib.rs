//! Hybrid-query score post-processing pipeline for a distributed text
//! search engine.
//!
//! Decodes the delimited per-sub-query score stream a shard hands back for
//! a hybrid query ([`compound_top_docs`]), rescales each sub-query's raw
//! scores onto a comparable range ([`normalization`]), reduces them to one
//! composite per document ([`combination`], [`combiner`]), and orchestrates
//! the whole pass per request ([`workflow`]), producing a merged explanation
//! tree for callers that asked for one ([`explain`]).

#![forbid(unsafe_code)]

pub mod combination;
pub mod combiner;
pub mod compound_top_docs;
pub mod config;
pub mod error;
pub mod explain;
pub mod fusion;
pub mod normalization;
pub mod registry;
pub mod score_doc;
pub mod workflow;

pub use combination::{CombinationTechnique, UNMATCHED_SENTINEL};
pub use combiner::{CombineScoresDto, ScoreCombiner, build_top_docs_from_compound};
pub use compound_top_docs::{CompoundTopDocs, is_hybrid, num_sub_queries};
pub use config::FusionPipelineConfig;
pub use error::{FusionError, FusionResult};
pub use explain::{
    CombinedExplanationDetails, DocIdAtSearchShard, Explanation, ExplanationAggregator,
    ExplanationDetails, ExplanationPayload, HitExplainInput, build_explanation_payload,
};
pub use fusion::{
    DEFAULT_RANK_CONSTANT, RANK_CONSTANT_ENV_VAR, assign_rrf_contributions,
    rank_constant_from_env, rrf_contribution,
};
pub use normalization::NormalizationTechnique;
pub use registry::{ByteCircuitBreaker, PhaseContextId, SubQueryScoreRegistry};
pub use score_doc::{
    CollapseKey, FieldDoc, ScoreDoc, SearchShard, SortField, SortFieldType, SortSpec, SortValue,
    TopDocs, TotalHits, TotalHitsRelation,
};
pub use workflow::{
    FetchSearchResult, NormalizationProcessorWorkflow, SearchHit, ShardQueryResult,
    WorkflowRequest, WorkflowResponse,
};
