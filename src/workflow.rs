//! `NormalizationProcessorWorkflow` (C6): the top-level orchestration that
//! decodes every shard's hybrid result, normalizes or rank-assigns, combines,
//! rewrites shard top-docs, and (on the single-shard fast path) rewrites the
//! fetch result's hit array.

use std::collections::HashMap;

use crate::combination::CombinationTechnique;
use crate::combiner::{CombineScoresDto, ScoreCombiner, build_top_docs_from_compound};
use crate::compound_top_docs::{CompoundTopDocs, is_hybrid, num_sub_queries};
use crate::config::FusionPipelineConfig;
use crate::error::{FusionError, FusionResult};
use crate::explain::{ExplanationPayload, build_explanation_payload};
use crate::fusion::assign_rrf_contributions;
use crate::registry::{PhaseContextId, SubQueryScoreRegistry};
use crate::score_doc::{SearchShard, SortField, SortFieldType, SortSpec, TopDocs, TotalHits};

/// One shard slot in the query phase snapshot; `top_docs` is `None` when
/// the shard did not respond.
#[derive(Debug, Clone)]
pub struct ShardQueryResult {
    pub search_shard: SearchShard,
    pub top_docs: Option<TopDocs>,
    /// Pagination offset already applied upstream; `-1` means unset. Set
    /// to `from_value_for_single_shard` once the fetch sub-phase has run,
    /// so a caller re-reading this shard's result sees the offset the
    /// rewritten hits were trimmed against.
    pub from: i64,
}

/// One hit in the post-fetch, single-shard result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub doc_id: i32,
    pub score: f32,
    pub has_inner_hits: bool,
    pub hybridization_sub_query_scores: Option<Vec<f32>>,
}

/// The single-shard, post-fetch result rewritten by step 7.
#[derive(Debug, Clone)]
pub struct FetchSearchResult {
    pub hits: Vec<SearchHit>,
    pub request_cached: bool,
    /// The combined result's total hit count, installed alongside the
    /// rewritten hit array.
    pub total_hits: TotalHits,
}

/// `execute(request)`'s input, mirroring spec.md's request shape.
pub struct WorkflowRequest<'a> {
    pub query_search_results: Vec<ShardQueryResult>,
    pub fetch_search_result: Option<FetchSearchResult>,
    pub config: &'a FusionPipelineConfig,
    pub explain: bool,
    pub phase_context: PhaseContextId,
    /// The request's `from`; `-1` means unset.
    pub from: i64,
}

/// `execute`'s output: rewritten shard results, the rewritten fetch result
/// (when present), and the explanation payload (when requested).
pub struct WorkflowResponse {
    pub query_search_results: Vec<ShardQueryResult>,
    pub fetch_search_result: Option<FetchSearchResult>,
    pub explanation_payload: Option<ExplanationPayload>,
}

pub struct NormalizationProcessorWorkflow<'a> {
    registry: &'a SubQueryScoreRegistry,
}

impl<'a> NormalizationProcessorWorkflow<'a> {
    #[must_use]
    pub const fn new(registry: &'a SubQueryScoreRegistry) -> Self {
        Self { registry }
    }

    /// # Errors
    /// See `FusionError`: `ShardCountMismatch`, `WeightArityMismatch`,
    /// `FetchQueryMismatch`, `PaginationDepthExceeded`.
    pub fn execute(&self, request: WorkflowRequest<'_>) -> FusionResult<WorkflowResponse> {
        let span = tracing::info_span!("normalization_workflow.execute");
        let _guard = span.enter();
        self.execute_inner(request)
    }

    fn execute_inner(&self, request: WorkflowRequest<'_>) -> FusionResult<WorkflowResponse> {
        let first_hybrid = request
            .query_search_results
            .iter()
            .find_map(|s| s.top_docs.as_ref());

        let Some(first_top_docs) = first_hybrid else {
            tracing::warn!("no shard responded; passing request through unchanged");
            return Ok(pass_through(request));
        };
        if !is_hybrid(first_top_docs) {
            tracing::warn!("query result is not a hybrid query result; passing through unchanged");
            return Ok(pass_through(request));
        }

        let mut compounds = {
            let _decode = tracing::debug_span!("decode").entered();
            let present_shards: Vec<&ShardQueryResult> = request
                .query_search_results
                .iter()
                .filter(|s| s.top_docs.is_some())
                .collect();
            let compounds: Vec<CompoundTopDocs> = present_shards
                .iter()
                .map(|s| CompoundTopDocs::decode(s.top_docs.as_ref().unwrap(), s.search_shard.clone()))
                .collect();
            if compounds.len() != present_shards.len() {
                return Err(FusionError::ShardCountMismatch {
                    query_search_results: present_shards.len(),
                    decoded: compounds.len(),
                });
            }
            compounds
        };

        // The representative (longest-sub-query) projection already
        // deduplicates a doc matched by more than one sub-query, so it
        // mirrors the original, non-expanded doc id list the fetch
        // sub-phase was sent. Snapshotted before combine overwrites
        // `score_docs`.
        let unprocessed_doc_ids: Vec<i32> = compounds
            .first()
            .map(|c| c.score_docs.iter().map(|fd| fd.score_doc.doc_id).collect())
            .unwrap_or_default();

        let num_sq = num_sub_queries(&compounds);
        if let Some(weights) = request.config.combination.configured_weights() {
            if weights.len() != num_sq {
                return Err(FusionError::WeightArityMismatch {
                    weights: weights.len(),
                    sub_queries: num_sq,
                });
            }
        }

        let normalization_details = if request.explain {
            Some(request.config.normalization.explain(&compounds))
        } else {
            None
        };

        {
            let _normalize = tracing::debug_span!("normalize").entered();
            match &request.config.combination {
                CombinationTechnique::Rrf { rank_constant, .. } => {
                    assign_rrf_contributions(&mut compounds, *rank_constant);
                }
                _ => request.config.normalization.normalize(&mut compounds),
            }
        }

        // Combination explain runs on the now-normalized sub-query scores,
        // so its composite and description agree with what combine_scores
        // will install as the hit's score below.
        let explanation_payload = normalization_details.map(|normalization_details| {
            let combination_details =
                ScoreCombiner::explain(&compounds, &request.config.combination, num_sq, None);
            build_explanation_payload(&compounds, &normalization_details, &combination_details)
        });

        if request.config.sub_query_scores {
            record_sub_query_scores(self.registry, request.phase_context, &compounds, num_sq);
        }

        let sort_spec = evaluate_sort(&compounds);

        let is_single_shard = request.query_search_results.len() == 1;
        let from_value_for_single_shard =
            if is_single_shard || request.fetch_search_result.is_some() {
                if request.from == -1 { 0 } else { request.from }
            } else {
                -1
            };

        {
            let _combine = tracing::debug_span!("combine").entered();
            ScoreCombiner::combine_scores(CombineScoresDto {
                query_top_docs: &mut compounds,
                technique: &request.config.combination,
                sort: sort_spec.as_ref(),
                from_value_for_single_shard,
                is_single_shard,
            });
        }

        let total_combined_hits: usize =
            compounds.iter().map(|c| c.total_hits.value as usize).sum();
        if from_value_for_single_shard >= 0
            && from_value_for_single_shard as usize > total_combined_hits
        {
            return Err(FusionError::PaginationDepthExceeded {
                from: from_value_for_single_shard as usize,
                total_combined_hits,
            });
        }

        let mut by_shard: HashMap<SearchShard, CompoundTopDocs> = compounds
            .iter()
            .cloned()
            .map(|c| (c.search_shard.clone(), c))
            .collect();

        let fetch_happened = request.fetch_search_result.is_some();
        let mut rewritten_query_search_results = request.query_search_results;
        for shard in &mut rewritten_query_search_results {
            if let Some(compound) = by_shard.remove(&shard.search_shard) {
                shard.top_docs = Some(build_top_docs_from_compound(&compound, sort_spec.as_ref()));
            }
            if fetch_happened {
                shard.from = from_value_for_single_shard;
            }
        }

        let fetch_search_result = {
            let _fetch_rewrite = tracing::debug_span!("fetch_rewrite").entered();
            match request.fetch_search_result {
                Some(fetch) => Some(rewrite_fetch_result(
                    self.registry,
                    request.phase_context,
                    &compounds,
                    &unprocessed_doc_ids,
                    fetch,
                    from_value_for_single_shard,
                    request.config.sub_query_scores,
                )?),
                None => None,
            }
        };

        if request.config.sub_query_scores {
            self.registry.retire(request.phase_context);
        }

        Ok(WorkflowResponse {
            query_search_results: rewritten_query_search_results,
            fetch_search_result,
            explanation_payload,
        })
    }
}

fn pass_through(request: WorkflowRequest<'_>) -> WorkflowResponse {
    WorkflowResponse {
        query_search_results: request.query_search_results,
        fetch_search_result: request.fetch_search_result,
        explanation_payload: None,
    }
}

fn record_sub_query_scores(
    registry: &SubQueryScoreRegistry,
    phase_context: PhaseContextId,
    compounds: &[CompoundTopDocs],
    num_sub_queries: usize,
) {
    for compound in compounds {
        let mut scores_per_doc: HashMap<i32, Vec<f32>> = HashMap::new();
        for (i, td) in compound.top_docs_per_sub_query.iter().enumerate() {
            for fd in td.field_docs() {
                let entry = scores_per_doc
                    .entry(fd.score_doc.doc_id)
                    .or_insert_with(|| vec![crate::combination::UNMATCHED_SENTINEL; num_sub_queries]);
                if i < entry.len() {
                    entry[i] = fd.score_doc.score;
                }
            }
        }
        for (doc_id, scores) in scores_per_doc {
            registry.record(phase_context, compound.search_shard.shard_id, doc_id, scores);
        }
    }
}

/// Picks the first field-docs sort spec across every decoded shard's
/// sub-queries, widening each field's numeric type to the smallest type
/// that losslessly contains every shard's value at that position.
fn evaluate_sort(compounds: &[CompoundTopDocs]) -> Option<SortSpec> {
    let base = compounds
        .iter()
        .flat_map(|c| &c.top_docs_per_sub_query)
        .find_map(TopDocs::sort_spec)?
        .clone();

    let fields = base
        .fields
        .iter()
        .enumerate()
        .map(|(idx, field)| {
            let widened = compounds
                .iter()
                .flat_map(|c| &c.top_docs_per_sub_query)
                .flat_map(TopDocs::field_docs)
                .filter_map(|fd| fd.sort_fields.get(idx).map(|v| v.field_type()))
                .reduce(SortFieldType::widen)
                .unwrap_or(field.field_type);
            SortField {
                field_name: field.field_name.clone(),
                field_type: widened,
                reverse: field.reverse,
            }
        })
        .collect();

    Some(SortSpec { fields })
}

#[allow(clippy::too_many_arguments)]
fn rewrite_fetch_result(
    registry: &SubQueryScoreRegistry,
    phase_context: PhaseContextId,
    compounds: &[CompoundTopDocs],
    unprocessed_doc_ids: &[i32],
    fetch: FetchSearchResult,
    from_value_for_single_shard: i64,
    sub_query_scores: bool,
) -> FusionResult<FetchSearchResult> {
    if !fetch.request_cached && fetch.hits.len() != unprocessed_doc_ids.len() {
        return Err(FusionError::FetchQueryMismatch {
            fetch_hits: fetch.hits.len(),
            query_doc_ids: unprocessed_doc_ids.len(),
            request_cached: fetch.request_cached,
        });
    }

    let mut hit_by_doc_id: HashMap<i32, SearchHit> = unprocessed_doc_ids
        .iter()
        .copied()
        .zip(fetch.hits)
        .map(|(doc_id, hit)| (doc_id, hit))
        .collect();

    let Some(compound) = compounds.first() else {
        return Ok(FetchSearchResult {
            hits: Vec::new(),
            request_cached: fetch.request_cached,
            total_hits: TotalHits::zero(),
        });
    };

    let from = from_value_for_single_shard.max(0) as usize;
    let trimmed_len = compound.score_docs.len().saturating_sub(from);

    let mut hits = Vec::with_capacity(trimmed_len);
    for field_doc in compound.score_docs.iter().skip(from).take(trimmed_len) {
        let doc_id = field_doc.score_doc.doc_id;
        let Some(mut hit) = hit_by_doc_id.remove(&doc_id) else {
            continue;
        };
        hit.score = field_doc.score_doc.score;
        if sub_query_scores && !hit.has_inner_hits {
            hit.hybridization_sub_query_scores =
                registry.lookup(phase_context, compound.search_shard.shard_id, doc_id);
        }
        hits.push(hit);
    }

    Ok(FetchSearchResult {
        hits,
        request_cached: fetch.request_cached,
        total_hits: compound.total_hits,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score_doc::{ScoreDoc, TotalHits};

    fn shard(id: i32) -> SearchShard {
        SearchShard {
            index_name: "idx".into(),
            shard_id: id,
            node_id: "node-1".into(),
        }
    }

    fn hybrid_wire(sub_queries: &[Vec<ScoreDoc>], shard_idx: i32) -> TopDocs {
        let mut docs = vec![ScoreDoc::start_stop(shard_idx)];
        for sq in sub_queries {
            docs.push(ScoreDoc::delimiter(shard_idx));
            docs.extend(sq.iter().copied());
        }
        docs.push(ScoreDoc::start_stop(shard_idx));
        TopDocs::Scored {
            total_hits: TotalHits::exact(docs.len() as u64),
            max_score: 0.0,
            score_docs: docs,
            collapse_keys: None,
        }
    }

    fn config() -> FusionPipelineConfig {
        FusionPipelineConfig::from_raw("min_max", "arithmetic_mean", None, None, false).unwrap()
    }

    #[test]
    fn non_hybrid_result_passes_through() {
        let registry = SubQueryScoreRegistry::new();
        let workflow = NormalizationProcessorWorkflow::new(&registry);
        let plain = TopDocs::Scored {
            total_hits: TotalHits::exact(1),
            max_score: 1.0,
            score_docs: vec![ScoreDoc::new(1, 1.0, 0)],
            collapse_keys: None,
        };
        let cfg = config();
        let request = WorkflowRequest {
            query_search_results: vec![ShardQueryResult {
                search_shard: shard(0),
                top_docs: Some(plain.clone()),
                from: -1,
            }],
            fetch_search_result: None,
            config: &cfg,
            explain: false,
            phase_context: 1,
            from: -1,
        };
        let response = workflow.execute(request).unwrap();
        assert_eq!(response.query_search_results[0].top_docs, Some(plain));
    }

    #[test]
    fn single_shard_end_to_end_combine_and_fetch_rewrite() {
        let registry = SubQueryScoreRegistry::new();
        let workflow = NormalizationProcessorWorkflow::new(&registry);
        let top_docs = hybrid_wire(
            &[
                vec![ScoreDoc::new(1, 10.0, 0), ScoreDoc::new(2, 5.0, 0)],
                vec![ScoreDoc::new(1, 2.0, 0)],
            ],
            0,
        );
        let cfg = config();
        let request = WorkflowRequest {
            query_search_results: vec![ShardQueryResult {
                search_shard: shard(0),
                top_docs: Some(top_docs),
                from: -1,
            }],
            fetch_search_result: Some(FetchSearchResult {
                hits: vec![
                    SearchHit {
                        doc_id: 1,
                        score: 10.0,
                        has_inner_hits: false,
                        hybridization_sub_query_scores: None,
                    },
                    SearchHit {
                        doc_id: 2,
                        score: 5.0,
                        has_inner_hits: false,
                        hybridization_sub_query_scores: None,
                    },
                ],
                request_cached: false,
                total_hits: TotalHits::zero(),
            }),
            config: &cfg,
            explain: false,
            phase_context: 7,
            from: -1,
        };
        let response = workflow.execute(request).unwrap();
        assert_eq!(response.query_search_results[0].from, 0);
        let fetch = response.fetch_search_result.unwrap();
        assert_eq!(fetch.hits[0].doc_id, 1);
        assert!(fetch.hits[0].score > fetch.hits[1].score);
        assert_eq!(fetch.total_hits, TotalHits::exact(2));
    }

    #[test]
    fn weight_arity_mismatch_is_fatal() {
        let registry = SubQueryScoreRegistry::new();
        let workflow = NormalizationProcessorWorkflow::new(&registry);
        let top_docs = hybrid_wire(&[vec![ScoreDoc::new(1, 1.0, 0)], vec![ScoreDoc::new(1, 1.0, 0)]], 0);
        let cfg = FusionPipelineConfig::from_raw(
            "min_max",
            "arithmetic_mean",
            Some(vec![1.0]),
            None,
            false,
        )
        .unwrap();
        let request = WorkflowRequest {
            query_search_results: vec![ShardQueryResult {
                search_shard: shard(0),
                top_docs: Some(top_docs),
                from: -1,
            }],
            fetch_search_result: None,
            config: &cfg,
            explain: false,
            phase_context: 1,
            from: -1,
        };
        let err = workflow.execute(request).unwrap_err();
        assert!(matches!(err, FusionError::WeightArityMismatch { .. }));
    }

    #[test]
    fn pagination_depth_exceeded_is_recoverable() {
        let registry = SubQueryScoreRegistry::new();
        let workflow = NormalizationProcessorWorkflow::new(&registry);
        let top_docs = hybrid_wire(&[vec![ScoreDoc::new(1, 1.0, 0)]], 0);
        let cfg = config();
        let request = WorkflowRequest {
            query_search_results: vec![ShardQueryResult {
                search_shard: shard(0),
                top_docs: Some(top_docs),
                from: -1,
            }],
            fetch_search_result: None,
            config: &cfg,
            explain: false,
            phase_context: 1,
            from: 5,
        };
        let err = workflow.execute(request).unwrap_err();
        assert!(err.is_recoverable());
        assert!(matches!(err, FusionError::PaginationDepthExceeded { .. }));
    }

    #[test]
    fn no_shard_responded_passes_through() {
        let registry = SubQueryScoreRegistry::new();
        let workflow = NormalizationProcessorWorkflow::new(&registry);
        let cfg = config();
        let request = WorkflowRequest {
            query_search_results: vec![ShardQueryResult {
                search_shard: shard(0),
                top_docs: None,
                from: -1,
            }],
            fetch_search_result: None,
            config: &cfg,
            explain: false,
            phase_context: 1,
            from: -1,
        };
        let response = workflow.execute(request).unwrap();
        assert!(response.query_search_results[0].top_docs.is_none());
    }

    /// S3 — single shard + fetch, pagination from=2: trimmed hits equal
    /// the combined list's indices [2, 3, 4].
    #[test]
    fn s3_pagination_from_two_trims_to_tail() {
        let registry = SubQueryScoreRegistry::new();
        let workflow = NormalizationProcessorWorkflow::new(&registry);
        let top_docs = hybrid_wire(
            &[vec![
                ScoreDoc::new(1, 50.0, 0),
                ScoreDoc::new(2, 40.0, 0),
                ScoreDoc::new(3, 30.0, 0),
                ScoreDoc::new(4, 20.0, 0),
                ScoreDoc::new(5, 10.0, 0),
            ]],
            0,
        );
        let cfg = config();
        let hits = (1..=5)
            .map(|doc_id| SearchHit {
                doc_id,
                score: 0.0,
                has_inner_hits: false,
                hybridization_sub_query_scores: None,
            })
            .collect();
        let request = WorkflowRequest {
            query_search_results: vec![ShardQueryResult {
                search_shard: shard(0),
                top_docs: Some(top_docs),
                from: -1,
            }],
            fetch_search_result: Some(FetchSearchResult {
                hits,
                request_cached: false,
                total_hits: TotalHits::zero(),
            }),
            config: &cfg,
            explain: false,
            phase_context: 3,
            from: 2,
        };
        let response = workflow.execute(request).unwrap();
        assert_eq!(response.query_search_results[0].from, 2);
        let fetch = response.fetch_search_result.unwrap();
        assert_eq!(fetch.hits.len(), 3);
        let ids: Vec<i32> = fetch.hits.iter().map(|h| h.doc_id).collect();
        assert_eq!(ids, vec![3, 4, 5]);
        assert_eq!(fetch.total_hits, TotalHits::exact(5));
    }

    /// S4 — combination explain must be computed over normalized scores,
    /// not raw ones, so its composite agrees with the score C5 installs.
    #[test]
    fn explain_combination_score_matches_installed_score() {
        let registry = SubQueryScoreRegistry::new();
        let workflow = NormalizationProcessorWorkflow::new(&registry);
        let top_docs = hybrid_wire(
            &[vec![
                ScoreDoc::new(1, 10.0, 0),
                ScoreDoc::new(2, 8.0, 0),
                ScoreDoc::new(3, 0.0, 0),
            ]],
            0,
        );
        let cfg = config();
        let request = WorkflowRequest {
            query_search_results: vec![ShardQueryResult {
                search_shard: shard(0),
                top_docs: Some(top_docs),
                from: -1,
            }],
            fetch_search_result: None,
            config: &cfg,
            explain: true,
            phase_context: 9,
            from: -1,
        };
        let response = workflow.execute(request).unwrap();
        let payload = response.explanation_payload.unwrap();
        let details = &payload.data[&shard(0)];
        let doc2 = details.iter().find(|d| d.combination.doc_id == 2).unwrap();
        assert!((doc2.normalization.score_details[0].0 - 0.8).abs() < 1e-6);
        assert!((doc2.combination.score_details[0].0 - 0.8).abs() < 1e-6);

        let installed = match response.query_search_results[0].top_docs.as_ref().unwrap() {
            TopDocs::Scored { score_docs, .. } => {
                score_docs.iter().find(|sd| sd.doc_id == 2).unwrap().score
            }
            other => panic!("expected scored top docs, got {other:?}"),
        };
        assert!((installed - 0.8).abs() < 1e-6);
    }
}
