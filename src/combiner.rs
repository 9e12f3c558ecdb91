//! `ScoreCombiner` (C5): reduces each shard's per-sub-query scores into a
//! single composite per doc, re-sorts, truncates, and applies collapse.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::combination::{CombinationTechnique, UNMATCHED_SENTINEL};
use crate::compound_top_docs::{CompoundTopDocs, num_sub_queries};
use crate::explain::{DocIdAtSearchShard, ExplanationDetails};
use crate::score_doc::{
    CollapseKey, FieldDoc, ScoreDoc, SortSpec, SortValue, TopDocs, TotalHits, TotalHitsRelation,
    compute_max_score,
};

/// Request DTO for `ScoreCombiner::combine_scores`.
pub struct CombineScoresDto<'a> {
    pub query_top_docs: &'a mut [CompoundTopDocs],
    pub technique: &'a CombinationTechnique,
    pub sort: Option<&'a SortSpec>,
    pub from_value_for_single_shard: i64,
    pub is_single_shard: bool,
}

pub struct ScoreCombiner;

/// One doc's combine result for a single shard, before installation.
struct CombinedDoc {
    doc_id: i32,
    composite: f32,
    per_sub_query_scores: Vec<f32>,
    sort_fields: Vec<SortValue>,
}

impl ScoreCombiner {
    /// Combines every shard's sub-query scores in place, installing the
    /// result as `compound.score_docs` and widening `total_hits.relation`
    /// when any sub-query was `GreaterOrEqual`.
    pub fn combine_scores(dto: CombineScoresDto<'_>) {
        let num_sq = num_sub_queries(dto.query_top_docs);
        for compound in dto.query_top_docs.iter_mut() {
            combine_one_shard(compound, dto.technique, num_sq, dto.sort);
        }
        let _ = dto.from_value_for_single_shard;
        let _ = dto.is_single_shard;
    }

    /// Computes the same per-shard combination as `combine_scores`,
    /// without mutating, keyed by global doc identity in final
    /// (post-sort, post-collapse, pre-truncate-is-already-applied) order.
    #[must_use]
    pub fn explain(
        compounds: &[CompoundTopDocs],
        technique: &CombinationTechnique,
        num_sub_queries: usize,
        sort: Option<&SortSpec>,
    ) -> Vec<(DocIdAtSearchShard, ExplanationDetails)> {
        let mut out = Vec::new();
        for compound in compounds {
            if compound.total_hits.value == 0 {
                continue;
            }
            let combined = compute_shard_combination(compound, technique, num_sub_queries, sort);
            for doc in combined {
                let (composite, description) = technique.explain(&doc.per_sub_query_scores);
                debug_assert!((composite - doc.composite).abs() < 1e-6);
                let key = DocIdAtSearchShard {
                    doc_id: doc.doc_id,
                    search_shard: compound.search_shard.clone(),
                };
                out.push((
                    key,
                    ExplanationDetails {
                        doc_id: doc.doc_id,
                        score_details: vec![(composite, description)],
                    },
                ));
            }
        }
        out
    }
}

fn combine_one_shard(
    compound: &mut CompoundTopDocs,
    technique: &CombinationTechnique,
    num_sub_queries: usize,
    sort: Option<&SortSpec>,
) {
    if compound.total_hits.value == 0 {
        compound.score_docs.clear();
        return;
    }

    let combined = compute_shard_combination(compound, technique, num_sub_queries, sort);
    compound.score_docs = combined
        .into_iter()
        .map(|doc| FieldDoc {
            score_doc: ScoreDoc::new(doc.doc_id, doc.composite, compound.search_shard.shard_id),
            sort_fields: doc.sort_fields,
        })
        .collect();

    let widen = compound
        .top_docs_per_sub_query
        .iter()
        .any(|td| td.total_hits().relation == TotalHitsRelation::GreaterOrEqual);
    if widen {
        compound.total_hits.relation = TotalHitsRelation::GreaterOrEqual;
    }
}

/// Builds the per-doc composite list for one shard: merge by doc id across
/// sub-queries, reduce via `technique`, sort, truncate to the widest
/// per-sub-query hit count, then apply collapse if any sub-query carried
/// collapse keys.
fn compute_shard_combination(
    compound: &CompoundTopDocs,
    technique: &CombinationTechnique,
    num_sub_queries: usize,
    sort: Option<&SortSpec>,
) -> Vec<CombinedDoc> {
    let mut scores_per_doc: HashMap<i32, Vec<f32>> = HashMap::new();
    let mut sort_fields_per_doc: HashMap<i32, Vec<SortValue>> = HashMap::new();
    let mut collapse_key_per_doc: HashMap<i32, CollapseKey> = HashMap::new();
    let mut hits_per_sub_query = vec![0usize; num_sub_queries];
    let mut any_collapse = false;
    // Preserve first-seen order for a deterministic tie-break fallback.
    let mut doc_order: Vec<i32> = Vec::new();

    for (i, td) in compound.top_docs_per_sub_query.iter().enumerate() {
        let collapse_keys = td.collapse_keys();
        if collapse_keys.is_some() {
            any_collapse = true;
        }
        let fds = td.field_docs();
        hits_per_sub_query[i] = fds.len();
        for (k, fd) in fds.iter().enumerate() {
            let doc_id = fd.score_doc.doc_id;
            let entry = scores_per_doc
                .entry(doc_id)
                .or_insert_with(|| vec![UNMATCHED_SENTINEL; num_sub_queries]);
            if i < entry.len() {
                entry[i] = fd.score_doc.score;
            }
            if !fd.sort_fields.is_empty() {
                sort_fields_per_doc.entry(doc_id).or_insert_with(|| fd.sort_fields.clone());
            }
            if let Some(keys) = collapse_keys {
                if let Some(key) = keys.get(k) {
                    collapse_key_per_doc.entry(doc_id).or_insert_with(|| key.clone());
                }
            }
            if !doc_order.contains(&doc_id) {
                doc_order.push(doc_id);
            }
        }
    }

    let max_hits = hits_per_sub_query.iter().copied().max().unwrap_or(0);

    let mut combined: Vec<CombinedDoc> = doc_order
        .into_iter()
        .map(|doc_id| {
            let per_sub_query_scores = scores_per_doc.remove(&doc_id).unwrap_or_default();
            let composite = technique.combine(&per_sub_query_scores);
            CombinedDoc {
                doc_id,
                composite,
                per_sub_query_scores,
                sort_fields: sort_fields_per_doc.get(&doc_id).cloned().unwrap_or_default(),
            }
        })
        .collect();

    match sort {
        None => combined.sort_by(|a, b| {
            b.composite
                .partial_cmp(&a.composite)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        }),
        Some(spec) => sort_by_spec(&mut combined, spec),
    }
    combined.truncate(max_hits);

    if any_collapse {
        collapse_best_per_group(combined, &collapse_key_per_doc)
    } else {
        combined
    }
}

fn sort_by_spec(combined: &mut [CombinedDoc], spec: &SortSpec) {
    combined.sort_by(|a, b| {
        for (idx, field) in spec.fields.iter().enumerate() {
            let va = a.sort_fields.get(idx);
            let vb = b.sort_fields.get(idx);
            let ord = compare_sort_values(va, vb);
            let ord = if field.reverse { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.doc_id.cmp(&b.doc_id)
    });
}

fn compare_sort_values(a: Option<&SortValue>, b: Option<&SortValue>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
    }
}

/// Groups by collapse key, keeps the best (highest composite) per group,
/// and preserves the input's sort order.
fn collapse_best_per_group(
    combined: Vec<CombinedDoc>,
    keys: &HashMap<i32, CollapseKey>,
) -> Vec<CombinedDoc> {
    let mut best: HashMap<CollapseKey, i32> = HashMap::new();
    let mut best_score: HashMap<CollapseKey, f32> = HashMap::new();
    for doc in &combined {
        let key = keys
            .get(&doc.doc_id)
            .cloned()
            .unwrap_or(CollapseKey::Int(i64::from(doc.doc_id)));
        match best_score.get(&key) {
            Some(current) if *current >= doc.composite => {}
            _ => {
                best_score.insert(key.clone(), doc.composite);
                best.insert(key, doc.doc_id);
            }
        }
    }
    let winners: std::collections::HashSet<i32> = best.into_values().collect();
    combined
        .into_iter()
        .filter(|doc| winners.contains(&doc.doc_id))
        .collect()
}

/// Builds the `TopDocs` the workflow installs on a shard after combine,
/// with `max_score` recomputed per spec §4.6 step 6.
#[must_use]
pub fn build_top_docs_from_compound(compound: &CompoundTopDocs, sort_spec: Option<&SortSpec>) -> TopDocs {
    let max_score = if sort_spec.is_some() {
        compute_max_score(compound.score_docs.iter().map(|fd| fd.score_doc.score))
    } else {
        compound.score_docs.first().map_or(0.0, |fd| fd.score_doc.score)
    };
    match sort_spec {
        Some(spec) => TopDocs::Sorted {
            total_hits: compound.total_hits,
            max_score,
            field_docs: compound.score_docs.clone(),
            sort_spec: spec.clone(),
            collapse_keys: None,
        },
        None => TopDocs::Scored {
            total_hits: compound.total_hits,
            max_score,
            score_docs: compound.score_docs.iter().map(|fd| fd.score_doc).collect(),
            collapse_keys: None,
        },
    }
}
