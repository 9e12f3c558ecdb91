//! `CompoundTopDocs` (C1): decodes a shard's flattened, delimited score
//! stream into one `TopDocs` per sub-query, plus a flat projection used
//! for fast iteration by the rest of the pipeline.

use serde::{Deserialize, Serialize};

use crate::score_doc::{
    FieldDoc, ScoreDoc, SearchShard, SortSpec, TopDocs, TotalHits, compute_max_score,
};

/// Per-shard decoded hybrid-query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundTopDocs {
    pub total_hits: TotalHits,
    pub top_docs_per_sub_query: Vec<TopDocs>,
    /// Deep copy of the longest per-sub-query hit list; ties keep the
    /// earliest sub-query. Mutated in place by C4 (score rescaling) and
    /// replaced wholesale by C5 (post-combination install).
    pub score_docs: Vec<FieldDoc>,
    pub search_shard: SearchShard,
}

/// Splits `raw[2..]` on delimiter/start-stop sentinels per the C1 wire
/// format: skip the leading `[START_STOP, DELIM]` pair, accumulate real
/// hits, and flush the buffer on every delimiter or the trailing
/// start-stop.
fn split_field_docs(raw: &[FieldDoc]) -> Vec<Vec<FieldDoc>> {
    if raw.len() < 2 {
        return Vec::new();
    }
    let mut groups = Vec::new();
    let mut buf = Vec::new();
    for fd in &raw[2..] {
        if fd.score_doc.is_sentinel() {
            groups.push(std::mem::take(&mut buf));
        } else {
            buf.push(fd.clone());
        }
    }
    groups
}

/// Whether `top_docs`'s flattened stream opens with the hybrid
/// `[START_STOP, DELIM, ...]` header.
#[must_use]
pub fn is_hybrid(top_docs: &TopDocs) -> bool {
    let flat = top_docs.field_docs();
    flat.len() >= 2 && flat[0].score_doc.is_start_stop() && flat[1].score_doc.is_delimiter()
}

/// First index of the sub-query with the most hits; ties keep the
/// earliest.
fn longest_index(groups: &[Vec<FieldDoc>]) -> Option<usize> {
    let mut best_idx = None;
    let mut best_len = 0usize;
    for (i, g) in groups.iter().enumerate() {
        if best_idx.is_none() || g.len() > best_len {
            best_idx = Some(i);
            best_len = g.len();
        }
    }
    best_idx
}

impl CompoundTopDocs {
    /// Decodes one shard's `TopDocs` into per-sub-query top-docs plus the
    /// flat `score_docs` projection. Sort-on/off is taken from the
    /// concrete type of `top_docs`.
    #[must_use]
    pub fn decode(top_docs: &TopDocs, search_shard: SearchShard) -> Self {
        let sort_spec = top_docs.sort_spec().cloned();
        let flat = top_docs.field_docs();
        let groups = split_field_docs(&flat);

        let top_docs_per_sub_query: Vec<TopDocs> = groups
            .iter()
            .map(|g| build_sub_query_top_docs(g, sort_spec.as_ref()))
            .collect();

        let score_docs = longest_index(&groups)
            .map(|i| groups[i].clone())
            .unwrap_or_default();

        Self {
            total_hits: top_docs.total_hits(),
            top_docs_per_sub_query,
            score_docs,
            search_shard,
        }
    }

    #[must_use]
    pub fn total_hits(&self) -> TotalHits {
        self.total_hits
    }

    pub fn set_total_hits(&mut self, total_hits: TotalHits) {
        self.total_hits = total_hits;
    }

    pub fn set_score_docs(&mut self, score_docs: Vec<FieldDoc>) {
        self.score_docs = score_docs;
    }

    /// Re-flattens the decoded sub-queries into a single `TopDocs`, such
    /// that `decode(&flatten(compound), shard) == compound` (modulo the
    /// `score_docs` projection, which `decode` recomputes deterministically
    /// from the same groups).
    #[must_use]
    pub fn flatten(&self, shard_index: i32) -> TopDocs {
        let sort_spec = self
            .top_docs_per_sub_query
            .iter()
            .find_map(|td| td.sort_spec().cloned());

        let mut flat: Vec<FieldDoc> = Vec::new();
        flat.push(FieldDoc::unsorted(ScoreDoc::start_stop(shard_index)));
        flat.push(FieldDoc::unsorted(ScoreDoc::delimiter(shard_index)));
        for (i, sub) in self.top_docs_per_sub_query.iter().enumerate() {
            if i > 0 {
                flat.push(FieldDoc::unsorted(ScoreDoc::delimiter(shard_index)));
            }
            flat.extend(sub.field_docs());
        }
        flat.push(FieldDoc::unsorted(ScoreDoc::start_stop(shard_index)));

        build_shard_top_docs(self.total_hits, &flat[2..flat.len() - 1], sort_spec)
    }
}

fn build_sub_query_top_docs(group: &[FieldDoc], sort_spec: Option<&SortSpec>) -> TopDocs {
    let total_hits = TotalHits::exact(group.len() as u64);
    let max_score = compute_max_score(group.iter().map(|fd| fd.score_doc.score));
    match sort_spec {
        Some(spec) => TopDocs::Sorted {
            total_hits,
            max_score,
            field_docs: group.to_vec(),
            sort_spec: spec.clone(),
            collapse_keys: None,
        },
        None => TopDocs::Scored {
            total_hits,
            max_score,
            score_docs: group.iter().map(|fd| fd.score_doc).collect(),
            collapse_keys: None,
        },
    }
}

fn build_shard_top_docs(total_hits: TotalHits, hits: &[FieldDoc], sort_spec: Option<SortSpec>) -> TopDocs {
    let max_score = compute_max_score(hits.iter().map(|fd| fd.score_doc.score));
    match sort_spec {
        Some(spec) => TopDocs::Sorted {
            total_hits,
            max_score,
            field_docs: hits.to_vec(),
            sort_spec: spec,
            collapse_keys: None,
        },
        None => TopDocs::Scored {
            total_hits,
            max_score,
            score_docs: hits.iter().map(|fd| fd.score_doc).collect(),
            collapse_keys: None,
        },
    }
}

/// Number of sub-queries, taken as the widest per-shard slot count (a
/// shard missing a trailing empty sub-query still contributes a slot
/// conceptually, but in practice every live shard carries all slots).
#[must_use]
pub fn num_sub_queries(compounds: &[CompoundTopDocs]) -> usize {
    compounds
        .iter()
        .map(|c| c.top_docs_per_sub_query.len())
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score_doc::TotalHitsRelation;

    fn shard(id: i32) -> SearchShard {
        SearchShard {
            index_name: "idx".into(),
            shard_id: id,
            node_id: "node-1".into(),
        }
    }

    fn scored(total: u64, docs: Vec<ScoreDoc>) -> TopDocs {
        TopDocs::Scored {
            total_hits: TotalHits::exact(total),
            max_score: compute_max_score(docs.iter().map(|d| d.score)),
            score_docs: docs,
            collapse_keys: None,
        }
    }

    /// Builds the raw wire stream for a shard from per-sub-query hit lists.
    fn wire(sub_queries: &[Vec<ScoreDoc>]) -> TopDocs {
        let mut docs = vec![ScoreDoc::start_stop(0)];
        for (i, sq) in sub_queries.iter().enumerate() {
            docs.push(ScoreDoc::delimiter(0));
            docs.extend(sq.iter().copied());
            let _ = i;
        }
        docs.push(ScoreDoc::start_stop(0));
        scored(docs.len() as u64, docs)
    }

    #[test]
    fn decode_s1_shard_a() {
        let top_docs = wire(&[
            vec![ScoreDoc::new(1, 10.0, 0), ScoreDoc::new(2, 5.0, 0)],
            vec![ScoreDoc::new(1, 2.0, 0), ScoreDoc::new(3, 1.0, 0)],
        ]);
        let compound = CompoundTopDocs::decode(&top_docs, shard(0));
        assert_eq!(compound.top_docs_per_sub_query.len(), 2);
        assert_eq!(compound.top_docs_per_sub_query[0].len(), 2);
        assert_eq!(compound.top_docs_per_sub_query[1].len(), 2);
        // Both sub-queries tie at 2 hits; longest-projection keeps the first.
        assert_eq!(compound.score_docs.len(), 2);
        assert_eq!(compound.score_docs[0].score_doc.doc_id, 1);
        assert_eq!(compound.score_docs[0].score_doc.score, 10.0);
    }

    #[test]
    fn decode_empty_sub_query_still_occupies_slot() {
        let top_docs = wire(&[vec![ScoreDoc::new(1, 1.0, 0)], vec![]]);
        let compound = CompoundTopDocs::decode(&top_docs, shard(0));
        assert_eq!(compound.top_docs_per_sub_query.len(), 2);
        assert!(compound.top_docs_per_sub_query[1].is_empty());
    }

    #[test]
    fn decode_empty_stream_yields_empty_compound() {
        let top_docs = scored(0, vec![]);
        let compound = CompoundTopDocs::decode(&top_docs, shard(0));
        assert!(compound.top_docs_per_sub_query.is_empty());
        assert!(compound.score_docs.is_empty());
        assert_eq!(compound.total_hits.value, 0);
    }

    #[test]
    fn is_hybrid_detects_missing_header() {
        let hybrid = wire(&[vec![ScoreDoc::new(1, 1.0, 0)]]);
        let non_hybrid = scored(1, vec![ScoreDoc::new(1, 1.0, 0)]);
        assert!(is_hybrid(&hybrid));
        assert!(!is_hybrid(&non_hybrid));
    }

    #[test]
    fn decode_flatten_round_trip() {
        let top_docs = wire(&[
            vec![ScoreDoc::new(1, 10.0, 0), ScoreDoc::new(2, 5.0, 0)],
            vec![ScoreDoc::new(1, 2.0, 0), ScoreDoc::new(3, 1.0, 0)],
        ]);
        let compound = CompoundTopDocs::decode(&top_docs, shard(0));
        let flattened = compound.flatten(0);
        let round_tripped = CompoundTopDocs::decode(&flattened, shard(0));
        assert_eq!(compound.top_docs_per_sub_query, round_tripped.top_docs_per_sub_query);
        assert_eq!(compound.score_docs, round_tripped.score_docs);
    }

    #[test]
    fn total_hits_mutator() {
        let mut compound = CompoundTopDocs::decode(&wire(&[vec![]]), shard(0));
        compound.set_total_hits(TotalHits {
            value: 5,
            relation: TotalHitsRelation::GreaterOrEqual,
        });
        assert_eq!(compound.total_hits().value, 5);
    }
}
