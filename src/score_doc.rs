//! Per-shard scored-document primitives: `ScoreDoc`, `FieldDoc`, `TopDocs`,
//! and the sort-field value types used when a hybrid query also sorts.

use serde::{Deserialize, Serialize};

/// Magic score value marking the start/end of a shard's flattened score
/// stream (see the C1 wire format).
pub const SCORE_DOC_START_STOP: f32 = f32::MAX;

/// Magic score value marking a sub-query boundary within the flattened
/// score stream.
pub const SCORE_DOC_DELIMITER: f32 = f32::MIN;

/// A single scored document local to one shard.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreDoc {
    pub doc_id: i32,
    pub score: f32,
    pub shard_index: i32,
}

impl ScoreDoc {
    #[must_use]
    pub const fn new(doc_id: i32, score: f32, shard_index: i32) -> Self {
        Self {
            doc_id,
            score,
            shard_index,
        }
    }

    #[must_use]
    pub const fn start_stop(shard_index: i32) -> Self {
        Self::new(-1, SCORE_DOC_START_STOP, shard_index)
    }

    #[must_use]
    pub const fn delimiter(shard_index: i32) -> Self {
        Self::new(-1, SCORE_DOC_DELIMITER, shard_index)
    }

    #[must_use]
    pub fn is_start_stop(&self) -> bool {
        self.score == SCORE_DOC_START_STOP
    }

    #[must_use]
    pub fn is_delimiter(&self) -> bool {
        self.score == SCORE_DOC_DELIMITER
    }

    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        self.is_start_stop() || self.is_delimiter()
    }
}

/// Numeric type tag for a sort-field value, used to widen mixed-type sort
/// fields across shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortFieldType {
    I32,
    I64,
    F32,
    F64,
}

impl SortFieldType {
    /// Widens `self` and `other` to the smallest type that losslessly
    /// contains both. `F32` cannot losslessly hold every `I32` value (only
    /// 24 bits of integer precision), so the `I32`/`F32` pair widens to
    /// `F64` rather than `F32`.
    #[must_use]
    pub fn widen(self, other: Self) -> Self {
        use SortFieldType::{F32, F64, I32, I64};
        if self == other {
            return self;
        }
        match (self, other) {
            (I32, I64) | (I64, I32) => I64,
            (I32, F32) | (F32, I32) => F64,
            (I32, F64) | (F64, I32) => F64,
            (I64, F32) | (F32, I64) => F64,
            (I64, F64) | (F64, I64) => F64,
            (F32, F64) | (F64, F32) => F64,
            _ => unreachable!("all distinct SortFieldType pairs are covered above"),
        }
    }
}

/// A sort-field value as carried on a `FieldDoc`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SortValue {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl SortValue {
    #[must_use]
    pub fn field_type(&self) -> SortFieldType {
        match self {
            Self::I32(_) => SortFieldType::I32,
            Self::I64(_) => SortFieldType::I64,
            Self::F32(_) => SortFieldType::F32,
            Self::F64(_) => SortFieldType::F64,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::I32(v) => f64::from(*v),
            Self::I64(v) => *v as f64,
            Self::F32(v) => f64::from(*v),
            Self::F64(v) => *v,
        }
    }
}

impl PartialOrd for SortValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.as_f64().partial_cmp(&other.as_f64())
    }
}

/// One field in a compound sort spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortField {
    pub field_name: String,
    pub field_type: SortFieldType,
    pub reverse: bool,
}

/// The sort spec carried by a `TopDocs::Sorted` shard result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortSpec {
    pub fields: Vec<SortField>,
}

/// A `ScoreDoc` extended with sort-field values, used once sort is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDoc {
    pub score_doc: ScoreDoc,
    pub sort_fields: Vec<SortValue>,
}

impl FieldDoc {
    #[must_use]
    pub const fn unsorted(score_doc: ScoreDoc) -> Self {
        Self {
            score_doc,
            sort_fields: Vec::new(),
        }
    }
}

/// A per-group collapse key, as carried by a collapse-top-field-docs
/// result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollapseKey {
    Str(String),
    Int(i64),
}

/// Total-hit count and whether it is exact or a lower bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TotalHitsRelation {
    Equal,
    GreaterOrEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalHits {
    pub value: u64,
    pub relation: TotalHitsRelation,
}

impl TotalHits {
    #[must_use]
    pub const fn exact(value: u64) -> Self {
        Self {
            value,
            relation: TotalHitsRelation::Equal,
        }
    }

    #[must_use]
    pub const fn zero() -> Self {
        Self::exact(0)
    }
}

/// Identifies one shard within the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchShard {
    pub index_name: String,
    pub shard_id: i32,
    pub node_id: String,
}

/// A shard's top-docs result, either plain score-ordered or sorted by a
/// field spec. Mirrors the `TopDocs` / `TopFieldDocs` split in the source
/// engine, collapsed here into one enum since the variant set is closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TopDocs {
    Scored {
        total_hits: TotalHits,
        max_score: f32,
        score_docs: Vec<ScoreDoc>,
        collapse_keys: Option<Vec<CollapseKey>>,
    },
    Sorted {
        total_hits: TotalHits,
        max_score: f32,
        field_docs: Vec<FieldDoc>,
        sort_spec: SortSpec,
        collapse_keys: Option<Vec<CollapseKey>>,
    },
}

impl TopDocs {
    #[must_use]
    pub fn total_hits(&self) -> TotalHits {
        match self {
            Self::Scored { total_hits, .. } | Self::Sorted { total_hits, .. } => *total_hits,
        }
    }

    #[must_use]
    pub fn max_score(&self) -> f32 {
        match self {
            Self::Scored { max_score, .. } | Self::Sorted { max_score, .. } => *max_score,
        }
    }

    #[must_use]
    pub fn is_sorted(&self) -> bool {
        matches!(self, Self::Sorted { .. })
    }

    #[must_use]
    pub fn sort_spec(&self) -> Option<&SortSpec> {
        match self {
            Self::Sorted { sort_spec, .. } => Some(sort_spec),
            Self::Scored { .. } => None,
        }
    }

    #[must_use]
    pub fn collapse_keys(&self) -> Option<&[CollapseKey]> {
        match self {
            Self::Scored { collapse_keys, .. } | Self::Sorted { collapse_keys, .. } => {
                collapse_keys.as_deref()
            }
        }
    }

    /// Uniform projection to `FieldDoc`: real `ScoreDoc`s get an empty
    /// `sort_fields` vec when this shard has no active sort.
    #[must_use]
    pub fn field_docs(&self) -> Vec<FieldDoc> {
        match self {
            Self::Scored { score_docs, .. } => {
                score_docs.iter().copied().map(FieldDoc::unsorted).collect()
            }
            Self::Sorted { field_docs, .. } => field_docs.clone(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Scored { score_docs, .. } => score_docs.len(),
            Self::Sorted { field_docs, .. } => field_docs.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn scores(&self) -> Box<dyn Iterator<Item = f32> + '_> {
        match self {
            Self::Scored { score_docs, .. } => Box::new(score_docs.iter().map(|sd| sd.score)),
            Self::Sorted { field_docs, .. } => {
                Box::new(field_docs.iter().map(|fd| fd.score_doc.score))
            }
        }
    }

    pub fn scores_mut(&mut self) -> Box<dyn Iterator<Item = &mut f32> + '_> {
        match self {
            Self::Scored { score_docs, .. } => {
                Box::new(score_docs.iter_mut().map(|sd| &mut sd.score))
            }
            Self::Sorted { field_docs, .. } => {
                Box::new(field_docs.iter_mut().map(|fd| &mut fd.score_doc.score))
            }
        }
    }
}

/// Largest finite score in `scores`, ignoring NaN; `0.0` when empty or all
/// NaN.
#[must_use]
pub fn compute_max_score(scores: impl Iterator<Item = f32>) -> f32 {
    let mut max = f32::NEG_INFINITY;
    for s in scores {
        if !s.is_nan() && s > max {
            max = s;
        }
    }
    if max.is_finite() { max } else { 0.0 }
}
