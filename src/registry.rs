//! Process-scoped concurrency primitives shared across one request's
//! query/fetch phases: the sub-query score registry and the byte circuit
//! breaker, grounded on the teacher's `Arc<RwLock<HashMap<...>>>` plus
//! atomic-counter cache pattern.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicI64, Ordering};

/// Opaque id identifying one request's phase context; the caller mints
/// these at ingress (e.g. a monotonically increasing counter) and threads
/// them through query and fetch phases.
pub type PhaseContextId = u64;

/// Per-request side table mapping `(shard_id, doc_id) -> per-sub-query
/// normalized scores`, written once by C4 and read by the fetch
/// sub-phase. Readers must tolerate a missing key: the attribute is
/// simply absent on the hit.
#[derive(Debug, Default)]
pub struct SubQueryScoreRegistry {
    inner: RwLock<HashMap<PhaseContextId, HashMap<(i32, i32), Vec<f32>>>>,
}

impl SubQueryScoreRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `scores` for `(shard_id, doc_id)` under `phase_context`.
    ///
    /// # Panics
    /// Panics if the internal lock is poisoned (a prior writer panicked
    /// while holding it).
    pub fn record(&self, phase_context: PhaseContextId, shard_id: i32, doc_id: i32, scores: Vec<f32>) {
        let mut guard = self.inner.write().expect("sub-query score registry lock poisoned");
        guard
            .entry(phase_context)
            .or_default()
            .insert((shard_id, doc_id), scores);
    }

    /// # Panics
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn lookup(&self, phase_context: PhaseContextId, shard_id: i32, doc_id: i32) -> Option<Vec<f32>> {
        let guard = self.inner.read().expect("sub-query score registry lock poisoned");
        guard
            .get(&phase_context)
            .and_then(|by_doc| by_doc.get(&(shard_id, doc_id)))
            .cloned()
    }

    /// Removes every entry recorded under `phase_context`, bounding
    /// registry memory once the fetch sub-phase completes.
    ///
    /// # Panics
    /// Panics if the internal lock is poisoned.
    pub fn retire(&self, phase_context: PhaseContextId) {
        let mut guard = self.inner.write().expect("sub-query score registry lock poisoned");
        guard.remove(&phase_context);
    }
}

/// Monotonic byte accounting counter with an additive "add-and-maybe-break"
/// operation. Out of the hot path for C1-C5; exposed only as a handle a
/// host can pass through the pipeline context for out-of-scope ingest-side
/// consumers.
#[derive(Debug)]
pub struct ByteCircuitBreaker {
    limit_bytes: i64,
    used_bytes: AtomicI64,
}

impl ByteCircuitBreaker {
    #[must_use]
    pub const fn new(limit_bytes: i64) -> Self {
        Self {
            limit_bytes,
            used_bytes: AtomicI64::new(0),
        }
    }

    /// Reserves `n` bytes under `label` if doing so would not exceed the
    /// limit; returns `false` (without reserving) otherwise.
    pub fn try_reserve(&self, n: i64, label: &str) -> bool {
        let prev = self.used_bytes.fetch_add(n, Ordering::SeqCst);
        if prev + n > self.limit_bytes {
            self.used_bytes.fetch_sub(n, Ordering::SeqCst);
            tracing::warn!(label, requested = n, limit = self.limit_bytes, "circuit breaker tripped");
            false
        } else {
            true
        }
    }

    pub fn release(&self, n: i64) {
        self.used_bytes.fetch_sub(n, Ordering::SeqCst);
    }

    #[must_use]
    pub fn used_bytes(&self) -> i64 {
        self.used_bytes.load(Ordering::SeqCst)
    }
}
