//! The engine: a process-lifetime registry of namespaces plus the public
//! operation set.
//!
//! Namespaces are created lazily on first reference and live until the
//! engine is dropped; there is no namespace-drop operation. Every operation
//! acquires at most one namespace lock, so operations on different
//! namespaces proceed in parallel and deadlock is impossible. The optional
//! background compaction timer holds only a weak handle to the engine state
//! and is cancelled by [`Engine::destroy`] (or drop).

use std::collections::hash_map::Entry as MapEntry;
use std::collections::HashMap;
use std::path::Path;
use std::sync::mpsc;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::config::{Bm25Params, EngineConfig};
use crate::document::{Entry, Metadata, MetadataFilter};
use crate::error::EngineError;
use crate::search::{HybridOptions, HybridResult, SearchResult};
use crate::storage::namespace::Namespace;
use crate::storage::persistence;
use crate::vector::{HnswVectorIndex, VectorIndex};

struct EngineInner<I: VectorIndex> {
    config: EngineConfig,
    bm25: Bm25Params,
    namespaces: RwLock<HashMap<String, Arc<Namespace<I>>>>,
}

impl<I: VectorIndex> EngineInner<I> {
    fn namespace(&self, name: &str) -> Result<Arc<Namespace<I>>, EngineError> {
        if let Some(ns) = self.namespaces.read().get(name) {
            return Ok(Arc::clone(ns));
        }
        let mut map = self.namespaces.write();
        match map.entry(name.to_string()) {
            MapEntry::Occupied(occupied) => Ok(Arc::clone(occupied.get())),
            MapEntry::Vacant(vacant) => {
                debug!("creating namespace '{name}'");
                let ns = Arc::new(Namespace::create(
                    name.to_string(),
                    self.config.dim,
                    self.config.max_elements,
                )?);
                vacant.insert(Arc::clone(&ns));
                Ok(ns)
            }
        }
    }

    fn all_namespaces(&self) -> Vec<Arc<Namespace<I>>> {
        self.namespaces.read().values().cloned().collect()
    }

    /// Compacts every namespace, logging failures instead of aborting the
    /// sweep. Used by the background timer.
    fn compact_all_logged(&self) {
        for ns in self.all_namespaces() {
            match ns.compact() {
                Ok(count) => debug!("compacted namespace '{}' to {count} slots", ns.name()),
                Err(e) => warn!("background compaction of '{}' failed: {e}", ns.name()),
            }
        }
    }
}

struct CompactionTimer {
    stop: mpsc::Sender<()>,
    handle: thread::JoinHandle<()>,
}

impl CompactionTimer {
    fn spawn<I: VectorIndex>(
        inner: Weak<EngineInner<I>>,
        interval: Duration,
    ) -> Result<Self, EngineError> {
        let (stop, ticks) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("mirador-compaction".into())
            .spawn(move || loop {
                match ticks.recv_timeout(interval) {
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        // A dead upgrade means the engine is gone
                        let Some(inner) = inner.upgrade() else { break };
                        inner.compact_all_logged();
                    }
                    _ => break,
                }
            })?;
        Ok(Self { stop, handle })
    }

    fn cancel(self) {
        let _ = self.stop.send(());
        let _ = self.handle.join();
    }
}

/// Embedded multi-namespace hybrid retrieval engine.
///
/// Generic over the vector index backend; [`Engine::new`] builds the default
/// usearch-backed engine, [`Engine::with_index`] accepts any
/// [`VectorIndex`] implementation.
pub struct Engine<I: VectorIndex = HnswVectorIndex> {
    inner: Arc<EngineInner<I>>,
    compactor: Mutex<Option<CompactionTimer>>,
}

impl Engine {
    /// Creates an engine with the default usearch HNSW backend.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        Self::with_index(config)
    }
}

impl<I: VectorIndex> Engine<I> {
    /// Creates an engine with a custom vector index backend.
    pub fn with_index(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let inner = Arc::new(EngineInner {
            bm25: Bm25Params::default(),
            namespaces: RwLock::new(HashMap::new()),
            config,
        });
        let compactor = if inner.config.auto_compaction {
            Some(CompactionTimer::spawn(
                Arc::downgrade(&inner),
                inner.config.compaction_interval,
            )?)
        } else {
            None
        };
        Ok(Self {
            inner,
            compactor: Mutex::new(compactor),
        })
    }

    /// The configuration this engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    fn namespace(&self, name: &str) -> Result<Arc<Namespace<I>>, EngineError> {
        self.inner.namespace(name)
    }

    /// Sets the process-wide BM25 `(k1, b)` pair; read by every scoring call.
    pub fn set_bm25_params(&self, k1: f32, b: f32) {
        self.inner.bm25.set(k1, b);
    }

    /// Replaces a namespace's indexed-field list.
    ///
    /// Existing entries are not re-indexed; only documents inserted,
    /// updated, or compacted afterwards pick up the new set.
    pub fn set_indexed_fields(&self, namespace: &str, fields: Vec<String>) -> Result<(), EngineError> {
        self.namespace(namespace)?.set_indexed_fields(fields);
        Ok(())
    }

    /// Inserts a new entry.
    ///
    /// Fails with `DimensionMismatch`, `DuplicateId`, or
    /// `CapacityExhausted`; slot reuse through the free list is always
    /// permitted.
    pub fn insert(
        &self,
        namespace: &str,
        id: &str,
        vector: Vec<f32>,
        metadata: Metadata,
    ) -> Result<(), EngineError> {
        self.namespace(namespace)?.insert(id, vector, metadata)
    }

    /// Inserts a batch of entries.
    ///
    /// Ids are validated up front against live ids and within the batch (no
    /// state change on `DuplicateId`); dimensions are validated per entry
    /// while applying, so earlier entries stay committed if a later entry
    /// fails.
    pub fn batch_insert(&self, namespace: &str, entries: Vec<Entry>) -> Result<(), EngineError> {
        self.namespace(namespace)?.batch_insert(entries)
    }

    /// Replaces an entry's vector and, when given, its metadata. The slot
    /// number is preserved.
    pub fn update(
        &self,
        namespace: &str,
        id: &str,
        vector: Vec<f32>,
        metadata: Option<Metadata>,
    ) -> Result<(), EngineError> {
        self.namespace(namespace)?.update(id, vector, metadata)
    }

    /// Deletes an entry; deleting a missing id is a silent no-op.
    pub fn delete(&self, namespace: &str, id: &str) -> Result<(), EngineError> {
        self.namespace(namespace)?.delete(id)
    }

    /// k-nearest-neighbor search over the vector space.
    ///
    /// Results come back in index order (closest first) with
    /// `similarity = 1 − cosine distance`, after exact-equality metadata
    /// filtering.
    pub fn search(
        &self,
        namespace: &str,
        query: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<SearchResult>, EngineError> {
        self.namespace(namespace)?.search(query, k, filter)
    }

    /// BM25 keyword search over the indexed metadata fields.
    ///
    /// Returns an empty list when the query tokenizes to nothing or no
    /// fields are indexed.
    pub fn full_text_search(
        &self,
        namespace: &str,
        query: &str,
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<SearchResult>, EngineError> {
        let (k1, b) = self.inner.bm25.get();
        Ok(self
            .namespace(namespace)?
            .full_text_search(query, k, filter, k1, b))
    }

    /// Weighted hybrid search: min-max-normalized vector and BM25 scores
    /// combined as `vector_weight · v + text_weight · t`, with optional MMR
    /// reranking. Fails with `BadWeights` when the weights do not sum to 1.
    pub fn hybrid_search(
        &self,
        namespace: &str,
        query: &[f32],
        query_text: &str,
        options: &HybridOptions,
    ) -> Result<Vec<HybridResult>, EngineError> {
        let (k1, b) = self.inner.bm25.get();
        self.namespace(namespace)?
            .hybrid_search(query, query_text, options, k1, b)
    }

    /// Reciprocal Rank Fusion hybrid search; the returned `similarity` is
    /// the RRF score.
    pub fn hybrid_search_rrf(
        &self,
        namespace: &str,
        query: &[f32],
        query_text: &str,
        k: usize,
        rrf_k: f32,
        filter: &MetadataFilter,
    ) -> Result<Vec<HybridResult>, EngineError> {
        let (k1, b) = self.inner.bm25.get();
        self.namespace(namespace)?
            .hybrid_search_rrf(query, query_text, k, rrf_k, filter, k1, b)
    }

    /// Writes a namespace snapshot at `{file_base}.idx` +
    /// `{file_base}.meta.json`, creating the parent directory if needed.
    pub fn save(&self, namespace: &str, file_base: impl AsRef<Path>) -> Result<(), EngineError> {
        let ns = self.namespace(namespace)?;
        let data = ns.data.write();
        persistence::save_namespace(ns.name(), &data, file_base.as_ref())
    }

    /// Replaces a namespace's state with a previously saved snapshot.
    ///
    /// Residual pre-load state is discarded. The engine's `dim` and
    /// `max_elements` must match the persisted snapshot; mismatches and
    /// missing or inconsistent files surface as `LoadCorrupt`.
    pub fn load(&self, namespace: &str, file_base: impl AsRef<Path>) -> Result<(), EngineError> {
        let ns = self.namespace(namespace)?;
        let mut data = ns.data.write();
        *data = persistence::load_namespace(
            ns.name(),
            self.inner.config.dim,
            self.inner.config.max_elements,
            file_base.as_ref(),
        )?;
        Ok(())
    }

    /// Rebuilds one namespace with contiguous slot numbering; returns the
    /// live entry count.
    pub fn compact(&self, namespace: &str) -> Result<usize, EngineError> {
        self.namespace(namespace)?.compact()
    }

    /// Compacts every namespace, stopping at the first failure.
    pub fn compact_all(&self) -> Result<(), EngineError> {
        for ns in self.inner.all_namespaces() {
            ns.compact()?;
        }
        Ok(())
    }

    /// Number of live entries in a namespace.
    pub fn count(&self, namespace: &str) -> Result<usize, EngineError> {
        Ok(self.namespace(namespace)?.len())
    }

    /// Cancels the background compaction timer. Idempotent; also runs on
    /// drop.
    pub fn destroy(&self) {
        if let Some(timer) = self.compactor.lock().take() {
            timer.cancel();
        }
    }
}

impl<I: VectorIndex> Drop for Engine<I> {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_K, RRF_K};
    use serde_json::json;
    use std::path::PathBuf;

    const NS: &str = "test";

    fn engine(dim: usize, max_elements: usize) -> Engine {
        Engine::new(EngineConfig::new(dim, max_elements)).unwrap()
    }

    fn meta(pairs: &[(&str, serde_json::Value)]) -> Metadata {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn no_filter() -> MetadataFilter {
        MetadataFilter::new()
    }

    /// Asserts the §-invariants that must hold after every mutation
    /// sequence: map/stat cardinalities, arena/free-list partition,
    /// posting liveness and pruning, and the average length.
    fn assert_invariants(eng: &Engine, namespace: &str) {
        let ns = eng.namespace(namespace).unwrap();
        let data = ns.data.read();
        data.validate().expect("namespace invariants violated");
    }

    // S1 — pure vector KNN ordering and scores.
    #[test]
    fn test_vector_knn_order_and_scores() {
        let eng = engine(4, 100);
        let s = std::f32::consts::FRAC_1_SQRT_2;
        eng.insert(NS, "a", vec![1.0, 0.0, 0.0, 0.0], Metadata::new()).unwrap();
        eng.insert(NS, "b", vec![0.0, 1.0, 0.0, 0.0], Metadata::new()).unwrap();
        eng.insert(NS, "c", vec![s, s, 0.0, 0.0], Metadata::new()).unwrap();

        let results = eng.search(NS, &[1.0, 0.0, 0.0, 0.0], 2, &no_filter()).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "a");
        assert_eq!(results[1].id, "c");
        assert!((results[0].similarity - 1.0).abs() < 1e-3);
        assert!((results[1].similarity - s).abs() < 1e-3);
        assert_invariants(&eng, NS);
    }

    // S2 — BM25 ordering: tf=2 beats tf=1 at equal IDF, non-matching doc excluded.
    #[test]
    fn test_bm25_ordering() {
        let eng = engine(4, 100);
        eng.set_indexed_fields(NS, vec!["t".to_string()]).unwrap();
        eng.insert(NS, "d1", vec![1.0, 0.0, 0.0, 0.0], meta(&[("t", json!("alpha beta"))])).unwrap();
        eng.insert(NS, "d2", vec![0.0, 1.0, 0.0, 0.0], meta(&[("t", json!("alpha alpha"))])).unwrap();
        eng.insert(NS, "d3", vec![0.0, 0.0, 1.0, 0.0], meta(&[("t", json!("beta gamma delta"))])).unwrap();

        let results = eng.full_text_search(NS, "alpha", 3, &no_filter()).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "d2");
        assert_eq!(results[1].id, "d1");
        assert!(results[0].similarity > results[1].similarity);
        assert_invariants(&eng, NS);
    }

    // S3 — tokenizer and case handling end to end.
    #[test]
    fn test_tokenizer_and_case() {
        let eng = engine(4, 100);
        eng.set_indexed_fields(NS, vec!["t".to_string()]).unwrap();
        eng.insert(NS, "x", vec![1.0, 0.0, 0.0, 0.0], meta(&[("t", json!("Hello, World!"))])).unwrap();

        let hits = eng.full_text_search(NS, "hello", DEFAULT_K, &no_filter()).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "x");

        let hits = eng.full_text_search(NS, "HELLO-world", DEFAULT_K, &no_filter()).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "x");

        let hits = eng.full_text_search(NS, "", DEFAULT_K, &no_filter()).unwrap();
        assert!(hits.is_empty());
    }

    // S4 — metadata filter restricts vector search results.
    #[test]
    fn test_metadata_filter() {
        let eng = engine(4, 100);
        for i in 0..10 {
            let category = if i % 2 == 0 { "A" } else { "B" };
            eng.insert(
                NS,
                &format!("doc{i}"),
                vec![1.0, i as f32 * 0.01, 0.0, 0.0],
                meta(&[("category", json!(category))]),
            )
            .unwrap();
        }

        let filter = meta(&[("category", json!("A"))]);
        let results = eng.search(NS, &[1.0, 0.0, 0.0, 0.0], 5, &filter).unwrap();
        assert!(!results.is_empty());
        assert!(results.len() <= 5);
        for r in &results {
            assert_eq!(r.metadata.get("category"), Some(&json!("A")));
        }
        assert_invariants(&eng, NS);
    }

    // S5 — delete then reinsert with the same id reuses the slot and the
    // old vector never comes back.
    #[test]
    fn test_delete_then_reinsert_same_id() {
        let eng = engine(4, 100);
        eng.insert(NS, "anchor", vec![0.0, 0.0, 0.0, 1.0], Metadata::new()).unwrap();
        eng.insert(NS, "p", vec![1.0, 0.0, 0.0, 0.0], Metadata::new()).unwrap();

        let ns = eng.namespace(NS).unwrap();
        let free_before = ns.data.read().free_list.len();
        eng.delete(NS, "p").unwrap();
        eng.insert(NS, "p", vec![0.0, 1.0, 0.0, 0.0], Metadata::new()).unwrap();

        {
            let data = ns.data.read();
            assert_eq!(data.free_list.len(), free_before);
            assert_eq!(data.next_slot, 2, "slot was reused, not newly allocated");
        }

        // The new vector is what search returns now.
        let results = eng.search(NS, &[0.0, 1.0, 0.0, 0.0], 1, &no_filter()).unwrap();
        assert_eq!(results[0].id, "p");
        assert!((results[0].similarity - 1.0).abs() < 1e-3);

        // The old vector is gone: querying it matches "p" no better than orthogonal.
        let results = eng.search(NS, &[1.0, 0.0, 0.0, 0.0], 2, &no_filter()).unwrap();
        for r in &results {
            if r.id == "p" {
                assert!(r.similarity < 0.1, "old vector resurfaced: {}", r.similarity);
            }
        }
        assert_invariants(&eng, NS);
    }

    // S6 — persistence round trip: all four search shapes identical.
    #[test]
    fn test_persistence_roundtrip_identical_results() {
        let base: PathBuf = std::env::temp_dir()
            .join(format!("mirador_engine_{}", uuid::Uuid::new_v4()))
            .join("snap");

        let eng = engine(4, 200);
        eng.set_indexed_fields(NS, vec!["title".to_string(), "body".to_string()]).unwrap();
        for i in 0..50u32 {
            let words = ["alpha", "beta", "gamma", "delta", "epsilon"];
            let title = format!("{} {}", words[(i % 5) as usize], words[((i / 5) % 5) as usize]);
            let body = format!("document number {i} speaks of {}", words[((i * 3) % 5) as usize]);
            let category = if i % 2 == 0 { "even" } else { "odd" };
            let angle = i as f32 * 0.11;
            eng.insert(
                NS,
                &format!("doc{i}"),
                vec![angle.cos(), angle.sin(), (i as f32 * 0.05).sin(), 1.0],
                meta(&[
                    ("title", json!(title)),
                    ("body", json!(body)),
                    ("category", json!(category)),
                ]),
            )
            .unwrap();
        }
        // Mutate a little so the free list and tombstone paths are exercised.
        eng.delete(NS, "doc13").unwrap();
        eng.update(NS, "doc7", vec![0.3, 0.4, 0.5, 0.6], Some(meta(&[("title", json!("rewritten alpha"))]))).unwrap();

        let q = [0.6f32, 0.4, 0.2, 1.0];
        let filter = meta(&[("category", json!("even"))]);
        let options = HybridOptions { k: 10, ..Default::default() };

        let vector_before = eng.search(NS, &q, 10, &filter).unwrap();
        let text_before = eng.full_text_search(NS, "alpha document", 10, &no_filter()).unwrap();
        let hybrid_before = eng.hybrid_search(NS, &q, "alpha document", &options).unwrap();
        let rrf_before = eng.hybrid_search_rrf(NS, &q, "alpha document", 10, RRF_K, &no_filter()).unwrap();

        eng.save(NS, &base).unwrap();

        let fresh = engine(4, 200);
        fresh.load(NS, &base).unwrap();
        assert_eq!(fresh.count(NS).unwrap(), 49);

        assert_eq!(fresh.search(NS, &q, 10, &filter).unwrap(), vector_before);
        assert_eq!(
            fresh.full_text_search(NS, "alpha document", 10, &no_filter()).unwrap(),
            text_before
        );
        assert_eq!(
            fresh.hybrid_search(NS, &q, "alpha document", &options).unwrap(),
            hybrid_before
        );
        assert_eq!(
            fresh.hybrid_search_rrf(NS, &q, "alpha document", 10, RRF_K, &no_filter()).unwrap(),
            rrf_before
        );
        assert_invariants(&fresh, NS);

        if let Some(parent) = base.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }

    // S7 — RRF ordering through the engine.
    #[test]
    fn test_rrf_through_engine() {
        let eng = engine(4, 100);
        eng.set_indexed_fields(NS, vec!["t".to_string()]).unwrap();
        // Vector ranks: a, b, c. Text ranks: b, c, a.
        eng.insert(NS, "a", vec![1.0, 0.0, 0.0, 0.0], meta(&[("t", json!("zeta"))])).unwrap();
        eng.insert(NS, "b", vec![0.96, 0.28, 0.0, 0.0], meta(&[("t", json!("zeta zeta zeta"))])).unwrap();
        eng.insert(NS, "c", vec![0.8, 0.6, 0.0, 0.0], meta(&[("t", json!("zeta zeta"))])).unwrap();

        let results = eng
            .hybrid_search_rrf(NS, &[1.0, 0.0, 0.0, 0.0], "zeta", 3, RRF_K, &no_filter())
            .unwrap();
        let order: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
        for r in &results {
            assert_eq!(r.similarity, r.combined_score);
        }
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let eng = engine(4, 100);
        eng.insert(NS, "a", vec![1.0, 0.0, 0.0, 0.0], Metadata::new()).unwrap();
        let err = eng.insert(NS, "a", vec![0.0, 1.0, 0.0, 0.0], Metadata::new());
        assert!(matches!(err, Err(EngineError::DuplicateId(id)) if id == "a"));
        assert_eq!(eng.count(NS).unwrap(), 1);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let eng = engine(4, 100);
        let err = eng.insert(NS, "a", vec![1.0, 0.0], Metadata::new());
        assert!(matches!(
            err,
            Err(EngineError::DimensionMismatch { expected: 4, actual: 2 })
        ));
        let err = eng.update(NS, "a", vec![1.0], None);
        assert!(matches!(err, Err(EngineError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_capacity_exhausted_and_free_list_reuse() {
        let eng = engine(4, 2);
        eng.insert(NS, "a", vec![1.0, 0.0, 0.0, 0.0], Metadata::new()).unwrap();
        eng.insert(NS, "b", vec![0.0, 1.0, 0.0, 0.0], Metadata::new()).unwrap();
        let err = eng.insert(NS, "c", vec![0.0, 0.0, 1.0, 0.0], Metadata::new());
        assert!(matches!(err, Err(EngineError::CapacityExhausted { max_elements: 2 })));

        // Reuse via the free list is always permitted.
        eng.delete(NS, "a").unwrap();
        eng.insert(NS, "c", vec![0.0, 0.0, 1.0, 0.0], Metadata::new()).unwrap();
        assert_eq!(eng.count(NS).unwrap(), 2);
        assert_invariants(&eng, NS);
    }

    #[test]
    fn test_update_not_found() {
        let eng = engine(4, 100);
        let err = eng.update(NS, "ghost", vec![1.0, 0.0, 0.0, 0.0], None);
        assert!(matches!(err, Err(EngineError::NotFound(id)) if id == "ghost"));
    }

    #[test]
    fn test_delete_missing_id_is_silent() {
        let eng = engine(4, 100);
        assert!(eng.delete(NS, "ghost").is_ok());
    }

    #[test]
    fn test_update_reindexes_metadata() {
        let eng = engine(4, 100);
        eng.set_indexed_fields(NS, vec!["t".to_string()]).unwrap();
        eng.insert(NS, "a", vec![1.0, 0.0, 0.0, 0.0], meta(&[("t", json!("before"))])).unwrap();

        // Vector-only update keeps the metadata searchable.
        eng.update(NS, "a", vec![0.0, 1.0, 0.0, 0.0], None).unwrap();
        assert_eq!(eng.full_text_search(NS, "before", 5, &no_filter()).unwrap().len(), 1);

        // Metadata update replaces the postings.
        eng.update(NS, "a", vec![0.0, 1.0, 0.0, 0.0], Some(meta(&[("t", json!("after"))]))).unwrap();
        assert!(eng.full_text_search(NS, "before", 5, &no_filter()).unwrap().is_empty());
        assert_eq!(eng.full_text_search(NS, "after", 5, &no_filter()).unwrap().len(), 1);
        assert_invariants(&eng, NS);
    }

    #[test]
    fn test_batch_insert_duplicate_precheck_leaves_no_state() {
        let eng = engine(4, 100);
        eng.insert(NS, "live", vec![1.0, 0.0, 0.0, 0.0], Metadata::new()).unwrap();

        let batch = vec![
            Entry::new("fresh", vec![0.0, 1.0, 0.0, 0.0]),
            Entry::new("live", vec![0.0, 0.0, 1.0, 0.0]),
        ];
        let err = eng.batch_insert(NS, batch);
        assert!(matches!(err, Err(EngineError::DuplicateId(id)) if id == "live"));
        assert_eq!(eng.count(NS).unwrap(), 1, "pre-check must not commit anything");

        let batch = vec![
            Entry::new("x", vec![0.0, 1.0, 0.0, 0.0]),
            Entry::new("x", vec![0.0, 0.0, 1.0, 0.0]),
        ];
        let err = eng.batch_insert(NS, batch);
        assert!(matches!(err, Err(EngineError::DuplicateId(id)) if id == "x"));
        assert_eq!(eng.count(NS).unwrap(), 1);
    }

    #[test]
    fn test_batch_insert_partial_apply_on_dimension_error() {
        let eng = engine(4, 100);
        let batch = vec![
            Entry::new("good", vec![1.0, 0.0, 0.0, 0.0]),
            Entry::new("bad", vec![1.0, 0.0]),
        ];
        let err = eng.batch_insert(NS, batch);
        assert!(matches!(err, Err(EngineError::DimensionMismatch { .. })));
        // Documented partial-apply semantics: the earlier entry is committed.
        assert_eq!(eng.count(NS).unwrap(), 1);
        assert_invariants(&eng, NS);
    }

    #[test]
    fn test_bad_weights_rejected() {
        let eng = engine(4, 100);
        eng.insert(NS, "a", vec![1.0, 0.0, 0.0, 0.0], Metadata::new()).unwrap();
        let options = HybridOptions {
            vector_weight: 0.7,
            text_weight: 0.7,
            ..Default::default()
        };
        let err = eng.hybrid_search(NS, &[1.0, 0.0, 0.0, 0.0], "q", &options);
        assert!(matches!(err, Err(EngineError::BadWeights { .. })));
    }

    #[test]
    fn test_hybrid_weighted_combines_both_sides() {
        let eng = engine(4, 100);
        eng.set_indexed_fields(NS, vec!["t".to_string()]).unwrap();
        eng.insert(NS, "vec_hit", vec![1.0, 0.0, 0.0, 0.0], meta(&[("t", json!("unrelated"))])).unwrap();
        eng.insert(NS, "txt_hit", vec![0.0, 1.0, 0.0, 0.0], meta(&[("t", json!("needle needle"))])).unwrap();
        eng.insert(NS, "both", vec![0.9, 0.43, 0.0, 0.0], meta(&[("t", json!("needle"))])).unwrap();
        eng.insert(
            NS,
            "weak",
            vec![0.0, 0.0, 1.0, 0.0],
            meta(&[("t", json!("needle misc extra words many"))]),
        )
        .unwrap();

        let options = HybridOptions { k: 3, ..Default::default() };
        let results = eng
            .hybrid_search(NS, &[1.0, 0.0, 0.0, 0.0], "needle", &options)
            .unwrap();
        assert_eq!(results.len(), 3);
        // "both" scores high on the two sides at once and must beat the
        // single-side specialists under equal weights.
        assert_eq!(results[0].id, "both");
        for r in &results {
            let expected = 0.5 * r.vector_score + 0.5 * r.text_score;
            assert!((r.combined_score - expected).abs() < 1e-6);
            assert_eq!(r.similarity, r.combined_score);
        }
    }

    #[test]
    fn test_hybrid_rerank_preserves_result_set() {
        let eng = engine(4, 100);
        eng.set_indexed_fields(NS, vec!["t".to_string()]).unwrap();
        for i in 0..6 {
            let angle = i as f32 * 0.2;
            eng.insert(
                NS,
                &format!("d{i}"),
                vec![angle.cos(), angle.sin(), 0.0, 0.0],
                meta(&[("t", json!(format!("topic {i}")))]),
            )
            .unwrap();
        }
        let plain = HybridOptions { k: 4, ..Default::default() };
        let reranked = HybridOptions { k: 4, rerank: true, ..Default::default() };

        let baseline = eng.hybrid_search(NS, &[1.0, 0.0, 0.0, 0.0], "topic", &plain).unwrap();
        let diverse = eng.hybrid_search(NS, &[1.0, 0.0, 0.0, 0.0], "topic", &reranked).unwrap();
        assert_eq!(diverse.len(), baseline.len());
        assert_eq!(diverse[0].id, baseline[0].id, "MMR keeps the head");
        let mut ids: Vec<&str> = diverse.iter().map(|r| r.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), diverse.len(), "MMR never duplicates a result");
    }

    #[test]
    fn test_set_indexed_fields_does_not_reindex() {
        let eng = engine(4, 100);
        // Inserted before any field is indexed: invisible to text search.
        eng.insert(NS, "early", vec![1.0, 0.0, 0.0, 0.0], meta(&[("t", json!("findme"))])).unwrap();
        eng.set_indexed_fields(NS, vec!["t".to_string()]).unwrap();
        assert!(eng.full_text_search(NS, "findme", 5, &no_filter()).unwrap().is_empty());

        // Re-indexing happens on update…
        eng.update(NS, "early", vec![1.0, 0.0, 0.0, 0.0], None).unwrap();
        assert_eq!(eng.full_text_search(NS, "findme", 5, &no_filter()).unwrap().len(), 1);

        // …and new inserts pick the field list up immediately.
        eng.insert(NS, "late", vec![0.0, 1.0, 0.0, 0.0], meta(&[("t", json!("findme"))])).unwrap();
        assert_eq!(eng.full_text_search(NS, "findme", 5, &no_filter()).unwrap().len(), 2);
    }

    #[test]
    fn test_compaction_renumbers_and_preserves_results() {
        let eng = engine(4, 100);
        eng.set_indexed_fields(NS, vec!["t".to_string()]).unwrap();
        for i in 0..8 {
            let angle = i as f32 * 0.3;
            eng.insert(
                NS,
                &format!("d{i}"),
                vec![angle.cos(), angle.sin(), 0.0, 0.0],
                meta(&[("t", json!(format!("word{i} shared")))]),
            )
            .unwrap();
        }
        eng.delete(NS, "d1").unwrap();
        eng.delete(NS, "d4").unwrap();
        eng.delete(NS, "d6").unwrap();

        let q = [1.0f32, 0.0, 0.0, 0.0];
        let vector_before = eng.search(NS, &q, 5, &no_filter()).unwrap();
        let text_before = eng.full_text_search(NS, "shared", 10, &no_filter()).unwrap();

        let count = eng.compact(NS).unwrap();
        assert_eq!(count, 5);

        {
            let ns = eng.namespace(NS).unwrap();
            let data = ns.data.read();
            assert!(data.free_list.is_empty());
            assert_eq!(data.next_slot, 5);
            data.validate().unwrap();
        }

        let vector_after = eng.search(NS, &q, 5, &no_filter()).unwrap();
        let text_after = eng.full_text_search(NS, "shared", 10, &no_filter()).unwrap();
        let before_ids: Vec<&str> = vector_before.iter().map(|r| r.id.as_str()).collect();
        let after_ids: Vec<&str> = vector_after.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(before_ids, after_ids);
        assert_eq!(text_before.len(), text_after.len());
        for (b, a) in text_before.iter().zip(&text_after) {
            assert_eq!(b.id, a.id);
            assert!((b.similarity - a.similarity).abs() < 1e-5);
        }
    }

    #[test]
    fn test_compaction_applies_current_field_list() {
        let eng = engine(4, 100);
        eng.insert(NS, "early", vec![1.0, 0.0, 0.0, 0.0], meta(&[("t", json!("findme"))])).unwrap();
        eng.set_indexed_fields(NS, vec!["t".to_string()]).unwrap();
        assert!(eng.full_text_search(NS, "findme", 5, &no_filter()).unwrap().is_empty());

        // Compaction re-indexes under the field list in force now.
        eng.compact(NS).unwrap();
        assert_eq!(eng.full_text_search(NS, "findme", 5, &no_filter()).unwrap().len(), 1);
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let eng = engine(4, 100);
        eng.set_indexed_fields("left", vec!["t".to_string()]).unwrap();
        eng.insert("left", "a", vec![1.0, 0.0, 0.0, 0.0], meta(&[("t", json!("alpha"))])).unwrap();
        eng.insert("right", "a", vec![1.0, 0.0, 0.0, 0.0], Metadata::new()).unwrap();

        assert_eq!(eng.count("left").unwrap(), 1);
        assert_eq!(eng.count("right").unwrap(), 1);
        // Same public id in both namespaces is fine; text search only sees "left".
        assert_eq!(eng.full_text_search("left", "alpha", 5, &no_filter()).unwrap().len(), 1);
        assert!(eng.full_text_search("right", "alpha", 5, &no_filter()).unwrap().is_empty());
    }

    #[test]
    fn test_set_bm25_params_changes_scores() {
        let eng = engine(4, 100);
        eng.set_indexed_fields(NS, vec!["t".to_string()]).unwrap();
        eng.insert(NS, "short", vec![1.0, 0.0, 0.0, 0.0], meta(&[("t", json!("needle"))])).unwrap();
        eng.insert(NS, "long", vec![0.0, 1.0, 0.0, 0.0], meta(&[("t", json!("needle plus many many other words here"))])).unwrap();

        let default_scores = eng.full_text_search(NS, "needle", 5, &no_filter()).unwrap();
        // b = 0 disables length normalization: equal tf now scores equally.
        eng.set_bm25_params(1.5, 0.0);
        let flat_scores = eng.full_text_search(NS, "needle", 5, &no_filter()).unwrap();

        assert!(default_scores[0].similarity > default_scores[1].similarity);
        assert!((flat_scores[0].similarity - flat_scores[1].similarity).abs() < 1e-6);
    }

    #[test]
    fn test_searches_on_empty_namespace() {
        let eng = engine(4, 100);
        assert!(eng.search(NS, &[1.0, 0.0, 0.0, 0.0], 5, &no_filter()).unwrap().is_empty());
        assert!(eng.full_text_search(NS, "anything", 5, &no_filter()).unwrap().is_empty());
        let results = eng
            .hybrid_search(NS, &[1.0, 0.0, 0.0, 0.0], "anything", &HybridOptions::default())
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_insert_then_delete_restores_state() {
        let eng = engine(4, 100);
        eng.set_indexed_fields(NS, vec!["t".to_string()]).unwrap();
        eng.insert(NS, "keep", vec![1.0, 0.0, 0.0, 0.0], meta(&[("t", json!("kept words"))])).unwrap();

        let count_before = eng.count(NS).unwrap();
        let text_before = eng.full_text_search(NS, "kept", 5, &no_filter()).unwrap();

        eng.insert(NS, "temp", vec![0.0, 1.0, 0.0, 0.0], meta(&[("t", json!("transient"))])).unwrap();
        eng.delete(NS, "temp").unwrap();

        assert_eq!(eng.count(NS).unwrap(), count_before);
        assert_eq!(eng.full_text_search(NS, "kept", 5, &no_filter()).unwrap(), text_before);
        assert!(eng.full_text_search(NS, "transient", 5, &no_filter()).unwrap().is_empty());
        assert_invariants(&eng, NS);
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let config = EngineConfig {
            auto_compaction: true,
            compaction_interval: Duration::from_millis(50),
            ..EngineConfig::new(4, 100)
        };
        let eng = Engine::new(config).unwrap();
        eng.insert(NS, "a", vec![1.0, 0.0, 0.0, 0.0], Metadata::new()).unwrap();
        std::thread::sleep(Duration::from_millis(120));
        eng.destroy();
        eng.destroy();
        // Engine keeps serving after the timer is gone.
        assert_eq!(eng.count(NS).unwrap(), 1);
    }
}
