//! Namespace store: slot arena, id maps, and the operations that keep the
//! vector index and the inverted index consistent under mutation.
//!
//! A [`Namespace`] wraps its state in a readers/writer lock: any number of
//! concurrent readers, one writer, writers on different namespaces in
//! parallel. No operation ever holds locks on two namespaces.
//!
//! Slots are non-negative integers stable for an entry's in-memory lifetime.
//! The allocator keeps a monotonic high-water mark plus a free list of
//! reclaimed slots; a slot is either live (present in the entry arena) or on
//! the free list, never both, and together with the never-allocated slots
//! `≥ next_slot` they partition the slot space.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use crate::bm25::{bm25_scores, InvertedIndex};
use crate::config::{HYBRID_OVERSAMPLE, KNN_OVERSAMPLE, MMR_LAMBDA, WEIGHT_SUM_TOLERANCE};
use crate::document::{Entry, Metadata, MetadataFilter};
use crate::error::EngineError;
use crate::search::{
    linear_fusion, matches_filter, mmr_rerank, rrf_fusion, HybridOptions, HybridResult,
    SearchResult,
};
use crate::vector::VectorIndex;

/// Internal namespace state, protected by the namespace lock.
pub struct NamespaceData<I: VectorIndex> {
    pub(crate) dim: usize,
    pub(crate) max_elements: usize,
    /// Slot arena: `entries[slot]` is `Some` exactly when the slot is live.
    /// Length always equals `next_slot`.
    pub(crate) entries: Vec<Option<Entry>>,
    /// public id → slot, exactly one-to-one with live slots
    pub(crate) id_map: HashMap<String, u32>,
    /// Reclaimed slots, reused LIFO before the high-water mark advances
    pub(crate) free_list: Vec<u32>,
    pub(crate) next_slot: u32,
    /// Metadata keys whose string values feed the inverted index
    pub(crate) indexed_fields: Vec<String>,
    pub(crate) text_index: InvertedIndex,
    pub(crate) vector_index: I,
}

impl<I: VectorIndex> NamespaceData<I> {
    pub(crate) fn new(dim: usize, max_elements: usize) -> Result<Self, EngineError> {
        Ok(Self {
            dim,
            max_elements,
            entries: Vec::new(),
            id_map: HashMap::new(),
            free_list: Vec::new(),
            next_slot: 0,
            indexed_fields: Vec::new(),
            text_index: InvertedIndex::new(),
            vector_index: I::open(dim, max_elements)?,
        })
    }

    /// Number of live entries.
    pub fn live_count(&self) -> usize {
        self.id_map.len()
    }

    pub(crate) fn entry(&self, slot: u32) -> Option<&Entry> {
        self.entries.get(slot as usize).and_then(Option::as_ref)
    }

    fn check_dim(&self, len: usize) -> Result<(), EngineError> {
        if len != self.dim {
            return Err(EngineError::DimensionMismatch {
                expected: self.dim,
                actual: len,
            });
        }
        Ok(())
    }

    /// Pops the free list, or advances the high-water mark.
    fn alloc_slot(&mut self) -> Result<u32, EngineError> {
        if let Some(slot) = self.free_list.pop() {
            return Ok(slot);
        }
        if self.next_slot as usize >= self.max_elements {
            return Err(EngineError::CapacityExhausted {
                max_elements: self.max_elements,
            });
        }
        let slot = self.next_slot;
        self.next_slot += 1;
        self.entries.push(None);
        Ok(slot)
    }

    pub(crate) fn insert(
        &mut self,
        id: &str,
        vector: Vec<f32>,
        metadata: Metadata,
    ) -> Result<(), EngineError> {
        self.check_dim(vector.len())?;
        if self.id_map.contains_key(id) {
            return Err(EngineError::DuplicateId(id.to_string()));
        }

        let slot = self.alloc_slot()?;
        if let Err(e) = self.vector_index.add_point(&vector, slot) {
            // The slot was never published; parking it on the free list
            // keeps the arena partition intact.
            self.free_list.push(slot);
            return Err(e);
        }
        self.text_index
            .index_entry(slot, &metadata, &self.indexed_fields);
        self.id_map.insert(id.to_string(), slot);
        self.entries[slot as usize] = Some(Entry {
            id: id.to_string(),
            vector,
            metadata,
        });
        Ok(())
    }

    /// Inserts a batch after validating that no id collides with a live id
    /// or an earlier id in the batch.
    ///
    /// Dimensions are validated per entry during the apply pass, so a
    /// malformed later entry leaves earlier entries committed.
    pub(crate) fn batch_insert(&mut self, batch: Vec<Entry>) -> Result<(), EngineError> {
        let mut seen: HashSet<&str> = HashSet::with_capacity(batch.len());
        for entry in &batch {
            if self.id_map.contains_key(&entry.id) || !seen.insert(entry.id.as_str()) {
                return Err(EngineError::DuplicateId(entry.id.clone()));
            }
        }
        for entry in batch {
            let Entry {
                id,
                vector,
                metadata,
            } = entry;
            self.insert(&id, vector, metadata)?;
        }
        Ok(())
    }

    /// Replaces an entry's vector (and optionally metadata) in place.
    ///
    /// The slot number is preserved: the old point is deleted from the
    /// vector index and the slot id re-added with the new vector. The slot
    /// is fully re-indexed even when only the vector changed.
    pub(crate) fn update(
        &mut self,
        id: &str,
        vector: Vec<f32>,
        new_metadata: Option<Metadata>,
    ) -> Result<(), EngineError> {
        self.check_dim(vector.len())?;
        let slot = *self
            .id_map
            .get(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;

        self.vector_index.mark_delete(slot)?;
        self.vector_index.add_point(&vector, slot)?;

        let Some(entry) = self.entries.get_mut(slot as usize).and_then(Option::as_mut) else {
            return Err(EngineError::NotFound(id.to_string()));
        };
        entry.vector = vector;
        if let Some(metadata) = new_metadata {
            entry.metadata = metadata;
        }
        self.text_index
            .index_entry(slot, &entry.metadata, &self.indexed_fields);
        Ok(())
    }

    /// Deletes an entry; a missing id is a silent no-op.
    pub(crate) fn delete(&mut self, id: &str) -> Result<(), EngineError> {
        let Some(slot) = self.id_map.remove(id) else {
            return Ok(());
        };
        self.vector_index.mark_delete(slot)?;
        if let Some(entry) = self.entries.get_mut(slot as usize) {
            *entry = None;
        }
        self.free_list.push(slot);
        self.text_index.unindex(slot);
        Ok(())
    }

    /// Replaces the indexed-field list.
    ///
    /// Existing entries are not re-indexed: their postings and document
    /// lengths keep reflecting the field list in force when each slot was
    /// last indexed. Only later inserts, updates, and compaction pick up
    /// the new set.
    pub(crate) fn set_indexed_fields(&mut self, fields: Vec<String>) {
        self.indexed_fields = fields;
    }

    pub(crate) fn search_vector(
        &self,
        query: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<SearchResult>, EngineError> {
        self.check_dim(query.len())?;
        let fetch = (KNN_OVERSAMPLE * k).min(self.live_count());
        if fetch == 0 {
            return Ok(Vec::new());
        }

        let neighbors = self.vector_index.search_knn(query, fetch)?;
        let mut results = Vec::with_capacity(k.min(fetch));
        for (slot, distance) in neighbors {
            let Some(entry) = self.entry(slot) else {
                continue;
            };
            if !matches_filter(&entry.metadata, filter) {
                continue;
            }
            results.push(SearchResult {
                id: entry.id.clone(),
                similarity: 1.0 - distance,
                metadata: entry.metadata.clone(),
            });
            if results.len() == k {
                break;
            }
        }
        Ok(results)
    }

    pub(crate) fn search_text(
        &self,
        query: &str,
        k: usize,
        filter: &MetadataFilter,
        k1: f32,
        b: f32,
    ) -> Vec<SearchResult> {
        let scored = bm25_scores(
            &self.text_index,
            &self.indexed_fields,
            query,
            k1,
            b,
            |slot| self.entry(slot).map(|e| &e.metadata),
        );

        let mut results = Vec::with_capacity(k.min(scored.len()));
        for (slot, score) in scored {
            let Some(entry) = self.entry(slot) else {
                continue;
            };
            if !matches_filter(&entry.metadata, filter) {
                continue;
            }
            results.push(SearchResult {
                id: entry.id.clone(),
                similarity: score,
                metadata: entry.metadata.clone(),
            });
            if results.len() == k {
                break;
            }
        }
        results
    }

    pub(crate) fn hybrid(
        &self,
        query: &[f32],
        query_text: &str,
        options: &HybridOptions,
        k1: f32,
        b: f32,
    ) -> Result<Vec<HybridResult>, EngineError> {
        if (options.vector_weight + options.text_weight - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(EngineError::BadWeights {
                vector_weight: options.vector_weight,
                text_weight: options.text_weight,
            });
        }

        let pool = (HYBRID_OVERSAMPLE * options.k).min(self.live_count());
        let vector_results = self.search_vector(query, pool, &options.filter)?;
        let text_results = self.search_text(query_text, pool, &options.filter, k1, b);

        let mut merged = linear_fusion(
            &vector_results,
            &text_results,
            options.vector_weight,
            options.text_weight,
        );
        if options.rerank {
            let candidates = merged
                .into_iter()
                .map(|result| {
                    let vector = self
                        .id_map
                        .get(&result.id)
                        .and_then(|&slot| self.entry(slot))
                        .map(|entry| entry.vector.clone())
                        .unwrap_or_default();
                    (result, vector)
                })
                .collect();
            merged = mmr_rerank(candidates, MMR_LAMBDA);
        }
        merged.truncate(options.k);
        Ok(merged)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn hybrid_rrf(
        &self,
        query: &[f32],
        query_text: &str,
        k: usize,
        rrf_k: f32,
        filter: &MetadataFilter,
        k1: f32,
        b: f32,
    ) -> Result<Vec<HybridResult>, EngineError> {
        let pool = (HYBRID_OVERSAMPLE * k).min(self.live_count());
        let vector_results = self.search_vector(query, pool, filter)?;
        let text_results = self.search_text(query_text, pool, filter, k1, b);

        let mut merged = rrf_fusion(&vector_results, &text_results, rrf_k);
        merged.truncate(k);
        Ok(merged)
    }

    /// Rebuilds the namespace with contiguous slot numbering.
    ///
    /// Live entries are replayed into a fresh vector index and inverted
    /// index (re-indexed under the current field list); the free list
    /// empties and the high-water mark drops to the live count. Built
    /// off to the side and swapped in, so a failure leaves the namespace
    /// untouched.
    pub(crate) fn compact(&mut self) -> Result<usize, EngineError> {
        let live = self.live_count();
        let mut vector_index = I::open(self.dim, self.max_elements)?;
        let mut entries: Vec<Option<Entry>> = Vec::with_capacity(live);
        let mut id_map: HashMap<String, u32> = HashMap::with_capacity(live);
        let mut text_index = InvertedIndex::new();

        for old in self.entries.iter().filter_map(Option::as_ref) {
            let slot = entries.len() as u32;
            vector_index.add_point(&old.vector, slot)?;
            text_index.index_entry(slot, &old.metadata, &self.indexed_fields);
            id_map.insert(old.id.clone(), slot);
            entries.push(Some(old.clone()));
        }

        let count = entries.len();
        self.vector_index = vector_index;
        self.entries = entries;
        self.id_map = id_map;
        self.text_index = text_index;
        self.free_list.clear();
        self.next_slot = count as u32;
        Ok(count)
    }

    /// Validates internal invariants; used after snapshot deserialization.
    ///
    /// Checks the arena/free-list partition, id-map symmetry, vector
    /// dimensions, posting liveness and pruning, and BM25 statistic
    /// consistency.
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.entries.len() != self.next_slot as usize {
            return Err(format!(
                "arena length {} != next_slot {}",
                self.entries.len(),
                self.next_slot
            ));
        }

        let live = self.entries.iter().filter(|e| e.is_some()).count();
        if live != self.id_map.len() {
            return Err(format!(
                "live entries({live}) != id_map({})",
                self.id_map.len()
            ));
        }

        for (id, &slot) in &self.id_map {
            match self.entry(slot) {
                Some(entry) if entry.id == *id => {}
                Some(entry) => {
                    return Err(format!(
                        "id '{id}' maps to slot {slot} holding '{}'",
                        entry.id
                    ));
                }
                None => return Err(format!("id '{id}' maps to dead slot {slot}")),
            }
        }

        for entry in self.entries.iter().flatten() {
            if entry.vector.len() != self.dim {
                return Err(format!(
                    "entry '{}' has vector length {} != dimension {}",
                    entry.id,
                    entry.vector.len(),
                    self.dim
                ));
            }
        }

        let mut seen = HashSet::with_capacity(self.free_list.len());
        for &slot in &self.free_list {
            if slot >= self.next_slot {
                return Err(format!("free slot {slot} >= next_slot {}", self.next_slot));
            }
            if !seen.insert(slot) {
                return Err(format!("slot {slot} appears twice on the free list"));
            }
            if self.entry(slot).is_some() {
                return Err(format!("slot {slot} is both live and free"));
            }
        }
        if live + self.free_list.len() != self.next_slot as usize {
            return Err(format!(
                "live({live}) + free({}) != next_slot({})",
                self.free_list.len(),
                self.next_slot
            ));
        }

        if self.text_index.total_docs() != live || self.text_index.doc_lengths_len() != live {
            return Err(format!(
                "BM25 stats out of step: total_docs={} doc_lengths={} live={live}",
                self.text_index.total_docs(),
                self.text_index.doc_lengths_len()
            ));
        }
        for (&slot, _) in self.text_index.doc_lengths_iter() {
            if self.entry(slot).is_none() {
                return Err(format!("doc_lengths references dead slot {slot}"));
            }
        }
        for (term, slots) in self.text_index.postings_iter() {
            if slots.is_empty() {
                return Err(format!("empty posting for term '{term}'"));
            }
            for &slot in slots {
                if self.entry(slot).is_none() {
                    return Err(format!("posting '{term}' references dead slot {slot}"));
                }
            }
        }

        if live > 0 {
            let mean = self
                .text_index
                .doc_lengths_iter()
                .map(|(_, &l)| l as f32)
                .sum::<f32>()
                / live as f32;
            if (mean - self.text_index.avg_doc_length()).abs() > 1e-3 {
                return Err(format!(
                    "avg_doc_length {} != recomputed mean {mean}",
                    self.text_index.avg_doc_length()
                ));
            }
        } else if self.text_index.avg_doc_length() != 0.0 {
            return Err("avg_doc_length must be 0 for an empty namespace".into());
        }

        Ok(())
    }
}

/// A namespace: an isolated document universe behind a readers/writer lock.
pub struct Namespace<I: VectorIndex> {
    pub(crate) name: String,
    pub(crate) data: RwLock<NamespaceData<I>>,
}

impl<I: VectorIndex> Namespace<I> {
    pub(crate) fn create(
        name: String,
        dim: usize,
        max_elements: usize,
    ) -> Result<Self, EngineError> {
        Ok(Self {
            name,
            data: RwLock::new(NamespaceData::new(dim, max_elements)?),
        })
    }

    /// Namespace name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.data.read().live_count()
    }

    /// Whether the namespace holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn insert(
        &self,
        id: &str,
        vector: Vec<f32>,
        metadata: Metadata,
    ) -> Result<(), EngineError> {
        self.data.write().insert(id, vector, metadata)
    }

    pub(crate) fn batch_insert(&self, batch: Vec<Entry>) -> Result<(), EngineError> {
        self.data.write().batch_insert(batch)
    }

    pub(crate) fn update(
        &self,
        id: &str,
        vector: Vec<f32>,
        metadata: Option<Metadata>,
    ) -> Result<(), EngineError> {
        self.data.write().update(id, vector, metadata)
    }

    pub(crate) fn delete(&self, id: &str) -> Result<(), EngineError> {
        self.data.write().delete(id)
    }

    pub(crate) fn set_indexed_fields(&self, fields: Vec<String>) {
        self.data.write().set_indexed_fields(fields);
    }

    pub(crate) fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<SearchResult>, EngineError> {
        self.data.read().search_vector(query, k, filter)
    }

    pub(crate) fn full_text_search(
        &self,
        query: &str,
        k: usize,
        filter: &MetadataFilter,
        k1: f32,
        b: f32,
    ) -> Vec<SearchResult> {
        self.data.read().search_text(query, k, filter, k1, b)
    }

    pub(crate) fn hybrid_search(
        &self,
        query: &[f32],
        query_text: &str,
        options: &HybridOptions,
        k1: f32,
        b: f32,
    ) -> Result<Vec<HybridResult>, EngineError> {
        self.data.read().hybrid(query, query_text, options, k1, b)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn hybrid_search_rrf(
        &self,
        query: &[f32],
        query_text: &str,
        k: usize,
        rrf_k: f32,
        filter: &MetadataFilter,
        k1: f32,
        b: f32,
    ) -> Result<Vec<HybridResult>, EngineError> {
        self.data
            .read()
            .hybrid_rrf(query, query_text, k, rrf_k, filter, k1, b)
    }

    pub(crate) fn compact(&self) -> Result<usize, EngineError> {
        self.data.write().compact()
    }
}
