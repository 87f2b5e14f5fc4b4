//! Disk persistence for namespaces.
//!
//! A snapshot is two files next to each other: `{base}.idx`, the vector
//! index blob in the adapter's own format, and `{base}.meta.json`, a JSON
//! document holding the id maps, entries, slot allocator state, inverted
//! index, and BM25 statistics. Writes go to a temp sibling and are renamed
//! into place. Loading validates the deserialized state and reports any
//! missing or inconsistent file as corrupt.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::bm25::InvertedIndex;
use crate::document::{Entry, Metadata};
use crate::error::EngineError;
use crate::storage::namespace::NamespaceData;
use crate::vector::VectorIndex;

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryRecord {
    public_id: String,
    vector: Vec<f32>,
    metadata: Metadata,
}

/// The `{base}.meta.json` document.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NamespaceSnapshot {
    id_map: BTreeMap<String, u32>,
    rev_map: Vec<(u32, EntryRecord)>,
    next_internal_id: u32,
    free_list: Vec<u32>,
    full_text_index: Vec<(String, Vec<u32>)>,
    indexed_fields: Vec<String>,
    doc_lengths: Vec<(u32, u32)>,
    avg_doc_length: f32,
    total_docs: usize,
}

fn path_with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut os = base.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

pub(crate) fn index_path(file_base: &Path) -> PathBuf {
    path_with_suffix(file_base, ".idx")
}

pub(crate) fn meta_path(file_base: &Path) -> PathBuf {
    path_with_suffix(file_base, ".meta.json")
}

fn snapshot_of<I: VectorIndex>(data: &NamespaceData<I>) -> NamespaceSnapshot {
    let id_map: BTreeMap<String, u32> = data
        .id_map
        .iter()
        .map(|(id, &slot)| (id.clone(), slot))
        .collect();

    // Arrays are written in slot/term order so identical state produces
    // identical bytes.
    let rev_map: Vec<(u32, EntryRecord)> = data
        .entries
        .iter()
        .enumerate()
        .filter_map(|(slot, entry)| {
            entry.as_ref().map(|e| {
                (
                    slot as u32,
                    EntryRecord {
                        public_id: e.id.clone(),
                        vector: e.vector.clone(),
                        metadata: e.metadata.clone(),
                    },
                )
            })
        })
        .collect();

    let mut full_text_index: Vec<(String, Vec<u32>)> = data
        .text_index
        .postings_iter()
        .map(|(term, slots)| {
            let mut slots: Vec<u32> = slots.iter().copied().collect();
            slots.sort_unstable();
            (term.clone(), slots)
        })
        .collect();
    full_text_index.sort_unstable_by(|a, b| a.0.cmp(&b.0));

    let mut doc_lengths: Vec<(u32, u32)> = data
        .text_index
        .doc_lengths_iter()
        .map(|(&slot, &len)| (slot, len))
        .collect();
    doc_lengths.sort_unstable_by_key(|&(slot, _)| slot);

    NamespaceSnapshot {
        id_map,
        rev_map,
        next_internal_id: data.next_slot,
        free_list: data.free_list.clone(),
        full_text_index,
        indexed_fields: data.indexed_fields.clone(),
        doc_lengths,
        avg_doc_length: data.text_index.avg_doc_length(),
        total_docs: data.text_index.total_docs(),
    }
}

/// Writes a namespace snapshot at `{base}.idx` + `{base}.meta.json`.
///
/// The parent directory is created if missing; both files are written via a
/// temp sibling and an atomic rename.
pub(crate) fn save_namespace<I: VectorIndex>(
    name: &str,
    data: &NamespaceData<I>,
    file_base: &Path,
) -> Result<(), EngineError> {
    if let Some(parent) = file_base.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    data.vector_index.write_index(&index_path(file_base))?;

    let snapshot = snapshot_of(data);
    let bytes = serde_json::to_vec(&snapshot).map_err(io::Error::other)?;
    let meta = meta_path(file_base);
    let tmp = path_with_suffix(&meta, ".tmp");
    fs::write(&tmp, &bytes)?;
    fs::rename(&tmp, &meta)?;

    tracing::info!(
        "saved namespace '{name}' ({} entries, {} bytes of metadata)",
        data.live_count(),
        bytes.len()
    );
    Ok(())
}

/// Reads a snapshot back into a fresh [`NamespaceData`].
///
/// The loading namespace's `dim`/`max_elements` must match the persisted
/// state; any mismatch, missing file, or internal inconsistency is reported
/// as [`EngineError::LoadCorrupt`].
pub(crate) fn load_namespace<I: VectorIndex>(
    name: &str,
    dim: usize,
    max_elements: usize,
    file_base: &Path,
) -> Result<NamespaceData<I>, EngineError> {
    let meta = meta_path(file_base);
    let raw = fs::read(&meta)
        .map_err(|e| EngineError::LoadCorrupt(format!("cannot read {}: {e}", meta.display())))?;
    let snapshot: NamespaceSnapshot = serde_json::from_slice(&raw)
        .map_err(|e| EngineError::LoadCorrupt(format!("invalid metadata in {}: {e}", meta.display())))?;

    if snapshot.next_internal_id as usize > max_elements {
        return Err(EngineError::LoadCorrupt(format!(
            "snapshot spans {} slots but namespace capacity is {max_elements}",
            snapshot.next_internal_id
        )));
    }

    let mut entries: Vec<Option<Entry>> = (0..snapshot.next_internal_id).map(|_| None).collect();
    for (slot, record) in snapshot.rev_map {
        if slot >= snapshot.next_internal_id {
            return Err(EngineError::LoadCorrupt(format!(
                "slot {slot} out of range (nextInternalId = {})",
                snapshot.next_internal_id
            )));
        }
        if record.vector.len() != dim {
            return Err(EngineError::LoadCorrupt(format!(
                "entry '{}' has vector length {}, namespace dimension is {dim}",
                record.public_id,
                record.vector.len()
            )));
        }
        entries[slot as usize] = Some(Entry {
            id: record.public_id,
            vector: record.vector,
            metadata: record.metadata,
        });
    }

    let postings: HashMap<String, HashSet<u32>> = snapshot
        .full_text_index
        .into_iter()
        .map(|(term, slots)| (term, slots.into_iter().collect()))
        .collect();
    let doc_lengths: HashMap<u32, u32> = snapshot.doc_lengths.into_iter().collect();
    let text_index = InvertedIndex::from_parts(
        postings,
        doc_lengths,
        snapshot.total_docs,
        snapshot.avg_doc_length,
    );

    let mut vector_index = I::open(dim, max_elements)?;
    vector_index.read_index(&index_path(file_base))?;

    let data = NamespaceData {
        dim,
        max_elements,
        entries,
        id_map: snapshot.id_map.into_iter().collect(),
        free_list: snapshot.free_list,
        next_slot: snapshot.next_internal_id,
        indexed_fields: snapshot.indexed_fields,
        text_index,
        vector_index,
    };
    data.validate().map_err(EngineError::LoadCorrupt)?;

    tracing::info!("loaded namespace '{name}' ({} entries)", data.live_count());
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::HnswVectorIndex;
    use serde_json::json;

    fn tmp_base(tag: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("mirador_persist_{}", uuid::Uuid::new_v4()))
            .join(tag)
    }

    fn cleanup(base: &Path) {
        if let Some(parent) = base.parent() {
            let _ = fs::remove_dir_all(parent);
        }
    }

    fn sample_data() -> NamespaceData<HnswVectorIndex> {
        let mut data = NamespaceData::<HnswVectorIndex>::new(4, 100).unwrap();
        data.set_indexed_fields(vec!["t".to_string()]);
        data.insert(
            "a",
            vec![1.0, 0.0, 0.0, 0.0],
            [("t".to_string(), json!("alpha beta"))].into_iter().collect(),
        )
        .unwrap();
        data.insert(
            "b",
            vec![0.0, 1.0, 0.0, 0.0],
            [("t".to_string(), json!("beta gamma"))].into_iter().collect(),
        )
        .unwrap();
        data.insert("c", vec![0.0, 0.0, 1.0, 0.0], Metadata::new())
            .unwrap();
        data.delete("c").unwrap();
        data
    }

    #[test]
    fn test_save_load_roundtrip() {
        let base = tmp_base("roundtrip");
        let data = sample_data();
        save_namespace("ns", &data, &base).unwrap();

        let loaded = load_namespace::<HnswVectorIndex>("ns", 4, 100, &base).unwrap();
        assert_eq!(loaded.live_count(), 2);
        assert_eq!(loaded.next_slot, 3);
        assert_eq!(loaded.free_list, vec![2]);
        assert_eq!(loaded.indexed_fields, vec!["t".to_string()]);
        assert_eq!(loaded.id_map.get("a"), Some(&0));
        assert_eq!(loaded.text_index.total_docs(), 2);
        assert!(loaded.text_index.postings("beta").is_some());
        assert!(loaded.validate().is_ok());
        cleanup(&base);
    }

    #[test]
    fn test_snapshot_files_exist() {
        let base = tmp_base("files");
        let data = sample_data();
        save_namespace("ns", &data, &base).unwrap();
        assert!(index_path(&base).exists());
        assert!(meta_path(&base).exists());
        cleanup(&base);
    }

    #[test]
    fn test_meta_json_schema_keys() {
        let base = tmp_base("schema");
        let data = sample_data();
        save_namespace("ns", &data, &base).unwrap();

        let raw = fs::read(meta_path(&base)).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        for key in [
            "idMap",
            "revMap",
            "nextInternalId",
            "freeList",
            "fullTextIndex",
            "indexedFields",
            "docLengths",
            "avgDocLength",
            "totalDocs",
        ] {
            assert!(value.get(key).is_some(), "missing key {key}");
        }
        assert_eq!(value["nextInternalId"], json!(3));
        assert_eq!(value["totalDocs"], json!(2));
        // revMap entries are [slot, { publicId, vector, metadata }]
        let first = &value["revMap"][0];
        assert_eq!(first[0], json!(0));
        assert_eq!(first[1]["publicId"], json!("a"));
        cleanup(&base);
    }

    #[test]
    fn test_repeated_saves_are_identical() {
        let base = tmp_base("stable");
        let data = sample_data();
        save_namespace("ns", &data, &base).unwrap();
        let first = fs::read(meta_path(&base)).unwrap();
        save_namespace("ns", &data, &base).unwrap();
        let second = fs::read(meta_path(&base)).unwrap();
        assert_eq!(first, second);
        cleanup(&base);
    }

    #[test]
    fn test_load_missing_files_is_corrupt() {
        let base = tmp_base("missing");
        let err = load_namespace::<HnswVectorIndex>("ns", 4, 100, &base);
        assert!(matches!(err, Err(EngineError::LoadCorrupt(_))));
        cleanup(&base);
    }

    #[test]
    fn test_load_garbage_meta_is_corrupt() {
        let base = tmp_base("garbage");
        fs::create_dir_all(base.parent().unwrap()).unwrap();
        fs::write(meta_path(&base), b"not json at all").unwrap();
        let err = load_namespace::<HnswVectorIndex>("ns", 4, 100, &base);
        assert!(matches!(err, Err(EngineError::LoadCorrupt(_))));
        cleanup(&base);
    }

    #[test]
    fn test_load_dimension_mismatch_is_corrupt() {
        let base = tmp_base("dim");
        let data = sample_data();
        save_namespace("ns", &data, &base).unwrap();
        let err = load_namespace::<HnswVectorIndex>("ns", 8, 100, &base);
        assert!(matches!(err, Err(EngineError::LoadCorrupt(_))));
        cleanup(&base);
    }

    #[test]
    fn test_load_capacity_mismatch_is_corrupt() {
        let base = tmp_base("cap");
        let data = sample_data();
        save_namespace("ns", &data, &base).unwrap();
        // Snapshot spans 3 slots; a namespace capped at 2 cannot hold it.
        let err = load_namespace::<HnswVectorIndex>("ns", 4, 2, &base);
        assert!(matches!(err, Err(EngineError::LoadCorrupt(_))));
        cleanup(&base);
    }

    #[test]
    fn test_load_tampered_consistency_is_corrupt() {
        let base = tmp_base("tamper");
        let data = sample_data();
        save_namespace("ns", &data, &base).unwrap();

        let raw = fs::read(meta_path(&base)).unwrap();
        let mut value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        // Claim one more document than the snapshot actually holds.
        value["totalDocs"] = json!(17);
        fs::write(meta_path(&base), serde_json::to_vec(&value).unwrap()).unwrap();

        let err = load_namespace::<HnswVectorIndex>("ns", 4, 100, &base);
        assert!(matches!(err, Err(EngineError::LoadCorrupt(_))));
        cleanup(&base);
    }
}
