//! Exact-equality metadata filtering.
//!
//! A filter is a set of required `key == value` pairs; an entry matches only
//! when its metadata holds exactly that value under every key. An empty
//! filter matches everything.

use crate::document::{Metadata, MetadataFilter};

/// Checks whether an entry's metadata satisfies every filter constraint.
pub fn matches_filter(metadata: &Metadata, filter: &MetadataFilter) -> bool {
    filter
        .iter()
        .all(|(key, expected)| metadata.get(key) == Some(expected))
}
