//! Storage layer: namespaces and disk persistence.

pub mod namespace;
pub mod persistence;

pub use namespace::{Namespace, NamespaceData};
