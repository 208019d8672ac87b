pub mod embeddings;
pub mod error;

use std::collections::{BTreeMap, HashMap};

pub use embeddings::{EmbeddingStore, Snapshot};
pub use error::{StoreError, StoreResult};

/// Catalog item key. Matches SQLite's integer rowid.
pub type ItemId = i64;

/// Read access to item vectors, by id.
///
/// Implemented by store snapshots and by plain maps so the ranker can run
/// against a substitute in tests.
pub trait EmbeddingLookup {
    fn vector(&self, id: ItemId) -> Option<&[f32]>;
}

impl EmbeddingLookup for HashMap<ItemId, Vec<f32>> {
    fn vector(&self, id: ItemId) -> Option<&[f32]> {
        self.get(&id).map(Vec::as_slice)
    }
}

impl EmbeddingLookup for BTreeMap<ItemId, Vec<f32>> {
    fn vector(&self, id: ItemId) -> Option<&[f32]> {
        self.get(&id).map(Vec::as_slice)
    }
}
