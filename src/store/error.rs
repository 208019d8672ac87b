use std::path::PathBuf;
use thiserror::Error;

use super::ItemId;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no embedding stored for item {0}")]
    NotFound(ItemId),

    #[error("embedding store at {path} is corrupt: {reason}")]
    StoreCorrupt { path: PathBuf, reason: String },

    #[error("item {0} has a zero-magnitude embedding")]
    DegenerateVector(ItemId),

    #[error("embedding for item {item_id} has dimension {got}, store expects {expected}")]
    DimensionMismatch {
        item_id: ItemId,
        expected: usize,
        got: usize,
    },

    #[error("refusing to store an empty embedding for item {0}")]
    EmptyVector(ItemId),

    #[error("embedding for item {0} contains a non-finite component")]
    NonFinite(ItemId),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serializing embedding store: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::StoreCorrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
