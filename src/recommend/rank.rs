use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;

use crate::embed::{centroid, cosine_similarity};
use crate::store::{EmbeddingLookup, ItemId, StoreError};

/// A ranked candidate with its similarity to the completed-set centroid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Scored {
    pub id: ItemId,
    pub similarity: f32,
}

/// Rank `candidates` by similarity to the centroid of `completed`.
pub fn rank<L>(
    completed: &HashSet<ItemId>,
    candidates: impl IntoIterator<Item = ItemId>,
    lookup: &L,
    top_n: usize,
) -> Vec<ItemId>
where
    L: EmbeddingLookup + ?Sized,
{
    rank_scored(completed, candidates, lookup, top_n)
        .into_iter()
        .map(|s| s.id)
        .collect()
}

/// Same as [`rank`], keeping the similarity of every returned id.
///
/// Ids without a stored vector are skipped on both sides. A zero-magnitude
/// vector has no defined cosine, so such candidates are dropped instead of
/// scored; the same goes for everything when the centroid itself is zero.
/// Ties are broken by ascending id so output is deterministic.
pub fn rank_scored<L>(
    completed: &HashSet<ItemId>,
    candidates: impl IntoIterator<Item = ItemId>,
    lookup: &L,
    top_n: usize,
) -> Vec<Scored>
where
    L: EmbeddingLookup + ?Sized,
{
    if top_n == 0 {
        return Vec::new();
    }

    let Some(center) = completed_centroid(completed, lookup) else {
        tracing::debug!(completed = completed.len(), "no completed embeddings, nothing to rank");
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut scored: Vec<Scored> = Vec::new();
    for id in candidates {
        if completed.contains(&id) || !seen.insert(id) {
            continue;
        }
        let Some(vector) = lookup.vector(id) else {
            tracing::trace!(item_id = id, "candidate has no embedding, skipping");
            continue;
        };
        match score(&center, id, vector) {
            Ok(similarity) => scored.push(Scored { id, similarity }),
            Err(e) => tracing::trace!(error = %e, "excluding candidate"),
        }
    }

    scored.sort_by(by_similarity_then_id);
    scored.truncate(top_n);
    scored
}

fn completed_centroid<L>(completed: &HashSet<ItemId>, lookup: &L) -> Option<Vec<f32>>
where
    L: EmbeddingLookup + ?Sized,
{
    // Sorted so the centroid's float summation order is stable.
    let mut ids: Vec<ItemId> = completed.iter().copied().collect();
    ids.sort_unstable();

    let mut vectors: Vec<&[f32]> = Vec::with_capacity(ids.len());
    for id in ids {
        match lookup.vector(id) {
            Some(v) if vectors.first().is_none_or(|first| first.len() == v.len()) => {
                vectors.push(v)
            }
            Some(v) => tracing::trace!(
                item_id = id,
                len = v.len(),
                "completed vector has wrong dimension, skipping"
            ),
            None => tracing::trace!(item_id = id, "completed item has no embedding, skipping"),
        }
    }
    centroid(&vectors)
}

fn score(center: &[f32], id: ItemId, vector: &[f32]) -> Result<f32, StoreError> {
    cosine_similarity(center, vector)
        .filter(|s| s.is_finite())
        .ok_or(StoreError::DegenerateVector(id))
}

fn by_similarity_then_id(a: &Scored, b: &Scored) -> Ordering {
    b.similarity
        .total_cmp(&a.similarity)
        .then_with(|| a.id.cmp(&b.id))
}
