pub mod rank;

use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;

use crate::catalog::Catalog;
use crate::store::{EmbeddingStore, ItemId};
pub use rank::Scored;

pub const DEFAULT_TOP_N: usize = 5;

/// Entry point for recommendations. Holds the store it reads from; every
/// call works on one snapshot and performs no I/O.
pub struct Recommender {
    store: Arc<EmbeddingStore>,
}

impl Recommender {
    pub fn new(store: Arc<EmbeddingStore>) -> Self {
        Self { store }
    }

    /// Up to `top_n` ids from `all_ids`, most similar first, never one from
    /// `completed_ids`. Empty when the learner has no embedded completions.
    pub fn recommend(
        &self,
        completed_ids: &HashSet<ItemId>,
        all_ids: &HashSet<ItemId>,
        top_n: usize,
    ) -> Vec<ItemId> {
        self.recommend_scored(completed_ids, all_ids, top_n)
            .into_iter()
            .map(|s| s.id)
            .collect()
    }

    pub fn recommend_scored(
        &self,
        completed_ids: &HashSet<ItemId>,
        all_ids: &HashSet<ItemId>,
        top_n: usize,
    ) -> Vec<Scored> {
        let snapshot = self.store.snapshot();
        let candidates = all_ids.difference(completed_ids).copied();
        let ranked = rank::rank_scored(completed_ids, candidates, snapshot.as_ref(), top_n);
        tracing::debug!(
            completed = completed_ids.len(),
            catalog = all_ids.len(),
            returned = ranked.len(),
            "recommendations computed"
        );
        ranked
    }

    /// Pull the learner's completions and the active catalog from `catalog`
    /// and rank against them.
    pub fn recommend_for_learner(
        &self,
        catalog: &dyn Catalog,
        learner_id: i64,
        top_n: usize,
    ) -> Result<Vec<Scored>> {
        let completed = catalog.completed_ids(learner_id)?;
        let all = catalog.all_ids()?;
        Ok(self.recommend_scored(&completed, &all, top_n))
    }
}
