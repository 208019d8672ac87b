pub mod publish;
pub mod schema;
pub mod sqlite;

use anyhow::Result;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::store::ItemId;

/// Progress at or above this percentage counts as completed.
pub const COMPLETION_THRESHOLD: f64 = 100.0;

/// A published catalog item, as much of it as encoding needs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogItem {
    pub id: ItemId,
    pub title: String,
    pub description: String,
}

impl CatalogItem {
    pub fn new(id: ItemId, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            description: description.into(),
        }
    }

    /// Text handed to the encoder.
    pub fn text(&self) -> String {
        format!("{}. {}", self.title, self.description)
    }
}

/// Read side of the application's catalog and progress tracking.
pub trait Catalog {
    /// Every currently active item.
    fn all_ids(&self) -> Result<HashSet<ItemId>>;
    /// Items the learner has finished.
    fn completed_ids(&self, learner_id: i64) -> Result<HashSet<ItemId>>;
    fn item(&self, id: ItemId) -> Result<Option<CatalogItem>>;
    fn items(&self) -> Result<Vec<CatalogItem>>;
}

/// Catalog held entirely in memory. Used by tests and demos.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    items: BTreeMap<ItemId, CatalogItem>,
    progress: HashMap<(i64, ItemId), f64>,
}

impl InMemoryCatalog {
    pub fn add_item(&mut self, item: CatalogItem) {
        self.items.insert(item.id, item);
    }

    pub fn set_progress(&mut self, learner_id: i64, item_id: ItemId, percent: f64) {
        self.progress.insert((learner_id, item_id), percent);
    }
}

impl Catalog for InMemoryCatalog {
    fn all_ids(&self) -> Result<HashSet<ItemId>> {
        Ok(self.items.keys().copied().collect())
    }

    fn completed_ids(&self, learner_id: i64) -> Result<HashSet<ItemId>> {
        Ok(self
            .progress
            .iter()
            .filter(|((learner, _), pct)| *learner == learner_id && **pct >= COMPLETION_THRESHOLD)
            .map(|((_, item), _)| *item)
            .collect())
    }

    fn item(&self, id: ItemId) -> Result<Option<CatalogItem>> {
        Ok(self.items.get(&id).cloned())
    }

    fn items(&self) -> Result<Vec<CatalogItem>> {
        Ok(self.items.values().cloned().collect())
    }
}
