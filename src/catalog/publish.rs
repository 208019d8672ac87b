use anyhow::{Context, Result};

use super::{Catalog, CatalogItem};
use crate::embed::Embedder;
use crate::store::EmbeddingStore;

pub struct BackfillStats {
    pub total_items: usize,
    pub already_embedded: usize,
    pub newly_embedded: usize,
    pub failed: usize,
}

/// Encode a newly published item and persist its vector.
///
/// Encoder failures are returned to the caller; the store is left untouched.
pub fn publish(store: &EmbeddingStore, embedder: &dyn Embedder, item: &CatalogItem) -> Result<()> {
    let vector = embedder
        .embed(&item.text())
        .with_context(|| format!("encoding item {}", item.id))?;
    store
        .publish_from(embedder.model_name(), item.id, vector)
        .with_context(|| format!("storing embedding for item {}", item.id))?;
    Ok(())
}

/// Encode every catalog item that has no stored vector yet, then persist
/// once. Items whose encoding fails are logged and left for the next run.
pub fn backfill(
    store: &EmbeddingStore,
    catalog: &dyn Catalog,
    embedder: &dyn Embedder,
) -> Result<BackfillStats> {
    let items = catalog.items().context("listing catalog items")?;
    let snapshot = store.snapshot();
    let pending: Vec<&CatalogItem> = items.iter().filter(|i| !snapshot.contains(i.id)).collect();

    let mut stats = BackfillStats {
        total_items: items.len(),
        already_embedded: items.len() - pending.len(),
        newly_embedded: 0,
        failed: 0,
    };

    if pending.is_empty() {
        return Ok(stats);
    }

    tracing::info!(
        pending = pending.len(),
        model = embedder.model_name(),
        "backfilling embeddings"
    );

    for item in pending {
        let vector = match embedder.embed(&item.text()) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(item_id = item.id, error = %e, "skipping item, encoding failed");
                stats.failed += 1;
                continue;
            }
        };
        if let Err(e) = store.put(item.id, vector) {
            tracing::warn!(item_id = item.id, error = %e, "skipping item, vector rejected");
            stats.failed += 1;
            continue;
        }
        stats.newly_embedded += 1;
    }

    // Only claim the model once one of its vectors was accepted.
    if stats.newly_embedded > 0 {
        store.set_model(embedder.model_name());
    }

    store.persist().context("persisting backfilled embeddings")?;
    Ok(stats)
}
