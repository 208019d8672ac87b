//! Durable `item id -> vector` store.
//!
//! The whole mapping lives in one JSON file that is rewritten on every
//! persist. Readers take an `Arc<Snapshot>` and never hold a lock while
//! they work; writers go through a single mutex because the file is a
//! whole-object read-modify-write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use super::error::{StoreError, StoreResult};
use super::{EmbeddingLookup, ItemId};
use crate::embed::Embedding;

const FORMAT_VERSION: u32 = 1;

/// Immutable view of the store at one point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    model: Option<String>,
    dimension: Option<usize>,
    updated_at: Option<DateTime<Utc>>,
    items: BTreeMap<ItemId, Embedding>,
}

impl Snapshot {
    pub fn get(&self, id: ItemId) -> Option<&[f32]> {
        self.items.get(&id).map(Vec::as_slice)
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.items.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Vector length shared by every entry, once the first one is written.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Encoder model that produced the vectors, if recorded.
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    fn record_model(&mut self, model: &str) {
        match self.model.as_deref() {
            Some(existing) if existing == model => return,
            Some(existing) => warn_model_mismatch(existing, model),
            None => {}
        }
        self.model = Some(model.to_string());
    }

    fn insert(&mut self, id: ItemId, vector: Embedding) -> StoreResult<()> {
        if vector.is_empty() {
            return Err(StoreError::EmptyVector(id));
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(StoreError::NonFinite(id));
        }
        match self.dimension {
            Some(expected) if expected != vector.len() => {
                return Err(StoreError::DimensionMismatch {
                    item_id: id,
                    expected,
                    got: vector.len(),
                });
            }
            Some(_) => {}
            None => self.dimension = Some(vector.len()),
        }
        self.items.insert(id, vector);
        self.updated_at = Some(Utc::now());
        Ok(())
    }
}

impl EmbeddingLookup for Snapshot {
    fn vector(&self, id: ItemId) -> Option<&[f32]> {
        self.get(id)
    }
}

#[derive(Serialize)]
struct StoreFileOut<'a> {
    format_version: u32,
    model: Option<&'a str>,
    dimension: Option<usize>,
    updated_at: Option<DateTime<Utc>>,
    items: &'a BTreeMap<ItemId, Embedding>,
}

#[derive(Deserialize)]
struct StoreFileIn {
    format_version: u32,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    dimension: Option<usize>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    items: BTreeMap<ItemId, Embedding>,
}

pub struct EmbeddingStore {
    /// Backing file. `None` for a purely in-memory store.
    path: Option<PathBuf>,
    current: RwLock<Arc<Snapshot>>,
    writer: Mutex<()>,
}

impl EmbeddingStore {
    /// A store with no backing file. `persist` and `reload` do nothing.
    pub fn in_memory() -> Self {
        Self::with_snapshot(None, Snapshot::default())
    }

    /// Read the store at `path`. A missing file is the first-run case and
    /// yields an empty store bound to that path.
    pub fn load(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let snapshot = read_snapshot(&path)?;
        tracing::info!(
            path = %path.display(),
            items = snapshot.len(),
            dimension = ?snapshot.dimension(),
            "loaded embedding store"
        );
        Ok(Self::with_snapshot(Some(path), snapshot))
    }

    /// Like [`load`](Self::load), but a corrupt file is logged and replaced
    /// by an empty store. The next persist overwrites the corrupt file.
    pub fn load_or_empty(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match Self::load(&path) {
            Ok(store) => store,
            Err(e) => {
                tracing::warn!(error = %e, "starting with an empty embedding store");
                Self::with_snapshot(Some(path), Snapshot::default())
            }
        }
    }

    fn with_snapshot(path: Option<PathBuf>, snapshot: Snapshot) -> Self {
        Self {
            path,
            current: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
        }
    }

    /// Re-read the backing file and swap it in. On error the current
    /// contents are kept.
    pub fn reload(&self) -> StoreResult<()> {
        let _guard = self.lock_writer();
        let Some(path) = &self.path else {
            return Ok(());
        };
        let snapshot = read_snapshot(path)?;
        tracing::debug!(items = snapshot.len(), "reloaded embedding store");
        self.swap(snapshot);
        Ok(())
    }

    /// The current contents. Cheap; holds no lock once returned.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn get(&self, id: ItemId) -> StoreResult<Embedding> {
        self.snapshot()
            .get(id)
            .map(<[f32]>::to_vec)
            .ok_or(StoreError::NotFound(id))
    }

    /// Insert or overwrite one entry in memory. Does not persist.
    pub fn put(&self, id: ItemId, vector: Embedding) -> StoreResult<()> {
        let _guard = self.lock_writer();
        self.put_locked(id, vector)
    }

    /// Write the whole mapping to the backing file atomically.
    pub fn persist(&self) -> StoreResult<()> {
        let _guard = self.lock_writer();
        self.persist_locked()
    }

    /// `put` followed by `persist` under one writer lock. If the write
    /// fails, the in-memory entry is rolled back so memory and disk agree.
    pub fn publish(&self, id: ItemId, vector: Embedding) -> StoreResult<()> {
        self.publish_inner(id, vector, None)
    }

    /// Like [`publish`](Self::publish), also recording `model` as the
    /// encoder. The model is only switched if the vector is accepted and
    /// written.
    pub fn publish_from(&self, model: &str, id: ItemId, vector: Embedding) -> StoreResult<()> {
        self.publish_inner(id, vector, Some(model))
    }

    fn publish_inner(
        &self,
        id: ItemId,
        vector: Embedding,
        model: Option<&str>,
    ) -> StoreResult<()> {
        let _guard = self.lock_writer();
        let previous = self.snapshot();
        let mut next = Snapshot::clone(&previous);
        next.insert(id, vector)?;
        if let Some(model) = model {
            next.record_model(model);
        }
        self.swap(next);
        if let Err(e) = self.persist_locked() {
            self.swap(Snapshot::clone(&previous));
            return Err(e);
        }
        tracing::info!(item_id = id, "published embedding");
        Ok(())
    }

    /// Record which encoder model produced the stored vectors. Does not
    /// persist.
    pub fn set_model(&self, model: &str) {
        let _guard = self.lock_writer();
        let current = self.snapshot();
        if current.model() == Some(model) {
            return;
        }
        let mut next = Snapshot::clone(&current);
        next.record_model(model);
        self.swap(next);
    }

    /// Whether vectors from `configured` can be mixed with the stored ones.
    /// A store with no recorded model matches anything; a mismatch is
    /// logged.
    pub fn check_model(&self, configured: &str) -> bool {
        match self.snapshot().model() {
            Some(stored) if stored != configured => {
                warn_model_mismatch(stored, configured);
                false
            }
            _ => true,
        }
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.snapshot().dimension()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn swap(&self, snapshot: Snapshot) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(snapshot);
    }

    fn put_locked(&self, id: ItemId, vector: Embedding) -> StoreResult<()> {
        let mut next = Snapshot::clone(&self.snapshot());
        next.insert(id, vector)?;
        self.swap(next);
        Ok(())
    }

    fn persist_locked(&self) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let snapshot = self.snapshot();
        write_atomic(path, &snapshot)?;
        tracing::debug!(
            path = %path.display(),
            items = snapshot.len(),
            "persisted embedding store"
        );
        Ok(())
    }
}

fn warn_model_mismatch(stored: &str, configured: &str) {
    tracing::warn!(
        stored,
        configured,
        "encoder model differs from the one that built the store"
    );
}

fn read_snapshot(path: &Path) -> StoreResult<Snapshot> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Snapshot::default()),
        Err(e) => {
            return Err(StoreError::io(
                format!("reading embedding store {}", path.display()),
                e,
            ));
        }
    };

    let file: StoreFileIn =
        serde_json::from_slice(&bytes).map_err(|e| StoreError::corrupt(path, e.to_string()))?;

    if file.format_version != FORMAT_VERSION {
        return Err(StoreError::corrupt(
            path,
            format!("unsupported format version {}", file.format_version),
        ));
    }

    let mut snapshot = Snapshot {
        model: file.model,
        dimension: file.dimension,
        updated_at: None,
        items: BTreeMap::new(),
    };
    for (id, vector) in file.items {
        snapshot
            .insert(id, vector)
            .map_err(|e| StoreError::corrupt(path, e.to_string()))?;
    }
    snapshot.updated_at = file.updated_at;
    Ok(snapshot)
}

/// Serialize next to the target, fsync, then rename over it. A crash at any
/// point leaves either the old file or the new one, never a partial write.
fn write_atomic(path: &Path, snapshot: &Snapshot) -> StoreResult<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .map_err(|e| StoreError::io(format!("creating store dir {}", dir.display()), e))?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let out = StoreFileOut {
        format_version: FORMAT_VERSION,
        model: snapshot.model(),
        dimension: snapshot.dimension(),
        updated_at: snapshot.updated_at(),
        items: &snapshot.items,
    };

    let file = File::create(&tmp_path)
        .map_err(|e| StoreError::io(format!("creating {}", tmp_path.display()), e))?;

    let written = write_and_sync(file, &tmp_path, &out).and_then(|()| {
        fs::rename(&tmp_path, path).map_err(|e| {
            StoreError::io(
                format!("replacing {} with {}", path.display(), tmp_path.display()),
                e,
            )
        })
    });
    if written.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    written
}

fn write_and_sync(file: File, tmp_path: &Path, out: &StoreFileOut<'_>) -> StoreResult<()> {
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, out)?;
    writer
        .flush()
        .map_err(|e| StoreError::io(format!("writing {}", tmp_path.display()), e))?;
    let file = writer
        .into_inner()
        .map_err(|e| StoreError::io(format!("writing {}", tmp_path.display()), e.into_error()))?;
    file.sync_all()
        .map_err(|e| StoreError::io(format!("syncing {}", tmp_path.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> EmbeddingStore {
        EmbeddingStore::load(dir.path().join("embeddings.json")).unwrap()
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(store.is_empty());
        assert_eq!(store.dimension(), None);
    }

    #[test]
    fn get_missing_is_not_found() {
        let store = EmbeddingStore::in_memory();
        assert!(matches!(store.get(7), Err(StoreError::NotFound(7))));
    }

    #[test]
    fn put_then_get() {
        let store = EmbeddingStore::in_memory();
        store.put(1, vec![0.5, 0.25]).unwrap();
        assert_eq!(store.get(1).unwrap(), vec![0.5, 0.25]);
        assert_eq!(store.dimension(), Some(2));
    }

    #[test]
    fn put_overwrites() {
        let store = EmbeddingStore::in_memory();
        store.put(1, vec![1.0, 0.0]).unwrap();
        store.put(1, vec![0.0, 1.0]).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(1).unwrap(), vec![0.0, 1.0]);
    }

    #[test]
    fn put_rejects_dimension_change() {
        let store = EmbeddingStore::in_memory();
        store.put(1, vec![1.0, 0.0, 0.0]).unwrap();
        let err = store.put(2, vec![1.0, 0.0]).unwrap_err();
        assert!(matches!(
            err,
            StoreError::DimensionMismatch { item_id: 2, expected: 3, got: 2 }
        ));
        assert!(matches!(store.get(2), Err(StoreError::NotFound(2))));
    }

    #[test]
    fn put_rejects_empty_and_non_finite() {
        let store = EmbeddingStore::in_memory();
        assert!(matches!(store.put(1, vec![]), Err(StoreError::EmptyVector(1))));
        assert!(matches!(
            store.put(2, vec![f32::NAN, 1.0]),
            Err(StoreError::NonFinite(2))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn put_does_not_persist() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.put(1, vec![1.0]).unwrap();
        assert!(!dir.path().join("embeddings.json").exists());
    }

    #[test]
    fn persist_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.put(1, vec![1.0, 0.0, 0.0]).unwrap();
        store.put(2, vec![0.1, -0.2, 0.3]).unwrap();
        store.put(40, vec![1e-7, 12345.678, -0.0]).unwrap();
        store.set_model("nomic-embed-text");
        store.persist().unwrap();

        let reloaded = store_in(&dir);
        assert_eq!(*reloaded.snapshot(), *store.snapshot());
        assert_eq!(reloaded.dimension(), Some(3));
        assert_eq!(reloaded.snapshot().model(), Some("nomic-embed-text"));
        assert_eq!(reloaded.get(2).unwrap(), vec![0.1, -0.2, 0.3]);
    }

    #[test]
    fn persist_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.publish(1, vec![1.0, 2.0]).unwrap();
        assert!(dir.path().join("embeddings.json").exists());
        assert!(!dir.path().join("embeddings.json.tmp").exists());
    }

    #[test]
    fn persist_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("deeper").join("embeddings.json");
        let store = EmbeddingStore::load(&path).unwrap();
        store.publish(3, vec![1.0]).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn publish_survives_restart() {
        let dir = TempDir::new().unwrap();
        store_in(&dir).publish(9, vec![0.0, 1.0]).unwrap();
        assert_eq!(store_in(&dir).get(9).unwrap(), vec![0.0, 1.0]);
    }

    #[test]
    fn failed_publish_rolls_back() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.publish(1, vec![1.0, 0.0]).unwrap();
        let before = store.snapshot();

        // a directory where the temp file goes makes the write fail
        fs::create_dir(dir.path().join("embeddings.json.tmp")).unwrap();

        assert!(matches!(
            store.publish_from("other-model", 2, vec![0.0, 1.0]),
            Err(StoreError::Io { .. })
        ));
        assert!(matches!(store.get(2), Err(StoreError::NotFound(2))));
        assert_eq!(store.get(1).unwrap(), vec![1.0, 0.0]);
        assert_eq!(store.dimension(), Some(2));
        assert_eq!(*store.snapshot(), *before);
        assert_eq!(store.snapshot().model(), None);
        assert_eq!(store_in(&dir).len(), 1);
    }

    #[test]
    fn rejected_vector_keeps_recorded_model() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.publish_from("all-minilm", 1, vec![1.0, 0.0, 0.0]).unwrap();

        assert!(matches!(
            store.publish_from("nomic-embed-text", 2, vec![1.0, 0.0]),
            Err(StoreError::DimensionMismatch { .. })
        ));
        assert_eq!(store.snapshot().model(), Some("all-minilm"));
        assert_eq!(store_in(&dir).snapshot().model(), Some("all-minilm"));
    }

    #[test]
    fn check_model_against_loaded_store() {
        let dir = TempDir::new().unwrap();
        assert!(store_in(&dir).check_model("anything"));

        store_in(&dir).publish_from("all-minilm", 1, vec![1.0]).unwrap();
        let reloaded = store_in(&dir);
        assert!(reloaded.check_model("all-minilm"));
        assert!(!reloaded.check_model("nomic-embed-text"));
    }

    #[test]
    fn failed_write_removes_temp_file() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.publish(1, vec![1.0]).unwrap();

        // a directory at the target path makes the final rename fail
        let path = dir.path().join("embeddings.json");
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();
        fs::write(path.join("keep"), b"x").unwrap();

        assert!(store.publish(2, vec![2.0]).is_err());
        assert!(!dir.path().join("embeddings.json.tmp").exists());
        assert!(matches!(store.get(2), Err(StoreError::NotFound(2))));
    }

    #[test]
    fn corrupt_file_fails_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("embeddings.json");
        fs::write(&path, b"{ this is not json").unwrap();
        assert!(matches!(
            EmbeddingStore::load(&path),
            Err(StoreError::StoreCorrupt { .. })
        ));
    }

    #[test]
    fn inconsistent_dimensions_are_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("embeddings.json");
        fs::write(
            &path,
            r#"{"format_version":1,"dimension":2,"items":{"1":[1.0,0.0],"2":[1.0]}}"#,
        )
        .unwrap();
        assert!(matches!(
            EmbeddingStore::load(&path),
            Err(StoreError::StoreCorrupt { .. })
        ));
    }

    #[test]
    fn unknown_format_version_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("embeddings.json");
        fs::write(&path, r#"{"format_version":99,"items":{}}"#).unwrap();
        assert!(matches!(
            EmbeddingStore::load(&path),
            Err(StoreError::StoreCorrupt { .. })
        ));
    }

    #[test]
    fn load_or_empty_recovers_from_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("embeddings.json");
        fs::write(&path, b"garbage").unwrap();

        let store = EmbeddingStore::load_or_empty(&path);
        assert!(store.is_empty());

        store.publish(1, vec![1.0, 1.0]).unwrap();
        assert_eq!(EmbeddingStore::load(&path).unwrap().len(), 1);
    }

    #[test]
    fn reload_picks_up_external_writes() {
        let dir = TempDir::new().unwrap();
        let reader = store_in(&dir);
        let writer = store_in(&dir);
        writer.publish(5, vec![0.3, 0.4]).unwrap();

        assert!(reader.is_empty());
        reader.reload().unwrap();
        assert_eq!(reader.get(5).unwrap(), vec![0.3, 0.4]);
    }

    #[test]
    fn snapshot_is_stable_across_writes() {
        let store = EmbeddingStore::in_memory();
        store.put(1, vec![1.0]).unwrap();
        let before = store.snapshot();
        store.put(2, vec![2.0]).unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(store.snapshot().len(), 2);
    }

    #[test]
    fn concurrent_publishers_lose_nothing() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(store_in(&dir));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.publish(i, vec![i as f32, 1.0]).unwrap())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store_in(&dir).len(), 8);
    }
}
