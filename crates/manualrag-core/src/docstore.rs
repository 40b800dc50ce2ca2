//! Durable parent-section store.
//!
//! The whole map lives in memory; every mutation writes the new state to the
//! JSON file (temp file + rename) before it becomes visible. Readers only take a short read
//! lock and get `Arc` handles, so a later write never changes a value a
//! caller already holds.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::types::{ChunkMeta, ParentChunk};

/// On-disk shape of one entry: `id -> {text, metadata}`.
#[derive(Serialize, Deserialize)]
struct StoredParent {
    text: String,
    metadata: ChunkMeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DocStoreStats {
    pub parent_count: usize,
    pub total_chars: usize,
    pub avg_chars: usize,
}

pub struct DocumentStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, Arc<ParentChunk>>>,
    writer: Mutex<()>,
}

impl DocumentStore {
    /// Loads the persisted state at `path`. A missing file is an empty store;
    /// an unreadable or corrupt one is logged and treated as empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = load_entries(&path);
        info!(path = %path.display(), parents = entries.len(), "document store opened");
        Self { path, entries: RwLock::new(entries), writer: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stores `parent` under `id`; the stored chunk takes `id` as its own id
    /// so it reads back the same after a reload.
    pub fn put(&self, id: impl Into<String>, mut parent: ParentChunk) -> Result<()> {
        parent.id = id.into();
        self.put_many([parent]).map(|_| ())
    }

    /// Inserts a batch under a single persist.
    pub fn put_many(&self, parents: impl IntoIterator<Item = ParentChunk>) -> Result<usize> {
        let _guard = self.lock_writer();
        let mut next = self.read_entries().clone();
        let mut inserted = 0;
        for parent in parents {
            next.insert(parent.id.clone(), Arc::new(parent));
            inserted += 1;
        }
        self.commit(next)?;
        Ok(inserted)
    }

    pub fn get(&self, id: &str) -> Option<Arc<ParentChunk>> {
        self.read_entries().get(id).cloned()
    }

    /// Present entries in request order; unknown ids are skipped.
    pub fn get_many<S: AsRef<str>>(&self, ids: &[S]) -> Vec<Arc<ParentChunk>> {
        let entries = self.read_entries();
        ids.iter().filter_map(|id| entries.get(id.as_ref()).cloned()).collect()
    }

    pub fn contains_document(&self, document_hash: &str) -> bool {
        self.read_entries().values().any(|p| p.meta.document_hash == document_hash)
    }

    pub fn delete_by_document_hash(&self, document_hash: &str) -> Result<usize> {
        let _guard = self.lock_writer();
        let mut next = self.read_entries().clone();
        let before = next.len();
        next.retain(|_, p| p.meta.document_hash != document_hash);
        let removed = before - next.len();
        if removed > 0 {
            self.commit(next)?;
            info!(document_hash, removed, "deleted parents for document");
        }
        Ok(removed)
    }

    pub fn clear(&self) -> Result<()> {
        let _guard = self.lock_writer();
        let count = self.len();
        self.commit(HashMap::new())?;
        info!(count, "cleared parent documents");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> DocStoreStats {
        let entries = self.read_entries();
        let parent_count = entries.len();
        let total_chars: usize = entries.values().map(|p| p.char_count()).sum();
        let avg_chars = if parent_count == 0 { 0 } else { total_chars / parent_count };
        DocStoreStats { parent_count, total_chars, avg_chars }
    }

    /// Persists `next` and only then publishes it. On a write failure the
    /// in-memory map is left untouched, so memory never runs ahead of disk.
    /// Callers hold the writer lock.
    fn commit(&self, next: HashMap<String, Arc<ParentChunk>>) -> Result<()> {
        let snapshot: BTreeMap<&str, StoredParentRef<'_>> = next
            .iter()
            .map(|(id, p)| (id.as_str(), StoredParentRef { text: &p.text, metadata: &p.meta }))
            .collect();
        let json = serde_json::to_vec_pretty(&snapshot)?;
        write_atomically(&self.path, &json)?;
        debug!(path = %self.path.display(), bytes = json.len(), "document store persisted");
        *self.write_entries() = next;
        Ok(())
    }

    fn lock_writer(&self) -> std::sync::MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<ParentChunk>>> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<ParentChunk>>> {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Serialize)]
struct StoredParentRef<'a> {
    text: &'a str,
    metadata: &'a ChunkMeta,
}

fn load_entries(path: &Path) -> HashMap<String, Arc<ParentChunk>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read document store, starting empty");
            return HashMap::new();
        }
    };
    match serde_json::from_slice::<BTreeMap<String, StoredParent>>(&bytes) {
        Ok(stored) => stored
            .into_iter()
            .map(|(id, s)| {
                let parent = ParentChunk { id: id.clone(), text: s.text, meta: s.metadata };
                (id, Arc::new(parent))
            })
            .collect(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupt document store, starting empty");
            HashMap::new()
        }
    }
}

/// Writes `bytes` to a sibling temp file and renames it over `path`.
pub fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let io_err = |source: std::io::Error| Error::Persistence { path: path.to_path_buf(), source };
    fs::create_dir_all(&dir).map_err(io_err)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
    tmp.write_all(bytes).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}
