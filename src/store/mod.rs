//! Concurrency-safe artifact stores.
//!
//! The three stores in this crate (builds, desktop records, smoke tests)
//! share one shape: a keyed record map behind a reader/writer lock with an
//! optional JSON persistence sink invoked inside the write lock. `update`
//! is the only sanctioned mutation path for existing records — it holds
//! the writer lock across the caller's closure so check-then-mutate is
//! atomic.

pub mod build;
pub mod desktop;
pub mod smoke;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::StageError;

/// Directory-name marker for CI debris: persisted records whose artifact
/// paths pass through a `test-artifacts` directory are dropped on load.
pub const TEST_OUTPUT_MARKER: &str = "test-artifacts";

/// A record that can live in an [`IndexedStore`].
pub trait StoreRecord: Clone {
    /// Primary key within the store.
    fn store_key(&self) -> &str;

    /// True when the record points at test-run output and should be
    /// scrubbed on load.
    fn is_test_artifact(&self) -> bool {
        false
    }
}

/// Does a recorded path pass through a `test-artifacts` directory?
pub fn path_is_test_output(path: &str) -> bool {
    Path::new(path)
        .components()
        .any(|c| c.as_os_str() == TEST_OUTPUT_MARKER)
}

/// Keyed record map with reader/writer locking and optional persistence.
#[derive(Debug)]
pub struct IndexedStore<T> {
    inner: RwLock<HashMap<String, T>>,
    persist_path: Option<PathBuf>,
}

impl<T> IndexedStore<T>
where
    T: StoreRecord + Serialize + DeserializeOwned,
{
    /// In-memory store with no persistence.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            persist_path: None,
        }
    }

    /// Store backed by a JSON file.
    ///
    /// Existing records are loaded; records under the test-output marker
    /// are discarded and the file rewritten without them.
    pub fn open(path: PathBuf) -> Result<Self> {
        let mut records = HashMap::new();
        let mut scrubbed = false;

        if path.exists() {
            let bytes = fs::read(&path)
                .with_context(|| format!("reading store file '{}'", path.display()))?;
            let loaded: Vec<T> = serde_json::from_slice(&bytes).map_err(|err| {
                StageError::CorruptStore {
                    path: path.clone(),
                    detail: err.to_string(),
                }
            })?;
            for record in loaded {
                if record.is_test_artifact() {
                    scrubbed = true;
                    continue;
                }
                records.insert(record.store_key().to_string(), record);
            }
        }

        let store = Self {
            inner: RwLock::new(records),
            persist_path: Some(path),
        };
        if scrubbed {
            let guard = store.inner.read().expect("store lock poisoned");
            store.persist_locked(&guard)?;
        }
        Ok(store)
    }

    /// Insert or replace a record.
    pub fn save(&self, record: T) -> Result<()> {
        let mut guard = self.inner.write().expect("store lock poisoned");
        guard.insert(record.store_key().to_string(), record);
        self.persist_locked(&guard)
    }

    /// Clone of a record by id.
    pub fn get(&self, id: &str) -> Option<T> {
        let guard = self.inner.read().expect("store lock poisoned");
        guard.get(id).cloned()
    }

    /// Mutate an existing record under the writer lock.
    ///
    /// Fails with [`StageError::UnknownId`] when the key is missing.
    pub fn update<F>(&self, id: &str, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut T),
    {
        let mut guard = self.inner.write().expect("store lock poisoned");
        let record = guard
            .get_mut(id)
            .ok_or_else(|| StageError::UnknownId(id.to_string()))?;
        mutate(record);
        let updated = record.clone();
        self.persist_locked(&guard)?;
        Ok(updated)
    }

    /// Shallow copy of every record, sorted by key for stable output.
    pub fn snapshot(&self) -> Vec<T> {
        let guard = self.inner.read().expect("store lock poisoned");
        let mut records: Vec<T> = guard.values().cloned().collect();
        records.sort_by(|a, b| a.store_key().cmp(b.store_key()));
        records
    }

    /// Remove records matching the predicate; returns how many went away.
    pub fn remove_where<F>(&self, mut predicate: F) -> Result<usize>
    where
        F: FnMut(&T) -> bool,
    {
        let mut guard = self.inner.write().expect("store lock poisoned");
        let before = guard.len();
        guard.retain(|_, record| !predicate(record));
        let removed = before - guard.len();
        if removed > 0 {
            self.persist_locked(&guard)?;
        }
        Ok(removed)
    }

    fn persist_locked(&self, records: &HashMap<String, T>) -> Result<()> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };

        let mut sorted: Vec<&T> = records.values().collect();
        sorted.sort_by(|a, b| a.store_key().cmp(b.store_key()));

        let bytes = serde_json::to_vec_pretty(&sorted)
            .with_context(|| format!("serializing store '{}'", path.display()))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating store directory '{}'", parent.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes)
            .with_context(|| format!("writing store temp file '{}'", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("replacing store file '{}'", path.display()))?;
        Ok(())
    }
}

impl<T> Default for IndexedStore<T>
where
    T: StoreRecord + Serialize + DeserializeOwned,
{
    fn default() -> Self {
        Self::new()
    }
}
