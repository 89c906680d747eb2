//! In-memory store

use dashmap::DashMap;
use quill_autosave::{PersistenceSink, SaveKey, SinkError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Latest persisted value per key, kept in memory
///
/// Clones share the same map.
#[derive(Debug)]
pub struct MemoryStore<T> {
    inner: Arc<Inner<T>>,
}

#[derive(Debug)]
struct Inner<T> {
    values: DashMap<SaveKey, T>,
    writes: AtomicU64,
}

impl<T> Clone for MemoryStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MemoryStore<T> {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                values: DashMap::new(),
                writes: AtomicU64::new(0),
            }),
        }
    }

    /// Total successful writes across all keys
    #[inline]
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.inner.writes.load(Ordering::Relaxed)
    }

    /// Number of stored keys
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.values.len()
    }

    /// True if nothing was stored yet
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.values.is_empty()
    }

    /// Stored keys, sorted
    #[must_use]
    pub fn keys(&self) -> Vec<SaveKey> {
        let mut keys: Vec<SaveKey> = self.inner.values.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Store `value` under `key` directly
    pub fn insert(&self, key: SaveKey, value: T) {
        self.inner.values.insert(key, value);
        self.inner.writes.fetch_add(1, Ordering::Relaxed);
    }
}

impl<T: Clone> MemoryStore<T> {
    /// Stored value for `key`
    #[must_use]
    pub fn get(&self, key: &str) -> Option<T> {
        self.inner.values.get(key).map(|entry| entry.value().clone())
    }
}

#[async_trait::async_trait]
impl<T: Send + Sync + 'static> PersistenceSink<T> for MemoryStore<T> {
    async fn persist(&self, key: &SaveKey, payload: T) -> Result<(), SinkError> {
        self.insert(key.clone(), payload);
        Ok(())
    }
}
