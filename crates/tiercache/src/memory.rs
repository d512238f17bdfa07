//! In-process LRU store

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tierstore::{Result, Store};
use tracing::debug;

use crate::lru::LruCache;

/// Memory store configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Maximum number of records; `None` or `0` keeps everything until
    /// `forget`
    pub capacity: Option<usize>,
}

/// Bounded LRU key/value store held in memory
pub struct MemoryStore {
    records: Mutex<LruCache<String, Value>>,
}

impl MemoryStore {
    /// Create an unbounded store
    pub fn new() -> Self {
        Self::with_config(MemoryConfig::default())
    }

    /// Create a store from configuration
    pub fn with_config(config: MemoryConfig) -> Self {
        let records = match config.capacity.filter(|c| *c > 0) {
            Some(capacity) => LruCache::with_capacity(capacity),
            None => LruCache::new(),
        };

        Self {
            records: Mutex::new(records),
        }
    }

    /// Get a value and mark it most recently used
    pub fn get(&self, id: &str) -> Option<Value> {
        self.records.lock().get(id).cloned()
    }

    /// Insert or replace a value as most recently used
    pub fn save(&self, id: &str, value: Value) {
        if let Some((evicted, _)) = self.records.lock().put(id.to_string(), value) {
            debug!(id = %evicted, "Memory store at capacity, evicted oldest record");
        }
    }

    /// Remove a value; missing ids are ignored
    pub fn delete(&self, id: &str) {
        self.records.lock().remove(id);
    }

    /// Existence check that does not touch recency
    pub fn has(&self, id: &str) -> bool {
        self.records.lock().contains(id)
    }

    /// Evict the `amount` least recently used records.
    /// Returns how many were evicted.
    pub fn forget(&self, amount: usize) -> usize {
        self.records.lock().forget(amount)
    }

    /// Visit every record from least to most recently used with its position.
    ///
    /// The store is locked for the duration; the callback must not call back
    /// into this store.
    pub fn each<F>(&self, mut callback: F)
    where
        F: FnMut(&str, &Value, usize),
    {
        let records = self.records.lock();
        for (index, (id, value)) in records.iter().enumerate() {
            callback(id, value, index);
        }
    }

    /// Ids from least to most recently used
    pub fn ids(&self) -> Vec<String> {
        self.records.lock().iter().map(|(id, _)| id.clone()).collect()
    }

    /// Remove every record
    pub fn empty(&self) {
        self.records.lock().clear();
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Value>> {
        Ok(MemoryStore::get(self, id))
    }

    async fn save(&self, id: &str, value: Value) -> Result<()> {
        MemoryStore::save(self, id, value);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        MemoryStore::delete(self, id);
        Ok(())
    }

    fn can_forget(&self) -> bool {
        true
    }

    async fn forget(&self, amount: usize) -> Result<usize> {
        Ok(MemoryStore::forget(self, amount))
    }
}
