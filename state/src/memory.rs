//! In-memory backend and document store for testing and single-process use

use async_trait::async_trait;
use dashmap::DashMap;
use fuse_core::{DocumentStore, FuseError, FuseResult, KeyValueBackend};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::ops::Bound;

/// In-memory key-value backend
pub struct MemoryBackend {
    data: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn with_data(data: Vec<(String, Vec<u8>)>) -> Self {
        let backend = Self::new();
        backend.data.write().extend(data);
        backend
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueBackend for MemoryBackend {
    async fn get(&self, key: &str) -> FuseResult<Option<Vec<u8>>> {
        Ok(self.data.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> FuseResult<()> {
        self.data.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> FuseResult<bool> {
        Ok(self.data.write().remove(key).is_some())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Option<&[u8]>,
    ) -> FuseResult<bool> {
        let mut data = self.data.write();
        if data.get(key).map(|v| v.as_slice()) != expected {
            return Ok(false);
        }
        match new {
            Some(value) => {
                data.insert(key.to_string(), value.to_vec());
            }
            None => {
                data.remove(key);
            }
        }
        Ok(true)
    }

    async fn scan(
        &self,
        prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> FuseResult<Vec<(String, Vec<u8>)>> {
        let start = match after {
            Some(key) => Bound::Excluded(key.to_string()),
            None => Bound::Included(prefix.to_string()),
        };
        let data = self.data.read();
        Ok(data
            .range((start, Bound::Unbounded))
            .skip_while(|(k, _)| !k.starts_with(prefix) && k.as_str() < prefix)
            .take_while(|(k, _)| k.starts_with(prefix))
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// In-memory document store
pub struct MemoryDocumentStore {
    collections: DashMap<String, BTreeMap<String, Value>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            collections: DashMap::new(),
        }
    }

    /// Number of documents in a collection
    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .get(collection)
            .map(|c| c.len())
            .unwrap_or(0)
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn insert(&self, collection: &str, id: &str, document: &Value) -> FuseResult<()> {
        let mut docs = self.collections.entry(collection.to_string()).or_default();
        if docs.contains_key(id) {
            return Err(FuseError::DuplicateDocument {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        docs.insert(id.to_string(), document.clone());
        Ok(())
    }

    async fn find(&self, collection: &str, id: &str) -> FuseResult<Option<Value>> {
        Ok(self
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id).cloned()))
    }

    async fn list_ids(&self, collection: &str) -> FuseResult<Vec<String>> {
        Ok(self
            .collections
            .get(collection)
            .map(|docs| docs.keys().cloned().collect())
            .unwrap_or_default())
    }
}
