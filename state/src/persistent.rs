//! Persistent backend and document store using sled database

use async_trait::async_trait;
use fuse_core::{DocumentStore, FuseError, FuseResult, KeyValueBackend};
use serde_json::Value;
use sled::{Db, Tree};
use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;

const STATE_TREE: &str = "kv";
const DOCUMENT_TREE_PREFIX: &str = "docs:";

fn storage_err(e: sled::Error) -> FuseError {
    FuseError::storage(e)
}

fn utf8_key(bytes: &[u8]) -> FuseResult<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| FuseError::Storage(format!("non-utf8 key: {}", e)))
}

/// Key-value backend backed by a sled tree
pub struct SledBackend {
    db: Db,
    tree: Tree,
}

impl SledBackend {
    pub fn open<P: AsRef<Path>>(path: P) -> FuseResult<Self> {
        let db = sled::open(path).map_err(storage_err)?;
        Self::with_db(db)
    }

    /// Use an already open database, e.g. one shared with a `SledDocumentStore`
    pub fn with_db(db: Db) -> FuseResult<Self> {
        let tree = db.open_tree(STATE_TREE).map_err(storage_err)?;
        Ok(Self { db, tree })
    }

    pub fn flush(&self) -> FuseResult<()> {
        self.db.flush().map_err(storage_err)?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueBackend for SledBackend {
    async fn get(&self, key: &str) -> FuseResult<Option<Vec<u8>>> {
        self.tree
            .get(key)
            .map(|opt| opt.map(|v| v.to_vec()))
            .map_err(storage_err)
    }

    async fn set(&self, key: &str, value: &[u8]) -> FuseResult<()> {
        self.tree.insert(key, value).map_err(storage_err)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> FuseResult<bool> {
        let removed = self.tree.remove(key).map_err(storage_err)?;
        Ok(removed.is_some())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Option<&[u8]>,
    ) -> FuseResult<bool> {
        let result = self
            .tree
            .compare_and_swap(key, expected, new)
            .map_err(storage_err)?;
        Ok(result.is_ok())
    }

    async fn scan(
        &self,
        prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> FuseResult<Vec<(String, Vec<u8>)>> {
        let start = match after {
            Some(key) if key >= prefix => Bound::Excluded(key.as_bytes()),
            _ => Bound::Included(prefix.as_bytes()),
        };

        let mut entries = Vec::new();
        for result in self.tree.range::<&[u8], _>((start, Bound::Unbounded)) {
            let (key, value) = result.map_err(storage_err)?;
            if !key.starts_with(prefix.as_bytes()) || entries.len() == limit {
                break;
            }
            entries.push((utf8_key(&key)?, value.to_vec()));
        }
        Ok(entries)
    }
}

/// Document store keeping one sled tree per collection
pub struct SledDocumentStore {
    db: Db,
}

impl SledDocumentStore {
    pub fn open<P: AsRef<Path>>(path: P) -> FuseResult<Self> {
        let db = sled::open(path).map_err(storage_err)?;
        Ok(Self::with_db(db))
    }

    pub fn with_db(db: Db) -> Self {
        Self { db }
    }

    fn collection(&self, name: &str) -> FuseResult<Tree> {
        self.db
            .open_tree(format!("{}{}", DOCUMENT_TREE_PREFIX, name))
            .map_err(storage_err)
    }
}

#[async_trait]
impl DocumentStore for SledDocumentStore {
    async fn insert(&self, collection: &str, id: &str, document: &Value) -> FuseResult<()> {
        let tree = self.collection(collection)?;
        let bytes = serde_json::to_vec(document)?;
        let swapped = tree
            .compare_and_swap(id, None::<&[u8]>, Some(bytes))
            .map_err(storage_err)?;
        if swapped.is_err() {
            return Err(FuseError::DuplicateDocument {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        tree.flush_async().await.map_err(storage_err)?;
        Ok(())
    }

    async fn find(&self, collection: &str, id: &str) -> FuseResult<Option<Value>> {
        let tree = self.collection(collection)?;
        match tree.get(id).map_err(storage_err)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn list_ids(&self, collection: &str) -> FuseResult<Vec<String>> {
        let tree = self.collection(collection)?;
        tree.iter()
            .keys()
            .map(|key| utf8_key(&key.map_err(storage_err)?))
            .collect()
    }
}

/// Backend and document store sharing one database at `path`
pub fn open_sled_stores<P: AsRef<Path>>(
    path: P,
) -> FuseResult<(Arc<SledBackend>, Arc<SledDocumentStore>)> {
    let db = sled::open(path).map_err(storage_err)?;
    let backend = SledBackend::with_db(db.clone())?;
    let documents = SledDocumentStore::with_db(db);
    Ok((Arc::new(backend), Arc::new(documents)))
}
