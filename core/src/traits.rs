//! Core traits defining the storage collaborators
//!
//! The state store talks to two external systems: a low-latency key-value
//! backend for live values and a collection-oriented document store for
//! snapshots. Both are expressed as async traits so adapters can be swapped.

use async_trait::async_trait;
use serde_json::Value;

/// Result type for Fuse operations
pub type FuseResult<T> = Result<T, crate::error::FuseError>;

/// Key-value backend holding live state
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    /// Get the raw bytes stored under a key
    async fn get(&self, key: &str) -> FuseResult<Option<Vec<u8>>>;

    /// Store bytes under a key, overwriting any previous value
    async fn set(&self, key: &str, value: &[u8]) -> FuseResult<()>;

    /// Delete a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> FuseResult<bool>;

    /// Atomically replace `expected` with `new`.
    ///
    /// `None` as `expected` means the key must be absent; `None` as `new`
    /// deletes the key. Returns `false` when the current value differs.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Option<&[u8]>,
    ) -> FuseResult<bool>;

    /// Return up to `limit` entries whose keys start with `prefix` and sort
    /// strictly after `after`, in ascending key order.
    async fn scan(
        &self,
        prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> FuseResult<Vec<(String, Vec<u8>)>>;
}

/// Append-only document store holding snapshots
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a document. Fails with `DuplicateDocument` if the id exists.
    async fn insert(&self, collection: &str, id: &str, document: &Value) -> FuseResult<()>;

    /// Find a document by id
    async fn find(&self, collection: &str, id: &str) -> FuseResult<Option<Value>>;

    /// List document ids in ascending order
    async fn list_ids(&self, collection: &str) -> FuseResult<Vec<String>>;
}
