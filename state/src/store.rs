//! The state store
//!
//! Live values are read from and written to the backend under `state:<key>`.
//! The store also keeps an in-memory map of the last value it loaded or wrote
//! per key; that map drives version numbering and snapshots.
//!
//! Each operation comes in two forms. The plain form (`get_state`,
//! `set_state`, `acquire_lock`, ...) logs backend failures and collapses them
//! to `None` / `false` / a no-op. The `try_*` form returns the error, so a
//! caller can tell "absent" from "backend unavailable".
//!
//! `set_state` is last-write-wins: versions come from the local map and are
//! not enforced by the backend. Use `try_compare_and_set` when a conflicting
//! write must be detected.

use dashmap::DashMap;
use fuse_core::{
    parse_state_key, state_key, DocumentStore, FuseError, FuseResult, KeyValueBackend,
    LoadPolicy, LockScope, StateEvent, StateEventKind, StateLock, StateSnapshot,
    StateStoreConfig, StateValue, StateVersion, SNAPSHOT_COLLECTION, STATE_PREFIX,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::events::StateEvents;
use crate::locks::LockManager;
use crate::snapshot::SnapshotSequence;

/// Versioned key-value state with snapshots, advisory locks and events
pub struct StateStore {
    backend: Arc<dyn KeyValueBackend>,
    documents: Arc<dyn DocumentStore>,
    config: StateStoreConfig,
    values: DashMap<String, StateValue>,
    locks: LockManager,
    events: StateEvents,
    snapshots: SnapshotSequence,
}

fn or_log<T>(result: FuseResult<T>, fallback: T, operation: &str, key: &str) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            error!("{} failed for {}: {}", operation, key, e);
            fallback
        }
    }
}

impl StateStore {
    /// Create a store without loading existing state. Call `initialize` next.
    pub fn new(
        backend: Arc<dyn KeyValueBackend>,
        documents: Arc<dyn DocumentStore>,
        config: StateStoreConfig,
    ) -> FuseResult<Self> {
        config.validate()?;
        let locks = LockManager::new(config.lock_scope, backend.clone(), config.lock_timeout());
        Ok(Self {
            backend,
            documents,
            config,
            values: DashMap::new(),
            locks,
            events: StateEvents::new(),
            snapshots: SnapshotSequence::new(),
        })
    }

    /// Create a store and load existing state from the backend
    pub async fn open(
        backend: Arc<dyn KeyValueBackend>,
        documents: Arc<dyn DocumentStore>,
        config: StateStoreConfig,
    ) -> FuseResult<Self> {
        let store = Self::new(backend, documents, config)?;
        store.initialize().await?;
        Ok(store)
    }

    /// Scan the `state:` namespace page by page and replace the in-memory
    /// map with what the backend holds. Returns the number of entries loaded.
    ///
    /// On error the map is left as it was. Snapshot numbering resumes after
    /// the newest snapshot already in the document store.
    pub async fn initialize(&self) -> FuseResult<usize> {
        let batch = self.config.scan_batch_size;
        let mut cursor: Option<String> = None;
        let mut fresh = BTreeMap::new();
        let mut skipped = 0;

        loop {
            let page = self
                .backend
                .scan(STATE_PREFIX, cursor.as_deref(), batch)
                .await?;
            let Some((last, _)) = page.last() else {
                break;
            };
            cursor = Some(last.clone());

            for (backend_key, bytes) in &page {
                let Some(key) = parse_state_key(backend_key) else {
                    continue;
                };
                match StateValue::from_bytes(bytes) {
                    Ok(value) => {
                        fresh.insert(key.to_string(), value);
                    }
                    Err(e) => match self.config.load_policy {
                        LoadPolicy::FailFast => {
                            error!("Malformed state entry {}: {}", backend_key, e);
                            return Err(FuseError::invalid_entry(backend_key.as_str(), e));
                        }
                        LoadPolicy::SkipInvalid => {
                            warn!("Skipping malformed state entry {}: {}", backend_key, e);
                            skipped += 1;
                        }
                    },
                }
            }

            if page.len() < batch {
                break;
            }
        }

        if let Some(latest) = self.latest_snapshot().await? {
            self.snapshots.resume_after(&latest);
        }

        let loaded = fresh.len();
        self.values.retain(|key, _| fresh.contains_key(key));
        for (key, value) in fresh {
            self.values.insert(key, value);
        }

        info!("Loaded {} state entries ({} skipped)", loaded, skipped);
        Ok(loaded)
    }

    /// Every key currently under `state:` in the backend
    async fn backend_keys(&self) -> FuseResult<BTreeSet<String>> {
        let batch = self.config.scan_batch_size;
        let mut cursor: Option<String> = None;
        let mut keys = BTreeSet::new();

        loop {
            let page = self
                .backend
                .scan(STATE_PREFIX, cursor.as_deref(), batch)
                .await?;
            let Some((last, _)) = page.last() else {
                break;
            };
            cursor = Some(last.clone());

            keys.extend(
                page.iter()
                    .filter_map(|(backend_key, _)| parse_state_key(backend_key))
                    .map(str::to_string),
            );

            if page.len() < batch {
                break;
            }
        }
        Ok(keys)
    }

    pub fn config(&self) -> &StateStoreConfig {
        &self.config
    }

    pub fn lock_scope(&self) -> LockScope {
        self.locks.scope()
    }

    // ============ Values ============

    /// Read a value from the backend. `None` if absent or on any failure.
    pub async fn get_state<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        or_log(self.try_get_state(key).await, None, "get_state", key)
    }

    pub async fn try_get_state<T: DeserializeOwned>(&self, key: &str) -> FuseResult<Option<T>> {
        let backend_key = state_key(key);
        let Some(bytes) = self.backend.get(&backend_key).await? else {
            return Ok(None);
        };
        let wrapper = StateValue::from_bytes(&bytes)?;
        Ok(Some(serde_json::from_value(wrapper.value)?))
    }

    /// Write a value. Failures are logged and leave no trace.
    pub async fn set_state<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        if let Err(e) = self.try_set_state(key, value).await {
            error!("set_state failed for {}: {}", key, e);
        }
    }

    /// Write a value and return its new version
    pub async fn try_set_state<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> FuseResult<StateVersion> {
        let raw = serde_json::to_value(value)?;
        let previous = self.version_of(key).unwrap_or_default();
        let wrapper = StateValue::new(raw.clone(), previous.next());

        self.backend
            .set(&state_key(key), &wrapper.to_bytes()?)
            .await?;

        let version = wrapper.version;
        self.values.insert(key.to_string(), wrapper);
        debug!("Set {} at {}", key, version);

        self.events
            .emit(StateEvent::new(StateEventKind::Updated, key).with_payload(raw));
        Ok(version)
    }

    /// Write only if the backend still holds `expected` (0 = key absent).
    ///
    /// The version is read from the backend rather than the local map, so a
    /// write by another instance is detected.
    pub async fn try_compare_and_set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        expected: StateVersion,
    ) -> FuseResult<StateVersion> {
        let backend_key = state_key(key);
        let (current, actual) = self.read_version(&backend_key).await?;
        if actual != expected {
            return Err(FuseError::version_conflict(key, expected.0, actual.0));
        }

        let raw = serde_json::to_value(value)?;
        let wrapper = StateValue::new(raw.clone(), actual.next());
        let encoded = wrapper.to_bytes()?;

        let swapped = self
            .backend
            .compare_and_swap(&backend_key, current.as_deref(), Some(encoded.as_slice()))
            .await?;
        if !swapped {
            let (_, now) = self.read_version(&backend_key).await?;
            return Err(FuseError::version_conflict(key, expected.0, now.0));
        }

        let version = wrapper.version;
        self.values.insert(key.to_string(), wrapper);
        self.events
            .emit(StateEvent::new(StateEventKind::Updated, key).with_payload(raw));
        Ok(version)
    }

    async fn read_version(
        &self,
        backend_key: &str,
    ) -> FuseResult<(Option<Vec<u8>>, StateVersion)> {
        let current = self.backend.get(backend_key).await?;
        let version = match &current {
            Some(bytes) => {
                StateValue::from_bytes(bytes)
                    .map_err(|e| FuseError::invalid_entry(backend_key, e))?
                    .version
            }
            None => StateVersion::default(),
        };
        Ok((current, version))
    }

    /// Delete a value. Emits `Deleted` whether or not the key existed.
    pub async fn delete_state(&self, key: &str) {
        if let Err(e) = self.try_delete_state(key).await {
            error!("delete_state failed for {}: {}", key, e);
        }
    }

    /// Delete a value and report whether the backend held it
    pub async fn try_delete_state(&self, key: &str) -> FuseResult<bool> {
        let existed = self.backend.delete(&state_key(key)).await?;
        self.values.remove(key);
        self.events.emit(StateEvent::new(StateEventKind::Deleted, key));
        Ok(existed)
    }

    /// Delete every key in the `state:` namespace
    pub async fn clear_state(&self) {
        if let Err(e) = self.try_clear_state().await {
            error!("clear_state failed: {}", e);
        }
    }

    /// Delete every key in the `state:` namespace and return how many went
    pub async fn try_clear_state(&self) -> FuseResult<usize> {
        let batch = self.config.scan_batch_size;
        let mut cursor: Option<String> = None;
        let mut removed = 0;

        loop {
            let page = self
                .backend
                .scan(STATE_PREFIX, cursor.as_deref(), batch)
                .await?;
            let Some((last, _)) = page.last() else {
                break;
            };
            cursor = Some(last.clone());

            for (backend_key, _) in &page {
                if self.backend.delete(backend_key).await? {
                    removed += 1;
                }
            }

            if page.len() < batch {
                break;
            }
        }

        self.values.clear();
        info!("Cleared {} state entries", removed);
        Ok(removed)
    }

    /// Last version this store loaded or wrote for `key`
    pub fn version_of(&self, key: &str) -> Option<StateVersion> {
        self.values.get(key).map(|v| v.version)
    }

    /// Keys in the in-memory map, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.values.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    // ============ Locks ============

    /// Take the lock for `key`. `false` if any live lock exists, including
    /// one held by `holder` itself, or if the lock could not be recorded.
    pub async fn acquire_lock(&self, key: &str, holder: &str) -> bool {
        or_log(self.try_acquire_lock(key, holder).await, false, "acquire_lock", key)
    }

    pub async fn try_acquire_lock(&self, key: &str, holder: &str) -> FuseResult<bool> {
        let Some(lock) = self.locks.acquire(key, holder).await? else {
            debug!("Lock {} busy, refused {}", key, holder);
            return Ok(false);
        };
        let payload = serde_json::to_value(&lock)?;
        self.events
            .emit(StateEvent::new(StateEventKind::LockAcquired, key).with_payload(payload));
        Ok(true)
    }

    /// Release the lock for `key`. `false` if absent or held by someone else.
    pub async fn release_lock(&self, key: &str, holder: &str) -> bool {
        or_log(self.try_release_lock(key, holder).await, false, "release_lock", key)
    }

    pub async fn try_release_lock(&self, key: &str, holder: &str) -> FuseResult<bool> {
        if !self.locks.release(key, holder).await? {
            return Ok(false);
        }
        self.events.emit(
            StateEvent::new(StateEventKind::LockReleased, key)
                .with_payload(json!({ "holder": holder })),
        );
        Ok(true)
    }

    /// Current lock record for `key`, live or expired
    pub async fn lock_info(&self, key: &str) -> Option<StateLock> {
        or_log(self.locks.get(key).await, None, "lock_info", key)
    }

    pub async fn is_locked(&self, key: &str) -> bool {
        self.lock_info(key).await.is_some_and(|lock| lock.is_live())
    }

    /// Drop expired lock records. Returns how many were removed.
    pub async fn cleanup_expired_locks(&self) -> usize {
        or_log(
            self.locks.cleanup_expired(self.config.scan_batch_size).await,
            0,
            "cleanup_expired_locks",
            "*",
        )
    }

    // ============ Snapshots ============

    /// Write the in-memory view to the document store as a new snapshot
    pub async fn take_snapshot(&self) -> FuseResult<StateSnapshot> {
        let view: BTreeMap<String, StateValue> = self
            .values
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let snapshot = self.snapshots.next(view);

        self.documents
            .insert(SNAPSHOT_COLLECTION, &snapshot.id, &snapshot.to_document()?)
            .await?;
        info!("Created snapshot {} with {} keys", snapshot.id, snapshot.len());

        self.events.emit(
            StateEvent::new(StateEventKind::SnapshotCreated, snapshot.id.as_str()).with_payload(
                json!({ "version": snapshot.version, "keys": snapshot.len() }),
            ),
        );
        Ok(snapshot)
    }

    /// Read a snapshot. `None` if absent or on any failure.
    pub async fn get_snapshot(&self, id: &str) -> Option<StateSnapshot> {
        or_log(self.try_get_snapshot(id).await, None, "get_snapshot", id)
    }

    pub async fn try_get_snapshot(&self, id: &str) -> FuseResult<Option<StateSnapshot>> {
        match self.documents.find(SNAPSHOT_COLLECTION, id).await? {
            Some(document) => Ok(Some(StateSnapshot::from_document(document)?)),
            None => Ok(None),
        }
    }

    /// Snapshot ids in ascending order
    pub async fn list_snapshots(&self) -> FuseResult<Vec<String>> {
        self.documents.list_ids(SNAPSHOT_COLLECTION).await
    }

    pub async fn latest_snapshot(&self) -> FuseResult<Option<StateSnapshot>> {
        match self.list_snapshots().await?.last() {
            Some(id) => self.try_get_snapshot(id).await,
            None => Ok(None),
        }
    }

    /// Replace all current state with the contents of a snapshot.
    ///
    /// Snapshot entries are written over the live ones first (versions kept
    /// as recorded, `Updated` per key); keys the snapshot does not hold are
    /// deleted afterwards with a `Deleted` event each. A failure part way
    /// leaves the remaining live keys in place. Returns the number of keys
    /// restored.
    pub async fn restore_snapshot(&self, id: &str) -> FuseResult<usize> {
        let snapshot = self
            .try_get_snapshot(id)
            .await?
            .ok_or_else(|| FuseError::SnapshotNotFound(id.to_string()))?;

        let mut stale = self.backend_keys().await?;
        stale.extend(self.keys());
        stale.retain(|key| !snapshot.value.contains_key(key));

        let restored = snapshot.len();
        for (key, value) in snapshot.value {
            self.backend.set(&state_key(&key), &value.to_bytes()?).await?;
            let payload = value.value.clone();
            self.values.insert(key.clone(), value);
            self.events
                .emit(StateEvent::new(StateEventKind::Updated, key).with_payload(payload));
        }

        for key in &stale {
            self.try_delete_state(key).await?;
        }

        info!(
            "Restored {} keys from snapshot {} ({} removed)",
            restored,
            id,
            stale.len()
        );
        Ok(restored)
    }

    // ============ Events ============

    pub fn events(&self) -> &StateEvents {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.events.subscribe()
    }

    pub fn on<F>(&self, kind: StateEventKind, listener: F)
    where
        F: Fn(&StateEvent) + Send + Sync + 'static,
    {
        self.events.on(kind, listener);
    }

    pub fn on_any<F>(&self, listener: F)
    where
        F: Fn(&StateEvent) + Send + Sync + 'static,
    {
        self.events.on_any(listener);
    }
}

/// Shared state store
pub type SharedStateStore = Arc<StateStore>;
