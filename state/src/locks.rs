//! Advisory locks
//!
//! Locks are cooperative: nothing stops a caller from writing a key it does
//! not hold. A lock is live until its `expires` timestamp and expiry is only
//! observed lazily, on the next acquisition attempt or explicit sweep.
//!
//! `LockTable` is process-local and gives no exclusion across instances.
//! `BackendLocks` keeps the same records under `lock:<key>` in the shared
//! backend and relies on compare-and-swap for exclusion.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fuse_core::{
    lock_key, FuseResult, KeyValueBackend, LockScope, StateLock, Timestamp, LOCK_PREFIX,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Process-local lock table
pub struct LockTable {
    locks: DashMap<String, StateLock>,
    timeout: Duration,
}

impl LockTable {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            timeout,
        }
    }

    /// Acquire unless a live lock exists, whoever holds it
    pub fn acquire(&self, key: &str, holder: &str, now: Timestamp) -> Option<StateLock> {
        let lock = StateLock::new(holder, now, self.timeout);
        match self.locks.entry(key.to_string()) {
            Entry::Occupied(mut existing) => {
                if existing.get().is_live_at(now) {
                    return None;
                }
                existing.insert(lock.clone());
            }
            Entry::Vacant(slot) => {
                slot.insert(lock.clone());
            }
        }
        Some(lock)
    }

    /// Release if `holder` owns the lock. Expiry is not checked here.
    pub fn release(&self, key: &str, holder: &str) -> bool {
        self.locks
            .remove_if(key, |_, lock| lock.holder == holder)
            .is_some()
    }

    pub fn get(&self, key: &str) -> Option<StateLock> {
        self.locks.get(key).map(|lock| lock.value().clone())
    }

    pub fn cleanup_expired(&self, now: Timestamp) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| lock.is_live_at(now));
        before.saturating_sub(self.locks.len())
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Locks stored in the shared backend
pub struct BackendLocks {
    backend: Arc<dyn KeyValueBackend>,
    timeout: Duration,
}

impl BackendLocks {
    pub fn new(backend: Arc<dyn KeyValueBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    fn parse(key: &str, bytes: &[u8]) -> Option<StateLock> {
        match StateLock::from_bytes(bytes) {
            Ok(lock) => Some(lock),
            Err(e) => {
                warn!("Treating unreadable lock record {} as expired: {}", key, e);
                None
            }
        }
    }

    pub async fn acquire(
        &self,
        key: &str,
        holder: &str,
        now: Timestamp,
    ) -> FuseResult<Option<StateLock>> {
        let backend_key = lock_key(key);
        let current = self.backend.get(&backend_key).await?;

        if let Some(bytes) = &current {
            if let Some(existing) = Self::parse(&backend_key, bytes) {
                if existing.is_live_at(now) {
                    return Ok(None);
                }
            }
        }

        let lock = StateLock::new(holder, now, self.timeout);
        let encoded = lock.to_bytes()?;
        let swapped = self
            .backend
            .compare_and_swap(&backend_key, current.as_deref(), Some(encoded.as_slice()))
            .await?;
        if !swapped {
            debug!("Lost lock race for {}", key);
        }
        Ok(swapped.then_some(lock))
    }

    pub async fn release(&self, key: &str, holder: &str) -> FuseResult<bool> {
        let backend_key = lock_key(key);
        let Some(bytes) = self.backend.get(&backend_key).await? else {
            return Ok(false);
        };
        match Self::parse(&backend_key, &bytes) {
            Some(lock) if lock.holder == holder => {
                self.backend
                    .compare_and_swap(&backend_key, Some(bytes.as_slice()), None)
                    .await
            }
            _ => Ok(false),
        }
    }

    pub async fn get(&self, key: &str) -> FuseResult<Option<StateLock>> {
        let backend_key = lock_key(key);
        Ok(self
            .backend
            .get(&backend_key)
            .await?
            .and_then(|bytes| Self::parse(&backend_key, &bytes)))
    }

    pub async fn cleanup_expired(&self, now: Timestamp, batch: usize) -> FuseResult<usize> {
        let mut removed = 0;
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .backend
                .scan(LOCK_PREFIX, cursor.as_deref(), batch)
                .await?;
            let Some((last, _)) = page.last() else {
                break;
            };
            cursor = Some(last.clone());

            for (backend_key, bytes) in &page {
                let expired = Self::parse(backend_key, bytes)
                    .map_or(true, |lock| !lock.is_live_at(now));
                if expired
                    && self
                        .backend
                        .compare_and_swap(backend_key, Some(bytes.as_slice()), None)
                        .await?
                {
                    removed += 1;
                }
            }

            if page.len() < batch {
                break;
            }
        }
        Ok(removed)
    }
}

/// Lock manager for either scope
pub enum LockManager {
    Local(LockTable),
    Backend(BackendLocks),
}

impl LockManager {
    pub fn new(scope: LockScope, backend: Arc<dyn KeyValueBackend>, timeout: Duration) -> Self {
        match scope {
            LockScope::Local => LockManager::Local(LockTable::new(timeout)),
            LockScope::Backend => LockManager::Backend(BackendLocks::new(backend, timeout)),
        }
    }

    pub fn scope(&self) -> LockScope {
        match self {
            LockManager::Local(_) => LockScope::Local,
            LockManager::Backend(_) => LockScope::Backend,
        }
    }

    pub async fn acquire(&self, key: &str, holder: &str) -> FuseResult<Option<StateLock>> {
        let now = Utc::now();
        match self {
            LockManager::Local(table) => Ok(table.acquire(key, holder, now)),
            LockManager::Backend(locks) => locks.acquire(key, holder, now).await,
        }
    }

    pub async fn release(&self, key: &str, holder: &str) -> FuseResult<bool> {
        match self {
            LockManager::Local(table) => Ok(table.release(key, holder)),
            LockManager::Backend(locks) => locks.release(key, holder).await,
        }
    }

    pub async fn get(&self, key: &str) -> FuseResult<Option<StateLock>> {
        match self {
            LockManager::Local(table) => Ok(table.get(key)),
            LockManager::Backend(locks) => locks.get(key).await,
        }
    }

    pub async fn cleanup_expired(&self, batch: usize) -> FuseResult<usize> {
        let now = Utc::now();
        match self {
            LockManager::Local(table) => Ok(table.cleanup_expired(now)),
            LockManager::Backend(locks) => locks.cleanup_expired(now, batch).await,
        }
    }
}
