//! Core types for Fuse state
//!
//! Defines the persisted and emitted data structures: versioned values,
//! snapshots, advisory locks and mutation events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::error::FuseError;
use crate::traits::FuseResult;

/// Backend namespace for live values
pub const STATE_PREFIX: &str = "state:";

/// Backend namespace for locks held in the backend
pub const LOCK_PREFIX: &str = "lock:";

/// Document store collection for snapshots
pub const SNAPSHOT_COLLECTION: &str = "snapshots";

/// Wall-clock time in UTC
pub type Timestamp = DateTime<Utc>;

/// Free-form metadata attached to values, snapshots, locks and events
pub type Metadata = serde_json::Map<String, Value>;

/// Build the backend key for a state key
pub fn state_key(key: &str) -> String {
    format!("{}{}", STATE_PREFIX, key)
}

/// Strip the state namespace from a backend key
pub fn parse_state_key(backend_key: &str) -> Option<&str> {
    backend_key.strip_prefix(STATE_PREFIX)
}

/// Build the backend key for a lock
pub fn lock_key(key: &str) -> String {
    format!("{}{}", LOCK_PREFIX, key)
}

/// Per-key version counter, starting at 1 for the first write
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct StateVersion(pub u64);

impl StateVersion {
    pub fn new(value: u64) -> Self {
        StateVersion(value)
    }

    pub fn next(&self) -> StateVersion {
        StateVersion(self.0 + 1)
    }
}

impl fmt::Display for StateVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl fmt::Debug for StateVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateVersion({})", self.0)
    }
}

/// Versioned wrapper persisted under `state:<key>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateValue {
    pub id: Uuid,
    /// The caller's raw value
    pub value: Value,
    pub version: StateVersion,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub metadata: Metadata,
}

impl StateValue {
    pub fn new(value: Value, version: StateVersion) -> Self {
        Self {
            id: Uuid::new_v4(),
            value,
            version,
            timestamp: Utc::now(),
            metadata: Metadata::new(),
        }
    }

    pub fn to_bytes(&self) -> FuseResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> FuseResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Point-in-time copy of every value the store knows about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// `snapshot_<epoch-ms>`
    pub id: String,
    /// Flattened copy of the in-memory view, keyed by state key
    pub value: BTreeMap<String, StateValue>,
    /// Store-local snapshot sequence number
    pub version: u64,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub metadata: Metadata,
}

impl StateSnapshot {
    pub fn new(epoch_ms: i64, version: u64, value: BTreeMap<String, StateValue>) -> Self {
        Self {
            id: Self::id_for(epoch_ms),
            value,
            version,
            timestamp: DateTime::from_timestamp_millis(epoch_ms).unwrap_or_else(Utc::now),
            metadata: Metadata::new(),
        }
    }

    pub fn id_for(epoch_ms: i64) -> String {
        format!("snapshot_{}", epoch_ms)
    }

    pub fn to_document(&self) -> FuseResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_document(document: Value) -> FuseResult<Self> {
        serde_json::from_value(document)
            .map_err(|e| FuseError::Serialization(format!("malformed snapshot: {}", e)))
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

/// Advisory lock record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateLock {
    pub holder: String,
    pub acquired: Timestamp,
    pub expires: Timestamp,
    #[serde(default)]
    pub metadata: Metadata,
}

impl StateLock {
    /// Create a lock acquired at `now`. `expires` is always after `acquired`.
    pub fn new(holder: impl Into<String>, now: Timestamp, timeout: Duration) -> Self {
        let ttl = chrono::Duration::from_std(timeout)
            .ok()
            .filter(|d| *d > chrono::Duration::zero())
            .unwrap_or_else(|| chrono::Duration::milliseconds(1));
        Self {
            holder: holder.into(),
            acquired: now,
            expires: now + ttl,
            metadata: Metadata::new(),
        }
    }

    pub fn is_live_at(&self, now: Timestamp) -> bool {
        now < self.expires
    }

    pub fn is_live(&self) -> bool {
        self.is_live_at(Utc::now())
    }

    pub fn to_bytes(&self) -> FuseResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> FuseResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Kind of mutation an event reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateEventKind {
    Updated,
    Deleted,
    LockAcquired,
    LockReleased,
    SnapshotCreated,
}

impl StateEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateEventKind::Updated => "UPDATED",
            StateEventKind::Deleted => "DELETED",
            StateEventKind::LockAcquired => "LOCK_ACQUIRED",
            StateEventKind::LockReleased => "LOCK_RELEASED",
            StateEventKind::SnapshotCreated => "SNAPSHOT_CREATED",
        }
    }
}

impl fmt::Display for StateEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ephemeral notification of a mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEvent {
    pub id: Uuid,
    pub kind: StateEventKind,
    /// State key, or snapshot id for `SnapshotCreated`
    pub state_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    pub timestamp: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl StateEvent {
    pub fn new(kind: StateEventKind, state_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            state_id: state_id.into(),
            payload: None,
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_state_key_roundtrip() {
        let key = state_key("counter");
        assert_eq!(key, "state:counter");
        assert_eq!(parse_state_key(&key), Some("counter"));
        assert_eq!(parse_state_key("lock:counter"), None);
    }

    #[test]
    fn test_version_serializes_as_integer() {
        let value = StateValue::new(json!({"n": 1}), StateVersion::new(3));
        let encoded = serde_json::to_value(&value).unwrap();
        assert_eq!(encoded["version"], json!(3));
        assert_eq!(encoded["value"], json!({"n": 1}));
    }

    #[test]
    fn test_lock_expiry_after_acquisition() {
        let now = Utc::now();
        let lock = StateLock::new("worker-A", now, Duration::from_millis(30_000));
        assert!(lock.expires > lock.acquired);
        assert!(lock.is_live_at(now));
        assert!(!lock.is_live_at(now + chrono::Duration::milliseconds(30_000)));

        let zero = StateLock::new("worker-A", now, Duration::ZERO);
        assert!(zero.expires > zero.acquired);
    }

    #[test]
    fn test_snapshot_id_format() {
        let snapshot = StateSnapshot::new(1_700_000_000_123, 1, BTreeMap::new());
        assert_eq!(snapshot.id, "snapshot_1700000000123");
        assert_eq!(snapshot.timestamp.timestamp_millis(), 1_700_000_000_123);
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_event_kind_wire_names() {
        let encoded = serde_json::to_value(StateEventKind::LockAcquired).unwrap();
        assert_eq!(encoded, json!("LOCK_ACQUIRED"));
        assert_eq!(StateEventKind::SnapshotCreated.to_string(), "SNAPSHOT_CREATED");
    }
}
