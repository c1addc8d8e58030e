//! State snapshot functionality

use chrono::Utc;
use fuse_core::{StateSnapshot, StateValue};
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Issues snapshot ids and sequence numbers for one store.
///
/// Ids are `snapshot_<epoch-ms>`; when two snapshots fall in the same
/// millisecond the later one takes the next free millisecond so ids stay
/// unique and ordered.
pub struct SnapshotSequence {
    inner: Mutex<SequenceState>,
}

#[derive(Default)]
struct SequenceState {
    last_ms: i64,
    version: u64,
}

impl SnapshotSequence {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SequenceState::default()),
        }
    }

    /// Build the next snapshot from a flattened view of the store
    pub fn next(&self, value: BTreeMap<String, StateValue>) -> StateSnapshot {
        self.next_at(Utc::now().timestamp_millis(), value)
    }

    pub fn next_at(&self, now_ms: i64, value: BTreeMap<String, StateValue>) -> StateSnapshot {
        let mut state = self.inner.lock();
        let ms = now_ms.max(state.last_ms + 1);
        state.last_ms = ms;
        state.version += 1;
        StateSnapshot::new(ms, state.version, value)
    }

    /// Continue numbering after a snapshot written by an earlier run
    pub fn resume_after(&self, latest: &StateSnapshot) {
        let mut state = self.inner.lock();
        state.last_ms = state.last_ms.max(latest.timestamp.timestamp_millis());
        state.version = state.version.max(latest.version);
    }

    /// Highest snapshot version issued or resumed from
    pub fn issued(&self) -> u64 {
        self.inner.lock().version
    }
}

impl Default for SnapshotSequence {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fuse_core::StateVersion;
    use serde_json::json;

    #[test]
    fn test_ids_unique_within_one_millisecond() {
        let sequence = SnapshotSequence::new();

        let first = sequence.next_at(1_000, BTreeMap::new());
        let second = sequence.next_at(1_000, BTreeMap::new());
        let third = sequence.next_at(999, BTreeMap::new());

        assert_eq!(first.id, "snapshot_1000");
        assert_eq!(second.id, "snapshot_1001");
        assert_eq!(third.id, "snapshot_1002");
        assert_eq!(third.version, 3);
        assert_eq!(sequence.issued(), 3);
    }

    #[test]
    fn test_resume_after_earlier_run() {
        let earlier = SnapshotSequence::new();
        earlier.next_at(5_000, BTreeMap::new());
        let last = earlier.next_at(5_000, BTreeMap::new());

        let sequence = SnapshotSequence::new();
        sequence.resume_after(&last);
        let next = sequence.next_at(4_000, BTreeMap::new());

        assert_eq!(next.version, 3);
        assert_eq!(next.id, "snapshot_5002");

        // Resuming never moves the sequence backwards
        sequence.resume_after(&last);
        assert_eq!(sequence.issued(), 3);
    }

    #[test]
    fn test_snapshot_document_roundtrip() {
        let sequence = SnapshotSequence::new();
        let mut value = BTreeMap::new();
        value.insert(
            "a".to_string(),
            StateValue::new(json!({"n": 1}), StateVersion::new(1)),
        );

        let snapshot = sequence.next(value);
        let document = snapshot.to_document().unwrap();
        assert_eq!(document["value"]["a"]["version"], json!(1));

        let restored = StateSnapshot::from_document(document).unwrap();
        assert_eq!(restored, snapshot);
    }
}
