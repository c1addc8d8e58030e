//! Mutation events
//!
//! Listeners run synchronously inside the call that caused the mutation;
//! subscribers receive the same events through a broadcast channel.

use fuse_core::{StateEvent, StateEventKind};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Synchronous event callback
pub type Listener = Arc<dyn Fn(&StateEvent) + Send + Sync>;

struct Registration {
    kind: Option<StateEventKind>,
    listener: Listener,
}

/// Event emitter for state mutations
pub struct StateEvents {
    listeners: RwLock<Vec<Registration>>,
    sender: broadcast::Sender<StateEvent>,
}

impl StateEvents {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            listeners: RwLock::new(Vec::new()),
            sender,
        }
    }

    /// Register a listener for one kind of event
    pub fn on<F>(&self, kind: StateEventKind, listener: F)
    where
        F: Fn(&StateEvent) + Send + Sync + 'static,
    {
        self.listeners.write().push(Registration {
            kind: Some(kind),
            listener: Arc::new(listener),
        });
    }

    /// Register a listener for every event
    pub fn on_any<F>(&self, listener: F)
    where
        F: Fn(&StateEvent) + Send + Sync + 'static,
    {
        self.listeners.write().push(Registration {
            kind: None,
            listener: Arc::new(listener),
        });
    }

    /// Subscribe to all events. Receivers that fall behind observe `Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.sender.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn emit(&self, event: StateEvent) {
        trace!(kind = %event.kind, state_id = %event.state_id, "emitting state event");

        // Clone out so a listener may register further listeners.
        let matching: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .filter(|r| r.kind.map_or(true, |k| k == event.kind))
            .map(|r| r.listener.clone())
            .collect();

        for listener in matching {
            listener(&event);
        }

        // No subscribers is not an error
        let _ = self.sender.send(event);
    }
}

impl Default for StateEvents {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[test]
    fn test_listeners_filter_by_kind() {
        let events = StateEvents::new();
        let updated = Arc::new(Mutex::new(Vec::new()));
        let all = Arc::new(Mutex::new(0usize));

        let sink = updated.clone();
        events.on(StateEventKind::Updated, move |e| {
            sink.lock().push(e.state_id.clone())
        });
        let counter = all.clone();
        events.on_any(move |_| *counter.lock() += 1);

        events.emit(StateEvent::new(StateEventKind::Updated, "a").with_payload(json!(1)));
        events.emit(StateEvent::new(StateEventKind::Deleted, "b"));

        assert_eq!(*updated.lock(), vec!["a".to_string()]);
        assert_eq!(*all.lock(), 2);
        assert_eq!(events.listener_count(), 2);
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let events = StateEvents::new();
        let mut rx = events.subscribe();

        events.emit(StateEvent::new(StateEventKind::LockAcquired, "job-1"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, StateEventKind::LockAcquired);
        assert_eq!(event.state_id, "job-1");
    }

    #[test]
    fn test_emit_without_subscribers() {
        let events = StateEvents::new();
        events.emit(StateEvent::new(StateEventKind::SnapshotCreated, "snapshot_1"));
    }
}
