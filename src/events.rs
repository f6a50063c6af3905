use std::collections::HashMap;

use tokio::sync::broadcast;

/// Observability events emitted by the consumer engine.
///
/// A small typed `broadcast` channel rather than a generic event-emitter:
/// one closed, known set of variants, no string event names, no global
/// bus.
#[derive(Debug, Clone)]
pub enum ConsumerEvent {
    Started,
    Stopped,
    Flush {
        scope_count: usize,
        flush_number: u64,
    },
    Recovery {
        recovered_ids: usize,
    },
    Warn {
        message: String,
        fields: HashMap<String, String>,
    },
    Error {
        message: String,
    },
}

/// Thin wrapper over `tokio::sync::broadcast` so callers subscribe without
/// reaching into the channel type directly.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ConsumerEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        // Bounded so a slow/absent subscriber can't grow memory unbounded;
        // lagging subscribers see `RecvError::Lagged` rather than blocking
        // the engine, which never waits on a subscriber.
        let (tx, _rx) = broadcast::channel(256);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConsumerEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Dropped silently if there are no subscribers —
    /// observability is best-effort, never load-bearing for correctness.
    pub fn publish(&self, event: ConsumerEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
