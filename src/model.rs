use std::collections::HashMap;

/// A single counter mutation, already validated by [`crate::parser`].
///
/// `scope` is an opaque key chosen by producers; the consumer never
/// inspects its structure. `metadata` is carried through to the provider
/// for routing purposes only — the core never reads it.
#[derive(Debug, Clone, PartialEq)]
pub struct CounterEvent {
    pub scope: String,
    pub delta: i64,
    pub timestamp_ms: i64,
    pub metadata: Option<HashMap<String, String>>,
}

impl CounterEvent {
    pub fn synthetic(scope: impl Into<String>, delta: i64, now_ms: i64) -> Self {
        Self {
            scope: scope.into(),
            delta,
            timestamp_ms: now_ms,
            metadata: None,
        }
    }
}

/// One entry as handed back by the log, before parsing.
///
/// `id` is opaque and only required to be monotonically sortable by the
/// log itself (e.g. a Redis stream entry id); the core never parses it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub id: String,
    pub fields: Vec<(String, String)>,
}

impl LogEntry {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}
