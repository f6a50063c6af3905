pub mod redis;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::LogError;
use crate::model::LogEntry;

/// The append-only, consumer-group log the stream reader pulls from.
#[async_trait]
pub trait CounterLog: Send + Sync {
    /// Idempotently ensure the consumer group (and stream) exist. An
    /// "already exists" condition must be swallowed by the implementation
    /// and reported as `Ok(())`; any other failure is fatal to startup.
    async fn ensure_group(&self) -> Result<(), LogError>;

    /// Bounded, non-blocking read of this consumer's in-flight (pending)
    /// entries — delivered before but never acknowledged.
    async fn read_pending(&self, count: usize) -> Result<Vec<LogEntry>, LogError>;

    /// Blocking read of new entries for this consumer group, bounded by
    /// `count` and `block`.
    async fn read_new(&self, count: usize, block: Duration) -> Result<Vec<LogEntry>, LogError>;

    /// Acknowledge one or more entry ids as durably handled.
    async fn acknowledge(&self, ids: &[String]) -> Result<(), LogError>;
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// In-memory log used by reader/engine tests: a fixed "pending" queue
    /// drained once at startup, then a "new" queue fed by the test.
    #[derive(Default)]
    pub struct FakeLog {
        pub pending: Mutex<VecDeque<LogEntry>>,
        pub new_entries: Mutex<VecDeque<LogEntry>>,
        pub acked: Mutex<Vec<String>>,
        pub group_exists_error: bool,
        pub read_error_once: Mutex<bool>,
    }

    impl FakeLog {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_new(&self, entry: LogEntry) {
            self.new_entries.lock().unwrap().push_back(entry);
        }

        pub fn push_pending(&self, entry: LogEntry) {
            self.pending.lock().unwrap().push_back(entry);
        }
    }

    #[async_trait]
    impl CounterLog for FakeLog {
        async fn ensure_group(&self) -> Result<(), LogError> {
            if self.group_exists_error {
                Err(LogError::GroupExists)
            } else {
                Ok(())
            }
        }

        async fn read_pending(&self, count: usize) -> Result<Vec<LogEntry>, LogError> {
            let mut pending = self.pending.lock().unwrap();
            let n = count.min(pending.len());
            Ok(pending.drain(..n).collect())
        }

        async fn read_new(&self, count: usize, _block: Duration) -> Result<Vec<LogEntry>, LogError> {
            if std::mem::take(&mut *self.read_error_once.lock().unwrap()) {
                return Err(LogError::Connection("injected".into()));
            }
            let mut new_entries = self.new_entries.lock().unwrap();
            let n = count.min(new_entries.len());
            Ok(new_entries.drain(..n).collect())
        }

        async fn acknowledge(&self, ids: &[String]) -> Result<(), LogError> {
            self.acked.lock().unwrap().extend(ids.iter().cloned());
            Ok(())
        }
    }
}
