use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::aggregator::Aggregator;
use crate::error::LogError;
use crate::events::{ConsumerEvent, EventBus};
use crate::log::CounterLog;
use crate::model::LogEntry;
use crate::parser::{parse_entry, ParserWarning};
use crate::pending::PendingIds;
use crate::stats::Stats;

/// Fixed backoff applied after a transient log read failure in live mode.
pub const READ_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Pulls batches from the log and hands them to the parser/aggregator
/// path. Owns the log connection; never touches the Aggregator/PendingIds
/// except through the `&mut` references callers pass in — those are
/// owned by the single control flow in [`crate::engine::ConsumerEngine`].
pub struct StreamReader {
    log: Arc<dyn CounterLog>,
}

impl StreamReader {
    pub fn new(log: Arc<dyn CounterLog>) -> Self {
        Self { log }
    }

    /// Step 1 of the startup protocol: ensure the consumer group exists,
    /// swallowing the "already exists" condition.
    pub async fn ensure_group(&self) -> Result<(), LogError> {
        match self.log.ensure_group().await {
            Ok(()) => Ok(()),
            Err(LogError::GroupExists) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Step 2: drain this consumer's pending (in-flight) entries, folding
    /// each into the aggregator exactly as a fresh entry, until the log
    /// reports no more are outstanding. Returns the number of entries
    /// recovered (not the number of events produced — malformed ones are
    /// dropped but still counted as recovered for the `recovery` event).
    pub async fn recover(
        &self,
        aggregator: &mut Aggregator,
        pending: &mut PendingIds,
        stats: &Stats,
        events: &EventBus,
        batch_size: usize,
    ) -> usize {
        let mut recovered = 0usize;
        loop {
            let entries = match self.log.read_pending(batch_size).await {
                Ok(entries) => entries,
                Err(e) => {
                    stats.record_error();
                    events.publish(ConsumerEvent::Error {
                        message: format!("recovery read failed: {e}"),
                    });
                    break;
                }
            };
            if entries.is_empty() {
                break;
            }
            recovered += entries.len();
            fold_entries(entries, aggregator, pending, stats, events);
        }
        events.publish(ConsumerEvent::Recovery {
            recovered_ids: recovered,
        });
        recovered
    }

    /// Live-mode blocking read: at most `count` entries, blocking up to
    /// `window` for at least one.
    pub async fn read_live(
        &self,
        count: usize,
        window: Duration,
    ) -> Result<Vec<LogEntry>, LogError> {
        self.log.read_new(count, window).await
    }

    pub async fn acknowledge(&self, ids: &[String]) -> Result<(), LogError> {
        self.log.acknowledge(ids).await
    }
}

/// Parse and fold a batch of raw entries into the aggregator, publishing
/// a `warn` event for each parser warning. Malformed entries are dropped
/// without being added to `pending` — they are never acknowledged, so
/// they will be redelivered (and re-dropped) on the next recovery pass.
/// This is accepted as harmless, bounded by the log's own trim policy.
pub fn fold_entries(
    entries: Vec<LogEntry>,
    aggregator: &mut Aggregator,
    pending: &mut PendingIds,
    stats: &Stats,
    events: &EventBus,
) {
    for entry in entries {
        let result = parse_entry(&entry);
        for warning in result.warnings {
            match warning {
                ParserWarning::MalformedEvent { fields } => {
                    events.publish(ConsumerEvent::Warn {
                        message: "Dropped malformed event".to_string(),
                        fields: fields.into_iter().collect::<HashMap<_, _>>(),
                    });
                }
                ParserWarning::MetadataDecodeFailed { error } => {
                    events.publish(ConsumerEvent::Warn {
                        message: "Failed to decode metadata".to_string(),
                        fields: HashMap::from([("error".to_string(), error)]),
                    });
                }
            }
        }

        if let Some(event) = result.event {
            aggregator.add(&event);
            pending.push(entry.id);
            stats.record_event_processed();
        }
    }
    stats.set_pending_messages(aggregator.size());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::fake::FakeLog;
    use crate::model::LogEntry;

    fn entry(id: &str, fields: &[(&str, &str)]) -> LogEntry {
        LogEntry {
            id: id.to_string(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[tokio::test]
    async fn ensure_group_swallows_already_exists() {
        let log = FakeLog {
            group_exists_error: true,
            ..Default::default()
        };
        let reader = StreamReader::new(Arc::new(log));
        assert!(reader.ensure_group().await.is_ok());
    }

    #[tokio::test]
    async fn recovery_folds_pending_entries_and_reports_count() {
        let log = FakeLog::new();
        log.push_pending(entry("1-0", &[("scope", "x"), ("delta", "3")]));
        let reader = StreamReader::new(Arc::new(log));

        let mut aggregator = Aggregator::new();
        let mut pending = PendingIds::new();
        let stats = Stats::new();
        let events = EventBus::new();

        let recovered = reader
            .recover(&mut aggregator, &mut pending, &stats, &events, 100)
            .await;

        assert_eq!(recovered, 1);
        assert_eq!(aggregator.size(), 1);
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn malformed_entries_are_dropped_and_not_pended() {
        let log = FakeLog::new();
        log.push_new(entry("5-0", &[("bad", "data")]));
        let reader = StreamReader::new(Arc::new(log));

        let mut aggregator = Aggregator::new();
        let mut pending = PendingIds::new();
        let stats = Stats::new();
        let events = EventBus::new();
        let mut rx = events.subscribe();

        let entries = reader
            .read_live(100, Duration::from_millis(10))
            .await
            .unwrap();
        fold_entries(entries, &mut aggregator, &mut pending, &stats, &events);

        assert_eq!(aggregator.size(), 0);
        assert!(pending.is_empty());
        let evt = rx.try_recv().expect("a warn event should be emitted");
        match evt {
            ConsumerEvent::Warn { message, .. } => assert_eq!(message, "Dropped malformed event"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
