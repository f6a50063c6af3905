use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Live counters behind the [`StatsSnapshot`] surface.
///
/// Fields are updated from the single control flow that owns the
/// aggregator and read lock-free by `get_stats()` / the health endpoint
/// — an atomic-counter-per-field idiom applied here to a
/// single-writer/many-reader field set instead of a many-writer one.
#[derive(Default)]
pub struct Stats {
    events_processed: AtomicU64,
    flush_count: AtomicU64,
    last_flush_at_ms: AtomicI64,
    pending_messages: AtomicU64,
    avg_batch_size: AtomicU64,
    error_count: AtomicU64,
}

/// Read-only view returned by `get_stats()`.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct StatsSnapshot {
    pub events_processed: u64,
    pub flush_count: u64,
    pub last_flush_at_ms: Option<i64>,
    pub pending_messages: u64,
    pub avg_batch_size: u64,
    pub error_count: u64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_event_processed(&self) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("counter_bridge_events_processed_total").increment(1);
    }

    pub fn set_pending_messages(&self, size: u64) {
        self.pending_messages.store(size, Ordering::Relaxed);
        metrics::gauge!("counter_bridge_pending_messages").set(size as f64);
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("counter_bridge_errors_total").increment(1);
    }

    /// Record a completed flush (success or partial success) of `batch_size`
    /// scopes, updating the running mean batch size.
    pub fn record_flush(&self, batch_size: u64, now_ms: i64) {
        let count = self.flush_count.fetch_add(1, Ordering::Relaxed) + 1;
        let old_avg = self.avg_batch_size.load(Ordering::Relaxed);
        let new_avg = ((old_avg * (count - 1) + batch_size) as f64 / count as f64).round() as u64;
        self.avg_batch_size.store(new_avg, Ordering::Relaxed);
        self.last_flush_at_ms.store(now_ms, Ordering::Relaxed);
        metrics::counter!("counter_bridge_flushes_total").increment(1);
        metrics::histogram!("counter_bridge_flush_batch_size").record(batch_size as f64);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let last_flush = self.last_flush_at_ms.load(Ordering::Relaxed);
        StatsSnapshot {
            events_processed: self.events_processed.load(Ordering::Relaxed),
            flush_count: self.flush_count.load(Ordering::Relaxed),
            last_flush_at_ms: if last_flush == 0 { None } else { Some(last_flush) },
            pending_messages: self.pending_messages.load(Ordering::Relaxed),
            avg_batch_size: self.avg_batch_size.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avg_batch_size_is_a_cumulative_mean() {
        let stats = Stats::new();
        stats.record_flush(10, 1);
        stats.record_flush(20, 2);
        stats.record_flush(30, 3);
        // (10 + 20 + 30) / 3 = 20
        assert_eq!(stats.snapshot().avg_batch_size, 20);
        assert_eq!(stats.snapshot().flush_count, 3);
    }

    #[test]
    fn no_flush_yet_has_no_last_flush_at() {
        let stats = Stats::new();
        assert_eq!(stats.snapshot().last_flush_at_ms, None);
    }

    #[test]
    fn pending_messages_reflects_latest_set_value() {
        let stats = Stats::new();
        stats.set_pending_messages(5);
        assert_eq!(stats.snapshot().pending_messages, 5);
        stats.set_pending_messages(0);
        assert_eq!(stats.snapshot().pending_messages, 0);
    }
}
