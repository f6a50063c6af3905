use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::aggregator::{Aggregator, FlushBatch};
use crate::error::ProviderError;
use crate::model::CounterEvent;
use crate::pending::PendingIds;
use crate::provider::{CounterStorageProvider, FlushOutcome};

/// The result of one completed `provider.flush()` call, still unapplied:
/// the batch and ids are carried back so the engine's single control flow
/// — not the flush task — performs the ack/re-add side effects against
/// the Aggregator/PendingIds it owns.
pub struct PendingFlush {
    pub batch: FlushBatch,
    pub ids_to_ack: Vec<String>,
    pub result: Result<FlushOutcome, ProviderError>,
    pub flush_number: u64,
}

/// Drains the Aggregator/PendingIds and drives `provider.flush()`, either
/// in the background (live-mode triggers) or inline (recovery/shutdown).
///
/// At most one flush is ever in flight, enforced by `permit`: a
/// `tokio::sync::Mutex<()>` rather than a try-lock-and-drop, so
/// serialization never starves a backlogged flush.
/// `trigger` uses `try_lock_owned` so a live-mode caller never blocks;
/// `flush_now` uses `lock_owned` so recovery/shutdown waits out whatever
/// is in flight before proceeding.
pub struct FlushCoordinator {
    provider: Arc<dyn CounterStorageProvider>,
    permit: Arc<AsyncMutex<()>>,
    flush_tx: mpsc::Sender<PendingFlush>,
    flush_number: AtomicU64,
}

impl FlushCoordinator {
    pub fn new(provider: Arc<dyn CounterStorageProvider>) -> (Self, mpsc::Receiver<PendingFlush>) {
        let (flush_tx, flush_rx) = mpsc::channel(1);
        (
            Self {
                provider,
                permit: Arc::new(AsyncMutex::new(())),
                flush_tx,
                flush_number: AtomicU64::new(0),
            },
            flush_rx,
        )
    }

    /// Fire-and-forget trigger for the live-mode read loop. Returns
    /// `false` without side effects if the aggregator is empty, or if a
    /// flush is already in flight — in the latter case the in-flight
    /// flush subsumes this trigger and it is simply dropped.
    pub fn trigger(&self, aggregator: &mut Aggregator, pending: &mut PendingIds) -> bool {
        if aggregator.is_empty() {
            return false;
        }
        let guard = match Arc::clone(&self.permit).try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => return false,
        };

        let batch = aggregator.drain();
        let ids_to_ack = pending.snapshot_and_clear();
        let flush_number = self.flush_number.fetch_add(1, Ordering::Relaxed) + 1;
        let provider = Arc::clone(&self.provider);
        let flush_tx = self.flush_tx.clone();

        tokio::spawn(async move {
            let result = provider.flush(batch.clone()).await;
            let _ = flush_tx
                .send(PendingFlush {
                    batch,
                    ids_to_ack,
                    result,
                    flush_number,
                })
                .await;
            drop(guard);
        });
        true
    }

    /// Block until any in-flight background flush (from `trigger`) has
    /// sent its [`PendingFlush`] and released the permit. Used on
    /// shutdown so the caller can drain `flush_rx` for a just-finished
    /// background flush before snapshotting a final one — otherwise a
    /// flush that completes between the shutdown signal and the final
    /// `flush_now` call could have its result left unconsumed in the
    /// channel and its ids never acknowledged or re-added.
    pub async fn wait_idle(&self) {
        let _guard = Arc::clone(&self.permit).lock_owned().await;
    }

    /// Synchronous flush used for the recovery-phase and shutdown-phase
    /// flushes: waits out any in-flight background flush, then drains and
    /// flushes inline, returning the outcome for the caller to apply.
    /// `None` if there was nothing to flush.
    pub async fn flush_now(
        &self,
        aggregator: &mut Aggregator,
        pending: &mut PendingIds,
    ) -> Option<PendingFlush> {
        let _guard = Arc::clone(&self.permit).lock_owned().await;
        if aggregator.is_empty() {
            return None;
        }
        let batch = aggregator.drain();
        let ids_to_ack = pending.snapshot_and_clear();
        let flush_number = self.flush_number.fetch_add(1, Ordering::Relaxed) + 1;
        let result = self.provider.flush(batch.clone()).await;
        Some(PendingFlush {
            batch,
            ids_to_ack,
            result,
            flush_number,
        })
    }
}

/// What the engine's control flow should do after a [`PendingFlush`] is
/// applied: which ids to acknowledge against the log, if any.
pub struct FlushApplied {
    pub ids_to_ack: Vec<String>,
    pub warn_partial_failure: bool,
}

/// Apply a completed flush's outcome to the owning Aggregator/PendingIds,
/// re-adding failed scopes as synthetic events with a fresh timestamp.
///
/// Three-way handling: an empty (or absent) `failed` map is a plain
/// success. A `Partial` outcome whose `failed` map covers the entire
/// original batch is normalized to the total-failure path — same re-add
/// and re-queue, but no "partial flush failure" warning, since nothing
/// partially succeeded.
pub fn apply(
    completed: PendingFlush,
    aggregator: &mut Aggregator,
    pending: &mut PendingIds,
    now_ms: i64,
) -> FlushApplied {
    let PendingFlush {
        batch,
        ids_to_ack,
        result,
        ..
    } = completed;

    match result {
        Ok(FlushOutcome::Success) => FlushApplied {
            ids_to_ack,
            warn_partial_failure: false,
        },
        Ok(FlushOutcome::Partial { failed }) if failed.is_empty() => FlushApplied {
            ids_to_ack,
            warn_partial_failure: false,
        },
        Ok(FlushOutcome::Partial { failed }) if failed.len() < batch.len() => {
            for (scope, delta) in failed {
                aggregator.add(&CounterEvent::synthetic(scope, delta, now_ms));
            }
            FlushApplied {
                ids_to_ack,
                warn_partial_failure: true,
            }
        }
        Ok(FlushOutcome::Partial { failed: _ }) | Err(_) => {
            for (scope, delta) in batch {
                aggregator.add(&CounterEvent::synthetic(scope, delta, now_ms));
            }
            pending.prepend(ids_to_ack);
            FlushApplied {
                ids_to_ack: Vec::new(),
                warn_partial_failure: false,
            }
        }
    }
}
