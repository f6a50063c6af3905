use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::info;

use crate::aggregator::Aggregator;
use crate::error::ConsumerError;
use crate::events::{ConsumerEvent, EventBus};
use crate::flush::{self, FlushCoordinator, PendingFlush};
use crate::log::CounterLog;
use crate::pending::PendingIds;
use crate::provider::CounterStorageProvider;
use crate::reader::{fold_entries, StreamReader, READ_ERROR_BACKOFF};
use crate::stats::{Stats, StatsSnapshot};

/// Tunables the engine needs beyond the log/provider connections
/// themselves — the subset of `config::Configuration` relevant once the
/// log and provider are already constructed.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_messages: u64,
    pub max_wait: Duration,
}

/// Lifecycle- and stats-owning composition root.
///
/// Owns the `Arc<dyn CounterStorageProvider>` and `Arc<dyn CounterLog>`
/// (via `StreamReader`) for the process lifetime. The `Aggregator` and
/// `PendingIds` are created fresh in `start()` and moved into the single
/// spawned task that owns them for as long as the engine runs —
/// `ConsumerEngine` itself never touches them directly.
pub struct ConsumerEngine {
    reader: Arc<StreamReader>,
    flush: Arc<FlushCoordinator>,
    flush_rx: AsyncMutex<Option<mpsc::Receiver<PendingFlush>>>,
    provider: Arc<dyn CounterStorageProvider>,
    stats: Arc<Stats>,
    events: EventBus,
    settings: EngineSettings,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    task: AsyncMutex<Option<JoinHandle<()>>>,
}

impl ConsumerEngine {
    pub fn new(
        log: Arc<dyn CounterLog>,
        provider: Arc<dyn CounterStorageProvider>,
        settings: EngineSettings,
    ) -> Self {
        let (flush_coordinator, flush_rx) = FlushCoordinator::new(Arc::clone(&provider));
        let (shutdown, _rx) = watch::channel(false);
        Self {
            reader: Arc::new(StreamReader::new(log)),
            flush: Arc::new(flush_coordinator),
            flush_rx: AsyncMutex::new(Some(flush_rx)),
            provider,
            stats: Arc::new(Stats::new()),
            events: EventBus::new(),
            settings,
            running: AtomicBool::new(false),
            shutdown,
            task: AsyncMutex::new(None),
        }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ConsumerEvent> {
        self.events.subscribe()
    }

    pub fn get_stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub async fn get(&self, scope: &str) -> Result<i64, crate::error::ProviderError> {
        self.provider.get(scope).await
    }

    pub async fn get_batch(
        &self,
        scopes: &[String],
    ) -> Result<std::collections::HashMap<String, i64>, crate::error::ProviderError> {
        self.provider.get_batch(scopes).await
    }

    /// Idempotent: calling `start()` on an already-running engine is a
    /// no-op. Runs provider init, consumer-group setup, and synchronous
    /// recovery inline before spawning the live-mode loop, so the
    /// returned future only resolves once recovery has completed.
    pub async fn start(&self) -> Result<(), ConsumerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.provider.initialize().await?;
        self.reader.ensure_group().await?;

        let mut aggregator = Aggregator::new();
        let mut pending = PendingIds::new();
        self.reader
            .recover(
                &mut aggregator,
                &mut pending,
                &self.stats,
                &self.events,
                self.settings.max_messages as usize,
            )
            .await;
        if let Some(completed) = self.flush.flush_now(&mut aggregator, &mut pending).await {
            self.apply_and_ack(completed, &mut aggregator, &mut pending)
                .await;
        }

        let flush_rx = self
            .flush_rx
            .lock()
            .await
            .take()
            .expect("flush_rx only taken once across the engine's lifetime");

        self.events.publish(ConsumerEvent::Started);
        info!("consumer engine started");

        let reader = Arc::clone(&self.reader);
        let flush = Arc::clone(&self.flush);
        let stats = Arc::clone(&self.stats);
        let events = self.events.clone();
        let settings = self.settings.clone();
        let shutdown_rx = self.shutdown.subscribe();

        let handle = tokio::spawn(run_loop(
            reader,
            flush,
            flush_rx,
            stats,
            events,
            aggregator,
            pending,
            settings,
            shutdown_rx,
        ));
        *self.task.lock().await = Some(handle);
        Ok(())
    }

    /// Idempotent: a no-op if the engine isn't running. Signals the live
    /// loop to stop, waits for it to perform its final flush, then closes
    /// the provider.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
        if let Err(e) = self.provider.close().await {
            tracing::warn!(error = %e, "provider close failed");
        }
        info!("consumer engine stopped");
    }

    async fn apply_and_ack(
        &self,
        completed: PendingFlush,
        aggregator: &mut Aggregator,
        pending: &mut PendingIds,
    ) {
        apply_completed(
            completed,
            aggregator,
            pending,
            &self.stats,
            &self.events,
            &self.reader,
        )
        .await;
    }
}

/// The single task that owns `Aggregator`/`PendingIds` for the engine's
/// running lifetime. Combines the three trigger sources —
/// blocking log read, independent flush timer, and flush-completion
/// channel — in one `select!`, grounded in `UsageFlusher::flush_loop`'s
/// shape.
#[allow(clippy::too_many_arguments)]
async fn run_loop(
    reader: Arc<StreamReader>,
    flush: Arc<FlushCoordinator>,
    mut flush_rx: mpsc::Receiver<PendingFlush>,
    stats: Arc<Stats>,
    events: EventBus,
    mut aggregator: Aggregator,
    mut pending: PendingIds,
    settings: EngineSettings,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut timer = tokio::time::interval(settings.max_wait);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }

            completed = flush_rx.recv() => {
                if let Some(completed) = completed {
                    apply_completed(completed, &mut aggregator, &mut pending, &stats, &events, &reader).await;
                }
            }

            _ = timer.tick() => {
                flush.trigger(&mut aggregator, &mut pending);
            }

            read_result = reader.read_live(settings.max_messages as usize, settings.max_wait) => {
                match read_result {
                    Ok(entries) => {
                        fold_entries(entries, &mut aggregator, &mut pending, &stats, &events);
                        if aggregator.size() >= settings.max_messages {
                            flush.trigger(&mut aggregator, &mut pending);
                        }
                    }
                    Err(e) => {
                        stats.record_error();
                        events.publish(ConsumerEvent::Error { message: format!("read failed: {e}") });
                        tokio::time::sleep(READ_ERROR_BACKOFF).await;
                    }
                }
            }
        }
    }

    // Wait out any background flush still in flight before draining: its
    // `PendingFlush` is only guaranteed to be sitting in `flush_rx` once
    // the permit it holds has been released.
    flush.wait_idle().await;
    while let Ok(completed) = flush_rx.try_recv() {
        apply_completed(completed, &mut aggregator, &mut pending, &stats, &events, &reader).await;
    }
    if let Some(completed) = flush.flush_now(&mut aggregator, &mut pending).await {
        apply_completed(completed, &mut aggregator, &mut pending, &stats, &events, &reader).await;
    }
    events.publish(ConsumerEvent::Stopped);
}

async fn apply_completed(
    completed: PendingFlush,
    aggregator: &mut Aggregator,
    pending: &mut PendingIds,
    stats: &Stats,
    events: &EventBus,
    reader: &StreamReader,
) {
    let flush_number = completed.flush_number;
    let batch_size = completed.batch.len() as u64;
    let is_err = completed.result.is_err();
    let now_ms = chrono::Utc::now().timestamp_millis();

    let applied = flush::apply(completed, aggregator, pending, now_ms);

    if !applied.ids_to_ack.is_empty() {
        if let Err(e) = reader.acknowledge(&applied.ids_to_ack).await {
            events.publish(ConsumerEvent::Error {
                message: format!("acknowledge failed: {e}"),
            });
        }
    }

    if is_err {
        stats.record_error();
        events.publish(ConsumerEvent::Error {
            message: "flush failed".to_string(),
        });
    } else {
        stats.record_flush(batch_size, now_ms);
        events.publish(ConsumerEvent::Flush {
            scope_count: batch_size as usize,
            flush_number,
        });
        if applied.warn_partial_failure {
            events.publish(ConsumerEvent::Warn {
                message: "Partial flush failure".to_string(),
                fields: std::collections::HashMap::new(),
            });
        }
    }
    stats.set_pending_messages(aggregator.size());
}
