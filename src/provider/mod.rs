pub mod postgres;

use std::collections::HashMap;

use async_trait::async_trait;
use futures::future::join_all;

use crate::error::ProviderError;

/// Outcome of a single [`CounterStorageProvider::flush`] call that didn't
/// raise an error.
///
/// Total failure is the `Err` arm of the `Result` the trait method
/// returns — recoverable-vs-fatal is the natural `Result` boundary in
/// Rust, so the three-way success/partial/total outcome collapses to
/// two return paths: `Ok(FlushOutcome)` and `Err(_)`.
#[derive(Debug, Clone, PartialEq)]
pub enum FlushOutcome {
    Success,
    /// `failed` carries the original net deltas for the subset of scopes
    /// that could not be persisted — the provider MUST preserve these
    /// values verbatim, they are the source of truth for retry.
    Partial { failed: HashMap<String, i64> },
}

/// Pluggable persistence backend for net counter deltas.
///
/// `get_batch`, `initialize`, and `close` are expressed as default trait
/// methods rather than an `Option<dyn Fn>` capability table — callers
/// always just call them, never branch on "does this provider support
/// X".
#[async_trait]
pub trait CounterStorageProvider: Send + Sync {
    /// Persist net deltas by adding them to any existing stored value.
    async fn flush(&self, batch: HashMap<String, i64>) -> Result<FlushOutcome, ProviderError>;

    /// Current persisted value for a scope, or zero if never written.
    async fn get(&self, scope: &str) -> Result<i64, ProviderError>;

    /// Batched read. Default falls back to parallel singular `get` calls.
    async fn get_batch(&self, scopes: &[String]) -> Result<HashMap<String, i64>, ProviderError> {
        let futures = scopes.iter().map(|scope| async move {
            self.get(scope).await.map(|value| (scope.clone(), value))
        });
        join_all(futures).await.into_iter().collect()
    }

    /// Called once before any read/flush. Default is a no-op.
    async fn initialize(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Called once during shutdown. Default is a no-op.
    async fn close(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Remove a scope entirely. Not every provider supports this.
    async fn delete(&self, _scope: &str) -> Result<(), ProviderError> {
        Err(ProviderError::Unsupported)
    }
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory provider used by engine/flush-coordinator tests.
    #[derive(Default)]
    pub struct FakeProvider {
        pub values: Mutex<HashMap<String, i64>>,
        pub fail_once: Mutex<Option<FakeFailure>>,
        pub flush_calls: Mutex<Vec<HashMap<String, i64>>>,
    }

    pub enum FakeFailure {
        Total,
        Partial(Vec<String>),
    }

    impl FakeProvider {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn fail_next_with(&self, failure: FakeFailure) {
            *self.fail_once.lock().unwrap() = Some(failure);
        }
    }

    #[async_trait]
    impl CounterStorageProvider for FakeProvider {
        async fn flush(&self, batch: HashMap<String, i64>) -> Result<FlushOutcome, ProviderError> {
            self.flush_calls.lock().unwrap().push(batch.clone());

            let failure = self.fail_once.lock().unwrap().take();
            match failure {
                Some(FakeFailure::Total) => {
                    return Err(ProviderError::Backend("injected total failure".into()))
                }
                Some(FakeFailure::Partial(failed_scopes)) => {
                    let mut values = self.values.lock().unwrap();
                    let mut failed = HashMap::new();
                    for (scope, delta) in &batch {
                        if failed_scopes.contains(scope) {
                            failed.insert(scope.clone(), *delta);
                        } else {
                            *values.entry(scope.clone()).or_insert(0) += delta;
                        }
                    }
                    return Ok(FlushOutcome::Partial { failed });
                }
                None => {}
            }

            let mut values = self.values.lock().unwrap();
            for (scope, delta) in batch {
                *values.entry(scope).or_insert(0) += delta;
            }
            Ok(FlushOutcome::Success)
        }

        async fn get(&self, scope: &str) -> Result<i64, ProviderError> {
            Ok(*self.values.lock().unwrap().get(scope).unwrap_or(&0))
        }
    }
}
