use thiserror::Error;

/// Errors raised by a [`crate::log::CounterLog`] implementation.
///
/// Kept as its own enum (rather than folded into one mega-error) so a log
/// backend's failure modes don't leak implementation detail into the
/// consumer engine's error surface.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("consumer group already exists")]
    GroupExists,
    #[error("log backend error: {0}")]
    Backend(String),
    #[error("log connection error: {0}")]
    Connection(String),
}

/// Errors raised by a [`crate::provider::CounterStorageProvider`].
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider backend error: {0}")]
    Backend(String),
    #[error("operation not supported by this provider")]
    Unsupported,
}

/// Fatal errors that can abort [`crate::engine::ConsumerEngine::start`].
///
/// Everything else (read failures, partial/total flush failures, malformed
/// events) is surfaced as a [`crate::events::ConsumerEvent`] and counted,
/// never propagated as an error.
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("failed to ensure consumer group: {0}")]
    GroupSetup(#[from] LogError),
    #[error("provider initialization failed: {0}")]
    ProviderInit(#[from] ProviderError),
    #[error("configuration error: {0}")]
    Config(String),
}
