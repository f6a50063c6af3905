use std::sync::Arc;

use counter_bridge::config::Configuration;
use counter_bridge::engine::{ConsumerEngine, EngineSettings};
use counter_bridge::health;
use counter_bridge::log::redis::RedisLog;
use counter_bridge::log::CounterLog;
use counter_bridge::provider::postgres::PostgresProvider;
use counter_bridge::provider::CounterStorageProvider;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Configuration::load_from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.log_level))
        .init();

    PrometheusBuilder::new()
        .with_http_listener(config.metrics_bind_address.parse::<std::net::SocketAddr>()?)
        .install()?;

    let consumer_id = config.consumer_id();
    let log: Arc<dyn CounterLog> = Arc::new(
        RedisLog::connect(
            &config.log_url,
            config.stream_key.clone(),
            config.consumer_group.clone(),
            consumer_id.clone(),
        )
        .await?,
    );
    let provider: Arc<dyn CounterStorageProvider> =
        Arc::new(PostgresProvider::new(&config.database_url)?);

    let engine = Arc::new(ConsumerEngine::new(
        log,
        provider,
        EngineSettings {
            max_messages: config.max_messages,
            max_wait: config.max_wait(),
        },
    ));

    engine.start().await?;
    tracing::info!(%consumer_id, "counter-bridge running");

    let bind_address = config.bind_address.clone();
    let health_engine = Arc::clone(&engine);
    let health_handle = tokio::spawn(async move {
        if let Err(e) = health::serve(&bind_address, health_engine).await {
            tracing::error!(error = %e, "health server exited");
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    engine.stop().await;
    health_handle.abort();

    Ok(())
}
