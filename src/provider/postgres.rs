use std::collections::HashMap;

use async_trait::async_trait;
use deadpool_postgres::{Config, Pool, Runtime};
use tokio_postgres::NoTls;
use tracing::{info, warn};

use super::{CounterStorageProvider, FlushOutcome};
use crate::error::ProviderError;

/// Postgres-backed [`CounterStorageProvider`].
///
/// Upserts net deltas into a single `counter_values(scope, value)` table
/// using `INSERT ... ON CONFLICT DO UPDATE SET value = value +
/// EXCLUDED.value`. Repeated application of the same batch over-counts;
/// this provider does not attempt to dedupe by event id.
pub struct PostgresProvider {
    pool: Pool,
}

impl PostgresProvider {
    pub fn new(database_url: &str) -> Result<Self, ProviderError> {
        let mut cfg = Config::new();
        cfg.url = Some(database_url.to_string());
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ProviderError::Backend(e.to_string()))?;
        info!("counter storage pool created");
        Ok(Self { pool })
    }

    async fn client(&self) -> Result<deadpool_postgres::Client, ProviderError> {
        self.pool
            .get()
            .await
            .map_err(|e| ProviderError::Backend(e.to_string()))
    }
}

#[async_trait]
impl CounterStorageProvider for PostgresProvider {
    async fn flush(&self, batch: HashMap<String, i64>) -> Result<FlushOutcome, ProviderError> {
        if batch.is_empty() {
            return Ok(FlushOutcome::Success);
        }

        let client = self.client().await?;
        let stmt = client
            .prepare(
                r#"
                INSERT INTO counter_values (scope, value, updated_at)
                VALUES ($1, $2, NOW())
                ON CONFLICT (scope)
                DO UPDATE SET
                    value = counter_values.value + EXCLUDED.value,
                    updated_at = NOW()
                "#,
            )
            .await
            .map_err(|e| ProviderError::Backend(e.to_string()))?;

        let mut failed = HashMap::new();
        for (scope, delta) in batch {
            if let Err(e) = client.execute(&stmt, &[&scope, &delta]).await {
                warn!(scope = %scope, error = %e, "failed to upsert counter value");
                failed.insert(scope, delta);
            }
        }

        if failed.is_empty() {
            Ok(FlushOutcome::Success)
        } else {
            Ok(FlushOutcome::Partial { failed })
        }
    }

    async fn get(&self, scope: &str) -> Result<i64, ProviderError> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT value FROM counter_values WHERE scope = $1",
                &[&scope],
            )
            .await
            .map_err(|e| ProviderError::Backend(e.to_string()))?;
        Ok(row.map(|r| r.get::<_, i64>("value")).unwrap_or(0))
    }

    async fn get_batch(&self, scopes: &[String]) -> Result<HashMap<String, i64>, ProviderError> {
        if scopes.is_empty() {
            return Ok(HashMap::new());
        }
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT scope, value FROM counter_values WHERE scope = ANY($1)",
                &[&scopes],
            )
            .await
            .map_err(|e| ProviderError::Backend(e.to_string()))?;

        let mut values: HashMap<String, i64> =
            scopes.iter().map(|s| (s.clone(), 0)).collect();
        for row in rows {
            values.insert(row.get("scope"), row.get("value"));
        }
        Ok(values)
    }

    async fn delete(&self, scope: &str) -> Result<(), ProviderError> {
        let client = self.client().await?;
        client
            .execute("DELETE FROM counter_values WHERE scope = $1", &[&scope])
            .await
            .map_err(|e| ProviderError::Backend(e.to_string()))?;
        Ok(())
    }
}

/// DDL applied by operators before pointing this provider at a database.
/// Not run automatically — this repo does not own schema migrations.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS counter_values (
    scope TEXT PRIMARY KEY,
    value BIGINT NOT NULL DEFAULT 0,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#;
