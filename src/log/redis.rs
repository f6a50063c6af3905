use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, RedisError};

use super::CounterLog;
use crate::error::LogError;
use crate::model::LogEntry;

/// Redis Streams-backed [`CounterLog`].
///
/// Maps the consumer-group primitive onto `XGROUP CREATE ... MKSTREAM`,
/// `XREADGROUP ... STREAMS key <cursor>` (cursor `0` for "pending", `>`
/// for "new"), and `XACK`, using the `redis` crate's `tokio-comp`
/// feature the idiomatic way for streams.
pub struct RedisLog {
    conn: MultiplexedConnection,
    stream_key: String,
    group: String,
    consumer: String,
}

impl RedisLog {
    pub async fn connect(
        url: &str,
        stream_key: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
    ) -> Result<Self, LogError> {
        let client = redis::Client::open(url).map_err(|e| LogError::Connection(e.to_string()))?;
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| LogError::Connection(e.to_string()))?;
        Ok(Self {
            conn,
            stream_key: stream_key.into(),
            group: group.into(),
            consumer: consumer.into(),
        })
    }

    fn reply_to_entries(reply: StreamReadReply) -> Vec<LogEntry> {
        reply
            .keys
            .into_iter()
            .flat_map(|key| key.ids)
            .map(|stream_id| {
                let fields = stream_id
                    .map
                    .into_iter()
                    .filter_map(|(field, value)| {
                        redis::from_redis_value::<String>(&value)
                            .ok()
                            .map(|v| (field, v))
                    })
                    .collect();
                LogEntry {
                    id: stream_id.id,
                    fields,
                }
            })
            .collect()
    }

    fn is_busygroup(err: &RedisError) -> bool {
        err.code() == Some("BUSYGROUP")
    }
}

#[async_trait]
impl CounterLog for RedisLog {
    async fn ensure_group(&self) -> Result<(), LogError> {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> = conn
            .xgroup_create_mkstream(&self.stream_key, &self.group, "0")
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if Self::is_busygroup(&e) => Ok(()),
            Err(e) => Err(LogError::Backend(e.to_string())),
        }
    }

    async fn read_pending(&self, count: usize) -> Result<Vec<LogEntry>, LogError> {
        let mut conn = self.conn.clone();
        let opts = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(count);
        let reply: StreamReadReply = conn
            .xread_options(&[&self.stream_key], &["0"], &opts)
            .await
            .map_err(|e| LogError::Backend(e.to_string()))?;
        Ok(Self::reply_to_entries(reply))
    }

    async fn read_new(&self, count: usize, block: Duration) -> Result<Vec<LogEntry>, LogError> {
        let mut conn = self.conn.clone();
        let opts = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(count)
            .block(block.as_millis() as usize);
        let reply: StreamReadReply = conn
            .xread_options(&[&self.stream_key], &[">"], &opts)
            .await
            .map_err(|e| LogError::Backend(e.to_string()))?;
        Ok(Self::reply_to_entries(reply))
    }

    async fn acknowledge(&self, ids: &[String]) -> Result<(), LogError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .xack(&self.stream_key, &self.group, ids)
            .await
            .map_err(|e| LogError::Backend(e.to_string()))?;
        Ok(())
    }
}
