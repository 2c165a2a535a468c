// src/storage/redis.rs

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::RedisConfig;
use crate::error::{AdmissionError, Result, StorageError};
use crate::storage::{now_millis, window_millis, CountingStore, Probe, WindowSample};

/// Grace added to each window key's TTL so clock skew between instances
/// cannot expire a key that still holds in-window events.
const TTL_GRACE: Duration = Duration::from_secs(60);

/// Distributed counting store backed by one Redis sorted set per key.
///
/// Events are members scored by their unix-millisecond stamp, so eviction
/// is a range removal and the window count is a cardinality read. The whole
/// record path runs as one MULTI/EXEC pipeline; concurrent recorders may
/// interleave between pipelines, which bounds overcounting at roughly the
/// number of in-flight recorders rather than allowing lost updates.
pub struct RedisCounter {
    connection: Arc<tokio::sync::Mutex<ConnectionManager>>,
    config: RedisConfig,
}

impl fmt::Debug for RedisCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCounter")
            .field("url", &self.config.url)
            .finish()
    }
}

impl Clone for RedisCounter {
    fn clone(&self) -> Self {
        Self {
            connection: Arc::clone(&self.connection),
            config: self.config.clone(),
        }
    }
}

impl RedisCounter {
    /// Connects with a bounded deadline; a slow endpoint is an error, not a hang.
    pub async fn connect(config: RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| AdmissionError::Storage(StorageError::Connection(e.to_string())))?;

        let manager =
            match tokio::time::timeout(config.connection_timeout, ConnectionManager::new(client))
                .await
            {
                Ok(result) => result.map_err(|e| {
                    AdmissionError::Storage(StorageError::Connection(e.to_string()))
                })?,
                Err(_) => {
                    return Err(AdmissionError::Storage(StorageError::Timeout(format!(
                        "connecting to {} took longer than {:?}",
                        config.url, config.connection_timeout
                    ))));
                }
            };

        Ok(Self {
            connection: Arc::new(tokio::sync::Mutex::new(manager)),
            config,
        })
    }

    /// Runs one command/pipeline under the configured operation deadline.
    async fn bounded<T>(
        &self,
        what: &str,
        fut: impl Future<Output = redis::RedisResult<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.config.operation_timeout, fut).await {
            Ok(result) => result.map_err(AdmissionError::from),
            Err(_) => Err(AdmissionError::Storage(StorageError::Timeout(format!(
                "{} took longer than {:?}",
                what, self.config.operation_timeout
            )))),
        }
    }
}

#[async_trait]
impl CountingStore for RedisCounter {
    async fn record(&self, key: &str, window: Duration) -> Result<WindowSample> {
        let now = now_millis();
        let window_ms = window_millis(window);
        let cutoff = now.saturating_sub(window_ms);
        let member = format!("{}-{}", now, Uuid::new_v4().simple());
        let ttl_ms = window_ms + TTL_GRACE.as_millis() as u64;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg(0)
            .arg(cutoff)
            .ignore()
            .cmd("ZADD")
            .arg(key)
            .arg(now)
            .arg(&member)
            .ignore()
            .cmd("ZCARD")
            .arg(key)
            .cmd("ZRANGE")
            .arg(key)
            .arg(0)
            .arg(0)
            .arg("WITHSCORES")
            .cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_ms)
            .ignore();

        let mut conn = self.connection.lock().await;
        let (count, oldest): (u64, Vec<(String, u64)>) =
            self.bounded("record", pipe.query_async(&mut *conn)).await?;

        Ok(WindowSample {
            count,
            oldest: oldest.first().map(|(_, score)| *score),
        })
    }

    async fn peek(&self, key: &str, window: Duration) -> Result<WindowSample> {
        let now = now_millis();
        let cutoff = now.saturating_sub(window_millis(window));
        // Exclusive minimum: a stamp exactly one window old is already out.
        let min = format!("({}", cutoff);

        let mut pipe = redis::pipe();
        pipe.cmd("ZCOUNT")
            .arg(key)
            .arg(&min)
            .arg("+inf")
            .cmd("ZRANGEBYSCORE")
            .arg(key)
            .arg(&min)
            .arg("+inf")
            .arg("WITHSCORES")
            .arg("LIMIT")
            .arg(0)
            .arg(1);

        let mut conn = self.connection.lock().await;
        let (count, oldest): (u64, Vec<(String, u64)>) =
            self.bounded("peek", pipe.query_async(&mut *conn)).await?;

        Ok(WindowSample {
            count,
            oldest: oldest.first().map(|(_, score)| *score),
        })
    }

    async fn forget_latest(&self, key: &str) -> Result<()> {
        let mut conn = self.connection.lock().await;
        let _removed: i64 = self
            .bounded(
                "forget_latest",
                redis::cmd("ZREMRANGEBYRANK")
                    .arg(key)
                    .arg(-1)
                    .arg(-1)
                    .query_async(&mut *conn),
            )
            .await?;
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<()> {
        let mut conn = self.connection.lock().await;
        let _removed: i64 = self
            .bounded("clear", redis::cmd("DEL").arg(key).query_async(&mut *conn))
            .await?;
        Ok(())
    }

    /// Counting keys server-side would need a SCAN sweep; the distributed
    /// store reports zero and diagnostics cover the in-process map instead.
    async fn tracked_keys(&self) -> Result<usize> {
        Ok(0)
    }
}

#[async_trait]
impl Probe for RedisCounter {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.lock().await;
        let reply: String = self
            .bounded("ping", redis::cmd("PING").query_async(&mut *conn))
            .await?;

        if reply == "PONG" {
            Ok(())
        } else {
            Err(AdmissionError::Storage(StorageError::Command(format!(
                "unexpected PING reply: {}",
                reply
            ))))
        }
    }
}
