use std::{sync::Arc, time::{Duration, Instant}};

use anyhow::{Context, Error, Result, anyhow};
use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    clients::health::HealthProbe,
    models::{health::DependencyHealth, retry::RetryConfig},
    ports::DedupStore,
    utils::retry_with_backoff,
};

/// One lazily established connection manager, shared by every Redis-backed
/// component of the process. The manager reconnects on its own after the
/// server drops the socket.
pub struct RedisConnection {
    client: Client,
    connection: Mutex<Option<ConnectionManager>>,
    retry_config: RetryConfig,
}

impl RedisConnection {
    pub fn new(redis_url: &str, retry_config: RetryConfig) -> Result<Self, Error> {
        let client = Client::open(redis_url).context("Failed to create redis client")?;

        Ok(Self {
            client,
            connection: Mutex::new(None),
            retry_config,
        })
    }

    /// Returns a handle to the shared manager, connecting on first use.
    pub async fn get(&self) -> Result<ConnectionManager, Error> {
        let mut guard = self.connection.lock().await;

        if let Some(connection) = guard.as_ref() {
            return Ok(connection.clone());
        }

        info!("Connecting to Redis");

        let connection = retry_with_backoff(&self.retry_config, || {
            let client = self.client.clone();
            async move { ConnectionManager::new(client).await }
        })
        .await
        .map_err(|e| anyhow!("Failed to connect to redis: {}", e))?;

        info!("Redis connection established");

        *guard = Some(connection.clone());
        Ok(connection)
    }

    pub async fn shutdown(&self) {
        if self.connection.lock().await.take().is_some() {
            info!("Redis connection closed");
        }
    }
}

#[async_trait]
impl HealthProbe for RedisConnection {
    fn name(&self) -> &str {
        "cache_service"
    }

    async fn check(&self) -> DependencyHealth {
        let start = Instant::now();

        let mut conn = match self.get().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "Redis connection failed");
                return DependencyHealth::down(format!("Connection failed: {}", e));
            }
        };

        match conn.ping::<String>().await {
            Ok(_) => {
                let elapsed = start.elapsed();
                debug!(latency = ?elapsed, "Redis health check passed");
                DependencyHealth::up(elapsed)
            }
            Err(e) => {
                warn!(error = %e, "Redis ping failed");
                DependencyHealth::down(format!("Ping failed: {}", e))
            }
        }
    }
}

pub struct RedisDedupStore {
    redis: Arc<RedisConnection>,
}

impl RedisDedupStore {
    pub fn new(redis: Arc<RedisConnection>) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl DedupStore for RedisDedupStore {
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.redis.get().await?;

        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(1)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .context("Failed to set dedup key")?;

        Ok(reply.is_some())
    }
}
