//! Redis-backed cache store.

use super::CacheStore;
use crate::keys::{CacheKey, KeyPattern};
use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use parley_config::RedisConfig;
use parley_core::{ParleyError, ParleyResult};
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Keys fetched per `SCAN` round during a pattern delete.
const SCAN_BATCH: usize = 500;

/// Create a Redis connection pool.
///
/// Does not connect; the first probe decides whether the tier is usable.
pub fn create_pool(config: &RedisConfig) -> ParleyResult<Pool> {
    info!("Creating Redis connection pool for the cache tier...");

    let cfg = Config::from_url(&config.url);

    let pool = cfg
        .builder()
        .map_err(|e| ParleyError::Configuration(format!("Invalid Redis config: {}", e)))?
        .max_size(config.pool_size)
        .wait_timeout(Some(config.pool_wait_timeout()))
        .create_timeout(Some(config.operation_timeout()))
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| ParleyError::Configuration(format!("Failed to create pool: {}", e)))?;

    info!(
        "Redis connection pool created (max_size: {})",
        config.pool_size
    );

    Ok(pool)
}

/// Redis-based cache store.
#[derive(Clone)]
pub struct RedisCacheStore {
    /// Redis connection pool. `None` when the cache tier is switched off.
    pool: Option<Arc<Pool>>,
}

impl RedisCacheStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub fn new(pool: Arc<Pool>) -> Self {
        Self { pool: Some(pool) }
    }

    /// Create a store from configuration.
    pub fn from_config(config: &RedisConfig) -> ParleyResult<Self> {
        if !config.enabled {
            return Ok(Self::disabled());
        }
        Ok(Self::new(Arc::new(create_pool(config)?)))
    }

    /// Create a store that reports every call as unavailable.
    #[must_use]
    pub fn disabled() -> Self {
        Self { pool: None }
    }

    /// Returns `true` if a pool is configured.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.pool.is_some()
    }

    /// Get a connection from the pool.
    async fn get_conn(&self) -> ParleyResult<deadpool_redis::Connection> {
        match &self.pool {
            Some(pool) => pool.get().await.map_err(|e| {
                ParleyError::cache_unavailable(format!("Failed to get Redis connection: {}", e))
            }),
            None => Err(ParleyError::cache_unavailable("Cache is disabled")),
        }
    }
}

impl std::fmt::Debug for RedisCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCacheStore")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &CacheKey) -> ParleyResult<Option<String>> {
        let mut conn = self.get_conn().await?;
        let value: Option<String> = conn.get(key.as_str()).await.map_err(|e| {
            ParleyError::cache_unavailable(format!("Failed to get key '{}': {}", key, e))
        })?;

        match &value {
            Some(_) => debug!("Redis hit for key '{}'", key),
            None => debug!("Redis miss for key '{}'", key),
        }

        Ok(value)
    }

    async fn set(&self, key: &CacheKey, value: &str, ttl: Duration) -> ParleyResult<()> {
        let mut conn = self.get_conn().await?;
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

        conn.pset_ex::<_, _, ()>(key.as_str(), value, ttl_ms)
            .await
            .map_err(|e| {
                ParleyError::cache_unavailable(format!("Failed to set key '{}': {}", key, e))
            })?;

        debug!("Cached key '{}' with TTL {}ms", key, ttl_ms);
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> ParleyResult<bool> {
        let mut conn = self.get_conn().await?;
        let deleted: i64 = conn.del(key.as_str()).await.map_err(|e| {
            ParleyError::cache_unavailable(format!("Failed to delete key '{}': {}", key, e))
        })?;

        debug!("Deleted key '{}': {}", key, deleted > 0);
        Ok(deleted > 0)
    }

    async fn delete_pattern(&self, pattern: &KeyPattern) -> ParleyResult<u64> {
        let mut conn = self.get_conn().await?;
        let glob = pattern.to_glob();
        let mut cursor: u64 = 0;
        let mut deleted: u64 = 0;

        // SCAN instead of KEYS so a large keyspace never blocks the server.
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&glob)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| {
                    ParleyError::cache_unavailable(format!("Failed to scan '{}': {}", glob, e))
                })?;

            if !batch.is_empty() {
                let removed: u64 = conn.del(&batch).await.map_err(|e| {
                    ParleyError::cache_unavailable(format!("Failed to delete keys: {}", e))
                })?;
                deleted += removed;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!("Deleted {} keys matching pattern '{}'", deleted, glob);
        Ok(deleted)
    }

    async fn ping(&self) -> ParleyResult<()> {
        let mut conn = self.get_conn().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| ParleyError::cache_unavailable(format!("PING failed: {}", e)))?;
        Ok(())
    }
}
