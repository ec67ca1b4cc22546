//! Cache tier abstraction.
//!
//! The gateway talks to the cache tier only through [`CacheStore`]. Values
//! are JSON strings so the trait stays object-safe.

mod memory;
mod redis_store;

pub use memory::{InMemoryCacheStore, OperationCounts};
pub use redis_store::{create_pool, RedisCacheStore};

use crate::keys::{CacheKey, KeyPattern};
use async_trait::async_trait;
use parley_core::ParleyResult;
use std::time::Duration;

/// Key-value cache tier with per-entry TTL.
///
/// Implementations report an unreachable tier as `CacheUnavailable`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a raw JSON value.
    ///
    /// Returns `None` if the key doesn't exist or has expired.
    async fn get(&self, key: &CacheKey) -> ParleyResult<Option<String>>;

    /// Set a raw JSON value that expires after `ttl`.
    async fn set(&self, key: &CacheKey, value: &str, ttl: Duration) -> ParleyResult<()>;

    /// Delete a value.
    ///
    /// Returns `true` if the key existed.
    async fn delete(&self, key: &CacheKey) -> ParleyResult<bool>;

    /// Delete every key of a paginated family.
    ///
    /// Returns the number of keys deleted.
    async fn delete_pattern(&self, pattern: &KeyPattern) -> ParleyResult<u64>;

    /// Round-trip to the tier without touching data.
    async fn ping(&self) -> ParleyResult<()>;
}
