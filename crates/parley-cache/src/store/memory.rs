//! In-process cache store.
//!
//! Used for local development and as the test double for the cache tier.
//! Besides regular TTL semantics it can simulate an outage, slow calls and
//! per-key delete failures, and it counts every call it receives.

use super::CacheStore;
use crate::keys::{CacheKey, KeyPattern};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use parley_core::{ParleyError, ParleyResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    ttl: Duration,
    inserted_at: DateTime<Utc>,
    expires_at: Instant,
}

impl CacheEntry {
    fn new(value: String, ttl: Duration) -> Self {
        Self {
            value,
            ttl,
            inserted_at: Utc::now(),
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Snapshot of the calls a store has received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationCounts {
    pub gets: u64,
    pub sets: u64,
    pub deletes: u64,
    pub pattern_deletes: u64,
    pub pings: u64,
}

impl OperationCounts {
    /// Calls that modify the tier.
    #[must_use]
    pub const fn writes(&self) -> u64 {
        self.sets + self.deletes + self.pattern_deletes
    }

    /// Every data call, pings excluded.
    #[must_use]
    pub const fn data_calls(&self) -> u64 {
        self.gets + self.writes()
    }
}

#[derive(Default)]
struct Counters {
    gets: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    pattern_deletes: AtomicU64,
    pings: AtomicU64,
}

/// In-memory cache store with TTL expiry.
pub struct InMemoryCacheStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
    reachable: AtomicBool,
    latency: RwLock<Option<Duration>>,
    failing_prefixes: RwLock<Vec<String>>,
    counters: Counters,
}

impl InMemoryCacheStore {
    /// Creates an empty, reachable store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            reachable: AtomicBool::new(true),
            latency: RwLock::new(None),
            failing_prefixes: RwLock::new(Vec::new()),
            counters: Counters::default(),
        }
    }

    /// Simulates the tier going down (`false`) or coming back (`true`).
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
        debug!("In-memory cache reachable: {}", reachable);
    }

    /// Returns `true` unless an outage is being simulated.
    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write() = latency;
    }

    /// Makes deletes of keys and patterns starting with `prefix` fail.
    pub fn fail_deletes_with_prefix(&self, prefix: impl Into<String>) {
        self.failing_prefixes.write().push(prefix.into());
    }

    /// Clears all injected delete failures.
    pub fn clear_delete_failures(&self) {
        self.failing_prefixes.write().clear();
    }

    /// Returns `true` if a live entry exists for `key`.
    pub fn contains(&self, key: &CacheKey) -> bool {
        let now = Instant::now();
        self.entries
            .read()
            .get(key.as_str())
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Returns the raw value of a live entry without counting a call.
    pub fn peek(&self, key: &CacheKey) -> Option<String> {
        let now = Instant::now();
        self.entries
            .read()
            .get(key.as_str())
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone())
    }

    /// Returns the TTL and insertion time of a live entry.
    pub fn entry_meta(&self, key: &CacheKey) -> Option<(Duration, DateTime<Utc>)> {
        let now = Instant::now();
        self.entries
            .read()
            .get(key.as_str())
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| (entry.ttl, entry.inserted_at))
    }

    /// Number of stored entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Removes expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Returns the calls received so far.
    pub fn counts(&self) -> OperationCounts {
        OperationCounts {
            gets: self.counters.gets.load(Ordering::SeqCst),
            sets: self.counters.sets.load(Ordering::SeqCst),
            deletes: self.counters.deletes.load(Ordering::SeqCst),
            pattern_deletes: self.counters.pattern_deletes.load(Ordering::SeqCst),
            pings: self.counters.pings.load(Ordering::SeqCst),
        }
    }

    async fn enter(&self, counter: &AtomicU64) -> ParleyResult<()> {
        counter.fetch_add(1, Ordering::SeqCst);

        let latency = *self.latency.read();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if self.is_reachable() {
            Ok(())
        } else {
            Err(ParleyError::cache_unavailable("in-memory cache is unreachable"))
        }
    }

    fn delete_fails(&self, target: &str) -> bool {
        self.failing_prefixes
            .read()
            .iter()
            .any(|prefix| target.starts_with(prefix.as_str()))
    }
}

impl Default for InMemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &CacheKey) -> ParleyResult<Option<String>> {
        self.enter(&self.counters.gets).await?;

        let now = Instant::now();
        let mut entries = self.entries.write();
        match entries.get(key.as_str()) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key.as_str());
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &CacheKey, value: &str, ttl: Duration) -> ParleyResult<()> {
        self.enter(&self.counters.sets).await?;

        self.entries
            .write()
            .insert(key.as_str().to_string(), CacheEntry::new(value.to_string(), ttl));
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> ParleyResult<bool> {
        self.enter(&self.counters.deletes).await?;

        if self.delete_fails(key.as_str()) {
            return Err(ParleyError::cache_unavailable(format!(
                "injected delete failure for '{}'",
                key
            )));
        }

        Ok(self.entries.write().remove(key.as_str()).is_some())
    }

    async fn delete_pattern(&self, pattern: &KeyPattern) -> ParleyResult<u64> {
        self.enter(&self.counters.pattern_deletes).await?;

        let prefix = pattern.prefix();
        if self.delete_fails(&prefix) {
            return Err(ParleyError::cache_unavailable(format!(
                "injected delete failure for '{}'",
                pattern
            )));
        }

        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(&prefix));
        Ok((before - entries.len()) as u64)
    }

    async fn ping(&self) -> ParleyResult<()> {
        self.enter(&self.counters.pings).await
    }
}
