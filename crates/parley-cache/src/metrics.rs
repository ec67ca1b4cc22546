//! Metrics for cache layer monitoring.
//!
//! Installing a recorder (Prometheus or otherwise) is up to the embedding
//! application; without one these calls are no-ops.

use crate::keys::EntityKind;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use parley_resilience::Availability;
use std::time::Duration;

/// Metric names for the cache layer.
pub mod names {
    /// Reads answered from the cache.
    pub const CACHE_HITS_TOTAL: &str = "parley_cache_hits_total";
    /// Reads that fell through to the store.
    pub const CACHE_MISSES_TOTAL: &str = "parley_cache_misses_total";
    /// Reads served straight from the store while degraded.
    pub const CACHE_BYPASSED_TOTAL: &str = "parley_cache_bypassed_total";
    /// Cache-tier errors swallowed by the gateway.
    pub const CACHE_ERRORS_TOTAL: &str = "parley_cache_errors_total";

    /// Keys removed by invalidation.
    pub const INVALIDATED_KEYS_TOTAL: &str = "parley_cache_invalidated_keys_total";
    /// Invalidation targets that could not be deleted.
    pub const INVALIDATION_FAILURES_TOTAL: &str = "parley_cache_invalidation_failures_total";
    /// Writes whose invalidation was only partially applied.
    pub const PARTIAL_INVALIDATIONS_TOTAL: &str = "parley_cache_partial_invalidations_total";
    /// Invalidation duration in seconds.
    pub const INVALIDATION_DURATION_SECONDS: &str = "parley_cache_invalidation_duration_seconds";

    /// 1 while the cache tier is available, 0 while degraded.
    pub const CACHE_AVAILABLE: &str = "parley_cache_available";
    /// Loader duration on a miss, in seconds.
    pub const LOADER_DURATION_SECONDS: &str = "parley_cache_loader_duration_seconds";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(names::CACHE_HITS_TOTAL, "Reads answered from the cache");
    describe_counter!(
        names::CACHE_MISSES_TOTAL,
        "Reads that fell through to the data store"
    );
    describe_counter!(
        names::CACHE_BYPASSED_TOTAL,
        "Reads served from the data store while the cache was degraded"
    );
    describe_counter!(
        names::CACHE_ERRORS_TOTAL,
        "Cache tier errors converted into misses or no-ops"
    );

    describe_counter!(
        names::INVALIDATED_KEYS_TOTAL,
        "Cache keys removed by write invalidation"
    );
    describe_counter!(
        names::INVALIDATION_FAILURES_TOTAL,
        "Invalidation targets that failed to delete"
    );
    describe_counter!(
        names::PARTIAL_INVALIDATIONS_TOTAL,
        "Writes whose invalidation set was only partially deleted"
    );
    describe_histogram!(
        names::INVALIDATION_DURATION_SECONDS,
        "Time spent deleting an invalidation set in seconds"
    );

    describe_gauge!(
        names::CACHE_AVAILABLE,
        "Whether the cache tier is available (1) or degraded (0)"
    );
    describe_histogram!(
        names::LOADER_DURATION_SECONDS,
        "Data store load duration on a cache miss in seconds"
    );
}

/// Cache metrics recorder.
#[derive(Clone, Copy, Debug)]
pub struct CacheMetrics;

impl CacheMetrics {
    /// Record a cache hit.
    pub fn hit(kind: EntityKind) {
        counter!(names::CACHE_HITS_TOTAL, "kind" => kind.as_str()).increment(1);
    }

    /// Record a cache miss.
    pub fn miss(kind: EntityKind) {
        counter!(names::CACHE_MISSES_TOTAL, "kind" => kind.as_str()).increment(1);
    }

    /// Record a read that bypassed the cache.
    pub fn bypassed(kind: EntityKind) {
        counter!(names::CACHE_BYPASSED_TOTAL, "kind" => kind.as_str()).increment(1);
    }

    /// Record a swallowed cache-tier error.
    pub fn error(kind: EntityKind, operation: &'static str) {
        counter!(
            names::CACHE_ERRORS_TOTAL,
            "kind" => kind.as_str(),
            "operation" => operation
        )
        .increment(1);
    }

    /// Record keys removed by invalidation.
    pub fn invalidated(kind: EntityKind, keys: u64) {
        counter!(names::INVALIDATED_KEYS_TOTAL, "kind" => kind.as_str()).increment(keys);
    }

    /// Record a failed invalidation target.
    pub fn invalidation_failed(kind: EntityKind) {
        counter!(names::INVALIDATION_FAILURES_TOTAL, "kind" => kind.as_str()).increment(1);
    }

    /// Record a partially applied invalidation.
    pub fn partial_invalidation(write_op: &'static str) {
        counter!(names::PARTIAL_INVALIDATIONS_TOTAL, "write_op" => write_op).increment(1);
    }

    /// Record how long an invalidation took.
    pub fn invalidation_duration(duration: Duration) {
        histogram!(names::INVALIDATION_DURATION_SECONDS).record(duration.as_secs_f64());
    }

    /// Record a loader run on a miss.
    pub fn loader_duration(kind: EntityKind, duration: Duration) {
        histogram!(names::LOADER_DURATION_SECONDS, "kind" => kind.as_str())
            .record(duration.as_secs_f64());
    }

    /// Update the availability gauge.
    pub fn availability(state: Availability) {
        let value = if state.is_available() { 1.0 } else { 0.0 };
        gauge!(names::CACHE_AVAILABLE).set(value);
    }
}
