//! Hit/miss statistics per entity kind.

use crate::keys::EntityKind;
use crate::metrics::CacheMetrics;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Default)]
struct KindCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    bypassed: AtomicU64,
    errors: AtomicU64,
    invalidated_keys: AtomicU64,
    failed_invalidations: AtomicU64,
}

impl KindCounters {
    fn snapshot(&self) -> KindStats {
        KindStats::new(
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.bypassed.load(Ordering::Relaxed),
            self.errors.load(Ordering::Relaxed),
            self.invalidated_keys.load(Ordering::Relaxed),
            self.failed_invalidations.load(Ordering::Relaxed),
        )
    }
}

/// Live counters shared by the gateway and the propagator.
///
/// Every record call also feeds the `metrics` facade when enabled.
pub struct CacheStats {
    per_kind: [KindCounters; EntityKind::COUNT],
    partial_invalidations: AtomicU64,
    emit_metrics: bool,
}

impl CacheStats {
    #[must_use]
    pub fn new(emit_metrics: bool) -> Self {
        Self {
            per_kind: Default::default(),
            partial_invalidations: AtomicU64::new(0),
            emit_metrics,
        }
    }

    fn counters(&self, kind: EntityKind) -> &KindCounters {
        &self.per_kind[kind.index()]
    }

    pub fn record_hit(&self, kind: EntityKind) {
        self.counters(kind).hits.fetch_add(1, Ordering::Relaxed);
        if self.emit_metrics {
            CacheMetrics::hit(kind);
        }
    }

    pub fn record_miss(&self, kind: EntityKind) {
        self.counters(kind).misses.fetch_add(1, Ordering::Relaxed);
        if self.emit_metrics {
            CacheMetrics::miss(kind);
        }
    }

    pub fn record_bypass(&self, kind: EntityKind) {
        self.counters(kind).bypassed.fetch_add(1, Ordering::Relaxed);
        if self.emit_metrics {
            CacheMetrics::bypassed(kind);
        }
    }

    pub fn record_error(&self, kind: EntityKind, operation: &'static str) {
        self.counters(kind).errors.fetch_add(1, Ordering::Relaxed);
        if self.emit_metrics {
            CacheMetrics::error(kind, operation);
        }
    }

    pub fn record_invalidated(&self, kind: EntityKind, keys: u64) {
        self.counters(kind)
            .invalidated_keys
            .fetch_add(keys, Ordering::Relaxed);
        if self.emit_metrics {
            CacheMetrics::invalidated(kind, keys);
        }
    }

    pub fn record_failed_invalidation(&self, kind: EntityKind) {
        self.counters(kind)
            .failed_invalidations
            .fetch_add(1, Ordering::Relaxed);
        if self.emit_metrics {
            CacheMetrics::invalidation_failed(kind);
        }
    }

    pub fn record_partial_invalidation(&self, write_op: &'static str) {
        self.partial_invalidations.fetch_add(1, Ordering::Relaxed);
        if self.emit_metrics {
            CacheMetrics::partial_invalidation(write_op);
        }
    }

    pub fn record_invalidation_duration(&self, duration: Duration) {
        if self.emit_metrics {
            CacheMetrics::invalidation_duration(duration);
        }
    }

    /// Returns a point-in-time copy of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        let mut per_kind = BTreeMap::new();
        let mut total = KindStats::default();

        for kind in EntityKind::ALL {
            let stats = self.counters(kind).snapshot();
            total = total.merge(&stats);
            per_kind.insert(kind.as_str().to_string(), stats);
        }

        StatsSnapshot {
            total,
            per_kind,
            partial_invalidations: self.partial_invalidations.load(Ordering::Relaxed),
        }
    }
}

impl Default for CacheStats {
    fn default() -> Self {
        Self::new(true)
    }
}

impl std::fmt::Debug for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStats")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

/// Counters of one entity kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KindStats {
    pub hits: u64,
    pub misses: u64,
    /// Reads served from the store while the cache was degraded.
    pub bypassed: u64,
    /// Cache-tier errors turned into misses or no-ops.
    pub errors: u64,
    pub invalidated_keys: u64,
    /// Invalidation targets that failed to delete.
    pub failed_invalidations: u64,
    /// `hits / (hits + misses)`, 0.0 before any lookup.
    pub hit_ratio: f64,
}

impl KindStats {
    fn new(
        hits: u64,
        misses: u64,
        bypassed: u64,
        errors: u64,
        invalidated_keys: u64,
        failed_invalidations: u64,
    ) -> Self {
        Self {
            hits,
            misses,
            bypassed,
            errors,
            invalidated_keys,
            failed_invalidations,
            hit_ratio: hit_ratio(hits, misses),
        }
    }

    fn merge(&self, other: &Self) -> Self {
        Self::new(
            self.hits + other.hits,
            self.misses + other.misses,
            self.bypassed + other.bypassed,
            self.errors + other.errors,
            self.invalidated_keys + other.invalidated_keys,
            self.failed_invalidations + other.failed_invalidations,
        )
    }

    /// Lookups that reached the cache.
    #[must_use]
    pub const fn lookups(&self) -> u64 {
        self.hits + self.misses
    }
}

/// Stats surface of the cache layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub total: KindStats,
    /// Keyed by [`EntityKind::as_str`].
    pub per_kind: BTreeMap<String, KindStats>,
    /// Writes whose invalidation was only partially applied.
    pub partial_invalidations: u64,
}

impl StatsSnapshot {
    /// Stats of one kind.
    #[must_use]
    pub fn kind(&self, kind: EntityKind) -> KindStats {
        self.per_kind.get(kind.as_str()).cloned().unwrap_or_default()
    }
}

#[allow(clippy::cast_precision_loss)]
fn hit_ratio(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics::{
        Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit,
    };

    #[test]
    fn test_empty_snapshot() {
        let stats = CacheStats::new(false);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total.lookups(), 0);
        assert!((snapshot.total.hit_ratio - 0.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.per_kind.len(), EntityKind::COUNT);
    }

    #[test]
    fn test_hit_ratio_per_kind() {
        let stats = CacheStats::new(false);
        stats.record_hit(EntityKind::Message);
        stats.record_hit(EntityKind::Message);
        stats.record_hit(EntityKind::Message);
        stats.record_miss(EntityKind::Message);
        stats.record_miss(EntityKind::UnreadCount);

        let snapshot = stats.snapshot();
        let message = snapshot.kind(EntityKind::Message);
        assert_eq!(message.hits, 3);
        assert!((message.hit_ratio - 0.75).abs() < f64::EPSILON);
        assert!((snapshot.kind(EntityKind::UnreadCount).hit_ratio - 0.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.total.lookups(), 5);
        assert!((snapshot.total.hit_ratio - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_bypass_is_not_a_lookup() {
        let stats = CacheStats::new(false);
        stats.record_bypass(EntityKind::UserProfile);
        stats.record_error(EntityKind::UserProfile, "get");

        let profile = stats.snapshot().kind(EntityKind::UserProfile);
        assert_eq!(profile.bypassed, 1);
        assert_eq!(profile.errors, 1);
        assert_eq!(profile.lookups(), 0);
    }

    #[test]
    fn test_invalidation_counters() {
        let stats = CacheStats::new(true);
        stats.record_invalidated(EntityKind::ConversationPage, 4);
        stats.record_failed_invalidation(EntityKind::UnreadCount);
        stats.record_partial_invalidation("message_sent");

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total.invalidated_keys, 4);
        assert_eq!(snapshot.total.failed_invalidations, 1);
        assert_eq!(snapshot.partial_invalidations, 1);
    }

    #[derive(Default)]
    struct CountingRecorder {
        histograms: std::sync::atomic::AtomicUsize,
    }

    impl Recorder for CountingRecorder {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, _: &Key, _: &Metadata<'_>) -> Counter {
            Counter::noop()
        }

        fn register_gauge(&self, _: &Key, _: &Metadata<'_>) -> Gauge {
            Gauge::noop()
        }

        fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
            self.histograms.fetch_add(1, Ordering::SeqCst);
            Histogram::noop()
        }
    }

    #[test]
    fn test_invalidation_duration_respects_emit_flag() {
        let recorder = CountingRecorder::default();
        metrics::with_local_recorder(&recorder, || {
            CacheStats::new(false).record_invalidation_duration(Duration::from_millis(3));
        });
        assert_eq!(recorder.histograms.load(Ordering::SeqCst), 0);

        metrics::with_local_recorder(&recorder, || {
            CacheStats::new(true).record_invalidation_duration(Duration::from_millis(3));
        });
        assert_eq!(recorder.histograms.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let stats = CacheStats::new(false);
        stats.record_hit(EntityKind::OnlineUsers);
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["per_kind"]["online_users"]["hits"], 1);
    }
}
