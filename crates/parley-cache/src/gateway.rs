//! Cache gateway.
//!
//! The single entry point application code uses to read and write cached
//! entities. A gateway is cheap to clone and is passed explicitly to every
//! service that needs it.

use crate::invalidation::{
    InvalidationPropagator, InvalidationReport, InvalidationSet, InvalidationSink,
    TracingInvalidationSink, WriteOp,
};
use crate::keys::{CacheKey, EntityKind, EntityRef};
use crate::metrics::CacheMetrics;
use crate::probe::spawn_availability_probe;
use crate::stats::{CacheStats, StatsSnapshot};
use crate::store::{CacheStore, RedisCacheStore};
use crate::ttl::TtlPolicy;
use parley_config::AppConfig;
use parley_core::ParleyResult;
use parley_resilience::{
    with_named_timeout, Availability, AvailabilityConfig, AvailabilityGuard, RetryPolicy,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Name of the guarded tier in logs.
const CACHE_TIER: &str = "cache";

/// Runtime options of a gateway.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Bound on every single cache operation.
    pub operation_timeout: Duration,
    /// Availability guard settings.
    pub availability: AvailabilityConfig,
    /// Background retry of failed invalidation targets; `None` disables it.
    pub retry: Option<RetryPolicy>,
    /// Feed the `metrics` facade.
    pub emit_metrics: bool,
    /// Start degraded, e.g. when the cache tier is switched off.
    pub start_degraded: bool,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl GatewayOptions {
    /// Builds options from the application configuration.
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        let invalidation = &config.invalidation;
        let retry = invalidation.background_retry.then(|| RetryPolicy {
            max_attempts: invalidation.retry_max_attempts,
            initial_delay: invalidation.retry_initial_delay(),
            max_delay: invalidation.retry_max_delay(),
            ..Default::default()
        });

        Self {
            operation_timeout: config.redis.operation_timeout(),
            availability: AvailabilityConfig {
                failure_threshold: config.availability.failure_threshold,
                probe_interval: config.availability.probe_interval(),
                probe_timeout: config.availability.probe_timeout(),
            },
            retry,
            emit_metrics: config.observability.metrics_enabled,
            start_degraded: !config.redis.enabled,
        }
    }
}

/// Read-through and write-invalidate access to the cache tier.
#[derive(Clone)]
pub struct CacheGateway {
    store: Arc<dyn CacheStore>,
    ttl: Arc<TtlPolicy>,
    guard: Arc<AvailabilityGuard>,
    stats: Arc<CacheStats>,
    propagator: Arc<InvalidationPropagator>,
    sink: Arc<dyn InvalidationSink>,
    operation_timeout: Duration,
    emit_metrics: bool,
}

impl CacheGateway {
    /// Creates a gateway over `store`.
    pub fn new(store: Arc<dyn CacheStore>, ttl: TtlPolicy, options: GatewayOptions) -> Self {
        let guard = if options.start_degraded {
            AvailabilityGuard::degraded(CACHE_TIER, options.availability.clone())
        } else {
            AvailabilityGuard::new(CACHE_TIER, options.availability.clone())
        };
        let guard = Arc::new(guard);
        let stats = Arc::new(CacheStats::new(options.emit_metrics));
        let propagator = Arc::new(InvalidationPropagator::new(
            Arc::clone(&store),
            Arc::clone(&guard),
            Arc::clone(&stats),
            options.operation_timeout,
            options.retry.clone(),
        ));

        Self {
            store,
            ttl: Arc::new(ttl),
            guard,
            stats,
            propagator,
            sink: Arc::new(TracingInvalidationSink),
            operation_timeout: options.operation_timeout,
            emit_metrics: options.emit_metrics,
        }
    }

    /// Creates a gateway over `store` configured from `config`.
    pub fn from_config(store: Arc<dyn CacheStore>, config: &AppConfig) -> Self {
        Self::new(
            store,
            TtlPolicy::from_config(&config.cache.ttl),
            GatewayOptions::from_config(config),
        )
    }

    /// Creates a Redis-backed gateway and starts its availability probe.
    ///
    /// An unreachable Redis is not an error: the gateway starts degraded and
    /// the returned probe task restores it once Redis answers. Abort the
    /// handle on shutdown.
    pub async fn connect(config: &AppConfig) -> ParleyResult<(Self, Option<JoinHandle<()>>)> {
        let store = RedisCacheStore::from_config(&config.redis)?;
        Ok(Self::start(Arc::new(store), config).await)
    }

    /// Creates a gateway over `store`, probes it once and spawns the
    /// background probe. No probe runs while the tier is disabled.
    pub async fn start(
        store: Arc<dyn CacheStore>,
        config: &AppConfig,
    ) -> (Self, Option<JoinHandle<()>>) {
        let gateway = Self::from_config(store, config);

        if !config.redis.enabled {
            info!("Cache tier disabled, all reads go to the data store");
            return (gateway, None);
        }

        let state = gateway.probe().await;
        info!("Cache gateway connected, tier is {}", state);
        let probe =
            spawn_availability_probe(gateway.clone(), config.availability.probe_interval());
        (gateway, Some(probe))
    }

    /// Replaces the sink that receives invalidation failures.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn InvalidationSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Returns the cached value of `entity`, loading and caching it on a miss.
    ///
    /// Loader errors are returned unchanged and nothing is cached. Cache-tier
    /// failures never surface; they count as misses.
    ///
    /// # Errors
    ///
    /// `InvalidKeyField` if `entity` cannot be encoded, otherwise whatever the
    /// loader returns.
    pub async fn read_through<T, F, Fut>(
        &self,
        entity: &EntityRef,
        ttl_override: Option<Duration>,
        loader: F,
    ) -> ParleyResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = ParleyResult<T>>,
    {
        let key = entity.encode()?;
        let kind = entity.kind();

        if !self.guard.is_available() {
            self.stats.record_bypass(kind);
            return loader().await;
        }

        if let Some(value) = self.lookup::<T>(kind, &key).await {
            self.stats.record_hit(kind);
            return Ok(value);
        }
        self.stats.record_miss(kind);

        let value = self.timed_load(kind, loader).await?;
        self.write_entry(entity, &key, &value, ttl_override).await;
        Ok(value)
    }

    /// Like [`CacheGateway::read_through`] for loaders that may find nothing.
    ///
    /// `None` is returned to the caller but never cached.
    pub async fn read_through_optional<T, F, Fut>(
        &self,
        entity: &EntityRef,
        ttl_override: Option<Duration>,
        loader: F,
    ) -> ParleyResult<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = ParleyResult<Option<T>>>,
    {
        let key = entity.encode()?;
        let kind = entity.kind();

        if !self.guard.is_available() {
            self.stats.record_bypass(kind);
            return loader().await;
        }

        if let Some(value) = self.lookup::<T>(kind, &key).await {
            self.stats.record_hit(kind);
            return Ok(Some(value));
        }
        self.stats.record_miss(kind);

        let value = self.timed_load(kind, loader).await?;
        if let Some(found) = &value {
            self.write_entry(entity, &key, found, ttl_override).await;
        }
        Ok(value)
    }

    /// Commits a write, then deletes every entry it made stale.
    ///
    /// `invalidation_set` runs only after `mutate` succeeded. Once the commit
    /// has happened the write is reported successful no matter what the
    /// cache tier does; invalidation failures go to the sink and are retried
    /// in the background.
    ///
    /// # Errors
    ///
    /// Whatever `mutate` returns.
    pub async fn write_then_invalidate<R, M, Fut, S>(
        &self,
        mutate: M,
        invalidation_set: S,
    ) -> ParleyResult<R>
    where
        M: FnOnce() -> Fut,
        Fut: Future<Output = ParleyResult<R>>,
        S: FnOnce(&R) -> ParleyResult<InvalidationSet>,
    {
        let result = mutate().await?;

        if !self.guard.is_available() {
            debug!("Cache degraded, skipping invalidation after write");
            return Ok(result);
        }

        match invalidation_set(&result) {
            Ok(set) => {
                self.apply(write_label(None), &set).await;
            }
            Err(e) => self.sink.on_plan_failure(&e),
        }

        Ok(result)
    }

    /// [`CacheGateway::write_then_invalidate`] for writes described by a
    /// [`WriteOp`].
    pub async fn write_then_invalidate_op<R, M, Fut, D>(
        &self,
        mutate: M,
        describe: D,
    ) -> ParleyResult<R>
    where
        M: FnOnce() -> Fut,
        Fut: Future<Output = ParleyResult<R>>,
        D: FnOnce(&R) -> WriteOp,
    {
        let result = mutate().await?;

        if !self.guard.is_available() {
            debug!("Cache degraded, skipping invalidation after write");
            return Ok(result);
        }

        let op = describe(&result);
        match InvalidationPropagator::plan(&op) {
            Ok(set) => {
                self.apply(write_label(Some(&op)), &set).await;
            }
            Err(e) => self.sink.on_plan_failure(&e),
        }

        Ok(result)
    }

    /// Deletes the entries made stale by `op`, for writes committed outside
    /// the gateway.
    ///
    /// # Errors
    ///
    /// `InvalidKeyField` if the set cannot be computed.
    pub async fn invalidate(&self, op: &WriteOp) -> ParleyResult<InvalidationReport> {
        let set = InvalidationPropagator::plan(op)?;
        Ok(self.apply(write_label(Some(op)), &set).await)
    }

    /// Writes a freshly created value so the next read hits.
    ///
    /// Cache-tier failures are ignored.
    ///
    /// # Errors
    ///
    /// `InvalidKeyField` if `entity` cannot be encoded.
    pub async fn prime<T: Serialize>(
        &self,
        entity: &EntityRef,
        value: &T,
        ttl_override: Option<Duration>,
    ) -> ParleyResult<()> {
        let key = entity.encode()?;
        self.write_entry(entity, &key, value, ttl_override).await;
        Ok(())
    }

    /// Pings the cache tier once and updates availability.
    pub async fn probe(&self) -> Availability {
        let store = self.store.as_ref();
        let state = self.guard.probe(|| store.ping()).await;
        if self.emit_metrics {
            CacheMetrics::availability(state);
        }
        state
    }

    /// Current availability of the cache tier.
    pub fn availability(&self) -> Availability {
        self.guard.state()
    }

    /// Point-in-time hit/miss statistics.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Longest time an entry of `kind` can be served after the write that
    /// made it stale.
    pub fn staleness_bound(&self, kind: EntityKind) -> Duration {
        self.ttl.ttl_for(kind) + self.operation_timeout
    }

    pub fn ttl_policy(&self) -> &TtlPolicy {
        &self.ttl
    }

    pub fn guard(&self) -> &Arc<AvailabilityGuard> {
        &self.guard
    }

    pub fn propagator(&self) -> &InvalidationPropagator {
        &self.propagator
    }

    async fn lookup<T: DeserializeOwned>(&self, kind: EntityKind, key: &CacheKey) -> Option<T> {
        let store = self.store.as_ref();
        let outcome = self
            .guard
            .call(|| with_named_timeout("cache get", self.operation_timeout, || store.get(key)))
            .await;

        match outcome {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    debug!("Cache hit for key '{}'", key);
                    Some(value)
                }
                Err(e) => {
                    warn!("Discarding undecodable cache entry '{}': {}", key, e);
                    self.stats.record_error(kind, "decode");
                    None
                }
            },
            Ok(None) => {
                debug!("Cache miss for key '{}'", key);
                None
            }
            Err(e) => {
                debug!("Cache read for '{}' failed, treating as miss: {}", key, e);
                self.stats.record_error(kind, "get");
                None
            }
        }
    }

    async fn timed_load<T, F, Fut>(&self, kind: EntityKind, loader: F) -> ParleyResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ParleyResult<T>>,
    {
        let started = Instant::now();
        let value = loader().await;
        if self.emit_metrics {
            CacheMetrics::loader_duration(kind, started.elapsed());
        }
        value
    }

    async fn write_entry<T: Serialize>(
        &self,
        entity: &EntityRef,
        key: &CacheKey,
        value: &T,
        ttl_override: Option<Duration>,
    ) {
        let kind = entity.kind();
        let ttl = self.ttl.resolve(entity, ttl_override);
        if ttl.is_zero() || !self.guard.is_available() {
            return;
        }

        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to serialize value for '{}': {}", key, e);
                self.stats.record_error(kind, "encode");
                return;
            }
        };

        let store = self.store.as_ref();
        let raw = raw.as_str();
        let outcome = self
            .guard
            .call(|| {
                with_named_timeout("cache set", self.operation_timeout, || {
                    store.set(key, raw, ttl)
                })
            })
            .await;

        if let Err(e) = outcome {
            debug!("Cache write for '{}' failed, ignoring: {}", key, e);
            self.stats.record_error(kind, "set");
        }
    }

    async fn apply(&self, write_op: &'static str, set: &InvalidationSet) -> InvalidationReport {
        let report = self.propagator.propagate(set).await;

        if let Some(error) = report.to_error() {
            self.stats.record_partial_invalidation(write_op);
            self.sink.on_partial_invalidation(write_op, &error, &report);
            self.propagator.retry_in_background(report.failed_targets());
        }

        report
    }
}

impl std::fmt::Debug for CacheGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheGateway")
            .field("availability", &self.availability())
            .field("ttl", &self.ttl)
            .field("operation_timeout", &self.operation_timeout)
            .finish_non_exhaustive()
    }
}

fn write_label(op: Option<&WriteOp>) -> &'static str {
    op.map_or("write", WriteOp::name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invalidation::UserKeys;
    use crate::keys::KeyPattern;
    use crate::store::{InMemoryCacheStore, MockCacheStore};
    use parking_lot::Mutex;
    use parley_core::{ParleyError, UserId};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn options() -> GatewayOptions {
        GatewayOptions {
            operation_timeout: Duration::from_millis(100),
            availability: AvailabilityConfig {
                failure_threshold: 3,
                ..Default::default()
            },
            retry: None,
            emit_metrics: false,
            start_degraded: false,
        }
    }

    fn gateway(store: MockCacheStore) -> CacheGateway {
        CacheGateway::new(Arc::new(store), TtlPolicy::default(), options())
    }

    fn unavailable() -> ParleyError {
        ParleyError::cache_unavailable("connection refused")
    }

    #[derive(Default)]
    struct RecordingSink {
        partial: Mutex<Vec<(String, usize)>>,
        plan_failures: AtomicU32,
    }

    impl InvalidationSink for RecordingSink {
        fn on_partial_invalidation(
            &self,
            write_op: &str,
            _error: &ParleyError,
            report: &InvalidationReport,
        ) {
            self.partial
                .lock()
                .push((write_op.to_string(), report.failed.len()));
        }

        fn on_plan_failure(&self, _error: &ParleyError) {
            self.plan_failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_hit_skips_loader() {
        let mut store = MockCacheStore::new();
        store
            .expect_get()
            .withf(|key| key.as_str() == "unread_count:9")
            .times(1)
            .returning(|_| Ok(Some("4".to_string())));
        store.expect_set().never();

        let gateway = gateway(store);
        let count: u64 = gateway
            .read_through(&EntityRef::unread_count(UserId::new(9)), None, || async {
                Err(ParleyError::internal("loader ran on a hit"))
            })
            .await
            .unwrap();

        assert_eq!(count, 4);
        assert_eq!(gateway.stats().kind(EntityKind::UnreadCount).hits, 1);
    }

    #[tokio::test]
    async fn test_miss_loads_and_writes_with_policy_ttl() {
        let mut store = MockCacheStore::new();
        store.expect_get().times(1).returning(|_| Ok(None));
        store
            .expect_set()
            .withf(|key, value, ttl| {
                key.as_str() == "unread_count:9" && value == "7" && *ttl == Duration::from_secs(60)
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let gateway = gateway(store);
        let count: u64 = gateway
            .read_through(&EntityRef::unread_count(UserId::new(9)), None, || async {
                Ok(7)
            })
            .await
            .unwrap();

        assert_eq!(count, 7);
        assert_eq!(gateway.stats().kind(EntityKind::UnreadCount).misses, 1);
    }

    #[tokio::test]
    async fn test_ttl_override_is_used() {
        let mut store = MockCacheStore::new();
        store.expect_get().returning(|_| Ok(None));
        store
            .expect_set()
            .withf(|_, _, ttl| *ttl == Duration::from_secs(5))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let gateway = gateway(store);
        let _: u64 = gateway
            .read_through(
                &EntityRef::unread_count(UserId::new(1)),
                Some(Duration::from_secs(5)),
                || async { Ok(1) },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_loader_error_is_returned_and_not_cached() {
        let mut store = MockCacheStore::new();
        store.expect_get().returning(|_| Ok(None));
        store.expect_set().never();

        let gateway = gateway(store);
        let result: ParleyResult<u64> = gateway
            .read_through(&EntityRef::unread_count(UserId::new(1)), None, || async {
                Err(ParleyError::store("shard 3 unreachable"))
            })
            .await;

        assert!(matches!(result, Err(ParleyError::Store(msg)) if msg == "shard 3 unreachable"));
    }

    #[tokio::test]
    async fn test_cache_error_is_a_miss() {
        let mut store = MockCacheStore::new();
        store.expect_get().times(1).returning(|_| Err(unavailable()));
        store.expect_set().times(1).returning(|_, _, _| Err(unavailable()));

        let gateway = gateway(store);
        let count: u64 = gateway
            .read_through(&EntityRef::unread_count(UserId::new(1)), None, || async {
                Ok(2)
            })
            .await
            .unwrap();

        assert_eq!(count, 2);
        let stats = gateway.stats().kind(EntityKind::UnreadCount);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.errors, 2);
        assert_eq!(gateway.availability(), Availability::Available);
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_replaced() {
        let mut store = MockCacheStore::new();
        store
            .expect_get()
            .returning(|_| Ok(Some("not json".to_string())));
        store
            .expect_set()
            .withf(|_, value, _| value == "11")
            .times(1)
            .returning(|_, _, _| Ok(()));

        let gateway = gateway(store);
        let count: u64 = gateway
            .read_through(&EntityRef::unread_count(UserId::new(1)), None, || async {
                Ok(11)
            })
            .await
            .unwrap();
        assert_eq!(count, 11);
    }

    #[tokio::test]
    async fn test_invalid_key_fails_before_any_call() {
        let mut store = MockCacheStore::new();
        store.expect_get().never();

        let gateway = gateway(store);
        let loads = AtomicU32::new(0);
        let counter = &loads;
        let result: ParleyResult<u64> = gateway
            .read_through(&EntityRef::user_by_username("a:b"), None, || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            })
            .await;

        assert!(matches!(result, Err(ParleyError::InvalidKeyField { .. })));
        assert_eq!(loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_optional_none_is_not_cached() {
        let mut store = MockCacheStore::new();
        store.expect_get().times(1).returning(|_| Ok(None));
        store.expect_set().never();

        let gateway = gateway(store);
        let found: Option<u64> = gateway
            .read_through_optional(&EntityRef::user_by_email("ghost@x.io"), None, || async {
                Ok(None)
            })
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_repeated_failures_degrade_then_bypass() {
        let mut store = MockCacheStore::new();
        // Threshold 3: failed get, failed set, failed get.
        store.expect_get().times(2).returning(|_| Err(unavailable()));
        store.expect_set().times(1).returning(|_, _, _| Err(unavailable()));
        store.expect_delete().never();
        store.expect_delete_pattern().never();

        let gateway = gateway(store);
        let entity = EntityRef::unread_count(UserId::new(1));

        for _ in 0..4 {
            let count: u64 = gateway
                .read_through(&entity, None, || async { Ok(3) })
                .await
                .unwrap();
            assert_eq!(count, 3);
        }

        assert_eq!(gateway.availability(), Availability::Degraded);
        let stats = gateway.stats().kind(EntityKind::UnreadCount);
        assert_eq!(stats.bypassed, 2);

        let written = gateway
            .write_then_invalidate_op(
                || async { Ok(42_i64) },
                |_| WriteOp::PresenceChanged {
                    user_id: UserId::new(1),
                    keys: UserKeys::new("alice", "alice@example.com"),
                },
            )
            .await
            .unwrap();
        assert_eq!(written, 42);
    }

    #[tokio::test]
    async fn test_degraded_gateway_makes_no_cache_calls() {
        let mut store = MockCacheStore::new();
        store.expect_get().never();
        store.expect_set().never();
        store.expect_delete().never();
        store.expect_delete_pattern().never();

        let gateway = CacheGateway::new(
            Arc::new(store),
            TtlPolicy::default(),
            GatewayOptions {
                start_degraded: true,
                ..options()
            },
        );

        let name: String = gateway
            .read_through(&EntityRef::user_profile(UserId::new(1)), None, || async {
                Ok("alice".to_string())
            })
            .await
            .unwrap();
        assert_eq!(name, "alice");

        gateway
            .prime(&EntityRef::user_profile(UserId::new(1)), &"alice", None)
            .await
            .unwrap();

        let report = gateway
            .invalidate(&WriteOp::PresenceChanged {
                user_id: UserId::new(1),
                keys: UserKeys::new("alice", "alice@example.com"),
            })
            .await
            .unwrap();
        assert!(report.skipped);
    }

    #[tokio::test]
    async fn test_probe_recovers() {
        let mut store = MockCacheStore::new();
        store.expect_ping().times(1).returning(|| Ok(()));

        let gateway = CacheGateway::new(
            Arc::new(store),
            TtlPolicy::default(),
            GatewayOptions {
                start_degraded: true,
                ..options()
            },
        );
        assert_eq!(gateway.availability(), Availability::Degraded);
        assert_eq!(gateway.probe().await, Availability::Available);
    }

    #[tokio::test]
    async fn test_store_error_skips_invalidation() {
        let mut store = MockCacheStore::new();
        store.expect_delete().never();
        store.expect_delete_pattern().never();

        let gateway = gateway(store);
        let planned = AtomicU32::new(0);
        let result: ParleyResult<()> = gateway
            .write_then_invalidate(
                || async { Err(ParleyError::store("constraint violation")) },
                |_| {
                    planned.fetch_add(1, Ordering::SeqCst);
                    Ok(InvalidationSet::new())
                },
            )
            .await;

        assert!(matches!(result, Err(ParleyError::Store(_))));
        assert_eq!(planned.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_partial_invalidation_reaches_sink() {
        let mut store = MockCacheStore::new();
        store.expect_delete().returning(|key| {
            if key.as_str().starts_with("unread_count:") {
                Err(ParleyError::cache_unavailable("reset by peer"))
            } else {
                Ok(true)
            }
        });
        store.expect_delete_pattern().returning(|_| Ok(2));

        let sink = Arc::new(RecordingSink::default());
        let gateway = gateway(store).with_sink(sink.clone());

        let id = gateway
            .write_then_invalidate_op(
                || async { Ok(100_i64) },
                |id| WriteOp::MessageSent {
                    message_id: parley_core::MessageId::new(*id),
                    sender_id: UserId::new(5),
                    recipient_id: UserId::new(9),
                },
            )
            .await
            .unwrap();

        assert_eq!(id, 100);
        assert_eq!(sink.partial.lock().as_slice(), &[("message_sent".to_string(), 1)]);
        assert_eq!(gateway.stats().partial_invalidations, 1);
    }

    #[tokio::test]
    async fn test_plan_failure_still_reports_success() {
        let store = MockCacheStore::new();
        let sink = Arc::new(RecordingSink::default());
        let gateway = gateway(store).with_sink(sink.clone());

        let result = gateway
            .write_then_invalidate_op(
                || async { Ok(()) },
                |_| WriteOp::UserCreated {
                    user_id: UserId::new(1),
                    keys: UserKeys::new("bad:name", "bad@x.io"),
                },
            )
            .await;

        assert!(result.is_ok());
        assert_eq!(sink.plan_failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_explicit_set_is_deleted() {
        let mut store = MockCacheStore::new();
        store
            .expect_delete()
            .withf(|key| key.as_str() == "user_profile:3")
            .times(1)
            .returning(|_| Ok(true));
        store
            .expect_delete_pattern()
            .withf(|pattern| *pattern == KeyPattern::RecentMessages { user_id: UserId::new(3) })
            .times(1)
            .returning(|_| Ok(1));

        let gateway = gateway(store);
        gateway
            .write_then_invalidate(
                || async { Ok(UserId::new(3)) },
                |id| {
                    Ok(InvalidationSet::new()
                        .with_ref(&EntityRef::user_profile(*id))?
                        .with_pattern(KeyPattern::RecentMessages { user_id: *id }))
                },
            )
            .await
            .unwrap();

        let stats = gateway.stats();
        assert_eq!(stats.kind(EntityKind::UserProfile).invalidated_keys, 1);
        assert_eq!(stats.kind(EntityKind::RecentMessages).invalidated_keys, 1);
    }

    #[test]
    fn test_options_from_config() {
        let mut config = AppConfig::default();
        config.redis.enabled = false;
        config.invalidation.background_retry = false;

        let options = GatewayOptions::from_config(&config);
        assert!(options.start_degraded);
        assert!(options.retry.is_none());
        assert_eq!(options.operation_timeout, Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_spawns_probe_that_recovers_tier() {
        let store = Arc::new(InMemoryCacheStore::new());
        store.set_reachable(false);
        let mut config = AppConfig::default();
        config.observability.metrics_enabled = false;

        let (gateway, probe) = CacheGateway::start(store.clone(), &config).await;
        assert_eq!(gateway.availability(), Availability::Degraded);
        let probe = probe.unwrap();

        store.set_reachable(true);
        tokio::time::sleep(config.availability.probe_interval() * 2).await;
        assert_eq!(gateway.availability(), Availability::Available);

        probe.abort();
    }

    #[tokio::test]
    async fn test_start_without_tier_spawns_nothing() {
        let store = Arc::new(InMemoryCacheStore::new());
        let mut config = AppConfig::default();
        config.redis.enabled = false;
        config.observability.metrics_enabled = false;

        let (gateway, probe) = CacheGateway::start(store.clone(), &config).await;
        assert!(probe.is_none());
        assert_eq!(gateway.availability(), Availability::Degraded);
        assert_eq!(store.counts().pings, 0);
    }

    #[test]
    fn test_staleness_bound() {
        let gateway = gateway(MockCacheStore::new());
        assert_eq!(
            gateway.staleness_bound(EntityKind::Message),
            Duration::from_secs(300) + Duration::from_millis(100)
        );
    }
}
