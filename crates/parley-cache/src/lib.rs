//! # Parley Cache
//!
//! Consistency layer between the messaging service and its cache tier.
//!
//! Reads go through [`CacheGateway::read_through`], which consults the cache
//! and falls back to the relational store on a miss. Writes go through
//! [`CacheGateway::write_then_invalidate`], which commits to the store first
//! and then deletes every cached entry the write made stale. When the cache
//! tier is unreachable the gateway degrades to direct store access; a cache
//! outage never fails a request.

pub mod gateway;
pub mod invalidation;
pub mod keys;
pub mod metrics;
pub mod probe;
pub mod stats;
pub mod store;
pub mod ttl;

pub use gateway::{CacheGateway, GatewayOptions};
pub use invalidation::{
    InvalidationPropagator, InvalidationReport, InvalidationSet, InvalidationSink,
    InvalidationTarget, TracingInvalidationSink, UserKeys, WriteOp,
};
pub use keys::{CacheKey, EntityKind, EntityRef, KeyPattern};
pub use parley_resilience::Availability;
pub use probe::spawn_availability_probe;
pub use stats::{CacheStats, KindStats, StatsSnapshot};
pub use store::{CacheStore, InMemoryCacheStore, RedisCacheStore};
pub use ttl::TtlPolicy;
