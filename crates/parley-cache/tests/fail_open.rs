//! Behavior while the cache tier is down or slow.

use parley_cache::{
    Availability, CacheGateway, CacheStore, EntityKind, EntityRef, GatewayOptions,
    InMemoryCacheStore, TtlPolicy, WriteOp,
};
use parley_core::{MessageId, ParleyError, ParleyResult, UserId};
use parley_resilience::AvailabilityConfig;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn gateway(cache: Arc<InMemoryCacheStore>, failure_threshold: u64) -> CacheGateway {
    CacheGateway::new(
        cache,
        TtlPolicy::default(),
        GatewayOptions {
            operation_timeout: Duration::from_millis(50),
            availability: AvailabilityConfig {
                failure_threshold,
                ..Default::default()
            },
            retry: None,
            emit_metrics: false,
            start_degraded: false,
        },
    )
}

#[tokio::test]
async fn test_unreachable_cache_serves_from_store() {
    let cache = Arc::new(InMemoryCacheStore::new());
    cache.set_reachable(false);
    let gateway = gateway(cache.clone(), 2);

    let loads = AtomicU32::new(0);
    let counter = &loads;
    for _ in 0..5 {
        let name: String = gateway
            .read_through(&EntityRef::user_profile(UserId::new(1)), None, || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok("alice".to_string())
            })
            .await
            .unwrap();
        assert_eq!(name, "alice");
    }

    assert_eq!(loads.load(Ordering::SeqCst), 5);
    assert_eq!(gateway.availability(), Availability::Degraded);

    // Once degraded nothing reaches the cache tier, writes included.
    let before = cache.counts();
    gateway
        .write_then_invalidate_op(
            || async { Ok(MessageId::new(7)) },
            |id| WriteOp::MessageSent {
                message_id: *id,
                sender_id: UserId::new(1),
                recipient_id: UserId::new(2),
            },
        )
        .await
        .unwrap();
    let _: String = gateway
        .read_through(&EntityRef::user_profile(UserId::new(1)), None, || async {
            Ok("alice".to_string())
        })
        .await
        .unwrap();
    assert_eq!(cache.counts().data_calls(), before.data_calls());

    let stats = gateway.stats().kind(EntityKind::UserProfile);
    assert!(stats.bypassed >= 1);
}

#[tokio::test]
async fn test_store_errors_still_surface_while_degraded() {
    let cache = Arc::new(InMemoryCacheStore::new());
    cache.set_reachable(false);
    let gateway = gateway(cache, 1);

    let _ = gateway
        .read_through(&EntityRef::OnlineUsers, None, || async { Ok(Vec::<i64>::new()) })
        .await;
    assert_eq!(gateway.availability(), Availability::Degraded);

    let result: ParleyResult<Vec<i64>> = gateway
        .read_through(&EntityRef::OnlineUsers, None, || async {
            Err(ParleyError::store("replica lag"))
        })
        .await;
    assert!(matches!(result, Err(ParleyError::Store(_))));
}

#[tokio::test]
async fn test_recovery_after_probe() {
    let cache = Arc::new(InMemoryCacheStore::new());
    cache.set_reachable(false);
    let gateway = gateway(cache.clone(), 1);
    let entity = EntityRef::unread_count(UserId::new(3));

    let _: u64 = gateway
        .read_through(&entity, None, || async { Ok(1) })
        .await
        .unwrap();
    assert_eq!(gateway.availability(), Availability::Degraded);

    cache.set_reachable(true);
    assert_eq!(gateway.availability(), Availability::Degraded);
    assert_eq!(gateway.probe().await, Availability::Available);

    let _: u64 = gateway
        .read_through(&entity, None, || async { Ok(2) })
        .await
        .unwrap();
    assert!(cache.contains(&entity.encode().unwrap()));
}

#[tokio::test(start_paused = true)]
async fn test_slow_cache_times_out_into_a_miss() {
    let cache = Arc::new(InMemoryCacheStore::new());
    let key = EntityRef::message(MessageId::new(1)).encode().unwrap();
    cache.set(&key, "\"cached\"", Duration::from_secs(300)).await.unwrap();
    cache.set_latency(Some(Duration::from_secs(1)));

    let gateway = gateway(cache.clone(), 10);
    let value: String = gateway
        .read_through(&EntityRef::message(MessageId::new(1)), None, || async {
            Ok("from store".to_string())
        })
        .await
        .unwrap();

    assert_eq!(value, "from store");
    let stats = gateway.stats().kind(EntityKind::Message);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.errors, 2);
    assert_eq!(gateway.availability(), Availability::Available);
}

#[tokio::test]
async fn test_write_succeeds_when_invalidation_fails() {
    let cache = Arc::new(InMemoryCacheStore::new());
    cache.fail_deletes_with_prefix("conversation:");
    let gateway = gateway(cache, 10);

    let id = gateway
        .write_then_invalidate_op(
            || async { Ok(MessageId::new(11)) },
            |id| WriteOp::MessageRead {
                message_id: *id,
                sender_id: UserId::new(1),
                recipient_id: UserId::new(2),
            },
        )
        .await
        .unwrap();

    assert_eq!(id, MessageId::new(11));
    assert_eq!(gateway.stats().partial_invalidations, 1);
}
