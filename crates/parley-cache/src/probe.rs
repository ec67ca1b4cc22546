//! Background availability probe.
//!
//! A degraded gateway never touches the cache tier on the request path, so
//! recovery depends on this task.

use crate::gateway::CacheGateway;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Spawns a task that probes the cache tier every `interval`.
///
/// Abort the returned handle on shutdown.
pub fn spawn_availability_probe(gateway: CacheGateway, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Starting cache availability probe every {:?}", interval);

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last = gateway.availability();

        loop {
            ticker.tick().await;

            let state = gateway.probe().await;
            if state == last {
                debug!("Cache availability probe: {}", state);
            } else {
                info!("Cache availability changed: {} -> {}", last, state);
                last = state;
            }
        }
    })
}
