//! Cache availability guard.
//!
//! A two-state machine in front of the cache tier. While `Available`, calls go
//! through and consecutive failures are counted. Once the count reaches the
//! threshold, or a probe fails, the guard flips to `Degraded` and rejects
//! every call without touching the tier. Only a successful probe brings it
//! back.

use parking_lot::RwLock;
use parley_core::{ParleyError, ParleyResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Reachability of the cache tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Availability {
    /// Cache reads and writes are attempted.
    Available = 0,
    /// All traffic bypasses the cache tier.
    Degraded = 1,
}

impl Availability {
    /// Returns `true` for `Available`.
    #[must_use]
    pub const fn is_available(self) -> bool {
        matches!(self, Self::Available)
    }

    /// Returns a stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Degraded => "degraded",
        }
    }
}

impl From<u8> for Availability {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Degraded,
            _ => Self::Available,
        }
    }
}

impl std::fmt::Display for Availability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Availability guard configuration.
#[derive(Debug, Clone)]
pub struct AvailabilityConfig {
    /// Consecutive operation failures before degrading.
    pub failure_threshold: u64,
    /// Interval between background probes.
    pub probe_interval: Duration,
    /// A probe slower than this counts as a failure.
    pub probe_timeout: Duration,
}

impl Default for AvailabilityConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            probe_interval: Duration::from_secs(5),
            probe_timeout: Duration::from_millis(500),
        }
    }
}

/// Guards calls to the cache tier.
pub struct AvailabilityGuard {
    name: String,
    state: AtomicU8,
    consecutive_failures: AtomicU64,
    degraded_since: RwLock<Option<Instant>>,
    config: AvailabilityConfig,
}

impl AvailabilityGuard {
    /// Creates a new guard in the `Available` state.
    pub fn new(name: impl Into<String>, config: AvailabilityConfig) -> Self {
        Self {
            name: name.into(),
            state: AtomicU8::new(Availability::Available as u8),
            consecutive_failures: AtomicU64::new(0),
            degraded_since: RwLock::new(None),
            config,
        }
    }

    /// Creates a new guard with default configuration.
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, AvailabilityConfig::default())
    }

    /// Creates a guard that starts `Degraded`, for a cache tier that is
    /// switched off or failed to connect at startup.
    pub fn degraded(name: impl Into<String>, config: AvailabilityConfig) -> Self {
        let guard = Self::new(name, config);
        guard.state.store(Availability::Degraded as u8, Ordering::SeqCst);
        *guard.degraded_since.write() = Some(Instant::now());
        guard
    }

    /// Returns the current state.
    pub fn state(&self) -> Availability {
        Availability::from(self.state.load(Ordering::SeqCst))
    }

    /// Returns `true` while the cache tier may be used.
    pub fn is_available(&self) -> bool {
        self.state().is_available()
    }

    /// Returns the name of the guarded tier.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the guard configuration.
    pub fn config(&self) -> &AvailabilityConfig {
        &self.config
    }

    /// Returns the current run of consecutive failures.
    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    /// Returns how long the guard has been degraded.
    pub fn degraded_for(&self) -> Option<Duration> {
        self.degraded_since.read().map(|since| since.elapsed())
    }

    /// Executes a cache operation under the guard.
    ///
    /// Rejects with `CacheUnavailable` without running `f` while degraded.
    /// Failures that indicate an unreachable tier count towards the
    /// threshold; any success resets the count.
    pub async fn call<F, Fut, T>(&self, f: F) -> ParleyResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ParleyResult<T>>,
    {
        if !self.is_available() {
            return Err(ParleyError::cache_unavailable(format!(
                "{} is degraded",
                self.name
            )));
        }

        match f().await {
            Ok(result) => {
                self.record_success();
                Ok(result)
            }
            Err(e) => {
                if e.should_degrade_cache() {
                    self.record_failure(&e.to_string());
                }
                Err(e)
            }
        }
    }

    /// Records a successful operation.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }

    /// Records a failed operation and degrades once the threshold is hit.
    pub fn record_failure(&self, reason: &str) {
        if !self.is_available() {
            return;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(
            "Cache tier '{}' failure {}/{}: {}",
            self.name, failures, self.config.failure_threshold, reason
        );

        if failures >= self.config.failure_threshold {
            self.mark_degraded(reason);
        }
    }

    /// Moves to `Degraded`. Returns `true` if this call made the transition.
    pub fn mark_degraded(&self, reason: &str) -> bool {
        let transitioned = self
            .state
            .compare_exchange(
                Availability::Available as u8,
                Availability::Degraded as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();

        if transitioned {
            *self.degraded_since.write() = Some(Instant::now());
            warn!(
                "Cache tier '{}' degraded after {} consecutive failures: {}",
                self.name,
                self.consecutive_failures(),
                reason
            );
        }
        transitioned
    }

    /// Moves to `Available`. Returns `true` if this call made the transition.
    pub fn mark_available(&self) -> bool {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        let transitioned = self
            .state
            .compare_exchange(
                Availability::Degraded as u8,
                Availability::Available as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();

        if transitioned {
            let outage = self.degraded_since.write().take();
            info!(
                "Cache tier '{}' available again after {:?}",
                self.name,
                outage.map(|since| since.elapsed())
            );
        }
        transitioned
    }

    /// Runs a probe bounded by the probe timeout and applies the outcome.
    ///
    /// The probe bypasses the degraded check so it can detect recovery.
    pub async fn probe<F, Fut>(&self, ping: F) -> Availability
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ParleyResult<()>>,
    {
        match tokio::time::timeout(self.config.probe_timeout, ping()).await {
            Ok(Ok(())) => {
                self.mark_available();
            }
            Ok(Err(e)) => {
                self.mark_degraded(&format!("probe failed: {}", e));
            }
            Err(_) => {
                self.mark_degraded(&format!(
                    "probe timed out after {:?}",
                    self.config.probe_timeout
                ));
            }
        }
        self.state()
    }

    /// Forces the guard back to its initial state.
    pub fn reset(&self) {
        self.state.store(Availability::Available as u8, Ordering::SeqCst);
        self.consecutive_failures.store(0, Ordering::SeqCst);
        *self.degraded_since.write() = None;
        debug!("Availability guard '{}' manually reset", self.name);
    }
}

impl std::fmt::Debug for AvailabilityGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvailabilityGuard")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("consecutive_failures", &self.consecutive_failures())
            .finish_non_exhaustive()
    }
}
