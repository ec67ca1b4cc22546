//! Write invalidation.
//!
//! Every committed write is described by a [`WriteOp`]. The propagator maps
//! it to the complete set of cache entries it made stale and deletes them.
//! Deletes run concurrently, each bounded by the operation timeout and routed
//! through the availability guard. Failed targets are reported to an
//! [`InvalidationSink`] and retried on a background task; TTL expiry bounds
//! the staleness of anything the retry misses.

use crate::keys::{CacheKey, EntityKind, EntityRef, KeyPattern};
use crate::stats::CacheStats;
use crate::store::CacheStore;
use futures::future::join_all;
use parley_core::{MessageId, ParleyError, ParleyResult, User, UserId};
use parley_resilience::{with_named_timeout, AvailabilityGuard, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Username and email of a user, as cached under the lookup keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserKeys {
    pub username: String,
    pub email: String,
}

impl UserKeys {
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
        }
    }
}

impl From<&User> for UserKeys {
    fn from(user: &User) -> Self {
        Self::new(user.username.as_str(), user.email.as_str())
    }
}

/// A committed write to the relational store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteOp {
    MessageSent {
        message_id: MessageId,
        sender_id: UserId,
        recipient_id: UserId,
    },
    MessageRead {
        message_id: MessageId,
        sender_id: UserId,
        recipient_id: UserId,
    },
    MessageDeleted {
        message_id: MessageId,
        sender_id: UserId,
        recipient_id: UserId,
    },
    UserCreated {
        user_id: UserId,
        keys: UserKeys,
    },
    UserUpdated {
        user_id: UserId,
        previous: UserKeys,
        current: UserKeys,
    },
    PresenceChanged {
        user_id: UserId,
        keys: UserKeys,
    },
}

impl WriteOp {
    /// Stable name used in logs and metric labels.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::MessageSent { .. } => "message_sent",
            Self::MessageRead { .. } => "message_read",
            Self::MessageDeleted { .. } => "message_deleted",
            Self::UserCreated { .. } => "user_created",
            Self::UserUpdated { .. } => "user_updated",
            Self::PresenceChanged { .. } => "presence_changed",
        }
    }
}

impl fmt::Display for WriteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One entry of an invalidation set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InvalidationTarget {
    /// A single key.
    Exact { kind: EntityKind, key: CacheKey },
    /// Every page of a paginated family.
    Prefix(KeyPattern),
}

impl InvalidationTarget {
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Exact { kind, .. } => *kind,
            Self::Prefix(pattern) => pattern.kind(),
        }
    }

    /// Returns `true` if deleting this target removes `key`.
    #[must_use]
    pub fn covers(&self, key: &CacheKey) -> bool {
        match self {
            Self::Exact { key: target, .. } => target == key,
            Self::Prefix(pattern) => pattern.matches(key.as_str()),
        }
    }
}

impl fmt::Display for InvalidationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact { key, .. } => write!(f, "{key}"),
            Self::Prefix(pattern) => write!(f, "{pattern}"),
        }
    }
}

/// De-duplicated set of targets to delete after a write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationSet {
    targets: BTreeSet<InvalidationTarget>,
}

impl InvalidationSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the key of `entity`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKeyField` if the reference cannot be encoded.
    pub fn insert_ref(&mut self, entity: &EntityRef) -> ParleyResult<()> {
        let key = entity.encode()?;
        self.targets.insert(InvalidationTarget::Exact {
            kind: entity.kind(),
            key,
        });
        Ok(())
    }

    /// Builder form of [`InvalidationSet::insert_ref`].
    pub fn with_ref(mut self, entity: &EntityRef) -> ParleyResult<Self> {
        self.insert_ref(entity)?;
        Ok(self)
    }

    /// Adds every page of a family.
    pub fn insert_pattern(&mut self, pattern: KeyPattern) {
        self.targets.insert(InvalidationTarget::Prefix(pattern));
    }

    /// Builder form of [`InvalidationSet::insert_pattern`].
    #[must_use]
    pub fn with_pattern(mut self, pattern: KeyPattern) -> Self {
        self.insert_pattern(pattern);
        self
    }

    /// Adds every target of `other`.
    pub fn extend(&mut self, other: InvalidationSet) {
        self.targets.extend(other.targets);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InvalidationTarget> {
        self.targets.iter()
    }

    /// Returns `true` if propagating this set deletes the entry of `entity`.
    #[must_use]
    pub fn covers(&self, entity: &EntityRef) -> bool {
        entity
            .encode()
            .is_ok_and(|key| self.targets.iter().any(|target| target.covers(&key)))
    }
}

impl FromIterator<InvalidationTarget> for InvalidationSet {
    fn from_iter<I: IntoIterator<Item = InvalidationTarget>>(iter: I) -> Self {
        Self {
            targets: iter.into_iter().collect(),
        }
    }
}

/// Outcome of propagating an invalidation set.
#[derive(Debug, Clone, Default)]
pub struct InvalidationReport {
    /// Targets in the set.
    pub total: usize,
    /// Keys the cache tier reported as removed.
    pub deleted_keys: u64,
    /// Targets that could not be deleted, with the reason.
    pub failed: Vec<(InvalidationTarget, String)>,
    /// Nothing was attempted because the cache tier is degraded.
    pub skipped: bool,
}

impl InvalidationReport {
    fn skipped(total: usize) -> Self {
        Self {
            total,
            skipped: true,
            ..Default::default()
        }
    }

    /// Returns `true` if every target was deleted or nothing was attempted.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// The `PartialInvalidation` error for this report, if any target failed.
    #[must_use]
    pub fn to_error(&self) -> Option<ParleyError> {
        if self.failed.is_empty() {
            None
        } else {
            Some(ParleyError::PartialInvalidation {
                failed: self.failed.len(),
                total: self.total,
            })
        }
    }

    /// Targets that failed, without reasons.
    #[must_use]
    pub fn failed_targets(&self) -> Vec<InvalidationTarget> {
        self.failed.iter().map(|(target, _)| target.clone()).collect()
    }
}

/// Receives invalidation failures.
///
/// The write that triggered them has already succeeded; implementations only
/// observe.
pub trait InvalidationSink: Send + Sync {
    /// Some targets of a write's invalidation set were not deleted.
    fn on_partial_invalidation(&self, write_op: &str, error: &ParleyError, report: &InvalidationReport);

    /// The invalidation set of a committed write could not be computed.
    fn on_plan_failure(&self, error: &ParleyError) {
        warn!(error = %error, "Failed to compute invalidation set after commit");
    }
}

/// Sink that logs through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingInvalidationSink;

impl InvalidationSink for TracingInvalidationSink {
    fn on_partial_invalidation(&self, write_op: &str, error: &ParleyError, report: &InvalidationReport) {
        let failed: Vec<String> = report
            .failed
            .iter()
            .map(|(target, reason)| format!("{target} ({reason})"))
            .collect();
        warn!(
            write_op,
            error_code = error.error_code(),
            failed = ?failed,
            "{}",
            error
        );
    }
}

/// Computes invalidation sets and deletes them from the cache tier.
pub struct InvalidationPropagator {
    store: Arc<dyn CacheStore>,
    guard: Arc<AvailabilityGuard>,
    stats: Arc<CacheStats>,
    operation_timeout: Duration,
    retry: Option<RetryPolicy>,
}

impl InvalidationPropagator {
    /// Creates a propagator. `retry` enables background retries of failed
    /// targets.
    pub fn new(
        store: Arc<dyn CacheStore>,
        guard: Arc<AvailabilityGuard>,
        stats: Arc<CacheStats>,
        operation_timeout: Duration,
        retry: Option<RetryPolicy>,
    ) -> Self {
        Self {
            store,
            guard,
            stats,
            operation_timeout,
            retry,
        }
    }

    /// The complete set of entries made stale by `op`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKeyField` when a username or email in `op` cannot be
    /// encoded.
    pub fn plan(op: &WriteOp) -> ParleyResult<InvalidationSet> {
        let mut set = InvalidationSet::new();

        match op {
            WriteOp::MessageSent {
                message_id,
                sender_id,
                recipient_id,
            }
            | WriteOp::MessageDeleted {
                message_id,
                sender_id,
                recipient_id,
            } => {
                add_message_core(&mut set, *message_id, *sender_id, *recipient_id)?;
                set.insert_ref(&EntityRef::conversation_partners(*sender_id))?;
                set.insert_ref(&EntityRef::conversation_partners(*recipient_id))?;
                // The sender's own unread count is unaffected.
                set.insert_ref(&EntityRef::unread_count(*recipient_id))?;
                set.insert_pattern(KeyPattern::RecentMessages {
                    user_id: *recipient_id,
                });
            }
            WriteOp::MessageRead {
                message_id,
                sender_id,
                recipient_id,
            } => {
                add_message_core(&mut set, *message_id, *sender_id, *recipient_id)?;
                set.insert_ref(&EntityRef::unread_count(*recipient_id))?;
                set.insert_ref(&EntityRef::conversation_partners(*recipient_id))?;
                // Recent lists carry the read flag.
                set.insert_pattern(KeyPattern::RecentMessages {
                    user_id: *recipient_id,
                });
            }
            WriteOp::UserCreated { user_id, keys } => {
                set.insert_ref(&EntityRef::user_profile(*user_id))?;
                add_user_lookups(&mut set, keys)?;
            }
            WriteOp::UserUpdated {
                user_id,
                previous,
                current,
            } => {
                set.insert_ref(&EntityRef::user_profile(*user_id))?;
                add_user_lookups(&mut set, previous)?;
                add_user_lookups(&mut set, current)?;
                set.insert_ref(&EntityRef::user_online_status(*user_id))?;
                set.insert_ref(&EntityRef::OnlineUsers)?;
            }
            WriteOp::PresenceChanged { user_id, keys } => {
                // Every lookup of the row carries `last_seen`.
                set.insert_ref(&EntityRef::user_profile(*user_id))?;
                add_user_lookups(&mut set, keys)?;
                set.insert_ref(&EntityRef::user_online_status(*user_id))?;
                set.insert_ref(&EntityRef::OnlineUsers)?;
            }
        }

        Ok(set)
    }

    /// Deletes every target of `set`.
    ///
    /// Never fails: failures are collected in the report. Issues nothing
    /// while the cache tier is degraded.
    pub async fn propagate(&self, set: &InvalidationSet) -> InvalidationReport {
        if set.is_empty() {
            return InvalidationReport::default();
        }
        if !self.guard.is_available() {
            debug!(
                "Cache degraded, skipping invalidation of {} targets",
                set.len()
            );
            return InvalidationReport::skipped(set.len());
        }

        let started = Instant::now();
        let store = self.store.as_ref();
        let guard = self.guard.as_ref();
        let timeout = self.operation_timeout;

        let outcomes = join_all(set.iter().map(|target| async move {
            let outcome = guard
                .call(|| {
                    with_named_timeout("cache invalidation", timeout, || {
                        delete_target(store, target)
                    })
                })
                .await;
            (target, outcome)
        }))
        .await;

        let mut report = InvalidationReport {
            total: set.len(),
            ..Default::default()
        };

        for (target, outcome) in outcomes {
            match outcome {
                Ok(deleted) => {
                    report.deleted_keys += deleted;
                    self.stats.record_invalidated(target.kind(), deleted);
                }
                Err(e) => {
                    self.stats.record_failed_invalidation(target.kind());
                    report.failed.push((target.clone(), e.to_string()));
                }
            }
        }

        self.stats.record_invalidation_duration(started.elapsed());
        debug!(
            "Invalidated {} targets ({} keys, {} failed) in {:?}",
            report.total,
            report.deleted_keys,
            report.failed.len(),
            started.elapsed()
        );

        report
    }

    /// Retries failed targets on a background task.
    ///
    /// Returns `None` when retries are disabled, there is nothing to retry,
    /// or no tokio runtime is running.
    pub fn retry_in_background(&self, targets: Vec<InvalidationTarget>) -> Option<JoinHandle<()>> {
        let policy = self.retry.clone()?;
        if targets.is_empty() {
            return None;
        }
        let handle = tokio::runtime::Handle::try_current().ok()?;

        let store = Arc::clone(&self.store);
        let guard = Arc::clone(&self.guard);
        let stats = Arc::clone(&self.stats);
        let timeout = self.operation_timeout;

        Some(handle.spawn(async move {
            for target in targets {
                let result = policy
                    .execute_while(
                        || {
                            let store = Arc::clone(&store);
                            let guard = Arc::clone(&guard);
                            let target = target.clone();
                            async move {
                                guard
                                    .call(|| {
                                        with_named_timeout("cache invalidation retry", timeout, || {
                                            delete_target(store.as_ref(), &target)
                                        })
                                    })
                                    .await
                            }
                        },
                        ParleyError::is_retriable,
                    )
                    .await;

                match result {
                    Ok(deleted) => {
                        stats.record_invalidated(target.kind(), deleted);
                        info!("Invalidation retry succeeded for '{}'", target);
                    }
                    Err(e) => {
                        warn!(
                            "Giving up on invalidating '{}'; TTL will expire it: {}",
                            target, e
                        );
                    }
                }
            }
        }))
    }
}

impl fmt::Debug for InvalidationPropagator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidationPropagator")
            .field("operation_timeout", &self.operation_timeout)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

async fn delete_target(store: &dyn CacheStore, target: &InvalidationTarget) -> ParleyResult<u64> {
    match target {
        InvalidationTarget::Exact { key, .. } => store.delete(key).await.map(u64::from),
        InvalidationTarget::Prefix(pattern) => store.delete_pattern(pattern).await,
    }
}

/// Entries touched by any change to a message: the message itself, every
/// page of the conversation, and every page of both users' message lists
/// and searches.
fn add_message_core(
    set: &mut InvalidationSet,
    message_id: MessageId,
    sender_id: UserId,
    recipient_id: UserId,
) -> ParleyResult<()> {
    set.insert_ref(&EntityRef::message(message_id))?;
    set.insert_pattern(KeyPattern::for_conversation(sender_id, recipient_id));
    set.insert_pattern(KeyPattern::UserMessagePages { user_id: sender_id });
    set.insert_pattern(KeyPattern::UserMessagePages {
        user_id: recipient_id,
    });
    set.insert_pattern(KeyPattern::MessageSearches { user_id: sender_id });
    set.insert_pattern(KeyPattern::MessageSearches {
        user_id: recipient_id,
    });
    Ok(())
}

fn add_user_lookups(set: &mut InvalidationSet, keys: &UserKeys) -> ParleyResult<()> {
    set.insert_ref(&EntityRef::user_by_username(keys.username.as_str()))?;
    set.insert_ref(&EntityRef::user_by_email(keys.email.as_str()))?;
    Ok(())
}
