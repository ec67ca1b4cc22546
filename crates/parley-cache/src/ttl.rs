//! Time-to-live per entity kind.

use crate::keys::{EntityKind, EntityRef};
use parley_config::TtlConfig;
use std::time::Duration;

/// Maps every [`EntityKind`] to exactly one TTL.
///
/// Built once from configuration; a running gateway never changes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlPolicy {
    user: Duration,
    message: Duration,
    conversation: Duration,
    realtime: Duration,
    default: Duration,
}

impl TtlPolicy {
    /// Builds the policy from the `[cache.ttl]` section.
    #[must_use]
    pub fn from_config(config: &TtlConfig) -> Self {
        Self {
            user: Duration::from_secs(config.user_secs),
            message: Duration::from_secs(config.message_secs),
            conversation: Duration::from_secs(config.conversation_secs),
            realtime: Duration::from_secs(config.realtime_secs),
            default: Duration::from_secs(config.default_secs),
        }
    }

    /// TTL for a kind.
    #[must_use]
    pub const fn ttl_for(&self, kind: EntityKind) -> Duration {
        match kind {
            EntityKind::UserProfile | EntityKind::UserByUsername | EntityKind::UserByEmail => {
                self.user
            }
            EntityKind::Message | EntityKind::RecentMessages | EntityKind::MessageSearch => {
                self.message
            }
            EntityKind::ConversationPage | EntityKind::ConversationPartners => self.conversation,
            EntityKind::UnreadCount | EntityKind::OnlineUsers | EntityKind::UserOnlineStatus => {
                self.realtime
            }
            EntityKind::UserMessagePage => self.default,
        }
    }

    /// TTL for a reference, honoring a per-call override.
    #[must_use]
    pub fn resolve(&self, entity: &EntityRef, ttl_override: Option<Duration>) -> Duration {
        ttl_override.unwrap_or_else(|| self.ttl_for(entity.kind()))
    }

    /// Longest TTL of any kind.
    #[must_use]
    pub fn max_ttl(&self) -> Duration {
        EntityKind::ALL
            .iter()
            .map(|kind| self.ttl_for(*kind))
            .max()
            .unwrap_or(self.default)
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::from_config(&TtlConfig::default())
    }
}
