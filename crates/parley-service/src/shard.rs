//! Shard routing.
//!
//! The relational store is partitioned by user id. The cache layer only
//! knows an entity's shard key; mapping that key onto a physical shard is
//! the router's job.

use parley_cache::EntityRef;
use parley_core::UserId;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Index of a physical shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardId(pub u32);

impl Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shard-{}", self.0)
    }
}

/// Maps shard keys onto shards.
pub trait ShardRouter: Send + Sync {
    /// Returns the shard owning `user_id`'s rows.
    fn shard_for(&self, user_id: UserId) -> ShardId;

    /// Number of shards.
    fn shard_count(&self) -> u32;

    /// Returns the shard that answers a load of `entity`, if it has a shard key.
    fn route(&self, entity: &EntityRef) -> Option<ShardId> {
        entity.shard_key().map(|user_id| self.shard_for(user_id))
    }
}

/// Modulo router over the user id.
#[derive(Debug, Clone, Copy)]
pub struct HashShardRouter {
    shards: u32,
}

impl HashShardRouter {
    /// Creates a router over `shards` shards. Zero is treated as one.
    #[must_use]
    pub fn new(shards: u32) -> Self {
        Self {
            shards: shards.max(1),
        }
    }
}

impl Default for HashShardRouter {
    fn default() -> Self {
        Self::new(1)
    }
}

impl ShardRouter for HashShardRouter {
    fn shard_for(&self, user_id: UserId) -> ShardId {
        let shard = user_id.into_inner().rem_euclid(i64::from(self.shards));
        // rem_euclid keeps the value in 0..shards, which fits in u32.
        ShardId(u32::try_from(shard).unwrap_or(0))
    }

    fn shard_count(&self) -> u32 {
        self.shards
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modulo_routing() {
        let router = HashShardRouter::new(4);
        assert_eq!(router.shard_for(UserId::new(9)), ShardId(1));
        assert_eq!(router.shard_for(UserId::new(12)), ShardId(0));
        assert_eq!(router.shard_for(UserId::new(-1)), ShardId(3));
        assert_eq!(router.shard_count(), 4);
    }

    #[test]
    fn test_zero_shards_is_one() {
        let router = HashShardRouter::new(0);
        assert_eq!(router.shard_count(), 1);
        assert_eq!(router.shard_for(UserId::new(77)), ShardId(0));
    }

    #[test]
    fn test_route_uses_shard_key() {
        let router = HashShardRouter::new(4);

        // A conversation lives with its lower participant.
        let page = EntityRef::conversation_page(UserId::new(9), UserId::new(6), 50, 0);
        assert_eq!(router.route(&page), Some(ShardId(2)));

        assert_eq!(router.route(&EntityRef::unread_count(UserId::new(5))), Some(ShardId(1)));
        assert_eq!(router.route(&EntityRef::OnlineUsers), None);
        assert_eq!(ShardId(3).to_string(), "shard-3");
    }
}
