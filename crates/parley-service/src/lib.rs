//! # Parley Service
//!
//! Messaging and user services for Parley. Reads go through the cache
//! gateway; writes commit to the sharded store first and then invalidate
//! every cache entry they made stale.

pub mod r#impl;
pub mod memory;
pub mod message_service;
pub mod repository;
pub mod shard;
pub mod user_service;

pub use memory::{InMemoryMessageRepository, InMemoryUserRepository};
pub use message_service::*;
pub use r#impl::{MessageServiceImpl, UserServiceImpl};
pub use repository::{MessageRepository, UserRepository};
pub use shard::{HashShardRouter, ShardId, ShardRouter};
pub use user_service::*;
