//! Repository traits over the sharded relational store.
//!
//! Implementations own durability and sharding. Every error they return is a
//! store-tier error and is surfaced to callers unchanged.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_core::{Message, MessageId, NewMessage, NewUser, ParleyResult, User, UserId};

/// Message repository.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Finds a message by ID.
    async fn find_by_id(&self, id: MessageId) -> ParleyResult<Option<Message>>;

    /// Returns one page of the conversation between two users, newest first.
    async fn find_conversation(
        &self,
        user_a: UserId,
        user_b: UserId,
        limit: u32,
        offset: u32,
    ) -> ParleyResult<Vec<Message>>;

    /// Returns one page of messages sent or received by `user_id`, newest first.
    async fn find_for_user(
        &self,
        user_id: UserId,
        limit: u32,
        offset: u32,
    ) -> ParleyResult<Vec<Message>>;

    /// Returns the latest messages received by `user_id`.
    async fn find_received(&self, user_id: UserId, limit: u32) -> ParleyResult<Vec<Message>>;

    /// Returns the newest messages sent or received by `user_id` whose
    /// content contains `query`, ignoring case.
    async fn search(
        &self,
        user_id: UserId,
        query: &str,
        limit: u32,
    ) -> ParleyResult<Vec<Message>>;

    /// Inserts a message and returns the stored row.
    async fn insert(&self, message: NewMessage) -> ParleyResult<Message>;

    /// Marks a message as read. Returns the updated row, or `None` if missing.
    async fn mark_read(&self, id: MessageId) -> ParleyResult<Option<Message>>;

    /// Deletes a message. Returns `true` if it existed.
    async fn delete(&self, id: MessageId) -> ParleyResult<bool>;

    /// Counts unread messages addressed to `user_id`.
    async fn count_unread(&self, user_id: UserId) -> ParleyResult<u64>;

    /// Returns every user `user_id` has exchanged messages with, together
    /// with the number of unread messages from that partner.
    async fn partner_unread_counts(&self, user_id: UserId) -> ParleyResult<Vec<(UserId, u64)>>;
}

/// User repository.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Finds a user by ID.
    async fn find_by_id(&self, id: UserId) -> ParleyResult<Option<User>>;

    /// Finds a user by username.
    async fn find_by_username(&self, username: &str) -> ParleyResult<Option<User>>;

    /// Finds a user by email.
    async fn find_by_email(&self, email: &str) -> ParleyResult<Option<User>>;

    /// Inserts a user. Fails with `Validation` if the username or email is taken.
    async fn insert(&self, user: NewUser) -> ParleyResult<User>;

    /// Replaces a stored user. Fails with `NotFound` if it does not exist.
    async fn update(&self, user: &User) -> ParleyResult<User>;

    /// Returns active users seen at or after `since`.
    async fn find_online(&self, since: DateTime<Utc>) -> ParleyResult<Vec<User>>;

    /// Sets `last_seen`. Returns the updated user, or `None` if missing.
    async fn touch_last_seen(&self, id: UserId, at: DateTime<Utc>) -> ParleyResult<Option<User>>;
}
