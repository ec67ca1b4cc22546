//! Message service trait definition.

use async_trait::async_trait;
use parley_core::{ConversationPartner, Message, MessageId, NewMessage, ParleyResult, UserId};

/// Page size used when a caller asks for none.
pub const DEFAULT_PAGE_LIMIT: u32 = 50;

/// Largest page a caller may ask for.
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Number of recent messages returned by default.
pub const DEFAULT_RECENT_LIMIT: u32 = 10;

/// Number of search results returned by default.
pub const DEFAULT_SEARCH_LIMIT: u32 = 20;

/// Clamps a requested page size into `1..=MAX_PAGE_LIMIT`.
#[must_use]
pub fn clamp_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT)
}

/// Message service trait.
#[async_trait]
pub trait MessageService: Send + Sync {
    /// Gets a message by ID.
    async fn get_message(&self, id: MessageId) -> ParleyResult<Message>;

    /// Gets one page of the conversation between two users, newest first.
    ///
    /// Both participants see the same cached page.
    async fn get_conversation(
        &self,
        user_a: UserId,
        user_b: UserId,
        limit: Option<u32>,
        offset: u32,
    ) -> ParleyResult<Vec<Message>>;

    /// Gets one page of every message a user sent or received.
    async fn get_user_messages(
        &self,
        user_id: UserId,
        limit: Option<u32>,
        offset: u32,
    ) -> ParleyResult<Vec<Message>>;

    /// Sends a message.
    async fn send_message(&self, message: NewMessage) -> ParleyResult<Message>;

    /// Marks a message as read on behalf of its recipient.
    async fn mark_read(&self, id: MessageId, reader_id: UserId) -> ParleyResult<Message>;

    /// Deletes a message on behalf of its sender.
    async fn delete_message(&self, id: MessageId, requester_id: UserId) -> ParleyResult<()>;

    /// Counts a user's unread messages.
    async fn unread_count(&self, user_id: UserId) -> ParleyResult<u64>;

    /// Lists everyone a user has talked to, most unread first.
    async fn conversation_partners(&self, user_id: UserId) -> ParleyResult<Vec<ConversationPartner>>;

    /// Lists the latest messages a user received.
    async fn recent_messages(&self, user_id: UserId, limit: Option<u32>) -> ParleyResult<Vec<Message>>;

    /// Finds a user's messages whose content contains `query`, newest first.
    async fn search_messages(
        &self,
        user_id: UserId,
        query: &str,
        limit: Option<u32>,
    ) -> ParleyResult<Vec<Message>>;
}
