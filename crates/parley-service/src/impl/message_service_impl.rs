//! Message service implementation.

use crate::message_service::{
    clamp_limit, MessageService, DEFAULT_RECENT_LIMIT, DEFAULT_SEARCH_LIMIT, MAX_PAGE_LIMIT,
};
use crate::repository::{MessageRepository, UserRepository};
use async_trait::async_trait;
use parley_cache::{CacheGateway, EntityRef, WriteOp};
use parley_core::{
    ConversationPartner, Message, MessageId, NewMessage, ParleyError, ParleyResult, UserId,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Message service backed by the sharded store and the cache gateway.
pub struct MessageServiceImpl<M: MessageRepository, U: UserRepository> {
    messages: Arc<M>,
    users: Arc<U>,
    cache: CacheGateway,
}

impl<M: MessageRepository, U: UserRepository> MessageServiceImpl<M, U> {
    /// Creates a new message service.
    pub fn new(messages: Arc<M>, users: Arc<U>, cache: CacheGateway) -> Self {
        Self {
            messages,
            users,
            cache,
        }
    }

    /// Loads a message straight from the store, bypassing the cache.
    async fn load_fresh(&self, id: MessageId) -> ParleyResult<Message> {
        self.messages
            .find_by_id(id)
            .await?
            .ok_or_else(|| ParleyError::not_found("Message", id))
    }

    async fn load_partners(&self, user_id: UserId) -> ParleyResult<Vec<ConversationPartner>> {
        let counts = self.messages.partner_unread_counts(user_id).await?;

        let mut partners = Vec::with_capacity(counts.len());
        for (partner_id, unread_count) in counts {
            let display_name = match self.users.find_by_id(partner_id).await? {
                Some(user) => user.display_name().to_string(),
                None => partner_id.to_string(),
            };
            partners.push(ConversationPartner {
                user_id: partner_id,
                display_name,
                unread_count,
            });
        }

        partners.sort_by(|a, b| {
            b.unread_count
                .cmp(&a.unread_count)
                .then_with(|| a.display_name.cmp(&b.display_name))
        });
        Ok(partners)
    }
}

/// Search queries become a cache key field.
fn validate_query(query: &str) -> ParleyResult<()> {
    if query.trim().is_empty() {
        return Err(ParleyError::validation("Search query cannot be empty"));
    }
    if query.contains(':') || query.chars().any(char::is_control) {
        return Err(ParleyError::validation(
            "Search query contains invalid characters",
        ));
    }
    Ok(())
}

fn validate_new_message(message: &NewMessage) -> ParleyResult<()> {
    if message.content.trim().is_empty() {
        return Err(ParleyError::validation("Message content cannot be empty"));
    }
    if message.sender_id == message.recipient_id {
        return Err(ParleyError::validation("Cannot send a message to yourself"));
    }
    Ok(())
}

#[async_trait]
impl<M, U> MessageService for MessageServiceImpl<M, U>
where
    M: MessageRepository + 'static,
    U: UserRepository + 'static,
{
    async fn get_message(&self, id: MessageId) -> ParleyResult<Message> {
        debug!("Getting message: {}", id);

        self.cache
            .read_through_optional(&EntityRef::message(id), None, || {
                self.messages.find_by_id(id)
            })
            .await?
            .ok_or_else(|| ParleyError::not_found("Message", id))
    }

    async fn get_conversation(
        &self,
        user_a: UserId,
        user_b: UserId,
        limit: Option<u32>,
        offset: u32,
    ) -> ParleyResult<Vec<Message>> {
        let limit = clamp_limit(limit);
        debug!(
            "Getting conversation {} <-> {}, limit: {}, offset: {}",
            user_a, user_b, limit, offset
        );

        self.cache
            .read_through(
                &EntityRef::conversation_page(user_a, user_b, limit, offset),
                None,
                || self.messages.find_conversation(user_a, user_b, limit, offset),
            )
            .await
    }

    async fn get_user_messages(
        &self,
        user_id: UserId,
        limit: Option<u32>,
        offset: u32,
    ) -> ParleyResult<Vec<Message>> {
        let limit = clamp_limit(limit);
        debug!(
            "Getting messages of user {}, limit: {}, offset: {}",
            user_id, limit, offset
        );

        self.cache
            .read_through(
                &EntityRef::user_message_page(user_id, limit, offset),
                None,
                || self.messages.find_for_user(user_id, limit, offset),
            )
            .await
    }

    async fn send_message(&self, message: NewMessage) -> ParleyResult<Message> {
        debug!(
            "Sending message {} -> {}",
            message.sender_id, message.recipient_id
        );

        validate_new_message(&message)?;

        // The recipient's profile is usually cached; the sender is the caller.
        let recipient_id = message.recipient_id;
        let recipient = self
            .cache
            .read_through_optional(&EntityRef::user_profile(recipient_id), None, || {
                self.users.find_by_id(recipient_id)
            })
            .await?;
        if recipient.is_none() {
            return Err(ParleyError::not_found("User", recipient_id));
        }

        let sent = self
            .cache
            .write_then_invalidate_op(
                || self.messages.insert(message),
                |m| WriteOp::MessageSent {
                    message_id: m.id,
                    sender_id: m.sender_id,
                    recipient_id: m.recipient_id,
                },
            )
            .await?;

        self.cache
            .prime(&EntityRef::message(sent.id), &sent, None)
            .await?;

        info!("Message sent: {}", sent.id);
        Ok(sent)
    }

    async fn mark_read(&self, id: MessageId, reader_id: UserId) -> ParleyResult<Message> {
        debug!("Marking message {} read for user {}", id, reader_id);

        let message = self.load_fresh(id).await?;
        if message.recipient_id != reader_id {
            return Err(ParleyError::validation(
                "Only the recipient can mark a message as read",
            ));
        }
        if message.is_read {
            return Ok(message);
        }

        let updated = self
            .cache
            .write_then_invalidate_op(
                || async {
                    self.messages
                        .mark_read(id)
                        .await?
                        .ok_or_else(|| ParleyError::not_found("Message", id))
                },
                |m| WriteOp::MessageRead {
                    message_id: m.id,
                    sender_id: m.sender_id,
                    recipient_id: m.recipient_id,
                },
            )
            .await?;

        self.cache
            .prime(&EntityRef::message(updated.id), &updated, None)
            .await?;

        Ok(updated)
    }

    async fn delete_message(&self, id: MessageId, requester_id: UserId) -> ParleyResult<()> {
        debug!("Deleting message {} for user {}", id, requester_id);

        let message = self.load_fresh(id).await?;
        if message.sender_id != requester_id {
            return Err(ParleyError::validation(
                "Only the sender can delete a message",
            ));
        }

        let deleted = self
            .cache
            .write_then_invalidate_op(
                || self.messages.delete(id),
                |_| WriteOp::MessageDeleted {
                    message_id: message.id,
                    sender_id: message.sender_id,
                    recipient_id: message.recipient_id,
                },
            )
            .await?;

        if !deleted {
            return Err(ParleyError::not_found("Message", id));
        }

        info!("Message deleted: {}", id);
        Ok(())
    }

    async fn unread_count(&self, user_id: UserId) -> ParleyResult<u64> {
        self.cache
            .read_through(&EntityRef::unread_count(user_id), None, || {
                self.messages.count_unread(user_id)
            })
            .await
    }

    async fn conversation_partners(&self, user_id: UserId) -> ParleyResult<Vec<ConversationPartner>> {
        debug!("Getting conversation partners of user {}", user_id);

        self.cache
            .read_through(&EntityRef::conversation_partners(user_id), None, || {
                self.load_partners(user_id)
            })
            .await
    }

    async fn recent_messages(&self, user_id: UserId, limit: Option<u32>) -> ParleyResult<Vec<Message>> {
        let limit = limit.unwrap_or(DEFAULT_RECENT_LIMIT).clamp(1, MAX_PAGE_LIMIT);

        self.cache
            .read_through(&EntityRef::recent_messages(user_id, limit), None, || {
                self.messages.find_received(user_id, limit)
            })
            .await
    }

    async fn search_messages(
        &self,
        user_id: UserId,
        query: &str,
        limit: Option<u32>,
    ) -> ParleyResult<Vec<Message>> {
        validate_query(query)?;
        let limit = limit.unwrap_or(DEFAULT_SEARCH_LIMIT).clamp(1, MAX_PAGE_LIMIT);
        debug!("Searching messages of user {} for '{}'", user_id, query);

        self.cache
            .read_through(&EntityRef::message_search(user_id, query, limit), None, || {
                self.messages.search(user_id, query, limit)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{MockMessageRepository, MockUserRepository};
    use chrono::Utc;
    use parley_cache::{GatewayOptions, InMemoryCacheStore, TtlPolicy};

    const A: UserId = UserId(5);
    const B: UserId = UserId(9);

    fn gateway(cache: Arc<InMemoryCacheStore>) -> CacheGateway {
        CacheGateway::new(
            cache,
            TtlPolicy::default(),
            GatewayOptions {
                retry: None,
                emit_metrics: false,
                ..Default::default()
            },
        )
    }

    fn message(id: i64) -> Message {
        Message {
            id: MessageId::new(id),
            content: "hello".to_string(),
            sender_id: A,
            recipient_id: B,
            message_type: "text".to_string(),
            is_read: false,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_failed_insert_touches_no_cache_entry() {
        let cache = Arc::new(InMemoryCacheStore::new());
        let mut messages = MockMessageRepository::new();
        messages
            .expect_insert()
            .times(1)
            .returning(|_| Err(ParleyError::store("shard 1 is read-only")));
        let mut users = MockUserRepository::new();
        users.expect_find_by_id().times(1).returning(|id| {
            Ok(Some(parley_core::User {
                id,
                username: "bob".to_string(),
                email: "bob@example.com".to_string(),
                display_name: None,
                avatar_url: None,
                is_active: true,
                last_seen: None,
                timezone: "UTC".to_string(),
                created_at: Utc::now(),
            }))
        });

        let service =
            MessageServiceImpl::new(Arc::new(messages), Arc::new(users), gateway(cache.clone()));
        let before = cache.counts();

        let err = service
            .send_message(NewMessage::text(A, B, "hi"))
            .await
            .unwrap_err();

        assert!(matches!(err, ParleyError::Store(_)));
        let after = cache.counts();
        assert_eq!(after.deletes, before.deletes);
        assert_eq!(after.pattern_deletes, before.pattern_deletes);
    }

    #[tokio::test]
    async fn test_only_recipient_marks_read() {
        let mut messages = MockMessageRepository::new();
        messages
            .expect_find_by_id()
            .returning(|id| Ok(Some(message(id.into_inner()))));
        messages.expect_mark_read().never();

        let service = MessageServiceImpl::new(
            Arc::new(messages),
            Arc::new(MockUserRepository::new()),
            gateway(Arc::new(InMemoryCacheStore::new())),
        );

        let err = service.mark_read(MessageId::new(3), A).await.unwrap_err();
        assert!(matches!(err, ParleyError::Validation(_)));
    }

    #[tokio::test]
    async fn test_search_query_with_delimiter_rejected() {
        let mut messages = MockMessageRepository::new();
        messages.expect_search().never();
        let cache = Arc::new(InMemoryCacheStore::new());

        let service = MessageServiceImpl::new(
            Arc::new(messages),
            Arc::new(MockUserRepository::new()),
            gateway(cache.clone()),
        );

        for query in ["12:30", "  ", ""] {
            let err = service.search_messages(A, query, None).await.unwrap_err();
            assert!(matches!(err, ParleyError::Validation(_)), "{query:?}");
        }
        assert_eq!(cache.counts().data_calls(), 0);
    }

    #[tokio::test]
    async fn test_search_uses_default_limit_and_caches() {
        let mut messages = MockMessageRepository::new();
        messages
            .expect_search()
            .withf(|user, query, limit| *user == A && query == "hello" && *limit == 20)
            .times(1)
            .returning(|_, _, _| Ok(vec![message(1)]));

        let service = MessageServiceImpl::new(
            Arc::new(messages),
            Arc::new(MockUserRepository::new()),
            gateway(Arc::new(InMemoryCacheStore::new())),
        );

        let first = service.search_messages(A, "hello", None).await.unwrap();
        let second = service.search_messages(A, "hello", Some(20)).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
    }

    #[tokio::test]
    async fn test_partners_sorted_by_unread_then_name() {
        let mut messages = MockMessageRepository::new();
        messages
            .expect_partner_unread_counts()
            .returning(|_| Ok(vec![(UserId(1), 0), (UserId(2), 4), (UserId(3), 0)]));
        let mut users = MockUserRepository::new();
        users.expect_find_by_id().returning(|id| {
            let name = match id.into_inner() {
                1 => "zed",
                2 => "mia",
                _ => "abe",
            };
            Ok(Some(parley_core::User {
                id,
                username: name.to_string(),
                email: format!("{}@example.com", name),
                display_name: None,
                avatar_url: None,
                is_active: true,
                last_seen: None,
                timezone: "UTC".to_string(),
                created_at: Utc::now(),
            }))
        });

        let service = MessageServiceImpl::new(
            Arc::new(messages),
            Arc::new(users),
            gateway(Arc::new(InMemoryCacheStore::new())),
        );

        let names: Vec<String> = service
            .conversation_partners(A)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.display_name)
            .collect();
        assert_eq!(names, vec!["mia", "abe", "zed"]);
    }
}
