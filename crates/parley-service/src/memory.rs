//! In-memory repositories.
//!
//! Stand-ins for the sharded store in tests and local development. Messages
//! are distributed over shards by sender, the way the relational store
//! distributes them. Both repositories can be switched into a failing mode
//! that returns store errors, and count the queries they answer.

use crate::repository::{MessageRepository, UserRepository};
use crate::shard::{HashShardRouter, ShardRouter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use parley_core::{
    Message, MessageId, NewMessage, NewUser, ParleyError, ParleyResult, User, UserId,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

const DEFAULT_TIMEZONE: &str = "UTC";

#[derive(Default)]
struct Health {
    failing: AtomicBool,
    queries: AtomicU64,
}

impl Health {
    fn enter(&self, what: &str) -> ParleyResult<()> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(ParleyError::store(format!("{} unavailable", what)))
        } else {
            Ok(())
        }
    }
}

fn newest_first(mut messages: Vec<Message>) -> Vec<Message> {
    messages.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    messages
}

fn page(messages: Vec<Message>, limit: u32, offset: u32) -> Vec<Message> {
    newest_first(messages)
        .into_iter()
        .skip(offset as usize)
        .take(limit as usize)
        .collect()
}

/// In-memory message repository.
pub struct InMemoryMessageRepository {
    router: Arc<dyn ShardRouter>,
    shards: Vec<RwLock<Vec<Message>>>,
    next_id: AtomicI64,
    health: Health,
}

impl InMemoryMessageRepository {
    /// Creates an empty repository with a single shard.
    #[must_use]
    pub fn new() -> Self {
        Self::with_router(Arc::new(HashShardRouter::default()))
    }

    /// Creates an empty repository partitioned by `router`.
    #[must_use]
    pub fn with_router(router: Arc<dyn ShardRouter>) -> Self {
        let shards = (0..router.shard_count().max(1))
            .map(|_| RwLock::new(Vec::new()))
            .collect();
        Self {
            router,
            shards,
            next_id: AtomicI64::new(1),
            health: Health::default(),
        }
    }

    /// Makes every subsequent call fail with a store error, or heals it.
    pub fn set_failing(&self, failing: bool) {
        self.health.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of calls answered so far, failed ones included.
    pub fn queries(&self) -> u64 {
        self.health.queries.load(Ordering::SeqCst)
    }

    /// Number of messages stored on each shard.
    pub fn shard_sizes(&self) -> Vec<usize> {
        self.shards.iter().map(|shard| shard.read().len()).collect()
    }

    fn shard(&self, sender_id: UserId) -> &RwLock<Vec<Message>> {
        let index = self.router.shard_for(sender_id).0 as usize;
        &self.shards[index % self.shards.len()]
    }

    /// Messages matching `filter` across every shard.
    fn scatter<F>(&self, filter: F) -> Vec<Message>
    where
        F: Fn(&Message) -> bool,
    {
        self.shards
            .iter()
            .flat_map(|shard| {
                shard
                    .read()
                    .iter()
                    .filter(|&m| filter(m))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn modify<F>(&self, id: MessageId, f: F) -> Option<Message>
    where
        F: FnOnce(&mut Vec<Message>, usize) -> Message,
    {
        for shard in &self.shards {
            let mut rows = shard.write();
            if let Some(index) = rows.iter().position(|m| m.id == id) {
                return Some(f(&mut *rows, index));
            }
        }
        None
    }
}

impl Default for InMemoryMessageRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn find_by_id(&self, id: MessageId) -> ParleyResult<Option<Message>> {
        self.health.enter("message store")?;
        Ok(self.scatter(|m| m.id == id).into_iter().next())
    }

    async fn find_conversation(
        &self,
        user_a: UserId,
        user_b: UserId,
        limit: u32,
        offset: u32,
    ) -> ParleyResult<Vec<Message>> {
        self.health.enter("message store")?;
        let rows = self.scatter(|m| {
            (m.sender_id == user_a && m.recipient_id == user_b)
                || (m.sender_id == user_b && m.recipient_id == user_a)
        });
        Ok(page(rows, limit, offset))
    }

    async fn find_for_user(
        &self,
        user_id: UserId,
        limit: u32,
        offset: u32,
    ) -> ParleyResult<Vec<Message>> {
        self.health.enter("message store")?;
        Ok(page(self.scatter(|m| m.involves(user_id)), limit, offset))
    }

    async fn find_received(&self, user_id: UserId, limit: u32) -> ParleyResult<Vec<Message>> {
        self.health.enter("message store")?;
        Ok(page(self.scatter(|m| m.recipient_id == user_id), limit, 0))
    }

    async fn search(
        &self,
        user_id: UserId,
        query: &str,
        limit: u32,
    ) -> ParleyResult<Vec<Message>> {
        self.health.enter("message store")?;
        let needle = query.to_lowercase();
        let rows =
            self.scatter(|m| m.involves(user_id) && m.content.to_lowercase().contains(&needle));
        Ok(page(rows, limit, 0))
    }

    async fn insert(&self, message: NewMessage) -> ParleyResult<Message> {
        self.health.enter("message store")?;

        let row = Message {
            id: MessageId::new(self.next_id.fetch_add(1, Ordering::SeqCst)),
            content: message.content,
            sender_id: message.sender_id,
            recipient_id: message.recipient_id,
            message_type: message.message_type,
            is_read: false,
            created_at: Utc::now(),
        };
        self.shard(row.sender_id).write().push(row.clone());
        Ok(row)
    }

    async fn mark_read(&self, id: MessageId) -> ParleyResult<Option<Message>> {
        self.health.enter("message store")?;
        Ok(self.modify(id, |rows, index| {
            rows[index].is_read = true;
            rows[index].clone()
        }))
    }

    async fn delete(&self, id: MessageId) -> ParleyResult<bool> {
        self.health.enter("message store")?;
        Ok(self.modify(id, |rows, index| rows.remove(index)).is_some())
    }

    async fn count_unread(&self, user_id: UserId) -> ParleyResult<u64> {
        self.health.enter("message store")?;
        Ok(self
            .scatter(|m| m.recipient_id == user_id && !m.is_read)
            .len() as u64)
    }

    async fn partner_unread_counts(&self, user_id: UserId) -> ParleyResult<Vec<(UserId, u64)>> {
        self.health.enter("message store")?;

        let mut partners: BTreeMap<UserId, u64> = BTreeMap::new();
        for message in self.scatter(|m| m.involves(user_id)) {
            let unread = partners.entry(message.partner_of(user_id)).or_default();
            if message.recipient_id == user_id && !message.is_read {
                *unread += 1;
            }
        }
        Ok(partners.into_iter().collect())
    }
}

/// In-memory user repository.
pub struct InMemoryUserRepository {
    users: RwLock<HashMap<UserId, User>>,
    next_id: AtomicI64,
    health: Health,
}

impl InMemoryUserRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            health: Health::default(),
        }
    }

    /// Makes every subsequent call fail with a store error, or heals it.
    pub fn set_failing(&self, failing: bool) {
        self.health.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of calls answered so far, failed ones included.
    pub fn queries(&self) -> u64 {
        self.health.queries.load(Ordering::SeqCst)
    }

    fn find(&self, predicate: impl Fn(&User) -> bool) -> Option<User> {
        self.users.read().values().find(|&u| predicate(u)).cloned()
    }
}

impl Default for InMemoryUserRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_id(&self, id: UserId) -> ParleyResult<Option<User>> {
        self.health.enter("user store")?;
        Ok(self.users.read().get(&id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> ParleyResult<Option<User>> {
        self.health.enter("user store")?;
        Ok(self.find(|u| u.username == username))
    }

    async fn find_by_email(&self, email: &str) -> ParleyResult<Option<User>> {
        self.health.enter("user store")?;
        Ok(self.find(|u| u.email == email))
    }

    async fn insert(&self, user: NewUser) -> ParleyResult<User> {
        self.health.enter("user store")?;

        let mut users = self.users.write();
        if users
            .values()
            .any(|u| u.username == user.username || u.email == user.email)
        {
            return Err(ParleyError::validation(format!(
                "Username '{}' or email '{}' already exists",
                user.username, user.email
            )));
        }

        let row = User {
            id: UserId::new(self.next_id.fetch_add(1, Ordering::SeqCst)),
            username: user.username,
            email: user.email,
            display_name: user.display_name,
            avatar_url: None,
            is_active: true,
            last_seen: None,
            timezone: DEFAULT_TIMEZONE.to_string(),
            created_at: Utc::now(),
        };
        users.insert(row.id, row.clone());
        Ok(row)
    }

    async fn update(&self, user: &User) -> ParleyResult<User> {
        self.health.enter("user store")?;

        let mut users = self.users.write();
        if users
            .values()
            .any(|u| u.id != user.id && (u.username == user.username || u.email == user.email))
        {
            return Err(ParleyError::validation(format!(
                "Username '{}' or email '{}' already exists",
                user.username, user.email
            )));
        }

        match users.get_mut(&user.id) {
            Some(stored) => {
                stored.clone_from(user);
                Ok(stored.clone())
            }
            None => Err(ParleyError::not_found("User", user.id)),
        }
    }

    async fn find_online(&self, since: DateTime<Utc>) -> ParleyResult<Vec<User>> {
        self.health.enter("user store")?;

        let mut online: Vec<User> = self
            .users
            .read()
            .values()
            .filter(|u| u.is_active && u.last_seen.is_some_and(|seen| seen >= since))
            .cloned()
            .collect();
        online.sort_by_key(|u| u.id);
        Ok(online)
    }

    async fn touch_last_seen(&self, id: UserId, at: DateTime<Utc>) -> ParleyResult<Option<User>> {
        self.health.enter("user store")?;

        Ok(self.users.write().get_mut(&id).map(|user| {
            user.last_seen = Some(at);
            user.clone()
        }))
    }
}
