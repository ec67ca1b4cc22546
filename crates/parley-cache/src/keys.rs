//! Cache key codec.
//!
//! Every cached entity is addressed by an [`EntityRef`] and encoded into a
//! [`CacheKey`] by a single function. Keys start with a type tag followed by
//! the entity's fields in a fixed order, separated by `:`:
//!
//! ```text
//! user_profile:{user_id}
//! user_username:{username}
//! user_email:{email}
//! message:{message_id}
//! conversation:{user_id_low}:{user_id_high}:messages:{limit}:{offset}
//! user_messages:{user_id}:{limit}:{offset}
//! conversation_partners:{user_id}
//! unread_count:{user_id}
//! online_users
//! user_online:{user_id}
//! recent_messages:{user_id}:{limit}
//! message_search:{user_id}:{query}:{limit}
//! ```
//!
//! Paginated families are addressed as a whole by a [`KeyPattern`], which is
//! the fixed-field prefix shared by every page.

use parley_core::{MessageId, ParleyError, ParleyResult, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved field delimiter.
pub const KEY_DELIMITER: char = ':';

/// Kind of cached entity. Used as the TTL class and the stats bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    UserProfile,
    UserByUsername,
    UserByEmail,
    Message,
    ConversationPage,
    UserMessagePage,
    ConversationPartners,
    UnreadCount,
    OnlineUsers,
    UserOnlineStatus,
    RecentMessages,
    MessageSearch,
}

impl EntityKind {
    /// Number of kinds.
    pub const COUNT: usize = 12;

    /// Every kind, in declaration order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::UserProfile,
        Self::UserByUsername,
        Self::UserByEmail,
        Self::Message,
        Self::ConversationPage,
        Self::UserMessagePage,
        Self::ConversationPartners,
        Self::UnreadCount,
        Self::OnlineUsers,
        Self::UserOnlineStatus,
        Self::RecentMessages,
        Self::MessageSearch,
    ];

    /// Stable name used in stats and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UserProfile => "user_profile",
            Self::UserByUsername => "user_by_username",
            Self::UserByEmail => "user_by_email",
            Self::Message => "message",
            Self::ConversationPage => "conversation_page",
            Self::UserMessagePage => "user_message_page",
            Self::ConversationPartners => "conversation_partners",
            Self::UnreadCount => "unread_count",
            Self::OnlineUsers => "online_users",
            Self::UserOnlineStatus => "user_online_status",
            Self::RecentMessages => "recent_messages",
            Self::MessageSearch => "message_search",
        }
    }

    /// Type tag that starts every key of this kind.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::UserProfile => "user_profile",
            Self::UserByUsername => "user_username",
            Self::UserByEmail => "user_email",
            Self::Message => "message",
            Self::ConversationPage => "conversation",
            Self::UserMessagePage => "user_messages",
            Self::ConversationPartners => "conversation_partners",
            Self::UnreadCount => "unread_count",
            Self::OnlineUsers => "online_users",
            Self::UserOnlineStatus => "user_online",
            Self::RecentMessages => "recent_messages",
            Self::MessageSearch => "message_search",
        }
    }

    /// Position in [`EntityKind::ALL`].
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a cacheable entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityRef {
    UserProfile {
        user_id: UserId,
    },
    UserByUsername {
        username: String,
    },
    UserByEmail {
        email: String,
    },
    Message {
        message_id: MessageId,
    },
    /// One page of the conversation between two users. The pair is
    /// unordered: `(a, b)` and `(b, a)` address the same entry.
    ConversationPage {
        user_a: UserId,
        user_b: UserId,
        limit: u32,
        offset: u32,
    },
    /// One page of every message a user sent or received.
    UserMessagePage {
        user_id: UserId,
        limit: u32,
        offset: u32,
    },
    ConversationPartners {
        user_id: UserId,
    },
    UnreadCount {
        user_id: UserId,
    },
    OnlineUsers,
    UserOnlineStatus {
        user_id: UserId,
    },
    /// Latest messages received by a user.
    RecentMessages {
        user_id: UserId,
        limit: u32,
    },
    /// Messages of a user whose content contains `query`.
    MessageSearch {
        user_id: UserId,
        query: String,
        limit: u32,
    },
}

impl EntityRef {
    pub fn user_profile(user_id: UserId) -> Self {
        Self::UserProfile { user_id }
    }

    pub fn user_by_username(username: impl Into<String>) -> Self {
        Self::UserByUsername {
            username: username.into(),
        }
    }

    pub fn user_by_email(email: impl Into<String>) -> Self {
        Self::UserByEmail {
            email: email.into(),
        }
    }

    pub fn message(message_id: MessageId) -> Self {
        Self::Message { message_id }
    }

    pub fn conversation_page(user_a: UserId, user_b: UserId, limit: u32, offset: u32) -> Self {
        Self::ConversationPage {
            user_a,
            user_b,
            limit,
            offset,
        }
    }

    pub fn user_message_page(user_id: UserId, limit: u32, offset: u32) -> Self {
        Self::UserMessagePage {
            user_id,
            limit,
            offset,
        }
    }

    pub fn conversation_partners(user_id: UserId) -> Self {
        Self::ConversationPartners { user_id }
    }

    pub fn unread_count(user_id: UserId) -> Self {
        Self::UnreadCount { user_id }
    }

    pub fn user_online_status(user_id: UserId) -> Self {
        Self::UserOnlineStatus { user_id }
    }

    pub fn recent_messages(user_id: UserId, limit: u32) -> Self {
        Self::RecentMessages { user_id, limit }
    }

    pub fn message_search(user_id: UserId, query: impl Into<String>, limit: u32) -> Self {
        Self::MessageSearch {
            user_id,
            query: query.into(),
            limit,
        }
    }

    /// Returns the kind of this reference.
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::UserProfile { .. } => EntityKind::UserProfile,
            Self::UserByUsername { .. } => EntityKind::UserByUsername,
            Self::UserByEmail { .. } => EntityKind::UserByEmail,
            Self::Message { .. } => EntityKind::Message,
            Self::ConversationPage { .. } => EntityKind::ConversationPage,
            Self::UserMessagePage { .. } => EntityKind::UserMessagePage,
            Self::ConversationPartners { .. } => EntityKind::ConversationPartners,
            Self::UnreadCount { .. } => EntityKind::UnreadCount,
            Self::OnlineUsers => EntityKind::OnlineUsers,
            Self::UserOnlineStatus { .. } => EntityKind::UserOnlineStatus,
            Self::RecentMessages { .. } => EntityKind::RecentMessages,
            Self::MessageSearch { .. } => EntityKind::MessageSearch,
        }
    }

    /// Encodes the reference into its cache key.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKeyField` when a string field is empty or contains the
    /// delimiter or a control character.
    pub fn encode(&self) -> ParleyResult<CacheKey> {
        let kind = self.kind();
        let tag = kind.tag();

        let key = match self {
            Self::UserProfile { user_id }
            | Self::ConversationPartners { user_id }
            | Self::UnreadCount { user_id }
            | Self::UserOnlineStatus { user_id } => format!("{tag}:{user_id}"),
            Self::UserByUsername { username } => {
                validate_field(kind, "username", username)?;
                format!("{tag}:{username}")
            }
            Self::UserByEmail { email } => {
                validate_field(kind, "email", email)?;
                format!("{tag}:{email}")
            }
            Self::Message { message_id } => format!("{tag}:{message_id}"),
            Self::ConversationPage {
                user_a,
                user_b,
                limit,
                offset,
            } => {
                let (low, high) = ordered_pair(*user_a, *user_b);
                format!("{tag}:{low}:{high}:messages:{limit}:{offset}")
            }
            Self::UserMessagePage {
                user_id,
                limit,
                offset,
            } => format!("{tag}:{user_id}:{limit}:{offset}"),
            Self::OnlineUsers => tag.to_string(),
            Self::RecentMessages { user_id, limit } => format!("{tag}:{user_id}:{limit}"),
            Self::MessageSearch {
                user_id,
                query,
                limit,
            } => {
                validate_field(kind, "query", query)?;
                format!("{tag}:{user_id}:{query}:{limit}")
            }
        };

        Ok(CacheKey(key))
    }

    /// The user whose shard owns the row behind this entry, if any.
    ///
    /// Conversations are owned by the lower id of the pair. Entries that
    /// are not scoped to one user return `None`.
    #[must_use]
    pub fn shard_key(&self) -> Option<UserId> {
        match self {
            Self::UserProfile { user_id }
            | Self::UserMessagePage { user_id, .. }
            | Self::ConversationPartners { user_id }
            | Self::UnreadCount { user_id }
            | Self::UserOnlineStatus { user_id }
            | Self::RecentMessages { user_id, .. }
            | Self::MessageSearch { user_id, .. } => Some(*user_id),
            Self::ConversationPage { user_a, user_b, .. } => {
                Some(ordered_pair(*user_a, *user_b).0)
            }
            Self::UserByUsername { .. }
            | Self::UserByEmail { .. }
            | Self::Message { .. }
            | Self::OnlineUsers => None,
        }
    }

    /// The pattern covering every page of this reference's family.
    #[must_use]
    pub fn family(&self) -> Option<KeyPattern> {
        match self {
            Self::ConversationPage { user_a, user_b, .. } => {
                Some(KeyPattern::for_conversation(*user_a, *user_b))
            }
            Self::UserMessagePage { user_id, .. } => Some(KeyPattern::UserMessagePages {
                user_id: *user_id,
            }),
            Self::RecentMessages { user_id, .. } => Some(KeyPattern::RecentMessages {
                user_id: *user_id,
            }),
            Self::MessageSearch { user_id, .. } => Some(KeyPattern::MessageSearches {
                user_id: *user_id,
            }),
            _ => None,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.encode() {
            Ok(key) => write!(f, "{key}"),
            Err(_) => write!(f, "{}:<invalid>", self.kind().tag()),
        }
    }
}

/// Encoded cache key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Prefix shared by every page of a paginated family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KeyPattern {
    /// All pages of one conversation. Construct with
    /// [`KeyPattern::for_conversation`] to keep the pair ordered.
    ConversationPages { low: UserId, high: UserId },
    /// All pages of a user's message list.
    UserMessagePages { user_id: UserId },
    /// All recent-message lists of a user.
    RecentMessages { user_id: UserId },
    /// All cached searches of a user.
    MessageSearches { user_id: UserId },
}

impl KeyPattern {
    /// Pattern for a conversation, in either order of the pair.
    #[must_use]
    pub fn for_conversation(user_a: UserId, user_b: UserId) -> Self {
        let (low, high) = ordered_pair(user_a, user_b);
        Self::ConversationPages { low, high }
    }

    /// Kind of the keys this pattern covers.
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::ConversationPages { .. } => EntityKind::ConversationPage,
            Self::UserMessagePages { .. } => EntityKind::UserMessagePage,
            Self::RecentMessages { .. } => EntityKind::RecentMessages,
            Self::MessageSearches { .. } => EntityKind::MessageSearch,
        }
    }

    /// Literal prefix of every covered key, including the trailing delimiter.
    #[must_use]
    pub fn prefix(&self) -> String {
        let tag = self.kind().tag();
        match self {
            Self::ConversationPages { low, high } => {
                let (low, high) = ordered_pair(*low, *high);
                format!("{tag}:{low}:{high}:messages:")
            }
            Self::UserMessagePages { user_id }
            | Self::RecentMessages { user_id }
            | Self::MessageSearches { user_id } => {
                format!("{tag}:{user_id}:")
            }
        }
    }

    /// Redis `SCAN MATCH` glob for this pattern.
    #[must_use]
    pub fn to_glob(&self) -> String {
        let prefix = self.prefix();
        let mut glob = String::with_capacity(prefix.len() + 1);
        for c in prefix.chars() {
            if matches!(c, '*' | '?' | '[' | ']' | '\\') {
                glob.push('\\');
            }
            glob.push(c);
        }
        glob.push('*');
        glob
    }

    /// Returns `true` if `key` belongs to this family.
    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        key.starts_with(&self.prefix())
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}*", self.prefix())
    }
}

fn ordered_pair(a: UserId, b: UserId) -> (UserId, UserId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn validate_field(kind: EntityKind, field: &'static str, value: &str) -> ParleyResult<()> {
    if value.is_empty() {
        return Err(ParleyError::invalid_key_field(kind.as_str(), field, "is empty"));
    }
    if value.contains(KEY_DELIMITER) {
        return Err(ParleyError::invalid_key_field(
            kind.as_str(),
            field,
            format!("contains reserved delimiter '{KEY_DELIMITER}'"),
        ));
    }
    if value.chars().any(char::is_control) {
        return Err(ParleyError::invalid_key_field(
            kind.as_str(),
            field,
            "contains a control character",
        ));
    }
    Ok(())
}
