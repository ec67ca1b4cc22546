//! Direct message model.

use crate::{MessageId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A direct message row, distributed by `sender_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub content: String,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub message_type: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Checks whether `user` is the sender or the recipient.
    #[must_use]
    pub fn involves(&self, user: UserId) -> bool {
        self.sender_id == user || self.recipient_id == user
    }

    /// Returns the other participant from `user`'s point of view.
    #[must_use]
    pub fn partner_of(&self, user: UserId) -> UserId {
        if self.sender_id == user {
            self.recipient_id
        } else {
            self.sender_id
        }
    }
}

/// Fields required to send a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub content: String,
    #[serde(default = "default_message_type")]
    pub message_type: String,
}

fn default_message_type() -> String {
    "text".to_string()
}

impl NewMessage {
    /// Creates a plain text message.
    #[must_use]
    pub fn text(sender_id: UserId, recipient_id: UserId, content: impl Into<String>) -> Self {
        Self {
            sender_id,
            recipient_id,
            content: content.into(),
            message_type: default_message_type(),
        }
    }
}

/// One entry of a user's conversation partner list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationPartner {
    pub user_id: UserId,
    pub display_name: String,
    /// Messages from this partner the viewer has not read yet.
    pub unread_count: u64,
}
