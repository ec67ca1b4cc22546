//! User model.

use crate::UserId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// How long after `last_seen` a user still counts as online.
pub const ONLINE_WINDOW_MINUTES: i64 = 5;

/// A user row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Primary key, also the shard key.
    pub id: UserId,
    /// Unique username.
    pub username: String,
    /// Unique email address.
    pub email: String,
    /// Optional display name.
    pub display_name: Option<String>,
    /// Optional avatar URL.
    pub avatar_url: Option<String>,
    /// Whether the account is active.
    pub is_active: bool,
    /// Last time the user was seen.
    pub last_seen: Option<DateTime<Utc>>,
    /// IANA timezone name.
    pub timezone: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Returns the display name, falling back to the username.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }

    /// Checks whether the user was seen inside the online window.
    #[must_use]
    pub fn is_online_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self
                .last_seen
                .is_some_and(|seen| seen >= now - Duration::minutes(ONLINE_WINDOW_MINUTES))
    }
}

/// Fields required to create a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub display_name: Option<String>,
}

/// A partial update of a user's profile. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub timezone: Option<String>,
    pub is_active: Option<bool>,
}

impl UserUpdate {
    /// Applies the update to a user in place.
    pub fn apply_to(&self, user: &mut User) {
        if let Some(username) = &self.username {
            user.username.clone_from(username);
        }
        if let Some(email) = &self.email {
            user.email.clone_from(email);
        }
        if let Some(display_name) = &self.display_name {
            user.display_name = Some(display_name.clone());
        }
        if let Some(avatar_url) = &self.avatar_url {
            user.avatar_url = Some(avatar_url.clone());
        }
        if let Some(timezone) = &self.timezone {
            user.timezone.clone_from(timezone);
        }
        if let Some(is_active) = self.is_active {
            user.is_active = is_active;
        }
    }
}
