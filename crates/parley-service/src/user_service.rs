//! User service trait definition.

use async_trait::async_trait;
use parley_core::{NewUser, ParleyResult, User, UserId, UserUpdate};

/// User service trait.
#[async_trait]
pub trait UserService: Send + Sync {
    /// Gets a user by ID.
    async fn get_user(&self, id: UserId) -> ParleyResult<User>;

    /// Gets a user by username.
    async fn get_user_by_username(&self, username: &str) -> ParleyResult<User>;

    /// Gets a user by email.
    async fn get_user_by_email(&self, email: &str) -> ParleyResult<User>;

    /// Creates a new user.
    async fn create_user(&self, user: NewUser) -> ParleyResult<User>;

    /// Updates a user's profile.
    async fn update_user(&self, id: UserId, update: UserUpdate) -> ParleyResult<User>;

    /// Checks if a user exists.
    async fn user_exists(&self, id: UserId) -> ParleyResult<bool>;

    /// Lists users seen within the online window.
    async fn online_users(&self) -> ParleyResult<Vec<User>>;

    /// Records activity for a user.
    async fn update_presence(&self, id: UserId) -> ParleyResult<User>;

    /// Checks whether a user is currently online.
    async fn is_online(&self, id: UserId) -> ParleyResult<bool>;
}
