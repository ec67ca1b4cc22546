//! User service implementation.

use crate::repository::UserRepository;
use crate::user_service::UserService;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use parley_cache::{CacheGateway, EntityRef, UserKeys, WriteOp};
use parley_core::{
    NewUser, ParleyError, ParleyResult, User, UserId, UserUpdate, ONLINE_WINDOW_MINUTES,
};
use std::sync::Arc;
use tracing::{debug, info};

/// User service backed by the sharded store and the cache gateway.
pub struct UserServiceImpl<R: UserRepository> {
    user_repository: Arc<R>,
    cache: CacheGateway,
}

impl<R: UserRepository> UserServiceImpl<R> {
    /// Creates a new user service.
    pub fn new(user_repository: Arc<R>, cache: CacheGateway) -> Self {
        Self {
            user_repository,
            cache,
        }
    }

    /// Caches a freshly written user under all three lookups.
    async fn prime_user(&self, user: &User) -> ParleyResult<()> {
        self.cache
            .prime(&EntityRef::user_profile(user.id), user, None)
            .await?;
        self.cache
            .prime(&EntityRef::user_by_username(user.username.as_str()), user, None)
            .await?;
        self.cache
            .prime(&EntityRef::user_by_email(user.email.as_str()), user, None)
            .await
    }
}

/// Usernames and emails become cache key fields.
fn validate_handle(field: &str, value: &str) -> ParleyResult<()> {
    if value.trim().is_empty() {
        return Err(ParleyError::validation(format!("{} cannot be empty", field)));
    }
    if value.contains(':') || value.chars().any(char::is_control) {
        return Err(ParleyError::validation(format!(
            "{} contains invalid characters",
            field
        )));
    }
    Ok(())
}

fn validate_user(username: &str, email: &str) -> ParleyResult<()> {
    validate_handle("Username", username)?;
    validate_handle("Email", email)?;
    if !email.contains('@') {
        return Err(ParleyError::validation("Email must contain '@'"));
    }
    Ok(())
}

#[async_trait]
impl<R: UserRepository + 'static> UserService for UserServiceImpl<R> {
    async fn get_user(&self, id: UserId) -> ParleyResult<User> {
        debug!("Getting user: {}", id);

        self.cache
            .read_through_optional(&EntityRef::user_profile(id), None, || {
                self.user_repository.find_by_id(id)
            })
            .await?
            .ok_or_else(|| ParleyError::not_found("User", id))
    }

    async fn get_user_by_username(&self, username: &str) -> ParleyResult<User> {
        debug!("Getting user by username: {}", username);

        self.cache
            .read_through_optional(&EntityRef::user_by_username(username), None, || {
                self.user_repository.find_by_username(username)
            })
            .await?
            .ok_or_else(|| ParleyError::not_found("User", username))
    }

    async fn get_user_by_email(&self, email: &str) -> ParleyResult<User> {
        debug!("Getting user by email: {}", email);

        self.cache
            .read_through_optional(&EntityRef::user_by_email(email), None, || {
                self.user_repository.find_by_email(email)
            })
            .await?
            .ok_or_else(|| ParleyError::not_found("User", email))
    }

    async fn create_user(&self, user: NewUser) -> ParleyResult<User> {
        debug!("Creating user: {}", user.username);

        validate_user(&user.username, &user.email)?;

        let created = self
            .cache
            .write_then_invalidate_op(
                || self.user_repository.insert(user),
                |u| WriteOp::UserCreated {
                    user_id: u.id,
                    keys: UserKeys::from(u),
                },
            )
            .await?;
        self.prime_user(&created).await?;

        info!("User created: {}", created.id);
        Ok(created)
    }

    async fn update_user(&self, id: UserId, update: UserUpdate) -> ParleyResult<User> {
        debug!("Updating user: {}", id);

        let mut user = self
            .user_repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| ParleyError::not_found("User", id))?;
        let previous = UserKeys::from(&user);

        update.apply_to(&mut user);
        validate_user(&user.username, &user.email)?;

        let updated = self
            .cache
            .write_then_invalidate_op(
                || self.user_repository.update(&user),
                |u| WriteOp::UserUpdated {
                    user_id: u.id,
                    previous,
                    current: UserKeys::from(u),
                },
            )
            .await?;
        self.prime_user(&updated).await?;

        info!("User updated: {}", updated.id);
        Ok(updated)
    }

    async fn user_exists(&self, id: UserId) -> ParleyResult<bool> {
        match self.get_user(id).await {
            Ok(_) => Ok(true),
            Err(ParleyError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn online_users(&self) -> ParleyResult<Vec<User>> {
        self.cache
            .read_through(&EntityRef::OnlineUsers, None, || {
                let since = Utc::now() - Duration::minutes(ONLINE_WINDOW_MINUTES);
                self.user_repository.find_online(since)
            })
            .await
    }

    async fn update_presence(&self, id: UserId) -> ParleyResult<User> {
        debug!("Updating presence of user {}", id);

        let user = self
            .cache
            .write_then_invalidate_op(
                || async {
                    self.user_repository
                        .touch_last_seen(id, Utc::now())
                        .await?
                        .ok_or_else(|| ParleyError::not_found("User", id))
                },
                |u| WriteOp::PresenceChanged {
                    user_id: u.id,
                    keys: UserKeys::from(u),
                },
            )
            .await?;
        self.prime_user(&user).await?;

        Ok(user)
    }

    async fn is_online(&self, id: UserId) -> ParleyResult<bool> {
        self.cache
            .read_through(&EntityRef::user_online_status(id), None, || async {
                let user = self
                    .user_repository
                    .find_by_id(id)
                    .await?
                    .ok_or_else(|| ParleyError::not_found("User", id))?;
                Ok(user.is_online_at(Utc::now()))
            })
            .await
    }
}
