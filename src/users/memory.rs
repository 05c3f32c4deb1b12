use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{NewUser, User, UserStore};
use crate::error::{AppError, DatabaseError};
use crate::registry::{InMemoryTokenRegistry, NewToken, TokenRecord};

/// User store kept in process memory, for tests and local runs.
///
/// Linked to the registry holding the users' tokens so that login and
/// password reset touch both under the user lock. Lock order is always
/// users, then registry.
pub struct InMemoryUserStore {
    users: Mutex<Vec<User>>,
    registry: Arc<InMemoryTokenRegistry>,
}

impl InMemoryUserStore {
    pub fn new(registry: Arc<InMemoryTokenRegistry>) -> Self {
        Self {
            users: Mutex::new(Vec::new()),
            registry,
        }
    }

    /// Flip the active flag, standing in for account management.
    pub fn set_active(&self, user_id: i64, active: bool) {
        if let Some(user) = self.lock().iter_mut().find(|u| u.id == user_id) {
            user.is_active = active;
        }
    }

    /// Force the reset-token expiry, e.g. into the past.
    pub fn set_reset_token_expiry(&self, user_id: i64, expires_at: DateTime<Utc>) {
        if let Some(user) = self.lock().iter_mut().find(|u| u.id == user_id) {
            user.password_reset_token_expires_at = Some(expires_at);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<User>> {
        self.users.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn find(&self, predicate: impl Fn(&User) -> bool) -> Option<User> {
        self.lock().iter().find(|u| predicate(u)).cloned()
    }

    fn update(&self, user_id: i64, change: impl FnOnce(&mut User)) {
        if let Some(user) = self.lock().iter_mut().find(|u| u.id == user_id) {
            change(user);
        }
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn create(&self, new: NewUser) -> Result<User, AppError> {
        let mut users = self.lock();
        if users
            .iter()
            .any(|u| u.username == new.username || u.email.eq_ignore_ascii_case(&new.email))
        {
            return Err(DatabaseError::UniqueConstraintViolation(
                "username or email already registered".to_string(),
            )
            .into());
        }

        let user = User {
            id: users.len() as i64 + 1,
            username: new.username,
            email: new.email,
            password_hash: new.password_hash,
            is_active: new.is_active,
            is_superuser: new.is_superuser,
            roles: new.roles,
            last_login_at: None,
            password_reset_token: None,
            password_reset_token_expires_at: None,
            created_at: Utc::now(),
        };
        users.push(user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, AppError> {
        Ok(self.find(|u| u.id == id))
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        Ok(self.find(|u| u.username == username))
    }

    async fn find_by_login(&self, login: &str) -> Result<Option<User>, AppError> {
        Ok(self
            .find(|u| u.username == login)
            .or_else(|| self.find(|u| u.email.eq_ignore_ascii_case(login))))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        Ok(self.find(|u| u.email.eq_ignore_ascii_case(email)))
    }

    async fn find_by_reset_token(&self, token: &str) -> Result<Option<User>, AppError> {
        Ok(self.find(|u| u.password_reset_token.as_deref() == Some(token)))
    }

    async fn open_session(
        &self,
        user_id: i64,
        at: DateTime<Utc>,
        access: NewToken,
        refresh: NewToken,
    ) -> Result<(TokenRecord, TokenRecord), AppError> {
        let mut users = self.lock();
        let pair = self.registry.store_pair_now(access, refresh)?;
        if let Some(user) = users.iter_mut().find(|u| u.id == user_id) {
            user.last_login_at = Some(at);
        }
        Ok(pair)
    }

    async fn set_reset_token(
        &self,
        user_id: i64,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.update(user_id, |u| {
            u.password_reset_token = Some(token.to_string());
            u.password_reset_token_expires_at = Some(expires_at);
        });
        Ok(())
    }

    async fn clear_reset_token(&self, user_id: i64, token: &str) -> Result<(), AppError> {
        self.update(user_id, |u| {
            if u.password_reset_token.as_deref() == Some(token) {
                u.password_reset_token = None;
                u.password_reset_token_expires_at = None;
            }
        });
        Ok(())
    }

    async fn complete_password_reset(
        &self,
        user_id: i64,
        token: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<u64>, AppError> {
        let mut users = self.lock();
        let Some(user) = users.iter_mut().find(|u| {
            u.id == user_id
                && u.password_reset_token.as_deref() == Some(token)
                && u.password_reset_token_expires_at.map_or(false, |at| at > now)
                && u.is_active
        }) else {
            return Ok(None);
        };

        user.password_hash = password_hash.to_string();
        user.password_reset_token = None;
        user.password_reset_token_expires_at = None;
        Ok(Some(self.registry.revoke_all_now(user_id)))
    }
}
