/// User Store
///
/// The slice of the user entity the auth flows need: credential lookup,
/// last-login bookkeeping and the password-reset fields that live on the user
/// record. Account management itself belongs to the wider application.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::auth::Subject;
use crate::error::AppError;
use crate::registry::{NewToken, TokenRecord};

pub use memory::InMemoryUserStore;
pub use postgres::PgUserStore;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub is_active: bool,
    pub is_superuser: bool,
    pub roles: Vec<String>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub password_reset_token: Option<String>,
    pub password_reset_token_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn subject(&self) -> Subject {
        Subject {
            username: self.username.clone(),
            user_id: self.id,
            roles: self.roles.clone(),
        }
    }
}

/// What `GET /auth/me` exposes.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub is_superuser: bool,
    pub roles: Vec<String>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            is_superuser: user.is_superuser,
            roles: user.roles,
            last_login_at: user.last_login_at,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub is_active: bool,
    pub is_superuser: bool,
    pub roles: Vec<String>,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, new: NewUser) -> Result<User, AppError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, AppError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AppError>;

    /// Login accepts either the username or the email address.
    async fn find_by_login(&self, login: &str) -> Result<Option<User>, AppError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError>;

    async fn find_by_reset_token(&self, token: &str) -> Result<Option<User>, AppError>;

    /// Store a login's token pair and stamp `last_login_at`, all or nothing.
    async fn open_session(
        &self,
        user_id: i64,
        at: DateTime<Utc>,
        access: NewToken,
        refresh: NewToken,
    ) -> Result<(TokenRecord, TokenRecord), AppError>;

    /// Overwrites any pending reset token.
    async fn set_reset_token(
        &self,
        user_id: i64,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    /// Clears the reset fields only while `token` is still the pending one.
    async fn clear_reset_token(&self, user_id: i64, token: &str) -> Result<(), AppError>;

    /// Consume `token` and set the new password hash, revoking every live
    /// token of the user in the same step.
    ///
    /// Succeeds only if `token` is still the user's pending token and has not
    /// expired at `now`; returns the number of revoked tokens, or `None` when
    /// the token was already consumed, replaced or expired.
    async fn complete_password_reset(
        &self,
        user_id: i64,
        token: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<u64>, AppError>;
}
