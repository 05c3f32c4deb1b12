/// Token Registry
///
/// Durable record of every issued access and refresh token. It is the single
/// source of truth for whether a token is still usable:
/// - every issued token gets a record, active and unrevoked
/// - revocation, rotation and cleanup only ever flip `is_active`/`revoked`
/// - a revoked record is never active again
///
/// The session layer depends on the `TokenRegistry` trait only; `PgTokenRegistry`
/// backs production and `InMemoryTokenRegistry` backs tests and local runs.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::auth::{IssuedToken, TokenKind};

pub use memory::InMemoryTokenRegistry;
pub use postgres::PgTokenRegistry;
pub(crate) use postgres::{insert_token, revoke_user_tokens};

/// One row of the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct TokenRecord {
    pub id: i64,
    pub user_id: i64,
    #[serde(skip_serializing)]
    pub token: String,
    pub jti: Option<String>,
    pub kind: TokenKind,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub is_active: bool,
    pub revoked: bool,
}

impl TokenRecord {
    /// Active and not revoked.
    pub fn is_live(&self) -> bool {
        self.is_active && !self.revoked
    }
}

/// Everything needed to insert a record.
#[derive(Debug, Clone)]
pub struct NewToken {
    pub user_id: i64,
    pub token: String,
    pub kind: TokenKind,
    pub expires_at: Option<DateTime<Utc>>,
    pub jti: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

impl NewToken {
    pub fn from_issued(user_id: i64, issued: &IssuedToken) -> Self {
        Self {
            user_id,
            token: issued.token.clone(),
            kind: issued.kind,
            expires_at: Some(issued.expires_at),
            jti: issued.jti.clone(),
            user_agent: None,
            ip_address: None,
        }
    }

    pub fn with_provenance(mut self, user_agent: Option<String>, ip_address: Option<String>) -> Self {
        self.user_agent = user_agent;
        self.ip_address = ip_address;
        self
    }

    /// Enforce the per-kind contract: refresh needs a `jti`, access never keeps one.
    fn normalized(mut self) -> Result<Self, RegistryError> {
        match self.kind {
            TokenKind::Refresh if self.jti.as_deref().map_or(true, str::is_empty) => {
                Err(RegistryError::MissingJti)
            }
            TokenKind::Access => {
                self.jti = None;
                Ok(self)
            }
            TokenKind::Refresh => Ok(self),
        }
    }
}

#[derive(Debug)]
pub enum RegistryError {
    /// Token string already stored for this kind, or `jti` already taken.
    DuplicateToken(TokenKind),
    /// A refresh token was stored without a `jti`.
    MissingJti,
    Database(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicateToken(kind) => write!(f, "Duplicate {} token", kind),
            RegistryError::MissingJti => write!(f, "Refresh token stored without a jti"),
            RegistryError::Database(msg) => write!(f, "Token registry database error: {}", msg),
        }
    }
}

impl std::error::Error for RegistryError {}

#[async_trait]
pub trait TokenRegistry: Send + Sync {
    /// Insert a new active record.
    async fn store(&self, new: NewToken) -> Result<TokenRecord, RegistryError>;

    /// Insert an access/refresh pair atomically.
    async fn store_pair(
        &self,
        access: NewToken,
        refresh: NewToken,
    ) -> Result<(TokenRecord, TokenRecord), RegistryError>;

    /// Revoke the live refresh record for `old_jti` and store the successor
    /// pair in one atomic step. `None` means the predecessor was not live (or
    /// another caller rotated it first) and nothing was written.
    async fn rotate(
        &self,
        old_jti: &str,
        access: NewToken,
        refresh: NewToken,
    ) -> Result<Option<(TokenRecord, TokenRecord)>, RegistryError>;

    async fn find_active_access(&self, token: &str) -> Result<Option<TokenRecord>, RegistryError>;

    async fn is_refresh_active(&self, jti: &str) -> Result<bool, RegistryError>;

    /// Live records of both kinds for a user, newest first.
    async fn list_active(&self, user_id: i64) -> Result<Vec<TokenRecord>, RegistryError>;

    /// Returns false when there was no active match.
    async fn revoke_by_token(&self, token: &str, kind: TokenKind) -> Result<bool, RegistryError>;

    /// Returns false when the `jti` is unknown or already revoked.
    async fn revoke_by_jti(&self, jti: &str) -> Result<bool, RegistryError>;

    /// Revoke every live record of a user; returns how many were revoked.
    async fn revoke_all(&self, user_id: i64) -> Result<u64, RegistryError>;

    /// Deactivate and revoke every active record that expired before `now`.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, RegistryError>;
}
