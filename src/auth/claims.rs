/// JWT Claims structure
///
/// Typed payload shared by issuance and verification, so both sides agree on
/// shape at compile time. Access tokens carry roles; refresh tokens carry a
/// `jti` that the registry uses as the revocation handle.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The two kinds of bearer token the service issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "token_kind", rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who a token is issued to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub username: String,
    pub user_id: i64,
    pub roles: Vec<String>,
}

/// JWT claims for both token kinds
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Subject (username)
    pub sub: String,
    /// Numeric user id
    pub user_id: i64,
    /// Role list, access tokens only
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    #[serde(rename = "type")]
    pub kind: TokenKind,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Issuer
    pub iss: String,
    /// Session identifier, refresh tokens only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    /// Per-token randomness for access tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl Claims {
    pub fn access(subject: &Subject, issued_at: i64, expires_at: i64, issuer: &str) -> Self {
        Self {
            sub: subject.username.clone(),
            user_id: subject.user_id,
            roles: subject.roles.clone(),
            kind: TokenKind::Access,
            exp: expires_at,
            iat: issued_at,
            iss: issuer.to_string(),
            jti: None,
            nonce: Some(uuid::Uuid::new_v4().simple().to_string()),
        }
    }

    pub fn refresh(
        subject: &Subject,
        issued_at: i64,
        expires_at: i64,
        issuer: &str,
        jti: String,
    ) -> Self {
        Self {
            sub: subject.username.clone(),
            user_id: subject.user_id,
            roles: Vec::new(),
            kind: TokenKind::Refresh,
            exp: expires_at,
            iat: issued_at,
            iss: issuer.to_string(),
            jti: Some(jti),
            nonce: None,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.exp <= chrono::Utc::now().timestamp()
    }
}
