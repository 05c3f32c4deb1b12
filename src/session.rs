/// Session Protocol
///
/// Ties token issuance to the registry:
/// - login issues an access/refresh pair and records both
/// - refresh verifies, checks the registry, and rotates (the old refresh token
///   becomes permanently unusable)
/// - logout revokes one refresh token, logout-all revokes everything a user holds
///
/// Session states: Issued -> Active -> Rotated | Revoked | Expired.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use crate::auth::{
    verify_against_dummy, verify_password, Claims, IssuedToken, Subject, TokenCodec, TokenKind,
};
use crate::error::{AppError, AuthError};
use crate::registry::{NewToken, TokenRecord, TokenRegistry};
use crate::users::{User, UserStore};

/// Provenance captured from the request that created a token.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

/// Authentication response with access and refresh tokens
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    pub refresh_token: String,
}

#[derive(Clone)]
pub struct SessionService {
    codec: TokenCodec,
    registry: Arc<dyn TokenRegistry>,
    users: Arc<dyn UserStore>,
}

impl SessionService {
    pub fn new(codec: TokenCodec, registry: Arc<dyn TokenRegistry>, users: Arc<dyn UserStore>) -> Self {
        Self {
            codec,
            registry,
            users,
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn registry(&self) -> &Arc<dyn TokenRegistry> {
        &self.registry
    }

    /// Authenticate by username or email and open a new session.
    ///
    /// Unknown user, wrong password and inactive account all produce the same
    /// `InvalidCredentials`.
    pub async fn login(
        &self,
        login: &str,
        password: &str,
        client: &ClientInfo,
    ) -> Result<TokenPair, AppError> {
        let user = match self.users.find_by_login(login.trim()).await? {
            Some(user) if verify_password(password, &user.password_hash) && user.is_active => user,
            Some(user) => {
                tracing::warn!(user_id = user.id, "Login rejected");
                return Err(AuthError::InvalidCredentials.into());
            }
            None => {
                verify_against_dummy(password);
                tracing::warn!("Login rejected for unknown account");
                return Err(AuthError::InvalidCredentials.into());
            }
        };

        let (access, refresh) = self.issue_pair(&user.subject())?;
        self.users
            .open_session(
                user.id,
                Utc::now(),
                to_record(user.id, &access, client),
                to_record(user.id, &refresh, client),
            )
            .await?;

        tracing::info!(user_id = user.id, jti = ?refresh.jti, "User logged in");
        Ok(self.pair(access, refresh))
    }

    /// Exchange a refresh token for a new pair, revoking the presented one.
    ///
    /// Two concurrent calls with the same token cannot both succeed: the
    /// registry's `rotate` admits exactly one of them.
    pub async fn refresh(&self, refresh_token: &str, client: &ClientInfo) -> Result<TokenPair, AppError> {
        let claims = self
            .codec
            .verify(refresh_token, TokenKind::Refresh)
            .map_err(|e| {
                tracing::warn!(reason = %e, "Refresh token rejected by codec");
                AuthError::InvalidToken("Invalid refresh token payload".to_string())
            })?;
        let jti = claims
            .jti
            .as_deref()
            .ok_or_else(|| AuthError::InvalidToken("Invalid refresh token payload".to_string()))?;

        if !self.registry.is_refresh_active(jti).await? {
            tracing::warn!(user_id = claims.user_id, jti = jti, "Refresh with revoked or unknown token");
            return Err(AuthError::TokenRevokedOrExpired.into());
        }

        let user = self
            .users
            .find_by_username(&claims.sub)
            .await?
            .filter(|user| user.is_active)
            .ok_or(AuthError::UserInactiveOrMissing)?;

        let (access, refresh) = self.issue_pair(&user.subject())?;
        let rotated = self
            .registry
            .rotate(
                jti,
                to_record(user.id, &access, client),
                to_record(user.id, &refresh, client),
            )
            .await?;

        if rotated.is_none() {
            tracing::warn!(user_id = user.id, jti = jti, "Refresh lost rotation race");
            return Err(AuthError::TokenRevokedOrExpired.into());
        }

        tracing::info!(user_id = user.id, old_jti = jti, new_jti = ?refresh.jti, "Token refreshed");
        Ok(self.pair(access, refresh))
    }

    /// End the session a refresh token belongs to.
    ///
    /// Succeeds for already revoked tokens too; returns whether anything was
    /// revoked by this call.
    pub async fn logout(&self, refresh_token: &str) -> Result<bool, AppError> {
        let claims = self
            .codec
            .verify(refresh_token, TokenKind::Refresh)
            .map_err(|_| AuthError::InvalidToken("Invalid refresh token for logout".to_string()))?;
        let jti = claims
            .jti
            .as_deref()
            .ok_or_else(|| AuthError::InvalidToken("Invalid refresh token for logout".to_string()))?;

        let revoked = self.registry.revoke_by_jti(jti).await?;
        tracing::info!(user_id = claims.user_id, jti = jti, revoked = revoked, "User logged out");
        Ok(revoked)
    }

    /// Revoke every live token of the user; returns the count.
    pub async fn logout_all(&self, user_id: i64) -> Result<u64, AppError> {
        let count = self.registry.revoke_all(user_id).await?;
        tracing::info!(user_id = user_id, count = count, "User logged out from all sessions");
        Ok(count)
    }

    /// Resolve a bearer access token to its claims.
    ///
    /// The token must verify and still be live in the registry, so access
    /// tokens stop working as soon as their session is revoked.
    pub async fn authenticate(&self, access_token: &str) -> Result<Claims, AppError> {
        let claims = self
            .codec
            .verify(access_token, TokenKind::Access)
            .map_err(|e| AuthError::InvalidToken(format!("Could not validate credentials: {}", e)))?;

        if self.registry.find_active_access(access_token).await?.is_none() {
            tracing::warn!(user_id = claims.user_id, "Access token revoked or unknown");
            return Err(AuthError::TokenRevokedOrExpired.into());
        }

        Ok(claims)
    }

    pub async fn active_sessions(&self, user_id: i64) -> Result<Vec<TokenRecord>, AppError> {
        Ok(self.registry.list_active(user_id).await?)
    }

    pub async fn current_user(&self, user_id: i64) -> Result<User, AppError> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .filter(|user| user.is_active)
            .ok_or(AuthError::UserInactiveOrMissing)?;
        Ok(user)
    }

    fn issue_pair(&self, subject: &Subject) -> Result<(IssuedToken, IssuedToken), AppError> {
        let access = self.codec.issue_access(subject, self.codec.access_ttl())?;
        let refresh = self.codec.issue_refresh(subject, self.codec.refresh_ttl())?;
        Ok((access, refresh))
    }

    fn pair(&self, access: IssuedToken, refresh: IssuedToken) -> TokenPair {
        TokenPair {
            access_token: access.token,
            token_type: "bearer".to_string(),
            expires_in: self.codec.access_ttl().num_seconds(),
            refresh_token: refresh.token,
        }
    }
}

fn to_record(user_id: i64, issued: &IssuedToken, client: &ClientInfo) -> NewToken {
    NewToken::from_issued(user_id, issued)
        .with_provenance(client.user_agent.clone(), client.ip_address.clone())
}
