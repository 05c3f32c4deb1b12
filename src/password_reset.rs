//! Password-Reset Flow
//!
//! Per-user states: NoResetPending -> ResetPending -> Consumed | Expired.
//! The reset token lives on the user record; a new request overwrites any
//! pending one. A successful reset revokes every session of the user.

use async_trait::async_trait;
use bcrypt::DEFAULT_COST;
use chrono::{Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use std::sync::Arc;

use crate::auth::{hash_with_cost, validate_password_strength};
use crate::error::{AppError, AuthError, ConfigError};
use crate::users::{User, UserStore};
use crate::validators::is_valid_email;

const RESET_TOKEN_LENGTH: usize = 43;

/// Returned for every reset request, whether or not the account exists.
pub const RESET_REQUESTED_MESSAGE: &str =
    "If an account with that email exists, a password reset link has been sent.";

/// Out-of-band delivery of reset tokens.
#[async_trait]
pub trait ResetNotifier: Send + Sync {
    async fn send_reset(&self, user: &User, token: &str) -> Result<(), AppError>;
}

/// Used when no email service is configured. Never logs the token.
pub struct LogNotifier;

#[async_trait]
impl ResetNotifier for LogNotifier {
    async fn send_reset(&self, user: &User, _token: &str) -> Result<(), AppError> {
        tracing::warn!(
            user_id = user.id,
            "Password reset requested but email delivery is not configured"
        );
        Ok(())
    }
}

/// ~256 bits of alphanumeric randomness.
pub fn generate_reset_token() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RESET_TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

#[derive(Clone)]
pub struct PasswordResetService {
    users: Arc<dyn UserStore>,
    notifier: Arc<dyn ResetNotifier>,
    token_ttl: Duration,
    hash_cost: u32,
}

impl PasswordResetService {
    /// Fails on a non-positive `token_ttl`, which would issue dead tokens.
    pub fn new(
        users: Arc<dyn UserStore>,
        notifier: Arc<dyn ResetNotifier>,
        token_ttl: Duration,
    ) -> Result<Self, AppError> {
        if token_ttl <= Duration::zero() {
            return Err(ConfigError::InvalidValue(
                "password_reset.token_expiry must be positive".to_string(),
            )
            .into());
        }

        Ok(Self {
            users,
            notifier,
            token_ttl,
            hash_cost: DEFAULT_COST,
        })
    }

    /// bcrypt cost for the new password hash.
    pub fn with_hash_cost(mut self, cost: u32) -> Self {
        self.hash_cost = cost;
        self
    }

    /// Start a reset for the account owning `email`.
    ///
    /// Only a malformed address is an error. Whether the account exists or
    /// delivery worked is visible in the logs alone.
    pub async fn request_reset(&self, email: &str) -> Result<&'static str, AppError> {
        let email = is_valid_email(email)?;
        let Some(user) = self.users.find_by_email(&email).await? else {
            tracing::info!("Password reset requested for unknown email");
            return Ok(RESET_REQUESTED_MESSAGE);
        };

        let token = generate_reset_token();
        let expires_at = Utc::now() + self.token_ttl;
        self.users.set_reset_token(user.id, &token, expires_at).await?;
        tracing::info!(user_id = user.id, expires_at = %expires_at, "Created password reset token");

        if let Err(e) = self.notifier.send_reset(&user, &token).await {
            tracing::error!(user_id = user.id, error = %e, "Failed to deliver password reset token");
        }

        Ok(RESET_REQUESTED_MESSAGE)
    }

    /// Consume a reset token and set a new password.
    pub async fn consume_reset(&self, token: &str, new_password: &str) -> Result<(), AppError> {
        if token.is_empty() {
            return Err(AuthError::ResetTokenInvalid.into());
        }
        let user = self
            .users
            .find_by_reset_token(token)
            .await?
            .ok_or(AuthError::ResetTokenInvalid)?;

        let live = user
            .password_reset_token_expires_at
            .map_or(false, |expires_at| expires_at > Utc::now());
        if !live {
            self.users.clear_reset_token(user.id, token).await?;
            tracing::info!(user_id = user.id, "Cleared expired password reset token");
            return Err(AuthError::ResetTokenInvalid.into());
        }

        if !user.is_active {
            return Err(AuthError::ResetUserInactive.into());
        }

        validate_password_strength(new_password)?;
        let password_hash = hash_with_cost(new_password, self.hash_cost)?;
        let revoked = self
            .users
            .complete_password_reset(user.id, token, &password_hash, Utc::now())
            .await?
            .ok_or_else(|| {
                tracing::warn!(user_id = user.id, "Password reset token consumed concurrently");
                AuthError::ResetTokenInvalid
            })?;
        tracing::info!(
            user_id = user.id,
            revoked_sessions = revoked,
            "Password reset completed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenKind;
    use crate::registry::{InMemoryTokenRegistry, NewToken, TokenRegistry};
    use crate::users::{InMemoryUserStore, NewUser};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(i64, String)>>,
    }

    #[async_trait]
    impl ResetNotifier for RecordingNotifier {
        async fn send_reset(&self, user: &User, token: &str) -> Result<(), AppError> {
            self.sent.lock().unwrap().push((user.id, token.to_string()));
            Ok(())
        }
    }

    struct Fixture {
        service: PasswordResetService,
        users: Arc<InMemoryUserStore>,
        registry: Arc<InMemoryTokenRegistry>,
        notifier: Arc<RecordingNotifier>,
        user_id: i64,
    }

    async fn fixture() -> Fixture {
        let registry = Arc::new(InMemoryTokenRegistry::new());
        let users = Arc::new(InMemoryUserStore::new(registry.clone()));
        let notifier = Arc::new(RecordingNotifier::default());
        let user = users
            .create(NewUser {
                username: "jane".to_string(),
                email: "jane@example.com".to_string(),
                password_hash: hash_with_cost("OldPassw0rd", 4).unwrap(),
                is_active: true,
                is_superuser: false,
                roles: Vec::new(),
            })
            .await
            .unwrap();
        let service = PasswordResetService::new(users.clone(), notifier.clone(), Duration::hours(1))
            .unwrap()
            .with_hash_cost(4);

        Fixture {
            service,
            users,
            registry,
            notifier,
            user_id: user.id,
        }
    }

    #[test]
    fn test_generate_reset_token() {
        let token = generate_reset_token();
        assert_eq!(token.len(), RESET_TOKEN_LENGTH);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(token, generate_reset_token());
    }

    #[tokio::test]
    async fn unknown_email_gets_same_answer_and_no_side_effects() {
        let f = fixture().await;

        let unknown = f.service.request_reset("ghost@example.com").await.unwrap();
        let known = f.service.request_reset(" Jane@Example.com ").await.unwrap();

        assert_eq!(unknown, known);
        let sent = f.notifier.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, f.user_id);
    }

    #[tokio::test]
    async fn malformed_email_is_a_validation_error() {
        let f = fixture().await;
        assert!(matches!(
            f.service.request_reset("not-an-email").await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn new_request_overwrites_pending_token() {
        let f = fixture().await;
        f.service.request_reset("jane@example.com").await.unwrap();
        f.service.request_reset("jane@example.com").await.unwrap();

        let sent = f.notifier.sent.lock().unwrap().clone();
        let (first, second) = (&sent[0].1, &sent[1].1);

        assert!(matches!(
            f.service.consume_reset(first, "NewPassw0rd1").await,
            Err(AppError::Auth(AuthError::ResetTokenInvalid))
        ));
        f.service.consume_reset(second, "NewPassw0rd1").await.unwrap();
    }

    #[tokio::test]
    async fn reset_sets_password_clears_token_and_revokes_sessions() {
        let f = fixture().await;
        f.registry
            .store(NewToken {
                user_id: f.user_id,
                token: "access-1".to_string(),
                kind: TokenKind::Access,
                expires_at: Some(Utc::now() + Duration::hours(1)),
                jti: None,
                user_agent: None,
                ip_address: None,
            })
            .await
            .unwrap();

        f.service.request_reset("jane@example.com").await.unwrap();
        let token = f.notifier.sent.lock().unwrap()[0].1.clone();
        f.service.consume_reset(&token, "NewPassw0rd1").await.unwrap();

        let user = f.users.find_by_id(f.user_id).await.unwrap().unwrap();
        assert!(crate::auth::verify_password("NewPassw0rd1", &user.password_hash));
        assert!(user.password_reset_token.is_none());
        assert!(user.password_reset_token_expires_at.is_none());
        assert!(f.registry.list_active(f.user_id).await.unwrap().is_empty());

        // Single use.
        assert!(matches!(
            f.service.consume_reset(&token, "OtherPassw0rd1").await,
            Err(AppError::Auth(AuthError::ResetTokenInvalid))
        ));
    }

    #[tokio::test]
    async fn expired_token_fails_and_is_cleared() {
        let f = fixture().await;
        f.service.request_reset("jane@example.com").await.unwrap();
        let token = f.notifier.sent.lock().unwrap()[0].1.clone();
        f.users
            .set_reset_token_expiry(f.user_id, Utc::now() - Duration::minutes(1));

        assert!(matches!(
            f.service.consume_reset(&token, "NewPassw0rd1").await,
            Err(AppError::Auth(AuthError::ResetTokenInvalid))
        ));
        let user = f.users.find_by_id(f.user_id).await.unwrap().unwrap();
        assert!(user.password_reset_token.is_none());
    }

    #[tokio::test]
    async fn inactive_user_and_weak_password_are_rejected() {
        let f = fixture().await;
        f.service.request_reset("jane@example.com").await.unwrap();
        let token = f.notifier.sent.lock().unwrap()[0].1.clone();

        assert!(matches!(
            f.service.consume_reset(&token, "weak").await,
            Err(AppError::Validation(_))
        ));

        f.users.set_active(f.user_id, false);
        assert!(matches!(
            f.service.consume_reset(&token, "NewPassw0rd1").await,
            Err(AppError::Auth(AuthError::ResetUserInactive))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_consumers_of_one_token_have_a_single_winner() {
        for _ in 0..20 {
            let f = fixture().await;
            f.service.request_reset("jane@example.com").await.unwrap();
            let token = f.notifier.sent.lock().unwrap()[0].1.clone();

            let handles: Vec<_> = ["FirstPassw0rd1", "SecondPassw0rd1"]
                .into_iter()
                .map(|password| {
                    let service = f.service.clone();
                    let token = token.clone();
                    tokio::spawn(async move { service.consume_reset(&token, password).await })
                })
                .collect();

            let mut winners = 0;
            for handle in handles {
                match handle.await.unwrap() {
                    Ok(()) => winners += 1,
                    Err(e) => assert!(matches!(e, AppError::Auth(AuthError::ResetTokenInvalid))),
                }
            }
            assert_eq!(winners, 1);

            let user = f.users.find_by_id(f.user_id).await.unwrap().unwrap();
            assert!(user.password_reset_token.is_none());
        }
    }

    #[tokio::test]
    async fn expired_cleanup_keeps_a_newer_token() {
        let f = fixture().await;
        f.service.request_reset("jane@example.com").await.unwrap();
        let stale = f.notifier.sent.lock().unwrap()[0].1.clone();
        f.service.request_reset("jane@example.com").await.unwrap();
        let fresh = f.notifier.sent.lock().unwrap()[1].1.clone();

        f.users.clear_reset_token(f.user_id, &stale).await.unwrap();

        let user = f.users.find_by_id(f.user_id).await.unwrap().unwrap();
        assert_eq!(user.password_reset_token.as_deref(), Some(fresh.as_str()));
    }

    #[test]
    fn non_positive_token_ttl_is_rejected() {
        let registry = Arc::new(InMemoryTokenRegistry::new());
        let users = Arc::new(InMemoryUserStore::new(registry));
        for ttl in [Duration::zero(), Duration::seconds(-5)] {
            let result =
                PasswordResetService::new(users.clone(), Arc::new(RecordingNotifier::default()), ttl);
            assert!(matches!(
                result,
                Err(AppError::Config(ConfigError::InvalidValue(_)))
            ));
        }
    }
}
