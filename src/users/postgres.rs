use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{NewUser, User, UserStore};
use crate::error::AppError;
use crate::registry::{insert_token, revoke_user_tokens, NewToken, TokenRecord};

const USER_COLUMNS: &str = "id, username, email, password_hash, is_active, is_superuser, roles, \
                            last_login_at, password_reset_token, password_reset_token_expires_at, \
                            created_at";

#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_where(&self, condition: &str, value: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE {}",
            USER_COLUMNS, condition
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, new: NewUser) -> Result<User, AppError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (username, email, password_hash, is_active, is_superuser, roles)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(&new.username)
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(new.is_active)
        .bind(new.is_superuser)
        .bind(&new.roles)
        .fetch_one(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        self.find_where("username = $1", username).await
    }

    async fn find_by_login(&self, login: &str) -> Result<Option<User>, AppError> {
        self.find_where("username = $1 OR lower(email) = lower($1) ORDER BY (username = $1) DESC LIMIT 1", login)
            .await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        self.find_where("lower(email) = lower($1)", email).await
    }

    async fn find_by_reset_token(&self, token: &str) -> Result<Option<User>, AppError> {
        self.find_where("password_reset_token = $1", token).await
    }

    async fn open_session(
        &self,
        user_id: i64,
        at: DateTime<Utc>,
        access: NewToken,
        refresh: NewToken,
    ) -> Result<(TokenRecord, TokenRecord), AppError> {
        let mut tx = self.pool.begin().await?;
        let access = insert_token(&mut tx, access).await?;
        let refresh = insert_token(&mut tx, refresh).await?;
        sqlx::query("UPDATE users SET last_login_at = $1, updated_at = now() WHERE id = $2")
            .bind(at)
            .bind(user_id)
            .execute(&mut tx)
            .await?;
        tx.commit().await?;

        Ok((access, refresh))
    }

    async fn set_reset_token(
        &self,
        user_id: i64,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE users
            SET password_reset_token = $1, password_reset_token_expires_at = $2, updated_at = now()
            WHERE id = $3
            "#,
        )
        .bind(token)
        .bind(expires_at)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_reset_token(&self, user_id: i64, token: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE users
            SET password_reset_token = NULL, password_reset_token_expires_at = NULL, updated_at = now()
            WHERE id = $1 AND password_reset_token = $2
            "#,
        )
        .bind(user_id)
        .bind(token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_password_reset(
        &self,
        user_id: i64,
        token: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<u64>, AppError> {
        let mut tx = self.pool.begin().await?;

        // A concurrent consumer blocks on the row lock, then re-checks the
        // token and matches nothing.
        let consumed = sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $1,
                password_reset_token = NULL,
                password_reset_token_expires_at = NULL,
                updated_at = now()
            WHERE id = $2
              AND password_reset_token = $3
              AND password_reset_token_expires_at > $4
              AND is_active = true
            "#,
        )
        .bind(password_hash)
        .bind(user_id)
        .bind(token)
        .bind(now)
        .execute(&mut tx)
        .await?
        .rows_affected();

        if consumed == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let revoked = revoke_user_tokens(&mut tx, user_id).await?;
        tx.commit().await?;
        Ok(Some(revoked))
    }
}
