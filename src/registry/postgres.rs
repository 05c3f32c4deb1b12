use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Executor, PgPool, Postgres, Transaction};

use super::{NewToken, RegistryError, TokenRecord, TokenRegistry};
use crate::auth::TokenKind;

const RECORD_COLUMNS: &str = "id, user_id, token, jti, kind, created_at, expires_at, \
                              user_agent, ip_address, is_active, revoked";

/// PostgreSQL-backed registry over the `access_tokens` table.
///
/// Every mutation is a single conditional UPDATE or runs inside one
/// transaction, so concurrent callers are serialized by row locks.
#[derive(Clone)]
pub struct PgTokenRegistry {
    pool: PgPool,
}

impl PgTokenRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_insert_error(err: sqlx::Error, kind: TokenKind) -> RegistryError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            return RegistryError::DuplicateToken(kind);
        }
    }
    RegistryError::from(err)
}

impl From<sqlx::Error> for RegistryError {
    fn from(err: sqlx::Error) -> Self {
        RegistryError::Database(err.to_string())
    }
}

/// Insert one token inside the caller's transaction.
pub(crate) async fn insert_token(
    tx: &mut Transaction<'_, Postgres>,
    new: NewToken,
) -> Result<TokenRecord, RegistryError> {
    let new = new.normalized()?;
    let kind = new.kind;

    sqlx::query_as::<_, TokenRecord>(&format!(
        r#"
        INSERT INTO access_tokens (user_id, token, jti, kind, expires_at, user_agent, ip_address)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {}
        "#,
        RECORD_COLUMNS
    ))
    .bind(new.user_id)
    .bind(new.token)
    .bind(new.jti)
    .bind(new.kind)
    .bind(new.expires_at)
    .bind(new.user_agent)
    .bind(new.ip_address)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| map_insert_error(e, kind))
}

/// Revoke every live token of a user; runs on a pool or inside a transaction.
pub(crate) async fn revoke_user_tokens<'e, E>(executor: E, user_id: i64) -> Result<u64, RegistryError>
where
    E: Executor<'e, Database = Postgres>,
{
    let count = sqlx::query(
        r#"
        UPDATE access_tokens
        SET is_active = false, revoked = true
        WHERE user_id = $1 AND is_active = true AND revoked = false
        "#,
    )
    .bind(user_id)
    .execute(executor)
    .await?
    .rows_affected();

    Ok(count)
}

#[async_trait]
impl TokenRegistry for PgTokenRegistry {
    async fn store(&self, new: NewToken) -> Result<TokenRecord, RegistryError> {
        let mut tx = self.pool.begin().await?;
        let record = insert_token(&mut tx, new).await?;
        tx.commit().await?;

        tracing::info!(user_id = record.user_id, kind = %record.kind, "Stored token");
        Ok(record)
    }

    async fn store_pair(
        &self,
        access: NewToken,
        refresh: NewToken,
    ) -> Result<(TokenRecord, TokenRecord), RegistryError> {
        let mut tx = self.pool.begin().await?;
        let access = insert_token(&mut tx, access).await?;
        let refresh = insert_token(&mut tx, refresh).await?;
        tx.commit().await?;

        tracing::info!(user_id = access.user_id, jti = ?refresh.jti, "Stored token pair");
        Ok((access, refresh))
    }

    async fn rotate(
        &self,
        old_jti: &str,
        access: NewToken,
        refresh: NewToken,
    ) -> Result<Option<(TokenRecord, TokenRecord)>, RegistryError> {
        let mut tx = self.pool.begin().await?;

        // The row lock taken here makes concurrent rotations of the same jti
        // queue up; the loser re-evaluates the WHERE clause and matches nothing.
        let revoked = sqlx::query(
            r#"
            UPDATE access_tokens
            SET is_active = false, revoked = true
            WHERE jti = $1 AND kind = 'refresh' AND is_active = true AND revoked = false
            "#,
        )
        .bind(old_jti)
        .execute(&mut tx)
        .await?
        .rows_affected();

        if revoked == 0 {
            tx.rollback().await?;
            tracing::warn!(jti = old_jti, "Rotation refused: refresh token not live");
            return Ok(None);
        }

        let access = insert_token(&mut tx, access).await?;
        let refresh = insert_token(&mut tx, refresh).await?;
        tx.commit().await?;

        tracing::info!(
            user_id = refresh.user_id,
            old_jti = old_jti,
            new_jti = ?refresh.jti,
            "Rotated refresh token"
        );
        Ok(Some((access, refresh)))
    }

    async fn find_active_access(&self, token: &str) -> Result<Option<TokenRecord>, RegistryError> {
        let record = sqlx::query_as::<_, TokenRecord>(&format!(
            r#"
            SELECT {}
            FROM access_tokens
            WHERE token = $1 AND kind = 'access' AND is_active = true AND revoked = false
            "#,
            RECORD_COLUMNS
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn is_refresh_active(&self, jti: &str) -> Result<bool, RegistryError> {
        let active = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM access_tokens
                WHERE jti = $1 AND kind = 'refresh' AND is_active = true AND revoked = false
            )
            "#,
        )
        .bind(jti)
        .fetch_one(&self.pool)
        .await?;

        Ok(active)
    }

    async fn list_active(&self, user_id: i64) -> Result<Vec<TokenRecord>, RegistryError> {
        let records = sqlx::query_as::<_, TokenRecord>(&format!(
            r#"
            SELECT {}
            FROM access_tokens
            WHERE user_id = $1 AND is_active = true AND revoked = false
            ORDER BY created_at DESC, id DESC
            "#,
            RECORD_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn revoke_by_token(&self, token: &str, kind: TokenKind) -> Result<bool, RegistryError> {
        let affected = sqlx::query(
            r#"
            UPDATE access_tokens
            SET is_active = false, revoked = true
            WHERE token = $1 AND kind = $2 AND is_active = true
            "#,
        )
        .bind(token)
        .bind(kind)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            tracing::debug!(kind = %kind, "No active token to revoke");
        }
        Ok(affected > 0)
    }

    async fn revoke_by_jti(&self, jti: &str) -> Result<bool, RegistryError> {
        let affected = sqlx::query(
            r#"
            UPDATE access_tokens
            SET is_active = false, revoked = true
            WHERE jti = $1 AND kind = 'refresh' AND revoked = false
            "#,
        )
        .bind(jti)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected > 0 {
            tracing::info!(jti = jti, "Revoked refresh token");
        } else {
            tracing::info!(jti = jti, "Refresh token unknown or already revoked");
        }
        Ok(affected > 0)
    }

    async fn revoke_all(&self, user_id: i64) -> Result<u64, RegistryError> {
        let count = revoke_user_tokens(&self.pool, user_id).await?;

        tracing::info!(user_id = user_id, count = count, "Revoked all tokens for user");
        Ok(count)
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, RegistryError> {
        let count = sqlx::query(
            r#"
            UPDATE access_tokens
            SET is_active = false, revoked = true
            WHERE is_active = true AND expires_at IS NOT NULL AND expires_at < $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(count)
    }
}
