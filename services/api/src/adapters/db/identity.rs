//! Users and refresh tokens.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use unisphere_core::domain::{NewUser, RefreshToken, User};
use unisphere_core::ports::{PortResult, RefreshTokenRepository, UserRepository};

use super::{DbAdapter, UserRecord, USER_COLUMNS};

#[derive(FromRow)]
struct RefreshTokenRecord {
    token: String,
    user_id: i64,
    expires_at: DateTime<Utc>,
    revoked: bool,
    created_at: DateTime<Utc>,
}
impl RefreshTokenRecord {
    fn to_domain(self) -> RefreshToken {
        RefreshToken {
            token: self.token,
            user_id: self.user_id,
            expires_at: self.expires_at,
            revoked: self.revoked,
            created_at: self.created_at,
        }
    }
}

#[async_trait]
impl UserRepository for DbAdapter {
    async fn create_user(&self, user: NewUser) -> PortResult<User> {
        let sql = format!(
            "INSERT INTO users (email, password_hash, role) VALUES ($1, $2, $3) RETURNING {}",
            USER_COLUMNS
        );
        let record = self
            .timed(
                format!("user {}", user.email),
                sqlx::query_as::<_, UserRecord>(&sql)
                    .bind(&user.email)
                    .bind(&user.password_hash)
                    .bind(user.role.as_str())
                    .fetch_one(&self.pool),
            )
            .await?;
        record.to_domain()
    }

    async fn find_user_by_id(&self, user_id: i64) -> PortResult<User> {
        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        let record = self
            .timed(
                format!("user {}", user_id),
                sqlx::query_as::<_, UserRecord>(&sql)
                    .bind(user_id)
                    .fetch_one(&self.pool),
            )
            .await?;
        record.to_domain()
    }

    async fn find_user_by_email(&self, email: &str) -> PortResult<User> {
        let sql = format!("SELECT {} FROM users WHERE email = $1", USER_COLUMNS);
        let record = self
            .timed(
                "user",
                sqlx::query_as::<_, UserRecord>(&sql)
                    .bind(email)
                    .fetch_one(&self.pool),
            )
            .await?;
        record.to_domain()
    }

    async fn set_profile_photo(&self, user_id: i64, file_id: Option<i64>) -> PortResult<Option<i64>> {
        self.timed(format!("user {}", user_id), async {
            let mut tx = self.pool.begin().await?;
            let previous: Option<i64> =
                sqlx::query_scalar("SELECT profile_photo_id FROM users WHERE id = $1 FOR UPDATE")
                    .bind(user_id)
                    .fetch_one(&mut *tx)
                    .await?;
            sqlx::query("UPDATE users SET profile_photo_id = $2, updated_at = now() WHERE id = $1")
                .bind(user_id)
                .bind(file_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok::<_, sqlx::Error>(previous)
        })
        .await
    }
}

#[async_trait]
impl RefreshTokenRepository for DbAdapter {
    async fn insert_refresh_token(&self, token: RefreshToken) -> PortResult<()> {
        self.timed(
            format!("refresh token for user {}", token.user_id),
            sqlx::query(
                "INSERT INTO refresh_tokens (token, user_id, expires_at, revoked, created_at) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(&token.token)
            .bind(token.user_id)
            .bind(token.expires_at)
            .bind(token.revoked)
            .bind(token.created_at)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn find_refresh_token(&self, token: &str) -> PortResult<Option<RefreshToken>> {
        let record = self
            .timed(
                "refresh token",
                sqlx::query_as::<_, RefreshTokenRecord>(
                    "SELECT token, user_id, expires_at, revoked, created_at \
                     FROM refresh_tokens WHERE token = $1",
                )
                .bind(token)
                .fetch_optional(&self.pool),
            )
            .await?;
        Ok(record.map(RefreshTokenRecord::to_domain))
    }

    async fn revoke_refresh_token(&self, token: &str) -> PortResult<bool> {
        // The `NOT revoked` guard makes exactly one concurrent caller win.
        let result = self
            .timed(
                "refresh token",
                sqlx::query(
                    "UPDATE refresh_tokens SET revoked = TRUE, revoked_at = now() \
                     WHERE token = $1 AND NOT revoked",
                )
                .bind(token)
                .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn purge_refresh_tokens(
        &self,
        now: DateTime<Utc>,
        revoked_before: DateTime<Utc>,
    ) -> PortResult<u64> {
        let result = self
            .timed(
                "refresh tokens",
                sqlx::query(
                    "DELETE FROM refresh_tokens \
                     WHERE expires_at < $1 OR (revoked AND COALESCE(revoked_at, created_at) < $2)",
                )
                .bind(now)
                .bind(revoked_before)
                .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected())
    }
}
