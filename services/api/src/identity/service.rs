//! services/api/src/identity/service.rs
//!
//! Login, refresh rotation, logout and bearer authentication.
//!
//! Refresh credentials are opaque random strings stored server-side. Each one
//! can be exchanged exactly once: the exchange revokes it before a new pair is
//! issued, and a second exchange fails with `TokenRevoked`.

use argon2::password_hash::rand_core::{OsRng, RngCore};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use unisphere_core::domain::{NewUser, RefreshToken, Role, User};
use unisphere_core::ports::{PortError, RefreshTokenRepository, UserRepository};
use uuid::Uuid;

use super::jwt::{extract_bearer, AccessClaims, TokenSigner};
use super::password::{check_password_policy, hash_password, verify_password};
use super::TokenError;
use crate::error::ApiError;

/// The authenticated caller, placed into request extensions by the auth middleware.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub id: i64,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Seconds.
    pub expires_in: i64,
    /// Seconds.
    pub refresh_expires_in: i64,
}

pub struct IdentityService {
    users: Arc<dyn UserRepository>,
    tokens: Arc<dyn RefreshTokenRepository>,
    signer: TokenSigner,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl IdentityService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        tokens: Arc<dyn RefreshTokenRepository>,
        signer: TokenSigner,
        access_ttl: std::time::Duration,
        refresh_ttl: std::time::Duration,
    ) -> Self {
        Self {
            users,
            tokens,
            signer,
            access_ttl: to_chrono(access_ttl),
            refresh_ttl: to_chrono(refresh_ttl),
        }
    }

    pub async fn register(&self, email: &str, password: &str, role: Role) -> Result<User, ApiError> {
        let email = normalize_email(email)?;
        if role == Role::Admin {
            return Err(ApiError::bad_request("administrators cannot self-register"));
        }
        check_password_policy(password)?;

        let password_hash = hash_password(password)?;
        let user = self
            .users
            .create_user(NewUser {
                email,
                password_hash,
                role,
            })
            .await?;
        info!(user_id = user.id, role = %user.role, "user registered");
        Ok(user)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<TokenPair, ApiError> {
        let email = normalize_email(email)?;
        if password.is_empty() {
            return Err(ApiError::bad_request("password is required"));
        }

        let user = match self.users.find_user_by_email(&email).await {
            Ok(user) => user,
            Err(PortError::NotFound(_)) => {
                debug!("login for unknown email");
                return Err(TokenError::InvalidCredentials.into());
            }
            Err(e) => return Err(e.into()),
        };

        if !verify_password(password, &user.password_hash) {
            debug!(user_id = user.id, "login with wrong password");
            return Err(TokenError::InvalidCredentials.into());
        }
        if !user.active {
            warn!(user_id = user.id, "login for deactivated account");
            return Err(TokenError::InvalidCredentials.into());
        }

        self.issue_pair(&user, Utc::now()).await
    }

    /// Exchanges a refresh credential for a new pair, revoking it.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        let now = Utc::now();
        let record = self
            .tokens
            .find_refresh_token(refresh_token)
            .await?
            .ok_or(TokenError::TokenNotFound)?;

        if record.expires_at < now {
            if !record.revoked {
                self.tokens.revoke_refresh_token(refresh_token).await?;
            }
            return Err(TokenError::TokenExpired.into());
        }
        if record.revoked {
            warn!(user_id = record.user_id, "revoked refresh token presented");
            return Err(TokenError::TokenRevoked.into());
        }
        // Only the caller that flips the flag may proceed.
        if !self.tokens.revoke_refresh_token(refresh_token).await? {
            warn!(user_id = record.user_id, "refresh token raced and lost");
            return Err(TokenError::TokenRevoked.into());
        }

        let user = self.users.find_user_by_id(record.user_id).await?;
        if !user.active {
            return Err(TokenError::InvalidCredentials.into());
        }
        self.issue_pair(&user, now).await
    }

    /// Revokes the refresh credential. Revoking twice is fine; an unknown one is not.
    pub async fn logout(&self, refresh_token: &str) -> Result<(), ApiError> {
        let record = self
            .tokens
            .find_refresh_token(refresh_token)
            .await?
            .ok_or(TokenError::TokenNotFound)?;
        if !record.revoked {
            self.tokens.revoke_refresh_token(refresh_token).await?;
            info!(user_id = record.user_id, "logged out");
        }
        Ok(())
    }

    /// Validates an `Authorization` header value.
    pub fn authenticate(&self, header_value: &str) -> Result<AuthUser, TokenError> {
        let token = extract_bearer(header_value)?;
        let claims = self.signer.verify(token, Utc::now())?;
        let role = claims
            .role_type
            .parse::<Role>()
            .map_err(|_| TokenError::InvalidToken("unknown role".to_string()))?;
        Ok(AuthUser {
            id: claims.user_id,
            email: claims.email,
            role,
        })
    }

    /// Deletes expired tokens and revoked ones older than `retention`.
    pub async fn purge_refresh_tokens(&self, retention: std::time::Duration) -> Result<u64, ApiError> {
        let now = Utc::now();
        let purged = self
            .tokens
            .purge_refresh_tokens(now, now - to_chrono(retention))
            .await?;
        Ok(purged)
    }

    async fn issue_pair(&self, user: &User, now: DateTime<Utc>) -> Result<TokenPair, ApiError> {
        let claims = AccessClaims {
            user_id: user.id,
            email: user.email.clone(),
            role_type: user.role.as_str().to_string(),
            iss: self.signer.issuer().to_string(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: (now + self.access_ttl).timestamp(),
            sub: user.id.to_string(),
            jti: Uuid::new_v4().to_string(),
        };
        let access_token = self.signer.sign(&claims)?;

        let refresh_token = random_token();
        self.tokens
            .insert_refresh_token(RefreshToken {
                token: refresh_token.clone(),
                user_id: user.id,
                expires_at: now + self.refresh_ttl,
                revoked: false,
                created_at: now,
            })
            .await?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_in: self.access_ttl.num_seconds(),
            refresh_expires_in: self.refresh_ttl.num_seconds(),
        })
    }
}

fn random_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn normalize_email(email: &str) -> Result<String, ApiError> {
    let email = email.trim().to_ascii_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(ApiError::bad_request("a valid email is required")),
    }
}

fn to_chrono(d: std::time::Duration) -> Duration {
    Duration::from_std(d).unwrap_or_else(|_| Duration::days(36_500))
}
