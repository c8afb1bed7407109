//! services/api/src/identity/mod.rs
//!
//! Issues and validates access and refresh credentials.

pub mod jwt;
pub mod password;
pub mod service;

pub use jwt::{extract_bearer, AccessClaims, SigningAlgorithm, TokenSigner};
pub use service::{AuthUser, IdentityService, TokenPair};

/// Reasons a credential is rejected. All of them surface as 401.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("invalid authorization format")]
    InvalidFormat,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("token expired")]
    TokenExpired,
    #[error("token revoked")]
    TokenRevoked,
    #[error("token not found")]
    TokenNotFound,
    #[error("invalid email or password")]
    InvalidCredentials,
}
