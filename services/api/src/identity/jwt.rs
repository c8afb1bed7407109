//! services/api/src/identity/jwt.rs
//!
//! Compact signed envelopes (`header.claims.signature`, base64url without
//! padding) with an HMAC signature. The algorithm is fixed when the signer is
//! built; envelopes whose header names any other algorithm are rejected.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha384, Sha512};
use std::str::FromStr;
use std::sync::OnceLock;

use super::TokenError;

/// Clock skew tolerated on `nbf`.
const NBF_LEEWAY_SECS: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningAlgorithm {
    Hs256,
    Hs384,
    Hs512,
}

impl SigningAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            SigningAlgorithm::Hs256 => "HS256",
            SigningAlgorithm::Hs384 => "HS384",
            SigningAlgorithm::Hs512 => "HS512",
        }
    }

    fn sign(&self, key: &[u8], message: &[u8]) -> Result<Vec<u8>, TokenError> {
        let tag = match self {
            SigningAlgorithm::Hs256 => keyed::<Hmac<Sha256>>(key, message)?.finalize().into_bytes().to_vec(),
            SigningAlgorithm::Hs384 => keyed::<Hmac<Sha384>>(key, message)?.finalize().into_bytes().to_vec(),
            SigningAlgorithm::Hs512 => keyed::<Hmac<Sha512>>(key, message)?.finalize().into_bytes().to_vec(),
        };
        Ok(tag)
    }

    /// Constant-time comparison of the expected and provided tags.
    fn verify(&self, key: &[u8], message: &[u8], tag: &[u8]) -> Result<bool, TokenError> {
        let ok = match self {
            SigningAlgorithm::Hs256 => keyed::<Hmac<Sha256>>(key, message)?.verify_slice(tag).is_ok(),
            SigningAlgorithm::Hs384 => keyed::<Hmac<Sha384>>(key, message)?.verify_slice(tag).is_ok(),
            SigningAlgorithm::Hs512 => keyed::<Hmac<Sha512>>(key, message)?.verify_slice(tag).is_ok(),
        };
        Ok(ok)
    }
}

impl FromStr for SigningAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HS256" => Ok(SigningAlgorithm::Hs256),
            "HS384" => Ok(SigningAlgorithm::Hs384),
            "HS512" => Ok(SigningAlgorithm::Hs512),
            other => Err(format!("unsupported signing algorithm '{}'", other)),
        }
    }
}

fn keyed<M>(key: &[u8], message: &[u8]) -> Result<M, TokenError>
where
    M: Mac + KeyInit,
{
    let mut mac = <M as KeyInit>::new_from_slice(key)
        .map_err(|_| TokenError::InvalidToken("unusable signing key".to_string()))?;
    mac.update(message);
    Ok(mac)
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

/// Claims carried by an access credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessClaims {
    #[serde(rename = "userId")]
    pub user_id: i64,
    pub email: String,
    #[serde(rename = "roleType")]
    pub role_type: String,
    pub iss: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    /// Always the decimal `user_id`.
    pub sub: String,
    pub jti: String,
}

#[derive(Clone)]
pub struct TokenSigner {
    algorithm: SigningAlgorithm,
    secret: Vec<u8>,
    issuer: String,
}

impl TokenSigner {
    pub fn new(algorithm: SigningAlgorithm, secret: &[u8], issuer: impl Into<String>) -> Self {
        Self {
            algorithm,
            secret: secret.to_vec(),
            issuer: issuer.into(),
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn sign(&self, claims: &AccessClaims) -> Result<String, TokenError> {
        let header = Header {
            alg: self.algorithm.name().to_string(),
            typ: "JWT".to_string(),
        };
        let header_json = serde_json::to_vec(&header)
            .map_err(|e| TokenError::InvalidToken(format!("encode header: {}", e)))?;
        let claims_json = serde_json::to_vec(claims)
            .map_err(|e| TokenError::InvalidToken(format!("encode claims: {}", e)))?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header_json),
            URL_SAFE_NO_PAD.encode(claims_json)
        );
        let tag = self.algorithm.sign(&self.secret, signing_input.as_bytes())?;
        Ok(format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(tag)))
    }

    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<AccessClaims, TokenError> {
        let parts: Vec<&str> = token.split('.').collect();
        let [header_b64, claims_b64, tag_b64] = parts.as_slice() else {
            return Err(TokenError::InvalidFormat);
        };

        let header: Header = decode_json(header_b64, "header")?;
        if header.alg != self.algorithm.name() {
            return Err(TokenError::InvalidToken(format!(
                "unexpected algorithm '{}'",
                header.alg
            )));
        }

        let tag = URL_SAFE_NO_PAD
            .decode(tag_b64)
            .map_err(|_| TokenError::InvalidToken("malformed signature".to_string()))?;
        let signing_input = format!("{}.{}", header_b64, claims_b64);
        if !self.algorithm.verify(&self.secret, signing_input.as_bytes(), &tag)? {
            return Err(TokenError::InvalidToken("signature mismatch".to_string()));
        }

        let claims: AccessClaims = decode_json(claims_b64, "claims")?;
        if claims.iss != self.issuer {
            return Err(TokenError::InvalidToken("unexpected issuer".to_string()));
        }
        if claims.sub != claims.user_id.to_string() {
            return Err(TokenError::InvalidToken("subject does not match user".to_string()));
        }
        let now = now.timestamp();
        if claims.nbf > now + NBF_LEEWAY_SECS {
            return Err(TokenError::InvalidToken("token not yet valid".to_string()));
        }
        if claims.exp <= now {
            return Err(TokenError::TokenExpired);
        }
        Ok(claims)
    }
}

fn decode_json<T: for<'de> Deserialize<'de>>(part: &str, what: &str) -> Result<T, TokenError> {
    let raw = URL_SAFE_NO_PAD
        .decode(part)
        .map_err(|_| TokenError::InvalidToken(format!("malformed {}", what)))?;
    serde_json::from_slice(&raw).map_err(|_| TokenError::InvalidToken(format!("malformed {}", what)))
}

fn envelope_shape() -> &'static Regex {
    static SHAPE: OnceLock<Regex> = OnceLock::new();
    SHAPE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+$").expect("static pattern")
    })
}

/// Accepts `Bearer <envelope>` or a bare three-part envelope.
pub fn extract_bearer(value: &str) -> Result<&str, TokenError> {
    let value = value.trim();
    if let Some(rest) = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
    {
        let rest = rest.trim();
        if rest.is_empty() {
            return Err(TokenError::InvalidFormat);
        }
        return Ok(rest);
    }
    if envelope_shape().is_match(value) {
        Ok(value)
    } else {
        Err(TokenError::InvalidFormat)
    }
}
