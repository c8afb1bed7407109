//! services/api/src/identity/password.rs
//!
//! Salted argon2 password hashing and the registration password policy.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use tracing::error;
use unisphere_core::ports::{PortError, PortResult};

const MIN_PASSWORD_LEN: usize = 8;

/// Produces a PHC string for storage.
pub fn hash_password(password: &str) -> PortResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!("Failed to hash password: {:?}", e);
            PortError::Unexpected("failed to hash password".to_string())
        })
}

/// A malformed stored hash counts as a mismatch.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let parsed = match PasswordHash::new(stored_hash) {
        Ok(parsed) => parsed,
        Err(e) => {
            error!("Failed to parse password hash: {:?}", e);
            return false;
        }
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// At least eight characters with an upper case letter, a lower case letter and a digit.
pub fn check_password_policy(password: &str) -> PortResult<()> {
    let long_enough = password.chars().count() >= MIN_PASSWORD_LEN;
    let upper = password.chars().any(|c| c.is_ascii_uppercase());
    let lower = password.chars().any(|c| c.is_ascii_lowercase());
    let digit = password.chars().any(|c| c.is_ascii_digit());
    if long_enough && upper && lower && digit {
        Ok(())
    } else {
        Err(PortError::BadRequest(
            "password must be at least 8 characters and mix upper case, lower case and digits"
                .to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_verify_only_the_original_password() {
        let hash = hash_password("Aa12abcd").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("Aa12abcd", &hash));
        assert!(!verify_password("Aa12abce", &hash));
        assert!(!verify_password("Aa12abcd", "not-a-phc-string"));
    }

    #[test]
    fn password_policy() {
        assert!(check_password_policy("Aa12abcd").is_ok());
        assert!(check_password_policy("Aa1abcd").is_err());
        assert!(check_password_policy("aa12abcd").is_err());
        assert!(check_password_policy("AA12ABCD").is_err());
        assert!(check_password_policy("Aaaaabcd").is_err());
    }
}
