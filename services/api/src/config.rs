//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

use crate::identity::jwt::SigningAlgorithm;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub db_max_connections: u32,
    pub db_query_timeout: Duration,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_algorithm: SigningAlgorithm,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub refresh_sweep_interval: Duration,
    pub revoked_token_retention: Duration,
    pub storage_root: PathBuf,
    pub public_base_url: String,
    pub max_upload_bytes: u64,
    pub hub_listener_capacity: usize,
    pub shutdown_timeout: Duration,
    pub cors_allowed_origin: String,
}

const MIN_SECRET_LEN: usize = 32;

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let required = |key: &str| lookup(key).ok_or_else(|| ConfigError::MissingVar(key.to_string()));

        // --- Server and Database Settings ---
        let bind_address = parse("BIND_ADDRESS", &var("BIND_ADDRESS", "0.0.0.0:8080"))?;
        let database_url = required("DATABASE_URL")?;

        let log_level_str = var("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let db_max_connections = non_zero(
            "DB_MAX_CONNECTIONS",
            parse("DB_MAX_CONNECTIONS", &var("DB_MAX_CONNECTIONS", "10"))?,
        )?;
        let db_query_timeout = non_zero_secs("DB_QUERY_TIMEOUT_SECS", &var("DB_QUERY_TIMEOUT_SECS", "5"))?;

        // --- Identity Settings ---
        let jwt_secret = required("JWT_SECRET")?;
        if jwt_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::InvalidValue(
                "JWT_SECRET".to_string(),
                format!("must be at least {} bytes", MIN_SECRET_LEN),
            ));
        }
        let jwt_issuer = var("JWT_ISSUER", "unisphere");
        let jwt_algorithm = parse("JWT_ALGORITHM", &var("JWT_ALGORITHM", "HS256"))?;
        let access_token_ttl = secs("ACCESS_TOKEN_TTL_SECS", &var("ACCESS_TOKEN_TTL_SECS", "3600"))?;
        let refresh_token_ttl =
            secs("REFRESH_TOKEN_TTL_SECS", &var("REFRESH_TOKEN_TTL_SECS", "2592000"))?;
        let refresh_sweep_interval = non_zero_secs(
            "REFRESH_SWEEP_INTERVAL_SECS",
            &var("REFRESH_SWEEP_INTERVAL_SECS", "3600"),
        )?;
        let revoked_token_retention = secs(
            "REVOKED_TOKEN_RETENTION_SECS",
            &var("REVOKED_TOKEN_RETENTION_SECS", "604800"),
        )?;

        // --- File Store and Realtime Settings ---
        let storage_root = PathBuf::from(var("STORAGE_ROOT", "./uploads"));
        let public_base_url = var("PUBLIC_BASE_URL", "http://localhost:8080/uploads");
        let max_upload_bytes = parse("MAX_UPLOAD_BYTES", &var("MAX_UPLOAD_BYTES", "16777216"))?;
        let hub_listener_capacity = non_zero(
            "HUB_LISTENER_CAPACITY",
            parse("HUB_LISTENER_CAPACITY", &var("HUB_LISTENER_CAPACITY", "1024"))?,
        )?;
        let shutdown_timeout = secs("SHUTDOWN_TIMEOUT_SECS", &var("SHUTDOWN_TIMEOUT_SECS", "10"))?;
        let cors_allowed_origin = var("CORS_ALLOWED_ORIGIN", "http://localhost:3000");

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            db_max_connections,
            db_query_timeout,
            jwt_secret,
            jwt_issuer,
            jwt_algorithm,
            access_token_ttl,
            refresh_token_ttl,
            refresh_sweep_interval,
            revoked_token_retention,
            storage_root,
            public_base_url,
            max_upload_bytes,
            hub_listener_capacity,
            shutdown_timeout,
            cors_allowed_origin,
        })
    }
}

fn parse<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string()))
}

fn secs(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    parse::<u64>(key, raw).map(Duration::from_secs)
}

/// Channel capacities, pool sizes and tick periods must be positive.
fn non_zero<T>(key: &str, value: T) -> Result<T, ConfigError>
where
    T: PartialEq + Default,
{
    if value == T::default() {
        return Err(ConfigError::InvalidValue(key.to_string(), "must be greater than zero".to_string()));
    }
    Ok(value)
}

fn non_zero_secs(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    non_zero(key, secs(key, raw)?)
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("database_url", &"<redacted>")
            .field("log_level", &self.log_level)
            .field("db_max_connections", &self.db_max_connections)
            .field("db_query_timeout", &self.db_query_timeout)
            .field("jwt_secret", &"<redacted>")
            .field("jwt_issuer", &self.jwt_issuer)
            .field("jwt_algorithm", &self.jwt_algorithm)
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .field("refresh_sweep_interval", &self.refresh_sweep_interval)
            .field("revoked_token_retention", &self.revoked_token_retention)
            .field("storage_root", &self.storage_root)
            .field("public_base_url", &self.public_base_url)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("hub_listener_capacity", &self.hub_listener_capacity)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("cors_allowed_origin", &self.cors_allowed_origin)
            .finish()
    }
}
