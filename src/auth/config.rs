//! Runtime configuration for the auth core.

use anyhow::{Result, anyhow};
use jsonwebtoken::Algorithm;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_ACCESS_TOKEN_TTL_MINUTES: i64 = 30;
/// Access tokens live at most one week.
pub const MAX_ACCESS_TOKEN_TTL_MINUTES: i64 = 7 * 24 * 60;
const DEFAULT_CACHE_TTL_SECONDS: u64 = 15 * 60;
const DEFAULT_CACHE_CONNECT_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_CACHE_RESPONSE_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_JWT_ALGORITHM: Algorithm = Algorithm::HS256;

/// Password reset tokens are valid for one hour.
pub const RESET_TOKEN_TTL_SECONDS: i64 = 60 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    jwt_algorithm: Algorithm,
    access_token_ttl_minutes: i64,
    cache_ttl_seconds: u64,
    cache_connect_timeout_ms: u64,
    cache_response_timeout_ms: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            jwt_algorithm: DEFAULT_JWT_ALGORITHM,
            access_token_ttl_minutes: DEFAULT_ACCESS_TOKEN_TTL_MINUTES,
            cache_ttl_seconds: DEFAULT_CACHE_TTL_SECONDS,
            cache_connect_timeout_ms: DEFAULT_CACHE_CONNECT_TIMEOUT_MS,
            cache_response_timeout_ms: DEFAULT_CACHE_RESPONSE_TIMEOUT_MS,
        }
    }

    #[must_use]
    pub const fn with_jwt_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.jwt_algorithm = algorithm;
        self
    }

    /// Clamped to `1..=MAX_ACCESS_TOKEN_TTL_MINUTES`.
    #[must_use]
    pub const fn with_access_token_ttl_minutes(mut self, minutes: i64) -> Self {
        self.access_token_ttl_minutes = if minutes < 1 {
            1
        } else if minutes > MAX_ACCESS_TOKEN_TTL_MINUTES {
            MAX_ACCESS_TOKEN_TTL_MINUTES
        } else {
            minutes
        };
        self
    }

    #[must_use]
    pub const fn with_cache_ttl_seconds(mut self, seconds: u64) -> Self {
        self.cache_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub const fn with_cache_connect_timeout_ms(mut self, millis: u64) -> Self {
        self.cache_connect_timeout_ms = millis;
        self
    }

    #[must_use]
    pub const fn with_cache_response_timeout_ms(mut self, millis: u64) -> Self {
        self.cache_response_timeout_ms = millis;
        self
    }

    #[must_use]
    pub const fn jwt_algorithm(&self) -> Algorithm {
        self.jwt_algorithm
    }

    #[must_use]
    pub const fn access_token_ttl_minutes(&self) -> i64 {
        self.access_token_ttl_minutes
    }

    #[must_use]
    pub fn access_token_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.access_token_ttl_minutes)
    }

    #[must_use]
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    #[must_use]
    pub const fn cache_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_connect_timeout_ms)
    }

    #[must_use]
    pub const fn cache_response_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_response_timeout_ms)
    }
}

/// Parse an HMAC algorithm name such as `HS256`.
///
/// # Errors
/// Returns an error for unknown or non-HMAC algorithms.
pub fn parse_jwt_algorithm(value: &str) -> Result<Algorithm> {
    let algorithm = Algorithm::from_str(value.trim().to_uppercase().as_str())
        .map_err(|_| anyhow!("unknown JWT algorithm: {value}"))?;
    match algorithm {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Ok(algorithm),
        _ => Err(anyhow!("unsupported JWT algorithm: {value} (use HS256, HS384 or HS512)")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_config_defaults() {
        let config = AuthConfig::new();
        assert_eq!(config.jwt_algorithm(), Algorithm::HS256);
        assert_eq!(config.access_token_ttl_minutes(), 30);
        assert_eq!(config.access_token_ttl().num_seconds(), 1800);
        assert_eq!(config.cache_ttl(), Duration::from_secs(900));
        assert_eq!(config.cache_connect_timeout(), Duration::from_secs(2));
        assert_eq!(config.cache_response_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn auth_config_overrides() {
        let config = AuthConfig::new()
            .with_jwt_algorithm(Algorithm::HS512)
            .with_access_token_ttl_minutes(5)
            .with_cache_ttl_seconds(60)
            .with_cache_connect_timeout_ms(100)
            .with_cache_response_timeout_ms(250);
        assert_eq!(config.jwt_algorithm(), Algorithm::HS512);
        assert_eq!(config.access_token_ttl().num_seconds(), 300);
        assert_eq!(config.cache_ttl(), Duration::from_secs(60));
        assert_eq!(config.cache_connect_timeout(), Duration::from_millis(100));
        assert_eq!(config.cache_response_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn access_token_ttl_is_clamped() {
        let config = AuthConfig::new().with_access_token_ttl_minutes(i64::MAX);
        assert_eq!(config.access_token_ttl_minutes(), MAX_ACCESS_TOKEN_TTL_MINUTES);
        assert_eq!(config.access_token_ttl().num_days(), 7);

        let config = AuthConfig::new().with_access_token_ttl_minutes(0);
        assert_eq!(config.access_token_ttl_minutes(), 1);
    }

    #[test]
    fn jwt_algorithm_parsing() {
        assert_eq!(parse_jwt_algorithm("hs384").ok(), Some(Algorithm::HS384));
        assert!(parse_jwt_algorithm("RS256").is_err());
        assert!(parse_jwt_algorithm("none").is_err());
    }
}
