// Configuration for the identity core
// Values come from the process environment (optionally seeded by a .env file)

use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::Duration;
use tracing::warn;

use crate::auth::error::AuthError;

/// Upper bound for every day-based lifetime and the cleanup grace period
const MAX_LIFETIME_DAYS: i64 = 3650;
const MAX_LIFETIME_MINUTES: i64 = MAX_LIFETIME_DAYS * 24 * 60;
const MAX_CLEANUP_INTERVAL_SECONDS: u64 = 7 * 24 * 60 * 60;

/// Identity and session lifecycle configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// HMAC secret for access tokens
    pub access_secret: String,
    /// HMAC secret for refresh tokens, must differ from `access_secret`
    pub refresh_secret: String,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_days: i64,
    pub issuer: String,
    pub audience: String,
    /// Refresh tokens kept per user after each login
    pub max_refresh_tokens_per_user: i64,
    pub reset_token_ttl_minutes: i64,
    pub session_ttl_days: i64,
    /// Days an expired row is kept before the cleanup sweep removes it
    pub cleanup_grace_days: i64,
    pub cleanup_interval_seconds: u64,
    /// Argon2 memory cost in KiB
    pub password_hash_memory_kib: u32,
    /// Argon2 iteration count
    pub password_hash_iterations: u32,
    /// Adds the `Secure` attribute to auth cookies
    pub cookie_secure: bool,
}

impl AuthConfig {
    /// Build a configuration with the given secrets and default values for everything else
    pub fn new(access_secret: impl Into<String>, refresh_secret: impl Into<String>) -> Self {
        Self {
            access_secret: access_secret.into(),
            refresh_secret: refresh_secret.into(),
            access_ttl_minutes: 15,
            refresh_ttl_days: 30,
            issuer: "contract-review-api".to_string(),
            audience: "contract-review-client".to_string(),
            max_refresh_tokens_per_user: 5,
            reset_token_ttl_minutes: 60,
            session_ttl_days: 30,
            cleanup_grace_days: 7,
            cleanup_interval_seconds: 3600,
            password_hash_memory_kib: 19456,
            password_hash_iterations: 2,
            cookie_secure: false,
        }
    }

    /// Load configuration from environment variables
    ///
    /// `JWT_ACCESS_SECRET` and `JWT_REFRESH_SECRET` are required.
    /// Every other variable falls back to the defaults of [`AuthConfig::new`].
    pub fn from_env() -> Result<Self, AuthError> {
        let access_secret = required("JWT_ACCESS_SECRET")?;
        let refresh_secret = required("JWT_REFRESH_SECRET")?;
        let defaults = Self::new(access_secret, refresh_secret);

        let config = Self {
            access_ttl_minutes: parse_or("JWT_ACCESS_TTL_MINUTES", defaults.access_ttl_minutes)?,
            refresh_ttl_days: parse_or("JWT_REFRESH_TTL_DAYS", defaults.refresh_ttl_days)?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| defaults.issuer.clone()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| defaults.audience.clone()),
            max_refresh_tokens_per_user: parse_or(
                "MAX_REFRESH_TOKENS_PER_USER",
                defaults.max_refresh_tokens_per_user,
            )?,
            reset_token_ttl_minutes: parse_or(
                "RESET_TOKEN_TTL_MINUTES",
                defaults.reset_token_ttl_minutes,
            )?,
            session_ttl_days: parse_or("SESSION_TTL_DAYS", defaults.session_ttl_days)?,
            cleanup_grace_days: parse_or("CLEANUP_GRACE_DAYS", defaults.cleanup_grace_days)?,
            cleanup_interval_seconds: parse_or(
                "CLEANUP_INTERVAL_SECONDS",
                defaults.cleanup_interval_seconds,
            )?,
            password_hash_memory_kib: parse_or(
                "PASSWORD_HASH_MEMORY_KIB",
                defaults.password_hash_memory_kib,
            )?,
            password_hash_iterations: parse_or(
                "PASSWORD_HASH_ITERATIONS",
                defaults.password_hash_iterations,
            )?,
            cookie_secure: parse_or("COOKIE_SECURE", defaults.cookie_secure)?,
            ..defaults
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    ///
    /// An access TTL that is not shorter than the refresh TTL is allowed but
    /// logged, since it is an operator decision rather than a hard error.
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.access_secret.is_empty() || self.refresh_secret.is_empty() {
            return Err(AuthError::ConfigError("JWT secrets must not be empty".to_string()));
        }
        if self.access_secret == self.refresh_secret {
            return Err(AuthError::ConfigError(
                "JWT_ACCESS_SECRET and JWT_REFRESH_SECRET must differ".to_string(),
            ));
        }
        check_range("JWT_ACCESS_TTL_MINUTES", self.access_ttl_minutes, 1, MAX_LIFETIME_MINUTES)?;
        check_range("JWT_REFRESH_TTL_DAYS", self.refresh_ttl_days, 1, MAX_LIFETIME_DAYS)?;
        check_range("RESET_TOKEN_TTL_MINUTES", self.reset_token_ttl_minutes, 1, MAX_LIFETIME_MINUTES)?;
        check_range("SESSION_TTL_DAYS", self.session_ttl_days, 1, MAX_LIFETIME_DAYS)?;
        check_range("CLEANUP_GRACE_DAYS", self.cleanup_grace_days, 0, MAX_LIFETIME_DAYS)?;
        if self.max_refresh_tokens_per_user < 1 {
            return Err(AuthError::ConfigError(
                "MAX_REFRESH_TOKENS_PER_USER must be at least 1".to_string(),
            ));
        }
        if self.cleanup_interval_seconds == 0
            || self.cleanup_interval_seconds > MAX_CLEANUP_INTERVAL_SECONDS
        {
            return Err(AuthError::ConfigError(format!(
                "CLEANUP_INTERVAL_SECONDS must be between 1 and {}",
                MAX_CLEANUP_INTERVAL_SECONDS
            )));
        }
        if self.access_ttl() >= self.refresh_ttl() {
            warn!(
                access_ttl_minutes = self.access_ttl_minutes,
                refresh_ttl_days = self.refresh_ttl_days,
                "Access tokens live as long as refresh tokens; consider a shorter JWT_ACCESS_TTL_MINUTES"
            );
        }
        Ok(())
    }

    pub fn access_ttl(&self) -> Duration {
        Duration::minutes(self.access_ttl_minutes)
    }

    pub fn refresh_ttl(&self) -> Duration {
        Duration::days(self.refresh_ttl_days)
    }

    pub fn reset_token_ttl(&self) -> Duration {
        Duration::minutes(self.reset_token_ttl_minutes)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::days(self.session_ttl_days)
    }

    pub fn cleanup_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.cleanup_interval_seconds)
    }
}

fn required(key: &str) -> Result<String, AuthError> {
    std::env::var(key).map_err(|_| AuthError::ConfigError(format!("{} must be set", key)))
}

fn check_range(key: &str, value: i64, min: i64, max: i64) -> Result<(), AuthError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(AuthError::ConfigError(format!(
            "{} must be between {} and {}, got {}",
            key, min, max, value
        )))
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> Result<T, AuthError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AuthError::ConfigError(format!("{} has an invalid value: {}", key, raw))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = AuthConfig::new("access", "refresh");
        assert_eq!(config.access_ttl(), Duration::minutes(15));
        assert_eq!(config.refresh_ttl(), Duration::days(30));
        assert_eq!(config.max_refresh_tokens_per_user, 5);
        assert_eq!(config.reset_token_ttl(), Duration::hours(1));
        assert_eq!(config.cleanup_grace_days, 7);
        assert_eq!(config.cleanup_interval(), StdDuration::from_secs(3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_identical_secrets_are_rejected() {
        let config = AuthConfig::new("same", "same");
        assert!(matches!(config.validate(), Err(AuthError::ConfigError(_))));
    }

    #[test]
    fn test_long_access_ttl_is_allowed() {
        let mut config = AuthConfig::new("access", "refresh");
        config.access_ttl_minutes = 7 * 24 * 60;
        config.refresh_ttl_days = 7;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_cleanup_interval_is_rejected() {
        let mut config = AuthConfig::new("access", "refresh");
        config.cleanup_interval_seconds = 0;
        assert!(matches!(config.validate(), Err(AuthError::ConfigError(_))));

        config.cleanup_interval_seconds = MAX_CLEANUP_INTERVAL_SECONDS + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_positive_lifetimes_are_rejected() {
        for value in [0, -5] {
            let mut config = AuthConfig::new("access", "refresh");
            config.reset_token_ttl_minutes = value;
            assert!(config.validate().is_err(), "reset ttl {} accepted", value);

            let mut config = AuthConfig::new("access", "refresh");
            config.session_ttl_days = value;
            assert!(config.validate().is_err(), "session ttl {} accepted", value);

            let mut config = AuthConfig::new("access", "refresh");
            config.access_ttl_minutes = value;
            assert!(config.validate().is_err(), "access ttl {} accepted", value);
        }
    }

    #[test]
    fn test_oversized_day_counts_are_rejected() {
        let mut config = AuthConfig::new("access", "refresh");
        config.cleanup_grace_days = i64::MAX;
        assert!(config.validate().is_err());

        let mut config = AuthConfig::new("access", "refresh");
        config.session_ttl_days = MAX_LIFETIME_DAYS + 1;
        assert!(config.validate().is_err());

        let mut config = AuthConfig::new("access", "refresh");
        config.refresh_ttl_days = i64::MAX / 2;
        assert!(config.validate().is_err());

        let mut config = AuthConfig::new("access", "refresh");
        config.cleanup_grace_days = 0;
        config.session_ttl_days = MAX_LIFETIME_DAYS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_retention_is_rejected() {
        let mut config = AuthConfig::new("access", "refresh");
        config.max_refresh_tokens_per_user = 0;
        assert!(config.validate().is_err());
    }
}
