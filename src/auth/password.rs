// Password hashing and validation service

use argon2::{password_hash::Output, Algorithm, Argon2, Params, Version};
use rand::{rngs::OsRng, RngCore};
use tracing::warn;

use crate::auth::{error::AuthError, models::PasswordStrength};

const SALT_LEN: usize = 16;
const DIGEST_LEN: usize = 64;
const MIN_LENGTH: usize = 8;
const MAX_LENGTH: usize = 128;
/// Salt for derivations whose result is thrown away
const DUMMY_SALT: [u8; SALT_LEN] = [0x5a; SALT_LEN];

/// Common passwords refused regardless of composition (compared lowercased)
const COMMON_PASSWORDS: &[&str] = &[
    "password",
    "password1",
    "password123",
    "password1!",
    "123456",
    "12345678",
    "123456789",
    "qwerty",
    "qwerty123",
    "abc123",
    "111111",
    "letmein",
    "welcome",
    "welcome1!",
    "admin",
    "admin123!",
    "iloveyou",
    "monkey",
    "dragon",
    "football",
    "p@ssw0rd",
    "p@ssword1",
];

/// Password service for hashing and verification
///
/// Stored values have the form `hex(salt):hex(digest)`, where the digest is a
/// raw Argon2id derivation with the cost parameters given at construction.
/// The parameters are not encoded in the stored value, so they must stay fixed
/// for the lifetime of a deployment.
#[derive(Debug, Clone)]
pub struct PasswordService {
    params: Params,
}

impl PasswordService {
    /// Create a service with the given Argon2 memory cost (KiB) and iteration count
    pub fn new(memory_kib: u32, iterations: u32) -> Result<Self, AuthError> {
        let params = Params::new(memory_kib, iterations, 1, Some(DIGEST_LEN))
            .map_err(|e| AuthError::ConfigError(format!("invalid password hash parameters: {}", e)))?;
        Ok(Self { params })
    }

    fn derive(&self, password: &str, salt: &[u8]) -> Result<[u8; DIGEST_LEN], AuthError> {
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone());
        let mut digest = [0u8; DIGEST_LEN];
        argon2
            .hash_password_into(password.as_bytes(), salt, &mut digest)
            .map_err(|e| AuthError::PasswordHashError(e.to_string()))?;
        Ok(digest)
    }

    /// Hash a password with a fresh random salt
    pub fn hash(&self, password: &str) -> Result<String, AuthError> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);

        let digest = self.derive(password, &salt)?;
        Ok(format!("{}:{}", hex::encode(salt), hex::encode(digest)))
    }

    /// Verify a password against a stored `salt:digest` value
    ///
    /// Values without a delimiter predate the current format and never match;
    /// those accounts have to go through a password reset.
    pub fn compare(&self, password: &str, stored: &str) -> Result<bool, AuthError> {
        let Some((salt_hex, digest_hex)) = stored.split_once(':') else {
            warn!("Stored password hash uses the legacy format; reset required");
            return Ok(false);
        };

        let (Ok(salt), Ok(expected)) = (hex::decode(salt_hex), hex::decode(digest_hex)) else {
            warn!("Stored password hash is not valid hex");
            return Ok(false);
        };
        if expected.len() != DIGEST_LEN {
            return Ok(false);
        }

        let actual = self.derive(password, &salt)?;

        // Output equality is constant-time
        let actual = Output::new(&actual).map_err(|e| AuthError::PasswordHashError(e.to_string()))?;
        let expected =
            Output::new(&expected).map_err(|e| AuthError::PasswordHashError(e.to_string()))?;
        Ok(actual == expected)
    }

    /// Run one derivation and discard it
    ///
    /// Login paths that fail before a stored hash is known call this so they
    /// cost the same as a wrong password.
    pub fn compare_dummy(&self, password: &str) -> Result<(), AuthError> {
        self.derive(password, &DUMMY_SALT).map(|_| ())
    }

    /// Check a password against the strength policy, reporting every violated rule
    pub fn validate_strength(password: &str) -> PasswordStrength {
        let mut violations = Vec::new();
        let length = password.chars().count();

        if length < MIN_LENGTH {
            violations.push(format!("Password must be at least {} characters long", MIN_LENGTH));
        }
        if length > MAX_LENGTH {
            violations.push(format!("Password must be at most {} characters long", MAX_LENGTH));
        }
        if !password.chars().any(|c| c.is_lowercase()) {
            violations.push("Password must contain at least one lowercase letter".to_string());
        }
        if !password.chars().any(|c| c.is_uppercase()) {
            violations.push("Password must contain at least one uppercase letter".to_string());
        }
        if !password.chars().any(|c| c.is_ascii_digit()) {
            violations.push("Password must contain at least one digit".to_string());
        }
        if !password.chars().any(|c| !c.is_alphanumeric() && !c.is_whitespace()) {
            violations.push("Password must contain at least one special character".to_string());
        }
        if COMMON_PASSWORDS.contains(&password.to_lowercase().as_str()) {
            violations.push("Password is too common".to_string());
        }

        PasswordStrength {
            is_valid: violations.is_empty(),
            violations,
        }
    }

    /// Fail with a validation error listing every violation
    pub fn ensure_strong(password: &str) -> Result<(), AuthError> {
        let strength = Self::validate_strength(password);
        if strength.is_valid {
            Ok(())
        } else {
            Err(AuthError::ValidationError(strength.violations))
        }
    }
}
