// JWT token generation and validation service

use chrono::Utc;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind as JwtErrorKind, Algorithm, DecodingKey, EncodingKey,
    Header, Validation,
};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::auth::{
    error::AuthError,
    models::{AuthContext, Role, TokenPair},
};
use crate::config::AuthConfig;

/// Bytes of entropy in opaque (non-JWT) tokens
const OPAQUE_TOKEN_BYTES: usize = 32;

/// Hash a token using SHA-256
///
/// Stores only ever see this digest, never the bearer-usable value.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Generate a high-entropy opaque token from the OS CSPRNG, hex-encoded
pub fn generate_opaque_token() -> String {
    let mut bytes = [0u8; OPAQUE_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i32, // user_id
    pub email: String,
    pub role: Role,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    /// Random id so tokens issued within the same second still differ
    pub jti: String,
}

impl From<Claims> for AuthContext {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            email: claims.email,
            role: claims.role,
        }
    }
}

/// Identity a token is issued for
#[derive(Debug, Clone)]
pub struct TokenSubject {
    pub user_id: i32,
    pub email: String,
    pub role: Role,
}

/// Signing material and lifetime for one kind of token
#[derive(Clone)]
struct TokenKind {
    encoding: EncodingKey,
    decoding: DecodingKey,
    duration: i64, // in seconds
}

impl TokenKind {
    fn new(secret: &str, duration: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            duration,
        }
    }
}

/// Token service for JWT operations
///
/// Access and refresh tokens are signed with separate secrets, so a leaked
/// access secret cannot be used to mint refresh tokens.
#[derive(Clone)]
pub struct TokenService {
    access: TokenKind,
    refresh: TokenKind,
    issuer: String,
    audience: String,
}

impl TokenService {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            access: TokenKind::new(&config.access_secret, config.access_ttl().num_seconds()),
            refresh: TokenKind::new(&config.refresh_secret, config.refresh_ttl().num_seconds()),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
        }
    }

    fn issue(&self, kind: &TokenKind, subject: &TokenSubject) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: subject.user_id,
            email: subject.email.clone(),
            role: subject.role,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now,
            exp: now + kind.duration,
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &kind.encoding)
            .map_err(|e| AuthError::TokenGenerationError(e.to_string()))
    }

    fn verify(&self, kind: &TokenKind, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[self.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);

        decode::<Claims>(token, &kind.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                JwtErrorKind::ExpiredSignature => AuthError::ExpiredToken,
                _ => AuthError::InvalidToken,
            })
    }

    pub fn issue_access(&self, subject: &TokenSubject) -> Result<String, AuthError> {
        self.issue(&self.access, subject)
    }

    pub fn issue_refresh(&self, subject: &TokenSubject) -> Result<String, AuthError> {
        self.issue(&self.refresh, subject)
    }

    /// Generate both access and refresh tokens
    pub fn issue_pair(&self, subject: &TokenSubject) -> Result<TokenPair, AuthError> {
        Ok(TokenPair {
            access_token: self.issue_access(subject)?,
            refresh_token: self.issue_refresh(subject)?,
        })
    }

    pub fn verify_access(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify(&self.access, token)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify(&self.refresh, token)
    }

    /// Pull the token out of an `Authorization: Bearer <token>` header value
    pub fn extract_bearer(header: Option<&str>) -> Result<&str, AuthError> {
        let header = header.ok_or(AuthError::MissingToken)?;
        let mut parts = header.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some("Bearer"), Some(token), None) => Ok(token),
            _ => Err(AuthError::InvalidToken),
        }
    }
}
