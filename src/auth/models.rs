// Authentication data models and DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Device label written on password-reset records, for operators reading the table
pub const PASSWORD_RESET_DEVICE_LABEL: &str = "PASSWORD_RESET";

/// User role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::User
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// User database model
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i32,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub is_active: bool,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

/// Fields needed to create a user
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub display_name: Option<String>,
}

/// User response model (excludes password_hash)
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    pub id: i32,
    pub email: String,
    pub role: Role,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            role: user.role,
            display_name: user.display_name,
            created_at: user.created_at,
            last_login: user.last_login,
        }
    }
}

/// What a row in `refresh_tokens` is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    Refresh,
    PasswordReset,
}

/// Refresh token database model
///
/// `token_hash` is the SHA-256 hex digest of the issued value.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshTokenRecord {
    pub id: i32,
    pub user_id: i32,
    pub token_hash: String,
    pub purpose: TokenPurpose,
    pub expires_at: DateTime<Utc>,
    pub device_info: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
}

/// Insert payload for a refresh or reset token
#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    pub user_id: i32,
    /// Raw token value; only its hash is persisted
    pub token: String,
    pub purpose: TokenPurpose,
    pub expires_at: DateTime<Utc>,
    pub device_info: Option<String>,
    pub ip_address: Option<String>,
}

/// Aggregate view of a user's refresh tokens
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct TokenStats {
    pub active_count: i64,
    pub total_count: i64,
    pub last_used: Option<DateTime<Utc>>,
}

/// Opaque per-device session database model
#[derive(Debug, Clone, FromRow)]
pub struct SessionRecord {
    pub id: Uuid,
    pub user_id: i32,
    pub session_token_hash: String,
    pub device_info: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a session; `expires_at` defaults to the configured session TTL
#[derive(Debug, Clone, Default)]
pub struct NewSession {
    pub user_id: i32,
    pub device_info: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A session joined with its owning user
#[derive(Debug, Clone)]
pub struct SessionWithUser {
    pub session: SessionRecord,
    pub user: User,
}

/// Request metadata recorded alongside issued credentials
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub device_info: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Signed access/refresh pair
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Identity proven by a verified access token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: i32,
    pub email: String,
    pub role: Role,
}

/// Result of a password policy check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PasswordStrength {
    pub is_valid: bool,
    pub violations: Vec<String>,
}

/// Credentials handed back to the HTTP layer after register/login/refresh
#[derive(Debug, Clone)]
pub struct IssuedCredentials {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
    /// Absent on refresh, which does not open a new device session
    pub session_token: Option<String>,
}

/// Registration request DTO
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[validate(email(message = "Email must be a valid address"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
    #[validate(length(max = 100, message = "Display name must not exceed 100 characters"))]
    pub display_name: Option<String>,
    pub device_info: Option<String>,
}

/// Login request DTO
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(email(message = "Email must be a valid address"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
    pub device_info: Option<String>,
}

/// Token refresh request DTO; the cookie takes precedence over the body
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
    pub device_info: Option<String>,
}

/// Logout request DTO; both fields fall back to cookies
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
    pub session_token: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub current_password: String,
    #[validate(length(min = 1, message = "New password is required"))]
    pub new_password: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct PasswordResetRequest {
    #[validate(email(message = "Email must be a valid address"))]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ConfirmPasswordResetRequest {
    #[validate(length(min = 1, message = "Reset token is required"))]
    pub token: String,
    #[validate(length(min = 1, message = "New password is required"))]
    pub new_password: String,
}

/// Authentication response DTO
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    pub user: UserResponse,
}

impl From<IssuedCredentials> for AuthResponse {
    fn from(issued: IssuedCredentials) -> Self {
        Self {
            access_token: issued.access_token,
            refresh_token: issued.refresh_token,
            session_token: issued.session_token,
            user: issued.user.into(),
        }
    }
}

/// A refresh token as shown in the "signed-in devices" list
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RefreshSessionResponse {
    pub id: i32,
    pub device_info: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl From<RefreshTokenRecord> for RefreshSessionResponse {
    fn from(record: RefreshTokenRecord) -> Self {
        Self {
            id: record.id,
            device_info: record.device_info,
            ip_address: record.ip_address,
            created_at: record.created_at,
            last_used: record.last_used,
            expires_at: record.expires_at,
        }
    }
}

/// An opaque device session as shown to its owner
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeviceSessionResponse {
    pub id: Uuid,
    pub device_info: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
}

impl From<SessionRecord> for DeviceSessionResponse {
    fn from(record: SessionRecord) -> Self {
        Self {
            id: record.id,
            device_info: record.device_info,
            ip_address: record.ip_address,
            user_agent: record.user_agent,
            created_at: record.created_at,
            last_accessed: record.last_accessed,
            expires_at: record.expires_at,
            is_active: record.is_active,
        }
    }
}

/// The device session a session token resolves to, with its owner
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SessionInfoResponse {
    pub session: DeviceSessionResponse,
    pub user: UserResponse,
}

impl From<SessionWithUser> for SessionInfoResponse {
    fn from(found: SessionWithUser) -> Self {
        Self {
            session: found.session.into(),
            user: found.user.into(),
        }
    }
}

/// Generic acknowledgement body
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
