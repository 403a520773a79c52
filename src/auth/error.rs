// Authentication and authorization error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{debug, error, warn};

use crate::auth::models::Role;

/// Broad category of an [`AuthError`], used by callers that map errors to UX
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authentication,
    Authorization,
    Conflict,
    NotFound,
    Database,
    Internal,
}

/// Errors raised by the identity core
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Weak password or missing fields; carries every violated rule
    #[error("Validation failed: {}", .0.join("; "))]
    ValidationError(Vec<String>),

    /// Unknown email, inactive account or wrong password (deliberately indistinguishable)
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token has expired")]
    ExpiredToken,

    #[error("Missing authentication token")]
    MissingToken,

    #[error("Invalid or expired password reset token")]
    InvalidResetToken,

    #[error("Insufficient permissions: required role '{required}', but user has role '{actual}'")]
    InsufficientPermissions { required: Role, actual: Role },

    #[error("Email already exists")]
    EmailAlreadyExists,

    #[error("{resource} with id {id} not found")]
    NotFound { resource: String, id: String },

    /// Persistence failure, with the operation that failed
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Password hashing error: {0}")]
    PasswordHashError(String),

    #[error("Token generation error: {0}")]
    TokenGenerationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl AuthError {
    /// Shorthand for a not-found error
    pub fn not_found(resource: &str, id: impl ToString) -> Self {
        AuthError::NotFound {
            resource: resource.to_string(),
            id: id.to_string(),
        }
    }

    /// Wrap a sqlx error with the operation that produced it
    pub fn database(context: &str, err: sqlx::Error) -> Self {
        AuthError::DatabaseError(format!("{}: {}", context, err))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::ValidationError(_) => ErrorKind::Validation,
            AuthError::InvalidCredentials
            | AuthError::InvalidToken
            | AuthError::ExpiredToken
            | AuthError::MissingToken
            | AuthError::InvalidResetToken => ErrorKind::Authentication,
            AuthError::InsufficientPermissions { .. } => ErrorKind::Authorization,
            AuthError::EmailAlreadyExists => ErrorKind::Conflict,
            AuthError::NotFound { .. } => ErrorKind::NotFound,
            AuthError::DatabaseError(_) => ErrorKind::Database,
            AuthError::PasswordHashError(_)
            | AuthError::TokenGenerationError(_)
            | AuthError::ConfigError(_) => ErrorKind::Internal,
        }
    }

    /// Expected, user-facing failures. Anything else is a signal to investigate.
    pub fn is_operational(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Database | ErrorKind::Internal)
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Authentication => StatusCode::UNAUTHORIZED,
            ErrorKind::Authorization => StatusCode::FORBIDDEN,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Database | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::ValidationError(_) => "VALIDATION_ERROR",
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::InvalidToken => "INVALID_TOKEN",
            AuthError::ExpiredToken => "TOKEN_EXPIRED",
            AuthError::MissingToken => "MISSING_TOKEN",
            AuthError::InvalidResetToken => "INVALID_RESET_TOKEN",
            AuthError::InsufficientPermissions { .. } => "FORBIDDEN",
            AuthError::EmailAlreadyExists => "CONFLICT",
            AuthError::NotFound { .. } => "NOT_FOUND",
            AuthError::DatabaseError(_) => "DATABASE_ERROR",
            AuthError::PasswordHashError(_)
            | AuthError::TokenGenerationError(_)
            | AuthError::ConfigError(_) => "INTERNAL_ERROR",
        }
    }

    /// Get a descriptive error message for this error
    /// This message is safe to send to clients (no sensitive data)
    pub fn error_message(&self) -> String {
        match self {
            AuthError::ValidationError(_) => "Request validation failed".to_string(),
            AuthError::InsufficientPermissions { required, .. } => {
                format!("Insufficient permissions: required role '{}'", required)
            }
            AuthError::DatabaseError(_)
            | AuthError::PasswordHashError(_)
            | AuthError::TokenGenerationError(_)
            | AuthError::ConfigError(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

/// Flatten request DTO validation failures into one message per failed rule
impl From<validator::ValidationErrors> for AuthError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut violations: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| match &e.message {
                    Some(message) => message.to_string(),
                    None => format!("{} is invalid", field),
                })
            })
            .collect();
        violations.sort();
        AuthError::ValidationError(violations)
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match self.kind() {
            ErrorKind::Database | ErrorKind::Internal => error!("Auth internal error: {}", self),
            ErrorKind::Authentication | ErrorKind::Authorization => {
                warn!("Auth rejected: {}", self)
            }
            _ => debug!("Auth client error: {}", self),
        }

        let mut body = json!({
            "error": self.error_code(),
            "message": self.error_message(),
        });
        if let AuthError::ValidationError(violations) = &self {
            body["details"] = json!(violations);
        }

        (self.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authentication_variants_map_to_401() {
        for err in [
            AuthError::InvalidCredentials,
            AuthError::InvalidToken,
            AuthError::ExpiredToken,
            AuthError::MissingToken,
            AuthError::InvalidResetToken,
        ] {
            assert_eq!(err.kind(), ErrorKind::Authentication);
            assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
            assert!(err.is_operational());
        }
    }

    #[test]
    fn test_internal_errors_hide_details() {
        let err = AuthError::DatabaseError("connection refused on 10.0.0.3".to_string());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.is_operational());
        assert_eq!(err.error_message(), "Internal server error");
    }

    #[test]
    fn test_validation_error_lists_every_violation() {
        let err = AuthError::ValidationError(vec!["too short".to_string(), "no digit".to_string()]);
        assert_eq!(err.to_string(), "Validation failed: too short; no digit");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_not_found_message() {
        let err = AuthError::not_found("Session", 42);
        assert_eq!(err.error_message(), "Session with id 42 not found");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_permission_error_maps_to_403() {
        let err = AuthError::InsufficientPermissions {
            required: Role::Admin,
            actual: Role::User,
        };
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(err.kind(), ErrorKind::Authorization);
    }
}
