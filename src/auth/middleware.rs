// Authentication extractors and role middleware for protected routes

use std::sync::Arc;

use axum::{
    async_trait,
    body::Body,
    extract::{FromRef, FromRequestParts, State},
    http::{header, request::Parts, HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::{debug, warn};

use crate::auth::{
    error::AuthError,
    models::{AuthContext, Role, SessionRecord, User},
    service::AuthService,
    token::TokenService,
};

/// Header carrying an opaque session token
pub const SESSION_TOKEN_HEADER: &str = "x-session-token";
/// Cookie carrying an opaque session token
pub const SESSION_TOKEN_COOKIE: &str = "session_token";

fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .map(|v| v.to_str().map_err(|_| AuthError::InvalidToken))
        .transpose()?;
    TokenService::extract_bearer(value)
}

/// Session token from the `X-Session-Token` header, falling back to the cookie
pub fn session_token_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| {
            CookieJar::from_headers(headers)
                .get(SESSION_TOKEN_COOKIE)
                .map(|c| c.value().to_string())
        })
        .filter(|t| !t.is_empty())
}

/// Authenticated user extractor for protected routes
///
/// Verifies the bearer access token; no store lookup is made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: i32,
    pub email: String,
    pub role: Role,
}

impl From<AuthContext> for AuthenticatedUser {
    fn from(context: AuthContext) -> Self {
        Self {
            user_id: context.user_id,
            email: context.email,
            role: context.role,
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    Arc<AuthService>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let service = Arc::<AuthService>::from_ref(state);
        let token = bearer_token(&parts.headers)?;
        let context = service.authenticate_access(token)?;

        debug!(user_id = context.user_id, "Access token accepted");
        Ok(context.into())
    }
}

/// Extractor resolving an opaque session token to its session and owner
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub session: SessionRecord,
    pub user: User,
}

#[async_trait]
impl<S> FromRequestParts<S> for SessionUser
where
    Arc<AuthService>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let service = Arc::<AuthService>::from_ref(state);
        let token = session_token_from(&parts.headers).ok_or(AuthError::MissingToken)?;
        let found = service.authenticate_session(&token).await?;

        Ok(SessionUser {
            session: found.session,
            user: found.user,
        })
    }
}

/// Role requirement for a group of routes
///
/// This middleware extracts the JWT token from the Authorization header,
/// validates it, and checks if the user has the required role.
#[derive(Debug, Clone, Copy)]
pub struct RequireRole {
    required_role: Role,
}

impl RequireRole {
    pub fn new(required_role: Role) -> Self {
        Self { required_role }
    }

    pub fn admin() -> Self {
        Self::new(Role::Admin)
    }

    pub fn user() -> Self {
        Self::new(Role::User)
    }

    /// Check an already-authenticated identity against the requirement
    pub fn check(&self, user: &AuthenticatedUser) -> Result<(), AuthError> {
        if user.role != self.required_role {
            return Err(AuthError::InsufficientPermissions {
                required: self.required_role,
                actual: user.role,
            });
        }
        Ok(())
    }

    /// Middleware body validating role-based access
    pub async fn middleware(
        self,
        service: Arc<AuthService>,
        request: Request<Body>,
        next: Next,
    ) -> Result<Response, AuthError> {
        let endpoint = request.uri().path().to_string();

        let token = bearer_token(request.headers()).map_err(|e| {
            warn!(endpoint = %endpoint, "Protected endpoint called without a usable bearer token");
            e
        })?;
        let user = AuthenticatedUser::from(service.authenticate_access(token)?);

        if let Err(e) = self.check(&user) {
            warn!(
                user_id = user.user_id,
                required_role = %self.required_role,
                actual_role = %user.role,
                endpoint = %endpoint,
                "Authorization failed"
            );
            return Err(e);
        }

        debug!(user_id = user.user_id, role = %user.role, endpoint = %endpoint, "Authorization successful");
        Ok(next.run(request).await)
    }
}

/// `axum::middleware::from_fn_with_state` entry point for admin-only routes
pub async fn require_admin(
    State(service): State<Arc<AuthService>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    RequireRole::admin().middleware(service, request, next).await
}
