// HTTP handlers for authentication endpoints
// Handlers only parse input, call AuthService and shape the response

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    middleware,
    routing::{delete, get, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use tracing::debug;
use utoipa::OpenApi;
use validator::Validate;

use crate::auth::{
    error::AuthError,
    middleware::{
        require_admin, session_token_from, AuthenticatedUser, SessionUser, SESSION_TOKEN_COOKIE,
    },
    models::{
        AuthResponse, ChangePasswordRequest, ClientInfo, ConfirmPasswordResetRequest,
        DeviceSessionResponse, IssuedCredentials, LoginRequest, LogoutRequest, MessageResponse,
        PasswordResetRequest, RefreshRequest, RefreshSessionResponse, RegisterRequest, Role,
        SessionInfoResponse, SessionWithUser, TokenStats, UserResponse,
    },
    service::AuthService,
};

/// Cookie carrying the refresh token
pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";
/// Every identity route lives under this prefix
pub const AUTH_PATH: &str = "/api/auth";

/// OpenAPI documentation for the identity endpoints
#[derive(OpenApi)]
#[openapi(
    paths(
        register_handler,
        login_handler,
        refresh_handler,
        logout_handler,
        logout_all_handler,
        me_handler,
        change_password_handler,
        request_password_reset_handler,
        confirm_password_reset_handler,
        list_sessions_handler,
        revoke_session_handler,
        list_device_sessions_handler,
        current_session_handler,
        token_stats_handler,
        deactivate_user_handler,
    ),
    components(schemas(
        RegisterRequest,
        LoginRequest,
        RefreshRequest,
        LogoutRequest,
        ChangePasswordRequest,
        PasswordResetRequest,
        ConfirmPasswordResetRequest,
        AuthResponse,
        UserResponse,
        Role,
        RefreshSessionResponse,
        DeviceSessionResponse,
        SessionInfoResponse,
        TokenStats,
        MessageResponse,
    )),
    tags(
        (name = "auth", description = "Identity, token and session lifecycle endpoints")
    ),
    info(
        title = "Contract Review Identity API",
        version = "0.1.0",
        description = "Registration, login, token rotation and device session management"
    )
)]
pub struct ApiDoc;

fn client_info(headers: &HeaderMap, device_info: Option<String>) -> ClientInfo {
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let ip_address = header_str("x-forwarded-for")
        .and_then(|v| v.split(',').next().map(|ip| ip.trim().to_string()))
        .or_else(|| header_str("x-real-ip"));

    ClientInfo {
        device_info,
        ip_address,
        user_agent: header_str(header::USER_AGENT.as_str()),
    }
}

fn auth_cookie(
    name: &'static str,
    value: String,
    path: &'static str,
    max_age: time::Duration,
    secure: bool,
) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .same_site(SameSite::Strict)
        .secure(secure)
        .path(path)
        .max_age(max_age)
        .build()
}

/// Attach the refresh cookie and, when present, the session cookie
fn with_credential_cookies(
    jar: CookieJar,
    service: &AuthService,
    issued: &IssuedCredentials,
) -> CookieJar {
    let config = service.config();
    let jar = jar.add(auth_cookie(
        REFRESH_TOKEN_COOKIE,
        issued.refresh_token.clone(),
        AUTH_PATH,
        time::Duration::days(config.refresh_ttl_days),
        config.cookie_secure,
    ));

    match &issued.session_token {
        Some(token) => jar.add(auth_cookie(
            SESSION_TOKEN_COOKIE,
            token.clone(),
            "/",
            time::Duration::days(config.session_ttl_days),
            config.cookie_secure,
        )),
        None => jar,
    }
}

fn without_credential_cookies(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build(REFRESH_TOKEN_COOKIE).path(AUTH_PATH))
        .remove(Cookie::build(SESSION_TOKEN_COOKIE).path("/"))
}

/// Register a new user
/// POST /api/auth/register
#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered and signed in", body = AuthResponse),
        (status = 400, description = "Invalid input or weak password"),
        (status = 409, description = "Email already registered")
    ),
    tag = "auth"
)]
pub async fn register_handler(
    State(service): State<Arc<AuthService>>,
    jar: CookieJar,
    headers: HeaderMap,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, CookieJar, Json<AuthResponse>), AuthError> {
    request.validate()?;

    let issued = service
        .register(
            &request.email,
            &request.password,
            request.display_name,
            client_info(&headers, request.device_info),
        )
        .await?;

    let jar = with_credential_cookies(jar, &service, &issued);
    Ok((StatusCode::CREATED, jar, Json(issued.into())))
}

/// Login a user
/// POST /api/auth/login
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = AuthResponse),
        (status = 401, description = "Invalid email or password")
    ),
    tag = "auth"
)]
pub async fn login_handler(
    State(service): State<Arc<AuthService>>,
    jar: CookieJar,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Result<(CookieJar, Json<AuthResponse>), AuthError> {
    request.validate()?;

    let issued = service
        .login(
            &request.email,
            &request.password,
            client_info(&headers, request.device_info),
        )
        .await?;

    let jar = with_credential_cookies(jar, &service, &issued);
    Ok((jar, Json(issued.into())))
}

/// Rotate the refresh token; the cookie takes precedence over the body
/// POST /api/auth/refresh
#[utoipa::path(
    post,
    path = "/api/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New token pair", body = AuthResponse),
        (status = 401, description = "Missing, invalid, expired or already used refresh token")
    ),
    tag = "auth"
)]
pub async fn refresh_handler(
    State(service): State<Arc<AuthService>>,
    jar: CookieJar,
    headers: HeaderMap,
    body: Option<Json<RefreshRequest>>,
) -> Result<(CookieJar, Json<AuthResponse>), AuthError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let token = jar
        .get(REFRESH_TOKEN_COOKIE)
        .map(|c| c.value().to_string())
        .or(request.refresh_token)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingToken)?;

    let issued = service
        .refresh(&token, client_info(&headers, request.device_info))
        .await?;

    let jar = with_credential_cookies(jar, &service, &issued);
    Ok((jar, Json(issued.into())))
}

/// Logout the current device
/// POST /api/auth/logout
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    request_body = LogoutRequest,
    responses(
        (status = 200, description = "Signed out", body = MessageResponse),
        (status = 401, description = "No refresh token supplied")
    ),
    tag = "auth"
)]
pub async fn logout_handler(
    State(service): State<Arc<AuthService>>,
    jar: CookieJar,
    headers: HeaderMap,
    body: Option<Json<LogoutRequest>>,
) -> Result<(CookieJar, Json<MessageResponse>), AuthError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let refresh_token = jar
        .get(REFRESH_TOKEN_COOKIE)
        .map(|c| c.value().to_string())
        .or(request.refresh_token)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingToken)?;
    let session_token = session_token_from(&headers).or(request.session_token);

    service
        .logout(&refresh_token, session_token.as_deref())
        .await?;

    Ok((
        without_credential_cookies(jar),
        Json(MessageResponse::new("Logged out")),
    ))
}

/// Logout from every device
/// POST /api/auth/logout-all
#[utoipa::path(
    post,
    path = "/api/auth/logout-all",
    responses(
        (status = 200, description = "Signed out everywhere", body = MessageResponse),
        (status = 401, description = "Missing or invalid access token")
    ),
    tag = "auth"
)]
pub async fn logout_all_handler(
    State(service): State<Arc<AuthService>>,
    user: AuthenticatedUser,
    jar: CookieJar,
) -> Result<(CookieJar, Json<MessageResponse>), AuthError> {
    service.logout_all(user.user_id).await?;
    Ok((
        without_credential_cookies(jar),
        Json(MessageResponse::new("Logged out from all devices")),
    ))
}

/// Get current user information (protected endpoint)
/// GET /api/auth/me
#[utoipa::path(
    get,
    path = "/api/auth/me",
    responses(
        (status = 200, description = "The signed-in user", body = UserResponse),
        (status = 401, description = "Missing or invalid access token")
    ),
    tag = "auth"
)]
pub async fn me_handler(
    State(service): State<Arc<AuthService>>,
    user: AuthenticatedUser,
) -> Result<Json<UserResponse>, AuthError> {
    let user = service.current_user(user.user_id).await?;
    Ok(Json(user.into()))
}

/// POST /api/auth/change-password
#[utoipa::path(
    post,
    path = "/api/auth/change-password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed, every refresh token revoked", body = MessageResponse),
        (status = 400, description = "New password too weak"),
        (status = 401, description = "Wrong current password or invalid access token")
    ),
    tag = "auth"
)]
pub async fn change_password_handler(
    State(service): State<Arc<AuthService>>,
    user: AuthenticatedUser,
    jar: CookieJar,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<(CookieJar, Json<MessageResponse>), AuthError> {
    request.validate()?;

    service
        .change_password(user.user_id, &request.current_password, &request.new_password)
        .await?;

    let jar = jar.remove(Cookie::build(REFRESH_TOKEN_COOKIE).path(AUTH_PATH));
    Ok((jar, Json(MessageResponse::new("Password changed"))))
}

/// Start a password reset; the answer is the same whether or not the email is known
/// POST /api/auth/password-reset/request
#[utoipa::path(
    post,
    path = "/api/auth/password-reset/request",
    request_body = PasswordResetRequest,
    responses(
        (status = 200, description = "Reset instructions sent if the account exists", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn request_password_reset_handler(
    State(service): State<Arc<AuthService>>,
    Json(request): Json<PasswordResetRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    request.validate()?;

    // Delivery of the token is the mailer's job, outside this service
    if service.reset_password(&request.email).await?.is_some() {
        debug!("Password reset token ready for delivery");
    }

    Ok(Json(MessageResponse::new(
        "If the account exists, password reset instructions have been sent",
    )))
}

/// POST /api/auth/password-reset/confirm
#[utoipa::path(
    post,
    path = "/api/auth/password-reset/confirm",
    request_body = ConfirmPasswordResetRequest,
    responses(
        (status = 200, description = "Password reset", body = MessageResponse),
        (status = 400, description = "New password too weak"),
        (status = 401, description = "Invalid, expired or used reset token")
    ),
    tag = "auth"
)]
pub async fn confirm_password_reset_handler(
    State(service): State<Arc<AuthService>>,
    Json(request): Json<ConfirmPasswordResetRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    request.validate()?;
    service
        .confirm_password_reset(&request.token, &request.new_password)
        .await?;
    Ok(Json(MessageResponse::new("Password has been reset")))
}

/// Signed-in devices, one per live refresh token
/// GET /api/auth/sessions
#[utoipa::path(
    get,
    path = "/api/auth/sessions",
    responses(
        (status = 200, description = "Live refresh sessions, newest first", body = Vec<RefreshSessionResponse>),
        (status = 401, description = "Missing or invalid access token")
    ),
    tag = "auth"
)]
pub async fn list_sessions_handler(
    State(service): State<Arc<AuthService>>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<RefreshSessionResponse>>, AuthError> {
    let sessions = service.list_sessions(user.user_id).await?;
    Ok(Json(sessions.into_iter().map(Into::into).collect()))
}

/// DELETE /api/auth/sessions/{id}
#[utoipa::path(
    delete,
    path = "/api/auth/sessions/{id}",
    params(("id" = i32, Path, description = "Refresh session id")),
    responses(
        (status = 200, description = "Session revoked", body = MessageResponse),
        (status = 404, description = "No such session for this user")
    ),
    tag = "auth"
)]
pub async fn revoke_session_handler(
    State(service): State<Arc<AuthService>>,
    user: AuthenticatedUser,
    Path(id): Path<i32>,
) -> Result<Json<MessageResponse>, AuthError> {
    service.revoke_session(user.user_id, id).await?;
    Ok(Json(MessageResponse::new("Session revoked")))
}

/// GET /api/auth/device-sessions
#[utoipa::path(
    get,
    path = "/api/auth/device-sessions",
    responses(
        (status = 200, description = "Active device sessions, most recently used first", body = Vec<DeviceSessionResponse>),
        (status = 401, description = "Missing or invalid access token")
    ),
    tag = "auth"
)]
pub async fn list_device_sessions_handler(
    State(service): State<Arc<AuthService>>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<DeviceSessionResponse>>, AuthError> {
    let sessions = service.list_device_sessions(user.user_id).await?;
    Ok(Json(sessions.into_iter().map(Into::into).collect()))
}

/// Resolve the caller's session token (`X-Session-Token` header or cookie)
/// GET /api/auth/session
#[utoipa::path(
    get,
    path = "/api/auth/session",
    responses(
        (status = 200, description = "The current device session and its owner", body = SessionInfoResponse),
        (status = 401, description = "Missing, unknown or expired session token")
    ),
    tag = "auth"
)]
pub async fn current_session_handler(current: SessionUser) -> Json<SessionInfoResponse> {
    Json(
        SessionWithUser {
            session: current.session,
            user: current.user,
        }
        .into(),
    )
}

/// GET /api/auth/token-stats
#[utoipa::path(
    get,
    path = "/api/auth/token-stats",
    responses(
        (status = 200, description = "Refresh token counts for the caller", body = TokenStats),
        (status = 401, description = "Missing or invalid access token")
    ),
    tag = "auth"
)]
pub async fn token_stats_handler(
    State(service): State<Arc<AuthService>>,
    user: AuthenticatedUser,
) -> Result<Json<TokenStats>, AuthError> {
    Ok(Json(service.token_stats(user.user_id).await?))
}

/// Deactivate an account (admin only)
/// DELETE /api/auth/users/{id}
#[utoipa::path(
    delete,
    path = "/api/auth/users/{id}",
    params(("id" = i32, Path, description = "User id")),
    responses(
        (status = 200, description = "Account deactivated and signed out everywhere", body = MessageResponse),
        (status = 403, description = "Caller is not an admin"),
        (status = 404, description = "No such user")
    ),
    tag = "auth"
)]
pub async fn deactivate_user_handler(
    State(service): State<Arc<AuthService>>,
    Path(id): Path<i32>,
) -> Result<Json<MessageResponse>, AuthError> {
    service.deactivate_account(id).await?;
    Ok(Json(MessageResponse::new("Account deactivated")))
}

/// Identity routes, nested under [`AUTH_PATH`]
pub fn router(service: Arc<AuthService>) -> Router {
    let admin = Router::new()
        .route("/users/:id", delete(deactivate_user_handler))
        .route_layer(middleware::from_fn_with_state(service.clone(), require_admin));

    let routes = Router::new()
        .route("/register", post(register_handler))
        .route("/login", post(login_handler))
        .route("/refresh", post(refresh_handler))
        .route("/logout", post(logout_handler))
        .route("/logout-all", post(logout_all_handler))
        .route("/me", get(me_handler))
        .route("/change-password", post(change_password_handler))
        .route("/password-reset/request", post(request_password_reset_handler))
        .route("/password-reset/confirm", post(confirm_password_reset_handler))
        .route("/sessions", get(list_sessions_handler))
        .route("/sessions/:id", delete(revoke_session_handler))
        .route("/device-sessions", get(list_device_sessions_handler))
        .route("/session", get(current_session_handler))
        .route("/token-stats", get(token_stats_handler))
        .merge(admin);

    Router::new().nest(AUTH_PATH, routes).with_state(service)
}
