// Authentication service - business logic layer
// Coordinates password hashing, token issuance and the three stores

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::auth::{
    error::AuthError,
    models::{
        AuthContext, ClientInfo, IssuedCredentials, NewRefreshToken, NewSession, NewUser,
        RefreshTokenRecord, Role, SessionRecord, SessionWithUser, TokenPurpose, TokenStats, User,
        PASSWORD_RESET_DEVICE_LABEL,
    },
    password::PasswordService,
    refresh_tokens::RefreshTokenStore,
    repository::UserStore,
    sessions::SessionStore,
    token::{generate_opaque_token, TokenService, TokenSubject},
};
use crate::config::AuthConfig;

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn subject_of(user: &User) -> TokenSubject {
    TokenSubject {
        user_id: user.id,
        email: user.email.clone(),
        role: user.role,
    }
}

/// Authentication service coordinating all auth operations
///
/// Stores are injected as trait objects so the same service runs over
/// Postgres in production and over [`crate::auth::memory::MemoryStore`] in tests.
#[derive(Clone)]
pub struct AuthService {
    config: AuthConfig,
    token_service: TokenService,
    password_service: PasswordService,
    users: Arc<dyn UserStore>,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    sessions: Arc<dyn SessionStore>,
}

impl AuthService {
    /// Create a new AuthService
    pub fn new(
        config: AuthConfig,
        users: Arc<dyn UserStore>,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        sessions: Arc<dyn SessionStore>,
    ) -> Result<Self, AuthError> {
        config.validate()?;
        let password_service =
            PasswordService::new(config.password_hash_memory_kib, config.password_hash_iterations)?;
        let token_service = TokenService::new(&config);

        Ok(Self {
            config,
            token_service,
            password_service,
            users,
            refresh_tokens,
            sessions,
        })
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn token_service(&self) -> &TokenService {
        &self.token_service
    }

    pub fn refresh_token_store(&self) -> Arc<dyn RefreshTokenStore> {
        Arc::clone(&self.refresh_tokens)
    }

    pub fn session_store(&self) -> Arc<dyn SessionStore> {
        Arc::clone(&self.sessions)
    }

    /// Issue a pair, persist the refresh half, and optionally open a device session
    async fn issue_credentials(
        &self,
        user: User,
        client: &ClientInfo,
        open_session: bool,
    ) -> Result<IssuedCredentials, AuthError> {
        let pair = self.token_service.issue_pair(&subject_of(&user))?;

        self.refresh_tokens
            .create(NewRefreshToken {
                user_id: user.id,
                token: pair.refresh_token.clone(),
                purpose: TokenPurpose::Refresh,
                expires_at: Utc::now() + self.config.refresh_ttl(),
                device_info: client.device_info.clone(),
                ip_address: client.ip_address.clone(),
            })
            .await?;

        let session_token = if open_session {
            let (_, token) = self
                .sessions
                .create(NewSession {
                    user_id: user.id,
                    device_info: client.device_info.clone(),
                    ip_address: client.ip_address.clone(),
                    user_agent: client.user_agent.clone(),
                    expires_at: Some(Utc::now() + self.config.session_ttl()),
                })
                .await?;
            Some(token)
        } else {
            None
        };

        Ok(IssuedCredentials {
            user,
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            session_token,
        })
    }

    /// Register a new user and sign them in
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: Option<String>,
        client: ClientInfo,
    ) -> Result<IssuedCredentials, AuthError> {
        let email = normalize_email(email);
        if email.is_empty() {
            return Err(AuthError::ValidationError(vec!["Email is required".to_string()]));
        }
        PasswordService::ensure_strong(password)?;

        if self.users.email_exists(&email).await? {
            return Err(AuthError::EmailAlreadyExists);
        }

        let password_hash = self.password_service.hash(password)?;
        let user = self
            .users
            .create(NewUser {
                email,
                password_hash,
                role: Role::User,
                display_name,
            })
            .await?;

        info!(user_id = user.id, "User registered");
        self.issue_credentials(user, &client, true).await
    }

    /// Login a user
    ///
    /// Unknown email, inactive account and wrong password are indistinguishable
    /// to the caller.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        client: ClientInfo,
    ) -> Result<IssuedCredentials, AuthError> {
        let email = normalize_email(email);
        let user = match self.users.find_by_email(&email).await? {
            Some(user) if user.is_active => user,
            Some(user) => {
                warn!(user_id = user.id, "Login attempt on inactive account");
                self.password_service.compare_dummy(password)?;
                return Err(AuthError::InvalidCredentials);
            }
            None => {
                debug!("Login attempt for unknown email");
                self.password_service.compare_dummy(password)?;
                return Err(AuthError::InvalidCredentials);
            }
        };

        if !self.password_service.compare(password, &user.password_hash)? {
            warn!(user_id = user.id, "Login failed: wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        self.users.update_last_login(user.id).await?;
        let user_id = user.id;
        let issued = self.issue_credentials(user, &client, true).await?;

        self.refresh_tokens
            .prune_oldest(user_id, self.config.max_refresh_tokens_per_user)
            .await?;

        info!(user_id, "User logged in");
        Ok(issued)
    }

    /// Exchange a refresh token for a new pair; the presented token is consumed
    pub async fn refresh(
        &self,
        refresh_token: &str,
        client: ClientInfo,
    ) -> Result<IssuedCredentials, AuthError> {
        let claims = self.token_service.verify_refresh(refresh_token)?;

        let record = self
            .refresh_tokens
            .find_by_token(refresh_token)
            .await?
            .filter(|r| r.purpose == TokenPurpose::Refresh)
            .ok_or(AuthError::InvalidToken)?;

        if record.user_id != claims.sub {
            warn!(user_id = record.user_id, "Refresh token subject mismatch");
            return Err(AuthError::InvalidToken);
        }

        let user = match self.users.find_by_id(record.user_id).await? {
            Some(user) if user.is_active => user,
            _ => return Err(AuthError::InvalidCredentials),
        };

        match self.refresh_tokens.update_last_used(refresh_token).await {
            Ok(()) => {}
            // Expired or consumed between lookup and now
            Err(AuthError::NotFound { .. }) => return Err(AuthError::InvalidToken),
            Err(e) => return Err(e),
        }

        let pair = self.token_service.issue_pair(&subject_of(&user))?;
        let rotated = self
            .refresh_tokens
            .rotate(
                refresh_token,
                NewRefreshToken {
                    user_id: user.id,
                    token: pair.refresh_token.clone(),
                    purpose: TokenPurpose::Refresh,
                    expires_at: Utc::now() + self.config.refresh_ttl(),
                    device_info: client.device_info.or(record.device_info),
                    ip_address: client.ip_address.or(record.ip_address),
                },
            )
            .await?;

        if rotated.is_none() {
            warn!(user_id = user.id, "Refresh token reused concurrently");
            return Err(AuthError::InvalidToken);
        }

        debug!(user_id = user.id, "Refresh token rotated");
        Ok(IssuedCredentials {
            user,
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            session_token: None,
        })
    }

    /// Revoke one refresh token and, when given, its device session
    ///
    /// Logging out twice is not an error.
    pub async fn logout(
        &self,
        refresh_token: &str,
        session_token: Option<&str>,
    ) -> Result<(), AuthError> {
        match self.refresh_tokens.delete_by_token(refresh_token).await {
            Ok(true) => debug!("Refresh token deleted on logout"),
            Ok(false) | Err(AuthError::NotFound { .. }) => {
                debug!("Logout with unknown refresh token")
            }
            Err(e) => return Err(e),
        }

        if let Some(token) = session_token {
            self.sessions.deactivate(token).await?;
        }
        Ok(())
    }

    /// Sign a user out everywhere
    pub async fn logout_all(&self, user_id: i32) -> Result<(), AuthError> {
        let tokens = self.refresh_tokens.delete_by_user_id(user_id).await?;
        let sessions = self.sessions.deactivate_all(user_id).await?;
        info!(user_id, tokens, sessions, "User logged out everywhere");
        Ok(())
    }

    /// Change password after verifying the current one; every refresh token is revoked
    pub async fn change_password(
        &self,
        user_id: i32,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let user = self.current_user(user_id).await?;

        if !self.password_service.compare(current_password, &user.password_hash)? {
            warn!(user_id, "Password change rejected: wrong current password");
            return Err(AuthError::InvalidCredentials);
        }
        PasswordService::ensure_strong(new_password)?;

        let password_hash = self.password_service.hash(new_password)?;
        self.users.update_password(user_id, &password_hash).await?;
        let revoked = self.refresh_tokens.revoke_all(user_id).await?;

        info!(user_id, revoked, "Password changed");
        Ok(())
    }

    /// Start a password reset
    ///
    /// Returns the raw reset token for delivery out of band, or `None` when no
    /// active account has this email.
    pub async fn reset_password(&self, email: &str) -> Result<Option<String>, AuthError> {
        let email = normalize_email(email);
        let user = match self.users.find_by_email(&email).await? {
            Some(user) if user.is_active => user,
            _ => {
                info!("Password reset requested for unknown or inactive account");
                return Ok(None);
            }
        };

        let token = generate_opaque_token();
        self.refresh_tokens
            .create(NewRefreshToken {
                user_id: user.id,
                token: token.clone(),
                purpose: TokenPurpose::PasswordReset,
                expires_at: Utc::now() + self.config.reset_token_ttl(),
                device_info: Some(PASSWORD_RESET_DEVICE_LABEL.to_string()),
                ip_address: None,
            })
            .await?;

        info!(user_id = user.id, "Password reset token issued");
        Ok(Some(token))
    }

    /// Finish a password reset; the token works exactly once
    pub async fn confirm_password_reset(
        &self,
        token: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        self.refresh_tokens
            .find_by_token(token)
            .await?
            .filter(|r| r.purpose == TokenPurpose::PasswordReset)
            .ok_or(AuthError::InvalidResetToken)?;

        PasswordService::ensure_strong(new_password)?;
        let password_hash = self.password_service.hash(new_password)?;

        // From here on the token is spent; only the write can still fail
        let record = self
            .refresh_tokens
            .consume(token, TokenPurpose::PasswordReset)
            .await?
            .ok_or(AuthError::InvalidResetToken)?;

        self.users
            .update_password(record.user_id, &password_hash)
            .await?;
        let revoked = self.refresh_tokens.revoke_all(record.user_id).await?;

        info!(user_id = record.user_id, revoked, "Password reset completed");
        Ok(())
    }

    /// Signed-in devices, as seen through their refresh tokens
    pub async fn list_sessions(&self, user_id: i32) -> Result<Vec<RefreshTokenRecord>, AuthError> {
        self.refresh_tokens
            .list_active(user_id, TokenPurpose::Refresh)
            .await
    }

    /// Revoke one signed-in device by refresh token id
    pub async fn revoke_session(&self, user_id: i32, session_id: i32) -> Result<(), AuthError> {
        if !self
            .refresh_tokens
            .delete_by_id_for_user(user_id, session_id)
            .await?
        {
            return Err(AuthError::not_found("Session", session_id));
        }

        info!(user_id, session_id, "Session revoked");
        Ok(())
    }

    pub async fn current_user(&self, user_id: i32) -> Result<User, AuthError> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AuthError::not_found("User", user_id))
    }

    pub async fn token_stats(&self, user_id: i32) -> Result<TokenStats, AuthError> {
        self.refresh_tokens.stats(user_id).await
    }

    pub async fn list_device_sessions(&self, user_id: i32) -> Result<Vec<SessionRecord>, AuthError> {
        self.sessions.find_by_user_id(user_id).await
    }

    /// Resolve an opaque session token to its session and owner, recording the access
    pub async fn authenticate_session(&self, token: &str) -> Result<SessionWithUser, AuthError> {
        let found = self
            .sessions
            .find_by_token_with_user(token)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        match self.sessions.touch(token).await {
            Ok(()) => Ok(found),
            Err(AuthError::NotFound { .. }) => Err(AuthError::InvalidToken),
            Err(e) => Err(e),
        }
    }

    /// Soft-delete an account and sign it out everywhere
    pub async fn deactivate_account(&self, user_id: i32) -> Result<(), AuthError> {
        self.users.deactivate(user_id).await?;
        self.logout_all(user_id).await?;
        info!(user_id, "Account deactivated");
        Ok(())
    }

    /// Verify an access token and return the identity it carries
    pub fn authenticate_access(&self, token: &str) -> Result<AuthContext, AuthError> {
        self.token_service.verify_access(token).map(AuthContext::from)
    }
}
