// In-memory stores guarded by a single Tokio mutex.
//
// Suitable for single-node deployments and tests. Every trait method takes
// the lock once, so multi-step operations such as [`RefreshTokenStore::rotate`]
// are atomic with respect to each other.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::auth::{
    error::AuthError,
    models::{
        NewRefreshToken, NewSession, NewUser, RefreshTokenRecord, SessionRecord, SessionWithUser,
        TokenPurpose, TokenStats, User,
    },
    refresh_tokens::{grace_cutoff, RefreshTokenStore},
    repository::UserStore,
    sessions::{default_expiry, SessionStore},
    token::{generate_opaque_token, hash_token},
};

#[derive(Debug, Default)]
struct InnerState {
    users: BTreeMap<i32, User>,
    next_user_id: i32,
    tokens: BTreeMap<i32, RefreshTokenRecord>,
    next_token_id: i32,
    sessions: HashMap<Uuid, SessionRecord>,
}

impl InnerState {
    fn insert_token(&mut self, token: NewRefreshToken) -> Result<RefreshTokenRecord, AuthError> {
        let token_hash = hash_token(&token.token);
        if self.tokens.values().any(|t| t.token_hash == token_hash) {
            return Err(AuthError::DatabaseError(
                "store refresh token: duplicate token_hash".to_string(),
            ));
        }

        self.next_token_id += 1;
        let record = RefreshTokenRecord {
            id: self.next_token_id,
            user_id: token.user_id,
            token_hash,
            purpose: token.purpose,
            expires_at: token.expires_at,
            device_info: token.device_info,
            ip_address: token.ip_address,
            created_at: Utc::now(),
            last_used: None,
        };
        self.tokens.insert(record.id, record.clone());
        Ok(record)
    }

    fn live_token_id(&self, token: &str, purpose: Option<TokenPurpose>) -> Option<i32> {
        let token_hash = hash_token(token);
        let now = Utc::now();
        self.tokens
            .values()
            .find(|t| {
                t.token_hash == token_hash
                    && t.expires_at > now
                    && purpose.map_or(true, |p| t.purpose == p)
            })
            .map(|t| t.id)
    }

    fn live_session_id(&self, token: &str) -> Option<Uuid> {
        let token_hash = hash_token(token);
        let now = Utc::now();
        self.sessions
            .values()
            .find(|s| s.session_token_hash == token_hash && s.is_active && s.expires_at > now)
            .map(|s| s.id)
    }
}

/// In-memory implementation of every store the identity core uses
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<InnerState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create(&self, user: NewUser) -> Result<User, AuthError> {
        let mut state = self.state.lock().await;
        let email_lower = user.email.to_lowercase();
        if state.users.values().any(|u| u.email.to_lowercase() == email_lower) {
            return Err(AuthError::EmailAlreadyExists);
        }

        state.next_user_id += 1;
        let now = Utc::now();
        let created = User {
            id: state.next_user_id,
            email: user.email,
            password_hash: user.password_hash,
            role: user.role,
            is_active: true,
            display_name: user.display_name,
            created_at: now,
            updated_at: now,
            last_login: None,
        };
        state.users.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        let state = self.state.lock().await;
        let email_lower = email.to_lowercase();
        Ok(state
            .users
            .values()
            .find(|u| u.email.to_lowercase() == email_lower)
            .cloned())
    }

    async fn find_by_id(&self, id: i32) -> Result<Option<User>, AuthError> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn email_exists(&self, email: &str) -> Result<bool, AuthError> {
        Ok(UserStore::find_by_email(self, email).await?.is_some())
    }

    async fn update_password(&self, id: i32, password_hash: &str) -> Result<(), AuthError> {
        let mut state = self.state.lock().await;
        let user = state
            .users
            .get_mut(&id)
            .ok_or_else(|| AuthError::not_found("User", id))?;
        user.password_hash = password_hash.to_string();
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn update_last_login(&self, id: i32) -> Result<(), AuthError> {
        if let Some(user) = self.state.lock().await.users.get_mut(&id) {
            user.last_login = Some(Utc::now());
        }
        Ok(())
    }

    async fn deactivate(&self, id: i32) -> Result<(), AuthError> {
        let mut state = self.state.lock().await;
        let user = state
            .users
            .get_mut(&id)
            .ok_or_else(|| AuthError::not_found("User", id))?;
        user.is_active = false;
        user.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryStore {
    async fn create(&self, token: NewRefreshToken) -> Result<RefreshTokenRecord, AuthError> {
        self.state.lock().await.insert_token(token)
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<RefreshTokenRecord>, AuthError> {
        let state = self.state.lock().await;
        Ok(state
            .live_token_id(token, None)
            .and_then(|id| state.tokens.get(&id).cloned()))
    }

    async fn update_last_used(&self, token: &str) -> Result<(), AuthError> {
        let mut state = self.state.lock().await;
        let id = state
            .live_token_id(token, None)
            .ok_or_else(|| AuthError::not_found("Refresh token", "(redacted)"))?;
        if let Some(record) = state.tokens.get_mut(&id) {
            record.last_used = Some(Utc::now());
        }
        Ok(())
    }

    async fn delete_by_token(&self, token: &str) -> Result<bool, AuthError> {
        let mut state = self.state.lock().await;
        let token_hash = hash_token(token);
        let before = state.tokens.len();
        state.tokens.retain(|_, t| t.token_hash != token_hash);
        Ok(state.tokens.len() < before)
    }

    async fn delete_by_id_for_user(&self, user_id: i32, id: i32) -> Result<bool, AuthError> {
        let mut state = self.state.lock().await;
        let owned = state
            .tokens
            .get(&id)
            .map_or(false, |t| t.user_id == user_id && t.purpose == TokenPurpose::Refresh);
        if owned {
            state.tokens.remove(&id);
        }
        Ok(owned)
    }

    async fn delete_by_user_id(&self, user_id: i32) -> Result<u64, AuthError> {
        let mut state = self.state.lock().await;
        let before = state.tokens.len();
        state.tokens.retain(|_, t| t.user_id != user_id);
        Ok((before - state.tokens.len()) as u64)
    }

    async fn list_active(
        &self,
        user_id: i32,
        purpose: TokenPurpose,
    ) -> Result<Vec<RefreshTokenRecord>, AuthError> {
        let state = self.state.lock().await;
        let now = Utc::now();
        let mut records: Vec<RefreshTokenRecord> = state
            .tokens
            .values()
            .filter(|t| t.user_id == user_id && t.purpose == purpose && t.expires_at > now)
            .cloned()
            .collect();
        records.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(records)
    }

    async fn prune_oldest(&self, user_id: i32, keep_count: i64) -> Result<u64, AuthError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut live: Vec<(chrono::DateTime<Utc>, i32)> = state
            .tokens
            .values()
            .filter(|t| {
                t.user_id == user_id && t.purpose == TokenPurpose::Refresh && t.expires_at > now
            })
            .map(|t| (t.created_at, t.id))
            .collect();
        live.sort_by(|a, b| b.cmp(a));

        let doomed: Vec<i32> = live
            .into_iter()
            .skip(keep_count.max(0) as usize)
            .map(|(_, id)| id)
            .collect();
        for id in &doomed {
            state.tokens.remove(id);
        }
        Ok(doomed.len() as u64)
    }

    async fn revoke_all(&self, user_id: i32) -> Result<u64, AuthError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut revoked = 0;
        for record in state.tokens.values_mut() {
            if record.user_id == user_id && record.expires_at > now {
                record.expires_at = now - Duration::seconds(1);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn hard_delete_expired(&self, older_than_days: i64) -> Result<u64, AuthError> {
        let cutoff = grace_cutoff(older_than_days)?;
        let mut state = self.state.lock().await;
        let before = state.tokens.len();
        state.tokens.retain(|_, t| t.expires_at >= cutoff);
        Ok((before - state.tokens.len()) as u64)
    }

    async fn stats(&self, user_id: i32) -> Result<TokenStats, AuthError> {
        let state = self.state.lock().await;
        let now = Utc::now();
        let owned = state
            .tokens
            .values()
            .filter(|t| t.user_id == user_id && t.purpose == TokenPurpose::Refresh);

        let mut stats = TokenStats::default();
        for record in owned {
            stats.total_count += 1;
            if record.expires_at > now {
                stats.active_count += 1;
            }
            stats.last_used = stats.last_used.max(record.last_used);
        }
        Ok(stats)
    }

    async fn rotate(
        &self,
        old_token: &str,
        new_token: NewRefreshToken,
    ) -> Result<Option<RefreshTokenRecord>, AuthError> {
        let mut state = self.state.lock().await;
        let Some(old_id) = state.live_token_id(old_token, Some(TokenPurpose::Refresh)) else {
            return Ok(None);
        };

        let removed = state.tokens.remove(&old_id);
        match state.insert_token(new_token) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                // Roll back
                if let Some(old) = removed {
                    state.tokens.insert(old.id, old);
                }
                Err(e)
            }
        }
    }

    async fn consume(
        &self,
        token: &str,
        purpose: TokenPurpose,
    ) -> Result<Option<RefreshTokenRecord>, AuthError> {
        let mut state = self.state.lock().await;
        Ok(state
            .live_token_id(token, Some(purpose))
            .and_then(|id| state.tokens.remove(&id)))
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create(&self, session: NewSession) -> Result<(SessionRecord, String), AuthError> {
        let token = generate_opaque_token();
        let now = Utc::now();
        let record = SessionRecord {
            id: Uuid::new_v4(),
            user_id: session.user_id,
            session_token_hash: hash_token(&token),
            device_info: session.device_info,
            ip_address: session.ip_address,
            user_agent: session.user_agent,
            expires_at: session.expires_at.unwrap_or_else(|| default_expiry(now)),
            last_accessed: now,
            is_active: true,
            created_at: now,
        };

        self.state
            .lock()
            .await
            .sessions
            .insert(record.id, record.clone());
        Ok((record, token))
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<SessionRecord>, AuthError> {
        let state = self.state.lock().await;
        Ok(state
            .live_session_id(token)
            .and_then(|id| state.sessions.get(&id).cloned()))
    }

    async fn find_by_token_with_user(
        &self,
        token: &str,
    ) -> Result<Option<SessionWithUser>, AuthError> {
        let state = self.state.lock().await;
        let Some(session) = state
            .live_session_id(token)
            .and_then(|id| state.sessions.get(&id).cloned())
        else {
            return Ok(None);
        };

        Ok(state
            .users
            .get(&session.user_id)
            .filter(|u| u.is_active)
            .cloned()
            .map(|user| SessionWithUser { session, user }))
    }

    async fn find_by_user_id(&self, user_id: i32) -> Result<Vec<SessionRecord>, AuthError> {
        let state = self.state.lock().await;
        let now = Utc::now();
        let mut sessions: Vec<SessionRecord> = state
            .sessions
            .values()
            .filter(|s| s.user_id == user_id && s.is_active && s.expires_at > now)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));
        Ok(sessions)
    }

    async fn touch(&self, token: &str) -> Result<(), AuthError> {
        let mut state = self.state.lock().await;
        let id = state
            .live_session_id(token)
            .ok_or_else(|| AuthError::not_found("Session", "(redacted)"))?;
        if let Some(session) = state.sessions.get_mut(&id) {
            session.last_accessed = Utc::now();
        }
        Ok(())
    }

    async fn deactivate(&self, token: &str) -> Result<bool, AuthError> {
        let mut state = self.state.lock().await;
        let token_hash = hash_token(token);
        let now = Utc::now();
        let mut changed = false;
        for session in state.sessions.values_mut() {
            if session.session_token_hash == token_hash && session.is_active {
                session.is_active = false;
                session.expires_at = session.expires_at.min(now);
                changed = true;
            }
        }
        Ok(changed)
    }

    async fn deactivate_all(&self, user_id: i32) -> Result<u64, AuthError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut count = 0;
        for session in state.sessions.values_mut() {
            if session.user_id == user_id && session.is_active {
                session.is_active = false;
                session.expires_at = session.expires_at.min(now);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn cleanup_expired(&self, older_than_days: i64) -> Result<u64, AuthError> {
        let cutoff = grace_cutoff(older_than_days)?;
        let mut state = self.state.lock().await;
        let before = state.sessions.len();
        state.sessions.retain(|_, s| s.expires_at >= cutoff);
        Ok((before - state.sessions.len()) as u64)
    }
}
