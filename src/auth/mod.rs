// Authentication module
// Password hashing, JWT access/refresh tokens, refresh token rotation,
// opaque device sessions and the cleanup sweep

pub mod cleanup;
pub mod error;
pub mod handlers;
pub mod memory;
pub mod middleware;
pub mod models;
pub mod password;
pub mod refresh_tokens;
pub mod repository;
pub mod service;
pub mod sessions;
pub mod token;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use cleanup::{CleanupReport, CleanupScheduler};
pub use error::{AuthError, ErrorKind};
pub use handlers::{router, ApiDoc};
pub use memory::MemoryStore;
pub use middleware::{AuthenticatedUser, RequireRole, SessionUser};
pub use models::{AuthContext, ClientInfo, IssuedCredentials, Role, User, UserResponse};
pub use password::PasswordService;
pub use refresh_tokens::{PgRefreshTokenStore, RefreshTokenStore};
pub use repository::{UserRepository, UserStore};
pub use service::AuthService;
pub use sessions::{PgSessionStore, SessionStore};
pub use token::TokenService;
