// HTTP tests for the identity endpoints
// The router runs over in-memory stores; the `postgres` module needs DATABASE_URL

use std::sync::Arc;

use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum_test::{TestResponse, TestServer};
use serde_json::{json, Value};

use crate::auth::{
    memory::MemoryStore,
    models::{ClientInfo, NewUser, Role},
    password::PasswordService,
    repository::UserStore,
    service::AuthService,
};
use crate::config::AuthConfig;

const PASSWORD: &str = "Str0ng!Passw0rd";
const NEW_PASSWORD: &str = "An0ther!Secret9";

// ============================================================================
// Test Helpers
// ============================================================================

fn test_config() -> AuthConfig {
    let mut config = AuthConfig::new("test_access_secret", "test_refresh_secret");
    config.password_hash_memory_kib = 256;
    config.password_hash_iterations = 1;
    config
}

/// Router over fresh in-memory stores, plus handles for direct setup
fn create_test_app() -> (TestServer, Arc<AuthService>, MemoryStore) {
    let store = MemoryStore::new();
    let shared = Arc::new(store.clone());
    let service =
        Arc::new(AuthService::new(test_config(), shared.clone(), shared.clone(), shared).unwrap());

    let server = TestServer::new(crate::create_router(service.clone())).unwrap();
    (server, service, store)
}

fn bearer(token: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("Bearer {}", token)).unwrap()
}

fn header_value(value: &str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap()
}

fn set_cookies(response: &TestResponse) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect()
}

async fn register(server: &TestServer, email: &str) -> Value {
    let response = server
        .post("/api/auth/register")
        .json(&json!({
            "email": email,
            "password": PASSWORD,
            "display_name": "Test User",
            "device_info": "laptop"
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    response.json::<Value>()
}

fn field<'a>(body: &'a Value, name: &str) -> &'a str {
    body[name].as_str().unwrap()
}

// ============================================================================
// Registration and login
// ============================================================================

#[tokio::test]
async fn test_register_returns_tokens_and_cookies() {
    let (server, _, _) = create_test_app();

    let response = server
        .post("/api/auth/register")
        .add_header(header::USER_AGENT, header_value("integration-test"))
        .json(&json!({ "email": "new@example.com", "password": PASSWORD }))
        .await;

    assert_eq!(response.status_code(), StatusCode::CREATED);
    let body = response.json::<Value>();
    assert!(!field(&body, "access_token").is_empty());
    assert!(!field(&body, "refresh_token").is_empty());
    assert!(!field(&body, "session_token").is_empty());
    assert_eq!(body["user"]["email"], "new@example.com");
    assert_eq!(body["user"]["role"], "user");
    assert!(body["user"].get("password_hash").is_none());

    let cookies = set_cookies(&response);
    let refresh_cookie = cookies
        .iter()
        .find(|c| c.starts_with("refresh_token="))
        .expect("refresh cookie");
    assert!(refresh_cookie.contains("HttpOnly"));
    assert!(refresh_cookie.contains("SameSite=Strict"));
    assert!(refresh_cookie.contains("Path=/api/auth"));
    assert!(refresh_cookie.contains("Max-Age=2592000"));
    assert!(!refresh_cookie.contains("Secure"));
    assert!(cookies.iter().any(|c| c.starts_with("session_token=")));
}

#[tokio::test]
async fn test_register_weak_password_lists_violations() {
    let (server, _, _) = create_test_app();

    let response = server
        .post("/api/auth/register")
        .json(&json!({ "email": "weak@example.com", "password": "password" }))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body = response.json::<Value>();
    assert_eq!(body["error"], "VALIDATION_ERROR");
    assert!(body["details"].as_array().unwrap().len() >= 3);
}

#[tokio::test]
async fn test_register_invalid_email_is_rejected() {
    let (server, _, _) = create_test_app();

    let response = server
        .post("/api/auth/register")
        .json(&json!({ "email": "not-an-email", "password": PASSWORD }))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body = response.json::<Value>();
    assert_eq!(body["details"][0], "Email must be a valid address");
}

#[tokio::test]
async fn test_register_duplicate_email_conflicts() {
    let (server, _, _) = create_test_app();
    register(&server, "dup@example.com").await;

    let response = server
        .post("/api/auth/register")
        .json(&json!({ "email": "Dup@Example.com", "password": PASSWORD }))
        .await;

    assert_eq!(response.status_code(), StatusCode::CONFLICT);
    assert_eq!(response.json::<Value>()["error"], "CONFLICT");
}

#[tokio::test]
async fn test_login_wrong_password_is_unauthorized() {
    let (server, _, _) = create_test_app();
    register(&server, "login@example.com").await;

    let wrong = server
        .post("/api/auth/login")
        .json(&json!({ "email": "login@example.com", "password": "Wr0ng!Password" }))
        .await;
    let unknown = server
        .post("/api/auth/login")
        .json(&json!({ "email": "ghost@example.com", "password": PASSWORD }))
        .await;

    for response in [wrong, unknown] {
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
        let body = response.json::<Value>();
        assert_eq!(body["error"], "INVALID_CREDENTIALS");
        assert_eq!(body["message"], "Invalid email or password");
    }
}

#[tokio::test]
async fn test_login_succeeds_with_right_password() {
    let (server, _, _) = create_test_app();
    register(&server, "ok@example.com").await;

    let response = server
        .post("/api/auth/login")
        .json(&json!({ "email": "ok@example.com", "password": PASSWORD, "device_info": "phone" }))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>()["user"]["email"], "ok@example.com");
}

// ============================================================================
// Access tokens
// ============================================================================

#[tokio::test]
async fn test_me_requires_bearer_token() {
    let (server, _, _) = create_test_app();
    let body = register(&server, "me@example.com").await;

    let missing = server.get("/api/auth/me").await;
    assert_eq!(missing.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(missing.json::<Value>()["error"], "MISSING_TOKEN");

    let malformed = server
        .get("/api/auth/me")
        .add_header(header::AUTHORIZATION, header_value("Token abc"))
        .await;
    assert_eq!(malformed.json::<Value>()["error"], "INVALID_TOKEN");

    // A refresh token is not accepted as an access token
    let wrong_kind = server
        .get("/api/auth/me")
        .add_header(header::AUTHORIZATION, bearer(field(&body, "refresh_token")))
        .await;
    assert_eq!(wrong_kind.status_code(), StatusCode::UNAUTHORIZED);

    let ok = server
        .get("/api/auth/me")
        .add_header(header::AUTHORIZATION, bearer(field(&body, "access_token")))
        .await;
    assert_eq!(ok.status_code(), StatusCode::OK);
    let me = ok.json::<Value>();
    assert_eq!(me["email"], "me@example.com");
    assert_eq!(me["display_name"], "Test User");
}

// ============================================================================
// Refresh rotation and logout
// ============================================================================

#[tokio::test]
async fn test_refresh_via_body_is_single_use() {
    let (server, _, _) = create_test_app();
    let body = register(&server, "rotate@example.com").await;
    let original = field(&body, "refresh_token").to_string();

    let first = server
        .post("/api/auth/refresh")
        .json(&json!({ "refresh_token": original }))
        .await;
    assert_eq!(first.status_code(), StatusCode::OK);
    let rotated = first.json::<Value>();
    assert_ne!(field(&rotated, "refresh_token"), original);
    assert!(rotated.get("session_token").is_none());

    let replay = server
        .post("/api/auth/refresh")
        .json(&json!({ "refresh_token": original }))
        .await;
    assert_eq!(replay.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(replay.json::<Value>()["error"], "INVALID_TOKEN");
}

#[tokio::test]
async fn test_refresh_prefers_cookie() {
    let (server, _, _) = create_test_app();
    let body = register(&server, "cookie@example.com").await;
    let cookie = format!("refresh_token={}", field(&body, "refresh_token"));

    let response = server
        .post("/api/auth/refresh")
        .add_header(header::COOKIE, header_value(&cookie))
        .json(&json!({ "refresh_token": "ignored-when-cookie-present" }))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert!(set_cookies(&response)
        .iter()
        .any(|c| c.starts_with("refresh_token=")));
}

#[tokio::test]
async fn test_refresh_without_token_is_missing() {
    let (server, _, _) = create_test_app();
    let response = server.post("/api/auth/refresh").await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.json::<Value>()["error"], "MISSING_TOKEN");
}

#[tokio::test]
async fn test_logout_revokes_refresh_and_session() {
    let (server, _, _) = create_test_app();
    let body = register(&server, "logout@example.com").await;
    let refresh = field(&body, "refresh_token").to_string();
    let session = field(&body, "session_token").to_string();

    let response = server
        .post("/api/auth/logout")
        .add_header(header::COOKIE, header_value(&format!("refresh_token={}", refresh)))
        .add_header(
            HeaderName::from_static("x-session-token"),
            header_value(&session),
        )
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert!(set_cookies(&response)
        .iter()
        .any(|c| c.starts_with("refresh_token=") && c.contains("Max-Age=0")));

    // Idempotent
    let again = server
        .post("/api/auth/logout")
        .json(&json!({ "refresh_token": refresh }))
        .await;
    assert_eq!(again.status_code(), StatusCode::OK);

    let refresh_after = server
        .post("/api/auth/refresh")
        .json(&json!({ "refresh_token": refresh }))
        .await;
    assert_eq!(refresh_after.status_code(), StatusCode::UNAUTHORIZED);

    let session_after = server
        .get("/api/auth/session")
        .add_header(
            HeaderName::from_static("x-session-token"),
            header_value(&session),
        )
        .await;
    assert_eq!(session_after.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_all_ends_every_device() {
    let (server, _, _) = create_test_app();
    let first = register(&server, "everywhere@example.com").await;
    let second = server
        .post("/api/auth/login")
        .json(&json!({ "email": "everywhere@example.com", "password": PASSWORD }))
        .await
        .json::<Value>();

    let response = server
        .post("/api/auth/logout-all")
        .add_header(header::AUTHORIZATION, bearer(field(&second, "access_token")))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    for body in [&first, &second] {
        let refresh = server
            .post("/api/auth/refresh")
            .json(&json!({ "refresh_token": field(body, "refresh_token") }))
            .await;
        assert_eq!(refresh.status_code(), StatusCode::UNAUTHORIZED);
    }
}

// ============================================================================
// Session management
// ============================================================================

#[tokio::test]
async fn test_list_and_revoke_refresh_sessions() {
    let (server, _, _) = create_test_app();
    let alice = register(&server, "alice@example.com").await;
    let bob = register(&server, "bob@example.com").await;

    let sessions = server
        .get("/api/auth/sessions")
        .add_header(header::AUTHORIZATION, bearer(field(&alice, "access_token")))
        .await
        .json::<Value>();
    let list = sessions.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["device_info"], "laptop");
    let id = list[0]["id"].as_i64().unwrap();

    let foreign = server
        .delete(&format!("/api/auth/sessions/{}", id))
        .add_header(header::AUTHORIZATION, bearer(field(&bob, "access_token")))
        .await;
    assert_eq!(foreign.status_code(), StatusCode::NOT_FOUND);

    let own = server
        .delete(&format!("/api/auth/sessions/{}", id))
        .add_header(header::AUTHORIZATION, bearer(field(&alice, "access_token")))
        .await;
    assert_eq!(own.status_code(), StatusCode::OK);

    let refresh = server
        .post("/api/auth/refresh")
        .json(&json!({ "refresh_token": field(&alice, "refresh_token") }))
        .await;
    assert_eq!(refresh.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_session_token_via_header_and_cookie() {
    let (server, _, _) = create_test_app();
    let body = register(&server, "device@example.com").await;
    let session = field(&body, "session_token").to_string();

    let via_header = server
        .get("/api/auth/session")
        .add_header(
            HeaderName::from_static("x-session-token"),
            header_value(&session),
        )
        .await;
    assert_eq!(via_header.status_code(), StatusCode::OK);
    let info = via_header.json::<Value>();
    assert_eq!(info["user"]["email"], "device@example.com");
    assert_eq!(info["session"]["device_info"], "laptop");

    let via_cookie = server
        .get("/api/auth/session")
        .add_header(header::COOKIE, header_value(&format!("session_token={}", session)))
        .await;
    assert_eq!(via_cookie.status_code(), StatusCode::OK);

    let missing = server.get("/api/auth/session").await;
    assert_eq!(missing.status_code(), StatusCode::UNAUTHORIZED);

    let devices = server
        .get("/api/auth/device-sessions")
        .add_header(header::AUTHORIZATION, bearer(field(&body, "access_token")))
        .await
        .json::<Value>();
    assert_eq!(devices.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_token_stats_counts_refresh_tokens() {
    let (server, _, _) = create_test_app();
    let body = register(&server, "stats@example.com").await;
    server
        .post("/api/auth/login")
        .json(&json!({ "email": "stats@example.com", "password": PASSWORD }))
        .await;

    let stats = server
        .get("/api/auth/token-stats")
        .add_header(header::AUTHORIZATION, bearer(field(&body, "access_token")))
        .await
        .json::<Value>();
    assert_eq!(stats["active_count"], 2);
    assert_eq!(stats["total_count"], 2);
}

// ============================================================================
// Passwords
// ============================================================================

#[tokio::test]
async fn test_change_password_revokes_refresh_tokens() {
    let (server, _, _) = create_test_app();
    let body = register(&server, "change@example.com").await;

    let bad_login = server
        .post("/api/auth/login")
        .json(&json!({ "email": "change@example.com", "password": "Wr0ng!Password" }))
        .await;
    assert_eq!(bad_login.status_code(), StatusCode::UNAUTHORIZED);

    let changed = server
        .post("/api/auth/change-password")
        .add_header(header::AUTHORIZATION, bearer(field(&body, "access_token")))
        .json(&json!({ "current_password": PASSWORD, "new_password": NEW_PASSWORD }))
        .await;
    assert_eq!(changed.status_code(), StatusCode::OK);

    let old_refresh = server
        .post("/api/auth/refresh")
        .json(&json!({ "refresh_token": field(&body, "refresh_token") }))
        .await;
    assert_eq!(old_refresh.status_code(), StatusCode::UNAUTHORIZED);

    let login = server
        .post("/api/auth/login")
        .json(&json!({ "email": "change@example.com", "password": NEW_PASSWORD }))
        .await;
    assert_eq!(login.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn test_password_reset_flow() {
    let (server, service, _) = create_test_app();
    register(&server, "reset@example.com").await;

    // Same answer for known and unknown accounts
    let known = server
        .post("/api/auth/password-reset/request")
        .json(&json!({ "email": "reset@example.com" }))
        .await;
    let unknown = server
        .post("/api/auth/password-reset/request")
        .json(&json!({ "email": "nobody@example.com" }))
        .await;
    assert_eq!(known.status_code(), StatusCode::OK);
    assert_eq!(known.json::<Value>(), unknown.json::<Value>());

    let token = service
        .reset_password("reset@example.com")
        .await
        .unwrap()
        .unwrap();

    let confirmed = server
        .post("/api/auth/password-reset/confirm")
        .json(&json!({ "token": token, "new_password": NEW_PASSWORD }))
        .await;
    assert_eq!(confirmed.status_code(), StatusCode::OK);

    let reused = server
        .post("/api/auth/password-reset/confirm")
        .json(&json!({ "token": token, "new_password": NEW_PASSWORD }))
        .await;
    assert_eq!(reused.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(reused.json::<Value>()["error"], "INVALID_RESET_TOKEN");

    let login = server
        .post("/api/auth/login")
        .json(&json!({ "email": "reset@example.com", "password": NEW_PASSWORD }))
        .await;
    assert_eq!(login.status_code(), StatusCode::OK);
}

// ============================================================================
// Admin routes
// ============================================================================

#[tokio::test]
async fn test_deactivate_user_requires_admin() {
    let (server, service, store) = create_test_app();
    let target = register(&server, "target@example.com").await;
    let target_id = target["user"]["id"].as_i64().unwrap();

    let hasher = PasswordService::new(256, 1).unwrap();
    store
        .create(NewUser {
            email: "admin@example.com".to_string(),
            password_hash: hasher.hash(PASSWORD).unwrap(),
            role: Role::Admin,
            display_name: None,
        })
        .await
        .unwrap();
    let admin = service
        .login("admin@example.com", PASSWORD, ClientInfo::default())
        .await
        .unwrap();

    let path = format!("/api/auth/users/{}", target_id);
    let forbidden = server
        .delete(&path)
        .add_header(header::AUTHORIZATION, bearer(field(&target, "access_token")))
        .await;
    assert_eq!(forbidden.status_code(), StatusCode::FORBIDDEN);
    assert_eq!(forbidden.json::<Value>()["error"], "FORBIDDEN");

    let anonymous = server.delete(&path).await;
    assert_eq!(anonymous.status_code(), StatusCode::UNAUTHORIZED);

    let ok = server
        .delete(&path)
        .add_header(header::AUTHORIZATION, bearer(&admin.access_token))
        .await;
    assert_eq!(ok.status_code(), StatusCode::OK);

    let login = server
        .post("/api/auth/login")
        .json(&json!({ "email": "target@example.com", "password": PASSWORD }))
        .await;
    assert_eq!(login.status_code(), StatusCode::UNAUTHORIZED);

    let missing = server
        .delete("/api/auth/users/9999")
        .add_header(header::AUTHORIZATION, bearer(&admin.access_token))
        .await;
    assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let (server, _, _) = create_test_app();
    let response = server.get("/api-docs/openapi.json").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let doc = response.json::<Value>();
    assert!(doc["paths"].get("/api/auth/register").is_some());
}

// ============================================================================
// Postgres stores (run with `cargo test -- --ignored` and DATABASE_URL set)
// ============================================================================

mod postgres {
    use super::*;
    use crate::auth::{
        models::{NewRefreshToken, TokenPurpose},
        refresh_tokens::{PgRefreshTokenStore, RefreshTokenStore},
        sessions::{PgSessionStore, SessionStore},
        AuthError,
    };
    use chrono::{Duration, Utc};
    use sqlx::PgPool;

    async fn create_test_pool() -> PgPool {
        let database_url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set for Postgres tests");

        let pool = crate::db::create_pool(&database_url)
            .await
            .expect("Failed to connect to test database");
        crate::db::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        pool
    }

    fn unique_email(prefix: &str) -> String {
        format!("{}-{}@example.com", prefix, uuid::Uuid::new_v4().simple())
    }

    async fn pg_service() -> (AuthService, PgPool) {
        let pool = create_test_pool().await;
        let service = crate::db::postgres_auth_service(test_config(), pool.clone()).unwrap();
        (service, pool)
    }

    #[tokio::test]
    #[ignore]
    async fn test_pg_rotation_is_single_use() {
        let (service, _) = pg_service().await;
        let issued = service
            .register(&unique_email("rotate"), PASSWORD, None, ClientInfo::default())
            .await
            .unwrap();

        service
            .refresh(&issued.refresh_token, ClientInfo::default())
            .await
            .unwrap();
        let replay = service.refresh(&issued.refresh_token, ClientInfo::default()).await;
        assert!(matches!(replay, Err(AuthError::InvalidToken)));
    }

    #[tokio::test]
    #[ignore]
    async fn test_pg_concurrent_rotation_has_one_winner() {
        let (service, _) = pg_service().await;
        let issued = service
            .register(&unique_email("race"), PASSWORD, None, ClientInfo::default())
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            service.refresh(&issued.refresh_token, ClientInfo::default()),
            service.refresh(&issued.refresh_token, ClientInfo::default()),
        );
        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
    }

    #[tokio::test]
    #[ignore]
    async fn test_pg_login_prunes_to_five() {
        let (service, _) = pg_service().await;
        let email = unique_email("prune");
        let issued = service
            .register(&email, PASSWORD, None, ClientInfo::default())
            .await
            .unwrap();

        for _ in 0..6 {
            service.login(&email, PASSWORD, ClientInfo::default()).await.unwrap();
        }
        assert_eq!(service.list_sessions(issued.user.id).await.unwrap().len(), 5);
    }

    #[tokio::test]
    #[ignore]
    async fn test_pg_reset_token_is_single_use() {
        let (service, _) = pg_service().await;
        let email = unique_email("reset");
        service
            .register(&email, PASSWORD, None, ClientInfo::default())
            .await
            .unwrap();

        let token = service.reset_password(&email).await.unwrap().unwrap();
        service.confirm_password_reset(&token, NEW_PASSWORD).await.unwrap();
        let again = service.confirm_password_reset(&token, NEW_PASSWORD).await;
        assert!(matches!(again, Err(AuthError::InvalidResetToken)));
    }

    #[tokio::test]
    #[ignore]
    async fn test_pg_hard_delete_respects_grace_window() {
        let (service, pool) = pg_service().await;
        let issued = service
            .register(&unique_email("grace"), PASSWORD, None, ClientInfo::default())
            .await
            .unwrap();
        let store = PgRefreshTokenStore::new(pool.clone());

        for (token, days) in [("six", 6), ("eight", 8)] {
            store
                .create(NewRefreshToken {
                    user_id: issued.user.id,
                    token: format!("{}-{}", token, uuid::Uuid::new_v4()),
                    purpose: TokenPurpose::Refresh,
                    expires_at: Utc::now() - Duration::days(days),
                    device_info: None,
                    ip_address: None,
                })
                .await
                .unwrap();
        }

        store.hard_delete_expired(7).await.unwrap();
        let stats = store.stats(issued.user.id).await.unwrap();
        // The live registration token plus the six-day-old one
        assert_eq!(stats.total_count, 2);
    }

    #[tokio::test]
    #[ignore]
    async fn test_pg_session_lookup_joins_user() {
        let (service, pool) = pg_service().await;
        let email = unique_email("session");
        let issued = service
            .register(&email, PASSWORD, None, ClientInfo::default())
            .await
            .unwrap();
        let token = issued.session_token.unwrap();

        let sessions = PgSessionStore::new(pool);
        let found = sessions.find_by_token_with_user(&token).await.unwrap().unwrap();
        assert_eq!(found.user.email, email);
        sessions.touch(&token).await.unwrap();

        assert!(sessions.deactivate(&token).await.unwrap());
        assert!(sessions.find_by_token(&token).await.unwrap().is_none());
    }
}
