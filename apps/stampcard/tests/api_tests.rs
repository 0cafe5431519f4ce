//! Integration tests for the stamp card HTTP API.
//!
//! Uses axum-test to test the API handlers without starting a real server.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use axum::http::{HeaderValue, StatusCode, header};
use axum_test::TestServer;
use serde_json::{Value, json};
use stampcard::api::{
    AppState, ErrorResponse, GrantResponse, GrantsResponse, HealthResponse, IdentityVerifier,
    LoginResponse, ProfileResponse, RevokeResponse, SessionKeys, StampsResponse, UserResponse,
    UsersResponse, create_router,
};
use stampcard::config::{AppConfig, HttpConfig};
use stampcard::error::AppError;
use stampcard_core::{Actor, Ledger, Role, VerifiedIdentity};
use std::sync::Arc;

const SESSION_SECRET: &str = "test-session-secret-test-session";
const DOMAIN: &str = "jeohyeon.hs.kr";

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Accepts identity tokens of the form `uid|email|name`.
struct StubVerifier;

impl IdentityVerifier for StubVerifier {
    fn verify(&self, id_token: &str) -> Result<VerifiedIdentity, AppError> {
        let mut parts = id_token.splitn(3, '|');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(uid), Some(email), name) if !uid.is_empty() && !email.is_empty() => Ok(
                VerifiedIdentity::new(uid, email, name.unwrap_or_default()),
            ),
            _ => Err(AppError::Unauthorized("invalid identity token".to_string())),
        }
    }
}

fn no_rate_limit() -> HttpConfig {
    HttpConfig {
        rate_limit: 0,
        ..HttpConfig::default()
    }
}

/// Create a test server with a fresh in-memory ledger.
///
/// Returns the ledger too, so tests can seed roles directly.
fn create_test_server_with(http: &HttpConfig) -> (TestServer, Arc<Ledger>) {
    let sessions = SessionKeys::new(SESSION_SECRET, "stampcard-test", 3600).unwrap();
    let state = AppState::new(Ledger::in_memory(), sessions, Arc::new(StubVerifier), DOMAIN);
    let ledger = Arc::clone(&state.ledger);
    let router = create_router(state, http);
    (TestServer::new(router).unwrap(), ledger)
}

fn create_test_server() -> (TestServer, Arc<Ledger>) {
    create_test_server_with(&no_rate_limit())
}

fn bearer(token: &str) -> HeaderValue {
    format!("Bearer {}", token).parse::<HeaderValue>().unwrap()
}

fn local_part(email: &str) -> &str {
    email.split('@').next().unwrap_or_default()
}

/// Log in and return the session token.
async fn login(server: &TestServer, email: &str) -> String {
    let id_token = format!("uid-{}|{}|{}", local_part(email), email, local_part(email));
    let response = server
        .post("/api/login")
        .json(&json!({ "id_token": id_token }))
        .await;
    response.assert_status_ok();
    let login: LoginResponse = response.json();
    login.access_token
}

/// Change a role directly in the ledger, as a bootstrap admin would.
fn promote(ledger: &Ledger, email: &str, role: Role) {
    let root = Actor::new("root@localhost", Role::Admin);
    ledger.set_role(&root, email, role).unwrap();
}

async fn login_as(server: &TestServer, ledger: &Ledger, email: &str, role: Role) -> String {
    let token = login(server, email).await;
    if role != Role::Student {
        promote(ledger, email, role);
    }
    token
}

async fn grant(server: &TestServer, token: &str, body: Value) -> axum_test::TestResponse {
    server
        .post("/api/stamps/grant")
        .add_header(header::AUTHORIZATION, bearer(token))
        .json(&body)
        .await
}

async fn stamps_of(server: &TestServer, token: &str, email: &str) -> StampsResponse {
    let response = server
        .get("/api/stamps")
        .add_query_param("email", email)
        .add_header(header::AUTHORIZATION, bearer(token))
        .await;
    response.assert_status_ok();
    response.json()
}

fn error_kind(response: &axum_test::TestResponse) -> String {
    let error: ErrorResponse = response.json();
    error.kind
}

// =============================================================================
// HEALTH ENDPOINT TESTS
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let (server, _) = create_test_server();

    let response = server.get("/health").await;

    response.assert_status_ok();
    let health: HealthResponse = response.json();
    assert_eq!(health.status, "ok");
    assert!(!health.version.is_empty());
    assert!(!health.persistent);
}

// =============================================================================
// LOGIN TESTS
// =============================================================================

#[tokio::test]
async fn test_first_login_creates_student() {
    let (server, _) = create_test_server();

    let response = server
        .post("/api/login")
        .json(&json!({ "id_token": "uid-1|Kim@Jeohyeon.hs.kr|Kim Minji" }))
        .await;

    response.assert_status_ok();
    let login: LoginResponse = response.json();
    assert_eq!(login.token_type, "Bearer");
    assert!(!login.access_token.is_empty());
    assert_eq!(login.user.email, "kim@jeohyeon.hs.kr");
    assert_eq!(login.user.display_name, "Kim Minji");
    assert_eq!(login.user.role, Role::Student);
    assert_eq!(login.user.stamp_count, 0);
}

#[tokio::test]
async fn test_login_keeps_existing_profile() {
    let (server, ledger) = create_test_server();
    login_as(&server, &ledger, "kim@jeohyeon.hs.kr", Role::Manager).await;

    let response = server
        .post("/api/login")
        .json(&json!({ "id_token": "uid-kim|kim@jeohyeon.hs.kr|Other Name" }))
        .await;

    let login: LoginResponse = response.json();
    assert_eq!(login.user.role, Role::Manager);
    assert_eq!(login.user.display_name, "kim");
}

#[tokio::test]
async fn test_login_outside_domain_forbidden() {
    let (server, _) = create_test_server();

    let response = server
        .post("/api/login")
        .json(&json!({ "id_token": "uid-1|kim@gmail.com|Kim" }))
        .await;

    response.assert_status(StatusCode::FORBIDDEN);
    assert_eq!(error_kind(&response), "forbidden");
}

#[tokio::test]
async fn test_login_requires_token() {
    let (server, _) = create_test_server();

    let response = server.post("/api/login").json(&json!({})).await;
    response.assert_status_bad_request();
    assert_eq!(error_kind(&response), "invalid_request");

    let response = server
        .post("/api/login")
        .json(&json!({ "id_token": "garbage" }))
        .await;
    response.assert_status_unauthorized();
}

// =============================================================================
// SESSION TESTS
// =============================================================================

#[tokio::test]
async fn test_protected_routes_require_session() {
    let (server, _) = create_test_server();

    for path in ["/api/profile", "/api/stamps", "/api/users", "/api/grants"] {
        let response = server.get(path).await;
        assert_eq!(
            response.status_code(),
            StatusCode::UNAUTHORIZED,
            "{} without a token",
            path
        );
    }

    let response = server
        .get("/api/profile")
        .add_header(header::AUTHORIZATION, bearer("not-a-jwt"))
        .await;
    response.assert_status_unauthorized();
    assert_eq!(error_kind(&response), "unauthorized");
}

#[tokio::test]
async fn test_token_from_other_server_rejected() {
    let (server, _) = create_test_server();
    let other_keys = SessionKeys::new("another-secret-another-secret-00", "stampcard-test", 3600)
        .unwrap();
    let user = stampcard_core::User::first_login(
        &VerifiedIdentity::new("uid-x", "x@jeohyeon.hs.kr", "X"),
        "x@jeohyeon.hs.kr".to_string(),
        chrono::Utc::now(),
    );
    let (token, _) = other_keys.issue(&user, chrono::Utc::now()).unwrap();

    let response = server
        .get("/api/profile")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await;
    response.assert_status_unauthorized();
}

// =============================================================================
// PROFILE TESTS
// =============================================================================

#[tokio::test]
async fn test_profile_read_and_rename() {
    let (server, _) = create_test_server();
    let token = login(&server, "kim@jeohyeon.hs.kr").await;

    let response = server
        .get("/api/profile")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await;
    response.assert_status_ok();
    let profile: ProfileResponse = response.json();
    assert_eq!(profile.user.email, "kim@jeohyeon.hs.kr");

    let response = server
        .post("/api/profile")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .json(&json!({ "display_name": "  Minji  " }))
        .await;
    response.assert_status_ok();
    let profile: ProfileResponse = response.json();
    assert_eq!(profile.user.display_name, "Minji");

    let response = server
        .post("/api/profile")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .json(&json!({ "display_name": "   " }))
        .await;
    response.assert_status_bad_request();
}

// =============================================================================
// STAMP TESTS
// =============================================================================

#[tokio::test]
async fn test_own_card_starts_empty() {
    let (server, _) = create_test_server();
    let token = login(&server, "kim@jeohyeon.hs.kr").await;

    let response = server
        .get("/api/stamps")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["email"], "kim@jeohyeon.hs.kr");
    assert_eq!(body["granted_count"], 0);
    assert_eq!(body["total_slots"], 34);
    assert_eq!(body["complete"], false);
    let slots = body["stamps"].as_object().unwrap();
    assert_eq!(slots.len(), 34);
    assert_eq!(slots["stamp1"], false);
    assert_eq!(slots["stamp34"], false);
}

#[tokio::test]
async fn test_card_of_unknown_user_not_found() {
    let (server, _) = create_test_server();
    let token = login(&server, "kim@jeohyeon.hs.kr").await;

    let response = server
        .get("/api/stamps")
        .add_query_param("email", "ghost@jeohyeon.hs.kr")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await;

    response.assert_status_not_found();
    assert_eq!(error_kind(&response), "target_not_found");
}

#[tokio::test]
async fn test_student_cannot_grant() {
    let (server, _) = create_test_server();
    let token = login(&server, "kim@jeohyeon.hs.kr").await;
    login(&server, "lee@jeohyeon.hs.kr").await;

    let response = grant(
        &server,
        &token,
        json!({ "target_email": "lee@jeohyeon.hs.kr", "auto": true }),
    )
    .await;

    response.assert_status_forbidden();
    assert_eq!(error_kind(&response), "permission_denied");
}

#[tokio::test]
async fn test_manager_grants_once_per_student() {
    let (server, ledger) = create_test_server();
    let manager = login_as(&server, &ledger, "booth1@jeohyeon.hs.kr", Role::Manager).await;
    let student = login(&server, "kim@jeohyeon.hs.kr").await;

    let response = grant(
        &server,
        &manager,
        json!({ "target_email": "KIM@jeohyeon.hs.kr ", "auto": true }),
    )
    .await;
    response.assert_status_ok();
    let granted: GrantResponse = response.json();
    assert_eq!(granted.stamp_id.to_string(), "stamp1");
    assert_eq!(granted.target_email, "kim@jeohyeon.hs.kr");

    let response = grant(
        &server,
        &manager,
        json!({ "target_email": "kim@jeohyeon.hs.kr", "auto": true }),
    )
    .await;
    response.assert_status(StatusCode::CONFLICT);
    assert_eq!(error_kind(&response), "limit_exceeded");

    let card = stamps_of(&server, &student, "kim@jeohyeon.hs.kr").await;
    assert_eq!(card.granted_count, 1);
}

#[tokio::test]
async fn test_manager_must_use_auto() {
    let (server, ledger) = create_test_server();
    let manager = login_as(&server, &ledger, "booth1@jeohyeon.hs.kr", Role::Manager).await;
    login(&server, "kim@jeohyeon.hs.kr").await;

    for body in [
        json!({ "target_email": "kim@jeohyeon.hs.kr", "stamp_id": "stamp5" }),
        json!({ "target_email": "kim@jeohyeon.hs.kr", "stamp_id": "stamp5", "auto": true }),
        json!({ "target_email": "kim@jeohyeon.hs.kr" }),
    ] {
        let response = grant(&server, &manager, body.clone()).await;
        assert_eq!(
            response.status_code(),
            StatusCode::BAD_REQUEST,
            "body {}",
            body
        );
    }
}

#[tokio::test]
async fn test_two_managers_fill_sequential_slots() {
    let (server, ledger) = create_test_server();
    let first = login_as(&server, &ledger, "booth1@jeohyeon.hs.kr", Role::Manager).await;
    let second = login_as(&server, &ledger, "booth2@jeohyeon.hs.kr", Role::Manager).await;
    let student = login(&server, "kim@jeohyeon.hs.kr").await;

    for (token, expected) in [(&first, "stamp1"), (&second, "stamp2")] {
        let response = grant(
            &server,
            token,
            json!({ "target_email": "kim@jeohyeon.hs.kr", "auto": true }),
        )
        .await;
        response.assert_status_ok();
        let granted: GrantResponse = response.json();
        assert_eq!(granted.stamp_id.to_string(), expected);
    }

    let card = stamps_of(&server, &student, "kim@jeohyeon.hs.kr").await;
    assert_eq!(card.granted_count, 2);
}

#[tokio::test]
async fn test_admin_grants_specific_and_sequential() {
    let (server, ledger) = create_test_server();
    let admin = login_as(&server, &ledger, "teacher@jeohyeon.hs.kr", Role::Admin).await;
    login(&server, "kim@jeohyeon.hs.kr").await;

    let response = grant(
        &server,
        &admin,
        json!({ "target_email": "kim@jeohyeon.hs.kr", "stamp_id": "stamp7" }),
    )
    .await;
    response.assert_status_ok();

    // Granting an already-set slot succeeds and changes nothing
    let response = grant(
        &server,
        &admin,
        json!({ "target_email": "kim@jeohyeon.hs.kr", "stamp_id": "stamp7" }),
    )
    .await;
    response.assert_status_ok();

    let response = grant(
        &server,
        &admin,
        json!({ "target_email": "kim@jeohyeon.hs.kr", "auto": true }),
    )
    .await;
    let granted: GrantResponse = response.json();
    assert_eq!(granted.stamp_id.to_string(), "stamp1");

    let body: Value = server
        .get("/api/stamps")
        .add_query_param("email", "kim@jeohyeon.hs.kr")
        .add_header(header::AUTHORIZATION, bearer(&admin))
        .await
        .json();
    assert_eq!(body["granted_count"], 2);
    assert_eq!(body["stamps"]["stamp7"], true);

    let response = server
        .get("/api/grants")
        .add_header(header::AUTHORIZATION, bearer(&admin))
        .await;
    let history: GrantsResponse = response.json();
    assert_eq!(history.total, 0, "admin grants are not recorded");
}

#[tokio::test]
async fn test_admin_rejects_bad_slot_names() {
    let (server, ledger) = create_test_server();
    let admin = login_as(&server, &ledger, "teacher@jeohyeon.hs.kr", Role::Admin).await;
    login(&server, "kim@jeohyeon.hs.kr").await;

    for slot in ["stamp0", "stamp35", "stamp07", "booth3", ""] {
        let response = grant(
            &server,
            &admin,
            json!({ "target_email": "kim@jeohyeon.hs.kr", "stamp_id": slot }),
        )
        .await;
        assert_eq!(
            response.status_code(),
            StatusCode::BAD_REQUEST,
            "slot {:?}",
            slot
        );
    }
}

#[tokio::test]
async fn test_grant_to_unknown_user_not_found() {
    let (server, ledger) = create_test_server();
    let manager = login_as(&server, &ledger, "booth1@jeohyeon.hs.kr", Role::Manager).await;

    let response = grant(
        &server,
        &manager,
        json!({ "target_email": "ghost@jeohyeon.hs.kr", "auto": true }),
    )
    .await;

    response.assert_status_not_found();
}

// =============================================================================
// REVOKE TESTS
// =============================================================================

#[tokio::test]
async fn test_only_admin_revokes() {
    let (server, ledger) = create_test_server();
    let manager = login_as(&server, &ledger, "booth1@jeohyeon.hs.kr", Role::Manager).await;
    login(&server, "kim@jeohyeon.hs.kr").await;
    grant(
        &server,
        &manager,
        json!({ "target_email": "kim@jeohyeon.hs.kr", "auto": true }),
    )
    .await
    .assert_status_ok();

    let response = server
        .post("/api/stamps/revoke")
        .add_header(header::AUTHORIZATION, bearer(&manager))
        .json(&json!({ "target_email": "kim@jeohyeon.hs.kr", "stamp_id": "stamp1" }))
        .await;

    response.assert_status_forbidden();
}

#[tokio::test]
async fn test_revoke_releases_manager_quota() {
    let (server, ledger) = create_test_server();
    let manager = login_as(&server, &ledger, "booth1@jeohyeon.hs.kr", Role::Manager).await;
    let admin = login_as(&server, &ledger, "teacher@jeohyeon.hs.kr", Role::Admin).await;
    login(&server, "kim@jeohyeon.hs.kr").await;

    let target = json!({ "target_email": "kim@jeohyeon.hs.kr", "auto": true });
    grant(&server, &manager, target.clone()).await.assert_status_ok();

    let response = server
        .post("/api/stamps/revoke")
        .add_header(header::AUTHORIZATION, bearer(&admin))
        .json(&json!({ "target_email": "kim@jeohyeon.hs.kr", "stamp_id": "stamp1" }))
        .await;
    response.assert_status_ok();
    let revoked: RevokeResponse = response.json();
    assert!(revoked.was_granted);
    let released = revoked.released_grant.unwrap();
    assert_eq!(released.manager_email, "booth1@jeohyeon.hs.kr");

    // Quota is free again and the lowest slot is reused
    let response = grant(&server, &manager, target).await;
    response.assert_status_ok();
    let granted: GrantResponse = response.json();
    assert_eq!(granted.stamp_id.to_string(), "stamp1");
}

#[tokio::test]
async fn test_revoke_unset_slot_is_noop() {
    let (server, ledger) = create_test_server();
    let admin = login_as(&server, &ledger, "teacher@jeohyeon.hs.kr", Role::Admin).await;
    login(&server, "kim@jeohyeon.hs.kr").await;

    let response = server
        .post("/api/stamps/revoke")
        .add_header(header::AUTHORIZATION, bearer(&admin))
        .json(&json!({ "target_email": "kim@jeohyeon.hs.kr", "stamp_id": "stamp3" }))
        .await;

    response.assert_status_ok();
    let revoked: RevokeResponse = response.json();
    assert!(!revoked.was_granted);
    assert!(revoked.released_grant.is_none());
}

// =============================================================================
// ROLE TESTS
// =============================================================================

#[tokio::test]
async fn test_role_change_applies_to_existing_session() {
    let (server, ledger) = create_test_server();
    let admin = login_as(&server, &ledger, "teacher@jeohyeon.hs.kr", Role::Admin).await;
    let helper = login(&server, "kim@jeohyeon.hs.kr").await;
    login(&server, "lee@jeohyeon.hs.kr").await;

    let target = json!({ "target_email": "lee@jeohyeon.hs.kr", "auto": true });
    grant(&server, &helper, target.clone())
        .await
        .assert_status_forbidden();

    let response = server
        .post("/api/role")
        .add_header(header::AUTHORIZATION, bearer(&admin))
        .json(&json!({ "target_email": "kim@jeohyeon.hs.kr", "new_role": "manager" }))
        .await;
    response.assert_status_ok();
    let user: UserResponse = response.json();
    assert_eq!(user.role, Role::Manager);

    // Same token, new role
    grant(&server, &helper, target).await.assert_status_ok();
}

#[tokio::test]
async fn test_non_admin_cannot_change_roles() {
    let (server, ledger) = create_test_server();
    let manager = login_as(&server, &ledger, "booth1@jeohyeon.hs.kr", Role::Manager).await;
    login(&server, "kim@jeohyeon.hs.kr").await;

    for new_role in ["admin", "wizard"] {
        let response = server
            .post("/api/role")
            .add_header(header::AUTHORIZATION, bearer(&manager))
            .json(&json!({ "target_email": "kim@jeohyeon.hs.kr", "new_role": new_role }))
            .await;
        response.assert_status_forbidden();
    }
}

#[tokio::test]
async fn test_admin_unknown_role_bad_request() {
    let (server, ledger) = create_test_server();
    let admin = login_as(&server, &ledger, "teacher@jeohyeon.hs.kr", Role::Admin).await;
    login(&server, "kim@jeohyeon.hs.kr").await;

    let response = server
        .post("/api/role")
        .add_header(header::AUTHORIZATION, bearer(&admin))
        .json(&json!({ "target_email": "kim@jeohyeon.hs.kr", "new_role": "wizard" }))
        .await;

    response.assert_status_bad_request();
}

// =============================================================================
// ADMIN LISTING TESTS
// =============================================================================

#[tokio::test]
async fn test_list_users_admin_only() {
    let (server, ledger) = create_test_server();
    let admin = login_as(&server, &ledger, "teacher@jeohyeon.hs.kr", Role::Admin).await;
    let student = login(&server, "kim@jeohyeon.hs.kr").await;
    login(&server, "lee@jeohyeon.hs.kr").await;

    let response = server
        .get("/api/users")
        .add_header(header::AUTHORIZATION, bearer(&student))
        .await;
    response.assert_status_forbidden();

    let response = server
        .get("/api/users")
        .add_header(header::AUTHORIZATION, bearer(&admin))
        .await;
    response.assert_status_ok();
    let users: UsersResponse = response.json();
    assert_eq!(users.total, 3);
    let emails: Vec<&str> = users.users.iter().map(|u| u.email.as_str()).collect();
    assert_eq!(
        emails,
        [
            "kim@jeohyeon.hs.kr",
            "lee@jeohyeon.hs.kr",
            "teacher@jeohyeon.hs.kr"
        ]
    );
}

#[tokio::test]
async fn test_grant_history_filters_by_target() {
    let (server, ledger) = create_test_server();
    let manager = login_as(&server, &ledger, "booth1@jeohyeon.hs.kr", Role::Manager).await;
    let admin = login_as(&server, &ledger, "teacher@jeohyeon.hs.kr", Role::Admin).await;
    login(&server, "kim@jeohyeon.hs.kr").await;
    login(&server, "lee@jeohyeon.hs.kr").await;

    for target in ["kim@jeohyeon.hs.kr", "lee@jeohyeon.hs.kr"] {
        grant(
            &server,
            &manager,
            json!({ "target_email": target, "auto": true }),
        )
        .await
        .assert_status_ok();
    }

    let all: GrantsResponse = server
        .get("/api/grants")
        .add_header(header::AUTHORIZATION, bearer(&admin))
        .await
        .json();
    assert_eq!(all.total, 2);

    let response = server
        .get("/api/grants")
        .add_query_param("target_email", "lee@jeohyeon.hs.kr")
        .add_header(header::AUTHORIZATION, bearer(&admin))
        .await;
    response.assert_status_ok();
    let filtered: GrantsResponse = response.json();
    assert_eq!(filtered.total, 1);
    assert_eq!(filtered.grants[0].target_email, "lee@jeohyeon.hs.kr");
    assert_eq!(filtered.grants[0].manager_email, "booth1@jeohyeon.hs.kr");

    let response = server
        .get("/api/grants")
        .add_header(header::AUTHORIZATION, bearer(&manager))
        .await;
    response.assert_status_forbidden();
}

// =============================================================================
// MIDDLEWARE TESTS
// =============================================================================

#[tokio::test]
async fn test_rate_limit_returns_429() {
    let (server, _) = create_test_server_with(&HttpConfig {
        rate_limit: 1,
        ..HttpConfig::default()
    });

    server.get("/health").await.assert_status_ok();
    let response = server.get("/health").await;

    response.assert_status(StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(error_kind(&response), "rate_limited");
    assert_eq!(response.header(header::RETRY_AFTER), "1");
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let (server, _) = create_test_server_with(&HttpConfig {
        rate_limit: 0,
        body_limit_bytes: 128,
        ..HttpConfig::default()
    });

    let response = server
        .post("/api/login")
        .json(&json!({ "id_token": "x".repeat(1024) }))
        .await;

    response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
}

// =============================================================================
// CONFIGURED SERVER TESTS
// =============================================================================

#[tokio::test]
async fn test_state_from_config_verifies_signed_identity() {
    use hmac::{Hmac, Mac};
    use jwt::{Claims, RegisteredClaims, SignWithKey};
    use sha2::Sha256;

    let identity_secret = "identity-secret-identity-secret-";
    let mut config = AppConfig::default();
    config.auth.session_secret = Some(SESSION_SECRET.to_string());
    config.auth.identity_secret = Some(identity_secret.to_string());
    config.http.rate_limit = 0;

    let state = AppState::from_config(Ledger::in_memory(), &config).unwrap();
    let server = TestServer::new(create_router(state, &config.http)).unwrap();

    let now = chrono::Utc::now().timestamp() as u64;
    let mut claims = Claims {
        registered: RegisteredClaims {
            subject: Some("google-123".to_string()),
            issued_at: Some(now),
            expiration: Some(now + 300),
            ..Default::default()
        },
        private: Default::default(),
    };
    claims
        .private
        .insert("email".to_string(), json!("park@jeohyeon.hs.kr"));
    claims.private.insert("name".to_string(), json!("Park"));
    let key = Hmac::<Sha256>::new_from_slice(identity_secret.as_bytes()).unwrap();
    let id_token = claims.sign_with_key(&key).unwrap();

    let response = server
        .post("/api/login")
        .json(&json!({ "id_token": id_token }))
        .await;
    response.assert_status_ok();
    let login: LoginResponse = response.json();
    assert_eq!(login.user.user_id, "google-123");

    let response = server
        .get("/api/profile")
        .add_header(header::AUTHORIZATION, bearer(&login.access_token))
        .await;
    response.assert_status_ok();
}

#[test]
fn test_state_from_config_requires_secrets() {
    let config = AppConfig::default();
    assert!(matches!(
        AppState::from_config(Ledger::in_memory(), &config),
        Err(AppError::Config(_))
    ));
}

#[test]
fn test_state_from_config_rejects_unbounded_session_ttl() {
    let mut config = AppConfig::default();
    config.auth.session_secret = Some(SESSION_SECRET.to_string());
    config.auth.identity_secret = Some("identity-secret-identity-secret-".to_string());
    config.auth.session_ttl_secs = 10_000_000_000_000;
    assert!(matches!(
        AppState::from_config(Ledger::in_memory(), &config),
        Err(AppError::Config(_))
    ));
}
