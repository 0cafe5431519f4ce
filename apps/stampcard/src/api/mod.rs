//! # Stamp Card HTTP API Module
//!
//! This module implements the HTTP REST API server using axum.
//!
//! ## Endpoints
//!
//! Public:
//! - `GET /health` - Health check
//! - `POST /api/login` - Exchange an identity token for a session token
//!
//! Session required (`Authorization: Bearer <token>`):
//! - `GET /api/profile` / `POST /api/profile` - Read or rename own profile
//! - `GET /api/stamps` - Own card, or `?email=` for another user
//! - `POST /api/stamps/grant` - Grant a stamp (manager, admin)
//! - `POST /api/stamps/revoke` - Revoke a stamp (admin)
//! - `POST /api/role` - Change a user's role (admin)
//! - `GET /api/users` - All users with cards (admin)
//! - `GET /api/grants` - Manager grant history (admin)

mod auth;
mod handlers;
mod identity;
mod middleware;
mod types;

pub use auth::{Session, SessionKeys, session_auth_middleware};
pub use identity::{IdentityVerifier, SharedSecretVerifier, email_in_domain};
pub use middleware::RequestLimiter;
pub use types::{
    ErrorResponse, GrantRequest, GrantResponse, GrantsQuery, GrantsResponse, HealthResponse,
    LoginRequest, LoginResponse, ProfileResponse, ProfileUpdateRequest, RevokeRequest,
    RevokeResponse, RoleRequest, StampsQuery, StampsResponse, UserResponse, UsersResponse,
};

use crate::config::{AppConfig, HttpConfig};
use crate::error::AppError;
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{get, post},
};
use stampcard_core::Ledger;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Ledger>,
    pub sessions: Arc<SessionKeys>,
    pub identity: Arc<dyn IdentityVerifier>,
    /// Email domain allowed to log in.
    pub allowed_domain: Arc<str>,
}

impl AppState {
    #[must_use]
    pub fn new(
        ledger: Ledger,
        sessions: SessionKeys,
        identity: Arc<dyn IdentityVerifier>,
        allowed_domain: &str,
    ) -> Self {
        Self {
            ledger: Arc::new(ledger),
            sessions: Arc::new(sessions),
            identity,
            allowed_domain: Arc::from(allowed_domain.trim().trim_start_matches('@')),
        }
    }

    /// Build state from validated configuration, using the shared-secret
    /// identity verifier.
    pub fn from_config(ledger: Ledger, config: &AppConfig) -> Result<Self, AppError> {
        config.validate_for_server()?;
        let auth = &config.auth;
        let session_secret = auth.session_secret.as_deref().unwrap_or_default();
        let identity_secret = auth.identity_secret.as_deref().unwrap_or_default();

        let sessions = SessionKeys::new(
            session_secret,
            auth.session_issuer.clone(),
            auth.session_ttl_secs,
        )?;
        let identity = SharedSecretVerifier::new(identity_secret, auth.identity_issuer.clone())?;
        Ok(Self::new(
            ledger,
            sessions,
            Arc::new(identity),
            &auth.allowed_domain,
        ))
    }

    /// Run a ledger operation on the blocking pool.
    pub async fn run<T, F>(&self, op: F) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: FnOnce(&Ledger) -> Result<T, AppError> + Send + 'static,
    {
        let ledger = Arc::clone(&self.ledger);
        tokio::task::spawn_blocking(move || op(&ledger))
            .await
            .map_err(|e| AppError::Internal(format!("ledger task failed: {}", e)))?
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

/// Build CORS layer from configuration.
///
/// - `"*"`: allows all origins (development only)
/// - unset: localhost only
/// - otherwise: comma-separated list of allowed origins
fn build_cors_layer(origins: Option<&str>) -> CorsLayer {
    match origins.map(str::trim) {
        Some("*") => {
            tracing::warn!("CORS: Allowing ALL origins. This is insecure for production!");
            CorsLayer::permissive()
        }
        Some(origins) => {
            let allowed_origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|s| {
                    let trimmed = s.trim();
                    match trimmed.parse::<HeaderValue>() {
                        Ok(hv) => {
                            tracing::info!("CORS: Allowing origin: {}", trimmed);
                            Some(hv)
                        }
                        Err(e) => {
                            tracing::warn!("CORS: Invalid origin '{}': {}", trimmed, e);
                            None
                        }
                    }
                })
                .collect();

            if allowed_origins.is_empty() {
                tracing::warn!("CORS: No valid origins configured, defaulting to localhost only");
                build_localhost_cors()
            } else {
                CorsLayer::new()
                    .allow_origin(allowed_origins)
                    .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                    .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
            }
        }
        None => {
            tracing::info!("CORS: No origins configured, defaulting to localhost only");
            build_localhost_cors()
        }
    }
}

/// Build a restrictive CORS layer that only allows localhost origins.
fn build_localhost_cors() -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        "http://localhost:3000",
        "http://localhost:8501",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8501",
    ]
    .into_iter()
    .filter_map(|o| o.parse::<HeaderValue>().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the axum router with all endpoints and middleware.
///
/// Middleware stack (outer to inner):
/// 1. Tracing - logs all requests
/// 2. CORS - handles preflight requests
/// 3. Body limit
/// 4. Rate Limiting (if enabled)
/// 5. Session authentication (protected routes only)
pub fn create_router(state: AppState, http: &HttpConfig) -> Router {
    let cors = build_cors_layer(http.cors_origins.as_deref());

    let rate_limiter = RequestLimiter::from_config(http);
    match &rate_limiter {
        Some(limiter) => tracing::info!(
            "Rate limiting enabled: {} requests/second",
            limiter.per_second()
        ),
        None => tracing::info!("Rate limiting disabled"),
    }

    let protected = Router::new()
        .route(
            "/api/profile",
            get(handlers::get_profile_handler).post(handlers::update_profile_handler),
        )
        .route("/api/stamps", get(handlers::get_stamps_handler))
        .route("/api/stamps/grant", post(handlers::grant_handler))
        .route("/api/stamps/revoke", post(handlers::revoke_handler))
        .route("/api/role", post(handlers::set_role_handler))
        .route("/api/users", get(handlers::list_users_handler))
        .route("/api/grants", get(handlers::grant_history_handler))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth::session_auth_middleware,
        ));

    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/api/login", post(handlers::login_handler))
        .merge(protected);

    if let Some(limiter) = rate_limiter {
        router = router.layer(axum_middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit_middleware,
        ));
    }

    router
        .layer(axum::extract::DefaultBodyLimit::max(http.body_limit_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Start the HTTP server and run until Ctrl+C.
pub async fn run_server(config: &AppConfig, ledger: Ledger) -> Result<(), AppError> {
    let state = AppState::from_config(ledger, config)?;
    let router = create_router(state, &config.http);

    let addr = config.server.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!(
        addr = %addr,
        allowed_domain = %config.auth.allowed_domain,
        "Stamp card HTTP server listening"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutting down");
        })
        .await?;
    Ok(())
}
