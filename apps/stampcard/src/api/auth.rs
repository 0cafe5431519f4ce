//! # Session Authentication
//!
//! Session tokens for the stamp card HTTP API.
//!
//! After a successful login the server issues an HS256 JWT carrying the user
//! id (`sub`) and email. Protected endpoints expect it as
//! ```text
//! Authorization: Bearer <token>
//! ```
//! The token only identifies the caller. The role is read from the ledger on
//! every request, so role changes apply to sessions already issued.

use super::AppState;
use crate::config::MAX_SESSION_TTL_SECS;
use crate::error::AppError;
use axum::{
    body::Body,
    extract::State,
    http::{Request, header},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use jwt::{Claims, Header, RegisteredClaims, SignWithKey, Token, VerifyWithKey};
use serde_json::Value;
use sha2::Sha256;
use stampcard_core::User;

// =============================================================================
// SESSION TOKENS
// =============================================================================

/// The verified contents of a session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub email: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Signing key and policy for session tokens.
#[derive(Clone)]
pub struct SessionKeys {
    key: Hmac<Sha256>,
    issuer: String,
    ttl: Duration,
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys")
            .field("issuer", &self.issuer)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

fn timestamp(seconds: u64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(i64::try_from(seconds).ok()?, 0).single()
}

fn invalid_session(reason: &str) -> AppError {
    tracing::warn!(event = "auth_failure", reason, "session token rejected");
    AppError::Unauthorized("invalid or expired session".to_string())
}

impl SessionKeys {
    pub fn new(secret: &str, issuer: impl Into<String>, ttl_secs: u64) -> Result<Self, AppError> {
        let key = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .map_err(|e| AppError::Config(format!("invalid session secret: {}", e)))?;
        if !(1..=MAX_SESSION_TTL_SECS).contains(&ttl_secs) {
            return Err(AppError::Config(format!(
                "session ttl must be between 1 and {} seconds, got {}",
                MAX_SESSION_TTL_SECS, ttl_secs
            )));
        }
        let ttl = i64::try_from(ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| AppError::Config(format!("session ttl {}s is too large", ttl_secs)))?;
        Ok(Self {
            key,
            issuer: issuer.into(),
            ttl,
        })
    }

    /// Issue a token for `user`. Returns the token and its expiry.
    pub fn issue(&self, user: &User, now: DateTime<Utc>) -> Result<(String, DateTime<Utc>), AppError> {
        let expires_at = now
            .checked_add_signed(self.ttl)
            .ok_or_else(|| AppError::Token(format!("expiry out of range for issue time {}", now)))?;
        let mut claims = Claims {
            registered: RegisteredClaims {
                issuer: Some(self.issuer.clone()),
                subject: Some(user.user_id.clone()),
                issued_at: Some(now.timestamp().max(0) as u64),
                expiration: Some(expires_at.timestamp().max(0) as u64),
                ..Default::default()
            },
            private: Default::default(),
        };
        claims
            .private
            .insert("email".to_string(), Value::String(user.email.clone()));

        let token = claims
            .sign_with_key(&self.key)
            .map_err(|e| AppError::Token(e.to_string()))?;
        Ok((token, expires_at))
    }

    /// Verify a session token at time `now`.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<Session, AppError> {
        let token: Token<Header, Claims, _> = token
            .verify_with_key(&self.key)
            .map_err(|_| invalid_session("bad_signature"))?;
        let claims = token.claims();

        if claims.registered.issuer.as_ref() != Some(&self.issuer) {
            return Err(invalid_session("wrong_issuer"));
        }
        let issued_at = claims
            .registered
            .issued_at
            .and_then(timestamp)
            .ok_or_else(|| invalid_session("missing_iat"))?;
        let expires_at = claims
            .registered
            .expiration
            .and_then(timestamp)
            .ok_or_else(|| invalid_session("missing_exp"))?;
        if expires_at <= now {
            return Err(invalid_session("expired"));
        }
        if issued_at > now {
            return Err(invalid_session("issued_in_future"));
        }

        let user_id = claims
            .registered
            .subject
            .clone()
            .ok_or_else(|| invalid_session("missing_subject"))?;
        let email = claims
            .private
            .get("email")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid_session("missing_email"))?
            .to_string();

        Ok(Session {
            user_id,
            email,
            issued_at,
            expires_at,
        })
    }
}

// =============================================================================
// MIDDLEWARE
// =============================================================================

/// Extract the bearer token from an `Authorization` header value.
fn bearer_token(header_value: &str) -> Option<&str> {
    let token = header_value
        .strip_prefix("Bearer ")
        .or_else(|| header_value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then_some(token)
}

/// Session authentication middleware.
///
/// Verifies the bearer token and stores the `Session` in the request
/// extensions for the handlers. Missing or invalid tokens get 401.
pub async fn session_auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .ok_or_else(|| {
            tracing::warn!(
                event = "auth_failure",
                reason = "missing_authorization_header",
                "Missing Authorization header"
            );
            AppError::Unauthorized("missing session token".to_string())
        })?;

    let session = state.sessions.verify(token, Utc::now())?;
    request.extensions_mut().insert(session);
    Ok(next.run(request).await)
}

// =============================================================================
// TESTS
// =============================================================================
