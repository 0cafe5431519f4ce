//! # Identity Verification
//!
//! Turns the identity token presented at login into a `VerifiedIdentity`.
//!
//! The ledger trusts whatever identity this layer returns, so every
//! implementation must check the token's signature and expiry itself.
//! The shipped verifier accepts HS256 tokens signed by the upstream identity
//! service with a shared secret, carrying `sub`, `email` and optionally
//! `name` and `email_verified`.

use crate::error::AppError;
use chrono::Utc;
use hmac::{Hmac, Mac};
use jwt::{Claims, Header, Token, VerifyWithKey};
use sha2::Sha256;
use stampcard_core::VerifiedIdentity;

/// Verifies identity tokens from the identity provider.
pub trait IdentityVerifier: Send + Sync {
    fn verify(&self, id_token: &str) -> Result<VerifiedIdentity, AppError>;
}

/// HS256 identity tokens signed with a secret shared with the provider.
#[derive(Clone)]
pub struct SharedSecretVerifier {
    key: Hmac<Sha256>,
    issuer: Option<String>,
}

impl std::fmt::Debug for SharedSecretVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSecretVerifier")
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

impl SharedSecretVerifier {
    pub fn new(secret: &str, issuer: Option<String>) -> Result<Self, AppError> {
        let key = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .map_err(|e| AppError::Config(format!("invalid identity secret: {}", e)))?;
        Ok(Self { key, issuer })
    }
}

fn rejected(reason: &str) -> AppError {
    tracing::warn!(event = "auth_failure", reason, "identity token rejected");
    AppError::Unauthorized("invalid identity token".to_string())
}

impl IdentityVerifier for SharedSecretVerifier {
    fn verify(&self, id_token: &str) -> Result<VerifiedIdentity, AppError> {
        let token: Token<Header, Claims, _> = id_token
            .verify_with_key(&self.key)
            .map_err(|_| rejected("bad_signature"))?;
        let claims = token.claims();
        let now = Utc::now().timestamp().max(0) as u64;

        match claims.registered.expiration {
            Some(exp) if exp > now => {}
            Some(_) => return Err(rejected("expired")),
            None => return Err(rejected("missing_expiration")),
        }
        if claims.registered.issued_at.is_some_and(|iat| iat > now) {
            return Err(rejected("issued_in_future"));
        }
        if let Some(expected) = &self.issuer {
            if claims.registered.issuer.as_ref() != Some(expected) {
                return Err(rejected("wrong_issuer"));
            }
        }

        let user_id = claims
            .registered
            .subject
            .clone()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| rejected("missing_subject"))?;
        let email = claims
            .private
            .get("email")
            .and_then(|v| v.as_str())
            .ok_or_else(|| rejected("missing_email"))?;
        if claims.private.get("email_verified").and_then(|v| v.as_bool()) == Some(false) {
            return Err(rejected("email_not_verified"));
        }
        let name = claims
            .private
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        Ok(VerifiedIdentity::new(user_id, email, name))
    }
}

/// Whether `email` belongs to `domain` (case-insensitive, exact domain).
#[must_use]
pub fn email_in_domain(email: &str, domain: &str) -> bool {
    let domain = domain.trim().trim_start_matches('@');
    match email.trim().rsplit_once('@') {
        Some((local, host)) => !local.is_empty() && host.eq_ignore_ascii_case(domain),
        None => false,
    }
}

// =============================================================================
// TESTS
// =============================================================================
