//! # API Request/Response Types
//!
//! This module defines the JSON structures for the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stampcard_core::{GrantRecord, Role, StampId, StampSet, User, primitives::STAMP_COUNT};

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub persistent: bool,
}

impl HealthResponse {
    #[must_use]
    pub fn new(persistent: bool) -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            persistent,
        }
    }
}

// =============================================================================
// ERROR RESPONSE
// =============================================================================

/// Body of every error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable machine-readable kind, e.g. `limit_exceeded`.
    pub kind: String,
    pub message: String,
}

// =============================================================================
// USERS
// =============================================================================

/// A user as shown to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub user_id: String,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    /// Whether the client should offer the grant form.
    #[serde(default)]
    pub can_grant: bool,
    pub stamps: StampSet,
    pub stamp_count: usize,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.user_id.clone(),
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            role: user.role,
            can_grant: user.role.can_grant(),
            stamps: user.stamps,
            stamp_count: user.stamps.count_granted(),
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileResponse {
    pub user: UserResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsersResponse {
    pub users: Vec<UserResponse>,
    pub total: usize,
}

// =============================================================================
// LOGIN
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    /// Identity token from the identity provider.
    #[serde(default)]
    pub id_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserResponse,
}

// =============================================================================
// PROFILE
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileUpdateRequest {
    #[serde(default)]
    pub display_name: String,
}

// =============================================================================
// STAMPS
// =============================================================================

/// Query for `GET /api/stamps`. Without `email` the caller's own card is returned.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StampsQuery {
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StampsResponse {
    pub email: String,
    pub stamps: StampSet,
    pub granted_count: usize,
    pub total_slots: u8,
    pub complete: bool,
}

impl StampsResponse {
    #[must_use]
    pub fn new(email: String, stamps: StampSet) -> Self {
        Self {
            email,
            granted_count: stamps.count_granted(),
            total_slots: STAMP_COUNT,
            complete: stamps.is_complete(),
            stamps,
        }
    }
}

/// Grant request.
///
/// Managers send `auto: true` and no `stamp_id`. Admins send either
/// `auto: true` or a `stamp_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantRequest {
    pub target_email: String,
    #[serde(default)]
    pub stamp_id: Option<String>,
    #[serde(default)]
    pub auto: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantResponse {
    pub target_email: String,
    pub stamp_id: StampId,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokeRequest {
    pub target_email: String,
    pub stamp_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokeResponse {
    pub target_email: String,
    pub stamp_id: StampId,
    /// Whether the slot was set before the revocation.
    pub was_granted: bool,
    /// The manager grant released by this revocation, if any.
    pub released_grant: Option<GrantRecord>,
}

// =============================================================================
// ROLES
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleRequest {
    pub target_email: String,
    /// `student`, `manager` or `admin`.
    pub new_role: String,
}

// =============================================================================
// GRANT HISTORY
// =============================================================================

/// Query for `GET /api/grants`. `target_email` narrows to one recipient.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GrantsQuery {
    pub target_email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantsResponse {
    pub grants: Vec<GrantRecord>,
    pub total: usize,
}

impl From<Vec<GrantRecord>> for GrantsResponse {
    fn from(grants: Vec<GrantRecord>) -> Self {
        Self {
            total: grants.len(),
            grants,
        }
    }
}
