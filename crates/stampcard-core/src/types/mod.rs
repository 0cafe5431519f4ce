//! # Core Type Definitions
//!
//! This module contains all core types for the stamp ledger:
//! - Slot identifiers and the per-user card (`StampId`, `StampSet`)
//! - Accounts (`Role`, `User`, `VerifiedIdentity`, `Actor`)
//! - Manager grant history (`GrantRecord`)
//! - Error types (`LedgerError`)
//!
//! ## Ordering Guarantees
//!
//! `StampId` orders by its numeric suffix, so `stamp2 < stamp10`.
//! Sequential allocation depends on this order.

mod stamp_set;

pub use stamp_set::StampSet;

use crate::primitives::{
    LEGACY_SLOT_PREFIX, MAX_DISPLAY_NAME_LENGTH, MAX_EMAIL_LENGTH, SLOT_PREFIX, STAMP_COUNT,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// STAMP IDENTIFIER
// =============================================================================

/// One of the fixed stamp slots, `stamp1` through `stamp34`.
///
/// Stored as the 1-based slot number. Rendered without zero padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StampId(u8);

impl StampId {
    /// The first slot (`stamp1`).
    pub const FIRST: Self = Self(1);

    /// The last slot (`stamp34`).
    pub const LAST: Self = Self(STAMP_COUNT);

    /// Create a slot id from its 1-based number.
    #[must_use]
    pub const fn new(number: u8) -> Option<Self> {
        if number >= 1 && number <= STAMP_COUNT {
            Some(Self(number))
        } else {
            None
        }
    }

    /// Create a slot id from its 0-based position.
    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        if index < STAMP_COUNT as usize {
            Some(Self(index as u8 + 1))
        } else {
            None
        }
    }

    /// The 1-based slot number.
    #[must_use]
    pub const fn number(self) -> u8 {
        self.0
    }

    /// The 0-based position of this slot.
    #[must_use]
    pub const fn index(self) -> usize {
        (self.0 - 1) as usize
    }

    /// All slots in canonical (numeric) order.
    pub fn all() -> impl DoubleEndedIterator<Item = Self> + ExactSizeIterator {
        (1..=STAMP_COUNT).map(Self)
    }

    /// Parse a canonical key (`stamp{n}`).
    ///
    /// Rejects zero padding, signs, whitespace and out-of-range numbers.
    pub fn parse(key: &str) -> Result<Self, LedgerError> {
        key.strip_prefix(SLOT_PREFIX)
            .and_then(parse_slot_number)
            .ok_or_else(|| LedgerError::InvalidRequest(format!("'{}' is not a stamp id", key)))
    }

    /// Parse a key found in a stored card document.
    ///
    /// Accepts canonical keys and legacy `booth{n}` keys. The flag is `true`
    /// when the key used the legacy prefix.
    #[must_use]
    pub fn from_document_key(key: &str) -> Option<(Self, bool)> {
        if let Some(rest) = key.strip_prefix(SLOT_PREFIX) {
            return parse_slot_number(rest).map(|id| (id, false));
        }
        key.strip_prefix(LEGACY_SLOT_PREFIX)
            .and_then(parse_slot_number)
            .map(|id| (id, true))
    }
}

/// Parse the numeric suffix of a slot key.
fn parse_slot_number(digits: &str) -> Option<StampId> {
    if digits.is_empty() || digits.len() > 2 || digits.starts_with('0') {
        return None;
    }
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u8>().ok().and_then(StampId::new)
}

impl fmt::Display for StampId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", SLOT_PREFIX, self.0)
    }
}

impl FromStr for StampId {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for StampId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for StampId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let key = String::deserialize(deserializer)?;
        Self::from_document_key(&key)
            .map(|(id, _)| id)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid stamp id '{}'", key)))
    }
}

// =============================================================================
// ROLES
// =============================================================================

/// Access level of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Role {
    /// Collects stamps. Cannot grant.
    #[default]
    Student,
    /// Booth operator. One sequential grant per target, ever.
    Manager,
    /// Unrestricted grant/revoke and role management.
    Admin,
}

impl Role {
    /// Lowercase wire name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Manager => "manager",
            Self::Admin => "admin",
        }
    }

    /// Whether this role may grant stamps at all.
    #[must_use]
    pub const fn can_grant(self) -> bool {
        matches!(self, Self::Manager | Self::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Role {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "student" => Ok(Self::Student),
            "manager" => Ok(Self::Manager),
            "admin" => Ok(Self::Admin),
            other => Err(LedgerError::InvalidRequest(format!(
                "unknown role '{}' (expected student, manager or admin)",
                other
            ))),
        }
    }
}

impl Serialize for Role {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// Stored documents may carry roles from retired schemes (e.g. `leader`);
/// anything unrecognised reads back as `student`.
impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(raw.parse().unwrap_or_default())
    }
}

// =============================================================================
// USERS
// =============================================================================

/// A registered user and their stamp card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Stable id issued by the identity provider.
    pub user_id: String,
    /// Normalized (trimmed, lowercase) email. Unique.
    pub email: String,
    pub display_name: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub stamps: StampSet,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Build the profile created on a user's first login.
    ///
    /// The display name falls back to the local part of the email.
    #[must_use]
    pub fn first_login(identity: &VerifiedIdentity, email: String, now: DateTime<Utc>) -> Self {
        let name = identity.name.trim();
        let display_name = if name.is_empty() {
            email.split('@').next().unwrap_or_default().to_string()
        } else {
            name.chars().take(MAX_DISPLAY_NAME_LENGTH).collect()
        };
        Self {
            user_id: identity.user_id.clone(),
            email,
            display_name,
            role: Role::Student,
            stamps: StampSet::new(),
            created_at: now,
        }
    }
}

/// Identity as confirmed by the external identity provider.
///
/// The ledger trusts these fields without re-verifying them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedIdentity {
    pub user_id: String,
    pub email: String,
    #[serde(default)]
    pub name: String,
}

impl VerifiedIdentity {
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        email: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            email: email.into(),
            name: name.into(),
        }
    }
}

/// The caller of a ledger operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub email: String,
    pub role: Role,
}

impl Actor {
    #[must_use]
    pub fn new(email: impl Into<String>, role: Role) -> Self {
        Self {
            email: email.into(),
            role,
        }
    }
}

impl From<&User> for Actor {
    fn from(user: &User) -> Self {
        Self::new(user.email.clone(), user.role)
    }
}

// =============================================================================
// GRANT HISTORY
// =============================================================================

/// One manager-issued grant.
///
/// At most one record exists per (manager, target) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantRecord {
    pub manager_email: String,
    pub target_email: String,
    pub stamp_id: StampId,
    pub granted_at: DateTime<Utc>,
}

// =============================================================================
// INPUT NORMALIZATION
// =============================================================================

/// Normalize an email for lookup and storage: trimmed and lowercased.
pub fn normalize_email(raw: &str) -> Result<String, LedgerError> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() {
        return Err(LedgerError::InvalidRequest("email is required".to_string()));
    }
    if email.len() > MAX_EMAIL_LENGTH {
        return Err(LedgerError::InvalidRequest(format!(
            "email exceeds {} bytes",
            MAX_EMAIL_LENGTH
        )));
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(LedgerError::InvalidRequest(format!(
            "'{}' is not an email address",
            raw.trim()
        ))),
    }
}

/// Validate and trim a new display name.
pub fn validate_display_name(raw: &str) -> Result<String, LedgerError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(LedgerError::InvalidRequest(
            "display name must not be empty".to_string(),
        ));
    }
    if name.chars().count() > MAX_DISPLAY_NAME_LENGTH {
        return Err(LedgerError::InvalidRequest(format!(
            "display name exceeds {} characters",
            MAX_DISPLAY_NAME_LENGTH
        )));
    }
    Ok(name.to_string())
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the stamp ledger.
///
/// Every error is terminal for the request that caused it. Messages name the
/// role or limit involved and never carry storage keys.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The actor's role is insufficient for the requested action.
    #[error("permission denied: {action} requires {required}")]
    PermissionDenied {
        action: &'static str,
        required: &'static str,
    },

    /// Malformed input: missing or non-canonical slot, wrong auto/manual mode.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The manager has already granted a stamp to this target.
    #[error("grant limit reached: {manager} has already granted a stamp to {target}")]
    LimitExceeded { manager: String, target: String },

    /// No free slot is left for sequential allocation.
    #[error("all stamps have already been granted to {target}")]
    AllSlotsTaken { target: String },

    /// The target user has no profile.
    #[error("user not found: {0}")]
    TargetNotFound(String),

    /// The storage layer failed (I/O, lock, transaction).
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A stored record or snapshot could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl LedgerError {
    /// Stable machine-readable kind, used by API error bodies.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::PermissionDenied { .. } => "permission_denied",
            Self::InvalidRequest(_) => "invalid_request",
            Self::LimitExceeded { .. } => "limit_exceeded",
            Self::AllSlotsTaken { .. } => "all_slots_taken",
            Self::TargetNotFound(_) => "target_not_found",
            Self::StorageUnavailable(_) => "storage_unavailable",
            Self::Serialization(_) => "serialization",
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
