//! # Snapshot Format
//!
//! Whole-ledger backups: every user with their card, plus the grant history.
//!
//! Binary format: Header (5 bytes) + postcard-serialized snapshot.
//! - 4 bytes: Magic ("STMP")
//! - 1 byte: Version
//!
//! `Snapshot` also derives serde, so the app layer can write it as JSON.
//! JSON documents from older deployments (`booth{n}` keys, missing slots)
//! load through the same `StampSet` normalization.
//!
//! A snapshot is validated before it is restored: the grant history must be
//! consistent with the cards it sits next to.

use crate::types::normalize_email;
use crate::{GrantRecord, LedgerError, StampId, StampSet, User, primitives};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Maximum allowed binary snapshot size (64 MB).
///
/// Checked before any payload decoding.
pub const MAX_SNAPSHOT_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

/// Header length in bytes.
const HEADER_LEN: usize = 5;

// =============================================================================
// FILE HEADER
// =============================================================================

/// The header that precedes binary snapshot data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub magic: [u8; 4],
    pub version: u8,
}

impl SnapshotHeader {
    /// Create a header with the current format version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: *primitives::MAGIC_BYTES,
            version: primitives::FORMAT_VERSION,
        }
    }

    /// Validate magic bytes and version.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if &self.magic != primitives::MAGIC_BYTES {
            return Err(LedgerError::Serialization(
                "Invalid magic bytes".to_string(),
            ));
        }
        if self.version != primitives::FORMAT_VERSION {
            return Err(LedgerError::Serialization(format!(
                "Unsupported version: {} (expected {})",
                self.version,
                primitives::FORMAT_VERSION
            )));
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4] = self.version;
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LedgerError> {
        if bytes.len() < HEADER_LEN {
            return Err(LedgerError::Serialization("Header too short".to_string()));
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        Ok(Self {
            magic,
            version: bytes[4],
        })
    }
}

impl Default for SnapshotHeader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// A full copy of the ledger at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    pub users: Vec<User>,
    #[serde(default)]
    pub grants: Vec<GrantRecord>,
}

impl Snapshot {
    /// Serialize to bytes (header + payload). No file I/O.
    pub fn to_bytes(&self) -> Result<Vec<u8>, LedgerError> {
        let payload =
            postcard::to_stdvec(self).map_err(|e| LedgerError::Serialization(e.to_string()))?;

        let mut result = Vec::with_capacity(HEADER_LEN + payload.len());
        result.extend_from_slice(&SnapshotHeader::new().to_bytes());
        result.extend_from_slice(&payload);
        Ok(result)
    }

    /// Deserialize from bytes. Size and header are checked before decoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LedgerError> {
        if bytes.len() > MAX_SNAPSHOT_PAYLOAD_SIZE {
            return Err(LedgerError::Serialization(format!(
                "Data size {} bytes exceeds maximum allowed {} bytes",
                bytes.len(),
                MAX_SNAPSHOT_PAYLOAD_SIZE
            )));
        }

        let header = SnapshotHeader::from_bytes(bytes)?;
        header.validate()?;

        postcard::from_bytes(&bytes[HEADER_LEN..]).map_err(|e| {
            LedgerError::Serialization(format!("Failed to deserialize snapshot: {}", e))
        })
    }

    /// Normalize emails and check that the snapshot can be restored as-is.
    ///
    /// Rejects duplicate user ids or emails, grants that reference unknown
    /// users, more than one grant per (manager, target) or per (target, slot),
    /// and grants whose slot is not set on the target's card.
    pub fn into_validated(mut self) -> Result<Self, LedgerError> {
        if self.users.len() > primitives::MAX_SNAPSHOT_USERS {
            return Err(LedgerError::InvalidRequest(format!(
                "snapshot holds {} users, maximum is {}",
                self.users.len(),
                primitives::MAX_SNAPSHOT_USERS
            )));
        }

        let mut ids = BTreeSet::new();
        let mut emails = BTreeSet::new();
        for user in &mut self.users {
            user.email = normalize_email(&user.email)?;
            if user.user_id.trim().is_empty() {
                return Err(LedgerError::InvalidRequest(format!(
                    "user {} has an empty id",
                    user.email
                )));
            }
            if !ids.insert(user.user_id.clone()) {
                return Err(LedgerError::InvalidRequest(format!(
                    "duplicate user id for {}",
                    user.email
                )));
            }
            if !emails.insert(user.email.clone()) {
                return Err(LedgerError::InvalidRequest(format!(
                    "duplicate email {}",
                    user.email
                )));
            }
        }

        let cards: BTreeMap<&str, &StampSet> = self
            .users
            .iter()
            .map(|user| (user.email.as_str(), &user.stamps))
            .collect();
        let mut pairs = BTreeSet::new();
        let mut slots: BTreeSet<(String, StampId)> = BTreeSet::new();
        for grant in &mut self.grants {
            grant.manager_email = normalize_email(&grant.manager_email)?;
            grant.target_email = normalize_email(&grant.target_email)?;

            if !cards.contains_key(grant.manager_email.as_str()) {
                return Err(LedgerError::InvalidRequest(format!(
                    "grant issued by unknown user {}",
                    grant.manager_email
                )));
            }
            let card = cards.get(grant.target_email.as_str()).ok_or_else(|| {
                LedgerError::InvalidRequest(format!(
                    "grant targets unknown user {}",
                    grant.target_email
                ))
            })?;
            if !card.get(grant.stamp_id) {
                return Err(LedgerError::InvalidRequest(format!(
                    "grant of {} to {} is not on their card",
                    grant.stamp_id, grant.target_email
                )));
            }
            if !pairs.insert((grant.manager_email.clone(), grant.target_email.clone())) {
                return Err(LedgerError::InvalidRequest(format!(
                    "more than one grant from {} to {}",
                    grant.manager_email, grant.target_email
                )));
            }
            if !slots.insert((grant.target_email.clone(), grant.stamp_id)) {
                return Err(LedgerError::InvalidRequest(format!(
                    "{} of {} is recorded more than once",
                    grant.stamp_id, grant.target_email
                )));
            }
        }

        Ok(self)
    }
}

// =============================================================================
// TESTS
// =============================================================================
