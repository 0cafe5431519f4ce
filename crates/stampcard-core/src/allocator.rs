//! # Stamp Allocator
//!
//! The grant/revoke decision logic, as pure functions.
//!
//! A grant is decided in two steps:
//! 1. [`authorize_grant`] checks the actor's role and the request shape and
//!    yields an [`Allocation`]. It needs no stored state.
//! 2. [`resolve_grant`] runs inside the storage transaction, against the
//!    target's current card and grant history, and yields the concrete slot.
//!
//! Storage backends call step 2 while holding their write transaction so the
//! read of the card, the quota check and the write happen as one unit.

use crate::{LedgerError, Role, StampId, StampSet};

/// How a grant picks its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    /// Manager grant: lowest free slot, one per (manager, target) pair,
    /// recorded in the grant history.
    Quota,
    /// Admin sequential grant: lowest free slot, no history.
    Sequential,
    /// Admin grant of a chosen slot, no history. Idempotent.
    Specific(StampId),
}

impl Allocation {
    /// Whether a grant of this kind writes a `GrantRecord`.
    #[must_use]
    pub const fn records_history(self) -> bool {
        matches!(self, Self::Quota)
    }
}

/// Lowest-numbered slot that is not granted, or `None` if the card is full.
#[must_use]
pub fn next_available_slot(stamps: &StampSet) -> Option<StampId> {
    stamps.next_available_slot()
}

/// Number of granted slots.
#[must_use]
pub fn count_granted(stamps: &StampSet) -> usize {
    stamps.count_granted()
}

/// Check the role and request shape of a grant.
///
/// `requested_slot` is the raw slot key from the caller, if any.
pub fn authorize_grant(
    role: Role,
    requested_slot: Option<&str>,
    auto: bool,
) -> Result<Allocation, LedgerError> {
    let requested_slot = requested_slot.map(str::trim).filter(|s| !s.is_empty());

    match role {
        Role::Student => Err(LedgerError::PermissionDenied {
            action: "granting stamps",
            required: "manager or admin",
        }),
        Role::Manager => {
            if !auto || requested_slot.is_some() {
                return Err(LedgerError::InvalidRequest(
                    "managers may only sequentially grant".to_string(),
                ));
            }
            Ok(Allocation::Quota)
        }
        Role::Admin => match (auto, requested_slot) {
            (true, None) => Ok(Allocation::Sequential),
            (true, Some(_)) => Err(LedgerError::InvalidRequest(
                "a stamp id cannot be combined with sequential granting".to_string(),
            )),
            (false, None) => Err(LedgerError::InvalidRequest(
                "a stamp id is required unless granting sequentially".to_string(),
            )),
            (false, Some(key)) => StampId::parse(key).map(Allocation::Specific),
        },
    }
}

/// Pick the slot for an authorized grant against the target's current state.
///
/// `history_exists` is whether a `GrantRecord` for (manager, target) exists;
/// it is only consulted for [`Allocation::Quota`].
pub fn resolve_grant(
    allocation: Allocation,
    stamps: &StampSet,
    history_exists: bool,
    manager_email: &str,
    target_email: &str,
) -> Result<StampId, LedgerError> {
    match allocation {
        Allocation::Quota => {
            if history_exists {
                return Err(LedgerError::LimitExceeded {
                    manager: manager_email.to_string(),
                    target: target_email.to_string(),
                });
            }
            sequential_slot(stamps, target_email)
        }
        Allocation::Sequential => sequential_slot(stamps, target_email),
        Allocation::Specific(slot) => Ok(slot),
    }
}

fn sequential_slot(stamps: &StampSet, target_email: &str) -> Result<StampId, LedgerError> {
    next_available_slot(stamps).ok_or_else(|| LedgerError::AllSlotsTaken {
        target: target_email.to_string(),
    })
}

/// Check the role and slot of a revocation.
pub fn authorize_revoke(role: Role, slot: &str) -> Result<StampId, LedgerError> {
    if role != Role::Admin {
        return Err(LedgerError::PermissionDenied {
            action: "revoking stamps",
            required: "admin",
        });
    }
    StampId::parse(slot.trim())
}

/// Require the admin role for an administrative action.
pub fn require_admin(role: Role, action: &'static str) -> Result<(), LedgerError> {
    if role == Role::Admin {
        Ok(())
    } else {
        Err(LedgerError::PermissionDenied {
            action,
            required: "admin",
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
