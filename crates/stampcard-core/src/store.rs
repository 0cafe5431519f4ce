//! # Ledger Storage
//!
//! The `LedgerStore` trait and the in-memory backend.
//!
//! Every method is one atomic unit. In particular `apply_grant` and
//! `apply_revoke` read the target's card, consult and update the grant
//! history, and write the card back without any other writer observing an
//! intermediate state. If they fail, nothing is changed.

use crate::allocator::{Allocation, resolve_grant};
use crate::formats::Snapshot;
use crate::{GrantRecord, LedgerError, Role, StampId, User, VerifiedIdentity};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// Result of a revocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokeOutcome {
    pub stamp_id: StampId,
    /// Whether the slot was set before the revocation.
    pub was_granted: bool,
    /// The manager grant that was released, if the slot came from one.
    pub released: Option<GrantRecord>,
}

/// Result of a full reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResetSummary {
    pub users_reset: usize,
    pub grants_deleted: usize,
}

/// Storage operations needed by the ledger.
///
/// Emails passed in are already normalized. Implementations must be safe to
/// share across threads.
pub trait LedgerStore: Send + Sync {
    /// Return the user for this identity, creating it on first login.
    fn upsert_login(
        &self,
        identity: &VerifiedIdentity,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<User, LedgerError>;

    fn user_by_id(&self, user_id: &str) -> Result<Option<User>, LedgerError>;

    fn user_by_email(&self, email: &str) -> Result<Option<User>, LedgerError>;

    /// All users, ordered by email.
    fn list_users(&self) -> Result<Vec<User>, LedgerError>;

    fn update_display_name(&self, user_id: &str, name: &str) -> Result<User, LedgerError>;

    fn set_role(&self, email: &str, role: Role) -> Result<User, LedgerError>;

    /// Resolve and apply a grant to `target_email` in one transaction.
    fn apply_grant(
        &self,
        actor_email: &str,
        target_email: &str,
        allocation: Allocation,
        now: DateTime<Utc>,
    ) -> Result<StampId, LedgerError>;

    /// Clear `slot` on `target_email` and release any grant record for it.
    fn apply_revoke(&self, target_email: &str, slot: StampId)
    -> Result<RevokeOutcome, LedgerError>;

    /// All grant records, ordered by (manager, target).
    fn grants(&self) -> Result<Vec<GrantRecord>, LedgerError>;

    fn grants_for_target(&self, target_email: &str) -> Result<Vec<GrantRecord>, LedgerError>;

    /// Number of grant records.
    fn grant_count(&self) -> Result<usize, LedgerError>;

    /// Clear every card and delete every grant record.
    fn reset_all(&self) -> Result<ResetSummary, LedgerError>;

    fn export_snapshot(&self, now: DateTime<Utc>) -> Result<Snapshot, LedgerError>;

    /// Replace the whole store with a validated snapshot.
    fn import_snapshot(&self, snapshot: &Snapshot) -> Result<(), LedgerError>;
}

// =============================================================================
// IN-MEMORY BACKEND
// =============================================================================

#[derive(Debug, Default, Clone)]
struct MemoryState {
    /// user_id -> user
    users: BTreeMap<String, User>,
    /// email -> user_id
    email_index: BTreeMap<String, String>,
    /// (manager, target) -> record
    grants: BTreeMap<(String, String), GrantRecord>,
}

impl MemoryState {
    fn user_id_for(&self, email: &str) -> Result<String, LedgerError> {
        self.email_index
            .get(email)
            .cloned()
            .ok_or_else(|| LedgerError::TargetNotFound(email.to_string()))
    }

    fn user_mut(&mut self, user_id: &str) -> Result<&mut User, LedgerError> {
        self.users
            .get_mut(user_id)
            .ok_or_else(|| LedgerError::TargetNotFound(user_id.to_string()))
    }
}

/// Volatile store. Every operation runs under a single lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, LedgerError> {
        self.state
            .lock()
            .map_err(|_| LedgerError::StorageUnavailable("memory store lock poisoned".to_string()))
    }
}

impl LedgerStore for MemoryStore {
    fn upsert_login(
        &self,
        identity: &VerifiedIdentity,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<User, LedgerError> {
        let mut state = self.lock()?;
        if let Some(existing) = state.users.get(&identity.user_id) {
            return Ok(existing.clone());
        }
        if state.email_index.contains_key(email) {
            return Err(LedgerError::InvalidRequest(format!(
                "{} is already registered to another account",
                email
            )));
        }

        let user = User::first_login(identity, email.to_string(), now);
        state
            .email_index
            .insert(user.email.clone(), user.user_id.clone());
        state.users.insert(user.user_id.clone(), user.clone());
        Ok(user)
    }

    fn user_by_id(&self, user_id: &str) -> Result<Option<User>, LedgerError> {
        Ok(self.lock()?.users.get(user_id).cloned())
    }

    fn user_by_email(&self, email: &str) -> Result<Option<User>, LedgerError> {
        let state = self.lock()?;
        Ok(state
            .email_index
            .get(email)
            .and_then(|id| state.users.get(id))
            .cloned())
    }

    fn list_users(&self) -> Result<Vec<User>, LedgerError> {
        let state = self.lock()?;
        Ok(state
            .email_index
            .values()
            .filter_map(|id| state.users.get(id))
            .cloned()
            .collect())
    }

    fn update_display_name(&self, user_id: &str, name: &str) -> Result<User, LedgerError> {
        let mut state = self.lock()?;
        let user = state.user_mut(user_id)?;
        user.display_name = name.to_string();
        Ok(user.clone())
    }

    fn set_role(&self, email: &str, role: Role) -> Result<User, LedgerError> {
        let mut state = self.lock()?;
        let user_id = state.user_id_for(email)?;
        let user = state.user_mut(&user_id)?;
        user.role = role;
        Ok(user.clone())
    }

    fn apply_grant(
        &self,
        actor_email: &str,
        target_email: &str,
        allocation: Allocation,
        now: DateTime<Utc>,
    ) -> Result<StampId, LedgerError> {
        let mut state = self.lock()?;
        let user_id = state.user_id_for(target_email)?;
        let pair = (actor_email.to_string(), target_email.to_string());
        let history_exists = state.grants.contains_key(&pair);

        let user = state.user_mut(&user_id)?;
        let slot = resolve_grant(
            allocation,
            &user.stamps,
            history_exists,
            actor_email,
            target_email,
        )?;
        user.stamps.set(slot, true);

        if allocation.records_history() {
            let record = GrantRecord {
                manager_email: pair.0.clone(),
                target_email: pair.1.clone(),
                stamp_id: slot,
                granted_at: now,
            };
            state.grants.insert(pair, record);
        }
        Ok(slot)
    }

    fn apply_revoke(
        &self,
        target_email: &str,
        slot: StampId,
    ) -> Result<RevokeOutcome, LedgerError> {
        let mut state = self.lock()?;
        let user_id = state.user_id_for(target_email)?;
        let was_granted = state.user_mut(&user_id)?.stamps.set(slot, false);

        let released_key = state
            .grants
            .iter()
            .find(|(_, record)| record.target_email == target_email && record.stamp_id == slot)
            .map(|(key, _)| key.clone());
        let released = released_key.and_then(|key| state.grants.remove(&key));

        Ok(RevokeOutcome {
            stamp_id: slot,
            was_granted,
            released,
        })
    }

    fn grants(&self) -> Result<Vec<GrantRecord>, LedgerError> {
        Ok(self.lock()?.grants.values().cloned().collect())
    }

    fn grant_count(&self) -> Result<usize, LedgerError> {
        Ok(self.lock()?.grants.len())
    }

    fn grants_for_target(&self, target_email: &str) -> Result<Vec<GrantRecord>, LedgerError> {
        Ok(self
            .lock()?
            .grants
            .values()
            .filter(|record| record.target_email == target_email)
            .cloned()
            .collect())
    }

    fn reset_all(&self) -> Result<ResetSummary, LedgerError> {
        let mut state = self.lock()?;
        let grants_deleted = state.grants.len();
        state.grants.clear();
        for user in state.users.values_mut() {
            user.stamps.clear();
        }
        Ok(ResetSummary {
            users_reset: state.users.len(),
            grants_deleted,
        })
    }

    fn export_snapshot(&self, now: DateTime<Utc>) -> Result<Snapshot, LedgerError> {
        let state = self.lock()?;
        Ok(Snapshot {
            taken_at: now,
            users: state
                .email_index
                .values()
                .filter_map(|id| state.users.get(id))
                .cloned()
                .collect(),
            grants: state.grants.values().cloned().collect(),
        })
    }

    fn import_snapshot(&self, snapshot: &Snapshot) -> Result<(), LedgerError> {
        let mut fresh = MemoryState::default();
        for user in &snapshot.users {
            fresh
                .email_index
                .insert(user.email.clone(), user.user_id.clone());
            fresh.users.insert(user.user_id.clone(), user.clone());
        }
        for record in &snapshot.grants {
            fresh.grants.insert(
                (record.manager_email.clone(), record.target_email.clone()),
                record.clone(),
            );
        }

        *self.lock()? = fresh;
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
