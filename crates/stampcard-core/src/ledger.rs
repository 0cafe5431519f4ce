//! # Ledger
//!
//! The public face of the stamp ledger.
//!
//! A `Ledger` owns one storage backend and runs every operation through it.
//! Role and request-shape checks happen here, before storage is touched; the
//! read-modify-write of a grant or revocation happens inside the backend as a
//! single atomic unit.
//!
//! ## Storage Backends
//!
//! - `InMemory`: `MemoryStore` (fast, volatile)
//! - `Persistent`: `RedbStore` (disk-backed, ACID)

use crate::allocator::{authorize_grant, authorize_revoke, require_admin};
use crate::formats::Snapshot;
use crate::storage::RedbStore;
use crate::store::{LedgerStore, MemoryStore, ResetSummary, RevokeOutcome};
use crate::{
    Actor, GrantRecord, LedgerError, Role, StampId, StampSet, User, VerifiedIdentity,
    normalize_email, validate_display_name,
};
use chrono::Utc;
use std::path::Path;

/// Storage backend for a Ledger.
#[derive(Debug)]
pub enum StorageBackend {
    /// In-memory store (fast, volatile).
    InMemory(MemoryStore),
    /// Disk-backed store using redb (ACID, persistent).
    Persistent(RedbStore),
}

impl Default for StorageBackend {
    fn default() -> Self {
        Self::InMemory(MemoryStore::new())
    }
}

impl StorageBackend {
    fn store(&self) -> &dyn LedgerStore {
        match self {
            Self::InMemory(store) => store,
            Self::Persistent(store) => store,
        }
    }
}

/// The stamp ledger.
///
/// `Ledger` is `Send + Sync` and every method takes `&self`; share it behind
/// an `Arc`.
#[derive(Debug, Default)]
pub struct Ledger {
    backend: StorageBackend,
}

impl Ledger {
    /// Create a ledger with in-memory storage.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Create a ledger with persistent redb storage.
    ///
    /// Opens or creates a redb database at the given path.
    pub fn with_redb(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        Ok(Self::with_backend(StorageBackend::Persistent(
            RedbStore::open(path)?,
        )))
    }

    #[must_use]
    pub fn with_backend(backend: StorageBackend) -> Self {
        Self { backend }
    }

    /// Check if using persistent storage.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, StorageBackend::Persistent(_))
    }

    fn store(&self) -> &dyn LedgerStore {
        self.backend.store()
    }

    // =========================================================================
    // PROFILES
    // =========================================================================

    /// Record a login for a verified identity.
    ///
    /// The first login creates the user as a student with an empty card.
    /// Later logins return the stored user unchanged.
    pub fn login(&self, identity: &VerifiedIdentity) -> Result<User, LedgerError> {
        if identity.user_id.trim().is_empty() {
            return Err(LedgerError::InvalidRequest(
                "identity has no user id".to_string(),
            ));
        }
        let email = normalize_email(&identity.email)?;
        self.store().upsert_login(identity, &email, Utc::now())
    }

    pub fn profile(&self, user_id: &str) -> Result<User, LedgerError> {
        self.store()
            .user_by_id(user_id)?
            .ok_or_else(|| LedgerError::TargetNotFound(user_id.to_string()))
    }

    /// Resolve the caller of an operation from the stored profile.
    ///
    /// The role is read fresh, so a role change applies to existing sessions.
    pub fn actor(&self, user_id: &str) -> Result<Actor, LedgerError> {
        self.profile(user_id).map(|user| Actor::from(&user))
    }

    pub fn update_display_name(&self, user_id: &str, name: &str) -> Result<User, LedgerError> {
        let name = validate_display_name(name)?;
        self.store().update_display_name(user_id, &name)
    }

    /// Change a user's role. Admin only.
    pub fn set_role(
        &self,
        actor: &Actor,
        target_email: &str,
        role: Role,
    ) -> Result<User, LedgerError> {
        require_admin(actor.role, "changing roles")?;
        let target = normalize_email(target_email)?;
        self.store().set_role(&target, role)
    }

    /// All users with their cards, ordered by email. Admin only.
    pub fn list_users(&self, actor: &Actor) -> Result<Vec<User>, LedgerError> {
        require_admin(actor.role, "listing users")?;
        self.store().list_users()
    }

    // =========================================================================
    // STAMPS
    // =========================================================================

    /// The card of `target_email`, or of the actor when `None`.
    pub fn stamp_set(
        &self,
        actor: &Actor,
        target_email: Option<&str>,
    ) -> Result<StampSet, LedgerError> {
        let target = match target_email.map(str::trim).filter(|e| !e.is_empty()) {
            Some(email) => normalize_email(email)?,
            None => actor.email.clone(),
        };
        self.store()
            .user_by_email(&target)?
            .map(|user| user.stamps)
            .ok_or(LedgerError::TargetNotFound(target))
    }

    /// Grant a stamp to `target_email`. Returns the slot that was set.
    ///
    /// Managers grant sequentially, once per target. Admins grant
    /// sequentially (`auto`) or a chosen slot, without quota.
    pub fn grant(
        &self,
        actor: &Actor,
        target_email: &str,
        requested_slot: Option<&str>,
        auto: bool,
    ) -> Result<StampId, LedgerError> {
        let allocation = authorize_grant(actor.role, requested_slot, auto)?;
        let target = normalize_email(target_email)?;
        self.store()
            .apply_grant(&actor.email, &target, allocation, Utc::now())
    }

    /// Clear `slot` on `target_email`. Admin only.
    ///
    /// A manager grant recorded for that slot is deleted, which frees the
    /// manager's quota for the target.
    pub fn revoke(
        &self,
        actor: &Actor,
        target_email: &str,
        slot: &str,
    ) -> Result<RevokeOutcome, LedgerError> {
        let slot = authorize_revoke(actor.role, slot)?;
        let target = normalize_email(target_email)?;
        self.store().apply_revoke(&target, slot)
    }

    /// Every manager grant record. Admin only.
    pub fn grant_history(&self, actor: &Actor) -> Result<Vec<GrantRecord>, LedgerError> {
        require_admin(actor.role, "viewing grant history")?;
        self.store().grants()
    }

    /// Number of manager grant records. Admin only.
    pub fn grant_count(&self, actor: &Actor) -> Result<usize, LedgerError> {
        require_admin(actor.role, "viewing grant history")?;
        self.store().grant_count()
    }

    /// Manager grants received by one user. Admin only.
    pub fn grants_for_target(
        &self,
        actor: &Actor,
        target_email: &str,
    ) -> Result<Vec<GrantRecord>, LedgerError> {
        require_admin(actor.role, "viewing grant history")?;
        let target = normalize_email(target_email)?;
        self.store().grants_for_target(&target)
    }

    /// Clear every card and the whole grant history. Admin only.
    pub fn reset_all(&self, actor: &Actor) -> Result<ResetSummary, LedgerError> {
        require_admin(actor.role, "resetting stamps")?;
        self.store().reset_all()
    }

    // =========================================================================
    // BACKUP
    // =========================================================================

    /// A consistent copy of every user and grant record.
    pub fn snapshot(&self) -> Result<Snapshot, LedgerError> {
        self.store().export_snapshot(Utc::now())
    }

    /// Replace the ledger contents with `snapshot`.
    ///
    /// The snapshot is validated first; an invalid snapshot changes nothing.
    pub fn restore(&self, snapshot: Snapshot) -> Result<(), LedgerError> {
        let snapshot = snapshot.into_validated()?;
        self.store().import_snapshot(&snapshot)
    }
}

// =============================================================================
// TESTS
// =============================================================================
