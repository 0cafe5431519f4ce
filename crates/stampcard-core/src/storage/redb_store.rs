//! # redb-backed Ledger Storage
//!
//! A disk-backed ledger store using the redb embedded database.
//!
//! redb gives us:
//! - ACID transactions
//! - Crash safety (copy-on-write B-trees)
//! - MVCC (concurrent readers, single writer)
//!
//! The single-writer rule is what makes grants safe under concurrency: every
//! `apply_grant` reads the card, checks the history and writes both back
//! inside one write transaction, and redb admits one write transaction at a
//! time. A failed operation aborts its transaction, so nothing is half-applied.

use crate::allocator::{Allocation, resolve_grant};
use crate::formats::Snapshot;
use crate::store::{LedgerStore, ResetSummary, RevokeOutcome};
use crate::{GrantRecord, LedgerError, Role, StampId, User, VerifiedIdentity};
use chrono::{DateTime, Utc};
use redb::{
    Database, ReadTransaction, ReadableDatabase, ReadableTable, ReadableTableMetadata,
    TableDefinition, WriteTransaction,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;

/// Table for users: user_id -> serialized User
const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

/// Table for the email index: email -> user_id
const EMAIL_INDEX: TableDefinition<&str, &str> = TableDefinition::new("email_index");

/// Table for grant history: (manager_email, target_email) -> serialized GrantRecord
const GRANTS: TableDefinition<(&str, &str), &[u8]> = TableDefinition::new("grants");

/// Table for revoke lookups: (target_email, slot number) -> manager_email
const GRANTS_BY_SLOT: TableDefinition<(&str, u8), &str> = TableDefinition::new("grants_by_slot");

fn storage(e: impl std::fmt::Display) -> LedgerError {
    LedgerError::StorageUnavailable(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, LedgerError> {
    postcard::to_allocvec(value).map_err(|e| LedgerError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, LedgerError> {
    postcard::from_bytes(bytes).map_err(|e| LedgerError::Serialization(e.to_string()))
}

/// Look a user up through the email index.
fn user_for_email(
    index: &impl ReadableTable<&'static str, &'static str>,
    users: &impl ReadableTable<&'static str, &'static [u8]>,
    email: &str,
) -> Result<Option<User>, LedgerError> {
    let Some(user_id) = index
        .get(email)
        .map_err(storage)?
        .map(|guard| guard.value().to_string())
    else {
        return Ok(None);
    };
    user_for_id(users, &user_id)
}

fn user_for_id(
    users: &impl ReadableTable<&'static str, &'static [u8]>,
    user_id: &str,
) -> Result<Option<User>, LedgerError> {
    users
        .get(user_id)
        .map_err(storage)?
        .map(|guard| decode(guard.value()))
        .transpose()
}

/// All users in email order.
fn users_in_email_order(
    index: &impl ReadableTable<&'static str, &'static str>,
    users: &impl ReadableTable<&'static str, &'static [u8]>,
) -> Result<Vec<User>, LedgerError> {
    let mut ids = Vec::new();
    for entry in index.iter().map_err(storage)? {
        let (_email, user_id) = entry.map_err(storage)?;
        ids.push(user_id.value().to_string());
    }

    let mut result = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(user) = user_for_id(users, &id)? {
            result.push(user);
        }
    }
    Ok(result)
}

fn all_grants(
    grants: &impl ReadableTable<(&'static str, &'static str), &'static [u8]>,
) -> Result<Vec<GrantRecord>, LedgerError> {
    let mut records = Vec::new();
    for entry in grants.iter().map_err(storage)? {
        let (_pair, value) = entry.map_err(storage)?;
        records.push(decode(value.value())?);
    }
    Ok(records)
}

/// A disk-backed ledger store using redb.
pub struct RedbStore {
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a ledger database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let db = Database::create(path.as_ref()).map_err(storage)?;
        let store = Self { db };

        // Initialize tables if they don't exist
        store.write(|txn| {
            txn.open_table(USERS).map_err(storage)?;
            txn.open_table(EMAIL_INDEX).map_err(storage)?;
            txn.open_table(GRANTS).map_err(storage)?;
            txn.open_table(GRANTS_BY_SLOT).map_err(storage)?;
            Ok(())
        })?;

        Ok(store)
    }

    /// Run `op` in a write transaction. Commits on `Ok`, aborts on `Err`.
    fn write<T>(
        &self,
        op: impl FnOnce(&WriteTransaction) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let txn = self.db.begin_write().map_err(storage)?;
        match op(&txn) {
            Ok(value) => {
                txn.commit().map_err(storage)?;
                Ok(value)
            }
            Err(e) => {
                // The policy error is the one worth reporting; an uncommitted
                // transaction is discarded either way.
                let _ = txn.abort();
                Err(e)
            }
        }
    }

    fn read<T>(
        &self,
        op: impl FnOnce(&ReadTransaction) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let txn = self.db.begin_read().map_err(storage)?;
        op(&txn)
    }
}

impl LedgerStore for RedbStore {
    fn upsert_login(
        &self,
        identity: &VerifiedIdentity,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<User, LedgerError> {
        self.write(|txn| {
            let mut users = txn.open_table(USERS).map_err(storage)?;
            let mut index = txn.open_table(EMAIL_INDEX).map_err(storage)?;

            if let Some(existing) = user_for_id(&users, &identity.user_id)? {
                return Ok(existing);
            }
            if index.get(email).map_err(storage)?.is_some() {
                return Err(LedgerError::InvalidRequest(format!(
                    "{} is already registered to another account",
                    email
                )));
            }

            let user = User::first_login(identity, email.to_string(), now);
            users
                .insert(user.user_id.as_str(), encode(&user)?.as_slice())
                .map_err(storage)?;
            index
                .insert(user.email.as_str(), user.user_id.as_str())
                .map_err(storage)?;
            Ok(user)
        })
    }

    fn user_by_id(&self, user_id: &str) -> Result<Option<User>, LedgerError> {
        self.read(|txn| {
            let users = txn.open_table(USERS).map_err(storage)?;
            user_for_id(&users, user_id)
        })
    }

    fn user_by_email(&self, email: &str) -> Result<Option<User>, LedgerError> {
        self.read(|txn| {
            let users = txn.open_table(USERS).map_err(storage)?;
            let index = txn.open_table(EMAIL_INDEX).map_err(storage)?;
            user_for_email(&index, &users, email)
        })
    }

    fn list_users(&self) -> Result<Vec<User>, LedgerError> {
        self.read(|txn| {
            let users = txn.open_table(USERS).map_err(storage)?;
            let index = txn.open_table(EMAIL_INDEX).map_err(storage)?;
            users_in_email_order(&index, &users)
        })
    }

    fn update_display_name(&self, user_id: &str, name: &str) -> Result<User, LedgerError> {
        self.write(|txn| {
            let mut users = txn.open_table(USERS).map_err(storage)?;
            let mut user = user_for_id(&users, user_id)?
                .ok_or_else(|| LedgerError::TargetNotFound(user_id.to_string()))?;
            user.display_name = name.to_string();
            users
                .insert(user.user_id.as_str(), encode(&user)?.as_slice())
                .map_err(storage)?;
            Ok(user)
        })
    }

    fn set_role(&self, email: &str, role: Role) -> Result<User, LedgerError> {
        self.write(|txn| {
            let mut users = txn.open_table(USERS).map_err(storage)?;
            let index = txn.open_table(EMAIL_INDEX).map_err(storage)?;
            let mut user = user_for_email(&index, &users, email)?
                .ok_or_else(|| LedgerError::TargetNotFound(email.to_string()))?;
            user.role = role;
            users
                .insert(user.user_id.as_str(), encode(&user)?.as_slice())
                .map_err(storage)?;
            Ok(user)
        })
    }

    fn apply_grant(
        &self,
        actor_email: &str,
        target_email: &str,
        allocation: Allocation,
        now: DateTime<Utc>,
    ) -> Result<StampId, LedgerError> {
        self.write(|txn| {
            let mut users = txn.open_table(USERS).map_err(storage)?;
            let index = txn.open_table(EMAIL_INDEX).map_err(storage)?;
            let mut grants = txn.open_table(GRANTS).map_err(storage)?;
            let mut by_slot = txn.open_table(GRANTS_BY_SLOT).map_err(storage)?;

            let mut user = user_for_email(&index, &users, target_email)?
                .ok_or_else(|| LedgerError::TargetNotFound(target_email.to_string()))?;
            let history_exists = grants
                .get((actor_email, target_email))
                .map_err(storage)?
                .is_some();

            let slot = resolve_grant(
                allocation,
                &user.stamps,
                history_exists,
                actor_email,
                target_email,
            )?;
            user.stamps.set(slot, true);
            users
                .insert(user.user_id.as_str(), encode(&user)?.as_slice())
                .map_err(storage)?;

            if allocation.records_history() {
                let record = GrantRecord {
                    manager_email: actor_email.to_string(),
                    target_email: target_email.to_string(),
                    stamp_id: slot,
                    granted_at: now,
                };
                grants
                    .insert((actor_email, target_email), encode(&record)?.as_slice())
                    .map_err(storage)?;
                by_slot
                    .insert((target_email, slot.number()), actor_email)
                    .map_err(storage)?;
            }
            Ok(slot)
        })
    }

    fn apply_revoke(
        &self,
        target_email: &str,
        slot: StampId,
    ) -> Result<RevokeOutcome, LedgerError> {
        self.write(|txn| {
            let mut users = txn.open_table(USERS).map_err(storage)?;
            let index = txn.open_table(EMAIL_INDEX).map_err(storage)?;
            let mut grants = txn.open_table(GRANTS).map_err(storage)?;
            let mut by_slot = txn.open_table(GRANTS_BY_SLOT).map_err(storage)?;

            let mut user = user_for_email(&index, &users, target_email)?
                .ok_or_else(|| LedgerError::TargetNotFound(target_email.to_string()))?;
            let was_granted = user.stamps.set(slot, false);
            users
                .insert(user.user_id.as_str(), encode(&user)?.as_slice())
                .map_err(storage)?;

            let manager = by_slot
                .remove((target_email, slot.number()))
                .map_err(storage)?
                .map(|guard| guard.value().to_string());
            let released = match manager {
                Some(manager) => grants
                    .remove((manager.as_str(), target_email))
                    .map_err(storage)?
                    .map(|guard| decode::<GrantRecord>(guard.value()))
                    .transpose()?,
                None => None,
            };

            Ok(RevokeOutcome {
                stamp_id: slot,
                was_granted,
                released,
            })
        })
    }

    fn grants(&self) -> Result<Vec<GrantRecord>, LedgerError> {
        self.read(|txn| {
            let grants = txn.open_table(GRANTS).map_err(storage)?;
            all_grants(&grants)
        })
    }

    fn grant_count(&self) -> Result<usize, LedgerError> {
        let count = self.read(|txn| {
            let grants = txn.open_table(GRANTS).map_err(storage)?;
            grants.len().map_err(storage)
        })?;
        usize::try_from(count).map_err(|e| LedgerError::StorageUnavailable(e.to_string()))
    }

    fn grants_for_target(&self, target_email: &str) -> Result<Vec<GrantRecord>, LedgerError> {
        self.read(|txn| {
            let grants = txn.open_table(GRANTS).map_err(storage)?;
            let by_slot = txn.open_table(GRANTS_BY_SLOT).map_err(storage)?;

            let mut managers = Vec::new();
            for entry in by_slot
                .range((target_email, 0u8)..=(target_email, u8::MAX))
                .map_err(storage)?
            {
                let (_key, manager) = entry.map_err(storage)?;
                managers.push(manager.value().to_string());
            }

            let mut records = Vec::with_capacity(managers.len());
            for manager in managers {
                if let Some(guard) = grants
                    .get((manager.as_str(), target_email))
                    .map_err(storage)?
                {
                    records.push(decode(guard.value())?);
                }
            }
            Ok(records)
        })
    }

    fn reset_all(&self) -> Result<ResetSummary, LedgerError> {
        self.write(|txn| {
            let grants_deleted = {
                let grants = txn.open_table(GRANTS).map_err(storage)?;
                grants.len().map_err(storage)? as usize
            };
            txn.delete_table(GRANTS).map_err(storage)?;
            txn.delete_table(GRANTS_BY_SLOT).map_err(storage)?;
            txn.open_table(GRANTS).map_err(storage)?;
            txn.open_table(GRANTS_BY_SLOT).map_err(storage)?;

            let mut users = txn.open_table(USERS).map_err(storage)?;
            let mut cards = Vec::new();
            for entry in users.iter().map_err(storage)? {
                let (_id, value) = entry.map_err(storage)?;
                cards.push(decode::<User>(value.value())?);
            }
            for user in &mut cards {
                user.stamps.clear();
                users
                    .insert(user.user_id.as_str(), encode(&*user)?.as_slice())
                    .map_err(storage)?;
            }

            Ok(ResetSummary {
                users_reset: cards.len(),
                grants_deleted,
            })
        })
    }

    fn export_snapshot(&self, now: DateTime<Utc>) -> Result<Snapshot, LedgerError> {
        // One read transaction: users and grants come from the same version.
        self.read(|txn| {
            let users = txn.open_table(USERS).map_err(storage)?;
            let index = txn.open_table(EMAIL_INDEX).map_err(storage)?;
            let grants = txn.open_table(GRANTS).map_err(storage)?;
            Ok(Snapshot {
                taken_at: now,
                users: users_in_email_order(&index, &users)?,
                grants: all_grants(&grants)?,
            })
        })
    }

    fn import_snapshot(&self, snapshot: &Snapshot) -> Result<(), LedgerError> {
        self.write(|txn| {
            txn.delete_table(USERS).map_err(storage)?;
            txn.delete_table(EMAIL_INDEX).map_err(storage)?;
            txn.delete_table(GRANTS).map_err(storage)?;
            txn.delete_table(GRANTS_BY_SLOT).map_err(storage)?;

            let mut users = txn.open_table(USERS).map_err(storage)?;
            let mut index = txn.open_table(EMAIL_INDEX).map_err(storage)?;
            let mut grants = txn.open_table(GRANTS).map_err(storage)?;
            let mut by_slot = txn.open_table(GRANTS_BY_SLOT).map_err(storage)?;

            for user in &snapshot.users {
                users
                    .insert(user.user_id.as_str(), encode(user)?.as_slice())
                    .map_err(storage)?;
                index
                    .insert(user.email.as_str(), user.user_id.as_str())
                    .map_err(storage)?;
            }
            for record in &snapshot.grants {
                let manager = record.manager_email.as_str();
                let target = record.target_email.as_str();
                grants
                    .insert((manager, target), encode(record)?.as_slice())
                    .map_err(storage)?;
                by_slot
                    .insert((target, record.stamp_id.number()), manager)
                    .map_err(storage)?;
            }
            Ok(())
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
