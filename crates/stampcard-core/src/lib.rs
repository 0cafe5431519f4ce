//! # stampcard-core
//!
//! The stamp ledger for the festival stamp card service - THE LOGIC.
//!
//! Every user owns a card of 34 numbered slots. Managers grant stamps one at a
//! time and at most once per student; admins grant freely, pick slots and
//! revoke. This crate decides who may do what, which slot a grant lands on,
//! and applies each decision atomically.
//!
//! ## Layout
//!
//! - `types` → slot ids, cards, users, grant records, errors
//! - `allocator` → pure grant/revoke decisions
//! - `store` → the `LedgerStore` trait and the in-memory backend
//! - `storage` → the redb backend
//! - `ledger` → the `Ledger` facade used by the app
//! - `formats` → the backup snapshot format
//!
//! ## Architectural Constraints
//!
//! - No async, no network dependencies (pure Rust)
//! - Sequential allocation scans slots in numeric order only
//! - A failed operation leaves stored state unchanged

// =============================================================================
// MODULES
// =============================================================================

pub mod allocator;
pub mod formats;
pub mod ledger;
pub mod primitives;
pub mod storage;
pub mod store;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    Actor, GrantRecord, LedgerError, Role, StampId, StampSet, User, VerifiedIdentity,
    normalize_email, validate_display_name,
};

// =============================================================================
// RE-EXPORTS: Ledger
// =============================================================================

pub use allocator::{Allocation, count_granted, next_available_slot};
pub use ledger::{Ledger, StorageBackend};
pub use storage::RedbStore;
pub use store::{LedgerStore, MemoryStore, ResetSummary, RevokeOutcome};

// =============================================================================
// RE-EXPORTS: Formats (from formats module)
// =============================================================================

pub use formats::{MAX_SNAPSHOT_PAYLOAD_SIZE, Snapshot, SnapshotHeader};
