//! # Storage Backends
//!
//! Persistent implementations of [`crate::store::LedgerStore`].

mod redb_store;

pub use redb_store::RedbStore;
