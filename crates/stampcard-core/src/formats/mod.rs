//! # Formats
//!
//! Serialization formats for ledger backups.

pub mod snapshot;

pub use snapshot::{MAX_SNAPSHOT_PAYLOAD_SIZE, Snapshot, SnapshotHeader};
