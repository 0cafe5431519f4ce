//! # Ledger Primitives
//!
//! Hardcoded constants for the stamp ledger.
//!
//! Every deployment has the same flat namespace of stamp slots. These values
//! are compiled into the binary and are immutable at runtime.

/// Number of stamp slots on every card.
///
/// Slots are numbered `1..=STAMP_COUNT` and rendered as `stamp{n}`.
pub const STAMP_COUNT: u8 = 34;

/// Key prefix of a canonical stamp slot (`stamp1` .. `stamp34`).
pub const SLOT_PREFIX: &str = "stamp";

/// Key prefix used by older card documents (`booth1` .. `booth34`).
///
/// Accepted on read as an alias of [`SLOT_PREFIX`], never written.
pub const LEGACY_SLOT_PREFIX: &str = "booth";

/// Magic bytes for the snapshot header.
///
/// - File Header = Magic Bytes ("STMP") + Version (u8) before payload.
pub const MAGIC_BYTES: &[u8; 4] = b"STMP";

/// Current snapshot format version.
///
/// Increment this when making breaking changes to the snapshot layout.
pub const FORMAT_VERSION: u8 = 1;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum length of a display name, in characters.
pub const MAX_DISPLAY_NAME_LENGTH: usize = 64;

/// Maximum length of an email address, in bytes.
pub const MAX_EMAIL_LENGTH: usize = 254;

/// Maximum number of users accepted in a single snapshot restore.
pub const MAX_SNAPSHOT_USERS: usize = 100_000;
