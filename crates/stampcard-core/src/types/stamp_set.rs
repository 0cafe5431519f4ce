//! The per-user stamp card.

use super::StampId;
use crate::primitives::STAMP_COUNT;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Mask with one bit per slot.
const FULL_MASK: u64 = (1u64 << STAMP_COUNT) - 1;

/// A card of `STAMP_COUNT` boolean slots.
///
/// Always holds every canonical slot. On the wire it is a map of all slot keys
/// in numeric order; on read, missing keys are backfilled with `false` and
/// legacy `booth{n}` keys are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StampSet {
    /// Bit `i` is slot `i + 1`.
    bits: u64,
}

impl StampSet {
    /// An empty card.
    #[must_use]
    pub const fn new() -> Self {
        Self { bits: 0 }
    }

    /// A card with every slot granted.
    #[must_use]
    pub const fn full() -> Self {
        Self { bits: FULL_MASK }
    }

    /// Build a card with exactly the given slots granted.
    #[must_use]
    pub fn with_granted(slots: impl IntoIterator<Item = StampId>) -> Self {
        let mut set = Self::new();
        for slot in slots {
            set.set(slot, true);
        }
        set
    }

    /// Build a card from stored `(key, granted)` pairs.
    ///
    /// Canonical keys take precedence over legacy keys for the same slot.
    /// Unknown keys are ignored.
    pub fn from_document<K: AsRef<str>>(entries: impl IntoIterator<Item = (K, bool)>) -> Self {
        let mut canonical = Self::new();
        let mut canonical_seen = 0u64;
        let mut legacy = Self::new();

        for (key, granted) in entries {
            match StampId::from_document_key(key.as_ref()) {
                Some((id, false)) => {
                    canonical.set(id, granted);
                    canonical_seen |= Self::bit(id);
                }
                Some((id, true)) => {
                    legacy.set(id, granted);
                }
                None => {}
            }
        }

        Self {
            bits: (canonical.bits & canonical_seen) | (legacy.bits & !canonical_seen),
        }
    }

    const fn bit(slot: StampId) -> u64 {
        1u64 << slot.index()
    }

    /// Whether `slot` is granted.
    #[must_use]
    pub const fn get(&self, slot: StampId) -> bool {
        self.bits & Self::bit(slot) != 0
    }

    /// Set `slot` to `granted`. Returns whether the flag changed.
    pub fn set(&mut self, slot: StampId, granted: bool) -> bool {
        let before = self.bits;
        if granted {
            self.bits |= Self::bit(slot);
        } else {
            self.bits &= !Self::bit(slot);
        }
        before != self.bits
    }

    /// Clear every slot.
    pub fn clear(&mut self) {
        self.bits = 0;
    }

    /// Number of granted slots.
    #[must_use]
    pub const fn count_granted(&self) -> usize {
        self.bits.count_ones() as usize
    }

    /// Whether every slot is granted.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.bits == FULL_MASK
    }

    /// Lowest-numbered slot that is not granted.
    #[must_use]
    pub fn next_available_slot(&self) -> Option<StampId> {
        let free = !self.bits & FULL_MASK;
        StampId::from_index(free.trailing_zeros() as usize)
    }

    /// Granted slots in canonical order.
    pub fn granted(&self) -> impl Iterator<Item = StampId> + '_ {
        StampId::all().filter(|slot| self.get(*slot))
    }

    /// Every slot with its flag, in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (StampId, bool)> + '_ {
        StampId::all().map(|slot| (slot, self.get(slot)))
    }
}

impl Serialize for StampSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(STAMP_COUNT as usize))?;
        for (slot, granted) in self.iter() {
            map.serialize_entry(&slot, &granted)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for StampSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let document = BTreeMap::<String, bool>::deserialize(deserializer)?;
        Ok(Self::from_document(document))
    }
}
