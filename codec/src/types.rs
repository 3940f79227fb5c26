//! Core types for the packing engine.

use std::fmt;

/// A simulation tick number.
///
/// Ticks are monotonically increasing identifiers for simulation states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Tick(u32);

impl Tick {
    /// Creates a new tick.
    #[must_use]
    pub const fn new(tick: u32) -> Self {
        Self(tick)
    }

    /// Returns the raw tick value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// The following tick, saturating at `u32::MAX`.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl From<u32> for Tick {
    fn from(tick: u32) -> Self {
        Self(tick)
    }
}

impl From<Tick> for u32 {
    fn from(tick: Tick) -> Self {
        tick.0
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Slot index of an entity in the simulation's entity list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EntityIndex(u32);

impl EntityIndex {
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Serial number of the entity occupying a slot.
///
/// Changes whenever the slot is reused, so a previous blob is only a valid
/// diff reference when both index and serial match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EntitySerial(u32);

impl EntitySerial {
    #[must_use]
    pub const fn new(serial: u32) -> Self {
        Self(serial)
    }

    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Set of observer streams (up to 64) that should receive a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RecipientMask(u64);

impl RecipientMask {
    /// No observers.
    pub const NONE: Self = Self(0);
    /// Every observer.
    pub const ALL: Self = Self(u64::MAX);

    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Adds observer `slot` (0..64); out-of-range slots are ignored.
    #[must_use]
    pub const fn with(self, slot: u32) -> Self {
        if slot >= 64 {
            self
        } else {
            Self(self.0 | (1 << slot))
        }
    }

    #[must_use]
    pub const fn contains(self, slot: u32) -> bool {
        slot < 64 && self.0 & (1 << slot) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_ordering_and_next() {
        let t1 = Tick::new(1);
        assert!(t1 < t1.next());
        assert_eq!(Tick::new(u32::MAX).next(), Tick::new(u32::MAX));
        let raw: u32 = Tick::from(7).into();
        assert_eq!(raw, 7);
    }

    #[test]
    fn recipient_mask_membership() {
        let mask = RecipientMask::NONE.with(0).with(5).with(70);
        assert!(mask.contains(0));
        assert!(mask.contains(5));
        assert!(!mask.contains(1));
        assert!(!mask.contains(70));
        assert_eq!(mask.bits(), 0b10_0001);
        assert!(RecipientMask::ALL.contains(63));
    }
}
