//! Diagnostic counters.

use std::ops::AddAssign;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::snapshot::PackPath;

/// Pack counts for one tick or for the engine's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PackStats {
    /// Previous blob reused without re-encoding.
    pub reused: u64,
    /// Incremental encodes.
    pub fast: u64,
    /// Full encodes diffed against a previous blob.
    pub slow: u64,
    /// Full encodes with nothing to diff against.
    pub full: u64,
    /// Incremental encodes abandoned for a full encode.
    pub fast_fallbacks: u64,
    /// Properties on which fast and slow diffs disagreed.
    pub validation_mismatches: u64,
    /// Entities that failed to pack without aborting the tick.
    pub failures: u64,
}

impl PackStats {
    /// Entities that produced a blob.
    #[must_use]
    pub const fn packed(&self) -> u64 {
        self.reused + self.fast + self.slow + self.full
    }

    pub(crate) fn record(&mut self, path: PackPath) {
        match path {
            PackPath::Reused => self.reused += 1,
            PackPath::Fast => self.fast += 1,
            PackPath::Slow => self.slow += 1,
            PackPath::Full => self.full += 1,
            PackPath::Carried => {}
        }
    }
}

impl AddAssign for PackStats {
    fn add_assign(&mut self, rhs: Self) {
        self.reused += rhs.reused;
        self.fast += rhs.fast;
        self.slow += rhs.slow;
        self.full += rhs.full;
        self.fast_fallbacks += rhs.fast_fallbacks;
        self.validation_mismatches += rhs.validation_mismatches;
        self.failures += rhs.failures;
    }
}

/// Counters bumped from worker threads during one tick.
#[derive(Debug, Default)]
pub(crate) struct TickCounters {
    fast_fallbacks: AtomicU64,
    validation_mismatches: AtomicU64,
}

impl TickCounters {
    pub(crate) fn fast_fallback(&self) {
        self.fast_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn validation_mismatch(&self, count: u64) {
        self.validation_mismatches.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn drain_into(&self, stats: &mut PackStats) {
        stats.fast_fallbacks += self.fast_fallbacks.swap(0, Ordering::Relaxed);
        stats.validation_mismatches += self.validation_mismatches.swap(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_accumulate() {
        let mut tick = PackStats::default();
        tick.record(PackPath::Fast);
        tick.record(PackPath::Fast);
        tick.record(PackPath::Reused);
        tick.failures = 1;

        let counters = TickCounters::default();
        counters.fast_fallback();
        counters.validation_mismatch(3);
        counters.drain_into(&mut tick);

        let mut total = PackStats::default();
        total += tick;
        total += tick;
        assert_eq!(total.fast, 4);
        assert_eq!(total.packed(), 6);
        assert_eq!(total.fast_fallbacks, 2);
        assert_eq!(total.validation_mismatches, 6);
        assert_eq!(total.failures, 2);
    }
}
