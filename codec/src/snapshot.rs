//! One tick's packed entity states.

use std::sync::Arc;

use crate::blob::PackedBlob;
use crate::error::CodecError;
use crate::stats::PackStats;
use crate::types::{EntityIndex, Tick};

/// How a snapshot entry's blob was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PackPath {
    /// The previous blob, untouched.
    Reused,
    /// Incremental re-encode of changed properties.
    Fast,
    /// Full re-encode diffed against the previous blob.
    Slow,
    /// Full encode with no previous blob.
    Full,
    /// Packing failed this tick; the previous blob stands in.
    Carried,
}

/// A packed entity in a [`FrameSnapshot`].
#[derive(Debug, Clone)]
pub struct SnapshotEntry {
    pub index: EntityIndex,
    pub blob: Arc<PackedBlob>,
    pub path: PackPath,
}

/// An entity that could not be packed this tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackFailure {
    pub index: EntityIndex,
    pub error: CodecError,
}

/// All packed entities for one tick, ordered by entity index.
///
/// Blobs are shared: an entity that did not change holds the same
/// `Arc<PackedBlob>` as in the previous snapshot.
#[derive(Debug, Clone)]
pub struct FrameSnapshot {
    tick: Tick,
    entries: Vec<SnapshotEntry>,
    failures: Vec<PackFailure>,
    stats: PackStats,
}

impl FrameSnapshot {
    pub(crate) fn new(
        tick: Tick,
        mut entries: Vec<SnapshotEntry>,
        failures: Vec<PackFailure>,
        stats: PackStats,
    ) -> Self {
        entries.sort_unstable_by_key(|entry| entry.index);
        Self {
            tick,
            entries,
            failures,
            stats,
        }
    }

    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    #[must_use]
    pub fn entries(&self) -> &[SnapshotEntry] {
        &self.entries
    }

    /// Entry for `index`, if it was packed this tick.
    #[must_use]
    pub fn entry(&self, index: EntityIndex) -> Option<&SnapshotEntry> {
        self.entries
            .binary_search_by_key(&index, |entry| entry.index)
            .ok()
            .map(|i| &self.entries[i])
    }

    #[must_use]
    pub fn blob(&self, index: EntityIndex) -> Option<&Arc<PackedBlob>> {
        self.entry(index).map(|entry| &entry.blob)
    }

    #[must_use]
    pub fn failures(&self) -> &[PackFailure] {
        &self.failures
    }

    /// Counts for this tick only.
    #[must_use]
    pub const fn stats(&self) -> &PackStats {
        &self.stats
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total encoded bytes held by this snapshot, counting shared blobs once
    /// per entry.
    #[must_use]
    pub fn encoded_bytes(&self) -> usize {
        self.entries.iter().map(|entry| entry.blob.data().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PackConfig;
    use crate::entity::EntityState;
    use crate::limits::CodecLimits;
    use crate::pack::PackEngine;
    use crate::types::EntitySerial;
    use crate::value::PropValue;
    use schema::{ClassId, PropCodec, PropDef, SchemaRegistry, TableDef};

    fn engine() -> PackEngine {
        let mut builder = SchemaRegistry::builder();
        builder.register(
            TableDef::new("Crate")
                .prop(PropDef::scalar("hp", 0, PropCodec::uint(8)))
                .prop(PropDef::scalar("open", 4, PropCodec::bool())),
        );
        let registry = Arc::new(builder.build().unwrap());
        PackEngine::new(registry, PackConfig::for_testing(), CodecLimits::for_testing()).unwrap()
    }

    #[test]
    fn entries_sorted_and_addressable_by_index() {
        let mut engine = engine();
        let a = vec![PropValue::UInt(1), PropValue::Bool(false)];
        let b = vec![PropValue::UInt(2), PropValue::Bool(true)];
        let states = [
            EntityState::new(EntityIndex::new(7), EntitySerial::new(1), ClassId::new(0), &b),
            EntityState::new(EntityIndex::new(2), EntitySerial::new(1), ClassId::new(0), &a),
        ];
        let snapshot = engine.pack_tick(Tick::new(4), &states).unwrap();

        assert_eq!(snapshot.tick(), Tick::new(4));
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.entries()[0].index, EntityIndex::new(2));
        assert_eq!(snapshot.entry(EntityIndex::new(7)).unwrap().path, PackPath::Full);
        assert!(snapshot.blob(EntityIndex::new(3)).is_none());
        assert_eq!(snapshot.stats().full, 2);
        assert!(snapshot.failures().is_empty());

        let expected: usize = snapshot.entries().iter().map(|e| e.blob.data().len()).sum();
        assert_eq!(snapshot.encoded_bytes(), expected);
        assert!(snapshot.encoded_bytes() > 0);
    }

    #[test]
    fn empty_tick_has_no_bytes() {
        let mut engine = engine();
        let snapshot = engine.pack_tick(Tick::new(1), &[]).unwrap();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.encoded_bytes(), 0);
    }
}
