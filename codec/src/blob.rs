//! Packed state blobs: one entity's encoded properties at one snapshot.

use std::ops::Range;
use std::sync::{Arc, Mutex, PoisonError};

use schema::{ClassSchema, PropIndex};

use crate::changeframe::ChangeFrameList;
use crate::types::{EntitySerial, RecipientMask, Tick};

/// Which properties a blob considers changed relative to its reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangedProps {
    /// Full encode with no reference blob.
    All,
    /// Changed indices in ascending order; may be empty.
    List(Vec<PropIndex>),
}

impl ChangedProps {
    /// Number of changed properties for a class of `prop_count` properties.
    #[must_use]
    pub fn count(&self, prop_count: usize) -> usize {
        match self {
            Self::All => prop_count,
            Self::List(list) => list.len(),
        }
    }

    #[must_use]
    pub fn contains(&self, index: PropIndex) -> bool {
        match self {
            Self::All => true,
            Self::List(list) => list.binary_search(&index).is_ok(),
        }
    }
}

/// Encoded property bits plus per-property bit offsets.
///
/// `prop_bits` holds `prop_count + 1` entries: property `i` occupies
/// `prop_bits[i]..prop_bits[i + 1]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedProps {
    pub(crate) data: Arc<[u8]>,
    pub(crate) bit_len: usize,
    pub(crate) prop_bits: Arc<[u32]>,
}

impl EncodedProps {
    pub(crate) fn range(&self, index: PropIndex) -> Option<Range<usize>> {
        let i = index.as_usize();
        let start = *self.prop_bits.get(i)? as usize;
        let end = *self.prop_bits.get(i + 1)? as usize;
        Some(start..end)
    }

    pub(crate) fn prop_count(&self) -> usize {
        self.prop_bits.len().saturating_sub(1)
    }
}

/// One entity's encoded state for one snapshot.
///
/// Immutable once constructed apart from its change-frame list, which is
/// handed forward to the next blob of the same entity. Shared through `Arc`
/// by every snapshot that references it.
#[derive(Debug)]
pub struct PackedBlob {
    serial: EntitySerial,
    class: Arc<ClassSchema>,
    tick: Tick,
    encoded: EncodedProps,
    changed: ChangedProps,
    recipients: RecipientMask,
    change_frames: Mutex<Option<ChangeFrameList>>,
}

impl PackedBlob {
    pub(crate) fn new(
        serial: EntitySerial,
        class: Arc<ClassSchema>,
        tick: Tick,
        encoded: EncodedProps,
        changed: ChangedProps,
        recipients: RecipientMask,
        change_frames: Option<ChangeFrameList>,
    ) -> Self {
        Self {
            serial,
            class,
            tick,
            encoded,
            changed,
            recipients,
            change_frames: Mutex::new(change_frames),
        }
    }

    #[must_use]
    pub const fn serial(&self) -> EntitySerial {
        self.serial
    }

    #[must_use]
    pub const fn class(&self) -> &Arc<ClassSchema> {
        &self.class
    }

    /// Tick the bytes were encoded at; tick-relative properties decode against it.
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// Encoded property bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.encoded.data
    }

    #[must_use]
    pub const fn bit_len(&self) -> usize {
        self.encoded.bit_len
    }

    /// Bit range of one property within [`data`](Self::data).
    #[must_use]
    pub fn prop_range(&self, index: PropIndex) -> Option<Range<usize>> {
        self.encoded.range(index)
    }

    #[must_use]
    pub const fn changed(&self) -> &ChangedProps {
        &self.changed
    }

    #[must_use]
    pub const fn recipients(&self) -> RecipientMask {
        self.recipients
    }

    /// Returns `true` if both blobs share the same encoded buffer.
    #[must_use]
    pub fn shares_bytes_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.encoded.data, &other.encoded.data)
    }

    pub(crate) const fn encoded(&self) -> &EncodedProps {
        &self.encoded
    }

    /// Takes ownership of this blob's change-frame list, leaving none behind.
    ///
    /// Only valid when no other consumer will read this blob's history again.
    pub fn steal_change_frames(&self) -> Option<ChangeFrameList> {
        self.change_frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Deep copy of this blob's change-frame list.
    #[must_use]
    pub fn snapshot_change_frames(&self) -> Option<ChangeFrameList> {
        self.change_frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(ChangeFrameList::snapshot)
    }

    /// Properties changed after `acked`, from the change-frame list.
    ///
    /// `None` when the list has already moved on to a newer blob.
    #[must_use]
    pub fn props_changed_after(&self, acked: Tick) -> Option<Vec<PropIndex>> {
        self.change_frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|list| list.changes_after(acked))
    }

    /// Returns `true` if a change-frame list is still attached.
    #[must_use]
    pub fn has_change_frames(&self) -> bool {
        self.change_frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use schema::{PropCodec, PropDef, SchemaRegistry, TableDef};

    use super::*;

    fn class() -> Arc<ClassSchema> {
        let mut builder = SchemaRegistry::builder();
        let id = builder.register(
            TableDef::new("Pair")
                .prop(PropDef::scalar("a", 0, PropCodec::uint(4)))
                .prop(PropDef::scalar("b", 4, PropCodec::uint(4))),
        );
        Arc::clone(builder.build().unwrap().class(id).unwrap())
    }

    fn blob(frames: Option<ChangeFrameList>) -> PackedBlob {
        PackedBlob::new(
            EntitySerial::new(1),
            class(),
            Tick::new(3),
            EncodedProps {
                data: Arc::from(vec![0xAB]),
                bit_len: 8,
                prop_bits: Arc::from(vec![0, 4, 8]),
            },
            ChangedProps::List(vec![PropIndex::new(1)]),
            RecipientMask::ALL,
            frames,
        )
    }

    #[test]
    fn prop_ranges() {
        let blob = blob(None);
        assert_eq!(blob.prop_range(PropIndex::new(0)), Some(0..4));
        assert_eq!(blob.prop_range(PropIndex::new(1)), Some(4..8));
        assert_eq!(blob.prop_range(PropIndex::new(2)), None);
        assert_eq!(blob.encoded().prop_count(), 2);
    }

    #[test]
    fn steal_leaves_nothing_behind() {
        let blob = blob(Some(ChangeFrameList::new(2, Tick::new(3))));
        assert!(blob.has_change_frames());
        let list = blob.steal_change_frames().unwrap();
        assert_eq!(list.len(), 2);
        assert!(!blob.has_change_frames());
        assert!(blob.steal_change_frames().is_none());
        assert!(blob.props_changed_after(Tick::new(0)).is_none());
    }

    #[test]
    fn snapshot_keeps_original() {
        let blob = blob(Some(ChangeFrameList::new(2, Tick::new(3))));
        let mut copy = blob.snapshot_change_frames().unwrap();
        copy.mark_all(Tick::new(9));
        assert_eq!(blob.props_changed_after(Tick::new(3)), Some(Vec::new()));
    }

    #[test]
    fn changed_props_queries() {
        let list = ChangedProps::List(vec![PropIndex::new(1), PropIndex::new(4)]);
        assert!(list.contains(PropIndex::new(4)));
        assert!(!list.contains(PropIndex::new(2)));
        assert_eq!(list.count(10), 2);
        assert_eq!(ChangedProps::All.count(10), 10);
    }
}
