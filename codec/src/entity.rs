//! Per-tick entity input as reported by the simulation layer.

use std::fmt;

use schema::ClassId;

use crate::types::{EntityIndex, EntitySerial, RecipientMask};
use crate::value::PropertySource;

/// Memory offsets written since the entity was last packed.
///
/// `schema_hash` is the class hash the offsets were recorded against; if it
/// no longer matches the class, the list is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangedOffsets<'a> {
    pub schema_hash: u64,
    pub offsets: &'a [u32],
}

/// One entity's state for one pack.
#[derive(Clone, Copy)]
pub struct EntityState<'a> {
    pub index: EntityIndex,
    pub serial: EntitySerial,
    pub class: ClassId,
    /// Set by the simulation when anything was written since the last pack.
    pub dirty: bool,
    /// Every property was replaced, e.g. after the slot was recycled.
    pub full_replace: bool,
    pub changed_offsets: Option<ChangedOffsets<'a>>,
    /// Observer streams that should receive this entity.
    pub recipients: RecipientMask,
    pub source: &'a (dyn PropertySource + Sync),
}

impl<'a> EntityState<'a> {
    /// A dirty entity visible to every observer, with no offset list.
    pub fn new(
        index: EntityIndex,
        serial: EntitySerial,
        class: ClassId,
        source: &'a (dyn PropertySource + Sync),
    ) -> Self {
        Self {
            index,
            serial,
            class,
            dirty: true,
            full_replace: false,
            changed_offsets: None,
            recipients: RecipientMask::ALL,
            source,
        }
    }

    #[must_use]
    pub const fn clean(mut self) -> Self {
        self.dirty = false;
        self
    }

    #[must_use]
    pub const fn replaced(mut self) -> Self {
        self.full_replace = true;
        self
    }

    #[must_use]
    pub const fn with_changed_offsets(mut self, schema_hash: u64, offsets: &'a [u32]) -> Self {
        self.changed_offsets = Some(ChangedOffsets {
            schema_hash,
            offsets,
        });
        self
    }

    #[must_use]
    pub const fn with_recipients(mut self, recipients: RecipientMask) -> Self {
        self.recipients = recipients;
        self
    }
}

impl fmt::Debug for EntityState<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityState")
            .field("index", &self.index)
            .field("serial", &self.serial)
            .field("class", &self.class)
            .field("dirty", &self.dirty)
            .field("full_replace", &self.full_replace)
            .field("changed_offsets", &self.changed_offsets)
            .field("recipients", &self.recipients)
            .finish_non_exhaustive()
    }
}
