//! Decoding blobs and serializing them against an acknowledged reference.
//!
//! An entity delta is `varu32 tick, varu32 count`, the changed property
//! indices as ascending gaps, then each changed property's bits copied
//! straight out of the blob. A frame delta wraps entity deltas for one
//! observer: removed entities first, then updated ones, each updated entity
//! flagged as diffed against the observer's acknowledged frame or against
//! the class baseline.

use std::collections::BTreeMap;
use std::sync::Arc;

use bitstream::{BitReader, BitWriter};
use schema::{ClassId, ClassSchema, PropIndex, SchemaRegistry};

use crate::baseline::BaselineStore;
use crate::blob::PackedBlob;
use crate::encode::{diff_props, PropsView};
use crate::error::{CodecError, CodecResult};
use crate::snapshot::FrameSnapshot;
use crate::types::{EntityIndex, EntitySerial, Tick};
use crate::value::{read_prop, PropValue};

/// Reproduces every property value stored in `blob`.
pub fn decode_blob(blob: &PackedBlob) -> CodecResult<Vec<PropValue>> {
    let class = blob.class();
    let mut reader = BitReader::with_bit_len(blob.data(), blob.bit_len());
    class
        .props()
        .iter()
        .map(|prop| read_prop(class.id(), prop, blob.tick(), &mut reader))
        .collect()
}

/// Properties that differ between two blobs of the same class.
pub fn calc_delta(from: &PackedBlob, to: &PackedBlob) -> CodecResult<Vec<PropIndex>> {
    if from.class().id() != to.class().id() {
        return Err(CodecError::ClassMismatch {
            expected: from.class().id(),
            found: to.class().id(),
        });
    }
    Ok(diff_props(
        to.class(),
        PropsView::of(from.encoded(), from.tick()),
        PropsView::of(to.encoded(), to.tick()),
    ))
}

/// Writes the `changed` properties of `to`. `changed` must be ascending.
pub fn write_entity_delta(
    to: &PackedBlob,
    changed: &[PropIndex],
    writer: &mut BitWriter<'_>,
) -> CodecResult<()> {
    let class = to.class();
    writer.write_varu32(to.tick().raw())?;
    writer.write_varu32(changed.len() as u32)?;
    let mut next = 0u32;
    for index in changed {
        let raw = u32::from(index.get());
        if raw < next || index.as_usize() >= class.prop_count() {
            return Err(CodecError::InvalidPropIndex {
                class: class.id(),
                index: raw,
            });
        }
        writer.write_varu32(raw - next)?;
        next = raw + 1;
    }
    for index in changed {
        let range = to.prop_range(*index).ok_or(CodecError::InvalidPropIndex {
            class: class.id(),
            index: u32::from(index.get()),
        })?;
        writer.write_bit_range(to.data(), range.start, range.end)?;
    }
    Ok(())
}

/// An entity delta applied on the receiving side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedDelta {
    pub tick: Tick,
    pub changed: Vec<PropIndex>,
}

/// Reads an entity delta and applies it to `values`, which must hold the
/// reference state the delta was written against.
pub fn read_entity_delta(
    class: &ClassSchema,
    reader: &mut BitReader<'_>,
    values: &mut [PropValue],
) -> CodecResult<AppliedDelta> {
    if values.len() != class.prop_count() {
        return Err(CodecError::PropCountMismatch {
            expected: class.prop_count(),
            actual: values.len(),
        });
    }
    let tick = Tick::new(reader.read_varu32()?);
    let count = reader.read_varu32()? as usize;
    if count > class.prop_count() {
        return Err(CodecError::PropCountMismatch {
            expected: class.prop_count(),
            actual: count,
        });
    }

    let mut changed = Vec::with_capacity(count);
    let mut next = 0u64;
    for _ in 0..count {
        let raw = next + u64::from(reader.read_varu32()?);
        let index = u16::try_from(raw)
            .ok()
            .map(PropIndex::new)
            .filter(|index| index.as_usize() < class.prop_count())
            .ok_or(CodecError::InvalidPropIndex {
                class: class.id(),
                index: u32::try_from(raw).unwrap_or(u32::MAX),
            })?;
        changed.push(index);
        next = raw + 1;
    }
    for index in &changed {
        let prop = &class.props()[index.as_usize()];
        values[index.as_usize()] = read_prop(class.id(), prop, tick, reader)?;
    }
    Ok(AppliedDelta { tick, changed })
}

/// What one observer currently holds, rebuilt from frame deltas.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObserverView {
    tick: Option<Tick>,
    entities: BTreeMap<EntityIndex, ObservedEntity>,
}

/// One entity as seen by an observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedEntity {
    pub serial: EntitySerial,
    pub class: ClassId,
    pub values: Vec<PropValue>,
}

impl ObserverView {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tick of the last applied frame.
    #[must_use]
    pub const fn tick(&self) -> Option<Tick> {
        self.tick
    }

    #[must_use]
    pub fn entity(&self, index: EntityIndex) -> Option<&ObservedEntity> {
        self.entities.get(&index)
    }

    pub fn entities(&self) -> impl Iterator<Item = (EntityIndex, &ObservedEntity)> {
        self.entities.iter().map(|(index, entity)| (*index, entity))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Counts for one written frame delta.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FrameDeltaSummary {
    pub updated: usize,
    pub from_baseline: usize,
    pub removed: usize,
    pub unchanged: usize,
}

struct Update<'f> {
    index: EntityIndex,
    blob: &'f Arc<PackedBlob>,
    from_baseline: bool,
    changed: Vec<PropIndex>,
}

/// Serializes `frame` for `observer`, relative to the frame it last
/// acknowledged (or to class baselines when it has acknowledged nothing).
pub fn write_frame_delta(
    frame: &FrameSnapshot,
    acked: Option<&FrameSnapshot>,
    baselines: &BaselineStore,
    observer: u32,
    writer: &mut BitWriter<'_>,
) -> CodecResult<FrameDeltaSummary> {
    let visible = |blob: &PackedBlob| blob.recipients().contains(observer);
    let mut summary = FrameDeltaSummary::default();

    let removed: Vec<EntityIndex> = acked
        .map(|acked| {
            acked
                .entries()
                .iter()
                .filter(|old| visible(&old.blob))
                .filter(|old| frame.blob(old.index).map_or(true, |blob| !visible(blob)))
                .map(|old| old.index)
                .collect()
        })
        .unwrap_or_default();

    let mut updates = Vec::new();
    for entry in frame.entries().iter().filter(|entry| visible(&entry.blob)) {
        let blob = &entry.blob;
        let reference = acked
            .and_then(|acked| acked.blob(entry.index))
            .filter(|old| visible(old))
            .filter(|old| old.serial() == blob.serial() && old.class().id() == blob.class().id());
        let update = match reference {
            Some(old) if Arc::ptr_eq(old, blob) => {
                summary.unchanged += 1;
                continue;
            }
            Some(old) => {
                let since = acked.map(FrameSnapshot::tick).unwrap_or_default();
                let changed = match blob.props_changed_after(since) {
                    Some(changed) => changed,
                    None => calc_delta(old, blob)?,
                };
                Update {
                    index: entry.index,
                    blob,
                    from_baseline: false,
                    changed,
                }
            }
            None => {
                let baseline = baselines
                    .for_class(blob.class().id())
                    .ok_or(CodecError::UnknownClass {
                        class: blob.class().id(),
                    })?;
                Update {
                    index: entry.index,
                    blob,
                    from_baseline: true,
                    changed: calc_delta(&baseline, blob)?,
                }
            }
        };
        updates.push(update);
    }

    writer.write_varu32(frame.tick().raw())?;
    writer.write_varu32(removed.len() as u32)?;
    write_index_gaps(removed.iter().copied(), writer)?;
    writer.write_varu32(updates.len() as u32)?;
    let mut next = 0u32;
    for update in &updates {
        writer.write_varu32(update.index.raw() - next)?;
        next = update.index.raw() + 1;
        writer.write_varu32(update.blob.serial().raw())?;
        writer.write_varu32(u32::from(update.blob.class().id().get()))?;
        writer.write_bit(update.from_baseline)?;
        write_entity_delta(update.blob, &update.changed, writer)?;
    }

    summary.removed = removed.len();
    summary.updated = updates.len();
    summary.from_baseline = updates.iter().filter(|u| u.from_baseline).count();
    Ok(summary)
}

/// Applies a frame delta written by [`write_frame_delta`] to `view`.
pub fn read_frame_delta(
    registry: &SchemaRegistry,
    baselines: &BaselineStore,
    view: &mut ObserverView,
    reader: &mut BitReader<'_>,
) -> CodecResult<Tick> {
    let tick = Tick::new(reader.read_varu32()?);
    let removed = reader.read_varu32()?;
    let mut next = 0u64;
    for _ in 0..removed {
        let index = read_index_gap(reader, &mut next)?;
        view.entities.remove(&index);
    }

    let updates = reader.read_varu32()?;
    let mut next = 0u64;
    for _ in 0..updates {
        let index = read_index_gap(reader, &mut next)?;
        let serial = EntitySerial::new(reader.read_varu32()?);
        let class_id = u16::try_from(reader.read_varu32()?)
            .map(ClassId::new)
            .map_err(|_| CodecError::UnknownClass {
                class: ClassId::new(u16::MAX),
            })?;
        let class = registry
            .class(class_id)
            .ok_or(CodecError::UnknownClass { class: class_id })?;
        let from_baseline = reader.read_bit()?;

        let mut values = if from_baseline {
            let baseline = baselines
                .for_class(class_id)
                .ok_or(CodecError::UnknownClass { class: class_id })?;
            decode_blob(&baseline)?
        } else {
            match view.entities.remove(&index) {
                Some(old) if old.class == class_id => old.values,
                Some(old) => {
                    return Err(CodecError::ClassMismatch {
                        expected: old.class,
                        found: class_id,
                    })
                }
                None => return Err(CodecError::MissingReference { index }),
            }
        };
        read_entity_delta(class, reader, &mut values)?;
        view.entities.insert(
            index,
            ObservedEntity {
                serial,
                class: class_id,
                values,
            },
        );
    }
    view.tick = Some(tick);
    Ok(tick)
}

fn write_index_gaps(
    indices: impl Iterator<Item = EntityIndex>,
    writer: &mut BitWriter<'_>,
) -> CodecResult<()> {
    let mut next = 0u32;
    for index in indices {
        writer.write_varu32(index.raw() - next)?;
        next = index.raw() + 1;
    }
    Ok(())
}

fn read_index_gap(reader: &mut BitReader<'_>, next: &mut u64) -> CodecResult<EntityIndex> {
    let raw = *next + u64::from(reader.read_varu32()?);
    let index = u32::try_from(raw).map_err(|_| CodecError::EntityOutOfRange {
        index: EntityIndex::new(u32::MAX),
        max: u32::MAX as usize,
    })?;
    *next = raw + 1;
    Ok(EntityIndex::new(index))
}
