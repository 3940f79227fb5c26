//! Full encodes, incremental re-encodes and per-property comparison.

use std::sync::Arc;

use bitstream::{bit_ranges_equal, BitWriter};
use schema::{ClassSchema, PropIndex};

use crate::blob::EncodedProps;
use crate::error::{CodecError, CodecResult};
use crate::scratch::PackScratch;
use crate::types::Tick;
use crate::value::{write_prop, PropertySource};

/// Borrowed view of encoded properties and the tick they were encoded at.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PropsView<'a> {
    pub data: &'a [u8],
    pub prop_bits: &'a [u32],
    pub tick: Tick,
}

impl<'a> PropsView<'a> {
    pub(crate) fn of(encoded: &'a EncodedProps, tick: Tick) -> Self {
        Self {
            data: &encoded.data,
            prop_bits: &encoded.prop_bits,
            tick,
        }
    }

    fn range(&self, i: usize) -> Option<(usize, usize)> {
        let start = *self.prop_bits.get(i)? as usize;
        let end = *self.prop_bits.get(i + 1)? as usize;
        Some((start, end.saturating_sub(start)))
    }
}

/// Encodes every property of `class` into `buf`, recording property bit
/// offsets into `prop_bits`. Returns the number of bits written.
pub(crate) fn encode_full(
    class: &ClassSchema,
    source: &dyn PropertySource,
    tick: Tick,
    buf: &mut [u8],
    prop_bits: &mut Vec<u32>,
) -> CodecResult<usize> {
    prop_bits.clear();
    let mut writer = BitWriter::new(buf);
    for prop in class.props() {
        prop_bits.push(writer.position() as u32);
        let value = source.prop_value(prop).ok_or(CodecError::MissingValue {
            class: class.id(),
            prop: prop.index,
        })?;
        write_prop(class.id(), prop, value, tick, &mut writer)?;
    }
    prop_bits.push(writer.position() as u32);
    let bits = writer.bits_written();
    writer.finish();
    Ok(bits)
}

/// Copies a finished encode out of scratch space into shareable storage.
///
/// Reuses `like`'s offset table when the layout is unchanged.
pub(crate) fn freeze(
    buf: &[u8],
    bit_len: usize,
    prop_bits: &[u32],
    like: Option<&EncodedProps>,
) -> EncodedProps {
    let prop_bits = match like {
        Some(previous) if *previous.prop_bits == *prop_bits => Arc::clone(&previous.prop_bits),
        _ => Arc::from(prop_bits),
    };
    EncodedProps {
        data: Arc::from(&buf[..bit_len.div_ceil(8)]),
        bit_len,
        prop_bits,
    }
}

/// Compares two encodings of the same class property by property.
///
/// A property is changed when its size or bits differ, or when it is
/// tick-relative and the two encodings were made at different ticks.
pub(crate) fn diff_props(class: &ClassSchema, from: PropsView<'_>, to: PropsView<'_>) -> Vec<PropIndex> {
    let mut changed = Vec::new();
    for prop in class.props() {
        let i = prop.index.as_usize();
        let same = match (from.range(i), to.range(i)) {
            (Some((from_start, from_len)), Some((to_start, to_len))) => {
                from_len == to_len
                    && bit_ranges_equal(from.data, from_start, to.data, to_start, to_len)
                    && !(prop.flags.tick_relative && from.tick != to.tick)
            }
            _ => false,
        };
        if !same {
            changed.push(prop.index);
        }
    }
    changed
}

/// Re-encodes only the properties at `offsets` (plus tick-relative ones)
/// on top of a copy of `prev`'s bytes.
///
/// Returns `Ok(None)` when the incremental encode cannot be used: a
/// property changed encoded size, or the layout does not match.
pub(crate) fn encode_incremental(
    class: &ClassSchema,
    source: &dyn PropertySource,
    tick: Tick,
    prev: PropsView<'_>,
    prev_encoded: &EncodedProps,
    offsets: &[u32],
    scratch: &mut PackScratch,
) -> CodecResult<Option<(EncodedProps, Vec<PropIndex>)>> {
    if prev_encoded.prop_count() != class.prop_count() {
        return Ok(None);
    }
    scratch.reset_marks(class.prop_count());
    for &offset in offsets {
        for index in class.offset_map().lookup(offset) {
            scratch.mark(index);
        }
    }
    for &index in class.tick_relative_props() {
        scratch.mark(index);
    }
    let touched = scratch.take_touched();

    let byte_len = prev.data.len();
    if byte_len > scratch.buf.len() {
        return Ok(None);
    }
    scratch.buf[..byte_len].copy_from_slice(prev.data);
    {
        let Ok(mut writer) = BitWriter::with_existing(&mut scratch.buf, prev_encoded.bit_len)
        else {
            return Ok(None);
        };
        for &index in &touched {
            let Some(range) = prev_encoded.range(index) else {
                return Ok(None);
            };
            let Some(prop) = class.prop(index) else {
                return Ok(None);
            };
            writer.seek(range.start)?;
            let value = source.prop_value(prop).ok_or(CodecError::MissingValue {
                class: class.id(),
                prop: index,
            })?;
            match write_prop(class.id(), prop, value, tick, &mut writer) {
                Ok(()) => {}
                Err(CodecError::EncodeOverflow { .. }) => return Ok(None),
                Err(err) => return Err(err),
            }
            if writer.position() != range.end {
                return Ok(None);
            }
        }
        if writer.bits_written() != prev_encoded.bit_len {
            return Ok(None);
        }
        writer.finish();
    }

    let current = PropsView {
        data: &scratch.buf[..byte_len],
        prop_bits: prev.prop_bits,
        tick,
    };
    let changed: Vec<PropIndex> = touched
        .into_iter()
        .filter(|index| {
            let i = index.as_usize();
            let tick_relative = class.prop(*index).is_some_and(|p| p.flags.tick_relative);
            match (prev.range(i), current.range(i)) {
                (Some((start, len)), Some(_)) => {
                    !bit_ranges_equal(prev.data, start, current.data, start, len)
                        || (tick_relative && prev.tick != tick)
                }
                _ => true,
            }
        })
        .collect();

    if changed.is_empty() {
        return Ok(Some((prev_encoded.clone(), changed)));
    }
    let encoded = EncodedProps {
        data: Arc::from(current.data),
        bit_len: prev_encoded.bit_len,
        prop_bits: Arc::clone(&prev_encoded.prop_bits),
    };
    Ok(Some((encoded, changed)))
}
