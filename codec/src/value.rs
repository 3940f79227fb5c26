//! Property values and their bit-level encoding.

use bitstream::{BitReader, BitWriter};
use schema::{ClassId, FlatProp, PropCodec};

use crate::error::{CodecError, CodecResult, ValueReason};
use crate::types::Tick;

/// A single property value as read from entity memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PropValue {
    Bool(bool),
    UInt(u64),
    SInt(i64),
    VarUInt(u64),
    VarSInt(i64),
    /// Quantized fixed-point value.
    FixedPoint(i64),
}

/// Supplies raw property values for a full or partial encode.
///
/// Implemented by the simulation layer; the engine only ever reads.
pub trait PropertySource {
    /// Value of `prop`, or `None` if the entity cannot provide it.
    fn prop_value(&self, prop: &FlatProp) -> Option<PropValue>;
}

impl PropertySource for [PropValue] {
    fn prop_value(&self, prop: &FlatProp) -> Option<PropValue> {
        self.get(prop.index.as_usize()).copied()
    }
}

impl PropertySource for Vec<PropValue> {
    fn prop_value(&self, prop: &FlatProp) -> Option<PropValue> {
        self.as_slice().prop_value(prop)
    }
}

/// Encodes `value` for `prop` at the writer's cursor.
///
/// Tick-relative properties are written as `value - tick`.
pub(crate) fn write_prop(
    class: ClassId,
    prop: &FlatProp,
    value: PropValue,
    tick: Tick,
    writer: &mut BitWriter<'_>,
) -> CodecResult<()> {
    let value = if prop.flags.tick_relative {
        shift_signed(value, -i64::from(tick.raw()))
    } else {
        value
    };
    let invalid = |reason| CodecError::InvalidValue {
        class,
        prop: prop.index,
        reason,
    };
    match (prop.codec, value) {
        (PropCodec::Bool, PropValue::Bool(v)) => writer.write_bit(v)?,
        (PropCodec::UInt { bits }, PropValue::UInt(v)) => {
            if bits < 64 && v >> bits != 0 {
                return Err(invalid(ValueReason::UnsignedOutOfRange { bits, value: v }));
            }
            writer.write_bits(v, bits)?;
        }
        (PropCodec::SInt { bits }, PropValue::SInt(v)) => {
            let encoded =
                encode_sint(bits, v).ok_or_else(|| invalid(ValueReason::SignedOutOfRange { bits, value: v }))?;
            writer.write_bits(encoded, bits)?;
        }
        (PropCodec::VarUInt, PropValue::VarUInt(v)) => writer.write_varu64(v)?,
        (PropCodec::VarSInt, PropValue::VarSInt(v)) => writer.write_vars64(v)?,
        (PropCodec::FixedPoint(fp), PropValue::FixedPoint(v)) => {
            if v < fp.min_q || v > fp.max_q {
                return Err(invalid(ValueReason::FixedPointOutOfRange {
                    min_q: fp.min_q,
                    max_q: fp.max_q,
                    value: v,
                }));
            }
            let bits = fp.bits();
            if bits > 0 {
                writer.write_bits(v.abs_diff(fp.min_q), bits)?;
            }
        }
        (codec, value) => {
            return Err(invalid(ValueReason::TypeMismatch {
                expected: codec_name(codec),
                found: value_name(value),
            }));
        }
    }
    Ok(())
}

/// Decodes one property value written by [`write_prop`] at `tick`.
pub(crate) fn read_prop(
    class: ClassId,
    prop: &FlatProp,
    tick: Tick,
    reader: &mut BitReader<'_>,
) -> CodecResult<PropValue> {
    let value = match prop.codec {
        PropCodec::Bool => PropValue::Bool(reader.read_bit()?),
        PropCodec::UInt { bits } => PropValue::UInt(reader.read_bits(bits)?),
        PropCodec::SInt { bits } => PropValue::SInt(decode_sint(bits, reader.read_bits(bits)?)),
        PropCodec::VarUInt => PropValue::VarUInt(reader.read_varu64()?),
        PropCodec::VarSInt => PropValue::VarSInt(reader.read_vars64()?),
        PropCodec::FixedPoint(fp) => {
            let bits = fp.bits();
            let offset = if bits == 0 { 0 } else { reader.read_bits(bits)? };
            let value = fp.min_q.wrapping_add(offset as i64);
            if value < fp.min_q || value > fp.max_q {
                return Err(CodecError::InvalidValue {
                    class,
                    prop: prop.index,
                    reason: ValueReason::FixedPointOutOfRange {
                        min_q: fp.min_q,
                        max_q: fp.max_q,
                        value,
                    },
                });
            }
            PropValue::FixedPoint(value)
        }
    };
    Ok(if prop.flags.tick_relative {
        shift_signed(value, i64::from(tick.raw()))
    } else {
        value
    })
}

fn shift_signed(value: PropValue, by: i64) -> PropValue {
    match value {
        PropValue::SInt(v) => PropValue::SInt(v.wrapping_add(by)),
        PropValue::VarSInt(v) => PropValue::VarSInt(v.wrapping_add(by)),
        other => other,
    }
}

fn encode_sint(bits: u8, value: i64) -> Option<u64> {
    if bits == 64 {
        return Some(value as u64);
    }
    let min = -(1i128 << (bits - 1));
    let max = (1i128 << (bits - 1)) - 1;
    let wide = i128::from(value);
    if wide < min || wide > max {
        return None;
    }
    Some((value as u64) & ((1u64 << bits) - 1))
}

fn decode_sint(bits: u8, raw: u64) -> i64 {
    if bits == 64 || bits == 0 {
        return raw as i64;
    }
    let sign_bit = 1u64 << (bits - 1);
    if raw & sign_bit == 0 {
        raw as i64
    } else {
        (raw as i64) - (1i64 << bits)
    }
}

const fn codec_name(codec: PropCodec) -> &'static str {
    match codec {
        PropCodec::Bool => "bool",
        PropCodec::UInt { .. } => "uint",
        PropCodec::SInt { .. } => "sint",
        PropCodec::VarUInt => "varuint",
        PropCodec::VarSInt => "varsint",
        PropCodec::FixedPoint(_) => "fixed-point",
    }
}

const fn value_name(value: PropValue) -> &'static str {
    match value {
        PropValue::Bool(_) => "bool",
        PropValue::UInt(_) => "uint",
        PropValue::SInt(_) => "sint",
        PropValue::VarUInt(_) => "varuint",
        PropValue::VarSInt(_) => "varsint",
        PropValue::FixedPoint(_) => "fixed-point",
    }
}

#[cfg(test)]
mod tests {
    use schema::{PropCodec, PropFlags, PropIndex};

    use super::*;

    fn prop(codec: PropCodec) -> FlatProp {
        FlatProp {
            index: PropIndex::new(0),
            name: "p".into(),
            offset: 0,
            codec,
            flags: PropFlags::default(),
        }
    }

    fn roundtrip(prop: &FlatProp, value: PropValue, tick: Tick) -> (PropValue, usize) {
        let mut buf = [0u8; 16];
        let mut writer = BitWriter::new(&mut buf);
        write_prop(ClassId::new(0), prop, value, tick, &mut writer).unwrap();
        let bits = writer.bits_written();
        let mut reader = BitReader::with_bit_len(&buf, bits);
        (read_prop(ClassId::new(0), prop, tick, &mut reader).unwrap(), bits)
    }

    #[test]
    fn fixed_width_sizes() {
        assert_eq!(roundtrip(&prop(PropCodec::bool()), PropValue::Bool(true), Tick::new(0)).1, 1);
        assert_eq!(
            roundtrip(&prop(PropCodec::uint(5)), PropValue::UInt(31), Tick::new(0)),
            (PropValue::UInt(31), 5)
        );
        assert_eq!(
            roundtrip(&prop(PropCodec::sint(6)), PropValue::SInt(-32), Tick::new(0)),
            (PropValue::SInt(-32), 6)
        );
        assert_eq!(
            roundtrip(
                &prop(PropCodec::fixed_point(-100, 200, 100)),
                PropValue::FixedPoint(-7),
                Tick::new(0)
            ),
            (PropValue::FixedPoint(-7), 9)
        );
    }

    #[test]
    fn tick_relative_encodes_difference() {
        let mut p = prop(PropCodec::sint(8));
        p.flags.tick_relative = true;
        let (value, bits) = roundtrip(&p, PropValue::SInt(1005), Tick::new(1000));
        assert_eq!(value, PropValue::SInt(1005));
        assert_eq!(bits, 8);

        let mut buf = [0u8; 4];
        let mut writer = BitWriter::new(&mut buf);
        assert!(write_prop(ClassId::new(0), &p, PropValue::SInt(1005), Tick::new(0), &mut writer).is_err());
    }

    #[test]
    fn rejects_out_of_range_and_mismatch() {
        let mut buf = [0u8; 4];
        let mut writer = BitWriter::new(&mut buf);
        let err = write_prop(
            ClassId::new(1),
            &prop(PropCodec::uint(3)),
            PropValue::UInt(8),
            Tick::new(0),
            &mut writer,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CodecError::InvalidValue {
                reason: ValueReason::UnsignedOutOfRange { bits: 3, value: 8 },
                ..
            }
        ));

        let err = write_prop(
            ClassId::new(1),
            &prop(PropCodec::bool()),
            PropValue::UInt(1),
            Tick::new(0),
            &mut writer,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CodecError::InvalidValue {
                reason: ValueReason::TypeMismatch { .. },
                ..
            }
        ));
    }

    #[test]
    fn slice_source_reads_by_index() {
        let values = vec![PropValue::Bool(true), PropValue::UInt(4)];
        let mut p = prop(PropCodec::uint(3));
        p.index = PropIndex::new(1);
        assert_eq!(values.prop_value(&p), Some(PropValue::UInt(4)));
        p.index = PropIndex::new(2);
        assert_eq!(values.prop_value(&p), None);
    }
}
