//! Deterministic schema hashing.

use blake3::Hasher;

use crate::{ClassSchema, FixedPoint, FlatProp, PropCodec};

/// Hashes one class's flattened layout.
///
/// Names, offsets, codecs and flags all participate, so any change that
/// alters the offset map or encoded layout changes the hash.
#[must_use]
pub fn class_hash(name: &str, props: &[FlatProp]) -> u64 {
    let mut hasher = Hasher::new();
    write_str(&mut hasher, name);
    write_u32(&mut hasher, props.len() as u32);
    for prop in props {
        write_u16(&mut hasher, prop.index.get());
        write_str(&mut hasher, &prop.name);
        write_u32(&mut hasher, prop.offset);
        write_codec(&mut hasher, prop.codec);
        write_u8(&mut hasher, u8::from(prop.flags.tick_relative));
    }
    finish(&hasher)
}

/// Hashes a whole registry as the ordered list of class hashes.
#[must_use]
pub fn registry_hash<'a>(classes: impl IntoIterator<Item = &'a ClassSchema>) -> u64 {
    let mut hasher = Hasher::new();
    for class in classes {
        write_u16(&mut hasher, class.id().get());
        hasher.update(&class.hash().to_le_bytes());
    }
    finish(&hasher)
}

fn finish(hasher: &Hasher) -> u64 {
    let hash = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

fn write_codec(hasher: &mut Hasher, codec: PropCodec) {
    match codec {
        PropCodec::Bool => write_u8(hasher, 0),
        PropCodec::UInt { bits } => {
            write_u8(hasher, 1);
            write_u8(hasher, bits);
        }
        PropCodec::SInt { bits } => {
            write_u8(hasher, 2);
            write_u8(hasher, bits);
        }
        PropCodec::VarUInt => write_u8(hasher, 3),
        PropCodec::VarSInt => write_u8(hasher, 4),
        PropCodec::FixedPoint(fp) => {
            write_u8(hasher, 5);
            write_fixed_point(hasher, fp);
        }
    }
}

fn write_fixed_point(hasher: &mut Hasher, fp: FixedPoint) {
    write_i64(hasher, fp.min_q);
    write_i64(hasher, fp.max_q);
    write_u32(hasher, fp.scale);
}

fn write_str(hasher: &mut Hasher, value: &str) {
    write_u32(hasher, value.len() as u32);
    hasher.update(value.as_bytes());
}

fn write_u8(hasher: &mut Hasher, value: u8) {
    hasher.update(&[value]);
}

fn write_u16(hasher: &mut Hasher, value: u16) {
    hasher.update(&value.to_le_bytes());
}

fn write_u32(hasher: &mut Hasher, value: u32) {
    hasher.update(&value.to_le_bytes());
}

fn write_i64(hasher: &mut Hasher, value: i64) {
    hasher.update(&value.to_le_bytes());
}
