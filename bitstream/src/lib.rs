//! Low-level bit packing primitives for deltapack.
//!
//! This crate provides [`BitWriter`] and [`BitReader`] for bit-level encoding and decoding,
//! plus [`bit_ranges_equal`] for comparing encoded property ranges between two buffers.
//!
//! # Design Principles
//!
//! - **No unsafe code** - Safety is paramount.
//! - **Bounded operations** - The writer works over a caller-provided buffer of known
//!   maximum size; running out of room is an error, never a silent truncation.
//! - **No domain knowledge** - This crate knows nothing about entities, classes, or tables.
//! - **Explicit errors** - All failures return structured errors, never panic.
//!
//! # Example
//!
//! ```
//! use bitstream::{BitReader, BitWriter};
//!
//! let mut buf = [0u8; 8];
//! let mut writer = BitWriter::new(&mut buf);
//! writer.write_bit(true).unwrap();
//! writer.write_bits(42, 7).unwrap();
//! let len = writer.finish();
//!
//! let mut reader = BitReader::new(&buf[..len]);
//! assert!(reader.read_bit().unwrap());
//! assert_eq!(reader.read_bits(7).unwrap(), 42);
//! ```

mod compare;
mod error;
mod reader;
mod writer;

pub use compare::bit_ranges_equal;
pub use error::{BitError, BitResult};
pub use reader::BitReader;
pub use writer::BitWriter;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_roundtrip() {
        let mut buf = [0u8; 32];
        let mut writer = BitWriter::new(&mut buf);
        writer.write_bit(true).unwrap();
        writer.write_bits(0b1010, 4).unwrap();
        writer.write_varu32(300).unwrap();
        writer.write_vars64(-17).unwrap();
        writer.write_cstr("ab").unwrap();
        writer.write_bits(42, 7).unwrap();
        let len = writer.finish();

        let mut reader = BitReader::new(&buf[..len]);
        assert!(reader.read_bit().unwrap());
        assert_eq!(reader.read_bits(4).unwrap(), 0b1010);
        assert_eq!(reader.read_varu32().unwrap(), 300);
        assert_eq!(reader.read_vars64().unwrap(), -17);
        assert_eq!(reader.read_cstr(8).unwrap(), "ab");
        assert_eq!(reader.read_bits(7).unwrap(), 42);
    }

    #[test]
    fn empty_roundtrip() {
        let mut buf = [0u8; 0];
        let writer = BitWriter::new(&mut buf);
        assert_eq!(writer.finish(), 0);
        assert!(BitReader::new(&buf).is_empty());
    }
}
