//! Bounded bit-level writer over a caller-provided buffer.

use crate::error::{BitError, BitResult};

/// A bit-level writer over a fixed-size working buffer.
///
/// Bits are written MSB-first. The writer tracks a high-water mark so that
/// callers can [`seek`](Self::seek) back and overwrite an already written bit
/// range in place. Writing past the end of the buffer returns
/// [`BitError::BufferOverflow`]; nothing is ever truncated silently.
#[derive(Debug)]
pub struct BitWriter<'a> {
    buf: &'a mut [u8],
    bit_pos: usize,
    high_water: usize,
}

impl<'a> BitWriter<'a> {
    /// Creates a writer positioned at the start of `buf`.
    #[must_use]
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            bit_pos: 0,
            high_water: 0,
        }
    }

    /// Creates a writer whose first `bits` bits are already valid content.
    ///
    /// The cursor is placed at the end of the existing content.
    ///
    /// # Errors
    ///
    /// Returns [`BitError::BufferOverflow`] if `bits` exceeds the buffer.
    pub fn with_existing(buf: &'a mut [u8], bits: usize) -> BitResult<Self> {
        let capacity = buf.len() * 8;
        if bits > capacity {
            return Err(BitError::BufferOverflow {
                attempted: bits,
                capacity,
            });
        }
        Ok(Self {
            buf,
            bit_pos: bits,
            high_water: bits,
        })
    }

    /// Capacity of the working buffer in bits.
    #[must_use]
    pub fn capacity_bits(&self) -> usize {
        self.buf.len() * 8
    }

    /// Total number of valid bits (the high-water mark).
    #[must_use]
    pub const fn bits_written(&self) -> usize {
        self.high_water
    }

    /// Current cursor position in bits.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.bit_pos
    }

    /// Moves the cursor to `position`, which must not exceed the high-water mark.
    pub fn seek(&mut self, position: usize) -> BitResult<()> {
        if position > self.high_water {
            return Err(BitError::SeekOutOfRange {
                position,
                limit: self.high_water,
            });
        }
        self.bit_pos = position;
        Ok(())
    }

    /// Writes a single bit.
    pub fn write_bit(&mut self, value: bool) -> BitResult<()> {
        self.ensure_capacity(1)?;
        let byte = &mut self.buf[self.bit_pos / 8];
        let mask = 0x80u8 >> (self.bit_pos % 8);
        if value {
            *byte |= mask;
        } else {
            *byte &= !mask;
        }
        self.advance(1);
        Ok(())
    }

    /// Writes up to 64 bits from an unsigned integer.
    ///
    /// # Errors
    ///
    /// Returns [`BitError::InvalidBitCount`] if `bits > 64`,
    /// [`BitError::ValueOutOfRange`] if `value` doesn't fit in `bits`, and
    /// [`BitError::BufferOverflow`] if the buffer is exhausted.
    pub fn write_bits(&mut self, value: u64, bits: u8) -> BitResult<()> {
        let count = usize::from(bits);
        if count > 64 {
            return Err(BitError::InvalidBitCount {
                bits: count,
                max_bits: 64,
            });
        }
        if count == 0 {
            return Ok(());
        }
        if count < 64 && value >> count != 0 {
            return Err(BitError::ValueOutOfRange { value, bits: count });
        }
        self.ensure_capacity(count)?;

        let mut remaining = count;
        while remaining > 0 {
            let byte_idx = self.bit_pos / 8;
            let bit_off = self.bit_pos % 8;
            let room = 8 - bit_off;
            let take = room.min(remaining);
            let shift = remaining - take;
            let chunk = ((value >> shift) & ((1u64 << take) - 1)) as u8;
            let mask = (((1u16 << take) - 1) as u8) << (room - take);
            let byte = &mut self.buf[byte_idx];
            *byte = (*byte & !mask) | (chunk << (room - take));
            self.advance(take);
            remaining -= take;
        }
        Ok(())
    }

    /// Writes a `u32` as 7-bit groups with a continuation bit.
    ///
    /// No byte alignment is required.
    pub fn write_varu32(&mut self, value: u32) -> BitResult<()> {
        self.write_varu64(u64::from(value))
    }

    /// Writes a `u64` as 7-bit groups with a continuation bit.
    pub fn write_varu64(&mut self, mut value: u64) -> BitResult<()> {
        loop {
            let low = value & 0x7F;
            value >>= 7;
            if value == 0 {
                return self.write_bits(low, 8);
            }
            self.write_bits(low | 0x80, 8)?;
        }
    }

    /// Writes a zigzag-encoded signed varint.
    pub fn write_vars64(&mut self, value: i64) -> BitResult<()> {
        let zigzag = ((value << 1) ^ (value >> 63)) as u64;
        self.write_varu64(zigzag)
    }

    /// Writes raw bytes, 8 bits each, at the current bit position.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> BitResult<()> {
        self.ensure_capacity(bytes.len() * 8)?;
        for &byte in bytes {
            self.write_bits(u64::from(byte), 8)?;
        }
        Ok(())
    }

    /// Writes a zero-terminated byte string.
    ///
    /// # Errors
    ///
    /// Returns [`BitError::InvalidString`] if `value` contains a NUL byte.
    pub fn write_cstr(&mut self, value: &str) -> BitResult<()> {
        if value.as_bytes().contains(&0) {
            return Err(BitError::InvalidString);
        }
        self.write_bytes(value.as_bytes())?;
        self.write_bits(0, 8)
    }

    /// Copies the bit range `start..end` of `src` to the cursor.
    pub fn write_bit_range(&mut self, src: &[u8], start: usize, end: usize) -> BitResult<()> {
        if end < start || end > src.len() * 8 {
            return Err(BitError::EndOfBuffer {
                requested: end.saturating_sub(start),
                available: (src.len() * 8).saturating_sub(start),
            });
        }
        self.ensure_capacity(end - start)?;
        let mut pos = start;
        while pos < end {
            let take = (end - pos).min(64);
            let value = crate::reader::load_bits(src, pos, take);
            self.write_bits(value, take as u8)?;
            pos += take;
        }
        Ok(())
    }

    /// Finishes writing and returns the number of bytes used.
    ///
    /// Unused trailing bits of the last byte are cleared.
    pub fn finish(self) -> usize {
        let len = self.high_water.div_ceil(8);
        let tail = self.high_water % 8;
        if tail != 0 {
            self.buf[len - 1] &= 0xFFu8 << (8 - tail);
        }
        len
    }

    fn ensure_capacity(&self, bits: usize) -> BitResult<()> {
        let capacity = self.capacity_bits();
        let end = self.bit_pos + bits;
        if end > capacity {
            return Err(BitError::BufferOverflow {
                attempted: end,
                capacity,
            });
        }
        Ok(())
    }

    fn advance(&mut self, bits: usize) {
        self.bit_pos += bits;
        self.high_water = self.high_water.max(self.bit_pos);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_writer() {
        let mut buf = [0u8; 4];
        let writer = BitWriter::new(&mut buf);
        assert_eq!(writer.bits_written(), 0);
        assert_eq!(writer.finish(), 0);
    }

    #[test]
    fn write_single_bit_true() {
        let mut buf = [0u8; 1];
        let mut writer = BitWriter::new(&mut buf);
        writer.write_bit(true).unwrap();
        assert_eq!(writer.bits_written(), 1);
        assert_eq!(writer.finish(), 1);
        assert_eq!(buf, [0b1000_0000]);
    }

    #[test]
    fn write_clears_stale_bits() {
        let mut buf = [0xFFu8; 2];
        let mut writer = BitWriter::new(&mut buf);
        writer.write_bits(0b1010, 4).unwrap();
        assert_eq!(writer.finish(), 1);
        assert_eq!(buf[0], 0b1010_0000);
    }

    #[test]
    fn write_bits_across_byte_boundary() {
        let mut buf = [0u8; 2];
        let mut writer = BitWriter::new(&mut buf);
        writer.write_bits(0b1111, 4).unwrap();
        writer.write_bits(0b1010_1010, 8).unwrap();
        assert_eq!(writer.finish(), 2);
        assert_eq!(buf, [0b1111_1010, 0b1010_0000]);
    }

    #[test]
    fn write_bits_64_bits() {
        let mut buf = [0u8; 8];
        let mut writer = BitWriter::new(&mut buf);
        writer.write_bits(u64::MAX, 64).unwrap();
        assert_eq!(writer.finish(), 8);
        assert_eq!(buf, [0xFF; 8]);
    }

    #[test]
    fn write_bits_invalid_count() {
        let mut buf = [0u8; 16];
        let mut writer = BitWriter::new(&mut buf);
        assert!(matches!(
            writer.write_bits(0, 65),
            Err(BitError::InvalidBitCount {
                bits: 65,
                max_bits: 64
            })
        ));
    }

    #[test]
    fn write_bits_value_out_of_range() {
        let mut buf = [0u8; 2];
        let mut writer = BitWriter::new(&mut buf);
        assert!(matches!(
            writer.write_bits(256, 8),
            Err(BitError::ValueOutOfRange {
                value: 256,
                bits: 8
            })
        ));
    }

    #[test]
    fn overflow_is_reported_not_truncated() {
        let mut buf = [0u8; 1];
        let mut writer = BitWriter::new(&mut buf);
        writer.write_bits(0x3F, 6).unwrap();
        let err = writer.write_bits(0x7, 3).unwrap_err();
        assert_eq!(
            err,
            BitError::BufferOverflow {
                attempted: 9,
                capacity: 8
            }
        );
        assert_eq!(writer.bits_written(), 6);
    }

    #[test]
    fn seek_and_overwrite_in_place() {
        let mut buf = [0u8; 2];
        let mut writer = BitWriter::new(&mut buf);
        writer.write_bits(0xABC, 12).unwrap();
        writer.seek(4).unwrap();
        writer.write_bits(0x0, 4).unwrap();
        assert_eq!(writer.bits_written(), 12);
        assert_eq!(writer.position(), 8);
        writer.finish();
        assert_eq!(buf, [0xA0, 0xC0]);
    }

    #[test]
    fn seek_past_high_water_fails() {
        let mut buf = [0u8; 2];
        let mut writer = BitWriter::new(&mut buf);
        writer.write_bits(1, 3).unwrap();
        assert!(matches!(
            writer.seek(4),
            Err(BitError::SeekOutOfRange {
                position: 4,
                limit: 3
            })
        ));
    }

    #[test]
    fn with_existing_keeps_content() {
        let mut buf = [0b1100_0000u8, 0];
        let mut writer = BitWriter::with_existing(&mut buf, 2).unwrap();
        writer.write_bit(true).unwrap();
        assert_eq!(writer.finish(), 1);
        assert_eq!(buf[0], 0b1110_0000);
    }

    #[test]
    fn varint_sizes() {
        let mut buf = [0u8; 16];
        let mut writer = BitWriter::new(&mut buf);
        writer.write_varu32(127).unwrap();
        assert_eq!(writer.bits_written(), 8);
        writer.write_varu32(128).unwrap();
        assert_eq!(writer.bits_written(), 24);
    }

    #[test]
    fn cstr_rejects_interior_nul() {
        let mut buf = [0u8; 16];
        let mut writer = BitWriter::new(&mut buf);
        assert_eq!(writer.write_cstr("a\0b"), Err(BitError::InvalidString));
    }

    #[test]
    fn write_bit_range_copies_unaligned() {
        let src = [0b0011_1100u8, 0b1000_0000];
        let mut buf = [0u8; 2];
        let mut writer = BitWriter::new(&mut buf);
        writer.write_bit(true).unwrap();
        writer.write_bit_range(&src, 2, 9).unwrap();
        assert_eq!(writer.bits_written(), 8);
        writer.finish();
        assert_eq!(buf[0], 0b1111_1001);
    }
}
