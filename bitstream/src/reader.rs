//! Bit-level reader with bounded operations.

use crate::error::{BitError, BitResult};

/// Maximum number of bytes a `u64` varint may occupy.
const MAX_VARINT_BYTES: usize = 10;

/// A bit-level reader for decoding packed binary data.
///
/// All read operations are bounds-checked and return errors on failure.
/// The reader never panics on malformed input.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    bit_pos: usize,
    bit_len: usize,
}

impl<'a> BitReader<'a> {
    /// Creates a new `BitReader` over every bit of `data`.
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            bit_pos: 0,
            bit_len: data.len().saturating_mul(8),
        }
    }

    /// Creates a reader limited to the first `bits` bits of `data`.
    #[must_use]
    pub fn with_bit_len(data: &'a [u8], bits: usize) -> Self {
        Self {
            data,
            bit_pos: 0,
            bit_len: bits.min(data.len().saturating_mul(8)),
        }
    }

    /// Returns the number of bits remaining to read.
    #[must_use]
    pub const fn bits_remaining(&self) -> usize {
        self.bit_len.saturating_sub(self.bit_pos)
    }

    /// Returns `true` if there are no more bits to read.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bits_remaining() == 0
    }

    /// Returns the current bit position.
    #[must_use]
    pub const fn bit_position(&self) -> usize {
        self.bit_pos
    }

    /// Moves the cursor to an absolute bit position.
    pub fn seek(&mut self, position: usize) -> BitResult<()> {
        if position > self.bit_len {
            return Err(BitError::SeekOutOfRange {
                position,
                limit: self.bit_len,
            });
        }
        self.bit_pos = position;
        Ok(())
    }

    /// Reads a single bit as a boolean.
    pub fn read_bit(&mut self) -> BitResult<bool> {
        self.ensure_bits(1)?;
        let bit = (self.data[self.bit_pos / 8] >> (7 - self.bit_pos % 8)) & 1;
        self.bit_pos += 1;
        Ok(bit == 1)
    }

    /// Reads up to 64 bits as an unsigned integer.
    pub fn read_bits(&mut self, bits: u8) -> BitResult<u64> {
        let count = usize::from(bits);
        if count > 64 {
            return Err(BitError::InvalidBitCount {
                bits: count,
                max_bits: 64,
            });
        }
        if count == 0 {
            return Ok(0);
        }
        self.ensure_bits(count)?;
        let value = load_bits(self.data, self.bit_pos, count);
        self.bit_pos += count;
        Ok(value)
    }

    /// Reads a `u32` varint written by [`BitWriter::write_varu32`](crate::BitWriter::write_varu32).
    pub fn read_varu32(&mut self) -> BitResult<u32> {
        let value = self.read_varu64()?;
        u32::try_from(value).map_err(|_| BitError::InvalidVarint)
    }

    /// Reads a `u64` varint.
    pub fn read_varu64(&mut self) -> BitResult<u64> {
        let mut result = 0u64;
        for index in 0..MAX_VARINT_BYTES {
            let byte = self.read_bits(8)?;
            let shift = index * 7;
            let low = byte & 0x7F;
            if shift == 63 && low > 1 {
                return Err(BitError::InvalidVarint);
            }
            result |= low << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(BitError::InvalidVarint)
    }

    /// Reads a zigzag-encoded signed varint.
    pub fn read_vars64(&mut self) -> BitResult<i64> {
        let raw = self.read_varu64()?;
        Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
    }

    /// Reads `len` bytes, 8 bits each, from the current bit position.
    pub fn read_bytes(&mut self, len: usize) -> BitResult<Vec<u8>> {
        self.ensure_bits(len.saturating_mul(8))?;
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(self.read_bits(8)? as u8);
        }
        Ok(out)
    }

    /// Reads a zero-terminated UTF-8 string of at most `max_len` bytes.
    pub fn read_cstr(&mut self, max_len: usize) -> BitResult<String> {
        let mut bytes = Vec::new();
        loop {
            let byte = self.read_bits(8)? as u8;
            if byte == 0 {
                break;
            }
            if bytes.len() == max_len {
                return Err(BitError::InvalidString);
            }
            bytes.push(byte);
        }
        String::from_utf8(bytes).map_err(|_| BitError::InvalidString)
    }

    fn ensure_bits(&self, bits: usize) -> BitResult<()> {
        let available = self.bits_remaining();
        if bits > available {
            return Err(BitError::EndOfBuffer {
                requested: bits,
                available,
            });
        }
        Ok(())
    }
}

/// Loads `count` (1..=64) bits MSB-first starting at bit `pos`.
///
/// Callers guarantee the range lies within `data`.
pub(crate) fn load_bits(data: &[u8], pos: usize, count: usize) -> u64 {
    let mut value = 0u64;
    let mut cursor = pos;
    let mut remaining = count;
    while remaining > 0 {
        let bit_off = cursor % 8;
        let room = 8 - bit_off;
        let take = room.min(remaining);
        let byte = data[cursor / 8];
        let chunk = (byte >> (room - take)) & (((1u16 << take) - 1) as u8);
        value = (value << take) | u64::from(chunk);
        cursor += take;
        remaining -= take;
    }
    value
}
