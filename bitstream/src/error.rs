//! Error types for bitstream operations.

use std::fmt;

/// Result type for bitstream operations.
pub type BitResult<T> = Result<T, BitError>;

/// Errors that can occur during bit-level encoding/decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BitError {
    /// Attempted to read past the end of the buffer.
    EndOfBuffer {
        /// Number of bits requested.
        requested: usize,
        /// Number of bits available.
        available: usize,
    },

    /// Attempted to write more bits than the working buffer can hold.
    BufferOverflow {
        /// Bit position the write would have reached.
        attempted: usize,
        /// Maximum capacity in bits.
        capacity: usize,
    },

    /// Invalid bit count for the operation.
    InvalidBitCount {
        /// The invalid bit count provided.
        bits: usize,
        /// Maximum allowed bits for this operation.
        max_bits: usize,
    },

    /// Value exceeds the range representable by the specified number of bits.
    ValueOutOfRange {
        /// The value that was out of range.
        value: u64,
        /// Number of bits available.
        bits: usize,
    },

    /// A varint ran past its maximum encoded length.
    InvalidVarint,

    /// Seek target lies beyond the written or readable range.
    SeekOutOfRange {
        /// Requested bit position.
        position: usize,
        /// Highest valid bit position.
        limit: usize,
    },

    /// A string could not be written or read as a terminated byte string.
    InvalidString,
}

impl fmt::Display for BitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndOfBuffer {
                requested,
                available,
            } => {
                write!(
                    f,
                    "attempted to read {requested} bits but only {available} bits available"
                )
            }
            Self::BufferOverflow {
                attempted,
                capacity,
            } => {
                write!(
                    f,
                    "attempted to write up to bit {attempted} but buffer capacity is {capacity} bits"
                )
            }
            Self::InvalidBitCount { bits, max_bits } => {
                write!(f, "invalid bit count {bits}, maximum allowed is {max_bits}")
            }
            Self::ValueOutOfRange { value, bits } => {
                write!(f, "value {value} cannot be represented in {bits} bits")
            }
            Self::InvalidVarint => write!(f, "varint exceeds maximum encoded length"),
            Self::SeekOutOfRange { position, limit } => {
                write!(f, "seek to bit {position} is past limit {limit}")
            }
            Self::InvalidString => write!(f, "invalid terminated string"),
        }
    }
}

impl std::error::Error for BitError {}
