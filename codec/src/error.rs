//! Error types for packing and delta operations.

use std::fmt;

use schema::{ClassId, PropIndex};

use crate::types::{EntityIndex, Tick};

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while packing, diffing or decoding entity state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Bitstream error other than working-buffer exhaustion.
    Bitstream(bitstream::BitError),

    /// The encode working buffer ran out of room.
    ///
    /// Fatal for the whole tick: state is never truncated.
    EncodeOverflow { attempted_bits: usize, capacity_bits: usize },

    /// Class id is not part of the registry.
    UnknownClass { class: ClassId },

    /// The entity's property source had no value for a property.
    MissingValue { class: ClassId, prop: PropIndex },

    /// Invalid property value for the schema.
    InvalidValue {
        class: ClassId,
        prop: PropIndex,
        reason: ValueReason,
    },

    /// Entity slot index is outside the configured limits.
    EntityOutOfRange { index: EntityIndex, max: usize },

    /// The same entity slot appeared twice in one tick.
    DuplicateEntity { index: EntityIndex },

    /// Two blobs of different classes were compared.
    ClassMismatch { expected: ClassId, found: ClassId },

    /// A decoded property index does not exist in the class.
    InvalidPropIndex { class: ClassId, index: u32 },

    /// Decoded value count does not match the class.
    PropCountMismatch { expected: usize, actual: usize },

    /// A delta refers to an entity the receiver holds no state for.
    MissingReference { index: EntityIndex },

    /// Ticks must be packed in strictly increasing order.
    TickNotMonotonic { previous: Tick, current: Tick },

    /// The dedicated worker pool could not be created.
    WorkerPool { reason: String },
}

/// Details for invalid value errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueReason {
    UnsignedOutOfRange { bits: u8, value: u64 },
    SignedOutOfRange { bits: u8, value: i64 },
    FixedPointOutOfRange { min_q: i64, max_q: i64, value: i64 },
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
}

impl CodecError {
    /// Returns `true` for errors that abort the whole tick.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::EncodeOverflow { .. } | Self::WorkerPool { .. })
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bitstream(e) => write!(f, "bitstream error: {e}"),
            Self::EncodeOverflow {
                attempted_bits,
                capacity_bits,
            } => {
                write!(
                    f,
                    "encode buffer overflow: needed {attempted_bits} bits, capacity {capacity_bits}"
                )
            }
            Self::UnknownClass { class } => write!(f, "unknown class {}", class.get()),
            Self::MissingValue { class, prop } => {
                write!(
                    f,
                    "no value for property {} of class {}",
                    prop.get(),
                    class.get()
                )
            }
            Self::InvalidValue {
                class,
                prop,
                reason,
            } => {
                write!(
                    f,
                    "invalid value for class {} property {}: {reason}",
                    class.get(),
                    prop.get()
                )
            }
            Self::EntityOutOfRange { index, max } => {
                write!(f, "entity index {} exceeds limit {max}", index.raw())
            }
            Self::DuplicateEntity { index } => {
                write!(f, "entity index {} packed twice in one tick", index.raw())
            }
            Self::ClassMismatch { expected, found } => {
                write!(
                    f,
                    "class mismatch: expected {}, found {}",
                    expected.get(),
                    found.get()
                )
            }
            Self::InvalidPropIndex { class, index } => {
                write!(f, "property index {index} out of range for class {}", class.get())
            }
            Self::PropCountMismatch { expected, actual } => {
                write!(f, "expected {expected} property values, got {actual}")
            }
            Self::MissingReference { index } => {
                write!(f, "no acknowledged state for entity {}", index.raw())
            }
            Self::TickNotMonotonic { previous, current } => {
                write!(f, "tick {current} does not follow packed tick {previous}")
            }
            Self::WorkerPool { reason } => write!(f, "worker pool unavailable: {reason}"),
        }
    }
}

impl fmt::Display for ValueReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsignedOutOfRange { bits, value } => {
                write!(f, "unsigned value {value} does not fit in {bits} bits")
            }
            Self::SignedOutOfRange { bits, value } => {
                write!(f, "signed value {value} does not fit in {bits} bits")
            }
            Self::FixedPointOutOfRange {
                min_q,
                max_q,
                value,
            } => {
                write!(f, "fixed-point value {value} outside [{min_q}, {max_q}]")
            }
            Self::TypeMismatch { expected, found } => {
                write!(f, "expected {expected} but got {found}")
            }
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bitstream(e) => Some(e),
            _ => None,
        }
    }
}

impl From<bitstream::BitError> for CodecError {
    fn from(err: bitstream::BitError) -> Self {
        match err {
            bitstream::BitError::BufferOverflow {
                attempted,
                capacity,
            } => Self::EncodeOverflow {
                attempted_bits: attempted,
                capacity_bits: capacity,
            },
            other => Self::Bitstream(other),
        }
    }
}
