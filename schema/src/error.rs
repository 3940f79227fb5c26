//! Schema build and validation errors.

use std::fmt;

/// Result type for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors that can occur when building a [`SchemaRegistry`](crate::SchemaRegistry).
///
/// All of these are detected once, at build time; a registry that builds
/// successfully never produces them later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// More classes were registered than the limits allow.
    TooManyClasses { count: usize, max: usize },

    /// A class flattens to more properties than the limits allow.
    TooManyProps {
        class: String,
        count: usize,
        max: usize,
    },

    /// Sub-table nesting exceeds the configured depth.
    NestingTooDeep { class: String, max: usize },

    /// Two classes share a name.
    DuplicateClassName { name: String },

    /// Two flattened properties of one class share a path.
    DuplicatePropName { class: String, prop: String },

    /// A class has no properties after flattening.
    EmptyClass { name: String },

    /// An array property declares zero elements.
    EmptyArray { class: String, prop: String },

    /// Invalid bit width for fixed-width integers.
    InvalidBitWidth { prop: String, bits: u8 },

    /// Fixed-point scale must be non-zero.
    InvalidFixedPointScale { prop: String, scale: u32 },

    /// Fixed-point min/max range is invalid.
    InvalidFixedPointRange { prop: String, min_q: i64, max_q: i64 },

    /// Tick-relative encoding requires a signed codec.
    TickRelativeUnsigned { prop: String },
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooManyClasses { count, max } => {
                write!(f, "{count} classes registered, limit is {max}")
            }
            Self::TooManyProps { class, count, max } => {
                write!(f, "class {class} has {count} properties, limit is {max}")
            }
            Self::NestingTooDeep { class, max } => {
                write!(f, "class {class} nests sub-tables deeper than {max}")
            }
            Self::DuplicateClassName { name } => write!(f, "duplicate class name {name}"),
            Self::DuplicatePropName { class, prop } => {
                write!(f, "class {class} has duplicate property {prop}")
            }
            Self::EmptyClass { name } => write!(f, "class {name} has no properties"),
            Self::EmptyArray { class, prop } => {
                write!(f, "array {prop} in class {class} has no elements")
            }
            Self::InvalidBitWidth { prop, bits } => {
                write!(f, "property {prop} has invalid bit width {bits}")
            }
            Self::InvalidFixedPointScale { prop, scale } => {
                write!(f, "property {prop} has invalid fixed-point scale {scale}")
            }
            Self::InvalidFixedPointRange { prop, min_q, max_q } => {
                write!(
                    f,
                    "property {prop} has invalid fixed-point range {min_q}..={max_q}"
                )
            }
            Self::TickRelativeUnsigned { prop } => {
                write!(f, "tick-relative property {prop} must use a signed codec")
            }
        }
    }
}

impl std::error::Error for SchemaError {}
