//! Property codecs and the unflattened property tree.

use std::sync::Arc;

/// Fixed-point quantization parameters (all integer-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FixedPoint {
    /// Minimum quantized value.
    pub min_q: i64,
    /// Maximum quantized value.
    pub max_q: i64,
    /// Units per 1.0 (e.g., 100 => 0.01 resolution).
    pub scale: u32,
}

impl FixedPoint {
    /// Creates a fixed-point configuration from quantized bounds and scale.
    #[must_use]
    pub const fn new(min_q: i64, max_q: i64, scale: u32) -> Self {
        Self {
            min_q,
            max_q,
            scale,
        }
    }

    /// Number of bits needed to encode any value in `min_q..=max_q`.
    #[must_use]
    pub const fn bits(&self) -> u8 {
        let range = self.max_q.abs_diff(self.min_q);
        if range == 0 {
            0
        } else {
            (64 - range.leading_zeros()) as u8
        }
    }
}

/// The encoding used for a single flattened property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PropCodec {
    /// Boolean (1 bit).
    Bool,

    /// Unsigned integer with fixed bit width.
    UInt { bits: u8 },

    /// Signed integer with fixed bit width (two's complement).
    SInt { bits: u8 },

    /// Variable-length unsigned integer.
    VarUInt,

    /// Variable-length signed integer (zigzag encoded).
    VarSInt,

    /// Fixed-point number with quantization.
    FixedPoint(FixedPoint),
}

impl PropCodec {
    #[must_use]
    pub const fn bool() -> Self {
        Self::Bool
    }

    #[must_use]
    pub const fn uint(bits: u8) -> Self {
        Self::UInt { bits }
    }

    #[must_use]
    pub const fn sint(bits: u8) -> Self {
        Self::SInt { bits }
    }

    #[must_use]
    pub const fn var_uint() -> Self {
        Self::VarUInt
    }

    #[must_use]
    pub const fn var_sint() -> Self {
        Self::VarSInt
    }

    #[must_use]
    pub const fn fixed_point(min_q: i64, max_q: i64, scale: u32) -> Self {
        Self::FixedPoint(FixedPoint::new(min_q, max_q, scale))
    }

    /// Returns `true` for codecs whose encoded size depends on the value.
    #[must_use]
    pub const fn is_variable_size(&self) -> bool {
        matches!(self, Self::VarUInt | Self::VarSInt)
    }

    /// Returns `true` for codecs carrying a signed value.
    #[must_use]
    pub const fn is_signed(&self) -> bool {
        matches!(self, Self::SInt { .. } | Self::VarSInt)
    }
}

/// Per-property flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PropFlags {
    /// The value is encoded relative to the pack tick, so its bytes are
    /// expected to vary from tick to tick even when the value does not.
    pub tick_relative: bool,
}

/// One node of a class's property tree, before flattening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropDef {
    /// A single value at `offset`.
    Scalar {
        name: String,
        offset: u32,
        codec: PropCodec,
        flags: PropFlags,
    },
    /// `count` values of the same codec, `stride` bytes apart.
    Array {
        name: String,
        offset: u32,
        stride: u32,
        count: u16,
        codec: PropCodec,
        flags: PropFlags,
    },
    /// A nested sub-table whose offsets are relative to `offset`.
    Table {
        name: String,
        offset: u32,
        table: Arc<TableDef>,
    },
}

impl PropDef {
    #[must_use]
    pub fn scalar(name: impl Into<String>, offset: u32, codec: PropCodec) -> Self {
        Self::Scalar {
            name: name.into(),
            offset,
            codec,
            flags: PropFlags::default(),
        }
    }

    #[must_use]
    pub fn array(
        name: impl Into<String>,
        offset: u32,
        stride: u32,
        count: u16,
        codec: PropCodec,
    ) -> Self {
        Self::Array {
            name: name.into(),
            offset,
            stride,
            count,
            codec,
            flags: PropFlags::default(),
        }
    }

    #[must_use]
    pub fn table(name: impl Into<String>, offset: u32, table: Arc<TableDef>) -> Self {
        Self::Table {
            name: name.into(),
            offset,
            table,
        }
    }

    /// Marks a scalar or array property as tick-relative. No-op for tables.
    #[must_use]
    pub fn tick_relative(mut self) -> Self {
        match &mut self {
            Self::Scalar { flags, .. } | Self::Array { flags, .. } => flags.tick_relative = true,
            Self::Table { .. } => {}
        }
        self
    }

    /// The property's own name (not the flattened path).
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Scalar { name, .. } | Self::Array { name, .. } | Self::Table { name, .. } => name,
        }
    }
}

/// A named, ordered list of properties. Used both as a class's root table
/// and as a sub-schema embedded through [`PropDef::Table`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    pub props: Vec<PropDef>,
}

impl TableDef {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            props: Vec::new(),
        }
    }

    /// Appends a property.
    #[must_use]
    pub fn prop(mut self, prop: PropDef) -> Self {
        self.props.push(prop);
        self
    }
}
