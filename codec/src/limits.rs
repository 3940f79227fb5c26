//! Static limits for the packing engine.

/// Limits enforced while packing.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CodecLimits {
    /// Size of the per-entity working buffer. Exceeding it is fatal for the tick.
    pub max_packed_bytes: usize,
    /// Number of entity slots; indices at or above this are rejected.
    pub max_entities: usize,
}

impl Default for CodecLimits {
    fn default() -> Self {
        Self {
            max_packed_bytes: 16 * 1024,
            max_entities: 2048,
        }
    }
}

impl CodecLimits {
    /// Creates limits suitable for testing with smaller values.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            max_packed_bytes: 256,
            max_entities: 64,
        }
    }

    /// Working buffer capacity in bits.
    #[must_use]
    pub const fn max_packed_bits(&self) -> usize {
        self.max_packed_bytes * 8
    }
}
