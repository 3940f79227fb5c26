//! Per-table configuration.

use crate::error::{StringTableError, StringTableResult};

/// Largest variable-length payload: the update format carries a 14-bit length.
pub const MAX_PAYLOAD_BYTES: usize = (1 << 14) - 1;

/// Largest fixed-size payload, in bits.
pub const MAX_FIXED_PAYLOAD_BITS: u16 = 4096;

/// Longest string accepted by a table or an update parser, in bytes.
pub const MAX_STRING_BYTES: usize = 1024;

/// Largest table capacity.
pub const MAX_TABLE_ENTRIES: u32 = 1 << 16;

/// How a locked table treats inserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LockPolicy {
    /// Inserts while locked are logged and accepted.
    #[default]
    Advisory,
    /// Inserts while locked fail with [`StringTableError::Locked`].
    Strict,
}

/// Who is asking for an insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOrigin {
    Server,
    Client,
}

/// How writes reach a table's mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MirrorSync {
    /// Every write through the registry is applied to the mirror at once.
    #[default]
    Immediate,
    /// Mirrors catch up when [`TableRegistry::reconcile_mirrors`](crate::TableRegistry::reconcile_mirrors) runs.
    Periodic,
}

/// Configuration for a single string table.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TableConfig {
    /// Maximum number of entries. Must be a power of two.
    pub max_entries: u32,
    /// Keep per-entry payload history for [`restore_tick`](crate::StringTable::restore_tick).
    pub history: bool,
    pub lock_policy: LockPolicy,
    /// Accept [`InsertOrigin::Client`] inserts.
    pub allow_client_inserts: bool,
    /// Every payload is exactly this many bits, sent without a length prefix.
    pub fixed_payload_bits: Option<u16>,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            max_entries: 1024,
            history: false,
            lock_policy: LockPolicy::Advisory,
            allow_client_inserts: false,
            fixed_payload_bits: None,
        }
    }
}

impl TableConfig {
    /// Small strict table for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            max_entries: 16,
            lock_policy: LockPolicy::Strict,
            ..Self::default()
        }
    }

    /// Number of bits needed to send an entry index.
    #[must_use]
    pub const fn entry_bits(&self) -> u8 {
        if self.max_entries <= 1 {
            1
        } else {
            self.max_entries.trailing_zeros() as u8
        }
    }

    /// Byte length of a payload, if payloads are fixed-size.
    #[must_use]
    pub fn fixed_payload_bytes(&self) -> Option<usize> {
        self.fixed_payload_bits
            .map(|bits| usize::from(bits).div_ceil(8))
    }

    /// Checks capacity and payload settings.
    ///
    /// # Errors
    ///
    /// Returns [`StringTableError::InvalidCapacity`] if `max_entries` is not
    /// a power of two up to [`MAX_TABLE_ENTRIES`], and
    /// [`StringTableError::PayloadSize`] for an out-of-range fixed size.
    pub fn validate(&self, name: &str) -> StringTableResult<()> {
        if !self.max_entries.is_power_of_two() || self.max_entries > MAX_TABLE_ENTRIES {
            return Err(StringTableError::InvalidCapacity {
                capacity: self.max_entries,
            });
        }
        if let Some(bits) = self.fixed_payload_bits {
            if bits == 0 || bits > MAX_FIXED_PAYLOAD_BITS {
                return Err(StringTableError::PayloadSize {
                    table: name.to_string(),
                    max_bytes: usize::from(MAX_FIXED_PAYLOAD_BITS) / 8,
                    actual_bytes: usize::from(bits).div_ceil(8),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_bits_follow_capacity() {
        let mut config = TableConfig::default();
        assert_eq!(config.entry_bits(), 10);
        config.max_entries = 1;
        assert_eq!(config.entry_bits(), 1);
        config.max_entries = 1 << 16;
        assert_eq!(config.entry_bits(), 16);
    }

    #[test]
    fn capacity_must_be_power_of_two() {
        let config = TableConfig {
            max_entries: 100,
            ..TableConfig::default()
        };
        assert_eq!(
            config.validate("t"),
            Err(StringTableError::InvalidCapacity { capacity: 100 })
        );
        assert!(TableConfig::for_testing().validate("t").is_ok());
    }

    #[test]
    fn fixed_payload_bits_are_bounded() {
        let config = TableConfig {
            fixed_payload_bits: Some(0),
            ..TableConfig::default()
        };
        assert!(config.validate("t").is_err());
        let config = TableConfig {
            fixed_payload_bits: Some(12),
            ..TableConfig::default()
        };
        assert!(config.validate("t").is_ok());
        assert_eq!(config.fixed_payload_bytes(), Some(2));
    }
}
