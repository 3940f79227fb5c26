//! Class schema registry for deltapack.
//!
//! This crate describes how entity state is laid out for replication:
//! - Property trees with scalars, fixed arrays and nested sub-tables
//! - Property codecs (bool, integers, fixed-point, varints)
//! - Flattening into stable property indices
//! - Memory offset to property index lookup
//! - Deterministic layout hashing
//!
//! # Design Principles
//!
//! - **Built once** - A [`SchemaRegistry`] is built per simulation load and shared read-only.
//! - **Explicit schemas** - No reflection on arbitrary Rust types.
//! - **Fail at build time** - Static limits are checked by [`RegistryBuilder::build`], never per tick.
//! - **Deterministic hashing** - Layout hashes are stable given the same definition.

mod class;
mod error;
mod hash;
mod prop;
mod registry;

pub use class::{ClassSchema, FlatProp, OffsetMap};
pub use error::{SchemaError, SchemaResult};
pub use hash::{class_hash, registry_hash};
pub use prop::{FixedPoint, PropCodec, PropDef, PropFlags, TableDef};
pub use registry::{RegistryBuilder, SchemaLimits, SchemaRegistry};

/// Identifies an entity class within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClassId(u16);

impl ClassId {
    #[must_use]
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }
}

/// Stable index of a flattened property within its class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PropIndex(u16);

impl PropIndex {
    #[must_use]
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }

    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}
