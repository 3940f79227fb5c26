//! Replicated string tables for deltapack.
//!
//! A string table maps unique strings to dense indices, each with an
//! optional binary payload. Tables replicate to observers as incremental
//! updates against the observer's acknowledged tick, can keep per-entry
//! payload history so a delayed observer sees the table as of its replay
//! tick, and can feed mirror tables in the same process.
//!
//! # Features
//!
//! - Value-deduplicated inserts with never-reused indices
//! - Incremental and full-dump updates with shared-prefix string compression
//! - Tick-indexed payload history with non-destructive [`StringTable::restore_tick`]
//! - Containers with a level lifecycle, and a registry linking mirror tables
//!   by handle
//!
//! # Design Principles
//!
//! - **History is append-only** - Restoring a tick changes only the current view.
//! - **Explicit ownership** - The registry owns containers; mirrors are handles.
//! - **No hidden global state** - Everything hangs off a [`TableRegistry`] value.

mod config;
mod container;
mod entry;
mod error;
mod registry;
mod table;
mod types;
mod wire;

pub use config::{
    InsertOrigin, LockPolicy, MirrorSync, TableConfig, MAX_FIXED_PAYLOAD_BITS, MAX_PAYLOAD_BYTES,
    MAX_STRING_BYTES, MAX_TABLE_ENTRIES,
};
pub use container::{StringTableContainer, MAX_TABLES};
pub use error::{StringTableError, StringTableResult};
pub use registry::{MirrorLink, TableRegistry, MAX_MIRRORS_PER_TABLE};
pub use table::{ChangeCallback, ChangeEvent, StringTable};
pub use types::{ContainerId, StringIndex, TableHandle, TableId};
pub use wire::TableUpdate;
