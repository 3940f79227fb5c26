//! Entity delta packing for deltapack.
//!
//! Turns per-tick entity state into shared, immutable [`PackedBlob`]s, one per
//! entity per tick, and serializes them for observers against whatever they
//! last acknowledged.
//!
//! # Features
//!
//! - Reuse of unchanged blobs without touching their bytes
//! - Incremental re-encode from changed memory offsets, with a full
//!   re-encode and per-property diff as fallback
//! - Optional validation that both paths agree
//! - One lazily published baseline per class, safe under concurrent first use
//! - Per-property change-frame lists, moved forward for a single consumer or
//!   copied per observer stream
//! - Parallel packing of one tick across a rayon pool
//!
//! # Design Principles
//!
//! - **Never truncate state** - Working-buffer overflow aborts the tick.
//! - **Immutable once built** - Blobs are shared by `Arc`, never patched.
//! - **Deterministic** - Packing order within a tick does not affect output.

mod baseline;
mod blob;
mod changeframe;
mod config;
mod delta;
mod encode;
mod entity;
mod error;
mod limits;
mod pack;
mod scratch;
mod snapshot;
mod stats;
mod types;
mod value;

pub use baseline::{BaselineIndex, BaselineStore};
pub use blob::{ChangedProps, PackedBlob};
pub use changeframe::ChangeFrameList;
pub use config::{PackConfig, ReplicationMode};
pub use delta::{
    calc_delta, decode_blob, read_entity_delta, read_frame_delta, write_entity_delta,
    write_frame_delta, AppliedDelta, FrameDeltaSummary, ObservedEntity, ObserverView,
};
pub use entity::{ChangedOffsets, EntityState};
pub use error::{CodecError, CodecResult, ValueReason};
pub use limits::CodecLimits;
pub use pack::PackEngine;
pub use snapshot::{FrameSnapshot, PackFailure, PackPath, SnapshotEntry};
pub use stats::PackStats;
pub use types::{EntityIndex, EntitySerial, RecipientMask, Tick};
pub use value::{PropValue, PropertySource};
