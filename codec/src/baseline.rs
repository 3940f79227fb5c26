//! Lazily created, once-per-class reference encodings.

use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

use schema::ClassId;

use crate::blob::PackedBlob;
use crate::error::{CodecError, CodecResult};

/// Position of a published baseline in a [`BaselineStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BaselineIndex(u32);

impl BaselineIndex {
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Default)]
struct ClassSlot {
    index: OnceLock<BaselineIndex>,
    gate: Mutex<()>,
}

/// One full-property baseline per class, created at most once.
///
/// Producers race through [`ensure`](Self::ensure); the first one to take a
/// class's gate encodes and stores the blob, and only then publishes its
/// index. Readers that observe an index always observe the finished blob.
#[derive(Debug)]
pub struct BaselineStore {
    slots: Vec<ClassSlot>,
    arena: RwLock<Vec<Arc<PackedBlob>>>,
}

impl BaselineStore {
    /// Creates an empty store for `class_count` classes.
    #[must_use]
    pub fn new(class_count: usize) -> Self {
        let mut slots = Vec::with_capacity(class_count);
        slots.resize_with(class_count, ClassSlot::default);
        Self {
            slots,
            arena: RwLock::new(Vec::new()),
        }
    }

    /// Returns the baseline index for `class`, running `encode` to create it
    /// if no producer has done so yet.
    ///
    /// `encode` runs at most once per class across all threads. If it fails
    /// nothing is published and a later call may try again.
    pub fn ensure<F>(&self, class: ClassId, encode: F) -> CodecResult<BaselineIndex>
    where
        F: FnOnce() -> CodecResult<PackedBlob>,
    {
        let slot = self
            .slots
            .get(usize::from(class.get()))
            .ok_or(CodecError::UnknownClass { class })?;
        if let Some(index) = slot.index.get() {
            return Ok(*index);
        }

        let _gate = slot.gate.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(index) = slot.index.get() {
            return Ok(*index);
        }

        let blob = encode()?;
        if blob.class().id() != class {
            return Err(CodecError::ClassMismatch {
                expected: class,
                found: blob.class().id(),
            });
        }
        let index = {
            let mut arena = self.arena.write().unwrap_or_else(PoisonError::into_inner);
            let index = BaselineIndex(arena.len() as u32);
            arena.push(Arc::new(blob));
            index
        };
        // The gate is held, so nobody else can have set the slot.
        let _ = slot.index.set(index);
        tracing::debug!(
            target: "deltapack::baseline",
            class = class.get(),
            index = index.raw(),
            "baseline.created"
        );
        Ok(index)
    }

    /// Published baseline at `index`.
    #[must_use]
    pub fn get(&self, index: BaselineIndex) -> Option<Arc<PackedBlob>> {
        self.arena
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index.0 as usize)
            .cloned()
    }

    /// Index of `class`'s baseline, if published.
    #[must_use]
    pub fn index_for(&self, class: ClassId) -> Option<BaselineIndex> {
        self.slots
            .get(usize::from(class.get()))
            .and_then(|slot| slot.index.get().copied())
    }

    /// Baseline blob for `class`, if published.
    #[must_use]
    pub fn for_class(&self, class: ClassId) -> Option<Arc<PackedBlob>> {
        self.index_for(class).and_then(|index| self.get(index))
    }

    /// Number of published baselines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.arena.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All published baselines in publication order.
    #[must_use]
    pub fn iter(&self) -> Vec<(BaselineIndex, Arc<PackedBlob>)> {
        self.arena
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .enumerate()
            .map(|(i, blob)| (BaselineIndex(i as u32), Arc::clone(blob)))
            .collect()
    }

    /// Drops every baseline, e.g. between loads.
    pub fn clear(&mut self) {
        let class_count = self.slots.len();
        self.slots.clear();
        self.slots.resize_with(class_count, ClassSlot::default);
        self.arena
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
