//! Per-property "last changed tick" bookkeeping.

use schema::PropIndex;

use crate::types::Tick;

/// Records, for every flattened property of a class, the tick at which its
/// encoded value last changed.
///
/// The length always equals the class's flattened property count. A list is
/// owned by exactly one [`PackedBlob`](crate::PackedBlob) at a time; it is
/// either moved forward to the next blob or deep-copied with
/// [`snapshot`](Self::snapshot), never shared mutably.
#[derive(Debug, PartialEq, Eq)]
pub struct ChangeFrameList {
    ticks: Vec<Tick>,
}

impl ChangeFrameList {
    /// A list where every property changed at `tick`.
    #[must_use]
    pub fn new(prop_count: usize, tick: Tick) -> Self {
        Self {
            ticks: vec![tick; prop_count],
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    /// Tick at which `index` last changed.
    #[must_use]
    pub fn tick_of(&self, index: PropIndex) -> Option<Tick> {
        self.ticks.get(index.as_usize()).copied()
    }

    /// Marks `changed` as modified at `tick`. Out-of-range indices are ignored.
    pub fn mark_changed(&mut self, changed: &[PropIndex], tick: Tick) {
        for index in changed {
            if let Some(slot) = self.ticks.get_mut(index.as_usize()) {
                *slot = tick;
            }
        }
    }

    /// Marks every property as modified at `tick`.
    pub fn mark_all(&mut self, tick: Tick) {
        self.ticks.fill(tick);
    }

    /// Properties whose last change happened after `tick`, in index order.
    #[must_use]
    pub fn changes_after(&self, tick: Tick) -> Vec<PropIndex> {
        self.ticks
            .iter()
            .enumerate()
            .filter(|(_, changed)| **changed > tick)
            .map(|(index, _)| PropIndex::new(index as u16))
            .collect()
    }

    /// Independent deep copy for an observer stream that reads history at
    /// its own pace.
    #[must_use]
    pub fn snapshot(&self) -> Self {
        Self {
            ticks: self.ticks.clone(),
        }
    }
}
