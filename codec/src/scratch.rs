//! Reusable per-worker buffers for packing.

use schema::PropIndex;

/// Working buffers for one packing worker.
///
/// `buf` is the fixed-size encode buffer; running past its end is fatal.
#[derive(Debug)]
pub struct PackScratch {
    pub(crate) buf: Vec<u8>,
    pub(crate) verify: Vec<u8>,
    pub(crate) prop_bits: Vec<u32>,
    pub(crate) verify_bits: Vec<u32>,
    marks: Vec<bool>,
    touched: Vec<PropIndex>,
}

impl PackScratch {
    /// Creates scratch space with an encode buffer of `max_packed_bytes`.
    #[must_use]
    pub fn new(max_packed_bytes: usize) -> Self {
        Self {
            buf: vec![0; max_packed_bytes],
            verify: vec![0; max_packed_bytes],
            prop_bits: Vec::new(),
            verify_bits: Vec::new(),
            marks: Vec::new(),
            touched: Vec::new(),
        }
    }

    /// Clears the candidate set for a class of `prop_count` properties.
    pub(crate) fn reset_marks(&mut self, prop_count: usize) {
        self.marks.clear();
        self.marks.resize(prop_count, false);
        self.touched.clear();
    }

    /// Adds `index` to the candidate set once.
    pub(crate) fn mark(&mut self, index: PropIndex) {
        if let Some(slot) = self.marks.get_mut(index.as_usize()) {
            if !*slot {
                *slot = true;
                self.touched.push(index);
            }
        }
    }

    /// Candidate indices in ascending order.
    pub(crate) fn take_touched(&mut self) -> Vec<PropIndex> {
        let mut touched = std::mem::take(&mut self.touched);
        touched.sort_unstable();
        touched
    }
}
