//! Slot-strided shared arrays.
//!
//! A `SharedRegion` is one flat array split into equal per-slot regions.
//! Nothing here synchronizes: who may touch a slot's region is decided by
//! the slot's flag (see `ring`).

use core::cell::UnsafeCell;
use core::ops::Range;

pub(crate) struct SharedRegion<T> {
    cells: Box<[UnsafeCell<T>]>,
    stride: usize,
}

// Access to each slot region is serialized by the ring's flag protocol.
unsafe impl<T: Send> Sync for SharedRegion<T> {}

impl<T: Copy> SharedRegion<T> {
    pub fn new(slots: usize, stride: usize, fill: T) -> Self {
        let cells = (0..slots * stride).map(|_| UnsafeCell::new(fill)).collect();
        Self { cells, stride }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    fn range(&self, slot: usize) -> Range<usize> {
        let start = slot * self.stride;
        start..start + self.stride
    }

    /// Read view of one slot's region.
    ///
    /// # Safety
    /// No other thread may write this slot's region for the lifetime of the
    /// returned slice.
    pub unsafe fn slot(&self, slot: usize) -> &[T] {
        let cells = &self.cells[self.range(slot)];
        // UnsafeCell<T> is repr(transparent) over T.
        unsafe { core::slice::from_raw_parts(UnsafeCell::raw_get(cells.as_ptr()), cells.len()) }
    }

    /// Write view of one slot's region.
    ///
    /// # Safety
    /// The caller must be the slot's single writer (submitter while `Empty`,
    /// claiming worker while `Claimed`) and hold no other view of it.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn slot_mut(&self, slot: usize) -> &mut [T] {
        let cells = &self.cells[self.range(slot)];
        unsafe {
            core::slice::from_raw_parts_mut(UnsafeCell::raw_get(cells.as_ptr()), cells.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_regions_are_disjoint() {
        let region = SharedRegion::new(3, 4, 0.0f32);
        assert_eq!(region.len(), 12);

        unsafe {
            region.slot_mut(1).copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
            assert_eq!(region.slot(0), &[0.0; 4]);
            assert_eq!(region.slot(1), &[1.0, 2.0, 3.0, 4.0]);
            assert_eq!(region.slot(2), &[0.0; 4]);
        }
    }
}
