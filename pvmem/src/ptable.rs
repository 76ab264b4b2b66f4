//! # Guest Translation Table
//!
//! Flat pfn-indexed view of the guest-to-machine frame table handed over
//! by the hypervisor at boot. Every slot holds the machine frame backing
//! that pfn, the identity value for frames mapped one-to-one, or
//! [`Mfn::INVALID`] for frames with no backing at all.
//!
//! The table's storage only reaches the highest pfn the domain can ever
//! own. Everything past the end is treated as identity mapped: device
//! windows and PCI holes above the table still translate sensibly, and
//! storing the invalid sentinel up there is accepted as a no-op so callers
//! can blanket-invalidate without range checks.

use argon_hal::{Mfn, Pfn};

/// Mutable borrow of the boot translation table.
pub struct FrameTable<'a> {
    slots: &'a mut [Mfn],
}

impl<'a> FrameTable<'a> {
    /// Wrap the table storage. Slot contents are taken as-is.
    pub fn new(slots: &'a mut [Mfn]) -> Self {
        Self { slots }
    }

    /// Number of pfns the storage covers.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the table has any storage at all.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Machine frame backing `pfn`.
    ///
    /// Pfns past the end of storage translate to themselves.
    pub fn translate(&self, pfn: Pfn) -> Mfn {
        match self.slots.get(pfn.as_u64() as usize) {
            Some(&mfn) => mfn,
            None => Mfn::identity(pfn),
        }
    }

    /// Store a translation, reporting whether the store took effect.
    ///
    /// Past the end of storage only the invalid sentinel is accepted;
    /// there is nothing to update there, so recording "no backing" is
    /// vacuously true while any real frame number is a hard failure the
    /// caller must treat as such.
    pub fn set(&mut self, pfn: Pfn, mfn: Mfn) -> bool {
        match self.slots.get_mut(pfn.as_u64() as usize) {
            Some(slot) => {
                *slot = mfn;
                true
            }
            None => mfn.is_invalid(),
        }
    }

    /// Identity-map every pfn in `[start, end)`, clamped to the storage.
    ///
    /// Returns how many slots were written.
    pub fn set_identity_range(&mut self, start: Pfn, end: Pfn) -> u64 {
        let len = self.slots.len() as u64;
        let first = start.as_u64();
        if first >= len || start > end {
            return 0;
        }
        let last = end.as_u64().min(len);
        for idx in first..last {
            self.slots[idx as usize] = Mfn::new(idx);
        }
        last - first
    }
}
