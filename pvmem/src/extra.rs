//! # Extra Memory Tracker
//!
//! Guest-physical ranges carved out of the region map beyond the initial
//! hypervisor allocation. These pages exist in the map so later stages can
//! populate them, but no machine frame backs them yet, so every translation
//! inside a tracked range must read as invalid until the remap replay
//! assigns real frames and drains the tracker region by region.
//!
//! Tracked ranges also stay reserved with the boot reservation service for
//! as long as they are unbacked, which keeps relocation passes from picking
//! them as copy targets.

use argon_hal::{Mfn, Pfn, PAGE_SHIFT};
use argon_memmap::ReservedRanges;
use arrayvec::ArrayVec;

use crate::error::{SetupError, SetupResult};
use crate::ptable::FrameTable;

/// Most extra regions the tracker can carry.
pub const MAX_EXTRA_REGIONS: usize = 16;

/// One claimed-but-unbacked guest-physical range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtraRegion {
    /// First pfn of the range
    pub start_pfn: Pfn,
    /// Length in pfns
    pub n_pfns: u64,
}

impl ExtraRegion {
    fn start(&self) -> u64 {
        self.start_pfn.as_u64()
    }

    fn end(&self) -> u64 {
        self.start_pfn.as_u64() + self.n_pfns
    }
}

/// Bounded set of disjoint extra regions.
#[derive(Debug, Clone, Default)]
pub struct ExtraMemory {
    regions: ArrayVec<ExtraRegion, MAX_EXTRA_REGIONS>,
}

impl ExtraMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether every tracked range has been handed real backing.
    pub fn is_drained(&self) -> bool {
        self.regions.is_empty()
    }

    /// Tracked regions, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &ExtraRegion> {
        self.regions.iter()
    }

    /// Total pfns currently tracked.
    pub fn total_pfns(&self) -> u64 {
        self.regions.iter().map(|region| region.n_pfns).sum()
    }

    /// Track `n_pfns` extra pfns starting at `start_pfn`.
    ///
    /// Extends an existing region when the new range continues it,
    /// otherwise claims a fresh slot. The range is also reserved so
    /// nothing relocates data into still-unbacked frames.
    pub fn add(
        &mut self,
        reserved: &mut ReservedRanges,
        start_pfn: Pfn,
        n_pfns: u64,
    ) -> SetupResult<()> {
        if n_pfns == 0 {
            return Ok(());
        }

        let start = start_pfn.as_u64();
        let mut extended = false;
        for region in self.regions.iter_mut() {
            if region.end() == start {
                region.n_pfns += n_pfns;
                extended = true;
                break;
            }
        }
        if !extended
            && self
                .regions
                .try_push(ExtraRegion { start_pfn, n_pfns })
                .is_err()
        {
            return Err(SetupError::ExtraTableFull);
        }

        reserved.reserve(start_pfn.base(), n_pfns << PAGE_SHIFT)?;
        Ok(())
    }

    /// Stop tracking `[start_pfn, start_pfn + n_pfns)`: those pfns now have
    /// real backing.
    ///
    /// The range may be a prefix, a suffix, or an interior slice of one
    /// tracked region; an interior slice splits the region in two. A range
    /// that matches nothing is tolerated, since the same physical span can
    /// be released twice on the fallback path.
    pub fn delete(
        &mut self,
        reserved: &mut ReservedRanges,
        start_pfn: Pfn,
        n_pfns: u64,
    ) -> SetupResult<()> {
        if n_pfns > 0 {
            let start = start_pfn.as_u64();
            let end = start + n_pfns;
            let mut tail: Option<(Pfn, u64)> = None;

            for region in self.regions.iter_mut() {
                if region.start() == start {
                    debug_assert!(n_pfns <= region.n_pfns);
                    region.start_pfn = Pfn::new(start + n_pfns);
                    region.n_pfns -= n_pfns;
                    break;
                }
                if region.end() == end {
                    debug_assert!(n_pfns <= region.n_pfns);
                    region.n_pfns -= n_pfns;
                    break;
                }
                if start > region.start() && start < region.end() {
                    debug_assert!(end <= region.end());
                    let tail_pfns = region.end() - end;
                    region.n_pfns = start - region.start();
                    tail = Some((Pfn::new(end), tail_pfns));
                    break;
                }
            }

            self.regions.retain(|region| region.n_pfns > 0);
            if let Some((tail_start, tail_pfns)) = tail {
                self.add(reserved, tail_start, tail_pfns)?;
            }
        }

        reserved.free(start_pfn.base(), n_pfns << PAGE_SHIFT)?;
        Ok(())
    }

    /// Early-boot translation for `pfn`: invalid inside a tracked region,
    /// identity everywhere else.
    pub fn translate(&self, pfn: Pfn) -> Mfn {
        let raw = pfn.as_u64();
        for region in &self.regions {
            if raw >= region.start() && raw < region.end() {
                return Mfn::INVALID;
            }
        }
        Mfn::identity(pfn)
    }

    /// Write the invalid sentinel into the table for every tracked pfn.
    ///
    /// Runs once, right before later boot stages switch to their own
    /// translation structures, so no stale identity guess survives.
    pub fn invalidate_all(&self, table: &mut FrameTable<'_>) {
        for region in &self.regions {
            for offset in 0..region.n_pfns {
                table.set(region.start_pfn + offset, Mfn::INVALID);
            }
        }
    }
}
