//! # Bounded Region Table
//!
//! Fixed-capacity table of typed physical regions with the canonicalizing
//! [`normalize`](RegionTable::normalize) pass. The table is deliberately
//! dumb storage: callers append regions in any order, possibly overlapping,
//! and normalization resolves the mess the same way firmware map sanitizers
//! do, with the higher wire code winning wherever kinds disagree.

use arrayvec::ArrayVec;
use core::fmt;

use argon_hal::{PhysAddr, PhysRange};

use crate::{Region, RegionKind};

/// Capacity of a [`RegionTable`].
pub const MAX_REGIONS: usize = 128;

/// Error raised when a bounded map structure runs out of slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// No free slot left in the table
    Full,
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapError::Full => write!(f, "region table full"),
        }
    }
}

/// Bounded table of typed physical regions.
#[derive(Debug, Clone, Default)]
pub struct RegionTable {
    entries: ArrayVec<Region, MAX_REGIONS>,
}

impl RegionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            entries: ArrayVec::new(),
        }
    }

    /// Number of regions in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no regions.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a region.
    pub fn push(&mut self, region: Region) -> Result<(), MapError> {
        self.entries.try_push(region).map_err(|_| MapError::Full)
    }

    /// Append a region built from its parts.
    pub fn add(&mut self, start: PhysAddr, size: u64, kind: RegionKind) -> Result<(), MapError> {
        self.push(Region::new(start, size, kind))
    }

    /// Iterate the regions in table order.
    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.entries.iter()
    }

    /// Iterate only the usable RAM regions.
    pub fn ram(&self) -> impl Iterator<Item = &Region> {
        self.entries.iter().filter(|r| r.kind.is_ram())
    }

    /// The regions as a slice.
    pub fn entries(&self) -> &[Region] {
        &self.entries
    }

    /// The regions as a mutable slice.
    pub fn entries_mut(&mut self) -> &mut [Region] {
        &mut self.entries
    }

    /// Bring the table into canonical form: sorted by start, free of
    /// overlaps, empty regions dropped, adjacent same-kind regions merged.
    ///
    /// Where regions of different kinds overlap, the kind with the higher
    /// wire code claims the intersection, so reserving over RAM carves the
    /// RAM and adding RAM under a reservation changes nothing.
    pub fn normalize(&mut self) -> Result<(), MapError> {
        let mut points: ArrayVec<u64, { 2 * MAX_REGIONS }> = ArrayVec::new();
        for region in &self.entries {
            if region.size == 0 {
                continue;
            }
            points.push(region.start.as_u64());
            points.push(region.end().as_u64());
        }
        points.sort_unstable();

        // Between consecutive boundary points the winning kind is constant,
        // so each such interval becomes at most one output region.
        let mut out: ArrayVec<Region, MAX_REGIONS> = ArrayVec::new();
        for pair in points.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            if lo == hi {
                continue;
            }
            let winner = self
                .entries
                .iter()
                .filter(|r| r.size != 0 && r.start.as_u64() <= lo && r.end().as_u64() >= hi)
                .map(|r| r.kind.as_raw())
                .max();
            let code = match winner {
                Some(code) => code,
                None => continue,
            };
            let kind = RegionKind::from_raw(code);
            match out.last_mut() {
                Some(prev) if prev.kind == kind && prev.end().as_u64() == lo => {
                    prev.size += hi - lo;
                }
                _ => {
                    out.try_push(Region::new(PhysAddr::new(lo), hi - lo, kind))
                        .map_err(|_| MapError::Full)?;
                }
            }
        }

        self.entries = out;
        Ok(())
    }

    /// Whether a single RAM region covers the whole of `extent`.
    ///
    /// Empty extents are trivially covered. Anything straddling a region
    /// boundary is not, even if both sides are RAM in a non-normalized
    /// table.
    pub fn covers_ram(&self, extent: PhysRange) -> bool {
        if extent.is_empty() {
            return true;
        }
        self.entries
            .iter()
            .any(|r| r.kind.is_ram() && r.start <= extent.start && r.end() >= extent.end())
    }

    /// Log the table, one region per line.
    pub fn log(&self, who: &str) {
        for region in &self.entries {
            log::info!(
                "{}: [mem {:#018x}-{:#018x}] {}",
                who,
                region.start,
                PhysAddr::new(region.end().as_u64().wrapping_sub(1)),
                region.kind
            );
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
