//! # Argon OS Physical Region Map
//!
//! Boot-time description of physical memory as a bounded table of typed
//! regions, in the classic firmware map shape: address, length, usage kind.
//! Everything here runs before any allocator exists, so the table and the
//! reservation set are fixed-capacity and live wherever the caller puts
//! them, usually on the boot stack.
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ RegionTable                                 │
//! │   [mem 0x0000000000-0x000009fbff] usable    │
//! │   [mem 0x000009fc00-0x00000fffff] reserved  │
//! │   [mem 0x0000100000-0x003fffffff] usable    │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! [`RegionTable::normalize`] brings a table into canonical form: sorted,
//! non-overlapping, adjacent same-kind regions merged. [`ReservedRanges`]
//! tracks byte ranges handed out to early consumers so free-area searches
//! can step around them.

#![no_std]

use core::fmt;

use argon_hal::{PhysAddr, PhysRange, RawMapEntry};

pub mod reserved;
pub mod table;

pub use crate::reserved::{ReservedRanges, MAX_RESERVED};
pub use crate::table::{MapError, RegionTable, MAX_REGIONS};

// =============================================================================
// REGION KIND
// =============================================================================

/// Usage kind of a physical region, with its raw wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum RegionKind {
    /// Usable RAM
    Ram = 1,
    /// Firmware or hypervisor reserved
    Reserved = 2,
    /// ACPI tables, reclaimable after parsing
    Acpi = 3,
    /// ACPI non-volatile storage
    Nvs = 4,
    /// Defective or otherwise unusable
    Unusable = 5,
}

impl RegionKind {
    /// Decode a raw wire code. Unknown codes decode to [`Reserved`],
    /// which is the safe reading for anything this table cannot name.
    ///
    /// [`Reserved`]: RegionKind::Reserved
    pub fn from_raw(code: u32) -> Self {
        match code {
            1 => RegionKind::Ram,
            2 => RegionKind::Reserved,
            3 => RegionKind::Acpi,
            4 => RegionKind::Nvs,
            5 => RegionKind::Unusable,
            _ => RegionKind::Reserved,
        }
    }

    /// Raw wire code for this kind.
    pub const fn as_raw(self) -> u32 {
        self as u32
    }

    /// Human-readable name, in firmware map vocabulary.
    pub const fn as_str(self) -> &'static str {
        match self {
            RegionKind::Ram => "usable",
            RegionKind::Reserved => "reserved",
            RegionKind::Acpi => "ACPI data",
            RegionKind::Nvs => "ACPI NVS",
            RegionKind::Unusable => "unusable",
        }
    }

    /// Whether this kind is usable RAM.
    pub const fn is_ram(self) -> bool {
        matches!(self, RegionKind::Ram)
    }
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// REGION
// =============================================================================

/// One typed region of physical memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// First byte of the region
    pub start: PhysAddr,
    /// Length in bytes
    pub size: u64,
    /// Usage kind
    pub kind: RegionKind,
}

impl Region {
    /// Create a region.
    pub const fn new(start: PhysAddr, size: u64, kind: RegionKind) -> Self {
        Self { start, size, kind }
    }

    /// Decode a raw fetch-buffer entry.
    pub fn from_raw(raw: &RawMapEntry) -> Self {
        Self {
            start: PhysAddr::new(raw.addr),
            size: raw.size,
            kind: RegionKind::from_raw(raw.kind),
        }
    }

    /// One byte past the end of the region.
    #[inline]
    pub const fn end(&self) -> PhysAddr {
        PhysAddr::new(self.start.as_u64() + self.size)
    }

    /// The region's byte extent.
    #[inline]
    pub const fn extent(&self) -> PhysRange {
        PhysRange::new(self.start, self.size)
    }

    /// Whether `addr` falls inside the region.
    pub fn contains(&self, addr: PhysAddr) -> bool {
        addr >= self.start && addr < self.end()
    }

    /// Whether the region intersects `[start, start + size)`.
    pub fn overlaps(&self, start: PhysAddr, size: u64) -> bool {
        self.start.as_u64() < start.as_u64() + size && self.end() > start
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.extent(), self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_codes_round_trip() {
        for kind in [
            RegionKind::Ram,
            RegionKind::Reserved,
            RegionKind::Acpi,
            RegionKind::Nvs,
            RegionKind::Unusable,
        ] {
            assert_eq!(RegionKind::from_raw(kind.as_raw()), kind);
        }
    }

    #[test]
    fn unknown_kind_reads_as_reserved() {
        assert_eq!(RegionKind::from_raw(0), RegionKind::Reserved);
        assert_eq!(RegionKind::from_raw(7), RegionKind::Reserved);
        assert_eq!(RegionKind::from_raw(0xffff_ffff), RegionKind::Reserved);
    }

    #[test]
    fn region_geometry() {
        let region = Region::new(PhysAddr::new(0x1000), 0x3000, RegionKind::Ram);
        assert_eq!(region.end(), PhysAddr::new(0x4000));
        assert!(region.contains(PhysAddr::new(0x2fff)));
        assert!(!region.contains(PhysAddr::new(0x4000)));
        assert!(region.overlaps(PhysAddr::new(0x3fff), 1));
        assert!(!region.overlaps(PhysAddr::new(0x4000), 0x1000));
    }

    #[test]
    fn raw_entry_decodes() {
        let raw = RawMapEntry {
            addr: 0x10_0000,
            size: 0x1000,
            kind: 4,
        };
        let region = Region::from_raw(&raw);
        assert_eq!(region.kind, RegionKind::Nvs);
        assert_eq!(region.start, PhysAddr::new(0x10_0000));
    }
}
