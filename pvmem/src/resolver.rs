//! # Region Conflict Resolver
//!
//! Fixed boot allocations (kernel image, boot info, early page tables, the
//! translation list) arrive at addresses the hypervisor chose without
//! consulting the region map. When such an allocation lands on a movable
//! non-RAM entry, the entry is swapped with the tail of a RAM donor: the
//! donor shrinks, the displaced entry reappears at the donor's old tail,
//! and the vacated range becomes RAM. Only ACPI NVS entries are movable;
//! everything else overlapping a fixed allocation is a fatal conflict.
//!
//! Each swap leaves behind a [`SwapRecord`] so the replay stage can point
//! the relocated guest pfns back at the machine frames that still hold the
//! entry's data.

use argon_hal::{Mfn, PhysAddr, PhysRange, PAGE_MASK, PAGE_SHIFT};
use argon_memmap::{Region, RegionKind, RegionTable, ReservedRanges};
use arrayvec::ArrayVec;

use crate::error::{SetupError, SetupResult};
use crate::ptable::FrameTable;

/// Most entry relocations a single boot can need.
pub const MAX_SWAP_RECORDS: usize = 4;

/// One relocated non-RAM range: same size, same page offset, new home.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapRecord {
    /// Page-aligned machine address the data still occupies
    pub machine_start: PhysAddr,
    /// Page-aligned guest-physical address it now answers to
    pub guest_start: PhysAddr,
    /// Whole pages moved, in bytes
    pub size: u64,
}

/// Bounded list of swap records, applied once during remap replay.
#[derive(Debug, Clone, Default)]
pub struct SwapRecords {
    records: ArrayVec<SwapRecord, MAX_SWAP_RECORDS>,
}

impl SwapRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SwapRecord> {
        self.records.iter()
    }

    /// Record a relocation from `machine_start` to `guest_start`.
    ///
    /// Both addresses must share their page offset, otherwise no per-page
    /// translation can express the move.
    pub fn push(
        &mut self,
        machine_start: PhysAddr,
        guest_start: PhysAddr,
        size: u64,
    ) -> SetupResult<()> {
        if machine_start.page_offset() != guest_start.page_offset() {
            return Err(SetupError::SwapOffsetMismatch);
        }
        self.records
            .try_push(SwapRecord {
                machine_start,
                guest_start,
                size,
            })
            .map_err(|_| SetupError::SwapTableFull)
    }

    /// Point every relocated guest pfn at the machine frame holding its
    /// data. Runs once the translation table is writable for those pfns.
    pub fn apply(&self, table: &mut FrameTable<'_>) -> SetupResult<()> {
        let mut remapped = 0u64;
        for record in &self.records {
            let end_pfn = (record.guest_start + record.size).frame_up();
            let mut pfn = record.guest_start.frame_down();
            let mut mfn = Mfn::new(record.machine_start.as_u64() >> PAGE_SHIFT);
            while pfn < end_pfn {
                if !table.set(pfn, mfn) {
                    return Err(SetupError::TranslationUpdate { pfn, mfn });
                }
                pfn += 1;
                mfn = mfn + 1;
                remapped += 1;
            }
        }
        log::info!("Remapped {} non-RAM page(s)", remapped);
        Ok(())
    }
}

/// Swap the movable entry at `idx` with the tail of a RAM donor.
///
/// The donor must be at least as large as the page-rounded entry and must
/// still end at or beyond `committed_end` after shrinking, so already
/// committed memory never loses coverage.
///
/// The vacated range reads as RAM from here on but is also reserved: its
/// frames get repointed when the swap records apply, so nothing may be
/// placed there in the meantime.
fn swap_entry_with_ram(
    map: &mut RegionTable,
    swaps: &mut SwapRecords,
    reserved: &mut ReservedRanges,
    idx: usize,
    committed_end: PhysAddr,
) -> SetupResult<()> {
    let moved = map.entries()[idx];
    let swap_addr = moved.start.align_down();
    let swap_size = (moved.end().as_u64() - swap_addr.as_u64() + PAGE_MASK) & !PAGE_MASK;

    let mut donor: Option<(usize, PhysAddr)> = None;
    for (i, entry) in map.iter().enumerate() {
        let entry_end = entry.end();
        if entry.kind.is_ram()
            && entry.size >= swap_size
            && entry_end.as_u64() - swap_size >= committed_end.as_u64()
        {
            donor = Some((i, entry_end));
            break;
        }
    }
    let (donor_idx, donor_end) = match donor {
        Some(found) => found,
        None => return Err(SetupError::NoSwapDonor),
    };

    // The donor's vacated tail is where the entry reappears, with its
    // page offset preserved.
    let landing = PhysAddr::new(donor_end.as_u64() - swap_size);
    {
        let entries = map.entries_mut();
        entries[donor_idx].size -= swap_size;
        entries[idx] = Region::new(swap_addr, swap_size, RegionKind::Ram);
    }
    map.push(Region::new(
        landing + moved.start.page_offset(),
        moved.size,
        moved.kind,
    ))?;
    swaps.push(swap_addr, landing, swap_size)?;
    reserved.reserve(swap_addr, swap_size)?;
    map.normalize()?;
    Ok(())
}

/// Move every movable entry overlapping `extent` out of the way.
///
/// The scan restarts after each swap because swapping reorders the table;
/// swapped ranges become RAM, so the restart always terminates.
pub fn resolve_conflicts(
    map: &mut RegionTable,
    swaps: &mut SwapRecords,
    reserved: &mut ReservedRanges,
    extent: PhysRange,
    committed_end: PhysAddr,
) -> SetupResult<()> {
    if extent.is_empty() {
        return Ok(());
    }

    loop {
        let mut movable: Option<usize> = None;
        for (i, entry) in map.iter().enumerate() {
            if entry.start >= extent.end() {
                break;
            }
            if entry.kind == RegionKind::Nvs && entry.overlaps(extent.start, extent.size) {
                movable = Some(i);
                break;
            }
        }
        match movable {
            Some(idx) => swap_entry_with_ram(map, swaps, reserved, idx, committed_end)?,
            None => return Ok(()),
        }
    }
}

/// Guard a fixed allocation: resolve what can be moved, then require the
/// whole extent to sit inside a single RAM entry.
pub fn ensure_usable(
    map: &mut RegionTable,
    swaps: &mut SwapRecords,
    reserved: &mut ReservedRanges,
    extent: PhysRange,
    component: &'static str,
    committed_end: PhysAddr,
) -> SetupResult<()> {
    resolve_conflicts(map, swaps, reserved, extent, committed_end)?;
    if map.covers_ram(extent) {
        Ok(())
    } else {
        Err(SetupError::NotUsable(component))
    }
}
