//! # Memory Setup Orchestration
//!
//! Builds the guest's final memory layout from the hypervisor's region
//! map, in one pass at early boot:
//!
//! 1. Parse the address-limit override from the boot command line and
//!    clamp the initial allocation.
//! 2. Fetch the working region map and guard the fixed boot allocations
//!    (kernel, boot info, early page tables) against it, swapping movable
//!    entries out of the way where possible.
//! 3. Size the guest: hypervisor reservation ceiling, pages displaced by
//!    remapping, and the extra-memory clamp.
//! 4. Carve the working map into the final table, routing RAM above the
//!    initial allocation into the extra-memory tracker.
//! 5. Run the remap planning phase over the working map's gaps.
//! 6. Relocate the translation list and the ramdisk if they sit on
//!    non-RAM ranges.
//!
//! The working map stays hypervisor-authoritative throughout; guards,
//! target searches and relocations all consult it, never the carved
//! final table. Everything that must wait for the allocator comes back
//! as a [`PendingRemap`] to be replayed later.

use argon_hal::{
    EarlyMapper, GuestFlags, HvError, Hypervisor, Pfn, PhysAddr, PhysRange, RawMapEntry,
    PAGE_SHIFT, PAGE_SIZE,
};
use argon_memmap::{Region, RegionKind, RegionTable, ReservedRanges, MAX_REGIONS};
use spin::Once;

use crate::error::{SetupError, SetupResult};
use crate::extra::ExtraMemory;
use crate::ptable::FrameTable;
use crate::remap::RemapEngine;
use crate::resolver::{ensure_usable, SwapRecords};
use crate::MemPolicy;

/// Address-space cap applied to unprivileged guests unless overridden.
const LIMIT_512GB: u64 = 512 << 30;

/// Fixed boot-time inputs the loader and hypervisor hand us.
#[derive(Debug, Clone)]
pub struct BootParams<'a> {
    pub flags: GuestFlags,
    /// Pages backing the initial allocation
    pub nr_pages: u64,
    pub cmdline: &'a str,
    /// Physical extent of the kernel image
    pub kernel: PhysRange,
    /// Boot information structure
    pub boot_info: PhysRange,
    /// Page tables the hypervisor built for early boot
    pub page_tables: PhysRange,
    /// Storage of the pfn-to-mfn translation list
    pub translation_list: PhysRange,
    /// Ramdisk image, empty when none was loaded
    pub ramdisk: PhysRange,
    /// Highest pfn with a boot-time linear mapping
    pub max_mapped_pfn: Pfn,
}

/// The finished layout, published once setup completes.
#[derive(Debug, Clone)]
pub struct MemorySetup {
    /// Platform name handed back to the generic boot path
    pub platform: &'static str,
    /// Final region table
    pub regions: RegionTable,
    /// Pages handed back to the hypervisor during planning
    pub released_pages: u64,
    /// Ramdisk location, possibly relocated
    pub ramdisk: PhysRange,
    /// Translation list storage, possibly relocated
    pub translation_list: PhysRange,
    /// Whether any reserved range was seen, hinting at PCI
    pub pci_possible: bool,
    /// One past the highest pfn the translation table must cover
    pub max_extra_pfn: Pfn,
}

/// Work deferred until the allocator exists: the planned remap chain,
/// the extra-memory tracker it drains, and the relocation swap records.
#[derive(Debug)]
pub struct PendingRemap {
    engine: RemapEngine,
    extra: ExtraMemory,
    swaps: SwapRecords,
    reserved: ReservedRanges,
}

impl PendingRemap {
    /// Replay the planned remap chain, then apply the swap records.
    ///
    /// `table` must already be backed by its final storage. Returns the
    /// number of pages remapped.
    pub fn remap_memory<H: Hypervisor, M: EarlyMapper>(
        &mut self,
        table: &mut FrameTable<'_>,
        hv: &mut H,
        mapper: &mut M,
    ) -> SetupResult<u64> {
        self.engine
            .replay(table, &mut self.extra, &mut self.reserved, &self.swaps, hv, mapper)?;
        Ok(self.engine.remapped())
    }

    pub fn released_pages(&self) -> u64 {
        self.engine.released()
    }

    pub fn remapped_pages(&self) -> u64 {
        self.engine.remapped()
    }

    /// Mark every still-tracked extra pfn invalid in the translation
    /// table. Extra ranges have no backing until something populates
    /// them, and a stale translation there would alias another frame.
    pub fn invalidate_extra(&self, table: &mut FrameTable<'_>) {
        self.extra.invalidate_all(table);
    }

    pub fn extra(&self) -> &ExtraMemory {
        &self.extra
    }
}

/// First-character boolean in the loader's dialect: `1/y/t`, `0/n/f`,
/// and `on`/`off`.
fn parse_bool(text: &str) -> Option<bool> {
    let mut bytes = text.bytes();
    match bytes.next() {
        Some(b'1') | Some(b'y') | Some(b'Y') | Some(b't') | Some(b'T') => Some(true),
        Some(b'0') | Some(b'n') | Some(b'N') | Some(b'f') | Some(b'F') => Some(false),
        Some(b'o') | Some(b'O') => match bytes.next() {
            Some(b'n') | Some(b'N') => Some(true),
            Some(b'f') | Some(b'F') => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Scan the command line for the 512 GiB limit override. A bare token
/// turns the limit on; `=value` parses as a boolean; anything
/// unparsable keeps the built-in default.
fn parse_limit_token(cmdline: &str, default: bool) -> bool {
    for token in cmdline.split_whitespace() {
        if token == "pv_512gb_limit" {
            return true;
        }
        if let Some(value) = token.strip_prefix("pv_512gb_limit=") {
            return parse_bool(value).unwrap_or(default);
        }
    }
    default
}

/// Hard page-count ceiling for this guest.
fn pages_limit(flags: GuestFlags, limit_512: bool, policy: &MemPolicy) -> u64 {
    let mut limit = policy.addr_ceiling >> PAGE_SHIFT;
    if !flags.contains(GuestFlags::INITIAL_DOMAIN) && limit_512 {
        limit = LIMIT_512GB >> PAGE_SHIFT;
    }
    limit
}

/// Page count the hypervisor will actually let us reach. Only the
/// initial domain can query its reservation; everyone else lives with
/// the static limit.
fn max_reservation_pages<H: Hypervisor>(hv: &mut H, flags: GuestFlags, limit: u64) -> u64 {
    let mut max_pages = limit;
    if flags.contains(GuestFlags::INITIAL_DOMAIN) {
        let status = hv.maximum_reservation();
        if status.raw() > 0 {
            max_pages = status.raw() as u64;
        }
    }
    max_pages.min(limit)
}

/// Fetch the hypervisor's region map and normalize it into the working
/// table.
///
/// Hypervisors predating the map call get a synthesized flat RAM map
/// sized to the initial allocation plus slack; for the initial domain
/// that fallback would misdescribe the machine and is fatal. The
/// initial domain additionally reclaims firmware-unusable entries as
/// RAM and keeps the firmware table window reserved.
pub fn fetch_region_map<H: Hypervisor>(
    hv: &mut H,
    flags: GuestFlags,
    ini_nr_pages: u64,
    policy: &MemPolicy,
) -> SetupResult<RegionTable> {
    let mut raw = [RawMapEntry::zeroed(); MAX_REGIONS];
    let privileged = flags.contains(GuestFlags::INITIAL_DOMAIN);
    let fetched = if privileged {
        hv.machine_memory_map(&mut raw)
    } else {
        hv.guest_memory_map(&mut raw)
    };

    let mut map = RegionTable::new();
    match fetched {
        Ok(0) => return Err(SetupError::EmptyMap),
        Ok(count) => {
            for entry in &raw[..count] {
                map.push(Region::from_raw(entry))?;
            }
        }
        Err(HvError::NotImplemented) if !privileged => {
            log::warn!("no memory map hypercall, synthesizing a flat map");
            map.push(Region::new(
                PhysAddr::new(0),
                (ini_nr_pages << PAGE_SHIFT) + policy.map_slack,
                RegionKind::Ram,
            ))?;
        }
        Err(HvError::NotImplemented) => return Err(SetupError::MapFallbackPrivileged),
        Err(err) => return Err(SetupError::MapFetch(err)),
    }

    if privileged {
        for entry in map.entries_mut() {
            if entry.kind == RegionKind::Unusable {
                entry.kind = RegionKind::Ram;
            }
        }
        map.push(Region::new(
            policy.firmware_window.start,
            policy.firmware_window.size,
            RegionKind::Reserved,
        ))?;
    }
    map.normalize()?;
    Ok(map)
}

/// Add a carved chunk to the final table. RAM shrinks to whole pages;
/// everything else keeps its exact bounds.
fn align_and_add_region(
    map: &mut RegionTable,
    start: PhysAddr,
    size: u64,
    kind: RegionKind,
) -> SetupResult<()> {
    if kind == RegionKind::Ram {
        let lo = start.align_up();
        let hi = (start + size).align_down();
        if hi <= lo {
            return Ok(());
        }
        map.add(lo, hi - lo, kind)?;
    } else {
        map.add(start, size, kind)?;
    }
    Ok(())
}

/// Find `size` bytes of RAM free of reservations, scanning the map in
/// order and stepping over reserved pages. The returned area is
/// reserved before it is handed out.
fn find_free_area(
    map: &RegionTable,
    reserved: &mut ReservedRanges,
    size: u64,
) -> SetupResult<Option<PhysAddr>> {
    for entry in map.iter() {
        if !entry.kind.is_ram() || entry.size < size {
            continue;
        }
        let mut start = entry.start;
        let mut addr = start;
        let mut overflowed = false;
        while addr < start + size {
            if reserved.is_reserved(addr) {
                start = addr + PAGE_SIZE;
                if start + size > entry.end() {
                    overflowed = true;
                    break;
                }
            }
            addr += PAGE_SIZE;
        }
        if !overflowed && addr >= start + size {
            reserved.reserve(start, size)?;
            return Ok(Some(start));
        }
    }
    Ok(None)
}

/// Move `range` into a free RAM area, byte for byte.
fn relocate_range<M: EarlyMapper>(
    map: &RegionTable,
    reserved: &mut ReservedRanges,
    mapper: &mut M,
    range: PhysRange,
    component: &'static str,
) -> SetupResult<PhysRange> {
    let new_start = match find_free_area(map, reserved, range.size)? {
        Some(addr) => addr,
        None => return Err(SetupError::NoFreeArea(component)),
    };
    mapper.copy_phys(new_start, range.start, range.size);
    let moved = PhysRange::new(new_start, range.size);
    log::info!("{} moved from {} to {}", component, range, moved);
    reserved.free(range.start, range.size)?;
    Ok(moved)
}

fn reserve_fixed(reserved: &mut ReservedRanges, range: PhysRange) -> SetupResult<()> {
    if !range.is_empty() {
        reserved.reserve(range.start, range.size)?;
    }
    Ok(())
}

/// Build the guest's memory layout.
///
/// `table` is the live pfn-to-mfn translation table; identity ranges
/// and release fallbacks are written to it here, while relocation
/// writes wait for [`PendingRemap::remap_memory`].
pub fn memory_setup<H: Hypervisor, M: EarlyMapper>(
    hv: &mut H,
    mapper: &mut M,
    table: &mut FrameTable<'_>,
    params: &BootParams<'_>,
    policy: &MemPolicy,
) -> SetupResult<(MemorySetup, PendingRemap)> {
    let limit_512 = parse_limit_token(params.cmdline, policy.opt_512gb_limit);
    let limit = pages_limit(params.flags, limit_512, policy);
    let ini_nr_pages = params.nr_pages.min(limit);
    let mem_end = ini_nr_pages << PAGE_SHIFT;

    let mut working = fetch_region_map(hv, params.flags, ini_nr_pages, policy)?;

    let mut reserved = ReservedRanges::new();
    reserve_fixed(&mut reserved, params.kernel)?;
    reserve_fixed(&mut reserved, params.boot_info)?;
    reserve_fixed(&mut reserved, params.page_tables)?;
    reserve_fixed(&mut reserved, params.translation_list)?;
    reserve_fixed(&mut reserved, params.ramdisk)?;

    // Failing on a conflict now beats relocating pages that hold kernel
    // text or boot data later.
    let mut swaps = SwapRecords::new();
    let committed_end = PhysAddr::new(mem_end);
    ensure_usable(
        &mut working,
        &mut swaps,
        &mut reserved,
        params.kernel,
        "kernel",
        committed_end,
    )?;
    ensure_usable(
        &mut working,
        &mut swaps,
        &mut reserved,
        params.boot_info,
        "boot info",
        committed_end,
    )?;
    ensure_usable(
        &mut working,
        &mut swaps,
        &mut reserved,
        params.page_tables,
        "page tables",
        committed_end,
    )?;

    let mut engine = RemapEngine::new(ini_nr_pages, params.max_mapped_pfn);
    let mut max_pages = max_reservation_pages(hv, params.flags, limit);
    max_pages += engine.count_remap_pages(&working);

    let mut extra_pages = max_pages.saturating_sub(ini_nr_pages);
    // Clamp the extra memory to a multiple of the base allocation; the
    // translation table has to cover all of it from the start.
    let maxmem_pages = policy.extra_ratio * ini_nr_pages.min(policy.addr_ceiling >> PAGE_SHIFT);
    extra_pages = extra_pages.min(maxmem_pages);

    let mut final_map = RegionTable::new();
    let mut extra = ExtraMemory::new();
    let mut pci_possible = false;
    let mut max_extra_pfn = Pfn::new(ini_nr_pages);

    // Carve the working map: RAM below the allocation end passes
    // through, RAM above it becomes extra memory until the clamped
    // allowance is used up, and the rest is discarded.
    let entries = working.entries();
    let mut i = 0;
    let mut addr = PhysAddr::new(0);
    let mut size = 0u64;
    if let Some(first) = entries.first() {
        addr = first.start;
        size = first.size;
    }
    while i < entries.len() {
        let kind = entries[i].kind;
        let mut chunk = size;
        let mut discard = false;

        if kind == RegionKind::Reserved {
            pci_possible = true;
        }

        if kind == RegionKind::Ram {
            if addr.as_u64() < mem_end {
                chunk = size.min(mem_end - addr.as_u64());
            } else if extra_pages > 0 {
                chunk = size.min(extra_pages << PAGE_SHIFT);
                let pfn_s = addr.frame_up();
                let n_pfns = (addr + chunk)
                    .frame_down()
                    .as_u64()
                    .saturating_sub(pfn_s.as_u64());
                extra_pages -= n_pfns;
                extra.add(&mut reserved, pfn_s, n_pfns)?;
                max_extra_pfn = Pfn::new(pfn_s.as_u64() + n_pfns);
            } else {
                discard = true;
            }
        }

        if !discard {
            align_and_add_region(&mut final_map, addr, chunk, kind)?;
        }

        addr += chunk;
        size -= chunk;
        if size == 0 {
            i += 1;
            if i < entries.len() {
                addr = entries[i].start;
                size = entries[i].size;
            }
        }
    }

    // Anything above the map stays identity; PCI BARs and the like may
    // live up there.
    table.set_identity_range(addr.frame_down(), Pfn::new(u64::MAX));

    // The legacy window is normal memory for a guest, but too many
    // things poke around in there to hand it out.
    final_map.add(
        policy.legacy_window.start,
        policy.legacy_window.size,
        RegionKind::Reserved,
    )?;
    final_map.normalize()?;

    engine.plan(&working, table, hv, mapper)?;
    log::info!("Released {} page(s)", engine.released());

    let mut translation_list = params.translation_list;
    if !translation_list.is_empty() && !working.covers_ram(translation_list) {
        translation_list = relocate_range(
            &working,
            &mut reserved,
            mapper,
            translation_list,
            "translation list",
        )?;
    }

    let mut ramdisk = params.ramdisk;
    if !ramdisk.is_empty() && !working.covers_ram(ramdisk) {
        ramdisk = relocate_range(&working, &mut reserved, mapper, ramdisk, "ramdisk")?;
    }

    let setup = MemorySetup {
        platform: "PV Guest",
        regions: final_map,
        released_pages: engine.released(),
        ramdisk,
        translation_list,
        pci_possible,
        max_extra_pfn,
    };
    let pending = PendingRemap {
        engine,
        extra,
        swaps,
        reserved,
    };
    Ok((setup, pending))
}

static LAYOUT: Once<MemorySetup> = Once::new();

/// Publish the finished layout for the rest of the boot sequence. Only
/// the first call takes effect; the layout is logged as it goes live.
pub fn publish(setup: MemorySetup) -> &'static MemorySetup {
    LAYOUT.call_once(|| {
        setup.regions.log(setup.platform);
        setup
    })
}

/// The published layout, if setup has completed.
pub fn memory_layout() -> Option<&'static MemorySetup> {
    LAYOUT.get()
}
