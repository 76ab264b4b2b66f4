//! # Argon OS PV Guest Memory Setup
//!
//! Early-boot memory setup for paravirtual guests. The hypervisor hands
//! the guest a region map describing the machine (or a synthetic view of
//! it) and an initial allocation of machine frames mapped one-to-one
//! onto the first guest pfns. Holes in that map (firmware windows,
//! PCI ranges, host-reserved areas) still have frames sitting under
//! them; leaving them there would waste the memory, and handing them out
//! would alias device space.
//!
//! Setup walks the map once and decides, for every page of the initial
//! allocation, where its frame ends up:
//!
//! ```text
//!              region map                    translation table
//!   ┌──────────────────────────┐         pfn 0 ──────────► mfn
//!   │ usable                   │  keep   pfn 1 ──────────► mfn
//!   ├──────────────────────────┤         ...
//!   │ reserved            ░░░░ │  remap  pfn under hole ─► pfn (identity)
//!   ├──────────────────────────┤         ...
//!   │ usable                   │  keep   frame moves up ─► extra memory
//!   └──────────────────────────┘
//! ```
//!
//! Frames under holes are relocated above the allocation end (or, when
//! no target range remains, released back to the hypervisor), and the
//! holes themselves become identity-mapped so device accesses reach the
//! machine addresses they name. The relocation happens in two phases:
//! planning runs here, before any allocator exists, and records its work
//! in a chain threaded through the moving frames themselves; replay runs
//! once the final translation table storage is up.
//!
//! ## Modules
//!
//! - [`setup`]: The orchestration pass, from region map fetch to the
//!   published layout
//! - [`remap`]: The two-phase relocation engine
//! - [`resolver`]: Conflict checks for fixed boot allocations, moving
//!   movable regions out of the way
//! - [`extra`]: Tracking for RAM granted above the initial allocation
//! - [`ptable`]: The boot-time pfn-to-mfn translation table
//! - [`error`]: The shared error type

#![no_std]

use argon_hal::{PhysAddr, PhysRange};

pub mod error;
pub mod extra;
pub mod ptable;
pub mod remap;
pub mod resolver;
pub mod setup;

#[cfg(test)]
mod mock;

pub use crate::error::{SetupError, SetupResult};
pub use crate::extra::{ExtraMemory, ExtraRegion, MAX_EXTRA_REGIONS};
pub use crate::ptable::FrameTable;
pub use crate::remap::RemapEngine;
pub use crate::resolver::{ensure_usable, resolve_conflicts, SwapRecord, SwapRecords, MAX_SWAP_RECORDS};
pub use crate::setup::{
    fetch_region_map, memory_layout, memory_setup, publish, BootParams, MemorySetup, PendingRemap,
};

// =============================================================================
// POLICY
// =============================================================================

/// Tunables of the setup pass. The defaults describe a 64 TiB x86-64
/// guest with the usual PC windows; embedders with different firmware
/// conventions override the fields they care about.
#[derive(Debug, Clone)]
pub struct MemPolicy {
    /// Highest physical address the paging mode can map.
    pub addr_ceiling: u64,
    /// Apply the 512 GiB address cap to unprivileged guests unless the
    /// command line overrides it.
    pub opt_512gb_limit: bool,
    /// Slack added to the synthesized flat map when the hypervisor has
    /// no map call, leaving room to relocate boot payloads.
    pub map_slack: u64,
    /// Extra memory is capped at this multiple of the initial
    /// allocation.
    pub extra_ratio: u64,
    /// Firmware table window the initial domain must keep reserved.
    pub firmware_window: PhysRange,
    /// Legacy VGA/BIOS window, reserved in the final map for every
    /// guest.
    pub legacy_window: PhysRange,
}

impl Default for MemPolicy {
    fn default() -> Self {
        Self {
            addr_ceiling: 1 << 46,
            opt_512gb_limit: true,
            map_slack: 8 << 20,
            extra_ratio: 10,
            firmware_window: PhysRange::new(PhysAddr::new(0x8_0000), 0x8_0000),
            legacy_window: PhysRange::new(PhysAddr::new(0xa_0000), 0x6_0000),
        }
    }
}
