//! # Raw Hypercall Interface
//!
//! Thin wrappers over the hypercall page the domain builder patches into
//! the guest image. Each hypercall is an indirect call to a 32-byte slot
//! of that page; arguments travel in `rdi`, `rsi`, `rdx`, `r10`, `r8` and
//! the signed status comes back in `rax`, with `rcx` and `r11` clobbered.
//!
//! ## Calls Used
//!
//! - `mmu_update`: Batched page-table and machine-table updates
//! - `memory_op`: Region map fetch, reservation queries, frame release
//! - `update_va_mapping`: Single live PTE update with TLB maintenance

use crate::frame::PAGE_SIZE;

// ============================================================================
// Hypercall Page
// ============================================================================

#[repr(C, align(4096))]
struct HypercallPage([u8; PAGE_SIZE as usize]);

// Patched with real entry stubs by the domain builder before the guest
// runs; the int3 fill only matters if a call slips through beforehand.
#[no_mangle]
#[link_section = ".text.hypercalls"]
static HYPERCALL_PAGE: HypercallPage = HypercallPage([0xcc; PAGE_SIZE as usize]);

/// Bytes per hypercall slot in the hypercall page.
const SLOT_SIZE: usize = 32;

#[inline]
fn entry(op: usize) -> usize {
    HYPERCALL_PAGE.0.as_ptr() as usize + op * SLOT_SIZE
}

// ============================================================================
// Call Numbers
// ============================================================================

/// Top-level hypercall numbers.
pub mod op {
    /// Batched MMU and machine-table updates
    pub const MMU_UPDATE: usize = 1;
    /// Memory operations, dispatched on a sub-command
    pub const MEMORY_OP: usize = 12;
    /// Update one live virtual mapping
    pub const UPDATE_VA_MAPPING: usize = 14;
}

/// Sub-commands of `memory_op`.
pub mod mem_op {
    /// Return extents to the hypervisor
    pub const DECREASE_RESERVATION: usize = 1;
    /// Query the domain's maximum reservation in pages
    pub const MAXIMUM_RESERVATION: usize = 4;
    /// Fetch this guest's pseudo-physical region map
    pub const MEMORY_MAP: usize = 9;
    /// Fetch the host region map (initial domain only)
    pub const MACHINE_MEMORY_MAP: usize = 10;
}

/// `mmu_update` request tag selecting a machine-table update.
pub const MMU_MACHPHYS_UPDATE: u64 = 1;

/// `update_va_mapping` flag requesting a single-address TLB flush.
pub const UVMF_INVLPG: u64 = 2;

/// Domain identifier meaning "the calling domain".
pub const DOMID_SELF: u16 = 0x7ff0;

// ============================================================================
// Wire Structures
// ============================================================================

/// Argument block for reservation sub-commands of `memory_op`.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct MemoryReservation {
    /// Guest pointer to the extent frame array
    pub extent_start: u64,
    /// Number of extents in the array
    pub nr_extents: u64,
    /// Log2 pages per extent
    pub extent_order: u32,
    /// Allocation flags, unused for release
    pub mem_flags: u32,
    /// Target domain
    pub domid: u16,
}

/// Argument block for the region map sub-commands of `memory_op`.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct MemoryMapBuffer {
    /// On entry the buffer capacity, on exit the entries written
    pub nr_entries: u32,
    /// Guest pointer to the entry array
    pub buffer: u64,
}

/// One `mmu_update` request.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct MmuUpdateReq {
    /// Machine address of the target, low bits select the update kind
    pub ptr: u64,
    /// Value to store
    pub val: u64,
}

// ============================================================================
// Call Wrappers
// ============================================================================

/// Issue a hypercall with 1 argument.
#[inline]
pub fn hv_call_1(op: usize, arg0: u64) -> i64 {
    let ret: i64;

    unsafe {
        core::arch::asm!(
            "call {entry}",
            entry = in(reg) entry(op),
            in("rdi") arg0,
            lateout("rax") ret,
            lateout("rcx") _,
            lateout("r11") _,
        );
    }

    ret
}

/// Issue a hypercall with 2 arguments.
#[inline]
pub fn hv_call_2(op: usize, arg0: u64, arg1: u64) -> i64 {
    let ret: i64;

    unsafe {
        core::arch::asm!(
            "call {entry}",
            entry = in(reg) entry(op),
            in("rdi") arg0,
            in("rsi") arg1,
            lateout("rax") ret,
            lateout("rcx") _,
            lateout("r11") _,
        );
    }

    ret
}

/// Issue a hypercall with 3 arguments.
#[inline]
pub fn hv_call_3(op: usize, arg0: u64, arg1: u64, arg2: u64) -> i64 {
    let ret: i64;

    unsafe {
        core::arch::asm!(
            "call {entry}",
            entry = in(reg) entry(op),
            in("rdi") arg0,
            in("rsi") arg1,
            in("rdx") arg2,
            lateout("rax") ret,
            lateout("rcx") _,
            lateout("r11") _,
        );
    }

    ret
}

/// Issue a hypercall with 4 arguments.
#[inline]
pub fn hv_call_4(op: usize, arg0: u64, arg1: u64, arg2: u64, arg3: u64) -> i64 {
    let ret: i64;

    unsafe {
        core::arch::asm!(
            "call {entry}",
            entry = in(reg) entry(op),
            in("rdi") arg0,
            in("rsi") arg1,
            in("rdx") arg2,
            in("r10") arg3,
            lateout("rax") ret,
            lateout("rcx") _,
            lateout("r11") _,
        );
    }

    ret
}
