//! # Paravirtual Service Implementations
//!
//! [`PvHypervisor`] and [`PvWindow`] back the service traits of this crate
//! with real hypercalls. Both assume the single-offset linear layout the
//! boot stage sets up, where every kernel virtual address is the physical
//! address plus one fixed base.

use core::cell::UnsafeCell;

use crate::frame::{Mfn, Pfn, PhysAddr, PAGE_SHIFT, PAGE_SIZE};
use crate::hvcall::{make_pte, HvError, HvStatus, Hypervisor, PteFlags, RawMapEntry};
use crate::mapper::EarlyMapper;
use crate::remap_node::RemapNode;

use super::hypercall::{
    hv_call_2, hv_call_3, hv_call_4, mem_op, op, MemoryMapBuffer, MemoryReservation,
    MmuUpdateReq, DOMID_SELF, MMU_MACHPHYS_UPDATE, UVMF_INVLPG,
};

/// Fixed virtual base of the read-only machine-to-physical table.
const MACH2PHYS_BASE: u64 = 0xffff_8000_0000_0000;

// ============================================================================
// Hypervisor Backend
// ============================================================================

/// Hypercall-backed [`Hypervisor`] implementation.
pub struct PvHypervisor {
    linear_base: u64,
}

impl PvHypervisor {
    /// Create the backend for a kernel whose linear mapping starts at
    /// `linear_base`.
    ///
    /// # Safety
    /// The linear mapping must already be established, and `linear_base`
    /// must be the exact offset it uses.
    pub const unsafe fn new(linear_base: u64) -> Self {
        Self { linear_base }
    }

    fn fetch_map(&mut self, sub: usize, buf: &mut [RawMapEntry]) -> Result<usize, HvError> {
        let mut arg = MemoryMapBuffer {
            nr_entries: buf.len() as u32,
            buffer: buf.as_mut_ptr() as u64,
        };
        let status = HvStatus::new(hv_call_2(
            op::MEMORY_OP,
            sub as u64,
            &mut arg as *mut MemoryMapBuffer as u64,
        ));
        status.into_result()?;
        Ok(arg.nr_entries as usize)
    }
}

impl Hypervisor for PvHypervisor {
    fn guest_memory_map(&mut self, buf: &mut [RawMapEntry]) -> Result<usize, HvError> {
        self.fetch_map(mem_op::MEMORY_MAP, buf)
    }

    fn machine_memory_map(&mut self, buf: &mut [RawMapEntry]) -> Result<usize, HvError> {
        self.fetch_map(mem_op::MACHINE_MEMORY_MAP, buf)
    }

    fn decrease_reservation(&mut self, mfn: Mfn) -> HvStatus {
        let frame = mfn.as_u64();
        let arg = MemoryReservation {
            extent_start: &frame as *const u64 as u64,
            nr_extents: 1,
            extent_order: 0,
            mem_flags: 0,
            domid: DOMID_SELF,
        };
        HvStatus::new(hv_call_2(
            op::MEMORY_OP,
            mem_op::DECREASE_RESERVATION as u64,
            &arg as *const MemoryReservation as u64,
        ))
    }

    fn maximum_reservation(&mut self) -> HvStatus {
        let domid: u16 = DOMID_SELF;
        HvStatus::new(hv_call_2(
            op::MEMORY_OP,
            mem_op::MAXIMUM_RESERVATION as u64,
            &domid as *const u16 as u64,
        ))
    }

    fn machphys_update(&mut self, mfn: Mfn, pfn: Pfn) -> Result<(), HvError> {
        let req = MmuUpdateReq {
            ptr: mfn.base() | MMU_MACHPHYS_UPDATE,
            val: pfn.as_u64(),
        };
        let status = HvStatus::new(hv_call_4(
            op::MMU_UPDATE,
            &req as *const MmuUpdateReq as u64,
            1,
            0,
            DOMID_SELF as u64,
        ));
        status.into_result()?;
        Ok(())
    }

    fn update_linear(&mut self, pfn: Pfn, mapping: Option<Mfn>) -> HvStatus {
        let va = self.linear_base + pfn.base().as_u64();
        let pte = match mapping {
            Some(mfn) => make_pte(mfn, PteFlags::kernel()),
            None => 0,
        };
        HvStatus::new(hv_call_3(op::UPDATE_VA_MAPPING, va, pte, UVMF_INVLPG))
    }

    fn machine_lookup(&self, mfn: Mfn) -> Pfn {
        let table = MACH2PHYS_BASE as *const u64;
        let raw = unsafe { core::ptr::read_volatile(table.add(mfn.as_u64() as usize)) };
        Pfn::new(raw)
    }
}

// ============================================================================
// Scratch Windows
// ============================================================================

#[repr(C, align(4096))]
struct NodePage(UnsafeCell<RemapNode>);

// Accessed only by the single boot CPU.
unsafe impl Sync for NodePage {}

#[repr(C, align(4096))]
struct BouncePage(UnsafeCell<[u8; PAGE_SIZE as usize]>);

unsafe impl Sync for BouncePage {}

static NODE_WINDOW: NodePage = NodePage(UnsafeCell::new(RemapNode::empty()));
static COPY_SRC: BouncePage = BouncePage(UnsafeCell::new([0; PAGE_SIZE as usize]));
static COPY_DST: BouncePage = BouncePage(UnsafeCell::new([0; PAGE_SIZE as usize]));

fn aim(va: u64, mfn: Mfn) -> HvStatus {
    HvStatus::new(hv_call_3(
        op::UPDATE_VA_MAPPING,
        va,
        make_pte(mfn, PteFlags::kernel()),
        UVMF_INVLPG,
    ))
}

/// Hypercall-backed [`EarlyMapper`] over the static scratch pages.
pub struct PvWindow {
    linear_base: u64,
    translations: *const Mfn,
    translation_count: usize,
    mapped: Mfn,
}

impl PvWindow {
    /// Create the window backend.
    ///
    /// `translations` is the live physical-to-machine array with
    /// `translation_count` entries; frames beyond it are taken to be
    /// identity mapped.
    ///
    /// # Safety
    /// At most one `PvWindow` may exist, `translations` must stay valid
    /// and current for the window's whole lifetime, and `linear_base`
    /// must match the established linear mapping.
    pub unsafe fn new(
        linear_base: u64,
        translations: *const Mfn,
        translation_count: usize,
    ) -> Self {
        let mut window = Self {
            linear_base,
            translations,
            translation_count,
            mapped: Mfn::INVALID,
        };
        let pfn = window.va_to_pfn(NODE_WINDOW.0.get() as u64);
        window.mapped = window.frame_of(pfn);
        window
    }

    fn va_to_pfn(&self, va: u64) -> Pfn {
        Pfn::new((va - self.linear_base) >> PAGE_SHIFT)
    }

    fn frame_of(&self, pfn: Pfn) -> Mfn {
        let idx = pfn.as_u64() as usize;
        if idx < self.translation_count {
            unsafe { *self.translations.add(idx) }
        } else {
            Mfn::identity(pfn)
        }
    }
}

impl EarlyMapper for PvWindow {
    fn mapped(&self) -> Mfn {
        self.mapped
    }

    fn repoint(&mut self, mfn: Mfn) -> HvStatus {
        let status = aim(NODE_WINDOW.0.get() as u64, mfn);
        if status.is_success() {
            self.mapped = mfn;
        }
        status
    }

    fn node(&self) -> &RemapNode {
        unsafe { &*NODE_WINDOW.0.get() }
    }

    fn node_mut(&mut self) -> &mut RemapNode {
        unsafe { &mut *NODE_WINDOW.0.get() }
    }

    fn copy_phys(&mut self, dst: PhysAddr, src: PhysAddr, len: u64) {
        let mut src = src;
        let mut dst = dst;
        let mut remaining = len;

        while remaining > 0 {
            let chunk = remaining
                .min(PAGE_SIZE - src.page_offset())
                .min(PAGE_SIZE - dst.page_offset());

            let src_status = aim(COPY_SRC.0.get() as u64, self.frame_of(src.frame_down()));
            let dst_status = aim(COPY_DST.0.get() as u64, self.frame_of(dst.frame_down()));
            if !src_status.is_success() || !dst_status.is_success() {
                panic!("bounce window repoint failed ({} {})", src_status, dst_status);
            }

            unsafe {
                let from = (COPY_SRC.0.get() as *const u8).add(src.page_offset() as usize);
                let to = (COPY_DST.0.get() as *mut u8).add(dst.page_offset() as usize);
                core::ptr::copy_nonoverlapping(from, to, chunk as usize);
            }

            src += chunk;
            dst += chunk;
            remaining -= chunk;
        }
    }
}
