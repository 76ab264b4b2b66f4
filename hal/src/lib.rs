//! # Argon OS Hypervisor Abstraction Layer
//!
//! Frame and address primitives plus the privileged-call boundaries used by
//! the paravirtualized guest during early boot.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        argon-hal                              │
//! │  ┌────────────┐  ┌─────────────┐  ┌────────────────────────┐  │
//! │  │   frame    │  │   hvcall    │  │        mapper          │  │
//! │  │ Pfn / Mfn  │  │ Hypervisor  │  │ EarlyMapper / Scratch  │  │
//! │  │ PhysAddr   │  │ HvStatus    │  │        window          │  │
//! │  └────────────┘  └─────────────┘  └────────────────────────┘  │
//! │  ┌────────────────────────────────────────────────────────┐   │
//! │  │ remap_node: one-page, self-describing remap record     │   │
//! │  └────────────────────────────────────────────────────────┘   │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything here is `no_std` and free of allocation. The hypervisor and
//! early-mapper boundaries are traits so the memory setup code can run
//! against test doubles on the host; the real hypercall backend is only
//! compiled for bare-metal x86_64 targets.

#![no_std]

// =============================================================================
// MODULE DECLARATIONS
// =============================================================================

/// Frame numbers, physical addresses, and page arithmetic
pub mod frame;

/// Hypervisor call boundary: status codes, wire structs, the service trait
pub mod hvcall;

/// Early mapper boundary: scratch window repointing and physical copies
pub mod mapper;

/// Fixed one-page layout of an in-memory remap instruction node
pub mod remap_node;

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "x86_64", target_os = "none"))] {
        /// Architecture backends for the hypervisor boundary
        pub mod arch;
    }
}

// =============================================================================
// RE-EXPORTS
// =============================================================================

pub use crate::frame::{Mfn, Pfn, PhysAddr, PhysRange, PAGE_MASK, PAGE_SHIFT, PAGE_SIZE};
pub use crate::hvcall::{make_pte, GuestFlags, HvError, HvStatus, Hypervisor, PteFlags, RawMapEntry};
pub use crate::mapper::{EarlyMapper, ScratchGuard};
pub use crate::remap_node::{RemapNode, REMAP_NODE_FRAMES};
