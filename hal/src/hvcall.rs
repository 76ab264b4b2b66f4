//! # Hypervisor Call Boundary
//!
//! Status decoding, wire structures, and the [`Hypervisor`] service trait
//! consumed by the memory setup code.
//!
//! Every privileged call returns a signed status word: non-negative values
//! carry a result (an entry count, a number of freed frames), negative
//! values are error codes. The memory setup treats almost every failure as
//! boot-fatal; the one exception is the single-frame release during the
//! remap fallback, which is logged and tolerated.

use bitflags::bitflags;
use core::fmt;

use crate::frame::{Mfn, Pfn};

// =============================================================================
// STATUS AND ERRORS
// =============================================================================

/// Raw signed status word returned by a hypervisor call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct HvStatus(i64);

impl HvStatus {
    /// Success status carrying zero.
    pub const OK: HvStatus = HvStatus(0);

    /// Wrap a raw status word.
    #[inline]
    pub const fn new(code: i64) -> Self {
        Self(code)
    }

    /// Raw status word.
    #[inline]
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Whether the call succeeded.
    #[inline]
    pub const fn is_success(self) -> bool {
        self.0 >= 0
    }

    /// Convert to a `Result`, keeping the non-negative payload.
    #[inline]
    pub const fn into_result(self) -> Result<u64, HvError> {
        if self.0 >= 0 {
            Ok(self.0 as u64)
        } else {
            Err(HvError::from_code(self.0))
        }
    }
}

impl fmt::Display for HvStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Decoded hypervisor call failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HvError {
    /// Operation not implemented by this hypervisor
    NotImplemented,
    /// Out of memory on the hypervisor side
    NoMemory,
    /// Malformed request
    InvalidArgument,
    /// Bad guest handle or buffer
    Fault,
    /// Operation not permitted for this domain
    Denied,
    /// Any other negative status
    Other(i64),
}

impl HvError {
    /// Decode a negative status word.
    pub const fn from_code(code: i64) -> Self {
        match code {
            -38 => Self::NotImplemented,
            -12 => Self::NoMemory,
            -22 => Self::InvalidArgument,
            -14 => Self::Fault,
            -1 => Self::Denied,
            other => Self::Other(other),
        }
    }

    /// Raw status word for this error.
    pub const fn code(self) -> i64 {
        match self {
            Self::NotImplemented => -38,
            Self::NoMemory => -12,
            Self::InvalidArgument => -22,
            Self::Fault => -14,
            Self::Denied => -1,
            Self::Other(code) => code,
        }
    }
}

impl fmt::Display for HvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotImplemented => write!(f, "operation not implemented"),
            Self::NoMemory => write!(f, "hypervisor out of memory"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::Fault => write!(f, "bad guest buffer"),
            Self::Denied => write!(f, "operation denied"),
            Self::Other(code) => write!(f, "hypervisor error {}", code),
        }
    }
}

// =============================================================================
// WIRE STRUCTURES
// =============================================================================

/// One entry of the region map as exchanged with the hypervisor.
///
/// The layout matches the firmware-style map the hypervisor fills in:
/// byte address, byte length, and a raw usage code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct RawMapEntry {
    /// First byte of the region
    pub addr: u64,
    /// Length in bytes
    pub size: u64,
    /// Raw usage code (see `argon-memmap` for the decoded kinds)
    pub kind: u32,
}

impl RawMapEntry {
    /// An empty entry, used to initialize fetch buffers.
    pub const fn zeroed() -> Self {
        Self {
            addr: 0,
            size: 0,
            kind: 0,
        }
    }
}

bitflags! {
    /// Flags describing this guest, as handed over in the start-of-day info.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GuestFlags: u32 {
        /// Guest is privileged (may issue control operations)
        const PRIVILEGED = 1 << 0;
        /// Guest is the initial domain and sees the machine memory map
        const INITIAL_DOMAIN = 1 << 1;
        /// Start-of-day module is passed as a frame number
        const MOD_START_PFN = 1 << 3;
    }
}

bitflags! {
    /// Page-table entry flags for mappings installed through the hypervisor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u64 {
        /// Mapping is present
        const PRESENT = 1 << 0;
        /// Writable
        const WRITABLE = 1 << 1;
        /// Accessed
        const ACCESSED = 1 << 5;
        /// Dirty
        const DIRTY = 1 << 6;
        /// No execute
        const NO_EXEC = 1 << 63;
    }
}

impl PteFlags {
    /// Flags for an ordinary kernel data mapping.
    pub const fn kernel() -> Self {
        Self::PRESENT
            .union(Self::WRITABLE)
            .union(Self::ACCESSED)
            .union(Self::DIRTY)
    }
}

/// Encode a page-table entry for `mfn` with the given flags.
#[inline]
pub const fn make_pte(mfn: Mfn, flags: PteFlags) -> u64 {
    mfn.base() | flags.bits()
}

// =============================================================================
// SERVICE TRAIT
// =============================================================================

/// Synchronous call boundary to the hypervisor.
///
/// Only the memory operations consumed by the setup code are modeled here;
/// callback registration and assist flags live with the platform glue. The
/// real backend is a hypercall layer compiled for bare-metal targets; tests
/// substitute a scripted double.
pub trait Hypervisor {
    /// Fetch this guest's own region map into `buf`, returning the number
    /// of entries written.
    fn guest_memory_map(&mut self, buf: &mut [RawMapEntry]) -> Result<usize, HvError>;

    /// Fetch the whole-machine region map into `buf`. Restricted to the
    /// initial domain.
    fn machine_memory_map(&mut self, buf: &mut [RawMapEntry]) -> Result<usize, HvError>;

    /// Give one machine frame back to the hypervisor. The status carries
    /// the number of frames actually freed (one on success).
    fn decrease_reservation(&mut self, mfn: Mfn) -> HvStatus;

    /// Query the maximum reservation for this domain, in pages.
    fn maximum_reservation(&mut self) -> HvStatus;

    /// Record `mfn` as backing `pfn` in the machine-to-physical table.
    fn machphys_update(&mut self, mfn: Mfn, pfn: Pfn) -> Result<(), HvError>;

    /// Update the live kernel mapping of `pfn`'s linear address. `None`
    /// clears the mapping; callers ignore the status when clearing.
    fn update_linear(&mut self, pfn: Pfn, mapping: Option<Mfn>) -> HvStatus;

    /// Read the machine-to-physical table entry for `mfn`.
    fn machine_lookup(&self, mfn: Mfn) -> Pfn;
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_decodes_errors() {
        assert!(HvStatus::new(3).is_success());
        assert_eq!(HvStatus::new(3).into_result(), Ok(3));
        assert_eq!(
            HvStatus::new(-38).into_result(),
            Err(HvError::NotImplemented)
        );
        assert_eq!(HvStatus::new(-99).into_result(), Err(HvError::Other(-99)));
        assert_eq!(HvError::NoMemory.code(), -12);
    }

    #[test]
    fn kernel_pte_encoding() {
        let pte = make_pte(Mfn::new(0x42), PteFlags::kernel());
        assert_eq!(pte & 0xfff, 0b110_0011);
        assert_eq!(pte >> 12, 0x42);
    }

    #[test]
    fn guest_flags() {
        let flags = GuestFlags::PRIVILEGED | GuestFlags::INITIAL_DOMAIN;
        assert!(flags.contains(GuestFlags::INITIAL_DOMAIN));
        assert!(!GuestFlags::PRIVILEGED.contains(GuestFlags::INITIAL_DOMAIN));
    }
}
