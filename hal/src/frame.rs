//! # Frame Numbers and Physical Addresses
//!
//! Strongly typed page-frame numbers and physical addresses for the guest.
//!
//! Two frame spaces exist in a paravirtualized guest:
//!
//! - [`Pfn`]: guest-physical frame number, the guest's own view of memory.
//! - [`Mfn`]: machine frame number, the real frame as seen by the hypervisor.
//!
//! Keeping them as distinct types makes it impossible to feed one space's
//! number into an operation that expects the other without an explicit
//! conversion through the translation table.

use core::fmt;
use core::ops::{Add, AddAssign, Sub};

// =============================================================================
// PAGE CONSTANTS
// =============================================================================

/// Page shift (4 KiB pages)
pub const PAGE_SHIFT: u32 = 12;

/// Page size in bytes
pub const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;

/// Mask selecting the offset within a page
pub const PAGE_MASK: u64 = PAGE_SIZE - 1;

// =============================================================================
// GUEST-PHYSICAL FRAME NUMBER
// =============================================================================

/// Guest-physical frame number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Pfn(u64);

impl Pfn {
    /// Create a frame number from a raw index.
    #[inline]
    pub const fn new(pfn: u64) -> Self {
        Self(pfn)
    }

    /// Raw frame index.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Physical address of the first byte of this frame.
    #[inline]
    pub const fn base(self) -> PhysAddr {
        PhysAddr::new(self.0 << PAGE_SHIFT)
    }
}

impl Add<u64> for Pfn {
    type Output = Pfn;

    #[inline]
    fn add(self, rhs: u64) -> Pfn {
        Pfn(self.0 + rhs)
    }
}

impl AddAssign<u64> for Pfn {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

impl Sub for Pfn {
    type Output = u64;

    #[inline]
    fn sub(self, rhs: Pfn) -> u64 {
        self.0 - rhs.0
    }
}

impl fmt::Display for Pfn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pfn {:#x}", self.0)
    }
}

impl fmt::LowerHex for Pfn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

// =============================================================================
// MACHINE FRAME NUMBER
// =============================================================================

/// Machine frame number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Mfn(u64);

impl Mfn {
    /// Sentinel for a translation slot with no machine backing.
    pub const INVALID: Mfn = Mfn(u64::MAX);

    /// Create a machine frame number from a raw index.
    #[inline]
    pub const fn new(mfn: u64) -> Self {
        Self(mfn)
    }

    /// Raw frame index.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The machine frame that identity-maps `pfn`.
    #[inline]
    pub const fn identity(pfn: Pfn) -> Self {
        Self(pfn.as_u64())
    }

    /// Whether this is the invalid sentinel.
    #[inline]
    pub const fn is_invalid(self) -> bool {
        self.0 == u64::MAX
    }

    /// Machine address of the first byte of this frame.
    #[inline]
    pub const fn base(self) -> u64 {
        self.0 << PAGE_SHIFT
    }
}

impl Add<u64> for Mfn {
    type Output = Mfn;

    #[inline]
    fn add(self, rhs: u64) -> Mfn {
        Mfn(self.0 + rhs)
    }
}

impl fmt::Display for Mfn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mfn {:#x}", self.0)
    }
}

impl fmt::LowerHex for Mfn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

// =============================================================================
// PHYSICAL ADDRESS
// =============================================================================

/// Guest-physical byte address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysAddr(u64);

impl PhysAddr {
    /// Create a physical address from a raw value.
    #[inline]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Raw address value.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Align down to a page boundary.
    #[inline]
    pub const fn align_down(self) -> Self {
        Self(self.0 & !PAGE_MASK)
    }

    /// Align up to a page boundary.
    #[inline]
    pub const fn align_up(self) -> Self {
        Self((self.0 + PAGE_MASK) & !PAGE_MASK)
    }

    /// Offset of this address within its page.
    #[inline]
    pub const fn page_offset(self) -> u64 {
        self.0 & PAGE_MASK
    }

    /// Frame containing this address (round down).
    #[inline]
    pub const fn frame_down(self) -> Pfn {
        Pfn::new(self.0 >> PAGE_SHIFT)
    }

    /// First frame at or above this address (round up).
    #[inline]
    pub const fn frame_up(self) -> Pfn {
        Pfn::new((self.0 + PAGE_MASK) >> PAGE_SHIFT)
    }
}

impl Add<u64> for PhysAddr {
    type Output = PhysAddr;

    #[inline]
    fn add(self, rhs: u64) -> PhysAddr {
        PhysAddr(self.0 + rhs)
    }
}

impl AddAssign<u64> for PhysAddr {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

impl Sub for PhysAddr {
    type Output = u64;

    #[inline]
    fn sub(self, rhs: PhysAddr) -> u64 {
        self.0 - rhs.0
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl fmt::LowerHex for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

// =============================================================================
// PHYSICAL RANGE
// =============================================================================

/// Half-open physical byte range `[start, start + size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysRange {
    /// First byte of the range
    pub start: PhysAddr,
    /// Length in bytes
    pub size: u64,
}

impl PhysRange {
    /// Create a range from start and length.
    #[inline]
    pub const fn new(start: PhysAddr, size: u64) -> Self {
        Self { start, size }
    }

    /// One byte past the end of the range.
    #[inline]
    pub const fn end(self) -> PhysAddr {
        PhysAddr::new(self.start.as_u64() + self.size)
    }

    /// Whether the range is empty.
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.size == 0
    }
}

impl fmt::Display for PhysRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[mem {}-{}]", self.start, self.end())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pfn_base_round_trip() {
        let pfn = Pfn::new(0x1234);
        assert_eq!(pfn.base().as_u64(), 0x1234 << PAGE_SHIFT);
        assert_eq!(pfn.base().frame_down(), pfn);
    }

    #[test]
    fn addr_alignment() {
        let a = PhysAddr::new(0x1001);
        assert_eq!(a.align_down().as_u64(), 0x1000);
        assert_eq!(a.align_up().as_u64(), 0x2000);
        assert_eq!(a.page_offset(), 1);

        let b = PhysAddr::new(0x3000);
        assert_eq!(b.align_down(), b);
        assert_eq!(b.align_up(), b);
    }

    #[test]
    fn frame_rounding() {
        let a = PhysAddr::new(0x1fff);
        assert_eq!(a.frame_down().as_u64(), 1);
        assert_eq!(a.frame_up().as_u64(), 2);
    }

    #[test]
    fn identity_mfn_mirrors_pfn() {
        let pfn = Pfn::new(77);
        let mfn = Mfn::identity(pfn);
        assert_eq!(mfn.as_u64(), 77);
        assert!(!mfn.is_invalid());
        assert!(Mfn::INVALID.is_invalid());
    }

    #[test]
    fn range_end_and_empty() {
        let r = PhysRange::new(PhysAddr::new(0x8_0000), 0x8_0000);
        assert_eq!(r.end().as_u64(), 0x10_0000);
        assert!(!r.is_empty());
        assert!(PhysRange::new(PhysAddr::new(0), 0).is_empty());
    }
}
