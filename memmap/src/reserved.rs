//! # Early Reservation Set
//!
//! Byte ranges already handed to a consumer (kernel image, boot info,
//! translation list, relocated modules) before any allocator exists.
//! Free-area searches step around reserved pages, and ranges are given
//! back when their contents move elsewhere.

use arrayvec::ArrayVec;

use argon_hal::PhysAddr;

use crate::table::MapError;

/// Capacity of a [`ReservedRanges`] set.
pub const MAX_RESERVED: usize = 64;

#[derive(Debug, Clone, Copy)]
struct Span {
    start: u64,
    end: u64,
}

/// Bounded set of reserved byte ranges.
///
/// Ranges merge on insert, so the set stays disjoint; order is not
/// maintained and queries scan.
#[derive(Debug, Clone, Default)]
pub struct ReservedRanges {
    spans: ArrayVec<Span, MAX_RESERVED>,
}

impl ReservedRanges {
    /// Create an empty set.
    pub fn new() -> Self {
        Self {
            spans: ArrayVec::new(),
        }
    }

    /// Number of disjoint reserved ranges.
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    /// Whether nothing is reserved.
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Reserve `[start, start + size)`, merging with anything it touches.
    pub fn reserve(&mut self, start: PhysAddr, size: u64) -> Result<(), MapError> {
        if size == 0 {
            return Ok(());
        }
        let mut lo = start.as_u64();
        let mut hi = lo + size;
        self.spans.retain(|span| {
            if span.end < lo || span.start > hi {
                true
            } else {
                lo = lo.min(span.start);
                hi = hi.max(span.end);
                false
            }
        });
        self.spans
            .try_push(Span { start: lo, end: hi })
            .map_err(|_| MapError::Full)?;
        Ok(())
    }

    /// Release `[start, start + size)`. Ranges never reserved are ignored,
    /// so releasing twice is harmless. Fails only if carving a hole out of
    /// the middle of a range needs a slot the set no longer has.
    pub fn free(&mut self, start: PhysAddr, size: u64) -> Result<(), MapError> {
        if size == 0 {
            return Ok(());
        }
        let lo = start.as_u64();
        let hi = lo + size;
        // Spans are disjoint, so at most one strictly contains the hole.
        let mut split: Option<Span> = None;
        for span in self.spans.iter_mut() {
            if span.end <= lo || span.start >= hi {
                continue;
            }
            if span.start < lo && span.end > hi {
                split = Some(Span {
                    start: hi,
                    end: span.end,
                });
                span.end = lo;
            } else if span.start < lo {
                span.end = lo;
            } else if span.end > hi {
                span.start = hi;
            } else {
                span.end = span.start;
            }
        }
        self.spans.retain(|span| span.start < span.end);
        if let Some(span) = split {
            self.spans.try_push(span).map_err(|_| MapError::Full)?;
        }
        Ok(())
    }

    /// Whether `addr` lies inside a reserved range.
    pub fn is_reserved(&self, addr: PhysAddr) -> bool {
        let addr = addr.as_u64();
        self.spans
            .iter()
            .any(|span| span.start <= addr && addr < span.end)
    }
}

// =============================================================================
// TESTS
// =============================================================================
