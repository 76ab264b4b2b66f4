//! # Remap Instruction Node
//!
//! One page worth of deferred remap instructions. The planner threads these
//! nodes into a singly linked list that lives entirely inside the frames
//! being remapped, so planning consumes no allocator and no permanent
//! mappings. Each node records where its frames should reappear and which
//! machine frames those are; the node page itself is always the first frame
//! it records, which is what lets the replay walker find it again.

use static_assertions::assert_eq_size;

use crate::frame::{Mfn, Pfn, PAGE_SIZE};

/// Machine frame slots carried by one node.
///
/// A node occupies exactly one page: three header words, the rest frame
/// slots.
pub const REMAP_NODE_FRAMES: usize = (PAGE_SIZE as usize / 8) - 3;

/// In-frame node of the deferred remap list.
#[derive(Debug, Clone, Copy)]
#[repr(C, align(4096))]
pub struct RemapNode {
    next: Mfn,
    target_pfn: u64,
    count: u64,
    frames: [Mfn; REMAP_NODE_FRAMES],
}

assert_eq_size!(RemapNode, [u8; PAGE_SIZE as usize]);

impl RemapNode {
    /// A node with no successor and no recorded frames.
    pub const fn empty() -> Self {
        Self {
            next: Mfn::INVALID,
            target_pfn: 0,
            count: 0,
            frames: [Mfn::INVALID; REMAP_NODE_FRAMES],
        }
    }

    /// Start recording a chunk targeted at `target`, chaining to `next`.
    pub fn begin(&mut self, next: Mfn, target: Pfn) {
        self.next = next;
        self.target_pfn = target.as_u64();
        self.count = 0;
    }

    /// Record one machine frame. Returns `false` once the node is full.
    pub fn push(&mut self, mfn: Mfn) -> bool {
        if (self.count as usize) < REMAP_NODE_FRAMES {
            self.frames[self.count as usize] = mfn;
            self.count += 1;
            true
        } else {
            false
        }
    }

    /// Successor node's frame, [`Mfn::INVALID`] at the end of the list.
    #[inline]
    pub fn next(&self) -> Mfn {
        self.next
    }

    /// First frame of the span the recorded frames should back.
    #[inline]
    pub fn target(&self) -> Pfn {
        Pfn::new(self.target_pfn)
    }

    /// Number of recorded frames.
    #[inline]
    pub fn len(&self) -> usize {
        self.count as usize
    }

    /// Whether the node records no frames.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Recorded frames, oldest first.
    #[inline]
    pub fn frames(&self) -> &[Mfn] {
        &self.frames[..self.count as usize]
    }
}

impl Default for RemapNode {
    fn default() -> Self {
        Self::empty()
    }
}
