//! # Early Mapping Window
//!
//! During memory setup the permanent mappings do not exist yet, so all
//! access to arbitrary machine frames goes through one page-sized scratch
//! window that can be repointed at any frame. [`EarlyMapper`] is the
//! window itself; [`ScratchGuard`] borrows it, remembers the frame it was
//! showing, and puts that frame back when dropped, so a planning or replay
//! pass can never leave the window aimed at a frame it gave away.

use crate::frame::{Mfn, PhysAddr};
use crate::hvcall::{HvError, HvStatus};
use crate::remap_node::RemapNode;

/// One-page scratch window over machine memory.
///
/// The window doubles as the only way to read and write remap nodes: a
/// node always occupies exactly the frame the window shows. `copy_phys`
/// is for bulk moves of boot modules and uses its own transient mappings.
pub trait EarlyMapper {
    /// Frame the window currently shows.
    fn mapped(&self) -> Mfn;

    /// Aim the window at `mfn`.
    fn repoint(&mut self, mfn: Mfn) -> HvStatus;

    /// The window's frame, viewed as a remap node.
    fn node(&self) -> &RemapNode;

    /// Mutable view of the window's frame.
    fn node_mut(&mut self) -> &mut RemapNode;

    /// Copy `len` bytes from physical `src` to physical `dst`. The ranges
    /// must not overlap.
    fn copy_phys(&mut self, dst: PhysAddr, src: PhysAddr, len: u64);
}

/// Borrow of the scratch window that restores the original frame on drop.
pub struct ScratchGuard<'a, M: EarlyMapper + ?Sized> {
    mapper: &'a mut M,
    saved: Mfn,
}

impl<'a, M: EarlyMapper + ?Sized> ScratchGuard<'a, M> {
    /// Save the window's current frame and aim it at `mfn`.
    pub fn map(mapper: &'a mut M, mfn: Mfn) -> Result<Self, HvError> {
        let saved = mapper.mapped();
        let status = mapper.repoint(mfn);
        if !status.is_success() {
            return Err(HvError::from_code(status.raw()));
        }
        Ok(Self { mapper, saved })
    }

    /// Save the window's current frame without re-aiming it yet.
    pub fn save(mapper: &'a mut M) -> Self {
        let saved = mapper.mapped();
        Self { mapper, saved }
    }

    /// Aim the window at another frame without touching the saved one.
    pub fn repoint(&mut self, mfn: Mfn) -> Result<(), HvError> {
        let status = self.mapper.repoint(mfn);
        if status.is_success() {
            Ok(())
        } else {
            Err(HvError::from_code(status.raw()))
        }
    }

    /// Frame the window currently shows.
    pub fn mapped(&self) -> Mfn {
        self.mapper.mapped()
    }

    /// The windowed frame as a remap node.
    pub fn node(&self) -> &RemapNode {
        self.mapper.node()
    }

    /// Mutable view of the windowed frame.
    pub fn node_mut(&mut self) -> &mut RemapNode {
        self.mapper.node_mut()
    }

    /// Copy physical memory through the mapper.
    pub fn copy_phys(&mut self, dst: PhysAddr, src: PhysAddr, len: u64) {
        self.mapper.copy_phys(dst, src, len);
    }
}

impl<M: EarlyMapper + ?Sized> Drop for ScratchGuard<'_, M> {
    fn drop(&mut self) {
        let status = self.mapper.repoint(self.saved);
        if !status.is_success() {
            // Nothing sound to do this early; the window stays misaimed.
            log::debug!("scratch window restore to {} failed ({})", self.saved, status);
        }
    }
}
