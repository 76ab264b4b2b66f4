//! Scripted hypervisor and scratch-window doubles shared by the crate's
//! tests. The hypervisor records every call and serves scripted results;
//! the mapper backs the window with an in-memory frame store so planned
//! remap nodes can be read back and replayed.

use argon_hal::{
    EarlyMapper, HvError, HvStatus, Hypervisor, Mfn, Pfn, PhysAddr, RawMapEntry, RemapNode,
    PAGE_MASK, PAGE_SIZE,
};
use argon_memmap::RegionKind;
use arrayvec::ArrayVec;

/// Build raw map entries the way the hypervisor hands them over.
pub fn raw_map(entries: &[(u64, u64, RegionKind)]) -> ArrayVec<RawMapEntry, 32> {
    entries
        .iter()
        .map(|&(addr, size, kind)| RawMapEntry {
            addr,
            size,
            kind: kind.as_raw(),
        })
        .collect()
}

pub struct MockHypervisor {
    pub guest_map: ArrayVec<RawMapEntry, 32>,
    pub machine_map: ArrayVec<RawMapEntry, 32>,
    pub guest_map_error: Option<HvError>,
    pub machine_map_error: Option<HvError>,
    /// Raw status served to `maximum_reservation`
    pub max_reservation: i64,
    /// Raw statuses served to `decrease_reservation`, then 1 forever
    release_script: ArrayVec<i64, 16>,
    release_cursor: usize,
    pub released: ArrayVec<Mfn, 128>,
    pub machphys: ArrayVec<(Mfn, Pfn), 1024>,
    pub linear: ArrayVec<(Pfn, Option<Mfn>), 1024>,
    pub fail_machphys: Option<Mfn>,
    pub fail_linear: Option<Pfn>,
    m2p: ArrayVec<(Mfn, Pfn), 32>,
}

impl MockHypervisor {
    pub fn new() -> Self {
        Self {
            guest_map: ArrayVec::new(),
            machine_map: ArrayVec::new(),
            guest_map_error: None,
            machine_map_error: None,
            max_reservation: 0,
            release_script: ArrayVec::new(),
            release_cursor: 0,
            released: ArrayVec::new(),
            machphys: ArrayVec::new(),
            linear: ArrayVec::new(),
            fail_machphys: None,
            fail_linear: None,
            m2p: ArrayVec::new(),
        }
    }

    /// Queue raw statuses for the next release calls.
    pub fn script_releases(&mut self, statuses: &[i64]) {
        for &status in statuses {
            self.release_script.push(status);
        }
    }

    /// Override the machine-to-guest relation for one frame.
    pub fn seed_m2p(&mut self, mfn: Mfn, pfn: Pfn) {
        self.m2p.push((mfn, pfn));
    }

    fn serve_map(
        map: &ArrayVec<RawMapEntry, 32>,
        error: Option<HvError>,
        buf: &mut [RawMapEntry],
    ) -> Result<usize, HvError> {
        if let Some(err) = error {
            return Err(err);
        }
        let count = map.len().min(buf.len());
        buf[..count].copy_from_slice(&map[..count]);
        Ok(count)
    }
}

impl Hypervisor for MockHypervisor {
    fn guest_memory_map(&mut self, buf: &mut [RawMapEntry]) -> Result<usize, HvError> {
        Self::serve_map(&self.guest_map, self.guest_map_error, buf)
    }

    fn machine_memory_map(&mut self, buf: &mut [RawMapEntry]) -> Result<usize, HvError> {
        Self::serve_map(&self.machine_map, self.machine_map_error, buf)
    }

    fn decrease_reservation(&mut self, mfn: Mfn) -> HvStatus {
        self.released.push(mfn);
        let status = match self.release_script.get(self.release_cursor) {
            Some(&raw) => raw,
            None => 1,
        };
        self.release_cursor += 1;
        HvStatus::new(status)
    }

    fn maximum_reservation(&mut self) -> HvStatus {
        HvStatus::new(self.max_reservation)
    }

    fn machphys_update(&mut self, mfn: Mfn, pfn: Pfn) -> Result<(), HvError> {
        if self.fail_machphys == Some(mfn) {
            return Err(HvError::InvalidArgument);
        }
        self.machphys.push((mfn, pfn));
        Ok(())
    }

    fn update_linear(&mut self, pfn: Pfn, mapping: Option<Mfn>) -> HvStatus {
        if self.fail_linear == Some(pfn) {
            return HvStatus::new(-22);
        }
        self.linear.push((pfn, mapping));
        HvStatus::OK
    }

    fn machine_lookup(&self, mfn: Mfn) -> Pfn {
        for &(m, p) in self.m2p.iter().rev() {
            if m == mfn {
                return p;
            }
        }
        Pfn::new(mfn.as_u64())
    }
}

pub struct MockMapper {
    window: Mfn,
    nodes: ArrayVec<(Mfn, RemapNode), 16>,
    buf: RemapNode,
    pub repoints: usize,
    pub fail_repoint: Option<Mfn>,
    pages: ArrayVec<(u64, [u8; PAGE_SIZE as usize]), 8>,
}

impl MockMapper {
    pub fn new(window: Mfn) -> Self {
        Self {
            window,
            nodes: ArrayVec::new(),
            buf: RemapNode::empty(),
            repoints: 0,
            fail_repoint: None,
            pages: ArrayVec::new(),
        }
    }

    /// Node content stored at `mfn`, including the frame under the window.
    pub fn node_at(&self, mfn: Mfn) -> Option<RemapNode> {
        if mfn == self.window {
            return Some(self.buf);
        }
        self.nodes
            .iter()
            .find(|(frame, _)| *frame == mfn)
            .map(|&(_, node)| node)
    }

    /// Plant a node at `mfn` without going through the window.
    pub fn install_node(&mut self, mfn: Mfn, node: RemapNode) {
        if mfn == self.window {
            self.buf = node;
            return;
        }
        for slot in self.nodes.iter_mut() {
            if slot.0 == mfn {
                slot.1 = node;
                return;
            }
        }
        self.nodes.push((mfn, node));
    }

    pub fn write_bytes(&mut self, addr: PhysAddr, data: &[u8]) {
        for (i, &byte) in data.iter().enumerate() {
            self.write_byte(addr.as_u64() + i as u64, byte);
        }
    }

    pub fn read_bytes(&self, addr: PhysAddr, out: &mut [u8]) {
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.read_byte(addr.as_u64() + i as u64);
        }
    }

    fn store_window(&mut self) {
        let window = self.window;
        let buf = self.buf;
        for slot in self.nodes.iter_mut() {
            if slot.0 == window {
                slot.1 = buf;
                return;
            }
        }
        self.nodes.push((window, buf));
    }

    fn read_byte(&self, addr: u64) -> u8 {
        let base = addr & !PAGE_MASK;
        match self.pages.iter().find(|(page, _)| *page == base) {
            Some((_, data)) => data[(addr & PAGE_MASK) as usize],
            None => 0,
        }
    }

    fn write_byte(&mut self, addr: u64, byte: u8) {
        let base = addr & !PAGE_MASK;
        let offset = (addr & PAGE_MASK) as usize;
        for (page, data) in self.pages.iter_mut() {
            if *page == base {
                data[offset] = byte;
                return;
            }
        }
        let mut data = [0u8; PAGE_SIZE as usize];
        data[offset] = byte;
        self.pages.push((base, data));
    }
}

impl EarlyMapper for MockMapper {
    fn mapped(&self) -> Mfn {
        self.window
    }

    fn repoint(&mut self, mfn: Mfn) -> HvStatus {
        if self.fail_repoint == Some(mfn) {
            return HvStatus::new(-14);
        }
        self.repoints += 1;
        self.store_window();
        self.buf = match self.node_at(mfn) {
            Some(node) => node,
            None => RemapNode::empty(),
        };
        self.window = mfn;
        HvStatus::OK
    }

    fn node(&self) -> &RemapNode {
        &self.buf
    }

    fn node_mut(&mut self) -> &mut RemapNode {
        &mut self.buf
    }

    fn copy_phys(&mut self, dst: PhysAddr, src: PhysAddr, len: u64) {
        for i in 0..len {
            let byte = self.read_byte(src.as_u64() + i);
            self.write_byte(dst.as_u64() + i, byte);
        }
    }
}
