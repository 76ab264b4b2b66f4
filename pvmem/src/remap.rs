//! # Deferred Remap Engine
//!
//! The hypervisor hands the guest one contiguous run of backed pfns, but
//! the region map wants identity mappings over non-RAM holes inside that
//! run. The frames under those holes hold live data, so they cannot just
//! be dropped; they have to reappear at fresh guest-physical addresses
//! above the initial allocation. No allocator exists yet, which rules out
//! keeping a relocation worklist on the side.
//!
//! The engine works in two phases around that constraint:
//!
//! - **Plan**: walk every non-RAM gap, pick target pfns for the displaced
//!   frames, and write the instructions into the first frame of each
//!   displaced chunk itself. The nodes form a linked list threaded by
//!   machine frame number:
//!
//!   ```text
//!   chain ──► ┌──────────┐     ┌──────────┐
//!             │ node @ B │ ──► │ node @ A │ ──► (end)
//!             │ target   │     │ target   │
//!             │ frames[] │     │ frames[] │
//!             └──────────┘     └──────────┘
//!   ```
//!
//!   Each node's first listed frame is the frame the node lives in, so
//!   the walker can check it is reading what the planner wrote.
//!
//! - **Replay**: once the allocator is up, walk the chain through the
//!   scratch window and point each target pfn at its recorded machine
//!   frame, updating the reverse table and the live linear mapping in the
//!   same step. Target spans that become backed are dropped from the
//!   extra-memory tracker as they close.
//!
//! When planning finds no usable target range, the displaced frames are
//! released back to the hypervisor instead and the hole becomes a plain
//! identity range, contents gone. Pfns past the initial allocation have no
//! frames under them at all; those are identity-mapped without any release.

use argon_hal::{EarlyMapper, Hypervisor, Mfn, Pfn, PhysAddr, ScratchGuard, REMAP_NODE_FRAMES};
use argon_memmap::{RegionTable, ReservedRanges};

use crate::error::{SetupError, SetupResult};
use crate::extra::ExtraMemory;
use crate::ptable::FrameTable;
use crate::resolver::SwapRecords;

/// Two-phase relocation planner and replayer.
#[derive(Debug, Clone)]
pub struct RemapEngine {
    /// Head of the planned node chain
    chain: Mfn,
    /// Pages backed by the hypervisor at boot
    ini_nr_pages: u64,
    /// Highest pfn with a boot-time linear mapping
    max_mapped_pfn: Pfn,
    released: u64,
    remapped: u64,
}

/// Walk the map's non-RAM spans as whole-page pfn ranges.
///
/// Consecutive non-RAM entries and the gaps between them merge into one
/// span, closed off by the next RAM entry or by the end of the map. The
/// accumulator threads through `visit` calls and is returned.
fn for_each_gap<F>(map: &RegionTable, mut visit: F) -> u64
where
    F: FnMut(Pfn, Pfn, u64) -> u64,
{
    let mut carried = 0u64;
    let mut gap_start = PhysAddr::new(0);
    let count = map.len();

    for (i, entry) in map.iter().enumerate() {
        let end = entry.end();
        if entry.kind.is_ram() || i + 1 == count {
            let start_pfn = gap_start.frame_down();
            let end_pfn = if entry.kind.is_ram() {
                entry.start.frame_up()
            } else {
                end.frame_up()
            };
            if start_pfn < end_pfn {
                carried = visit(start_pfn, end_pfn, carried);
            }
            gap_start = end;
        }
    }
    carried
}

/// Next target range: the first RAM span in the map whose pages lie
/// beyond `min_pfn`. Advances `min_pfn` to the range's start and returns
/// its length in pages, or 0 when the map is exhausted.
fn find_pfn_range(map: &RegionTable, min_pfn: &mut Pfn) -> u64 {
    for entry in map.iter() {
        if !entry.kind.is_ram() {
            continue;
        }
        let e_pfn = entry.end().frame_down();
        if e_pfn <= *min_pfn {
            continue;
        }
        let s_pfn = entry.start.frame_up();
        return if s_pfn <= *min_pfn {
            e_pfn - *min_pfn
        } else {
            *min_pfn = s_pfn;
            e_pfn - s_pfn
        };
    }
    0
}

/// Point `pfn` at `mfn` in every structure that must agree: the
/// translation table, the hypervisor's reverse table, and the live linear
/// mapping. Any refusal is fatal, a half-applied translation cannot be
/// backed out of.
fn update_mem_tables<H: Hypervisor>(
    table: &mut FrameTable<'_>,
    hv: &mut H,
    pfn: Pfn,
    mfn: Mfn,
) -> SetupResult<()> {
    if !table.set(pfn, mfn) {
        return Err(SetupError::TranslationUpdate { pfn, mfn });
    }
    if hv.machphys_update(mfn, pfn).is_err() {
        return Err(SetupError::MachineUpdate { mfn, pfn });
    }
    let status = hv.update_linear(pfn, Some(mfn));
    if !status.is_success() {
        return Err(SetupError::LinearUpdate { pfn });
    }
    Ok(())
}

impl RemapEngine {
    pub fn new(ini_nr_pages: u64, max_mapped_pfn: Pfn) -> Self {
        Self {
            chain: Mfn::INVALID,
            ini_nr_pages,
            max_mapped_pfn,
            released: 0,
            remapped: 0,
        }
    }

    /// Frames released back to the hypervisor on the fallback path.
    pub fn released(&self) -> u64 {
        self.released
    }

    /// Frames assigned to new pfns during replay.
    pub fn remapped(&self) -> u64 {
        self.remapped
    }

    /// Dry run of the planning walk: how many backed pages the gaps in
    /// `map` would displace. No state is touched.
    pub fn count_remap_pages(&self, map: &RegionTable) -> u64 {
        let ini = self.ini_nr_pages;
        for_each_gap(map, |start_pfn, end_pfn, acc| {
            if start_pfn.as_u64() >= ini {
                return acc;
            }
            acc + end_pfn.as_u64().min(ini) - start_pfn.as_u64()
        })
    }

    /// Phase 1: plan the relocation of every backed page displaced by a
    /// non-RAM gap, identity-mapping the gaps as it goes.
    pub fn plan<H: Hypervisor, M: EarlyMapper>(
        &mut self,
        map: &RegionTable,
        table: &mut FrameTable<'_>,
        hv: &mut H,
        mapper: &mut M,
    ) -> SetupResult<()> {
        let mut failure: Option<SetupError> = None;
        for_each_gap(map, |start_pfn, end_pfn, cursor| {
            if failure.is_some() {
                return cursor;
            }
            match self.plan_gap(map, table, hv, mapper, start_pfn, end_pfn, Pfn::new(cursor)) {
                Ok(next) => next.as_u64(),
                Err(err) => {
                    failure = Some(err);
                    cursor
                }
            }
        });
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Plan one gap. `cursor` is the advancing target search position,
    /// carried from gap to gap; the first gap starts it at the initial
    /// allocation boundary.
    fn plan_gap<H: Hypervisor, M: EarlyMapper>(
        &mut self,
        map: &RegionTable,
        table: &mut FrameTable<'_>,
        hv: &mut H,
        mapper: &mut M,
        start_pfn: Pfn,
        end_pfn: Pfn,
        cursor: Pfn,
    ) -> SetupResult<Pfn> {
        let mut remap_pfn = if cursor.as_u64() == 0 {
            Pfn::new(self.ini_nr_pages)
        } else {
            cursor
        };
        let n = end_pfn - start_pfn;
        log::debug!("planning gap {:#x}..{:#x}, {} page(s)", start_pfn, end_pfn, n);
        let mut i = 0u64;

        while i < n {
            let cur_pfn = start_pfn + i;
            let left = n - i;
            let mut size = left;

            // Nothing backs pfns past the initial allocation; they just
            // become identity without any frame to relocate or release.
            if cur_pfn.as_u64() >= self.ini_nr_pages {
                table.set_identity_range(cur_pfn, cur_pfn + size);
                break;
            }
            if cur_pfn.as_u64() + size > self.ini_nr_pages {
                size = self.ini_nr_pages - cur_pfn.as_u64();
            }

            let range = find_pfn_range(map, &mut remap_pfn);
            if range == 0 {
                log::warn!("out of remap targets, releasing {} page(s) instead", left);
                self.release_chunk(table, hv, cur_pfn, cur_pfn + left);
                break;
            }
            size = size.min(range);

            self.write_nodes(table, mapper, cur_pfn, size, remap_pfn)?;

            i += size;
            remap_pfn += size;
        }

        // The frames beneath the processed pfns are about to move; drop
        // any boot linear mapping still pointing at them.
        let mut pfn = start_pfn;
        while pfn <= self.max_mapped_pfn && pfn < end_pfn {
            let _ = hv.update_linear(pfn, None);
            pfn += 1;
        }

        Ok(remap_pfn)
    }

    /// Record `size` source frames starting at `start_pfn` into chain
    /// nodes targeting `remap_pfn`, and identity-map the sources.
    fn write_nodes<M: EarlyMapper>(
        &mut self,
        table: &mut FrameTable<'_>,
        mapper: &mut M,
        start_pfn: Pfn,
        size: u64,
        remap_pfn: Pfn,
    ) -> SetupResult<()> {
        let mut guard = ScratchGuard::save(mapper);
        let mut ident = start_pfn;
        let mut target = remap_pfn;
        let mut left = size;

        while left > 0 {
            let chunk = left.min(REMAP_NODE_FRAMES as u64);

            // The node lives in the chunk's first frame. Its translations
            // must be captured before the identity store below destroys
            // the only record of them.
            let node_mfn = table.translate(ident);
            guard.repoint(node_mfn).map_err(SetupError::Window)?;
            let node = guard.node_mut();
            node.begin(self.chain, target);
            for offset in 0..chunk {
                let pushed = node.push(table.translate(ident + offset));
                debug_assert!(pushed);
            }
            self.chain = node_mfn;

            table.set_identity_range(ident, ident + chunk);

            ident += chunk;
            target += chunk;
            left -= chunk;
        }
        Ok(())
    }

    /// Fallback when no target range exists: hand each still-backed frame
    /// of the chunk back to the hypervisor, then identity-map the whole
    /// range. A declined release stops the loop but not the boot.
    fn release_chunk<H: Hypervisor>(
        &mut self,
        table: &mut FrameTable<'_>,
        hv: &mut H,
        start_pfn: Pfn,
        end_pfn: Pfn,
    ) {
        let end = Pfn::new(end_pfn.as_u64().min(self.ini_nr_pages));
        let mut pfn = start_pfn;
        while pfn < end {
            let mfn = table.translate(pfn);
            // Only frames that are really ours go back.
            if !mfn.is_invalid() && hv.machine_lookup(mfn) == pfn {
                let status = hv.decrease_reservation(mfn);
                if status.raw() != 1 {
                    log::warn!("failed to release {} ({}), keeping the rest", pfn, status);
                    break;
                }
                self.released += 1;
                table.set(pfn, Mfn::INVALID);
            }
            pfn += 1;
        }
        table.set_identity_range(start_pfn, end_pfn);
    }

    /// Phase 2: walk the planned chain and install every recorded frame
    /// at its target pfn. Drains the extra tracker span by span, then
    /// applies the relocation swap records.
    ///
    /// The final table does not depend on the order nodes are visited in;
    /// each node fully describes its own targets.
    pub fn replay<H: Hypervisor, M: EarlyMapper>(
        &mut self,
        table: &mut FrameTable<'_>,
        extra: &mut ExtraMemory,
        reserved: &mut ReservedRanges,
        swaps: &SwapRecords,
        hv: &mut H,
        mapper: &mut M,
    ) -> SetupResult<()> {
        let mut remapped = 0u64;
        let mut span_start: Option<Pfn> = None;
        let mut span_len = 0u64;

        {
            let mut guard = ScratchGuard::save(mapper);
            let mut head = self.chain;

            while !head.is_invalid() {
                guard.repoint(head).map_err(SetupError::Window)?;
                let node = guard.node();
                if node.frames().first() != Some(&head) {
                    return Err(SetupError::ChainCorrupt);
                }

                let target = node.target();
                let mut pfn = target;
                for &mfn in node.frames() {
                    update_mem_tables(table, hv, pfn, mfn)?;
                    pfn += 1;
                }
                let len = node.len() as u64;
                remapped += len;

                // Chunks come off the chain newest first, so a chunk
                // usually ends exactly where the open span starts; grow
                // the span instead of flushing a deletion per node.
                match span_start {
                    None => {
                        span_start = Some(target);
                        span_len = len;
                    }
                    Some(open) if pfn == open => {
                        span_start = Some(target);
                        span_len += len;
                    }
                    Some(open) if open + span_len == target => {
                        span_len += len;
                    }
                    Some(open) => {
                        extra.delete(reserved, open, span_len)?;
                        span_start = Some(target);
                        span_len = len;
                    }
                }

                head = node.next();
            }

            if let Some(open) = span_start {
                if span_len > 0 {
                    extra.delete(reserved, open, span_len)?;
                }
            }
        }

        self.chain = Mfn::INVALID;
        self.remapped = remapped;
        log::info!("Remapped {} page(s)", remapped);

        swaps.apply(table)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use argon_hal::{HvError, RemapNode};
    use argon_memmap::RegionKind;

    use super::*;
    use crate::mock::{MockHypervisor, MockMapper};

    fn table_of(entries: &[(u64, u64, RegionKind)]) -> RegionTable {
        let mut map = RegionTable::new();
        for &(start, size, kind) in entries {
            map.add(PhysAddr::new(start), size, kind).unwrap();
        }
        map.normalize().unwrap();
        map
    }

    fn seeded(slots: &mut [Mfn], backed: u64, base: u64) {
        for slot in slots.iter_mut() {
            *slot = Mfn::INVALID;
        }
        for pfn in 0..backed {
            slots[pfn as usize] = Mfn::new(base + pfn);
        }
    }

    #[test]
    fn count_covers_only_backed_gap_pages() {
        let map = table_of(&[
            (0x0, 0x10_0000, RegionKind::Ram),
            (0x18_0000, 0x8_0000, RegionKind::Ram),
        ]);

        // Gap pfns [0x100, 0x180); only those below the allocation count.
        let engine = RemapEngine::new(0x140, Pfn::new(0));
        assert_eq!(engine.count_remap_pages(&map), 0x40);

        let engine = RemapEngine::new(0x400, Pfn::new(0));
        assert_eq!(engine.count_remap_pages(&map), 0x80);

        let engine = RemapEngine::new(0x80, Pfn::new(0));
        assert_eq!(engine.count_remap_pages(&map), 0);
    }

    #[test]
    fn count_includes_trailing_non_ram_entry() {
        let map = table_of(&[
            (0x0, 0x10_0000, RegionKind::Ram),
            (0x10_0000, 0x2000, RegionKind::Reserved),
        ]);

        let engine = RemapEngine::new(0x200, Pfn::new(0));
        assert_eq!(engine.count_remap_pages(&map), 2);
    }

    #[test]
    fn plan_records_nodes_and_identity_maps_sources() {
        let map = table_of(&[
            (0x0, 0x8000, RegionKind::Ram),
            (0x8000, 0x2000, RegionKind::Reserved),
            (0xa000, 0x1_6000, RegionKind::Ram),
        ]);
        let mut slots = [Mfn::INVALID; 64];
        seeded(&mut slots, 16, 0x100);
        let mut table = FrameTable::new(&mut slots);
        let mut hv = MockHypervisor::new();
        let mut mapper = MockMapper::new(Mfn::new(0x5ca7));

        let mut engine = RemapEngine::new(16, Pfn::new(12));
        engine.plan(&map, &mut table, &mut hv, &mut mapper).unwrap();

        // Sources pfns [8, 10) moved into one node living at their first
        // frame, targeting the pages right above the allocation.
        let node = mapper.node_at(Mfn::new(0x108)).unwrap();
        assert_eq!(node.next(), Mfn::INVALID);
        assert_eq!(node.target(), Pfn::new(16));
        assert_eq!(node.frames(), &[Mfn::new(0x108), Mfn::new(0x109)]);

        assert_eq!(table.translate(Pfn::new(8)), Mfn::new(8));
        assert_eq!(table.translate(Pfn::new(9)), Mfn::new(9));
        assert_eq!(table.translate(Pfn::new(7)), Mfn::new(0x107));

        // Boot linear mappings of the sources were zapped, nothing more.
        assert_eq!(
            hv.linear.as_slice(),
            &[(Pfn::new(8), None), (Pfn::new(9), None)]
        );
        assert!(hv.released.is_empty());
        assert_eq!(mapper.mapped(), Mfn::new(0x5ca7));
    }

    #[test]
    fn plan_splits_chunks_at_node_capacity() {
        let frames = REMAP_NODE_FRAMES as u64;
        let gap_bytes = (frames + 1) << 12;
        let map = table_of(&[
            (0x0, gap_bytes, RegionKind::Reserved),
            (gap_bytes, 0x4b_0000 - gap_bytes, RegionKind::Ram),
        ]);
        let mut slots = [Mfn::INVALID; 1280];
        seeded(&mut slots, 600, 0x1000);
        let mut table = FrameTable::new(&mut slots);
        let mut hv = MockHypervisor::new();
        let mut mapper = MockMapper::new(Mfn::new(0x7777));

        let mut engine = RemapEngine::new(600, Pfn::new(0));
        engine.plan(&map, &mut table, &mut hv, &mut mapper).unwrap();

        // Head node is the one-frame remainder, linked to the full node.
        let head = mapper.node_at(Mfn::new(0x1000 + frames)).unwrap();
        assert_eq!(head.len(), 1);
        assert_eq!(head.target(), Pfn::new(600 + frames));
        assert_eq!(head.frames()[0], Mfn::new(0x1000 + frames));

        let full = mapper.node_at(head.next()).unwrap();
        assert_eq!(full.len(), REMAP_NODE_FRAMES);
        assert_eq!(full.target(), Pfn::new(600));
        assert_eq!(full.next(), Mfn::INVALID);
        assert_eq!(full.frames()[0], Mfn::new(0x1000));
    }

    #[test]
    fn plan_releases_when_no_target_remains() {
        let map = table_of(&[
            (0x0, 0x8000, RegionKind::Ram),
            (0x8000, 0x4000, RegionKind::Reserved),
        ]);
        let mut slots = [Mfn::INVALID; 16];
        seeded(&mut slots, 12, 0x100);
        let mut table = FrameTable::new(&mut slots);
        let mut hv = MockHypervisor::new();
        for pfn in 8..12u64 {
            hv.seed_m2p(Mfn::new(0x100 + pfn), Pfn::new(pfn));
        }
        let mut mapper = MockMapper::new(Mfn::new(0x50));

        let mut engine = RemapEngine::new(12, Pfn::new(4));
        engine.plan(&map, &mut table, &mut hv, &mut mapper).unwrap();

        // One release per backed gap pfn, all four of them.
        assert_eq!(
            hv.released.as_slice(),
            &[Mfn::new(0x108), Mfn::new(0x109), Mfn::new(0x10a), Mfn::new(0x10b)]
        );
        assert_eq!(engine.released(), 4);
        for pfn in 8..12u64 {
            assert_eq!(table.translate(Pfn::new(pfn)), Mfn::new(pfn));
        }
    }

    #[test]
    fn release_stops_after_first_refusal() {
        let map = table_of(&[
            (0x0, 0x8000, RegionKind::Ram),
            (0x8000, 0x4000, RegionKind::Reserved),
        ]);
        let mut slots = [Mfn::INVALID; 16];
        seeded(&mut slots, 12, 0x100);
        let mut table = FrameTable::new(&mut slots);
        let mut hv = MockHypervisor::new();
        for pfn in 8..12u64 {
            hv.seed_m2p(Mfn::new(0x100 + pfn), Pfn::new(pfn));
        }
        hv.script_releases(&[1, 0]);
        let mut mapper = MockMapper::new(Mfn::new(0x50));

        let mut engine = RemapEngine::new(12, Pfn::new(4));
        engine.plan(&map, &mut table, &mut hv, &mut mapper).unwrap();

        // The refused call ends the releasing, but the whole gap still
        // reads as identity afterwards.
        assert_eq!(hv.released.len(), 2);
        assert_eq!(engine.released(), 1);
        for pfn in 8..12u64 {
            assert_eq!(table.translate(Pfn::new(pfn)), Mfn::new(pfn));
        }
    }

    #[test]
    fn release_skips_frames_with_stale_reverse_mapping() {
        let map = table_of(&[
            (0x0, 0x8000, RegionKind::Ram),
            (0x8000, 0x2000, RegionKind::Reserved),
        ]);
        let mut slots = [Mfn::INVALID; 16];
        seeded(&mut slots, 10, 0x100);
        let mut table = FrameTable::new(&mut slots);
        let mut hv = MockHypervisor::new();
        hv.seed_m2p(Mfn::new(0x108), Pfn::new(8));
        // pfn 9's frame answers to another pfn; it must not be released.
        hv.seed_m2p(Mfn::new(0x109), Pfn::new(0x30));
        let mut mapper = MockMapper::new(Mfn::new(0x50));

        let mut engine = RemapEngine::new(10, Pfn::new(0));
        engine.plan(&map, &mut table, &mut hv, &mut mapper).unwrap();

        assert_eq!(hv.released.as_slice(), &[Mfn::new(0x108)]);
        assert_eq!(engine.released(), 1);
    }

    #[test]
    fn plan_identity_maps_unbacked_gap_without_releases() {
        let map = table_of(&[
            (0x0, 0xa000, RegionKind::Ram),
            (0xa000, 0x4000, RegionKind::Reserved),
        ]);
        let mut slots = [Mfn::INVALID; 16];
        seeded(&mut slots, 10, 0x100);
        let mut table = FrameTable::new(&mut slots);
        let mut hv = MockHypervisor::new();
        let mut mapper = MockMapper::new(Mfn::new(0x50));

        let mut engine = RemapEngine::new(10, Pfn::new(0));
        engine.plan(&map, &mut table, &mut hv, &mut mapper).unwrap();

        assert!(hv.released.is_empty());
        for pfn in 10..14u64 {
            assert_eq!(table.translate(Pfn::new(pfn)), Mfn::new(pfn));
        }
    }

    #[test]
    fn replay_assigns_frames_and_drains_extra() {
        let map = table_of(&[
            (0x0, 0x8000, RegionKind::Ram),
            (0x8000, 0x2000, RegionKind::Reserved),
            (0xa000, 0x1_6000, RegionKind::Ram),
        ]);
        let mut slots = [Mfn::INVALID; 64];
        seeded(&mut slots, 16, 0x100);
        let mut table = FrameTable::new(&mut slots);
        let mut hv = MockHypervisor::new();
        let mut mapper = MockMapper::new(Mfn::new(0x5ca7));
        let mut reserved = ReservedRanges::new();
        let mut extra = ExtraMemory::new();
        let swaps = SwapRecords::new();

        let mut engine = RemapEngine::new(16, Pfn::new(0));
        engine.plan(&map, &mut table, &mut hv, &mut mapper).unwrap();
        extra.add(&mut reserved, Pfn::new(16), 2).unwrap();

        engine
            .replay(&mut table, &mut extra, &mut reserved, &swaps, &mut hv, &mut mapper)
            .unwrap();

        assert_eq!(table.translate(Pfn::new(16)), Mfn::new(0x108));
        assert_eq!(table.translate(Pfn::new(17)), Mfn::new(0x109));
        assert_eq!(engine.remapped(), 2);
        assert!(extra.is_drained());
        assert!(!reserved.is_reserved(Pfn::new(16).base()));
        assert_eq!(
            hv.machphys.as_slice(),
            &[(Mfn::new(0x108), Pfn::new(16)), (Mfn::new(0x109), Pfn::new(17))]
        );
        assert_eq!(mapper.mapped(), Mfn::new(0x5ca7));
    }

    fn chain_node(next: Mfn, target: Pfn, frames: &[Mfn]) -> RemapNode {
        let mut node = RemapNode::empty();
        node.begin(next, target);
        for &mfn in frames {
            node.push(mfn);
        }
        node
    }

    fn replay_chain(order: &[(u64, u64)]) -> [Mfn; 48] {
        let mut slots = [Mfn::INVALID; 48];
        let mut hv = MockHypervisor::new();
        let mut mapper = MockMapper::new(Mfn::new(0x10));
        let mut reserved = ReservedRanges::new();
        let mut extra = ExtraMemory::new();
        let swaps = SwapRecords::new();
        extra.add(&mut reserved, Pfn::new(40), 3).unwrap();

        for (i, &(mfn, target)) in order.iter().enumerate() {
            let next = match order.get(i + 1) {
                Some(&(next_mfn, _)) => Mfn::new(next_mfn),
                None => Mfn::INVALID,
            };
            let node = chain_node(next, Pfn::new(target), &[Mfn::new(mfn)]);
            mapper.install_node(Mfn::new(mfn), node);
        }

        let mut engine = RemapEngine::new(32, Pfn::new(0));
        engine.chain = Mfn::new(order[0].0);
        {
            let mut table = FrameTable::new(&mut slots);
            engine
                .replay(&mut table, &mut extra, &mut reserved, &swaps, &mut hv, &mut mapper)
                .unwrap();
        }
        assert!(extra.is_drained());
        slots
    }

    #[test]
    fn replay_order_does_not_change_the_table() {
        let forward = replay_chain(&[(0x21, 40), (0x22, 41), (0x23, 42)]);
        let shuffled = replay_chain(&[(0x23, 42), (0x21, 40), (0x22, 41)]);

        assert_eq!(forward, shuffled);
        assert_eq!(forward[40], Mfn::new(0x21));
        assert_eq!(forward[41], Mfn::new(0x22));
        assert_eq!(forward[42], Mfn::new(0x23));
    }

    #[test]
    fn replay_rejects_node_not_recording_itself() {
        let mut slots = [Mfn::INVALID; 48];
        let mut table = FrameTable::new(&mut slots);
        let mut hv = MockHypervisor::new();
        let mut mapper = MockMapper::new(Mfn::new(0x10));
        let mut reserved = ReservedRanges::new();
        let mut extra = ExtraMemory::new();
        let swaps = SwapRecords::new();

        let node = chain_node(Mfn::INVALID, Pfn::new(20), &[Mfn::new(0x31)]);
        mapper.install_node(Mfn::new(0x30), node);

        let mut engine = RemapEngine::new(32, Pfn::new(0));
        engine.chain = Mfn::new(0x30);
        assert_eq!(
            engine.replay(&mut table, &mut extra, &mut reserved, &swaps, &mut hv, &mut mapper),
            Err(SetupError::ChainCorrupt)
        );
    }

    #[test]
    fn replay_surfaces_window_and_update_failures() {
        let mut slots = [Mfn::INVALID; 48];
        let mut reserved = ReservedRanges::new();
        let swaps = SwapRecords::new();

        let node = chain_node(Mfn::INVALID, Pfn::new(40), &[Mfn::new(0x21)]);

        let mut hv = MockHypervisor::new();
        let mut mapper = MockMapper::new(Mfn::new(0x10));
        mapper.install_node(Mfn::new(0x21), node);
        mapper.fail_repoint = Some(Mfn::new(0x21));
        let mut engine = RemapEngine::new(32, Pfn::new(0));
        engine.chain = Mfn::new(0x21);
        {
            let mut table = FrameTable::new(&mut slots);
            let mut extra = ExtraMemory::new();
            assert_eq!(
                engine.replay(&mut table, &mut extra, &mut reserved, &swaps, &mut hv, &mut mapper),
                Err(SetupError::Window(HvError::Fault))
            );
        }

        let mut hv = MockHypervisor::new();
        hv.fail_linear = Some(Pfn::new(40));
        let mut mapper = MockMapper::new(Mfn::new(0x10));
        mapper.install_node(Mfn::new(0x21), node);
        let mut engine = RemapEngine::new(32, Pfn::new(0));
        engine.chain = Mfn::new(0x21);
        {
            let mut table = FrameTable::new(&mut slots);
            let mut extra = ExtraMemory::new();
            assert_eq!(
                engine.replay(&mut table, &mut extra, &mut reserved, &swaps, &mut hv, &mut mapper),
                Err(SetupError::LinearUpdate { pfn: Pfn::new(40) })
            );
        }
    }
}
