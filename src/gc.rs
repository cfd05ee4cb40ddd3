//! The free-list (GC) allocator: a regular tree, `FREE_DBI`, mapping a
//! committing txnid to the PNL of pages it retired (spec §4.6, grounded
//! on `original_source/src/gc-rev.c`/`gc-handle.c`).

use crate::page::Pgno;
use crate::pnl::Pnl;
use crate::rkl::{Rkl, Txnid};

/// Reclaim order for walking GC records during allocation (spec §4.6,
/// §6.3 `LIFORECLAIM`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimOrder {
    /// Walk from the newest reclaimable entry downward.
    Lifo,
    /// Walk from the oldest reclaimable entry upward.
    Fifo,
}

impl ReclaimOrder {
    pub fn from_flags(flags: crate::config::EnvFlags) -> Self {
        if flags.contains(crate::config::EnvFlags::LIFORECLAIM) {
            ReclaimOrder::Lifo
        } else {
            ReclaimOrder::Fifo
        }
    }
}

bitflags::bitflags! {
    /// Allocation request modifiers (spec §4.6 `gc_alloc_ex`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AllocFlags: u32 {
        /// Caller will immediately fill the page, so zeroing can be skipped.
        const JUST_RESERVE = 1 << 0;
        /// The allocator itself may recursively borrow from FREE_DBI
        /// while servicing a GC-internal request (spec `GCU_PREPARATION`).
        const GCU_PREPARATION = 1 << 1;
    }
}

/// Per-txn allocator state threaded through `gc_alloc_ex`/`gc_update`
/// (spec §3.1 "Write transaction": `reclaim PNL`, `reclaimed/ready/
/// comeback RKLs`, `retired PNL`, `loose pages`).
#[derive(Debug, Default)]
pub struct GcState {
    /// Pages drained from GC records but not yet handed out (`repnl`).
    pub reclaimed_pages: Pnl,
    /// GC-record txnids already fully absorbed into `reclaimed_pages`.
    pub reclaimed: Rkl,
    /// GC-record txnids that were fully drained and are safe to delete.
    pub ready4reuse: Rkl,
    /// GC-record txnids newly written during this commit's `gc_update`
    /// loop, so `rkl_contain` sees them without a second tree read.
    pub comeback: Rkl,
    /// Pages retired (replaced by COW or freed by tree ops) this txn,
    /// to be folded into GC under the committing txnid.
    pub retired_pages: Pnl,
    /// Pages emptied and still owned by this txn: reused for O(1)
    /// without going through GC at all (spec §4.8 "Loose pages").
    pub loose_pages: Vec<Pgno>,
}

impl GcState {
    pub fn new() -> Self {
        GcState::default()
    }

    pub fn retire(&mut self, pgno: Pgno) {
        self.retired_pages.insert(pgno);
    }

    pub fn push_loose(&mut self, pgno: Pgno) {
        self.loose_pages.push(pgno);
    }

    pub fn take_loose(&mut self) -> Option<Pgno> {
        self.loose_pages.pop()
    }
}

/// Read access to the committed GC tree that the allocator walks: for a
/// given record txnid, its freed-page list. A real environment backs
/// this with a `FREE_DBI` cursor; tests use a plain map.
pub trait GcSource {
    /// Ascending or descending (per `order`) iterator over GC record
    /// txnids that are `<= horizon` (the oldest live reader's snapshot).
    fn reclaimable(&self, horizon: Txnid, order: ReclaimOrder) -> Vec<Txnid>;
    fn record_pages(&self, txnid: Txnid) -> Pnl;
}

/// Allocate `num` contiguous pages (spec §4.6 `gc_alloc_ex`). Order of
/// attempts: the loose list (single page only), the reclaimed-but-
/// unused PNL, then absorbing further GC records in `order` until a
/// satisfying span turns up or the horizon is exhausted. Returns `None`
/// when GC alone cannot satisfy the request — the caller (env/txn) must
/// then extend the file.
pub fn gc_alloc_ex(gc: &mut GcState, src: &dyn GcSource, num: usize, horizon: Txnid, order: ReclaimOrder) -> Option<Pgno> {
    if num == 1 {
        if let Some(pgno) = gc.take_loose() {
            return Some(pgno);
        }
    }

    if let Some(pgno) = gc.reclaimed_pages.take_span(num as u64) {
        return Some(pgno);
    }

    for txnid in src.reclaimable(horizon, order) {
        if gc.reclaimed.contains(txnid) {
            continue;
        }
        let pages = src.record_pages(txnid);
        gc.reclaimed_pages.merge(&pages);
        gc.reclaimed.push(txnid, false);
        if let Some(pgno) = gc.reclaimed_pages.take_span(num as u64) {
            return Some(pgno);
        }
    }

    None
}

/// Maximum page numbers one GC leaf value can hold before a retired-page
/// record must be split across multiple GC entries (spec §4.6 item 1,
/// `maxgc_large1page`). Derived the same way `leaf_node_max` bounds any
/// other value: one id is 8 bytes.
pub fn maxgc_large1page(pagesize: usize) -> usize {
    crate::page::leaf_node_max(pagesize) / 8
}

/// Split `retired` into chunks no larger than `maxgc_large1page(pagesize)`
/// entries each, to be stored as successive GC records starting at
/// `txnid` (spec §4.6 item 1: "requiring the record to be split into
/// multiple GC entries"). Each chunk keeps ascending pgno order.
pub fn chunk_retired_for_gc(retired: &Pnl, pagesize: usize) -> Vec<Vec<Pgno>> {
    let max = maxgc_large1page(pagesize).max(1);
    retired.as_slice().chunks(max).map(|c| c.to_vec()).collect()
}

/// Bounded loop ceiling for `gc_update`'s self-referential insert/retire
/// cycle (spec §4.6 item 2: "bounded by a loop counter that returns
/// GC_FULL after a configured ceiling").
pub const GC_UPDATE_LOOP_CEILING: usize = 32;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    struct MapSource(BTreeMap<Txnid, Vec<Pgno>>);

    impl GcSource for MapSource {
        fn reclaimable(&self, horizon: Txnid, order: ReclaimOrder) -> Vec<Txnid> {
            let mut ids: Vec<Txnid> = self.0.keys().copied().filter(|&t| t <= horizon).collect();
            match order {
                ReclaimOrder::Fifo => ids.sort_unstable(),
                ReclaimOrder::Lifo => ids.sort_unstable_by(|a, b| b.cmp(a)),
            }
            ids
        }
        fn record_pages(&self, txnid: Txnid) -> Pnl {
            self.0.get(&txnid).cloned().unwrap_or_default().into()
        }
    }

    #[test]
    fn allocates_from_loose_list_first() {
        let mut gc = GcState::new();
        gc.push_loose(42);
        let src = MapSource(BTreeMap::new());
        let pgno = gc_alloc_ex(&mut gc, &src, 1, 100, ReclaimOrder::Fifo).unwrap();
        assert_eq!(pgno, 42);
    }

    #[test]
    fn absorbs_gc_records_in_fifo_order_until_span_found() {
        let mut gc = GcState::new();
        let mut map = BTreeMap::new();
        map.insert(1, vec![10, 11]);
        map.insert(2, vec![20, 21, 22]);
        let src = MapSource(map);
        let pgno = gc_alloc_ex(&mut gc, &src, 3, 100, ReclaimOrder::Fifo).unwrap();
        assert_eq!(pgno, 20);
        assert!(gc.reclaimed.contains(1));
        assert!(gc.reclaimed.contains(2));
    }

    #[test]
    fn respects_horizon_and_fails_without_sufficient_span() {
        let mut gc = GcState::new();
        let mut map = BTreeMap::new();
        map.insert(5, vec![1, 2]);
        let src = MapSource(map);
        assert!(gc_alloc_ex(&mut gc, &src, 1, 3, ReclaimOrder::Fifo).is_none());
    }

    #[test]
    fn chunk_retired_respects_capacity() {
        let pnl: Pnl = (1..=10u64).collect();
        let chunks = chunk_retired_for_gc(&pnl, 256);
        let cap = maxgc_large1page(256);
        assert!(chunks.iter().all(|c| c.len() <= cap));
        assert_eq!(chunks.iter().map(|c| c.len()).sum::<usize>(), 10);
    }
}
