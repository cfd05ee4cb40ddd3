//! Write/read transaction lifecycle: begin, commit, abort, nesting,
//! copy-on-write page touch, loose pages, and refund (spec §3.1 "Write
//! transaction", §4.8, grounded on `original_source/src/txn.c`).

use std::collections::HashMap;

use crate::btree::PageSource;
use crate::dpl::{Dpl, SpillList};
use crate::error::{ConcurrencyError, Result, SemanticError};
use crate::gc::GcState;
use crate::meta::{Troika, MAIN_DBI};
use crate::page::{Page, PageFlags, Pgno, Txnid};
use crate::pnl::Pnl;

/// Flags carried by a write transaction, mirroring the handful of `TXN_*`
/// bits the spec calls out (spec §7 "poisons the txn with the ERROR
/// flag").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxnState {
    pub error: bool,
    pub finished: bool,
}

/// A snapshot the write path needs of the underlying storage: fetch a
/// page by number and know the next never-yet-allocated pgno (spec §3.1
/// "Environment"). A read txn only ever calls `get`.
pub trait Storage {
    fn get(&self, pgno: Pgno) -> Result<Page>;
    fn pagesize(&self) -> usize;
    /// One past the highest pgno ever handed out (`geo.first_unallocated`).
    fn first_unallocated(&self) -> Pgno;
    /// Write a page's bytes out ahead of commit (spec §4.3 "Spill"): the
    /// pgno is one this txn allocated itself, so a crash before commit
    /// leaves harmless unreferenced bytes rather than corrupting
    /// anything reachable from the troika.
    fn write_page(&self, pgno: Pgno, page: &Page) -> Result<()>;
}

/// A write transaction (spec §3.1 "Write transaction"). Nested
/// transactions hold a reference to their parent's state instead of the
/// cyclic pointer pair the original uses, per DESIGN NOTES §9's
/// arena/handle-id guidance applied at the granularity this crate needs:
/// a nested `Txn` simply owns a child `Dpl`/`GcState`/retired set that
/// gets folded into the parent on commit.
pub struct Txn<'a> {
    pub txnid: Txnid,
    /// The txnid this txn's own pages are stamped with: equal to
    /// `txnid` at the top level, and to the innermost nested child's
    /// txnid when nested (spec §3.1 "front-txnid").
    pub front_txnid: Txnid,
    pub dpl: Dpl,
    pub gc: GcState,
    pub state: TxnState,
    pub dbis: HashMap<u32, crate::meta::TreeDescriptor>,
    /// Pages written out to disk ahead of commit while still logically
    /// part of this txn's dirty set (spec §4.3 "Spill").
    pub spill: SpillList,
    storage: &'a dyn Storage,
    next_pgno: Pgno,
    parent: Option<Box<Txn<'a>>>,
}

/// Dirty-page count above which a write op spills the coldest pages out
/// to disk ahead of commit (spec §4.3 "Spill": "decides the dirty set
/// has grown too large mid-transaction").
pub const SPILL_THRESHOLD: usize = 256;

/// Pages spilled in one pass once [`SPILL_THRESHOLD`] is crossed.
const SPILL_BATCH: usize = 32;

impl<'a> Txn<'a> {
    /// Begin a top-level write txn against the snapshot named by
    /// `troika`'s recent meta (spec §4.8 "Begin": "acquire the writer
    /// lock..., snapshot the troika, validate head meta, seed
    /// txnid = head + 1").
    pub fn begin_basal(storage: &'a dyn Storage, troika: &Troika, main_dbi: crate::meta::TreeDescriptor) -> Self {
        let txnid = troika.txnid[troika.recent] + 1;
        let mut dbis = HashMap::new();
        dbis.insert(MAIN_DBI, main_dbi);
        Txn {
            txnid,
            front_txnid: txnid,
            dpl: Dpl::new(),
            gc: GcState::new(),
            state: TxnState::default(),
            dbis,
            spill: SpillList::new(),
            storage,
            next_pgno: storage.first_unallocated(),
            parent: None,
        }
    }

    /// Begin a nested child of `self` (spec §4.8 "nested": "clone the
    /// dbi state from the parent"). The parent is moved in and returned
    /// once the child commits or aborts.
    pub fn begin_nested(parent: Box<Txn<'a>>) -> Self {
        let storage = parent.storage;
        let txnid = parent.txnid;
        let dbis = parent.dbis.clone();
        let next_pgno = parent.next_pgno;
        Txn {
            txnid,
            front_txnid: txnid,
            dpl: Dpl::new(),
            gc: GcState::new(),
            state: TxnState::default(),
            dbis,
            spill: SpillList::new(),
            storage,
            next_pgno,
            parent: Some(parent),
        }
    }

    fn check_usable(&self) -> Result<()> {
        if self.state.finished {
            return Err(SemanticError::BadTxn.into());
        }
        if self.state.error {
            return Err(SemanticError::BadTxn.into());
        }
        Ok(())
    }

    /// Fetch a page, going through the dirty list first (spec I4: a page
    /// is visible through whichever copy this txn would see). A page
    /// this txn spilled earlier is no longer in the DPL, but
    /// [`Txn::maybe_spill`] already wrote its bytes to its own pgno, so
    /// falling through to `storage.get` still returns the right content.
    pub fn get_page(&self, pgno: Pgno) -> Result<Page> {
        if let Some(entry) = self.dpl.search(pgno) {
            return Ok(entry.page.clone());
        }
        if let Some(parent) = &self.parent {
            if let Some(entry) = parent.dpl.search(pgno) {
                return Ok(entry.page.clone());
            }
        }
        self.storage.get(pgno)
    }

    /// Copy-on-write a page (spec §4.8 `page_touch`): if it's already
    /// modifiable by this txn's front-txnid, return it as-is; otherwise
    /// clone it under a freshly allocated pgno, retire the old one, and
    /// register the copy in the dirty list.
    pub fn touch_page(&mut self, pgno: Pgno) -> Result<Page> {
        if let Some(entry) = self.dpl.search(pgno) {
            if entry.page.txnid() == self.front_txnid {
                return Ok(entry.page.clone());
            }
        }
        let old = self.get_page(pgno)?;
        let mut copy = old.clone();
        let new_pgno = self.alloc_pgno(1);
        copy.set_pgno(new_pgno);
        copy.set_txnid(self.front_txnid);
        self.gc.retire(pgno);
        self.dpl.append(new_pgno, copy.clone(), 1);
        Ok(copy)
    }

    fn alloc_pgno(&mut self, n: u64) -> Pgno {
        if let Some(pgno) = self.gc.take_loose() {
            if n == 1 {
                return pgno;
            }
            self.gc.push_loose(pgno);
        }
        if let Some(pgno) = self.gc.reclaimed_pages.take_span(n) {
            return pgno;
        }
        let pgno = self.next_pgno;
        self.next_pgno += n;
        pgno
    }

    /// Allocate and register a brand-new page, stamped with this txn's
    /// front-txnid (spec §3.3 "Page": "allocated... beyond-end growth").
    pub fn new_page(&mut self, flags: PageFlags) -> Page {
        let pgno = self.alloc_pgno(1);
        let page = Page::new_empty(self.storage.pagesize(), pgno, self.front_txnid, flags);
        self.dpl.append(pgno, page.clone(), 1);
        page
    }

    /// Allocate a contiguous `npages`-page large-value span (spec §4.4
    /// "Large values").
    pub fn new_page_span(&mut self, npages: u32) -> Page {
        let pgno = self.alloc_pgno(npages as u64);
        let page = Page::new_large_span(self.storage.pagesize(), npages, pgno, self.front_txnid);
        self.dpl.append(pgno, page.clone(), npages);
        page
    }

    /// Retire every page of a large-value span (spec §4.4 "Large values").
    pub fn retire_page_span(&mut self, pgno: Pgno, npages: u32) {
        for p in pgno..pgno + npages as u64 {
            self.make_loose(p);
        }
    }

    /// Write the coldest dirty pages out to disk ahead of commit once the
    /// dirty set grows past [`SPILL_THRESHOLD`] (spec §4.3 "Spill": "slow
    /// path sorts the DPL by LRU age and walks evicting pages"). A page
    /// this txn already emptied back onto the loose list has nothing
    /// worth writing early, since it'll likely be reused or dropped
    /// before commit.
    pub fn maybe_spill(&mut self) -> Result<()> {
        if self.dpl.len() <= SPILL_THRESHOLD {
            return Ok(());
        }
        let batch = SPILL_BATCH.min(self.dpl.len());
        let victims = self.dpl.evict_coldest(batch);
        for pgno in victims {
            if self.gc.loose_pages.contains(&pgno) {
                continue;
            }
            let Some(entry) = self.dpl.search(pgno) else { continue };
            self.storage.write_page(pgno, &entry.page)?;
            self.spill.mark_spilled(pgno);
            self.dpl.remove(pgno);
        }
        Ok(())
    }

    /// Empty a leaf and its owning txn created it this snapshot: link it
    /// onto the loose list for O(1) reuse instead of routing through GC
    /// (spec §4.8 "Loose pages").
    pub fn make_loose(&mut self, pgno: Pgno) {
        if let Some(entry) = self.dpl.search(pgno) {
            if entry.page.txnid() == self.front_txnid {
                self.gc.push_loose(pgno);
                return;
            }
        }
        self.gc.retire(pgno);
    }

    /// If the tail of allocated pages is entirely loose/retired for this
    /// txn, shrink `next_pgno` back (spec §4.8 `txn_refund`: "an online
    /// auto-compaction within a single txn").
    pub fn refund(&mut self) {
        loop {
            let tail = self.next_pgno.saturating_sub(1);
            if tail < self.storage.first_unallocated() {
                break;
            }
            let is_trailing_loose = self.gc.loose_pages.last() == Some(&tail);
            let is_trailing_retired = self.gc.retired_pages.last() == Some(&tail);
            if is_trailing_loose {
                self.gc.loose_pages.pop();
                self.dpl.remove(tail);
                self.next_pgno = tail;
            } else if is_trailing_retired {
                self.gc.retired_pages.remove(tail);
                self.next_pgno = tail;
            } else {
                break;
            }
        }
    }

    pub fn put_dbi(&mut self, dbi: u32, desc: crate::meta::TreeDescriptor) {
        self.dbis.insert(dbi, desc);
    }

    pub fn get_dbi(&self, dbi: u32) -> Result<crate::meta::TreeDescriptor> {
        self.dbis.get(&dbi).copied().ok_or_else(|| SemanticError::BadDbi.into())
    }

    /// Commit a nested child: fold its DPL and retired set into the
    /// parent, releasing shadow pages the parent had cloned for it (spec
    /// §4.8 "Commit: merge nested transactions' DPL and retired lists
    /// into the parent"). Returns the parent, now carrying the child's
    /// changes.
    pub fn commit_nested(mut self) -> Result<Box<Txn<'a>>> {
        self.check_usable()?;
        let mut parent = self.parent.take().expect("commit_nested called on a top-level txn");
        for entry in self.dpl.iter() {
            parent.dpl.append(entry.pgno, entry.page.clone(), entry.npages);
        }
        for pgno in self.gc.retired_pages.iter() {
            parent.gc.retire(pgno);
        }
        for pgno in self.gc.loose_pages {
            parent.gc.push_loose(pgno);
        }
        parent.dbis = self.dbis;
        parent.next_pgno = self.next_pgno;
        self.state.finished = true;
        Ok(parent)
    }

    /// Abort a nested child: its shadow pages and retired/loose records
    /// are simply dropped, leaving the parent untouched (spec §4.8
    /// "Abort: free shadow pages, discard DPL, discard retired").
    pub fn abort_nested(mut self) -> Box<Txn<'a>> {
        self.state.finished = true;
        self.parent.take().expect("abort_nested called on a top-level txn")
    }

    pub fn is_top_level(&self) -> bool {
        self.parent.is_none()
    }

    /// One past the highest pgno this txn has handed out, including
    /// pages allocated but not yet committed (spec §4.8: used by the
    /// commit path to grow the file's recorded geometry).
    pub fn next_pgno(&self) -> Pgno {
        self.next_pgno
    }

    pub fn poison(&mut self) {
        self.state.error = true;
    }
}

impl<'a> PageSource for Txn<'a> {
    fn get(&self, pgno: Pgno) -> Result<Page> {
        self.get_page(pgno)
    }
    fn touch(&mut self, pgno: Pgno) -> Result<Page> {
        self.touch_page(pgno)
    }
    fn alloc(&mut self, flags: PageFlags) -> Result<Page> {
        Ok(self.new_page(flags))
    }
    fn alloc_span(&mut self, npages: u32) -> Result<Page> {
        Ok(self.new_page_span(npages))
    }
    fn put(&mut self, page: Page) -> Result<()> {
        let pgno = page.pgno();
        let npages = if page.flags().contains(PageFlags::LARGE) { page.npages() } else { 1 };
        self.dpl.append(pgno, page, npages);
        Ok(())
    }
    fn retire(&mut self, pgno: Pgno) {
        self.make_loose(pgno);
    }
    fn retire_span(&mut self, pgno: Pgno, npages: u32) {
        self.retire_page_span(pgno, npages);
    }
    fn pagesize(&self) -> usize {
        self.storage.pagesize()
    }
}

/// A read transaction: binds a reader slot (spec §3.3 "Read txn") and
/// exposes only the read-only [`PageSource`] surface.
pub struct ReadTxn<'a> {
    pub txnid: Txnid,
    pub slot_id: usize,
    storage: &'a dyn Storage,
}

impl<'a> ReadTxn<'a> {
    pub fn begin(storage: &'a dyn Storage, readers: &crate::reader::ReaderTable, pid: u32, tid: u64, troika: &Troika) -> Result<Self> {
        let txnid = troika.txnid[troika.recent];
        let slot_id = readers.bind(pid, tid, txnid, 0, 0)?;
        Ok(ReadTxn { txnid, slot_id, storage })
    }

    pub fn get_page(&self, pgno: Pgno) -> Result<Page> {
        self.storage.get(pgno)
    }

    /// Re-validate that this reader's snapshot is not older than what
    /// GC has reclaimed (spec ConcurrencyError::MvccRetarded): callers
    /// that hold a read txn across a long operation should periodically
    /// check they haven't fallen behind the retained-version horizon.
    pub fn check_not_retarded(&self, oldest_retained: Txnid) -> Result<()> {
        if self.txnid < oldest_retained {
            return Err(ConcurrencyError::MvccRetarded.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbFlags;
    use std::collections::HashMap as Map;
    use std::cell::RefCell;

    struct MemStorage {
        pages: RefCell<Map<Pgno, Page>>,
        pagesize: usize,
        first_unallocated: Pgno,
    }

    impl Storage for MemStorage {
        fn get(&self, pgno: Pgno) -> Result<Page> {
            Ok(self.pages.borrow().get(&pgno).cloned().expect("page exists"))
        }
        fn pagesize(&self) -> usize {
            self.pagesize
        }
        fn first_unallocated(&self) -> Pgno {
            self.first_unallocated
        }
        fn write_page(&self, pgno: Pgno, page: &Page) -> Result<()> {
            self.pages.borrow_mut().insert(pgno, page.clone());
            Ok(())
        }
    }

    fn empty_troika() -> Troika {
        Troika { txnid: [1, 1, 1], steady: [true, true, true], recent: 0, prefer_steady: 0, tail: 1 }
    }

    #[test]
    fn touch_page_clones_under_new_pgno_and_retires_old() {
        let storage = MemStorage { pages: RefCell::new(Map::new()), pagesize: 256, first_unallocated: 10 };
        let old_page = Page::new_empty(256, 3, 1, PageFlags::LEAF);
        storage.pages.borrow_mut().insert(3, old_page);
        let mut txn = Txn::begin_basal(&storage, &empty_troika(), crate::meta::TreeDescriptor::empty());
        let touched = txn.touch_page(3).unwrap();
        assert_ne!(touched.pgno(), 3);
        assert_eq!(touched.txnid(), txn.front_txnid);
        assert!(txn.gc.retired_pages.contains(3));
    }

    #[test]
    fn touching_already_modifiable_page_is_a_no_op() {
        let storage = MemStorage { pages: RefCell::new(Map::new()), pagesize: 256, first_unallocated: 10 };
        let mut txn = Txn::begin_basal(&storage, &empty_troika(), crate::meta::TreeDescriptor::empty());
        let fresh = txn.new_page(PageFlags::LEAF);
        let pgno = fresh.pgno();
        let touched = txn.touch_page(pgno).unwrap();
        assert_eq!(touched.pgno(), pgno);
        assert!(!txn.gc.retired_pages.contains(pgno));
    }

    #[test]
    fn nested_commit_folds_dirty_pages_into_parent() {
        let storage = MemStorage { pages: RefCell::new(Map::new()), pagesize: 256, first_unallocated: 10 };
        let parent = Txn::begin_basal(&storage, &empty_troika(), crate::meta::TreeDescriptor::empty());
        let mut child = Txn::begin_nested(Box::new(parent));
        let page = child.new_page(PageFlags::LEAF);
        let pgno = page.pgno();
        let parent = child.commit_nested().unwrap();
        assert!(parent.dpl.exists(pgno));
    }

    #[test]
    fn get_dbi_reports_bad_dbi_for_unknown_handle() {
        let storage = MemStorage { pages: RefCell::new(Map::new()), pagesize: 256, first_unallocated: 10 };
        let txn = Txn::begin_basal(&storage, &empty_troika(), crate::meta::TreeDescriptor::empty());
        let err = txn.get_dbi(99).unwrap_err();
        assert!(matches!(err, crate::error::Error::Semantic(crate::error::SemanticError::BadDbi)));
    }

    #[test]
    fn poisoned_txn_rejects_further_checks() {
        let storage = MemStorage { pages: RefCell::new(Map::new()), pagesize: 256, first_unallocated: 10 };
        let mut txn = Txn::begin_basal(&storage, &empty_troika(), crate::meta::TreeDescriptor::empty());
        txn.poison();
        assert!(txn.check_usable().is_err());
    }

    #[test]
    fn dbflags_default_is_empty_placeholder_for_table_creation() {
        assert_eq!(DbFlags::empty().bits(), 0);
    }

    #[test]
    fn spilling_writes_coldest_pages_out_but_keeps_them_readable() {
        let storage = MemStorage { pages: RefCell::new(Map::new()), pagesize: 256, first_unallocated: 10 };
        let mut txn = Txn::begin_basal(&storage, &empty_troika(), crate::meta::TreeDescriptor::empty());
        let mut pgnos = Vec::new();
        for _ in 0..(crate::txn::SPILL_THRESHOLD + 5) {
            pgnos.push(txn.new_page(PageFlags::LEAF).pgno());
        }
        assert_eq!(txn.dpl.len(), pgnos.len());
        txn.maybe_spill().unwrap();
        assert!(txn.dpl.len() < pgnos.len());
        let spilled_pgno = pgnos[0];
        assert!(txn.spill.was_ever_spilled(spilled_pgno) || txn.dpl.exists(spilled_pgno));
        // Whether or not this particular page was the one evicted, every
        // page remains fetchable through get_page either way.
        for &pgno in &pgnos {
            assert!(txn.get_page(pgno).is_ok());
        }
    }

    #[test]
    fn refund_shrinks_tail_past_loose_trailing_pages() {
        let storage = MemStorage { pages: RefCell::new(Map::new()), pagesize: 256, first_unallocated: 10 };
        let mut txn = Txn::begin_basal(&storage, &empty_troika(), crate::meta::TreeDescriptor::empty());
        let page = txn.new_page(PageFlags::LEAF);
        let pgno = page.pgno();
        assert_eq!(txn.next_pgno(), pgno + 1);
        txn.make_loose(pgno);
        txn.refund();
        assert_eq!(txn.next_pgno(), pgno);
    }
}
