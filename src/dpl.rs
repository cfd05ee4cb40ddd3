//! Dirty-page list, LRU aging, and the spill list (spec §3.1 "DPL"/"Spill
//! list", §4.3, grounded on `original_source/src/dpl.h` and `spill.h`).
//!
//! The original keeps the LRU age word spliced in just before each
//! shadow-allocated page and uses raw-pointer arithmetic to find it. In
//! safe Rust the sidecar lives next to the entry instead (DESIGN NOTES
//! §9: "model the age and the loose-list next-pointer in sidecar
//! structures keyed by pgno").

use crate::page::{Page, Pgno};
use std::collections::BTreeMap;

/// One entry of the dirty-page list.
#[derive(Debug, Clone)]
pub struct DirtyEntry {
    pub pgno: Pgno,
    pub npages: u32,
    pub page: Page,
    pub lru: u32,
}

/// Dirty-page table for the current write transaction (spec §3.1 "DPL").
/// A `BTreeMap` keyed by `pgno` gives sorted iteration and O(log n)
/// search/insert/remove for free, which is what the original's
/// lazily-sorted vector + binary search amounts to in practice.
#[derive(Debug, Default)]
pub struct Dpl {
    entries: BTreeMap<Pgno, DirtyEntry>,
    /// Running total of pages covered, including loose pages not (yet)
    /// represented as separate entries (spec: `pages_including_loose`).
    pub pages_including_loose: u64,
    pub lru_clock: u32,
}

impl Dpl {
    pub fn new() -> Self {
        Dpl::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append (or overwrite) a dirty page, stamping it with the current
    /// LRU clock (spec `dpl_append`).
    pub fn append(&mut self, pgno: Pgno, page: Page, npages: u32) {
        let lru = self.lru_turn();
        self.pages_including_loose += npages as u64;
        self.entries.insert(pgno, DirtyEntry { pgno, npages, page, lru });
    }

    /// Binary search by pgno (spec `dpl_search`); `BTreeMap` gives this
    /// natively.
    pub fn search(&self, pgno: Pgno) -> Option<&DirtyEntry> {
        self.entries.get(&pgno)
    }

    pub fn search_mut(&mut self, pgno: Pgno) -> Option<&mut DirtyEntry> {
        self.entries.get_mut(&pgno)
    }

    pub fn exists(&self, pgno: Pgno) -> bool {
        self.entries.contains_key(&pgno)
    }

    /// Remove the entry for `pgno`, updating `pages_including_loose`
    /// (spec `dpl_remove_ex`).
    pub fn remove(&mut self, pgno: Pgno) -> Option<DirtyEntry> {
        let removed = self.entries.remove(&pgno);
        if let Some(e) = &removed {
            self.pages_including_loose = self.pages_including_loose.saturating_sub(e.npages as u64);
        }
        removed
    }

    /// True if any dirty entry overlaps `[pgno, pgno+npages)` (spec
    /// `dpl_intersect`), used to keep large pages and retires consistent.
    pub fn intersects(&self, pgno: Pgno, npages: u64) -> bool {
        let end = pgno + npages;
        // Any entry starting before `end` whose own end is after `pgno`.
        for (&epgno, entry) in self.entries.range(..end) {
            let eend = epgno + entry.npages as u64;
            if eend > pgno {
                return true;
            }
        }
        false
    }

    pub fn iter(&self) -> impl Iterator<Item = &DirtyEntry> {
        self.entries.values()
    }

    /// Advance the LRU clock by one tick, periodically shifting every
    /// age down to avoid saturation (spec `dpl_lru_turn`/`lru_reduce`).
    pub fn lru_turn(&mut self) -> u32 {
        self.lru_clock = self.lru_clock.wrapping_add(1);
        if self.lru_clock > u32::MAX / 3 {
            self.lru_reduce();
        }
        self.lru_clock
    }

    fn lru_reduce(&mut self) {
        let shift = self.lru_clock / 2;
        for e in self.entries.values_mut() {
            e.lru = e.lru.saturating_sub(shift);
        }
        self.lru_clock -= shift;
    }

    pub fn age(&self, pgno: Pgno) -> Option<u32> {
        self.entries.get(&pgno).map(|e| self.lru_clock.wrapping_sub(e.lru))
    }

    /// Evict the coldest `n` pages by LRU age, returning their page
    /// numbers for the caller to write out to disk (spec §4.3 "Slow path:
    /// sort DPL by LRU age, walk evicting pages").
    pub fn evict_coldest(&mut self, n: usize) -> Vec<Pgno> {
        let mut by_age: Vec<(Pgno, u32)> = self.entries.iter().map(|(&p, e)| (p, e.lru)).collect();
        by_age.sort_by_key(|&(_, lru)| lru);
        by_age.into_iter().take(n).map(|(p, _)| p).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.pages_including_loose = 0;
    }
}

/// Spill list: page numbers written out to disk while still dirty, so a
/// later read can find them again as "dirty" (spec §4.3 "Spill"). The low
/// bit of the packed representation marks a lazy tombstone left behind
/// when a spilled page is unspilled (grounded on `spill.h`'s bit-packed
/// `pnl[i] = pgno << 1 | tombstone`).
#[derive(Debug, Default)]
pub struct SpillList {
    packed: std::collections::BTreeSet<u64>,
}

impl SpillList {
    pub fn new() -> Self {
        SpillList::default()
    }

    fn pack(pgno: Pgno, tombstone: bool) -> u64 {
        (pgno << 1) | tombstone as u64
    }

    pub fn mark_spilled(&mut self, pgno: Pgno) {
        self.packed.remove(&Self::pack(pgno, true));
        self.packed.insert(Self::pack(pgno, false));
    }

    /// Mark a spilled page as unspilled without forgetting it was ever
    /// spilled (spec: "mark LSB to keep the lazy tombstone, reload into
    /// dirty list").
    pub fn unspill(&mut self, pgno: Pgno) {
        if self.packed.remove(&Self::pack(pgno, false)) {
            self.packed.insert(Self::pack(pgno, true));
        }
    }

    pub fn is_spilled(&self, pgno: Pgno) -> bool {
        self.packed.contains(&Self::pack(pgno, false))
    }

    pub fn was_ever_spilled(&self, pgno: Pgno) -> bool {
        self.packed.contains(&Self::pack(pgno, false)) || self.packed.contains(&Self::pack(pgno, true))
    }

    pub fn intersects(&self, pgno: Pgno, npages: u64) -> bool {
        (pgno..pgno + npages).any(|p| self.is_spilled(p))
    }

    pub fn clear(&mut self) {
        self.packed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PageFlags;

    fn dummy_page(pgno: Pgno) -> Page {
        Page::new_empty(512, pgno, 1, PageFlags::LEAF)
    }

    #[test]
    fn append_and_search_roundtrip() {
        let mut dpl = Dpl::new();
        dpl.append(5, dummy_page(5), 1);
        dpl.append(3, dummy_page(3), 2);
        assert!(dpl.exists(5));
        assert!(dpl.exists(3));
        assert!(!dpl.exists(4));
        assert_eq!(dpl.pages_including_loose, 3);
    }

    #[test]
    fn intersects_detects_overlap_with_span() {
        let mut dpl = Dpl::new();
        dpl.append(10, dummy_page(10), 3); // covers 10..13
        assert!(dpl.intersects(12, 5));
        assert!(!dpl.intersects(13, 5));
        assert!(dpl.intersects(8, 3)); // covers 8..11, overlaps at 10
    }

    #[test]
    fn lru_age_increases_as_clock_advances() {
        let mut dpl = Dpl::new();
        dpl.append(1, dummy_page(1), 1);
        let age0 = dpl.age(1).unwrap();
        dpl.append(2, dummy_page(2), 1);
        let age1 = dpl.age(1).unwrap();
        assert!(age1 >= age0);
    }

    #[test]
    fn spill_roundtrip() {
        let mut spill = SpillList::new();
        spill.mark_spilled(7);
        assert!(spill.is_spilled(7));
        spill.unspill(7);
        assert!(!spill.is_spilled(7));
        assert!(spill.was_ever_spilled(7));
    }
}
