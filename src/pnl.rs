//! Page-number list: a sorted `Vec<u64>` of page numbers (spec §3.1 "PNL",
//! §4.2). The original engine stores the count in slot 0 of a raw buffer
//! and grows in `2^10`-page granules to amortize allocation; in safe Rust
//! a `Vec` already amortizes growth, so this module keeps the ordering and
//! search/merge/span semantics without hand-rolling the allocator.
//!
//! Sort order is a build-time switch in the original (`MDBX_PNL_ASCENDING`);
//! this port fixes it ascending, which is the direction `gc_alloc_ex`'s
//! span search and `spill_search`'s bit-packed lookups are simplest to
//! reason about in safe code.

pub type Pgno = u64;

/// Allocation granularity pages are rounded up to when a PNL grows, kept
/// only as documentation of intent since `Vec::reserve` already batches
/// growth; spec'd at `2^10` in the original (§4.2).
pub const GRANULATE: usize = 1 << 10;

/// Sorted, deduplicated list of page numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pnl(Vec<Pgno>);

impl Pnl {
    pub fn new() -> Self {
        Pnl(Vec::new())
    }

    pub fn with_capacity(cap: usize) -> Self {
        Pnl(Vec::with_capacity(cap))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[Pgno] {
        &self.0
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn first(&self) -> Option<Pgno> {
        self.0.first().copied()
    }

    pub fn last(&self) -> Option<Pgno> {
        self.0.last().copied()
    }

    /// Binary search for `pgno`. Returns `Ok(index)` on an exact hit, or
    /// `Err(index)` with the insertion point that keeps the list sorted
    /// (mirrors `pnl_search_nochk`).
    pub fn search(&self, pgno: Pgno) -> std::result::Result<usize, usize> {
        self.0.binary_search(&pgno)
    }

    pub fn contains(&self, pgno: Pgno) -> bool {
        self.search(pgno).is_ok()
    }

    /// Insert a single page number, keeping the list sorted and free of
    /// duplicates. Returns `false` if it was already present.
    pub fn insert(&mut self, pgno: Pgno) -> bool {
        match self.search(pgno) {
            Ok(_) => false,
            Err(at) => {
                self.0.insert(at, pgno);
                true
            }
        }
    }

    /// Append a contiguous span `[pgno, pgno+n)` (mirrors `pnl_append_span`
    /// / `pnl_insert_span`).
    pub fn insert_span(&mut self, pgno: Pgno, n: u64) {
        for p in pgno..pgno + n {
            self.insert(p);
        }
    }

    /// Remove a single page number. Returns `true` if it was present.
    pub fn remove(&mut self, pgno: Pgno) -> bool {
        match self.search(pgno) {
            Ok(at) => {
                self.0.remove(at);
                true
            }
            Err(_) => false,
        }
    }

    /// Merge `other` into `self`, keeping sorted order and de-duplicating
    /// (mirrors `pnl_merge`).
    pub fn merge(&mut self, other: &Pnl) {
        if other.is_empty() {
            return;
        }
        let mut merged = Vec::with_capacity(self.0.len() + other.0.len());
        let (mut i, mut j) = (0, 0);
        while i < self.0.len() && j < other.0.len() {
            match self.0[i].cmp(&other.0[j]) {
                std::cmp::Ordering::Less => {
                    merged.push(self.0[i]);
                    i += 1;
                }
                std::cmp::Ordering::Greater => {
                    merged.push(other.0[j]);
                    j += 1;
                }
                std::cmp::Ordering::Equal => {
                    merged.push(self.0[i]);
                    i += 1;
                    j += 1;
                }
            }
        }
        merged.extend_from_slice(&self.0[i..]);
        merged.extend_from_slice(&other.0[j..]);
        self.0 = merged;
    }

    /// Find the longest run of `n` contiguous page numbers anywhere in the
    /// list and, if found, remove and return its first page number
    /// (mirrors the "contiguous span exists in repnl" branch of
    /// `gc_alloc_ex`, spec §4.6).
    pub fn take_span(&mut self, n: u64) -> Option<Pgno> {
        if n == 0 || (self.0.len() as u64) < n {
            return None;
        }
        let mut run_start = 0usize;
        for i in 1..self.0.len() {
            if self.0[i] != self.0[i - 1] + 1 {
                run_start = i;
            }
            let run_len = (i - run_start + 1) as u64;
            if run_len >= n {
                let span_first_idx = i + 1 - n as usize;
                let pgno = self.0[span_first_idx];
                self.0.drain(span_first_idx..=i);
                return Some(pgno);
            }
        }
        None
    }

    /// Length, in pages, of the longest contiguous run (mirrors
    /// `pnl_maxspan`).
    pub fn maxspan(&self) -> u64 {
        if self.0.is_empty() {
            return 0;
        }
        let mut best = 1u64;
        let mut run = 1u64;
        for i in 1..self.0.len() {
            if self.0[i] == self.0[i - 1] + 1 {
                run += 1;
            } else {
                run = 1;
            }
            best = best.max(run);
        }
        best
    }

    /// Remove and return the lowest page number (used to pop a single
    /// page off the reclaimed list).
    pub fn pop_lowest(&mut self) -> Option<Pgno> {
        if self.0.is_empty() {
            None
        } else {
            Some(self.0.remove(0))
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Pgno> + '_ {
        self.0.iter().copied()
    }

    /// Internal invariant check used by tests and debug assertions: sorted
    /// strictly ascending, no duplicates (mirrors `pnl_check`).
    pub fn check(&self) -> bool {
        self.0.windows(2).all(|w| w[0] < w[1])
    }
}

impl From<Vec<Pgno>> for Pnl {
    fn from(mut v: Vec<Pgno>) -> Self {
        v.sort_unstable();
        v.dedup();
        Pnl(v)
    }
}

impl FromIterator<Pgno> for Pnl {
    fn from_iter<T: IntoIterator<Item = Pgno>>(iter: T) -> Self {
        Pnl::from(iter.into_iter().collect::<Vec<_>>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn insert_keeps_sorted_and_unique() {
        let mut pnl = Pnl::new();
        for p in [5, 1, 3, 1, 5, 2] {
            pnl.insert(p);
        }
        assert_eq!(pnl.as_slice(), &[1, 2, 3, 5]);
        assert!(pnl.check());
    }

    #[test]
    fn take_span_finds_contiguous_run() {
        let mut pnl: Pnl = vec![1, 2, 3, 7, 8, 9, 10, 20].into();
        let first = pnl.take_span(3).unwrap();
        assert_eq!(first, 7);
        assert_eq!(pnl.as_slice(), &[1, 2, 3, 20]);
        assert!(pnl.take_span(3).is_none());
    }

    #[test]
    fn maxspan_finds_longest_run() {
        let pnl: Pnl = vec![1, 2, 3, 10, 11, 50].into();
        assert_eq!(pnl.maxspan(), 3);
    }

    #[test]
    fn merge_dedups_across_lists() {
        let mut a: Pnl = vec![1, 3, 5].into();
        let b: Pnl = vec![2, 3, 4].into();
        a.merge(&b);
        assert_eq!(a.as_slice(), &[1, 2, 3, 4, 5]);
    }

    #[quickcheck]
    fn prop_insert_then_contains(mut values: Vec<u64>) -> bool {
        values.truncate(64);
        let mut pnl = Pnl::new();
        for &v in &values {
            pnl.insert(v);
        }
        pnl.check() && values.iter().all(|v| pnl.contains(*v))
    }
}
