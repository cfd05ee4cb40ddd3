//! Reclaimed-key list: a sorted set of txnids represented as a contiguous
//! interval plus an ascending sorted tail list (spec §3.1 "RKL", §4.2,
//! invariant P6, grounded on `original_source/src/rkl.h`).
//!
//! The interval `[solid_begin, solid_end)` absorbs any pushed id that is
//! contiguous with it; anything else lands in the sorted list. Popping
//! prefers the interval edge first so it stays dense. This is what lets
//! `gc_update` fold a large, mostly-contiguous run of retired txnids
//! without ever materializing it as a flat list.

pub type Txnid = u64;

/// Small inline capacity before the list spills to a heap `Vec` — the
/// original reserves 12 inline slots; kept as documentation only since
/// `Vec` already starts empty and grows on demand in safe Rust.
pub const INLINE_CAPACITY: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Rkl {
    solid_begin: Txnid,
    solid_end: Txnid,
    list: Vec<Txnid>,
}

impl Rkl {
    pub fn new() -> Self {
        Rkl {
            solid_begin: 1,
            solid_end: 0,
            list: Vec::new(),
        }
    }

    pub fn clear(&mut self) {
        self.solid_begin = 1;
        self.solid_end = 0;
        self.list.clear();
    }

    /// The interval is empty (`solid_begin > solid_end`) and so is the
    /// list.
    pub fn is_empty(&self) -> bool {
        self.solid_begin > self.solid_end && self.list.is_empty()
    }

    /// Total count of ids held (interval width + list length); invariant
    /// P6 of spec §8.1.
    pub fn len(&self) -> usize {
        let interval_len = if self.solid_begin > self.solid_end {
            0
        } else {
            (self.solid_end - self.solid_begin) as usize
        };
        interval_len + self.list.len()
    }

    pub fn contains(&self, id: Txnid) -> bool {
        (id >= self.solid_begin && id < self.solid_end) || self.list.binary_search(&id).is_ok()
    }

    /// Push one id. `known_continuous` is an optimization hint (the
    /// original's parameter of the same name): when the caller already
    /// knows `id` extends the interval it skips the list search, but
    /// correctness never depends on the hint being accurate here.
    pub fn push(&mut self, id: Txnid, known_continuous: bool) {
        if self.solid_begin > self.solid_end {
            self.solid_begin = id;
            self.solid_end = id + 1;
            return;
        }
        if id + 1 == self.solid_begin {
            self.solid_begin = id;
            self.absorb_list_into_interval_from_below();
            return;
        }
        if id == self.solid_end {
            self.solid_end = id + 1;
            self.absorb_list_into_interval_from_above();
            return;
        }
        if id >= self.solid_begin && id < self.solid_end {
            return; // already covered by the interval
        }
        if known_continuous {
            // caller promised contiguity but it wasn't with the interval;
            // fall through to the regular sorted-insert path below.
        }
        if let Err(at) = self.list.binary_search(&id) {
            self.list.insert(at, id);
        }
    }

    /// After extending `solid_begin` downward, fold in any list entries
    /// that are now contiguous with the new interval edge ("interval
    /// swapping", spec §4.2).
    /// `solid_begin` just moved down by one; the list entry most likely to
    /// now abut it is its *largest* member (the list is ascending, and
    /// every entry is disjoint from the interval, so candidates for the
    /// lower edge sit at the tail of the list).
    fn absorb_list_into_interval_from_below(&mut self) {
        while let Some(&last) = self.list.last() {
            if last + 1 == self.solid_begin {
                self.solid_begin = last;
                self.list.pop();
            } else {
                break;
            }
        }
    }

    /// `solid_end` just moved up by one; the candidate abutting it is the
    /// list's *smallest* member.
    fn absorb_list_into_interval_from_above(&mut self) {
        while let Some(&first) = self.list.first() {
            if first == self.solid_end {
                self.solid_end = first + 1;
                self.list.remove(0);
            } else {
                break;
            }
        }
    }

    /// Remove and return the lowest or highest id, preferring the
    /// interval edge so it stays dense (spec §4.2).
    pub fn pop(&mut self, highest_not_lowest: bool) -> Option<Txnid> {
        if self.is_empty() {
            return None;
        }
        let interval_edge = if self.solid_begin < self.solid_end {
            Some(if highest_not_lowest {
                self.solid_end - 1
            } else {
                self.solid_begin
            })
        } else {
            None
        };
        let list_edge = if highest_not_lowest {
            self.list.last().copied()
        } else {
            self.list.first().copied()
        };

        let take_interval = match (interval_edge, list_edge) {
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (Some(ie), Some(le)) => {
                if highest_not_lowest {
                    ie >= le
                } else {
                    ie <= le
                }
            }
            (None, None) => return None,
        };

        if take_interval {
            let id = interval_edge.unwrap();
            if highest_not_lowest {
                self.solid_end -= 1;
            } else {
                self.solid_begin += 1;
            }
            Some(id)
        } else {
            if highest_not_lowest {
                self.list.pop()
            } else {
                Some(self.list.remove(0))
            }
        }
    }

    pub fn lowest(&self) -> Option<Txnid> {
        if self.is_empty() {
            return None;
        }
        match (self.solid_begin < self.solid_end, self.list.first()) {
            (true, Some(&l)) => Some(self.solid_begin.min(l)),
            (true, None) => Some(self.solid_begin),
            (false, Some(&l)) => Some(l),
            (false, None) => None,
        }
    }

    pub fn highest(&self) -> Option<Txnid> {
        if self.is_empty() {
            return None;
        }
        match (self.solid_begin < self.solid_end, self.list.last()) {
            (true, Some(&l)) => Some((self.solid_end - 1).max(l)),
            (true, None) => Some(self.solid_end - 1),
            (false, Some(&l)) => Some(l),
            (false, None) => None,
        }
    }

    /// Merge `src` into `self`, pushing every id of `src` one at a time.
    /// `ignore_duplicates` mirrors the original's flag but is a no-op
    /// here since `push` already treats duplicates as idempotent.
    pub fn merge(&mut self, src: &Rkl, _ignore_duplicates: bool) {
        if src.solid_begin < src.solid_end {
            for id in src.solid_begin..src.solid_end {
                self.push(id, true);
            }
        }
        for &id in &src.list {
            self.push(id, false);
        }
    }

    /// Ascending iterator over every id held (interval then merged list).
    pub fn iter_ascending(&self) -> RklIter<'_> {
        RklIter {
            rkl: self,
            reverse: false,
            interval_cursor: self.solid_begin,
            list_idx: 0,
        }
    }

    pub fn iter_descending(&self) -> RklIter<'_> {
        RklIter {
            rkl: self,
            reverse: true,
            interval_cursor: self.solid_end,
            list_idx: self.list.len(),
        }
    }

    /// Enumerate the "holes" (gaps) between consecutive ids, used by
    /// `gc_update` to find how spread out a reclaim run is.
    pub fn holes(&self) -> Vec<RklHole> {
        let mut holes = Vec::new();
        let mut prev: Option<Txnid> = None;
        for id in self.iter_ascending() {
            if let Some(p) = prev {
                if id > p + 1 {
                    holes.push(RklHole { begin: p + 1, end: id });
                }
            }
            prev = Some(id);
        }
        holes
    }

    pub fn check(&self) -> bool {
        if self.solid_begin > self.solid_end && !self.list.is_empty() {
            // interval empty is fine, just validate list sort below
        }
        if self.solid_begin < self.solid_end {
            if self
                .list
                .iter()
                .any(|&id| id + 1 == self.solid_begin || id == self.solid_end)
            {
                return false; // should have been absorbed
            }
        }
        self.list.windows(2).all(|w| w[0] < w[1])
    }
}

/// A gap between two reclaimed ids, `[begin, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RklHole {
    pub begin: Txnid,
    pub end: Txnid,
}

/// Iterator over an [`Rkl`], isolating callers from its interval+list
/// representation (spec §4.6: "reachable by `rkl_contain` during the
/// loop" implies callers walk an `Rkl` without caring how it's stored).
pub struct RklIter<'a> {
    rkl: &'a Rkl,
    reverse: bool,
    interval_cursor: Txnid,
    list_idx: usize,
}

impl<'a> Iterator for RklIter<'a> {
    type Item = Txnid;

    fn next(&mut self) -> Option<Txnid> {
        if !self.reverse {
            let next_interval = if self.interval_cursor < self.rkl.solid_end {
                Some(self.interval_cursor)
            } else {
                None
            };
            let next_list = self.rkl.list.get(self.list_idx).copied();
            match (next_interval, next_list) {
                (Some(i), Some(l)) if i < l => {
                    self.interval_cursor += 1;
                    Some(i)
                }
                (Some(_), Some(_l)) => {
                    self.list_idx += 1;
                    next_list
                }
                (Some(i), None) => {
                    self.interval_cursor += 1;
                    Some(i)
                }
                (None, Some(_)) => {
                    self.list_idx += 1;
                    next_list
                }
                (None, None) => None,
            }
        } else {
            let next_interval = if self.interval_cursor > self.rkl.solid_begin {
                Some(self.interval_cursor - 1)
            } else {
                None
            };
            let next_list = if self.list_idx > 0 {
                Some(self.rkl.list[self.list_idx - 1])
            } else {
                None
            };
            match (next_interval, next_list) {
                (Some(i), Some(l)) if i > l => {
                    self.interval_cursor -= 1;
                    Some(i)
                }
                (Some(_), Some(_l)) => {
                    self.list_idx -= 1;
                    next_list
                }
                (Some(i), None) => {
                    self.interval_cursor -= 1;
                    Some(i)
                }
                (None, Some(_)) => {
                    self.list_idx -= 1;
                    next_list
                }
                (None, None) => None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn push_extends_interval_and_absorbs_list() {
        let mut rkl = Rkl::new();
        rkl.push(10, false);
        rkl.push(11, false);
        rkl.push(12, false);
        assert_eq!(rkl.solid_begin, 10);
        assert_eq!(rkl.solid_end, 13);
        assert!(rkl.list.is_empty());

        rkl.push(20, false); // disjoint, goes to the list
        assert_eq!(rkl.list, vec![20]);

        rkl.push(13, false); // contiguous with the interval from above
        assert_eq!(rkl.solid_end, 14);

        rkl.push(19, false); // now contiguous with the standalone 20 *and* close to the interval
        assert_eq!(rkl.list, vec![19, 20]);
    }

    #[test]
    fn pop_prefers_interval_edge() {
        let mut rkl = Rkl::new();
        for id in [5, 6, 7, 100] {
            rkl.push(id, false);
        }
        assert_eq!(rkl.pop(false), Some(5));
        assert_eq!(rkl.pop(true), Some(100));
        assert_eq!(rkl.pop(true), Some(7));
        assert_eq!(rkl.pop(true), Some(6));
        assert_eq!(rkl.pop(true), None);
    }

    #[test]
    fn iter_ascending_merges_interval_and_list() {
        let mut rkl = Rkl::new();
        for id in [1, 2, 3, 10, 12] {
            rkl.push(id, false);
        }
        let collected: Vec<_> = rkl.iter_ascending().collect();
        assert_eq!(collected, vec![1, 2, 3, 10, 12]);
        let rev: Vec<_> = rkl.iter_descending().collect();
        assert_eq!(rev, vec![12, 10, 3, 2, 1]);
    }

    #[test]
    fn holes_reports_gaps() {
        let mut rkl = Rkl::new();
        for id in [1, 2, 5, 6, 9] {
            rkl.push(id, false);
        }
        let holes = rkl.holes();
        assert_eq!(
            holes,
            vec![
                RklHole { begin: 3, end: 5 },
                RklHole { begin: 7, end: 9 },
            ]
        );
    }

    #[test]
    fn merge_combines_two_rkls() {
        let mut a = Rkl::new();
        a.push(1, false);
        a.push(2, false);
        let mut b = Rkl::new();
        b.push(3, false);
        b.push(10, false);
        a.merge(&b, false);
        assert_eq!(a.iter_ascending().collect::<Vec<_>>(), vec![1, 2, 3, 10]);
        assert!(a.check());
    }

    #[test]
    fn push_chains_multiple_absorptions_from_above() {
        let mut rkl = Rkl::new();
        for id in [10, 11, 12, 15, 16, 20] {
            rkl.push(id, false);
        }
        // interval is [10,13), list is [15,16,20]
        rkl.push(13, false); // -> interval [10,14), no absorb yet (14 != 15)
        rkl.push(14, false); // -> interval [10,15), absorbs 15 -> [10,16), absorbs 16 -> [10,17)
        assert_eq!(rkl.iter_ascending().collect::<Vec<_>>(), vec![10, 11, 12, 13, 14, 15, 16, 20]);
        assert!(rkl.check());
    }

    #[quickcheck]
    fn prop_len_matches_contains_count(ids: Vec<u64>) -> bool {
        let mut ids: Vec<u64> = ids.into_iter().map(|x| x % 500 + 1).collect();
        ids.truncate(40);
        let mut rkl = Rkl::new();
        for &id in &ids {
            rkl.push(id, false);
        }
        ids.sort_unstable();
        ids.dedup();
        rkl.check() && rkl.len() == ids.len() && ids.iter().all(|id| rkl.contains(*id))
    }
}
