//! Node-level operations layered on [`crate::page`]: key comparison,
//! in-page binary search, and typed constructors for branch/leaf/dupfix
//! nodes (spec §4.1, grounded on `original_source/src/node.h`).

use crate::config::DbFlags;
use crate::page::{NodeFlags, Page, PageFlags, Pgno};

/// A key comparator. Tables default to lexicographic byte comparison;
/// `REVERSEKEY`/`INTEGERKEY` flip or replace it (spec §3.1 "Tree
/// descriptor").
pub trait KeyCompare {
    fn compare(&self, a: &[u8], b: &[u8]) -> std::cmp::Ordering;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LexicographicCompare;

impl KeyCompare for LexicographicCompare {
    fn compare(&self, a: &[u8], b: &[u8]) -> std::cmp::Ordering {
        a.cmp(b)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReverseCompare;

impl KeyCompare for ReverseCompare {
    fn compare(&self, a: &[u8], b: &[u8]) -> std::cmp::Ordering {
        b.cmp(a)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IntegerCompare;

impl KeyCompare for IntegerCompare {
    fn compare(&self, a: &[u8], b: &[u8]) -> std::cmp::Ordering {
        // Native-endian fixed-width integers (4 or 8 bytes), spec §4.1.
        match (a.len(), b.len()) {
            (4, 4) => {
                let x = u32::from_ne_bytes(a.try_into().unwrap());
                let y = u32::from_ne_bytes(b.try_into().unwrap());
                x.cmp(&y)
            }
            (8, 8) => {
                let x = u64::from_ne_bytes(a.try_into().unwrap());
                let y = u64::from_ne_bytes(b.try_into().unwrap());
                x.cmp(&y)
            }
            _ => a.cmp(b),
        }
    }
}

/// Build the comparator implied by a table's flags (spec §3.1).
pub fn comparator_for(flags: DbFlags) -> Box<dyn KeyCompare + Send + Sync> {
    if flags.contains(DbFlags::INTEGERKEY) {
        Box::new(IntegerCompare)
    } else if flags.contains(DbFlags::REVERSEKEY) {
        Box::new(ReverseCompare)
    } else {
        Box::new(LexicographicCompare)
    }
}

/// Build the comparator a DUPSORT table uses to order the duplicate
/// values under one key (spec §3.1, `INTEGERDUP`/`REVERSEDUP`).
pub fn dup_comparator_for(flags: DbFlags) -> Box<dyn KeyCompare + Send + Sync> {
    if flags.contains(DbFlags::INTEGERDUP) {
        Box::new(IntegerCompare)
    } else if flags.contains(DbFlags::REVERSEDUP) {
        Box::new(ReverseCompare)
    } else {
        Box::new(LexicographicCompare)
    }
}

/// Translate a DUPSORT table's dup-ordering flags into the `DbFlags` a
/// nested per-key tree of duplicate values should itself be opened with
/// (spec §4.4 "nested tree"): `REVERSEDUP`/`INTEGERDUP` become the
/// nested tree's own `REVERSEKEY`/`INTEGERKEY`.
pub fn nested_flags(flags: DbFlags) -> DbFlags {
    let mut nf = DbFlags::empty();
    if flags.contains(DbFlags::REVERSEDUP) {
        nf |= DbFlags::REVERSEKEY;
    }
    if flags.contains(DbFlags::INTEGERDUP) {
        nf |= DbFlags::INTEGERKEY;
    }
    nf
}

/// Result of an in-page node search: the index of the greatest key ≤
/// target (spec §4.4 `tree_search`/`node_search`), and whether it was an
/// exact match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeSearchResult {
    pub index: usize,
    pub exact: bool,
}

/// Binary search within a page for `key`, using `cmp`. For a branch page
/// this returns the index of the child to descend into (the greatest key
/// ≤ target, or index 0 if target is less than every key — branch slot 0
/// carries no key and always matches the leftmost subtree).
pub fn node_search(page: &Page, key: &[u8], cmp: &dyn KeyCompare) -> NodeSearchResult {
    let n = page.numkeys();
    if n == 0 {
        return NodeSearchResult { index: 0, exact: false };
    }
    let is_branch = page.flags().contains(PageFlags::BRANCH);
    let lo_start = if is_branch { 1 } else { 0 };
    if is_branch && n == 1 {
        return NodeSearchResult { index: 0, exact: false };
    }

    let mut lo = lo_start;
    let mut hi = n; // exclusive
    let mut exact = false;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let mid_key = page.node_key(mid);
        match cmp.compare(mid_key, key) {
            std::cmp::Ordering::Equal => {
                exact = true;
                lo = mid;
                break;
            }
            std::cmp::Ordering::Less => lo = mid + 1,
            std::cmp::Ordering::Greater => hi = mid,
        }
    }
    if exact {
        return NodeSearchResult { index: lo, exact: true };
    }
    // `lo` is the first index whose key is > target; the match is lo-1,
    // clamped so branch/leaf pages never go below their first valid slot.
    let index = if lo == lo_start { lo_start } else { lo - 1 };
    NodeSearchResult { index, exact: false }
}

/// Add a branch node `(key, child_pgno)` at slot `indx` (spec §4.1,
/// `node_add_branch`). Branch node 0 on a page carries no key.
pub fn node_add_branch(page: &mut Page, indx: usize, key: &[u8], child_pgno: Pgno) -> crate::error::Result<()> {
    let key = if indx == 0 { &[][..] } else { key };
    page.insert_node(indx, NodeFlags::empty(), key, &child_pgno.to_le_bytes())
}

/// Add a leaf node with an inline value (spec §4.1, `node_add_leaf`).
pub fn node_add_leaf(page: &mut Page, indx: usize, key: &[u8], value: &[u8], flags: NodeFlags) -> crate::error::Result<()> {
    page.insert_node(indx, flags, key, value)
}

/// Add a leaf node whose value escaped to a large-page chain (spec §4.4
/// "Large values", §3.1.I8): payload is just the first page number, but
/// `aux` must still record the value's true byte length.
pub fn node_add_leaf_big(page: &mut Page, indx: usize, key: &[u8], first_pgno: Pgno, value_len: usize) -> crate::error::Result<()> {
    page.insert_node_raw(indx, NodeFlags::BIG, key, &first_pgno.to_le_bytes(), value_len as u32)
}

/// Add a leaf node carrying a DUPSORT payload (an encoded subpage or
/// nested-tree descriptor) whose `aux` is the encoded byte length, not
/// the 8-byte fixed size a nested-tree descriptor's header might suggest.
pub fn node_add_leaf_dup(page: &mut Page, indx: usize, key: &[u8], flags: NodeFlags, payload: &[u8]) -> crate::error::Result<()> {
    page.insert_node_raw(indx, flags, key, payload, payload.len() as u32)
}

/// Remove node `indx` (spec `node_del`).
pub fn node_del(page: &mut Page, indx: usize) {
    page.remove_node(indx);
}
