//! Cursor state machine: stacked traversal, seek, step, and the nested
//! duplicate-cursor used for DUPSORT subtrees (spec §3.1 "Cursor", §4.5,
//! grounded on `original_source/src/cursor.c`).
//!
//! The original signed flags byte and raw stack doubles as a sentinel
//! ("negative top means uninitialized"); here the stack and its
//! occupancy are represented directly instead (DESIGN NOTES §9:
//! "replace with an explicit tagged variant... or a non-signed flag plus
//! a separate `top: Option<u8>`").

use bitflags::bitflags;

use crate::btree::{decode_dup_tree, decode_subpage, fetch_value, tree_search, PageSource};
use crate::config::DbFlags;
use crate::node::{comparator_for, dup_comparator_for, nested_flags, KeyCompare};
use crate::page::{NodeFlags, Page, PageFlags, Pgno};
use crate::error::Result;
use crate::meta::TreeDescriptor;

/// Maximum tree height a cursor's stack can represent (spec §3.1: "16
/// entry page-pointer stack").
pub const STACK_DEPTH: usize = 16;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CursorFlags: u8 {
        /// This is the nested duplicate cursor, not the outer one.
        const INNER = 1 << 0;
        /// The allocator backing this cursor may borrow from FREE_DBI.
        const GCU_PREPARATION = 1 << 1;
        /// Just created; moving in any direction seeds at an end.
        const FRESH = 1 << 2;
        /// The next NEXT/PREV is a no-op because a delete already moved us.
        const AFTER_DELETE = 1 << 3;
        /// Skip the "already on the right page" seek fast path.
        const DISABLE_TREE_SEARCH_FASTPATH = 1 << 4;
        /// On the last row; reads still work but `eof()` reports true.
        const EOF_SOFT = 1 << 5;
        /// Past the last row; reads are disallowed.
        const EOF_HARD = 1 << 6;
    }
}

/// One frame of the cursor's page stack: the page and the slot index
/// currently selected on it (spec I5: `pg[0..=top]` is a valid branch
/// chain with `pg[top]` a leaf).
#[derive(Debug, Clone)]
struct Frame {
    page: Page,
    index: usize,
}

/// Cursor position, replacing the original's `top: i8` sentinel with an
/// explicit tagged state (DESIGN NOTES §9).
#[derive(Debug, Clone, Default)]
enum Position {
    #[default]
    Hollow,
    Pointed(Vec<Frame>),
}

/// How the outer cursor's current leaf node resolves a DUPSORT key's
/// duplicate values, synced every time the outer position moves (spec
/// §4.4 "subpage vs nested tree").
enum DupPosition {
    /// Table isn't DUPSORT, or the outer cursor is hollow.
    None,
    /// Duplicates live inline; `values` is the decoded, sorted list and
    /// `index` the position within it.
    Subpage { values: Vec<Vec<u8>>, index: usize },
    /// Duplicates were promoted to a nested tree; walk it with an
    /// ordinary inner cursor whose keys are the duplicate values.
    Nested(Box<Cursor>),
}

impl std::fmt::Debug for DupPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DupPosition::None => write!(f, "None"),
            DupPosition::Subpage { values, index } => {
                f.debug_struct("Subpage").field("count", &values.len()).field("index", index).finish()
            }
            DupPosition::Nested(_) => write!(f, "Nested"),
        }
    }
}

/// Relation used by the `TO_KEY_*`/`TO_PAIR_*`/`TO_EXACT_KEY_VALUE_*` op
/// family (spec §4.5): which side of `target` the match must land on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Less,
    LessOrEqual,
    Equal,
    GreaterOrEqual,
    Greater,
}

/// An outer or nested-duplicate cursor over one table (spec §3.1
/// "Cursor"). `desc` and `table_flags` describe the tree being walked;
/// `dup` tracks the current key's duplicate-value position for a
/// DUPSORT table.
pub struct Cursor {
    pub desc: TreeDescriptor,
    pub table_flags: DbFlags,
    flags: CursorFlags,
    position: Position,
    dup: DupPosition,
}

/// Outcome of positioning the cursor: the current key/value, or that the
/// cursor ran off one end of the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorResult {
    Found { key: Vec<u8>, value: Vec<u8> },
    NotFound,
}

impl Cursor {
    pub fn new(desc: TreeDescriptor, table_flags: DbFlags) -> Self {
        Cursor {
            desc,
            table_flags,
            flags: CursorFlags::FRESH,
            position: Position::Hollow,
            dup: DupPosition::None,
        }
    }

    fn comparator(&self) -> Box<dyn KeyCompare + Send + Sync> {
        comparator_for(self.table_flags)
    }

    fn dup_comparator(&self) -> Box<dyn KeyCompare + Send + Sync> {
        dup_comparator_for(self.table_flags)
    }

    fn is_dupsort(&self) -> bool {
        self.table_flags.contains(DbFlags::DUPSORT)
    }

    pub fn is_hollow(&self) -> bool {
        matches!(self.position, Position::Hollow)
    }

    pub fn eof(&self) -> bool {
        self.flags.contains(CursorFlags::EOF_HARD) || self.flags.contains(CursorFlags::EOF_SOFT)
    }

    fn current(&self) -> Option<(&Page, usize)> {
        match &self.position {
            Position::Pointed(stack) => stack.last().map(|f| (&f.page, f.index)),
            Position::Hollow => None,
        }
    }

    /// Resolve the logical value under the outer cursor's current leaf
    /// slot, following a BIG node's large-page span (spec §4.4).
    fn current_outer_value(&self, src: &dyn PageSource) -> Result<Option<Vec<u8>>> {
        match self.current() {
            Some((page, idx)) if idx < page.numkeys() => Ok(Some(fetch_value(src, page, idx)?)),
            _ => Ok(None),
        }
    }

    fn current_key(&self) -> Option<Vec<u8>> {
        self.current().and_then(|(page, idx)| if idx < page.numkeys() { Some(page.node_key(idx).to_vec()) } else { None })
    }

    /// Re-sync `dup` against whatever leaf slot the outer position now
    /// names (spec §4.4): decode a subpage, open a nested cursor seeded
    /// at its first entry, or clear it entirely for a plain/BIG node or a
    /// non-DUPSORT table.
    fn sync_dup(&mut self, src: &dyn PageSource) -> Result<()> {
        self.dup = DupPosition::None;
        if !self.is_dupsort() {
            return Ok(());
        }
        let Some((page, idx)) = self.current() else { return Ok(()) };
        if idx >= page.numkeys() {
            return Ok(());
        }
        let header = page.node_header(idx);
        if header.flags.contains(NodeFlags::TREE) {
            let nested_desc = decode_dup_tree(page.node_value(idx), nested_flags(self.table_flags));
            let mut nc = Cursor::new(nested_desc, nested_flags(self.table_flags));
            nc.flags.insert(CursorFlags::INNER);
            nc.first(src)?;
            self.dup = DupPosition::Nested(Box::new(nc));
        } else if header.flags.contains(NodeFlags::DUP) {
            let values = decode_subpage(page.node_value(idx));
            self.dup = DupPosition::Subpage { values, index: 0 };
        }
        Ok(())
    }

    /// The value the cursor currently reports to callers: for a DUPSORT
    /// table this is the current duplicate, not the raw leaf payload
    /// (which may be an encoded subpage or nested-tree descriptor).
    fn current_pair(&self, src: &dyn PageSource) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let Some(key) = self.current_key() else { return Ok(None) };
        match &self.dup {
            DupPosition::None => Ok(self.current_outer_value(src)?.map(|v| (key, v))),
            DupPosition::Subpage { values, index } => Ok(values.get(*index).map(|v| (key, v.clone()))),
            DupPosition::Nested(nc) => Ok(nc.current_pair(src)?.map(|(v, _)| (key, v))),
        }
    }

    fn yield_synced(&mut self, src: &dyn PageSource) -> Result<CursorResult> {
        self.sync_dup(src)?;
        self.yield_current(src)
    }

    fn yield_current(&mut self, src: &dyn PageSource) -> Result<CursorResult> {
        match self.current_pair(src)? {
            Some((k, v)) => Ok(CursorResult::Found { key: k, value: v }),
            None => {
                self.flags.insert(CursorFlags::EOF_HARD);
                Ok(CursorResult::NotFound)
            }
        }
    }

    /// Re-enter the tree from the root, landing on the first (leftmost)
    /// or last (rightmost) leaf entry (spec §4.5 "FIRST / LAST").
    pub fn first(&mut self, src: &dyn PageSource) -> Result<CursorResult> {
        self.seed(src, true)
    }

    pub fn last(&mut self, src: &dyn PageSource) -> Result<CursorResult> {
        self.seed(src, false)
    }

    fn seed(&mut self, src: &dyn PageSource, leftmost: bool) -> Result<CursorResult> {
        self.flags.remove(CursorFlags::AFTER_DELETE | CursorFlags::EOF_SOFT | CursorFlags::EOF_HARD);
        if self.desc.is_empty_tree() {
            self.position = Position::Hollow;
            self.dup = DupPosition::None;
            self.flags.insert(CursorFlags::EOF_HARD);
            return Ok(CursorResult::NotFound);
        }
        let mut stack = Vec::new();
        let mut pgno = self.desc.root;
        loop {
            let page = src.get(pgno)?;
            let is_branch = page.flags().contains(PageFlags::BRANCH);
            let index = if leftmost { 0 } else { page.numkeys().saturating_sub(1) };
            if is_branch {
                let child = page.node_child_pgno(index);
                stack.push(Frame { page, index });
                pgno = child;
            } else {
                stack.push(Frame { page, index });
                break;
            }
        }
        self.position = Position::Pointed(stack);
        self.flags.remove(CursorFlags::FRESH);
        if !leftmost {
            self.sync_dup(src)?;
            if let DupPosition::Subpage { values, index } = &mut self.dup {
                *index = values.len().saturating_sub(1);
            }
            if let DupPosition::Nested(nc) = &mut self.dup {
                nc.last(src)?;
            }
            return self.yield_current(src);
        }
        self.yield_synced(src)
    }

    /// Position on `key` (spec §4.5 `cursor_seek`/SET family). Falls back
    /// to a full `tree_search` on every call; the original's "are we
    /// already on the right page" fast path is an optimization this
    /// module intentionally omits in favor of always-correct descent.
    pub fn seek(&mut self, src: &dyn PageSource, key: &[u8]) -> Result<CursorResult> {
        self.flags.remove(CursorFlags::AFTER_DELETE | CursorFlags::EOF_SOFT | CursorFlags::EOF_HARD | CursorFlags::FRESH);
        if self.desc.is_empty_tree() {
            self.position = Position::Hollow;
            self.dup = DupPosition::None;
            self.flags.insert(CursorFlags::EOF_HARD);
            return Ok(CursorResult::NotFound);
        }
        let cmp = self.comparator();
        let search = tree_search(src, self.desc.root, key, cmp.as_ref())?;
        let exact = search.exact;
        self.position = Position::Pointed(search.path.into_iter().map(|e| Frame { page: e.page, index: e.index }).collect());
        if !exact {
            self.position = Position::Hollow;
            self.dup = DupPosition::None;
            return Ok(CursorResult::NotFound);
        }
        self.yield_synced(src)
    }

    /// Position on the first key ≥ `key` (spec `SET_RANGE`).
    pub fn seek_range(&mut self, src: &dyn PageSource, key: &[u8]) -> Result<CursorResult> {
        if self.desc.is_empty_tree() {
            self.position = Position::Hollow;
            self.dup = DupPosition::None;
            self.flags.insert(CursorFlags::EOF_HARD);
            return Ok(CursorResult::NotFound);
        }
        let cmp = self.comparator();
        let search = tree_search(src, self.desc.root, key, cmp.as_ref())?;
        let mut stack: Vec<Frame> = search.path.into_iter().map(|e| Frame { page: e.page, index: e.index }).collect();
        let leaf = stack.last_mut().expect("search always yields a leaf");
        if !search.exact && leaf.index < leaf.page.numkeys() {
            let key_at = leaf.page.node_key(leaf.index);
            if cmp.compare(key_at, key) == std::cmp::Ordering::Less {
                leaf.index += 1;
            }
        }
        if stack.last().unwrap().index >= stack.last().unwrap().page.numkeys() {
            self.position = Position::Pointed(stack);
            return self.step(src, true);
        }
        self.position = Position::Pointed(stack);
        self.yield_synced(src)
    }

    /// First key ≥ `key` (spec `SET_LOWERBOUND`); an alias kept distinct
    /// from [`Cursor::seek_range`] because the op matrix names them
    /// separately even though the behavior here coincides.
    pub fn set_lowerbound(&mut self, src: &dyn PageSource, key: &[u8]) -> Result<CursorResult> {
        self.seek_range(src, key)
    }

    /// First key strictly greater than `key` (spec `SET_UPPERBOUND`).
    pub fn set_upperbound(&mut self, src: &dyn PageSource, key: &[u8]) -> Result<CursorResult> {
        let r = self.seek_range(src, key)?;
        match r {
            CursorResult::Found { key: found, .. } if found == key => self.step(src, true),
            other => Ok(other),
        }
    }

    /// Generalized `TO_KEY_*` op: position relative to `target` by
    /// `rel` (spec §4.5 `TO_KEY_LESSER_THAN`/`..._OR_EQUAL`/`EQUAL`/
    /// `GREATER_OR_EQUAL`/`..._THAN`).
    pub fn to_key(&mut self, src: &dyn PageSource, target: &[u8], rel: Relation) -> Result<CursorResult> {
        match rel {
            Relation::Equal => self.seek(src, target),
            Relation::GreaterOrEqual => self.seek_range(src, target),
            Relation::Greater => self.set_upperbound(src, target),
            Relation::LessOrEqual | Relation::Less => {
                let ge = self.seek_range(src, target)?;
                let exact_match = matches!(&ge, CursorResult::Found { key, .. } if key == target);
                if rel == Relation::LessOrEqual && exact_match {
                    return Ok(ge);
                }
                match ge {
                    CursorResult::Found { .. } => self.step(src, false),
                    CursorResult::NotFound => self.last(src),
                }
            }
        }
    }

    /// Generalized `TO_PAIR_*` op for DUPSORT tables (spec §4.5): same
    /// relation semantics as [`Cursor::to_key`] but comparing the full
    /// `(key, value)` pair, so two entries sharing a key are ordered by
    /// their duplicate value.
    pub fn to_pair(&mut self, src: &dyn PageSource, key: &[u8], value: &[u8], rel: Relation) -> Result<CursorResult> {
        let key_r = self.seek(src, key)?;
        let CursorResult::Found { .. } = key_r else {
            // No exact key; fall back to key-only relational positioning.
            return self.to_key(src, key, rel);
        };
        self.seek_dup_within_key(src, value, rel)
    }

    /// Like [`Cursor::to_pair`] but requires `key` to match exactly;
    /// used by the `TO_EXACT_KEY_VALUE_*` op family, which — unlike
    /// `TO_PAIR_*` — never falls back to a neighboring key.
    pub fn to_exact_key_value(&mut self, src: &dyn PageSource, key: &[u8], value: &[u8], rel: Relation) -> Result<CursorResult> {
        let key_r = self.seek(src, key)?;
        if !matches!(key_r, CursorResult::Found { .. }) {
            self.position = Position::Hollow;
            self.dup = DupPosition::None;
            return Ok(CursorResult::NotFound);
        }
        self.seek_dup_within_key(src, value, rel)
    }

    fn seek_dup_within_key(&mut self, src: &dyn PageSource, value: &[u8], rel: Relation) -> Result<CursorResult> {
        let cmp = self.dup_comparator();

        // Each branch below only mutates `self.dup` and returns whether
        // the position now satisfies `rel`; the borrow of `self.dup`
        // ends with the `match`, so the follow-up `self.yield_current`
        // call (which needs `&mut self` as a whole) is never overlapping
        // with it.
        let satisfied = match &mut self.dup {
            DupPosition::None => {
                let cur = self.current_outer_value(src)?;
                cur.as_deref().map(|v| satisfies(cmp.compare(v, value), rel)).unwrap_or(false)
            }
            DupPosition::Subpage { values, index } => match locate_in_sorted(values, value, rel, cmp.as_ref()) {
                Some(i) => {
                    *index = i;
                    true
                }
                None => false,
            },
            DupPosition::Nested(nc) => matches!(nc.to_key(src, value, rel)?, CursorResult::Found { .. }),
        };

        if satisfied {
            self.yield_current(src)
        } else {
            self.position = Position::Hollow;
            Ok(CursorResult::NotFound)
        }
    }

    /// Position on the exact `(key, value)` pair (spec `GET_BOTH`).
    pub fn get_both(&mut self, src: &dyn PageSource, key: &[u8], value: &[u8]) -> Result<CursorResult> {
        self.to_exact_key_value(src, key, value, Relation::Equal)
    }

    /// Position on `key` with the first duplicate ≥ `value` (spec
    /// `GET_BOTH_RANGE`).
    pub fn get_both_range(&mut self, src: &dyn PageSource, key: &[u8], value: &[u8]) -> Result<CursorResult> {
        self.to_exact_key_value(src, key, value, Relation::GreaterOrEqual)
    }

    /// Step to the next (`forward=true`) or previous entry, crossing
    /// page boundaries by popping to the nearest ancestor with a usable
    /// slot and descending again (spec §4.5 "NEXT / PREV"). For a
    /// DUPSORT key this steps through every duplicate before crossing to
    /// a neighboring key — use [`Cursor::next_nodup`]/[`Cursor::prev_nodup`]
    /// to skip straight past them.
    pub fn step(&mut self, src: &dyn PageSource, forward: bool) -> Result<CursorResult> {
        if self.flags.contains(CursorFlags::AFTER_DELETE) {
            self.flags.remove(CursorFlags::AFTER_DELETE);
            if let Some((page, idx)) = self.current() {
                if idx < page.numkeys() {
                    return self.yield_synced(src);
                }
            }
        }
        if self.is_dupsort() {
            if let Some(r) = self.step_dup(src, forward)? {
                return Ok(r);
            }
        }
        self.step_outer(src, forward)
    }

    /// Advance within the current key's duplicate set only, returning
    /// `None` when there is nowhere left to go and the outer cursor
    /// should advance instead.
    fn step_dup(&mut self, src: &dyn PageSource, forward: bool) -> Result<Option<CursorResult>> {
        // As in `seek_dup_within_key`: decide whether we moved with the
        // borrow of `self.dup` scoped to this `match`, then call
        // `self.yield_current` (which needs all of `self`) afterward.
        let moved = match &mut self.dup {
            DupPosition::None => false,
            DupPosition::Subpage { values, index } => {
                if forward && *index + 1 < values.len() {
                    *index += 1;
                    true
                } else if !forward && *index > 0 {
                    *index -= 1;
                    true
                } else {
                    false
                }
            }
            DupPosition::Nested(nc) => {
                let before = nc.eof();
                let r = nc.step(src, forward)?;
                !before && !matches!(r, CursorResult::NotFound)
            }
        };

        if moved {
            Ok(Some(self.yield_current(src)?))
        } else {
            Ok(None)
        }
    }

    fn step_outer(&mut self, src: &dyn PageSource, forward: bool) -> Result<CursorResult> {
        let mut stack = match std::mem::take(&mut self.position) {
            Position::Pointed(s) => s,
            Position::Hollow => return self.first_or_last(src, forward),
        };

        loop {
            let frame = stack.last_mut().expect("non-empty stack");
            let can_advance = if forward {
                frame.index + 1 < frame.page.numkeys()
            } else {
                frame.index > 0
            };
            if can_advance {
                if forward {
                    frame.index += 1;
                } else {
                    frame.index -= 1;
                }
                break;
            }
            stack.pop();
            if stack.is_empty() {
                self.position = Position::Hollow;
                self.dup = DupPosition::None;
                self.flags.insert(CursorFlags::EOF_HARD);
                return Ok(CursorResult::NotFound);
            }
        }

        // Descend back down to a leaf from the slot we just advanced to.
        loop {
            let frame = stack.last().expect("non-empty stack");
            if frame.page.flags().contains(PageFlags::BRANCH) {
                let child_pgno = frame.page.node_child_pgno(frame.index);
                let child = src.get(child_pgno)?;
                let index = if forward { 0 } else { child.numkeys().saturating_sub(1) };
                stack.push(Frame { page: child, index });
            } else {
                break;
            }
        }

        self.position = Position::Pointed(stack);
        self.sync_dup(src)?;
        if !forward {
            if let DupPosition::Subpage { values, index } = &mut self.dup {
                *index = values.len().saturating_sub(1);
            }
            if let DupPosition::Nested(nc) = &mut self.dup {
                nc.last(src)?;
            }
        }
        self.yield_current(src)
    }

    /// Advance to the next distinct key, skipping any remaining
    /// duplicates of the current one (spec `NEXT_NODUP`).
    pub fn next_nodup(&mut self, src: &dyn PageSource) -> Result<CursorResult> {
        self.step_outer(src, true)
    }

    /// Retreat to the previous distinct key (spec `PREV_NODUP`).
    pub fn prev_nodup(&mut self, src: &dyn PageSource) -> Result<CursorResult> {
        self.step_outer(src, false)
    }

    /// Advance within the current key's duplicates only; `NotFound`
    /// (without moving) once the last duplicate is passed (spec
    /// `NEXT_DUP`).
    pub fn next_dup(&mut self, src: &dyn PageSource) -> Result<CursorResult> {
        match self.step_dup(src, true)? {
            Some(r) => Ok(r),
            None => Ok(CursorResult::NotFound),
        }
    }

    /// Retreat within the current key's duplicates only (spec `PREV_DUP`).
    pub fn prev_dup(&mut self, src: &dyn PageSource) -> Result<CursorResult> {
        match self.step_dup(src, false)? {
            Some(r) => Ok(r),
            None => Ok(CursorResult::NotFound),
        }
    }

    /// All duplicate values under the current key in one call (spec
    /// `GET_MULTIPLE`).
    pub fn get_multiple(&self, src: &dyn PageSource) -> Result<Vec<Vec<u8>>> {
        match &self.dup {
            DupPosition::None => Ok(self.current_outer_value(src)?.into_iter().collect()),
            DupPosition::Subpage { values, .. } => Ok(values.clone()),
            DupPosition::Nested(nc) => nc.collect_all_keys(src),
        }
    }

    fn collect_all_keys(&self, src: &dyn PageSource) -> Result<Vec<Vec<u8>>> {
        let mut nc = Cursor::new(self.desc.clone(), self.table_flags);
        let mut out = Vec::new();
        let mut r = nc.first(src)?;
        while let CursorResult::Found { key, .. } = r {
            out.push(key);
            r = nc.step_outer(src, true)?;
        }
        Ok(out)
    }

    /// Advance to the next key and return its full duplicate batch (spec
    /// `NEXT_MULTIPLE`).
    pub fn next_multiple(&mut self, src: &dyn PageSource) -> Result<Vec<Vec<u8>>> {
        match self.next_nodup(src)? {
            CursorResult::Found { .. } => self.get_multiple(src),
            CursorResult::NotFound => Ok(Vec::new()),
        }
    }

    /// Seek `key` and return its full duplicate batch in one call (spec
    /// `SEEK_AND_GET_MULTIPLE`).
    pub fn seek_and_get_multiple(&mut self, src: &dyn PageSource, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        match self.seek(src, key)? {
            CursorResult::Found { .. } => self.get_multiple(src),
            CursorResult::NotFound => Ok(Vec::new()),
        }
    }

    fn first_or_last(&mut self, src: &dyn PageSource, forward: bool) -> Result<CursorResult> {
        if forward {
            self.first(src)
        } else {
            self.last(src)
        }
    }

    /// Mark the cursor HOLLOW because its position was deleted out from
    /// under it by another cursor's mutation (spec §4.5 "cursor manager
    /// walks... marking a cursor HOLLOW if its position was deleted").
    pub fn invalidate(&mut self) {
        self.position = Position::Hollow;
        self.dup = DupPosition::None;
        self.flags.insert(CursorFlags::AFTER_DELETE);
    }

    pub fn nested(&self) -> Option<&Cursor> {
        match &self.dup {
            DupPosition::Nested(nc) => Some(nc),
            _ => None,
        }
    }

    pub fn set_nested(&mut self, cursor: Cursor) {
        self.dup = DupPosition::Nested(Box::new(cursor));
    }

    pub fn clear_nested(&mut self) {
        self.dup = DupPosition::None;
    }
}

fn satisfies(ord: std::cmp::Ordering, rel: Relation) -> bool {
    use std::cmp::Ordering::*;
    match rel {
        Relation::Less => ord == Less,
        Relation::LessOrEqual => ord != Greater,
        Relation::Equal => ord == Equal,
        Relation::GreaterOrEqual => ord != Less,
        Relation::Greater => ord == Greater,
    }
}

/// Find the index in a sorted `values` list satisfying `rel` against
/// `target`, choosing the boundary entry for the directional relations
/// (closest-from-below for `Less`/`LessOrEqual`, closest-from-above for
/// `GreaterOrEqual`/`Greater`).
fn locate_in_sorted(values: &[Vec<u8>], target: &[u8], rel: Relation, cmp: &dyn KeyCompare) -> Option<usize> {
    match rel {
        Relation::Equal => values.iter().position(|v| cmp.compare(v, target) == std::cmp::Ordering::Equal),
        Relation::GreaterOrEqual => values.iter().position(|v| cmp.compare(v, target) != std::cmp::Ordering::Less),
        Relation::Greater => values.iter().position(|v| cmp.compare(v, target) == std::cmp::Ordering::Greater),
        Relation::LessOrEqual => values.iter().rposition(|v| cmp.compare(v, target) != std::cmp::Ordering::Greater),
        Relation::Less => values.iter().rposition(|v| cmp.compare(v, target) == std::cmp::Ordering::Less),
    }
}

/// Check whether a candidate search index in a leaf actually names an
/// exact key match, for callers that only have a `NodeSearchResult` and
/// want the classic GET_BOTH comparison without re-running `node_search`.
pub fn exact_match(page: &Page, idx: usize, key: &[u8], cmp: &dyn KeyCompare) -> bool {
    idx < page.numkeys() && cmp.compare(page.node_key(idx), key) == std::cmp::Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::tree_insert;
    use std::collections::HashMap;

    struct MemSource {
        pages: std::cell::RefCell<HashMap<Pgno, Page>>,
        next: std::cell::Cell<Pgno>,
        pagesize: usize,
    }

    impl MemSource {
        fn new(pagesize: usize) -> Self {
            MemSource { pages: std::cell::RefCell::new(HashMap::new()), next: std::cell::Cell::new(1), pagesize }
        }
    }

    impl PageSource for MemSource {
        fn get(&self, pgno: Pgno) -> Result<Page> {
            Ok(self.pages.borrow().get(&pgno).expect("page exists").clone())
        }
        fn touch(&mut self, pgno: Pgno) -> Result<Page> {
            Ok(self.pages.borrow().get(&pgno).expect("page exists").clone())
        }
        fn alloc(&mut self, flags: PageFlags) -> Result<Page> {
            let pgno = self.next.get();
            self.next.set(pgno + 1);
            Ok(Page::new_empty(self.pagesize, pgno, 1, flags))
        }
        fn alloc_span(&mut self, npages: u32) -> Result<Page> {
            let pgno = self.next.get();
            self.next.set(pgno + npages as u64);
            Ok(Page::new_large_span(self.pagesize, npages, pgno, 1))
        }
        fn put(&mut self, page: Page) -> Result<()> {
            self.pages.borrow_mut().insert(page.pgno(), page);
            Ok(())
        }
        fn retire(&mut self, pgno: Pgno) {
            self.pages.borrow_mut().remove(&pgno);
        }
        fn retire_span(&mut self, pgno: Pgno, npages: u32) {
            for p in pgno..pgno + npages as u64 {
                self.pages.borrow_mut().remove(&p);
            }
        }
        fn pagesize(&self) -> usize {
            self.pagesize
        }
    }

    fn build(src: &mut MemSource, keys: &[&str]) -> TreeDescriptor {
        let mut desc = TreeDescriptor::empty();
        for k in keys {
            tree_insert(src, &mut desc, k.as_bytes(), b"v", false, false, 1).unwrap();
        }
        desc
    }

    fn build_dupsort(src: &mut MemSource, entries: &[(&str, &str)]) -> TreeDescriptor {
        let mut desc = TreeDescriptor::empty();
        desc.flags = DbFlags::DUPSORT;
        for (k, v) in entries {
            tree_insert(src, &mut desc, k.as_bytes(), v.as_bytes(), false, false, 1).unwrap();
        }
        desc
    }

    #[test]
    fn first_and_step_visit_in_order() {
        let mut src = MemSource::new(256);
        let desc = build(&mut src, &["a", "b", "c", "d"]);
        let mut cur = Cursor::new(desc, DbFlags::empty());
        let mut seen = Vec::new();
        let mut r = cur.first(&src).unwrap();
        while let CursorResult::Found { key, .. } = r {
            seen.push(String::from_utf8(key).unwrap());
            r = cur.step(&src, true).unwrap();
        }
        assert_eq!(seen, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn seek_finds_exact_and_reports_not_found_otherwise() {
        let mut src = MemSource::new(256);
        let desc = build(&mut src, &["a", "b", "c"]);
        let mut cur = Cursor::new(desc, DbFlags::empty());
        let r = cur.seek(&src, b"b").unwrap();
        assert_eq!(r, CursorResult::Found { key: b"b".to_vec(), value: b"v".to_vec() });
        let r2 = cur.seek(&src, b"zzz").unwrap();
        assert_eq!(r2, CursorResult::NotFound);
    }

    #[test]
    fn seek_range_lands_on_next_key_when_not_exact() {
        let mut src = MemSource::new(256);
        let desc = build(&mut src, &["a", "c", "e"]);
        let mut cur = Cursor::new(desc, DbFlags::empty());
        let r = cur.seek_range(&src, b"b").unwrap();
        assert_eq!(r, CursorResult::Found { key: b"c".to_vec(), value: b"v".to_vec() });
    }

    #[test]
    fn empty_tree_first_is_not_found_and_hollow() {
        let src = MemSource::new(256);
        let desc = TreeDescriptor::empty();
        let mut cur = Cursor::new(desc, DbFlags::empty());
        let r = cur.first(&src).unwrap();
        assert_eq!(r, CursorResult::NotFound);
        assert!(cur.is_hollow());
        assert!(cur.eof());
    }

    #[test]
    fn set_upperbound_skips_an_exact_match() {
        let mut src = MemSource::new(256);
        let desc = build(&mut src, &["a", "c", "e"]);
        let mut cur = Cursor::new(desc, DbFlags::empty());
        let r = cur.set_upperbound(&src, b"c").unwrap();
        assert_eq!(r, CursorResult::Found { key: b"e".to_vec(), value: b"v".to_vec() });
    }

    #[test]
    fn to_key_less_than_lands_on_the_floor_entry() {
        let mut src = MemSource::new(256);
        let desc = build(&mut src, &["a", "c", "e"]);
        let mut cur = Cursor::new(desc, DbFlags::empty());
        let r = cur.to_key(&src, b"d", Relation::Less).unwrap();
        assert_eq!(r, CursorResult::Found { key: b"c".to_vec(), value: b"v".to_vec() });
    }

    #[test]
    fn dupsort_next_dup_walks_subpage_then_next_nodup_skips_to_new_key() {
        let mut src = MemSource::new(256);
        let desc = build_dupsort(&mut src, &[("k1", "a"), ("k1", "b"), ("k1", "c"), ("k2", "x")]);
        let mut cur = Cursor::new(desc, DbFlags::DUPSORT);
        let r = cur.seek(&src, b"k1").unwrap();
        assert_eq!(r, CursorResult::Found { key: b"k1".to_vec(), value: b"a".to_vec() });
        let r = cur.next_dup(&src).unwrap();
        assert_eq!(r, CursorResult::Found { key: b"k1".to_vec(), value: b"b".to_vec() });
        let r = cur.next_dup(&src).unwrap();
        assert_eq!(r, CursorResult::Found { key: b"k1".to_vec(), value: b"c".to_vec() });
        let r = cur.next_dup(&src).unwrap();
        assert_eq!(r, CursorResult::NotFound);
        let r = cur.next_nodup(&src).unwrap();
        assert_eq!(r, CursorResult::Found { key: b"k2".to_vec(), value: b"x".to_vec() });
    }

    #[test]
    fn get_both_range_positions_on_first_dup_at_or_above_value() {
        let mut src = MemSource::new(256);
        let desc = build_dupsort(&mut src, &[("k1", "a"), ("k1", "c"), ("k1", "e")]);
        let mut cur = Cursor::new(desc, DbFlags::DUPSORT);
        let r = cur.get_both_range(&src, b"k1", b"b").unwrap();
        assert_eq!(r, CursorResult::Found { key: b"k1".to_vec(), value: b"c".to_vec() });
    }

    #[test]
    fn get_both_reports_not_found_for_an_absent_value() {
        let mut src = MemSource::new(256);
        let desc = build_dupsort(&mut src, &[("k1", "a"), ("k1", "c")]);
        let mut cur = Cursor::new(desc, DbFlags::DUPSORT);
        let r = cur.get_both(&src, b"k1", b"zzz").unwrap();
        assert_eq!(r, CursorResult::NotFound);
    }

    #[test]
    fn get_multiple_returns_every_duplicate_under_the_current_key() {
        let mut src = MemSource::new(256);
        let desc = build_dupsort(&mut src, &[("k1", "a"), ("k1", "b"), ("k1", "c")]);
        let mut cur = Cursor::new(desc, DbFlags::DUPSORT);
        cur.seek(&src, b"k1").unwrap();
        let all = cur.get_multiple(&src).unwrap();
        assert_eq!(all, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }
}
