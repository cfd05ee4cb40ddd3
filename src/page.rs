//! On-disk page layout and low-level node-slot bookkeeping (spec §3.1
//! "Page"/"Node", §4.1).
//!
//! A page is a fixed-size byte buffer. Nodes live in a region that grows
//! downward from the tail slot table and upward from the header; this
//! mirrors the classic slotted-page design the teacher's `page.rs` only
//! sketched (`BranchPageElement`/`LeafPageElement`) and the original
//! engine implements in C via `page_numkeys`/`page_room`.
//!
//! Pages read from the memory map are copied into an owned buffer before
//! any accessor touches them (see [`crate::env::Env::read_page`]); this
//! trades the original's zero-copy "pure, on mmap" read path for a much
//! simpler ownership story, which is recorded as a deliberate
//! simplification in `DESIGN.md`.

use bitflags::bitflags;
use std::convert::TryInto;

use crate::error::{CorruptionError, Result};

pub type Pgno = u64;
pub type Txnid = u64;

pub const INVALID_PGNO: Pgno = u64::MAX;

/// Page header size, in bytes. Kept generous (32 bytes) relative to the
/// original's packed C layout so every field is naturally aligned.
pub const PAGE_HDR_SIZE: usize = 32;

/// Node header size, in bytes (spec §4.1: "Node headers are 8 bytes").
pub const NODE_HDR_SIZE: usize = 8;

/// Size of one slot in the page's offset table.
pub const SLOT_SIZE: usize = 2;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u16 {
        const BRANCH   = 1 << 0;
        const LEAF     = 1 << 1;
        const LARGE    = 1 << 2;
        const DUPFIX   = 1 << 3;
        const SUBPAGE  = 1 << 4;
        const SPILLED  = 1 << 5;
        const LOOSE    = 1 << 6;
        const BAD      = 1 << 7;
        const FROZEN   = 1 << 8;
        const META     = 1 << 9;
        const FREELIST = 1 << 10;
    }
}

bitflags! {
    /// Node-level flags (spec §3.1 "Node").
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NodeFlags: u8 {
        /// Value escaped to a large-page chain; payload is the first pgno.
        const BIG  = 1 << 0;
        /// Value is a nested tree descriptor (DUPSORT promoted subtree).
        const TREE = 1 << 1;
        /// Value is a DUPSORT duplicate (subpage or, with TREE, nested tree).
        const DUP  = 1 << 2;
    }
}

#[inline(always)]
fn even_ceil(n: usize) -> usize {
    (n + 1) & !1
}

/// Upper bound on a branch-node key, derived from pagesize (spec §4.1).
pub fn branch_node_max(pagesize: usize) -> usize {
    even_ceil((pagesize - PAGE_HDR_SIZE - SLOT_SIZE - NODE_HDR_SIZE) / 2 - SLOT_SIZE) & !1
}

/// Upper bound on a leaf-node's combined key+value, derived from pagesize.
pub fn leaf_node_max(pagesize: usize) -> usize {
    (even_ceil((pagesize - PAGE_HDR_SIZE) / 2)).saturating_sub(SLOT_SIZE)
}

/// An owned, fixed-size page buffer with typed accessors for the header
/// and slot table.
#[derive(Debug, Clone)]
pub struct Page {
    buf: Vec<u8>,
}

impl Page {
    /// A freshly zeroed page of `pagesize` bytes, stamped with `pgno` and
    /// `txnid` and initialized empty for `flags` (BRANCH or LEAF).
    pub fn new_empty(pagesize: usize, pgno: Pgno, txnid: Txnid, flags: PageFlags) -> Self {
        let mut p = Page {
            buf: vec![0u8; pagesize],
        };
        p.set_pgno(pgno);
        p.set_txnid(txnid);
        p.set_flags(flags);
        p.set_lower(PAGE_HDR_SIZE as u16);
        p.set_upper(pagesize as u16);
        p
    }

    pub fn from_bytes(buf: Vec<u8>) -> Self {
        Page { buf }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    pub fn pagesize(&self) -> usize {
        self.buf.len()
    }

    // --- header accessors -------------------------------------------------

    pub fn txnid(&self) -> Txnid {
        u64::from_le_bytes(self.buf[0..8].try_into().unwrap())
    }

    pub fn set_txnid(&mut self, txnid: Txnid) {
        self.buf[0..8].copy_from_slice(&txnid.to_le_bytes());
    }

    pub fn flags(&self) -> PageFlags {
        PageFlags::from_bits_truncate(u16::from_le_bytes(self.buf[8..10].try_into().unwrap()))
    }

    pub fn set_flags(&mut self, flags: PageFlags) {
        self.buf[8..10].copy_from_slice(&flags.bits().to_le_bytes());
    }

    pub fn lower(&self) -> u16 {
        u16::from_le_bytes(self.buf[10..12].try_into().unwrap())
    }

    pub fn set_lower(&mut self, v: u16) {
        self.buf[10..12].copy_from_slice(&v.to_le_bytes());
    }

    pub fn upper(&self) -> u16 {
        u16::from_le_bytes(self.buf[12..14].try_into().unwrap())
    }

    pub fn set_upper(&mut self, v: u16) {
        self.buf[12..14].copy_from_slice(&v.to_le_bytes());
    }

    pub fn pgno(&self) -> Pgno {
        u64::from_le_bytes(self.buf[16..24].try_into().unwrap())
    }

    pub fn set_pgno(&mut self, v: Pgno) {
        self.buf[16..24].copy_from_slice(&v.to_le_bytes());
    }

    /// Auxiliary 32-bit field: number of pages in a large-page span, or
    /// the fixed key width of a DUPFIX leaf (spec §3.1).
    pub fn aux(&self) -> u32 {
        u32::from_le_bytes(self.buf[24..28].try_into().unwrap())
    }

    pub fn set_aux(&mut self, v: u32) {
        self.buf[24..28].copy_from_slice(&v.to_le_bytes());
    }

    pub fn npages(&self) -> u32 {
        debug_assert!(self.flags().contains(PageFlags::LARGE));
        self.aux().max(1)
    }

    pub fn set_npages(&mut self, n: u32) {
        self.set_aux(n);
    }

    pub fn dupfix_ksize(&self) -> u16 {
        self.aux() as u16
    }

    pub fn set_dupfix_ksize(&mut self, n: u16) {
        self.set_aux(n as u32);
    }

    // --- slot table / node access ------------------------------------------

    /// Number of nodes stored in this page (spec §4.1:
    /// `page_numkeys(p) = p.lower >> 1` relative to the header).
    pub fn numkeys(&self) -> usize {
        (self.lower() as usize - PAGE_HDR_SIZE) / SLOT_SIZE
    }

    /// Bytes available between the slot table and the node area.
    pub fn room(&self) -> usize {
        self.upper() as usize - self.lower() as usize
    }

    fn slot_offset(&self, i: usize) -> usize {
        PAGE_HDR_SIZE + i * SLOT_SIZE
    }

    /// Byte offset (from page start) of node `i`'s header.
    pub fn node_offset(&self, i: usize) -> usize {
        debug_assert!(i < self.numkeys());
        let off = self.slot_offset(i);
        u16::from_le_bytes(self.buf[off..off + 2].try_into().unwrap()) as usize
    }

    fn set_slot(&mut self, i: usize, node_off: u16) {
        let off = self.slot_offset(i);
        self.buf[off..off + 2].copy_from_slice(&node_off.to_le_bytes());
    }

    /// Size in bytes a node with this key/value would occupy (spec §4.1,
    /// `node_size_len`).
    pub fn node_size_len(key_len: usize, val_len: usize) -> usize {
        NODE_HDR_SIZE + even_ceil(key_len + val_len)
    }

    /// Insert a node at logical slot `idx`, shifting the offset table to
    /// make room (spec §4.4 "Insert at a leaf"). Returns an error if the
    /// page doesn't have enough room; callers must have already checked
    /// via [`Page::room`] or trigger a split.
    ///
    /// `aux` records the node's logical dsize: for an ordinary node this
    /// equals `payload.len()`, but a BIG node's payload is only the
    /// 8-byte first pgno of its large-page span, so its true value
    /// length has to be carried separately. Use [`Page::insert_node`]
    /// for the common case and this directly when `aux` must diverge
    /// from `payload.len()` (BIG nodes, DUPSORT subpages/nested trees).
    pub fn insert_node_raw(&mut self, idx: usize, flags: NodeFlags, key: &[u8], payload: &[u8], aux: u32) -> Result<()> {
        let size = Self::node_size_len(key.len(), payload.len());
        if self.room() < size + SLOT_SIZE {
            return Err(CorruptionError::BadPage(self.pgno()).into());
        }
        let n = self.numkeys();
        debug_assert!(idx <= n);

        let new_upper = self.upper() as usize - size;
        let node_off = new_upper;
        {
            let hdr_start = node_off;
            self.buf[hdr_start] = flags.bits();
            self.buf[hdr_start + 1] = 0;
            self.buf[hdr_start + 2..hdr_start + 4].copy_from_slice(&(key.len() as u16).to_le_bytes());
            self.buf[hdr_start + 4..hdr_start + 8].copy_from_slice(&aux.to_le_bytes());
            let body_start = hdr_start + NODE_HDR_SIZE;
            self.buf[body_start..body_start + key.len()].copy_from_slice(key);
            self.buf[body_start + key.len()..body_start + key.len() + payload.len()].copy_from_slice(payload);
        }

        // shift slot table to open a hole at idx
        for i in (idx..n).rev() {
            let src = self.slot_offset(i);
            let dst = self.slot_offset(i + 1);
            let val = u16::from_le_bytes(self.buf[src..src + 2].try_into().unwrap());
            self.buf[dst..dst + 2].copy_from_slice(&val.to_le_bytes());
        }
        self.set_slot(idx, node_off as u16);
        self.set_lower(self.lower() + SLOT_SIZE as u16);
        self.set_upper(new_upper as u16);
        Ok(())
    }

    /// Insert a node whose dsize is simply `payload.len()` (every node
    /// except BIG/DUPSORT ones). See [`Page::insert_node_raw`].
    pub fn insert_node(&mut self, idx: usize, flags: NodeFlags, key: &[u8], payload: &[u8]) -> Result<()> {
        self.insert_node_raw(idx, flags, key, payload, payload.len() as u32)
    }

    /// Remove the node at logical slot `idx`, collapsing the offset table
    /// (spec §4.4 "Delete is its inverse"). Does not reclaim the vacated
    /// node bytes (that happens on the next compaction/split, as in the
    /// original).
    pub fn remove_node(&mut self, idx: usize) {
        let n = self.numkeys();
        debug_assert!(idx < n);
        for i in idx..n - 1 {
            let src = self.slot_offset(i + 1);
            let dst = self.slot_offset(i);
            let val = u16::from_le_bytes(self.buf[src..src + 2].try_into().unwrap());
            self.buf[dst..dst + 2].copy_from_slice(&val.to_le_bytes());
        }
        self.set_lower(self.lower() - SLOT_SIZE as u16);
    }

    /// Read node `i`'s header fields: (flags, key range, aux field).
    pub fn node_header(&self, i: usize) -> NodeHeader {
        let off = self.node_offset(i);
        let flags = NodeFlags::from_bits_truncate(self.buf[off]);
        let ksize = u16::from_le_bytes(self.buf[off + 2..off + 4].try_into().unwrap()) as usize;
        let aux = u32::from_le_bytes(self.buf[off + 4..off + 8].try_into().unwrap());
        NodeHeader {
            flags,
            ksize,
            aux,
            body_offset: off + NODE_HDR_SIZE,
        }
    }

    pub fn node_key(&self, i: usize) -> &[u8] {
        let h = self.node_header(i);
        &self.buf[h.body_offset..h.body_offset + h.ksize]
    }

    /// Value bytes for a non-BIG node (for BIG nodes, use `node_header`'s
    /// `aux` as the first large-page pgno instead).
    pub fn node_value(&self, i: usize) -> &[u8] {
        let h = self.node_header(i);
        if h.flags.contains(NodeFlags::BIG) {
            &self.buf[h.body_offset + h.ksize..h.body_offset + h.ksize + 8]
        } else {
            &self.buf[h.body_offset + h.ksize..h.body_offset + h.ksize + h.aux as usize]
        }
    }

    /// Child page number for a branch node.
    pub fn node_child_pgno(&self, i: usize) -> Pgno {
        let h = self.node_header(i);
        debug_assert!(self.flags().contains(PageFlags::BRANCH));
        u64::from_le_bytes(self.buf[h.body_offset + h.ksize..h.body_offset + h.ksize + 8].try_into().unwrap())
    }

    // --- DUPFIX fixed-width leaf -------------------------------------------

    pub fn dupfix_key(&self, i: usize) -> &[u8] {
        let ksize = self.dupfix_ksize() as usize;
        let off = PAGE_HDR_SIZE + i * ksize;
        &self.buf[off..off + ksize]
    }

    pub fn dupfix_push(&mut self, key: &[u8]) -> Result<()> {
        let ksize = self.dupfix_ksize() as usize;
        debug_assert_eq!(key.len(), ksize);
        if self.room() < ksize {
            return Err(CorruptionError::BadPage(self.pgno()).into());
        }
        let n = self.numkeys();
        let off = PAGE_HDR_SIZE + n * ksize;
        self.buf[off..off + ksize].copy_from_slice(key);
        self.set_lower(self.lower() + ksize as u16);
        Ok(())
    }

    // --- large-page ("N_BIG") spans -----------------------------------------

    /// Number of consecutive pages a value of `value_len` bytes needs
    /// when it escapes a leaf node to a large-page chain (spec §3.1 B2).
    pub fn large_npages_for(value_len: usize, pagesize: usize) -> usize {
        let body = pagesize - PAGE_HDR_SIZE;
        (value_len + body - 1) / body
    }

    /// A freshly zeroed `npages`-page span with no slot table, flagged
    /// LARGE and stamped with its page count (spec §3.1 "large page").
    pub fn new_large_span(pagesize: usize, npages: u32, pgno: Pgno, txnid: Txnid) -> Self {
        let mut p = Page {
            buf: vec![0u8; pagesize * npages as usize],
        };
        p.set_pgno(pgno);
        p.set_txnid(txnid);
        p.set_flags(PageFlags::LARGE);
        p.set_npages(npages);
        p
    }

    /// Read back `len` bytes of a large value starting right after the
    /// page header (the whole span is treated as one flat byte region).
    pub fn large_value(&self, len: usize) -> &[u8] {
        &self.buf[PAGE_HDR_SIZE..PAGE_HDR_SIZE + len]
    }

    pub fn write_large_value(&mut self, value: &[u8]) {
        self.buf[PAGE_HDR_SIZE..PAGE_HDR_SIZE + value.len()].copy_from_slice(value);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NodeHeader {
    pub flags: NodeFlags,
    pub ksize: usize,
    pub aux: u32,
    pub body_offset: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_read_back_nodes() {
        let mut p = Page::new_empty(512, 3, 1, PageFlags::LEAF);
        p.insert_node(0, NodeFlags::empty(), b"bb", b"v2").unwrap();
        p.insert_node(0, NodeFlags::empty(), b"aa", b"v1").unwrap();
        p.insert_node(2, NodeFlags::empty(), b"cc", b"v3").unwrap();
        assert_eq!(p.numkeys(), 3);
        assert_eq!(p.node_key(0), b"aa");
        assert_eq!(p.node_key(1), b"bb");
        assert_eq!(p.node_key(2), b"cc");
        assert_eq!(p.node_value(1), b"v2");
    }

    #[test]
    fn remove_node_collapses_slots() {
        let mut p = Page::new_empty(512, 3, 1, PageFlags::LEAF);
        for (k, v) in [(b"a", b"1"), (b"b", b"2"), (b"c", b"3")] {
            p.insert_node(p.numkeys(), NodeFlags::empty(), k, v).unwrap();
        }
        p.remove_node(1);
        assert_eq!(p.numkeys(), 2);
        assert_eq!(p.node_key(0), b"a");
        assert_eq!(p.node_key(1), b"c");
    }

    #[test]
    fn room_shrinks_as_nodes_are_added() {
        let mut p = Page::new_empty(256, 1, 1, PageFlags::LEAF);
        let initial_room = p.room();
        p.insert_node(0, NodeFlags::empty(), b"k", b"v").unwrap();
        assert!(p.room() < initial_room);
    }
}
