//! The top-level handle tying file, mmap, meta troika, reader table and
//! the writer lock together (spec §3.1 "Environment", grounded on
//! `original_source/src/env.c` for lifecycle and on the teacher's `Db`
//! for the shape of an owning top-level struct).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::btree::{tree_delete, tree_delete_dup, tree_insert, tree_search, PageSource};
use crate::commit::{apply_durability, coherency_check, flush_dirty_pages, gc_update, write_meta};
use crate::config::{Durability, EnvFlags, EnvOptions, Geometry};
use crate::cursor::{Cursor, CursorResult};
use crate::error::{ConcurrencyError, Result};
use crate::gc::{GcSource, ReclaimOrder};
use crate::meta::{DataSign, Meta, Troika, FREE_DBI, MAIN_DBI};
use crate::node::comparator_for;
use crate::osal::{Disk, ProcessLock, StdDisk};
use crate::page::{Page, Pgno, Txnid};
use crate::pnl::Pnl;
use crate::reader::ReaderTable;
use crate::txn::{ReadTxn, Storage, Txn};

/// An open database (spec §3.1 "Environment"). Owns the mapped file,
/// the three-slot meta troika, the reader table, and the single writer
/// mutex that serializes `begin_write` the way the original serializes
/// it with a file lock plus an in-process mutex for same-process
/// writers (spec §5 "Writer lock").
pub struct Env {
    path: PathBuf,
    disk: StdDisk,
    file: std::fs::File,
    options: EnvOptions,
    geometry: Mutex<Geometry>,
    troika: Mutex<Troika>,
    readers: ReaderTable,
    writer_lock: Mutex<()>,
    boot_id: u64,
    next_pgno: AtomicU64,
}

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Env").field("path", &self.path).finish_non_exhaustive()
    }
}

impl Env {
    /// Open (creating if absent and `options` permits it) the data file
    /// at `path`, grab the writer lock unless `RDONLY`, and bootstrap a
    /// fresh troika if this is a brand-new file (spec §4.1 "Environment
    /// open").
    pub fn open(path: impl AsRef<Path>, options: EnvOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let writable = !options.flags.contains(EnvFlags::RDONLY);
        let file = std::fs::OpenOptions::new().read(true).write(writable).create(writable).open(&path)?;
        if writable {
            if options.flags.contains(EnvFlags::EXCLUSIVE) {
                if !ProcessLock::try_lock_exclusive(&file)? {
                    return Err(ConcurrencyError::Busy.into());
                }
            } else {
                ProcessLock::lock_exclusive(&file)?;
            }
        }

        let geometry = Geometry::new(options.pagesize, options.lower_pages, options.initial_pages, options.upper_pages);
        let is_new = file.metadata()?.len() < geometry.pagesize as u64 * 3;
        let mut disk = StdDisk::open_with_pagesize(&path, writable, geometry.pagesize as usize)?;
        let boot_id = std::process::id() as u64;

        let troika;
        let next_pgno;
        if is_new {
            disk.remap(geometry.byte_len())?;
            let mut meta = Meta::new(1, geometry, boot_id);
            meta.main_tree = crate::meta::TreeDescriptor::empty();
            meta.gc_tree = crate::meta::TreeDescriptor::empty();
            meta.set_sign(DataSign::Steady(1));
            for slot in 0..3 {
                disk.write_meta(slot, &meta)?;
            }
            disk.fsync_meta()?;
            troika = Troika::tap(&[Some(meta), Some(meta), Some(meta)]);
            next_pgno = 3;
        } else {
            let metas = std::array::from_fn(|slot| disk.read_meta(slot).ok());
            for m in metas.iter().flatten() {
                m.validate_format()?;
                m.validate_not_torn()?;
            }
            troika = Troika::tap(&metas);
            let recent = metas[troika.recent].expect("recent slot validated above");
            disk.remap(recent.geometry.now * recent.geometry.pagesize as u64)?;
            next_pgno = recent.geometry.now.max(3);
        }

        Ok(Env {
            path,
            disk,
            file,
            options,
            geometry: Mutex::new(geometry),
            troika: Mutex::new(troika),
            readers: ReaderTable::new(options.max_readers),
            writer_lock: Mutex::new(()),
            boot_id,
            next_pgno: AtomicU64::new(next_pgno),
        })
    }

    fn durability(&self) -> Durability {
        Durability::from_flags(self.options.flags)
    }

    /// Begin a write transaction. Only one may be outstanding per `Env`
    /// at a time (spec §3.1 "single-writer"); the lock is held for the
    /// lifetime of the returned [`EnvTxnGuard`].
    pub fn begin_write(&self) -> Result<EnvTxnGuard<'_>> {
        let guard = self.writer_lock.lock();
        let troika = self.troika.lock();
        let meta = self.disk.read_meta(troika.recent)?;
        let txn = Txn::begin_basal(self, &troika, meta.main_tree);
        drop(troika);
        Ok(EnvTxnGuard { env: self, txn: Some(txn), _guard: guard })
    }

    /// Begin a read-only transaction against the current recent
    /// snapshot (spec §3.1 "Read txn").
    pub fn begin_read(&self) -> Result<ReadTxn<'_>> {
        let troika = self.troika.lock();
        ReadTxn::begin(self, &self.readers, std::process::id(), thread_id(), &troika)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy this database's live key/value pairs into a freshly created
    /// file at `dest`, leaving behind whatever free space deletes and
    /// splits accumulated in the source file (spec §4.10 "online
    /// compact-copy", S5). Only a brief lock is held to snapshot the
    /// current root; the walk and the destination writes that follow run
    /// unlocked, so the source stays writable by its own writer for the
    /// bulk of the copy.
    pub fn copy_compact(&self, dest: impl AsRef<Path>) -> Result<()> {
        let (main_tree, pagesize) = {
            let troika = self.troika.lock();
            let meta = self.disk.read_meta(troika.recent)?;
            (meta.main_tree, meta.geometry.pagesize)
        };

        let dest_options = EnvOptions { pagesize, ..EnvOptions::default() };
        let dest_env = Env::open(dest.as_ref(), dest_options)?;
        let mut dest_txn = dest_env.begin_write()?;

        let src = ReadOnlySource(self);
        let mut cursor = Cursor::new(main_tree, main_tree.flags);
        let mut r = cursor.first(&src)?;
        while let CursorResult::Found { key, value } = r {
            // Ascending walk order lets every insert use APPEND, which
            // skips the rightmost-key comparator check `tree_insert`
            // would otherwise redo on every row.
            dest_txn.put(&key, &value, true, true)?;
            r = cursor.step(&src, true)?;
        }
        dest_txn.commit()?;
        Ok(())
    }
}

impl Storage for Env {
    fn get(&self, pgno: Pgno) -> Result<Page> {
        let pagesize = self.disk.pagesize_hint();
        let bytes = self.disk.read_page(pgno, pagesize)?;
        let first = Page::from_bytes(bytes);
        // A large-page span's first page carries its true page count;
        // everything past page 0 of the span must be re-read in full or
        // the value tail would be silently truncated.
        if first.flags().contains(crate::page::PageFlags::LARGE) && first.npages() > 1 {
            let span = self.disk.read_span(pgno, pagesize, first.npages())?;
            return Ok(Page::from_bytes(span));
        }
        Ok(first)
    }

    fn pagesize(&self) -> usize {
        self.disk.pagesize_hint()
    }

    fn first_unallocated(&self) -> Pgno {
        self.next_pgno.load(Ordering::SeqCst)
    }

    fn write_page(&self, pgno: Pgno, page: &Page) -> Result<()> {
        let pagesize = self.disk.pagesize_hint();
        self.disk.pwrite(pgno * pagesize as u64, page.as_bytes())
    }
}

/// Adapts a read-only [`Storage`] into a [`PageSource`] so `tree_search`
/// can walk the committed FREE_DBI without needing the write-side
/// mutation methods — they're unreachable from a pure lookup.
struct ReadOnlySource<'a>(&'a dyn Storage);

impl<'a> PageSource for ReadOnlySource<'a> {
    fn get(&self, pgno: Pgno) -> Result<Page> {
        self.0.get(pgno)
    }
    fn touch(&mut self, _pgno: Pgno) -> Result<Page> {
        unreachable!("FREE_DBI lookups never mutate")
    }
    fn alloc(&mut self, _flags: crate::page::PageFlags) -> Result<Page> {
        unreachable!("FREE_DBI lookups never mutate")
    }
    fn alloc_span(&mut self, _npages: u32) -> Result<Page> {
        unreachable!("FREE_DBI lookups never mutate")
    }
    fn put(&mut self, _page: Page) -> Result<()> {
        unreachable!("FREE_DBI lookups never mutate")
    }
    fn retire(&mut self, _pgno: Pgno) {
        unreachable!("FREE_DBI lookups never mutate")
    }
    fn retire_span(&mut self, _pgno: Pgno, _npages: u32) {
        unreachable!("FREE_DBI lookups never mutate")
    }
    fn pagesize(&self) -> usize {
        self.0.pagesize()
    }
}

/// Read access to the committed FREE_DBI tree for [`crate::gc::gc_alloc_ex`]
/// (spec §4.6 `gc_alloc_ex`'s source of reclaimable records). Walks the
/// snapshot as of the last commit; this txn's own not-yet-folded
/// retirements live in its `GcState` instead and never need this path.
struct FreeTreeSource<'a> {
    root: Pgno,
    storage: &'a dyn Storage,
}

impl<'a> GcSource for FreeTreeSource<'a> {
    fn reclaimable(&self, horizon: Txnid, order: ReclaimOrder) -> Vec<Txnid> {
        if self.root == crate::page::INVALID_PGNO {
            return Vec::new();
        }
        let src = ReadOnlySource(self.storage);
        let mut ids = Vec::new();
        collect_free_dbi_ids(&src, self.root, horizon, &mut ids);
        match order {
            ReclaimOrder::Fifo => ids.sort_unstable(),
            ReclaimOrder::Lifo => ids.sort_unstable_by(|a, b| b.cmp(a)),
        }
        ids
    }

    fn record_pages(&self, txnid: Txnid) -> Pnl {
        let src = ReadOnlySource(self.storage);
        match free_dbi_lookup(&src, self.root, txnid) {
            Some(bytes) => decode_pgno_list(&bytes),
            None => Pnl::new(),
        }
    }
}

fn collect_free_dbi_ids(src: &dyn PageSource, root: Pgno, horizon: Txnid, out: &mut Vec<Txnid>) {
    // A full in-order walk of FREE_DBI; adequate for the record counts a
    // single-writer engine accumulates between GC passes.
    let Ok(page) = src.get(root) else { return };
    if page.flags().contains(crate::page::PageFlags::BRANCH) {
        for i in 0..page.numkeys() {
            let child = page.node_child_pgno(i);
            collect_free_dbi_ids(src, child, horizon, out);
        }
    } else {
        for i in 0..page.numkeys() {
            let key = page.node_key(i);
            if key.len() == 8 {
                let id = u64::from_be_bytes(key.try_into().unwrap());
                if id <= horizon {
                    out.push(id);
                }
            }
        }
    }
}

fn free_dbi_lookup(src: &dyn PageSource, root: Pgno, txnid: Txnid) -> Option<Vec<u8>> {
    let key = txnid.to_be_bytes();
    let path = tree_search(src, root, &key, &*comparator_for(crate::config::DbFlags::empty())).ok()?;
    if !path.exact {
        return None;
    }
    Some(path.leaf().node_value(path.leaf_index()).to_vec())
}

fn decode_pgno_list(bytes: &[u8]) -> Pnl {
    bytes.chunks_exact(8).map(|c| u64::from_le_bytes(c.try_into().unwrap())).collect()
}

fn encode_pgno_list(pages: &[Pgno]) -> Vec<u8> {
    let mut out = Vec::with_capacity(pages.len() * 8);
    for p in pages {
        out.extend_from_slice(&p.to_le_bytes());
    }
    out
}

/// An in-flight write transaction paired with the writer-lock guard that
/// must outlive it (spec §4.8). Borrow [`EnvTxnGuard::txn_mut`] for tree
/// operations, then call [`EnvTxnGuard::commit`] or drop to abort.
pub struct EnvTxnGuard<'a> {
    env: &'a Env,
    txn: Option<Txn<'a>>,
    _guard: parking_lot::MutexGuard<'a, ()>,
}

impl<'a> EnvTxnGuard<'a> {
    pub fn txn_mut(&mut self) -> &mut Txn<'a> {
        self.txn.as_mut().expect("txn already consumed")
    }

    /// Pull one page out of the committed FREE_DBI into this txn's
    /// loose list, if any record older than the oldest live reader is
    /// available (spec §4.6 `gc_alloc_ex`, invoked lazily from the
    /// write path rather than eagerly at `begin_write`).
    fn top_up_reclaimed(&mut self) {
        let env = self.env;
        let txn = self.txn.as_mut().expect("txn already consumed");
        let free_root = match txn.get_dbi(FREE_DBI) {
            Ok(desc) => desc.root,
            Err(_) => return,
        };
        if free_root == crate::page::INVALID_PGNO {
            return;
        }
        let horizon = env.readers.oldest_reader().unwrap_or(txn.txnid);
        let order = ReclaimOrder::from_flags(env.options.flags);
        let source = FreeTreeSource { root: free_root, storage: env };
        if let Some(pgno) = crate::gc::gc_alloc_ex(&mut txn.gc, &source, 1, horizon, order) {
            txn.gc.push_loose(pgno);
        }
    }

    /// Insert or update `key` in the main table (spec §4.3 `put`). When
    /// `append` is set (MDBX_APPEND), `key` must sort after every key
    /// already present or the call fails with
    /// [`crate::error::SemanticError::KeyMismatch`] and the tree is left
    /// unchanged (spec §4.4 `MDBX_APPEND`, S4).
    pub fn put(&mut self, key: &[u8], value: &[u8], overwrite: bool, append: bool) -> Result<()> {
        self.top_up_reclaimed();
        let txn = self.txn_mut();
        let mut desc = txn.get_dbi(MAIN_DBI)?;
        let txnid = txn.front_txnid;
        tree_insert(txn, &mut desc, key, value, overwrite, append, txnid)?;
        txn.put_dbi(MAIN_DBI, desc);
        let txn = self.txn_mut();
        txn.refund();
        txn.maybe_spill()?;
        Ok(())
    }

    /// Remove `key` from the main table (spec §4.4 `del`). For a
    /// DUPSORT table, passing `value` removes only that one duplicate
    /// pair; `None` (or a non-DUPSORT table) removes every value under
    /// `key`.
    pub fn delete(&mut self, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        let txn = self.txn_mut();
        let mut desc = txn.get_dbi(MAIN_DBI)?;
        let txnid = txn.front_txnid;
        match value {
            Some(v) => tree_delete_dup(txn, &mut desc, key, v, txnid)?,
            None => tree_delete(txn, &mut desc, key, txnid)?,
        }
        txn.put_dbi(MAIN_DBI, desc);
        let txn = self.txn_mut();
        txn.refund();
        Ok(())
    }

    /// Insert a duplicate-sorted `(key, value)` pair into the main
    /// table, opening it as DUPSORT on first use if it is still empty
    /// (spec §4.2 "dbi_open" with `DUPSORT`, §4.4 `put` under DUPSORT).
    pub fn put_dup(&mut self, key: &[u8], value: &[u8], overwrite: bool) -> Result<()> {
        self.top_up_reclaimed();
        let txn = self.txn_mut();
        let mut desc = txn.get_dbi(MAIN_DBI)?;
        if desc.is_empty_tree() {
            desc.flags |= crate::config::DbFlags::DUPSORT;
        }
        let txnid = txn.front_txnid;
        tree_insert(txn, &mut desc, key, value, overwrite, false, txnid)?;
        txn.put_dbi(MAIN_DBI, desc);
        let txn = self.txn_mut();
        txn.refund();
        txn.maybe_spill()?;
        Ok(())
    }

    /// Whether `(key, value)` is present in a DUPSORT main table (spec
    /// `GET_BOTH`).
    pub fn contains_dup(&mut self, key: &[u8], value: &[u8]) -> Result<bool> {
        let txn = self.txn_mut();
        let desc = txn.get_dbi(MAIN_DBI)?;
        let mut cursor = Cursor::new(desc, desc.flags);
        Ok(matches!(cursor.get_both(&*txn, key, value)?, CursorResult::Found { .. }))
    }

    /// Count of duplicate values currently stored under `key` (spec
    /// `GET_MULTIPLE`, used here as a test/diagnostic helper).
    pub fn count_dups(&mut self, key: &[u8]) -> Result<usize> {
        let txn = self.txn_mut();
        let desc = txn.get_dbi(MAIN_DBI)?;
        let mut cursor = Cursor::new(desc, desc.flags);
        match cursor.seek(&*txn, key)? {
            CursorResult::Found { .. } => Ok(cursor.get_multiple(&*txn)?.len()),
            CursorResult::NotFound => Ok(0),
        }
    }

    /// Point lookup through a fresh cursor (spec §4.2 `get`).
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let txn = self.txn_mut();
        let desc = txn.get_dbi(MAIN_DBI)?;
        let mut cursor = Cursor::new(desc, desc.flags);
        match cursor.seek(&*txn, key)? {
            CursorResult::Found { value, .. } => Ok(Some(value)),
            CursorResult::NotFound => Ok(None),
        }
    }

    /// Run the full commit pipeline: fold GC, flush dirty pages, write
    /// meta, fsync per durability, coherency-check (spec §4.9).
    pub fn commit(mut self) -> Result<Txnid> {
        let mut txn = self.txn.take().expect("txn already consumed");
        let committing_txnid = txn.txnid;
        let durability = self.env.durability();

        let mut free_desc = txn.get_dbi(FREE_DBI).unwrap_or_else(|_| crate::meta::TreeDescriptor::empty());
        {
            let pagesize = txn.pagesize();
            // Detach `gc` so the fold loop below can hold it mutably
            // while `tree_insert` also needs `&mut txn` (which owns its
            // own, now-empty, `GcState` for the duration of the loop).
            let mut gc = std::mem::take(&mut txn.gc);
            gc_update(&mut gc, committing_txnid, pagesize, |record_id, pages, live_gc| {
                let bytes = encode_pgno_list(pages);
                tree_insert(&mut txn, &mut free_desc, &record_id.to_be_bytes(), &bytes, true, false, committing_txnid)?;
                // Fold whatever that insert itself retired/loosed back
                // into the same pass so the outer loop sees it.
                live_gc.retired_pages.merge(&txn.gc.retired_pages);
                txn.gc.retired_pages.clear();
                live_gc.loose_pages.append(&mut txn.gc.loose_pages);
                Ok(())
            })?;
            txn.gc = gc;
        }
        txn.put_dbi(FREE_DBI, free_desc);

        flush_dirty_pages(&self.env.disk, &txn.dpl)?;
        apply_durability(&self.env.disk, durability)?;

        let used_pages = txn.next_pgno();
        {
            let mut geo = self.env.geometry.lock();
            if used_pages > geo.upper {
                return Err(crate::error::CapacityError::MapFull.into());
            }
            if used_pages > geo.now {
                geo.now = used_pages.max(geo.now + geo.grow_step).min(geo.upper);
            }
        }

        let mut troika = self.env.troika.lock();
        let mut pending = self.env.disk.read_meta(troika.recent)?;
        pending.txnid_a = committing_txnid;
        pending.main_tree = txn.get_dbi(MAIN_DBI)?;
        pending.gc_tree = txn.get_dbi(FREE_DBI)?;
        pending.pages_retired = pending.pages_retired.saturating_add(txn.gc.retired_pages.len() as u64);
        pending.geometry = (*self.env.geometry.lock()).into();

        let slot = write_meta(&self.env.disk, &troika, pending, durability, self.env.boot_id)?;
        coherency_check(&self.env.disk, slot, committing_txnid, 2)?;
        *troika = Troika::tap(&[
            Some(self.env.disk.read_meta(0)?),
            Some(self.env.disk.read_meta(1)?),
            Some(self.env.disk.read_meta(2)?),
        ]);
        self.env.next_pgno.store(self.env.next_pgno.load(Ordering::SeqCst).max(used_pages), Ordering::SeqCst);

        crate::logging::log_commit(committing_txnid, txn.dpl.len(), durability);
        Ok(committing_txnid)
    }

    pub fn abort(mut self) {
        if let Some(txnid) = self.txn.take().map(|t| t.txnid) {
            crate::logging::log_abort(txnid);
        }
    }
}

impl<'a> Drop for EnvTxnGuard<'a> {
    fn drop(&mut self) {
        if let Some(txn) = self.txn.take() {
            crate::logging::log_abort(txn.txnid);
        }
    }
}

fn thread_id() -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvOptions;

    fn small_options() -> EnvOptions {
        EnvOptions {
            lower_pages: 16,
            initial_pages: 16,
            upper_pages: 256,
            ..EnvOptions::default()
        }
    }

    #[test]
    fn put_get_commit_and_reopen_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.rkvx");

        let env = Env::open(&path, small_options()).unwrap();
        let mut txn = env.begin_write().unwrap();
        txn.put(b"hello", b"world", true, false).unwrap();
        txn.commit().unwrap();
        drop(env);

        let env = Env::open(&path, small_options()).unwrap();
        let mut txn = env.begin_write().unwrap();
        assert_eq!(txn.get(b"hello").unwrap(), Some(b"world".to_vec()));
        txn.abort();
    }

    #[test]
    fn delete_removes_a_previously_committed_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.rkvx");

        let env = Env::open(&path, small_options()).unwrap();
        let mut txn = env.begin_write().unwrap();
        txn.put(b"k1", b"v1", true, false).unwrap();
        txn.commit().unwrap();

        let mut txn = env.begin_write().unwrap();
        txn.delete(b"k1", None).unwrap();
        txn.commit().unwrap();

        let mut txn = env.begin_write().unwrap();
        assert_eq!(txn.get(b"k1").unwrap(), None);
        txn.abort();
    }

    #[test]
    fn aborted_write_does_not_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.rkvx");

        let env = Env::open(&path, small_options()).unwrap();
        let mut txn = env.begin_write().unwrap();
        txn.put(b"ghost", b"boo", true, false).unwrap();
        txn.abort();

        let mut txn = env.begin_write().unwrap();
        assert_eq!(txn.get(b"ghost").unwrap(), None);
        txn.abort();
    }

    #[test]
    fn begin_read_snapshots_reader_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.rkvx");

        let env = Env::open(&path, small_options()).unwrap();
        let mut txn = env.begin_write().unwrap();
        txn.put(b"a", b"1", true, false).unwrap();
        txn.commit().unwrap();

        let read = env.begin_read().unwrap();
        assert_eq!(read.txnid, 2);
    }

    #[test]
    fn append_out_of_order_key_is_rejected_and_tree_is_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.rkvx");

        let env = Env::open(&path, small_options()).unwrap();
        let mut txn = env.begin_write().unwrap();
        txn.put(b"b", b"1", true, true).unwrap();
        let err = txn.put(b"a", b"2", true, true).unwrap_err();
        assert!(matches!(err, crate::error::Error::Semantic(crate::error::SemanticError::KeyMismatch)));
        assert_eq!(txn.get(b"a").unwrap(), None);
        assert_eq!(txn.get(b"b").unwrap(), Some(b"1".to_vec()));
        txn.abort();
    }

    #[test]
    fn writer_lock_is_exclusive_within_process() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.rkvx");
        let env = Env::open(&path, small_options()).unwrap();
        let first = env.begin_write().unwrap();
        assert!(env.writer_lock.try_lock().is_none());
        first.abort();
    }
}
