//! OS abstraction layer: file/mmap/fsync/lock behind a trait (spec §1
//! "OUT of scope... Only its required contract is specified", grounded
//! on `original_source/src/osal.h` for the contract shape and on
//! `memmap2`/`fs4` for the concrete implementation).

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write as _};
use std::path::Path;

use fs4::fs_std::FileExt;
use memmap2::{MmapMut, MmapOptions};

use crate::error::Result;
use crate::meta::Meta;

/// Everything the commit pipeline and meta troika need from the
/// underlying file: positioned writes, the two fsync flavors the
/// durability matrix distinguishes, and typed meta slot access (spec
/// §4.9, §4.10). A real environment backs this with `StdDisk`; tests use
/// an in-memory stand-in.
pub trait Disk {
    fn pwrite(&self, offset: u64, data: &[u8]) -> Result<()>;
    /// Durability barrier for page data (spec Durability::syncs_data).
    fn fsync_data(&self) -> Result<()>;
    /// Durability barrier for the meta page just written (spec
    /// Durability::syncs_meta).
    fn fsync_meta(&self) -> Result<()>;
    fn write_meta(&self, slot: usize, meta: &Meta) -> Result<()>;
    fn read_meta(&self, slot: usize) -> Result<Meta>;
}

/// Advisory file locking used to serialize writer access across
/// processes (spec §5 "Writer lock": "implemented via file locking... or
/// a shared mutex").
pub trait ProcessLock {
    fn lock_exclusive(&self) -> Result<()>;
    fn try_lock_exclusive(&self) -> Result<bool>;
    fn unlock(&self) -> Result<()>;
}

/// The real, file-backed implementation. Reads/writes go through
/// `pwrite`/`pread` (non-WRITEMAP path); a `WRITEMAP`-mode build would
/// instead write directly into `mmap` and rely on `msync`, which this
/// struct also exposes for that path.
pub struct StdDisk {
    file: File,
    mmap: Option<MmapMut>,
    meta_pagesize: usize,
}

impl StdDisk {
    pub fn open(path: &Path, writable: bool) -> Result<Self> {
        Self::open_with_pagesize(path, writable, crate::config::DEFAULT_PAGESIZE as usize)
    }

    pub fn open_with_pagesize(path: &Path, writable: bool, pagesize: usize) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(writable).create(writable).open(path)?;
        Ok(StdDisk { file, mmap: None, meta_pagesize: pagesize })
    }

    pub fn pagesize_hint(&self) -> usize {
        self.meta_pagesize
    }

    /// Map the data file for read access (spec §3.1 "Environment": "mmap
    /// handle and its current/limit sizes"). Grow/shrink re-creates the
    /// mapping at commit boundaries, per `dxb_resize`.
    pub fn remap(&mut self, byte_len: u64) -> Result<()> {
        self.file.set_len(byte_len)?;
        let mmap = unsafe { MmapOptions::new().len(byte_len as usize).map_mut(&self.file)? };
        self.mmap = Some(mmap);
        Ok(())
    }

    pub fn msync(&self) -> Result<()> {
        if let Some(mmap) = &self.mmap {
            mmap.flush()?;
        }
        Ok(())
    }

    pub fn read_page(&self, pgno: u64, pagesize: usize) -> Result<Vec<u8>> {
        self.read_span(pgno, pagesize, 1)
    }

    /// Read `npages` consecutive pages starting at `pgno` as one flat
    /// buffer (spec §3.1 "large page": a N_BIG span is read back whole).
    pub fn read_span(&self, pgno: u64, pagesize: usize, npages: u32) -> Result<Vec<u8>> {
        let off = pgno as usize * pagesize;
        let len = pagesize * npages as usize;
        // The map only covers the geometry as of the last `remap`; a page
        // allocated since then (the file was grown but not yet remapped)
        // falls back to a plain positioned read.
        if let Some(mmap) = &self.mmap {
            if off + len <= mmap.len() {
                return Ok(mmap[off..off + len].to_vec());
            }
        }
        use std::io::Read;
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(off as u64))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

impl Disk for StdDisk {
    fn pwrite(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }

    fn fsync_data(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    fn fsync_meta(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn write_meta(&self, slot: usize, meta: &Meta) -> Result<()> {
        let bytes = encode_meta(meta);
        self.pwrite(slot as u64 * self.meta_pagesize as u64, &bytes)
    }

    fn read_meta(&self, slot: usize) -> Result<Meta> {
        use std::io::Read;
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(slot as u64 * self.meta_pagesize as u64))?;
        let mut buf = vec![0u8; META_ENCODED_LEN];
        file.read_exact(&mut buf)?;
        decode_meta(&buf)
    }
}

impl ProcessLock for File {
    fn lock_exclusive(&self) -> Result<()> {
        FileExt::lock_exclusive(self)?;
        Ok(())
    }

    fn try_lock_exclusive(&self) -> Result<bool> {
        match FileExt::try_lock_exclusive(self) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn unlock(&self) -> Result<()> {
        FileExt::unlock(self)?;
        Ok(())
    }
}

/// Fixed-size wire encoding for a [`Meta`], independent of `Page`'s
/// layout since meta pages are never node-addressed (spec §6.1: "Pages
/// 0, 1, 2 are meta pages").
const META_ENCODED_LEN: usize = 128;

fn encode_meta(meta: &Meta) -> Vec<u8> {
    let mut buf = vec![0u8; META_ENCODED_LEN];
    buf[0..4].copy_from_slice(&meta.magic.to_le_bytes());
    buf[4..8].copy_from_slice(&meta.version.to_le_bytes());
    buf[8..16].copy_from_slice(&meta.txnid_a.to_le_bytes());
    buf[16..24].copy_from_slice(&meta.geometry.lower.to_le_bytes());
    buf[24..32].copy_from_slice(&meta.geometry.now.to_le_bytes());
    buf[32..40].copy_from_slice(&meta.geometry.upper.to_le_bytes());
    buf[40..48].copy_from_slice(&meta.geometry.grow_step.to_le_bytes());
    buf[48..56].copy_from_slice(&meta.geometry.shrink_threshold.to_le_bytes());
    buf[56..60].copy_from_slice(&meta.geometry.pagesize.to_le_bytes());
    buf[60..68].copy_from_slice(&meta.gc_tree.root.to_le_bytes());
    buf[68..76].copy_from_slice(&meta.main_tree.root.to_le_bytes());
    buf[76..84].copy_from_slice(&meta.sign.to_le_bytes());
    buf[84..92].copy_from_slice(&meta.pages_retired.to_le_bytes());
    buf[92..100].copy_from_slice(&meta.boot_id.to_le_bytes());
    buf[100..108].copy_from_slice(&meta.txnid_b.to_le_bytes());
    buf
}

fn decode_meta(buf: &[u8]) -> Result<Meta> {
    use std::convert::TryInto;
    let mut gc_tree = crate::meta::TreeDescriptor::empty();
    let mut main_tree = crate::meta::TreeDescriptor::empty();
    gc_tree.root = u64::from_le_bytes(buf[60..68].try_into().unwrap());
    main_tree.root = u64::from_le_bytes(buf[68..76].try_into().unwrap());
    let meta = Meta {
        magic: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
        version: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
        txnid_a: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
        geometry: crate::meta::GeoFields {
            lower: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
            now: u64::from_le_bytes(buf[24..32].try_into().unwrap()),
            upper: u64::from_le_bytes(buf[32..40].try_into().unwrap()),
            grow_step: u64::from_le_bytes(buf[40..48].try_into().unwrap()),
            shrink_threshold: u64::from_le_bytes(buf[48..56].try_into().unwrap()),
            pagesize: u32::from_le_bytes(buf[56..60].try_into().unwrap()),
        },
        gc_tree,
        main_tree,
        sign: u64::from_le_bytes(buf[76..84].try_into().unwrap()),
        pages_retired: u64::from_le_bytes(buf[84..92].try_into().unwrap()),
        boot_id: u64::from_le_bytes(buf[92..100].try_into().unwrap()),
        txnid_b: u64::from_le_bytes(buf[100..108].try_into().unwrap()),
    };
    Ok(meta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Geometry;

    #[test]
    fn meta_encode_decode_roundtrips() {
        let geo = Geometry::new(4096, 16, 32, 1024);
        let mut meta = Meta::new(7, geo, 99);
        meta.main_tree.root = 42;
        meta.set_sign(crate::meta::DataSign::Steady(123));
        let bytes = encode_meta(&meta);
        let decoded = decode_meta(&bytes).unwrap();
        assert_eq!(decoded.txnid_a, 7);
        assert_eq!(decoded.main_tree.root, 42);
        assert_eq!(decoded.boot_id, 99);
        assert!(decoded.is_steady());
    }
}
