//! Environment flags, table flags, durability modes and geometry (spec
//! §6.3, §3.1 "Environment"/"Tree descriptor", §4.9).

use bitflags::bitflags;

bitflags! {
    /// Environment-wide options (spec §6.3). Some are changeable at
    /// runtime, others only at open time; the split is enforced by
    /// [`crate::env::Env::set_flags`] rather than by the type system, since
    /// both sets share one bit-space on disk-adjacent structures.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EnvFlags: u32 {
        /// Skip fsync of the data file on every commit (changeable).
        const SAFE_NOSYNC        = 1 << 0;
        /// Skip fsync of the meta page on every commit (changeable).
        const NOMETASYNC         = 1 << 1;
        /// Skip zero-initializing newly allocated pages (changeable).
        const NOMEMINIT          = 1 << 2;
        /// Fill freed pages with a recognizable byte pattern for debugging (changeable).
        const PAGEPERTURB        = 1 << 3;
        /// Accept an environment created with different flags than requested (changeable).
        const ACCEDE             = 1 << 4;
        /// Validate every page against its checksum/flags on read (changeable).
        const VALIDATION         = 1 << 5;
        /// The path names a file directly rather than a directory (fixed).
        const NOSUBDIR           = 1 << 8;
        /// Open read-only (fixed).
        const RDONLY             = 1 << 9;
        /// Write through the mmap rather than via pwrite (fixed).
        const WRITEMAP           = 1 << 10;
        /// Don't bind reader slots to a particular OS thread (fixed).
        const NOSTICKYTHREADS    = 1 << 11;
        /// Disable OS readahead on the data file (fixed).
        const NORDAHEAD          = 1 << 12;
        /// Reclaim GC records newest-first instead of oldest-first (fixed).
        const LIFORECLAIM        = 1 << 13;
        /// Require exclusive access to the environment (fixed).
        const EXCLUSIVE          = 1 << 14;
    }
}

impl EnvFlags {
    const RUNTIME_CHANGEABLE: EnvFlags = EnvFlags::SAFE_NOSYNC
        .union(EnvFlags::NOMETASYNC)
        .union(EnvFlags::NOMEMINIT)
        .union(EnvFlags::PAGEPERTURB)
        .union(EnvFlags::ACCEDE)
        .union(EnvFlags::VALIDATION);

    /// Whether every bit of `other` is one this build permits to change
    /// after the environment has been opened.
    pub fn all_changeable(other: EnvFlags) -> bool {
        Self::RUNTIME_CHANGEABLE.contains(other)
    }
}

bitflags! {
    /// Per-table schema flags (spec §3.1 "Tree descriptor").
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DbFlags: u16 {
        /// Keys are compared in reverse byte order.
        const REVERSEKEY  = 1 << 1;
        /// DUPSORT: a key may hold multiple sorted values.
        const DUPSORT     = 1 << 2;
        /// Keys are binary integers in native byte order, compared numerically.
        const INTEGERKEY  = 1 << 3;
        /// Duplicate values are fixed-size (requires DUPSORT).
        const DUPFIXED    = 1 << 4;
        /// Duplicate values are binary integers (requires DUPFIXED).
        const INTEGERDUP  = 1 << 5;
        /// Duplicate values are compared in reverse byte order.
        const REVERSEDUP  = 1 << 6;
        /// Create the table if it does not exist.
        const CREATE      = 1 << 14;
    }
}

/// Durability mode selected for commit (spec §4.9 step 5, §5).
///
/// Named after the effect on a crash rather than the original flag
/// combination, per the teacher's preference for descriptive enum
/// variants over bit-combination mirroring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    /// fsync data, update meta, fsync meta. Slowest, strongest guarantee.
    RobustSynchronous,
    /// fsync data, update meta without fsyncing it (deferred metasync).
    HalfSynchronousWeakLast,
    /// No fsync this commit; meta gets a WEAK signature (`SAFE_NOSYNC`).
    LazyWeakTail,
    /// No fsync at all, ever; acceptable only for ephemeral data (`UTTERLY_NOSYNC`).
    WholeFragile,
}

impl Durability {
    pub fn from_flags(flags: EnvFlags) -> Durability {
        if flags.contains(EnvFlags::SAFE_NOSYNC) {
            if flags.contains(EnvFlags::NOMETASYNC) {
                Durability::WholeFragile
            } else {
                Durability::LazyWeakTail
            }
        } else if flags.contains(EnvFlags::NOMETASYNC) {
            Durability::HalfSynchronousWeakLast
        } else {
            Durability::RobustSynchronous
        }
    }

    /// Whether this mode fsyncs the data file before touching meta.
    pub fn syncs_data(self) -> bool {
        matches!(
            self,
            Durability::RobustSynchronous | Durability::HalfSynchronousWeakLast
        )
    }

    /// Whether this mode fsyncs the meta page after writing it.
    pub fn syncs_meta(self) -> bool {
        matches!(self, Durability::RobustSynchronous)
    }
}

/// Minimum and maximum page sizes allowed (spec §6.1).
pub const MIN_PAGESIZE: u32 = 256;
pub const MAX_PAGESIZE: u32 = 65536;
pub const DEFAULT_PAGESIZE: u32 = 4096;

/// On-disk geometry of the data file (spec §3.1 "Meta page").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Lowest allowed size, in pages. The file never shrinks below this.
    pub lower: u64,
    /// Current size, in pages (a.k.a. `first_unallocated` ceiling today).
    pub now: u64,
    /// Highest allowed size, in pages. `MAP_FULL` once this is hit.
    pub upper: u64,
    /// Incremental growth step, in pages, applied when the file must grow.
    pub grow_step: u64,
    /// Shrink threshold: don't shrink unless at least this many pages
    /// of the tail are unused.
    pub shrink_threshold: u64,
    pub pagesize: u32,
}

impl Geometry {
    pub fn new(pagesize: u32, lower: u64, now: u64, upper: u64) -> Self {
        Geometry {
            lower,
            now: now.max(lower),
            upper: upper.max(lower),
            grow_step: ((upper - lower).max(1) / 4).max(1),
            shrink_threshold: ((upper - lower).max(1) / 4).max(1),
            pagesize,
        }
    }

    pub fn byte_len(&self) -> u64 {
        self.now * self.pagesize as u64
    }

    pub fn max_byte_len(&self) -> u64 {
        self.upper * self.pagesize as u64
    }
}

/// Options used when building an [`crate::env::Env`] (teacher's `Settings`,
/// expanded to the full flag set of spec §6.3).
#[derive(Debug, Clone)]
pub struct EnvOptions {
    pub flags: EnvFlags,
    pub pagesize: u32,
    pub max_readers: usize,
    pub max_dbs: usize,
    pub lower_pages: u64,
    pub upper_pages: u64,
    pub initial_pages: u64,
}

impl Default for EnvOptions {
    fn default() -> Self {
        EnvOptions {
            flags: EnvFlags::empty(),
            pagesize: DEFAULT_PAGESIZE,
            max_readers: 126, // spec §3.1: chosen so the reader table fits in 8KB
            max_dbs: 16,
            lower_pages: 64,
            upper_pages: 1 << 20,
            initial_pages: 64,
        }
    }
}
