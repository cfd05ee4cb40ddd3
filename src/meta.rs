//! Meta page layout and the troika FSM (spec §3.1 "Meta page", §4.10,
//! §6.1, grounded on `original_source/src/meta.h`).
//!
//! Each meta page brackets its payload with a duplicated `txnid_a`/
//! `txnid_b` pair for torn-write detection (I2) — the seqlock-style read
//! loop DESIGN NOTES §9 recommends: read `a`, read body, read `b`, retry
//! on mismatch. Three meta pages rotate through head/steady/tail roles on
//! each commit.

use crate::config::Geometry;
use crate::error::{CorruptionError, Result};
use crate::page::{Pgno, Txnid};

pub const MAGIC: u32 = 0xBEEF_B17E;
pub const DATA_VERSION: u32 = 3;

pub const FREE_DBI: u32 = 0;
pub const MAIN_DBI: u32 = 1;

/// Durability signature carried in a meta page (spec §3.1, glossary
/// "Steady meta"/"Weak meta").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSign {
    None,
    Weak,
    Steady(u64),
}

impl DataSign {
    pub fn is_steady(self) -> bool {
        matches!(self, DataSign::Steady(_))
    }

    fn encode(self) -> u64 {
        match self {
            DataSign::None => 0,
            DataSign::Weak => 1,
            DataSign::Steady(h) => h.max(2),
        }
    }

    fn decode(v: u64) -> Self {
        match v {
            0 => DataSign::None,
            1 => DataSign::Weak,
            h => DataSign::Steady(h),
        }
    }
}

/// Per-table descriptor, stored inline in meta for FREE_DBI/MAIN_DBI and
/// as a MAIN_DBI value (with `N_TREE`) for user tables (spec §3.1 "Tree
/// descriptor", §6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeDescriptor {
    pub flags: crate::config::DbFlags,
    pub height: u16,
    pub root: Pgno,
    pub branch_pages: u64,
    pub leaf_pages: u64,
    pub large_pages: u64,
    pub entries: u64,
    pub sequence: u64,
    pub mod_txnid: Txnid,
}

impl TreeDescriptor {
    pub fn empty() -> Self {
        TreeDescriptor {
            flags: crate::config::DbFlags::empty(),
            height: 0,
            root: crate::page::INVALID_PGNO,
            branch_pages: 0,
            leaf_pages: 0,
            large_pages: 0,
            entries: 0,
            sequence: 0,
            mod_txnid: 0,
        }
    }

    pub fn is_empty_tree(&self) -> bool {
        self.root == crate::page::INVALID_PGNO
    }
}

/// In-memory form of a meta page (spec §3.1 "Meta page").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Meta {
    pub magic: u32,
    pub version: u32,
    pub txnid_a: Txnid,
    pub geometry: GeoFields,
    pub gc_tree: TreeDescriptor,
    pub main_tree: TreeDescriptor,
    pub sign: u64,
    pub pages_retired: u64,
    pub boot_id: u64,
    pub txnid_b: Txnid,
}

/// Geometry fields duplicated into every meta page (a flattened
/// [`Geometry`] so `Meta` stays `Copy`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeoFields {
    pub lower: u64,
    pub now: u64,
    pub upper: u64,
    pub grow_step: u64,
    pub shrink_threshold: u64,
    pub pagesize: u32,
}

impl From<Geometry> for GeoFields {
    fn from(g: Geometry) -> Self {
        GeoFields {
            lower: g.lower,
            now: g.now,
            upper: g.upper,
            grow_step: g.grow_step,
            shrink_threshold: g.shrink_threshold,
            pagesize: g.pagesize,
        }
    }
}

impl From<GeoFields> for Geometry {
    fn from(g: GeoFields) -> Self {
        Geometry {
            lower: g.lower,
            now: g.now,
            upper: g.upper,
            grow_step: g.grow_step,
            shrink_threshold: g.shrink_threshold,
            pagesize: g.pagesize,
        }
    }
}

impl Meta {
    pub fn new(txnid: Txnid, geometry: Geometry, boot_id: u64) -> Self {
        Meta {
            magic: MAGIC,
            version: DATA_VERSION,
            txnid_a: txnid,
            geometry: geometry.into(),
            gc_tree: TreeDescriptor::empty(),
            main_tree: TreeDescriptor::empty(),
            sign: DataSign::None.encode(),
            pages_retired: 0,
            boot_id,
            txnid_b: txnid,
        }
    }

    pub fn txnid(&self) -> Txnid {
        self.txnid_a
    }

    /// Torn-meta check (I2): `txnid_a` must equal `txnid_b`.
    pub fn validate_not_torn(&self) -> Result<()> {
        if self.txnid_a != self.txnid_b {
            return Err(CorruptionError::TornMeta {
                a: self.txnid_a,
                b: self.txnid_b,
            }
            .into());
        }
        Ok(())
    }

    pub fn validate_format(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(CorruptionError::BadSignature.into());
        }
        if self.version != DATA_VERSION {
            return Err(CorruptionError::VersionMismatch {
                found: self.version,
                expected: DATA_VERSION,
            }
            .into());
        }
        Ok(())
    }

    pub fn sign(&self) -> DataSign {
        DataSign::decode(self.sign)
    }

    pub fn set_sign(&mut self, sign: DataSign) {
        self.sign = sign.encode();
    }

    pub fn is_steady(&self) -> bool {
        self.sign().is_steady()
    }

    /// Upgrade a WEAK meta to effectively steady for recovery purposes
    /// when the boot id matches the current system boot (spec §6.1).
    pub fn effectively_steady(&self, current_boot_id: u64) -> bool {
        self.is_steady() || (self.sign() == DataSign::Weak && self.boot_id == current_boot_id)
    }
}

/// Which of the three meta slots currently holds each troika role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Troika {
    pub txnid: [Txnid; 3],
    pub steady: [bool; 3],
    pub recent: usize,
    pub prefer_steady: usize,
    pub tail: usize,
}

impl Troika {
    /// Read all three meta pages and compute the FSM state (spec §4.10
    /// `meta_tap`). `metas[i]` must already have passed
    /// [`Meta::validate_not_torn`]; a torn meta is treated as absent
    /// (its txnid is taken as 0 so it never wins `recent`/`prefer_steady`
    /// and always loses to `tail`).
    pub fn tap(metas: &[Option<Meta>; 3]) -> Troika {
        let txnid = std::array::from_fn(|i| metas[i].map(|m| m.txnid()).unwrap_or(0));
        let steady = std::array::from_fn(|i| metas[i].map(|m| m.is_steady()).unwrap_or(false));

        let mut recent = 0;
        for i in 1..3 {
            if txnid[i] > txnid[recent] {
                recent = i;
            }
        }

        let mut tail = 0;
        for i in 1..3 {
            if txnid[i] < txnid[tail] {
                tail = i;
            }
        }
        if tail == recent {
            // all three equal: pick any slot other than recent as tail.
            tail = (recent + 1) % 3;
        }

        // Preferred steady: among the steady slots, the one with the
        // highest txnid that is not `recent` when `recent` itself isn't
        // steady; falls back to `recent` if it is steady, else `tail`.
        let prefer_steady = if steady[recent] {
            recent
        } else {
            let mut best: Option<usize> = None;
            for i in 0..3 {
                if steady[i] && (best.is_none() || txnid[i] > txnid[best.unwrap()]) {
                    best = Some(i);
                }
            }
            best.unwrap_or(tail)
        };

        Troika {
            txnid,
            steady,
            recent,
            prefer_steady,
            tail,
        }
    }

    /// The slot writers should target next: the one that is neither
    /// `recent` (head) nor `prefer_steady` (spec §4.9 step 6: "the one in
    /// the troika that is NOT head and NOT preferred-steady").
    pub fn write_target(&self) -> usize {
        for i in 0..3 {
            if i != self.recent && i != self.prefer_steady {
                return i;
            }
        }
        self.tail
    }

    pub fn strict_valid(&self) -> bool {
        self.txnid[self.recent] >= self.txnid[self.tail]
    }
}
