//! Reader registry: slot bind/unbind, parking, oldest-reader scan, and
//! dead-reader recovery (spec §3.1 "Reader slot", §4.7, grounded on
//! `original_source/src/lck-posix.c`).

use parking_lot::Mutex;

use crate::page::Txnid;

/// Sentinel `tid` values distinguishing special slot states from a real
/// thread id (spec §4.7).
pub const TID_TXN_PARKED: u64 = u64::MAX;
pub const TID_TXN_OUSTED: u64 = u64::MAX - 1;

/// One reader-table entry, cache-line sized in spirit (spec §3.1 "Reader
/// slot": "aligned to a cache line, holding (txnid, tid, pid,
/// snapshot-pages-used, snapshot-pages-retired)").
#[derive(Debug, Clone, Copy, Default)]
pub struct ReaderSlot {
    pub txnid: Txnid,
    pub tid: u64,
    pub pid: u32,
    pub snapshot_pages_used: u64,
    pub snapshot_pages_retired: u64,
    occupied: bool,
}

impl ReaderSlot {
    pub fn is_live(&self) -> bool {
        self.occupied && self.tid != TID_TXN_PARKED
    }

    pub fn is_parked(&self) -> bool {
        self.occupied && self.tid == TID_TXN_PARKED
    }

    pub fn is_ousted(&self) -> bool {
        self.occupied && self.tid == TID_TXN_OUSTED
    }
}

/// The lock file's reader table (spec §6.2 "Lock file format": "a
/// flexible array of `reader_slot_t`").
pub struct ReaderTable {
    slots: Mutex<Vec<ReaderSlot>>,
}

impl ReaderTable {
    pub fn new(max_readers: usize) -> Self {
        ReaderTable {
            slots: Mutex::new(vec![ReaderSlot::default(); max_readers]),
        }
    }

    /// Bind a free slot to `(pid, tid)` at `txnid` (spec §4.7 "A thread
    /// binds a slot with a compare-and-swap on (pid, tid, txnid)"). A
    /// single-process engine doesn't need the real CAS race the original
    /// handles across processes; the table mutex already serializes this.
    pub fn bind(&self, pid: u32, tid: u64, txnid: Txnid, pages_used: u64, pages_retired: u64) -> crate::error::Result<usize> {
        let mut slots = self.slots.lock();
        for (i, slot) in slots.iter_mut().enumerate() {
            if !slot.occupied {
                *slot = ReaderSlot {
                    txnid,
                    tid,
                    pid,
                    snapshot_pages_used: pages_used,
                    snapshot_pages_retired: pages_retired,
                    occupied: true,
                };
                return Ok(i);
            }
        }
        Err(crate::error::CapacityError::ReadersFull.into())
    }

    pub fn unbind(&self, slot_id: usize) {
        let mut slots = self.slots.lock();
        if let Some(s) = slots.get_mut(slot_id) {
            *s = ReaderSlot::default();
        }
    }

    /// Swap a bound slot's tid to PARKED, releasing its hold on `txnid`
    /// for oldest-reader purposes while leaving the slot occupied (spec
    /// §5 "Cancellation and timeout").
    pub fn park(&self, slot_id: usize) -> crate::error::Result<()> {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(slot_id).ok_or(crate::error::SemanticError::BadRslot)?;
        slot.tid = TID_TXN_PARKED;
        Ok(())
    }

    /// Resume a parked slot at `txnid`, unless it was ousted while
    /// parked (the snapshot it held was reclaimed), in which case the
    /// caller must begin a new transaction instead.
    pub fn unpark(&self, slot_id: usize, tid: u64, txnid: Txnid) -> crate::error::Result<()> {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(slot_id).ok_or(crate::error::SemanticError::BadRslot)?;
        if slot.tid == TID_TXN_OUSTED {
            return Err(crate::error::ConcurrencyError::Ousted.into());
        }
        slot.tid = tid;
        slot.txnid = txnid;
        Ok(())
    }

    /// Lowest live `txnid` across all bound, non-parked slots, or `None`
    /// if no reader currently holds a snapshot (spec §4.7 "Oldest-reader
    /// scanning walks live slots and computes `min(txnid)`").
    pub fn oldest_reader(&self) -> Option<Txnid> {
        self.slots.lock().iter().filter(|s| s.is_live()).map(|s| s.txnid).min()
    }

    /// Mark every occupied slot whose `pid` fails `is_alive` as free,
    /// returning how many were reclaimed (spec §4.7 "Dead-reader
    /// recovery"). `is_alive` is the OS-specific liveness probe
    /// (`crate::osal`), kept generic here so this module stays portable.
    pub fn reap_dead(&self, is_alive: impl Fn(u32) -> bool) -> usize {
        let mut slots = self.slots.lock();
        let mut reaped = 0;
        for slot in slots.iter_mut() {
            if slot.occupied && !is_alive(slot.pid) {
                *slot = ReaderSlot::default();
                reaped += 1;
            }
        }
        reaped
    }

    pub fn snapshot(&self) -> Vec<ReaderSlot> {
        self.slots.lock().clone()
    }
}

/// Outcome of asking a caller-supplied "handle-slow-reader" hook what to
/// do about a laggard blocking GC reclamation (spec §4.7 "Laggard kick").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaggardDecision {
    Retry,
    GiveUp,
    Park,
}

/// A plain function-pointer hook, matching the original's callback-based
/// HSR rather than a trait object (spec DESIGN NOTES §9: "the user HSR
/// callback is a plain function pointer, no hidden control flow").
pub type LaggardHook = fn(pid: u32, tid: u64, behind: u64) -> LaggardDecision;

pub fn default_laggard_hook(_pid: u32, _tid: u64, _behind: u64) -> LaggardDecision {
    LaggardDecision::GiveUp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_and_oldest_reader() {
        let table = ReaderTable::new(4);
        let s1 = table.bind(1, 100, 5, 0, 0).unwrap();
        let _s2 = table.bind(1, 101, 9, 0, 0).unwrap();
        assert_eq!(table.oldest_reader(), Some(5));
        table.unbind(s1);
        assert_eq!(table.oldest_reader(), Some(9));
    }

    #[test]
    fn parked_reader_excluded_from_oldest() {
        let table = ReaderTable::new(4);
        let s1 = table.bind(1, 100, 5, 0, 0).unwrap();
        table.bind(1, 101, 9, 0, 0).unwrap();
        table.park(s1).unwrap();
        assert_eq!(table.oldest_reader(), Some(9));
        table.unpark(s1, 100, 12).unwrap();
        assert_eq!(table.oldest_reader(), Some(9));
    }

    #[test]
    fn readers_full_when_table_exhausted() {
        let table = ReaderTable::new(1);
        table.bind(1, 1, 1, 0, 0).unwrap();
        let err = table.bind(1, 2, 2, 0, 0).unwrap_err();
        assert!(matches!(err, crate::error::Error::Capacity(crate::error::CapacityError::ReadersFull)));
    }

    #[test]
    fn reap_dead_clears_slots_whose_process_is_gone() {
        let table = ReaderTable::new(4);
        table.bind(111, 1, 1, 0, 0).unwrap();
        table.bind(222, 1, 2, 0, 0).unwrap();
        let reaped = table.reap_dead(|pid| pid != 111);
        assert_eq!(reaped, 1);
        assert_eq!(table.oldest_reader(), Some(2));
    }
}
