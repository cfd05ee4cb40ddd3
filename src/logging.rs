//! Thin logging setup (spec §1: "the... logging framework" is out of
//! scope as a peripheral surface, but the ambient logging calls
//! throughout this crate still need a backend to attach to, the way the
//! teacher wires up `log`/`env_logger`).

/// Install `env_logger` as the global logger, honoring `RUST_LOG` if
/// set and otherwise defaulting to `warn`. Safe to call more than once;
/// later calls are no-ops.
pub fn init() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).try_init();
}

/// Log a commit at `info` with its txnid and dirty-page count, matching
/// the granularity the teacher logs bucket mutations at.
pub fn log_commit(txnid: crate::page::Txnid, dirty_pages: usize, durability: crate::config::Durability) {
    log::info!("commit txnid={txnid} dirty_pages={dirty_pages} durability={durability:?}");
}

pub fn log_abort(txnid: crate::page::Txnid) {
    log::debug!("abort txnid={txnid}");
}

pub fn log_gc_update(committing_txnid: crate::page::Txnid, retired: usize) {
    log::debug!("gc_update txnid={committing_txnid} retired_pages={retired}");
}
