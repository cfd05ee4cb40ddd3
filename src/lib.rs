/*!
An embeddable, transactional, memory-mapped ordered key/value storage
engine in the LMDB/libmdbx family: MVCC via a copy-on-write B+tree,
single-writer/many-readers concurrency, and a rotating troika of meta
pages for crash-safe commit.

See [`env::Env`] for the top-level handle, [`txn::Txn`]/[`txn::ReadTxn`]
for transactions, and [`cursor::Cursor`] for ordered iteration.
*/
#![allow(dead_code)]

mod btree;
pub mod commit;
pub mod config;
pub mod cursor;
mod dpl;
pub mod env;
pub mod error;
pub mod gc;
pub mod logging;
pub mod meta;
mod node;
pub mod osal;
mod pnl;
pub mod reader;
mod rkl;
pub mod page;
mod txl;
pub mod txn;

pub use config::{Durability, DbFlags, EnvFlags, EnvOptions, Geometry};
pub use cursor::{Cursor, CursorResult};
pub use env::Env;
pub use error::{Error, Result};
pub use page::{Pgno, Txnid};
pub use txn::{ReadTxn, Txn};
