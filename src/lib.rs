//! FlintDB: an embedded, single-process, file-based storage engine core.
//!
//! A [`Table`] owns one primary B+Tree index plus any number of secondary
//! indexes over a fixed [`Schema`], backed by a paged file, a bounded
//! buffer pool, and a write-ahead log for crash recovery. Mutate through
//! `Table::apply`/`apply_at`/`delete_at` directly for autocommit, or batch
//! several operations under one commit boundary with `Table::begin`.

mod btree;
mod buffer_pool;
mod config;
mod disk;
mod error;
mod freelist;
mod meta;
mod page;
mod schema;
mod table;
mod transaction;
mod variant;
mod wal;

pub use config::Rowid;
pub use error::{FlintError, Result};
pub use schema::{Column, Direction, IndexDef, Row, Schema, StorageOptions, WalMode};
pub use table::{FindOptions, Op, Predicate, Table};
pub use transaction::Transaction;
pub use variant::{ColumnType, TimeUnit, Value};
