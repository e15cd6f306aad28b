//! Explicit multi-operation transactions over a `Table`.
//!
//! Holds a `RwLockWriteGuard<TableState>` for the transaction's lifetime
//! and commits or rolls back every mutation made through it as one unit.
//! The status machine is `Active -> Committed | RolledBack -> Closed`, so
//! a use after commit or rollback is a distinguishable `UseAfterEnd` error
//! rather than a silent no-op.

use std::sync::RwLockWriteGuard;

use crate::config::Rowid;
use crate::error::{FlintError, Result};
use crate::schema::Row;
use crate::table::{Table, TableState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Active,
    Committed,
    RolledBack,
    Closed,
}

/// A transaction batches any number of row mutations under one WAL commit
/// boundary. Dropping an `Active` transaction without an explicit
/// `commit`/`rollback` implicitly rolls it back.
pub struct Transaction<'a> {
    table: &'a Table,
    guard: Option<RwLockWriteGuard<'a, TableState>>,
    status: Status,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(table: &'a Table) -> Transaction<'a> {
        let guard = table.state.write().unwrap();
        Transaction {
            table,
            guard: Some(guard),
            status: Status::Active,
        }
    }

    fn state(&mut self) -> Result<&mut TableState> {
        if self.status != Status::Active {
            return Err(FlintError::UseAfterEnd);
        }
        self.table.check_poisoned()?;
        Ok(self.guard.as_mut().expect("guard present while Active"))
    }

    pub fn apply(&mut self, row: Row) -> Result<Rowid> {
        let table = self.table;
        let result = table.apply_in(self.state()?, row);
        if let Err(ref e) = result {
            table.record_if_fatal(e);
        }
        result
    }

    pub fn apply_at(&mut self, rowid: Rowid, row: Row) -> Result<()> {
        let table = self.table;
        let result = table.apply_at_in(self.state()?, rowid, row);
        if let Err(ref e) = result {
            table.record_if_fatal(e);
        }
        result
    }

    pub fn delete_at(&mut self, rowid: Rowid) -> Result<()> {
        let table = self.table;
        let result = table.delete_at_in(self.state()?, rowid);
        if let Err(ref e) = result {
            table.record_if_fatal(e);
        }
        result
    }

    pub fn read(&mut self, rowid: Rowid) -> Result<Option<Row>> {
        let table = self.table;
        let state = self.state()?;
        let result = table.read_locked(state, rowid);
        if let Err(ref e) = result {
            table.record_if_fatal(e);
        }
        result
    }

    /// Commits every mutation made so far: logs WAL records, fsyncs, and
    /// writes dirty pages back to the page file.
    pub fn commit(mut self) -> Result<()> {
        let table = self.table;
        table.commit_locked(self.state()?)?;
        self.status = Status::Committed;
        self.guard = None;
        Ok(())
    }

    /// Discards every mutation made so far and reloads meta from disk.
    pub fn rollback(mut self) -> Result<()> {
        let table = self.table;
        table.rollback_locked(self.state()?)?;
        self.status = Status::RolledBack;
        self.guard = None;
        Ok(())
    }
}

impl<'a> Drop for Transaction<'a> {
    fn drop(&mut self) {
        if self.status == Status::Active {
            if let Some(mut guard) = self.guard.take() {
                let _ = self.table.rollback_locked(&mut guard);
            }
            self.status = Status::Closed;
        }
    }
}
