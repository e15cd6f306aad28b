//! Table façade: schema-bound rows over a primary index plus any number
//! of secondary indexes, rowid allocation, and a small `find` predicate
//! language.
//!
//! Built from the lower layers with a coarse single-writer lock
//! (`RwLock<TableState>`, write side taken only by mutating calls) guarding
//! the page store and live meta, with the buffer pool and WAL doing their
//! own finer-grained locking underneath.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use crate::btree::{self, BTreeHandle, Cursor};
use crate::buffer_pool::BufferPool;
use crate::config::Rowid;
use crate::disk::PageStore;
use crate::error::{FlintError, Result};
use crate::meta::{self, IndexMeta, Meta};
use crate::schema::{key_values_for, Row, Schema};
use crate::variant::{compose_key, Value};
use crate::wal::{self, RecordKind, Wal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
    Like,
    In,
}

/// One `COLUMN OP LITERAL` clause; `find`'s predicate language is an
/// AND-chain of these plus an optional index hint and row limit.
#[derive(Debug, Clone)]
pub struct Predicate {
    pub column: String,
    pub op: Op,
    pub literal: Value,
    pub literals: Vec<Value>, // populated for `In`
}

#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub limit: Option<usize>,
    pub use_index: Option<String>,
}

pub(crate) struct TableState {
    store: PageStore,
    meta: Meta,
}

/// A fatal error kind the table is poisoned with: `CorruptRecord` and
/// `WalCorrupt` are unrecoverable for that handle, so every subsequent
/// operation returns the same error instead of continuing on damaged state.
enum PoisonReason {
    CorruptRecord(String),
    WalCorrupt(String),
}

pub struct Table {
    pub(crate) state: RwLock<TableState>,
    pool: BufferPool,
    wal: Option<Wal>,
    schema: Schema,
    path: PathBuf,
    poison: Mutex<Option<PoisonReason>>,
}

fn wal_path(path: &Path) -> PathBuf {
    let mut p = path.as_os_str().to_owned();
    p.push(".wal");
    PathBuf::from(p)
}

fn desc_path(path: &Path) -> PathBuf {
    let mut p = path.as_os_str().to_owned();
    p.push(".desc");
    PathBuf::from(p)
}

fn wal_mode_byte(schema: &Schema) -> u8 {
    match schema.options.wal_mode {
        crate::schema::WalMode::Off => 0,
        crate::schema::WalMode::Log => 1,
        crate::schema::WalMode::Truncate => 2,
    }
}

impl Table {
    pub fn create(path: &Path, schema: Schema) -> Result<Table> {
        Registry::global().acquire(path)?;
        Self::create_locked(path, schema).inspect_err(|_| Registry::global().release(path))
    }

    fn create_locked(path: &Path, schema: Schema) -> Result<Table> {
        let (store, meta) = PageStore::create(path, &schema)?;
        fs::write(desc_path(path), schema.describe())?;

        let wal = if schema.options.wal_mode != crate::schema::WalMode::Off {
            Some(Wal::create(
                &wal_path(path),
                schema.options.compression,
                wal_mode_byte(&schema),
                schema.fingerprint(),
                schema.options.page_size as u32,
            )?)
        } else {
            None
        };

        let pool = BufferPool::new(schema.options.cache_size, schema.options.page_size, u32::MAX);

        log::info!("created table at {:?}", path);
        Ok(Table {
            state: RwLock::new(TableState { store, meta }),
            pool,
            wal,
            schema,
            path: path.to_path_buf(),
            poison: Mutex::new(None),
        })
    }

    pub fn open(path: &Path, expected: &Schema) -> Result<Table> {
        Registry::global().acquire(path)?;
        Self::open_locked(path, expected).inspect_err(|_| Registry::global().release(path))
    }

    fn open_locked(path: &Path, expected: &Schema) -> Result<Table> {
        let (store, meta, _meta_page) = PageStore::open(path)?;
        let schema = meta::decode_schema(&meta.schema_bytes)?;
        if schema.fingerprint() != expected.fingerprint() {
            return Err(FlintError::SchemaMismatch {
                expected: expected.fingerprint(),
                found: schema.fingerprint(),
            });
        }

        let wal = if schema.options.wal_mode != crate::schema::WalMode::Off {
            let w = Wal::open(&wal_path(path), schema.options.compression)?;
            Some(w)
        } else {
            None
        };

        let pool = BufferPool::new(schema.options.cache_size, schema.options.page_size, u32::MAX);
        let mut table = Table {
            state: RwLock::new(TableState { store, meta }),
            pool,
            wal,
            schema,
            path: path.to_path_buf(),
            poison: Mutex::new(None),
        };
        table.recover()?;
        log::info!("opened table at {:?}", path);
        Ok(table)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the stored fatal error if this handle has been poisoned by
    /// a prior `CorruptRecord`/`WalCorrupt`, so every later call keeps
    /// failing the same way instead of operating on damaged state.
    pub(crate) fn check_poisoned(&self) -> Result<()> {
        match &*self.poison.lock().unwrap() {
            Some(PoisonReason::CorruptRecord(msg)) => Err(FlintError::CorruptRecord(msg.clone())),
            Some(PoisonReason::WalCorrupt(msg)) => Err(FlintError::WalCorrupt(msg.clone())),
            None => Ok(()),
        }
    }

    pub(crate) fn record_if_fatal(&self, err: &FlintError) {
        let reason = match err {
            FlintError::CorruptRecord(msg) => Some(PoisonReason::CorruptRecord(msg.clone())),
            FlintError::WalCorrupt(msg) => Some(PoisonReason::WalCorrupt(msg.clone())),
            _ => None,
        };
        if let Some(reason) = reason {
            let mut poison = self.poison.lock().unwrap();
            if poison.is_none() {
                log::error!("table {:?} poisoned: {}", self.path, err);
                *poison = Some(reason);
            }
        }
    }

    /// Redo-committed / undo-uncommitted crash recovery: scan the WAL,
    /// replay `PageWrite` after-images for transactions that reached
    /// `Commit`, and roll back before-images for any transaction
    /// truncated before a terminal `Commit`/`Rollback`.
    fn recover(&mut self) -> Result<()> {
        let Some(wal) = &self.wal else { return Ok(()) };
        let records = wal.scan()?;

        let mut committed_lsns = std::collections::HashSet::new();
        let mut in_txn = Vec::new();
        let mut pending: Vec<wal::Record> = Vec::new();
        for rec in &records {
            match rec.kind {
                RecordKind::FormatHeader => {
                    let header = wal::decode_format_header(&rec.payload)?;
                    if header.fingerprint != self.schema.fingerprint() {
                        return Err(FlintError::WalCorrupt(format!(
                            "wal format header fingerprint {} does not match schema fingerprint {}",
                            header.fingerprint,
                            self.schema.fingerprint()
                        )));
                    }
                }
                RecordKind::Begin => {
                    pending.clear();
                }
                RecordKind::PageWrite | RecordKind::AllocPage | RecordKind::FreePage => {
                    pending.push(rec.clone());
                }
                RecordKind::Commit => {
                    for p in &pending {
                        committed_lsns.insert(p.lsn);
                    }
                    pending.clear();
                }
                RecordKind::Rollback => {
                    pending.clear();
                }
                RecordKind::Checkpoint => {}
            }
        }
        in_txn.extend(pending); // whatever's left never reached Commit/Rollback

        let state = self.state.get_mut().unwrap();
        for rec in &records {
            if rec.kind == RecordKind::PageWrite && committed_lsns.contains(&rec.lsn) {
                let pw = wal::decode_page_write(&rec.payload)?;
                let mut page = crate::page::Page::new(state.store.page_size());
                page.data.copy_from_slice(&pw.after);
                state.store.write_page(pw.pid, &page)?;
                log::debug!("redo lsn {} page {}", rec.lsn, pw.pid);
            }
        }
        for rec in in_txn.iter().rev() {
            if rec.kind == RecordKind::PageWrite {
                let pw = wal::decode_page_write(&rec.payload)?;
                let mut page = crate::page::Page::new(state.store.page_size());
                page.data.copy_from_slice(&pw.before);
                state.store.write_page(pw.pid, &page)?;
                log::warn!("undo uncommitted lsn {} page {}", rec.lsn, pw.pid);
            }
        }
        state.store.sync()?;
        Ok(())
    }

    /// Allocates the next rowid and appends a full row: primary index,
    /// every secondary index, and the hidden rowid map. Autocommit: begins
    /// and flushes its own single-operation transaction. Use `begin()` to
    /// batch several mutations under one WAL commit boundary instead.
    pub fn apply(&self, row: Row) -> Result<Rowid> {
        self.check_poisoned()?;
        let mut state = self.state.write().unwrap();
        let result = self.apply_in(&mut state, row).and_then(|rowid| {
            self.flush_meta(&mut state)?;
            Ok(rowid)
        });
        if let Err(ref e) = result {
            self.record_if_fatal(e);
        }
        result
    }

    /// Replaces the row at `rowid` with `row`, removing stale secondary
    /// index entries first so a changed indexed column doesn't leave a
    /// dangling entry behind. Autocommit; see `apply`.
    pub fn apply_at(&self, rowid: Rowid, row: Row) -> Result<()> {
        self.check_poisoned()?;
        let mut state = self.state.write().unwrap();
        let result = self.apply_at_in(&mut state, rowid, row).and_then(|()| self.flush_meta(&mut state));
        if let Err(ref e) = result {
            self.record_if_fatal(e);
        }
        result
    }

    /// Autocommit; see `apply`.
    pub fn delete_at(&self, rowid: Rowid) -> Result<()> {
        self.check_poisoned()?;
        let mut state = self.state.write().unwrap();
        let result = self.delete_at_in(&mut state, rowid).and_then(|()| self.flush_meta(&mut state));
        if let Err(ref e) = result {
            self.record_if_fatal(e);
        }
        result
    }

    pub(crate) fn apply_in(&self, state: &mut TableState, mut row: Row) -> Result<Rowid> {
        row.apply_defaults(&self.schema);
        row.validate(&self.schema)?;

        let rowid = state.meta.next_rowid;
        state.meta.next_rowid += 1;
        self.insert_all_indexes(state, &row, rowid)?;
        state.meta.row_count += 1;
        Ok(rowid)
    }

    pub(crate) fn apply_at_in(&self, state: &mut TableState, rowid: Rowid, mut row: Row) -> Result<()> {
        row.apply_defaults(&self.schema);
        row.validate(&self.schema)?;

        let old_pk = self.lookup_rowid_map(state, rowid)?.ok_or(FlintError::NotFound)?;
        let old_row = self.fetch_by_primary_key(state, &old_pk)?.ok_or(FlintError::NotFound)?;
        self.remove_all_indexes(state, &old_row, rowid)?;
        self.insert_all_indexes(state, &row, rowid)?;
        Ok(())
    }

    pub(crate) fn delete_at_in(&self, state: &mut TableState, rowid: Rowid) -> Result<()> {
        let pk = self.lookup_rowid_map(state, rowid)?.ok_or(FlintError::NotFound)?;
        let row = self.fetch_by_primary_key(state, &pk)?.ok_or(FlintError::NotFound)?;
        self.remove_all_indexes(state, &row, rowid)?;
        state.meta.row_count = state.meta.row_count.saturating_sub(1);
        Ok(())
    }

    /// Acquires the single-writer lock and returns a handle that batches
    /// any number of `apply`/`apply_at`/`delete_at` calls under one WAL
    /// commit boundary.
    pub fn begin(&self) -> crate::transaction::Transaction<'_> {
        crate::transaction::Transaction::new(self)
    }

    pub(crate) fn commit_locked(&self, state: &mut TableState) -> Result<()> {
        self.flush_meta(state)
    }

    /// Discards every dirty buffer-pool frame (undoing in-memory mutations
    /// never written back to the page file) and reloads meta from disk.
    pub(crate) fn rollback_locked(&self, state: &mut TableState) -> Result<()> {
        for (buf, _) in self.pool.dirty_frames() {
            self.pool.discard(buf);
        }
        state.store.clear_pending_alloc_free();
        state.meta = state.store.read_meta()?;
        Ok(())
    }

    pub fn read(&self, rowid: Rowid) -> Result<Option<Row>> {
        self.check_poisoned()?;
        let state = self.state.read().unwrap();
        let result = self.read_locked(&state, rowid);
        if let Err(ref e) = result {
            self.record_if_fatal(e);
        }
        result
    }

    pub(crate) fn read_locked(&self, state: &TableState, rowid: Rowid) -> Result<Option<Row>> {
        let pk = match self.lookup_rowid_map(state, rowid)? {
            Some(pk) => pk,
            None => return Ok(None),
        };
        self.fetch_by_primary_key(state, &pk)
    }

    pub fn row_count(&self) -> u64 {
        self.state.read().unwrap().meta.row_count
    }

    /// Restricted predicate evaluation: an AND-chain of `COLUMN OP LITERAL`
    /// clauses, an optional `USE INDEX` hint, and a row limit. Uses the
    /// hinted (or the first equality predicate's) index for a keyed
    /// lookup when possible; otherwise scans the primary index and
    /// filters in memory.
    pub fn find(&self, predicates: &[Predicate], opts: &FindOptions) -> Result<Vec<Row>> {
        self.check_poisoned()?;
        let result = self.find_locked(predicates, opts);
        if let Err(ref e) = result {
            self.record_if_fatal(e);
        }
        result
    }

    fn find_locked(&self, predicates: &[Predicate], opts: &FindOptions) -> Result<Vec<Row>> {
        let state = self.state.read().unwrap();
        let limit = opts.limit.unwrap_or(usize::MAX);

        // A hinted index name wins outright; otherwise fall back to any
        // index whose leading key column has an equality predicate on it.
        let hinted = opts
            .use_index
            .as_deref()
            .and_then(|n| self.schema.index_named(n));
        let chosen = hinted.or_else(|| {
            self.schema.indexes.iter().find(|idx| {
                idx.key_columns.first().is_some_and(|&c0| {
                    predicates
                        .iter()
                        .any(|p| p.op == Op::Eq && self.schema.column_index(&p.column) == Some(c0))
                })
            })
        });

        let mut out = Vec::new();
        if let Some(idx) = chosen {
            let pos = self.schema.indexes.iter().position(|i| i.name == idx.name).unwrap();
            let handle = state.meta.indexes[pos];
            let bt = BTreeHandle { root: handle.root, height: handle.height };
            let descending = idx.direction == crate::schema::Direction::Descending;

            // Exact lookup only when every key column of this index has an
            // equality predicate; otherwise fall back to a full index scan.
            let full_key: Option<Vec<Value>> = idx
                .key_columns
                .iter()
                .map(|&c| {
                    predicates
                        .iter()
                        .find(|p| p.op == Op::Eq && self.schema.column_index(&p.column) == Some(c))
                        .map(|p| p.literal.clone())
                })
                .collect();

            if let Some(key_values) = full_key {
                let key = compose_key(&key_values);
                if let Some(value) = btree::find(&state.store, &self.pool, &bt, &key, descending)? {
                    if let Some(row) = self.decode_index_value(&state, idx.is_primary, &value)? {
                        if matches_all(&row, &self.schema, predicates) {
                            out.push(row);
                        }
                    }
                }
                return Ok(out);
            }

            let start = btree::first_leaf(&state.store, &self.pool, &bt)?;
            let mut cursor = Cursor::new(&state.store, &self.pool, start, false);
            while out.len() < limit {
                match cursor.next()? {
                    Some((_, value)) => {
                        if let Some(row) = self.decode_index_value(&state, idx.is_primary, &value)? {
                            if matches_all(&row, &self.schema, predicates) {
                                out.push(row);
                            }
                        }
                    }
                    None => break,
                }
            }
            return Ok(out);
        }

        let pos = self.schema.indexes.iter().position(|i| i.is_primary).unwrap();
        let handle = state.meta.indexes[pos];
        let bt = BTreeHandle { root: handle.root, height: handle.height };
        let start = btree::first_leaf(&state.store, &self.pool, &bt)?;
        let mut cursor = Cursor::new(&state.store, &self.pool, start, false);
        while out.len() < limit {
            match cursor.next()? {
                Some((_, value)) => {
                    let row = decode_row(&value)?;
                    if matches_all(&row, &self.schema, predicates) {
                        out.push(row);
                    }
                }
                None => break,
            }
        }
        Ok(out)
    }

    /// Secondary index leaves store just a rowid; the primary index stores
    /// the full encoded row.
    fn decode_index_value(&self, state: &TableState, is_primary: bool, value: &[u8]) -> Result<Option<Row>> {
        if is_primary {
            Ok(Some(decode_row(value)?))
        } else {
            let rowid = Rowid::from_be_bytes(value[..8].try_into().unwrap());
            match self.lookup_rowid_map(state, rowid)? {
                Some(pk) => self.fetch_by_primary_key(state, &pk),
                None => Ok(None),
            }
        }
    }

    fn fetch_by_primary_key(&self, state: &TableState, pk_key: &[u8]) -> Result<Option<Row>> {
        let pos = self.schema.indexes.iter().position(|i| i.is_primary).unwrap();
        let handle = state.meta.indexes[pos];
        let bt = BTreeHandle { root: handle.root, height: handle.height };
        let primary = self.schema.primary_index();
        match btree::find(&state.store, &self.pool, &bt, pk_key, primary.direction == crate::schema::Direction::Descending)? {
            Some(value) => Ok(Some(decode_row(&value)?)),
            None => Ok(None),
        }
    }

    fn lookup_rowid_map(&self, state: &TableState, rowid: Rowid) -> Result<Option<Vec<u8>>> {
        let bt = BTreeHandle { root: state.meta.rowid_map.root, height: state.meta.rowid_map.height };
        let key = rowid.to_be_bytes();
        btree::find(&state.store, &self.pool, &bt, &key, false)
    }

    fn insert_all_indexes(&self, state: &mut TableState, row: &Row, rowid: Rowid) -> Result<()> {
        let schema = &self.schema;
        for (pos, idx) in schema.indexes.iter().enumerate() {
            let key_values = key_values_for(schema, idx, row);
            let mut key = compose_key(&key_values);
            let unique = idx.unique || idx.is_primary;
            if !unique {
                key.extend_from_slice(&rowid.to_be_bytes());
            }
            let value = if idx.is_primary {
                encode_row(row)
            } else {
                rowid.to_be_bytes().to_vec()
            };
            let mut handle = BTreeHandle {
                root: state.meta.indexes[pos].root,
                height: state.meta.indexes[pos].height,
            };
            let descending = idx.direction == crate::schema::Direction::Descending;
            btree::insert(&mut state.store, &self.pool, &mut handle, &key, &value, descending, unique)
                .map_err(|e| match e {
                    FlintError::DuplicateKey { .. } => FlintError::DuplicateKey { index: idx.name.clone() },
                    other => other,
                })?;
            state.meta.indexes[pos] = IndexMeta { root: handle.root, height: handle.height };
        }

        let mut rowid_handle = BTreeHandle {
            root: state.meta.rowid_map.root,
            height: state.meta.rowid_map.height,
        };
        let primary = schema.primary_index();
        let pk_key = compose_key(&key_values_for(schema, primary, row));
        btree::insert(&mut state.store, &self.pool, &mut rowid_handle, &rowid.to_be_bytes(), &pk_key, false, true)?;
        state.meta.rowid_map = IndexMeta { root: rowid_handle.root, height: rowid_handle.height };
        Ok(())
    }

    fn remove_all_indexes(&self, state: &mut TableState, row: &Row, rowid: Rowid) -> Result<()> {
        let schema = &self.schema;
        for (pos, idx) in schema.indexes.iter().enumerate() {
            let key_values = key_values_for(schema, idx, row);
            let mut key = compose_key(&key_values);
            let unique = idx.unique || idx.is_primary;
            if !unique {
                key.extend_from_slice(&rowid.to_be_bytes());
            }
            let mut handle = BTreeHandle {
                root: state.meta.indexes[pos].root,
                height: state.meta.indexes[pos].height,
            };
            let descending = idx.direction == crate::schema::Direction::Descending;
            btree::remove(&mut state.store, &self.pool, &mut handle, &key, descending)?;
            state.meta.indexes[pos] = IndexMeta { root: handle.root, height: handle.height };
        }
        let mut rowid_handle = BTreeHandle {
            root: state.meta.rowid_map.root,
            height: state.meta.rowid_map.height,
        };
        btree::remove(&mut state.store, &self.pool, &mut rowid_handle, &rowid.to_be_bytes(), false)?;
        state.meta.rowid_map = IndexMeta { root: rowid_handle.root, height: rowid_handle.height };
        Ok(())
    }

    /// Logs dirty pages to the WAL (if enabled), fsyncs, writes them back
    /// to the page file, and persists the meta page.
    fn flush_meta(&self, state: &mut TableState) -> Result<()> {
        let (allocs, frees) = state.store.take_pending_alloc_free();
        if let Some(wal) = &self.wal {
            let lsn = wal.append(RecordKind::Begin, &[])?;
            for pid in &allocs {
                wal.append(RecordKind::AllocPage, &pid.to_be_bytes())?;
            }
            for pid in &frees {
                wal.append(RecordKind::FreePage, &pid.to_be_bytes())?;
            }
            for (buf, pid) in self.pool.dirty_frames() {
                let after = self.pool.read_frame(buf).data.clone();
                let before = state.store.read_page(pid).map(|p| p.data).unwrap_or_default();
                let payload = wal::encode_page_write(pid, &before, &after);
                let rec_lsn = wal.append(RecordKind::PageWrite, &payload)?;
                self.pool.mark_dirty(buf, rec_lsn);
            }
            wal.append(RecordKind::Commit, &[])?;
            wal.flush()?;
            let _ = lsn;
        }

        for (buf, pid) in self.pool.dirty_frames() {
            let page = self.pool.read_frame(buf);
            state.store.write_page(pid, &page)?;
            drop(page);
            self.pool.clear_dirty(buf);
        }
        state.store.write_meta(&state.meta)?;
        state.store.write_freelist()?;
        state.store.sync()?;

        if let Some(wal) = &self.wal {
            match self.schema.options.wal_mode {
                crate::schema::WalMode::Truncate => {
                    wal.truncate()?;
                    wal.write_format_header(
                        wal_mode_byte(&self.schema),
                        self.schema.fingerprint(),
                        self.schema.options.page_size as u32,
                    )?;
                }
                crate::schema::WalMode::Log => {
                    wal.append(RecordKind::Checkpoint, &[])?;
                    wal.flush()?;
                }
                crate::schema::WalMode::Off => {}
            }
        }
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        let state = self.state.read().unwrap();
        state.store.sync()?;
        *self.poison.lock().unwrap() = None;
        Ok(())
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        Registry::global().release(&self.path);
    }
}

fn encode_row(row: &Row) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(row.values().len() as u32).to_le_bytes());
    for v in row.values() {
        let enc = v.encode();
        out.extend_from_slice(&(enc.len() as u32).to_le_bytes());
        out.extend_from_slice(&enc);
    }
    out
}

fn decode_row(buf: &[u8]) -> Result<Row> {
    let err = || FlintError::CorruptRecord("truncated row record".into());
    let n = u32::from_le_bytes(buf.get(0..4).ok_or_else(err)?.try_into().unwrap()) as usize;
    let mut pos = 4usize;
    let mut values = Vec::with_capacity(n);
    for _ in 0..n {
        let len = u32::from_le_bytes(buf.get(pos..pos + 4).ok_or_else(err)?.try_into().unwrap()) as usize;
        pos += 4;
        let field = buf.get(pos..pos + len).ok_or_else(err)?;
        let mut p = 0usize;
        values.push(Value::decode(field, &mut p)?);
        pos += len;
    }
    Ok(Row::new(values))
}

fn matches_all(row: &Row, schema: &Schema, predicates: &[Predicate]) -> bool {
    predicates.iter().all(|p| matches_one(row, schema, p))
}

fn matches_one(row: &Row, schema: &Schema, p: &Predicate) -> bool {
    let Some(col) = schema.column_index(&p.column) else { return false };
    let Some(val) = row.get(col) else { return false };
    match p.op {
        Op::Eq => values_eq(val, &p.literal),
        Op::Lt => compare_values(val, &p.literal) == Some(std::cmp::Ordering::Less),
        Op::Lte => matches!(compare_values(val, &p.literal), Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)),
        Op::Gt => compare_values(val, &p.literal) == Some(std::cmp::Ordering::Greater),
        Op::Gte => matches!(compare_values(val, &p.literal), Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)),
        Op::Like => match (val, &p.literal) {
            (Value::Str(s), Value::Str(pattern)) => like_match(s, pattern),
            _ => false,
        },
        Op::In => p.literals.iter().any(|lit| values_eq(val, lit)),
    }
}

fn values_eq(a: &Value, b: &Value) -> bool {
    compare_values(a, b) == Some(std::cmp::Ordering::Equal)
}

fn compare_values(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    Some(a.encode_key_component().cmp(&b.encode_key_component()))
}

/// `%`-as-wildcard, case-sensitive LIKE match (no escaping of literal `%`).
fn like_match(s: &str, pattern: &str) -> bool {
    let parts: Vec<&str> = pattern.split('%').collect();
    if parts.len() == 1 {
        return s == pattern;
    }
    let mut rest = s;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !rest.starts_with(part) {
                return false;
            }
            rest = &rest[part.len()..];
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(at) => rest = &rest[at + part.len()..],
                None => return false,
            }
        }
    }
    true
}

/// Process-wide registry enforcing one open handle per table path, so two
/// `Table::open` calls on the same file don't race each other's buffer
/// pools.
pub struct Registry {
    open_paths: RwLock<HashMap<PathBuf, ()>>,
}

impl Registry {
    pub fn global() -> &'static Registry {
        static REGISTRY: std::sync::OnceLock<Registry> = std::sync::OnceLock::new();
        REGISTRY.get_or_init(|| Registry {
            open_paths: RwLock::new(HashMap::new()),
        })
    }

    pub fn acquire(&self, path: &Path) -> Result<()> {
        let mut paths = self.open_paths.write().unwrap();
        if paths.contains_key(path) {
            return Err(FlintError::CorruptRecord(format!(
                "table {path:?} is already open in this process"
            )));
        }
        paths.insert(path.to_path_buf(), ());
        Ok(())
    }

    pub fn release(&self, path: &Path) {
        self.open_paths.write().unwrap().remove(path);
    }
}

