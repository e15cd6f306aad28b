//! Table header / metadata page (`META_PID`): allocator state, the rowid
//! counter, per-index B+Tree roots, the row-count invariant, and the
//! serialized schema.
//!
//! Design choice (resolved Open Question, see DESIGN.md): the serialized
//! schema must fit within one page. Real schemas (a few dozen columns and
//! indexes at most) comfortably fit a 4 KiB page; a schema that doesn't is
//! rejected at creation with `CorruptRecord` rather than spilling across a
//! page chain, keeping the header a single fixed-position read.

use crate::config::{PageId, Rowid};
use crate::error::{FlintError, Result};
use crate::page::{Page, PageKind};
use crate::schema::{Column, Direction, IndexDef, Schema, StorageOptions, WalMode};
use crate::variant::{ColumnType, TimeUnit, Value};

pub const FREE_LIST_HEAD_OFFS: usize = 0;
pub const NEXT_PAGE_ID_OFFS: usize = 4;
pub const NEXT_ROWID_OFFS: usize = 8;
pub const SCHEMA_FINGERPRINT_OFFS: usize = 16;
pub const ROW_COUNT_OFFS: usize = 24;
pub const N_INDEXES_OFFS: usize = 32;
pub const SCHEMA_LEN_OFFS: usize = 34;
pub const ROWID_MAP_OFFS: usize = 38;
pub const META_FIXED_SIZE: usize = 46;
pub const INDEX_META_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, Default)]
pub struct IndexMeta {
    pub root: PageId,
    pub height: u32,
}

/// Live table header state, kept in sync with the WAL-logged meta page so
/// the row-count invariant survives rollback.
#[derive(Debug, Clone)]
pub struct Meta {
    pub free_list_head: PageId,
    pub next_page_id: PageId,
    pub next_rowid: Rowid,
    pub schema_fingerprint: u64,
    pub row_count: u64,
    /// Hidden rowid -> primary-key-bytes index, not part of the schema,
    /// used to locate a row's current key for update/delete by rowid and
    /// to clean up secondary index entries on update.
    pub rowid_map: IndexMeta,
    pub indexes: Vec<IndexMeta>,
    pub schema_bytes: Vec<u8>,
}

impl Meta {
    pub fn new(schema: &Schema) -> Meta {
        Meta {
            free_list_head: 0,
            next_page_id: 1,
            next_rowid: 1,
            schema_fingerprint: schema.fingerprint(),
            row_count: 0,
            rowid_map: IndexMeta::default(),
            indexes: vec![IndexMeta::default(); schema.indexes.len()],
            schema_bytes: encode_schema(schema),
        }
    }

    pub fn write_to(&self, page: &mut Page) -> Result<()> {
        page.set_kind(PageKind::Meta);
        page.set_u32(FREE_LIST_HEAD_OFFS, self.free_list_head);
        page.set_u32(NEXT_PAGE_ID_OFFS, self.next_page_id);
        page.set_u64(NEXT_ROWID_OFFS, self.next_rowid);
        page.set_u64(SCHEMA_FINGERPRINT_OFFS, self.schema_fingerprint);
        page.set_u64(ROW_COUNT_OFFS, self.row_count);
        page.set_u16(N_INDEXES_OFFS, self.indexes.len() as u16);
        page.set_u32(SCHEMA_LEN_OFFS, self.schema_bytes.len() as u32);
        page.set_u32(ROWID_MAP_OFFS, self.rowid_map.root);
        page.set_u32(ROWID_MAP_OFFS + 4, self.rowid_map.height);

        let indexes_offs = META_FIXED_SIZE;
        let schema_offs = indexes_offs + self.indexes.len() * INDEX_META_SIZE;
        if schema_offs + self.schema_bytes.len() > page.page_size() {
            return Err(FlintError::CorruptRecord(
                "schema descriptor does not fit in one page".into(),
            ));
        }
        for (i, im) in self.indexes.iter().enumerate() {
            let off = indexes_offs + i * INDEX_META_SIZE;
            page.set_u32(off, im.root);
            page.set_u32(off + 4, im.height);
        }
        page.data[schema_offs..schema_offs + self.schema_bytes.len()]
            .copy_from_slice(&self.schema_bytes);
        Ok(())
    }

    pub fn read_from(page: &Page) -> Result<Meta> {
        let free_list_head = page.get_u32(FREE_LIST_HEAD_OFFS);
        let next_page_id = page.get_u32(NEXT_PAGE_ID_OFFS);
        let next_rowid = page.get_u64(NEXT_ROWID_OFFS);
        let schema_fingerprint = page.get_u64(SCHEMA_FINGERPRINT_OFFS);
        let row_count = page.get_u64(ROW_COUNT_OFFS);
        let n_indexes = page.get_u16(N_INDEXES_OFFS) as usize;
        let schema_len = page.get_u32(SCHEMA_LEN_OFFS) as usize;
        let rowid_map = IndexMeta {
            root: page.get_u32(ROWID_MAP_OFFS),
            height: page.get_u32(ROWID_MAP_OFFS + 4),
        };

        let indexes_offs = META_FIXED_SIZE;
        let schema_offs = indexes_offs + n_indexes * INDEX_META_SIZE;
        if schema_offs + schema_len > page.page_size() {
            return Err(FlintError::CorruptRecord("meta page bounds exceeded".into()));
        }
        let mut indexes = Vec::with_capacity(n_indexes);
        for i in 0..n_indexes {
            let off = indexes_offs + i * INDEX_META_SIZE;
            indexes.push(IndexMeta {
                root: page.get_u32(off),
                height: page.get_u32(off + 4),
            });
        }
        let schema_bytes = page.data[schema_offs..schema_offs + schema_len].to_vec();

        Ok(Meta {
            free_list_head,
            next_page_id,
            next_rowid,
            schema_fingerprint,
            row_count,
            rowid_map,
            indexes,
            schema_bytes,
        })
    }
}

// Minimal self-describing schema serialization. This only runs once at
// table creation/open, so plain length-prefixed fields are clearer here
// than reusing the order-preserving key codec from `variant.rs`.
fn encode_schema(schema: &Schema) -> Vec<u8> {
    let mut out = Vec::new();
    let push_str = |out: &mut Vec<u8>, s: &str| {
        out.extend_from_slice(&(s.len() as u32).to_le_bytes());
        out.extend_from_slice(s.as_bytes());
    };
    let push_type = |out: &mut Vec<u8>, ty: &ColumnType| {
        let (tag, a, b): (u8, u32, u32) = match ty {
            ColumnType::I8 => (1, 0, 0),
            ColumnType::I16 => (2, 0, 0),
            ColumnType::I32 => (3, 0, 0),
            ColumnType::I64 => (4, 0, 0),
            ColumnType::U8 => (5, 0, 0),
            ColumnType::U16 => (6, 0, 0),
            ColumnType::U32 => (7, 0, 0),
            ColumnType::U64 => (8, 0, 0),
            ColumnType::F32 => (9, 0, 0),
            ColumnType::F64 => (10, 0, 0),
            ColumnType::Decimal { precision, scale } => (11, *precision as u32, *scale as u32),
            ColumnType::Str { max_len } => (12, *max_len, 0),
            ColumnType::Bytes { len } => (13, *len, 0),
            ColumnType::DateTime { unit } => (
                14,
                if matches!(unit, TimeUnit::Millis) { 1 } else { 0 },
                0,
            ),
        };
        out.push(tag);
        out.extend_from_slice(&a.to_le_bytes());
        out.extend_from_slice(&b.to_le_bytes());
    };

    out.extend_from_slice(&(schema.columns.len() as u32).to_le_bytes());
    for c in &schema.columns {
        push_str(&mut out, &c.name);
        push_type(&mut out, &c.ty);
        out.push(c.not_null as u8);
        let default = c.default.encode();
        out.extend_from_slice(&(default.len() as u32).to_le_bytes());
        out.extend_from_slice(&default);
    }

    out.extend_from_slice(&(schema.indexes.len() as u32).to_le_bytes());
    for idx in &schema.indexes {
        push_str(&mut out, &idx.name);
        out.extend_from_slice(&(idx.key_columns.len() as u32).to_le_bytes());
        for &k in &idx.key_columns {
            out.extend_from_slice(&(k as u32).to_le_bytes());
        }
        out.push(matches!(idx.direction, Direction::Descending) as u8);
        out.push(idx.unique as u8);
        out.push(idx.is_primary as u8);
    }

    out.extend_from_slice(&(schema.options.page_size as u32).to_le_bytes());
    out.extend_from_slice(&(schema.options.cache_size as u32).to_le_bytes());
    out.push(match schema.options.wal_mode {
        WalMode::Off => 0,
        WalMode::Log => 1,
        WalMode::Truncate => 2,
    });
    out.push(schema.options.compression as u8);
    out.push(schema.options.intern_strings as u8);
    out.extend_from_slice(&(schema.options.intern_threshold as u32).to_le_bytes());
    out
}

pub fn decode_schema(buf: &[u8]) -> Result<Schema> {
    let mut pos = 0usize;
    let read_u32 = |buf: &[u8], pos: &mut usize| -> Result<u32> {
        let v = u32::from_le_bytes(
            buf.get(*pos..*pos + 4)
                .ok_or_else(|| FlintError::CorruptRecord("truncated schema".into()))?
                .try_into()
                .unwrap(),
        );
        *pos += 4;
        Ok(v)
    };
    let read_str = |buf: &[u8], pos: &mut usize| -> Result<String> {
        let len = read_u32(buf, pos)? as usize;
        let s = std::str::from_utf8(
            buf.get(*pos..*pos + len)
                .ok_or_else(|| FlintError::CorruptRecord("truncated schema string".into()))?,
        )
        .map_err(|_| FlintError::CorruptRecord("invalid utf8 in schema".into()))?
        .to_string();
        *pos += len;
        Ok(s)
    };

    let n_cols = read_u32(buf, &mut pos)?;
    let mut columns = Vec::with_capacity(n_cols as usize);
    for _ in 0..n_cols {
        let name = read_str(buf, &mut pos)?;
        let tag = *buf
            .get(pos)
            .ok_or_else(|| FlintError::CorruptRecord("truncated schema type tag".into()))?;
        pos += 1;
        let a = read_u32(buf, &mut pos)?;
        let b = read_u32(buf, &mut pos)?;
        let ty = match tag {
            1 => ColumnType::I8,
            2 => ColumnType::I16,
            3 => ColumnType::I32,
            4 => ColumnType::I64,
            5 => ColumnType::U8,
            6 => ColumnType::U16,
            7 => ColumnType::U32,
            8 => ColumnType::U64,
            9 => ColumnType::F32,
            10 => ColumnType::F64,
            11 => ColumnType::Decimal {
                precision: a as u8,
                scale: b as u8,
            },
            12 => ColumnType::Str { max_len: a },
            13 => ColumnType::Bytes { len: a },
            14 => ColumnType::DateTime {
                unit: if a == 1 { TimeUnit::Millis } else { TimeUnit::Seconds },
            },
            other => {
                return Err(FlintError::CorruptRecord(format!(
                    "unknown column type tag {other}"
                )))
            }
        };
        let not_null = *buf
            .get(pos)
            .ok_or_else(|| FlintError::CorruptRecord("truncated schema not_null".into()))?
            != 0;
        pos += 1;
        let default_len = read_u32(buf, &mut pos)? as usize;
        let default_bytes = buf
            .get(pos..pos + default_len)
            .ok_or_else(|| FlintError::CorruptRecord("truncated schema default".into()))?;
        let mut dp = 0usize;
        let default = Value::decode(default_bytes, &mut dp)?;
        pos += default_len;
        columns.push(Column {
            name,
            ty,
            not_null,
            default,
        });
    }

    let n_idx = read_u32(buf, &mut pos)?;
    let mut indexes = Vec::with_capacity(n_idx as usize);
    for _ in 0..n_idx {
        let name = read_str(buf, &mut pos)?;
        let n_key_cols = read_u32(buf, &mut pos)?;
        let mut key_columns = Vec::with_capacity(n_key_cols as usize);
        for _ in 0..n_key_cols {
            key_columns.push(read_u32(buf, &mut pos)? as usize);
        }
        let descending = *buf
            .get(pos)
            .ok_or_else(|| FlintError::CorruptRecord("truncated schema direction".into()))?
            != 0;
        pos += 1;
        let unique = *buf
            .get(pos)
            .ok_or_else(|| FlintError::CorruptRecord("truncated schema unique".into()))?
            != 0;
        pos += 1;
        let is_primary = *buf
            .get(pos)
            .ok_or_else(|| FlintError::CorruptRecord("truncated schema is_primary".into()))?
            != 0;
        pos += 1;
        indexes.push(IndexDef {
            name,
            key_columns,
            direction: if descending {
                Direction::Descending
            } else {
                Direction::Ascending
            },
            unique,
            is_primary,
        });
    }

    let page_size = read_u32(buf, &mut pos)? as usize;
    let cache_size = read_u32(buf, &mut pos)? as usize;
    let wal_mode = match *buf
        .get(pos)
        .ok_or_else(|| FlintError::CorruptRecord("truncated schema wal_mode".into()))?
    {
        0 => WalMode::Off,
        1 => WalMode::Log,
        _ => WalMode::Truncate,
    };
    pos += 1;
    let compression = *buf
        .get(pos)
        .ok_or_else(|| FlintError::CorruptRecord("truncated schema compression".into()))?
        != 0;
    pos += 1;
    let intern_strings = *buf
        .get(pos)
        .ok_or_else(|| FlintError::CorruptRecord("truncated schema intern_strings".into()))?
        != 0;
    pos += 1;
    let intern_threshold = read_u32(buf, &mut pos)? as usize;

    Ok(Schema {
        columns,
        indexes,
        options: StorageOptions {
            page_size,
            cache_size,
            wal_mode,
            compression,
            intern_strings,
            intern_threshold,
        },
    })
}
