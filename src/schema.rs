//! Column and index definitions, the immutable-after-creation table schema,
//! schema fingerprinting, and the user-facing `Row` type.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::error::{FlintError, Result};
use crate::variant::{ColumnType, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// A single named, typed column.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
    pub not_null: bool,
    pub default: Value,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Column {
            name: name.into(),
            ty,
            not_null: false,
            default: Value::Null,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn default_value(mut self, v: Value) -> Self {
        self.default = v;
        self
    }
}

/// A named B+Tree index over an ordered list of columns.
#[derive(Debug, Clone)]
pub struct IndexDef {
    pub name: String,
    /// Ordered indices into `Schema::columns` making up the composite key.
    pub key_columns: Vec<usize>,
    pub direction: Direction,
    pub unique: bool,
    pub is_primary: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalMode {
    Off,
    Log,
    Truncate,
}

#[derive(Debug, Clone)]
pub struct StorageOptions {
    pub page_size: usize,
    pub cache_size: usize,
    pub wal_mode: WalMode,
    pub compression: bool,
    pub intern_strings: bool,
    pub intern_threshold: usize,
}

impl Default for StorageOptions {
    fn default() -> Self {
        StorageOptions {
            page_size: crate::config::DEFAULT_PAGE_SIZE,
            cache_size: 4096,
            wal_mode: WalMode::Truncate,
            compression: false,
            intern_strings: true,
            intern_threshold: 32,
        }
    }
}

/// Immutable-after-first-write table definition: columns, indexes, and
/// storage options.
#[derive(Debug, Clone)]
pub struct Schema {
    pub columns: Vec<Column>,
    pub indexes: Vec<IndexDef>,
    pub options: StorageOptions,
}

impl Schema {
    pub fn primary_index(&self) -> &IndexDef {
        self.indexes
            .iter()
            .find(|i| i.is_primary)
            .expect("schema must define exactly one primary index")
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn index_named(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// Hash of the ordered (name, type, width, nullability) column tuples
    /// concatenated with the ordered (name, key columns, direction) index
    /// tuples. Mismatch at open means `SchemaMismatch`.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for c in &self.columns {
            c.name.hash(&mut hasher);
            format!("{:?}", c.ty).hash(&mut hasher);
            c.not_null.hash(&mut hasher);
        }
        for idx in &self.indexes {
            idx.name.hash(&mut hasher);
            idx.key_columns.hash(&mut hasher);
            (idx.direction == Direction::Descending).hash(&mut hasher);
            idx.unique.hash(&mut hasher);
        }
        hasher.finish()
    }

    pub fn describe(&self) -> String {
        let mut out = String::new();
        out.push_str("columns:\n");
        for c in &self.columns {
            out.push_str(&format!(
                "  {} {:?}{}\n",
                c.name,
                c.ty,
                if c.not_null { " NOT NULL" } else { "" }
            ));
        }
        out.push_str("indexes:\n");
        for idx in &self.indexes {
            let cols: Vec<&str> = idx
                .key_columns
                .iter()
                .map(|&i| self.columns[i].name.as_str())
                .collect();
            out.push_str(&format!(
                "  {} ({}){}{}\n",
                idx.name,
                cols.join(", "),
                if idx.unique { " UNIQUE" } else { "" },
                if idx.is_primary { " PRIMARY" } else { "" }
            ));
        }
        out
    }
}

/// A schema-bound tuple of typed values. Field order matches
/// `Schema::columns`.
#[derive(Debug, Clone)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Row { values }
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    pub fn get_named<'a>(&'a self, schema: &Schema, name: &str) -> Option<&'a Value> {
        schema.column_index(name).and_then(|i| self.values.get(i))
    }

    pub fn set(&mut self, idx: usize, v: Value) {
        self.values[idx] = v;
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Integer getter with narrow-to-wide promotion.
    pub fn get_i64(&self, idx: usize) -> Option<i64> {
        match self.values.get(idx)? {
            Value::I8(v) => Some(*v as i64),
            Value::I16(v) => Some(*v as i64),
            Value::I32(v) => Some(*v as i64),
            Value::I64(v) => Some(*v),
            Value::U8(v) => Some(*v as i64),
            Value::U16(v) => Some(*v as i64),
            Value::U32(v) => Some(*v as i64),
            Value::U64(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn get_str(&self, idx: usize) -> Option<&str> {
        match self.values.get(idx)? {
            Value::Str(s) => Some(s.as_ref()),
            _ => None,
        }
    }

    /// NOT-NULL / type-width / string-budget validation.
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        if self.values.len() != schema.columns.len() {
            return Err(FlintError::SchemaViolation(format!(
                "row has {} fields, schema declares {}",
                self.values.len(),
                schema.columns.len()
            )));
        }
        for (col, val) in schema.columns.iter().zip(self.values.iter()) {
            if matches!(val, Value::Null) {
                if col.not_null {
                    return Err(FlintError::SchemaViolation(format!(
                        "column {:?} is NOT NULL",
                        col.name
                    )));
                }
                continue;
            }
            match (&col.ty, val) {
                (ColumnType::I8, Value::I8(_))
                | (ColumnType::I16, Value::I16(_))
                | (ColumnType::I32, Value::I32(_))
                | (ColumnType::I64, Value::I64(_))
                | (ColumnType::U8, Value::U8(_))
                | (ColumnType::U16, Value::U16(_))
                | (ColumnType::U32, Value::U32(_))
                | (ColumnType::U64, Value::U64(_))
                | (ColumnType::F32, Value::F32(_))
                | (ColumnType::F64, Value::F64(_))
                | (ColumnType::Decimal { .. }, Value::Decimal(_, _))
                | (ColumnType::DateTime { .. }, Value::DateTime(_)) => {}
                (ColumnType::Str { max_len }, Value::Str(s)) => {
                    if s.len() as u32 > *max_len {
                        return Err(FlintError::SchemaViolation(format!(
                            "column {:?} exceeds byte budget {}",
                            col.name, max_len
                        )));
                    }
                }
                (ColumnType::Bytes { len }, Value::Bytes(b)) => {
                    if b.len() as u32 != *len {
                        return Err(FlintError::SchemaViolation(format!(
                            "column {:?} expects {} fixed bytes",
                            col.name, len
                        )));
                    }
                }
                _ => {
                    return Err(FlintError::SchemaViolation(format!(
                        "column {:?} type mismatch",
                        col.name
                    )))
                }
            }
        }
        Ok(())
    }

    /// Fills `Value::Null` fields with their column defaults, applied
    /// before validation so NOT-NULL defaults are honored.
    pub fn apply_defaults(&mut self, schema: &Schema) {
        for (col, val) in schema.columns.iter().zip(self.values.iter_mut()) {
            if matches!(val, Value::Null) && !matches!(col.default, Value::Null) {
                *val = col.default.clone();
            }
        }
    }
}

/// Extracts the composite key values for `index` from `row`.
pub fn key_values_for(_schema: &Schema, index: &IndexDef, row: &Row) -> Vec<Value> {
    index
        .key_columns
        .iter()
        .map(|&i| row.get(i).cloned().unwrap_or(Value::Null))
        .collect()
}
