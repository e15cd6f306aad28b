//! Typed value codec: encode/decode row fields to/from compact byte
//! sequences, plus an order-preserving encoding used for composite B+Tree
//! keys.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};

use crate::error::{FlintError, Result};

/// Unit used to interpret a `DateTime` column's 64-bit epoch value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Seconds,
    Millis,
}

/// Declared type of a schema column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Decimal { precision: u8, scale: u8 },
    Str { max_len: u32 },
    Bytes { len: u32 },
    DateTime { unit: TimeUnit },
}

impl ColumnType {
    fn tag(self) -> u8 {
        match self {
            ColumnType::I8 => 1,
            ColumnType::I16 => 2,
            ColumnType::I32 => 3,
            ColumnType::I64 => 4,
            ColumnType::U8 => 5,
            ColumnType::U16 => 6,
            ColumnType::U32 => 7,
            ColumnType::U64 => 8,
            ColumnType::F32 => 9,
            ColumnType::F64 => 10,
            ColumnType::Decimal { .. } => 11,
            ColumnType::Str { .. } => 12,
            ColumnType::Bytes { .. } => 13,
            ColumnType::DateTime { .. } => 14,
        }
    }
}

/// A decoded, typed value. `Null` is distinct from `Str`/`Bytes` of length
/// zero.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    /// Scaled 128-bit integer; `scale` is the number of fractional digits.
    Decimal(i128, u8),
    Str(Arc<str>),
    Bytes(Arc<[u8]>),
    /// Signed epoch, unit is carried by the owning column's `ColumnType`.
    DateTime(i64),
}

const NULL_SENTINEL: u8 = 0;
const NON_NULL: u8 = 1;

fn write_varint(buf: &mut Vec<u8>, mut v: u64) {
    loop {
        let mut byte = (v & 0x7f) as u8;
        v >>= 7;
        if v != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if v == 0 {
            break;
        }
    }
}

fn read_varint(buf: &[u8], pos: &mut usize) -> Result<u64> {
    let mut shift = 0u32;
    let mut result = 0u64;
    loop {
        let byte = *buf
            .get(*pos)
            .ok_or_else(|| FlintError::CorruptRecord("truncated varint".into()))?;
        *pos += 1;
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift >= 64 {
            return Err(FlintError::CorruptRecord("varint too long".into()));
        }
    }
}

impl Value {
    /// Encode for storage inside a row record. Deterministic: the same
    /// value always produces the same bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Value::Null => {
                out.push(NULL_SENTINEL);
                return out;
            }
            _ => out.push(NON_NULL),
        }
        let tag = self.column_type_tag();
        out.push(tag);
        match self {
            Value::Null => unreachable!(),
            Value::I8(v) => out.push(*v as u8),
            Value::I16(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::I32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::I64(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::U8(v) => out.push(*v),
            Value::U16(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::U32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::U64(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::F32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::F64(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::Decimal(v, scale) => {
                out.push(*scale);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Value::Str(s) => {
                let bytes = s.as_bytes();
                write_varint(&mut out, bytes.len() as u64);
                out.extend_from_slice(bytes);
            }
            Value::Bytes(b) => {
                write_varint(&mut out, b.len() as u64);
                out.extend_from_slice(b);
            }
            Value::DateTime(v) => out.extend_from_slice(&v.to_le_bytes()),
        }
        out
    }

    fn column_type_tag(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::I8(_) => ColumnType::I8.tag(),
            Value::I16(_) => ColumnType::I16.tag(),
            Value::I32(_) => ColumnType::I32.tag(),
            Value::I64(_) => ColumnType::I64.tag(),
            Value::U8(_) => ColumnType::U8.tag(),
            Value::U16(_) => ColumnType::U16.tag(),
            Value::U32(_) => ColumnType::U32.tag(),
            Value::U64(_) => ColumnType::U64.tag(),
            Value::F32(_) => ColumnType::F32.tag(),
            Value::F64(_) => ColumnType::F64.tag(),
            Value::Decimal(_, _) => ColumnType::Decimal { precision: 0, scale: 0 }.tag(),
            Value::Str(_) => ColumnType::Str { max_len: 0 }.tag(),
            Value::Bytes(_) => ColumnType::Bytes { len: 0 }.tag(),
            Value::DateTime(_) => ColumnType::DateTime { unit: TimeUnit::Seconds }.tag(),
        }
    }

    /// Decode a single value starting at `buf[*pos]`, advancing `pos` past
    /// it. Fails with `CorruptRecord` if a length field exceeds the buffer.
    pub fn decode(buf: &[u8], pos: &mut usize) -> Result<Value> {
        let marker = *buf
            .get(*pos)
            .ok_or_else(|| FlintError::CorruptRecord("truncated value".into()))?;
        *pos += 1;
        if marker == NULL_SENTINEL {
            return Ok(Value::Null);
        }
        let tag = *buf
            .get(*pos)
            .ok_or_else(|| FlintError::CorruptRecord("truncated value tag".into()))?;
        *pos += 1;
        let take = |pos: &mut usize, n: usize| -> Result<&[u8]> {
            let slice = buf
                .get(*pos..*pos + n)
                .ok_or_else(|| FlintError::CorruptRecord("value payload out of bounds".into()))?;
            *pos += n;
            Ok(slice)
        };
        let value = match tag {
            1 => Value::I8(take(pos, 1)?[0] as i8),
            2 => Value::I16(i16::from_le_bytes(take(pos, 2)?.try_into().unwrap())),
            3 => Value::I32(i32::from_le_bytes(take(pos, 4)?.try_into().unwrap())),
            4 => Value::I64(i64::from_le_bytes(take(pos, 8)?.try_into().unwrap())),
            5 => Value::U8(take(pos, 1)?[0]),
            6 => Value::U16(u16::from_le_bytes(take(pos, 2)?.try_into().unwrap())),
            7 => Value::U32(u32::from_le_bytes(take(pos, 4)?.try_into().unwrap())),
            8 => Value::U64(u64::from_le_bytes(take(pos, 8)?.try_into().unwrap())),
            9 => Value::F32(f32::from_le_bytes(take(pos, 4)?.try_into().unwrap())),
            10 => Value::F64(f64::from_le_bytes(take(pos, 8)?.try_into().unwrap())),
            11 => {
                let scale = take(pos, 1)?[0];
                let v = i128::from_le_bytes(take(pos, 16)?.try_into().unwrap());
                Value::Decimal(v, scale)
            }
            12 => {
                let len = read_varint(buf, pos)? as usize;
                let bytes = take(pos, len)?;
                let s = std::str::from_utf8(bytes)
                    .map_err(|_| FlintError::CorruptRecord("invalid utf8 string".into()))?;
                Value::Str(Arc::from(s))
            }
            13 => {
                let len = read_varint(buf, pos)? as usize;
                Value::Bytes(Arc::from(take(pos, len)?))
            }
            14 => Value::DateTime(i64::from_le_bytes(take(pos, 8)?.try_into().unwrap())),
            other => {
                return Err(FlintError::CorruptRecord(format!(
                    "unknown value type tag {other}"
                )))
            }
        };
        Ok(value)
    }

    /// Order-preserving encoding of a single field used to build composite
    /// B+Tree keys. Byte-lexicographic comparison of the concatenation of
    /// these encodings matches the natural ordering of the decoded tuple,
    /// for ascending indexes. A one-byte null/non-null presence marker
    /// precedes every field so nulls sort first.
    pub fn encode_key_component(&self) -> Vec<u8> {
        let mut out = Vec::new();
        if matches!(self, Value::Null) {
            out.push(NULL_SENTINEL);
            return out;
        }
        out.push(NON_NULL);
        match self {
            Value::Null => unreachable!(),
            Value::I8(v) => out.extend_from_slice(&[(*v as u8) ^ 0x80]),
            Value::I16(v) => out.extend_from_slice(&flip_sign(v.to_be_bytes())),
            Value::I32(v) => out.extend_from_slice(&flip_sign(v.to_be_bytes())),
            Value::I64(v) => out.extend_from_slice(&flip_sign(v.to_be_bytes())),
            Value::U8(v) => out.push(*v),
            Value::U16(v) => out.extend_from_slice(&v.to_be_bytes()),
            Value::U32(v) => out.extend_from_slice(&v.to_be_bytes()),
            Value::U64(v) => out.extend_from_slice(&v.to_be_bytes()),
            Value::F32(v) => out.extend_from_slice(&order_preserving_f32(*v)),
            Value::F64(v) => out.extend_from_slice(&order_preserving_f64(*v)),
            Value::Decimal(v, _) => out.extend_from_slice(&flip_sign(v.to_be_bytes())),
            Value::DateTime(v) => out.extend_from_slice(&flip_sign(v.to_be_bytes())),
            Value::Str(s) => escape_bytes(s.as_bytes(), &mut out),
            Value::Bytes(b) => escape_bytes(b, &mut out),
        }
        out
    }
}

// Flips the sign bit of a big-endian two's-complement integer so that
// unsigned byte comparison matches signed numeric comparison.
fn flip_sign<const N: usize>(mut be_bytes: [u8; N]) -> [u8; N] {
    be_bytes[0] ^= 0x80;
    be_bytes
}

// IEEE-754 total-order transform: for positive numbers flip the sign bit,
// for negative numbers flip every bit. Produces bytes that sort the same
// as the underlying float value.
fn order_preserving_f32(v: f32) -> [u8; 4] {
    let bits = v.to_bits();
    let transformed = if bits & 0x8000_0000 != 0 {
        !bits
    } else {
        bits | 0x8000_0000
    };
    transformed.to_be_bytes()
}

fn order_preserving_f64(v: f64) -> [u8; 8] {
    let bits = v.to_bits();
    let transformed = if bits & 0x8000_0000_0000_0000 != 0 {
        !bits
    } else {
        bits | 0x8000_0000_0000_0000
    };
    transformed.to_be_bytes()
}

// Memcomparable encoding: escape every 0x00 byte as 0x00 0xFF and terminate
// with 0x00 0x00, so a proper byte-prefix always compares less than its
// extension regardless of where the field sits inside a composite key.
fn escape_bytes(data: &[u8], out: &mut Vec<u8>) {
    for &b in data {
        if b == 0x00 {
            out.push(0x00);
            out.push(0xff);
        } else {
            out.push(b);
        }
    }
    out.push(0x00);
    out.push(0x00);
}

/// Concatenate the order-preserving encoding of each field in a composite
/// key, in column order.
pub fn compose_key(values: &[Value]) -> Vec<u8> {
    let mut out = Vec::new();
    for v in values {
        out.extend_from_slice(&v.encode_key_component());
    }
    out
}

/// Optional per-table interning pool for short strings. Purely an
/// in-memory allocator optimization: it never changes on-disk bytes,
/// since `Value::encode`/`decode` only ever see the string's bytes.
pub struct StringPool {
    threshold: usize,
    pool: Mutex<HashSet<Arc<str>>>,
}

impl StringPool {
    pub fn new(threshold: usize) -> Self {
        StringPool {
            threshold,
            pool: Mutex::new(HashSet::new()),
        }
    }

    /// Returns an interned `Arc<str>` for short strings, or a fresh
    /// allocation for strings at or above the threshold.
    pub fn intern(&self, s: &str) -> Arc<str> {
        if s.len() >= self.threshold {
            return Arc::from(s);
        }
        let mut pool = self.pool.lock().unwrap();
        if let Some(existing) = pool.get(s) {
            return existing.clone();
        }
        let arc: Arc<str> = Arc::from(s);
        pool.insert(arc.clone());
        arc
    }
}

static DISABLED_POOL: OnceLock<StringPool> = OnceLock::new();

/// A pool that never interns (threshold 0); used when small-string pooling
/// is disabled in `StorageOptions`.
pub fn disabled_pool() -> &'static StringPool {
    DISABLED_POOL.get_or_init(|| StringPool::new(0))
}
