//! Write-ahead log: framed records with a per-record CRC, redo/undo crash
//! recovery, and optional zlib compression of page images.
//!
//! Record layout: `magic(4) | len(4) | lsn(8) | kind(1) | compressed(1) |
//! payload(len bytes) | crc32c(4)`. `len` and `crc32c` cover the compressed
//! payload only; the CRC is computed over `lsn | kind | compressed | payload`
//! so a torn write at the tail is detected without needing a separate
//! end-of-record marker.

use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use flate2::write::ZlibEncoder;
use flate2::read::ZlibDecoder;
use flate2::Compression;
use std::io::Read as _;

use crate::config::{Lsn, PageId};
use crate::error::{FlintError, Result};

pub const WAL_MAGIC: u32 = 0x464c_4e54; // b"FLNT" as u32
const RECORD_HEADER_LEN: usize = 4 + 4 + 8 + 1 + 1;
const RECORD_CRC_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    FormatHeader,
    Begin,
    PageWrite,
    AllocPage,
    FreePage,
    Commit,
    Rollback,
    Checkpoint,
}

impl RecordKind {
    fn to_u8(self) -> u8 {
        match self {
            RecordKind::FormatHeader => 0,
            RecordKind::Begin => 1,
            RecordKind::PageWrite => 2,
            RecordKind::AllocPage => 3,
            RecordKind::FreePage => 4,
            RecordKind::Commit => 5,
            RecordKind::Rollback => 6,
            RecordKind::Checkpoint => 7,
        }
    }

    fn from_u8(v: u8) -> Result<RecordKind> {
        Ok(match v {
            0 => RecordKind::FormatHeader,
            1 => RecordKind::Begin,
            2 => RecordKind::PageWrite,
            3 => RecordKind::AllocPage,
            4 => RecordKind::FreePage,
            5 => RecordKind::Commit,
            6 => RecordKind::Rollback,
            7 => RecordKind::Checkpoint,
            other => return Err(FlintError::WalCorrupt(format!("unknown record kind {other}"))),
        })
    }
}

/// The WAL's first record: the storage mode byte, the schema fingerprint,
/// and the page size the log was opened with, so a stray WAL from a
/// differently-shaped table is never mistaken for this one's.
pub struct FormatHeader {
    pub wal_mode: u8,
    pub fingerprint: u64,
    pub page_size: u32,
}

pub fn encode_format_header(wal_mode: u8, fingerprint: u64, page_size: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 8 + 4);
    out.push(wal_mode);
    out.extend_from_slice(&fingerprint.to_be_bytes());
    out.extend_from_slice(&page_size.to_be_bytes());
    out
}

pub fn decode_format_header(buf: &[u8]) -> Result<FormatHeader> {
    let err = || FlintError::WalCorrupt("truncated format header".into());
    let wal_mode = *buf.first().ok_or_else(err)?;
    let fingerprint = u64::from_be_bytes(buf.get(1..9).ok_or_else(err)?.try_into().unwrap());
    let page_size = u32::from_be_bytes(buf.get(9..13).ok_or_else(err)?.try_into().unwrap());
    Ok(FormatHeader { wal_mode, fingerprint, page_size })
}

#[derive(Debug, Clone)]
pub struct Record {
    pub lsn: Lsn,
    pub kind: RecordKind,
    pub payload: Vec<u8>,
}

/// A decoded `PageWrite` payload: the page id plus its before/after images.
pub struct PageWrite {
    pub pid: PageId,
    pub before: Vec<u8>,
    pub after: Vec<u8>,
}

pub fn encode_page_write(pid: PageId, before: &[u8], after: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 4 + before.len() + 4 + after.len());
    out.extend_from_slice(&pid.to_be_bytes());
    out.extend_from_slice(&(before.len() as u32).to_be_bytes());
    out.extend_from_slice(before);
    out.extend_from_slice(&(after.len() as u32).to_be_bytes());
    out.extend_from_slice(after);
    out
}

pub fn decode_page_write(buf: &[u8]) -> Result<PageWrite> {
    let err = || FlintError::WalCorrupt("truncated page-write payload".into());
    let pid = PageId::from_be_bytes(buf.get(0..4).ok_or_else(err)?.try_into().unwrap());
    let before_len = u32::from_be_bytes(buf.get(4..8).ok_or_else(err)?.try_into().unwrap()) as usize;
    let before = buf.get(8..8 + before_len).ok_or_else(err)?.to_vec();
    let after_off = 8 + before_len;
    let after_len = u32::from_be_bytes(
        buf.get(after_off..after_off + 4).ok_or_else(err)?.try_into().unwrap(),
    ) as usize;
    let after = buf
        .get(after_off + 4..after_off + 4 + after_len)
        .ok_or_else(err)?
        .to_vec();
    Ok(PageWrite { pid, before, after })
}

/// Append-only log file. `Off` mode callers should simply not construct a
/// `Wal` at all; `Log` keeps the file growing until an explicit checkpoint,
/// `Truncate` resets it to empty on every checkpoint.
pub struct Wal {
    file: File,
    compression: bool,
    next_lsn: AtomicU64,
    durable_lsn: AtomicU64,
    pos: Mutex<u64>,
}

impl Wal {
    /// Creates a brand-new log file and writes its `FormatHeader` as the
    /// first record.
    pub fn create(path: &Path, compression: bool, wal_mode: u8, fingerprint: u64, page_size: u32) -> Result<Wal> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let wal = Wal {
            file,
            compression,
            next_lsn: AtomicU64::new(1),
            durable_lsn: AtomicU64::new(0),
            pos: Mutex::new(0),
        };
        wal.write_format_header(wal_mode, fingerprint, page_size)?;
        Ok(wal)
    }

    /// (Re-)writes the `FormatHeader` record at the current log position —
    /// used at creation and again after every `Truncate`-mode checkpoint so
    /// each log segment is self-describing.
    pub fn write_format_header(&self, wal_mode: u8, fingerprint: u64, page_size: u32) -> Result<()> {
        let payload = encode_format_header(wal_mode, fingerprint, page_size);
        self.append(RecordKind::FormatHeader, &payload)?;
        self.flush()
    }

    pub fn open(path: &Path, compression: bool) -> Result<Wal> {
        let file = OpenOptions::new().read(true).write(true).create(true).open(path)?;
        Ok(Wal {
            file,
            compression,
            next_lsn: AtomicU64::new(1),
            durable_lsn: AtomicU64::new(0),
            pos: Mutex::new(0),
        })
    }

    /// Appends one record and returns its assigned LSN. Does not fsync —
    /// call `flush` once per commit to make the records durable.
    pub fn append(&self, kind: RecordKind, payload: &[u8]) -> Result<Lsn> {
        let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);

        let (compressed_flag, body): (u8, Vec<u8>) = if self.compression && kind == RecordKind::PageWrite {
            let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
            enc.write_all(payload)?;
            (1, enc.finish()?)
        } else {
            (0, payload.to_vec())
        };

        let mut frame = Vec::with_capacity(RECORD_HEADER_LEN + body.len() + RECORD_CRC_LEN);
        frame.extend_from_slice(&WAL_MAGIC.to_be_bytes());
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(&lsn.to_be_bytes());
        frame.push(kind.to_u8());
        frame.push(compressed_flag);
        frame.extend_from_slice(&body);
        let crc = crc32c::crc32c(&frame[8..]); // lsn | kind | compressed | body
        frame.extend_from_slice(&crc.to_be_bytes());

        let mut pos = self.pos.lock().unwrap();
        self.file.write_all_at(&frame, *pos)?;
        *pos += frame.len() as u64;
        Ok(lsn)
    }

    pub fn flush(&self) -> Result<()> {
        self.file.sync_all()?;
        self.durable_lsn.store(self.next_lsn.load(Ordering::SeqCst) - 1, Ordering::SeqCst);
        Ok(())
    }

    pub fn durable_lsn(&self) -> Lsn {
        self.durable_lsn.load(Ordering::SeqCst)
    }

    pub fn is_durable(&self, lsn: Lsn) -> bool {
        lsn <= self.durable_lsn()
    }

    /// Resets the log to empty (used after a checkpoint in `Truncate`
    /// mode, once every dirty page has been written back to the page file).
    pub fn truncate(&self) -> Result<()> {
        let mut pos = self.pos.lock().unwrap();
        self.file.set_len(0)?;
        *pos = 0;
        Ok(())
    }

    /// Forward scan of the whole log, stopping at the first corrupt or
    /// torn record (a crash mid-write looks like one). Returns records in
    /// log order.
    pub fn scan(&self) -> Result<Vec<Record>> {
        let len = self.file.metadata()?.len();
        let mut records = Vec::new();
        let mut pos: u64 = 0;
        let mut header = [0u8; RECORD_HEADER_LEN];
        while pos + RECORD_HEADER_LEN as u64 <= len {
            if self.file.read_exact_at(&mut header, pos).is_err() {
                break;
            }
            let magic = u32::from_be_bytes(header[0..4].try_into().unwrap());
            if magic != WAL_MAGIC {
                break;
            }
            let body_len = u32::from_be_bytes(header[4..8].try_into().unwrap()) as u64;
            let lsn = u64::from_be_bytes(header[8..16].try_into().unwrap());
            let kind = match RecordKind::from_u8(header[16]) {
                Ok(k) => k,
                Err(_) => break,
            };
            let compressed = header[17] != 0;

            let total = RECORD_HEADER_LEN as u64 + body_len + RECORD_CRC_LEN as u64;
            if pos + total > len {
                break; // torn tail write
            }
            let mut body = vec![0u8; body_len as usize];
            if body_len > 0 && self.file.read_exact_at(&mut body, pos + RECORD_HEADER_LEN as u64).is_err() {
                break;
            }
            let mut crc_buf = [0u8; RECORD_CRC_LEN];
            self.file
                .read_exact_at(&mut crc_buf, pos + RECORD_HEADER_LEN as u64 + body_len)?;
            let stored_crc = u32::from_be_bytes(crc_buf);

            let mut crc_input = Vec::with_capacity(10 + body.len());
            crc_input.extend_from_slice(&header[8..18]);
            crc_input.extend_from_slice(&body);
            if crc32c::crc32c(&crc_input) != stored_crc {
                break; // corrupt or torn record; stop here
            }

            let payload = if compressed {
                let mut dec = ZlibDecoder::new(&body[..]);
                let mut out = Vec::new();
                if dec.read_to_end(&mut out).is_err() {
                    break;
                }
                out
            } else {
                body
            };

            records.push(Record { lsn, kind, payload });
            pos += total;
        }
        Ok(records)
    }
}
