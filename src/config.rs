// Core addressing types and on-disk constants shared across modules.

pub type PageId = u32;
pub type BufferId = u32;
// Offset within a page; usize avoids casts when used as an index.
pub type ItemPointer = usize;
pub type Rowid = u64;
pub type Lsn = u64;

// Page id 0 is reserved for the table header / metadata page.
pub const META_PID: PageId = 0;
pub const MAX_NON_DATA_PID: PageId = 0;

pub const DEFAULT_PAGE_SIZE: usize = 4096;
// Node kind (1) + item count (2) + next sibling (4) + prev sibling (4).
pub const PAGE_HEADER_SIZE: usize = 11;

pub const PID_SIZE: usize = 4;
pub const USIZE_SIZE: usize = 8;

pub const MAX_KEY_LEN: usize = u8::MAX as usize;

pub const N_BUSY_EVENTS: usize = 8;

/// Default merge/redistribute threshold for B+Tree pages, expressed as a
/// fraction of page capacity (default ⅓).
pub const DEFAULT_MERGE_THRESHOLD_NUM: usize = 1;
pub const DEFAULT_MERGE_THRESHOLD_DEN: usize = 3;

pub const ROWID_SIZE: usize = 8;
