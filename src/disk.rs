//! Raw page file I/O. `PageStore` owns the file handle, the free page
//! allocator, and the meta/freelist page layout; it knows nothing about
//! caching or the WAL — that's `buffer_pool` and `wal` layered on top.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use fs2::FileExt as _;

use crate::config::{PageId, META_PID};
use crate::error::Result;
use crate::freelist::FreeList;
use crate::meta::Meta;
use crate::page::Page;
use crate::schema::Schema;

/// Fixed page id holding the serialized `FreeList`, right after the meta
/// page. Both are allocated once at table creation and never relocated.
pub const FREELIST_PID: PageId = 1;

pub struct PageStore {
    file: File,
    page_size: usize,
    freelist: FreeList,
    pending_allocs: Vec<PageId>,
    pending_frees: Vec<PageId>,
}

impl PageStore {
    /// Creates a brand-new page file: locks it exclusively, then writes
    /// the meta page and an empty freelist page.
    pub fn create(path: &Path, schema: &Schema) -> Result<(PageStore, Meta)> {
        let file = OpenOptions::new()
            .write(true)
            .read(true)
            .create_new(true)
            .open(path)?;
        file.try_lock_exclusive()?;

        let page_size = schema.options.page_size;
        let meta = Meta::new(schema);
        let freelist = FreeList::new();

        let mut store = PageStore {
            file,
            page_size,
            freelist,
            pending_allocs: Vec::new(),
            pending_frees: Vec::new(),
        };

        let mut meta_page = Page::new(page_size);
        meta.write_to(&mut meta_page)?;
        store.write_page(META_PID, &meta_page)?;

        let freelist_page = store.freelist.serialize(page_size);
        store.write_page(FREELIST_PID, &freelist_page)?;
        store.freelist = FreeList::deserialize(&freelist_page);
        store.sync()?;

        Ok((store, meta))
    }

    /// Opens an existing page file, reading the meta page to recover
    /// `page_size` (so the caller can validate it against the schema) and
    /// the persisted freelist.
    pub fn open(path: &Path) -> Result<(PageStore, Meta, Page)> {
        let file = OpenOptions::new().write(true).read(true).open(path)?;
        file.try_lock_exclusive()?;

        // The meta page's own page_size isn't self-describing on disk (it
        // lives in the schema, which lives inside the page we're about to
        // read), so probe with the default and re-read if the schema says
        // otherwise.
        let mut page_size = crate::config::DEFAULT_PAGE_SIZE;
        let probe = read_raw_page(&file, page_size, META_PID)?;
        let probe_meta = Meta::read_from(&probe)?;
        let schema = crate::meta::decode_schema(&probe_meta.schema_bytes)?;
        if schema.options.page_size != page_size {
            page_size = schema.options.page_size;
        }

        let meta_page = read_raw_page(&file, page_size, META_PID)?;
        let meta = Meta::read_from(&meta_page)?;
        let freelist_page = read_raw_page(&file, page_size, FREELIST_PID)?;
        let freelist = FreeList::deserialize(&freelist_page);

        let store = PageStore {
            file,
            page_size,
            freelist,
            pending_allocs: Vec::new(),
            pending_frees: Vec::new(),
        };
        Ok((store, meta, meta_page))
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn read_page(&self, pid: PageId) -> Result<Page> {
        read_raw_page(&self.file, self.page_size, pid)
    }

    pub fn write_page(&self, pid: PageId, page: &Page) -> Result<()> {
        self.file
            .write_all_at(&page.data, pid as u64 * self.page_size as u64)?;
        Ok(())
    }

    /// Allocates a page id, preferring a previously freed one. Recorded in
    /// `pending_allocs` so the caller can log a `RecordKind::AllocPage` WAL
    /// record for it at the next commit.
    pub fn alloc_page(&mut self) -> PageId {
        let pid = self.freelist.get_next_pid();
        self.pending_allocs.push(pid);
        pid
    }

    /// Frees a page id, recorded in `pending_frees` for the next commit's
    /// `RecordKind::FreePage` WAL record.
    pub fn free_page(&mut self, pid: PageId) {
        self.freelist.release_pid(pid);
        self.pending_frees.push(pid);
    }

    /// Drains the page ids allocated/freed since the last call, for the
    /// caller to log as WAL records before writing them back.
    pub fn take_pending_alloc_free(&mut self) -> (Vec<PageId>, Vec<PageId>) {
        (std::mem::take(&mut self.pending_allocs), std::mem::take(&mut self.pending_frees))
    }

    /// Discards pending alloc/free tracking without logging — used on
    /// transaction rollback.
    pub fn clear_pending_alloc_free(&mut self) {
        self.pending_allocs.clear();
        self.pending_frees.clear();
    }

    pub fn read_meta(&self) -> Result<Meta> {
        Meta::read_from(&self.read_page(META_PID)?)
    }

    pub fn write_meta(&self, meta: &Meta) -> Result<()> {
        let mut page = Page::new(self.page_size);
        meta.write_to(&mut page)?;
        self.write_page(META_PID, &page)
    }

    pub fn write_freelist(&self) -> Result<()> {
        let page = self.freelist.serialize(self.page_size);
        self.write_page(FREELIST_PID, &page)
    }

    pub fn file_size_pages(&self) -> PageId {
        self.freelist.max_pid() + 1
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

fn read_raw_page(file: &File, page_size: usize, pid: PageId) -> Result<Page> {
    let mut page = Page::new(page_size);
    file.read_exact_at(&mut page.data, pid as u64 * page_size as u64)?;
    Ok(page)
}
