//! Free page allocator, persisted as a dedicated page chain starting at
//! `Meta::free_list_head`. New page ids are first drawn from released
//! pages to avoid growing the file; only when that pool is empty does the
//! high-water mark advance.

use crate::config::{PageId, MAX_NON_DATA_PID, PID_SIZE, USIZE_SIZE};
use crate::page::{Page, PageKind};

pub struct FreeList {
    max_pid: PageId,
    released_pids: Vec<PageId>,
}

impl FreeList {
    pub fn new() -> Self {
        FreeList {
            max_pid: MAX_NON_DATA_PID,
            released_pids: Vec::new(),
        }
    }

    /// Returns the next page id for writing, preferring a released page.
    pub fn get_next_pid(&mut self) -> PageId {
        if let Some(pid) = self.released_pids.pop() {
            log::trace!("freelist: reusing released page {pid}");
            pid
        } else {
            self.max_pid += 1;
            log::trace!("freelist: growing file, new page {}", self.max_pid);
            self.max_pid
        }
    }

    pub fn release_pid(&mut self, pid: PageId) {
        log::trace!("freelist: releasing page {pid}");
        self.released_pids.push(pid);
    }

    pub fn max_pid(&self) -> PageId {
        self.max_pid
    }

    pub fn serialize(&self, page_size: usize) -> Page {
        let mut page = Page::new(page_size);
        page.set_kind(PageKind::Freelist);
        let mut pos: usize = crate::config::PAGE_HEADER_SIZE;

        page.data[pos..pos + PID_SIZE].copy_from_slice(&self.max_pid.to_be_bytes());
        pos += PID_SIZE;

        page.data[pos..pos + USIZE_SIZE]
            .copy_from_slice(&self.released_pids.len().to_be_bytes());
        pos += USIZE_SIZE;

        for pid in self.released_pids.iter() {
            page.data[pos..pos + PID_SIZE].copy_from_slice(&pid.to_be_bytes());
            pos += PID_SIZE;
        }

        page
    }

    pub fn deserialize(page: &Page) -> Self {
        let mut pos: usize = crate::config::PAGE_HEADER_SIZE;

        let max_pid = PageId::from_be_bytes(page.data[pos..pos + PID_SIZE].try_into().unwrap());
        pos += PID_SIZE;

        let released_pids_len =
            usize::from_be_bytes(page.data[pos..pos + USIZE_SIZE].try_into().unwrap());
        pos += USIZE_SIZE;

        let mut released_pids = Vec::with_capacity(released_pids_len);
        for _ in 0..released_pids_len {
            released_pids.push(PageId::from_be_bytes(
                page.data[pos..pos + PID_SIZE].try_into().unwrap(),
            ));
            pos += PID_SIZE;
        }

        FreeList {
            max_pid,
            released_pids,
        }
    }
}

impl Default for FreeList {
    fn default() -> Self {
        Self::new()
    }
}
