//! Bounded buffer pool: a fixed-size frame table with pin counts, an
//! intrusive LRU list, a dirty list ordered by WAL-flush urgency, and a
//! `PageGuard` RAII handle for pinned access.
//!
//! `Directory::index` is a `std::collections::HashMap<PageId, BufferId>`
//! rather than a fixed-size open-chained hash table (`Vec<BufferId>` +
//! intrusive collision chain sized once at `cache_size` and never
//! rehashed). A fixed bucket count degenerates into long collision-chain
//! walks under heavy churn with a pool much larger than the working set,
//! and an intrusive collision link can be corrupted by a concurrent
//! `remove` racing an `insert` into the same bucket. `HashMap` removes the
//! fixed bucket count and the manual chain-splicing entirely.
//!
//! `mark_dirty` adds an extra pin the first time a frame goes dirty, which
//! `claim`'s `pin()` removal keeps it out of the LRU list for as long as
//! that pin holds — a dirty frame is therefore never a candidate for
//! eviction. `clear_dirty` drops that pin once the frame's contents have
//! been written back, returning it to the LRU list.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::{BufferId, Lsn, PageId, N_BUSY_EVENTS};
use crate::disk::PageStore;
use crate::error::{FlintError, Result};
use crate::page::Page;

pub const PAGE_RAW: u16 = 1;
pub const PAGE_BUSY: u16 = 2;
pub const PAGE_DIRTY: u16 = 4;
pub const PAGE_WAIT: u16 = 8;
pub const PAGE_SYNCED: u16 = 16;

#[derive(Clone, Copy, Default)]
struct Frame {
    pid: PageId,
    next: BufferId,
    prev: BufferId,
    access_count: u16,
    state: u16,
    /// WAL LSN that must be fsync'd before this frame's contents may be
    /// written back to the page file.
    wal_lsn: Lsn,
}

struct Directory {
    head: BufferId,
    tail: BufferId,
    free_frames: BufferId,
    dirty_frames: BufferId,
    dirtied: BufferId,
    next_sync: BufferId,
    used: BufferId,
    index: HashMap<PageId, BufferId>,
    frames: Vec<Frame>,
}

impl Directory {
    fn new(cache_size: usize) -> Directory {
        Directory {
            head: 0,
            tail: 0,
            free_frames: 0,
            dirty_frames: 0,
            dirtied: 0,
            next_sync: 0,
            used: 1, // frame 0 is a permanent null sentinel, never assigned a page
            index: HashMap::with_capacity(cache_size),
            frames: vec![Frame::default(); cache_size],
        }
    }

    fn unpin(&mut self, id: BufferId) {
        debug_assert_eq!(self.frames[id as usize].access_count, 1);
        self.frames[id as usize].access_count = 0;
        self.frames[id as usize].next = self.head;
        self.frames[id as usize].prev = 0;
        if self.head != 0 {
            self.frames[self.head as usize].prev = id;
        } else {
            self.tail = id;
        }
        self.head = id;
    }

    fn pin(&mut self, id: BufferId) {
        debug_assert_eq!(self.frames[id as usize].access_count, 0);
        let next = self.frames[id as usize].next;
        let prev = self.frames[id as usize].prev;
        if prev == 0 {
            self.head = next;
        } else {
            self.frames[prev as usize].next = next;
        }
        if next == 0 {
            self.tail = prev;
        } else {
            self.frames[next as usize].prev = prev;
        }
    }

    /// Drops a frame from the cache entirely (used by transaction rollback
    /// to discard pages loaded/modified by an aborted transaction, and by
    /// B+Tree merge to discard a page just freed into the free list).
    /// Unlinks it from whichever list — dirty or LRU — it currently sits in
    /// before splicing it onto `free_frames`, since both lists reuse the
    /// same `next`/`prev` fields.
    fn throw_frame(&mut self, id: BufferId) {
        if (self.frames[id as usize].state & PAGE_DIRTY) != 0 {
            let next = self.frames[id as usize].next;
            let prev = self.frames[id as usize].prev;
            if prev == 0 {
                self.dirty_frames = next;
            } else {
                self.frames[prev as usize].next = next;
            }
            if next != 0 {
                self.frames[next as usize].prev = prev;
            }
            if self.next_sync == id {
                self.next_sync = prev;
            }
            self.dirtied = self.dirtied.saturating_sub(1);
        } else if self.frames[id as usize].access_count == 0 {
            let next = self.frames[id as usize].next;
            let prev = self.frames[id as usize].prev;
            if prev == 0 {
                self.head = next;
            } else {
                self.frames[prev as usize].next = next;
            }
            if next == 0 {
                self.tail = prev;
            } else {
                self.frames[next as usize].prev = prev;
            }
        }
        self.index.remove(&self.frames[id as usize].pid);
        self.frames[id as usize].state = 0;
        self.frames[id as usize].next = self.free_frames;
        self.free_frames = id;
    }

    fn mark_dirty(
        &mut self,
        id: BufferId,
        wal_flush_threshold: BufferId,
        lsn: Lsn,
    ) -> Option<(BufferId, PageId)> {
        debug_assert!(self.frames[id as usize].access_count > 0);
        let mut next_sync: Option<(BufferId, PageId)> = None;
        if (self.frames[id as usize].state & PAGE_DIRTY) == 0 {
            self.frames[id as usize].access_count += 1; // pin dirty page until flushed
            self.frames[id as usize].state = PAGE_DIRTY;
            self.frames[id as usize].wal_lsn = lsn;
            self.dirtied += 1;
            if self.dirtied > wal_flush_threshold {
                let mut sync = self.next_sync;
                while sync != 0 {
                    if self.frames[sync as usize].access_count == 1 {
                        self.frames[sync as usize].state |= PAGE_SYNCED;
                        self.next_sync = self.frames[sync as usize].prev;
                        let pid = self.frames[sync as usize].pid;
                        next_sync = Some((sync, pid));
                        break;
                    }
                    sync = self.frames[sync as usize].prev;
                }
            }
        } else {
            self.frames[id as usize].state &= !PAGE_SYNCED;
            self.frames[id as usize].wal_lsn = lsn.max(self.frames[id as usize].wal_lsn);
            let prev = self.frames[id as usize].prev;
            if prev == 0 {
                return None; // already head of dirty list
            }
            if self.next_sync == id {
                self.next_sync = prev;
            }
            let next = self.frames[id as usize].next;
            self.frames[prev as usize].next = next;
            if next != 0 {
                self.frames[next as usize].prev = prev;
            }
        }
        if self.dirty_frames != 0 {
            self.frames[self.dirty_frames as usize].prev = id;
        }
        if self.next_sync == 0 {
            self.next_sync = id;
        }
        self.frames[id as usize].next = self.dirty_frames;
        self.frames[id as usize].prev = 0;
        self.dirty_frames = id;
        next_sync
    }

    /// Unlinks `id` from the dirty list and drops the extra pin `mark_dirty`
    /// added to keep it out of the eviction LRU while dirty. Called once the
    /// frame's contents have been written back to the page file, making it
    /// evictable again.
    fn clear_dirty(&mut self, id: BufferId) {
        if (self.frames[id as usize].state & PAGE_DIRTY) == 0 {
            return;
        }
        let next = self.frames[id as usize].next;
        let prev = self.frames[id as usize].prev;
        if prev == 0 {
            self.dirty_frames = next;
        } else {
            self.frames[prev as usize].next = next;
        }
        if next != 0 {
            self.frames[next as usize].prev = prev;
        }
        if self.next_sync == id {
            self.next_sync = prev;
        }
        self.frames[id as usize].state &= !(PAGE_DIRTY | PAGE_SYNCED);
        self.dirtied = self.dirtied.saturating_sub(1);
        self.release(id);
    }

    fn release(&mut self, id: BufferId) {
        debug_assert!(self.frames[id as usize].access_count > 0);
        if self.frames[id as usize].access_count == 1 {
            self.unpin(id);
        } else {
            self.frames[id as usize].access_count -= 1;
        }
    }

    /// Finds the frame holding `pid`, or claims one — from the free list,
    /// from unused capacity, or by evicting the LRU tail. Excludes pinned
    /// frames from eviction; returns `NoFrame` if the whole pool is pinned.
    fn claim(&mut self, pid: PageId) -> Result<BufferId> {
        if let Some(&id) = self.index.get(&pid) {
            let access_count = self.frames[id as usize].access_count;
            if access_count == 0 {
                self.pin(id);
            }
            self.frames[id as usize].access_count = access_count + 1;
            return Ok(id);
        }

        let id = if self.free_frames != 0 {
            let id = self.free_frames;
            self.free_frames = self.frames[id as usize].next;
            id
        } else if (self.used as usize) < self.frames.len() {
            let id = self.used;
            self.used += 1;
            id
        } else {
            let victim = self.tail;
            if victim == 0 {
                return Err(FlintError::NoFrame);
            }
            debug_assert_eq!(self.frames[victim as usize].access_count, 0);
            debug_assert_eq!(self.frames[victim as usize].state & PAGE_DIRTY, 0);
            self.pin(victim);
            self.index.remove(&self.frames[victim as usize].pid);
            victim
        };
        self.frames[id as usize].access_count = 1;
        self.frames[id as usize].pid = pid;
        self.frames[id as usize].state = PAGE_RAW;
        self.index.insert(pid, id);
        Ok(id)
    }
}

#[derive(PartialEq, Copy, Clone, Debug)]
pub enum AccessMode {
    ReadOnly,
    Write,
}

pub struct BufferPool {
    dir: Mutex<Directory>,
    busy_events: [Condvar; N_BUSY_EVENTS],
    pool: Vec<RwLock<Page>>,
    page_size: usize,
    wal_flush_threshold: BufferId,
}

/// Pinned page handle. Releases its pin on drop; borrows never outlive the
/// pool. Acquire the page body through `read()`/`write()`.
pub struct PageGuard<'a> {
    pub buf: BufferId,
    pub pid: PageId,
    pool: &'a BufferPool,
}

impl<'a> Drop for PageGuard<'a> {
    fn drop(&mut self) {
        self.pool.release(self.buf);
    }
}

impl<'a> PageGuard<'a> {
    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.pool.pool[self.buf as usize].read().unwrap()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Page> {
        self.pool.pool[self.buf as usize].write().unwrap()
    }
}

impl BufferPool {
    pub fn new(cache_size: usize, page_size: usize, wal_flush_threshold: BufferId) -> BufferPool {
        BufferPool {
            dir: Mutex::new(Directory::new(cache_size)),
            busy_events: [(); N_BUSY_EVENTS].map(|_| Condvar::new()),
            pool: (0..cache_size).map(|_| RwLock::new(Page::new(page_size))).collect(),
            page_size,
            wal_flush_threshold,
        }
    }

    /// Pins `pid`, loading it from `store` on first touch unless `mode` is
    /// `Write` and the caller will overwrite the whole page (new
    /// allocation), in which case the raw zero-filled frame is handed back
    /// without a disk read.
    pub fn pin(&self, store: &PageStore, pid: PageId, mode: AccessMode) -> Result<PageGuard<'_>> {
        let mut dir = self.dir.lock().unwrap();
        let buf = dir.claim(pid)?;

        if (dir.frames[buf as usize].state & PAGE_BUSY) != 0 {
            dir.frames[buf as usize].state |= PAGE_WAIT;
            loop {
                dir = self.busy_events[buf as usize % N_BUSY_EVENTS].wait(dir).unwrap();
                if (dir.frames[buf as usize].state & PAGE_BUSY) == 0 {
                    break;
                }
            }
        } else if (dir.frames[buf as usize].state & PAGE_RAW) != 0 {
            if mode != AccessMode::Write {
                dir.frames[buf as usize].state = PAGE_BUSY;
                drop(dir);
                let loaded = store.read_page(pid);
                let mut reacquired = self.dir.lock().unwrap();
                match loaded {
                    Ok(page) => *self.pool[buf as usize].write().unwrap() = page,
                    Err(e) => {
                        reacquired.frames[buf as usize].state = 0;
                        return Err(e);
                    }
                }
                if (reacquired.frames[buf as usize].state & PAGE_WAIT) != 0 {
                    self.busy_events[buf as usize % N_BUSY_EVENTS].notify_all();
                }
                dir = reacquired;
            }
            dir.frames[buf as usize].state = 0;
        }
        drop(dir);
        Ok(PageGuard { buf, pid, pool: self })
    }

    /// Pins a freshly allocated page id without reading it from disk —
    /// the frame is zero-filled and immediately marked dirty by the caller.
    pub fn pin_new(&self, pid: PageId) -> Result<PageGuard<'_>> {
        let mut dir = self.dir.lock().unwrap();
        let buf = dir.claim(pid)?;
        dir.frames[buf as usize].state = 0;
        let mut page = self.pool[buf as usize].write().unwrap();
        page.data.fill(0);
        Ok(PageGuard { buf, pid, pool: self })
    }

    /// Marks `buf` dirty, pinning it until flushed, and returns the next
    /// frame due for a WAL write once the flush threshold is exceeded.
    pub fn mark_dirty(&self, buf: BufferId, lsn: Lsn) -> Option<(BufferId, PageId)> {
        let mut dir = self.dir.lock().unwrap();
        dir.mark_dirty(buf, self.wal_flush_threshold, lsn)
    }

    pub fn wal_lsn(&self, buf: BufferId) -> Lsn {
        self.dir.lock().unwrap().frames[buf as usize].wal_lsn
    }

    pub fn clear_dirty(&self, buf: BufferId) {
        self.dir.lock().unwrap().clear_dirty(buf);
    }

    /// Drops `buf` from the cache without writing it back (transaction
    /// rollback of a page never committed to the WAL).
    pub fn discard(&self, buf: BufferId) {
        self.dir.lock().unwrap().throw_frame(buf);
    }

    fn release(&self, buf: BufferId) {
        self.dir.lock().unwrap().release(buf);
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Frame ids currently dirty, from the most to least recently
    /// modified, for the checkpoint/flush path in `wal.rs`.
    pub fn dirty_frames(&self) -> Vec<(BufferId, PageId)> {
        let dir = self.dir.lock().unwrap();
        let mut out = Vec::new();
        let mut id = dir.dirty_frames;
        while id != 0 {
            out.push((id, dir.frames[id as usize].pid));
            id = dir.frames[id as usize].next;
        }
        out
    }

    pub fn read_frame(&self, buf: BufferId) -> RwLockReadGuard<'_, Page> {
        self.pool[buf as usize].read().unwrap()
    }
}
