//! B+Tree index operations: search, insert-with-split, delete with
//! redistribute/merge, and ordered range scans.
//!
//! Free functions parameterized by a `BTreeHandle` (root + height), so one
//! `PageStore`/`BufferPool` pair can host many independently-rooted trees —
//! one per `IndexDef` — rather than a single implicit tree.
//!
//! Keys are already fully composed, order-preserving byte strings by the
//! time they reach this module (see `variant::compose_key`); non-unique
//! secondary indexes fold the rowid into the key itself upstream, so every
//! key this module sees is unique and a plain exact-match insert/replace
//! is all that's needed here. Ascending vs. descending indexes invert
//! comparison direction at this layer, never in the codec.

use std::cmp::Ordering;

use crate::buffer_pool::{AccessMode, BufferPool};
use crate::config::{ItemPointer, PageId};
use crate::disk::PageStore;
use crate::error::{FlintError, Result};
use crate::page::{Page, PageKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BTreeHandle {
    pub root: PageId,
    pub height: u32,
}

fn cmp(page: &Page, ip: ItemPointer, key: &[u8], descending: bool) -> Ordering {
    let ord = page.compare_key(ip, key);
    if descending {
        ord.reverse()
    } else {
        ord
    }
}

/// Binary search for the first slot whose key is `>=` (or `<=` when
/// descending) `key`. The right-most slot always "wins" the comparison
/// because its stored key is the empty +inf sentinel.
fn search_slot(page: &Page, key: &[u8], descending: bool) -> ItemPointer {
    let n = page.get_n_items();
    let mut l: ItemPointer = 0;
    let mut r = n;
    while l < r {
        let m = (l + r) >> 1;
        if cmp(page, m, key, descending) == Ordering::Greater {
            l = m + 1;
        } else {
            r = m;
        }
    }
    r
}

fn alloc_leaf(store: &mut PageStore, pool: &BufferPool) -> Result<PageId> {
    let pid = store.alloc_page();
    let guard = pool.pin_new(pid)?;
    {
        let mut page = guard.write();
        page.set_kind(PageKind::BtreeLeaf);
        page.set_n_items(0);
    }
    pool.mark_dirty(guard.buf, 0);
    Ok(pid)
}

fn alloc_internal(
    store: &mut PageStore,
    pool: &BufferPool,
    sep_key: &[u8],
    left: PageId,
    right: PageId,
) -> Result<PageId> {
    let pid = store.alloc_page();
    let guard = pool.pin_new(pid)?;
    {
        let mut page = guard.write();
        page.set_kind(PageKind::BtreeInternal);
        page.set_n_items(0);
        page.insert_item(0, sep_key, &left.to_be_bytes());
        page.insert_item(1, &[], &right.to_be_bytes());
    }
    pool.mark_dirty(guard.buf, 0);
    Ok(pid)
}

/// Looks up `key`; returns its stored value if present.
pub fn find(
    store: &PageStore,
    pool: &BufferPool,
    handle: &BTreeHandle,
    key: &[u8],
    descending: bool,
) -> Result<Option<Vec<u8>>> {
    if handle.root == 0 {
        return Ok(None);
    }
    let mut pid = handle.root;
    for level in (1..=handle.height).rev() {
        let guard = pool.pin(store, pid, AccessMode::ReadOnly)?;
        let page = guard.read();
        let r = search_slot(&page, key, descending);
        if level == 1 {
            let n = page.get_n_items();
            if r < n && page.compare_key(r, key) == Ordering::Equal {
                let (_, value) = page.get_item(r);
                return Ok(Some(value));
            }
            return Ok(None);
        }
        pid = page.get_child(r);
    }
    Ok(None)
}

enum InsertOutcome {
    Done,
    Split { sep_key: Vec<u8>, new_pid: PageId },
}

fn insert_in_page(
    store: &mut PageStore,
    pool: &BufferPool,
    pid: PageId,
    ip: ItemPointer,
    key: &[u8],
    value: &[u8],
) -> Result<InsertOutcome> {
    let guard = pool.pin(store, pid, AccessMode::Write)?;
    let fits = {
        let mut page = guard.write();
        page.insert_item(ip, key, value)
    };
    if fits {
        pool.mark_dirty(guard.buf, 0);
        return Ok(InsertOutcome::Done);
    }

    let new_pid = store.alloc_page();
    let new_guard = pool.pin_new(new_pid)?;
    let old_prev;
    let sep_key;
    {
        let mut page = guard.write();
        let mut new_page = new_guard.write();
        old_prev = page.prev_sibling();
        new_page.set_kind(page.kind());
        let split = page.split(&mut new_page, ip);
        let ok = if ip > split {
            page.insert_item(ip - split - 1, key, value)
        } else {
            new_page.insert_item(ip, key, value)
        };
        if !ok {
            return Err(FlintError::CorruptRecord(
                "item does not fit even after split".into(),
            ));
        }
        // `new_page` holds the lower half of keys, so it takes pid's place
        // in the leaf chain ahead of it.
        new_page.set_next_sibling(pid);
        new_page.set_prev_sibling(old_prev);
        page.set_prev_sibling(new_pid);
        sep_key = new_page.get_last_key();
    }
    pool.mark_dirty(guard.buf, 0);
    pool.mark_dirty(new_guard.buf, 0);

    if old_prev != 0 {
        let prev_guard = pool.pin(store, old_prev, AccessMode::Write)?;
        prev_guard.write().set_next_sibling(new_pid);
        pool.mark_dirty(prev_guard.buf, 0);
    }

    Ok(InsertOutcome::Split { sep_key, new_pid })
}

fn insert_rec(
    store: &mut PageStore,
    pool: &BufferPool,
    pid: PageId,
    key: &[u8],
    value: &[u8],
    height: u32,
    descending: bool,
    unique: bool,
) -> Result<Option<(Vec<u8>, PageId)>> {
    let (r, n, is_leaf, exact) = {
        let guard = pool.pin(store, pid, AccessMode::ReadOnly)?;
        let page = guard.read();
        let r = search_slot(&page, key, descending);
        let n = page.get_n_items();
        let exact = r < n && page.compare_key(r, key) == Ordering::Equal;
        (r, n, height == 1, exact)
    };

    if is_leaf {
        if exact && unique {
            return Err(FlintError::DuplicateKey {
                index: String::new(),
            });
        }
        if exact {
            let guard = pool.pin(store, pid, AccessMode::Write)?;
            let mut page = guard.write();
            page.remove_key(r, true);
        }
        match insert_in_page(store, pool, pid, r, key, value)? {
            InsertOutcome::Done => Ok(None),
            InsertOutcome::Split { sep_key, new_pid } => Ok(Some((sep_key, new_pid))),
        }
    } else {
        debug_assert!(r < n);
        let child = {
            let guard = pool.pin(store, pid, AccessMode::ReadOnly)?;
            guard.read().get_child(r)
        };
        let overflow = insert_rec(store, pool, child, key, value, height - 1, descending, unique)?;
        if let Some((sep_key, new_child)) = overflow {
            match insert_in_page(store, pool, pid, r, &sep_key, &new_child.to_be_bytes())? {
                InsertOutcome::Done => Ok(None),
                InsertOutcome::Split { sep_key, new_pid } => Ok(Some((sep_key, new_pid))),
            }
        } else {
            Ok(None)
        }
    }
}

/// Inserts or replaces `key` -> `value`. `unique` rejects an exact-key
/// collision with `DuplicateKey` instead of replacing.
pub fn insert(
    store: &mut PageStore,
    pool: &BufferPool,
    handle: &mut BTreeHandle,
    key: &[u8],
    value: &[u8],
    descending: bool,
    unique: bool,
) -> Result<()> {
    if handle.root == 0 {
        handle.root = alloc_leaf(store, pool)?;
        handle.height = 1;
        let guard = pool.pin(store, handle.root, AccessMode::Write)?;
        guard.write().insert_item(0, key, value);
        pool.mark_dirty(guard.buf, 0);
        return Ok(());
    }
    let overflow = insert_rec(store, pool, handle.root, key, value, handle.height, descending, unique)?;
    if let Some((sep_key, new_pid)) = overflow {
        let new_root = alloc_internal(store, pool, &sep_key, handle.root, new_pid)?;
        handle.root = new_root;
        handle.height += 1;
    }
    Ok(())
}

const MERGE_THRESHOLD: f64 = crate::config::DEFAULT_MERGE_THRESHOLD_NUM as f64
    / crate::config::DEFAULT_MERGE_THRESHOLD_DEN as f64;

enum RemoveOutcome {
    Done,
    Underflow,
}

/// Redistributes one item from `from_pid` into `into_pid` (`from` gives up
/// its outermost item) and returns the updated separator key for the slot
/// between them in the parent.
fn redistribute(
    pool: &BufferPool,
    store: &PageStore,
    left_pid: PageId,
    right_pid: PageId,
    take_from_left: bool,
) -> Result<Vec<u8>> {
    let left_guard = pool.pin(store, left_pid, AccessMode::Write)?;
    let right_guard = pool.pin(store, right_pid, AccessMode::Write)?;
    let last_key = {
        let mut left = left_guard.write();
        let mut right = right_guard.write();
        if take_from_left {
            let last = left.get_n_items() - 1;
            let (k, v) = left.get_item(last);
            left.remove_key(last, left.kind() != PageKind::BtreeInternal);
            right.insert_item(0, &k, &v);
        } else {
            let (k, v) = right.get_item(0);
            right.remove_key(0, right.kind() != PageKind::BtreeInternal);
            let n = left.get_n_items();
            left.insert_item(n, &k, &v);
        }
        left.get_last_key()
    };
    pool.mark_dirty(left_guard.buf, 0);
    pool.mark_dirty(right_guard.buf, 0);
    Ok(last_key)
}

/// Merges `right_pid`'s items into `left_pid` and frees `right_pid`.
fn merge(
    pool: &BufferPool,
    store: &mut PageStore,
    left_pid: PageId,
    right_pid: PageId,
) -> Result<()> {
    let left_guard = pool.pin(store, left_pid, AccessMode::Write)?;
    let right_guard = pool.pin(store, right_pid, AccessMode::Write)?;
    let right_buf = right_guard.buf;
    let right_next;
    {
        let mut left = left_guard.write();
        let right = right_guard.read();
        let n_right = right.get_n_items();
        for i in 0..n_right {
            let (k, v) = right.get_item(i);
            let at = left.get_n_items();
            if !left.insert_item(at, &k, &v) {
                return Err(FlintError::CorruptRecord(
                    "merge target page has no room".into(),
                ));
            }
        }
        right_next = right.next_sibling();
        left.set_next_sibling(right_next);
    }
    pool.mark_dirty(left_guard.buf, 0);
    drop(left_guard);
    drop(right_guard);
    pool.discard(right_buf);
    store.free_page(right_pid);

    if right_next != 0 {
        let next_guard = pool.pin(store, right_next, AccessMode::Write)?;
        next_guard.write().set_prev_sibling(left_pid);
        pool.mark_dirty(next_guard.buf, 0);
    }
    Ok(())
}

fn remove_rec(
    store: &mut PageStore,
    pool: &BufferPool,
    pid: PageId,
    key: &[u8],
    height: u32,
    descending: bool,
) -> Result<(bool, RemoveOutcome)> {
    let (r, n, is_leaf, exact) = {
        let guard = pool.pin(store, pid, AccessMode::ReadOnly)?;
        let page = guard.read();
        let r = search_slot(&page, key, descending);
        let n = page.get_n_items();
        let exact = r < n && page.compare_key(r, key) == Ordering::Equal;
        (r, n, height == 1, exact)
    };

    let mut removed = false;
    if is_leaf {
        if exact {
            let guard = pool.pin(store, pid, AccessMode::Write)?;
            guard.write().remove_key(r, true);
            pool.mark_dirty(guard.buf, 0);
            removed = true;
        }
    } else {
        debug_assert!(r < n);
        let child = {
            let guard = pool.pin(store, pid, AccessMode::ReadOnly)?;
            guard.read().get_child(r)
        };
        let (child_removed, child_outcome) = remove_rec(store, pool, child, key, height - 1, descending)?;
        removed = child_removed;
        if matches!(child_outcome, RemoveOutcome::Underflow) {
            resolve_underflow(store, pool, pid, r, n)?;
        }
    }

    let empty = {
        let guard = pool.pin(store, pid, AccessMode::ReadOnly)?;
        guard.read().get_n_items() == 0
    };
    if empty {
        return Ok((removed, RemoveOutcome::Underflow));
    }
    let fill = {
        let guard = pool.pin(store, pid, AccessMode::ReadOnly)?;
        guard.read().fill_fraction()
    };
    if fill < MERGE_THRESHOLD {
        Ok((removed, RemoveOutcome::Underflow))
    } else {
        Ok((removed, RemoveOutcome::Done))
    }
}

/// `r` is the slot in `parent_pid` whose child just underflowed; `n` is
/// the parent's item count at the time of descent. Tries redistributing
/// from a sibling, then falls back to a merge, folding the separator key
/// update or removal into the parent page.
fn resolve_underflow(
    store: &mut PageStore,
    pool: &BufferPool,
    parent_pid: PageId,
    r: ItemPointer,
    n: ItemPointer,
) -> Result<()> {
    let child_pid = {
        let guard = pool.pin(store, parent_pid, AccessMode::ReadOnly)?;
        guard.read().get_child(r)
    };

    if r > 0 {
        let left_sib = {
            let guard = pool.pin(store, parent_pid, AccessMode::ReadOnly)?;
            guard.read().get_child(r - 1)
        };
        let left_fill = {
            let guard = pool.pin(store, left_sib, AccessMode::ReadOnly)?;
            guard.read().fill_fraction()
        };
        if left_fill > MERGE_THRESHOLD {
            let new_sep = redistribute(pool, store, left_sib, child_pid, true)?;
            let parent_guard = pool.pin(store, parent_pid, AccessMode::Write)?;
            {
                let mut parent = parent_guard.write();
                parent.remove_key(r - 1, false);
                parent.insert_item(r - 1, &new_sep, &left_sib.to_be_bytes());
            }
            pool.mark_dirty(parent_guard.buf, 0);
            return Ok(());
        }
        merge(pool, store, left_sib, child_pid)?;
        let parent_guard = pool.pin(store, parent_pid, AccessMode::Write)?;
        parent_guard.write().remove_key(r - 1, false);
        pool.mark_dirty(parent_guard.buf, 0);
        return Ok(());
    }

    if r + 1 < n {
        let right_sib = {
            let guard = pool.pin(store, parent_pid, AccessMode::ReadOnly)?;
            guard.read().get_child(r + 1)
        };
        let right_fill = {
            let guard = pool.pin(store, right_sib, AccessMode::ReadOnly)?;
            guard.read().fill_fraction()
        };
        if right_fill > MERGE_THRESHOLD {
            let new_sep = redistribute(pool, store, child_pid, right_sib, false)?;
            let parent_guard = pool.pin(store, parent_pid, AccessMode::Write)?;
            {
                let mut parent = parent_guard.write();
                parent.remove_key(r, false);
                parent.insert_item(r, &new_sep, &child_pid.to_be_bytes());
            }
            pool.mark_dirty(parent_guard.buf, 0);
            return Ok(());
        }
        merge(pool, store, child_pid, right_sib)?;
        let parent_guard = pool.pin(store, parent_pid, AccessMode::Write)?;
        parent_guard.write().remove_key(r, false);
        pool.mark_dirty(parent_guard.buf, 0);
        return Ok(());
    }

    // Sole child left in the parent; nothing to redistribute or merge with.
    Ok(())
}

/// Removes `key` if present. Returns whether a matching entry was found.
pub fn remove(
    store: &mut PageStore,
    pool: &BufferPool,
    handle: &mut BTreeHandle,
    key: &[u8],
    descending: bool,
) -> Result<bool> {
    if handle.root == 0 {
        return Ok(false);
    }
    let (removed, outcome) = remove_rec(store, pool, handle.root, key, handle.height, descending)?;
    if matches!(outcome, RemoveOutcome::Underflow) {
        let (n_items, only_child) = {
            let guard = pool.pin(store, handle.root, AccessMode::ReadOnly)?;
            let page = guard.read();
            let n = page.get_n_items();
            let only_child = if handle.height > 1 && n == 1 {
                Some(page.get_child(0))
            } else {
                None
            };
            (n, only_child)
        };
        if n_items == 0 {
            let old_root = handle.root;
            store.free_page(old_root);
            handle.root = 0;
            handle.height = 0;
        } else if let Some(child) = only_child {
            let old_root = handle.root;
            store.free_page(old_root);
            handle.root = child;
            handle.height -= 1;
        }
    }
    Ok(removed)
}

/// Leftmost leaf page id, for a forward full-index scan.
pub fn first_leaf(store: &PageStore, pool: &BufferPool, handle: &BTreeHandle) -> Result<PageId> {
    if handle.root == 0 {
        return Ok(0);
    }
    let mut pid = handle.root;
    for level in (1..=handle.height).rev() {
        if level == 1 {
            return Ok(pid);
        }
        let guard = pool.pin(store, pid, AccessMode::ReadOnly)?;
        pid = guard.read().get_child(0);
    }
    Ok(pid)
}

/// The leaf page id that would contain `key` (or its insertion point).
pub fn leaf_for(
    store: &PageStore,
    pool: &BufferPool,
    handle: &BTreeHandle,
    key: &[u8],
    descending: bool,
) -> Result<PageId> {
    if handle.root == 0 {
        return Ok(0);
    }
    let mut pid = handle.root;
    for level in (1..=handle.height).rev() {
        if level == 1 {
            return Ok(pid);
        }
        let guard = pool.pin(store, pid, AccessMode::ReadOnly)?;
        let page = guard.read();
        let r = search_slot(&page, key, descending);
        pid = page.get_child(r);
    }
    Ok(pid)
}

/// A forward or backward walk over a leaf chain, pinning one leaf at a
/// time rather than the whole tree.
pub struct Cursor<'a> {
    store: &'a PageStore,
    pool: &'a BufferPool,
    pid: PageId,
    ip: ItemPointer,
    backward: bool,
}

impl<'a> Cursor<'a> {
    pub fn new(
        store: &'a PageStore,
        pool: &'a BufferPool,
        start_pid: PageId,
        backward: bool,
    ) -> Cursor<'a> {
        let ip = 0;
        Cursor {
            store,
            pool,
            pid: start_pid,
            ip,
            backward,
        }
    }

    pub fn next(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        loop {
            if self.pid == 0 {
                return Ok(None);
            }
            let guard = self.pool.pin(self.store, self.pid, AccessMode::ReadOnly)?;
            let page = guard.read();
            let n = page.get_n_items();
            if self.backward && self.ip == 0 {
                self.ip = n;
            }
            let idx = if self.backward {
                if self.ip == 0 {
                    self.pid = page.prev_sibling();
                    self.ip = 0;
                    continue;
                }
                self.ip - 1
            } else {
                self.ip
            };
            if idx >= n {
                self.pid = page.next_sibling();
                self.ip = 0;
                continue;
            }
            let item = page.get_item(idx);
            if self.backward {
                self.ip -= 1;
            } else {
                self.ip += 1;
            }
            return Ok(Some(item));
        }
    }
}
