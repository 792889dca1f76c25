//! # Buffer Pool
//!
//! This module implements the pinned-page buffer pool the hash index runs
//! on: a fixed array of in-memory frames caching pages of the index file,
//! with pin counts, per-page reader/writer latches, and SIEVE eviction.
//!
//! ## Pin/Latch Protocol
//!
//! Pages must be pinned before access to prevent eviction:
//!
//! 1. `fetch_page`/`new_page` return a [`PageGuard`] with the frame pinned
//! 2. `guard.read()` / `guard.write()` take the page latch and expose the
//!    bytes; the latch borrow ends before the guard can drop
//! 3. Dropping the guard unpins the frame
//!
//! The borrow structure therefore enforces the latching discipline by
//! construction: a page latch is always acquired after the pin exists and
//! released before the pin is dropped. `guard.write()` marks the frame
//! dirty; dirty frames are written back on eviction and on `flush_all`.
//!
//! ## Why SIEVE Instead of LRU?
//!
//! Strict recency ordering lets one directory walk evict every cached
//! bucket. SIEVE keeps a `visited` flag per frame instead:
//!
//! - On access: set the flag
//! - On eviction: a hand scans the frame array; a set flag is cleared and
//!   the frame spared once, a clear flag makes the frame the victim
//!
//! Pinned frames are always skipped. When every frame is pinned the pool
//! is out of pages and the error propagates to the index caller unchanged.
//!
//! ## Page Allocation
//!
//! `new_page` prefers the freelist (pages returned by `delete_page`) and
//! grows the file only when the list is empty. Page 0 is the file header
//! and never enters the pool; its page id doubles as the invalid sentinel.
//!
//! ## Thread Safety
//!
//! The pool is `Send + Sync`. The page table, file handle, and freelist
//! sit behind one mutex; page latches are per-frame, so operations on
//! different resident pages only contend on the short table lookup.

use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use eyre::{bail, ensure, Result};
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};
use zerocopy::IntoBytes;

use crate::config::{INVALID_PAGE_ID, PAGE_SIZE};
use super::file::PageFile;
use super::freelist::Freelist;
use super::headers::IndexFileHeader;

/// One buffer frame: a page-sized buffer plus its cache bookkeeping.
///
/// The `RwLock` around the bytes *is* the per-page reader/writer latch.
#[derive(Debug)]
struct Frame {
    data: RwLock<Box<[u8; PAGE_SIZE]>>,
    page_id: AtomicU32,
    pin_count: AtomicU32,
    dirty: AtomicBool,
    visited: AtomicBool,
}

impl Frame {
    fn new() -> Self {
        Self {
            data: RwLock::new(Box::new([0u8; PAGE_SIZE])),
            page_id: AtomicU32::new(INVALID_PAGE_ID),
            pin_count: AtomicU32::new(0),
            dirty: AtomicBool::new(false),
            visited: AtomicBool::new(false),
        }
    }

    fn page_id(&self) -> u32 {
        self.page_id.load(Ordering::Acquire)
    }

    fn is_pinned(&self) -> bool {
        self.pin_count.load(Ordering::Acquire) > 0
    }

    fn pin(&self) {
        self.pin_count.fetch_add(1, Ordering::AcqRel);
    }

    fn unpin(&self) {
        let prev = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unpin called on unpinned frame");
    }

    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }

    fn mark_visited(&self) {
        self.visited.store(true, Ordering::Release);
    }

    fn clear_visited(&self) -> bool {
        self.visited.swap(false, Ordering::AcqRel)
    }

    fn reset(&self) {
        self.page_id.store(INVALID_PAGE_ID, Ordering::Release);
        self.dirty.store(false, Ordering::Release);
        self.visited.store(false, Ordering::Release);
    }
}

/// State that must change together: the file, the freelist, and the
/// page-to-frame mapping.
#[derive(Debug)]
struct PoolInner {
    file: PageFile,
    freelist: Freelist,
    page_table: HashMap<u32, usize>,
    free_frames: Vec<usize>,
    hand: usize,
}

/// A fixed-capacity cache of index file pages.
pub struct BufferPool {
    frames: Vec<Arc<Frame>>,
    inner: Mutex<PoolInner>,
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("pool_pages", &self.frames.len())
            .field("pinned_frames", &self.pinned_frames())
            .finish()
    }
}

impl BufferPool {
    /// Creates a new index file and a pool over it.
    ///
    /// The file starts with only the header page; data pages are created
    /// on demand by [`BufferPool::new_page`].
    pub fn create<P: AsRef<Path>>(path: P, pool_pages: usize) -> Result<Self> {
        ensure!(pool_pages > 0, "buffer pool needs at least one frame");

        let mut file = PageFile::create(path, 1)?;
        let header = IndexFileHeader::new();
        file.page_mut(0)?[..header.as_bytes().len()].copy_from_slice(header.as_bytes());

        Ok(Self::with_file(file, Freelist::new(), pool_pages))
    }

    /// Opens an existing index file.
    pub fn open<P: AsRef<Path>>(path: P, pool_pages: usize) -> Result<Self> {
        ensure!(pool_pages > 0, "buffer pool needs at least one frame");

        let file = PageFile::open(path)?;
        let freelist = {
            let header = IndexFileHeader::from_bytes(file.page(0)?)?;
            Freelist::with_head(header.freelist_head(), header.freelist_pages())
        };

        Ok(Self::with_file(file, freelist, pool_pages))
    }

    fn with_file(file: PageFile, freelist: Freelist, pool_pages: usize) -> Self {
        let frames: Vec<Arc<Frame>> = (0..pool_pages).map(|_| Arc::new(Frame::new())).collect();
        let free_frames = (0..pool_pages).rev().collect();

        Self {
            frames,
            inner: Mutex::new(PoolInner {
                file,
                freelist,
                page_table: HashMap::with_capacity(pool_pages),
                free_frames,
                hand: 0,
            }),
        }
    }

    /// Allocates a zeroed page, pinned and marked dirty.
    pub fn new_page(&self) -> Result<PageGuard> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let frame_idx = self.acquire_frame(inner)?;

        let page_id = match Self::allocate_page_id(inner) {
            Ok(id) => id,
            Err(e) => {
                inner.free_frames.push(frame_idx);
                return Err(e);
            }
        };
        debug_assert_ne!(page_id, INVALID_PAGE_ID);

        let frame = &self.frames[frame_idx];
        frame.data.write().fill(0);
        frame.page_id.store(page_id, Ordering::Release);
        frame.mark_dirty();
        frame.mark_visited();
        frame.pin();
        inner.page_table.insert(page_id, frame_idx);

        trace!(page_id, "allocated page");
        Ok(PageGuard {
            frame: Arc::clone(frame),
            page_id,
        })
    }

    /// Pins an existing page, reading it from disk if not resident.
    pub fn fetch_page(&self, page_id: u32) -> Result<PageGuard> {
        ensure!(
            page_id != INVALID_PAGE_ID,
            "cannot fetch the invalid page id"
        );

        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if let Some(&frame_idx) = inner.page_table.get(&page_id) {
            let frame = &self.frames[frame_idx];
            frame.pin();
            frame.mark_visited();
            return Ok(PageGuard {
                frame: Arc::clone(frame),
                page_id,
            });
        }

        ensure!(
            page_id < inner.file.page_count(),
            "page {} does not exist (page_count={})",
            page_id,
            inner.file.page_count()
        );

        let frame_idx = self.acquire_frame(inner)?;
        let frame = &self.frames[frame_idx];
        if let Err(e) = inner.file.read_page(page_id, &mut frame.data.write()) {
            inner.free_frames.push(frame_idx);
            return Err(e);
        }
        frame.page_id.store(page_id, Ordering::Release);
        frame.clear_dirty();
        frame.mark_visited();
        frame.pin();
        inner.page_table.insert(page_id, frame_idx);

        Ok(PageGuard {
            frame: Arc::clone(frame),
            page_id,
        })
    }

    /// Removes a page from the pool and returns it to the freelist.
    ///
    /// Fails if the page is pinned. Dirty contents are discarded; a deleted
    /// page has no meaningful bytes to write back.
    pub fn delete_page(&self, page_id: u32) -> Result<()> {
        ensure!(
            page_id != INVALID_PAGE_ID,
            "cannot delete the invalid page id"
        );

        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if let Some(&frame_idx) = inner.page_table.get(&page_id) {
            let frame = &self.frames[frame_idx];
            ensure!(
                !frame.is_pinned(),
                "cannot delete pinned page {} (pin_count={})",
                page_id,
                frame.pin_count.load(Ordering::Acquire)
            );
            inner.page_table.remove(&page_id);
            frame.reset();
            inner.free_frames.push(frame_idx);
        }

        inner.freelist.release(&mut inner.file, page_id)?;
        debug!(page_id, "freed page");
        Ok(())
    }

    /// Writes every dirty frame and the file header back to disk and syncs.
    ///
    /// A frame whose page latch is held is skipped: its bytes are in flux
    /// and its writer still holds a pin, so it stays dirty and is picked up
    /// by eviction or a later flush. At a quiesce point nothing is latched
    /// and every dirty page reaches disk.
    pub fn flush_all(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let mut flushed = 0usize;

        for frame in &self.frames {
            let page_id = frame.page_id();
            if page_id != INVALID_PAGE_ID && frame.is_dirty() {
                let Some(data) = frame.data.try_read() else {
                    continue;
                };
                inner.file.write_page(page_id, &data)?;
                frame.clear_dirty();
                flushed += 1;
            }
        }

        let head = inner.freelist.head_page();
        let count = inner.freelist.free_count();
        {
            let header = IndexFileHeader::from_bytes_mut(inner.file.page_mut(0)?)?;
            header.set_freelist_head(head);
            header.set_freelist_pages(count);
        }

        inner.file.sync()?;
        debug!(flushed, "flushed buffer pool");
        Ok(())
    }

    /// Page id of the hash directory recorded in the file header.
    pub fn directory_page(&self) -> Result<u32> {
        let inner = self.inner.lock();
        Ok(IndexFileHeader::from_bytes(inner.file.page(0)?)?.directory_page())
    }

    /// Records the hash directory's page id in the file header.
    pub fn set_directory_page(&self, page_id: u32) -> Result<()> {
        let mut inner = self.inner.lock();
        IndexFileHeader::from_bytes_mut(inner.file.page_mut(0)?)?.set_directory_page(page_id);
        Ok(())
    }

    /// Number of frames currently pinned.
    ///
    /// Every fetch/new must be balanced by a guard drop, so this returns to
    /// zero between operations; tests use it to catch leaked pins.
    pub fn pinned_frames(&self) -> usize {
        self.frames.iter().filter(|f| f.is_pinned()).count()
    }

    /// Number of frames in the pool.
    pub fn pool_pages(&self) -> usize {
        self.frames.len()
    }

    /// Number of pages in the backing file (header page included).
    pub fn page_count(&self) -> u32 {
        self.inner.lock().file.page_count()
    }

    /// Picks a page id for a new page: freelist first, file growth second.
    fn allocate_page_id(inner: &mut PoolInner) -> Result<u32> {
        match inner.freelist.allocate(&mut inner.file)? {
            Some(id) => Ok(id),
            None => {
                let id = inner.file.page_count();
                inner.file.grow(id + 1)?;
                Ok(id)
            }
        }
    }

    /// Finds a frame for a new resident page: a free frame if one exists,
    /// otherwise a SIEVE victim (flushed first when dirty).
    fn acquire_frame(&self, inner: &mut PoolInner) -> Result<usize> {
        if let Some(idx) = inner.free_frames.pop() {
            return Ok(idx);
        }

        // SIEVE: clear one visited bit per pass position; evict the first
        // unpinned frame whose bit is already clear. Two full sweeps are
        // enough to clear every bit once and then find a victim.
        let len = self.frames.len();
        for _ in 0..2 * len {
            let idx = inner.hand;
            inner.hand = (inner.hand + 1) % len;

            let frame = &self.frames[idx];
            if frame.is_pinned() {
                continue;
            }
            if frame.clear_visited() {
                continue;
            }

            let old_page_id = frame.page_id();
            if frame.is_dirty() {
                inner.file.write_page(old_page_id, &frame.data.read())?;
                frame.clear_dirty();
            }
            inner.page_table.remove(&old_page_id);
            frame.reset();
            debug!(page_id = old_page_id, "evicted page");
            return Ok(idx);
        }

        bail!(
            "buffer pool out of pages: all {} frames pinned",
            self.frames.len()
        );
    }
}

/// A pinned page. Dropping the guard unpins the frame.
pub struct PageGuard {
    frame: Arc<Frame>,
    page_id: u32,
}

impl PageGuard {
    pub fn page_id(&self) -> u32 {
        self.page_id
    }

    /// Takes the page's shared latch.
    pub fn read(&self) -> PageReadGuard<'_> {
        PageReadGuard {
            guard: self.frame.data.read(),
        }
    }

    /// Takes the page's exclusive latch and marks the frame dirty.
    pub fn write(&self) -> PageWriteGuard<'_> {
        self.frame.mark_dirty();
        PageWriteGuard {
            guard: self.frame.data.write(),
        }
    }

    pub fn mark_dirty(&self) {
        self.frame.mark_dirty();
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        self.frame.unpin();
    }
}

impl std::fmt::Debug for PageGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageGuard")
            .field("page_id", &self.page_id)
            .finish()
    }
}

/// Shared latch over a page's bytes.
pub struct PageReadGuard<'a> {
    guard: parking_lot::RwLockReadGuard<'a, Box<[u8; PAGE_SIZE]>>,
}

impl Deref for PageReadGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.guard.as_slice()
    }
}

/// Exclusive latch over a page's bytes.
pub struct PageWriteGuard<'a> {
    guard: parking_lot::RwLockWriteGuard<'a, Box<[u8; PAGE_SIZE]>>,
}

impl Deref for PageWriteGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.guard.as_slice()
    }
}

impl DerefMut for PageWriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.guard.as_mut_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_pool(pool_pages: usize) -> (tempfile::TempDir, BufferPool) {
        let dir = tempdir().unwrap();
        let pool = BufferPool::create(dir.path().join("test.ehx"), pool_pages).unwrap();
        (dir, pool)
    }

    #[test]
    fn new_page_is_zeroed_pinned_and_never_page_zero() {
        let (_dir, pool) = create_pool(4);

        let guard = pool.new_page().unwrap();

        assert_ne!(guard.page_id(), INVALID_PAGE_ID);
        assert!(guard.read().iter().all(|&b| b == 0));
        assert_eq!(pool.pinned_frames(), 1);
    }

    #[test]
    fn guard_drop_unpins() {
        let (_dir, pool) = create_pool(4);

        let guard = pool.new_page().unwrap();
        drop(guard);

        assert_eq!(pool.pinned_frames(), 0);
    }

    #[test]
    fn fetch_returns_written_data() {
        let (_dir, pool) = create_pool(4);

        let page_id = {
            let guard = pool.new_page().unwrap();
            guard.write()[0..4].copy_from_slice(&[1, 2, 3, 4]);
            guard.page_id()
        };

        let guard = pool.fetch_page(page_id).unwrap();
        assert_eq!(&guard.read()[0..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn fetch_invalid_page_id_is_error() {
        let (_dir, pool) = create_pool(4);

        assert!(pool.fetch_page(INVALID_PAGE_ID).is_err());
    }

    #[test]
    fn fetch_nonexistent_page_is_error() {
        let (_dir, pool) = create_pool(4);

        let result = pool.fetch_page(99);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("does not exist"));
    }

    #[test]
    fn eviction_preserves_dirty_data() {
        let (_dir, pool) = create_pool(2);

        let first = {
            let guard = pool.new_page().unwrap();
            guard.write()[0] = 0xEE;
            guard.page_id()
        };

        // Cycle enough pages through the two frames to evict the first.
        for _ in 0..4 {
            let _guard = pool.new_page().unwrap();
        }

        let guard = pool.fetch_page(first).unwrap();
        assert_eq!(guard.read()[0], 0xEE);
    }

    #[test]
    fn all_frames_pinned_is_out_of_pages() {
        let (_dir, pool) = create_pool(2);

        let _a = pool.new_page().unwrap();
        let _b = pool.new_page().unwrap();

        let result = pool.new_page();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("out of pages"));
    }

    #[test]
    fn delete_page_refuses_pinned() {
        let (_dir, pool) = create_pool(4);

        let guard = pool.new_page().unwrap();
        let page_id = guard.page_id();

        assert!(pool.delete_page(page_id).is_err());
        drop(guard);
        pool.delete_page(page_id).unwrap();
    }

    #[test]
    fn deleted_page_is_recycled() {
        let (_dir, pool) = create_pool(4);

        let page_id = {
            let guard = pool.new_page().unwrap();
            guard.page_id()
        };
        pool.delete_page(page_id).unwrap();

        let guard = pool.new_page().unwrap();
        assert_eq!(guard.page_id(), page_id);
        assert!(guard.read().iter().all(|&b| b == 0));
    }

    #[test]
    fn concurrent_readers_share_the_page_latch() {
        let (_dir, pool) = create_pool(4);
        let guard = pool.new_page().unwrap();

        let r1 = guard.read();
        let r2 = guard.read();
        assert_eq!(r1[0], r2[0]);
    }

    #[test]
    fn directory_page_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.ehx");

        let page_id = {
            let pool = BufferPool::create(&path, 4).unwrap();
            let page_id = {
                let guard = pool.new_page().unwrap();
                guard.write()[0] = 9;
                guard.page_id()
            };
            pool.set_directory_page(page_id).unwrap();
            pool.flush_all().unwrap();
            page_id
        };

        let pool = BufferPool::open(&path, 4).unwrap();
        assert_eq!(pool.directory_page().unwrap(), page_id);
        let guard = pool.fetch_page(page_id).unwrap();
        assert_eq!(guard.read()[0], 9);
    }

    #[test]
    fn freelist_state_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.ehx");

        let freed = {
            let pool = BufferPool::create(&path, 4).unwrap();
            let a = pool.new_page().unwrap().page_id();
            let _b = pool.new_page().unwrap().page_id();
            pool.delete_page(a).unwrap();
            pool.flush_all().unwrap();
            a
        };

        let pool = BufferPool::open(&path, 4).unwrap();
        let guard = pool.new_page().unwrap();
        assert_eq!(guard.page_id(), freed);
    }
}
