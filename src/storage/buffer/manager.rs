use std::path::Path;
use std::sync::Arc;

use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::common::types::{FrameId, Page, PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::page_guard::{PageGuard, ReadPageGuard, WritePageGuard};
use crate::storage::buffer::page_table::ExtendibleHashTable;
use crate::storage::buffer::replacer::LruKReplacer;
use crate::storage::disk::DiskManager;

/// Page-table bucket size; sized so the directory stays shallow for typical
/// pool sizes.
const PAGE_TABLE_BUCKET_SIZE: usize = 8;

/// Per-frame bookkeeping, valid only under the pool latch.
struct FrameMeta {
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

impl FrameMeta {
    fn reset(&mut self) {
        self.page_id = INVALID_PAGE_ID;
        self.pin_count = 0;
        self.is_dirty = false;
    }
}

struct PoolState {
    page_table: ExtendibleHashTable<PageId, FrameId>,
    replacer: LruKReplacer,
    free_list: Vec<FrameId>,
    meta: Vec<FrameMeta>,
}

/// Manages page caching and eviction over a fixed array of frames. One mutex
/// protects all pool metadata; page contents are protected by the per-page
/// latch, which callers hold through the returned guards.
pub struct BufferPoolManager {
    pool_size: usize,
    frames: Vec<PagePtr>,
    state: Mutex<PoolState>,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    pub fn new(
        pool_size: usize,
        replacer_k: usize,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        Ok(Self::with_disk_manager(pool_size, replacer_k, disk_manager))
    }

    pub fn with_disk_manager(
        pool_size: usize,
        replacer_k: usize,
        disk_manager: Arc<DiskManager>,
    ) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut meta = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            frames.push(Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))));
            meta.push(FrameMeta {
                page_id: INVALID_PAGE_ID,
                pin_count: 0,
                is_dirty: false,
            });
        }
        // LIFO free list: the most recently freed frame is reused first.
        let free_list: Vec<FrameId> = (0..pool_size).rev().collect();

        Self {
            pool_size,
            frames,
            state: Mutex::new(PoolState {
                page_table: ExtendibleHashTable::new(PAGE_TABLE_BUCKET_SIZE),
                replacer: LruKReplacer::new(pool_size, replacer_k),
                free_list,
                meta,
            }),
            disk_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    /// Allocate a fresh page id, place it in a frame, and return a pinned
    /// handle to it. Fails with `NoFreeFrames` when every frame is pinned.
    pub fn new_page(self: &Arc<Self>) -> Result<PageGuard, BufferPoolError> {
        let mut state = self.state.lock();
        let frame_id = self.acquire_frame(&mut state)?;
        let page_id = self.disk_manager.allocate_page();

        {
            let mut page = self.frames[frame_id].write();
            page.reset();
            page.page_id = page_id;
        }
        let meta = &mut state.meta[frame_id];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;

        state.page_table.insert(page_id, frame_id);
        state.replacer.record_access(frame_id);
        state.replacer.set_evictable(frame_id, false);
        drop(state);

        Ok(PageGuard::new(
            Arc::clone(self),
            Arc::clone(&self.frames[frame_id]),
            page_id,
        ))
    }

    /// Fetch a page, reading it from disk on a miss. The returned handle
    /// holds a pin; callers latch through it before touching the bytes.
    pub fn fetch_page(self: &Arc<Self>, page_id: PageId) -> Result<PageGuard, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(
                "cannot fetch the invalid page id".to_string(),
            ));
        }

        let mut state = self.state.lock();

        if let Some(frame_id) = state.page_table.find(&page_id) {
            state.meta[frame_id].pin_count += 1;
            state.replacer.record_access(frame_id);
            state.replacer.set_evictable(frame_id, false);
            drop(state);
            return Ok(PageGuard::new(
                Arc::clone(self),
                Arc::clone(&self.frames[frame_id]),
                page_id,
            ));
        }

        let frame_id = self.acquire_frame(&mut state)?;
        {
            let mut page = self.frames[frame_id].write();
            self.disk_manager.read_page(page_id, &mut page)?;
        }
        let meta = &mut state.meta[frame_id];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;

        state.page_table.insert(page_id, frame_id);
        state.replacer.record_access(frame_id);
        state.replacer.set_evictable(frame_id, false);
        drop(state);

        Ok(PageGuard::new(
            Arc::clone(self),
            Arc::clone(&self.frames[frame_id]),
            page_id,
        ))
    }

    /// Fetch and read-latch a page in one step.
    pub fn fetch_page_read(self: &Arc<Self>, page_id: PageId) -> Result<ReadPageGuard, BufferPoolError> {
        Ok(ReadPageGuard::new(self.fetch_page(page_id)?))
    }

    /// Fetch and write-latch a page in one step.
    pub fn fetch_page_write(self: &Arc<Self>, page_id: PageId) -> Result<WritePageGuard, BufferPoolError> {
        Ok(WritePageGuard::new(self.fetch_page(page_id)?))
    }

    /// Drop one pin on the page. The dirty flag is sticky: once set by any
    /// unpin it stays set until the page is flushed or evicted. Returns
    /// false when the page is not resident or not pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut state = self.state.lock();
        let frame_id = match state.page_table.find(&page_id) {
            Some(frame_id) => frame_id,
            None => return false,
        };
        let meta = &mut state.meta[frame_id];
        if meta.pin_count == 0 {
            return false;
        }
        meta.pin_count -= 1;
        if is_dirty {
            meta.is_dirty = true;
        }
        if meta.pin_count == 0 {
            state.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Write the page out and clear its dirty flag. The page may be pinned.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        // Snapshot the frame under the pool latch, then do the I/O outside
        // it so a long-held page latch cannot stall the whole pool.
        let (frame_id, frame) = {
            let state = self.state.lock();
            match state.page_table.find(&page_id) {
                Some(frame_id) => (frame_id, Arc::clone(&self.frames[frame_id])),
                None => return Err(BufferPoolError::PageNotFound(page_id)),
            }
        };

        {
            let page = frame.read();
            self.disk_manager.write_page(page_id, &page.data)?;
        }

        let mut state = self.state.lock();
        // Only clear the dirty bit if the frame still holds this page.
        if state.page_table.find(&page_id) == Some(frame_id) {
            state.meta[frame_id].is_dirty = false;
        }
        Ok(())
    }

    /// Flush every resident page.
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let resident: Vec<PageId> = {
            let state = self.state.lock();
            state
                .meta
                .iter()
                .filter(|m| m.page_id != INVALID_PAGE_ID)
                .map(|m| m.page_id)
                .collect()
        };
        for page_id in resident {
            match self.flush_page(page_id) {
                Ok(()) | Err(BufferPoolError::PageNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Remove a page from the pool and deallocate it on disk. A page that is
    /// not resident is a no-op; a pinned page cannot be deleted.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();
        let frame_id = match state.page_table.find(&page_id) {
            Some(frame_id) => frame_id,
            None => {
                self.disk_manager.deallocate_page(page_id);
                return Ok(());
            }
        };
        if state.meta[frame_id].pin_count > 0 {
            return Err(BufferPoolError::PagePinned(page_id));
        }

        self.frames[frame_id].write().reset();
        state.meta[frame_id].reset();
        state.page_table.remove(&page_id);
        state.replacer.remove(frame_id);
        state.free_list.push(frame_id);
        self.disk_manager.deallocate_page(page_id);
        Ok(())
    }

    /// Pin count of a resident page, for tests and assertions.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.state.lock();
        let frame_id = state.page_table.find(&page_id)?;
        Some(state.meta[frame_id].pin_count)
    }

    /// Number of frames that could hold a new page right now.
    pub fn free_frame_count(&self) -> usize {
        let state = self.state.lock();
        state.free_list.len() + state.replacer.size()
    }

    /// Produce a clean, owned frame: free list first, then eviction. Dirty
    /// victims are written back before the frame is handed out.
    fn acquire_frame(&self, state: &mut PoolState) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = state.free_list.pop() {
            return Ok(frame_id);
        }

        let frame_id = state.replacer.evict().ok_or(BufferPoolError::NoFreeFrames)?;
        let meta = &mut state.meta[frame_id];
        assert_eq!(meta.pin_count, 0, "evicted a pinned frame");
        let old_page_id = meta.page_id;

        if meta.is_dirty {
            debug!("evicting dirty page {} from frame {}", old_page_id, frame_id);
            let page = self.frames[frame_id].read();
            self.disk_manager.write_page(old_page_id, &page.data)?;
        }

        state.page_table.remove(&old_page_id);
        state.meta[frame_id].reset();
        self.frames[frame_id].write().reset();
        Ok(frame_id)
    }
}
