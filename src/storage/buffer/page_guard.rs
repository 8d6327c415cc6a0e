//! Pinned RAII handles to buffer-pool pages.
//!
//! A `PageGuard` holds a pin only; callers latch the page explicitly through
//! `read()`/`write()`. `ReadPageGuard` and `WritePageGuard` additionally hold
//! the page latch for their whole lifetime, which is what the B+ tree's latch
//! crabbing stores in its ancestor queue. Dropping any guard releases the
//! latch (if held) before the pin, in that order.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::types::{Page, PageId, PagePtr};
use crate::storage::buffer::manager::BufferPoolManager;

/// A pinned, unlatched handle. The pin is released on drop; the page is
/// reported dirty iff `write()` or `mark_dirty()` was called.
pub struct PageGuard {
    bpm: Arc<BufferPoolManager>,
    page: PagePtr,
    page_id: PageId,
    dirty: AtomicBool,
}

impl PageGuard {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page: PagePtr, page_id: PageId) -> Self {
        Self {
            bpm,
            page,
            page_id,
            dirty: AtomicBool::new(false),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Acquire the page's read latch for the returned guard's lifetime.
    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.page.read()
    }

    /// Acquire the page's write latch; the page will be unpinned dirty.
    pub fn write(&self) -> RwLockWriteGuard<'_, Page> {
        self.dirty.store(true, Ordering::Relaxed);
        self.page.write()
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Relaxed);
    }

    fn page_ptr(&self) -> &PagePtr {
        &self.page
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        self.bpm.unpin_page(self.page_id, self.dirty.load(Ordering::Relaxed));
    }
}

/// A pinned handle holding the page's read latch.
pub struct ReadPageGuard {
    // Field order matters: the latch drops before the pin.
    latch: Option<ArcRwLockReadGuard<RawRwLock, Page>>,
    pin: PageGuard,
}

impl ReadPageGuard {
    pub(crate) fn new(pin: PageGuard) -> Self {
        let latch = pin.page_ptr().read_arc();
        Self {
            latch: Some(latch),
            pin,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.pin.page_id()
    }
}

impl Deref for ReadPageGuard {
    type Target = Page;

    fn deref(&self) -> &Page {
        self.latch.as_ref().expect("latch held for guard lifetime")
    }
}

/// A pinned handle holding the page's write latch. Unpins dirty.
pub struct WritePageGuard {
    latch: Option<ArcRwLockWriteGuard<RawRwLock, Page>>,
    pin: PageGuard,
}

impl WritePageGuard {
    pub(crate) fn new(pin: PageGuard) -> Self {
        pin.mark_dirty();
        let latch = pin.page_ptr().write_arc();
        Self {
            latch: Some(latch),
            pin,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.pin.page_id()
    }
}

impl Deref for WritePageGuard {
    type Target = Page;

    fn deref(&self) -> &Page {
        self.latch.as_ref().expect("latch held for guard lifetime")
    }
}

impl DerefMut for WritePageGuard {
    fn deref_mut(&mut self) -> &mut Page {
        self.latch.as_mut().expect("latch held for guard lifetime")
    }
}
