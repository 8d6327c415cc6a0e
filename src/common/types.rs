use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type
pub type PageId = u32;

/// Sentinel for "no page". Never allocated.
pub const INVALID_PAGE_ID: PageId = u32::MAX;

/// The header page lives at a fixed position in the database file.
pub const HEADER_PAGE_ID: PageId = 0;

/// Buffer pool frame index type
pub type FrameId = usize;

/// Transaction ID type
pub type TxnId = u32;

/// Sentinel for "no transaction".
pub const INVALID_TXN_ID: TxnId = u32::MAX;

/// Table OID type
pub type TableOid = u32;

/// Record identifier: a page and a slot within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.page_id, self.slot)
    }
}

/// A fixed-size page of raw bytes. Pin counts and dirty flags are tracked by
/// the buffer pool, not here; this struct is what the per-page latch guards.
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            data: [0; PAGE_SIZE],
            page_id,
        }
    }

    /// Zero the contents and detach the page from any page id.
    pub fn reset(&mut self) {
        self.data.fill(0);
        self.page_id = INVALID_PAGE_ID;
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page").field("page_id", &self.page_id).finish()
    }
}

/// Smart pointer to a latched page
pub type PagePtr = Arc<RwLock<Page>>;
