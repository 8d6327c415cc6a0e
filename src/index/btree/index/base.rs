use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockWriteGuard};
use serde::{Deserialize, Serialize};

use crate::common::types::{PageId, Rid, HEADER_PAGE_ID, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{BTreeNode, NodeKind};
use crate::index::btree::serialization::{default_max_sizes, deserialize_node, node_kind};
use crate::storage::buffer::{BufferPoolManager, ReadPageGuard, WritePageGuard};
use crate::storage::page::header;

/// Which structural operation a descent is performing; determines latch
/// modes and the safety predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteOp {
    Insert,
    Delete,
}

/// Latches accumulated by a pessimistic descent: the root latch plus the
/// write-latched ancestor chain, oldest first. Releasing drops latches and
/// pins top-down.
pub(crate) struct LatchContext<'a> {
    pub(crate) ancestors: VecDeque<WritePageGuard>,
    pub(crate) root_latch: Option<RwLockWriteGuard<'a, PageId>>,
}

impl LatchContext<'_> {
    pub(crate) fn release_all(&mut self) {
        while let Some(guard) = self.ancestors.pop_front() {
            drop(guard);
        }
        self.root_latch = None;
    }

    /// Whether `page_id` is the tree's root. Only meaningful while the root
    /// latch is still held; once released, nothing we hold is the root.
    pub(crate) fn is_root(&self, page_id: PageId) -> bool {
        self.root_latch.as_ref().map_or(false, |root| **root == page_id)
    }
}

/// A unique, ordered index `K -> Rid` over buffer-pool pages. The root page
/// id is guarded by a dedicated root latch and persisted in the header page
/// under the index's name.
pub struct BTreeIndex<K> {
    pub(crate) name: String,
    pub(crate) buffer_pool: Arc<BufferPoolManager>,
    pub(crate) root: RwLock<PageId>,
    pub(crate) leaf_max_size: usize,
    pub(crate) internal_max_size: usize,
    pub(crate) _phantom: PhantomData<K>,
}

impl<K> BTreeIndex<K>
where
    K: Clone + Ord + Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
{
    /// Open (or create) the named index. An existing root recorded in the
    /// header page is picked up; otherwise the tree starts empty and grows
    /// its first root on insert.
    pub fn new(
        name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self, BTreeError> {
        assert!(leaf_max_size >= 2, "leaf max size too small");
        assert!(internal_max_size >= 3, "internal max size too small");
        let name = name.into();

        let root_id = {
            let header_guard = buffer_pool.fetch_page_read(HEADER_PAGE_ID)?;
            header::get_root_id(&header_guard, &name).unwrap_or(INVALID_PAGE_ID)
        };

        Ok(Self {
            name,
            buffer_pool,
            root: RwLock::new(root_id),
            leaf_max_size,
            internal_max_size,
            _phantom: PhantomData,
        })
    }

    /// Open the named index with arities derived from the page size.
    pub fn with_default_order(
        name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
    ) -> Result<Self, BTreeError> {
        let (leaf_max_size, internal_max_size) = default_max_sizes::<K>();
        Self::new(name, buffer_pool, leaf_max_size, internal_max_size)
    }

    pub fn get_root_page_id(&self) -> PageId {
        *self.root.read()
    }

    pub fn is_empty(&self) -> bool {
        *self.root.read() == INVALID_PAGE_ID
    }

    /// Point lookup. Descends with read latches hand over hand; the root
    /// latch is dropped as soon as the first page below the root is latched.
    pub fn get_value(&self, key: &K) -> Result<Option<Rid>, BTreeError> {
        let root_latch = self.root.read();
        let root_id = *root_latch;
        if root_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let mut cur = self.buffer_pool.fetch_page_read(root_id)?;
        let mut root_latch = Some(root_latch);
        loop {
            let node: BTreeNode<K> = deserialize_node(&cur)?;
            match node {
                BTreeNode::Leaf(leaf) => return Ok(leaf.lookup(key)),
                BTreeNode::Internal(internal) => {
                    let child = self.buffer_pool.fetch_page_read(internal.child_for(key))?;
                    cur = child;
                    root_latch.take();
                }
            }
        }
    }

    /// Record the root id in the header page. Callers hold the root latch.
    pub(crate) fn persist_root(&self, root_id: PageId) -> Result<(), BTreeError> {
        let mut header_guard = self.buffer_pool.fetch_page_write(HEADER_PAGE_ID)?;
        header::upsert_record(&mut header_guard, &self.name, root_id);
        Ok(())
    }

    /// Optimistic write descent: read latches down the internal levels, a
    /// write latch on the leaf only. Returns None when the tree is empty or
    /// the root is itself a leaf; the caller then descends pessimistically.
    /// The returned leaf must be re-checked for safety.
    pub(crate) fn optimistic_leaf(&self, key: &K) -> Result<Option<WritePageGuard>, BTreeError> {
        let root_latch = self.root.read();
        let root_id = *root_latch;
        if root_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let mut cur = self.buffer_pool.fetch_page_read(root_id)?;
        if node_kind(&cur)? == NodeKind::Leaf {
            return Ok(None);
        }
        let mut root_latch = Some(root_latch);

        loop {
            let node: BTreeNode<K> = deserialize_node(&cur)?;
            let child_id = node.as_internal().child_for(key);

            // Pin the child, peek its kind, then take the right latch. The
            // pin is held throughout, so the page cannot be evicted between
            // the peek and the latch.
            let child_pin = self.buffer_pool.fetch_page(child_id)?;
            let child_kind = {
                let page = child_pin.read();
                node_kind(&page)?
            };
            match child_kind {
                NodeKind::Internal => {
                    cur = ReadPageGuard::new(child_pin);
                    root_latch.take();
                }
                NodeKind::Leaf => {
                    let leaf_guard = WritePageGuard::new(child_pin);
                    // Parent read latch held until the leaf write latch is
                    // in hand, so the leaf cannot be split or merged away.
                    drop(cur);
                    root_latch.take();
                    return Ok(Some(leaf_guard));
                }
            }
        }
    }

    /// Pessimistic write descent with latch crabbing: the root latch and all
    /// page latches are taken in write mode; every time a child turns out
    /// safe for the operation, every ancestor latch is released. Returns the
    /// write-latched leaf; unsafe ancestors remain in the context.
    pub(crate) fn pessimistic_leaf<'a>(
        &'a self,
        key: &K,
        op: WriteOp,
    ) -> Result<Option<(LatchContext<'a>, WritePageGuard, BTreeNode<K>)>, BTreeError> {
        let root_latch = self.root.write();
        let root_id = *root_latch;
        if root_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let mut ctx = LatchContext {
            ancestors: VecDeque::new(),
            root_latch: Some(root_latch),
        };

        let mut cur = self.buffer_pool.fetch_page_write(root_id)?;
        let mut cur_node: BTreeNode<K> = deserialize_node(&cur)?;
        loop {
            let internal = match &cur_node {
                BTreeNode::Leaf(_) => break,
                BTreeNode::Internal(internal) => internal,
            };
            let child_id = internal.child_for(key);
            let child = self.buffer_pool.fetch_page_write(child_id)?;
            let child_node: BTreeNode<K> = deserialize_node(&child)?;

            let safe = match op {
                WriteOp::Insert => child_node.is_insert_safe(),
                WriteOp::Delete => child_node.is_delete_safe(),
            };
            if safe {
                ctx.release_all();
                drop(cur);
            } else {
                ctx.ancestors.push_back(cur);
            }
            cur = child;
            cur_node = child_node;
        }

        Ok(Some((ctx, cur, cur_node)))
    }
}
