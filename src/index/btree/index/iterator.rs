use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::common::types::{Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{BTreeNode, LeafNode};
use crate::index::btree::serialization::deserialize_node;
use crate::storage::buffer::{BufferPoolManager, ReadPageGuard};

use super::base::BTreeIndex;

/// Forward scan over the leaf chain. Holds a read latch (and pin) on exactly
/// one leaf at a time; advancing past a page releases it before the next one
/// is fetched, so writers to its left are never blocked behind a scan.
pub struct BTreeIterator<K> {
    buffer_pool: Arc<BufferPoolManager>,
    // The latched page together with its decoded image; the latch keeps the
    // two consistent.
    current: Option<(ReadPageGuard, LeafNode<K>)>,
    pos: usize,
}

impl<K> BTreeIterator<K>
where
    K: Clone + Ord + Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
{
    pub(crate) fn new(
        buffer_pool: Arc<BufferPoolManager>,
        current: Option<(ReadPageGuard, LeafNode<K>)>,
        pos: usize,
    ) -> Self {
        Self {
            buffer_pool,
            current,
            pos,
        }
    }

    /// The exhausted sentinel.
    pub(crate) fn end_sentinel(buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self::new(buffer_pool, None, 0)
    }

    pub fn is_end(&self) -> bool {
        self.current.is_none()
    }
}

impl<K> Iterator for BTreeIterator<K>
where
    K: Clone + Ord + Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
{
    type Item = (K, Rid);

    fn next(&mut self) -> Option<(K, Rid)> {
        loop {
            let (_, leaf) = self.current.as_ref()?;
            if self.pos < leaf.size() {
                let item = (leaf.keys[self.pos].clone(), leaf.rids[self.pos]);
                self.pos += 1;
                return Some(item);
            }

            let next_id = leaf.next_leaf;
            // Release the exhausted page before touching its successor.
            self.current = None;
            if next_id == INVALID_PAGE_ID {
                return None;
            }
            let guard = self
                .buffer_pool
                .fetch_page_read(next_id)
                .expect("leaf chain page must be fetchable");
            let node: BTreeNode<K> =
                deserialize_node(&guard).expect("leaf chain page must decode");
            self.current = Some((guard, node.into_leaf()));
            self.pos = 0;
        }
    }
}

impl<K> BTreeIndex<K>
where
    K: Clone + Ord + Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
{
    /// Iterator positioned at the smallest key.
    pub fn begin(&self) -> Result<BTreeIterator<K>, BTreeError> {
        let root_latch = self.root.read();
        let root_id = *root_latch;
        if root_id == INVALID_PAGE_ID {
            return Ok(BTreeIterator::end_sentinel(Arc::clone(&self.buffer_pool)));
        }

        let mut cur = self.buffer_pool.fetch_page_read(root_id)?;
        let mut root_latch = Some(root_latch);
        loop {
            let node: BTreeNode<K> = deserialize_node(&cur)?;
            match node {
                BTreeNode::Leaf(leaf) => {
                    if leaf.size() == 0 {
                        // A zero-sized root leaf is the empty tree.
                        return Ok(BTreeIterator::end_sentinel(Arc::clone(&self.buffer_pool)));
                    }
                    return Ok(BTreeIterator::new(
                        Arc::clone(&self.buffer_pool),
                        Some((cur, leaf)),
                        0,
                    ));
                }
                BTreeNode::Internal(internal) => {
                    let child = self.buffer_pool.fetch_page_read(internal.children[0])?;
                    cur = child;
                    root_latch.take();
                }
            }
        }
    }

    /// Iterator positioned at the first key >= `key`.
    pub fn begin_at(&self, key: &K) -> Result<BTreeIterator<K>, BTreeError> {
        let root_latch = self.root.read();
        let root_id = *root_latch;
        if root_id == INVALID_PAGE_ID {
            return Ok(BTreeIterator::end_sentinel(Arc::clone(&self.buffer_pool)));
        }

        let mut cur = self.buffer_pool.fetch_page_read(root_id)?;
        let mut root_latch = Some(root_latch);
        loop {
            let node: BTreeNode<K> = deserialize_node(&cur)?;
            match node {
                BTreeNode::Leaf(leaf) => {
                    let pos = leaf.lower_bound(key);
                    return Ok(BTreeIterator::new(
                        Arc::clone(&self.buffer_pool),
                        Some((cur, leaf)),
                        pos,
                    ));
                }
                BTreeNode::Internal(internal) => {
                    let child = self.buffer_pool.fetch_page_read(internal.child_for(key))?;
                    cur = child;
                    root_latch.take();
                }
            }
        }
    }

    /// The end sentinel, for symmetry with `begin`.
    pub fn end(&self) -> BTreeIterator<K> {
        BTreeIterator::end_sentinel(Arc::clone(&self.buffer_pool))
    }
}
