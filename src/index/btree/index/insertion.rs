use log::debug;
use serde::{Deserialize, Serialize};

use crate::common::types::{PageId, Rid};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{BTreeNode, InternalNode, LeafNode};
use crate::index::btree::serialization::{deserialize_node, serialize_node};

use super::base::{BTreeIndex, LatchContext, WriteOp};

impl<K> BTreeIndex<K>
where
    K: Clone + Ord + Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
{
    /// Insert a key/rid pair. Returns false (leaving the tree unchanged)
    /// when the key is already present; this is a unique index.
    pub fn insert(&self, key: K, rid: Rid) -> Result<bool, BTreeError> {
        if self.is_empty() {
            let mut root_latch = self.root.write();
            // Re-check: another writer may have planted the root meanwhile.
            if *root_latch == crate::common::types::INVALID_PAGE_ID {
                let root_guard = self.buffer_pool.new_page()?;
                let mut leaf = LeafNode::new(self.leaf_max_size);
                leaf.insert(key, rid);
                {
                    let mut page = root_guard.write();
                    serialize_node(&BTreeNode::Leaf(leaf), &mut page)?;
                }
                *root_latch = root_guard.page_id();
                self.persist_root(*root_latch)?;
                return Ok(true);
            }
            drop(root_latch);
        }

        // Optimistic pass: write latch on the leaf only. Falls back when the
        // leaf could split.
        if let Some(mut leaf_guard) = self.optimistic_leaf(&key)? {
            let mut node: BTreeNode<K> = deserialize_node(&leaf_guard)?;
            let leaf = node.as_leaf_mut();
            if leaf.lookup(&key).is_some() {
                return Ok(false);
            }
            if leaf.size() + 1 < leaf.max_size {
                leaf.insert(key, rid);
                serialize_node(&node, &mut leaf_guard)?;
                return Ok(true);
            }
        }

        self.insert_pessimistic(key, rid)
    }

    fn insert_pessimistic(&self, key: K, rid: Rid) -> Result<bool, BTreeError> {
        let (mut ctx, mut leaf_guard, mut leaf_node) = match self.pessimistic_leaf(&key, WriteOp::Insert)? {
            Some(found) => found,
            // The tree emptied between our attempts; start over.
            None => return self.insert(key, rid),
        };

        let leaf = leaf_node.as_leaf_mut();
        if leaf.lookup(&key).is_some() {
            ctx.release_all();
            return Ok(false);
        }
        leaf.insert(key, rid);

        if leaf.size() < leaf.max_size {
            serialize_node(&leaf_node, &mut leaf_guard)?;
            ctx.release_all();
            return Ok(true);
        }

        // The leaf is full: split it and push the separator upward.
        let (split_key, right) = leaf.split();
        let right_guard = self.buffer_pool.new_page()?;
        let right_id = right_guard.page_id();
        leaf_node.as_leaf_mut().next_leaf = right_id;
        {
            let mut page = right_guard.write();
            serialize_node(&BTreeNode::Leaf(right), &mut page)?;
        }
        drop(right_guard);

        let left_id = leaf_guard.page_id();
        debug!("splitting leaf {} into {} at size {}", left_id, right_id, self.leaf_max_size);
        serialize_node(&leaf_node, &mut leaf_guard)?;
        drop(leaf_guard);

        self.insert_in_parent(&mut ctx, split_key, left_id, right_id)?;
        Ok(true)
    }

    /// Propagate a split: insert `key` (separating `left_id` from
    /// `right_id`) into the parent, splitting internal pages as needed.
    /// Splitting the root grows the tree by one level under the root latch.
    fn insert_in_parent(
        &self,
        ctx: &mut LatchContext<'_>,
        key: K,
        left_id: PageId,
        right_id: PageId,
    ) -> Result<(), BTreeError> {
        let mut key = key;
        let mut left_id = left_id;
        let mut right_id = right_id;

        loop {
            let mut parent_guard = match ctx.ancestors.pop_back() {
                Some(guard) => guard,
                None => {
                    // The split page was the root: grow a new root above it.
                    let root_guard = self.buffer_pool.new_page()?;
                    let new_root_id = root_guard.page_id();
                    let mut new_root = InternalNode::new(self.internal_max_size);
                    new_root.children.push(left_id);
                    new_root.keys.push(key);
                    new_root.children.push(right_id);
                    {
                        let mut page = root_guard.write();
                        serialize_node(&BTreeNode::Internal(new_root), &mut page)?;
                    }
                    drop(root_guard);

                    let root_latch = ctx
                        .root_latch
                        .as_mut()
                        .expect("root latch must be held when the root splits");
                    **root_latch = new_root_id;
                    self.persist_root(new_root_id)?;
                    debug!("tree grew a level; new root {}", new_root_id);
                    ctx.root_latch = None;
                    return Ok(());
                }
            };

            let mut parent_node: BTreeNode<K> = deserialize_node(&parent_guard)?;
            let internal = parent_node.as_internal_mut();
            internal.insert_child(key, right_id);

            if internal.size() <= internal.max_size {
                serialize_node(&parent_node, &mut parent_guard)?;
                drop(parent_guard);
                ctx.release_all();
                return Ok(());
            }

            // Parent overflows too: split it and continue upward.
            let (promoted, right_node) = internal.split();
            let right_guard = self.buffer_pool.new_page()?;
            let new_right_id = right_guard.page_id();
            {
                let mut page = right_guard.write();
                serialize_node(&BTreeNode::Internal(right_node), &mut page)?;
            }
            drop(right_guard);

            let parent_id = parent_guard.page_id();
            debug!("splitting internal {} into {}", parent_id, new_right_id);
            serialize_node(&parent_node, &mut parent_guard)?;
            drop(parent_guard);

            key = promoted;
            left_id = parent_id;
            right_id = new_right_id;
        }
    }
}
