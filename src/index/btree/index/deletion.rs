use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::common::types::PageId;
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::BTreeNode;
use crate::index::btree::serialization::{deserialize_node, serialize_node};
use crate::storage::buffer::WritePageGuard;

use super::base::{BTreeIndex, LatchContext, WriteOp};

impl<K> BTreeIndex<K>
where
    K: Clone + Ord + Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
{
    /// Remove a key. Absent keys are a no-op.
    pub fn remove(&self, key: &K) -> Result<(), BTreeError> {
        if self.is_empty() {
            return Ok(());
        }

        // Optimistic pass: write latch on the leaf only.
        if let Some(mut leaf_guard) = self.optimistic_leaf(key)? {
            let mut node: BTreeNode<K> = deserialize_node(&leaf_guard)?;
            let leaf = node.as_leaf_mut();
            if leaf.lookup(key).is_none() {
                return Ok(());
            }
            if leaf.size() > leaf.min_size() {
                leaf.remove(key);
                serialize_node(&node, &mut leaf_guard)?;
                return Ok(());
            }
        }

        self.remove_pessimistic(key)
    }

    fn remove_pessimistic(&self, key: &K) -> Result<(), BTreeError> {
        let (mut ctx, mut leaf_guard, mut leaf_node) = match self.pessimistic_leaf(key, WriteOp::Delete)? {
            Some(found) => found,
            None => return Ok(()),
        };

        if !leaf_node.as_leaf_mut().remove(key) {
            ctx.release_all();
            return Ok(());
        }

        let leaf_id = leaf_guard.page_id();
        let underfull = leaf_node.size() < leaf_node.min_size();
        // The root is exempt from the minimum; a zero-sized leaf root is the
        // empty tree.
        if ctx.is_root(leaf_id) || !underfull {
            serialize_node(&leaf_node, &mut leaf_guard)?;
            drop(leaf_guard);
            ctx.release_all();
            return Ok(());
        }

        self.rebalance_leaf(&mut ctx, leaf_guard, leaf_node)
    }

    /// Fix an underfull leaf: merge with a sibling when the pair fits in one
    /// page, otherwise borrow one entry through the parent separator. The
    /// neighbor is the right sibling when one exists, else the left.
    fn rebalance_leaf(
        &self,
        ctx: &mut LatchContext<'_>,
        mut leaf_guard: WritePageGuard,
        mut leaf_node: BTreeNode<K>,
    ) -> Result<(), BTreeError> {
        let leaf_id = leaf_guard.page_id();

        let parent_guard = ctx
            .ancestors
            .back_mut()
            .expect("parent retained for an underfull leaf");
        let mut parent_node: BTreeNode<K> = deserialize_node(parent_guard)?;
        let parent = parent_node.as_internal_mut();
        let pos = parent.position_of(leaf_id).expect("leaf missing from its parent");
        let sib_pos = if pos + 1 < parent.size() { pos + 1 } else { pos - 1 };
        let sib_id = parent.children[sib_pos];

        let mut sib_guard = self.buffer_pool.fetch_page_write(sib_id)?;
        let mut sib_node: BTreeNode<K> = deserialize_node(&sib_guard)?;

        let max_size = leaf_node.max_size();
        if leaf_node.size() + sib_node.size() < max_size {
            // Merge into the left page of the pair; the right page dies and
            // its entry comes out of the parent.
            debug!("merging leaf {} with sibling {}", leaf_id, sib_id);
            let right_id = if sib_pos > pos {
                leaf_node.as_leaf_mut().merge_from_right(sib_node.as_leaf_mut());
                serialize_node(&leaf_node, &mut leaf_guard)?;
                sib_id
            } else {
                sib_node.as_leaf_mut().merge_from_right(leaf_node.as_leaf_mut());
                serialize_node(&sib_node, &mut sib_guard)?;
                leaf_id
            };
            drop(leaf_guard);
            drop(sib_guard);
            if let Err(e) = self.buffer_pool.delete_page(right_id) {
                warn!("merged page {} not deleted: {}", right_id, e);
            }
            return self.delete_from_parent(ctx, right_id);
        }

        // Redistribute one entry; the parent separator tracks the boundary.
        let leaf = leaf_node.as_leaf_mut();
        let sib = sib_node.as_leaf_mut();
        if sib_pos < pos {
            let key = sib.keys.pop().expect("redistribution from an empty sibling");
            let rid = sib.rids.pop().expect("redistribution from an empty sibling");
            leaf.keys.insert(0, key.clone());
            leaf.rids.insert(0, rid);
            parent.keys[pos - 1] = key;
        } else {
            let key = sib.keys.remove(0);
            let rid = sib.rids.remove(0);
            leaf.keys.push(key);
            leaf.rids.push(rid);
            parent.keys[pos] = sib.keys[0].clone();
        }

        serialize_node(&leaf_node, &mut leaf_guard)?;
        serialize_node(&sib_node, &mut sib_guard)?;
        let parent_guard = ctx
            .ancestors
            .back_mut()
            .expect("parent retained for an underfull leaf");
        serialize_node(&parent_node, parent_guard)?;
        drop(leaf_guard);
        drop(sib_guard);
        ctx.release_all();
        Ok(())
    }

    /// Remove `deleted`'s entry from its parent, rebalancing internal pages
    /// upward. A root left with a single child collapses into that child.
    fn delete_from_parent(
        &self,
        ctx: &mut LatchContext<'_>,
        deleted_child_id: PageId,
    ) -> Result<(), BTreeError> {
        let mut deleted = deleted_child_id;

        loop {
            let mut cur_guard = ctx
                .ancestors
                .pop_back()
                .expect("ancestor retained for a structural delete");
            let cur_id = cur_guard.page_id();
            let mut cur_node: BTreeNode<K> = deserialize_node(&cur_guard)?;
            {
                let internal = cur_node.as_internal_mut();
                let pos = internal
                    .position_of(deleted)
                    .expect("deleted child missing from its parent");
                internal.remove_child_at(pos);
            }

            if ctx.is_root(cur_id) {
                if cur_node.size() == 1 {
                    // The root holds a lone child pointer: promote the child.
                    let new_root_id = cur_node.as_internal().children[0];
                    {
                        let root_latch = ctx
                            .root_latch
                            .as_mut()
                            .expect("root latch must be held to collapse the root");
                        **root_latch = new_root_id;
                    }
                    self.persist_root(new_root_id)?;
                    debug!("root {} collapsed into {}", cur_id, new_root_id);
                    drop(cur_guard);
                    if let Err(e) = self.buffer_pool.delete_page(cur_id) {
                        warn!("old root {} not deleted: {}", cur_id, e);
                    }
                    ctx.root_latch = None;
                    return Ok(());
                }
                serialize_node(&cur_node, &mut cur_guard)?;
                drop(cur_guard);
                ctx.release_all();
                return Ok(());
            }

            if cur_node.size() >= cur_node.min_size() {
                serialize_node(&cur_node, &mut cur_guard)?;
                drop(cur_guard);
                ctx.release_all();
                return Ok(());
            }

            // Internal underflow: merge or borrow through the grandparent.
            let parent_guard = ctx
                .ancestors
                .back_mut()
                .expect("grandparent retained for an underfull internal");
            let mut parent_node: BTreeNode<K> = deserialize_node(parent_guard)?;
            let parent = parent_node.as_internal_mut();
            let pos = parent
                .position_of(cur_id)
                .expect("internal page missing from its parent");
            let sib_pos = if pos + 1 < parent.size() { pos + 1 } else { pos - 1 };
            let sib_id = parent.children[sib_pos];

            let mut sib_guard = self.buffer_pool.fetch_page_write(sib_id)?;
            let mut sib_node: BTreeNode<K> = deserialize_node(&sib_guard)?;

            let max_size = cur_node.max_size();
            if cur_node.size() + sib_node.size() <= max_size {
                debug!("merging internal {} with sibling {}", cur_id, sib_id);
                let right_id = if sib_pos > pos {
                    let separator = parent.keys[sib_pos - 1].clone();
                    cur_node
                        .as_internal_mut()
                        .merge_from_right(separator, sib_node.as_internal_mut());
                    serialize_node(&cur_node, &mut cur_guard)?;
                    sib_id
                } else {
                    let separator = parent.keys[pos - 1].clone();
                    sib_node
                        .as_internal_mut()
                        .merge_from_right(separator, cur_node.as_internal_mut());
                    serialize_node(&sib_node, &mut sib_guard)?;
                    cur_id
                };
                drop(cur_guard);
                drop(sib_guard);
                if let Err(e) = self.buffer_pool.delete_page(right_id) {
                    warn!("merged page {} not deleted: {}", right_id, e);
                }
                deleted = right_id;
                continue;
            }

            // Borrow one child through the separator.
            let cur_int = cur_node.as_internal_mut();
            let sib_int = sib_node.as_internal_mut();
            if sib_pos < pos {
                let moved_child = sib_int.children.pop().expect("redistribution from an empty sibling");
                let moved_key = sib_int.keys.pop().expect("redistribution from an empty sibling");
                cur_int.children.insert(0, moved_child);
                cur_int.keys.insert(0, parent.keys[pos - 1].clone());
                parent.keys[pos - 1] = moved_key;
            } else {
                let moved_child = sib_int.children.remove(0);
                let moved_key = sib_int.keys.remove(0);
                cur_int.children.push(moved_child);
                cur_int.keys.push(parent.keys[pos].clone());
                parent.keys[pos] = moved_key;
            }

            serialize_node(&cur_node, &mut cur_guard)?;
            serialize_node(&sib_node, &mut sib_guard)?;
            let parent_guard = ctx
                .ancestors
                .back_mut()
                .expect("grandparent retained for an underfull internal");
            serialize_node(&parent_node, parent_guard)?;
            drop(cur_guard);
            drop(sib_guard);
            ctx.release_all();
            return Ok(());
        }
    }
}
