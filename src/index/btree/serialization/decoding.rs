use byteorder::{ByteOrder, LittleEndian};
use serde::de::DeserializeOwned;

use crate::common::types::{Page, PAGE_SIZE};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{BTreeNode, InternalNode, LeafNode, NodeKind};

use super::{HEADER_SIZE, NODE_TYPE_INTERNAL, NODE_TYPE_LEAF};

/// Peek at the page-type discriminant without decoding the node.
pub fn node_kind(page: &Page) -> Result<NodeKind, BTreeError> {
    match page.data[0] {
        NODE_TYPE_LEAF => Ok(NodeKind::Leaf),
        NODE_TYPE_INTERNAL => Ok(NodeKind::Internal),
        _ => Err(BTreeError::InvalidPageFormat),
    }
}

/// Deserialize a page into the node variant its discriminant names.
pub fn deserialize_node<K>(page: &Page) -> Result<BTreeNode<K>, BTreeError>
where
    K: DeserializeOwned + Clone + Ord,
{
    let kind = node_kind(page)?;
    let size = LittleEndian::read_u16(&page.data[1..3]) as usize;
    let max_size = LittleEndian::read_u16(&page.data[3..5]) as usize;
    let next_leaf = LittleEndian::read_u32(&page.data[5..9]);

    match kind {
        NodeKind::Leaf => {
            let mut leaf = LeafNode::new(max_size);
            leaf.next_leaf = next_leaf;

            let mut offset = HEADER_SIZE;
            for _ in 0..size {
                let (key, next) = read_key::<K>(page, offset)?;
                leaf.keys.push(key);
                offset = next;
            }
            for _ in 0..size {
                if offset + 8 > PAGE_SIZE {
                    return Err(BTreeError::InvalidPageFormat);
                }
                let page_id = LittleEndian::read_u32(&page.data[offset..offset + 4]);
                let slot = LittleEndian::read_u32(&page.data[offset + 4..offset + 8]);
                leaf.rids.push(crate::common::types::Rid::new(page_id, slot));
                offset += 8;
            }
            Ok(BTreeNode::Leaf(leaf))
        }
        NodeKind::Internal => {
            let mut internal = InternalNode::new(max_size);

            let mut offset = HEADER_SIZE;
            for _ in 0..size.saturating_sub(1) {
                let (key, next) = read_key::<K>(page, offset)?;
                internal.keys.push(key);
                offset = next;
            }
            for _ in 0..size {
                if offset + 4 > PAGE_SIZE {
                    return Err(BTreeError::InvalidPageFormat);
                }
                internal
                    .children
                    .push(LittleEndian::read_u32(&page.data[offset..offset + 4]));
                offset += 4;
            }
            Ok(BTreeNode::Internal(internal))
        }
    }
}

/// Read one length-prefixed bincode key, returning it and the next offset.
fn read_key<K: DeserializeOwned>(page: &Page, offset: usize) -> Result<(K, usize), BTreeError> {
    if offset + 2 > PAGE_SIZE {
        return Err(BTreeError::InvalidPageFormat);
    }
    let len = LittleEndian::read_u16(&page.data[offset..offset + 2]) as usize;
    if offset + 2 + len > PAGE_SIZE {
        return Err(BTreeError::InvalidPageFormat);
    }
    let key = bincode::deserialize(&page.data[offset + 2..offset + 2 + len])
        .map_err(|e| BTreeError::DeserializationError(e.to_string()))?;
    Ok((key, offset + 2 + len))
}
