use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

use crate::common::types::{Page, INVALID_PAGE_ID, PAGE_SIZE};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::BTreeNode;

use super::{HEADER_SIZE, NODE_TYPE_INTERNAL, NODE_TYPE_LEAF};

/// Serialize a node into a page, replacing its previous contents.
pub fn serialize_node<K>(node: &BTreeNode<K>, page: &mut Page) -> Result<(), BTreeError>
where
    K: Serialize + Clone + Ord,
{
    page.data.fill(0);

    match node {
        BTreeNode::Leaf(leaf) => {
            page.data[0] = NODE_TYPE_LEAF;
            LittleEndian::write_u16(&mut page.data[1..3], leaf.size() as u16);
            LittleEndian::write_u16(&mut page.data[3..5], leaf.max_size as u16);
            LittleEndian::write_u32(&mut page.data[5..9], leaf.next_leaf);

            let mut offset = HEADER_SIZE;
            for key in &leaf.keys {
                offset = write_key(page, offset, key)?;
            }
            for rid in &leaf.rids {
                if offset + 8 > PAGE_SIZE {
                    return Err(BTreeError::NodeTooLarge);
                }
                LittleEndian::write_u32(&mut page.data[offset..offset + 4], rid.page_id);
                LittleEndian::write_u32(&mut page.data[offset + 4..offset + 8], rid.slot);
                offset += 8;
            }
        }
        BTreeNode::Internal(internal) => {
            page.data[0] = NODE_TYPE_INTERNAL;
            LittleEndian::write_u16(&mut page.data[1..3], internal.size() as u16);
            LittleEndian::write_u16(&mut page.data[3..5], internal.max_size as u16);
            LittleEndian::write_u32(&mut page.data[5..9], INVALID_PAGE_ID);

            let mut offset = HEADER_SIZE;
            for key in &internal.keys {
                offset = write_key(page, offset, key)?;
            }
            for child in &internal.children {
                if offset + 4 > PAGE_SIZE {
                    return Err(BTreeError::NodeTooLarge);
                }
                LittleEndian::write_u32(&mut page.data[offset..offset + 4], *child);
                offset += 4;
            }
        }
    }

    Ok(())
}

/// Write one length-prefixed bincode key, returning the next offset.
fn write_key<K: Serialize>(page: &mut Page, offset: usize, key: &K) -> Result<usize, BTreeError> {
    let bytes = bincode::serialize(key)
        .map_err(|e| BTreeError::SerializationError(e.to_string()))?;
    if offset + 2 + bytes.len() > PAGE_SIZE {
        return Err(BTreeError::NodeTooLarge);
    }
    LittleEndian::write_u16(&mut page.data[offset..offset + 2], bytes.len() as u16);
    page.data[offset + 2..offset + 2 + bytes.len()].copy_from_slice(&bytes);
    Ok(offset + 2 + bytes.len())
}
