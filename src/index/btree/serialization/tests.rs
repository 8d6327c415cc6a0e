use super::{deserialize_node, node_kind, serialize_node};
use crate::common::types::{Page, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{BTreeNode, InternalNode, LeafNode, NodeKind};

#[test]
fn test_leaf_codec() {
    let mut leaf: LeafNode<i32> = LeafNode::new(16);
    leaf.insert(3, Rid::new(1, 30));
    leaf.insert(1, Rid::new(1, 10));
    leaf.insert(2, Rid::new(1, 20));
    leaf.next_leaf = 42;

    let mut page = Page::new(5);
    serialize_node(&BTreeNode::Leaf(leaf), &mut page).unwrap();
    assert_eq!(node_kind(&page).unwrap(), NodeKind::Leaf);

    let decoded: BTreeNode<i32> = deserialize_node(&page).unwrap();
    let leaf = decoded.as_leaf();
    assert_eq!(leaf.keys, vec![1, 2, 3]);
    assert_eq!(leaf.rids[0], Rid::new(1, 10));
    assert_eq!(leaf.next_leaf, 42);
    assert_eq!(leaf.max_size, 16);
}

#[test]
fn test_internal_codec() {
    let mut internal: InternalNode<i32> = InternalNode::new(8);
    internal.children = vec![10, 20, 30];
    internal.keys = vec![100, 200];

    let mut page = Page::new(6);
    serialize_node(&BTreeNode::Internal(internal), &mut page).unwrap();
    assert_eq!(node_kind(&page).unwrap(), NodeKind::Internal);

    let decoded: BTreeNode<i32> = deserialize_node(&page).unwrap();
    let internal = decoded.as_internal();
    assert_eq!(internal.children, vec![10, 20, 30]);
    assert_eq!(internal.keys, vec![100, 200]);
}

#[test]
fn test_string_keys() {
    let mut leaf: LeafNode<String> = LeafNode::new(8);
    leaf.insert("walnut".to_string(), Rid::new(2, 1));
    leaf.insert("apple".to_string(), Rid::new(2, 2));

    let mut page = Page::new(7);
    serialize_node(&BTreeNode::Leaf(leaf), &mut page).unwrap();
    let decoded: BTreeNode<String> = deserialize_node(&page).unwrap();
    assert_eq!(decoded.as_leaf().keys, vec!["apple", "walnut"]);
}

#[test]
fn test_empty_leaf_roundtrip() {
    let leaf: LeafNode<i32> = LeafNode::new(4);
    let mut page = Page::new(8);
    serialize_node(&BTreeNode::Leaf(leaf), &mut page).unwrap();

    let decoded: BTreeNode<i32> = deserialize_node(&page).unwrap();
    assert_eq!(decoded.size(), 0);
    assert_eq!(decoded.as_leaf().next_leaf, INVALID_PAGE_ID);
}

#[test]
fn test_unformatted_page_rejected() {
    let page = Page::new(9);
    assert!(matches!(
        deserialize_node::<i32>(&page),
        Err(BTreeError::InvalidPageFormat)
    ));
}

#[test]
fn test_oversized_node_rejected() {
    let mut leaf: LeafNode<String> = LeafNode::new(4096);
    let big = "x".repeat(512);
    for i in 0..16 {
        leaf.insert(format!("{}{}", big, i), Rid::new(0, i));
    }
    let mut page = Page::new(10);
    assert!(matches!(
        serialize_node(&BTreeNode::Leaf(leaf), &mut page),
        Err(BTreeError::NodeTooLarge)
    ));
}
