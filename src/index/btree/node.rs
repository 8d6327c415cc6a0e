mod base;

pub use base::{BTreeNode, InternalNode, LeafNode, NodeKind};
