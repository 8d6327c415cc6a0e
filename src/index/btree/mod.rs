pub mod error;
pub mod index;
pub mod node;
pub mod serialization;

pub use error::BTreeError;
pub use index::{BTreeIndex, BTreeIterator};
pub use node::BTreeNode;
pub use serialization::{default_max_sizes, deserialize_node, serialize_node};
