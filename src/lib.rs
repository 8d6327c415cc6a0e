// Export public modules
pub mod common;
pub mod index;
pub mod storage;
pub mod transaction;

// Re-export key items for convenient access
pub use index::btree::{BTreeError, BTreeIndex, BTreeIterator};
pub use storage::buffer::{BufferPoolError, BufferPoolManager};
pub use storage::disk::DiskManager;
pub use transaction::{
    AbortReason, IsolationLevel, LockManager, LockManagerConfig, LockMode, Transaction,
    TransactionAbort, TransactionState,
};
