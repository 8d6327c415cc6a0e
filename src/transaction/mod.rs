pub mod concurrency;

use thiserror::Error;

use crate::common::types::TxnId;

/// Why a transaction was aborted by the lock manager. The display form is
/// the code reported up to the executors.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    #[error("LOCK_ON_SHRINKING")]
    LockOnShrinking,

    #[error("LOCK_SHARED_ON_READ_UNCOMMITTED")]
    LockSharedOnReadUncommitted,

    #[error("UPGRADE_CONFLICT")]
    UpgradeConflict,

    #[error("INCOMPATIBLE_UPGRADE")]
    IncompatibleUpgrade,

    #[error("ATTEMPTED_INTENTION_LOCK_ON_ROW")]
    AttemptedIntentionLockOnRow,

    #[error("TABLE_LOCK_NOT_PRESENT")]
    TableLockNotPresent,

    #[error("ATTEMPTED_UNLOCK_BUT_NO_LOCK_HELD")]
    AttemptedUnlockButNoLockHeld,

    #[error("TABLE_UNLOCKED_BEFORE_UNLOCKING_ROWS")]
    TableUnlockedBeforeUnlockingRows,
}

/// Raised when a lock request violates the locking protocol. The offending
/// transaction has already been moved to the ABORTED state when this
/// surfaces.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("transaction {txn_id} aborted: {reason}")]
pub struct TransactionAbort {
    pub txn_id: TxnId,
    pub reason: AbortReason,
}

pub use concurrency::lock_manager::{LockManager, LockManagerConfig, LockMode};
pub use concurrency::transaction::{IsolationLevel, Transaction, TransactionState};
