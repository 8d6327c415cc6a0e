// Represents an active transaction as the lock manager sees it: an id, an
// isolation level, the 2PL phase, and the sets of locks currently held.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use crate::common::types::{Rid, TableOid, TxnId};

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// 2PL transaction states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Locks held by a transaction, maintained by the lock manager under the
/// owning queue's latch.
#[derive(Default)]
pub struct LockSets {
    pub shared_table: HashSet<TableOid>,
    pub exclusive_table: HashSet<TableOid>,
    pub intention_shared_table: HashSet<TableOid>,
    pub intention_exclusive_table: HashSet<TableOid>,
    pub shared_intention_exclusive_table: HashSet<TableOid>,
    pub shared_rows: HashMap<TableOid, HashSet<Rid>>,
    pub exclusive_rows: HashMap<TableOid, HashSet<Rid>>,
}

impl LockSets {
    /// Whether the transaction holds any table lock on `oid`.
    pub fn holds_any_table_lock(&self, oid: TableOid) -> bool {
        self.shared_table.contains(&oid)
            || self.exclusive_table.contains(&oid)
            || self.intention_shared_table.contains(&oid)
            || self.intention_exclusive_table.contains(&oid)
            || self.shared_intention_exclusive_table.contains(&oid)
    }

    /// Whether the transaction holds a table lock on `oid` strong enough to
    /// cover exclusive row locks (X, IX or SIX).
    pub fn holds_exclusive_capable_table_lock(&self, oid: TableOid) -> bool {
        self.exclusive_table.contains(&oid)
            || self.intention_exclusive_table.contains(&oid)
            || self.shared_intention_exclusive_table.contains(&oid)
    }

    /// Whether any row of `oid` is still locked.
    pub fn holds_row_locks_on(&self, oid: TableOid) -> bool {
        self.shared_rows.get(&oid).map_or(false, |rows| !rows.is_empty())
            || self.exclusive_rows.get(&oid).map_or(false, |rows| !rows.is_empty())
    }
}

pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: Mutex<TransactionState>,
    lock_sets: Mutex<LockSets>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: Mutex::new(TransactionState::Growing),
            lock_sets: Mutex::new(LockSets::default()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    pub fn commit(&self) {
        *self.state.lock() = TransactionState::Committed;
    }

    pub fn abort(&self) {
        *self.state.lock() = TransactionState::Aborted;
    }

    /// Run `f` with the lock sets. Used by the lock manager while holding
    /// the relevant queue latch, and by tests to inspect held locks.
    pub fn with_lock_sets<R>(&self, f: impl FnOnce(&mut LockSets) -> R) -> R {
        f(&mut self.lock_sets.lock())
    }
}
