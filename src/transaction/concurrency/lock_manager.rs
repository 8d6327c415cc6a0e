use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info};
use parking_lot::{Condvar, Mutex};

use crate::common::types::{Rid, TableOid, TxnId, INVALID_TXN_ID};
use crate::transaction::concurrency::transaction::{
    IsolationLevel, LockSets, Transaction, TransactionState,
};
use crate::transaction::concurrency::waits_for::WaitsForGraph;
use crate::transaction::{AbortReason, TransactionAbort};

/// Multi-granularity lock modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
}

// Rows are the requested mode, columns the held mode, in the order
// IS, IX, S, SIX, X.
const COMPATIBILITY: [[bool; 5]; 5] = [
    [true, true, true, true, false],
    [true, true, false, false, false],
    [true, false, true, false, false],
    [true, false, false, false, false],
    [false, false, false, false, false],
];

impl LockMode {
    fn index(self) -> usize {
        match self {
            LockMode::IntentionShared => 0,
            LockMode::IntentionExclusive => 1,
            LockMode::Shared => 2,
            LockMode::SharedIntentionExclusive => 3,
            LockMode::Exclusive => 4,
        }
    }

    pub fn compatible_with(self, held: LockMode) -> bool {
        COMPATIBILITY[self.index()][held.index()]
    }

    /// The strict-strengthening lattice for lock upgrades.
    fn upgradable_to(self, target: LockMode) -> bool {
        use LockMode::*;
        matches!(
            (self, target),
            (IntentionShared, Shared | Exclusive | IntentionExclusive | SharedIntentionExclusive)
                | (Shared, Exclusive | SharedIntentionExclusive)
                | (IntentionExclusive, Exclusive | SharedIntentionExclusive)
                | (SharedIntentionExclusive, Exclusive)
        )
    }
}

#[derive(Debug)]
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
    oid: TableOid,
    rid: Option<Rid>,
}

struct QueueState {
    queue: VecDeque<LockRequest>,
    /// Transaction currently upgrading on this queue, at most one.
    upgrading: TxnId,
}

struct LockRequestQueue {
    state: Mutex<QueueState>,
    cv: Condvar,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                upgrading: INVALID_TXN_ID,
            }),
            cv: Condvar::new(),
        }
    }
}

pub struct LockManagerConfig {
    pub cycle_detection_interval: Duration,
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            cycle_detection_interval: Duration::from_millis(50),
        }
    }
}

/// Table- and row-granular 2PL lock manager with FIFO-fair granting, strict
/// upgrade ordering, and waits-for deadlock detection.
pub struct LockManager {
    table_locks: Mutex<HashMap<TableOid, Arc<LockRequestQueue>>>,
    row_locks: Mutex<HashMap<Rid, Arc<LockRequestQueue>>>,
    /// Live transactions, so the detector can abort a victim by id.
    txns: Mutex<HashMap<TxnId, Arc<Transaction>>>,
    detector_enabled: AtomicBool,
    detector: Mutex<Option<JoinHandle<()>>>,
    config: LockManagerConfig,
}

impl LockManager {
    pub fn new(config: LockManagerConfig) -> Self {
        Self {
            table_locks: Mutex::new(HashMap::new()),
            row_locks: Mutex::new(HashMap::new()),
            txns: Mutex::new(HashMap::new()),
            detector_enabled: AtomicBool::new(false),
            detector: Mutex::new(None),
            config,
        }
    }

    /// Acquire (or upgrade to) `mode` on a table. Blocks until granted.
    /// Returns Ok(false) when the transaction is aborted while waiting, and
    /// Err on a locking-protocol violation (which aborts the transaction).
    pub fn lock_table(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
    ) -> Result<bool, TransactionAbort> {
        if txn.state() == TransactionState::Aborted {
            return Ok(false);
        }
        self.check_isolation(txn, mode)?;
        self.register(txn);

        let queue = self.table_queue(oid);
        let mut qs = queue.state.lock();
        if !self.enqueue(&mut qs, txn, mode, oid, None)? {
            return Ok(true);
        }
        self.wait_for_grant(&queue, qs, txn, mode, oid, None)
    }

    /// Release the table lock held on `oid`. All row locks on the table must
    /// be released first.
    pub fn unlock_table(&self, txn: &Arc<Transaction>, oid: TableOid) -> Result<bool, TransactionAbort> {
        if txn.with_lock_sets(|sets| sets.holds_row_locks_on(oid)) {
            return Err(self.abort_txn(txn, AbortReason::TableUnlockedBeforeUnlockingRows));
        }

        let queue = match self.table_locks.lock().get(&oid).cloned() {
            Some(queue) => queue,
            None => return Err(self.abort_txn(txn, AbortReason::AttemptedUnlockButNoLockHeld)),
        };
        let mut qs = queue.state.lock();
        let pos = match qs.queue.iter().position(|r| r.granted && r.txn_id == txn.id()) {
            Some(pos) => pos,
            None => {
                drop(qs);
                return Err(self.abort_txn(txn, AbortReason::AttemptedUnlockButNoLockHeld));
            }
        };

        let mode = qs.queue[pos].mode;
        self.transition_on_unlock(txn, mode);
        txn.with_lock_sets(|sets| Self::erase_table_lock(sets, mode, oid));
        qs.queue.remove(pos);
        queue.cv.notify_all();
        Ok(true)
    }

    /// Acquire (or upgrade to) `mode` on a row. Only S and X apply to rows,
    /// and a covering table lock must already be held.
    pub fn lock_row(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
        rid: Rid,
    ) -> Result<bool, TransactionAbort> {
        if !matches!(mode, LockMode::Shared | LockMode::Exclusive) {
            return Err(self.abort_txn(txn, AbortReason::AttemptedIntentionLockOnRow));
        }
        if txn.state() == TransactionState::Aborted {
            return Ok(false);
        }
        self.check_isolation(txn, mode)?;

        let covered = txn.with_lock_sets(|sets| match mode {
            LockMode::Exclusive => sets.holds_exclusive_capable_table_lock(oid),
            _ => sets.holds_any_table_lock(oid),
        });
        if !covered {
            return Err(self.abort_txn(txn, AbortReason::TableLockNotPresent));
        }
        self.register(txn);

        let queue = self.row_queue(rid);
        let mut qs = queue.state.lock();
        if !self.enqueue(&mut qs, txn, mode, oid, Some(rid))? {
            return Ok(true);
        }
        self.wait_for_grant(&queue, qs, txn, mode, oid, Some(rid))
    }

    pub fn unlock_row(
        &self,
        txn: &Arc<Transaction>,
        oid: TableOid,
        rid: Rid,
    ) -> Result<bool, TransactionAbort> {
        let queue = match self.row_locks.lock().get(&rid).cloned() {
            Some(queue) => queue,
            None => return Err(self.abort_txn(txn, AbortReason::AttemptedUnlockButNoLockHeld)),
        };
        let mut qs = queue.state.lock();
        let pos = match qs.queue.iter().position(|r| r.granted && r.txn_id == txn.id()) {
            Some(pos) => pos,
            None => {
                drop(qs);
                return Err(self.abort_txn(txn, AbortReason::AttemptedUnlockButNoLockHeld));
            }
        };

        let mode = qs.queue[pos].mode;
        self.transition_on_unlock(txn, mode);
        txn.with_lock_sets(|sets| Self::erase_row_lock(sets, mode, oid, rid));
        qs.queue.remove(pos);
        queue.cv.notify_all();
        Ok(true)
    }

    /// Start the background deadlock detector. It rebuilds the waits-for
    /// graph every `cycle_detection_interval` and aborts the youngest
    /// transaction (highest id) on each cycle found.
    pub fn start_cycle_detection(self: &Arc<Self>) {
        self.detector_enabled.store(true, Ordering::SeqCst);
        let weak = Arc::downgrade(self);
        let interval = self.config.cycle_detection_interval;
        let handle = thread::spawn(move || loop {
            thread::sleep(interval);
            match weak.upgrade() {
                Some(lock_manager) => {
                    if !lock_manager.detector_enabled.load(Ordering::SeqCst) {
                        break;
                    }
                    lock_manager.run_detection_pass();
                }
                None => break,
            }
        });
        *self.detector.lock() = Some(handle);
    }

    pub fn stop_cycle_detection(&self) {
        self.detector_enabled.store(false, Ordering::SeqCst);
        if let Some(handle) = self.detector.lock().take() {
            let _ = handle.join();
        }
    }

    /// One synchronous detection pass: abort victims until no cycle remains.
    /// Returns the victims in abort order.
    pub fn run_detection_pass(&self) -> Vec<TxnId> {
        let mut victims = Vec::new();
        loop {
            let graph = self.build_waits_for();
            let victim = match graph.find_victim() {
                Some(victim) => victim,
                None => break,
            };
            info!("deadlock detected; aborting txn {}", victim);
            if let Some(txn) = self.txns.lock().get(&victim).cloned() {
                txn.set_state(TransactionState::Aborted);
            }
            self.notify_queues_with(victim);
            victims.push(victim);
        }
        victims
    }

    fn table_queue(&self, oid: TableOid) -> Arc<LockRequestQueue> {
        Arc::clone(
            self.table_locks
                .lock()
                .entry(oid)
                .or_insert_with(|| Arc::new(LockRequestQueue::new())),
        )
    }

    fn row_queue(&self, rid: Rid) -> Arc<LockRequestQueue> {
        Arc::clone(
            self.row_locks
                .lock()
                .entry(rid)
                .or_insert_with(|| Arc::new(LockRequestQueue::new())),
        )
    }

    fn register(&self, txn: &Arc<Transaction>) {
        self.txns.lock().entry(txn.id()).or_insert_with(|| Arc::clone(txn));
    }

    /// Queue a new request, or turn an existing one into an upgrade. Returns
    /// Ok(false) when the same mode is already requested (a no-op relock),
    /// Ok(true) when a request was queued and the caller must wait, and Err
    /// when the request is a protocol violation.
    fn enqueue(
        &self,
        qs: &mut QueueState,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
        rid: Option<Rid>,
    ) -> Result<bool, TransactionAbort> {
        if let Some(pos) = qs.queue.iter().position(|r| r.txn_id == txn.id()) {
            if qs.queue[pos].mode == mode {
                return Ok(false);
            }
            if qs.upgrading != INVALID_TXN_ID {
                return Err(self.abort_txn(txn, AbortReason::UpgradeConflict));
            }
            let held = qs.queue[pos].mode;
            if !held.upgradable_to(mode) {
                return Err(self.abort_txn(txn, AbortReason::IncompatibleUpgrade));
            }

            qs.queue.remove(pos);
            txn.with_lock_sets(|sets| match rid {
                Some(rid) => Self::erase_row_lock(sets, held, oid, rid),
                None => Self::erase_table_lock(sets, held, oid),
            });

            // The upgrade jumps to the head of the ungranted portion.
            let insert_at = qs.queue.iter().position(|r| !r.granted).unwrap_or(qs.queue.len());
            qs.queue.insert(
                insert_at,
                LockRequest {
                    txn_id: txn.id(),
                    mode,
                    granted: false,
                    oid,
                    rid,
                },
            );
            qs.upgrading = txn.id();
        } else {
            qs.queue.push_back(LockRequest {
                txn_id: txn.id(),
                mode,
                granted: false,
                oid,
                rid,
            });
        }
        Ok(true)
    }

    /// Block on the queue's condition variable until the request is granted
    /// or the transaction is aborted out from under us.
    fn wait_for_grant(
        &self,
        queue: &LockRequestQueue,
        mut qs: parking_lot::MutexGuard<'_, QueueState>,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
        rid: Option<Rid>,
    ) -> Result<bool, TransactionAbort> {
        loop {
            if Self::try_grant(&mut qs, txn.id(), mode) {
                txn.with_lock_sets(|sets| match rid {
                    Some(rid) => Self::record_row_lock(sets, mode, oid, rid),
                    None => Self::record_table_lock(sets, mode, oid),
                });
                if qs.upgrading == txn.id() {
                    qs.upgrading = INVALID_TXN_ID;
                }
                queue.cv.notify_all();
                return Ok(true);
            }

            queue.cv.wait(&mut qs);

            if txn.state() == TransactionState::Aborted {
                if let Some(request) = qs.queue.iter().find(|r| r.txn_id == txn.id()) {
                    debug!(
                        "txn {} unwinding {:?} request on table {} row {:?}",
                        txn.id(),
                        request.mode,
                        request.oid,
                        request.rid
                    );
                }
                qs.queue.retain(|r| r.txn_id != txn.id());
                if qs.upgrading == txn.id() {
                    qs.upgrading = INVALID_TXN_ID;
                }
                queue.cv.notify_all();
                return Ok(false);
            }
        }
    }

    /// Grant discipline: no foreign upgrader, compatible with every granted
    /// request, and no barging past an earlier waiter that could itself be
    /// granted right now.
    fn try_grant(qs: &mut QueueState, txn_id: TxnId, mode: LockMode) -> bool {
        if qs.upgrading != INVALID_TXN_ID && qs.upgrading != txn_id {
            return false;
        }
        if qs
            .queue
            .iter()
            .any(|r| r.granted && r.txn_id != txn_id && !mode.compatible_with(r.mode))
        {
            return false;
        }
        for earlier in &qs.queue {
            if earlier.txn_id == txn_id {
                break;
            }
            if earlier.granted {
                continue;
            }
            let earlier_grantable = qs
                .queue
                .iter()
                .all(|g| !g.granted || g.txn_id == earlier.txn_id || earlier.mode.compatible_with(g.mode));
            if earlier_grantable && !mode.compatible_with(earlier.mode) {
                return false;
            }
        }

        if let Some(request) = qs.queue.iter_mut().find(|r| r.txn_id == txn_id) {
            request.granted = true;
        }
        true
    }

    fn check_isolation(&self, txn: &Arc<Transaction>, mode: LockMode) -> Result<(), TransactionAbort> {
        match txn.isolation_level() {
            IsolationLevel::RepeatableRead => {
                if txn.state() == TransactionState::Shrinking {
                    return Err(self.abort_txn(txn, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::ReadCommitted => {
                if txn.state() == TransactionState::Shrinking
                    && !matches!(mode, LockMode::IntentionShared | LockMode::Shared)
                {
                    return Err(self.abort_txn(txn, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::ReadUncommitted => {
                if !matches!(mode, LockMode::Exclusive | LockMode::IntentionExclusive) {
                    return Err(self.abort_txn(txn, AbortReason::LockSharedOnReadUncommitted));
                }
            }
        }
        Ok(())
    }

    fn transition_on_unlock(&self, txn: &Arc<Transaction>, mode: LockMode) {
        if matches!(txn.state(), TransactionState::Committed | TransactionState::Aborted) {
            return;
        }
        let shrink = match txn.isolation_level() {
            IsolationLevel::RepeatableRead => {
                matches!(mode, LockMode::Shared | LockMode::Exclusive)
            }
            IsolationLevel::ReadCommitted | IsolationLevel::ReadUncommitted => {
                mode == LockMode::Exclusive
            }
        };
        if shrink {
            txn.set_state(TransactionState::Shrinking);
        }
    }

    fn abort_txn(&self, txn: &Arc<Transaction>, reason: AbortReason) -> TransactionAbort {
        txn.set_state(TransactionState::Aborted);
        TransactionAbort {
            txn_id: txn.id(),
            reason,
        }
    }

    fn record_table_lock(sets: &mut LockSets, mode: LockMode, oid: TableOid) {
        match mode {
            LockMode::Shared => sets.shared_table.insert(oid),
            LockMode::Exclusive => sets.exclusive_table.insert(oid),
            LockMode::IntentionShared => sets.intention_shared_table.insert(oid),
            LockMode::IntentionExclusive => sets.intention_exclusive_table.insert(oid),
            LockMode::SharedIntentionExclusive => sets.shared_intention_exclusive_table.insert(oid),
        };
    }

    fn erase_table_lock(sets: &mut LockSets, mode: LockMode, oid: TableOid) {
        match mode {
            LockMode::Shared => sets.shared_table.remove(&oid),
            LockMode::Exclusive => sets.exclusive_table.remove(&oid),
            LockMode::IntentionShared => sets.intention_shared_table.remove(&oid),
            LockMode::IntentionExclusive => sets.intention_exclusive_table.remove(&oid),
            LockMode::SharedIntentionExclusive => sets.shared_intention_exclusive_table.remove(&oid),
        };
    }

    fn record_row_lock(sets: &mut LockSets, mode: LockMode, oid: TableOid, rid: Rid) {
        match mode {
            LockMode::Shared => sets.shared_rows.entry(oid).or_default().insert(rid),
            LockMode::Exclusive => sets.exclusive_rows.entry(oid).or_default().insert(rid),
            _ => unreachable!("row locks are S or X"),
        };
    }

    fn erase_row_lock(sets: &mut LockSets, mode: LockMode, oid: TableOid, rid: Rid) {
        match mode {
            LockMode::Shared => {
                sets.shared_rows.entry(oid).or_default().remove(&rid);
            }
            LockMode::Exclusive => {
                sets.exclusive_rows.entry(oid).or_default().remove(&rid);
            }
            _ => unreachable!("row locks are S or X"),
        }
    }

    /// Rebuild the waits-for graph from both queue maps. Requests of
    /// already-aborted transactions are ignored; they unwind on wakeup.
    fn build_waits_for(&self) -> WaitsForGraph {
        let aborted: HashSet<TxnId> = self
            .txns
            .lock()
            .iter()
            .filter(|(_, txn)| txn.state() == TransactionState::Aborted)
            .map(|(&id, _)| id)
            .collect();

        let mut graph = WaitsForGraph::new();
        let queues: Vec<Arc<LockRequestQueue>> = {
            let tables = self.table_locks.lock();
            let rows = self.row_locks.lock();
            tables.values().cloned().chain(rows.values().cloned()).collect()
        };
        for queue in queues {
            let qs = queue.state.lock();
            for waiter in qs.queue.iter().filter(|r| !r.granted) {
                if aborted.contains(&waiter.txn_id) {
                    continue;
                }
                for holder in qs.queue.iter().filter(|r| r.granted) {
                    if waiter.txn_id != holder.txn_id && !waiter.mode.compatible_with(holder.mode) {
                        graph.add_edge(waiter.txn_id, holder.txn_id);
                    }
                }
            }
        }
        graph
    }

    /// Broadcast on every queue holding a request from `txn_id`, so a victim
    /// blocked anywhere observes its abort.
    fn notify_queues_with(&self, txn_id: TxnId) {
        let queues: Vec<Arc<LockRequestQueue>> = {
            let tables = self.table_locks.lock();
            let rows = self.row_locks.lock();
            tables.values().cloned().chain(rows.values().cloned()).collect()
        };
        for queue in queues {
            let involved = {
                let qs = queue.state.lock();
                qs.queue.iter().any(|r| r.txn_id == txn_id)
            };
            if involved {
                queue.cv.notify_all();
            }
        }
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.detector_enabled.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compatibility_matrix() {
        use LockMode::*;
        assert!(IntentionShared.compatible_with(IntentionExclusive));
        assert!(IntentionShared.compatible_with(SharedIntentionExclusive));
        assert!(!IntentionShared.compatible_with(Exclusive));
        assert!(IntentionExclusive.compatible_with(IntentionExclusive));
        assert!(!IntentionExclusive.compatible_with(Shared));
        assert!(Shared.compatible_with(Shared));
        assert!(!Shared.compatible_with(SharedIntentionExclusive));
        assert!(!SharedIntentionExclusive.compatible_with(SharedIntentionExclusive));
        assert!(!Exclusive.compatible_with(IntentionShared));
    }

    #[test]
    fn test_upgrade_lattice() {
        use LockMode::*;
        assert!(IntentionShared.upgradable_to(Shared));
        assert!(IntentionShared.upgradable_to(Exclusive));
        assert!(IntentionShared.upgradable_to(IntentionExclusive));
        assert!(IntentionShared.upgradable_to(SharedIntentionExclusive));
        assert!(Shared.upgradable_to(Exclusive));
        assert!(Shared.upgradable_to(SharedIntentionExclusive));
        assert!(!Shared.upgradable_to(IntentionShared));
        assert!(IntentionExclusive.upgradable_to(Exclusive));
        assert!(SharedIntentionExclusive.upgradable_to(Exclusive));
        assert!(!Exclusive.upgradable_to(Shared));
        assert!(!Exclusive.upgradable_to(SharedIntentionExclusive));
    }
}
