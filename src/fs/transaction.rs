//! Transaction manager: validate, lock, execute, then commit or roll back.
//!
//! ## Execution Guarantees
//!
//! - **Isolation**: every path a transaction touches is locked for the whole
//!   run, so overlapping transactions are fully serialized
//! - **Ordering**: operations apply strictly in submitted order, one at a time
//! - **Recovery**: on the first failure the undo log is replayed LIFO, unless
//!   the caller disabled rollback
//! - **Reporting**: every run ends in a terminal state with a per-operation
//!   disposition, including partial outcomes
//!
//! ## Phases
//!
//! 1. **Submit**: resolve descriptors to canonical paths and register the
//!    transaction as `PENDING`
//! 2. **Validate**: structural checks, plus a full simulation in strict mode
//! 3. **Lock**: acquire the union of touched paths, plus the topmost missing
//!    ancestor of each one, bounded by the timeout
//! 4. **Execute**: apply each operation and record its undo action
//! 5. **Finish**: commit, stop, or roll back; release locks; invalidate caches
//!
//! ## Example
//!
//! ```no_run
//! # use fstxn::config::EngineConfig;
//! # use fstxn::fs::{OperationSpec, TransactionManager};
//! # fn example() -> fstxn::Result<()> {
//! let manager = TransactionManager::new(EngineConfig::default());
//!
//! let report = manager.execute_transaction(
//!     &[
//!         OperationSpec::create("a/x.txt", "hi"),
//!         OperationSpec::r#move("a/x.txt", "b/x.txt"),
//!     ],
//!     true,
//! )?;
//!
//! assert!(report.is_committed());
//! # Ok(())
//! # }
//! ```

use crate::config::EngineConfig;
use crate::error::{Result, TxnError};
use crate::fs::executor;
use crate::fs::lock::{PathLockManager, lock_order};
use crate::fs::operation::{Operation, OperationSpec, Outcome};
use crate::fs::platform::{HostFs, Platform};
use crate::fs::report::{OperationReport, Plan, TransactionReport};
use crate::fs::rollback::{RollbackExecutor, RollbackSummary};
use crate::fs::sink::{CacheInvalidator, LogMonitor, NoCache, OperationMonitor, OperationRecord, Phase};
use crate::fs::state::TransactionState;
use crate::fs::undo::{self, UndoAction, UndoLog};
use crate::verify::preflight;

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

pub type TransactionId = Uuid;

/// One submitted batch and everything needed to finish or undo it.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    operations: Vec<Operation>,
    state: TransactionState,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    rollback_on_error: bool,
    undo_log: UndoLog,
    rollback: Option<RollbackSummary>,
}

impl Transaction {
    fn new(operations: Vec<Operation>, rollback_on_error: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            operations,
            state: TransactionState::Pending,
            created_at: Utc::now(),
            completed_at: None,
            rollback_on_error,
            undo_log: UndoLog::new(),
            rollback: None,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Moves to `next`, stamping the completion time on terminal states.
    fn transition(&mut self, next: TransactionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(TxnError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        log::info!("Transaction {}: {} → {}", self.id, self.state, next);
        self.state = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Every distinct path referenced by the batch, sources and destinations.
    pub fn touched_paths(&self) -> BTreeSet<PathBuf> {
        touched(&self.operations)
    }

    pub fn report(&self) -> TransactionReport {
        TransactionReport {
            transaction_id: self.id,
            status: self.state,
            operations: self.operations.iter().map(OperationReport::from).collect(),
            created_at: self.created_at,
            completed_at: self.completed_at.unwrap_or_else(Utc::now),
            rollback: self.rollback.clone(),
        }
    }
}

fn touched(operations: &[Operation]) -> BTreeSet<PathBuf> {
    operations
        .iter()
        .flat_map(|op| op.action.paths())
        .map(Path::to_path_buf)
        .collect()
}

/// Touched paths plus the topmost missing ancestor of each, so directories
/// created on the way to a target are covered by the same locks.
fn lock_set(operations: &[Operation], platform: &dyn Platform) -> BTreeSet<PathBuf> {
    let mut paths = touched(operations);
    let ancestors: Vec<PathBuf> = paths
        .iter()
        .filter_map(|path| match undo::missing_ancestor(platform, path) {
            Ok(ancestor) => ancestor,
            Err(e) => {
                // The operation itself will fail on the same path.
                log::debug!("Cannot inspect parents of {}: {}", path.display(), e);
                None
            }
        })
        .collect();
    paths.extend(ancestors);
    paths
}

/// Registry entry. A transaction is owned by the registry until `run` takes
/// it; from then on only its latest state is published here.
#[derive(Debug)]
enum Slot {
    Pending(Box<Transaction>),
    Active(TransactionState),
}

/// Process-scoped engine. Starts with an empty registry; entries are evicted
/// as soon as their transaction reaches a terminal state and is reported.
pub struct TransactionManager {
    config: EngineConfig,
    locks: Arc<PathLockManager>,
    platform: Arc<dyn Platform>,
    cache: Arc<dyn CacheInvalidator>,
    monitor: Arc<dyn OperationMonitor>,
    registry: Mutex<HashMap<TransactionId, Slot>>,
    settled: Condvar,
}

impl TransactionManager {
    /// Creates a manager on the host filesystem with no cache and
    /// log-backed monitoring.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            locks: Arc::new(PathLockManager::new()),
            platform: Arc::new(HostFs),
            cache: Arc::new(NoCache),
            monitor: Arc::new(LogMonitor),
            registry: Mutex::new(HashMap::new()),
            settled: Condvar::new(),
        }
    }

    pub fn with_platform(mut self, platform: Arc<dyn Platform>) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheInvalidator>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn OperationMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    /// Shares one lock table between several managers.
    pub fn with_lock_manager(mut self, locks: Arc<PathLockManager>) -> Self {
        self.locks = locks;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn lock_manager(&self) -> &Arc<PathLockManager> {
        &self.locks
    }

    /// Resolves and registers a batch without running it.
    ///
    /// Paths that cannot be resolved and missing payloads are rejected here;
    /// the transaction is never registered in that case.
    pub fn submit(&self, specs: &[OperationSpec], rollback_on_error: bool) -> Result<TransactionId> {
        let operations = self.resolve(specs)?;
        let txn = Transaction::new(operations, rollback_on_error);
        let id = txn.id;

        log::debug!(
            "Submitted transaction {} ({} operation(s), rollback {})",
            id,
            txn.operations.len(),
            if rollback_on_error { "on" } else { "off" }
        );
        self.registry.lock().insert(id, Slot::Pending(Box::new(txn)));
        Ok(id)
    }

    /// Runs a submitted transaction to a terminal state.
    ///
    /// Validation failures and lock timeouts are returned as errors; nothing
    /// was mutated in either case. Once running, the result is always a
    /// report, whatever happened on disk.
    pub fn run(&self, id: TransactionId) -> Result<TransactionReport> {
        let mut txn = {
            let mut registry = self.registry.lock();
            match registry.remove(&id) {
                Some(Slot::Pending(txn)) => {
                    registry.insert(id, Slot::Active(TransactionState::Pending));
                    txn
                }
                Some(active) => {
                    // Already started by another caller.
                    registry.insert(id, active);
                    return Err(TxnError::UnknownTransaction(id));
                }
                None => return Err(TxnError::UnknownTransaction(id)),
            }
        };

        let result = self.drive(&mut txn);

        self.registry.lock().remove(&id);
        self.settled.notify_all();
        result
    }

    /// `submit` followed by `run`.
    pub fn execute_transaction(
        &self,
        specs: &[OperationSpec],
        rollback_on_error: bool,
    ) -> Result<TransactionReport> {
        let id = self.submit(specs, rollback_on_error)?;
        self.run(id)
    }

    /// Validates a batch in strict mode and reports what would be locked,
    /// without registering, locking, or mutating anything.
    pub fn plan(&self, specs: &[OperationSpec]) -> Result<Plan> {
        let operations = self.resolve(specs)?;
        preflight::check_batch_structure(&operations)?;
        preflight::simulate(&operations, &*self.platform)?;

        Ok(Plan {
            operations: operations.iter().map(OperationReport::from).collect(),
            locked_paths: lock_order(lock_set(&operations, &*self.platform)),
        })
    }

    /// Current state of a registered transaction. `None` once it has finished.
    pub fn status(&self, id: TransactionId) -> Option<TransactionState> {
        self.registry.lock().get(&id).map(|slot| match slot {
            Slot::Pending(txn) => txn.state,
            Slot::Active(state) => *state,
        })
    }

    /// Number of registered transactions that have not finished.
    pub fn in_flight(&self) -> usize {
        self.registry.lock().len()
    }

    /// Discards a transaction that has not started running.
    pub fn cancel(&self, id: TransactionId) -> Result<()> {
        let mut registry = self.registry.lock();
        match registry.get(&id) {
            Some(Slot::Pending(_)) => {
                registry.remove(&id);
                log::info!("Cancelled transaction {}", id);
                Ok(())
            }
            _ => Err(TxnError::UnknownTransaction(id)),
        }
    }

    /// Waits until no transaction is between `run` and its terminal state.
    ///
    /// Long-lived hosts that run transactions from worker threads call this
    /// before shutting down. Returns false if some were still running after
    /// `timeout`. Pending transactions that were never run do not hold this up.
    pub fn drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut registry = self.registry.lock();

        loop {
            let running = registry
                .values()
                .filter(|slot| matches!(slot, Slot::Active(_)))
                .count();
            if running == 0 {
                return true;
            }

            log::debug!("Draining: {} transaction(s) still running", running);
            if self.settled.wait_until(&mut registry, deadline).timed_out() {
                return !registry.values().any(|slot| matches!(slot, Slot::Active(_)));
            }
        }
    }

    fn resolve(&self, specs: &[OperationSpec]) -> Result<Vec<Operation>> {
        let base = self.config.resolve_base_dir()?;
        let operations = specs
            .iter()
            .enumerate()
            .map(|(index, spec)| Operation::resolve(index, spec, &base))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(operations)
    }

    fn advance(&self, txn: &mut Transaction, next: TransactionState) -> Result<()> {
        txn.transition(next)?;
        if let Some(slot) = self.registry.lock().get_mut(&txn.id) {
            *slot = Slot::Active(next);
        }
        Ok(())
    }

    fn drive(&self, txn: &mut Transaction) -> Result<TransactionReport> {
        self.advance(txn, TransactionState::Validating)?;

        if let Err(e) = self.validate(txn) {
            log::warn!("Transaction {} failed validation: {}", txn.id, e);
            self.advance(txn, TransactionState::FailedValidation)?;
            return Err(e);
        }

        let paths = lock_set(&txn.operations, &*self.platform);
        let locks = match self.locks.acquire(txn.id, paths, self.config.lock_timeout) {
            Ok(locks) => locks,
            Err(e) => {
                self.advance(txn, TransactionState::LockTimeout)?;
                return Err(e);
            }
        };

        self.advance(txn, TransactionState::Running)?;
        let failed = self.execute(txn);

        let terminal = if !failed {
            TransactionState::Committed
        } else if !txn.rollback_on_error {
            log::warn!(
                "Transaction {} stopped with rollback disabled; applied operations remain",
                txn.id
            );
            TransactionState::FailedPartial
        } else {
            self.advance(txn, TransactionState::RollingBack)?;
            let summary = RollbackExecutor {
                transaction_id: txn.id,
                platform: &*self.platform,
                monitor: &*self.monitor,
            }
            .rollback(&mut txn.undo_log, &mut txn.operations);

            let terminal = if summary.is_complete() {
                TransactionState::RolledBack
            } else {
                TransactionState::PartiallyRolledBack
            };
            txn.rollback = Some(summary);
            terminal
        };
        self.advance(txn, terminal)?;

        locks.release();

        for path in txn.touched_paths() {
            self.cache.invalidate(&path);
        }

        Ok(txn.report())
    }

    fn validate(&self, txn: &Transaction) -> Result<()> {
        preflight::check_batch_structure(&txn.operations)?;
        if self.config.strict_preflight {
            preflight::simulate(&txn.operations, &*self.platform)?;
        }
        Ok(())
    }

    /// Applies operations in order. Returns true if one failed.
    fn execute(&self, txn: &mut Transaction) -> bool {
        for op in txn.operations.iter_mut() {
            let started = Instant::now();
            let result = executor::apply(&op.action, &*self.platform);
            let duration_ms = started.elapsed().as_millis() as u64;
            let size = match &result {
                Ok(UndoAction::Delete { snapshot, .. }) => Some(snapshot.size()),
                _ => executor::payload_size(&op.action),
            };

            self.monitor.log_operation(&OperationRecord {
                transaction_id: txn.id,
                index: op.index,
                kind: op.kind(),
                phase: Phase::Apply,
                path: op.action.path().to_path_buf(),
                destination: op.action.destination().map(Path::to_path_buf),
                success: result.is_ok(),
                duration_ms,
                size,
                error: result.as_ref().err().map(ToString::to_string),
            });

            match result {
                Ok(undo) => {
                    op.outcome = Outcome::Applied;
                    txn.undo_log.push(op.index, undo);
                }
                Err(e) => {
                    log::error!("Transaction {}: operation #{} failed: {}", txn.id, op.index, e);
                    op.outcome = Outcome::Failed;
                    op.error = Some(e.to_string());
                    return true;
                }
            }
        }
        false
    }
}

impl Drop for TransactionManager {
    fn drop(&mut self) {
        let pending = self.registry.get_mut().len();
        if pending > 0 {
            log::warn!(
                "Transaction manager dropped with {} transaction(s) never run",
                pending
            );
        }
    }
}
