//! Multi-operation file system transactions.
//!
//! A batch of operations is applied under path locks, in order, with an undo
//! log that is replayed newest-first if any step fails.

pub mod executor;
pub mod lock;
pub mod operation;
pub mod platform;
pub mod report;
pub mod rollback;
pub mod sink;
pub mod state;
pub mod transaction;
pub mod undo;

pub use lock::{LockSet, PathLockManager};
pub use operation::{Action, NewEntry, Operation, OperationKind, OperationSpec, Outcome};
pub use platform::{EntryKind, EntryStat, HostFs, Platform};
pub use report::{OperationReport, Plan, TransactionReport};
pub use rollback::{FailedUndo, RollbackExecutor, RollbackSummary};
pub use sink::{CacheInvalidator, LogMonitor, NoCache, OperationMonitor, OperationRecord, Phase};
pub use state::TransactionState;
pub use transaction::{Transaction, TransactionId, TransactionManager};
pub use undo::{Snapshot, UndoAction, UndoLog};
