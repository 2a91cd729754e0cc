//! Best-effort LIFO replay of an undo log.
//!
//! Later operations may depend on state created by earlier ones (a write
//! into a directory an earlier create made), so entries are replayed in
//! reverse apply order. A failed undo is recorded and the pass continues, so
//! unrelated operations still get reverted.

use crate::fs::operation::{Operation, Outcome};
use crate::fs::platform::Platform;
use crate::fs::sink::{OperationMonitor, OperationRecord, Phase};
use crate::fs::undo::UndoLog;

use serde::Serialize;
use std::time::Instant;
use uuid::Uuid;

/// Outcome of one rollback pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackSummary {
    /// Operation indexes undone, in replay order.
    pub rolled_back: Vec<usize>,
    /// Undo steps that failed, in replay order.
    pub failed: Vec<FailedUndo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedUndo {
    pub index: usize,
    pub error: String,
}

impl RollbackSummary {
    /// True when every undo step succeeded.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct RollbackExecutor<'a> {
    pub transaction_id: Uuid,
    pub platform: &'a dyn Platform,
    pub monitor: &'a dyn OperationMonitor,
}

impl RollbackExecutor<'_> {
    /// Replays every not-yet-undone entry of `undo_log` newest first, updating the
    /// matching operation's outcome to `undone` or `undo-failed`.
    pub fn rollback(&self, undo_log: &mut UndoLog, operations: &mut [Operation]) -> RollbackSummary {
        let mut summary = RollbackSummary::default();

        for entry in undo_log.replay_order() {
            if entry.is_undone() {
                continue;
            }

            let started = Instant::now();
            let result = entry.undo(self.platform);
            let duration_ms = started.elapsed().as_millis() as u64;

            let error = result.as_ref().err().map(ToString::to_string);
            self.monitor.log_operation(&OperationRecord {
                transaction_id: self.transaction_id,
                index: entry.index,
                kind: entry.action.kind(),
                phase: Phase::Undo,
                path: entry.action.path().to_path_buf(),
                destination: None,
                success: result.is_ok(),
                duration_ms,
                size: None,
                error: error.clone(),
            });

            let operation = operations.iter_mut().find(|op| op.index == entry.index);

            match error {
                None => {
                    log::debug!("Undid #{} {}", entry.index, entry.action.kind());
                    if let Some(op) = operation {
                        op.outcome = Outcome::Undone;
                    }
                    summary.rolled_back.push(entry.index);
                }
                Some(error) => {
                    log::error!("Undo of #{} failed: {}", entry.index, error);
                    if let Some(op) = operation {
                        op.outcome = Outcome::UndoFailed;
                        op.undo_error = Some(error.clone());
                    }
                    summary.failed.push(FailedUndo {
                        index: entry.index,
                        error,
                    });
                }
            }
        }

        if summary.is_complete() {
            log::info!("Rollback completed ({} undone)", summary.rolled_back.len());
        } else {
            log::warn!(
                "Rollback incomplete: {} undone, {} failed",
                summary.rolled_back.len(),
                summary.failed.len()
            );
        }

        summary
    }
}
