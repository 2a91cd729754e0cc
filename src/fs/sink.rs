//! Collaborator interfaces: cache invalidation and operation monitoring.
//!
//! The engine calls [`CacheInvalidator::invalidate`] once per distinct touched
//! path when a transaction that reached `RUNNING` finishes, whatever the
//! outcome, and [`OperationMonitor::log_operation`] once per apply or undo
//! attempt.

use crate::fs::operation::OperationKind;

use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub trait CacheInvalidator: Send + Sync {
    fn invalidate(&self, path: &Path);
}

pub trait OperationMonitor: Send + Sync {
    fn log_operation(&self, record: &OperationRecord);
}

impl<F> CacheInvalidator for F
where
    F: Fn(&Path) + Send + Sync,
{
    fn invalidate(&self, path: &Path) {
        self(path)
    }
}

impl<F> OperationMonitor for F
where
    F: Fn(&OperationRecord) + Send + Sync,
{
    fn log_operation(&self, record: &OperationRecord) {
        self(record)
    }
}

/// Whether a record describes the forward step or its undo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Apply,
    Undo,
}

/// One apply or undo attempt, detailed enough to rebuild the undo log from
/// the monitoring stream alone.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRecord {
    pub transaction_id: Uuid,
    pub index: usize,
    #[serde(rename = "type")]
    pub kind: OperationKind,
    pub phase: Phase,
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<PathBuf>,
    pub success: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Drops every invalidation. Used when no cache sits in front of the engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

impl CacheInvalidator for NoCache {
    fn invalidate(&self, path: &Path) {
        log::trace!("No cache to invalidate for {}", path.display());
    }
}

/// Writes each record to the `log` facade under the `fstxn::monitor` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMonitor;

impl OperationMonitor for LogMonitor {
    fn log_operation(&self, record: &OperationRecord) {
        let phase = match record.phase {
            Phase::Apply => "apply",
            Phase::Undo => "undo",
        };

        if record.success {
            log::debug!(
                target: "fstxn::monitor",
                "[{}] #{} {} {} {} ok ({}ms{})",
                record.transaction_id,
                record.index,
                phase,
                record.kind,
                record.path.display(),
                record.duration_ms,
                record
                    .size
                    .map(|size| format!(", {} bytes", size))
                    .unwrap_or_default()
            );
        } else {
            log::warn!(
                target: "fstxn::monitor",
                "[{}] #{} {} {} {} failed ({}ms): {}",
                record.transaction_id,
                record.index,
                phase,
                record.kind,
                record.path.display(),
                record.duration_ms,
                record.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}
