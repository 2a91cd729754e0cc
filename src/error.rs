//! Error types for fstxn.
//!
//! Engine entry points return `Result<T>` which aliases `Result<T, TxnError>`.
//! A failed operation or a failed undo step is *not* a `TxnError`: those are
//! captured as values ([`OperationError`], [`RollbackError`]) and surface in
//! the transaction report, because partial mutation state must always be
//! reported to the caller.

use crate::fs::operation::OperationKind;
use crate::fs::state::TransactionState;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Errors returned directly to the caller of the engine.
#[derive(Debug, Error)]
pub enum TxnError {
    /// A precondition failed before anything was mutated.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Locks could not be acquired in time. Nothing was mutated.
    #[error(
        "Timed out after {}ms waiting for locks on {} path(s): {}",
        .waited.as_millis(),
        .paths.len(),
        display_paths(.paths)
    )]
    LockTimeout { paths: Vec<PathBuf>, waited: Duration },

    /// No in-flight transaction has this id.
    #[error("Transaction {0} not found")]
    UnknownTransaction(Uuid),

    /// A state change the transaction state machine does not allow (indicates bug).
    #[error("Invalid transaction state transition: {from} → {to}")]
    InvalidTransition {
        from: TransactionState,
        to: TransactionState,
    },

    /// File system operation failed outside of a transaction step.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Operation batch could not be parsed or report could not be serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unexpected error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TxnError {
    /// Returns true if the error was raised before any lock was taken or any
    /// path was touched.
    pub fn is_side_effect_free(&self) -> bool {
        matches!(self, TxnError::Validation(_) | TxnError::LockTimeout { .. })
    }
}

/// Precondition failures detected before a transaction reaches `RUNNING`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Transaction contains no operations")]
    Empty,

    #[error("Operation #{index}: invalid path '{path}': {reason}")]
    InvalidPath {
        index: usize,
        path: String,
        reason: String,
    },

    #[error("Operation #{index} ({kind}) requires a {field}")]
    MissingField {
        index: usize,
        kind: OperationKind,
        field: &'static str,
    },

    #[error("Operation #{index} ({kind} {}): {reason}", .path.display())]
    Precondition {
        index: usize,
        kind: OperationKind,
        path: PathBuf,
        reason: String,
    },
}

impl ValidationError {
    /// Index of the offending operation, if the failure is tied to one.
    pub fn index(&self) -> Option<usize> {
        match self {
            ValidationError::Empty => None,
            ValidationError::InvalidPath { index, .. }
            | ValidationError::MissingField { index, .. }
            | ValidationError::Precondition { index, .. } => Some(*index),
        }
    }
}

/// A mutating step failed while the transaction was running.
#[derive(Debug, Error)]
#[error("{kind} {} failed: {source}", .path.display())]
pub struct OperationError {
    pub kind: OperationKind,
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

impl OperationError {
    pub fn new(kind: OperationKind, path: &Path, source: std::io::Error) -> Self {
        Self {
            kind,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// An individual undo step failed during rollback.
#[derive(Debug, Error)]
pub enum RollbackError {
    #[error("Failed to undo {kind} {}: {source}", .path.display())]
    Io {
        kind: OperationKind,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The undo action was already replayed once. Nothing was touched.
    #[error("Undo of {kind} {} was already applied", .path.display())]
    AlreadyUndone { kind: OperationKind, path: PathBuf },
}

impl RollbackError {
    pub fn io(kind: OperationKind, path: &Path, source: std::io::Error) -> Self {
        RollbackError::Io {
            kind,
            path: path.to_path_buf(),
            source,
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type alias for fstxn operations.
pub type Result<T> = std::result::Result<T, TxnError>;
