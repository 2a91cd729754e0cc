//! Transaction state machine.
//!
//! ```text
//! PENDING → VALIDATING → RUNNING → COMMITTED
//!           VALIDATING → FAILED_VALIDATION
//!           VALIDATING → LOCK_TIMEOUT
//!                        RUNNING → FAILED_PARTIAL
//!                        RUNNING → ROLLING_BACK → ROLLED_BACK
//!                                  ROLLING_BACK → PARTIALLY_ROLLED_BACK
//! ```
//!
//! No transition re-enters a non-terminal state and terminal states are never
//! left.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionState {
    Pending,
    Validating,
    Running,
    Committed,
    FailedValidation,
    /// Locks could not be taken in time; nothing was mutated.
    LockTimeout,
    /// An operation failed with rollback disabled. Applied operations stay.
    FailedPartial,
    RollingBack,
    RolledBack,
    /// Some undo steps failed. The disk matches neither the before nor the
    /// after state; the report lists each operation's disposition.
    PartiallyRolledBack,
}

impl TransactionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransactionState::Committed
                | TransactionState::FailedValidation
                | TransactionState::LockTimeout
                | TransactionState::FailedPartial
                | TransactionState::RolledBack
                | TransactionState::PartiallyRolledBack
        )
    }

    pub fn can_transition_to(self, next: TransactionState) -> bool {
        use TransactionState::*;

        matches!(
            (self, next),
            (Pending, Validating)
                | (Validating, Running)
                | (Validating, FailedValidation)
                | (Validating, LockTimeout)
                | (Running, Committed)
                | (Running, FailedPartial)
                | (Running, RollingBack)
                | (RollingBack, RolledBack)
                | (RollingBack, PartiallyRolledBack)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionState::Pending => "PENDING",
            TransactionState::Validating => "VALIDATING",
            TransactionState::Running => "RUNNING",
            TransactionState::Committed => "COMMITTED",
            TransactionState::FailedValidation => "FAILED_VALIDATION",
            TransactionState::LockTimeout => "LOCK_TIMEOUT",
            TransactionState::FailedPartial => "FAILED_PARTIAL",
            TransactionState::RollingBack => "ROLLING_BACK",
            TransactionState::RolledBack => "ROLLED_BACK",
            TransactionState::PartiallyRolledBack => "PARTIALLY_ROLLED_BACK",
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
