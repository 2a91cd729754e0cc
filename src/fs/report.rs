//! Caller-facing results.
//!
//! Every terminal status is reported with enough detail to reconstruct what
//! is true on disk: each operation's final disposition, the error that
//! stopped the run, and every undo step that failed.

use crate::error::Result;
use crate::fs::operation::{Operation, OperationKind, Outcome};
use crate::fs::rollback::RollbackSummary;
use crate::fs::state::TransactionState;

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationReport {
    pub index: usize,
    pub kind: OperationKind,
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<PathBuf>,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub undo_error: Option<String>,
}

impl From<&Operation> for OperationReport {
    fn from(op: &Operation) -> Self {
        Self {
            index: op.index,
            kind: op.kind(),
            path: op.action.path().to_path_buf(),
            destination: op.action.destination().map(Path::to_path_buf),
            outcome: op.outcome,
            error: op.error.clone(),
            undo_error: op.undo_error.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReport {
    pub transaction_id: Uuid,
    pub status: TransactionState,
    pub operations: Vec<OperationReport>,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackSummary>,
}

impl TransactionReport {
    pub fn is_committed(&self) -> bool {
        self.status == TransactionState::Committed
    }

    /// Indexes of operations whose final disposition is `outcome`.
    pub fn indexes_with(&self, outcome: Outcome) -> Vec<usize> {
        self.operations
            .iter()
            .filter(|op| op.outcome == outcome)
            .map(|op| op.index)
            .collect()
    }

    /// The error that stopped the run, if any.
    pub fn failure(&self) -> Option<&OperationReport> {
        self.operations
            .iter()
            .find(|op| op.outcome == Outcome::Failed)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Prints a per-operation summary to stdout.
    ///
    /// Paths are shown relative to `base` with forward slashes.
    pub fn print_summary(&self, base: &Path) {
        let status = match self.status {
            TransactionState::Committed => self.status.as_str().green().bold(),
            TransactionState::RolledBack => self.status.as_str().yellow().bold(),
            _ => self.status.as_str().red().bold(),
        };
        println!(
            "\n{} {} {}",
            "Transaction".bold(),
            self.transaction_id.to_string().dimmed(),
            status
        );

        for op in &self.operations {
            println!("   {} {}", outcome_marker(op.outcome), describe(op, base));
            if let Some(error) = &op.error {
                println!("       {}", error.red());
            }
            if let Some(error) = &op.undo_error {
                println!("       {} {}", "undo:".red().bold(), error.red());
            }
        }

        println!();
        let total = self.operations.len();
        match self.status {
            TransactionState::Committed => println!(
                "{} Successfully completed {} operation{}",
                "✓".green().bold(),
                total,
                plural(total)
            ),
            TransactionState::RolledBack => println!(
                "{} Rolled back {} applied operation{}; nothing changed on disk",
                "↺".yellow().bold(),
                self.indexes_with(Outcome::Undone).len(),
                plural(self.indexes_with(Outcome::Undone).len())
            ),
            TransactionState::FailedPartial => println!(
                "{} Stopped without rollback: {} operation{} remain applied",
                "✗".red().bold(),
                self.indexes_with(Outcome::Applied).len(),
                plural(self.indexes_with(Outcome::Applied).len())
            ),
            _ => {
                let failed = self.indexes_with(Outcome::UndoFailed);
                println!(
                    "{} Rollback incomplete: operation{} {} could not be undone. Reconcile manually.",
                    "✗".red().bold(),
                    plural(failed.len()),
                    failed
                        .iter()
                        .map(|i| format!("#{}", i))
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
        }
    }
}

/// What a transaction would do, produced without touching anything.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub operations: Vec<OperationReport>,
    /// Paths that would be locked, in acquisition order.
    pub locked_paths: Vec<PathBuf>,
}

impl Plan {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn print_summary(&self, base: &Path) {
        println!("\n{}", "DRY RUN - No changes will be made".yellow().bold());
        for op in &self.operations {
            println!("   • {}", describe(op, base));
        }
        println!();
        println!(
            "{} operation{} would lock {} path{}. Run with {} to apply.",
            self.operations.len().to_string().cyan().bold(),
            plural(self.operations.len()),
            self.locked_paths.len(),
            plural(self.locked_paths.len()),
            "fstxn run".cyan()
        );
    }
}

fn describe(op: &OperationReport, base: &Path) -> String {
    let display_path = |path: &Path| -> String {
        let relative = pathdiff::diff_paths(path, base).unwrap_or_else(|| path.to_path_buf());
        relative.to_string_lossy().replace('\\', "/")
    };

    let target = match &op.destination {
        Some(to) => format!("{} → {}", display_path(&op.path), display_path(to)),
        None => display_path(&op.path),
    };
    format!("#{} {:<6} {}", op.index, op.kind.as_str(), target.dimmed())
}

fn outcome_marker(outcome: Outcome) -> String {
    match outcome {
        Outcome::Applied => "✓".green().to_string(),
        Outcome::Undone => "↺".yellow().to_string(),
        Outcome::Failed => "✗".red().to_string(),
        Outcome::UndoFailed => "!".red().bold().to_string(),
        Outcome::Pending => "•".dimmed().to_string(),
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}
