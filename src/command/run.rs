use crate::command::BatchArgs;
use crate::error::Result;
use crate::fs::TransactionManager;

use clap::Parser;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub batch: BatchArgs,

    /// Leave applied operations in place when one fails
    #[arg(long)]
    pub no_rollback: bool,

    /// How long to wait for path locks, in milliseconds
    #[arg(long, value_name = "MS")]
    pub lock_timeout_ms: Option<u64>,

    /// Simulate the whole batch first and reject it if any step would fail
    #[arg(long)]
    pub strict: bool,
}

/// Runs the batch. Returns true if it committed.
pub fn execute(args: RunArgs) -> Result<bool> {
    let batch = args.batch.load()?;

    let mut config = args.batch.config().with_strict_preflight(args.strict);
    if let Some(ms) = args.lock_timeout_ms {
        config = config.with_lock_timeout(Duration::from_millis(ms));
    }
    let base = config.resolve_base_dir()?;
    let rollback_on_error = batch.rollback_on_error && !args.no_rollback;

    let manager = TransactionManager::new(config);
    let report = manager.execute_transaction(&batch.operations, rollback_on_error)?;
    if args.batch.json {
        println!("{}", report.to_json()?);
    } else {
        report.print_summary(&base);
    }

    Ok(report.is_committed())
}
