use crate::command::BatchArgs;
use crate::error::Result;
use crate::fs::TransactionManager;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
pub struct PlanArgs {
    #[command(flatten)]
    pub batch: BatchArgs,
}

pub fn execute(args: PlanArgs) -> Result<bool> {
    let batch = args.batch.load()?;
    let config = args.batch.config().with_strict_preflight(true);
    let base = config.resolve_base_dir()?;

    let plan = TransactionManager::new(config).plan(&batch.operations)?;
    if args.batch.json {
        println!("{}", plan.to_json()?);
    } else {
        plan.print_summary(&base);
    }

    Ok(true)
}
