use crate::command::Command;
use clap::Parser;

#[derive(Parser)]
#[command(name = "fstxn", version, about = "Apply a batch of file operations as one transaction")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

impl Cli {
    /// Default `env_logger` filter for the requested verbosity. `RUST_LOG`
    /// still takes precedence.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}
