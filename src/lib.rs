#![doc = include_str!("../README.md")]

pub mod cli;
pub mod command;
pub mod config;
pub mod error;
pub mod fs;
pub mod verify;

pub use error::*;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Parses the command line and runs the chosen command.
///
/// Returns `Ok(false)` when the command ran but the transaction did not
/// commit.
pub fn run() -> Result<bool> {
    use clap::Parser;
    use command::Command;

    let cli = cli::Cli::parse();

    // A host embedding `run` may already have installed a logger.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_filter()))
        .try_init()
        .ok();

    match cli.command {
        Command::Run(args) => command::run::execute(args),
        Command::Plan(args) => command::plan::execute(args),
    }
}
