pub mod plan;
pub mod run;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::fs::OperationSpec;

use anyhow::Context;
use clap::{Args, Subcommand};
use serde::Deserialize;
use std::io::Read;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Command {
    /// Execute a batch of operations atomically.
    Run(run::RunArgs),
    /// Validate a batch and show what it would do, without touching anything.
    Plan(plan::PlanArgs),
}

/// Arguments shared by every subcommand that reads a batch.
#[derive(Args, Debug, Clone)]
pub struct BatchArgs {
    /// JSON file with the operations, or `-` for stdin
    ///
    /// Either an array of operations or an object
    /// `{"operations": [...], "rollbackOnError": bool}`.
    #[arg(value_name = "FILE", verbatim_doc_comment)]
    pub file: PathBuf,

    /// Directory relative paths are resolved against (defaults to current directory)
    #[arg(long, value_name = "DIR")]
    pub base_dir: Option<PathBuf>,

    /// Print the result as JSON instead of a summary
    #[arg(long)]
    pub json: bool,
}

/// A parsed batch file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub operations: Vec<OperationSpec>,
    pub rollback_on_error: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BatchFile {
    List(Vec<OperationSpec>),
    #[serde(rename_all = "camelCase")]
    Object {
        operations: Vec<OperationSpec>,
        #[serde(default = "default_rollback")]
        rollback_on_error: bool,
    },
}

fn default_rollback() -> bool {
    true
}

impl Batch {
    pub fn parse(json: &str) -> Result<Self> {
        let batch = match serde_json::from_str::<BatchFile>(json)? {
            BatchFile::List(operations) => Batch {
                operations,
                rollback_on_error: true,
            },
            BatchFile::Object {
                operations,
                rollback_on_error,
            } => Batch {
                operations,
                rollback_on_error,
            },
        };
        Ok(batch)
    }
}

impl BatchArgs {
    pub fn load(&self) -> Result<Batch> {
        let json = if self.file.as_os_str() == "-" {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read batch from stdin")?;
            buf
        } else {
            std::fs::read_to_string(&self.file)
                .with_context(|| format!("Failed to read batch file {}", self.file.display()))?
        };

        let batch = Batch::parse(&json)?;
        log::debug!(
            "Loaded {} operation(s) from {}",
            batch.operations.len(),
            self.file.display()
        );
        Ok(batch)
    }

    pub fn config(&self) -> EngineConfig {
        let config = EngineConfig::default();
        match &self.base_dir {
            Some(dir) => config.with_base_dir(dir),
            None => config,
        }
    }
}
