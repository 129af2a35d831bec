use clap::Parser;

use crate::common::{LogArgs, MinerError};

/// Main command enumeration for the qtum-miner tool
#[derive(Parser, Debug)]
#[command(infer_subcommands = true, version)]
pub enum MainCmd {
    /// Assemble a block template from a mempool snapshot
    Template(crate::template::Cmd),
    /// Show the gas parameters governing a height
    GasParams(crate::gas::Cmd),
    /// Compute the compact target of the next block
    NextTarget(crate::target::Cmd),
}

/// Error types for the main command system
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Error of a subcommand.
    #[error("{0}")]
    Miner(#[from] MinerError),
}

impl MainCmd {
    /// Logging configuration of the chosen subcommand.
    pub const fn log_args(&self) -> &LogArgs {
        match self {
            Self::Template(cmd) => &cmd.log_args,
            Self::GasParams(cmd) => &cmd.log_args,
            Self::NextTarget(cmd) => &cmd.log_args,
        }
    }

    /// Execute the main command
    pub fn run(&self) -> Result<(), Error> {
        match self {
            Self::Template(cmd) => cmd.run()?,
            Self::GasParams(cmd) => cmd.run()?,
            Self::NextTarget(cmd) => cmd.run()?,
        }
        Ok(())
    }
}
