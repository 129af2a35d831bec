//! Library side of the `qtum-miner` tool: argument groups and the subcommands.

mod cmd;
pub use cmd::*;

/// Argument groups and helpers shared by the subcommands.
pub mod common;

/// Block template assembly.
pub mod template;

/// Governed gas parameters.
pub mod gas;

/// Next target computation.
pub mod target;
