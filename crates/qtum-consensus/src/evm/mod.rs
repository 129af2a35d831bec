//! The EVM execution bridge.
//!
//! Contract outputs of ledger transactions are converted into [`QtumTransaction`]s and run
//! by an [`Executor`] against an explicit [`ContractState`]. Execution runs on revm; gas costs
//! come from a runtime [`GasSchedule`] read by the [`QtumInstructions`] table, so that schedules
//! published by the governance contracts take effect without a code change.
//!
//! Value moved by a successful execution is carried to the ledger by the condensing
//! transaction [`condense`] builds.
//!
//! Execution failures are never errors: they are reported through
//! [`ExecutionResult::status`], and the state is left as it was before the failing frame.

mod condensing;
mod db;
mod executor;
mod handler;
mod host;
mod instructions;
mod result;
mod schedule;
mod state;
mod storage;
mod transaction;
mod transfers;

pub use condensing::*;
pub use db::*;
pub use executor::*;
pub use handler::*;
pub use host::*;
pub use instructions::*;
pub use result::*;
pub use schedule::*;
pub use state::*;
pub use storage::*;
pub use transaction::*;
pub use transfers::*;

use crate::{script::ScriptError, OutPoint};

/// Error converting ledger transactions into EVM transactions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvmError {
    /// A contract output is malformed.
    #[error("invalid contract output: {0}")]
    Script(#[from] ScriptError),
    /// The transaction has no inputs to take the sender from.
    #[error("contract transaction has no inputs")]
    MissingInputs,
    /// The output spent by the first input is unknown.
    #[error("output {0:?} spent by the first input is unknown")]
    MissingPrevout(OutPoint),
    /// The output spent by the first input does not pay a key hash.
    #[error("output {0:?} spent by the first input does not identify a sender")]
    InvalidSender(OutPoint),
}
