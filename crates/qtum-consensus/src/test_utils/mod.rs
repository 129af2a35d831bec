//! Test utilities for the consensus core.

mod bytecode;
mod chain;
mod governance;
mod transactions;

pub use bytecode::*;
pub use chain::*;
pub use governance::*;
pub use transactions::*;
