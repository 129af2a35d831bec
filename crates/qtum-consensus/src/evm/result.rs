use alloy_primitives::{Address, Bytes, Log};

use super::ValueTransfer;
use serde::{Deserialize, Serialize};

/// Outcome of an EVM frame or transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Completed normally.
    Success,
    /// Reverted by `REVERT`; remaining gas is returned.
    Revert,
    /// Ran out of gas.
    OutOfGas,
    /// Hit an undefined or disabled opcode.
    BadInstruction,
    /// Jumped to a position that is not a `JUMPDEST`.
    BadJumpDestination,
    /// Pushed beyond the stack limit.
    StackOverflow,
    /// Popped from an empty stack.
    StackUnderflow,
    /// Any other failure: call depth, insufficient balance, static violation, address
    /// collision, oversized code.
    Exception,
}

impl ExecutionStatus {
    /// Returns whether the frame's state changes are kept.
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    /// Returns whether the frame's remaining gas is returned to the caller.
    pub const fn returns_gas(self) -> bool {
        matches!(self, Self::Success | Self::Revert)
    }
}

/// Result of one contract create or call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Outcome.
    pub status: ExecutionStatus,
    /// Gas consumed, after refunds.
    pub gas_used: u64,
    /// Gas refunded by storage clearing and self-destructs, already deducted from `gas_used`.
    pub gas_refunded: u64,
    /// Return data of a call, or revert data.
    pub output: Bytes,
    /// Logs emitted, empty unless the execution succeeded.
    pub logs: Vec<Log>,
    /// Address of the created contract, for successful creates.
    pub created_address: Option<Address>,
    /// Net change of the refund counter over the execution, before capping.
    pub refund_delta: i64,
    /// Value moved between accounts, empty unless the execution succeeded.
    pub transfers: Vec<ValueTransfer>,
}

impl ExecutionResult {
    /// A result for work rejected before execution, consuming `gas_used`.
    pub fn failed(status: ExecutionStatus, gas_used: u64) -> Self {
        Self {
            status,
            gas_used,
            gas_refunded: 0,
            output: Bytes::new(),
            logs: Vec::new(),
            created_address: None,
            refund_delta: 0,
            transfers: Vec::new(),
        }
    }

    /// Returns whether the execution succeeded.
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }
}
