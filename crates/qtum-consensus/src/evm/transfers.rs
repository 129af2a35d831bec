//! Value transfers made during an execution.
//!
//! Coins moved by the EVM have to be moved on the ledger too. [`TransferTracker`] watches the
//! frames of an execution and keeps the transfers of every frame that did not fail.

use alloy_primitives::{Address, U256};
use revm::{
    context::ContextTr,
    interpreter::{CallInputs, CallOutcome, CreateInputs, CreateOutcome},
    Inspector,
};
use serde::{Deserialize, Serialize};

/// Value moved from one account to another by a successful frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueTransfer {
    /// Paying account.
    pub from: Address,
    /// Receiving account.
    pub to: Address,
    /// Amount moved, never zero.
    pub value: U256,
}

/// Inspector recording the value transfers of an execution.
#[derive(Debug, Default)]
pub struct TransferTracker {
    transfers: Vec<ValueTransfer>,
    // Length of `transfers` when each open frame started.
    frames: Vec<usize>,
}

impl TransferTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// The transfers recorded so far, in execution order.
    pub fn transfers(&self) -> &[ValueTransfer] {
        &self.transfers
    }

    /// Consumes the tracker, returning its transfers.
    pub fn into_transfers(self) -> Vec<ValueTransfer> {
        self.transfers
    }

    fn enter(&mut self) {
        self.frames.push(self.transfers.len());
    }

    fn exit(&mut self, success: bool) {
        if let Some(start) = self.frames.pop() {
            if !success {
                self.transfers.truncate(start);
            }
        }
    }

    fn record(&mut self, from: Address, to: Address, value: U256) {
        if !value.is_zero() && from != to {
            self.transfers.push(ValueTransfer { from, to, value });
        }
    }
}

impl<CTX: ContextTr> Inspector<CTX> for TransferTracker {
    fn call(&mut self, _context: &mut CTX, inputs: &mut CallInputs) -> Option<CallOutcome> {
        self.enter();
        if let Some(value) = inputs.transfer_value() {
            self.record(inputs.caller, inputs.target_address, value);
        }
        None
    }

    fn call_end(&mut self, _context: &mut CTX, _inputs: &CallInputs, outcome: &mut CallOutcome) {
        self.exit(outcome.result.result.is_ok());
    }

    fn create(&mut self, _context: &mut CTX, _inputs: &mut CreateInputs) -> Option<CreateOutcome> {
        self.enter();
        None
    }

    fn create_end(
        &mut self,
        _context: &mut CTX,
        inputs: &CreateInputs,
        outcome: &mut CreateOutcome,
    ) {
        let success = outcome.result.result.is_ok();
        self.exit(success);
        if let (true, Some(address)) = (success, outcome.address) {
            self.record(inputs.caller, address, inputs.value);
        }
    }

    fn selfdestruct(&mut self, contract: Address, target: Address, value: U256) {
        self.record(contract, target, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_frames_drop_their_transfers() {
        let (a, b, c) = (Address::repeat_byte(1), Address::repeat_byte(2), Address::repeat_byte(3));
        let mut tracker = TransferTracker::new();

        tracker.enter();
        tracker.record(a, b, U256::from(5));
        tracker.enter();
        tracker.record(b, c, U256::from(2));
        tracker.exit(false);
        tracker.enter();
        tracker.record(b, a, U256::ZERO);
        tracker.record(c, c, U256::from(1));
        tracker.exit(true);
        tracker.exit(true);

        assert_eq!(
            tracker.into_transfers(),
            vec![ValueTransfer { from: a, to: b, value: U256::from(5) }]
        );
    }
}
