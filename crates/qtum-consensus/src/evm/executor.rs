use std::convert::Infallible;

use alloy_primitives::{keccak256, Address, Bytes, TxKind, U256};
use revm::{
    context::{
        result::{EVMError, ExecutionResult as RevmResult, HaltReason, Output},
        ContextTr, Evm, JournalTr, TxEnv,
    },
    handler::{EthFrame, EthPrecompiles},
    inspector::InspectorHandler,
    interpreter::interpreter::EthInterpreter,
    DatabaseCommit,
};
use tracing::{debug, trace};

use super::{
    qtum_context, BlockEnv, ContractState, ExecutionResult, ExecutionStatus, GasSchedule,
    QtumHandler, QtumInstructions, QtumTransaction, StateDb, TopFrame, TransferTracker,
};

/// Parameters of a message call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallParams {
    /// Calling account.
    pub sender: Address,
    /// Called contract.
    pub receiver: Address,
    /// Value moved from sender to receiver.
    pub value: U256,
    /// Gas available to the call.
    pub gas_limit: u64,
    /// Call data.
    pub data: Bytes,
    /// Whether state changes are forbidden.
    pub is_static: bool,
}

/// One run of the EVM, before it is handed to revm.
#[derive(Debug)]
struct Message {
    caller: Address,
    kind: TxKind,
    value: U256,
    gas_limit: u64,
    data: Bytes,
    gas_price: U256,
    intrinsic_gas: u64,
    top_frame: TopFrame,
    // Value brought into the EVM from the ledger before execution.
    credit: Option<(Address, U256)>,
    // Accounts dropped from the state after a successful run.
    discard: Vec<Address>,
}

/// The EVM execution bridge.
///
/// An executor borrows the contract state for its lifetime and runs messages and contract
/// transactions against it through revm. A failed execution leaves no trace in the state:
/// changes are only committed when the top-level frame succeeds.
#[derive(Debug)]
pub struct Executor<'a> {
    state: &'a mut ContractState,
    schedule: GasSchedule,
    block: BlockEnv,
}

impl<'a> Executor<'a> {
    /// Creates an executor running against `state` with the given schedule and block.
    pub fn new(state: &'a mut ContractState, schedule: GasSchedule, block: BlockEnv) -> Self {
        Self { state, schedule, block }
    }

    /// The state executed against.
    pub fn state(&self) -> &ContractState {
        &*self.state
    }

    /// The schedule in force.
    pub const fn gas_schedule(&self) -> &GasSchedule {
        &self.schedule
    }

    /// Deploys `init_code` from `sender`.
    ///
    /// The contract address follows the `CREATE` rule, or the `CREATE2` rule when a salt is
    /// given.
    pub fn create(
        &mut self,
        sender: Address,
        value: U256,
        gas_limit: u64,
        init_code: Bytes,
        salt: Option<U256>,
    ) -> ExecutionResult {
        if let Some(result) = self.check_initcode(&init_code, gas_limit) {
            return result;
        }
        self.run(Message {
            caller: sender,
            kind: TxKind::Create,
            value,
            gas_limit,
            data: init_code,
            gas_price: U256::ZERO,
            intrinsic_gas: 0,
            top_frame: salt.map_or(TopFrame::Plain, TopFrame::Create2),
            credit: None,
            discard: Vec::new(),
        })
    }

    /// Runs a message call.
    pub fn call(&mut self, params: CallParams) -> ExecutionResult {
        self.run(Message {
            caller: params.sender,
            kind: TxKind::Call(params.receiver),
            value: params.value,
            gas_limit: params.gas_limit,
            data: params.data,
            gas_price: U256::ZERO,
            intrinsic_gas: 0,
            top_frame: if params.is_static { TopFrame::Static } else { TopFrame::Plain },
            credit: None,
            discard: Vec::new(),
        })
    }

    /// Executes a contract output.
    ///
    /// The output's value is credited to the sender before execution, mirroring the coins the
    /// ledger transaction moved into the EVM. Intrinsic gas is charged first; an output whose
    /// gas limit does not cover it consumes its whole gas limit without running. The sender and
    /// block author accounts do not outlive the execution: their coins live on the ledger.
    /// Creations may not carry value.
    pub fn transact(&mut self, tx: &QtumTransaction) -> ExecutionResult {
        if tx.is_create() && !tx.value.is_zero() {
            trace!(target: "qtum::evm", txid = %tx.txid, vout = tx.vout, "contract creation carries value");
            return ExecutionResult::failed(ExecutionStatus::Exception, tx.gas_limit);
        }
        let intrinsic_gas = self.schedule.intrinsic_gas(&tx.data, tx.is_create());
        if tx.gas_limit < intrinsic_gas {
            trace!(target: "qtum::evm", txid = %tx.txid, vout = tx.vout, intrinsic_gas, "gas limit below intrinsic gas");
            return ExecutionResult::failed(ExecutionStatus::OutOfGas, tx.gas_limit);
        }
        if tx.is_create() {
            if let Some(result) = self.check_initcode(&tx.data, tx.gas_limit) {
                return result;
            }
        }

        let target = tx.contract_address();
        let (kind, top_frame) = if tx.is_create() {
            (TxKind::Create, TopFrame::CreateAt(target))
        } else {
            (TxKind::Call(target), TopFrame::Plain)
        };
        let result = self.run(Message {
            caller: tx.sender,
            kind,
            value: tx.value,
            gas_limit: tx.gas_limit,
            data: tx.data.clone(),
            gas_price: U256::from(tx.gas_price),
            intrinsic_gas,
            top_frame,
            credit: Some((tx.sender, tx.value)),
            discard: vec![tx.sender, self.block.coinbase],
        });
        trace!(
            target: "qtum::evm",
            txid = %tx.txid,
            vout = tx.vout,
            status = ?result.status,
            gas_used = result.gas_used,
            transfers = result.transfers.len(),
            "executed contract output"
        );
        result
    }

    /// Rejects init code over the size limit in force.
    fn check_initcode(&self, init_code: &[u8], gas_limit: u64) -> Option<ExecutionResult> {
        (self.schedule.upgrades.shanghai &&
            init_code.len() as u64 > self.schedule.max_initcode_size)
            .then(|| ExecutionResult::failed(ExecutionStatus::Exception, gas_limit))
    }

    fn run(&mut self, message: Message) -> ExecutionResult {
        let nonce = self.state.account(&message.caller).map(|account| account.nonce).unwrap_or_default();
        let tx = TxEnv {
            caller: message.caller,
            kind: message.kind,
            value: message.value,
            gas_limit: message.gas_limit,
            data: message.data,
            nonce,
            gas_price: 0,
            ..Default::default()
        };

        let (outcome, changes, transfers, refund_delta) = {
            let mut db = StateDb::new(&*self.state, &self.block.block_hashes);
            if let Some((address, value)) = message.credit {
                db = db.with_credit(address, value);
            }
            let context = qtum_context(db, &self.schedule, &self.block, tx, message.gas_price);
            let mut evm = Evm::new_with_inspector(
                context,
                TransferTracker::new(),
                QtumInstructions::new(),
                EthPrecompiles::default(),
            );
            let mut handler = QtumHandler::<_, EVMError<Infallible>, EthFrame<EthInterpreter>>::new(
                message.intrinsic_gas,
                message.top_frame,
            );
            let outcome = handler.inspect_run(&mut evm);
            let changes = evm.ctx.journal_mut().finalize();
            (outcome, changes, evm.inspector.into_transfers(), evm.ctx.chain.refund_delta)
        };

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(error) => {
                debug!(target: "qtum::evm", caller = %message.caller, %error, "message rejected");
                return ExecutionResult::failed(ExecutionStatus::Exception, 0);
            }
        };

        let mut result = ExecutionResult::failed(ExecutionStatus::Success, 0);
        match outcome {
            RevmResult::Success { gas_used, gas_refunded, logs, output, .. } => {
                result.gas_used = gas_used;
                result.gas_refunded = gas_refunded;
                result.logs = logs;
                result.refund_delta = refund_delta;
                result.transfers = transfers;
                match output {
                    Output::Call(output) => result.output = output,
                    Output::Create(_, address) => result.created_address = address,
                }
                self.state.commit(changes);
                for address in &message.discard {
                    self.state.remove_account(address);
                }
            }
            RevmResult::Revert { gas_used, output } => {
                result.status = ExecutionStatus::Revert;
                result.gas_used = gas_used;
                result.output = output;
            }
            RevmResult::Halt { reason, gas_used } => {
                result.status = halt_status(reason);
                result.gas_used = gas_used;
            }
        }
        result
    }
}

/// The status reported for a halted execution.
pub fn halt_status(reason: HaltReason) -> ExecutionStatus {
    match reason {
        HaltReason::OutOfGas(_) => ExecutionStatus::OutOfGas,
        HaltReason::OpcodeNotFound | HaltReason::InvalidFEOpcode | HaltReason::NotActivated => {
            ExecutionStatus::BadInstruction
        }
        HaltReason::InvalidJump => ExecutionStatus::BadJumpDestination,
        HaltReason::StackOverflow => ExecutionStatus::StackOverflow,
        HaltReason::StackUnderflow => ExecutionStatus::StackUnderflow,
        _ => ExecutionStatus::Exception,
    }
}

/// Address of a contract deployed by `CREATE2`.
pub fn create2_address(sender: Address, salt: U256, init_code: &[u8]) -> Address {
    sender.create2(salt.to_be_bytes::<32>(), keccak256(init_code).0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;
    use revm::context::result::OutOfGasError;

    #[test]
    fn create2_address_matches_eip_1014_example() {
        assert_eq!(
            create2_address(Address::ZERO, U256::ZERO, &[0x00]),
            address!("0x4d1a2e2bb4f88f0250f26ffff098b0b30b26bf38")
        );
    }

    #[test]
    fn halts_map_to_statuses() {
        assert_eq!(halt_status(HaltReason::OutOfGas(OutOfGasError::Basic)), ExecutionStatus::OutOfGas);
        assert_eq!(halt_status(HaltReason::InvalidFEOpcode), ExecutionStatus::BadInstruction);
        assert_eq!(halt_status(HaltReason::InvalidJump), ExecutionStatus::BadJumpDestination);
        assert_eq!(halt_status(HaltReason::CallTooDeep), ExecutionStatus::Exception);
    }

    #[test]
    fn creations_with_value_fail() {
        let mut state = ContractState::new();
        let tx = QtumTransaction {
            kind: crate::script::ContractKind::Create,
            sender: Address::repeat_byte(1),
            receiver: None,
            value: U256::from(1),
            gas_limit: 100_000,
            gas_price: 40,
            data: Bytes::from_static(&[0x00]),
            version: crate::script::VersionVm::EVM,
            txid: Default::default(),
            vout: 0,
        };
        let result = Executor::new(&mut state, GasSchedule::eip158(), BlockEnv::default()).transact(&tx);
        assert_eq!(result.status, ExecutionStatus::Exception);
        assert_eq!(result.gas_used, 100_000);
        assert_eq!(state, ContractState::new());
    }

    #[test]
    fn create_deploys_at_the_nonce_address() {
        let sender = address!("0x6ac7ea33f8831ea9dcc53393aaa88b25a785dbf0");
        let mut state = ContractState::new();
        state.account_mut(sender).nonce = 2;
        let mut executor = Executor::new(&mut state, GasSchedule::eip158(), BlockEnv::default());

        // Init code returning empty runtime code.
        let init_code = Bytes::from_static(&[0x60, 0x00, 0x60, 0x00, 0xf3]);
        let result = executor.create(sender, U256::ZERO, 100_000, init_code, None);
        assert!(result.is_success(), "{result:?}");
        assert_eq!(result.created_address, Some(sender.create(2)));
        assert_eq!(sender.create(2), address!("0xf778b86fa74e846c4f0a1fbd1335fe81c00a0c91"));
        assert_eq!(state.account(&sender).unwrap().nonce, 3);
    }
}
