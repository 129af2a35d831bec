//! Revm handler for Qtum contract outputs.
//!
//! It wraps [`MainnetHandler`] and changes what the ledger does differently from Ethereum:
//! intrinsic gas comes from the governed schedule, nobody is paid a fee inside the EVM, the
//! refund cap follows the schedule, and the top-level frame can be a static call or a create
//! at an address derived from the contract output.

use alloy_primitives::{Address, U256};
use revm::{
    context::{
        result::{FromStringError, HaltReason},
        CreateScheme,
    },
    handler::{EthFrame, EvmTr, EvmTrError, FrameResult, FrameTr, MainnetHandler},
    inspector::{InspectorEvmTr, InspectorHandler, JournalExt},
    interpreter::{
        interpreter::EthInterpreter, interpreter_action::FrameInit, FrameInput, InitialAndFloorGas,
        InstructionResult,
    },
    Database, Inspector, Journal,
};

use super::QtumContext;

/// Native code deposit price revm charges for each byte of deployed code.
const NATIVE_CODE_DEPOSIT: u64 = 200;

/// Shape of the top-level frame, beyond what the transaction environment says.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TopFrame {
    /// As the transaction describes it.
    #[default]
    Plain,
    /// A call that may not change state.
    Static,
    /// A create deploying at a fixed address.
    CreateAt(Address),
    /// A create following the `CREATE2` address rule.
    Create2(U256),
}

/// Revm handler for Qtum. It wraps [`MainnetHandler`] and inherits the frame machinery from it.
#[allow(missing_debug_implementations)]
pub struct QtumHandler<EVM, ERROR, FRAME> {
    mainnet: MainnetHandler<EVM, ERROR, FRAME>,
    intrinsic_gas: u64,
    top_frame: TopFrame,
}

impl<EVM, ERROR, FRAME> QtumHandler<EVM, ERROR, FRAME> {
    /// Creates a handler charging `intrinsic_gas` up front.
    pub fn new(intrinsic_gas: u64, top_frame: TopFrame) -> Self {
        Self { mainnet: MainnetHandler::default(), intrinsic_gas, top_frame }
    }
}

impl<DB, EVM, ERROR, FRAME> revm::handler::Handler for QtumHandler<EVM, ERROR, FRAME>
where
    DB: Database,
    EVM: EvmTr<Context = QtumContext<DB>, Frame = FRAME>,
    ERROR: EvmTrError<EVM> + FromStringError,
    FRAME: FrameTr<FrameResult = FrameResult, FrameInit = FrameInit>,
{
    type Evm = EVM;

    type Error = ERROR;

    type HaltReason = HaltReason;

    /// The executor has already checked the gas limit against the intrinsic gas; the
    /// Ethereum transaction checks do not apply to contract outputs.
    fn validate(&self, _evm: &mut Self::Evm) -> Result<InitialAndFloorGas, Self::Error> {
        Ok(InitialAndFloorGas::new(self.intrinsic_gas, 0))
    }

    fn first_frame_input(
        &mut self,
        evm: &mut Self::Evm,
        gas_limit: u64,
    ) -> Result<FrameInit, Self::Error> {
        let mut init = self.mainnet.first_frame_input(evm, gas_limit)?;
        match (&mut init.frame_input, self.top_frame) {
            (FrameInput::Call(inputs), TopFrame::Static) => inputs.is_static = true,
            (FrameInput::Create(inputs), TopFrame::CreateAt(address)) => {
                inputs.scheme = CreateScheme::Custom { address };
            }
            (FrameInput::Create(inputs), TopFrame::Create2(salt)) => {
                inputs.scheme = CreateScheme::Create2 { salt };
            }
            _ => {}
        }
        Ok(init)
    }

    fn last_frame_result(
        &mut self,
        evm: &mut Self::Evm,
        frame_result: &mut <<Self::Evm as EvmTr>::Frame as FrameTr>::FrameResult,
    ) -> Result<(), Self::Error> {
        // Reprice the code deposit of a top-level create; revm has charged its own price.
        if let FrameResult::Create(outcome) = frame_result {
            if outcome.result.result.is_ok() {
                let len = outcome.result.output.len() as u64;
                let ours = evm.ctx().chain.schedule.create_data_gas.saturating_mul(len);
                let native = NATIVE_CODE_DEPOSIT * len;
                if ours < native {
                    outcome.result.gas.erase_cost(native - ours);
                } else if !outcome.result.gas.record_cost(ours - native) {
                    outcome.result.result = InstructionResult::OutOfGas;
                }
            }
        }
        self.mainnet.last_frame_result(evm, frame_result)
    }

    fn refund(
        &self,
        evm: &mut Self::Evm,
        exec_result: &mut <<Self::Evm as EvmTr>::Frame as FrameTr>::FrameResult,
        eip7702_refund: i64,
    ) {
        let gas = exec_result.gas_mut();
        gas.record_refund(eip7702_refund);
        let refund_delta = gas.refunded();
        let env = &mut evm.ctx().chain;
        let cap = gas.spent() / env.schedule.max_refund_quotient();
        gas.set_refund(refund_delta.max(0).min(i64::try_from(cap).unwrap_or(i64::MAX)));
        env.refund_delta = refund_delta;
    }

    /// Gas of contract outputs is settled on the ledger.
    fn reward_beneficiary(
        &self,
        _evm: &mut Self::Evm,
        _exec_result: &mut <<Self::Evm as EvmTr>::Frame as FrameTr>::FrameResult,
    ) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl<DB, EVM, ERROR> InspectorHandler for QtumHandler<EVM, ERROR, EthFrame<EthInterpreter>>
where
    DB: Database,
    Journal<DB>: JournalExt,
    EVM: InspectorEvmTr<
        Context = QtumContext<DB>,
        Frame = EthFrame<EthInterpreter>,
        Inspector: Inspector<QtumContext<DB>, EthInterpreter>,
    >,
    ERROR: EvmTrError<EVM> + FromStringError,
{
    type IT = EthInterpreter;
}
