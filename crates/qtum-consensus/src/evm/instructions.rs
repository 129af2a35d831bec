//! The Qtum instruction table: revm's instructions, priced by the governed gas schedule.
//!
//! Most opcodes keep revm's implementation and only have their static cost moved from revm's
//! price to the schedule's: [`repriced`] charges (or returns) the difference before handing
//! over to the native instruction. `SSTORE`, the call family, `SELFDESTRUCT` and `GASPRICE`
//! depend on the schedule beyond a static cost and are rewritten in full.

use core::cmp::min;

use alloy_primitives::U256;
use revm::{
    bytecode::opcode,
    handler::instructions::{EthInstructions, InstructionProvider},
    interpreter::{
        gas::warm_cold_cost_with_delegation,
        instructions::{
            contract::get_memory_input_and_out_ranges, control, instruction_table,
            utility::IntoAddress,
        },
        interpreter::EthInterpreter,
        interpreter_types::{InputsTr, LoopControl, RuntimeFlag, StackTr},
        push, require_non_staticcall, CallInput, CallInputs, CallScheme, CallValue, FrameInput,
        InstructionContext, InstructionResult, InstructionTable, InterpreterAction,
    },
    Database,
};

use super::{
    classify_storage_write, legacy_storage_refund_delta, storage_refund_delta, storage_write_cost,
    GasSchedule, QtumContext, QtumHost,
};
use crate::constants::evm::{COLD_ACCOUNT_ACCESS_COST, COLD_SLOAD_COST};

/// Static costs revm's own instructions charge, under the rule sets the schedule maps to.
mod native {
    pub(super) const BASE: u64 = 2;
    pub(super) const VERYLOW: u64 = 3;
    pub(super) const LOW: u64 = 5;
    pub(super) const MID: u64 = 8;
    pub(super) const HIGH: u64 = 10;
    pub(super) const BLOCKHASH: u64 = 20;
    pub(super) const JUMPDEST: u64 = 1;
    pub(super) const EXP: u64 = 10;
    pub(super) const EXP_BYTE: u64 = 50;
    pub(super) const KECCAK256: u64 = 30;
    pub(super) const KECCAK256_WORD: u64 = 6;
    pub(super) const COPY_WORD: u64 = 3;
    pub(super) const LOG: u64 = 375;
    pub(super) const LOG_TOPIC: u64 = 375;
    pub(super) const LOG_DATA: u64 = 8;
    pub(super) const CREATE: u64 = 32_000;
    pub(super) const SLOAD_PETERSBURG: u64 = 200;
    pub(super) const SLOAD_ISTANBUL: u64 = 800;
    pub(super) const BALANCE_PETERSBURG: u64 = 400;
    pub(super) const BALANCE_ISTANBUL: u64 = 700;
    pub(super) const EXT_ACCOUNT: u64 = 700;
}

/// `QtumInstructions` is the instruction table Qtum contracts run on.
#[derive(Clone)]
pub struct QtumInstructions<DB: Database> {
    inner: EthInstructions<EthInterpreter, QtumContext<DB>>,
}

impl<DB: Database> core::fmt::Debug for QtumInstructions<DB> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("QtumInstructions").finish_non_exhaustive()
    }
}

impl<DB: Database> Default for QtumInstructions<DB> {
    fn default() -> Self {
        Self::new()
    }
}

impl<DB: Database> QtumInstructions<DB> {
    /// Creates the instruction table. Prices are read from the context's schedule at execution
    /// time, so one table serves every height.
    pub fn new() -> Self {
        let mut inner = EthInstructions::new_mainnet();

        macro_rules! reprice {
            ($($op:ident),* $(,)?) => {
                $( inner.insert_instruction(opcode::$op, repriced::<{ opcode::$op }, _>); )*
            };
        }

        reprice!(STOP, RETURN, REVERT);
        reprice!(
            ADDRESS, ORIGIN, CALLER, CALLVALUE, CALLDATASIZE, CODESIZE, COINBASE, TIMESTAMP,
            NUMBER, DIFFICULTY, GASLIMIT, RETURNDATASIZE, POP, PC, MSIZE, GAS, CHAINID, BASEFEE,
            PUSH0,
        );
        reprice!(
            ADD, SUB, NOT, LT, GT, SLT, SGT, EQ, ISZERO, AND, OR, XOR, BYTE, SHL, SHR, SAR,
            CALLDATALOAD, MLOAD, MSTORE, MSTORE8, CALLDATACOPY, CODECOPY, RETURNDATACOPY, MCOPY,
        );
        reprice!(
            PUSH1, PUSH2, PUSH3, PUSH4, PUSH5, PUSH6, PUSH7, PUSH8, PUSH9, PUSH10, PUSH11, PUSH12,
            PUSH13, PUSH14, PUSH15, PUSH16, PUSH17, PUSH18, PUSH19, PUSH20, PUSH21, PUSH22, PUSH23,
            PUSH24, PUSH25, PUSH26, PUSH27, PUSH28, PUSH29, PUSH30, PUSH31, PUSH32,
        );
        reprice!(
            DUP1, DUP2, DUP3, DUP4, DUP5, DUP6, DUP7, DUP8, DUP9, DUP10, DUP11, DUP12, DUP13,
            DUP14, DUP15, DUP16,
        );
        reprice!(
            SWAP1, SWAP2, SWAP3, SWAP4, SWAP5, SWAP6, SWAP7, SWAP8, SWAP9, SWAP10, SWAP11, SWAP12,
            SWAP13, SWAP14, SWAP15, SWAP16,
        );
        reprice!(MUL, DIV, SDIV, MOD, SMOD, SIGNEXTEND, SELFBALANCE, ADDMOD, MULMOD, JUMP, JUMPI);
        reprice!(BLOCKHASH, JUMPDEST, EXP, KECCAK256, LOG0, LOG1, LOG2, LOG3, LOG4, CREATE, CREATE2);
        reprice!(SLOAD, BALANCE, EXTCODESIZE, EXTCODECOPY);

        inner.insert_instruction(opcode::SSTORE, sstore);
        inner.insert_instruction(opcode::CALL, call);
        inner.insert_instruction(opcode::CALLCODE, call_code);
        inner.insert_instruction(opcode::DELEGATECALL, delegate_call);
        inner.insert_instruction(opcode::STATICCALL, static_call);
        inner.insert_instruction(opcode::SELFDESTRUCT, selfdestruct);
        inner.insert_instruction(opcode::GASPRICE, gasprice);
        // No blob transactions on Qtum.
        inner.insert_instruction(opcode::BLOBHASH, control::unknown);
        inner.insert_instruction(opcode::BLOBBASEFEE, control::unknown);

        Self { inner }
    }
}

impl<DB: Database> InstructionProvider for QtumInstructions<DB> {
    type Context = QtumContext<DB>;
    type InterpreterTypes = EthInterpreter;

    fn instruction_table(&self) -> &InstructionTable<Self::InterpreterTypes, Self::Context> {
        self.inner.instruction_table()
    }
}

/// Runs revm's `OP` after charging the difference between the schedule's static cost and
/// revm's.
pub fn repriced<const OP: u8, H: QtumHost + ?Sized>(
    context: InstructionContext<'_, H, EthInterpreter>,
) {
    let delta = repricing(OP, context.host.gas_schedule(), context.interpreter.stack.data());
    if delta > 0 {
        revm::interpreter::gas!(context.interpreter, u64::try_from(delta).unwrap_or(u64::MAX));
    } else if delta < 0 {
        context.interpreter.gas.erase_cost(u64::try_from(-delta).unwrap_or(u64::MAX));
    }
    let native = const { instruction_table::<EthInterpreter, H>()[OP as usize] };
    native(context);
}

/// Gas the schedule charges for `op` minus what revm's instruction charges, given the operand
/// stack before execution (top last).
pub fn repricing(op: u8, schedule: &GasSchedule, stack: &[U256]) -> i128 {
    let operand = |depth: usize| {
        stack.len().checked_sub(depth + 1).map(|index| stack[index]).unwrap_or_default()
    };
    let words = |depth: usize| -> i128 {
        u64::try_from(operand(depth)).map_or(0, |len| len.div_ceil(32)).into()
    };
    let diff = |ours: u64, theirs: u64| i128::from(ours) - i128::from(theirs);
    let tier = |index: usize, theirs: u64| diff(schedule.tier(index), theirs);
    let copy = |depth: usize| diff(schedule.copy_gas, native::COPY_WORD) * words(depth);
    let upgrades = schedule.upgrades;

    match op {
        opcode::STOP | opcode::RETURN | opcode::REVERT => tier(0, 0),
        opcode::ADDRESS |
        opcode::ORIGIN |
        opcode::CALLER |
        opcode::CALLVALUE |
        opcode::CALLDATASIZE |
        opcode::CODESIZE |
        opcode::COINBASE |
        opcode::TIMESTAMP |
        opcode::NUMBER |
        opcode::DIFFICULTY |
        opcode::GASLIMIT |
        opcode::RETURNDATASIZE |
        opcode::POP |
        opcode::PC |
        opcode::MSIZE |
        opcode::GAS |
        opcode::CHAINID |
        opcode::BASEFEE |
        opcode::PUSH0 => tier(1, native::BASE),
        opcode::CALLDATACOPY | opcode::CODECOPY | opcode::RETURNDATACOPY | opcode::MCOPY => {
            tier(2, native::VERYLOW) + copy(2)
        }
        opcode::ADD |
        opcode::SUB |
        opcode::NOT |
        opcode::LT |
        opcode::GT |
        opcode::SLT |
        opcode::SGT |
        opcode::EQ |
        opcode::ISZERO |
        opcode::AND |
        opcode::OR |
        opcode::XOR |
        opcode::BYTE |
        opcode::SHL |
        opcode::SHR |
        opcode::SAR |
        opcode::CALLDATALOAD |
        opcode::MLOAD |
        opcode::MSTORE |
        opcode::MSTORE8 |
        opcode::PUSH1..=opcode::PUSH32 |
        opcode::DUP1..=opcode::DUP16 |
        opcode::SWAP1..=opcode::SWAP16 => tier(2, native::VERYLOW),
        opcode::MUL |
        opcode::DIV |
        opcode::SDIV |
        opcode::MOD |
        opcode::SMOD |
        opcode::SIGNEXTEND |
        opcode::SELFBALANCE => tier(3, native::LOW),
        opcode::ADDMOD | opcode::MULMOD | opcode::JUMP => tier(4, native::MID),
        opcode::JUMPI => tier(5, native::HIGH),
        opcode::BLOCKHASH => tier(6, native::BLOCKHASH),
        opcode::JUMPDEST => diff(schedule.jumpdest_gas, native::JUMPDEST),
        opcode::EXP => {
            let bytes = i128::from(operand(1).bit_len().div_ceil(8) as u64);
            diff(schedule.exp_gas, native::EXP) + diff(schedule.exp_byte_gas, native::EXP_BYTE) * bytes
        }
        opcode::KECCAK256 => {
            diff(schedule.sha3_gas, native::KECCAK256) +
                diff(schedule.sha3_word_gas, native::KECCAK256_WORD) * words(1)
        }
        opcode::LOG0..=opcode::LOG4 => {
            let topics = i128::from(op - opcode::LOG0);
            let bytes = u64::try_from(operand(1)).map_or(0, i128::from);
            diff(schedule.log_gas, native::LOG) +
                diff(schedule.log_topic_gas, native::LOG_TOPIC) * topics +
                diff(schedule.log_data_gas, native::LOG_DATA) * bytes
        }
        opcode::CREATE => diff(schedule.create_gas, native::CREATE),
        opcode::CREATE2 => {
            diff(schedule.create_gas, native::CREATE) +
                diff(schedule.sha3_word_gas, native::KECCAK256_WORD) * words(2)
        }
        // From London on these follow the warm/cold access rules, which the schedule does
        // not govern.
        opcode::SLOAD if !upgrades.london => diff(
            schedule.sload_gas,
            if upgrades.istanbul { native::SLOAD_ISTANBUL } else { native::SLOAD_PETERSBURG },
        ),
        opcode::BALANCE if !upgrades.london => diff(
            schedule.balance_gas,
            if upgrades.istanbul { native::BALANCE_ISTANBUL } else { native::BALANCE_PETERSBURG },
        ),
        opcode::EXTCODESIZE if !upgrades.london => {
            diff(schedule.extcodesize_gas, native::EXT_ACCOUNT)
        }
        opcode::EXTCODECOPY => {
            let access = if upgrades.london {
                0
            } else {
                diff(schedule.extcodecopy_gas, native::EXT_ACCOUNT)
            };
            access + copy(3)
        }
        _ => 0,
    }
}

/// `SSTORE`, priced and refunded by the schedule.
pub fn sstore<H: QtumHost + ?Sized>(context: InstructionContext<'_, H, EthInterpreter>) {
    require_non_staticcall!(context.interpreter);
    let Some([index, value]) = StackTr::popn(&mut context.interpreter.stack) else {
        context.interpreter.halt(InstructionResult::StackUnderflow);
        return;
    };

    let schedule = context.host.gas_schedule();
    if schedule.upgrades.istanbul && context.interpreter.gas.remaining() <= schedule.call_stipend {
        context.interpreter.halt(InstructionResult::ReentrancySentryOOG);
        return;
    }

    let target = context.interpreter.input.target_address();
    let Some(load) = context.host.sstore(target, index, value) else {
        context.interpreter.halt(InstructionResult::FatalExternalError);
        return;
    };

    let schedule = context.host.gas_schedule();
    let write = &load.data;
    let status = classify_storage_write(write.original_value, write.present_value, write.new_value);
    let mut cost = storage_write_cost(schedule, status, write.present_value, write.new_value);
    if schedule.upgrades.london && load.is_cold {
        cost += COLD_SLOAD_COST;
    }
    let refund = if schedule.upgrades.istanbul {
        storage_refund_delta(schedule, status)
    } else {
        legacy_storage_refund_delta(schedule, write.present_value, write.new_value)
    };

    revm::interpreter::gas!(context.interpreter, cost);
    context.interpreter.gas.record_refund(refund);
}

/// `CALL`.
pub fn call<H: QtumHost + ?Sized>(context: InstructionContext<'_, H, EthInterpreter>) {
    message_call(context, CallScheme::Call);
}

/// `CALLCODE`.
pub fn call_code<H: QtumHost + ?Sized>(context: InstructionContext<'_, H, EthInterpreter>) {
    message_call(context, CallScheme::CallCode);
}

/// `DELEGATECALL`.
pub fn delegate_call<H: QtumHost + ?Sized>(context: InstructionContext<'_, H, EthInterpreter>) {
    message_call(context, CallScheme::DelegateCall);
}

/// `STATICCALL`.
pub fn static_call<H: QtumHost + ?Sized>(context: InstructionContext<'_, H, EthInterpreter>) {
    message_call(context, CallScheme::StaticCall);
}

fn message_call<H: QtumHost + ?Sized>(
    context: InstructionContext<'_, H, EthInterpreter>,
    scheme: CallScheme,
) {
    let carries_value = matches!(scheme, CallScheme::Call | CallScheme::CallCode);
    let Some([local_gas_limit, to]) = StackTr::popn(&mut context.interpreter.stack) else {
        context.interpreter.halt(InstructionResult::StackUnderflow);
        return;
    };
    let to = to.into_address();
    let local_gas_limit = u64::try_from(local_gas_limit).unwrap_or(u64::MAX);
    let value = if carries_value {
        let Some([value]) = StackTr::popn(&mut context.interpreter.stack) else {
            context.interpreter.halt(InstructionResult::StackUnderflow);
            return;
        };
        value
    } else {
        U256::ZERO
    };
    let has_transfer = !value.is_zero();
    if scheme == CallScheme::Call && has_transfer && context.interpreter.runtime_flag.is_static() {
        context.interpreter.halt(InstructionResult::CallNotAllowedInsideStatic);
        return;
    }

    let Some((input, return_memory_offset)) = get_memory_input_and_out_ranges(context.interpreter)
    else {
        return;
    };

    let Some(account_load) = context.host.load_account_delegated(to) else {
        context.interpreter.halt(InstructionResult::FatalExternalError);
        return;
    };
    let schedule = context.host.gas_schedule();
    let creates_account = scheme == CallScheme::Call && has_transfer && account_load.data.is_empty;
    let mut cost = if schedule.upgrades.london {
        warm_cold_cost_with_delegation(account_load)
    } else {
        schedule.call_gas
    };
    if has_transfer {
        cost += schedule.call_value_transfer_gas;
    }
    if creates_account {
        cost += schedule.call_new_account_gas;
    }
    let stipend = if has_transfer { schedule.call_stipend } else { 0 };
    revm::interpreter::gas!(context.interpreter, cost);

    let remaining = context.interpreter.gas.remaining();
    let gas_limit = min(remaining - remaining / 64, local_gas_limit);
    revm::interpreter::gas!(context.interpreter, gas_limit);
    let gas_limit = gas_limit.saturating_add(stipend);

    let current = context.interpreter.input.target_address();
    let (caller, target_address, value) = if scheme == CallScheme::CallCode {
        (current, current, CallValue::Transfer(value))
    } else if scheme == CallScheme::DelegateCall {
        (
            context.interpreter.input.caller_address(),
            current,
            CallValue::Apparent(context.interpreter.input.call_value()),
        )
    } else {
        (current, to, CallValue::Transfer(value))
    };
    let is_static = scheme == CallScheme::StaticCall || context.interpreter.runtime_flag.is_static();

    context.interpreter.bytecode.set_action(InterpreterAction::NewFrame(FrameInput::Call(
        Box::new(CallInputs {
            input: CallInput::SharedBuffer(input),
            gas_limit,
            target_address,
            caller,
            bytecode_address: to,
            value,
            scheme,
            is_static,
            return_memory_offset,
        }),
    )));
}

/// `SELFDESTRUCT`, priced and refunded by the schedule.
pub fn selfdestruct<H: QtumHost + ?Sized>(context: InstructionContext<'_, H, EthInterpreter>) {
    require_non_staticcall!(context.interpreter);
    let Some([target]) = StackTr::popn(&mut context.interpreter.stack) else {
        context.interpreter.halt(InstructionResult::StackUnderflow);
        return;
    };
    let target = target.into_address();

    let Some(result) = context.host.selfdestruct(context.interpreter.input.target_address(), target)
    else {
        context.interpreter.halt(InstructionResult::FatalExternalError);
        return;
    };

    let schedule = context.host.gas_schedule();
    let mut cost = schedule.suicide_gas;
    if schedule.upgrades.london && result.is_cold {
        cost += COLD_ACCOUNT_ACCESS_COST;
    }
    if result.data.had_value && !result.data.target_exists {
        cost += schedule.call_new_account_gas;
    }
    let refund = if result.data.previously_destroyed { 0 } else { schedule.selfdestruct_refund() };

    revm::interpreter::gas!(context.interpreter, cost);
    context.interpreter.gas.record_refund(refund as i64);
    context.interpreter.halt(InstructionResult::SelfDestruct);
}

/// `GASPRICE`, answering the contract output's gas price.
pub fn gasprice<H: QtumHost + ?Sized>(context: InstructionContext<'_, H, EthInterpreter>) {
    revm::interpreter::gas!(context.interpreter, context.host.gas_schedule().tier(1));
    push!(context.interpreter, context.host.qtum_gas_price());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule() -> GasSchedule {
        GasSchedule::eip158()
    }

    #[test]
    fn default_schedule_matches_native_static_costs() {
        let schedule = schedule();
        for op in [opcode::ADD, opcode::MUL, opcode::ADDMOD, opcode::JUMPI, opcode::PUSH1, opcode::CREATE] {
            assert_eq!(repricing(op, &schedule, &[]), 0, "opcode {op:#04x}");
        }
        assert_eq!(repricing(opcode::JUMPDEST, &schedule, &[]), 0);
    }

    #[test]
    fn tier_changes_move_the_cost() {
        let mut schedule = schedule();
        schedule.tier_step_gas[2] = 7;
        assert_eq!(repricing(opcode::ADD, &schedule, &[]), 4);
        schedule.tier_step_gas[1] = 0;
        assert_eq!(repricing(opcode::CALLER, &schedule, &[]), -2);
    }

    #[test]
    fn word_costs_read_the_length_operand() {
        let mut schedule = schedule();
        schedule.sha3_word_gas = 10;
        // KECCAK256 pops offset then length: length sits one below the top.
        let stack = [U256::from(64), U256::ZERO];
        assert_eq!(repricing(opcode::KECCAK256, &schedule, &stack), 8);

        schedule.copy_gas = 5;
        // CALLDATACOPY pops memory offset, data offset, length.
        let stack = [U256::from(33), U256::ZERO, U256::ZERO];
        assert_eq!(repricing(opcode::CALLDATACOPY, &schedule, &stack), 4);
    }

    #[test]
    fn log_data_is_priced_per_byte() {
        let mut schedule = schedule();
        schedule.log_data_gas = 10;
        schedule.log_topic_gas = 400;
        let stack = [U256::ZERO, U256::from(3), U256::ZERO];
        assert_eq!(repricing(opcode::LOG1, &schedule, &stack), 25 + 6);
    }

    #[test]
    fn exp_counts_exponent_bytes() {
        let mut schedule = schedule();
        schedule.exp_byte_gas = 60;
        let stack = [U256::from(0x1_0000), U256::from(2)];
        assert_eq!(repricing(opcode::EXP, &schedule, &stack), 30);
    }

    #[test]
    fn account_reads_follow_the_schedule_before_london() {
        let schedule = schedule();
        assert!(!schedule.upgrades.london);
        assert_eq!(
            repricing(opcode::SLOAD, &schedule, &[]),
            i128::from(schedule.sload_gas) - i128::from(native::SLOAD_PETERSBURG)
        );
        let london = schedule.with_upgrades(crate::evm::GasUpgrades::all());
        assert_eq!(repricing(opcode::SLOAD, &london, &[]), 0);
    }
}
