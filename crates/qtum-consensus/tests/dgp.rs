//! Tests for governed gas parameters and their effect on execution and assembly.

use alloy_primitives::{Address, Bytes, U256};
use proptest::prelude::*;
use qtum_consensus::{
    assembler::GasLimits,
    evm::{BlockEnv, CallParams, ContractState, Executor, GasSchedule},
    system_contracts::dgp::{BLOCK_GAS_LIMIT_DGP, BLOCK_SIZE_DGP, GAS_PRICE_DGP, GAS_SCHEDULE_DGP},
    test_utils::{install_template, store_schedule, BytecodeBuilder},
    AssemblerOptions, BlockAssembler, ConsensusParams, GasGovernor,
};

const TEMPLATE: Address = Address::repeat_byte(0x42);
const LATER_TEMPLATE: Address = Address::repeat_byte(0x43);
const CONTRACT: Address = Address::repeat_byte(0xcc);

/// The governed values of the default schedule at `height`, with the zero tiers, which no
/// template may publish, set to 1.
fn publishable_values(params: &ConsensusParams, height: u32) -> Vec<u32> {
    let mut values = GasSchedule::for_height(params, height).governed_values();
    values[0] = 1;
    values[7] = 1;
    values
}

fn returning(word: u64) -> Bytes {
    BytecodeBuilder::default().return_with_data(U256::from(word).to_be_bytes::<32>()).build()
}

#[test]
fn test_defaults_without_governance() {
    let params = ConsensusParams::regtest();
    let mut governor = GasGovernor::new(params.clone());
    let mut state = ContractState::new();
    for height in [0, 1, 4_999, 5_000, 100_000] {
        assert_eq!(governor.schedule_for(&mut state, height), GasSchedule::for_height(&params, height));
        assert_eq!(governor.block_size_for(&mut state, height), 2_000_000);
        assert_eq!(governor.min_gas_price_for(&mut state, height), 40);
        assert_eq!(governor.block_gas_limit_for(&mut state, height), 40_000_000);
    }
}

#[test]
fn test_stored_schedule_prices_execution() {
    let params = ConsensusParams::regtest();
    let base_values = publishable_values(&params, 1);
    let base = GasSchedule::for_height(&params, 1).with_governed_values(&base_values).unwrap();
    let mut values = base_values;
    values[13] += 10_000;

    let mut state = ContractState::new();
    install_template(&mut state, GAS_SCHEDULE_DGP, 0, TEMPLATE, Bytes::new());
    store_schedule(&mut state, TEMPLATE, &values);
    state.account_mut(CONTRACT).code =
        BytecodeBuilder::default().sstore(U256::ZERO, U256::from(1)).build();

    let mut governor = GasGovernor::new(params).with_storage_mode();
    let governed = governor.schedule_for(&mut state, 1);
    assert_eq!(governed.sstore_set_gas, base.sstore_set_gas + 10_000);
    assert_eq!(governed.upgrades, base.upgrades);
    assert_eq!(governed.governed_values(), values);

    let gas_used = |schedule: GasSchedule| {
        let mut state = state.clone();
        let result = Executor::new(&mut state, schedule, BlockEnv::default()).call(CallParams {
            receiver: CONTRACT,
            gas_limit: 1_000_000,
            ..Default::default()
        });
        assert!(result.is_success());
        result.gas_used
    };
    assert_eq!(gas_used(governed) - gas_used(base), 10_000);
}

#[test]
fn test_templates_switch_at_their_activation_height() {
    let mut state = ContractState::new();
    install_template(&mut state, BLOCK_GAS_LIMIT_DGP, 10, TEMPLATE, returning(10_000_000));
    install_template(&mut state, BLOCK_GAS_LIMIT_DGP, 50, LATER_TEMPLATE, returning(80_000_000));
    install_template(&mut state, GAS_PRICE_DGP, 10, Address::repeat_byte(0x44), returning(100));
    let root = state.state_root();

    let assembler = BlockAssembler::new(ConsensusParams::regtest(), AssemblerOptions::default());
    let mut governor = GasGovernor::new(ConsensusParams::regtest());

    assert_eq!(
        assembler.gas_limits(&mut governor, &mut state, 5),
        GasLimits { hard: 40_000_000, soft: 40_000_000, tx: 40_000_000, min_gas_price: 40 }
    );
    assert_eq!(
        assembler.gas_limits(&mut governor, &mut state, 20),
        GasLimits { hard: 10_000_000, soft: 10_000_000, tx: 10_000_000, min_gas_price: 100 }
    );
    assert_eq!(
        assembler.gas_limits(&mut governor, &mut state, 60),
        GasLimits { hard: 80_000_000, soft: 40_000_000, tx: 40_000_000, min_gas_price: 100 }
    );
    assert_eq!(state.state_root(), root);
}

#[test]
fn test_operator_limits_only_tighten() {
    let mut state = ContractState::new();
    install_template(&mut state, GAS_PRICE_DGP, 0, TEMPLATE, returning(20));
    let options = AssemblerOptions::default()
        .with_soft_block_gas_limit(100_000_000)
        .with_max_tx_gas_limit(1_000_000)
        .with_staker_min_tx_gas_price(60);
    let assembler = BlockAssembler::new(ConsensusParams::regtest(), options);
    let mut governor = GasGovernor::new(ConsensusParams::regtest());

    assert_eq!(
        assembler.gas_limits(&mut governor, &mut state, 1),
        GasLimits { hard: 40_000_000, soft: 40_000_000, tx: 1_000_000, min_gas_price: 60 }
    );
}

#[test]
fn test_parameters_fall_back_one_by_one() {
    let mut state = ContractState::new();
    install_template(&mut state, BLOCK_SIZE_DGP, 0, TEMPLATE, returning(8_000_000));
    install_template(&mut state, BLOCK_GAS_LIMIT_DGP, 0, LATER_TEMPLATE, returning(1));
    let mut governor = GasGovernor::new(ConsensusParams::regtest());

    assert_eq!(governor.block_size_for(&mut state, 1), 8_000_000);
    assert_eq!(governor.block_gas_limit_for(&mut state, 1), 40_000_000);
    assert_eq!(governor.min_gas_price_for(&mut state, 1), 40);
}

proptest! {
    #[test]
    fn zero_entries_discard_the_stored_schedule(index in 0usize..39) {
        let params = ConsensusParams::regtest();
        let default = GasSchedule::for_height(&params, 1);
        let mut values = publishable_values(&params, 1);
        values[index] = 0;

        let mut state = ContractState::new();
        install_template(&mut state, GAS_SCHEDULE_DGP, 0, TEMPLATE, Bytes::new());
        store_schedule(&mut state, TEMPLATE, &values);

        let mut governor = GasGovernor::new(params).with_storage_mode();
        prop_assert_eq!(governor.schedule_for(&mut state, 1), default);
    }
}
