use alloy_primitives::Bytes;
use serde::{Deserialize, Serialize};

use crate::{
    constants::{
        dgp::DEFAULT_MIN_GAS_PRICE_DGP,
        miner::{
            BYTECODE_TIME_BUFFER, DEFAULT_BLOCK_MIN_TX_FEE, DEFAULT_STAKER_SOFT_BLOCK_GAS_LIMIT,
            MAX_STAKE_LOOKAHEAD, STAKER_POLLING_PERIOD, STAKER_POLLING_PERIOD_MIN_DIFFICULTY,
            STAKE_TIME_BUFFER,
        },
    },
    Amount, ConsensusParams,
};

/// Configuration of the block assembler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AssemblerOptions {
    /// Block version of the templates.
    pub block_version: i32,
    /// Gas the assembler spends on contract transactions per block, capped by the governed
    /// block gas limit.
    pub soft_block_gas_limit: u64,
    /// Gas a single transaction may use, the soft block gas limit when unset.
    pub max_tx_gas_limit: Option<u64>,
    /// Floor of the gas price accepted, on top of the governed minimum.
    pub staker_min_tx_gas_price: u64,
    /// Fee per thousand virtual bytes a package must pay to be included.
    pub block_min_fee_rate: Amount,
    /// Leaves contract transactions out of templates.
    pub disable_contract_staking: bool,
    /// Code installed at the delegation address at the offline staking height.
    pub delegation_contract_code: Option<Bytes>,
    /// Chain id exposed to contracts.
    pub chain_id: u64,
}

impl Default for AssemblerOptions {
    fn default() -> Self {
        Self {
            block_version: 0x2000_0000,
            soft_block_gas_limit: DEFAULT_STAKER_SOFT_BLOCK_GAS_LIMIT,
            max_tx_gas_limit: None,
            staker_min_tx_gas_price: DEFAULT_MIN_GAS_PRICE_DGP,
            block_min_fee_rate: DEFAULT_BLOCK_MIN_TX_FEE,
            disable_contract_staking: false,
            delegation_contract_code: None,
            chain_id: 0,
        }
    }
}

impl AssemblerOptions {
    /// Sets the soft block gas limit.
    pub const fn with_soft_block_gas_limit(mut self, limit: u64) -> Self {
        self.soft_block_gas_limit = limit;
        self
    }

    /// Sets the per-transaction gas limit.
    pub const fn with_max_tx_gas_limit(mut self, limit: u64) -> Self {
        self.max_tx_gas_limit = Some(limit);
        self
    }

    /// Sets the gas price floor.
    pub const fn with_staker_min_tx_gas_price(mut self, price: u64) -> Self {
        self.staker_min_tx_gas_price = price;
        self
    }

    /// Sets the minimum package fee rate.
    pub const fn with_block_min_fee_rate(mut self, rate: Amount) -> Self {
        self.block_min_fee_rate = rate;
        self
    }

    /// Leaves contract transactions out of templates.
    pub const fn with_contract_staking_disabled(mut self) -> Self {
        self.disable_contract_staking = true;
        self
    }

    /// Sets the code deployed at the delegation address.
    pub fn with_delegation_contract_code(mut self, code: impl Into<Bytes>) -> Self {
        self.delegation_contract_code = Some(code.into());
        self
    }

    /// Sets the chain id exposed to contracts.
    pub const fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    /// Fee a package of `size` virtual bytes must pay, rounded up.
    pub fn min_package_fee(&self, size: u64) -> Amount {
        let size = Amount::try_from(size).unwrap_or(Amount::MAX);
        self.block_min_fee_rate.saturating_mul(size).saturating_add(999).div_euclid(1000)
    }
}

/// Gas budgets of one template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasLimits {
    /// Governed block gas limit, the absolute ceiling.
    pub hard: u64,
    /// Gas the assembler spends on the block.
    pub soft: u64,
    /// Gas a single transaction may use.
    pub tx: u64,
    /// Lowest gas price accepted.
    pub min_gas_price: u64,
}

/// Timing of the miner and staker at a height, in seconds unless noted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinerParams {
    /// Time before the limit after which no contract transaction is admitted.
    pub bytecode_time_buffer: i64,
    /// Time before the limit the staker keeps to sign.
    pub stake_time_buffer: i64,
    /// Staker sleep between attempts, in milliseconds.
    pub polling_period: u64,
    /// Staker sleep with minimum difficulty blocks, in milliseconds.
    pub polling_period_min_difficulty: u64,
    /// How far ahead of the present the staker searches for a kernel.
    pub stake_lookahead: i64,
}

impl MinerParams {
    /// Timing at `height`, downscaled with the block time.
    pub fn for_height(params: &ConsensusParams, height: u32) -> Self {
        let factor = params.timestamp_downscale_factor(height).max(1);
        let scale = |value: i64| (value / factor).max(1);
        let factor_ms = factor as u64;
        Self {
            bytecode_time_buffer: scale(BYTECODE_TIME_BUFFER),
            stake_time_buffer: scale(STAKE_TIME_BUFFER),
            polling_period: (STAKER_POLLING_PERIOD / factor_ms).max(1),
            polling_period_min_difficulty: STAKER_POLLING_PERIOD_MIN_DIFFICULTY,
            stake_lookahead: scale(MAX_STAKE_LOOKAHEAD).min(params.target_spacing(height)),
        }
    }

    /// Staker sleep between attempts, in milliseconds.
    pub const fn staker_sleep(&self, min_difficulty: bool) -> u64 {
        if min_difficulty {
            self.polling_period_min_difficulty
        } else {
            self.polling_period
        }
    }
}
