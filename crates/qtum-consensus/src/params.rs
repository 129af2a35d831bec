//! Per-chain consensus parameters and their height-dependent accessors.
//!
//! The chain changed a group of constants at once at the "reduce block time" (RBT) fork: block
//! spacing, difficulty timespan, stake timestamp granularity, coinbase maturity, checkpoint span
//! and the subsidy halving interval. Every accessor here is a pure function of the height, so
//! the pre-fork and post-fork regimes never overlap.

use alloy_primitives::{address, uint, Address, U256};
use serde::{Deserialize, Serialize};

use crate::{Amount, COIN};

/// The kind of proof a block carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProofKind {
    /// Proof of work.
    Work,
    /// Proof of stake.
    Stake,
}

impl ProofKind {
    /// Returns `true` for [`ProofKind::Stake`].
    pub const fn is_stake(self) -> bool {
        matches!(self, Self::Stake)
    }
}

/// Consensus parameters of one chain.
///
/// Loaded once when the chain is selected and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusParams {
    /// Easiest proof-of-work target.
    pub pow_limit: U256,
    /// Easiest proof-of-stake target before QIP9.
    pub pos_limit: U256,
    /// Easiest proof-of-stake target between QIP9 and the block time reduction.
    pub qip9_pos_limit: U256,
    /// Easiest proof-of-stake target after the block time reduction.
    pub rbt_pos_limit: U256,
    /// Allows minimum difficulty blocks when the chain stalls (test networks).
    pub pow_allow_min_difficulty_blocks: bool,
    /// Enables the BIP94 timewarp mitigation for retargeting.
    pub enforce_bip94: bool,
    /// Disables proof-of-work retargeting.
    pub pow_no_retargeting: bool,
    /// Disables proof-of-stake retargeting.
    pub pos_no_retargeting: bool,
    /// Block spacing in seconds before the block time reduction.
    pub pow_target_spacing: i64,
    /// Block spacing in seconds after the block time reduction.
    pub rbt_pow_target_spacing: i64,
    /// Difficulty timespan in seconds before QIP9.
    pub pow_target_timespan: i64,
    /// Difficulty timespan in seconds between QIP9 and the block time reduction.
    pub pow_target_timespan_v2: i64,
    /// Difficulty timespan in seconds after the block time reduction.
    pub rbt_pow_target_timespan: i64,
    /// QIP9 activation height.
    pub qip9_height: u32,
    /// Block time reduction activation height.
    pub reduce_blocktime_height: u32,
    /// Offline staking (delegation) activation height.
    pub offline_stake_height: u32,
    /// Istanbul gas rules activation height.
    pub muir_glacier_height: u32,
    /// Berlin/London gas rules activation height.
    pub london_height: u32,
    /// Shanghai rules activation height.
    pub shanghai_height: u32,
    /// Cancun rules activation height.
    pub cancun_height: u32,
    /// Last height at which proof-of-work blocks are accepted.
    pub last_pow_block: u32,
    /// Last height paying the initial large block reward.
    pub last_big_reward: u32,
    /// Subsidy halving interval in pre-reduction blocks.
    pub subsidy_halving_interval: u32,
    /// Subsidy halving interval in post-reduction blocks.
    pub subsidy_halving_interval_v2: u32,
    /// Stake timestamp mask before the block time reduction.
    pub stake_timestamp_mask: u32,
    /// Stake timestamp mask after the block time reduction.
    pub rbt_stake_timestamp_mask: u32,
    /// Factor by which the block time was reduced.
    pub blocktime_downscale_factor: i64,
    /// Coinbase maturity before the block time reduction.
    pub coinbase_maturity: u32,
    /// Coinbase maturity after the block time reduction.
    pub rbt_coinbase_maturity: u32,
    /// Sync checkpoint span before the block time reduction.
    pub checkpoint_span: u32,
    /// Sync checkpoint span after the block time reduction.
    pub rbt_checkpoint_span: u32,
    /// Address of the offline staking delegation contract.
    pub delegations_address: Address,
}

impl ConsensusParams {
    /// Main network parameters.
    pub fn mainnet() -> Self {
        Self {
            pow_limit: uint!(
                0x0000ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff_U256
            ),
            pos_limit: uint!(
                0x00000000ffffffffffffffffffffffffffffffffffffffffffffffffffffffff_U256
            ),
            qip9_pos_limit: uint!(
                0x0000000000001fffffffffffffffffffffffffffffffffffffffffffffffffff_U256
            ),
            rbt_pos_limit: uint!(
                0x0000000000003fffffffffffffffffffffffffffffffffffffffffffffffffff_U256
            ),
            pow_allow_min_difficulty_blocks: false,
            enforce_bip94: false,
            pow_no_retargeting: true,
            pos_no_retargeting: false,
            pow_target_spacing: 2 * 64,
            rbt_pow_target_spacing: 32,
            pow_target_timespan: 16 * 60,
            pow_target_timespan_v2: 4000,
            rbt_pow_target_timespan: 1000,
            qip9_height: 466_600,
            reduce_blocktime_height: 845_000,
            offline_stake_height: 680_000,
            muir_glacier_height: 845_000,
            london_height: 2_080_512,
            shanghai_height: 3_385_000,
            cancun_height: 4_098_000,
            last_pow_block: 5000,
            last_big_reward: 5000,
            subsidy_halving_interval: 985_500,
            subsidy_halving_interval_v2: 3_942_000,
            stake_timestamp_mask: 15,
            rbt_stake_timestamp_mask: 3,
            blocktime_downscale_factor: 4,
            coinbase_maturity: 500,
            rbt_coinbase_maturity: 2000,
            checkpoint_span: 500,
            rbt_checkpoint_span: 2000,
            delegations_address: DELEGATIONS_ADDRESS,
        }
    }

    /// Test network parameters.
    pub fn testnet() -> Self {
        Self {
            pos_limit: uint!(
                0x0000ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff_U256
            ),
            qip9_height: 446_320,
            reduce_blocktime_height: 806_600,
            offline_stake_height: 625_000,
            muir_glacier_height: 806_600,
            london_height: 1_967_616,
            shanghai_height: 3_298_000,
            cancun_height: 4_010_000,
            ..Self::mainnet()
        }
    }

    /// Regression test network parameters.
    ///
    /// Minimum difficulty blocks are allowed and neither regime retargets.
    pub fn regtest() -> Self {
        Self {
            pow_limit: uint!(
                0x7fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff_U256
            ),
            pos_limit: uint!(
                0x7fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff_U256
            ),
            qip9_pos_limit: uint!(
                0x7fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff_U256
            ),
            rbt_pos_limit: uint!(
                0x7fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff_U256
            ),
            pow_allow_min_difficulty_blocks: true,
            pow_no_retargeting: true,
            pos_no_retargeting: true,
            qip9_height: 5000,
            reduce_blocktime_height: 0,
            offline_stake_height: 5000,
            muir_glacier_height: 0,
            london_height: 0,
            shanghai_height: 0,
            cancun_height: 0,
            last_pow_block: u32::MAX,
            subsidy_halving_interval: 150,
            subsidy_halving_interval_v2: 600,
            coinbase_maturity: 500,
            rbt_coinbase_maturity: 500,
            ..Self::mainnet()
        }
    }

    /// Sets the block time reduction height.
    pub const fn with_reduce_blocktime_height(mut self, height: u32) -> Self {
        self.reduce_blocktime_height = height;
        self
    }

    /// Sets the QIP9 activation height.
    pub const fn with_qip9_height(mut self, height: u32) -> Self {
        self.qip9_height = height;
        self
    }

    /// Allows or forbids minimum difficulty blocks.
    pub const fn with_min_difficulty_blocks(mut self, allow: bool) -> Self {
        self.pow_allow_min_difficulty_blocks = allow;
        self
    }

    /// Enables or disables retargeting for both regimes.
    pub const fn with_retargeting(mut self, enabled: bool) -> Self {
        self.pow_no_retargeting = !enabled;
        self.pos_no_retargeting = !enabled;
        self
    }

    /// Enables or disables the BIP94 timewarp mitigation.
    pub const fn with_bip94(mut self, enforce: bool) -> Self {
        self.enforce_bip94 = enforce;
        self
    }

    const fn before_rbt(&self, height: u32) -> bool {
        height < self.reduce_blocktime_height
    }

    /// Target block spacing in seconds.
    pub const fn target_spacing(&self, height: u32) -> i64 {
        if self.before_rbt(height) {
            self.pow_target_spacing
        } else {
            self.rbt_pow_target_spacing
        }
    }

    /// Difficulty retarget timespan in seconds.
    pub const fn target_timespan(&self, height: u32) -> i64 {
        if height < self.qip9_height {
            self.pow_target_timespan
        } else if self.before_rbt(height) {
            self.pow_target_timespan_v2
        } else {
            self.rbt_pow_target_timespan
        }
    }

    /// Number of blocks between two retargets.
    pub const fn difficulty_adjustment_interval(&self, height: u32) -> i64 {
        self.target_timespan(height) / self.target_spacing(height)
    }

    /// Stake timestamp mask.
    pub const fn stake_timestamp_mask(&self, height: u32) -> u32 {
        if self.before_rbt(height) {
            self.stake_timestamp_mask
        } else {
            self.rbt_stake_timestamp_mask
        }
    }

    /// Smallest stake timestamp mask across both regimes.
    pub const fn min_stake_timestamp_mask(&self) -> u32 {
        self.rbt_stake_timestamp_mask
    }

    /// Subsidy halving interval in blocks of the active regime.
    pub const fn subsidy_halving_interval(&self, height: u32) -> u32 {
        if self.before_rbt(height) {
            self.subsidy_halving_interval
        } else {
            self.subsidy_halving_interval_v2
        }
    }

    /// Block time reduction factor in effect.
    pub const fn blocktime_downscale_factor(&self, height: u32) -> i64 {
        if self.before_rbt(height) {
            1
        } else {
            self.blocktime_downscale_factor
        }
    }

    /// Number of pre-reduction-equivalent blocks since the big reward period ended.
    ///
    /// Blocks after the reduction are weighted down by the downscale factor, so the weight
    /// advances at the same wall-clock pace before and after the fork.
    pub const fn subsidy_halving_weight(&self, height: u32) -> i64 {
        if height <= self.last_big_reward {
            return 0;
        }
        let factor = self.blocktime_downscale_factor(height);
        let block_count = height as i64 - self.last_big_reward as i64;
        let before_downscale = if factor == 1 {
            0
        } else {
            self.reduce_blocktime_height as i64 - self.last_big_reward as i64 - 1
        };
        block_count - before_downscale + before_downscale * factor
    }

    /// Ratio of the pre-reduction stake timestamp granularity to the current one.
    pub const fn timestamp_downscale_factor(&self, height: u32) -> i64 {
        if self.before_rbt(height) {
            1
        } else {
            (self.stake_timestamp_mask as i64 + 1) / (self.rbt_stake_timestamp_mask as i64 + 1)
        }
    }

    /// Sync checkpoint span.
    pub const fn checkpoint_span(&self, height: u32) -> u32 {
        if self.before_rbt(height) {
            self.checkpoint_span
        } else {
            self.rbt_checkpoint_span
        }
    }

    /// Largest sync checkpoint span across both regimes.
    pub const fn max_checkpoint_span(&self) -> u32 {
        if self.checkpoint_span <= self.rbt_checkpoint_span {
            self.rbt_checkpoint_span
        } else {
            self.checkpoint_span
        }
    }

    /// Coinbase maturity in blocks.
    pub const fn coinbase_maturity(&self, height: u32) -> u32 {
        if self.before_rbt(height) {
            self.coinbase_maturity
        } else {
            self.rbt_coinbase_maturity
        }
    }

    /// Easiest proof-of-stake target for the sub-regime active at `height`.
    pub const fn pos_limit(&self, height: u32) -> U256 {
        if height < self.qip9_height {
            self.pos_limit
        } else if self.before_rbt(height) {
            self.qip9_pos_limit
        } else {
            self.rbt_pos_limit
        }
    }

    /// Easiest target of a regime at `height`.
    pub const fn target_limit(&self, height: u32, proof: ProofKind) -> U256 {
        match proof {
            ProofKind::Work => self.pow_limit,
            ProofKind::Stake => self.pos_limit(height),
        }
    }

    /// Whether retargeting is disabled for a regime.
    pub const fn no_retargeting(&self, proof: ProofKind) -> bool {
        match proof {
            ProofKind::Work => self.pow_no_retargeting,
            ProofKind::Stake => self.pos_no_retargeting,
        }
    }

    /// Whether proof-of-work blocks are still accepted at `height`.
    pub const fn is_pow_height(&self, height: u32) -> bool {
        height <= self.last_pow_block
    }

    /// Block subsidy at `height`, see [`subsidy::block_subsidy`].
    pub fn block_subsidy(&self, height: u32) -> Amount {
        subsidy::block_subsidy(self, height)
    }
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self::mainnet()
    }
}

/// Default address of the offline staking delegation contract.
pub const DELEGATIONS_ADDRESS: Address = address!("0x0000000000000000000000000000000000000086");

/// Block subsidy schedule.
pub mod subsidy {
    use super::*;

    /// Reward of each block during the initial big reward period.
    pub const BIG_REWARD: Amount = 20_000 * COIN;
    /// Reward of the first halving period.
    pub const INITIAL_REWARD: Amount = 4 * COIN;
    /// Number of halvings after which the subsidy is zero.
    pub const MAX_HALVINGS: i64 = 7;

    /// Returns the block subsidy at `height`.
    pub fn block_subsidy(params: &ConsensusParams, height: u32) -> Amount {
        if height <= params.last_big_reward {
            return BIG_REWARD;
        }
        let weight = params.subsidy_halving_weight(height);
        let halvings = (weight - 1) / params.subsidy_halving_interval.max(1) as i64;
        if halvings >= MAX_HALVINGS {
            return 0;
        }
        (INITIAL_REWARD >> halvings) / params.blocktime_downscale_factor(height)
    }
}
