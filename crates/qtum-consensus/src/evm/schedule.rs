//! The runtime gas schedule.
//!
//! Unlike a stock EVM, every cost the governance contracts may tune is read from a
//! [`GasSchedule`] value at execution time. Costs introduced by later upgrades that the
//! governance contracts do not cover are switched on by height through [`GasUpgrades`].

use serde::{Deserialize, Serialize};

use crate::{constants::evm as consts, ConsensusParams};

/// Number of governed schedule entries in the original layout.
pub const GOVERNED_SCHEDULE_LEN: usize = 39;
/// Number of governed schedule entries once the init code limit became governable.
pub const GOVERNED_SCHEDULE_LEN_SHANGHAI: usize = 40;

/// Upgrades of the EVM rules that are activated by height rather than by governance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GasUpgrades {
    /// EIP-2200 net gas metering for `SSTORE`, plus `CHAINID` and `SELFBALANCE`.
    pub istanbul: bool,
    /// EIP-2929 cold and warm access pricing, EIP-3529 refund reduction and `BASEFEE`.
    pub london: bool,
    /// `PUSH0` and the EIP-3860 init code limit.
    pub shanghai: bool,
    /// EIP-1153 transient storage and `MCOPY`.
    pub cancun: bool,
}

impl GasUpgrades {
    /// Upgrades active at `height`.
    pub const fn at_height(params: &ConsensusParams, height: u32) -> Self {
        Self {
            istanbul: height >= params.muir_glacier_height,
            london: height >= params.london_height,
            shanghai: height >= params.shanghai_height,
            cancun: height >= params.cancun_height,
        }
    }

    /// Every upgrade active.
    pub const fn all() -> Self {
        Self { istanbul: true, london: true, shanghai: true, cancun: true }
    }
}

/// Gas costs of the EVM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasSchedule {
    /// Costs of the zero, base, very low, low, mid, high, ext and special tiers.
    pub tier_step_gas: [u64; 8],
    pub exp_gas: u64,
    pub exp_byte_gas: u64,
    pub sha3_gas: u64,
    pub sha3_word_gas: u64,
    pub sload_gas: u64,
    pub sstore_set_gas: u64,
    pub sstore_reset_gas: u64,
    pub sstore_refund_gas: u64,
    pub jumpdest_gas: u64,
    pub log_gas: u64,
    pub log_data_gas: u64,
    pub log_topic_gas: u64,
    pub create_gas: u64,
    pub call_gas: u64,
    pub call_stipend: u64,
    pub call_value_transfer_gas: u64,
    pub call_new_account_gas: u64,
    pub suicide_refund_gas: u64,
    pub memory_gas: u64,
    pub quad_coeff_div: u64,
    pub create_data_gas: u64,
    pub tx_gas: u64,
    pub tx_create_gas: u64,
    pub tx_data_zero_gas: u64,
    pub tx_data_non_zero_gas: u64,
    pub copy_gas: u64,
    pub extcodesize_gas: u64,
    pub extcodecopy_gas: u64,
    pub balance_gas: u64,
    pub suicide_gas: u64,
    pub max_code_size: u64,
    /// Largest init code accepted once Shanghai is active.
    pub max_initcode_size: u64,
    /// Height-activated rule changes.
    pub upgrades: GasUpgrades,
}

impl Default for GasSchedule {
    fn default() -> Self {
        Self::eip158()
    }
}

impl GasSchedule {
    /// The compiled default schedule every governed value is bounded against.
    pub const fn eip158() -> Self {
        Self {
            tier_step_gas: [0, 2, 3, 5, 8, 10, 20, 0],
            exp_gas: 10,
            exp_byte_gas: 50,
            sha3_gas: 30,
            sha3_word_gas: 6,
            sload_gas: 200,
            sstore_set_gas: 20_000,
            sstore_reset_gas: 5_000,
            sstore_refund_gas: 15_000,
            jumpdest_gas: 1,
            log_gas: 375,
            log_data_gas: 8,
            log_topic_gas: 375,
            create_gas: 32_000,
            call_gas: 700,
            call_stipend: 2_300,
            call_value_transfer_gas: 9_000,
            call_new_account_gas: 25_000,
            suicide_refund_gas: 24_000,
            memory_gas: 3,
            quad_coeff_div: 512,
            create_data_gas: 200,
            tx_gas: 21_000,
            tx_create_gas: 53_000,
            tx_data_zero_gas: 4,
            tx_data_non_zero_gas: 68,
            copy_gas: 3,
            extcodesize_gas: 700,
            extcodecopy_gas: 700,
            balance_gas: 400,
            suicide_gas: 5_000,
            max_code_size: 0x6000,
            max_initcode_size: consts::MAX_INITCODE_SIZE,
            upgrades: GasUpgrades { istanbul: false, london: false, shanghai: false, cancun: false },
        }
    }

    /// The schedule in force at `height` when no governance override applies.
    pub fn for_height(params: &ConsensusParams, height: u32) -> Self {
        Self::eip158().with_upgrades(GasUpgrades::at_height(params, height))
    }

    /// Applies height-activated upgrades, adjusting the defaults they reprice.
    pub fn with_upgrades(mut self, upgrades: GasUpgrades) -> Self {
        if upgrades.istanbul {
            self.sload_gas = 800;
            self.balance_gas = 700;
            self.tx_data_non_zero_gas = 16;
        }
        if upgrades.london {
            self.sstore_refund_gas = consts::SSTORE_CLEARS_SCHEDULE_LONDON;
        }
        self.upgrades = upgrades;
        self
    }

    /// The governed entries, in the order the governance contracts publish them.
    pub fn governed_values(&self) -> Vec<u32> {
        let mut values: Vec<u32> = self.tier_step_gas.iter().map(|gas| *gas as u32).collect();
        values.extend(
            [
                self.exp_gas,
                self.exp_byte_gas,
                self.sha3_gas,
                self.sha3_word_gas,
                self.sload_gas,
                self.sstore_set_gas,
                self.sstore_reset_gas,
                self.sstore_refund_gas,
                self.jumpdest_gas,
                self.log_gas,
                self.log_data_gas,
                self.log_topic_gas,
                self.create_gas,
                self.call_gas,
                self.call_stipend,
                self.call_value_transfer_gas,
                self.call_new_account_gas,
                self.suicide_refund_gas,
                self.memory_gas,
                self.quad_coeff_div,
                self.create_data_gas,
                self.tx_gas,
                self.tx_create_gas,
                self.tx_data_zero_gas,
                self.tx_data_non_zero_gas,
                self.copy_gas,
                self.extcodesize_gas,
                self.extcodecopy_gas,
                self.balance_gas,
                self.suicide_gas,
                self.max_code_size,
            ]
            .map(|gas| gas as u32),
        );
        values
    }

    /// The governed entries including the init code limit.
    pub fn governed_values_shanghai(&self) -> Vec<u32> {
        let mut values = self.governed_values();
        values.push(self.max_initcode_size as u32);
        values
    }

    /// Replaces the governed entries with `values`, keeping the upgrade flags.
    ///
    /// Returns `None` unless `values` holds 39 or 40 entries.
    pub fn with_governed_values(mut self, values: &[u32]) -> Option<Self> {
        if values.len() != GOVERNED_SCHEDULE_LEN && values.len() != GOVERNED_SCHEDULE_LEN_SHANGHAI {
            return None;
        }
        let v = |i: usize| values[i] as u64;
        for (i, tier) in self.tier_step_gas.iter_mut().enumerate() {
            *tier = v(i);
        }
        self.exp_gas = v(8);
        self.exp_byte_gas = v(9);
        self.sha3_gas = v(10);
        self.sha3_word_gas = v(11);
        self.sload_gas = v(12);
        self.sstore_set_gas = v(13);
        self.sstore_reset_gas = v(14);
        self.sstore_refund_gas = v(15);
        self.jumpdest_gas = v(16);
        self.log_gas = v(17);
        self.log_data_gas = v(18);
        self.log_topic_gas = v(19);
        self.create_gas = v(20);
        self.call_gas = v(21);
        self.call_stipend = v(22);
        self.call_value_transfer_gas = v(23);
        self.call_new_account_gas = v(24);
        self.suicide_refund_gas = v(25);
        self.memory_gas = v(26);
        self.quad_coeff_div = v(27);
        self.create_data_gas = v(28);
        self.tx_gas = v(29);
        self.tx_create_gas = v(30);
        self.tx_data_zero_gas = v(31);
        self.tx_data_non_zero_gas = v(32);
        self.copy_gas = v(33);
        self.extcodesize_gas = v(34);
        self.extcodecopy_gas = v(35);
        self.balance_gas = v(36);
        self.suicide_gas = v(37);
        self.max_code_size = v(38);
        if values.len() == GOVERNED_SCHEDULE_LEN_SHANGHAI {
            self.max_initcode_size = v(39);
        }
        Some(self)
    }

    /// Gas of a tier: 0 zero, 1 base, 2 very low, 3 low, 4 mid, 5 high, 6 ext.
    pub const fn tier(&self, tier: usize) -> u64 {
        self.tier_step_gas[tier]
    }

    /// Cost of an `SSTORE` that leaves the slot's effective value alone.
    pub const fn sstore_unchanged_gas(&self) -> u64 {
        if self.upgrades.london {
            consts::WARM_STORAGE_READ_COST
        } else if self.upgrades.istanbul {
            self.sload_gas
        } else {
            self.sstore_reset_gas
        }
    }

    /// Cost of an `SSTORE` overwriting a clean non-zero slot, excluding the cold surcharge.
    pub const fn sstore_reset_effective_gas(&self) -> u64 {
        if self.upgrades.london {
            self.sstore_reset_gas.saturating_sub(consts::COLD_SLOAD_COST)
        } else {
            self.sstore_reset_gas
        }
    }

    /// Denominator of the refund cap.
    pub const fn max_refund_quotient(&self) -> u64 {
        if self.upgrades.london {
            consts::MAX_REFUND_QUOTIENT_LONDON
        } else {
            consts::MAX_REFUND_QUOTIENT
        }
    }

    /// Refund granted for a self-destruct.
    pub const fn selfdestruct_refund(&self) -> u64 {
        if self.upgrades.london {
            0
        } else {
            self.suicide_refund_gas
        }
    }

    /// Memory expansion cost of `words` 32-byte words in total.
    pub const fn memory_cost(&self, words: u64) -> u64 {
        self.memory_gas
            .saturating_mul(words)
            .saturating_add(words.saturating_mul(words) / if self.quad_coeff_div == 0 { 1 } else { self.quad_coeff_div })
    }

    /// Intrinsic gas of a transaction carrying `data`.
    pub fn intrinsic_gas(&self, data: &[u8], is_create: bool) -> u64 {
        let zeros = data.iter().filter(|byte| **byte == 0).count() as u64;
        let non_zeros = data.len() as u64 - zeros;
        let mut gas = if is_create { self.tx_create_gas } else { self.tx_gas };
        gas = gas
            .saturating_add(zeros.saturating_mul(self.tx_data_zero_gas))
            .saturating_add(non_zeros.saturating_mul(self.tx_data_non_zero_gas));
        if is_create && self.upgrades.shanghai {
            gas = gas.saturating_add(
                (data.len() as u64).div_ceil(32).saturating_mul(consts::INITCODE_WORD_COST),
            );
        }
        gas
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn governed_values_round_trip_in_order() {
        let schedule = GasSchedule::eip158();
        let values = schedule.governed_values();
        assert_eq!(values.len(), GOVERNED_SCHEDULE_LEN);
        assert_eq!(&values[..8], &[0, 2, 3, 5, 8, 10, 20, 0]);
        assert_eq!(values[12], 200);
        assert_eq!(values[38], 0x6000);
        assert_eq!(schedule.clone().with_governed_values(&values), Some(schedule));
    }

    #[test]
    fn fortieth_value_sets_the_initcode_limit() {
        let mut values = GasSchedule::eip158().governed_values();
        values.push(1234);
        let schedule = GasSchedule::eip158().with_governed_values(&values).unwrap();
        assert_eq!(schedule.max_initcode_size, 1234);
        assert!(GasSchedule::eip158().with_governed_values(&values[..38]).is_none());
    }

    #[test]
    fn upgrades_follow_height() {
        let params = ConsensusParams::mainnet();
        let before = GasSchedule::for_height(&params, params.muir_glacier_height - 1);
        assert!(!before.upgrades.istanbul);
        assert_eq!(before.sstore_unchanged_gas(), 5_000);

        let istanbul = GasSchedule::for_height(&params, params.muir_glacier_height);
        assert_eq!(istanbul.sstore_unchanged_gas(), 800);

        let london = GasSchedule::for_height(&params, params.london_height);
        assert_eq!(london.sstore_refund_gas, 4_800);
        assert_eq!(london.sstore_reset_effective_gas(), 2_900);
        assert_eq!(london.max_refund_quotient(), 5);
        assert_eq!(london.selfdestruct_refund(), 0);
    }

    #[test]
    fn intrinsic_gas_counts_data_bytes() {
        let schedule = GasSchedule::eip158();
        assert_eq!(schedule.intrinsic_gas(&[0, 1, 2], false), 21_000 + 4 + 2 * 68);
        assert_eq!(schedule.intrinsic_gas(&[], true), 53_000);
    }
}
