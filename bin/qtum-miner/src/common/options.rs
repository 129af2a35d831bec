use clap::Parser;
use qtum_consensus::{Amount, AssemblerOptions};

/// Operator limits on the contract transactions a staker includes.
#[derive(Parser, Debug, Clone, Default)]
pub struct StakerArgs {
    /// Gas spent on contract transactions per block, capped by the governed block gas limit
    #[arg(long = "staker-soft-block-gas-limit")]
    pub soft_block_gas_limit: Option<u64>,

    /// Gas a single contract transaction may use
    #[arg(long = "staker-max-tx-gas-limit")]
    pub max_tx_gas_limit: Option<u64>,

    /// Lowest gas price accepted, on top of the governed minimum
    #[arg(long = "staker-min-tx-gas-price")]
    pub min_tx_gas_price: Option<u64>,

    /// Fee per thousand virtual bytes a package must pay
    #[arg(long = "block-min-tx-fee")]
    pub block_min_tx_fee: Option<Amount>,

    /// Leave contract transactions out of the block
    #[arg(long = "disable-contract-staking")]
    pub disable_contract_staking: bool,
}

impl StakerArgs {
    /// Assembler options with the given limits applied over the defaults.
    pub fn options(&self) -> AssemblerOptions {
        let mut options = AssemblerOptions::default();
        if let Some(limit) = self.soft_block_gas_limit {
            options = options.with_soft_block_gas_limit(limit);
        }
        if let Some(limit) = self.max_tx_gas_limit {
            options = options.with_max_tx_gas_limit(limit);
        }
        if let Some(price) = self.min_tx_gas_price {
            options = options.with_staker_min_tx_gas_price(price);
        }
        if let Some(rate) = self.block_min_tx_fee {
            options = options.with_block_min_fee_rate(rate);
        }
        if self.disable_contract_staking {
            options = options.with_contract_staking_disabled();
        }
        options
    }
}
