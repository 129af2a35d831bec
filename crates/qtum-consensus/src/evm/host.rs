//! The execution context: the revm context carrying the Qtum environment, and the host
//! extension the instruction table reads the gas schedule from.

use std::collections::BTreeMap;

use alloy_primitives::{Address, B256, U256};
use revm::{
    context::{BlockEnv as RevmBlockEnv, CfgEnv, TxEnv},
    interpreter::Host,
    primitives::hardfork::SpecId,
    Context, Database, Journal, MainContext,
};
use serde::{Deserialize, Serialize};

use super::{GasSchedule, GasUpgrades};

/// Block-level environment of an execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BlockEnv {
    /// Height of the block being built or validated.
    pub number: u64,
    /// Block timestamp.
    pub timestamp: u64,
    /// Address the block reward goes to; for contract outputs, the block author's key hash.
    pub coinbase: Address,
    /// Block gas limit.
    pub gas_limit: u64,
    /// Difficulty, derived from the block's compact target.
    pub difficulty: U256,
    /// Base fee, exposed through `BASEFEE`.
    pub base_fee: u64,
    /// Chain id, exposed through `CHAINID`.
    pub chain_id: u64,
    /// Hashes of recent blocks, by height.
    pub block_hashes: BTreeMap<u64, B256>,
}

impl BlockEnv {
    /// The block environment as revm sees it.
    ///
    /// The difficulty doubles as `PREVRANDAO`, so that `DIFFICULTY` keeps answering it once the
    /// rules in force postdate the merge.
    pub fn to_revm(&self) -> RevmBlockEnv {
        RevmBlockEnv {
            number: U256::from(self.number),
            beneficiary: self.coinbase,
            timestamp: U256::from(self.timestamp),
            gas_limit: self.gas_limit,
            basefee: self.base_fee,
            difficulty: self.difficulty,
            prevrandao: Some(B256::from(self.difficulty)),
            ..Default::default()
        }
    }
}

/// Qtum state carried by the revm context for one transaction.
#[derive(Debug, Clone, Default)]
pub struct QtumEnv {
    /// Gas schedule in force.
    pub schedule: GasSchedule,
    /// Gas price paid by the contract output, answered by `GASPRICE`.
    pub gas_price: U256,
    /// Refund counter at the end of the transaction, before capping.
    pub refund_delta: i64,
}

/// The revm context Qtum executes in.
pub type QtumContext<DB> = Context<RevmBlockEnv, TxEnv, CfgEnv, DB, Journal<DB>, QtumEnv>;

/// Host of the Qtum instruction table: a revm host that also knows the gas schedule.
pub trait QtumHost: Host {
    /// The gas schedule in force.
    fn gas_schedule(&self) -> &GasSchedule;

    /// The gas price of the executing contract output.
    fn qtum_gas_price(&self) -> U256;
}

impl<DB: Database> QtumHost for QtumContext<DB> {
    fn gas_schedule(&self) -> &GasSchedule {
        &self.chain.schedule
    }

    fn qtum_gas_price(&self) -> U256 {
        self.chain.gas_price
    }
}

/// The revm rule set matching the height-activated upgrades.
pub const fn spec_id(upgrades: GasUpgrades) -> SpecId {
    if upgrades.cancun {
        SpecId::CANCUN
    } else if upgrades.shanghai {
        SpecId::SHANGHAI
    } else if upgrades.london {
        SpecId::LONDON
    } else if upgrades.istanbul {
        SpecId::ISTANBUL
    } else {
        SpecId::PETERSBURG
    }
}

/// Builds the context of one transaction.
pub fn qtum_context<DB: Database>(
    db: DB,
    schedule: &GasSchedule,
    block: &BlockEnv,
    tx: TxEnv,
    gas_price: U256,
) -> QtumContext<DB> {
    let mut cfg = CfgEnv::new_with_spec(spec_id(schedule.upgrades));
    cfg.chain_id = block.chain_id;
    cfg.limit_contract_code_size = Some(schedule.max_code_size as usize);
    cfg.limit_contract_initcode_size = Some(schedule.max_initcode_size as usize);

    Context::mainnet()
        .with_db(db)
        .with_block(block.to_revm())
        .with_tx(tx)
        .with_cfg(cfg)
        .with_chain(QtumEnv { schedule: schedule.clone(), gas_price, refund_delta: 0 })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upgrades_select_the_rule_set() {
        assert_eq!(spec_id(GasUpgrades::default()), SpecId::PETERSBURG);
        assert_eq!(spec_id(GasUpgrades { istanbul: true, ..Default::default() }), SpecId::ISTANBUL);
        assert_eq!(
            spec_id(GasUpgrades { istanbul: true, london: true, ..Default::default() }),
            SpecId::LONDON
        );
        assert_eq!(spec_id(GasUpgrades::all()), SpecId::CANCUN);
    }

    #[test]
    fn difficulty_doubles_as_prevrandao() {
        let block = BlockEnv { number: 7, difficulty: U256::from(0x1234), ..Default::default() };
        let revm_block = block.to_revm();
        assert_eq!(revm_block.number, U256::from(7));
        assert_eq!(revm_block.prevrandao, Some(B256::from(U256::from(0x1234))));
    }
}
