use std::{collections::BTreeMap, path::PathBuf};

use clap::Parser;
use qtum_consensus::{
    assembler::{AssemblyContext, Clock, MempoolEntry, MempoolSnapshot},
    destination::pay_to_pubkey_hash,
    test_utils::{FixedClock, MemoryChain},
    Amount, BlockAssembler, BlockTemplate, GasGovernor, Hash160, OutPoint, Transaction, TxOut,
};
use serde::Deserialize;
use tracing::info;

use crate::common::{read_json, ChainArgs, LogArgs, OutputArgs, Proof, Result, StakerArgs};

/// Unspent outputs by outpoint.
type Coins = BTreeMap<OutPoint, TxOut>;

/// A mempool transaction of a mempool file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MempoolInput {
    /// The transaction.
    pub tx: Transaction,
    /// Fee it pays.
    pub fee: Amount,
    /// Prioritisation delta added to the fee for ordering.
    #[serde(default)]
    pub fee_delta: Amount,
}

/// An unspent output of a coins file.
#[derive(Debug, Clone, Deserialize)]
pub struct CoinInput {
    /// Where the output is.
    pub outpoint: OutPoint,
    /// The output.
    pub output: TxOut,
}

/// Assemble a block template
#[derive(Parser, Debug)]
pub struct Cmd {
    /// Chain configuration
    #[command(flatten)]
    pub chain_args: ChainArgs,

    /// Operator limits
    #[command(flatten)]
    pub staker_args: StakerArgs,

    /// Output configuration
    #[command(flatten)]
    pub output_args: OutputArgs,

    /// Logging configuration
    #[command(flatten)]
    pub log_args: LogArgs,

    /// JSON file with the mempool transactions and their fees
    #[arg(long = "mempool")]
    pub mempool: Option<PathBuf>,

    /// JSON file with the unspent outputs spent by contract transactions
    #[arg(long = "coins")]
    pub coins: Option<PathBuf>,

    /// Key hash the block reward is paid to
    #[arg(long = "reward-to", default_value_t = Hash160::ZERO)]
    pub reward_to: Hash160,

    /// Proof the template is built for
    #[arg(long = "proof", value_enum, default_value_t = Proof::Work)]
    pub proof: Proof,

    /// Seconds the assembler may spend adding transactions
    #[arg(long = "time-limit")]
    pub time_limit: Option<i64>,

    /// Fixed current time in seconds since the epoch; the system clock when absent
    #[arg(long = "now")]
    pub now: Option<i64>,
}

impl Cmd {
    /// Execute the template command
    pub fn run(&self) -> Result<()> {
        let template = self.execute()?;
        self.output_args.write(&template)
    }

    /// Assembles the template.
    pub fn execute(&self) -> Result<BlockTemplate> {
        let params = self.chain_args.params();
        let chain = self.chain_args.load_chain(&params)?;
        let mut state = self.chain_args.load_state()?;
        let mempool = self.load_mempool()?;
        let coins = self.load_coins()?;
        let mut governor = GasGovernor::new(params.clone());
        let assembler = BlockAssembler::new(params, self.staker_args.options());
        info!(target: "qtum_miner", transactions = mempool.len(), "assembling template");

        let ctx = AssemblyContext::new(&chain, coins, &mut state, &mut governor);
        let template = match self.now {
            Some(now) => self.assemble(&assembler, ctx.with_clock(FixedClock(now)), &mempool)?,
            None => self.assemble(&assembler, ctx, &mempool)?,
        };
        info!(
            target: "qtum_miner",
            height = template.height,
            transactions = template.transactions.len(),
            gas_used = template.gas_used,
            fees = template.fee_total,
            "assembled template"
        );
        Ok(template)
    }

    fn assemble<K: Clock>(
        &self,
        assembler: &BlockAssembler,
        mut ctx: AssemblyContext<'_, &MemoryChain, Coins, K>,
        mempool: &MempoolSnapshot,
    ) -> Result<BlockTemplate> {
        let time_limit = self.time_limit.map(|limit| ctx.clock.now() + limit);
        let reward = pay_to_pubkey_hash(&self.reward_to);
        Ok(assembler.create_new_block(&mut ctx, mempool, reward, self.proof.into(), time_limit)?)
    }

    fn load_mempool(&self) -> Result<MempoolSnapshot> {
        let Some(path) = &self.mempool else {
            return Ok(MempoolSnapshot::new());
        };
        let entries: Vec<MempoolInput> = read_json(path)?;
        Ok(entries
            .into_iter()
            .map(|entry| MempoolEntry::new(entry.tx, entry.fee).with_fee_delta(entry.fee_delta))
            .collect())
    }

    fn load_coins(&self) -> Result<Coins> {
        let Some(path) = &self.coins else {
            return Ok(BTreeMap::new());
        };
        let coins: Vec<CoinInput> = read_json(path)?;
        Ok(coins.into_iter().map(|coin| (coin.outpoint, coin.output)).collect())
    }
}
