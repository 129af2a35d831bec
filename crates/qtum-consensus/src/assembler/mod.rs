//! The block template assembler.
//!
//! Templates are filled by a package-aware greedy walk over the mempool. Packages are taken
//! best score first, either straight from the mempool or from the [`ModifiedIndex`] once
//! some of their ancestors made it into the block. Contract transactions are executed as
//! they are admitted, against two gas budgets: the soft limit the assembler works with and
//! the governed hard limit. Gas paid but not used is refunded by outputs appended to the
//! reward transaction, and value moved by a contract is settled by a condensing transaction
//! placed right after it.
//!
//! Assembly never changes the caller's contract state: the state is restored once the state
//! root of the template has been taken.

mod mempool;
mod options;
mod score;

pub use mempool::*;
pub use options::*;
pub use score::*;

use std::collections::{BTreeMap, BTreeSet};

use alloy_primitives::{Address, B256};
use auto_impl::auto_impl;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::{
    constants::{
        block::{
            COINBASE_RESERVED_SIGOPS, COINBASE_RESERVED_WEIGHT, MAX_CONSECUTIVE_FAILURES,
            NEAR_FULL_WEIGHT_MARGIN, SIGOPS_PER_WEIGHT_DIVISOR, WITNESS_SCALE_FACTOR,
        },
        money::money_range,
    },
    destination::extract_public_key_hash,
    difficulty::{median_time_past, next_target, CompactTarget, DifficultyError, HeaderChain},
    dgp::GasGovernor,
    dsha256,
    evm::{
        condense, BlockEnv, CoinView, ContractState, ContractTxConverter, Executor, GasSchedule,
    },
    merkle_root,
    params::ProofKind,
    script::opcodes::{OP_0, OP_RETURN},
    Amount, BlockHeader, ConsensusParams, OutPoint, Script, ScriptBuilder, Transaction, TxIn,
    TxOut, Txid,
};

/// Number of recent block hashes exposed to contracts.
const BLOCK_HASH_HISTORY: u32 = 256;

/// Header of the witness commitment output.
const WITNESS_COMMITMENT_HEADER: [u8; 4] = [0xaa, 0x21, 0xa9, 0xed];

/// Error aborting block assembly.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssemblerError {
    /// The chain has no tip to build on.
    #[error("no chain tip to build on")]
    MissingTip,
    /// The target of the template could not be computed.
    #[error(transparent)]
    Difficulty(#[from] DifficultyError),
    /// The reward transaction would pay an amount outside the money range.
    #[error("reward of {0} is outside the money range")]
    RewardOutOfRange(Amount),
}

/// Source of the current time, in seconds since the epoch.
#[auto_impl(&, Box, Arc)]
pub trait Clock {
    /// The current time.
    fn now(&self) -> i64;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs() as i64)
    }
}

/// Everything a template is built against.
#[derive(Debug)]
pub struct AssemblyContext<'a, C, V, K = SystemClock> {
    /// The active chain; its tip is the parent of the template.
    pub chain: C,
    /// Unspent outputs, used to find the senders of contract transactions.
    pub coins: V,
    /// Contract state at the chain tip.
    pub state: &'a mut ContractState,
    /// Gas governor of the chain.
    pub governor: &'a mut GasGovernor,
    /// Wall clock.
    pub clock: K,
}

impl<'a, C, V> AssemblyContext<'a, C, V> {
    /// Creates a context reading the system clock.
    pub fn new(
        chain: C,
        coins: V,
        state: &'a mut ContractState,
        governor: &'a mut GasGovernor,
    ) -> Self {
        Self { chain, coins, state, governor, clock: SystemClock }
    }
}

impl<'a, C, V, K> AssemblyContext<'a, C, V, K> {
    /// Replaces the clock.
    pub fn with_clock<T: Clock>(self, clock: T) -> AssemblyContext<'a, C, V, T> {
        let Self { chain, coins, state, governor, .. } = self;
        AssemblyContext { chain, coins, state, governor, clock }
    }
}

/// A block ready for the proof: the header lacks only its nonce or signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockTemplate {
    /// Header of the block.
    pub header: BlockHeader,
    /// Height of the block.
    pub height: u32,
    /// Transactions: the coinbase, the coinstake for proof-of-stake blocks, then the
    /// selected transactions, each contract transaction followed by its condensing
    /// transactions.
    pub transactions: Vec<Transaction>,
    /// Fee of every transaction; the coinbase entry holds the negated fee total.
    pub fees: Vec<Amount>,
    /// Signature operation cost of every transaction.
    pub sigop_costs: Vec<u64>,
    /// Fees collected, net of gas refunds.
    pub fee_total: Amount,
    /// Gas refunded to senders.
    pub refund_total: Amount,
    /// Gas used by contract transactions.
    pub gas_used: u64,
    /// Block weight, the coinbase reserve included.
    pub weight: u64,
    /// Gas budgets the template was built with.
    pub gas_limits: GasLimits,
}

impl BlockTemplate {
    /// The transaction paying the block reward.
    pub fn reward_transaction(&self) -> Option<&Transaction> {
        let index = if self.header.is_proof_of_stake() { 1 } else { 0 };
        self.transactions.get(index)
    }

    /// Ids of the transactions.
    pub fn txids(&self) -> Vec<Txid> {
        self.transactions.iter().map(Transaction::txid).collect()
    }
}

/// Builds block templates.
#[derive(Debug, Clone)]
pub struct BlockAssembler {
    params: ConsensusParams,
    options: AssemblerOptions,
}

impl BlockAssembler {
    /// Creates an assembler.
    pub const fn new(params: ConsensusParams, options: AssemblerOptions) -> Self {
        Self { params, options }
    }

    /// Options of the assembler.
    pub const fn options(&self) -> &AssemblerOptions {
        &self.options
    }

    /// Gas budgets at `height`, reading the governed values from `state`.
    pub fn gas_limits(
        &self,
        governor: &mut GasGovernor,
        state: &mut ContractState,
        height: u32,
    ) -> GasLimits {
        let hard = governor.block_gas_limit_for(state, height);
        let soft = self.options.soft_block_gas_limit.min(hard);
        GasLimits {
            hard,
            soft,
            tx: self.options.max_tx_gas_limit.unwrap_or(soft),
            min_gas_price: governor
                .min_gas_price_for(state, height)
                .max(self.options.staker_min_tx_gas_price),
        }
    }

    /// Builds a template on the chain tip paying the reward to `reward_script`.
    ///
    /// No transaction is selected at or after `time_limit`, and no contract transaction in
    /// the bytecode buffer before it.
    pub fn create_new_block<C, V, K>(
        &self,
        ctx: &mut AssemblyContext<'_, C, V, K>,
        mempool: &MempoolSnapshot,
        reward_script: Script,
        proof: ProofKind,
        time_limit: Option<i64>,
    ) -> Result<BlockTemplate, AssemblerError>
    where
        C: HeaderChain,
        V: CoinView,
        K: Clock,
    {
        let tip = ctx.chain.tip().ok_or(AssemblerError::MissingTip)?;
        let height = tip.height + 1;
        ctx.governor.at_tip(tip.hash);
        let lock_time_cutoff = median_time_past(&ctx.chain, &tip);
        let now = ctx.clock.now();

        let mut header = BlockHeader {
            version: self.options.block_version,
            prev_hash: tip.hash,
            ..Default::default()
        };
        match proof {
            ProofKind::Work => header.time = now.max(lock_time_cutoff + 1) as u32,
            ProofKind::Stake => {
                // Rounded up to the stake timestamp granularity, past the median time.
                let mask = i64::from(self.params.stake_timestamp_mask(height));
                header.time = ((now.max(lock_time_cutoff + 1) + mask) & !mask) as u32;
                header.prevout_stake = OutPoint::new(B256::ZERO, 0);
            }
        }
        header.bits = next_target(&ctx.chain, &header, &self.params, proof)?;

        let schedule = ctx.governor.schedule_for(ctx.state, height);
        let block_size = u64::from(ctx.governor.block_size_for(ctx.state, height));
        let gas_limits = self.gas_limits(ctx.governor, ctx.state, height);
        let max_weight = block_size * WITNESS_SCALE_FACTOR;

        let block = BlockEnv {
            number: height.into(),
            timestamp: header.time.into(),
            coinbase: extract_public_key_hash(&reward_script).map(Address::from).unwrap_or_default(),
            gas_limit: gas_limits.hard,
            difficulty: CompactTarget::from_bits(header.bits).target,
            base_fee: 0,
            chain_id: self.options.chain_id,
            block_hashes: (height.saturating_sub(BLOCK_HASH_HISTORY)..height)
                .filter_map(|h| ctx.chain.ancestor(h))
                .map(|entry| (u64::from(entry.height), entry.hash))
                .collect(),
        };

        let checkpoint = ctx.state.checkpoint();
        if height == self.params.offline_stake_height {
            if let Some(code) = &self.options.delegation_contract_code {
                debug!(target: "qtum::assembler", height, "deploying the delegation contract");
                let account = ctx.state.account_mut(self.params.delegations_address);
                account.code = code.clone();
                account.nonce = account.nonce.max(1);
            }
        }

        let mut assembly = Assembly {
            options: &self.options,
            height,
            lock_time_cutoff,
            time_limit,
            bytecode_deadline: time_limit.map(|limit| {
                limit - MinerParams::for_height(&self.params, height).bytecode_time_buffer
            }),
            gas_limits,
            max_weight,
            max_sigops: max_weight / SIGOPS_PER_WEIGHT_DIVISOR,
            schedule,
            block,
            reward: RewardTransaction::new(height, reward_script, proof),
            subsidy: self.params.block_subsidy(height),
            transactions: Vec::new(),
            fees: Vec::new(),
            sigop_costs: Vec::new(),
            in_block: BTreeSet::new(),
            failed: BTreeSet::new(),
            block_coins: BTreeMap::new(),
            block_weight: COINBASE_RESERVED_WEIGHT,
            block_sigops: COINBASE_RESERVED_SIGOPS,
            fee_sum: 0,
            gas_used: 0,
            refund_sender: 0,
            refund_outputs: Vec::new(),
        };
        assembly.add_package_txs(ctx, mempool);

        header.state_root = ctx.state.state_root();
        header.utxo_root = ctx.state.utxo_root();
        ctx.state.restore(checkpoint);

        let fee_total = assembly.fee_sum - assembly.refund_sender;
        let reward_value = fee_total + assembly.subsidy;
        if !money_range(reward_value) {
            return Err(AssemblerError::RewardOutOfRange(reward_value));
        }
        let mut transactions = assembly.reward.build(fee_total, assembly.subsidy, &assembly.refund_outputs);
        let mut fees = vec![-fee_total];
        let mut sigop_costs = vec![transactions[0].legacy_sigop_cost()];
        if proof.is_stake() {
            fees.push(0);
            sigop_costs.push(transactions[1].legacy_sigop_cost());
        }
        transactions.append(&mut assembly.transactions);
        fees.append(&mut assembly.fees);
        sigop_costs.append(&mut assembly.sigop_costs);
        add_witness_commitment(&mut transactions);
        header.merkle_root =
            merkle_root(&transactions.iter().map(Transaction::txid).collect::<Vec<_>>());

        debug!(
            target: "qtum::assembler",
            height,
            txs = transactions.len(),
            weight = assembly.block_weight,
            gas_used = assembly.gas_used,
            fee_total,
            "assembled block template"
        );
        Ok(BlockTemplate {
            header,
            height,
            transactions,
            fees,
            sigop_costs,
            fee_total,
            refund_total: assembly.refund_sender,
            gas_used: assembly.gas_used,
            weight: assembly.block_weight,
            gas_limits,
        })
    }
}

/// The coinbase, and the coinstake of proof-of-stake blocks, before the final amounts.
#[derive(Debug, Clone)]
struct RewardTransaction {
    coinbase: Transaction,
    coinstake: Option<Transaction>,
}

impl RewardTransaction {
    fn new(height: u32, reward_script: Script, proof: ProofKind) -> Self {
        let script_sig = ScriptBuilder::new().push_num(height.into()).push_opcode(OP_0).build();
        let coinbase_input = TxIn { script_sig, ..TxIn::new(OutPoint::null()) };
        match proof {
            ProofKind::Work => Self {
                coinbase: Transaction {
                    inputs: vec![coinbase_input],
                    outputs: vec![TxOut::new(0, reward_script)],
                    ..Default::default()
                },
                coinstake: None,
            },
            ProofKind::Stake => Self {
                coinbase: Transaction {
                    inputs: vec![coinbase_input],
                    outputs: vec![TxOut::empty()],
                    ..Default::default()
                },
                coinstake: Some(Transaction {
                    outputs: vec![TxOut::empty(), TxOut::new(0, reward_script)],
                    ..Default::default()
                }),
            },
        }
    }

    /// The transaction carrying the reward output.
    fn paying(&self) -> &Transaction {
        self.coinstake.as_ref().unwrap_or(&self.coinbase)
    }

    /// The transaction carrying the reward output, rebuilt to pay `fees` plus the subsidy
    /// and the `refunds`.
    fn rebuilt(&self, fees: Amount, subsidy: Amount, refunds: &[TxOut]) -> Transaction {
        let mut paying = self.paying().clone();
        let refund_total: Amount = refunds.iter().map(|output| output.value).sum();
        if let Some(reward) = paying.outputs.last_mut() {
            reward.value = fees + subsidy - refund_total;
        }
        paying.outputs.extend_from_slice(refunds);
        paying
    }

    /// The reward transactions with their final outputs. `fees` is already net of refunds.
    fn build(&self, fees: Amount, subsidy: Amount, refunds: &[TxOut]) -> Vec<Transaction> {
        let refund_total: Amount = refunds.iter().map(|output| output.value).sum();
        let paying = self.rebuilt(fees + refund_total, subsidy, refunds);
        match self.coinstake {
            Some(_) => vec![self.coinbase.clone(), paying],
            None => vec![paying],
        }
    }
}

/// Appends the witness commitment to the coinbase.
fn add_witness_commitment(transactions: &mut [Transaction]) {
    let wtxids: Vec<B256> = transactions
        .iter()
        .enumerate()
        .map(|(index, tx)| if index == 0 { B256::ZERO } else { tx.wtxid() })
        .collect();
    let reserved = B256::ZERO;
    let mut preimage = merkle_root(&wtxids).to_vec();
    preimage.extend_from_slice(reserved.as_slice());
    let commitment = dsha256(&preimage);

    let mut payload = WITNESS_COMMITMENT_HEADER.to_vec();
    payload.extend_from_slice(commitment.as_slice());
    let Some(coinbase) = transactions.first_mut() else {
        return;
    };
    coinbase.outputs.push(TxOut::new(
        0,
        ScriptBuilder::new().push_opcode(OP_RETURN).push_slice(&payload).build(),
    ));
    if let Some(input) = coinbase.inputs.first_mut() {
        input.witness = vec![reserved.to_vec().into()];
    }
}

/// Unspent outputs of the coin view and of the transactions already in the block.
struct BlockCoins<'a, V> {
    base: &'a V,
    block: &'a BTreeMap<OutPoint, TxOut>,
}

impl<V: CoinView> CoinView for BlockCoins<'_, V> {
    fn output(&self, outpoint: &OutPoint) -> Option<TxOut> {
        self.block.get(outpoint).cloned().or_else(|| self.base.output(outpoint))
    }
}

/// Package chosen for the next inclusion attempt.
struct Candidate<'m> {
    entry: &'m MempoolEntry,
    using_modified: bool,
    size: u64,
    fees: Amount,
    sigop_cost: u64,
}

/// State of one assembly pass.
struct Assembly<'o> {
    options: &'o AssemblerOptions,
    height: u32,
    lock_time_cutoff: i64,
    time_limit: Option<i64>,
    bytecode_deadline: Option<i64>,
    gas_limits: GasLimits,
    max_weight: u64,
    max_sigops: u64,
    schedule: GasSchedule,
    block: BlockEnv,
    reward: RewardTransaction,
    subsidy: Amount,
    transactions: Vec<Transaction>,
    fees: Vec<Amount>,
    sigop_costs: Vec<u64>,
    in_block: BTreeSet<Txid>,
    failed: BTreeSet<Txid>,
    block_coins: BTreeMap<OutPoint, TxOut>,
    block_weight: u64,
    block_sigops: u64,
    fee_sum: Amount,
    gas_used: u64,
    refund_sender: Amount,
    refund_outputs: Vec<TxOut>,
}

impl Assembly<'_> {
    fn out_of_time(&self, now: i64) -> bool {
        self.time_limit.is_some_and(|limit| now >= limit)
    }

    /// Walks the mempool best package first, adding every package that fits.
    fn add_package_txs<C, V, K>(
        &mut self,
        ctx: &mut AssemblyContext<'_, C, V, K>,
        mempool: &MempoolSnapshot,
    ) where
        V: CoinView,
        K: Clock,
    {
        let by_score = mempool.by_score();
        let mut next = 0;
        let mut modified = ModifiedIndex::new();
        let mut consecutive_failures = 0u32;

        loop {
            if self.out_of_time(ctx.clock.now()) {
                debug!(target: "qtum::assembler", height = self.height, "time limit reached");
                break;
            }
            while let Some(entry) = by_score.get(next) {
                let txid = &entry.txid;
                if modified.contains(txid) || self.in_block.contains(txid) || self.failed.contains(txid) {
                    next += 1;
                } else {
                    break;
                }
            }

            let best_modified = modified.best().and_then(|best| {
                mempool.get(best.txid()).map(|entry| (entry, best.clone()))
            });
            let candidate = match (by_score.get(next).copied(), best_modified) {
                (None, None) => break,
                (Some(entry), Some((modified_entry, best)))
                    if best.score < PackageScore::of(entry) =>
                {
                    Candidate::modified(modified_entry, &best)
                }
                (Some(entry), _) => {
                    next += 1;
                    Candidate::unmodified(entry)
                }
                (None, Some((modified_entry, best))) => Candidate::modified(modified_entry, &best),
            };
            let txid = candidate.entry.txid;

            if candidate.fees < self.options.min_package_fee(candidate.size) {
                trace!(target: "qtum::assembler", %txid, "package fee rate below the minimum");
                break;
            }

            if !self.test_package(candidate.size, candidate.sigop_cost) {
                if candidate.using_modified {
                    modified.remove(&txid);
                    self.failed.insert(txid);
                }
                consecutive_failures += 1;
                if consecutive_failures > MAX_CONSECUTIVE_FAILURES &&
                    self.block_weight > self.max_weight.saturating_sub(NEAR_FULL_WEIGHT_MARGIN)
                {
                    debug!(target: "qtum::assembler", height = self.height, "block is full");
                    break;
                }
                continue;
            }

            let mut package: Vec<&MempoolEntry> = mempool
                .ancestors(&txid)
                .iter()
                .filter(|ancestor| !self.in_block.contains(*ancestor))
                .filter_map(|ancestor| mempool.get(ancestor))
                .collect();
            package.push(candidate.entry);

            if package.iter().any(|entry| self.failed.contains(&entry.txid)) ||
                !self.test_package_transactions(&package)
            {
                if candidate.using_modified {
                    modified.remove(&txid);
                }
                self.failed.insert(txid);
                continue;
            }
            consecutive_failures = 0;

            package.sort_by_key(|entry| (entry.count_with_ancestors, entry.txid));
            let mut added = true;
            for entry in &package {
                if !added || self.out_of_time(ctx.clock.now()) {
                    added = false;
                } else if entry.contract_op.is_contract() {
                    added = self.attempt_contract(ctx, entry);
                    if !added {
                        self.failed.insert(entry.txid);
                        self.failed.insert(txid);
                    }
                } else {
                    self.add_to_block(entry);
                }
                modified.remove(&entry.txid);
            }
            if !added {
                continue;
            }

            modified.update_for_package_inclusion(mempool, &package, &self.in_block);
        }
    }

    /// Returns whether a package of `size` and `sigop_cost` fits in the block.
    fn test_package(&self, size: u64, sigop_cost: u64) -> bool {
        self.block_weight + WITNESS_SCALE_FACTOR * size < self.max_weight &&
            self.block_sigops + sigop_cost < self.max_sigops
    }

    /// Checks what the mempool already checked, logging any inconsistency.
    fn test_package_transactions(&self, package: &[&MempoolEntry]) -> bool {
        for entry in package {
            if !entry.tx.is_final(self.height, self.lock_time_cutoff) {
                warn!(target: "qtum::assembler", txid = %entry.txid, "mempool transaction is not final");
                return false;
            }
            if entry.tx.weight() > self.max_weight {
                warn!(target: "qtum::assembler", txid = %entry.txid, "mempool transaction exceeds the block weight");
                return false;
            }
        }
        true
    }

    fn add_to_block(&mut self, entry: &MempoolEntry) {
        trace!(target: "qtum::assembler", txid = %entry.txid, fee = entry.fee, "adding transaction");
        self.block_weight += entry.tx.weight();
        self.block_sigops += entry.sigop_cost;
        self.fee_sum += entry.fee;
        self.push(entry);
    }

    fn push(&mut self, entry: &MempoolEntry) {
        for (vout, output) in entry.tx.outputs.iter().enumerate() {
            self.block_coins.insert(OutPoint::new(entry.txid, vout as u32), output.clone());
        }
        self.transactions.push(entry.tx.clone());
        self.fees.push(entry.fee);
        self.sigop_costs.push(entry.sigop_cost);
        self.in_block.insert(entry.txid);
    }

    /// Executes the contract outputs of `entry` and adds it if they all succeed within the
    /// budgets. The contract state is left untouched on failure.
    fn attempt_contract<C, V, K>(
        &mut self,
        ctx: &mut AssemblyContext<'_, C, V, K>,
        entry: &MempoolEntry,
    ) -> bool
    where
        V: CoinView,
        K: Clock,
    {
        let txid = entry.txid;
        if self.bytecode_deadline.is_some_and(|deadline| ctx.clock.now() >= deadline) {
            trace!(target: "qtum::assembler", %txid, "past the bytecode deadline");
            return false;
        }
        if self.options.disable_contract_staking {
            return false;
        }
        let coins = BlockCoins { base: &ctx.coins, block: &self.block_coins };
        let contract_txs = match ContractTxConverter::new(&entry.tx, coins).extract() {
            Ok(txs) => txs,
            Err(err) => {
                debug!(target: "qtum::assembler", %txid, %err, "invalid contract transaction");
                return false;
            }
        };

        let limits = self.gas_limits;
        let mut tx_gas = 0u64;
        for contract_tx in &contract_txs {
            tx_gas = tx_gas.saturating_add(contract_tx.gas_limit);
            if tx_gas > limits.tx ||
                self.gas_used.saturating_add(contract_tx.gas_limit) > limits.soft ||
                contract_tx.gas_price < limits.min_gas_price
            {
                trace!(target: "qtum::assembler", %txid, tx_gas, "contract transaction over budget");
                return false;
            }
        }

        let checkpoint = ctx.state.checkpoint();
        let mut gas_used = 0u64;
        let mut refunds = Vec::new();
        let mut condensing = Vec::new();
        for contract_tx in &contract_txs {
            let result = Executor::new(ctx.state, self.schedule.clone(), self.block.clone())
                .transact(contract_tx);
            if !result.is_success() {
                debug!(
                    target: "qtum::assembler",
                    %txid,
                    vout = contract_tx.vout,
                    status = ?result.status,
                    "contract execution failed"
                );
                ctx.state.restore(checkpoint);
                return false;
            }
            match condense(ctx.state, contract_tx, &result.transfers) {
                Ok(Some(condensed)) => {
                    condensed.apply(ctx.state);
                    condensing.push(condensed.tx);
                }
                Ok(None) => {}
                Err(err) => {
                    debug!(target: "qtum::assembler", %txid, vout = contract_tx.vout, %err, "value transfers cannot be condensed");
                    ctx.state.restore(checkpoint);
                    return false;
                }
            }
            gas_used += result.gas_used;
            let unused = contract_tx.gas_limit.saturating_sub(result.gas_used);
            let refund = unused
                .checked_mul(contract_tx.gas_price)
                .and_then(|refund| Amount::try_from(refund).ok());
            match refund {
                Some(0) => {}
                Some(refund) => refunds.push(TxOut::new(refund, contract_tx.refund_script())),
                None => {
                    ctx.state.restore(checkpoint);
                    return false;
                }
            }
        }
        if self.gas_used + gas_used > limits.soft {
            trace!(target: "qtum::assembler", %txid, gas_used, "soft block gas limit exceeded");
            ctx.state.restore(checkpoint);
            return false;
        }

        let refund: Amount = refunds.iter().map(|output| output.value).sum();
        let old_reward = self.reward.rebuilt(self.fee_sum, self.subsidy, &self.refund_outputs);
        let mut all_refunds = self.refund_outputs.clone();
        all_refunds.extend_from_slice(&refunds);
        let new_reward = self.reward.rebuilt(self.fee_sum + entry.fee, self.subsidy, &all_refunds);
        let condensing_weight: u64 = condensing.iter().map(Transaction::weight).sum();
        let condensing_sigops: u64 = condensing.iter().map(Transaction::legacy_sigop_cost).sum();
        let weight =
            (self.block_weight + entry.tx.weight() + condensing_weight + new_reward.weight())
                .saturating_sub(old_reward.weight());
        let sigops = (self.block_sigops +
            entry.sigop_cost +
            condensing_sigops +
            new_reward.legacy_sigop_cost())
        .saturating_sub(old_reward.legacy_sigop_cost());
        if sigops > self.max_sigops || weight > self.max_weight {
            trace!(target: "qtum::assembler", %txid, weight, sigops, "contract transaction does not fit");
            ctx.state.restore(checkpoint);
            return false;
        }

        debug!(
            target: "qtum::assembler",
            %txid,
            gas_used,
            refund,
            condensing = condensing.len(),
            "adding contract transaction"
        );
        self.gas_used += gas_used;
        self.refund_sender += refund;
        self.refund_outputs = all_refunds;
        self.block_weight = weight;
        self.block_sigops = sigops;
        self.fee_sum += entry.fee;
        self.push(entry);
        for tx in condensing {
            self.push_condensing(tx);
        }
        true
    }

    /// Adds a condensing transaction right after the contract transaction it settles.
    fn push_condensing(&mut self, tx: Transaction) {
        let txid = tx.txid();
        trace!(target: "qtum::assembler", %txid, outputs = tx.outputs.len(), "adding condensing transaction");
        for (vout, output) in tx.outputs.iter().enumerate() {
            self.block_coins.insert(OutPoint::new(txid, vout as u32), output.clone());
        }
        self.fees.push(0);
        self.sigop_costs.push(tx.legacy_sigop_cost());
        self.transactions.push(tx);
    }
}

impl<'m> Candidate<'m> {
    fn unmodified(entry: &'m MempoolEntry) -> Self {
        Self {
            entry,
            using_modified: false,
            size: entry.size_with_ancestors,
            fees: entry.mod_fees_with_ancestors,
            sigop_cost: entry.sigop_cost_with_ancestors,
        }
    }

    fn modified(entry: &'m MempoolEntry, modified: &ModifiedEntry) -> Self {
        Self {
            entry,
            using_modified: true,
            size: modified.score.size_with_ancestors,
            fees: modified.score.mod_fees_with_ancestors,
            sigop_cost: modified.sigop_cost_with_ancestors,
        }
    }
}
