use std::collections::BTreeMap;

use alloy_primitives::B256;

use crate::{
    constants::money::COIN, destination::pay_to_pubkey_hash, Amount, Hash160, OutPoint, Script,
    Transaction, TxIn, TxOut, Txid,
};

/// Key hash of the sender of transactions built by [`TxBuilder::new`].
pub const TEST_SENDER: Hash160 = Hash160::repeat_byte(0x5e);

/// Outpoint of the funding coin number `seed`.
pub const fn funding_outpoint(seed: u8) -> OutPoint {
    OutPoint::new(B256::repeat_byte(seed), 0)
}

/// Funding coins paying [`TEST_SENDER`] for every seed in `seeds`.
pub fn funding_coins(seeds: impl IntoIterator<Item = u8>) -> BTreeMap<OutPoint, TxOut> {
    seeds
        .into_iter()
        .map(|seed| (funding_outpoint(seed), TxOut::new(10 * COIN, pay_to_pubkey_hash(&TEST_SENDER))))
        .collect()
}

/// Builds ledger transactions.
#[derive(Debug, Clone, Default)]
pub struct TxBuilder {
    tx: Transaction,
}

impl TxBuilder {
    /// A transaction spending the funding coin number `seed`.
    pub fn new(seed: u8) -> Self {
        Self::spending_outpoint(funding_outpoint(seed))
    }

    /// A transaction spending output `vout` of `txid`.
    pub fn spending(txid: Txid, vout: u32) -> Self {
        Self::spending_outpoint(OutPoint::new(txid, vout))
    }

    fn spending_outpoint(outpoint: OutPoint) -> Self {
        Self { tx: Transaction { inputs: vec![TxIn::new(outpoint)], ..Default::default() } }
    }

    /// Adds an input.
    pub fn input(mut self, outpoint: OutPoint) -> Self {
        self.tx.inputs.push(TxIn::new(outpoint));
        self
    }

    /// Adds an output.
    pub fn output(mut self, value: Amount, script: Script) -> Self {
        self.tx.outputs.push(TxOut::new(value, script));
        self
    }

    /// Adds an output paying [`TEST_SENDER`].
    pub fn pay(self, value: Amount) -> Self {
        self.output(value, pay_to_pubkey_hash(&TEST_SENDER))
    }

    /// Sets the lock time, making the inputs non-final.
    pub fn lock_time(mut self, lock_time: u32) -> Self {
        self.tx.lock_time = lock_time;
        for input in &mut self.tx.inputs {
            input.sequence = 0;
        }
        self
    }

    /// The transaction.
    pub fn build(self) -> Transaction {
        self.tx
    }
}
