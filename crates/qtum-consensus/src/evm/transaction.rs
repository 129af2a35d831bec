//! Extraction of EVM transactions from the contract outputs of ledger transactions.

use std::collections::BTreeMap;

use alloy_primitives::{Address, Bytes, U256};
use auto_impl::auto_impl;
use serde::{Deserialize, Serialize};

use super::EvmError;
use crate::{
    contract_address,
    destination::{extract_public_key_hash, pay_to_pubkey_hash},
    script::{ContractKind, ContractOutput, VersionVm},
    Amount, OutPoint, Script, Transaction, TxOut, Txid,
};

/// Read access to unspent outputs, used to find the sender of a contract transaction.
#[auto_impl(&, Box, Arc)]
pub trait CoinView {
    /// The unspent output at `outpoint`.
    fn output(&self, outpoint: &OutPoint) -> Option<TxOut>;
}

impl CoinView for BTreeMap<OutPoint, TxOut> {
    fn output(&self, outpoint: &OutPoint) -> Option<TxOut> {
        self.get(outpoint).cloned()
    }
}

/// One contract output of a ledger transaction, ready for execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QtumTransaction {
    /// Create or call.
    pub kind: ContractKind,
    /// Account executing the output.
    pub sender: Address,
    /// Called contract, for calls.
    pub receiver: Option<Address>,
    /// Value moved into the contract.
    pub value: U256,
    /// Gas limit.
    pub gas_limit: u64,
    /// Gas price in smallest units per gas.
    pub gas_price: u64,
    /// Init code or call data.
    pub data: Bytes,
    /// VM version of the output.
    pub version: VersionVm,
    /// Id of the ledger transaction.
    pub txid: Txid,
    /// Index of the contract output.
    pub vout: u32,
}

impl QtumTransaction {
    /// Returns whether this deploys a contract.
    pub fn is_create(&self) -> bool {
        self.kind == ContractKind::Create
    }

    /// The contract executed: the receiver of a call, or the address a create deploys to.
    pub fn contract_address(&self) -> Address {
        self.receiver.unwrap_or_else(|| contract_address(&self.txid, self.vout))
    }

    /// Largest fee the output may pay for gas.
    pub fn gas_fee(&self) -> Option<Amount> {
        self.gas_limit.checked_mul(self.gas_price).and_then(|fee| Amount::try_from(fee).ok())
    }

    /// Script paying refunds back to the sender.
    pub fn refund_script(&self) -> Script {
        pay_to_pubkey_hash(&self.sender.0)
    }
}

/// Converts the contract outputs of a ledger transaction into [`QtumTransaction`]s.
#[derive(Debug)]
pub struct ContractTxConverter<'a, V> {
    tx: &'a Transaction,
    coins: V,
}

impl<'a, V: CoinView> ContractTxConverter<'a, V> {
    /// Creates a converter for `tx`, resolving its inputs through `coins`.
    pub const fn new(tx: &'a Transaction, coins: V) -> Self {
        Self { tx, coins }
    }

    /// The default sender: the key hash paid by the output the first input spends.
    pub fn default_sender(&self) -> Result<Address, EvmError> {
        let input = self.tx.inputs.first().ok_or(EvmError::MissingInputs)?;
        let prevout = self
            .coins
            .output(&input.prevout)
            .ok_or(EvmError::MissingPrevout(input.prevout))?;
        extract_public_key_hash(&prevout.script_pubkey)
            .map(Address::from)
            .ok_or(EvmError::InvalidSender(input.prevout))
    }

    /// Extracts every executable contract output, in output order.
    ///
    /// Outputs with the no-execution version are skipped. A malformed contract output
    /// invalidates the whole transaction.
    pub fn extract(&self) -> Result<Vec<QtumTransaction>, EvmError> {
        if !self.tx.has_create_or_call() {
            return Ok(Vec::new());
        }
        let txid = self.tx.txid();
        let mut default_sender = None;
        let mut transactions = Vec::new();
        for (vout, output) in self.tx.outputs.iter().enumerate() {
            if !output.script_pubkey.has_contract_op() {
                continue;
            }
            let contract = ContractOutput::parse(&output.script_pubkey)?;
            if !contract.executes() {
                continue;
            }
            let sender = match &contract.sender {
                Some(sender) => Address::from(sender.key_hash),
                None => match default_sender {
                    Some(sender) => sender,
                    None => *default_sender.insert(self.default_sender()?),
                },
            };
            transactions.push(QtumTransaction {
                kind: contract.kind,
                sender,
                receiver: contract.receiver,
                value: U256::from(output.value.max(0) as u64),
                gas_limit: contract.gas_limit,
                gas_price: contract.gas_price,
                data: contract.data,
                version: contract.version.unwrap_or(VersionVm::EVM),
                txid,
                vout: vout as u32,
            });
        }
        Ok(transactions)
    }
}
