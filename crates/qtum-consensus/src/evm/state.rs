use std::collections::BTreeMap;

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

use crate::{Amount, OutPoint};

/// An account of the contract state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Account {
    /// Balance in smallest units.
    pub balance: U256,
    /// Nonce, incremented by every contract creation from this account.
    pub nonce: u64,
    /// Deployed code.
    pub code: Bytes,
    /// Storage; zero values are never stored.
    pub storage: BTreeMap<U256, U256>,
}

impl Account {
    /// Returns whether the account is empty in the EIP-161 sense.
    pub fn is_empty(&self) -> bool {
        self.balance.is_zero() && self.nonce == 0 && self.code.is_empty()
    }
}

/// The ledger output holding the coins of an account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractVin {
    /// Output holding the coins.
    pub outpoint: OutPoint,
    /// Coins held.
    pub value: Amount,
    /// Whether the output is still unspent.
    pub alive: bool,
}

/// An opaque snapshot of the contract state, returned by [`ContractState::checkpoint`].
#[derive(Debug, Clone)]
pub struct StateCheckpoint {
    accounts: BTreeMap<Address, Account>,
    vins: BTreeMap<Address, ContractVin>,
}

impl StateCheckpoint {
    /// The state root at the time of the checkpoint.
    pub fn state_root(&self) -> B256 {
        state_root_of(&self.accounts)
    }
}

/// The account and contract state the EVM executes against.
///
/// The state is owned by the caller and handed to every operation that reads or writes it.
/// Its content hash is the state root committed to by block headers. Next to the accounts it
/// keeps the contract UTXO set: for every account holding coins, the ledger output they sit
/// in. Its hash is the UTXO root of block headers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContractState {
    accounts: BTreeMap<Address, Account>,
    vins: BTreeMap<Address, ContractVin>,
}

impl ContractState {
    /// Creates an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// The account at `address`.
    pub fn account(&self, address: &Address) -> Option<&Account> {
        self.accounts.get(address)
    }

    /// The account at `address`, created empty if missing.
    pub fn account_mut(&mut self, address: Address) -> &mut Account {
        self.accounts.entry(address).or_default()
    }

    /// Inserts or replaces an account.
    pub fn insert_account(&mut self, address: Address, account: Account) {
        self.accounts.insert(address, account);
    }

    /// Removes an account.
    pub fn remove_account(&mut self, address: &Address) -> Option<Account> {
        self.accounts.remove(address)
    }

    /// Returns whether an account exists at `address`.
    pub fn exists(&self, address: &Address) -> bool {
        self.accounts.contains_key(address)
    }

    /// All accounts, ordered by address.
    pub fn accounts(&self) -> impl Iterator<Item = (&Address, &Account)> {
        self.accounts.iter()
    }

    /// Balance of `address`.
    pub fn balance(&self, address: &Address) -> U256 {
        self.accounts.get(address).map(|account| account.balance).unwrap_or_default()
    }

    /// Code of `address`.
    pub fn code(&self, address: &Address) -> Bytes {
        self.accounts.get(address).map(|account| account.code.clone()).unwrap_or_default()
    }

    /// Storage value of a slot.
    pub fn storage(&self, address: &Address, key: &U256) -> U256 {
        self.accounts
            .get(address)
            .and_then(|account| account.storage.get(key).copied())
            .unwrap_or_default()
    }

    /// Writes a storage value, dropping the slot when the value is zero.
    pub fn set_storage(&mut self, address: Address, key: U256, value: U256) {
        let account = self.account_mut(address);
        if value.is_zero() {
            account.storage.remove(&key);
        } else {
            account.storage.insert(key, value);
        }
    }

    /// The output holding the coins of `address`.
    pub fn vin(&self, address: &Address) -> Option<&ContractVin> {
        self.vins.get(address)
    }

    /// Records the output holding the coins of `address`. A spent output is only recorded
    /// over a previous one.
    pub fn set_vin(&mut self, address: Address, vin: ContractVin) {
        if vin.alive {
            self.vins.insert(address, vin);
        } else if let Some(previous) = self.vins.get_mut(&address) {
            *previous = vin;
        }
    }

    /// All recorded outputs, ordered by address.
    pub fn vins(&self) -> impl Iterator<Item = (&Address, &ContractVin)> {
        self.vins.iter()
    }

    /// Takes a snapshot that [`ContractState::restore`] returns to.
    pub fn checkpoint(&self) -> StateCheckpoint {
        StateCheckpoint { accounts: self.accounts.clone(), vins: self.vins.clone() }
    }

    /// Returns the state to a snapshot.
    pub fn restore(&mut self, checkpoint: StateCheckpoint) {
        self.accounts = checkpoint.accounts;
        self.vins = checkpoint.vins;
    }

    /// Content hash of the state.
    pub fn state_root(&self) -> B256 {
        state_root_of(&self.accounts)
    }

    /// Content hash of the unspent outputs holding account coins.
    pub fn utxo_root(&self) -> B256 {
        let mut buf = Vec::with_capacity(self.vins.len() * 96);
        for (address, vin) in self.vins.iter().filter(|(_, vin)| vin.alive) {
            buf.extend_from_slice(address.as_slice());
            buf.extend_from_slice(vin.outpoint.txid.as_slice());
            buf.extend_from_slice(&vin.outpoint.vout.to_be_bytes());
            buf.extend_from_slice(&vin.value.to_be_bytes());
        }
        keccak256(&buf)
    }
}

fn state_root_of(accounts: &BTreeMap<Address, Account>) -> B256 {
    let mut buf = Vec::with_capacity(accounts.len() * 128);
    for (address, account) in accounts {
        buf.extend_from_slice(address.as_slice());
        buf.extend_from_slice(&account.balance.to_be_bytes::<32>());
        buf.extend_from_slice(&account.nonce.to_be_bytes());
        buf.extend_from_slice(keccak256(&account.code).as_slice());
        let mut storage = Vec::with_capacity(account.storage.len() * 64);
        for (key, value) in &account.storage {
            storage.extend_from_slice(&key.to_be_bytes::<32>());
            storage.extend_from_slice(&value.to_be_bytes::<32>());
        }
        buf.extend_from_slice(keccak256(&storage).as_slice());
    }
    keccak256(&buf)
}
