//! The contract state as a revm database.

use std::{collections::BTreeMap, convert::Infallible};

use alloy_primitives::{keccak256, Address, B256, U256};
use revm::{
    bytecode::Bytecode,
    primitives::KECCAK_EMPTY,
    state::{AccountInfo, EvmState},
    Database, DatabaseCommit,
};

use super::ContractState;

/// Read-only view of a [`ContractState`] handed to revm for one transaction.
///
/// `credit` adds value to one account's balance as seen by the EVM; contract outputs use it
/// to bring the coins they carry into the EVM before execution.
#[derive(Debug, Clone, Copy)]
pub struct StateDb<'a> {
    state: &'a ContractState,
    block_hashes: &'a BTreeMap<u64, B256>,
    credit: Option<(Address, U256)>,
}

impl<'a> StateDb<'a> {
    /// Creates a view of `state` answering `BLOCKHASH` from `block_hashes`.
    pub const fn new(state: &'a ContractState, block_hashes: &'a BTreeMap<u64, B256>) -> Self {
        Self { state, block_hashes, credit: None }
    }

    /// Credits `value` to `address`.
    pub const fn with_credit(mut self, address: Address, value: U256) -> Self {
        self.credit = Some((address, value));
        self
    }

    fn credit_of(&self, address: &Address) -> U256 {
        match self.credit {
            Some((credited, value)) if credited == *address => value,
            _ => U256::ZERO,
        }
    }
}

impl Database for StateDb<'_> {
    type Error = Infallible;

    fn basic(&mut self, address: Address) -> Result<Option<AccountInfo>, Self::Error> {
        let credit = self.credit_of(&address);
        let Some(account) = self.state.account(&address) else {
            return Ok((!credit.is_zero())
                .then(|| AccountInfo::new(credit, 0, KECCAK_EMPTY, Bytecode::default())));
        };
        let code_hash =
            if account.code.is_empty() { KECCAK_EMPTY } else { keccak256(&account.code) };
        Ok(Some(AccountInfo::new(
            account.balance.saturating_add(credit),
            account.nonce,
            code_hash,
            Bytecode::new_legacy(account.code.clone()),
        )))
    }

    fn code_by_hash(&mut self, _code_hash: B256) -> Result<Bytecode, Self::Error> {
        // `basic` always hands out the code with the account.
        Ok(Bytecode::default())
    }

    fn storage(&mut self, address: Address, index: U256) -> Result<U256, Self::Error> {
        Ok(self.state.storage(&address, &index))
    }

    fn block_hash(&mut self, number: u64) -> Result<B256, Self::Error> {
        Ok(self.block_hashes.get(&number).copied().unwrap_or_default())
    }
}

impl DatabaseCommit for ContractState {
    fn commit(&mut self, changes: EvmState) {
        for (address, account) in changes {
            if !account.is_touched() {
                continue;
            }
            if account.is_selfdestructed() || account.is_empty() {
                self.remove_account(&address);
                continue;
            }
            let entry = self.account_mut(address);
            if account.is_created() {
                entry.storage.clear();
            }
            entry.balance = account.info.balance;
            entry.nonce = account.info.nonce;
            if let Some(code) = &account.info.code {
                entry.code = code.original_bytes();
            }
            for (key, slot) in account.storage {
                if slot.is_changed() {
                    self.set_storage(address, key, slot.present_value);
                }
            }
        }
    }
}
