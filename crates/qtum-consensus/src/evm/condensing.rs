//! Condensing transactions.
//!
//! Coins moved by a contract exist twice: as EVM balances and as ledger outputs. After an
//! execution that moved value, the condensing transaction spends the outputs holding the coins
//! of every account involved and pays each of them its new balance. Live contracts are paid
//! with a no-execution call output, anything else with a key hash output.

use std::collections::BTreeMap;

use alloy_primitives::{Address, U256};

use super::{ContractState, ContractVin, QtumTransaction, ValueTransfer};
use crate::{
    constants::evm::MAX_CONTRACT_VOUTS,
    destination::pay_to_pubkey_hash,
    script::opcodes::{OP_CALL, OP_SPEND},
    Amount, OutPoint, Script, ScriptBuilder, Transaction, TxIn, TxOut,
};

/// Error building a condensing transaction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CondensingError {
    /// The transfers take more from an account than it holds.
    #[error("transfers overdraw {0}")]
    Overdrawn(Address),
    /// A balance does not fit in an output.
    #[error("balance of {0} does not fit in an output")]
    BalanceOutOfRange(Address),
    /// The transaction would pay too many accounts.
    #[error("condensing transaction needs more than {MAX_CONTRACT_VOUTS} outputs")]
    TooManyOutputs,
}

/// A condensing transaction and the outputs it leaves the accounts it pays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condensed {
    /// The transaction.
    pub tx: Transaction,
    vins: BTreeMap<Address, ContractVin>,
}

impl Condensed {
    /// Records the outputs of the transaction as the coins of the accounts it pays, and marks
    /// the outputs of emptied accounts spent.
    pub fn apply(&self, state: &mut ContractState) {
        for (address, vin) in &self.vins {
            state.set_vin(*address, *vin);
        }
    }

    /// The output holding the coins of `address` once the transaction is applied.
    pub fn vin(&self, address: &Address) -> Option<&ContractVin> {
        self.vins.get(address)
    }
}

/// Builds the condensing transaction of a successful execution of `tx`.
///
/// The sender's coins are the contract output itself; every other account spends the output
/// recorded for it in `state`, which must already hold the result of the execution. Returns
/// `None` when the execution moved nothing.
pub fn condense(
    state: &ContractState,
    tx: &QtumTransaction,
    transfers: &[ValueTransfer],
) -> Result<Option<Condensed>, CondensingError> {
    if transfers.is_empty() {
        return Ok(None);
    }

    let mut vins = BTreeMap::new();
    let mut flows: BTreeMap<Address, (U256, U256)> = BTreeMap::new();
    for transfer in transfers {
        for address in [transfer.from, transfer.to] {
            if vins.contains_key(&address) {
                continue;
            }
            let vin = if address == tx.sender {
                to_amount(tx.value).filter(|value| *value > 0).map(|value| ContractVin {
                    outpoint: OutPoint::new(tx.txid, tx.vout),
                    value,
                    alive: true,
                })
            } else {
                state.vin(&address).copied()
            };
            if let Some(vin) = vin.filter(|vin| vin.alive) {
                vins.insert(address, vin);
            }
        }
        flows.entry(transfer.from).or_default().1 += transfer.value;
        flows.entry(transfer.to).or_default().0 += transfer.value;
    }

    let mut balances = BTreeMap::new();
    for (address, (plus, minus)) in flows {
        let held = vins.get(&address).map_or(0, |vin: &ContractVin| vin.value);
        let available = U256::from(held.max(0) as u64).saturating_add(plus);
        let balance = available.checked_sub(minus).ok_or(CondensingError::Overdrawn(address))?;
        let balance = to_amount(balance).ok_or(CondensingError::BalanceOutOfRange(address))?;
        balances.insert(address, balance);
    }

    let spend = ScriptBuilder::new().push_opcode(OP_SPEND).build();
    let inputs: Vec<TxIn> = vins
        .values()
        .filter(|vin| vin.value > 0)
        .map(|vin| TxIn { script_sig: spend.clone(), ..TxIn::new(vin.outpoint) })
        .collect();

    let mut outputs = Vec::new();
    let mut vouts = BTreeMap::new();
    for (address, balance) in balances.iter().filter(|(_, balance)| **balance > 0) {
        if outputs.len() == MAX_CONTRACT_VOUTS {
            return Err(CondensingError::TooManyOutputs);
        }
        let live = state.account(address).is_some_and(|account| !account.code.is_empty());
        let script = if live { no_exec_call(*address) } else { pay_to_pubkey_hash(&address.0) };
        vouts.insert(*address, outputs.len() as u32);
        outputs.push(TxOut::new(*balance, script));
    }
    if inputs.is_empty() || outputs.is_empty() {
        return Ok(None);
    }

    let condensing = Transaction { inputs, outputs, ..Default::default() };
    let txid = condensing.txid();
    let vins = balances
        .into_iter()
        .filter(|(address, _)| *address != tx.sender)
        .map(|(address, value)| {
            let vin = match vouts.get(&address) {
                Some(vout) => ContractVin { outpoint: OutPoint::new(txid, *vout), value, alive: true },
                None => ContractVin { outpoint: OutPoint::new(txid, 0), value: 0, alive: false },
            };
            (address, vin)
        })
        .collect();
    Ok(Some(Condensed { tx: condensing, vins }))
}

fn to_amount(value: U256) -> Option<Amount> {
    u64::try_from(value).ok().and_then(|value| Amount::try_from(value).ok())
}

/// A call output that holds coins for `contract` without executing it.
fn no_exec_call(contract: Address) -> Script {
    ScriptBuilder::new()
        .push_slice(&[0])
        .push_slice(&[0])
        .push_slice(&[0])
        .push_slice(&[0])
        .push_slice(contract.as_slice())
        .push_opcode(OP_CALL)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{ContractKind, VersionVm};
    use alloy_primitives::{Bytes, B256};

    const SENDER: Address = Address::repeat_byte(0x11);
    const PAYEE: Address = Address::repeat_byte(0x22);
    const CONTRACT: Address = Address::repeat_byte(0xcc);

    fn call(value: u64) -> QtumTransaction {
        QtumTransaction {
            kind: ContractKind::Call,
            sender: SENDER,
            receiver: Some(CONTRACT),
            value: U256::from(value),
            gas_limit: 100_000,
            gas_price: 40,
            data: Bytes::new(),
            version: VersionVm::EVM,
            txid: B256::repeat_byte(0xaa),
            vout: 1,
        }
    }

    fn transfer(from: Address, to: Address, value: u64) -> ValueTransfer {
        ValueTransfer { from, to, value: U256::from(value) }
    }

    fn state_with_contract(held: Option<ContractVin>) -> ContractState {
        let mut state = ContractState::new();
        state.account_mut(CONTRACT).code = Bytes::from_static(&[0x00]);
        if let Some(vin) = held {
            state.set_vin(CONTRACT, vin);
        }
        state
    }

    #[test]
    fn balances_move_to_new_outputs() {
        let held = ContractVin { outpoint: OutPoint::new(B256::repeat_byte(7), 3), value: 300, alive: true };
        let mut state = state_with_contract(Some(held));
        let tx = call(1000);

        let condensed = condense(
            &state,
            &tx,
            &[transfer(SENDER, CONTRACT, 1000), transfer(CONTRACT, PAYEE, 400)],
        )
        .unwrap()
        .unwrap();

        let spent: Vec<_> = condensed.tx.inputs.iter().map(|input| input.prevout).collect();
        assert_eq!(spent, vec![OutPoint::new(tx.txid, tx.vout), held.outpoint]);
        assert!(condensed.tx.inputs.iter().all(|input| input.script_sig.has_op_spend()));
        assert_eq!(
            condensed.tx.outputs,
            vec![
                TxOut::new(400, pay_to_pubkey_hash(&PAYEE.0)),
                TxOut::new(900, no_exec_call(CONTRACT)),
            ]
        );

        condensed.apply(&mut state);
        let txid = condensed.tx.txid();
        assert_eq!(
            state.vin(&CONTRACT),
            Some(&ContractVin { outpoint: OutPoint::new(txid, 1), value: 900, alive: true })
        );
        assert_eq!(state.vin(&PAYEE).map(|vin| vin.value), Some(400));
        assert!(state.vin(&SENDER).is_none());
    }

    #[test]
    fn emptied_accounts_lose_their_output() {
        let held = ContractVin { outpoint: OutPoint::new(B256::repeat_byte(7), 0), value: 50, alive: true };
        let mut state = state_with_contract(Some(held));

        let condensed =
            condense(&state, &call(0), &[transfer(CONTRACT, PAYEE, 50)]).unwrap().unwrap();
        assert_eq!(condensed.tx.outputs, vec![TxOut::new(50, pay_to_pubkey_hash(&PAYEE.0))]);

        condensed.apply(&mut state);
        assert!(!state.vin(&CONTRACT).unwrap().alive);
    }

    #[test]
    fn overdrawn_accounts_are_rejected() {
        let state = state_with_contract(None);
        assert_eq!(
            condense(&state, &call(0), &[transfer(CONTRACT, PAYEE, 1)]),
            Err(CondensingError::Overdrawn(CONTRACT))
        );
    }

    #[test]
    fn output_count_is_bounded() {
        let state = ContractState::new();
        let count = MAX_CONTRACT_VOUTS as u64 + 1;
        let transfers: Vec<_> = (0..count)
            .map(|i| transfer(SENDER, Address::left_padding_from(&(i + 1).to_be_bytes()), 1))
            .collect();
        assert_eq!(condense(&state, &call(count), &transfers), Err(CondensingError::TooManyOutputs));
        assert!(condense(&state, &call(count - 1), &transfers[1..]).unwrap().is_some());
    }

    #[test]
    fn nothing_moved_needs_no_transaction() {
        assert_eq!(condense(&ContractState::new(), &call(0), &[]), Ok(None));
    }
}
