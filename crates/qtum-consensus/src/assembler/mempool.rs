//! Read-only view of the mempool handed to the assembler.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::PackageScore;
use crate::{script::ContractOutput, Amount, Transaction, Txid};

/// Contract operation carried by a transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContractOp {
    /// No contract output.
    #[default]
    None,
    /// At least one output deploys a contract.
    Create,
    /// Outputs only call existing contracts.
    Call,
}

impl ContractOp {
    /// The contract operation of `tx`. A transaction with both kinds of output counts as a
    /// create.
    pub fn of(tx: &Transaction) -> Self {
        let scripts = || tx.outputs.iter().map(|output| &output.script_pubkey);
        if scripts().any(|script| script.has_op_create()) {
            Self::Create
        } else if scripts().any(|script| script.has_op_call()) {
            Self::Call
        } else {
            Self::None
        }
    }

    /// Returns whether the transaction executes contract code.
    pub const fn is_contract(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// A mempool transaction with the aggregates of its unconfirmed ancestors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MempoolEntry {
    /// The transaction.
    pub tx: Transaction,
    /// Id of the transaction.
    pub txid: Txid,
    /// Fee paid.
    pub fee: Amount,
    /// Fee used for ordering, including any prioritisation delta.
    pub modified_fee: Amount,
    /// Virtual size.
    pub size: u64,
    /// Signature operation cost.
    pub sigop_cost: u64,
    /// Contract operation of the transaction.
    pub contract_op: ContractOp,
    /// Lowest gas price among the contract outputs, zero without any.
    pub min_gas_price: u64,
    /// Unconfirmed parents.
    pub parents: BTreeSet<Txid>,
    /// Number of unconfirmed ancestors, the entry included.
    pub count_with_ancestors: u64,
    /// Virtual size of the entry and its unconfirmed ancestors.
    pub size_with_ancestors: u64,
    /// Modified fees of the entry and its unconfirmed ancestors.
    pub mod_fees_with_ancestors: Amount,
    /// Signature operation cost of the entry and its unconfirmed ancestors.
    pub sigop_cost_with_ancestors: u64,
}

impl MempoolEntry {
    /// Creates an entry without ancestors for `tx` paying `fee`.
    pub fn new(tx: Transaction, fee: Amount) -> Self {
        let size = tx.weight().div_ceil(crate::constants::block::WITNESS_SCALE_FACTOR);
        let sigop_cost = tx.legacy_sigop_cost();
        let contract_op = ContractOp::of(&tx);
        let min_gas_price = tx
            .outputs
            .iter()
            .filter(|output| output.script_pubkey.has_contract_op())
            .filter_map(|output| ContractOutput::parse(&output.script_pubkey).ok())
            .map(|contract| contract.gas_price)
            .min()
            .unwrap_or_default();
        Self {
            txid: tx.txid(),
            tx,
            fee,
            modified_fee: fee,
            size,
            sigop_cost,
            contract_op,
            min_gas_price,
            parents: BTreeSet::new(),
            count_with_ancestors: 1,
            size_with_ancestors: size,
            mod_fees_with_ancestors: fee,
            sigop_cost_with_ancestors: sigop_cost,
        }
    }

    /// Adds a prioritisation delta to the fee used for ordering.
    pub fn with_fee_delta(mut self, delta: Amount) -> Self {
        self.modified_fee += delta;
        self.mod_fees_with_ancestors += delta;
        self
    }

    /// Returns whether the entry has no unconfirmed ancestors left.
    pub const fn is_resolved(&self) -> bool {
        self.size_with_ancestors == self.size
    }
}

/// A consistent snapshot of the mempool.
///
/// Entries may be inserted in any order: an entry inserted before its parents is linked to
/// them, and its ancestor aggregates updated, when they arrive.
#[derive(Debug, Clone, Default)]
pub struct MempoolSnapshot {
    entries: BTreeMap<Txid, MempoolEntry>,
    // Entries spending the outputs of each transaction, present or not.
    spenders: BTreeMap<Txid, BTreeSet<Txid>>,
}

impl MempoolSnapshot {
    /// Creates an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `entry`, linking it to its parents and children already present and
    /// recomputing the ancestor aggregates it changes. Replaces an entry with the same id.
    pub fn insert(&mut self, mut entry: MempoolEntry) {
        let txid = entry.txid;
        if let Some(previous) = self.entries.remove(&txid) {
            for input in &previous.tx.inputs {
                if let Some(spenders) = self.spenders.get_mut(&input.prevout.txid) {
                    spenders.remove(&txid);
                }
            }
        }
        for input in &entry.tx.inputs {
            self.spenders.entry(input.prevout.txid).or_default().insert(txid);
        }
        entry.parents = entry
            .tx
            .inputs
            .iter()
            .map(|input| input.prevout.txid)
            .filter(|parent| self.entries.contains_key(parent))
            .collect();
        self.entries.insert(txid, entry);

        let children: Vec<Txid> = self.spenders.get(&txid).into_iter().flatten().copied().collect();
        for child in children {
            if let Some(child) = self.entries.get_mut(&child) {
                child.parents.insert(txid);
            }
        }
        self.refresh_aggregates(&txid);
        for descendant in self.descendants(&txid) {
            self.refresh_aggregates(&descendant);
        }
    }

    /// The entry with id `txid`.
    pub fn get(&self, txid: &Txid) -> Option<&MempoolEntry> {
        self.entries.get(txid)
    }

    /// Returns whether the snapshot holds `txid`.
    pub fn contains(&self, txid: &Txid) -> bool {
        self.entries.contains_key(txid)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in id order.
    pub fn iter(&self) -> impl Iterator<Item = &MempoolEntry> {
        self.entries.values()
    }

    /// Every unconfirmed ancestor of `txid`, the entry excluded.
    pub fn ancestors(&self, txid: &Txid) -> BTreeSet<Txid> {
        self.entries
            .get(txid)
            .map(|entry| self.ancestors_of_parents(&entry.parents))
            .unwrap_or_default()
    }

    /// Every descendant of `txid` in the snapshot, the entry excluded.
    pub fn descendants(&self, txid: &Txid) -> BTreeSet<Txid> {
        let mut descendants = BTreeSet::new();
        let mut stack = vec![*txid];
        while let Some(next) = stack.pop() {
            if !self.entries.contains_key(&next) {
                continue;
            }
            for child in self.spenders.get(&next).into_iter().flatten() {
                if descendants.insert(*child) {
                    stack.push(*child);
                }
            }
        }
        descendants
    }

    /// Entries from best to worst package score.
    pub fn by_score(&self) -> Vec<&MempoolEntry> {
        let mut entries: Vec<_> = self.entries.values().collect();
        entries.sort_by_cached_key(|entry| PackageScore::of(entry));
        entries
    }

    fn refresh_aggregates(&mut self, txid: &Txid) {
        let Some(entry) = self.entries.get(txid) else { return };
        let ancestors = self.ancestors_of_parents(&entry.parents);
        let mut count = 1;
        let mut size = entry.size;
        let mut fees = entry.modified_fee;
        let mut sigop_cost = entry.sigop_cost;
        for ancestor in ancestors.iter().filter_map(|ancestor| self.entries.get(ancestor)) {
            count += 1;
            size += ancestor.size;
            fees += ancestor.modified_fee;
            sigop_cost += ancestor.sigop_cost;
        }
        if let Some(entry) = self.entries.get_mut(txid) {
            entry.count_with_ancestors = count;
            entry.size_with_ancestors = size;
            entry.mod_fees_with_ancestors = fees;
            entry.sigop_cost_with_ancestors = sigop_cost;
        }
    }

    fn ancestors_of_parents(&self, parents: &BTreeSet<Txid>) -> BTreeSet<Txid> {
        let mut ancestors = BTreeSet::new();
        let mut stack: Vec<Txid> = parents.iter().copied().collect();
        while let Some(next) = stack.pop() {
            if !ancestors.insert(next) {
                continue;
            }
            if let Some(entry) = self.entries.get(&next) {
                stack.extend(entry.parents.iter().copied());
            }
        }
        ancestors
    }
}

impl FromIterator<MempoolEntry> for MempoolSnapshot {
    fn from_iter<I: IntoIterator<Item = MempoolEntry>>(iter: I) -> Self {
        let mut snapshot = Self::new();
        for entry in iter {
            snapshot.insert(entry);
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        script::{call_script, create_script, VersionVm},
        test_utils::TxBuilder,
    };
    use alloy_primitives::Address;

    #[test]
    fn contract_op_prefers_create() {
        let call = call_script(VersionVm::EVM, 50_000, 40, &[], Address::ZERO);
        let create = create_script(VersionVm::EVM, 50_000, 40, &[0]);
        assert_eq!(ContractOp::of(&TxBuilder::new(1).pay(10).build()), ContractOp::None);
        assert_eq!(ContractOp::of(&TxBuilder::new(1).output(0, call.clone()).build()), ContractOp::Call);
        assert_eq!(
            ContractOp::of(&TxBuilder::new(1).output(0, call).output(0, create).build()),
            ContractOp::Create
        );
    }

    #[test]
    fn min_gas_price_spans_contract_outputs() {
        let tx = TxBuilder::new(1)
            .output(0, call_script(VersionVm::EVM, 50_000, 70, &[], Address::ZERO))
            .output(0, call_script(VersionVm::EVM, 50_000, 45, &[], Address::ZERO))
            .pay(5)
            .build();
        assert_eq!(MempoolEntry::new(tx, 100).min_gas_price, 45);
    }

    #[test]
    fn ancestor_aggregates_follow_the_chain() {
        let parent = TxBuilder::new(1).pay(1_000).build();
        let child = TxBuilder::spending(parent.txid(), 0).pay(900).build();
        let grandchild = TxBuilder::spending(child.txid(), 0).pay(800).build();
        let snapshot: MempoolSnapshot = [
            MempoolEntry::new(parent.clone(), 10),
            MempoolEntry::new(child.clone(), 20),
            MempoolEntry::new(grandchild.clone(), 30),
        ]
        .into_iter()
        .collect();

        let last = snapshot.get(&grandchild.txid()).unwrap();
        assert_eq!(last.count_with_ancestors, 3);
        assert_eq!(last.mod_fees_with_ancestors, 60);
        assert!(!last.is_resolved());
        assert_eq!(
            snapshot.ancestors(&grandchild.txid()),
            BTreeSet::from([parent.txid(), child.txid()])
        );
        assert_eq!(
            snapshot.descendants(&parent.txid()),
            BTreeSet::from([child.txid(), grandchild.txid()])
        );
        assert!(snapshot.get(&parent.txid()).unwrap().is_resolved());
    }

    #[test]
    fn children_inserted_first_are_linked_to_their_parents() {
        let parent = TxBuilder::new(1).pay(1_000).build();
        let child = TxBuilder::spending(parent.txid(), 0).pay(900).build();
        let grandchild = TxBuilder::spending(child.txid(), 0).pay(800).build();
        let entries = [
            MempoolEntry::new(parent.clone(), 10),
            MempoolEntry::new(child.clone(), 20),
            MempoolEntry::new(grandchild.clone(), 30),
        ];
        let forward: MempoolSnapshot = entries.clone().into_iter().collect();
        let backward: MempoolSnapshot = entries.into_iter().rev().collect();

        for txid in [parent.txid(), child.txid(), grandchild.txid()] {
            assert_eq!(backward.get(&txid), forward.get(&txid));
        }
        assert_eq!(backward.get(&child.txid()).unwrap().parents, BTreeSet::from([parent.txid()]));
        assert_eq!(
            backward.descendants(&parent.txid()),
            BTreeSet::from([child.txid(), grandchild.txid()])
        );
    }

    #[test]
    fn replacing_an_entry_keeps_its_children() {
        let parent = TxBuilder::new(1).pay(1_000).build();
        let child = TxBuilder::spending(parent.txid(), 0).pay(900).build();
        let mut snapshot: MempoolSnapshot =
            [MempoolEntry::new(parent.clone(), 10), MempoolEntry::new(child.clone(), 20)]
                .into_iter()
                .collect();

        snapshot.insert(MempoolEntry::new(parent.clone(), 10).with_fee_delta(5));
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get(&child.txid()).unwrap().mod_fees_with_ancestors, 35);
        assert_eq!(snapshot.descendants(&parent.txid()), BTreeSet::from([child.txid()]));
    }
}
