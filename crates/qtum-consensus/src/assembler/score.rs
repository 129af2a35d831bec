//! Package ordering and the index of entries whose ancestors were partly included.

use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet},
};

use super::{ContractOp, MempoolEntry, MempoolSnapshot};
use crate::{Amount, Txid};

/// What the assembler orders packages by.
///
/// The order is total and the best package sorts first. When either side carries a contract
/// operation:
///
/// 1. non-contract transactions come before contract transactions,
/// 2. creates come before calls,
/// 3. entries without unconfirmed ancestors come first,
/// 4. a higher minimum gas price comes first,
/// 5. a smaller size comes first,
/// 6. ties are broken by transaction id.
///
/// Two non-contract entries are ordered by ancestor fee rate, highest first, using the lower
/// of the entry's own rate and its package rate, ties broken by transaction id.
///
/// Equality follows the order: two scores are equal when neither sorts first.
#[derive(Debug, Clone)]
pub struct PackageScore {
    /// Id of the transaction.
    pub txid: Txid,
    /// Contract operation of the transaction.
    pub contract_op: ContractOp,
    /// Own virtual size.
    pub size: u64,
    /// Own modified fee.
    pub modified_fee: Amount,
    /// Lowest gas price among the contract outputs.
    pub min_gas_price: u64,
    /// Virtual size of the package not yet in the block.
    pub size_with_ancestors: u64,
    /// Modified fees of the package not yet in the block.
    pub mod_fees_with_ancestors: Amount,
}

impl PackageScore {
    /// The score of a mempool entry with its full ancestor package.
    pub fn of(entry: &MempoolEntry) -> Self {
        Self {
            txid: entry.txid,
            contract_op: entry.contract_op,
            size: entry.size,
            modified_fee: entry.modified_fee,
            min_gas_price: entry.min_gas_price,
            size_with_ancestors: entry.size_with_ancestors,
            mod_fees_with_ancestors: entry.mod_fees_with_ancestors,
        }
    }

    const fn is_resolved(&self) -> bool {
        self.size_with_ancestors == self.size
    }

    /// Fee and size of whichever of the entry and its package has the lower fee rate.
    fn fee_and_size(&self) -> (i128, i128) {
        let own = i128::from(self.modified_fee) * i128::from(self.size_with_ancestors);
        let package = i128::from(self.mod_fees_with_ancestors) * i128::from(self.size);
        if own > package {
            (i128::from(self.mod_fees_with_ancestors), i128::from(self.size_with_ancestors))
        } else {
            (i128::from(self.modified_fee), i128::from(self.size))
        }
    }

    fn cmp_contract(&self, other: &Self) -> Ordering {
        let rank = |op: ContractOp| match op {
            ContractOp::None => 0,
            ContractOp::Create => 1,
            ContractOp::Call => 2,
        };
        rank(self.contract_op)
            .cmp(&rank(other.contract_op))
            .then_with(|| other.is_resolved().cmp(&self.is_resolved()))
            .then_with(|| other.min_gas_price.cmp(&self.min_gas_price))
            .then_with(|| self.size.cmp(&other.size))
            .then_with(|| self.txid.cmp(&other.txid))
    }

    fn cmp_fee_rate(&self, other: &Self) -> Ordering {
        let (fee, size) = self.fee_and_size();
        let (other_fee, other_size) = other.fee_and_size();
        (other_fee * size).cmp(&(fee * other_size)).then_with(|| self.txid.cmp(&other.txid))
    }
}

impl Ord for PackageScore {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.contract_op.is_contract() || other.contract_op.is_contract() {
            self.cmp_contract(other)
        } else {
            self.cmp_fee_rate(other)
        }
    }
}

impl PartialEq for PackageScore {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PackageScore {}

impl PartialOrd for PackageScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A mempool entry whose ancestor aggregates shrank because ancestors were included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifiedEntry {
    /// Score over the ancestors not yet in the block.
    pub score: PackageScore,
    /// Signature operation cost of the entry and its ancestors not yet in the block.
    pub sigop_cost_with_ancestors: u64,
}

impl ModifiedEntry {
    fn of(entry: &MempoolEntry) -> Self {
        Self { score: PackageScore::of(entry), sigop_cost_with_ancestors: entry.sigop_cost_with_ancestors }
    }

    /// Id of the entry.
    pub const fn txid(&self) -> &Txid {
        &self.score.txid
    }
}

/// Modified entries, by id and by score.
///
/// Both indexes always hold the same entries.
#[derive(Debug, Clone, Default)]
pub struct ModifiedIndex {
    by_id: BTreeMap<Txid, ModifiedEntry>,
    by_score: BTreeSet<PackageScore>,
}

impl ModifiedIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Returns whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Returns whether `txid` has a modified entry.
    pub fn contains(&self, txid: &Txid) -> bool {
        self.by_id.contains_key(txid)
    }

    /// The modified entry of `txid`.
    pub fn get(&self, txid: &Txid) -> Option<&ModifiedEntry> {
        self.by_id.get(txid)
    }

    /// The entry with the best score.
    pub fn best(&self) -> Option<&ModifiedEntry> {
        self.by_score.first().and_then(|score| self.by_id.get(&score.txid))
    }

    /// Removes the entry of `txid`.
    pub fn remove(&mut self, txid: &Txid) -> Option<ModifiedEntry> {
        let entry = self.by_id.remove(txid)?;
        self.by_score.remove(&entry.score);
        Some(entry)
    }

    /// Takes the inclusion of `package` into account for every descendant of its entries not
    /// yet in the block.
    pub fn update_for_package_inclusion(
        &mut self,
        mempool: &MempoolSnapshot,
        package: &[&MempoolEntry],
        in_block: &BTreeSet<Txid>,
    ) {
        for parent in package {
            for descendant in mempool.descendants(&parent.txid) {
                if in_block.contains(&descendant) {
                    continue;
                }
                if let Some(entry) = mempool.get(&descendant) {
                    self.update_for_parent_inclusion(entry, parent);
                }
            }
        }
    }

    /// Takes the inclusion of `parent` into account for its descendant `entry`, tracking
    /// `entry` from its mempool aggregates if it had no modified entry yet.
    pub fn update_for_parent_inclusion(&mut self, entry: &MempoolEntry, parent: &MempoolEntry) {
        let mut modified = self.remove(&entry.txid).unwrap_or_else(|| ModifiedEntry::of(entry));
        modified.score.size_with_ancestors -= parent.size;
        modified.score.mod_fees_with_ancestors -= parent.modified_fee;
        modified.sigop_cost_with_ancestors -= parent.sigop_cost;
        self.by_score.insert(modified.score.clone());
        self.by_id.insert(entry.txid, modified);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;
    use proptest::prelude::*;

    fn score(byte: u8, op: ContractOp, size: u64, fee: Amount, gas_price: u64) -> PackageScore {
        PackageScore {
            txid: B256::repeat_byte(byte),
            contract_op: op,
            size,
            modified_fee: fee,
            min_gas_price: gas_price,
            size_with_ancestors: size,
            mod_fees_with_ancestors: fee,
        }
    }

    #[test]
    fn contract_rules_apply_in_order() {
        let plain = score(9, ContractOp::None, 400, 1, 0);
        let create = score(1, ContractOp::Create, 200, 1_000_000, 10);
        let call = score(2, ContractOp::Call, 100, 1_000_000, 100);
        assert!(plain < create);
        assert!(create < call);

        let mut pending = score(3, ContractOp::Call, 100, 1_000, 500);
        pending.size_with_ancestors = 300;
        assert!(call < pending);

        let cheap = score(4, ContractOp::Call, 100, 1_000, 40);
        assert!(call < cheap);

        let big = score(5, ContractOp::Call, 101, 1_000, 100);
        assert!(call < big);

        let twin = score(6, ContractOp::Call, 100, 1_000, 100);
        assert!(call < twin);
    }

    #[test]
    fn plain_entries_use_the_lower_of_own_and_package_rate() {
        let rich = score(2, ContractOp::None, 100, 1_000, 0);
        let mut child = score(1, ContractOp::None, 100, 5_000, 0);
        child.size_with_ancestors = 1_000;
        child.mod_fees_with_ancestors = 5_100;
        // 5.1 per byte for the package against 10 for the rich entry
        assert!(rich < child);

        let same = score(0, ContractOp::None, 200, 2_000, 0);
        assert!(same < rich);
    }

    #[test]
    fn equality_follows_the_order() {
        let small = score(1, ContractOp::None, 100, 1_000, 0);
        let large = score(1, ContractOp::None, 200, 2_000, 0);
        assert_eq!(small.cmp(&large), Ordering::Equal);
        assert_eq!(small, large);

        let mut set = BTreeSet::from([small]);
        assert!(set.remove(&large));

        let other = score(2, ContractOp::None, 100, 1_000, 0);
        assert_ne!(score(1, ContractOp::None, 100, 1_000, 0), other);
    }

    #[test]
    fn index_keeps_both_sides_in_sync() {
        let parent = MempoolEntry::new(crate::test_utils::TxBuilder::new(1).pay(100).build(), 50);
        let tx = crate::test_utils::TxBuilder::spending(parent.txid, 0).pay(90).build();
        let mut snapshot = super::super::MempoolSnapshot::new();
        snapshot.insert(parent.clone());
        snapshot.insert(MempoolEntry::new(tx.clone(), 70));
        let child = snapshot.get(&tx.txid()).unwrap();

        let mut index = ModifiedIndex::new();
        index.update_for_parent_inclusion(child, &parent);
        let modified = index.best().unwrap();
        assert_eq!(modified.txid(), &tx.txid());
        assert_eq!(modified.score.mod_fees_with_ancestors, 70);
        assert_eq!(modified.score.size_with_ancestors, child.size);
        assert_eq!(index.len(), 1);

        assert!(index.remove(&tx.txid()).is_some());
        assert!(index.is_empty());
        assert!(index.best().is_none());
    }

    fn arb_score() -> impl Strategy<Value = PackageScore> {
        (
            any::<u8>(),
            prop_oneof![Just(ContractOp::None), Just(ContractOp::Create), Just(ContractOp::Call)],
            1u64..500,
            0i64..10_000,
            0u64..5,
            0u64..500,
            0i64..10_000,
        )
            .prop_map(|(byte, op, size, fee, gas_price, extra_size, extra_fee)| PackageScore {
                txid: B256::repeat_byte(byte),
                contract_op: op,
                size,
                modified_fee: fee,
                min_gas_price: gas_price,
                size_with_ancestors: size + extra_size,
                mod_fees_with_ancestors: fee + extra_fee,
            })
    }

    /// A tree of transactions: entry `i` spends output `i` of entry `parents[i - 1]`.
    fn arb_tree() -> impl Strategy<Value = (Vec<usize>, Vec<Amount>, usize)> {
        (2usize..7).prop_flat_map(|len| {
            let parents: Vec<_> = (1..len).map(|i| 0..i).collect();
            (parents, prop::collection::vec(1i64..10_000, len), 1..=len)
        })
    }

    proptest! {
        #[test]
        fn included_ancestors_leave_descendant_aggregates((parents, fees, included) in arb_tree()) {
            let len = fees.len();
            let mut txs: Vec<crate::Transaction> = Vec::with_capacity(len);
            for i in 0..len {
                let builder = match i {
                    0 => crate::test_utils::TxBuilder::new(1),
                    _ => crate::test_utils::TxBuilder::spending(txs[parents[i - 1]].txid(), i as u32),
                };
                txs.push((0..len).fold(builder, |builder, _| builder.pay(1_000)).build());
            }
            // Children first, so that links are made when parents arrive.
            let mempool: MempoolSnapshot = txs
                .iter()
                .zip(&fees)
                .rev()
                .map(|(tx, fee)| MempoolEntry::new(tx.clone(), *fee))
                .collect();

            let mut index = ModifiedIndex::new();
            let mut in_block = BTreeSet::new();
            for tx in txs.iter().take(included) {
                let entry = mempool.get(&tx.txid()).unwrap();
                in_block.insert(entry.txid);
                index.remove(&entry.txid);
                index.update_for_package_inclusion(&mempool, &[entry], &in_block);

                for other in mempool.iter().filter(|other| !in_block.contains(&other.txid)) {
                    let pending: Vec<_> = mempool
                        .ancestors(&other.txid)
                        .into_iter()
                        .filter(|ancestor| !in_block.contains(ancestor))
                        .filter_map(|ancestor| mempool.get(&ancestor))
                        .chain([other])
                        .collect();
                    let size: u64 = pending.iter().map(|entry| entry.size).sum();
                    let fees: Amount = pending.iter().map(|entry| entry.modified_fee).sum();
                    let sigops: u64 = pending.iter().map(|entry| entry.sigop_cost).sum();
                    let (actual_size, actual_fees, actual_sigops) = match index.get(&other.txid) {
                        Some(modified) => (
                            modified.score.size_with_ancestors,
                            modified.score.mod_fees_with_ancestors,
                            modified.sigop_cost_with_ancestors,
                        ),
                        None => (
                            other.size_with_ancestors,
                            other.mod_fees_with_ancestors,
                            other.sigop_cost_with_ancestors,
                        ),
                    };
                    prop_assert_eq!(actual_size, size);
                    prop_assert_eq!(actual_fees, fees);
                    prop_assert_eq!(actual_sigops, sigops);
                }
            }
        }

        #[test]
        fn order_is_total(a in arb_score(), b in arb_score(), c in arb_score()) {
            prop_assert_eq!(a == b, a.cmp(&b) == Ordering::Equal);
            prop_assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
            if a.txid != b.txid {
                prop_assert_ne!(a.cmp(&b), Ordering::Equal);
            }
            if a <= b && b <= c {
                prop_assert!(a <= c);
            }
        }
    }
}
