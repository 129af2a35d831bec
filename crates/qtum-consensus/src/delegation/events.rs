//! Delegation events and their folding into the present delegations.

use std::collections::{BTreeMap, BTreeSet};

use alloy_primitives::{Address, Log};
use alloy_sol_types::SolEvent;
use auto_impl::auto_impl;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::{Delegation, DelegationItem};
use crate::{system_contracts::delegation::IDelegations, Txid};

/// Read access to the log index of the chain.
#[auto_impl(&, Box, Arc)]
pub trait LogIndex {
    /// Height of the active chain tip.
    fn tip_height(&self) -> u32;

    /// Ids of the transactions with logs emitted by `address` in blocks `from..=to`, grouped by
    /// block in height order. A transaction may show up in several blocks.
    fn transactions(&self, address: Address, from: u32, to: u32) -> Vec<Vec<Txid>>;

    /// Logs emitted by the transaction `txid`.
    fn logs(&self, txid: &Txid) -> Vec<Log>;
}

/// Kind of a delegation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DelegationEventKind {
    /// A delegation was added or replaced.
    Add,
    /// A delegation was removed.
    Remove,
}

/// A delegation change read from the logs of the delegation contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationEvent {
    /// The delegation affected. Only the staker and delegate are set for removals.
    pub item: DelegationItem,
    /// Kind of change.
    pub kind: DelegationEventKind,
}

impl DelegationEvent {
    /// Decodes a log of the delegation contract, trying the removal shape first.
    ///
    /// Returns `None` for logs of any other shape.
    pub fn from_log(log: &Log) -> Option<Self> {
        if let Ok(event) = IDelegations::RemoveDelegation::decode_log_data(&log.data) {
            let item = DelegationItem {
                delegate: event._delegate,
                delegation: Delegation { staker: event._staker, ..Default::default() },
            };
            return Some(Self { item, kind: DelegationEventKind::Remove });
        }
        let event = IDelegations::AddDelegation::decode_log_data(&log.data).ok()?;
        let item = DelegationItem {
            delegate: event._delegate,
            delegation: Delegation {
                staker: event._staker,
                fee: event.fee,
                block_height: event.blockHeight.saturating_to(),
                pod: event.PoD,
            },
        };
        Some(Self { item, kind: DelegationEventKind::Add })
    }
}

/// Range of blocks to scan for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EventRange {
    /// First block scanned.
    pub from: u32,
    /// Last block scanned; the tip when unset.
    pub to: Option<u32>,
    /// Confirmations a block needs to be scanned.
    pub min_conf: u32,
}

impl EventRange {
    /// Every block from `from` to the tip.
    pub const fn from_height(from: u32) -> Self {
        Self { from, to: None, min_conf: 0 }
    }

    /// Sets the last block scanned.
    pub const fn with_to(mut self, to: u32) -> Self {
        self.to = Some(to);
        self
    }

    /// Sets the confirmations a block needs.
    pub const fn with_min_conf(mut self, min_conf: u32) -> Self {
        self.min_conf = min_conf;
        self
    }

    /// The last block scanned given the tip height, if any block is.
    fn last_block(&self, tip: u32) -> Option<u32> {
        let mut to = self.to.map_or(tip, |to| to.min(tip));
        if self.min_conf > 0 {
            to = to.min((tip + 1).checked_sub(self.min_conf)?);
        }
        (to >= self.from).then_some(to)
    }
}

/// Collects the events of the delegation contract at `contract` in `range` that `filter`
/// accepts, in chain order.
///
/// Transactions seen in several blocks are processed once. Logs of other contracts and logs
/// of unknown shape are skipped.
pub fn filter_events<L: LogIndex>(
    index: &L,
    contract: Address,
    range: EventRange,
    filter: impl Fn(&DelegationEvent) -> bool,
) -> Vec<DelegationEvent> {
    let Some(to) = range.last_block(index.tip_height()) else {
        return Vec::new();
    };
    let mut seen = BTreeSet::new();
    let mut events = Vec::new();
    for txid in index.transactions(contract, range.from, to).into_iter().flatten() {
        if !seen.insert(txid) {
            continue;
        }
        for log in index.logs(&txid).iter().filter(|log| log.address == contract) {
            match DelegationEvent::from_log(log) {
                Some(event) if filter(&event) => events.push(event),
                Some(_) => {}
                None => trace!(target: "qtum::delegation", %txid, "skipping log of unknown shape"),
            }
        }
    }
    events
}

/// Applies `events` in order to `delegations`: additions insert or replace the delegation of
/// their delegate, removals delete it.
pub fn update_delegations_from_events(
    events: &[DelegationEvent],
    delegations: &mut BTreeMap<Address, Delegation>,
) {
    for event in events {
        match event.kind {
            DelegationEventKind::Add => {
                delegations.insert(event.item.delegate, event.item.delegation.clone());
            }
            DelegationEventKind::Remove => {
                delegations.remove(&event.item.delegate);
            }
        }
    }
}

/// The delegations left after applying `events` in order.
pub fn delegations_from_events(events: &[DelegationEvent]) -> BTreeMap<Address, Delegation> {
    let mut delegations = BTreeMap::new();
    update_delegations_from_events(events, &mut delegations);
    delegations
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Bytes, LogData, U256};

    const CONTRACT: Address = Address::with_last_byte(0x86);
    const STAKER: Address = Address::repeat_byte(0x51);
    const DELEGATE: Address = Address::repeat_byte(0xde);

    fn add_log(delegate: Address, fee: u8) -> Log {
        let event = IDelegations::AddDelegation {
            _staker: STAKER,
            _delegate: delegate,
            fee,
            blockHeight: U256::from(120),
            PoD: Bytes::from_static(&[1, 2, 3]),
        };
        Log { address: CONTRACT, data: event.encode_log_data() }
    }

    fn remove_log(delegate: Address) -> Log {
        let event = IDelegations::RemoveDelegation { _staker: STAKER, _delegate: delegate };
        Log { address: CONTRACT, data: event.encode_log_data() }
    }

    #[test]
    fn decodes_both_shapes() {
        let add = DelegationEvent::from_log(&add_log(DELEGATE, 10)).unwrap();
        assert_eq!(add.kind, DelegationEventKind::Add);
        assert_eq!(add.item.delegate, DELEGATE);
        assert_eq!(add.item.delegation.block_height, 120);
        assert_eq!(add.item.delegation.pod.as_ref(), &[1, 2, 3]);

        let remove = DelegationEvent::from_log(&remove_log(DELEGATE)).unwrap();
        assert_eq!(remove.kind, DelegationEventKind::Remove);
        assert_eq!(remove.item.delegation.staker, STAKER);

        let other = Log { address: CONTRACT, data: LogData::new_unchecked(vec![], Bytes::new()) };
        assert_eq!(DelegationEvent::from_log(&other), None);
    }

    #[test]
    fn add_then_remove_leaves_nothing() {
        let events: Vec<_> = [add_log(DELEGATE, 10), remove_log(DELEGATE)]
            .iter()
            .filter_map(DelegationEvent::from_log)
            .collect();
        assert!(delegations_from_events(&events).is_empty());
    }

    #[test]
    fn later_additions_replace_earlier_ones() {
        let other = Address::repeat_byte(0xdf);
        let events: Vec<_> = [add_log(DELEGATE, 10), add_log(other, 5), add_log(DELEGATE, 20)]
            .iter()
            .filter_map(DelegationEvent::from_log)
            .collect();
        let delegations = delegations_from_events(&events);
        assert_eq!(delegations.len(), 2);
        assert_eq!(delegations[&DELEGATE].fee, 20);
        assert_eq!(delegations[&other].fee, 5);
    }

    #[test]
    fn range_respects_tip_and_confirmations() {
        assert_eq!(EventRange::from_height(0).last_block(100), Some(100));
        assert_eq!(EventRange::from_height(0).with_to(150).last_block(100), Some(100));
        assert_eq!(EventRange::from_height(0).with_min_conf(10).last_block(100), Some(91));
        assert_eq!(EventRange::from_height(95).with_min_conf(10).last_block(100), None);
        assert_eq!(EventRange::from_height(0).with_min_conf(200).last_block(100), None);
    }
}
