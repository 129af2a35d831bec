//! Tests for reading delegations from the delegation contract's events.

use std::collections::BTreeMap;

use alloy_primitives::{Address, Bytes, Log, B256, U256};
use alloy_sol_types::SolEvent;
use k256::ecdsa::SigningKey;
use qtum_consensus::{
    delegation::{
        delegations_from_events, key_id, sign_pod, update_delegations_from_events, Delegation,
        DelegationEventKind, DelegationRegistry, EventRange,
    },
    system_contracts::delegation::IDelegations,
    test_utils::MemoryLogIndex,
    ConsensusParams,
};

const STAKER: Address = Address::repeat_byte(0x51);
const OTHER_STAKER: Address = Address::repeat_byte(0x52);

fn registry() -> DelegationRegistry {
    DelegationRegistry::new(ConsensusParams::regtest())
}

fn delegate_key(seed: u8) -> SigningKey {
    SigningKey::from_slice(&[seed; 32]).unwrap()
}

fn add_log(contract: Address, key: &SigningKey, staker: Address, fee: u8, height: u32) -> Log {
    let event = IDelegations::AddDelegation {
        _staker: staker,
        _delegate: key_id(key),
        fee,
        blockHeight: U256::from(height),
        PoD: sign_pod(key, staker).unwrap(),
    };
    Log { address: contract, data: event.encode_log_data() }
}

fn remove_log(contract: Address, key: &SigningKey, staker: Address) -> Log {
    let event = IDelegations::RemoveDelegation { _staker: staker, _delegate: key_id(key) };
    Log { address: contract, data: event.encode_log_data() }
}

#[test]
fn test_add_then_remove_leaves_no_delegation() {
    let registry = registry();
    let contract = registry.address();
    let key = delegate_key(3);
    let mut index = MemoryLogIndex::new();
    index.add(10, B256::repeat_byte(1), vec![add_log(contract, &key, STAKER, 10, 10)]);
    index.add(12, B256::repeat_byte(2), vec![remove_log(contract, &key, STAKER)]);

    let events = registry.filter_events(&index, EventRange::from_height(0), |_| true);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].kind, DelegationEventKind::Add);
    assert_eq!(events[1].kind, DelegationEventKind::Remove);
    assert!(!delegations_from_events(&events).contains_key(&key_id(&key)));

    // before the removal the delegation is live and verifiable
    let events = registry.filter_events(&index, EventRange::from_height(0).with_to(11), |_| true);
    let delegations = delegations_from_events(&events);
    let delegation = &delegations[&key_id(&key)];
    assert_eq!(delegation.staker, STAKER);
    assert_eq!(delegation.fee, 10);
    assert_eq!(delegation.block_height, 10);
    assert!(DelegationRegistry::verify(key_id(&key), delegation));
}

#[test]
fn test_events_are_filtered_by_staker() {
    let registry = registry();
    let contract = registry.address();
    let (first, second) = (delegate_key(3), delegate_key(4));
    let mut index = MemoryLogIndex::new();
    index.add(
        5,
        B256::repeat_byte(1),
        vec![
            add_log(contract, &first, STAKER, 10, 5),
            add_log(contract, &second, OTHER_STAKER, 20, 5),
        ],
    );

    let events = registry.filter_events(&index, EventRange::from_height(0), |event| {
        event.item.delegation.staker == STAKER
    });
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].item.delegate, key_id(&first));
}

#[test]
fn test_transactions_in_several_blocks_count_once() {
    let registry = registry();
    let contract = registry.address();
    let key = delegate_key(3);
    let txid = B256::repeat_byte(7);
    let logs = vec![add_log(contract, &key, STAKER, 10, 8)];
    let mut index = MemoryLogIndex::new();
    index.add(8, txid, logs.clone());
    index.add(9, txid, logs);

    let events = registry.filter_events(&index, EventRange::from_height(0), |_| true);
    assert_eq!(events.len(), 1);
}

#[test]
fn test_logs_of_other_contracts_are_ignored() {
    let registry = registry();
    let key = delegate_key(3);
    let impostor = Address::repeat_byte(0x99);
    let mut index = MemoryLogIndex::new();
    index.add(3, B256::repeat_byte(1), vec![add_log(impostor, &key, STAKER, 10, 3)]);
    index.add(
        4,
        B256::repeat_byte(2),
        vec![
            add_log(impostor, &key, OTHER_STAKER, 10, 4),
            add_log(registry.address(), &key, STAKER, 30, 4),
        ],
    );

    let events = registry.filter_events(&index, EventRange::from_height(0), |_| true);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].item.delegation.fee, 30);
}

#[test]
fn test_confirmations_hold_back_recent_blocks() {
    let registry = registry();
    let contract = registry.address();
    let key = delegate_key(3);
    let mut index = MemoryLogIndex::new();
    index.add(10, B256::repeat_byte(1), vec![add_log(contract, &key, STAKER, 10, 10)]);
    index.add(20, B256::repeat_byte(2), vec![add_log(contract, &key, OTHER_STAKER, 15, 20)]);
    index.set_tip_height(25);

    let confirmed = registry.filter_events(&index, EventRange::from_height(0).with_min_conf(10), |_| true);
    assert_eq!(confirmed.len(), 1);
    assert_eq!(confirmed[0].item.delegation.staker, STAKER);

    let all = registry.filter_events(&index, EventRange::from_height(0).with_min_conf(6), |_| true);
    assert_eq!(all.len(), 2);
    assert_eq!(delegations_from_events(&all)[&key_id(&key)].staker, OTHER_STAKER);

    assert!(registry.filter_events(&index, EventRange::from_height(21), |_| true).is_empty());
}

#[test]
fn test_updates_apply_on_top_of_known_delegations() {
    let registry = registry();
    let contract = registry.address();
    let (kept, removed) = (delegate_key(3), delegate_key(4));
    let mut delegations: BTreeMap<_, _> =
        [(key_id(&kept), Delegation::default()), (key_id(&removed), Delegation::default())]
            .into_iter()
            .collect();

    let mut index = MemoryLogIndex::new();
    index.add(
        30,
        B256::repeat_byte(1),
        vec![remove_log(contract, &removed, STAKER), add_log(contract, &kept, STAKER, 5, 30)],
    );
    let events = registry.filter_events(&index, EventRange::from_height(30), |_| true);
    update_delegations_from_events(&events, &mut delegations);

    assert_eq!(delegations.len(), 1);
    assert_eq!(delegations[&key_id(&kept)].fee, 5);
    assert!(DelegationRegistry::verify(key_id(&kept), &delegations[&key_id(&kept)]));
}

#[test]
fn test_proofs_bind_the_staker() {
    let key = delegate_key(9);
    let delegation =
        Delegation { staker: STAKER, fee: 10, block_height: 1, pod: sign_pod(&key, STAKER).unwrap() };
    assert!(DelegationRegistry::verify(key_id(&key), &delegation));

    let redirected = Delegation { staker: OTHER_STAKER, ..delegation.clone() };
    assert!(!DelegationRegistry::verify(key_id(&key), &redirected));

    let truncated = Delegation { pod: Bytes::copy_from_slice(&delegation.pod[..64]), ..delegation };
    assert!(!DelegationRegistry::verify(key_id(&key), &truncated));
}
