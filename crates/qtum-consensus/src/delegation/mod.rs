//! The offline staking delegation registry.
//!
//! Delegations live in a system contract deployed at the offline staking activation height. A
//! delegate hands its staking weight to a staker by calling `addDelegation` with a proof of
//! delegation: a compact signature by the delegate's key over the staker's address. The
//! registry reads the present delegations through read-only calls and the past ones through
//! the contract's events.

mod events;
mod proof;

pub use events::*;
pub use proof::*;

use alloy_primitives::{Address, Bytes};
use alloy_sol_types::SolCall;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    constants::dgp::DGP_READ_GAS,
    evm::{BlockEnv, CallParams, ContractState, ExecutionStatus, Executor, GasSchedule},
    params::ConsensusParams,
    system_contracts::delegation::IDelegations,
};

/// Highest fee, in percent, a staker may charge.
pub const MAX_DELEGATION_FEE: u8 = 100;

/// Error of a delegation lookup.
#[derive(Debug, thiserror::Error)]
pub enum DelegationError {
    /// No contract is deployed at the delegation address.
    #[error("delegation contract {0} does not exist")]
    NoDelegationContract(Address),
    /// The lookup call did not succeed.
    #[error("delegation lookup failed with {0:?}")]
    CallFailed(ExecutionStatus),
    /// The contract answered with something other than a delegation.
    #[error("delegation lookup returned malformed data: {0}")]
    AbiMismatch(#[from] alloy_sol_types::Error),
    /// A proof of delegation could not be signed.
    #[error("signing the proof of delegation failed: {0}")]
    Signing(#[from] k256::ecdsa::Error),
}

/// A delegation as stored by the delegation contract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delegation {
    /// Staker the weight is delegated to.
    pub staker: Address,
    /// Fee of the staker, in percent.
    pub fee: u8,
    /// Height the delegation was made at.
    pub block_height: u32,
    /// Proof of delegation.
    pub pod: Bytes,
}

impl Delegation {
    /// Returns whether every field is unset, which is what the contract answers for unknown
    /// delegates.
    pub fn is_null(&self) -> bool {
        self.staker.is_zero() && self.fee == 0 && self.block_height == 0 && self.pod.is_empty()
    }
}

/// A delegation and its delegate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationItem {
    /// Delegating address.
    pub delegate: Address,
    /// The delegation.
    #[serde(flatten)]
    pub delegation: Delegation,
}

impl DelegationItem {
    /// Returns whether neither the delegate nor the delegation is set.
    pub fn is_null(&self) -> bool {
        self.delegate.is_zero() && self.delegation.is_null()
    }
}

/// Calldata adding a delegation to `staker` at `fee` percent.
pub fn add_delegation_calldata(staker: Address, fee: u8, pod: Bytes) -> Bytes {
    IDelegations::addDelegationCall { _staker: staker, _fee: fee, _PoD: pod }.abi_encode().into()
}

/// Calldata removing the sender's delegation.
pub fn remove_delegation_calldata() -> Bytes {
    IDelegations::removeDelegationCall {}.abi_encode().into()
}

/// Returns whether `calldata` calls `addDelegation`.
pub fn is_add_delegation_calldata(calldata: &[u8]) -> bool {
    calldata.starts_with(&IDelegations::addDelegationCall::SELECTOR)
}

/// Reads delegations from the delegation contract.
#[derive(Debug, Clone)]
pub struct DelegationRegistry {
    params: ConsensusParams,
}

impl DelegationRegistry {
    /// Creates a registry for the delegation contract of `params`.
    pub const fn new(params: ConsensusParams) -> Self {
        Self { params }
    }

    /// Address of the delegation contract.
    pub const fn address(&self) -> Address {
        self.params.delegations_address
    }

    /// Returns whether the delegation contract is deployed.
    pub fn exist_delegation_contract(&self, state: &ContractState) -> bool {
        state.exists(&self.address())
    }

    /// The delegation of `delegate` as of `state`, `None` if it has none.
    ///
    /// The lookup is a read-only call; `state` is left as it was.
    pub fn get(
        &self,
        state: &mut ContractState,
        height: u32,
        delegate: Address,
    ) -> Result<Option<Delegation>, DelegationError> {
        if !self.exist_delegation_contract(state) {
            return Err(DelegationError::NoDelegationContract(self.address()));
        }
        let checkpoint = state.checkpoint();
        let block = BlockEnv { number: height.into(), gas_limit: DGP_READ_GAS, ..Default::default() };
        let result = Executor::new(state, GasSchedule::for_height(&self.params, height), block)
            .call(CallParams {
                receiver: self.address(),
                gas_limit: DGP_READ_GAS,
                data: IDelegations::delegationsCall { _0: delegate }.abi_encode().into(),
                ..Default::default()
            });
        state.restore(checkpoint);
        if !result.is_success() {
            return Err(DelegationError::CallFailed(result.status));
        }
        let decoded = IDelegations::delegationsCall::abi_decode_returns(&result.output)?;
        let delegation = Delegation {
            staker: decoded.staker,
            fee: decoded.fee,
            block_height: decoded.blockHeight.saturating_to(),
            pod: decoded.PoD,
        };
        Ok((!delegation.is_null()).then_some(delegation))
    }

    /// Checks that `delegation` is a valid delegation by `delegate`: a set delegation with a fee
    /// of at most [`MAX_DELEGATION_FEE`] and a proof signed by the delegate's key.
    pub fn verify(delegate: Address, delegation: &Delegation) -> bool {
        if delegate.is_zero() || delegation.is_null() || delegation.fee > MAX_DELEGATION_FEE {
            return false;
        }
        let signer = recover_compact(&pod_message_hash(delegation.staker), &delegation.pod);
        if signer != Some(delegate) {
            debug!(
                target: "qtum::delegation",
                %delegate,
                staker = %delegation.staker,
                "invalid proof of delegation"
            );
            return false;
        }
        true
    }

    /// Collects the events of the delegation contract in `range` that `filter` accepts.
    pub fn filter_events<L: LogIndex>(
        &self,
        index: &L,
        range: EventRange,
        filter: impl Fn(&DelegationEvent) -> bool,
    ) -> Vec<DelegationEvent> {
        filter_events(index, self.address(), range, filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::BytecodeBuilder;
    use alloy_primitives::U256;
    use k256::ecdsa::SigningKey;

    const STAKER: Address = Address::repeat_byte(0x51);

    fn delegate_key() -> SigningKey {
        SigningKey::from_slice(&[3; 32]).unwrap()
    }

    fn delegation(fee: u8) -> Delegation {
        let pod = sign_pod(&delegate_key(), STAKER).unwrap();
        Delegation { staker: STAKER, fee, block_height: 5, pod }
    }

    fn registry() -> DelegationRegistry {
        DelegationRegistry::new(ConsensusParams::regtest())
    }

    #[test]
    fn verifies_signed_delegations() {
        let delegate = key_id(&delegate_key());
        assert!(DelegationRegistry::verify(delegate, &delegation(10)));
        assert!(DelegationRegistry::verify(delegate, &delegation(100)));
        assert!(!DelegationRegistry::verify(delegate, &delegation(101)));
        assert!(!DelegationRegistry::verify(Address::ZERO, &delegation(10)));
        assert!(!DelegationRegistry::verify(delegate, &Delegation::default()));
        assert!(!DelegationRegistry::verify(Address::repeat_byte(1), &delegation(10)));

        let mut other_staker = delegation(10);
        other_staker.staker = Address::repeat_byte(0x52);
        assert!(!DelegationRegistry::verify(delegate, &other_staker));
    }

    #[test]
    fn missing_contract_is_an_error() {
        let mut state = ContractState::new();
        assert!(matches!(
            registry().get(&mut state, 10, Address::ZERO),
            Err(DelegationError::NoDelegationContract(_))
        ));
    }

    #[test]
    fn reads_delegations_through_calls() {
        let registry = registry();
        let stored = delegation(12);
        let answer = IDelegations::delegationsCall::abi_encode_returns(
            &IDelegations::delegationsReturn {
                staker: stored.staker,
                fee: stored.fee,
                blockHeight: U256::from(stored.block_height),
                PoD: stored.pod.clone(),
            },
        );
        let mut state = ContractState::new();
        state.account_mut(registry.address()).code =
            BytecodeBuilder::default().return_with_data(answer).build();
        let root = state.state_root();

        assert_eq!(registry.get(&mut state, 10, key_id(&delegate_key())).unwrap(), Some(stored));
        assert_eq!(state.state_root(), root);
    }

    #[test]
    fn unknown_delegates_have_no_delegation() {
        let registry = registry();
        let answer = IDelegations::delegationsCall::abi_encode_returns(
            &IDelegations::delegationsReturn {
                staker: Address::ZERO,
                fee: 0,
                blockHeight: U256::ZERO,
                PoD: Bytes::new(),
            },
        );
        let mut state = ContractState::new();
        state.account_mut(registry.address()).code =
            BytecodeBuilder::default().return_with_data(answer).build();

        assert_eq!(registry.get(&mut state, 10, Address::repeat_byte(9)).unwrap(), None);
    }

    #[test]
    fn garbage_answers_are_abi_mismatches() {
        let registry = registry();
        let mut state = ContractState::new();
        state.account_mut(registry.address()).code =
            BytecodeBuilder::default().return_with_data([0xff; 7]).build();
        assert!(matches!(
            registry.get(&mut state, 10, Address::ZERO),
            Err(DelegationError::AbiMismatch(_))
        ));
    }

    #[test]
    fn calldata_builders_use_the_contract_selectors() {
        let add = add_delegation_calldata(STAKER, 10, Bytes::from_static(&[1]));
        assert!(is_add_delegation_calldata(&add));
        assert_eq!(&add[..4], &[0x4c, 0x0e, 0x96, 0x8c]);
        assert_eq!(remove_delegation_calldata().as_ref(), &[0x3d, 0x66, 0x6e, 0x8b]);
        assert!(!is_add_delegation_calldata(&remove_delegation_calldata()));
    }
}
