//! Typed destinations of output scripts.
//!
//! [`classify`] decodes a script into a [`Destination`] and [`script_for`] encodes it back.
//! The two are inverse for every variant except [`Destination::None`], which keeps the
//! original script verbatim.

use alloy_primitives::{Bytes, B256};
use serde::{Deserialize, Serialize};

use crate::{
    contract_address, hash160,
    script::{opcodes::*, solve, Script, ScriptBuilder, TxoutType},
    Hash160, OutPoint,
};

/// Destination an output pays to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Destination {
    /// No standard destination; the script itself.
    None(Script),
    /// Raw public key.
    PubKey(Bytes),
    /// Hash of a public key, also used for contract addresses.
    PubKeyHash(Hash160),
    /// Hash of a redeem script.
    ScriptHash(Hash160),
    /// Witness v0 public key hash.
    WitnessV0KeyHash(Hash160),
    /// Witness v0 script hash.
    WitnessV0ScriptHash(B256),
    /// Witness v1 taproot output key.
    WitnessV1Taproot(B256),
    /// Witness program of a version without defined semantics.
    WitnessUnknown {
        /// Witness version, 1 to 16.
        version: u8,
        /// Witness program.
        program: Bytes,
    },
    /// Keyless anchor output.
    PayToAnchor,
}

impl Destination {
    /// Returns whether the destination can be encoded as an address.
    pub const fn is_valid(&self) -> bool {
        !matches!(self, Self::None(_) | Self::PubKey(_))
    }

    /// Key hash of the destination, for the key-hash shaped variants.
    pub fn key_hash(&self) -> Option<Hash160> {
        match self {
            Self::PubKeyHash(hash) => Some(*hash),
            Self::PubKey(key) => Some(hash160(key)),
            _ => None,
        }
    }
}

/// Classifies `script`, keeping raw public keys as [`Destination::PubKey`].
pub fn classify(script: &Script) -> (Destination, TxoutType) {
    extract_destination(script, false)
}

/// Classifies `script`, optionally converting raw public keys into key hashes.
pub fn extract_destination(script: &Script, convert_pubkey_to_hash: bool) -> (Destination, TxoutType) {
    let solution = solve(script, false, false);
    let mut data = solution.data.into_iter();
    let mut next = || data.next().unwrap_or_default();
    let destination = match solution.kind {
        TxoutType::PubKey if convert_pubkey_to_hash => Destination::PubKeyHash(hash160(&next())),
        TxoutType::PubKey => Destination::PubKey(next()),
        TxoutType::PubKeyHash => Destination::PubKeyHash(Hash160::from_slice(&next())),
        TxoutType::ScriptHash => Destination::ScriptHash(Hash160::from_slice(&next())),
        TxoutType::WitnessV0KeyHash => Destination::WitnessV0KeyHash(Hash160::from_slice(&next())),
        TxoutType::WitnessV0ScriptHash => Destination::WitnessV0ScriptHash(B256::from_slice(&next())),
        TxoutType::WitnessV1Taproot => Destination::WitnessV1Taproot(B256::from_slice(&next())),
        TxoutType::Anchor => Destination::PayToAnchor,
        TxoutType::WitnessUnknown => {
            let version = next().first().copied().unwrap_or_default();
            Destination::WitnessUnknown { version, program: next() }
        }
        TxoutType::Multisig |
        TxoutType::NullData |
        TxoutType::NonStandard |
        TxoutType::CreateSender |
        TxoutType::CallSender |
        TxoutType::Create |
        TxoutType::Call => Destination::None(script.clone()),
    };
    (destination, solution.kind)
}

/// Destination of an output for indexing purposes.
///
/// Contract calls resolve to the called contract, and contract creations to the address
/// the contract is deployed at, derived from the creating outpoint.
pub fn extract_destination_with_prevout(
    prevout: &OutPoint,
    script: &Script,
) -> Option<(Destination, TxoutType)> {
    let solution = solve(script, false, false);
    let destination = match solution.kind {
        TxoutType::Create => Destination::PubKeyHash(Hash160::from(
            contract_address(&prevout.txid, prevout.vout).into_array(),
        )),
        TxoutType::Call => Destination::PubKeyHash(Hash160::from_slice(solution.data.first()?)),
        _ => match extract_destination(script, true).0 {
            Destination::None(_) => return None,
            destination => destination,
        },
    };
    Some((destination, solution.kind))
}

/// Key hash paid by a pay-to-pubkey or pay-to-pubkey-hash script.
pub fn extract_public_key_hash(script: &Script) -> Option<Hash160> {
    match extract_destination(script, true) {
        (Destination::PubKeyHash(hash), TxoutType::PubKey | TxoutType::PubKeyHash) => Some(hash),
        _ => None,
    }
}

/// `OP_DUP OP_HASH160 <hash> OP_EQUALVERIFY OP_CHECKSIG`.
pub fn pay_to_pubkey_hash(hash: &Hash160) -> Script {
    ScriptBuilder::new()
        .push_opcode(OP_DUP)
        .push_opcode(OP_HASH160)
        .push_slice(hash.as_slice())
        .push_opcode(OP_EQUALVERIFY)
        .push_opcode(OP_CHECKSIG)
        .build()
}

/// Encodes a destination as its locking script.
pub fn script_for(destination: &Destination) -> Script {
    match destination {
        Destination::None(script) => script.clone(),
        Destination::PubKey(key) => {
            ScriptBuilder::new().push_slice(key).push_opcode(OP_CHECKSIG).build()
        }
        Destination::PubKeyHash(hash) => pay_to_pubkey_hash(hash),
        Destination::ScriptHash(hash) => ScriptBuilder::new()
            .push_opcode(OP_HASH160)
            .push_slice(hash.as_slice())
            .push_opcode(OP_EQUAL)
            .build(),
        Destination::WitnessV0KeyHash(hash) => {
            ScriptBuilder::new().push_opcode(OP_0).push_slice(hash.as_slice()).build()
        }
        Destination::WitnessV0ScriptHash(hash) => {
            ScriptBuilder::new().push_opcode(OP_0).push_slice(hash.as_slice()).build()
        }
        Destination::WitnessV1Taproot(key) => {
            ScriptBuilder::new().push_opcode(OP_1).push_slice(key.as_slice()).build()
        }
        Destination::WitnessUnknown { version, program } => {
            ScriptBuilder::new().push_opcode(encode_op_n(*version)).push_slice(program).build()
        }
        Destination::PayToAnchor => {
            ScriptBuilder::new().push_opcode(OP_1).push_slice(&[0x4e, 0x73]).build()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{call_script, create_script, VersionVm};
    use alloy_primitives::Address;
    use proptest::prelude::*;

    fn round_trips(destination: Destination, kind: TxoutType) {
        let script = script_for(&destination);
        assert_eq!(classify(&script), (destination, kind));
    }

    #[test]
    fn fixed_variants_round_trip() {
        round_trips(Destination::PubKey(Bytes::from(vec![0x03; 33])), TxoutType::PubKey);
        round_trips(Destination::PubKey(Bytes::from(vec![0x04; 65])), TxoutType::PubKey);
        round_trips(Destination::PayToAnchor, TxoutType::Anchor);
    }

    #[test]
    fn non_standard_scripts_keep_their_bytes() {
        let script = Script::new(vec![OP_RETURN, 0x02, 0xab, 0xcd]);
        let (destination, kind) = classify(&script);
        assert_eq!(kind, TxoutType::NullData);
        assert_eq!(script_for(&destination), script);
        assert!(!destination.is_valid());
    }

    #[test]
    fn pubkey_converts_to_key_hash() {
        let key = Bytes::from(vec![0x02; 33]);
        let script = script_for(&Destination::PubKey(key.clone()));
        assert_eq!(extract_public_key_hash(&script), Some(hash160(&key)));
        assert_eq!(extract_destination(&script, true).0, Destination::PubKeyHash(hash160(&key)));
    }

    #[test]
    fn contract_outputs_resolve_with_prevout() {
        let contract = Address::repeat_byte(0x42);
        let call = call_script(VersionVm::EVM, 100_000, 40, &[1], contract);
        let prevout = OutPoint::new(B256::repeat_byte(9), 1);
        assert_eq!(classify(&call).0, Destination::None(call.clone()));
        assert_eq!(
            extract_destination_with_prevout(&prevout, &call),
            Some((Destination::PubKeyHash(Hash160::from(contract.into_array())), TxoutType::Call))
        );

        let create = create_script(VersionVm::EVM, 100_000, 40, &[1]);
        let expected = contract_address(&prevout.txid, prevout.vout);
        assert_eq!(
            extract_destination_with_prevout(&prevout, &create),
            Some((Destination::PubKeyHash(Hash160::from(expected.into_array())), TxoutType::Create))
        );
    }

    fn hash_destination() -> impl Strategy<Value = (Destination, TxoutType)> {
        prop_oneof![
            any::<[u8; 20]>()
                .prop_map(|h| (Destination::PubKeyHash(h.into()), TxoutType::PubKeyHash)),
            any::<[u8; 20]>()
                .prop_map(|h| (Destination::ScriptHash(h.into()), TxoutType::ScriptHash)),
            any::<[u8; 20]>().prop_map(|h| (
                Destination::WitnessV0KeyHash(h.into()),
                TxoutType::WitnessV0KeyHash
            )),
            any::<[u8; 32]>().prop_map(|h| (
                Destination::WitnessV0ScriptHash(h.into()),
                TxoutType::WitnessV0ScriptHash
            )),
            any::<[u8; 32]>().prop_map(|h| (
                Destination::WitnessV1Taproot(h.into()),
                TxoutType::WitnessV1Taproot
            )),
            (2u8..=16, proptest::collection::vec(any::<u8>(), 2..=40)).prop_map(
                |(version, program)| (
                    Destination::WitnessUnknown { version, program: program.into() },
                    TxoutType::WitnessUnknown
                )
            ),
        ]
    }

    proptest! {
        #[test]
        fn every_hash_destination_round_trips((destination, kind) in hash_destination()) {
            let script = script_for(&destination);
            prop_assert_eq!(classify(&script), (destination, kind));
        }
    }
}
