//! Proofs of delegation: compact recoverable signatures over the staker's address.

use alloy_primitives::{hex, Address, Bytes, B256};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};

use super::DelegationError;
use crate::{dsha256, hash160, write_var_bytes};

/// Prefix of every signed message.
pub const MESSAGE_MAGIC: &str = "Qtum Signed Message:\n";

/// Length of a compact signature: header byte, `r` and `s`.
pub const COMPACT_SIGNATURE_LEN: usize = 65;

/// Offset of the compact signature header byte.
const HEADER_BASE: u8 = 27;

/// Header flag of signatures made with a compressed key.
const COMPRESSED_FLAG: u8 = 4;

/// Hash signed by a delegate to prove its delegation to `staker`: the double SHA-256 of the
/// length-prefixed magic and the length-prefixed lowercase hex of the staker's address.
pub fn pod_message_hash(staker: Address) -> B256 {
    let mut message = Vec::new();
    write_var_bytes(&mut message, MESSAGE_MAGIC.as_bytes());
    write_var_bytes(&mut message, hex::encode(staker).as_bytes());
    dsha256(&message)
}

/// Recovers the key id that produced a compact signature of `hash`.
pub fn recover_compact(hash: &B256, signature: &[u8]) -> Option<Address> {
    if signature.len() != COMPACT_SIGNATURE_LEN {
        return None;
    }
    let header = signature[0].checked_sub(HEADER_BASE).filter(|header| *header < 8)?;
    let compressed = header & COMPRESSED_FLAG != 0;
    let mut recovery_id = RecoveryId::from_byte(header & 3)?;
    let mut parsed = Signature::from_slice(&signature[1..]).ok()?;
    if let Some(normalized) = parsed.normalize_s() {
        parsed = normalized;
        recovery_id = RecoveryId::new(!recovery_id.is_y_odd(), recovery_id.is_x_reduced());
    }
    let key = VerifyingKey::recover_from_prehash(hash.as_slice(), &parsed, recovery_id).ok()?;
    Some(Address::from(hash160(key.to_encoded_point(compressed).as_bytes()).0))
}

/// Signs a proof of delegation to `staker` with the delegate's key.
pub fn sign_pod(key: &SigningKey, staker: Address) -> Result<Bytes, DelegationError> {
    let hash = pod_message_hash(staker);
    let (signature, recovery_id) = key.sign_prehash_recoverable(hash.as_slice())?;
    let mut pod = Vec::with_capacity(COMPACT_SIGNATURE_LEN);
    pod.push(HEADER_BASE + COMPRESSED_FLAG + recovery_id.to_byte());
    pod.extend_from_slice(&signature.to_bytes());
    Ok(pod.into())
}

/// Key id of a signing key, as used for delegate addresses.
pub fn key_id(key: &SigningKey) -> Address {
    Address::from(hash160(key.verifying_key().to_encoded_point(true).as_bytes()).0)
}
