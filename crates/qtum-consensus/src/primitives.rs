//! Ledger primitives: hashes, transactions and block headers.

use alloy_primitives::{Address, Bytes, FixedBytes, B256};
use ripemd::Ripemd160;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use crate::constants::money::{Amount, COIN};
use crate::{constants::block::LOCKTIME_THRESHOLD, script::Script};

/// Transaction id.
pub type Txid = B256;

/// `RIPEMD160(SHA256(x))` digest.
pub type Hash160 = FixedBytes<20>;

/// Single SHA-256.
pub fn sha256(data: &[u8]) -> B256 {
    B256::from_slice(&Sha256::digest(data))
}

/// Double SHA-256, the ledger's hash for transactions, headers and signed messages.
pub fn dsha256(data: &[u8]) -> B256 {
    B256::from_slice(&Sha256::digest(Sha256::digest(data)))
}

/// `RIPEMD160(SHA256(x))`, the ledger's hash for keys and scripts.
pub fn hash160(data: &[u8]) -> Hash160 {
    Hash160::from_slice(&Ripemd160::digest(Sha256::digest(data)))
}

/// Address of a contract created by output `vout` of transaction `txid`.
pub fn contract_address(txid: &Txid, vout: u32) -> Address {
    let mut preimage = Vec::with_capacity(36);
    preimage.extend_from_slice(txid.as_slice());
    preimage.extend_from_slice(&vout.to_le_bytes());
    Address::from(hash160(&preimage).0)
}

/// Appends a Bitcoin compact size integer.
pub fn write_compact_size(out: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xfc => out.push(n as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&n.to_le_bytes());
        }
    }
}

/// Appends a length-prefixed byte string.
pub fn write_var_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_compact_size(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

/// Bitcoin merkle root, duplicating the last hash of odd levels.
pub fn merkle_root(hashes: &[B256]) -> B256 {
    if hashes.is_empty() {
        return B256::ZERO;
    }
    let mut level = hashes.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            level.push(level[level.len() - 1]);
        }
        level = level
            .chunks(2)
            .map(|pair| {
                let mut buf = [0u8; 64];
                buf[..32].copy_from_slice(pair[0].as_slice());
                buf[32..].copy_from_slice(pair[1].as_slice());
                dsha256(&buf)
            })
            .collect();
    }
    level[0]
}

/// Reference to a transaction output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    /// Id of the transaction holding the output.
    pub txid: Txid,
    /// Index of the output.
    pub vout: u32,
}

impl OutPoint {
    /// Creates an outpoint.
    pub const fn new(txid: Txid, vout: u32) -> Self {
        Self { txid, vout }
    }

    /// The null outpoint spent by coinbase inputs.
    pub const fn null() -> Self {
        Self { txid: B256::ZERO, vout: u32::MAX }
    }

    /// Returns whether this is the null outpoint.
    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.vout == u32::MAX
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.txid.as_slice());
        out.extend_from_slice(&self.vout.to_le_bytes());
    }
}

impl Default for OutPoint {
    fn default() -> Self {
        Self::null()
    }
}

/// Transaction input.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TxIn {
    /// Output being spent.
    pub prevout: OutPoint,
    /// Unlocking script.
    pub script_sig: Script,
    /// Sequence number.
    pub sequence: u32,
    /// Segregated witness stack.
    pub witness: Vec<Bytes>,
}

impl TxIn {
    /// Creates a final input spending `prevout` with an empty unlocking script.
    pub fn new(prevout: OutPoint) -> Self {
        Self { prevout, sequence: u32::MAX, ..Default::default() }
    }
}

/// Transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TxOut {
    /// Amount paid.
    pub value: Amount,
    /// Locking script.
    pub script_pubkey: Script,
}

impl TxOut {
    /// Creates an output.
    pub const fn new(value: Amount, script_pubkey: Script) -> Self {
        Self { value, script_pubkey }
    }

    /// The empty output marking a coinstake transaction.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns whether this output pays nothing to an empty script.
    pub fn is_empty(&self) -> bool {
        self.value == 0 && self.script_pubkey.is_empty()
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.value.to_le_bytes());
        write_var_bytes(out, self.script_pubkey.as_bytes());
    }
}

/// Ledger transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Transaction {
    /// Format version.
    pub version: i32,
    /// Inputs.
    pub inputs: Vec<TxIn>,
    /// Outputs.
    pub outputs: Vec<TxOut>,
    /// Lock time, a height below [`LOCKTIME_THRESHOLD`] and a timestamp above.
    pub lock_time: u32,
}

impl Default for Transaction {
    fn default() -> Self {
        Self { version: 2, inputs: Vec::new(), outputs: Vec::new(), lock_time: 0 }
    }
}

impl Transaction {
    /// Returns whether any input carries witness data.
    pub fn has_witness(&self) -> bool {
        self.inputs.iter().any(|input| !input.witness.is_empty())
    }

    /// Serializes the transaction, with or without witness data.
    pub fn encode(&self, with_witness: bool) -> Vec<u8> {
        let witness = with_witness && self.has_witness();
        let mut out = Vec::with_capacity(128);
        out.extend_from_slice(&self.version.to_le_bytes());
        if witness {
            out.extend_from_slice(&[0x00, 0x01]);
        }
        write_compact_size(&mut out, self.inputs.len() as u64);
        for input in &self.inputs {
            input.prevout.encode(&mut out);
            write_var_bytes(&mut out, input.script_sig.as_bytes());
            out.extend_from_slice(&input.sequence.to_le_bytes());
        }
        write_compact_size(&mut out, self.outputs.len() as u64);
        for output in &self.outputs {
            output.encode(&mut out);
        }
        if witness {
            for input in &self.inputs {
                write_compact_size(&mut out, input.witness.len() as u64);
                for item in &input.witness {
                    write_var_bytes(&mut out, item);
                }
            }
        }
        out.extend_from_slice(&self.lock_time.to_le_bytes());
        out
    }

    /// Transaction id, the hash of the serialization without witness.
    pub fn txid(&self) -> Txid {
        dsha256(&self.encode(false))
    }

    /// Witness transaction id.
    pub fn wtxid(&self) -> Txid {
        dsha256(&self.encode(true))
    }

    /// Serialized size without witness data.
    pub fn base_size(&self) -> u64 {
        self.encode(false).len() as u64
    }

    /// Serialized size with witness data.
    pub fn total_size(&self) -> u64 {
        self.encode(true).len() as u64
    }

    /// Block weight of the transaction.
    pub fn weight(&self) -> u64 {
        self.base_size() * 3 + self.total_size()
    }

    /// Returns whether this is a coinbase transaction.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }

    /// Returns whether this is a coinstake transaction.
    pub fn is_coinstake(&self) -> bool {
        !self.inputs.is_empty()
            && !self.inputs[0].prevout.is_null()
            && self.outputs.len() >= 2
            && self.outputs[0].is_empty()
    }

    /// Returns whether any output creates or calls a contract.
    pub fn has_create_or_call(&self) -> bool {
        self.outputs.iter().any(|output| output.script_pubkey.has_contract_op())
    }

    /// Returns whether any output carries an explicit sender.
    pub fn has_op_sender(&self) -> bool {
        self.outputs.iter().any(|output| output.script_pubkey.has_op_sender())
    }

    /// Sum of all output values.
    pub fn value_out(&self) -> Amount {
        self.outputs.iter().map(|output| output.value).sum()
    }

    /// Legacy signature operation cost, scaled to weight units.
    pub fn legacy_sigop_cost(&self) -> u64 {
        let inputs: u64 = self.inputs.iter().map(|input| input.script_sig.sigop_count()).sum();
        let outputs: u64 =
            self.outputs.iter().map(|output| output.script_pubkey.sigop_count()).sum();
        (inputs + outputs) * crate::constants::block::WITNESS_SCALE_FACTOR
    }

    /// Returns whether the transaction is final at the given height and time.
    pub fn is_final(&self, height: u32, time: i64) -> bool {
        if self.lock_time == 0 {
            return true;
        }
        let cutoff = if self.lock_time < LOCKTIME_THRESHOLD { height as i64 } else { time };
        if (self.lock_time as i64) < cutoff {
            return true;
        }
        self.inputs.iter().all(|input| input.sequence == u32::MAX)
    }
}

/// Block header.
///
/// On top of the Bitcoin fields, every header commits to the EVM state root and the UTXO
/// root, and proof-of-stake headers carry the staked outpoint and a block signature.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BlockHeader {
    /// Block version.
    pub version: i32,
    /// Hash of the previous block.
    pub prev_hash: B256,
    /// Merkle root of the transactions.
    pub merkle_root: B256,
    /// Block timestamp.
    pub time: u32,
    /// Compact target.
    pub bits: u32,
    /// Proof-of-work nonce.
    pub nonce: u32,
    /// EVM state root after the block.
    pub state_root: B256,
    /// UTXO root after the block.
    pub utxo_root: B256,
    /// Staked outpoint, null for proof-of-work blocks.
    pub prevout_stake: OutPoint,
    /// Block signature, or proof of delegation for delegated stakes.
    pub signature: Bytes,
}

impl BlockHeader {
    /// Serializes the header.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(181 + self.signature.len());
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(self.prev_hash.as_slice());
        out.extend_from_slice(self.merkle_root.as_slice());
        out.extend_from_slice(&self.time.to_le_bytes());
        out.extend_from_slice(&self.bits.to_le_bytes());
        out.extend_from_slice(&self.nonce.to_le_bytes());
        out.extend_from_slice(self.state_root.as_slice());
        out.extend_from_slice(self.utxo_root.as_slice());
        self.prevout_stake.encode(&mut out);
        write_var_bytes(&mut out, &self.signature);
        out
    }

    /// Block hash.
    pub fn hash(&self) -> B256 {
        dsha256(&self.encode())
    }

    /// Returns whether the header belongs to a proof-of-stake block.
    pub fn is_proof_of_stake(&self) -> bool {
        !self.prevout_stake.is_null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::hex;

    #[test]
    fn hash_functions_match_known_vectors() {
        assert_eq!(
            sha256(b""),
            B256::from(hex!("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"))
        );
        assert_eq!(hash160(b"").0, hex!("b472a266d0bd89c13706a4132ccfb16f7c3b9fcb"));
    }

    #[test]
    fn serializes_in_the_ledger_layout() {
        let mut tx = Transaction {
            inputs: vec![TxIn::new(OutPoint::new(B256::repeat_byte(1), 0))],
            outputs: vec![TxOut::new(COIN, Script::default())],
            ..Default::default()
        };
        let expected = format!(
            "0200000001{}00000000{}ffffffff0100e1f505000000000000000000",
            "01".repeat(32),
            "00"
        );
        assert_eq!(::hex::encode(tx.encode(true)), expected);
        assert_eq!(tx.weight(), 4 * tx.base_size());

        tx.inputs[0].witness.push(Bytes::from_static(&[0xaa]));
        let with_witness = ::hex::encode(tx.encode(true));
        assert!(with_witness.starts_with("020000000001"));
        assert!(with_witness.ends_with("0101aa00000000"));
        assert_eq!(tx.txid(), dsha256(&::hex::decode(&expected).unwrap()));
    }

    #[test]
    fn compact_size_boundaries() {
        for (n, len) in [(0xfc, 1), (0xfd, 3), (0xffff, 3), (0x1_0000, 5), (0x1_0000_0000, 9)] {
            let mut out = Vec::new();
            write_compact_size(&mut out, n);
            assert_eq!(out.len(), len, "n = {n:#x}");
        }
    }

    #[test]
    fn coinbase_and_coinstake_shapes() {
        let coinbase = Transaction {
            inputs: vec![TxIn::new(OutPoint::null())],
            outputs: vec![TxOut::new(COIN, Script::default())],
            ..Default::default()
        };
        assert!(coinbase.is_coinbase());
        assert!(!coinbase.is_coinstake());

        let coinstake = Transaction {
            inputs: vec![TxIn::new(OutPoint::new(B256::repeat_byte(1), 0))],
            outputs: vec![TxOut::empty(), TxOut::new(COIN, Script::default())],
            ..Default::default()
        };
        assert!(coinstake.is_coinstake());
        assert!(!coinstake.is_coinbase());
    }

    #[test]
    fn merkle_root_of_single_hash_is_identity() {
        let h = B256::repeat_byte(7);
        assert_eq!(merkle_root(&[h]), h);
        assert_ne!(merkle_root(&[h, h]), h);
        assert_eq!(merkle_root(&[h, h, B256::ZERO]), merkle_root(&[h, h, B256::ZERO, B256::ZERO]));
    }

    #[test]
    fn lock_time_finality() {
        let mut tx = Transaction { lock_time: 100, ..Default::default() };
        tx.inputs.push(TxIn { sequence: 0, ..TxIn::new(OutPoint::new(B256::ZERO, 0)) });
        assert!(!tx.is_final(100, 0));
        assert!(tx.is_final(101, 0));
        tx.inputs[0].sequence = u32::MAX;
        assert!(tx.is_final(0, 0));
    }
}
