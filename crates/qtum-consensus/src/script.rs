//! Output scripts: parsing, templates and the contract output formats.

use core::fmt;

use alloy_primitives::{Address, Bytes};
use serde::{Deserialize, Serialize};

use crate::{
    constants::dgp::{
        DEFAULT_BLOCK_GAS_LIMIT_DGP, MAX_BLOCK_GAS_LIMIT_DGP, STANDARD_MINIMUM_GAS_LIMIT,
        STANDARD_MINIMUM_GAS_PRICE,
    },
    Hash160,
};

/// Script opcodes used by the templates of this crate.
pub mod opcodes {
    #![allow(missing_docs)]

    pub const OP_0: u8 = 0x00;
    pub const OP_PUSHDATA1: u8 = 0x4c;
    pub const OP_PUSHDATA2: u8 = 0x4d;
    pub const OP_PUSHDATA4: u8 = 0x4e;
    pub const OP_1NEGATE: u8 = 0x4f;
    pub const OP_1: u8 = 0x51;
    pub const OP_16: u8 = 0x60;
    pub const OP_RETURN: u8 = 0x6a;
    pub const OP_DUP: u8 = 0x76;
    pub const OP_EQUAL: u8 = 0x87;
    pub const OP_EQUALVERIFY: u8 = 0x88;
    pub const OP_HASH160: u8 = 0xa9;
    pub const OP_CHECKSIG: u8 = 0xac;
    pub const OP_CHECKSIGVERIFY: u8 = 0xad;
    pub const OP_CHECKMULTISIG: u8 = 0xae;
    pub const OP_CHECKMULTISIGVERIFY: u8 = 0xaf;
    /// Creates a contract.
    pub const OP_CREATE: u8 = 0xc1;
    /// Calls a contract.
    pub const OP_CALL: u8 = 0xc2;
    /// Spends a contract balance.
    pub const OP_SPEND: u8 = 0xc3;
    /// Declares an explicit sender for the following contract operation.
    pub const OP_SENDER: u8 = 0xc4;

    /// Returns the opcode pushing the small integer `n` (0 to 16).
    pub const fn encode_op_n(n: u8) -> u8 {
        if n == 0 {
            OP_0
        } else {
            OP_1 + n - 1
        }
    }

    /// Returns the small integer pushed by `op`, for `OP_0` and `OP_1` through `OP_16`.
    pub const fn decode_op_n(op: u8) -> Option<u8> {
        match op {
            OP_0 => Some(0),
            OP_1..=OP_16 => Some(op - OP_1 + 1),
            _ => None,
        }
    }
}

use opcodes::*;

/// Largest script a sender signature may carry.
pub const MAX_BASE_SCRIPT_SIZE: usize = 10_000;
/// Largest number of keys in a bare multisig script.
pub const MAX_PUBKEYS_PER_MULTISIG: i64 = 20;

/// Script parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptError {
    /// A push runs past the end of the script.
    #[error("push of {wanted} bytes at offset {offset} runs past the end of the script")]
    TruncatedPush {
        /// Offset of the push opcode.
        offset: usize,
        /// Declared push length.
        wanted: usize,
    },
    /// A script number is longer than allowed.
    #[error("script number of {len} bytes exceeds {max} bytes")]
    NumberOverflow {
        /// Encoded length.
        len: usize,
        /// Allowed length.
        max: usize,
    },
    /// A script number is not minimally encoded.
    #[error("script number is not minimally encoded")]
    NonMinimalNumber,
    /// The script matches no contract template.
    #[error("script is not a contract output")]
    NotContract,
}

/// Minimal signed-magnitude little-endian number encoding.
pub mod script_num {
    use super::ScriptError;

    /// Encodes `value` minimally.
    pub fn encode(value: i64) -> Vec<u8> {
        if value == 0 {
            return Vec::new();
        }
        let negative = value < 0;
        let mut abs = value.unsigned_abs();
        let mut out = Vec::with_capacity(9);
        while abs > 0 {
            out.push((abs & 0xff) as u8);
            abs >>= 8;
        }
        let last = out.len() - 1;
        if out[last] & 0x80 != 0 {
            out.push(if negative { 0x80 } else { 0x00 });
        } else if negative {
            out[last] |= 0x80;
        }
        out
    }

    /// Decodes a signed number of at most `max_len` bytes.
    pub fn decode(data: &[u8], require_minimal: bool, max_len: usize) -> Result<i64, ScriptError> {
        if data.len() > max_len {
            return Err(ScriptError::NumberOverflow { len: data.len(), max: max_len });
        }
        let Some(&last) = data.last() else { return Ok(0) };
        if require_minimal &&
            last & 0x7f == 0 &&
            (data.len() <= 1 || data[data.len() - 2] & 0x80 == 0)
        {
            return Err(ScriptError::NonMinimalNumber);
        }
        let mut result: i64 = 0;
        for (i, byte) in data.iter().enumerate() {
            result |= (*byte as i64) << (8 * i);
        }
        if last & 0x80 != 0 {
            let mask = !(0x80_i64 << (8 * (data.len() - 1)));
            return Ok(-(result & mask));
        }
        Ok(result)
    }

    /// Reads up to 8 little-endian bytes as an unsigned number, ignoring the sign bit.
    pub fn decode_u64(data: &[u8]) -> Result<u64, ScriptError> {
        if data.len() > 8 {
            return Err(ScriptError::NumberOverflow { len: data.len(), max: 8 });
        }
        Ok(data.iter().enumerate().fold(0u64, |acc, (i, byte)| acc | (*byte as u64) << (8 * i)))
    }
}

/// One parsed script operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction<'a> {
    /// The opcode.
    pub opcode: u8,
    /// Pushed bytes; empty for non-push opcodes.
    pub data: &'a [u8],
}

impl Instruction<'_> {
    /// Returns whether the opcode pushes data from the script itself.
    pub const fn is_data_push(&self) -> bool {
        self.opcode <= OP_PUSHDATA4
    }

    /// Returns whether the push uses the shortest possible encoding.
    pub fn is_minimal_push(&self) -> bool {
        let len = self.data.len();
        match len {
            0 => self.opcode == OP_0,
            1 if (1..=16).contains(&self.data[0]) => false,
            1 if self.data[0] == 0x81 => false,
            _ if len <= 75 => self.opcode as usize == len,
            _ if len <= 255 => self.opcode == OP_PUSHDATA1,
            _ if len <= 65535 => self.opcode == OP_PUSHDATA2,
            _ => true,
        }
    }
}

/// Iterator over the instructions of a script.
#[derive(Debug, Clone)]
pub struct Instructions<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for Instructions<'a> {
    type Item = Result<Instruction<'a>, ScriptError>;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.offset;
        let opcode = *self.bytes.get(start)?;
        let mut pos = start + 1;
        let len = match opcode {
            n @ 0x01..=0x4b => n as usize,
            OP_PUSHDATA1 | OP_PUSHDATA2 | OP_PUSHDATA4 => {
                let width = match opcode {
                    OP_PUSHDATA1 => 1,
                    OP_PUSHDATA2 => 2,
                    _ => 4,
                };
                let Some(raw) = self.bytes.get(pos..pos + width) else {
                    self.offset = self.bytes.len();
                    return Some(Err(ScriptError::TruncatedPush { offset: start, wanted: width }));
                };
                pos += width;
                raw.iter().rev().fold(0usize, |acc, byte| acc << 8 | *byte as usize)
            }
            _ => 0,
        };
        let Some(data) = self.bytes.get(pos..pos.saturating_add(len)) else {
            self.offset = self.bytes.len();
            return Some(Err(ScriptError::TruncatedPush { offset: start, wanted: len }));
        };
        self.offset = pos + len;
        Some(Ok(Instruction { opcode, data }))
    }
}

/// A locking or unlocking script.
#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    derive_more::From,
    derive_more::Deref,
)]
#[serde(transparent)]
pub struct Script(Bytes);

impl Script {
    /// Wraps raw script bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Raw script bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Iterates over the instructions of the script.
    pub fn instructions(&self) -> Instructions<'_> {
        Instructions { bytes: &self.0, offset: 0 }
    }

    /// Returns whether every instruction from `start` on is a push.
    pub fn is_push_only_from(&self, start: usize) -> bool {
        let Some(tail) = self.0.get(start..) else { return false };
        Instructions { bytes: tail, offset: 0 }
            .all(|ins| ins.is_ok_and(|ins| ins.opcode <= OP_16))
    }

    /// Returns whether the script is `OP_HASH160 <20 bytes> OP_EQUAL`.
    pub fn is_pay_to_script_hash(&self) -> bool {
        let b = self.as_bytes();
        b.len() == 23 && b[0] == OP_HASH160 && b[1] == 0x14 && b[22] == OP_EQUAL
    }

    /// Returns the witness version and program, if the script is a witness program.
    pub fn witness_program(&self) -> Option<(u8, &[u8])> {
        let b = self.as_bytes();
        if !(4..=42).contains(&b.len()) {
            return None;
        }
        if b[0] != OP_0 && !(OP_1..=OP_16).contains(&b[0]) {
            return None;
        }
        if b[1] as usize + 2 != b.len() {
            return None;
        }
        Some((decode_op_n(b[0])?, &b[2..]))
    }

    /// Returns whether the script is the pay-to-anchor output `OP_1 <0x4e73>`.
    pub fn is_pay_to_anchor(&self) -> bool {
        self.as_bytes() == PAY_TO_ANCHOR
    }

    fn count_opcode(&self, opcode: u8) -> usize {
        self.instructions().map_while(Result::ok).filter(|ins| ins.opcode == opcode).count()
    }

    /// Returns whether the script contains exactly one `OP_CREATE`.
    pub fn has_op_create(&self) -> bool {
        self.count_opcode(OP_CREATE) == 1
    }

    /// Returns whether the script contains exactly one `OP_CALL`.
    pub fn has_op_call(&self) -> bool {
        self.count_opcode(OP_CALL) == 1
    }

    /// Returns whether the script contains exactly one `OP_SENDER`.
    pub fn has_op_sender(&self) -> bool {
        self.count_opcode(OP_SENDER) == 1
    }

    /// Returns whether the script contains exactly one `OP_SPEND`.
    pub fn has_op_spend(&self) -> bool {
        self.count_opcode(OP_SPEND) == 1
    }

    /// Returns whether the script creates or calls a contract.
    pub fn has_contract_op(&self) -> bool {
        self.has_op_create() || self.has_op_call()
    }

    /// Legacy signature operation count.
    pub fn sigop_count(&self) -> u64 {
        self.instructions()
            .map_while(Result::ok)
            .map(|ins| match ins.opcode {
                OP_CHECKSIG | OP_CHECKSIGVERIFY => 1,
                OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => MAX_PUBKEYS_PER_MULTISIG as u64,
                _ => 0,
            })
            .sum()
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

const PAY_TO_ANCHOR: [u8; 4] = [OP_1, 0x02, 0x4e, 0x73];

/// Builder of scripts.
#[derive(Debug, Clone, Default)]
pub struct ScriptBuilder {
    bytes: Vec<u8>,
}

impl ScriptBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a bare opcode.
    pub fn push_opcode(mut self, opcode: u8) -> Self {
        self.bytes.push(opcode);
        self
    }

    /// Appends a data push using the shortest push opcode for its length.
    pub fn push_slice(mut self, data: &[u8]) -> Self {
        match data.len() {
            len @ 0..=0x4b => self.bytes.push(len as u8),
            len @ 0x4c..=0xff => {
                self.bytes.push(OP_PUSHDATA1);
                self.bytes.push(len as u8);
            }
            len @ 0x100..=0xffff => {
                self.bytes.push(OP_PUSHDATA2);
                self.bytes.extend_from_slice(&(len as u16).to_le_bytes());
            }
            len => {
                self.bytes.push(OP_PUSHDATA4);
                self.bytes.extend_from_slice(&(len as u32).to_le_bytes());
            }
        }
        self.bytes.extend_from_slice(data);
        self
    }

    /// Appends an integer, as a small-integer opcode when one exists.
    pub fn push_int(self, value: i64) -> Self {
        match value {
            -1 => self.push_opcode(OP_1NEGATE),
            0..=16 => self.push_opcode(encode_op_n(value as u8)),
            _ => self.push_slice(&script_num::encode(value)),
        }
    }

    /// Appends a number as a data push, the format of contract output parameters.
    pub fn push_num(self, value: i64) -> Self {
        self.push_slice(&script_num::encode(value))
    }

    /// Finishes the script.
    pub fn build(self) -> Script {
        Script(self.bytes.into())
    }
}

/// Classification of an output script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxoutType {
    /// Matches no template.
    NonStandard,
    /// `<pubkey> OP_CHECKSIG`.
    PubKey,
    /// `OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG`.
    PubKeyHash,
    /// `OP_HASH160 <20> OP_EQUAL`.
    ScriptHash,
    /// Bare `m <keys> n OP_CHECKMULTISIG`.
    Multisig,
    /// Unspendable `OP_RETURN` data carrier.
    NullData,
    /// Pay-to-anchor.
    Anchor,
    /// Witness v0 key hash.
    WitnessV0KeyHash,
    /// Witness v0 script hash.
    WitnessV0ScriptHash,
    /// Witness v1 taproot.
    WitnessV1Taproot,
    /// Witness program of an unknown version.
    WitnessUnknown,
    /// Contract creation with an explicit sender.
    CreateSender,
    /// Contract call with an explicit sender.
    CallSender,
    /// Contract creation.
    Create,
    /// Contract call.
    Call,
}

impl TxoutType {
    /// Returns whether the type is one of the contract templates.
    pub const fn is_contract(self) -> bool {
        matches!(self, Self::CreateSender | Self::CallSender | Self::Create | Self::Call)
    }

    /// Name used by the RPC layer.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NonStandard => "nonstandard",
            Self::PubKey => "pubkey",
            Self::PubKeyHash => "pubkeyhash",
            Self::ScriptHash => "scripthash",
            Self::Multisig => "multisig",
            Self::NullData => "nulldata",
            Self::Anchor => "anchor",
            Self::WitnessV0KeyHash => "witness_v0_keyhash",
            Self::WitnessV0ScriptHash => "witness_v0_scripthash",
            Self::WitnessV1Taproot => "witness_v1_taproot",
            Self::WitnessUnknown => "witness_unknown",
            Self::CreateSender => "create_sender",
            Self::CallSender => "call_sender",
            Self::Create => "create",
            Self::Call => "call",
        }
    }
}

impl fmt::Display for TxoutType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns whether `data` has the length its SEC1 prefix announces.
pub fn is_valid_pubkey_size(data: &[u8]) -> bool {
    let expected = match data.first() {
        Some(2 | 3) => 33,
        Some(4 | 6 | 7) => 65,
        _ => return false,
    };
    data.len() == expected
}

/// Result of [`solve`]: the template type and the data it extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solution {
    /// Matched template.
    pub kind: TxoutType,
    /// Template data, in template order.
    pub data: Vec<Bytes>,
}

impl Solution {
    fn new(kind: TxoutType, data: Vec<Bytes>) -> Self {
        Self { kind, data }
    }
}

/// Classifies `script` against the standard and contract templates, first match wins.
///
/// `contract_consensus` selects the block validity limits for contract outputs instead of
/// the stricter relay limits. `allow_empty_sender_sig` accepts sender outputs whose
/// signature has not been filled in yet.
pub fn solve(script: &Script, contract_consensus: bool, allow_empty_sender_sig: bool) -> Solution {
    let bytes = script.as_bytes();
    if script.is_pay_to_script_hash() {
        return Solution::new(TxoutType::ScriptHash, vec![Bytes::copy_from_slice(&bytes[2..22])]);
    }

    if let Some((version, program)) = script.witness_program() {
        let program = Bytes::copy_from_slice(program);
        return match (version, program.len()) {
            (0, 20) => Solution::new(TxoutType::WitnessV0KeyHash, vec![program]),
            (0, 32) => Solution::new(TxoutType::WitnessV0ScriptHash, vec![program]),
            (1, 32) => Solution::new(TxoutType::WitnessV1Taproot, vec![program]),
            _ if script.is_pay_to_anchor() => Solution::new(TxoutType::Anchor, vec![]),
            (0, _) => Solution::new(TxoutType::NonStandard, vec![]),
            (v, _) => Solution::new(
                TxoutType::WitnessUnknown,
                vec![Bytes::copy_from_slice(&[v]), program],
            ),
        };
    }

    if bytes.first() == Some(&OP_RETURN) && script.is_push_only_from(1) {
        return Solution::new(TxoutType::NullData, vec![]);
    }

    if let Some(pubkey) = match_pay_to_pubkey(bytes) {
        return Solution::new(TxoutType::PubKey, vec![Bytes::copy_from_slice(pubkey)]);
    }

    if bytes.len() == 25 &&
        bytes[0] == OP_DUP &&
        bytes[1] == OP_HASH160 &&
        bytes[2] == 20 &&
        bytes[23] == OP_EQUALVERIFY &&
        bytes[24] == OP_CHECKSIG
    {
        return Solution::new(TxoutType::PubKeyHash, vec![Bytes::copy_from_slice(&bytes[3..23])]);
    }

    if let Some(data) = match_multisig(script) {
        return Solution::new(TxoutType::Multisig, data);
    }

    if let Some(output) = match_contract(script, contract_consensus, allow_empty_sender_sig) {
        let kind = output.txout_type();
        return Solution::new(kind, output.solutions());
    }

    Solution::new(TxoutType::NonStandard, vec![])
}

fn match_pay_to_pubkey(bytes: &[u8]) -> Option<&[u8]> {
    for size in [65usize, 33] {
        if bytes.len() == size + 2 && bytes[0] as usize == size && bytes[size + 1] == OP_CHECKSIG {
            let pubkey = &bytes[1..=size];
            return is_valid_pubkey_size(pubkey).then_some(pubkey);
        }
    }
    None
}

fn script_number(ins: &Instruction<'_>, min: i64, max: i64) -> Option<i64> {
    let n = if let Some(n) = decode_op_n(ins.opcode).filter(|n| *n > 0) {
        n as i64
    } else if ins.is_data_push() {
        if !ins.is_minimal_push() {
            return None;
        }
        script_num::decode(ins.data, true, 4).ok()?
    } else {
        return None;
    };
    (min..=max).contains(&n).then_some(n)
}

fn match_multisig(script: &Script) -> Option<Vec<Bytes>> {
    if script.as_bytes().last() != Some(&OP_CHECKMULTISIG) {
        return None;
    }
    let mut ins = script.instructions();
    let required = script_number(&ins.next()?.ok()?, 1, MAX_PUBKEYS_PER_MULTISIG)?;
    let mut keys = Vec::new();
    let count_ins = loop {
        let next = ins.next()?.ok()?;
        if !is_valid_pubkey_size(next.data) {
            break next;
        }
        keys.push(Bytes::copy_from_slice(next.data));
    };
    let count = script_number(&count_ins, required, MAX_PUBKEYS_PER_MULTISIG)?;
    if keys.len() as i64 != count {
        return None;
    }
    let last = ins.next()?.ok()?;
    if last.opcode != OP_CHECKMULTISIG || ins.next().is_some() {
        return None;
    }
    let mut data = Vec::with_capacity(keys.len() + 2);
    data.push(Bytes::copy_from_slice(&[required as u8]));
    data.extend(keys);
    data.push(Bytes::copy_from_slice(&[count as u8]));
    Some(data)
}

/// Kind of contract operation an output performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractKind {
    /// Deploys a contract.
    Create,
    /// Calls a contract.
    Call,
}

/// Packed virtual machine version of a contract output.
///
/// The low two bits are the format and the next six bits the root VM; root VM 0 marks an
/// output that carries no execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionVm(pub u32);

impl VersionVm {
    /// The EVM version every executable contract output carries.
    pub const EVM: Self = Self(crate::constants::evm::VM_VERSION_EVM as u32);
    /// The no-execution version.
    pub const NO_EXEC: Self = Self(crate::constants::evm::VM_VERSION_NO_EXEC as u32);

    /// Root VM identifier.
    pub const fn root_vm(self) -> u8 {
        ((self.0 >> 2) & 0x3f) as u8
    }
}

/// Address type tag used by sender outputs.
const ADDRESS_TYPE_PUBKEYHASH: u64 = 1;
const ADDRESS_TYPE_NONSTANDARD: u64 = 3;

/// Explicit sender of a contract output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSender {
    /// Key hash of the sender.
    pub key_hash: Hash160,
    /// Signature script proving control of the sender key.
    pub script_sig: Bytes,
}

/// Parsed contract output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractOutput {
    /// Create or call.
    pub kind: ContractKind,
    /// Explicit sender, for `OP_SENDER` outputs.
    pub sender: Option<ContractSender>,
    /// VM version, absent when the output did not push one.
    pub version: Option<VersionVm>,
    /// Gas limit.
    pub gas_limit: u64,
    /// Gas price in smallest units per gas.
    pub gas_price: u64,
    /// Init code for creates, call data for calls.
    pub data: Bytes,
    /// Called contract.
    pub receiver: Option<Address>,
}

impl ContractOutput {
    /// Parses a contract output with the block validity limits.
    pub fn parse(script: &Script) -> Result<Self, ScriptError> {
        match_contract(script, true, true).ok_or(ScriptError::NotContract)
    }

    /// Template type of the output.
    pub const fn txout_type(&self) -> TxoutType {
        match (self.kind, self.sender.is_some()) {
            (ContractKind::Create, true) => TxoutType::CreateSender,
            (ContractKind::Call, true) => TxoutType::CallSender,
            (ContractKind::Create, false) => TxoutType::Create,
            (ContractKind::Call, false) => TxoutType::Call,
        }
    }

    /// Returns whether the output is executed by the EVM.
    pub fn executes(&self) -> bool {
        self.version != Some(VersionVm::NO_EXEC)
    }

    fn solutions(&self) -> Vec<Bytes> {
        let mut data = Vec::new();
        if let Some(sender) = &self.sender {
            let script = crate::destination::pay_to_pubkey_hash(&sender.key_hash);
            let mut serialized = Vec::with_capacity(script.len() + 1);
            crate::write_var_bytes(&mut serialized, script.as_bytes());
            data.push(serialized.into());
            data.push(sender.script_sig.clone());
        }
        if let Some(receiver) = self.receiver {
            data.push(Bytes::copy_from_slice(receiver.as_slice()));
        }
        data
    }
}

/// One element of a contract template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    AddressType,
    Address,
    ScriptSig,
    Version,
    GasLimit,
    GasPrice,
    Data,
    PubKeyHash,
    Op(u8),
}

const CREATE_SENDER_TEMPLATE: &[Slot] = &[
    Slot::AddressType,
    Slot::Address,
    Slot::ScriptSig,
    Slot::Op(OP_SENDER),
    Slot::Version,
    Slot::GasLimit,
    Slot::GasPrice,
    Slot::Data,
    Slot::Op(OP_CREATE),
];
const CALL_SENDER_TEMPLATE: &[Slot] = &[
    Slot::AddressType,
    Slot::Address,
    Slot::ScriptSig,
    Slot::Op(OP_SENDER),
    Slot::Version,
    Slot::GasLimit,
    Slot::GasPrice,
    Slot::Data,
    Slot::PubKeyHash,
    Slot::Op(OP_CALL),
];
const CREATE_TEMPLATE: &[Slot] =
    &[Slot::Version, Slot::GasLimit, Slot::GasPrice, Slot::Data, Slot::Op(OP_CREATE)];
const CALL_TEMPLATE: &[Slot] = &[
    Slot::Version,
    Slot::GasLimit,
    Slot::GasPrice,
    Slot::Data,
    Slot::PubKeyHash,
    Slot::Op(OP_CALL),
];

/// Outcome of matching one template.
enum Match {
    Found(ContractOutput),
    /// Try the next template.
    Mismatch,
    /// The script is a malformed contract output; stop matching.
    Reject,
}

fn match_contract(
    script: &Script,
    contract_consensus: bool,
    allow_empty_sender_sig: bool,
) -> Option<ContractOutput> {
    let templates = [
        (ContractKind::Create, CREATE_SENDER_TEMPLATE),
        (ContractKind::Call, CALL_SENDER_TEMPLATE),
        (ContractKind::Create, CREATE_TEMPLATE),
        (ContractKind::Call, CALL_TEMPLATE),
    ];
    for (kind, template) in templates {
        match match_template(script, kind, template, contract_consensus, allow_empty_sender_sig) {
            Match::Found(output) => return Some(output),
            Match::Mismatch => continue,
            Match::Reject => return None,
        }
    }
    None
}

fn match_template(
    script: &Script,
    kind: ContractKind,
    template: &[Slot],
    contract_consensus: bool,
    allow_empty_sender_sig: bool,
) -> Match {
    let mut output = ContractOutput {
        kind,
        sender: None,
        version: None,
        gas_limit: 0,
        gas_price: 0,
        data: Bytes::new(),
        receiver: None,
    };
    let mut address_type = 0;
    let mut sender_key = None;
    let mut ins = script.instructions();

    for slot in template {
        let Some(Ok(op)) = ins.next() else { return Match::Mismatch };
        // Root VM 20 stands in for a version that was not pushed as data.
        let root_vm = output.version.map_or(20, VersionVm::root_vm);
        match *slot {
            Slot::Version => {
                if op.is_data_push() {
                    if op.data.is_empty() || op.data.len() > 4 || op.data[op.data.len() - 1] & 0x80 != 0
                    {
                        return Match::Reject;
                    }
                    let Ok(raw) = script_num::decode_u64(op.data) else { return Match::Reject };
                    let version = VersionVm(raw as u32);
                    if version != VersionVm::EVM && version != VersionVm::NO_EXEC {
                        return Match::Reject;
                    }
                    output.version = Some(version);
                }
            }
            Slot::GasLimit => {
                let Ok(value) = script_num::decode_u64(op.data) else { return Match::Reject };
                let (min, max) = if contract_consensus {
                    (1, MAX_BLOCK_GAS_LIMIT_DGP)
                } else {
                    (STANDARD_MINIMUM_GAS_LIMIT, DEFAULT_BLOCK_GAS_LIMIT_DGP / 2)
                };
                if (root_vm != 0 && value < min) || value > max {
                    return Match::Reject;
                }
                output.gas_limit = value;
            }
            Slot::GasPrice => {
                let Ok(value) = script_num::decode_u64(op.data) else { return Match::Reject };
                let min = if contract_consensus { 1 } else { STANDARD_MINIMUM_GAS_PRICE };
                if root_vm != 0 && value < min {
                    return Match::Reject;
                }
                output.gas_price = value;
            }
            Slot::Data => {
                if op.is_data_push() && op.data.is_empty() {
                    return Match::Mismatch;
                }
                output.data = Bytes::copy_from_slice(op.data);
            }
            Slot::AddressType => match script_num::decode_u64(op.data) {
                Ok(value) if (ADDRESS_TYPE_PUBKEYHASH..=ADDRESS_TYPE_NONSTANDARD).contains(&value) => {
                    address_type = value
                }
                _ => return Match::Mismatch,
            },
            Slot::Address => {
                if address_type != ADDRESS_TYPE_PUBKEYHASH || op.data.len() != 20 {
                    return Match::Mismatch;
                }
                sender_key = Some(Hash160::from_slice(op.data));
            }
            Slot::ScriptSig => {
                if op.is_data_push() {
                    if !allow_empty_sender_sig && op.data.is_empty() {
                        return Match::Mismatch;
                    }
                    if op.data.len() > MAX_BASE_SCRIPT_SIZE {
                        return Match::Reject;
                    }
                }
                if let Some(key_hash) = sender_key {
                    output.sender =
                        Some(ContractSender { key_hash, script_sig: Bytes::copy_from_slice(op.data) });
                }
            }
            Slot::PubKeyHash => {
                if op.data.len() != 20 {
                    return Match::Mismatch;
                }
                output.receiver = Some(Address::from_slice(op.data));
            }
            Slot::Op(expected) => {
                if op.opcode != expected || !op.data.is_empty() {
                    return Match::Mismatch;
                }
            }
        }
    }

    if ins.next().is_some() {
        return Match::Mismatch;
    }
    Match::Found(output)
}

/// Builds a contract creation output script.
pub fn create_script(version: VersionVm, gas_limit: u64, gas_price: u64, code: &[u8]) -> Script {
    ScriptBuilder::new()
        .push_num(version.0 as i64)
        .push_num(gas_limit as i64)
        .push_num(gas_price as i64)
        .push_slice(code)
        .push_opcode(OP_CREATE)
        .build()
}

/// Builds a contract call output script.
pub fn call_script(
    version: VersionVm,
    gas_limit: u64,
    gas_price: u64,
    data: &[u8],
    contract: Address,
) -> Script {
    ScriptBuilder::new()
        .push_num(version.0 as i64)
        .push_num(gas_limit as i64)
        .push_num(gas_price as i64)
        .push_slice(data)
        .push_slice(contract.as_slice())
        .push_opcode(OP_CALL)
        .build()
}

/// Prefixes a contract output with an explicit `OP_SENDER` clause.
pub fn with_sender(sender: &Hash160, script_sig: &[u8], contract: &Script) -> Script {
    let prefix = ScriptBuilder::new()
        .push_num(ADDRESS_TYPE_PUBKEYHASH as i64)
        .push_slice(sender.as_slice())
        .push_slice(script_sig)
        .push_opcode(OP_SENDER)
        .build();
    let mut bytes = prefix.as_bytes().to_vec();
    bytes.extend_from_slice(contract.as_bytes());
    Script::new(bytes)
}
