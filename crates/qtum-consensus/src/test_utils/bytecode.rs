//! Assembling EVM bytecode for test contracts.

use alloy_primitives::{Address, Bytes, U256};
use revm::bytecode::opcode::{MSTORE, PUSH1, RETURN, REVERT, SSTORE};

/// Pads the bytes to the right with 0s to make it a multiple of the length.
pub fn right_pad_bytes(bytes: impl AsRef<[u8]>, multiple_of: usize) -> Vec<u8> {
    let bytes = bytes.as_ref().to_vec();
    let padding = (multiple_of - (bytes.len() % multiple_of)) % multiple_of;
    [bytes, vec![0u8; padding]].concat()
}

/// A builder for assembling EVM bytecode.
///
/// Only opcodes available before Shanghai are emitted, so the code runs at any height.
#[derive(Debug, Default)]
pub struct BytecodeBuilder {
    code: Vec<u8>,
}

impl BytecodeBuilder {
    /// Build the bytecode.
    pub fn build(self) -> Bytes {
        self.code.into()
    }

    /// Build the bytecode as a vector.
    pub fn build_vec(self) -> Vec<u8> {
        self.code
    }

    /// Get the length of the bytecode.
    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// Check if the bytecode is empty.
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Append a single opcode or byte.
    pub fn append(mut self, opcode: u8) -> Self {
        self.code.push(opcode);
        self
    }

    /// Append a series of opcodes or bytes.
    pub fn append_many(mut self, items: impl IntoIterator<Item = u8>) -> Self {
        self.code.extend(items);
        self
    }

    /// Append the shortest PUSH of the bytes. An empty slice pushes a zero byte.
    pub fn push_bytes(mut self, bytes: impl AsRef<[u8]>) -> Self {
        let bytes: &[u8] = bytes.as_ref();
        assert!(bytes.len() <= 32);
        if bytes.is_empty() {
            self.code.extend([PUSH1, 0]);
        } else {
            self.code.push(PUSH1 - 1 + bytes.len() as u8);
            self.code.extend_from_slice(bytes);
        }
        self
    }

    /// Append a PUSH of the number, as wide as its type.
    pub fn push_number<T: Into<u128> + Copy>(self, number: T) -> Self {
        let num = number.into();
        let bytes = match core::mem::size_of::<T>() {
            1 => (num as u8).to_be_bytes().to_vec(),
            2 => (num as u16).to_be_bytes().to_vec(),
            4 => (num as u32).to_be_bytes().to_vec(),
            8 => (num as u64).to_be_bytes().to_vec(),
            16 => num.to_be_bytes().to_vec(),
            _ => panic!("Unsupported integer size"),
        };
        self.push_bytes(bytes)
    }

    /// Append a PUSH of the address.
    pub fn push_address(self, address: Address) -> Self {
        self.push_bytes(address)
    }

    /// Append a PUSH of the 256-bit value.
    pub fn push_u256(self, value: U256) -> Self {
        self.push_bytes(value.to_be_bytes_vec())
    }

    /// Append a series of MSTORE opcodes to store the given bytes at the given offset.
    pub fn mstore(self, offset: usize, bytes: impl AsRef<[u8]>) -> Self {
        let padded_bytes = right_pad_bytes(bytes, 32);
        let mut this = self;
        for (i, chunk) in padded_bytes.chunks(32).enumerate() {
            this = this.push_bytes(chunk);
            this = this.push_number((offset + i * 32) as u64);
            this.code.push(MSTORE);
        }
        this
    }

    /// Append a SSTORE opcode to store the given value at the given slot.
    pub fn sstore(self, slot: U256, value: U256) -> Self {
        self.push_u256(value).push_u256(slot).append(SSTORE)
    }

    /// Append a REVERT opcode with empty return data.
    pub fn revert(self) -> Self {
        self.push_number(0u8).push_number(0u8).append(REVERT)
    }

    /// Append a REVERT opcode with the given return data.
    pub fn revert_with_data(self, data: impl AsRef<[u8]>) -> Self {
        let data_len = data.as_ref().len();
        self.mstore(0x0, data).push_number(data_len as u64).push_number(0x0_u64).append(REVERT)
    }

    /// Append a RETURN opcode with empty return data.
    pub fn return_empty(self) -> Self {
        self.push_number(0u8).push_number(0u8).append(RETURN)
    }

    /// Append a RETURN opcode with the given return data.
    pub fn return_with_data(self, data: impl AsRef<[u8]>) -> Self {
        let data_len = data.as_ref().len();
        self.mstore(0x0, data).push_number(data_len as u64).push_number(0x0_u64).append(RETURN)
    }

    /// Wraps the code built so far into init code deploying it.
    pub fn into_init_code(self) -> Bytes {
        let runtime = self.build_vec();
        Self::default().return_with_data(&runtime).build()
    }
}
