use alloy_primitives::{keccak256, Address, Bytes, B256, U256};

use crate::evm::ContractState;

/// Appends a template activated at `activation_height` to the governance contract `dgp`
/// and installs `code` at `template`.
pub fn install_template(
    state: &mut ContractState,
    dgp: Address,
    activation_height: u64,
    template: Address,
    code: Bytes,
) {
    let length = state.storage(&dgp, &U256::ZERO);
    let base = U256::from_be_bytes(keccak256(B256::ZERO).0);
    let slot = base + (length << 1);
    state.set_storage(dgp, slot, U256::from(activation_height));
    state.set_storage(dgp, slot + U256::from(1), U256::from_be_bytes(template.into_word().0));
    state.set_storage(dgp, U256::ZERO, length + U256::from(1));
    state.account_mut(template).code = code;
}

/// Stores a schedule in the legacy storage layout: eight entries per slot from slot 0.
pub fn store_schedule(state: &mut ContractState, template: Address, values: &[u32]) {
    for (slot, chunk) in values.chunks(8).enumerate() {
        let mut limbs = [0u64; 4];
        for (index, value) in chunk.iter().enumerate() {
            limbs[index / 2] |= u64::from(*value) << (32 * (index % 2));
        }
        state.set_storage(template, U256::from(slot), U256::from_limbs(limbs));
    }
}
