//! System contracts of the Qtum consensus core.
//!
//! This crate provides the fixed addresses and the Solidity ABI bindings of the contracts the
//! consensus rules talk to: the decentralized governance (DGP) contracts that tune gas
//! economics, and the offline staking delegation contract.

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]
#![warn(unused_crate_dependencies)]
#![deny(unused_must_use)]

pub use alloy_primitives;

/// Decentralized governance protocol (DGP) contracts.
///
/// Each governance contract keeps an ordered list of `(activation height, template address)`
/// pairs. The template contract active at a height is queried through one of the getters below.
pub mod dgp {
    use alloy_primitives::{address, Address};

    /// Governance contract for the EVM gas schedule.
    pub const GAS_SCHEDULE_DGP: Address = address!("0x0000000000000000000000000000000000000080");
    /// Governance contract for the block size.
    pub const BLOCK_SIZE_DGP: Address = address!("0x0000000000000000000000000000000000000081");
    /// Governance contract for the minimum gas price.
    pub const GAS_PRICE_DGP: Address = address!("0x0000000000000000000000000000000000000082");
    /// Reserved governance slot. Never queried by the consensus rules.
    pub const DGP_CONTRACT_4: Address = address!("0x0000000000000000000000000000000000000083");
    /// Governance contract for the block gas limit.
    pub const BLOCK_GAS_LIMIT_DGP: Address = address!("0x0000000000000000000000000000000000000084");

    alloy_sol_types::sol! {
        /// Getter of the gas schedule template contract.
        ///
        /// The result is read as consecutive 32-byte words, one per schedule entry.
        interface IGasSchedule {
            function getSchedule() external view returns (uint32[39] memory);
        }

        /// Getter of the block size template contract.
        interface IBlockSize {
            function getBlockSize() external view returns (uint32[1] memory);
        }

        /// Getter of the minimum gas price template contract.
        interface IMinGasPrice {
            function getMinGasPrice() external view returns (uint32[1] memory);
        }

        /// Getter of the block gas limit template contract.
        interface IBlockGasLimit {
            function getBlockGasLimit() external view returns (uint32[1] memory);
        }
    }
}

/// Offline staking delegation contract.
pub mod delegation {
    alloy_sol_types::sol! {
        /// The delegation contract deployed at the offline staking activation height.
        #[derive(Debug, PartialEq, Eq)]
        interface IDelegations {
            /// Emitted when a staker accepts a delegation from `_delegate`.
            event AddDelegation(
                address indexed _staker,
                address indexed _delegate,
                uint8 fee,
                uint256 blockHeight,
                bytes PoD
            );

            /// Emitted when `_delegate` removes its delegation.
            event RemoveDelegation(address indexed _staker, address indexed _delegate);

            /// Delegates the sender's weight to `_staker`.
            function addDelegation(address _staker, uint8 _fee, bytes _PoD) external;

            /// Removes the sender's delegation.
            function removeDelegation() external;

            /// Returns the delegation of a delegate address.
            function delegations(address)
                external
                view
                returns (address staker, uint8 fee, uint256 blockHeight, bytes PoD);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{delegation::IDelegations, dgp::*};
    use alloy_sol_types::{SolCall, SolEvent};

    #[test]
    fn governance_selectors_match_deployed_contracts() {
        assert_eq!(IGasSchedule::getScheduleCall::SELECTOR, [0x26, 0xfa, 0xdb, 0xe2]);
        assert_eq!(IBlockSize::getBlockSizeCall::SELECTOR, [0x92, 0xac, 0x3c, 0x62]);
        assert_eq!(IMinGasPrice::getMinGasPriceCall::SELECTOR, [0x3f, 0xb5, 0x88, 0x19]);
        assert_eq!(IBlockGasLimit::getBlockGasLimitCall::SELECTOR, [0x2c, 0xc8, 0x37, 0x7d]);
    }

    #[test]
    fn delegation_abi_shapes() {
        assert_eq!(IDelegations::delegationsCall::SELECTOR, [0xbf, 0xfe, 0x34, 0x86]);
        assert_eq!(
            IDelegations::AddDelegation::SIGNATURE,
            "AddDelegation(address,address,uint8,uint256,bytes)"
        );
        assert_eq!(IDelegations::RemoveDelegation::SIGNATURE, "RemoveDelegation(address,address)");
    }
}
