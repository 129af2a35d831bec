//! The consensus core of a UTXO ledger with an embedded EVM and hybrid PoW/PoS block production.
//!
//! The crate is organized leaves first:
//!
//! - [`params`]: per-chain consensus parameters and height-dependent accessors.
//! - [`script`] and [`destination`]: output script templates and typed destinations.
//! - [`difficulty`]: next-target computation and proof validation for both proof regimes.
//! - [`evm`]: the EVM execution bridge with EIP-2200 refunds, access lists and transient storage.
//! - [`dgp`]: the gas governor reading on-chain governance contracts.
//! - [`assembler`]: the block template assembler.
//! - [`delegation`]: the offline staking delegation registry.
//! - [`staker`]: the background staking loop.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub mod constants;

mod error;
pub use error::*;

pub mod params;
pub use params::{ConsensusParams, ProofKind};

mod primitives;
pub use primitives::*;

pub mod script;
pub use script::{Script, ScriptBuilder, TxoutType};

pub mod destination;
pub use destination::Destination;

pub mod difficulty;
pub use difficulty::{BlockIndexEntry, HeaderChain};

pub mod evm;

pub mod dgp;
pub use dgp::GasGovernor;

pub mod assembler;
pub use assembler::{AssemblerOptions, BlockAssembler, BlockTemplate};

pub mod delegation;

pub mod staker;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use qtum_system_contracts as system_contracts;
