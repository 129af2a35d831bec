use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use qtum_consensus::{
    evm::ContractState, test_utils::MemoryChain, ConsensusParams, HeaderChain, ProofKind,
};
use serde::Deserialize;
use tracing::debug;

use super::{read_json, MinerError, Result};

/// Network whose consensus rules apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Chain {
    /// Main network
    Main,
    /// Public test network
    Test,
    /// Local regression test network
    #[default]
    Regtest,
}

impl Chain {
    /// Consensus parameters of the network.
    pub fn params(self) -> ConsensusParams {
        match self {
            Self::Main => ConsensusParams::mainnet(),
            Self::Test => ConsensusParams::testnet(),
            Self::Regtest => ConsensusParams::regtest(),
        }
    }
}

/// Proof type of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Proof {
    /// Proof of work
    #[default]
    Work,
    /// Proof of stake
    Stake,
}

impl From<Proof> for ProofKind {
    fn from(proof: Proof) -> Self {
        match proof {
            Proof::Work => Self::Work,
            Proof::Stake => Self::Stake,
        }
    }
}

/// One header of a headers file.
#[derive(Debug, Clone, Deserialize)]
pub struct HeaderInput {
    /// Block timestamp.
    pub time: i64,
    /// Compact target.
    pub bits: u32,
    /// Proof type, work when absent.
    #[serde(default)]
    pub proof: Option<ProofKind>,
}

/// Chain configuration arguments.
#[derive(Parser, Debug, Clone)]
pub struct ChainArgs {
    /// Network rules to apply
    #[arg(long = "chain", value_enum, default_value_t = Chain::Regtest, env = "QTUM_CHAIN")]
    pub chain: Chain,

    /// Height of the synthetic proof-of-work chain tip, one block per target spacing
    #[arg(long = "tip-height", default_value_t = 10)]
    pub tip_height: u32,

    /// JSON file with the headers of the chain, genesis first, replacing the synthetic chain
    #[arg(long = "headers")]
    pub headers: Option<PathBuf>,

    /// JSON file with the contract state at the tip; an empty state when absent
    #[arg(long = "state")]
    pub state: Option<PathBuf>,
}

impl ChainArgs {
    /// Consensus parameters of the chosen network.
    pub fn params(&self) -> ConsensusParams {
        self.chain.params()
    }

    /// Loads the header chain.
    pub fn load_chain(&self, params: &ConsensusParams) -> Result<MemoryChain> {
        let Some(path) = &self.headers else {
            return Ok(MemoryChain::pow(params, self.tip_height));
        };
        let headers: Vec<HeaderInput> = read_json(path)?;
        let mut chain = MemoryChain::new();
        for header in headers {
            chain.push(header.time, header.bits, header.proof.unwrap_or(ProofKind::Work));
        }
        let tip = chain.tip().ok_or(MinerError::EmptyChain)?;
        debug!(target: "qtum_miner", height = tip.height, time = tip.time, "loaded header chain");
        Ok(chain)
    }

    /// Loads the contract state.
    pub fn load_state(&self) -> Result<ContractState> {
        self.state.as_deref().map_or_else(|| Ok(ContractState::new()), read_json)
    }
}
