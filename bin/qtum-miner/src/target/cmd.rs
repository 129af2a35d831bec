use alloy_primitives::U256;
use clap::Parser;
use qtum_consensus::{
    difficulty::{check_difficulty, next_target, CompactTarget},
    BlockHeader, HeaderChain, OutPoint, ProofKind, Txid,
};
use serde::Serialize;
use tracing::debug;

use crate::common::{ChainArgs, LogArgs, MinerError, OutputArgs, Proof, Result};

/// The target the next block must meet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextTarget {
    /// Height of the next block.
    pub height: u32,
    /// Proof type of the next block.
    pub proof: ProofKind,
    /// Timestamp assumed for the next block.
    pub time: i64,
    /// Compact target.
    pub bits: String,
    /// Expanded target.
    pub target: U256,
    /// Whether the bits passed with `--check` match.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid: Option<bool>,
}

/// Compute the compact target of the next block
#[derive(Parser, Debug)]
pub struct Cmd {
    /// Chain configuration
    #[command(flatten)]
    pub chain_args: ChainArgs,

    /// Output configuration
    #[command(flatten)]
    pub output_args: OutputArgs,

    /// Logging configuration
    #[command(flatten)]
    pub log_args: LogArgs,

    /// Proof type of the next block
    #[arg(long = "proof", value_enum, default_value_t = Proof::Work)]
    pub proof: Proof,

    /// Timestamp of the next block; one target spacing after the tip when absent
    #[arg(long = "time")]
    pub time: Option<i64>,

    /// Compact target to check against the expected one, e.g. 0x1d00ffff
    #[arg(long = "check", value_parser = parse_bits)]
    pub check: Option<u32>,
}

fn parse_bits(value: &str) -> std::result::Result<u32, std::num::ParseIntError> {
    match value.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse(),
    }
}

impl Cmd {
    /// Execute the next-target command
    pub fn run(&self) -> Result<()> {
        let target = self.execute()?;
        self.output_args.write(&target)
    }

    /// Computes the target.
    pub fn execute(&self) -> Result<NextTarget> {
        let params = self.chain_args.params();
        let chain = self.chain_args.load_chain(&params)?;
        let tip = chain.tip().ok_or(MinerError::EmptyChain)?;
        let height = tip.height + 1;
        let time = self.time.unwrap_or(tip.time + params.target_spacing(height));
        let proof = ProofKind::from(self.proof);

        let mut header = BlockHeader {
            prev_hash: tip.hash,
            time: u32::try_from(time).unwrap_or(u32::MAX),
            ..Default::default()
        };
        let bits = next_target(&chain, &header, &params, proof)?;
        debug!(target: "qtum_miner", height, bits, "computed next target");

        let valid = self.check.map(|check| {
            header.bits = check;
            if proof == ProofKind::Stake {
                header.prevout_stake = OutPoint::new(Txid::ZERO, 0);
            }
            check_difficulty(&chain, &header, &params).is_ok()
        });
        Ok(NextTarget {
            height,
            proof,
            time,
            bits: format!("{bits:#010x}"),
            target: CompactTarget::from_bits(bits).target,
            valid,
        })
    }
}
