//! Next-target computation and proof validation.
//!
//! Proof of work and proof of stake retarget independently: each regime has its own floor
//! and only looks at ancestors of its own proof type when finding the previous target.

mod compact;
pub use compact::*;

use alloy_primitives::{B256, U256, U512};
use auto_impl::auto_impl;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{params::ProofKind, BlockHeader, ConsensusParams};

/// Errors of the difficulty engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DifficultyError {
    /// An ancestor needed for the computation is not known.
    #[error("missing ancestor at height {height}")]
    MissingAncestor {
        /// Height of the missing ancestor.
        height: u32,
    },
    /// A header declares a target different from the required one.
    #[error("invalid difficulty: bits {got:#010x}, expected {expected:#010x}")]
    InvalidDifficulty {
        /// Declared compact target.
        got: u32,
        /// Required compact target.
        expected: u32,
    },
    /// A header's target moved further than one retarget allows.
    #[error("difficulty transition from {old:#010x} to {new:#010x} is not permitted")]
    ForbiddenTransition {
        /// Previous compact target.
        old: u32,
        /// New compact target.
        new: u32,
    },
}

/// Header metadata of an indexed block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockIndexEntry {
    /// Height of the block.
    pub height: u32,
    /// Block timestamp.
    pub time: i64,
    /// Compact target of the block.
    pub bits: u32,
    /// Proof type of the block.
    pub proof: ProofKind,
    /// Block hash.
    pub hash: B256,
}

/// Read access to the active header chain.
#[auto_impl(&, Box, Arc)]
pub trait HeaderChain {
    /// The block at `height` on the active chain.
    fn ancestor(&self, height: u32) -> Option<BlockIndexEntry>;

    /// The active chain tip.
    fn tip(&self) -> Option<BlockIndexEntry>;
}

fn parent_of<C: HeaderChain>(chain: &C, entry: &BlockIndexEntry) -> Option<BlockIndexEntry> {
    entry.height.checked_sub(1).and_then(|height| chain.ancestor(height))
}

/// Walks back from `from` to the most recent block of the requested proof type.
///
/// Stops at the genesis block when no block of that type exists.
pub fn last_block_index<C: HeaderChain>(
    chain: &C,
    from: BlockIndexEntry,
    proof: ProofKind,
) -> BlockIndexEntry {
    let mut entry = from;
    while entry.proof != proof {
        match parent_of(chain, &entry) {
            Some(parent) => entry = parent,
            None => break,
        }
    }
    entry
}

/// Number of blocks the median time past is taken over.
pub const MEDIAN_TIME_SPAN: u32 = 11;

/// Median timestamp of `from` and up to ten of its ancestors.
pub fn median_time_past<C: HeaderChain>(chain: &C, from: &BlockIndexEntry) -> i64 {
    let first = from.height.saturating_sub(MEDIAN_TIME_SPAN - 1);
    let mut times: Vec<i64> = (first..from.height)
        .filter_map(|height| chain.ancestor(height))
        .map(|entry| entry.time)
        .chain(std::iter::once(from.time))
        .collect();
    times.sort_unstable();
    times[times.len() / 2]
}

/// Computes the compact target the block following the chain tip must carry.
pub fn next_target<C: HeaderChain>(
    chain: &C,
    candidate: &BlockHeader,
    params: &ConsensusParams,
    proof: ProofKind,
) -> Result<u32, DifficultyError> {
    let Some(tip) = chain.tip() else {
        return Ok(to_compact(params.target_limit(0, proof)));
    };
    let height = tip.height + 1;
    let limit = params.target_limit(height, proof);
    let limit_bits = to_compact(limit);
    let last = last_block_index(chain, tip, proof);

    if params.no_retargeting(proof) {
        return Ok(last.bits);
    }

    let interval = params.difficulty_adjustment_interval(height).max(1) as u32;
    if height % interval != 0 {
        if params.pow_allow_min_difficulty_blocks {
            if candidate.time as i64 > last.time + params.target_spacing(height) * 2 {
                trace!(target: "qtum::difficulty", height, "min difficulty escape");
                return Ok(limit_bits);
            }
            let mut entry = last;
            while entry.height > 0 && entry.height % interval != 0 && entry.bits == limit_bits {
                let parent = parent_of(chain, &entry)
                    .ok_or(DifficultyError::MissingAncestor { height: entry.height - 1 })?;
                entry = last_block_index(chain, parent, proof);
            }
            return Ok(entry.bits);
        }
        return Ok(last.bits);
    }

    let first_height = last.height.saturating_sub(interval - 1);
    let first = chain
        .ancestor(first_height)
        .ok_or(DifficultyError::MissingAncestor { height: first_height })?;
    Ok(calculate_next_target(&last, &first, params, height, proof))
}

/// Retargets from `last` given the first block of the interval it closes.
///
/// The timespan actually taken is clamped to a quarter and four times the configured
/// timespan. With BIP94 enforced, the old target is read from `first` instead of `last`.
pub fn calculate_next_target(
    last: &BlockIndexEntry,
    first: &BlockIndexEntry,
    params: &ConsensusParams,
    height: u32,
    proof: ProofKind,
) -> u32 {
    if params.no_retargeting(proof) {
        return last.bits;
    }
    let timespan = params.target_timespan(height);
    let actual = (last.time - first.time).clamp(timespan / 4, timespan * 4);
    let old_bits = if params.enforce_bip94 { first.bits } else { last.bits };
    let old = CompactTarget::from_bits(old_bits).target;
    let new = scale_target(old, actual, timespan, params.target_limit(height, proof));
    trace!(target: "qtum::difficulty", height, actual, timespan, old_bits, "retarget");
    to_compact(new)
}

/// `target * numerator / denominator`, capped at `limit`.
fn scale_target(target: U256, numerator: i64, denominator: i64, limit: U256) -> U256 {
    let wide = U512::from_limbs_slice(target.as_limbs()) * U512::from(numerator.max(0) as u64) /
        U512::from(denominator.max(1) as u64);
    let limit_wide = U512::from_limbs_slice(limit.as_limbs());
    if wide > limit_wide {
        return limit;
    }
    U256::from_limbs_slice(&wide.as_limbs()[..4])
}

/// Returns whether a header may move the target from `old_bits` to `new_bits` at `height`.
///
/// At retarget boundaries the new target must lie within the band one retarget can reach.
/// Elsewhere it must not change. Chains allowing minimum difficulty blocks accept anything.
pub fn permitted_difficulty_transition(
    params: &ConsensusParams,
    height: u32,
    old_bits: u32,
    new_bits: u32,
    proof: ProofKind,
) -> bool {
    if params.pow_allow_min_difficulty_blocks {
        return true;
    }
    let interval = params.difficulty_adjustment_interval(height).max(1) as u32;
    if height % interval != 0 {
        return old_bits == new_bits;
    }
    let timespan = params.target_timespan(height);
    let limit = params.target_limit(height, proof);
    let old = CompactTarget::from_bits(old_bits).target;
    let observed = CompactTarget::from_bits(new_bits).target;

    let largest = round_compact(scale_target(old, timespan * 4, timespan, limit));
    if largest < observed {
        return false;
    }
    let smallest = round_compact(scale_target(old, timespan / 4, timespan, limit));
    smallest <= observed
}

/// Validates the declared bits of a header extending the chain tip.
pub fn check_difficulty<C: HeaderChain>(
    chain: &C,
    header: &BlockHeader,
    params: &ConsensusParams,
) -> Result<(), DifficultyError> {
    let proof = if header.is_proof_of_stake() { ProofKind::Stake } else { ProofKind::Work };
    let expected = next_target(chain, header, params, proof)?;
    if header.bits != expected {
        return Err(DifficultyError::InvalidDifficulty { got: header.bits, expected });
    }
    Ok(())
}

/// Checks that `hash` satisfies the proof-of-work target `bits`.
///
/// The target must be positive, must not overflow and must not exceed the proof-of-work
/// limit. The hash is read as a little-endian 256-bit integer.
pub fn check_proof_of_work(hash: &B256, bits: u32, params: &ConsensusParams) -> bool {
    let decoded = CompactTarget::from_bits(bits);
    if !decoded.is_valid() || decoded.target > params.pow_limit {
        return false;
    }
    U256::from_le_bytes(hash.0) <= decoded.target
}
