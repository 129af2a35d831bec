//! Tests for target retargeting and header difficulty checks.

use alloy_primitives::U256;
use proptest::prelude::*;
use qtum_consensus::{
    difficulty::{
        calculate_next_target, check_difficulty, median_time_past, next_target,
        permitted_difficulty_transition, to_compact, CompactTarget, DifficultyError,
    },
    test_utils::{MemoryChain, GENESIS_TIME},
    BlockHeader, ConsensusParams, HeaderChain, ProofKind,
};

/// Mainnet rules with proof-of-work retargeting: seven blocks per interval at these heights.
fn retargeting_params() -> ConsensusParams {
    ConsensusParams::mainnet().with_retargeting(true)
}

fn limit_bits(params: &ConsensusParams) -> u32 {
    to_compact(params.pow_limit)
}

/// A chain of `spacings.len() + 1` blocks at the limit target, separated by `spacings`.
fn chain_with_spacings(params: &ConsensusParams, spacings: &[i64]) -> MemoryChain {
    let mut chain = MemoryChain::new();
    let mut time = GENESIS_TIME;
    chain.push(time, limit_bits(params), ProofKind::Work);
    for spacing in spacings {
        time += spacing;
        chain.push(time, limit_bits(params), ProofKind::Work);
    }
    chain
}

fn candidate(chain: &MemoryChain, delay: i64) -> BlockHeader {
    BlockHeader { time: (chain.tip_time() + delay) as u32, ..Default::default() }
}

#[test]
fn test_fast_interval_is_clamped_to_a_quarter() {
    let params = retargeting_params();
    assert_eq!(params.difficulty_adjustment_interval(7), 7);
    let chain = chain_with_spacings(&params, &[32; 6]);

    let bits = next_target(&chain, &candidate(&chain, 32), &params, ProofKind::Work).unwrap();
    let old = CompactTarget::from_bits(limit_bits(&params)).target;
    assert_eq!(bits, to_compact(old / U256::from(4)));
}

#[test]
fn test_slow_interval_is_capped_at_the_limit() {
    let params = retargeting_params();
    let chain = chain_with_spacings(&params, &[10_000; 6]);
    let bits = next_target(&chain, &candidate(&chain, 128), &params, ProofKind::Work).unwrap();
    assert_eq!(bits, limit_bits(&params));
}

#[test]
fn test_bits_carry_over_between_boundaries() {
    let params = retargeting_params();
    let mut chain = chain_with_spacings(&params, &[128; 3]);
    chain.push(chain.tip_time() + 128, 0x1d00_ffff, ProofKind::Work);
    let bits = next_target(&chain, &candidate(&chain, 10_000), &params, ProofKind::Work).unwrap();
    assert_eq!(bits, 0x1d00_ffff);
}

#[test]
fn test_no_retargeting_keeps_the_last_bits_of_the_regime() {
    let params = ConsensusParams::regtest();
    let mut chain = MemoryChain::pow(&params, 3);
    chain.push(chain.tip_time() + 32, 0x1d00_ffff, ProofKind::Stake);
    chain.push(chain.tip_time() + 32, 0x1e00_ffff, ProofKind::Work);

    let header = candidate(&chain, 32);
    assert_eq!(next_target(&chain, &header, &params, ProofKind::Stake).unwrap(), 0x1d00_ffff);
    assert_eq!(next_target(&chain, &header, &params, ProofKind::Work).unwrap(), 0x1e00_ffff);
}

#[test]
fn test_min_difficulty_escape_and_walk_back() {
    let params = retargeting_params().with_min_difficulty_blocks(true);
    let limit = limit_bits(&params);
    let mut chain = chain_with_spacings(&params, &[]);
    chain.push(GENESIS_TIME + 128, 0x1d00_ffff, ProofKind::Work);
    chain.push(GENESIS_TIME + 256, limit, ProofKind::Work);

    // a late block may fall back to the limit
    let late = candidate(&chain, 2 * params.target_spacing(3) + 1);
    assert_eq!(next_target(&chain, &late, &params, ProofKind::Work).unwrap(), limit);

    // an on-time block skips the minimum difficulty blocks
    let on_time = candidate(&chain, 10);
    assert_eq!(next_target(&chain, &on_time, &params, ProofKind::Work).unwrap(), 0x1d00_ffff);
}

#[test]
fn test_bip94_reads_the_first_block_of_the_interval() {
    let hard = to_compact(ConsensusParams::mainnet().pow_limit >> 4);
    let build = |params: &ConsensusParams| {
        let mut chain = MemoryChain::new();
        chain.push(GENESIS_TIME, hard, ProofKind::Work);
        for height in 1..7 {
            chain.push(GENESIS_TIME + 128 * height, limit_bits(params), ProofKind::Work);
        }
        chain
    };

    let plain = retargeting_params();
    let chain = build(&plain);
    let plain_bits = next_target(&chain, &candidate(&chain, 128), &plain, ProofKind::Work).unwrap();

    let bip94 = retargeting_params().with_bip94(true);
    let bip94_bits = next_target(&chain, &candidate(&chain, 128), &bip94, ProofKind::Work).unwrap();

    let first = chain.ancestor(0).unwrap();
    let last = chain.tip().unwrap();
    assert_eq!(bip94_bits, calculate_next_target(&last, &first, &bip94, 7, ProofKind::Work));
    assert!(
        CompactTarget::from_bits(bip94_bits).target < CompactTarget::from_bits(plain_bits).target
    );
}

#[test]
fn test_check_difficulty_reports_the_expected_bits() {
    let params = retargeting_params();
    let chain = chain_with_spacings(&params, &[128; 3]);

    let mut header = candidate(&chain, 128);
    header.bits = limit_bits(&params);
    assert_eq!(check_difficulty(&chain, &header, &params), Ok(()));

    header.bits = 0x1d00_ffff;
    assert_eq!(
        check_difficulty(&chain, &header, &params),
        Err(DifficultyError::InvalidDifficulty { got: 0x1d00_ffff, expected: limit_bits(&params) })
    );
}

#[test]
fn test_missing_ancestor_is_an_error() {
    struct TipOnly(qtum_consensus::BlockIndexEntry);

    impl HeaderChain for TipOnly {
        fn ancestor(&self, height: u32) -> Option<qtum_consensus::BlockIndexEntry> {
            (height == self.0.height).then_some(self.0)
        }

        fn tip(&self) -> Option<qtum_consensus::BlockIndexEntry> {
            Some(self.0)
        }
    }

    let params = retargeting_params();
    let tip = chain_with_spacings(&params, &[128; 6]).tip().unwrap();
    let header = BlockHeader { time: (tip.time + 128) as u32, ..Default::default() };
    assert_eq!(
        next_target(&TipOnly(tip), &header, &params, ProofKind::Work),
        Err(DifficultyError::MissingAncestor { height: 0 })
    );
}

#[test]
fn test_median_time_past() {
    let params = ConsensusParams::regtest();
    let mut chain = MemoryChain::new();
    for time in [10, 50, 20, 40, 30] {
        chain.push(time, limit_bits(&params), ProofKind::Work);
    }
    assert_eq!(median_time_past(&chain, &chain.tip().unwrap()), 30);
    assert_eq!(median_time_past(&chain, &chain.ancestor(0).unwrap()), 10);

    // only the last eleven blocks count
    let mut long = MemoryChain::new();
    for time in 0..20 {
        long.push(time * 100, limit_bits(&params), ProofKind::Work);
    }
    assert_eq!(median_time_past(&long, &long.tip().unwrap()), 1400);
}

proptest! {
    #[test]
    fn retargets_stay_within_the_permitted_band(spacings in prop::collection::vec(1i64..2_000, 6)) {
        let params = retargeting_params();
        let chain = chain_with_spacings(&params, &spacings);
        let bits = next_target(&chain, &candidate(&chain, 128), &params, ProofKind::Work).unwrap();
        prop_assert!(permitted_difficulty_transition(
            &params,
            7,
            limit_bits(&params),
            bits,
            ProofKind::Work
        ));
        prop_assert!(CompactTarget::from_bits(bits).target <= params.pow_limit);
    }
}
